// src/error.rs
//! Typowane odmowy dla komend administracyjnych.

use thiserror::Error;

use crate::guild::BlacklistMode;

#[derive(Debug, Error)]
pub enum AdminError {
    #[error("`{word}` is already on the {mode} blacklist")]
    WordAlreadyExists { word: String, mode: BlacklistMode },

    #[error("`{word}` is not on the {mode} blacklist")]
    WordNotFound { word: String, mode: BlacklistMode },

    #[error("blacklist mode is full (limit {limit} words)")]
    WordsThresholdExceeded { limit: usize },

    #[error("expression is empty after normalization")]
    EmptyExpression,

    #[error("{0} is already ignored")]
    AlreadyIgnored(u64),

    #[error("{0} is not ignored")]
    NotIgnored(u64),

    #[error("invalid value: {0}")]
    InvalidValue(String),

    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

pub type AdminResult<T> = std::result::Result<T, AdminError>;
