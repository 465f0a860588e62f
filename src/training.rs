// src/training.rs
//! Zbiór treningowy antyspamu: próbki do ręcznego oznaczenia.

use std::sync::Mutex;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use serenity::async_trait;

use crate::analyser::FeatureVector;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrainingSample {
    pub id: i64,
    /// Znormalizowana treść (pojedyncza wiadomość albo sklejone okno).
    pub content: String,
    pub features: FeatureVector,
    /// `None` → jeszcze nie oznaczona.
    pub is_spam: Option<bool>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TrainingCounts {
    pub total: u64,
    pub validated: u64,
}

#[async_trait]
pub trait TrainingDataStore: Send + Sync {
    /// Idempotentne po treści.
    async fn register(&self, content: &str, features: FeatureVector) -> Result<()>;

    /// Oznacza wiersze o tej samej treści oraz o tym samym wektorze cech.
    /// Brak próbki → zostaje dopisana (już oznaczona). Zwraca liczbę zmienionych wierszy.
    async fn label(&self, content: &str, features: FeatureVector, is_spam: bool) -> Result<u64>;

    async fn next_unlabeled(&self) -> Result<Option<TrainingSample>>;

    async fn counts(&self) -> Result<TrainingCounts>;
}

#[derive(Default)]
pub struct MemoryTrainingStore {
    rows: Mutex<Vec<TrainingSample>>,
}

impl MemoryTrainingStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn samples(&self) -> Vec<TrainingSample> {
        self.rows
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl TrainingDataStore for MemoryTrainingStore {
    async fn register(&self, content: &str, features: FeatureVector) -> Result<()> {
        let mut rows = self.rows.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        if rows.iter().any(|r| r.content == content) {
            return Ok(());
        }
        let id = rows.len() as i64 + 1;
        rows.push(TrainingSample {
            id,
            content: content.to_string(),
            features,
            is_spam: None,
        });
        Ok(())
    }

    async fn label(&self, content: &str, features: FeatureVector, is_spam: bool) -> Result<u64> {
        let mut rows = self.rows.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        let mut changed = 0;
        let mut content_seen = false;
        for r in rows.iter_mut() {
            content_seen |= r.content == content;
            if r.content == content || r.features == features {
                r.is_spam = Some(is_spam);
                changed += 1;
            }
        }
        if !content_seen {
            let id = rows.len() as i64 + 1;
            rows.push(TrainingSample {
                id,
                content: content.to_string(),
                features,
                is_spam: Some(is_spam),
            });
            changed += 1;
        }
        Ok(changed)
    }

    async fn next_unlabeled(&self) -> Result<Option<TrainingSample>> {
        let rows = self.rows.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        Ok(rows.iter().find(|r| r.is_spam.is_none()).cloned())
    }

    async fn counts(&self) -> Result<TrainingCounts> {
        let rows = self.rows.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        Ok(TrainingCounts {
            total: rows.len() as u64,
            validated: rows.iter().filter(|r| r.is_spam.is_some()).count() as u64,
        })
    }
}
