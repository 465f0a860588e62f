// src/classifier.rs
//! Klasyfikator spamu: wymienny predykat na wektorze cech + ładowanie modelu z pliku.
//!
//! Model to zespół drzew decyzyjnych zapisany jako JSON (eksport z offline'owego
//! treningu). Trening nie jest częścią bota – tu tylko ładujemy i pytamy.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use anyhow::{Context as _, Result, bail};
use serenity::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::analyser::{FeatureVector, analyse_sample};

/// Binarny werdykt „spam / nie spam” dla wektora cech.
pub trait SpamPredicate: Send + Sync {
    fn predict(&self, features: &FeatureVector) -> bool;
}

impl<F> SpamPredicate for F
where
    F: Fn(&FeatureVector) -> bool + Send + Sync,
{
    fn predict(&self, features: &FeatureVector) -> bool {
        self(features)
    }
}

/* ==============================
   Zespół drzew (format artefaktu)
   ============================== */

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum TreeNode {
    Leaf {
        leaf: bool,
    },
    Split {
        /// indeks w `(total_chars, unique_chars, total_words, unique_words)`
        feature: usize,
        threshold: f64,
        left: Box<TreeNode>,
        right: Box<TreeNode>,
    },
}

impl TreeNode {
    fn decide(&self, x: &[f64; 4]) -> bool {
        let mut node = self;
        loop {
            match node {
                TreeNode::Leaf { leaf } => return *leaf,
                TreeNode::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    node = if x[*feature] <= *threshold { left } else { right };
                }
            }
        }
    }

    fn validate(&self) -> Result<()> {
        match self {
            TreeNode::Leaf { .. } => Ok(()),
            TreeNode::Split {
                feature,
                left,
                right,
                ..
            } => {
                if *feature >= 4 {
                    bail!("feature index {feature} out of range (expected 0..4)");
                }
                left.validate()?;
                right.validate()
            }
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ForestModel {
    pub trees: Vec<TreeNode>,
}

impl ForestModel {
    pub fn from_json(bytes: &[u8]) -> Result<Self> {
        let model: ForestModel = serde_json::from_slice(bytes).context("invalid model artifact")?;
        if model.trees.is_empty() {
            bail!("model artifact contains no trees");
        }
        for tree in &model.trees {
            tree.validate()?;
        }
        Ok(model)
    }
}

impl SpamPredicate for ForestModel {
    /// Głosowanie większościowe, remis = nie spam.
    fn predict(&self, features: &FeatureVector) -> bool {
        let x = features.as_array();
        let votes = self.trees.iter().filter(|t| t.decide(&x)).count();
        votes * 2 > self.trees.len()
    }
}

/* ==============================
   Źródło modelu
   ============================== */

#[async_trait]
pub trait ModelStore: Send + Sync {
    async fn load(&self) -> Result<Arc<dyn SpamPredicate>>;
}

/// Model czytany z pliku JSON (`automod.model_path`).
#[derive(Debug, Clone)]
pub struct FileModelStore {
    path: PathBuf,
}

impl FileModelStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl ModelStore for FileModelStore {
    async fn load(&self) -> Result<Arc<dyn SpamPredicate>> {
        let bytes = tokio::fs::read(&self.path)
            .await
            .with_context(|| format!("cannot read model file {}", self.path.display()))?;
        let model = ForestModel::from_json(&bytes)?;
        info!(path=%self.path.display(), trees = model.trees.len(), "spam model loaded");
        Ok(Arc::new(model))
    }
}

/* ==============================
   Klasyfikator z hot-swapem
   ============================== */

pub struct SpamClassifier {
    predicate: RwLock<Option<Arc<dyn SpamPredicate>>>,
    unavailable_logged: AtomicBool,
}

impl Default for SpamClassifier {
    fn default() -> Self {
        Self::new()
    }
}

impl SpamClassifier {
    /// Bez modelu – każda wiadomość przechodzi (fail-open).
    pub fn new() -> Self {
        Self {
            predicate: RwLock::new(None),
            unavailable_logged: AtomicBool::new(false),
        }
    }

    pub fn with_predicate(predicate: Arc<dyn SpamPredicate>) -> Self {
        let this = Self::new();
        this.swap(predicate);
        this
    }

    pub fn swap(&self, predicate: Arc<dyn SpamPredicate>) {
        *self.predicate.write().unwrap_or_else(PoisonError::into_inner) = Some(predicate);
        self.unavailable_logged.store(false, Ordering::Relaxed);
    }

    pub fn unload(&self) {
        *self.predicate.write().unwrap_or_else(PoisonError::into_inner) = None;
    }

    /// Przeładowanie modelu. Przy błędzie zostaje poprzedni predykat.
    pub async fn reload(&self, store: &dyn ModelStore) -> Result<()> {
        let predicate = store.load().await?;
        self.swap(predicate);
        Ok(())
    }

    pub fn is_loaded(&self) -> bool {
        self.predicate
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    pub fn predict(&self, features: &FeatureVector) -> bool {
        let current = self
            .predicate
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        match current {
            Some(p) => p.predict(features),
            None => {
                if !self.unavailable_logged.swap(true, Ordering::Relaxed) {
                    warn!("spam model not loaded – antispam treats every message as clean");
                }
                false
            }
        }
    }

    /// `normalized` musi już przejść przez [`crate::normalize::normalize`].
    pub fn is_spam(&self, normalized: &str) -> bool {
        self.predict(&analyse_sample(normalized))
    }
}
