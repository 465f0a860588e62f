// src/lib.rs

pub mod analyser;
pub mod antiraid;
pub mod blacklist;
pub mod classifier;
pub mod commands;
pub mod config;
pub mod db;
pub mod discord;
pub mod error;
pub mod guild;
pub mod logging;
pub mod modlog;
pub mod nickfilter;
pub mod normalize;
pub mod pipeline;
pub mod training;
pub mod warnings;
pub mod whitelist;
pub mod window;

use anyhow::Result;
use std::sync::Arc;
use std::time::Duration;

use classifier::{FileModelStore, SpamClassifier};
use config::Settings;
use db::{Db, PgGuildStore, PgTrainingStore};
use guild::GuildConfigs;
use pipeline::{ModerationPipeline, PipelineOptions};

use serenity::all::GatewayIntents;

/// Globalny kontekst aplikacji: konfiguracja, DB i gotowy pipeline automoderacji.
pub struct AppContext {
    pub settings: Settings,
    pub db: Db,
    pub pipeline: Arc<ModerationPipeline>,
}

impl AppContext {
    /// Bootstrap całej aplikacji:
    /// - logi
    /// - połączenie z DB + migracje
    /// - store'y konfiguracji i danych treningowych
    /// - model antyspamu (brak → antyspam przepuszcza) + zadanie konserwacji
    pub async fn bootstrap(settings: Settings) -> Result<Arc<Self>> {
        // 1) logi
        logging::init(&settings);

        // 2) DB
        let db = db::connect(&settings.database.url, settings.database.max_connections).await?;
        db::migrate(&db).await?;

        // 3) store'y
        let ttl = Duration::from_secs(settings.automod.config_cache_ttl_secs);
        let configs = Arc::new(GuildConfigs::new(Arc::new(PgGuildStore::new(db.clone(), ttl))));
        let training = Arc::new(PgTrainingStore::new(db.clone()));

        // 4) model
        let classifier = SpamClassifier::new();
        if let Some(path) = settings.automod.model_path.as_deref() {
            match classifier.reload(&FileModelStore::new(path)).await {
                Ok(()) => tracing::info!(path, "spam model loaded"),
                Err(e) => tracing::warn!(error=?e, path, "spam model not loaded – antispam inactive"),
            }
        }

        // 5) pipeline + konserwacja w tle
        let pipeline = Arc::new(ModerationPipeline::new(
            configs,
            training,
            classifier,
            PipelineOptions::from(&settings.automod),
        ));
        ModerationPipeline::spawn_maintenance(&pipeline);

        Ok(Arc::new(Self {
            settings,
            db,
            pipeline,
        }))
    }

    /// Skąd przeładować model (`/automod model-reload`).
    pub fn model_store(&self) -> Option<FileModelStore> {
        self.settings.automod.model_path.as_deref().map(FileModelStore::new)
    }

    /// Środowisko: "production" | "development".
    #[inline]
    pub fn env(&self) -> &str {
        &self.settings.env
    }
}

/// Zestaw intents potrzebny automoderacji:
/// - GUILDS, GUILD_MESSAGES, MESSAGE_CONTENT (treść wiadomości),
/// - GUILD_MEMBERS (wejścia i zmiany nicków).
pub fn default_gateway_intents() -> GatewayIntents {
    GatewayIntents::GUILDS
        | GatewayIntents::GUILD_MESSAGES
        | GatewayIntents::MESSAGE_CONTENT
        | GatewayIntents::GUILD_MEMBERS
}

/// Start klienta Discorda (Gateway + slash commands).
pub async fn run(ctx: Arc<AppContext>) -> Result<()> {
    discord::run_bot(ctx).await
}
