// src/db/mod.rs
use std::time::Duration;

use anyhow::Result;
use moka::future::Cache;
use serde_json::Value;
use serenity::async_trait;
use sqlx::{Pool, Postgres, postgres::PgPoolOptions};

use crate::analyser::FeatureVector;
use crate::guild::{GuildAutomod, GuildConfigStore};
use crate::training::{TrainingCounts, TrainingDataStore, TrainingSample};

pub type Db = Pool<Postgres>;

const CONFIG_CACHE_CAPACITY: u64 = 10_000;

// unikalność po `content_hash = md5(content)` (migracja 0002)
const INSERT_SAMPLE_SQL: &str =
    "INSERT INTO tam.training_data (content, total_chars, unique_chars, total_words, unique_words) \
     VALUES ($1, $2, $3, $4, $5) ON CONFLICT (content_hash) DO NOTHING";

const INSERT_LABELLED_SQL: &str =
    "INSERT INTO tam.training_data (content, total_chars, unique_chars, total_words, unique_words, is_spam) \
     VALUES ($1, $2, $3, $4, $5, $6) ON CONFLICT (content_hash) DO NOTHING";

const LABEL_BY_CONTENT_SQL: &str =
    "UPDATE tam.training_data SET is_spam = $2 WHERE content_hash = md5($1) AND content = $1";

pub async fn connect(url: &str, max: Option<u32>) -> Result<Db> {
    let pool = PgPoolOptions::new()
        .max_connections(max.unwrap_or(10))
        .connect(url)
        .await?;

    Ok(pool)
}

pub async fn migrate(pool: &Db) -> Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

/* ==============================
   Konfiguracja gildii (JSONB)
   ============================== */

/// `tam.automod_config` + cache odczytów (TTL), unieważniany przy zapisie.
pub struct PgGuildStore {
    db: Db,
    cache: Cache<u64, Option<GuildAutomod>>,
}

impl PgGuildStore {
    pub fn new(db: Db, ttl: Duration) -> Self {
        Self {
            db,
            cache: Cache::builder()
                .time_to_live(ttl)
                .max_capacity(CONFIG_CACHE_CAPACITY)
                .build(),
        }
    }

    async fn fetch(&self, guild_id: u64) -> Result<Option<GuildAutomod>> {
        let row: Option<(Value,)> =
            sqlx::query_as("SELECT cfg FROM tam.automod_config WHERE guild_id = $1")
                .bind(guild_id as i64)
                .fetch_optional(&self.db)
                .await?;
        Ok(row.map(|(v,)| GuildAutomod::from_json_or_default(guild_id, v)))
    }
}

#[async_trait]
impl GuildConfigStore for PgGuildStore {
    async fn load(&self, guild_id: u64) -> Result<Option<GuildAutomod>> {
        if let Some(hit) = self.cache.get(&guild_id).await {
            return Ok(hit);
        }
        let cfg = self.fetch(guild_id).await?;
        self.cache.insert(guild_id, cfg.clone()).await;
        Ok(cfg)
    }

    async fn save(&self, guild_id: u64, cfg: &GuildAutomod) -> Result<()> {
        let data = serde_json::to_value(cfg)?;
        sqlx::query(
            "INSERT INTO tam.automod_config (guild_id, cfg, updated_at) VALUES ($1, $2, now()) \
             ON CONFLICT (guild_id) DO UPDATE SET cfg = EXCLUDED.cfg, updated_at = now()",
        )
        .bind(guild_id as i64)
        .bind(&data)
        .execute(&self.db)
        .await?;
        self.cache.invalidate(&guild_id).await;
        Ok(())
    }
}

/* ==============================
   Dane treningowe
   ============================== */

pub struct PgTrainingStore {
    db: Db,
}

impl PgTrainingStore {
    pub fn new(db: Db) -> Self {
        Self { db }
    }
}

type SampleRow = (i64, String, i32, i32, i32, i32, Option<bool>);

fn sample_from_row(r: SampleRow) -> TrainingSample {
    TrainingSample {
        id: r.0,
        content: r.1,
        features: FeatureVector {
            total_chars: r.2.max(0) as usize,
            unique_chars: r.3.max(0) as usize,
            total_words: r.4.max(0) as usize,
            unique_words: r.5.max(0) as usize,
        },
        is_spam: r.6,
    }
}

fn as_i32(v: usize) -> i32 {
    i32::try_from(v).unwrap_or(i32::MAX)
}

#[async_trait]
impl TrainingDataStore for PgTrainingStore {
    async fn register(&self, content: &str, f: FeatureVector) -> Result<()> {
        sqlx::query(INSERT_SAMPLE_SQL)
            .bind(content)
            .bind(as_i32(f.total_chars))
            .bind(as_i32(f.unique_chars))
            .bind(as_i32(f.total_words))
            .bind(as_i32(f.unique_words))
            .execute(&self.db)
            .await?;
        Ok(())
    }

    async fn label(&self, content: &str, f: FeatureVector, is_spam: bool) -> Result<u64> {
        let mut tx = self.db.begin().await?;
        let by_content = sqlx::query(LABEL_BY_CONTENT_SQL)
            .bind(content)
            .bind(is_spam)
            .execute(&mut *tx)
            .await?
            .rows_affected();

        let by_features = sqlx::query(
            "UPDATE tam.training_data SET is_spam = $5 \
             WHERE total_chars = $1 AND unique_chars = $2 AND total_words = $3 AND unique_words = $4 \
             AND content <> $6",
        )
        .bind(as_i32(f.total_chars))
        .bind(as_i32(f.unique_chars))
        .bind(as_i32(f.total_words))
        .bind(as_i32(f.unique_words))
        .bind(is_spam)
        .bind(content)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        let mut inserted = 0;
        if by_content == 0 {
            inserted = sqlx::query(INSERT_LABELLED_SQL)
                .bind(content)
                .bind(as_i32(f.total_chars))
                .bind(as_i32(f.unique_chars))
                .bind(as_i32(f.total_words))
                .bind(as_i32(f.unique_words))
                .bind(is_spam)
                .execute(&mut *tx)
                .await?
                .rows_affected();
        }

        tx.commit().await?;
        Ok(by_content + by_features + inserted)
    }

    async fn next_unlabeled(&self) -> Result<Option<TrainingSample>> {
        let row: Option<SampleRow> = sqlx::query_as(
            "SELECT id, content, total_chars, unique_chars, total_words, unique_words, is_spam \
             FROM tam.training_data WHERE is_spam IS NULL ORDER BY id LIMIT 1",
        )
        .fetch_optional(&self.db)
        .await?;
        Ok(row.map(sample_from_row))
    }

    async fn counts(&self) -> Result<TrainingCounts> {
        let (total, validated): (i64, i64) = sqlx::query_as(
            "SELECT count(*), count(is_spam) FROM tam.training_data",
        )
        .fetch_one(&self.db)
        .await?;
        Ok(TrainingCounts {
            total: total.max(0) as u64,
            validated: validated.max(0) as u64,
        })
    }
}
