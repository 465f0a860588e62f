// src/guild.rs
//! Konfiguracja automoderacji per gildia + operacje administracyjne.
//!
//! Cała konfiguracja gildii to jeden dokument (`GuildAutomod`), trzymany jako JSONB.
//! Brakujące pola uzupełniają się domyślnymi wartościami (`#[serde(default)]`).

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::Result;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serenity::async_trait;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::blacklist::preformat;
use crate::error::{AdminError, AdminResult};

/// Maksymalna liczba wyrażeń w jednym trybie czarnej listy.
pub const MAX_WORDS_PER_MODE: usize = 50;

pub const WARNINGS_THRESHOLD_RANGE: std::ops::RangeInclusive<u32> = 1..=10;

/// Discord: timeout max 28 dni.
pub const MAX_TIMEOUT_MINUTES: u32 = 28 * 24 * 60;

/// Domyślny zestaw dozwolonych znaków (po lowercase): ASCII, cyfry, interpunkcja, polskie litery.
pub const DEFAULT_WHITELIST_CHARACTERS: &str =
    "abcdefghijklmnopqrstuvwxyz0123456789ąćęłńóśźż!@#$%^&*()-_=+[]{};:'\",.<>/?\\|`~";

/* ==============================
   Enumy
   ============================== */

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BlacklistMode {
    Common,
    Wild,
    Super,
}

impl BlacklistMode {
    pub const ALL: [BlacklistMode; 3] = [BlacklistMode::Common, BlacklistMode::Wild, BlacklistMode::Super];

    pub fn as_str(self) -> &'static str {
        match self {
            BlacklistMode::Common => "common",
            BlacklistMode::Wild => "wild",
            BlacklistMode::Super => "super",
        }
    }
}

impl fmt::Display for BlacklistMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BlacklistMode {
    type Err = AdminError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "common" => Ok(BlacklistMode::Common),
            "wild" => Ok(BlacklistMode::Wild),
            "super" => Ok(BlacklistMode::Super),
            other => Err(AdminError::InvalidValue(format!("unknown blacklist mode `{other}`"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterKind {
    Antispam,
    Blacklist,
    Whitelist,
    Nickfilter,
    Antiraid,
}

impl fmt::Display for FilterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            FilterKind::Antispam => "antispam",
            FilterKind::Blacklist => "blacklist",
            FilterKind::Whitelist => "whitelist",
            FilterKind::Nickfilter => "nickfilter",
            FilterKind::Antiraid => "antiraid",
        };
        f.write_str(s)
    }
}

impl FromStr for FilterKind {
    type Err = AdminError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "antispam" => Ok(FilterKind::Antispam),
            "blacklist" => Ok(FilterKind::Blacklist),
            "whitelist" => Ok(FilterKind::Whitelist),
            "nickfilter" => Ok(FilterKind::Nickfilter),
            "antiraid" => Ok(FilterKind::Antiraid),
            other => Err(AdminError::InvalidValue(format!("unknown filter `{other}`"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AntiraidPunishment {
    Ban,
    #[default]
    Kick,
    Timeout,
}

impl FromStr for AntiraidPunishment {
    type Err = AdminError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ban" => Ok(AntiraidPunishment::Ban),
            "kick" => Ok(AntiraidPunishment::Kick),
            "timeout" => Ok(AntiraidPunishment::Timeout),
            other => Err(AdminError::InvalidValue(format!("unknown punishment `{other}`"))),
        }
    }
}

/* ==============================
   Dane filtrów
   ============================== */

/// Wspólny warunek wstępny filtra: włączony i kanał / żadna z ról nie jest ignorowana.
pub trait FilterGate {
    fn enabled(&self) -> bool;
    fn ignored(&self) -> &[u64];

    fn applies(&self, channel_id: u64, role_ids: &[u64]) -> bool {
        self.enabled()
            && !self.ignored().contains(&channel_id)
            && self.applies_to_roles(role_ids)
    }

    fn applies_to_roles(&self, role_ids: &[u64]) -> bool {
        self.enabled() && !role_ids.iter().any(|r| self.ignored().contains(r))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterData {
    pub enabled: bool,
    /// ID kanałów i ról.
    pub ignored: Vec<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BlacklistData {
    pub enabled: bool,
    pub ignored: Vec<u64>,
    pub common: Vec<String>,
    pub wild: Vec<String>,
    #[serde(rename = "super")]
    pub super_: Vec<String>,
    /// `true` → pokazujemy ocenzurowaną treść; `false` → tylko flaga.
    pub filter_enabled: bool,
}

impl Default for BlacklistData {
    fn default() -> Self {
        Self {
            enabled: false,
            ignored: Vec::new(),
            common: Vec::new(),
            wild: Vec::new(),
            super_: Vec::new(),
            filter_enabled: true,
        }
    }
}

impl BlacklistData {
    pub fn words(&self, mode: BlacklistMode) -> &[String] {
        match mode {
            BlacklistMode::Common => &self.common,
            BlacklistMode::Wild => &self.wild,
            BlacklistMode::Super => &self.super_,
        }
    }

    fn words_mut(&mut self, mode: BlacklistMode) -> &mut Vec<String> {
        match mode {
            BlacklistMode::Common => &mut self.common,
            BlacklistMode::Wild => &mut self.wild,
            BlacklistMode::Super => &mut self.super_,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WhitelistData {
    pub enabled: bool,
    pub characters: String,
    pub ignored: Vec<u64>,
}

impl Default for WhitelistData {
    fn default() -> Self {
        Self {
            enabled: false,
            characters: DEFAULT_WHITELIST_CHARACTERS.to_string(),
            ignored: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AntiraidData {
    pub enabled: bool,
    pub join_interval_secs: u32,
    pub members_limit: u32,
    pub punishment: AntiraidPunishment,
}

impl Default for AntiraidData {
    fn default() -> Self {
        Self {
            enabled: false,
            join_interval_secs: 10,
            members_limit: 5,
            punishment: AntiraidPunishment::Kick,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WarningConfig {
    pub threshold: u32,
    pub timeout_minutes: u32,
}

impl Default for WarningConfig {
    fn default() -> Self {
        Self {
            threshold: 3,
            timeout_minutes: 10,
        }
    }
}

macro_rules! impl_gate {
    ($($t:ty),*) => {$(
        impl FilterGate for $t {
            fn enabled(&self) -> bool { self.enabled }
            fn ignored(&self) -> &[u64] { &self.ignored }
        }
    )*};
}
impl_gate!(FilterData, BlacklistData, WhitelistData);

/// Pełna konfiguracja automoderacji jednej gildii.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GuildAutomod {
    pub antispam: FilterData,
    pub blacklist: BlacklistData,
    pub whitelist: WhitelistData,
    pub nickfilter: FilterData,
    pub antiraid: AntiraidData,
    pub warnings: WarningConfig,
    /// Kanał dziennika moderacji; `None` → bez logów.
    pub log_channel_id: Option<u64>,
}

impl GuildAutomod {
    /// Odczyt z JSON-a; nieczytelny dokument → wartości domyślne (z ostrzeżeniem w logu).
    pub fn from_json_or_default(guild_id: u64, value: serde_json::Value) -> Self {
        match serde_json::from_value(value) {
            Ok(cfg) => cfg,
            Err(e) => {
                warn!(guild_id, error=?e, "automod config unreadable – using defaults");
                Self::default()
            }
        }
    }

    fn ignored_mut(&mut self, kind: FilterKind) -> AdminResult<&mut Vec<u64>> {
        match kind {
            FilterKind::Antispam => Ok(&mut self.antispam.ignored),
            FilterKind::Blacklist => Ok(&mut self.blacklist.ignored),
            FilterKind::Whitelist => Ok(&mut self.whitelist.ignored),
            FilterKind::Nickfilter => Ok(&mut self.nickfilter.ignored),
            FilterKind::Antiraid => Err(AdminError::InvalidValue(
                "antiraid has no ignore list".to_string(),
            )),
        }
    }
}

/* ==============================
   Store
   ============================== */

#[async_trait]
pub trait GuildConfigStore: Send + Sync {
    /// `None` → gildia bez zapisanej konfiguracji.
    async fn load(&self, guild_id: u64) -> Result<Option<GuildAutomod>>;
    async fn save(&self, guild_id: u64, cfg: &GuildAutomod) -> Result<()>;
}

/// Store w pamięci (testy / tryb bez bazy).
#[derive(Default)]
pub struct MemoryGuildStore {
    rows: DashMap<u64, GuildAutomod>,
}

impl MemoryGuildStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl GuildConfigStore for MemoryGuildStore {
    async fn load(&self, guild_id: u64) -> Result<Option<GuildAutomod>> {
        Ok(self.rows.get(&guild_id).map(|r| r.value().clone()))
    }

    async fn save(&self, guild_id: u64, cfg: &GuildAutomod) -> Result<()> {
        self.rows.insert(guild_id, cfg.clone());
        Ok(())
    }
}

/* ==============================
   Fasada: odczyt + komendy admina
   ============================== */

/// Wynik `add_many_blacklist_words`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BulkAdd {
    pub added: usize,
    pub already_present: usize,
}

pub struct GuildConfigs {
    store: Arc<dyn GuildConfigStore>,
    // read-modify-write na dokumencie gildii – jedna mutacja naraz w procesie
    write_lock: Mutex<()>,
}

impl GuildConfigs {
    pub fn new(store: Arc<dyn GuildConfigStore>) -> Self {
        Self {
            store,
            write_lock: Mutex::new(()),
        }
    }

    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryGuildStore::new()))
    }

    pub async fn get(&self, guild_id: u64) -> Result<GuildAutomod> {
        Ok(self.store.load(guild_id).await?.unwrap_or_default())
    }

    pub async fn antispam(&self, guild_id: u64) -> Result<FilterData> {
        Ok(self.get(guild_id).await?.antispam)
    }

    pub async fn blacklist(&self, guild_id: u64) -> Result<BlacklistData> {
        Ok(self.get(guild_id).await?.blacklist)
    }

    pub async fn whitelist(&self, guild_id: u64) -> Result<WhitelistData> {
        Ok(self.get(guild_id).await?.whitelist)
    }

    pub async fn nickfilter(&self, guild_id: u64) -> Result<FilterData> {
        Ok(self.get(guild_id).await?.nickfilter)
    }

    pub async fn antiraid(&self, guild_id: u64) -> Result<AntiraidData> {
        Ok(self.get(guild_id).await?.antiraid)
    }

    pub async fn warnings(&self, guild_id: u64) -> Result<WarningConfig> {
        Ok(self.get(guild_id).await?.warnings)
    }

    pub async fn log_channel(&self, guild_id: u64) -> Result<Option<u64>> {
        Ok(self.get(guild_id).await?.log_channel_id)
    }

    async fn update<R>(
        &self,
        guild_id: u64,
        f: impl FnOnce(&mut GuildAutomod) -> AdminResult<R>,
    ) -> AdminResult<R> {
        let _guard = self.write_lock.lock().await;
        let mut cfg = self.get(guild_id).await?;
        let out = f(&mut cfg)?;
        self.store.save(guild_id, &cfg).await?;
        Ok(out)
    }

    pub async fn set_enabled(&self, guild_id: u64, kind: FilterKind, value: bool) -> AdminResult<()> {
        self.update(guild_id, |cfg| {
            match kind {
                FilterKind::Antispam => cfg.antispam.enabled = value,
                FilterKind::Blacklist => cfg.blacklist.enabled = value,
                FilterKind::Whitelist => cfg.whitelist.enabled = value,
                FilterKind::Nickfilter => cfg.nickfilter.enabled = value,
                FilterKind::Antiraid => cfg.antiraid.enabled = value,
            }
            Ok(())
        })
        .await?;
        info!(guild_id, %kind, value, "automod filter toggled");
        Ok(())
    }

    pub async fn add_ignored(&self, guild_id: u64, kind: FilterKind, id: u64) -> AdminResult<()> {
        self.update(guild_id, |cfg| {
            let ignored = cfg.ignored_mut(kind)?;
            if ignored.contains(&id) {
                return Err(AdminError::AlreadyIgnored(id));
            }
            ignored.push(id);
            Ok(())
        })
        .await
    }

    pub async fn remove_ignored(&self, guild_id: u64, kind: FilterKind, id: u64) -> AdminResult<()> {
        self.update(guild_id, |cfg| {
            let ignored = cfg.ignored_mut(kind)?;
            let Some(pos) = ignored.iter().position(|x| *x == id) else {
                return Err(AdminError::NotIgnored(id));
            };
            ignored.remove(pos);
            Ok(())
        })
        .await
    }

    /// `None` wyłącza dziennik moderacji.
    pub async fn set_log_channel(&self, guild_id: u64, channel_id: Option<u64>) -> AdminResult<()> {
        self.update(guild_id, |cfg| {
            cfg.log_channel_id = channel_id;
            Ok(())
        })
        .await?;
        info!(guild_id, ?channel_id, "automod log channel set");
        Ok(())
    }

    pub async fn set_blacklist_filter(&self, guild_id: u64, value: bool) -> AdminResult<()> {
        self.update(guild_id, |cfg| {
            cfg.blacklist.filter_enabled = value;
            Ok(())
        })
        .await
    }

    /// Zwraca słowo w postaci, w jakiej zostało zapisane.
    pub async fn add_blacklist_word(
        &self,
        guild_id: u64,
        mode: BlacklistMode,
        word: &str,
    ) -> AdminResult<String> {
        let stored = preformat(word, mode);
        if stored.is_empty() {
            return Err(AdminError::EmptyExpression);
        }

        self.update(guild_id, |cfg| {
            let words = cfg.blacklist.words_mut(mode);
            if words.contains(&stored) {
                return Err(AdminError::WordAlreadyExists {
                    word: stored.clone(),
                    mode,
                });
            }
            if words.len() >= MAX_WORDS_PER_MODE {
                return Err(AdminError::WordsThresholdExceeded {
                    limit: MAX_WORDS_PER_MODE,
                });
            }
            words.push(stored.clone());
            Ok(stored)
        })
        .await
    }

    /// Suma zbiorów. Przekroczenie limitu odrzuca całą operację.
    pub async fn add_many_blacklist_words<S: AsRef<str>>(
        &self,
        guild_id: u64,
        mode: BlacklistMode,
        words: &[S],
    ) -> AdminResult<BulkAdd> {
        let incoming: BTreeSet<String> = words
            .iter()
            .map(|w| preformat(w.as_ref(), mode))
            .filter(|w| !w.is_empty())
            .collect();

        self.update(guild_id, |cfg| {
            let current = cfg.blacklist.words_mut(mode);
            let (present, fresh): (Vec<String>, Vec<String>) =
                incoming.into_iter().partition(|w| current.contains(w));

            if current.len() + fresh.len() > MAX_WORDS_PER_MODE {
                return Err(AdminError::WordsThresholdExceeded {
                    limit: MAX_WORDS_PER_MODE,
                });
            }
            let report = BulkAdd {
                added: fresh.len(),
                already_present: present.len(),
            };
            current.extend(fresh);
            Ok(report)
        })
        .await
    }

    /// Przyjmuje słowo dokładnie tak, jak jest zapisane, albo w postaci przed formatowaniem.
    pub async fn remove_blacklist_word(
        &self,
        guild_id: u64,
        mode: BlacklistMode,
        word: &str,
    ) -> AdminResult<()> {
        let formatted = preformat(word, mode);
        self.update(guild_id, |cfg| {
            let words = cfg.blacklist.words_mut(mode);
            let pos = words
                .iter()
                .position(|w| w == word)
                .or_else(|| words.iter().position(|w| *w == formatted));
            match pos {
                Some(i) => {
                    words.remove(i);
                    Ok(())
                }
                None => Err(AdminError::WordNotFound {
                    word: word.to_string(),
                    mode,
                }),
            }
        })
        .await
    }

    /// `None` czyści wszystkie tryby.
    pub async fn clear_blacklist(&self, guild_id: u64, mode: Option<BlacklistMode>) -> AdminResult<()> {
        self.update(guild_id, |cfg| {
            match mode {
                Some(m) => cfg.blacklist.words_mut(m).clear(),
                None => {
                    for m in BlacklistMode::ALL {
                        cfg.blacklist.words_mut(m).clear();
                    }
                }
            }
            Ok(())
        })
        .await
    }

    pub async fn set_whitelist_characters(&self, guild_id: u64, characters: &str) -> AdminResult<()> {
        if characters.trim().is_empty() {
            return Err(AdminError::InvalidValue("whitelist cannot be empty".to_string()));
        }
        self.update(guild_id, |cfg| {
            cfg.whitelist.characters = characters.to_string();
            Ok(())
        })
        .await
    }

    pub async fn set_warnings_threshold(&self, guild_id: u64, threshold: u32) -> AdminResult<()> {
        self.set_warnings(guild_id, threshold, None).await.map(|_| ())
    }

    pub async fn set_timeout_duration(&self, guild_id: u64, minutes: u32) -> AdminResult<()> {
        check_timeout(minutes)?;
        self.update(guild_id, |cfg| {
            cfg.warnings.timeout_minutes = minutes;
            Ok(())
        })
        .await
    }

    /// Próg i (opcjonalnie) długość timeoutu jednym zapisem; oba sprawdzane przed zapisem.
    pub async fn set_warnings(
        &self,
        guild_id: u64,
        threshold: u32,
        timeout_minutes: Option<u32>,
    ) -> AdminResult<WarningConfig> {
        check_threshold(threshold)?;
        if let Some(minutes) = timeout_minutes {
            check_timeout(minutes)?;
        }
        self.update(guild_id, |cfg| {
            cfg.warnings.threshold = threshold;
            if let Some(minutes) = timeout_minutes {
                cfg.warnings.timeout_minutes = minutes;
            }
            Ok(cfg.warnings)
        })
        .await
    }

    pub async fn set_antiraid(
        &self,
        guild_id: u64,
        members_limit: u32,
        join_interval_secs: u32,
        punishment: AntiraidPunishment,
    ) -> AdminResult<()> {
        if members_limit < 2 {
            return Err(AdminError::InvalidValue("members limit must be at least 2".to_string()));
        }
        if join_interval_secs == 0 {
            return Err(AdminError::InvalidValue("join interval must be positive".to_string()));
        }
        self.update(guild_id, |cfg| {
            cfg.antiraid.members_limit = members_limit;
            cfg.antiraid.join_interval_secs = join_interval_secs;
            cfg.antiraid.punishment = punishment;
            Ok(())
        })
        .await
    }
}

fn check_threshold(threshold: u32) -> AdminResult<()> {
    if WARNINGS_THRESHOLD_RANGE.contains(&threshold) {
        return Ok(());
    }
    Err(AdminError::InvalidValue(format!(
        "warnings threshold must be between {} and {}",
        WARNINGS_THRESHOLD_RANGE.start(),
        WARNINGS_THRESHOLD_RANGE.end()
    )))
}

fn check_timeout(minutes: u32) -> AdminResult<()> {
    if minutes == 0 || minutes > MAX_TIMEOUT_MINUTES {
        return Err(AdminError::InvalidValue(format!(
            "timeout must be between 1 and {MAX_TIMEOUT_MINUTES} minutes"
        )));
    }
    Ok(())
}
