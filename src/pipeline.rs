// src/pipeline.rs
//! Serce automoderacji: wiadomość → werdykt.
//!
//! Kolejność filtrów: whitelist → antispam → blacklist. Każdy filtr najpierw ocenia
//! pojedynczą wiadomość, a dopiero potem własne okno (osobne okna dla antyspamu i blacklisty).
//! Pipeline nic nie robi na platformie – zwraca [`Verdict`], a wykonuje go warstwa Discorda.

use std::sync::{Arc, Weak};
use std::time::Duration;

use anyhow::Result;
use dashmap::DashMap;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::analyser::analyse_sample;
use crate::antiraid::{AntiraidProcessor, AntiraidVerdict, MemberJoin};
use crate::blacklist::is_blacklisted;
use crate::classifier::{ModelStore, SpamClassifier};
use crate::config::AutomodSettings;
use crate::guild::{FilterGate, GuildAutomod, GuildConfigs};
use crate::nickfilter::{self, NickVerdict, NicknameEvent};
use crate::normalize::normalize;
use crate::training::TrainingDataStore;
use crate::warnings::{WarnKey, WarningEscalator, WarningOutcome};
use crate::whitelist::contains_fonts;
use crate::window::{EvalPolicy, WindowItem, WindowStore};

/* ==============================
   Wejście / wyjście
   ============================== */

/// Nowa albo edytowana wiadomość (edycja = ten sam `message_id`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageEvent {
    pub guild_id: u64,
    pub channel_id: u64,
    pub author_id: u64,
    pub message_id: u64,
    pub role_ids: Vec<u64>,
    pub content: String,
}

/// Wiadomość w oknie / do skasowania.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuedMessage {
    pub message_id: u64,
    pub channel_id: u64,
    pub content: String,
    pub normalized: String,
}

impl QueuedMessage {
    fn from_event(ev: &MessageEvent) -> Self {
        Self {
            message_id: ev.message_id,
            channel_id: ev.channel_id,
            content: ev.content.clone(),
            normalized: normalize(&ev.content),
        }
    }
}

impl WindowItem for QueuedMessage {
    type Id = u64;
    fn id(&self) -> u64 {
        self.message_id
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Violation {
    /// Niedozwolone znaki (przycięte do `max_displayed_chars`).
    Fonts { chars: Vec<String> },
    /// Treść uznana za spam (pojedyncza wiadomość albo sklejone okno, po normalizacji).
    Spam { content: String },
    /// `censored == None` gdy filtr cenzury jest wyłączony.
    Blacklist { censored: Option<String> },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Allowed,
    SingleDelete {
        message: QueuedMessage,
        violation: Violation,
        warnings_left: u32,
    },
    QueueDelete {
        messages: Vec<QueuedMessage>,
        violation: Violation,
        warnings_left: u32,
    },
    /// Próg ostrzeżeń przekroczony: skasuj `deleted` i nałóż timeout.
    Muted {
        duration: Duration,
        deleted: Vec<QueuedMessage>,
        violation: Violation,
    },
}

impl Verdict {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Verdict::Allowed)
    }

    pub fn deleted_messages(&self) -> Vec<&QueuedMessage> {
        match self {
            Verdict::Allowed => Vec::new(),
            Verdict::SingleDelete { message, .. } => vec![message],
            Verdict::QueueDelete { messages, .. } => messages.iter().collect(),
            Verdict::Muted { deleted, .. } => deleted.iter().collect(),
        }
    }

    pub fn violation(&self) -> Option<&Violation> {
        match self {
            Verdict::Allowed => None,
            Verdict::SingleDelete { violation, .. }
            | Verdict::QueueDelete { violation, .. }
            | Verdict::Muted { violation, .. } => Some(violation),
        }
    }
}

/// Raport z jednego przebiegu konserwacji.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MaintenanceReport {
    pub decayed: usize,
    pub pruned_windows: usize,
    pub pruned_gates: usize,
    /// Stan po sprzątaniu.
    pub tracked_warnings: usize,
    pub open_windows: usize,
}

#[derive(Debug, Clone)]
pub struct PipelineOptions {
    pub window_capacity: usize,
    pub max_displayed_chars: usize,
    pub decay_interval: Duration,
    pub window_idle: Duration,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self::from(&AutomodSettings::default())
    }
}

impl From<&AutomodSettings> for PipelineOptions {
    fn from(s: &AutomodSettings) -> Self {
        Self {
            window_capacity: s.window_capacity,
            max_displayed_chars: s.max_displayed_chars,
            decay_interval: Duration::from_secs(s.decay_interval_secs.max(1)),
            window_idle: Duration::from_secs(s.window_idle_secs),
        }
    }
}

/* ==============================
   Pipeline
   ============================== */

enum Deletion {
    Single(QueuedMessage),
    Queue(Vec<QueuedMessage>),
}

impl Deletion {
    fn ids(&self) -> Vec<u64> {
        match self {
            Deletion::Single(m) => vec![m.message_id],
            Deletion::Queue(ms) => ms.iter().map(|m| m.message_id).collect(),
        }
    }

    fn into_messages(self) -> Vec<QueuedMessage> {
        match self {
            Deletion::Single(m) => vec![m],
            Deletion::Queue(ms) => ms,
        }
    }
}

fn join_window(window: &[QueuedMessage]) -> String {
    window
        .iter()
        .map(|m| m.normalized.as_str())
        .collect::<Vec<_>>()
        .join(" ")
}

pub struct ModerationPipeline {
    configs: Arc<GuildConfigs>,
    training: Arc<dyn TrainingDataStore>,
    classifier: SpamClassifier,
    antispam_windows: WindowStore<WarnKey, QueuedMessage>,
    blacklist_windows: WindowStore<WarnKey, QueuedMessage>,
    warnings: WarningEscalator,
    antiraid: AntiraidProcessor,
    // kolejność zdarzeń per (guild, author)
    gates: DashMap<WarnKey, Arc<Mutex<()>>>,
    opts: PipelineOptions,
}

impl ModerationPipeline {
    pub fn new(
        configs: Arc<GuildConfigs>,
        training: Arc<dyn TrainingDataStore>,
        classifier: SpamClassifier,
        opts: PipelineOptions,
    ) -> Self {
        Self {
            configs,
            training,
            classifier,
            antispam_windows: WindowStore::new(opts.window_capacity, EvalPolicy::MoreThanOne),
            blacklist_windows: WindowStore::new(opts.window_capacity, EvalPolicy::MoreThanOne),
            warnings: WarningEscalator::new(),
            antiraid: AntiraidProcessor::new(),
            gates: DashMap::new(),
            opts,
        }
    }

    pub fn configs(&self) -> &GuildConfigs {
        &self.configs
    }

    pub fn training(&self) -> &dyn TrainingDataStore {
        self.training.as_ref()
    }

    pub fn classifier(&self) -> &SpamClassifier {
        &self.classifier
    }

    pub fn warnings(&self) -> &WarningEscalator {
        &self.warnings
    }

    pub fn antispam_window_len(&self, guild_id: u64, author_id: u64) -> usize {
        self.antispam_windows.len(&(guild_id, author_id))
    }

    pub fn blacklist_window_len(&self, guild_id: u64, author_id: u64) -> usize {
        self.blacklist_windows.len(&(guild_id, author_id))
    }

    fn gate(&self, key: WarnKey) -> Arc<Mutex<()>> {
        self.gates.entry(key).or_default().clone()
    }

    /// Nigdy nie zwraca błędu: awaria wewnętrzna → log + `Allowed`.
    pub async fn process_message(&self, ev: &MessageEvent) -> Verdict {
        if ev.content.is_empty() {
            return Verdict::Allowed;
        }

        let gate = self.gate((ev.guild_id, ev.author_id));
        let _serial = gate.lock().await;

        match self.evaluate(ev).await {
            Ok(v) => v,
            Err(e) => {
                warn!(
                    guild_id = ev.guild_id,
                    author_id = ev.author_id,
                    message_id = ev.message_id,
                    error=?e,
                    "automod processing failed – message left unmoderated"
                );
                Verdict::Allowed
            }
        }
    }

    async fn evaluate(&self, ev: &MessageEvent) -> Result<Verdict> {
        let cfg = self.configs.get(ev.guild_id).await?;
        let key = (ev.guild_id, ev.author_id);
        let msg = QueuedMessage::from_event(ev);

        // 1) whitelist
        if cfg.whitelist.applies(ev.channel_id, &ev.role_ids) {
            let check = contains_fonts(&cfg.whitelist.characters, &ev.content);
            if check.violated {
                let chars = check
                    .offending
                    .into_iter()
                    .take(self.opts.max_displayed_chars)
                    .collect();
                let sample = msg.normalized.clone();
                return self
                    .punish(ev, &cfg, Deletion::Single(msg), Violation::Fonts { chars }, &sample)
                    .await;
            }
        }

        // 2) antispam
        if cfg.antispam.applies(ev.channel_id, &ev.role_ids) {
            if self.classifier.is_spam(&msg.normalized) {
                let content = msg.normalized.clone();
                return self
                    .punish(ev, &cfg, Deletion::Single(msg), Violation::Spam { content: content.clone() }, &content)
                    .await;
            }
            if let Some(window) = self.antispam_windows.push(key, msg.clone()) {
                let joined = join_window(&window);
                if self.classifier.is_spam(&joined) {
                    self.antispam_windows.clear(&key);
                    return self
                        .punish(ev, &cfg, Deletion::Queue(window), Violation::Spam { content: joined.clone() }, &joined)
                        .await;
                }
            }
        }

        // 3) blacklist
        if cfg.blacklist.applies(ev.channel_id, &ev.role_ids) {
            let single = is_blacklisted(&cfg.blacklist, &msg.normalized);
            if single.hit {
                let sample = msg.normalized.clone();
                return self
                    .punish(ev, &cfg, Deletion::Single(msg), Violation::Blacklist { censored: single.censored }, &sample)
                    .await;
            }
            if let Some(window) = self.blacklist_windows.push(key, msg) {
                let joined = join_window(&window);
                let m = is_blacklisted(&cfg.blacklist, &joined);
                if m.hit {
                    self.blacklist_windows.clear(&key);
                    return self
                        .punish(ev, &cfg, Deletion::Queue(window), Violation::Blacklist { censored: m.censored }, &joined)
                        .await;
                }
            }
        }

        Ok(Verdict::Allowed)
    }

    async fn punish(
        &self,
        ev: &MessageEvent,
        cfg: &GuildAutomod,
        deletion: Deletion,
        violation: Violation,
        sample: &str,
    ) -> Result<Verdict> {
        let key = (ev.guild_id, ev.author_id);

        // skasowane wiadomości nie mogą wrócić w drugim oknie
        let ids = deletion.ids();
        self.antispam_windows.remove_ids(&key, &ids);
        self.blacklist_windows.remove_ids(&key, &ids);

        if let Err(e) = self.training.register(sample, analyse_sample(sample)).await {
            warn!(guild_id = ev.guild_id, message_id = ev.message_id, error=?e, "training sample not registered");
        }

        let outcome = self.warnings.add_warning(key, cfg.warnings.threshold);
        info!(
            guild_id = ev.guild_id,
            author_id = ev.author_id,
            message_id = ev.message_id,
            deleted = ids.len(),
            ?violation,
            ?outcome,
            "automod violation"
        );

        Ok(match (outcome, deletion) {
            (WarningOutcome::Muted, deletion) => Verdict::Muted {
                duration: Duration::from_secs(u64::from(cfg.warnings.timeout_minutes) * 60),
                deleted: deletion.into_messages(),
                violation,
            },
            (WarningOutcome::Remaining(left), Deletion::Single(message)) => Verdict::SingleDelete {
                message,
                violation,
                warnings_left: left,
            },
            (WarningOutcome::Remaining(left), Deletion::Queue(messages)) => Verdict::QueueDelete {
                messages,
                violation,
                warnings_left: left,
            },
        })
    }

    /// Skasowana wiadomość znika z okien. Bez autora → szukamy we wszystkich oknach gildii.
    pub fn on_message_delete(&self, guild_id: u64, author_id: Option<u64>, message_id: u64) {
        let removed = match author_id {
            Some(author) => {
                let key = (guild_id, author);
                self.antispam_windows.remove_ids(&key, &[message_id])
                    + self.blacklist_windows.remove_ids(&key, &[message_id])
            }
            None => {
                self.antispam_windows.remove_id_where(&message_id, |k| k.0 == guild_id)
                    + self.blacklist_windows.remove_id_where(&message_id, |k| k.0 == guild_id)
            }
        };
        if removed > 0 {
            debug!(guild_id, message_id, "deleted message dropped from windows");
        }
    }

    pub async fn process_member_join(&self, join: &MemberJoin) -> AntiraidVerdict {
        match self.configs.antiraid(join.guild_id).await {
            Ok(cfg) => self.antiraid.process(&cfg, join),
            Err(e) => {
                warn!(guild_id = join.guild_id, member_id = join.member_id, error=?e, "antiraid config unavailable");
                AntiraidVerdict::Allowed
            }
        }
    }

    pub async fn check_nickname(&self, ev: &NicknameEvent) -> NickVerdict {
        match self.configs.get(ev.guild_id).await {
            Ok(cfg) => nickfilter::check_nickname(&cfg.nickfilter, &cfg.blacklist, ev),
            Err(e) => {
                warn!(guild_id = ev.guild_id, member_id = ev.member_id, error=?e, "nickfilter config unavailable");
                NickVerdict::Allowed
            }
        }
    }

    /// Przeładowanie modelu bez restartu. Błąd → zostaje stary model.
    pub async fn reload_model(&self, store: &dyn ModelStore) -> Result<()> {
        match self.classifier.reload(store).await {
            Ok(()) => {
                info!("spam model reloaded");
                Ok(())
            }
            Err(e) => {
                warn!(error=?e, "spam model reload failed – keeping previous model");
                Err(e)
            }
        }
    }

    /// Wygaszanie ostrzeżeń i sprzątanie nieużywanych okien.
    pub fn run_maintenance(&self) -> MaintenanceReport {
        let decayed = self.warnings.decay_tick();
        let idle = self.opts.window_idle;
        let pruned_windows = self.antispam_windows.prune_idle(idle)
            + self.blacklist_windows.prune_idle(idle)
            + self.antiraid.prune_idle(idle);

        // bramka trzymana tylko przez mapę = nikt jej teraz nie używa
        let before = self.gates.len();
        self.gates.retain(|_, g| Arc::strong_count(g) > 1);
        let pruned_gates = before.saturating_sub(self.gates.len());

        let report = MaintenanceReport {
            decayed,
            pruned_windows,
            pruned_gates,
            tracked_warnings: self.warnings.tracked(),
            open_windows: self.antispam_windows.keys_count()
                + self.blacklist_windows.keys_count()
                + self.antiraid.tracked_guilds(),
        };
        debug!(?report, "automod maintenance");
        report
    }

    pub fn spawn_maintenance(this: &Arc<Self>) -> JoinHandle<()> {
        let weak: Weak<Self> = Arc::downgrade(this);
        let period = this.opts.decay_interval;
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            // pierwszy tick jest natychmiastowy
            interval.tick().await;
            loop {
                interval.tick().await;
                if let Some(strong) = weak.upgrade() {
                    strong.run_maintenance();
                } else {
                    break;
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyser::FeatureVector;
    use crate::guild::{BlacklistMode, FilterKind};
    use crate::training::MemoryTrainingStore;

    fn pipeline(predicate: fn(&FeatureVector) -> bool) -> ModerationPipeline {
        ModerationPipeline::new(
            Arc::new(GuildConfigs::in_memory()),
            Arc::new(MemoryTrainingStore::new()),
            SpamClassifier::with_predicate(Arc::new(predicate)),
            PipelineOptions::default(),
        )
    }

    fn msg(id: u64, content: &str) -> MessageEvent {
        MessageEvent {
            guild_id: 1,
            channel_id: 10,
            author_id: 100,
            message_id: id,
            role_ids: vec![],
            content: content.to_string(),
        }
    }

    #[tokio::test]
    async fn empty_content_is_allowed() {
        let p = pipeline(|_| true);
        p.configs().set_enabled(1, FilterKind::Antispam, true).await.unwrap();
        assert!(p.process_message(&msg(1, "")).await.is_allowed());
    }

    #[tokio::test]
    async fn whitelist_runs_first() {
        let p = pipeline(|_| true);
        p.configs().set_enabled(1, FilterKind::Whitelist, true).await.unwrap();
        p.configs().set_enabled(1, FilterKind::Antispam, true).await.unwrap();

        let v = p.process_message(&msg(1, "𝓱𝓲")).await;
        assert!(matches!(
            v,
            Verdict::SingleDelete { violation: Violation::Fonts { .. }, warnings_left: 2, .. }
        ));
    }

    #[tokio::test]
    async fn fonts_list_is_truncated() {
        let p = pipeline(|_| false);
        p.configs().set_enabled(1, FilterKind::Whitelist, true).await.unwrap();
        let fancy: String = ('\u{1D4D0}'..='\u{1D4E9}').collect();
        let v = p.process_message(&msg(1, &fancy)).await;
        let Some(Violation::Fonts { chars }) = v.violation() else {
            panic!("expected fonts violation");
        };
        assert_eq!(chars.len(), 10);
    }

    #[tokio::test]
    async fn ignored_channel_skips_filters() {
        let p = pipeline(|_| true);
        p.configs().set_enabled(1, FilterKind::Antispam, true).await.unwrap();
        p.configs().add_ignored(1, FilterKind::Antispam, 10).await.unwrap();
        assert!(p.process_message(&msg(1, "whatever")).await.is_allowed());
    }

    #[tokio::test]
    async fn deleted_single_message_leaves_other_window() {
        let p = pipeline(|_| false);
        p.configs().set_enabled(1, FilterKind::Antispam, true).await.unwrap();
        p.configs().set_enabled(1, FilterKind::Blacklist, true).await.unwrap();
        p.configs().add_blacklist_word(1, BlacklistMode::Common, "spam").await.unwrap();

        assert!(p.process_message(&msg(1, "hello")).await.is_allowed());
        assert_eq!(p.antispam_window_len(1, 100), 1);

        let v = p.process_message(&msg(2, "spam")).await;
        assert!(matches!(v, Verdict::SingleDelete { .. }));
        // "spam" trafiło do okna antyspamu przed blacklistą, ale po skasowaniu znika
        assert_eq!(p.antispam_window_len(1, 100), 1);
    }

    #[tokio::test]
    async fn message_delete_event_drops_from_windows() {
        let p = pipeline(|_| false);
        p.configs().set_enabled(1, FilterKind::Antispam, true).await.unwrap();
        p.process_message(&msg(1, "a")).await;
        p.process_message(&msg(2, "b")).await;
        assert_eq!(p.antispam_window_len(1, 100), 2);

        p.on_message_delete(1, Some(100), 1);
        assert_eq!(p.antispam_window_len(1, 100), 1);
        p.on_message_delete(1, None, 2);
        assert_eq!(p.antispam_window_len(1, 100), 0);
    }

    #[tokio::test]
    async fn threshold_crossing_mutes() {
        let p = pipeline(|_| true);
        p.configs().set_enabled(1, FilterKind::Antispam, true).await.unwrap();
        p.configs().set_warnings_threshold(1, 1).await.unwrap();
        p.configs().set_timeout_duration(1, 15).await.unwrap();

        assert!(matches!(
            p.process_message(&msg(1, "x")).await,
            Verdict::SingleDelete { warnings_left: 0, .. }
        ));
        match p.process_message(&msg(2, "y")).await {
            Verdict::Muted { duration, deleted, .. } => {
                assert_eq!(duration, Duration::from_secs(15 * 60));
                assert_eq!(deleted.len(), 1);
            }
            other => panic!("expected mute, got {other:?}"),
        }
        assert_eq!(p.warnings().count((1, 100)), 0);
    }

    #[tokio::test]
    async fn maintenance_decays_and_prunes() {
        let p = pipeline(|_| true);
        p.configs().set_enabled(1, FilterKind::Antispam, true).await.unwrap();
        p.process_message(&msg(1, "x")).await;
        assert_eq!(p.warnings().count((1, 100)), 1);

        let report = p.run_maintenance();
        assert_eq!(report.decayed, 1);
        assert_eq!(report.pruned_gates, 1);
        assert_eq!(report.tracked_warnings, 0);
        // ukarana przed dodaniem do okna
        assert_eq!(report.open_windows, 0);
        assert_eq!(p.warnings().count((1, 100)), 0);
    }
}
