use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use anyhow::{Result, anyhow};
use chrono::{TimeZone, Utc};
use serenity::async_trait;
use tigris_automod::analyser::FeatureVector;
use tigris_automod::antiraid::{AntiraidVerdict, MemberJoin, RaidAction};
use tigris_automod::classifier::{FileModelStore, SpamClassifier};
use tigris_automod::guild::{
    AntiraidPunishment, BlacklistMode, FilterKind, GuildAutomod, GuildConfigStore, GuildConfigs,
};
use tigris_automod::nickfilter::{NickVerdict, NicknameEvent};
use tigris_automod::pipeline::{MessageEvent, ModerationPipeline, PipelineOptions, Verdict, Violation};
use tigris_automod::training::{
    MemoryTrainingStore, TrainingCounts, TrainingDataStore, TrainingSample,
};

const GUILD: u64 = 1;
const CHANNEL: u64 = 10;
const AUTHOR: u64 = 100;

fn long_is_spam(f: &FeatureVector) -> bool {
    f.total_chars > 50
}

fn never_spam(_: &FeatureVector) -> bool {
    false
}

fn setup(predicate: Option<fn(&FeatureVector) -> bool>) -> (ModerationPipeline, Arc<MemoryTrainingStore>) {
    let training = Arc::new(MemoryTrainingStore::new());
    let classifier = match predicate {
        Some(p) => SpamClassifier::with_predicate(Arc::new(p)),
        None => SpamClassifier::new(),
    };
    let pipeline = ModerationPipeline::new(
        Arc::new(GuildConfigs::in_memory()),
        training.clone(),
        classifier,
        PipelineOptions::default(),
    );
    (pipeline, training)
}

fn message(id: u64, content: &str) -> MessageEvent {
    MessageEvent {
        guild_id: GUILD,
        channel_id: CHANNEL,
        author_id: AUTHOR,
        message_id: id,
        role_ids: vec![],
        content: content.to_string(),
    }
}

#[tokio::test]
async fn blacklisted_word_is_censored_and_warned() {
    let (p, training) = setup(None);
    p.configs().set_enabled(GUILD, FilterKind::Blacklist, true).await.unwrap();
    p.configs()
        .add_blacklist_word(GUILD, BlacklistMode::Common, "spam")
        .await
        .unwrap();

    match p.process_message(&message(1, "this is not spam at all")).await {
        Verdict::SingleDelete { message, violation, warnings_left } => {
            assert_eq!(message.message_id, 1);
            assert_eq!(
                violation,
                Violation::Blacklist { censored: Some("this is not #### at all".to_string()) }
            );
            assert_eq!(warnings_left, 2);
        }
        other => panic!("expected single delete, got {other:?}"),
    }

    let samples = training.samples();
    assert_eq!(samples.len(), 1);
    assert_eq!(samples[0].content, "this is not spam at all");
    assert_eq!(samples[0].is_spam, None);
}

#[tokio::test]
async fn censoring_can_be_switched_off() {
    let (p, _) = setup(None);
    p.configs().set_enabled(GUILD, FilterKind::Blacklist, true).await.unwrap();
    p.configs().set_blacklist_filter(GUILD, false).await.unwrap();
    p.configs()
        .add_blacklist_word(GUILD, BlacklistMode::Wild, "frick")
        .await
        .unwrap();

    let v = p.process_message(&message(1, "what the fr1ck")).await;
    assert_eq!(v.violation(), Some(&Violation::Blacklist { censored: None }));
}

#[tokio::test]
async fn long_message_is_spam_on_its_own() {
    let (p, _) = setup(Some(long_is_spam));
    p.configs().set_enabled(GUILD, FilterKind::Antispam, true).await.unwrap();

    let text = "buy cheap coins ".repeat(5);
    match p.process_message(&message(1, &text)).await {
        Verdict::SingleDelete { violation: Violation::Spam { .. }, warnings_left: 2, .. } => {}
        other => panic!("expected spam single delete, got {other:?}"),
    }
    assert_eq!(p.antispam_window_len(GUILD, AUTHOR), 0);
}

#[tokio::test]
async fn short_messages_add_up_to_spam() {
    let (p, _) = setup(Some(long_is_spam));
    p.configs().set_enabled(GUILD, FilterKind::Antispam, true).await.unwrap();

    // 20 znaków na wiadomość: dopiero trzy razem przekraczają 50
    let part = "aaaaaaaaaa bbbbbbbbbb";
    assert!(p.process_message(&message(1, part)).await.is_allowed());
    assert!(p.process_message(&message(2, part)).await.is_allowed());
    assert_eq!(p.antispam_window_len(GUILD, AUTHOR), 2);

    match p.process_message(&message(3, part)).await {
        Verdict::QueueDelete { messages, violation: Violation::Spam { content }, warnings_left } => {
            let ids: Vec<u64> = messages.iter().map(|m| m.message_id).collect();
            assert_eq!(ids, vec![1, 2, 3]);
            assert_eq!(content, [part, part, part].join(" "));
            assert_eq!(warnings_left, 2);
        }
        other => panic!("expected queue delete, got {other:?}"),
    }
    assert_eq!(p.antispam_window_len(GUILD, AUTHOR), 0);

    // świeże okno po naruszeniu
    assert!(p.process_message(&message(4, part)).await.is_allowed());
    assert_eq!(p.antispam_window_len(GUILD, AUTHOR), 1);
}

#[tokio::test]
async fn window_keeps_only_latest_messages() {
    let (p, _) = setup(Some(never_spam));
    p.configs().set_enabled(GUILD, FilterKind::Antispam, true).await.unwrap();

    for id in 1..=15 {
        p.process_message(&message(id, "hi")).await;
    }
    assert_eq!(
        p.antispam_window_len(GUILD, AUTHOR),
        PipelineOptions::default().window_capacity
    );
}

#[tokio::test]
async fn edit_replaces_message_in_window() {
    let (p, _) = setup(Some(never_spam));
    p.configs().set_enabled(GUILD, FilterKind::Antispam, true).await.unwrap();

    p.process_message(&message(1, "first")).await;
    p.process_message(&message(1, "first, edited")).await;
    assert_eq!(p.antispam_window_len(GUILD, AUTHOR), 1);
}

#[tokio::test]
async fn blacklist_phrase_split_across_messages() {
    let (p, _) = setup(None);
    p.configs().set_enabled(GUILD, FilterKind::Blacklist, true).await.unwrap();
    p.configs()
        .add_blacklist_word(GUILD, BlacklistMode::Super, "free nitro")
        .await
        .unwrap();

    assert!(p.process_message(&message(1, "get your fr")).await.is_allowed());
    match p.process_message(&message(2, "ee nitro here")).await {
        Verdict::QueueDelete { messages, violation: Violation::Blacklist { censored: Some(_) }, .. } => {
            assert_eq!(messages.len(), 2);
        }
        other => panic!("expected queue delete, got {other:?}"),
    }
    assert_eq!(p.blacklist_window_len(GUILD, AUTHOR), 0);
}

#[tokio::test]
async fn warnings_escalate_to_mute_and_reset() {
    let (p, _) = setup(None);
    p.configs().set_enabled(GUILD, FilterKind::Whitelist, true).await.unwrap();

    let mut left = Vec::new();
    for id in 1..=3 {
        match p.process_message(&message(id, "𝓱𝓮𝔂")).await {
            Verdict::SingleDelete { warnings_left, .. } => left.push(warnings_left),
            other => panic!("expected single delete, got {other:?}"),
        }
    }
    assert_eq!(left, vec![2, 1, 0]);

    match p.process_message(&message(4, "𝓱𝓮𝔂")).await {
        Verdict::Muted { duration, deleted, violation: Violation::Fonts { chars } } => {
            assert_eq!(duration, Duration::from_secs(10 * 60));
            assert_eq!(deleted.len(), 1);
            assert!(!chars.is_empty());
        }
        other => panic!("expected mute, got {other:?}"),
    }

    assert!(matches!(
        p.process_message(&message(5, "𝓱𝓮𝔂")).await,
        Verdict::SingleDelete { warnings_left: 2, .. }
    ));
}

#[tokio::test]
async fn plain_text_passes_every_filter() {
    let (p, training) = setup(Some(long_is_spam));
    for kind in [FilterKind::Antispam, FilterKind::Blacklist, FilterKind::Whitelist] {
        p.configs().set_enabled(GUILD, kind, true).await.unwrap();
    }
    p.configs()
        .add_blacklist_word(GUILD, BlacklistMode::Common, "spam")
        .await
        .unwrap();

    assert!(p.process_message(&message(1, "Cześć, co słychać?")).await.is_allowed());
    assert!(p.process_message(&message(2, "all good here")).await.is_allowed());
    assert_eq!(training.counts().await.unwrap().total, 0);
}

#[tokio::test]
async fn ignored_role_bypasses_blacklist() {
    let (p, _) = setup(None);
    p.configs().set_enabled(GUILD, FilterKind::Blacklist, true).await.unwrap();
    p.configs().add_ignored(GUILD, FilterKind::Blacklist, 777).await.unwrap();
    p.configs()
        .add_blacklist_word(GUILD, BlacklistMode::Common, "spam")
        .await
        .unwrap();

    let mut ev = message(1, "spam");
    ev.role_ids = vec![777];
    assert!(p.process_message(&ev).await.is_allowed());

    ev.role_ids = vec![];
    ev.message_id = 2;
    assert!(!p.process_message(&ev).await.is_allowed());
}

#[tokio::test]
async fn removing_a_word_stops_matching() {
    let (p, _) = setup(None);
    p.configs().set_enabled(GUILD, FilterKind::Blacklist, true).await.unwrap();
    p.configs()
        .add_blacklist_word(GUILD, BlacklistMode::Common, "eggs")
        .await
        .unwrap();
    assert!(!p.process_message(&message(1, "green eggs")).await.is_allowed());

    p.configs()
        .remove_blacklist_word(GUILD, BlacklistMode::Common, "eggs")
        .await
        .unwrap();
    assert!(p.process_message(&message(2, "green eggs")).await.is_allowed());
}

#[tokio::test]
async fn raid_is_punished_through_pipeline() {
    let (p, _) = setup(None);
    p.configs().set_enabled(GUILD, FilterKind::Antiraid, true).await.unwrap();
    p.configs()
        .set_antiraid(GUILD, 3, 10, AntiraidPunishment::Ban)
        .await
        .unwrap();

    let join = |member_id: u64, secs: i64| MemberJoin {
        guild_id: GUILD,
        member_id,
        joined_at: Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap(),
    };

    assert_eq!(p.process_member_join(&join(1, 0)).await, AntiraidVerdict::Allowed);
    assert_eq!(p.process_member_join(&join(2, 2)).await, AntiraidVerdict::Allowed);
    match p.process_member_join(&join(3, 4)).await {
        AntiraidVerdict::Punish { members, punishment } => {
            assert_eq!(punishment, AntiraidPunishment::Ban);
            let ids: Vec<u64> = members.iter().map(|m| m.member_id).collect();
            assert_eq!(ids, vec![1, 2, 3]);
            assert!(members.iter().all(|m| m.action == RaidAction::Ban));
        }
        other => panic!("expected punishment, got {other:?}"),
    }
}

#[tokio::test]
async fn slow_joins_are_not_a_raid() {
    let (p, _) = setup(None);
    p.configs().set_enabled(GUILD, FilterKind::Antiraid, true).await.unwrap();
    p.configs()
        .set_antiraid(GUILD, 2, 10, AntiraidPunishment::Kick)
        .await
        .unwrap();

    for (i, secs) in [0i64, 30, 60, 90].into_iter().enumerate() {
        let join = MemberJoin {
            guild_id: GUILD,
            member_id: i as u64 + 1,
            joined_at: Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap(),
        };
        assert_eq!(p.process_member_join(&join).await, AntiraidVerdict::Allowed);
    }
}

#[tokio::test]
async fn nickname_uses_guild_blacklist() {
    let (p, _) = setup(None);
    p.configs().set_enabled(GUILD, FilterKind::Nickfilter, true).await.unwrap();
    p.configs()
        .add_blacklist_word(GUILD, BlacklistMode::Wild, "admin")
        .await
        .unwrap();

    let ev = NicknameEvent {
        guild_id: GUILD,
        member_id: 5,
        display_name: "Real@dmin".to_string(),
        role_ids: vec![],
    };
    assert!(matches!(p.check_nickname(&ev).await, NickVerdict::Rename { .. }));
}

#[tokio::test]
async fn model_reload_enables_antispam() {
    let (p, _) = setup(None);
    p.configs().set_enabled(GUILD, FilterKind::Antispam, true).await.unwrap();

    let text = "buy cheap coins ".repeat(5);
    assert!(p.process_message(&message(1, &text)).await.is_allowed());

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("antispam.json");
    std::fs::write(
        &path,
        r#"{"trees":[{"feature":0,"threshold":50.0,"left":{"leaf":false},"right":{"leaf":true}}]}"#,
    )
    .unwrap();

    p.reload_model(&FileModelStore::new(&path)).await.unwrap();
    assert!(p.classifier().is_loaded());
    assert!(!p.process_message(&message(2, &text)).await.is_allowed());

    // zepsuty plik – zostaje poprzedni model
    std::fs::write(&path, b"{not json").unwrap();
    assert!(p.reload_model(&FileModelStore::new(&path)).await.is_err());
    assert!(p.classifier().is_loaded());
}

/* ---------------- awarie store'ów ---------------- */

struct BrokenConfigStore;

#[async_trait]
impl GuildConfigStore for BrokenConfigStore {
    async fn load(&self, _guild_id: u64) -> Result<Option<GuildAutomod>> {
        Err(anyhow!("connection refused"))
    }

    async fn save(&self, _guild_id: u64, _cfg: &GuildAutomod) -> Result<()> {
        Err(anyhow!("connection refused"))
    }
}

/// `register` nie działa albo działa wolno; liczy równoległe wywołania.
#[derive(Default)]
struct FlakyTraining {
    fail: bool,
    delay: Duration,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    calls: AtomicUsize,
}

#[async_trait]
impl TrainingDataStore for FlakyTraining {
    async fn register(&self, _content: &str, _features: FeatureVector) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        if self.fail {
            return Err(anyhow!("training table missing"));
        }
        Ok(())
    }

    async fn label(&self, _content: &str, _features: FeatureVector, _is_spam: bool) -> Result<u64> {
        Ok(0)
    }

    async fn next_unlabeled(&self) -> Result<Option<TrainingSample>> {
        Ok(None)
    }

    async fn counts(&self) -> Result<TrainingCounts> {
        Ok(TrainingCounts::default())
    }
}

async fn blacklisting(training: Arc<FlakyTraining>) -> ModerationPipeline {
    let p = ModerationPipeline::new(
        Arc::new(GuildConfigs::in_memory()),
        training,
        SpamClassifier::new(),
        PipelineOptions::default(),
    );
    p.configs().set_enabled(GUILD, FilterKind::Blacklist, true).await.unwrap();
    p.configs()
        .add_blacklist_word(GUILD, BlacklistMode::Common, "scam")
        .await
        .unwrap();
    p
}

#[tokio::test]
async fn unreadable_config_lets_messages_through() {
    let p = ModerationPipeline::new(
        Arc::new(GuildConfigs::new(Arc::new(BrokenConfigStore))),
        Arc::new(MemoryTrainingStore::new()),
        SpamClassifier::with_predicate(Arc::new(long_is_spam)),
        PipelineOptions::default(),
    );
    let long = "x".repeat(80);
    assert_eq!(p.process_message(&message(1, &long)).await, Verdict::Allowed);
    assert_eq!(p.warnings().count((GUILD, AUTHOR)), 0);

    let join = MemberJoin {
        guild_id: GUILD,
        member_id: 5,
        joined_at: Utc::now(),
    };
    assert_eq!(p.process_member_join(&join).await, AntiraidVerdict::Allowed);
}

#[tokio::test]
async fn missing_model_never_flags_spam() {
    let (p, training) = setup(None);
    p.configs().set_enabled(GUILD, FilterKind::Antispam, true).await.unwrap();
    let long = "free nitro ".repeat(20);
    assert!(p.process_message(&message(1, &long)).await.is_allowed());
    assert!(p.process_message(&message(2, &long)).await.is_allowed());
    assert!(training.samples().is_empty());
}

#[tokio::test]
async fn training_failure_does_not_stop_punishment() {
    let training = Arc::new(FlakyTraining {
        fail: true,
        ..FlakyTraining::default()
    });
    let p = blacklisting(training.clone()).await;

    let v = p.process_message(&message(1, "total scam")).await;
    assert!(matches!(v, Verdict::SingleDelete { warnings_left: 2, .. }), "got {v:?}");
    assert_eq!(training.calls.load(Ordering::SeqCst), 1);
    assert_eq!(p.warnings().count((GUILD, AUTHOR)), 1);
}

#[tokio::test]
async fn same_author_is_processed_one_message_at_a_time() {
    let training = Arc::new(FlakyTraining {
        delay: Duration::from_millis(30),
        ..FlakyTraining::default()
    });
    let p = blacklisting(training.clone()).await;

    let (a, b) = (message(1, "scam one"), message(2, "scam two"));
    let (va, vb) = tokio::join!(p.process_message(&a), p.process_message(&b));

    assert_eq!(training.max_in_flight.load(Ordering::SeqCst), 1);
    let mut left: Vec<u32> = [va, vb]
        .iter()
        .map(|v| match v {
            Verdict::SingleDelete { warnings_left, .. } => *warnings_left,
            other => panic!("expected single delete, got {other:?}"),
        })
        .collect();
    left.sort_unstable();
    assert_eq!(left, vec![1, 2]);
}
