// src/modlog.rs
//! Dziennik moderacji gildii: co automod zrobił, wysyłane na kanał logów.
//!
//! Wpis ([`ActionLog`]) powstaje z werdyktu pipeline'u albo z kary antiraid,
//! [`LogCooldown`] tłumi powtórki, a [`ActionLog::card`] daje treść embeda bez Discorda.

use std::time::{Duration, Instant};

use dashmap::DashMap;

use crate::antiraid::RaidAction;
use crate::pipeline::{QueuedMessage, Verdict, Violation};

/// Ten sam cel + ta sama akcja w tym czasie → jeden wpis.
pub const LOG_COOLDOWN: Duration = Duration::from_secs(3);

const BLOCKED_CONTENT_LIMIT: usize = 600;
const QUEUED_CONTENT_LIMIT: usize = 200;
const FIELD_LIMIT: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActionKind {
    SingleDeletion,
    QueueDeletion,
    BlacklistDeletion,
    Antispam,
    Timeout,
    NickChange,
    AntiraidBan,
    AntiraidKick,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionLog {
    /// Niedozwolone znaki.
    SingleDeletion { target: u64, channel_id: u64, content: String },
    QueueDeletion { target: u64, channel_id: u64, messages: Vec<String> },
    BlacklistDeletion {
        target: u64,
        channel_id: u64,
        content: String,
        censored: Option<String>,
    },
    Antispam { target: u64, channel_id: u64, content: String },
    Timeout { target: u64, minutes: u64, antiraid: bool },
    NickChange { target: u64, old: String, new: String },
    AntiraidBan { target: u64 },
    AntiraidKick { target: u64 },
}

fn deletion_entry(target: u64, deleted: &[QueuedMessage], violation: &Violation) -> Option<ActionLog> {
    let (first, rest) = deleted.split_first()?;
    if !rest.is_empty() {
        return Some(ActionLog::QueueDeletion {
            target,
            channel_id: first.channel_id,
            messages: deleted.iter().map(|m| m.content.clone()).collect(),
        });
    }

    let channel_id = first.channel_id;
    let content = first.content.clone();
    Some(match violation {
        Violation::Fonts { .. } => ActionLog::SingleDeletion { target, channel_id, content },
        Violation::Spam { .. } => ActionLog::Antispam { target, channel_id, content },
        Violation::Blacklist { censored } => ActionLog::BlacklistDeletion {
            target,
            channel_id,
            content,
            censored: censored.clone(),
        },
    })
}

impl ActionLog {
    /// Wpisy dla werdyktu wiadomości; `Muted` daje wpis kasowania i wpis timeoutu.
    pub fn from_verdict(author_id: u64, verdict: &Verdict) -> Vec<ActionLog> {
        match verdict {
            Verdict::Allowed => Vec::new(),
            Verdict::SingleDelete { message, violation, .. } => {
                deletion_entry(author_id, std::slice::from_ref(message), violation)
                    .into_iter()
                    .collect()
            }
            Verdict::QueueDelete { messages, violation, .. } => {
                deletion_entry(author_id, messages, violation).into_iter().collect()
            }
            Verdict::Muted { duration, deleted, violation } => {
                let mut out: Vec<ActionLog> = deletion_entry(author_id, deleted, violation).into_iter().collect();
                out.push(ActionLog::Timeout {
                    target: author_id,
                    minutes: duration.as_secs() / 60,
                    antiraid: false,
                });
                out
            }
        }
    }

    pub fn from_raid(member_id: u64, action: RaidAction) -> ActionLog {
        match action {
            RaidAction::Ban => ActionLog::AntiraidBan { target: member_id },
            RaidAction::Kick => ActionLog::AntiraidKick { target: member_id },
            RaidAction::Timeout { minutes } => ActionLog::Timeout {
                target: member_id,
                minutes: u64::from(minutes),
                antiraid: true,
            },
        }
    }

    pub fn kind(&self) -> ActionKind {
        match self {
            ActionLog::SingleDeletion { .. } => ActionKind::SingleDeletion,
            ActionLog::QueueDeletion { .. } => ActionKind::QueueDeletion,
            ActionLog::BlacklistDeletion { .. } => ActionKind::BlacklistDeletion,
            ActionLog::Antispam { .. } => ActionKind::Antispam,
            ActionLog::Timeout { .. } => ActionKind::Timeout,
            ActionLog::NickChange { .. } => ActionKind::NickChange,
            ActionLog::AntiraidBan { .. } => ActionKind::AntiraidBan,
            ActionLog::AntiraidKick { .. } => ActionKind::AntiraidKick,
        }
    }

    pub fn target(&self) -> u64 {
        match self {
            ActionLog::SingleDeletion { target, .. }
            | ActionLog::QueueDeletion { target, .. }
            | ActionLog::BlacklistDeletion { target, .. }
            | ActionLog::Antispam { target, .. }
            | ActionLog::Timeout { target, .. }
            | ActionLog::NickChange { target, .. }
            | ActionLog::AntiraidBan { target }
            | ActionLog::AntiraidKick { target } => *target,
        }
    }

    pub fn card(&self) -> LogCard {
        let target = self.target();
        let mut card = LogCard::new(self.kind(), target);

        match self {
            ActionLog::SingleDeletion { channel_id, content, .. }
            | ActionLog::Antispam { channel_id, content, .. } => {
                card.description = format!("A message was deleted from <#{channel_id}>.");
                card.field("Blocked Content", code_block(content), false);
            }
            ActionLog::BlacklistDeletion { channel_id, content, censored, .. } => {
                card.description = format!(
                    "A message was deleted from <#{channel_id}> because it contained blacklisted expressions."
                );
                card.field("Blocked Content", code_block(content), false);
                if let Some(censored) = censored {
                    card.field("Filtered", clip(censored, BLOCKED_CONTENT_LIMIT), true);
                }
            }
            ActionLog::QueueDeletion { channel_id, messages, .. } => {
                card.description = format!("{} messages were deleted from <#{channel_id}>.", messages.len());
                let listed = messages
                    .iter()
                    .map(|m| format!("[<@{target}>]: {}", clip(m, QUEUED_CONTENT_LIMIT)))
                    .collect::<Vec<_>>()
                    .join("\n");
                card.field("Deleted Messages", listed, false);
            }
            ActionLog::Timeout { minutes, antiraid, .. } => {
                card.description = if *antiraid {
                    "A member was timed out due to suspect of raid.".to_string()
                } else {
                    "A member was timed out.".to_string()
                };
                card.field("Duration", format!("{minutes} minutes"), false);
            }
            ActionLog::NickChange { old, new, .. } => {
                card.description = "A nickname was considered inappropriate.".to_string();
                card.field("Old Nickname", old.clone(), false);
                card.field("New Nickname", new.clone(), false);
            }
            ActionLog::AntiraidBan { .. } | ActionLog::AntiraidKick { .. } => {
                card.description = "Member was suspected to be a raider.".to_string();
            }
        }
        card
    }
}

/* ==============================
   Treść embeda
   ============================== */

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogField {
    pub name: &'static str,
    pub value: String,
    pub inline: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogCard {
    pub title: &'static str,
    pub description: String,
    pub colour: u32,
    pub fields: Vec<LogField>,
}

impl LogCard {
    fn new(kind: ActionKind, target: u64) -> Self {
        let (title, colour) = match kind {
            ActionKind::SingleDeletion
            | ActionKind::QueueDeletion
            | ActionKind::BlacklistDeletion
            | ActionKind::Antispam => ("✅ Action Logging", 0x3498DB),
            ActionKind::Timeout => ("✅ Member Timeout", 0xF1C40F),
            ActionKind::NickChange => ("✅ Nick Blocked", 0x9B59B6),
            ActionKind::AntiraidBan => ("❗ Member Banned", 0xE74C3C),
            ActionKind::AntiraidKick => ("⚠️ Member Kicked", 0xE67E22),
        };
        let mut card = Self {
            title,
            description: String::new(),
            colour,
            fields: Vec::new(),
        };
        card.field("Target", format!("<@{target}>\n`{target}`"), true);
        card
    }

    fn field(&mut self, name: &'static str, value: String, inline: bool) {
        self.fields.push(LogField {
            name,
            value: clip(&value, FIELD_LIMIT),
            inline,
        });
    }
}

fn clip(s: &str, limit: usize) -> String {
    if s.chars().count() <= limit {
        return s.to_string();
    }
    let mut out: String = s.chars().take(limit.saturating_sub(3)).collect();
    out.push_str("...");
    out
}

fn code_block(content: &str) -> String {
    format!("```{}```", clip(&content.replace("```", "'''"), BLOCKED_CONTENT_LIMIT))
}

/* ==============================
   Cooldown
   ============================== */

type CooldownKey = (u64, u64, ActionKind);

pub struct LogCooldown {
    period: Duration,
    last: DashMap<CooldownKey, Instant>,
}

impl Default for LogCooldown {
    fn default() -> Self {
        Self::new(LOG_COOLDOWN)
    }
}

impl LogCooldown {
    pub fn new(period: Duration) -> Self {
        Self {
            period,
            last: DashMap::new(),
        }
    }

    /// `true` → wpis idzie na kanał (i zaczyna się cooldown).
    pub fn allow(&self, guild_id: u64, log: &ActionLog) -> bool {
        self.allow_at(guild_id, log, Instant::now())
    }

    fn allow_at(&self, guild_id: u64, log: &ActionLog, now: Instant) -> bool {
        let key = (guild_id, log.target(), log.kind());
        if let Some(last) = self.last.get(&key) {
            if now.saturating_duration_since(*last) < self.period {
                return false;
            }
        }
        self.last.insert(key, now);
        if self.last.len() > 4096 {
            self.last
                .retain(|_, t| now.saturating_duration_since(*t) < self.period);
        }
        true
    }
}
