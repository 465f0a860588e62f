// src/antiraid.rs
//! Antiraid: zbyt wielu nowych członków w krótkim czasie.
//!
//! Okno per gildia o pojemności `members_limit`. Pełne okno, w którym rozpiętość
//! czasów dołączenia jest mniejsza niż `join_interval_secs`, to rajd: karzemy całe okno
//! i zaczynamy od zera.

use chrono::{DateTime, Utc};
use rand::Rng;
use std::time::Duration;
use tracing::warn;

use crate::guild::{AntiraidData, AntiraidPunishment};
use crate::window::{EvalPolicy, WindowItem, WindowStore};

/// Losowy timeout dla członków rajdu (minuty, włącznie).
pub const RAID_TIMEOUT_MINUTES: std::ops::RangeInclusive<u32> = 30..=120;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemberJoin {
    pub guild_id: u64,
    pub member_id: u64,
    pub joined_at: DateTime<Utc>,
}

impl WindowItem for MemberJoin {
    type Id = u64;
    fn id(&self) -> u64 {
        self.member_id
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RaidAction {
    Ban,
    Kick,
    Timeout { minutes: u32 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PunishedMember {
    pub member_id: u64,
    pub action: RaidAction,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AntiraidVerdict {
    Allowed,
    Punish {
        members: Vec<PunishedMember>,
        punishment: AntiraidPunishment,
    },
}

/// Rozpiętość czasów dołączenia w oknie (pełne sekundy).
fn join_span(window: &[MemberJoin]) -> Option<i64> {
    let oldest = window.iter().map(|j| j.joined_at).min()?;
    let newest = window.iter().map(|j| j.joined_at).max()?;
    Some((newest - oldest).num_seconds())
}

pub struct AntiraidProcessor {
    windows: WindowStore<u64, MemberJoin>,
}

impl Default for AntiraidProcessor {
    fn default() -> Self {
        Self::new()
    }
}

impl AntiraidProcessor {
    pub fn new() -> Self {
        Self {
            // pojemność i tak nadpisuje konfiguracja gildii przy każdym push
            windows: WindowStore::new(AntiraidData::default().members_limit as usize, EvalPolicy::AtCapacity),
        }
    }

    pub fn process(&self, cfg: &AntiraidData, join: &MemberJoin) -> AntiraidVerdict {
        if !cfg.enabled {
            return AntiraidVerdict::Allowed;
        }

        let capacity = cfg.members_limit.max(2) as usize;
        let interval = i64::from(cfg.join_interval_secs);
        // ocena + czyszczenie pod jednym wpisem: członek trafia do co najwyżej jednego werdyktu
        let Some(window) = self.windows.push_and_take(join.guild_id, join.clone(), capacity, |w| {
            join_span(w).is_some_and(|span| span < interval)
        }) else {
            return AntiraidVerdict::Allowed;
        };

        warn!(
            guild_id = join.guild_id,
            members = window.len(),
            span_secs = join_span(&window).unwrap_or_default(),
            punishment = ?cfg.punishment,
            "antiraid triggered"
        );

        let mut rng = rand::rng();
        let members = window
            .into_iter()
            .map(|j| PunishedMember {
                member_id: j.member_id,
                action: match cfg.punishment {
                    AntiraidPunishment::Ban => RaidAction::Ban,
                    AntiraidPunishment::Kick => RaidAction::Kick,
                    AntiraidPunishment::Timeout => RaidAction::Timeout {
                        minutes: rng.random_range(RAID_TIMEOUT_MINUTES),
                    },
                },
            })
            .collect();

        AntiraidVerdict::Punish {
            members,
            punishment: cfg.punishment,
        }
    }

    pub fn window_len(&self, guild_id: u64) -> usize {
        self.windows.len(&guild_id)
    }

    pub fn prune_idle(&self, idle: Duration) -> usize {
        self.windows.prune_idle(idle)
    }

    pub fn tracked_guilds(&self) -> usize {
        self.windows.keys_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(secs: i64, member_id: u64) -> MemberJoin {
        MemberJoin {
            guild_id: 1,
            member_id,
            joined_at: Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap(),
        }
    }

    fn cfg(limit: u32, interval: u32, punishment: AntiraidPunishment) -> AntiraidData {
        AntiraidData {
            enabled: true,
            members_limit: limit,
            join_interval_secs: interval,
            punishment,
        }
    }

    #[test]
    fn disabled_allows_everything() {
        let p = AntiraidProcessor::new();
        let c = AntiraidData::default();
        for i in 0..10 {
            assert_eq!(p.process(&c, &at(0, i)), AntiraidVerdict::Allowed);
        }
        assert_eq!(p.window_len(1), 0);
    }

    #[test]
    fn burst_at_capacity_is_punished_and_window_cleared() {
        let p = AntiraidProcessor::new();
        let c = cfg(3, 10, AntiraidPunishment::Kick);
        assert_eq!(p.process(&c, &at(0, 1)), AntiraidVerdict::Allowed);
        assert_eq!(p.process(&c, &at(2, 2)), AntiraidVerdict::Allowed);

        let verdict = p.process(&c, &at(4, 3));
        let AntiraidVerdict::Punish { members, punishment } = verdict else {
            panic!("expected punishment");
        };
        assert_eq!(punishment, AntiraidPunishment::Kick);
        assert_eq!(members.iter().map(|m| m.member_id).collect::<Vec<_>>(), vec![1, 2, 3]);
        assert!(members.iter().all(|m| m.action == RaidAction::Kick));
        assert_eq!(p.window_len(1), 0);
    }

    #[test]
    fn slow_joins_slide_through() {
        let p = AntiraidProcessor::new();
        let c = cfg(3, 10, AntiraidPunishment::Ban);
        for (i, t) in [0, 6, 12, 18, 24].into_iter().enumerate() {
            assert_eq!(p.process(&c, &at(t, i as u64)), AntiraidVerdict::Allowed);
        }
        assert_eq!(p.window_len(1), 3);
    }

    #[test]
    fn span_equal_to_interval_is_not_a_raid() {
        let p = AntiraidProcessor::new();
        let c = cfg(2, 10, AntiraidPunishment::Kick);
        p.process(&c, &at(0, 1));
        assert_eq!(p.process(&c, &at(10, 2)), AntiraidVerdict::Allowed);
    }

    #[test]
    fn rejoin_replaces_entry() {
        let p = AntiraidProcessor::new();
        let c = cfg(3, 10, AntiraidPunishment::Kick);
        p.process(&c, &at(0, 1));
        p.process(&c, &at(1, 1));
        p.process(&c, &at(2, 1));
        assert_eq!(p.window_len(1), 1);
    }

    #[test]
    fn changing_limit_clears_window() {
        let p = AntiraidProcessor::new();
        p.process(&cfg(3, 10, AntiraidPunishment::Kick), &at(0, 1));
        p.process(&cfg(3, 10, AntiraidPunishment::Kick), &at(1, 2));
        assert_eq!(p.window_len(1), 2);
        p.process(&cfg(4, 10, AntiraidPunishment::Kick), &at(2, 3));
        assert_eq!(p.window_len(1), 1);
    }

    #[test]
    fn concurrent_joins_punish_each_member_once() {
        let p = AntiraidProcessor::new();
        let c = cfg(2, 60, AntiraidPunishment::Kick);

        let punished: Vec<u64> = std::thread::scope(|s| {
            let handles: Vec<_> = (0..8u64)
                .map(|i| {
                    let (p, c) = (&p, &c);
                    s.spawn(move || -> Vec<u64> {
                        match p.process(c, &at(0, i)) {
                            AntiraidVerdict::Punish { members, .. } => {
                                members.into_iter().map(|m| m.member_id).collect()
                            }
                            AntiraidVerdict::Allowed => Vec::new(),
                        }
                    })
                })
                .collect();
            handles.into_iter().flat_map(|h| h.join().unwrap()).collect()
        });

        let mut unique = punished.clone();
        unique.sort_unstable();
        unique.dedup();
        assert_eq!(unique.len(), punished.len());
        // 8 dołączeń, okno 2: zawsze 4 pełne pary
        assert_eq!(punished.len(), 8);
    }

    #[test]
    fn timeout_minutes_are_in_range() {
        let p = AntiraidProcessor::new();
        let c = cfg(2, 10, AntiraidPunishment::Timeout);
        p.process(&c, &at(0, 1));
        let AntiraidVerdict::Punish { members, .. } = p.process(&c, &at(1, 2)) else {
            panic!("expected punishment");
        };
        for m in members {
            let RaidAction::Timeout { minutes } = m.action else {
                panic!("expected timeout");
            };
            assert!(RAID_TIMEOUT_MINUTES.contains(&minutes));
        }
    }
}
