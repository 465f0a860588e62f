// src/nickfilter.rs
//! Filtr nicków: nazwa, która nie przechodzi czarnej listy, zostaje zastąpiona losowym nickiem.

use rand::seq::IndexedRandom;
use tracing::debug;

use crate::blacklist::is_blacklisted;
use crate::guild::{BlacklistData, FilterData, FilterGate};

const VOWELS: &[u8] = b"aeiou";
const CONSONANTS: &[u8] = b"bcdfghjklmnpqrstvwxyz";

/// `a` → samogłoska, `b` → spółgłoska, `\` → następny znak dosłownie.
pub const NICK_PATTERNS: &[&str] = &[
    "bababa", "babes", "abab", "ababab", "babis", "abis", "abaab", "baab", "bababas", "baabaas",
    "babaab",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NicknameEvent {
    pub guild_id: u64,
    pub member_id: u64,
    pub display_name: String,
    pub role_ids: Vec<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NickVerdict {
    Allowed,
    Rename { old: String, new: String },
}

/// Losowy, wymawialny nick. `pattern == None` → losowy wzorzec z [`NICK_PATTERNS`].
pub fn generate_random_nick(pattern: Option<&str>) -> String {
    let mut rng = rand::rng();
    let pattern = pattern
        .or_else(|| NICK_PATTERNS.choose(&mut rng).copied())
        .unwrap_or("bababa");

    let mut out = String::with_capacity(pattern.len());
    let mut escaped = false;
    for ch in pattern.chars() {
        if escaped {
            escaped = false;
            out.push(ch);
            continue;
        }
        match ch {
            '\\' => escaped = true,
            'a' => out.push(*VOWELS.choose(&mut rng).unwrap_or(&b'a') as char),
            'b' => out.push(*CONSONANTS.choose(&mut rng).unwrap_or(&b'b') as char),
            other => out.push(other),
        }
    }
    capitalize(&out)
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
        None => String::new(),
    }
}

/// Czarna lista gildii działa tu niezależnie od tego, czy filtr wiadomości jest włączony.
pub fn check_nickname(cfg: &FilterData, blacklist: &BlacklistData, event: &NicknameEvent) -> NickVerdict {
    if !cfg.applies_to_roles(&event.role_ids) || event.display_name.is_empty() {
        return NickVerdict::Allowed;
    }
    if !is_blacklisted(blacklist, &event.display_name).hit {
        return NickVerdict::Allowed;
    }

    let new = generate_random_nick(None);
    debug!(
        guild_id = event.guild_id,
        member_id = event.member_id,
        %new,
        "nickname rejected by blacklist"
    );
    NickVerdict::Rename {
        old: event.display_name.clone(),
        new,
    }
}
