// src/blacklist.rs
//! Dopasowanie czarnej listy w trzech trybach: common → wild → super.
//!
//! - `common` – całe tokeny (split po spacji),
//! - `wild` – podciąg w dowolnym miejscu,
//! - `super` – podciąg po usunięciu spacji (łapie „f r i c k” i treść rozbitą na kilka wiadomości).
//!
//! Gdy `filter_enabled == false`, niczego nie cenzurujemy i kończymy na pierwszym trafieniu.

use std::collections::HashSet;

use crate::guild::{BlacklistData, BlacklistMode};
use crate::normalize::normalize;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlacklistMatch {
    pub hit: bool,
    /// Tekst z `#` w miejscu zakazanych wyrażeń. `None`, gdy filtr wyłączony albo brak trafienia.
    pub censored: Option<String>,
    /// Pierwszy tryb, który zadziałał.
    pub mode: Option<BlacklistMode>,
}

impl BlacklistMatch {
    fn clean() -> Self {
        Self {
            hit: false,
            censored: None,
            mode: None,
        }
    }

    fn short_circuit(mode: BlacklistMode) -> Self {
        Self {
            hit: true,
            censored: None,
            mode: Some(mode),
        }
    }
}

fn hashes(word: &str) -> String {
    "#".repeat(word.chars().count())
}

fn mask_common(words: &[String], text: &str) -> (bool, String) {
    let banned: HashSet<&str> = words
        .iter()
        .map(String::as_str)
        .filter(|w| !w.is_empty())
        .collect();
    if banned.is_empty() {
        return (false, text.to_string());
    }

    let mut hit = false;
    let masked = text
        .split(' ')
        .map(|tok| {
            if banned.contains(tok) {
                hit = true;
                hashes(tok)
            } else {
                tok.to_string()
            }
        })
        .collect::<Vec<_>>()
        .join(" ");
    (hit, masked)
}

fn mask_wild(words: &[String], mut text: String, stop_at_first: bool) -> (bool, String) {
    let mut hit = false;
    for word in words.iter().filter(|w| !w.is_empty()) {
        if text.contains(word.as_str()) {
            text = text.replace(word.as_str(), &hashes(word));
            hit = true;
            if stop_at_first {
                break;
            }
        }
    }
    (hit, text)
}

fn mask_super(words: &[String], text: &str, stop_at_first: bool) -> (bool, String) {
    let spaces: Vec<usize> = text
        .chars()
        .enumerate()
        .filter_map(|(i, c)| (c == ' ').then_some(i))
        .collect();
    let squashed: String = text.chars().filter(|c| *c != ' ').collect();
    let (hit, masked) = mask_wild(words, squashed, stop_at_first);

    // maska zachowuje liczbę znaków, więc pozycje spacji są nadal poprawne
    let mut chars: Vec<char> = masked.chars().collect();
    for i in spaces {
        chars.insert(i.min(chars.len()), ' ');
    }
    (hit, chars.into_iter().collect())
}

/// Sprawdza tekst (surowy albo już znormalizowany) względem czarnej listy gildii.
pub fn is_blacklisted(bl: &BlacklistData, raw: &str) -> BlacklistMatch {
    let text = normalize(raw);
    let stop_at_first = !bl.filter_enabled;
    let mut first: Option<BlacklistMode> = None;

    let (common_hit, text) = mask_common(&bl.common, &text);
    if common_hit {
        if stop_at_first {
            return BlacklistMatch::short_circuit(BlacklistMode::Common);
        }
        first = Some(BlacklistMode::Common);
    }

    let (wild_hit, text) = mask_wild(&bl.wild, text, stop_at_first);
    if wild_hit {
        if stop_at_first {
            return BlacklistMatch::short_circuit(BlacklistMode::Wild);
        }
        first = first.or(Some(BlacklistMode::Wild));
    }

    let (super_hit, text) = mask_super(&bl.super_, &text, stop_at_first);
    if super_hit {
        if stop_at_first {
            return BlacklistMatch::short_circuit(BlacklistMode::Super);
        }
        first = first.or(Some(BlacklistMode::Super));
    }

    match first {
        Some(mode) => BlacklistMatch {
            hit: true,
            censored: Some(text),
            mode: Some(mode),
        },
        None => BlacklistMatch::clean(),
    }
}

/// Postać, w jakiej słowo trafia do bazy: ta sama normalizacja co przy dopasowaniu,
/// a dla `super` dodatkowo bez spacji.
pub fn preformat(expr: &str, mode: BlacklistMode) -> String {
    let normalized = normalize(expr);
    match mode {
        BlacklistMode::Super => normalized.chars().filter(|c| *c != ' ').collect(),
        BlacklistMode::Common | BlacklistMode::Wild => normalized,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn words(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    fn data(common: &[&str], wild: &[&str], sup: &[&str]) -> BlacklistData {
        BlacklistData {
            common: words(common),
            wild: words(wild),
            super_: words(sup),
            ..BlacklistData::default()
        }
    }

    #[test]
    fn common_masks_whole_tokens_only() {
        let bl = data(&["spam"], &[], &[]);
        let m = is_blacklisted(&bl, "this is not spam at all");
        assert!(m.hit);
        assert_eq!(m.mode, Some(BlacklistMode::Common));
        assert_eq!(m.censored.as_deref(), Some("this is not #### at all"));

        assert!(!is_blacklisted(&bl, "spammer incoming").hit);
    }

    #[test]
    fn wild_masks_substrings() {
        let bl = data(&[], &["spam"], &[]);
        let m = is_blacklisted(&bl, "spammer incoming");
        assert!(m.hit);
        assert_eq!(m.censored.as_deref(), Some("####mer incoming"));
    }

    #[test]
    fn super_defeats_space_injection() {
        let only_common = data(&["frick"], &[], &[]);
        let only_wild = data(&[], &["frick"], &[]);
        let only_super = data(&[], &[], &["frick"]);

        assert!(!is_blacklisted(&only_common, "fr icki ng").hit);
        assert!(!is_blacklisted(&only_wild, "fr icki ng").hit);

        let m = is_blacklisted(&only_super, "fr icki ng");
        assert!(m.hit);
        assert_eq!(m.mode, Some(BlacklistMode::Super));
        assert_eq!(m.censored.as_deref(), Some("## ###i ng"));
    }

    #[test]
    fn leetspeak_is_unmasked_before_matching() {
        let bl = data(&["spam"], &[], &[]);
        assert!(is_blacklisted(&bl, "$P@M").hit);
    }

    #[test]
    fn disabled_filter_never_returns_text() {
        let mut bl = data(&["spam"], &["egg"], &["ham"]);
        bl.filter_enabled = false;

        for msg in ["spam", "eggs", "h a m"] {
            let m = is_blacklisted(&bl, msg);
            assert!(m.hit, "{msg}");
            assert!(m.censored.is_none());
        }
        assert_eq!(is_blacklisted(&bl, "eggs").mode, Some(BlacklistMode::Wild));
    }

    #[test]
    fn all_modes_run_when_filter_enabled() {
        let bl = data(&["spam"], &["egg"], &["ham"]);
        let m = is_blacklisted(&bl, "spam eggs h a m");
        assert!(m.hit);
        assert_eq!(m.mode, Some(BlacklistMode::Common));
        assert_eq!(m.censored.as_deref(), Some("#### ###s # # #"));
    }

    #[test]
    fn empty_expressions_never_match() {
        let bl = data(&[""], &[""], &[""]);
        assert_eq!(is_blacklisted(&bl, "hello  there"), BlacklistMatch::clean());
    }

    #[test]
    fn clean_text_has_no_censored_copy() {
        let bl = data(&["spam"], &[], &[]);
        let m = is_blacklisted(&bl, "hello");
        assert!(!m.hit);
        assert!(m.censored.is_none());
    }

    #[test]
    fn preformat_matches_runtime_normalization() {
        assert_eq!(preformat("  Fr1ck ", BlacklistMode::Common), "frick");
        assert_eq!(preformat("f r i c k", BlacklistMode::Super), "frick");
        assert_eq!(preformat("f r i c k", BlacklistMode::Wild), "f r i c k");
    }
}
