// src/normalize.rs
//! Normalizacja treści wiadomości przed wszystkimi detektorami.
//!
//! Kolejność kroków:
//! 1. lowercase,
//! 2. wzmianki (kanał / rola / użytkownik / custom emoji) → `c0`, `r0`, `m0`, `e0`…,
//! 3. usunięcie znaczników markdown,
//! 4. regional indicators → zwykłe litery,
//! 5. maska symboli (leetspeak) + wycięcie zakazanych znaków.
//!
//! Funkcja jest totalna i idempotentna: `normalize(normalize(x)) == normalize(x)`.

use std::collections::HashMap;

use once_cell::sync::Lazy;
use regex::Regex;

/// Znaki usuwane z treści (po zastosowaniu maski).
pub const BANNED_SYMBOLS: &str = "!@#$%^&*(){}[]<>-_=+?~`:;'\"/\\|<>.,\n";

static RE_MENTION: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"<#(?P<channel>\d{17,20})>|<@&(?P<role>\d{17,20})>|<@!?(?P<member>\d{17,20})>|<a?:\w+:(?P<emoji>\d{17,20})>",
    )
    .unwrap()
});

static RE_MARKDOWN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\*\*|__|~~|\|\||\*|`").unwrap());

static RE_REGIONAL_TEXT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r":regional_indicator_([a-z]):\s*").unwrap());

// token w kształcie placeholdera wzmianki – nie przepuszczamy go przez maskę
static RE_PLACEHOLDER: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[crme][0-9]+$").unwrap());

/// Wynik maski dla pojedynczego znaku.
fn mask_symbol(ch: char) -> Option<&'static str> {
    match ch {
        '!' | '1' => Some("i"),
        '0' => Some("o"),
        '$' => Some("s"),
        '(' | '[' | '{' => Some("c"),
        '3' => Some("e"),
        '@' => Some("a"),
        '\u{1F170}' => Some("a"),  // 🅰
        '\u{1F171}' => Some("b"),  // 🅱
        '\u{1F18E}' => Some("ab"), // 🆎
        _ => None,
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Hash)]
enum MentionClass {
    Channel,
    Role,
    Member,
    Emoji,
}

impl MentionClass {
    fn prefix(self) -> char {
        match self {
            MentionClass::Channel => 'c',
            MentionClass::Role => 'r',
            MentionClass::Member => 'm',
            MentionClass::Emoji => 'e',
        }
    }
}

/// Indeksy nadawane w kolejności pierwszego wystąpienia, osobno dla każdej klasy.
#[derive(Default)]
struct Placeholders {
    seen: HashMap<(MentionClass, String), usize>,
    next: HashMap<MentionClass, usize>,
}

impl Placeholders {
    fn token(&mut self, class: MentionClass, id: &str) -> String {
        let idx = match self.seen.get(&(class, id.to_string())) {
            Some(i) => *i,
            None => {
                let counter = self.next.entry(class).or_insert(0);
                let i = *counter;
                *counter += 1;
                self.seen.insert((class, id.to_string()), i);
                i
            }
        };
        format!("{}{}", class.prefix(), idx)
    }
}

/// Kanoniczna postać tekstu dla blacklisty, antyspamu i zbioru treningowego.
pub fn normalize(raw: &str) -> String {
    let lower = raw.to_lowercase();
    let mut placeholders = Placeholders::default();

    let mut out = String::with_capacity(lower.len());
    let mut pending_space = false;
    let mut last = 0;

    for caps in RE_MENTION.captures_iter(&lower) {
        let Some(whole) = caps.get(0) else { continue };
        push_text(&mut out, &lower[last..whole.start()], &mut pending_space);

        let (class, id) = if let Some(m) = caps.name("channel") {
            (MentionClass::Channel, m.as_str())
        } else if let Some(m) = caps.name("role") {
            (MentionClass::Role, m.as_str())
        } else if let Some(m) = caps.name("member") {
            (MentionClass::Member, m.as_str())
        } else if let Some(m) = caps.name("emoji") {
            (MentionClass::Emoji, m.as_str())
        } else {
            continue;
        };

        if !out.is_empty() && !out.ends_with(' ') {
            out.push(' ');
        }
        out.push_str(&placeholders.token(class, id));
        pending_space = true;
        last = whole.end();
    }
    push_text(&mut out, &lower[last..], &mut pending_space);

    out.trim().to_string()
}

fn push_text(out: &mut String, segment: &str, pending_space: &mut bool) {
    let cleaned = clean_segment(segment);
    if cleaned.is_empty() {
        return;
    }
    if *pending_space && !cleaned.starts_with(' ') {
        out.push(' ');
    }
    *pending_space = false;
    out.push_str(&cleaned);
}

/// Kroki 3–5 dla fragmentu bez wzmianek.
fn clean_segment(segment: &str) -> String {
    let no_markdown = RE_MARKDOWN.replace_all(segment, "");
    let regional = expand_regional_indicators(&no_markdown);

    regional
        .split(' ')
        .map(mask_token)
        .collect::<Vec<_>>()
        .join(" ")
}

fn expand_regional_indicators(s: &str) -> String {
    let textual = RE_REGIONAL_TEXT.replace_all(s, "$1");
    textual
        .chars()
        .map(|ch| match ch {
            '\u{1F1E6}'..='\u{1F1FF}' => (b'a' + (ch as u32 - 0x1F1E6) as u8) as char,
            _ => ch,
        })
        .collect()
}

fn mask_token(token: &str) -> String {
    if RE_PLACEHOLDER.is_match(token) {
        return token.to_string();
    }
    let mut out = String::with_capacity(token.len());
    for ch in token.chars() {
        if let Some(sub) = mask_symbol(ch) {
            out.push_str(sub);
        } else if BANNED_SYMBOLS.contains(ch) || ch == '\u{FE0F}' || ch == '\u{FE0E}' {
            continue;
        } else {
            out.push(ch);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn lowercases_and_masks_leetspeak() {
        assert_eq!(normalize("H3LL0 W0RLD!"), "hello worldi");
        assert_eq!(normalize("$p@m"), "spam");
        assert_eq!(normalize("(ool [at {at"), "cool cat cat");
    }

    #[test]
    fn removes_banned_symbols() {
        assert_eq!(normalize("a.b,c;d:e'f\"g"), "abcdefg");
        assert_eq!(normalize("line\nbreak"), "linebreak");
    }

    #[test]
    fn strips_markdown() {
        assert_eq!(normalize("**bold** __under__ ~~strike~~ ||spoiler|| `code`"), "bold under strike spoiler code");
    }

    #[test]
    fn mentions_become_placeholders_in_discovery_order() {
        let text = "hey <@123456789012345678> and <@!223456789012345678> in <#323456789012345678>";
        assert_eq!(normalize(text), "hey m0 and m1 in c0");
    }

    #[test]
    fn same_mention_reuses_placeholder() {
        let text = "<@123456789012345678> <@!123456789012345678> <@&123456789012345678>";
        assert_eq!(normalize(text), "m0 m0 r0");
    }

    #[test]
    fn custom_emoji_placeholder_is_separate_token() {
        let text = "nice<:pog:123456789012345678>guys<a:dance:223456789012345678>";
        assert_eq!(normalize(text), "nice e0 guys e1");
    }

    #[test]
    fn short_ids_are_not_mentions() {
        // za krótkie ID – zwykły tekst, więc znaki zakazane znikają
        assert_eq!(normalize("<#123>"), "i2e");
    }

    #[test]
    fn regional_indicators_become_letters() {
        assert_eq!(normalize("\u{1F1EB}\u{1F1F7}\u{1F1EE}\u{1F1E8}\u{1F1F0}"), "frick");
        assert_eq!(
            normalize(":regional_indicator_h: :regional_indicator_i:"),
            "hi"
        );
        assert_eq!(normalize("\u{1F170}\u{FE0F}\u{1F171}\u{FE0F}"), "ab");
    }

    #[test]
    fn empty_and_symbol_only_input() {
        assert_eq!(normalize(""), "");
        assert_eq!(normalize("..."), "");
        assert_eq!(normalize("   "), "");
    }

    #[test]
    fn consecutive_spaces_are_kept() {
        assert_eq!(normalize("a . b"), "a  b");
    }

    proptest! {
        #[test]
        fn normalization_is_idempotent(s in r"[a-zA-Z0-9 !@#$%^&*(){}\[\]<>_~`:;'.,|\n-]{0,48}") {
            let once = normalize(&s);
            prop_assert_eq!(normalize(&once), once);
        }

        #[test]
        fn normalization_is_idempotent_with_mentions(
            a in "[a-z0-9 .!]{0,12}",
            b in "[a-z0-9 .!]{0,12}",
            id in "[0-9]{18}",
        ) {
            let raw = format!("{a}<@{id}>{b}<#{id}>{a}");
            let once = normalize(&raw);
            prop_assert_eq!(normalize(&once), once);
        }
    }
}
