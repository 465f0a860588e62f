// src/whitelist.rs
//! Filtr „fancy fontów”: treść może używać wyłącznie dozwolonych znaków.
//!
//! Emoji (z modyfikatorami, ZWJ, keycapami i flagami) traktujemy jako jedną jednostkę
//! zapisaną krótką nazwą `:hex-hex:` – dzięki temu dozwolone emoji nie wpada w filtr
//! tylko dlatego, że składa się z kilku code pointów.

use std::collections::{BTreeSet, HashSet};

use unicode_normalization::UnicodeNormalization;

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FontCheck {
    pub violated: bool,
    /// Posortowane, bez duplikatów.
    pub offending: Vec<String>,
}

const VS15: char = '\u{FE0E}';
const VS16: char = '\u{FE0F}';
const ZWJ: char = '\u{200D}';
const KEYCAP: char = '\u{20E3}';

fn is_regional_indicator(ch: char) -> bool {
    ('\u{1F1E6}'..='\u{1F1FF}').contains(&ch)
}

fn is_skin_tone(ch: char) -> bool {
    ('\u{1F3FB}'..='\u{1F3FF}').contains(&ch)
}

fn is_tag(ch: char) -> bool {
    ('\u{E0020}'..='\u{E007F}').contains(&ch)
}

fn is_pictographic(ch: char) -> bool {
    matches!(ch as u32,
        0x1F000..=0x1FAFF
        | 0x2300..=0x23FF
        | 0x2600..=0x27BF
        | 0x2B00..=0x2BFF
        | 0x2190..=0x21FF
        | 0x3030 | 0x303D | 0x3297 | 0x3299
        | 0x00A9 | 0x00AE | 0x203C | 0x2049 | 0x2122 | 0x2139)
}

/// Dzieli tekst na jednostki: zwykły znak albo cała sekwencja emoji.
fn units(text: &str) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    let mut out = Vec::with_capacity(chars.len());
    let mut i = 0;

    while i < chars.len() {
        let start = i;
        let first = chars[i];
        i += 1;

        if is_regional_indicator(first) && i < chars.len() && is_regional_indicator(chars[i]) {
            i += 1;
        } else {
            loop {
                match chars.get(i) {
                    Some(&c) if c == VS15 || c == VS16 || c == KEYCAP || is_skin_tone(c) || is_tag(c) => {
                        i += 1
                    }
                    Some(&ZWJ) if i + 1 < chars.len() => i += 2,
                    _ => break,
                }
            }
        }

        let seq = &chars[start..i];
        let emoji = seq.len() > 1 || is_pictographic(first) || is_regional_indicator(first);
        if emoji {
            out.push(short_name(seq));
        } else {
            out.push(first.to_string());
        }
    }
    out
}

fn short_name(seq: &[char]) -> String {
    let parts: Vec<String> = seq
        .iter()
        .filter(|c| **c != VS16)
        .map(|c| format!("{:x}", *c as u32))
        .collect();
    format!(":{}:", parts.join("-"))
}

fn prepare(text: &str) -> String {
    text.nfc()
        .collect::<String>()
        .to_lowercase()
        .chars()
        .filter(|c| *c != ' ' && *c != '\n')
        .collect()
}

/// Spacja jest zawsze dozwolona.
pub fn contains_fonts(allowed: &str, content: &str) -> FontCheck {
    let allowed: HashSet<String> = units(&prepare(allowed)).into_iter().collect();

    let offending: BTreeSet<String> = units(&prepare(content))
        .into_iter()
        .filter(|u| !allowed.contains(u))
        .collect();

    FontCheck {
        violated: !offending.is_empty(),
        offending: offending.into_iter().collect(),
    }
}
