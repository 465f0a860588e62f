// src/warnings.rs
//! Licznik ostrzeżeń per (guild, author) z okresowym wygaszaniem.

use dashmap::DashMap;

pub type WarnKey = (u64, u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WarningOutcome {
    /// Ile ostrzeżeń zostało do wyciszenia.
    Remaining(u32),
    /// Próg przekroczony – licznik wyzerowany, należy nałożyć timeout.
    Muted,
}

#[derive(Default)]
pub struct WarningEscalator {
    counters: DashMap<WarnKey, u32>,
}

impl WarningEscalator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inkrementacja, potem porównanie: `count > threshold` ⇒ mute + reset.
    pub fn add_warning(&self, key: WarnKey, threshold: u32) -> WarningOutcome {
        let mut entry = self.counters.entry(key).or_insert(0);
        *entry = entry.saturating_add(1);

        if *entry > threshold {
            *entry = 0;
            WarningOutcome::Muted
        } else {
            WarningOutcome::Remaining(threshold - *entry)
        }
    }

    pub fn count(&self, key: WarnKey) -> u32 {
        self.counters.get(&key).map(|c| *c).unwrap_or(0)
    }

    /// −1 dla każdego dodatniego licznika; zera znikają z mapy. Zwraca liczbę zmniejszonych.
    pub fn decay_tick(&self) -> usize {
        let mut decremented = 0;
        self.counters.retain(|_, c| {
            if *c > 0 {
                *c -= 1;
                decremented += 1;
            }
            *c > 0
        });
        decremented
    }

    /// Liczba kluczy z niezerowym licznikiem.
    pub fn tracked(&self) -> usize {
        self.counters.len()
    }
}
