// src/analyser.rs
//! Cechy leksykalne wejścia klasyfikatora antyspamowego.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

/// `(total_chars, unique_chars, total_words, unique_words)` liczone na znormalizowanym tekście.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FeatureVector {
    pub total_chars: usize,
    pub unique_chars: usize,
    pub total_words: usize,
    pub unique_words: usize,
}

impl FeatureVector {
    /// Kolejność zgodna z kolumnami zbioru treningowego.
    pub fn as_array(&self) -> [f64; 4] {
        [
            self.total_chars as f64,
            self.unique_chars as f64,
            self.total_words as f64,
            self.unique_words as f64,
        ]
    }
}

/// Znaki liczone bez spacji, słowa – split po pojedynczej spacji
/// (kolejne spacje dają puste „słowa”, które też się liczą).
pub fn analyse_sample(sample: &str) -> FeatureVector {
    let nospace: Vec<char> = sample.chars().filter(|c| *c != ' ').collect();
    let words: Vec<&str> = sample.split(' ').collect();

    FeatureVector {
        total_chars: nospace.len(),
        unique_chars: nospace.iter().collect::<HashSet<_>>().len(),
        total_words: words.len(),
        unique_words: words.iter().collect::<HashSet<_>>().len(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn counts_simple_sentence() {
        let fv = analyse_sample("buy buy now");
        assert_eq!(
            fv,
            FeatureVector {
                total_chars: 9,
                unique_chars: 6,
                total_words: 3,
                unique_words: 2,
            }
        );
    }

    #[test]
    fn consecutive_spaces_produce_empty_words() {
        // "a  b" -> ["a", "", "b"]
        let fv = analyse_sample("a  b");
        assert_eq!(fv.total_words, 3);
        assert_eq!(fv.unique_words, 3);

        // "a   a" -> ["a", "", "", "a"]
        let fv = analyse_sample("a   a");
        assert_eq!(fv.total_words, 4);
        assert_eq!(fv.unique_words, 2);
    }

    #[test]
    fn empty_sample_is_one_empty_word() {
        let fv = analyse_sample("");
        assert_eq!(fv.total_chars, 0);
        assert_eq!(fv.unique_chars, 0);
        assert_eq!(fv.total_words, 1);
        assert_eq!(fv.unique_words, 1);
    }

    #[test]
    fn counts_code_points_not_bytes() {
        let fv = analyse_sample("żółw");
        assert_eq!(fv.total_chars, 4);
        assert_eq!(fv.unique_chars, 4);
    }

    proptest! {
        #[test]
        fn unique_counts_never_exceed_totals(s in "[a-d ]{0,40}") {
            let fv = analyse_sample(&s);
            prop_assert!(fv.unique_chars <= fv.total_chars);
            prop_assert!(fv.unique_words <= fv.total_words);
            prop_assert_eq!(analyse_sample(&s), fv);
        }
    }
}
