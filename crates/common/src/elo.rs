//! ELO rating arithmetic for pairwise model comparisons
//!
//! Expected scores follow the logistic curve with base 400. The winner of a
//! comparison scores 1 and the loser 0; both ratings move by
//! `k * (score - expected)` and are rounded to two decimals.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Rating assigned to a model that has never been compared
pub const DEFAULT_RATING: f64 = 1000.0;

/// Which side of a comparison won
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    FirstWins,
    SecondWins,
}

impl Outcome {
    /// The outcome seen from the other participant
    pub fn swapped(self) -> Self {
        match self {
            Outcome::FirstWins => Outcome::SecondWins,
            Outcome::SecondWins => Outcome::FirstWins,
        }
    }
}

/// Probability that a player rated `rating_a` beats one rated `rating_b`
pub fn expected_score(rating_a: f64, rating_b: f64) -> f64 {
    1.0 / (1.0 + 10f64.powf((rating_b - rating_a) / 400.0))
}

/// Apply one comparison and return the new `(rating_a, rating_b)`
pub fn update_ratings(rating_a: f64, rating_b: f64, outcome: Outcome, k_factor: f64) -> (f64, f64) {
    let expected_a = expected_score(rating_a, rating_b);
    let expected_b = expected_score(rating_b, rating_a);

    let (score_a, score_b) = match outcome {
        Outcome::FirstWins => (1.0, 0.0),
        Outcome::SecondWins => (0.0, 1.0),
    };

    (
        round2(rating_a + k_factor * (score_a - expected_a)),
        round2(rating_b + k_factor * (score_b - expected_b)),
    )
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Ratings per model name
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EloRatings(BTreeMap<String, f64>);

impl EloRatings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Current rating, `DEFAULT_RATING` for unseen models
    pub fn rating(&self, model: &str) -> f64 {
        self.0.get(model).copied().unwrap_or(DEFAULT_RATING)
    }

    pub fn set(&mut self, model: impl Into<String>, rating: f64) {
        self.0.insert(model.into(), rating);
    }

    /// Record a comparison between `model1` and `model2`, returning the new ratings
    pub fn apply(&mut self, model1: &str, model2: &str, outcome: Outcome, k_factor: f64) -> (f64, f64) {
        let (r1, r2) = update_ratings(self.rating(model1), self.rating(model2), outcome, k_factor);
        self.set(model1, r1);
        self.set(model2, r2);
        (r1, r2)
    }

    /// Models sorted by rating, highest first; ties keep name order
    pub fn ranked(&self) -> Vec<(String, f64)> {
        let mut entries: Vec<(String, f64)> =
            self.0.iter().map(|(m, r)| (m.clone(), *r)).collect();
        entries.sort_by(|a, b| b.1.total_cmp(&a.1));
        entries
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<(String, f64)> for EloRatings {
    fn from_iter<T: IntoIterator<Item = (String, f64)>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_k32_equal_ratings_first_wins() {
        let (a, b) = update_ratings(1000.0, 1000.0, Outcome::FirstWins, 32.0);
        assert_eq!(a, 1016.0);
        assert_eq!(b, 984.0);
    }

    #[test]
    fn test_equal_ratings_move_by_half_k() {
        for k in [8.0, 16.0, 24.0, 40.0] {
            let (a, b) = update_ratings(1200.0, 1200.0, Outcome::SecondWins, k);
            assert_eq!(a, 1200.0 - k / 2.0);
            assert_eq!(b, 1200.0 + k / 2.0);
        }
    }

    #[test]
    fn test_update_is_symmetric() {
        let cases = [
            (1000.0, 1000.0),
            (1100.0, 950.0),
            (1432.17, 1018.5),
            (870.0, 1290.25),
        ];
        for (ra, rb) in cases {
            for outcome in [Outcome::FirstWins, Outcome::SecondWins] {
                let (a, b) = update_ratings(ra, rb, outcome, 32.0);
                let (b2, a2) = update_ratings(rb, ra, outcome.swapped(), 32.0);
                assert_eq!((a, b), (a2, b2));
            }
        }
    }

    #[test]
    fn test_upset_moves_more_than_expected_win() {
        let (fav_win, _) = update_ratings(1400.0, 1000.0, Outcome::FirstWins, 32.0);
        let (_, underdog_win) = update_ratings(1400.0, 1000.0, Outcome::SecondWins, 32.0);
        assert!(fav_win - 1400.0 < underdog_win - 1000.0);
    }

    #[test]
    fn test_results_rounded_to_two_decimals() {
        let (a, b) = update_ratings(1013.37, 987.91, Outcome::SecondWins, 32.0);
        assert_eq!((a * 100.0).round() / 100.0, a);
        assert_eq!((b * 100.0).round() / 100.0, b);
    }

    #[test]
    fn test_unseen_models_default_to_1000() {
        let mut ratings = EloRatings::new();
        assert_eq!(ratings.rating("imagen-3.0-generate-002"), DEFAULT_RATING);

        let (r1, r2) = ratings.apply(
            "imagen-3.0-generate-002",
            "gemini-2.0-flash",
            Outcome::FirstWins,
            32.0,
        );
        assert_eq!((r1, r2), (1016.0, 984.0));
        assert_eq!(ratings.rating("gemini-2.0-flash"), 984.0);
        assert_eq!(ratings.len(), 2);
    }

    #[test]
    fn test_ranked_orders_highest_first() {
        let ratings: EloRatings = [
            ("a".to_string(), 990.0),
            ("b".to_string(), 1030.5),
            ("c".to_string(), 1001.0),
        ]
        .into_iter()
        .collect();

        let names: Vec<String> = ratings.ranked().into_iter().map(|(m, _)| m).collect();
        assert_eq!(names, vec!["b", "c", "a"]);
    }

    #[test]
    fn test_ratings_serialize_as_plain_map() {
        let mut ratings = EloRatings::new();
        ratings.set("flux", 1012.5);
        let json = serde_json::to_value(&ratings).unwrap();
        assert_eq!(json, serde_json::json!({"flux": 1012.5}));
    }
}
