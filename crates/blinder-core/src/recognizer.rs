//! Label voting over labeled neighbors.
//!
//! Each labeled neighbor votes for its label with its distance to the probe.
//! A [`Scorer`] reduces each label's distances to a score; the lowest score
//! wins.

use std::collections::BTreeMap;

/// Reduces the distances backing one label to a score. Lower is better.
pub trait Scorer: Send + Sync {
    fn score(&self, distances: &[f32]) -> f32;
}

/// `mean(distances) / (ln(count) + 1)`.
///
/// A heuristic: more corroborating neighbors lower the score, with
/// diminishing effect. It carries no accuracy guarantee and can be swapped
/// for any other [`Scorer`].
#[derive(Debug, Clone, Copy, Default)]
pub struct LogCountScorer;

impl Scorer for LogCountScorer {
    fn score(&self, distances: &[f32]) -> f32 {
        if distances.is_empty() {
            return f32::INFINITY;
        }
        let count = distances.len() as f32;
        let mean = distances.iter().sum::<f32>() / count;
        mean / (count.ln() + 1.0)
    }
}

/// Distances grouped by the label of the neighbor they came from.
#[derive(Debug, Clone, Default)]
pub struct Ballot {
    votes: BTreeMap<String, Vec<f32>>,
}

impl Ballot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cast(&mut self, label: impl Into<String>, distance: f32) {
        self.votes.entry(label.into()).or_default().push(distance);
    }

    /// Score of every label, in label order.
    pub fn scores(&self, scorer: &dyn Scorer) -> Vec<(String, f32)> {
        self.votes
            .iter()
            .map(|(label, distances)| (label.clone(), scorer.score(distances)))
            .collect()
    }

    /// Label with the lowest score. Equal scores go to the smallest label.
    pub fn winner(&self, scorer: &dyn Scorer) -> Option<String> {
        let mut best: Option<(String, f32)> = None;
        for (label, score) in self.scores(scorer) {
            let better = match &best {
                None => true,
                Some((_, best_score)) => score < *best_score,
            };
            if better {
                best = Some((label, score));
            }
        }
        best.map(|(label, _)| label)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_distance_scores_itself() {
        assert!((LogCountScorer.score(&[0.4]) - 0.4).abs() < 1e-6);
    }

    #[test]
    fn test_score_formula() {
        // mean 0.5, count 2 → 0.5 / (ln 2 + 1)
        let expected = 0.5 / (2f32.ln() + 1.0);
        assert!((LogCountScorer.score(&[0.4, 0.6]) - expected).abs() < 1e-6);
    }

    #[test]
    fn test_empty_scores_infinite() {
        assert!(LogCountScorer.score(&[]).is_infinite());
    }

    #[test]
    fn test_empty_ballot_has_no_winner() {
        assert_eq!(Ballot::new().winner(&LogCountScorer), None);
    }

    #[test]
    fn test_closest_single_neighbor_wins() {
        let mut ballot = Ballot::new();
        ballot.cast("Zixia", 0.3);
        ballot.cast("Zhizunbao", 0.6);
        assert_eq!(ballot.winner(&LogCountScorer).as_deref(), Some("Zixia"));
    }

    #[test]
    fn test_corroboration_beats_single_closer_neighbor() {
        // Zixia: 0.5 alone. Zhizunbao: mean 0.6 over 3 → 0.6 / 2.0986 ≈ 0.286.
        let mut ballot = Ballot::new();
        ballot.cast("Zixia", 0.5);
        for _ in 0..3 {
            ballot.cast("Zhizunbao", 0.6);
        }
        assert_eq!(ballot.winner(&LogCountScorer).as_deref(), Some("Zhizunbao"));
    }

    #[test]
    fn test_tie_goes_to_smallest_label() {
        let mut ballot = Ballot::new();
        ballot.cast("b", 0.5);
        ballot.cast("a", 0.5);
        assert_eq!(ballot.winner(&LogCountScorer).as_deref(), Some("a"));
    }

    #[test]
    fn test_custom_scorer() {
        /// Counts votes only; more votes wins.
        struct Majority;
        impl Scorer for Majority {
            fn score(&self, distances: &[f32]) -> f32 {
                -(distances.len() as f32)
            }
        }

        let mut ballot = Ballot::new();
        ballot.cast("near", 0.01);
        ballot.cast("many", 0.7);
        ballot.cast("many", 0.7);
        assert_eq!(ballot.winner(&Majority).as_deref(), Some("many"));
        assert_eq!(ballot.winner(&LogCountScorer).as_deref(), Some("near"));
    }
}
