//! # Single-Label Quality Scoring
//!
//! The scalar trust score for one (label, predicted-probability-row) pair.
//! The score is the self-confidence of the given label: the probability mass
//! the distribution assigns to it. It is monotonically non-decreasing in that
//! probability, lives in [0, 1], and depends on nothing but the rows it is
//! handed, so it can be applied to arbitrary row subsets.

use ndarray::{Array1, ArrayView2};

/// Returns a quality score in [0, 1] for each (label, probability-row) pair:
/// the probability assigned to the given label. Lower scores indicate labels
/// less likely to be correct.
///
/// `labels` and the rows of `pred_probs` must have the same length.
pub fn label_quality_scores(labels: &[usize], pred_probs: ArrayView2<f64>) -> Array1<f64> {
    debug_assert_eq!(labels.len(), pred_probs.nrows());
    Array1::from_iter(
        labels
            .iter()
            .enumerate()
            .map(|(i, &label)| pred_probs[[i, label]]),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    #[test]
    fn scores_are_the_probability_of_the_given_label() {
        let probs = array![[0.7, 0.2, 0.1], [0.1, 0.3, 0.6]];
        let scores = label_quality_scores(&[0, 2], probs.view());
        assert_abs_diff_eq!(scores[0], 0.7, epsilon = 1e-12);
        assert_abs_diff_eq!(scores[1], 0.6, epsilon = 1e-12);
    }

    #[test]
    fn scores_are_monotone_in_the_given_label_probability() {
        let low = array![[0.55, 0.45]];
        let high = array![[0.9, 0.1]];
        let score_low = label_quality_scores(&[0], low.view())[0];
        let score_high = label_quality_scores(&[0], high.view())[0];
        assert!(score_high >= score_low);
    }

    #[test]
    fn subsets_score_independently_of_omitted_rows() {
        let probs = array![[0.7, 0.3], [0.2, 0.8], [0.5, 0.5]];
        let full = label_quality_scores(&[0, 1, 0], probs.view());
        let subset = label_quality_scores(&[1], probs.slice(ndarray::s![1..2, ..]));
        assert_abs_diff_eq!(full[1], subset[0], epsilon = 1e-12);
    }
}
