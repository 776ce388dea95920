//! # Consensus Quality Estimation
//!
//! Given any consensus label vector, this module computes per-example
//! annotator agreement, a posterior probability matrix, and a consensus
//! quality score.
//!
//! The posterior is produced by one of two estimators:
//!
//! - `agreement`: per-class vote counts divided by each example's annotation
//!   count. Pure crowd frequency; the external model is ignored.
//! - `crowdlab`: a weighted ensemble of the external model's predicted
//!   probabilities and every contributing annotator's vote evidence. The
//!   global scalars (likelihood, floor error, per-annotator weights, model
//!   weight) must be fully computed before the per-example weighted-average
//!   pass; that pass is then embarrassingly parallel across examples.
//!
//! Reliability deficits are normalized against the floor error: the rate at
//! which the consensus deviates from the single globally most frequent class.
//! An annotator (or the model) whose disagreement exceeds that floor is
//! pinned at the minimum weight.

use crate::rank;
use crate::types::{LabelMatrix, QualityMethod};
use log::warn;
use ndarray::parallel::prelude::*;
use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};

/// Reliability weights of one crowdlab pass. Recomputed from scratch for every
/// consensus label vector, never reused across passes.
#[derive(Debug, Clone)]
pub struct EnsembleWeights {
    /// Trust in the external model's prediction, scaled by crowd density.
    pub model_weight: f64,
    /// Per-annotator trust, length M, floored at 1e-6.
    pub annotator_weight: Array1<f64>,
}

/// Everything derived from one (consensus label vector, quality method) pass.
#[derive(Debug, Clone)]
pub struct ConsensusStats {
    /// Fraction of each example's given labels equal to its consensus label.
    pub annotator_agreement: Array1<f64>,
    /// Scalar trust score per example.
    pub consensus_quality_score: Array1<f64>,
    /// N x K posterior distributions.
    pub post_pred_probs: Array2<f64>,
    /// `Some` for the crowdlab method, `None` for agreement.
    pub ensemble: Option<EnsembleWeights>,
}

/// Computes agreement, posterior probabilities, and consensus quality for the
/// given consensus label vector.
pub fn consensus_stats(
    labels: &LabelMatrix,
    pred_probs: ArrayView2<f64>,
    num_annotations: &Array1<usize>,
    consensus_label: &[usize],
    quality_method: QualityMethod,
) -> ConsensusStats {
    let annotator_agreement = agreement_with_consensus(labels, consensus_label);

    let (post_pred_probs, ensemble) = match quality_method {
        QualityMethod::Crowdlab => {
            let (post, weights) = crowdlab_posterior(
                labels,
                pred_probs,
                num_annotations,
                consensus_label,
                &annotator_agreement,
            );
            (post, Some(weights))
        }
        QualityMethod::Agreement => (
            vote_frequency_posterior(labels, num_annotations, pred_probs.ncols()),
            None,
        ),
    };

    let consensus_quality_score = match quality_method {
        QualityMethod::Crowdlab => {
            rank::label_quality_scores(consensus_label, post_pred_probs.view())
        }
        QualityMethod::Agreement => annotator_agreement.clone(),
    };

    ConsensusStats {
        annotator_agreement,
        consensus_quality_score,
        post_pred_probs,
        ensemble,
    }
}

/// Fraction of each example's given labels that equal its consensus label,
/// considering only the annotators that labeled that example.
pub fn agreement_with_consensus(labels: &LabelMatrix, consensus_label: &[usize]) -> Array1<f64> {
    Array1::from_iter((0..labels.num_examples()).map(|i| {
        let mut given = 0usize;
        let mut matching = 0usize;
        for (_, label) in labels.example_labels(i) {
            given += 1;
            if label == consensus_label[i] {
                matching += 1;
            }
        }
        matching as f64 / given as f64
    }))
}

/// Per-class vote counts divided by each example's annotation count.
fn vote_frequency_posterior(
    labels: &LabelMatrix,
    num_annotations: &Array1<usize>,
    num_classes: usize,
) -> Array2<f64> {
    let n = labels.num_examples();
    let mut post = Array2::zeros((n, num_classes));
    for i in 0..n {
        for (_, label) in labels.example_labels(i) {
            post[[i, label]] += 1.0;
        }
        let count = num_annotations[i] as f64;
        post.row_mut(i).mapv_inplace(|v| v / count);
    }
    post
}

/// The crowdlab weighted-ensemble posterior.
///
/// All global scalars are fixed before the per-example pass:
/// - `likelihood`: mean annotator agreement over multiply-annotated examples,
///   the empirical probability that a random annotator reproduces the
///   consensus.
/// - `floor_error`: fraction of multiply-annotated examples whose consensus
///   deviates from the single globally most frequent class.
/// - per-annotator weights from pairwise annotator agreement, normalized
///   against the floor error.
/// - `model_weight` from the model's disagreement with the consensus, scaled
///   by sqrt(mean annotations per example) so model trust stays comparable
///   across datasets with different annotation density.
fn crowdlab_posterior(
    labels: &LabelMatrix,
    pred_probs: ArrayView2<f64>,
    num_annotations: &Array1<usize>,
    consensus_label: &[usize],
    annotator_agreement: &Array1<f64>,
) -> (Array2<f64>, EnsembleWeights) {
    let n = labels.num_examples();
    let num_classes = pred_probs.ncols();

    let multi: Vec<usize> = (0..n).filter(|&i| num_annotations[i] != 1).collect();

    let likelihood =
        multi.iter().map(|&i| annotator_agreement[i]).sum::<f64>() / multi.len() as f64;

    let mut bincount = vec![0usize; num_classes];
    for &i in &multi {
        bincount[consensus_label[i]] += 1;
    }
    let mut most_likely_class = 0usize;
    for (class, &count) in bincount.iter().enumerate() {
        if count > bincount[most_likely_class] {
            most_likely_class = class;
        }
    }
    let floor_error = multi
        .iter()
        .filter(|&&i| consensus_label[i] != most_likely_class)
        .count() as f64
        / multi.len() as f64;

    let pairwise = annotator_agreement_with_annotators(labels, num_annotations);
    let annotator_weight =
        pairwise.mapv(|agreement| (1.0 - (1.0 - agreement) / floor_error).max(1e-6));

    let model_error = multi
        .iter()
        .filter(|&&i| argmax_row(pred_probs.row(i)) != consensus_label[i])
        .count() as f64
        / multi.len() as f64;
    let mean_annotations =
        num_annotations.iter().map(|&c| c as f64).sum::<f64>() / num_annotations.len() as f64;
    let model_weight = (1.0 - model_error / floor_error).max(1e-6) * mean_annotations.sqrt();

    let off_consensus_mass = if num_classes > 1 {
        (1.0 - likelihood) / (num_classes as f64 - 1.0)
    } else {
        0.0
    };

    let mut post = Array2::zeros((n, num_classes));
    post.axis_iter_mut(Axis(0))
        .into_par_iter()
        .enumerate()
        .for_each(|(i, mut row)| {
            let votes: Vec<(usize, f64)> = labels
                .example_labels(i)
                .map(|(j, label)| (label, annotator_weight[j]))
                .collect();
            let total_weight =
                model_weight + votes.iter().map(|&(_, weight)| weight).sum::<f64>();
            for (class, cell) in row.iter_mut().enumerate() {
                let mut acc = model_weight * pred_probs[[i, class]];
                for &(label, weight) in &votes {
                    acc += weight
                        * if label == class {
                            likelihood
                        } else {
                            off_consensus_mass
                        };
                }
                *cell = acc / total_weight;
            }
        });

    (
        post,
        EnsembleWeights {
            model_weight,
            annotator_weight,
        },
    )
}

/// Average agreement of each annotator with the other annotators on jointly
/// labeled examples, weighted by (shared annotation count - 1). Annotators
/// with no overlap with any peer are imputed the mean agreement of the
/// annotators that do have overlap.
fn annotator_agreement_with_annotators(
    labels: &LabelMatrix,
    num_annotations: &Array1<usize>,
) -> Array1<f64> {
    let m = labels.num_annotators();
    let mut agreement = Array1::from_elem(m, f64::NAN);

    for j in 0..m {
        let mut matches = 0usize;
        let mut peers = 0usize;
        for (i, own_label) in labels.annotator_labels(j) {
            let others = num_annotations[i] - 1;
            if others == 0 {
                continue;
            }
            peers += others;
            matches += labels
                .example_labels(i)
                .filter(|&(other, label)| other != j && label == own_label)
                .count();
        }
        if peers > 0 {
            agreement[j] = matches as f64 / peers as f64;
        }
    }

    let isolated: Vec<usize> = agreement
        .iter()
        .enumerate()
        .filter(|(_, value)| value.is_nan())
        .map(|(j, _)| j)
        .collect();
    if !isolated.is_empty() {
        let overlapped: Vec<f64> = agreement
            .iter()
            .copied()
            .filter(|value| !value.is_nan())
            .collect();
        let mean = overlapped.iter().sum::<f64>() / overlapped.len() as f64;
        warn!(
            "Annotator(s) {isolated:?} did not label any examples that overlap with other \
             annotators; using the average agreement among the remaining annotators as theirs."
        );
        for j in isolated {
            agreement[j] = mean;
        }
    }

    agreement
}

/// Index of the first maximum of a probability row.
fn argmax_row(row: ArrayView1<f64>) -> usize {
    let mut best = 0usize;
    for (class, &value) in row.iter().enumerate() {
        if value > row[best] {
            best = class;
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    fn three_annotator_fixture() -> (LabelMatrix, Array2<f64>, Vec<usize>) {
        // Annotators 0 and 1 always agree with each other; annotator 2 agrees
        // with them on half of the examples.
        let labels = LabelMatrix::from_rows(vec![
            vec![Some(0), Some(0), Some(0)],
            vec![Some(1), Some(1), Some(1)],
            vec![Some(0), Some(0), Some(1)],
            vec![Some(1), Some(1), Some(0)],
        ])
        .unwrap();
        let pred_probs = array![[0.8, 0.2], [0.2, 0.8], [0.7, 0.3], [0.3, 0.7]];
        let consensus = vec![0, 1, 0, 1];
        (labels, pred_probs, consensus)
    }

    #[test]
    fn agreement_counts_only_given_labels() {
        let labels = LabelMatrix::from_rows(vec![
            vec![Some(0), Some(0), None],
            vec![Some(1), Some(0), Some(1)],
        ])
        .unwrap();
        let agreement = agreement_with_consensus(&labels, &[0, 1]);
        assert_abs_diff_eq!(agreement[0], 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(agreement[1], 2.0 / 3.0, epsilon = 1e-12);
    }

    #[test]
    fn vote_frequency_posterior_rows_sum_to_one() {
        let labels = LabelMatrix::from_rows(vec![
            vec![Some(0), Some(1), Some(1)],
            vec![Some(2), Some(2), None],
            vec![Some(0), None, None],
        ])
        .unwrap();
        let num_annotations = labels.num_annotations();
        let post = vote_frequency_posterior(&labels, &num_annotations, 3);
        for row in post.rows() {
            assert_abs_diff_eq!(row.sum(), 1.0, epsilon = 1e-12);
        }
        assert_abs_diff_eq!(post[[0, 1]], 2.0 / 3.0, epsilon = 1e-12);
    }

    #[test]
    fn crowdlab_weights_track_annotator_reliability() {
        let (labels, pred_probs, consensus) = three_annotator_fixture();
        let num_annotations = labels.num_annotations();
        let stats = consensus_stats(
            &labels,
            pred_probs.view(),
            &num_annotations,
            &consensus,
            QualityMethod::Crowdlab,
        );

        let ensemble = stats.ensemble.as_ref().unwrap();
        // Annotators 0 and 1 agree with their peers 6 of 8 times, annotator 2
        // only 4 of 8; the floor error is 0.5, so the weights land at 0.5 and
        // the 1e-6 floor respectively.
        assert_abs_diff_eq!(ensemble.annotator_weight[0], 0.5, epsilon = 1e-9);
        assert_abs_diff_eq!(ensemble.annotator_weight[1], 0.5, epsilon = 1e-9);
        assert_abs_diff_eq!(ensemble.annotator_weight[2], 1e-6, epsilon = 1e-12);
        // The model always matches the consensus, so its weight is the full
        // sqrt of the mean annotation count.
        assert_abs_diff_eq!(ensemble.model_weight, 3.0_f64.sqrt(), epsilon = 1e-9);
    }

    #[test]
    fn crowdlab_posterior_rows_are_normalized_distributions() {
        let (labels, pred_probs, consensus) = three_annotator_fixture();
        let num_annotations = labels.num_annotations();
        let stats = consensus_stats(
            &labels,
            pred_probs.view(),
            &num_annotations,
            &consensus,
            QualityMethod::Crowdlab,
        );
        for row in stats.post_pred_probs.rows() {
            assert_abs_diff_eq!(row.sum(), 1.0, epsilon = 1e-9);
            for &value in row {
                assert!((0.0..=1.0).contains(&value));
            }
        }
        // Quality is the posterior mass of the consensus label.
        for (i, &label) in consensus.iter().enumerate() {
            assert_abs_diff_eq!(
                stats.consensus_quality_score[i],
                stats.post_pred_probs[[i, label]],
                epsilon = 1e-12
            );
        }
    }

    #[test]
    fn agreement_method_returns_agreement_as_quality_without_weights() {
        let (labels, pred_probs, consensus) = three_annotator_fixture();
        let num_annotations = labels.num_annotations();
        let stats = consensus_stats(
            &labels,
            pred_probs.view(),
            &num_annotations,
            &consensus,
            QualityMethod::Agreement,
        );
        assert!(stats.ensemble.is_none());
        for i in 0..labels.num_examples() {
            assert_abs_diff_eq!(
                stats.consensus_quality_score[i],
                stats.annotator_agreement[i],
                epsilon = 1e-12
            );
        }
    }

    #[test]
    fn isolated_annotators_are_imputed_the_mean_agreement() {
        // Annotator 2 only labels example 2, which nobody else labeled.
        let labels = LabelMatrix::from_rows(vec![
            vec![Some(0), Some(0), None],
            vec![Some(1), Some(1), None],
            vec![None, None, Some(1)],
        ])
        .unwrap();
        let num_annotations = labels.num_annotations();
        let pairwise = annotator_agreement_with_annotators(&labels, &num_annotations);
        assert_abs_diff_eq!(pairwise[0], 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(pairwise[1], 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(pairwise[2], 1.0, epsilon = 1e-12);
    }

    #[test]
    fn argmax_row_prefers_the_first_maximum() {
        assert_eq!(argmax_row(array![0.4, 0.4, 0.2].view()), 0);
        assert_eq!(argmax_row(array![0.1, 0.2, 0.7].view()), 2);
    }
}
