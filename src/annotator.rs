//! # Per-Annotator Diagnostics
//!
//! Overall quality, agreement with the consensus, most-misclassified class,
//! and label counts for each annotator, plus the sparse per-annotator
//! per-example quality matrix. All statistics are computed against the
//! posterior and weights of one consensus pass.

use crate::consensus::ConsensusStats;
use crate::rank;
use crate::types::LabelMatrix;
use ndarray::{Array1, Array2, ArrayView2, Axis};
use serde::Serialize;
use std::collections::BTreeMap;

/// One row of the annotator stats table.
#[derive(Debug, Clone, Serialize)]
pub struct AnnotatorStatsRow {
    /// Column index of the annotator in the label matrix.
    pub annotator: usize,
    pub annotator_quality: f64,
    pub agreement_with_consensus: f64,
    /// The class this annotator most frequently mislabels.
    pub worst_class: usize,
    pub num_examples_labeled: usize,
}

/// Computes the per-annotator stats table, sorted ascending by
/// (annotator_quality, agreement_with_consensus) so the least reliable
/// annotators come first. NaN qualities (annotators with no multiply-annotated
/// examples) sort last.
pub fn annotator_stats(
    labels: &LabelMatrix,
    stats: &ConsensusStats,
    consensus_label: &[usize],
    num_annotations: &Array1<usize>,
) -> Vec<AnnotatorStatsRow> {
    let m = labels.num_annotators();
    let quality = annotator_quality(labels, stats, consensus_label, num_annotations);
    let num_examples_labeled = labels.num_examples_labeled();

    let mut rows: Vec<AnnotatorStatsRow> = (0..m)
        .map(|j| {
            let mut given = 0usize;
            let mut matching = 0usize;
            for (i, label) in labels.annotator_labels(j) {
                given += 1;
                if label == consensus_label[i] {
                    matching += 1;
                }
            }
            AnnotatorStatsRow {
                annotator: j,
                annotator_quality: quality[j],
                agreement_with_consensus: matching as f64 / given as f64,
                worst_class: annotator_worst_class(
                    labels,
                    j,
                    consensus_label,
                    &stats.consensus_quality_score,
                ),
                num_examples_labeled: num_examples_labeled[j],
            }
        })
        .collect();

    rows.sort_by(|a, b| {
        a.annotator_quality
            .total_cmp(&b.annotator_quality)
            .then(a.agreement_with_consensus.total_cmp(&b.agreement_with_consensus))
    });
    rows
}

/// Label quality scores for each annotator's own labels, scored against the
/// posterior rows of the examples they labeled. `None` where the annotator did
/// not label.
pub fn detailed_label_quality(
    labels: &LabelMatrix,
    post_pred_probs: ArrayView2<f64>,
) -> Array2<Option<f64>> {
    let n = labels.num_examples();
    let m = labels.num_annotators();
    let mut detailed = Array2::from_elem((n, m), None);
    for j in 0..m {
        let (examples, given): (Vec<usize>, Vec<usize>) = labels.annotator_labels(j).unzip();
        if examples.is_empty() {
            continue;
        }
        let probs_subset = post_pred_probs.select(Axis(0), &examples);
        let scores = rank::label_quality_scores(&given, probs_subset.view());
        for (&i, &score) in examples.iter().zip(scores.iter()) {
            detailed[[i, j]] = Some(score);
        }
    }
    detailed
}

/// Overall quality score per annotator.
///
/// With crowdlab ensemble weights available, the score blends the mean label
/// quality of the annotator's own labels with their agreement-with-consensus
/// over multiply-annotated examples, mixed by the model's share of the total
/// ensemble mass. Without ensemble weights (the agreement method), the score
/// is the agreement over multiply-annotated examples alone.
fn annotator_quality(
    labels: &LabelMatrix,
    stats: &ConsensusStats,
    consensus_label: &[usize],
    num_annotations: &Array1<usize>,
) -> Array1<f64> {
    let m = labels.num_annotators();
    let multi_agreement = Array1::from_iter((0..m).map(|j| {
        let mut given = 0usize;
        let mut matching = 0usize;
        for (i, label) in labels.annotator_labels(j) {
            if num_annotations[i] == 1 {
                continue;
            }
            given += 1;
            if label == consensus_label[i] {
                matching += 1;
            }
        }
        matching as f64 / given as f64
    }));

    match &stats.ensemble {
        Some(ensemble) => {
            let own_label_quality = Array1::from_iter((0..m).map(|j| {
                let (examples, given): (Vec<usize>, Vec<usize>) =
                    labels.annotator_labels(j).unzip();
                let probs_subset = stats.post_pred_probs.select(Axis(0), &examples);
                rank::label_quality_scores(&given, probs_subset.view()).mean().unwrap_or(f64::NAN)
            }));

            let mean_annotations = num_annotations.iter().map(|&c| c as f64).sum::<f64>()
                / num_annotations.len() as f64;
            let annotator_mass =
                ensemble.annotator_weight.sum() * (mean_annotations / m as f64);
            let w = ensemble.model_weight / (ensemble.model_weight + annotator_mass);
            own_label_quality * w + multi_agreement * (1.0 - w)
        }
        None => multi_agreement,
    }
}

/// The class on which this annotator's given labels least often match the
/// consensus. Ties resolve to the largest group, then the group with the
/// highest mean consensus quality, then the first remaining class id.
fn annotator_worst_class(
    labels: &LabelMatrix,
    annotator: usize,
    consensus_label: &[usize],
    consensus_quality_score: &Array1<f64>,
) -> usize {
    let mut groups: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
    for (i, label) in labels.annotator_labels(annotator) {
        groups.entry(label).or_default().push(i);
    }

    // (class, accuracy, count, mean consensus quality), ascending by class id.
    let summaries: Vec<(usize, f64, usize, f64)> = groups
        .iter()
        .map(|(&class, examples)| {
            let correct = examples
                .iter()
                .filter(|&&i| consensus_label[i] == class)
                .count();
            let accuracy = correct as f64 / examples.len() as f64;
            let mean_quality = examples
                .iter()
                .map(|&i| consensus_quality_score[i])
                .sum::<f64>()
                / examples.len() as f64;
            (class, accuracy, examples.len(), mean_quality)
        })
        .collect();

    let min_accuracy = summaries
        .iter()
        .map(|&(_, accuracy, _, _)| accuracy)
        .fold(f64::INFINITY, f64::min);
    let mut candidates: Vec<&(usize, f64, usize, f64)> = summaries
        .iter()
        .filter(|&&(_, accuracy, _, _)| accuracy == min_accuracy)
        .collect();
    if candidates.len() == 1 {
        return candidates[0].0;
    }

    // tiebreak 1: class counts
    let max_count = candidates
        .iter()
        .map(|&&(_, _, count, _)| count)
        .max()
        .unwrap_or(0);
    candidates.retain(|&&(_, _, count, _)| count == max_count);
    if candidates.len() == 1 {
        return candidates[0].0;
    }

    // tiebreak 2: consensus quality scores
    let max_quality = candidates
        .iter()
        .map(|&&(_, _, _, quality)| quality)
        .fold(f64::NEG_INFINITY, f64::max);
    candidates.retain(|&&(_, _, _, quality)| quality == max_quality);

    // first remaining class even if still tied; there is no better tiebreak
    candidates[0].0
}
