//! # Consensus Orchestration
//!
//! The top-level driver. Runs the majority-vote resolver and the consensus
//! quality engine once per requested consensus method, assembles the three
//! output tables, and applies the "best_quality" refinement (re-picking each
//! example's label as the argmax of the posterior produced for majority vote,
//! falling back to the majority vote label on argmax ties).
//!
//! The first requested method is the primary one: it populates the main table
//! columns and drives the detailed-quality matrix and the annotator stats
//! table. Subsequent methods populate suffixed auxiliary columns from fresh
//! engine passes.

use crate::annotator::{annotator_stats, detailed_label_quality, AnnotatorStatsRow};
use crate::consensus::{consensus_stats, ConsensusStats};
use crate::majority::majority_vote_label;
use crate::types::{ConsensusError, ConsensusMethod, LabelMatrix, QualityMethod};
use crate::validate::validate_label_matrix;
use ndarray::{Array1, Array2, ArrayView2};
use serde::Serialize;

/// Tolerance for predicted-probability rows summing to 1.
const ROW_SUM_TOLERANCE: f64 = 1e-3;

/// Options for one orchestrator call.
#[derive(Debug, Clone)]
pub struct ConsensusOptions {
    /// Requested consensus methods; the first is primary, the rest populate
    /// auxiliary columns. Must not be empty.
    pub consensus_methods: Vec<ConsensusMethod>,
    pub quality_method: QualityMethod,
    pub return_detailed_quality: bool,
    pub return_annotator_stats: bool,
    /// Seed for the resolver's random tie-break fallback. `None` seeds from
    /// entropy.
    pub seed: Option<u64>,
}

impl Default for ConsensusOptions {
    fn default() -> Self {
        ConsensusOptions {
            consensus_methods: vec![ConsensusMethod::BestQuality],
            quality_method: QualityMethod::Crowdlab,
            return_detailed_quality: true,
            return_annotator_stats: true,
            seed: None,
        }
    }
}

/// Consensus columns of one auxiliary (non-primary) method.
#[derive(Debug, Clone, Serialize)]
pub struct AlternativeConsensus {
    pub method: ConsensusMethod,
    pub consensus_label: Vec<usize>,
    pub consensus_quality_score: Array1<f64>,
    pub annotator_agreement: Array1<f64>,
}

/// The per-example consensus table.
#[derive(Debug, Clone, Serialize)]
pub struct LabelQualityTable {
    pub num_annotations: Array1<usize>,
    pub consensus_label: Vec<usize>,
    pub consensus_quality_score: Array1<f64>,
    pub annotator_agreement: Array1<f64>,
    /// Suffixed columns of the non-primary methods, in request order.
    pub alternatives: Vec<AlternativeConsensus>,
}

/// The three output tables of one orchestrator call.
#[derive(Debug, Clone, Serialize)]
pub struct ConsensusReport {
    pub label_quality: LabelQualityTable,
    pub detailed_label_quality: Option<Array2<Option<f64>>>,
    pub annotator_stats: Option<Vec<AnnotatorStatsRow>>,
}

/// Aggregates multi-annotator labels and model predictions into consensus
/// labels, per-example trust scores, and per-annotator diagnostics.
pub fn label_quality_multiannotator(
    labels: &LabelMatrix,
    pred_probs: ArrayView2<f64>,
    options: &ConsensusOptions,
) -> Result<ConsensusReport, ConsensusError> {
    validate_label_matrix(labels)?;
    validate_pred_probs(labels, pred_probs)?;
    let (&primary_method, aux_methods) = options
        .consensus_methods
        .split_first()
        .ok_or(ConsensusError::NoConsensusMethod)?;

    let num_annotations = labels.num_annotations();

    // Both methods start from the majority vote and its engine pass.
    let mv_label = majority_vote_label(labels, Some(pred_probs), options.seed);
    let mv_stats = consensus_stats(
        labels,
        pred_probs,
        &num_annotations,
        &mv_label,
        options.quality_method,
    );

    let run_method = |method: ConsensusMethod| -> (Vec<usize>, ConsensusStats) {
        match method {
            ConsensusMethod::MajorityVote => (mv_label.clone(), mv_stats.clone()),
            ConsensusMethod::BestQuality => {
                let refined = best_quality_label(&mv_label, mv_stats.post_pred_probs.view());
                // A second, independent pass: weights are recomputed from
                // scratch for the refined labels, not reused.
                let stats = consensus_stats(
                    labels,
                    pred_probs,
                    &num_annotations,
                    &refined,
                    options.quality_method,
                );
                (refined, stats)
            }
        }
    };

    let (consensus_label, stats) = run_method(primary_method);

    let alternatives = aux_methods
        .iter()
        .map(|&method| {
            let (label, aux_stats) = run_method(method);
            AlternativeConsensus {
                method,
                consensus_label: label,
                consensus_quality_score: aux_stats.consensus_quality_score,
                annotator_agreement: aux_stats.annotator_agreement,
            }
        })
        .collect();

    let detailed = options
        .return_detailed_quality
        .then(|| detailed_label_quality(labels, stats.post_pred_probs.view()));
    let stats_table = options
        .return_annotator_stats
        .then(|| annotator_stats(labels, &stats, &consensus_label, &num_annotations));

    Ok(ConsensusReport {
        label_quality: LabelQualityTable {
            num_annotations,
            consensus_label,
            consensus_quality_score: stats.consensus_quality_score,
            annotator_agreement: stats.annotator_agreement,
            alternatives,
        },
        detailed_label_quality: detailed,
        annotator_stats: stats_table,
    })
}

/// Re-picks each example's label as the argmax of the majority-vote posterior,
/// falling back to the majority-vote label when the argmax is not unique.
fn best_quality_label(majority_vote: &[usize], post_pred_probs: ArrayView2<f64>) -> Vec<usize> {
    post_pred_probs
        .rows()
        .into_iter()
        .enumerate()
        .map(|(i, row)| {
            let best = row.iter().copied().fold(f64::NEG_INFINITY, f64::max);
            let mut winners = row.iter().enumerate().filter(|(_, &v)| v == best);
            match (winners.next(), winners.next()) {
                (Some((class, _)), None) => class,
                _ => majority_vote[i],
            }
        })
        .collect()
}

/// Checks the predicted-probability matrix against the label matrix: matching
/// row counts, rows normalized within tolerance, and every given label within
/// the class range the matrix covers.
fn validate_pred_probs(
    labels: &LabelMatrix,
    pred_probs: ArrayView2<f64>,
) -> Result<(), ConsensusError> {
    if pred_probs.nrows() != labels.num_examples() {
        return Err(ConsensusError::PredProbsRowMismatch {
            expected: labels.num_examples(),
            found: pred_probs.nrows(),
        });
    }
    for (i, row) in pred_probs.rows().into_iter().enumerate() {
        let sum = row.sum();
        if (sum - 1.0).abs() > ROW_SUM_TOLERANCE {
            return Err(ConsensusError::PredProbsNotNormalized { row: i, sum });
        }
    }
    let num_classes = pred_probs.ncols();
    for i in 0..labels.num_examples() {
        for (j, label) in labels.example_labels(i) {
            if label >= num_classes {
                return Err(ConsensusError::LabelOutOfRange {
                    label,
                    num_classes,
                    row: i,
                    column: j,
                });
            }
        }
    }
    Ok(())
}
