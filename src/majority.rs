//! # Majority Vote Resolution
//!
//! Computes a baseline consensus label per example as the mode of its given
//! labels. Tied modes are resolved through an ordered cascade, each stage
//! narrowing the tied-candidate set and only re-entering the next stage if a
//! tie persists:
//!
//! 1. Predicted-probability argmax (only when predicted probabilities are
//!    supplied).
//! 2. Global class frequency across the entire label matrix.
//! 3. Mean reliability of the annotators proposing each candidate, where
//!    reliability is each annotator's agreement with the consensus over the
//!    uniquely-moded examples.
//! 4. Uniform random fallback, surfaced as a warning naming the affected
//!    example indices.
//!
//! The work-list of tied examples is snapshotted before each stage and rebuilt
//! from the entries that remain unresolved, never mutated while iterating.

use crate::types::LabelMatrix;
use ahash::AHashMap;
use log::warn;
use ndarray::ArrayView2;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

/// One unresolved example and its surviving candidate classes, kept sorted
/// ascending by class id.
struct TiedExample {
    example: usize,
    candidates: Vec<usize>,
}

/// Returns the majority vote label for each example, aggregated from the
/// labels given by multiple annotators.
///
/// `pred_probs` rows, when supplied, are used as the first tie-break stage.
/// The final random fallback draws from a `StdRng` seeded with `seed`; leave
/// it `None` to seed from entropy (non-reproducible, by design the policy of
/// last resort).
///
/// The matrix is expected to have passed
/// [`validate_label_matrix`](crate::validate::validate_label_matrix); the
/// returned label for each example is always one of that example's given
/// labels.
pub fn majority_vote_label(
    labels: &LabelMatrix,
    pred_probs: Option<ArrayView2<f64>>,
    seed: Option<u64>,
) -> Vec<usize> {
    let n = labels.num_examples();
    let mut consensus = vec![0usize; n];
    let mut nontied: Vec<usize> = Vec::with_capacity(n);
    let mut tied: Vec<TiedExample> = Vec::new();

    // Mode pass: uniquely-moded examples resolve directly and double as the
    // reference set for the reliability stage below.
    for i in 0..n {
        let mut counts: AHashMap<usize, usize> = AHashMap::new();
        for (_, label) in labels.example_labels(i) {
            *counts.entry(label).or_insert(0) += 1;
        }
        let max_count = counts.values().copied().max().unwrap_or(0);
        let mut modes: Vec<usize> = counts
            .iter()
            .filter(|(_, &count)| count == max_count)
            .map(|(&label, _)| label)
            .collect();
        modes.sort_unstable();
        if modes.len() == 1 {
            consensus[i] = modes[0];
            nontied.push(i);
        } else {
            tied.push(TiedExample {
                example: i,
                candidates: modes,
            });
        }
    }

    // Stage 1: model belief.
    if let Some(probs) = pred_probs {
        if !tied.is_empty() {
            tied = resolve_stage(tied, &mut consensus, |t| {
                t.candidates.iter().map(|&c| probs[[t.example, c]]).collect()
            });
        }
    }

    // Stage 2: empirical class frequencies over the whole matrix.
    if !tied.is_empty() {
        let frequencies = labels.class_frequencies(labels.num_classes());
        tied = resolve_stage(tied, &mut consensus, |t| {
            t.candidates
                .iter()
                .map(|&c| frequencies[c] as f64)
                .collect()
        });
    }

    // Stage 3: reliability of the proposing annotators, estimated on the
    // uniquely-moded examples only.
    if !tied.is_empty() {
        let reliability = annotator_reliability(labels, &nontied, &consensus);
        tied = resolve_stage(tied, &mut consensus, |t| {
            t.candidates
                .iter()
                .map(|&c| {
                    let mut sum = 0.0;
                    let mut count = 0usize;
                    for (j, label) in labels.example_labels(t.example) {
                        if label == c {
                            if let Some(r) = reliability[j] {
                                sum += r;
                                count += 1;
                            }
                        }
                    }
                    if count > 0 {
                        sum / count as f64
                    } else {
                        f64::NEG_INFINITY
                    }
                })
                .collect()
        });
    }

    // Stage 4: uniform random fallback.
    if !tied.is_empty() {
        let affected: Vec<usize> = tied.iter().map(|t| t.example).collect();
        warn!(
            "breaking ties of examples {affected:?} by random selection, \
             you may want to set a seed for reproducibility"
        );
        let mut rng = match seed {
            Some(s) => StdRng::seed_from_u64(s),
            None => StdRng::from_entropy(),
        };
        for t in &tied {
            if let Some(&choice) = t.candidates.choose(&mut rng) {
                consensus[t.example] = choice;
            }
        }
    }

    consensus
}

/// Runs one cascade stage: scores every candidate of every tied example,
/// assigns examples whose argmax is unique, and rebuilds the work-list from
/// the rest with their candidate sets shrunk to the argmax-tied subset.
fn resolve_stage<F>(
    tied: Vec<TiedExample>,
    consensus: &mut [usize],
    score: F,
) -> Vec<TiedExample>
where
    F: Fn(&TiedExample) -> Vec<f64>,
{
    let mut still_tied = Vec::new();
    for mut t in tied {
        let scores = score(&t);
        let best = scores.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let winners: Vec<usize> = t
            .candidates
            .iter()
            .zip(&scores)
            .filter(|(_, &s)| s == best)
            .map(|(&c, _)| c)
            .collect();
        if winners.len() == 1 {
            consensus[t.example] = winners[0];
        } else {
            t.candidates = winners;
            still_tied.push(t);
        }
    }
    still_tied
}

/// Per-annotator agreement rate with the consensus over the uniquely-moded
/// examples. `None` for annotators who labeled none of them.
fn annotator_reliability(
    labels: &LabelMatrix,
    nontied: &[usize],
    consensus: &[usize],
) -> Vec<Option<f64>> {
    let m = labels.num_annotators();
    let mut agree = vec![0usize; m];
    let mut total = vec![0usize; m];
    for &i in nontied {
        for (j, label) in labels.example_labels(i) {
            total[j] += 1;
            if label == consensus[i] {
                agree[j] += 1;
            }
        }
    }
    (0..m)
        .map(|j| {
            if total[j] > 0 {
                Some(agree[j] as f64 / total[j] as f64)
            } else {
                None
            }
        })
        .collect()
}
