//! # Structural Validation of Label Matrices
//!
//! This module is the exclusive gatekeeper for user-provided label matrices.
//! It rejects structurally malformed input before any statistics are computed,
//! so the estimators downstream never have to reason about degenerate shapes.
//! Failures are assumed to be caller-input errors; every error names the
//! offending rows or columns.

use crate::types::{ConsensusError, LabelMatrix};
use ahash::AHashSet;
use log::warn;

/// Validates a label matrix against the structural invariants required by the
/// consensus engine:
///
/// - no example row is entirely missing,
/// - no annotator column is entirely missing,
/// - there are at least two annotator columns,
/// - at least one example carries more than one label (otherwise the problem
///   collapses to single-annotator scoring, which is out of scope here).
///
/// Additionally emits a non-fatal diagnostic when no two annotators ever agree
/// on any example, which usually indicates corrupted or mis-aligned input.
pub fn validate_label_matrix(labels: &LabelMatrix) -> Result<(), ConsensusError> {
    let n = labels.num_examples();
    let m = labels.num_annotators();

    let empty_rows: Vec<usize> = (0..n)
        .filter(|&i| labels.example_labels(i).next().is_none())
        .collect();
    if !empty_rows.is_empty() {
        return Err(ConsensusError::EmptyExampleRows(empty_rows));
    }

    let empty_columns: Vec<usize> = (0..m)
        .filter(|&j| labels.annotator_labels(j).next().is_none())
        .collect();
    if !empty_columns.is_empty() {
        return Err(ConsensusError::EmptyAnnotatorColumns(empty_columns));
    }

    if m <= 1 {
        return Err(ConsensusError::TooFewAnnotators { found: m });
    }

    let num_annotations = labels.num_annotations();
    if num_annotations.iter().all(|&count| count == 1) {
        return Err(ConsensusError::SingleAnnotationPerExample);
    }

    if no_example_has_agreement(labels) {
        warn!("Annotators do not agree on any example. Check input data.");
    }

    Ok(())
}

/// True when every example's given labels are pairwise distinct, i.e. no two
/// annotators ever chose the same class for the same example.
fn no_example_has_agreement(labels: &LabelMatrix) -> bool {
    (0..labels.num_examples()).all(|i| {
        let mut seen = AHashSet::new();
        labels.example_labels(i).all(|(_, label)| seen.insert(label))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_a_well_formed_matrix() {
        let labels = LabelMatrix::from_rows(vec![
            vec![Some(0), Some(0), None],
            vec![Some(1), None, Some(1)],
            vec![None, Some(2), Some(2)],
        ])
        .unwrap();
        validate_label_matrix(&labels).unwrap();
    }

    #[test]
    fn rejects_all_missing_rows_naming_them() {
        let labels = LabelMatrix::from_rows(vec![
            vec![Some(0), Some(0)],
            vec![None, None],
            vec![None, None],
        ])
        .unwrap();
        match validate_label_matrix(&labels).unwrap_err() {
            ConsensusError::EmptyExampleRows(rows) => assert_eq!(rows, vec![1, 2]),
            other => panic!("Expected EmptyExampleRows, got {other:?}"),
        }
    }

    #[test]
    fn rejects_all_missing_columns_naming_them() {
        let labels = LabelMatrix::from_rows(vec![
            vec![Some(0), None, Some(0)],
            vec![Some(1), None, Some(1)],
        ])
        .unwrap();
        match validate_label_matrix(&labels).unwrap_err() {
            ConsensusError::EmptyAnnotatorColumns(columns) => assert_eq!(columns, vec![1]),
            other => panic!("Expected EmptyAnnotatorColumns, got {other:?}"),
        }
    }

    #[test]
    fn rejects_a_single_annotator_column() {
        let labels =
            LabelMatrix::from_rows(vec![vec![Some(0)], vec![Some(1)], vec![Some(0)]]).unwrap();
        match validate_label_matrix(&labels).unwrap_err() {
            ConsensusError::TooFewAnnotators { found } => assert_eq!(found, 1),
            other => panic!("Expected TooFewAnnotators, got {other:?}"),
        }
    }

    #[test]
    fn rejects_one_label_per_example_everywhere() {
        let labels = LabelMatrix::from_rows(vec![
            vec![Some(0), None],
            vec![None, Some(1)],
            vec![Some(1), None],
        ])
        .unwrap();
        match validate_label_matrix(&labels).unwrap_err() {
            ConsensusError::SingleAnnotationPerExample => {}
            other => panic!("Expected SingleAnnotationPerExample, got {other:?}"),
        }
    }

    #[test]
    fn detects_fully_disagreeing_annotators() {
        let disagreeing = LabelMatrix::from_rows(vec![
            vec![Some(0), Some(1), None],
            vec![Some(2), None, Some(1)],
        ])
        .unwrap();
        assert!(no_example_has_agreement(&disagreeing));

        let agreeing = LabelMatrix::from_rows(vec![
            vec![Some(0), Some(0), None],
            vec![Some(2), None, Some(1)],
        ])
        .unwrap();
        assert!(!no_example_has_agreement(&agreeing));
    }
}
