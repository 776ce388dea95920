//! # Long/Wide Reshaping
//!
//! Converts a (task, annotator, label) relational table into the wide label
//! matrix the consensus engine consumes, and back. Purely structural: built
//! with single-pass hash-map accumulation, identifiers are preserved, and
//! tasks/annotators are ordered lexicographically so the mapping is
//! deterministic.

use crate::types::{ConsensusError, LabelMatrix};
use ahash::AHashMap;
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// One row of a long-format annotation table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LongRecord {
    pub task: String,
    pub annotator: String,
    pub label: usize,
}

/// A label matrix together with the task and annotator identifiers its rows
/// and columns were pivoted from.
#[derive(Debug, Clone)]
pub struct WideDataset {
    pub labels: LabelMatrix,
    /// Row identifiers, lexicographically ordered.
    pub tasks: Vec<String>,
    /// Column identifiers, lexicographically ordered.
    pub annotators: Vec<String>,
}

/// Pivots long-format records into a wide label matrix. Each (task, annotator)
/// pair may appear at most once; duplicates are a structural error.
pub fn long_to_wide(records: &[LongRecord]) -> Result<WideDataset, ConsensusError> {
    let tasks: Vec<String> = records
        .iter()
        .map(|record| record.task.clone())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();
    let annotators: Vec<String> = records
        .iter()
        .map(|record| record.annotator.clone())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();

    let task_index: AHashMap<&str, usize> = tasks
        .iter()
        .enumerate()
        .map(|(i, task)| (task.as_str(), i))
        .collect();
    let annotator_index: AHashMap<&str, usize> = annotators
        .iter()
        .enumerate()
        .map(|(j, annotator)| (annotator.as_str(), j))
        .collect();

    let mut cells = Array2::from_elem((tasks.len(), annotators.len()), None);
    for record in records {
        let i = task_index[record.task.as_str()];
        let j = annotator_index[record.annotator.as_str()];
        if cells[[i, j]].is_some() {
            return Err(ConsensusError::DuplicateAssignment {
                task: record.task.clone(),
                annotator: record.annotator.clone(),
            });
        }
        cells[[i, j]] = Some(record.label);
    }

    Ok(WideDataset {
        labels: LabelMatrix::new(cells),
        tasks,
        annotators,
    })
}

/// Unpivots a wide dataset back into long-format records, one per non-missing
/// cell, in row-major order.
pub fn wide_to_long(dataset: &WideDataset) -> Vec<LongRecord> {
    let mut records = Vec::new();
    for (i, task) in dataset.tasks.iter().enumerate() {
        for (j, label) in dataset.labels.example_labels(i) {
            records.push(LongRecord {
                task: task.clone(),
                annotator: dataset.annotators[j].clone(),
                label,
            });
        }
    }
    records
}
