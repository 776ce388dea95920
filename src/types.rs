// ========================================================================================
//                             High-Level Data Contracts
// ========================================================================================

// This file is ONLY for types that are SHARED BETWEEN FILES, not types that only are
// used in one file.

use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// A comprehensive error type for all structural validation and method-selection
/// failures. Failures are assumed to be caller-input errors, so every variant
/// names the offending rows, columns, or argument.
#[derive(Error, Debug)]
pub enum ConsensusError {
    #[error(
        "Label matrix rows {0:?} contain no labels. Every example must be labeled by at least one annotator."
    )]
    EmptyExampleRows(Vec<usize>),
    #[error(
        "Label matrix columns {0:?} contain no labels. Annotators who labeled no examples must be dropped before aggregation."
    )]
    EmptyAnnotatorColumns(Vec<usize>),
    #[error(
        "The label matrix has {found} annotator column(s), but at least 2 are required. With a single annotator, score the labels directly with the single-label quality scorer."
    )]
    TooFewAnnotators { found: usize },
    #[error(
        "Every example carries exactly one label. Collapse the labels into a single vector and use the single-label quality scorer instead."
    )]
    SingleAnnotationPerExample,
    #[error("Row {row} of the label matrix has {found} cells, but the first row has {expected}.")]
    RaggedRow {
        row: usize,
        expected: usize,
        found: usize,
    },
    #[error(
        "The predicted-probability matrix has {found} row(s), but the label matrix has {expected} example(s)."
    )]
    PredProbsRowMismatch { expected: usize, found: usize },
    #[error(
        "Row {row} of the predicted-probability matrix sums to {sum:.6}; each row must be a probability distribution summing to 1."
    )]
    PredProbsNotNormalized { row: usize, sum: f64 },
    #[error(
        "Label {label} at example {row}, annotator {column} is outside the {num_classes} classes covered by the predicted-probability matrix."
    )]
    LabelOutOfRange {
        label: usize,
        num_classes: usize,
        row: usize,
        column: usize,
    },
    #[error(
        "'{0}' is not a valid consensus method. Valid methods: [\"majority_vote\", \"best_quality\"]."
    )]
    UnknownConsensusMethod(String),
    #[error(
        "'{0}' is not a valid quality method. Valid methods: [\"crowdlab\", \"agreement\"]."
    )]
    UnknownQualityMethod(String),
    #[error("At least one consensus method must be requested.")]
    NoConsensusMethod,
    #[error(
        "Task '{task}' carries more than one label from annotator '{annotator}'. Each (task, annotator) pair may appear at most once in long format."
    )]
    DuplicateAssignment { task: String, annotator: String },
}

/// How the per-example consensus label is derived.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConsensusMethod {
    /// Simple majority vote among annotators, ties broken by the cascade in
    /// the resolver.
    MajorityVote,
    /// Argmax of the posterior computed for the majority vote, falling back to
    /// the majority vote label when the argmax is not unique.
    BestQuality,
}

impl ConsensusMethod {
    /// Stable name used for suffixed output columns and CLI arguments.
    pub fn name(&self) -> &'static str {
        match self {
            ConsensusMethod::MajorityVote => "majority_vote",
            ConsensusMethod::BestQuality => "best_quality",
        }
    }
}

impl fmt::Display for ConsensusMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ConsensusMethod {
    type Err = ConsensusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "majority_vote" => Ok(ConsensusMethod::MajorityVote),
            "best_quality" => Ok(ConsensusMethod::BestQuality),
            other => Err(ConsensusError::UnknownConsensusMethod(other.to_string())),
        }
    }
}

/// How consensus and annotator quality scores are computed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum QualityMethod {
    /// Weighted ensemble of the external model's prediction and individually
    /// weighted annotator votes.
    Crowdlab,
    /// Pure crowd vote frequency; the external model is ignored.
    Agreement,
}

impl QualityMethod {
    pub fn name(&self) -> &'static str {
        match self {
            QualityMethod::Crowdlab => "crowdlab",
            QualityMethod::Agreement => "agreement",
        }
    }
}

impl fmt::Display for QualityMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for QualityMethod {
    type Err = ConsensusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "crowdlab" => Ok(QualityMethod::Crowdlab),
            "agreement" => Ok(QualityMethod::Agreement),
            other => Err(ConsensusError::UnknownQualityMethod(other.to_string())),
        }
    }
}

/// An N examples x M annotators matrix of given labels. A cell is `Some(class)`
/// when the annotator labeled the example and `None` when they did not; missing
/// cells are typed, never a sentinel value, so they cannot leak into arithmetic
/// reductions. Immutable for the duration of a computation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelMatrix {
    cells: Array2<Option<usize>>,
}

impl LabelMatrix {
    pub fn new(cells: Array2<Option<usize>>) -> Self {
        LabelMatrix { cells }
    }

    /// Builds a matrix from per-example rows, rejecting ragged input.
    pub fn from_rows(rows: Vec<Vec<Option<usize>>>) -> Result<Self, ConsensusError> {
        let n = rows.len();
        let m = rows.first().map_or(0, Vec::len);
        for (i, row) in rows.iter().enumerate() {
            if row.len() != m {
                return Err(ConsensusError::RaggedRow {
                    row: i,
                    expected: m,
                    found: row.len(),
                });
            }
        }
        let flat: Vec<Option<usize>> = rows.into_iter().flatten().collect();
        let cells = Array2::from_shape_vec((n, m), flat)
            .expect("row-major buffer length matches the checked (n, m) shape");
        Ok(LabelMatrix { cells })
    }

    pub fn num_examples(&self) -> usize {
        self.cells.nrows()
    }

    pub fn num_annotators(&self) -> usize {
        self.cells.ncols()
    }

    pub fn get(&self, example: usize, annotator: usize) -> Option<usize> {
        self.cells[[example, annotator]]
    }

    /// The given labels of one example as (annotator index, label) pairs, in
    /// annotator order, skipping missing cells.
    pub fn example_labels(&self, example: usize) -> impl Iterator<Item = (usize, usize)> + '_ {
        self.cells
            .row(example)
            .into_iter()
            .enumerate()
            .filter_map(|(j, &cell)| cell.map(|label| (j, label)))
    }

    /// The given labels of one annotator as (example index, label) pairs, in
    /// example order, skipping missing cells.
    pub fn annotator_labels(&self, annotator: usize) -> impl Iterator<Item = (usize, usize)> + '_ {
        self.cells
            .column(annotator)
            .into_iter()
            .enumerate()
            .filter_map(|(i, &cell)| cell.map(|label| (i, label)))
    }

    /// Number of annotators that labeled each example.
    pub fn num_annotations(&self) -> Array1<usize> {
        Array1::from_iter(
            self.cells
                .rows()
                .into_iter()
                .map(|row| row.iter().filter(|cell| cell.is_some()).count()),
        )
    }

    /// Number of examples labeled by each annotator.
    pub fn num_examples_labeled(&self) -> Array1<usize> {
        Array1::from_iter(
            self.cells
                .columns()
                .into_iter()
                .map(|col| col.iter().filter(|cell| cell.is_some()).count()),
        )
    }

    /// Smallest class count covering every given label, i.e. max label + 1.
    pub fn num_classes(&self) -> usize {
        self.cells
            .iter()
            .filter_map(|cell| *cell)
            .max()
            .map_or(0, |label| label + 1)
    }

    /// Total count of each class across the entire matrix, summed over all
    /// examples and annotators.
    pub fn class_frequencies(&self, num_classes: usize) -> Vec<usize> {
        let mut counts = vec![0usize; num_classes];
        for label in self.cells.iter().filter_map(|cell| *cell) {
            counts[label] += 1;
        }
        counts
    }
}
