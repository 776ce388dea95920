use approx::assert_abs_diff_eq;
use ndarray::{array, Array2};
use quorum::majority::majority_vote_label;
use quorum::report::{label_quality_multiannotator, ConsensusOptions};
use quorum::reshape::{long_to_wide, wide_to_long, LongRecord};
use quorum::types::{ConsensusMethod, LabelMatrix, QualityMethod};
use std::io::Write;

/// Eight tasks, four annotators, three classes, with a sprinkling of missing
/// cells and one even 2-2 split that only the model can break.
fn fixture() -> (LabelMatrix, Array2<f64>) {
    let labels = LabelMatrix::from_rows(vec![
        vec![Some(0), Some(0), Some(0), None],
        vec![Some(1), Some(1), None, Some(1)],
        vec![Some(2), Some(2), Some(2), Some(2)],
        vec![Some(0), Some(1), Some(0), Some(0)],
        vec![Some(1), None, Some(1), Some(2)],
        vec![None, Some(2), Some(2), Some(2)],
        vec![Some(0), Some(0), Some(1), Some(1)],
        vec![Some(1), Some(1), Some(2), None],
    ])
    .unwrap();
    let pred_probs = array![
        [0.8, 0.1, 0.1],
        [0.1, 0.8, 0.1],
        [0.05, 0.15, 0.8],
        [0.7, 0.2, 0.1],
        [0.2, 0.6, 0.2],
        [0.1, 0.2, 0.7],
        [0.3, 0.6, 0.1],
        [0.2, 0.7, 0.1]
    ];
    (labels, pred_probs)
}

#[test]
fn end_to_end_crowdlab_report_is_consistent() {
    let (labels, pred_probs) = fixture();
    let options = ConsensusOptions {
        consensus_methods: vec![ConsensusMethod::MajorityVote, ConsensusMethod::BestQuality],
        seed: Some(0),
        ..ConsensusOptions::default()
    };
    let report = label_quality_multiannotator(&labels, pred_probs.view(), &options).unwrap();
    let n = labels.num_examples();

    // The primary method is majority_vote, so the main consensus column must
    // agree exactly with the standalone resolver.
    let standalone = majority_vote_label(&labels, Some(pred_probs.view()), Some(0));
    assert_eq!(report.label_quality.consensus_label, standalone);

    // The even split on example 6 is broken by the model in favor of class 1.
    assert_eq!(report.label_quality.consensus_label[6], 1);

    // Majority-vote consensus labels never invent an unobserved class.
    for (i, &label) in report.label_quality.consensus_label.iter().enumerate() {
        let given: Vec<usize> = labels.example_labels(i).map(|(_, l)| l).collect();
        assert!(given.contains(&label));
    }

    assert_eq!(report.label_quality.num_annotations.len(), n);
    assert_eq!(report.label_quality.consensus_quality_score.len(), n);
    for &score in &report.label_quality.consensus_quality_score {
        assert!((0.0..=1.0).contains(&score));
    }

    // One auxiliary method: best_quality.
    assert_eq!(report.label_quality.alternatives.len(), 1);
    assert_eq!(
        report.label_quality.alternatives[0].method,
        ConsensusMethod::BestQuality
    );
    assert_eq!(
        report.label_quality.alternatives[0].consensus_label.len(),
        n
    );

    // The detailed quality matrix is sparse exactly where the labels are.
    let detailed = report.detailed_label_quality.as_ref().unwrap();
    for i in 0..n {
        for j in 0..labels.num_annotators() {
            assert_eq!(detailed[[i, j]].is_some(), labels.get(i, j).is_some());
        }
    }
}

#[test]
fn annotator_stats_rows_are_sorted_ascending() {
    let (labels, pred_probs) = fixture();
    let options = ConsensusOptions {
        seed: Some(0),
        ..ConsensusOptions::default()
    };
    let report = label_quality_multiannotator(&labels, pred_probs.view(), &options).unwrap();
    let stats = report.annotator_stats.as_ref().unwrap();
    assert_eq!(stats.len(), labels.num_annotators());

    for pair in stats.windows(2) {
        let ordered = pair[0].annotator_quality < pair[1].annotator_quality
            || (pair[0].annotator_quality == pair[1].annotator_quality
                && pair[0].agreement_with_consensus <= pair[1].agreement_with_consensus);
        assert!(
            ordered,
            "annotator stats must sort ascending by (quality, agreement)"
        );
    }
}

#[test]
fn agreement_method_reports_agreement_as_quality() {
    let (labels, pred_probs) = fixture();
    let options = ConsensusOptions {
        consensus_methods: vec![ConsensusMethod::MajorityVote],
        quality_method: QualityMethod::Agreement,
        seed: Some(0),
        ..ConsensusOptions::default()
    };
    let report = label_quality_multiannotator(&labels, pred_probs.view(), &options).unwrap();

    // Quality equals agreement for the agreement method.
    for i in 0..labels.num_examples() {
        assert_abs_diff_eq!(
            report.label_quality.consensus_quality_score[i],
            report.label_quality.annotator_agreement[i],
            epsilon = 1e-12
        );
    }
}

#[test]
fn long_format_csv_round_trips_through_the_pivot() {
    let records = vec![
        ("t1", "alice", 0),
        ("t1", "bob", 0),
        ("t2", "alice", 1),
        ("t2", "carol", 1),
        ("t3", "bob", 2),
        ("t3", "carol", 0),
    ];

    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "task,annotator,label").unwrap();
    for (task, annotator, label) in &records {
        writeln!(file, "{task},{annotator},{label}").unwrap();
    }
    file.flush().unwrap();

    let mut reader = csv::Reader::from_path(file.path()).unwrap();
    let parsed: Vec<LongRecord> = reader.deserialize().map(|r| r.unwrap()).collect();
    assert_eq!(parsed.len(), records.len());

    let wide = long_to_wide(&parsed).unwrap();
    let mut recovered = wide_to_long(&wide);
    let mut expected = parsed.clone();
    let key = |r: &LongRecord| (r.task.clone(), r.annotator.clone(), r.label);
    recovered.sort_by_key(key);
    expected.sort_by_key(key);
    assert_eq!(recovered, expected);
}
