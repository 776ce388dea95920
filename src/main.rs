// ========================================================================================
//
//                           The strategic orchestrator: Quorum
//
// ========================================================================================
//
// The command-line driver. Its sole responsibility is to move tables in and out
// of the consensus engine: read a long-format annotation CSV and a
// predicted-probability CSV, run the orchestrator, and write the three output
// tables as TSV. All statistics live in the library modules.

#![deny(dead_code)]
#![deny(unused_imports)]

use clap::Parser;
use log::info;
use ndarray::Array2;
use quorum::annotator::AnnotatorStatsRow;
use quorum::report::{label_quality_multiannotator, ConsensusOptions, ConsensusReport};
use quorum::reshape::{long_to_wide, LongRecord, WideDataset};
use quorum::types::{ConsensusMethod, QualityMethod};
use std::error::Error;
use std::fs;
use std::path::{Path, PathBuf};
use std::process;

// ========================================================================================
//                              Command-line interface definition
// ========================================================================================

#[derive(Parser, Debug)]
#[clap(
    name = "quorum",
    version,
    about = "A high-performance engine for crowd-label consensus and annotator quality estimation."
)]
struct Args {
    /// Long-format annotation CSV with `task`, `annotator` and `label` columns.
    #[clap(value_name = "LABELS_CSV")]
    labels: PathBuf,

    /// Predicted-probability CSV: a `task` column followed by one column per
    /// class, in class-id order.
    #[clap(value_name = "PRED_PROBS_CSV")]
    pred_probs: PathBuf,

    /// Directory the three output TSV tables are written to.
    #[clap(long, default_value = "quorum-out")]
    out_dir: PathBuf,

    /// Consensus methods, primary first.
    #[clap(long, value_delimiter = ',', default_value = "best_quality")]
    consensus_method: Vec<ConsensusMethod>,

    /// Quality method used for consensus and annotator scores.
    #[clap(long, default_value = "crowdlab")]
    quality_method: QualityMethod,

    /// Seed for the resolver's random tie-break fallback.
    #[clap(long)]
    seed: Option<u64>,

    /// Skip the per-(example, annotator) detailed quality table.
    #[clap(long)]
    no_detailed_quality: bool,

    /// Skip the per-annotator stats table.
    #[clap(long)]
    no_annotator_stats: bool,
}

fn main() {
    env_logger::init();
    let args = Args::parse();
    if let Err(error) = run(&args) {
        eprintln!("error: {error}");
        process::exit(1);
    }
}

fn run(args: &Args) -> Result<(), Box<dyn Error>> {
    let records = read_long_records(&args.labels)?;
    let wide = long_to_wide(&records)?;
    info!(
        "loaded {} annotations over {} tasks and {} annotators",
        records.len(),
        wide.tasks.len(),
        wide.annotators.len()
    );

    let pred_probs = read_pred_probs(&args.pred_probs, &wide.tasks)?;
    let options = ConsensusOptions {
        consensus_methods: args.consensus_method.clone(),
        quality_method: args.quality_method,
        return_detailed_quality: !args.no_detailed_quality,
        return_annotator_stats: !args.no_annotator_stats,
        seed: args.seed,
    };
    let report = label_quality_multiannotator(&wide.labels, pred_probs.view(), &options)?;

    fs::create_dir_all(&args.out_dir)?;
    write_label_quality(&args.out_dir.join("label_quality.tsv"), &wide, &report)?;
    if let Some(detailed) = &report.detailed_label_quality {
        write_detailed_quality(
            &args.out_dir.join("detailed_label_quality.tsv"),
            &wide,
            detailed,
        )?;
    }
    if let Some(stats) = &report.annotator_stats {
        write_annotator_stats(&args.out_dir.join("annotator_stats.tsv"), &wide, stats)?;
    }
    info!("wrote output tables to {}", args.out_dir.display());
    Ok(())
}

// ========================================================================================
//                              Table input and output
// ========================================================================================

fn read_long_records(path: &Path) -> Result<Vec<LongRecord>, Box<dyn Error>> {
    let mut reader = csv::Reader::from_path(path)?;
    let mut records = Vec::new();
    for result in reader.deserialize() {
        let record: LongRecord = result?;
        records.push(record);
    }
    Ok(records)
}

/// Reads the predicted-probability table and reorders its rows to match the
/// lexicographic task order of the pivoted label matrix.
fn read_pred_probs(path: &Path, tasks: &[String]) -> Result<Array2<f64>, Box<dyn Error>> {
    let mut reader = csv::Reader::from_path(path)?;
    let mut by_task: ahash::AHashMap<String, Vec<f64>> = ahash::AHashMap::new();
    let mut num_classes = None;
    for result in reader.records() {
        let row = result?;
        let task = row
            .get(0)
            .ok_or("predicted-probability rows must start with a task column")?
            .to_string();
        let probs: Vec<f64> = row
            .iter()
            .skip(1)
            .map(|field| field.trim().parse::<f64>())
            .collect::<Result<_, _>>()?;
        match num_classes {
            None => num_classes = Some(probs.len()),
            Some(k) if k != probs.len() => {
                return Err(format!(
                    "predicted-probability row for task '{task}' has {} classes, expected {k}",
                    probs.len()
                )
                .into());
            }
            Some(_) => {}
        }
        by_task.insert(task, probs);
    }

    let k = num_classes.ok_or("the predicted-probability table is empty")?;
    let mut flat = Vec::with_capacity(tasks.len() * k);
    for task in tasks {
        let probs = by_task
            .get(task)
            .ok_or_else(|| format!("no predicted probabilities for task '{task}'"))?;
        flat.extend_from_slice(probs);
    }
    Ok(Array2::from_shape_vec((tasks.len(), k), flat)?)
}

fn write_label_quality(
    path: &Path,
    wide: &WideDataset,
    report: &ConsensusReport,
) -> Result<(), Box<dyn Error>> {
    let table = &report.label_quality;
    let mut writer = csv::WriterBuilder::new().delimiter(b'\t').from_path(path)?;

    let mut header = vec![
        "task".to_string(),
        "num_annotations".to_string(),
        "consensus_label".to_string(),
        "consensus_quality_score".to_string(),
        "annotator_agreement".to_string(),
    ];
    for alternative in &table.alternatives {
        let suffix = alternative.method.name();
        header.push(format!("consensus_label_{suffix}"));
        header.push(format!("consensus_quality_score_{suffix}"));
        header.push(format!("annotator_agreement_{suffix}"));
    }
    writer.write_record(&header)?;

    for (i, task) in wide.tasks.iter().enumerate() {
        let mut row = vec![
            task.clone(),
            table.num_annotations[i].to_string(),
            table.consensus_label[i].to_string(),
            table.consensus_quality_score[i].to_string(),
            table.annotator_agreement[i].to_string(),
        ];
        for alternative in &table.alternatives {
            row.push(alternative.consensus_label[i].to_string());
            row.push(alternative.consensus_quality_score[i].to_string());
            row.push(alternative.annotator_agreement[i].to_string());
        }
        writer.write_record(&row)?;
    }
    writer.flush()?;
    Ok(())
}

fn write_detailed_quality(
    path: &Path,
    wide: &WideDataset,
    detailed: &Array2<Option<f64>>,
) -> Result<(), Box<dyn Error>> {
    let mut writer = csv::WriterBuilder::new().delimiter(b'\t').from_path(path)?;

    let mut header = vec!["task".to_string()];
    header.extend(
        wide.annotators
            .iter()
            .map(|annotator| format!("quality_annotator_{annotator}")),
    );
    writer.write_record(&header)?;

    for (i, task) in wide.tasks.iter().enumerate() {
        let mut row = vec![task.clone()];
        for j in 0..wide.annotators.len() {
            row.push(match detailed[[i, j]] {
                Some(score) => score.to_string(),
                None => String::new(),
            });
        }
        writer.write_record(&row)?;
    }
    writer.flush()?;
    Ok(())
}

fn write_annotator_stats(
    path: &Path,
    wide: &WideDataset,
    stats: &[AnnotatorStatsRow],
) -> Result<(), Box<dyn Error>> {
    let mut writer = csv::WriterBuilder::new().delimiter(b'\t').from_path(path)?;
    writer.write_record([
        "annotator",
        "annotator_quality",
        "agreement_with_consensus",
        "worst_class",
        "num_examples_labeled",
    ])?;
    for row in stats {
        writer.write_record(&[
            wide.annotators[row.annotator].clone(),
            row.annotator_quality.to_string(),
            row.agreement_with_consensus.to_string(),
            row.worst_class.to_string(),
            row.num_examples_labeled.to_string(),
        ])?;
    }
    writer.flush()?;
    Ok(())
}
