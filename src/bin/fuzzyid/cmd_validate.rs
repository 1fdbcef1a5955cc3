use anyhow::{bail, Context, Result};
use indicatif::HumanDuration;
use std::io::Write;
use std::time::Instant;
use tracing::{debug_span, info};

use fuzzyid::orchestrator::Orchestrator;
use fuzzyid::validation::{run_validation, Perturbation, ValidationConfig, ValidationReport};

use crate::args;
use crate::util;

/// This command measures matching accuracy on a synthetic population with known truth.
pub fn run(global_args: &args::GlobalArgs, args: &args::ValidateArgs) -> Result<()> {
    let _span = debug_span!("validate").entered();
    let start = Instant::now();

    if let Some(t) = args.thresholds.iter().find(|t| !t.is_finite()) {
        bail!("Threshold {t} is not a finite number");
    }

    let hasher = if args.hashed {
        Some(util::require_hasher(&args.key_args)?)
    } else {
        util::optional_hasher(&args.key_args)?
    };
    let model = util::load_model(&args.frequency_args)?;
    let config = util::load_config(&args.match_args)?;
    let orchestrator = Orchestrator::new(config, model, hasher)?
        .with_progress(global_args.use_progress());

    let mut validation_config = ValidationConfig {
        sample_size: args.sample_size,
        in_sample_probands: args.in_sample,
        out_of_sample_probands: args.out_of_sample,
        perturbation: Perturbation {
            p_delete: args.p_delete,
            p_typo: args.p_typo,
            p_dob_transpose: args.p_dob_transpose,
            p_postcode_move: args.p_postcode_move,
        },
        hashed: args.hashed,
        seed: args.seed,
        ..ValidationConfig::default()
    };
    if !args.thresholds.is_empty() {
        validation_config.thresholds = args.thresholds.clone();
    }

    let report = run_validation(&orchestrator, &validation_config)
        .context("Failed to run the synthetic validation")?;
    info!(
        "Validated against {} sample people and {} probands in {}",
        report.num_sample,
        report.num_in_sample + report.num_out_of_sample,
        HumanDuration(start.elapsed())
    );

    if args.output_args.format == args::ReportFormat::Human && args.output_args.output.is_none() {
        report_table(&report).print_tty(global_args.use_color())?;
        return Ok(());
    }

    let mut writer = args
        .output_args
        .get_writer()
        .context("Failed to open output destination for writing")?;

    let mut run_inner = move || -> std::io::Result<()> {
        match &args.output_args.format {
            args::ReportFormat::Human => {
                report_table(&report).print(&mut writer)?;
            }
            args::ReportFormat::Json => {
                serde_json::to_writer_pretty(&mut writer, &report)?;
                writeln!(writer)?;
            }
            args::ReportFormat::Jsonl => {
                for point in report.points.iter() {
                    serde_json::to_writer(&mut writer, point)?;
                    writeln!(writer)?;
                }
            }
        }
        writer.flush()
    };
    util::ignore_broken_pipe(run_inner())
}

fn format_rate(r: f64) -> String {
    if r.is_finite() {
        format!("{:.4}", r)
    } else {
        String::new()
    }
}

fn report_table(report: &ValidationReport) -> prettytable::Table {
    use prettytable::row;

    let mut table: prettytable::Table = report
        .points
        .iter()
        .map(|p| {
            row![
                r -> p.threshold_1,
                r -> p.threshold_2,
                r -> p.true_positives,
                r -> p.false_positives,
                r -> p.false_negatives,
                r -> p.true_negatives,
                r -> format_rate(p.sensitivity),
                r -> format_rate(p.specificity),
                r -> format_rate(p.proportion_correct),
            ]
        })
        .collect();
    table.set_format(util::table_format());
    table.set_titles(row![
        cb -> "Min Log Odds",
        cb -> "Exceeds Next",
        cb -> "TP",
        cb -> "FP",
        cb -> "FN",
        cb -> "TN",
        cb -> "Sensitivity",
        cb -> "Specificity",
        cb -> "Correct",
    ]);
    table
}
