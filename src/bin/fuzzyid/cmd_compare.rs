use anyhow::{Context, Result};
use indicatif::{HumanCount, HumanDuration};
use tracing::{debug, debug_span};

use fuzzyid::error::RunError;
use fuzzyid::orchestrator::{Orchestrator, RunSummary};
use fuzzyid::record_io::{
    CsvDecisionSink, DecisionSink, JsonDecisionSink, JsonLinesDecisionSink, RecordFormat,
};

use crate::args;
use crate::util;

/// This command matches a proband file against a sample file.
///
/// Configuration is loaded and checked in full before either record file is read.
pub fn run(global_args: &args::GlobalArgs, args: &args::CompareArgs) -> Result<()> {
    let _span = debug_span!("compare").entered();

    // ---------------------------------------------------------------------------------------------
    // Load configuration
    // ---------------------------------------------------------------------------------------------
    let hasher = util::optional_hasher(&args.key_args)?;
    let model = util::load_model(&args.frequency_args)?;
    let config = util::load_config(&args.match_args)?;
    let orchestrator = Orchestrator::new(config, model, hasher)?
        .with_progress(global_args.use_progress());

    let probands_format = RecordFormat::from(args.probands_format);
    let sample_format = RecordFormat::from(args.sample_format);
    let comparison_format = orchestrator.comparison_format(probands_format, sample_format)?;
    debug!("Comparing in {comparison_format} format");

    // ---------------------------------------------------------------------------------------------
    // Read records
    // ---------------------------------------------------------------------------------------------
    let (probands, probands_skipped) = util::load_records(&args.probands, probands_format)?;
    let (sample, sample_skipped) = util::load_records(&args.sample, sample_format)?;

    // ---------------------------------------------------------------------------------------------
    // Match
    // ---------------------------------------------------------------------------------------------
    let writer = args
        .output_args
        .get_writer()
        .context("Failed to open output destination for writing")?;
    let mut sink: Box<dyn DecisionSink> = match args.output_args.format {
        args::DecisionFormat::Csv => Box::new(CsvDecisionSink::new(writer, args.extra_info)),
        args::DecisionFormat::Json => Box::new(JsonDecisionSink::new(writer)),
        args::DecisionFormat::Jsonl => Box::new(JsonLinesDecisionSink::new(writer)),
    };

    let mut summary = match orchestrator.compare(&probands, &sample, args.extra_info, sink.as_mut()) {
        Ok(summary) => summary,
        // Ignore SIGPIPE errors, like those that can come from piping to `head`
        Err(RunError::Output(e)) if e.kind() == std::io::ErrorKind::BrokenPipe => return Ok(()),
        Err(RunError::Csv(e))
            if matches!(e.kind(), csv::ErrorKind::Io(io) if io.kind() == std::io::ErrorKind::BrokenPipe) =>
        {
            return Ok(())
        }
        Err(e) => return Err(e).context("Failed to match probands"),
    };
    summary.rows_skipped = vec![
        (args.probands.display().to_string(), probands_skipped),
        (args.sample.display().to_string(), sample_skipped),
    ];

    // ---------------------------------------------------------------------------------------------
    // Report
    // ---------------------------------------------------------------------------------------------
    if !global_args.quiet {
        let table = summary_table(&summary);
        eprintln!();
        util::ignore_broken_pipe(table.print(&mut std::io::stderr()).map(|_| ()))?;
    }

    Ok(())
}

pub fn summary_table(summary: &RunSummary) -> prettytable::Table {
    use prettytable::row;

    let stats = &summary.stats;
    let count = |n: u64| HumanCount(n).to_string();

    let mut table = prettytable::Table::new();
    table.set_format(util::table_format());
    table.set_titles(row![lb -> "Run Summary", cb -> ""]);
    table.add_row(row![l -> "Probands", r -> count(summary.num_probands as u64)]);
    table.add_row(row![l -> "Sample records", r -> count(summary.num_sample as u64)]);
    for (name, skipped) in summary.rows_skipped.iter() {
        table.add_row(row![l -> format!("Rows skipped in {name}"), r -> count(*skipped as u64)]);
    }
    table.add_row(row![l -> "Compared as", r -> summary.comparison_format]);
    table.add_row(row![l -> "Comparisons", r -> count(stats.comparisons)]);
    if summary.degraded {
        table.add_row(row![l -> "Comparisons without edit-distance credit", r -> count(stats.degraded_comparisons)]);
    }
    table.add_row(row![l -> "Full sweeps", r -> count(stats.full_sweeps)]);
    table.add_row(row![l -> "Matched", r -> count(stats.matched)]);
    table.add_row(row![l -> "Unmatched", r -> count(stats.unmatched())]);
    table.add_row(row![l -> "  ambiguous", r -> count(stats.ambiguous)]);
    table.add_row(row![l -> "  below threshold", r -> count(stats.below_threshold)]);
    table.add_row(row![l -> "  no candidates", r -> count(stats.no_candidates)]);
    table.add_row(row![l -> "  no usable fields", r -> count(stats.no_usable_fields)]);
    table.add_row(row![l -> "Elapsed", r -> HumanDuration(summary.elapsed)]);
    table
}
