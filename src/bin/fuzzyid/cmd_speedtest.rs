use anyhow::{Context, Result};
use indicatif::HumanCount;
use tracing::debug_span;

use fuzzyid::validation::{benchmark_comparisons, Throughput};

use crate::args;
use crate::util;

/// This command times pairwise comparisons on a single thread.
pub fn run(global_args: &args::GlobalArgs, args: &args::SpeedTestArgs) -> Result<()> {
    let _span = debug_span!("speedtest").entered();

    let hasher = util::optional_hasher(&args.key_args)?;
    let model = util::load_model(&args.frequency_args)?;
    let config = util::load_config(&args.match_args)?;

    let results = benchmark_comparisons(&model, &config, hasher.as_ref(), args.comparisons, args.seed)
        .context("Failed to run the speed test")?;

    throughput_table(&results).print_tty(global_args.use_color())?;
    Ok(())
}

fn throughput_table(results: &[Throughput]) -> prettytable::Table {
    use prettytable::row;

    let mut table: prettytable::Table = results
        .iter()
        .map(|t| {
            row![
                l -> t.format,
                r -> HumanCount(t.comparisons),
                r -> format!("{:.2?}", t.elapsed),
                r -> format!("{:.0}", t.per_second()),
            ]
        })
        .collect();
    table.set_format(util::table_format());
    table.set_titles(row![lb -> "Format", cb -> "Comparisons", cb -> "Elapsed", cb -> "Per Second"]);
    table
}
