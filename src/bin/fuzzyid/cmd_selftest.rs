use anyhow::{bail, Context, Result};
use indicatif::HumanDuration;
use std::time::Instant;
use tracing::{debug_span, info};

use fuzzyid::orchestrator::Orchestrator;
use fuzzyid::validation::{self_test, SelfTestCheck};

use crate::args;
use crate::util;

pub fn run(global_args: &args::GlobalArgs, args: &args::SelfTestArgs) -> Result<()> {
    let _span = debug_span!("selftest").entered();
    let start = Instant::now();

    let hasher = util::optional_hasher(&args.key_args)?;
    let model = util::load_model(&args.frequency_args)?;
    let config = util::load_config(&args.match_args)?;
    let orchestrator = Orchestrator::new(config, model, hasher)?;

    let checks = self_test(&orchestrator, args.population, args.seed)
        .context("Failed to run the self test")?;

    if !global_args.quiet {
        checks_table(&checks).print_tty(global_args.use_color())?;
    }

    let n_failed = checks.iter().filter(|c| !c.passed).count();
    info!(
        "Ran {} self-test checks on {} synthetic people in {}",
        checks.len(),
        args.population,
        HumanDuration(start.elapsed())
    );
    if n_failed > 0 {
        bail!("{n_failed} of {} self-test checks failed", checks.len());
    }
    Ok(())
}

fn checks_table(checks: &[SelfTestCheck]) -> prettytable::Table {
    use console::style;
    use prettytable::row;

    let mut table: prettytable::Table = checks
        .iter()
        .map(|c| {
            let status = if c.passed {
                style("PASS").green()
            } else {
                style("FAIL").red().bold()
            };
            row![l -> c.name, c -> status, l -> &c.detail]
        })
        .collect();
    table.set_format(util::table_format());
    table.set_titles(row![lb -> "Check", cb -> "Result", lb -> "Detail"]);
    table
}
