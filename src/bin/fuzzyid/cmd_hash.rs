use anyhow::{Context, Result};
use indicatif::{HumanCount, HumanDuration};
use rayon::prelude::*;
use std::time::Instant;
use tracing::{debug_span, info};

use fuzzyid::progress::Progress;
use fuzzyid::pseudonym::HashedRecord;
use fuzzyid::record_io::{read_plaintext_file, write_hashed};

use crate::args;
use crate::util;

/// This command hashes a plaintext record file.
///
/// The key is checked before the input is opened, so a missing or empty key aborts the run
/// before anything is hashed.
pub fn run(global_args: &args::GlobalArgs, args: &args::HashArgs) -> Result<()> {
    let _span = debug_span!("hash").entered();
    let start = Instant::now();

    let hasher = util::require_hasher(&args.key_args)?;
    let model = util::load_model(&args.frequency_args)?;

    let loaded = read_plaintext_file(&args.input)
        .with_context(|| format!("Failed to read records from {}", args.input.display()))?;

    let mut progress = Progress::new_bar(
        loaded.records.len() as u64,
        "Hashing records",
        global_args.use_progress(),
    );
    let hashed: Vec<HashedRecord> = loaded
        .records
        .par_iter()
        .map_with(progress.clone(), |progress, record| {
            let h = hasher.hash_record(record, &model);
            progress.inc(1);
            h
        })
        .collect();
    progress.finish();

    let writer = match &args.output {
        None => Box::new(std::io::BufWriter::new(std::io::stdout())) as Box<dyn std::io::Write>,
        Some(p) => Box::new(std::io::BufWriter::new(
            std::fs::File::create(p)
                .with_context(|| format!("Failed to create {}", p.display()))?,
        )),
    };
    match write_hashed(writer, &hashed) {
        Ok(_) => {}
        Err(e) => match e.kind() {
            // Ignore SIGPIPE errors, like those that can come from piping to `head`
            csv::ErrorKind::Io(io) if io.kind() == std::io::ErrorKind::BrokenPipe => {}
            _ => return Err(e).context("Failed to write hashed records"),
        },
    }

    info!(
        "Hashed {} records from {} in {}; skipped {} malformed rows",
        HumanCount(hashed.len() as u64),
        args.input.display(),
        HumanDuration(start.elapsed()),
        HumanCount(loaded.rows_skipped as u64),
    );

    Ok(())
}
