use anyhow::{Context, Result};
use std::path::Path;
use tracing::{debug, warn};

use fuzzyid::frequency::{FrequencyModel, FrequencyModelBuilder, FrequencyTable, PostcodeTable};
use fuzzyid::orchestrator::RecordSet;
use fuzzyid::params::MatchConfig;
use fuzzyid::pseudonym::Hasher;
use fuzzyid::record::FieldKind;
use fuzzyid::record_io::{read_hashed_file, read_plaintext_file, RecordFormat};

use crate::args::{FrequencyArgs, KeyArgs, MatchArgs};

/// Build the frequency model from the reference data options.
pub fn load_model(args: &FrequencyArgs) -> Result<FrequencyModel> {
    let mut builder = if args.no_default_frequencies {
        FrequencyModelBuilder::default()
    } else {
        FrequencyModelBuilder::with_defaults().context("Failed to load built-in reference data")?
    };

    if let Some(path) = &args.forename_freq {
        builder = builder.forenames(FrequencyTable::from_path(FieldKind::Forename, path)?);
    }
    if let Some(path) = &args.surname_freq {
        builder = builder.surnames(FrequencyTable::from_path(FieldKind::Surname, path)?);
    }
    if let Some(path) = &args.sex_freq {
        builder = builder.sexes(FrequencyTable::from_path(FieldKind::Sex, path)?);
    }
    if let Some(path) = &args.postcode_freq {
        builder = builder.postcodes(PostcodeTable::from_path(path)?);
    }

    builder = builder
        .birth_years(args.first_birth_year, args.last_birth_year)
        .min_frequency(args.min_frequency)
        .default_units_per_district(args.units_per_district);
    for field in args.disable.iter() {
        builder = builder.disable((*field).into());
    }

    let model = builder.build().context("Failed to build the frequency model")?;
    for field in FieldKind::ALL {
        if !model.is_enabled(field) {
            warn!("No reference data for {field}; it will not be used for matching");
        }
    }
    Ok(model)
}

/// Build the matching parameters: defaults, then the parameter file, then command-line overrides.
pub fn load_config(args: &MatchArgs) -> Result<MatchConfig> {
    let mut config = match &args.params {
        Some(path) => MatchConfig::from_yaml_file(path)?,
        None => MatchConfig::default(),
    };
    if let Some(t1) = args.min_log_odds_for_match {
        config.min_log_odds_for_match = t1;
    }
    if let Some(t2) = args.exceeds_next_best_log_odds {
        config.exceeds_next_best_log_odds = t2;
    }
    if let Some(n) = args.batch_size {
        config.batch_size = n;
    }
    if args.no_full_sweep {
        config.blocking.fallback_full_sweep = false;
    }
    config.validate().context("Invalid matching parameters")?;
    debug!("Matching parameters: {config:?}");
    Ok(config)
}

/// Make a hasher from the key, which must be given.
pub fn require_hasher(args: &KeyArgs) -> Result<Hasher> {
    Hasher::from_optional(args.key.as_ref())
        .context("A hash key is required; use --key or the FUZZYID_KEY environment variable")
}

/// Make a hasher from the key, if one was given. A given key must not be empty.
pub fn optional_hasher(args: &KeyArgs) -> Result<Option<Hasher>> {
    args.key
        .as_ref()
        .map(Hasher::new)
        .transpose()
        .context("Invalid hash key")
}

/// Read a record file in the given format, returning the records and the number of rows skipped.
pub fn load_records(path: &Path, format: RecordFormat) -> Result<(RecordSet, usize)> {
    let (records, skipped) = match format {
        RecordFormat::Plaintext => {
            let loaded = read_plaintext_file(path)
                .with_context(|| format!("Failed to read records from {}", path.display()))?;
            let skipped = loaded.rows_skipped;
            (RecordSet::Plaintext(loaded.records), skipped)
        }
        RecordFormat::Hashed => {
            let loaded = read_hashed_file(path)
                .with_context(|| format!("Failed to read records from {}", path.display()))?;
            let skipped = loaded.rows_skipped;
            (RecordSet::Hashed(loaded.records), skipped)
        }
    };
    if skipped > 0 {
        warn!("Skipped {skipped} malformed rows in {}", path.display());
    }
    Ok((records, skipped))
}

/// Ignore broken pipe errors, like those that can come from piping to `head`.
pub fn ignore_broken_pipe(result: std::io::Result<()>) -> Result<()> {
    match result {
        Err(e) if e.kind() == std::io::ErrorKind::BrokenPipe => Ok(()),
        Err(e) => Err(e)?,
        Ok(()) => Ok(()),
    }
}

/// The table format used for human-readable summaries.
pub fn table_format() -> prettytable::format::TableFormat {
    use prettytable::format::{FormatBuilder, LinePosition, LineSeparator};

    FormatBuilder::new()
        .column_separator(' ')
        .separators(&[LinePosition::Title], LineSeparator::new('─', '─', '─', '─'))
        .padding(1, 1)
        .build()
}
