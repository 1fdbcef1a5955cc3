use indicatif::{HumanCount, HumanDuration};
use rayon::prelude::*;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::{debug, debug_span, info, warn};

use crate::blocking::CandidateIndex;
use crate::error::{ConfigError, RunError};
use crate::frequency::FrequencyModel;
use crate::identifier::MatchableRecord;
use crate::matcher::{MatchDecision, Matcher};
use crate::matcher_stats::MatcherStats;
use crate::params::MatchConfig;
use crate::progress::Progress;
use crate::pseudonym::{HashedRecord, Hasher};
use crate::record::IdentityRecord;
use crate::record_io::{DecisionSink, RecordFormat};

// -------------------------------------------------------------------------------------------------
// RecordSet
// -------------------------------------------------------------------------------------------------
/// One side of a comparison: either plaintext or hashed records.
#[derive(Clone, Debug)]
pub enum RecordSet {
    Plaintext(Vec<IdentityRecord>),
    Hashed(Vec<HashedRecord>),
}

impl RecordSet {
    pub fn format(&self) -> RecordFormat {
        match self {
            RecordSet::Plaintext(_) => RecordFormat::Plaintext,
            RecordSet::Hashed(_) => RecordFormat::Hashed,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            RecordSet::Plaintext(rs) => rs.len(),
            RecordSet::Hashed(rs) => rs.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl From<Vec<IdentityRecord>> for RecordSet {
    fn from(records: Vec<IdentityRecord>) -> Self {
        RecordSet::Plaintext(records)
    }
}

impl From<Vec<HashedRecord>> for RecordSet {
    fn from(records: Vec<HashedRecord>) -> Self {
        RecordSet::Hashed(records)
    }
}

// -------------------------------------------------------------------------------------------------
// RunSummary
// -------------------------------------------------------------------------------------------------
/// What happened during a comparison run.
#[derive(Clone, Debug)]
pub struct RunSummary {
    pub stats: MatcherStats,

    pub num_probands: usize,
    pub num_sample: usize,

    /// The format both sides were compared in
    pub comparison_format: RecordFormat,

    /// Was edit-distance credit unavailable because the comparison was on digests?
    pub degraded: bool,

    /// Rows skipped while reading each input, by input name; filled in by whoever read them
    pub rows_skipped: Vec<(String, usize)>,

    pub elapsed: Duration,
}

impl RunSummary {
    pub fn total_rows_skipped(&self) -> usize {
        self.rows_skipped.iter().map(|(_, n)| n).sum()
    }
}

// -------------------------------------------------------------------------------------------------
// Orchestrator
// -------------------------------------------------------------------------------------------------
/// Runs a whole batch: prepares both sides for comparison, indexes the sample, matches the
/// probands in parallel, and streams decisions to a sink in proband order.
///
/// The configuration, frequency model, and key are fixed at construction.
#[derive(Debug)]
pub struct Orchestrator {
    config: MatchConfig,
    model: FrequencyModel,
    hasher: Option<Hasher>,
    progress_enabled: bool,
}

impl Orchestrator {
    pub fn new(
        config: MatchConfig,
        model: FrequencyModel,
        hasher: Option<Hasher>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Orchestrator {
            config,
            model,
            hasher,
            progress_enabled: false,
        })
    }

    /// Show a progress bar while matching.
    pub fn with_progress(mut self, enabled: bool) -> Self {
        self.progress_enabled = enabled;
        self
    }

    pub fn config(&self) -> &MatchConfig {
        &self.config
    }

    pub fn model(&self) -> &FrequencyModel {
        &self.model
    }

    pub fn hasher(&self) -> Option<&Hasher> {
        self.hasher.as_ref()
    }

    /// Decide which format two sides will be compared in.
    ///
    /// Sides of the same format are compared as they are. When the formats differ, the
    /// plaintext side is hashed in-process, which needs a key.
    pub fn comparison_format(
        &self,
        probands: RecordFormat,
        sample: RecordFormat,
    ) -> Result<RecordFormat, ConfigError> {
        if probands == sample {
            Ok(probands)
        } else if self.hasher.is_some() {
            Ok(RecordFormat::Hashed)
        } else {
            Err(ConfigError::KeyRequired { probands, sample })
        }
    }

    /// Turn records into their matchable form for comparison in the given format.
    pub fn prepare(
        &self,
        records: &RecordSet,
        format: RecordFormat,
    ) -> Result<Vec<MatchableRecord>, ConfigError> {
        let model = &self.model;
        match (records, format) {
            (RecordSet::Plaintext(rs), RecordFormat::Plaintext) => Ok(rs
                .par_iter()
                .map(|r| MatchableRecord::from_plaintext(r, model))
                .collect()),
            (RecordSet::Hashed(rs), RecordFormat::Hashed) => Ok(rs
                .par_iter()
                .map(|r| MatchableRecord::from_hashed(r, model))
                .collect()),
            (RecordSet::Plaintext(rs), RecordFormat::Hashed) => {
                let hasher = self.hasher.as_ref().ok_or(ConfigError::KeyRequired {
                    probands: RecordFormat::Plaintext,
                    sample: RecordFormat::Hashed,
                })?;
                debug!("Hashing {} plaintext records for comparison", rs.len());
                Ok(rs
                    .par_iter()
                    .map(|r| MatchableRecord::from_hashed(&hasher.hash_record(r, model), model))
                    .collect())
            }
            (RecordSet::Hashed(_), RecordFormat::Plaintext) => Err(ConfigError::Invalid {
                name: "record format",
                message: "hashed records cannot be compared as plaintext".to_string(),
            }),
        }
    }

    /// Match every proband against the sample, writing decisions to `sink` in proband order.
    ///
    /// Probands are processed in chunks of `batch_size`; each chunk is matched in parallel,
    /// then written and flushed before the next chunk starts. If `with_details` is set, each
    /// decision carries the per-field evidence against its best candidate.
    pub fn compare(
        &self,
        probands: &RecordSet,
        sample: &RecordSet,
        with_details: bool,
        sink: &mut dyn DecisionSink,
    ) -> Result<RunSummary, RunError> {
        let start = Instant::now();
        let _span = debug_span!("compare").entered();

        // -----------------------------------------------------------------------------------------
        // Prepare both sides and index the sample
        // -----------------------------------------------------------------------------------------
        let format = self.comparison_format(probands.format(), sample.format())?;
        let degraded = format == RecordFormat::Hashed;
        if degraded {
            warn!("Comparing hashed identifiers: edit-distance credit for names is unavailable");
        }
        info!(
            "Comparing {} {} probands against {} {} sample records ({} comparison)",
            HumanCount(probands.len() as u64),
            probands.format(),
            HumanCount(sample.len() as u64),
            sample.format(),
            format,
        );

        let sample_records = self.prepare(sample, format)?;
        let proband_records = self.prepare(probands, format)?;
        let index = CandidateIndex::build(&sample_records, &self.config.blocking);
        debug!(
            "Candidate index: {} blocks; largest block has {} records",
            index.num_blocks(),
            index.max_block_size()
        );

        // -----------------------------------------------------------------------------------------
        // Match in ordered chunks
        // -----------------------------------------------------------------------------------------
        let matcher_stats = Mutex::new(MatcherStats::default());
        let mut progress = Progress::new_bar(
            proband_records.len() as u64,
            "Matching probands",
            self.progress_enabled,
        );

        let batch_size = self.config.batch_size.max(1);
        for chunk in proband_records.chunks(batch_size) {
            let decisions: Vec<MatchDecision> = chunk
                .par_iter()
                .map_init(
                    || {
                        let matcher = Matcher::new(
                            &self.config,
                            &self.model,
                            &index,
                            &sample_records,
                            Some(&matcher_stats),
                        );
                        (matcher, progress.clone())
                    },
                    |(matcher, progress), proband| {
                        let decision = matcher.match_proband(proband, with_details);
                        progress.inc(1);
                        decision
                    },
                )
                .collect();
            sink.write_decisions(&decisions)?;
        }
        sink.finish()?;
        progress.finish();

        // -----------------------------------------------------------------------------------------
        // Summarize
        // -----------------------------------------------------------------------------------------
        // a poisoned lock means a worker panicked, which would already have propagated
        let stats = matcher_stats
            .into_inner()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let elapsed = start.elapsed();
        info!(
            "Matched {}/{} probands in {} ({} comparisons; {} ambiguous, {} below threshold, {} without candidates, {} without usable fields)",
            HumanCount(stats.matched),
            HumanCount(stats.probands_seen),
            HumanDuration(elapsed),
            HumanCount(stats.comparisons),
            HumanCount(stats.ambiguous),
            HumanCount(stats.below_threshold),
            HumanCount(stats.no_candidates),
            HumanCount(stats.no_usable_fields),
        );

        Ok(RunSummary {
            stats,
            num_probands: probands.len(),
            num_sample: sample.len(),
            comparison_format: format,
            degraded,
            rows_skipped: Vec::new(),
            elapsed,
        })
    }

    /// Like `compare`, collecting the decisions in memory.
    pub fn match_all(
        &self,
        probands: &RecordSet,
        sample: &RecordSet,
        with_details: bool,
    ) -> Result<(Vec<MatchDecision>, RunSummary), RunError> {
        let mut decisions = Vec::with_capacity(probands.len());
        let summary = self.compare(probands, sample, with_details, &mut decisions)?;
        Ok((decisions, summary))
    }
}
