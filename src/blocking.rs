use std::collections::HashMap;
use tracing::debug;

use crate::identifier::MatchableRecord;
use crate::params::BlockingConfig;

// -------------------------------------------------------------------------------------------------
// BlockKey
// -------------------------------------------------------------------------------------------------
/// A cheap key that a proband must share with a sample record for the two to be compared.
///
/// Keys are built from tokens, so they work the same on plaintext and on digests.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum BlockKey {
    /// Surname phonetic token and birth year token
    SurnameBirthYear(String, String),

    /// Forename phonetic token and birth year token
    ForenameBirthYear(String, String),

    /// Surname phonetic token and forename phonetic token
    SurnameForename(String, String),
}

/// Compute the block keys of a record. A key is produced only when all of its parts exist.
pub fn block_keys(record: &MatchableRecord, config: &BlockingConfig) -> Vec<BlockKey> {
    let surname = record.surname.as_ref().map(|n| &n.phonetic);
    let forename = record.forename.as_ref().map(|n| &n.phonetic);
    let year = record.dob.as_ref().map(|d| &d.year);

    let mut keys = Vec::with_capacity(3);
    if config.surname_birth_year {
        if let (Some(s), Some(y)) = (surname, year) {
            keys.push(BlockKey::SurnameBirthYear(s.clone(), y.clone()));
        }
    }
    if config.forename_birth_year {
        if let (Some(f), Some(y)) = (forename, year) {
            keys.push(BlockKey::ForenameBirthYear(f.clone(), y.clone()));
        }
    }
    if config.surname_forename {
        if let (Some(s), Some(f)) = (surname, forename) {
            keys.push(BlockKey::SurnameForename(s.clone(), f.clone()));
        }
    }
    keys
}

// -------------------------------------------------------------------------------------------------
// Candidates
// -------------------------------------------------------------------------------------------------
/// The sample records a proband is to be compared against.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Candidates {
    /// Indices into the sample, ascending and without duplicates
    pub indices: Vec<usize>,

    /// Was the proband compared against the whole sample because it had no block key?
    pub full_sweep: bool,
}

// -------------------------------------------------------------------------------------------------
// CandidateIndex
// -------------------------------------------------------------------------------------------------
/// An index of the sample by block key. Immutable once built.
#[derive(Debug)]
pub struct CandidateIndex {
    config: BlockingConfig,
    blocks: HashMap<BlockKey, Vec<usize>>,

    /// Sample records that have no block key; every proband is compared against these
    unkeyed: Vec<usize>,

    n_records: usize,
}

impl CandidateIndex {
    pub fn build(sample: &[MatchableRecord], config: &BlockingConfig) -> Self {
        let mut blocks: HashMap<BlockKey, Vec<usize>> = HashMap::new();
        let mut unkeyed = Vec::new();

        for (idx, record) in sample.iter().enumerate() {
            let keys = block_keys(record, config);
            if keys.is_empty() {
                unkeyed.push(idx);
            }
            for key in keys {
                blocks.entry(key).or_default().push(idx);
            }
        }

        debug!(
            "Indexed {} sample records into {} blocks; {} records have no block key",
            sample.len(),
            blocks.len(),
            unkeyed.len()
        );

        CandidateIndex {
            config: config.clone(),
            blocks,
            unkeyed,
            n_records: sample.len(),
        }
    }

    /// Find the sample records sharing at least one block key with the proband.
    ///
    /// A proband without any block key is compared against the whole sample if
    /// `fallback_full_sweep` is set, and against nothing otherwise.
    pub fn candidates_for(&self, proband: &MatchableRecord) -> Candidates {
        let keys = block_keys(proband, &self.config);
        if keys.is_empty() {
            return if self.config.fallback_full_sweep {
                Candidates {
                    indices: (0..self.n_records).collect(),
                    full_sweep: true,
                }
            } else {
                Candidates::default()
            };
        }

        let mut indices = self.unkeyed.clone();
        for key in keys.iter() {
            if let Some(block) = self.blocks.get(key) {
                indices.extend_from_slice(block);
            }
        }
        indices.sort_unstable();
        indices.dedup();
        Candidates {
            indices,
            full_sweep: false,
        }
    }

    pub fn len(&self) -> usize {
        self.n_records
    }

    pub fn is_empty(&self) -> bool {
        self.n_records == 0
    }

    pub fn num_blocks(&self) -> usize {
        self.blocks.len()
    }

    /// The size of the largest block.
    pub fn max_block_size(&self) -> usize {
        self.blocks.values().map(Vec::len).max().unwrap_or(0)
    }
}

// -------------------------------------------------------------------------------------------------
// test
// -------------------------------------------------------------------------------------------------
#[cfg(test)]
mod test {
    use super::*;
    use crate::frequency::FrequencyModel;
    use crate::record::IdentityRecord;
    use pretty_assertions::assert_eq;

    fn person(id: &str, forename: Option<&str>, surname: Option<&str>, dob: Option<&str>) -> IdentityRecord {
        let mut r = IdentityRecord::new(id);
        r.forename = forename.map(str::to_string);
        r.surname = surname.map(str::to_string);
        r.date_of_birth = dob.map(|d| d.parse().unwrap());
        r
    }

    fn matchable(records: &[IdentityRecord]) -> Vec<MatchableRecord> {
        let model = FrequencyModel::from_defaults().unwrap();
        records.iter().map(|r| MatchableRecord::from_plaintext(r, &model)).collect()
    }

    #[test]
    fn keys_need_all_parts() {
        let config = BlockingConfig::default();
        let rs = matchable(&[
            person("A", Some("Jane"), Some("Smith"), Some("1980-01-01")),
            person("B", None, Some("Smith"), Some("1980")),
            person("C", Some("Jane"), None, None),
        ]);
        assert_eq!(
            block_keys(&rs[0], &config),
            vec![
                BlockKey::SurnameBirthYear("SM0".into(), "1980".into()),
                BlockKey::ForenameBirthYear("JN".into(), "1980".into()),
                BlockKey::SurnameForename("SM0".into(), "JN".into()),
            ]
        );
        assert_eq!(
            block_keys(&rs[1], &config),
            vec![BlockKey::SurnameBirthYear("SM0".into(), "1980".into())]
        );
        assert!(block_keys(&rs[2], &config).is_empty());
    }

    #[test]
    fn candidates_share_a_key() {
        let config = BlockingConfig::default();
        let sample = matchable(&[
            person("S0", Some("Jane"), Some("Smith"), Some("1980-01-01")),
            person("S1", Some("Mary"), Some("Jones"), Some("1975-06-01")),
            person("S2", Some("Jayne"), Some("Smythe"), Some("1990-02-02")),
            person("S3", Some("Peter"), Some("Smith"), Some("1980-12-12")),
            person("S4", None, None, None),
        ]);
        let index = CandidateIndex::build(&sample, &config);
        assert_eq!(index.len(), 5);

        let proband = &matchable(&[person("P", Some("Jane"), Some("Smith"), Some("1980-05-05"))])[0];
        let c = index.candidates_for(proband);
        // S0 (all keys), S2 (surname x forename), S3 (surname x year), S4 (no keys)
        assert_eq!(c.indices, vec![0, 2, 3, 4]);
        assert!(!c.full_sweep);
    }

    #[test]
    fn keyless_probands_sweep_when_allowed() {
        let sample = matchable(&[
            person("S0", Some("Jane"), Some("Smith"), Some("1980-01-01")),
            person("S1", Some("Mary"), Some("Jones"), Some("1975-06-01")),
        ]);
        let proband = &matchable(&[person("P", Some("Jane"), None, None)])[0];

        let index = CandidateIndex::build(&sample, &BlockingConfig::default());
        let c = index.candidates_for(proband);
        assert_eq!(c.indices, vec![0, 1]);
        assert!(c.full_sweep);

        let config = BlockingConfig {
            fallback_full_sweep: false,
            ..Default::default()
        };
        let index = CandidateIndex::build(&sample, &config);
        assert_eq!(index.candidates_for(proband), Candidates::default());
    }
}
