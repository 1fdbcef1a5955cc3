use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::debug;

use crate::error::ConfigError;

fn check_probability(name: &'static str, value: f64) -> Result<(), ConfigError> {
    if value > 0.0 && value < 1.0 {
        Ok(())
    } else {
        Err(ConfigError::Probability { name, value })
    }
}

fn check_finite(name: &'static str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() {
        Ok(())
    } else {
        Err(ConfigError::NotFinite { name, value })
    }
}

// -------------------------------------------------------------------------------------------------
// NameParams
// -------------------------------------------------------------------------------------------------
/// Error model for a name field.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct NameParams {
    /// P(the two values share nothing | same person)
    pub p_mismatch_same_person: f64,

    /// P(the values differ but share a phonetic code | same person)
    pub p_phonetic_only_same_person: f64,

    /// Lower bound for the evidence from a phonetic-only match
    pub min_phonetic_log_odds: f64,

    /// Largest Damerau-Levenshtein distance that still earns typo credit
    pub max_edit_distance: usize,

    /// Evidence for a single-edit typo
    pub typo_log_odds: f64,

    /// Multiplier applied to `typo_log_odds` for each further edit
    pub typo_decay: f64,
}

impl NameParams {
    fn validate(&self, field: &'static str) -> Result<(), ConfigError> {
        check_probability("p_mismatch_same_person", self.p_mismatch_same_person)?;
        check_probability("p_phonetic_only_same_person", self.p_phonetic_only_same_person)?;
        if self.p_mismatch_same_person + self.p_phonetic_only_same_person >= 1.0 {
            return Err(ConfigError::Invalid {
                name: field,
                message: "p_mismatch_same_person + p_phonetic_only_same_person must be below 1"
                    .to_string(),
            });
        }
        check_finite("min_phonetic_log_odds", self.min_phonetic_log_odds)?;
        check_finite("typo_log_odds", self.typo_log_odds)?;
        if self.typo_log_odds < 0.0 {
            return Err(ConfigError::Invalid {
                name: "typo_log_odds",
                message: format!("must not be negative, got {}", self.typo_log_odds),
            });
        }
        if !(self.typo_decay > 0.0 && self.typo_decay <= 1.0) {
            return Err(ConfigError::Invalid {
                name: "typo_decay",
                message: format!("must lie in (0, 1], got {}", self.typo_decay),
            });
        }
        Ok(())
    }
}

impl Default for NameParams {
    fn default() -> Self {
        NameParams {
            p_mismatch_same_person: 0.02,
            p_phonetic_only_same_person: 0.05,
            min_phonetic_log_odds: 1.0,
            max_edit_distance: 2,
            typo_log_odds: 0.75,
            typo_decay: 0.5,
        }
    }
}

// -------------------------------------------------------------------------------------------------
// DobParams
// -------------------------------------------------------------------------------------------------
/// Error model for date of birth.
///
/// The partial-agreement constants are starting points to be re-calibrated against local
/// validation data.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DobParams {
    /// P(the recorded dates differ | same person)
    pub p_error: f64,

    pub transposed_log_odds: f64,
    pub year_only_log_odds: f64,
    pub month_day_only_log_odds: f64,
    pub mismatch_log_odds: f64,
}

impl Default for DobParams {
    fn default() -> Self {
        DobParams {
            p_error: 0.01,
            transposed_log_odds: 5.0,
            year_only_log_odds: -1.0,
            month_day_only_log_odds: 1.5,
            mismatch_log_odds: -6.0,
        }
    }
}

impl DobParams {
    fn validate(&self) -> Result<(), ConfigError> {
        check_probability("dob.p_error", self.p_error)?;
        check_finite("dob.transposed_log_odds", self.transposed_log_odds)?;
        check_finite("dob.year_only_log_odds", self.year_only_log_odds)?;
        check_finite("dob.month_day_only_log_odds", self.month_day_only_log_odds)?;
        check_finite("dob.mismatch_log_odds", self.mismatch_log_odds)
    }
}

// -------------------------------------------------------------------------------------------------
// SexParams
// -------------------------------------------------------------------------------------------------
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SexParams {
    /// P(the recorded sexes differ | same person)
    pub p_error: f64,

    pub mismatch_log_odds: f64,
}

impl Default for SexParams {
    fn default() -> Self {
        SexParams {
            p_error: 0.005,
            mismatch_log_odds: -7.0,
        }
    }
}

impl SexParams {
    fn validate(&self) -> Result<(), ConfigError> {
        check_probability("sex.p_error", self.p_error)?;
        check_finite("sex.mismatch_log_odds", self.mismatch_log_odds)
    }
}

// -------------------------------------------------------------------------------------------------
// PostcodeParams
// -------------------------------------------------------------------------------------------------
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PostcodeParams {
    /// P(different unit in the same district | same person)
    pub p_moved_within_district: f64,

    /// P(different district | same person)
    pub p_moved_elsewhere: f64,
}

impl Default for PostcodeParams {
    fn default() -> Self {
        PostcodeParams {
            p_moved_within_district: 0.03,
            p_moved_elsewhere: 0.1,
        }
    }
}

impl PostcodeParams {
    fn validate(&self) -> Result<(), ConfigError> {
        check_probability("postcode.p_moved_within_district", self.p_moved_within_district)?;
        check_probability("postcode.p_moved_elsewhere", self.p_moved_elsewhere)?;
        if self.p_moved_within_district + self.p_moved_elsewhere >= 1.0 {
            return Err(ConfigError::Invalid {
                name: "postcode",
                message: "p_moved_within_district + p_moved_elsewhere must be below 1".to_string(),
            });
        }
        Ok(())
    }
}

// -------------------------------------------------------------------------------------------------
// BlockingConfig
// -------------------------------------------------------------------------------------------------
/// Which blocking keys to index the sample by.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BlockingConfig {
    /// Surname phonetic code x birth year
    pub surname_birth_year: bool,

    /// Forename phonetic code x birth year
    pub forename_birth_year: bool,

    /// Surname phonetic code x forename phonetic code
    pub surname_forename: bool,

    /// Compare probands that have no blocking key against the whole sample
    pub fallback_full_sweep: bool,
}

impl Default for BlockingConfig {
    fn default() -> Self {
        BlockingConfig {
            surname_birth_year: true,
            forename_birth_year: true,
            surname_forename: true,
            fallback_full_sweep: true,
        }
    }
}

// -------------------------------------------------------------------------------------------------
// MatchConfig
// -------------------------------------------------------------------------------------------------
/// Everything that parameterizes a matching run.
///
/// Built explicitly by the caller and handed to the `Orchestrator`; nothing in the matching
/// core reads the environment.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MatchConfig {
    /// The best candidate must score at least this much to be accepted
    pub min_log_odds_for_match: f64,

    /// The best candidate must beat the runner-up by at least this much to be accepted
    pub exceeds_next_best_log_odds: f64,

    /// Total log odds are clamped to be no lower than this
    pub log_odds_floor: f64,

    /// Number of probands decided and written out together
    pub batch_size: usize,

    pub forename: NameParams,
    pub surname: NameParams,
    pub dob: DobParams,
    pub sex: SexParams,
    pub postcode: PostcodeParams,
    pub blocking: BlockingConfig,
}

pub const DEFAULT_MIN_LOG_ODDS_FOR_MATCH: f64 = 5.0;
pub const DEFAULT_EXCEEDS_NEXT_BEST_LOG_ODDS: f64 = 10.0;
pub const DEFAULT_LOG_ODDS_FLOOR: f64 = -1e6;
pub const DEFAULT_BATCH_SIZE: usize = 1024;

impl Default for MatchConfig {
    fn default() -> Self {
        MatchConfig {
            min_log_odds_for_match: DEFAULT_MIN_LOG_ODDS_FOR_MATCH,
            exceeds_next_best_log_odds: DEFAULT_EXCEEDS_NEXT_BEST_LOG_ODDS,
            log_odds_floor: DEFAULT_LOG_ODDS_FLOOR,
            batch_size: DEFAULT_BATCH_SIZE,
            forename: NameParams::default(),
            surname: NameParams::default(),
            dob: DobParams::default(),
            sex: SexParams::default(),
            postcode: PostcodeParams::default(),
            blocking: BlockingConfig::default(),
        }
    }
}

impl MatchConfig {
    /// Load parameters from a YAML file. Keys that are not given keep their defaults.
    pub fn from_yaml_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_owned(),
            source,
        })?;
        let config: Self = serde_yaml::from_str(&contents).map_err(|source| ConfigError::Yaml {
            path: path.to_owned(),
            source,
        })?;
        config.validate()?;
        debug!("Loaded matching parameters from {}", path.display());
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        check_finite("min_log_odds_for_match", self.min_log_odds_for_match)?;
        check_finite("exceeds_next_best_log_odds", self.exceeds_next_best_log_odds)?;
        check_finite("log_odds_floor", self.log_odds_floor)?;
        if self.log_odds_floor >= self.min_log_odds_for_match {
            return Err(ConfigError::Invalid {
                name: "log_odds_floor",
                message: "must lie below min_log_odds_for_match".to_string(),
            });
        }
        if self.batch_size == 0 {
            return Err(ConfigError::Invalid {
                name: "batch_size",
                message: "must be at least 1".to_string(),
            });
        }
        self.forename.validate("forename")?;
        self.surname.validate("surname")?;
        self.dob.validate()?;
        self.sex.validate()?;
        self.postcode.validate()?;
        Ok(())
    }
}

// -------------------------------------------------------------------------------------------------
// test
// -------------------------------------------------------------------------------------------------
#[cfg(test)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn defaults_are_valid() {
        MatchConfig::default().validate().unwrap();
    }

    #[test]
    fn partial_yaml_keeps_defaults() {
        let yaml = indoc::indoc! {"
            min_log_odds_for_match: 7.5
            surname:
              max_edit_distance: 1
            blocking:
              fallback_full_sweep: false
        "};
        let config: MatchConfig = serde_yaml::from_str(yaml).unwrap();
        config.validate().unwrap();
        assert_eq!(config.min_log_odds_for_match, 7.5);
        assert_eq!(config.exceeds_next_best_log_odds, DEFAULT_EXCEEDS_NEXT_BEST_LOG_ODDS);
        assert_eq!(config.surname.max_edit_distance, 1);
        assert_eq!(config.surname.p_mismatch_same_person, 0.02);
        assert!(!config.blocking.fallback_full_sweep);
        assert!(config.blocking.surname_birth_year);
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let r: Result<MatchConfig, _> = serde_yaml::from_str("min_log_odds: 3.0\n");
        assert!(r.is_err());
    }

    #[test]
    fn invalid_values() {
        let mut c = MatchConfig::default();
        c.sex.p_error = 0.0;
        assert!(matches!(c.validate(), Err(ConfigError::Probability { .. })));

        let mut c = MatchConfig::default();
        c.min_log_odds_for_match = f64::NAN;
        assert!(matches!(c.validate(), Err(ConfigError::NotFinite { .. })));

        let mut c = MatchConfig::default();
        c.postcode.p_moved_elsewhere = 0.99;
        assert!(matches!(c.validate(), Err(ConfigError::Invalid { .. })));

        let mut c = MatchConfig::default();
        c.batch_size = 0;
        assert!(c.validate().is_err());
    }
}
