//! Per-field evidence.
//!
//! Every comparator returns the natural log of the likelihood ratio
//! `P(observation | same person) / P(observation | different people)`.
//! Comparators only ever test tokens for equality, so they behave the same on plaintext and on
//! digests. The one exception is typo credit for names, which needs plaintext on both sides; when
//! it is unavailable the comparison is flagged as degraded.

use serde::Serialize;

use crate::frequency::{BirthDateDistribution, FrequencyModel};
use crate::identifier::{
    DobIdentifier, MatchableRecord, NameIdentifier, PostcodeIdentifier, SexIdentifier,
};
use crate::params::{DobParams, MatchConfig, NameParams, PostcodeParams, SexParams};

pub use crate::record::FieldKind;

// -------------------------------------------------------------------------------------------------
// Agreement
// -------------------------------------------------------------------------------------------------
/// How two values of one field agreed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Agreement {
    /// The field was missing on one side or both
    NotCompared,

    Exact,

    /// Names with the same phonetic code
    Phonetic,

    /// Names within a small edit distance
    Typo,

    /// Dates of birth with day and month swapped
    Transposed,

    /// Dates of birth agreeing on the year only
    YearOnly,

    /// Dates of birth agreeing on day and month only
    MonthDayOnly,

    /// Postcodes agreeing on the outward code only
    District,

    Mismatch,
}

impl Agreement {
    pub fn name(&self) -> &'static str {
        match self {
            Agreement::NotCompared => "not_compared",
            Agreement::Exact => "exact",
            Agreement::Phonetic => "phonetic",
            Agreement::Typo => "typo",
            Agreement::Transposed => "transposed",
            Agreement::YearOnly => "year_only",
            Agreement::MonthDayOnly => "month_day_only",
            Agreement::District => "district",
            Agreement::Mismatch => "mismatch",
        }
    }
}

impl std::fmt::Display for Agreement {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

// -------------------------------------------------------------------------------------------------
// FieldComparison
// -------------------------------------------------------------------------------------------------
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct FieldComparison {
    pub field: FieldKind,
    pub agreement: Agreement,

    /// Natural-log likelihood ratio; zero when not compared
    pub log_lr: f64,

    /// Set when less precise evidence was used because plaintext was unavailable
    pub degraded: bool,
}

impl FieldComparison {
    #[inline]
    pub fn not_compared(field: FieldKind) -> Self {
        FieldComparison {
            field,
            agreement: Agreement::NotCompared,
            log_lr: 0.0,
            degraded: false,
        }
    }

    #[inline]
    fn new(field: FieldKind, agreement: Agreement, log_lr: f64) -> Self {
        FieldComparison {
            field,
            agreement,
            log_lr,
            degraded: false,
        }
    }

    #[inline]
    pub fn is_compared(&self) -> bool {
        self.agreement != Agreement::NotCompared
    }
}

// -------------------------------------------------------------------------------------------------
// dispatch
// -------------------------------------------------------------------------------------------------
/// Compare one field of two records.
///
/// Frequencies are taken from the proband side.
pub fn compare_field(
    field: FieldKind,
    proband: &MatchableRecord,
    candidate: &MatchableRecord,
    config: &MatchConfig,
    model: &FrequencyModel,
) -> FieldComparison {
    let floor = model.min_frequency();
    match field {
        FieldKind::Forename => match (&proband.forename, &candidate.forename) {
            (Some(a), Some(b)) => compare_names(field, a, b, &config.forename, floor),
            _ => FieldComparison::not_compared(field),
        },
        FieldKind::Surname => match (&proband.surname, &candidate.surname) {
            (Some(a), Some(b)) => compare_names(field, a, b, &config.surname, floor),
            _ => FieldComparison::not_compared(field),
        },
        FieldKind::DateOfBirth => match (&proband.dob, &candidate.dob, model.birth_dates()) {
            (Some(a), Some(b), Some(dist)) => compare_dobs(a, b, &config.dob, dist),
            _ => FieldComparison::not_compared(field),
        },
        FieldKind::Sex => match (&proband.sex, &candidate.sex) {
            (Some(a), Some(b)) => compare_sexes(a, b, &config.sex),
            _ => FieldComparison::not_compared(field),
        },
        FieldKind::Postcode => match (&proband.postcode, &candidate.postcode) {
            (Some(a), Some(b)) => compare_postcodes(a, b, &config.postcode, floor),
            _ => FieldComparison::not_compared(field),
        },
    }
}

// -------------------------------------------------------------------------------------------------
// names
// -------------------------------------------------------------------------------------------------
/// Compare two forenames or two surnames.
///
/// With `f` the proband name's frequency and `p >= f` its phonetic code's frequency:
///
/// - exact match: `ln((1 - e_phonetic - e_mismatch) / f)`
/// - phonetic match: `ln(e_phonetic / max(p - f, f))`, but at least `min_phonetic_log_odds`,
///   and never more than the exact-match score
/// - typo (plaintext only): `typo_log_odds * typo_decay^(d - 1)` for edit distance `d`
/// - otherwise: `ln(e_mismatch / (1 - p))`
pub fn compare_names(
    field: FieldKind,
    proband: &NameIdentifier,
    candidate: &NameIdentifier,
    params: &NameParams,
    floor: f64,
) -> FieldComparison {
    let f = proband.frequency.max(floor);
    let p = proband.phonetic_frequency.max(f);
    let e_none = params.p_mismatch_same_person;
    let e_partial = params.p_phonetic_only_same_person;

    let exact = ((1.0 - e_partial - e_none) / f).ln();
    if proband.exact == candidate.exact {
        return FieldComparison::new(field, Agreement::Exact, exact);
    }

    if proband.phonetic == candidate.phonetic {
        // the other spellings in the class are taken to be at least as common as the proband's
        let log_lr = (e_partial / (p - f).max(f))
            .ln()
            .max(params.min_phonetic_log_odds)
            .min(exact);
        return FieldComparison::new(field, Agreement::Phonetic, log_lr);
    }

    let mismatch = (e_none / (1.0 - p).max(floor)).ln();
    match (&proband.surface, &candidate.surface) {
        (Some(a), Some(b)) => match typo_distance(a, b, params.max_edit_distance) {
            Some(d) => {
                let log_lr = params.typo_log_odds * params.typo_decay.powi(d as i32 - 1);
                FieldComparison::new(field, Agreement::Typo, log_lr)
            }
            None => FieldComparison::new(field, Agreement::Mismatch, mismatch),
        },
        _ => FieldComparison {
            degraded: true,
            ..FieldComparison::new(field, Agreement::Mismatch, mismatch)
        },
    }
}

/// The Damerau-Levenshtein distance between two different names, if it is small enough to be
/// a plausible typo: at most `max_distance`, and small relative to the shorter name.
fn typo_distance(a: &str, b: &str, max_distance: usize) -> Option<usize> {
    if max_distance == 0 {
        return None;
    }
    let shorter = a.chars().count().min(b.chars().count());
    let d = strsim::damerau_levenshtein(a, b);
    if d >= 1 && d <= max_distance && 2 * d < shorter {
        Some(d)
    } else {
        None
    }
}

// -------------------------------------------------------------------------------------------------
// date of birth
// -------------------------------------------------------------------------------------------------
pub fn compare_dobs(
    proband: &DobIdentifier,
    candidate: &DobIdentifier,
    params: &DobParams,
    dist: &BirthDateDistribution,
) -> FieldComparison {
    let field = FieldKind::DateOfBirth;
    let same_person = 1.0 - params.p_error;

    match (&proband.full, &candidate.full) {
        (Some(a), Some(b)) => {
            if a == b {
                FieldComparison::new(field, Agreement::Exact, (same_person / dist.p_full()).ln())
            } else if proband.transposed.as_ref() == Some(b)
                || candidate.transposed.as_ref() == Some(a)
            {
                FieldComparison::new(field, Agreement::Transposed, params.transposed_log_odds)
            } else if proband.year == candidate.year {
                FieldComparison::new(field, Agreement::YearOnly, params.year_only_log_odds)
            } else if proband.month_day.is_some() && proband.month_day == candidate.month_day {
                FieldComparison::new(field, Agreement::MonthDayOnly, params.month_day_only_log_odds)
            } else {
                FieldComparison::new(field, Agreement::Mismatch, params.mismatch_log_odds)
            }
        }
        // at least one side knows only the year
        _ => {
            if proband.year == candidate.year {
                FieldComparison::new(field, Agreement::YearOnly, (same_person / dist.p_year()).ln())
            } else {
                FieldComparison::new(field, Agreement::Mismatch, params.mismatch_log_odds)
            }
        }
    }
}

// -------------------------------------------------------------------------------------------------
// sex
// -------------------------------------------------------------------------------------------------
pub fn compare_sexes(
    proband: &SexIdentifier,
    candidate: &SexIdentifier,
    params: &SexParams,
) -> FieldComparison {
    if proband.token == candidate.token {
        FieldComparison::new(
            FieldKind::Sex,
            Agreement::Exact,
            ((1.0 - params.p_error) / proband.frequency).ln(),
        )
    } else {
        FieldComparison::new(FieldKind::Sex, Agreement::Mismatch, params.mismatch_log_odds)
    }
}

// -------------------------------------------------------------------------------------------------
// postcode
// -------------------------------------------------------------------------------------------------
/// Compare two postcodes with partial credit for sharing a district.
///
/// A mismatch counts for more in a sparsely populated district than in a dense one.
pub fn compare_postcodes(
    proband: &PostcodeIdentifier,
    candidate: &PostcodeIdentifier,
    params: &PostcodeParams,
    floor: f64,
) -> FieldComparison {
    let field = FieldKind::Postcode;
    let within = params.p_moved_within_district;
    let elsewhere = params.p_moved_elsewhere;
    let p_district = proband.district_frequency.max(floor);
    let same_district = proband.district == candidate.district;

    let mismatch = || {
        FieldComparison::new(
            field,
            Agreement::Mismatch,
            (elsewhere / (1.0 - p_district).max(floor)).ln(),
        )
    };

    match (&proband.unit, proband.unit_frequency, &candidate.unit) {
        (Some(a), Some(p_unit), Some(b)) => {
            if a == b {
                FieldComparison::new(field, Agreement::Exact, ((1.0 - within - elsewhere) / p_unit).ln())
            } else if same_district {
                FieldComparison::new(
                    field,
                    Agreement::District,
                    (within / (p_district - p_unit).max(floor)).ln(),
                )
            } else {
                mismatch()
            }
        }
        // at least one side knows only the district
        _ => {
            if same_district {
                FieldComparison::new(field, Agreement::District, ((1.0 - elsewhere) / p_district).ln())
            } else {
                mismatch()
            }
        }
    }
}
