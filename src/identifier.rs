//! Comparable identifiers.
//!
//! Both plaintext and hashed records are reduced to the same shape before matching: every field
//! becomes a set of tokens that are compared only for equality, plus the frequency metadata the
//! comparators need. In plaintext mode the tokens are canonical values; in hashed mode they are
//! digests of those same canonical values. Only plaintext names keep a surface form, which is
//! what edit-distance comparison needs.

use crate::frequency::FrequencyModel;
use crate::phonetic::phonetic_key;
use crate::pseudonym::HashedRecord;
use crate::record::{canonicalise, FieldKind, IdentityRecord, PartialDate};

// -------------------------------------------------------------------------------------------------
// NameIdentifier
// -------------------------------------------------------------------------------------------------
#[derive(Clone, Debug, PartialEq)]
pub struct NameIdentifier {
    /// Token of the canonical name
    pub exact: String,

    /// Token of the name's phonetic key
    pub phonetic: String,

    /// The canonical name itself; `None` once hashed
    pub surface: Option<String>,

    /// Population frequency of the name
    pub frequency: f64,

    /// Population frequency of the name's phonetic key; never less than `frequency`
    pub phonetic_frequency: f64,
}

// -------------------------------------------------------------------------------------------------
// DobIdentifier
// -------------------------------------------------------------------------------------------------
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DobIdentifier {
    /// `YYYYMMDD`, when the whole date is known
    pub full: Option<String>,

    /// `YYYY`
    pub year: String,

    /// `MMDD`, when the whole date is known
    pub month_day: Option<String>,

    /// `YYYYDDMM`, when the whole date is known and day and month differ
    pub transposed: Option<String>,
}

impl DobIdentifier {
    pub fn from_date(date: &PartialDate) -> Self {
        let year = format!("{:04}", date.year());
        match (date.month(), date.day()) {
            (Some(m), Some(d)) => DobIdentifier {
                full: Some(format!("{year}{m:02}{d:02}")),
                month_day: Some(format!("{m:02}{d:02}")),
                transposed: (m != d).then(|| format!("{year}{d:02}{m:02}")),
                year,
            },
            _ => DobIdentifier {
                full: None,
                year,
                month_day: None,
                transposed: None,
            },
        }
    }

    /// Apply a token transformation (such as hashing) to every token.
    pub fn map_tokens<F: Fn(&str) -> String>(&self, f: F) -> Self {
        DobIdentifier {
            full: self.full.as_deref().map(&f),
            year: f(&self.year),
            month_day: self.month_day.as_deref().map(&f),
            transposed: self.transposed.as_deref().map(&f),
        }
    }
}

// -------------------------------------------------------------------------------------------------
// SexIdentifier
// -------------------------------------------------------------------------------------------------
#[derive(Clone, Debug, PartialEq)]
pub struct SexIdentifier {
    pub token: String,
    pub frequency: f64,
}

// -------------------------------------------------------------------------------------------------
// PostcodeIdentifier
// -------------------------------------------------------------------------------------------------
#[derive(Clone, Debug, PartialEq)]
pub struct PostcodeIdentifier {
    /// Token of the full postcode, when the inward code is known
    pub unit: Option<String>,

    /// Token of the outward code
    pub district: String,

    pub unit_frequency: Option<f64>,
    pub district_frequency: f64,
}

// -------------------------------------------------------------------------------------------------
// MatchableRecord
// -------------------------------------------------------------------------------------------------
/// A record ready for comparison.
///
/// Fields are `None` when absent from the input or disabled in the frequency model.
#[derive(Clone, Debug, PartialEq)]
pub struct MatchableRecord {
    pub local_id: String,

    /// The gold-standard identifier (or its digest), carried along for validation only
    pub gold_standard_id: Option<String>,

    pub forename: Option<NameIdentifier>,
    pub surname: Option<NameIdentifier>,
    pub dob: Option<DobIdentifier>,
    pub sex: Option<SexIdentifier>,
    pub postcode: Option<PostcodeIdentifier>,

    /// Were the tokens built from digests?
    pub hashed: bool,
}

fn plaintext_name(
    field: FieldKind,
    value: Option<&str>,
    model: &FrequencyModel,
) -> Option<NameIdentifier> {
    let canonical = canonicalise(value?);
    if canonical.is_empty() {
        return None;
    }
    let freq = model.name_frequency(field, &canonical)?;
    Some(NameIdentifier {
        phonetic: phonetic_key(&canonical),
        exact: canonical.clone(),
        surface: Some(canonical),
        frequency: freq.value,
        phonetic_frequency: freq.phonetic,
    })
}

fn hashed_name(
    field: FieldKind,
    exact: &Option<String>,
    phonetic: &Option<String>,
    frequency: Option<f64>,
    phonetic_frequency: Option<f64>,
    model: &FrequencyModel,
) -> Option<NameIdentifier> {
    if !model.is_enabled(field) {
        return None;
    }
    let frequency = frequency?.max(model.min_frequency());
    Some(NameIdentifier {
        exact: exact.clone()?,
        phonetic: phonetic.clone()?,
        surface: None,
        frequency,
        phonetic_frequency: phonetic_frequency?.max(frequency),
    })
}

impl MatchableRecord {
    pub fn from_plaintext(record: &IdentityRecord, model: &FrequencyModel) -> Self {
        let dob = match (model.birth_dates(), &record.date_of_birth) {
            (Some(_), Some(date)) => Some(DobIdentifier::from_date(date)),
            _ => None,
        };
        let sex = record.sex.and_then(|sex| {
            model.sex_frequency(sex).map(|frequency| SexIdentifier {
                token: sex.code().to_string(),
                frequency,
            })
        });
        let postcode = record.postcode.as_ref().and_then(|pc| {
            model.postcode_frequency(pc).map(|f| PostcodeIdentifier {
                unit: pc.unit(),
                district: pc.district().to_string(),
                unit_frequency: f.unit,
                district_frequency: f.district,
            })
        });

        MatchableRecord {
            local_id: record.local_id.clone(),
            gold_standard_id: record.gold_standard_id.clone(),
            forename: plaintext_name(FieldKind::Forename, record.forename.as_deref(), model),
            surname: plaintext_name(FieldKind::Surname, record.surname.as_deref(), model),
            dob,
            sex,
            postcode,
            hashed: false,
        }
    }

    /// Build from a hashed record. The frequencies attached to the digests are used as they
    /// are, except that they are raised to the model's minimum frequency.
    pub fn from_hashed(record: &HashedRecord, model: &FrequencyModel) -> Self {
        let floor = model.min_frequency();

        let dob = match (model.birth_dates(), &record.hashed_dob_year) {
            (Some(_), Some(year)) => Some(DobIdentifier {
                full: record.hashed_dob.clone(),
                year: year.clone(),
                month_day: record.hashed_dob_month_day.clone(),
                transposed: record.hashed_dob_transposed.clone(),
            }),
            _ => None,
        };

        let sex = match (&record.hashed_sex, record.sex_frequency) {
            (Some(token), Some(f)) if model.is_enabled(FieldKind::Sex) => Some(SexIdentifier {
                token: token.clone(),
                frequency: f.max(floor),
            }),
            _ => None,
        };

        let postcode = match (&record.hashed_postcode_district, record.postcode_district_frequency)
        {
            (Some(district), Some(df)) if model.is_enabled(FieldKind::Postcode) => {
                let district_frequency = df.max(floor);
                let (unit, unit_frequency) =
                    match (&record.hashed_postcode_unit, record.postcode_unit_frequency) {
                        (Some(u), Some(uf)) => (Some(u.clone()), Some(uf.max(f64::MIN_POSITIVE))),
                        _ => (None, None),
                    };
                Some(PostcodeIdentifier {
                    unit,
                    district: district.clone(),
                    unit_frequency,
                    district_frequency,
                })
            }
            _ => None,
        };

        MatchableRecord {
            local_id: record.local_id.clone(),
            gold_standard_id: record.hashed_gold_standard_id.clone(),
            forename: hashed_name(
                FieldKind::Forename,
                &record.hashed_forename,
                &record.hashed_forename_phonetic,
                record.forename_frequency,
                record.forename_phonetic_frequency,
                model,
            ),
            surname: hashed_name(
                FieldKind::Surname,
                &record.hashed_surname,
                &record.hashed_surname_phonetic,
                record.surname_frequency,
                record.surname_phonetic_frequency,
                model,
            ),
            dob,
            sex,
            postcode,
            hashed: true,
        }
    }

    pub fn has_field(&self, field: FieldKind) -> bool {
        match field {
            FieldKind::Forename => self.forename.is_some(),
            FieldKind::Surname => self.surname.is_some(),
            FieldKind::DateOfBirth => self.dob.is_some(),
            FieldKind::Sex => self.sex.is_some(),
            FieldKind::Postcode => self.postcode.is_some(),
        }
    }

    /// Does this record have any field that can be compared?
    pub fn has_usable_fields(&self) -> bool {
        FieldKind::ALL.iter().any(|f| self.has_field(*f))
    }
}
