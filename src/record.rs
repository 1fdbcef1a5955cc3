use chrono::NaiveDate;
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::error::RowError;

/// Canonicalise an identifier value: upper-case it and drop everything that is not a letter or
/// a digit (whitespace, punctuation, apostrophes, hyphens).
///
/// This is idempotent, and is applied before any comparison or hashing.
///
/// ```
/// # use fuzzyid::record::canonicalise;
/// assert_eq!(canonicalise(" o'Brien-Smith "), "OBRIENSMITH");
/// assert_eq!(canonicalise("cb2 1ab"), "CB21AB");
/// ```
pub fn canonicalise(value: &str) -> String {
    value
        .chars()
        .flat_map(char::to_uppercase)
        .filter(|c| c.is_alphanumeric())
        .collect()
}

/// Trim a value and turn empty strings into `None`.
pub(crate) fn nonblank(value: Option<String>) -> Option<String> {
    value.and_then(|v| {
        let v = v.trim();
        if v.is_empty() {
            None
        } else {
            Some(v.to_string())
        }
    })
}

// -------------------------------------------------------------------------------------------------
// FieldKind
// -------------------------------------------------------------------------------------------------
/// The demographic fields that take part in matching.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    Forename,
    Surname,
    DateOfBirth,
    Sex,
    Postcode,
}

impl FieldKind {
    /// Every field kind, in the order used for reporting.
    pub const ALL: [FieldKind; 5] = [
        FieldKind::Forename,
        FieldKind::Surname,
        FieldKind::DateOfBirth,
        FieldKind::Sex,
        FieldKind::Postcode,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            FieldKind::Forename => "forename",
            FieldKind::Surname => "surname",
            FieldKind::DateOfBirth => "date_of_birth",
            FieldKind::Sex => "sex",
            FieldKind::Postcode => "postcode",
        }
    }

    #[inline]
    pub fn is_name(&self) -> bool {
        matches!(self, FieldKind::Forename | FieldKind::Surname)
    }
}

impl std::fmt::Display for FieldKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

// -------------------------------------------------------------------------------------------------
// Sex
// -------------------------------------------------------------------------------------------------
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Sex {
    #[serde(rename = "M")]
    Male,
    #[serde(rename = "F")]
    Female,
    #[serde(rename = "X")]
    Other,
}

impl Sex {
    pub fn code(&self) -> &'static str {
        match self {
            Sex::Male => "M",
            Sex::Female => "F",
            Sex::Other => "X",
        }
    }
}

impl FromStr for Sex {
    type Err = RowError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match canonicalise(s).as_str() {
            "M" | "MALE" => Ok(Sex::Male),
            "F" | "FEMALE" => Ok(Sex::Female),
            "X" | "OTHER" => Ok(Sex::Other),
            _ => Err(RowError::BadSex(s.to_string())),
        }
    }
}

impl std::fmt::Display for Sex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.code())
    }
}

// -------------------------------------------------------------------------------------------------
// PartialDate
// -------------------------------------------------------------------------------------------------
/// A date of birth that may be only partially known: the year is always present, the month and
/// day may be missing (a day is never known without its month).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PartialDate {
    year: i32,
    month: Option<u32>,
    day: Option<u32>,
}

impl PartialDate {
    pub fn full(date: NaiveDate) -> Self {
        use chrono::Datelike;
        PartialDate {
            year: date.year(),
            month: Some(date.month()),
            day: Some(date.day()),
        }
    }

    pub fn year_only(year: i32) -> Self {
        PartialDate {
            year,
            month: None,
            day: None,
        }
    }

    #[inline]
    pub fn year(&self) -> i32 {
        self.year
    }

    #[inline]
    pub fn month(&self) -> Option<u32> {
        self.month
    }

    #[inline]
    pub fn day(&self) -> Option<u32> {
        self.day
    }

    #[inline]
    pub fn is_complete(&self) -> bool {
        self.day.is_some()
    }

    /// The complete calendar date, if known.
    pub fn as_naive_date(&self) -> Option<NaiveDate> {
        NaiveDate::from_ymd_opt(self.year, self.month?, self.day?)
    }
}

impl FromStr for PartialDate {
    type Err = RowError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let bad = || RowError::BadDate(s.to_string());

        if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
            return Ok(PartialDate::full(date));
        }

        let parts: Vec<&str> = s.split('-').collect();
        let parse_year = |p: &str| -> Result<i32, RowError> {
            if p.len() == 4 && p.bytes().all(|b| b.is_ascii_digit()) {
                p.parse().map_err(|_| bad())
            } else {
                Err(bad())
            }
        };
        match parts.as_slice() {
            [y] => Ok(PartialDate::year_only(parse_year(y)?)),
            [y, m] => {
                let year = parse_year(y)?;
                let month: u32 = m.parse().map_err(|_| bad())?;
                if !(1..=12).contains(&month) {
                    return Err(bad());
                }
                Ok(PartialDate {
                    year,
                    month: Some(month),
                    day: None,
                })
            }
            _ => Err(bad()),
        }
    }
}

impl std::fmt::Display for PartialDate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (self.month, self.day) {
            (Some(m), Some(d)) => write!(f, "{:04}-{:02}-{:02}", self.year, m, d),
            (Some(m), None) => write!(f, "{:04}-{:02}", self.year, m),
            _ => write!(f, "{:04}", self.year),
        }
    }
}

// -------------------------------------------------------------------------------------------------
// Postcode
// -------------------------------------------------------------------------------------------------
lazy_static! {
    // outward code (area + district), then an optional inward code (sector digit + unit letters)
    static ref POSTCODE_PATTERN: Regex =
        Regex::new(r"^([A-Z]{1,2}[0-9][A-Z0-9]?)([0-9][A-Z]{2})?$")
            .expect("postcode regex should compile");
}

/// A UK-style postcode. The outward code (district) is always present; the inward code may be
/// missing when only the district is known.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Postcode {
    outward: String,
    inward: Option<String>,
}

impl Postcode {
    /// The outward code, e.g. `CB2`.
    pub fn district(&self) -> &str {
        &self.outward
    }

    /// The canonical full postcode without spaces, e.g. `CB21AB`, if the inward code is known.
    pub fn unit(&self) -> Option<String> {
        self.inward
            .as_ref()
            .map(|inward| format!("{}{}", self.outward, inward))
    }
}

impl FromStr for Postcode {
    type Err = RowError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let canonical = canonicalise(s);
        let captures = POSTCODE_PATTERN
            .captures(&canonical)
            .ok_or_else(|| RowError::BadPostcode(s.to_string()))?;
        Ok(Postcode {
            outward: captures[1].to_string(),
            inward: captures.get(2).map(|m| m.as_str().to_string()),
        })
    }
}

impl std::fmt::Display for Postcode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.inward {
            Some(inward) => write!(f, "{} {}", self.outward, inward),
            None => write!(f, "{}", self.outward),
        }
    }
}

// -------------------------------------------------------------------------------------------------
// IdentityRecord
// -------------------------------------------------------------------------------------------------
/// One person, as supplied by either the proband side or the sample side.
///
/// Absent demographics are `None`, and are excluded from comparison rather than scored as
/// mismatches.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IdentityRecord {
    /// Caller-assigned identifier, unique within its source and never empty
    pub local_id: String,

    pub forename: Option<String>,
    pub surname: Option<String>,
    pub date_of_birth: Option<PartialDate>,
    pub sex: Option<Sex>,
    pub postcode: Option<Postcode>,

    /// An opaque identifier used only to judge correctness during validation
    pub gold_standard_id: Option<String>,
}

impl IdentityRecord {
    /// Create a record with the given local ID and no demographics.
    pub fn new<S: Into<String>>(local_id: S) -> Self {
        IdentityRecord {
            local_id: local_id.into(),
            forename: None,
            surname: None,
            date_of_birth: None,
            sex: None,
            postcode: None,
            gold_standard_id: None,
        }
    }

    /// Does this record carry any demographic field at all?
    pub fn has_demographics(&self) -> bool {
        self.forename.is_some()
            || self.surname.is_some()
            || self.date_of_birth.is_some()
            || self.sex.is_some()
            || self.postcode.is_some()
    }
}

// -------------------------------------------------------------------------------------------------
// test
// -------------------------------------------------------------------------------------------------
#[cfg(test)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    #[test]
    fn date_formats() {
        let d: PartialDate = "1980-01-02".parse().unwrap();
        assert!(d.is_complete());
        assert_eq!(d.to_string(), "1980-01-02");

        let d: PartialDate = "1980-07".parse().unwrap();
        assert_eq!((d.year(), d.month(), d.day()), (1980, Some(7), None));

        let d: PartialDate = " 1980 ".parse().unwrap();
        assert_eq!(d, PartialDate::year_only(1980));

        assert!("1980-02-30".parse::<PartialDate>().is_err());
        assert!("1980-13".parse::<PartialDate>().is_err());
        assert!("80".parse::<PartialDate>().is_err());
        assert!("yesterday".parse::<PartialDate>().is_err());
    }

    #[test]
    fn postcode_parts() {
        let p: Postcode = "cb2 1ab".parse().unwrap();
        assert_eq!(p.district(), "CB2");
        assert_eq!(p.unit().as_deref(), Some("CB21AB"));
        assert_eq!(p.to_string(), "CB2 1AB");

        let p: Postcode = "SW1A1AA".parse().unwrap();
        assert_eq!(p.district(), "SW1A");
        assert_eq!(p.unit().as_deref(), Some("SW1A1AA"));

        let p: Postcode = "M1".parse().unwrap();
        assert_eq!(p.district(), "M1");
        assert_eq!(p.unit(), None);

        assert!("not a postcode".parse::<Postcode>().is_err());
        assert!("12345".parse::<Postcode>().is_err());
    }

    #[test]
    fn sex_codes() {
        assert_eq!("f".parse::<Sex>().unwrap(), Sex::Female);
        assert_eq!("Male".parse::<Sex>().unwrap(), Sex::Male);
        assert_eq!("X".parse::<Sex>().unwrap(), Sex::Other);
        assert!("Q".parse::<Sex>().is_err());
    }

    #[test]
    fn empty_record_has_no_demographics() {
        let r = IdentityRecord::new("P1");
        assert!(!r.has_demographics());
    }

    proptest! {
        #[test]
        fn canonicalise_is_idempotent(s in "[a-zA-Z0-9 '\\-.éüßØ]{0,24}") {
            let once = canonicalise(&s);
            prop_assert_eq!(canonicalise(&once), once);
        }
    }
}
