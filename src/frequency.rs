use chrono::NaiveDate;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;
use tracing::{debug, debug_span};

use crate::error::FrequencyError;
use crate::phonetic::phonetic_key;
use crate::record::{canonicalise, FieldKind, PartialDate, Postcode, Sex};

/// The probability assigned to values that do not appear in a reference table.
pub const DEFAULT_MIN_FREQUENCY: f64 = 1e-5;

/// How many postcode units a district is assumed to contain when its reference row doesn't say.
pub const DEFAULT_UNITS_PER_DISTRICT: u32 = 600;

pub const DEFAULT_FIRST_BIRTH_YEAR: i32 = 1900;
pub const DEFAULT_LAST_BIRTH_YEAR: i32 = 2025;

/// Allowed rounding slack when checking that a table's probabilities sum to at most 1.
const MASS_TOLERANCE: f64 = 1e-6;

fn check_mass(field: FieldKind, total: f64) -> Result<(), FrequencyError> {
    if total > 1.0 + MASS_TOLERANCE {
        Err(FrequencyError::ExcessMass {
            field: field.name(),
            total,
        })
    } else {
        Ok(())
    }
}

fn check_probability(field: FieldKind, row: usize, p: f64) -> Result<(), FrequencyError> {
    if p.is_finite() && (0.0..=1.0).contains(&p) {
        Ok(())
    } else {
        Err(FrequencyError::Malformed {
            field: field.name(),
            row,
            message: format!("frequency {p} is not a probability"),
        })
    }
}

fn open_reference(field: FieldKind, path: &Path) -> Result<BufReader<File>, FrequencyError> {
    let file = File::open(path).map_err(|source| FrequencyError::Io {
        field: field.name(),
        path: path.to_owned(),
        source,
    })?;
    Ok(BufReader::new(file))
}

// -------------------------------------------------------------------------------------------------
// FrequencyTable
// -------------------------------------------------------------------------------------------------
#[derive(Deserialize)]
struct FrequencyRow {
    value: String,
    frequency: f64,
}

/// Population frequencies of the values of one categorical field.
///
/// Keys are canonical values. For name fields, a second table maps each phonetic code to the
/// summed frequency of every value carrying that code.
#[derive(Clone, Debug)]
pub struct FrequencyTable {
    field: FieldKind,
    values: BTreeMap<String, f64>,
    phonetic: BTreeMap<String, f64>,
}

impl FrequencyTable {
    /// Load a table from CSV with `value,frequency` columns.
    ///
    /// Values that canonicalise to the same string have their frequencies added together.
    pub fn from_reader<R: Read>(field: FieldKind, reader: R) -> Result<Self, FrequencyError> {
        let mut rdr = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(reader);

        let mut values: BTreeMap<String, f64> = BTreeMap::new();
        for (idx, row) in rdr.deserialize::<FrequencyRow>().enumerate() {
            let row_num = idx + 1;
            let row = row.map_err(|e| FrequencyError::Malformed {
                field: field.name(),
                row: row_num,
                message: e.to_string(),
            })?;
            check_probability(field, row_num, row.frequency)?;

            let key = match field {
                FieldKind::Sex => row
                    .value
                    .parse::<Sex>()
                    .map_err(|e| FrequencyError::Malformed {
                        field: field.name(),
                        row: row_num,
                        message: e.to_string(),
                    })?
                    .code()
                    .to_string(),
                _ => canonicalise(&row.value),
            };
            if key.is_empty() {
                return Err(FrequencyError::Malformed {
                    field: field.name(),
                    row: row_num,
                    message: "empty value".to_string(),
                });
            }
            *values.entry(key).or_insert(0.0) += row.frequency;
        }

        check_mass(field, values.values().sum())?;

        let mut phonetic: BTreeMap<String, f64> = BTreeMap::new();
        if field.is_name() {
            for (value, p) in values.iter() {
                *phonetic.entry(phonetic_key(value)).or_insert(0.0) += p;
            }
        }

        Ok(FrequencyTable {
            field,
            values,
            phonetic,
        })
    }

    pub fn from_path<P: AsRef<Path>>(field: FieldKind, path: P) -> Result<Self, FrequencyError> {
        let path = path.as_ref();
        let _span = debug_span!("frequency_table", "{}", path.display()).entered();
        let table = Self::from_reader(field, open_reference(field, path)?).map_err(|e| match e {
            FrequencyError::Malformed { field, row, message } => FrequencyError::Malformed {
                field,
                row,
                message: format!("{}: {message}", path.display()),
            },
            e => e,
        })?;
        debug!("Loaded {} {} frequencies", table.len(), field);
        Ok(table)
    }

    #[inline]
    pub fn field(&self) -> FieldKind {
        self.field
    }

    /// The frequency of a canonical value, if the table has it.
    #[inline]
    pub fn get(&self, canonical: &str) -> Option<f64> {
        self.values.get(canonical).copied()
    }

    /// The summed frequency of all values with the given phonetic code.
    #[inline]
    pub fn get_phonetic(&self, code: &str) -> Option<f64> {
        self.phonetic.get(code).copied()
    }

    /// All values and their frequencies, in lexicographic order of value.
    pub fn entries(&self) -> impl Iterator<Item = (&str, f64)> {
        self.values.iter().map(|(v, p)| (v.as_str(), *p))
    }

    pub fn total_mass(&self) -> f64 {
        self.values.values().sum()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

// -------------------------------------------------------------------------------------------------
// PostcodeTable
// -------------------------------------------------------------------------------------------------
#[derive(Deserialize)]
struct PostcodeRow {
    district: String,
    frequency: f64,
    #[serde(default)]
    units: Option<u32>,
}

/// Reference data for one postcode district.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DistrictFrequency {
    /// Fraction of the population living in the district
    pub share: f64,

    /// Number of postcode units in the district, if known
    pub units: Option<u32>,
}

/// Population shares of postcode districts (outward codes).
#[derive(Clone, Debug)]
pub struct PostcodeTable {
    districts: BTreeMap<String, DistrictFrequency>,
}

impl PostcodeTable {
    /// Load a table from CSV with `district,frequency` columns and an optional `units` column.
    pub fn from_reader<R: Read>(reader: R) -> Result<Self, FrequencyError> {
        let field = FieldKind::Postcode;
        let mut rdr = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(reader);

        let mut districts: BTreeMap<String, DistrictFrequency> = BTreeMap::new();
        for (idx, row) in rdr.deserialize::<PostcodeRow>().enumerate() {
            let row_num = idx + 1;
            let malformed = |message: String| FrequencyError::Malformed {
                field: field.name(),
                row: row_num,
                message,
            };
            let row = row.map_err(|e| malformed(e.to_string()))?;
            check_probability(field, row_num, row.frequency)?;
            if row.units == Some(0) {
                return Err(malformed("a district cannot have zero units".to_string()));
            }

            let postcode: Postcode = row.district.parse().map_err(|_| {
                malformed(format!("{:?} is not a postcode district", row.district))
            })?;
            if postcode.unit().is_some() {
                return Err(malformed(format!(
                    "{:?} is a full postcode, not a district",
                    row.district
                )));
            }

            let entry = districts
                .entry(postcode.district().to_string())
                .or_insert(DistrictFrequency {
                    share: 0.0,
                    units: None,
                });
            entry.share += row.frequency;
            entry.units = match (entry.units, row.units) {
                (Some(a), Some(b)) => Some(a.checked_add(b).ok_or_else(|| {
                    malformed(format!("unit count for {:?} overflows", row.district))
                })?),
                (a, b) => a.or(b),
            };
        }

        check_mass(field, districts.values().map(|d| d.share).sum())?;
        Ok(PostcodeTable { districts })
    }

    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self, FrequencyError> {
        let path = path.as_ref();
        let _span = debug_span!("postcode_table", "{}", path.display()).entered();
        let table = Self::from_reader(open_reference(FieldKind::Postcode, path)?)?;
        debug!("Loaded {} postcode district frequencies", table.len());
        Ok(table)
    }

    #[inline]
    pub fn get(&self, district: &str) -> Option<DistrictFrequency> {
        self.districts.get(district).copied()
    }

    /// All districts and their reference data, in lexicographic order of district.
    pub fn entries(&self) -> impl Iterator<Item = (&str, DistrictFrequency)> {
        self.districts.iter().map(|(d, f)| (d.as_str(), *f))
    }

    pub fn len(&self) -> usize {
        self.districts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.districts.is_empty()
    }
}

// -------------------------------------------------------------------------------------------------
// BirthDateDistribution
// -------------------------------------------------------------------------------------------------
/// Dates of birth are assumed uniformly distributed over a range of whole years.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BirthDateDistribution {
    first_year: i32,
    last_year: i32,
    n_days: u32,
}

impl BirthDateDistribution {
    pub fn new(first_year: i32, last_year: i32) -> Result<Self, FrequencyError> {
        let bad_range = || FrequencyError::BirthYearRange {
            first: first_year,
            last: last_year,
        };
        if first_year > last_year {
            return Err(bad_range());
        }
        let start = NaiveDate::from_ymd_opt(first_year, 1, 1).ok_or_else(bad_range)?;
        let end = NaiveDate::from_ymd_opt(last_year + 1, 1, 1).ok_or_else(bad_range)?;
        let n_days = u32::try_from((end - start).num_days()).map_err(|_| bad_range())?;
        Ok(BirthDateDistribution {
            first_year,
            last_year,
            n_days,
        })
    }

    #[inline]
    pub fn first_year(&self) -> i32 {
        self.first_year
    }

    #[inline]
    pub fn last_year(&self) -> i32 {
        self.last_year
    }

    #[inline]
    pub fn n_years(&self) -> u32 {
        (self.last_year - self.first_year + 1) as u32
    }

    #[inline]
    pub fn n_days(&self) -> u32 {
        self.n_days
    }

    /// Probability that two random people share a complete date of birth.
    pub fn p_full(&self) -> f64 {
        1.0 / f64::from(self.n_days)
    }

    /// Probability that two random people share a birth year.
    pub fn p_year(&self) -> f64 {
        1.0 / f64::from(self.n_years())
    }

    /// Probability that two random people share a birthday (month and day).
    pub fn p_month_day(&self) -> f64 {
        f64::from(self.n_years()) / f64::from(self.n_days)
    }

    /// The `offset`-th day of the range, counting from zero.
    pub fn nth_day(&self, offset: u32) -> Option<NaiveDate> {
        let start = NaiveDate::from_ymd_opt(self.first_year, 1, 1)?;
        start.checked_add_days(chrono::Days::new(u64::from(offset % self.n_days)))
    }
}

// -------------------------------------------------------------------------------------------------
// FrequencyModel
// -------------------------------------------------------------------------------------------------
/// Frequencies looked up for a name: of the value itself and of its phonetic code.
///
/// `phonetic >= value` always holds.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct NameFrequency {
    pub value: f64,
    pub phonetic: f64,
}

/// Frequencies looked up for a postcode.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PostcodeFrequency {
    /// Probability of the full postcode unit, when the postcode has one
    pub unit: Option<f64>,
    pub district: f64,
}

/// Prior probabilities of identifier values, for every field that has reference data.
///
/// A field without reference data is disabled and takes no part in scoring.
/// The model is immutable once built.
#[derive(Clone, Debug)]
pub struct FrequencyModel {
    forename: Option<FrequencyTable>,
    surname: Option<FrequencyTable>,
    sex: Option<FrequencyTable>,
    postcode: Option<PostcodeTable>,
    birth_dates: Option<BirthDateDistribution>,
    min_frequency: f64,
    default_units_per_district: u32,
}

impl FrequencyModel {
    pub fn builder() -> FrequencyModelBuilder {
        FrequencyModelBuilder::default()
    }

    /// Build a model from the embedded default reference data.
    pub fn from_defaults() -> Result<Self, FrequencyError> {
        FrequencyModelBuilder::with_defaults()?.build()
    }

    #[inline]
    pub fn min_frequency(&self) -> f64 {
        self.min_frequency
    }

    #[inline]
    pub fn default_units_per_district(&self) -> u32 {
        self.default_units_per_district
    }

    pub fn is_enabled(&self, field: FieldKind) -> bool {
        match field {
            FieldKind::Forename => self.forename.is_some(),
            FieldKind::Surname => self.surname.is_some(),
            FieldKind::DateOfBirth => self.birth_dates.is_some(),
            FieldKind::Sex => self.sex.is_some(),
            FieldKind::Postcode => self.postcode.is_some(),
        }
    }

    pub fn enabled_fields(&self) -> Vec<FieldKind> {
        FieldKind::ALL
            .into_iter()
            .filter(|f| self.is_enabled(*f))
            .collect()
    }

    #[inline]
    fn floor(&self, p: Option<f64>) -> f64 {
        p.unwrap_or(self.min_frequency).max(self.min_frequency)
    }

    /// The probability that a random person has the given value in the given field.
    ///
    /// Returns `None` if the field is disabled. Values missing from the reference data, and
    /// values that cannot be parsed for the field, get the minimum frequency.
    pub fn probability_of(&self, field: FieldKind, value: &str) -> Option<f64> {
        match field {
            FieldKind::Forename | FieldKind::Surname => {
                self.name_frequency(field, value).map(|f| f.value)
            }
            FieldKind::Sex => match value.parse::<Sex>() {
                Ok(sex) => self.sex_frequency(sex),
                Err(_) => self.sex.as_ref().map(|_| self.min_frequency),
            },
            FieldKind::Postcode => match value.parse::<Postcode>() {
                Ok(pc) => self
                    .postcode_frequency(&pc)
                    .map(|f| f.unit.unwrap_or(f.district)),
                Err(_) => self.postcode.as_ref().map(|_| self.min_frequency),
            },
            FieldKind::DateOfBirth => {
                let dist = self.birth_dates.as_ref()?;
                match value.parse::<PartialDate>() {
                    Ok(d) if d.is_complete() => Some(dist.p_full()),
                    Ok(_) => Some(dist.p_year()),
                    Err(_) => Some(self.min_frequency),
                }
            }
        }
    }

    fn name_table(&self, field: FieldKind) -> Option<&FrequencyTable> {
        match field {
            FieldKind::Forename => self.forename.as_ref(),
            FieldKind::Surname => self.surname.as_ref(),
            _ => None,
        }
    }

    /// Frequencies of a forename or surname and of its phonetic code.
    ///
    /// Returns `None` for a disabled field or a field that is not a name.
    pub fn name_frequency(&self, field: FieldKind, value: &str) -> Option<NameFrequency> {
        let table = self.name_table(field)?;
        let canonical = canonicalise(value);
        let value = self.floor(table.get(&canonical));
        let phonetic = self.floor(table.get_phonetic(&phonetic_key(&canonical)));
        Some(NameFrequency {
            value,
            phonetic: phonetic.max(value),
        })
    }

    pub fn sex_frequency(&self, sex: Sex) -> Option<f64> {
        let table = self.sex.as_ref()?;
        Some(self.floor(table.get(sex.code())))
    }

    pub fn postcode_frequency(&self, postcode: &Postcode) -> Option<PostcodeFrequency> {
        let table = self.postcode.as_ref()?;
        let entry = table.get(postcode.district());
        let district = self.floor(entry.map(|e| e.share));
        let units = entry
            .and_then(|e| e.units)
            .unwrap_or(self.default_units_per_district);
        Some(PostcodeFrequency {
            unit: postcode.unit().map(|_| district / f64::from(units)),
            district,
        })
    }

    pub fn birth_dates(&self) -> Option<&BirthDateDistribution> {
        self.birth_dates.as_ref()
    }

    pub fn forenames(&self) -> Option<&FrequencyTable> {
        self.forename.as_ref()
    }

    pub fn surnames(&self) -> Option<&FrequencyTable> {
        self.surname.as_ref()
    }

    pub fn sexes(&self) -> Option<&FrequencyTable> {
        self.sex.as_ref()
    }

    pub fn postcodes(&self) -> Option<&PostcodeTable> {
        self.postcode.as_ref()
    }
}

// -------------------------------------------------------------------------------------------------
// FrequencyModelBuilder
// -------------------------------------------------------------------------------------------------
#[derive(Clone, Debug)]
pub struct FrequencyModelBuilder {
    forename: Option<FrequencyTable>,
    surname: Option<FrequencyTable>,
    sex: Option<FrequencyTable>,
    postcode: Option<PostcodeTable>,
    birth_years: Option<(i32, i32)>,
    min_frequency: f64,
    default_units_per_district: u32,
}

impl Default for FrequencyModelBuilder {
    fn default() -> Self {
        FrequencyModelBuilder {
            forename: None,
            surname: None,
            sex: None,
            postcode: None,
            birth_years: None,
            min_frequency: DEFAULT_MIN_FREQUENCY,
            default_units_per_district: DEFAULT_UNITS_PER_DISTRICT,
        }
    }
}

impl FrequencyModelBuilder {
    /// A builder preloaded with the embedded default reference data for every field.
    pub fn with_defaults() -> Result<Self, FrequencyError> {
        use crate::defaults::{
            DEFAULT_FORENAMES, DEFAULT_POSTCODES, DEFAULT_SEXES, DEFAULT_SURNAMES,
        };
        Ok(Self::default()
            .forenames(FrequencyTable::from_reader(
                FieldKind::Forename,
                DEFAULT_FORENAMES.as_bytes(),
            )?)
            .surnames(FrequencyTable::from_reader(
                FieldKind::Surname,
                DEFAULT_SURNAMES.as_bytes(),
            )?)
            .sexes(FrequencyTable::from_reader(FieldKind::Sex, DEFAULT_SEXES.as_bytes())?)
            .postcodes(PostcodeTable::from_reader(DEFAULT_POSTCODES.as_bytes())?)
            .birth_years(DEFAULT_FIRST_BIRTH_YEAR, DEFAULT_LAST_BIRTH_YEAR))
    }

    pub fn forenames(mut self, table: FrequencyTable) -> Self {
        self.forename = Some(table);
        self
    }

    pub fn surnames(mut self, table: FrequencyTable) -> Self {
        self.surname = Some(table);
        self
    }

    pub fn sexes(mut self, table: FrequencyTable) -> Self {
        self.sex = Some(table);
        self
    }

    pub fn postcodes(mut self, table: PostcodeTable) -> Self {
        self.postcode = Some(table);
        self
    }

    pub fn birth_years(mut self, first: i32, last: i32) -> Self {
        self.birth_years = Some((first, last));
        self
    }

    /// Disable a field, dropping any reference data given for it.
    pub fn disable(mut self, field: FieldKind) -> Self {
        match field {
            FieldKind::Forename => self.forename = None,
            FieldKind::Surname => self.surname = None,
            FieldKind::DateOfBirth => self.birth_years = None,
            FieldKind::Sex => self.sex = None,
            FieldKind::Postcode => self.postcode = None,
        }
        self
    }

    pub fn min_frequency(mut self, min_frequency: f64) -> Self {
        self.min_frequency = min_frequency;
        self
    }

    pub fn default_units_per_district(mut self, units: u32) -> Self {
        self.default_units_per_district = units;
        self
    }

    pub fn build(self) -> Result<FrequencyModel, FrequencyError> {
        if !(self.min_frequency > 0.0 && self.min_frequency < 1.0) {
            return Err(FrequencyError::MinFrequency(self.min_frequency));
        }
        let birth_dates = match self.birth_years {
            Some((first, last)) => Some(BirthDateDistribution::new(first, last)?),
            None => None,
        };
        let model = FrequencyModel {
            forename: self.forename,
            surname: self.surname,
            sex: self.sex,
            postcode: self.postcode,
            birth_dates,
            min_frequency: self.min_frequency,
            default_units_per_district: self.default_units_per_district.max(1),
        };
        if model.enabled_fields().is_empty() {
            return Err(FrequencyError::NoFields);
        }
        debug!("Frequency model enabled for {:?}", model.enabled_fields());
        Ok(model)
    }
}

// -------------------------------------------------------------------------------------------------
// test
// -------------------------------------------------------------------------------------------------
#[cfg(test)]
mod test {
    use super::*;
    use pretty_assertions::assert_eq;

    fn names(csv: &str) -> FrequencyTable {
        FrequencyTable::from_reader(FieldKind::Forename, csv.as_bytes()).unwrap()
    }

    #[test]
    fn phonetic_mass_is_summed() {
        let t = names("value,frequency\nJane,0.01\nJAYNE,0.002\nJohn,0.02\n");
        assert_eq!(t.get("JANE"), Some(0.01));
        assert_eq!(t.get("Jane"), None);
        let jn = t.get_phonetic("JN").unwrap();
        assert!((jn - 0.032).abs() < 1e-12, "{jn}");
    }

    #[test]
    fn canonical_duplicates_merge() {
        let t = names("value,frequency\nO'Brien,0.01\nOBRIEN,0.02\n");
        assert_eq!(t.len(), 1);
        assert!((t.get("OBRIEN").unwrap() - 0.03).abs() < 1e-12);
    }

    #[test]
    fn excess_mass_is_rejected() {
        let r = FrequencyTable::from_reader(
            FieldKind::Surname,
            "value,frequency\nA,0.6\nB,0.5\n".as_bytes(),
        );
        assert!(matches!(r, Err(FrequencyError::ExcessMass { .. })));
    }

    #[test]
    fn bad_frequency_is_malformed() {
        for csv in [
            "value,frequency\nA,1.5\n",
            "value,frequency\nA,-0.1\n",
            "value,frequency\nA,lots\n",
            "value,frequency\n--,0.1\n",
        ] {
            let r = FrequencyTable::from_reader(FieldKind::Surname, csv.as_bytes());
            assert!(matches!(r, Err(FrequencyError::Malformed { row: 1, .. })), "{csv}");
        }
    }

    #[test]
    fn sex_values_must_be_sexes() {
        let r = FrequencyTable::from_reader(FieldKind::Sex, "value,frequency\nQ,0.5\n".as_bytes());
        assert!(matches!(r, Err(FrequencyError::Malformed { .. })));
    }

    #[test]
    fn postcode_units() {
        let t = PostcodeTable::from_reader(
            "district,frequency,units\ncb2,0.001,500\nM1,0.002,\n".as_bytes(),
        )
        .unwrap();
        assert_eq!(
            t.get("CB2"),
            Some(DistrictFrequency {
                share: 0.001,
                units: Some(500)
            })
        );
        assert_eq!(t.get("M1").unwrap().units, None);

        let model = FrequencyModel::builder()
            .postcodes(t)
            .default_units_per_district(100)
            .build()
            .unwrap();
        let f = model.postcode_frequency(&"CB2 1AB".parse().unwrap()).unwrap();
        assert!((f.unit.unwrap() - 0.001 / 500.0).abs() < 1e-15);
        let f = model.postcode_frequency(&"M1 1AA".parse().unwrap()).unwrap();
        assert!((f.unit.unwrap() - 0.002 / 100.0).abs() < 1e-15);
        let f = model.postcode_frequency(&"M1".parse().unwrap()).unwrap();
        assert_eq!(f.unit, None);
    }

    #[test]
    fn postcode_table_rejects_full_postcodes() {
        let r = PostcodeTable::from_reader("district,frequency\nCB2 1AB,0.1\n".as_bytes());
        assert!(matches!(r, Err(FrequencyError::Malformed { .. })));
    }

    #[test]
    fn postcode_units_merge_across_rows() {
        let t = PostcodeTable::from_reader(
            "district,frequency,units\nCB2,0.001,500\ncb2,0.002,250\n".as_bytes(),
        )
        .unwrap();
        assert_eq!(t.get("CB2").unwrap().units, Some(750));

        let r = PostcodeTable::from_reader(
            "district,frequency,units\nCB2,0.001,4294967295\nCB2,0.001,1\n".as_bytes(),
        );
        assert!(matches!(r, Err(FrequencyError::Malformed { row: 2, .. })), "{r:?}");
    }

    #[test]
    fn birth_date_probabilities() {
        let d = BirthDateDistribution::new(2000, 2003).unwrap();
        assert_eq!(d.n_years(), 4);
        assert_eq!(d.n_days(), 366 + 365 * 3);
        assert!((d.p_full() - 1.0 / 1461.0).abs() < 1e-15);
        assert!((d.p_year() - 0.25).abs() < 1e-15);
        assert!((d.p_month_day() - 4.0 / 1461.0).abs() < 1e-15);
        assert_eq!(d.nth_day(0), NaiveDate::from_ymd_opt(2000, 1, 1));
        assert_eq!(d.nth_day(1460), NaiveDate::from_ymd_opt(2003, 12, 31));

        assert!(BirthDateDistribution::new(2001, 2000).is_err());
    }

    #[test]
    fn absent_values_get_the_floor() {
        let model = FrequencyModel::from_defaults().unwrap();
        assert_eq!(
            model.probability_of(FieldKind::Surname, "Zzyzx"),
            Some(DEFAULT_MIN_FREQUENCY)
        );
        let smith = model.probability_of(FieldKind::Surname, " smith ").unwrap();
        assert!(smith > DEFAULT_MIN_FREQUENCY && smith < 1.0);

        let f = model.name_frequency(FieldKind::Forename, "Jane").unwrap();
        assert!(f.phonetic >= f.value);
    }

    #[test]
    fn disabled_fields() {
        let model = FrequencyModel::builder().birth_years(1950, 1999).build().unwrap();
        assert_eq!(model.enabled_fields(), vec![FieldKind::DateOfBirth]);
        assert_eq!(model.probability_of(FieldKind::Forename, "JANE"), None);
        assert_eq!(model.probability_of(FieldKind::Postcode, "CB2 1AB"), None);
        assert_eq!(model.probability_of(FieldKind::DateOfBirth, "1960"), Some(1.0 / 50.0));
    }

    #[test]
    fn no_fields_is_an_error() {
        assert!(matches!(FrequencyModel::builder().build(), Err(FrequencyError::NoFields)));
        let r = FrequencyModelBuilder::with_defaults()
            .unwrap()
            .min_frequency(0.0)
            .build();
        assert!(matches!(r, Err(FrequencyError::MinFrequency(_))));
    }

    #[test]
    fn default_tables_are_consistent() {
        let model = FrequencyModel::from_defaults().unwrap();
        assert_eq!(model.enabled_fields(), FieldKind::ALL.to_vec());
        for field in [FieldKind::Forename, FieldKind::Surname, FieldKind::Sex] {
            let p = model.probability_of(field, "JANE").unwrap();
            assert!(p > 0.0 && p <= 1.0);
        }
        assert!(model.postcodes().unwrap().get("CB2").is_some());
    }
}
