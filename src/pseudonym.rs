use hmac::{Hmac, Mac};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::error::{HashError, RowError};
use crate::frequency::FrequencyModel;
use crate::identifier::DobIdentifier;
use crate::phonetic::phonetic_key;
use crate::record::{canonicalise, FieldKind, IdentityRecord};

type HmacSha256 = Hmac<Sha256>;

/// Length of a hex-encoded digest.
pub const DIGEST_HEX_LEN: usize = 64;

// -------------------------------------------------------------------------------------------------
// Hasher
// -------------------------------------------------------------------------------------------------
/// A keyed one-way hash of canonicalised identifier values (HMAC-SHA256, hex-encoded).
///
/// Only the keyed HMAC state is kept; the key itself is never stored, printed, or logged.
#[derive(Clone)]
pub struct Hasher {
    mac: HmacSha256,
}

impl std::fmt::Debug for Hasher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Hasher { key: [REDACTED] }")
    }
}

impl Hasher {
    /// Create a hasher from a secret key.
    ///
    /// An empty or all-whitespace key is rejected; there is no unkeyed fallback.
    pub fn new(key: &SecretString) -> Result<Self, HashError> {
        let key = key.expose_secret();
        if key.trim().is_empty() {
            return Err(HashError::EmptyKey);
        }
        let mac = HmacSha256::new_from_slice(key.as_bytes()).map_err(|_| HashError::InvalidKey)?;
        Ok(Hasher { mac })
    }

    /// Like `new`, but for a key that may not have been supplied at all.
    pub fn from_optional(key: Option<&SecretString>) -> Result<Self, HashError> {
        Self::new(key.ok_or(HashError::MissingKey)?)
    }

    /// Hash a value after canonicalising it.
    ///
    /// ```
    /// # use fuzzyid::pseudonym::Hasher;
    /// # use secrecy::SecretString;
    /// let h = Hasher::new(&SecretString::new("k".to_string())).unwrap();
    /// assert_eq!(h.hash(" jane "), h.hash("JANE"));
    /// assert_eq!(h.hash("JANE").len(), 64);
    /// ```
    pub fn hash(&self, value: &str) -> String {
        self.hash_canonical(&canonicalise(value))
    }

    #[inline]
    fn hash_canonical(&self, canonical: &str) -> String {
        let mut mac = self.mac.clone();
        mac.update(canonical.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    /// Hash every identifier of a record, attaching the frequency metadata computed from the
    /// plaintext beforehand.
    ///
    /// Fields that are absent, or disabled in the frequency model, are left empty.
    pub fn hash_record(&self, record: &IdentityRecord, model: &FrequencyModel) -> HashedRecord {
        let mut out = HashedRecord::new(record.local_id.clone());

        out.hashed_gold_standard_id = record
            .gold_standard_id
            .as_deref()
            .map(canonicalise)
            .filter(|v| !v.is_empty())
            .map(|v| self.hash_canonical(&v));

        let hash_name = |field: FieldKind, value: Option<&str>| -> Option<HashedName> {
            let canonical = canonicalise(value?);
            if canonical.is_empty() {
                return None;
            }
            let freq = model.name_frequency(field, &canonical)?;
            Some(HashedName {
                exact: self.hash_canonical(&canonical),
                phonetic: self.hash_canonical(&phonetic_key(&canonical)),
                frequency: freq.value,
                phonetic_frequency: freq.phonetic,
            })
        };

        if let Some(n) = hash_name(FieldKind::Forename, record.forename.as_deref()) {
            out.hashed_forename = Some(n.exact);
            out.hashed_forename_phonetic = Some(n.phonetic);
            out.forename_frequency = Some(n.frequency);
            out.forename_phonetic_frequency = Some(n.phonetic_frequency);
        }
        if let Some(n) = hash_name(FieldKind::Surname, record.surname.as_deref()) {
            out.hashed_surname = Some(n.exact);
            out.hashed_surname_phonetic = Some(n.phonetic);
            out.surname_frequency = Some(n.frequency);
            out.surname_phonetic_frequency = Some(n.phonetic_frequency);
        }

        if let (Some(date), Some(_)) = (&record.date_of_birth, model.birth_dates()) {
            let dob = DobIdentifier::from_date(date).map_tokens(|t| self.hash_canonical(t));
            out.hashed_dob = dob.full;
            out.hashed_dob_year = Some(dob.year);
            out.hashed_dob_month_day = dob.month_day;
            out.hashed_dob_transposed = dob.transposed;
        }

        if let Some(sex) = record.sex {
            if let Some(f) = model.sex_frequency(sex) {
                out.hashed_sex = Some(self.hash_canonical(sex.code()));
                out.sex_frequency = Some(f);
            }
        }

        if let Some(pc) = &record.postcode {
            if let Some(f) = model.postcode_frequency(pc) {
                out.hashed_postcode_district = Some(self.hash_canonical(pc.district()));
                out.postcode_district_frequency = Some(f.district);
                if let (Some(unit), Some(uf)) = (pc.unit(), f.unit) {
                    out.hashed_postcode_unit = Some(self.hash_canonical(&unit));
                    out.postcode_unit_frequency = Some(uf);
                }
            }
        }

        out
    }
}

struct HashedName {
    exact: String,
    phonetic: String,
    frequency: f64,
    phonetic_frequency: f64,
}

// -------------------------------------------------------------------------------------------------
// HashedRecord
// -------------------------------------------------------------------------------------------------
/// A person record whose identifiers have all been replaced by digests.
///
/// The frequency columns are the only information about the plaintext that a hashed record
/// carries. The field order here is the column order of hashed record files.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct HashedRecord {
    pub local_id: String,
    #[serde(default)]
    pub hashed_gold_standard_id: Option<String>,

    #[serde(default)]
    pub hashed_forename: Option<String>,
    #[serde(default)]
    pub hashed_forename_phonetic: Option<String>,
    #[serde(default)]
    pub forename_frequency: Option<f64>,
    #[serde(default)]
    pub forename_phonetic_frequency: Option<f64>,

    #[serde(default)]
    pub hashed_surname: Option<String>,
    #[serde(default)]
    pub hashed_surname_phonetic: Option<String>,
    #[serde(default)]
    pub surname_frequency: Option<f64>,
    #[serde(default)]
    pub surname_phonetic_frequency: Option<f64>,

    #[serde(default)]
    pub hashed_dob: Option<String>,
    #[serde(default)]
    pub hashed_dob_year: Option<String>,
    #[serde(default)]
    pub hashed_dob_month_day: Option<String>,
    #[serde(default)]
    pub hashed_dob_transposed: Option<String>,

    #[serde(default)]
    pub hashed_sex: Option<String>,
    #[serde(default)]
    pub sex_frequency: Option<f64>,

    #[serde(default)]
    pub hashed_postcode_unit: Option<String>,
    #[serde(default)]
    pub hashed_postcode_district: Option<String>,
    #[serde(default)]
    pub postcode_unit_frequency: Option<f64>,
    #[serde(default)]
    pub postcode_district_frequency: Option<f64>,
}

fn check_digest(field: &'static str, value: &Option<String>) -> Result<(), RowError> {
    match value {
        Some(v) if v.len() != DIGEST_HEX_LEN || !v.bytes().all(|b| b.is_ascii_hexdigit()) => {
            Err(RowError::BadHashedField {
                field,
                message: format!("expected {DIGEST_HEX_LEN} hex digits"),
            })
        }
        _ => Ok(()),
    }
}

fn check_frequency(field: &'static str, value: Option<f64>) -> Result<(), RowError> {
    match value {
        Some(p) if !(p > 0.0 && p <= 1.0) => Err(RowError::BadHashedField {
            field,
            message: format!("frequency {p} is not in (0, 1]"),
        }),
        _ => Ok(()),
    }
}

/// All of the given columns must be present, or none of them.
fn check_group(field: &'static str, present: &[bool]) -> Result<(), RowError> {
    if present.iter().all(|p| *p) || present.iter().all(|p| !*p) {
        Ok(())
    } else {
        Err(RowError::BadHashedField {
            field,
            message: "incomplete set of columns".to_string(),
        })
    }
}

impl HashedRecord {
    pub fn new(local_id: String) -> Self {
        HashedRecord {
            local_id,
            ..Default::default()
        }
    }

    /// Trim the local ID and lower-case the digests, so that files written by tools that emit
    /// upper-case hex compare equal to ours.
    pub fn normalise(&mut self) {
        self.local_id = self.local_id.trim().to_string();
        for digest in [
            &mut self.hashed_gold_standard_id,
            &mut self.hashed_forename,
            &mut self.hashed_forename_phonetic,
            &mut self.hashed_surname,
            &mut self.hashed_surname_phonetic,
            &mut self.hashed_dob,
            &mut self.hashed_dob_year,
            &mut self.hashed_dob_month_day,
            &mut self.hashed_dob_transposed,
            &mut self.hashed_sex,
            &mut self.hashed_postcode_unit,
            &mut self.hashed_postcode_district,
        ]
        .into_iter()
        .flatten()
        {
            digest.make_ascii_lowercase();
        }
    }

    /// Check that digests look like digests, frequencies are probabilities, and that each
    /// field's columns are either all present or all absent.
    pub fn validate(&self) -> Result<(), RowError> {
        if self.local_id.trim().is_empty() {
            return Err(RowError::EmptyLocalId);
        }

        for (name, digest) in [
            ("hashed_gold_standard_id", &self.hashed_gold_standard_id),
            ("hashed_forename", &self.hashed_forename),
            ("hashed_forename_phonetic", &self.hashed_forename_phonetic),
            ("hashed_surname", &self.hashed_surname),
            ("hashed_surname_phonetic", &self.hashed_surname_phonetic),
            ("hashed_dob", &self.hashed_dob),
            ("hashed_dob_year", &self.hashed_dob_year),
            ("hashed_dob_month_day", &self.hashed_dob_month_day),
            ("hashed_dob_transposed", &self.hashed_dob_transposed),
            ("hashed_sex", &self.hashed_sex),
            ("hashed_postcode_unit", &self.hashed_postcode_unit),
            ("hashed_postcode_district", &self.hashed_postcode_district),
        ] {
            check_digest(name, digest)?;
        }

        for (name, freq) in [
            ("forename_frequency", self.forename_frequency),
            ("forename_phonetic_frequency", self.forename_phonetic_frequency),
            ("surname_frequency", self.surname_frequency),
            ("surname_phonetic_frequency", self.surname_phonetic_frequency),
            ("sex_frequency", self.sex_frequency),
            ("postcode_unit_frequency", self.postcode_unit_frequency),
            ("postcode_district_frequency", self.postcode_district_frequency),
        ] {
            check_frequency(name, freq)?;
        }

        check_group(
            "forename",
            &[
                self.hashed_forename.is_some(),
                self.hashed_forename_phonetic.is_some(),
                self.forename_frequency.is_some(),
                self.forename_phonetic_frequency.is_some(),
            ],
        )?;
        check_group(
            "surname",
            &[
                self.hashed_surname.is_some(),
                self.hashed_surname_phonetic.is_some(),
                self.surname_frequency.is_some(),
                self.surname_phonetic_frequency.is_some(),
            ],
        )?;
        check_group("sex", &[self.hashed_sex.is_some(), self.sex_frequency.is_some()])?;
        check_group(
            "postcode_unit",
            &[self.hashed_postcode_unit.is_some(), self.postcode_unit_frequency.is_some()],
        )?;
        check_group(
            "postcode_district",
            &[
                self.hashed_postcode_district.is_some(),
                self.postcode_district_frequency.is_some(),
            ],
        )?;
        if self.hashed_postcode_unit.is_some() && self.hashed_postcode_district.is_none() {
            return Err(RowError::BadHashedField {
                field: "postcode",
                message: "a unit digest requires a district digest".to_string(),
            });
        }

        let dob_parts = [
            &self.hashed_dob,
            &self.hashed_dob_month_day,
            &self.hashed_dob_transposed,
        ];
        if self.hashed_dob_year.is_none() && dob_parts.iter().any(|p| p.is_some()) {
            return Err(RowError::BadHashedField {
                field: "date_of_birth",
                message: "date digests require a year digest".to_string(),
            });
        }

        Ok(())
    }

    /// Does this record carry any identifier digest at all?
    pub fn has_demographics(&self) -> bool {
        self.hashed_forename.is_some()
            || self.hashed_surname.is_some()
            || self.hashed_dob_year.is_some()
            || self.hashed_sex.is_some()
            || self.hashed_postcode_district.is_some()
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

    fn hasher(key: &str) -> Hasher {
        Hasher::new(&SecretString::new(key.to_string())).unwrap()
    }

    fn jane() -> IdentityRecord {
        let mut r = IdentityRecord::new("P1");
        r.forename = Some("Jane".to_string());
        r.surname = Some("Smith".to_string());
        r.date_of_birth = Some("1980-01-02".parse().unwrap());
        r.sex = Some(crate::record::Sex::Female);
        r.postcode = Some("CB2 1AB".parse().unwrap());
        r.gold_standard_id = Some("943 476 5919".to_string());
        r
    }

    #[test]
    fn empty_keys_are_rejected() {
        for key in ["", "   ", "\t\n"] {
            let r = Hasher::new(&SecretString::new(key.to_string()));
            assert!(matches!(r, Err(HashError::EmptyKey)), "{key:?}");
        }
        assert!(matches!(Hasher::from_optional(None), Err(HashError::MissingKey)));
    }

    #[test]
    fn debug_output_is_redacted() {
        let h = hasher("correct horse battery staple");
        let s = format!("{h:?}");
        assert!(!s.contains("horse"));
        assert_eq!(s, "Hasher { key: [REDACTED] }");
    }

    #[test]
    fn known_digest() {
        // HMAC-SHA256("key", "The quick brown fox jumps over the lazy dog") after canonicalisation
        // is the digest of "THEQUICKBROWNFOXJUMPSOVERTHELAZYDOG"; check against the raw MAC.
        let h = hasher("key");
        let mut mac = HmacSha256::new_from_slice(b"key").unwrap();
        mac.update(b"THEQUICKBROWNFOXJUMPSOVERTHELAZYDOG");
        let expected = hex::encode(mac.finalize().into_bytes());
        assert_eq!(h.hash("The quick brown fox jumps over the lazy dog"), expected);
    }

    #[test]
    fn hashed_record_has_no_plaintext() {
        let model = FrequencyModel::from_defaults().unwrap();
        let h = hasher("k1");
        let out = h.hash_record(&jane(), &model);
        out.validate().unwrap();

        let serialized = serde_json::to_string(&out).unwrap().to_uppercase();
        for plain in ["JANE", "SMITH", "9434765919"] {
            assert!(!serialized.contains(plain), "{plain} leaked");
        }
        assert_eq!(out.local_id, "P1");
        assert_eq!(out.hashed_forename.as_deref(), Some(h.hash("JANE").as_str()));
        assert_eq!(out.hashed_forename_phonetic.as_deref(), Some(h.hash("JN").as_str()));
        assert_eq!(out.hashed_dob_transposed.as_deref(), Some(h.hash("19800201").as_str()));
        assert_eq!(out.hashed_postcode_unit.as_deref(), Some(h.hash("CB21AB").as_str()));
        assert!(out.forename_phonetic_frequency >= out.forename_frequency);
    }

    #[test]
    fn disabled_fields_are_not_hashed() {
        let model = FrequencyModel::builder().birth_years(1900, 2000).build().unwrap();
        let out = hasher("k1").hash_record(&jane(), &model);
        out.validate().unwrap();
        assert!(out.hashed_dob_year.is_some());
        assert_eq!(out.hashed_forename, None);
        assert_eq!(out.hashed_sex, None);
        assert_eq!(out.hashed_postcode_district, None);
    }

    #[test]
    fn validation_catches_bad_rows() {
        let model = FrequencyModel::from_defaults().unwrap();
        let good = hasher("k1").hash_record(&jane(), &model);

        let mut r = good.clone();
        r.hashed_sex = Some("not-a-digest".to_string());
        assert!(r.validate().is_err());

        let mut r = good.clone();
        r.forename_frequency = None;
        assert!(r.validate().is_err());

        let mut r = good.clone();
        r.postcode_district_frequency = Some(1.5);
        assert!(r.validate().is_err());

        let mut r = good.clone();
        r.hashed_dob_year = None;
        assert!(r.validate().is_err());

        let mut r = good;
        r.local_id = " ".to_string();
        assert!(matches!(r.validate(), Err(RowError::EmptyLocalId)));
    }

    proptest! {
        #[test]
        fn hash_ignores_case_and_spacing(s in "[a-zA-Z0-9 '\\-]{0,20}") {
            let h = hasher("secret");
            prop_assert_eq!(h.hash(&s), h.hash(&canonicalise(&s)));
            prop_assert_eq!(h.hash(&s.to_lowercase()), h.hash(&format!("  {}  ", s.to_uppercase())));
        }

        #[test]
        fn different_keys_give_different_digests(s in "[A-Z]{1,12}") {
            prop_assert_ne!(hasher("key-one").hash(&s), hasher("key-two").hash(&s));
        }
    }
}
