use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs::File;
use std::io::{BufReader, Read, Write};
use std::path::Path;
use tracing::{debug, warn};

use crate::error::{RecordFileError, RowError, RunError};
use crate::matcher::MatchDecision;
use crate::pseudonym::HashedRecord;
use crate::record::{nonblank, FieldKind, IdentityRecord};

// -------------------------------------------------------------------------------------------------
// RecordFormat
// -------------------------------------------------------------------------------------------------
/// Whether a record file holds plaintext identifiers or digests.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordFormat {
    Plaintext,
    Hashed,
}

impl std::fmt::Display for RecordFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RecordFormat::Plaintext => "plaintext",
            RecordFormat::Hashed => "hashed",
        };
        write!(f, "{s}")
    }
}

// -------------------------------------------------------------------------------------------------
// Loaded
// -------------------------------------------------------------------------------------------------
/// The good rows of a record file, and a count of the rows that were skipped.
#[derive(Debug)]
pub struct Loaded<T> {
    pub records: Vec<T>,
    pub rows_skipped: usize,
}

impl<T> Loaded<T> {
    pub fn rows_read(&self) -> usize {
        self.records.len() + self.rows_skipped
    }
}

// -------------------------------------------------------------------------------------------------
// readers
// -------------------------------------------------------------------------------------------------
#[derive(Deserialize)]
struct PlaintextRow {
    local_id: Option<String>,
    #[serde(default)]
    forename: Option<String>,
    #[serde(default)]
    surname: Option<String>,
    #[serde(default, alias = "dob")]
    date_of_birth: Option<String>,
    #[serde(default)]
    sex: Option<String>,
    #[serde(default)]
    postcode: Option<String>,
    #[serde(default)]
    gold_standard_id: Option<String>,
}

impl TryFrom<PlaintextRow> for IdentityRecord {
    type Error = RowError;

    fn try_from(row: PlaintextRow) -> Result<Self, Self::Error> {
        let local_id = nonblank(row.local_id).ok_or(RowError::EmptyLocalId)?;
        Ok(IdentityRecord {
            local_id,
            forename: nonblank(row.forename),
            surname: nonblank(row.surname),
            date_of_birth: nonblank(row.date_of_birth).map(|v| v.parse()).transpose()?,
            sex: nonblank(row.sex).map(|v| v.parse()).transpose()?,
            postcode: nonblank(row.postcode).map(|v| v.parse()).transpose()?,
            gold_standard_id: nonblank(row.gold_standard_id),
        })
    }
}

fn csv_reader<R: Read>(reader: R, source_name: &str) -> Result<csv::Reader<R>, RecordFileError> {
    let mut rdr = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .flexible(true)
        .from_reader(reader);
    if !rdr.headers()?.iter().any(|h| h == "local_id") {
        return Err(RecordFileError::MissingColumn {
            source_name: source_name.to_string(),
            column: "local_id",
        });
    }
    Ok(rdr)
}

/// Read rows, skipping (with a warning) any that fail to convert or that repeat a `local_id`.
fn read_rows<R, Row, T, F>(
    mut rdr: csv::Reader<R>,
    source_name: &str,
    convert: F,
) -> Loaded<T>
where
    R: Read,
    Row: serde::de::DeserializeOwned,
    F: Fn(Row) -> Result<T, RowError>,
    T: HasLocalId,
{
    let mut records = Vec::new();
    let mut rows_skipped = 0;
    let mut seen: HashSet<String> = HashSet::new();

    for (idx, row) in rdr.deserialize::<Row>().enumerate() {
        let result = row.map_err(RowError::from).and_then(&convert).and_then(|r| {
            if seen.insert(r.local_id().to_string()) {
                Ok(r)
            } else {
                Err(RowError::DuplicateLocalId(r.local_id().to_string()))
            }
        });
        match result {
            Ok(r) => records.push(r),
            Err(e) => {
                // the header is line 1
                warn!("{source_name}: skipping row {}: {e}", idx + 2);
                rows_skipped += 1;
            }
        }
    }

    debug!("{source_name}: read {} records; skipped {rows_skipped} rows", records.len());
    Loaded {
        records,
        rows_skipped,
    }
}

trait HasLocalId {
    fn local_id(&self) -> &str;
}

impl HasLocalId for IdentityRecord {
    fn local_id(&self) -> &str {
        &self.local_id
    }
}

impl HasLocalId for HashedRecord {
    fn local_id(&self) -> &str {
        &self.local_id
    }
}

/// Read plaintext identity records from CSV.
///
/// The `local_id` column is required. The other recognized columns are `forename`, `surname`,
/// `date_of_birth` (or `dob`), `sex`, `postcode`, and `gold_standard_id`; any may be missing, and
/// unrecognized columns are ignored. Malformed rows are skipped and counted.
pub fn read_plaintext<R: Read>(
    reader: R,
    source_name: &str,
) -> Result<Loaded<IdentityRecord>, RecordFileError> {
    let rdr = csv_reader(reader, source_name)?;
    Ok(read_rows(rdr, source_name, |row: PlaintextRow| IdentityRecord::try_from(row)))
}

/// Read hashed identity records from CSV, in the format written by `write_hashed`.
pub fn read_hashed<R: Read>(
    reader: R,
    source_name: &str,
) -> Result<Loaded<HashedRecord>, RecordFileError> {
    let rdr = csv_reader(reader, source_name)?;
    Ok(read_rows(rdr, source_name, |mut row: HashedRecord| {
        row.normalise();
        row.validate()?;
        Ok(row)
    }))
}

fn open(path: &Path) -> Result<BufReader<File>, RecordFileError> {
    File::open(path)
        .map(BufReader::new)
        .map_err(|source| RecordFileError::Open {
            path: path.to_owned(),
            source,
        })
}

pub fn read_plaintext_file<P: AsRef<Path>>(path: P) -> Result<Loaded<IdentityRecord>, RecordFileError> {
    let path = path.as_ref();
    read_plaintext(open(path)?, &path.display().to_string())
}

pub fn read_hashed_file<P: AsRef<Path>>(path: P) -> Result<Loaded<HashedRecord>, RecordFileError> {
    let path = path.as_ref();
    read_hashed(open(path)?, &path.display().to_string())
}

// -------------------------------------------------------------------------------------------------
// writers
// -------------------------------------------------------------------------------------------------
/// The columns of a hashed record file, in order.
pub const HASHED_COLUMNS: [&str; 20] = [
    "local_id",
    "hashed_gold_standard_id",
    "hashed_forename",
    "hashed_forename_phonetic",
    "forename_frequency",
    "forename_phonetic_frequency",
    "hashed_surname",
    "hashed_surname_phonetic",
    "surname_frequency",
    "surname_phonetic_frequency",
    "hashed_dob",
    "hashed_dob_year",
    "hashed_dob_month_day",
    "hashed_dob_transposed",
    "hashed_sex",
    "sex_frequency",
    "hashed_postcode_unit",
    "hashed_postcode_district",
    "postcode_unit_frequency",
    "postcode_district_frequency",
];

/// Write hashed records as CSV, with a header row even when there are no records.
pub fn write_hashed<'a, W, I>(writer: W, records: I) -> Result<usize, csv::Error>
where
    W: Write,
    I: IntoIterator<Item = &'a HashedRecord>,
{
    let mut wtr = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(writer);
    wtr.write_record(HASHED_COLUMNS)?;
    let mut n = 0;
    for record in records {
        wtr.serialize(record)?;
        n += 1;
    }
    wtr.flush()?;
    Ok(n)
}

/// Write plaintext identity records as CSV, with a header row.
pub fn write_plaintext<'a, W, I>(writer: W, records: I) -> Result<usize, csv::Error>
where
    W: Write,
    I: IntoIterator<Item = &'a IdentityRecord>,
{
    let mut wtr = csv::Writer::from_writer(writer);
    wtr.write_record([
        "local_id",
        "forename",
        "surname",
        "date_of_birth",
        "sex",
        "postcode",
        "gold_standard_id",
    ])?;
    let mut n = 0;
    for r in records {
        let opt = |v: Option<String>| v.unwrap_or_default();
        wtr.write_record([
            r.local_id.clone(),
            opt(r.forename.clone()),
            opt(r.surname.clone()),
            opt(r.date_of_birth.map(|d| d.to_string())),
            opt(r.sex.map(|s| s.to_string())),
            opt(r.postcode.as_ref().map(|p| p.to_string())),
            opt(r.gold_standard_id.clone()),
        ])?;
        n += 1;
    }
    wtr.flush()?;
    Ok(n)
}

// -------------------------------------------------------------------------------------------------
// DecisionSink
// -------------------------------------------------------------------------------------------------
/// Somewhere to put match decisions.
///
/// Decisions arrive in proband input order, a batch at a time; a sink should make each batch
/// durable before returning, so that an interrupted run leaves a usable prefix.
pub trait DecisionSink {
    fn write_decisions(&mut self, decisions: &[MatchDecision]) -> Result<(), RunError>;

    fn finish(&mut self) -> Result<(), RunError> {
        Ok(())
    }
}

impl DecisionSink for Vec<MatchDecision> {
    fn write_decisions(&mut self, decisions: &[MatchDecision]) -> Result<(), RunError> {
        self.extend_from_slice(decisions);
        Ok(())
    }
}

fn format_log_odds(v: f64) -> String {
    if v.is_finite() {
        v.to_string()
    } else {
        String::new()
    }
}

/// Writes decisions as CSV.
///
/// The base columns are `proband_local_id`, `best_candidate_local_id`, `best_log_odds`,
/// `second_best_log_odds`, and `matched`. With `extra_info`, the diagnostic outcome, the number
/// of candidates, and the per-field evidence for the best candidate follow.
pub struct CsvDecisionSink<W: Write> {
    writer: csv::Writer<W>,
    extra_info: bool,
    wrote_header: bool,
}

impl<W: Write> CsvDecisionSink<W> {
    pub fn new(writer: W, extra_info: bool) -> Self {
        CsvDecisionSink {
            writer: csv::Writer::from_writer(writer),
            extra_info,
            wrote_header: false,
        }
    }

    fn header(&self) -> Vec<String> {
        let mut header: Vec<String> = [
            "proband_local_id",
            "best_candidate_local_id",
            "best_log_odds",
            "second_best_log_odds",
            "matched",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();
        if self.extra_info {
            header.push("outcome".to_string());
            header.push("n_candidates".to_string());
            for field in FieldKind::ALL {
                header.push(format!("{field}_agreement"));
                header.push(format!("{field}_log_lr"));
            }
            header.push("degraded".to_string());
        }
        header
    }

    fn row(&self, d: &MatchDecision) -> Vec<String> {
        let mut row = vec![
            d.proband_local_id.clone(),
            d.best_candidate_local_id.clone().unwrap_or_default(),
            format_log_odds(d.best_log_odds),
            format_log_odds(d.second_best_log_odds),
            d.matched.to_string(),
        ];
        if self.extra_info {
            row.push(d.outcome.to_string());
            row.push(d.n_candidates.to_string());
            for field in FieldKind::ALL {
                match d.comparison.as_ref().and_then(|c| c.field(field)) {
                    Some(c) if c.is_compared() => {
                        row.push(c.agreement.to_string());
                        row.push(c.log_lr.to_string());
                    }
                    _ => {
                        row.push(String::new());
                        row.push(String::new());
                    }
                }
            }
            row.push(
                d.comparison
                    .as_ref()
                    .map(|c| c.is_degraded().to_string())
                    .unwrap_or_default(),
            );
        }
        row
    }
}

impl<W: Write> DecisionSink for CsvDecisionSink<W> {
    fn write_decisions(&mut self, decisions: &[MatchDecision]) -> Result<(), RunError> {
        if !self.wrote_header {
            self.writer.write_record(self.header())?;
            self.wrote_header = true;
        }
        for d in decisions {
            let row = self.row(d);
            self.writer.write_record(row)?;
        }
        self.writer.flush()?;
        Ok(())
    }

    fn finish(&mut self) -> Result<(), RunError> {
        if !self.wrote_header {
            self.writer.write_record(self.header())?;
            self.wrote_header = true;
        }
        self.writer.flush()?;
        Ok(())
    }
}

/// Writes decisions as JSON Lines, one object per proband.
pub struct JsonLinesDecisionSink<W: Write> {
    writer: W,
}

impl<W: Write> JsonLinesDecisionSink<W> {
    pub fn new(writer: W) -> Self {
        JsonLinesDecisionSink { writer }
    }
}

impl<W: Write> DecisionSink for JsonLinesDecisionSink<W> {
    fn write_decisions(&mut self, decisions: &[MatchDecision]) -> Result<(), RunError> {
        for d in decisions {
            serde_json::to_writer(&mut self.writer, d)?;
            writeln!(self.writer)?;
        }
        self.writer.flush()?;
        Ok(())
    }
}

/// Writes decisions as a single JSON array.
pub struct JsonDecisionSink<W: Write> {
    writer: W,
    n_written: usize,
}

impl<W: Write> JsonDecisionSink<W> {
    pub fn new(writer: W) -> Self {
        JsonDecisionSink {
            writer,
            n_written: 0,
        }
    }
}

impl<W: Write> DecisionSink for JsonDecisionSink<W> {
    fn write_decisions(&mut self, decisions: &[MatchDecision]) -> Result<(), RunError> {
        for d in decisions {
            self.writer
                .write_all(if self.n_written == 0 { b"[\n  " } else { b",\n  " })?;
            serde_json::to_writer(&mut self.writer, d)?;
            self.n_written += 1;
        }
        self.writer.flush()?;
        Ok(())
    }

    fn finish(&mut self) -> Result<(), RunError> {
        if self.n_written == 0 {
            self.writer.write_all(b"[]\n")?;
        } else {
            self.writer.write_all(b"\n]\n")?;
        }
        self.writer.flush()?;
        Ok(())
    }
}

// -------------------------------------------------------------------------------------------------
// test
// -------------------------------------------------------------------------------------------------
#[cfg(test)]
mod test {
    use super::*;
    use crate::matcher::MatchOutcome;
    use indoc::indoc;
    use pretty_assertions::{assert_eq, assert_ne};

    #[test]
    fn plaintext_rows_are_parsed() {
        let input = indoc! {"
            local_id,forename,surname,dob,sex,postcode,extra
            P1,Jane,Smith,1980-01-01,F,cb2 1ab,ignored
            P2,,  ,,,,
            P3,John,Jones,1980,M,M1,
        "};
        let loaded = read_plaintext(input.as_bytes(), "probands").unwrap();
        assert_eq!(loaded.rows_skipped, 0);
        assert_eq!(loaded.records.len(), 3);

        let p1 = &loaded.records[0];
        assert_eq!(p1.forename.as_deref(), Some("Jane"));
        assert_eq!(p1.postcode.as_ref().map(|p| p.to_string()).as_deref(), Some("CB2 1AB"));
        assert!(loaded.records[1].forename.is_none());
        assert!(!loaded.records[1].has_demographics());
        assert_eq!(loaded.records[2].date_of_birth.unwrap().year(), 1980);
    }

    #[test]
    fn bad_rows_are_skipped_and_counted() {
        let input = indoc! {"
            local_id,forename,date_of_birth,sex,postcode
            P1,Jane,1980-01-01,F,CB2 1AB
            ,Nobody,1980-01-01,F,CB2 1AB
            P2,Bad,1980-02-30,F,CB2 1AB
            P3,Bad,1980-01-01,Q,CB2 1AB
            P4,Bad,1980-01-01,F,nowhere
            P1,Again,1980-01-01,F,CB2 1AB
            P5,Fine,,,
        "};
        let loaded = read_plaintext(input.as_bytes(), "probands").unwrap();
        let ids: Vec<_> = loaded.records.iter().map(|r| r.local_id.as_str()).collect();
        assert_eq!(ids, vec!["P1", "P5"]);
        assert_eq!(loaded.rows_skipped, 5);
        assert_eq!(loaded.rows_read(), 7);
    }

    #[test]
    fn local_id_column_is_required() {
        let r = read_plaintext("id,forename\nP1,Jane\n".as_bytes(), "probands");
        assert!(matches!(r, Err(RecordFileError::MissingColumn { column: "local_id", .. })));
    }

    #[test]
    fn plaintext_round_trip() {
        let input = indoc! {"
            local_id,forename,surname,date_of_birth,sex,postcode,gold_standard_id
            P1,Jane,Smith,1980-01,F,CB2 1AB,G1
        "};
        let loaded = read_plaintext(input.as_bytes(), "in").unwrap();
        let mut out = Vec::new();
        write_plaintext(&mut out, &loaded.records).unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), input);
    }

    #[test]
    fn hashed_digests_are_read_case_insensitively() {
        use crate::frequency::FrequencyModel;
        use crate::pseudonym::Hasher;
        use secrecy::SecretString;

        let model = FrequencyModel::from_defaults().unwrap();
        let hasher = Hasher::new(&SecretString::new("k".to_string())).unwrap();
        let input = indoc! {"
            local_id,forename,surname,date_of_birth,sex,postcode
            P1,Jane,Smith,1980-01-01,F,CB2 1AB
        "};
        let plain = read_plaintext(input.as_bytes(), "in").unwrap();
        let hashed: Vec<HashedRecord> =
            plain.records.iter().map(|r| hasher.hash_record(r, &model)).collect();

        let mut out = Vec::new();
        write_hashed(&mut out, &hashed).unwrap();
        let text = String::from_utf8(out).unwrap();
        let (header, row) = text.split_once('\n').unwrap();
        assert_ne!(row, row.to_ascii_uppercase());
        let shouted = format!("{header}\n{}", row.to_ascii_uppercase());

        let loaded = read_hashed(shouted.as_bytes(), "in").unwrap();
        assert_eq!(loaded.rows_skipped, 0);
        assert_eq!(loaded.records, hashed);
    }

    fn decision(id: &str, best: Option<(&str, f64)>, second: f64, outcome: MatchOutcome) -> MatchDecision {
        MatchDecision {
            proband_local_id: id.to_string(),
            best_candidate_local_id: best.map(|b| b.0.to_string()),
            best_log_odds: best.map(|b| b.1).unwrap_or(f64::NEG_INFINITY),
            second_best_log_odds: second,
            matched: outcome.is_match(),
            outcome,
            n_candidates: if best.is_some() { 1 } else { 0 },
            comparison: None,
        }
    }

    #[test]
    fn csv_sink() {
        let mut out = Vec::new();
        {
            let mut sink = CsvDecisionSink::new(&mut out, false);
            sink.write_decisions(&[
                decision("P1", Some(("S1", 30.5)), f64::NEG_INFINITY, MatchOutcome::Matched),
                decision("P2", None, f64::NEG_INFINITY, MatchOutcome::NoUsableFields),
            ])
            .unwrap();
            sink.finish().unwrap();
        }
        insta::assert_snapshot!(String::from_utf8(out).unwrap(), @r###"
        proband_local_id,best_candidate_local_id,best_log_odds,second_best_log_odds,matched
        P1,S1,30.5,,true
        P2,,,,false
        "###);
    }

    #[test]
    fn csv_sink_header_without_decisions() {
        let mut out = Vec::new();
        CsvDecisionSink::new(&mut out, true).finish().unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.starts_with("proband_local_id,best_candidate_local_id,"));
        assert!(text.contains(",outcome,n_candidates,forename_agreement,forename_log_lr,"));
        assert!(text.trim_end().ends_with(",degraded"));
    }

    #[test]
    fn json_sinks() {
        let ds = [
            decision("P1", Some(("S1", 12.0)), 1.5, MatchOutcome::Matched),
            decision("P2", None, f64::NEG_INFINITY, MatchOutcome::NoCandidates),
        ];

        let mut out = Vec::new();
        let mut sink = JsonLinesDecisionSink::new(&mut out);
        sink.write_decisions(&ds).unwrap();
        sink.finish().unwrap();
        let text = String::from_utf8(out).unwrap();
        let lines: Vec<serde_json::Value> =
            text.lines().map(|l| serde_json::from_str(l).unwrap()).collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["best_log_odds"], serde_json::json!(12.0));
        assert_eq!(lines[1]["best_candidate_local_id"], serde_json::Value::Null);
        assert_eq!(lines[1]["second_best_log_odds"], serde_json::Value::Null);
        assert_eq!(lines[1]["outcome"], serde_json::json!("no_candidates"));

        let mut out = Vec::new();
        let mut sink = JsonDecisionSink::new(&mut out);
        sink.write_decisions(&ds[..1]).unwrap();
        sink.write_decisions(&ds[1..]).unwrap();
        sink.finish().unwrap();
        let v: serde_json::Value = serde_json::from_slice(&out).unwrap();
        assert_eq!(v.as_array().unwrap().len(), 2);

        let mut out = Vec::new();
        JsonDecisionSink::new(&mut out).finish().unwrap();
        assert_eq!(out, b"[]\n");
    }
}
