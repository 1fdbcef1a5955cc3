//! Synthetic populations for checking and calibrating the matcher offline.
//!
//! Nothing here touches real identifiers: people are drawn from the frequency model itself.

use chrono::NaiveDate;
use rand::distributions::{Distribution, WeightedIndex};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::{debug, info};

use crate::error::{ConfigError, RunError};
use crate::frequency::FrequencyModel;
use crate::identifier::MatchableRecord;
use crate::matcher::{compare_records, MatchDecision};
use crate::orchestrator::{Orchestrator, RecordSet};
use crate::params::MatchConfig;
use crate::pseudonym::{HashedRecord, Hasher};
use crate::record::{canonicalise, FieldKind, IdentityRecord, PartialDate, Postcode};
use crate::record_io::RecordFormat;

/// Letters that may appear in the unit part of an inward code
const INWARD_UNIT_LETTERS: &[u8] = b"ABDEFGHJLNPQRSTUWXYZ";

const ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ";

// -------------------------------------------------------------------------------------------------
// PopulationGenerator
// -------------------------------------------------------------------------------------------------
struct WeightedValues {
    values: Vec<String>,
    index: WeightedIndex<f64>,
}

impl WeightedValues {
    fn new<'a, I>(field: FieldKind, entries: I) -> Result<Self, ConfigError>
    where
        I: Iterator<Item = (&'a str, f64)>,
    {
        let (values, weights): (Vec<String>, Vec<f64>) =
            entries.map(|(v, p)| (v.to_string(), p)).unzip();
        let index = WeightedIndex::new(weights).map_err(|e| ConfigError::Invalid {
            name: field.name(),
            message: format!("cannot draw values from the reference data: {e}"),
        })?;
        Ok(WeightedValues { values, index })
    }

    fn draw<R: Rng>(&self, rng: &mut R) -> &str {
        &self.values[self.index.sample(rng)]
    }
}

/// Draws synthetic people from a frequency model, reproducibly for a given seed.
///
/// Only enabled fields are filled in. Dates of birth are always complete and postcodes always
/// have an inward code.
pub struct PopulationGenerator<'a> {
    model: &'a FrequencyModel,
    rng: StdRng,
    forenames: Option<WeightedValues>,
    surnames: Option<WeightedValues>,
    sexes: Option<WeightedValues>,
    districts: Option<WeightedValues>,
    serial: u64,
}

impl<'a> PopulationGenerator<'a> {
    pub fn new(model: &'a FrequencyModel, seed: u64) -> Result<Self, ConfigError> {
        let forenames = model
            .forenames()
            .map(|t| WeightedValues::new(FieldKind::Forename, t.entries()))
            .transpose()?;
        let surnames = model
            .surnames()
            .map(|t| WeightedValues::new(FieldKind::Surname, t.entries()))
            .transpose()?;
        let sexes = model
            .sexes()
            .map(|t| WeightedValues::new(FieldKind::Sex, t.entries()))
            .transpose()?;
        let districts = model
            .postcodes()
            .map(|t| {
                WeightedValues::new(FieldKind::Postcode, t.entries().map(|(d, f)| (d, f.share)))
            })
            .transpose()?;

        Ok(PopulationGenerator {
            model,
            rng: StdRng::seed_from_u64(seed),
            forenames,
            surnames,
            sexes,
            districts,
            serial: 0,
        })
    }

    /// Draw one new person. Each person gets a distinct gold standard ID.
    pub fn person(&mut self, local_id: &str) -> IdentityRecord {
        self.serial += 1;
        let rng = &mut self.rng;

        let mut r = IdentityRecord::new(local_id);
        r.gold_standard_id = Some(format!("G{}", self.serial));
        r.forename = self.forenames.as_ref().map(|v| v.draw(rng).to_string());
        r.surname = self.surnames.as_ref().map(|v| v.draw(rng).to_string());
        r.sex = self.sexes.as_ref().and_then(|v| v.draw(rng).parse().ok());
        r.date_of_birth = self.model.birth_dates().and_then(|dist| {
            let offset = rng.gen_range(0..dist.n_days());
            dist.nth_day(offset).map(PartialDate::full)
        });
        r.postcode = self.districts.as_ref().and_then(|v| {
            let district = v.draw(rng).to_string();
            with_random_inward(&district, rng)
        });
        r
    }

    /// Draw `n` people with local IDs `{prefix}1`, `{prefix}2`, ...
    pub fn generate(&mut self, n: usize, prefix: &str) -> Vec<IdentityRecord> {
        (1..=n).map(|i| self.person(&format!("{prefix}{i}"))).collect()
    }

    pub fn rng(&mut self) -> &mut StdRng {
        &mut self.rng
    }
}

fn with_random_inward<R: Rng>(district: &str, rng: &mut R) -> Option<Postcode> {
    let sector = rng.gen_range(0..10u8);
    let a = INWARD_UNIT_LETTERS[rng.gen_range(0..INWARD_UNIT_LETTERS.len())] as char;
    let b = INWARD_UNIT_LETTERS[rng.gen_range(0..INWARD_UNIT_LETTERS.len())] as char;
    format!("{district} {sector}{a}{b}").parse().ok()
}

// -------------------------------------------------------------------------------------------------
// Perturbation
// -------------------------------------------------------------------------------------------------
/// The kinds of error a copy of a person's record picks up between two databases.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Perturbation {
    /// Probability that each field is missing
    pub p_delete: f64,

    /// Probability that each name has a single-character typo
    pub p_typo: f64,

    /// Probability that day and month of birth are swapped, where that gives a valid date
    pub p_dob_transpose: f64,

    /// Probability that the person has moved to another postcode in the same district
    pub p_postcode_move: f64,
}

impl Default for Perturbation {
    fn default() -> Self {
        Perturbation {
            p_delete: 0.05,
            p_typo: 0.1,
            p_dob_transpose: 0.02,
            p_postcode_move: 0.1,
        }
    }
}

impl Perturbation {
    /// No perturbation at all: copies are exact.
    pub fn none() -> Self {
        Perturbation {
            p_delete: 0.0,
            p_typo: 0.0,
            p_dob_transpose: 0.0,
            p_postcode_move: 0.0,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, value) in [
            ("p_delete", self.p_delete),
            ("p_typo", self.p_typo),
            ("p_dob_transpose", self.p_dob_transpose),
            ("p_postcode_move", self.p_postcode_move),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::Invalid {
                    name,
                    message: format!("must lie in [0, 1], got {value}"),
                });
            }
        }
        Ok(())
    }

    /// A perturbed copy of `record` under a new local ID. The gold standard ID is kept.
    pub fn apply<R: Rng>(&self, record: &IdentityRecord, local_id: &str, rng: &mut R) -> IdentityRecord {
        let mut r = record.clone();
        r.local_id = local_id.to_string();

        for name in [&mut r.forename, &mut r.surname] {
            if let Some(v) = name.take() {
                if !rng.gen_bool(self.p_delete) {
                    *name = Some(if rng.gen_bool(self.p_typo) {
                        typo(&v, rng)
                    } else {
                        v
                    });
                }
            }
        }

        if rng.gen_bool(self.p_delete) {
            r.date_of_birth = None;
        } else if rng.gen_bool(self.p_dob_transpose) {
            r.date_of_birth = r.date_of_birth.map(|d| transpose_day_month(&d).unwrap_or(d));
        }

        if rng.gen_bool(self.p_delete) {
            r.sex = None;
        }

        if rng.gen_bool(self.p_delete) {
            r.postcode = None;
        } else if rng.gen_bool(self.p_postcode_move) {
            r.postcode = r
                .postcode
                .map(|p| with_random_inward(p.district(), rng).unwrap_or(p));
        }

        r
    }
}

/// Introduce one insertion, deletion, substitution, or adjacent transposition.
fn typo<R: Rng>(value: &str, rng: &mut R) -> String {
    let mut chars: Vec<char> = canonicalise(value).chars().collect();
    let letter = |rng: &mut R| ALPHABET[rng.gen_range(0..ALPHABET.len())] as char;

    if chars.len() < 2 {
        chars.push(letter(rng));
        return chars.into_iter().collect();
    }

    let pos = rng.gen_range(0..chars.len());
    match rng.gen_range(0..4) {
        0 => chars.insert(pos, letter(rng)),
        1 => {
            chars.remove(pos);
        }
        2 => chars[pos] = letter(rng),
        _ => {
            let pos = pos.min(chars.len() - 2);
            chars.swap(pos, pos + 1);
        }
    }
    chars.into_iter().collect()
}

fn transpose_day_month(date: &PartialDate) -> Option<PartialDate> {
    let (month, day) = (date.month()?, date.day()?);
    if month == day {
        return None;
    }
    NaiveDate::from_ymd_opt(date.year(), day, month).map(PartialDate::full)
}

// -------------------------------------------------------------------------------------------------
// ROC
// -------------------------------------------------------------------------------------------------
/// How a synthetic validation run is set up.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ValidationConfig {
    /// Number of people in the sample
    pub sample_size: usize,

    /// Number of probands that are perturbed copies of sample people
    pub in_sample_probands: usize,

    /// Number of probands that are people absent from the sample
    pub out_of_sample_probands: usize,

    pub perturbation: Perturbation,

    /// Compare digests rather than plaintext
    pub hashed: bool,

    /// The values of `min_log_odds_for_match` to evaluate
    pub thresholds: Vec<f64>,

    pub seed: u64,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        ValidationConfig {
            sample_size: 5000,
            in_sample_probands: 1000,
            out_of_sample_probands: 1000,
            perturbation: Perturbation::default(),
            hashed: false,
            thresholds: (0..=14).map(|i| f64::from(i) * 2.5 - 5.0).collect(),
            seed: 1,
        }
    }
}

/// Discrimination at one decision threshold.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct RocPoint {
    pub threshold_1: f64,
    pub threshold_2: f64,

    /// In-sample probands matched to the right person
    pub true_positives: usize,

    /// Probands matched to the wrong person, or matched when absent from the sample
    pub false_positives: usize,

    /// In-sample probands left unmatched
    pub false_negatives: usize,

    /// Out-of-sample probands left unmatched
    pub true_negatives: usize,

    pub sensitivity: f64,
    pub specificity: f64,
    pub proportion_correct: f64,
}

/// The outcome of a synthetic validation run.
#[derive(Clone, Debug, Serialize)]
pub struct ValidationReport {
    pub num_sample: usize,
    pub num_in_sample: usize,
    pub num_out_of_sample: usize,
    pub points: Vec<RocPoint>,
}

fn ratio(n: usize, d: usize) -> f64 {
    if d == 0 {
        f64::NAN
    } else {
        n as f64 / d as f64
    }
}

/// Score decisions against the truth at one pair of thresholds.
///
/// `truth` maps each sample local ID to its gold standard ID, and `proband_truth` does the
/// same for probands.
pub fn roc_point(
    decisions: &[MatchDecision],
    truth: &HashMap<String, String>,
    proband_truth: &HashMap<String, String>,
    threshold_1: f64,
    threshold_2: f64,
) -> RocPoint {
    let sample_golds: std::collections::HashSet<&String> = truth.values().collect();

    let (mut tp, mut fp, mut fn_, mut tn) = (0, 0, 0, 0);
    let (mut n_in, mut n_out) = (0, 0);
    for d in decisions {
        let gold = proband_truth.get(&d.proband_local_id);
        let in_sample = gold.map(|g| sample_golds.contains(g)).unwrap_or(false);
        if in_sample {
            n_in += 1;
        } else {
            n_out += 1;
        }

        let matched = d.redecide(threshold_1, threshold_2).is_match();
        let correct = d
            .best_candidate_local_id
            .as_ref()
            .and_then(|id| truth.get(id))
            .map(|g| Some(g) == gold)
            .unwrap_or(false);

        match (matched, in_sample) {
            (true, _) if correct => tp += 1,
            (true, _) => fp += 1,
            (false, true) => fn_ += 1,
            (false, false) => tn += 1,
        }
    }

    RocPoint {
        threshold_1,
        threshold_2,
        true_positives: tp,
        false_positives: fp,
        false_negatives: fn_,
        true_negatives: tn,
        sensitivity: ratio(tp, n_in),
        specificity: ratio(tn, n_out),
        proportion_correct: ratio(tp + tn, n_in + n_out),
    }
}

fn gold_map(records: &[IdentityRecord]) -> HashMap<String, String> {
    records
        .iter()
        .filter_map(|r| Some((r.local_id.clone(), r.gold_standard_id.clone()?)))
        .collect()
}

fn hash_all(hasher: &Hasher, records: &[IdentityRecord], model: &FrequencyModel) -> Vec<HashedRecord> {
    records.iter().map(|r| hasher.hash_record(r, model)).collect()
}

/// Run a synthetic validation: draw a sample, draw probands from within and outside it, match
/// them, and measure discrimination across a grid of `min_log_odds_for_match` values.
pub fn run_validation(
    orchestrator: &Orchestrator,
    config: &ValidationConfig,
) -> Result<ValidationReport, RunError> {
    config.perturbation.validate()?;
    let model = orchestrator.model();
    let mut gen = PopulationGenerator::new(model, config.seed)?;

    let sample = gen.generate(config.sample_size, "S");
    let n_in = config.in_sample_probands.min(sample.len());
    let mut probands: Vec<IdentityRecord> = Vec::with_capacity(n_in + config.out_of_sample_probands);
    for (i, person) in sample.iter().take(n_in).enumerate() {
        let p = config.perturbation.apply(person, &format!("P{}", i + 1), gen.rng());
        probands.push(p);
    }
    for person in gen.generate(config.out_of_sample_probands, "Q") {
        let p = config.perturbation.apply(&person, &person.local_id, gen.rng());
        probands.push(p);
    }
    debug!("Generated {} sample people and {} probands", sample.len(), probands.len());

    let (proband_set, sample_set) = if config.hashed {
        let hasher = orchestrator.hasher().ok_or(ConfigError::KeyRequired {
            probands: RecordFormat::Hashed,
            sample: RecordFormat::Hashed,
        })?;
        (
            RecordSet::Hashed(hash_all(hasher, &probands, model)),
            RecordSet::Hashed(hash_all(hasher, &sample, model)),
        )
    } else {
        (RecordSet::Plaintext(probands.clone()), RecordSet::Plaintext(sample.clone()))
    };

    let (decisions, _summary) = orchestrator.match_all(&proband_set, &sample_set, false)?;

    let truth = gold_map(&sample);
    let proband_truth = gold_map(&probands);
    let threshold_2 = orchestrator.config().exceeds_next_best_log_odds;
    let points = config
        .thresholds
        .iter()
        .map(|t1| roc_point(&decisions, &truth, &proband_truth, *t1, threshold_2))
        .collect();

    Ok(ValidationReport {
        num_sample: sample.len(),
        num_in_sample: n_in,
        num_out_of_sample: config.out_of_sample_probands,
        points,
    })
}

// -------------------------------------------------------------------------------------------------
// self test
// -------------------------------------------------------------------------------------------------
/// The result of one self-test check.
#[derive(Clone, Debug, Serialize)]
pub struct SelfTestCheck {
    pub name: &'static str,
    pub passed: bool,
    pub detail: String,
}

impl SelfTestCheck {
    fn new(name: &'static str, passed: bool, detail: String) -> Self {
        SelfTestCheck { name, passed, detail }
    }
}

/// The lowest acceptable rate at which people with complete records match themselves
pub const MIN_SELF_MATCH_RATE: f64 = 0.99;

fn self_match_rate(decisions: &[MatchDecision]) -> f64 {
    let n = decisions
        .iter()
        .filter(|d| d.matched && d.best_candidate_local_id.as_ref() == Some(&d.proband_local_id))
        .count();
    ratio(n, decisions.len())
}

/// Check the matcher's basic guarantees on a synthetic population of `population` people.
///
/// The hashed checks use `orchestrator`'s key when it has one, and are skipped otherwise.
pub fn self_test(
    orchestrator: &Orchestrator,
    population: usize,
    seed: u64,
) -> Result<Vec<SelfTestCheck>, RunError> {
    let model = orchestrator.model();
    let config = orchestrator.config();
    let mut gen = PopulationGenerator::new(model, seed)?;
    let people = gen.generate(population, "S");
    let plain = RecordSet::Plaintext(people.clone());
    let mut checks = Vec::new();

    // determinism
    {
        let (a, _) = orchestrator.match_all(&plain, &plain, true)?;
        let (b, _) = orchestrator.match_all(&plain, &plain, true)?;
        checks.push(SelfTestCheck::new(
            "determinism",
            a == b,
            format!("{} decisions compared across two runs", a.len()),
        ));

        // self-match
        let rate = self_match_rate(&a);
        checks.push(SelfTestCheck::new(
            "self-match",
            rate >= MIN_SELF_MATCH_RATE,
            format!("{:.2}% of people matched themselves", rate * 100.0),
        ));

        // monotonicity in threshold_1
        let mut previous = usize::MAX;
        let mut monotone = true;
        for i in 0..=20 {
            let t1 = f64::from(i) * 2.5 - 10.0;
            let n = a
                .iter()
                .filter(|d| d.redecide(t1, config.exceeds_next_best_log_odds).is_match())
                .count();
            monotone &= n <= previous;
            previous = n;
        }
        checks.push(SelfTestCheck::new(
            "monotonicity",
            monotone,
            "matches never increase as min_log_odds_for_match rises".to_string(),
        ));
    }

    // duplicated sample: every person has an indistinguishable twin
    {
        let mut doubled = people.clone();
        doubled.extend(people.iter().map(|p| {
            let mut twin = p.clone();
            twin.local_id = format!("{}-twin", p.local_id);
            twin
        }));
        let (decisions, _) = orchestrator.match_all(&plain, &RecordSet::Plaintext(doubled), false)?;
        let n_matched = decisions.iter().filter(|d| d.matched).count();
        checks.push(SelfTestCheck::new(
            "duplicated sample",
            n_matched == 0,
            format!("{n_matched} of {} probands matched a duplicated sample", decisions.len()),
        ));
    }

    // degradation
    {
        let empty = RecordSet::Plaintext(vec![IdentityRecord::new("EMPTY")]);
        let (decisions, _) = orchestrator.match_all(&empty, &plain, false)?;
        let passed = decisions
            .first()
            .map(|d| !d.matched && d.best_candidate_local_id.is_none())
            .unwrap_or(false);
        checks.push(SelfTestCheck::new(
            "degradation",
            passed,
            "a proband without identifiers is unmatched, with no best candidate".to_string(),
        ));
    }

    match orchestrator.hasher() {
        Some(hasher) => {
            // hash consistency
            let mut consistent = true;
            for p in people.iter().take(100) {
                for v in [&p.forename, &p.surname].into_iter().flatten() {
                    let noisy = format!("  {}. ", v.to_lowercase());
                    consistent &= hasher.hash(v) == hasher.hash(&noisy);
                    consistent &= hasher.hash(v) == hasher.hash(&canonicalise(v));
                }
            }
            checks.push(SelfTestCheck::new(
                "hash consistency",
                consistent,
                "digests ignore case, whitespace, and punctuation".to_string(),
            ));

            let hashed = RecordSet::Hashed(hash_all(hasher, &people, model));
            let (decisions, _) = orchestrator.match_all(&hashed, &hashed, false)?;
            let rate = self_match_rate(&decisions);
            checks.push(SelfTestCheck::new(
                "hashed self-match",
                rate >= MIN_SELF_MATCH_RATE,
                format!("{:.2}% of hashed people matched themselves", rate * 100.0),
            ));
        }
        None => {
            info!("No hash key given; skipping the hashed self-test checks");
        }
    }

    Ok(checks)
}

// -------------------------------------------------------------------------------------------------
// speed test
// -------------------------------------------------------------------------------------------------
/// Pairwise comparison throughput in one comparison format.
#[derive(Clone, Debug)]
pub struct Throughput {
    pub format: RecordFormat,
    pub comparisons: u64,
    pub elapsed: Duration,
}

impl Throughput {
    pub fn per_second(&self) -> f64 {
        self.comparisons as f64 / self.elapsed.as_secs_f64().max(f64::MIN_POSITIVE)
    }
}

fn time_comparisons(
    people: &[MatchableRecord],
    n_comparisons: u64,
    config: &MatchConfig,
    model: &FrequencyModel,
) -> (u64, Duration) {
    let start = Instant::now();
    let mut done = 0u64;
    let mut total = 0.0;
    'outer: for a in people {
        for b in people {
            if done >= n_comparisons {
                break 'outer;
            }
            total += compare_records(a, b, config, model).total_log_odds;
            done += 1;
        }
    }
    std::hint::black_box(total);
    (done, start.elapsed())
}

/// Time single-threaded pairwise comparisons between synthetic people, in plaintext and, when
/// a hasher is given, on digests.
pub fn benchmark_comparisons(
    model: &FrequencyModel,
    config: &MatchConfig,
    hasher: Option<&Hasher>,
    n_comparisons: u64,
    seed: u64,
) -> Result<Vec<Throughput>, ConfigError> {
    let n_people = (n_comparisons as f64).sqrt().ceil().max(1.0) as usize;
    let mut gen = PopulationGenerator::new(model, seed)?;
    let people = gen.generate(n_people, "S");

    let mut results = Vec::new();
    let plain: Vec<MatchableRecord> = people
        .iter()
        .map(|r| MatchableRecord::from_plaintext(r, model))
        .collect();
    let (comparisons, elapsed) = time_comparisons(&plain, n_comparisons, config, model);
    results.push(Throughput {
        format: RecordFormat::Plaintext,
        comparisons,
        elapsed,
    });

    if let Some(hasher) = hasher {
        let hashed: Vec<MatchableRecord> = people
            .iter()
            .map(|r| MatchableRecord::from_hashed(&hasher.hash_record(r, model), model))
            .collect();
        let (comparisons, elapsed) = time_comparisons(&hashed, n_comparisons, config, model);
        results.push(Throughput {
            format: RecordFormat::Hashed,
            comparisons,
            elapsed,
        });
    }

    Ok(results)
}

/// Apply the decision rule to every pair of thresholds in a grid, counting matches.
///
/// Useful for picking thresholds from a set of decisions without re-running the comparison.
pub fn matches_by_threshold(decisions: &[MatchDecision], grid: &[(f64, f64)]) -> Vec<usize> {
    grid.iter()
        .map(|(t1, t2)| {
            decisions
                .iter()
                .filter(|d| d.redecide(*t1, *t2).is_match())
                .count()
        })
        .collect()
}
