use serde::{Serialize, Serializer};
use std::sync::Mutex;

use crate::blocking::CandidateIndex;
use crate::comparator::{compare_field, FieldComparison};
use crate::frequency::FrequencyModel;
use crate::identifier::MatchableRecord;
use crate::matcher_stats::MatcherStats;
use crate::params::MatchConfig;
use crate::record::FieldKind;

/// Serialize a log-odds value, writing non-finite values (no candidate) as null.
fn serialize_log_odds<S: Serializer>(v: &f64, s: S) -> Result<S::Ok, S::Error> {
    if v.is_finite() {
        s.serialize_some(v)
    } else {
        s.serialize_none()
    }
}

// -------------------------------------------------------------------------------------------------
// ComparisonResult
// -------------------------------------------------------------------------------------------------
/// The evidence from comparing one proband with one candidate.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ComparisonResult {
    /// One entry per field kind, in `FieldKind::ALL` order
    pub fields: Vec<FieldComparison>,

    /// Sum of the compared fields' log likelihood ratios
    pub total_log_odds: f64,
}

impl ComparisonResult {
    pub fn field(&self, field: FieldKind) -> Option<&FieldComparison> {
        self.fields.iter().find(|c| c.field == field)
    }

    pub fn is_degraded(&self) -> bool {
        self.fields.iter().any(|c| c.degraded)
    }

    pub fn num_compared(&self) -> usize {
        self.fields.iter().filter(|c| c.is_compared()).count()
    }
}

/// Compare a proband with a candidate, field by field.
///
/// Fields are treated as conditionally independent, so their log likelihood ratios add.
pub fn compare_records(
    proband: &MatchableRecord,
    candidate: &MatchableRecord,
    config: &MatchConfig,
    model: &FrequencyModel,
) -> ComparisonResult {
    let fields: Vec<FieldComparison> = FieldKind::ALL
        .iter()
        .map(|f| compare_field(*f, proband, candidate, config, model))
        .collect();
    let total_log_odds = fields.iter().map(|c| c.log_lr).sum();
    ComparisonResult {
        fields,
        total_log_odds,
    }
}

// -------------------------------------------------------------------------------------------------
// MatchOutcome
// -------------------------------------------------------------------------------------------------
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchOutcome {
    Matched,

    /// The proband had no field that could be compared
    NoUsableFields,

    /// No sample record shared a block key with the proband
    NoCandidates,

    /// The best candidate did not reach `min_log_odds_for_match`
    BelowThreshold,

    /// The best candidate did not beat the runner-up by `exceeds_next_best_log_odds`
    Ambiguous,
}

impl MatchOutcome {
    pub fn name(&self) -> &'static str {
        match self {
            MatchOutcome::Matched => "matched",
            MatchOutcome::NoUsableFields => "no_usable_fields",
            MatchOutcome::NoCandidates => "no_candidates",
            MatchOutcome::BelowThreshold => "below_threshold",
            MatchOutcome::Ambiguous => "ambiguous",
        }
    }

    #[inline]
    pub fn is_match(&self) -> bool {
        *self == MatchOutcome::Matched
    }
}

impl std::fmt::Display for MatchOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// The decision rule.
///
/// The best candidate is accepted only if `best >= min_log_odds_for_match` and
/// `best >= second_best + exceeds_next_best_log_odds`.
/// With no runner-up, `second_best` is negative infinity and the second test always passes.
///
/// ```
/// # use fuzzyid::matcher::{decide, MatchOutcome};
/// assert_eq!(decide(30.0, f64::NEG_INFINITY, 5.0, 10.0), MatchOutcome::Matched);
/// assert_eq!(decide(4.0, f64::NEG_INFINITY, 5.0, 10.0), MatchOutcome::BelowThreshold);
/// assert_eq!(decide(30.0, 25.0, 5.0, 10.0), MatchOutcome::Ambiguous);
/// assert_eq!(decide(30.0, 20.0, 5.0, 10.0), MatchOutcome::Matched);
/// ```
pub fn decide(
    best_log_odds: f64,
    second_best_log_odds: f64,
    min_log_odds_for_match: f64,
    exceeds_next_best_log_odds: f64,
) -> MatchOutcome {
    if !(best_log_odds >= min_log_odds_for_match) {
        MatchOutcome::BelowThreshold
    } else if !(best_log_odds >= second_best_log_odds + exceeds_next_best_log_odds) {
        MatchOutcome::Ambiguous
    } else {
        MatchOutcome::Matched
    }
}

// -------------------------------------------------------------------------------------------------
// MatchDecision
// -------------------------------------------------------------------------------------------------
/// The result for one proband.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct MatchDecision {
    pub proband_local_id: String,

    /// The highest-scoring candidate, whether or not it was accepted
    pub best_candidate_local_id: Option<String>,

    /// Negative infinity when there was no candidate
    #[serde(serialize_with = "serialize_log_odds")]
    pub best_log_odds: f64,

    /// Negative infinity when there was no second candidate
    #[serde(serialize_with = "serialize_log_odds")]
    pub second_best_log_odds: f64,

    pub matched: bool,

    pub outcome: MatchOutcome,

    /// Number of candidates compared
    pub n_candidates: usize,

    /// The per-field evidence against the best candidate, when requested
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comparison: Option<ComparisonResult>,
}

impl MatchDecision {
    fn without_candidates(proband: &MatchableRecord, outcome: MatchOutcome) -> Self {
        MatchDecision {
            proband_local_id: proband.local_id.clone(),
            best_candidate_local_id: None,
            best_log_odds: f64::NEG_INFINITY,
            second_best_log_odds: f64::NEG_INFINITY,
            matched: false,
            outcome,
            n_candidates: 0,
            comparison: None,
        }
    }

    /// Re-apply the decision rule under different thresholds.
    pub fn redecide(&self, min_log_odds_for_match: f64, exceeds_next_best_log_odds: f64) -> MatchOutcome {
        match self.outcome {
            MatchOutcome::NoUsableFields | MatchOutcome::NoCandidates => self.outcome,
            _ => decide(
                self.best_log_odds,
                self.second_best_log_odds,
                min_log_odds_for_match,
                exceeds_next_best_log_odds,
            ),
        }
    }
}

// -------------------------------------------------------------------------------------------------
// Matcher
// -------------------------------------------------------------------------------------------------
/// A `Matcher` finds the best sample record for probands, using a `CandidateIndex` over the
/// sample.
///
/// If matching on multiple threads, use a separate `Matcher` for each thread.
pub struct Matcher<'a> {
    config: &'a MatchConfig,
    model: &'a FrequencyModel,
    index: &'a CandidateIndex,
    sample: &'a [MatchableRecord],

    /// Local statistics for this `Matcher`
    local_stats: MatcherStats,

    /// Global statistics, updated with the local statistics when this `Matcher` is dropped
    global_stats: Option<&'a Mutex<MatcherStats>>,
}

/// This `Drop` implementation updates the `global_stats` with the local stats
impl<'a> Drop for Matcher<'a> {
    fn drop(&mut self) {
        if let Some(global_stats) = self.global_stats {
            // a poisoned lock means another worker panicked; the stats are moot then
            if let Ok(mut global_stats) = global_stats.lock() {
                global_stats.update(&self.local_stats);
            }
        }
    }
}

impl<'a> Matcher<'a> {
    /// Create a new `Matcher` over `sample`, which must be the records `index` was built from.
    ///
    /// If `global_stats` is provided, it will be updated with the local stats from this `Matcher`
    /// when it is dropped.
    pub fn new(
        config: &'a MatchConfig,
        model: &'a FrequencyModel,
        index: &'a CandidateIndex,
        sample: &'a [MatchableRecord],
        global_stats: Option<&'a Mutex<MatcherStats>>,
    ) -> Self {
        debug_assert_eq!(index.len(), sample.len());
        Matcher {
            config,
            model,
            index,
            sample,
            local_stats: MatcherStats::default(),
            global_stats,
        }
    }

    #[inline]
    pub fn compare(&self, proband: &MatchableRecord, candidate: &MatchableRecord) -> ComparisonResult {
        compare_records(proband, candidate, self.config, self.model)
    }

    #[inline]
    fn clamp(&self, log_odds: f64) -> f64 {
        if log_odds.is_nan() {
            self.config.log_odds_floor
        } else {
            log_odds.max(self.config.log_odds_floor)
        }
    }

    pub fn stats(&self) -> &MatcherStats {
        &self.local_stats
    }

    /// Score every candidate for a proband and decide on the best one.
    ///
    /// Candidates are visited in sample order, and a candidate only displaces the current best
    /// if it scores strictly higher, so ties go to the earlier sample record. A tie for best
    /// makes the runner-up score equal to the best score.
    ///
    /// If `with_details` is set, the per-field evidence against the best candidate is kept.
    pub fn match_proband(&mut self, proband: &MatchableRecord, with_details: bool) -> MatchDecision {
        self.local_stats.probands_seen += 1;

        if !proband.has_usable_fields() {
            self.local_stats.no_usable_fields += 1;
            return MatchDecision::without_candidates(proband, MatchOutcome::NoUsableFields);
        }

        let candidates = self.index.candidates_for(proband);
        if candidates.full_sweep {
            self.local_stats.full_sweeps += 1;
        }
        if candidates.indices.is_empty() {
            self.local_stats.no_candidates += 1;
            return MatchDecision::without_candidates(proband, MatchOutcome::NoCandidates);
        }

        let mut best: Option<(usize, ComparisonResult)> = None;
        let mut best_score = f64::NEG_INFINITY;
        let mut second_score = f64::NEG_INFINITY;

        for &idx in candidates.indices.iter() {
            let result = self.compare(proband, &self.sample[idx]);
            self.local_stats.comparisons += 1;
            if result.is_degraded() {
                self.local_stats.degraded_comparisons += 1;
            }

            let score = self.clamp(result.total_log_odds);
            if score > best_score || best.is_none() {
                second_score = best_score;
                best_score = score;
                best = Some((idx, result));
            } else if score > second_score {
                second_score = score;
            }
        }

        let outcome = decide(
            best_score,
            second_score,
            self.config.min_log_odds_for_match,
            self.config.exceeds_next_best_log_odds,
        );
        match outcome {
            MatchOutcome::Matched => self.local_stats.matched += 1,
            MatchOutcome::Ambiguous => self.local_stats.ambiguous += 1,
            _ => self.local_stats.below_threshold += 1,
        }

        let (best_idx, mut comparison) = match best {
            Some((idx, result)) => (Some(idx), Some(result)),
            None => (None, None),
        };
        if !with_details {
            comparison = None;
        }

        MatchDecision {
            proband_local_id: proband.local_id.clone(),
            best_candidate_local_id: best_idx.map(|i| self.sample[i].local_id.clone()),
            best_log_odds: best_score,
            second_best_log_odds: second_score,
            matched: outcome.is_match(),
            outcome,
            n_candidates: candidates.indices.len(),
            comparison,
        }
    }
}

// -------------------------------------------------------------------------------------------------
// test
// -------------------------------------------------------------------------------------------------
#[cfg(test)]
mod test {
    use super::*;
    use crate::comparator::Agreement;
    use crate::params::BlockingConfig;
    use crate::record::{IdentityRecord, Sex};
    use pretty_assertions::assert_eq;

    fn person(id: &str, forename: &str, surname: &str, dob: &str, sex: Sex, postcode: &str) -> IdentityRecord {
        let mut r = IdentityRecord::new(id);
        r.forename = Some(forename.to_string());
        r.surname = Some(surname.to_string());
        r.date_of_birth = Some(dob.parse().unwrap());
        r.sex = Some(sex);
        r.postcode = Some(postcode.parse().unwrap());
        r
    }

    struct Fixture {
        config: MatchConfig,
        model: FrequencyModel,
        sample: Vec<MatchableRecord>,
        index: CandidateIndex,
    }

    impl Fixture {
        fn new(sample: &[IdentityRecord]) -> Self {
            let config = MatchConfig::default();
            let model = FrequencyModel::from_defaults().unwrap();
            let sample: Vec<_> = sample
                .iter()
                .map(|r| MatchableRecord::from_plaintext(r, &model))
                .collect();
            let index = CandidateIndex::build(&sample, &config.blocking);
            Fixture {
                config,
                model,
                sample,
                index,
            }
        }

        fn decide(&self, proband: &IdentityRecord) -> MatchDecision {
            let mut matcher = Matcher::new(&self.config, &self.model, &self.index, &self.sample, None);
            let proband = MatchableRecord::from_plaintext(proband, &self.model);
            matcher.match_proband(&proband, true)
        }
    }

    #[test]
    fn decision_rule_boundaries() {
        assert_eq!(decide(5.0, f64::NEG_INFINITY, 5.0, 10.0), MatchOutcome::Matched);
        assert_eq!(decide(4.999, f64::NEG_INFINITY, 5.0, 10.0), MatchOutcome::BelowThreshold);
        assert_eq!(decide(20.0, 10.0, 5.0, 10.0), MatchOutcome::Matched);
        assert_eq!(decide(20.0, 10.001, 5.0, 10.0), MatchOutcome::Ambiguous);
        assert_eq!(decide(20.0, 20.0, 5.0, 0.0), MatchOutcome::Matched);
        assert_eq!(decide(f64::NAN, f64::NEG_INFINITY, 5.0, 10.0), MatchOutcome::BelowThreshold);
        // failing both tests reports the absolute threshold
        assert_eq!(decide(1.0, 0.5, 5.0, 10.0), MatchOutcome::BelowThreshold);
    }

    #[test]
    fn exact_match_wins() {
        let jane = person("S1", "JANE", "SMITH", "1980-01-01", Sex::Female, "CB2 1AB");
        let f = Fixture::new(&[
            person("S0", "PETER", "SMITH", "1980-07-04", Sex::Male, "OX1 2JD"),
            jane.clone(),
        ]);
        let d = f.decide(&IdentityRecord { local_id: "P1".to_string(), ..jane });
        assert_eq!(d.best_candidate_local_id.as_deref(), Some("S1"));
        assert_eq!(d.outcome, MatchOutcome::Matched);
        assert!(d.matched);
        assert_eq!(d.n_candidates, 2);
        let c = d.comparison.unwrap();
        assert_eq!(c.num_compared(), 5);
        assert!(c.total_log_odds > 30.0, "{}", c.total_log_odds);
        assert!(d.second_best_log_odds < d.best_log_odds - 10.0);
    }

    #[test]
    fn exact_surname_outranks_spelling_variant() {
        let john = person("S1", "JOHN", "SMITH", "1970-05-06", Sex::Male, "CB1 2AB");
        let f = Fixture::new(&[
            IdentityRecord { local_id: "S0".to_string(), surname: Some("SMYTHE".to_string()), ..john.clone() },
            john.clone(),
        ]);
        let d = f.decide(&IdentityRecord { local_id: "P1".to_string(), ..john });
        assert_eq!(d.best_candidate_local_id.as_deref(), Some("S1"));
        assert!(d.best_log_odds > d.second_best_log_odds, "{d:?}");
        let c = d.comparison.unwrap();
        assert_eq!(c.field(FieldKind::Surname).unwrap().agreement, Agreement::Exact);
    }

    #[test]
    fn ties_keep_the_earlier_candidate() {
        let jane = person("S0", "JANE", "SMITH", "1980-01-01", Sex::Female, "CB2 1AB");
        let f = Fixture::new(&[
            jane.clone(),
            IdentityRecord { local_id: "S1".to_string(), ..jane.clone() },
        ]);
        let d = f.decide(&IdentityRecord { local_id: "P".to_string(), ..jane });
        assert_eq!(d.best_candidate_local_id.as_deref(), Some("S0"));
        assert_eq!(d.best_log_odds, d.second_best_log_odds);
        assert_eq!(d.outcome, MatchOutcome::Ambiguous);
        assert!(!d.matched);
    }

    #[test]
    fn empty_proband_is_unmatched_without_comparison() {
        let f = Fixture::new(&[person("S0", "JANE", "SMITH", "1980-01-01", Sex::Female, "CB2 1AB")]);
        let d = f.decide(&IdentityRecord::new("P"));
        assert_eq!(d.outcome, MatchOutcome::NoUsableFields);
        assert_eq!(d.best_candidate_local_id, None);
        assert!(!d.matched);
        assert_eq!(d.best_log_odds, f64::NEG_INFINITY);
    }

    #[test]
    fn no_candidates_without_sweep() {
        let config = MatchConfig {
            blocking: BlockingConfig {
                fallback_full_sweep: false,
                ..Default::default()
            },
            ..Default::default()
        };
        let model = FrequencyModel::from_defaults().unwrap();
        let sample = vec![MatchableRecord::from_plaintext(
            &person("S0", "JANE", "SMITH", "1980-01-01", Sex::Female, "CB2 1AB"),
            &model,
        )];
        let index = CandidateIndex::build(&sample, &config.blocking);
        let mut matcher = Matcher::new(&config, &model, &index, &sample, None);

        let mut proband = IdentityRecord::new("P");
        proband.sex = Some(Sex::Female);
        let d = matcher.match_proband(&MatchableRecord::from_plaintext(&proband, &model), false);
        assert_eq!(d.outcome, MatchOutcome::NoCandidates);
        assert_eq!(d.n_candidates, 0);
        assert_eq!(matcher.stats().no_candidates, 1);
    }

    #[test]
    fn scores_are_clamped() {
        let config = MatchConfig {
            log_odds_floor: -3.0,
            ..Default::default()
        };
        let model = FrequencyModel::from_defaults().unwrap();
        let sample = vec![MatchableRecord::from_plaintext(
            &person("S0", "MARY", "JONES", "1950-06-30", Sex::Male, "M1 1AA"),
            &model,
        )];
        let index = CandidateIndex::build(&sample, &config.blocking);
        let mut matcher = Matcher::new(&config, &model, &index, &sample, None);
        let mut proband = person("P", "JANE", "SMITH", "1980-01-01", Sex::Female, "CB2 1AB");
        proband.forename = None;
        proband.surname = None;
        let d = matcher.match_proband(&MatchableRecord::from_plaintext(&proband, &model), false);
        assert_eq!(d.best_log_odds, -3.0);
        assert_eq!(d.outcome, MatchOutcome::BelowThreshold);
    }

    #[test]
    fn stats_merge_on_drop() {
        let jane = person("S0", "JANE", "SMITH", "1980-01-01", Sex::Female, "CB2 1AB");
        let f = Fixture::new(&[jane.clone()]);
        let global = Mutex::new(MatcherStats::default());
        {
            let mut matcher = Matcher::new(&f.config, &f.model, &f.index, &f.sample, Some(&global));
            let p = MatchableRecord::from_plaintext(&jane, &f.model);
            matcher.match_proband(&p, false);
            matcher.match_proband(&MatchableRecord::from_plaintext(&IdentityRecord::new("E"), &f.model), false);
        }
        let stats = global.into_inner().unwrap();
        assert_eq!(stats.probands_seen, 2);
        assert_eq!(stats.matched, 1);
        assert_eq!(stats.no_usable_fields, 1);
        assert_eq!(stats.comparisons, 1);
    }

    #[test]
    fn redecide_respects_thresholds() {
        let jane = person("S0", "JANE", "SMITH", "1980-01-01", Sex::Female, "CB2 1AB");
        let f = Fixture::new(&[jane.clone()]);
        let d = f.decide(&jane);
        assert!(d.matched);
        assert_eq!(d.redecide(d.best_log_odds + 1.0, 10.0), MatchOutcome::BelowThreshold);
        assert_eq!(d.redecide(d.best_log_odds, 10.0), MatchOutcome::Matched);
    }
}
