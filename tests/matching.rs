//! End-to-end matching behavior through the library API.

use pretty_assertions::assert_eq;
use secrecy::SecretString;

use fuzzyid::comparator::Agreement;
use fuzzyid::frequency::FrequencyModel;
use fuzzyid::matcher::{MatchDecision, MatchOutcome};
use fuzzyid::orchestrator::{Orchestrator, RecordSet};
use fuzzyid::params::MatchConfig;
use fuzzyid::pseudonym::{HashedRecord, Hasher};
use fuzzyid::record::{FieldKind, IdentityRecord, Sex};
use fuzzyid::validation::self_test;

fn person(id: &str, forename: &str, surname: &str, dob: &str, sex: Sex, postcode: &str) -> IdentityRecord {
    let mut r = IdentityRecord::new(id);
    r.forename = Some(forename.to_string());
    r.surname = Some(surname.to_string());
    r.date_of_birth = Some(dob.parse().unwrap());
    r.sex = Some(sex);
    r.postcode = Some(postcode.parse().unwrap());
    r
}

fn sample() -> Vec<IdentityRecord> {
    vec![
        person("S1", "John", "Smith", "1970-05-06", Sex::Male, "CB1 2AB"),
        person("S2", "Mary", "Jones", "1985-11-30", Sex::Female, "OX1 3EF"),
        person("S3", "Sarah", "Brown", "1992-02-14", Sex::Female, "M1 2CD"),
    ]
}

/// Nine records unrelated to anyone in the tests.
fn sample_strangers() -> Vec<IdentityRecord> {
    vec![
        person("X1", "David", "Williams", "1961-07-04", Sex::Male, "CB4 1XY"),
        person("X2", "Mary", "Jones", "1985-11-30", Sex::Female, "OX1 3EF"),
        person("X3", "Sarah", "Brown", "1992-02-14", Sex::Female, "M1 2CD"),
        person("X4", "Peter", "Taylor", "1955-03-21", Sex::Male, "LS6 2QT"),
        person("X5", "Susan", "Wilson", "1949-12-02", Sex::Female, "BS8 1TH"),
        person("X6", "James", "Davies", "2001-06-17", Sex::Male, "CF10 3AT"),
        person("X7", "Linda", "Evans", "1977-08-09", Sex::Female, "SW1A 1AA"),
        person("X8", "Robert", "Thomas", "1966-10-30", Sex::Male, "EH1 1YZ"),
        person("X9", "Karen", "Roberts", "1988-04-12", Sex::Female, "NE1 4ST"),
    ]
}

fn hasher() -> Hasher {
    Hasher::new(&SecretString::new("integration test key".to_string())).unwrap()
}

fn orchestrator(hasher: Option<Hasher>) -> Orchestrator {
    let model = FrequencyModel::from_defaults().unwrap();
    Orchestrator::new(MatchConfig::default(), model, hasher).unwrap()
}

fn hash_all(records: &[IdentityRecord]) -> Vec<HashedRecord> {
    let model = FrequencyModel::from_defaults().unwrap();
    let h = hasher();
    records.iter().map(|r| h.hash_record(r, &model)).collect()
}

fn run(o: &Orchestrator, probands: RecordSet, sample: RecordSet) -> Vec<MatchDecision> {
    o.match_all(&probands, &sample, true).unwrap().0
}

fn agreement(d: &MatchDecision, field: FieldKind) -> Agreement {
    d.comparison
        .as_ref()
        .and_then(|c| c.field(field))
        .map(|c| c.agreement)
        .unwrap_or(Agreement::NotCompared)
}

#[test]
fn exact_copy_is_matched() {
    let o = orchestrator(None);
    let probands = vec![person("P1", "Mary", "Jones", "1985-11-30", Sex::Female, "OX1 3EF")];
    let d = &run(&o, probands.into(), sample().into())[0];

    assert_eq!(d.outcome, MatchOutcome::Matched);
    assert_eq!(d.best_candidate_local_id.as_deref(), Some("S2"));
    for field in FieldKind::ALL {
        assert_eq!(agreement(d, field), Agreement::Exact, "{field}");
    }
}

#[test]
fn typo_in_forename_still_matches() {
    let o = orchestrator(None);
    let probands = vec![person("P1", "Jhon", "Smith", "1970-05-06", Sex::Male, "CB1 2AB")];
    let d = &run(&o, probands.into(), sample().into())[0];

    assert!(d.matched, "{d:?}");
    assert_eq!(d.best_candidate_local_id.as_deref(), Some("S1"));
    let forename = agreement(d, FieldKind::Forename);
    assert!(matches!(forename, Agreement::Typo | Agreement::Phonetic), "{forename:?}");
}

#[test]
fn spelling_variant_of_forename_matches_among_strangers() {
    let o = orchestrator(None);
    let mut sample = vec![person("S1", "Jane", "Smith", "1980-01-01", Sex::Female, "CB2 1AB")];
    sample.extend(sample_strangers());
    let probands = vec![person("P1", "Janne", "Smith", "1980-01-01", Sex::Female, "CB2 1AB")];
    let d = &run(&o, probands.into(), sample.into())[0];

    assert_eq!(d.outcome, MatchOutcome::Matched, "{d:?}");
    assert_eq!(d.best_candidate_local_id.as_deref(), Some("S1"));
    assert_eq!(agreement(d, FieldKind::Forename), Agreement::Phonetic);
    assert!(d.best_log_odds > MatchConfig::default().min_log_odds_for_match);
}

#[test]
fn two_spelling_variants_are_ambiguous() {
    let o = orchestrator(None);
    let sample = vec![
        person("S0", "Janne", "Smith", "1980-01-01", Sex::Female, "CB2 1AB"),
        person("S1", "Jayne", "Smith", "1980-01-01", Sex::Female, "CB2 1AB"),
    ];
    let probands = vec![person("P1", "Jane", "Smith", "1980-01-01", Sex::Female, "CB2 1AB")];
    let d = &run(&o, probands.into(), sample.into())[0];

    assert!(!d.matched, "{d:?}");
    assert_eq!(d.outcome, MatchOutcome::Ambiguous);
    assert_eq!(d.best_log_odds, d.second_best_log_odds);
}

#[test]
fn exact_surname_outranks_spelling_variant() {
    let o = orchestrator(None);
    // the variant comes first, so a tie would go to it
    let sample = vec![
        person("S0", "John", "Smythe", "1970-05-06", Sex::Male, "CB1 2AB"),
        person("S1", "John", "Smith", "1970-05-06", Sex::Male, "CB1 2AB"),
    ];
    let probands = vec![person("P1", "John", "Smith", "1970-05-06", Sex::Male, "CB1 2AB")];
    let d = &run(&o, probands.into(), sample.into())[0];

    assert_eq!(d.best_candidate_local_id.as_deref(), Some("S1"));
    assert!(d.best_log_odds > d.second_best_log_odds, "{d:?}");
    assert_eq!(agreement(d, FieldKind::Surname), Agreement::Exact);
}

#[test]
fn indistinguishable_candidates_are_ambiguous() {
    let o = orchestrator(None);
    let mut sample = sample();
    sample.push(person("S1-twin", "John", "Smith", "1970-05-06", Sex::Male, "CB1 2AB"));
    let probands = vec![person("P1", "John", "Smith", "1970-05-06", Sex::Male, "CB1 2AB")];
    let d = &run(&o, probands.into(), sample.into())[0];

    assert!(!d.matched);
    assert_eq!(d.outcome, MatchOutcome::Ambiguous);
    assert_eq!(d.best_log_odds, d.second_best_log_odds);
    // ties go to the earlier sample record
    assert_eq!(d.best_candidate_local_id.as_deref(), Some("S1"));
}

#[test]
fn stranger_is_not_matched() {
    let o = orchestrator(None);
    let probands = vec![
        person("P1", "David", "Williams", "1961-07-04", Sex::Male, "CB4 1XY"),
        // shares a surname and birth year with S1, nothing else
        person("P2", "Sarah", "Smith", "1970-09-12", Sex::Female, "OX1 1AA"),
    ];
    let decisions = run(&o, probands.into(), sample().into());

    assert_eq!(decisions[0].outcome, MatchOutcome::NoCandidates);
    assert_eq!(decisions[0].best_candidate_local_id, None);
    assert!(!decisions[1].matched);
    assert_eq!(decisions[1].outcome, MatchOutcome::BelowThreshold);
}

#[test]
fn hashed_comparison_gets_no_typo_credit() {
    let o = orchestrator(None);
    let probands = vec![person("P1", "Jhon", "Smith", "1970-05-06", Sex::Male, "CB1 2AB")];
    let d = &run(&o, hash_all(&probands).into(), hash_all(&sample()).into())[0];

    assert!(d.matched, "{d:?}");
    assert_eq!(d.best_candidate_local_id.as_deref(), Some("S1"));
    assert_ne!(agreement(d, FieldKind::Forename), Agreement::Typo);
}

#[test]
fn hashed_and_plaintext_scores_agree_on_exact_copies() {
    let o = orchestrator(None);
    let plain = run(&o, sample().into(), sample().into());
    let hashed = run(&o, hash_all(&sample()).into(), hash_all(&sample()).into());
    for (p, h) in plain.iter().zip(hashed.iter()) {
        assert_eq!(p.best_candidate_local_id, h.best_candidate_local_id);
        assert!((p.best_log_odds - h.best_log_odds).abs() < 1e-9, "{p:?} vs {h:?}");
    }
}

#[test]
fn results_are_deterministic_across_batch_sizes() {
    let probands: Vec<IdentityRecord> = sample().into_iter().rev().collect();
    let mut config = MatchConfig::default();
    config.batch_size = 1;
    let small = Orchestrator::new(config, FrequencyModel::from_defaults().unwrap(), None).unwrap();
    let large = orchestrator(None);

    let a = run(&small, probands.clone().into(), sample().into());
    let b = run(&large, probands.into(), sample().into());
    assert_eq!(a, b);
}

#[test]
fn raising_the_threshold_never_adds_matches() {
    let o = orchestrator(None);
    let probands = vec![
        person("P1", "Jhon", "Smith", "1970-05-06", Sex::Male, "CB1 2AB"),
        person("P2", "Mary", "Jones", "1985-11-30", Sex::Female, "OX1 3EF"),
        person("P3", "Sarah", "Broun", "1992-02-14", Sex::Female, "M1 9ZZ"),
    ];
    let decisions = run(&o, probands.into(), sample().into());

    let mut previous = usize::MAX;
    for t1 in [-10.0, 0.0, 5.0, 10.0, 20.0, 30.0, 40.0, 60.0] {
        let n = decisions.iter().filter(|d| d.redecide(t1, 10.0).is_match()).count();
        assert!(n <= previous, "{n} matches at {t1}, {previous} below it");
        previous = n;
    }
}

#[test]
fn self_test_passes_with_defaults() {
    let o = orchestrator(Some(hasher()));
    let checks = self_test(&o, 300, 7).unwrap();
    assert_eq!(checks.len(), 7);
    for c in checks.iter() {
        assert!(c.passed, "{c:?}");
    }
}
