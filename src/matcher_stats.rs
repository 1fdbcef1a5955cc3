// -------------------------------------------------------------------------------------------------
// MatcherStats
// -------------------------------------------------------------------------------------------------
#[derive(Default, Debug, Clone, PartialEq, Eq)]
pub struct MatcherStats {
    pub probands_seen: u64,
    pub comparisons: u64,
    pub degraded_comparisons: u64,
    pub full_sweeps: u64,

    pub matched: u64,
    pub ambiguous: u64,
    pub below_threshold: u64,
    pub no_candidates: u64,
    pub no_usable_fields: u64,
}

impl MatcherStats {
    pub fn update(&mut self, other: &MatcherStats) {
        self.probands_seen += other.probands_seen;
        self.comparisons += other.comparisons;
        self.degraded_comparisons += other.degraded_comparisons;
        self.full_sweeps += other.full_sweeps;
        self.matched += other.matched;
        self.ambiguous += other.ambiguous;
        self.below_threshold += other.below_threshold;
        self.no_candidates += other.no_candidates;
        self.no_usable_fields += other.no_usable_fields;
    }

    /// Probands that were not matched, for whatever reason.
    pub fn unmatched(&self) -> u64 {
        self.ambiguous + self.below_threshold + self.no_candidates + self.no_usable_fields
    }
}
