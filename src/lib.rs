pub mod blocking;
pub mod comparator;
pub mod defaults;
pub mod error;
pub mod frequency;
pub mod identifier;
pub mod matcher;
pub mod matcher_stats;
pub mod orchestrator;
pub mod params;
pub mod phonetic;
pub mod progress;
pub mod pseudonym;
pub mod record;
pub mod record_io;
pub mod validation;
