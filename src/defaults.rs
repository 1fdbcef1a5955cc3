pub static DEFAULT_FORENAMES: &str = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/data/default/forenames.csv"));

pub static DEFAULT_SURNAMES: &str = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/data/default/surnames.csv"));

pub static DEFAULT_SEXES: &str = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/data/default/sexes.csv"));

pub static DEFAULT_POSTCODES: &str = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/data/default/postcodes.csv"));
