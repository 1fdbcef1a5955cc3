use clap::{crate_description, crate_version, ArgAction, Args, Parser, Subcommand, ValueEnum};
use secrecy::SecretString;
use std::path::PathBuf;

use fuzzyid::frequency::{
    DEFAULT_FIRST_BIRTH_YEAR, DEFAULT_LAST_BIRTH_YEAR, DEFAULT_MIN_FREQUENCY,
    DEFAULT_UNITS_PER_DISTRICT,
};
use fuzzyid::record::FieldKind;
use fuzzyid::record_io::RecordFormat;

// -----------------------------------------------------------------------------
// command-line args
// -----------------------------------------------------------------------------
#[derive(Parser, Debug)]
#[command(
    author,   // retrieved from Cargo.toml `authors`
    version,  // retrieved from Cargo.toml `version`
    about,    // retrieved from Cargo.toml `description`

    long_version = concat!(
        crate_version!(),
    ),

    long_about = concat!(
        crate_description!(),
    ),
)]
#[deny(missing_docs)]
/// Link person records across databases by probabilistic matching
pub struct CommandLineArgs {
    #[command(subcommand)]
    pub command: Command,

    #[command(flatten)]
    pub global_args: GlobalArgs,
}

impl CommandLineArgs {
    pub fn parse_args() -> Self {
        let mut s = Self::parse();

        // If `NO_COLOR` is set in the environment, disable colored output
        //
        // https://no-color.org/
        if std::env::var("NO_COLOR").is_ok() {
            s.global_args.color = Mode::Never
        }

        s
    }
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Replace the identifiers in a plaintext record file with keyed digests
    ///
    /// Each identifier is canonicalised and hashed with HMAC-SHA256 under the secret key.
    /// Frequency information for each identifier is computed from the plaintext beforehand and
    /// written alongside the digests, so that hashed records can be matched with the same
    /// evidence weights as plaintext ones.
    ///
    /// Two files hashed with the same key can be compared with each other; files hashed with
    /// different keys cannot.
    #[command(display_order = 1)]
    Hash(HashArgs),

    /// Find the best sample record for each proband
    ///
    /// Every proband is compared against the sample records that share a blocking key with it.
    /// The best candidate is accepted as a match only if its log odds reach
    /// `--min-log-odds-for-match` and exceed the runner-up's by `--exceeds-next-best-log-odds`.
    ///
    /// Either side may be plaintext or hashed. When the formats differ, the plaintext side is
    /// hashed in-process, which requires the key the other side was hashed with.
    #[command(display_order = 2)]
    Compare(CompareArgs),

    /// Show the frequencies and phonetic codes used for identifier values
    #[command(display_order = 3)]
    Lookup(LookupArgs),

    /// Check the matcher's guarantees on a synthetic population
    #[command(display_order = 10, name = "selftest")]
    SelfTest(SelfTestArgs),

    /// Measure pairwise comparison throughput on synthetic data
    #[command(display_order = 11, name = "speedtest")]
    SpeedTest(SpeedTestArgs),

    /// Measure how well matching discriminates on a synthetic population
    ///
    /// A synthetic sample is drawn from the frequency model. Probands are perturbed copies of
    /// some sample people plus people absent from the sample. Sensitivity and specificity are
    /// reported for a range of `--min-log-odds-for-match` values.
    #[command(display_order = 12)]
    Validate(ValidateArgs),
}

// -----------------------------------------------------------------------------
// global options
// -----------------------------------------------------------------------------
#[derive(Args, Debug)]
#[command(next_help_heading = "Global Options")]
pub struct GlobalArgs {
    /// Enable verbose output
    ///
    /// This can be repeated up to 3 times to enable successively more output.
    #[arg(global=true, long, short, action=ArgAction::Count)]
    pub verbose: u8,

    /// Suppress non-error feedback messages
    ///
    /// This silences WARNING, INFO, DEBUG, and TRACE messages and disables progress bars.
    /// This overrides any provided verbosity and progress reporting options.
    #[arg(global=true, long, short)]
    pub quiet: bool,

    /// Enable or disable colored output
    ///
    /// When this is "auto", colors are enabled when stdout is a tty.
    ///
    /// If the `NO_COLOR` environment variable is set, it takes precedence and is equivalent to `--color=never`.
    #[arg(global=true, long, default_value_t=Mode::Auto, value_name="MODE")]
    pub color: Mode,

    /// Enable or disable progress bars
    ///
    /// When this is "auto", progress bars are enabled when stderr is a tty.
    #[arg(global=true, long, default_value_t=Mode::Auto, value_name="MODE")]
    pub progress: Mode,

    /// Use N parallel matching threads
    #[arg(global=true, long("jobs"), short('j'), value_name="N", default_value_t=get_parallelism())]
    pub num_jobs: usize,
}

impl GlobalArgs {
    pub fn use_color(&self) -> bool {
        match self.color {
            Mode::Never => false,
            Mode::Always => true,
            Mode::Auto => atty::is(atty::Stream::Stdout),
        }
    }

    pub fn use_progress(&self) -> bool {
        if self.quiet {
            return false;
        }
        match self.progress {
            Mode::Never => false,
            Mode::Always => true,
            Mode::Auto => atty::is(atty::Stream::Stderr),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, ValueEnum)]
pub enum Mode {
    Auto,
    Never,
    Always,
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Mode::Auto => "auto",
            Mode::Never => "never",
            Mode::Always => "always",
        };
        write!(f, "{s}")
    }
}

fn get_parallelism() -> usize {
    match std::thread::available_parallelism() {
        Err(_e) => 1,
        Ok(v) => v.into(),
    }
}

// -----------------------------------------------------------------------------
// key options
// -----------------------------------------------------------------------------
fn parse_key(s: &str) -> Result<SecretString, String> {
    Ok(SecretString::new(s.to_string()))
}

#[derive(Args, Debug)]
#[command(next_help_heading = "Key Options")]
pub struct KeyArgs {
    /// Use the specified secret key for hashing identifiers
    ///
    /// Prefer the environment variable to the command-line option, which may be visible to
    /// other users of the system.
    #[arg(
        long,
        value_name = "KEY",
        env("FUZZYID_KEY"),
        hide_env_values = true,
        value_parser = parse_key
    )]
    pub key: Option<SecretString>,
}

// -----------------------------------------------------------------------------
// frequency options
// -----------------------------------------------------------------------------
#[derive(Args, Debug)]
#[command(next_help_heading = "Reference Data Options")]
pub struct FrequencyArgs {
    /// Load forename frequencies from the specified CSV file
    ///
    /// The file has `value` and `frequency` columns.
    #[arg(long, value_name = "PATH")]
    pub forename_freq: Option<PathBuf>,

    /// Load surname frequencies from the specified CSV file
    ///
    /// The file has `value` and `frequency` columns.
    #[arg(long, value_name = "PATH")]
    pub surname_freq: Option<PathBuf>,

    /// Load sex frequencies from the specified CSV file
    ///
    /// The file has `value` and `frequency` columns, with values `M`, `F`, or `X`.
    #[arg(long, value_name = "PATH")]
    pub sex_freq: Option<PathBuf>,

    /// Load postcode district frequencies from the specified CSV file
    ///
    /// The file has `district` and `frequency` columns, and optionally a `units` column giving
    /// the number of postcode units in the district.
    #[arg(long, value_name = "PATH")]
    pub postcode_freq: Option<PathBuf>,

    /// Do not use the built-in reference data
    ///
    /// Fields without a frequency file are then disabled and take no part in matching.
    #[arg(long)]
    pub no_default_frequencies: bool,

    /// Exclude the specified field from matching
    ///
    /// This option can be repeated.
    #[arg(long, value_name = "FIELD")]
    pub disable: Vec<FieldArg>,

    /// Assume dates of birth fall no earlier than this year
    #[arg(long, value_name = "YEAR", default_value_t = DEFAULT_FIRST_BIRTH_YEAR)]
    pub first_birth_year: i32,

    /// Assume dates of birth fall no later than this year
    #[arg(long, value_name = "YEAR", default_value_t = DEFAULT_LAST_BIRTH_YEAR)]
    pub last_birth_year: i32,

    /// Use this frequency for values missing from the reference data
    #[arg(long, value_name = "P", default_value_t = DEFAULT_MIN_FREQUENCY)]
    pub min_frequency: f64,

    /// Assume this many postcode units in a district whose reference data does not say
    #[arg(long, value_name = "N", default_value_t = DEFAULT_UNITS_PER_DISTRICT)]
    pub units_per_district: u32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum FieldArg {
    Forename,
    Surname,
    #[value(alias = "dob")]
    DateOfBirth,
    Sex,
    Postcode,
}

impl From<FieldArg> for FieldKind {
    fn from(f: FieldArg) -> Self {
        match f {
            FieldArg::Forename => FieldKind::Forename,
            FieldArg::Surname => FieldKind::Surname,
            FieldArg::DateOfBirth => FieldKind::DateOfBirth,
            FieldArg::Sex => FieldKind::Sex,
            FieldArg::Postcode => FieldKind::Postcode,
        }
    }
}

// -----------------------------------------------------------------------------
// matching options
// -----------------------------------------------------------------------------
#[derive(Args, Debug)]
#[command(next_help_heading = "Matching Options")]
pub struct MatchArgs {
    /// Load matching parameters from the specified YAML file
    ///
    /// Parameters not given in the file keep their default values.
    /// Options given on the command line override values from the file.
    #[arg(long, value_name = "PATH")]
    pub params: Option<PathBuf>,

    /// Accept the best candidate only if its log odds are at least this
    #[arg(long, value_name = "LOG_ODDS", allow_negative_numbers = true)]
    pub min_log_odds_for_match: Option<f64>,

    /// Accept the best candidate only if it beats the runner-up by at least this
    #[arg(long, value_name = "LOG_ODDS", allow_negative_numbers = true)]
    pub exceeds_next_best_log_odds: Option<f64>,

    /// Decide and write this many probands at a time
    #[arg(long, value_name = "N")]
    pub batch_size: Option<usize>,

    /// Leave probands without any blocking key unmatched rather than comparing them with every
    /// sample record
    #[arg(long)]
    pub no_full_sweep: bool,
}

// -----------------------------------------------------------------------------
// input format
// -----------------------------------------------------------------------------
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum InputFormat {
    /// CSV with plaintext identifiers
    Plaintext,

    /// CSV as written by the `hash` command
    Hashed,
}

impl From<InputFormat> for RecordFormat {
    fn from(f: InputFormat) -> Self {
        match f {
            InputFormat::Plaintext => RecordFormat::Plaintext,
            InputFormat::Hashed => RecordFormat::Hashed,
        }
    }
}

impl std::fmt::Display for InputFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", RecordFormat::from(*self))
    }
}

// -----------------------------------------------------------------------------
// `hash` command
// -----------------------------------------------------------------------------
#[derive(Args, Debug)]
pub struct HashArgs {
    /// Plaintext record file to hash
    #[arg(value_name = "INPUT")]
    pub input: PathBuf,

    /// Write hashed records to the specified path
    ///
    /// If this argument is not provided, stdout will be used.
    #[arg(long, short, value_name = "PATH")]
    pub output: Option<PathBuf>,

    #[command(flatten)]
    pub key_args: KeyArgs,

    #[command(flatten)]
    pub frequency_args: FrequencyArgs,
}

// -----------------------------------------------------------------------------
// `compare` command
// -----------------------------------------------------------------------------
#[derive(Args, Debug)]
pub struct CompareArgs {
    /// Record file of probands: the people to find
    #[arg(long, value_name = "PATH")]
    pub probands: PathBuf,

    /// Format of the proband file
    #[arg(long, value_name = "FORMAT", default_value_t = InputFormat::Plaintext)]
    pub probands_format: InputFormat,

    /// Record file of the sample: the people to search among
    #[arg(long, value_name = "PATH")]
    pub sample: PathBuf,

    /// Format of the sample file
    #[arg(long, value_name = "FORMAT", default_value_t = InputFormat::Plaintext)]
    pub sample_format: InputFormat,

    /// Include diagnostic information with each decision
    ///
    /// This adds the reason for each decision, the number of candidates compared, and the
    /// evidence from each field against the best candidate.
    #[arg(long)]
    pub extra_info: bool,

    #[command(flatten)]
    pub key_args: KeyArgs,

    #[command(flatten)]
    pub match_args: MatchArgs,

    #[command(flatten)]
    pub frequency_args: FrequencyArgs,

    #[command(flatten)]
    pub output_args: DecisionOutputArgs,
}

// -----------------------------------------------------------------------------
// `lookup` command
// -----------------------------------------------------------------------------
#[derive(Args, Debug)]
pub struct LookupArgs {
    /// Look up the specified forename
    #[arg(long, value_name = "NAME")]
    pub forename: Vec<String>,

    /// Look up the specified surname
    #[arg(long, value_name = "NAME")]
    pub surname: Vec<String>,

    /// Look up the specified date of birth (YYYY-MM-DD, YYYY-MM, or YYYY)
    #[arg(long, value_name = "DATE")]
    pub dob: Vec<String>,

    /// Look up the specified sex (M, F, or X)
    #[arg(long, value_name = "SEX")]
    pub sex: Vec<String>,

    /// Look up the specified postcode or postcode district
    #[arg(long, value_name = "POSTCODE")]
    pub postcode: Vec<String>,

    #[command(flatten)]
    pub frequency_args: FrequencyArgs,

    #[command(flatten)]
    pub output_args: ReportOutputArgs,
}

impl LookupArgs {
    pub fn is_empty(&self) -> bool {
        self.forename.is_empty()
            && self.surname.is_empty()
            && self.dob.is_empty()
            && self.sex.is_empty()
            && self.postcode.is_empty()
    }
}

// -----------------------------------------------------------------------------
// `selftest` command
// -----------------------------------------------------------------------------
#[derive(Args, Debug)]
pub struct SelfTestArgs {
    /// Number of synthetic people to test with
    #[arg(long, value_name = "N", default_value_t = 2000)]
    pub population: usize,

    /// Seed for the synthetic population
    #[arg(long, value_name = "N", default_value_t = 1)]
    pub seed: u64,

    #[command(flatten)]
    pub key_args: KeyArgs,

    #[command(flatten)]
    pub match_args: MatchArgs,

    #[command(flatten)]
    pub frequency_args: FrequencyArgs,
}

// -----------------------------------------------------------------------------
// `speedtest` command
// -----------------------------------------------------------------------------
#[derive(Args, Debug)]
pub struct SpeedTestArgs {
    /// Number of pairwise comparisons to time
    #[arg(long, value_name = "N", default_value_t = 1_000_000)]
    pub comparisons: u64,

    /// Seed for the synthetic population
    #[arg(long, value_name = "N", default_value_t = 1)]
    pub seed: u64,

    #[command(flatten)]
    pub key_args: KeyArgs,

    #[command(flatten)]
    pub match_args: MatchArgs,

    #[command(flatten)]
    pub frequency_args: FrequencyArgs,
}

// -----------------------------------------------------------------------------
// `validate` command
// -----------------------------------------------------------------------------
#[derive(Args, Debug)]
pub struct ValidateArgs {
    /// Number of people in the synthetic sample
    #[arg(long, value_name = "N", default_value_t = 5000)]
    pub sample_size: usize,

    /// Number of probands drawn from the sample
    #[arg(long, value_name = "N", default_value_t = 1000)]
    pub in_sample: usize,

    /// Number of probands absent from the sample
    #[arg(long, value_name = "N", default_value_t = 1000)]
    pub out_of_sample: usize,

    /// Probability that each field of a proband is missing
    #[arg(long, value_name = "P", default_value_t = 0.05)]
    pub p_delete: f64,

    /// Probability that each name of a proband has a typo
    #[arg(long, value_name = "P", default_value_t = 0.1)]
    pub p_typo: f64,

    /// Probability that a proband's day and month of birth are swapped
    #[arg(long, value_name = "P", default_value_t = 0.02)]
    pub p_dob_transpose: f64,

    /// Probability that a proband has moved within their postcode district
    #[arg(long, value_name = "P", default_value_t = 0.1)]
    pub p_postcode_move: f64,

    /// Compare keyed digests instead of plaintext
    ///
    /// This requires a key.
    #[arg(long)]
    pub hashed: bool,

    /// Seed for the synthetic population
    #[arg(long, value_name = "N", default_value_t = 1)]
    pub seed: u64,

    /// Values of the minimum log odds for a match to evaluate, separated by commas
    ///
    /// The default is -5 to 30 in steps of 2.5. The runner-up margin stays as configured.
    #[arg(
        long,
        value_name = "LOG_ODDS",
        value_delimiter = ',',
        allow_negative_numbers = true
    )]
    pub thresholds: Vec<f64>,

    #[command(flatten)]
    pub key_args: KeyArgs,

    #[command(flatten)]
    pub match_args: MatchArgs,

    #[command(flatten)]
    pub frequency_args: FrequencyArgs,

    #[command(flatten)]
    pub output_args: ReportOutputArgs,
}

// -----------------------------------------------------------------------------
// output options
// -----------------------------------------------------------------------------
/// Get a writer for the specified output destination, or stdout if there is none.
fn get_writer(output: &Option<PathBuf>) -> std::io::Result<Box<dyn std::io::Write>> {
    use std::fs::File;
    use std::io::BufWriter;

    match output {
        None => Ok(Box::new(BufWriter::new(std::io::stdout()))),
        Some(p) => {
            let f = File::create(p)?;
            Ok(Box::new(BufWriter::new(f)))
        }
    }
}

#[derive(Args, Debug)]
#[command(next_help_heading = "Output Options")]
pub struct DecisionOutputArgs {
    /// Write decisions to the specified path
    ///
    /// If this argument is not provided, stdout will be used.
    #[arg(long, short, value_name = "PATH")]
    pub output: Option<PathBuf>,

    /// Write decisions in the specified format
    #[arg(long, short, value_name = "FORMAT", default_value_t = DecisionFormat::Csv)]
    pub format: DecisionFormat,
}

impl DecisionOutputArgs {
    pub fn get_writer(&self) -> std::io::Result<Box<dyn std::io::Write>> {
        get_writer(&self.output)
    }
}

#[derive(Args, Debug)]
#[command(next_help_heading = "Output Options")]
pub struct ReportOutputArgs {
    /// Write output to the specified path
    ///
    /// If this argument is not provided, stdout will be used.
    #[arg(long, short, value_name = "PATH")]
    pub output: Option<PathBuf>,

    /// Write output in the specified format
    #[arg(long, short, value_name = "FORMAT", default_value_t = ReportFormat::Human)]
    pub format: ReportFormat,
}

impl ReportOutputArgs {
    pub fn get_writer(&self) -> std::io::Result<Box<dyn std::io::Write>> {
        get_writer(&self.output)
    }
}

// -----------------------------------------------------------------------------
// output formats
// -----------------------------------------------------------------------------
/// How match decisions are written
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, ValueEnum)]
pub enum DecisionFormat {
    /// CSV, one row per proband
    Csv,

    /// A JSON array, one object per proband
    Json,

    /// JSON Lines format
    ///
    /// This is a sequence of JSON objects, one per line.
    Jsonl,
}

impl std::fmt::Display for DecisionFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            DecisionFormat::Csv => "csv",
            DecisionFormat::Json => "json",
            DecisionFormat::Jsonl => "jsonl",
        };
        write!(f, "{s}")
    }
}

/// How reports are written
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, ValueEnum)]
pub enum ReportFormat {
    /// A text-based format designed for humans
    Human,

    /// Pretty-printed JSON format
    Json,

    /// JSON Lines format
    ///
    /// This is a sequence of JSON objects, one per line.
    Jsonl,
}

impl std::fmt::Display for ReportFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ReportFormat::Human => "human",
            ReportFormat::Json => "json",
            ReportFormat::Jsonl => "jsonl",
        };
        write!(f, "{s}")
    }
}
