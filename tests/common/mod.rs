//! Integration Test Utilities and Common Code

#![allow(dead_code)]

use indoc::indoc;

pub use assert_cmd::prelude::*;
pub use assert_fs::prelude::*;
pub use assert_fs::{fixture::ChildPath, TempDir};
pub use predicates::prelude::*;
pub use predicates::str::RegexPredicate;
pub use std::path::Path;
pub use std::process::Command;

/// The key used to hash test records.
pub const TEST_KEY: &str = "correct horse battery staple";

/// Build a `Command` for the `fuzzyid` crate binary with variadic command-line arguments.
///
/// The arguments can be anything that is allowed by `Command::arg`.
#[macro_export]
macro_rules! fuzzyid_cmd {
    ( $( $arg:expr ),* ) => {
        {
            let mut cmd = fuzzyid_command();
            $(
                cmd.arg($arg);
            )*
            cmd
        }
    }
}

/// Build an `assert_cmd::assert::Assert` by calling `fuzzyid_cmd!(args).assert().success()`.
#[macro_export]
macro_rules! fuzzyid_success {
    ( $( $arg:expr ),* ) => { fuzzyid_cmd!($( $arg ),*).assert().success() }
}

/// Build an `assert_cmd::assert::Assert` by calling `fuzzyid_cmd!(args).assert().failure()`.
#[macro_export]
macro_rules! fuzzyid_failure {
    ( $( $arg:expr ),* ) => { fuzzyid_cmd!($( $arg ),*).assert().failure() }
}

// make macros easily visible to other modules
pub use {fuzzyid_cmd, fuzzyid_failure, fuzzyid_success};

/// Build a `Command` for the `fuzzyid` crate binary.
///
/// The environment is scrubbed of anything that would change the program's behavior.
pub fn fuzzyid_command() -> Command {
    let mut cmd = Command::cargo_bin("fuzzyid").expect("fuzzyid should be executable");
    cmd.env_remove("FUZZYID_KEY")
        .env_remove("FUZZYID_LOG")
        .env("NO_COLOR", "1");
    cmd
}

/// Create a `RegexPredicate` from the given pattern.
pub fn is_match(pat: &str) -> RegexPredicate {
    predicates::str::is_match(pat).expect("pattern should compile")
}

/// A type to represent a mock matching environment for testing fuzzyid.
pub struct MatchEnv {
    pub root: TempDir,
}

impl MatchEnv {
    /// Create a new mock matching environment.
    pub fn new() -> Self {
        let root = TempDir::new().expect("should be able to create tempdir");
        Self { root }
    }

    /// Create a file within this mock environment with the given name and contents.
    pub fn file(&self, name: &str, contents: &str) -> ChildPath {
        let input = self.root.child(name);
        input
            .write_str(contents)
            .expect("should be able to write input file contents");
        assert!(input.is_file());
        input
    }

    /// Create a plaintext sample file of a few distinct people.
    pub fn sample_file(&self) -> ChildPath {
        self.file(
            "sample.csv",
            indoc! {r#"
                local_id,forename,surname,dob,sex,postcode
                S1,John,Smith,1970-05-06,M,CB1 2AB
                S2,Mary,Jones,1985-11-30,F,OX1 3EF
                S3,Sarah,Brown,1992-02-14,F,M1 2CD
            "#},
        )
    }

    /// Create a plaintext proband file: a typo of S1, an exact copy of S2, and a stranger.
    pub fn probands_file(&self) -> ChildPath {
        self.file(
            "probands.csv",
            indoc! {r#"
                local_id,forename,surname,dob,sex,postcode
                P1,Jhon,Smith,1970-05-06,M,CB1 2AB
                P2,Mary,Jones,1985-11-30,F,OX1 3EF
                P3,David,Williams,1961-07-04,M,CB4 1XY
            "#},
        )
    }

    /// Create a name for a child entry within this mock environment.
    ///
    /// The filesystem is not touched by this function; this merely produces a `ChildPath`.
    pub fn child(&self, name: &str) -> ChildPath {
        self.root.child(name)
    }
}
