use clap::Parser;

use crate::exec::DEFAULT_MAX_FAILS;

/// Components that are not built by try builds.
const TRY_BUILD_EXCLUDED: &[&str] = &[
    "rust-docs",
    "rustc-docs",
    "rust-docs-json",
    "rust-analyzer",
    "rustc-src",
    "clippy",
    "miri",
    "rustfmt",
];

/// Performs a multi-stage PGO/BOLT optimized build of the Rust distribution.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Args {
    /// Host target triple that the optimized compiler is built for.
    #[arg(long, env = "PGO_HOST")]
    host: String,

    /// Marks this run as a try build. Any value except `0` or an empty string enables it.
    #[arg(long, env = "DIST_TRY_BUILD", value_name = "FLAG")]
    try_build: Option<String>,

    /// How many times downloads are attempted before giving up.
    #[arg(long, default_value_t = DEFAULT_MAX_FAILS)]
    max_download_attempts: u32,

    /// Command that performs the final dist build, e.g. `python3 x.py dist ...`.
    #[arg(trailing_var_arg = true, allow_hyphen_values = true, required = true)]
    dist_command: Vec<String>,
}

/// Settings of a single run, resolved once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub try_build: bool,
    pub max_download_attempts: u32,
    pub dist_command: Vec<String>,
}

impl Config {
    pub fn from_args(args: Args) -> anyhow::Result<Self> {
        if args.max_download_attempts == 0 {
            anyhow::bail!("`--max-download-attempts` has to be at least 1");
        }
        Ok(Self {
            host: args.host,
            try_build: args.try_build.as_deref().is_some_and(is_truthy),
            max_download_attempts: args.max_download_attempts,
            dist_command: args.dist_command,
        })
    }

    /// Arguments of the final dist build before any profile is attached to them.
    pub fn initial_dist_args(&self) -> Vec<String> {
        let mut args = self.dist_command.clone();
        if self.try_build {
            for target in TRY_BUILD_EXCLUDED {
                args.extend(["--exclude".to_string(), target.to_string()]);
            }
        }
        args
    }
}

fn is_truthy(value: &str) -> bool {
    let value = value.trim();
    !value.is_empty() && value != "0"
}
