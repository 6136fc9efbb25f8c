//! Compiler workloads used to gather profiles, driven by the `rustc-perf` collector.

use anyhow::Context;
use camino::{Utf8Path, Utf8PathBuf};

use crate::environment::{Environment, RustcPerfSource};
use crate::exec::{cmd, retry_action, CmdBuilder, Executor};
use crate::utils::io::{copy_directory, delete_file, move_directory, unpack_zip};

const LLVM_PGO_CRATES: &[&str] = &[
    "syn-1.0.89",
    "cargo-0.60.0",
    "serde-1.0.136",
    "ripgrep-13.0.0",
    "regex-1.5.5",
    "clap-3.1.6",
    "hyper-0.14.18",
];

const RUSTC_PGO_CRATES: &[&str] = &[
    "externs",
    "ctfe-stress-5",
    "cargo-0.60.0",
    "token-stream-stress",
    "match-stress",
    "tuple-stress",
    "diesel-1.4.8",
    "bitmaps-3.1.0",
];

const LLVM_BOLT_CRATES: &[&str] = LLVM_PGO_CRATES;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Profile {
    Check,
    Debug,
    Opt,
}

impl Profile {
    fn as_str(self) -> &'static str {
        match self {
            Profile::Check => "Check",
            Profile::Debug => "Debug",
            Profile::Opt => "Opt",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Scenario {
    All,
    Full,
}

impl Scenario {
    fn as_str(self) -> &'static str {
        match self {
            Scenario::All => "All",
            Scenario::Full => "Full",
        }
    }
}

/// A set of benchmarks executed by the collector.
#[derive(Debug)]
pub struct Workload {
    pub profiles: &'static [Profile],
    pub scenarios: &'static [Scenario],
    pub crates: &'static [&'static str],
}

/// Here we're profiling the `rustc` frontend, so we also include `Check`.
/// The benchmark set includes various stress tests that put the frontend under pressure.
pub const RUSTC_WORKLOAD: Workload = Workload {
    profiles: &[Profile::Check, Profile::Debug, Profile::Opt],
    scenarios: &[Scenario::All],
    crates: RUSTC_PGO_CRATES,
};

pub const LLVM_WORKLOAD: Workload = Workload {
    profiles: &[Profile::Debug, Profile::Opt],
    scenarios: &[Scenario::Full],
    crates: LLVM_PGO_CRATES,
};

pub const BOLT_WORKLOAD: Workload = Workload {
    profiles: &[Profile::Check, Profile::Debug, Profile::Opt],
    scenarios: &[Scenario::Full],
    crates: LLVM_BOLT_CRATES,
};

/// Runs compiler workloads with an instrumented toolchain so that it writes profiles.
pub trait BenchmarkRunner {
    /// Executes `workload` with the stage 2 compiler of `env`.
    ///
    /// `extra_env` is passed to every compiler invocation.
    fn run_workload(
        &self,
        env: &dyn Environment,
        workload: &Workload,
        extra_env: &[(&str, String)],
    ) -> anyhow::Result<()>;

    fn run_rustc(&self, env: &dyn Environment) -> anyhow::Result<()> {
        let template = env.rustc_profile_template_path();
        self.run_workload(env, &RUSTC_WORKLOAD, &[("LLVM_PROFILE_FILE", template.to_string())])
    }

    fn run_llvm(&self, env: &dyn Environment) -> anyhow::Result<()> {
        self.run_workload(env, &LLVM_WORKLOAD, &[])
    }

    fn run_bolt(&self, env: &dyn Environment) -> anyhow::Result<()> {
        self.run_workload(env, &BOLT_WORKLOAD, &[])
    }
}

/// Benchmarks with the `profile_local eprintln` mode of the `rustc-perf` collector.
///
/// This doesn't actually benchmark anything, it just makes sure that rustc is executed
/// many times on the selected crates.
pub struct RustcPerf<'a> {
    executor: &'a dyn Executor,
}

impl<'a> RustcPerf<'a> {
    pub fn new(executor: &'a dyn Executor) -> Self {
        Self { executor }
    }
}

impl BenchmarkRunner for RustcPerf<'_> {
    fn run_workload(
        &self,
        env: &dyn Environment,
        workload: &Workload,
        extra_env: &[(&str, String)],
    ) -> anyhow::Result<()> {
        // Compile libcore, both in opt-level=0 and opt-level=3
        with_env(compile_libcore(env, &[]), extra_env).run(self.executor)?;
        with_env(compile_libcore(env, &["-Copt-level=3"]), extra_env).run(self.executor)?;

        with_env(collector_cmd(env, workload), extra_env)
            .run(self.executor)
            .context("Cannot run rustc-perf benchmarks")
    }
}

fn with_env(cmd: CmdBuilder, extra_env: &[(&str, String)]) -> CmdBuilder {
    extra_env.iter().fold(cmd, |cmd, (key, value)| cmd.env(key, value))
}

fn compile_libcore(env: &dyn Environment, flags: &[&str]) -> CmdBuilder {
    let libcore = env.checkout_path().join("library").join("core").join("src").join("lib.rs");
    cmd(&[env.rustc_stage_2().as_str(), "--edition", "2021", "--crate-type", "lib"])
        .args(flags)
        .arg(libcore)
        .arg("--out-dir")
        .arg(env.opt_artifacts())
        .env("RUSTC_BOOTSTRAP", "1")
        .workdir(&env.build_root())
}

fn collector_cmd(env: &dyn Environment, workload: &Workload) -> CmdBuilder {
    let profiles = workload.profiles.iter().map(|p| p.as_str()).collect::<Vec<_>>().join(",");
    let scenarios = workload.scenarios.iter().map(|s| s.as_str()).collect::<Vec<_>>().join(",");
    let crates = workload.crates.join(",");

    let rustc = env.rustc_stage_2();
    let cargo = env.cargo_stage_0();
    cmd(&[
        cargo.as_str(),
        "run",
        "-p",
        "collector",
        "--bin",
        "collector",
        "--",
        "profile_local",
        "eprintln",
        rustc.as_str(),
        "--id",
        "Test",
        "--cargo",
        cargo.as_str(),
        "--profiles",
        &profiles,
        "--scenarios",
        &scenarios,
        "--include",
        &crates,
    ])
    .env("RUST_LOG", "collector=debug")
    .env("RUSTC", env.rustc_stage_0())
    .env("RUSTC_BOOTSTRAP", "1")
    .workdir(&env.rustc_perf_dir())
}

/// Places a `rustc-perf` checkout into the artifact directory and builds its collector.
pub fn prepare_rustc_perf(
    env: &dyn Environment,
    executor: &dyn Executor,
    max_download_attempts: u32,
) -> anyhow::Result<()> {
    let perf_dir = env.rustc_perf_dir();
    match env.rustc_perf_source() {
        RustcPerfSource::Local(path) => copy_directory(&path, &perf_dir)?,
        RustcPerfSource::Download { commit } => {
            retry_action(
                || download_rustc_perf(env, commit, &perf_dir),
                "Download rustc-perf",
                max_download_attempts,
            )?;
        }
    }

    cmd(&[env.cargo_stage_0().as_str(), "build", "-p", "collector"])
        .env("RUSTC", env.rustc_stage_0())
        .env("RUSTC_BOOTSTRAP", "1")
        .workdir(&perf_dir)
        .run(executor)
        .context("Cannot build the rustc-perf collector")
}

fn download_rustc_perf(
    env: &dyn Environment,
    commit: &str,
    perf_dir: &Utf8Path,
) -> anyhow::Result<()> {
    let url = format!("https://github.com/rust-lang/rustc-perf/archive/{commit}.zip");
    let zip_path = env.opt_artifacts().join("perf.zip");
    download_file(&url, &zip_path)?;

    unpack_zip(&zip_path, &env.opt_artifacts())?;
    let unpacked: Utf8PathBuf = env.opt_artifacts().join(format!("rustc-perf-{commit}"));
    move_directory(&unpacked, perf_dir)?;
    delete_file(&zip_path)?;
    Ok(())
}

fn download_file(url: &str, target: &Utf8Path) -> anyhow::Result<()> {
    log::info!("Downloading `{url}` into `{target}`");
    let response = reqwest::blocking::get(url)?.error_for_status()?;
    let bytes = response.bytes()?;
    std::fs::write(target.as_std_path(), &bytes)
        .with_context(|| format!("Cannot write {target}"))?;
    Ok(())
}
