use anyhow::Context;
use camino::{Utf8Path, Utf8PathBuf};
use humansize::{format_size, BINARY};

use crate::benchmark::BenchmarkRunner;
use crate::environment::Environment;
use crate::exec::{cmd, Executor};
use crate::utils::io::{
    count_files, delete_directory, delete_file, get_files_with_prefix, get_path_prefix_size,
};
use crate::utils::{log_path_size, with_log_group};

/// Merged profile of an instrumented rustc.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RustcPGOProfile(pub Utf8PathBuf);

/// Merged profile of a PGO instrumented LLVM.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LlvmPGOProfile(pub Utf8PathBuf);

/// Merged profile of a BOLT instrumented LLVM.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LlvmBoltProfile(pub Utf8PathBuf);

impl RustcPGOProfile {
    pub fn use_args(&self) -> [String; 2] {
        ["--rust-profile-use".to_string(), self.0.to_string()]
    }
}

impl LlvmPGOProfile {
    pub fn use_args(&self) -> [String; 2] {
        ["--llvm-profile-use".to_string(), self.0.to_string()]
    }
}

impl LlvmBoltProfile {
    pub fn use_args(&self) -> [String; 2] {
        ["--llvm-bolt-profile-use".to_string(), self.0.to_string()]
    }
}

pub fn gather_rustc_profiles(
    env: &dyn Environment,
    runner: &dyn BenchmarkRunner,
    executor: &dyn Executor,
) -> anyhow::Result<RustcPGOProfile> {
    log::info!("Running benchmarks with PGO instrumented rustc");
    with_log_group("Running benchmarks", || runner.run_rustc(env))?;

    let profile_root = env.rustc_profile_dir_root();
    let merged_file = env.rustc_profile_merged_file();
    log::info!("Merging Rustc PGO profiles to {merged_file}");
    // The instrumented rustc was built against the in-tree LLVM, so its profdata has to match.
    let llvm_profdata = env.build_artifacts().join("llvm").join("bin").join("llvm-profdata");
    merge_llvm_profiles(executor, &llvm_profdata, &merged_file, &profile_root)?;

    log::info!("Rustc PGO statistics");
    log_directory_statistics(&merged_file, &profile_root)?;

    // We don't need the individual .profraw files now that they have been merged
    // into a final .profdata
    delete_directory(&profile_root)?;

    Ok(RustcPGOProfile(merged_file))
}

pub fn gather_llvm_profiles(
    env: &dyn Environment,
    runner: &dyn BenchmarkRunner,
    executor: &dyn Executor,
) -> anyhow::Result<LlvmPGOProfile> {
    log::info!("Running benchmarks with PGO instrumented LLVM");
    with_log_group("Running benchmarks", || runner.run_llvm(env))?;

    let profile_root = env.llvm_profile_dir_root();
    let merged_file = env.llvm_profile_merged_file();
    log::info!("Merging LLVM PGO profiles to {merged_file}");
    let llvm_profdata = env.downloaded_llvm_dir().join("bin").join("llvm-profdata");
    merge_llvm_profiles(executor, &llvm_profdata, &merged_file, &profile_root)?;

    log::info!("LLVM PGO statistics");
    log_directory_statistics(&merged_file, &profile_root)?;

    delete_directory(&profile_root)?;

    Ok(LlvmPGOProfile(merged_file))
}

pub fn gather_llvm_bolt_profiles(
    env: &dyn Environment,
    runner: &dyn BenchmarkRunner,
    executor: &dyn Executor,
) -> anyhow::Result<LlvmBoltProfile> {
    log::info!("Running benchmarks with BOLT instrumented LLVM");
    with_log_group("Running benchmarks", || runner.run_bolt(env))?;

    let merged_file = env.llvm_bolt_profile_merged_file();
    let profile_prefix = env.bolt_profile_prefix();
    log::info!("Merging LLVM BOLT profiles to {merged_file}");

    let profiles = get_files_with_prefix(&profile_prefix)?;
    cmd(&["merge-fdata"])
        .args(&profiles)
        .redirect_output(merged_file.clone())
        .run(executor)
        .context("Cannot merge BOLT profiles")?;

    log::info!("LLVM BOLT statistics");
    log_path_size(&merged_file)?;
    log::info!(
        "{profile_prefix}: {}",
        format_size(get_path_prefix_size(&profile_prefix)?, BINARY)
    );
    log::info!("Profile file count: {}", profiles.len());

    for profile in &profiles {
        delete_file(profile)?;
    }

    Ok(LlvmBoltProfile(merged_file))
}

fn merge_llvm_profiles(
    executor: &dyn Executor,
    llvm_profdata: &Utf8Path,
    merged_file: &Utf8Path,
    profile_root: &Utf8Path,
) -> anyhow::Result<()> {
    cmd(&[llvm_profdata.as_str(), "merge", "-o", merged_file.as_str(), profile_root.as_str()])
        .run(executor)
        .context("Cannot merge LLVM profiles")
}

fn log_directory_statistics(merged_file: &Utf8Path, profile_root: &Utf8Path) -> anyhow::Result<()> {
    log_path_size(merged_file)?;
    log_path_size(profile_root)?;
    log::info!("Profile file count: {}", count_files(profile_root)?);
    Ok(())
}
