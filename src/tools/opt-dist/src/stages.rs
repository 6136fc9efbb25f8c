//! The sequence of builds that produces the optimized distribution.
//!
//! Every profiling stage builds an instrumented toolchain, gathers and merges profiles
//! with it and attaches the merged profile to the arguments of the final dist build.

use crate::benchmark::{prepare_rustc_perf, BenchmarkRunner};
use crate::config::Config;
use crate::environment::Environment;
use crate::exec::{avoid_rustc_rebuild_args, Bootstrap, Executor};
use crate::tests::run_tests;
use crate::timer::Timer;
use crate::training::{
    gather_llvm_bolt_profiles, gather_llvm_profiles, gather_rustc_profiles, LlvmPGOProfile,
    RustcPGOProfile,
};
use crate::utils::io::reset_directory;
use crate::utils::{clear_llvm_files, print_free_disk_space, with_log_group};

#[cfg(test)]
mod tests;

/// Everything the stages need, resolved once in `main`.
pub struct StagedBuild<'a> {
    pub config: &'a Config,
    pub env: &'a dyn Environment,
    pub executor: &'a dyn Executor,
    pub runner: &'a dyn BenchmarkRunner,
}

impl StagedBuild<'_> {
    pub fn execute(&self, timer: &mut Timer) -> anyhow::Result<()> {
        reset_directory(&self.env.opt_artifacts())?;

        with_log_group("Building rustc-perf", || {
            timer.section("Build rustc-perf", |_| {
                prepare_rustc_perf(self.env, self.executor, self.config.max_download_attempts)
            })
        })?;

        let dist_args = self.config.initial_dist_args();
        let (dist_args, rustc_profile) = self.rustc_pgo(timer, dist_args)?;
        let (dist_args, llvm_profile) = self.llvm_pgo(timer, dist_args, &rustc_profile)?;
        let dist_args = if self.env.supports_bolt() {
            self.llvm_bolt(timer, dist_args, &rustc_profile, &llvm_profile)?
        } else {
            log::info!("BOLT is not supported on this platform, skipping LLVM BOLT stage");
            dist_args
        };

        self.dist(timer, &dist_args)?;

        if self.config.try_build {
            log::info!("Skipping tests of the dist artifacts because this is a try build");
        } else {
            with_log_group("Running tests", || {
                timer.section("Stage 5 (test)", |_| run_tests(self.env, self.executor))
            })?;
        }
        Ok(())
    }

    /// Stage 1: Build PGO instrumented rustc
    ///
    /// We use a normal build of LLVM, because gathering PGO profiles for LLVM and `rustc` at the
    /// same time can cause issues, because the host and in-tree LLVM versions can diverge.
    fn rustc_pgo(
        &self,
        timer: &mut Timer,
        mut dist_args: Vec<String>,
    ) -> anyhow::Result<(Vec<String>, RustcPGOProfile)> {
        let profile = timer.section("Stage 1 (Rustc PGO)", |stage| {
            stage.section("Build PGO instrumented rustc and LLVM", |section| {
                with_log_group("Building PGO instrumented rustc", || {
                    Bootstrap::build(self.env)
                        .rustc_pgo_instrument(&self.env.rustc_profile_dir_root())
                        .run(self.executor, section)
                })
            })?;

            let profile = stage.section("Gather profiles", |_| {
                gather_rustc_profiles(self.env, self.runner, self.executor)
            })?;
            print_free_disk_space()?;
            Ok(profile)
        })?;

        clear_llvm_files(self.env)?;
        dist_args.extend(profile.use_args());
        Ok((dist_args, profile))
    }

    /// Stage 2: Gather LLVM PGO profiles
    fn llvm_pgo(
        &self,
        timer: &mut Timer,
        mut dist_args: Vec<String>,
        rustc_profile: &RustcPGOProfile,
    ) -> anyhow::Result<(Vec<String>, LlvmPGOProfile)> {
        let profile = timer.section("Stage 2 (LLVM PGO)", |stage| {
            // Build PGO instrumented LLVM using the previously gathered rustc profile
            stage.section("Build PGO optimized rustc and PGO instrumented LLVM", |section| {
                with_log_group("Building PGO instrumented LLVM", || {
                    Bootstrap::build(self.env)
                        .rustc_pgo_optimize(rustc_profile)
                        .llvm_pgo_instrument(&self.env.llvm_profile_dir_root())
                        .run(self.executor, section)
                })
            })?;

            let profile = stage.section("Gather profiles", |_| {
                gather_llvm_profiles(self.env, self.runner, self.executor)
            })?;
            print_free_disk_space()?;
            Ok(profile)
        })?;

        // Bootstrap cannot rebuild LLVM with different PGO flags by itself.
        clear_llvm_files(self.env)?;
        dist_args.extend(profile.use_args());
        Ok((dist_args, profile))
    }

    /// Stage 3: Build BOLT instrumented LLVM
    ///
    /// We build a PGO optimized LLVM in this step, then instrument it with BOLT and gather BOLT
    /// profiles. Note that we don't remove LLVM artifacts after this step, so that they are
    /// reused in the final dist build, and the already optimized stage 0 and 1 compilers are
    /// kept as well.
    fn llvm_bolt(
        &self,
        timer: &mut Timer,
        mut dist_args: Vec<String>,
        rustc_profile: &RustcPGOProfile,
        llvm_profile: &LlvmPGOProfile,
    ) -> anyhow::Result<Vec<String>> {
        let profile = timer.section("Stage 3 (LLVM BOLT)", |stage| {
            stage.section("Build PGO optimized rustc and BOLT instrumented LLVM", |section| {
                with_log_group("Building BOLT instrumented LLVM", || {
                    Bootstrap::build(self.env)
                        .rustc_pgo_optimize(rustc_profile)
                        .llvm_pgo_optimize(llvm_profile)
                        .llvm_bolt_instrument()
                        .run(self.executor, section)
                })
            })?;

            let profile = stage.section("Gather profiles", |_| {
                gather_llvm_bolt_profiles(self.env, self.runner, self.executor)
            })?;
            print_free_disk_space()?;
            Ok(profile)
        })?;

        dist_args.extend(profile.use_args());
        dist_args.extend(avoid_rustc_rebuild_args());
        Ok(dist_args)
    }

    /// Stage 4: Build the final dist artifacts with every gathered profile.
    fn dist(&self, timer: &mut Timer, dist_args: &[String]) -> anyhow::Result<()> {
        with_log_group("Building final dist", || {
            timer.section("Stage 4 (final build)", |stage| {
                Bootstrap::dist(self.env, dist_args).run(self.executor, stage)
            })
        })
    }
}
