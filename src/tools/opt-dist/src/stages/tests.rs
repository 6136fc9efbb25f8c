use std::time::Duration;

use camino::Utf8Path;

use super::*;
use crate::exec::CmdBuilder;
use crate::testing::{FakeRunner, RecordingExecutor, TestEnvironment, HOST};
use crate::utils::io::get_files_with_prefix;

fn config(env: &TestEnvironment, try_build: bool) -> Config {
    Config {
        host: HOST.to_string(),
        try_build,
        max_download_attempts: 1,
        dist_command: vec![
            "python3".to_string(),
            env.x_py().to_string(),
            "dist".to_string(),
            "--host".to_string(),
            HOST.to_string(),
        ],
    }
}

fn run(
    env: &TestEnvironment,
    config: &Config,
    executor: &RecordingExecutor,
    runner: &FakeRunner,
) -> (Timer, anyhow::Result<()>) {
    let build = StagedBuild { config, env, executor, runner };
    let mut timer = Timer::new();
    let result = build.execute(&mut timer);
    (timer, result)
}

fn dist_command(executor: &RecordingExecutor) -> CmdBuilder {
    executor
        .bootstrap_commands()
        .into_iter()
        .find(|cmd| cmd.get_args()[2] == "dist")
        .expect("dist was not executed")
}

fn value_after<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
    let index = args.iter().position(|arg| arg == flag)?;
    args.get(index + 1).map(|arg| arg.as_str())
}

fn assert_flag(args: &[String], flag: &str, expected: &Utf8Path) {
    assert_eq!(value_after(args, flag), Some(expected.as_str()), "{flag} in {args:?}");
}

fn stage_names(timer: &Timer) -> Vec<&str> {
    timer.children().iter().map(|(name, _)| name.as_str()).collect()
}

#[test]
fn full_pipeline_with_bolt() {
    let env = TestEnvironment::new(true);
    env.create_dist_archives();
    let config = config(&env, false);
    let executor = RecordingExecutor::new(&env);
    let runner = FakeRunner::default();

    let (timer, result) = run(&env, &config, &executor, &runner);
    result.unwrap();

    assert_eq!(*runner.runs.borrow(), ["rustc", "llvm", "bolt"]);
    assert_eq!(
        stage_names(&timer),
        [
            "Build rustc-perf",
            "Stage 1 (Rustc PGO)",
            "Stage 2 (LLVM PGO)",
            "Stage 3 (LLVM BOLT)",
            "Stage 4 (final build)",
            "Stage 5 (test)"
        ]
    );

    let builds = executor.bootstrap_commands();
    let kinds: Vec<_> = builds.iter().map(|cmd| cmd.get_args()[2].as_str()).collect();
    assert_eq!(kinds, ["build", "build", "build", "dist", "test"]);

    // Every build consumes the profiles gathered before it.
    let stage1 = builds[0].get_args();
    assert_flag(stage1, "--rust-profile-generate", &env.rustc_profile_dir_root());
    assert_eq!(value_after(stage1, "--rust-profile-use"), None);
    let stage2 = builds[1].get_args();
    assert_flag(stage2, "--rust-profile-use", &env.rustc_profile_merged_file());
    assert!(stage2.iter().any(|arg| arg == "--llvm-profile-generate"));
    let stage3 = builds[2].get_args();
    assert_flag(stage3, "--llvm-profile-use", &env.llvm_profile_merged_file());
    assert!(stage3.iter().any(|arg| arg == "--llvm-bolt-profile-generate"));

    let dist = dist_command(&executor);
    let expected: Vec<String> = config
        .dist_command
        .iter()
        .cloned()
        .chain(
            [
                "--rust-profile-use",
                env.rustc_profile_merged_file().as_str(),
                "--llvm-profile-use",
                env.llvm_profile_merged_file().as_str(),
                "--llvm-bolt-profile-use",
                env.llvm_bolt_profile_merged_file().as_str(),
                "--keep-stage",
                "0",
                "--keep-stage",
                "1",
            ]
            .map(String::from),
        )
        .collect();
    assert_eq!(dist.get_args(), expected.as_slice());

    // Merged profiles are kept, raw fragments are gone.
    assert!(env.rustc_profile_merged_file().is_file());
    assert!(env.llvm_profile_merged_file().is_file());
    assert!(env.llvm_bolt_profile_merged_file().is_file());
    assert!(!env.rustc_profile_dir_root().exists());
    assert!(!env.llvm_profile_dir_root().exists());
    let fragments = get_files_with_prefix(&env.bolt_profile_prefix()).unwrap();
    assert!(fragments.is_empty());
}

#[test]
fn bootstrap_metrics_are_recorded() {
    let env = TestEnvironment::new(false);
    env.create_dist_archives();
    let config = config(&env, false);
    let executor = RecordingExecutor::new(&env);
    let runner = FakeRunner::default();

    let (timer, result) = run(&env, &config, &executor, &runner);
    result.unwrap();

    let (_, stage1) = &timer.children()[1];
    let (name, build) = &stage1.children()[0];
    assert_eq!(name, "Build PGO instrumented rustc and LLVM");
    let recorded: Vec<_> =
        build.children().iter().map(|(name, t)| (name.as_str(), t.total_duration())).collect();
    assert_eq!(recorded, [("LLVM", Duration::from_secs(60)), ("Rustc", Duration::from_secs(30))]);

    let (name, dist) = &timer.children()[3];
    assert_eq!(name, "Stage 4 (final build)");
    assert_eq!(dist.children().len(), 2);
}

#[test]
fn no_bolt_stage_without_bolt_support() {
    let env = TestEnvironment::new(false);
    env.create_dist_archives();
    let config = config(&env, false);
    let executor = RecordingExecutor::new(&env);
    let runner = FakeRunner::default();

    let (timer, result) = run(&env, &config, &executor, &runner);
    result.unwrap();

    assert_eq!(*runner.runs.borrow(), ["rustc", "llvm"]);
    assert!(!stage_names(&timer).contains(&"Stage 3 (LLVM BOLT)"));
    assert!(executor.commands().iter().all(|cmd| cmd.get_args()[0] != "merge-fdata"));

    let dist = dist_command(&executor);
    let args = dist.get_args();
    assert!(!args.iter().any(|arg| arg == "--llvm-bolt-profile-use"));
    assert!(!args.iter().any(|arg| arg == "--keep-stage"));
    assert_flag(args, "--rust-profile-use", &env.rustc_profile_merged_file());
    assert_flag(args, "--llvm-profile-use", &env.llvm_profile_merged_file());
}

#[test]
fn try_build_excludes_components_and_skips_tests() {
    let env = TestEnvironment::new(true);
    // No dist archives: the test stage would fail if it ran.
    let config = config(&env, true);
    let executor = RecordingExecutor::new(&env);
    let runner = FakeRunner::default();

    let (timer, result) = run(&env, &config, &executor, &runner);
    result.unwrap();

    assert!(!stage_names(&timer).contains(&"Stage 5 (test)"));
    assert!(executor.bootstrap_commands().iter().all(|cmd| cmd.get_args()[2] != "test"));

    let dist = dist_command(&executor);
    let excluded: Vec<&str> = dist
        .get_args()
        .windows(2)
        .filter(|pair| pair[0] == "--exclude")
        .map(|pair| pair[1].as_str())
        .collect();
    assert_eq!(
        excluded,
        [
            "rust-docs",
            "rustc-docs",
            "rust-docs-json",
            "rust-analyzer",
            "rustc-src",
            "clippy",
            "miri",
            "rustfmt"
        ]
    );
}

#[test]
fn smoke_test_uses_extracted_toolchain() {
    let env = TestEnvironment::new(false);
    env.create_dist_archives();
    let config = config(&env, false);
    let executor = RecordingExecutor::new(&env);
    let runner = FakeRunner::default();

    let (_, result) = run(&env, &config, &executor, &runner);
    result.unwrap();

    let test = executor.bootstrap_commands().pop().unwrap();
    let args = test.get_args();
    assert_eq!(args[2], "test");
    assert_eq!(value_after(args, "--stage"), Some("0"));
    assert_eq!(value_after(args, "--skip"), Some("tests/ui/process/nofile-limit.rs"));
    assert!(args.iter().any(|arg| arg == "tests/ui"));

    let extracted = env.opt_artifacts().join("tests");
    let config_file = std::fs::read_to_string(extracted.join("config.toml")).unwrap();
    let rustc = extracted.join(format!("rustc-nightly-{HOST}/rustc/bin/rustc"));
    assert!(config_file.contains(&format!("rustc = \"{rustc}\"")));
    assert!(config_file.contains("channel = \"nightly\""));
    assert!(rustc.is_file());
    let libstd = extracted
        .join(format!("rustc-nightly-{HOST}/rustc"))
        .join(format!("lib/rustlib/{HOST}/lib/libstd.rlib"));
    assert!(libstd.is_file());
}

#[test]
fn failed_stage_stops_pipeline_and_keeps_timing() {
    let env = TestEnvironment::new(true);
    let config = config(&env, false);
    let executor = RecordingExecutor::failing_on(&env, "--llvm-profile-generate");
    let runner = FakeRunner::default();

    let (timer, result) = run(&env, &config, &executor, &runner);
    let error = result.unwrap_err();
    assert_eq!(error.to_string(), "Section `Stage 2 (LLVM PGO)` has failed");
    assert!(format!("{error:?}").contains("has failed with exit status: 1"));

    assert_eq!(*runner.runs.borrow(), ["rustc"]);
    assert_eq!(
        stage_names(&timer),
        ["Build rustc-perf", "Stage 1 (Rustc PGO)", "Stage 2 (LLVM PGO)"]
    );
    let (_, stage2) = &timer.children()[2];
    assert_eq!(stage2.children().len(), 1);
    assert!(executor.bootstrap_commands().iter().all(|cmd| cmd.get_args()[2] != "dist"));
}
