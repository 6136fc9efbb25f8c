//! Fakes of the external world shared by unit tests.

use std::cell::RefCell;
use std::fs::File;

use camino::{Utf8Path, Utf8PathBuf};

use crate::benchmark::{BenchmarkRunner, Workload};
use crate::environment::{Environment, RustcPerfSource};
use crate::exec::{CmdBuilder, Executor};

pub const HOST: &str = "x86_64-unknown-linux-gnu";
const RUSTLIB: &str = "lib/rustlib/x86_64-unknown-linux-gnu/lib";

/// An environment rooted in a temporary directory.
pub struct TestEnvironment {
    root: Utf8PathBuf,
    supports_bolt: bool,
    _dir: tempfile::TempDir,
}

impl TestEnvironment {
    pub fn new(supports_bolt: bool) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
        let env = Self { root, supports_bolt, _dir: dir };

        let perf_src = env.root.join("rustc-perf-src");
        std::fs::create_dir_all(perf_src.join("collector")).unwrap();
        std::fs::write(perf_src.join("collector").join("Cargo.toml"), "").unwrap();

        let channel = env.checkout_path().join("src").join("ci").join("channel");
        std::fs::create_dir_all(channel.parent().unwrap()).unwrap();
        std::fs::write(channel, "nightly\n").unwrap();
        env
    }

    /// Creates the `rustc`, `rust-std` and `cargo` dist archives that the smoke test unpacks.
    pub fn create_dist_archives(&self) {
        let dist = self.dist_dir();
        std::fs::create_dir_all(&dist).unwrap();
        let archives: [(&str, String); 3] = [
            ("rustc", format!("rustc-nightly-{HOST}/rustc/bin/rustc")),
            ("rust-std", format!("rust-std-nightly-{HOST}/rust-std-{HOST}/{RUSTLIB}/libstd.rlib")),
            ("cargo", format!("cargo-nightly-{HOST}/cargo/bin/cargo")),
        ];
        for (component, file) in archives {
            let archive_path = dist.join(format!("{component}-nightly-{HOST}.tar.xz"));
            let archive = File::create(archive_path).unwrap();
            let mut builder = tar::Builder::new(xz::write::XzEncoder::new(archive, 6));
            let data = component.as_bytes();
            let mut header = tar::Header::new_gnu();
            header.set_size(data.len() as u64);
            header.set_mode(0o755);
            builder.append_data(&mut header, file, data).unwrap();
            builder.into_inner().unwrap().finish().unwrap();
        }
    }
}

impl Environment for TestEnvironment {
    fn host_triple(&self) -> &str {
        HOST
    }

    fn checkout_path(&self) -> Utf8PathBuf {
        self.root.join("checkout")
    }

    fn downloaded_llvm_dir(&self) -> Utf8PathBuf {
        self.root.join("rustroot")
    }

    fn build_root(&self) -> Utf8PathBuf {
        self.checkout_path().join("obj")
    }

    fn opt_artifacts(&self) -> Utf8PathBuf {
        self.root.join("opt-artifacts")
    }

    fn python_binary(&self) -> &'static str {
        "python3"
    }

    fn executable_extension(&self) -> &'static str {
        ""
    }

    fn dylib_extension(&self) -> &'static str {
        ".so"
    }

    fn supports_bolt(&self) -> bool {
        self.supports_bolt
    }

    fn skipped_tests(&self) -> &'static [&'static str] {
        &["tests/ui/process/nofile-limit.rs"]
    }

    fn rustc_perf_source(&self) -> RustcPerfSource {
        RustcPerfSource::Local(self.root.join("rustc-perf-src"))
    }

    fn bolt_profile_prefix(&self) -> Utf8PathBuf {
        self.root.join("bolt").join("prof.fdata")
    }
}

/// Records commands instead of running them, emulating the files they would produce.
pub struct RecordingExecutor {
    metrics_path: Utf8PathBuf,
    pub commands: RefCell<Vec<CmdBuilder>>,
    fail_on: Option<&'static str>,
}

impl RecordingExecutor {
    pub fn new(env: &dyn Environment) -> Self {
        Self { metrics_path: env.metrics_path(), commands: RefCell::new(vec![]), fail_on: None }
    }

    /// Fails every command containing the argument `arg`.
    pub fn failing_on(env: &dyn Environment, arg: &'static str) -> Self {
        Self { fail_on: Some(arg), ..Self::new(env) }
    }

    pub fn commands(&self) -> Vec<CmdBuilder> {
        self.commands.borrow().clone()
    }

    /// Commands that invoked bootstrap, i.e. `<python> <checkout>/x.py ...`.
    pub fn bootstrap_commands(&self) -> Vec<CmdBuilder> {
        self.commands().into_iter().filter(is_bootstrap).collect()
    }
}

fn is_bootstrap(cmd: &CmdBuilder) -> bool {
    cmd.get_args().get(1).is_some_and(|arg| arg.ends_with("x.py"))
}

fn write_file(path: &Utf8Path, content: &str) {
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, content).unwrap();
}

impl Executor for RecordingExecutor {
    fn execute(&self, cmd: &CmdBuilder) -> anyhow::Result<()> {
        self.commands.borrow_mut().push(cmd.clone());
        let args = cmd.get_args();
        if let Some(arg) = self.fail_on {
            if args.iter().any(|a| a == arg) {
                anyhow::bail!("Command `{cmd}` has failed with exit status: 1");
            }
        }

        if let Some(index) = args.iter().position(|arg| arg == "-o") {
            write_file(Utf8Path::new(&args[index + 1]), "merged profile");
        }
        if let Some(output) = cmd.get_output() {
            write_file(output, "merged fdata");
        }
        if is_bootstrap(cmd) && args.get(2).is_some_and(|arg| arg == "build" || arg == "dist") {
            write_file(&self.metrics_path, BOOTSTRAP_METRICS);
        }
        Ok(())
    }
}

const BOOTSTRAP_METRICS: &str = r#"{
    "invocations": [{
        "duration_including_children_sec": 100.0,
        "children": [{
            "kind": "rustbuild_step",
            "type": "bootstrap::compile::Rustc",
            "duration_excluding_children_sec": 30.0,
            "children": [{
                "kind": "rustbuild_step",
                "type": "bootstrap::llvm::Llvm",
                "duration_excluding_children_sec": 60.0,
                "children": []
            }]
        }]
    }]
}"#;

/// Writes profile fragments where the instrumented toolchain would put them.
#[derive(Default)]
pub struct FakeRunner {
    pub runs: RefCell<Vec<&'static str>>,
}

impl BenchmarkRunner for FakeRunner {
    fn run_workload(
        &self,
        _env: &dyn Environment,
        _workload: &Workload,
        _extra_env: &[(&str, String)],
    ) -> anyhow::Result<()> {
        unreachable!("FakeRunner overrides every profiling target")
    }

    fn run_rustc(&self, env: &dyn Environment) -> anyhow::Result<()> {
        self.runs.borrow_mut().push("rustc");
        let root = env.rustc_profile_dir_root();
        write_file(&root.join("default_1_100.profraw"), "rustc");
        write_file(&root.join("default_1_101.profraw"), "rustc");
        Ok(())
    }

    fn run_llvm(&self, env: &dyn Environment) -> anyhow::Result<()> {
        self.runs.borrow_mut().push("llvm");
        write_file(&env.llvm_profile_dir_root().join("prof-7").join("default.profraw"), "llvm");
        Ok(())
    }

    fn run_bolt(&self, env: &dyn Environment) -> anyhow::Result<()> {
        self.runs.borrow_mut().push("bolt");
        let prefix = env.bolt_profile_prefix();
        write_file(Utf8Path::new(&format!("{prefix}.1")), "bolt");
        write_file(Utf8Path::new(&format!("{prefix}.2")), "bolt");
        Ok(())
    }
}
