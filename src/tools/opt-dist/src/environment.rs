use camino::{Utf8Path, Utf8PathBuf};

use crate::config::Config;


/// Where the `rustc-perf` benchmark suite comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RustcPerfSource {
    /// A checkout that is already present on the machine.
    Local(Utf8PathBuf),
    /// An archive of the given commit downloaded from GitHub.
    Download { commit: &'static str },
}

/// Path layout and capabilities of the machine running the optimized build.
///
/// Implementations only provide the roots and platform quirks; every other
/// path is derived from those and never changes during a run.
pub trait Environment {
    fn host_triple(&self) -> &str;

    /// The root checkout, where the source is located.
    fn checkout_path(&self) -> Utf8PathBuf;

    /// Directory where the host LLVM is located.
    fn downloaded_llvm_dir(&self) -> Utf8PathBuf;

    /// The main directory where the build occurs.
    fn build_root(&self) -> Utf8PathBuf;

    /// Scratch directory holding profiles, rustc-perf and test toolchains.
    fn opt_artifacts(&self) -> Utf8PathBuf;

    fn python_binary(&self) -> &'static str;

    fn executable_extension(&self) -> &'static str;

    fn dylib_extension(&self) -> &'static str;

    fn supports_bolt(&self) -> bool;

    /// Tests that should not be executed by the post-dist smoke test.
    fn skipped_tests(&self) -> &'static [&'static str];

    fn rustc_perf_source(&self) -> RustcPerfSource;

    fn build_artifacts(&self) -> Utf8PathBuf {
        self.build_root().join("build").join(self.host_triple())
    }

    fn rustc_stage_0(&self) -> Utf8PathBuf {
        self.build_artifacts()
            .join("stage0")
            .join("bin")
            .join(format!("rustc{}", self.executable_extension()))
    }

    fn cargo_stage_0(&self) -> Utf8PathBuf {
        self.build_artifacts()
            .join("stage0")
            .join("bin")
            .join(format!("cargo{}", self.executable_extension()))
    }

    fn rustc_stage_2(&self) -> Utf8PathBuf {
        self.build_artifacts()
            .join("stage2")
            .join("bin")
            .join(format!("rustc{}", self.executable_extension()))
    }

    fn rustc_perf_dir(&self) -> Utf8PathBuf {
        self.opt_artifacts().join("rustc-perf")
    }

    fn rustc_profile_dir_root(&self) -> Utf8PathBuf {
        self.opt_artifacts().join("rustc-pgo")
    }

    fn rustc_profile_merged_file(&self) -> Utf8PathBuf {
        self.opt_artifacts().join("rustc-pgo.profdata")
    }

    /// Every instrumented rustc process writes its profile into this path template.
    ///
    /// `%p` makes each process write its own file. Merging into a single shared file
    /// at process exit loses some profile data, so by default we pay for the larger
    /// number of files to get a slightly faster compiler.
    fn rustc_profile_template_path(&self) -> Utf8PathBuf {
        self.rustc_profile_dir_root().join("default_%m_%p.profraw")
    }

    fn llvm_profile_dir_root(&self) -> Utf8PathBuf {
        self.opt_artifacts().join("llvm-pgo")
    }

    fn llvm_profile_merged_file(&self) -> Utf8PathBuf {
        self.opt_artifacts().join("llvm-pgo.profdata")
    }

    fn llvm_bolt_profile_merged_file(&self) -> Utf8PathBuf {
        self.opt_artifacts().join("bolt.profdata")
    }

    /// BOLT instrumented binaries write their profiles to files starting with this prefix.
    fn bolt_profile_prefix(&self) -> Utf8PathBuf {
        Utf8PathBuf::from("/tmp/prof.fdata")
    }

    fn metrics_path(&self) -> Utf8PathBuf {
        self.build_root().join("build").join("metrics.json")
    }

    fn dist_dir(&self) -> Utf8PathBuf {
        self.build_root().join("build").join("dist")
    }

    fn x_py(&self) -> Utf8PathBuf {
        self.checkout_path().join("x.py")
    }
}

/// CI docker image on Linux, where the source is mounted at `/checkout`.
pub struct LinuxEnvironment {
    host_triple: String,
}

impl LinuxEnvironment {
    pub fn new(host_triple: &str) -> Self {
        Self { host_triple: host_triple.to_string() }
    }
}

impl Environment for LinuxEnvironment {
    fn host_triple(&self) -> &str {
        &self.host_triple
    }

    fn checkout_path(&self) -> Utf8PathBuf {
        Utf8PathBuf::from("/checkout")
    }

    fn downloaded_llvm_dir(&self) -> Utf8PathBuf {
        Utf8PathBuf::from("/rustroot")
    }

    fn build_root(&self) -> Utf8PathBuf {
        self.checkout_path().join("obj")
    }

    fn opt_artifacts(&self) -> Utf8PathBuf {
        Utf8PathBuf::from("/tmp/tmp-multistage/opt-artifacts")
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
        true
    }

    fn skipped_tests(&self) -> &'static [&'static str] {
        &[]
    }

    fn rustc_perf_source(&self) -> RustcPerfSource {
        // Prepared by the CI Dockerfile.
        RustcPerfSource::Local(Utf8PathBuf::from("/tmp/rustc-perf"))
    }
}

/// Windows CI runner, where the build happens directly inside the checkout.
pub struct WindowsEnvironment {
    host_triple: String,
    checkout_dir: Utf8PathBuf,
}

impl WindowsEnvironment {
    pub fn new(host_triple: &str, checkout_dir: Utf8PathBuf) -> Self {
        Self { host_triple: host_triple.to_string(), checkout_dir }
    }

    /// Uses the current working directory as the checkout.
    pub fn from_current_dir(host_triple: &str) -> anyhow::Result<Self> {
        let cwd = std::env::current_dir()?;
        let checkout_dir = Utf8PathBuf::from_path_buf(cwd)
            .map_err(|path| anyhow::anyhow!("Non UTF-8 working directory {}", path.display()))?;
        Ok(Self::new(host_triple, checkout_dir))
    }
}

impl Environment for WindowsEnvironment {
    fn host_triple(&self) -> &str {
        &self.host_triple
    }

    fn checkout_path(&self) -> Utf8PathBuf {
        self.checkout_dir.clone()
    }

    fn downloaded_llvm_dir(&self) -> Utf8PathBuf {
        self.checkout_path().join("citools").join("clang-rust")
    }

    fn build_root(&self) -> Utf8PathBuf {
        self.checkout_path()
    }

    fn opt_artifacts(&self) -> Utf8PathBuf {
        self.checkout_path().join("opt-artifacts")
    }

    fn python_binary(&self) -> &'static str {
        "python"
    }

    fn executable_extension(&self) -> &'static str {
        ".exe"
    }

    fn dylib_extension(&self) -> &'static str {
        ".dll"
    }

    fn supports_bolt(&self) -> bool {
        false
    }

    fn skipped_tests(&self) -> &'static [&'static str] {
        &[
            // Fails as of June 2023.
            "tests\\codegen\\vec-shrink-panik.rs",
        ]
    }

    fn rustc_perf_source(&self) -> RustcPerfSource {
        // rustc-perf version from 2023-05-30
        RustcPerfSource::Download { commit: "8b2ac3042e1ff2c0074455a0a3618adef97156b1" }
    }

    /// There is not enough disk space on Windows for one file per rustc invocation,
    /// so all processes merge into a single file per binary.
    fn rustc_profile_template_path(&self) -> Utf8PathBuf {
        self.rustc_profile_dir_root().join("default_%m.profraw")
    }
}

pub fn create_environment(config: &Config) -> anyhow::Result<Box<dyn Environment>> {
    let host = config.host.as_str();
    if cfg!(target_os = "linux") {
        Ok(Box::new(LinuxEnvironment::new(host)))
    } else if cfg!(target_os = "windows") {
        Ok(Box::new(WindowsEnvironment::from_current_dir(host)?))
    } else {
        anyhow::bail!("Optimized build is not supported for platform {}", std::env::consts::OS)
    }
}

pub(crate) fn with_exe(path: &Utf8Path, env: &dyn Environment) -> Utf8PathBuf {
    Utf8PathBuf::from(format!("{path}{}", env.executable_extension()))
}
