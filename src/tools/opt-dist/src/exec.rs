use std::collections::BTreeMap;
use std::fmt;
use std::fs::File;
use std::process::Command;

use anyhow::Context;
use camino::{Utf8Path, Utf8PathBuf};

use crate::environment::Environment;
use crate::metrics::record_metrics;
use crate::timer::Timer;
use crate::training::{LlvmPGOProfile, RustcPGOProfile};


/// How many times a network operation is attempted by default.
pub const DEFAULT_MAX_FAILS: u32 = 5;

/// An external command with environment overrides that is executed by an [`Executor`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CmdBuilder {
    args: Vec<String>,
    env: BTreeMap<String, String>,
    workdir: Option<Utf8PathBuf>,
    output: Option<Utf8PathBuf>,
}

impl CmdBuilder {
    pub fn from_args<S: AsRef<str>>(args: &[S]) -> Self {
        let args = args.iter().map(|arg| arg.as_ref().to_string()).collect();
        Self { args, ..Default::default() }
    }

    pub fn arg(mut self, arg: impl AsRef<str>) -> Self {
        self.args.push(arg.as_ref().to_string());
        self
    }

    pub fn args<S: AsRef<str>>(mut self, args: impl IntoIterator<Item = S>) -> Self {
        self.args.extend(args.into_iter().map(|arg| arg.as_ref().to_string()));
        self
    }

    pub fn env(mut self, name: &str, value: impl AsRef<str>) -> Self {
        self.env.insert(name.to_string(), value.as_ref().to_string());
        self
    }

    pub fn workdir(mut self, path: &Utf8Path) -> Self {
        self.workdir = Some(path.to_path_buf());
        self
    }

    /// Write the standard output of the command into `path` instead of inheriting it.
    pub fn redirect_output(mut self, path: Utf8PathBuf) -> Self {
        self.output = Some(path);
        self
    }

    #[cfg(test)]
    pub fn get_args(&self) -> &[String] {
        &self.args
    }

    #[cfg(test)]
    pub fn get_env(&self) -> &BTreeMap<String, String> {
        &self.env
    }

    #[cfg(test)]
    pub fn get_workdir(&self) -> Option<&Utf8Path> {
        self.workdir.as_deref()
    }

    #[cfg(test)]
    pub fn get_output(&self) -> Option<&Utf8Path> {
        self.output.as_deref()
    }

    pub fn run(&self, executor: &dyn Executor) -> anyhow::Result<()> {
        executor.execute(self)
    }
}

impl fmt::Display for CmdBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(workdir) = &self.workdir {
            write!(f, "cd {workdir} && ")?;
        }
        for (key, value) in &self.env {
            write!(f, "{key}={value} ")?;
        }
        write!(f, "{}", self.args.join(" "))?;
        if let Some(output) = &self.output {
            write!(f, " > {output}")?;
        }
        Ok(())
    }
}

pub fn cmd(args: &[&str]) -> CmdBuilder {
    CmdBuilder::from_args(args)
}

/// Runs external commands to completion.
pub trait Executor {
    /// Fails if the command cannot be started or exits unsuccessfully.
    fn execute(&self, cmd: &CmdBuilder) -> anyhow::Result<()>;
}

/// Spawns real processes that inherit the environment of `opt-dist`.
pub struct ProcessExecutor;

impl Executor for ProcessExecutor {
    fn execute(&self, cmd: &CmdBuilder) -> anyhow::Result<()> {
        log::info!("Executing `{cmd}`");

        let (program, args) = cmd.args.split_first().context("Cannot execute empty command")?;
        let mut command = Command::new(program);
        command.args(args).envs(&cmd.env);
        if let Some(workdir) = &cmd.workdir {
            command.current_dir(workdir.as_std_path());
        }
        if let Some(output) = &cmd.output {
            let file = File::create(output.as_std_path())
                .with_context(|| format!("Cannot create output file {output}"))?;
            command.stdout(file);
        }

        let status = command.status().with_context(|| format!("Cannot execute `{cmd}`"))?;
        if !status.success() {
            anyhow::bail!("Command `{cmd}` has failed with {status}");
        }
        Ok(())
    }
}

/// Runs `action` until it succeeds, at most `max_fails` times.
pub fn retry_action<F: FnMut() -> anyhow::Result<R>, R>(
    mut action: F,
    name: &str,
    max_fails: u32,
) -> anyhow::Result<R> {
    log::info!("Attempting to perform action `{name}` with retry");
    for iteration in 0..max_fails {
        log::info!("Attempt {}/{max_fails}", iteration + 1);
        match action() {
            Ok(result) => return Ok(result),
            Err(error) => log::error!("Action `{name}` has failed\n{error:?}"),
        }
    }
    Err(anyhow::anyhow!("Action `{name}` has failed after {max_fails} attempts"))
}

/// An invocation of bootstrap (`x.py`) whose metrics are recorded after it finishes.
#[derive(Debug)]
pub struct Bootstrap {
    cmd: CmdBuilder,
    metrics_path: Utf8PathBuf,
}

impl Bootstrap {
    pub fn build(env: &dyn Environment) -> Self {
        let host = env.host_triple();
        let cmd = cmd(&[
            env.python_binary(),
            env.x_py().as_str(),
            "build",
            "--target",
            host,
            "--host",
            host,
            "--stage",
            "2",
            "library/std",
        ])
        .env("RUST_BACKTRACE", "full");
        Self { cmd, metrics_path: env.metrics_path() }
    }

    /// The final dist build, `dist_args` being the complete command line.
    pub fn dist(env: &dyn Environment, dist_args: &[String]) -> Self {
        Self { cmd: CmdBuilder::from_args(dist_args), metrics_path: env.metrics_path() }
    }

    pub fn rustc_pgo_instrument(mut self, profile_dir: &Utf8Path) -> Self {
        self.cmd = self.cmd.arg("--rust-profile-generate").arg(profile_dir);
        self
    }

    pub fn rustc_pgo_optimize(mut self, profile: &RustcPGOProfile) -> Self {
        self.cmd = self.cmd.args(profile.use_args());
        self
    }

    pub fn llvm_pgo_instrument(mut self, profile_dir: &Utf8Path) -> Self {
        self.cmd = self
            .cmd
            .arg("--llvm-profile-generate")
            .env("LLVM_PROFILE_DIR", profile_dir.join("prof-%p"));
        self
    }

    pub fn llvm_pgo_optimize(mut self, profile: &LlvmPGOProfile) -> Self {
        self.cmd = self.cmd.args(profile.use_args());
        self
    }

    pub fn llvm_bolt_instrument(mut self) -> Self {
        self.cmd = self.cmd.arg("--llvm-bolt-profile-generate");
        self
    }

    #[cfg(test)]
    pub fn cmd(&self) -> &CmdBuilder {
        &self.cmd
    }

    /// Runs the build and records its step durations into `timer`.
    pub fn run(self, executor: &dyn Executor, timer: &mut Timer) -> anyhow::Result<()> {
        self.cmd.run(executor)?;
        record_metrics(&self.metrics_path, timer);
        Ok(())
    }
}

pub fn avoid_rustc_rebuild_args() -> [String; 4] {
    ["--keep-stage", "0", "--keep-stage", "1"].map(String::from)
}
