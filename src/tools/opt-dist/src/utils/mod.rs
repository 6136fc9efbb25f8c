pub mod io;

use std::time::Duration;

use camino::Utf8Path;
use humansize::{format_size, BINARY};
use sysinfo::{DiskExt, RefreshKind, System, SystemExt};

use crate::environment::Environment;
use crate::utils::io::{delete_directory, get_files_from_dir};

pub fn format_env_variables() -> String {
    let mut vars =
        std::env::vars().map(|(key, value)| format!("{key}={value}")).collect::<Vec<_>>();
    vars.sort();
    vars.join("\n")
}

pub fn print_free_disk_space() -> anyhow::Result<()> {
    let sys = System::new_with_specifics(RefreshKind::new().with_disks_list().with_disks());
    let available_space: u64 = sys.disks().iter().map(|d| d.available_space()).sum();
    let total_space: u64 = sys.disks().iter().map(|d| d.total_space()).sum();
    let used_space = total_space.saturating_sub(available_space);

    if total_space == 0 {
        log::warn!("Cannot determine free disk space");
        return Ok(());
    }

    log::info!(
        "Free disk space: {} out of total {} ({:.2}% used)",
        format_size(available_space, BINARY),
        format_size(total_space, BINARY),
        (used_space as f64 / total_space as f64) * 100.0
    );
    Ok(())
}

pub fn print_binary_sizes(env: &dyn Environment) -> anyhow::Result<()> {
    use std::fmt::Write;

    let root = env.build_artifacts().join("stage2");

    let mut files = get_files_from_dir(&root.join("bin"), None)?;
    files.extend(get_files_from_dir(&root.join("lib"), Some(env.dylib_extension()))?);
    files.sort_unstable();

    let mut output = String::new();
    for file in files {
        let size = std::fs::metadata(file.as_std_path())?.len();
        let size_formatted = format_size(size, BINARY);
        let name = format!("{}:", file.file_name().unwrap_or(file.as_str()));
        writeln!(output, "{name:<50}{size_formatted:>14}")?;
    }

    log::info!("Rustc artifact size\n{output}");

    Ok(())
}

pub fn clear_llvm_files(env: &dyn Environment) -> anyhow::Result<()> {
    // Bootstrap currently doesn't support rebuilding LLVM when PGO options
    // change (or any other llvm-related options); so just clear out the relevant
    // directories ourselves.
    log::info!("Clearing LLVM build files");
    for dir in ["llvm", "lld"] {
        let path = env.build_artifacts().join(dir);
        if path.is_dir() {
            delete_directory(&path)?;
        } else {
            log::debug!("`{path}` does not exist, nothing to clear");
        }
    }
    Ok(())
}

/// Logs `<path>: <size>` for a file or directory.
pub fn log_path_size(path: &Utf8Path) -> anyhow::Result<()> {
    let size = io::get_path_size(path)?;
    log::info!("{path}: {}", format_size(size, BINARY));
    Ok(())
}

/// Formats a duration as `1h 2m 3s`, omitting leading zero components.
pub fn format_duration_human(duration: Duration) -> String {
    let total = duration.as_secs_f64();
    let hours = (total / 3600.0).floor();
    let minutes = ((total % 3600.0) / 60.0).floor();
    let seconds = total % 60.0;

    let mut result = String::new();
    if hours > 0.0 {
        result.push_str(&format!("{hours}h "));
    }
    if minutes > 0.0 {
        result.push_str(&format!("{minutes}m "));
    }
    result.push_str(&format!("{}s", seconds.round()));
    result
}

/// Wraps all output produced within the `func` closure in a CI output group, if we're running in
/// CI.
pub fn with_log_group<F: FnOnce() -> R, R>(group: &str, func: F) -> R {
    if is_in_ci() {
        println!("::group::{group}");
        let result = func();
        println!("::endgroup::");
        result
    } else {
        func()
    }
}

fn is_in_ci() -> bool {
    std::env::var("GITHUB_ACTIONS").is_ok()
}
