use std::time::Duration;

use anyhow::Context;
use camino::Utf8Path;
use serde::de::IgnoredAny;
use serde::Deserialize;

use crate::timer::Timer;


/// Contents of the `metrics.json` file written by bootstrap.
#[derive(Deserialize, Debug)]
struct JsonRoot {
    #[serde(default)]
    invocations: Vec<JsonInvocation>,
}

#[derive(Deserialize, Debug)]
struct JsonInvocation {
    #[serde(default)]
    duration_including_children_sec: f64,
    #[serde(default)]
    children: Vec<JsonEntry>,
}

/// Entries without a known `kind` (test suites, tests, ...) are kept as `Unknown`.
#[derive(Deserialize, Debug)]
#[serde(untagged)]
enum JsonEntry {
    Known(JsonNode),
    Unknown(IgnoredAny),
}

#[derive(Deserialize, Debug)]
#[serde(tag = "kind", rename_all = "snake_case")]
enum JsonNode {
    RustbuildStep {
        #[serde(rename = "type", default)]
        type_: String,
        #[serde(default)]
        duration_excluding_children_sec: f64,
        #[serde(default)]
        duration_including_children_sec: Option<f64>,
        #[serde(default)]
        children: Vec<JsonEntry>,
    },
}

/// A bootstrap step together with the steps it executed.
#[derive(Debug, Clone, PartialEq)]
pub struct BuildStep {
    pub step_type: String,
    pub children: Vec<BuildStep>,
    pub duration: Duration,
}

impl BuildStep {
    /// Total duration of all steps whose type ends with `suffix`.
    ///
    /// Nested matches are not counted twice.
    fn duration_of(&self, suffix: &str) -> Duration {
        if self.step_type.ends_with(suffix) {
            return self.duration;
        }
        self.children.iter().map(|child| child.duration_of(suffix)).sum()
    }

    fn contains(&self, suffix: &str) -> bool {
        self.step_type.ends_with(suffix) || self.children.iter().any(|child| child.contains(suffix))
    }
}

/// Loads the metrics of the most recent bootstrap invocation.
///
/// Returns `None` if the file does not contain any invocation.
pub fn load_last_metrics(path: &Utf8Path) -> anyhow::Result<Option<BuildStep>> {
    let content = std::fs::read_to_string(path.as_std_path())
        .with_context(|| format!("Cannot read metrics file {path}"))?;
    parse_last_metrics(&content).with_context(|| format!("Cannot parse metrics file {path}"))
}

fn parse_last_metrics(content: &str) -> anyhow::Result<Option<BuildStep>> {
    let root: JsonRoot = serde_json::from_str(content)?;
    let Some(invocation) = root.invocations.into_iter().last() else {
        return Ok(None);
    };

    let children: Vec<BuildStep> = invocation.children.into_iter().filter_map(parse_node).collect();
    let duration = floor_duration(invocation.duration_including_children_sec, &children);
    Ok(Some(BuildStep { step_type: "root".to_string(), children, duration }))
}

fn parse_node(entry: JsonEntry) -> Option<BuildStep> {
    match entry {
        JsonEntry::Known(JsonNode::RustbuildStep {
            type_,
            duration_excluding_children_sec,
            duration_including_children_sec,
            children,
        }) => {
            let children: Vec<BuildStep> = children.into_iter().filter_map(parse_node).collect();
            let children_sec: f64 = children.iter().map(|c| c.duration.as_secs_f64()).sum();
            let recorded = duration_including_children_sec
                .unwrap_or(duration_excluding_children_sec + children_sec);
            let duration = floor_duration(recorded, &children);
            Some(BuildStep { step_type: type_, children, duration })
        }
        JsonEntry::Unknown(_) => None,
    }
}

/// A step cannot take less time than the steps it executed.
fn floor_duration(recorded_sec: f64, children: &[BuildStep]) -> Duration {
    let children: Duration = children.iter().map(|c| c.duration).sum();
    Duration::try_from_secs_f64(recorded_sec).unwrap_or_default().max(children)
}

const LLVM_STEP: &str = "::llvm::Llvm";
const RUSTC_STEP: &str = "::compile::Rustc";

/// Adds the LLVM and rustc build durations of the last bootstrap invocation to `timer`.
///
/// Metrics are informational only, so a missing or broken file is logged and ignored.
pub fn record_metrics(metrics_path: &Utf8Path, timer: &mut Timer) {
    let metrics = match load_last_metrics(metrics_path) {
        Ok(Some(metrics)) => metrics,
        Ok(None) => {
            log::warn!("Metrics file {metrics_path} does not contain any invocation");
            return;
        }
        Err(error) => {
            log::warn!("Cannot load metrics: {error:?}");
            return;
        }
    };
    record_build_step(&metrics, timer);
    log_metrics(&metrics);
}

fn record_build_step(metrics: &BuildStep, timer: &mut Timer) {
    if !metrics.contains(RUSTC_STEP) {
        log::info!("Bootstrap did not build rustc, not recording its duration");
        return;
    }
    let llvm_duration = metrics.duration_of(LLVM_STEP);
    // The LLVM step is part of the rustc step.
    let rustc_duration = metrics.duration_of(RUSTC_STEP).saturating_sub(llvm_duration);

    timer.add_duration("LLVM", llvm_duration);
    timer.add_duration("Rustc", rustc_duration);
}

pub fn format_metrics(step: &BuildStep) -> String {
    use std::fmt::Write;

    fn visit(step: &BuildStep, level: usize, output: &mut String) {
        let label = format!("{}{}", ".".repeat(level), step.step_type);
        let _ = writeln!(output, "{label:<65}{:>8.2}s", step.duration.as_secs_f64());
        for child in &step.children {
            visit(child, level + 1, output);
        }
    }

    let mut output = String::new();
    visit(step, 0, &mut output);
    output
}

fn log_metrics(step: &BuildStep) {
    log::info!("Build step durations\n{}", format_metrics(step));
}
