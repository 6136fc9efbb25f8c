use std::fmt::Write;
use std::time::{Duration, Instant};

use anyhow::Context;

use crate::utils::format_duration_human;


/// A node of a tree of timed sections.
///
/// The root node is created at startup and never measures anything by itself,
/// its duration is the sum of its children.
#[derive(Debug, Default)]
pub struct Timer {
    children: Vec<(String, Timer)>,
    parent_names: Vec<String>,
    duration_excluding_children: Duration,
}

impl Timer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs `func` inside a new child section called `name`.
    ///
    /// The child is attached to `self` once `func` finishes, whether it returned
    /// `Ok`, `Err` or unwound. Errors are wrapped with the full name of the section.
    /// Only one section can be open on a node at a time, which the `&mut self` borrow
    /// guarantees.
    pub fn section<F: FnOnce(&mut Timer) -> anyhow::Result<R>, R>(
        &mut self,
        name: &str,
        func: F,
    ) -> anyhow::Result<R> {
        let mut parent_names = self.parent_names.clone();
        parent_names.push(name.to_string());
        let child = Timer { parent_names, ..Default::default() };
        let full_name = child.full_name();

        log::info!("Section `{full_name}` starts");

        let mut guard = SectionGuard {
            parent: self,
            name: name.to_string(),
            child,
            start: Instant::now(),
            succeeded: false,
        };
        let result = func(&mut guard.child);
        guard.succeeded = result.is_ok();
        result.with_context(|| format!("Section `{full_name}` has failed"))
    }

    pub fn total_duration(&self) -> Duration {
        let children: Duration = self.children.iter().map(|(_, c)| c.total_duration()).sum();
        self.duration_excluding_children + children
    }

    #[cfg(test)]
    pub fn duration_excluding_children(&self) -> Duration {
        self.duration_excluding_children
    }

    #[cfg(test)]
    pub fn children(&self) -> &[(String, Timer)] {
        &self.children
    }

    #[cfg(test)]
    pub fn has_children(&self) -> bool {
        !self.children.is_empty()
    }

    /// Adds a leaf section whose duration was measured elsewhere, e.g. by bootstrap.
    pub fn add_duration(&mut self, name: &str, duration: Duration) {
        let mut parent_names = self.parent_names.clone();
        parent_names.push(name.to_string());
        let timer =
            Timer { parent_names, duration_excluding_children: duration, ..Default::default() };
        self.children.push((name.to_string(), timer));
    }

    /// Depth-first list of `(level, name, total duration)`, starting with `self` at level 0.
    pub fn iterate_timers<'a>(&'a self, name: &'a str) -> Vec<(usize, &'a str, Duration)> {
        let mut rows = vec![];
        self.visit(name, 0, &mut rows);
        rows
    }

    fn visit<'a>(
        &'a self,
        name: &'a str,
        level: usize,
        rows: &mut Vec<(usize, &'a str, Duration)>,
    ) {
        rows.push((level, name, self.total_duration()));
        for (child_name, child) in &self.children {
            child.visit(child_name, level + 1, rows);
        }
    }

    pub fn format_stats(&self) -> String {
        let total_duration = self.total_duration();
        let percentage = |duration: Duration| {
            if total_duration.is_zero() {
                0.0
            } else {
                duration.as_secs_f64() / total_duration.as_secs_f64() * 100.0
            }
        };

        let total_duration_label = "Total duration:";
        let mut rows: Vec<(String, String)> = vec![];
        for (child_name, child) in &self.children {
            for (level, name, duration) in child.iterate_timers(child_name) {
                let label = format!("{}{name}:", "  ".repeat(level));
                let value = format!(
                    "{:>12.2}s ({:>5.2}%)",
                    duration.as_secs_f64(),
                    percentage(duration)
                );
                rows.push((label, value));
            }
        }
        rows.push((String::new(), String::new()));
        rows.push((
            total_duration_label.to_string(),
            format!(
                "{:>width$}",
                format_duration_human(total_duration),
                width = total_duration_label.len() + 7
            ),
        ));

        let space_after_label = 2;
        let longest_label = rows.iter().map(|(label, _)| label.len()).max().unwrap_or(0);
        let max_label_length = longest_label.max(16) + space_after_label;
        let divider = "-".repeat(max_label_length + 23);

        let mut output = String::new();
        let _ = writeln!(output, "{divider}");
        for (label, value) in rows {
            let _ = writeln!(output, "{label:<max_label_length$} {value}");
        }
        output.push_str(&divider);
        output
    }

    pub fn print_stats(&self) {
        log::info!("Timer results\n{}", self.format_stats());
    }

    fn full_name(&self) -> String {
        self.parent_names.join(" > ")
    }
}

/// Attaches a finished section to its parent on drop.
struct SectionGuard<'a> {
    parent: &'a mut Timer,
    name: String,
    child: Timer,
    start: Instant,
    succeeded: bool,
}

impl Drop for SectionGuard<'_> {
    fn drop(&mut self) {
        let duration = self.start.elapsed();
        let mut child = std::mem::take(&mut self.child);
        child.duration_excluding_children = duration.saturating_sub(child.total_duration());

        let status = if self.succeeded { "OK" } else { "FAIL" };
        log::info!(
            "Section `{}` ended: {status} ({:.2}s)",
            child.full_name(),
            duration.as_secs_f64()
        );
        self.parent.children.push((std::mem::take(&mut self.name), child));
    }
}
