//! Output formatting for CLI commands.
//!
//! This module renders change sets, apply reports, recorded state, and
//! validation results as colored text tables or JSON.

use colored::Colorize;
use serde::Serialize;
use std::fmt::Write;
use tabled::{Table, Tabled};

use crate::apply::{ApplyReport, OutcomeStatus};
use crate::config::{ConfigHasher, ValidationResult};
use crate::graph::Graph;
use crate::planner::{Action, ChangeSet, DiffDetail};
use crate::state::{HistoryEntry, LockInfo, ResourceState};

use super::commands::OutputFormat;

/// Output formatter for CLI.
#[derive(Debug)]
pub struct OutputFormatter {
    /// Output format.
    format: OutputFormat,
}

/// Change-set row for table display.
#[derive(Tabled)]
struct PlanRow {
    #[tabled(rename = "#")]
    index: usize,
    #[tabled(rename = "Action")]
    action: String,
    #[tabled(rename = "Resource")]
    resource: String,
    #[tabled(rename = "After")]
    after: String,
}

/// Outcome row for table display.
#[derive(Tabled)]
struct OutcomeRow {
    #[tabled(rename = "Resource")]
    resource: String,
    #[tabled(rename = "Action")]
    action: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "Attempts")]
    attempts: u32,
    #[tabled(rename = "Time")]
    duration: String,
    #[tabled(rename = "Error")]
    error: String,
}

/// Recorded resource row for table display.
#[derive(Tabled)]
struct StateRow {
    #[tabled(rename = "Resource")]
    resource: String,
    #[tabled(rename = "External ID")]
    external_id: String,
    #[tabled(rename = "Depends on")]
    dependencies: String,
    #[tabled(rename = "Updated")]
    updated: String,
}

impl OutputFormatter {
    /// Creates a new output formatter.
    #[must_use]
    pub const fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    /// Returns the output format.
    #[must_use]
    pub const fn format(&self) -> OutputFormat {
        self.format
    }

    /// Formats a change set for display.
    #[must_use]
    pub fn format_plan(&self, plan: &ChangeSet, detailed: bool) -> String {
        match self.format {
            OutputFormat::Json => to_json(&PlanJson::from(plan)),
            OutputFormat::Text => Self::format_plan_text(plan, detailed),
        }
    }

    fn format_plan_text(plan: &ChangeSet, detailed: bool) -> String {
        if !plan.has_changes() {
            return format!(
                "{} No changes required, {} resources up to date.\n",
                "✓".green(),
                plan.noop_count()
            );
        }

        let mut output = String::new();
        let _ = writeln!(output, "\nChange set ({})", plan.operation);
        if !plan.config_hash.is_empty() {
            let _ = writeln!(
                output,
                "   Document hash: {}",
                ConfigHasher::new().short_hash(&plan.config_hash)
            );
        }
        output.push('\n');

        let rows: Vec<PlanRow> = plan
            .entries
            .iter()
            .filter(|e| e.action != Action::NoOp)
            .enumerate()
            .map(|(i, e)| PlanRow {
                index: i + 1,
                action: Self::format_action(e.action),
                resource: e.id.to_string(),
                after: e
                    .depends_on
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join(", "),
            })
            .collect();

        output.push_str(&Table::new(rows).to_string());
        output.push('\n');

        if detailed {
            for entry in plan.entries.iter().filter(|e| !e.details.is_empty()) {
                if entry.action == Action::NoOp {
                    continue;
                }
                let _ = writeln!(output, "\n  {} {}", entry.action.symbol(), entry.id);
                for detail in &entry.details {
                    let _ = writeln!(output, "      {}", Self::format_detail(detail));
                }
            }
        }

        let _ = write!(
            output,
            "\nPlan: {} to create, {} to update, {} to delete, {} unchanged\n",
            plan.create_count().to_string().green(),
            plan.update_count().to_string().yellow(),
            plan.delete_count().to_string().red(),
            plan.noop_count()
        );

        output
    }

    /// Formats an apply report.
    #[must_use]
    pub fn format_report(&self, report: &ApplyReport) -> String {
        match self.format {
            OutputFormat::Json => to_json(report),
            OutputFormat::Text => {
                let status = if report.is_success() {
                    format!("{} {} complete", "✓".green(), report.operation)
                } else {
                    format!("{} {} incomplete", "✗".red(), report.operation)
                };

                let rows: Vec<OutcomeRow> = report
                    .outcomes
                    .iter()
                    .filter(|o| o.action != Action::NoOp || o.status != OutcomeStatus::Succeeded)
                    .map(|o| OutcomeRow {
                        resource: o.id.to_string(),
                        action: o.action.to_string(),
                        status: Self::format_status(o.status),
                        attempts: o.attempts,
                        duration: format!("{}ms", o.duration.as_millis()),
                        error: o.error.as_deref().map(|e| truncate(e, 60)).unwrap_or_default(),
                    })
                    .collect();

                let mut output = format!("\n{status}\n\n");
                if !rows.is_empty() {
                    output.push_str(&Table::new(rows).to_string());
                    output.push('\n');
                }
                let _ = writeln!(output, "\n{}", report.summary());
                output
            }
        }
    }

    /// Formats a drift check: the change set that would converge the
    /// resources.
    #[must_use]
    pub fn format_drift(&self, plan: &ChangeSet) -> String {
        match self.format {
            OutputFormat::Json => to_json(&DriftJson {
                converged: !plan.has_changes(),
                total_resources: plan.len(),
                drifted: PlanJson::from(plan)
                    .entries
                    .into_iter()
                    .filter(|e| e.action != Action::NoOp)
                    .collect(),
            }),
            OutputFormat::Text => {
                if !plan.has_changes() {
                    return format!("{} No drift detected, state is converged.\n", "✓".green());
                }

                let mut output = format!("{} Drift detected:\n\n", "⚠".yellow());
                for entry in plan.entries.iter().filter(|e| e.action != Action::NoOp) {
                    let _ = writeln!(output, "   {} {}", Self::format_action(entry.action), entry.id);
                    for detail in &entry.details {
                        let _ = writeln!(output, "       {}", Self::format_detail(detail));
                    }
                }
                let drifted = plan.len() - plan.noop_count();
                let _ = write!(output, "\n{drifted}/{} resources have drifted.\n", plan.len());
                output
            }
        }
    }

    /// Formats recorded state.
    #[must_use]
    pub fn format_state(
        &self,
        resources: &[ResourceState],
        history: &[HistoryEntry],
        lock: Option<&LockInfo>,
    ) -> String {
        match self.format {
            OutputFormat::Json => to_json(&StateJson {
                resources,
                history,
                lock,
            }),
            OutputFormat::Text => {
                let mut output = String::new();
                let _ = writeln!(output, "\nState: {} resources", resources.len());

                if let Some(lock) = lock {
                    let _ = writeln!(
                        output,
                        "   Locked by {} since {} ({}s left)",
                        lock.holder,
                        lock.acquired_at.format("%Y-%m-%d %H:%M:%S"),
                        lock.remaining_secs()
                    );
                }

                if !resources.is_empty() {
                    let rows: Vec<StateRow> = resources
                        .iter()
                        .map(|r| StateRow {
                            resource: r.id.to_string(),
                            external_id: truncate(&r.external_id, 36),
                            dependencies: r
                                .dependencies
                                .iter()
                                .map(ToString::to_string)
                                .collect::<Vec<_>>()
                                .join(", "),
                            updated: r.updated_at.format("%Y-%m-%d %H:%M").to_string(),
                        })
                        .collect();
                    output.push('\n');
                    output.push_str(&Table::new(rows).to_string());
                    output.push('\n');
                }

                if !history.is_empty() {
                    let _ = writeln!(output, "\n   Recent history ({}):", history.len());
                    for entry in history.iter().rev().take(5) {
                        let status = if entry.success { "✓".green() } else { "✗".red() };
                        let _ = writeln!(
                            output,
                            "     {status} {} - {} ({} ok, {} failed, {} skipped, {} cancelled)",
                            entry.timestamp.format("%Y-%m-%d %H:%M"),
                            entry.operation,
                            entry.succeeded,
                            entry.failed,
                            entry.skipped,
                            entry.cancelled
                        );
                    }
                }

                output
            }
        }
    }

    /// Formats a validation summary.
    #[must_use]
    pub fn format_validation(&self, result: &ValidationResult, graph: &Graph, show_warnings: bool) -> String {
        match self.format {
            OutputFormat::Json => to_json(&serde_json::json!({
                "valid": result.is_valid(),
                "resources": graph.len(),
                "kinds": graph.kinds(),
                "warnings": result.warnings,
            })),
            OutputFormat::Text => {
                let mut output = format!("{} Document is valid.\n", "✓".green());
                let _ = writeln!(output, "\nSummary:");
                let _ = writeln!(output, "  Resources: {}", graph.len());
                let kinds: Vec<&str> = graph.kinds().into_iter().collect();
                let _ = writeln!(output, "  Kinds: {}", kinds.join(", "));

                if result.warning_count() > 0 {
                    if show_warnings {
                        let _ = writeln!(output, "\n{} Warnings:", "⚠".yellow());
                        for warning in &result.warnings {
                            let _ = writeln!(output, "  - {warning}");
                        }
                    } else {
                        let _ = writeln!(
                            output,
                            "\n{} warnings (use --warnings to show)",
                            result.warning_count()
                        );
                    }
                }
                output
            }
        }
    }

    /// Formats an action with color.
    fn format_action(action: Action) -> String {
        let label = format!("{}{action}", action.symbol());
        match action {
            Action::Create => label.green().to_string(),
            Action::Update => label.yellow().to_string(),
            Action::Delete => label.red().to_string(),
            Action::NoOp => label.dimmed().to_string(),
        }
    }

    /// Formats an outcome status with color.
    fn format_status(status: OutcomeStatus) -> String {
        let label = status.to_string();
        match status {
            OutcomeStatus::Succeeded => label.green().to_string(),
            OutcomeStatus::Failed => label.red().to_string(),
            OutcomeStatus::SkippedDueToDependency | OutcomeStatus::Cancelled => {
                label.yellow().to_string()
            }
        }
    }

    fn format_detail(detail: &DiffDetail) -> String {
        truncate(&detail.to_string(), 120)
    }

    /// Formats a success message.
    #[must_use]
    pub fn success(&self, message: &str) -> String {
        self.message("success", &format!("{} {message}", "✓".green()), message)
    }

    /// Formats an error message.
    #[must_use]
    pub fn error(&self, message: &str) -> String {
        self.message("error", &format!("{} {message}", "✗".red()), message)
    }

    /// Formats a warning message.
    #[must_use]
    pub fn warning(&self, message: &str) -> String {
        self.message("warning", &format!("{} {message}", "⚠".yellow()), message)
    }

    fn message(&self, status: &str, text: &str, message: &str) -> String {
        match self.format {
            OutputFormat::Json => to_json(&serde_json::json!({ "status": status, "message": message })),
            OutputFormat::Text => text.to_string(),
        }
    }
}

/// Truncates a string to at most `max_len` characters.
fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{kept}...")
    }
}

fn to_json<T: Serialize + ?Sized>(value: &T) -> String {
    serde_json::to_string_pretty(value).unwrap_or_default()
}

// JSON serialization helpers

#[derive(Serialize)]
struct PlanJson {
    operation: String,
    config_hash: String,
    creates: usize,
    updates: usize,
    deletes: usize,
    unchanged: usize,
    entries: Vec<EntryJson>,
}

#[derive(Serialize)]
struct EntryJson {
    id: String,
    action: Action,
    depends_on: Vec<String>,
    details: Vec<DiffDetail>,
}

#[derive(Serialize)]
struct DriftJson {
    converged: bool,
    total_resources: usize,
    drifted: Vec<EntryJson>,
}

#[derive(Serialize)]
struct StateJson<'a> {
    resources: &'a [ResourceState],
    history: &'a [HistoryEntry],
    lock: Option<&'a LockInfo>,
}

impl From<&ChangeSet> for PlanJson {
    fn from(plan: &ChangeSet) -> Self {
        Self {
            operation: plan.operation.to_string(),
            config_hash: plan.config_hash.clone(),
            creates: plan.create_count(),
            updates: plan.update_count(),
            deletes: plan.delete_count(),
            unchanged: plan.noop_count(),
            entries: plan
                .entries
                .iter()
                .map(|e| EntryJson {
                    id: e.id.to_string(),
                    action: e.action,
                    depends_on: e.depends_on.iter().map(ToString::to_string).collect(),
                    details: e.details.clone(),
                })
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::ResourceId;
    use crate::planner::ChangeSetEntry;
    use crate::state::RunOperation;
    use serde_json::{json, Value};

    fn plan() -> ChangeSet {
        let bucket = ResourceId::new("object-store-bucket", "trail");
        ChangeSet::new(
            RunOperation::Apply,
            vec![
                ChangeSetEntry {
                    id: bucket.clone(),
                    action: Action::Create,
                    depends_on: Vec::new(),
                    desired: None,
                    prior: None,
                    details: vec![DiffDetail {
                        field: String::from("bucket"),
                        old_value: None,
                        new_value: Some(json!("audit-logs")),
                    }],
                },
                ChangeSetEntry {
                    id: ResourceId::new("key-value-policy", "trail-policy"),
                    action: Action::NoOp,
                    depends_on: vec![bucket],
                    desired: None,
                    prior: None,
                    details: Vec::new(),
                },
            ],
        )
        .with_config_hash("0123456789abcdef")
    }

    #[test]
    fn test_plan_json() {
        let formatter = OutputFormatter::new(OutputFormat::Json);
        let parsed: Value = serde_json::from_str(&formatter.format_plan(&plan(), false)).unwrap();

        assert_eq!(parsed["creates"], 1);
        assert_eq!(parsed["unchanged"], 1);
        assert_eq!(parsed["entries"][0]["action"], "create");
        assert_eq!(parsed["entries"][1]["depends_on"][0], "object-store-bucket.trail");
    }

    #[test]
    fn test_plan_text_and_drift() {
        colored::control::set_override(false);
        let formatter = OutputFormatter::new(OutputFormat::Text);

        let text = formatter.format_plan(&plan(), true);
        assert!(text.contains("object-store-bucket.trail"));
        assert!(text.contains("bucket: (none) -> \"audit-logs\""));
        assert!(text.contains("1 to create"));

        let drift = formatter.format_drift(&plan());
        assert!(drift.contains("1/2 resources have drifted"));
    }

    #[test]
    fn test_truncate_is_char_safe() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("ééééééééééé", 6), "ééé...");
    }
}
