//! Output formatting for CLI commands.
//!
//! This module provides formatting utilities for displaying plans, run
//! reports, and recorded state in text or JSON form.

use colored::Colorize;
use std::fmt::Write;
use tabled::{Table, Tabled};

use crate::planner::{ActionOp, ActionOutcome, ExecutionResult, Plan};
use crate::reconciler::RunReport;
use crate::state::StateSnapshot;

use super::commands::OutputFormat;

/// Output formatter for CLI.
#[derive(Debug)]
pub struct OutputFormatter {
    /// Output format.
    format: OutputFormat,
}

/// Plan action row for table display.
#[derive(Tabled)]
struct PlanActionRow {
    #[tabled(rename = "#")]
    index: usize,
    #[tabled(rename = "Action")]
    action: String,
    #[tabled(rename = "Resource")]
    resource: String,
    #[tabled(rename = "Kind")]
    kind: String,
    #[tabled(rename = "Reason")]
    reason: String,
}

/// Run result row for table display.
#[derive(Tabled)]
struct ResultRow {
    #[tabled(rename = "Action")]
    action: String,
    #[tabled(rename = "Resource")]
    resource: String,
    #[tabled(rename = "Result")]
    result: String,
    #[tabled(rename = "Attempts")]
    attempts: u32,
}

/// State entry row for table display.
#[derive(Tabled)]
struct StateRow {
    #[tabled(rename = "Resource")]
    resource: String,
    #[tabled(rename = "Kind")]
    kind: String,
    #[tabled(rename = "Status")]
    status: String,
    #[tabled(rename = "External ID")]
    external_id: String,
    #[tabled(rename = "Updated")]
    updated: String,
}

impl OutputFormatter {
    /// Creates a new output formatter.
    #[must_use]
    pub const fn new(format: OutputFormat) -> Self {
        Self { format }
    }

    /// Formats a plan for display.
    #[must_use]
    pub fn format_plan(&self, plan: &Plan) -> String {
        match self.format {
            OutputFormat::Json => {
                serde_json::to_string_pretty(&PlanJson::from(plan)).unwrap_or_default()
            }
            OutputFormat::Text => Self::format_plan_text(plan),
        }
    }

    /// Formats a plan as text.
    fn format_plan_text(plan: &Plan) -> String {
        if plan.is_empty() {
            return format!(
                "{} No changes required - infrastructure is up to date.\n",
                "ok:".green()
            );
        }

        let mut output = String::new();

        let _ = write!(
            output,
            "\nPlan (manifest {})\n\n",
            &plan.manifest_hash[..8.min(plan.manifest_hash.len())]
        );

        let rows: Vec<PlanActionRow> = plan
            .actions
            .iter()
            .enumerate()
            .map(|(i, a)| PlanActionRow {
                index: i + 1,
                action: Self::format_action_op(a.op),
                resource: a.resource_id.clone(),
                kind: a.kind.clone(),
                reason: Self::truncate(&a.reason, 40),
            })
            .collect();

        let table = Table::new(rows).to_string();
        output.push_str(&table);
        output.push('\n');

        let _ = write!(
            output,
            "\nPlan: {} to create, {} to update, {} to destroy\n",
            plan.create_count().to_string().green(),
            plan.update_count().to_string().yellow(),
            plan.delete_count().to_string().red()
        );

        output
    }

    /// Formats a single incremental execution result.
    #[must_use]
    pub fn format_result(&self, result: &ExecutionResult) -> String {
        match self.format {
            OutputFormat::Json => {
                serde_json::to_string(&ResultJson::from(result)).unwrap_or_default()
            }
            OutputFormat::Text => {
                let status = match &result.outcome {
                    ActionOutcome::Succeeded { .. } => "ok".green().to_string(),
                    ActionOutcome::Failed { reason } => {
                        format!("{} {reason}", "failed:".red())
                    }
                    ActionOutcome::Skipped { due_to } => {
                        format!("{} {due_to}", "skipped:".yellow())
                    }
                };
                format!(
                    "{} {} ... {status}",
                    Self::format_action_op(result.op),
                    result.resource_id
                )
            }
        }
    }

    /// Formats a run report.
    #[must_use]
    pub fn format_report(&self, report: &RunReport) -> String {
        match self.format {
            OutputFormat::Json => {
                serde_json::to_string_pretty(&ReportJson::from(report)).unwrap_or_default()
            }
            OutputFormat::Text => {
                let mut output = String::new();

                let rows: Vec<ResultRow> = report
                    .results
                    .iter()
                    .map(|r| ResultRow {
                        action: Self::format_action_op(r.op),
                        resource: r.resource_id.clone(),
                        result: match &r.outcome {
                            ActionOutcome::Succeeded { .. } => "ok".green().to_string(),
                            ActionOutcome::Failed { reason } => {
                                format!("failed: {}", Self::truncate(reason, 40)).red().to_string()
                            }
                            ActionOutcome::Skipped { due_to } => {
                                format!("skipped ({due_to})").yellow().to_string()
                            }
                        },
                        attempts: r.attempts,
                    })
                    .collect();

                if !rows.is_empty() {
                    let table = Table::new(rows).to_string();
                    output.push_str(&table);
                    output.push('\n');
                }

                let summary_line = if report.all_successful() {
                    format!("{} {}", "ok:".green(), report.summary)
                } else {
                    format!("{} {}", "error:".red(), report.summary)
                };
                let _ = write!(output, "\n{summary_line}\n");

                output
            }
        }
    }

    /// Formats recorded state.
    #[must_use]
    pub fn format_state(&self, snapshot: &StateSnapshot) -> String {
        match self.format {
            OutputFormat::Json => serde_json::to_string_pretty(snapshot).unwrap_or_default(),
            OutputFormat::Text => {
                if snapshot.is_empty() {
                    return String::from("No recorded state.\n");
                }

                let rows: Vec<StateRow> = snapshot
                    .values()
                    .map(|s| StateRow {
                        resource: s.id.clone(),
                        kind: s.kind.clone(),
                        status: s.status.to_string(),
                        external_id: s.external_id.clone().unwrap_or_default(),
                        updated: s.updated_at.format("%Y-%m-%d %H:%M").to_string(),
                    })
                    .collect();

                let mut output = Table::new(rows).to_string();
                output.push('\n');
                output
            }
        }
    }

    /// Formats an action op with color.
    fn format_action_op(op: ActionOp) -> String {
        match op {
            ActionOp::Create => "+create".green().to_string(),
            ActionOp::Update => "~update".yellow().to_string(),
            ActionOp::Delete => "-delete".red().to_string(),
        }
    }

    /// Truncates a string to a maximum length.
    fn truncate(s: &str, max_len: usize) -> String {
        if s.len() <= max_len {
            s.to_string()
        } else {
            format!("{}...", &s[..max_len - 3])
        }
    }
}

// JSON serialization helpers

#[derive(serde::Serialize)]
struct PlanJson {
    manifest_hash: String,
    action_count: usize,
    creates: usize,
    updates: usize,
    deletes: usize,
    actions: Vec<ActionJson>,
}

#[derive(serde::Serialize)]
struct ActionJson {
    op: String,
    resource: String,
    kind: String,
    reason: String,
}

impl From<&Plan> for PlanJson {
    fn from(plan: &Plan) -> Self {
        Self {
            manifest_hash: plan.manifest_hash.clone(),
            action_count: plan.action_count(),
            creates: plan.create_count(),
            updates: plan.update_count(),
            deletes: plan.delete_count(),
            actions: plan
                .actions
                .iter()
                .map(|a| ActionJson {
                    op: a.op.to_string(),
                    resource: a.resource_id.clone(),
                    kind: a.kind.clone(),
                    reason: a.reason.clone(),
                })
                .collect(),
        }
    }
}

#[derive(serde::Serialize)]
struct ResultJson {
    op: String,
    resource: String,
    outcome: String,
    detail: Option<String>,
    attempts: u32,
}

impl From<&ExecutionResult> for ResultJson {
    fn from(result: &ExecutionResult) -> Self {
        let (outcome, detail) = match &result.outcome {
            ActionOutcome::Succeeded { external_id } => {
                (String::from("succeeded"), external_id.clone())
            }
            ActionOutcome::Failed { reason } => (String::from("failed"), Some(reason.clone())),
            ActionOutcome::Skipped { due_to } => (String::from("skipped"), Some(due_to.clone())),
        };

        Self {
            op: result.op.to_string(),
            resource: result.resource_id.clone(),
            outcome,
            detail,
            attempts: result.attempts,
        }
    }
}

#[derive(serde::Serialize)]
struct ReportJson {
    total: usize,
    succeeded: usize,
    failed: usize,
    skipped: usize,
    cancelled: bool,
    results: Vec<ResultJson>,
}

impl From<&RunReport> for ReportJson {
    fn from(report: &RunReport) -> Self {
        Self {
            total: report.summary.total,
            succeeded: report.summary.succeeded,
            failed: report.summary.failed,
            skipped: report.summary.skipped,
            cancelled: report.summary.cancelled,
            results: report.results.iter().map(ResultJson::from).collect(),
        }
    }
}
