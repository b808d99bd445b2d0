//! Output formatting for CLI

use clap::ValueEnum;
use colored::Colorize;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use serde::Serialize;

use waypoint_engine::{CheckpointRecord, DecisionRecord, StepCheckpoint};

/// Output format
#[derive(Debug, Clone, Copy, ValueEnum, Default, PartialEq, Eq)]
pub enum OutputFormat {
    /// Human-readable table format
    #[default]
    Table,
    /// JSON format
    Json,
    /// YAML format
    Yaml,
    /// Plain text format
    Plain,
}

/// Trait for items that can be displayed in a table
pub trait TableDisplay {
    fn headers() -> Vec<&'static str>;
    fn row(&self) -> Vec<String>;
}

/// Render a list of items in the requested format
pub fn render_list<T: Serialize + TableDisplay>(items: &[T], format: OutputFormat) -> String {
    if items.is_empty() {
        return "No items found.".to_string();
    }

    match format {
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic);

            table.set_header(T::headers());
            for item in items {
                table.add_row(item.row());
            }
            table.to_string()
        }
        OutputFormat::Json => serde_json::to_string_pretty(items).unwrap_or_default(),
        OutputFormat::Yaml => serde_yaml::to_string(items).unwrap_or_default(),
        OutputFormat::Plain => items
            .iter()
            .map(|item| {
                T::headers()
                    .iter()
                    .zip(item.row())
                    .map(|(header, value)| format!("{}: {}", header, value))
                    .collect::<Vec<_>>()
                    .join("\n")
            })
            .collect::<Vec<_>>()
            .join("\n---\n"),
    }
}

/// Print a list of items
pub fn print_list<T: Serialize + TableDisplay>(items: &[T], format: OutputFormat) {
    println!("{}", render_list(items, format));
}

/// Print success message
pub fn print_success(message: &str) {
    println!("{} {}", "✔".green(), message);
}

/// Print error message
pub fn print_error(message: &str) {
    eprintln!("{} {}", "✘".red(), message.red());
}

/// Print warning message
pub fn print_warning(message: &str) {
    println!("{} {}", "!".yellow(), message);
}

/// Print info message
pub fn print_info(message: &str) {
    println!("{} {}", "i".blue(), message);
}

/// One checkpointed step, as shown after a run
#[derive(Serialize)]
pub struct StepRow {
    pub step_id: String,
    pub status: String,
    pub started_at: String,
    pub duration_ms: Option<i64>,
}

impl From<&StepCheckpoint> for StepRow {
    fn from(step: &StepCheckpoint) -> Self {
        let status = match step.ok {
            Some(true) => "succeeded",
            Some(false) => "failed",
            None => "running",
        };
        Self {
            step_id: step.step_id.clone(),
            status: status.to_string(),
            started_at: step.started_at.format("%Y-%m-%d %H:%M:%S%.3f").to_string(),
            duration_ms: step
                .ended_at
                .map(|ended| (ended - step.started_at).num_milliseconds()),
        }
    }
}

impl TableDisplay for StepRow {
    fn headers() -> Vec<&'static str> {
        vec!["Step", "Status", "Started", "Duration"]
    }

    fn row(&self) -> Vec<String> {
        vec![
            self.step_id.clone(),
            self.status.clone(),
            self.started_at.clone(),
            self.duration_ms
                .map(|ms| format!("{}ms", ms))
                .unwrap_or_else(|| "-".to_string()),
        ]
    }
}

/// Steps of a checkpoint in execution order
pub fn step_rows(record: &CheckpointRecord) -> Vec<StepRow> {
    record.steps.iter().map(StepRow::from).collect()
}

#[derive(Serialize)]
pub struct DecisionRow {
    pub step_id: String,
    pub decision: String,
    pub comment: String,
}

impl From<&DecisionRecord> for DecisionRow {
    fn from(record: &DecisionRecord) -> Self {
        Self {
            step_id: record.step_id.clone(),
            decision: record.decision.to_string(),
            comment: record.comment.clone().unwrap_or_default(),
        }
    }
}

impl TableDisplay for DecisionRow {
    fn headers() -> Vec<&'static str> {
        vec!["Step", "Decision", "Comment"]
    }

    fn row(&self) -> Vec<String> {
        vec![self.step_id.clone(), self.decision.clone(), self.comment.clone()]
    }
}

/// Ping/capabilities result of one driver
#[derive(Serialize)]
pub struct ProbeRow {
    pub driver: String,
    pub reachable: bool,
    pub detail: String,
}

impl TableDisplay for ProbeRow {
    fn headers() -> Vec<&'static str> {
        vec!["Driver", "Reachable", "Detail"]
    }

    fn row(&self) -> Vec<String> {
        vec![
            self.driver.clone(),
            if self.reachable { "yes" } else { "no" }.to_string(),
            self.detail.clone(),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use test_case::test_case;

    fn checkpoint() -> StepCheckpoint {
        let started_at = Utc::now();
        StepCheckpoint {
            step_id: "save".to_string(),
            started_at,
            ended_at: Some(started_at + Duration::milliseconds(250)),
            ok: Some(true),
        }
    }

    #[test_case(Some(true), true, "succeeded", "250ms" ; "succeeded")]
    #[test_case(Some(false), true, "failed", "250ms" ; "failed")]
    #[test_case(None, false, "running", "-" ; "still running")]
    fn test_step_row(ok: Option<bool>, ended: bool, status: &str, duration: &str) {
        let mut step = checkpoint();
        step.ok = ok;
        if !ended {
            step.ended_at = None;
        }
        let row = StepRow::from(&step);
        assert_eq!(row.status, status);
        assert_eq!(row.row()[3], duration);
    }

    #[test_case(OutputFormat::Table, "Reachable" ; "table")]
    #[test_case(OutputFormat::Yaml, "reachable: true" ; "yaml")]
    #[test_case(OutputFormat::Plain, "Reachable: yes" ; "plain")]
    fn test_probe_row_rendering(format: OutputFormat, expected: &str) {
        let rows = vec![ProbeRow {
            driver: "web".to_string(),
            reachable: true,
            detail: "chromium".to_string(),
        }];
        assert!(render_list(&rows, format).contains(expected));
    }

    #[test]
    fn test_plain_rendering() {
        let rows = vec![StepRow::from(&checkpoint())];
        let plain = render_list(&rows, OutputFormat::Plain);
        assert!(plain.starts_with("Step: save\nStatus: succeeded"));
    }

    #[test]
    fn test_json_rendering() {
        let rows = vec![ProbeRow {
            driver: "desktop".to_string(),
            reachable: false,
            detail: "Backend exited with code 1".to_string(),
        }];
        let json: serde_json::Value =
            serde_json::from_str(&render_list(&rows, OutputFormat::Json)).unwrap();
        assert_eq!(json[0]["driver"], "desktop");
        assert_eq!(json[0]["reachable"], false);
    }

    #[test]
    fn test_empty_list() {
        let rows: Vec<DecisionRow> = Vec::new();
        assert_eq!(render_list(&rows, OutputFormat::Table), "No items found.");
    }
}
