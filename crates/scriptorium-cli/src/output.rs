//! Output formatting for the CLI.

use crate::config::OutputFormat;
use crate::error::Result;
use crate::outcome::Outcome;
use colored::*;
use scriptorium_domain::Severity;
use serde::Serialize;
use tabled::{
    builder::Builder,
    settings::{object::Rows, Alignment, Modify, Style},
};

/// Output formatter.
pub struct Formatter {
    format: OutputFormat,
    color_enabled: bool,
}

impl Formatter {
    /// Create a new formatter.
    pub fn new(format: OutputFormat, color_enabled: bool) -> Self {
        Self { format, color_enabled }
    }

    /// Whether machine-readable output was requested
    pub fn is_json(&self) -> bool {
        self.format == OutputFormat::Json
    }

    /// Render `value` as JSON, or as whatever `human` produces.
    pub fn render<T, F>(&self, value: &T, human: F) -> Result<String>
    where
        T: Serialize,
        F: FnOnce(&Self) -> String,
    {
        match self.format {
            OutputFormat::Json => Ok(serde_json::to_string_pretty(value)?),
            OutputFormat::Table => Ok(human(self)),
        }
    }

    /// Build a rounded table; `empty` is shown when there are no rows.
    pub fn table<I, R>(&self, headers: &[&str], rows: I, empty: &str) -> String
    where
        I: IntoIterator<Item = R>,
        R: IntoIterator<Item = String>,
    {
        let mut builder = Builder::default();
        builder.push_record(headers.iter().map(|h| h.to_string()));
        let mut count = 0;
        for row in rows {
            builder.push_record(row);
            count += 1;
        }
        if count == 0 {
            return self.colorize(empty, "yellow");
        }

        let mut table = builder.build();
        table
            .with(Style::rounded())
            .with(Modify::new(Rows::first()).with(Alignment::center()));
        table.to_string()
    }

    /// Aligned `key: value` lines.
    pub fn fields(&self, pairs: &[(&str, String)]) -> String {
        let width = pairs.iter().map(|(k, _)| k.len()).max().unwrap_or(0);
        pairs
            .iter()
            .map(|(k, v)| {
                let key = format!("{:width$}", format!("{}:", k), width = width + 1);
                format!("{} {}", self.colorize(&key, "cyan"), v)
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Format a success message.
    pub fn success(&self, message: &str) -> String {
        self.colorize(&format!("✓ {}", message), "green")
    }

    /// Format an error message.
    pub fn error(&self, message: &str) -> String {
        self.colorize(&format!("✗ {}", message), "red")
    }

    /// Format an info message.
    pub fn info(&self, message: &str) -> String {
        self.colorize(&format!("ℹ {}", message), "blue")
    }

    /// Format a warning message.
    pub fn warning(&self, message: &str) -> String {
        self.colorize(&format!("⚠ {}", message), "yellow")
    }

    /// Severity name in its color
    pub fn severity(&self, severity: Severity) -> String {
        let color = match severity {
            Severity::Critical => "magenta",
            Severity::High => "red",
            Severity::Medium => "yellow",
            Severity::Low => "cyan",
            Severity::Info => "blue",
        };
        self.colorize(severity.as_str(), color)
    }

    /// Health score, green to red
    pub fn health(&self, score: u32) -> String {
        let color = match score {
            80.. => "green",
            50..=79 => "yellow",
            _ => "red",
        };
        self.colorize(&format!("{}/100", score), color)
    }

    /// Closing line of every command
    pub fn summary(&self, outcome: Outcome, message: &str) -> String {
        match outcome {
            Outcome::Success => self.success(message),
            Outcome::Warnings => self.warning(message),
            Outcome::Errors | Outcome::Critical => self.error(message),
        }
    }

    /// Colorize text if color is enabled.
    fn colorize(&self, text: &str, color: &str) -> String {
        if !self.color_enabled {
            return text.to_string();
        }

        match color {
            "red" => text.red().to_string(),
            "green" => text.green().to_string(),
            "blue" => text.blue().to_string(),
            "yellow" => text.yellow().to_string(),
            "cyan" => text.cyan().to_string(),
            "magenta" => text.magenta().bold().to_string(),
            _ => text.to_string(),
        }
    }
}

/// First `len` characters of an id, for narrow tables
pub fn short_id(id: &str, len: usize) -> String {
    id.chars().take(len).collect()
}

/// Trim long text to `max` characters with an ellipsis
pub fn truncate(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        text.to_string()
    } else {
        let kept: String = text.chars().take(max.saturating_sub(1)).collect();
        format!("{}…", kept)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_json_render() {
        let formatter = Formatter::new(OutputFormat::Json, false);
        let out = formatter.render(&json!({"health": 90}), |_| "table".into()).unwrap();
        assert!(out.contains("\"health\": 90"));
    }

    #[test]
    fn test_table_render() {
        let formatter = Formatter::new(OutputFormat::Table, false);
        let out = formatter.table(&["Path", "Status"], vec![vec!["a.pdf".to_string(), "new".to_string()]], "none");
        assert!(out.contains("Path"));
        assert!(out.contains("a.pdf"));
    }

    #[test]
    fn test_empty_table() {
        let formatter = Formatter::new(OutputFormat::Table, false);
        let out = formatter.table(&["Path"], Vec::<Vec<String>>::new(), "No documents tracked.");
        assert_eq!(out, "No documents tracked.");
    }

    #[test]
    fn test_colorize_disabled() {
        let formatter = Formatter::new(OutputFormat::Table, false);
        assert_eq!(formatter.success("test"), "✓ test");
        assert_eq!(formatter.severity(Severity::High), "high");
        assert_eq!(formatter.health(75), "75/100");
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("a longer claim", 6), "a lon…");
        assert_eq!(short_id("ku_0123456789", 6), "ku_012");
    }
}
