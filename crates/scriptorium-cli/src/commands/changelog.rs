//! `growth changelog`: query and export the change history.

use super::{emit, finish, Corpus};
use crate::cli::{ChangelogArgs, ExportArg};
use crate::error::{CliError, Result};
use crate::output::{truncate, Formatter};
use crate::outcome::Outcome;
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use scriptorium_growth::{export_json, export_markdown, ChangeKind, ChangeQuery};
use std::fs;

/// Parse `YYYY-MM-DD` or RFC 3339; a bare date is the start of that day,
/// or its last second when `end_of_day` is set
fn parse_time(text: &str, end_of_day: bool) -> Result<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(text) {
        return Ok(ts.with_timezone(&Utc));
    }
    let date = NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .map_err(|_| CliError::InvalidInput(format!("'{}' is not YYYY-MM-DD or RFC 3339", text)))?;
    let time = if end_of_day {
        NaiveTime::from_hms_opt(23, 59, 59)
    } else {
        NaiveTime::from_hms_opt(0, 0, 0)
    }
    .unwrap_or_default();
    Ok(date.and_time(time).and_utc())
}

fn build_query(args: &ChangelogArgs) -> Result<ChangeQuery> {
    let kinds = args
        .kinds
        .iter()
        .map(|k| k.parse::<ChangeKind>())
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(ChangeQuery {
        kinds,
        entity_type: args.entity_type.clone(),
        entity_id: args.entity.clone(),
        since: args.since.as_deref().map(|s| parse_time(s, false)).transpose()?,
        until: args.until.as_deref().map(|s| parse_time(s, true)).transpose()?,
        limit: args.limit,
    })
}

/// Execute `growth changelog`.
pub fn execute_changelog(args: ChangelogArgs, corpus: &Corpus, formatter: &Formatter) -> Result<Outcome> {
    let query = build_query(&args)?;
    let versions = corpus.versions()?;
    let entries = versions.changelog().query(&query)?;

    if let Some(export) = args.export {
        let text = match export {
            ExportArg::Markdown => export_markdown(&entries),
            ExportArg::Json => export_json(&entries)?,
        };
        match &args.output {
            Some(path) => {
                fs::write(path, &text)?;
                let message = format!("Exported {} entr(ies) to {}", entries.len(), path.display());
                return Ok(finish(formatter, Outcome::Success, &message));
            }
            None => {
                // Exported text goes out untouched so it can be piped.
                println!("{}", text);
                return Ok(Outcome::Success);
            }
        }
    }

    let text = formatter.render(&entries, |f| {
        let rows = entries.iter().map(|e| {
            vec![
                e.timestamp.format("%Y-%m-%d %H:%M:%S").to_string(),
                e.version.clone(),
                e.kind.as_str().to_string(),
                format!("{}:{}", e.entity_type, truncate(&e.entity_id, 24)),
                truncate(&e.description, 50),
            ]
        });
        f.table(&["When", "Version", "Kind", "Entity", "Description"], rows, "No matching changes.")
    })?;
    emit(&text);
    let message = format!("{} change(s)", entries.len());
    Ok(finish(formatter, Outcome::Success, &message))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, Timelike};

    #[test]
    fn test_parse_time_forms() {
        let start = parse_time("2026-03-01", false).unwrap();
        assert_eq!((start.day(), start.hour()), (1, 0));
        let end = parse_time("2026-03-01", true).unwrap();
        assert_eq!((end.hour(), end.second()), (23, 59));
        let exact = parse_time("2026-03-01T12:30:00+02:00", false).unwrap();
        assert_eq!(exact.hour(), 10);
        assert!(parse_time("March 1st", false).is_err());
    }
}
