//! Append-only JSONL event log.
//!
//! Catalog mutations and patch assembly runs record [`CatalogEvent`]s in memory;
//! the CLI appends them to `events.jsonl` in the state directory once the
//! command finishes, whether it succeeded or not.
//!
//! # Example
//!
//! ```
//! use patchline_events::EventLog;
//! use patchline_types::{CatalogEvent, EventType};
//!
//! let mut log = EventLog::new();
//! log.record(CatalogEvent::now(
//!     "1.3.0",
//!     EventType::VersionCreated { version: "1.3.0".to_string() },
//! ));
//! assert_eq!(log.events_for_subject("1.3.0").len(), 1);
//! ```

use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use patchline_types::{CatalogEvent, EventType};

pub const EVENTS_FILE: &str = "events.jsonl";

pub fn events_path(state_dir: &Path) -> PathBuf {
    state_dir.join(EVENTS_FILE)
}

/// In-memory buffer of events, persisted as JSON lines.
#[derive(Debug, Default, Clone)]
pub struct EventLog {
    events: Vec<CatalogEvent>,
}

impl EventLog {
    pub fn new() -> Self {
        Self { events: Vec::new() }
    }

    pub fn record(&mut self, event: CatalogEvent) {
        self.events.push(event);
    }

    /// Record `event_type` about `subject`, stamped with the current time.
    pub fn emit(&mut self, subject: impl Into<String>, event_type: EventType) {
        self.record(CatalogEvent::now(subject, event_type));
    }

    /// Append every buffered event to `path`, creating it if needed.
    pub fn write_to_file(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create events dir {}", parent.display()))?;
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("failed to open events file {}", path.display()))?;
        let mut writer = BufWriter::new(file);

        for event in &self.events {
            let line = serde_json::to_string(event).context("failed to serialize event to JSON")?;
            writeln!(writer, "{line}").context("failed to write event line")?;
        }
        writer.flush().context("failed to flush events file")?;
        Ok(())
    }

    /// Append buffered events to `path` and empty the buffer.
    pub fn flush_to_file(&mut self, path: &Path) -> Result<()> {
        if self.events.is_empty() {
            return Ok(());
        }
        self.write_to_file(path)?;
        self.events.clear();
        Ok(())
    }

    /// Load every event of a JSONL file; a missing file is an empty log.
    pub fn read_from_file(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::new());
        }

        let file = File::open(path)
            .with_context(|| format!("failed to open events file {}", path.display()))?;
        let mut events = Vec::new();
        for (index, line) in BufReader::new(file).lines().enumerate() {
            let line = line.with_context(|| {
                format!("failed to read line from events file {}", path.display())
            })?;
            if line.trim().is_empty() {
                continue;
            }
            let event: CatalogEvent = serde_json::from_str(&line).with_context(|| {
                format!("failed to parse event on line {} of {}", index + 1, path.display())
            })?;
            events.push(event);
        }
        Ok(Self { events })
    }

    pub fn events_for_subject(&self, subject: &str) -> Vec<&CatalogEvent> {
        self.events.iter().filter(|e| e.subject == subject).collect()
    }

    /// Failure and rollback events, in recording order.
    pub fn failures(&self) -> Vec<&CatalogEvent> {
        self.events
            .iter()
            .filter(|e| {
                matches!(
                    e.event_type,
                    EventType::AssemblyFailed { .. } | EventType::RolledBack { .. }
                )
            })
            .collect()
    }

    pub fn all_events(&self) -> &[CatalogEvent] {
        &self.events
    }

    pub fn clear(&mut self) {
        self.events.clear();
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use patchline_types::AssemblyStage;
    use tempfile::tempdir;

    fn created(version: &str) -> CatalogEvent {
        CatalogEvent::now(
            version,
            EventType::VersionCreated {
                version: version.to_string(),
            },
        )
    }

    #[test]
    fn events_path_joins_state_dir() {
        assert_eq!(
            events_path(Path::new("state")),
            Path::new("state").join(EVENTS_FILE)
        );
    }

    #[test]
    fn write_appends_across_calls() {
        let td = tempdir().expect("tempdir");
        let path = events_path(&td.path().join("state"));

        let mut first = EventLog::new();
        first.record(created("1.0.0"));
        first.write_to_file(&path).expect("write");

        let mut second = EventLog::new();
        second.record(created("1.1.0"));
        second.write_to_file(&path).expect("write");

        let loaded = EventLog::read_from_file(&path).expect("read");
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded.all_events()[0].subject, "1.0.0");
        assert_eq!(loaded.all_events()[1].subject, "1.1.0");
    }

    #[test]
    fn flush_clears_buffer_and_skips_empty_logs() {
        let td = tempdir().expect("tempdir");
        let path = events_path(td.path());

        let mut log = EventLog::new();
        log.flush_to_file(&path).expect("flush empty");
        assert!(!path.exists());

        log.record(created("1.0.0"));
        log.flush_to_file(&path).expect("flush");
        assert!(log.is_empty());
        assert_eq!(EventLog::read_from_file(&path).expect("read").len(), 1);
    }

    #[test]
    fn missing_file_reads_as_empty() {
        let td = tempdir().expect("tempdir");
        let log = EventLog::read_from_file(&td.path().join("none.jsonl")).expect("read");
        assert!(log.is_empty());
    }

    #[test]
    fn corrupt_line_reports_line_number() {
        let td = tempdir().expect("tempdir");
        let path = events_path(td.path());
        let good = serde_json::to_string(&created("1.0.0")).expect("serialize");
        fs::write(&path, format!("{good}\n\n{{broken\n")).expect("write");

        let err = EventLog::read_from_file(&path).unwrap_err();
        assert!(err.to_string().contains("line 3"), "{err}");
    }

    #[test]
    fn failures_filters_failure_and_rollback_events() {
        let mut log = EventLog::new();
        log.record(created("1.0.0"));
        log.emit(
            "p",
            EventType::AssemblyFailed {
                stage: AssemblyStage::Persisted,
                message: "disk full".to_string(),
            },
        );
        log.emit(
            "p",
            EventType::RolledBack {
                path: PathBuf::from("out/p"),
                clean: true,
            },
        );

        assert_eq!(log.failures().len(), 2);
        assert_eq!(log.events_for_subject("p").len(), 2);
        log.clear();
        assert!(log.is_empty());
    }
}
