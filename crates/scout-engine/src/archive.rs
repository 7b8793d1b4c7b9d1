//! Append-only CSV archive of every trial.
//!
//! The header is fixed by the study definition: `trial_id`, one column per
//! decision variable, one per declared metric (plus `_var` columns), then
//! the status fields. A reused file whose header differs is rotated aside;
//! a matching header means append. Rows are flushed immediately so the
//! archive survives aborts mid-exploration.

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use tracing::{info, warn};

use scout_optimizer::TrialRecord;
use scout_space::SearchSpace;
use scout_types::{ArchiveError, MetricColumn};

pub struct Archive {
    writer: csv::Writer<File>,
    header: Vec<String>,
    decision_names: Vec<String>,
    metric_names: Vec<String>,
    path: PathBuf,
}

impl Archive {
    /// The exact header row for a study.
    pub fn header_for(space: &SearchSpace, columns: &[MetricColumn]) -> Vec<String> {
        let mut header = vec!["trial_id".to_string()];
        header.extend(space.names().iter().map(|n| n.to_string()));
        for column in columns {
            header.push(column.name.clone());
            if column.var {
                header.push(format!("{}_var", column.name));
            }
        }
        header.extend(
            ["build_status", "run_status", "wallclock_s", "error"]
                .iter()
                .map(|s| s.to_string()),
        );
        header
    }

    /// Open (or create) the archive at `path` for this study.
    pub fn open(
        path: impl AsRef<Path>,
        space: &SearchSpace,
        columns: &[MetricColumn],
    ) -> Result<Self, ArchiveError> {
        let path = path.as_ref().to_path_buf();
        let header = Self::header_for(space, columns);
        let expected_line = header_line(&header)?;

        let mut write_header = true;
        if path.exists() {
            let existing = first_line(&path).unwrap_or_default();
            if existing == expected_line {
                write_header = false;
                info!(path = %path.display(), "appending to existing archive");
            } else {
                let rotated = rotate_path(&path);
                std::fs::rename(&path, &rotated).map_err(|e| ArchiveError::Rotate {
                    path: path.display().to_string(),
                    message: e.to_string(),
                })?;
                warn!(
                    old = %rotated.display(),
                    "archive header mismatch, rotated stale archive"
                );
            }
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| ArchiveError::Open {
                path: path.display().to_string(),
                message: e.to_string(),
            })?;
        let mut writer = csv::WriterBuilder::new().from_writer(file);

        if write_header {
            writer
                .write_record(&header)
                .and_then(|()| writer.flush().map_err(Into::into))
                .map_err(|e| ArchiveError::Write(e.to_string()))?;
        }

        let decision_names = space.names().iter().map(|n| n.to_string()).collect();
        let mut metric_names = Vec::new();
        for column in columns {
            metric_names.push(column.name.clone());
            if column.var {
                metric_names.push(format!("{}_var", column.name));
            }
        }

        Ok(Self {
            writer,
            header,
            decision_names,
            metric_names,
            path,
        })
    }

    pub fn header(&self) -> &[String] {
        &self.header
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one finalized trial and flush.
    pub fn append(&mut self, record: &TrialRecord) -> Result<(), ArchiveError> {
        let mut row: Vec<String> = Vec::with_capacity(self.header.len());
        row.push(record.trial_id.to_string());

        // Inactive decisions render as the empty-field sentinel.
        for name in &self.decision_names {
            row.push(
                record
                    .assignment
                    .active(name)
                    .map(|v| v.render())
                    .unwrap_or_default(),
            );
        }
        for name in &self.metric_names {
            row.push(
                record
                    .aggregated
                    .get(name)
                    .map(|v| v.to_string())
                    .unwrap_or_default(),
            );
        }
        row.push(record.build_status.as_str().to_string());
        row.push(record.run_status.as_str().to_string());
        row.push(format!("{:.3}", record.wallclock_s));
        row.push(match &record.failure {
            Some(failure) if failure.message.is_empty() => failure.code.as_str().to_string(),
            Some(failure) => format!("{}: {}", failure.code.as_str(), failure.message),
            None => String::new(),
        });

        self.writer
            .write_record(&row)
            .and_then(|()| self.writer.flush().map_err(Into::into))
            .map_err(|e| ArchiveError::Write(e.to_string()))
    }
}

fn header_line(header: &[String]) -> Result<String, ArchiveError> {
    let mut writer = csv::WriterBuilder::new().from_writer(Vec::new());
    writer
        .write_record(header)
        .map_err(|e| ArchiveError::Write(e.to_string()))?;
    let bytes = writer
        .into_inner()
        .map_err(|e| ArchiveError::Write(e.to_string()))?;
    Ok(String::from_utf8_lossy(&bytes).trim_end().to_string())
}

fn first_line(path: &Path) -> Option<String> {
    let file = File::open(path).ok()?;
    let mut line = String::new();
    BufReader::new(file).read_line(&mut line).ok()?;
    Some(line.trim_end().to_string())
}

fn rotate_path(path: &Path) -> PathBuf {
    let ts = chrono::Utc::now().timestamp();
    PathBuf::from(format!("{}.{ts}.bak", path.display()))
}
