use std::collections::HashMap;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use serde::{Deserialize, Serialize};
use walkdir::WalkDir;
use crate::errors::AppError;

/// Reserved aggregate stream written by the parsing stage; it duplicates every
/// per-component stream and must never be iterated alongside them.
pub const AGGREGATE_STREAM: &str = "full";
pub const STREAM_EXT: &str = "parsed";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Severity { Critical, Error, Warning, Info, Notice }

impl Severity {
    pub fn from_letter(s: &str) -> Option<Severity> {
        match s.trim().to_ascii_uppercase().as_str() {
            "C" => Some(Severity::Critical),
            "E" => Some(Severity::Error),
            "W" => Some(Severity::Warning),
            "I" => Some(Severity::Info),
            "N" => Some(Severity::Notice),
            _ => None,
        }
    }
    pub fn letter(self) -> &'static str {
        match self { Severity::Critical => "C", Severity::Error => "E", Severity::Warning => "W", Severity::Info => "I", Severity::Notice => "N" }
    }
    pub fn color_code(self) -> &'static str {
        match self { Severity::Critical => "1;31", Severity::Error => "31", Severity::Warning => "33", Severity::Info => "34", Severity::Notice => "37" }
    }
}

/// One normalized log line: `timestamp|severity|sub-identifier:message...`.
/// The message may itself contain pipes, so field 3 onward is rejoined verbatim.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LogRecord {
    pub timestamp: String,
    pub severity: Severity,
    pub message: String,
}

impl LogRecord {
    pub fn parse(line: &str) -> Option<LogRecord> {
        let mut parts = line.splitn(3, '|');
        let timestamp = parts.next()?.to_string();
        let severity = Severity::from_letter(parts.next()?)?;
        let message = parts.next()?.to_string();
        if timestamp.is_empty() { return None; }
        Some(LogRecord { timestamp, severity, message })
    }
}

/// Read-only view over the directory of per-component `*.parsed` streams.
#[derive(Debug)]
pub struct ParsedStore {
    root: PathBuf,
}

impl ParsedStore {
    pub fn open(root: &Path) -> Result<ParsedStore, AppError> {
        if !root.is_dir() {
            return Err(AppError::NotFound(format!("parsed log store: {}", root.to_string_lossy())));
        }
        Ok(ParsedStore { root: root.to_path_buf() })
    }

    /// Stream names in filesystem listing order, aggregate stream excluded.
    pub fn stream_names(&self) -> Vec<String> {
        let mut names: Vec<String> = Vec::new();
        for de in WalkDir::new(&self.root).max_depth(1).into_iter().filter_map(Result::ok) {
            let p = de.path();
            if !p.is_file() { continue; }
            if p.extension().and_then(|e| e.to_str()).map(|s| s.eq_ignore_ascii_case(STREAM_EXT)).unwrap_or(false)
                && let Some(stem) = p.file_stem().and_then(|s| s.to_str())
                && !stem.eq_ignore_ascii_case(AGGREGATE_STREAM) {
                names.push(stem.to_string());
            }
        }
        names.sort();
        names
    }

    pub fn stream_path(&self, name: &str) -> PathBuf {
        self.root.join(format!("{}.{}", name, STREAM_EXT))
    }

    /// Raw lines of one stream, order preserved (chronological by construction).
    pub fn read_lines(&self, name: &str) -> Result<Vec<String>, AppError> {
        let f = std::fs::File::open(self.stream_path(name))?;
        let mut out = Vec::new();
        for line in BufReader::new(f).lines() {
            let line = line?;
            if !line.trim().is_empty() { out.push(line); }
        }
        Ok(out)
    }

    pub fn read_records(&self, name: &str) -> Result<Vec<LogRecord>, AppError> {
        Ok(self.read_lines(name)?.iter().filter_map(|l| LogRecord::parse(l)).collect())
    }
}

/// A previously detected problem instance awaiting signature classification.
/// Severity here is the detection stage's scale (CRITICAL/HIGH/MEDIUM/LOW),
/// not the single-letter log severity.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Issue {
    pub severity: String,
    pub component: String,
    pub title: String,
    pub description: String,
    pub evidence: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TimelineEvent {
    pub timestamp: String,
    pub severity: String,
    pub component: String,
    pub message: String,
}

fn tsv_reader(path: &Path) -> Result<csv::Reader<std::fs::File>, AppError> {
    Ok(csv::ReaderBuilder::new()
        .delimiter(b'\t')
        .has_headers(false)
        .flexible(true)
        .comment(Some(b'#'))
        .from_path(path)?)
}

fn field(rec: &csv::StringRecord, i: usize) -> String {
    rec.get(i).unwrap_or("").trim().to_string()
}

pub fn load_issues(path: &Path) -> Result<Vec<Issue>, AppError> {
    let mut out = Vec::new();
    if !path.is_file() {
        log::warn!("Issues store missing: {}", path.to_string_lossy());
        return Ok(out);
    }
    for rec in tsv_reader(path)?.records() {
        let rec = rec?;
        if rec.len() < 3 || field(&rec, 0).is_empty() { continue; }
        out.push(Issue {
            severity: field(&rec, 0),
            component: field(&rec, 1),
            title: field(&rec, 2),
            description: field(&rec, 3),
            evidence: field(&rec, 4),
        });
    }
    Ok(out)
}

pub fn load_timeline(path: &Path) -> Result<Vec<TimelineEvent>, AppError> {
    let mut out = Vec::new();
    if !path.is_file() {
        log::warn!("Timeline store missing: {}", path.to_string_lossy());
        return Ok(out);
    }
    for rec in tsv_reader(path)?.records() {
        let rec = rec?;
        if rec.len() < 3 || field(&rec, 0).is_empty() { continue; }
        out.push(TimelineEvent {
            timestamp: field(&rec, 0),
            severity: field(&rec, 1),
            component: field(&rec, 2),
            message: field(&rec, 3),
        });
    }
    Ok(out)
}

/// Optional `component \t status-label` table produced by the health stage.
pub fn load_status_labels(path: &Path) -> HashMap<String, String> {
    let mut out = HashMap::new();
    if !path.is_file() {
        log::warn!("Status label store missing: {}", path.to_string_lossy());
        return out;
    }
    let Ok(mut rdr) = tsv_reader(path) else { return out };
    for rec in rdr.records().flatten() {
        let name = field(&rec, 0);
        let label = field(&rec, 1);
        if !name.is_empty() && !label.is_empty() { out.insert(name.to_lowercase(), label); }
    }
    out
}
