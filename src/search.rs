use std::io::Write;
use std::path::Path;
use regex::{Regex, RegexBuilder, escape};
use serde::Serialize;
use crate::errors::AppError;
use crate::store::{LogRecord, ParsedStore, Severity};

pub const DEFAULT_MAX_RESULTS: usize = 200;

#[derive(Clone, Debug)]
pub struct SearchOptions {
    pub pattern: String,
    pub severity: Option<Severity>,
    pub component: Option<String>,
    pub after: Option<String>,
    pub before: Option<String>,
    pub context: usize,
    pub regex_mode: bool,
    pub connector: Option<u32>,
    pub max_results: usize,
}

impl Default for SearchOptions {
    fn default() -> Self {
        SearchOptions {
            pattern: String::new(),
            severity: None,
            component: None,
            after: None,
            before: None,
            context: 0,
            regex_mode: false,
            connector: None,
            max_results: DEFAULT_MAX_RESULTS,
        }
    }
}

/// One element of the result stream. Separators mark discontiguous context
/// windows; they never count against the result cap.
#[derive(Clone, Debug, Serialize)]
pub enum SearchRow {
    Match { component: String, record: LogRecord },
    Separator,
}

/// Different firmware subsystems tag the same physical connector differently,
/// so a connector number expands to an alternation of the known conventions.
/// Only connectors 1 and 2 have the full set; other numbers fall back to the
/// two generic spellings.
pub fn connector_pattern(n: u32) -> String {
    match n {
        1 => r"connector=1|evseId=1|evse_1|Connector\[0\]".to_string(),
        2 => r"connector=2|evseId=2|evse_2|Connector\[1\]".to_string(),
        n => format!("connector={}|evseId={}", n, n),
    }
}

fn build_matcher(pattern: &str, regex_mode: bool) -> Result<Regex, AppError> {
    let src = if regex_mode { pattern.to_string() } else { escape(pattern) };
    Ok(RegexBuilder::new(&src).case_insensitive(true).build()?)
}

fn in_time_range(ts: &str, after: Option<&str>, before: Option<&str>) -> bool {
    // Inclusive on both ends; valid because the timestamp format is
    // fixed-width and zero-padded, so lexicographic order is chronological.
    if let Some(a) = after && ts < a { return false; }
    if let Some(b) = before && ts > b { return false; }
    true
}

/// Scans every per-component stream under the cap, returning matches (plus
/// requested context windows) annotated with the owning component name.
pub fn run_search(store: &ParsedStore, opts: &SearchOptions, progress: bool) -> Result<Vec<SearchRow>, AppError> {
    if opts.pattern.trim().is_empty() {
        return Err(AppError::InvalidArgument("search pattern must not be empty".to_string()));
    }
    let matcher = build_matcher(&opts.pattern, opts.regex_mode)?;
    let connector_re = match opts.connector {
        Some(n) => Some(RegexBuilder::new(&connector_pattern(n)).case_insensitive(true).build()?),
        None => None,
    };
    let pb = if progress { Some(indicatif::ProgressBar::new_spinner()) } else { None };
    let mut rows: Vec<SearchRow> = Vec::new();
    let mut count = 0usize;
    'streams: for name in store.stream_names() {
        if let Some(c) = opts.component.as_ref()
            && !name.to_lowercase().contains(&c.to_lowercase()) {
            continue;
        }
        if let Some(ref pb) = pb { pb.set_message(format!("Scanning {}", name)); pb.tick(); }
        let lines = store.read_lines(&name)?;

        // Primary match plus row-level severity/time filters select anchors;
        // anchors then expand to ±context windows.
        let mut anchors: Vec<usize> = Vec::new();
        for (i, line) in lines.iter().enumerate() {
            if !matcher.is_match(line) { continue; }
            if let Some(re) = connector_re.as_ref() && !re.is_match(line) { continue; }
            let Some(rec) = LogRecord::parse(line) else { continue };
            if let Some(sev) = opts.severity && rec.severity != sev { continue; }
            if !in_time_range(&rec.timestamp, opts.after.as_deref(), opts.before.as_deref()) { continue; }
            anchors.push(i);
        }

        if opts.context == 0 {
            for &a in &anchors {
                if let Some(rec) = LogRecord::parse(&lines[a]) {
                    rows.push(SearchRow::Match { component: name.clone(), record: rec });
                    count += 1;
                    if count >= opts.max_results { break 'streams; }
                }
            }
            continue;
        }
        let mut prev_end: Option<usize> = None;
        for &a in &anchors {
            let start = a.saturating_sub(opts.context);
            let end = (a + opts.context).min(lines.len().saturating_sub(1));
            let from = match prev_end {
                // Overlapping or adjacent windows fuse; a gap gets a separator.
                Some(pe) if start <= pe + 1 => {
                    if start <= pe && pe >= end { continue; }
                    pe + 1
                }
                Some(_) => { rows.push(SearchRow::Separator); start }
                None => start,
            };
            for i in from..=end {
                if let Some(rec) = LogRecord::parse(&lines[i]) {
                    rows.push(SearchRow::Match { component: name.clone(), record: rec });
                    count += 1;
                    if count >= opts.max_results { break 'streams; }
                }
            }
            prev_end = Some(end);
        }
        if !anchors.is_empty() { rows.push(SearchRow::Separator); }
    }
    if let Some(pb) = pb { pb.finish_and_clear(); }
    // A trailing separator carries no window after it.
    while matches!(rows.last(), Some(SearchRow::Separator)) { rows.pop(); }
    Ok(rows)
}

/// Copies rows verbatim (untruncated) before display. Separators export as a
/// short rule so context windows stay readable.
pub fn export_rows(path: &Path, rows: &[SearchRow]) -> Result<(), AppError> {
    let mut f = std::fs::File::create(path)?;
    for row in rows {
        match row {
            SearchRow::Match { component, record } => {
                writeln!(f, "{}|{}|{}|{}", record.timestamp, record.severity.letter(), component, record.message)?;
            }
            SearchRow::Separator => writeln!(f, "--")?,
        }
    }
    Ok(())
}

pub fn match_count(rows: &[SearchRow]) -> usize {
    rows.iter().filter(|r| matches!(r, SearchRow::Match { .. })).count()
}
