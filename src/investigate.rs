use std::collections::HashMap;
use std::sync::OnceLock;
use regex::Regex;
use serde::Serialize;
use crate::errors::AppError;
use crate::signatures::{SignatureDb, SignatureRecord};
use crate::store::{Issue, ParsedStore, Severity, TimelineEvent};

pub const TIMELINE_DISPLAY_CAP: usize = 15;
pub const TOP_CLUSTERS: usize = 10;

#[derive(Clone, Debug, Serialize)]
pub struct ComponentHealth {
    pub component: String,
    pub total: usize,
    pub critical: usize,
    pub errors: usize,
    pub warnings: usize,
    pub info: usize,
    pub status: Option<String>,
    pub first_seen: Option<String>,
    pub last_seen: Option<String>,
    pub issues_by_severity: Vec<(String, Vec<Issue>)>,
    pub timeline: Vec<TimelineEvent>,
    pub timeline_overflow: usize,
    pub top_clusters: Vec<(String, usize)>,
    pub signature_hints: Vec<SignatureRecord>,
}

/// Collapses messages differing only in IDs, counters and addresses into one
/// signature class. Hex literals are replaced before bare digit runs so the
/// digits inside `0x...` do not degrade to `<N>`. Idempotent: the placeholders
/// contain neither digits nor hex literals.
pub fn normalize_message(msg: &str) -> String {
    static HEX: OnceLock<Regex> = OnceLock::new();
    static NUM: OnceLock<Regex> = OnceLock::new();
    let hex = HEX.get_or_init(|| Regex::new(r"0x[0-9a-fA-F]+").unwrap());
    let num = NUM.get_or_init(|| Regex::new(r"[0-9]+").unwrap());
    let s = hex.replace_all(msg, "<HEX>");
    num.replace_all(&s, "<N>").into_owned()
}

/// Exact case-insensitive stream-name match first, then substring.
pub fn resolve_component(streams: &[String], query: &str) -> Option<String> {
    let q = query.to_lowercase();
    streams.iter().find(|s| s.to_lowercase() == q)
        .or_else(|| streams.iter().find(|s| s.to_lowercase().contains(&q)))
        .cloned()
}

pub fn investigate(
    store: &ParsedStore,
    db: &SignatureDb,
    issues: &[Issue],
    timeline: &[TimelineEvent],
    status_labels: &HashMap<String, String>,
    query: &str,
) -> Result<ComponentHealth, AppError> {
    let streams = store.stream_names();
    let Some(component) = resolve_component(&streams, query) else {
        return Err(AppError::NotFound(format!(
            "component '{}' (available: {})", query, streams.join(", "))));
    };
    let records = store.read_records(&component)?;

    let mut critical = 0;
    let mut errors = 0;
    let mut warnings = 0;
    let mut info = 0;
    for r in &records {
        match r.severity {
            Severity::Critical => critical += 1,
            Severity::Error => errors += 1,
            Severity::Warning => warnings += 1,
            Severity::Info => info += 1,
            Severity::Notice => {}
        }
    }

    // Frequency-ranked clusters over error/critical messages; ties keep
    // encounter order.
    let mut counts: HashMap<String, (usize, usize)> = HashMap::new();
    let mut order = 0usize;
    for r in &records {
        if !matches!(r.severity, Severity::Error | Severity::Critical) { continue; }
        let key = normalize_message(&r.message);
        let e = counts.entry(key).or_insert_with(|| { order += 1; (0, order) });
        e.0 += 1;
    }
    let mut top_clusters: Vec<(String, usize, usize)> = counts.into_iter().map(|(k, (n, o))| (k, n, o)).collect();
    top_clusters.sort_by(|a, b| b.1.cmp(&a.1).then(a.2.cmp(&b.2)));
    let top_clusters: Vec<(String, usize)> = top_clusters.into_iter().take(TOP_CLUSTERS).map(|(k, n, _)| (k, n)).collect();

    let comp_lower = component.to_lowercase();
    let related = |name: &str| {
        let n = name.to_lowercase();
        n.contains(&comp_lower) || comp_lower.contains(&n)
    };
    let mut by_sev: Vec<(String, Vec<Issue>)> = Vec::new();
    for issue in issues.iter().filter(|i| related(&i.component)) {
        match by_sev.iter_mut().find(|(s, _)| *s == issue.severity) {
            Some((_, v)) => v.push(issue.clone()),
            None => by_sev.push((issue.severity.clone(), vec![issue.clone()])),
        }
    }

    let mut related_events: Vec<TimelineEvent> = timeline.iter().filter(|t| related(&t.component)).cloned().collect();
    let timeline_overflow = related_events.len().saturating_sub(TIMELINE_DISPLAY_CAP);
    related_events.truncate(TIMELINE_DISPLAY_CAP);

    Ok(ComponentHealth {
        total: records.len(),
        critical,
        errors,
        warnings,
        info,
        status: status_labels.get(&comp_lower).cloned(),
        first_seen: records.first().map(|r| r.timestamp.clone()),
        last_seen: records.last().map(|r| r.timestamp.clone()),
        issues_by_severity: by_sev,
        timeline: related_events,
        timeline_overflow,
        top_clusters,
        signature_hints: db.for_component(&component).into_iter().cloned().collect(),
        component,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn fixture(name: &str, streams: &[(&str, &str)]) -> (PathBuf, ParsedStore) {
        let d = std::env::temp_dir().join(format!("chargedoctor-inv-{}", name));
        let _ = std::fs::remove_dir_all(&d);
        std::fs::create_dir_all(&d).unwrap();
        for (stream, body) in streams {
            std::fs::write(d.join(format!("{}.parsed", stream)), body).unwrap();
        }
        let store = ParsedStore::open(&d).unwrap();
        (d, store)
    }

    fn empty_db() -> SignatureDb {
        SignatureDb { signatures: vec![], registry: vec![] }
    }

    #[test]
    fn normalization_collapses_ids_and_is_idempotent() {
        let a = normalize_message("session 1234 failed at 0xdeadBEEF after 17 retries");
        assert_eq!(a, "session <N> failed at <HEX> after <N> retries");
        assert_eq!(normalize_message(&a), a);
    }

    #[test]
    fn clusters_rank_by_frequency_with_stable_ties() {
        let body = "\
2024-01-01T10:00|E|a:retry 1 failed\n\
2024-01-01T10:01|E|a:retry 2 failed\n\
2024-01-01T10:02|E|a:socket closed by peer 10\n\
2024-01-01T10:03|E|a:retry 3 failed\n\
2024-01-01T10:04|C|a:watchdog bite\n\
2024-01-01T10:05|I|a:retry 4 failed\n";
        let (d, store) = fixture("clusters", &[("App", body)]);
        let h = investigate(&store, &empty_db(), &[], &[], &HashMap::new(), "app").unwrap();
        assert_eq!(h.top_clusters[0], ("a:retry <N> failed".to_string(), 3));
        // Tie between the two singletons resolves in encounter order.
        assert_eq!(h.top_clusters[1].0, "a:socket closed by peer <N>");
        assert_eq!(h.top_clusters[2].0, "a:watchdog bite");
        let _ = std::fs::remove_dir_all(&d);
    }

    #[test]
    fn counts_and_span_come_from_the_stream() {
        let body = "\
2024-01-01T09:00|I|a:boot\n\
2024-01-01T10:00|W|a:slow\n\
2024-01-01T11:00|E|a:fail\n\
2024-01-01T12:00|C|a:dead\n";
        let (d, store) = fixture("counts", &[("App", body)]);
        let h = investigate(&store, &empty_db(), &[], &[], &HashMap::new(), "App").unwrap();
        assert_eq!((h.total, h.critical, h.errors, h.warnings, h.info), (4, 1, 1, 1, 1));
        assert_eq!(h.first_seen.as_deref(), Some("2024-01-01T09:00"));
        assert_eq!(h.last_seen.as_deref(), Some("2024-01-01T12:00"));
        let _ = std::fs::remove_dir_all(&d);
    }

    #[test]
    fn exact_match_beats_substring() {
        let (d, store) = fixture("resolve", &[
            ("EVCC", "2024-01-01T10:00|I|a:x\n"),
            ("EVCC_backup", "2024-01-01T10:00|I|a:x\n"),
        ]);
        let h = investigate(&store, &empty_db(), &[], &[], &HashMap::new(), "evcc").unwrap();
        assert_eq!(h.component, "EVCC");
        let _ = std::fs::remove_dir_all(&d);
    }

    #[test]
    fn unknown_component_lists_available_streams() {
        let (d, store) = fixture("unknown", &[("MQTT", "2024-01-01T10:00|I|a:x\n")]);
        let err = investigate(&store, &empty_db(), &[], &[], &HashMap::new(), "nosuch").unwrap_err();
        assert_eq!(err.exit_code(), 3);
        assert!(err.to_string().contains("MQTT"));
        let _ = std::fs::remove_dir_all(&d);
    }

    #[test]
    fn timeline_caps_at_fifteen_with_overflow_count() {
        let (d, store) = fixture("timeline", &[("MQTT", "2024-01-01T10:00|I|a:x\n")]);
        let events: Vec<TimelineEvent> = (0..20).map(|i| TimelineEvent {
            timestamp: format!("2024-01-01T10:{:02}", i),
            severity: "E".to_string(),
            component: "MQTT".to_string(),
            message: "m".to_string(),
        }).collect();
        let h = investigate(&store, &empty_db(), &[], &events, &HashMap::new(), "MQTT").unwrap();
        assert_eq!(h.timeline.len(), 15);
        assert_eq!(h.timeline_overflow, 5);
        let _ = std::fs::remove_dir_all(&d);
    }

    #[test]
    fn related_issues_group_by_severity() {
        let (d, store) = fixture("issues", &[("MQTT", "2024-01-01T10:00|I|a:x\n")]);
        let issues = vec![
            Issue { severity: "HIGH".to_string(), component: "MQTT".to_string(), title: "a".to_string(), description: String::new(), evidence: String::new() },
            Issue { severity: "LOW".to_string(), component: "mqtt".to_string(), title: "b".to_string(), description: String::new(), evidence: String::new() },
            Issue { severity: "HIGH".to_string(), component: "EVCC".to_string(), title: "c".to_string(), description: String::new(), evidence: String::new() },
        ];
        let h = investigate(&store, &empty_db(), &issues, &[], &HashMap::new(), "MQTT").unwrap();
        let high = h.issues_by_severity.iter().find(|(s, _)| s == "HIGH").unwrap();
        assert_eq!(high.1.len(), 1);
        assert_eq!(h.issues_by_severity.iter().map(|(_, v)| v.len()).sum::<usize>(), 2);
        let _ = std::fs::remove_dir_all(&d);
    }
}
