use comfy_table::{ContentArrangement, Table};
use serde::Serialize;
use crate::signatures::MatchResult;

#[derive(Clone, Copy, Debug, Serialize)]
pub struct MatchSummary {
    pub known: usize,
    pub unknown: usize,
}

pub fn summarize(results: &[MatchResult]) -> MatchSummary {
    let known = results.iter().filter(|r| r.matched).count();
    MatchSummary { known, unknown: results.len() - known }
}

fn status(r: &MatchResult) -> &'static str {
    if r.matched { "KNOWN" } else { "UNKNOWN" }
}

fn or_dash(v: &Option<String>) -> &str {
    v.as_deref().filter(|s| !s.is_empty()).unwrap_or("-")
}

/// Tabular text fragment. All three emitters consume the same classified
/// results, so the per-issue verdicts can never diverge between formats.
pub fn render_text(results: &[MatchResult]) -> String {
    let s = summarize(results);
    let mut table = Table::new();
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec!["Severity", "Component", "Title", "Status", "Root Cause", "Fix"]);
    for r in results {
        table.add_row(vec![
            r.issue.severity.as_str(),
            r.issue.component.as_str(),
            r.issue.title.as_str(),
            status(r),
            or_dash(&r.root_cause),
            or_dash(&r.fix),
        ]);
    }
    format!("Signature matches: {} known, {} unknown\n{}\n", s.known, s.unknown, table)
}

fn md_escape(s: &str) -> String {
    s.replace('|', "\\|").replace('\n', " ")
}

pub fn render_markdown(results: &[MatchResult]) -> String {
    let s = summarize(results);
    let mut out = String::new();
    out.push_str("## Signature Matches\n\n");
    out.push_str(&format!("_Generated {}_\n\n", chrono::Local::now().format("%Y-%m-%d %H:%M")));
    out.push_str(&format!("{} known, {} unknown\n\n", s.known, s.unknown));
    out.push_str("| Severity | Component | Title | Status | Root Cause | Fix |\n");
    out.push_str("|---|---|---|---|---|---|\n");
    for r in results {
        out.push_str(&format!(
            "| {} | {} | {} | {} | {} | {} |\n",
            md_escape(&r.issue.severity),
            md_escape(&r.issue.component),
            md_escape(&r.issue.title),
            status(r),
            md_escape(or_dash(&r.root_cause)),
            md_escape(or_dash(&r.fix)),
        ));
    }
    out
}

#[derive(Serialize)]
struct JsonRow<'a> {
    severity: &'a str,
    component: &'a str,
    title: &'a str,
    status: &'a str,
    root_cause: &'a str,
    fix: &'a str,
}

pub fn render_json(results: &[MatchResult]) -> String {
    let s = summarize(results);
    let rows: Vec<JsonRow> = results.iter().map(|r| JsonRow {
        severity: &r.issue.severity,
        component: &r.issue.component,
        title: &r.issue.title,
        status: status(r),
        root_cause: or_dash(&r.root_cause),
        fix: or_dash(&r.fix),
    }).collect();
    serde_json::to_string_pretty(&serde_json::json!({
        "summary": s,
        "issues": rows,
    })).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::Issue;

    fn result(title: &str, matched: bool) -> MatchResult {
        MatchResult {
            issue: Issue { severity: "HIGH".to_string(), component: "MQTT".to_string(), title: title.to_string(), description: String::new(), evidence: String::new() },
            matched,
            root_cause: matched.then(|| "broker down".to_string()),
            fix: matched.then(|| "restart uplink".to_string()),
        }
    }

    #[test]
    fn all_formats_agree_on_classification() {
        let results = vec![result("MQTT Connection Failure", true), result("Mystery reboot", false)];
        let text = render_text(&results);
        let md = render_markdown(&results);
        let json = render_json(&results);
        for out in [&text, &md, &json] {
            assert!(out.contains("KNOWN"));
            assert!(out.contains("UNKNOWN"));
        }
        assert!(text.contains("1 known, 1 unknown"));
        assert!(md.contains("1 known, 1 unknown"));
        let v: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(v["summary"]["known"], 1);
        assert_eq!(v["issues"][0]["status"], "KNOWN");
        assert_eq!(v["issues"][1]["status"], "UNKNOWN");
    }

    #[test]
    fn markdown_escapes_pipes_in_text() {
        let mut r = result("state=B|pwm=5%", false);
        r.issue.description = String::new();
        let md = render_markdown(&[r]);
        assert!(md.contains("state=B\\|pwm=5%"));
    }

    #[test]
    fn empty_results_render_header_only() {
        let json = render_json(&[]);
        let v: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(v["summary"]["known"], 0);
        assert_eq!(v["issues"].as_array().unwrap().len(), 0);
    }
}
