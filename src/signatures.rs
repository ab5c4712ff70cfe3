use std::io::Write;
use std::path::Path;
use regex::RegexBuilder;
use serde::{Deserialize, Serialize};
use crate::errors::AppError;
use crate::store::Issue;

pub const ONSITE_MARKER: &str = "[On-site service required]";

/// Curated pattern-to-diagnosis record. Store order defines match precedence:
/// the first satisfying record wins, independent of specificity.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SignatureRecord {
    pub pattern: String,
    pub component: String,
    pub severity: String,
    pub title: String,
    pub root_cause: String,
    pub fix: String,
    pub kb_url: String,
}

/// Official error-code registry entry; enrichment only, never primary curation.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RegistryRecord {
    pub module: String,
    pub code: String,
    pub error_type: String,
    pub name: String,
    pub description: String,
    pub troubleshooting: String,
    pub onsite_required: bool,
    pub severity: String,
}

/// Per-issue verdict of one matching pass. Transient, never persisted.
#[derive(Clone, Debug, Serialize)]
pub struct MatchResult {
    pub issue: Issue,
    pub matched: bool,
    pub root_cause: Option<String>,
    pub fix: Option<String>,
}

const SEED_SIGNATURES: &[[&str; 7]] = &[
    ["MQTT.*fail", "MQTT", "HIGH", "MQTT broker connection failure", "AWS IoT Core connection interrupted (network outage, DNS failure, or expired credentials)", "Check uplink connectivity and broker endpoint, then verify the device certificate is not expired", "KB-1001"],
    ["connection refused", "Network", "HIGH", "TCP connection refused", "Remote service not listening or firewall rejecting the port", "Confirm the target service is up and the port is reachable from the device", "KB-1002"],
    ["DNS.*(fail|timeout)", "Network", "MEDIUM", "DNS resolution failure", "Resolver unreachable or upstream DNS outage", "Check /etc/resolv.conf and test resolution of the backend hostname", "KB-1003"],
    ["no route to host|network unreachable", "Network", "HIGH", "Network unreachable", "Uplink down or default route missing", "Inspect the cellular/ethernet uplink and routing table", "KB-1004"],
    ["relay.*(stuck|welded)", "ChargerApp", "CRITICAL", "Charging relay fault", "Main contactor stuck or welded; output may remain energized", "Stop charging sessions and schedule contactor replacement", "KB-1010"],
    ["overcurrent|over-current", "ChargerApp", "CRITICAL", "Overcurrent trip", "Load exceeded the configured current limit or a metering fault fired", "Review charge current limits and inspect the EV-side cable", "KB-1011"],
    ["cp.?state.*(E|F)|pilot fault", "EVCC", "HIGH", "Control pilot fault", "Control pilot measured state E/F: short, diode fault, or cable damage", "Inspect the charging cable and connector pins for damage", "KB-1012"],
    ["certificate.*(expire|invalid)|x509", "Security", "HIGH", "TLS certificate problem", "Device or server certificate expired or failed validation", "Renew the certificate and confirm the device clock is correct", "KB-1020"],
    ["OCPP.*(reject|timeout)", "OCPP", "MEDIUM", "OCPP transaction problem", "Central system rejected or did not answer an OCPP call", "Compare the OCPP message log with the backend's accepted profile", "KB-1030"],
    ["out of memory|oom-killer", "System", "CRITICAL", "Out of memory", "A process exhausted device memory and was killed", "Identify the leaking process and consider a watchdog restart policy", "KB-1040"],
    ["(watchdog|WDT).*(reset|timeout)", "System", "HIGH", "Watchdog reset", "Main application stalled long enough to trip the hardware watchdog", "Pull the core dump if present and review the last task trace", "KB-1041"],
    ["kernel panic|Oops:", "Kernel", "CRITICAL", "Kernel fault", "Kernel panicked or oopsed; device likely rebooted", "Capture the full kernel ring buffer and match against known firmware issues", "KB-1050"],
];

/// Both knowledge sources behind one handle so every caller (interactive
/// display, report emitters, investigator) shares the identical match logic.
pub struct SignatureDb {
    pub signatures: Vec<SignatureRecord>,
    pub registry: Vec<RegistryRecord>,
}

/// Writes the built-in seed set when no signature store exists. Idempotent:
/// an existing file, even an empty one, is left untouched.
pub fn ensure_seeded(path: &Path) -> Result<bool, AppError> {
    if path.is_file() { return Ok(false); }
    if let Some(dir) = path.parent() && !dir.as_os_str().is_empty() {
        std::fs::create_dir_all(dir)?;
    }
    let mut f = std::fs::File::create(path)?;
    writeln!(f, "# pattern\tcomponent\tseverity\ttitle\troot_cause\tfix\tkb_url")?;
    for s in SEED_SIGNATURES {
        writeln!(f, "{}", s.join("\t"))?;
    }
    log::info!("Seeded default signature store: {}", path.to_string_lossy());
    Ok(true)
}

pub fn append_signature(path: &Path, rec: &SignatureRecord) -> Result<(), AppError> {
    if rec.pattern.trim().is_empty() {
        return Err(AppError::InvalidArgument("signature pattern must not be empty".to_string()));
    }
    let mut f = std::fs::OpenOptions::new().create(true).append(true).open(path)?;
    writeln!(f, "{}\t{}\t{}\t{}\t{}\t{}\t{}",
        rec.pattern, rec.component, rec.severity, rec.title, rec.root_cause, rec.fix, rec.kb_url)?;
    Ok(())
}

fn tsv_records(path: &Path) -> Result<Vec<csv::StringRecord>, AppError> {
    let mut rdr = csv::ReaderBuilder::new()
        .delimiter(b'\t')
        .has_headers(false)
        .flexible(true)
        .comment(Some(b'#'))
        .from_path(path)?;
    let mut out = Vec::new();
    for rec in rdr.records() { out.push(rec?); }
    Ok(out)
}

fn field(rec: &csv::StringRecord, i: usize) -> String {
    rec.get(i).unwrap_or("").trim().to_string()
}

pub fn load_signatures(path: &Path) -> Result<Vec<SignatureRecord>, AppError> {
    let mut out = Vec::new();
    for rec in tsv_records(path)? {
        let pattern = field(&rec, 0);
        if pattern.is_empty() { continue; }
        out.push(SignatureRecord {
            pattern,
            component: field(&rec, 1),
            severity: field(&rec, 2),
            title: field(&rec, 3),
            root_cause: field(&rec, 4),
            fix: field(&rec, 5),
            kb_url: field(&rec, 6),
        });
    }
    Ok(out)
}

pub fn load_registry(path: &Path) -> Result<Vec<RegistryRecord>, AppError> {
    let mut out = Vec::new();
    for rec in tsv_records(path)? {
        let module = field(&rec, 0);
        // The official table ships with a header row naming its first column.
        if module.is_empty() || module.eq_ignore_ascii_case("module") { continue; }
        out.push(RegistryRecord {
            module,
            code: field(&rec, 1),
            error_type: field(&rec, 2),
            name: field(&rec, 3),
            description: field(&rec, 4),
            troubleshooting: field(&rec, 5),
            onsite_required: field(&rec, 6).eq_ignore_ascii_case("true"),
            severity: field(&rec, 7),
        });
    }
    Ok(out)
}

impl SignatureDb {
    /// Loads both stores; a missing registry or signature file degrades to an
    /// empty source with a warning rather than failing the run.
    pub fn open(sig_path: &Path, reg_path: &Path) -> SignatureDb {
        let signatures = match load_signatures(sig_path) {
            Ok(s) => s,
            Err(e) => { log::warn!("Signature store unavailable ({}): {}", sig_path.to_string_lossy(), e); Vec::new() }
        };
        let registry = match load_registry(reg_path) {
            Ok(r) => r,
            Err(e) => { log::warn!("Error registry unavailable ({}): {}", reg_path.to_string_lossy(), e); Vec::new() }
        };
        if signatures.is_empty() && registry.is_empty() {
            log::warn!("No knowledge base available; all issues will classify as unknown");
        }
        SignatureDb { signatures, registry }
    }

    fn first_signature_hit(&self, text: &str) -> Option<&SignatureRecord> {
        let text_lower = text.to_lowercase();
        self.signatures.iter().find(|s| {
            match RegexBuilder::new(&s.pattern).case_insensitive(true).build() {
                Ok(re) => re.is_match(text),
                // Patterns that are not valid regexes still work as plain substrings.
                Err(_) => text_lower.contains(&s.pattern.to_lowercase()),
            }
        })
    }

    fn first_registry_hit(&self, text_lower: &str) -> Option<&RegistryRecord> {
        self.registry.iter().find(|r| !r.name.is_empty() && text_lower.contains(&r.name.to_lowercase()))
    }

    /// Two-source classification: signature store decides the primary verdict,
    /// the registry pass always runs for enrichment and can supply a verdict
    /// when the signature store is silent.
    pub fn classify(&self, issue: &Issue) -> MatchResult {
        let text = format!("{} {}", issue.title, issue.description);
        let sig = self.first_signature_hit(&text);
        let reg = self.first_registry_hit(&text.to_lowercase());

        let mut root_cause = sig.map(|s| s.root_cause.clone()).filter(|s| !s.is_empty());
        if root_cause.is_none()
            && let Some(r) = reg {
            root_cause = Some(format!("{} ({})", r.description, r.module));
        }

        let mut fix = sig.map(|s| s.fix.clone()).filter(|s| !s.is_empty());
        if let Some(r) = reg && !r.troubleshooting.is_empty() {
            match fix.as_mut() {
                None => fix = Some(r.troubleshooting.clone()),
                Some(f) => {
                    let probe: String = r.troubleshooting.chars().take(30).collect();
                    if !f.contains(&probe) {
                        f.push_str(" | ");
                        f.push_str(&r.troubleshooting);
                    }
                }
            }
        }
        if reg.map(|r| r.onsite_required).unwrap_or(false) {
            let f = fix.get_or_insert_with(String::new);
            if !f.contains(ONSITE_MARKER) {
                if !f.is_empty() { f.push(' '); }
                f.push_str(ONSITE_MARKER);
            }
        }
        if let (Some(s), None) = (sig, &fix)
            && !s.kb_url.is_empty() {
            // Keep the reference link visible even when the record carries no fix text.
            fix = Some(format!("See {}", s.kb_url));
        }

        MatchResult {
            issue: issue.clone(),
            matched: sig.is_some() || reg.is_some(),
            root_cause,
            fix,
        }
    }

    pub fn classify_all(&self, issues: &[Issue]) -> Vec<MatchResult> {
        let results: Vec<MatchResult> = issues.iter().map(|i| self.classify(i)).collect();
        let matched = results.iter().filter(|r| r.matched).count();
        log::info!("signature_match.known={} signature_match.unknown={}", matched, results.len() - matched);
        results
    }

    /// Component-scoped listing: filters by the record's component hint, not by
    /// issue-text matching.
    pub fn for_component(&self, component: &str) -> Vec<&SignatureRecord> {
        let q = component.to_lowercase();
        self.signatures.iter().filter(|s| s.component.to_lowercase().contains(&q)).collect()
    }
}
