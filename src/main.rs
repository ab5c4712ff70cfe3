use std::path::Path;
use std::sync::OnceLock;
use clap::{ArgAction, ColorChoice, CommandFactory, Parser, Subcommand, ValueEnum};
use clap_complete::Shell;
use comfy_table::{ContentArrangement, Table};
use is_terminal::IsTerminal;
use serde::Deserialize;

mod errors;
mod investigate;
mod pager;
mod report;
mod search;
mod signatures;
mod store;

use errors::AppError;
use search::SearchOptions;
use signatures::{SignatureDb, SignatureRecord};
use store::{ParsedStore, Severity};

static ENABLE_COLOR: OnceLock<bool> = OnceLock::new();

const DEFAULT_PARSED_DIR: &str = "parsed";
const DEFAULT_SIGNATURES: &str = "signatures/known_signatures.tsv";
const DEFAULT_REGISTRY: &str = "signatures/error_registry.tsv";
const DEFAULT_ISSUES: &str = "reports/issues.tsv";
const DEFAULT_TIMELINE: &str = "reports/timeline.tsv";
const DEFAULT_STATUS: &str = "reports/component_status.tsv";

#[derive(Clone, Copy, Debug, ValueEnum)]
enum LogLevel { Error, Warn, Info, Debug, Trace }

#[derive(Clone, Copy, Debug, ValueEnum)]
enum ReportFormat { Text, Markdown, Json }

#[derive(Parser, Debug)]
#[command(
    name = "chargedoctor",
    about = "Offline diagnostics for charge-point log bundles",
    long_about = "Offline diagnostics for charge-point log bundles: search parsed per-component log streams, drill into one component's health, and classify detected issues against a curated signature store plus the official error-code registry.",
    after_long_help = "Examples:\n  chargedoctor search \"MQTT connection fail\" -s E --after 2024-01-01T10:30\n  chargedoctor search \"StartTransaction\" --connector 1 --context 2 --export hits.log\n  chargedoctor component evcc\n  chargedoctor match --format markdown --out matches.md\n  chargedoctor signatures add \"boot loop\" --component System --root-cause \"Crash-restart cycle\"",
    color = ColorChoice::Auto
)]
struct Cli {
    /// Directory of per-component *.parsed streams
    #[arg(long, global = true, default_value = DEFAULT_PARSED_DIR)]
    parsed_dir: String,
    #[arg(long, global = true, default_value = DEFAULT_SIGNATURES)]
    signatures_file: String,
    #[arg(long, global = true, default_value = DEFAULT_REGISTRY)]
    registry_file: String,
    #[arg(long, global = true, default_value = DEFAULT_ISSUES)]
    issues_file: String,
    #[arg(long, global = true, default_value = DEFAULT_TIMELINE)]
    timeline_file: String,
    #[arg(long, global = true, default_value = DEFAULT_STATUS)]
    status_file: String,
    /// Path to a chargedoctor.toml overriding store locations
    #[arg(long, global = true)]
    config: Option<String>,
    #[arg(long, short = 'C', global = true, default_value_t = false)]
    no_color: bool,
    #[arg(long, global = true, default_value_t = false)]
    force_color: bool,
    #[arg(short = 'q', long, global = true, default_value_t = false)]
    quiet: bool,
    #[arg(short = 'v', long, global = true, action = ArgAction::Count)]
    verbose: u8,
    #[arg(long, global = true)]
    log_level: Option<LogLevel>,
    #[arg(long, value_enum)]
    completions: Option<Shell>,
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Search parsed log streams under multiple simultaneous constraints
    Search(SearchArgs),
    /// Consolidated health view for one software component
    Component {
        name: String,
        #[arg(long, default_value_t = false)]
        json: bool,
    },
    /// List available component streams with line counts
    Components,
    /// Classify all detected issues against the knowledge base
    Match {
        #[arg(long, value_enum, default_value = "text")]
        format: ReportFormat,
        /// Write the fragment to a file instead of stdout
        #[arg(long)]
        out: Option<String>,
    },
    /// Inspect or extend the signature store
    Signatures {
        #[command(subcommand)]
        action: SignaturesAction,
    },
}

#[derive(clap::Args, Debug)]
struct SearchArgs {
    /// Keyword to search for (regular expression with --regex)
    pattern: String,
    /// Single-letter severity code (C/E/W/I/N)
    #[arg(long, short = 's')]
    severity: Option<String>,
    /// Only streams whose name contains this (case-insensitive)
    #[arg(long, short = 'c')]
    component: Option<String>,
    /// Inclusive lower timestamp bound
    #[arg(long)]
    after: Option<String>,
    /// Inclusive upper timestamp bound
    #[arg(long)]
    before: Option<String>,
    /// Context lines before/after each match
    #[arg(long, default_value_t = 0, value_parser = clap::value_parser!(u8).range(0..=5))]
    context: u8,
    #[arg(long, short = 'r', default_value_t = false)]
    regex: bool,
    /// Physical connector number; expands to the known naming conventions
    #[arg(long)]
    connector: Option<u32>,
    #[arg(long, default_value_t = search::DEFAULT_MAX_RESULTS)]
    max_results: usize,
    /// Copy results verbatim to this file before display
    #[arg(long)]
    export: Option<String>,
    #[arg(long, default_value_t = false)]
    json: bool,
    #[arg(long, default_value_t = false)]
    no_pager: bool,
    #[arg(long, default_value_t = false)]
    progress: bool,
}

#[derive(Subcommand, Debug)]
enum SignaturesAction {
    /// List signature records, optionally scoped to one component hint
    List {
        #[arg(long, short = 'c')]
        component: Option<String>,
    },
    /// Append one signature record to the store
    Add {
        pattern: String,
        #[arg(long, default_value = "")]
        component: String,
        #[arg(long, default_value = "MEDIUM")]
        severity: String,
        #[arg(long, default_value = "")]
        title: String,
        #[arg(long, default_value = "")]
        root_cause: String,
        #[arg(long, default_value = "")]
        fix: String,
        #[arg(long, default_value = "")]
        kb_url: String,
    },
}

#[derive(Deserialize, Default)]
struct AppConfig {
    parsed_dir: Option<String>,
    signatures_file: Option<String>,
    registry_file: Option<String>,
    issues_file: Option<String>,
    timeline_file: Option<String>,
    status_file: Option<String>,
    no_color: Option<bool>,
    quiet: Option<bool>,
}

fn apply_config(cli: &mut Cli, cfg: AppConfig) {
    if cli.parsed_dir == DEFAULT_PARSED_DIR && let Some(v) = cfg.parsed_dir { cli.parsed_dir = v; }
    if cli.signatures_file == DEFAULT_SIGNATURES && let Some(v) = cfg.signatures_file { cli.signatures_file = v; }
    if cli.registry_file == DEFAULT_REGISTRY && let Some(v) = cfg.registry_file { cli.registry_file = v; }
    if cli.issues_file == DEFAULT_ISSUES && let Some(v) = cfg.issues_file { cli.issues_file = v; }
    if cli.timeline_file == DEFAULT_TIMELINE && let Some(v) = cfg.timeline_file { cli.timeline_file = v; }
    if cli.status_file == DEFAULT_STATUS && let Some(v) = cfg.status_file { cli.status_file = v; }
    if let Some(v) = cfg.no_color { cli.no_color = cli.no_color || v; }
    if let Some(v) = cfg.quiet { cli.quiet = cli.quiet || v; }
}

fn main() {
    let mut cli = Cli::parse();
    if let Some(sh) = cli.completions {
        let mut cmd = Cli::command();
        clap_complete::generate(sh, &mut cmd, "chargedoctor", &mut std::io::stdout());
        return;
    }
    if let Some(p) = cli.config.as_ref()
        && let Ok(s) = std::fs::read_to_string(p)
        && let Ok(cfg) = toml::from_str::<AppConfig>(&s) { apply_config(&mut cli, cfg); }
    else if let Ok(s) = std::fs::read_to_string("chargedoctor.toml")
        && let Ok(cfg) = toml::from_str::<AppConfig>(&s) { apply_config(&mut cli, cfg); }
    {
        let mut builder = env_logger::Builder::from_env(env_logger::Env::default());
        if cli.quiet {
            builder.filter_level(log::LevelFilter::Error);
        } else if let Some(lvl) = cli.log_level {
            let f = match lvl { LogLevel::Error => log::LevelFilter::Error, LogLevel::Warn => log::LevelFilter::Warn, LogLevel::Info => log::LevelFilter::Info, LogLevel::Debug => log::LevelFilter::Debug, LogLevel::Trace => log::LevelFilter::Trace };
            builder.filter_level(f);
        } else if cli.verbose > 0 {
            let f = if cli.verbose >= 3 { log::LevelFilter::Trace } else if cli.verbose == 2 { log::LevelFilter::Debug } else { log::LevelFilter::Info };
            builder.filter_level(f);
        } else {
            builder.filter_level(log::LevelFilter::Warn);
        }
        builder.init();
    }
    let term = std::env::var("TERM").unwrap_or_default();
    let no_color_env = std::env::var_os("NO_COLOR").is_some();
    let color_default = std::io::stdout().is_terminal() && !no_color_env && term != "dumb";
    let enable_color = if cli.force_color { true } else { color_default && !cli.no_color };
    let _ = ENABLE_COLOR.set(enable_color);

    match run(&cli) {
        Ok(()) => {}
        Err(AppError::EmptyResult) => {
            if !cli.quiet { println!("{}", paint("No results.", "33")); }
            std::process::exit(AppError::EmptyResult.exit_code());
        }
        Err(e) => {
            eprintln!("{}", paint(&format!("Error: {}", e), "1;31"));
            std::process::exit(e.exit_code());
        }
    }
}

fn run(cli: &Cli) -> Result<(), AppError> {
    match cli.command.as_ref() {
        Some(Command::Search(args)) => cmd_search(cli, args),
        Some(Command::Component { name, json }) => cmd_component(cli, name, *json),
        Some(Command::Components) => cmd_components(cli),
        Some(Command::Match { format, out }) => cmd_match(cli, *format, out.as_deref()),
        Some(Command::Signatures { action }) => cmd_signatures(cli, action),
        None => {
            Cli::command().print_help()?;
            Ok(())
        }
    }
}

fn open_db(cli: &Cli) -> Result<SignatureDb, AppError> {
    signatures::ensure_seeded(Path::new(&cli.signatures_file))?;
    Ok(SignatureDb::open(Path::new(&cli.signatures_file), Path::new(&cli.registry_file)))
}

fn cmd_search(cli: &Cli, args: &SearchArgs) -> Result<(), AppError> {
    let severity = match args.severity.as_deref() {
        Some(s) => Some(Severity::from_letter(s).ok_or_else(|| AppError::InvalidArgument(format!("unknown severity '{}' (expected one of C/E/W/I/N)", s)))?),
        None => None,
    };
    let opts = SearchOptions {
        pattern: args.pattern.clone(),
        severity,
        component: args.component.clone(),
        after: args.after.clone(),
        before: args.before.clone(),
        context: args.context as usize,
        regex_mode: args.regex,
        connector: args.connector,
        max_results: args.max_results,
    };
    let store = ParsedStore::open(Path::new(&cli.parsed_dir))?;
    let rows = search::run_search(&store, &opts, args.progress)?;
    if let Some(p) = args.export.as_ref() {
        search::export_rows(Path::new(p), &rows)?;
        if !cli.quiet { println!("{}", paint(&format!("Exported {} rows to {}", search::match_count(&rows), p), "1;36")); }
    }
    if rows.is_empty() { return Err(AppError::EmptyResult); }
    if args.json {
        println!("{}", serde_json::to_string_pretty(&rows).unwrap_or_default());
        return Ok(());
    }
    if !cli.quiet {
        println!("{}", paint(&format!("{} matching rows (cap {})", search::match_count(&rows), opts.max_results), "1;36"));
    }
    if args.no_pager || !std::io::stdout().is_terminal() {
        use std::io::Write;
        let mut out = std::io::stdout().lock();
        for row in &rows {
            writeln!(out, "{}", pager::render_row(row))?;
        }
    } else {
        let stdin = std::io::stdin();
        pager::run_pager(&rows, &mut stdin.lock(), &mut std::io::stdout().lock())?;
    }
    Ok(())
}

fn cmd_components(cli: &Cli) -> Result<(), AppError> {
    let store = ParsedStore::open(Path::new(&cli.parsed_dir))?;
    let mut table = Table::new();
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec!["Component", "Lines", "Errors", "Warnings"]);
    for name in store.stream_names() {
        let records = store.read_records(&name)?;
        let errors = records.iter().filter(|r| matches!(r.severity, Severity::Error | Severity::Critical)).count();
        let warnings = records.iter().filter(|r| r.severity == Severity::Warning).count();
        table.add_row(vec![name, records.len().to_string(), errors.to_string(), warnings.to_string()]);
    }
    println!("{}", table);
    Ok(())
}

fn cmd_component(cli: &Cli, name: &str, json: bool) -> Result<(), AppError> {
    let store = ParsedStore::open(Path::new(&cli.parsed_dir))?;
    let db = open_db(cli)?;
    let issues = store::load_issues(Path::new(&cli.issues_file))?;
    let timeline = store::load_timeline(Path::new(&cli.timeline_file))?;
    let status = store::load_status_labels(Path::new(&cli.status_file));
    let health = investigate::investigate(&store, &db, &issues, &timeline, &status, name)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&health).unwrap_or_default());
        return Ok(());
    }
    print_health(&health);
    Ok(())
}

fn print_health(h: &investigate::ComponentHealth) {
    println!("{} {}", paint("Component:", "1"), h.component);
    if let Some(s) = h.status.as_ref() { println!("{} {}", paint("Status:", "1"), s); }
    println!("{} {} total | {} critical | {} errors | {} warnings | {} info",
        paint("Lines:", "1"), h.total, h.critical, h.errors, h.warnings, h.info);
    if let (Some(first), Some(last)) = (h.first_seen.as_ref(), h.last_seen.as_ref()) {
        println!("{} {} to {}", paint("Span:", "1"), first, last);
    }
    println!("{}", paint("Top Recurring Errors:", "1;36"));
    if h.top_clusters.is_empty() { println!("{}", paint("None", "2")); }
    for (msg, n) in &h.top_clusters { println!("• {} ({})", truncate(msg, 120), n); }
    println!("{}", paint("Related Issues:", "1;36"));
    if h.issues_by_severity.is_empty() { println!("{}", paint("None", "2")); }
    for (sev, group) in &h.issues_by_severity {
        println!("{}", paint(&format!("[{}]", sev), "1;33"));
        for i in group { println!("• {} — {}", i.title, truncate(&i.description, 100)); }
    }
    println!("{}", paint("Timeline:", "1;36"));
    if h.timeline.is_empty() { println!("{}", paint("None", "2")); }
    for t in &h.timeline { println!("{} [{}] {}", t.timestamp, t.severity, truncate(&t.message, 100)); }
    if h.timeline_overflow > 0 { println!("{}", paint(&format!("(+{} more)", h.timeline_overflow), "2")); }
    println!("{}", paint("Known Signatures for this Component:", "1;36"));
    if h.signature_hints.is_empty() { println!("{}", paint("None", "2")); }
    for s in &h.signature_hints {
        println!("• {} [{}] — {}", s.title, s.pattern, truncate(&s.root_cause, 100));
    }
}

fn cmd_match(cli: &Cli, format: ReportFormat, out: Option<&str>) -> Result<(), AppError> {
    let db = open_db(cli)?;
    let issues = store::load_issues(Path::new(&cli.issues_file))?;
    let results = db.classify_all(&issues);
    let body = match format {
        ReportFormat::Text => report::render_text(&results),
        ReportFormat::Markdown => report::render_markdown(&results),
        ReportFormat::Json => report::render_json(&results),
    };
    match out {
        Some(p) => {
            std::fs::write(p, &body)?;
            if !cli.quiet { println!("{}", paint(&format!("Report written: {}", p), "1;36")); }
        }
        None => println!("{}", body),
    }
    Ok(())
}

fn cmd_signatures(cli: &Cli, action: &SignaturesAction) -> Result<(), AppError> {
    match action {
        SignaturesAction::List { component } => {
            let db = open_db(cli)?;
            let records: Vec<&SignatureRecord> = match component.as_deref() {
                Some(c) => db.for_component(c),
                None => db.signatures.iter().collect(),
            };
            if records.is_empty() { return Err(AppError::EmptyResult); }
            let mut table = Table::new();
            table.set_content_arrangement(ContentArrangement::Dynamic);
            table.set_header(vec!["Pattern", "Component", "Severity", "Title", "Root Cause", "Fix", "KB"]);
            for s in records {
                table.add_row(vec![&s.pattern, &s.component, &s.severity, &s.title, &s.root_cause, &s.fix, &s.kb_url]);
            }
            println!("{}", table);
            Ok(())
        }
        SignaturesAction::Add { pattern, component, severity, title, root_cause, fix, kb_url } => {
            signatures::ensure_seeded(Path::new(&cli.signatures_file))?;
            let rec = SignatureRecord {
                pattern: pattern.clone(),
                component: component.clone(),
                severity: severity.clone(),
                title: title.clone(),
                root_cause: root_cause.clone(),
                fix: fix.clone(),
                kb_url: kb_url.clone(),
            };
            signatures::append_signature(Path::new(&cli.signatures_file), &rec)?;
            if !cli.quiet { println!("{}", paint(&format!("Signature added: {}", pattern), "1;36")); }
            Ok(())
        }
    }
}

pub(crate) fn paint(s: &str, code: &str) -> String {
    if *ENABLE_COLOR.get().unwrap_or(&false) { format!("\x1b[{}m{}\x1b[0m", code, s) } else { s.to_string() }
}

pub(crate) fn truncate(s: &str, n: usize) -> String {
    let mut out: String = s.chars().take(n).collect();
    if s.chars().count() > n { out.push_str("..."); }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_is_display_only_and_char_safe() {
        assert_eq!(truncate("abcdef", 4), "abcd...");
        assert_eq!(truncate("abc", 4), "abc");
        assert_eq!(truncate("héllo", 3), "hél...");
    }

    #[test]
    fn paint_is_plain_when_color_disabled() {
        assert_eq!(paint("x", "1;31"), "x");
    }

    #[test]
    fn cli_parses_search_surface() {
        let cli = Cli::parse_from([
            "chargedoctor", "search", "MQTT", "-s", "E", "-c", "mqtt",
            "--after", "2024-01-01T10:30", "--context", "2", "--connector", "1",
            "--max-results", "50", "--regex",
        ]);
        let Some(Command::Search(a)) = cli.command else { panic!("expected search") };
        assert_eq!(a.pattern, "MQTT");
        assert_eq!(a.severity.as_deref(), Some("E"));
        assert_eq!(a.context, 2);
        assert_eq!(a.connector, Some(1));
        assert_eq!(a.max_results, 50);
        assert!(a.regex);
    }

    #[test]
    fn cli_rejects_context_above_five() {
        assert!(Cli::try_parse_from(["chargedoctor", "search", "x", "--context", "6"]).is_err());
    }

    #[test]
    fn cli_requires_search_pattern() {
        assert!(Cli::try_parse_from(["chargedoctor", "search"]).is_err());
    }

    #[test]
    fn config_overlay_keeps_explicit_flags() {
        let mut cli = Cli::parse_from(["chargedoctor", "--parsed-dir", "/tmp/custom", "components"]);
        apply_config(&mut cli, AppConfig { parsed_dir: Some("/ignored".to_string()), issues_file: Some("other/issues.tsv".to_string()), ..AppConfig::default() });
        assert_eq!(cli.parsed_dir, "/tmp/custom");
        assert_eq!(cli.issues_file, "other/issues.tsv");
    }
}
