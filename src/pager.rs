use std::io::{BufRead, Write};
use crate::search::SearchRow;

pub const PAGE_SIZE: usize = 50;
const MSG_WIDTH: usize = 120;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NavCommand { Next, Prev, ShowAll, Quit }

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PagerState { ShowingPage, AwaitingInput, Done }

/// Empty or unrecognized input falls back to "next".
pub fn parse_nav(line: &str) -> NavCommand {
    match line.trim().to_lowercase().as_str() {
        "p" | "prev" | "previous" => NavCommand::Prev,
        "a" | "all" => NavCommand::ShowAll,
        "q" | "quit" => NavCommand::Quit,
        _ => NavCommand::Next,
    }
}

/// Paging over a fixed row buffer. The only suspension point in the whole
/// program is the AwaitingInput read between pages.
pub struct Pager {
    total: usize,
    page_size: usize,
    page: usize,
    pub state: PagerState,
}

impl Pager {
    pub fn new(total: usize) -> Pager {
        Pager { total, page_size: PAGE_SIZE, page: 0, state: PagerState::ShowingPage }
    }

    pub fn page_count(&self) -> usize {
        if self.total == 0 { 1 } else { self.total.div_ceil(self.page_size) }
    }

    pub fn current_range(&self) -> (usize, usize) {
        let start = self.page * self.page_size;
        (start, (start + self.page_size).min(self.total))
    }

    pub fn on_page_shown(&mut self) {
        self.state = if self.page + 1 >= self.page_count() { PagerState::Done } else { PagerState::AwaitingInput };
    }

    pub fn apply(&mut self, cmd: NavCommand) {
        match cmd {
            NavCommand::Next => { if self.page + 1 < self.page_count() { self.page += 1; } }
            NavCommand::Prev => { self.page = self.page.saturating_sub(1); }
            // Show-all is just one page holding every row.
            NavCommand::ShowAll => { self.page_size = self.total.max(1); self.page = 0; }
            NavCommand::Quit => { self.state = PagerState::Done; return; }
        }
        self.state = PagerState::ShowingPage;
    }
}

pub fn render_row(row: &SearchRow) -> String {
    match row {
        SearchRow::Match { component, record } => {
            let sev = crate::paint(&format!("[{}]", record.severity.letter()), record.severity.color_code());
            format!("{} {} {} {}", record.timestamp, sev, crate::paint(component, "1"), crate::truncate(&record.message, MSG_WIDTH))
        }
        SearchRow::Separator => crate::paint("────────", "2"),
    }
}

pub fn run_pager<R: BufRead, W: Write>(rows: &[SearchRow], input: &mut R, out: &mut W) -> std::io::Result<()> {
    let mut pager = Pager::new(rows.len());
    loop {
        let (start, end) = pager.current_range();
        for row in &rows[start..end] {
            writeln!(out, "{}", render_row(row))?;
        }
        pager.on_page_shown();
        if pager.state == PagerState::Done { break; }
        write!(out, "{}", crate::paint("-- [n]ext [p]rev [a]ll [q]uit > ", "2"))?;
        out.flush()?;
        let mut line = String::new();
        if input.read_line(&mut line)? == 0 { break; }
        pager.apply(parse_nav(&line));
        if pager.state == PagerState::Done { break; }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nav_defaults_to_next() {
        assert_eq!(parse_nav(""), NavCommand::Next);
        assert_eq!(parse_nav("zzz"), NavCommand::Next);
        assert_eq!(parse_nav(" q "), NavCommand::Quit);
        assert_eq!(parse_nav("ALL"), NavCommand::ShowAll);
    }

    #[test]
    fn show_all_grows_page_to_total() {
        let mut p = Pager::new(130);
        assert_eq!(p.page_count(), 3);
        p.apply(NavCommand::ShowAll);
        assert_eq!(p.page_count(), 1);
        assert_eq!(p.current_range(), (0, 130));
    }

    #[test]
    fn prev_at_first_page_stays_put() {
        let mut p = Pager::new(120);
        p.apply(NavCommand::Prev);
        assert_eq!(p.current_range(), (0, 50));
        p.apply(NavCommand::Next);
        assert_eq!(p.current_range(), (50, 100));
        p.apply(NavCommand::Prev);
        assert_eq!(p.current_range(), (0, 50));
    }

    #[test]
    fn last_page_transitions_to_done() {
        let mut p = Pager::new(40);
        p.on_page_shown();
        assert_eq!(p.state, PagerState::Done);
    }

    #[test]
    fn quit_ends_from_awaiting_input() {
        let mut p = Pager::new(120);
        p.on_page_shown();
        assert_eq!(p.state, PagerState::AwaitingInput);
        p.apply(NavCommand::Quit);
        assert_eq!(p.state, PagerState::Done);
    }

    #[test]
    fn pager_walks_all_pages_with_default_input() {
        use crate::store::{LogRecord, Severity};
        let rows: Vec<SearchRow> = (0..60)
            .map(|i| SearchRow::Match {
                component: "MQTT".to_string(),
                record: LogRecord { timestamp: format!("2024-01-01T10:{:02}", i % 60), severity: Severity::Info, message: "m".to_string() },
            })
            .collect();
        let mut input = std::io::Cursor::new(b"\n".to_vec());
        let mut out: Vec<u8> = Vec::new();
        run_pager(&rows, &mut input, &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert_eq!(text.matches("2024-01-01T10:").count(), 60);
    }
}
