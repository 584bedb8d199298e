use std::collections::{BTreeSet, VecDeque};
use std::io;
use std::sync::mpsc::TryRecvError;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant, SystemTime};

use crossterm::ExecutableCommand;
use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind};
use crossterm::terminal::{
    EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode,
};
use miette::IntoDiagnostic;
use ratatui::Terminal;
use ratatui::backend::CrosstermBackend;
use ratatui::layout::{Alignment, Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, Borders, Paragraph, Wrap};

use crate::app::{
    CategoryStatus, ProgressEvent, ProgressSink, ProgressSinkKind, RunReport, RunRequest,
};
use crate::catalog::Catalog;
use crate::domain::Category;
use crate::error::CadastreError;

const EVENTS_MAX: usize = 6;
const LOGS_MAX: usize = 200;

/// What a key press did to the selector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SelectorOutcome {
    Continue,
    Submit(RunRequest),
    Quit,
}

/// Territory and category selection state, independent of the terminal.
#[derive(Debug, Clone)]
pub struct Selector {
    catalog: Catalog,
    names: Vec<String>,
    checked: Vec<bool>,
    cursor: usize,
    categories: BTreeSet<Category>,
    message: Option<String>,
}

impl Selector {
    pub fn new(catalog: Catalog) -> Self {
        let names = catalog.sorted_names();
        let checked = vec![false; names.len()];
        Self {
            catalog,
            names,
            checked,
            cursor: 0,
            categories: BTreeSet::from([Category::Parcel]),
            message: None,
        }
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    pub fn is_checked(&self, idx: usize) -> bool {
        self.checked.get(idx).copied().unwrap_or(false)
    }

    pub fn all_selected(&self) -> bool {
        !self.checked.is_empty() && self.checked.iter().all(|checked| *checked)
    }

    pub fn has_category(&self, category: Category) -> bool {
        self.categories.contains(&category)
    }

    pub fn move_cursor(&mut self, delta: isize) {
        if self.names.is_empty() {
            return;
        }
        let last = self.names.len() - 1;
        self.cursor = self.cursor.saturating_add_signed(delta).min(last);
    }

    pub fn toggle_current(&mut self) {
        if let Some(checked) = self.checked.get_mut(self.cursor) {
            *checked = !*checked;
        }
        self.message = None;
    }

    /// Selects every territory, or clears them all when every one is already selected.
    pub fn toggle_all(&mut self) {
        let target = !self.all_selected();
        self.checked.iter_mut().for_each(|checked| *checked = target);
        self.message = None;
    }

    pub fn toggle_category(&mut self, category: Category) {
        if !self.categories.remove(&category) {
            self.categories.insert(category);
        }
        self.message = None;
    }

    /// Current selection, territories in display order.
    pub fn request(&self) -> RunRequest {
        let territories = self
            .names
            .iter()
            .zip(&self.checked)
            .filter(|(_, checked)| **checked)
            .map(|(name, _)| name.clone())
            .collect();
        RunRequest::new(territories, self.categories.iter().copied().collect())
    }

    pub fn handle_key(&mut self, key: KeyEvent) -> SelectorOutcome {
        if key.kind != KeyEventKind::Press {
            return SelectorOutcome::Continue;
        }
        match key.code {
            KeyCode::Char('q') | KeyCode::Esc => return SelectorOutcome::Quit,
            KeyCode::Up | KeyCode::Char('k') => self.move_cursor(-1),
            KeyCode::Down | KeyCode::Char('j') => self.move_cursor(1),
            KeyCode::PageUp => self.move_cursor(-10),
            KeyCode::PageDown => self.move_cursor(10),
            KeyCode::Home => self.cursor = 0,
            KeyCode::End => self.move_cursor(isize::MAX),
            KeyCode::Char(' ') => self.toggle_current(),
            KeyCode::Char('a') => self.toggle_all(),
            KeyCode::Char('p') => self.toggle_category(Category::Parcel),
            KeyCode::Char('b') => self.toggle_category(Category::Building),
            KeyCode::Enter => {
                let request = self.request();
                return match request.validate(&self.catalog) {
                    Ok(()) => SelectorOutcome::Submit(request),
                    Err(err) => {
                        self.message = Some(err.to_string());
                        SelectorOutcome::Continue
                    }
                };
            }
            _ => {}
        }
        SelectorOutcome::Continue
    }
}

#[derive(Debug)]
struct RunState {
    status: String,
    progress: Option<(usize, usize)>,
    events: VecDeque<String>,
    logs: VecDeque<String>,
    started: Instant,
    active: bool,
}

pub struct Tui {
    kind: ProgressSinkKind,
    state: Arc<Mutex<RunState>>,
}

struct TuiProgress {
    state: Arc<Mutex<RunState>>,
}

impl ProgressSink for TuiProgress {
    fn event(&self, event: ProgressEvent) {
        if let Ok(mut state) = self.state.lock() {
            let message = event.message.trim().to_string();
            if event.progress.is_some() {
                state.progress = event.progress;
            }
            state.status = message.clone();
            push_bounded(&mut state.events, message.clone(), EVENTS_MAX);
            push_bounded(
                &mut state.logs,
                format!("[{}] {message}", timestamp()),
                LOGS_MAX,
            );
        }
    }
}

impl Tui {
    pub fn new(kind: ProgressSinkKind) -> Self {
        Self {
            kind,
            state: Arc::new(Mutex::new(RunState {
                status: "ready".to_string(),
                progress: None,
                events: VecDeque::new(),
                logs: VecDeque::new(),
                started: Instant::now(),
                active: false,
            })),
        }
    }

    /// Runs `f` on a worker thread while rendering its progress events.
    pub fn run<F, R>(&mut self, f: F) -> miette::Result<R>
    where
        F: FnOnce(&dyn ProgressSink) -> Result<R, CadastreError> + Send + 'static,
        R: Send + 'static,
    {
        self.set_active(true);

        let mut stdout = io::stdout();
        enable_raw_mode().into_diagnostic()?;
        stdout.execute(EnterAlternateScreen).into_diagnostic()?;

        let backend = CrosstermBackend::new(stdout);
        let mut terminal = Terminal::new(backend).into_diagnostic()?;
        terminal.clear().into_diagnostic()?;

        let (tx, rx) = std::sync::mpsc::channel();
        let sink = TuiProgress {
            state: self.state.clone(),
        };
        let handle = thread::spawn(move || tx.send(f(&sink)));

        let mut tick = 0usize;
        loop {
            if let Ok(state) = self.state.lock() {
                terminal
                    .draw(|frame| draw_progress(frame, self.kind, &state, tick))
                    .into_diagnostic()?;
            }

            match rx.try_recv() {
                Ok(result) => {
                    self.set_active(false);
                    restore_terminal()?;
                    handle.join().ok();
                    return result.map_err(miette::Report::new);
                }
                Err(TryRecvError::Disconnected) => {
                    self.set_active(false);
                    restore_terminal()?;
                    return Err(miette::Report::msg("worker thread stopped unexpectedly"));
                }
                Err(TryRecvError::Empty) => {}
            }

            // The worker cannot be cancelled, so keys are drained but ignored.
            if event::poll(Duration::from_millis(120)).into_diagnostic()? {
                event::read().into_diagnostic()?;
            }

            tick = tick.wrapping_add(1);
        }
    }

    /// Shows the territory selector; `None` when the user quits.
    pub fn select(&mut self, catalog: Catalog) -> miette::Result<Option<RunRequest>> {
        let mut selector = Selector::new(catalog);

        let mut stdout = io::stdout();
        enable_raw_mode().into_diagnostic()?;
        stdout.execute(EnterAlternateScreen).into_diagnostic()?;

        let backend = CrosstermBackend::new(stdout);
        let mut terminal = Terminal::new(backend).into_diagnostic()?;
        terminal.clear().into_diagnostic()?;

        let outcome = loop {
            terminal
                .draw(|frame| draw_selector(frame, &selector))
                .into_diagnostic()?;

            if event::poll(Duration::from_millis(120)).into_diagnostic()?
                && let Event::Key(key) = event::read().into_diagnostic()?
            {
                match selector.handle_key(key) {
                    SelectorOutcome::Continue => {}
                    SelectorOutcome::Submit(request) => break Some(request),
                    SelectorOutcome::Quit => break None,
                }
            }
        };

        restore_terminal()?;
        Ok(outcome)
    }

    /// Keeps the final progress screen up with a summary until a key is pressed.
    pub fn finish_run(&mut self, report: &RunReport, output: &str) -> miette::Result<()> {
        if let Ok(mut state) = self.state.lock() {
            for category in &report.categories {
                let line = match &category.status {
                    CategoryStatus::Merged {
                        records_written, ..
                    } => format!("{}: {records_written} records", category.base_name),
                    CategoryStatus::NoInputs => format!("{}: no inputs", category.base_name),
                    CategoryStatus::Failed { reason } => {
                        format!("{}: {reason}", category.base_name)
                    }
                };
                push_bounded(&mut state.events, line, EVENTS_MAX);
            }
            state.status = format!("Saved {output}. Press any key to exit.");
        }

        let mut stdout = io::stdout();
        enable_raw_mode().into_diagnostic()?;
        stdout.execute(EnterAlternateScreen).into_diagnostic()?;
        let backend = CrosstermBackend::new(stdout);
        let mut terminal = Terminal::new(backend).into_diagnostic()?;

        loop {
            if let Ok(state) = self.state.lock() {
                terminal
                    .draw(|frame| draw_progress(frame, self.kind, &state, 0))
                    .into_diagnostic()?;
            }
            if event::poll(Duration::from_millis(120)).into_diagnostic()?
                && let Event::Key(key) = event::read().into_diagnostic()?
                && key.kind == KeyEventKind::Press
            {
                break;
            }
        }

        restore_terminal()
    }

    fn set_active(&self, active: bool) {
        if let Ok(mut state) = self.state.lock() {
            state.active = active;
            if active {
                state.started = Instant::now();
                state.progress = None;
            }
        }
    }
}

fn restore_terminal() -> miette::Result<()> {
    disable_raw_mode().into_diagnostic()?;
    let mut stdout = io::stdout();
    stdout.execute(LeaveAlternateScreen).into_diagnostic()?;
    Ok(())
}

fn header(op_label: &str, tick: usize) -> Paragraph<'static> {
    let hb = if tick % 2 == 0 { "*" } else { " " };
    let line = Line::from(vec![
        Span::styled(
            "CADASTRE-MERGE",
            Style::default()
                .fg(Color::Cyan)
                .add_modifier(Modifier::BOLD),
        ),
        Span::raw(" "),
        Span::styled(env!("CARGO_PKG_VERSION"), Style::default().fg(Color::Gray)),
        Span::raw("   Op: "),
        Span::styled(op_label.to_string(), Style::default().fg(Color::Cyan)),
        Span::raw("   "),
        Span::styled(hb, Style::default().fg(Color::Green)),
    ]);
    Paragraph::new(line)
        .alignment(Alignment::Left)
        .block(Block::default().borders(Borders::BOTTOM))
}

fn draw_selector(frame: &mut ratatui::Frame, selector: &Selector) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(2),
            Constraint::Min(6),
            Constraint::Length(4),
        ])
        .split(frame.area());

    frame.render_widget(header("Select", 0), chunks[0]);

    let main = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(65), Constraint::Percentage(35)])
        .split(chunks[1]);

    draw_territory_list(frame, selector, main[0]);
    frame.render_widget(draw_category_panel(selector), main[1]);

    let message = match selector.message() {
        Some(message) => Line::from(Span::styled(
            message.to_string(),
            Style::default().fg(Color::Red).add_modifier(Modifier::BOLD),
        )),
        None => Line::from(Span::styled(
            format!("{} territories selected", selector.request().territories.len()),
            Style::default().fg(Color::Gray),
        )),
    };
    let footer = Paragraph::new(vec![
        message,
        Line::from(Span::styled(
            "space toggle  a select all  p parcels  b buildings  enter merge  q quit",
            Style::default().fg(Color::DarkGray),
        )),
    ])
    .block(Block::default().borders(Borders::TOP));
    frame.render_widget(footer, chunks[2]);
}

fn draw_territory_list(frame: &mut ratatui::Frame, selector: &Selector, area: Rect) {
    let visible = area.height.saturating_sub(2).max(1) as usize;
    let start = selector.cursor().saturating_sub(visible.saturating_sub(1));

    let all_mark = if selector.all_selected() { "[x]" } else { "[ ]" };
    let mut lines = vec![Line::from(vec![
        Span::styled(
            "TERRITORIES ",
            Style::default()
                .fg(Color::Cyan)
                .add_modifier(Modifier::BOLD),
        ),
        Span::styled(
            format!("{all_mark} all"),
            Style::default().fg(Color::Gray),
        ),
    ])];
    if selector.names().is_empty() {
        lines.push(Line::from("(catalog is empty)"));
    }
    for (idx, name) in selector
        .names()
        .iter()
        .enumerate()
        .skip(start)
        .take(visible)
    {
        let mark = if selector.is_checked(idx) { "[x]" } else { "[ ]" };
        let style = if idx == selector.cursor() {
            Style::default().fg(Color::Black).bg(Color::Cyan)
        } else {
            Style::default()
        };
        lines.push(Line::from(Span::styled(format!("{mark} {name}"), style)));
    }

    let list = Paragraph::new(lines).block(Block::default().borders(Borders::RIGHT));
    frame.render_widget(list, area);
}

fn draw_category_panel(selector: &Selector) -> Paragraph<'static> {
    let mut lines = vec![Line::from(Span::styled(
        "DATA TYPES",
        Style::default()
            .fg(Color::Cyan)
            .add_modifier(Modifier::BOLD),
    ))];
    for (key, category) in [('p', Category::Parcel), ('b', Category::Building)] {
        let mark = if selector.has_category(category) {
            "[x]"
        } else {
            "[ ]"
        };
        lines.push(Line::from(vec![
            Span::styled(format!("{key} "), Style::default().fg(Color::DarkGray)),
            Span::raw(format!("{mark} {}", category.label())),
        ]));
    }
    Paragraph::new(lines).wrap(Wrap { trim: true })
}

fn draw_progress(
    frame: &mut ratatui::Frame,
    kind: ProgressSinkKind,
    state: &RunState,
    tick: usize,
) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(2),
            Constraint::Length(5),
            Constraint::Min(4),
        ])
        .split(frame.area());

    let op_label = match kind {
        ProgressSinkKind::Catalog => "Catalog",
        ProgressSinkKind::Run => "Merge",
    };
    frame.render_widget(header(op_label, tick), chunks[0]);

    let (done, total) = state.progress.unwrap_or((0, 0));
    let percent = if total == 0 {
        0
    } else {
        ((done * 100) / total).min(100) as u8
    };
    let phase_color = if state.active {
        Color::Cyan
    } else {
        Color::Green
    };
    let status = Paragraph::new(vec![
        Line::from(vec![
            Span::styled("Territories: ", Style::default().fg(Color::Gray)),
            Span::styled(
                format!("{done}/{total} "),
                Style::default().fg(phase_color),
            ),
            Span::raw(progress_bar(percent)),
            Span::raw(format!(" {percent:>3}%")),
        ]),
        Line::from(vec![
            Span::styled("Elapsed: ", Style::default().fg(Color::Gray)),
            Span::raw(format!("{}s", state.started.elapsed().as_secs())),
        ]),
        Line::from(vec![
            Span::styled("Status: ", Style::default().fg(Color::Gray)),
            Span::raw(state.status.clone()),
        ]),
    ])
    .block(Block::default().borders(Borders::BOTTOM))
    .wrap(Wrap { trim: true });
    frame.render_widget(status, chunks[1]);

    let visible = chunks[2].height.saturating_sub(1) as usize;
    let start = state.logs.len().saturating_sub(visible);
    let mut lines = vec![Line::from(Span::styled(
        "EVENTS",
        Style::default()
            .fg(Color::Cyan)
            .add_modifier(Modifier::BOLD),
    ))];
    if state.active {
        lines.extend(state.logs.iter().skip(start).map(|line| Line::from(line.clone())));
    } else {
        lines.extend(state.events.iter().map(|line| Line::from(format!("- {line}"))));
    }
    frame.render_widget(Paragraph::new(lines).wrap(Wrap { trim: true }), chunks[2]);
}

fn progress_bar(percent: u8) -> String {
    let total = 20;
    let filled = (percent as usize * total) / 100;
    let mut out = String::from("[");
    for i in 0..total {
        out.push(if i < filled { '#' } else { '.' });
    }
    out.push(']');
    out
}

fn push_bounded(buffer: &mut VecDeque<String>, item: String, max: usize) {
    buffer.push_back(item);
    while buffer.len() > max {
        buffer.pop_front();
    }
}

fn timestamp() -> String {
    let secs = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or(Duration::from_secs(0))
        .as_secs();
    let mins = (secs / 60) % 60;
    let hours = (secs / 3600) % 24;
    let seconds = secs % 60;
    format!("{hours:02}:{mins:02}:{seconds:02}")
}

#[cfg(test)]
mod tests {
    use crossterm::event::KeyModifiers;

    use super::*;
    use crate::domain::ResourceEntry;

    fn catalog() -> Catalog {
        Catalog::from_entries(["10. Jelgava", "1. Riga", "2. Liepaja"].map(|name| ResourceEntry {
            name: name.to_string(),
            url: format!("https://x/{name}.zip"),
            format: "ZIP".to_string(),
        }))
    }

    fn press(selector: &mut Selector, code: KeyCode) -> SelectorOutcome {
        selector.handle_key(KeyEvent::new(code, KeyModifiers::NONE))
    }

    #[test]
    fn starts_with_parcels_and_nothing_selected() {
        let selector = Selector::new(catalog());
        assert_eq!(selector.names(), ["1. Riga", "2. Liepaja", "10. Jelgava"]);
        assert!(selector.has_category(Category::Parcel));
        assert!(!selector.has_category(Category::Building));
        assert!(selector.request().territories.is_empty());
    }

    #[test]
    fn submit_without_territories_shows_message() {
        let mut selector = Selector::new(catalog());
        assert_eq!(press(&mut selector, KeyCode::Enter), SelectorOutcome::Continue);
        assert_eq!(
            selector.message(),
            Some(CadastreError::NoTerritoriesSelected.to_string().as_str())
        );
    }

    #[test]
    fn submit_without_categories_shows_message() {
        let mut selector = Selector::new(catalog());
        press(&mut selector, KeyCode::Char(' '));
        press(&mut selector, KeyCode::Char('p'));
        assert_eq!(press(&mut selector, KeyCode::Enter), SelectorOutcome::Continue);
        assert_eq!(
            selector.message(),
            Some(CadastreError::NoCategoriesSelected.to_string().as_str())
        );
    }

    #[test]
    fn select_all_toggles_and_submits_in_display_order() {
        let mut selector = Selector::new(catalog());
        press(&mut selector, KeyCode::Char('a'));
        assert!(selector.all_selected());
        press(&mut selector, KeyCode::Char('b'));

        let request = match press(&mut selector, KeyCode::Enter) {
            SelectorOutcome::Submit(request) => request,
            other => panic!("expected submit, got {other:?}"),
        };
        assert_eq!(request.territories, ["1. Riga", "2. Liepaja", "10. Jelgava"]);
        assert_eq!(request.categories, [Category::Parcel, Category::Building]);

        press(&mut selector, KeyCode::Char('a'));
        assert!(selector.request().territories.is_empty());
    }

    #[test]
    fn cursor_stays_in_bounds() {
        let mut selector = Selector::new(catalog());
        press(&mut selector, KeyCode::Up);
        assert_eq!(selector.cursor(), 0);
        press(&mut selector, KeyCode::End);
        assert_eq!(selector.cursor(), 2);
        press(&mut selector, KeyCode::Down);
        assert_eq!(selector.cursor(), 2);
        press(&mut selector, KeyCode::Char(' '));
        assert_eq!(selector.request().territories, ["10. Jelgava"]);
    }

    #[test]
    fn quit_keys_leave_selector() {
        let mut selector = Selector::new(catalog());
        assert_eq!(press(&mut selector, KeyCode::Esc), SelectorOutcome::Quit);
        assert_eq!(press(&mut selector, KeyCode::Char('q')), SelectorOutcome::Quit);
    }
}
