use anyhow::Result;
use crossterm::{
    event::{self, DisableMouseCapture, EnableMouseCapture, Event, KeyCode, KeyEvent, KeyModifiers},
    execute,
    terminal::{EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode},
};
use ratatui::{
    prelude::*,
    text::Line,
    widgets::{Block, Borders, Cell, Clear, Gauge, Paragraph, Row, Table, TableState, Wrap},
};
use std::collections::HashMap;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::analysis::{AnalysisEvent, AnalyzerService};
use crate::export;
use crate::filter_utils::{
    Highlight, HighlightThresholds, RowFilter, SortDirection, SortKey, TableRow, sort_rows,
};
use crate::logging::LogBuffer;
use crate::models::{AnalysisSummary, SymbolRecord};
use crate::scoring::{CategoryBounds, categorize_score};
use crate::storage_utils::AsyncStorageManager;
use crate::user_settings::UserSettings;

const LOG_LINES: usize = 8;

/// Everything the TUI needs from the bootstrap.
pub struct TuiContext {
    pub service: Arc<AnalyzerService>,
    pub records: Vec<SymbolRecord>,
    pub bounds: CategoryBounds,
    pub settings: UserSettings,
    pub settings_store: AsyncStorageManager,
    pub log_buffer: Arc<LogBuffer>,
    pub export_path: PathBuf,
}

// --- App State ---

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InputMode {
    Normal,
    Filter,
}

/// Side effects requested by a key press; the async loop carries them out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Action {
    None,
    Quit,
    Run { force: bool },
    Cancel,
    SaveSettings,
    Export,
}

struct App {
    records: Vec<SymbolRecord>,
    summaries: HashMap<String, AnalysisSummary>,
    rows: Vec<TableRow>,
    view: Vec<usize>,
    table_state: TableState,
    sort_key: SortKey,
    sort_dir: SortDirection,
    filter: RowFilter,
    markets: Vec<String>,
    input_mode: InputMode,
    input: String,
    bounds: CategoryBounds,
    highlight: HighlightThresholds,
    is_running: bool,
    progress: (usize, usize),
    errors: Vec<String>,
    show_detail: bool,
    show_errors: bool,
    show_logs: bool,
    status: String,
}

impl App {
    fn new(records: Vec<SymbolRecord>, bounds: CategoryBounds, highlight: HighlightThresholds) -> Self {
        let mut markets: Vec<String> = records.iter().filter_map(|r| r.market.clone()).collect();
        markets.sort();
        markets.dedup();
        let mut app = Self {
            records,
            summaries: HashMap::new(),
            rows: Vec::new(),
            view: Vec::new(),
            table_state: TableState::default(),
            sort_key: SortKey::default(),
            sort_dir: SortDirection::default(),
            filter: RowFilter::default(),
            markets,
            input_mode: InputMode::Normal,
            input: String::new(),
            bounds,
            highlight,
            is_running: false,
            progress: (0, 0),
            errors: Vec::new(),
            show_detail: true,
            show_errors: false,
            show_logs: true,
            status: "F5 to analyse".to_string(),
        };
        app.rebuild_rows();
        app
    }

    /// Rebuilds rows from records and summaries, then re-sorts and re-filters.
    fn rebuild_rows(&mut self) {
        let selected = self.selected_symbol().map(str::to_string);
        self.rows = self
            .records
            .iter()
            .map(|record| match self.summaries.get(&record.symbol) {
                Some(summary) => TableRow::from_summary(summary, &self.bounds),
                None => TableRow::unscored(record, &self.bounds),
            })
            .collect();
        sort_rows(&mut self.rows, self.sort_key, self.sort_dir);
        self.view = (0..self.rows.len())
            .filter(|&i| self.filter.matches(&self.rows[i]))
            .collect();

        let index = selected
            .and_then(|sym| self.view.iter().position(|&i| self.rows[i].symbol == sym))
            .or(if self.view.is_empty() { None } else { Some(0) });
        self.table_state.select(index);
    }

    fn visible_rows(&self) -> impl Iterator<Item = &TableRow> {
        self.view.iter().map(|&i| &self.rows[i])
    }

    fn selected_row(&self) -> Option<&TableRow> {
        let pos = self.table_state.selected()?;
        self.view.get(pos).map(|&i| &self.rows[i])
    }

    fn selected_symbol(&self) -> Option<&str> {
        self.selected_row().map(|r| r.symbol.as_str())
    }

    fn selected_summary(&self) -> Option<&AnalysisSummary> {
        self.summaries.get(self.selected_symbol()?)
    }

    fn move_selection(&mut self, delta: isize) {
        if self.view.is_empty() {
            return;
        }
        let len = self.view.len() as isize;
        let current = self.table_state.selected().unwrap_or(0) as isize;
        let next = (current + delta).rem_euclid(len);
        self.table_state.select(Some(next as usize));
    }

    fn cycle_market(&mut self) {
        self.filter.market = match &self.filter.market {
            None => self.markets.first().cloned(),
            Some(current) => {
                let pos = self.markets.iter().position(|m| m == current);
                pos.and_then(|p| self.markets.get(p + 1)).cloned()
            }
        };
        self.rebuild_rows();
    }

    fn toggle_min_score(&mut self) {
        self.filter.min_score = match self.filter.min_score {
            None => Some(self.highlight.positive),
            Some(_) => None,
        };
        self.rebuild_rows();
    }

    fn adjust_highlight(&mut self, positive: i32, negative: i32) {
        let pos = (self.highlight.positive + positive).clamp(0, 10);
        let neg = (self.highlight.negative + negative).clamp(-10, 0);
        self.highlight = HighlightThresholds {
            positive: pos,
            negative: neg,
        };
        self.status = format!("Highlight thresholds: +{pos} / {neg}");
    }

    fn start_run(&mut self, total: usize) {
        self.is_running = true;
        self.progress = (0, total);
        self.errors.clear();
        self.status = format!("Analysing {total} symbols...");
    }

    fn apply_event(&mut self, event: AnalysisEvent) {
        match event {
            AnalysisEvent::Started { total } => self.progress = (0, total),
            AnalysisEvent::Symbol {
                completed,
                total,
                summary,
                errors,
                ..
            } => {
                self.progress = (completed, total);
                self.errors = errors;
                if let Some(summary) = summary {
                    self.summaries.insert(summary.symbol.clone(), *summary);
                    self.rebuild_rows();
                }
            }
            AnalysisEvent::Finished {
                summaries,
                errors,
                cancelled,
            } => {
                self.is_running = false;
                self.status = if cancelled {
                    format!("Cancelled: {summaries} analysed, {errors} errors")
                } else {
                    format!("Done: {summaries} analysed, {errors} errors")
                };
            }
        }
    }

    fn handle_key(&mut self, key: KeyEvent) -> Action {
        if self.input_mode == InputMode::Filter {
            match key.code {
                KeyCode::Enter => {
                    let text = self.input.trim().to_string();
                    self.filter.text = (!text.is_empty()).then_some(text);
                    self.input_mode = InputMode::Normal;
                    self.rebuild_rows();
                }
                KeyCode::Esc => self.input_mode = InputMode::Normal,
                KeyCode::Backspace => {
                    self.input.pop();
                }
                KeyCode::Char(c) => self.input.push(c),
                _ => {}
            }
            return Action::None;
        }

        match key.code {
            KeyCode::Char('q') => return Action::Quit,
            KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => {
                return Action::Quit;
            }
            KeyCode::F(5) | KeyCode::Char('r') if !self.is_running => {
                return Action::Run { force: false };
            }
            KeyCode::Char('R') if !self.is_running => return Action::Run { force: true },
            KeyCode::Char('c') | KeyCode::Esc if self.is_running => return Action::Cancel,
            KeyCode::Esc => self.show_errors = false,
            KeyCode::Up | KeyCode::Char('k') => self.move_selection(-1),
            KeyCode::Down | KeyCode::Char('j') => self.move_selection(1),
            KeyCode::PageUp => self.move_selection(-10),
            KeyCode::PageDown => self.move_selection(10),
            KeyCode::Enter => self.show_detail = !self.show_detail,
            KeyCode::Char('s') => {
                self.sort_key = self.sort_key.next();
                self.rebuild_rows();
            }
            KeyCode::Char('o') => {
                self.sort_dir = self.sort_dir.toggle();
                self.rebuild_rows();
            }
            KeyCode::Char('/') => {
                self.input = self.filter.text.clone().unwrap_or_default();
                self.input_mode = InputMode::Filter;
            }
            KeyCode::Char('m') => self.cycle_market(),
            KeyCode::Char('n') => self.toggle_min_score(),
            KeyCode::Char('e') => self.show_errors = !self.show_errors,
            KeyCode::Char('l') => self.show_logs = !self.show_logs,
            KeyCode::Char('x') => return Action::Export,
            KeyCode::Char(']') => {
                self.adjust_highlight(1, 0);
                return Action::SaveSettings;
            }
            KeyCode::Char('[') => {
                self.adjust_highlight(-1, 0);
                return Action::SaveSettings;
            }
            KeyCode::Char('}') => {
                self.adjust_highlight(0, 1);
                return Action::SaveSettings;
            }
            KeyCode::Char('{') => {
                self.adjust_highlight(0, -1);
                return Action::SaveSettings;
            }
            _ => {}
        }
        Action::None
    }
}

// --- TUI ---

pub async fn run_tui(ctx: TuiContext) -> Result<()> {
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, EnableMouseCapture)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let res = run_app(&mut terminal, ctx).await;

    disable_raw_mode()?;
    execute!(
        terminal.backend_mut(),
        LeaveAlternateScreen,
        DisableMouseCapture
    )?;
    terminal.show_cursor()?;
    res
}

async fn run_app<B: Backend>(terminal: &mut Terminal<B>, mut ctx: TuiContext) -> Result<()> {
    let (event_tx, mut event_rx) = mpsc::channel::<AnalysisEvent>(64);
    let highlight = HighlightThresholds {
        positive: ctx.settings.highlight_pos,
        negative: ctx.settings.highlight_neg,
    };
    let mut app = App::new(ctx.records.clone(), ctx.bounds, highlight);
    let mut cancel: Option<CancellationToken> = None;

    loop {
        let logs = ctx.log_buffer.recent(LOG_LINES);
        terminal.draw(|f| ui(f, &mut app, &logs))?;

        while let Ok(event) = event_rx.try_recv() {
            if matches!(event, AnalysisEvent::Finished { .. }) {
                cancel = None;
            }
            app.apply_event(event);
        }

        if !event::poll(Duration::from_millis(50))? {
            continue;
        }
        // Resize needs no handling; the next draw picks up the new size.
        let Event::Key(key) = event::read()? else {
            continue;
        };
        match app.handle_key(key) {
            Action::None => {}
            Action::Quit => {
                if let Some(token) = cancel.take() {
                    token.cancel();
                }
                return Ok(());
            }
            Action::Run { .. } if app.records.is_empty() => {
                app.status = "Watchlist is empty".to_string();
            }
            Action::Run { force } => {
                let token = CancellationToken::new();
                cancel = Some(token.clone());
                app.start_run(app.records.len());
                let service = ctx.service.clone();
                let records = app.records.clone();
                let tx = event_tx.clone();
                tokio::spawn(async move {
                    service.analyze_symbols(records, force, Some(tx), token).await;
                });
            }
            Action::Cancel => {
                if let Some(token) = &cancel {
                    token.cancel();
                    app.status = "Cancelling...".to_string();
                }
            }
            Action::SaveSettings => {
                ctx.settings.highlight_pos = app.highlight.positive;
                ctx.settings.highlight_neg = app.highlight.negative;
                if let Err(err) = ctx.settings.save(&ctx.settings_store).await {
                    warn!(error = %err, "could not save UI settings");
                }
            }
            Action::Export => {
                let rows: Vec<TableRow> = app.visible_rows().cloned().collect();
                app.status = match export::export_rows(&rows, &ctx.export_path).await {
                    Ok(()) => {
                        info!(path = %ctx.export_path.display(), "exported from TUI");
                        format!("Exported {} rows to {}", rows.len(), ctx.export_path.display())
                    }
                    Err(err) => err.to_string(),
                };
            }
        }
    }
}

fn row_style(highlight: Highlight) -> Style {
    match highlight {
        Highlight::Positive => Style::default().fg(Color::Rgb(0, 220, 90)),
        Highlight::Negative => Style::default().fg(Color::Rgb(235, 70, 70)),
        Highlight::Plain => Style::default(),
    }
}

fn ui(f: &mut Frame, app: &mut App, logs: &[String]) {
    let log_height = if app.show_logs { LOG_LINES as u16 + 2 } else { 0 };
    let outer = Layout::vertical([
        Constraint::Length(3),
        Constraint::Min(5),
        Constraint::Length(log_height),
        Constraint::Length(1),
    ])
    .split(f.size());

    render_status(f, app, outer[0]);

    let body = if app.show_detail {
        Layout::horizontal([Constraint::Percentage(60), Constraint::Percentage(40)]).split(outer[1])
    } else {
        Layout::horizontal([Constraint::Percentage(100), Constraint::Length(0)]).split(outer[1])
    };
    render_table(f, app, body[0]);
    if app.show_detail {
        render_detail(f, app, body[1]);
    }

    if app.show_logs {
        let lines: Vec<Line> = logs.iter().map(|l| Line::from(l.as_str())).collect();
        f.render_widget(
            Paragraph::new(lines).block(Block::default().borders(Borders::ALL).title("Log")),
            outer[2],
        );
    }

    f.render_widget(
        Paragraph::new(
            "F5/r run  R force  c cancel  s sort  o order  / search  m market  n min score  [ ] { } highlight  x export  e errors  q quit",
        )
        .style(Style::default().fg(Color::DarkGray)),
        outer[3],
    );

    if app.show_errors {
        let area = centered_rect(70, 50, f.size());
        let lines: Vec<Line> = if app.errors.is_empty() {
            vec![Line::from("No errors")]
        } else {
            app.errors.iter().map(|e| Line::from(e.as_str())).collect()
        };
        f.render_widget(Clear, area);
        f.render_widget(
            Paragraph::new(lines)
                .wrap(Wrap { trim: true })
                .block(Block::default().title("Errors (Esc closes)").borders(Borders::ALL)),
            area,
        );
    }

    if app.input_mode == InputMode::Filter {
        let area = centered_rect(50, 15, f.size());
        f.render_widget(Clear, area);
        f.render_widget(
            Paragraph::new(app.input.as_str())
                .block(Block::default().title("Search (Enter applies)").borders(Borders::ALL)),
            area,
        );
    }
}

fn render_status(f: &mut Frame, app: &App, area: Rect) {
    let chunks = Layout::horizontal([Constraint::Percentage(65), Constraint::Percentage(35)]).split(area);
    let filter = match (&app.filter.market, app.filter.min_score, &app.filter.text) {
        (None, None, None) => "none".to_string(),
        (market, min, text) => [
            market.as_ref().map(|m| format!("market={m}")),
            min.map(|s| format!("score>={s}")),
            text.as_ref().map(|t| format!("\"{t}\"")),
        ]
        .into_iter()
        .flatten()
        .collect::<Vec<_>>()
        .join(" "),
    };
    let arrow = match app.sort_dir {
        SortDirection::Ascending => "↑",
        SortDirection::Descending => "↓",
    };
    f.render_widget(
        Paragraph::new(format!(
            "Sort: {} {arrow}  Filter: {filter}  Rows: {}/{}  {}",
            app.sort_key.label(),
            app.view.len(),
            app.rows.len(),
            app.status
        ))
        .block(Block::default().borders(Borders::ALL).title("Candle Screener")),
        chunks[0],
    );

    let (done, total) = app.progress;
    let ratio = if total == 0 { 0.0 } else { done as f64 / total as f64 };
    let title = if app.errors.is_empty() {
        "Progress".to_string()
    } else {
        format!("Progress ({} errors, e shows)", app.errors.len())
    };
    f.render_widget(
        Gauge::default()
            .block(Block::default().borders(Borders::ALL).title(title))
            .gauge_style(Style::default().fg(Color::Cyan))
            .ratio(ratio.clamp(0.0, 1.0))
            .label(format!("{done}/{total}")),
        chunks[1],
    );
}

fn render_table(f: &mut Frame, app: &mut App, area: Rect) {
    let header = Row::new(["Symbol", "Name", "Mkt", "Score", "Hits", "Last"])
        .style(Style::default().bg(Color::DarkGray));
    let rows: Vec<Row> = app
        .visible_rows()
        .map(|row| {
            let style = row_style(app.highlight.classify(row.score));
            Row::new([
                Cell::from(row.symbol.clone()).style(Style::default().fg(Color::Cyan)),
                Cell::from(row.name.clone()),
                Cell::from(row.market.clone()).style(Style::default().fg(Color::DarkGray)),
                Cell::from(row.label.clone()).style(style),
                Cell::from(row.hit_count.to_string()),
                Cell::from(row.last_date.map(|d| d.to_string()).unwrap_or_default()),
            ])
            .style(style)
        })
        .collect();
    let table = Table::new(
        rows,
        [
            Constraint::Length(10),
            Constraint::Percentage(30),
            Constraint::Length(4),
            Constraint::Length(18),
            Constraint::Length(5),
            Constraint::Length(11),
        ],
    )
    .header(header)
    .highlight_style(Style::default().add_modifier(Modifier::REVERSED))
    .block(Block::default().borders(Borders::ALL).title("Symbols"));
    f.render_stateful_widget(table, area, &mut app.table_state);
}

fn render_detail(f: &mut Frame, app: &App, area: Rect) {
    let block = Block::default().borders(Borders::ALL).title("Detail");
    let Some(summary) = app.selected_summary() else {
        let text = match app.selected_row() {
            Some(row) => format!("{}: not analysed yet", row.symbol),
            None => "No symbol selected".to_string(),
        };
        f.render_widget(Paragraph::new(text).block(block), area);
        return;
    };

    let mut lines = vec![
        Line::from(format!("{}  {}", summary.symbol, summary.name)).style(Style::default().bold()),
        Line::from(format!(
            "Close {}  on {}",
            summary
                .close_price
                .map(|c| format!("{c:.2}"))
                .unwrap_or_else(|| "—".into()),
            summary
                .last_date
                .map(|d| d.to_string())
                .unwrap_or_else(|| "—".into())
        )),
        Line::from(categorize_score(Some(summary.total_score), &app.bounds).1),
        Line::from(""),
        Line::from("Today").style(Style::default().fg(Color::Yellow)),
    ];
    if summary.hits.is_empty() {
        lines.push(Line::from("  no patterns"));
    }
    for hit in &summary.hits {
        lines.push(Line::from(format!(
            "  {} ({:+}) base {} weighted {}",
            hit.display_name(),
            hit.value,
            hit.base_score,
            hit.weighted_score
                .map(|w| format!("{w:.2}"))
                .unwrap_or_else(|| "—".into())
        )));
        if let Some(text) = &hit.description {
            lines.push(Line::from(format!("    {text}")).style(Style::default().fg(Color::DarkGray)));
        }
    }
    lines.push(Line::from(""));
    lines.push(Line::from("History").style(Style::default().fg(Color::Yellow)));
    for entry in summary.history.iter().rev() {
        let names = entry
            .hits
            .iter()
            .map(|h| h.display_name().to_string())
            .collect::<Vec<_>>()
            .join(", ");
        let style = row_style(app.highlight.classify(Some(entry.total_score)));
        lines.push(
            Line::from(format!("  {}  {:+}  {names}", entry.date, entry.total_score)).style(style),
        );
    }
    f.render_widget(
        Paragraph::new(lines).wrap(Wrap { trim: false }).block(block),
        area,
    );
}

fn centered_rect(percent_x: u16, percent_y: u16, r: Rect) -> Rect {
    let popup_layout = Layout::vertical([
        Constraint::Percentage((100 - percent_y) / 2),
        Constraint::Percentage(percent_y),
        Constraint::Percentage((100 - percent_y) / 2),
    ])
    .split(r);
    Layout::horizontal([
        Constraint::Percentage((100 - percent_x) / 2),
        Constraint::Percentage(percent_x),
        Constraint::Percentage((100 - percent_x) / 2),
    ])
    .split(popup_layout[1])[1]
}
