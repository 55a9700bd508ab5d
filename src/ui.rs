use anyhow::Result;
use crossterm::{
    event::{self, Event, KeyCode, KeyModifiers},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{
    backend::CrosstermBackend,
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Cell, Paragraph, Row, Table, TableState},
    Frame, Terminal,
};
use rusqlite::Connection;
use std::io;

use crate::ledger::{Ledger, ValidationError};
use crate::preview::{self, FormInput};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Page {
    Records,
    Stats,
    NewRecord,
}

impl Page {
    pub fn next(&self) -> Self {
        match self {
            Page::Records => Page::Stats,
            Page::Stats => Page::NewRecord,
            Page::NewRecord => Page::Records,
        }
    }

    pub fn previous(&self) -> Self {
        match self {
            Page::Records => Page::NewRecord,
            Page::Stats => Page::Records,
            Page::NewRecord => Page::Stats,
        }
    }

    pub fn title(&self) -> &str {
        match self {
            Page::Records => "Records",
            Page::Stats => "Stats",
            Page::NewRecord => "New Record",
        }
    }
}

const FORM_FIELDS: [&str; 8] = [
    "Partner",
    "Date (YYYY-MM-DD)",
    "Entries",
    "Exits",
    "Total Kg",
    "Price/Kg",
    "Freight",
    "Commission",
];

pub struct App<'a> {
    conn: &'a Connection,
    pub ledger: Ledger,
    pub state: TableState,
    pub current_page: Page,
    pub form: FormInput,
    pub form_field: usize,
    pub status: Option<String>,
}

impl<'a> App<'a> {
    pub fn new(conn: &'a Connection, ledger: Ledger) -> Self {
        let mut state = TableState::default();
        if !ledger.records.is_empty() {
            state.select(Some(0));
        }

        Self {
            conn,
            ledger,
            state,
            current_page: Page::Records,
            form: FormInput::default(),
            form_field: 0,
            status: None,
        }
    }

    pub fn next_page(&mut self) {
        self.current_page = self.current_page.next();
    }

    pub fn previous_page(&mut self) {
        self.current_page = self.current_page.previous();
    }

    fn visible_len(&self) -> usize {
        self.ledger.records_for_selected().len()
    }

    pub fn next_row(&mut self) {
        let len = self.visible_len();
        if len == 0 {
            return;
        }
        let i = match self.state.selected() {
            Some(i) => {
                if i >= len - 1 {
                    0
                } else {
                    i + 1
                }
            }
            None => 0,
        };
        self.state.select(Some(i));
    }

    pub fn previous_row(&mut self) {
        let len = self.visible_len();
        if len == 0 {
            return;
        }
        let i = match self.state.selected() {
            Some(i) => {
                if i == 0 {
                    len - 1
                } else {
                    i - 1
                }
            }
            None => 0,
        };
        self.state.select(Some(i));
    }

    pub fn next_partner(&mut self) {
        self.cycle_partner(1);
    }

    pub fn previous_partner(&mut self) {
        self.cycle_partner(-1);
    }

    fn cycle_partner(&mut self, step: i64) {
        let partners = self.ledger.partners();
        if partners.is_empty() {
            return;
        }

        let current = self
            .ledger
            .selected_partner
            .as_ref()
            .and_then(|p| partners.iter().position(|x| x == p))
            .unwrap_or(0) as i64;
        let len = partners.len() as i64;
        let next = (current + step).rem_euclid(len) as usize;

        self.ledger.select_partner(Some(partners[next].clone()));
        self.state.select(Some(0));
    }

    fn active_field_mut(&mut self) -> &mut String {
        match self.form_field {
            0 => &mut self.form.partner,
            1 => &mut self.form.date,
            2 => &mut self.form.entries,
            3 => &mut self.form.exits,
            4 => &mut self.form.total_kg,
            5 => &mut self.form.price_per_kg,
            6 => &mut self.form.freight,
            _ => &mut self.form.commission,
        }
    }

    fn field_value(&self, index: usize) -> &str {
        match index {
            0 => &self.form.partner,
            1 => &self.form.date,
            2 => &self.form.entries,
            3 => &self.form.exits,
            4 => &self.form.total_kg,
            5 => &self.form.price_per_kg,
            6 => &self.form.freight,
            _ => &self.form.commission,
        }
    }

    fn type_char(&mut self, c: char) {
        // Partner names are stored uppercase; mirror that while typing
        let c = if self.form_field == 0 {
            c.to_ascii_uppercase()
        } else {
            c
        };
        self.active_field_mut().push(c);
    }

    fn submit_form(&mut self) {
        let input = self.form.clone();
        match self.ledger.submit(self.conn, &input) {
            Ok(submission) => {
                let mut message = format!("Saved record for {}", submission.record.partner);
                if submission.needs_exit_reasons {
                    message.push_str(&format!(
                        " ({} exits pending reason entry)",
                        submission.record.exits
                    ));
                }
                self.status = Some(message);
                self.form = FormInput::default();
                self.form_field = 0;
                self.current_page = Page::Records;
                self.state.select(Some(0));
            }
            Err(e) => {
                if let Some(v) = e.downcast_ref::<ValidationError>() {
                    self.status = Some(v.to_string());
                } else {
                    self.status = Some("Failed to save record".to_string());
                }
            }
        }
    }
}

pub fn run_ui(conn: &Connection, ledger: Ledger) -> Result<()> {
    // Setup terminal
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let mut app = App::new(conn, ledger);

    // Run the app
    let res = run_app(&mut terminal, &mut app);

    // Restore terminal
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;

    if let Err(err) = res {
        println!("Error: {:?}", err);
    }

    Ok(())
}

fn run_app<B: ratatui::backend::Backend>(
    terminal: &mut Terminal<B>,
    app: &mut App,
) -> io::Result<()> {
    loop {
        terminal.draw(|f| ui(f, app))?;

        if let Event::Key(key) = event::read()? {
            // The form page captures plain characters, so global keys are
            // limited there
            if app.current_page == Page::NewRecord {
                match key.code {
                    KeyCode::Esc => {
                        app.current_page = Page::Records;
                    }
                    KeyCode::Tab => app.next_page(),
                    KeyCode::Enter => app.submit_form(),
                    KeyCode::Down => {
                        app.form_field = (app.form_field + 1) % FORM_FIELDS.len();
                    }
                    KeyCode::Up => {
                        app.form_field =
                            (app.form_field + FORM_FIELDS.len() - 1) % FORM_FIELDS.len();
                    }
                    KeyCode::Backspace => {
                        app.active_field_mut().pop();
                    }
                    KeyCode::Char(c) => app.type_char(c),
                    _ => {}
                }
                continue;
            }

            match key.code {
                KeyCode::Char('q') | KeyCode::Esc => return Ok(()),
                KeyCode::Tab => {
                    if key.modifiers.contains(KeyModifiers::SHIFT) {
                        app.previous_page();
                    } else {
                        app.next_page();
                    }
                }
                KeyCode::Char('n') => {
                    app.current_page = Page::NewRecord;
                }
                KeyCode::Down | KeyCode::Char('j') => app.next_row(),
                KeyCode::Up | KeyCode::Char('k') => app.previous_row(),
                KeyCode::Right | KeyCode::Char('l') => app.next_partner(),
                KeyCode::Left | KeyCode::Char('h') => app.previous_partner(),
                _ => {}
            }
        }
    }
}

fn ui(f: &mut Frame, app: &mut App) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3), // Header with navigation
            Constraint::Min(0),    // Content area
            Constraint::Length(3), // Status bar
        ])
        .split(f.size());

    render_header(f, chunks[0], app);

    match app.current_page {
        Page::Records => render_records(f, chunks[1], app),
        Page::Stats => render_stats(f, chunks[1], app),
        Page::NewRecord => render_form(f, chunks[1], app),
    }

    render_status_bar(f, chunks[2], app);
}

fn money(value: f64) -> String {
    format!("${:.0}", value.round())
}

fn render_header(f: &mut Frame, area: Rect, app: &App) {
    let pages = [Page::Records, Page::Stats, Page::NewRecord];

    let mut tab_spans = vec![];
    for (i, page) in pages.iter().enumerate() {
        if i > 0 {
            tab_spans.push(Span::raw(" │ "));
        }

        let style = if *page == app.current_page {
            Style::default()
                .fg(Color::Yellow)
                .add_modifier(Modifier::BOLD | Modifier::UNDERLINED)
        } else {
            Style::default().fg(Color::DarkGray)
        };

        tab_spans.push(Span::styled(page.title(), style));
    }

    tab_spans.push(Span::raw("  |  "));
    tab_spans.push(Span::styled(
        format!("Records: {}", app.ledger.records.len()),
        Style::default().fg(Color::White),
    ));
    tab_spans.push(Span::raw("  |  "));
    tab_spans.push(Span::styled(
        format!(
            "Partner: {}",
            app.ledger.selected_partner.as_deref().unwrap_or("-")
        ),
        Style::default().fg(Color::Green),
    ));

    let header = Paragraph::new(vec![Line::from(tab_spans)]).block(
        Block::default()
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::Cyan)),
    );

    f.render_widget(header, area);
}

fn render_records(f: &mut Frame, area: Rect, app: &mut App) {
    let header_cells = [
        "Date", "In", "Out", "Balance", "Kg", "Price/Kg", "Freight", "Val/Animal", "Settlement",
    ]
    .iter()
    .map(|h| {
        Cell::from(*h).style(
            Style::default()
                .fg(Color::Yellow)
                .add_modifier(Modifier::BOLD),
        )
    });

    let header = Row::new(header_cells)
        .style(Style::default().bg(Color::DarkGray))
        .height(1);

    let records: Vec<_> = app
        .ledger
        .records_for_selected()
        .into_iter()
        .cloned()
        .collect();

    let rows = records.iter().map(|record| {
        let balance_color = if record.balance >= 0 {
            Color::Green
        } else {
            Color::Red
        };
        let divisor = app.ledger.group_size(record);

        let cells = vec![
            Cell::from(record.date.to_string()),
            Cell::from(record.entries.to_string()),
            Cell::from(record.exits.to_string()),
            Cell::from(record.balance.to_string()).style(Style::default().fg(balance_color)),
            Cell::from(format!("{:.0}", record.total_kg)),
            Cell::from(money(record.price_per_kg)),
            Cell::from(format!("{} ÷{}", money(record.freight), divisor)),
            Cell::from(money(record.value_per_animal)),
            Cell::from(money(record.settlement)).style(Style::default().fg(Color::Cyan)),
        ];

        Row::new(cells).height(1)
    });

    let title = match &app.ledger.selected_partner {
        Some(partner) => format!(" {} ", partner),
        None => " No partner selected ".to_string(),
    };

    let table = Table::new(
        rows,
        [
            Constraint::Length(12),
            Constraint::Length(6),
            Constraint::Length(6),
            Constraint::Length(9),
            Constraint::Length(9),
            Constraint::Length(10),
            Constraint::Length(14),
            Constraint::Length(12),
            Constraint::Length(14),
        ],
    )
    .header(header)
    .block(
        Block::default()
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::White))
            .title(title),
    )
    .highlight_style(
        Style::default()
            .bg(Color::DarkGray)
            .add_modifier(Modifier::BOLD),
    )
    .highlight_symbol("→ ");

    f.render_stateful_widget(table, area, &mut app.state);
}

fn render_stats(f: &mut Frame, area: Rect, app: &App) {
    let mut lines = vec![Line::from("")];

    match app.ledger.stats_for_selected() {
        Some(stats) => {
            lines.push(Line::from(vec![
                Span::raw("  Partner:            "),
                Span::styled(
                    stats.partner.clone(),
                    Style::default()
                        .fg(Color::Green)
                        .add_modifier(Modifier::BOLD),
                ),
            ]));
            lines.push(Line::from(""));
            lines.push(Line::from(format!(
                "  Records:            {}",
                stats.record_count
            )));
            lines.push(Line::from(format!(
                "  Total entries:      {}",
                stats.total_entries
            )));
            lines.push(Line::from(format!(
                "  Total exits:        {}",
                stats.total_exits
            )));
            lines.push(Line::from(vec![
                Span::raw("  Accumulated total:  "),
                Span::styled(
                    money(stats.total_settlement),
                    Style::default().fg(Color::Cyan),
                ),
            ]));
        }
        None => {
            lines.push(Line::from("  No partner selected"));
        }
    }

    lines.push(Line::from(""));
    lines.push(Line::from(Span::styled(
        "  Partners:",
        Style::default().add_modifier(Modifier::BOLD),
    )));
    for partner in app.ledger.partners() {
        let marker = if Some(&partner) == app.ledger.selected_partner.as_ref() {
            "→ "
        } else {
            "  "
        };
        lines.push(Line::from(format!("  {}{}", marker, partner)));
    }

    let paragraph = Paragraph::new(lines).block(
        Block::default()
            .borders(Borders::ALL)
            .title(" Partner Stats "),
    );

    f.render_widget(paragraph, area);
}

fn render_form(f: &mut Frame, area: Rect, app: &App) {
    let chunks = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(55), Constraint::Percentage(45)])
        .split(area);

    // Input fields
    let mut lines = vec![Line::from("")];
    for (i, label) in FORM_FIELDS.iter().enumerate() {
        let active = i == app.form_field;
        let cursor = if active { "_" } else { "" };
        let style = if active {
            Style::default()
                .fg(Color::Yellow)
                .add_modifier(Modifier::BOLD)
        } else {
            Style::default()
        };

        lines.push(Line::from(vec![
            Span::styled(format!("  {:<20}", label), style),
            Span::raw(format!("{}{}", app.field_value(i), cursor)),
        ]));
    }

    let form = Paragraph::new(lines).block(
        Block::default()
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::White))
            .title(" New Record "),
    );
    f.render_widget(form, chunks[0]);

    // Live preview against the loaded record set
    let p = preview::preview(&app.form, &app.ledger.records);

    let preview_lines = vec![
        Line::from(""),
        Line::from(format!("  Balance:          {}", p.balance)),
        Line::from(format!("  Value per animal: {}", money(p.value_per_animal))),
        Line::from(format!("  Settlement:       {}", money(p.settlement))),
        Line::from(format!("  Freight split by: {}", p.freight_divisor)),
        Line::from(""),
        Line::from(Span::styled(
            "  Saving recomputes every record of",
            Style::default().fg(Color::DarkGray),
        )),
        Line::from(Span::styled(
            "  this partner and date.",
            Style::default().fg(Color::DarkGray),
        )),
    ];

    let preview_panel = Paragraph::new(preview_lines).block(
        Block::default()
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::Cyan))
            .title(" Preview "),
    );
    f.render_widget(preview_panel, chunks[1]);
}

fn render_status_bar(f: &mut Frame, area: Rect, app: &App) {
    let mut status_spans = vec![];

    if let Some(message) = &app.status {
        status_spans.push(Span::styled(
            format!(" {} ", message),
            Style::default().fg(Color::Green),
        ));
        status_spans.push(Span::raw("| "));
    }

    match app.current_page {
        Page::NewRecord => {
            status_spans.push(Span::styled("Enter", Style::default().fg(Color::Yellow)));
            status_spans.push(Span::raw(" Save | "));
            status_spans.push(Span::styled("↑/↓", Style::default().fg(Color::Yellow)));
            status_spans.push(Span::raw(" Field | "));
            status_spans.push(Span::styled("Esc", Style::default().fg(Color::Yellow)));
            status_spans.push(Span::raw(" Back"));
        }
        _ => {
            status_spans.push(Span::styled("Tab", Style::default().fg(Color::Yellow)));
            status_spans.push(Span::raw(" Page | "));
            status_spans.push(Span::styled("n", Style::default().fg(Color::Yellow)));
            status_spans.push(Span::raw(" New | "));
            status_spans.push(Span::styled("←/→", Style::default().fg(Color::Yellow)));
            status_spans.push(Span::raw(" Partner | "));
            status_spans.push(Span::styled("↑/↓", Style::default().fg(Color::Yellow)));
            status_spans.push(Span::raw(" Nav | "));
            status_spans.push(Span::styled("q", Style::default().fg(Color::Yellow)));
            status_spans.push(Span::raw(" Quit"));
        }
    }

    let status = Paragraph::new(vec![Line::from(status_spans)]).block(
        Block::default()
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::Cyan)),
    );

    f.render_widget(status, area);
}
