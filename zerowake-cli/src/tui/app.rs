// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! TUI Dashboard using ratatui.
//!
//! Polls the gateway status surface and shows per-function scale state,
//! replica counts, waiters and reconcile errors.

use std::io::stdout;
use std::time::Duration;

use crossterm::{
    event::{self, Event, KeyCode, KeyEventKind},
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
    ExecutableCommand,
};
use ratatui::{
    prelude::*,
    widgets::{Block, Borders, Cell, Paragraph, Row, Table},
};

use zerowake_core::{Phase, ScaleState, StatusReport};

use crate::client::GatewayClient;
use crate::commands::stats::{reconcile_label, replicas_label, scale_label};

/// Ticks (100ms each) between status polls.
const POLL_EVERY_TICKS: u64 = 10;

/// Dashboard state.
struct App {
    /// Whether to quit the application.
    should_quit: bool,
    tick: u64,
    gateway: String,
    report: Option<StatusReport>,
    /// Last failed poll, cleared by the next successful one.
    poll_error: Option<String>,
}

impl App {
    fn new(gateway: &str) -> Self {
        Self {
            should_quit: false,
            tick: 0,
            gateway: gateway.to_string(),
            report: None,
            poll_error: None,
        }
    }

    fn tick(&mut self) {
        self.tick = self.tick.wrapping_add(1);
    }

    fn due_for_poll(&self) -> bool {
        self.tick % POLL_EVERY_TICKS == 0
    }
}

/// Run the TUI dashboard against the gateway at `gateway`.
pub async fn run_dashboard(gateway: &str) -> Result<(), Box<dyn std::error::Error>> {
    let client = GatewayClient::new(gateway)?;

    // Setup terminal
    enable_raw_mode()?;
    stdout().execute(EnterAlternateScreen)?;
    let mut terminal = Terminal::new(CrosstermBackend::new(stdout()))?;

    let mut app = App::new(gateway);

    // Main loop
    loop {
        if app.due_for_poll() {
            match client.status().await {
                Ok(report) => {
                    app.report = Some(report);
                    app.poll_error = None;
                }
                Err(e) => app.poll_error = Some(e.to_string()),
            }
        }

        terminal.draw(|frame| render(frame, &app))?;

        if event::poll(Duration::from_millis(100))? {
            if let Event::Key(key) = event::read()? {
                if key.kind == KeyEventKind::Press {
                    match key.code {
                        KeyCode::Char('q') | KeyCode::Esc => app.should_quit = true,
                        _ => {}
                    }
                }
            }
        }

        if app.should_quit {
            break;
        }

        app.tick();
    }

    // Restore terminal
    disable_raw_mode()?;
    stdout().execute(LeaveAlternateScreen)?;

    Ok(())
}

fn state_color(state: Option<ScaleState>) -> Color {
    match state {
        Some(ScaleState::Ready) => Color::Green,
        Some(ScaleState::ScalingUp) => Color::Yellow,
        Some(ScaleState::ScalingDown) => Color::Magenta,
        Some(ScaleState::Idle) => Color::Blue,
        None => Color::Gray,
    }
}

fn phase_color(phase: Phase) -> Color {
    match phase {
        Phase::Ready => Color::Green,
        Phase::Pending => Color::Yellow,
        Phase::Failed => Color::Red,
    }
}

fn render(frame: &mut Frame, app: &App) {
    let main_layout = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3), // Title
            Constraint::Min(10),   // Main content
            Constraint::Length(3), // Footer
        ])
        .split(frame.area());

    // Title
    let title = Paragraph::new(" ZEROWAKE DASHBOARD ")
        .style(
            Style::default()
                .fg(Color::Cyan)
                .add_modifier(Modifier::BOLD),
        )
        .alignment(Alignment::Center)
        .block(
            Block::default()
                .borders(Borders::ALL)
                .border_style(Style::default().fg(Color::Cyan)),
        );
    frame.render_widget(title, main_layout[0]);

    let content_layout = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(65), Constraint::Percentage(35)])
        .split(main_layout[1]);

    // Function table
    let header = Row::new(vec![
        Cell::from("Function ID"),
        Cell::from("Scale"),
        Cell::from("Ready/Desired"),
        Cell::from("Waiters"),
        Cell::from("Reconcile"),
    ])
    .style(
        Style::default()
            .add_modifier(Modifier::BOLD)
            .fg(Color::Yellow),
    );

    let placeholder = |text: &str| {
        Row::new(vec![
            Cell::from(text.to_string()),
            Cell::from("-"),
            Cell::from("-"),
            Cell::from("-"),
            Cell::from("-"),
        ])
        .style(Style::default().fg(Color::DarkGray))
    };

    let rows: Vec<Row> = match &app.report {
        Some(report) if report.functions.is_empty() => vec![placeholder("(no functions declared)")],
        Some(report) => report
            .functions
            .iter()
            .map(|f| {
                Row::new(vec![
                    Cell::from(f.id.to_string()),
                    Cell::from(scale_label(f)).style(Style::default().fg(state_color(f.scale_state))),
                    Cell::from(replicas_label(f)),
                    Cell::from(f.waiters.to_string()),
                    Cell::from(reconcile_label(f)).style(Style::default().fg(phase_color(f.phase))),
                ])
            })
            .collect(),
        None => vec![placeholder("Waiting for gateway...")],
    };

    let table = Table::new(
        rows,
        [
            Constraint::Percentage(28),
            Constraint::Percentage(16),
            Constraint::Percentage(16),
            Constraint::Percentage(10),
            Constraint::Percentage(30),
        ],
    )
    .header(header)
    .block(
        Block::default()
            .title(" Functions ")
            .borders(Borders::ALL)
            .border_style(Style::default().fg(Color::Green)),
    );
    frame.render_widget(table, content_layout[0]);

    let right_layout = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Length(8), Constraint::Min(5)])
        .split(content_layout[1]);

    // Totals
    let functions = app.report.as_ref().map(|r| r.functions.as_slice()).unwrap_or(&[]);
    let ready: u32 = functions.iter().filter_map(|f| f.ready_replicas).sum();
    let waiters: usize = functions.iter().map(|f| f.waiters).sum();
    let scaled_to_zero = functions
        .iter()
        .filter(|f| f.desired_replicas == Some(0))
        .count();

    let stats_text = vec![
        Line::from(vec![
            Span::raw("Gateway: "),
            Span::styled(app.gateway.clone(), Style::default().fg(Color::Cyan)),
        ]),
        Line::from(vec![
            Span::raw("Ready Replicas: "),
            Span::styled(
                ready.to_string(),
                Style::default()
                    .fg(Color::Green)
                    .add_modifier(Modifier::BOLD),
            ),
        ]),
        Line::from(vec![
            Span::raw("Scaled to Zero: "),
            Span::styled(scaled_to_zero.to_string(), Style::default().fg(Color::Blue)),
        ]),
        Line::from(vec![
            Span::raw("Waiting Callers: "),
            Span::styled(waiters.to_string(), Style::default().fg(Color::Yellow)),
        ]),
    ];
    let stats_block = Paragraph::new(stats_text).block(
        Block::default()
            .title(" Control Plane ")
            .borders(Borders::ALL),
    );
    frame.render_widget(stats_block, right_layout[0]);

    // Errors
    let mut error_lines: Vec<Line> = Vec::new();
    if let Some(e) = &app.poll_error {
        error_lines.push(Line::from(Span::styled(
            format!("gateway: {}", e),
            Style::default().fg(Color::Red),
        )));
    }
    for f in functions {
        if let Some(error) = &f.last_error {
            error_lines.push(Line::from(Span::styled(
                format!("{}: {}", f.id, error),
                Style::default().fg(Color::Red),
            )));
        }
    }
    if error_lines.is_empty() {
        error_lines.push(Line::from(Span::styled(
            "none",
            Style::default().fg(Color::DarkGray),
        )));
    }
    let errors = Paragraph::new(error_lines).block(
        Block::default()
            .title(" Last Errors ")
            .borders(Borders::ALL),
    );
    frame.render_widget(errors, right_layout[1]);

    // Footer
    let footer = Paragraph::new(" Press 'q' to quit ")
        .style(Style::default().fg(Color::DarkGray))
        .alignment(Alignment::Center)
        .block(Block::default().borders(Borders::ALL));
    frame.render_widget(footer, main_layout[2]);
}
