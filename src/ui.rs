use ratatui::{
    buffer::Buffer,
    layout::{Alignment, Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    symbols::Marker,
    text::{Line, Span},
    widgets::{Axis, Block, Borders, Cell, Chart, Dataset, GraphType, Paragraph, Row, Table, Widget, Wrap},
};
use unicode_width::UnicodeWidthStr;

use crate::app::{App, Screen};
use crate::clock::Clock;
use crate::persistence::SessionStore;
use crate::session::UserSession;
use crate::time_series::{chart_bounds, format_label};

const HORIZONTAL_MARGIN: u16 = 5;
const VERTICAL_MARGIN: u16 = 2;

fn bold() -> Style {
    Style::default().add_modifier(Modifier::BOLD)
}

fn dim_bold() -> Style {
    bold().add_modifier(Modifier::DIM)
}

impl<S: SessionStore, C: Clock> Widget for &App<S, C> {
    fn render(self, area: Rect, buf: &mut Buffer) {
        match self.screen {
            Screen::Recovery => render_recovery(self, area, buf),
            Screen::Typing => render_typing(self, area, buf),
            Screen::Results => render_results(self, area, buf),
            Screen::History => render_history(self, area, buf),
        }
    }
}

fn render_recovery<S: SessionStore, C: Clock>(app: &App<S, C>, area: Rect, buf: &mut Buffer) {
    let Some(session) = app.machine.session() else {
        return;
    };
    let lines = vec![
        Line::from(Span::styled(
            "An unfinished session was found",
            bold().fg(Color::Yellow),
        )),
        Line::from(format!(
            "theme: {}   progress: {}/{} chars   {} wpm",
            session.theme,
            session.user_progress.current_position,
            session.content_len(),
            session.metrics.wpm
        )),
        Line::from(if app.machine.interrupted_while_paused() {
            "it was paused when it was interrupted"
        } else {
            "it was interrupted mid-typing"
        }),
        Line::from(""),
        Line::from(Span::styled(
            "(enter) continue / (n) start fresh",
            Style::default().add_modifier(Modifier::ITALIC),
        )),
    ];
    let top = area.height.saturating_sub(lines.len() as u16) / 2;
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Length(top), Constraint::Min(1)])
        .split(area);

    Paragraph::new(lines)
        .alignment(Alignment::Center)
        .wrap(Wrap { trim: true })
        .render(chunks[1], buf);
}

/// Styled spans for the reference text with the typed input laid over it.
fn prompt_spans(session: &UserSession) -> Vec<Span<'static>> {
    let green = bold().fg(Color::Green);
    let red = bold().fg(Color::Red);
    let reference: Vec<char> = session.content.chars().collect();
    let typed: Vec<char> = session.user_progress.typed_text.chars().collect();

    let mut spans: Vec<Span> = typed
        .iter()
        .enumerate()
        .map(|(idx, &c)| match reference.get(idx) {
            Some(&expected) if expected == c => Span::styled(expected.to_string(), green),
            _ => Span::styled(
                match c {
                    ' ' => "·".to_owned(),
                    c => c.to_string(),
                },
                red,
            ),
        })
        .collect();

    let cursor = typed.len();
    if let Some(expected) = reference.get(cursor) {
        spans.push(Span::styled(
            expected.to_string(),
            dim_bold().add_modifier(Modifier::UNDERLINED),
        ));
    }
    if cursor + 1 < reference.len() {
        let rest: String = reference[cursor + 1..].iter().collect();
        spans.push(Span::styled(rest, dim_bold()));
    }
    spans
}

fn render_typing<S: SessionStore, C: Clock>(app: &App<S, C>, area: Rect, buf: &mut Buffer) {
    let Some(session) = app.machine.session() else {
        return;
    };

    let max_chars_per_line = area.width.saturating_sub(HORIZONTAL_MARGIN * 2).max(1);
    let prompt_width = session.content.width();
    let prompt_lines = if prompt_width <= max_chars_per_line as usize {
        1
    } else {
        (prompt_width as f64 / max_chars_per_line as f64).ceil() as u16 + 1
    };

    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .horizontal_margin(HORIZONTAL_MARGIN)
        .constraints([
            Constraint::Length(area.height.saturating_sub(prompt_lines + 4) / 2),
            Constraint::Length(2),
            Constraint::Length(prompt_lines),
            Constraint::Length(2),
            Constraint::Min(0),
        ])
        .split(area);

    let metrics = &session.metrics;
    let status = format!(
        "{} wpm   {}% acc   {} errors   {}s",
        metrics.wpm, metrics.accuracy, metrics.error_count, metrics.time_elapsed
    );
    Paragraph::new(Span::styled(status, dim_bold()))
        .alignment(Alignment::Center)
        .render(chunks[1], buf);

    Paragraph::new(Line::from(prompt_spans(session)))
        .alignment(if prompt_lines == 1 {
            Alignment::Center
        } else {
            Alignment::Left
        })
        .wrap(Wrap { trim: true })
        .render(chunks[2], buf);

    let (hint, style) = if app.machine.is_paused() {
        (
            "PAUSED - press any key to continue",
            bold().fg(Color::Yellow).add_modifier(Modifier::ITALIC),
        )
    } else {
        (
            "(tab) pause / (esc) finish",
            Style::default().add_modifier(Modifier::ITALIC | Modifier::DIM),
        )
    };
    Paragraph::new(Span::styled(hint, style))
        .alignment(Alignment::Center)
        .render(chunks[3], buf);
}

fn render_results<S: SessionStore, C: Clock>(app: &App<S, C>, area: Rect, buf: &mut Buffer) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .horizontal_margin(HORIZONTAL_MARGIN)
        .vertical_margin(VERTICAL_MARGIN)
        .constraints([
            Constraint::Min(1),
            Constraint::Length(1),
            Constraint::Length(1),
            Constraint::Length(1),
            Constraint::Length(1),
        ])
        .split(area);

    let (duration, highest_wpm) = chart_bounds(&app.finished_samples);
    let tuples: Vec<(f64, f64)> = app.finished_samples.iter().map(|&p| p.into()).collect();
    let datasets = vec![Dataset::default()
        .marker(Marker::Braille)
        .style(Style::default().fg(Color::Magenta))
        .graph_type(GraphType::Line)
        .data(&tuples)];

    Chart::new(datasets)
        .x_axis(
            Axis::default()
                .title("seconds")
                .bounds([0.0, duration])
                .labels(vec![
                    Span::styled("0", bold()),
                    Span::styled(format_label(duration), bold()),
                ]),
        )
        .y_axis(
            Axis::default()
                .title("wpm")
                .bounds([0.0, highest_wpm])
                .labels(vec![
                    Span::styled("0", bold()),
                    Span::styled(format_label(highest_wpm), bold()),
                ]),
        )
        .render(chunks[0], buf);

    if let Some(record) = &app.last_record {
        let stats = format!(
            "{} wpm   {} net   {}% acc   {} errors ({} fixed)   {}s",
            record.wpm,
            record.net_wpm,
            record.accuracy,
            record.error_count,
            record.corrected_errors,
            record.duration_secs
        );
        Paragraph::new(Span::styled(stats, bold()))
            .alignment(Alignment::Center)
            .render(chunks[1], buf);
    }

    let summary = &app.summary;
    if summary.session_count > 0 {
        let line = format!(
            "{} sessions   avg {:.0} wpm   best {} wpm   avg {:.1}% acc",
            summary.session_count, summary.average_wpm, summary.best_wpm, summary.average_accuracy
        );
        Paragraph::new(Span::styled(
            line,
            Style::default().fg(Color::Cyan).add_modifier(Modifier::ITALIC),
        ))
        .alignment(Alignment::Center)
        .render(chunks[2], buf);
    }

    Paragraph::new(Span::styled(
        "(r)etry / (n)ew / (h)istory / (esc)ape",
        Style::default().add_modifier(Modifier::ITALIC),
    ))
    .render(chunks[4], buf);
}

fn render_history<S: SessionStore, C: Clock>(app: &App<S, C>, area: Rect, buf: &mut Buffer) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .horizontal_margin(HORIZONTAL_MARGIN)
        .vertical_margin(1)
        .constraints([Constraint::Min(3), Constraint::Length(1)])
        .split(area);

    let header = Row::new(vec!["started", "theme", "wpm", "acc", "errors", "secs", "done"])
        .style(bold().fg(Color::Cyan));
    let rows: Vec<Row> = app
        .recent
        .iter()
        .map(|s| {
            let acc_style = if s.accuracy >= 95.0 {
                Style::default().fg(Color::Green)
            } else if s.accuracy >= 85.0 {
                Style::default().fg(Color::Yellow)
            } else {
                Style::default().fg(Color::Red)
            };
            Row::new(vec![
                Cell::from(s.started_at.format("%Y-%m-%d %H:%M").to_string()),
                Cell::from(s.theme.clone()),
                Cell::from(s.wpm.to_string()).style(bold()),
                Cell::from(format!("{:.1}%", s.accuracy)).style(acc_style),
                Cell::from(s.error_count.to_string()),
                Cell::from(s.duration_secs.to_string()),
                Cell::from(if s.completed { "yes" } else { "no" }),
            ])
        })
        .collect();

    let widths = [
        Constraint::Length(17),
        Constraint::Min(10),
        Constraint::Length(5),
        Constraint::Length(7),
        Constraint::Length(7),
        Constraint::Length(6),
        Constraint::Length(5),
    ];
    Table::new(rows, widths)
        .header(header)
        .block(Block::default().borders(Borders::ALL).title("Recent sessions"))
        .render(chunks[0], buf);

    Paragraph::new(Span::styled(
        "(b)ack / (q)uit",
        Style::default().add_modifier(Modifier::ITALIC),
    ))
    .render(chunks[1], buf);
}
