use std::collections::VecDeque;
use std::io;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use crossterm::ExecutableCommand;
use crossterm::event::{self, Event, KeyCode, KeyEventKind};
use crossterm::terminal::{
    EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode,
};
use miette::IntoDiagnostic;
use ratatui::Terminal;
use ratatui::backend::CrosstermBackend;
use ratatui::layout::{Alignment, Constraint, Direction, Layout};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, Borders, Gauge, Paragraph, Wrap};

use crate::app::{ProgressEvent, ProgressSink, ProgressSinkKind};
use crate::error::HarvestError;

const EVENTS_MAX: usize = 4;
const LOGS_MAX: usize = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Collect,
    Store,
    Fetch,
    Done,
}

impl Phase {
    fn label(self) -> &'static str {
        match self {
            Phase::Collect => "Collect",
            Phase::Store => "Store",
            Phase::Fetch => "Fetch",
            Phase::Done => "Done",
        }
    }
}

#[derive(Debug)]
struct AppState {
    status: String,
    phase: Phase,
    latency_ms: Option<u128>,
    done: usize,
    total: usize,
    downloaded: usize,
    skipped: usize,
    failed: usize,
    events: VecDeque<String>,
    logs: VecDeque<String>,
    started: Instant,
}

pub struct Tui {
    kind: ProgressSinkKind,
    state: Arc<Mutex<AppState>>,
    log_scroll: u16,
}

struct TuiProgress {
    state: Arc<Mutex<AppState>>,
}

impl ProgressSink for TuiProgress {
    fn event(&self, event: ProgressEvent) {
        if let Ok(mut state) = self.state.lock() {
            let message = event.message.trim().to_string();
            if let Some((phase, payload)) = parse_phase(&message) {
                state.phase = phase;
                state.status = payload.to_string();
            } else if let Some(latency) = parse_latency(&message) {
                state.latency_ms = Some(latency);
            }

            match parse_outcome(&message) {
                Some("downloaded") => state.downloaded += 1,
                Some("skipped") => state.skipped += 1,
                Some("error") => state.failed += 1,
                _ => {}
            }

            if let Some((done, total)) = event.progress {
                state.done = done;
                state.total = total;
            }

            let line = match event.elapsed {
                Some(elapsed) => format!(
                    "[{}] {message} (+{:.1}s)",
                    timestamp(),
                    elapsed.as_secs_f64()
                ),
                None => format!("[{}] {message}", timestamp()),
            };
            push_bounded(&mut state.events, message, EVENTS_MAX);
            push_bounded(&mut state.logs, line, LOGS_MAX);
        }
    }
}

impl Tui {
    pub fn new(kind: ProgressSinkKind) -> Self {
        Self {
            kind,
            state: Arc::new(Mutex::new(AppState {
                status: "starting".to_string(),
                phase: Phase::Collect,
                latency_ms: None,
                done: 0,
                total: 0,
                downloaded: 0,
                skipped: 0,
                failed: 0,
                events: VecDeque::new(),
                logs: VecDeque::new(),
                started: Instant::now(),
            })),
            log_scroll: 0,
        }
    }

    /// Runs `f` on a worker thread while drawing its progress. Returns once
    /// `f` has finished; there is no way to abort a run from the keyboard.
    pub fn run<F, R>(&mut self, f: F) -> miette::Result<R>
    where
        F: FnOnce(&dyn ProgressSink) -> Result<R, HarvestError> + Send + 'static,
        R: Send + 'static,
    {
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
        let result = loop {
            if let Ok(state) = self.state.lock() {
                terminal
                    .draw(|frame| draw_ui(frame, self.kind, &state, self.log_scroll, tick))
                    .into_diagnostic()?;
            }

            if let Ok(result) = rx.try_recv() {
                break result;
            }

            if event::poll(Duration::from_millis(120)).into_diagnostic()? {
                if let Event::Key(key) = event::read().into_diagnostic()? {
                    if key.kind == KeyEventKind::Press {
                        match key.code {
                            KeyCode::PageUp => self.scroll_logs(5),
                            KeyCode::PageDown => self.scroll_logs(-5),
                            _ => {}
                        }
                    }
                }
            }

            tick = tick.wrapping_add(1);
        };

        disable_raw_mode().into_diagnostic()?;
        let mut stdout = io::stdout();
        stdout.execute(LeaveAlternateScreen).into_diagnostic()?;
        handle.join().ok();
        result.map_err(miette::Report::new)
    }

    fn scroll_logs(&mut self, delta: i16) {
        let max = self.state.lock().map(|state| state.logs.len()).unwrap_or(0);
        let max_scroll = max.saturating_sub(1).min(i16::MAX as usize) as i16;
        let next = (self.log_scroll as i16 + delta).clamp(0, max_scroll);
        self.log_scroll = next as u16;
    }
}

fn draw_ui(
    frame: &mut ratatui::Frame,
    kind: ProgressSinkKind,
    state: &AppState,
    log_scroll: u16,
    tick: usize,
) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(2),
            Constraint::Length(3),
            Constraint::Length(7),
            Constraint::Min(4),
        ])
        .split(frame.area());

    frame.render_widget(draw_header(kind, tick), chunks[0]);
    frame.render_widget(draw_gauge(state), chunks[1]);
    frame.render_widget(draw_status_panel(state), chunks[2]);
    frame.render_widget(draw_logs_view(state, log_scroll, chunks[3].height), chunks[3]);
}

fn draw_header(kind: ProgressSinkKind, tick: usize) -> Paragraph<'static> {
    let hb = if tick % 2 == 0 { "*" } else { " " };
    let op_label = match kind {
        ProgressSinkKind::Run => "Run",
        ProgressSinkKind::Collect => "Collect",
        ProgressSinkKind::Fetch => "Fetch",
    };
    Paragraph::new(Line::from(vec![
        Span::styled(
            "ARXIV-HARVEST",
            Style::default()
                .fg(Color::Cyan)
                .add_modifier(Modifier::BOLD),
        ),
        Span::raw(" "),
        Span::styled(env!("CARGO_PKG_VERSION"), Style::default().fg(Color::Gray)),
        Span::raw("   Op: "),
        Span::styled(op_label, Style::default().fg(Color::Cyan)),
        Span::raw("   "),
        Span::styled(hb, Style::default().fg(Color::Green)),
    ]))
    .alignment(Alignment::Left)
    .block(Block::default().borders(Borders::BOTTOM))
}

fn draw_gauge(state: &AppState) -> Gauge<'static> {
    let ratio = if state.total == 0 {
        if state.phase == Phase::Done { 1.0 } else { 0.0 }
    } else {
        state.done as f64 / state.total as f64
    };
    let color = if state.phase == Phase::Done {
        Color::Green
    } else {
        Color::Cyan
    };
    Gauge::default()
        .block(Block::default().borders(Borders::ALL).title("Downloads"))
        .gauge_style(Style::default().fg(color))
        .ratio(ratio.clamp(0.0, 1.0))
        .label(format!("{}/{}", state.done, state.total))
}

fn draw_status_panel(state: &AppState) -> Paragraph<'static> {
    let latency = state
        .latency_ms
        .map(|v| format!("{v} ms"))
        .unwrap_or_else(|| "--".to_string());
    let mut lines = vec![
        Line::from(vec![
            Span::styled("Phase: ", Style::default().fg(Color::Gray)),
            Span::styled(
                format!("{:<8}", state.phase.label()),
                Style::default().fg(Color::Cyan),
            ),
            Span::raw(state.status.clone()),
        ]),
        Line::from(vec![
            Span::styled("Downloaded: ", Style::default().fg(Color::Gray)),
            Span::styled(state.downloaded.to_string(), Style::default().fg(Color::Green)),
            Span::styled("   Skipped: ", Style::default().fg(Color::Gray)),
            Span::styled(state.skipped.to_string(), Style::default().fg(Color::Yellow)),
            Span::styled("   Errors: ", Style::default().fg(Color::Gray)),
            Span::styled(state.failed.to_string(), Style::default().fg(Color::Red)),
        ]),
        Line::from(vec![
            Span::styled("Search latency: ", Style::default().fg(Color::Gray)),
            Span::raw(latency),
            Span::styled("   Elapsed: ", Style::default().fg(Color::Gray)),
            Span::raw(format!("{}s", state.started.elapsed().as_secs())),
        ]),
    ];
    for event in state.events.iter().rev().take(3) {
        lines.push(Line::from(format!("- {event}")));
    }

    Paragraph::new(lines)
        .block(Block::default().borders(Borders::BOTTOM))
        .wrap(Wrap { trim: true })
}

fn draw_logs_view(state: &AppState, scroll: u16, height: u16) -> Paragraph<'static> {
    let visible = height.saturating_sub(1).max(1) as usize;
    let total = state.logs.len();
    let start = total.saturating_sub(scroll as usize + visible);
    let mut lines = Vec::with_capacity(visible + 1);
    lines.push(Line::from(Span::styled(
        "LOGS (PgUp/PgDown)",
        Style::default()
            .fg(Color::Cyan)
            .add_modifier(Modifier::BOLD),
    )));
    for line in state.logs.iter().skip(start).take(visible) {
        lines.push(Line::from(line.clone()));
    }
    Paragraph::new(lines).wrap(Wrap { trim: true })
}

fn parse_phase(message: &str) -> Option<(Phase, &str)> {
    let rest = message.strip_prefix("phase=")?;
    let (name, payload) = rest.split_once(';')?;
    let phase = match name {
        "Collect" => Phase::Collect,
        "Store" => Phase::Store,
        "Fetch" => Phase::Fetch,
        "Done" => Phase::Done,
        _ => return None,
    };
    Some((phase, payload.trim()))
}

fn parse_latency(message: &str) -> Option<u128> {
    message
        .split("latency_ms=")
        .nth(1)
        .and_then(|rest| rest.split_whitespace().next())
        .and_then(|value| value.parse::<u128>().ok())
}

/// `paper 12 downloaded` -> `downloaded`; `paper 3 error: ...` -> `error`.
fn parse_outcome(message: &str) -> Option<&str> {
    let rest = message.strip_prefix("paper ")?;
    let (_, outcome) = rest.split_once(' ')?;
    let word = outcome.split(':').next()?.trim();
    matches!(word, "downloaded" | "skipped" | "error").then_some(word)
}

fn push_bounded(buffer: &mut VecDeque<String>, item: String, max: usize) {
    buffer.push_back(item);
    while buffer.len() > max {
        buffer.pop_front();
    }
}

fn timestamp() -> String {
    chrono::Local::now().format("%H:%M:%S").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_phase_messages() {
        let (phase, payload) = parse_phase("phase=Fetch; downloading 3 papers").unwrap();
        assert_eq!(phase, Phase::Fetch);
        assert_eq!(payload, "downloading 3 papers");
        assert!(parse_phase("phase=Unknown; x").is_none());
    }

    #[test]
    fn parses_outcomes() {
        assert_eq!(parse_outcome("paper 0 downloaded"), Some("downloaded"));
        assert_eq!(
            parse_outcome("paper 1 error: document server returned status 404"),
            Some("error")
        );
        assert_eq!(parse_outcome("arxiv.response items=3 latency_ms=10"), None);
    }

    #[test]
    fn sink_tracks_counts() {
        let tui = Tui::new(ProgressSinkKind::Fetch);
        let sink = TuiProgress {
            state: tui.state.clone(),
        };
        sink.event(ProgressEvent {
            message: "paper 0 skipped".to_string(),
            elapsed: Some(Duration::from_millis(1500)),
            progress: Some((1, 2)),
        });
        sink.event(ProgressEvent {
            message: "paper 1 error: boom".to_string(),
            elapsed: None,
            progress: Some((2, 2)),
        });
        let state = tui.state.lock().unwrap();
        assert_eq!(state.skipped, 1);
        assert_eq!(state.failed, 1);
        assert_eq!((state.done, state.total), (2, 2));
        assert!(state.logs[0].ends_with("paper 0 skipped (+1.5s)"));
        assert!(state.logs[1].ends_with("paper 1 error: boom"));
    }
}
