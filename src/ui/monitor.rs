use std::io::Stdout;
use std::net::SocketAddr;
use std::time::{Duration, Instant, SystemTime};

use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use crossbeam_channel::Receiver;
use crossterm::{
    cursor::{Hide, Show},
    event::{self, Event, KeyCode, KeyModifiers},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{
    backend::{Backend, CrosstermBackend},
    layout::{Constraint, Direction, Layout, Rect},
    text::Line,
    widgets::Paragraph,
    Frame, Terminal,
};
use tracing::debug;

use crate::lifecycle::{StopFlag, Ticker};
use crate::metrics::WindowedAggregator;
use crate::state::{MonitorEvent, SampleBuffer};
use crate::ui::chart::{History, ThroughputChart, RECEIVER_SCALE, STREAMER_SCALE};

pub const TICK_PERIOD: Duration = Duration::from_secs(1);
const INPUT_POLL: Duration = Duration::from_millis(200);
const FOOTER_ROWS: u16 = 1;

#[derive(Clone, Debug, PartialEq, Eq)]
enum PeerStatus {
    Waiting,
    Connected(SocketAddr),
    Closed,
}

#[derive(Clone, Debug)]
enum Role {
    Streamer { target: String },
    Receiver { service: String, port: u16, last_announcement: Option<SystemTime>, peer: PeerStatus },
}

/// Everything one monitor tick reads and writes. History is owned here and nowhere else.
pub struct MonitorView {
    role: Role,
    history: History,
    aggregator: WindowedAggregator,
}

impl MonitorView {
    pub fn streamer(target: impl Into<String>) -> Self {
        Self::with_role(Role::Streamer { target: target.into() })
    }

    pub fn receiver(service: impl Into<String>, port: u16) -> Self {
        Self::with_role(Role::Receiver {
            service: service.into(),
            port,
            last_announcement: None,
            peer: PeerStatus::Waiting,
        })
    }

    fn with_role(role: Role) -> Self {
        Self { role, history: History::new(0), aggregator: WindowedAggregator::new() }
    }

    #[cfg(test)]
    pub fn history(&self) -> &History {
        &self.history
    }

    fn scale(&self) -> u64 {
        match self.role {
            Role::Streamer { .. } => STREAMER_SCALE,
            Role::Receiver { .. } => RECEIVER_SCALE,
        }
    }

    fn header_rows(&self) -> u16 {
        match self.role {
            Role::Streamer { .. } => 1,
            Role::Receiver { .. } => 3,
        }
    }

    /// Rows available to bars on a terminal of `rows` lines.
    pub fn chart_height(&self, rows: u16) -> u16 {
        rows.saturating_sub(self.header_rows() + FOOTER_ROWS)
    }

    /// Track the terminal width: one history point per column, minus one.
    pub fn fit(&mut self, area: Rect) {
        let capacity = area.width.saturating_sub(1) as usize;
        if capacity != self.history.capacity() {
            debug!(capacity, chart_height = self.chart_height(area.height), "Resizing history");
            self.history.resize(capacity);
        }
    }

    pub fn apply(&mut self, event: MonitorEvent) {
        if let Role::Receiver { last_announcement, peer, .. } = &mut self.role {
            match event {
                MonitorEvent::PeerConnected(addr) => *peer = PeerStatus::Connected(addr),
                MonitorEvent::PeerClosed => *peer = PeerStatus::Closed,
                MonitorEvent::Announced(at) => *last_announcement = Some(at),
            }
        }
    }

    /// Aggregate the trailing window at `now` and append it to the history.
    pub fn tick(&mut self, samples: &SampleBuffer, now: Instant) -> u64 {
        let value = self.aggregator.bytes_in_window(samples, now);
        self.history.push(value);
        value
    }

    fn header(&self) -> Vec<Line<'static>> {
        match &self.role {
            Role::Streamer { target } => vec![Line::from(format!("Streaming random packets to {target}"))],
            Role::Receiver { service, port, last_announcement, peer } => {
                let announced = match last_announcement {
                    Some(at) => format!("Last announcement: {}", clock_time(*at)),
                    None => "Last announcement: -".to_string(),
                };
                let peer = match peer {
                    PeerStatus::Waiting => "Waiting for client...".to_string(),
                    PeerStatus::Connected(addr) => format!("Client: {addr}"),
                    PeerStatus::Closed => "Client disconnected".to_string(),
                };
                vec![
                    Line::from(format!("Service: {service} on port {port}")),
                    Line::from(announced),
                    Line::from(peer),
                ]
            }
        }
    }

    pub fn draw(&self, f: &mut Frame) {
        let outer = Layout::default()
            .direction(Direction::Vertical)
            .constraints([
                Constraint::Length(self.header_rows()),
                Constraint::Min(0),
                Constraint::Length(FOOTER_ROWS),
            ])
            .split(f.size());

        f.render_widget(Paragraph::new(self.header()), outer[0]);
        f.render_widget(ThroughputChart::new(&self.history, self.scale()), outer[1]);

        let latest = self.history.latest().unwrap_or(0);
        let footer = Paragraph::new(format!("{latest} B/s | q: quit"));
        f.render_widget(footer, outer[2]);
    }
}

/// Local HH:MM:SS of a wall-clock instant.
fn clock_time(at: SystemTime) -> String {
    DateTime::<Local>::from(at).format("%H:%M:%S").to_string()
}

/// Raw mode plus alternate screen, restored on drop.
pub struct TerminalSession {
    terminal: Terminal<CrosstermBackend<Stdout>>,
}

impl TerminalSession {
    pub fn enter() -> Result<Self> {
        enable_raw_mode().context("Enabling terminal raw mode")?;
        let terminal = match Terminal::new(CrosstermBackend::new(std::io::stdout())) {
            Ok(t) => t,
            Err(e) => {
                let _ = disable_raw_mode();
                return Err(e).context("Creating terminal backend");
            }
        };
        let mut session = Self { terminal };
        execute!(session.terminal.backend_mut(), EnterAlternateScreen, Hide)
            .context("Entering alternate screen")?;
        Ok(session)
    }

    pub fn terminal(&mut self) -> &mut Terminal<CrosstermBackend<Stdout>> {
        &mut self.terminal
    }
}

impl Drop for TerminalSession {
    fn drop(&mut self) {
        let _ = disable_raw_mode();
        let _ = execute!(self.terminal.backend_mut(), LeaveAlternateScreen, Show);
        let _ = self.terminal.show_cursor();
    }
}

/// Wait up to `timeout` for a key; `true` means the user asked to quit.
fn poll_quit_key(timeout: Duration) -> Result<bool> {
    if event::poll(timeout)? {
        if let Event::Key(key) = event::read()? {
            return Ok(key.code == KeyCode::Char('q')
                || key.code == KeyCode::Esc
                || (key.code == KeyCode::Char('c') && key.modifiers.contains(KeyModifiers::CONTROL)));
        }
    }
    Ok(false)
}

/// Full-screen monitor until `stop` is set.
pub fn run_monitor(
    mut view: MonitorView,
    samples: &SampleBuffer,
    events: &Receiver<MonitorEvent>,
    stop: &StopFlag,
) -> Result<()> {
    let mut session = TerminalSession::enter()?;
    let ticks = drive(session.terminal(), &mut view, samples, events, stop, TICK_PERIOD, poll_quit_key)?;
    debug!(ticks, "Monitor stopped");
    Ok(())
}

/// Tick loop: aggregate, push, redraw once per `period`; poll input in between.
pub(crate) fn drive<B: Backend>(
    terminal: &mut Terminal<B>,
    view: &mut MonitorView,
    samples: &SampleBuffer,
    events: &Receiver<MonitorEvent>,
    stop: &StopFlag,
    period: Duration,
    mut wait_input: impl FnMut(Duration) -> Result<bool>,
) -> Result<u64> {
    let mut ticker = Ticker::new(period);
    let mut ticks = 0u64;
    while !stop.is_set() {
        while let Ok(ev) = events.try_recv() {
            view.apply(ev);
        }

        match ticker.remaining() {
            None => {
                ticker.advance();
                view.fit(terminal.size()?);
                view.tick(samples, Instant::now());
                terminal.draw(|f| view.draw(f))?;
                ticks += 1;
            }
            Some(left) => {
                if wait_input(left.min(INPUT_POLL))? {
                    stop.trigger();
                }
            }
        }
    }
    Ok(ticks)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::Sample;
    use crate::ui::chart::BAR_GLYPH;
    use chrono::{Offset, TimeZone, Utc};
    use crossbeam_channel as channel;
    use ratatui::backend::TestBackend;
    use std::time::UNIX_EPOCH;

    fn row_text(terminal: &Terminal<TestBackend>, y: u16) -> String {
        let buf = terminal.backend().buffer();
        (0..buf.area.width).map(|x| buf.get(x, y).symbol()).collect::<String>()
    }

    fn sleep_input(d: Duration) -> Result<bool> {
        std::thread::sleep(d);
        Ok(false)
    }

    #[test]
    fn fit_derives_capacity_and_chart_height() {
        let mut view = MonitorView::streamer("x");
        view.fit(Rect::new(0, 0, 40, 10));
        assert_eq!(view.history().capacity(), 39);
        assert_eq!(view.chart_height(10), 8);

        let recv = MonitorView::receiver("svc", 7000);
        assert_eq!(recv.chart_height(10), 6);
        assert_eq!(recv.chart_height(2), 0);
    }

    #[test]
    fn zero_throughput_draws_no_bar() {
        let mut terminal = Terminal::new(TestBackend::new(20, 6)).unwrap();
        let mut view = MonitorView::streamer("peer");
        view.fit(terminal.size().unwrap());
        view.tick(&SampleBuffer::new(), Instant::now());
        terminal.draw(|f| view.draw(f)).unwrap();
        for y in 1..5 {
            assert!(!row_text(&terminal, y).contains(BAR_GLYPH));
        }
    }

    #[test]
    fn announcement_time_is_local_wall_clock() {
        let secs: i64 = 1_700_000_000 + 13 * 3600 + 39 * 60 + 1;
        let at = UNIX_EPOCH + Duration::from_secs(secs as u64);
        let utc = Utc.timestamp_opt(secs, 0).single().unwrap();
        let offset = Local.offset_from_utc_datetime(&utc.naive_utc()).fix().local_minus_utc() as i64;
        let local = (secs + offset).rem_euclid(86_400);
        let expected = format!("{:02}:{:02}:{:02}", local / 3600, local / 60 % 60, local % 60);

        assert_eq!(clock_time(at), expected);
        assert_eq!(clock_time(at), utc.with_timezone(&Local).format("%H:%M:%S").to_string());
    }

    #[test]
    fn receiver_header_reflects_events() {
        let mut terminal = Terminal::new(TestBackend::new(60, 8)).unwrap();
        let mut view = MonitorView::receiver("Test AirPlay", 7000);
        let announced = UNIX_EPOCH + Duration::from_secs(3 * 3600 + 25 * 60 + 7);
        view.apply(MonitorEvent::Announced(announced));
        view.apply(MonitorEvent::PeerConnected("10.0.0.2:5555".parse().unwrap()));
        view.fit(terminal.size().unwrap());
        terminal.draw(|f| view.draw(f)).unwrap();

        assert!(row_text(&terminal, 0).starts_with("Service: Test AirPlay on port 7000"));
        let expected = format!("Last announcement: {}", clock_time(announced));
        assert!(row_text(&terminal, 1).starts_with(&expected));
        assert!(!row_text(&terminal, 1).contains("UTC"));
        assert!(row_text(&terminal, 2).starts_with("Client: 10.0.0.2:5555"));

        view.apply(MonitorEvent::PeerClosed);
        terminal.draw(|f| view.draw(f)).unwrap();
        assert!(row_text(&terminal, 2).starts_with("Client disconnected"));
    }

    #[test]
    fn bars_scroll_left_to_right_oldest_first() {
        let mut terminal = Terminal::new(TestBackend::new(4, 6)).unwrap();
        let mut view = MonitorView::streamer("p");
        view.fit(terminal.size().unwrap());
        assert_eq!(view.history().capacity(), 3);

        let now = Instant::now() + Duration::from_secs(10);
        for size in [100u64, 200, 300, 400] {
            let samples = SampleBuffer::new();
            samples.push(Sample { at: now, size });
            view.tick(&samples, now);
        }
        terminal.draw(|f| view.draw(f)).unwrap();
        assert_eq!(view.history().iter().collect::<Vec<_>>(), vec![200, 300, 400]);

        // chart occupies rows 1..=4; heights 2, 3, 4 clamped to 4
        let bottom = 4;
        let height = |x: u16| {
            (1..=bottom)
                .filter(|y| terminal.backend().buffer().get(x, *y).symbol() == BAR_GLYPH)
                .count()
        };
        assert_eq!(height(0), 2);
        assert_eq!(height(1), 3);
        assert_eq!(height(2), 4);
        assert_eq!(height(3), 0);
    }

    #[test]
    fn resize_keeps_recent_points() {
        let mut view = MonitorView::streamer("p");
        view.fit(Rect::new(0, 0, 11, 5));
        for v in 0..10 {
            view.history.push(v);
        }
        view.fit(Rect::new(0, 0, 4, 5));
        assert_eq!(view.history().iter().collect::<Vec<_>>(), vec![7, 8, 9]);
    }

    #[test]
    fn drive_exits_immediately_when_already_stopped() {
        let mut terminal = Terminal::new(TestBackend::new(20, 6)).unwrap();
        let mut view = MonitorView::streamer("p");
        let (_tx, rx) = channel::unbounded();
        let stop = StopFlag::new();
        stop.trigger();
        let ticks = drive(&mut terminal, &mut view, &SampleBuffer::new(), &rx, &stop, TICK_PERIOD, sleep_input).unwrap();
        assert_eq!(ticks, 0);
    }

    #[test]
    fn quit_key_triggers_stop() {
        let mut terminal = Terminal::new(TestBackend::new(20, 6)).unwrap();
        let mut view = MonitorView::streamer("p");
        let (_tx, rx) = channel::unbounded();
        let stop = StopFlag::new();
        let ticks = drive(&mut terminal, &mut view, &SampleBuffer::new(), &rx, &stop, TICK_PERIOD, |_| Ok(true)).unwrap();
        assert!(stop.is_set());
        assert_eq!(ticks, 1);
    }

    #[test]
    fn end_to_end_burst_then_silence() {
        let mut terminal = Terminal::new(TestBackend::new(30, 12)).unwrap();
        let mut view = MonitorView::streamer("p");
        let samples = SampleBuffer::new();
        for size in [200, 300, 500] {
            samples.record(size);
        }
        let (_tx, rx) = channel::unbounded();
        let stop = StopFlag::new();
        let s = stop.clone();
        std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(2500));
            s.trigger();
        });

        let ticks = drive(&mut terminal, &mut view, &samples, &rx, &stop, TICK_PERIOD, sleep_input).unwrap();
        assert_eq!(ticks, 3);
        assert_eq!(view.history().iter().collect::<Vec<_>>(), vec![1000, 0, 0]);
    }

    #[test]
    fn producer_failure_stops_render_loop_within_one_tick() {
        use crate::net::streamer::{run_generator, StreamEnd};
        use rand::{rngs::SmallRng, SeedableRng};
        use std::io::{self, Write};
        use std::sync::Arc;

        struct FailAfter(usize);
        impl Write for FailAfter {
            fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
                if self.0 == 0 {
                    return Err(io::Error::from(io::ErrorKind::ConnectionReset));
                }
                self.0 -= 1;
                Ok(buf.len())
            }
            fn flush(&mut self) -> io::Result<()> {
                Ok(())
            }
        }

        let samples = Arc::new(SampleBuffer::new());
        let stop = StopFlag::new();
        let producer = {
            let samples = Arc::clone(&samples);
            let stop = stop.clone();
            std::thread::spawn(move || {
                run_generator(FailAfter(5), &samples, &stop, &mut SmallRng::seed_from_u64(7))
            })
        };

        let mut terminal = Terminal::new(TestBackend::new(30, 12)).unwrap();
        let mut view = MonitorView::streamer("p");
        let (_tx, rx) = channel::unbounded();
        drive(&mut terminal, &mut view, &samples, &rx, &stop, TICK_PERIOD, sleep_input).unwrap();

        // producer stops after ~0.5 s; render loop must follow within one period
        assert!(matches!(producer.join().unwrap(), StreamEnd::Failed(_)));
        assert!(view.history().len() <= 2);
        assert_eq!(samples.len(), 5);
    }
}
