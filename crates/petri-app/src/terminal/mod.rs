use std::{
    cmp::Ordering,
    collections::VecDeque,
    fs::{self, File},
    io::{self, Stdout},
    path::{Path, PathBuf},
    time::{Duration, Instant},
};

use anyhow::{Context, Result};
use crossterm::{
    event::{
        self, DisableMouseCapture, EnableMouseCapture, Event, KeyCode, KeyEvent, KeyModifiers,
        MouseEvent, MouseEventKind,
    },
    execute,
    terminal::{EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode},
};
use ratatui::{
    Frame, Terminal,
    backend::CrosstermBackend,
    layout::{Alignment, Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span, Text},
    widgets::{Block, Borders, List, ListItem, Paragraph, Sparkline},
};
use petri_core::{GamePhase, PlayerCommand, Position, TickEvents, TickInput, TickSummary, World};
use serde::Serialize;
use supports_color::{ColorLevel, Stream, on_cached};
use tracing::info;

use crate::{
    SharedWorld,
    renderer::{Renderer, RendererContext},
};

const FALLBACK_SIM_HZ: f32 = 60.0;
const MAX_STEPS_PER_FRAME: usize = 240;
const UI_TICK_MILLIS: u64 = 100;
const DEFAULT_HEADLESS_FRAMES: usize = 12;
const MAX_HEADLESS_FRAMES: usize = 360;
const EVENT_LOG_CAPACITY: usize = 16;
const LEADERBOARD_LIMIT: usize = 6;
const HISTORY_WINDOW: usize = 32;

pub struct TerminalRenderer {
    tick_interval: Duration,
    draw_interval: Duration,
}

impl Default for TerminalRenderer {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs_f32(1.0 / FALLBACK_SIM_HZ),
            draw_interval: Duration::from_millis(UI_TICK_MILLIS),
        }
    }
}

impl Renderer for TerminalRenderer {
    fn name(&self) -> &'static str {
        "terminal"
    }

    fn run(&self, ctx: RendererContext) -> Result<()> {
        if std::env::var_os("PETRI_TERMINAL_HEADLESS").is_some() {
            let report = self.run_headless(ctx)?;
            info!(
                target: "petri::terminal",
                frames = report.summary.frame_count,
                ticks_simulated = report.summary.ticks_simulated,
                final_tick = report.summary.final_tick,
                initial_population = report.initial.population,
                final_population = report.summary.final_population,
                total_absorbed = report.summary.total_absorbed,
                total_respawned = report.summary.total_respawned,
                player_radius_final = report.summary.player_radius_final,
                game_over = report.summary.game_over,
                "Terminal headless run completed"
            );
            return Ok(());
        }

        let mut stdout = io::stdout();
        enable_raw_mode().context("failed to enable raw mode")?;
        execute!(stdout, EnterAlternateScreen, EnableMouseCapture)
            .context("failed to enter alternate screen")?;

        let backend = CrosstermBackend::new(stdout);
        let mut terminal = Terminal::new(backend).context("failed to build terminal backend")?;
        terminal.hide_cursor().ok();

        let result = run_event_loop(self, &mut terminal, ctx);

        terminal.show_cursor().ok();
        if let Err(err) = disable_raw_mode() {
            tracing::error!(?err, "failed to disable raw mode");
        }
        if let Err(err) = execute!(
            terminal.backend_mut(),
            DisableMouseCapture,
            LeaveAlternateScreen
        ) {
            tracing::error!(?err, "failed to leave alternate screen");
        }

        result
    }
}

fn run_event_loop(
    renderer: &TerminalRenderer,
    terminal: &mut Terminal<CrosstermBackend<Stdout>>,
    ctx: RendererContext,
) -> Result<()> {
    let mut app = TerminalApp::new(renderer, ctx);

    loop {
        let now = Instant::now();
        app.maybe_step_simulation(now);

        if now.duration_since(app.last_draw) >= app.draw_interval {
            terminal.draw(|frame| app.draw(frame))?;
            app.last_draw = now;
        }

        let timeout = renderer
            .draw_interval
            .saturating_sub(now.duration_since(app.last_event_check));
        // Drain everything queued so cursor motion never lags a frame.
        let mut pending = event::poll(timeout).unwrap_or(false);
        let mut saw_event = false;
        while pending {
            saw_event = true;
            match event::read()? {
                Event::Key(key) => {
                    if app.handle_key(key)? {
                        return Ok(());
                    }
                }
                Event::Mouse(mouse) => app.handle_mouse(mouse),
                _ => {}
            }
            pending = event::poll(Duration::from_millis(0)).unwrap_or(false);
        }
        if saw_event {
            app.last_event_check = Instant::now();
        }
    }
}

impl TerminalRenderer {
    fn run_headless(&self, ctx: RendererContext) -> Result<HeadlessReport> {
        let backend = ratatui::backend::TestBackend::new(80, 36);
        let mut terminal = Terminal::new(backend).context("failed to build test backend")?;
        let mut app = TerminalApp::new(self, ctx);
        let mut report = HeadlessReport::new(app.snapshot().clone());
        let frames = self.headless_frame_budget();

        for _ in 0..frames {
            app.step_once();
            report.record(app.snapshot());
            terminal.draw(|frame| app.draw(frame))?;
        }

        report.finalize();

        if let Some(path) = report_file_path_from_env() {
            report.write_json(&path).with_context(|| {
                format!("failed to write headless report to {}", path.display())
            })?;
        }

        Ok(report)
    }

    fn headless_frame_budget(&self) -> usize {
        std::env::var("PETRI_TERMINAL_HEADLESS_FRAMES")
            .ok()
            .and_then(|raw| raw.trim().parse::<usize>().ok())
            .filter(|value| *value > 0)
            .map(|value| value.min(MAX_HEADLESS_FRAMES))
            .unwrap_or(DEFAULT_HEADLESS_FRAMES)
    }
}

struct TerminalApp {
    world: SharedWorld,
    tick_interval: Duration,
    draw_interval: Duration,
    speed_multiplier: f32,
    paused: bool,
    help_visible: bool,
    sim_accumulator: f32,
    last_tick: Instant,
    last_draw: Instant,
    last_event_check: Instant,
    palette: Palette,
    cursor: Position,
    pending_command: Option<PlayerCommand>,
    map_area: Option<Rect>,
    event_log: VecDeque<EventEntry>,
    snapshot: Snapshot,
}

impl TerminalApp {
    fn new(renderer: &TerminalRenderer, ctx: RendererContext) -> Self {
        let palette = Palette::detect();
        let snapshot = {
            let world = ctx
                .world
                .lock()
                .expect("world mutex poisoned while capturing initial state");
            Snapshot::from_world(&world)
        };
        let tick_interval = if snapshot.tick_hz > 0 {
            Duration::from_secs_f32(1.0 / snapshot.tick_hz as f32)
        } else {
            renderer.tick_interval
        };
        let cursor = Position::new(snapshot.viewport.0 / 2.0, snapshot.viewport.1 / 2.0);
        Self {
            world: ctx.world,
            tick_interval,
            draw_interval: renderer.draw_interval,
            speed_multiplier: 1.0,
            paused: false,
            help_visible: false,
            sim_accumulator: 0.0,
            last_tick: Instant::now(),
            last_draw: Instant::now(),
            last_event_check: Instant::now(),
            palette,
            cursor,
            pending_command: None,
            map_area: None,
            event_log: VecDeque::with_capacity(EVENT_LOG_CAPACITY),
            snapshot,
        }
    }

    fn maybe_step_simulation(&mut self, now: Instant) {
        let delta = now - self.last_tick;
        self.last_tick = now;

        let mut steps = 0usize;

        let effective_speed = if self.paused {
            0.0
        } else {
            self.speed_multiplier.max(0.0)
        };

        let step_interval = self.tick_interval.as_secs_f32();
        if effective_speed > f32::EPSILON && step_interval > f32::EPSILON {
            self.sim_accumulator += delta.as_secs_f32() * effective_speed;
            let max_accumulator = step_interval * MAX_STEPS_PER_FRAME as f32;
            if self.sim_accumulator > max_accumulator {
                self.sim_accumulator = max_accumulator;
            }
            steps = (self.sim_accumulator / step_interval).floor() as usize;
            if steps > MAX_STEPS_PER_FRAME {
                steps = MAX_STEPS_PER_FRAME;
            }
            if steps > 0 {
                self.sim_accumulator -= step_interval * steps as f32;
            }
        }

        if steps > 0 {
            self.advance(steps);
        }
    }

    fn step_once(&mut self) {
        self.advance(1);
    }

    fn advance(&mut self, steps: usize) {
        let mut batch = TickBatch::default();
        if let Ok(mut world) = self.world.lock() {
            for _ in 0..steps {
                // At most one command per tick; the first step consumes it.
                let input = TickInput {
                    cursor: self.cursor,
                    command: self.pending_command.take(),
                };
                batch.merge(world.step(&input));
            }
        }
        self.refresh_snapshot();
        self.note_batch(&batch);
    }

    fn note_batch(&mut self, batch: &TickBatch) {
        let tick = self.snapshot.tick;
        if batch.fed {
            self.push_event(tick, EventKind::Player, "Ejected mass");
        }
        if batch.split {
            self.push_event(tick, EventKind::Player, "Split in two");
        }
        if batch.absorbed > 0 {
            let plural = if batch.absorbed == 1 { "" } else { "s" };
            self.push_event(
                tick,
                EventKind::Absorb,
                format!("{} cell{} absorbed", batch.absorbed, plural),
            );
        }
        if batch.respawned > 0 {
            let plural = if batch.respawned == 1 { "" } else { "s" };
            self.push_event(
                tick,
                EventKind::Respawn,
                format!("{} bot{} respawned", batch.respawned, plural),
            );
        }
        if batch.game_over {
            self.push_event(
                tick,
                EventKind::Info,
                format!("Game over at size {:.1}", self.snapshot.player_radius),
            );
        }
    }

    fn handle_key(&mut self, key: KeyEvent) -> Result<bool> {
        match (key.code, key.modifiers) {
            (KeyCode::Esc, _)
            | (KeyCode::Char('q'), _)
            | (KeyCode::Char('Q'), _)
            | (KeyCode::Char('c'), KeyModifiers::CONTROL) => {
                return Ok(true);
            }
            (KeyCode::Char('w') | KeyCode::Char('W'), _) => {
                self.pending_command = Some(PlayerCommand::Feed);
            }
            (KeyCode::Char(' '), _) => {
                self.pending_command = Some(PlayerCommand::Split);
            }
            (KeyCode::Char('r') | KeyCode::Char('R'), _) => {
                // Restart is only wired up on the game-over screen.
                if self.snapshot.phase.is_game_over() {
                    self.restart_world();
                }
            }
            (KeyCode::Char('p') | KeyCode::Char('P'), _) => {
                self.paused = !self.paused;
                if self.paused {
                    self.speed_multiplier = 0.0;
                } else if self.speed_multiplier <= 0.0 {
                    self.speed_multiplier = 1.0;
                }
            }
            (KeyCode::Char('+') | KeyCode::Char('='), _) => {
                self.speed_multiplier = (self.speed_multiplier + 0.5).clamp(0.5, 8.0);
                self.paused = false;
                self.push_event(
                    self.snapshot.tick,
                    EventKind::Info,
                    format!("Speed x{:.1}", self.speed_multiplier),
                );
            }
            (KeyCode::Char('-') | KeyCode::Char('_'), _) => {
                self.speed_multiplier = (self.speed_multiplier - 0.5).max(0.0);
                if self.speed_multiplier <= 0.0 {
                    self.paused = true;
                }
                self.push_event(
                    self.snapshot.tick,
                    EventKind::Info,
                    if self.paused {
                        "Simulation paused".to_string()
                    } else {
                        format!("Speed x{:.1}", self.speed_multiplier)
                    },
                );
            }
            (KeyCode::Char('s'), _) => {
                self.step_once();
                self.paused = true;
                self.speed_multiplier = 0.0;
                self.push_event(self.snapshot.tick, EventKind::Info, "Single-step executed");
            }
            (KeyCode::Char('S'), _) => {
                if let Err(err) = self.save_ascii_snapshot() {
                    self.push_event(
                        self.snapshot.tick,
                        EventKind::Info,
                        format!("Screenshot failed: {err}"),
                    );
                } else {
                    self.push_event(
                        self.snapshot.tick,
                        EventKind::Info,
                        "Saved ASCII screenshot",
                    );
                }
            }
            (KeyCode::Char('?') | KeyCode::Char('h'), _) => {
                self.help_visible = !self.help_visible;
            }
            _ => {}
        }

        Ok(false)
    }

    fn handle_mouse(&mut self, mouse: MouseEvent) {
        match mouse.kind {
            MouseEventKind::Moved | MouseEventKind::Drag(_) => {
                if let Some(cursor) = self.cursor_from_screen(mouse.column, mouse.row) {
                    self.cursor = cursor;
                }
            }
            _ => {}
        }
    }

    /// Map a terminal coordinate inside the arena widget to viewport space.
    fn cursor_from_screen(&self, column: u16, row: u16) -> Option<Position> {
        let area = self.map_area?;
        if area.width == 0 || area.height == 0 {
            return None;
        }
        let u = (column.saturating_sub(area.x) as f32 + 0.5) / area.width as f32;
        let v = (row.saturating_sub(area.y) as f32 + 0.5) / area.height as f32;
        Some(Position::new(
            u.clamp(0.0, 1.0) * self.snapshot.viewport.0,
            v.clamp(0.0, 1.0) * self.snapshot.viewport.1,
        ))
    }

    fn restart_world(&mut self) {
        if let Ok(mut world) = self.world.lock() {
            world.restart();
        }
        self.pending_command = None;
        self.paused = false;
        if self.speed_multiplier <= 0.0 {
            self.speed_multiplier = 1.0;
        }
        self.refresh_snapshot();
        self.push_event(self.snapshot.tick, EventKind::Info, "Arena restarted");
    }

    fn save_ascii_snapshot(&self) -> Result<()> {
        use std::io::Write;
        let dir = Path::new("screenshots");
        fs::create_dir_all(dir)?;
        let path = dir.join(format!("frame_{}.txt", self.snapshot.tick));
        let mut file = File::create(path)?;

        let grid = render_map_glyphs(&self.snapshot, &self.palette, 64, 32, None);
        for row in &grid {
            for cell in row {
                write!(file, "{}", cell.ch)?;
            }
            writeln!(file)?;
        }
        Ok(())
    }

    fn snapshot(&self) -> &Snapshot {
        &self.snapshot
    }

    fn refresh_snapshot(&mut self) {
        if let Ok(world) = self.world.lock() {
            self.snapshot = Snapshot::from_world(&world);
        }
    }

    fn push_event(&mut self, tick: u64, kind: EventKind, message: impl Into<String>) {
        if self.event_log.len() >= EVENT_LOG_CAPACITY {
            self.event_log.pop_front();
        }
        self.event_log.push_back(EventEntry {
            tick,
            kind,
            message: message.into(),
        });
    }

    fn draw(&mut self, frame: &mut Frame<'_>) {
        let snapshot = self.snapshot.clone();

        let outer = Layout::default()
            .direction(Direction::Vertical)
            .constraints([Constraint::Length(3), Constraint::Min(0)])
            .split(frame.area());

        self.draw_header(frame, outer[0], &snapshot);

        let body = Layout::default()
            .direction(Direction::Horizontal)
            .constraints([Constraint::Percentage(62), Constraint::Percentage(38)])
            .split(outer[1]);

        self.draw_map(frame, body[0], &snapshot);

        let sidebar = Layout::default()
            .direction(Direction::Vertical)
            .constraints([
                Constraint::Length(7),
                Constraint::Length(5),
                Constraint::Length(LEADERBOARD_LIMIT as u16 + 2),
                Constraint::Min(3),
            ])
            .split(body[1]);

        self.draw_stats(frame, sidebar[0], &snapshot);
        self.draw_trends(frame, sidebar[1], &snapshot);
        self.draw_leaderboard(frame, sidebar[2], &snapshot);
        self.draw_events(frame, sidebar[3]);

        if snapshot.phase.is_game_over() {
            self.draw_game_over(frame, &snapshot);
        }
        if self.help_visible {
            self.draw_help(frame);
        }
    }

    fn draw_header(&self, frame: &mut Frame<'_>, area: Rect, snapshot: &Snapshot) {
        let status = format!(
            "Tick {:>6}  Cells {:>4}  Size {:>4.0}  Absorbed {:>3}  Respawned {:>3}",
            snapshot.tick,
            snapshot.population,
            snapshot.player_radius,
            snapshot.absorbed_last,
            snapshot.respawned_last,
        );

        let phase_flag = if snapshot.phase.is_game_over() {
            Span::styled(" GAME OVER ", self.palette.game_over_style())
        } else if self.paused {
            Span::styled(" PAUSED ", self.palette.paused_style())
        } else {
            Span::styled(" RUNNING ", self.palette.running_style())
        };

        let mode_span = Span::styled(
            format!(
                " x{:.1} ",
                if self.paused {
                    0.0
                } else {
                    self.speed_multiplier
                }
            ),
            self.palette.speed_style(self.speed_multiplier),
        );

        let mut line = Line::from(vec![Span::styled(status, self.palette.header_style())]);
        line.spans.push(Span::raw("  "));
        line.spans.push(phase_flag);
        line.spans.push(mode_span);
        line.spans.push(Span::raw("  "));
        line.spans.push(Span::styled(
            format!(
                "Cursor ({:>3.0},{:>3.0})  Cam ({:>5.0},{:>5.0})",
                self.cursor.x, self.cursor.y, snapshot.camera_offset.0, snapshot.camera_offset.1
            ),
            self.palette.accent_style(),
        ));

        let paragraph = Paragraph::new(line).block(
            Block::default()
                .title(self.palette.title("Petri Terminal HUD"))
                .borders(Borders::ALL),
        );
        frame.render_widget(paragraph, area);
    }

    fn draw_stats(&self, frame: &mut Frame<'_>, area: Rect, snapshot: &Snapshot) {
        let mut lines = Vec::new();
        lines.push(Line::from(vec![
            Span::styled("Player ", self.palette.header_style()),
            if snapshot.player_alive {
                Span::raw(format!(
                    "{}  size {:>5.1}  speed {:>4.2}",
                    snapshot.player_name, snapshot.player_radius, snapshot.player_speed
                ))
            } else {
                Span::styled(
                    format!(
                        "{} eliminated at size {:>5.1}",
                        snapshot.player_name, snapshot.player_radius
                    ),
                    self.palette.game_over_text_style(),
                )
            },
        ]));
        lines.push(Line::from(vec![
            Span::styled("Cells  ", self.palette.header_style()),
            Span::raw(format!(
                "{:>4}  bots {:>4}  pellets {:>4}  clones {:>2}",
                snapshot.population, snapshot.bots, snapshot.pellets, snapshot.clones
            )),
        ]));
        lines.push(Line::from(vec![
            Span::styled("Radius ", self.palette.header_style()),
            Span::raw(format!(
                "avg {:>5.1}  min {:>5.1}  max {:>5.1}",
                snapshot.radius_avg, snapshot.radius_min, snapshot.radius_max
            )),
        ]));
        lines.push(Line::from(vec![
            Span::styled("Window ", self.palette.header_style()),
            Span::raw(format!(
                "-{} absorbed  +{} respawned over {} ticks",
                snapshot.window_absorbed,
                snapshot.window_respawned,
                snapshot.history.len()
            )),
        ]));
        lines.push(Line::from(vec![
            Span::styled("World  ", self.palette.header_style()),
            Span::raw(format!(
                "{:.0}x{:.0}  grid {:.0}",
                snapshot.world_size.0, snapshot.world_size.1, snapshot.grid_interval
            )),
        ]));

        let paragraph = Paragraph::new(Text::from(lines)).block(
            Block::default()
                .title(self.palette.title("Vital Stats"))
                .borders(Borders::ALL),
        );
        frame.render_widget(paragraph, area);
    }

    fn draw_trends(&self, frame: &mut Frame<'_>, area: Rect, snapshot: &Snapshot) {
        let block = Block::default()
            .title(self.palette.title("Size & Population Trends"))
            .borders(Borders::ALL);
        let inner = block.inner(area);
        frame.render_widget(block, area);

        if inner.height == 0 {
            return;
        }

        let trend_layout = Layout::default()
            .direction(Direction::Vertical)
            .constraints([
                Constraint::Length(1),
                Constraint::Length(1),
                Constraint::Min(0),
            ])
            .split(inner);

        let pop_data: Vec<u64> = snapshot
            .history
            .iter()
            .rev()
            .map(|entry| entry.population as u64)
            .collect();
        let size_data: Vec<u64> = snapshot
            .history
            .iter()
            .rev()
            .map(|entry| (entry.player_radius.max(0.0) * 10.0) as u64)
            .collect();

        if !pop_data.is_empty() {
            let spark = Sparkline::default()
                .style(self.palette.population_spark_style())
                .data(&pop_data);
            frame.render_widget(spark, trend_layout[0]);
        }
        if !size_data.is_empty() {
            let spark = Sparkline::default()
                .style(self.palette.size_spark_style())
                .data(&size_data);
            frame.render_widget(spark, trend_layout[1]);
        }

        let mut trend_lines = Vec::new();
        if let Some(recent) = snapshot.history.first() {
            trend_lines.push(Line::from(vec![
                Span::styled("Last ", self.palette.header_style()),
                Span::raw(format!(
                    "t{:>6} pop {:>4} size {:>6.1}",
                    recent.tick, recent.population, recent.player_radius
                )),
            ]));
        }
        if let (Some(latest), Some(oldest)) = (snapshot.history.first(), snapshot.history.last()) {
            trend_lines.push(Line::from(vec![
                Span::styled("Window ", self.palette.header_style()),
                Span::raw(format!(
                    "t{:>6}->t{:>6} size {:>5.1}->{:>5.1}",
                    oldest.tick, latest.tick, oldest.player_radius, latest.player_radius
                )),
            ]));
        }
        if trend_lines.is_empty() {
            trend_lines.push(Line::from(vec![Span::raw("Waiting for samples...")]));
        }
        let trend_text = Paragraph::new(trend_lines).block(Block::default());
        frame.render_widget(trend_text, trend_layout[2]);
    }

    fn draw_map(&mut self, frame: &mut Frame<'_>, area: Rect, snapshot: &Snapshot) {
        let title = format!(
            "Arena {:.0}x{:.0}",
            snapshot.world_size.0, snapshot.world_size.1
        );
        let block = Block::default()
            .title(self.palette.title(title))
            .borders(Borders::ALL);
        let inner = block.inner(area);
        frame.render_widget(block, area);
        self.map_area = Some(inner);

        if inner.width < 2 || inner.height < 2 {
            return;
        }

        let grid = render_map_glyphs(
            snapshot,
            &self.palette,
            inner.width as usize,
            inner.height as usize,
            Some(self.cursor),
        );

        // The final view stays up behind the game-over box, dimmed.
        let dimmed = snapshot.phase.is_game_over();
        let mut lines = Vec::with_capacity(grid.len());
        for row in &grid {
            let mut spans = Vec::with_capacity(row.len());
            for cell in row {
                let style = if dimmed {
                    cell.style.add_modifier(Modifier::DIM)
                } else {
                    cell.style
                };
                spans.push(Span::styled(cell.ch.to_string(), style));
            }
            lines.push(Line::from(spans));
        }
        frame.render_widget(Paragraph::new(Text::from(lines)), inner);
    }

    fn draw_leaderboard(&self, frame: &mut Frame<'_>, area: Rect, snapshot: &Snapshot) {
        let items: Vec<ListItem> = snapshot
            .leaderboard
            .iter()
            .enumerate()
            .map(|(rank, entry)| {
                let mut spans = Vec::new();
                spans.push(Span::styled(
                    format!("{:>2}. ", rank + 1),
                    self.palette.header_style(),
                ));
                spans.push(Span::styled(
                    format!("{:<10}", entry.name),
                    self.palette.cell_style(entry.color),
                ));
                spans.push(Span::raw(format!(" {:>6.1}", entry.radius)));
                if entry.player {
                    spans.push(Span::styled("  P", self.palette.accent_style()));
                }
                ListItem::new(Line::from(spans))
            })
            .collect();

        let block = Block::default()
            .title(self.palette.title("Largest Cells"))
            .borders(Borders::ALL);
        frame.render_widget(List::new(items).block(block), area);
    }

    fn draw_events(&self, frame: &mut Frame<'_>, area: Rect) {
        let events: Vec<ListItem> = self
            .event_log
            .iter()
            .rev()
            .map(|entry| {
                let style = self.palette.event_style(entry.kind);
                let text = format!("[t{:>6}] {}", entry.tick, entry.message);
                ListItem::new(Span::styled(text, style))
            })
            .collect();
        let block = Block::default()
            .title(self.palette.title("Recent Events"))
            .borders(Borders::ALL);
        frame.render_widget(List::new(events).block(block), area);
    }

    fn draw_game_over(&self, frame: &mut Frame<'_>, snapshot: &Snapshot) {
        let size = frame.area();
        let width = 34u16.min(size.width);
        let height = 5u16.min(size.height);
        let x = size.x + (size.width - width) / 2;
        let y = size.y + (size.height - height) / 2;
        let area = Rect::new(x, y, width, height);

        let lines = vec![
            Line::from(Span::styled(
                "Game Over",
                self.palette
                    .game_over_text_style()
                    .add_modifier(Modifier::BOLD),
            )),
            Line::from(Span::raw(format!(
                "Final Size: {:.0}",
                snapshot.player_radius
            ))),
            Line::from(Span::styled(
                "Press R to restart, Q to quit",
                self.palette.accent_style(),
            )),
        ];
        let paragraph = Paragraph::new(lines).alignment(Alignment::Center).block(
            Block::default()
                .borders(Borders::ALL)
                .style(Style::default().bg(Color::Black).fg(Color::White)),
        );
        frame.render_widget(paragraph, area);
    }

    fn draw_help(&self, frame: &mut Frame<'_>) {
        let size = frame.area();
        let help_width = (size.width as f32 * 0.6).round() as u16;
        let help_height = 13;
        let help_x = size.x + (size.width - help_width) / 2;
        let help_y = size.y + (size.height.saturating_sub(help_height)) / 2;
        let area = Rect::new(help_x, help_y, help_width, help_height.min(size.height));

        let help_lines = vec![
            Line::from(vec![Span::styled(
                "Controls",
                self.palette.header_style().add_modifier(Modifier::BOLD),
            )]),
            Line::raw(" mouse   Steer toward the pointer"),
            Line::raw(" w       Eject mass toward the pointer"),
            Line::raw(" space   Split toward the pointer"),
            Line::raw(" p       Toggle pause"),
            Line::raw(" + / -   Adjust speed"),
            Line::raw(" s       Single step"),
            Line::raw(" S       Save ASCII screenshot"),
            Line::raw(" r       Restart after game over"),
            Line::raw(" q / Esc Quit"),
            Line::raw(" ?       Toggle this help"),
        ];

        let paragraph = Paragraph::new(help_lines).block(
            Block::default()
                .title(self.palette.title("Help"))
                .borders(Borders::ALL)
                .style(Style::default().bg(Color::Black).fg(Color::White)),
        );
        frame.render_widget(paragraph, area);
    }
}

#[derive(Debug, Default)]
struct TickBatch {
    absorbed: usize,
    respawned: usize,
    fed: bool,
    split: bool,
    game_over: bool,
}

impl TickBatch {
    fn merge(&mut self, events: TickEvents) {
        self.absorbed += events.absorbed;
        self.respawned += events.respawned;
        self.fed |= events.fed;
        self.split |= events.split;
        self.game_over |= events.game_over;
    }
}

#[derive(Clone, Debug)]
struct EventEntry {
    tick: u64,
    message: String,
    kind: EventKind,
}

#[derive(Clone, Copy, Debug)]
enum EventKind {
    Absorb,
    Respawn,
    Player,
    Info,
}

/// Immutable view of the world captured once per UI refresh.
#[derive(Clone, Debug)]
struct Snapshot {
    tick: u64,
    tick_hz: u32,
    phase: GamePhase,
    population: usize,
    bots: usize,
    pellets: usize,
    clones: usize,
    player_name: String,
    player_alive: bool,
    /// Live radius while the player survives, final radius afterwards.
    player_radius: f32,
    player_speed: f32,
    radius_min: f32,
    radius_max: f32,
    radius_avg: f32,
    absorbed_last: usize,
    respawned_last: usize,
    window_absorbed: usize,
    window_respawned: usize,
    camera_offset: (f32, f32),
    world_size: (f32, f32),
    viewport: (f32, f32),
    grid_interval: f32,
    cells: Vec<CellViz>,
    leaderboard: Vec<LeaderEntry>,
    history: Vec<HistoryEntry>,
}

#[derive(Clone, Debug)]
struct CellViz {
    position: (f32, f32),
    radius: f32,
    color: [u8; 3],
    name: Option<String>,
    player_role: bool,
    controlled: bool,
}

#[derive(Clone, Debug)]
struct LeaderEntry {
    name: String,
    radius: f32,
    color: [u8; 3],
    player: bool,
}

#[derive(Clone, Debug, Default)]
struct HistoryEntry {
    tick: u64,
    population: usize,
    player_radius: f32,
    absorbed: usize,
    respawned: usize,
}

impl Snapshot {
    fn from_world(world: &World) -> Self {
        let config = world.config();
        let controlled = world.player_id();
        let camera = world.camera().offset();

        let mut cells: Vec<CellViz> = world
            .cells()
            .iter()
            .map(|(id, cell)| CellViz {
                position: (cell.position.x, cell.position.y),
                radius: cell.radius,
                color: cell.color,
                name: cell.name.clone(),
                player_role: cell.role.is_player(),
                controlled: id == controlled,
            })
            .collect();
        // Smallest first so bigger cells paint over overlaps on the map.
        cells.sort_by(|a, b| a.radius.partial_cmp(&b.radius).unwrap_or(Ordering::Equal));

        let population = cells.len();
        let mut bots = 0usize;
        let mut pellets = 0usize;
        let mut clones = 0usize;
        let mut radius_min = f32::INFINITY;
        let mut radius_max = f32::NEG_INFINITY;
        let mut radius_sum = 0.0_f32;
        for cell in &cells {
            if cell.player_role {
                if !cell.controlled {
                    clones += 1;
                }
            } else if cell.name.is_some() {
                bots += 1;
            } else {
                pellets += 1;
            }
            radius_min = radius_min.min(cell.radius);
            radius_max = radius_max.max(cell.radius);
            radius_sum += cell.radius;
        }
        if !radius_min.is_finite() {
            radius_min = 0.0;
        }
        if !radius_max.is_finite() {
            radius_max = 0.0;
        }
        let radius_avg = if population > 0 {
            radius_sum / population as f32
        } else {
            0.0
        };

        let leaderboard: Vec<LeaderEntry> = cells
            .iter()
            .rev()
            .take(LEADERBOARD_LIMIT)
            .map(|cell| LeaderEntry {
                name: cell.name.clone().unwrap_or_else(|| "pellet".to_string()),
                radius: cell.radius,
                color: cell.color,
                player: cell.player_role,
            })
            .collect();

        let summaries: Vec<TickSummary> = world.history().cloned().collect();
        let latest = summaries.last();
        let absorbed_last = latest.map_or(0, |summary| summary.absorbed);
        let respawned_last = latest.map_or(0, |summary| summary.respawned);
        let history: Vec<HistoryEntry> = summaries
            .iter()
            .rev()
            .take(HISTORY_WINDOW)
            .map(|entry| HistoryEntry {
                tick: entry.tick.0,
                population: entry.population,
                player_radius: entry.player_radius,
                absorbed: entry.absorbed,
                respawned: entry.respawned,
            })
            .collect();
        let window_absorbed = history.iter().map(|entry| entry.absorbed).sum();
        let window_respawned = history.iter().map(|entry| entry.respawned).sum();

        let phase = world.phase();
        let player_alive = world.player_radius().is_some();
        let player_radius = match phase {
            GamePhase::GameOver { final_radius } => final_radius,
            GamePhase::Running => world.player_radius().unwrap_or(0.0),
        };
        let player_speed = world
            .cells()
            .get(controlled)
            .map_or(0.0, |cell| cell.speed);

        Self {
            tick: world.tick().0,
            tick_hz: config.tick_hz,
            phase,
            population,
            bots,
            pellets,
            clones,
            player_name: config.player_name.clone(),
            player_alive,
            player_radius,
            player_speed,
            radius_min,
            radius_max,
            radius_avg,
            absorbed_last,
            respawned_last,
            window_absorbed,
            window_respawned,
            camera_offset: (camera.x, camera.y),
            world_size: (config.world_width(), config.world_height()),
            viewport: (
                config.viewport_width as f32,
                config.viewport_height as f32,
            ),
            grid_interval: config.grid_interval,
            cells,
            leaderboard,
            history,
        }
    }
}

#[derive(Clone, Debug)]
struct CellGlyph {
    ch: char,
    style: Style,
}

impl Default for CellGlyph {
    fn default() -> Self {
        Self {
            ch: ' ',
            style: Style::default(),
        }
    }
}

/// Rasterize the camera's viewport into a `width` by `height` glyph grid:
/// background grid lines first, then every cell smallest-to-largest, then
/// the steering cursor marker.
fn render_map_glyphs(
    snapshot: &Snapshot,
    palette: &Palette,
    width: usize,
    height: usize,
    cursor: Option<Position>,
) -> Vec<Vec<CellGlyph>> {
    let (viewport_w, viewport_h) = snapshot.viewport;
    let (cam_x, cam_y) = snapshot.camera_offset;
    let cell_w = viewport_w / width as f32;
    let cell_h = viewport_h / height as f32;
    let grid_interval = snapshot.grid_interval.max(1.0);

    let mut grid = vec![vec![CellGlyph::default(); width]; height];

    for (gy, row) in grid.iter_mut().enumerate() {
        for (gx, glyph) in row.iter_mut().enumerate() {
            let world_x = cam_x + (gx as f32 + 0.5) * cell_w;
            let world_y = cam_y + (gy as f32 + 0.5) * cell_h;
            let near_x = nearest_line_distance(world_x, grid_interval) <= cell_w * 0.5;
            let near_y = nearest_line_distance(world_y, grid_interval) <= cell_h * 0.5;
            let ch = match (near_x, near_y) {
                (true, true) => '+',
                (true, false) => '|',
                (false, true) => '-',
                (false, false) => ' ',
            };
            *glyph = CellGlyph {
                ch,
                style: palette.grid_style(),
            };
        }
    }

    for cell in &snapshot.cells {
        let (cx, cy) = cell.position;
        let radius = cell.radius;
        let left = ((cx - radius - cam_x) / cell_w).floor();
        let right = ((cx + radius - cam_x) / cell_w).ceil();
        let top = ((cy - radius - cam_y) / cell_h).floor();
        let bottom = ((cy + radius - cam_y) / cell_h).ceil();
        if right < 0.0 || bottom < 0.0 || left >= width as f32 || top >= height as f32 {
            continue;
        }
        let min_gx = left.max(0.0) as usize;
        let max_gx = right.min(width as f32 - 1.0) as usize;
        let min_gy = top.max(0.0) as usize;
        let max_gy = bottom.min(height as f32 - 1.0) as usize;

        let style = palette.cell_style(cell.color);
        let body_style = if cell.controlled {
            style.add_modifier(Modifier::BOLD)
        } else {
            style
        };
        let body = if cell.player_role {
            '@'
        } else if cell.name.is_some() {
            if radius >= 25.0 { 'O' } else { 'o' }
        } else {
            '.'
        };

        for (gy, row) in grid
            .iter_mut()
            .enumerate()
            .take(max_gy + 1)
            .skip(min_gy)
        {
            for (gx, glyph) in row.iter_mut().enumerate().take(max_gx + 1).skip(min_gx) {
                let world_x = cam_x + (gx as f32 + 0.5) * cell_w;
                let world_y = cam_y + (gy as f32 + 0.5) * cell_h;
                let dx = world_x - cx;
                let dy = world_y - cy;
                if dx * dx + dy * dy <= radius * radius {
                    *glyph = CellGlyph {
                        ch: body,
                        style: body_style,
                    };
                }
            }
        }

        if let Some(name) = &cell.name {
            let label: Vec<char> = name.chars().collect();
            let span_cols = max_gx - min_gx + 1;
            if !label.is_empty() && label.len() <= span_cols && label.len() <= width {
                let row_index = ((cy - cam_y) / cell_h) as isize;
                if (0..height as isize).contains(&row_index) {
                    let center_col = ((cx - cam_x) / cell_w) as isize;
                    let start = (center_col - (label.len() / 2) as isize)
                        .clamp(0, (width - label.len()) as isize)
                        as usize;
                    let row = row_index as usize;
                    for (offset, ch) in label.iter().enumerate() {
                        grid[row][start + offset] = CellGlyph {
                            ch: *ch,
                            style: style.add_modifier(Modifier::BOLD),
                        };
                    }
                }
            }
        }
    }

    if let Some(cursor) = cursor {
        let gx = (cursor.x / cell_w) as isize;
        let gy = (cursor.y / cell_h) as isize;
        if (0..width as isize).contains(&gx) && (0..height as isize).contains(&gy) {
            grid[gy as usize][gx as usize] = CellGlyph {
                ch: '+',
                style: palette.cursor_style(),
            };
        }
    }

    grid
}

fn nearest_line_distance(value: f32, interval: f32) -> f32 {
    let rem = value.rem_euclid(interval);
    rem.min(interval - rem)
}

#[derive(Debug, Clone, Serialize)]
struct HeadlessReport {
    initial: FrameStats,
    frames: Vec<FrameStats>,
    summary: ReportSummary,
}

impl HeadlessReport {
    fn new(initial_snapshot: Snapshot) -> Self {
        Self {
            initial: FrameStats::from_snapshot(&initial_snapshot),
            frames: Vec::new(),
            summary: ReportSummary::default(),
        }
    }

    fn record(&mut self, snapshot: &Snapshot) {
        self.frames.push(FrameStats::from_snapshot(snapshot));
    }

    fn finalize(&mut self) {
        self.summary = ReportSummary::from(&self.initial, &self.frames);
    }

    fn write_json(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let file = File::create(path)?;
        serde_json::to_writer_pretty(file, self).context("failed to serialize headless report")?;
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize)]
struct FrameStats {
    tick: u64,
    population: usize,
    player_radius: f32,
    absorbed: usize,
    respawned: usize,
    game_over: bool,
}

impl FrameStats {
    fn from_snapshot(snapshot: &Snapshot) -> Self {
        Self {
            tick: snapshot.tick,
            population: snapshot.population,
            player_radius: snapshot.player_radius,
            absorbed: snapshot.absorbed_last,
            respawned: snapshot.respawned_last,
            game_over: snapshot.phase.is_game_over(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
struct ReportSummary {
    frame_count: usize,
    ticks_simulated: u64,
    final_tick: u64,
    final_population: usize,
    total_absorbed: usize,
    total_respawned: usize,
    player_radius_final: f32,
    player_radius_peak: f32,
    game_over: bool,
}

impl ReportSummary {
    fn from(initial: &FrameStats, frames: &[FrameStats]) -> Self {
        if frames.is_empty() {
            return Self {
                frame_count: 0,
                ticks_simulated: 0,
                final_tick: initial.tick,
                final_population: initial.population,
                total_absorbed: 0,
                total_respawned: 0,
                player_radius_final: initial.player_radius,
                player_radius_peak: initial.player_radius,
                game_over: initial.game_over,
            };
        }

        let final_stats = frames.last().expect("frame list not empty");
        let ticks_simulated = final_stats.tick.saturating_sub(initial.tick);

        let mut total_absorbed = 0usize;
        let mut total_respawned = 0usize;
        let mut previous_tick = initial.tick;
        let mut peak = initial.player_radius;
        for frame in frames {
            // A finished game repeats its last tick; count each tick once.
            if frame.tick != previous_tick {
                total_absorbed += frame.absorbed;
                total_respawned += frame.respawned;
                previous_tick = frame.tick;
            }
            if frame.player_radius > peak {
                peak = frame.player_radius;
            }
        }

        Self {
            frame_count: frames.len(),
            ticks_simulated,
            final_tick: final_stats.tick,
            final_population: final_stats.population,
            total_absorbed,
            total_respawned,
            player_radius_final: final_stats.player_radius,
            player_radius_peak: peak,
            game_over: final_stats.game_over,
        }
    }
}

fn report_file_path_from_env() -> Option<PathBuf> {
    std::env::var_os("PETRI_TERMINAL_HEADLESS_REPORT").and_then(|raw| {
        if raw.is_empty() {
            None
        } else {
            Some(PathBuf::from(raw))
        }
    })
}

struct Palette {
    level: Option<ColorLevel>,
}

impl Palette {
    fn detect() -> Self {
        Self {
            level: on_cached(Stream::Stdout),
        }
    }

    fn header_style(&self) -> Style {
        Style::default()
            .fg(Color::Cyan)
            .add_modifier(Modifier::BOLD)
    }

    fn accent_style(&self) -> Style {
        Style::default().fg(Color::LightMagenta)
    }

    fn paused_style(&self) -> Style {
        Style::default()
            .fg(Color::Black)
            .bg(Color::DarkGray)
            .add_modifier(Modifier::BOLD)
    }

    fn running_style(&self) -> Style {
        Style::default()
            .fg(Color::Black)
            .bg(Color::Green)
            .add_modifier(Modifier::BOLD)
    }

    fn game_over_style(&self) -> Style {
        Style::default()
            .fg(Color::White)
            .bg(Color::Red)
            .add_modifier(Modifier::BOLD)
    }

    fn game_over_text_style(&self) -> Style {
        Style::default().fg(Color::Red)
    }

    fn speed_style(&self, speed: f32) -> Style {
        let color = if speed > 1.0 {
            Color::Yellow
        } else if speed <= 0.0 {
            Color::DarkGray
        } else {
            Color::LightCyan
        };
        Style::default().fg(color)
    }

    fn title<T: Into<String>>(&self, title: T) -> Span<'static> {
        Span::styled(title.into(), self.header_style())
    }

    fn event_style(&self, kind: EventKind) -> Style {
        let color = match kind {
            EventKind::Absorb => Color::Red,
            EventKind::Respawn => Color::Green,
            EventKind::Player => Color::Cyan,
            EventKind::Info => Color::Yellow,
        };
        Style::default().fg(color)
    }

    fn population_spark_style(&self) -> Style {
        Style::default().fg(Color::Green)
    }

    fn size_spark_style(&self) -> Style {
        Style::default().fg(Color::Yellow)
    }

    fn grid_style(&self) -> Style {
        if self.rich_color() {
            Style::default().fg(Color::Rgb(90, 90, 90))
        } else {
            Style::default().fg(Color::DarkGray)
        }
    }

    fn cursor_style(&self) -> Style {
        Style::default()
            .fg(Color::Yellow)
            .add_modifier(Modifier::BOLD)
    }

    fn cell_style(&self, color: [u8; 3]) -> Style {
        if self.rich_color() {
            Style::default().fg(Color::Rgb(color[0], color[1], color[2]))
        } else {
            Style::default().fg(basic_color(color))
        }
    }

    fn rich_color(&self) -> bool {
        self.level
            .is_some_and(|level| level.has_16m || level.has_256)
    }
}

/// Nearest 16-color approximation for terminals without RGB support.
fn basic_color(color: [u8; 3]) -> Color {
    let [r, g, b] = color.map(|channel| channel >= 128);
    match (r, g, b) {
        (true, false, false) => Color::Red,
        (false, true, false) => Color::Green,
        (false, false, true) => Color::Blue,
        (true, true, false) => Color::Yellow,
        (true, false, true) => Color::Magenta,
        (false, true, true) => Color::Cyan,
        (true, true, true) => Color::White,
        (false, false, false) => Color::Gray,
    }
}
