// ui.rs - Render sink: rolling tables and rate plots over stats snapshots

use anyhow::Result;
use ratatui::{
    Frame, Terminal as RatatuiTerminal,
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    symbols,
    widgets::{Axis, Block, Borders, Chart, Dataset, GraphType, Paragraph, Row, Table},
};
use std::collections::VecDeque;

use crate::config::{Options, Unit, ViewMode};
use crate::stats::{NetworkData, Snapshot, StatsView};

pub type Terminal<B> = RatatuiTerminal<B>;

const MAX_ROWS: usize = 64;
const TIME_FORMAT: &str = "%H:%M:%S";
/// Plot samples kept per series; the draw slices what fits the terminal.
const PLOT_HISTORY: usize = 512;

const FOOTER: &str = "<space> Pause. <q> Exit. <s> Switch mode. <tab> Rearrange tables";

/// Set up the terminal for the TUI application
pub fn setup_terminal<B: ratatui::backend::Backend>(backend: B) -> Result<Terminal<B>> {
    let mut terminal = RatatuiTerminal::new(backend)?;
    terminal.clear()?;
    terminal.hide_cursor()?;
    crossterm::terminal::enable_raw_mode()?;
    crossterm::execute!(std::io::stdout(), crossterm::terminal::EnterAlternateScreen)?;
    Ok(terminal)
}

/// Restore the terminal to its original state
pub fn restore_terminal<B: ratatui::backend::Backend>(terminal: &mut Terminal<B>) -> Result<()> {
    crossterm::terminal::disable_raw_mode()?;
    crossterm::execute!(std::io::stdout(), crossterm::terminal::LeaveAlternateScreen)?;
    terminal.show_cursor()?;
    Ok(())
}

/// View state between ticks: the latest aggregate plus the plot histories
/// that survive across refreshes.
pub struct Ui {
    unit: Unit,
    pids: Vec<i32>,
    shift_idx: usize,
    view: Option<StatsView>,
    bytes_up: VecDeque<f64>,
    bytes_down: VecDeque<f64>,
    packets_up: VecDeque<f64>,
    packets_down: VecDeque<f64>,
    conns: VecDeque<f64>,
}

impl Ui {
    pub fn new(opts: &Options) -> Self {
        Self {
            unit: opts.unit,
            pids: opts.pids.clone(),
            shift_idx: 0,
            view: None,
            bytes_up: VecDeque::new(),
            bytes_down: VecDeque::new(),
            packets_up: VecDeque::new(),
            packets_down: VecDeque::new(),
            conns: VecDeque::new(),
        }
    }

    /// Rotate which panel gets the full-width slot.
    pub fn shift(&mut self) {
        self.shift_idx = self.shift_idx.wrapping_add(1);
    }

    /// Drop carried state after a view-mode switch; the fresh stats window
    /// starts empty and so does the display.
    pub fn reset(&mut self) {
        self.view = None;
        self.bytes_up.clear();
        self.bytes_down.clear();
        self.packets_up.clear();
        self.packets_down.clear();
        self.conns.clear();
    }

    /// Take the result of one tick.
    pub fn update(&mut self, view: StatsView) {
        if let StatsView::Plot(data) = &view {
            push_sample(&mut self.bytes_up, data.upload_bytes as f64);
            push_sample(&mut self.bytes_down, data.download_bytes as f64);
            push_sample(&mut self.packets_up, data.upload_packets as f64);
            push_sample(&mut self.packets_down, data.download_packets as f64);
            push_sample(&mut self.conns, data.conn_count as f64);
        }
        self.view = Some(view);
    }

    pub fn draw(&self, frame: &mut Frame, mode: ViewMode) {
        let [header, top, bottom, footer] = split_rows(frame.area());
        let [top_left, top_right] = split_columns(top);

        frame.render_widget(
            Paragraph::new(FOOTER).style(Style::default().add_modifier(Modifier::BOLD)),
            footer,
        );

        match &self.view {
            Some(StatsView::Table(snapshot)) => {
                self.draw_header(frame, header, mode, snapshot);
                // Panels rotate through the two half-width slots and the
                // full-width one.
                let slots = [top_left, top_right, bottom];
                for (i, area) in slots.into_iter().enumerate() {
                    match (self.shift_idx + 1 + i) % 3 {
                        0 => self.draw_processes(frame, area, mode, snapshot),
                        1 => self.draw_remote_addrs(frame, area, mode, snapshot),
                        _ => self.draw_connections(frame, area, mode, snapshot),
                    }
                }
            }
            Some(StatsView::Plot(_)) => {
                self.draw_plot_header(frame, header);
                let slots = [top_left, top_right, bottom];
                for (i, area) in slots.into_iter().enumerate() {
                    match (self.shift_idx + 1 + i) % 3 {
                        0 => self.draw_bytes_plot(frame, area),
                        1 => self.draw_packets_plot(frame, area),
                        _ => self.draw_conns_plot(frame, area),
                    }
                }
            }
            None => {
                let waiting = match mode {
                    ViewMode::PlotProcesses => "[Processes Mode] collecting samples...",
                    _ => "collecting samples...",
                };
                frame.render_widget(Paragraph::new(waiting), header);
            }
        }
    }

    fn humanize(&self, n: u64, mode: ViewMode) -> String {
        match mode {
            ViewMode::TablePackets => format!("{}ps", format_commas(n)),
            _ => format!("{:.1}{}ps", n as f64 / self.unit.ratio(), self.unit.as_str()),
        }
    }

    fn draw_header(&self, frame: &mut Frame, area: Rect, mode: ViewMode, snapshot: &Snapshot) {
        let now = chrono::Local::now().format(TIME_FORMAT);
        let (tag, up, down) = match mode {
            ViewMode::TablePackets => (
                "[Packets Mode]",
                self.humanize(snapshot.total_upload_packets, mode),
                self.humanize(snapshot.total_download_packets, mode),
            ),
            _ => (
                "[Bytes Mode]",
                self.humanize(snapshot.total_upload_bytes, mode),
                self.humanize(snapshot.total_download_bytes, mode),
            ),
        };
        let text = format!(
            "{tag} Time: {now}  [Total] Conn:{} Up:{up} Down:{down}",
            snapshot.total_connections
        );
        frame.render_widget(
            Paragraph::new(text).style(Style::default().add_modifier(Modifier::BOLD)),
            area,
        );
    }

    fn draw_plot_header(&self, frame: &mut Frame, area: Rect) {
        let now = chrono::Local::now().format(TIME_FORMAT);
        let pids = if self.pids.is_empty() {
            "Pids All".to_string()
        } else {
            let list: Vec<String> = self.pids.iter().map(|pid| pid.to_string()).collect();
            format!("Pids </ {} />", list.join(" "))
        };
        frame.render_widget(
            Paragraph::new(format!("[Processes Mode] Now: {now}  {pids}"))
                .style(Style::default().add_modifier(Modifier::BOLD)),
            area,
        );
    }

    fn draw_processes(&self, frame: &mut Frame, area: Rect, mode: ViewMode, snapshot: &Snapshot) {
        let rows = snapshot
            .top_n_processes(MAX_ROWS, mode)
            .into_iter()
            .map(|(name, data)| {
                Row::new(vec![name, data.conn_count.to_string(), self.up_down(&data, mode)])
            });
        frame.render_widget(
            three_column_table(rows, ["<Pid>:Process", "Connections", "Up / Down"], "Process Name"),
            area,
        );
    }

    fn draw_remote_addrs(&self, frame: &mut Frame, area: Rect, mode: ViewMode, snapshot: &Snapshot) {
        let rows = snapshot
            .top_n_remote_addrs(MAX_ROWS, mode)
            .into_iter()
            .map(|(addr, data)| {
                Row::new(vec![addr, data.conn_count.to_string(), self.up_down(&data, mode)])
            });
        frame.render_widget(
            three_column_table(rows, ["Remote Address", "Connections", "Up / Down"], "Remote Address"),
            area,
        );
    }

    fn draw_connections(&self, frame: &mut Frame, area: Rect, mode: ViewMode, snapshot: &Snapshot) {
        let rows = snapshot
            .top_n_connections(MAX_ROWS, mode)
            .into_iter()
            .map(|(conn, data)| {
                let endpoint = format!(
                    "<{}>:{} => {}:{} ({})",
                    data.interface_name,
                    conn.local.port,
                    conn.remote.ip,
                    conn.remote.port,
                    conn.local.protocol,
                );
                let traffic = match mode {
                    ViewMode::TablePackets => format!(
                        "{} / {}",
                        self.humanize(data.upload_packets, mode),
                        self.humanize(data.download_packets, mode)
                    ),
                    _ => format!(
                        "{} / {}",
                        self.humanize(data.upload_bytes, mode),
                        self.humanize(data.download_bytes, mode)
                    ),
                };
                Row::new(vec![endpoint, data.process_name, traffic])
            });
        frame.render_widget(
            three_column_table(rows, ["Connections", "<Pid>:Process", "Up / Down"], "Connections"),
            area,
        );
    }

    fn up_down(&self, data: &NetworkData, mode: ViewMode) -> String {
        match mode {
            ViewMode::TablePackets => format!(
                "{} / {}",
                self.humanize(data.upload_packets, mode),
                self.humanize(data.download_packets, mode)
            ),
            _ => format!(
                "{} / {}",
                self.humanize(data.upload_bytes, mode),
                self.humanize(data.download_bytes, mode)
            ),
        }
    }

    fn draw_bytes_plot(&self, frame: &mut Frame, area: Rect) {
        let ratio = self.unit.ratio();
        let up = scaled_points(&self.bytes_up, area, ratio);
        let down = scaled_points(&self.bytes_down, area, ratio);
        let title = format!("Bytes: <Unit {}ps> Blue Up / Green Down", self.unit.as_str());
        draw_chart(frame, area, &title, &[(&up, Color::Blue), (&down, Color::Green)]);
    }

    fn draw_packets_plot(&self, frame: &mut Frame, area: Rect) {
        let up = scaled_points(&self.packets_up, area, 1.0);
        let down = scaled_points(&self.packets_down, area, 1.0);
        draw_chart(
            frame,
            area,
            "Packets: Blue Up / Green Down",
            &[(&up, Color::Blue), (&down, Color::Green)],
        );
    }

    fn draw_conns_plot(&self, frame: &mut Frame, area: Rect) {
        let conns = scaled_points(&self.conns, area, 1.0);
        draw_chart(frame, area, "Connections", &[(&conns, Color::Cyan)]);
    }
}

fn split_rows(area: Rect) -> [Rect; 4] {
    let rows = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(1),
            Constraint::Percentage(48),
            Constraint::Percentage(48),
            Constraint::Length(1),
        ])
        .split(area);
    [rows[0], rows[1], rows[2], rows[3]]
}

fn split_columns(area: Rect) -> [Rect; 2] {
    let columns = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(50), Constraint::Percentage(50)])
        .split(area);
    [columns[0], columns[1]]
}

fn three_column_table<'a>(
    rows: impl Iterator<Item = Row<'a>>,
    header: [&'a str; 3],
    title: &'a str,
) -> Table<'a> {
    Table::new(
        rows,
        [
            Constraint::Percentage(50),
            Constraint::Percentage(25),
            Constraint::Percentage(25),
        ],
    )
    .header(Row::new(header.to_vec()).style(Style::default().fg(Color::Cyan)))
    .block(Block::default().borders(Borders::ALL).title(title))
}

fn push_sample(queue: &mut VecDeque<f64>, value: f64) {
    if queue.len() >= PLOT_HISTORY {
        queue.pop_front();
    }
    queue.push_back(value);
}

/// The tail of one series that fits the panel, as chart points.
fn scaled_points(queue: &VecDeque<f64>, area: Rect, ratio: f64) -> Vec<(f64, f64)> {
    let visible = (area.width as usize).saturating_sub(6).max(8);
    queue
        .iter()
        .rev()
        .take(visible)
        .rev()
        .enumerate()
        .map(|(i, v)| (i as f64, v / ratio))
        .collect()
}

fn draw_chart(frame: &mut Frame, area: Rect, title: &str, series: &[(&Vec<(f64, f64)>, Color)]) {
    let x_max = series
        .iter()
        .map(|(points, _)| points.len())
        .max()
        .unwrap_or(0)
        .max(2) as f64;
    let y_max = series
        .iter()
        .flat_map(|(points, _)| points.iter().map(|(_, y)| *y))
        .fold(1.0_f64, f64::max);

    let datasets: Vec<Dataset> = series
        .iter()
        .map(|(points, color)| {
            Dataset::default()
                .marker(symbols::Marker::Braille)
                .graph_type(GraphType::Line)
                .style(Style::default().fg(*color))
                .data(points.as_slice())
        })
        .collect();

    let y_upper = format!("{:.1}", y_max * 1.25);
    let chart = Chart::new(datasets)
        .block(Block::default().borders(Borders::ALL).title(title.to_string()))
        .x_axis(Axis::default().bounds([0.0, x_max]))
        .y_axis(
            Axis::default()
                .bounds([0.0, y_max * 1.25])
                .labels(["0".to_string(), y_upper]),
        );
    frame.render_widget(chart, area);
}

/// Thousands-separated integer, e.g. 1234567 -> "1,234,567".
fn format_commas(n: u64) -> String {
    let digits = n.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i).is_multiple_of(3) {
            out.push(',');
        }
        out.push(c);
    }
    out
}
