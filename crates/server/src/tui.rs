use std::collections::VecDeque;
use std::time::Instant;

use coop::{RoomInfo, RoomStatus, SeatInfo};
use ratatui::Frame;
use ratatui::layout::{Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{Block, Borders, Cell, List, ListItem, Paragraph, Row, Table, Tabs};

use crate::server::ServerStats;

const MAX_LOG_ENTRIES: usize = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tab {
    Rooms,
    Log,
}

impl Tab {
    const ALL: [Tab; 2] = [Tab::Rooms, Tab::Log];

    fn title(self) -> &'static str {
        match self {
            Tab::Rooms => "Rooms",
            Tab::Log => "Log",
        }
    }

    fn index(self) -> usize {
        Tab::ALL.iter().position(|t| *t == self).unwrap_or(0)
    }
}

#[derive(Debug, Clone, Copy)]
enum LogLevel {
    Info,
    Warn,
    Error,
}

struct LogEntry {
    at_secs: u64,
    level: LogLevel,
    message: String,
}

pub struct TuiState {
    started_at: Instant,
    tab: Tab,
    log: VecDeque<LogEntry>,
    /// Lines scrolled up from the newest entry.
    scroll: usize,
    selected_room: usize,
}

impl TuiState {
    pub fn new() -> Self {
        Self {
            started_at: Instant::now(),
            tab: Tab::Rooms,
            log: VecDeque::new(),
            scroll: 0,
            selected_room: 0,
        }
    }

    pub fn active_tab(&self) -> Tab {
        self.tab
    }

    pub fn next_tab(&mut self) {
        self.tab = Tab::ALL[(self.tab.index() + 1) % Tab::ALL.len()];
    }

    pub fn prev_tab(&mut self) {
        self.tab = Tab::ALL[(self.tab.index() + Tab::ALL.len() - 1) % Tab::ALL.len()];
    }

    pub fn log_info(&mut self, message: impl Into<String>) {
        self.push(LogLevel::Info, message.into());
    }

    pub fn log_warn(&mut self, message: impl Into<String>) {
        self.push(LogLevel::Warn, message.into());
    }

    pub fn log_error(&mut self, message: impl Into<String>) {
        self.push(LogLevel::Error, message.into());
    }

    pub fn scroll_up(&mut self) {
        self.scroll = (self.scroll + 10).min(self.log.len().saturating_sub(1));
    }

    pub fn scroll_down(&mut self) {
        self.scroll = self.scroll.saturating_sub(10);
    }

    pub fn scroll_to_bottom(&mut self) {
        self.scroll = 0;
    }

    pub fn select_prev_room(&mut self, count: usize) {
        if count > 0 {
            self.selected_room = (self.selected_room + count - 1) % count;
        }
    }

    pub fn select_next_room(&mut self, count: usize) {
        if count > 0 {
            self.selected_room = (self.selected_room + 1) % count;
        }
    }

    fn push(&mut self, level: LogLevel, message: String) {
        if self.log.len() == MAX_LOG_ENTRIES {
            self.log.pop_front();
        }
        self.log.push_back(LogEntry {
            at_secs: self.started_at.elapsed().as_secs(),
            level,
            message,
        });
    }
}

pub fn render(frame: &mut Frame, state: &TuiState, stats: &ServerStats, rooms: &[RoomInfo]) {
    let chunks = Layout::default()
        .direction(Direction::Vertical)
        .margin(1)
        .constraints([
            Constraint::Length(3),
            Constraint::Length(3),
            Constraint::Min(0),
            Constraint::Length(3),
        ])
        .split(frame.area());

    render_header(frame, chunks[0], stats);
    render_tabs(frame, chunks[1], state);
    match state.tab {
        Tab::Rooms => render_rooms(frame, chunks[2], state, rooms),
        Tab::Log => render_log(frame, chunks[2], state),
    }
    render_help(frame, chunks[3]);
}

fn render_header(frame: &mut Frame, area: Rect, stats: &ServerStats) {
    let title = format!(" Coop Server - Uptime: {} ", format_duration(stats.uptime_secs));

    let block = Block::default()
        .title(title)
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Cyan));

    let text = format!(
        "Rooms: {}  |  Connections: {}  |  Identified: {}",
        stats.resident_rooms, stats.connections, stats.identified
    );

    let paragraph = Paragraph::new(text)
        .block(block)
        .style(Style::default().fg(Color::White));

    frame.render_widget(paragraph, area);
}

fn render_tabs(frame: &mut Frame, area: Rect, state: &TuiState) {
    let titles: Vec<&str> = Tab::ALL.iter().map(|t| t.title()).collect();
    let tabs = Tabs::new(titles)
        .block(Block::default().borders(Borders::ALL))
        .select(state.tab.index())
        .highlight_style(
            Style::default()
                .fg(Color::Yellow)
                .add_modifier(Modifier::BOLD),
        );

    frame.render_widget(tabs, area);
}

fn render_rooms(frame: &mut Frame, area: Rect, state: &TuiState, rooms: &[RoomInfo]) {
    let block = Block::default()
        .title(" Resident rooms ")
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Green));

    let header = Row::new(["Room", "Status", "Host", "Client", "Level"])
        .style(Style::default().fg(Color::Gray).add_modifier(Modifier::BOLD));

    let rows: Vec<Row> = rooms
        .iter()
        .enumerate()
        .map(|(i, room)| {
            let style = if i == state.selected_room {
                Style::default().add_modifier(Modifier::REVERSED)
            } else {
                Style::default()
            };
            Row::new(vec![
                Cell::from(room.room_id.to_string()),
                Cell::from(room.status.as_str())
                    .style(Style::default().fg(status_color(room.status))),
                Cell::from(seat_label(&room.seats.host)),
                Cell::from(seat_label(&room.seats.client)),
                Cell::from(room.shared_level.to_string()),
            ])
            .style(style)
        })
        .collect();

    let table = Table::new(
        rows,
        [
            Constraint::Length(8),
            Constraint::Length(9),
            Constraint::Min(14),
            Constraint::Min(14),
            Constraint::Length(6),
        ],
    )
    .header(header)
    .block(block);

    frame.render_widget(table, area);
}

fn render_log(frame: &mut Frame, area: Rect, state: &TuiState) {
    let block = Block::default()
        .title(" Log ")
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::Yellow));

    let visible = area.height.saturating_sub(2) as usize;
    let end = state.log.len().saturating_sub(state.scroll);
    let start = end.saturating_sub(visible);

    let items: Vec<ListItem> = state
        .log
        .range(start..end)
        .map(|entry| {
            let (tag, color) = match entry.level {
                LogLevel::Info => ("INFO ", Color::Green),
                LogLevel::Warn => ("WARN ", Color::Yellow),
                LogLevel::Error => ("ERROR", Color::Red),
            };
            ListItem::new(Line::from(vec![
                Span::styled(
                    format!("{} ", format_duration(entry.at_secs)),
                    Style::default().fg(Color::DarkGray),
                ),
                Span::styled(format!("{} ", tag), Style::default().fg(color)),
                Span::raw(entry.message.clone()),
            ]))
        })
        .collect();

    frame.render_widget(List::new(items).block(block), area);
}

fn render_help(frame: &mut Frame, area: Rect) {
    let block = Block::default()
        .title(" Controls ")
        .borders(Borders::ALL)
        .border_style(Style::default().fg(Color::DarkGray));

    let help = "q/ESC quit  |  Tab switch view  |  Up/Down select room  |  PgUp/PgDn/End scroll";
    let text = Paragraph::new(help)
        .block(block)
        .style(
            Style::default()
                .fg(Color::DarkGray)
                .add_modifier(Modifier::ITALIC),
        );

    frame.render_widget(text, area);
}

fn seat_label(seat: &SeatInfo) -> String {
    match seat.user_id {
        Some(user_id) if seat.connected => format!("{} (online)", user_id),
        Some(user_id) => format!("{} (away)", user_id),
        None => "-".to_string(),
    }
}

fn status_color(status: RoomStatus) -> Color {
    match status {
        RoomStatus::Waiting => Color::White,
        RoomStatus::Invited => Color::Cyan,
        RoomStatus::Active => Color::Green,
        RoomStatus::Closed => Color::DarkGray,
    }
}

fn format_duration(secs: u64) -> String {
    let hours = secs / 3600;
    let mins = (secs % 3600) / 60;
    let secs = secs % 60;
    format!("{:02}:{:02}:{:02}", hours, mins, secs)
}
