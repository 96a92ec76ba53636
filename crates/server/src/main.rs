mod config;
mod server;
mod tui;

use std::io;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use crossterm::event::{self, Event, KeyCode, KeyEventKind};
use crossterm::terminal::{self, EnterAlternateScreen, LeaveAlternateScreen};
use crossterm::{cursor, execute};
use ratatui::Terminal;
use ratatui::backend::CrosstermBackend;
use tokio::runtime::Runtime;
use tokio::sync::mpsc;

use config::ServerConfig;
use coop::{EndpointEvent, SessionConfig};
use server::CoopServer;
use tui::TuiState;

#[derive(Parser)]
#[command(name = "coop-server")]
#[command(about = "Two-player cooperative room server")]
struct Args {
    #[arg(short, long, default_value = "0.0.0.0")]
    bind: String,

    #[arg(short, long, default_value_t = coop::DEFAULT_PORT)]
    port: u16,

    #[arg(short, long, help = "Directory for room records (in-memory when omitted)")]
    data_dir: Option<PathBuf>,

    #[arg(short, long, help = "JSON file of known users")]
    users: Option<PathBuf>,

    #[arg(long = "user", value_name = "NAME", help = "Register an extra user by display name")]
    extra_users: Vec<String>,

    #[arg(long, default_value_t = 5)]
    code_length: usize,

    #[arg(long)]
    headless: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();
    let bind_addr = format!("{}:{}", args.bind, args.port);

    let config = ServerConfig {
        data_dir: args.data_dir,
        users_file: args.users,
        extra_users: args.extra_users,
        session: SessionConfig {
            code_length: args.code_length.max(1),
            ..Default::default()
        },
    };

    let runtime = Runtime::new()?;

    if args.headless {
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
        runtime.block_on(run_headless(&bind_addr, &config))?;
    } else {
        run_with_tui(&runtime, &bind_addr, &config)?;
    }

    Ok(())
}

async fn run_headless(bind_addr: &str, config: &ServerConfig) -> Result<()> {
    let server = CoopServer::start(bind_addr, config, None).await?;
    log::info!("Server started on {}", server.local_addr());

    tokio::signal::ctrl_c().await?;
    log::info!("Server shutting down");
    server.shutdown().await;
    Ok(())
}

fn run_with_tui(runtime: &Runtime, bind_addr: &str, config: &ServerConfig) -> Result<()> {
    let (events_tx, mut events_rx) = mpsc::unbounded_channel();
    let server = runtime.block_on(CoopServer::start(bind_addr, config, Some(events_tx)))?;

    terminal::enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, cursor::Hide)?;

    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let mut tui_state = TuiState::new();
    let mut running = true;
    let mut endpoint_alive = true;

    while running {
        while let Ok(event) = events_rx.try_recv() {
            match event {
                EndpointEvent::Listening { addr } => {
                    tui_state.log_info(format!("Server started on {}", addr));
                }
                EndpointEvent::ClientConnected {
                    connection_id,
                    addr,
                } => {
                    tui_state.log_info(format!("{} connected from {}", connection_id, addr));
                }
                EndpointEvent::ClientDisconnected {
                    connection_id,
                    reason,
                } => {
                    tui_state.log_info(format!("{} {}", connection_id, reason.as_str()));
                }
                EndpointEvent::Error { message } => {
                    tui_state.log_error(message);
                }
            }
        }

        if endpoint_alive && !server.is_running() {
            endpoint_alive = false;
            tui_state.log_warn("Endpoint stopped accepting connections");
        }

        let rooms = server.room_infos();

        if event::poll(Duration::from_millis(50))? {
            if let Event::Key(key) = event::read()? {
                if key.kind == KeyEventKind::Press {
                    match key.code {
                        KeyCode::Char('q') | KeyCode::Esc => running = false,
                        KeyCode::Tab => tui_state.next_tab(),
                        KeyCode::BackTab => tui_state.prev_tab(),
                        KeyCode::PageUp => tui_state.scroll_up(),
                        KeyCode::PageDown => tui_state.scroll_down(),
                        KeyCode::End => tui_state.scroll_to_bottom(),
                        KeyCode::Up => {
                            if tui_state.active_tab() == tui::Tab::Rooms {
                                tui_state.select_prev_room(rooms.len());
                            }
                        }
                        KeyCode::Down => {
                            if tui_state.active_tab() == tui::Tab::Rooms {
                                tui_state.select_next_room(rooms.len());
                            }
                        }
                        _ => {}
                    }
                }
            }
        }

        let stats = server.stats();
        terminal.draw(|frame| {
            tui::render(frame, &tui_state, &stats, &rooms);
        })?;
    }

    tui_state.log_info("Shutting down...");
    runtime.block_on(server.shutdown());

    terminal::disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen, cursor::Show)?;

    Ok(())
}
