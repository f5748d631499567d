use anyhow::Result;
use log::{LevelFilter, error, info};
use ratatui::prelude::CrosstermBackend;
use simplelog::{Config as LogConfig, WriteLogger};
use std::fs::{self, File};
use std::io;
use std::path::Path;
use std::time::{Duration, Instant};

use netpeek::app::Sniffer;
use netpeek::cli::{build_cli, options_from_matches};
use netpeek::network::list_all_devices;
use netpeek::ui::{self, Ui};

/// Startup validation and initialisation failures are fatal, reported on
/// stdout before the terminal is taken over.
fn exit_with(reason: &str) -> ! {
    println!("Start sniffer failed: {reason}");
    std::process::exit(1);
}

fn main() -> Result<()> {
    let matches = build_cli().get_matches();

    if matches.get_flag("list") {
        let devices = match list_all_devices() {
            Ok(devices) => devices,
            Err(err) => exit_with(&err.to_string()),
        };
        for device in devices {
            println!("{}", device.name);
        }
        return Ok(());
    }

    let opts = match options_from_matches(&matches) {
        Ok(opts) => opts,
        Err(err) => exit_with(&err.to_string()),
    };

    setup_logging()?;
    info!("starting netpeek");

    let mut sniffer = match Sniffer::new(opts.clone()) {
        Ok(sniffer) => sniffer,
        Err(err) => exit_with(&err.to_string()),
    };

    let backend = CrosstermBackend::new(io::stdout());
    let mut terminal = match ui::setup_terminal(backend) {
        Ok(terminal) => terminal,
        Err(err) => exit_with(&err.to_string()),
    };

    let mut view = Ui::new(&opts);
    let res = run_event_loop(&mut terminal, &mut sniffer, &mut view);

    // Teardown order matters: UI first, then capture workers, resolver last.
    ui::restore_terminal(&mut terminal)?;
    sniffer.close();

    if let Err(err) = res {
        error!("event loop failed: {err}");
        eprintln!("Error: {err}");
    }

    info!("netpeek shut down");
    Ok(())
}

fn setup_logging() -> Result<()> {
    let log_dir = Path::new("logs");
    if !log_dir.exists() {
        fs::create_dir_all(log_dir)?;
    }

    let timestamp = chrono::Local::now().format("%Y-%m-%d_%H-%M-%S");
    let log_file_path = log_dir.join(format!("netpeek_{timestamp}.log"));

    WriteLogger::init(
        LevelFilter::Debug,
        LogConfig::default(),
        File::create(log_file_path)?,
    )?;

    Ok(())
}

fn run_event_loop<B: ratatui::backend::Backend>(
    terminal: &mut ui::Terminal<B>,
    sniffer: &mut Sniffer,
    view: &mut Ui,
) -> Result<()> {
    use crossterm::event::{self, Event, KeyCode, KeyModifiers};

    let tick_rate = Duration::from_secs(sniffer.interval());
    let mut last_tick = Instant::now();
    let mut paused = false;

    // Seed the first frame instead of waiting a whole interval.
    if let Some(stats) = sniffer.refresh() {
        view.update(stats);
    }

    loop {
        terminal.draw(|frame| view.draw(frame, sniffer.view_mode()))?;

        let timeout = tick_rate.saturating_sub(last_tick.elapsed());
        if event::poll(timeout)? {
            match event::read()? {
                Event::Key(key) => match (key.code, key.modifiers) {
                    (KeyCode::Char('q') | KeyCode::Char('Q'), _) => break,
                    (KeyCode::Char('c'), KeyModifiers::CONTROL) => break,
                    (KeyCode::Char(' '), _) => paused = !paused,
                    (KeyCode::Tab, _) => view.shift(),
                    (KeyCode::Char('s') | KeyCode::Char('S'), _) => {
                        sniffer.switch_view_mode();
                        view.reset();
                    }
                    _ => {}
                },
                // The next draw re-lays the grid from the new frame size.
                Event::Resize(_, _) => {}
                _ => {}
            }
        }

        if last_tick.elapsed() >= tick_rate {
            last_tick = Instant::now();
            if !paused && let Some(stats) = sniffer.refresh() {
                view.update(stats);
            }
        }
    }

    Ok(())
}
