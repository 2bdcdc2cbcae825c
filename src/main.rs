use anyhow::{Context, Result};
use clap::Parser;
use crossterm::{cursor, execute, terminal};
use log::LevelFilter;
use simplelog::{ConfigBuilder, WriteLogger};
use std::fs::File;
use std::io::{self, Read};
use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use tokio::sync::mpsc;

use plugmux::host::Host;
use plugmux::mux::LoopExit;
use plugmux::screen::CrosstermScreen;
use plugmux::{plugins, Config};

#[derive(Parser)]
#[command(name = "plugmux", version, about = "Run a shell under a pluggable terminal multiplexer")]
struct Args {
    /// TOML config file; built-in defaults when absent
    #[arg(short, long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Where log lines go; the screen belongs to the child
    #[arg(long, value_name = "PATH")]
    log_file: Option<PathBuf>,

    #[arg(long, default_value = "info")]
    log_level: LevelFilter,

    /// Extra plugins to load after the configured ones
    #[arg(short, long = "plugin", value_name = "NAME")]
    plugins: Vec<String>,

    /// Command for the primary terminal, `$SHELL` by default
    #[arg(last = true)]
    command: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let log_path = args
        .log_file
        .unwrap_or_else(|| std::env::temp_dir().join("plugmux.log"));
    let log_file = File::create(&log_path).with_context(|| format!("creating {}", log_path.display()))?;
    WriteLogger::init(args.log_level, ConfigBuilder::new().build(), log_file)?;

    let config = Arc::new(Config::load(args.config.as_deref())?);
    let command = if args.command.is_empty() {
        vec![std::env::var("SHELL").unwrap_or_else(|_| "/bin/sh".to_string())]
    } else {
        args.command
    };

    let _raw = RawTerminal::enter()?;
    let (rows, cols) = terminal::size()?;
    let screen = CrosstermScreen::new(io::stdout(), rows, cols);
    let host = Host::new(Arc::clone(&config), Box::new(plugins::builtin()), Box::new(screen));

    let names: Vec<&String> = config.core.plugins.iter().chain(&args.plugins).collect();
    host.load_plugins(&names);

    let primary = host.spawn_primary(&command)?;
    host.relayout()?;
    spawn_resize_watcher(Arc::clone(&host))?;

    let mut input = spawn_stdin_reader()?;
    let exit = host.run_terminal(primary, Some(&mut input)).await;
    host.shutdown();

    match exit? {
        LoopExit::ChildExited => log::info!("primary exited"),
        LoopExit::InputClosed => log::info!("stdin closed"),
    }
    Ok(())
}

/// Raw mode plus the alternate screen, undone on drop and on panic.
struct RawTerminal;

impl RawTerminal {
    fn enter() -> Result<Self> {
        terminal::enable_raw_mode()?;
        execute!(io::stdout(), terminal::EnterAlternateScreen)?;

        let default_hook = std::panic::take_hook();
        std::panic::set_hook(Box::new(move |info| {
            restore();
            default_hook(info);
        }));
        Ok(Self)
    }
}

impl Drop for RawTerminal {
    fn drop(&mut self) {
        restore();
    }
}

fn restore() {
    let _ = execute!(io::stdout(), cursor::Show, terminal::LeaveAlternateScreen);
    let _ = terminal::disable_raw_mode();
}

/// Stdin blocks, so it gets its own thread. Dropping the sender on end of
/// file closes the channel and ends the primary loop.
fn spawn_stdin_reader() -> Result<mpsc::UnboundedReceiver<Vec<u8>>> {
    let (tx, rx) = mpsc::unbounded_channel();
    thread::Builder::new().name("stdin".to_string()).spawn(move || {
        let mut stdin = io::stdin().lock();
        let mut buf = [0u8; 1024];
        loop {
            match stdin.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => {
                    if tx.send(buf[..n].to_vec()).is_err() {
                        break;
                    }
                }
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => {
                    log::error!("reading stdin: {err}");
                    break;
                }
            }
        }
    })?;
    Ok(rx)
}

fn spawn_resize_watcher(host: Arc<Host>) -> Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut winch = signal(SignalKind::window_change())?;
    tokio::spawn(async move {
        while winch.recv().await.is_some() {
            let (rows, cols) = match terminal::size() {
                Ok(size) => size,
                Err(err) => {
                    log::warn!("terminal size: {err}");
                    continue;
                }
            };
            let host = Arc::clone(&host);
            let resized = tokio::task::spawn_blocking(move || host.resize_screen(rows, cols)).await;
            match resized {
                Ok(Ok(())) => log::debug!("screen resized to {rows}x{cols}"),
                Ok(Err(err)) => log::warn!("resize failed: {err}"),
                Err(err) => log::error!("resize task: {err}"),
            }
        }
    });
    Ok(())
}
