//! A one-line status bar along the bottom of the screen.
//!
//! Config (`[status]`): `text` is shown after the name, `interval_ms` sets
//! how often the bar is redrawn and `key` is an extension key that hides and
//! shows it.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::color;
use crate::config::parse_key;
use crate::host::api::PluginHandle;
use crate::host::{Surface, WinId};
use crate::plugin::loader::PluginModule;
use crate::screen::Style;

pub const NAME: &str = "status";

const DEFAULT_INTERVAL: Duration = Duration::from_secs(1);

type Redraw = Arc<dyn Fn() + Send + Sync>;

#[derive(Default)]
struct Shared {
    window: Mutex<Option<WinId>>,
    hidden: AtomicBool,
    ticker: Mutex<Option<(mpsc::Sender<()>, JoinHandle<()>)>>,
}

pub fn module() -> PluginModule {
    let shared = Arc::new(Shared::default());
    let on_free = Arc::clone(&shared);
    PluginModule::new(
        NAME,
        Box::new(move |handle| init(handle, shared)),
        Box::new(move || free(&on_free)),
    )
}

fn init(handle: PluginHandle, shared: Arc<Shared>) -> anyhow::Result<()> {
    let started = Instant::now();
    let text = handle.conf_val(NAME, "text").unwrap_or_default();
    let interval = handle
        .conf_val(NAME, "interval_ms")
        .and_then(|ms| ms.parse().ok())
        .map_or(DEFAULT_INTERVAL, Duration::from_millis);

    let draw: Redraw = {
        let handle = handle.clone();
        let shared = Arc::clone(&shared);
        Arc::new(move || {
            let Some(win) = *shared.window.lock() else {
                return;
            };
            let line = format!(" {NAME} | up {}s {text}", started.elapsed().as_secs());
            if let Err(err) = draw_line(&handle, win, &line) {
                handle.log(log::Level::Debug, &format!("draw failed: {err}"));
            }
        })
    };

    show(&handle, &shared, Arc::clone(&draw))?;

    if let Some(key) = handle.conf_val(NAME, "key") {
        let code = parse_key(&key)?;
        let toggle_handle = handle.clone();
        let toggle_shared = Arc::clone(&shared);
        let toggle_draw: Redraw = Arc::clone(&draw);
        handle.key_bind(code, move |_| {
            let result = if toggle_shared.hidden.fetch_xor(true, Ordering::SeqCst) {
                show(&toggle_handle, &toggle_shared, Arc::clone(&toggle_draw))
            } else {
                hide(&toggle_handle, &toggle_shared)
            };
            if let Err(err) = result {
                toggle_handle.log(log::Level::Warn, &format!("toggle failed: {err}"));
            }
        })?;
    }

    let (stop, ticks) = mpsc::channel();
    let ticker = thread::Builder::new()
        .name(format!("plugin-{NAME}"))
        .spawn(move || loop {
            match ticks.recv_timeout(interval) {
                Err(RecvTimeoutError::Timeout) => draw(),
                Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
            }
        })?;
    *shared.ticker.lock() = Some((stop, ticker));

    handle.log(log::Level::Info, "started");
    Ok(())
}

fn show(handle: &PluginHandle, shared: &Shared, draw: Redraw) -> anyhow::Result<()> {
    let on_alloc = Arc::clone(&draw);
    let win = handle.screen_win_alloc_bottom(
        1,
        move |_, _| on_alloc(),
        |id, _| log::debug!("status window {id:?} lost its space"),
    )?;
    *shared.window.lock() = Some(win);
    draw();
    Ok(())
}

fn hide(handle: &PluginHandle, shared: &Shared) -> anyhow::Result<()> {
    let win = shared.window.lock().take();
    if let Some(win) = win {
        handle.screen_win_dealloc(win)?;
    }
    Ok(())
}

fn draw_line(handle: &PluginHandle, win: WinId, line: &str) -> anyhow::Result<()> {
    let surface = Surface::Window(win);
    let style = Style {
        bold: true,
        ..Style::with_pair(color::pair_index(0, 6))
    };
    let mut screen = handle.lock_screen();
    let Some(region) = screen.region(surface) else {
        return Ok(());
    };
    let padded = format!("{line:<width$}", width = usize::from(region.cols));
    screen.draw_text(surface, 0, 0, &padded, style)?;
    screen.refresh()?;
    Ok(())
}

fn free(shared: &Shared) {
    if let Some((stop, ticker)) = shared.ticker.lock().take() {
        drop(stop);
        if ticker.join().is_err() {
            log::error!("status ticker panicked");
        }
    }
}

#[cfg(test)]
mod test {
    use super::{module, NAME};
    use crate::host::test::host_with;
    use crate::plugin::loader::StaticLoader;

    #[test]
    fn claims_the_bottom_row_and_stops_on_unload() {
        let mut loader = StaticLoader::new();
        loader.register(NAME, module);
        let (host, grid) = host_with(loader, 5, 30);
        let id = host.load_plugin(NAME).unwrap();

        // One row for the bar, the rest for the primary terminal.
        assert_eq!(host.relayout(), Ok(()));
        assert!(grid.lock().row(4).starts_with(" status | up 0s"));

        host.unload_plugin(id);
        assert!(host.plugin_ids().is_empty());
    }
}
