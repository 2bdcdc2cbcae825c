//! What plugins get to call.
//!
//! Every call is safe from any plugin-owned thread. From inside an event
//! callback only [PluginHandle::log], [PluginHandle::conf_val] and the other
//! read-only accessors may be used: callbacks can run while the runtime holds
//! the screen locks, and taking them again panics with a lock order
//! violation.

use std::sync::Arc;

use super::{ApiError, Host, PanelId, Surface, TerminalId, WinId};
use crate::keymap::Binding;
use crate::layout::{Region, Side};
use crate::mux::LoopExit;
use crate::plugin::{Callbacks, Dims, PluginId};
use crate::screen::Style;
use crate::sync::OrderedGuard;

use super::surfaces::ScreenState;

/// A plugin's handle on the runtime. Cheap to clone and send to threads.
#[derive(Clone)]
pub struct PluginHandle {
    host: Arc<Host>,
    id: PluginId,
    name: Arc<str>,
}

impl PluginHandle {
    pub(crate) fn new(host: Arc<Host>, id: PluginId, name: &str) -> Self {
        Self {
            host,
            id,
            name: name.into(),
        }
    }

    pub fn id(&self) -> PluginId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Log under the `plugin::<name>` target.
    pub fn log(&self, level: log::Level, msg: &str) {
        let target = format!("plugin::{}", self.name);
        log::log!(target: &target, level, "{msg}");
    }

    pub fn conf_val(&self, section: &str, key: &str) -> Option<String> {
        self.host.config().conf_val(section, key)
    }

    /// Bind the extension key `code`. The callback runs on the input thread
    /// with no runtime lock held.
    pub fn key_bind<F>(&self, code: u32, callback: F) -> Result<(), ApiError>
    where
        F: Fn(u32) + Send + Sync + 'static,
    {
        let binding = Binding {
            owner: self.id,
            callback: Arc::new(callback),
        };
        self.host.keymap.lock().bind(code, binding)?;
        Ok(())
    }

    pub fn key_unbind(&self, code: u32) -> Result<(), ApiError> {
        self.host.keymap.lock().unbind(code)?;
        Ok(())
    }

    pub fn callbacks(&self) -> Option<Arc<Callbacks>> {
        self.host.plugins.lock().callbacks(self.id)
    }

    /// Replace this plugin's callback table. `None` takes it out of dispatch.
    pub fn set_callbacks(&self, callbacks: Option<Callbacks>) {
        if !self.host.plugins.lock().set_callbacks(self.id, callbacks) {
            log::warn!("{} set callbacks after it was unloaded", self.name);
        }
    }

    /// Hold the screen for drawing. Drop the guard to unlock.
    pub fn lock_screen(&self) -> ScreenLock<'_> {
        ScreenLock {
            state: self.host.screen.lock(),
        }
    }

    fn win_alloc<A, F>(&self, side: Side, size: u16, on_alloc: A, on_free: F) -> Result<WinId, ApiError>
    where
        A: Fn(WinId, Region) + Send + Sync + 'static,
        F: Fn(WinId, Region) + Send + Sync + 'static,
    {
        self.host
            .alloc_window(self.id, side, size, Some(Arc::new(on_alloc)), Some(Arc::new(on_free)))
    }

    /// Claim `size` rows at the top of the screen. `on_alloc` hears about
    /// every (re)allocation, `on_free` about losing the space.
    pub fn screen_win_alloc_top<A, F>(&self, size: u16, on_alloc: A, on_free: F) -> Result<WinId, ApiError>
    where
        A: Fn(WinId, Region) + Send + Sync + 'static,
        F: Fn(WinId, Region) + Send + Sync + 'static,
    {
        self.win_alloc(Side::Top, size, on_alloc, on_free)
    }

    pub fn screen_win_alloc_bottom<A, F>(&self, size: u16, on_alloc: A, on_free: F) -> Result<WinId, ApiError>
    where
        A: Fn(WinId, Region) + Send + Sync + 'static,
        F: Fn(WinId, Region) + Send + Sync + 'static,
    {
        self.win_alloc(Side::Bottom, size, on_alloc, on_free)
    }

    pub fn screen_win_alloc_left<A, F>(&self, size: u16, on_alloc: A, on_free: F) -> Result<WinId, ApiError>
    where
        A: Fn(WinId, Region) + Send + Sync + 'static,
        F: Fn(WinId, Region) + Send + Sync + 'static,
    {
        self.win_alloc(Side::Left, size, on_alloc, on_free)
    }

    pub fn screen_win_alloc_right<A, F>(&self, size: u16, on_alloc: A, on_free: F) -> Result<WinId, ApiError>
    where
        A: Fn(WinId, Region) + Send + Sync + 'static,
        F: Fn(WinId, Region) + Send + Sync + 'static,
    {
        self.win_alloc(Side::Right, size, on_alloc, on_free)
    }

    pub fn screen_win_dealloc(&self, id: WinId) -> Result<(), ApiError> {
        self.host.dealloc_window(id)
    }

    /// An overlay of `rows x cols` at `(y, x)`, drawn above everything else.
    pub fn panel_alloc<R>(&self, rows: u16, cols: u16, y: u16, x: u16, on_resize: R) -> PanelId
    where
        R: Fn(PanelId, Dims) + Send + Sync + 'static,
    {
        self.host
            .alloc_panel(self.id, Region::new(y, x, rows, cols), Some(Arc::new(on_resize)))
    }

    pub fn panel_dealloc(&self, id: PanelId) -> Result<(), ApiError> {
        self.host.dealloc_panel(id)
    }

    /// Start `argv` on a new pty rendering into `target`.
    pub fn terminal_new(&self, target: Surface, argv: &[String]) -> Result<TerminalId, ApiError> {
        self.host.spawn_terminal(Some(self.id), Some(target), argv)
    }

    pub fn terminal_delete(&self, id: TerminalId) -> Result<(), ApiError> {
        self.host.delete_terminal(id)
    }

    /// Run the terminal's I/O loop on the calling thread until its child
    /// exits. Must not be called from inside an async runtime.
    pub fn terminal_run(&self, id: TerminalId) -> Result<LoopExit, ApiError> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        runtime.block_on(self.host.run_terminal(id, None))
    }

    pub fn terminal_input(&self, id: TerminalId, codes: &[u32]) -> Result<(), ApiError> {
        self.host.terminal_input(id, codes)
    }

    pub fn terminal_refresh(&self, id: TerminalId) -> Result<(), ApiError> {
        self.host.terminal_refresh(id)
    }

    pub fn terminal_pid(&self, id: TerminalId) -> Option<u32> {
        self.host.terminal(id)?.pid()
    }

    pub fn terminal_terminated(&self, id: TerminalId) -> Result<bool, ApiError> {
        let terminal = self.host.terminal(id).ok_or(ApiError::NotFound)?;
        Ok(terminal.is_terminated())
    }

    /// Type `codes` into the primary terminal, bypassing plugins and the
    /// keymap.
    pub fn primary_input(&self, codes: &[u32]) -> Result<(), ApiError> {
        self.host.primary_input(codes)
    }

    pub fn primary_refresh(&self) -> Result<(), ApiError> {
        self.host.primary_refresh()
    }

    /// Unload this plugin from another thread. Returns immediately.
    pub fn unload(&self) {
        self.host.request_unload(self.id);
    }
}

/// Exclusive access to the screen. Coordinates are relative to the surface
/// and drawing is clipped to it.
pub struct ScreenLock<'a> {
    state: OrderedGuard<'a, ScreenState>,
}

impl ScreenLock<'_> {
    /// `(rows, cols)` of the whole screen.
    pub fn size(&self) -> (u16, u16) {
        self.state.size()
    }

    /// `None` if the surface does not exist or has no space right now.
    pub fn region(&self, surface: Surface) -> Option<Region> {
        self.state.region(surface)
    }

    pub fn draw_text(&mut self, surface: Surface, y: u16, x: u16, text: &str, style: Style) -> Result<(), ApiError> {
        if self.state.draw_text(surface, y, x, text, style)? {
            Ok(())
        } else {
            Err(ApiError::NotFound)
        }
    }

    pub fn clear(&mut self, surface: Surface) -> Result<(), ApiError> {
        if self.state.clear_surface(surface)? {
            Ok(())
        } else {
            Err(ApiError::NotFound)
        }
    }

    pub fn refresh(&mut self) -> Result<(), ApiError> {
        self.state.refresh()?;
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use crate::host::test::host_with;
    use crate::host::{ApiError, Surface};
    use crate::layout::Region;
    use crate::plugin::loader::{PluginModule, StaticLoader};
    use crate::screen::Style;
    use parking_lot::Mutex;
    use std::sync::Arc;

    type Captured = Arc<Mutex<Option<super::PluginHandle>>>;

    fn captured_handle(name: &'static str) -> (StaticLoader, Captured) {
        let captured: Captured = Arc::default();
        let slot = Arc::clone(&captured);
        let mut loader = StaticLoader::new();
        loader.register(name, move || {
            let slot = Arc::clone(&slot);
            PluginModule::new(
                name,
                Box::new(move |handle| {
                    *slot.lock() = Some(handle);
                    Ok(())
                }),
                Box::new(|| {}),
            )
        });
        (loader, captured)
    }

    #[test]
    fn key_bind_refuses_duplicates() {
        let (loader, captured) = captured_handle("keys");
        let (host, _) = host_with(loader, 5, 5);
        host.load_plugin("keys").unwrap();
        let handle = captured.lock().clone().unwrap();

        assert_eq!(handle.key_bind('c' as u32, |_| {}), Ok(()));
        assert_eq!(handle.key_bind('c' as u32, |_| {}), Err(ApiError::AlreadyBound('c' as u32)));
        assert_eq!(handle.key_unbind('c' as u32), Ok(()));
        assert_eq!(handle.key_unbind('c' as u32), Err(ApiError::NotBound('c' as u32)));
    }

    #[test]
    fn windows_are_drawn_through_the_screen_lock() {
        let (loader, captured) = captured_handle("drawer");
        let (host, grid) = host_with(loader, 4, 10);
        host.load_plugin("drawer").unwrap();
        let handle = captured.lock().clone().unwrap();

        let allocated = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::clone(&allocated);
        let win = handle
            .screen_win_alloc_bottom(1, move |_, region| seen.lock().push(region), |_, _| {})
            .unwrap();
        assert_eq!(*allocated.lock(), vec![Region::new(3, 0, 1, 10)]);

        {
            let mut screen = handle.lock_screen();
            screen.draw_text(Surface::Window(win), 0, 0, "status line", Style::default()).unwrap();
            screen.refresh().unwrap();
        }
        assert_eq!(grid.lock().row(3), "status lin");

        handle.screen_win_dealloc(win).unwrap();
        assert_eq!(handle.screen_win_dealloc(win), Err(ApiError::NotFound));
        let mut screen = handle.lock_screen();
        assert_eq!(
            screen.draw_text(Surface::Window(win), 0, 0, "x", Style::default()),
            Err(ApiError::NotFound)
        );
    }

    #[test]
    fn panels_report_their_dims_on_resize() {
        let (loader, captured) = captured_handle("panel");
        let (host, _) = host_with(loader, 10, 10);
        host.load_plugin("panel").unwrap();
        let handle = captured.lock().clone().unwrap();

        let dims = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::clone(&dims);
        let panel = handle.panel_alloc(4, 6, 2, 2, move |_, d| seen.lock().push((d.rows, d.cols)));
        assert_eq!(handle.lock_screen().region(Surface::Panel(panel)), Some(Region::new(2, 2, 4, 6)));

        host.resize_screen(5, 5).unwrap();
        assert_eq!(*dims.lock(), vec![(3, 3)]);
        assert_eq!(handle.panel_dealloc(panel), Ok(()));
        assert_eq!(handle.panel_dealloc(panel), Err(ApiError::NotFound));
    }

    #[test]
    fn conf_val_reads_plugin_sections() {
        let (loader, captured) = captured_handle("cfg");
        let (host, _) = host_with(loader, 5, 5);
        host.load_plugin("cfg").unwrap();
        let handle = captured.lock().clone().unwrap();
        assert_eq!(handle.name(), "cfg");
        assert_eq!(handle.conf_val("cfg", "missing"), None);
    }
}
