//! The runtime context every plugin call goes through.
//!
//! [Host] owns the shared structures, each behind an [OrderedMutex] so that
//! plugin threads and the primary loop always lock them in the same order:
//! terminals, keymap, plugins, one terminal's state, screen, pty.

pub mod api;
pub mod driver;
mod surfaces;

pub use surfaces::{PanelCallback, PanelId, Surface, WinCallback, WinId};

use std::collections::HashMap;
use std::io::{self, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Weak};
use std::thread;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::mpsc::UnboundedReceiver;

use self::api::PluginHandle;
use self::driver::TerminalDriver;
use self::surfaces::{Notice, ScreenState};
use crate::config::Config;
use crate::keymap::{Binding, Keymap, KeymapError};
use crate::layout::{Region, Side};
use crate::mux::{self, LoopExit, REFRESH_THRESHOLD};
use crate::plugin::loader::{self, LoadError, PluginLoader};
use crate::plugin::registry::Registry;
use crate::plugin::{Chain, Dims, Event, PluginId};
use crate::pty::{self, OutputRx, PtyHandles, Spawned};
use crate::screen::Screen;
use crate::sync::{LockLevel, OrderedMutex};
use crate::term_state::TermState;

/// Size used for a terminal whose target has no space yet.
const FALLBACK_SIZE: (u16, u16) = (24, 80);

const PENDING_RETRY: Duration = Duration::from_millis(20);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TerminalId(pub u32);

/// Recoverable failures reported back to API callers.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ApiError {
    #[error("key {0:#x} is already bound")]
    AlreadyBound(u32),
    #[error("key {0:#x} is not bound")]
    NotBound(u32),
    /// No window, panel, terminal or plugin with that handle.
    #[error("no such handle")]
    NotFound,
    /// An edge window that does not fit on the screen.
    #[error("window does not fit on the screen")]
    NoRoom,
    /// The terminal's loop is running.
    #[error("terminal is running")]
    Busy,
    #[error("there is no primary terminal")]
    NoPrimary,
    #[error("spawn failed: {0}")]
    Spawn(String),
    #[error("i/o failed: {0}")]
    Io(String),
}

impl From<KeymapError> for ApiError {
    fn from(err: KeymapError) -> Self {
        match err {
            KeymapError::AlreadyBound(code) => ApiError::AlreadyBound(code),
            KeymapError::NotBound(code) => ApiError::NotBound(code),
        }
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(err: anyhow::Error) -> Self {
        ApiError::Io(format!("{err:#}"))
    }
}

impl From<io::Error> for ApiError {
    fn from(err: io::Error) -> Self {
        ApiError::Io(err.to_string())
    }
}

/// A child process and the terminal state its output feeds.
pub struct Terminal {
    id: TerminalId,
    pid: Option<u32>,
    owner: Option<PluginId>,
    state: OrderedMutex<TermState>,
    pty: OrderedMutex<PtyHandles>,
    /// Taken by the loop while it runs.
    output: OrderedMutex<Option<OutputRx>>,
    terminated: AtomicBool,
}

impl Terminal {
    fn new(id: TerminalId, owner: Option<PluginId>, size: (u16, u16), spawned: Spawned) -> Self {
        Self {
            id,
            pid: spawned.pid,
            owner,
            state: OrderedMutex::new(LockLevel::TermState, TermState::new(size.0, size.1)),
            pty: OrderedMutex::new(LockLevel::Pty, spawned.handles),
            output: OrderedMutex::new(LockLevel::Pty, Some(spawned.output)),
            terminated: AtomicBool::new(false),
        }
    }

    pub fn id(&self) -> TerminalId {
        self.id
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated.load(Ordering::SeqCst)
    }

    /// Send bytes to the child.
    pub fn write(&self, bytes: &[u8]) -> io::Result<()> {
        let mut pty = self.pty.lock();
        pty.writer.write_all(bytes)?;
        pty.writer.flush()
    }

    fn resize_pty(&self, rows: u16, cols: u16) {
        if let Err(err) = self.pty.lock().control.resize(rows, cols) {
            log::warn!("resizing pty of terminal {:?} failed: {err:#}", self.id);
        }
    }

    fn kill(&self) {
        if let Err(err) = self.pty.lock().control.kill() {
            log::debug!("killing terminal {:?}: {err:#}", self.id);
        }
    }
}

#[derive(Default)]
struct Children {
    terminals: HashMap<TerminalId, Arc<Terminal>>,
    by_pid: HashMap<u32, TerminalId>,
    primary: Option<TerminalId>,
    next_id: u32,
}

impl Children {
    fn insert(&mut self, terminal: Arc<Terminal>) {
        if let Some(pid) = terminal.pid {
            if let Some(stale) = self.by_pid.insert(pid, terminal.id) {
                log::warn!("pid {pid} reused: terminal {stale:?} replaced by {:?}", terminal.id);
            }
        }
        self.terminals.insert(terminal.id, terminal);
    }

    fn remove(&mut self, id: TerminalId) -> Option<Arc<Terminal>> {
        let terminal = self.terminals.remove(&id)?;
        if let Some(pid) = terminal.pid {
            if self.by_pid.get(&pid) == Some(&id) {
                self.by_pid.remove(&pid);
            }
        }
        if self.primary == Some(id) {
            self.primary = None;
        }
        Some(terminal)
    }

    fn sorted(&self) -> Vec<Arc<Terminal>> {
        let mut terminals: Vec<Arc<Terminal>> = self.terminals.values().cloned().collect();
        terminals.sort_by_key(|terminal| terminal.id);
        terminals
    }
}

pub struct Host {
    config: Arc<Config>,
    loader: Box<dyn PluginLoader>,
    command_key: u32,
    children: OrderedMutex<Children>,
    keymap: OrderedMutex<Keymap>,
    plugins: OrderedMutex<Registry>,
    screen: OrderedMutex<ScreenState>,
    unload_tx: mpsc::Sender<PluginId>,
}

impl Host {
    pub fn new(config: Arc<Config>, loader: Box<dyn PluginLoader>, screen: Box<dyn Screen>) -> Arc<Self> {
        let (unload_tx, unload_rx) = mpsc::channel();
        let host = Arc::new(Self {
            command_key: config.command_key(),
            screen: OrderedMutex::new(LockLevel::Screen, ScreenState::new(screen, config.core.color)),
            config,
            loader,
            children: OrderedMutex::new(LockLevel::Children, Children::default()),
            keymap: OrderedMutex::new(LockLevel::Keymap, Keymap::new()),
            plugins: OrderedMutex::new(LockLevel::Plugins, Registry::new()),
            unload_tx,
        });

        let weak = Arc::downgrade(&host);
        let spawned = thread::Builder::new()
            .name("plugin-unload".into())
            .spawn(move || unload_supervisor(weak, unload_rx));
        if let Err(err) = spawned {
            log::error!("could not start the unload supervisor: {err}");
        }
        host
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn command_key(&self) -> u32 {
        self.command_key
    }

    /// The active plugins' callbacks. Callers must not hold the screen or any
    /// terminal lock.
    pub fn chain(&self) -> Chain {
        self.plugins.lock().snapshot()
    }

    pub fn plugin_ids(&self) -> Vec<PluginId> {
        self.plugins.lock().ids()
    }

    pub fn plugin_name(&self, id: PluginId) -> Option<String> {
        self.plugins.lock().name(id).map(str::to_owned)
    }

    fn binding(&self, code: u32) -> Option<Binding> {
        self.keymap.lock().get(code).cloned()
    }

    /// Load every named plugin in order. Failures are logged and skipped.
    pub fn load_plugins<S: AsRef<str>>(self: &Arc<Self>, names: &[S]) -> Vec<PluginId> {
        names
            .iter()
            .filter_map(|name| match self.load_plugin(name.as_ref()) {
                Ok(id) => Some(id),
                Err(err) => {
                    log::error!("{err}");
                    None
                }
            })
            .collect()
    }

    pub fn load_plugin(self: &Arc<Self>, name: &str) -> Result<PluginId, LoadError> {
        let module = self.loader.load(name)?;
        let verified = loader::verify(name, module)?;

        let id = self.plugins.lock().begin(&verified.name);
        let handle = PluginHandle::new(Arc::clone(self), id, &verified.name);
        match (verified.init)(handle) {
            Ok(()) => {
                self.plugins.lock().activate(id, verified.free);
                log::info!("loaded plugin {name:?} as {id}");
                Ok(id)
            }
            Err(source) => {
                self.plugins.lock().discard(id);
                self.release_owned(id);
                Err(LoadError::Init {
                    name: name.to_owned(),
                    source,
                })
            }
        }
    }

    /// Ask the supervisor thread to unload `id`. Returns immediately.
    pub fn request_unload(&self, id: PluginId) {
        if self.unload_tx.send(id).is_err() {
            log::error!("unload supervisor is gone, cannot unload {id}");
        }
    }

    /// Run the plugin's free, drop it from the stack and release whatever it
    /// still holds. Must be called without any lock held.
    pub fn unload_plugin(&self, id: PluginId) -> Unload {
        let (free, name) = {
            let mut plugins = self.plugins.lock();
            if !plugins.is_active(id) {
                return if plugins.contains(id) {
                    Unload::Pending
                } else {
                    Unload::NotLoaded
                };
            }
            (plugins.take_free(id), plugins.name(id).unwrap_or_default().to_owned())
        };
        if let Some(free) = free {
            free();
        }
        self.plugins.lock().remove(id);
        self.release_owned(id);
        log::info!("unloaded plugin {name:?} ({id})");
        Unload::Done
    }

    /// Unload every plugin, newest first, then kill the remaining children.
    pub fn shutdown(&self) {
        for id in self.plugin_ids().into_iter().rev() {
            self.unload_plugin(id);
        }
        let terminals = std::mem::take(&mut *self.children.lock());
        for terminal in terminals.sorted() {
            terminal.kill();
        }
    }

    fn release_owned(&self, owner: PluginId) {
        let keys = self.keymap.lock().release_owner(owner);
        if !keys.is_empty() {
            log::debug!("released keys {keys:?} of {owner}");
        }

        let owned: Vec<TerminalId> = self
            .children
            .lock()
            .sorted()
            .into_iter()
            .filter(|terminal| terminal.owner == Some(owner))
            .map(|terminal| terminal.id)
            .collect();
        for id in owned {
            if let Err(err) = self.delete_terminal(id) {
                log::warn!("terminal {id:?} of {owner} left behind: {err}");
            }
        }

        let (windows, panels) = {
            let screen = self.screen.lock();
            (screen.windows_owned_by(owner), screen.panels_owned_by(owner))
        };
        for id in panels {
            let _ = self.dealloc_panel(id);
        }
        if !windows.is_empty() {
            let mut notices = Vec::new();
            {
                let mut screen = self.screen.lock();
                for id in windows {
                    notices.extend(screen.dealloc_window(id).flatten());
                }
            }
            notices.into_iter().for_each(Notice::fire);
            if let Err(err) = self.relayout() {
                log::error!("relayout after unloading {owner} failed: {err}");
            }
        }
    }

    pub fn alloc_window(
        &self,
        owner: PluginId,
        side: Side,
        size: u16,
        on_alloc: Option<WinCallback>,
        on_free: Option<WinCallback>,
    ) -> Result<WinId, ApiError> {
        let id = self
            .screen
            .lock()
            .alloc_window(owner, side, size, on_alloc, on_free);
        self.relayout()?;

        let fits = self.screen.lock().region(Surface::Window(id)).is_some();
        if !fits {
            self.screen.lock().dealloc_window(id);
            self.relayout()?;
            return Err(ApiError::NoRoom);
        }
        Ok(id)
    }

    pub fn dealloc_window(&self, id: WinId) -> Result<(), ApiError> {
        let notice = self.screen.lock().dealloc_window(id).ok_or(ApiError::NotFound)?;
        if let Some(notice) = notice {
            notice.fire();
        }
        self.relayout()
    }

    pub fn alloc_panel(&self, owner: PluginId, wanted: Region, on_resize: Option<PanelCallback>) -> PanelId {
        self.screen.lock().alloc_panel(owner, wanted, on_resize)
    }

    pub fn dealloc_panel(&self, id: PanelId) -> Result<(), ApiError> {
        if !self.screen.lock().dealloc_panel(id)? {
            return Err(ApiError::NotFound);
        }
        let terminals = self.children.lock().sorted();
        for terminal in &terminals {
            self.sync_terminal(terminal, false)?;
        }
        Ok(())
    }

    /// The screen changed size.
    pub fn resize_screen(&self, rows: u16, cols: u16) -> Result<(), ApiError> {
        self.screen.lock().set_size(rows, cols);
        self.relayout()?;
        self.chain()
            .dispatch(Event::ScreenDimsChange(Dims { rows, cols }));
        Ok(())
    }

    /// Re-apply the layout, tell windows and panels, resize terminals whose
    /// region changed and repaint everything.
    pub fn relayout(&self) -> Result<(), ApiError> {
        let (before, notices) = {
            let mut screen = self.screen.lock();
            let before = screen.primary_region();
            (before, screen.relayout()?)
        };
        notices.into_iter().for_each(Notice::fire);

        let terminals = self.children.lock().sorted();
        for terminal in &terminals {
            self.sync_terminal(terminal, true)?;
        }
        self.screen.lock().refresh()?;

        let after = self.screen.lock().primary_region();
        if (before.rows, before.cols) != (after.rows, after.cols) {
            self.chain().dispatch(Event::PrimaryDimsChange(Dims {
                rows: after.rows,
                cols: after.cols,
            }));
        }
        Ok(())
    }

    /// Draw a terminal's pending changes and flush the screen.
    fn sync_terminal(&self, terminal: &Terminal, full: bool) -> Result<(), ApiError> {
        let primary = self.children.lock().primary == Some(terminal.id);
        let chain = if primary { self.chain() } else { Chain::empty() };

        let mut state = terminal.state.lock();
        let mut screen = self.screen.lock();
        if let Some((rows, cols)) = screen.sync_terminal(terminal.id, &mut state, &chain, full)? {
            terminal.resize_pty(rows, cols);
        }
        screen.refresh()?;
        Ok(())
    }

    pub fn terminal(&self, id: TerminalId) -> Option<Arc<Terminal>> {
        self.children.lock().terminals.get(&id).cloned()
    }

    pub fn primary(&self) -> Option<Arc<Terminal>> {
        let children = self.children.lock();
        children
            .primary
            .and_then(|id| children.terminals.get(&id).cloned())
    }

    /// Start `argv` as the primary terminal, filling the primary region.
    pub fn spawn_primary(&self, argv: &[String]) -> Result<TerminalId, ApiError> {
        self.spawn_terminal(None, None, argv)
    }

    /// Start `argv` rendering into `target`, or the primary region for `None`.
    pub fn spawn_terminal(
        &self,
        owner: Option<PluginId>,
        target: Option<Surface>,
        argv: &[String],
    ) -> Result<TerminalId, ApiError> {
        let size = self.target_size(target)?;
        let spawned = pty::spawn(argv, size.0, size.1, &self.config.core.term)
            .map_err(|err| ApiError::Spawn(format!("{err:#}")))?;
        self.attach_terminal(owner, target, spawned)
    }

    fn target_size(&self, target: Option<Surface>) -> Result<(u16, u16), ApiError> {
        let screen = self.screen.lock();
        if let Some(surface) = target {
            if !screen.exists(surface) {
                return Err(ApiError::NotFound);
            }
        }
        Ok(screen.target_size(target).unwrap_or(FALLBACK_SIZE))
    }

    /// Register an already spawned child. A terminal without a target
    /// becomes the primary.
    pub fn attach_terminal(
        &self,
        owner: Option<PluginId>,
        target: Option<Surface>,
        spawned: Spawned,
    ) -> Result<TerminalId, ApiError> {
        let size = self.target_size(target)?;
        let primary = target.is_none();

        let id = {
            let mut children = self.children.lock();
            if primary && children.primary.is_some() {
                return Err(ApiError::Busy);
            }
            children.next_id += 1;
            let id = TerminalId(children.next_id);
            children.insert(Arc::new(Terminal::new(id, owner, size, spawned)));
            if primary {
                children.primary = Some(id);
            }
            id
        };
        self.screen.lock().attach(id, target, primary);
        Ok(id)
    }

    pub fn delete_terminal(&self, id: TerminalId) -> Result<(), ApiError> {
        let terminal = {
            let mut children = self.children.lock();
            let terminal = children.terminals.get(&id).ok_or(ApiError::NotFound)?;
            if terminal.output.lock().is_none() && !terminal.is_terminated() {
                return Err(ApiError::Busy);
            }
            children.remove(id).ok_or(ApiError::NotFound)?
        };
        self.screen.lock().detach(id);
        terminal.kill();
        Ok(())
    }

    /// Run a terminal's loop until its child exits or `input` closes.
    pub async fn run_terminal(
        self: &Arc<Self>,
        id: TerminalId,
        input: Option<&mut UnboundedReceiver<Vec<u8>>>,
    ) -> Result<LoopExit, ApiError> {
        let (terminal, mut output, primary) = {
            let children = self.children.lock();
            let terminal = children.terminals.get(&id).cloned().ok_or(ApiError::NotFound)?;
            let output = terminal.output.lock().take().ok_or(ApiError::Busy)?;
            (terminal, output, children.primary == Some(id))
        };

        let mut driver = TerminalDriver::new(Arc::clone(self), Arc::clone(&terminal), primary);
        let result = mux::run(&mut output, input, &mut driver, REFRESH_THRESHOLD).await;
        match result {
            Ok(LoopExit::ChildExited) => {
                terminal.terminated.store(true, Ordering::SeqCst);
                log::info!("terminal {id:?} exited");
            }
            Ok(LoopExit::InputClosed) | Err(_) => *terminal.output.lock() = Some(output),
        }
        Ok(result?)
    }

    pub fn terminal_input(&self, id: TerminalId, codes: &[u32]) -> Result<(), ApiError> {
        let terminal = self.terminal(id).ok_or(ApiError::NotFound)?;
        terminal.write(&encode_codes(codes))?;
        Ok(())
    }

    pub fn terminal_refresh(&self, id: TerminalId) -> Result<(), ApiError> {
        let terminal = self.terminal(id).ok_or(ApiError::NotFound)?;
        self.sync_terminal(&terminal, false)
    }

    pub fn primary_input(&self, codes: &[u32]) -> Result<(), ApiError> {
        let terminal = self.primary().ok_or(ApiError::NoPrimary)?;
        terminal.write(&encode_codes(codes))?;
        Ok(())
    }

    pub fn primary_refresh(&self) -> Result<(), ApiError> {
        let terminal = self.primary().ok_or(ApiError::NoPrimary)?;
        self.sync_terminal(&terminal, false)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Unload {
    Done,
    /// Still inside its init; try again later.
    Pending,
    NotLoaded,
}

/// Owns plugin teardown requested through [Host::request_unload]. A plugin
/// asking from its own thread during init is retried until it is active.
fn unload_supervisor(host: Weak<Host>, requests: mpsc::Receiver<PluginId>) {
    let mut waiting: Vec<PluginId> = Vec::new();
    loop {
        let received = if waiting.is_empty() {
            requests.recv().map_err(|_| RecvTimeoutError::Disconnected)
        } else {
            requests.recv_timeout(PENDING_RETRY)
        };
        match received {
            Ok(id) => waiting.push(id),
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }

        let Some(host) = host.upgrade() else {
            break;
        };
        waiting.retain(|id| match host.unload_plugin(*id) {
            Unload::Pending => true,
            Unload::Done => false,
            Unload::NotLoaded => {
                log::warn!("unload of {id} requested but it is not loaded");
                false
            }
        });
    }
}

/// Key codes as the bytes a child expects: UTF-8, with codes that are not
/// characters passed through as single bytes.
pub fn encode_codes(codes: &[u32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(codes.len());
    let mut buf = [0u8; 4];
    for &code in codes {
        match char::from_u32(code) {
            Some(c) => bytes.extend_from_slice(c.encode_utf8(&mut buf).as_bytes()),
            None => match u8::try_from(code) {
                Ok(byte) => bytes.push(byte),
                Err(_) => log::debug!("dropping key code {code:#x}"),
            },
        }
    }
    bytes
}
