/*
A terminal multiplexing runtime. One primary child runs in a pty and fills
whatever part of the screen plugins have not claimed with edge windows.

Pieces:
    term_state  vt100 grid per child, damage + scroll notices
    term_win    copies damaged cells onto the screen
    layout      carves edge windows off the screen, rest is primary
    mux         pty output / stdin loop with a refresh throttle
    host        everything above plus the plugin registry behind ordered locks
*/
pub mod color;
pub mod config;
pub mod host;
pub mod keymap;
pub mod layout;
pub mod mux;
pub mod plugin;
pub mod plugins;
pub mod pty;
pub mod rect_set;
pub mod screen;
pub mod sync;
pub mod term_state;
pub mod term_win;
mod vte_actions;

pub use config::Config;
pub use host::Host;
