//! Hotkey registry and dispatch
//!
//! Translates bindings into OS hotkeys, keeps the active set, and runs the
//! single-threaded loop that reacts to key presses and reload requests.

mod dispatch;
mod keys;
mod registry;
#[cfg(windows)]
mod win32;

pub use dispatch::{Dispatcher, Signal};
#[cfg(windows)]
pub use win32::MessageWindow;
