//! Config hot-reload
//!
//! Turns filesystem notifications about the config file into a single,
//! debounced reload signal for the dispatch loop.

mod filter;
mod watcher;

pub use watcher::ConfigWatcher;
