//! CLI front-end: run loop, drop-folder watcher and config helpers.

pub mod config;
pub mod run;
pub mod watch;
