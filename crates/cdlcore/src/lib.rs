//! Core of the CDDA game launcher.
//!
//! Keeps a local game install in sync with published builds, backs up and
//! restores saves, and installs optional content (soundpacks, mods). Every
//! long operation is a cancellable stepper driven through a
//! [`task::TaskContext`]; nothing here knows about the UI.

pub mod app;
pub mod archive;
pub mod backup;
pub mod catalog;
pub mod config;
pub mod content;
pub mod download;
pub mod error;
pub mod game;
pub mod logging;
pub mod paths;
pub mod task;
pub mod tree;
pub mod update;

pub use app::AppContext;
pub use error::{LauncherError, Result};
