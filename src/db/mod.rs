//! High-level engine API and REPL interface.
//!
//! This module provides the user-facing API: an [`Engine`] serving every
//! database under one root, statement-driven [`Connection`]s, and an
//! interactive command-line interface.

mod api;
mod connection;
mod repl;

pub use api::{DbError, DbResult, Engine};
pub use connection::Connection;
pub use repl::{render_result_set, Repl, ReplConfig};
