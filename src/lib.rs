//! revdb - revision-addressed sessions over a Git-backed store
//!
//! Every database is a bare Git repository holding content-addressed chunks
//! and one manifest. Clients bind sessions to `<db>` (the default branch) or
//! `<db>/<rev>` (a branch, a tag, a commit hash or an ancestry expression);
//! branches are created, renamed and deleted underneath live sessions, and
//! the whole commit graph can be migrated between storage formats.
//!
//! # Example
//!
//! ```no_run
//! use revdb::config::EngineConfig;
//! use revdb::db::Engine;
//!
//! let engine = Engine::open(EngineConfig::new("./data"));
//! engine.create_database("shop").unwrap();
//!
//! let mut conn = engine.connect("shop").unwrap();
//! conn.execute("CALL REVDB_CHECKOUT('-b', 'feature')").unwrap();
//! conn.execute("SELECT ACTIVE_BRANCH()").unwrap();
//! ```

pub mod config;
pub mod db;
pub mod migrate;
pub mod session;
pub mod sql;
pub mod storage;
