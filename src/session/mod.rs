//! Sessions: revision-addressed views of a database.
//!
//! Clients connect with `<db>` or `<db>/<rev>`:
//!
//! ```text
//! shop              default branch, followed across set_default_branch
//! shop/feature      a branch: reads its working set, may write
//! shop/v1.0         a tag: pinned, read-only
//! shop/a1b2c3d~2    a commit expression: pinned, read-only
//! ```
//!
//! [`SessionManager::bind`] resolves the identifier and returns a
//! [`Session`]. Sessions refresh lazily when the store's manifest moves, so
//! branch deletions, new commits and default branch changes made elsewhere
//! are seen on the next operation without reconnecting.

mod error;
mod manager;
mod revision;
#[allow(clippy::module_inception)]
mod session;

pub use error::{ErrorKind, SessionError, SessionResult};
pub use manager::{ClientIdentity, SessionManager};
pub use revision::{
    resolve, resolve_branch, resolve_default, DatabaseIdentifier, Resolution, RevisionExpr, MIN_PREFIX_LEN,
    REVISION_DELIMITER,
};
pub use session::{Binding, Session, SessionState, Target};
