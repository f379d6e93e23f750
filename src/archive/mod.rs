//! Archive handling for template packages.
//!
//! - [`extract`] - Unpack a template archive into a fresh workspace
//! - [`walk`] - Deterministic workspace traversal
//! - [`repack`] - Rebuild an archive from a workspace
//!
//! Everything here is blocking I/O; async callers run it on the blocking pool.

pub mod extract;
pub mod repack;
pub mod walk;

pub use extract::extract_archive;
pub use repack::repack_workspace;
pub use walk::{WalkEntry, WorkspaceWalk};
