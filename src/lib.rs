//! Repackage-and-sign service for a template Android package.
//!
//! Each build takes a fixed template archive, unpacks it into a private
//! workspace, rewrites the application display name, packs it again and, when
//! a keystore is configured, signs the result with an external tool. Finished
//! artifacts are held for a limited time and handed out once for download.
//!
//! - **Archive** - Extraction, deterministic traversal, repacking
//! - **Patch** - The single resource substitution
//! - **Signer** - External signing tool under a timeout
//! - **Artifact store** - Download leases and expiry
//! - **Coordinator** - One build, end to end
//! - **Server** - HTTP routes over the coordinator
//!
//! # Architecture
//!
//! ```text
//! server (axum)
//!     │
//!     └── BuildCoordinator
//!             ├── archive::extract_archive ─┐
//!             ├── patch::patch_app_name     ├── spawn_blocking
//!             ├── archive::repack_workspace ┘
//!             ├── Signer ── process::Cmd (tokio::process)
//!             └── ArtifactStore ── DownloadLease
//! ```

pub mod archive;
pub mod artifact_store;
pub mod build_id;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod patch;
pub mod preflight;
pub mod process;
pub mod request;
pub mod server;
pub mod signer;

pub use build_id::{BuildId, BuildIdGenerator, MonotonicIdGenerator, SequenceIdGenerator};
pub use config::{ServiceConfig, SigningCredentials};
pub use coordinator::{BuildCoordinator, BuildReport};
pub use error::{BuildError, BuildResult, SigningError};
pub use request::{BuildRequest, BuildRequestFields};
