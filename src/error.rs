//! Error taxonomy for the repackage-and-sign pipeline.
//!
//! Every failure a build can produce maps onto one [`BuildError`] variant.
//! The HTTP layer turns variants into status codes; nothing here knows about
//! transport.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::build_id::BuildId;

pub type BuildResult<T> = std::result::Result<T, BuildError>;

#[derive(Debug, Error)]
pub enum BuildError {
    /// A required request field is absent or empty. No side effects were performed.
    #[error("missing required field(s): {}", .0.join(", "))]
    Validation(Vec<&'static str>),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("extraction failed: {0}")]
    Extraction(String),

    #[error("repack failed: {0}")]
    Repack(String),

    /// Signing failed. The unsigned artifact for `build_id` is still registered.
    #[error("signing failed for build {build_id}: {source}")]
    Signing {
        build_id: BuildId,
        #[source]
        source: SigningError,
    },

    #[error("internal error: {0}")]
    Internal(String),
}

impl BuildError {
    pub(crate) fn extraction(path: impl Into<PathBuf>, err: impl std::fmt::Display) -> Self {
        BuildError::Extraction(format!("{}: {err}", path.into().display()))
    }

    pub(crate) fn repack(path: impl Into<PathBuf>, err: impl std::fmt::Display) -> Self {
        BuildError::Repack(format!("{}: {err}", path.into().display()))
    }
}

/// Failure modes of one external signer invocation.
#[derive(Debug, Error)]
pub enum SigningError {
    /// The tool exited nonzero. `diagnostic` is its output, verbatim.
    #[error("{program} exited with {status}: {diagnostic}")]
    ToolFailed {
        program: String,
        status: String,
        diagnostic: String,
    },

    /// The tool reported success but left no signed file behind.
    #[error("{program} exited successfully but produced no output at {}: {diagnostic}", .output.display())]
    MissingOutput {
        program: String,
        output: PathBuf,
        diagnostic: String,
    },

    #[error("failed to start {program}: {reason}")]
    Spawn { program: String, reason: String },

    #[error("{program} did not finish within {}s", .limit.as_secs())]
    Timeout { program: String, limit: Duration },
}

impl SigningError {
    /// The text the tool printed, when there is any.
    pub fn diagnostic(&self) -> Option<&str> {
        match self {
            SigningError::ToolFailed { diagnostic, .. }
            | SigningError::MissingOutput { diagnostic, .. } => Some(diagnostic),
            SigningError::Spawn { .. } | SigningError::Timeout { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_lists_every_missing_field() {
        let err = BuildError::Validation(vec!["appName", "remotePort"]);
        assert_eq!(
            err.to_string(),
            "missing required field(s): appName, remotePort"
        );
    }

    #[test]
    fn test_signing_error_keeps_tool_output_verbatim() {
        let err = BuildError::Signing {
            build_id: BuildId::from_raw("abc"),
            source: SigningError::ToolFailed {
                program: "jarsigner".into(),
                status: "exit status: 1".into(),
                diagnostic: "jarsigner error: keystore was tampered with".into(),
            },
        };
        let msg = err.to_string();
        assert!(msg.contains("build abc"));
        assert!(msg.contains("jarsigner error: keystore was tampered with"));
    }

    #[test]
    fn test_timeout_has_no_diagnostic() {
        let err = SigningError::Timeout {
            program: "jarsigner".into(),
            limit: Duration::from_secs(5),
        };
        assert!(err.diagnostic().is_none());
        assert_eq!(err.to_string(), "jarsigner did not finish within 5s");
    }
}
