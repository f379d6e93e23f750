//! Conditional signing through an external tool.
//!
//! Signing is decided per build by one question: does the configured keystore
//! exist? If not, the build ships unsigned. If it does, the signer program is
//! run exactly once with the credentials and its verdict is final.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use crate::config::{ServiceConfig, SigningCredentials};
use crate::error::SigningError;
use crate::process::{Cmd, CmdError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignOutcome {
    Signed(PathBuf),
    /// No keystore configured; the unsigned artifact is the result.
    Skipped,
}

impl SignOutcome {
    pub fn is_signed(&self) -> bool {
        matches!(self, SignOutcome::Signed(_))
    }
}

#[derive(Debug, Clone)]
pub struct Signer {
    credentials: Arc<SigningCredentials>,
    program: String,
    timeout: Duration,
}

impl Signer {
    pub fn new(credentials: Arc<SigningCredentials>, program: impl Into<String>, timeout: Duration) -> Self {
        Self {
            credentials,
            program: program.into(),
            timeout,
        }
    }

    pub fn from_config(config: &ServiceConfig) -> Self {
        Self::new(
            Arc::new(config.signing.clone()),
            config.signer_program.clone(),
            config.signer_timeout,
        )
    }

    pub fn enabled(&self) -> bool {
        self.credentials.keystore_present()
    }

    /// Sign `unsigned` into `signed`, or skip when no keystore is present.
    pub async fn sign(&self, unsigned: &Path, signed: &Path) -> Result<SignOutcome, SigningError> {
        if !self.enabled() {
            info!(
                op = "sign.skipped",
                keystore = %self.credentials.keystore.display(),
                "No keystore found, leaving artifact unsigned"
            );
            return Ok(SignOutcome::Skipped);
        }

        let output = self
            .command(unsigned, signed)
            .run()
            .await
            .map_err(|e| match e {
                CmdError::TimedOut(limit) => SigningError::Timeout {
                    program: self.program.clone(),
                    limit,
                },
                CmdError::Spawn(err) => SigningError::Spawn {
                    program: self.program.clone(),
                    reason: err.to_string(),
                },
            })?;

        if !output.success() {
            warn!(
                op = "sign.failed",
                program = %self.program,
                status = %output.status,
                "Signer exited with failure"
            );
            return Err(SigningError::ToolFailed {
                program: self.program.clone(),
                status: output.status.to_string(),
                diagnostic: output.diagnostic().to_string(),
            });
        }

        if !signed.is_file() {
            return Err(SigningError::MissingOutput {
                program: self.program.clone(),
                output: signed.to_path_buf(),
                diagnostic: output.diagnostic().to_string(),
            });
        }

        info!(op = "sign.ok", output = %signed.display(), "Artifact signed");
        Ok(SignOutcome::Signed(signed.to_path_buf()))
    }

    fn command(&self, unsigned: &Path, signed: &Path) -> Cmd {
        let creds = &self.credentials;
        Cmd::new(&self.program)
            .arg("-verbose")
            .arg("-keystore")
            .arg_path(&creds.keystore)
            .args(["-storepass", creds.store_password.as_str()])
            .args(["-keypass", creds.key_password.as_str()])
            .arg("-signedjar")
            .arg_path(signed)
            .arg_path(unsigned)
            .arg(creds.key_alias.as_str())
            .timeout(self.timeout)
    }
}
