//! Startup checks for the build service.
//!
//! Nothing here is fatal except being unable to create the output directory:
//! a missing template only makes builds fail (and health reports it), and a
//! missing keystore only disables signing.

use std::fs;

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::config::ServiceConfig;

/// Check if a command exists on the host system.
pub fn command_exists(cmd: &str) -> bool {
    which::which(cmd).is_ok()
}

/// What the service found on the host at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreflightReport {
    pub template_present: bool,
    pub signing_enabled: bool,
    /// The signer program resolves on `PATH`.
    pub signer_found: bool,
}

impl PreflightReport {
    /// Signing is configured but the tool to do it cannot be found.
    pub fn signer_missing(&self) -> bool {
        self.signing_enabled && !self.signer_found
    }
}

/// Inspect the host for `config`, creating the output directory.
pub fn run(config: &ServiceConfig) -> Result<PreflightReport> {
    fs::create_dir_all(&config.output_dir)
        .with_context(|| format!("creating output directory '{}'", config.output_dir.display()))?;

    let report = PreflightReport {
        template_present: config.template_archive.is_file(),
        signing_enabled: config.signing.keystore_present(),
        signer_found: command_exists(&config.signer_program),
    };

    if report.template_present {
        info!(
            op = "preflight.template",
            path = %config.template_archive.display(),
            "Template archive found"
        );
    } else {
        warn!(
            op = "preflight.template",
            path = %config.template_archive.display(),
            "Template archive missing, builds will fail until it exists"
        );
    }

    if report.signing_enabled {
        info!(
            op = "preflight.signing",
            keystore = %config.signing.keystore.display(),
            "Keystore found, signing enabled"
        );
    } else {
        info!(
            op = "preflight.signing",
            keystore = %config.signing.keystore.display(),
            "No keystore, artifacts will be unsigned"
        );
    }

    if report.signer_missing() {
        warn!(
            op = "preflight.signer",
            program = %config.signer_program,
            "Signer not found on PATH, signed builds will fail"
        );
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_command_exists() {
        assert!(command_exists("sh"));
        assert!(!command_exists("definitely_not_a_real_command_12345"));
    }

    #[test]
    fn test_run_on_empty_base_dir() {
        let temp = TempDir::new().unwrap();
        let mut config = ServiceConfig::with_base_dir(temp.path());
        config.signer_program = "definitely_not_a_real_command_12345".into();

        let report = run(&config).unwrap();

        assert!(config.output_dir.is_dir());
        assert!(!report.template_present);
        assert!(!report.signing_enabled);
        // No keystore, so a missing tool does not matter.
        assert!(!report.signer_missing());
    }

    #[test]
    fn test_run_flags_missing_signer() {
        let temp = TempDir::new().unwrap();
        let mut config = ServiceConfig::with_base_dir(temp.path());
        fs::write(&config.template_archive, b"zip").unwrap();
        fs::write(&config.signing.keystore, b"jks").unwrap();
        config.signer_program = "definitely_not_a_real_command_12345".into();

        let report = run(&config).unwrap();

        assert!(report.template_present);
        assert!(report.signing_enabled);
        assert!(!report.signer_found);
        assert!(report.signer_missing());

        config.signer_program = "sh".into();
        let report = run(&config).unwrap();
        assert!(report.signer_found);
        assert!(!report.signer_missing());
    }
}
