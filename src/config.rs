//! Service configuration.
//!
//! [`ServiceConfig`] is assembled once at startup and shared read-only for the
//! lifetime of the process. Sources, lowest precedence first:
//!
//! 1. built-in defaults
//! 2. an optional TOML file named by `REPACK_BUILDER_CONFIG`
//! 3. environment variables (a `.env` file is loaded first when present)
//!
//! ```toml
//! template_archive = "base-template.apk"
//! output_dir = "output_apks"
//! port = 3000
//! artifact_ttl_secs = 300
//!
//! [signing]
//! keystore = "keystore.jks"
//! key_alias = "mykey"
//! ```

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::Deserialize;

pub const CONFIG_PATH_ENV: &str = "REPACK_BUILDER_CONFIG";

const DEFAULT_TEMPLATE: &str = "base-template.apk";
const DEFAULT_OUTPUT_DIR: &str = "output_apks";
const DEFAULT_KEYSTORE: &str = "keystore.jks";
const DEFAULT_STORE_PASSWORD: &str = "password123";
const DEFAULT_KEY_ALIAS: &str = "mykey";
const DEFAULT_KEY_PASSWORD: &str = "password123";
const DEFAULT_PORT: u16 = 3000;
const DEFAULT_SIGNER: &str = "jarsigner";
const DEFAULT_SIGNER_TIMEOUT_SECS: u64 = 120;
const DEFAULT_ARTIFACT_TTL_SECS: u64 = 5 * 60;
const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 30;

/// Keystore location and passwords handed to the external signer.
///
/// Opaque to this crate; the values are passed through untouched.
#[derive(Clone, PartialEq, Eq)]
pub struct SigningCredentials {
    pub keystore: PathBuf,
    pub store_password: String,
    pub key_alias: String,
    pub key_password: String,
}

impl fmt::Debug for SigningCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningCredentials")
            .field("keystore", &self.keystore)
            .field("store_password", &"<redacted>")
            .field("key_alias", &self.key_alias)
            .field("key_password", &"<redacted>")
            .finish()
    }
}

impl SigningCredentials {
    /// Signing is enabled exactly when the keystore file exists.
    pub fn keystore_present(&self) -> bool {
        self.keystore.is_file()
    }
}

#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub template_archive: PathBuf,
    pub output_dir: PathBuf,
    pub signing: SigningCredentials,
    pub signer_program: String,
    pub signer_timeout: Duration,
    pub artifact_ttl: Duration,
    pub sweep_interval: Duration,
    pub port: u16,
}

impl ServiceConfig {
    /// Defaults with every relative path resolved against `base_dir`.
    pub fn with_base_dir(base_dir: &Path) -> Self {
        Self {
            template_archive: base_dir.join(DEFAULT_TEMPLATE),
            output_dir: base_dir.join(DEFAULT_OUTPUT_DIR),
            signing: SigningCredentials {
                keystore: base_dir.join(DEFAULT_KEYSTORE),
                store_password: DEFAULT_STORE_PASSWORD.to_string(),
                key_alias: DEFAULT_KEY_ALIAS.to_string(),
                key_password: DEFAULT_KEY_PASSWORD.to_string(),
            },
            signer_program: DEFAULT_SIGNER.to_string(),
            signer_timeout: Duration::from_secs(DEFAULT_SIGNER_TIMEOUT_SECS),
            artifact_ttl: Duration::from_secs(DEFAULT_ARTIFACT_TTL_SECS),
            sweep_interval: Duration::from_secs(DEFAULT_SWEEP_INTERVAL_SECS),
            port: DEFAULT_PORT,
        }
    }

    /// Load from the process environment, rooted at the current directory.
    pub fn load() -> Result<Self> {
        // A missing .env is normal.
        let _ = dotenvy::dotenv();
        let base_dir = std::env::current_dir().context("resolving current directory")?;
        Self::load_from(&base_dir, |key| std::env::var(key).ok())
    }

    /// Load with an explicit base directory and variable lookup.
    pub fn load_from<F>(base_dir: &Path, env: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::with_base_dir(base_dir);

        if let Some(path) = env(CONFIG_PATH_ENV) {
            let path = base_dir.join(path);
            let text = fs::read_to_string(&path)
                .with_context(|| format!("reading config file '{}'", path.display()))?;
            let file: FileConfig = toml::from_str(&text)
                .with_context(|| format!("parsing config file '{}'", path.display()))?;
            config.apply_file(base_dir, file);
        }

        config.apply_env(base_dir, &env)?;
        config.validate()?;
        Ok(config)
    }

    fn apply_file(&mut self, base_dir: &Path, file: FileConfig) {
        if let Some(p) = file.template_archive {
            self.template_archive = base_dir.join(p);
        }
        if let Some(p) = file.output_dir {
            self.output_dir = base_dir.join(p);
        }
        if let Some(port) = file.port {
            self.port = port;
        }
        if let Some(program) = file.signer_program {
            self.signer_program = program;
        }
        if let Some(secs) = file.signer_timeout_secs {
            self.signer_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = file.artifact_ttl_secs {
            self.artifact_ttl = Duration::from_secs(secs);
        }
        if let Some(secs) = file.sweep_interval_secs {
            self.sweep_interval = Duration::from_secs(secs);
        }
        let signing = file.signing;
        if let Some(p) = signing.keystore {
            self.signing.keystore = base_dir.join(p);
        }
        if let Some(v) = signing.store_password {
            self.signing.store_password = v;
        }
        if let Some(v) = signing.key_alias {
            self.signing.key_alias = v;
        }
        if let Some(v) = signing.key_password {
            self.signing.key_password = v;
        }
    }

    fn apply_env<F>(&mut self, base_dir: &Path, env: &F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = env("KEYSTORE_PASSWORD") {
            self.signing.store_password = v;
        }
        if let Some(v) = env("KEY_ALIAS") {
            self.signing.key_alias = v;
        }
        if let Some(v) = env("KEY_PASSWORD") {
            self.signing.key_password = v;
        }
        if let Some(v) = env("PORT") {
            self.port = v
                .trim()
                .parse()
                .with_context(|| format!("parsing PORT '{v}'"))?;
        }
        if let Some(p) = env("REPACK_BUILDER_TEMPLATE") {
            self.template_archive = base_dir.join(p);
        }
        if let Some(p) = env("REPACK_BUILDER_OUTPUT_DIR") {
            self.output_dir = base_dir.join(p);
        }
        if let Some(p) = env("REPACK_BUILDER_KEYSTORE") {
            self.signing.keystore = base_dir.join(p);
        }
        if let Some(v) = env("REPACK_BUILDER_SIGNER") {
            self.signer_program = v;
        }
        if let Some(d) = env_secs(env, "REPACK_BUILDER_SIGNER_TIMEOUT_SECS")? {
            self.signer_timeout = d;
        }
        if let Some(d) = env_secs(env, "REPACK_BUILDER_ARTIFACT_TTL_SECS")? {
            self.artifact_ttl = d;
        }
        if let Some(d) = env_secs(env, "REPACK_BUILDER_SWEEP_INTERVAL_SECS")? {
            self.sweep_interval = d;
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if self.signer_program.trim().is_empty() {
            bail!("signer program must not be empty");
        }
        if self.signer_timeout.is_zero() {
            bail!("signer timeout must be at least one second");
        }
        if self.sweep_interval.is_zero() {
            bail!("sweep interval must be at least one second");
        }
        Ok(())
    }
}

fn env_secs<F>(env: &F, key: &str) -> Result<Option<Duration>>
where
    F: Fn(&str) -> Option<String>,
{
    env(key)
        .map(|v| {
            v.trim()
                .parse::<u64>()
                .map(Duration::from_secs)
                .with_context(|| format!("parsing {key} '{v}' as seconds"))
        })
        .transpose()
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct FileConfig {
    template_archive: Option<PathBuf>,
    output_dir: Option<PathBuf>,
    port: Option<u16>,
    signer_program: Option<String>,
    signer_timeout_secs: Option<u64>,
    artifact_ttl_secs: Option<u64>,
    sweep_interval_secs: Option<u64>,
    signing: FileSigning,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct FileSigning {
    keystore: Option<PathBuf>,
    store_password: Option<String>,
    key_alias: Option<String>,
    key_password: Option<String>,
}
