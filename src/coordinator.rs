//! One build, end to end.
//!
//! validate → id → extract → patch → repack → sign → register.
//!
//! Extract, patch and repack are blocking file work and run together on the
//! blocking pool inside a workspace guard; signing is an async child process.
//! A build is never resumed: any failure before signing leaves nothing behind,
//! and a signing failure leaves only the registered unsigned artifact.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{info, warn};

use crate::archive::{self, repack::discard_partial};
use crate::artifact_store::{sha256_file, Artifact, ArtifactStore};
use crate::build_id::{BuildId, BuildIdGenerator, MonotonicIdGenerator};
use crate::config::ServiceConfig;
use crate::error::{BuildError, BuildResult};
use crate::patch::{patch_app_name, PatchOutcome};
use crate::request::{BuildRequest, BuildRequestFields};
use crate::signer::{SignOutcome, Signer};

/// What a successful build hands back to the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildReport {
    pub build_id: BuildId,
    pub signed: bool,
    /// SHA-256 of the file that will be served for download.
    pub sha256: String,
    pub size_bytes: u64,
}

impl BuildReport {
    pub fn download_url(&self) -> String {
        format!("/download/{}", self.build_id)
    }
}

/// Every path one build may touch, all derived from its id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildPaths {
    pub workspace: PathBuf,
    pub unsigned: PathBuf,
    pub signed: PathBuf,
}

impl BuildPaths {
    pub fn for_build(output_dir: &Path, id: &BuildId) -> Self {
        Self {
            workspace: output_dir.join(format!("work_{id}")),
            unsigned: output_dir.join(format!("unsigned_{id}.apk")),
            signed: output_dir.join(format!("signed_{id}.apk")),
        }
    }
}

/// Removes the workspace directory when dropped.
struct Workspace(PathBuf);

impl Drop for Workspace {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_dir_all(&self.0) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(
                    op = "build.cleanup_failed",
                    path = %self.0.display(),
                    error = %e,
                    "Failed to remove workspace"
                );
            }
        }
    }
}

pub struct BuildCoordinator {
    config: Arc<ServiceConfig>,
    ids: Arc<dyn BuildIdGenerator>,
    signer: Signer,
    store: Arc<ArtifactStore>,
}

impl BuildCoordinator {
    pub fn new(
        config: Arc<ServiceConfig>,
        ids: Arc<dyn BuildIdGenerator>,
        signer: Signer,
        store: Arc<ArtifactStore>,
    ) -> Self {
        Self {
            config,
            ids,
            signer,
            store,
        }
    }

    /// Production wiring: time-based ids, signer and store from `config`.
    pub fn from_config(config: Arc<ServiceConfig>) -> Self {
        let signer = Signer::from_config(&config);
        let store = Arc::new(ArtifactStore::new(config.artifact_ttl));
        Self::new(config, Arc::new(MonotonicIdGenerator::new()), signer, store)
    }

    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<ArtifactStore> {
        &self.store
    }

    pub fn template_available(&self) -> bool {
        self.config.template_archive.is_file()
    }

    /// Validate `fields` and run the build. Validation failures have no side effects.
    pub async fn build(&self, fields: BuildRequestFields) -> BuildResult<BuildReport> {
        let request = fields.validate()?;
        self.build_request(request).await
    }

    pub async fn build_request(&self, request: BuildRequest) -> BuildResult<BuildReport> {
        if !self.template_available() {
            return Err(BuildError::NotFound(format!(
                "template archive {}",
                self.config.template_archive.display()
            )));
        }

        let id = self.ids.next_id();
        let paths = BuildPaths::for_build(&self.config.output_dir, &id);
        info!(
            op = "build.start",
            build_id = %id,
            app_name = %request.app_name,
            remote_host = %request.remote_host,
            remote_port = %request.remote_port,
            backend_url = request.backend_url.as_deref().unwrap_or(""),
            package_name = request.package_name.as_deref().unwrap_or(""),
            icon_bytes = request.icon.as_ref().map_or(0, Vec::len),
            "Build started"
        );

        let result = self.run(&id, &paths, &request).await;
        match &result {
            Ok(report) => info!(
                op = "build.ok",
                build_id = %id,
                signed = report.signed,
                sha256 = %report.sha256,
                size_bytes = report.size_bytes,
                "Build finished"
            ),
            Err(e) => warn!(op = "build.failed", build_id = %id, error = %e, "Build failed"),
        }
        result
    }

    async fn run(&self, id: &BuildId, paths: &BuildPaths, request: &BuildRequest) -> BuildResult<BuildReport> {
        let template = self.config.template_archive.clone();
        let app_name = request.app_name.clone();
        let staged = paths.clone();
        let entries = tokio::task::spawn_blocking(move || {
            prepare_unsigned(&template, &staged, &app_name)
        })
        .await
        .map_err(|e| BuildError::Internal(format!("build worker failed: {e}")))??;
        info!(op = "build.repacked", build_id = %id, entries, "Unsigned artifact written");

        if paths.signed.exists() {
            discard(&paths.unsigned);
            return Err(BuildError::Internal(format!(
                "{} already exists",
                paths.signed.display()
            )));
        }

        let signed = match self.signer.sign(&paths.unsigned, &paths.signed).await {
            Ok(SignOutcome::Signed(path)) => Some(path),
            Ok(SignOutcome::Skipped) => None,
            Err(source) => {
                discard(&paths.signed);
                self.register(id, Artifact {
                    unsigned: paths.unsigned.clone(),
                    signed: None,
                })?;
                return Err(BuildError::Signing {
                    build_id: id.clone(),
                    source,
                });
            }
        };

        let artifact = Artifact {
            unsigned: paths.unsigned.clone(),
            signed,
        };
        let served = artifact.download_path().to_path_buf();
        let (sha256, size_bytes) = tokio::task::spawn_blocking(move || sha256_file(&served))
            .await
            .map_err(|e| BuildError::Internal(format!("hash worker failed: {e}")))?
            .map_err(|e| BuildError::Internal(format!("hashing artifact: {e}")))
            .inspect_err(|_| discard_all(&artifact))?;

        let signed = artifact.is_signed();
        self.register(id, artifact)?;

        Ok(BuildReport {
            build_id: id.clone(),
            signed,
            sha256,
            size_bytes,
        })
    }

    fn register(&self, id: &BuildId, artifact: Artifact) -> BuildResult<()> {
        let files = artifact.clone();
        self.store
            .register(id.clone(), artifact)
            .inspect_err(|_| discard_all(&files))
    }
}

/// Blocking half of a build: unpack the template, rename the app, pack it again.
fn prepare_unsigned(template: &Path, paths: &BuildPaths, app_name: &str) -> BuildResult<usize> {
    archive::extract_archive(template, &paths.workspace)?;
    let _workspace = Workspace(paths.workspace.clone());

    match patch_app_name(&paths.workspace, app_name)? {
        PatchOutcome::Patched => {}
        outcome => info!(
            op = "patch.skipped",
            workspace = %paths.workspace.display(),
            outcome = ?outcome,
            "App name left unchanged"
        ),
    }

    archive::repack_workspace(&paths.workspace, &paths.unsigned)
}

fn discard(path: &Path) {
    if let Err(e) = discard_partial(path) {
        warn!(
            op = "build.cleanup_failed",
            path = %path.display(),
            error = %e,
            "Failed to remove artifact"
        );
    }
}

fn discard_all(artifact: &Artifact) {
    discard(&artifact.unsigned);
    if let Some(signed) = &artifact.signed {
        discard(signed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::build_id::SequenceIdGenerator;
    use crate::config::SigningCredentials;
    use std::io::{Read, Write};
    use std::time::Duration;
    use tempfile::TempDir;
    use zip::write::SimpleFileOptions;
    use zip::{ZipArchive, ZipWriter};

    const STRINGS: &str = r#"<resources><string name="app_name">Old</string></resources>"#;

    fn write_template(path: &Path) {
        let mut zip = ZipWriter::new(fs::File::create(path).unwrap());
        zip.start_file("AndroidManifest.xml", SimpleFileOptions::default()).unwrap();
        zip.write_all(b"<manifest/>").unwrap();
        zip.start_file("res/values/strings.xml", SimpleFileOptions::default()).unwrap();
        zip.write_all(STRINGS.as_bytes()).unwrap();
        zip.finish().unwrap();
    }

    fn coordinator(base: &Path, ids: &[&str]) -> BuildCoordinator {
        let config = ServiceConfig::with_base_dir(base);
        write_template(&config.template_archive);
        let signer = Signer::new(
            Arc::new(SigningCredentials {
                keystore: base.join("absent.jks"),
                ..config.signing.clone()
            }),
            "jarsigner",
            Duration::from_secs(5),
        );
        let store = Arc::new(ArtifactStore::new(Duration::from_secs(60)));
        BuildCoordinator::new(
            Arc::new(config),
            Arc::new(SequenceIdGenerator::new(ids.iter().copied())),
            signer,
            store,
        )
    }

    fn fields(app_name: &str) -> BuildRequestFields {
        BuildRequestFields {
            app_name: Some(app_name.into()),
            remote_host: Some("1.2.3.4".into()),
            remote_port: Some("4444".into()),
            ..Default::default()
        }
    }

    fn read_strings(apk: &Path) -> String {
        let mut zip = ZipArchive::new(fs::File::open(apk).unwrap()).unwrap();
        let mut out = String::new();
        zip.by_name("res/values/strings.xml")
            .unwrap()
            .read_to_string(&mut out)
            .unwrap();
        out
    }

    #[test]
    fn test_build_paths() {
        let id = BuildId::parse("abc").unwrap();
        let paths = BuildPaths::for_build(Path::new("/out"), &id);
        assert_eq!(paths.workspace, PathBuf::from("/out/work_abc"));
        assert_eq!(paths.unsigned, PathBuf::from("/out/unsigned_abc.apk"));
        assert_eq!(paths.signed, PathBuf::from("/out/signed_abc.apk"));
    }

    #[tokio::test]
    async fn test_unsigned_build_registers_artifact() {
        let temp = TempDir::new().unwrap();
        let coordinator = coordinator(temp.path(), &["one"]);

        let report = coordinator.build(fields("Test")).await.unwrap();

        assert_eq!(report.build_id.as_str(), "one");
        assert!(!report.signed);
        assert_eq!(report.download_url(), "/download/one");
        assert_eq!(report.sha256.len(), 64);

        let served = coordinator.store().resolve(&report.build_id).unwrap();
        assert_eq!(served, coordinator.config().output_dir.join("unsigned_one.apk"));
        assert!(read_strings(&served).contains(r#"<string name="app_name">Test</string>"#));
        assert!(!coordinator.config().output_dir.join("work_one").exists());
    }

    #[tokio::test]
    async fn test_validation_failure_touches_nothing() {
        let temp = TempDir::new().unwrap();
        let coordinator = coordinator(temp.path(), &["never"]);

        let err = coordinator
            .build(BuildRequestFields {
                app_name: Some("Test".into()),
                ..Default::default()
            })
            .await
            .unwrap_err();

        assert!(matches!(err, BuildError::Validation(ref m) if m == &["remoteHost", "remotePort"]));
        assert!(!coordinator.config().output_dir.exists());
    }

    #[tokio::test]
    async fn test_missing_template_is_not_found() {
        let temp = TempDir::new().unwrap();
        let coordinator = coordinator(temp.path(), &["x"]);
        fs::remove_file(&coordinator.config().template_archive).unwrap();

        let err = coordinator.build(fields("Test")).await.unwrap_err();
        assert!(matches!(err, BuildError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_corrupt_template_cleans_up() {
        let temp = TempDir::new().unwrap();
        let coordinator = coordinator(temp.path(), &["bad"]);
        fs::write(&coordinator.config().template_archive, b"not a zip").unwrap();

        let err = coordinator.build(fields("Test")).await.unwrap_err();
        assert!(matches!(err, BuildError::Extraction(_)));

        let out = &coordinator.config().output_dir;
        assert!(!out.join("work_bad").exists());
        assert!(!out.join("unsigned_bad.apk").exists());
    }

    #[tokio::test]
    async fn test_colliding_id_fails_without_touching_first_build() {
        let temp = TempDir::new().unwrap();
        let coordinator = coordinator(temp.path(), &["same"]);

        let first = coordinator.build(fields("First")).await.unwrap();
        let before = fs::read(coordinator.store().resolve(&first.build_id).unwrap()).unwrap();

        let err = coordinator.build(fields("Second")).await.unwrap_err();
        assert!(matches!(err, BuildError::Repack(_)));

        let after = fs::read(coordinator.store().resolve(&first.build_id).unwrap()).unwrap();
        assert_eq!(before, after);
        assert!(!coordinator.config().output_dir.join("work_same").exists());
    }
}
