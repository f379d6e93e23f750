#![allow(dead_code)]

use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use repack_builder::artifact_store::ArtifactStore;
use repack_builder::signer::Signer;
use repack_builder::{BuildCoordinator, BuildIdGenerator, BuildRequestFields, ServiceConfig};
use zip::write::SimpleFileOptions;
use zip::{ZipArchive, ZipWriter};

pub const STRINGS_XML: &str = "<?xml version=\"1.0\" encoding=\"utf-8\"?>\n<resources>\n    <string name=\"app_name\">Old</string>\n    <string name=\"greeting\">Hello</string>\n</resources>\n";

pub fn template_entries() -> Vec<(&'static str, Vec<u8>)> {
    vec![
        ("AndroidManifest.xml", b"<manifest package=\"com.example.template\"/>".to_vec()),
        ("classes.dex", (0u8..=255).cycle().take(4096).collect()),
        ("res/values/strings.xml", STRINGS_XML.as_bytes().to_vec()),
        ("res/drawable/icon.png", vec![0x89, b'P', b'N', b'G', 0, 0, 0, 0]),
        ("META-INF/MANIFEST.MF", b"Manifest-Version: 1.0\n".to_vec()),
    ]
}

pub fn write_zip(path: &Path, entries: &[(&str, Vec<u8>)]) {
    let mut zip = ZipWriter::new(File::create(path).unwrap());
    for (name, bytes) in entries {
        zip.start_file(*name, SimpleFileOptions::default()).unwrap();
        zip.write_all(bytes).unwrap();
    }
    zip.finish().unwrap();
}

pub fn read_zip(path: &Path) -> BTreeMap<String, Vec<u8>> {
    let mut zip = ZipArchive::new(File::open(path).unwrap()).unwrap();
    let mut out = BTreeMap::new();
    for i in 0..zip.len() {
        let mut entry = zip.by_index(i).unwrap();
        if entry.is_dir() {
            continue;
        }
        let mut bytes = Vec::new();
        entry.read_to_end(&mut bytes).unwrap();
        out.insert(entry.name().to_string(), bytes);
    }
    out
}

/// A service rooted at `base` with the standard template in place.
pub fn config(base: &Path) -> ServiceConfig {
    let mut config = ServiceConfig::with_base_dir(base);
    config.signer_timeout = Duration::from_secs(10);
    config.artifact_ttl = Duration::from_secs(60);
    write_zip(&config.template_archive, &template_entries());
    config
}

#[cfg(unix)]
pub fn enable_signing(config: &mut ServiceConfig, script_body: &str) {
    fs::write(&config.signing.keystore, b"fake keystore").unwrap();
    config.signer_program = fake_signer(config.output_dir.parent().unwrap(), script_body)
        .display()
        .to_string();
}

/// Shell script standing in for the real signer. `$9` is the signed output,
/// `$10` the unsigned input.
#[cfg(unix)]
pub fn fake_signer(dir: &Path, body: &str) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let path = dir.join("fake-signer.sh");
    fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
    fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
    path
}

pub fn coordinator(config: ServiceConfig, ids: Arc<dyn BuildIdGenerator>) -> BuildCoordinator {
    let signer = Signer::from_config(&config);
    let store = Arc::new(ArtifactStore::new(config.artifact_ttl));
    BuildCoordinator::new(Arc::new(config), ids, signer, store)
}

pub fn request(app_name: &str) -> BuildRequestFields {
    BuildRequestFields {
        app_name: Some(app_name.to_string()),
        remote_host: Some("1.2.3.4".to_string()),
        remote_port: Some("4444".to_string()),
        ..Default::default()
    }
}

/// Every file currently under `dir`, relative, sorted.
pub fn files_under(dir: &Path) -> Vec<String> {
    if !dir.exists() {
        return Vec::new();
    }
    let mut out: Vec<String> = walkdir::WalkDir::new(dir)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| !e.file_type().is_dir())
        .map(|e| e.path().strip_prefix(dir).unwrap().display().to_string())
        .collect();
    out.sort();
    out
}
