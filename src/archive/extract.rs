//! Template extraction.

use std::fs::{self, File};
use std::io::{self, BufReader, Read, Seek};
use std::path::{Component, Path, PathBuf};

use tracing::warn;
use zip::ZipArchive;

use crate::error::{BuildError, BuildResult};

/// Unpack every entry of `archive` into `dest`.
///
/// `dest` must not exist yet; it is created here and removed again if
/// extraction fails part way. Directory structure and file
/// bytes are reproduced exactly. Entries whose names are absolute or contain
/// `..` are rejected before anything is written for them.
///
/// Returns the number of files written.
pub fn extract_archive(archive: &Path, dest: &Path) -> BuildResult<usize> {
    if !archive.is_file() {
        return Err(BuildError::extraction(archive, "template archive not found"));
    }

    let file = File::open(archive).map_err(|e| BuildError::extraction(archive, e))?;
    let mut zip = ZipArchive::new(BufReader::new(file))
        .map_err(|e| BuildError::extraction(archive, format!("not a valid archive: {e}")))?;

    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent).map_err(|e| BuildError::extraction(parent, e))?;
    }
    // create_dir, not create_dir_all: two builds must never share a workspace.
    fs::create_dir(dest).map_err(|e| match e.kind() {
        io::ErrorKind::AlreadyExists => BuildError::extraction(dest, "workspace already exists"),
        _ => BuildError::extraction(dest, e),
    })?;

    unpack_entries(archive, &mut zip, dest).inspect_err(|_| {
        if let Err(e) = fs::remove_dir_all(dest) {
            warn!(
                op = "extract.cleanup_failed",
                path = %dest.display(),
                error = %e,
                "Failed to remove partial workspace"
            );
        }
    })
}

fn unpack_entries<R: Read + Seek>(
    archive: &Path,
    zip: &mut ZipArchive<R>,
    dest: &Path,
) -> BuildResult<usize> {
    let mut files = 0usize;
    for index in 0..zip.len() {
        let mut entry = zip
            .by_index(index)
            .map_err(|e| BuildError::extraction(archive, format!("entry #{index}: {e}")))?;

        let relative = safe_entry_path(entry.name()).ok_or_else(|| {
            BuildError::extraction(
                archive,
                format!("entry '{}' escapes the workspace", entry.name()),
            )
        })?;
        let target = dest.join(&relative);

        if entry.is_dir() {
            fs::create_dir_all(&target).map_err(|e| BuildError::extraction(&target, e))?;
            continue;
        }

        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).map_err(|e| BuildError::extraction(parent, e))?;
        }
        let mut out = File::create(&target).map_err(|e| BuildError::extraction(&target, e))?;
        io::copy(&mut entry, &mut out).map_err(|e| BuildError::extraction(&target, e))?;
        files += 1;
    }

    Ok(files)
}

/// Map an archive entry name onto a relative path that stays inside the workspace.
fn safe_entry_path(name: &str) -> Option<PathBuf> {
    if name.contains('\0') {
        return None;
    }
    let normalized = name.replace('\\', "/");
    let path = Path::new(&normalized);

    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => out.push(part),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => return None,
        }
    }
    if out.as_os_str().is_empty() {
        return None;
    }
    Some(out)
}
