//! Workspace repacking.

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter};
use std::path::Path;

use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, DateTime, ZipWriter};

use tracing::warn;

use super::walk::WorkspaceWalk;
use crate::error::{BuildError, BuildResult};

/// Pack every file under `workspace` into a new archive at `output`.
///
/// Entries keep their workspace-relative paths and are written in walk order
/// with a fixed modification time, so repacking the same tree twice produces
/// identical archives. Empty directories are not represented. `output` must not
/// exist; if writing fails after it was created, the partial file is removed.
///
/// Returns the number of entries written.
pub fn repack_workspace(workspace: &Path, output: &Path) -> BuildResult<usize> {
    if !workspace.is_dir() {
        return Err(BuildError::repack(workspace, "workspace directory not found"));
    }

    // create_new: never clobber another build's output.
    let file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(output)
        .map_err(|e| BuildError::repack(output, e))?;

    write_archive(workspace, output, file).inspect_err(|_| {
        if let Err(e) = discard_partial(output) {
            warn!(
                op = "repack.cleanup_failed",
                path = %output.display(),
                error = %e,
                "Failed to remove partial archive"
            );
        }
    })
}

fn write_archive(workspace: &Path, output: &Path, file: File) -> BuildResult<usize> {
    let mut zip = ZipWriter::new(BufWriter::new(file));
    let options = SimpleFileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .last_modified_time(DateTime::default());

    let mut entries = 0usize;
    for entry in WorkspaceWalk::new(workspace).iter() {
        let entry = entry.map_err(|e| BuildError::repack(workspace, e))?;
        let mut src = File::open(&entry.absolute).map_err(|e| BuildError::repack(&entry.absolute, e))?;

        zip.start_file(entry.relative.as_str(), options)
            .map_err(|e| BuildError::repack(output, format!("{}: {e}", entry.relative)))?;
        io::copy(&mut src, &mut zip).map_err(|e| BuildError::repack(&entry.absolute, e))?;
        entries += 1;
    }

    let writer = zip.finish().map_err(|e| BuildError::repack(output, e))?;
    writer
        .into_inner()
        .map_err(|e| BuildError::repack(output, e.error()))?
        .sync_all()
        .map_err(|e| BuildError::repack(output, e))?;

    Ok(entries)
}

/// Remove a partially written archive, ignoring "not found".
pub(crate) fn discard_partial(output: &Path) -> io::Result<()> {
    match fs::remove_file(output) {
        Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}
