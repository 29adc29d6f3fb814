//! Writing a rendered run to disk.
//!
//! Every write is conflict checked: identical content is left alone, different
//! content is a [`CampError::DirectoryConflict`].

use std::fs;
use std::path::Path;

use cheetah_core::errors::{CampError, ErrorInfo};
use cheetah_core::hash::bytes_hash_string;
use cheetah_spec::TransferMode;
use tracing::debug;
use walkdir::WalkDir;

use crate::manifest::{MANIFEST_FILE, PIPELINE_FILE, SCRIPT_FILE};
use crate::render::{InputOp, RenderedRun};
use crate::xml::apply_xml_edits;

/// Counts of file operations performed for one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MaterializeStats {
    /// Files and links created.
    pub written: usize,
    /// Destinations already holding identical content.
    pub unchanged: usize,
}

impl MaterializeStats {
    fn record(&mut self, wrote: bool) {
        if wrote {
            self.written += 1;
        } else {
            self.unchanged += 1;
        }
    }
}

fn conflict(path: &Path, message: &str) -> CampError {
    CampError::DirectoryConflict(
        ErrorInfo::new("materialize.conflict", message)
            .with_path(path)
            .with_hint("remove the existing file or choose another campaign root"),
    )
}

/// Creates the run directory and component workdirs, transfers inputs and
/// writes the manifest and pipeline description.
pub fn materialize_run(
    run: &RenderedRun,
    manifest: &[u8],
    pipeline: &[u8],
) -> Result<MaterializeStats, CampError> {
    let mut stats = MaterializeStats::default();
    ensure_dir(&run.dir)?;
    for component in run.components.iter().filter(|c| c.has_own_workdir()) {
        ensure_dir(&run.dir.join(&component.workdir))?;
    }
    for input in run.components.iter().flat_map(|c| c.inputs.iter()) {
        transfer_input(&run.dir, input, &mut stats)?;
    }
    stats.record(write_checked(&run.dir.join(MANIFEST_FILE), manifest)?);
    stats.record(write_checked(&run.dir.join(PIPELINE_FILE), pipeline)?);
    Ok(stats)
}

/// Writes the executable `submit.sh` of a materialized run.
pub fn write_script(run: &RenderedRun, script: &str) -> Result<bool, CampError> {
    let path = run.dir.join(SCRIPT_FILE);
    let wrote = write_checked(&path, script.as_bytes())?;
    make_executable(&path)?;
    Ok(wrote)
}

fn ensure_dir(path: &Path) -> Result<(), CampError> {
    if path.exists() && !path.is_dir() {
        return Err(conflict(path, "expected a directory but found a file"));
    }
    fs::create_dir_all(path).map_err(|err| CampError::io("materialize_dir", path, err))
}

/// Writes `bytes` to `path` unless an identical file is already there.
///
/// Returns true when the file was written.
pub fn write_checked(path: &Path, bytes: &[u8]) -> Result<bool, CampError> {
    match fs::symlink_metadata(path) {
        Ok(meta) if meta.is_file() => {
            let existing =
                fs::read(path).map_err(|err| CampError::io("materialize_read", path, err))?;
            if bytes_hash_string(&existing) == bytes_hash_string(bytes) {
                debug!(path = %path.display(), "unchanged");
                Ok(false)
            } else {
                Err(conflict(path, "file exists with different content"))
            }
        }
        Ok(_) => Err(conflict(path, "destination exists and is not a regular file")),
        Err(_) => {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)
                    .map_err(|err| CampError::io("materialize_dir", parent, err))?;
            }
            fs::write(path, bytes).map_err(|err| CampError::io("materialize_write", path, err))?;
            debug!(path = %path.display(), bytes = bytes.len(), "wrote");
            Ok(true)
        }
    }
}

fn transfer_input(
    run_dir: &Path,
    input: &InputOp,
    stats: &mut MaterializeStats,
) -> Result<(), CampError> {
    let dest = run_dir.join(&input.dest);
    let meta = fs::metadata(&input.source)
        .map_err(|err| CampError::io("input_missing", &input.source, err))?;
    if !input.xml_edits.is_empty() {
        if meta.is_dir() {
            return Err(CampError::Io(
                ErrorInfo::new("input_xml_dir", "XML edits need a file, not a directory")
                    .with_path(&input.source),
            ));
        }
        let bytes = fs::read(&input.source)
            .map_err(|err| CampError::io("input_read", &input.source, err))?;
        let edited = apply_xml_edits(&bytes, &input.xml_edits)
            .map_err(|err| err.with_context("source", input.source.display().to_string()))?;
        stats.record(write_checked(&dest, &edited)?);
        return Ok(());
    }
    match input.mode {
        TransferMode::Symlink => {
            stats.record(link_checked(&input.source, &dest)?);
        }
        TransferMode::Copy if meta.is_dir() => {
            for entry in WalkDir::new(&input.source).sort_by_file_name() {
                let entry = entry.map_err(|err| {
                    CampError::Io(
                        ErrorInfo::new("input_walk", err.to_string()).with_path(&input.source),
                    )
                })?;
                let relative = entry
                    .path()
                    .strip_prefix(&input.source)
                    .unwrap_or_else(|_| entry.path());
                let target = dest.join(relative);
                if entry.file_type().is_dir() {
                    ensure_dir(&target)?;
                } else {
                    stats.record(copy_checked(entry.path(), &target)?);
                }
            }
        }
        TransferMode::Copy => {
            stats.record(copy_checked(&input.source, &dest)?);
        }
    }
    Ok(())
}

fn copy_checked(source: &Path, dest: &Path) -> Result<bool, CampError> {
    let bytes = fs::read(source).map_err(|err| CampError::io("input_read", source, err))?;
    write_checked(dest, &bytes)
}

#[cfg(unix)]
fn link_checked(source: &Path, dest: &Path) -> Result<bool, CampError> {
    match fs::read_link(dest) {
        Ok(existing) if existing == source => {
            debug!(path = %dest.display(), "link unchanged");
            Ok(false)
        }
        Ok(_) => Err(conflict(dest, "symlink exists with a different target")),
        Err(_) if fs::symlink_metadata(dest).is_ok() => {
            Err(conflict(dest, "destination exists and is not a symlink"))
        }
        Err(_) => {
            if let Some(parent) = dest.parent() {
                fs::create_dir_all(parent)
                    .map_err(|err| CampError::io("materialize_dir", parent, err))?;
            }
            std::os::unix::fs::symlink(source, dest)
                .map_err(|err| CampError::io("materialize_link", dest, err))?;
            debug!(path = %dest.display(), target = %source.display(), "linked");
            Ok(true)
        }
    }
}

#[cfg(not(unix))]
fn link_checked(source: &Path, dest: &Path) -> Result<bool, CampError> {
    debug!(path = %dest.display(), "symlinks unavailable, copying");
    copy_checked(source, dest)
}

#[cfg(unix)]
fn make_executable(path: &Path) -> Result<(), CampError> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o755))
        .map_err(|err| CampError::io("materialize_chmod", path, err))
}

#[cfg(not(unix))]
fn make_executable(_path: &Path) -> Result<(), CampError> {
    Ok(())
}
