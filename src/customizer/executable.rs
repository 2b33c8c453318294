//! Restores execute permissions on the staged entry-point binaries.
//!
//! Archive extraction frequently drops the executable bit, which turns the
//! eventual spawn into a confusing permission error. Re-running is harmless:
//! the execute bits are simply OR-ed into the existing mode.

use cfg_if::cfg_if;

use super::WorkingDirectoryCustomizer;
use crate::{error::BoxError, version::Version, workdir::WorkingDirectory};

/// Marks the files under `bin/` executable on POSIX-like targets.
///
/// Silently skips when the directory has no `bin/` entry, and is a no-op on
/// targets without an executable-bit concept.
#[derive(Debug, Clone, Copy, Default)]
pub struct ExecutableFileCustomizer;

impl WorkingDirectoryCustomizer for ExecutableFileCustomizer {
    fn name(&self) -> &'static str { "executable permissions" }

    fn customize(&self, directory: &WorkingDirectory, _version: &Version) -> Result<(), BoxError> {
        mark_entry_points(directory)
    }
}

cfg_if! {
    if #[cfg(unix)] {
        fn mark_entry_points(directory: &WorkingDirectory) -> Result<(), BoxError> {
            use std::{fs, os::unix::fs::PermissionsExt};

            let bin = directory.bin_dir();
            if !bin.is_dir() {
                return Ok(());
            }
            for entry in fs::read_dir(&bin)? {
                let path = entry?.path();
                if !path.is_file() {
                    continue;
                }
                let mut permissions = fs::metadata(&path)?.permissions();
                let mode = permissions.mode();
                if mode & 0o111 != 0o111 {
                    permissions.set_mode(mode | 0o111);
                    fs::set_permissions(&path, permissions)?;
                }
            }
            Ok(())
        }
    } else {
        fn mark_entry_points(_directory: &WorkingDirectory) -> Result<(), BoxError> { Ok(()) }
    }
}
