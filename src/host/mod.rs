//! The host filesystem contract (§6): the two files the agent drops on a
//! bind-mounted host path for the out-of-band upgrade executor to consume.
//!
//! `current` is the commit point. It is always the *last* file written on
//! start and the *first* file removed on finish, so that a crash at any
//! point leaves the filesystem in a state the next reconcile can
//! unambiguously interpret (P5).

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Marker written to `current`, signalling the host-side executor that an
/// upgrade attempt is pending.
#[derive(Clone, Debug, PartialEq, Deserialize, Serialize)]
pub struct CurrentMarker {
    pub version: String,
    pub id: String,
}

/// Resolves the paths this contract writes under a configured mount root.
#[derive(Clone, Debug)]
pub struct HostPaths {
    root: PathBuf,
}

impl HostPaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn scripts_dir(&self) -> PathBuf {
        self.root.join("scripts").join("upgrade")
    }

    fn script_path(&self, version: &str, id: &str) -> PathBuf {
        self.scripts_dir().join(format!("{version}-{id}.sh"))
    }

    fn current_path(&self) -> PathBuf {
        self.scripts_dir().join("current")
    }

    /// Whether an upgrade is believed to be in progress locally.
    pub fn current_exists(&self) -> bool {
        self.current_path().is_file()
    }

    pub fn read_current(&self) -> Result<Option<CurrentMarker>> {
        let path = self.current_path();
        match fs::read_to_string(&path) {
            Ok(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Error::HostIo { path, source: e }),
        }
    }

    /// Write the script body and commit with `current`, in that order.
    ///
    /// If the process dies between the two writes, `current_exists()` is
    /// false and the agent reconciler's `Heartbeat` arm calls this again via
    /// `resume_host_write`; the write is idempotent (same deterministic
    /// path, truncate-and-write).
    pub fn write_script(&self, version: &str, id: &str, body: &[u8]) -> Result<()> {
        let dir = self.scripts_dir();
        create_dir_all(&dir)?;

        let script_path = self.script_path(version, id);
        write_file(&script_path, body, Some(0o755))?;

        let marker = CurrentMarker {
            version: version.to_string(),
            id: id.to_string(),
        };
        let marker_bytes = serde_json::to_vec(&marker)?;
        write_file(&self.current_path(), &marker_bytes, None)
    }

    /// Remove `current`, the NUA's contract for "done with this attempt".
    ///
    /// Best-effort: callers log and continue rather than fail the
    /// reconcile over a cleanup error, matching the upstream behavior this
    /// is grounded on.
    pub fn remove_current(&self) -> Result<()> {
        let path = self.current_path();
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Error::HostIo { path, source: e }),
        }
    }
}

fn create_dir_all(dir: &Path) -> Result<()> {
    fs::create_dir_all(dir).map_err(|source| Error::HostIo {
        path: dir.to_path_buf(),
        source,
    })
}

#[cfg(unix)]
fn write_file(path: &Path, contents: &[u8], mode: Option<u32>) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;

    fs::write(path, contents).map_err(|source| Error::HostIo {
        path: path.to_path_buf(),
        source,
    })?;

    if let Some(mode) = mode {
        fs::set_permissions(path, fs::Permissions::from_mode(mode)).map_err(|source| {
            Error::HostIo {
                path: path.to_path_buf(),
                source,
            }
        })?;
    }
    Ok(())
}

#[cfg(not(unix))]
fn write_file(path: &Path, contents: &[u8], _mode: Option<u32>) -> Result<()> {
    fs::write(path, contents).map_err(|source| Error::HostIo {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_script_is_the_last_writer_of_current() {
        let dir = tempfile::tempdir().unwrap();
        let paths = HostPaths::new(dir.path());

        assert!(!paths.current_exists());
        paths.write_script("v1.10.2", "abc123", b"#!/bin/sh\necho hi\n").unwrap();
        assert!(paths.current_exists());

        let marker = paths.read_current().unwrap().unwrap();
        assert_eq!(marker.version, "v1.10.2");
        assert_eq!(marker.id, "abc123");
    }

    #[test]
    fn remove_current_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let paths = HostPaths::new(dir.path());

        paths.write_script("v1.10.2", "abc123", b"body").unwrap();
        paths.remove_current().unwrap();
        assert!(!paths.current_exists());

        // Removing again (no file present) must not error.
        paths.remove_current().unwrap();
    }

    #[test]
    fn write_script_is_idempotent_on_rerun() {
        let dir = tempfile::tempdir().unwrap();
        let paths = HostPaths::new(dir.path());

        paths.write_script("v1.10.2", "abc123", b"first").unwrap();
        paths.write_script("v1.10.2", "abc123", b"first").unwrap();
        assert!(paths.current_exists());
    }

    #[cfg(unix)]
    #[test]
    fn script_file_is_executable() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let paths = HostPaths::new(dir.path());
        paths.write_script("v1.10.2", "abc123", b"body").unwrap();

        let script_path = paths.scripts_dir().join("v1.10.2-abc123.sh");
        let mode = fs::metadata(&script_path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o755);
    }
}
