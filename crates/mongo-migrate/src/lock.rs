use std::{
    fs::{self, OpenOptions},
    io::{self, ErrorKind, Write},
    path::{Path, PathBuf},
};

use nix::{errno::Errno, sys::signal::kill, unistd::Pid};
use thiserror::Error;
use tracing::{info, warn};

/// Marks a run as active, removed when dropped.
#[derive(Debug)]
pub struct RunLock {
    path: PathBuf,
}

impl RunLock {
    /// The lock file guarding a staging directory.
    pub fn path_for(dump_path: &Path) -> PathBuf {
        let mut file_name = dump_path
            .file_name()
            .map(|name| name.to_os_string())
            .unwrap_or_else(|| "dump".into());
        file_name.push(".lock");

        dump_path.with_file_name(file_name)
    }

    /// Take the lock, replacing it if its owner is no longer running.
    pub fn acquire(path: &Path) -> Result<Self, LockError> {
        match Self::create(path) {
            Ok(lock) => return Ok(lock),
            Err(error) if error.kind() == ErrorKind::AlreadyExists => {}
            Err(error) => return Err(LockError::Create(error, path.to_path_buf())),
        }

        let contents =
            fs::read_to_string(path).map_err(|e| LockError::Read(e, path.to_path_buf()))?;
        let owner = contents.trim().parse::<u32>().ok();

        if let Some(owner) = owner.filter(|pid| is_alive(*pid)) {
            return Err(LockError::Held(owner, path.to_path_buf()));
        }

        warn!("Replacing stale lock {path:?} left by {owner:?}");
        fs::remove_file(path).map_err(|e| LockError::Create(e, path.to_path_buf()))?;

        Self::create(path).map_err(|e| LockError::Create(e, path.to_path_buf()))
    }

    fn create(path: &Path) -> io::Result<Self> {
        if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        let mut file = OpenOptions::new().write(true).create_new(true).open(path)?;
        writeln!(file, "{}", std::process::id())?;

        info!("Acquired run lock {path:?}");

        Ok(Self {
            path: path.to_path_buf(),
        })
    }

    /// The lock file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for RunLock {
    fn drop(&mut self) {
        if let Err(error) = fs::remove_file(&self.path) {
            warn!("Could not remove run lock {:?}: {error}", self.path);
        }
    }
}

/// Signal 0 checks a process exists without touching it.
fn is_alive(pid: u32) -> bool {
    let Ok(pid) = i32::try_from(pid) else {
        return false;
    };
    if pid <= 0 {
        return false;
    }

    !matches!(kill(Pid::from_raw(pid), None), Err(Errno::ESRCH))
}

#[allow(missing_docs)]
#[derive(Debug, Error)]
pub enum LockError {
    #[error("Another run (pid {0}) holds the lock {1:?}")]
    Held(u32, PathBuf),

    #[error("Failed to create the lock {1:?}: {0}")]
    Create(#[source] io::Error, PathBuf),

    #[error("Failed to read the lock {1:?}: {0}")]
    Read(#[source] io::Error, PathBuf),
}
