//-
// Copyright (c) 2026, Jason Lingle
//
// This file is part of Mailadm.
//
// Mailadm is free software: you can  redistribute it and/or modify it under the
// terms of  the GNU General Public  License as published by  the Free Software
// Foundation, either version  3 of the License, or (at  your option) any later
// version.
//
// Mailadm is distributed  in the hope that  it will be useful,  but WITHOUT ANY
// WARRANTY; without  even the implied  warranty of MERCHANTABILITY  or FITNESS
// FOR  A PARTICULAR  PURPOSE.  See the  GNU General  Public  License for  more
// details.
//
// You should have received a copy of the GNU General Public License along with
// Mailadm. If not, see <http://www.gnu.org/licenses/>.

//! Inter-process mutual exclusion for store mutations.
//!
//! The lock is an advisory `flock(2)` on a well-known file. The kernel drops
//! it when the descriptor is closed, so a holder that dies never leaves the
//! lock stuck, and the lock file itself is never removed.

use std::fs;
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};

use log::{debug, warn};
use nix::errno::Errno;
use nix::fcntl::{flock, FlockArg};

use crate::support::error::{AtPath, Error};

#[derive(Clone, Debug)]
pub struct ProcessLock {
    path: PathBuf,
}

/// Holds the lock until dropped.
#[derive(Debug)]
pub struct LockGuard {
    file: fs::File,
    path: PathBuf,
}

impl ProcessLock {
    /// A lock named `name` within `dir`, backed by the file `.{name}.lock`.
    pub fn new(dir: &Path, name: &str) -> Self {
        Self {
            path: dir.join(format!(".{}.lock", name)),
        }
    }

    #[cfg(test)]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Block until the lock is held by this process.
    pub fn acquire(&self) -> Result<LockGuard, Error> {
        let file = self.open()?;
        loop {
            match flock(file.as_raw_fd(), FlockArg::LockExclusive) {
                Ok(()) => break,
                Err(nix::Error::Sys(Errno::EINTR)) => continue,
                Err(source) => {
                    return Err(Error::Lock {
                        path: self.path.clone(),
                        source,
                    })
                }
            }
        }

        debug!("acquired {}", self.path.display());
        Ok(LockGuard {
            file,
            path: self.path.clone(),
        })
    }

    /// Take the lock only if nobody else holds it.
    #[cfg(test)]
    pub fn try_acquire(&self) -> Result<Option<LockGuard>, Error> {
        let file = self.open()?;
        match flock(file.as_raw_fd(), FlockArg::LockExclusiveNonblock) {
            Ok(()) => Ok(Some(LockGuard {
                file,
                path: self.path.clone(),
            })),
            Err(nix::Error::Sys(Errno::EAGAIN)) => Ok(None),
            Err(source) => Err(Error::Lock {
                path: self.path.clone(),
                source,
            }),
        }
    }

    /// Run `body` while holding the lock.
    ///
    /// The lock is released however `body` exits, including by unwinding.
    pub fn with_lock<T>(
        &self,
        body: impl FnOnce() -> Result<T, Error>,
    ) -> Result<T, Error> {
        let _guard = self.acquire()?;
        body()
    }

    fn open(&self) -> Result<fs::File, Error> {
        fs::OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&self.path)
            .at_path(&self.path)
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if let Err(e) = flock(self.file.as_raw_fd(), FlockArg::Unlock) {
            // Closing the descriptor releases it anyway
            warn!("failed to unlock {}: {}", self.path.display(), e);
        } else {
            debug!("released {}", self.path.display());
        }
    }
}
