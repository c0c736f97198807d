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

use std::io;
use std::path::PathBuf;
use std::process::ExitStatus;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("invalid email address {0:?}")]
    InvalidEmail(String),
    #[error("email {email:?} is not on domain {domain:?}")]
    DomainMismatch { email: String, domain: String },
    #[error("account {0:?} already exists")]
    AccountExists(String),
    #[error("invalid expiry code {0:?}")]
    InvalidExpiryCode(String),
    #[error("cannot access '{}': {source}", .path.display())]
    FileAccess {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("rebuilding index for '{}' failed: {status}", .path.display())]
    IndexRebuild { path: PathBuf, status: ExitStatus },
    #[error("cannot run index tool {command:?}: {source}")]
    IndexRebuildSpawn {
        command: String,
        #[source]
        source: io::Error,
    },
    #[error("cannot lock '{}': {source}", .path.display())]
    Lock {
        path: PathBuf,
        #[source]
        source: nix::Error,
    },
    #[error("password hashing failed: {0}")]
    PasswordHash(String),
}

/// Attach the path being operated on to an I/O error.
pub trait AtPath<T> {
    fn at_path(self, path: impl Into<PathBuf>) -> Result<T, Error>;
}

impl<T> AtPath<T> for Result<T, io::Error> {
    fn at_path(self, path: impl Into<PathBuf>) -> Result<T, Error> {
        self.map_err(|source| Error::FileAccess {
            path: path.into(),
            source,
        })
    }
}
