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

//! Miscellaneous functions for working with files.

use std::fs;
use std::io::{self, Write};
use std::os::unix::fs::MetadataExt;
use std::path::Path;

use log::{debug, error};
use rand::{rngs::OsRng, Rng};

/// Replace the file at `path` with `data`, atomically.
///
/// The data is staged in a hidden temporary file beside `path` and renamed
/// over it, so readers see either the old or the new content. The mode and,
/// where permitted, the ownership of the existing file carry over to the
/// replacement.
pub fn spit_over(path: &Path, data: &[u8]) -> io::Result<()> {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let existing = fs::metadata(path)?;

    let mut tf = tempfile::Builder::new()
        .prefix(&format!(".{}.", file_name))
        .suffix(".tmp")
        .tempfile_in(parent)?;
    tf.as_file_mut().write_all(data)?;
    fs::set_permissions(tf.path(), existing.permissions())?;
    copy_owner(&existing, tf.path());
    tf.as_file_mut().sync_all()?;
    tf.persist(path).map_err(|e| e.error)?;
    Ok(())
}

fn copy_owner(existing: &fs::Metadata, staged: &Path) {
    let uid = nix::unistd::Uid::from_raw(existing.uid());
    let gid = nix::unistd::Gid::from_raw(existing.gid());
    if uid == nix::unistd::geteuid() && gid == nix::unistd::getegid() {
        return;
    }

    // Only root (or an owner changing to one of its own groups) can do this;
    // otherwise the replacement keeps our own ownership.
    if let Err(e) = nix::unistd::chown(staged, Some(uid), Some(gid)) {
        debug!(
            "unable to give {} ownership {}:{}: {}",
            staged.display(),
            uid,
            gid,
            e
        );
    }
}

/// Delete `target` by moving it into the directory given by `garbage` (with a
/// new random name) and recursively removing it in the background.
///
/// This is used to make removal of large directory trees both fast and atomic.
/// The returned handle can be joined to wait for the removal to finish.
pub fn delete_async(
    target: impl AsRef<Path>,
    garbage: impl AsRef<Path>,
) -> io::Result<std::thread::JoinHandle<()>> {
    let target = target.as_ref();
    let garbage = garbage.as_ref();

    loop {
        let name = format!(".garbage.{}", OsRng.gen::<u64>());
        let dst = garbage.join(name);

        match fs::rename(target, &dst) {
            Ok(()) => {
                return Ok(std::thread::spawn(move || {
                    if let Err(e) = fs::remove_dir_all(&dst) {
                        error!("Failed to remove {}: {}", dst.display(), e);
                    }
                }));
            }
            Err(e) if io::ErrorKind::AlreadyExists == e.kind() => continue,
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
pub fn chmod(path: impl AsRef<Path>, mode: u32) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(mode))
}

pub trait IgnoreKinds {
    fn ignore_not_found(self) -> Self;
}

impl<R: Default> IgnoreKinds for Result<R, io::Error> {
    fn ignore_not_found(self) -> Self {
        match self {
            Ok(r) => Ok(r),
            Err(e) if io::ErrorKind::NotFound == e.kind() => Ok(R::default()),
            Err(e) => Err(e),
        }
    }
}
