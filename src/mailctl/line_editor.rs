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

//! Read-modify-rewrite of whole line-oriented text stores.

use std::fs;
use std::path::Path;

use log::info;

use super::postmap::IndexRebuilder;
use crate::support::error::{AtPath, Error};
use crate::support::file_ops;

/// How a changed store is committed back to disk.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Commit {
    /// Stage beside the file and rename over it.
    Atomic,
    /// Overwrite in place, then rebuild the compiled index of the file.
    ///
    /// The downstream consumer reads the index, whose rebuild is itself
    /// atomic, and writing in place leaves symlinked maps intact.
    Indexed,
}

#[derive(Clone, Debug)]
pub struct LineEditor {
    index: IndexRebuilder,
    dry_run: bool,
}

impl LineEditor {
    pub fn new(index: IndexRebuilder, dry_run: bool) -> Self {
        Self { index, dry_run }
    }

    /// Load the non-blank lines of `path`, let `transform` modify them, and
    /// write them back if they changed.
    ///
    /// If `transform` fails, nothing is written and its error is returned
    /// as-is. In dry-run mode `transform` still runs, but nothing is written
    /// and no index is rebuilt.
    pub fn edit_lines<T>(
        &self,
        path: &Path,
        commit: Commit,
        transform: impl FnOnce(&mut Vec<String>) -> Result<T, Error>,
    ) -> Result<T, Error> {
        info!("reading {}", path.display());
        let original = read_lines(path)?;

        let mut lines = original.clone();
        let result = transform(&mut lines)?;
        lines.retain(|line| !line.trim().is_empty());

        if lines == original {
            info!("no changes {}", path.display());
            return Ok(result);
        }

        let mut content = String::new();
        for line in &lines {
            content.push_str(line);
            content.push('\n');
        }

        if self.dry_run {
            info!("would write {}", path.display());
        } else {
            match commit {
                Commit::Atomic => file_ops::spit_over(path, content.as_bytes()),
                Commit::Indexed => fs::write(path, &content),
            }
            .at_path(path)?;
            info!("wrote {}", path.display());
        }

        if Commit::Indexed == commit {
            self.index.rebuild(path)?;
        }

        Ok(result)
    }
}

/// Read the non-blank lines of the store at `path`.
pub fn read_lines(path: &Path) -> Result<Vec<String>, Error> {
    let content = fs::read_to_string(path).at_path(path)?;
    Ok(content
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(str::to_owned)
        .collect())
}

#[cfg(test)]
mod test {
    use std::os::unix::fs::{MetadataExt, PermissionsExt};
    use std::path::PathBuf;

    use tempfile::TempDir;

    use super::*;

    struct Setup {
        root: TempDir,
        store: PathBuf,
        rebuild_log: PathBuf,
    }

    impl Setup {
        fn editor(&self, dry_run: bool) -> LineEditor {
            let script = self.root.path().join("fake-postmap");
            // Via sh to avoid ETXTBSY when a sibling test forks mid-write
            let command = format!("sh {}", script.display());
            LineEditor::new(IndexRebuilder::new(&command, dry_run), dry_run)
        }

        fn rebuilds(&self) -> Vec<String> {
            fs::read_to_string(&self.rebuild_log)
                .unwrap_or_default()
                .lines()
                .map(str::to_owned)
                .collect()
        }

        fn content(&self) -> String {
            fs::read_to_string(&self.store).unwrap()
        }
    }

    fn set_up(content: &str) -> Setup {
        crate::init_test_log();

        let root = TempDir::new().unwrap();
        let store = root.path().join("store");
        let rebuild_log = root.path().join("rebuilds");
        let script = root.path().join("fake-postmap");
        fs::write(&store, content).unwrap();
        fs::write(
            &script,
            format!("#!/bin/sh\necho \"$1\" >> '{}'\n", rebuild_log.display()),
        )
        .unwrap();

        Setup {
            root,
            store,
            rebuild_log,
        }
    }

    #[test]
    fn append_rewrites_with_trailing_newline() {
        let setup = set_up("a\nb\n");
        setup
            .editor(false)
            .edit_lines(&setup.store, Commit::Atomic, |lines| {
                lines.push("c".to_owned());
                Ok(())
            })
            .unwrap();
        assert_eq!("a\nb\nc\n", setup.content());
    }

    #[test]
    fn blank_lines_are_dropped_on_rewrite() {
        let setup = set_up("\na\n\n  \nb\n\n\n");
        let seen = setup
            .editor(false)
            .edit_lines(&setup.store, Commit::Atomic, |lines| {
                let seen = lines.clone();
                lines.push(String::new());
                lines.push("c".to_owned());
                Ok(seen)
            })
            .unwrap();
        assert_eq!(vec!["a", "b"], seen);
        assert_eq!("a\nb\nc\n", setup.content());
    }

    #[test]
    fn empty_file_reads_as_no_lines() {
        let setup = set_up("");
        let n = setup
            .editor(false)
            .edit_lines(&setup.store, Commit::Atomic, |lines| Ok(lines.len()))
            .unwrap();
        assert_eq!(0, n);
        assert_eq!("", setup.content());
    }

    #[test]
    fn unchanged_lines_are_not_written() {
        let setup = set_up("a\nb\n");
        let inode = fs::metadata(&setup.store).unwrap().ino();

        for &commit in &[Commit::Atomic, Commit::Indexed] {
            setup
                .editor(false)
                .edit_lines(&setup.store, commit, |lines| {
                    lines.push("x".to_owned());
                    lines.pop();
                    Ok(())
                })
                .unwrap();
        }

        assert_eq!(inode, fs::metadata(&setup.store).unwrap().ino());
        assert!(setup.rebuilds().is_empty());
    }

    #[test]
    fn atomic_commit_replaces_file() {
        let setup = set_up("a\n");
        file_ops::chmod(&setup.store, 0o600).unwrap();
        let inode = fs::metadata(&setup.store).unwrap().ino();

        setup
            .editor(false)
            .edit_lines(&setup.store, Commit::Atomic, |lines| {
                lines.clear();
                lines.push("b".to_owned());
                Ok(())
            })
            .unwrap();

        let md = fs::metadata(&setup.store).unwrap();
        assert_ne!(inode, md.ino());
        assert_eq!(0o600, md.permissions().mode() & 0o777);
        assert_eq!("b\n", setup.content());
        assert!(setup.rebuilds().is_empty());
    }

    #[test]
    fn indexed_commit_writes_in_place_and_rebuilds() {
        let setup = set_up("a a\n");
        let inode = fs::metadata(&setup.store).unwrap().ino();

        setup
            .editor(false)
            .edit_lines(&setup.store, Commit::Indexed, |lines| {
                lines.push("b b".to_owned());
                Ok(())
            })
            .unwrap();

        assert_eq!(inode, fs::metadata(&setup.store).unwrap().ino());
        assert_eq!("a a\nb b\n", setup.content());
        assert_eq!(
            vec![setup.store.to_string_lossy().into_owned()],
            setup.rebuilds()
        );
    }

    #[test]
    fn transform_error_writes_nothing() {
        let setup = set_up("a\n");
        let result: Result<(), Error> = setup.editor(false).edit_lines(
            &setup.store,
            Commit::Indexed,
            |lines| {
                lines.push("partial".to_owned());
                Err(Error::AccountExists("a".to_owned()))
            },
        );

        assert_matches!(Err(Error::AccountExists(_)), result);
        assert_eq!("a\n", setup.content());
        assert!(setup.rebuilds().is_empty());
    }

    #[test]
    fn dry_run_computes_result_without_writing() {
        let setup = set_up("a\nb\n");
        let removed = setup
            .editor(true)
            .edit_lines(&setup.store, Commit::Indexed, |lines| {
                let before = lines.len();
                lines.retain(|l| l != "a");
                Ok(before - lines.len())
            })
            .unwrap();

        assert_eq!(1, removed);
        assert_eq!("a\nb\n", setup.content());
        assert!(setup.rebuilds().is_empty());
    }

    #[test]
    fn vanished_directory_is_file_access_error() {
        let setup = set_up("");
        let dir = setup.root.path().join("stores");
        let moved = setup.root.path().join("moved");
        let store = dir.join("store");

        for &commit in &[Commit::Atomic, Commit::Indexed] {
            fs::create_dir(&dir).unwrap();
            fs::write(&store, "a\n").unwrap();

            let editor = setup.editor(false);
            let result = editor.edit_lines(&store, commit, |lines| {
                fs::rename(&dir, &moved).unwrap();
                lines.push("b".to_owned());
                Ok(())
            });

            assert_matches!(Err(Error::FileAccess { .. }), result);
            let kept = fs::read_to_string(moved.join("store")).unwrap();
            assert_eq!("a\n", kept);
            assert!(!dir.exists());
            fs::remove_dir_all(&moved).unwrap();
        }

        assert!(setup.rebuilds().is_empty());
    }

    #[test]
    fn missing_store_is_file_access_error() {
        let setup = set_up("");
        let result = setup.editor(false).edit_lines(
            &setup.root.path().join("nx"),
            Commit::Atomic,
            |_| Ok(()),
        );
        assert_matches!(Err(Error::FileAccess { .. }), result);
    }
}
