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

//! Record of the multi-store operation in progress.
//!
//! The three stores are committed one after another with no transaction
//! spanning them. An intent record is written before the first commit and
//! removed after the last, so a record found later names the accounts an
//! interrupted run may have left in only some of the stores.

use std::fmt;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use log::warn;

use crate::support::error::{AtPath, Error};
use crate::support::file_ops::IgnoreKinds;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Intent {
    pub op: String,
    pub emails: Vec<String>,
}

impl fmt::Display for Intent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.op)?;
        for email in &self.emails {
            write!(f, " {}", email)?;
        }
        Ok(())
    }
}

#[derive(Clone, Debug)]
pub struct IntentJournal {
    path: PathBuf,
    dry_run: bool,
}

impl IntentJournal {
    pub fn new(dir: &Path, dry_run: bool) -> Self {
        Self {
            path: dir.join(".mailadm.intent"),
            dry_run,
        }
    }

    #[cfg(test)]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// The intent left behind by an interrupted operation, if any.
    pub fn pending(&self) -> Result<Option<Intent>, Error> {
        let content = fs::read_to_string(&self.path)
            .map(Some)
            .ignore_not_found()
            .at_path(&self.path)?;

        Ok(content.and_then(|content| {
            let mut words = content.split_whitespace().map(str::to_owned);
            words.next().map(|op| Intent {
                op,
                emails: words.collect(),
            })
        }))
    }

    /// Log the intent left behind by an interrupted operation, if any, and
    /// return it.
    pub fn warn_if_stale(&self) -> Result<Option<Intent>, Error> {
        let stale = self.pending()?;
        if let Some(ref stale) = stale {
            warn!(
                "previous operation '{}' did not complete; \
                 the stores may be inconsistent for these accounts",
                stale
            );
        }
        Ok(stale)
    }

    /// Record that `intent` is about to be carried out.
    pub fn begin(&self, intent: &Intent) -> Result<(), Error> {
        self.warn_if_stale()?;

        if self.dry_run {
            return Ok(());
        }

        let dir = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        let mut tf = tempfile::NamedTempFile::new_in(dir).at_path(dir)?;
        writeln!(tf, "{}", intent).at_path(tf.path())?;
        tf.as_file_mut().sync_all().at_path(tf.path())?;
        tf.persist(&self.path)
            .map_err(|e| e.error)
            .at_path(&self.path)?;
        Ok(())
    }

    /// Record that the current intent has been carried out.
    pub fn finish(&self) -> Result<(), Error> {
        if self.dry_run {
            return Ok(());
        }

        fs::remove_file(&self.path)
            .ignore_not_found()
            .at_path(&self.path)
    }
}
