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

use std::path::Path;
use std::process::Command;

use log::info;

use crate::support::error::Error;

/// Regenerates the compiled lookup table (e.g. the `.db` file produced by
/// Postfix's `postmap`) that mirrors a plain-text map file.
#[derive(Clone, Debug)]
pub struct IndexRebuilder {
    program: String,
    args: Vec<String>,
    dry_run: bool,
}

impl IndexRebuilder {
    /// `command` is split on whitespace; the map path is appended as the
    /// final argument.
    pub fn new(command: &str, dry_run: bool) -> Self {
        let mut words = command.split_whitespace().map(str::to_owned);
        Self {
            program: words.next().unwrap_or_default(),
            args: words.collect(),
            dry_run,
        }
    }

    /// Run the index tool against `path`, blocking until it exits.
    pub fn rebuild(&self, path: &Path) -> Result<(), Error> {
        if self.dry_run {
            info!("would run {} {}", self.program, path.display());
            return Ok(());
        }

        info!("running {} {}", self.program, path.display());
        let status = Command::new(&self.program)
            .args(&self.args)
            .arg(path)
            .status()
            .map_err(|source| Error::IndexRebuildSpawn {
                command: self.program.clone(),
                source,
            })?;

        if status.success() {
            Ok(())
        } else {
            Err(Error::IndexRebuild {
                path: path.to_owned(),
                status,
            })
        }
    }
}
