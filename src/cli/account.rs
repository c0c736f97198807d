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

use std::path::{Path, PathBuf};
use std::thread;

use chrono::prelude::*;
use log::{error, info, warn};

use super::main::{
    AddSubcommand, Environment, ListSubcommand, PruneSubcommand,
    RemoveSubcommand,
};
use crate::mailctl::controller::LedgerEntry;
use crate::mailctl::MailController;
use crate::support::error::Error;
use crate::support::file_ops;
use crate::support::safe_name::is_safe_name;
use crate::support::sysexits::*;

fn fail(e: Error) -> ! {
    die!(Sysexit::from(&e), "{}", e)
}

fn controller(env: &Environment, dry_run: bool) -> MailController {
    MailController::new(
        env.config.sysconfig.clone(),
        env.config.default_profile(),
        &env.lock_dir,
        dry_run,
    )
}

fn format_timestamp(timestamp: f64) -> String {
    match Utc.timestamp_opt(timestamp as i64, 0).single() {
        Some(t) if timestamp.is_finite() => t.to_rfc3339(),
        _ => "never".to_owned(),
    }
}

pub(super) fn add(env: &Environment, cmd: AddSubcommand) {
    let profile = match cmd.token {
        Some(ref name) => env.config.profile(name).unwrap_or_else(|| {
            die!(EX_USAGE, "No token profile named '{}' is configured", name)
        }),
        None => env.config.default_profile(),
    };

    let password = if cmd.prompt_password {
        match rpassword::prompt_password("Password: ").and_then(|a| {
            rpassword::prompt_password("Confirm: ").map(|b| (a, b))
        }) {
            Err(e) => die!(EX_NOINPUT, "Failed to read password: {}", e),
            Ok((a, b)) if a != b => die!(EX_DATAERR, "Passwords don't match"),
            Ok((a, _)) if a.is_empty() => die!(EX_NOINPUT, "No password given"),
            Ok((a, _)) => Some(a),
        }
    } else {
        cmd.password
    };

    let mut controller = MailController::new(
        env.config.sysconfig.clone(),
        profile,
        &env.lock_dir,
        cmd.dry_run,
    );

    let account = match controller.add_account(&cmd.email, password) {
        Ok(account) => account,
        Err(e) => fail(e),
    };

    println!("email: {}", account.email);
    println!("password: {}", account.password);
    println!("expires: {}", format_timestamp(account.expires_at));
}

pub(super) fn list(env: &Environment, cmd: ListSubcommand) {
    let entries = match controller(env, false)
        .find_email_accounts(cmd.prefix.as_deref())
    {
        Ok(entries) => entries,
        Err(e) => fail(e),
    };

    for entry in entries {
        match entry {
            LedgerEntry::Record(record) => {
                let expires = match record.expires_at() {
                    Ok(t) => format_timestamp(t),
                    Err(_) => format!("invalid '{}'", record.expiry_code),
                };
                println!(
                    "{}  created {}  expires {}  [{}]",
                    record.email,
                    format_timestamp(record.created_at),
                    expires,
                    record.origin
                );
            }
            LedgerEntry::Malformed(line) => println!("? {}", line),
        }
    }
}

pub(super) fn remove(env: &Environment, cmd: RemoveSubcommand) {
    let controller = controller(env, cmd.dry_run);
    let removed = match controller.remove_accounts(&cmd.emails) {
        Ok(removed) => removed,
        Err(e) => fail(e),
    };

    delete_mailbox_dirs(
        &env.config.sysconfig.path_vmaildir,
        removed,
        cmd.dry_run,
    );
}

pub(super) fn prune(env: &Environment, cmd: PruneSubcommand) {
    let controller = controller(env, cmd.dry_run);
    let pruned = match controller.prune_expired_accounts(cmd.dry_run) {
        Ok(pruned) => pruned,
        Err(e) => fail(e),
    };

    for email in &pruned {
        if cmd.dry_run {
            println!("would prune {}", email);
        } else {
            println!("pruned {}", email);
        }
    }

    if cmd.dry_run || pruned.is_empty() {
        return;
    }

    let removed = match controller.remove_accounts(&pruned) {
        Ok(removed) => removed,
        Err(e) => fail(e),
    };
    delete_mailbox_dirs(&env.config.sysconfig.path_vmaildir, removed, false);
}

pub(super) fn check(env: &Environment) {
    let controller = controller(env, false);
    let discrepancies = match controller.check_consistency() {
        Ok(d) => d,
        Err(e) => fail(e),
    };
    let pending = match controller.pending_intent() {
        Ok(p) => p,
        Err(e) => fail(e),
    };

    for discrepancy in &discrepancies {
        println!("{}", discrepancy);
    }
    if let Some(ref intent) = pending {
        println!("interrupted operation: {}", intent);
    }

    if !discrepancies.is_empty() || pending.is_some() {
        EX_DATAERR.exit();
    }
}

fn delete_mailbox_dirs(
    vmaildir: &Path,
    removed: Vec<(String, PathBuf)>,
    dry_run: bool,
) {
    let mut pending = Vec::new();
    for (email, dir) in removed {
        // The stores could have been edited by hand
        if !is_safe_name(&email) {
            warn!("not deleting mailbox of unsafe name {:?}", email);
            continue;
        }

        if !dir.is_dir() {
            info!("{} has no mailbox directory", email);
            continue;
        }

        if dry_run {
            println!("would remove {}", dir.display());
            continue;
        }

        match file_ops::delete_async(&dir, vmaildir) {
            Ok(handle) => {
                println!("removed {}", dir.display());
                pending.push((dir, handle));
            }
            Err(e) => error!("Failed to remove {}: {}", dir.display(), e),
        }
    }

    join_deletions(pending);
}

/// Wait for background deletions, returning how many of them panicked.
fn join_deletions(pending: Vec<(PathBuf, thread::JoinHandle<()>)>) -> usize {
    let mut panicked = 0;
    for (dir, handle) in pending {
        if handle.join().is_err() {
            error!("Deletion of {} panicked", dir.display());
            panicked += 1;
        }
    }
    panicked
}
