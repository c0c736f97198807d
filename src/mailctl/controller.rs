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

//! Account creation, removal and expiry across the three account stores.
//!
//! An account lives in three files at once:
//!
//! - the ledger: `email timestamp expiry origin`
//! - Dovecot's passwd-file: `email:hash:uid:gid::vmaildir::`
//! - Postfix's virtual mailbox map: `email email`, with a compiled index
//!
//! Every mutation holds the process lock for its whole sequence of store
//! edits. Each store edit is atomic by itself, but there is no transaction
//! across stores; the intent journal records which accounts an interrupted
//! run may have left half-written.

use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::path::{Path, PathBuf};

use chrono::prelude::*;
use log::info;
use rand::{rngs::OsRng, CryptoRng, RngCore};

use super::expiry::parse_expiry_code;
use super::journal::{Intent, IntentJournal};
use super::line_editor::{read_lines, Commit, LineEditor};
use super::password::PasswordHasher;
use super::postmap::IndexRebuilder;
use super::process_lock::ProcessLock;
use crate::support::error::Error;
use crate::support::safe_name::is_safe_name;
use crate::support::system_config::{Profile, SysConfig};

pub const LOCK_NAME: &str = "mailadm";

/// Source of the current time, in fractional seconds since the epoch.
pub trait Clock {
    fn now(&self) -> f64;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> f64 {
        let now = Utc::now();
        now.timestamp() as f64 + f64::from(now.timestamp_subsec_micros()) / 1e6
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct NewAccount {
    pub email: String,
    pub password: String,
    pub expires_at: f64,
}

/// A well-formed ledger line.
#[derive(Clone, Debug, PartialEq)]
pub struct LedgerRecord {
    pub email: String,
    pub created_at: f64,
    pub expiry_code: String,
    pub origin: String,
}

impl LedgerRecord {
    pub fn parse(line: &str) -> Option<Self> {
        let mut words = line.split_whitespace();
        match (
            words.next(),
            words.next(),
            words.next(),
            words.next(),
            words.next(),
        ) {
            (Some(email), Some(created), Some(expiry), Some(origin), None) => {
                Some(Self {
                    email: email.to_owned(),
                    created_at: created
                        .parse::<f64>()
                        .ok()
                        .filter(|t| t.is_finite())?,
                    expiry_code: expiry.to_owned(),
                    origin: origin.to_owned(),
                })
            }
            _ => None,
        }
    }

    pub fn expires_at(&self) -> Result<f64, Error> {
        Ok(self.created_at + parse_expiry_code(&self.expiry_code)? as f64)
    }
}

impl fmt::Display for LedgerRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {} {}",
            self.email, self.created_at, self.expiry_code, self.origin
        )
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum LedgerEntry {
    Record(LedgerRecord),
    Malformed(String),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum Store {
    Ledger,
    Credentials,
    Routing,
}

impl Store {
    const ALL: [Store; 3] = [Store::Ledger, Store::Credentials, Store::Routing];
}

impl fmt::Display for Store {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match *self {
            Store::Ledger => "ledger",
            Store::Credentials => "credential store",
            Store::Routing => "routing map",
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Discrepancy {
    Missing { email: String, store: Store },
    Duplicate { email: String, store: Store, count: usize },
}

impl fmt::Display for Discrepancy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Discrepancy::Missing { ref email, store } => {
                write!(f, "{}: missing from {}", email, store)
            }
            Discrepancy::Duplicate {
                ref email,
                store,
                count,
            } => write!(f, "{}: {} entries in {}", email, count, store),
        }
    }
}

fn ledger_email(line: &str) -> &str {
    line.split_whitespace().next().unwrap_or("")
}

fn credential_email(line: &str) -> &str {
    line.split(':').next().unwrap_or("")
}

fn routing_email(line: &str) -> &str {
    line.split_whitespace().next().unwrap_or("")
}

pub struct MailController<R = OsRng> {
    config: SysConfig,
    profile: Profile,
    editor: LineEditor,
    lock: ProcessLock,
    journal: IntentJournal,
    passwords: PasswordHasher<R>,
    clock: Box<dyn Clock>,
}

impl MailController<OsRng> {
    /// Create a controller for the stores named in `config`, which stamps
    /// new accounts with `profile` and keeps its lock in `lock_dir`.
    pub fn new(
        config: SysConfig,
        profile: Profile,
        lock_dir: &Path,
        dry_run: bool,
    ) -> Self {
        let index = IndexRebuilder::new(&config.postmap_command, dry_run);
        Self {
            editor: LineEditor::new(index, dry_run),
            lock: ProcessLock::new(lock_dir, LOCK_NAME),
            journal: IntentJournal::new(lock_dir, dry_run),
            passwords: PasswordHasher::system(config.password_scheme),
            clock: Box::new(SystemClock),
            config,
            profile,
        }
    }
}

impl<R: RngCore + CryptoRng> MailController<R> {
    pub fn with_rng<R2: RngCore + CryptoRng>(
        self,
        rng: R2,
    ) -> MailController<R2> {
        let scheme = self.config.password_scheme;
        MailController {
            config: self.config,
            profile: self.profile,
            editor: self.editor,
            lock: self.lock,
            journal: self.journal,
            passwords: PasswordHasher::new(rng, scheme),
            clock: self.clock,
        }
    }

    pub fn with_clock(self, clock: impl Clock + 'static) -> Self {
        Self {
            clock: Box::new(clock),
            ..self
        }
    }

    /// Where the MDA keeps the mail of `email`.
    ///
    /// The directory only exists once mail has been delivered.
    pub fn mailbox_dir(&self, email: &str) -> PathBuf {
        self.config.path_vmaildir.join(email)
    }

    /// Add `email` to all three stores.
    ///
    /// If `password` is `None`, a random one is generated. The clear-text
    /// password is returned and not retained anywhere.
    ///
    /// Panics if the credential store or routing map already hold `email`
    /// when the ledger does not, since the stores are then already out of
    /// sync.
    pub fn add_account(
        &mut self,
        email: &str,
        password: Option<String>,
    ) -> Result<NewAccount, Error> {
        let domain = &self.config.mail_domain;
        if !email.ends_with(&format!("@{}", domain)) {
            return Err(Error::DomainMismatch {
                email: email.to_owned(),
                domain: domain.clone(),
            });
        }

        if !is_safe_name(email) || email.starts_with('@') {
            return Err(Error::InvalidEmail(email.to_owned()));
        }

        let lifetime = parse_expiry_code(&self.profile.expiry)?;

        let lock = self.lock.clone();
        lock.with_lock(|| self.add_locked(email, password, lifetime))
    }

    fn add_locked(
        &mut self,
        email: &str,
        password: Option<String>,
        lifetime: u64,
    ) -> Result<NewAccount, Error> {
        let ledger = self.config.path_mailadm_db.clone();
        let users = self.config.path_dovecot_users.clone();
        let mailboxes = self.config.path_virtual_mailboxes.clone();

        // Nothing is written unless all three stores are free of the account
        if read_lines(&ledger)?.iter().any(|l| ledger_email(l) == email) {
            return Err(Error::AccountExists(email.to_owned()));
        }
        assert_absent(&users, email, credential_email)?;
        assert_absent(&mailboxes, email, routing_email)?;

        let (password, hash) = self.passwords.resolve(password)?;
        let record = LedgerRecord {
            email: email.to_owned(),
            created_at: self.clock.now(),
            expiry_code: self.profile.expiry.clone(),
            origin: self.profile.origin.clone(),
        };

        self.journal.begin(&Intent {
            op: "add".to_owned(),
            emails: vec![email.to_owned()],
        })?;

        let ledger_line = record.to_string();
        self.editor.edit_lines(&ledger, Commit::Atomic, |lines| {
            if lines.iter().any(|l| ledger_email(l) == email) {
                return Err(Error::AccountExists(email.to_owned()));
            }
            lines.push(ledger_line.clone());
            Ok(())
        })?;
        info!("added {:?} to {}", ledger_line, ledger.display());

        let users_line = format!(
            "{}:{}:{}:{}::{}::",
            email,
            hash,
            self.config.dovecot_uid,
            self.config.dovecot_gid,
            self.config.path_vmaildir.display(),
        );
        self.editor.edit_lines(&users, Commit::Atomic, |lines| {
            for line in lines.iter() {
                assert!(
                    credential_email(line) != email,
                    "{} already present in {}",
                    email,
                    users.display()
                );
            }
            lines.push(users_line);
            Ok(())
        })?;
        info!("added {} to {}", email, users.display());

        self.editor.edit_lines(&mailboxes, Commit::Indexed, |lines| {
            for line in lines.iter() {
                assert!(
                    routing_email(line) != email,
                    "{} already present in {}",
                    email,
                    mailboxes.display()
                );
            }
            lines.push(format!("{} {}", email, email));
            Ok(())
        })?;
        info!("added {} to {}", email, mailboxes.display());

        self.journal.finish()?;
        info!("vmaildir for {}: {}", email, self.mailbox_dir(email).display());

        Ok(NewAccount {
            email: email.to_owned(),
            password,
            expires_at: record.created_at + lifetime as f64,
        })
    }

    /// Remove accounts from all three stores.
    ///
    /// Each key is either a full ledger line or a bare email. Every email
    /// named by a key is removed from the credential store and routing map
    /// even if the ledger no longer has it, which is how accounts left behind
    /// by `prune_expired_accounts` are cleaned up.
    ///
    /// Returns each email found in the credential store together with its
    /// mailbox directory. The directories are not touched.
    pub fn remove_accounts<S: AsRef<str>>(
        &self,
        keys: &[S],
    ) -> Result<Vec<(String, PathBuf)>, Error> {
        self.lock.with_lock(|| self.remove_locked(keys))
    }

    fn remove_locked<S: AsRef<str>>(
        &self,
        keys: &[S],
    ) -> Result<Vec<(String, PathBuf)>, Error> {
        let keys: HashSet<&str> = keys
            .iter()
            .map(|k| k.as_ref().trim())
            .filter(|k| !k.is_empty())
            .collect();

        let mut emails =
            keys.iter().map(|k| ledger_email(k)).collect::<Vec<_>>();
        emails.sort_unstable();
        emails.dedup();
        if emails.is_empty() {
            return Ok(vec![]);
        }
        let email_set: HashSet<&str> = emails.iter().copied().collect();

        self.journal.begin(&Intent {
            op: "remove".to_owned(),
            emails: emails.iter().map(|&e| e.to_owned()).collect(),
        })?;

        let ledger = &self.config.path_mailadm_db;
        self.editor.edit_lines(ledger, Commit::Atomic, |lines| {
            lines.retain(|line| {
                let remove = keys.contains(line.trim())
                    || keys.contains(ledger_email(line));
                if remove {
                    info!("removing from {}: {}", ledger.display(), line);
                }
                !remove
            });
            Ok(())
        })?;

        let users = &self.config.path_dovecot_users;
        let mut removed =
            self.editor.edit_lines(users, Commit::Atomic, |lines| {
                let mut removed = Vec::new();
                lines.retain(|line| {
                    let email = credential_email(line);
                    if email_set.contains(email) {
                        info!("removing from {}: {}", users.display(), email);
                        removed.push(email.to_owned());
                        false
                    } else {
                        true
                    }
                });
                Ok(removed)
            })?;
        // A hand-edited store may list an email more than once
        removed.sort_unstable();
        removed.dedup();

        let mailboxes = &self.config.path_virtual_mailboxes;
        self.editor.edit_lines(mailboxes, Commit::Indexed, |lines| {
            lines.retain(|line| {
                let email = routing_email(line);
                let remove = email_set.contains(email);
                if remove {
                    info!("removing from {}: {}", mailboxes.display(), email);
                }
                !remove
            });
            Ok(())
        })?;

        self.journal.finish()?;

        Ok(removed
            .into_iter()
            .map(|email| {
                let dir = self.mailbox_dir(&email);
                (email, dir)
            })
            .collect())
    }

    /// Drop ledger lines of accounts that have outlived their expiry code and
    /// return their emails.
    ///
    /// Only the ledger is edited; follow up with `remove_accounts` to clear
    /// the other stores. With `dryrun`, the ledger is left as it is and the
    /// emails that would be pruned are returned.
    pub fn prune_expired_accounts(
        &self,
        dryrun: bool,
    ) -> Result<Vec<String>, Error> {
        self.lock.with_lock(|| {
            self.journal.warn_if_stale()?;

            let now = self.clock.now();
            let ledger = &self.config.path_mailadm_db;
            self.editor.edit_lines(ledger, Commit::Atomic, |lines| {
                let mut pruned = Vec::new();
                let mut kept = Vec::with_capacity(lines.len());

                for line in lines.iter() {
                    let expired = match LedgerRecord::parse(line) {
                        Some(record) => {
                            let lifetime =
                                parse_expiry_code(&record.expiry_code)?;
                            if now - record.created_at > lifetime as f64 {
                                Some(record.email)
                            } else {
                                None
                            }
                        }
                        // Lines we don't understand are left for a human
                        None => None,
                    };

                    match expired {
                        Some(email) => {
                            info!("expired: {}", line);
                            pruned.push(email);
                        }
                        None => kept.push(line.clone()),
                    }
                }

                if !dryrun {
                    *lines = kept;
                }
                Ok(pruned)
            })
        })
    }

    /// List the ledger, optionally only lines starting with `prefix`.
    ///
    /// This does not take the lock, so it may observe a concurrent
    /// modification half-way through.
    pub fn find_email_accounts(
        &self,
        prefix: Option<&str>,
    ) -> Result<Vec<LedgerEntry>, Error> {
        Ok(read_lines(&self.config.path_mailadm_db)?
            .into_iter()
            .filter(|line| prefix.map_or(true, |p| line.starts_with(p)))
            .map(|line| match LedgerRecord::parse(&line) {
                Some(record) => LedgerEntry::Record(record),
                None => LedgerEntry::Malformed(line),
            })
            .collect())
    }

    /// Scan all three stores (without locking) for accounts which are not
    /// present exactly once in each.
    pub fn check_consistency(&self) -> Result<Vec<Discrepancy>, Error> {
        let sources: [(Store, &Path, fn(&str) -> &str); 3] = [
            (
                Store::Ledger,
                self.config.path_mailadm_db.as_path(),
                ledger_email,
            ),
            (
                Store::Credentials,
                self.config.path_dovecot_users.as_path(),
                credential_email,
            ),
            (
                Store::Routing,
                self.config.path_virtual_mailboxes.as_path(),
                routing_email,
            ),
        ];

        let mut counts = BTreeMap::<String, [usize; 3]>::new();
        for &(store, path, key) in &sources {
            for line in read_lines(path)? {
                counts.entry(key(&line).to_owned()).or_default()
                    [store as usize] += 1;
            }
        }

        let mut discrepancies = Vec::new();
        for (email, count) in counts {
            for &store in &Store::ALL {
                match count[store as usize] {
                    1 => (),
                    0 => discrepancies.push(Discrepancy::Missing {
                        email: email.clone(),
                        store,
                    }),
                    n => discrepancies.push(Discrepancy::Duplicate {
                        email: email.clone(),
                        store,
                        count: n,
                    }),
                }
            }
        }

        Ok(discrepancies)
    }

    /// The operation left unfinished by an interrupted run, if any.
    pub fn pending_intent(&self) -> Result<Option<Intent>, Error> {
        self.journal.pending()
    }
}

fn assert_absent(
    path: &Path,
    email: &str,
    key: fn(&str) -> &str,
) -> Result<(), Error> {
    for line in read_lines(path)? {
        assert!(
            key(&line) != email,
            "{} already present in {}",
            email,
            path.display()
        );
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use std::fs;
    use std::os::unix::fs::MetadataExt;

    use rand::{rngs::StdRng, SeedableRng};
    use rayon::prelude::*;
    use tempfile::TempDir;

    use super::*;
    use crate::mailctl::password::verify;
    use crate::support::system_config::PasswordScheme;

    const NOW: f64 = 1_000_000_000.0;
    const WEEK: f64 = 7.0 * 24.0 * 3600.0;

    struct FixedClock(f64);

    impl Clock for FixedClock {
        fn now(&self) -> f64 {
            self.0
        }
    }

    struct Setup {
        root: TempDir,
        config: SysConfig,
        rebuild_log: PathBuf,
    }

    impl Setup {
        fn controller(&self) -> MailController<StdRng> {
            self.controller_with(NOW, false)
        }

        fn controller_with(
            &self,
            now: f64,
            dry_run: bool,
        ) -> MailController<StdRng> {
            MailController::new(
                self.config.clone(),
                Profile {
                    origin: "oneweek".to_owned(),
                    expiry: "1w".to_owned(),
                },
                self.root.path(),
                dry_run,
            )
            .with_rng(StdRng::seed_from_u64(42))
            .with_clock(FixedClock(now))
        }

        fn ledger(&self) -> Vec<String> {
            read_lines(&self.config.path_mailadm_db).unwrap()
        }

        fn users(&self) -> Vec<String> {
            read_lines(&self.config.path_dovecot_users).unwrap()
        }

        fn mailboxes(&self) -> Vec<String> {
            read_lines(&self.config.path_virtual_mailboxes).unwrap()
        }

        fn snapshot(&self) -> Vec<Vec<u8>> {
            vec![
                fs::read(&self.config.path_mailadm_db).unwrap(),
                fs::read(&self.config.path_dovecot_users).unwrap(),
                fs::read(&self.config.path_virtual_mailboxes).unwrap(),
            ]
        }

        fn rebuilds(&self) -> usize {
            fs::read_to_string(&self.rebuild_log)
                .unwrap_or_default()
                .lines()
                .count()
        }
    }

    fn set_up() -> Setup {
        crate::init_test_log();

        let root = TempDir::new().unwrap();
        let dir = root.path();
        for name in &["mailadmdb", "users", "virtual_mailboxes"] {
            fs::write(dir.join(name), "").unwrap();
        }
        fs::create_dir(dir.join("vmail")).unwrap();

        let rebuild_log = dir.join("rebuilds");
        let script = dir.join("fake-postmap");
        fs::write(
            &script,
            format!("#!/bin/sh\necho \"$1\" >> '{}'\n", rebuild_log.display()),
        )
        .unwrap();

        let config = SysConfig {
            mail_domain: "x.org".to_owned(),
            path_mailadm_db: dir.join("mailadmdb"),
            path_dovecot_users: dir.join("users"),
            path_virtual_mailboxes: dir.join("virtual_mailboxes"),
            path_vmaildir: dir.join("vmail"),
            dovecot_uid: 1000,
            dovecot_gid: 1001,
            postmap_command: format!("sh {}", script.display()),
            password_scheme: PasswordScheme::Sha512Crypt,
            lock_dir: None,
        };

        Setup {
            root,
            config,
            rebuild_log,
        }
    }

    #[test]
    fn add_writes_one_line_per_store() {
        let setup = set_up();
        let account =
            setup.controller().add_account("bob@x.org", None).unwrap();

        assert_eq!("bob@x.org", account.email);
        assert_eq!(12, account.password.len());
        assert_eq!(NOW + WEEK, account.expires_at);

        assert_eq!(vec!["bob@x.org 1000000000 1w oneweek"], setup.ledger());
        assert_eq!(vec!["bob@x.org bob@x.org"], setup.mailboxes());

        let users = setup.users();
        assert_eq!(1, users.len());
        let fields = users[0].split(':').collect::<Vec<_>>();
        assert_eq!(
            vec![
                "bob@x.org",
                fields[1],
                "1000",
                "1001",
                "",
                &*setup.config.path_vmaildir.to_string_lossy(),
                "",
                "",
            ],
            fields
        );
        assert!(verify(fields[1], &account.password));

        assert_eq!(1, setup.rebuilds());
        assert_eq!(None, setup.controller().pending_intent().unwrap());
        assert!(setup.controller().check_consistency().unwrap().is_empty());
    }

    #[test]
    fn add_with_explicit_password() {
        let setup = set_up();
        let account = setup
            .controller()
            .add_account("bob@x.org", Some("p@ss".to_owned()))
            .unwrap();
        assert_eq!("p@ss", account.password);

        let users = setup.users();
        let hash = users[0].split(':').nth(1).unwrap();
        assert!(verify(hash, "p@ss"));
        assert!(!verify(hash, "wrong"));
    }

    #[test]
    fn add_existing_account_changes_nothing() {
        let setup = set_up();
        let mut controller = setup.controller();
        controller.add_account("bob@x.org", None).unwrap();
        let before = setup.snapshot();

        assert_matches!(
            Err(Error::AccountExists(_)),
            controller.add_account("bob@x.org", None)
        );
        assert_eq!(before, setup.snapshot());
        assert_eq!(1, setup.rebuilds());
        assert_eq!(None, controller.pending_intent().unwrap());
    }

    #[test]
    fn add_rejects_foreign_and_malformed_addresses() {
        let setup = set_up();
        let mut controller = setup.controller();

        for email in &["bob@y.org", "bob@evilx.org", "bob", "bob@x.org.uk"] {
            assert_matches!(
                Err(Error::DomainMismatch { .. }),
                controller.add_account(email, None)
            );
        }
        for email in &["@x.org", "b ob@x.org", "b:ob@x.org", "../@x.org"] {
            assert_matches!(
                Err(Error::InvalidEmail(_)),
                controller.add_account(email, None)
            );
        }

        assert!(setup.ledger().is_empty());
        assert_eq!(0, setup.rebuilds());
    }

    #[test]
    fn add_with_bad_profile_expiry_changes_nothing() {
        let setup = set_up();
        let mut controller = MailController::new(
            setup.config.clone(),
            Profile {
                origin: "broken".to_owned(),
                expiry: "1fortnight".to_owned(),
            },
            setup.root.path(),
            false,
        );
        assert_matches!(
            Err(Error::InvalidExpiryCode(_)),
            controller.add_account("bob@x.org", None)
        );
        assert!(setup.ledger().is_empty());
    }

    #[test]
    #[should_panic(expected = "already present")]
    fn add_over_orphaned_credentials_is_fatal() {
        let setup = set_up();
        fs::write(&setup.config.path_dovecot_users, "bob@x.org:h:1:1::/::\n")
            .unwrap();
        let _ = setup.controller().add_account("bob@x.org", None);
    }

    #[test]
    fn dry_run_add_reports_without_writing() {
        let setup = set_up();
        let before = setup.snapshot();
        let account = setup
            .controller_with(NOW, true)
            .add_account("bob@x.org", None)
            .unwrap();

        assert_eq!(NOW + WEEK, account.expires_at);
        assert_eq!(before, setup.snapshot());
        assert_eq!(0, setup.rebuilds());
        assert_eq!(None, setup.controller().pending_intent().unwrap());
    }

    #[test]
    fn add_then_remove_clears_all_stores() {
        let setup = set_up();
        let mut controller = setup.controller();
        controller.add_account("bob@x.org", None).unwrap();
        controller.add_account("carol@x.org", None).unwrap();

        let removed = controller.remove_accounts(&["bob@x.org"]).unwrap();
        assert_eq!(
            vec![(
                "bob@x.org".to_owned(),
                setup.config.path_vmaildir.join("bob@x.org")
            )],
            removed
        );

        assert_eq!(vec!["carol@x.org 1000000000 1w oneweek"], setup.ledger());
        assert_eq!(1, setup.users().len());
        assert!(setup.users()[0].starts_with("carol@x.org:"));
        assert_eq!(vec!["carol@x.org carol@x.org"], setup.mailboxes());
        assert_eq!(3, setup.rebuilds());
        assert_eq!(None, controller.pending_intent().unwrap());
    }

    #[test]
    fn remove_by_full_ledger_line() {
        let setup = set_up();
        let mut controller = setup.controller();
        controller.add_account("bob@x.org", None).unwrap();

        let line = format!("  {}\n", setup.ledger()[0]);
        let removed = controller.remove_accounts(&[line]).unwrap();
        assert_eq!(1, removed.len());
        assert!(setup.ledger().is_empty());
        assert!(setup.users().is_empty());
        assert!(setup.mailboxes().is_empty());
    }

    #[test]
    fn remove_unknown_account_writes_nothing() {
        let setup = set_up();
        let mut controller = setup.controller();
        controller.add_account("bob@x.org", None).unwrap();
        let inode = fs::metadata(&setup.config.path_dovecot_users)
            .unwrap()
            .ino();

        assert!(controller
            .remove_accounts(&["nobody@x.org", ""])
            .unwrap()
            .is_empty());
        assert!(controller.remove_accounts::<&str>(&[]).unwrap().is_empty());

        assert_eq!(
            inode,
            fs::metadata(&setup.config.path_dovecot_users)
                .unwrap()
                .ino()
        );
        assert_eq!(1, setup.rebuilds());
    }

    #[test]
    fn remove_reports_duplicated_credentials_once() {
        let setup = set_up();
        let mut controller = setup.controller();
        controller.add_account("bob@x.org", None).unwrap();
        let mut users = fs::read_to_string(&setup.config.path_dovecot_users)
            .unwrap();
        users.push_str("bob@x.org:h:1:1::/::\n");
        fs::write(&setup.config.path_dovecot_users, users).unwrap();

        let removed = controller.remove_accounts(&["bob@x.org"]).unwrap();
        assert_eq!(
            vec![(
                "bob@x.org".to_owned(),
                setup.config.path_vmaildir.join("bob@x.org")
            )],
            removed
        );
        assert!(setup.users().is_empty());
    }

    #[test]
    fn prune_proceeds_past_interrupted_operation() {
        let setup = set_up();
        let interrupted = Intent {
            op: "add".to_owned(),
            emails: vec!["bob@x.org".to_owned()],
        };
        IntentJournal::new(setup.root.path(), false)
            .begin(&interrupted)
            .unwrap();
        fs::write(
            &setup.config.path_mailadm_db,
            "alice@x.org 1000000000 1w a\n",
        )
        .unwrap();

        let pruned = setup
            .controller_with(NOW + 2.0 * WEEK, false)
            .prune_expired_accounts(false)
            .unwrap();
        assert_eq!(vec!["alice@x.org".to_owned()], pruned);
        // Prune only reports the leftover; it does not own it
        assert_eq!(
            Some(interrupted),
            setup.controller().pending_intent().unwrap()
        );
    }

    #[test]
    fn prune_scenario() {
        let setup = set_up();
        fs::write(
            &setup.config.path_mailadm_db,
            "alice@x.org 1000000000 1w originA\n\
             this line is not a ledger record\n\
             bob@x.org 1000000001 1w originA\n\
             carol@x.org 1000000000.5 never originB\n",
        )
        .unwrap();
        let now = NOW + WEEK + 1.0;

        let preview =
            setup.controller_with(now, false).prune_expired_accounts(true);
        assert_eq!(vec!["alice@x.org".to_owned()], preview.unwrap());
        assert_eq!(4, setup.ledger().len());

        let pruned = setup
            .controller_with(now, false)
            .prune_expired_accounts(false)
            .unwrap();
        assert_eq!(vec!["alice@x.org".to_owned()], pruned);
        assert_eq!(
            vec![
                "this line is not a ledger record",
                "bob@x.org 1000000001 1w originA",
                "carol@x.org 1000000000.5 never originB",
            ],
            setup.ledger()
        );
        // Only the ledger is touched
        assert_eq!(0, setup.rebuilds());
    }

    #[test]
    fn prune_invalid_expiry_changes_nothing() {
        let setup = set_up();
        fs::write(
            &setup.config.path_mailadm_db,
            "alice@x.org 1 1w a\nbob@x.org 1 1q b\n",
        )
        .unwrap();
        let before = setup.snapshot();

        assert_matches!(
            Err(Error::InvalidExpiryCode(_)),
            setup.controller().prune_expired_accounts(false)
        );
        assert_eq!(before, setup.snapshot());
    }

    #[test]
    fn pruned_accounts_are_cleaned_up_by_remove() {
        let setup = set_up();
        setup.controller().add_account("alice@x.org", None).unwrap();
        setup.controller().add_account("bob@x.org", None).unwrap();

        let later = setup.controller_with(NOW + 2.0 * WEEK, false);
        fs::write(
            &setup.config.path_mailadm_db,
            format!(
                "alice@x.org {} 1w oneweek\nbob@x.org {} 1w oneweek\n",
                NOW,
                NOW + 1.5 * WEEK,
            ),
        )
        .unwrap();

        let pruned = later.prune_expired_accounts(false).unwrap();
        assert_eq!(vec!["alice@x.org".to_owned()], pruned);
        assert_eq!(
            vec![Discrepancy::Missing {
                email: "alice@x.org".to_owned(),
                store: Store::Ledger,
            }],
            later.check_consistency().unwrap()
        );

        let removed = later.remove_accounts(&pruned).unwrap();
        assert_eq!(
            vec![(
                "alice@x.org".to_owned(),
                setup.config.path_vmaildir.join("alice@x.org")
            )],
            removed
        );
        assert!(later.check_consistency().unwrap().is_empty());
        assert_eq!(1, setup.users().len());
    }

    #[test]
    fn prune_boundary_is_exclusive() {
        let setup = set_up();
        fs::write(
            &setup.config.path_mailadm_db,
            "alice@x.org 1000000000 1w a\n",
        )
        .unwrap();

        assert!(setup
            .controller_with(NOW + WEEK, false)
            .prune_expired_accounts(false)
            .unwrap()
            .is_empty());
        assert_eq!(1, setup.ledger().len());
    }

    #[test]
    fn find_email_accounts_lists_ledger() {
        let setup = set_up();
        fs::write(
            &setup.config.path_mailadm_db,
            "tmp.a@x.org 5 1d burner\n\nbob@x.org 7.5 1w oneweek\nodd line\n",
        )
        .unwrap();
        let controller = setup.controller();

        let all = controller.find_email_accounts(None).unwrap();
        assert_eq!(3, all.len());
        assert_eq!(LedgerEntry::Malformed("odd line".to_owned()), all[2]);

        let tmp = controller.find_email_accounts(Some("tmp.")).unwrap();
        assert_eq!(
            vec![LedgerEntry::Record(LedgerRecord {
                email: "tmp.a@x.org".to_owned(),
                created_at: 5.0,
                expiry_code: "1d".to_owned(),
                origin: "burner".to_owned(),
            })],
            tmp
        );
        match tmp[0] {
            LedgerEntry::Record(ref r) => {
                assert_eq!(5.0 + 86400.0, r.expires_at().unwrap())
            }
            LedgerEntry::Malformed(_) => unreachable!(),
        }
    }

    #[test]
    fn ledger_record_parsing() {
        assert!(LedgerRecord::parse("a@x.org nan 1w o").is_none());
        assert!(LedgerRecord::parse("a@x.org 1 1w").is_none());
        assert!(LedgerRecord::parse("a@x.org 1 1w o extra").is_none());
        assert!(LedgerRecord::parse("a@x.org soon 1w o").is_none());
        let r = LedgerRecord::parse("a@x.org 1600000000.25 2d o").unwrap();
        assert_eq!("a@x.org 1600000000.25 2d o", r.to_string());
    }

    #[test]
    fn consistency_reports_duplicates() {
        let setup = set_up();
        setup.controller().add_account("bob@x.org", None).unwrap();
        fs::write(
            &setup.config.path_virtual_mailboxes,
            "bob@x.org bob@x.org\nbob@x.org other@x.org\n",
        )
        .unwrap();

        assert_eq!(
            vec![Discrepancy::Duplicate {
                email: "bob@x.org".to_owned(),
                store: Store::Routing,
                count: 2,
            }],
            setup.controller().check_consistency().unwrap()
        );
    }

    #[test]
    fn failed_index_rebuild_leaves_intent() {
        let mut setup = set_up();
        setup.config.postmap_command = "false".to_owned();

        assert_matches!(
            Err(Error::IndexRebuild { .. }),
            setup.controller().add_account("bob@x.org", None)
        );
        // The text stores are committed; only the index is stale
        assert_eq!(1, setup.ledger().len());
        assert_eq!(1, setup.users().len());
        assert_eq!(vec!["bob@x.org bob@x.org"], setup.mailboxes());
        assert_eq!(
            Some(Intent {
                op: "add".to_owned(),
                emails: vec!["bob@x.org".to_owned()],
            }),
            setup.controller().pending_intent().unwrap()
        );

        setup.config.postmap_command = "true".to_owned();
        setup.controller().add_account("carol@x.org", None).unwrap();
        assert_eq!(None, setup.controller().pending_intent().unwrap());
    }

    #[test]
    fn concurrent_adds_are_serialised() {
        let setup = set_up();

        let results = (0..8)
            .into_par_iter()
            .map(|i| {
                setup
                    .controller()
                    .add_account(&format!("user{}@x.org", i % 4), None)
            })
            .collect::<Vec<_>>();

        assert_eq!(4, results.iter().filter(|r| r.is_ok()).count());
        for result in &results {
            if let Err(ref e) = *result {
                assert_matches!(Error::AccountExists(_), e);
            }
        }

        assert_eq!(4, setup.ledger().len());
        assert_eq!(4, setup.users().len());
        assert_eq!(4, setup.mailboxes().len());
        assert!(setup.controller().check_consistency().unwrap().is_empty());
    }
}
