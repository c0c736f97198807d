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

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// The system-wide configuration for Mailadm.
///
/// This is stored in a file named `mailadm.toml`, typically under
/// `/etc/mailadm` or `/usr/local/etc/mailadm`.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct SystemConfig {
    /// Locations and identities shared with Postfix and Dovecot.
    pub sysconfig: SysConfig,

    /// Account-creation profiles, keyed by name.
    ///
    /// The name is recorded as the origin of every account created through
    /// the profile.
    #[serde(default)]
    pub token: BTreeMap<String, TokenConfig>,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct SysConfig {
    /// Every account address must be on this domain.
    pub mail_domain: String,
    /// The account ledger (`email timestamp expiry origin`).
    pub path_mailadm_db: PathBuf,
    /// Dovecot's passwd-file.
    pub path_dovecot_users: PathBuf,
    /// Postfix's virtual mailbox map. Its compiled index is rebuilt with
    /// `postmap_command` after every change.
    pub path_virtual_mailboxes: PathBuf,
    /// The root under which each account's mailbox directory lives.
    pub path_vmaildir: PathBuf,
    pub dovecot_uid: u32,
    pub dovecot_gid: u32,
    /// The command which compiles `path_virtual_mailboxes`. The map path is
    /// passed as the final argument.
    #[serde(default = "default_postmap_command")]
    pub postmap_command: String,
    /// How passwords are hashed into `path_dovecot_users`.
    #[serde(default)]
    pub password_scheme: PasswordScheme,
    /// Where the lock and intent files live.
    ///
    /// If unset, the directory containing the configuration file is used.
    #[serde(default)]
    pub lock_dir: Option<PathBuf>,
}

/// A password hash format understood by Dovecot.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum PasswordScheme {
    /// `$6$salt$hash`, matched by Dovecot's default `CRYPT` scheme.
    Sha512Crypt,
    /// `{ARGON2ID}$argon2id$...`. Needs a Dovecot built with libsodium.
    Argon2id,
}

impl Default for PasswordScheme {
    fn default() -> Self {
        PasswordScheme::Sha512Crypt
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct TokenConfig {
    /// How long accounts created through this profile live.
    #[serde(default = "default_expiry")]
    pub expiry: String,
    /// Prefix of generated account names.
    #[serde(default)]
    pub prefix: String,
    /// The secret presented to the account-creation endpoint.
    #[serde(default)]
    pub token: String,
}

/// The origin and lifetime stamped onto newly created accounts.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Profile {
    pub origin: String,
    pub expiry: String,
}

fn default_postmap_command() -> String {
    "postmap".to_owned()
}

fn default_expiry() -> String {
    "1w".to_owned()
}

impl SystemConfig {
    pub fn profile(&self, name: &str) -> Option<Profile> {
        self.token.get(name).map(|token| Profile {
            origin: name.to_owned(),
            expiry: token.expiry.clone(),
        })
    }

    /// The first profile by name, or a one-week `cli` profile if none are
    /// configured.
    pub fn default_profile(&self) -> Profile {
        self.token
            .keys()
            .next()
            .and_then(|name| self.profile(name))
            .unwrap_or_else(|| Profile {
                origin: "cli".to_owned(),
                expiry: default_expiry(),
            })
    }
}
