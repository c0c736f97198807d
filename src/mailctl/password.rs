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

//! Generation and hashing of account passwords.

use rand::{rngs::OsRng, CryptoRng, RngCore};

use crate::support::error::Error;
use crate::support::system_config::PasswordScheme;

const ARGON2ID_TAG: &str = "{ARGON2ID}";
const GENERATED_LEN: usize = 12;
const GENERATED_ENTROPY: usize = 21;
const CRYPT_SALT_LEN: usize = 16;
const CRYPT_SALT_CHARS: &[u8] =
    b"./0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz";

/// Produces clear-text passwords and their credential-store hashes from an
/// injected CSPRNG.
pub struct PasswordHasher<R> {
    rng: R,
    scheme: PasswordScheme,
}

impl PasswordHasher<OsRng> {
    pub fn system(scheme: PasswordScheme) -> Self {
        Self::new(OsRng, scheme)
    }
}

impl<R: RngCore + CryptoRng> PasswordHasher<R> {
    pub fn new(rng: R, scheme: PasswordScheme) -> Self {
        Self { rng, scheme }
    }

    /// Generate a fresh 12-character password.
    pub fn generate(&mut self) -> String {
        let mut data = [0u8; GENERATED_ENTROPY];
        self.rng.fill_bytes(&mut data);
        let mut password = base64::encode(&data[..]);
        password.truncate(GENERATED_LEN);
        password
    }

    /// Hash `password` with a fresh salt.
    pub fn hash(&mut self, password: &str) -> Result<String, Error> {
        match self.scheme {
            PasswordScheme::Sha512Crypt => self.hash_sha512_crypt(password),
            PasswordScheme::Argon2id => self.hash_argon2id(password),
        }
    }

    fn hash_sha512_crypt(&mut self, password: &str) -> Result<String, Error> {
        let rng = &mut self.rng;
        let salt = (0..CRYPT_SALT_LEN)
            .map(|_| {
                let ix = rng.next_u32() as usize % CRYPT_SALT_CHARS.len();
                CRYPT_SALT_CHARS[ix] as char
            })
            .collect::<String>();

        let setting = format!("$6${}", salt);
        pwhash::sha512_crypt::hash_with(setting.as_str(), password)
            .map_err(|e| Error::PasswordHash(e.to_string()))
    }

    fn hash_argon2id(&mut self, password: &str) -> Result<String, Error> {
        let mut salt = [0u8; 16];
        self.rng.fill_bytes(&mut salt);

        let encoded = argon2::hash_encoded(
            password.as_bytes(),
            &salt,
            &argon2::Config {
                hash_length: 32,
                lanes: 1,
                mem_cost: 65536,
                thread_mode: argon2::ThreadMode::Sequential,
                time_cost: 3,
                variant: argon2::Variant::Argon2id,
                version: argon2::Version::Version13,
                ..argon2::Config::default()
            },
        )
        .map_err(|e| Error::PasswordHash(e.to_string()))?;
        Ok(format!("{}{}", ARGON2ID_TAG, encoded))
    }

    /// Return the clear-text password (generating one if not given) along
    /// with its hash.
    pub fn resolve(
        &mut self,
        password: Option<String>,
    ) -> Result<(String, String), Error> {
        let password = match password {
            Some(p) => p,
            None => self.generate(),
        };
        let hash = self.hash(&password)?;
        Ok((password, hash))
    }
}

/// Check `password` against a credential-store hash of either scheme.
///
/// SHA512-CRYPT hashes may carry Dovecot's `{SHA512-CRYPT}` or `{CRYPT}`
/// tag. Anything else never matches.
#[cfg(test)]
pub fn verify(hash: &str, password: &str) -> bool {
    if let Some(encoded) = hash.strip_prefix(ARGON2ID_TAG) {
        return argon2::verify_encoded(encoded, password.as_bytes())
            .unwrap_or(false);
    }

    let crypt = ["{SHA512-CRYPT}", "{CRYPT}"]
        .iter()
        .find_map(|tag| hash.strip_prefix(tag))
        .unwrap_or(hash);
    crypt.starts_with("$6$") && pwhash::sha512_crypt::verify(password, crypt)
}
