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

//! Parsing of the compact expiry codes stored in the account ledger.
//!
//! A code is a decimal multiplier followed by a unit letter, e.g. `1w` or
//! `90d`. The literal `never` denotes an account that never expires.

use crate::support::error::Error;

const HOUR: u64 = 60 * 60;
const DAY: u64 = 24 * HOUR;

/// Convert `code` into a number of seconds.
pub fn parse_expiry_code(code: &str) -> Result<u64, Error> {
    let invalid = || Error::InvalidExpiryCode(code.to_owned());

    if "never" == code {
        return Ok(u64::MAX);
    }

    let unit = code.chars().last().ok_or_else(invalid)?;
    let unit_seconds = match unit {
        'h' => HOUR,
        'd' => DAY,
        'w' => 7 * DAY,
        'm' => 30 * DAY,
        'y' => 365 * DAY,
        _ => return Err(invalid()),
    };

    let multiplier = &code[..code.len() - unit.len_utf8()];
    // u64::from_str tolerates a leading '+', which we don't want in the ledger
    if multiplier.is_empty() || !multiplier.bytes().all(|b| b.is_ascii_digit())
    {
        return Err(invalid());
    }

    multiplier
        .parse::<u64>()
        .ok()
        .and_then(|n| n.checked_mul(unit_seconds))
        .ok_or_else(invalid)
}
