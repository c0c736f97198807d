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

/// Determine whether `name` can safely be written into the account stores
/// and used as a mailbox directory name under the vmail root.
///
/// This excludes anything that would break the line formats of the stores
/// (whitespace separates ledger and map fields, `:` separates passwd-file
/// fields) as well as patterns that cause directory traversal or hidden
/// files.
pub fn is_safe_name(name: &str) -> bool {
    !name.is_empty() &&
        // Block directory traversal through .. and creation of hidden files
        !name.starts_with('.') &&
        !name.contains('/') &&
        !name.contains('\\') &&
        !name.contains(':') &&
        // Also covers the ASCII control characters
        !name.contains(|c: char| c.is_whitespace() || c.is_control())
}

#[cfg(test)]
mod test {
    use super::is_safe_name;

    #[test]
    fn test_is_safe_name() {
        assert!(is_safe_name("alice@x.org"));
        assert!(is_safe_name("tmp.k3j4@testrun.org"));
        assert!(is_safe_name("jürgen@x.org"));
        assert!(!is_safe_name(""));
        assert!(!is_safe_name("."));
        assert!(!is_safe_name(".."));
        assert!(!is_safe_name(".alice@x.org"));
        assert!(!is_safe_name("../x.org"));
        assert!(!is_safe_name("a/b@x.org"));
        assert!(!is_safe_name("a\\b@x.org"));
        assert!(!is_safe_name("a:b@x.org"));
        assert!(!is_safe_name("a b@x.org"));
        assert!(!is_safe_name("a\tb@x.org"));
        assert!(!is_safe_name("a\u{a0}b@x.org"));
        assert!(!is_safe_name("ab@x.org\n"));
        assert!(!is_safe_name("a\x7Fb@x.org"));
    }
}
