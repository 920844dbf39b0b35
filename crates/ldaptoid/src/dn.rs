// SPDX-License-Identifier: Apache-2.0 OR MIT

//! DN construction, escaping, and suffix comparison (C11).
//!
//! Usernames and group names are already POSIX-safe by the time they reach
//! here (§3); this module only needs to escape the handful of RFC 4514
//! special characters and provide case-insensitive, whitespace-collapsed
//! comparison for scope/base matching.

/// Escape a single RDN attribute value per RFC 4514: `,`, `+`, `"`, `\`,
/// `<`, `>`, `;`, `=` are escaped anywhere, leading/trailing whitespace and
/// a leading `#` are escaped positionally.
pub fn escape_rdn_value(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let chars: Vec<char> = value.chars().collect();
    for (i, &c) in chars.iter().enumerate() {
        let needs_escape = matches!(c, ',' | '+' | '"' | '\\' | '<' | '>' | ';' | '=')
            || (i == 0 && (c == ' ' || c == '#'))
            || (i == chars.len() - 1 && c == ' ');
        if needs_escape {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

pub fn build_user_dn(username: &str, suffix: &str) -> String {
    format!("uid={},ou=users,{}", escape_rdn_value(username), suffix)
}

pub fn build_group_dn(name: &str, suffix: &str) -> String {
    format!("cn={},ou=groups,{}", escape_rdn_value(name), suffix)
}

pub fn users_ou_dn(suffix: &str) -> String {
    format!("ou=users,{suffix}")
}

pub fn groups_ou_dn(suffix: &str) -> String {
    format!("ou=groups,{suffix}")
}

/// Normalize a DN for comparison: lowercase, collapse internal whitespace
/// runs, trim ends. Not a full RFC 4514 DN parser/normalizer — sufficient
/// for the suffix/equality comparisons this core needs (§4.9, §4.10).
pub fn normalize_dn(dn: &str) -> String {
    let collapsed: String = dn
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ");
    collapsed.to_lowercase()
}

/// Is `candidate` equal to or a descendant DN of `suffix`, under
/// case-insensitive, whitespace-normalized comparison?
pub fn is_within_suffix(candidate: &str, suffix: &str) -> bool {
    let c = normalize_dn(candidate);
    let s = normalize_dn(suffix);
    if c == s {
        return true;
    }
    c.ends_with(&format!(",{s}"))
}

pub fn dn_eq(a: &str, b: &str) -> bool {
    normalize_dn(a) == normalize_dn(b)
}
