//! String matching: comparators, match types and address parts.
//!
//! A match is always the triple `(address-part, match-type, comparator)`.
//! Defaults are `(:all, :is, i;ascii-casemap)`. The triple is resolved at
//! validation, persisted as optional operands, and applied at runtime.

use crate::error::RuntimeError;

/// Named string equality/ordering function.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparator {
    /// `i;octet` — byte-wise comparison.
    Octet,
    /// `i;ascii-casemap` — ASCII letters compare case-insensitively.
    AsciiCasemap,
    /// `i;ascii-numeric` — decimal prefixes compare numerically; values
    /// without a leading digit compare as positive infinity.
    AsciiNumeric,
}

impl Comparator {
    pub fn by_name(name: &str) -> Option<Self> {
        match name {
            "i;octet" => Some(Comparator::Octet),
            "i;ascii-casemap" => Some(Comparator::AsciiCasemap),
            "i;ascii-numeric" => Some(Comparator::AsciiNumeric),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Comparator::Octet => "i;octet",
            Comparator::AsciiCasemap => "i;ascii-casemap",
            Comparator::AsciiNumeric => "i;ascii-numeric",
        }
    }

    /// All built-in comparator names, for the capability string.
    pub fn names() -> &'static [&'static str] {
        &["i;octet", "i;ascii-casemap", "i;ascii-numeric"]
    }

    pub fn equals(self, a: &str, b: &str) -> bool {
        match self {
            Comparator::Octet => a == b,
            Comparator::AsciiCasemap => a.eq_ignore_ascii_case(b),
            Comparator::AsciiNumeric => numeric_value(a) == numeric_value(b),
        }
    }

    /// Substring containment under this comparator.
    pub fn contains(self, haystack: &str, needle: &str) -> bool {
        match self {
            Comparator::Octet => haystack.contains(needle),
            Comparator::AsciiCasemap => {
                let haystack = haystack.to_ascii_lowercase();
                let needle = needle.to_ascii_lowercase();
                haystack.contains(&needle)
            }
            // Containment is not defined for a numeric collation; fall back
            // to octet semantics like the reference implementation does.
            Comparator::AsciiNumeric => haystack.contains(needle),
        }
    }
}

/// Decimal prefix value used by `i;ascii-numeric`; `None` is infinity.
fn numeric_value(s: &str) -> Option<u64> {
    let digits: String = s.chars().take_while(|c| c.is_ascii_digit()).collect();
    if digits.is_empty() {
        return None;
    }
    // Overlong prefixes saturate rather than wrap.
    Some(digits.parse::<u64>().unwrap_or(u64::MAX))
}

/// How a key is compared against a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchType {
    Is,
    Contains,
    Matches,
}

impl MatchType {
    pub fn by_name(name: &str) -> Option<Self> {
        match name {
            "is" => Some(MatchType::Is),
            "contains" => Some(MatchType::Contains),
            "matches" => Some(MatchType::Matches),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            MatchType::Is => "is",
            MatchType::Contains => "contains",
            MatchType::Matches => "matches",
        }
    }

    pub(crate) fn code(self) -> u8 {
        match self {
            MatchType::Is => 0,
            MatchType::Contains => 1,
            MatchType::Matches => 2,
        }
    }

    pub(crate) fn from_code(code: u8) -> Result<Self, RuntimeError> {
        match code {
            0 => Ok(MatchType::Is),
            1 => Ok(MatchType::Contains),
            2 => Ok(MatchType::Matches),
            other => Err(RuntimeError::Corrupt(format!(
                "invalid match-type code {other}"
            ))),
        }
    }
}

/// Which part of an address participates in a match.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressPart {
    All,
    Localpart,
    Domain,
}

impl AddressPart {
    pub fn by_name(name: &str) -> Option<Self> {
        match name {
            "all" => Some(AddressPart::All),
            "localpart" => Some(AddressPart::Localpart),
            "domain" => Some(AddressPart::Domain),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            AddressPart::All => "all",
            AddressPart::Localpart => "localpart",
            AddressPart::Domain => "domain",
        }
    }

    pub(crate) fn code(self) -> u8 {
        match self {
            AddressPart::All => 0,
            AddressPart::Localpart => 1,
            AddressPart::Domain => 2,
        }
    }

    pub(crate) fn from_code(code: u8) -> Result<Self, RuntimeError> {
        match code {
            0 => Ok(AddressPart::All),
            1 => Ok(AddressPart::Localpart),
            2 => Ok(AddressPart::Domain),
            other => Err(RuntimeError::Corrupt(format!(
                "invalid address-part code {other}"
            ))),
        }
    }
}

/// Resolved `(address-part, match-type, comparator)` triple.
///
/// Installed as node context by the validator for match-capable tests and
/// mutated by the tag hooks; the default is what an untagged test gets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MatchSpec {
    pub address_part: AddressPart,
    pub match_type: MatchType,
    pub comparator: Comparator,
}

impl Default for MatchSpec {
    fn default() -> Self {
        Self {
            address_part: AddressPart::All,
            match_type: MatchType::Is,
            comparator: Comparator::AsciiCasemap,
        }
    }
}

impl MatchSpec {
    /// Apply the match type and comparator to one value/key pair.
    pub fn matches(&self, value: &str, key: &str) -> bool {
        match self.match_type {
            MatchType::Is => self.comparator.equals(value, key),
            MatchType::Contains => self.comparator.contains(value, key),
            MatchType::Matches => glob_match(
                key,
                value,
                matches!(self.comparator, Comparator::AsciiCasemap),
            ),
        }
    }
}

/// Sieve `:matches` glob: `*` spans any run, `?` one character, `\` quotes
/// the next pattern character.
fn glob_match(pattern: &str, value: &str, fold_case: bool) -> bool {
    let fold = |c: char| {
        if fold_case {
            c.to_ascii_lowercase()
        } else {
            c
        }
    };
    let pat: Vec<char> = pattern.chars().collect();
    let val: Vec<char> = value.chars().collect();

    // Two-pointer scan with backtracking to the most recent star.
    let (mut p, mut v) = (0usize, 0usize);
    let mut star: Option<(usize, usize)> = None;
    while v < val.len() {
        let lit = match pat.get(p) {
            Some('\\') => pat.get(p + 1).map(|&c| (c, 2)),
            Some('?') => {
                p += 1;
                v += 1;
                continue;
            }
            Some('*') => {
                star = Some((p, v));
                p += 1;
                continue;
            }
            Some(&c) => Some((c, 1)),
            None => None,
        };
        match lit {
            Some((c, width)) if fold(c) == fold(val[v]) => {
                p += width;
                v += 1;
            }
            _ => match star {
                Some((sp, sv)) => {
                    p = sp + 1;
                    v = sv + 1;
                    star = Some((sp, sv + 1));
                }
                None => return false,
            },
        }
    }
    while pat.get(p) == Some(&'*') {
        p += 1;
    }
    p == pat.len()
}

/// One parsed email address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Address {
    pub local: String,
    pub domain: String,
}

impl Address {
    pub fn part(&self, part: AddressPart) -> String {
        match part {
            AddressPart::All if self.domain.is_empty() => self.local.clone(),
            AddressPart::All => format!("{}@{}", self.local, self.domain),
            AddressPart::Localpart => self.local.clone(),
            AddressPart::Domain => self.domain.clone(),
        }
    }
}

/// Parse a header value as a list of addresses.
///
/// Handles the common forms: bare `addr@spec`, `Display Name <addr@spec>`,
/// quoted local parts and comma-separated lists. Comments and group syntax
/// are tolerated but not interpreted; entries without an address yield
/// nothing.
pub fn parse_addresses(value: &str) -> Vec<Address> {
    split_address_list(value)
        .into_iter()
        .filter_map(|entry| parse_single_address(&entry))
        .collect()
}

/// Split on top-level commas, respecting quoted strings and angle brackets.
fn split_address_list(value: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut in_quote = false;
    let mut depth = 0i32;
    let mut chars = value.chars();
    while let Some(ch) = chars.next() {
        match ch {
            '\\' if in_quote => {
                current.push(ch);
                if let Some(next) = chars.next() {
                    current.push(next);
                }
            }
            '"' => {
                in_quote = !in_quote;
                current.push(ch);
            }
            '<' | '(' if !in_quote => {
                depth += 1;
                current.push(ch);
            }
            '>' | ')' if !in_quote => {
                depth -= 1;
                current.push(ch);
            }
            ',' if !in_quote && depth <= 0 => {
                parts.push(std::mem::take(&mut current));
            }
            _ => current.push(ch),
        }
    }
    parts.push(current);
    parts
        .into_iter()
        .map(|p| p.trim().to_string())
        .filter(|p| !p.is_empty())
        .collect()
}

fn parse_single_address(entry: &str) -> Option<Address> {
    // Prefer an angle-addr if present.
    let spec = match (entry.rfind('<'), entry.rfind('>')) {
        (Some(open), Some(close)) if open < close => &entry[open + 1..close],
        _ => entry,
    };
    let spec = strip_comments(spec);
    let spec = spec.trim();
    if spec.is_empty() {
        return None;
    }
    match spec.rfind('@') {
        Some(at) => Some(Address {
            local: unquote_local(&spec[..at]),
            domain: spec[at + 1..].trim().to_string(),
        }),
        None => Some(Address {
            local: unquote_local(spec),
            domain: String::new(),
        }),
    }
}

fn strip_comments(s: &str) -> String {
    let mut out = String::new();
    let mut depth = 0;
    for ch in s.chars() {
        match ch {
            '(' => depth += 1,
            ')' if depth > 0 => depth -= 1,
            _ if depth == 0 => out.push(ch),
            _ => {}
        }
    }
    out
}

fn unquote_local(s: &str) -> String {
    let s = s.trim();
    if s.len() >= 2 && s.starts_with('"') && s.ends_with('"') {
        let mut out = String::new();
        let mut chars = s[1..s.len() - 1].chars();
        while let Some(ch) = chars.next() {
            if ch == '\\' {
                if let Some(next) = chars.next() {
                    out.push(next);
                }
            } else {
                out.push(ch);
            }
        }
        out
    } else {
        s.to_string()
    }
}
