//! Suffix-or-exact domain sets.

use super::Result;
use std::collections::HashSet;
use std::path::Path;

/// A set of domain rules supporting exact and suffix matching.
///
/// Rule grammar, one rule per line:
///
/// - `full:example.com` — matches `example.com` only
/// - `domain:example.com` — matches `example.com` and any subdomain
/// - `example.com` — shorthand for `domain:example.com`
///
/// Names are normalized to lowercase without the trailing dot before both
/// loading and lookup, so matching is case-insensitive and FQDN-agnostic.
#[derive(Debug, Default, Clone)]
pub struct DomainSet {
    exact: HashSet<String>,
    suffix: HashSet<String>,
}

impl DomainSet {
    /// Creates an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a single rule in the line grammar described above.
    pub fn add_rule(&mut self, rule: &str) {
        if let Some(name) = rule.strip_prefix("full:") {
            self.exact.insert(normalize(name));
        } else if let Some(name) = rule.strip_prefix("domain:") {
            self.suffix.insert(normalize(name));
        } else {
            self.suffix.insert(normalize(rule));
        }
    }

    /// Loads rules from one or more files, merging into this set.
    pub fn load_files<P: AsRef<Path>>(&mut self, paths: &[P]) -> Result<()> {
        for path in paths {
            for (_, line) in super::read_rule_lines(path.as_ref())? {
                self.add_rule(&line);
            }
        }
        Ok(())
    }

    /// Tests a name against the set.
    pub fn contains(&self, name: &str) -> bool {
        let name = normalize(name);
        if self.exact.contains(&name) || self.suffix.contains(&name) {
            return true;
        }

        // Walk the parent domains: a.b.example.com -> b.example.com -> ...
        let mut rest = name.as_str();
        while let Some(idx) = rest.find('.') {
            rest = &rest[idx + 1..];
            if self.suffix.contains(rest) {
                return true;
            }
        }
        false
    }

    /// Number of rules in the set.
    pub fn len(&self) -> usize {
        self.exact.len() + self.suffix.len()
    }

    /// Returns true if the set has no rules.
    pub fn is_empty(&self) -> bool {
        self.exact.is_empty() && self.suffix.is_empty()
    }
}

pub(crate) fn normalize(name: &str) -> String {
    name.trim().trim_end_matches('.').to_ascii_lowercase()
}
