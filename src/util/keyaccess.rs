//! Allow/deny rules for item keys with `*` wildcards.

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::core::SchedulerError;

/// Outcome of a matching rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Permission {
    /// Key may be checked.
    Allow,
    /// Key is refused.
    Deny,
}

/// One configured rule; rules are evaluated in configuration order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyAccessRule {
    /// Whether a match allows or denies the key.
    pub permission: Permission,
    /// Key pattern, `*` matches any run of characters.
    pub pattern: String,
}

impl KeyAccessRule {
    /// Allow rule.
    pub fn allow(pattern: impl Into<String>) -> Self {
        Self {
            permission: Permission::Allow,
            pattern: pattern.into(),
        }
    }

    /// Deny rule.
    pub fn deny(pattern: impl Into<String>) -> Self {
        Self {
            permission: Permission::Deny,
            pattern: pattern.into(),
        }
    }
}

/// Compiled access rules. The first matching rule decides; no match allows.
#[derive(Debug, Clone, Default)]
pub struct AccessRules {
    rules: Vec<(Permission, Regex)>,
}

impl AccessRules {
    /// Compiles the configured rules.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::Config`] for empty patterns.
    pub fn new(rules: &[KeyAccessRule]) -> Result<Self, SchedulerError> {
        let mut compiled = Vec::with_capacity(rules.len());
        for rule in rules {
            if rule.pattern.trim().is_empty() {
                return Err(SchedulerError::Config("empty key access pattern".into()));
            }
            let body = regex::escape(&rule.pattern).replace(r"\*", ".*");
            let re = Regex::new(&format!("^{body}$")).map_err(|e| {
                SchedulerError::Config(format!("invalid key access pattern \"{}\": {e}", rule.pattern))
            })?;
            compiled.push((rule.permission, re));
        }
        Ok(Self { rules: compiled })
    }

    /// True when `key` may be checked.
    #[must_use]
    pub fn check(&self, key: &str) -> bool {
        self.rules
            .iter()
            .find(|(_, re)| re.is_match(key))
            .is_none_or(|(permission, _)| *permission == Permission::Allow)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_allows() {
        let rules = AccessRules::new(&[]).unwrap();
        assert!(rules.check("system.run[ls]"));
    }

    #[test]
    fn first_match_wins() {
        let rules = AccessRules::new(&[
            KeyAccessRule::allow("system.run[echo *]"),
            KeyAccessRule::deny("system.run[*]"),
        ])
        .unwrap();
        assert!(rules.check("system.run[echo 1]"));
        assert!(!rules.check("system.run[rm -rf /]"));
        assert!(rules.check("system.run"));
    }

    #[test]
    fn pattern_without_brackets_matches_bare_key_only() {
        let rules = AccessRules::new(&[KeyAccessRule::deny("vfs.file.contents")]).unwrap();
        assert!(!rules.check("vfs.file.contents"));
        assert!(rules.check("vfs.file.contents[/etc/passwd]"));
    }
}
