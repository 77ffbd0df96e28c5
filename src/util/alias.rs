//! Item key aliases (`Alias=name:key` style definitions).

use crate::core::SchedulerError;
use crate::util::itemkey::parse_key;

#[derive(Debug, Clone, PartialEq, Eq)]
struct Alias {
    name: String,
    key: String,
}

/// Resolves requested keys through the configured aliases.
#[derive(Debug, Clone, Default)]
pub struct AliasManager {
    aliases: Vec<Alias>,
}

impl AliasManager {
    /// Builds the alias table from `name:key` definitions.
    ///
    /// A name ending in `[*]` matches any parameter list; if the target also
    /// ends in `[*]` the requested parameters are carried over.
    ///
    /// # Errors
    ///
    /// Returns [`SchedulerError::Config`] for malformed or duplicate aliases.
    pub fn new<S: AsRef<str>>(definitions: &[S]) -> Result<Self, SchedulerError> {
        let mut aliases: Vec<Alias> = Vec::with_capacity(definitions.len());
        for definition in definitions {
            let definition = definition.as_ref();
            let (name, key) = split_definition(definition).ok_or_else(|| {
                SchedulerError::Config(format!("cannot add alias \"{definition}\": invalid format"))
            })?;
            let bare = name.strip_suffix("[*]").unwrap_or(name);
            parse_key(bare).map_err(|e| {
                SchedulerError::Config(format!("cannot add alias \"{definition}\": {e}"))
            })?;
            parse_key(key.strip_suffix("[*]").unwrap_or(key)).map_err(|e| {
                SchedulerError::Config(format!("cannot add alias \"{definition}\": {e}"))
            })?;
            if aliases.iter().any(|a| a.name == name) {
                return Err(SchedulerError::Config(format!(
                    "cannot add alias \"{definition}\": duplicate name"
                )));
            }
            aliases.push(Alias {
                name: name.to_string(),
                key: key.to_string(),
            });
        }
        Ok(Self { aliases })
    }

    /// Number of configured aliases.
    #[must_use]
    pub fn len(&self) -> usize {
        self.aliases.len()
    }

    /// True when no alias is configured.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.aliases.is_empty()
    }

    /// Returns the key an alias points to, or `key` itself when nothing matches.
    #[must_use]
    pub fn resolve(&self, key: &str) -> String {
        if let Some(alias) = self.aliases.iter().find(|a| a.name == key) {
            return alias.key.clone();
        }
        for alias in &self.aliases {
            let Some(prefix) = alias.name.strip_suffix("[*]") else {
                continue;
            };
            let Some(params) = key.strip_prefix(prefix) else {
                continue;
            };
            if !params.starts_with('[') {
                continue;
            }
            return match alias.key.strip_suffix("[*]") {
                Some(target) => format!("{target}{params}"),
                None => alias.key.clone(),
            };
        }
        key.to_string()
    }
}

// Alias names may contain ':' only inside brackets.
fn split_definition(definition: &str) -> Option<(&str, &str)> {
    let mut depth = 0usize;
    for (idx, c) in definition.char_indices() {
        match c {
            '[' => depth += 1,
            ']' => depth = depth.saturating_sub(1),
            ':' if depth == 0 => {
                let (name, key) = (&definition[..idx], &definition[idx + 1..]);
                if name.is_empty() || key.is_empty() {
                    return None;
                }
                return Some((name, key));
            }
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_alias() {
        let aliases = AliasManager::new(&["ping:agent.ping"]).unwrap();
        assert_eq!(aliases.resolve("ping"), "agent.ping");
        assert_eq!(aliases.resolve("agent.ping"), "agent.ping");
    }

    #[test]
    fn wildcard_alias_carries_parameters() {
        let aliases = AliasManager::new(&["fs[*]:vfs.fs.size[*]", "root[*]:vfs.fs.size[/,free]"]).unwrap();
        assert_eq!(aliases.resolve("fs[/,used]"), "vfs.fs.size[/,used]");
        assert_eq!(aliases.resolve("root[x]"), "vfs.fs.size[/,free]");
        assert_eq!(aliases.resolve("fs"), "fs");
    }

    #[test]
    fn exact_alias_with_brackets_wins() {
        let aliases = AliasManager::new(&["fs[*]:vfs.fs.size[*]", "fs[/]:vfs.fs.size[/,pfree]"]).unwrap();
        assert_eq!(aliases.resolve("fs[/]"), "vfs.fs.size[/,pfree]");
    }

    #[test]
    fn rejects_bad_definitions() {
        assert!(AliasManager::new(&["noseparator"]).is_err());
        assert!(AliasManager::new(&[":key"]).is_err());
        assert!(AliasManager::new(&["a:b", "a:c"]).is_err());
        assert!(AliasManager::new(&["bad name:key"]).is_err());
    }
}
