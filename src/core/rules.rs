//! Server-provided global regular expressions.
//!
//! A [`RuleBundle`] is built once, then published through an `ArcSwap`;
//! running checks load the current snapshot without locking.

use std::cmp::Ordering;
use std::sync::Arc;

use arc_swap::ArcSwap;
use regex::{Captures, Regex, RegexBuilder};
use serde::{Deserialize, Serialize};

use crate::core::SchedulerError;

/// How an expression body is applied to a value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExpressionType {
    /// Body is a substring of the value.
    Included,
    /// Any delimiter-separated part of the body is a substring of the value.
    AnyIncluded,
    /// Body is not a substring of the value.
    NotIncluded,
    /// Body regex matches the value.
    RegexTrue,
    /// Body regex does not match the value.
    RegexFalse,
}

/// One expression of a named global regular expression.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlobalExpression {
    /// Global expression name, referenced as `@name`.
    pub name: String,
    /// Expression body.
    pub body: String,
    /// Matching mode.
    pub expression_type: ExpressionType,
    /// Delimiter for [`ExpressionType::AnyIncluded`].
    #[serde(default = "default_delimiter")]
    pub delimiter: char,
    /// Case sensitivity.
    #[serde(default)]
    pub case_sensitive: bool,
}

fn default_delimiter() -> char {
    ','
}

impl PartialOrd for GlobalExpression {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for GlobalExpression {
    fn cmp(&self, other: &Self) -> Ordering {
        self.name
            .cmp(&other.name)
            .then_with(|| self.body.cmp(&other.body))
            .then_with(|| self.expression_type.cmp(&other.expression_type))
            .then_with(|| self.delimiter.cmp(&other.delimiter))
            .then_with(|| self.case_sensitive.cmp(&other.case_sensitive))
    }
}

#[derive(Debug)]
enum Compiled {
    Text,
    Regex(Regex),
    Invalid(String),
}

/// Immutable, sorted set of global expressions.
#[derive(Debug, Default)]
pub struct RuleBundle {
    expressions: Vec<GlobalExpression>,
    compiled: Vec<Compiled>,
}

/// Atomically replaceable bundle shared between a client and its running checks.
pub type SharedRules = Arc<ArcSwap<RuleBundle>>;

/// Empty shared bundle.
#[must_use]
pub fn empty_rules() -> SharedRules {
    Arc::new(ArcSwap::from_pointee(RuleBundle::default()))
}

impl RuleBundle {
    /// Sorts and compiles the expressions.
    #[must_use]
    pub fn new(mut expressions: Vec<GlobalExpression>) -> Self {
        expressions.sort();
        let compiled = expressions
            .iter()
            .map(|e| match e.expression_type {
                ExpressionType::RegexTrue | ExpressionType::RegexFalse => {
                    match RegexBuilder::new(&e.body).case_insensitive(!e.case_sensitive).build() {
                        Ok(re) => Compiled::Regex(re),
                        Err(err) => Compiled::Invalid(err.to_string()),
                    }
                }
                _ => Compiled::Text,
            })
            .collect();
        Self {
            expressions,
            compiled,
        }
    }

    /// Sorted expressions.
    #[must_use]
    pub fn expressions(&self) -> &[GlobalExpression] {
        &self.expressions
    }

    /// True when `sorted` holds exactly the published expressions.
    #[must_use]
    pub fn same_expressions(&self, sorted: &[GlobalExpression]) -> bool {
        self.expressions == sorted
    }

    /// Matches `value` against a regular expression or an `@name` reference.
    ///
    /// `case_sensitive` applies to plain regular expressions only; global
    /// expressions carry their own flag. All parts of a global expression
    /// must match.
    ///
    /// # Errors
    ///
    /// Unknown global expression names and invalid regular expressions.
    pub fn matches(&self, value: &str, pattern: &str, case_sensitive: bool) -> Result<bool, SchedulerError> {
        match pattern.strip_prefix('@') {
            Some(name) => self.matches_global(value, name),
            None => Ok(compile(pattern, case_sensitive)?.is_match(value)),
        }
    }

    /// Like [`Self::matches`], returning `template` with `\0`..`\9` replaced by
    /// capture groups, or the whole match when no template is given.
    ///
    /// # Errors
    ///
    /// Same as [`Self::matches`].
    pub fn match_with_output(
        &self,
        value: &str,
        pattern: &str,
        case_sensitive: bool,
        template: Option<&str>,
    ) -> Result<Option<String>, SchedulerError> {
        if let Some(name) = pattern.strip_prefix('@') {
            if !self.matches_global(value, name)? {
                return Ok(None);
            }
            let first_regex = self
                .expressions
                .iter()
                .zip(&self.compiled)
                .find_map(|(e, c)| match c {
                    Compiled::Regex(re) if e.name == name && e.expression_type == ExpressionType::RegexTrue => {
                        Some(re)
                    }
                    _ => None,
                });
            return Ok(match first_regex {
                Some(re) => re.captures(value).map(|caps| render(template, &caps)),
                None => Some(template.map_or_else(|| value.to_string(), |t| t.replace("\\0", value))),
            });
        }
        let re = compile(pattern, case_sensitive)?;
        Ok(re.captures(value).map(|caps| render(template, &caps)))
    }

    fn matches_global(&self, value: &str, name: &str) -> Result<bool, SchedulerError> {
        let mut found = false;
        for (expression, compiled) in self.expressions.iter().zip(&self.compiled) {
            if expression.name != name {
                continue;
            }
            found = true;
            if !evaluate(expression, compiled, value)? {
                return Ok(false);
            }
        }
        if found {
            Ok(true)
        } else {
            Err(SchedulerError::UnknownRule(name.to_string()))
        }
    }
}

fn compile(pattern: &str, case_sensitive: bool) -> Result<Regex, SchedulerError> {
    RegexBuilder::new(pattern)
        .case_insensitive(!case_sensitive)
        .build()
        .map_err(|e| SchedulerError::Check(format!("Invalid regular expression \"{pattern}\": {e}")))
}

fn contains(value: &str, needle: &str, case_sensitive: bool) -> bool {
    if case_sensitive {
        value.contains(needle)
    } else {
        value.to_lowercase().contains(&needle.to_lowercase())
    }
}

fn evaluate(expression: &GlobalExpression, compiled: &Compiled, value: &str) -> Result<bool, SchedulerError> {
    let cs = expression.case_sensitive;
    Ok(match (expression.expression_type, compiled) {
        (_, Compiled::Invalid(err)) => {
            return Err(SchedulerError::Check(format!(
                "Invalid regular expression \"{}\": {err}",
                expression.body
            )))
        }
        (ExpressionType::Included, _) => contains(value, &expression.body, cs),
        (ExpressionType::NotIncluded, _) => !contains(value, &expression.body, cs),
        (ExpressionType::AnyIncluded, _) => expression
            .body
            .split(expression.delimiter)
            .filter(|part| !part.is_empty())
            .any(|part| contains(value, part, cs)),
        (ExpressionType::RegexTrue, Compiled::Regex(re)) => re.is_match(value),
        (ExpressionType::RegexFalse, Compiled::Regex(re)) => !re.is_match(value),
        (ExpressionType::RegexTrue | ExpressionType::RegexFalse, Compiled::Text) => false,
    })
}

fn render(template: Option<&str>, caps: &Captures<'_>) -> String {
    let Some(template) = template else {
        return caps.get(0).map_or_else(String::new, |m| m.as_str().to_string());
    };
    let mut out = String::with_capacity(template.len());
    let mut chars = template.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '\\' {
            if let Some(group) = chars.peek().and_then(|d| d.to_digit(10)) {
                chars.next();
                if let Some(m) = caps.get(group as usize) {
                    out.push_str(m.as_str());
                }
                continue;
            }
        }
        out.push(c);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn expr(name: &str, body: &str, expression_type: ExpressionType, case_sensitive: bool) -> GlobalExpression {
        GlobalExpression {
            name: name.into(),
            body: body.into(),
            expression_type,
            delimiter: ',',
            case_sensitive,
        }
    }

    #[test]
    fn bundle_is_sorted() {
        let bundle = RuleBundle::new(vec![
            expr("b", "x", ExpressionType::Included, true),
            expr("a", "y", ExpressionType::Included, true),
        ]);
        assert_eq!(bundle.expressions()[0].name, "a");
        let mut other = vec![
            expr("a", "y", ExpressionType::Included, true),
            expr("b", "x", ExpressionType::Included, true),
        ];
        other.sort();
        assert!(bundle.same_expressions(&other));
    }

    #[test]
    fn global_expression_requires_every_part() {
        let bundle = RuleBundle::new(vec![
            expr("fs", "^/", ExpressionType::RegexTrue, true),
            expr("fs", "/proc,/sys", ExpressionType::AnyIncluded, true),
            expr("errors", "ERROR", ExpressionType::Included, false),
            expr("quiet", "debug", ExpressionType::RegexFalse, false),
        ]);
        assert!(bundle.matches("/proc/1", "@fs", true).unwrap());
        assert!(!bundle.matches("/home", "@fs", true).unwrap());
        assert!(bundle.matches("an error here", "@errors", true).unwrap());
        assert!(!bundle.matches("DEBUG line", "@quiet", true).unwrap());
        assert_eq!(
            bundle.matches("x", "@missing", true),
            Err(SchedulerError::UnknownRule("missing".into()))
        );
    }

    #[test]
    fn plain_regex_and_output_template() {
        let bundle = RuleBundle::default();
        assert!(bundle.matches("Value=42", "value=\\d+", false).unwrap());
        assert!(!bundle.matches("Value=42", "value=\\d+", true).unwrap());
        assert!(bundle.matches("x", "(", true).is_err());
        let out = bundle
            .match_with_output("temp=42C", r"temp=(\d+)(\w)", true, Some("\\1 \\2"))
            .unwrap();
        assert_eq!(out.as_deref(), Some("42 C"));
        assert_eq!(
            bundle.match_with_output("temp=42C", r"\d+", true, None).unwrap().as_deref(),
            Some("42")
        );
    }

    #[test]
    fn not_included_is_negated() {
        let bundle = RuleBundle::new(vec![expr("clean", "fail", ExpressionType::NotIncluded, true)]);
        assert!(bundle.matches("all good", "@clean", true).unwrap());
        assert!(!bundle.matches("it did fail", "@clean", true).unwrap());
    }

    #[test]
    fn task_context_sees_published_snapshot() {
        use crate::core::plugin::TaskContext;
        use crate::infra::sink::InMemoryResultSink;

        let shared = empty_rules();
        let ctx = TaskContext::new(101, Arc::new(InMemoryResultSink::new()), Arc::clone(&shared));
        assert!(ctx.global_rules().expressions().is_empty());

        shared.store(Arc::new(RuleBundle::new(vec![expr("err", "error", ExpressionType::Included, false)])));
        assert_eq!(ctx.global_rules().expressions().len(), 1);
        assert!(ctx.matches("An ERROR", "@err", true).unwrap());
    }
}
