//! Execution and skip condition evaluation.
//!
//! Conditions are plain strings that may reference instance configuration
//! with `${key}` placeholders. After substitution a condition holds only
//! when it reads `true` (trimmed, ASCII case-insensitive); every other value,
//! including an unresolved placeholder, is false.

use std::collections::BTreeMap;
use std::sync::OnceLock;

use regex::Regex;

use crate::model::OperationInstance;

fn placeholder_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"\$\{([^}]+)\}").expect("placeholder pattern is valid"))
}

/// Key of a condition that is exactly one `${key}` placeholder.
pub fn single_placeholder(condition: &str) -> Option<&str> {
    let trimmed = condition.trim();
    let key = trimmed.strip_prefix("${")?.strip_suffix('}')?;
    if key.is_empty() || key.contains(['$', '{', '}']) {
        return None;
    }
    Some(key.trim())
}

/// Replace every `${key}` whose key is present in `configuration`.
///
/// Unknown placeholders are left as they are.
pub fn substitute(condition: &str, configuration: &BTreeMap<String, String>) -> String {
    placeholder_pattern()
        .replace_all(condition, |caps: &regex::Captures<'_>| {
            let key = caps[1].trim();
            configuration
                .get(key)
                .cloned()
                .unwrap_or_else(|| caps[0].to_string())
        })
        .into_owned()
}

/// Whether a resolved condition value holds.
pub fn is_true(value: &str) -> bool {
    value.trim().eq_ignore_ascii_case("true")
}

/// Outcome of checking an operation's conditions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConditionOutcome {
    Execute,
    Skip { reason: String },
}

/// Evaluates operation conditions against instance configuration.
#[derive(Debug, Default, Clone)]
pub struct ConditionEvaluator;

impl ConditionEvaluator {
    pub fn new() -> Self {
        Self
    }

    /// Decide whether an operation runs.
    ///
    /// An execution condition, when present, decides alone. Otherwise a skip
    /// condition that holds skips the operation.
    pub fn evaluate(
        &self,
        operation: &OperationInstance,
        configuration: &BTreeMap<String, String>,
    ) -> ConditionOutcome {
        if let Some(condition) = &operation.execution_condition {
            let resolved = substitute(condition, configuration);
            return if is_true(&resolved) {
                ConditionOutcome::Execute
            } else {
                ConditionOutcome::Skip {
                    reason: format!("execution condition '{}' is '{}'", condition, resolved.trim()),
                }
            };
        }

        if let Some(condition) = &operation.skip_condition {
            let resolved = substitute(condition, configuration);
            if is_true(&resolved) {
                return ConditionOutcome::Skip {
                    reason: format!("skip condition '{}' holds", condition),
                };
            }
        }

        ConditionOutcome::Execute
    }
}
