//! Pre-hook rule matching for the `ToolPipeline` (spec §4.3: "tool hooks:
//! deny, allow, log"). A rule matches on the tool name and, optionally, on
//! one or more regexes applied to string fields of the call's input.

use regex::Regex;
use serde_json::Value;

#[derive(Debug, Clone)]
pub enum HookAction {
    Deny { reason: String },
    Allow,
    Log,
}

/// Matches an input field by JSON pointer-ish dotted path against a regex.
#[derive(Debug, Clone)]
pub struct InputMatcher {
    pub field: String,
    pub pattern: Regex,
}

impl InputMatcher {
    pub fn matches(&self, input: &Value) -> bool {
        let mut cursor = input;
        for part in self.field.split('.') {
            match cursor.get(part) {
                Some(next) => cursor = next,
                None => return false,
            }
        }
        cursor.as_str().map(|s| self.pattern.is_match(s)).unwrap_or(false)
    }
}

#[derive(Debug, Clone)]
pub struct HookRule {
    /// Matches the tool name (e.g. `^bash$`, `^browse\.`).
    pub matcher: Regex,
    /// All of these must match for the rule to apply, in addition to
    /// `matcher`. Empty means "no further constraint".
    pub input_matchers: Vec<InputMatcher>,
    pub action: HookAction,
    /// Lower values run first within a rule group.
    pub priority: i32,
}

impl HookRule {
    pub fn matches(&self, tool_name: &str, input: &Value) -> bool {
        if !self.matcher.is_match(tool_name) {
            return false;
        }
        self.input_matchers.iter().all(|m| m.matches(input))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn matches_on_tool_name_only() {
        let rule = HookRule {
            matcher: Regex::new("^bash$").unwrap(),
            input_matchers: vec![],
            action: HookAction::Deny { reason: "no".into() },
            priority: 0,
        };
        assert!(rule.matches("bash", &json!({})));
        assert!(!rule.matches("filesystem", &json!({})));
    }

    #[test]
    fn input_matcher_inspects_a_dotted_field() {
        let rule = HookRule {
            matcher: Regex::new("^bash$").unwrap(),
            input_matchers: vec![InputMatcher {
                field: "command".into(),
                pattern: Regex::new("rm -rf").unwrap(),
            }],
            action: HookAction::Deny { reason: "destructive command".into() },
            priority: 0,
        };
        assert!(rule.matches("bash", &json!({"command": "rm -rf /"})));
        assert!(!rule.matches("bash", &json!({"command": "ls"})));
    }

    #[test]
    fn missing_field_does_not_match() {
        let rule = HookRule {
            matcher: Regex::new("^bash$").unwrap(),
            input_matchers: vec![InputMatcher {
                field: "missing".into(),
                pattern: Regex::new(".*").unwrap(),
            }],
            action: HookAction::Log,
            priority: 0,
        };
        assert!(!rule.matches("bash", &json!({"command": "ls"})));
    }
}
