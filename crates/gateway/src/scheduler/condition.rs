//! The restricted condition mini-language shared by StateStore escalation
//! rules (spec §3) and Scheduler event triggers (spec §4.2).
//!
//! Per §9 "Replacing dynamic code execution": no host-language `eval`. The
//! surface is deliberately tiny — comparison against a bound numeric value,
//! equality against a literal, and the two nullary predicates `always` and
//! `changed`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Condition {
    Always,
    Changed,
    GreaterThan { value: f64 },
    LessThan { value: f64 },
    Equals { value: Value },
}

impl Condition {
    /// Parse the compact string forms named in spec §3/§4.2: `always`,
    /// `changed`, `> N`, `< N`, `== V`.
    pub fn parse(raw: &str) -> Result<Self, String> {
        let raw = raw.trim();
        match raw {
            "always" => return Ok(Condition::Always),
            "changed" => return Ok(Condition::Changed),
            _ => {}
        }
        if let Some(rest) = raw.strip_prefix(">") {
            let value: f64 = rest.trim().parse().map_err(|_| format!("invalid number in '{raw}'"))?;
            return Ok(Condition::GreaterThan { value });
        }
        if let Some(rest) = raw.strip_prefix("<") {
            let value: f64 = rest.trim().parse().map_err(|_| format!("invalid number in '{raw}'"))?;
            return Ok(Condition::LessThan { value });
        }
        if let Some(rest) = raw.strip_prefix("==") {
            let literal = rest.trim();
            let value = serde_json::from_str(literal)
                .unwrap_or_else(|_| Value::String(literal.to_string()));
            return Ok(Condition::Equals { value });
        }
        Err(format!("unrecognized condition '{raw}'"))
    }

    /// Evaluate against the new value and, for `changed`, whether it
    /// differs from the previous value.
    pub fn evaluate(&self, new_value: &Value, previous: Option<&Value>) -> bool {
        match self {
            Condition::Always => true,
            Condition::Changed => previous.map(|p| p != new_value).unwrap_or(true),
            Condition::GreaterThan { value } => new_value.as_f64().map(|v| v > *value).unwrap_or(false),
            Condition::LessThan { value } => new_value.as_f64().map(|v| v < *value).unwrap_or(false),
            Condition::Equals { value } => new_value == value,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_always_and_changed() {
        assert_eq!(Condition::parse("always").unwrap(), Condition::Always);
        assert_eq!(Condition::parse("changed").unwrap(), Condition::Changed);
    }

    #[test]
    fn parses_numeric_comparisons() {
        assert_eq!(
            Condition::parse("> 10").unwrap(),
            Condition::GreaterThan { value: 10.0 }
        );
        assert_eq!(
            Condition::parse("< 5").unwrap(),
            Condition::LessThan { value: 5.0 }
        );
    }

    #[test]
    fn parses_equality_with_json_literal() {
        let cond = Condition::parse("== \"ready\"").unwrap();
        assert_eq!(cond, Condition::Equals { value: Value::String("ready".into()) });
    }

    #[test]
    fn rejects_unrecognized_forms() {
        assert!(Condition::parse("system(\"rm -rf /\")").is_err());
        assert!(Condition::parse("not a condition").is_err());
    }

    #[test]
    fn greater_than_evaluates_numerically() {
        let cond = Condition::GreaterThan { value: 100.0 };
        assert!(cond.evaluate(&Value::from(150), None));
        assert!(!cond.evaluate(&Value::from(50), None));
    }

    #[test]
    fn changed_requires_a_previous_value() {
        let cond = Condition::Changed;
        assert!(cond.evaluate(&Value::from(1), None));
        assert!(!cond.evaluate(&Value::from(1), Some(&Value::from(1))));
        assert!(cond.evaluate(&Value::from(2), Some(&Value::from(1))));
    }
}
