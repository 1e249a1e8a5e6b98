//! Request validation against per-field rules. Every rule is checked; all violations are reported together.

use crate::error::AppError;
use crate::model::{Record, ValidationRule};
use regex::Regex;
use serde::Serialize;
use serde_json::{Map, Value};
use std::fmt;

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "constraint", content = "limit", rename_all = "snake_case")]
pub enum Constraint {
    Required,
    MinLength(usize),
    MaxLength(usize),
    Pattern(String),
    Minimum(f64),
    Maximum(f64),
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Violation {
    pub field: String,
    #[serde(flatten)]
    pub constraint: Constraint,
}

impl Violation {
    fn new(field: &str, constraint: Constraint) -> Self {
        Violation {
            field: field.to_string(),
            constraint,
        }
    }
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.constraint {
            Constraint::Required => write!(f, "{} is required", self.field),
            Constraint::MinLength(n) => write!(f, "{} must be at least {} characters", self.field, n),
            Constraint::MaxLength(n) => write!(f, "{} must be at most {} characters", self.field, n),
            Constraint::Pattern(p) => write!(f, "{} does not match {}", self.field, p),
            Constraint::Minimum(n) => write!(f, "{} must be at least {}", self.field, n),
            Constraint::Maximum(n) => write!(f, "{} must be at most {}", self.field, n),
        }
    }
}

pub struct RequestValidator;

impl RequestValidator {
    /// Validate body against per-field rules. Required fields must be present and non-null.
    pub fn validate(body: &Map<String, Value>, rules: &[(&str, ValidationRule)]) -> Result<(), AppError> {
        let mut violations = Vec::new();
        for (field, rule) in rules {
            match body.get(*field) {
                None | Some(Value::Null) => {
                    if rule.required {
                        violations.push(Violation::new(field, Constraint::Required));
                    }
                }
                Some(v) => check_field(field, v, rule, &mut violations)?,
            }
        }
        finish(violations)
    }

    /// Validate only the fields present in body (for updates). Missing fields are not required.
    pub fn validate_partial(body: &Map<String, Value>, rules: &[(&str, ValidationRule)]) -> Result<(), AppError> {
        let mut violations = Vec::new();
        for (field, rule) in rules {
            match body.get(*field) {
                None => {}
                Some(Value::Null) if rule.required => violations.push(Violation::new(field, Constraint::Required)),
                Some(v) => check_field(field, v, rule, &mut violations)?,
            }
        }
        finish(violations)
    }

    pub fn validate_record<R: Record>(record: &R) -> Result<(), AppError> {
        match serde_json::to_value(record)? {
            Value::Object(body) => Self::validate(&body, R::schema().validation),
            _ => Err(AppError::Decode("record must serialize to an object".into())),
        }
    }
}

fn finish(violations: Vec<Violation>) -> Result<(), AppError> {
    if violations.is_empty() {
        Ok(())
    } else {
        Err(AppError::ValidationFailed(violations))
    }
}

fn check_field(field: &str, v: &Value, rule: &ValidationRule, out: &mut Vec<Violation>) -> Result<(), AppError> {
    if let Some(s) = v.as_str() {
        let len = s.chars().count();
        if let Some(min) = rule.min_length {
            if len < min {
                out.push(Violation::new(field, Constraint::MinLength(min)));
            }
        }
        if let Some(max) = rule.max_length {
            if len > max {
                out.push(Violation::new(field, Constraint::MaxLength(max)));
            }
        }
        if let Some(pattern) = rule.pattern {
            let re = Regex::new(pattern).map_err(|_| AppError::BadRequest(format!("invalid pattern for {}", field)))?;
            if !re.is_match(s) {
                out.push(Violation::new(field, Constraint::Pattern(pattern.to_string())));
            }
        }
    }
    if let Some(n) = v.as_f64() {
        if let Some(min) = rule.minimum {
            if n < min {
                out.push(Violation::new(field, Constraint::Minimum(min)));
            }
        }
        if let Some(max) = rule.maximum {
            if n > max {
                out.push(Violation::new(field, Constraint::Maximum(max)));
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Galaxy, NAME_RULE};
    use serde_json::json;

    fn body(v: Value) -> Map<String, Value> {
        v.as_object().cloned().unwrap_or_default()
    }

    fn violations(r: Result<(), AppError>) -> Vec<Violation> {
        match r {
            Err(AppError::ValidationFailed(v)) => v,
            other => panic!("expected validation failure, got {:?}", other),
        }
    }

    #[test]
    fn name_of_two_characters_fails_length() {
        let r = RequestValidator::validate(&body(json!({"name": "ab"})), &[("name", NAME_RULE)]);
        assert_eq!(violations(r), vec![Violation::new("name", Constraint::MinLength(3))]);
    }

    #[test]
    fn name_of_three_characters_passes() {
        assert!(RequestValidator::validate(&body(json!({"name": "abc"})), &[("name", NAME_RULE)]).is_ok());
    }

    #[test]
    fn length_counts_characters_not_bytes() {
        assert!(RequestValidator::validate(&body(json!({"name": "별빛별"})), &[("name", NAME_RULE)]).is_ok());
    }

    #[test]
    fn missing_required_field_is_reported_not_defaulted() {
        let r = RequestValidator::validate(&body(json!({"age": 3})), &[("name", NAME_RULE)]);
        assert_eq!(violations(r), vec![Violation::new("name", Constraint::Required)]);
        let r = RequestValidator::validate(&body(json!({"name": null})), &[("name", NAME_RULE)]);
        assert_eq!(violations(r), vec![Violation::new("name", Constraint::Required)]);
    }

    #[test]
    fn every_violation_is_listed() {
        let rules = [
            ("name", NAME_RULE),
            ("code", ValidationRule::new().pattern("^[A-Z]+$").max_length(4)),
            ("age", ValidationRule::new().minimum(0.0)),
        ];
        let r = RequestValidator::validate(&body(json!({"name": "x", "code": "abcde", "age": -1})), &rules);
        let v = violations(r);
        assert_eq!(v.len(), 4);
        assert!(v.contains(&Violation::new("code", Constraint::MaxLength(4))));
        assert!(v.contains(&Violation::new("code", Constraint::Pattern("^[A-Z]+$".into()))));
        assert!(v.contains(&Violation::new("age", Constraint::Minimum(0.0))));
    }

    #[test]
    fn partial_ignores_absent_fields() {
        assert!(RequestValidator::validate_partial(&body(json!({"age": 4})), &[("name", NAME_RULE)]).is_ok());
        assert!(RequestValidator::validate_partial(&body(json!({"name": "no"})), &[("name", NAME_RULE)]).is_err());
    }

    #[test]
    fn records_validate_against_their_schema() {
        assert!(RequestValidator::validate_record(&Galaxy::new("Andromeda")).is_ok());
        assert!(RequestValidator::validate_record(&Galaxy::new("M3")).is_err());
    }

    #[test]
    fn violations_serialize_with_constraint_tag() {
        let v = Violation::new("name", Constraint::MinLength(3));
        assert_eq!(
            serde_json::to_value(&v).unwrap(),
            json!({"field": "name", "constraint": "min_length", "limit": 3})
        );
    }
}
