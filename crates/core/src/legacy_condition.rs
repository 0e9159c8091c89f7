//! Import of the dashboard's free-text condition objects.
//!
//! The rule editor stored conditions as a JSON object of field to operator
//! expression, e.g. `{"estimatedValue": ">= 50000", "source": "facebook"}`.
//! [`parse_legacy_conditions`] converts that shape into a typed [`Condition`]
//! (an `all` group, one comparison per key) and validates it, so a malformed
//! string is rejected at save time instead of crashing or matching everything.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;

use crate::condition::{validate_condition, Comparator, Condition, Literal};
use crate::error::CoreError;
use crate::lead::LeadField;

static EXPRESSION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(>=|<=|!=|==|=|>|<)?\s*(.*?)\s*$").expect("valid regex")
});

/// Parse a legacy condition object into a validated [`Condition`].
///
/// `null` and `{}` both yield the empty condition.
pub fn parse_legacy_conditions(value: &Value) -> Result<Condition, CoreError> {
    let map = match value {
        Value::Null => return Ok(Condition::always()),
        Value::Object(map) => map,
        other => {
            return Err(CoreError::Validation(format!(
                "Conditions must be a JSON object, got {other}"
            )))
        }
    };

    let mut clauses = Vec::with_capacity(map.len());
    for (field_name, raw) in map {
        let field = LeadField::from_name(field_name).ok_or_else(|| {
            CoreError::Validation(format!("Unknown condition field: \"{field_name}\""))
        })?;
        clauses.push(parse_clause(field_name, field, raw)?);
    }

    let condition = Condition::All(clauses);
    validate_condition(&condition)?;
    Ok(condition)
}

fn parse_clause(name: &str, field: LeadField, raw: &Value) -> Result<Condition, CoreError> {
    match raw {
        Value::Number(n) => {
            let number = n.as_f64().ok_or_else(|| {
                CoreError::Validation(format!("Condition \"{name}\" has an invalid number"))
            })?;
            Ok(Condition::compare(name, Comparator::Eq, number))
        }
        Value::String(expr) => parse_expression(name, field, expr),
        Value::Array(items) => {
            let options = items
                .iter()
                .map(|item| scalar_literal(name, field, item))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Condition::compare(name, Comparator::In, Literal::List(options)))
        }
        other => Err(CoreError::Validation(format!(
            "Condition \"{name}\" has an unsupported value: {other}"
        ))),
    }
}

fn parse_expression(name: &str, field: LeadField, expr: &str) -> Result<Condition, CoreError> {
    let caps = EXPRESSION_RE
        .captures(expr)
        .ok_or_else(|| CoreError::Validation(format!("Unparseable condition \"{expr}\"")))?;

    let op = match caps.get(1).map(|m| m.as_str()) {
        Some(">=") => Comparator::Gte,
        Some("<=") => Comparator::Lte,
        Some(">") => Comparator::Gt,
        Some("<") => Comparator::Lt,
        Some("!=") => Comparator::Ne,
        _ => Comparator::Eq,
    };
    let operand = caps.get(2).map(|m| m.as_str()).unwrap_or_default();
    if operand.is_empty() {
        return Err(CoreError::Validation(format!(
            "Condition \"{name}\" is missing a value"
        )));
    }

    let value = if field.is_numeric() {
        let number = operand.replace(['_', ','], "").parse::<f64>().map_err(|_| {
            CoreError::Validation(format!(
                "Condition \"{name}\" expects a number, got \"{operand}\""
            ))
        })?;
        Literal::Number(number)
    } else {
        Literal::Text(operand.to_string())
    };

    Ok(Condition::compare(name, op, value))
}

fn scalar_literal(name: &str, field: LeadField, item: &Value) -> Result<Literal, CoreError> {
    match (field.is_numeric(), item) {
        (true, Value::Number(n)) => n.as_f64().map(Literal::Number).ok_or_else(|| {
            CoreError::Validation(format!("Condition \"{name}\" has an invalid number"))
        }),
        (false, Value::String(s)) => Ok(Literal::Text(s.clone())),
        _ => Err(CoreError::Validation(format!(
            "Condition \"{name}\" has a list value of the wrong type: {item}"
        ))),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use serde_json::json;

    #[test]
    fn null_and_empty_object_match_everything() {
        assert!(parse_legacy_conditions(&Value::Null).unwrap().is_empty());
        assert!(parse_legacy_conditions(&json!({})).unwrap().is_empty());
    }

    #[test]
    fn operator_prefixed_threshold() {
        let cond = parse_legacy_conditions(&json!({"estimatedValue": ">= 50000"})).unwrap();
        assert_eq!(
            cond,
            Condition::All(vec![Condition::compare(
                "estimatedValue",
                Comparator::Gte,
                50_000.0
            )])
        );
    }

    #[test]
    fn thousands_separators_are_accepted() {
        let cond = parse_legacy_conditions(&json!({"estimated_value": "> 10,000"})).unwrap();
        assert_eq!(
            cond,
            Condition::All(vec![Condition::compare(
                "estimated_value",
                Comparator::Gt,
                10_000.0
            )])
        );
    }

    #[test]
    fn bare_text_is_equality() {
        let cond = parse_legacy_conditions(&json!({"source": "website"})).unwrap();
        assert_eq!(
            cond,
            Condition::All(vec![Condition::compare("source", Comparator::Eq, "website")])
        );
    }

    #[test]
    fn arrays_become_in() {
        let cond = parse_legacy_conditions(&json!({"source": ["website", "facebook"]})).unwrap();
        assert_matches!(
            &cond,
            Condition::All(clauses) if matches!(
                &clauses[0],
                Condition::Compare(c) if c.op == Comparator::In
            )
        );
    }

    #[test]
    fn non_object_rejected() {
        assert_matches!(
            parse_legacy_conditions(&json!("estimatedValue >= 5")),
            Err(CoreError::Validation(_))
        );
    }

    #[test]
    fn non_numeric_threshold_rejected() {
        assert_matches!(
            parse_legacy_conditions(&json!({"estimatedValue": ">= lots"})),
            Err(CoreError::Validation(_))
        );
    }

    #[test]
    fn unknown_field_rejected() {
        assert_matches!(
            parse_legacy_conditions(&json!({"budgetCode": "X1"})),
            Err(CoreError::Validation(_))
        );
    }

    #[test]
    fn ordering_on_text_field_rejected_by_validation() {
        assert_matches!(
            parse_legacy_conditions(&json!({"company": "> acme"})),
            Err(CoreError::Validation(_))
        );
    }
}
