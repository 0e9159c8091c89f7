//! Typed rule conditions and their evaluator.
//!
//! A condition is a small expression tree over lead fields. It is stored as
//! JSON but never evaluated as code; [`validate_condition`] runs when a rule is
//! saved and [`evaluate`] runs during distribution.
//!
//! Evaluation is total: unknown fields and fields the lead has no value for
//! yield "no match". Only structurally malformed trees (wrong operand shape,
//! ordering a text field, excessive nesting) produce a [`RuleEvaluationError`].

use serde::{Deserialize, Serialize};

use crate::error::CoreError;
use crate::lead::{FieldValue, Lead, LeadField, LeadSource, LeadStatus};

/// Maximum nesting depth of `all` / `any` / `not` groups.
pub const MAX_CONDITION_DEPTH: usize = 8;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

define_text_enum! {
    /// Comparison operator of a leaf condition.
    Comparator {
        Eq = "eq",
        Ne = "ne",
        Gte = "gte",
        Lte = "lte",
        Gt = "gt",
        Lt = "lt",
        In = "in",
    }
}

impl Comparator {
    fn is_ordering(self) -> bool {
        matches!(
            self,
            Comparator::Gte | Comparator::Lte | Comparator::Gt | Comparator::Lt
        )
    }
}

/// A literal operand.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Literal {
    Number(f64),
    Text(String),
    List(Vec<Literal>),
}

impl From<f64> for Literal {
    fn from(value: f64) -> Self {
        Literal::Number(value)
    }
}

impl From<i64> for Literal {
    fn from(value: i64) -> Self {
        Literal::Number(value as f64)
    }
}

impl From<&str> for Literal {
    fn from(value: &str) -> Self {
        Literal::Text(value.to_string())
    }
}

impl From<String> for Literal {
    fn from(value: String) -> Self {
        Literal::Text(value)
    }
}

/// Leaf condition: `field op value`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Comparison {
    pub field: String,
    pub op: Comparator,
    pub value: Literal,
}

/// A rule condition tree.
///
/// Serialized externally tagged, e.g.
/// `{"all": [{"compare": {"field": "estimated_value", "op": "gte", "value": 50000}}]}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Condition {
    All(Vec<Condition>),
    Any(Vec<Condition>),
    Not(Box<Condition>),
    Compare(Comparison),
}

impl Default for Condition {
    /// The empty condition, which matches every lead.
    fn default() -> Self {
        Condition::All(Vec::new())
    }
}

impl Condition {
    /// Condition that matches every lead.
    pub fn always() -> Self {
        Self::default()
    }

    /// Build a leaf comparison.
    pub fn compare(field: impl Into<String>, op: Comparator, value: impl Into<Literal>) -> Self {
        Condition::Compare(Comparison {
            field: field.into(),
            op,
            value: value.into(),
        })
    }

    /// Whether this is the empty `all` group.
    pub fn is_empty(&self) -> bool {
        matches!(self, Condition::All(children) if children.is_empty())
    }
}

/// A structurally malformed condition met during evaluation.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RuleEvaluationError {
    #[error("condition nesting exceeds {max} levels")]
    DepthExceeded { max: usize },

    #[error("`in` on field `{field}` requires a list operand")]
    ListOperandRequired { field: String },

    #[error("`{op}` on field `{field}` requires a single value, not a list")]
    ScalarOperandRequired { field: String, op: Comparator },

    #[error("`{op}` cannot compare field `{field}` with the given operand")]
    TypeMismatch { field: String, op: Comparator },
}

// ---------------------------------------------------------------------------
// Evaluation
// ---------------------------------------------------------------------------

/// Evaluate `condition` against `lead`.
pub fn evaluate(condition: &Condition, lead: &Lead) -> Result<bool, RuleEvaluationError> {
    evaluate_at(condition, lead, 0)
}

/// Evaluate, treating malformed conditions as "no match".
pub fn matches(lead: &Lead, condition: &Condition) -> bool {
    evaluate(condition, lead).unwrap_or(false)
}

fn evaluate_at(
    condition: &Condition,
    lead: &Lead,
    depth: usize,
) -> Result<bool, RuleEvaluationError> {
    if depth > MAX_CONDITION_DEPTH {
        return Err(RuleEvaluationError::DepthExceeded {
            max: MAX_CONDITION_DEPTH,
        });
    }
    match condition {
        Condition::All(children) => {
            for child in children {
                if !evaluate_at(child, lead, depth + 1)? {
                    return Ok(false);
                }
            }
            Ok(true)
        }
        Condition::Any(children) => {
            for child in children {
                if evaluate_at(child, lead, depth + 1)? {
                    return Ok(true);
                }
            }
            Ok(false)
        }
        Condition::Not(inner) => Ok(!evaluate_at(inner, lead, depth + 1)?),
        Condition::Compare(cmp) => evaluate_comparison(cmp, lead),
    }
}

fn evaluate_comparison(cmp: &Comparison, lead: &Lead) -> Result<bool, RuleEvaluationError> {
    let Some(field) = LeadField::from_name(&cmp.field) else {
        return Ok(false);
    };
    let Some(actual) = lead.field_value(field) else {
        return Ok(false);
    };
    let mismatch = || RuleEvaluationError::TypeMismatch {
        field: cmp.field.clone(),
        op: cmp.op,
    };

    match cmp.op {
        Comparator::In => {
            let Literal::List(options) = &cmp.value else {
                return Err(RuleEvaluationError::ListOperandRequired {
                    field: cmp.field.clone(),
                });
            };
            let mut hit = false;
            for option in options {
                if scalar_equals(&actual, option).ok_or_else(mismatch)? {
                    hit = true;
                    break;
                }
            }
            Ok(hit)
        }
        Comparator::Eq | Comparator::Ne => {
            if matches!(cmp.value, Literal::List(_)) {
                return Err(RuleEvaluationError::ScalarOperandRequired {
                    field: cmp.field.clone(),
                    op: cmp.op,
                });
            }
            let equal = scalar_equals(&actual, &cmp.value).ok_or_else(mismatch)?;
            Ok(if cmp.op == Comparator::Eq { equal } else { !equal })
        }
        Comparator::Gte | Comparator::Lte | Comparator::Gt | Comparator::Lt => {
            let (FieldValue::Number(lhs), Literal::Number(rhs)) = (&actual, &cmp.value) else {
                return Err(mismatch());
            };
            Ok(match cmp.op {
                Comparator::Gte => lhs >= rhs,
                Comparator::Lte => lhs <= rhs,
                Comparator::Gt => lhs > rhs,
                _ => lhs < rhs,
            })
        }
    }
}

/// Equality between a lead value and a scalar literal.
///
/// Text compares ASCII case-insensitively; a list value (tags) is "equal"
/// when it contains the literal. Returns `None` on a type mismatch.
fn scalar_equals(actual: &FieldValue, literal: &Literal) -> Option<bool> {
    match (actual, literal) {
        (FieldValue::Number(a), Literal::Number(b)) => Some(a == b),
        (FieldValue::Text(a), Literal::Text(b)) => Some(a.eq_ignore_ascii_case(b)),
        (FieldValue::List(items), Literal::Text(b)) => {
            Some(items.iter().any(|item| item.eq_ignore_ascii_case(b)))
        }
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Save-time validation
// ---------------------------------------------------------------------------

/// Validate a condition before a rule is saved.
///
/// Rules:
/// - Nesting must not exceed [`MAX_CONDITION_DEPTH`].
/// - Every field must be a known [`LeadField`].
/// - `in` takes a non-empty list of scalars; other operators take a scalar.
/// - Ordering operators only apply to numeric fields.
/// - Numeric fields take numbers; text fields take text.
/// - `source` / `status` operands must name a known source / status.
pub fn validate_condition(condition: &Condition) -> Result<(), CoreError> {
    validate_at(condition, 0)
}

fn validate_at(condition: &Condition, depth: usize) -> Result<(), CoreError> {
    if depth > MAX_CONDITION_DEPTH {
        return Err(CoreError::Validation(format!(
            "Condition nesting must not exceed {MAX_CONDITION_DEPTH} levels"
        )));
    }
    match condition {
        Condition::All(children) | Condition::Any(children) => children
            .iter()
            .try_for_each(|child| validate_at(child, depth + 1)),
        Condition::Not(inner) => validate_at(inner, depth + 1),
        Condition::Compare(cmp) => validate_comparison(cmp),
    }
}

fn validate_comparison(cmp: &Comparison) -> Result<(), CoreError> {
    let field = LeadField::from_name(&cmp.field).ok_or_else(|| {
        CoreError::Validation(format!("Unknown condition field: \"{}\"", cmp.field))
    })?;

    if cmp.op.is_ordering() && !field.is_numeric() {
        return Err(CoreError::Validation(format!(
            "Operator `{}` requires a numeric field, got \"{}\"",
            cmp.op, cmp.field
        )));
    }

    match (&cmp.op, &cmp.value) {
        (Comparator::In, Literal::List(options)) => {
            if options.is_empty() {
                return Err(CoreError::Validation(format!(
                    "`in` on \"{}\" requires at least one value",
                    cmp.field
                )));
            }
            options
                .iter()
                .try_for_each(|option| validate_operand(field, &cmp.field, option))
        }
        (Comparator::In, _) => Err(CoreError::Validation(format!(
            "`in` on \"{}\" requires a list of values",
            cmp.field
        ))),
        (_, Literal::List(_)) => Err(CoreError::Validation(format!(
            "Operator `{}` on \"{}\" requires a single value",
            cmp.op, cmp.field
        ))),
        (_, value) => validate_operand(field, &cmp.field, value),
    }
}

fn validate_operand(field: LeadField, name: &str, value: &Literal) -> Result<(), CoreError> {
    match (field.is_numeric(), value) {
        (true, Literal::Number(n)) if n.is_finite() => Ok(()),
        (true, _) => Err(CoreError::Validation(format!(
            "Field \"{name}\" requires a numeric operand"
        ))),
        (false, Literal::Text(text)) => match field {
            LeadField::Source => text.parse::<LeadSource>().map(|_| ()),
            LeadField::Status => text.parse::<LeadStatus>().map(|_| ()),
            _ => Ok(()),
        },
        (false, _) => Err(CoreError::Validation(format!(
            "Field \"{name}\" requires a text operand"
        ))),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
