//! Distribution rule model, save-time DTOs, and evaluation ordering.
//!
//! Rules are never deleted: edits append a [`RuleVersion`] snapshot and
//! retirement flips `is_active`, so assignment records always point at a
//! rule whose history can be reconstructed.

use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::condition::{validate_condition, Condition};
use crate::error::CoreError;
use crate::legacy_condition::parse_legacy_conditions;
use crate::lead::LeadSource;
use crate::types::{DbId, Timestamp};

/// Highest priority value accepted for a rule (lower values run first).
pub const MAX_RULE_PRIORITY: i32 = 10_000;

// ---------------------------------------------------------------------------
// Source filter
// ---------------------------------------------------------------------------

/// Which lead sources a rule applies to.
///
/// Stored as `"any"` or a [`LeadSource`] name. `"all"` is accepted as an
/// alias of `"any"` for rules created by the dashboard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum SourceFilter {
    #[default]
    Any,
    Only(LeadSource),
}

impl SourceFilter {
    pub fn accepts(self, source: LeadSource) -> bool {
        match self {
            SourceFilter::Any => true,
            SourceFilter::Only(only) => only == source,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SourceFilter::Any => "any",
            SourceFilter::Only(source) => source.as_str(),
        }
    }
}

impl std::str::FromStr for SourceFilter {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "any" | "all" | "" => Ok(SourceFilter::Any),
            other => other.parse::<LeadSource>().map(SourceFilter::Only),
        }
    }
}

impl TryFrom<String> for SourceFilter {
    type Error = CoreError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<SourceFilter> for String {
    fn from(value: SourceFilter) -> Self {
        value.as_str().to_string()
    }
}

impl std::fmt::Display for SourceFilter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Strategy kind
// ---------------------------------------------------------------------------

define_text_enum! {
    /// Algorithm a rule uses to pick an agent.
    StrategyKind {
        RoundRobin = "round_robin",
        Weighted = "weighted",
        TeamBased = "team_based",
        Manual = "manual",
    }
}

impl StrategyKind {
    /// Whether the strategy advances a persisted rotation cursor.
    pub fn uses_rotation(self) -> bool {
        matches!(self, StrategyKind::RoundRobin | StrategyKind::TeamBased)
    }
}

// ---------------------------------------------------------------------------
// Entity
// ---------------------------------------------------------------------------

/// A configured policy mapping matching leads to an assignment strategy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DistributionRule {
    pub id: DbId,
    pub name: String,
    pub source: SourceFilter,
    pub condition: Condition,
    pub strategy: StrategyKind,
    pub priority: i32,
    pub is_active: bool,
    /// Starts at 1 and increments on every edit or activation change.
    pub version: i32,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

/// Sort rules into evaluation order: ascending priority, ties broken by
/// creation order (ascending id). The sort is stable.
pub fn order_for_evaluation(rules: &mut [DistributionRule]) {
    rules.sort_by_key(|rule| (rule.priority, rule.id));
}

/// Append-only snapshot of a rule as it was after an edit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleVersion {
    pub rule_id: DbId,
    pub version: i32,
    pub snapshot: serde_json::Value,
    pub created_at: Timestamp,
}

impl RuleVersion {
    /// Capture the current state of `rule` as a version row.
    pub fn capture(rule: &DistributionRule) -> Result<Self, CoreError> {
        let snapshot = serde_json::to_value(rule)
            .map_err(|e| CoreError::Internal(format!("Failed to snapshot rule: {e}")))?;
        Ok(Self {
            rule_id: rule.id,
            version: rule.version,
            snapshot,
            created_at: rule.updated_at,
        })
    }
}

// ---------------------------------------------------------------------------
// Save-time DTOs
// ---------------------------------------------------------------------------

/// Rule definition as submitted by the configuration UI.
///
/// Exactly one of `condition` (typed tree) or `legacy_conditions` (the
/// dashboard's field-to-expression object) may be supplied; neither means
/// "match every lead".
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreateRule {
    #[validate(length(min = 1, max = 128))]
    pub name: String,
    #[serde(default)]
    pub source: SourceFilter,
    pub condition: Option<Condition>,
    pub legacy_conditions: Option<serde_json::Value>,
    pub strategy: StrategyKind,
    #[validate(range(min = 0, max = 10_000))]
    pub priority: i32,
    pub is_active: Option<bool>,
}

/// Validated rule ready for insertion.
#[derive(Debug, Clone, PartialEq)]
pub struct NewRule {
    pub name: String,
    pub source: SourceFilter,
    pub condition: Condition,
    pub strategy: StrategyKind,
    pub priority: i32,
    pub is_active: bool,
}

impl CreateRule {
    pub fn new(name: impl Into<String>, strategy: StrategyKind, priority: i32) -> Self {
        Self {
            name: name.into(),
            source: SourceFilter::Any,
            condition: None,
            legacy_conditions: None,
            strategy,
            priority,
            is_active: None,
        }
    }

    pub fn with_source(mut self, source: SourceFilter) -> Self {
        self.source = source;
        self
    }

    pub fn with_condition(mut self, condition: Condition) -> Self {
        self.condition = Some(condition);
        self
    }

    /// Validate fields and resolve the condition into its typed form.
    pub fn into_new_rule(self) -> Result<NewRule, CoreError> {
        self.validate()?;
        let condition = resolve_condition(self.condition, self.legacy_conditions)?
            .unwrap_or_default();
        Ok(NewRule {
            name: self.name.trim().to_string(),
            source: self.source,
            condition,
            strategy: self.strategy,
            priority: self.priority,
            is_active: self.is_active.unwrap_or(true),
        })
    }
}

/// Partial rule edit. Activation is changed through dedicated calls.
#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct UpdateRule {
    #[validate(length(min = 1, max = 128))]
    pub name: Option<String>,
    pub source: Option<SourceFilter>,
    pub condition: Option<Condition>,
    pub legacy_conditions: Option<serde_json::Value>,
    pub strategy: Option<StrategyKind>,
    #[validate(range(min = 0, max = 10_000))]
    pub priority: Option<i32>,
}

/// Validated partial edit.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RulePatch {
    pub name: Option<String>,
    pub source: Option<SourceFilter>,
    pub condition: Option<Condition>,
    pub strategy: Option<StrategyKind>,
    pub priority: Option<i32>,
}

impl UpdateRule {
    pub fn into_patch(self) -> Result<RulePatch, CoreError> {
        self.validate()?;
        let condition = resolve_condition(self.condition, self.legacy_conditions)?;
        Ok(RulePatch {
            name: self.name.map(|n| n.trim().to_string()),
            source: self.source,
            condition,
            strategy: self.strategy,
            priority: self.priority,
        })
    }
}

impl RulePatch {
    /// Apply the non-`None` fields to `rule`.
    pub fn apply(&self, rule: &mut DistributionRule) {
        if let Some(name) = &self.name {
            rule.name = name.clone();
        }
        if let Some(source) = self.source {
            rule.source = source;
        }
        if let Some(condition) = &self.condition {
            rule.condition = condition.clone();
        }
        if let Some(strategy) = self.strategy {
            rule.strategy = strategy;
        }
        if let Some(priority) = self.priority {
            rule.priority = priority;
        }
    }
}

fn resolve_condition(
    typed: Option<Condition>,
    legacy: Option<serde_json::Value>,
) -> Result<Option<Condition>, CoreError> {
    match (typed, legacy) {
        (Some(_), Some(_)) => Err(CoreError::Validation(
            "Supply either condition or legacy_conditions, not both".to_string(),
        )),
        (Some(condition), None) => {
            validate_condition(&condition)?;
            Ok(Some(condition))
        }
        (None, Some(legacy)) => parse_legacy_conditions(&legacy).map(Some),
        (None, None) => Ok(None),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::condition::Comparator;
    use assert_matches::assert_matches;
    use chrono::Utc;

    fn rule(id: DbId, priority: i32) -> DistributionRule {
        DistributionRule {
            id,
            name: format!("rule-{id}"),
            source: SourceFilter::Any,
            condition: Condition::always(),
            strategy: StrategyKind::RoundRobin,
            priority,
            is_active: true,
            version: 1,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn source_filter_parses_any_and_all() {
        assert_eq!("any".parse::<SourceFilter>().unwrap(), SourceFilter::Any);
        assert_eq!("all".parse::<SourceFilter>().unwrap(), SourceFilter::Any);
        assert_eq!(
            "facebook".parse::<SourceFilter>().unwrap(),
            SourceFilter::Only(LeadSource::Facebook)
        );
    }

    #[test]
    fn source_filter_accepts() {
        assert!(SourceFilter::Any.accepts(LeadSource::Referral));
        assert!(SourceFilter::Only(LeadSource::Website).accepts(LeadSource::Website));
        assert!(!SourceFilter::Only(LeadSource::Website).accepts(LeadSource::Facebook));
    }

    #[test]
    fn source_filter_serializes_as_text() {
        let json = serde_json::to_value(SourceFilter::Only(LeadSource::Linkedin)).unwrap();
        assert_eq!(json, serde_json::json!("linkedin"));
    }

    #[test]
    fn evaluation_order_is_priority_then_creation() {
        let mut rules = vec![rule(4, 2), rule(3, 1), rule(1, 2), rule(2, 1)];
        order_for_evaluation(&mut rules);
        let ids: Vec<DbId> = rules.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![2, 3, 1, 4]);
    }

    #[test]
    fn create_rule_defaults_to_active_catch_all() {
        let new_rule = CreateRule::new("Catch all", StrategyKind::Manual, 99)
            .into_new_rule()
            .unwrap();
        assert!(new_rule.is_active);
        assert!(new_rule.condition.is_empty());
        assert_eq!(new_rule.source, SourceFilter::Any);
    }

    #[test]
    fn create_rule_parses_legacy_conditions() {
        let mut input = CreateRule::new("VIP", StrategyKind::Weighted, 1);
        input.legacy_conditions = Some(serde_json::json!({"estimatedValue": ">= 50000"}));
        let new_rule = input.into_new_rule().unwrap();
        assert_eq!(
            new_rule.condition,
            Condition::All(vec![Condition::compare(
                "estimatedValue",
                Comparator::Gte,
                50_000.0
            )])
        );
    }

    #[test]
    fn create_rule_rejects_both_condition_forms() {
        let mut input = CreateRule::new("Both", StrategyKind::Manual, 1)
            .with_condition(Condition::always());
        input.legacy_conditions = Some(serde_json::json!({}));
        assert_matches!(input.into_new_rule(), Err(CoreError::Validation(_)));
    }

    #[test]
    fn create_rule_rejects_blank_name_and_bad_priority() {
        assert_matches!(
            CreateRule::new("", StrategyKind::Manual, 1).into_new_rule(),
            Err(CoreError::Validation(_))
        );
        assert_matches!(
            CreateRule::new("x", StrategyKind::Manual, MAX_RULE_PRIORITY + 1).into_new_rule(),
            Err(CoreError::Validation(_))
        );
    }

    #[test]
    fn create_rule_rejects_invalid_condition() {
        let input = CreateRule::new("Bad", StrategyKind::RoundRobin, 1)
            .with_condition(Condition::compare("company", Comparator::Gte, 3.0));
        assert_matches!(input.into_new_rule(), Err(CoreError::Validation(_)));
    }

    #[test]
    fn patch_applies_only_supplied_fields() {
        let mut r = rule(1, 5);
        let patch = UpdateRule {
            priority: Some(1),
            source: Some(SourceFilter::Only(LeadSource::Website)),
            ..Default::default()
        }
        .into_patch()
        .unwrap();
        patch.apply(&mut r);
        assert_eq!(r.priority, 1);
        assert_eq!(r.source, SourceFilter::Only(LeadSource::Website));
        assert_eq!(r.name, "rule-1");
    }

    #[test]
    fn version_snapshot_captures_rule() {
        let r = rule(7, 3);
        let version = RuleVersion::capture(&r).unwrap();
        assert_eq!(version.rule_id, 7);
        assert_eq!(version.snapshot["priority"], 3);
        assert_eq!(version.snapshot["source"], "any");
    }
}
