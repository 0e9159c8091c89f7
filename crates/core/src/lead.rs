//! Lead entity, ingestion input, and the per-lead distribution state machine.
//!
//! Leads are created on ingestion and mutated only by the orchestrator
//! (assignment) and by external edit actions (status changes, archiving).
//! They are never deleted.

use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::error::CoreError;
use crate::types::{DbId, Timestamp};

// ---------------------------------------------------------------------------
// Enumerations
// ---------------------------------------------------------------------------

define_text_enum! {
    /// Channel a lead arrived through.
    LeadSource {
        Website = "website",
        Facebook = "facebook",
        Linkedin = "linkedin",
        Google = "google",
        SocialMedia = "social_media",
        Referral = "referral",
        ColdCall = "cold_call",
        Email = "email",
        Event = "event",
        Advertisement = "advertisement",
        Other = "other",
    }
}

define_text_enum! {
    /// Sales pipeline status, edited by agents after assignment.
    LeadStatus {
        New = "new",
        Contacted = "contacted",
        Qualified = "qualified",
        Proposal = "proposal",
        Negotiation = "negotiation",
        ClosedWon = "closed_won",
        ClosedLost = "closed_lost",
    }
}

impl LeadStatus {
    /// Whether the lead has left the active pipeline.
    pub fn is_closed(self) -> bool {
        matches!(self, LeadStatus::ClosedWon | LeadStatus::ClosedLost)
    }
}

define_text_enum! {
    /// Where a lead is in the distribution pipeline.
    DistributionState {
        /// Ingested, not yet evaluated.
        Unassigned = "unassigned",
        /// A distribution pass is running (or timed out and awaits a retry).
        Evaluating = "evaluating",
        /// An agent owns the lead.
        Assigned = "assigned",
        /// Waiting for a human reviewer to pick an agent.
        PendingManual = "pending_manual",
        /// No active rule matched.
        Unmatched = "unmatched",
    }
}

// ---------------------------------------------------------------------------
// State machine
// ---------------------------------------------------------------------------

/// Allowed [`DistributionState`] transitions.
pub mod state_machine {
    use super::DistributionState::{self, *};
    use crate::error::CoreError;

    /// Returns the set of states reachable from `from`.
    ///
    /// `Evaluating -> Evaluating` is the resume path for a pass that timed
    /// out. Every settled state may re-enter `Evaluating` (reassignment) or
    /// jump straight to `Assigned` (manual override).
    pub fn valid_transitions(from: DistributionState) -> &'static [DistributionState] {
        match from {
            Unassigned => &[Evaluating],
            Evaluating => &[Assigned, PendingManual, Unmatched, Evaluating],
            Assigned => &[Evaluating, Assigned],
            PendingManual => &[Evaluating, Assigned],
            Unmatched => &[Evaluating, Assigned],
        }
    }

    /// Check whether a transition from `from` to `to` is valid.
    pub fn can_transition(from: DistributionState, to: DistributionState) -> bool {
        valid_transitions(from).contains(&to)
    }

    /// Validate a state transition.
    pub fn validate_transition(
        from: DistributionState,
        to: DistributionState,
    ) -> Result<(), CoreError> {
        if can_transition(from, to) {
            Ok(())
        } else {
            Err(CoreError::Conflict(format!(
                "Invalid distribution transition: {from} -> {to}"
            )))
        }
    }
}

// ---------------------------------------------------------------------------
// Entity
// ---------------------------------------------------------------------------

/// A sales prospect to be routed to an agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lead {
    pub id: DbId,
    pub first_name: String,
    pub last_name: String,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub company: Option<String>,
    pub source: LeadSource,
    pub campaign_source: Option<String>,
    pub product_interest: Option<String>,
    pub estimated_value: Option<f64>,
    pub heat_score: Option<i32>,
    pub team_id: Option<DbId>,
    pub tags: Vec<String>,
    pub status: LeadStatus,
    pub distribution_state: DistributionState,
    /// Rule-agent entry currently holding the lead.
    pub assigned_agent_id: Option<DbId>,
    /// User behind `assigned_agent_id`.
    pub assigned_user_id: Option<DbId>,
    /// Rule that produced the latest outcome.
    pub distribution_rule_id: Option<DbId>,
    /// Set when automatic distribution gave up and an operator must look.
    pub needs_review: bool,
    /// Id assigned by the upstream channel (e.g. a Facebook lead-gen id).
    pub external_id: Option<String>,
    pub archived_at: Option<Timestamp>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl Lead {
    pub fn is_archived(&self) -> bool {
        self.archived_at.is_some()
    }

    /// Resolve a condition field to this lead's value.
    ///
    /// Returns `None` when the lead has no value for the field.
    pub fn field_value(&self, field: LeadField) -> Option<FieldValue> {
        match field {
            LeadField::Source => Some(FieldValue::Text(self.source.as_str().to_string())),
            LeadField::Status => Some(FieldValue::Text(self.status.as_str().to_string())),
            LeadField::EstimatedValue => self.estimated_value.map(FieldValue::Number),
            LeadField::HeatScore => self.heat_score.map(|s| FieldValue::Number(f64::from(s))),
            LeadField::TeamId => self.team_id.map(|t| FieldValue::Number(t as f64)),
            LeadField::Company => self.company.clone().map(FieldValue::Text),
            LeadField::Email => self.email.clone().map(FieldValue::Text),
            LeadField::CampaignSource => self.campaign_source.clone().map(FieldValue::Text),
            LeadField::ProductInterest => self.product_interest.clone().map(FieldValue::Text),
            LeadField::Tags => Some(FieldValue::List(self.tags.clone())),
        }
    }
}

/// Lead attributes a rule condition may reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeadField {
    Source,
    Status,
    EstimatedValue,
    HeatScore,
    TeamId,
    Company,
    Email,
    CampaignSource,
    ProductInterest,
    Tags,
}

impl LeadField {
    /// Look up a field by name. Accepts snake_case and the camelCase
    /// spelling used by the dashboard's condition editor.
    pub fn from_name(name: &str) -> Option<Self> {
        let field = match name {
            "source" => LeadField::Source,
            "status" => LeadField::Status,
            "estimated_value" | "estimatedValue" => LeadField::EstimatedValue,
            "heat_score" | "heatScore" => LeadField::HeatScore,
            "team_id" | "teamId" => LeadField::TeamId,
            "company" => LeadField::Company,
            "email" => LeadField::Email,
            "campaign_source" | "campaignSource" => LeadField::CampaignSource,
            "product_interest" | "productInterest" => LeadField::ProductInterest,
            "tags" => LeadField::Tags,
            _ => return None,
        };
        Some(field)
    }

    /// Whether ordering comparators (`gt`, `lte`, ...) make sense.
    pub fn is_numeric(self) -> bool {
        matches!(
            self,
            LeadField::EstimatedValue | LeadField::HeatScore | LeadField::TeamId
        )
    }
}

/// A lead attribute value as seen by the condition evaluator.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Number(f64),
    Text(String),
    List(Vec<String>),
}

// ---------------------------------------------------------------------------
// Ingestion input
// ---------------------------------------------------------------------------

/// Inbound lead as delivered by webhook handlers or manual entry.
#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct LeadInput {
    #[validate(length(min = 1, max = 100))]
    pub first_name: String,
    #[validate(length(max = 100))]
    pub last_name: String,
    #[validate(email)]
    pub email: Option<String>,
    #[validate(length(max = 32))]
    pub phone: Option<String>,
    #[validate(length(max = 200))]
    pub company: Option<String>,
    pub source: Option<LeadSource>,
    #[validate(length(max = 200))]
    pub campaign_source: Option<String>,
    #[validate(length(max = 200))]
    pub product_interest: Option<String>,
    #[validate(range(min = 0.0))]
    pub estimated_value: Option<f64>,
    #[validate(range(min = 0, max = 100))]
    pub heat_score: Option<i32>,
    pub team_id: Option<DbId>,
    pub tags: Option<Vec<String>>,
    #[validate(length(min = 1, max = 128))]
    pub external_id: Option<String>,
}

impl LeadInput {
    /// Run field validation and normalise tags (trimmed, empty dropped).
    pub fn validated(mut self) -> Result<Self, CoreError> {
        self.validate()?;
        if let Some(estimated) = self.estimated_value {
            if !estimated.is_finite() {
                return Err(CoreError::Validation(
                    "estimated_value must be a finite number".to_string(),
                ));
            }
        }
        if let Some(tags) = self.tags.take() {
            self.tags = Some(
                tags.into_iter()
                    .map(|t| t.trim().to_string())
                    .filter(|t| !t.is_empty())
                    .collect(),
            );
        }
        Ok(self)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::state_machine::*;
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn source_round_trips_through_text() {
        for source in LeadSource::ALL {
            assert_eq!(source.as_str().parse::<LeadSource>().unwrap(), *source);
        }
    }

    #[test]
    fn unknown_source_is_validation_error() {
        assert_matches!("carrier_pigeon".parse::<LeadSource>(), Err(CoreError::Validation(_)));
    }

    #[test]
    fn closed_statuses() {
        assert!(LeadStatus::ClosedWon.is_closed());
        assert!(LeadStatus::ClosedLost.is_closed());
        assert!(!LeadStatus::Negotiation.is_closed());
    }

    // -- state machine --------------------------------------------------------

    #[test]
    fn unassigned_only_enters_evaluating() {
        assert_eq!(
            valid_transitions(DistributionState::Unassigned),
            &[DistributionState::Evaluating]
        );
    }

    #[test]
    fn evaluating_settles_into_any_outcome() {
        for to in [
            DistributionState::Assigned,
            DistributionState::PendingManual,
            DistributionState::Unmatched,
        ] {
            assert!(can_transition(DistributionState::Evaluating, to));
        }
    }

    #[test]
    fn settled_states_can_reenter_evaluation() {
        for from in [
            DistributionState::Assigned,
            DistributionState::PendingManual,
            DistributionState::Unmatched,
        ] {
            assert!(can_transition(from, DistributionState::Evaluating));
        }
    }

    #[test]
    fn unassigned_cannot_jump_to_assigned() {
        assert_matches!(
            validate_transition(DistributionState::Unassigned, DistributionState::Assigned),
            Err(CoreError::Conflict(_))
        );
    }

    // -- field resolution -----------------------------------------------------

    #[test]
    fn field_names_accept_camel_case() {
        assert_eq!(LeadField::from_name("estimatedValue"), Some(LeadField::EstimatedValue));
        assert_eq!(LeadField::from_name("estimated_value"), Some(LeadField::EstimatedValue));
        assert_eq!(LeadField::from_name("favourite_colour"), None);
    }

    // -- input validation -----------------------------------------------------

    fn input() -> LeadInput {
        LeadInput {
            first_name: "Emma".to_string(),
            last_name: "Davis".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn valid_input_passes() {
        assert!(input().validated().is_ok());
    }

    #[test]
    fn empty_first_name_rejected() {
        let mut bad = input();
        bad.first_name.clear();
        assert_matches!(bad.validated(), Err(CoreError::Validation(_)));
    }

    #[test]
    fn malformed_email_rejected() {
        let mut bad = input();
        bad.email = Some("not-an-email".to_string());
        assert_matches!(bad.validated(), Err(CoreError::Validation(_)));
    }

    #[test]
    fn heat_score_out_of_range_rejected() {
        let mut bad = input();
        bad.heat_score = Some(101);
        assert_matches!(bad.validated(), Err(CoreError::Validation(_)));
    }

    #[test]
    fn tags_are_trimmed_and_blank_dropped() {
        let mut lead = input();
        lead.tags = Some(vec![" vip ".to_string(), "  ".to_string()]);
        let lead = lead.validated().unwrap();
        assert_eq!(lead.tags, Some(vec!["vip".to_string()]));
    }
}
