//! Rule lifecycle and the cached evaluation order.
//!
//! The active rule list is read on every distribution pass, so it is cached.
//! Every mutation invalidates the cache before it returns, and a generation
//! counter stops a load that raced with a mutation from caching what it read.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use leadroute_core::rule::{
    order_for_evaluation, CreateRule, DistributionRule, RuleVersion, UpdateRule,
};
use leadroute_core::types::DbId;
use leadroute_db::DistributionStore;
use leadroute_events::{event_types, DistributionEvent, EventBus};
use parking_lot::RwLock;

use crate::error::EngineResult;

pub struct RuleStore {
    store: Arc<dyn DistributionStore>,
    bus: Arc<EventBus>,
    cache: RwLock<Option<Arc<Vec<DistributionRule>>>>,
    generation: AtomicU64,
}

impl RuleStore {
    pub fn new(store: Arc<dyn DistributionStore>, bus: Arc<EventBus>) -> Self {
        Self {
            store,
            bus,
            cache: RwLock::new(None),
            generation: AtomicU64::new(0),
        }
    }

    // -----------------------------------------------------------------------
    // Reads
    // -----------------------------------------------------------------------

    /// Active rules in evaluation order: ascending priority, then ascending id.
    pub async fn list_active_rules_ordered_by_priority(
        &self,
    ) -> EngineResult<Arc<Vec<DistributionRule>>> {
        if let Some(rules) = self.cache.read().clone() {
            return Ok(rules);
        }

        let generation = self.generation.load(Ordering::Acquire);
        let mut rules: Vec<DistributionRule> = self
            .store
            .list_rules()
            .await?
            .into_iter()
            .filter(|rule| rule.is_active)
            .collect();
        order_for_evaluation(&mut rules);
        let rules = Arc::new(rules);

        let mut cache = self.cache.write();
        if self.generation.load(Ordering::Acquire) == generation {
            *cache = Some(Arc::clone(&rules));
        }
        Ok(rules)
    }

    pub async fn get_rule(&self, id: DbId) -> EngineResult<DistributionRule> {
        Ok(self.store.get_rule(id).await?)
    }

    /// Every rule, active or not, in ascending id order.
    pub async fn list_rules(&self) -> EngineResult<Vec<DistributionRule>> {
        Ok(self.store.list_rules().await?)
    }

    /// Version history of one rule, oldest first.
    pub async fn list_rule_versions(&self, id: DbId) -> EngineResult<Vec<RuleVersion>> {
        self.store.get_rule(id).await?;
        Ok(self.store.list_rule_versions(id).await?)
    }

    // -----------------------------------------------------------------------
    // Mutations
    // -----------------------------------------------------------------------

    pub async fn create_rule(&self, input: CreateRule) -> EngineResult<DistributionRule> {
        let new_rule = input.into_new_rule()?;
        let rule = self.store.insert_rule(&new_rule).await?;
        self.invalidate();
        tracing::info!(
            rule_id = rule.id,
            name = %rule.name,
            strategy = %rule.strategy,
            priority = rule.priority,
            "Distribution rule created",
        );
        self.publish(event_types::RULE_CREATED, &rule);
        Ok(rule)
    }

    pub async fn update_rule(&self, id: DbId, input: UpdateRule) -> EngineResult<DistributionRule> {
        let patch = input.into_patch()?;
        let rule = self.store.update_rule(id, &patch).await?;
        self.invalidate();
        tracing::info!(rule_id = id, version = rule.version, "Distribution rule updated");
        self.publish(event_types::RULE_UPDATED, &rule);
        Ok(rule)
    }

    /// Retire a rule. It stays in storage so its records keep resolving.
    pub async fn deactivate_rule(&self, id: DbId) -> EngineResult<DistributionRule> {
        let rule = self.store.set_rule_active(id, false).await?;
        self.invalidate();
        tracing::info!(rule_id = id, version = rule.version, "Distribution rule deactivated");
        self.publish(event_types::RULE_DEACTIVATED, &rule);
        Ok(rule)
    }

    pub async fn activate_rule(&self, id: DbId) -> EngineResult<DistributionRule> {
        let rule = self.store.set_rule_active(id, true).await?;
        self.invalidate();
        tracing::info!(rule_id = id, version = rule.version, "Distribution rule activated");
        self.publish(event_types::RULE_ACTIVATED, &rule);
        Ok(rule)
    }

    /// Drop the cached rule list.
    pub fn invalidate(&self) {
        let mut cache = self.cache.write();
        self.generation.fetch_add(1, Ordering::AcqRel);
        *cache = None;
    }

    fn publish(&self, event_type: &str, rule: &DistributionRule) {
        self.bus.publish(
            DistributionEvent::new(event_type)
                .with_rule(Some(rule.id))
                .with_payload(serde_json::json!({
                    "name": rule.name,
                    "version": rule.version,
                    "is_active": rule.is_active,
                })),
        );
    }
}
