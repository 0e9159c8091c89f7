use std::sync::Arc;
use std::time::Duration;

use leadroute_db::PgStore;
use leadroute_engine::telemetry::init_tracing;
use leadroute_engine::{EngineConfig, Orchestrator};
use leadroute_events::{EventAuditLog, EventBus};

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    // --- Configuration ---
    let config = EngineConfig::from_env().expect("Invalid engine configuration");

    // --- Tracing ---
    init_tracing(config.log_format).expect("Failed to install tracing subscriber");
    tracing::info!(
        timeout_ms = config.evaluation_timeout.as_millis() as u64,
        conflict_retries = config.conflict_retries,
        "Loaded engine configuration",
    );

    // --- Database ---
    let database_url = config
        .database_url
        .clone()
        .expect("DATABASE_URL must be set");

    let pool = leadroute_db::create_pool(&database_url, config.db_max_connections)
        .await
        .expect("Failed to connect to database");
    tracing::info!("Database connection pool created");

    leadroute_db::health_check(&pool)
        .await
        .expect("Database health check failed");
    tracing::info!("Database health check passed");

    leadroute_db::run_migrations(&pool)
        .await
        .expect("Failed to run database migrations");
    tracing::info!("Database migrations applied");

    // --- Event bus ---
    let event_bus = Arc::new(EventBus::new(config.event_bus_capacity));
    let audit_handle = tokio::spawn(EventAuditLog::run(event_bus.subscribe()));
    tracing::info!(
        capacity = config.event_bus_capacity,
        subscribers = event_bus.subscriber_count(),
        "Event bus started",
    );

    // --- Orchestrator ---
    let orchestrator = Orchestrator::new(
        Arc::new(PgStore::new(pool)),
        Arc::clone(&event_bus),
        &config,
    );

    match orchestrator.resume_evaluating().await {
        Ok(resumed) => tracing::info!(resumed = resumed.len(), "Interrupted passes resumed"),
        Err(e) => tracing::error!(error = %e, "Failed to resume interrupted passes"),
    }

    match orchestrator.analytics().rule_summaries().await {
        Ok(summaries) => {
            for s in summaries {
                tracing::info!(
                    rule_id = s.rule_id,
                    rule = %s.rule_name,
                    active = s.is_active,
                    agents = s.active_agents,
                    assigned = s.leads_assigned,
                    pending_manual = s.leads_pending_manual,
                    "Rule summary",
                );
            }
        }
        Err(e) => tracing::error!(error = %e, "Failed to load rule summaries"),
    }

    tracing::info!("Lead distribution engine ready");

    tokio::signal::ctrl_c()
        .await
        .expect("Failed to install Ctrl-C handler");

    // --- Shutdown ---
    tracing::info!("Shutting down");
    drop(orchestrator);
    drop(event_bus);
    let _ = tokio::time::timeout(Duration::from_secs(5), audit_handle).await;
    tracing::info!("Graceful shutdown complete");
}
