use crate::config::Config;
use crate::models::grade::GradingConfig;
use crate::models::{ActivityEvent, EventType};
use chrono::Utc;
use mongodb::{Client as MongoClient, Database};
use redis::aio::ConnectionManager;
use uuid::Uuid;

pub struct AppState {
    pub config: Config,
    pub mongo: Database,
    pub redis: ConnectionManager,
    pub grading: GradingConfig,
}

impl AppState {
    pub async fn new(
        config: Config,
        mongo_client: MongoClient,
        redis_client: redis::Client,
    ) -> anyhow::Result<Self> {
        let mongo = mongo_client.database(&config.mongo_database);

        tracing::info!("Attempting to connect to Redis...");

        // Create ConnectionManager with longer timeout
        let redis = tokio::time::timeout(
            std::time::Duration::from_secs(30),
            ConnectionManager::new(redis_client),
        )
        .await
        .map_err(|_| anyhow::anyhow!("Redis connection timeout after 30s"))??;

        tracing::info!("Redis ConnectionManager created, testing with PING...");

        // Test connection
        let mut conn = redis.clone();
        tokio::time::timeout(
            std::time::Duration::from_secs(5),
            redis::cmd("PING").query_async::<String>(&mut conn),
        )
        .await
        .map_err(|_| anyhow::anyhow!("Redis PING timeout after 5s"))??;

        tracing::info!("Redis connection established successfully");

        Ok(Self {
            config,
            mongo,
            redis,
            grading: GradingConfig::default(),
        })
    }
}

/// Append an activity event. Best-effort: analytics freshness is not worth
/// failing the parent operation, so errors are logged and swallowed.
pub async fn record_activity_event(mongo: &Database, user_id: &str, event_type: EventType) {
    let event = ActivityEvent {
        id: Uuid::new_v4().to_string(),
        user_id: user_id.to_string(),
        event_type,
        created_at: Utc::now(),
    };

    let collection = mongo.collection::<ActivityEvent>("activity_events");
    if let Err(e) = collection.insert_one(&event).await {
        tracing::warn!(
            "Failed to record {} event for user {}: {}",
            event_type.as_str(),
            user_id,
            e
        );
    }
}

pub mod analytics_service;
pub mod attendance_service;
pub mod certificate_service;
pub mod exam_attempt_service;
pub mod grade_service;
