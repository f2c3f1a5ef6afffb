use std::sync::Arc;

use crate::config::Config;
use crate::judge::Judge;
use contest_hub::ContestHub;
use mongodb::{Client as MongoClient, Database};
use redis::aio::ConnectionManager;

pub struct AppState {
    pub config: Config,
    pub mongo: Database,
    pub redis: ConnectionManager,
    pub judge: Arc<Judge>,
    pub contests: Arc<ContestHub>,
}

impl AppState {
    pub async fn new(
        config: Config,
        mongo_client: MongoClient,
        redis_client: redis::Client,
    ) -> anyhow::Result<Self> {
        let mongo = mongo_client.database(&config.mongo_database);

        tracing::info!("Attempting to connect to Redis...");

        let redis = tokio::time::timeout(
            std::time::Duration::from_secs(30),
            ConnectionManager::new(redis_client),
        )
        .await
        .map_err(|_| anyhow::anyhow!("Redis connection timeout after 30s"))??;

        let mut conn = redis.clone();
        tokio::time::timeout(
            std::time::Duration::from_secs(5),
            redis::cmd("PING").query_async::<String>(&mut conn),
        )
        .await
        .map_err(|_| anyhow::anyhow!("Redis PING timeout after 5s"))??;

        tracing::info!("Redis connection established successfully");

        tokio::fs::create_dir_all(&config.judge.temp_dir)
            .await
            .map_err(|e| {
                anyhow::anyhow!(
                    "Failed to create judge temp dir {}: {}",
                    config.judge.temp_dir.display(),
                    e
                )
            })?;

        let judge = Arc::new(Judge::with_process_sandbox(config.judge.clone()));
        tracing::info!(
            temp_dir = %config.judge.temp_dir.display(),
            max_concurrent = config.judge.max_concurrent_executions,
            max_queued = config.judge.max_queued_executions,
            "Judge initialized"
        );

        Ok(Self {
            config,
            mongo,
            redis,
            judge,
            contests: Arc::new(ContestHub::new()),
        })
    }
}

pub mod contest_hub;
pub mod contest_scheduler;
pub mod contest_service;
pub mod execution_service;
pub mod problem_service;
pub mod submission_service;
