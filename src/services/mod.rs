use std::sync::Arc;
use std::time::Duration;

use mongodb::{Client as MongoClient, Database};
use redis::aio::ConnectionManager;

use crate::config::Config;
use crate::store::{
    MongoQuizStore, MongoSubmissionStore, MongoTaskStore, QuizStore, SubmissionStore, TaskStore,
};

pub mod attempts;
pub mod eligibility;
pub mod events;
pub mod grading;
pub mod ranking;
pub mod scheduler;

use attempts::AttemptManager;
use events::EventPublisher;
use ranking::RankingService;
use scheduler::{AutoSubmitHandler, Scheduler, SchedulerWorker, AUTO_SUBMIT_TASK};

pub struct AppState {
    pub config: Config,
    pub quizzes: Arc<dyn QuizStore>,
    pub submissions: Arc<dyn SubmissionStore>,
    pub tasks: Arc<dyn TaskStore>,
    pub attempts: Arc<AttemptManager>,
    pub ranking: Arc<RankingService>,
    pub events: EventPublisher,
}

impl AppState {
    /// Production wiring: Mongo-backed stores plus the Redis leaderboard
    /// cache.
    pub async fn new(
        config: Config,
        mongo_client: MongoClient,
        redis_client: redis::Client,
    ) -> anyhow::Result<Self> {
        let mongo: Database = mongo_client.database(&config.mongo_database);

        tracing::info!("Attempting to connect to Redis...");
        let redis = tokio::time::timeout(
            Duration::from_secs(30),
            ConnectionManager::new(redis_client),
        )
        .await
        .map_err(|_| anyhow::anyhow!("Redis connection timeout after 30s"))??;

        let mut conn = redis.clone();
        tokio::time::timeout(
            Duration::from_secs(5),
            redis::cmd("PING").query_async::<String>(&mut conn),
        )
        .await
        .map_err(|_| anyhow::anyhow!("Redis PING timeout after 5s"))??;
        tracing::info!("Redis connection established successfully");

        let submission_store = MongoSubmissionStore::new(mongo.clone());
        submission_store.ensure_indexes().await?;

        Ok(Self::with_stores(
            config,
            Arc::new(MongoQuizStore::new(mongo.clone())),
            Arc::new(submission_store),
            Arc::new(MongoTaskStore::new(mongo)),
            Some(redis),
        ))
    }

    /// Wiring over arbitrary store implementations; the test suite uses
    /// this with the in-memory stores.
    pub fn with_stores(
        config: Config,
        quizzes: Arc<dyn QuizStore>,
        submissions: Arc<dyn SubmissionStore>,
        tasks: Arc<dyn TaskStore>,
        redis: Option<ConnectionManager>,
    ) -> Self {
        let events = EventPublisher::default();
        let scheduler = Arc::new(Scheduler::new(tasks.clone()));
        let ranking = Arc::new(RankingService::new(
            submissions.clone(),
            redis,
            config.leaderboard_ttl_secs,
        ));
        let attempts = Arc::new(AttemptManager::new(
            quizzes.clone(),
            submissions.clone(),
            scheduler,
            ranking.clone(),
            events.clone(),
        ));

        Self {
            config,
            quizzes,
            submissions,
            tasks,
            attempts,
            ranking,
            events,
        }
    }

    /// The auto-submit worker for this state's task store. Spawned from
    /// main alongside the HTTP server.
    pub fn scheduler_worker(&self) -> SchedulerWorker {
        SchedulerWorker::new(
            self.tasks.clone(),
            Duration::from_secs(self.config.scheduler_tick_secs),
        )
        .register(
            AUTO_SUBMIT_TASK,
            Arc::new(AutoSubmitHandler::new(self.attempts.clone())),
        )
    }
}
