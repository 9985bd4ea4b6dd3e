use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use mongodb::{
    bson::{doc, to_bson, Bson},
    error::{ErrorKind, WriteFailure},
    options::{FindOneAndUpdateOptions, FindOptions, IndexOptions, ReturnDocument},
    Database, IndexModel,
};

use crate::models::{AnswerDetail, FinalizeUpdate, GradeUpdate, Quiz, Submission};

use super::{QuizStore, ScheduledTask, StoreResult, SubmissionStore, TaskStore};

const QUIZZES: &str = "quizzes";
const SUBMISSIONS: &str = "submissions";
const SCHEDULED_TASKS: &str = "scheduled_tasks";

pub struct MongoQuizStore {
    mongo: Database,
}

impl MongoQuizStore {
    pub fn new(mongo: Database) -> Self {
        Self { mongo }
    }
}

#[async_trait]
impl QuizStore for MongoQuizStore {
    async fn insert(&self, quiz: &Quiz) -> StoreResult<()> {
        self.mongo
            .collection::<Quiz>(QUIZZES)
            .insert_one(quiz)
            .await
            .context("Failed to insert quiz")?;
        Ok(())
    }

    async fn get(&self, quiz_id: &str) -> StoreResult<Option<Quiz>> {
        self.mongo
            .collection::<Quiz>(QUIZZES)
            .find_one(doc! { "_id": quiz_id })
            .await
            .context("Failed to query quiz")
    }

    async fn list(&self) -> StoreResult<Vec<Quiz>> {
        let options = FindOptions::builder()
            .sort(doc! { "created_at": -1 })
            .build();
        let cursor = self
            .mongo
            .collection::<Quiz>(QUIZZES)
            .find(doc! {})
            .with_options(options)
            .await
            .context("Failed to query quizzes")?;
        cursor.try_collect().await.context("Quiz cursor error")
    }
}

pub struct MongoSubmissionStore {
    mongo: Database,
}

impl MongoSubmissionStore {
    pub fn new(mongo: Database) -> Self {
        Self { mongo }
    }

    /// Unique index on (quiz_id, student_id) so the one-attempt-per-
    /// student invariant holds by construction.
    pub async fn ensure_indexes(&self) -> StoreResult<()> {
        let index = IndexModel::builder()
            .keys(doc! { "quiz_id": 1, "student_id": 1 })
            .options(IndexOptions::builder().unique(true).build())
            .build();
        self.mongo
            .collection::<Submission>(SUBMISSIONS)
            .create_index(index)
            .await
            .context("Failed to create submissions index")?;
        Ok(())
    }
}

fn pair_filter(quiz_id: &str, student_id: &str) -> mongodb::bson::Document {
    doc! { "quiz_id": quiz_id, "student_id": student_id }
}

fn is_duplicate_key(err: &mongodb::error::Error) -> bool {
    match &*err.kind {
        ErrorKind::Write(WriteFailure::WriteError(write_error)) => write_error.code == 11000,
        ErrorKind::Command(command_error) => command_error.code == 11000,
        _ => false,
    }
}

#[async_trait]
impl SubmissionStore for MongoSubmissionStore {
    async fn find_or_create(&self, candidate: Submission) -> StoreResult<(Submission, bool)> {
        let collection = self.mongo.collection::<Submission>(SUBMISSIONS);
        let candidate_id = candidate.id.clone();
        let filter = pair_filter(&candidate.quiz_id, &candidate.student_id);
        let insert = to_bson(&candidate).context("Failed to serialize submission")?;

        let options = FindOneAndUpdateOptions::builder()
            .upsert(true)
            .return_document(ReturnDocument::After)
            .build();

        let result = collection
            .find_one_and_update(filter, doc! { "$setOnInsert": insert })
            .with_options(options)
            .await;

        match result {
            Ok(submission) => {
                let submission = submission.context("Upsert returned no submission")?;
                let created = submission.id == candidate_id;
                Ok((submission, created))
            }
            // Two concurrent upserts can both miss the filter and take
            // the insert path; the unique index fails the loser, which
            // then reads the winner's record.
            Err(err) if is_duplicate_key(&err) => {
                let existing = collection
                    .find_one(pair_filter(&candidate.quiz_id, &candidate.student_id))
                    .await
                    .context("Failed to re-read submission after duplicate key")?
                    .context("Duplicate key with no stored submission")?;
                Ok((existing, false))
            }
            Err(err) => Err(err).context("Failed to upsert submission"),
        }
    }

    async fn get(&self, quiz_id: &str, student_id: &str) -> StoreResult<Option<Submission>> {
        self.mongo
            .collection::<Submission>(SUBMISSIONS)
            .find_one(pair_filter(quiz_id, student_id))
            .await
            .context("Failed to query submission")
    }

    async fn save_answers(
        &self,
        quiz_id: &str,
        student_id: &str,
        answers: &[AnswerDetail],
    ) -> StoreResult<Option<Submission>> {
        let mut filter = pair_filter(quiz_id, student_id);
        filter.insert("status", "in_progress");

        let update = doc! {
            "$set": {
                "answers": to_bson(answers).context("Failed to serialize answers")?,
            }
        };

        let options = FindOneAndUpdateOptions::builder()
            .return_document(ReturnDocument::After)
            .build();

        self.mongo
            .collection::<Submission>(SUBMISSIONS)
            .find_one_and_update(filter, update)
            .with_options(options)
            .await
            .context("Failed to save answers")
    }

    async fn finalize(
        &self,
        quiz_id: &str,
        student_id: &str,
        update: FinalizeUpdate,
    ) -> StoreResult<Option<Submission>> {
        // The race guard: only the caller that still sees a null
        // submitted_at wins the transition.
        let mut filter = pair_filter(quiz_id, student_id);
        filter.insert("submitted_at", Bson::Null);

        let set = doc! {
            "$set": {
                "answers": to_bson(&update.answers).context("Failed to serialize answers")?,
                "score": update.score,
                "status": to_bson(&update.status)?,
                "submitted_at": to_bson(&update.submitted_at)?,
                "auto_submitted": update.auto_submitted,
            }
        };

        let options = FindOneAndUpdateOptions::builder()
            .return_document(ReturnDocument::After)
            .build();

        self.mongo
            .collection::<Submission>(SUBMISSIONS)
            .find_one_and_update(filter, set)
            .with_options(options)
            .await
            .context("Failed to finalize submission")
    }

    async fn apply_grades(
        &self,
        quiz_id: &str,
        student_id: &str,
        update: GradeUpdate,
    ) -> StoreResult<Option<Submission>> {
        let mut filter = pair_filter(quiz_id, student_id);
        filter.insert("status", doc! { "$in": ["submitted", "graded"] });

        let set = doc! {
            "$set": {
                "answers": to_bson(&update.answers).context("Failed to serialize answers")?,
                "score": update.score,
                "status": to_bson(&update.status)?,
            }
        };

        let options = FindOneAndUpdateOptions::builder()
            .return_document(ReturnDocument::After)
            .build();

        self.mongo
            .collection::<Submission>(SUBMISSIONS)
            .find_one_and_update(filter, set)
            .with_options(options)
            .await
            .context("Failed to apply manual grades")
    }

    async fn list_for_quiz(&self, quiz_id: &str) -> StoreResult<Vec<Submission>> {
        let cursor = self
            .mongo
            .collection::<Submission>(SUBMISSIONS)
            .find(doc! { "quiz_id": quiz_id })
            .await
            .context("Failed to query submissions")?;
        cursor.try_collect().await.context("Submission cursor error")
    }

    async fn list_overdue(&self, now: DateTime<Utc>) -> StoreResult<Vec<Submission>> {
        let filter = doc! {
            "status": "in_progress",
            "deadline_ms": { "$ne": Bson::Null, "$lte": now.timestamp_millis() },
        };
        let cursor = self
            .mongo
            .collection::<Submission>(SUBMISSIONS)
            .find(filter)
            .await
            .context("Failed to query overdue submissions")?;
        cursor.try_collect().await.context("Overdue cursor error")
    }
}

pub struct MongoTaskStore {
    mongo: Database,
}

impl MongoTaskStore {
    pub fn new(mongo: Database) -> Self {
        Self { mongo }
    }
}

#[async_trait]
impl TaskStore for MongoTaskStore {
    async fn insert(&self, task: &ScheduledTask) -> StoreResult<()> {
        self.mongo
            .collection::<ScheduledTask>(SCHEDULED_TASKS)
            .insert_one(task)
            .await
            .context("Failed to insert scheduled task")?;
        Ok(())
    }

    async fn claim_due(&self, now: DateTime<Utc>) -> StoreResult<Option<ScheduledTask>> {
        // pending -> done in one step; a claimed task never fires twice
        // even with several worker processes polling.
        let filter = doc! {
            "status": "pending",
            "run_at_ms": { "$lte": now.timestamp_millis() },
        };
        let update = doc! { "$set": { "status": "done" }, "$inc": { "attempts": 1 } };

        let options = FindOneAndUpdateOptions::builder()
            .sort(doc! { "run_at_ms": 1 })
            .return_document(ReturnDocument::After)
            .build();

        self.mongo
            .collection::<ScheduledTask>(SCHEDULED_TASKS)
            .find_one_and_update(filter, update)
            .with_options(options)
            .await
            .context("Failed to claim scheduled task")
    }

    async fn requeue(&self, task_id: &str, run_at: DateTime<Utc>) -> StoreResult<()> {
        self.mongo
            .collection::<ScheduledTask>(SCHEDULED_TASKS)
            .update_one(
                doc! { "_id": task_id },
                doc! { "$set": { "status": "pending", "run_at_ms": run_at.timestamp_millis() } },
            )
            .await
            .context("Failed to requeue scheduled task")?;
        Ok(())
    }
}
