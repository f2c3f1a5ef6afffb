use std::collections::HashMap;

use anyhow::{Context, Result};
use futures::TryStreamExt;
use mongodb::bson::{doc, oid::ObjectId};
use mongodb::{Collection, Database};

use crate::metrics::track_db_operation;
use crate::models::problem::{slugify, CreateProblemRequest, Problem, ProblemMetadata};

pub const PROBLEMS_COLLECTION: &str = "problems";

pub struct ProblemService {
    problems: Collection<Problem>,
}

impl ProblemService {
    pub fn new(mongo: &Database) -> Self {
        Self {
            problems: mongo.collection::<Problem>(PROBLEMS_COLLECTION),
        }
    }

    pub async fn get(&self, id: &ObjectId) -> Result<Option<Problem>> {
        track_db_operation("find_one", PROBLEMS_COLLECTION, async {
            self.problems
                .find_one(doc! { "_id": *id })
                .await
                .context("Failed to load problem")
        })
        .await
    }

    /// Loads several problems at once, keyed by id; missing ids are skipped
    pub async fn get_many(&self, ids: &[ObjectId]) -> Result<HashMap<ObjectId, Problem>> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }

        let problems: Vec<Problem> = track_db_operation("find", PROBLEMS_COLLECTION, async {
            self.problems
                .find(doc! { "_id": { "$in": ids.to_vec() } })
                .await
                .context("Failed to query problems")?
                .try_collect()
                .await
                .context("Failed to read problems")
        })
        .await?;

        Ok(problems.into_iter().map(|p| (p.id, p)).collect())
    }

    /// Problem visible to regular users; unpublished ones count as missing
    pub async fn get_published(&self, id: &ObjectId) -> Result<Option<Problem>> {
        Ok(self
            .get(id)
            .await?
            .filter(|problem| problem.metadata.is_published))
    }

    pub async fn record_view(&self, id: &ObjectId) -> Result<()> {
        self.problems
            .update_one(doc! { "_id": *id }, doc! { "$inc": { "metadata.views": 1 } })
            .await
            .context("Failed to count problem view")?;
        Ok(())
    }

    pub async fn create(&self, req: CreateProblemRequest) -> Result<Problem> {
        let slug = req
            .slug
            .filter(|slug| !slug.trim().is_empty())
            .unwrap_or_else(|| slugify(&req.title));

        let problem = Problem {
            id: ObjectId::new(),
            title: req.title,
            slug,
            description: req.description,
            difficulty: req.difficulty,
            tags: req.tags,
            test_cases: req.test_cases,
            constraints: req.constraints,
            metadata: ProblemMetadata {
                is_published: req.is_published,
                ..ProblemMetadata::default()
            },
        };

        track_db_operation("insert_one", PROBLEMS_COLLECTION, async {
            self.problems
                .insert_one(&problem)
                .await
                .context("Failed to insert problem")
        })
        .await?;

        tracing::info!(problem_id = %problem.id.to_hex(), title = %problem.title, "Problem created");
        Ok(problem)
    }

    /// Bumps submission counters and recomputes the acceptance rate
    pub async fn record_submission(&self, id: &ObjectId, accepted: bool) -> Result<()> {
        let accepted_inc = if accepted { 1 } else { 0 };
        let pipeline = vec![
            doc! {
                "$set": {
                    "metadata.submissions": { "$add": [{ "$ifNull": ["$metadata.submissions", 0] }, 1] },
                    "metadata.acceptedSubmissions": {
                        "$add": [{ "$ifNull": ["$metadata.acceptedSubmissions", 0] }, accepted_inc]
                    },
                }
            },
            doc! {
                "$set": {
                    "metadata.acceptanceRate": {
                        "$round": [{
                            "$multiply": [
                                { "$divide": ["$metadata.acceptedSubmissions", "$metadata.submissions"] },
                                100
                            ]
                        }, 0]
                    }
                }
            },
        ];

        track_db_operation("update_one", PROBLEMS_COLLECTION, async {
            self.problems
                .update_one(doc! { "_id": *id }, pipeline)
                .await
                .context("Failed to update problem statistics")
        })
        .await?;
        Ok(())
    }
}
