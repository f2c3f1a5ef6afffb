use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use futures::TryStreamExt;
use mongodb::bson::{self, doc, oid::ObjectId, Bson, Document};
use mongodb::{Collection, Database};
use redis::aio::ConnectionManager;
use validator::Validate;

use super::contest_hub::ContestHub;
use super::contest_service::ContestService;
use super::problem_service::ProblemService;
use super::AppState;
use crate::error::{parse_object_id, ApiError};
use crate::judge::{Judge, JudgeRequest, ProgressFn};
use crate::metrics::{
    track_cache_operation, track_db_operation, JUDGE_FAILURES_TOTAL, SUBMISSIONS_TOTAL,
};
use crate::models::execution::JudgeReport;
use crate::models::problem::Problem;
use crate::models::submission::{
    JudgingState, LimitQuery, Pagination, ProblemSubmissionsQuery, ProblemSubmissionsResponse,
    ProblemSummary, RecentStats, RecentSubmissionsResponse, SolvedSubmissionsResponse,
    SubmissionListQuery, SubmissionListResponse, SubmissionStats, SubmissionStatus,
    SubmissionView, SubmitRequest, SubmitResponse, check_code_size,
};
use crate::models::{Language, Submission, Verdict};
use crate::utils::retry::{retry_async_with_config, RetryConfig};
use crate::utils::time::{chrono_to_bson, start_of_day};

pub const SUBMISSIONS_COLLECTION: &str = "submissions";
pub const USERS_COLLECTION: &str = "users";

const RUNNING_TTL_SECONDS: u64 = 600;
const INTERNAL_JUDGE_ERROR: &str = "Internal judge error";

const DEFAULT_PAGE_SIZE: i64 = 20;
const MAX_LIST_PAGE_SIZE: i64 = 100;
const MAX_PROBLEM_PAGE_SIZE: i64 = 50;
const DEFAULT_RECENT_LIMIT: i64 = 10;
const MAX_RECENT_LIMIT: i64 = 50;

fn running_key(submission_id: &ObjectId) -> String {
    format!("submission:running:{}", submission_id.to_hex())
}

/// Request metadata stored with a submission
#[derive(Debug, Clone, Default)]
pub struct ClientInfo {
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

/// Submission intake, background judging and the read side of submissions
#[derive(Clone)]
pub struct SubmissionService {
    mongo: Database,
    redis: ConnectionManager,
    judge: Arc<Judge>,
    contests: Arc<ContestHub>,
}

impl SubmissionService {
    pub fn new(state: &AppState) -> Self {
        Self {
            mongo: state.mongo.clone(),
            redis: state.redis.clone(),
            judge: state.judge.clone(),
            contests: state.contests.clone(),
        }
    }

    fn submissions(&self) -> Collection<Submission> {
        self.mongo.collection::<Submission>(SUBMISSIONS_COLLECTION)
    }

    /// Stores a pending submission and starts judging it in the background
    pub async fn submit(
        &self,
        user_id: &str,
        req: SubmitRequest,
        client: ClientInfo,
    ) -> Result<SubmitResponse, ApiError> {
        req.validate()?;
        let language: Language = req.language.parse().map_err(ApiError::BadRequest)?;
        check_code_size(&req.code).map_err(ApiError::BadRequest)?;

        let problem_id = parse_object_id(&req.problem_id, "problem id")?;
        let problems = ProblemService::new(&self.mongo);
        let problem = problems
            .get_published(&problem_id)
            .await?
            .ok_or_else(|| ApiError::not_found("Problem not found"))?;

        if problem.test_cases.is_empty() {
            return Err(ApiError::bad_request("Problem has no test cases to judge"));
        }
        if self.judge.queue().is_saturated() {
            return Err(ApiError::ServiceUnavailable("Judge queue is full".to_string()));
        }

        let is_resubmit = self
            .count(doc! { "user": user_id, "problem": problem_id, "verdict": Verdict::Accepted.as_str() })
            .await?
            > 0;
        let first_attempt = self
            .count(doc! { "user": user_id, "problem": problem_id })
            .await?
            == 0;

        let submission = Submission {
            id: ObjectId::new(),
            user: user_id.to_string(),
            problem: problem_id,
            language,
            code_size: req.code.len() as i64,
            code: req.code,
            verdict: Verdict::Pending,
            runtime: 0,
            memory: 0,
            test_cases_passed: 0,
            total_test_cases: problem.test_cases.len() as i64,
            execution_results: Vec::new(),
            error_message: None,
            contest_id: req.contest_id.filter(|id| !id.trim().is_empty()),
            ip_address: client.ip_address,
            user_agent: client.user_agent,
            created_at: Utc::now(),
            executed_at: None,
            execution_time: None,
        };

        track_db_operation("insert_one", SUBMISSIONS_COLLECTION, async {
            self.submissions()
                .insert_one(&submission)
                .await
                .context("Failed to insert submission")
        })
        .await?;

        SUBMISSIONS_TOTAL
            .with_label_values(&[language.as_str()])
            .inc();

        if first_attempt {
            if let Err(e) = problems.record_view(&problem_id).await {
                tracing::warn!(problem_id = %problem_id.to_hex(), error = %e, "Failed to count problem view");
            }
        }

        tracing::info!(
            submission_id = %submission.id.to_hex(),
            user_id,
            problem_id = %problem_id.to_hex(),
            language = %language,
            contest_id = ?submission.contest_id,
            "Submission received"
        );

        let response = SubmitResponse {
            message: "Submission received and queued for judging".to_string(),
            submission: SubmissionView::detailed(&submission),
            is_resubmit,
        };

        let service = self.clone();
        tokio::spawn(async move {
            service.judge_submission(submission, problem).await;
        });

        Ok(response)
    }

    async fn judge_submission(&self, submission: Submission, problem: Problem) {
        let constraints = problem.constraints.clamped();
        let request = JudgeRequest {
            language: submission.language,
            code: submission.code.clone(),
            test_cases: problem.test_cases.clone(),
            limits: self
                .judge
                .limits(constraints.time_limit as u64, constraints.memory_limit as u64),
            check_output: true,
        };

        let progress = self.progress_reporter(&submission.id);
        let report = match self.judge.judge_with_progress(request, Some(progress)).await {
            Ok(report) => report,
            Err(e) => {
                tracing::error!(
                    submission_id = %submission.id.to_hex(),
                    error = %e,
                    "Judging failed"
                );
                JUDGE_FAILURES_TOTAL.with_label_values(&["submission"]).inc();
                JudgeReport {
                    verdict: Verdict::RuntimeError,
                    runtime: 0,
                    memory: 0,
                    test_cases_passed: 0,
                    total_test_cases: problem.test_cases.len(),
                    results: Vec::new(),
                    error_message: Some(INTERNAL_JUDGE_ERROR.to_string()),
                }
            }
        };

        if let Err(e) = self.finalize(&submission, &problem, report).await {
            tracing::error!(
                submission_id = %submission.id.to_hex(),
                error = %e,
                "Failed to store judging result"
            );
            JUDGE_FAILURES_TOTAL.with_label_values(&["persist"]).inc();
        }

        self.clear_running(&submission.id).await;
    }

    /// Publishes the 1-based index of the running test case under the running key
    fn progress_reporter(&self, submission_id: &ObjectId) -> ProgressFn {
        let redis = self.redis.clone();
        let key = running_key(submission_id);
        Box::new(move |index| {
            let mut conn = redis.clone();
            let key = key.clone();
            tokio::spawn(async move {
                let result: redis::RedisResult<()> = redis::cmd("SETEX")
                    .arg(&key)
                    .arg(RUNNING_TTL_SECONDS)
                    .arg(index)
                    .query_async(&mut conn)
                    .await;
                if let Err(e) = result {
                    tracing::debug!(key = %key, error = %e, "Failed to publish judging progress");
                }
            });
        })
    }

    async fn clear_running(&self, submission_id: &ObjectId) {
        let mut conn = self.redis.clone();
        let key = running_key(submission_id);
        let result = track_cache_operation("del", async {
            redis::cmd("DEL")
                .arg(&key)
                .query_async::<()>(&mut conn)
                .await
                .context("Failed to clear running flag")
        })
        .await;
        if let Err(e) = result {
            tracing::warn!(key = %key, error = %e, "Running flag left to expire");
        }
    }

    async fn finalize(
        &self,
        submission: &Submission,
        problem: &Problem,
        report: JudgeReport,
    ) -> Result<()> {
        let executed_at = Utc::now();
        let execution_time = (executed_at - submission.created_at).num_milliseconds();
        let accepted = report.verdict == Verdict::Accepted;

        let update = doc! {
            "$set": {
                "verdict": report.verdict.as_str(),
                "runtime": report.runtime as i64,
                "memory": report.memory as i64,
                "testCasesPassed": report.test_cases_passed as i64,
                "totalTestCases": report.total_test_cases as i64,
                "executionResults": bson::to_bson(&report.results)?,
                "errorMessage": report.error_message.clone().map(Bson::String).unwrap_or(Bson::Null),
                "executedAt": chrono_to_bson(executed_at),
                "executionTime": execution_time,
            }
        };

        retry_async_with_config(RetryConfig::default(), || {
            let update = update.clone();
            async move {
                track_db_operation("update_one", SUBMISSIONS_COLLECTION, async {
                    self.submissions()
                        .update_one(doc! { "_id": submission.id }, update)
                        .await
                        .context("Failed to update submission")
                })
                .await
            }
        })
        .await?;

        tracing::info!(
            submission_id = %submission.id.to_hex(),
            verdict = %report.verdict,
            passed = report.test_cases_passed,
            total = report.total_test_cases,
            execution_time_ms = execution_time,
            "Submission judged"
        );

        if let Err(e) = self.update_user_stats(submission, problem, accepted).await {
            tracing::warn!(user_id = %submission.user, error = %e, "Failed to update user stats");
        }

        if let Err(e) = ProblemService::new(&self.mongo)
            .record_submission(&problem.id, accepted)
            .await
        {
            tracing::warn!(problem_id = %problem.id.to_hex(), error = %e, "Failed to update problem stats");
        }

        if let (true, Some(contest_id)) = (accepted, &submission.contest_id) {
            let contests = ContestService::new(self.redis.clone(), self.contests.clone());
            if let Err(e) = contests
                .record_accepted(contest_id, &submission.user, &problem.id.to_hex(), executed_at)
                .await
            {
                tracing::warn!(contest_id = %contest_id, error = %e, "Failed to update contest leaderboard");
            }
        }

        Ok(())
    }

    async fn update_user_stats(
        &self,
        submission: &Submission,
        problem: &Problem,
        accepted: bool,
    ) -> Result<()> {
        let first_solve = accepted
            && self
                .count(doc! {
                    "user": submission.user.as_str(),
                    "problem": problem.id,
                    "verdict": Verdict::Accepted.as_str(),
                    "_id": { "$ne": submission.id },
                })
                .await?
                == 0;

        let update = user_stats_update(problem, accepted, first_solve);
        let users = self.mongo.collection::<Document>(USERS_COLLECTION);
        let result = track_db_operation("update_one", USERS_COLLECTION, async {
            users
                .update_one(user_filter(&submission.user), update)
                .await
                .context("Failed to update user stats")
        })
        .await?;

        if result.matched_count == 0 {
            tracing::debug!(user_id = %submission.user, "No user document to update stats on");
        }
        Ok(())
    }

    async fn count(&self, filter: Document) -> Result<u64> {
        track_db_operation("count_documents", SUBMISSIONS_COLLECTION, async {
            self.submissions()
                .count_documents(filter)
                .await
                .context("Failed to count submissions")
        })
        .await
    }

    async fn find_one(&self, id: &ObjectId) -> Result<Option<Submission>> {
        track_db_operation("find_one", SUBMISSIONS_COLLECTION, async {
            self.submissions()
                .find_one(doc! { "_id": *id })
                .await
                .context("Failed to load submission")
        })
        .await
    }

    async fn find_many(
        &self,
        filter: Document,
        sort: Document,
        skip: u64,
        limit: i64,
    ) -> Result<Vec<Submission>> {
        track_db_operation("find", SUBMISSIONS_COLLECTION, async {
            self.submissions()
                .find(filter)
                .sort(sort)
                .skip(skip)
                .limit(limit)
                .await
                .context("Failed to query submissions")?
                .try_collect()
                .await
                .context("Failed to read submissions")
        })
        .await
    }

    /// Loads the submission and checks that the caller may read it
    async fn owned(&self, id: &str, user_id: &str, is_admin: bool) -> Result<Submission, ApiError> {
        let id = parse_object_id(id, "submission id")?;
        let submission = self
            .find_one(&id)
            .await?
            .ok_or_else(|| ApiError::not_found("Submission not found"))?;

        if submission.user != user_id && !is_admin {
            return Err(ApiError::forbidden("Not authorized to view this submission"));
        }
        Ok(submission)
    }

    pub async fn status(
        &self,
        id: &str,
        user_id: &str,
        is_admin: bool,
    ) -> Result<SubmissionStatus, ApiError> {
        let submission = self.owned(id, user_id, is_admin).await?;

        let current_test_case = if submission.verdict.is_final() {
            None
        } else {
            let mut conn = self.redis.clone();
            let key = running_key(&submission.id);
            track_cache_operation("get", async {
                redis::cmd("GET")
                    .arg(&key)
                    .query_async::<Option<usize>>(&mut conn)
                    .await
                    .context("Failed to read running flag")
            })
            .await?
        };

        Ok(SubmissionStatus {
            submission_id: submission.id.to_hex(),
            status: JudgingState::of(submission.verdict, current_test_case.is_some()),
            verdict: submission.verdict,
            current_test_case,
            test_cases_passed: submission.test_cases_passed,
            total_test_cases: submission.total_test_cases,
            runtime: submission.runtime,
            memory: submission.memory,
        })
    }

    pub async fn get(
        &self,
        id: &str,
        user_id: &str,
        is_admin: bool,
    ) -> Result<SubmissionView, ApiError> {
        let submission = self.owned(id, user_id, is_admin).await?;
        let view = SubmissionView::detailed(&submission);

        let problem = ProblemService::new(&self.mongo).get(&submission.problem).await?;
        Ok(match problem {
            Some(problem) => view.with_problem(&problem),
            None => view,
        })
    }

    pub async fn list(
        &self,
        user_id: &str,
        query: SubmissionListQuery,
    ) -> Result<SubmissionListResponse, ApiError> {
        let filter = list_filter(user_id, &query)?;
        let sort = sort_document(query.sort_by.as_deref())?;
        let page = query.page.unwrap_or(1).max(1);
        let limit = page_size(query.limit, DEFAULT_PAGE_SIZE, MAX_LIST_PAGE_SIZE);
        let skip = page_offset(page, limit)?;

        let submissions = self
            .find_many(filter.clone(), sort, skip, limit)
            .await?;
        let total = self.count(filter.clone()).await?;
        let stats = self.stats(filter).await?;

        Ok(SubmissionListResponse {
            submissions: self.with_problems(&submissions).await?,
            pagination: Pagination::new(page, limit, total),
            stats,
        })
    }

    async fn stats(&self, filter: Document) -> Result<SubmissionStats> {
        let accepted = Verdict::Accepted.as_str();
        let pipeline = vec![
            doc! { "$match": filter },
            doc! {
                "$group": {
                    "_id": Bson::Null,
                    "total": { "$sum": 1 },
                    "accepted": { "$sum": { "$cond": [{ "$eq": ["$verdict", accepted] }, 1, 0] } },
                    "avgRuntime": { "$avg": { "$cond": [{ "$eq": ["$verdict", accepted] }, "$runtime", Bson::Null] } },
                }
            },
        ];

        let row = track_db_operation("aggregate", SUBMISSIONS_COLLECTION, async {
            self.submissions()
                .aggregate(pipeline)
                .await
                .context("Failed to aggregate submission stats")?
                .try_next()
                .await
                .context("Failed to read submission stats")
        })
        .await?;

        Ok(row.map(|row| stats_from_row(&row)).unwrap_or_default())
    }

    pub async fn problem_submissions(
        &self,
        user_id: &str,
        problem_id: &str,
        query: ProblemSubmissionsQuery,
    ) -> Result<ProblemSubmissionsResponse, ApiError> {
        let problem_id = parse_object_id(problem_id, "problem id")?;
        let problem = ProblemService::new(&self.mongo)
            .get(&problem_id)
            .await?
            .ok_or_else(|| ApiError::not_found("Problem not found"))?;

        let mut filter = doc! { "user": user_id, "problem": problem_id };
        if let Some(verdict) = &query.verdict {
            let verdict: Verdict = verdict.parse().map_err(ApiError::BadRequest)?;
            filter.insert("verdict", verdict.as_str());
        }

        let page = query.page.unwrap_or(1).max(1);
        let limit = page_size(query.limit, DEFAULT_PAGE_SIZE, MAX_PROBLEM_PAGE_SIZE);
        let skip = page_offset(page, limit)?;
        let submissions = self
            .find_many(filter.clone(), doc! { "createdAt": -1 }, skip, limit)
            .await?;
        let total = self.count(filter).await?;

        let best = track_db_operation("find_one", SUBMISSIONS_COLLECTION, async {
            self.submissions()
                .find_one(doc! {
                    "user": user_id,
                    "problem": problem_id,
                    "verdict": Verdict::Accepted.as_str(),
                })
                .sort(doc! { "runtime": 1, "memory": 1 })
                .await
                .context("Failed to load best submission")
        })
        .await?;

        Ok(ProblemSubmissionsResponse {
            problem: ProblemSummary {
                id: problem.id.to_hex(),
                title: problem.title,
                slug: problem.slug,
                difficulty: problem.difficulty.as_str().to_string(),
            },
            submissions: submissions.iter().map(SubmissionView::summary).collect(),
            best_submission: best.as_ref().map(SubmissionView::summary),
            pagination: Pagination::new(page, limit, total),
        })
    }

    pub async fn solved(&self, user_id: &str) -> Result<SolvedSubmissionsResponse, ApiError> {
        let solved = self
            .distinct_problems(doc! { "user": user_id, "verdict": Verdict::Accepted.as_str() })
            .await?;
        let attempted = self.distinct_problems(doc! { "user": user_id }).await?;

        let solved_set: HashSet<&String> = solved.iter().collect();
        let attempted: Vec<String> = attempted
            .iter()
            .filter(|id| !solved_set.contains(id))
            .cloned()
            .collect();

        Ok(SolvedSubmissionsResponse {
            total_solved: solved.len(),
            total_attempted: attempted.len(),
            solved_problems: solved,
            attempted_problems: attempted,
        })
    }

    async fn distinct_problems(&self, filter: Document) -> Result<Vec<String>> {
        let values = track_db_operation("distinct", SUBMISSIONS_COLLECTION, async {
            self.submissions()
                .distinct("problem", filter)
                .await
                .context("Failed to list problems")
        })
        .await?;

        Ok(values
            .into_iter()
            .filter_map(|value| match value {
                Bson::ObjectId(id) => Some(id.to_hex()),
                _ => None,
            })
            .collect())
    }

    pub async fn recent(
        &self,
        user_id: &str,
        query: LimitQuery,
    ) -> Result<RecentSubmissionsResponse, ApiError> {
        let limit = page_size(query.limit, DEFAULT_RECENT_LIMIT, MAX_RECENT_LIMIT);
        let submissions = self
            .find_many(doc! { "user": user_id }, doc! { "createdAt": -1 }, 0, limit)
            .await?;

        let today = chrono_to_bson(start_of_day(Utc::now()));
        let stats = RecentStats {
            today_submissions: self
                .count(doc! { "user": user_id, "createdAt": { "$gte": today } })
                .await?,
            total_submissions: self.count(doc! { "user": user_id }).await?,
        };

        Ok(RecentSubmissionsResponse {
            submissions: self.with_problems(&submissions).await?,
            stats,
        })
    }

    /// Summaries with problem title, slug and difficulty filled in
    async fn with_problems(&self, submissions: &[Submission]) -> Result<Vec<SubmissionView>> {
        let ids: Vec<ObjectId> = submissions
            .iter()
            .map(|s| s.problem)
            .collect::<HashSet<_>>()
            .into_iter()
            .collect();
        let problems: HashMap<ObjectId, Problem> =
            ProblemService::new(&self.mongo).get_many(&ids).await?;

        Ok(submissions
            .iter()
            .map(|submission| {
                let view = SubmissionView::summary(submission);
                match problems.get(&submission.problem) {
                    Some(problem) => view.with_problem(problem),
                    None => view,
                }
            })
            .collect())
    }
}

/// Users are keyed by ObjectId when the token subject is one, by plain string otherwise
fn user_filter(user_id: &str) -> Document {
    match ObjectId::parse_str(user_id) {
        Ok(id) => doc! { "_id": id },
        Err(_) => doc! { "_id": user_id },
    }
}

fn user_stats_update(problem: &Problem, accepted: bool, first_solve: bool) -> Document {
    let mut inc = doc! { "stats.totalSubmissions": 1 };
    let mut add_to_set = doc! { "attemptedProblems": problem.id };

    if accepted {
        inc.insert("stats.acceptedSubmissions", 1);
    }
    if first_solve {
        inc.insert("stats.totalProblemsSolved", 1);
        inc.insert(problem.difficulty.stats_field(), 1);
        add_to_set.insert("solvedProblems", problem.id);
    }

    doc! { "$inc": inc, "$addToSet": add_to_set }
}

fn list_filter(user_id: &str, query: &SubmissionListQuery) -> Result<Document, ApiError> {
    let mut filter = doc! { "user": user_id };

    if let Some(problem_id) = &query.problem_id {
        filter.insert("problem", parse_object_id(problem_id, "problem id")?);
    }
    if let Some(verdict) = &query.verdict {
        let verdict: Verdict = verdict.parse().map_err(ApiError::BadRequest)?;
        filter.insert("verdict", verdict.as_str());
    }
    if let Some(language) = &query.language {
        let language: Language = language.parse().map_err(ApiError::BadRequest)?;
        filter.insert("language", language.as_str());
    }

    let mut created = Document::new();
    if let Some(start) = query.start_date {
        created.insert("$gte", chrono_to_bson(start));
    }
    if let Some(end) = query.end_date {
        created.insert("$lte", chrono_to_bson(end));
    }
    if !created.is_empty() {
        filter.insert("createdAt", created);
    }

    Ok(filter)
}

fn sort_document(sort_by: Option<&str>) -> Result<Document, ApiError> {
    let sort_by = sort_by.unwrap_or("-createdAt");
    let (field, direction) = match sort_by.strip_prefix('-') {
        Some(field) => (field, -1),
        None => (sort_by, 1),
    };

    match field {
        "createdAt" | "runtime" | "memory" => Ok(doc! { field: direction }),
        other => Err(ApiError::bad_request(format!("Cannot sort by {}", other))),
    }
}

fn page_size(requested: Option<i64>, default: i64, max: i64) -> i64 {
    requested.unwrap_or(default).clamp(1, max)
}

/// Documents to skip for a 1-based page; MongoDB takes the skip as a signed 64-bit value
fn page_offset(page: u64, limit: i64) -> Result<u64, ApiError> {
    page.saturating_sub(1)
        .checked_mul(limit.max(1) as u64)
        .filter(|skip| *skip <= i64::MAX as u64)
        .ok_or_else(|| ApiError::bad_request(format!("Page {} is out of range", page)))
}

fn number(row: &Document, key: &str) -> f64 {
    match row.get(key) {
        Some(Bson::Int32(v)) => *v as f64,
        Some(Bson::Int64(v)) => *v as f64,
        Some(Bson::Double(v)) => *v,
        _ => 0.0,
    }
}

fn stats_from_row(row: &Document) -> SubmissionStats {
    SubmissionStats {
        total: number(row, "total") as u64,
        accepted: number(row, "accepted") as u64,
        avg_runtime: number(row, "avgRuntime").round(),
    }
}
