use std::sync::Arc;

use anyhow::Context;
use chrono::Utc;
use redis::aio::ConnectionManager;
use uuid::Uuid;
use validator::Validate;

use super::problem_service::ProblemService;
use super::AppState;
use crate::error::{parse_object_id, ApiError};
use crate::judge::{Judge, JudgeRequest, Limits};
use crate::metrics::{track_cache_operation, JUDGE_FAILURES_TOTAL};
use crate::models::execution::{
    ExecutionAccepted, ExecutionJob, ExecutionStatus, JudgeReport, RunRequest, RunResponse,
};
use crate::models::submission::{check_code_size, redact_hidden};
use crate::models::{Language, TestCase};
use mongodb::Database;

const EXECUTION_TTL_SECONDS: u64 = 3600;

fn execution_key(execution_id: &str) -> String {
    format!("execution:{}", execution_id)
}

/// Who is running code decides which test cases are visible and which limits apply
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RunScope {
    /// Practice runs: visible cases only, fixed run limits
    User,
    /// Problem authors: every case of the problem under its own limits
    Admin,
}

/// Ad-hoc code execution outside the submission flow: synchronous runs,
/// background batch runs tracked in Redis and admin test runs.
#[derive(Clone)]
pub struct ExecutionService {
    mongo: Database,
    redis: ConnectionManager,
    judge: Arc<Judge>,
}

impl ExecutionService {
    pub fn new(state: &AppState) -> Self {
        Self {
            mongo: state.mongo.clone(),
            redis: state.redis.clone(),
            judge: state.judge.clone(),
        }
    }

    pub async fn run(&self, req: RunRequest) -> Result<RunResponse, ApiError> {
        let request = self.prepare(req, RunScope::User).await?;
        let report = self.judge.judge(request).await?;
        Ok(redacted(report))
    }

    pub async fn test_run(&self, req: RunRequest) -> Result<RunResponse, ApiError> {
        let request = self.prepare(req, RunScope::Admin).await?;
        let report = self.judge.judge(request).await?;
        Ok(report.into())
    }

    /// Queues a run in the background and returns its id for polling
    pub async fn start_batch(
        &self,
        user_id: &str,
        req: RunRequest,
    ) -> Result<ExecutionAccepted, ApiError> {
        let language = req.language.clone();
        let request = self.prepare(req, RunScope::User).await?;
        if self.judge.queue().is_saturated() {
            return Err(ApiError::ServiceUnavailable("Judge queue is full".to_string()));
        }

        let job = ExecutionJob {
            execution_id: Uuid::new_v4().to_string(),
            user_id: user_id.to_string(),
            status: ExecutionStatus::Pending,
            language,
            created_at: Utc::now(),
            completed_at: None,
            result: None,
            error: None,
        };
        self.save(&job).await?;

        let accepted = ExecutionAccepted {
            execution_id: job.execution_id.clone(),
            status: job.status,
        };

        let service = self.clone();
        tokio::spawn(async move {
            service.execute_batch(job, request).await;
        });

        Ok(accepted)
    }

    async fn execute_batch(&self, mut job: ExecutionJob, request: JudgeRequest) {
        job.status = ExecutionStatus::Running;
        if let Err(e) = self.save(&job).await {
            tracing::warn!(execution_id = %job.execution_id, error = %e, "Failed to mark execution running");
        }

        match self.judge.judge(request).await {
            Ok(report) => {
                job.status = ExecutionStatus::Completed;
                job.result = Some(JudgeReport {
                    results: redact_hidden(&report.results),
                    ..report
                });
            }
            Err(e) => {
                tracing::error!(execution_id = %job.execution_id, error = %e, "Batch execution failed");
                JUDGE_FAILURES_TOTAL.with_label_values(&["execution"]).inc();
                job.status = ExecutionStatus::Failed;
                job.error = Some(e.to_string());
            }
        }
        job.completed_at = Some(Utc::now());

        if let Err(e) = self.save(&job).await {
            tracing::error!(execution_id = %job.execution_id, error = %e, "Failed to store execution result");
        }
    }

    /// Returns the job if it exists and belongs to the caller (admins see all)
    pub async fn get(
        &self,
        execution_id: &str,
        user_id: &str,
        is_admin: bool,
    ) -> Result<ExecutionJob, ApiError> {
        let mut conn = self.redis.clone();
        let key = execution_key(execution_id);
        let json: Option<String> = track_cache_operation("get", async {
            redis::cmd("GET")
                .arg(&key)
                .query_async(&mut conn)
                .await
                .context("Failed to read execution")
        })
        .await?;

        let job: ExecutionJob = match json {
            Some(json) => serde_json::from_str(&json).context("Corrupted execution record")?,
            None => return Err(ApiError::not_found("Execution not found")),
        };

        if job.user_id != user_id && !is_admin {
            return Err(ApiError::forbidden("Not authorized to view this execution"));
        }
        Ok(job)
    }

    async fn save(&self, job: &ExecutionJob) -> anyhow::Result<()> {
        let mut conn = self.redis.clone();
        let key = execution_key(&job.execution_id);
        let json = serde_json::to_string(job)?;

        track_cache_operation("setex", async {
            redis::cmd("SETEX")
                .arg(&key)
                .arg(EXECUTION_TTL_SECONDS)
                .arg(json)
                .query_async::<()>(&mut conn)
                .await
                .context("Failed to save execution to Redis")
        })
        .await
    }

    async fn prepare(&self, req: RunRequest, scope: RunScope) -> Result<JudgeRequest, ApiError> {
        req.validate()?;
        check_code_size(&req.code).map_err(ApiError::BadRequest)?;
        let language: Language = req.language.parse().map_err(ApiError::BadRequest)?;

        let problem = match &req.problem_id {
            Some(problem_id) => {
                let id = parse_object_id(problem_id, "problem id")?;
                let service = ProblemService::new(&self.mongo);
                let problem = match scope {
                    RunScope::User => service.get_published(&id).await?,
                    RunScope::Admin => service.get(&id).await?,
                };
                Some(problem.ok_or_else(|| ApiError::not_found("Problem not found"))?)
            }
            None => None,
        };

        let custom_input = req.input.is_some();
        let test_cases: Vec<TestCase> = if let Some(input) = req.input {
            vec![TestCase {
                input,
                expected_output: String::new(),
                explanation: None,
                is_hidden: false,
            }]
        } else if !req.test_cases.is_empty() {
            req.test_cases
        } else {
            match (&problem, scope) {
                (Some(problem), RunScope::User) => problem.visible_test_cases(),
                (Some(problem), RunScope::Admin) => problem.test_cases.clone(),
                (None, _) => Vec::new(),
            }
        };

        let limits = match (&problem, scope) {
            (Some(problem), RunScope::Admin) => {
                let constraints = problem.constraints.clamped();
                self.judge
                    .limits(constraints.time_limit as u64, constraints.memory_limit as u64)
            }
            _ => default_run_limits(&self.judge),
        };

        Ok(JudgeRequest {
            language,
            code: req.code,
            test_cases,
            limits,
            check_output: !custom_input,
        })
    }
}

fn redacted(mut report: JudgeReport) -> RunResponse {
    report.results = redact_hidden(&report.results);
    RunResponse::from(report)
}

/// Limits used for a run with no problem attached
pub fn default_run_limits(judge: &Judge) -> Limits {
    let config = judge.config();
    judge.limits(config.run_time_limit_ms, config.run_memory_limit_mb)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::JudgeConfig;
    use crate::models::{TestResult, Verdict};

    #[test]
    fn run_limits_come_from_judge_config() {
        let judge = Judge::with_process_sandbox(JudgeConfig {
            run_time_limit_ms: 5000,
            run_memory_limit_mb: 256,
            output_limit_bytes: 2048,
            ..JudgeConfig::default()
        });
        let limits = default_run_limits(&judge);
        assert_eq!(limits.time_limit.as_millis(), 5000);
        assert_eq!(limits.memory_limit_kb, 256 * 1024);
        assert_eq!(limits.output_limit_bytes, 2048);
    }

    #[test]
    fn run_response_hides_hidden_cases() {
        let report = JudgeReport {
            verdict: Verdict::WrongAnswer,
            runtime: 10,
            memory: 100,
            test_cases_passed: 0,
            total_test_cases: 1,
            results: vec![TestResult {
                test_case_index: 0,
                passed: false,
                verdict: Verdict::WrongAnswer,
                input: "secret".to_string(),
                expected_output: "1".to_string(),
                actual_output: "2".to_string(),
                runtime: 10,
                memory: 100,
                error: None,
                is_hidden: true,
            }],
            error_message: None,
        };

        let response = redacted(report);
        assert_eq!(response.verdict, Verdict::WrongAnswer);
        assert!(response.results[0].input.is_empty());
        assert!(!response.is_success);
        assert!(response.output.is_empty());
        assert_eq!(execution_key("abc"), "execution:abc");
    }
}
