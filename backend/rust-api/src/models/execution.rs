use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use validator::Validate;

use super::problem::TestCase;
use super::submission::{TestResult, Verdict};

/// Aggregated result of judging one program against a list of test cases
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct JudgeReport {
    pub verdict: Verdict,
    /// Total over executed test cases, milliseconds
    pub runtime: u64,
    /// Peak resident memory, kilobytes
    pub memory: u64,
    pub test_cases_passed: usize,
    pub total_test_cases: usize,
    pub results: Vec<TestResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct RunRequest {
    #[validate(length(min = 1, message = "Language is required"))]
    pub language: String,
    #[validate(length(
        min = 1,
        max = 10000,
        message = "Code must be between 1 and 10000 characters"
    ))]
    pub code: String,
    /// Custom stdin; the program runs once and its output is not compared
    pub input: Option<String>,
    #[serde(default)]
    #[validate(length(max = 50, message = "At most 50 test cases per run"))]
    pub test_cases: Vec<TestCase>,
    /// Problem whose visible test cases are used when none are supplied
    pub problem_id: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunResponse {
    /// Output of the first executed case
    pub output: String,
    pub error: Option<String>,
    pub is_success: bool,
    pub verdict: Verdict,
    pub runtime: u64,
    pub memory: u64,
    pub test_cases_passed: usize,
    pub total_test_cases: usize,
    pub results: Vec<TestResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl From<JudgeReport> for RunResponse {
    fn from(report: JudgeReport) -> Self {
        let first = report.results.first();
        let output = first.map(|r| r.actual_output.clone()).unwrap_or_default();
        let error = report
            .error_message
            .clone()
            .or_else(|| first.and_then(|r| r.error.clone()));
        Self {
            output,
            error,
            is_success: report.verdict == Verdict::Accepted,
            verdict: report.verdict,
            runtime: report.runtime,
            memory: report.memory,
            test_cases_passed: report.test_cases_passed,
            total_test_cases: report.total_test_cases,
            results: report.results,
            error_message: report.error_message,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

/// Batch test run kept in Redis under `execution:{id}`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionJob {
    pub execution_id: String,
    pub user_id: String,
    pub status: ExecutionStatus,
    pub language: String,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<JudgeReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionAccepted {
    pub execution_id: String,
    pub status: ExecutionStatus,
}
