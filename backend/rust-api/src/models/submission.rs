use chrono::{DateTime, Utc};
use mongodb::bson::oid::ObjectId;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use validator::Validate;

use super::problem::Problem;

pub const MAX_CODE_SIZE: usize = 10_000;

/// Source size is capped in bytes, so multibyte text cannot slip past the limit
pub fn check_code_size(code: &str) -> Result<(), String> {
    if code.len() > MAX_CODE_SIZE {
        return Err(format!("Code must not exceed {} bytes", MAX_CODE_SIZE));
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    Python,
    Javascript,
    Cpp,
    Java,
}

impl Language {
    pub const ALL: [Language; 4] = [
        Language::Python,
        Language::Javascript,
        Language::Cpp,
        Language::Java,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Language::Python => "python",
            Language::Javascript => "javascript",
            Language::Cpp => "cpp",
            Language::Java => "java",
        }
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Language {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_lowercase().as_str() {
            "python" | "python3" => Ok(Language::Python),
            "javascript" | "js" | "node" => Ok(Language::Javascript),
            "cpp" | "c++" => Ok(Language::Cpp),
            "java" => Ok(Language::Java),
            other => Err(format!("Unsupported language: {}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum Verdict {
    Pending,
    Accepted,
    WrongAnswer,
    TimeLimitExceeded,
    MemoryLimitExceeded,
    RuntimeError,
    CompilationError,
}

impl Verdict {
    pub fn as_str(&self) -> &'static str {
        match self {
            Verdict::Pending => "pending",
            Verdict::Accepted => "accepted",
            Verdict::WrongAnswer => "wrong-answer",
            Verdict::TimeLimitExceeded => "time-limit-exceeded",
            Verdict::MemoryLimitExceeded => "memory-limit-exceeded",
            Verdict::RuntimeError => "runtime-error",
            Verdict::CompilationError => "compilation-error",
        }
    }

    pub fn is_final(&self) -> bool {
        !matches!(self, Verdict::Pending)
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Verdict {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "pending" => Ok(Verdict::Pending),
            "accepted" => Ok(Verdict::Accepted),
            "wrong-answer" => Ok(Verdict::WrongAnswer),
            "time-limit-exceeded" => Ok(Verdict::TimeLimitExceeded),
            "memory-limit-exceeded" => Ok(Verdict::MemoryLimitExceeded),
            "runtime-error" => Ok(Verdict::RuntimeError),
            "compilation-error" => Ok(Verdict::CompilationError),
            other => Err(format!("Invalid verdict: {}", other)),
        }
    }
}

/// Outcome of a single test case
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TestResult {
    pub test_case_index: usize,
    pub passed: bool,
    pub verdict: Verdict,
    #[serde(default)]
    pub input: String,
    #[serde(default)]
    pub expected_output: String,
    #[serde(default)]
    pub actual_output: String,
    /// Milliseconds
    pub runtime: u64,
    /// Kilobytes
    pub memory: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub is_hidden: bool,
}

impl TestResult {
    /// Copy safe to show the author: hidden cases keep only pass/fail and timings
    pub fn redacted(&self) -> Self {
        if !self.is_hidden {
            return self.clone();
        }
        Self {
            input: String::new(),
            expected_output: String::new(),
            actual_output: String::new(),
            error: None,
            ..self.clone()
        }
    }
}

pub fn redact_hidden(results: &[TestResult]) -> Vec<TestResult> {
    results.iter().map(TestResult::redacted).collect()
}

/// Submission document stored in MongoDB "submissions" collection
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Submission {
    #[serde(rename = "_id")]
    pub id: ObjectId,
    pub user: String,
    pub problem: ObjectId,
    pub language: Language,
    pub code: String,
    #[serde(default)]
    pub code_size: i64,
    pub verdict: Verdict,
    #[serde(default)]
    pub runtime: i64,
    #[serde(default)]
    pub memory: i64,
    #[serde(default)]
    pub test_cases_passed: i64,
    #[serde(default)]
    pub total_test_cases: i64,
    #[serde(default)]
    pub execution_results: Vec<TestResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contest_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip_address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
    #[serde(with = "super::bson_datetime_as_chrono")]
    pub created_at: DateTime<Utc>,
    #[serde(
        default,
        with = "super::bson_datetime_as_chrono_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub executed_at: Option<DateTime<Utc>>,
    /// Milliseconds between intake and the stored verdict
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_time: Option<i64>,
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct SubmitRequest {
    #[validate(length(min = 1, message = "Problem ID is required"))]
    pub problem_id: String,
    #[validate(length(min = 1, message = "Language is required"))]
    pub language: String,
    #[validate(length(
        min = 1,
        max = 10000,
        message = "Code must be between 1 and 10000 characters"
    ))]
    pub code: String,
    pub contest_id: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitResponse {
    pub message: String,
    pub submission: SubmissionView,
    /// The user already had an accepted solution for this problem
    pub is_resubmit: bool,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum JudgingState {
    Pending,
    Running,
    Completed,
}

impl JudgingState {
    pub fn of(verdict: Verdict, running: bool) -> Self {
        if verdict.is_final() {
            JudgingState::Completed
        } else if running {
            JudgingState::Running
        } else {
            JudgingState::Pending
        }
    }
}

/// Lightweight answer for the polling endpoint
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionStatus {
    pub submission_id: String,
    pub status: JudgingState,
    pub verdict: Verdict,
    /// 1-based position of the test case being executed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_test_case: Option<usize>,
    pub test_cases_passed: i64,
    pub total_test_cases: i64,
    pub runtime: i64,
    pub memory: i64,
}

/// Submission as returned by the read endpoints
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionView {
    #[serde(rename = "_id")]
    pub id: String,
    pub user: String,
    pub problem: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub problem_title: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub problem_slug: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub problem_difficulty: Option<String>,
    pub language: Language,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
    pub code_size: i64,
    pub verdict: Verdict,
    pub runtime: i64,
    pub memory: i64,
    pub test_cases_passed: i64,
    pub total_test_cases: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub execution_results: Option<Vec<TestResult>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contest_id: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub executed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub execution_time: Option<i64>,
}

impl SubmissionView {
    /// Full view for the owner: code and redacted per-test results
    pub fn detailed(submission: &Submission) -> Self {
        let mut view = Self::summary(submission);
        view.code = Some(submission.code.clone());
        view.execution_results = Some(redact_hidden(&submission.execution_results));
        view.error_message = submission.error_message.clone();
        view
    }

    /// List entry without code or per-test results
    pub fn summary(submission: &Submission) -> Self {
        Self {
            id: submission.id.to_hex(),
            user: submission.user.clone(),
            problem: submission.problem.to_hex(),
            problem_title: None,
            problem_slug: None,
            problem_difficulty: None,
            language: submission.language,
            code: None,
            code_size: submission.code_size,
            verdict: submission.verdict,
            runtime: submission.runtime,
            memory: submission.memory,
            test_cases_passed: submission.test_cases_passed,
            total_test_cases: submission.total_test_cases,
            execution_results: None,
            error_message: None,
            contest_id: submission.contest_id.clone(),
            created_at: submission.created_at,
            executed_at: submission.executed_at,
            execution_time: submission.execution_time,
        }
    }

    pub fn with_problem(mut self, problem: &Problem) -> Self {
        self.problem_title = Some(problem.title.clone());
        self.problem_slug = Some(problem.slug.clone());
        self.problem_difficulty = Some(problem.difficulty.as_str().to_string());
        self
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionListQuery {
    pub problem_id: Option<String>,
    pub verdict: Option<String>,
    pub language: Option<String>,
    pub start_date: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    /// `createdAt` (default), `runtime` or `memory`; prefix `-` for descending
    pub sort_by: Option<String>,
    pub page: Option<u64>,
    pub limit: Option<i64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProblemSubmissionsQuery {
    pub verdict: Option<String>,
    pub page: Option<u64>,
    pub limit: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct LimitQuery {
    pub limit: Option<i64>,
}

#[derive(Debug, Serialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionStats {
    pub total: u64,
    pub accepted: u64,
    pub avg_runtime: f64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Pagination {
    pub page: u64,
    pub limit: i64,
    pub total: u64,
    pub pages: u64,
}

impl Pagination {
    pub fn new(page: u64, limit: i64, total: u64) -> Self {
        let per_page = limit.max(1) as u64;
        Self {
            page,
            limit,
            total,
            pages: total.div_ceil(per_page),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionListResponse {
    pub submissions: Vec<SubmissionView>,
    pub pagination: Pagination,
    pub stats: SubmissionStats,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProblemSummary {
    pub id: String,
    pub title: String,
    pub slug: String,
    pub difficulty: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProblemSubmissionsResponse {
    pub problem: ProblemSummary,
    pub submissions: Vec<SubmissionView>,
    pub best_submission: Option<SubmissionView>,
    pub pagination: Pagination,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SolvedSubmissionsResponse {
    pub solved_problems: Vec<String>,
    pub attempted_problems: Vec<String>,
    pub total_solved: usize,
    pub total_attempted: usize,
}

#[derive(Debug, Serialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct RecentStats {
    pub today_submissions: u64,
    pub total_submissions: u64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecentSubmissionsResponse {
    pub submissions: Vec<SubmissionView>,
    pub stats: RecentStats,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn code_size_counts_bytes_not_characters() {
        assert!(check_code_size(&"a".repeat(MAX_CODE_SIZE)).is_ok());
        assert!(check_code_size(&"a".repeat(MAX_CODE_SIZE + 1)).is_err());
        // 6000 characters, 12000 bytes
        assert!(check_code_size(&"ж".repeat(6000)).is_err());
    }

    #[test]
    fn verdict_wire_names() {
        assert_eq!(
            serde_json::to_string(&Verdict::TimeLimitExceeded).unwrap(),
            "\"time-limit-exceeded\""
        );
        assert_eq!(
            serde_json::from_str::<Verdict>("\"compilation-error\"").unwrap(),
            Verdict::CompilationError
        );
        assert_eq!(
            "memory-limit-exceeded".parse::<Verdict>().unwrap(),
            Verdict::MemoryLimitExceeded
        );
        assert!(!Verdict::Pending.is_final());
    }

    #[test]
    fn judging_state_follows_verdict() {
        assert_eq!(JudgingState::of(Verdict::Pending, false), JudgingState::Pending);
        assert_eq!(JudgingState::of(Verdict::Pending, true), JudgingState::Running);
        assert_eq!(JudgingState::of(Verdict::WrongAnswer, true), JudgingState::Completed);
    }

    #[test]
    fn pagination_rounds_pages_up() {
        let pagination = Pagination::new(2, 20, 41);
        assert_eq!(pagination.pages, 3);
        assert_eq!(Pagination::new(1, 20, 0).pages, 0);
    }

    #[test]
    fn unsupported_language_is_rejected() {
        assert_eq!("C++".parse::<Language>().unwrap(), Language::Cpp);
        let err = "go".parse::<Language>().unwrap_err();
        assert_eq!(err, "Unsupported language: go");
    }

    #[test]
    fn hidden_results_are_redacted() {
        let result = TestResult {
            test_case_index: 1,
            passed: false,
            verdict: Verdict::WrongAnswer,
            input: "secret".to_string(),
            expected_output: "42".to_string(),
            actual_output: "41".to_string(),
            runtime: 12,
            memory: 2048,
            error: Some("boom".to_string()),
            is_hidden: true,
        };

        let redacted = result.redacted();
        assert!(redacted.input.is_empty());
        assert!(redacted.expected_output.is_empty());
        assert!(redacted.actual_output.is_empty());
        assert!(redacted.error.is_none());
        assert_eq!(redacted.verdict, Verdict::WrongAnswer);
        assert_eq!(redacted.runtime, 12);

        let visible = TestResult {
            is_hidden: false,
            ..result
        };
        assert_eq!(visible.redacted(), visible);
    }
}
