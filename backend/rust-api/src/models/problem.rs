use mongodb::bson::oid::ObjectId;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use validator::Validate;

pub const MIN_TIME_LIMIT_MS: i64 = 100;
pub const MAX_TIME_LIMIT_MS: i64 = 10_000;
pub const MIN_MEMORY_LIMIT_MB: i64 = 16;
pub const MAX_MEMORY_LIMIT_MB: i64 = 1024;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Difficulty {
    Easy,
    Medium,
    Hard,
}

impl Difficulty {
    pub fn as_str(&self) -> &'static str {
        match self {
            Difficulty::Easy => "easy",
            Difficulty::Medium => "medium",
            Difficulty::Hard => "hard",
        }
    }

    /// Field of `users.stats` bumped when a problem of this difficulty is first solved
    pub fn stats_field(&self) -> &'static str {
        match self {
            Difficulty::Easy => "stats.easySolved",
            Difficulty::Medium => "stats.mediumSolved",
            Difficulty::Hard => "stats.hardSolved",
        }
    }
}

impl FromStr for Difficulty {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_lowercase().as_str() {
            "easy" => Ok(Difficulty::Easy),
            "medium" => Ok(Difficulty::Medium),
            "hard" => Ok(Difficulty::Hard),
            _ => Err(format!("Invalid difficulty: {}", value)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct TestCase {
    pub input: String,
    pub expected_output: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub explanation: Option<String>,
    #[serde(default)]
    pub is_hidden: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct Constraints {
    #[serde(default = "default_time_limit")]
    #[validate(range(min = 100, max = 10000))]
    pub time_limit: i64,
    #[serde(default = "default_memory_limit")]
    #[validate(range(min = 16, max = 1024))]
    pub memory_limit: i64,
}

fn default_time_limit() -> i64 {
    2000
}

fn default_memory_limit() -> i64 {
    256
}

impl Default for Constraints {
    fn default() -> Self {
        Self {
            time_limit: default_time_limit(),
            memory_limit: default_memory_limit(),
        }
    }
}

impl Constraints {
    /// Clamp stored limits into the range the judge accepts
    pub fn clamped(&self) -> Self {
        Self {
            time_limit: self.time_limit.clamp(MIN_TIME_LIMIT_MS, MAX_TIME_LIMIT_MS),
            memory_limit: self
                .memory_limit
                .clamp(MIN_MEMORY_LIMIT_MB, MAX_MEMORY_LIMIT_MB),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProblemMetadata {
    #[serde(default)]
    pub is_published: bool,
    #[serde(default)]
    pub views: i64,
    #[serde(default)]
    pub submissions: i64,
    #[serde(default)]
    pub accepted_submissions: i64,
    #[serde(default)]
    pub acceptance_rate: f64,
}

/// Problem document stored in MongoDB "problems" collection
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Problem {
    #[serde(rename = "_id")]
    pub id: ObjectId,
    pub title: String,
    #[serde(default)]
    pub slug: String,
    #[serde(default)]
    pub description: String,
    pub difficulty: Difficulty,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub test_cases: Vec<TestCase>,
    #[serde(default)]
    pub constraints: Constraints,
    #[serde(default)]
    pub metadata: ProblemMetadata,
}

impl Problem {
    pub fn visible_test_cases(&self) -> Vec<TestCase> {
        self.test_cases
            .iter()
            .filter(|case| !case.is_hidden)
            .cloned()
            .collect()
    }
}

/// Problem as shown to clients: hidden test cases are left out entirely
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProblemView {
    #[serde(rename = "_id")]
    pub id: String,
    pub title: String,
    pub slug: String,
    pub description: String,
    pub difficulty: Difficulty,
    pub tags: Vec<String>,
    pub test_cases: Vec<TestCase>,
    pub hidden_test_cases: usize,
    pub constraints: Constraints,
    pub acceptance_rate: f64,
    pub submissions: i64,
    pub views: i64,
}

impl ProblemView {
    pub fn from_problem(problem: &Problem) -> Self {
        let visible = problem.visible_test_cases();
        let hidden_test_cases = problem.test_cases.len() - visible.len();

        Self {
            id: problem.id.to_hex(),
            title: problem.title.clone(),
            slug: problem.slug.clone(),
            description: problem.description.clone(),
            difficulty: problem.difficulty,
            tags: problem.tags.clone(),
            test_cases: visible,
            hidden_test_cases,
            constraints: problem.constraints.clone(),
            acceptance_rate: problem.metadata.acceptance_rate,
            submissions: problem.metadata.submissions,
            views: problem.metadata.views,
        }
    }
}

#[derive(Debug, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateProblemRequest {
    #[validate(length(min = 1, max = 200))]
    pub title: String,
    pub slug: Option<String>,
    #[validate(length(min = 1))]
    pub description: String,
    pub difficulty: Difficulty,
    #[serde(default)]
    pub tags: Vec<String>,
    #[validate(length(min = 1, message = "At least one test case is required"))]
    pub test_cases: Vec<TestCase>,
    #[serde(default)]
    #[validate(nested)]
    pub constraints: Constraints,
    #[serde(default)]
    pub is_published: bool,
}

/// URL-friendly slug derived from a title
pub fn slugify(title: &str) -> String {
    let mut slug = String::with_capacity(title.len());
    let mut last_dash = true;
    for c in title.chars() {
        if c.is_ascii_alphanumeric() {
            slug.push(c.to_ascii_lowercase());
            last_dash = false;
        } else if !last_dash {
            slug.push('-');
            last_dash = true;
        }
    }
    slug.trim_end_matches('-').to_string()
}
