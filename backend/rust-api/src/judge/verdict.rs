use super::checker::TestOutcome;
use super::process::ProcessOutput;
use crate::models::execution::JudgeReport;
use crate::models::{TestCase, TestResult, Verdict};

/// Folds per-test outcomes into the submission verdict.
///
/// Wrong answers let the remaining cases run so the pass count stays
/// meaningful, and the first one is kept as the verdict. A time limit,
/// memory limit or runtime error ends the run and replaces any earlier
/// wrong answer. Runtime is the sum over executed cases, memory the highest
/// peak seen.
#[derive(Debug)]
pub struct VerdictResolver {
    total: usize,
    passed: usize,
    verdict: Option<Verdict>,
    decided: bool,
    runtime_ms: u64,
    memory_kb: u64,
    error_message: Option<String>,
    results: Vec<TestResult>,
}

impl VerdictResolver {
    pub fn new(total: usize) -> Self {
        Self {
            total,
            passed: 0,
            verdict: None,
            decided: false,
            runtime_ms: 0,
            memory_kb: 0,
            error_message: None,
            results: Vec::with_capacity(total),
        }
    }

    pub fn record(&mut self, case: &TestCase, outcome: TestOutcome, output: &ProcessOutput) {
        let runtime = output.elapsed.as_millis() as u64;
        self.runtime_ms += runtime;
        self.memory_kb = self.memory_kb.max(output.peak_memory_kb);

        let (verdict, error) = match outcome {
            TestOutcome::Passed => (Verdict::Accepted, None),
            TestOutcome::WrongAnswer => (Verdict::WrongAnswer, None),
            TestOutcome::TimeLimitExceeded => (
                Verdict::TimeLimitExceeded,
                Some("Time limit exceeded".to_string()),
            ),
            TestOutcome::MemoryLimitExceeded => (
                Verdict::MemoryLimitExceeded,
                Some("Memory limit exceeded".to_string()),
            ),
            TestOutcome::RuntimeError(message) => (Verdict::RuntimeError, Some(message)),
        };

        let index = self.results.len();
        let passed = verdict == Verdict::Accepted;
        let terminal = matches!(
            verdict,
            Verdict::TimeLimitExceeded | Verdict::MemoryLimitExceeded | Verdict::RuntimeError
        );

        if passed {
            self.passed += 1;
        } else if terminal || self.verdict.is_none() {
            self.verdict = Some(verdict);
            self.error_message = submission_message(case, index, verdict, error.as_deref());
        }
        if terminal {
            self.decided = true;
        }

        self.results.push(TestResult {
            test_case_index: index,
            passed,
            verdict,
            input: case.input.clone(),
            expected_output: case.expected_output.clone(),
            actual_output: output.stdout.trim_end().to_string(),
            runtime,
            memory: output.peak_memory_kb,
            error,
            is_hidden: case.is_hidden,
        });
    }

    /// True once no later test case can change the verdict
    pub fn is_decided(&self) -> bool {
        self.decided
    }

    pub fn finish(self) -> JudgeReport {
        JudgeReport {
            verdict: self.verdict.unwrap_or(Verdict::Accepted),
            runtime: self.runtime_ms,
            memory: self.memory_kb,
            test_cases_passed: self.passed,
            total_test_cases: self.total,
            results: self.results,
            error_message: self.error_message,
        }
    }

    /// Report for a program that never built: every case fails with the compiler output
    pub fn compilation_error(cases: &[TestCase], message: String) -> JudgeReport {
        let results = cases
            .iter()
            .enumerate()
            .map(|(index, case)| TestResult {
                test_case_index: index,
                passed: false,
                verdict: Verdict::CompilationError,
                input: case.input.clone(),
                expected_output: case.expected_output.clone(),
                actual_output: String::new(),
                runtime: 0,
                memory: 0,
                error: Some("Compilation Error".to_string()),
                is_hidden: case.is_hidden,
            })
            .collect();

        JudgeReport {
            verdict: Verdict::CompilationError,
            runtime: 0,
            memory: 0,
            test_cases_passed: 0,
            total_test_cases: cases.len(),
            results,
            error_message: Some(message),
        }
    }
}

/// Submission-level message. Hidden cases never leak their stderr, which
/// could echo the hidden input.
fn submission_message(
    case: &TestCase,
    index: usize,
    verdict: Verdict,
    error: Option<&str>,
) -> Option<String> {
    match (verdict, case.is_hidden) {
        (Verdict::RuntimeError, true) => {
            Some(format!("Runtime error on hidden test case {}", index + 1))
        }
        _ => error.map(str::to_string),
    }
}
