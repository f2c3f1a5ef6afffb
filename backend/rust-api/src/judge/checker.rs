use super::process::{ProcessOutput, Termination};
use super::Limits;

/// Classification of one test case run
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TestOutcome {
    Passed,
    WrongAnswer,
    TimeLimitExceeded,
    MemoryLimitExceeded,
    RuntimeError(String),
}

/// Turns the escaped `\n` sequences stored with test inputs into real newlines
/// and makes sure the input ends with one, so line-based readers terminate.
pub fn normalize_input(input: &str) -> String {
    let mut normalized = input.replace("\\n", "\n").replace("\r\n", "\n");
    if !normalized.ends_with('\n') {
        normalized.push('\n');
    }
    normalized
}

/// Normalizes line endings and trims surrounding whitespace; the rest must match exactly
pub fn normalize_output(output: &str) -> String {
    output.replace("\r\n", "\n").trim().to_string()
}

pub fn outputs_match(actual: &str, expected: &str) -> bool {
    normalize_output(actual) == normalize_output(expected)
}

/// Classifies one run. Without an expected output (custom input runs) a clean
/// exit within the limits counts as passed.
pub fn evaluate(output: &ProcessOutput, expected: Option<&str>, limits: &Limits) -> TestOutcome {
    match &output.termination {
        Termination::WallTimeExceeded => TestOutcome::TimeLimitExceeded,
        Termination::MemoryExceeded => TestOutcome::MemoryLimitExceeded,
        Termination::OutputExceeded => {
            TestOutcome::RuntimeError("Output limit exceeded".to_string())
        }
        Termination::Signaled(signal) => {
            if output.peak_memory_kb > limits.memory_limit_kb {
                TestOutcome::MemoryLimitExceeded
            } else {
                TestOutcome::RuntimeError(runtime_error_message(
                    &output.stderr,
                    format!("Process killed by signal {}", signal),
                ))
            }
        }
        Termination::Exited(code) if *code != 0 => {
            if output.peak_memory_kb > limits.memory_limit_kb || reports_out_of_memory(&output.stderr) {
                TestOutcome::MemoryLimitExceeded
            } else {
                TestOutcome::RuntimeError(runtime_error_message(
                    &output.stderr,
                    format!("Process exited with code {}", code),
                ))
            }
        }
        Termination::Exited(_) => {
            if output.elapsed > limits.time_limit {
                TestOutcome::TimeLimitExceeded
            } else if output.peak_memory_kb > limits.memory_limit_kb {
                TestOutcome::MemoryLimitExceeded
            } else if expected.map_or(true, |expected| outputs_match(&output.stdout, expected)) {
                TestOutcome::Passed
            } else {
                TestOutcome::WrongAnswer
            }
        }
    }
}

fn reports_out_of_memory(stderr: &str) -> bool {
    ["MemoryError", "std::bad_alloc", "OutOfMemoryError", "heap out of memory"]
        .iter()
        .any(|marker| stderr.contains(marker))
}

fn runtime_error_message(stderr: &str, fallback: String) -> String {
    let stderr = stderr.trim();
    if stderr.is_empty() {
        fallback
    } else {
        stderr.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn output(termination: Termination, stdout: &str, millis: u64, memory_kb: u64) -> ProcessOutput {
        ProcessOutput {
            termination,
            stdout: stdout.to_string(),
            stderr: String::new(),
            elapsed: Duration::from_millis(millis),
            peak_memory_kb: memory_kb,
        }
    }

    fn limits() -> Limits {
        Limits::new(1000, 64, 1024)
    }

    #[test]
    fn input_escapes_become_newlines() {
        assert_eq!(normalize_input("1 2\\n3 4"), "1 2\n3 4\n");
        assert_eq!(normalize_input("5\n"), "5\n");
        assert_eq!(normalize_input(""), "\n");
    }

    #[test]
    fn output_comparison_ignores_surrounding_whitespace() {
        assert!(outputs_match("3\r\n", "3"));
        assert!(outputs_match("  1 2\r\n3\n\n", "1 2\n3"));
        assert!(!outputs_match("1 2 \n3", "1 2\n3"));
        assert!(!outputs_match("1 2", "1  2"));
        assert!(!outputs_match("12", "1\n2"));
    }

    #[test]
    fn clean_exit_is_compared() {
        let limits = limits();
        assert_eq!(
            evaluate(&output(Termination::Exited(0), "42\n", 10, 100), Some("42"), &limits),
            TestOutcome::Passed
        );
        assert_eq!(
            evaluate(&output(Termination::Exited(0), "41\n", 10, 100), Some("42"), &limits),
            TestOutcome::WrongAnswer
        );
    }

    #[test]
    fn custom_input_run_only_needs_a_clean_exit() {
        let outcome = evaluate(&output(Termination::Exited(0), "anything", 10, 100), None, &limits());
        assert_eq!(outcome, TestOutcome::Passed);
    }

    #[test]
    fn slow_but_finished_run_is_time_limit() {
        let outcome = evaluate(&output(Termination::Exited(0), "42", 1200, 100), Some("42"), &limits());
        assert_eq!(outcome, TestOutcome::TimeLimitExceeded);
    }

    #[test]
    fn memory_over_limit() {
        let limits = limits();
        assert_eq!(
            evaluate(&output(Termination::MemoryExceeded, "", 10, 70_000), Some(""), &limits),
            TestOutcome::MemoryLimitExceeded
        );
        assert_eq!(
            evaluate(&output(Termination::Exited(0), "ok", 10, 70_000), Some("ok"), &limits),
            TestOutcome::MemoryLimitExceeded
        );
    }

    #[test]
    fn non_zero_exit_is_runtime_error() {
        let mut run = output(Termination::Exited(1), "", 10, 100);
        run.stderr = "ZeroDivisionError: division by zero\n".to_string();
        assert_eq!(
            evaluate(&run, Some(""), &limits()),
            TestOutcome::RuntimeError("ZeroDivisionError: division by zero".to_string())
        );

        let run = output(Termination::Signaled(11), "", 10, 100);
        assert_eq!(
            evaluate(&run, Some(""), &limits()),
            TestOutcome::RuntimeError("Process killed by signal 11".to_string())
        );
    }

    #[test]
    fn out_of_memory_message_is_memory_limit() {
        let mut run = output(Termination::Exited(1), "", 10, 100);
        run.stderr = "Traceback...\nMemoryError".to_string();
        assert_eq!(evaluate(&run, Some(""), &limits()), TestOutcome::MemoryLimitExceeded);
    }
}
