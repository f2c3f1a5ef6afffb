//! Judge core: compiles a submission once, runs it against each test case
//! inside the process sandbox and folds the outcomes into a single verdict.

pub mod checker;
pub mod language;
pub mod process;
pub mod queue;
pub mod sandbox;
pub mod verdict;
pub mod workspace;

use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;

use crate::config::JudgeConfig;
use crate::metrics::{EXECUTION_DURATION_SECONDS, JUDGE_VERDICTS_TOTAL};
use crate::models::execution::JudgeReport;
use crate::models::{Language, TestCase};

pub use queue::{JudgeQueue, QueuePermit};
pub use sandbox::{Compilation, Program, ProcessSandbox, Sandbox};
pub use verdict::VerdictResolver;
pub use workspace::Workspace;

#[derive(Debug, Error)]
pub enum JudgeError {
    #[error("Judge queue is full")]
    QueueFull,

    #[error("Judge queue is closed")]
    QueueClosed,

    #[error("Failed to prepare workspace: {0}")]
    Workspace(#[source] std::io::Error),

    #[error("Failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Sandbox I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Resource limits for one test case
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    pub time_limit: Duration,
    pub memory_limit_kb: u64,
    pub output_limit_bytes: usize,
}

impl Limits {
    pub fn new(time_limit_ms: u64, memory_limit_mb: u64, output_limit_bytes: usize) -> Self {
        Self {
            time_limit: Duration::from_millis(time_limit_ms),
            memory_limit_kb: memory_limit_mb * 1024,
            output_limit_bytes,
        }
    }
}

#[derive(Debug, Clone)]
pub struct JudgeRequest {
    pub language: Language,
    pub code: String,
    pub test_cases: Vec<TestCase>,
    pub limits: Limits,
    /// False for custom input runs, where expected outputs are empty placeholders
    pub check_output: bool,
}

/// Progress callback invoked before each test case starts, with its 1-based position
pub type ProgressFn = Box<dyn Fn(usize) + Send + Sync>;

pub struct Judge {
    sandbox: Arc<dyn Sandbox>,
    queue: JudgeQueue,
    config: JudgeConfig,
}

impl Judge {
    pub fn new(config: JudgeConfig, sandbox: Arc<dyn Sandbox>) -> Self {
        let queue = JudgeQueue::new(
            config.max_concurrent_executions,
            config.max_queued_executions,
        );
        Self {
            sandbox,
            queue,
            config,
        }
    }

    /// Judge backed by the real process sandbox
    pub fn with_process_sandbox(config: JudgeConfig) -> Self {
        let sandbox = Arc::new(ProcessSandbox::new(config.compile_timeout_ms));
        Self::new(config, sandbox)
    }

    pub fn queue(&self) -> &JudgeQueue {
        &self.queue
    }

    pub fn config(&self) -> &JudgeConfig {
        &self.config
    }

    pub fn limits(&self, time_limit_ms: u64, memory_limit_mb: u64) -> Limits {
        Limits::new(time_limit_ms, memory_limit_mb, self.config.output_limit_bytes)
    }

    pub async fn judge(&self, request: JudgeRequest) -> Result<JudgeReport, JudgeError> {
        self.judge_with_progress(request, None).await
    }

    /// Waits for a sandbox slot, then compiles and runs every test case in order.
    /// Stops at the first time limit, memory limit or runtime error.
    pub async fn judge_with_progress(
        &self,
        request: JudgeRequest,
        progress: Option<ProgressFn>,
    ) -> Result<JudgeReport, JudgeError> {
        let _permit = self.queue.acquire().await?;
        let started = Instant::now();
        let language = request.language;

        let workspace = Workspace::create(&self.config.temp_dir).await?;
        let report = self
            .judge_in(&workspace, request, progress.as_deref())
            .await;
        workspace.remove().await;

        let report = report?;
        EXECUTION_DURATION_SECONDS
            .with_label_values(&[language.as_str()])
            .observe(started.elapsed().as_secs_f64());
        JUDGE_VERDICTS_TOTAL
            .with_label_values(&[report.verdict.as_str()])
            .inc();

        tracing::info!(
            language = %language,
            verdict = %report.verdict,
            passed = report.test_cases_passed,
            total = report.total_test_cases,
            runtime_ms = report.runtime,
            memory_kb = report.memory,
            "Judging finished"
        );

        Ok(report)
    }

    async fn judge_in(
        &self,
        workspace: &Workspace,
        request: JudgeRequest,
        progress: Option<&(dyn Fn(usize) + Send + Sync)>,
    ) -> Result<JudgeReport, JudgeError> {
        let program = match self
            .sandbox
            .compile(workspace, request.language, &request.code)
            .await?
        {
            Compilation::Ready(program) => program,
            Compilation::Failed(message) => {
                tracing::debug!(language = %request.language, "Compilation failed");
                return Ok(VerdictResolver::compilation_error(
                    &request.test_cases,
                    message,
                ));
            }
        };

        let mut resolver = VerdictResolver::new(request.test_cases.len());
        for (index, case) in request.test_cases.iter().enumerate() {
            if let Some(progress) = progress {
                progress(index + 1);
            }

            let input = checker::normalize_input(&case.input);
            let output = self.sandbox.run(&program, &input, &request.limits).await?;
            let expected = request
                .check_output
                .then_some(case.expected_output.as_str());
            let outcome = checker::evaluate(&output, expected, &request.limits);
            resolver.record(case, outcome, &output);

            if resolver.is_decided() {
                break;
            }
        }

        Ok(resolver.finish())
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Scripted sandbox for exercising the judge without spawning processes

    use super::process::{ProcessOutput, Termination};
    use super::*;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    pub struct ScriptedSandbox {
        pub compile_error: Option<String>,
        outputs: Mutex<VecDeque<ProcessOutput>>,
        pub runs: Mutex<Vec<String>>,
    }

    impl ScriptedSandbox {
        pub fn new(outputs: Vec<ProcessOutput>) -> Self {
            Self {
                compile_error: None,
                outputs: Mutex::new(outputs.into()),
                runs: Mutex::new(Vec::new()),
            }
        }

        pub fn failing_compile(message: &str) -> Self {
            Self {
                compile_error: Some(message.to_string()),
                ..Self::new(vec![])
            }
        }
    }

    pub fn exited(code: i32, stdout: &str, millis: u64) -> ProcessOutput {
        ProcessOutput {
            termination: Termination::Exited(code),
            stdout: stdout.to_string(),
            stderr: String::new(),
            elapsed: Duration::from_millis(millis),
            peak_memory_kb: 1024,
        }
    }

    pub fn terminated(termination: Termination) -> ProcessOutput {
        ProcessOutput {
            termination,
            stdout: String::new(),
            stderr: String::new(),
            elapsed: Duration::from_millis(10),
            peak_memory_kb: 1024,
        }
    }

    #[async_trait]
    impl Sandbox for ScriptedSandbox {
        async fn compile(
            &self,
            workspace: &Workspace,
            _language: Language,
            _code: &str,
        ) -> Result<Compilation, JudgeError> {
            match &self.compile_error {
                Some(message) => Ok(Compilation::Failed(message.clone())),
                None => Ok(Compilation::Ready(Program {
                    command: "true".to_string(),
                    args: vec![],
                    workdir: workspace.path().to_path_buf(),
                })),
            }
        }

        async fn run(
            &self,
            _program: &Program,
            input: &str,
            _limits: &Limits,
        ) -> Result<ProcessOutput, JudgeError> {
            self.runs.lock().unwrap().push(input.to_string());
            Ok(self
                .outputs
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| exited(0, "", 1)))
        }
    }
}
