use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;

use super::language::Toolchain;
use super::process::{run_process, ProcessLimits, ProcessOutput, Termination};
use super::workspace::Workspace;
use super::{JudgeError, Limits};
use crate::models::Language;

const COMPILE_OUTPUT_LIMIT: usize = 64 * 1024;
const COMPILE_MEMORY_LIMIT_KB: u64 = 1024 * 1024;
const MAX_FILE_SIZE: u64 = 64 * 1024 * 1024;
const MAX_ERROR_MESSAGE: usize = 4096;

/// A built solution ready to be started once per test case
#[derive(Debug, Clone)]
pub struct Program {
    pub command: String,
    pub args: Vec<String>,
    pub workdir: PathBuf,
}

#[derive(Debug, Clone)]
pub enum Compilation {
    Ready(Program),
    Failed(String),
}

#[async_trait]
pub trait Sandbox: Send + Sync {
    /// Writes the source into the workspace and builds it when the language needs it
    async fn compile(
        &self,
        workspace: &Workspace,
        language: Language,
        code: &str,
    ) -> Result<Compilation, JudgeError>;

    /// Runs a prepared program once with `input` on stdin
    async fn run(
        &self,
        program: &Program,
        input: &str,
        limits: &Limits,
    ) -> Result<ProcessOutput, JudgeError>;
}

/// Runs programs as local child processes with rlimits and monitors
pub struct ProcessSandbox {
    compile_timeout: Duration,
}

impl ProcessSandbox {
    pub fn new(compile_timeout_ms: u64) -> Self {
        Self {
            compile_timeout: Duration::from_millis(compile_timeout_ms),
        }
    }
}

#[async_trait]
impl Sandbox for ProcessSandbox {
    async fn compile(
        &self,
        workspace: &Workspace,
        language: Language,
        code: &str,
    ) -> Result<Compilation, JudgeError> {
        let toolchain = Toolchain::for_language(language, code);
        workspace.write_file(&toolchain.source_file, code).await?;

        if let Some((compiler, args)) = &toolchain.compile {
            let limits = ProcessLimits {
                wall_time: self.compile_timeout,
                cpu_seconds: Some(self.compile_timeout.as_secs() + 1),
                memory_kb: Some(COMPILE_MEMORY_LIMIT_KB),
                output_bytes: COMPILE_OUTPUT_LIMIT,
                file_size_bytes: MAX_FILE_SIZE,
            };
            let output = run_process(compiler, args, workspace.path(), b"", &limits).await?;

            match output.termination {
                Termination::Exited(0) => {}
                Termination::WallTimeExceeded => {
                    return Ok(Compilation::Failed("Compilation timed out".to_string()));
                }
                _ => {
                    let message = if output.stderr.trim().is_empty() {
                        output.stdout
                    } else {
                        output.stderr
                    };
                    return Ok(Compilation::Failed(truncate_message(message.trim())));
                }
            }
        }

        let (command, args) = toolchain.run_command(workspace.path());
        Ok(Compilation::Ready(Program {
            command,
            args,
            workdir: workspace.path().to_path_buf(),
        }))
    }

    async fn run(
        &self,
        program: &Program,
        input: &str,
        limits: &Limits,
    ) -> Result<ProcessOutput, JudgeError> {
        let process_limits = ProcessLimits {
            wall_time: wall_time_for(limits.time_limit),
            cpu_seconds: Some(cpu_seconds_for(limits.time_limit)),
            memory_kb: Some(limits.memory_limit_kb),
            output_bytes: limits.output_limit_bytes,
            file_size_bytes: MAX_FILE_SIZE,
        };

        run_process(
            &program.command,
            &program.args,
            &program.workdir,
            input.as_bytes(),
            &process_limits,
        )
        .await
    }
}

/// Wall clock allowance: interpreter start-up gets slack on top of the limit,
/// the checker still compares elapsed time against the limit itself.
fn wall_time_for(time_limit: Duration) -> Duration {
    time_limit + Duration::from_millis(500)
}

/// CPU rlimit: the time limit rounded up to whole seconds, plus one
fn cpu_seconds_for(time_limit: Duration) -> u64 {
    time_limit.as_millis().div_ceil(1000) as u64 + 1
}

fn truncate_message(message: &str) -> String {
    if message.len() <= MAX_ERROR_MESSAGE {
        return message.to_string();
    }
    let mut end = MAX_ERROR_MESSAGE;
    while !message.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &message[..end])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn long_messages_are_truncated() {
        let message = "e".repeat(MAX_ERROR_MESSAGE + 10);
        let truncated = truncate_message(&message);
        assert_eq!(truncated.len(), MAX_ERROR_MESSAGE + 3);
        assert!(truncated.ends_with("..."));
        assert_eq!(truncate_message("short"), "short");
    }

    #[test]
    fn cpu_limit_rounds_up() {
        assert_eq!(cpu_seconds_for(Duration::from_millis(2000)), 3);
        assert_eq!(cpu_seconds_for(Duration::from_millis(1500)), 3);
        assert_eq!(cpu_seconds_for(Duration::from_millis(100)), 2);
    }

    #[test]
    fn wall_time_has_slack() {
        assert_eq!(
            wall_time_for(Duration::from_millis(1000)),
            Duration::from_millis(1500)
        );
    }

    #[cfg(target_os = "linux")]
    #[tokio::test]
    async fn python_program_runs_when_available() {
        if std::process::Command::new("python3")
            .arg("--version")
            .output()
            .is_err()
        {
            return;
        }

        let root = std::env::temp_dir().join("codejudge-sandbox-test");
        let workspace = Workspace::create(&root).await.unwrap();
        let sandbox = ProcessSandbox::new(10_000);

        let compilation = sandbox
            .compile(&workspace, Language::Python, "a, b = map(int, input().split())\nprint(a + b)")
            .await
            .unwrap();
        let Compilation::Ready(program) = compilation else {
            panic!("python needs no compilation");
        };

        let output = sandbox
            .run(&program, "2 3\n", &Limits::new(2000, 256, 1024))
            .await
            .unwrap();
        assert_eq!(output.termination, Termination::Exited(0));
        assert_eq!(output.stdout.trim(), "5");

        workspace.remove().await;
    }
}
