//! Spawns one untrusted process with rlimits applied before exec and watches
//! it for wall time, resident memory and output size until it exits. The
//! final memory peak is the larger of the procfs samples and the kernel's
//! `ru_maxrss` reported by `wait4`.

use std::path::Path;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::{Child, Command};
use tokio::sync::Notify;
use tokio::task::JoinHandle;

use super::JudgeError;

const SANDBOX_PATH: &str = "/usr/local/sbin:/usr/local/bin:/usr/sbin:/usr/bin:/sbin:/bin";
const MEMORY_POLL_INTERVAL: Duration = Duration::from_millis(10);
const PIPE_DRAIN_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Termination {
    Exited(i32),
    Signaled(i32),
    WallTimeExceeded,
    MemoryExceeded,
    OutputExceeded,
}

#[derive(Debug, Clone)]
pub struct ProcessOutput {
    pub termination: Termination,
    pub stdout: String,
    pub stderr: String,
    pub elapsed: Duration,
    pub peak_memory_kb: u64,
}

#[derive(Debug, Clone)]
pub struct ProcessLimits {
    pub wall_time: Duration,
    /// CPU seconds enforced by RLIMIT_CPU
    pub cpu_seconds: Option<u64>,
    pub memory_kb: Option<u64>,
    pub output_bytes: usize,
    pub file_size_bytes: u64,
}

pub async fn run_process(
    program: &str,
    args: &[String],
    workdir: &Path,
    stdin: &[u8],
    limits: &ProcessLimits,
) -> Result<ProcessOutput, JudgeError> {
    let mut command = Command::new(program);
    command
        .args(args)
        .current_dir(workdir)
        .env_clear()
        .env("PATH", SANDBOX_PATH)
        .env("HOME", workdir)
        .env("LANG", "C.UTF-8")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(cfg!(not(unix)));

    #[cfg(unix)]
    command.process_group(0);

    #[cfg(target_os = "linux")]
    {
        let rlimits = rlimit_set(limits);
        // SAFETY: the closure only calls async-signal-safe setrlimit on
        // values computed before fork.
        unsafe {
            command.pre_exec(move || {
                for &(resource, soft, hard) in &rlimits {
                    let limit = libc::rlimit {
                        rlim_cur: soft as libc::rlim_t,
                        rlim_max: hard as libc::rlim_t,
                    };
                    if libc::setrlimit(resource, &limit) != 0 {
                        return Err(std::io::Error::last_os_error());
                    }
                }
                Ok(())
            });
        }
    }

    let fork_baseline_kb = current_rss_kb().await;
    let started = Instant::now();
    let mut child = command.spawn().map_err(|source| JudgeError::Spawn {
        program: program.to_string(),
        source,
    })?;
    let pid = child.id();
    // Kills the group even if this future is dropped mid-run
    let _group = GroupGuard(pid);

    let overflow = Arc::new(Notify::new());
    let stdout_task = child
        .stdout
        .take()
        .map(|pipe| tokio::spawn(read_limited(pipe, limits.output_bytes, overflow.clone())));
    let stderr_task = child
        .stderr
        .take()
        .map(|pipe| tokio::spawn(read_limited(pipe, limits.output_bytes, overflow.clone())));

    if let Some(mut pipe) = child.stdin.take() {
        let input = stdin.to_vec();
        tokio::spawn(async move {
            // The program may exit without reading its input
            let _ = pipe.write_all(&input).await;
            let _ = pipe.shutdown().await;
        });
    }

    let peak_memory = Arc::new(AtomicU64::new(0));
    let memory_watch = watch_memory(pid, limits.memory_kb, peak_memory.clone());
    let mut exit = spawn_exit_waiter(child);

    let termination = tokio::select! {
        report = &mut exit => {
            let (status, max_rss_kb) = exit_report(report)?;
            let sampled = peak_memory.load(Ordering::Relaxed);
            peak_memory.fetch_max(
                final_peak_kb(sampled, max_rss_kb, fork_baseline_kb),
                Ordering::Relaxed,
            );
            // The kernel peak can exceed the limit between two samples
            if limits
                .memory_kb
                .is_some_and(|limit| peak_memory.load(Ordering::Relaxed) > limit)
            {
                Termination::MemoryExceeded
            } else {
                exit_termination(status)
            }
        }
        _ = tokio::time::sleep(limits.wall_time) => Termination::WallTimeExceeded,
        _ = memory_watch => Termination::MemoryExceeded,
        _ = overflow.notified() => Termination::OutputExceeded,
    };
    let elapsed = started.elapsed();

    // Reap whatever the program left behind in its group
    kill_group(pid);
    if !matches!(termination, Termination::Exited(_) | Termination::Signaled(_)) {
        if cfg!(unix) {
            if let Ok(report) = tokio::time::timeout(PIPE_DRAIN_TIMEOUT, &mut exit).await {
                if let Ok((_, max_rss_kb)) = exit_report(report) {
                    let sampled = peak_memory.load(Ordering::Relaxed);
                    peak_memory.fetch_max(
                        final_peak_kb(sampled, max_rss_kb, fork_baseline_kb),
                        Ordering::Relaxed,
                    );
                }
            }
        } else {
            exit.abort();
        }
    }

    let stdout = collect(stdout_task).await;
    let stderr = collect(stderr_task).await;

    Ok(ProcessOutput {
        termination,
        stdout: String::from_utf8_lossy(&stdout).into_owned(),
        stderr: String::from_utf8_lossy(&stderr).into_owned(),
        elapsed,
        peak_memory_kb: peak_memory.load(Ordering::Relaxed),
    })
}

/// Exit status plus the kernel's peak resident set in KB, when reported
type ExitReport = (std::process::ExitStatus, Option<u64>);

fn exit_report(
    joined: Result<std::io::Result<ExitReport>, tokio::task::JoinError>,
) -> std::io::Result<ExitReport> {
    joined.map_err(std::io::Error::other)?
}

/// Reaps the child with wait4 so the peak RSS of short runs, which the
/// procfs sampler can miss, still counts.
#[cfg(unix)]
fn spawn_exit_waiter(child: Child) -> JoinHandle<std::io::Result<ExitReport>> {
    tokio::task::spawn_blocking(move || {
        let pid = child
            .id()
            .and_then(|pid| libc::pid_t::try_from(pid).ok())
            .ok_or_else(|| std::io::Error::other("child already reaped"))?;
        let report = wait4(pid);
        // Dropped only after wait4 so the runtime's reaper cannot take the status first
        drop(child);
        report
    })
}

#[cfg(not(unix))]
fn spawn_exit_waiter(mut child: Child) -> JoinHandle<std::io::Result<ExitReport>> {
    tokio::spawn(async move { child.wait().await.map(|status| (status, None)) })
}

#[cfg(unix)]
fn wait4(pid: libc::pid_t) -> std::io::Result<ExitReport> {
    use std::os::unix::process::ExitStatusExt;

    let mut status: libc::c_int = 0;
    // SAFETY: rusage is plain old data and all-zero is a valid value
    let mut usage: libc::rusage = unsafe { std::mem::zeroed() };
    loop {
        // SAFETY: both out-pointers refer to live locals for the duration of the call
        let reaped = unsafe { libc::wait4(pid, &mut status, 0, &mut usage) };
        if reaped == pid {
            break;
        }
        let err = std::io::Error::last_os_error();
        if err.kind() != std::io::ErrorKind::Interrupted {
            return Err(err);
        }
    }

    // ru_maxrss is kilobytes on Linux and bytes elsewhere
    let max_rss_kb = if cfg!(target_os = "linux") {
        u64::try_from(usage.ru_maxrss).ok()
    } else {
        u64::try_from(usage.ru_maxrss).ok().map(|bytes| bytes / 1024)
    };
    Ok((std::process::ExitStatus::from_raw(status), max_rss_kb))
}

/// Linux folds the pre-exec image, a copy of this process, into the child's
/// `ru_maxrss`. A value no larger than that image says nothing about the
/// program itself, so the procfs samples stand.
fn final_peak_kb(sampled_kb: u64, max_rss_kb: Option<u64>, fork_baseline_kb: Option<u64>) -> u64 {
    match (max_rss_kb, fork_baseline_kb) {
        (Some(kb), Some(baseline)) if kb > baseline => sampled_kb.max(kb),
        (Some(kb), None) => sampled_kb.max(kb),
        _ => sampled_kb,
    }
}

async fn current_rss_kb() -> Option<u64> {
    let status = tokio::fs::read_to_string("/proc/self/status").await.ok()?;
    status_field_kb(&status, "VmRSS:")
}

struct GroupGuard(Option<u32>);

impl Drop for GroupGuard {
    fn drop(&mut self) {
        kill_group(self.0);
    }
}

#[cfg(target_os = "linux")]
fn rlimit_set(limits: &ProcessLimits) -> Vec<(libc::__rlimit_resource_t, u64, u64)> {
    let mut set = vec![
        (libc::RLIMIT_CORE, 0, 0),
        (libc::RLIMIT_FSIZE, limits.file_size_bytes, limits.file_size_bytes),
    ];
    if let Some(cpu) = limits.cpu_seconds {
        // Soft limit raises SIGXCPU, the hard one a second later kills
        set.push((libc::RLIMIT_CPU, cpu, cpu + 1));
    }
    set
}

#[cfg(unix)]
fn exit_termination(status: std::process::ExitStatus) -> Termination {
    use std::os::unix::process::ExitStatusExt;

    match (status.code(), status.signal()) {
        (Some(code), _) => Termination::Exited(code),
        (None, Some(libc::SIGXCPU)) => Termination::WallTimeExceeded,
        (None, Some(signal)) => Termination::Signaled(signal),
        (None, None) => Termination::Exited(-1),
    }
}

#[cfg(not(unix))]
fn exit_termination(status: std::process::ExitStatus) -> Termination {
    Termination::Exited(status.code().unwrap_or(-1))
}

#[cfg(unix)]
fn kill_group(pid: Option<u32>) {
    if let Some(pid) = pid.and_then(|pid| libc::pid_t::try_from(pid).ok()) {
        // SAFETY: killpg has no memory-safety preconditions; the group was
        // created for this child by process_group(0).
        unsafe {
            libc::killpg(pid, libc::SIGKILL);
        }
    }
}

#[cfg(not(unix))]
fn kill_group(_pid: Option<u32>) {}

async fn read_limited<R>(pipe: R, limit: usize, overflow: Arc<Notify>) -> Vec<u8>
where
    R: AsyncRead + Unpin,
{
    let mut buffer = Vec::with_capacity(limit.min(64 * 1024));
    let mut reader = pipe.take(limit as u64 + 1);
    if reader.read_to_end(&mut buffer).await.is_err() {
        return buffer;
    }
    if buffer.len() > limit {
        buffer.truncate(limit);
        overflow.notify_one();
    }
    buffer
}

async fn collect(task: Option<tokio::task::JoinHandle<Vec<u8>>>) -> Vec<u8> {
    let Some(task) = task else {
        return Vec::new();
    };
    match tokio::time::timeout(PIPE_DRAIN_TIMEOUT, task).await {
        Ok(Ok(buffer)) => buffer,
        Ok(Err(e)) => {
            tracing::warn!(error = %e, "Output reader task failed");
            Vec::new()
        }
        Err(_) => {
            tracing::warn!("Output pipe still open after the process ended");
            Vec::new()
        }
    }
}

/// Samples resident memory from procfs. Resolves only when the limit is crossed.
async fn watch_memory(pid: Option<u32>, limit_kb: Option<u64>, peak: Arc<AtomicU64>) {
    let Some(pid) = pid else {
        return std::future::pending().await;
    };
    let status_path = format!("/proc/{}/status", pid);

    loop {
        if let Ok(status) = tokio::fs::read_to_string(&status_path).await {
            if let Some(kb) = resident_kb(&status) {
                peak.fetch_max(kb, Ordering::Relaxed);
                if limit_kb.is_some_and(|limit| kb > limit) {
                    return;
                }
            }
        }
        tokio::time::sleep(MEMORY_POLL_INTERVAL).await;
    }
}

/// Peak resident set size (VmHWM, falling back to VmRSS) in kilobytes
pub fn resident_kb(status: &str) -> Option<u64> {
    status_field_kb(status, "VmHWM:").or_else(|| status_field_kb(status, "VmRSS:"))
}

fn status_field_kb(status: &str, name: &str) -> Option<u64> {
    status
        .lines()
        .find(|line| line.starts_with(name))
        .and_then(|line| line.split_whitespace().nth(1))
        .and_then(|value| value.parse::<u64>().ok())
}

#[cfg(all(test, target_os = "linux"))]
mod tests {
    use super::*;

    fn limits() -> ProcessLimits {
        ProcessLimits {
            wall_time: Duration::from_secs(2),
            cpu_seconds: Some(2),
            memory_kb: Some(256 * 1024),
            output_bytes: 1024,
            file_size_bytes: 1024 * 1024,
        }
    }

    fn sh(script: &str) -> Vec<String> {
        vec!["-c".to_string(), script.to_string()]
    }

    #[tokio::test]
    async fn echoes_stdin() {
        let dir = std::env::temp_dir();
        let output = run_process("/bin/sh", &sh("cat"), &dir, b"hello\n", &limits())
            .await
            .unwrap();

        assert_eq!(output.termination, Termination::Exited(0));
        assert_eq!(output.stdout, "hello\n");
    }

    #[tokio::test]
    async fn wall_time_is_enforced() {
        let dir = std::env::temp_dir();
        let limits = ProcessLimits {
            wall_time: Duration::from_millis(200),
            ..limits()
        };
        let output = run_process("/bin/sh", &sh("sleep 5"), &dir, b"", &limits)
            .await
            .unwrap();

        assert_eq!(output.termination, Termination::WallTimeExceeded);
        assert!(output.elapsed < Duration::from_secs(3));
    }

    #[tokio::test]
    async fn exit_code_is_reported() {
        let dir = std::env::temp_dir();
        let output = run_process("/bin/sh", &sh("echo oops >&2; exit 3"), &dir, b"", &limits())
            .await
            .unwrap();

        assert_eq!(output.termination, Termination::Exited(3));
        assert_eq!(output.stderr.trim(), "oops");
    }

    #[tokio::test]
    async fn output_limit_is_enforced() {
        let dir = std::env::temp_dir();
        let output = run_process("/bin/sh", &sh("yes"), &dir, b"", &limits())
            .await
            .unwrap();

        assert_eq!(output.termination, Termination::OutputExceeded);
        assert_eq!(output.stdout.len(), 1024);
    }

    #[tokio::test]
    async fn environment_is_cleared() {
        std::env::set_var("CODEJUDGE_LEAK_CHECK", "secret");
        let dir = std::env::temp_dir();
        let output = run_process("/bin/sh", &sh("env"), &dir, b"", &limits())
            .await
            .unwrap();

        assert!(!output.stdout.contains("CODEJUDGE_LEAK_CHECK"));
        assert!(output.stdout.contains("PATH="));
    }

    #[tokio::test]
    async fn quick_exits_are_reaped() {
        let dir = std::env::temp_dir();
        for code in [0, 7] {
            let script = format!("exit {}", code);
            let output = run_process("/bin/sh", &sh(&script), &dir, b"", &limits())
                .await
                .unwrap();
            assert_eq!(output.termination, Termination::Exited(code));
        }
    }

    #[tokio::test]
    async fn killed_runs_are_reaped() {
        let dir = std::env::temp_dir();
        let limits = ProcessLimits {
            wall_time: Duration::from_millis(100),
            ..limits()
        };
        let started = Instant::now();
        let output = run_process("/bin/sh", &sh("exec sleep 5"), &dir, b"", &limits)
            .await
            .unwrap();

        assert_eq!(output.termination, Termination::WallTimeExceeded);
        assert!(started.elapsed() < Duration::from_secs(2));
    }

    #[test]
    fn kernel_peak_above_the_fork_image_wins() {
        assert_eq!(final_peak_kb(0, Some(90_000), Some(40_000)), 90_000);
        assert_eq!(final_peak_kb(120_000, Some(90_000), Some(40_000)), 120_000);
        assert_eq!(final_peak_kb(0, Some(2_048), None), 2_048);
    }

    #[test]
    fn kernel_peak_within_the_fork_image_is_ignored() {
        assert_eq!(final_peak_kb(1_500, Some(40_000), Some(40_000)), 1_500);
        assert_eq!(final_peak_kb(1_500, Some(12_000), Some(40_000)), 1_500);
        assert_eq!(final_peak_kb(1_500, None, Some(40_000)), 1_500);
    }

    #[tokio::test]
    async fn missing_program_is_a_spawn_error() {
        let dir = std::env::temp_dir();
        let err = run_process("/nonexistent/interpreter", &[], &dir, b"", &limits())
            .await
            .unwrap_err();
        assert!(matches!(err, JudgeError::Spawn { .. }));
    }

    #[test]
    fn parses_proc_status() {
        let status = "Name:\tpython3\nVmPeak:\t  20000 kB\nVmHWM:\t    8120 kB\nVmRSS:\t    8000 kB\n";
        assert_eq!(resident_kb(status), Some(8120));
        assert_eq!(resident_kb("VmRSS:\t 512 kB\n"), Some(512));
        assert_eq!(resident_kb("Name:\tsh\n"), None);
    }
}
