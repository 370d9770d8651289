//! Sandbox execution engine: `run(code, session) -> ExecutionResult`.
//!
//! One run = resolve interpreter, build the backend command, apply limits in
//! `pre_exec`, feed header + source on stdin, collect output lines, race the
//! child against the wall clock and the memory watcher, classify, tear down.
//! Teardown runs on every path and never overrides the result.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use codebridge_core::{ExecutionResult, RunStatus, Session};
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tokio::process::{Child, Command};
use uuid::Uuid;

use crate::backend::{Invocation, IsolationView, PreparedCommand, RunPlan, SandboxBackend};
use crate::common::{
    kill_process_tree, process_tree_rss, ADDRESS_SPACE_HEADROOM_MB, MEMORY_CHECK_INTERVAL_MS,
    READER_GRACE_MS,
};
use crate::lifecycle::{RunLifecycle, RunState};
use crate::prelude::{parse_outcome, result_marker, runner_args, split_marker, RunnerHeader, RunnerOutcome};
use crate::runner::ResourceLimits;
use crate::runtime_resolver::{Language, ResolvedRuntime, RuntimeResolver};
use crate::SandboxError;

/// Longest single stdout/stderr line kept in memory. The result line may be
/// this large; longer lines are cut.
const MAX_LINE_BYTES: usize = 16 * 1024 * 1024;

const SANDBOX_PATH: &str = "/usr/local/bin:/usr/bin:/bin";

/// Live isolations, keyed by run id.
#[derive(Debug, Default)]
struct Inventory {
    live: Mutex<HashSet<String>>,
}

impl Inventory {
    fn live(&self) -> MutexGuard<'_, HashSet<String>> {
        self.live.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn enter(self: &Arc<Self>, run_id: &str) -> IsolationGuard {
        self.live().insert(run_id.to_string());
        IsolationGuard {
            inventory: Arc::clone(self),
            run_id: run_id.to_string(),
        }
    }
}

/// Removes the run from the inventory when dropped, including when the run
/// future itself is cancelled.
struct IsolationGuard {
    inventory: Arc<Inventory>,
    run_id: String,
}

impl Drop for IsolationGuard {
    fn drop(&mut self) {
        self.inventory.live().remove(&self.run_id);
    }
}

pub struct SandboxEngine {
    backend: Arc<dyn SandboxBackend>,
    resolver: Arc<dyn RuntimeResolver>,
    limits: ResourceLimits,
    bridge_socket: PathBuf,
    runtime_dir: PathBuf,
    default_language: Language,
    inventory: Arc<Inventory>,
}

impl SandboxEngine {
    pub fn new(
        backend: Arc<dyn SandboxBackend>,
        resolver: Arc<dyn RuntimeResolver>,
        limits: ResourceLimits,
        bridge_socket: impl Into<PathBuf>,
        runtime_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            backend,
            resolver,
            limits,
            bridge_socket: bridge_socket.into(),
            runtime_dir: runtime_dir.into(),
            default_language: Language::default(),
            inventory: Arc::new(Inventory::default()),
        }
    }

    pub fn with_default_language(mut self, language: Language) -> Self {
        self.default_language = language;
        self
    }

    pub fn limits(&self) -> &ResourceLimits {
        &self.limits
    }

    pub fn backend_name(&self) -> &str {
        self.backend.name()
    }

    pub fn default_language(&self) -> Language {
        self.default_language
    }

    /// Isolations that have been created and not yet torn down.
    pub fn active_isolations(&self) -> usize {
        self.inventory.live().len()
    }

    pub async fn run(&self, code: &str, session: &Session) -> ExecutionResult {
        self.run_in(self.default_language, code, session).await
    }

    pub async fn run_in(&self, language: Language, code: &str, session: &Session) -> ExecutionResult {
        let started = Instant::now();
        let run_id = Uuid::new_v4().simple().to_string();
        let mut lifecycle = RunLifecycle::new(run_id.as_str());
        let guard = self.inventory.enter(&run_id);
        tracing::debug!(
            run_id = %run_id,
            session_id = %session.id,
            language = %language,
            backend = self.backend.name(),
            "starting run"
        );

        let result = match self.create_scratch(&run_id) {
            Ok(scratch) => {
                let result = self
                    .execute(language, code, session, scratch.path(), &mut lifecycle, started)
                    .await;
                if let Err(e) = scratch.close() {
                    tracing::warn!(run_id = %run_id, "failed to remove run scratch dir: {}", e);
                }
                result
            }
            Err(e) => isolation_failure(format!("scratch directory: {}", e), Vec::new(), started),
        };

        // Cancels bridge calls this run left in flight.
        session.end_run();
        drop(guard);
        if let Err(e) = lifecycle.advance(RunState::CleanedUp) {
            tracing::warn!(run_id = %run_id, "{}", e);
        }
        tracing::info!(
            run_id = %run_id,
            session_id = %session.id,
            status = %result.status,
            duration_ms = result.duration_ms,
            "run finished"
        );
        result
    }

    fn create_scratch(&self, run_id: &str) -> std::io::Result<tempfile::TempDir> {
        let runs = self.runtime_dir.join("runs");
        std::fs::create_dir_all(&runs)?;
        tempfile::Builder::new()
            .prefix(&format!("run-{}-", &run_id[..run_id.len().min(8)]))
            .tempdir_in(runs)
    }

    async fn execute(
        &self,
        language: Language,
        code: &str,
        session: &Session,
        scratch: &Path,
        lifecycle: &mut RunLifecycle,
        started: Instant,
    ) -> ExecutionResult {
        let Some(runtime) = self.resolver.resolve(language) else {
            let err = SandboxError::RuntimeUnavailable(language.to_string());
            return isolation_failure(err, Vec::new(), started);
        };
        let plan = RunPlan {
            language,
            runtime: &runtime,
            session,
            bridge_socket: &self.bridge_socket,
            scratch_dir: scratch,
            limits: &self.limits,
        };
        let view = self.backend.view(&plan);

        let nonce = Uuid::new_v4().simple().to_string();
        let marker = result_marker(&nonce);
        let socket = view.bridge_socket.to_string_lossy().into_owned();
        let header = RunnerHeader {
            nonce: &nonce,
            token: session.auth_token(),
            socket: &socket,
        };
        let mut stdin_payload = match serde_json::to_string(&header) {
            Ok(h) => h,
            Err(e) => return isolation_failure(format!("runner header: {}", e), Vec::new(), started),
        };
        stdin_payload.push('\n');
        stdin_payload.push_str(code);

        let invocation = Invocation {
            program: runtime.interpreter.clone(),
            args: runner_args(language, self.limits.max_memory_mb),
            env: sandbox_env(&view, &runtime),
        };
        let PreparedCommand { mut command, guards } =
            match self.backend.command(&plan, &view, &invocation) {
                Ok(prepared) => prepared,
                Err(e) => return isolation_failure(e, Vec::new(), started),
            };
        command
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        apply_process_limits(&mut command, language, &self.limits);

        let spawned = command.spawn();
        drop(guards);
        let mut child = match spawned {
            Ok(child) => child,
            Err(e) => return isolation_failure(SandboxError::Spawn(e), Vec::new(), started),
        };
        advance(lifecycle, RunState::Started);
        let pid = child.id();

        let stdin_task = child.stdin.take().map(|mut stdin| {
            tokio::spawn(async move {
                if let Err(e) = stdin.write_all(stdin_payload.as_bytes()).await {
                    tracing::debug!("runner stdin closed early: {}", e);
                }
                let _ = stdin.shutdown().await;
            })
        });

        let sink = Arc::new(Mutex::new(LogSink::new(self.limits.max_log_bytes)));
        let stdout_task = child.stdout.take().map(|out| {
            tokio::spawn(read_lines(out, Arc::clone(&sink), Some(marker.clone())))
        });
        let stderr_task = child
            .stderr
            .take()
            .map(|err| tokio::spawn(read_lines(err, Arc::clone(&sink), None)));

        let ending = self.supervise(&mut child, pid).await;

        if let Some(task) = stdin_task {
            task.abort();
        }
        let grace = Instant::now() + Duration::from_millis(READER_GRACE_MS);
        for task in [stdout_task, stderr_task].into_iter().flatten() {
            let abort = task.abort_handle();
            let remaining = grace.saturating_duration_since(Instant::now());
            if tokio::time::timeout(remaining, task).await.is_err() {
                abort.abort();
            }
        }

        let (logs, payload) = {
            let mut sink = lock_sink(&sink);
            (std::mem::take(&mut sink.logs), sink.payload.take())
        };
        let classified = classify(&ending, payload.as_deref(), &logs, &self.limits);
        advance(lifecycle, RunState::from(classified.status));

        let duration_ms = elapsed_ms(started);
        match classified.error {
            None => ExecutionResult::completed(classified.output, logs, duration_ms),
            Some(error) => ExecutionResult::failed(classified.status, error, logs, duration_ms),
        }
    }

    /// Wait for the child under the wall-clock and memory ceilings, then kill
    /// the process tree and reap. The child stays unreaped until the tree is
    /// killed, so its pid and process group id cannot have been reused by
    /// another process.
    async fn supervise(&self, child: &mut Child, pid: Option<u32>) -> Ending {
        let timeout = Duration::from_secs(self.limits.timeout_secs);
        let memory_limit = self.limits.max_memory_bytes();

        let raced = tokio::time::timeout(timeout, async {
            tokio::select! {
                reaped = wait_for_exit(child, pid) => Race::Exited { reaped },
                rss = watch_memory(pid, memory_limit) => Race::MemoryExceeded(rss),
            }
        })
        .await
        .unwrap_or(Race::TimedOut);

        let reaped = matches!(raced, Race::Exited { reaped: true });
        if !reaped {
            if let Some(pid) = pid {
                kill_process_tree(pid);
            }
            let _ = child.start_kill();
        }
        let status =
            match tokio::time::timeout(Duration::from_millis(READER_GRACE_MS), child.wait()).await {
                Ok(Ok(status)) => Some(status),
                Ok(Err(e)) => {
                    tracing::debug!(pid = ?pid, "failed to reap isolated process: {}", e);
                    None
                }
                Err(_) => {
                    tracing::warn!(pid = ?pid, "isolated process did not exit after SIGKILL");
                    None
                }
            };

        match raced {
            Race::Exited { .. } => Ending::Exited(status),
            Race::TimedOut => Ending::TimedOut,
            Race::MemoryExceeded(rss) => Ending::MemoryExceeded(rss),
        }
    }
}

/// Resolves once the child has exited. Returns `true` if the child was
/// reaped on the way, `false` if it was left a zombie.
#[cfg(target_os = "linux")]
async fn wait_for_exit(child: &mut Child, pid: Option<u32>) -> bool {
    let Some(pid) = pid else {
        let _ = child.wait().await;
        return true;
    };
    match exited_unreaped(pid).await {
        Ok(()) => false,
        Err(e) => {
            tracing::debug!(pid, "waitid failed, falling back to wait: {}", e);
            let _ = child.wait().await;
            true
        }
    }
}

#[cfg(not(target_os = "linux"))]
async fn wait_for_exit(child: &mut Child, _pid: Option<u32>) -> bool {
    let _ = child.wait().await;
    true
}

/// `waitid(WEXITED | WNOWAIT)`: blocks until `pid` exits without reaping it.
#[cfg(target_os = "linux")]
async fn exited_unreaped(pid: u32) -> std::io::Result<()> {
    use nix::errno::Errno;
    use nix::sys::wait::{waitid, Id, WaitPidFlag};
    use nix::unistd::Pid;

    tokio::task::spawn_blocking(move || loop {
        match waitid(
            Id::Pid(Pid::from_raw(pid as i32)),
            WaitPidFlag::WEXITED | WaitPidFlag::WNOWAIT,
        ) {
            Err(Errno::EINTR) => continue,
            Err(e) => return Err(std::io::Error::from(e)),
            Ok(_) => return Ok(()),
        }
    })
    .await
    .map_err(std::io::Error::other)?
}

fn advance(lifecycle: &mut RunLifecycle, to: RunState) {
    if let Err(e) = lifecycle.advance(to) {
        tracing::warn!(run_id = %lifecycle.run_id(), "{}", e);
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

fn isolation_failure(
    err: impl std::fmt::Display,
    logs: Vec<String>,
    started: Instant,
) -> ExecutionResult {
    tracing::error!("isolation failure: {}", err);
    ExecutionResult::failed(
        RunStatus::Crashed,
        format!("IsolationFailure: {}", err),
        logs,
        elapsed_ms(started),
    )
}

/// Environment inside the isolation. Nothing from the host leaks in.
fn sandbox_env(view: &IsolationView, runtime: &ResolvedRuntime) -> Vec<(String, String)> {
    let workspace = view.workspace.to_string_lossy().into_owned();
    let mut env = vec![
        ("PATH".to_string(), SANDBOX_PATH.to_string()),
        ("HOME".to_string(), workspace.clone()),
        ("TMPDIR".to_string(), workspace),
        ("LANG".to_string(), "C.UTF-8".to_string()),
        ("CODEBRIDGE_SANDBOX".to_string(), "1".to_string()),
        (
            "CODEBRIDGE_SKILLS_DIR".to_string(),
            view.skills.to_string_lossy().into_owned(),
        ),
    ];
    env.extend(runtime.extra_env.iter().cloned());
    env
}

/// New session (so the whole tree can be killed by group) and rlimits:
/// CPU seconds, file size, no core dumps and, for Python, address space.
#[cfg(unix)]
fn apply_process_limits(command: &mut Command, language: Language, limits: &ResourceLimits) {
    use nix::sys::resource::{getrlimit, setrlimit, Resource};

    fn cap(resource: Resource, soft: u64, hard: u64) -> std::io::Result<()> {
        let (_, current_hard) = getrlimit(resource)?;
        let hard = hard.min(current_hard);
        setrlimit(resource, soft.min(hard), hard)?;
        Ok(())
    }

    let cpu = limits.cpu_secs;
    let fsize = limits.max_memory_bytes();
    let address_space = match language {
        Language::Python => {
            Some((limits.max_memory_mb + ADDRESS_SPACE_HEADROOM_MB) * 1024 * 1024)
        }
        Language::Node => None,
    };

    unsafe {
        command.pre_exec(move || {
            nix::unistd::setsid()?;
            cap(Resource::RLIMIT_CPU, cpu, cpu + 1)?;
            cap(Resource::RLIMIT_FSIZE, fsize, fsize)?;
            cap(Resource::RLIMIT_CORE, 0, 0)?;
            if let Some(bytes) = address_space {
                cap(Resource::RLIMIT_AS, bytes, bytes)?;
            }
            Ok(())
        });
    }
}

#[cfg(not(unix))]
fn apply_process_limits(_command: &mut Command, _language: Language, _limits: &ResourceLimits) {}

/// Resolves with the observed RSS once the process tree exceeds `limit`.
/// Never resolves when the tree cannot be observed.
async fn watch_memory(pid: Option<u32>, limit: u64) -> u64 {
    let Some(pid) = pid else {
        return std::future::pending().await;
    };
    let mut interval = tokio::time::interval(Duration::from_millis(MEMORY_CHECK_INTERVAL_MS));
    loop {
        interval.tick().await;
        if let Some(rss) = process_tree_rss(pid) {
            if rss > limit {
                tracing::debug!(pid, rss, limit, "memory ceiling exceeded");
                return rss;
            }
        }
    }
}

/// Which of exit, memory watcher or wall clock finished first.
enum Race {
    Exited { reaped: bool },
    MemoryExceeded(u64),
    TimedOut,
}

#[derive(Debug)]
enum Ending {
    /// Exited on its own; `None` when the exit status could not be read.
    Exited(Option<ExitStatus>),
    TimedOut,
    MemoryExceeded(u64),
}

/// Collected logs plus the runner's result payload.
struct LogSink {
    logs: Vec<String>,
    payload: Option<String>,
    used: u64,
    budget: u64,
    truncated: bool,
}

impl LogSink {
    fn new(budget: u64) -> Self {
        Self {
            logs: Vec::new(),
            payload: None,
            used: 0,
            budget,
            truncated: false,
        }
    }

    fn accept(&mut self, line: String, marker: Option<&str>) {
        if let Some((before, payload)) = marker.and_then(|m| split_marker(&line, m)) {
            // print() without newline right before the result line
            if !before.is_empty() {
                self.push(before.to_string());
            }
            self.payload = Some(payload.to_string());
            return;
        }
        self.push(line);
    }

    fn push(&mut self, line: String) {
        if self.truncated {
            return;
        }
        let cost = line.len() as u64 + 1;
        if self.used + cost > self.budget {
            self.truncated = true;
            self.logs
                .push(format!("[codebridge] log output truncated after {} bytes", self.used));
            return;
        }
        self.used += cost;
        self.logs.push(line);
    }
}

fn lock_sink(sink: &Mutex<LogSink>) -> MutexGuard<'_, LogSink> {
    sink.lock().unwrap_or_else(PoisonError::into_inner)
}

async fn read_lines<R>(reader: R, sink: Arc<Mutex<LogSink>>, marker: Option<String>)
where
    R: AsyncRead + Unpin,
{
    let mut reader = BufReader::new(reader);
    let mut line: Vec<u8> = Vec::new();
    loop {
        let (consumed, complete) = {
            let buf = match reader.fill_buf().await {
                Ok(buf) => buf,
                Err(e) => {
                    tracing::debug!("output reader stopped: {}", e);
                    break;
                }
            };
            if buf.is_empty() {
                break;
            }
            let (chunk, complete) = match buf.iter().position(|b| *b == b'\n') {
                Some(i) => (&buf[..i], true),
                None => (buf, false),
            };
            let room = MAX_LINE_BYTES.saturating_sub(line.len());
            line.extend_from_slice(&chunk[..chunk.len().min(room)]);
            (chunk.len() + usize::from(complete), complete)
        };
        reader.consume(consumed);
        if complete {
            let text = String::from_utf8_lossy(&line).trim_end_matches('\r').to_string();
            lock_sink(&sink).accept(text, marker.as_deref());
            line.clear();
        }
    }
    if !line.is_empty() {
        let text = String::from_utf8_lossy(&line).into_owned();
        lock_sink(&sink).accept(text, marker.as_deref());
    }
}

#[derive(Debug, PartialEq)]
struct Classified {
    status: RunStatus,
    output: Option<Value>,
    error: Option<String>,
}

impl Classified {
    fn failed(status: RunStatus, error: String) -> Self {
        Self {
            status,
            output: None,
            error: Some(error),
        }
    }
}

#[cfg(unix)]
fn exit_signal(status: &ExitStatus) -> Option<i32> {
    use std::os::unix::process::ExitStatusExt;
    status.signal()
}

#[cfg(not(unix))]
fn exit_signal(_status: &ExitStatus) -> Option<i32> {
    None
}

#[cfg(unix)]
const SIGXCPU: i32 = libc::SIGXCPU;
#[cfg(not(unix))]
const SIGXCPU: i32 = 24;
#[cfg(unix)]
const SIGKILL: i32 = libc::SIGKILL;
#[cfg(not(unix))]
const SIGKILL: i32 = 9;

const V8_HEAP_MESSAGES: &[&str] = &["JavaScript heap out of memory", "Reached heap limit"];

fn classify(
    ending: &Ending,
    payload: Option<&str>,
    logs: &[String],
    limits: &ResourceLimits,
) -> Classified {
    let status = match ending {
        Ending::TimedOut => {
            return Classified::failed(
                RunStatus::TimedOut,
                format!(
                    "IsolationTimeout: execution exceeded {}s wall-clock limit",
                    limits.timeout_secs
                ),
            )
        }
        Ending::MemoryExceeded(rss) => {
            return Classified::failed(
                RunStatus::ResourceExceeded,
                format!(
                    "ResourceLimitExceeded: memory use {} MB exceeds the {} MB ceiling",
                    rss / (1024 * 1024),
                    limits.max_memory_mb
                ),
            )
        }
        Ending::Exited(status) => status,
    };

    if let Some(payload) = payload {
        return match parse_outcome(payload) {
            Some(RunnerOutcome::Returned(output)) => Classified {
                status: RunStatus::Completed,
                output,
                error: None,
            },
            Some(RunnerOutcome::Raised { kind, .. }) if kind == "MemoryError" => Classified::failed(
                RunStatus::ResourceExceeded,
                format!(
                    "ResourceLimitExceeded: memory ceiling of {} MB reached (MemoryError)",
                    limits.max_memory_mb
                ),
            ),
            Some(RunnerOutcome::Raised { kind, message }) => Classified::failed(
                RunStatus::Crashed,
                format!("RuntimeException: {}: {}", kind, message),
            ),
            None => Classified::failed(
                RunStatus::Crashed,
                "RuntimeException: malformed result line".to_string(),
            ),
        };
    }

    // No result line: the interpreter died before finishing.
    let signal = status.as_ref().and_then(exit_signal);
    let code = status.as_ref().and_then(ExitStatus::code);
    if signal == Some(SIGXCPU) || code == Some(128 + SIGXCPU) {
        return Classified::failed(
            RunStatus::ResourceExceeded,
            format!(
                "ResourceLimitExceeded: CPU time limit of {}s exceeded",
                limits.cpu_secs
            ),
        );
    }
    if signal == Some(SIGKILL) || code == Some(128 + SIGKILL) {
        return Classified::failed(
            RunStatus::ResourceExceeded,
            "ResourceLimitExceeded: isolated process was killed by a resource limit".to_string(),
        );
    }
    if logs
        .iter()
        .any(|l| V8_HEAP_MESSAGES.iter().any(|m| l.contains(m)))
    {
        return Classified::failed(
            RunStatus::ResourceExceeded,
            format!(
                "ResourceLimitExceeded: JavaScript heap exceeded the {} MB ceiling",
                limits.max_memory_mb
            ),
        );
    }
    let how = match (code, signal) {
        (Some(c), _) => format!("status {}", c),
        (None, Some(s)) => format!("signal {}", s),
        (None, None) => "unknown status".to_string(),
    };
    Classified::failed(
        RunStatus::Crashed,
        format!("RuntimeException: interpreter exited with {} without a result", how),
    )
}
