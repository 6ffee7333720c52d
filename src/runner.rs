//! Spawning and supervising external commands
//!
//! Each started command gets a dedicated worker thread plus one reader
//! thread per output pipe. Readers push lines into a channel; the worker
//! forwards them to the registry in arrival order, then reaps the process
//! and finalizes the record exactly once.
//!
//! The OS process handle never leaves this module. Callers hold a
//! `RunHandle` (id + join) and stop a process through `CommandRunner::cancel`.

use std::collections::HashMap;
use std::io::{BufRead, BufReader, ErrorKind, Read};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use crate::error::ShelfError;
use crate::events::lock_or_recover;
use crate::models::{OutputLine, OutputLineType, ProcessId, ProcessStatus};
use crate::registry::ProcessRegistry;

const POLL_INTERVAL: Duration = Duration::from_millis(25);

/// Max stderr lines attached to a failed record
const ERROR_SUMMARY_LINES: usize = 10;
const STDERR_TAIL_LINES: usize = 15;

/// A command with its arguments, for execution without shell interpolation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SafeCommand {
    /// The program to run (e.g., "nix")
    pub program: String,
    /// Arguments to pass to the program
    pub args: Vec<String>,
    /// Human-readable description for display
    pub display: String,
}

impl SafeCommand {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        let program = program.into();
        let display = std::iter::once(program.as_str())
            .chain(args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ");
        Self {
            program,
            args,
            display,
        }
    }
}

impl std::fmt::Display for SafeCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.display)
    }
}

/// Called on the worker thread once the record reached its terminal status
pub type FinishHook = Box<dyn FnOnce(ProcessStatus) + Send + 'static>;

/// Per-process supervision state shared between the worker and `cancel`
#[derive(Default)]
struct Supervised {
    child: Mutex<Option<Child>>,
    cancelled: AtomicBool,
}

enum StreamItem {
    Line(OutputLine),
    ReadError(String),
}

/// Handle to a started command
pub struct RunHandle {
    id: ProcessId,
    join: Option<JoinHandle<ProcessStatus>>,
}

impl RunHandle {
    pub fn id(&self) -> ProcessId {
        self.id
    }

    /// Block until the worker has finalized the record
    pub fn wait(mut self) -> ProcessStatus {
        match self.join.take() {
            Some(join) => join.join().unwrap_or(ProcessStatus::Error),
            None => ProcessStatus::Error,
        }
    }
}

pub struct CommandRunner {
    registry: Arc<ProcessRegistry>,
    active: Arc<Mutex<HashMap<ProcessId, Arc<Supervised>>>>,
}

impl CommandRunner {
    pub fn new(registry: Arc<ProcessRegistry>) -> Self {
        Self {
            registry,
            active: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn registry(&self) -> &Arc<ProcessRegistry> {
        &self.registry
    }

    /// Start `cmd` for the (pending) record `id` on a dedicated worker
    pub fn start(&self, id: ProcessId, cmd: SafeCommand, on_finish: Option<FinishHook>) -> RunHandle {
        let supervised = Arc::new(Supervised::default());
        lock_or_recover(&self.active).insert(id, Arc::clone(&supervised));

        let registry = Arc::clone(&self.registry);
        let active = Arc::clone(&self.active);
        let spawned = std::thread::Builder::new()
            .name(format!("runner-{}", id))
            .spawn(move || {
                let status = supervise(&registry, id, &cmd, &supervised);
                lock_or_recover(&active).remove(&id);
                if let Some(hook) = on_finish {
                    hook(status);
                }
                status
            });

        match spawned {
            Ok(join) => RunHandle {
                id,
                join: Some(join),
            },
            Err(e) => {
                lock_or_recover(&self.active).remove(&id);
                self.registry.finish(
                    id,
                    ProcessStatus::Error,
                    None,
                    vec![OutputLine::status(format!("failed to start worker: {}", e))],
                );
                RunHandle { id, join: None }
            }
        }
    }

    /// Request cooperative termination.
    ///
    /// Returns false if the process is unknown or had already exited, in
    /// which case its natural status stands.
    pub fn cancel(&self, id: ProcessId) -> bool {
        let Some(supervised) = lock_or_recover(&self.active).get(&id).cloned() else {
            return false;
        };

        {
            let mut slot = lock_or_recover(&supervised.child);
            if let Some(child) = slot.as_mut()
                && matches!(child.try_wait(), Ok(Some(_)))
            {
                return false;
            }
            supervised.cancelled.store(true, Ordering::SeqCst);
        }

        // Flag the record before the kill so it is set by the time the
        // worker finalizes
        self.registry.mark_cancel_requested(id);
        tracing::info!(%id, "cancellation requested");

        let mut slot = lock_or_recover(&supervised.child);
        if let Some(child) = slot.as_mut()
            && let Err(e) = child.kill()
        {
            tracing::debug!(%id, error = %e, "kill after cancel failed");
        }
        true
    }

    pub fn is_active(&self, id: ProcessId) -> bool {
        lock_or_recover(&self.active).contains_key(&id)
    }

    pub fn active_count(&self) -> usize {
        lock_or_recover(&self.active).len()
    }
}

/// Worker body: spawn, stream, reap, finalize
fn supervise(
    registry: &ProcessRegistry,
    id: ProcessId,
    cmd: &SafeCommand,
    supervised: &Supervised,
) -> ProcessStatus {
    registry.set_status(id, ProcessStatus::Running);
    tracing::debug!(%id, command = %cmd.display, "spawning");

    let spawned = Command::new(&cmd.program)
        .args(&cmd.args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn();

    let mut child = match spawned {
        Ok(child) => child,
        Err(source) => {
            let err = ShelfError::Spawn {
                program: cmd.program.clone(),
                source,
            };
            tracing::warn!(%id, error = %err, "spawn failed");
            // A cancel that raced the spawn still wins
            let status = if supervised.cancelled.load(Ordering::SeqCst) {
                ProcessStatus::Cancelled
            } else {
                ProcessStatus::Error
            };
            registry.finish(id, status, None, vec![OutputLine::status(err.to_string())]);
            return status;
        }
    };

    let (tx, rx) = mpsc::channel::<StreamItem>();
    if let Some(stdout) = child.stdout.take() {
        spawn_reader(stdout, OutputLineType::Stdout, tx.clone());
    }
    if let Some(stderr) = child.stderr.take() {
        spawn_reader(stderr, OutputLineType::Stderr, tx.clone());
    }
    drop(tx);

    {
        let mut slot = lock_or_recover(&supervised.child);
        if supervised.cancelled.load(Ordering::SeqCst) {
            let _ = child.kill();
        }
        *slot = Some(child);
    }

    let mut forwarded = 0usize;
    let mut stderr_lines: Vec<String> = Vec::new();
    let mut read_error: Option<String> = None;
    let mut reaped: Option<std::io::Result<ExitStatus>> = None;

    loop {
        match rx.recv_timeout(POLL_INTERVAL) {
            Ok(StreamItem::Line(line)) => {
                if line.line_type == OutputLineType::Stderr {
                    stderr_lines.push(line.content.clone());
                }
                if supervised.cancelled.load(Ordering::SeqCst) {
                    continue;
                }
                registry.append_line(id, line);
                forwarded += 1;
            }
            Ok(StreamItem::ReadError(message)) => {
                read_error.get_or_insert(message);
            }
            Err(RecvTimeoutError::Timeout) => {
                // Once cancelled and reaped, don't wait on pipes that
                // grandchildren may still hold open
                if supervised.cancelled.load(Ordering::SeqCst)
                    && let Some(result) = try_reap(supervised)
                {
                    reaped = Some(result);
                    break;
                }
            }
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    let exit = reaped.unwrap_or_else(|| wait_for_exit(supervised));
    let cancelled = supervised.cancelled.load(Ordering::SeqCst);

    let (status, exit_code, trailing) = classify_exit(
        exit,
        cancelled,
        forwarded,
        read_error,
        &stderr_lines,
    );

    registry.finish(id, status, exit_code, trailing);
    tracing::info!(%id, %status, ?exit_code, "process finished");
    status
}

fn spawn_reader<R>(pipe: R, line_type: OutputLineType, tx: Sender<StreamItem>)
where
    R: Read + Send + 'static,
{
    std::thread::spawn(move || {
        let mut reader = BufReader::new(pipe);
        let mut buf = Vec::new();
        loop {
            buf.clear();
            let item = match reader.read_until(b'\n', &mut buf) {
                Ok(0) => break,
                Ok(_) => StreamItem::Line(OutputLine {
                    line_type,
                    content: decode_line(&buf),
                }),
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => {
                    let _ = tx.send(StreamItem::ReadError(format!("failed to read output: {}", e)));
                    break;
                }
            };
            if tx.send(item).is_err() {
                break;
            }
        }
    });
}

/// One raw output line as text. Invalid UTF-8 is replaced rather than
/// rejected; build logs are not guaranteed to be UTF-8.
fn decode_line(raw: &[u8]) -> String {
    let raw = raw.strip_suffix(b"\n").unwrap_or(raw);
    let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
    String::from_utf8_lossy(raw).into_owned()
}

/// Terminal status, exit code and trailing log lines for a reaped process.
///
/// A cancel request wins over any exit status. A read error only turns an
/// otherwise finished process into `Error` when nothing was forwarded.
fn classify_exit(
    exit: std::io::Result<ExitStatus>,
    cancelled: bool,
    forwarded: usize,
    read_error: Option<String>,
    stderr_lines: &[String],
) -> (ProcessStatus, Option<i32>, Vec<OutputLine>) {
    match exit {
        _ if cancelled => (
            ProcessStatus::Cancelled,
            None,
            vec![OutputLine::status("cancelled")],
        ),
        Err(e) => (
            ProcessStatus::Error,
            None,
            vec![OutputLine::status(format!("failed to wait for process: {}", e))],
        ),
        Ok(_) if forwarded == 0 && read_error.is_some() => (
            ProcessStatus::Error,
            None,
            vec![OutputLine::status(read_error.unwrap_or_default())],
        ),
        Ok(exit) if exit.success() => (ProcessStatus::Completed, Some(0), Vec::new()),
        Ok(exit) => {
            let mut trailing = vec![OutputLine::status(exit_label(&exit))];
            trailing.extend(stderr_summary(stderr_lines).into_iter().map(OutputLine::stderr));
            (ProcessStatus::Failed, exit.code(), trailing)
        }
    }
}

fn try_reap(supervised: &Supervised) -> Option<std::io::Result<ExitStatus>> {
    let mut slot = lock_or_recover(&supervised.child);
    match slot.as_mut()?.try_wait() {
        Ok(Some(status)) => Some(Ok(status)),
        Ok(None) => None,
        Err(e) => Some(Err(e)),
    }
}

/// Poll for exit without holding the child lock across a blocking wait, so
/// `cancel` can always reach `kill`
fn wait_for_exit(supervised: &Supervised) -> std::io::Result<ExitStatus> {
    loop {
        if let Some(result) = try_reap(supervised) {
            return result;
        }
        if lock_or_recover(&supervised.child).is_none() {
            return Err(std::io::Error::other("process handle missing"));
        }
        std::thread::sleep(POLL_INTERVAL);
    }
}

fn exit_label(status: &ExitStatus) -> String {
    if let Some(code) = status.code() {
        return format!("exited with code {}", code);
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return format!("terminated by signal {}", signal);
        }
    }
    "exited abnormally".to_string()
}

/// Pick the stderr lines worth showing for a failure: the last lines that
/// look like errors, or the tail of stderr when none do
pub fn stderr_summary(lines: &[String]) -> Vec<String> {
    let error_lines: Vec<&String> = lines
        .iter()
        .filter(|line| {
            let lower = line.to_lowercase();
            lower.contains("error")
                || lower.contains("failed")
                || lower.contains("cannot")
                || lower.contains("could not")
        })
        .collect();

    let (source, keep): (Vec<&String>, usize) = if error_lines.is_empty() {
        (lines.iter().collect(), STDERR_TAIL_LINES)
    } else {
        (error_lines, ERROR_SUMMARY_LINES)
    };

    let skip = source.len().saturating_sub(keep);
    source.into_iter().skip(skip).cloned().collect()
}
