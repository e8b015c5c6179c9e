//! Fork Supervisor
//!
//! Runs each fork of a benchmark in a fresh child process and relays its
//! lifecycle messages to the local output sink.
//!
//! [`ForkHandle`] owns the process and the pipes; [`ForkSession`] is the
//! message state machine, independent of any process so it can be driven
//! from in-memory frames.

use microflux_core::OutputSink;
use microflux_ipc::{
    BenchmarkDescriptor, FailureKind, ForkSpec, FrameError, FrameReader, FrameWriter,
    IPC_FD_ENV, PROTOCOL_VERSION, SupervisorCommand, WorkerCapabilities, WorkerMessage,
};
use microflux_results::{BenchmarkResult, IterationType};
use std::env;
use std::os::unix::io::{FromRawFd, RawFd};
use std::os::unix::process::CommandExt;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, info, warn};

/// Hidden flag that turns the benchmark binary into a fork child
pub const WORKER_FLAG: &str = "--microflux-worker";

/// Default time allowed between spawn and the `Hello` handshake
pub const DEFAULT_HELLO_TIMEOUT: Duration = Duration::from_secs(30);

/// Time a fork may keep reporting after SIGTERM
const DRAIN_TIMEOUT: Duration = Duration::from_millis(500);

#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("Failed to spawn fork: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("IPC error: {0}")]
    Ipc(#[from] FrameError),

    #[error("Fork crashed: {0}")]
    ForkCrashed(String),

    #[error("Fork timed out after {0:?}")]
    Timeout(Duration),

    #[error("Worker protocol error: expected {expected}, got {got}")]
    Protocol { expected: String, got: String },

    #[error("Benchmark failed ({kind}): {message}")]
    Benchmark { kind: FailureKind, message: String },
}

impl SupervisorError {
    /// Failure category for reporting
    pub fn kind(&self) -> FailureKind {
        match self {
            SupervisorError::Benchmark { kind, .. } => *kind,
            SupervisorError::Timeout(_) => FailureKind::Timeout,
            _ => FailureKind::Unknown,
        }
    }
}

/// Whether the session expects more messages
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStep {
    /// Keep reading
    Continue,
    /// `BenchmarkEnd` arrived
    Finished,
}

/// Supervisor side of one fork's message stream
///
/// Every lifecycle message is forwarded to the sink; measurement iteration
/// results are also captured into this fork's [`BenchmarkResult`].
pub struct ForkSession<'s> {
    benchmark: String,
    fork: ForkSpec,
    sink: &'s mut dyn OutputSink,
    result: BenchmarkResult,
    failure: Option<(FailureKind, String)>,
    completed: Option<bool>,
}

impl<'s> ForkSession<'s> {
    /// Session for `fork` of `benchmark`, forwarding to `sink`
    pub fn new(benchmark: impl Into<String>, fork: ForkSpec, sink: &'s mut dyn OutputSink) -> Self {
        let benchmark = benchmark.into();
        Self {
            result: BenchmarkResult::new(benchmark.clone(), fork.index),
            benchmark,
            fork,
            sink,
            failure: None,
            completed: None,
        }
    }

    /// Whether `BenchmarkEnd` was received
    pub fn is_finished(&self) -> bool {
        self.completed.is_some()
    }

    /// Process one message from the fork
    pub fn handle(&mut self, message: WorkerMessage) -> Result<SessionStep, SupervisorError> {
        if self.is_finished() {
            return Err(SupervisorError::Protocol {
                expected: "end of stream".to_string(),
                got: message_name(&message).to_string(),
            });
        }

        match message {
            WorkerMessage::Hello(_) => {
                return Err(SupervisorError::Protocol {
                    expected: "lifecycle message".to_string(),
                    got: "Hello".to_string(),
                });
            }
            WorkerMessage::BenchmarkStart { descriptor } => {
                debug!(benchmark = %descriptor.name, fork = self.fork.index, "fork started benchmark");
                self.sink.benchmark_start(&descriptor);
            }
            WorkerMessage::IterationStart { params, index } => {
                self.sink.iteration_start(&params, index);
            }
            WorkerMessage::IterationResult {
                params,
                index,
                result,
            } => {
                self.sink.iteration_result(&params, index, &result);
                if params.kind == IterationType::Measurement && !self.fork.warmup {
                    self.result
                        .push(result)
                        .map_err(|e| SupervisorError::Protocol {
                            expected: "sealed measurement iteration".to_string(),
                            got: e.to_string(),
                        })?;
                }
            }
            WorkerMessage::Exception {
                kind,
                message,
                backtrace,
            } => {
                if let Some(backtrace) = backtrace {
                    debug!(benchmark = %self.benchmark, "fork backtrace:\n{backtrace}");
                }
                self.sink.exception(&self.benchmark, kind, &message);
                self.failure.get_or_insert((kind, message));
            }
            WorkerMessage::BenchmarkEnd { completed } => {
                self.sink.benchmark_end(&self.benchmark, completed);
                self.completed = Some(completed);
                return Ok(SessionStep::Finished);
            }
            WorkerMessage::Log { message } => {
                info!(benchmark = %self.benchmark, fork = self.fork.index, "{message}");
            }
        }
        Ok(SessionStep::Continue)
    }

    /// This fork's result, once the fork ended normally
    ///
    /// A fork that reported an exception, ended incomplete, or never sent
    /// `BenchmarkEnd` yields an error; its partial result is discarded.
    pub fn finish(self) -> Result<BenchmarkResult, SupervisorError> {
        match (self.completed, self.failure) {
            (Some(_), Some((kind, message))) => Err(SupervisorError::Benchmark { kind, message }),
            (Some(true), None) => Ok(self.result),
            (Some(false), None) => Err(SupervisorError::Benchmark {
                kind: FailureKind::Unknown,
                message: "benchmark ended incomplete".to_string(),
            }),
            (None, _) => Err(SupervisorError::ForkCrashed(
                "channel closed before the benchmark ended".to_string(),
            )),
        }
    }

    /// Close the session after a transport-level failure
    ///
    /// Reports the failure to the sink unless the fork already ended the
    /// benchmark itself, then returns `error`.
    pub fn abort(mut self, error: SupervisorError) -> SupervisorError {
        if self.completed.is_none() {
            warn!(benchmark = %self.benchmark, fork = self.fork.index, "fork failed: {error}");
            self.sink
                .exception(&self.benchmark, error.kind(), &error.to_string());
            self.sink.benchmark_end(&self.benchmark, false);
        }
        error
    }
}

fn message_name(message: &WorkerMessage) -> &'static str {
    match message {
        WorkerMessage::Hello(_) => "Hello",
        WorkerMessage::BenchmarkStart { .. } => "BenchmarkStart",
        WorkerMessage::IterationStart { .. } => "IterationStart",
        WorkerMessage::IterationResult { .. } => "IterationResult",
        WorkerMessage::Exception { .. } => "Exception",
        WorkerMessage::BenchmarkEnd { .. } => "BenchmarkEnd",
        WorkerMessage::Log { .. } => "Log",
    }
}

/// Result of polling for data
#[derive(Debug)]
enum PollResult {
    DataAvailable,
    Timeout,
    PipeClosed,
    Error(std::io::Error),
}

/// Wait for data to be available on a file descriptor with timeout
fn wait_for_data(fd: RawFd, timeout: Duration) -> PollResult {
    let mut pollfd = libc::pollfd {
        fd,
        events: libc::POLLIN,
        revents: 0,
    };
    let timeout_ms = timeout.as_millis().min(i32::MAX as u128) as i32;

    let result = unsafe { libc::poll(&mut pollfd, 1, timeout_ms) };

    if result < 0 {
        let err = std::io::Error::last_os_error();
        if err.kind() == std::io::ErrorKind::Interrupted {
            PollResult::Timeout
        } else {
            PollResult::Error(err)
        }
    } else if result == 0 {
        PollResult::Timeout
    } else if pollfd.revents & libc::POLLIN != 0 {
        // Readable data wins over a hang-up: drain it first
        PollResult::DataAvailable
    } else if pollfd.revents & (libc::POLLERR | libc::POLLHUP | libc::POLLNVAL) != 0 {
        PollResult::PipeClosed
    } else {
        PollResult::Timeout
    }
}

/// Create a pipe pair, returning (read_fd, write_fd).
fn create_pipe() -> Result<(RawFd, RawFd), std::io::Error> {
    let mut fds = [0 as RawFd; 2];
    let ret = unsafe { libc::pipe(fds.as_mut_ptr()) };
    if ret != 0 {
        return Err(std::io::Error::last_os_error());
    }
    for &fd in &fds {
        unsafe {
            let flags = libc::fcntl(fd, libc::F_GETFD);
            libc::fcntl(fd, libc::F_SETFD, flags | libc::FD_CLOEXEC);
        }
    }
    Ok((fds[0], fds[1]))
}

fn close_fd(fd: RawFd) {
    unsafe {
        libc::close(fd);
    }
}

fn send_sigterm(pid: u32) -> Result<(), std::io::Error> {
    let ret = unsafe { libc::kill(pid as libc::pid_t, libc::SIGTERM) };
    if ret == -1 {
        Err(std::io::Error::last_os_error())
    } else {
        Ok(())
    }
}

/// One live fork child process
pub struct ForkHandle {
    child: Child,
    reader: FrameReader<std::fs::File>,
    writer: FrameWriter<std::fs::File>,
    capabilities: WorkerCapabilities,
    msg_read_fd: RawFd,
}

impl ForkHandle {
    /// Re-spawn the current executable as a fork child
    pub fn spawn(hello_timeout: Duration) -> Result<Self, SupervisorError> {
        let binary = env::current_exe()?;
        Self::spawn_binary(&binary, hello_timeout)
    }

    /// Spawn `binary` as a fork child, using fd 3/4 for IPC
    ///
    /// Fails with [`SupervisorError::Timeout`] when the child does not say
    /// `Hello` within `hello_timeout`; the child is then terminated.
    pub fn spawn_binary(binary: &Path, hello_timeout: Duration) -> Result<Self, SupervisorError> {
        // cmd pipe: supervisor writes, child reads on fd 3
        let (cmd_read, cmd_write) = create_pipe()?;
        // msg pipe: child writes on fd 4, supervisor reads
        let (msg_read, msg_write) = match create_pipe() {
            Ok(fds) => fds,
            Err(e) => {
                close_fd(cmd_read);
                close_fd(cmd_write);
                return Err(SupervisorError::Spawn(e));
            }
        };

        let mut command = Command::new(binary);
        command
            .arg(WORKER_FLAG)
            .env(IPC_FD_ENV, "3,4")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::inherit());

        unsafe {
            command.pre_exec(move || {
                if cmd_read != 3 {
                    libc::dup2(cmd_read, 3);
                    libc::close(cmd_read);
                }
                let flags = libc::fcntl(3, libc::F_GETFD);
                libc::fcntl(3, libc::F_SETFD, flags & !libc::FD_CLOEXEC);

                if msg_write != 4 {
                    libc::dup2(msg_write, 4);
                    libc::close(msg_write);
                }
                let flags = libc::fcntl(4, libc::F_GETFD);
                libc::fcntl(4, libc::F_SETFD, flags & !libc::FD_CLOEXEC);

                libc::close(cmd_write);
                libc::close(msg_read);

                Ok(())
            });
        }

        let child = match command.spawn() {
            Ok(c) => c,
            Err(e) => {
                close_fd(cmd_read);
                close_fd(cmd_write);
                close_fd(msg_read);
                close_fd(msg_write);
                return Err(SupervisorError::Spawn(e));
            }
        };

        close_fd(cmd_read);
        close_fd(msg_write);

        let writer_file = unsafe { std::fs::File::from_raw_fd(cmd_write) };
        let reader_file = unsafe { std::fs::File::from_raw_fd(msg_read) };

        let mut handle = Self {
            child,
            reader: FrameReader::new(reader_file),
            writer: FrameWriter::new(writer_file),
            capabilities: WorkerCapabilities::default(),
            msg_read_fd: msg_read,
        };
        handle.capabilities = handle.wait_for_hello(hello_timeout)?;
        debug!(
            pid = handle.capabilities.pid,
            cpus = handle.capabilities.cpu_count,
            "fork child ready"
        );
        Ok(handle)
    }

    /// Wait for Hello message from the child and validate protocol version
    fn wait_for_hello(&mut self, timeout: Duration) -> Result<WorkerCapabilities, SupervisorError> {
        let deadline = Instant::now() + timeout;
        let Some(msg) = self.next_message(deadline)? else {
            warn!(pid = self.child.id(), ?timeout, "fork never completed the handshake");
            return Err(SupervisorError::Timeout(timeout));
        };

        match msg {
            WorkerMessage::Hello(caps) => {
                if caps.protocol_version != PROTOCOL_VERSION {
                    return Err(SupervisorError::Protocol {
                        expected: format!("protocol version {PROTOCOL_VERSION}"),
                        got: format!("protocol version {}", caps.protocol_version),
                    });
                }
                Ok(caps)
            }
            other => Err(SupervisorError::Protocol {
                expected: "Hello".to_string(),
                got: message_name(&other).to_string(),
            }),
        }
    }

    /// Capabilities reported by the child
    pub fn capabilities(&self) -> &WorkerCapabilities {
        &self.capabilities
    }

    /// Next message, or `None` once `deadline` passes
    ///
    /// End of stream maps to [`SupervisorError::ForkCrashed`].
    fn next_message(&mut self, deadline: Instant) -> Result<Option<WorkerMessage>, SupervisorError> {
        loop {
            if !self.reader.has_buffered_data() {
                let remaining = deadline.saturating_duration_since(Instant::now());
                if remaining.is_zero() {
                    return Ok(None);
                }
                match wait_for_data(self.msg_read_fd, remaining.min(Duration::from_millis(100))) {
                    PollResult::DataAvailable => {}
                    PollResult::Timeout => continue,
                    PollResult::PipeClosed => {
                        return Err(SupervisorError::ForkCrashed(self.exit_description()));
                    }
                    PollResult::Error(e) => return Err(SupervisorError::Spawn(e)),
                }
            }

            return match self.reader.read::<WorkerMessage>() {
                Ok(msg) => Ok(Some(msg)),
                Err(FrameError::EndOfStream) => {
                    Err(SupervisorError::ForkCrashed(self.exit_description()))
                }
                Err(e) => Err(SupervisorError::Ipc(e)),
            };
        }
    }

    fn exit_description(&mut self) -> String {
        match self.child.try_wait() {
            Ok(Some(status)) => format!("channel closed, child exited with {status}"),
            _ => "channel closed unexpectedly".to_string(),
        }
    }

    /// Run one fork of `descriptor` in this child, relaying to `sink`
    ///
    /// A fork still running after `timeout` is terminated.
    pub fn run(
        &mut self,
        descriptor: &BenchmarkDescriptor,
        fork: ForkSpec,
        timeout: Duration,
        sink: &mut dyn OutputSink,
    ) -> Result<BenchmarkResult, SupervisorError> {
        self.writer.write(&SupervisorCommand::Run {
            descriptor: descriptor.clone(),
            fork,
        })?;

        let mut session = ForkSession::new(descriptor.name.clone(), fork, sink);
        let deadline = Instant::now() + timeout;

        loop {
            let msg = match self.next_message(deadline) {
                Ok(Some(msg)) => msg,
                Ok(None) => return Err(self.handle_timeout(session, timeout)),
                Err(e) => return Err(session.abort(e)),
            };
            match session.handle(msg) {
                Ok(SessionStep::Continue) => {}
                Ok(SessionStep::Finished) => return session.finish(),
                Err(e) => return Err(session.abort(e)),
            }
        }
    }

    /// Send SIGTERM, drain remaining messages for a short window, then SIGKILL.
    fn handle_timeout(&mut self, mut session: ForkSession<'_>, timeout: Duration) -> SupervisorError {
        warn!(pid = self.child.id(), ?timeout, "fork timed out, terminating");
        let _ = send_sigterm(self.child.id());

        let drain_deadline = Instant::now() + DRAIN_TIMEOUT;
        while let Ok(Some(msg)) = self.next_message(drain_deadline) {
            match session.handle(msg) {
                Ok(SessionStep::Continue) => {}
                _ => break,
            }
        }

        if self.is_alive() {
            let _ = self.child.kill();
            let _ = self.child.wait();
        }

        session.abort(SupervisorError::Timeout(timeout))
    }

    /// Shutdown the child gracefully
    pub fn shutdown(mut self) -> Result<(), SupervisorError> {
        self.writer.write(&SupervisorCommand::Shutdown)?;
        let _ = self.child.wait();
        Ok(())
    }

    /// Check if the child process is still running
    pub fn is_alive(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }

    /// Kill the child process forcefully
    pub fn kill(&mut self) -> Result<(), SupervisorError> {
        self.child.kill()?;
        let _ = self.child.wait();
        Ok(())
    }
}

impl Drop for ForkHandle {
    fn drop(&mut self) {
        if self.is_alive() {
            let _ = send_sigterm(self.child.id());
            std::thread::sleep(Duration::from_millis(50));
            if self.is_alive() {
                let _ = self.child.kill();
            }
            let _ = self.child.wait();
        }
    }
}

/// Runs forks, one fresh child process per fork
#[derive(Debug, Clone)]
pub struct Supervisor {
    binary: Option<PathBuf>,
    hello_timeout: Duration,
    fork_timeout: Option<Duration>,
}

impl Supervisor {
    /// Supervisor re-spawning the current executable
    pub fn new() -> Self {
        Self {
            binary: None,
            hello_timeout: DEFAULT_HELLO_TIMEOUT,
            fork_timeout: None,
        }
    }

    /// Supervisor spawning `binary` instead
    pub fn with_binary(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: Some(binary.into()),
            ..Self::new()
        }
    }

    /// Time a child gets to complete the handshake
    pub fn with_hello_timeout(mut self, timeout: Duration) -> Self {
        self.hello_timeout = timeout;
        self
    }

    /// Fixed wall-time limit per fork, replacing the one derived from the
    /// descriptor's iteration timeout
    pub fn with_fork_timeout(mut self, timeout: Duration) -> Self {
        self.fork_timeout = Some(timeout);
        self
    }

    /// Wall-time limit for one fork of `descriptor`
    pub fn fork_timeout(&self, descriptor: &BenchmarkDescriptor) -> Duration {
        self.fork_timeout
            .unwrap_or_else(|| Duration::from_nanos(descriptor.fork_timeout_ns()))
    }

    /// Run `fork` of `descriptor` in a new child and shut the child down
    pub fn run_fork(
        &self,
        descriptor: &BenchmarkDescriptor,
        fork: ForkSpec,
        sink: &mut dyn OutputSink,
    ) -> Result<BenchmarkResult, SupervisorError> {
        info!(
            benchmark = %descriptor.name,
            fork = fork.index,
            of = fork.count,
            warmup = fork.warmup,
            "starting fork"
        );
        let mut handle = match &self.binary {
            Some(binary) => ForkHandle::spawn_binary(binary, self.hello_timeout),
            None => ForkHandle::spawn(self.hello_timeout),
        }
        .map_err(|e| {
            sink.exception(&descriptor.name, e.kind(), &e.to_string());
            sink.benchmark_end(&descriptor.name, false);
            e
        })?;

        let result = handle.run(descriptor, fork, self.fork_timeout(descriptor), sink);
        if result.is_ok() {
            let _ = handle.shutdown();
        }
        result
    }
}

impl Default for Supervisor {
    fn default() -> Self {
        Self::new()
    }
}
