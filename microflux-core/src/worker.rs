//! Fork Child Entry Point
//!
//! Handles the worker side of the supervisor/fork architecture.
//!
//! On Unix, uses fd 3/4 for IPC (set via `MICROFLUX_IPC_FD`) and installs
//! a SIGTERM handler for graceful shutdown. On non-Unix, falls back to
//! stdin/stdout and skips signal handling.

use crate::registry::find_benchmark;
use crate::scheduler::panic_message;
use crate::{BenchmarkRunner, OutputSink};
use microflux_ipc::{
    BenchmarkDescriptor, FailureKind, ForkSpec, FrameError, FrameReader, FrameWriter,
    IPC_FD_ENV, SupervisorCommand, WorkerCapabilities, WorkerMessage,
};
use microflux_results::{IterationParams, IterationResult, RunResult};
use std::io::{Read, Write};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info, warn};

#[cfg(unix)]
use std::os::unix::io::FromRawFd;

/// Global flag set by SIGTERM handler to request graceful shutdown.
static SHUTDOWN_REQUESTED: AtomicBool = AtomicBool::new(false);

/// Check if a graceful shutdown has been requested via SIGTERM.
pub fn shutdown_requested() -> bool {
    SHUTDOWN_REQUESTED.load(Ordering::Relaxed)
}

/// Install a SIGTERM handler that sets the `SHUTDOWN_REQUESTED` flag.
/// The handler is async-signal-safe (only sets an atomic).
#[cfg(unix)]
fn install_sigterm_handler() {
    unsafe {
        let mut sa: libc::sigaction = std::mem::zeroed();
        sa.sa_sigaction = sigterm_handler as *const () as usize;
        sa.sa_flags = libc::SA_RESTART;
        libc::sigemptyset(&mut sa.sa_mask);
        libc::sigaction(libc::SIGTERM, &sa, std::ptr::null_mut());
    }
}

#[cfg(unix)]
extern "C" fn sigterm_handler(_sig: libc::c_int) {
    SHUTDOWN_REQUESTED.store(true, Ordering::Relaxed);
}

#[cfg(not(unix))]
fn install_sigterm_handler() {}

enum IpcTransport {
    #[cfg(unix)]
    Fds { read_fd: i32, write_fd: i32 },
    Stdio,
}

fn detect_transport() -> IpcTransport {
    #[cfg(unix)]
    if let Ok(val) = std::env::var(IPC_FD_ENV) {
        if let Some((r, w)) = val.split_once(',') {
            if let (Ok(read_fd), Ok(write_fd)) = (r.parse::<i32>(), w.parse::<i32>()) {
                return IpcTransport::Fds { read_fd, write_fd };
            }
        }
        warn!("invalid {IPC_FD_ENV}={val:?} (expected <read_fd>,<write_fd>), falling back to stdio");
    }
    IpcTransport::Stdio
}

/// Forwards every lifecycle callback to the supervisor as a [`WorkerMessage`]
pub struct ChannelSink<'a, W: Write> {
    writer: &'a mut FrameWriter<W>,
    error: Option<FrameError>,
}

impl<'a, W: Write> ChannelSink<'a, W> {
    /// Sink writing to `writer`
    pub fn new(writer: &'a mut FrameWriter<W>) -> Self {
        Self {
            writer,
            error: None,
        }
    }

    /// First write error, if any
    pub fn finish(self) -> Result<(), FrameError> {
        match self.error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn send(&mut self, message: WorkerMessage) {
        if self.error.is_some() {
            return;
        }
        if let Err(e) = self.writer.write(&message) {
            self.error = Some(e);
        }
    }
}

impl<W: Write> OutputSink for ChannelSink<'_, W> {
    fn benchmark_start(&mut self, descriptor: &BenchmarkDescriptor) {
        self.send(WorkerMessage::BenchmarkStart {
            descriptor: descriptor.clone(),
        });
    }

    fn iteration_start(&mut self, params: &IterationParams, index: u32) {
        self.send(WorkerMessage::IterationStart {
            params: *params,
            index,
        });
    }

    fn iteration_result(&mut self, params: &IterationParams, index: u32, result: &IterationResult) {
        self.send(WorkerMessage::IterationResult {
            params: *params,
            index,
            result: result.clone(),
        });
    }

    fn exception(&mut self, _benchmark: &str, kind: FailureKind, message: &str) {
        let backtrace = std::backtrace::Backtrace::capture();
        let backtrace = match backtrace.status() {
            std::backtrace::BacktraceStatus::Captured => Some(backtrace.to_string()),
            _ => None,
        };
        self.send(WorkerMessage::Exception {
            kind,
            message: message.to_string(),
            backtrace,
        });
    }

    fn benchmark_end(&mut self, _benchmark: &str, completed: bool) {
        self.send(WorkerMessage::BenchmarkEnd { completed });
    }

    fn run_end(&mut self, _results: &[RunResult]) {}
}

/// Fork child main loop
pub struct WorkerMain<R: Read = Box<dyn Read>, W: Write = Box<dyn Write>> {
    reader: FrameReader<R>,
    writer: FrameWriter<W>,
}

impl WorkerMain {
    /// Create a new worker, using fd 3/4 if `MICROFLUX_IPC_FD` is set, otherwise stdin/stdout.
    pub fn new() -> Self {
        match detect_transport() {
            #[cfg(unix)]
            IpcTransport::Fds { read_fd, write_fd } => {
                let read_file = unsafe { std::fs::File::from_raw_fd(read_fd) };
                let write_file = unsafe { std::fs::File::from_raw_fd(write_fd) };
                Self::with_io(
                    Box::new(read_file) as Box<dyn Read>,
                    Box::new(write_file) as Box<dyn Write>,
                )
            }
            IpcTransport::Stdio => Self::with_io(
                Box::new(std::io::stdin()) as Box<dyn Read>,
                Box::new(std::io::stdout()) as Box<dyn Write>,
            ),
        }
    }
}

impl Default for WorkerMain {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: Read, W: Write> WorkerMain<R, W> {
    /// Worker over explicit streams
    pub fn with_io(reader: R, writer: W) -> Self {
        Self {
            reader: FrameReader::new(reader),
            writer: FrameWriter::new(writer),
        }
    }

    /// Run the worker main loop until `Shutdown`, end of stream or SIGTERM
    pub fn run(&mut self) -> Result<(), FrameError> {
        install_sigterm_handler();

        self.writer
            .write(&WorkerMessage::Hello(WorkerCapabilities::default()))?;

        loop {
            if shutdown_requested() {
                info!("shutdown requested, exiting worker");
                break;
            }

            let command: SupervisorCommand = match self.reader.read() {
                Ok(command) => command,
                Err(FrameError::EndOfStream) => break,
                Err(e) => return Err(e),
            };

            match command {
                SupervisorCommand::Run { descriptor, fork } => {
                    self.run_benchmark(descriptor, fork)?;
                }
                SupervisorCommand::Shutdown => break,
                SupervisorCommand::Ping => {}
            }
        }

        Ok(())
    }

    fn run_benchmark(
        &mut self,
        descriptor: BenchmarkDescriptor,
        fork: ForkSpec,
    ) -> Result<(), FrameError> {
        debug!(benchmark = %descriptor.name, fork = fork.index, warmup = fork.warmup, "run");
        let name = descriptor.name.clone();

        let Some(def) = find_benchmark(&name) else {
            self.writer.write(&WorkerMessage::Exception {
                kind: FailureKind::Unknown,
                message: format!("Benchmark not found: {name}"),
                backtrace: None,
            })?;
            return self
                .writer
                .write(&WorkerMessage::BenchmarkEnd { completed: false });
        };

        let mut sink = ChannelSink::new(&mut self.writer);
        let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
            let payload: Arc<dyn crate::Payload> = Arc::from((def.payload)());
            match BenchmarkRunner::new(descriptor, payload) {
                Ok(runner) => {
                    let _ = runner.with_fork(fork.index).run(&mut sink);
                }
                Err(e) => {
                    sink.exception(&name, e.kind(), &e.to_string());
                    sink.benchmark_end(&name, false);
                }
            }
        }));
        if let Err(panic) = outcome {
            let message = panic_message(panic.as_ref());
            sink.exception(&name, FailureKind::Panic, &message);
            sink.benchmark_end(&name, false);
        }
        sink.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Overrides, resolve_descriptor};
    use microflux_results::IterationType;
    use std::io::Cursor;

    fn commands(descriptor: BenchmarkDescriptor) -> Vec<u8> {
        let mut buffer = Vec::new();
        {
            let mut writer = FrameWriter::new(&mut buffer);
            writer
                .write(&SupervisorCommand::Run {
                    descriptor,
                    fork: ForkSpec {
                        index: 1,
                        count: 1,
                        warmup: false,
                    },
                })
                .unwrap();
            writer.write(&SupervisorCommand::Shutdown).unwrap();
        }
        buffer
    }

    fn replies(output: Vec<u8>) -> Vec<WorkerMessage> {
        let mut reader = FrameReader::new(Cursor::new(output));
        let mut messages = Vec::new();
        loop {
            match reader.read::<WorkerMessage>() {
                Ok(m) => messages.push(m),
                Err(FrameError::EndOfStream) => break,
                Err(e) => panic!("bad frame: {e}"),
            }
        }
        messages
    }

    fn short(name: &str) -> BenchmarkDescriptor {
        resolve_descriptor(
            name,
            &[Overrides {
                warmup_iterations: Some(1),
                warmup_time_ns: Some(5_000_000),
                measurement_iterations: Some(2),
                measurement_time_ns: Some(5_000_000),
                threads: Some(1),
                ..Overrides::NONE
            }],
        )
    }

    #[test]
    fn test_worker_streams_lifecycle() {
        let mut output = Vec::new();
        WorkerMain::with_io(
            Cursor::new(commands(short("registry_tests.registered"))),
            &mut output,
        )
        .run()
        .unwrap();

        let messages = replies(output);
        assert!(matches!(messages[0], WorkerMessage::Hello(_)));
        assert!(matches!(messages[1], WorkerMessage::BenchmarkStart { .. }));
        let measured = messages
            .iter()
            .filter(|m| {
                matches!(m, WorkerMessage::IterationResult { params, .. }
                    if params.kind == IterationType::Measurement)
            })
            .count();
        assert_eq!(measured, 2);
        assert_eq!(
            messages.last(),
            Some(&WorkerMessage::BenchmarkEnd { completed: true })
        );
    }

    #[test]
    fn test_worker_unknown_benchmark() {
        let mut output = Vec::new();
        WorkerMain::with_io(Cursor::new(commands(short("nope.missing"))), &mut output)
            .run()
            .unwrap();
        let messages = replies(output);
        assert!(matches!(
            messages[1],
            WorkerMessage::Exception {
                kind: FailureKind::Unknown,
                ..
            }
        ));
        assert_eq!(
            messages[2],
            WorkerMessage::BenchmarkEnd { completed: false }
        );
    }

    #[test]
    fn test_worker_reports_invalid_descriptor() {
        let mut d = short("registry_tests.registered");
        d.thread_groups = vec![0];
        let mut output = Vec::new();
        WorkerMain::with_io(Cursor::new(commands(d)), &mut output)
            .run()
            .unwrap();
        let messages = replies(output);
        assert!(messages.iter().any(|m| matches!(
            m,
            WorkerMessage::Exception {
                kind: FailureKind::Configuration,
                ..
            }
        )));
        assert_eq!(
            messages.last(),
            Some(&WorkerMessage::BenchmarkEnd { completed: false })
        );
    }
}
