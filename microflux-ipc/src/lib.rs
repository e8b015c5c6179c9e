#![warn(missing_docs)]
//! microflux IPC Protocol
//!
//! Versioned lifecycle messages between the supervisor and its fork
//! children, framed with a magic/version header and serialized with rkyv.

mod descriptor;
mod framing;
mod messages;

pub use descriptor::{BenchmarkDescriptor, BlackholeMode, DescriptorError, IterationSpec};
pub use framing::{
    FRAME_MAGIC, FrameError, FrameReader, FrameWriter, HEADER_LEN, MAX_FRAME_SIZE, read_frame,
    write_frame,
};
pub use messages::{FailureKind, ForkSpec, SupervisorCommand, WorkerCapabilities, WorkerMessage};

/// Protocol version carried in every frame header
pub const PROTOCOL_VERSION: u16 = 1;

/// Environment variable naming the child's `read,write` descriptors
pub const IPC_FD_ENV: &str = "MICROFLUX_IPC_FD";
