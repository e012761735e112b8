//! Encoder subprocess layer: argument construction, stderr capture,
//! and per-stream process supervision.

pub mod args;
pub mod process;
pub mod stderr;

pub use args::{build_encoder_args, BrokerSourceTarget, EncoderInput};
pub use process::{EncoderExit, EncoderProcess, SpawnParams, STARTUP_WINDOW};
pub use stderr::{StderrRing, STDERR_RING_CAPACITY};
