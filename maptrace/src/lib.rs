//! maptrace - Memory access tracing scoped to target functions
//!
//! This crate records every memory read and write a program performs while
//! one of a configured set of target routines is on the call stack,
//! including accesses made by anything those routines call.
//!
//! # Overview
//!
//! The tracer plugs into a host instrumentation engine (see [`host`]):
//!
//! * Target routines get entry/exit callbacks that move an activation counter
//! * Every instruction is classified once; stack traffic and non-standard
//!   memory operands are never instrumented
//! * Loads are recorded before they execute, predicated on the load actually
//!   happening
//! * Stores park their address before execution and are recorded from the
//!   fall-through or taken-branch exit, once the store has completed
//!
//! Each record is 12 bytes: a tagged 64-bit address ([`tag`]) followed by a
//! signed 32-bit size, in native byte order.
//!
//! # Usage
//!
//! ```no_run
//! use maptrace::sim::{Execution, InstructionDesc, Op, SimEngine, SimProgram};
//! use maptrace::{HostEngine, MemTracer, TracerConfig};
//!
//! let mut program = SimProgram::new("main");
//! let load = program.instruction(InstructionDesc::load());
//! program
//!     .routine("main", vec![Op::call("target")])
//!     .routine("target", vec![Op::Exec(load, Execution::read(0x1000, 4))]);
//!
//! let config = TracerConfig::new().with_target("target");
//! let tracer = MemTracer::from_config(&config).unwrap();
//! SimEngine::new(program).run(&tracer).unwrap();
//! ```
//!
//! # Limitations
//!
//! * The activation counter is process-wide: while any thread is inside a
//!   target routine, accesses from every thread are recorded.
//! * Allocator event kinds are reserved in the tag encoding but never emitted.

pub mod activation;
pub mod config;
pub mod deferral;
pub mod emit;
pub mod error;
pub mod host;
pub mod policy;
pub mod sim;
pub mod tag;
pub mod target;
pub mod tracer;

pub use activation::ActivationTracker;
pub use config::TracerConfig;
pub use deferral::{PendingWrites, WriteState};
pub use emit::{TraceReader, TraceRecord, TraceSink, RECORD_SIZE};
pub use error::TracerError;
pub use host::{AccessContext, HostEngine, InsertPoint, InstructionSite, RoutinePoint, RoutineSite, ThreadId};
pub use tag::{tag, untag, EventKind, TaggedAddress};
pub use target::TargetSet;
pub use tracer::{MemTracer, TraceStats};

/// Result type for tracer operations
pub type Result<T> = anyhow::Result<T>;
