//! Memory access tracer
//!
//! [`MemTracer`] owns the activation counter and the output sink. Each
//! instrumented store owns its own pending-write slots. A host engine offers it
//! every routine and instruction once, then the callbacks it attached run
//! inline with the program.

use crate::activation::ActivationTracker;
use crate::config::TracerConfig;
use crate::deferral::PendingWrites;
use crate::emit::{TraceRecord, TraceSink};
use crate::error::TracerError;
use crate::host::{InstructionSite, RoutinePoint, RoutineSite, ThreadId};
use crate::policy::{self, SkipReason};
use crate::target::TargetSet;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

/// State shared by every attached callback
#[derive(Debug)]
pub(crate) struct TraceState {
    activation: ActivationTracker,
    sink: TraceSink,
}

impl TraceState {
    /// Record a memory reference if tracing is active
    ///
    /// Sizes above `i32::MAX` are clamped to it.
    pub(crate) fn record_mem(&self, addr: u64, size: u32) {
        if self.activation.is_active() {
            let size = i32::try_from(size).unwrap_or(i32::MAX);
            self.sink.emit(TraceRecord::mem_ref(addr, size));
        }
    }

    /// Emit the write parked in `pending` for `thread`, if any
    pub(crate) fn flush_write(&self, pending: &PendingWrites, thread: ThreadId) {
        if let Some((addr, size)) = pending.take(thread) {
            self.record_mem(addr, size);
        }
    }
}

/// Counters describing a tracing run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TraceStats {
    pub records_written: u64,
    pub write_failures: u64,
    pub instructions_instrumented: u64,
    pub skipped_stack: u64,
    pub skipped_non_standard: u64,
    pub routines_matched: u64,
}

#[derive(Debug, Default)]
struct InstrumentCounters {
    instrumented: AtomicU64,
    skipped_stack: AtomicU64,
    skipped_non_standard: AtomicU64,
    routines_matched: AtomicU64,
}

/// Memory access tracer scoped to target routines
#[derive(Debug)]
pub struct MemTracer {
    state: Arc<TraceState>,
    targets: TargetSet,
    counters: InstrumentCounters,
    finished: AtomicBool,
}

impl MemTracer {
    /// Build a tracer from configuration, creating the output file(s)
    ///
    /// Fails if the output cannot be created.
    pub fn from_config(config: &TracerConfig) -> Result<Self, TracerError> {
        let sink = TraceSink::create(&config.output, config.debug_output.as_deref())?;
        tracing::info!(
            "Tracing memory accesses to {} for targets {:?}",
            config.output.display(),
            config.targets
        );
        Ok(Self::with_sink(config.target_set(), sink))
    }

    /// Build a tracer writing to an existing sink
    pub fn with_sink(targets: TargetSet, sink: TraceSink) -> Self {
        if targets.is_empty() {
            tracing::warn!("No target routines configured; the trace will be empty");
        }
        Self {
            state: Arc::new(TraceState {
                activation: ActivationTracker::new(),
                sink,
            }),
            targets,
            counters: InstrumentCounters::default(),
            finished: AtomicBool::new(false),
        }
    }

    /// Instrumentation hook for a routine
    ///
    /// Target routines get an entry callback that activates tracing and an
    /// exit callback that deactivates it.
    pub fn instrument_routine(&self, rtn: &mut dyn RoutineSite) {
        if !self.targets.is_target(rtn.name()) {
            return;
        }
        tracing::debug!("Instrumenting target routine {}", rtn.name());
        self.counters.routines_matched.fetch_add(1, Ordering::Relaxed);

        let entry = Arc::clone(&self.state);
        rtn.insert_call(RoutinePoint::Entry, Arc::new(move |_| entry.activation.activate()));
        let exit = Arc::clone(&self.state);
        rtn.insert_call(RoutinePoint::Exit, Arc::new(move |_| exit.activation.deactivate()));
    }

    /// Instrumentation hook for an instruction
    pub fn instrument_instruction(&self, ins: &mut dyn InstructionSite) {
        match policy::plan(ins) {
            Ok(plan) => {
                policy::attach(ins, plan, &self.state);
                self.counters.instrumented.fetch_add(1, Ordering::Relaxed);
            }
            Err(SkipReason::StackAccess) => {
                self.counters.skipped_stack.fetch_add(1, Ordering::Relaxed);
            }
            Err(SkipReason::NonStandard) => {
                self.counters.skipped_non_standard.fetch_add(1, Ordering::Relaxed);
            }
            Err(SkipReason::NoMemoryAccess) => {}
        }
    }

    /// Whether tracing is currently active
    pub fn is_active(&self) -> bool {
        self.state.activation.is_active()
    }

    pub fn targets(&self) -> &TargetSet {
        &self.targets
    }

    pub fn stats(&self) -> TraceStats {
        TraceStats {
            records_written: self.state.sink.records_written(),
            write_failures: self.state.sink.write_failures(),
            instructions_instrumented: self.counters.instrumented.load(Ordering::Relaxed),
            skipped_stack: self.counters.skipped_stack.load(Ordering::Relaxed),
            skipped_non_standard: self.counters.skipped_non_standard.load(Ordering::Relaxed),
            routines_matched: self.counters.routines_matched.load(Ordering::Relaxed),
        }
    }

    /// Process-exit hook: flush and close the trace
    ///
    /// Must be called once. Reports an error if the final flush failed or if
    /// any record was lost while tracing; the file is closed either way.
    pub fn finish(&self, exit_code: i32) -> Result<TraceStats, TracerError> {
        if self.finished.swap(true, Ordering::SeqCst) {
            return Err(TracerError::AlreadyFinished);
        }
        self.state.sink.close()?;

        let stats = self.stats();
        tracing::info!(
            "Program exited with code {}, {} trace records written",
            exit_code,
            stats.records_written
        );
        tracing::debug!("Trace stats: {:?}", stats);

        if stats.write_failures > 0 {
            return Err(TracerError::DroppedRecords {
                failed: stats.write_failures,
            });
        }
        Ok(stats)
    }
}
