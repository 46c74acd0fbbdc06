//! Host instrumentation engine interface
//!
//! The engine that rewrites code and calls back into the tracer is external.
//! These traits describe the capabilities the tracer needs from it: static
//! queries about each instruction and routine, attaching callbacks at
//! instrumentation points, and a driver that runs the program.

use crate::tracer::MemTracer;
use crate::Result;
use std::sync::Arc;

/// Identifier of the thread executing an instrumented instruction
pub type ThreadId = u32;

/// Where an instruction-level callback runs relative to the instruction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InsertPoint {
    /// Before the instruction executes
    Before,
    /// On the fall-through path after the instruction executes
    After,
    /// On the taken-branch path of the instruction
    TakenBranch,
}

/// Where a routine-level callback runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RoutinePoint {
    Entry,
    Exit,
}

/// Runtime values available to an analysis callback for one dynamic execution
///
/// Fields that do not apply to the instruction are zero.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AccessContext {
    pub thread: ThreadId,
    /// Effective address of the first memory read operand
    pub read_ea: u64,
    /// Effective address of the second memory read operand
    pub read2_ea: u64,
    pub read_size: u32,
    /// Effective address of the memory write operand
    pub write_ea: u64,
    pub write_size: u32,
}

/// Callback attached to an instruction
pub type AnalysisFn = Arc<dyn Fn(&AccessContext) + Send + Sync>;

/// Callback attached to a routine boundary
pub type RoutineFn = Arc<dyn Fn(ThreadId) + Send + Sync>;

/// A static instruction as presented at instrumentation time
pub trait InstructionSite {
    fn is_stack_read(&self) -> bool;
    fn is_stack_write(&self) -> bool;
    /// Plain single or double load, or single store addressing
    fn is_standard_memop(&self) -> bool;
    fn is_memory_read(&self) -> bool;
    fn has_memory_read2(&self) -> bool;
    fn is_memory_write(&self) -> bool;
    fn is_valid_for_after(&self) -> bool;
    fn is_valid_for_taken_branch(&self) -> bool;

    /// Attach a callback that fires only when the instruction's predicate holds
    fn insert_predicated_call(&mut self, point: InsertPoint, callback: AnalysisFn);

    /// Attach a callback that fires whenever the point is reached
    fn insert_call(&mut self, point: InsertPoint, callback: AnalysisFn);
}

/// A routine as presented at instrumentation time
pub trait RoutineSite {
    fn name(&self) -> &str;

    fn insert_call(&mut self, point: RoutinePoint, callback: RoutineFn);
}

/// Driver that instruments and runs a program
pub trait HostEngine {
    /// Offer every routine and every instruction to `tool` exactly once, run
    /// the program to completion, then finalize `tool` with the exit code.
    fn run(&mut self, tool: &MemTracer) -> Result<i32>;
}
