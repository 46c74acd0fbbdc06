//! Instruction instrumentation policy
//!
//! Decided once per static instruction at instrumentation time. The
//! resulting [`InstrumentationPlan`] says which callbacks to attach; the
//! callbacks themselves check activation at run time.

use crate::deferral::PendingWrites;
use crate::host::{AnalysisFn, InsertPoint, InstructionSite};
use crate::tracer::TraceState;
use serde::Serialize;
use std::sync::Arc;

/// Why an instruction was left uninstrumented
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SkipReason {
    /// Reads or writes the call stack
    StackAccess,
    /// Memory operand shape other than plain load/store addressing
    NonStandard,
    /// Touches no memory
    NoMemoryAccess,
}

/// Callbacks to attach for a store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct WritePlan {
    /// Flush on the fall-through path
    pub after: bool,
    /// Flush on the taken-branch path
    pub taken_branch: bool,
}

/// Callbacks to attach for one instruction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct InstrumentationPlan {
    pub read: bool,
    pub read2: bool,
    pub write: Option<WritePlan>,
}

/// Decide how to instrument `ins`
pub fn plan(ins: &dyn InstructionSite) -> Result<InstrumentationPlan, SkipReason> {
    if ins.is_stack_read() || ins.is_stack_write() {
        return Err(SkipReason::StackAccess);
    }
    if !ins.is_standard_memop() {
        return Err(SkipReason::NonStandard);
    }

    let plan = InstrumentationPlan {
        read: ins.is_memory_read(),
        read2: ins.has_memory_read2(),
        write: ins.is_memory_write().then(|| WritePlan {
            after: ins.is_valid_for_after(),
            taken_branch: ins.is_valid_for_taken_branch(),
        }),
    };

    if !plan.read && !plan.read2 && plan.write.is_none() {
        return Err(SkipReason::NoMemoryAccess);
    }
    Ok(plan)
}

/// Attach the callbacks described by `plan` to `ins`
pub(crate) fn attach(ins: &mut dyn InstructionSite, plan: InstrumentationPlan, state: &Arc<TraceState>) {
    // Loads use predicated calls: they fire iff the load actually executes.
    if plan.read {
        let state = Arc::clone(state);
        let callback: AnalysisFn = Arc::new(move |ctx| state.record_mem(ctx.read_ea, ctx.read_size));
        ins.insert_predicated_call(InsertPoint::Before, callback);
    }

    if plan.read2 {
        let state = Arc::clone(state);
        let callback: AnalysisFn = Arc::new(move |ctx| state.record_mem(ctx.read2_ea, ctx.read_size));
        ins.insert_predicated_call(InsertPoint::Before, callback);
    }

    let Some(write) = plan.write else {
        return;
    };

    // Slots belong to this store only. Every dynamic instance starts idle, so
    // a flush after a predicate-false capture finds nothing to emit.
    let pending = Arc::new(PendingWrites::new());

    let reset = Arc::clone(&pending);
    let callback: AnalysisFn = Arc::new(move |ctx| {
        reset.take(ctx.thread);
    });
    ins.insert_call(InsertPoint::Before, callback);

    let capture = Arc::clone(&pending);
    let callback: AnalysisFn =
        Arc::new(move |ctx| capture.capture(ctx.thread, ctx.write_ea, ctx.write_size));
    ins.insert_predicated_call(InsertPoint::Before, callback);

    if !write.after && !write.taken_branch {
        tracing::debug!("Store has no post-execution point; its writes are never flushed");
    }

    let flush_points = [
        (write.after, InsertPoint::After),
        (write.taken_branch, InsertPoint::TakenBranch),
    ];
    for (_, point) in flush_points.into_iter().filter(|(valid, _)| *valid) {
        let flush = Arc::clone(state);
        let pending = Arc::clone(&pending);
        let callback: AnalysisFn = Arc::new(move |ctx| flush.flush_write(&pending, ctx.thread));
        ins.insert_call(point, callback);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::InstructionDesc;

    #[test]
    fn test_stack_accesses_are_skipped() {
        let push = InstructionDesc::store().stack();
        assert_eq!(plan(&push.site()), Err(SkipReason::StackAccess));

        let pop = InstructionDesc::load().stack();
        assert_eq!(plan(&pop.site()), Err(SkipReason::StackAccess));
    }

    #[test]
    fn test_non_standard_memops_are_skipped() {
        let gather = InstructionDesc::load().non_standard();
        assert_eq!(plan(&gather.site()), Err(SkipReason::NonStandard));
    }

    #[test]
    fn test_register_only_instruction_is_skipped() {
        assert_eq!(plan(&InstructionDesc::alu().site()), Err(SkipReason::NoMemoryAccess));
    }

    #[test]
    fn test_load_plan() {
        let plan = plan(&InstructionDesc::load().site()).unwrap();
        assert!(plan.read);
        assert!(!plan.read2);
        assert_eq!(plan.write, None);
    }

    #[test]
    fn test_double_load_plan() {
        let plan = plan(&InstructionDesc::double_load().site()).unwrap();
        assert!(plan.read && plan.read2);
    }

    #[test]
    fn test_store_flush_points() {
        let plan = plan(&InstructionDesc::store().site()).unwrap();
        assert_eq!(plan.write, Some(WritePlan { after: true, taken_branch: false }));

        let branchy = InstructionDesc::store().branching();
        let plan = super::plan(&branchy.site()).unwrap();
        assert_eq!(plan.write, Some(WritePlan { after: true, taken_branch: true }));
    }

    #[test]
    fn test_read_modify_write_plan() {
        let plan = plan(&InstructionDesc::read_modify_write().site()).unwrap();
        assert!(plan.read);
        assert!(plan.write.is_some());
    }
}
