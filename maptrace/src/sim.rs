//! Scripted host engine
//!
//! A deterministic stand-in for a binary instrumentation engine. Programs are
//! described as routines whose bodies execute instructions with explicit
//! dynamic outcomes (effective addresses, predicate truth, branch direction)
//! or call other routines. The engine instruments every routine and
//! instruction once, then replays the script, invoking the attached
//! callbacks the way a real engine would.

use crate::host::{
    AccessContext, AnalysisFn, HostEngine, InsertPoint, InstructionSite, RoutineFn, RoutinePoint,
    RoutineSite, ThreadId,
};
use crate::tracer::MemTracer;
use crate::Result;
use anyhow::{anyhow, bail};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::io::Write;
use std::sync::Arc;

/// Deepest call nesting the engine will replay
pub const MAX_CALL_DEPTH: usize = 1024;

/// Static attributes of a simulated instruction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct InstructionDesc {
    pub stack_read: bool,
    pub stack_write: bool,
    pub standard_memop: bool,
    pub memory_read: bool,
    pub memory_read2: bool,
    pub memory_write: bool,
    pub valid_after: bool,
    pub valid_taken_branch: bool,
}

impl InstructionDesc {
    /// Instruction that touches no memory
    pub fn alu() -> Self {
        Self {
            standard_memop: true,
            valid_after: true,
            ..Self::default()
        }
    }

    pub fn load() -> Self {
        Self {
            memory_read: true,
            ..Self::alu()
        }
    }

    /// Load with two independent memory read operands
    pub fn double_load() -> Self {
        Self {
            memory_read2: true,
            ..Self::load()
        }
    }

    pub fn store() -> Self {
        Self {
            memory_write: true,
            ..Self::alu()
        }
    }

    pub fn read_modify_write() -> Self {
        Self {
            memory_read: true,
            ..Self::store()
        }
    }

    /// Mark the memory operands as stack accesses
    pub fn stack(mut self) -> Self {
        self.stack_read = self.memory_read;
        self.stack_write = self.memory_write;
        self
    }

    pub fn non_standard(mut self) -> Self {
        self.standard_memop = false;
        self
    }

    /// Allow a taken-branch exit in addition to fall-through
    pub fn branching(mut self) -> Self {
        self.valid_taken_branch = true;
        self
    }

    /// Only a taken-branch exit, no fall-through
    pub fn branch_only(mut self) -> Self {
        self.valid_after = false;
        self.valid_taken_branch = true;
        self
    }

    /// Fresh instrumentation site for this instruction
    pub fn site(&self) -> SimInstruction {
        SimInstruction {
            desc: *self,
            callbacks: Vec::new(),
        }
    }
}

/// A callback attached to a simulated instruction
#[derive(Clone)]
pub struct AttachedCall {
    pub point: InsertPoint,
    pub predicated: bool,
    pub callback: AnalysisFn,
}

impl std::fmt::Debug for AttachedCall {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AttachedCall")
            .field("point", &self.point)
            .field("predicated", &self.predicated)
            .finish()
    }
}

/// Instrumentation site for a simulated instruction
#[derive(Debug, Clone)]
pub struct SimInstruction {
    desc: InstructionDesc,
    callbacks: Vec<AttachedCall>,
}

impl SimInstruction {
    pub fn callbacks(&self) -> &[AttachedCall] {
        &self.callbacks
    }

    /// Run one dynamic instance of the instruction
    fn execute(&self, exec: &Execution, thread: ThreadId) {
        let ctx = AccessContext {
            thread,
            read_ea: exec.read_ea,
            read2_ea: exec.read2_ea,
            read_size: exec.read_size,
            write_ea: exec.write_ea,
            write_size: exec.write_size,
        };

        self.fire(InsertPoint::Before, exec.predicate, &ctx);
        if exec.branch_taken {
            self.fire(InsertPoint::TakenBranch, exec.predicate, &ctx);
        } else {
            self.fire(InsertPoint::After, exec.predicate, &ctx);
        }
    }

    fn fire(&self, point: InsertPoint, predicate: bool, ctx: &AccessContext) {
        self.callbacks
            .iter()
            .filter(|call| call.point == point && (predicate || !call.predicated))
            .for_each(|call| (call.callback)(ctx));
    }
}

impl InstructionSite for SimInstruction {
    fn is_stack_read(&self) -> bool {
        self.desc.stack_read
    }

    fn is_stack_write(&self) -> bool {
        self.desc.stack_write
    }

    fn is_standard_memop(&self) -> bool {
        self.desc.standard_memop
    }

    fn is_memory_read(&self) -> bool {
        self.desc.memory_read
    }

    fn has_memory_read2(&self) -> bool {
        self.desc.memory_read2
    }

    fn is_memory_write(&self) -> bool {
        self.desc.memory_write
    }

    fn is_valid_for_after(&self) -> bool {
        self.desc.valid_after
    }

    fn is_valid_for_taken_branch(&self) -> bool {
        self.desc.valid_taken_branch
    }

    fn insert_predicated_call(&mut self, point: InsertPoint, callback: AnalysisFn) {
        self.callbacks.push(AttachedCall {
            point,
            predicated: true,
            callback,
        });
    }

    fn insert_call(&mut self, point: InsertPoint, callback: AnalysisFn) {
        self.callbacks.push(AttachedCall {
            point,
            predicated: false,
            callback,
        });
    }
}

/// Instrumentation site for a simulated routine
pub struct SimRoutine {
    name: String,
    entry: Vec<RoutineFn>,
    exit: Vec<RoutineFn>,
}

impl SimRoutine {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            entry: Vec::new(),
            exit: Vec::new(),
        }
    }

    fn fire(&self, point: RoutinePoint, thread: ThreadId) {
        let callbacks = match point {
            RoutinePoint::Entry => &self.entry,
            RoutinePoint::Exit => &self.exit,
        };
        callbacks.iter().for_each(|callback| callback(thread));
    }
}

impl RoutineSite for SimRoutine {
    fn name(&self) -> &str {
        &self.name
    }

    fn insert_call(&mut self, point: RoutinePoint, callback: RoutineFn) {
        match point {
            RoutinePoint::Entry => self.entry.push(callback),
            RoutinePoint::Exit => self.exit.push(callback),
        }
    }
}

/// Dynamic outcome of one instruction execution
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Execution {
    pub read_ea: u64,
    pub read2_ea: u64,
    pub read_size: u32,
    pub write_ea: u64,
    pub write_size: u32,
    /// Whether the instruction's predicate held
    pub predicate: bool,
    /// Whether control left through the taken-branch exit
    pub branch_taken: bool,
}

impl Default for Execution {
    fn default() -> Self {
        Self {
            read_ea: 0,
            read2_ea: 0,
            read_size: 0,
            write_ea: 0,
            write_size: 0,
            predicate: true,
            branch_taken: false,
        }
    }
}

impl Execution {
    pub fn read(addr: u64, size: u32) -> Self {
        Self {
            read_ea: addr,
            read_size: size,
            ..Self::default()
        }
    }

    pub fn read2(addr: u64, addr2: u64, size: u32) -> Self {
        Self {
            read2_ea: addr2,
            ..Self::read(addr, size)
        }
    }

    pub fn write(addr: u64, size: u32) -> Self {
        Self {
            write_ea: addr,
            write_size: size,
            ..Self::default()
        }
    }

    /// Instruction that touches no memory
    pub fn plain() -> Self {
        Self::default()
    }

    /// Mark the predicate false for this execution
    pub fn predicated_off(mut self) -> Self {
        self.predicate = false;
        self
    }

    pub fn taken(mut self) -> Self {
        self.branch_taken = true;
        self
    }
}

/// Index of an instruction within a [`SimProgram`]
pub type InsId = usize;

/// One step of a routine body
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Op {
    /// Execute an instruction
    Exec(InsId, Execution),
    /// Call a routine by name
    Call(String),
    /// Continue on another thread
    Thread(ThreadId),
}

impl Op {
    pub fn call(name: impl Into<String>) -> Self {
        Op::Call(name.into())
    }
}

/// A scripted program
#[derive(Debug, Clone)]
pub struct SimProgram {
    entry: String,
    instructions: Vec<InstructionDesc>,
    routines: BTreeMap<String, Vec<Op>>,
    exit_code: i32,
}

impl SimProgram {
    /// Empty program starting at routine `entry`
    pub fn new(entry: impl Into<String>) -> Self {
        Self {
            entry: entry.into(),
            instructions: Vec::new(),
            routines: BTreeMap::new(),
            exit_code: 0,
        }
    }

    /// Add a static instruction and return its id
    pub fn instruction(&mut self, desc: InstructionDesc) -> InsId {
        self.instructions.push(desc);
        self.instructions.len() - 1
    }

    /// Define (or replace) a routine body
    pub fn routine(&mut self, name: impl Into<String>, body: Vec<Op>) -> &mut Self {
        self.routines.insert(name.into(), body);
        self
    }

    pub fn exit_code(&mut self, code: i32) -> &mut Self {
        self.exit_code = code;
        self
    }
}

/// Host engine that replays a [`SimProgram`]
pub struct SimEngine {
    program: SimProgram,
}

struct Instrumented {
    routines: BTreeMap<String, SimRoutine>,
    instructions: Vec<SimInstruction>,
}

impl SimEngine {
    pub fn new(program: SimProgram) -> Self {
        Self { program }
    }

    fn replay(
        &self,
        image: &Instrumented,
        name: &str,
        thread: &mut ThreadId,
        depth: usize,
    ) -> Result<()> {
        if depth >= MAX_CALL_DEPTH {
            bail!("Call depth limit {} exceeded in {}", MAX_CALL_DEPTH, name);
        }
        let body = self
            .program
            .routines
            .get(name)
            .ok_or_else(|| anyhow!("Call to undefined routine {}", name))?;
        let routine = &image.routines[name];

        routine.fire(RoutinePoint::Entry, *thread);
        for op in body {
            match op {
                Op::Exec(id, exec) => {
                    let ins = image
                        .instructions
                        .get(*id)
                        .ok_or_else(|| anyhow!("Unknown instruction {} in {}", id, name))?;
                    ins.execute(exec, *thread);
                }
                Op::Call(callee) => self.replay(image, callee, thread, depth + 1)?,
                Op::Thread(next) => *thread = *next,
            }
        }
        routine.fire(RoutinePoint::Exit, *thread);
        Ok(())
    }
}

impl HostEngine for SimEngine {
    fn run(&mut self, tool: &MemTracer) -> Result<i32> {
        let mut routines = BTreeMap::new();
        for name in self.program.routines.keys() {
            let mut rtn = SimRoutine::new(name.clone());
            tool.instrument_routine(&mut rtn);
            routines.insert(name.clone(), rtn);
        }

        let instructions = self
            .program
            .instructions
            .iter()
            .map(|desc| {
                let mut site = desc.site();
                tool.instrument_instruction(&mut site);
                site
            })
            .collect();

        let image = Instrumented {
            routines,
            instructions,
        };
        tracing::debug!(
            "Replaying {} from {} routines and {} instructions",
            self.program.entry,
            image.routines.len(),
            image.instructions.len()
        );

        let mut thread = 0;
        self.replay(&image, &self.program.entry, &mut thread, 0)?;

        let exit_code = self.program.exit_code;
        tool.finish(exit_code)?;
        Ok(exit_code)
    }
}

/// Clonable in-memory output, for inspecting what a sink wrote
#[derive(Debug, Clone, Default)]
pub struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

impl SharedBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contents(&self) -> Vec<u8> {
        self.0.lock().clone()
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.0.lock()).into_owned()
    }
}

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}
