//! The coverage tracer: a `revm::Inspector` that replaces the teacher's
//! hand-rolled `Middleware<VS, I, S>` (`on_step`/`on_insert`/`on_return`,
//! `evm/middlewares/middleware.rs`) with the same three-hook shape —
//! per-opcode, per-insert (frame start), per-return (frame end) — retargeted
//! from the teacher's raw-PC-set `Coverage` struct
//! (`evm/middlewares/coverage.rs`) onto the 64-bit marker scheme in
//! [`crate::coverage`].
//!
//! One `CoverageTracer` is attached per worker chain and reused across many
//! transactions; `take_coverage` drains one transaction's worth of markers
//! while keeping the per-address lookup-hash cache warm across calls, since
//! bytecode at a given address does not change within one worker's lifetime
//! unless that worker redeploys.

use std::collections::HashMap;

use primitive_types::{H160, H256};
use revm::interpreter::opcode::{JUMP, JUMPI};
use revm::interpreter::{CallInputs, CreateInputs, Gas, InstructionResult, Interpreter};
use revm::{Database, EVMData, Inspector};

use crate::artifacts::ArtifactSet;
use crate::coverage::{marker, CoverageMap};

fn is_revert_result(ret: InstructionResult) -> bool {
    !matches!(
        ret,
        InstructionResult::Continue
            | InstructionResult::Stop
            | InstructionResult::Return
            | InstructionResult::SelfDestruct
    )
}

/// Which of the two hash-cache partitions (§4.2) a frame belongs to. Init
/// bytecode and runtime bytecode hash to their lookup key differently, so a
/// contract's constructor frame and its deployed-code frames never collide
/// in the cache even when the underlying bytes happen to coincide.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum FrameKind {
    Create,
    Runtime,
}

struct Frame {
    address: H160,
    lookup_hash: H256,
    entered: bool,
    pending_jump_source: Option<u32>,
    last_pc: u32,
    map: CoverageMap,
    marked_exit: bool,
}

impl Frame {
    fn new(address: H160, lookup_hash: H256) -> Self {
        Self {
            address,
            lookup_hash,
            entered: false,
            pending_jump_source: None,
            last_pc: 0,
            map: CoverageMap::new(),
            marked_exit: false,
        }
    }
}

pub struct CoverageTracer {
    frames: Vec<Frame>,
    /// `call()`/`create()` push the kind of the message about to execute;
    /// `initialize_interp` peeks (never pops) to tag the frame it creates,
    /// since a precompile or EOA target fires `call()`/`call_end()` with no
    /// interpreter loop in between. `call_end`/`create_end` pop once the
    /// message is fully done, keeping this stack balanced with the EVM's
    /// own call stack even when it runs deeper than `frames` does.
    pending_kind: Vec<FrameKind>,
    lookup_hash_cache: HashMap<(H160, FrameKind), H256>,
}

impl CoverageTracer {
    pub fn new() -> Self {
        Self {
            frames: Vec::new(),
            pending_kind: Vec::new(),
            lookup_hash_cache: HashMap::new(),
        }
    }

    /// Drains the frames accumulated since the last call (one transaction's
    /// worth), merges them bottom-up, and applies `revert_all` if the
    /// top-level call did not complete successfully. Leaves the lookup-hash
    /// cache untouched.
    pub fn take_coverage(&mut self, top_level_reverted: bool) -> CoverageMap {
        let mut result = CoverageMap::new();
        while let Some(frame) = self.frames.pop() {
            result.update(&frame.map);
        }
        if top_level_reverted {
            result.revert_all();
        }
        result
    }

    fn lookup_hash_for(&mut self, address: H160, code: &[u8], kind: FrameKind) -> H256 {
        *self
            .lookup_hash_cache
            .entry((address, kind))
            .or_insert_with(|| {
                let digest = match kind {
                    FrameKind::Create => ArtifactSet::create_lookup_hash(code),
                    FrameKind::Runtime => ArtifactSet::bytecode_lookup_hash(code)
                        .unwrap_or_else(|_| ArtifactSet::create_lookup_hash(code)),
                };
                H256::from_slice(&digest)
            })
    }

    fn current_frame_mut(&mut self) -> Option<&mut Frame> {
        self.frames.last_mut()
    }

    /// Emits the revert/return marker for the current frame's exit point.
    /// Called from `call_end`/`create_end` rather than `step()`, since an
    /// abnormal halt (`OutOfGas`, `InvalidFEOpcode`, a precompile failure,
    /// ...) never executes a `REVERT`/`RETURN`/`STOP` opcode and so would
    /// leave a `step()`-only implementation with no exit marker at all.
    fn mark_exit(&mut self, reverted: bool) {
        let Some(frame) = self.frames.last_mut() else {
            return;
        };
        if frame.marked_exit {
            return;
        }
        frame.marked_exit = true;
        let pc = frame.last_pc;
        let marker = if reverted {
            marker::revert_marker(pc)
        } else {
            marker::return_marker(pc)
        };
        let (address, lookup_hash) = (frame.address, frame.lookup_hash);
        frame.map.update_at(address, lookup_hash, marker);
    }

    fn pop_and_merge(&mut self, reverted: bool) {
        self.mark_exit(reverted);
        let Some(mut finished) = self.frames.pop() else {
            return;
        };
        if reverted {
            finished.map.revert_all();
        }
        if let Some(parent) = self.frames.last_mut() {
            parent.map.update(&finished.map);
        } else {
            self.frames.push(finished);
        }
    }
}

impl Default for CoverageTracer {
    fn default() -> Self {
        Self::new()
    }
}

impl<DB: Database> Inspector<DB> for CoverageTracer {
    fn call(
        &mut self,
        _data: &mut EVMData<'_, DB>,
        _inputs: &mut CallInputs,
    ) -> (InstructionResult, Gas, bytes::Bytes) {
        self.pending_kind.push(FrameKind::Runtime);
        (InstructionResult::Continue, Gas::new(0), bytes::Bytes::new())
    }

    fn create(
        &mut self,
        _data: &mut EVMData<'_, DB>,
        _inputs: &mut CreateInputs,
    ) -> (InstructionResult, Option<revm::primitives::B160>, Gas, bytes::Bytes) {
        self.pending_kind.push(FrameKind::Create);
        (InstructionResult::Continue, None, Gas::new(0), bytes::Bytes::new())
    }

    fn initialize_interp(&mut self, interp: &mut Interpreter, _data: &mut EVMData<'_, DB>) {
        let code = interp.contract.bytecode.original_bytecode_slice();
        if code.is_empty() {
            // Precompiles and EOAs execute no interpreter loop worth tracking.
            return;
        }
        // The message that triggered this interpreter loop pushed its kind
        // in `call`/`create` just before; peek, don't pop, since that push
        // isn't popped until the matching `call_end`/`create_end`.
        let kind = self.pending_kind.last().copied().unwrap_or(FrameKind::Runtime);
        let address = H160::from_slice(interp.contract.address.as_bytes());
        let lookup_hash = self.lookup_hash_for(address, code, kind);
        self.frames.push(Frame::new(address, lookup_hash));
    }

    fn step(&mut self, interp: &mut Interpreter, _data: &mut EVMData<'_, DB>) {
        let pc = interp.program_counter() as u32;
        let opcode = interp.current_opcode();

        let Some(frame) = self.current_frame_mut() else {
            return;
        };
        let (address, lookup_hash) = (frame.address, frame.lookup_hash);
        frame.last_pc = pc;

        if !frame.entered {
            frame.entered = true;
            frame
                .map
                .update_at(address, lookup_hash, marker::frame_entry_marker(pc));
        }

        if let Some(source_pc) = frame.pending_jump_source.take() {
            frame
                .map
                .update_at(address, lookup_hash, marker::jump_edge(source_pc, pc));
        }

        if matches!(opcode, JUMP | JUMPI) {
            frame.pending_jump_source = Some(pc);
        }
    }

    fn call_end(
        &mut self,
        _data: &mut EVMData<'_, DB>,
        _inputs: &CallInputs,
        remaining_gas: Gas,
        ret: InstructionResult,
        out: bytes::Bytes,
    ) -> (InstructionResult, Gas, bytes::Bytes) {
        self.pending_kind.pop();
        self.pop_and_merge(is_revert_result(ret));
        (ret, remaining_gas, out)
    }

    fn create_end(
        &mut self,
        _data: &mut EVMData<'_, DB>,
        _inputs: &CreateInputs,
        ret: InstructionResult,
        address: Option<revm::primitives::B160>,
        remaining_gas: Gas,
        out: bytes::Bytes,
    ) -> (InstructionResult, Option<revm::primitives::B160>, Gas, bytes::Bytes) {
        self.pending_kind.pop();
        self.pop_and_merge(is_revert_result(ret));
        (ret, address, remaining_gas, out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_tracer_yields_empty_coverage() {
        let mut tracer = CoverageTracer::new();
        let cov = tracer.take_coverage(false);
        assert!(cov.is_empty());
    }

    #[test]
    fn revert_result_classification() {
        assert!(!is_revert_result(InstructionResult::Continue));
        assert!(!is_revert_result(InstructionResult::Return));
        assert!(is_revert_result(InstructionResult::Revert));
        assert!(is_revert_result(InstructionResult::OutOfGas));
    }
}
