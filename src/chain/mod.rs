//! The test chain: an in-memory EVM the worker loop drives one block per
//! call-sequence element.
//!
//! Wraps `revm::EVM` over a `CacheDB<EmptyDB>`, analogous to the teacher's
//! `EVMState`/`FuzzHost` pairing (`evm/vm.rs`, `evm/host.rs`), but exposes
//! the block-oriented contract this engine needs instead of the teacher's
//! single-call `GenericVM::execute`: `commit_block`, `revert_to_block_index`,
//! `clone_with_setup`, `attach_tracer`, `deploy`, `call`.

mod convert;

use std::sync::Arc;

use primitive_types::{H160, U256};
use revm::db::{CacheDB, EmptyDB};
use revm::primitives::{
    BlockEnv, Bytecode as RevmBytecode, CreateScheme, ExecutionResult, TransactTo, TxEnv,
};
use revm::EVM;

use crate::error::{ChainError, Result};
use crate::tracer::CoverageTracer;

/// A single low-level call as the chain layer needs it: already
/// ABI-encoded. `Call.data_abi` resolution happens upstream in the sequence
/// generator; by the time a call reaches the chain it is flat bytes.
#[derive(Debug, Clone)]
pub struct ChainCall {
    pub from: H160,
    pub to: Option<H160>,
    pub value: U256,
    pub gas_limit: u64,
    pub data: Vec<u8>,
}

/// A committed block: header plus the transactions packed into it, kept so
/// `clone_with_setup` can deterministically replay chain history.
#[derive(Debug, Clone)]
struct CommittedBlock {
    txs: Vec<ChainCall>,
    number: u64,
    timestamp: u64,
}

/// Outcome of executing one [`ChainCall`].
#[derive(Debug, Clone)]
pub struct CallOutcome {
    pub success: bool,
    pub output: Vec<u8>,
    pub gas_used: u64,
    pub deployed_address: Option<H160>,
    pub revert_data: Option<Vec<u8>>,
}

impl CallOutcome {
    fn from_execution_result(result: &ExecutionResult) -> Self {
        match result {
            ExecutionResult::Success {
                gas_used,
                output,
                ..
            } => CallOutcome {
                success: true,
                output: output.data().to_vec(),
                gas_used: *gas_used,
                deployed_address: output
                    .address()
                    .map(|a| H160::from_slice(a.as_bytes())),
                revert_data: None,
            },
            ExecutionResult::Revert { gas_used, output } => CallOutcome {
                success: false,
                output: Vec::new(),
                gas_used: *gas_used,
                deployed_address: None,
                revert_data: Some(output.to_vec()),
            },
            ExecutionResult::Halt { gas_used, .. } => CallOutcome {
                success: false,
                output: Vec::new(),
                gas_used: *gas_used,
                deployed_address: None,
                revert_data: None,
            },
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Block {
    pub number: u64,
    pub timestamp: u64,
}

pub type ChainDb = CacheDB<EmptyDB>;

pub struct TestChain {
    evm: EVM<ChainDb>,
    committed: Vec<CommittedBlock>,
}

impl TestChain {
    /// A fresh chain at block 0, timestamp 0, backed by an empty in-memory
    /// database.
    pub fn new() -> Self {
        let mut evm = EVM::new();
        evm.database(CacheDB::new(EmptyDB::default()));
        evm.env.block.number = revm::primitives::U256::from(0u64);
        evm.env.block.timestamp = revm::primitives::U256::from(0u64);
        Self {
            evm,
            committed: Vec::new(),
        }
    }

    pub fn head_block_number(&self) -> u64 {
        self.committed.last().map(|b| b.number).unwrap_or(0)
    }

    /// Index of the most recently committed block, i.e. `committed.len() - 1`.
    /// `revert_to_block_index` targets this index space, not block numbers,
    /// since block numbers may advance by more than one per element.
    pub fn head_block_index(&self) -> usize {
        self.committed.len().saturating_sub(1)
    }

    fn advance_block_env(&mut self, number_delay: u64, timestamp_delay: u64) -> Block {
        let number = self.head_block_number() + number_delay;
        let prior_timestamp = self
            .committed
            .last()
            .map(|b| b.timestamp)
            .unwrap_or(0);
        let timestamp = prior_timestamp + timestamp_delay;
        self.evm.env.block = BlockEnv {
            number: revm::primitives::U256::from(number),
            timestamp: revm::primitives::U256::from(timestamp),
            ..self.evm.env.block.clone()
        };
        Block { number, timestamp }
    }

    /// Executes `txs` inside one block whose number/timestamp advance by
    /// `number_delay`/`timestamp_delay` relative to the current head. Each
    /// call sequence element occupies exactly one block (§4.3); `txs` here
    /// is almost always length 1.
    pub fn commit_block(
        &mut self,
        tracer: &mut CoverageTracer,
        txs: &[ChainCall],
        number_delay: u64,
        timestamp_delay: u64,
    ) -> Result<(Block, Vec<CallOutcome>)> {
        let block = self.advance_block_env(number_delay, timestamp_delay);
        let mut outcomes = Vec::with_capacity(txs.len());
        for tx in txs {
            let outcome = self.execute_one(tracer, tx)?;
            outcomes.push(outcome);
        }
        self.committed.push(CommittedBlock {
            txs: txs.to_vec(),
            number: block.number,
            timestamp: block.timestamp,
        });
        Ok((block, outcomes))
    }

    fn execute_one(&mut self, tracer: &mut CoverageTracer, tx: &ChainCall) -> Result<CallOutcome> {
        self.set_tx_env(tx);
        let result = self
            .evm
            .inspect_commit(tracer)
            .map_err(|e| ChainError::Execution(format!("{e:?}")))?;

        Ok(CallOutcome::from_execution_result(&result))
    }

    fn set_tx_env(&mut self, tx: &ChainCall) {
        self.evm.env.tx = TxEnv {
            caller: convert::to_revm_address(tx.from),
            transact_to: match tx.to {
                Some(to) => TransactTo::Call(convert::to_revm_address(to)),
                None => TransactTo::Create(CreateScheme::Create),
            },
            value: convert::to_revm_u256(tx.value),
            data: tx.data.clone().into(),
            gas_limit: tx.gas_limit,
            ..Default::default()
        };
    }

    /// Executes `call` without committing state, for the Property and
    /// Optimization providers' post-sequence static polling (§4.11).
    /// Shares the block/tx environment of the current head but leaves
    /// `self`'s state untouched regardless of the outcome.
    pub fn call_static(&mut self, tracer: &mut CoverageTracer, call: &ChainCall) -> Result<CallOutcome> {
        self.set_tx_env(call);
        let result = self
            .evm
            .inspect(tracer)
            .map_err(|e| ChainError::Execution(format!("{e:?}")))?;
        Ok(CallOutcome::from_execution_result(&result.result))
    }

    /// Deploys `init_code` (already linked and with constructor args
    /// appended) from `from`, packed into its own block with a delay of 1.
    pub fn deploy(
        &mut self,
        tracer: &mut CoverageTracer,
        init_code: Vec<u8>,
        from: H160,
    ) -> Result<H160> {
        let call = ChainCall {
            from,
            to: None,
            value: U256::zero(),
            gas_limit: 30_000_000,
            data: init_code,
        };
        let (_, outcomes) = self.commit_block(tracer, std::slice::from_ref(&call), 1, 1)?;
        let outcome = outcomes.into_iter().next().expect("exactly one tx");
        outcome
            .deployed_address
            .ok_or_else(|| ChainError::DeploymentFailed("<init>".into(), "no address returned".into()).into())
    }

    /// Restores the chain to the state immediately after the block at
    /// `index` by discarding every later committed block and replaying from
    /// scratch. revm has no native "undo" primitive for `CacheDB`, so a full
    /// replay is the only available mechanism (mirrors the teacher's
    /// from-scratch `ContractLoader` reconstruction per worker).
    pub fn revert_to_block_index(&mut self, index: usize) -> Result<()> {
        if index >= self.committed.len() && !(index == 0 && self.committed.is_empty()) {
            return Err(ChainError::NoSuchBlockIndex(index, self.committed.len()).into());
        }
        let keep = self.committed[..=index.min(self.committed.len().saturating_sub(1))].to_vec();
        let keep = if self.committed.is_empty() { Vec::new() } else { keep };
        self.replay_from_scratch(&keep)?;
        self.committed = keep;
        Ok(())
    }

    fn replay_from_scratch(&mut self, blocks: &[CommittedBlock]) -> Result<()> {
        let mut fresh = EVM::new();
        fresh.database(CacheDB::new(EmptyDB::default()));
        self.evm = fresh;
        let mut scratch_tracer = CoverageTracer::new();
        for block in blocks {
            self.evm.env.block.number = revm::primitives::U256::from(block.number);
            self.evm.env.block.timestamp = revm::primitives::U256::from(block.timestamp);
            for tx in &block.txs {
                self.execute_one(&mut scratch_tracer, tx)?;
            }
        }
        Ok(())
    }

    /// Replays `self.committed` into a brand-new chain sharing no state
    /// with `self`, then runs `setup` against it. Used to build per-worker
    /// and per-pruner isolated chains that share post-deployment state.
    pub fn clone_with_setup<F>(&self, setup: F) -> Result<TestChain>
    where
        F: FnOnce(&mut TestChain) -> Result<()>,
    {
        let mut chain = TestChain::new();
        chain.replay_from_scratch(&self.committed)?;
        chain.committed = self.committed.clone();
        setup(&mut chain)?;
        Ok(chain)
    }
}

impl Default for TestChain {
    fn default() -> Self {
        Self::new()
    }
}

// Keep the inspector type visible to downstream code without re-exporting
// all of `revm` from this module.
pub use crate::tracer::CoverageTracer as ChainTracer;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_chain_starts_at_block_zero() {
        let chain = TestChain::new();
        assert_eq!(chain.head_block_number(), 0);
        assert_eq!(chain.head_block_index(), 0);
    }

    #[test]
    fn revert_to_out_of_range_index_errors() {
        let mut chain = TestChain::new();
        assert!(chain.revert_to_block_index(5).is_err());
    }
}
