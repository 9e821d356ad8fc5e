//! Plain configuration consumed by the fuzzing engine.
///
/// Loading this from a CLI/TOML file is an external collaborator's job (see
/// spec §1); this struct is the fixed interface it fills in.
use std::collections::HashMap;
use std::time::Duration;

use primitive_types::H160;

use crate::error::{ConfigError, Result};

/// Panic codes `Panic(uint256)` can carry, per the Solidity ABI convention.
/// The assertion test case provider treats a revert with one of the enabled
/// codes as a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PanicCode {
    Generic = 0x00,
    Assert = 0x01,
    ArithmeticOverflow = 0x11,
    DivisionByZero = 0x12,
    InvalidEnumConversion = 0x21,
    InvalidStorageByteArray = 0x22,
    EmptyArrayPop = 0x31,
    ArrayOutOfBounds = 0x32,
    OutOfMemory = 0x41,
    InvalidInternalFunction = 0x51,
}

impl PanicCode {
    pub fn code(self) -> u64 {
        self as u64
    }

    /// The set of codes Medusa's own default config enables; a caller can
    /// always override this, but an empty set is refused (§9 Open
    /// Questions: "refuse default-empty").
    pub fn recommended_defaults() -> Vec<PanicCode> {
        vec![
            PanicCode::Assert,
            PanicCode::ArithmeticOverflow,
            PanicCode::DivisionByZero,
            PanicCode::ArrayOutOfBounds,
            PanicCode::EmptyArrayPop,
        ]
    }
}

/// Inclusive range used for block-number/timestamp delay and for sequence
/// length bounds.
#[derive(Debug, Clone, Copy)]
pub struct Range<T> {
    pub min: T,
    pub max: T,
}

impl<T: Copy + PartialOrd> Range<T> {
    pub fn new(min: T, max: T) -> Option<Self> {
        if min > max {
            None
        } else {
            Some(Self { min, max })
        }
    }
}

#[derive(Debug, Clone)]
pub struct FuzzerConfig {
    /// Number of parallel workers.
    pub worker_count: u32,
    /// Maximum number of elements per generated call sequence.
    pub sequence_max_length: u32,
    /// Inclusive bounds for `block_number_delay`/`block_timestamp_delay` (both >= 1).
    pub block_number_delay_range: Range<u64>,
    pub block_timestamp_delay_range: Range<u64>,
    /// Per-contract weight used by the sequence generator's target selection.
    /// Missing entries default to weight 1.
    pub contract_weights: HashMap<H160, u32>,
    /// Weights of the six sequence generation strategies, in the order
    /// documented in §4.6: fresh, corpus-head, corpus-tail, splice,
    /// interleave, argument-mutation.
    pub strategy_weights: [u32; 6],
    /// Accounts allowed to be used as `from` in generated calls.
    pub senders: Vec<H160>,
    /// Root directory for the on-disk corpus (see §6 for the layout).
    pub corpus_dir: std::path::PathBuf,
    /// Panic codes that constitute an assertion failure. Refused if empty
    /// while assertion testing is enabled.
    pub enabled_panic_codes: Vec<PanicCode>,
    pub assertion_testing_enabled: bool,
    pub property_test_prefix: String,
    pub property_testing_enabled: bool,
    pub optimization_test_prefix: String,
    pub optimization_testing_enabled: bool,
    /// Number of sequences a worker executes before it is torn down and
    /// recreated from the base chain (bounds memory growth, §4.9).
    pub worker_reset_limit: u64,
    /// Campaign-wide stop conditions.
    pub timeout: Option<Duration>,
    pub test_limit: Option<u64>,
    pub stop_on_first_failure: bool,
    /// How often the corpus is flushed to disk in the absence of new items.
    pub flush_interval: Duration,
    /// How often the pruner sweeps the mutable corpus. `None` disables pruning.
    pub pruner_interval: Option<Duration>,
}

impl FuzzerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.worker_count == 0 {
            return Err(ConfigError::InvalidWorkerCount(self.worker_count).into());
        }
        if self.sequence_max_length == 0 {
            return Err(ConfigError::InvalidSequenceLength(self.sequence_max_length).into());
        }
        if self.block_number_delay_range.min < 1 || self.block_timestamp_delay_range.min < 1 {
            return Err(ConfigError::InvalidDelayRange {
                min: 0,
                max: self.block_number_delay_range.max,
            }
            .into());
        }
        if self.senders.is_empty() {
            return Err(ConfigError::NoSenders.into());
        }
        for (addr, weight) in &self.contract_weights {
            if *weight == 0 {
                return Err(ConfigError::InvalidContractWeight(*addr).into());
            }
        }
        if self.assertion_testing_enabled && self.enabled_panic_codes.is_empty() {
            return Err(ConfigError::EmptyPanicCodeSet.into());
        }
        Ok(())
    }
}

impl Default for FuzzerConfig {
    fn default() -> Self {
        Self {
            worker_count: 10,
            sequence_max_length: 100,
            block_number_delay_range: Range::new(1, 1).unwrap(),
            block_timestamp_delay_range: Range::new(1, 1).unwrap(),
            contract_weights: HashMap::new(),
            strategy_weights: [10, 10, 10, 10, 10, 50],
            senders: Vec::new(),
            corpus_dir: std::path::PathBuf::from("corpus"),
            enabled_panic_codes: PanicCode::recommended_defaults(),
            assertion_testing_enabled: true,
            property_test_prefix: "fuzz_".to_string(),
            property_testing_enabled: true,
            optimization_test_prefix: "optimize_".to_string(),
            optimization_testing_enabled: false,
            worker_reset_limit: 10_000,
            timeout: None,
            test_limit: None,
            stop_on_first_failure: true,
            flush_interval: Duration::from_secs(3),
            pruner_interval: Some(Duration::from_secs(5 * 60)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn refuses_zero_workers() {
        let mut cfg = FuzzerConfig::default();
        cfg.senders.push(H160::repeat_byte(1));
        cfg.worker_count = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn refuses_empty_panic_set_when_assertions_enabled() {
        let mut cfg = FuzzerConfig::default();
        cfg.senders.push(H160::repeat_byte(1));
        cfg.enabled_panic_codes.clear();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn accepts_sane_defaults_with_a_sender() {
        let mut cfg = FuzzerConfig::default();
        cfg.senders.push(H160::repeat_byte(1));
        assert!(cfg.validate().is_ok());
    }
}
