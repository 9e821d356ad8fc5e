//! Error domains for the fuzzing engine.
//!
//! Each enum corresponds to one failure domain from the error-handling
//! design: configuration, artifacts/linking, chain execution, corpus I/O
//! and test-case providers. `FuzzerError` composes them into the single
//! `Result` type the coordinator returns to its caller.

use primitive_types::H160;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("sequence length must be >= 1, got {0}")]
    InvalidSequenceLength(u32),
    #[error("worker count must be >= 1, got {0}")]
    InvalidWorkerCount(u32),
    #[error("block delay range is empty: min {min} > max {max}")]
    InvalidDelayRange { min: u64, max: u64 },
    #[error("contract weight for {0:?} must be > 0")]
    InvalidContractWeight(H160),
    #[error("assertion test case provider enabled with an empty panic-code set")]
    EmptyPanicCodeSet,
    #[error("no sender accounts configured")]
    NoSenders,
}

#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("bytecode for contract {0} is too short to contain a CBOR metadata trailer")]
    BytecodeTooShort(String),
    #[error("library dependency cycle detected among: {0:?}")]
    LibraryCycle(Vec<String>),
    #[error("unresolved library placeholder __{0}__ remains in init bytecode for {1}")]
    UnresolvedPlaceholder(String, String),
    #[error("contract {0} not found in artifact set")]
    ContractNotFound(String),
    #[error("interface contracts cannot be deployed: {0}")]
    InterfaceNotDeployable(String),
}

#[derive(Debug, Error)]
pub enum ChainError {
    #[error("block index {0} does not exist (chain has {1} committed blocks)")]
    NoSuchBlockIndex(usize, usize),
    #[error("revm execution error: {0}")]
    Execution(String),
    #[error("deployment of {0} failed: {1}")]
    DeploymentFailed(String, String),
    #[error("chain is in an inconsistent state and cannot be replayed: {0}")]
    Inconsistent(String),
}

#[derive(Debug, Error)]
pub enum CorpusError {
    #[error("corpus entry referenced an unresolvable contract/method: {0}")]
    UnresolvableEntry(String),
    #[error("malformed corpus entry at {0}: {1}")]
    Malformed(String, String),
    #[error("no sequences available to select a mutation target from")]
    EmptyChooser,
    #[error("flush I/O error writing {0}: {1}")]
    FlushIo(String, String),
}

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("test case provider {0} raised a fatal error: {1}")]
    Fatal(String, String),
}

#[derive(Debug, Error)]
pub enum FuzzerError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Artifact(#[from] ArtifactError),
    #[error(transparent)]
    Chain(#[from] ChainError),
    #[error(transparent)]
    Corpus(#[from] CorpusError),
    #[error(transparent)]
    Provider(#[from] ProviderError),
}

pub type Result<T, E = FuzzerError> = std::result::Result<T, E>;
