//! Compiled-contract model: ABI, bytecode, source maps, and the registry
//! mapping a deployed address back to the contract that produced it.
//!
//! Replaces the teacher's `ContractInfo`/`ContractLoader`
//! (`evm/contract_utils.rs`): same responsibility (hold ABI and bytecode,
//! resolve on-chain bytecode back to a named contract) but driven from an
//! already-compiled artifact list instead of reading `.abi`/`.bin` files off
//! disk, and with the richer `MatchBytecode` three-tier fallback and
//! library-linking topological sort the teacher does not model.

pub mod linking;

use std::collections::HashMap;

use primitive_types::H160;
use serde::{Deserialize, Serialize};
use sha3::{Digest, Keccak256};

use crate::error::{ArtifactError, Result};
use crate::value::AbiFunction;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContractKind {
    Contract,
    Library,
    Interface,
}

/// One compiled contract, as handed to the engine by an external compiler
/// collaborator (§1 Out of scope: compilation itself).
#[derive(Debug, Clone)]
pub struct CompiledContract {
    pub name: String,
    pub abi: Vec<AbiFunction>,
    pub init_bytecode: Vec<u8>,
    pub runtime_bytecode: Vec<u8>,
    pub src_map_init: String,
    pub src_map_runtime: String,
    pub kind: ContractKind,
}

impl CompiledContract {
    pub fn is_deployable(&self) -> bool {
        !matches!(self.kind, ContractKind::Interface)
    }
}

/// One source file's worth of compilation output.
#[derive(Debug, Clone)]
pub struct SourceArtifact {
    pub source_path: String,
    pub ast: serde_json::Value,
    pub source_unit_id: u64,
    pub contracts: HashMap<String, CompiledContract>,
}

/// The full set of compiled contracts the fuzzer was handed, plus the
/// address → contract registry built up as deployments happen.
pub struct ArtifactSet {
    sources: Vec<SourceArtifact>,
    by_name: HashMap<String, usize>,
    deployed: HashMap<H160, String>,
}

impl ArtifactSet {
    pub fn new(sources: Vec<SourceArtifact>) -> Self {
        let mut by_name = HashMap::new();
        for (src_idx, source) in sources.iter().enumerate() {
            for name in source.contracts.keys() {
                by_name.insert(name.clone(), src_idx);
            }
        }
        Self {
            sources,
            by_name,
            deployed: HashMap::new(),
        }
    }

    pub fn contract(&self, name: &str) -> Option<&CompiledContract> {
        let src_idx = *self.by_name.get(name)?;
        self.sources[src_idx].contracts.get(name)
    }

    pub fn all_contracts(&self) -> impl Iterator<Item = &CompiledContract> {
        self.sources.iter().flat_map(|s| s.contracts.values())
    }

    /// Called when the test chain reports a deployment-added event (§4.4).
    pub fn on_deployment_added(&mut self, address: H160, contract_name: String) {
        self.deployed.insert(address, contract_name);
    }

    /// Called when the test chain reports a deployment-removed event
    /// (reverted deployment, worker rebase, etc).
    pub fn on_deployment_removed(&mut self, address: H160) {
        self.deployed.remove(&address);
    }

    pub fn contract_at(&self, address: H160) -> Option<&CompiledContract> {
        let name = self.deployed.get(&address)?;
        self.contract(name)
    }

    pub fn deployed_addresses(&self) -> impl Iterator<Item = &H160> {
        self.deployed.keys()
    }

    /// Strips the CBOR metadata trailer Solidity appends to runtime
    /// bytecode (a 2-byte big-endian length at the very end, preceded by
    /// the CBOR map itself), unless `USE_FULL_BYTECODE` is set (§6), in
    /// which case the keccak of the full stripped bytecode is always used
    /// instead of the embedded metadata hash.
    pub fn bytecode_lookup_hash(runtime: &[u8]) -> Result<[u8; 32]> {
        if std::env::var("USE_FULL_BYTECODE")
            .map(|v| !v.is_empty())
            .unwrap_or(false)
        {
            return Ok(Self::keccak_stripped(runtime));
        }
        if let Some(metadata) = Self::cbor_metadata_hash(runtime) {
            return Ok(metadata);
        }
        Ok(Self::keccak_stripped(runtime))
    }

    /// Init bytecode's lookup hash is always the stripped-keccak form: the
    /// CBOR metadata trailer identifies *runtime* code with a given
    /// constructor, not the constructor itself, so it carries no extra
    /// information worth preferring over a plain hash here.
    pub fn create_lookup_hash(init: &[u8]) -> [u8; 32] {
        Self::keccak_stripped(init)
    }

    fn keccak_stripped(runtime: &[u8]) -> [u8; 32] {
        let stripped = Self::strip_metadata(runtime);
        let digest = Keccak256::digest(stripped);
        let mut out = [0u8; 32];
        out.copy_from_slice(&digest);
        out
    }

    /// The last two bytes of Solidity runtime bytecode encode the length of
    /// a trailing CBOR metadata blob (IPFS/bzzr hash, compiler version).
    /// When present and well-formed, its own embedded hash doubles as a
    /// cheap, content-addressed lookup key; a `None` return means "fall
    /// back to stripped-keccak".
    fn cbor_metadata_hash(runtime: &[u8]) -> Option<[u8; 32]> {
        if runtime.len() < 2 {
            return None;
        }
        let len = u16::from_be_bytes([runtime[runtime.len() - 2], runtime[runtime.len() - 1]]) as usize;
        if len == 0 || len + 2 > runtime.len() {
            return None;
        }
        let metadata = &runtime[runtime.len() - 2 - len..runtime.len() - 2];
        let digest = Keccak256::digest(metadata);
        let mut out = [0u8; 32];
        out.copy_from_slice(&digest);
        Some(out)
    }

    fn strip_metadata(runtime: &[u8]) -> &[u8] {
        if runtime.len() < 2 {
            return runtime;
        }
        let len = u16::from_be_bytes([runtime[runtime.len() - 2], runtime[runtime.len() - 1]]) as usize;
        if len == 0 || len + 2 > runtime.len() {
            return runtime;
        }
        &runtime[..runtime.len() - 2 - len]
    }

    /// Resolves an observed `(init, runtime)` bytecode pair to a candidate
    /// contract, per §4.4's three-tier fallback.
    pub fn match_bytecode(&self, init: &[u8], runtime: &[u8]) -> Result<&CompiledContract> {
        let observed_hash = Self::bytecode_lookup_hash(runtime)?;

        for contract in self.all_contracts() {
            if let Ok(candidate_hash) = Self::bytecode_lookup_hash(&contract.runtime_bytecode) {
                if candidate_hash == observed_hash {
                    return Ok(contract);
                }
            }
        }

        for contract in self.all_contracts() {
            if init.starts_with(contract.init_bytecode.as_slice())
                && !contract.init_bytecode.is_empty()
            {
                return Ok(contract);
            }
        }

        for contract in self.all_contracts() {
            if contract.runtime_bytecode == runtime {
                return Ok(contract);
            }
        }

        Err(ArtifactError::ContractNotFound(hex::encode(&observed_hash)).into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn contract(name: &str, init: Vec<u8>, runtime: Vec<u8>) -> CompiledContract {
        CompiledContract {
            name: name.to_string(),
            abi: Vec::new(),
            init_bytecode: init,
            runtime_bytecode: runtime,
            src_map_init: String::new(),
            src_map_runtime: String::new(),
            kind: ContractKind::Contract,
        }
    }

    fn set(contracts: Vec<CompiledContract>) -> ArtifactSet {
        let mut map = HashMap::new();
        for c in contracts {
            map.insert(c.name.clone(), c);
        }
        ArtifactSet::new(vec![SourceArtifact {
            source_path: "A.sol".into(),
            ast: serde_json::Value::Null,
            source_unit_id: 0,
            contracts: map,
        }])
    }

    #[test]
    fn match_by_runtime_equality_when_no_metadata() {
        let artifacts = set(vec![contract("A", vec![0x60, 0x80], vec![0x60, 0x80, 0x52])]);
        let found = artifacts.match_bytecode(&[0x60, 0x80], &[0x60, 0x80, 0x52]).unwrap();
        assert_eq!(found.name, "A");
    }

    #[test]
    fn match_by_init_prefix_with_constructor_args_trailing() {
        let artifacts = set(vec![contract("A", vec![0x60, 0x80], vec![0xde, 0xad])]);
        // Observed init has extra trailing constructor-arg bytes, and
        // runtime bytecode that does not equal the candidate's at all (as
        // would be true after immutable-variable substitution).
        let found = artifacts
            .match_bytecode(&[0x60, 0x80, 0x00, 0x01], &[0xff])
            .unwrap();
        assert_eq!(found.name, "A");
    }

    #[test]
    fn unresolvable_bytecode_errors() {
        let artifacts = set(vec![contract("A", vec![0x60, 0x80], vec![0x60, 0x80, 0x52])]);
        assert!(artifacts.match_bytecode(&[0x01], &[0x02]).is_err());
    }
}
