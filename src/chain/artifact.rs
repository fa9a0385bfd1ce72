//! Compiled contract artifacts produced by the Solidity toolchain.
//!
//! The layout follows Hardhat's output directory:
//!
//! ```text
//! artifacts/
//!   contracts/AdminControl.sol/AdminControl.json      bytecode + abi
//!   contracts/AdminControl.sol/AdminControl.dbg.json  { "buildInfo": "../../build-info/<id>.json" }
//!   build-info/<id>.json                              solc input and version
//! ```

use alloy::json_abi::JsonAbi;
use alloy::primitives::hex;
use glob::glob;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("No artifact found for contract '{0}'")]
    NotFound(String),

    #[error("Contract name '{name}' is ambiguous, matches: {}", .candidates.join(", "))]
    Ambiguous { name: String, candidates: Vec<String> },

    #[error("Failed to read artifact {path}: {message}")]
    Read { path: PathBuf, message: String },

    #[error("Artifact {0} has no deployable bytecode (abstract contract or interface?)")]
    EmptyBytecode(PathBuf),
}

/// Bytecode, ABI and identity of a compiled contract.
#[derive(Debug, Clone)]
pub struct ContractArtifact {
    pub contract_name: String,
    pub source_name: String,
    pub abi: JsonAbi,
    pub bytecode: Vec<u8>,
    /// Path of the artifact JSON on disk.
    pub path: PathBuf,
}

impl ContractArtifact {
    /// Fully-qualified name, e.g. `contracts/AdminControl.sol:AdminControl`.
    pub fn qualified_name(&self) -> String {
        format!("{}:{}", self.source_name, self.contract_name)
    }
}

/// Compiler input and version recorded for a compilation.
#[derive(Debug, Clone)]
pub struct BuildInfo {
    pub solc_long_version: String,
    /// Standard-JSON compiler input, verbatim.
    pub input: serde_json::Value,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawArtifact {
    contract_name: String,
    source_name: String,
    #[serde(default)]
    abi: JsonAbi,
    bytecode: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawDebugFile {
    build_info: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawBuildInfo {
    solc_long_version: String,
    input: serde_json::Value,
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, ArtifactError> {
    let content = std::fs::read_to_string(path).map_err(|e| ArtifactError::Read {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;
    serde_json::from_str(&content).map_err(|e| ArtifactError::Read {
        path: path.to_path_buf(),
        message: e.to_string(),
    })
}

/// Looks up artifacts below a compiler output directory.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Find the artifact file for a contract given as `Name` or
    /// `path/To.sol:Name`.
    fn locate(&self, name: &str) -> Result<PathBuf, ArtifactError> {
        if let Some((source, contract)) = name.rsplit_once(':') {
            let path = self.root.join(source).join(format!("{}.json", contract));
            return if path.exists() {
                Ok(path)
            } else {
                Err(ArtifactError::NotFound(name.to_string()))
            };
        }

        let pattern = self
            .root
            .join("**")
            .join(format!("{}.json", name))
            .to_string_lossy()
            .to_string();

        let mut matches: Vec<PathBuf> = glob(&pattern)
            .map_err(|e| ArtifactError::Read {
                path: self.root.clone(),
                message: e.to_string(),
            })?
            .filter_map(|entry| entry.ok())
            .filter(|path| !path.components().any(|c| c.as_os_str() == "build-info"))
            .collect();

        match matches.len() {
            0 => Err(ArtifactError::NotFound(name.to_string())),
            1 => Ok(matches.remove(0)),
            _ => Err(ArtifactError::Ambiguous {
                name: name.to_string(),
                candidates: matches
                    .iter()
                    .map(|p| p.display().to_string())
                    .collect(),
            }),
        }
    }

    pub fn load(&self, name: &str) -> Result<ContractArtifact, ArtifactError> {
        let path = self.locate(name)?;
        let raw: RawArtifact = read_json(&path)?;

        let hex_body = raw.bytecode.trim_start_matches("0x");
        if hex_body.is_empty() {
            return Err(ArtifactError::EmptyBytecode(path));
        }
        let bytecode = hex::decode(hex_body).map_err(|e| ArtifactError::Read {
            path: path.clone(),
            message: format!("bytecode is not valid hex (unlinked library?): {}", e),
        })?;

        Ok(ContractArtifact {
            contract_name: raw.contract_name,
            source_name: raw.source_name,
            abi: raw.abi,
            bytecode,
            path,
        })
    }

    /// Load the build info referenced by an artifact's `.dbg.json` sibling.
    pub fn build_info(&self, artifact: &ContractArtifact) -> Result<BuildInfo, ArtifactError> {
        let dbg_path = artifact.path.with_extension("dbg.json");
        let dbg: RawDebugFile = read_json(&dbg_path)?;

        let base = artifact.path.parent().unwrap_or(&self.root);
        let info_path = base.join(&dbg.build_info);
        let raw: RawBuildInfo = read_json(&info_path)?;

        Ok(BuildInfo {
            solc_long_version: raw.solc_long_version,
            input: raw.input,
        })
    }
}
