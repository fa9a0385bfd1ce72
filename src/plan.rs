//! Deployment plan definition and loading.
//!
//! This module provides:
//! - `Step`, a tagged unit of work with declared dependencies
//! - `StepBody`, the uniform async body every step runs
//! - `DeployContract` and `CallMethod`, the two stock bodies
//! - `DeploymentPlan`, the validated ordered list of steps
//! - `StepConfig`, the `[[steps]]` table format of `deploy.toml`

use async_trait::async_trait;
use serde::Deserialize;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use alloy::primitives::U256;

use crate::address::{Address, parse_address};
use crate::chain::abi::parse_uint;
use crate::chain::{CallRequest, ChainClient, DeployRequest, Token};
use crate::errors::{ChainError, PlanError};

/// Whether a step creates a contract or configures existing ones.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepKind {
    Deploy,
    Wire,
}

impl fmt::Display for StepKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StepKind::Deploy => write!(f, "deploy"),
            StepKind::Wire => write!(f, "wire"),
        }
    }
}

/// A constructor or method argument, resolved when the step runs.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(try_from = "RawArg")]
pub enum ArgSpec {
    /// Address of an earlier deploy step.
    Ref(String),
    /// Address of the deploying account.
    Signer,
    Literal(Token),
}

impl ArgSpec {
    pub fn reference(tag: &str) -> Self {
        ArgSpec::Ref(tag.to_string())
    }

    fn dependency(&self) -> Option<&str> {
        match self {
            ArgSpec::Ref(tag) => Some(tag),
            _ => None,
        }
    }
}

impl fmt::Display for ArgSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArgSpec::Ref(tag) => write!(f, "@{}", tag),
            ArgSpec::Signer => write!(f, "signer"),
            ArgSpec::Literal(token) => write!(f, "{}", token),
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawArg {
    Keyword(String),
    Table(ArgTable),
}

#[derive(Deserialize)]
#[serde(untagged)]
enum UintValue {
    Int(u64),
    Text(String),
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct ArgTable {
    #[serde(rename = "ref")]
    reference: Option<String>,
    address: Option<String>,
    uint: Option<UintValue>,
    bool: Option<bool>,
    string: Option<String>,
}

impl TryFrom<RawArg> for ArgSpec {
    type Error = String;

    fn try_from(raw: RawArg) -> Result<Self, Self::Error> {
        let table = match raw {
            RawArg::Keyword(word) if word == "signer" => return Ok(ArgSpec::Signer),
            RawArg::Keyword(word) => {
                return Err(format!(
                    "unknown argument '{}'; use \"signer\" or a table such as {{ ref = \"Tag\" }}",
                    word
                ));
            }
            RawArg::Table(table) => table,
        };

        let mut specs = Vec::new();
        if let Some(tag) = table.reference {
            specs.push(ArgSpec::Ref(tag));
        }
        if let Some(address) = table.address {
            let address = parse_address(&address).map_err(|e| e.to_string())?;
            specs.push(ArgSpec::Literal(Token::Address(address)));
        }
        if let Some(uint) = table.uint {
            let value = match uint {
                UintValue::Int(n) => U256::from(n),
                UintValue::Text(s) => parse_uint(&s)?,
            };
            specs.push(ArgSpec::Literal(Token::Uint(value)));
        }
        if let Some(flag) = table.bool {
            specs.push(ArgSpec::Literal(Token::Bool(flag)));
        }
        if let Some(text) = table.string {
            specs.push(ArgSpec::Literal(Token::String(text)));
        }

        match specs.len() {
            1 => Ok(specs.remove(0)),
            0 => Err("argument table must set one of ref, address, uint, bool, string".into()),
            _ => Err("argument table must set exactly one of ref, address, uint, bool, string".into()),
        }
    }
}

/// Inputs handed to a step body: the signer and the addresses of the
/// step's dependencies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepInputs {
    pub signer: Address,
    pub dependencies: BTreeMap<String, Address>,
}

impl StepInputs {
    pub fn address_of(&self, tag: &str) -> Option<Address> {
        self.dependencies.get(tag).copied()
    }

    pub fn resolve(&self, arg: &ArgSpec) -> Result<Token, ChainError> {
        match arg {
            ArgSpec::Ref(tag) => self
                .address_of(tag)
                .map(Token::Address)
                .ok_or_else(|| ChainError::Encoding(format!("no address for '{}'", tag))),
            ArgSpec::Signer => Ok(Token::Address(self.signer)),
            ArgSpec::Literal(token) => Ok(token.clone()),
        }
    }

    pub fn resolve_all(&self, args: &[ArgSpec]) -> Result<Vec<Token>, ChainError> {
        args.iter().map(|arg| self.resolve(arg)).collect()
    }
}

/// What a successful step body produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepOutput {
    Deployed { address: Address, tx_hash: String },
    Wired { tx_hash: String },
}

/// Contract identity and constructor arguments used to verify a deployment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerificationTarget {
    pub contract: String,
    pub constructor_args: Vec<Token>,
}

/// A unit of deployment work. Every body has the same calling convention
/// and may suspend while waiting on the network.
#[async_trait]
pub trait StepBody: Send + Sync {
    async fn execute(
        &self,
        chain: &dyn ChainClient,
        inputs: &StepInputs,
    ) -> Result<StepOutput, ChainError>;

    /// What to submit for source verification, for bodies that deploy.
    fn verification_target(&self, _inputs: &StepInputs) -> Option<VerificationTarget> {
        None
    }

    /// One-line description for listings.
    fn describe(&self) -> String;
}

/// Deploys a contract artifact with the given constructor arguments.
#[derive(Debug, Clone)]
pub struct DeployContract {
    pub contract: String,
    pub args: Vec<ArgSpec>,
}

#[async_trait]
impl StepBody for DeployContract {
    async fn execute(
        &self,
        chain: &dyn ChainClient,
        inputs: &StepInputs,
    ) -> Result<StepOutput, ChainError> {
        let request = DeployRequest {
            contract: self.contract.clone(),
            args: inputs.resolve_all(&self.args)?,
            from: inputs.signer,
        };
        let receipt = chain.deploy(&request).await?;
        Ok(StepOutput::Deployed {
            address: receipt.address,
            tx_hash: receipt.tx_hash,
        })
    }

    fn verification_target(&self, inputs: &StepInputs) -> Option<VerificationTarget> {
        let constructor_args = inputs.resolve_all(&self.args).ok()?;
        Some(VerificationTarget {
            contract: self.contract.clone(),
            constructor_args,
        })
    }

    fn describe(&self) -> String {
        format!("{}({})", self.contract, join_args(&self.args))
    }
}

/// Calls a state-changing method on an already-deployed contract.
#[derive(Debug, Clone)]
pub struct CallMethod {
    pub target: ArgSpec,
    pub method: String,
    pub args: Vec<ArgSpec>,
}

#[async_trait]
impl StepBody for CallMethod {
    async fn execute(
        &self,
        chain: &dyn ChainClient,
        inputs: &StepInputs,
    ) -> Result<StepOutput, ChainError> {
        let to = match inputs.resolve(&self.target)? {
            Token::Address(address) => address,
            other => {
                return Err(ChainError::Encoding(format!(
                    "call target must be an address, got {}",
                    other
                )));
            }
        };
        let request = CallRequest {
            to,
            method: self.method.clone(),
            args: inputs.resolve_all(&self.args)?,
            from: inputs.signer,
        };
        let receipt = chain.call(&request).await?;
        Ok(StepOutput::Wired {
            tx_hash: receipt.tx_hash,
        })
    }

    fn describe(&self) -> String {
        format!("{}.{}({})", self.target, self.method, join_args(&self.args))
    }
}

fn join_args(args: &[ArgSpec]) -> String {
    args.iter()
        .map(|a| a.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// A single tagged step in a deployment plan.
#[derive(Clone)]
pub struct Step {
    pub tag: String,
    pub kind: StepKind,
    /// Tags whose deployed addresses this step needs.
    pub dependencies: Vec<String>,
    pub body: Arc<dyn StepBody>,
}

impl fmt::Debug for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Step")
            .field("tag", &self.tag)
            .field("kind", &self.kind)
            .field("dependencies", &self.dependencies)
            .field("body", &self.body.describe())
            .finish()
    }
}

fn push_unique(deps: &mut Vec<String>, tag: &str) {
    if !deps.iter().any(|d| d == tag) {
        deps.push(tag.to_string());
    }
}

impl Step {
    /// Deploy step; every `ArgSpec::Ref` becomes a dependency.
    pub fn deploy(tag: &str, contract: &str, args: Vec<ArgSpec>) -> Self {
        let mut dependencies = Vec::new();
        for dep in args.iter().filter_map(ArgSpec::dependency) {
            push_unique(&mut dependencies, dep);
        }
        Self {
            tag: tag.to_string(),
            kind: StepKind::Deploy,
            dependencies,
            body: Arc::new(DeployContract {
                contract: contract.to_string(),
                args,
            }),
        }
    }

    /// Wiring step calling `method` on the contract deployed by `target`.
    pub fn wire(tag: &str, target: &str, method: &str, args: Vec<ArgSpec>) -> Self {
        Self::wire_to(tag, ArgSpec::reference(target), method, args)
    }

    /// Wiring step with an arbitrary target (a reference or a literal address).
    pub fn wire_to(tag: &str, target: ArgSpec, method: &str, args: Vec<ArgSpec>) -> Self {
        let mut dependencies = Vec::new();
        for dep in std::iter::once(&target)
            .chain(args.iter())
            .filter_map(ArgSpec::dependency)
        {
            push_unique(&mut dependencies, dep);
        }
        Self {
            tag: tag.to_string(),
            kind: StepKind::Wire,
            dependencies,
            body: Arc::new(CallMethod {
                target,
                method: method.to_string(),
                args,
            }),
        }
    }

    /// Step with a caller-supplied body.
    pub fn custom(tag: &str, kind: StepKind, dependencies: Vec<String>, body: Arc<dyn StepBody>) -> Self {
        Self {
            tag: tag.to_string(),
            kind,
            dependencies,
            body,
        }
    }

    /// Add explicit dependencies beyond those implied by arguments.
    pub fn depends_on(mut self, tags: &[&str]) -> Self {
        for tag in tags {
            push_unique(&mut self.dependencies, tag);
        }
        self
    }
}

/// `[[steps]]` entry in `deploy.toml`.
///
/// A step with `contract` deploys; a step with `target` and `method` wires.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StepConfig {
    pub tag: String,
    #[serde(default)]
    pub contract: Option<String>,
    /// Tag of a deployed step, or a literal `0x` address.
    #[serde(default)]
    pub target: Option<String>,
    #[serde(default)]
    pub method: Option<String>,
    #[serde(default)]
    pub args: Vec<ArgSpec>,
    #[serde(default)]
    pub depends_on: Vec<String>,
}

impl StepConfig {
    pub fn into_step(self) -> Result<Step, PlanError> {
        let extra: Vec<&str> = self.depends_on.iter().map(String::as_str).collect();
        let step = match (self.contract.as_deref(), self.target.as_deref(), self.method.as_deref()) {
            (Some(contract), None, None) => Step::deploy(&self.tag, contract, self.args.clone()),
            (None, Some(target), Some(method)) => {
                let target = if target.starts_with("0x") {
                    let address = parse_address(target).map_err(|e| PlanError::InvalidArgument {
                        step: self.tag.clone(),
                        message: e.to_string(),
                    })?;
                    ArgSpec::Literal(Token::Address(address))
                } else {
                    ArgSpec::reference(target)
                };
                Step::wire_to(&self.tag, target, method, self.args.clone())
            }
            _ => {
                return Err(PlanError::InvalidStep {
                    step: self.tag.clone(),
                    message: "set either `contract`, or both `target` and `method`".into(),
                });
            }
        };
        Ok(step.depends_on(&extra))
    }
}

/// The ordered, validated list of steps for one deployment target.
///
/// Declaration order is execution order; it must already respect
/// dependencies.
#[derive(Debug, Clone, Default)]
pub struct DeploymentPlan {
    steps: Vec<Step>,
}

impl DeploymentPlan {
    pub fn new(steps: Vec<Step>) -> Result<Self, PlanError> {
        let mut seen: HashMap<&str, StepKind> = HashMap::new();
        let all: HashMap<&str, StepKind> = steps.iter().map(|s| (s.tag.as_str(), s.kind)).collect();

        for step in &steps {
            for dep in &step.dependencies {
                match seen.get(dep.as_str()) {
                    Some(StepKind::Deploy) => {}
                    Some(StepKind::Wire) => {
                        return Err(PlanError::NoAddress {
                            step: step.tag.clone(),
                            dependency: dep.clone(),
                        });
                    }
                    None if all.contains_key(dep.as_str()) => {
                        return Err(PlanError::ForwardDependency {
                            step: step.tag.clone(),
                            dependency: dep.clone(),
                        });
                    }
                    None => {
                        return Err(PlanError::UnknownDependency {
                            step: step.tag.clone(),
                            dependency: dep.clone(),
                        });
                    }
                }
            }
            if seen.insert(step.tag.as_str(), step.kind).is_some() {
                return Err(PlanError::DuplicateTag(step.tag.clone()));
            }
        }

        Ok(Self { steps })
    }

    pub fn from_configs(configs: Vec<StepConfig>) -> Result<Self, PlanError> {
        let steps = configs
            .into_iter()
            .map(StepConfig::into_step)
            .collect::<Result<Vec<_>, _>>()?;
        Self::new(steps)
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    pub fn get(&self, tag: &str) -> Option<&Step> {
        self.steps.iter().find(|s| s.tag == tag)
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}
