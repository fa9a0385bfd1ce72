//! The step sequencer.
//!
//! [`Orchestrator::run`] walks a [`DeploymentPlan`] in declaration order,
//! skipping completed steps, persisting the checkpoint after every step and
//! attempting best-effort verification after every deployment.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::address::Address;
use crate::chain::ChainClient;
use crate::errors::{ChainError, OrchestratorError};
use crate::orchestrator::lock::RunLock;
use crate::orchestrator::state::{AddressTable, Checkpoint, CheckpointStore};
use crate::plan::{DeploymentPlan, Step, StepInputs, StepKind, StepOutput};
use crate::ui::OrchestratorUI;
use crate::verify::{VerificationOutcome, Verifier, VerifyRequest};

/// Everything a run needs, passed in explicitly.
pub struct RunContext {
    pub network: String,
    /// Explorer base URL used to print address links.
    pub explorer: Option<String>,
    pub store: CheckpointStore,
    /// Advisory lock file; `None` runs unlocked.
    pub lock_path: Option<PathBuf>,
    pub chain: Arc<dyn ChainClient>,
    pub verifier: Arc<dyn Verifier>,
    /// Pause between a deployment being mined and its verification.
    pub verification_delay: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerificationRecord {
    pub tag: String,
    pub address: Address,
    pub outcome: VerificationOutcome,
}

/// What a completed run did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    /// Steps whose body ran in this run.
    pub executed: Vec<String>,
    /// Steps already complete before the run.
    pub skipped: Vec<String>,
    /// Deploy steps completed from an existing address without a new deployment.
    pub recovered: Vec<String>,
    pub verifications: Vec<VerificationRecord>,
    pub addresses: AddressTable,
}

pub struct Orchestrator {
    ctx: RunContext,
    ui: Option<Arc<OrchestratorUI>>,
}

impl Orchestrator {
    pub fn new(ctx: RunContext) -> Self {
        Self { ctx, ui: None }
    }

    pub fn with_ui(mut self, ui: Arc<OrchestratorUI>) -> Self {
        self.ui = Some(ui);
        self
    }

    pub fn context(&self) -> &RunContext {
        &self.ctx
    }

    fn explorer(&self) -> Option<&str> {
        self.ctx.explorer.as_deref()
    }

    async fn signer(&self) -> Result<Address, OrchestratorError> {
        let accounts = self
            .ctx
            .chain
            .signers()
            .await
            .map_err(OrchestratorError::Signers)?;
        accounts
            .first()
            .map(|account| account.address)
            .ok_or(OrchestratorError::NoSigner)
    }

    /// Step inputs, looking the signer up on first use and caching it.
    async fn inputs(
        &self,
        signer: &mut Option<Address>,
        dependencies: &BTreeMap<String, Address>,
    ) -> Result<StepInputs, OrchestratorError> {
        let signer = match *signer {
            Some(address) => address,
            None => {
                let address = self.signer().await?;
                if let Some(ref ui) = self.ui {
                    ui.print_signer(&address);
                }
                *signer = Some(address);
                address
            }
        };
        Ok(StepInputs {
            signer,
            dependencies: dependencies.clone(),
        })
    }

    /// Addresses of every dependency of `step`, or the first one missing.
    fn resolve_dependencies(
        step: &Step,
        checkpoint: &Checkpoint,
    ) -> Result<BTreeMap<String, Address>, OrchestratorError> {
        let mut resolved = BTreeMap::new();
        for dep in &step.dependencies {
            let address =
                checkpoint
                    .address_of(dep)
                    .ok_or_else(|| OrchestratorError::UnresolvedDependency {
                        step: step.tag.clone(),
                        dependency: dep.clone(),
                    })?;
            resolved.insert(dep.clone(), address);
        }
        Ok(resolved)
    }

    /// Execute the plan to completion or to the first fatal error.
    pub async fn run(&self, plan: &DeploymentPlan) -> Result<RunSummary, OrchestratorError> {
        let _lock = match &self.ctx.lock_path {
            Some(path) => Some(RunLock::acquire(path)?),
            None => None,
        };

        let mut checkpoint = self
            .ctx
            .store
            .load()
            .map_err(OrchestratorError::Checkpoint)?;

        info!(
            network = %self.ctx.network,
            steps = plan.len(),
            completed = checkpoint.completed_tags().len(),
            "Starting deployment run"
        );
        if let Some(ref ui) = self.ui {
            ui.print_run_header(&self.ctx.network, plan.len());
            ui.print_address_table(&checkpoint.addresses);
        }

        let mut summary = RunSummary::default();
        let mut signer: Option<Address> = None;

        for step in plan.steps() {
            if checkpoint.is_complete(&step.tag) {
                info!(step = %step.tag, "Skipping: {}", step.tag);
                if let Some(ref ui) = self.ui {
                    ui.step_skipped(&step.tag);
                }
                summary.skipped.push(step.tag.clone());
                continue;
            }

            info!(step = %step.tag, kind = %step.kind, "Running: {}", step.tag);
            if let Some(ref ui) = self.ui {
                ui.start_step(&step.tag, step.kind, &step.body.describe());
            }

            if let Err(err) = self
                .run_step(step, &mut checkpoint, &mut signer, &mut summary)
                .await
            {
                if let Some(ref ui) = self.ui {
                    ui.step_failed(&step.tag, &err.to_string());
                }
                return Err(err);
            }
        }

        if let Some(ref ui) = self.ui {
            ui.run_complete(summary.executed.len(), summary.skipped.len());
        }
        info!(
            executed = summary.executed.len(),
            skipped = summary.skipped.len(),
            recovered = summary.recovered.len(),
            "Deployment run complete"
        );

        summary.addresses = checkpoint.addresses;
        Ok(summary)
    }

    async fn run_step(
        &self,
        step: &Step,
        checkpoint: &mut Checkpoint,
        signer: &mut Option<Address>,
        summary: &mut RunSummary,
    ) -> Result<(), OrchestratorError> {
        let dependencies = Self::resolve_dependencies(step, checkpoint)?;

        let deployed = match step.kind {
            StepKind::Deploy => {
                let (address, recovered) = self
                    .deploy_step(step, checkpoint, signer, &dependencies)
                    .await?;
                if recovered {
                    summary.recovered.push(step.tag.clone());
                } else {
                    summary.executed.push(step.tag.clone());
                }
                Some((address, recovered))
            }
            StepKind::Wire => {
                let inputs = self.inputs(signer, &dependencies).await?;
                let output = step
                    .body
                    .execute(self.ctx.chain.as_ref(), &inputs)
                    .await
                    .map_err(|source| OrchestratorError::CallFailed {
                        step: step.tag.clone(),
                        source,
                    })?;
                let tx_hash = match output {
                    StepOutput::Wired { tx_hash } | StepOutput::Deployed { tx_hash, .. } => tx_hash,
                };
                info!(step = %step.tag, %tx_hash, "Wiring call mined");
                if let Some(ref ui) = self.ui {
                    ui.step_wired(&step.tag, &tx_hash);
                }
                summary.executed.push(step.tag.clone());
                None
            }
        };

        checkpoint.mark_complete(&step.tag);
        self.ctx
            .store
            .save(checkpoint)
            .map_err(|source| OrchestratorError::PersistenceFailed {
                step: step.tag.clone(),
                deployed: deployed.map(|(address, _)| address),
                source,
            })?;
        debug!(step = %step.tag, "Checkpoint saved");

        if let Some((address, recovered)) = deployed {
            if let Some(ref ui) = self.ui {
                if recovered {
                    ui.step_recovered(&step.tag, &address, self.explorer());
                } else {
                    ui.step_deployed(&step.tag, &address, self.explorer());
                }
            }
            let record = match self.inputs(signer, &dependencies).await {
                Ok(inputs) => self.verify_step(step, address, &inputs, true).await,
                Err(err) => {
                    warn!(step = %step.tag, "Skipping verification: {}", err);
                    let outcome = VerificationOutcome::Failed(err.to_string());
                    if let Some(ref ui) = self.ui {
                        ui.verification_result(&step.tag, &outcome);
                    }
                    Some(VerificationRecord {
                        tag: step.tag.clone(),
                        address,
                        outcome,
                    })
                }
            };
            if let Some(record) = record {
                summary.verifications.push(record);
            }
        }

        Ok(())
    }

    /// Deploy `step` unless an address is already recorded for it.
    /// Returns the address and whether it was recovered from the checkpoint.
    /// Recovery does not touch the network.
    async fn deploy_step(
        &self,
        step: &Step,
        checkpoint: &mut Checkpoint,
        signer: &mut Option<Address>,
        dependencies: &BTreeMap<String, Address>,
    ) -> Result<(Address, bool), OrchestratorError> {
        if let Some(existing) = checkpoint.address_of(&step.tag) {
            warn!(
                step = %step.tag,
                address = %existing,
                "Address already recorded but step not marked complete; skipping deployment"
            );
            return Ok((existing, true));
        }

        let inputs = self.inputs(signer, dependencies).await?;
        if let Some(ref ui) = self.ui {
            ui.log_activity("deploying and waiting for the transaction to be mined");
        }

        let output = step
            .body
            .execute(self.ctx.chain.as_ref(), &inputs)
            .await
            .map_err(|source| OrchestratorError::DeploymentFailed {
                step: step.tag.clone(),
                source,
            })?;

        match output {
            StepOutput::Deployed { address, tx_hash } => {
                info!(step = %step.tag, %address, %tx_hash, "Contract deployed");
                Ok((checkpoint.record_address(&step.tag, address), false))
            }
            StepOutput::Wired { tx_hash } => Err(OrchestratorError::DeploymentFailed {
                step: step.tag.clone(),
                source: ChainError::MissingContractAddress { tx_hash },
            }),
        }
    }

    /// Verify one deployment. Never fails; the outcome is logged and returned.
    async fn verify_step(
        &self,
        step: &Step,
        address: Address,
        inputs: &StepInputs,
        wait: bool,
    ) -> Option<VerificationRecord> {
        let target = step.body.verification_target(inputs)?;

        if wait && !self.ctx.verification_delay.is_zero() {
            debug!(
                step = %step.tag,
                delay_secs = self.ctx.verification_delay.as_secs(),
                "Waiting before verification"
            );
            if let Some(ref ui) = self.ui {
                ui.verification_waiting(&step.tag, self.ctx.verification_delay);
            }
            tokio::time::sleep(self.ctx.verification_delay).await;
        }

        if let Some(ref ui) = self.ui {
            ui.log_activity("submitting source for verification");
        }
        let outcome = self
            .ctx
            .verifier
            .verify(&VerifyRequest {
                contract: target.contract,
                address,
                constructor_args: target.constructor_args,
            })
            .await;

        match &outcome {
            VerificationOutcome::Failed(reason) => {
                warn!(step = %step.tag, %address, %reason, "Verification failed");
            }
            other => {
                info!(step = %step.tag, %address, outcome = %other, "Verification finished");
            }
        }
        if let Some(ref ui) = self.ui {
            ui.verification_result(&step.tag, &outcome);
        }

        Some(VerificationRecord {
            tag: step.tag.clone(),
            address,
            outcome,
        })
    }

    /// Re-run verification for every deploy step with a recorded address,
    /// without touching progress.
    pub async fn verify_all(
        &self,
        plan: &DeploymentPlan,
    ) -> Result<Vec<VerificationRecord>, OrchestratorError> {
        let checkpoint = self
            .ctx
            .store
            .load()
            .map_err(OrchestratorError::Checkpoint)?;

        let mut records = Vec::new();
        let mut signer: Option<Address> = None;

        for step in plan.steps().iter().filter(|s| s.kind == StepKind::Deploy) {
            let Some(address) = checkpoint.address_of(&step.tag) else {
                debug!(step = %step.tag, "No recorded address; nothing to verify");
                continue;
            };

            let dependencies = match Self::resolve_dependencies(step, &checkpoint) {
                Ok(dependencies) => dependencies,
                Err(err) => {
                    let outcome = VerificationOutcome::Failed(err.to_string());
                    warn!(step = %step.tag, "Cannot rebuild constructor arguments: {}", err);
                    if let Some(ref ui) = self.ui {
                        ui.verification_result(&step.tag, &outcome);
                    }
                    records.push(VerificationRecord {
                        tag: step.tag.clone(),
                        address,
                        outcome,
                    });
                    continue;
                }
            };

            let inputs = self.inputs(&mut signer, &dependencies).await?;
            if let Some(record) = self.verify_step(step, address, &inputs, false).await {
                records.push(record);
            }
        }

        Ok(records)
    }
}
