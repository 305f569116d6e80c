//! Applying a plan.
//!
//! [`Deployment::apply`] arms one [`AfterCreate`] per trigger resource, then
//! creates every resource in dependency order, feeding each creation to the
//! armed triggers. Fork runs proceed on their own tasks; the returned
//! [`DeploymentReport`] can wait for them.

use std::collections::BTreeMap;
use std::sync::Arc;

use thiserror::Error;
use tracing::{info, instrument};

use construct::resources::attributes;
use construct::{
    ConstructError, EnvValue, ForkHandler, ForkReport, ForkStatus, LogicalId, Plan,
    ProvisionError, ResolvedAttributes, ResourceKind, ResourceProvisioner, ResourceType,
    StatusReporter,
};

use crate::after_create::AfterCreate;

/// Errors that abort an apply.
#[derive(Debug, Error)]
pub enum DeployError {
    #[error(transparent)]
    Plan(#[from] ConstructError),

    #[error(transparent)]
    Provision(#[from] ProvisionError),

    #[error("Trigger '{trigger}' names '{handler}' as its handler, which is not a function")]
    InvalidHandler {
        trigger: LogicalId,
        handler: LogicalId,
    },
}

/// Applies plans against one provisioner, running forks through one handler.
pub struct Deployment {
    provisioner: Arc<dyn ResourceProvisioner>,
    handler: Arc<dyn ForkHandler>,
    reporter: Arc<dyn StatusReporter>,
}

impl Deployment {
    pub fn new(
        provisioner: Arc<dyn ResourceProvisioner>,
        handler: Arc<dyn ForkHandler>,
        reporter: Arc<dyn StatusReporter>,
    ) -> Self {
        Self {
            provisioner,
            handler,
            reporter,
        }
    }

    /// Creates every resource of `plan`.
    ///
    /// The first provisioning failure aborts the apply. Triggers whose
    /// prerequisites were all created before the failure have already fired.
    #[instrument(skip_all, fields(stack = %plan.stack().name, resources = plan.resources().len()))]
    pub async fn apply(&self, plan: &Plan) -> Result<DeploymentReport, DeployError> {
        let order = plan.creation_order()?;
        let triggers = self.arm_triggers(plan)?;

        let mut resolved = ResolvedAttributes::new();
        for resource in order {
            let produced = self.provisioner.create(resource, &resolved).await?;
            resolved.insert(resource.logical_id.clone(), produced);
            for trigger in &triggers {
                trigger.resource_created(&resource.logical_id, &resolved);
            }
        }

        info!(triggers = triggers.len(), "plan applied");
        Ok(DeploymentReport {
            attributes: resolved,
            outputs: plan.outputs().clone(),
            triggers,
        })
    }

    fn arm_triggers(&self, plan: &Plan) -> Result<Vec<Arc<AfterCreate>>, DeployError> {
        plan.of_type(ResourceType::Trigger)
            .filter_map(|resource| match &resource.kind {
                ResourceKind::Trigger(spec) => Some((&resource.logical_id, spec)),
                _ => None,
            })
            .map(|(trigger, spec)| {
                let function = plan.get(&spec.handler).and_then(|r| match &r.kind {
                    ResourceKind::Function(f) => Some(f),
                    _ => None,
                });
                let Some(function) = function else {
                    return Err(DeployError::InvalidHandler {
                        trigger: trigger.clone(),
                        handler: spec.handler.clone(),
                    });
                };

                let waits_for = spec
                    .resources
                    .iter()
                    .cloned()
                    .chain(std::iter::once(spec.handler.clone()));
                Ok(AfterCreate::new(
                    trigger.clone(),
                    waits_for,
                    self.handler.clone(),
                    function.environment.clone(),
                    self.reporter.clone(),
                ))
            })
            .collect()
    }
}

/// What an apply produced, plus handles on the fork runs it started.
pub struct DeploymentReport {
    attributes: ResolvedAttributes,
    outputs: BTreeMap<String, EnvValue>,
    triggers: Vec<Arc<AfterCreate>>,
}

impl DeploymentReport {
    pub fn triggers(&self) -> &[Arc<AfterCreate>] {
        &self.triggers
    }

    /// Attributes of every created resource, with each trigger's
    /// `ForkStatus` reflecting its run right now.
    pub fn attributes(&self) -> ResolvedAttributes {
        let mut current = self.attributes.clone();
        for trigger in &self.triggers {
            current.insert(
                trigger.id().clone(),
                BTreeMap::from([(
                    attributes::FORK_STATUS.to_string(),
                    trigger.status().status.to_string(),
                )]),
            );
        }
        current
    }

    /// Resolved plan outputs.
    pub fn outputs(&self) -> Result<BTreeMap<String, String>, ConstructError> {
        let current = self.attributes();
        self.outputs
            .iter()
            .map(|(name, value)| Ok((name.clone(), current.resolve(value)?)))
            .collect()
    }

    /// Latest report of every trigger.
    pub fn fork_reports(&self) -> Vec<ForkReport> {
        self.triggers.iter().map(|t| t.status()).collect()
    }

    /// Waits for every fired trigger's run to finish.
    ///
    /// Triggers that never fired are returned as they are.
    pub async fn wait_for_forks(&self) -> Vec<ForkReport> {
        let mut reports = Vec::with_capacity(self.triggers.len());
        for trigger in &self.triggers {
            let report = if trigger.has_fired() {
                trigger.wait_for_completion().await
            } else {
                trigger.status()
            };
            reports.push(report);
        }
        reports
    }

    /// `true` when every trigger's run has succeeded.
    pub fn succeeded(&self) -> bool {
        self.triggers
            .iter()
            .all(|t| t.status().status == ForkStatus::Succeeded)
    }
}
