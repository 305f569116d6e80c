//! The `ForkedRepository` construct.
//!
//! Synthesizes a plan containing a destination repository, the function that
//! runs the Fork Executor, whatever the credential strategy needs (an
//! identity, a grant), and a trigger that runs the function once every one of
//! those resources has been created.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::credentials::CredentialBinding;
use crate::environment::{AttributeRef, DEST_REPO, SRC_REPO};
use crate::resources::{
    attributes, FunctionSpec, GrantSpec, IdentitySpec, RepositorySpec, Resource, ResourceKind,
    TriggerSpec,
};
use crate::{
    BuildOptions, ConstructError, ConstructId, CredentialStrategy, ExecutionEnvironment,
    ExecutorTimeout, LogicalId, Plan, RepositoryName, StackContext,
};

/// Executor entry point packaged into the function resource.
pub const FORK_ENTRY: &str = "fork";

/// Configuration surface of the construct.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ForkedRepositoryProps {
    /// Name of the destination repository.
    pub repository_name: RepositoryName,

    /// Optional description of the destination repository.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// URL of the repository to copy. Reachability is only checked when the
    /// fork runs.
    pub src_repo: String,

    /// How the executor obtains push access.
    #[serde(default)]
    pub credentials: CredentialStrategy,

    /// Packaging options for the executor (`buildArgs`, `goBuildFlags`).
    #[serde(flatten)]
    pub build: BuildOptions,

    /// Executor time budget.
    #[serde(default)]
    pub timeout: ExecutorTimeout,
}

impl ForkedRepositoryProps {
    /// Props with defaults for everything except the two required values.
    pub fn new(repository_name: RepositoryName, src_repo: impl Into<String>) -> Self {
        Self {
            repository_name,
            description: None,
            src_repo: src_repo.into(),
            credentials: CredentialStrategy::default(),
            build: BuildOptions::default(),
            timeout: ExecutorTimeout::default(),
        }
    }
}

/// A validated construct instance bound to a stack.
#[derive(Debug, Clone)]
pub struct ForkedRepository {
    stack: StackContext,
    props: ForkedRepositoryProps,
    binding: CredentialBinding,
    repository_id: LogicalId,
    identity_id: LogicalId,
    handler_id: LogicalId,
    grant_id: LogicalId,
    trigger_id: LogicalId,
}

impl ForkedRepository {
    /// Validates `props` and fixes every generated name.
    pub fn new(
        stack: StackContext,
        id: &ConstructId,
        props: ForkedRepositoryProps,
    ) -> Result<Self, ConstructError> {
        if props.src_repo.trim().is_empty() {
            return Err(ConstructError::InvalidProperty {
                field: "srcRepo",
                reason: "must not be empty".into(),
            });
        }

        let binding = props.credentials.bind(&stack, id);
        let root = LogicalId::from(id);

        Ok(Self {
            stack,
            binding,
            identity_id: root.child("GitUser"),
            handler_id: root.child("Handler"),
            grant_id: root.child("HandlerPolicy"),
            trigger_id: root.child("Fork"),
            repository_id: root,
            props,
        })
    }

    /// Logical id of the destination repository.
    pub fn repository_id(&self) -> &LogicalId {
        &self.repository_id
    }

    /// Logical id of the executor function.
    pub fn handler_id(&self) -> &LogicalId {
        &self.handler_id
    }

    /// Logical id of the completion trigger.
    pub fn trigger_id(&self) -> &LogicalId {
        &self.trigger_id
    }

    /// The credential binding in effect.
    pub fn binding(&self) -> &CredentialBinding {
        &self.binding
    }

    /// Reference to the destination's push-capable clone URL.
    pub fn clone_url(&self) -> AttributeRef {
        AttributeRef::new(self.repository_id.clone(), attributes::CLONE_URL_HTTP)
    }

    /// Reference to the outcome of the fork run.
    pub fn fork_status(&self) -> AttributeRef {
        AttributeRef::new(self.trigger_id.clone(), attributes::FORK_STATUS)
    }

    /// The environment rendered into the function resource.
    pub fn environment(&self) -> ExecutionEnvironment {
        let mut env = ExecutionEnvironment::new();
        env.insert(SRC_REPO, self.props.src_repo.clone());
        env.insert(DEST_REPO, self.clone_url());
        if let Some((key, value)) = self.binding.environment_entry() {
            env.insert(key, value);
        }
        env
    }

    /// Synthesizes the construct's resources and outputs into a new plan.
    pub fn synthesize(&self) -> Result<Plan, ConstructError> {
        let mut plan = Plan::new(self.stack.clone());
        self.synthesize_into(&mut plan)?;
        Ok(plan)
    }

    /// Adds the construct's resources and outputs to an existing plan.
    pub fn synthesize_into(&self, plan: &mut Plan) -> Result<(), ConstructError> {
        plan.add(Resource::new(
            self.repository_id.clone(),
            ResourceKind::Repository(RepositorySpec {
                repository_name: self.props.repository_name.clone(),
                description: self.props.description.clone(),
            }),
        ))?;

        // Everything the executor needs in place before it runs.
        let mut prerequisites = vec![self.repository_id.clone()];

        if let Some(user_name) = self.binding.provisioned_identity() {
            plan.add(Resource::new(
                self.identity_id.clone(),
                ResourceKind::Identity(IdentitySpec {
                    user_name: user_name.clone(),
                }),
            ))?;
            prerequisites.push(self.identity_id.clone());
        }

        plan.add(Resource::new(
            self.handler_id.clone(),
            ResourceKind::Function(FunctionSpec {
                entry: FORK_ENTRY.to_string(),
                timeout: self.props.timeout,
                environment: self.environment(),
                build: self.props.build.clone(),
            }),
        ))?;

        let mut grant = Resource::new(
            self.grant_id.clone(),
            ResourceKind::Grant(GrantSpec {
                grantee: self.handler_id.clone(),
                statements: self.binding.executor_statements(&self.repository_id),
            }),
        );
        if self.binding.provisioned_identity().is_some() {
            grant = grant.depends_on(self.identity_id.clone());
        }
        plan.add(grant)?;
        prerequisites.push(self.grant_id.clone());

        plan.add(Resource::new(
            self.trigger_id.clone(),
            ResourceKind::Trigger(TriggerSpec {
                handler: self.handler_id.clone(),
                resources: prerequisites,
            }),
        ))?;

        plan.add_output(attributes::CLONE_URL_HTTP, self.clone_url());
        plan.add_output(attributes::FORK_STATUS, self.fork_status());

        debug!(
            construct = %self.repository_id,
            strategy = ?self.binding,
            resources = plan.resources().len(),
            "synthesized forked repository"
        );

        plan.validate()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;
    use std::time::Duration;

    use super::*;
    use crate::credentials::{Action, ResourceScope};
    use crate::environment::{DEST_SECRET, USER_NAME};
    use crate::resources::ResourceType;
    use crate::{EnvValue, IdentityName, SecretName, StackName};

    fn stack() -> StackContext {
        StackContext::new(StackName::new("dev").unwrap(), "123456789012")
    }

    fn props(strategy: CredentialStrategy) -> ForkedRepositoryProps {
        ForkedRepositoryProps {
            credentials: strategy,
            ..ForkedRepositoryProps::new(
                RepositoryName::new("mirror").unwrap(),
                "https://example.com/a.git",
            )
        }
    }

    fn synthesize(strategy: CredentialStrategy) -> (ForkedRepository, Plan) {
        let construct =
            ForkedRepository::new(stack(), &ConstructId::new("Mirror").unwrap(), props(strategy))
                .unwrap();
        let plan = construct.synthesize().unwrap();
        (construct, plan)
    }

    fn all_strategies() -> Vec<CredentialStrategy> {
        vec![
            CredentialStrategy::AmbientPrincipal,
            CredentialStrategy::default(),
            CredentialStrategy::external_secret("git-creds").unwrap(),
        ]
    }

    fn function(plan: &Plan) -> &FunctionSpec {
        match &plan.of_type(ResourceType::Function).next().unwrap().kind {
            ResourceKind::Function(f) => f,
            other => panic!("expected function, got {other:?}"),
        }
    }

    fn grant(plan: &Plan) -> &GrantSpec {
        match &plan.of_type(ResourceType::Grant).next().unwrap().kind {
            ResourceKind::Grant(g) => g,
            other => panic!("expected grant, got {other:?}"),
        }
    }

    #[test]
    fn default_props_produce_one_repository_one_function_one_trigger() {
        let (construct, plan) = synthesize(CredentialStrategy::default());

        assert_eq!(plan.of_type(ResourceType::Repository).count(), 1);
        assert_eq!(plan.of_type(ResourceType::Function).count(), 1);
        assert_eq!(plan.of_type(ResourceType::Trigger).count(), 1);

        assert_eq!(
            function(&plan).timeout.as_duration(),
            Some(Duration::from_secs(300))
        );

        let trigger = plan.of_type(ResourceType::Trigger).next().unwrap();
        match &trigger.kind {
            ResourceKind::Trigger(t) => {
                assert_eq!(&t.handler, construct.handler_id());
                assert!(t.resources.contains(construct.repository_id()));
            }
            other => panic!("expected trigger, got {other:?}"),
        }
    }

    #[test]
    fn every_strategy_renders_source_and_destination() {
        for strategy in all_strategies() {
            let (construct, plan) = synthesize(strategy.clone());
            let env = &function(&plan).environment;
            assert!(env.has_repositories(), "{}", strategy.label());
            assert_eq!(
                env.get(SRC_REPO),
                Some(&EnvValue::from("https://example.com/a.git"))
            );
            assert_eq!(env.get(DEST_REPO), Some(&EnvValue::from(construct.clone_url())));
            assert!(!(env.contains(USER_NAME) && env.contains(DEST_SECRET)));
        }
    }

    #[test]
    fn service_identity_grants_rotation_on_exactly_its_identity() {
        let (construct, plan) = synthesize(CredentialStrategy::default());
        let identity = construct.binding().provisioned_identity().unwrap().clone();

        assert_eq!(plan.of_type(ResourceType::Identity).count(), 1);
        let grant = grant(&plan);
        assert_eq!(&grant.grantee, construct.handler_id());
        assert_eq!(grant.statements.len(), 1);
        assert_eq!(
            grant.statements[0].resources,
            vec![ResourceScope::Identity(identity.clone())]
        );
        assert_eq!(
            grant.statements[0].actions,
            Action::IDENTITY_ROTATION.into_iter().collect::<BTreeSet<_>>()
        );
        assert_eq!(
            function(&plan).environment.get(USER_NAME),
            Some(&EnvValue::from(identity.as_str()))
        );
    }

    #[test]
    fn external_secret_creates_no_identity() {
        let (construct, plan) = synthesize(CredentialStrategy::external_secret("git-creds").unwrap());

        assert_eq!(plan.of_type(ResourceType::Identity).count(), 0);
        let grant = grant(&plan);
        let scopes: Vec<&ResourceScope> =
            grant.statements.iter().flat_map(|s| &s.resources).collect();
        assert_eq!(
            scopes,
            vec![
                &ResourceScope::Secret(SecretName::new("git-creds").unwrap()),
                &ResourceScope::Repository(construct.repository_id().clone()),
            ]
        );
        assert!(plan
            .get(&construct.grant_id)
            .unwrap()
            .dependencies()
            .contains(construct.repository_id()));
        assert_eq!(
            function(&plan).environment.get(DEST_SECRET),
            Some(&EnvValue::from("git-creds"))
        );
    }

    #[test]
    fn ambient_principal_uses_the_wildcard_scope() {
        let (_, plan) = synthesize(CredentialStrategy::AmbientPrincipal);
        assert_eq!(plan.of_type(ResourceType::Identity).count(), 0);

        let grant = grant(&plan);
        assert_eq!(grant.statements.len(), 1);
        assert_eq!(grant.statements[0].resources, vec![ResourceScope::AllIdentities]);
        assert_eq!(grant.statements[0].actions.len(), 6);
    }

    #[test]
    fn trigger_runs_after_every_prerequisite() {
        let (construct, plan) = synthesize(CredentialStrategy::default());
        let order: Vec<&LogicalId> = plan
            .creation_order()
            .unwrap()
            .into_iter()
            .map(|r| &r.logical_id)
            .collect();

        assert_eq!(order.last(), Some(&construct.trigger_id()));
        let position = |id: &LogicalId| order.iter().position(|o| *o == id).unwrap();
        assert!(position(construct.repository_id()) < position(construct.handler_id()));
    }

    #[test]
    fn empty_source_is_a_configuration_error() {
        let mut props = props(CredentialStrategy::default());
        props.src_repo = "   ".into();
        let err = ForkedRepository::new(stack(), &ConstructId::new("Mirror").unwrap(), props)
            .unwrap_err();
        assert!(matches!(err, ConstructError::InvalidProperty { field: "srcRepo", .. }));
    }

    #[test]
    fn template_carries_types_timeout_and_outputs() {
        let (_, plan) = synthesize(CredentialStrategy::default());
        let template = plan.to_template().unwrap();

        assert_eq!(template["Resources"]["Mirror"]["Type"], "Forked::Repository");
        assert_eq!(
            template["Resources"]["MirrorHandler"]["Properties"]["Timeout"],
            300
        );
        assert_eq!(
            template["Resources"]["MirrorHandler"]["Properties"]["Environment"]["DEST_REPO"],
            serde_json::json!({"GetAtt": ["Mirror", "CloneUrlHttp"]})
        );
        assert_eq!(
            template["Outputs"]["ForkStatus"]["Value"],
            serde_json::json!({"GetAtt": ["MirrorFork", "ForkStatus"]})
        );
    }

    #[test]
    fn props_deserialise_from_the_config_surface() {
        let props: ForkedRepositoryProps = toml::from_str(
            r#"
            repositoryName = "mirror"
            srcRepo = "https://example.com/a.git"
            goBuildFlags = ["-trimpath"]
            timeout = "unbounded"

            [buildArgs]
            CGO_ENABLED = "0"

            [credentials]
            strategy = "service-identity"
            identityName = "mirror-bot"
            "#,
        )
        .unwrap();

        assert_eq!(props.timeout, ExecutorTimeout::Unbounded);
        assert_eq!(props.build.go_build_flags, vec!["-trimpath".to_string()]);
        assert_eq!(props.build.build_args["CGO_ENABLED"], "0");
        assert_eq!(
            props.credentials,
            CredentialStrategy::ServiceIdentity {
                identity_name: IdentityName::new("mirror-bot"),
            }
        );
    }

    #[test]
    fn external_secret_without_secret_name_fails_to_parse() {
        let result: Result<ForkedRepositoryProps, _> = toml::from_str(
            r#"
            repositoryName = "mirror"
            srcRepo = "https://example.com/a.git"

            [credentials]
            strategy = "external-secret"
            "#,
        );
        assert!(result.is_err());
    }
}
