//! Local backend for plan resources.
//!
//! State lives under one directory:
//!
//! ```text
//! <state>/
//!   repos/<name>.git   bare repository per Repository resource
//!   ledger.json        every created resource, its attributes and details
//! ```
//!
//! Identities are created through an [`IdentityBroker`] so that a fork run
//! later finds them there. Functions, grants, and triggers only exist in the
//! ledger.

use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::process::Command;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument};

use construct::resources::{attributes, RepositorySpec};
use construct::{
    ForkStatus, IdentityBroker, LogicalId, ProvisionError, ResolvedAttributes, Resource,
    ResourceKind, ResourceProvisioner, Timestamp,
};

const LEDGER_FILE: &str = "ledger.json";

/// One created resource as recorded in the ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    #[serde(rename = "type")]
    pub resource_type: String,
    pub created_at: Timestamp,
    pub attributes: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub detail: Value,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct Ledger {
    resources: BTreeMap<LogicalId, LedgerEntry>,
}

/// [`ResourceProvisioner`] writing into a local state directory.
pub struct LocalProvisioner {
    state_dir: PathBuf,
    identities: Arc<dyn IdentityBroker>,
    ledger: Mutex<Ledger>,
}

impl LocalProvisioner {
    /// Opens (creating if needed) the state directory and loads its ledger.
    pub async fn open(
        state_dir: impl Into<PathBuf>,
        identities: Arc<dyn IdentityBroker>,
    ) -> Result<Self, ProvisionError> {
        let state_dir = state_dir.into();
        tokio::fs::create_dir_all(state_dir.join("repos"))
            .await
            .map_err(|e| state_error(&state_dir, e))?;

        let ledger = match tokio::fs::read(state_dir.join(LEDGER_FILE)).await {
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|e| state_error(&state_dir, e))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ledger::default(),
            Err(e) => return Err(state_error(&state_dir, e)),
        };

        Ok(Self {
            state_dir,
            identities,
            ledger: Mutex::new(ledger),
        })
    }

    pub fn state_dir(&self) -> &Path {
        &self.state_dir
    }

    /// Path of the bare repository backing `name`, or `None` when `name` is
    /// not a single plain path segment and would land outside `repos/`.
    pub fn repository_path(&self, name: &str) -> Option<PathBuf> {
        let mut components = Path::new(name).components();
        match (components.next(), components.next()) {
            (Some(Component::Normal(segment)), None) if segment == name => {
                Some(self.state_dir.join("repos").join(format!("{name}.git")))
            }
            _ => None,
        }
    }

    /// The recorded entry for `id`, if created.
    pub async fn entry(&self, id: &LogicalId) -> Option<LedgerEntry> {
        self.ledger.lock().await.resources.get(id).cloned()
    }

    /// Overwrites one attribute of an already created resource.
    pub async fn update_attribute(
        &self,
        id: &LogicalId,
        name: &str,
        value: &str,
    ) -> Result<(), ProvisionError> {
        let mut ledger = self.ledger.lock().await;
        let entry = ledger
            .resources
            .get_mut(id)
            .ok_or_else(|| ProvisionError::Backend {
                id: id.clone(),
                message: "resource has not been created".into(),
            })?;
        entry.attributes.insert(name.to_string(), value.to_string());
        self.persist(&ledger, id).await
    }

    async fn persist(&self, ledger: &Ledger, id: &LogicalId) -> Result<(), ProvisionError> {
        let backend = |message: String| ProvisionError::Backend {
            id: id.clone(),
            message,
        };
        let bytes = serde_json::to_vec_pretty(ledger).map_err(|e| backend(e.to_string()))?;
        let tmp = self.state_dir.join(format!("{LEDGER_FILE}.tmp"));
        tokio::fs::write(&tmp, bytes)
            .await
            .map_err(|e| backend(format!("writing ledger: {e}")))?;
        tokio::fs::rename(&tmp, self.state_dir.join(LEDGER_FILE))
            .await
            .map_err(|e| backend(format!("replacing ledger: {e}")))
    }

    async fn create_repository(
        &self,
        id: &LogicalId,
        spec: &RepositorySpec,
    ) -> Result<(BTreeMap<String, String>, Value), ProvisionError> {
        let path = self
            .repository_path(spec.repository_name.as_str())
            .ok_or_else(|| ProvisionError::Backend {
                id: id.clone(),
                message: format!(
                    "repository name '{}' must be a single path segment",
                    spec.repository_name
                ),
            })?;
        if tokio::fs::try_exists(&path).await.unwrap_or(false) {
            return Err(ProvisionError::AlreadyExists {
                id: id.clone(),
                detail: path.display().to_string(),
            });
        }

        let output = Command::new("git")
            .arg("init")
            .arg("--bare")
            .arg(&path)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| ProvisionError::Backend {
                id: id.clone(),
                message: format!("failed to spawn git: {e}"),
            })?;
        if !output.status.success() {
            return Err(ProvisionError::Backend {
                id: id.clone(),
                message: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        let path = tokio::fs::canonicalize(&path)
            .await
            .map_err(|e| ProvisionError::Backend {
                id: id.clone(),
                message: e.to_string(),
            })?;
        info!(repository = %spec.repository_name, path = %path.display(), "created repository");

        let attrs = BTreeMap::from([
            (
                attributes::CLONE_URL_HTTP.to_string(),
                path.display().to_string(),
            ),
            (
                attributes::NAME.to_string(),
                spec.repository_name.to_string(),
            ),
        ]);
        Ok((attrs, json!({ "description": spec.description })))
    }
}

fn state_error(dir: &Path, e: impl std::fmt::Display) -> ProvisionError {
    ProvisionError::Backend {
        id: LogicalId::new("state").unwrap_or_else(|| unreachable!("literal is not empty")),
        message: format!("state directory {}: {e}", dir.display()),
    }
}

#[async_trait]
impl ResourceProvisioner for LocalProvisioner {
    #[instrument(skip_all, fields(id = %resource.logical_id, kind = ?resource.resource_type()))]
    async fn create(
        &self,
        resource: &Resource,
        resolved: &ResolvedAttributes,
    ) -> Result<BTreeMap<String, String>, ProvisionError> {
        let id = &resource.logical_id;
        if self.ledger.lock().await.resources.contains_key(id) {
            return Err(ProvisionError::AlreadyExists {
                id: id.clone(),
                detail: "recorded in ledger".into(),
            });
        }

        let (attrs, detail) = match &resource.kind {
            ResourceKind::Repository(spec) => self.create_repository(id, spec).await?,
            ResourceKind::Identity(spec) => {
                self.identities
                    .create_user(&spec.user_name)
                    .await
                    .map_err(|e| ProvisionError::Backend {
                        id: id.clone(),
                        message: e.to_string(),
                    })?;
                let attrs = BTreeMap::from([(
                    attributes::NAME.to_string(),
                    spec.user_name.to_string(),
                )]);
                (attrs, Value::Null)
            }
            ResourceKind::Function(spec) => {
                let environment =
                    spec.environment
                        .resolve(resolved)
                        .map_err(|e| ProvisionError::Backend {
                            id: id.clone(),
                            message: e.to_string(),
                        })?;
                let attrs = BTreeMap::from([(attributes::NAME.to_string(), id.to_string())]);
                let detail = json!({
                    "entry": spec.entry,
                    "timeout": spec.timeout.to_string(),
                    "environment": environment,
                });
                (attrs, detail)
            }
            ResourceKind::Grant(spec) => (
                BTreeMap::new(),
                json!({ "grantee": spec.grantee, "statements": spec.statements }),
            ),
            ResourceKind::Trigger(spec) => (
                BTreeMap::from([(
                    attributes::FORK_STATUS.to_string(),
                    ForkStatus::Pending.to_string(),
                )]),
                json!({ "handler": spec.handler, "resources": spec.resources }),
            ),
        };

        let mut ledger = self.ledger.lock().await;
        ledger.resources.insert(
            id.clone(),
            LedgerEntry {
                resource_type: format!("{:?}", resource.resource_type()),
                created_at: Timestamp::now(),
                attributes: attrs.clone(),
                detail,
            },
        );
        self.persist(&ledger, id).await?;
        debug!(attributes = attrs.len(), "recorded resource");
        Ok(attrs)
    }
}

#[cfg(test)]
mod tests {
    use construct::resources::{GrantSpec, IdentitySpec, TriggerSpec};
    use construct::{
        Action, IdentityName, PolicyStatement, RepositoryName, ResourceScope, SecretName,
    };
    use executor::InMemoryIdentityBroker;

    use super::*;

    fn id(s: &str) -> LogicalId {
        LogicalId::new(s).unwrap()
    }

    fn repository(name: &str) -> Resource {
        Resource::new(
            id("Mirror"),
            ResourceKind::Repository(RepositorySpec {
                repository_name: RepositoryName::new(name).unwrap(),
                description: None,
            }),
        )
    }

    async fn open_local(dir: &Path) -> (LocalProvisioner, Arc<InMemoryIdentityBroker>) {
        let broker = Arc::new(InMemoryIdentityBroker::new());
        let provisioner = LocalProvisioner::open(dir, broker.clone()).await.unwrap();
        (provisioner, broker)
    }

    #[tokio::test]
    async fn repository_is_a_bare_repo_whose_path_is_the_clone_url() {
        let dir = tempfile::tempdir().unwrap();
        let (provisioner, _) = open_local(dir.path()).await;

        let attrs = provisioner
            .create(&repository("mirror"), &ResolvedAttributes::new())
            .await
            .unwrap();

        let path = PathBuf::from(&attrs[attributes::CLONE_URL_HTTP]);
        assert!(path.is_absolute());
        assert!(path.join("HEAD").exists());
        assert_eq!(attrs[attributes::NAME], "mirror");
    }

    #[tokio::test]
    async fn repository_names_cannot_escape_the_state_directory() {
        let dir = tempfile::tempdir().unwrap();
        let state = dir.path().join("state");
        let (provisioner, _) = open_local(&state).await;

        for name in ["../../escaped", "..", "nested/escaped", "escaped/", "/tmp/escaped"] {
            let err = provisioner
                .create(&repository(name), &ResolvedAttributes::new())
                .await
                .unwrap_err();
            assert!(
                matches!(err, ProvisionError::Backend { ref message, .. } if message.contains("single path segment")),
                "{name}: {err}"
            );
        }

        assert!(!dir.path().join("escaped.git").exists());
        assert!(!state.join("escaped.git").exists());
        let mut repos = tokio::fs::read_dir(state.join("repos")).await.unwrap();
        assert!(repos.next_entry().await.unwrap().is_none());
        assert!(provisioner.entry(&id("Mirror")).await.is_none());
    }

    #[tokio::test]
    async fn an_existing_repository_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let (provisioner, _) = open_local(dir.path()).await;
        provisioner
            .create(&repository("mirror"), &ResolvedAttributes::new())
            .await
            .unwrap();

        let (reopened, _) = open_local(dir.path()).await;
        let err = reopened
            .create(&repository("mirror"), &ResolvedAttributes::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ProvisionError::AlreadyExists { .. }));
    }

    #[tokio::test]
    async fn identities_are_created_through_the_broker() {
        let dir = tempfile::tempdir().unwrap();
        let (provisioner, broker) = open_local(dir.path()).await;
        let user = IdentityName::new("dev-Mirror-git-user").unwrap();

        provisioner
            .create(
                &Resource::new(
                    id("MirrorGitUser"),
                    ResourceKind::Identity(IdentitySpec {
                        user_name: user.clone(),
                    }),
                ),
                &ResolvedAttributes::new(),
            )
            .await
            .unwrap();

        assert!(broker.has_user(&user));
    }

    #[tokio::test]
    async fn ledger_survives_reopening_and_tracks_status_updates() {
        let dir = tempfile::tempdir().unwrap();
        let (provisioner, _) = open_local(dir.path()).await;
        let grant = Resource::new(
            id("MirrorHandlerPolicy"),
            ResourceKind::Grant(GrantSpec {
                grantee: id("MirrorHandler"),
                statements: vec![PolicyStatement::allow(
                    [Action::GetSecretValue],
                    [ResourceScope::Secret(SecretName::new("s").unwrap())],
                )],
            }),
        );
        let trigger = Resource::new(
            id("MirrorFork"),
            ResourceKind::Trigger(TriggerSpec {
                handler: id("MirrorHandler"),
                resources: vec![id("MirrorHandlerPolicy")],
            }),
        );
        provisioner
            .create(&grant, &ResolvedAttributes::new())
            .await
            .unwrap();
        let attrs = provisioner
            .create(&trigger, &ResolvedAttributes::new())
            .await
            .unwrap();
        assert_eq!(attrs[attributes::FORK_STATUS], "pending");

        provisioner
            .update_attribute(&id("MirrorFork"), attributes::FORK_STATUS, "succeeded")
            .await
            .unwrap();

        let (reopened, _) = open_local(dir.path()).await;
        let entry = reopened.entry(&id("MirrorFork")).await.unwrap();
        assert_eq!(entry.resource_type, "Trigger");
        assert_eq!(entry.attributes[attributes::FORK_STATUS], "succeeded");
        assert!(reopened.entry(&id("MirrorHandlerPolicy")).await.is_some());
    }
}
