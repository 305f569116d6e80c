//! CLI configuration file.
//!
//! ```toml
//! [stack]
//! name = "dev"
//! account = "123456789012"   # optional, defaults to "local"
//!
//! [construct]
//! id = "Mirror"
//! repositoryName = "mirror"
//! srcRepo = "https://example.com/a.git"
//! timeout = "5m"             # optional; "unbounded" disables it
//!
//! [construct.credentials]    # optional, defaults to service-identity
//! strategy = "external-secret"
//! secretName = "git-creds"
//! ```

use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;

use construct::{ConstructError, ConstructId, ForkedRepository, ForkedRepositoryProps, StackContext};

#[derive(Debug, Clone, Deserialize)]
pub struct CliConfig {
    pub stack: StackContext,
    pub construct: ConstructConfig,
}

/// One `ForkedRepository` instance.
#[derive(Debug, Clone, Deserialize)]
pub struct ConstructConfig {
    pub id: ConstructId,
    #[serde(flatten)]
    pub props: ForkedRepositoryProps,
}

impl CliConfig {
    /// Validates the construct against its stack.
    pub fn construct(&self) -> Result<ForkedRepository, ConstructError> {
        ForkedRepository::new(
            self.stack.clone(),
            &self.construct.id,
            self.construct.props.clone(),
        )
    }
}

/// Reads and parses the config file at `path`.
pub fn load_config(path: &Path) -> Result<CliConfig> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {}", path.display()))?;
    parse_config(&raw).with_context(|| format!("invalid config file {}", path.display()))
}

fn parse_config(raw: &str) -> Result<CliConfig> {
    Ok(toml::from_str(raw)?)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use construct::{CredentialStrategy, ExecutorTimeout, SecretName};

    use super::*;

    #[test]
    fn full_config_parses() {
        let config = parse_config(
            r#"
            [stack]
            name = "dev"
            account = "123456789012"

            [construct]
            id = "Mirror"
            repositoryName = "mirror"
            description = "read-only copy"
            srcRepo = "https://example.com/a.git"
            timeout = "90s"
            goBuildFlags = ["-trimpath"]

            [construct.buildArgs]
            GOOS = "linux"

            [construct.credentials]
            strategy = "external-secret"
            secretName = "git-creds"
            "#,
        )
        .unwrap();

        assert_eq!(config.stack.account, "123456789012");
        assert_eq!(config.construct.id.as_str(), "Mirror");
        let props = &config.construct.props;
        assert_eq!(props.timeout, ExecutorTimeout::Bounded(Duration::from_secs(90)));
        assert_eq!(props.build.go_build_flags, vec!["-trimpath"]);
        assert_eq!(props.build.build_args["GOOS"], "linux");
        assert_eq!(
            props.credentials,
            CredentialStrategy::ExternalSecret {
                secret_name: SecretName::new("git-creds").unwrap()
            }
        );
        assert!(config.construct().is_ok());
    }

    #[test]
    fn minimal_config_takes_defaults() {
        let config = parse_config(
            r#"
            [stack]
            name = "dev"

            [construct]
            id = "Mirror"
            repositoryName = "mirror"
            srcRepo = "https://example.com/a.git"
            "#,
        )
        .unwrap();

        assert_eq!(config.stack.account, "local");
        assert_eq!(config.construct.props.timeout, ExecutorTimeout::DEFAULT);
        assert_eq!(
            config.construct.props.credentials,
            CredentialStrategy::default()
        );
    }

    #[test]
    fn external_secret_without_a_name_is_rejected() {
        let result = parse_config(
            r#"
            [stack]
            name = "dev"

            [construct]
            id = "Mirror"
            repositoryName = "mirror"
            srcRepo = "https://example.com/a.git"

            [construct.credentials]
            strategy = "external-secret"
            "#,
        );
        assert!(result.is_err());
    }

    #[test]
    fn blank_source_fails_validation() {
        let config = parse_config(
            r#"
            [stack]
            name = "dev"

            [construct]
            id = "Mirror"
            repositoryName = "mirror"
            srcRepo = "  "
            "#,
        )
        .unwrap();

        assert!(matches!(
            config.construct(),
            Err(ConstructError::InvalidProperty { field: "srcRepo", .. })
        ));
    }

    #[test]
    fn missing_file_mentions_the_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.toml");
        let err = load_config(&path).unwrap_err();
        assert!(format!("{err:#}").contains("absent.toml"));
    }
}
