//! Secret configuration handed to the injected agent
//!
//! The agent receives `--config <base64 of JSON array of SecretConfig>`. The
//! JSON field names are part of that contract: renaming a field breaks every
//! agent image already in use.

use std::collections::BTreeMap;

use base64::{engine::general_purpose::STANDARD, Engine};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::{Error, Result};

/// Provider identifier for AWS Secrets Manager
pub const PROVIDER_AWS: &str = "aws";
/// Provider identifier for GCP Secret Manager
pub const PROVIDER_GCP: &str = "gcp";
/// Provider identifier for Azure Key Vault
pub const PROVIDER_AZURE: &str = "azure";

/// A single secret the agent must materialize
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "PascalCase")]
pub struct SecretConfig {
    /// Secret name in the provider backend (`status.name` of the ExternalSecret)
    pub name: String,
    /// Provider identifier (`spec.provider` of the ExternalSecret)
    pub provider: String,
    /// Optional rendering template
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template: Option<String>,
    /// Absolute path the secret is written to
    pub target: String,
    /// Namespace override used to find the ExternalSecret
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

/// Secrets of one request grouped by provider
///
/// Providers iterate in sorted order so the generated init containers are
/// stable across resubmissions.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ProviderSecretSet {
    by_provider: BTreeMap<String, Vec<SecretConfig>>,
}

impl ProviderSecretSet {
    /// Create an empty set
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a secret under its provider. A second entry with the same
    /// (provider, name, target) is dropped; the same secret written to
    /// another target is kept.
    pub fn insert(&mut self, config: SecretConfig) {
        let secrets = self.by_provider.entry(config.provider.clone()).or_default();
        if secrets
            .iter()
            .any(|s| s.name == config.name && s.target == config.target)
        {
            warn!(
                provider = %config.provider,
                secret = %config.name,
                target = %config.target,
                "Secret requested more than once for the same target, keeping the first request"
            );
            return;
        }
        secrets.push(config);
    }

    /// Iterate `(provider, secrets)` in provider order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &[SecretConfig])> {
        self.by_provider
            .iter()
            .map(|(provider, secrets)| (provider.as_str(), secrets.as_slice()))
    }

    /// Number of distinct providers
    pub fn provider_count(&self) -> usize {
        self.by_provider.len()
    }

    /// True when no secret was requested
    pub fn is_empty(&self) -> bool {
        self.by_provider.is_empty()
    }
}

impl FromIterator<SecretConfig> for ProviderSecretSet {
    fn from_iter<I: IntoIterator<Item = SecretConfig>>(iter: I) -> Self {
        let mut set = Self::new();
        for config in iter {
            set.insert(config);
        }
        set
    }
}

/// Agent images for the well-known providers, read once at startup
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AgentImages {
    /// Image for provider `aws` (`AWS_AGENT_IMAGE`)
    pub aws: Option<String>,
    /// Image for provider `gcp` (`GCP_AGENT_IMAGE`)
    pub gcp: Option<String>,
    /// Image for provider `azure` (`AZURE_AGENT_IMAGE`)
    pub azure: Option<String>,
}

impl AgentImages {
    /// Whether `provider` is one of the well-known identifiers
    pub fn is_well_known(provider: &str) -> bool {
        matches!(provider, PROVIDER_AWS | PROVIDER_GCP | PROVIDER_AZURE)
    }

    /// Image for `provider`; any unrecognised provider string is itself the image
    pub fn resolve(&self, provider: &str) -> Result<String> {
        let configured = match provider {
            PROVIDER_AWS => &self.aws,
            PROVIDER_GCP => &self.gcp,
            PROVIDER_AZURE => &self.azure,
            other => return Ok(other.to_string()),
        };

        configured
            .as_deref()
            .filter(|image| !image.is_empty())
            .map(str::to_string)
            .ok_or_else(|| Error::config(format!("no agent image configured for provider '{provider}'")))
    }
}

/// Encode a provider's secrets as the agent's `--config` argument
pub fn encode_agent_config(secrets: &[SecretConfig]) -> Result<String> {
    let json = serde_json::to_vec(secrets)
        .map_err(|e| Error::serialization(format!("encoding secret config: {e}")))?;
    Ok(STANDARD.encode(json))
}

/// Decode an agent `--config` argument back into secret configs
pub fn decode_agent_config(blob: &str) -> Result<Vec<SecretConfig>> {
    let json = STANDARD
        .decode(blob)
        .map_err(|e| Error::decode(format!("agent config is not base64: {e}")))?;
    serde_json::from_slice(&json).map_err(|e| Error::decode(format!("agent config is not valid JSON: {e}")))
}
