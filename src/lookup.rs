//! Secret Reference Loader
//!
//! Resolves each requested secret against its ExternalSecret in the cluster.
//! One read per secret, no caching: every admission request starts from the
//! current cluster state.

use async_trait::async_trait;
use kube::api::{Api, DynamicObject};
use kube::Client;
use tracing::debug;

#[cfg(test)]
use mockall::automock;

use crate::annotations::SecretRequest;
use crate::config::{ProviderSecretSet, SecretConfig};
use crate::crd::{ResourceKind, SecretReference};
use crate::{Error, Result};

/// Read access to the webhook's custom resources
///
/// Production uses [`KubeReader`]; tests substitute a mock or an in-memory fake.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ResourceReader: Send + Sync {
    /// Get the resource `name` of `kind` in `namespace`
    ///
    /// A missing resource is reported as [`Error::Retrieval`].
    async fn get(&self, kind: ResourceKind, namespace: &str, name: &str) -> Result<DynamicObject>;
}

/// [`ResourceReader`] backed by the Kubernetes API
#[derive(Clone)]
pub struct KubeReader {
    client: Client,
}

impl KubeReader {
    /// Create a reader using the given client
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ResourceReader for KubeReader {
    async fn get(&self, kind: ResourceKind, namespace: &str, name: &str) -> Result<DynamicObject> {
        let api: Api<DynamicObject> =
            Api::namespaced_with(self.client.clone(), namespace, &kind.api_resource());

        match api.get(name).await {
            Ok(obj) => Ok(obj),
            Err(kube::Error::Api(e)) if e.code == 404 => Err(Error::retrieval(format!(
                "{kind} {namespace}/{name} not found"
            ))),
            Err(e) => Err(e.into()),
        }
    }
}

/// Build the [`SecretConfig`] for one annotation request
///
/// The ExternalSecret is looked up in the request's namespace override, or in
/// `object_namespace` when there is none.
pub async fn load_secret_config(
    reader: &dyn ResourceReader,
    request: &SecretRequest,
    object_namespace: &str,
) -> Result<SecretConfig> {
    let namespace = request.namespace.as_deref().unwrap_or(object_namespace);
    let obj = reader
        .get(ResourceKind::ExternalSecret, namespace, &request.name)
        .await?;
    let reference = SecretReference::from_object(&obj)?;

    debug!(
        secret = %request.name,
        namespace = %namespace,
        provider = %reference.provider,
        "Resolved ExternalSecret"
    );

    Ok(SecretConfig {
        name: reference.name,
        provider: reference.provider,
        template: request.template.clone(),
        target: request.target.clone(),
        namespace: request.namespace.clone(),
    })
}

/// Resolve every request and group the results by provider
///
/// The first failing lookup aborts the whole set.
pub async fn load_secret_set(
    reader: &dyn ResourceReader,
    requests: &[SecretRequest],
    object_namespace: &str,
) -> Result<ProviderSecretSet> {
    let mut set = ProviderSecretSet::new();
    for request in requests {
        set.insert(load_secret_config(reader, request, object_namespace).await?);
    }
    Ok(set)
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockall::predicate::eq;
    use serde_json::json;

    fn external_secret(name: &str, namespace: &str, provider: &str) -> DynamicObject {
        let mut obj = DynamicObject::new(name, &ResourceKind::ExternalSecret.api_resource())
            .within(namespace);
        obj.data = json!({"spec": {"provider": provider}, "status": {"name": name}});
        obj
    }

    fn request(name: &str) -> SecretRequest {
        SecretRequest {
            name: name.to_string(),
            template: None,
            target: format!("/var/run/secrets/orbitops.dev/{name}"),
            namespace: None,
        }
    }

    #[tokio::test]
    async fn loads_from_object_namespace_by_default() {
        let mut reader = MockResourceReader::new();
        reader
            .expect_get()
            .with(eq(ResourceKind::ExternalSecret), eq("apps"), eq("db"))
            .times(1)
            .returning(|_, ns, name| Ok(external_secret(name, ns, "aws")));

        let cfg = load_secret_config(&reader, &request("db"), "apps").await.unwrap();
        assert_eq!(cfg.name, "db");
        assert_eq!(cfg.provider, "aws");
        assert_eq!(cfg.target, "/var/run/secrets/orbitops.dev/db");
        assert_eq!(cfg.namespace, None);
    }

    #[tokio::test]
    async fn namespace_override_is_used_and_recorded() {
        let mut reader = MockResourceReader::new();
        reader
            .expect_get()
            .with(eq(ResourceKind::ExternalSecret), eq("shared"), eq("db"))
            .times(1)
            .returning(|_, ns, name| Ok(external_secret(name, ns, "gcp")));

        let mut req = request("db");
        req.namespace = Some("shared".to_string());
        req.template = Some("{{ .value }}".to_string());

        let cfg = load_secret_config(&reader, &req, "apps").await.unwrap();
        assert_eq!(cfg.provider, "gcp");
        assert_eq!(cfg.namespace.as_deref(), Some("shared"));
        assert_eq!(cfg.template.as_deref(), Some("{{ .value }}"));
    }

    #[tokio::test]
    async fn missing_resource_propagates_retrieval_error() {
        let mut reader = MockResourceReader::new();
        reader
            .expect_get()
            .returning(|kind, ns, name| Err(Error::retrieval(format!("{kind} {ns}/{name} not found"))));

        let err = load_secret_config(&reader, &request("db"), "apps")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Retrieval(_)));
        assert!(err.to_string().contains("externalsecrets apps/db"));
    }

    #[tokio::test]
    async fn malformed_resource_is_schema_error() {
        let mut reader = MockResourceReader::new();
        reader.expect_get().returning(|_, ns, name| {
            let mut obj = external_secret(name, ns, "aws");
            obj.data = json!({"spec": {"provider": "aws"}});
            Ok(obj)
        });

        let err = load_secret_config(&reader, &request("db"), "apps")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Schema(_)));
    }

    #[tokio::test]
    async fn secret_set_groups_results() {
        let mut reader = MockResourceReader::new();
        reader.expect_get().times(3).returning(|_, ns, name| {
            let provider = if name == "cache" { "gcp" } else { "aws" };
            Ok(external_secret(name, ns, provider))
        });

        let set = load_secret_set(&reader, &[request("db"), request("cache"), request("api")], "apps")
            .await
            .unwrap();
        assert_eq!(set.provider_count(), 2);
    }

    #[tokio::test]
    async fn secret_set_stops_at_first_failure() {
        let mut reader = MockResourceReader::new();
        reader
            .expect_get()
            .times(1)
            .returning(|_, _, name| Err(Error::retrieval(format!("{name} not found"))));

        let result = load_secret_set(&reader, &[request("db"), request("api")], "apps").await;
        assert!(result.is_err());
    }
}
