//! ServiceAccount Mutation Planner
//!
//! A ServiceAccount annotated with `<prefix>/access: <name>` gets the
//! provider-supplied annotation published in the named ExternalSecretAccess's
//! status (for example an IAM role binding annotation).

use std::sync::Arc;

use async_trait::async_trait;
use json_patch::Patch;
use k8s_openapi::api::core::v1::ServiceAccount;
use kube::ResourceExt;
use tracing::{debug, info};

use crate::annotations::AnnotationScheme;
use crate::crd::{AccessPolicy, ResourceKind};
use crate::lookup::ResourceReader;
use crate::mutator::{decode_object, effective_namespace, Mutator};
use crate::patch::compute_patch;
use crate::{Error, Result};

/// Mutator for ServiceAccounts referencing an ExternalSecretAccess
pub struct ServiceAccountMutator {
    reader: Arc<dyn ResourceReader>,
    scheme: AnnotationScheme,
}

impl ServiceAccountMutator {
    /// Create a ServiceAccount mutator
    pub fn new(reader: Arc<dyn ResourceReader>, scheme: AnnotationScheme) -> Self {
        Self { reader, scheme }
    }

    /// Mutate `sa` in place. Returns `false` when it does not request access.
    pub async fn mutate_service_account(
        &self,
        sa: &mut ServiceAccount,
        request_namespace: Option<&str>,
    ) -> Result<bool> {
        let Some(access_name) = sa
            .metadata
            .annotations
            .as_ref()
            .and_then(|a| a.get(&self.scheme.access_key()))
            .cloned()
        else {
            debug!(service_account = %sa.name_any(), "No access annotation, skipping");
            return Ok(false);
        };

        let namespace = effective_namespace(sa.metadata.namespace.as_deref(), request_namespace)
            .ok_or_else(|| Error::decode("service account has no namespace"))?;

        let obj = self
            .reader
            .get(ResourceKind::ExternalSecretAccess, &namespace, &access_name)
            .await?;
        let policy = AccessPolicy::from_object(&obj)?;

        if let Some((key, value)) = policy.annotation()? {
            info!(
                service_account = %sa.name_any(),
                namespace = %namespace,
                access = %access_name,
                annotation = %key,
                "Applying provider annotation"
            );
            sa.annotations_mut().insert(key, value);
        }
        Ok(true)
    }
}

#[async_trait]
impl Mutator for ServiceAccountMutator {
    async fn mutate(&self, raw: &[u8], request_namespace: Option<&str>) -> Result<Option<Patch>> {
        let mut sa: ServiceAccount = decode_object("service account", raw)?;
        let original = sa.clone();

        if !self.mutate_service_account(&mut sa, request_namespace).await? {
            return Ok(None);
        }
        compute_patch(&original, &sa)
    }
}
