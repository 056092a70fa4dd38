//! Typed views of the custom resources the webhook reads
//!
//! ExternalSecret and ExternalSecretAccess are owned by another controller;
//! the webhook only reads a handful of fields from them. Fetched objects are
//! `DynamicObject`s and are decoded here into small typed structs, so a missing
//! or mistyped field becomes a schema error instead of a runtime cast failure.

use std::fmt;

use kube::api::{ApiResource, DynamicObject, GroupVersionKind};
use kube::ResourceExt;
use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::{Error, Result};

/// API group of the secretsbeam custom resources
pub const CRD_GROUP: &str = "orbitops.dev";

/// API version of the secretsbeam custom resources
pub const CRD_VERSION: &str = "v1alpha1";

/// The custom resource kinds the webhook reads
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ResourceKind {
    /// `externalsecrets.orbitops.dev`, referenced from Pod annotations
    ExternalSecret,
    /// `externalsecretaccesses.orbitops.dev`, referenced from ServiceAccount annotations
    ExternalSecretAccess,
}

impl ResourceKind {
    /// Kind name as it appears in manifests
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ExternalSecret => "ExternalSecret",
            Self::ExternalSecretAccess => "ExternalSecretAccess",
        }
    }

    /// Plural resource name used in API paths
    pub fn plural(&self) -> &'static str {
        match self {
            Self::ExternalSecret => "externalsecrets",
            Self::ExternalSecretAccess => "externalsecretaccesses",
        }
    }

    /// `ApiResource` for a dynamic `Api<DynamicObject>`
    pub fn api_resource(&self) -> ApiResource {
        let gvk = GroupVersionKind::gvk(CRD_GROUP, CRD_VERSION, self.kind());
        ApiResource::from_gvk_with_plural(&gvk, self.plural())
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.plural())
    }
}

fn decode_fields<T: DeserializeOwned>(kind: ResourceKind, obj: &DynamicObject) -> Result<T> {
    serde_json::from_value(obj.data.clone()).map_err(|e| {
        Error::schema(format!(
            "{} {}/{}: {}",
            kind,
            obj.namespace().unwrap_or_default(),
            obj.name_any(),
            e
        ))
    })
}

// =============================================================================
// ExternalSecret
// =============================================================================

#[derive(Deserialize)]
struct ExternalSecretFields {
    spec: ExternalSecretSpec,
    status: ExternalSecretStatus,
}

#[derive(Deserialize)]
struct ExternalSecretSpec {
    provider: String,
}

#[derive(Deserialize)]
struct ExternalSecretStatus {
    name: String,
}

/// Canonical fields of an ExternalSecret: `status.name` and `spec.provider`
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SecretReference {
    /// Secret name in the provider backend
    pub name: String,
    /// Provider identifier or agent image
    pub provider: String,
}

impl SecretReference {
    /// Decode from a fetched ExternalSecret
    pub fn from_object(obj: &DynamicObject) -> Result<Self> {
        let fields: ExternalSecretFields = decode_fields(ResourceKind::ExternalSecret, obj)?;
        Ok(Self {
            name: fields.status.name,
            provider: fields.spec.provider,
        })
    }
}

// =============================================================================
// ExternalSecretAccess
// =============================================================================

#[derive(Deserialize)]
struct AccessFields {
    #[serde(default)]
    status: Option<AccessStatus>,
}

#[derive(Deserialize)]
struct AccessStatus {
    provider: AccessProvider,
}

#[derive(Deserialize)]
struct AccessProvider {
    #[serde(rename = "ServiceAccountAnnotation", default)]
    service_account_annotation: Option<String>,
}

/// Reconciled state of an ExternalSecretAccess
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AccessPolicy {
    /// `key=value` annotation the provider wants on the ServiceAccount
    pub service_account_annotation: Option<String>,
}

impl AccessPolicy {
    /// Decode from a fetched ExternalSecretAccess
    ///
    /// A missing `status` means the resource has not been reconciled yet, which
    /// is an error: the ServiceAccount asked for access explicitly.
    pub fn from_object(obj: &DynamicObject) -> Result<Self> {
        let fields: AccessFields = decode_fields(ResourceKind::ExternalSecretAccess, obj)?;
        let status = fields.status.ok_or_else(|| {
            Error::schema(format!(
                "{} {}/{} has no status",
                ResourceKind::ExternalSecretAccess,
                obj.namespace().unwrap_or_default(),
                obj.name_any()
            ))
        })?;

        Ok(Self {
            service_account_annotation: status.provider.service_account_annotation,
        })
    }

    /// The annotation as a `(key, value)` pair, split on the first `=`
    pub fn annotation(&self) -> Result<Option<(String, String)>> {
        let Some(raw) = self.service_account_annotation.as_deref() else {
            return Ok(None);
        };

        match raw.split_once('=') {
            Some((key, value)) if !key.trim().is_empty() => {
                Ok(Some((key.trim().to_string(), value.to_string())))
            }
            _ => Err(Error::schema(format!(
                "ServiceAccountAnnotation '{raw}' is not a key=value pair"
            ))),
        }
    }
}
