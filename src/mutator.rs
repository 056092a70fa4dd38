//! Entry point shared by the Pod and ServiceAccount mutators

use async_trait::async_trait;
use json_patch::Patch;
use serde::de::DeserializeOwned;

use crate::patch::patch_bytes;
use crate::{Error, Result};

/// A mutation engine for one object kind
///
/// Implementations hold no per-request state, so one instance serves
/// concurrent requests. Dropping the returned future abandons any cluster
/// reads still in flight.
#[async_trait]
pub trait Mutator: Send + Sync {
    /// Mutate the serialized object `raw`
    ///
    /// `request_namespace` is the admission request's namespace, used when the
    /// object carries none yet. Returns `None` when the object is left as is.
    async fn mutate(&self, raw: &[u8], request_namespace: Option<&str>) -> Result<Option<Patch>>;

    /// Like [`Mutator::mutate`], returning the patch as bytes (empty for no change)
    async fn mutate_bytes(&self, raw: &[u8], request_namespace: Option<&str>) -> Result<Vec<u8>> {
        let patch = self.mutate(raw, request_namespace).await?;
        patch_bytes(patch.as_ref())
    }
}

/// Decode an inbound object, mapping failures to [`Error::Decode`]
pub fn decode_object<T: DeserializeOwned>(kind: &str, raw: &[u8]) -> Result<T> {
    serde_json::from_slice(raw).map_err(|e| Error::decode(format!("could not decode {kind}: {e}")))
}

/// The object's namespace, falling back to the request's
pub fn effective_namespace(
    object_namespace: Option<&str>,
    request_namespace: Option<&str>,
) -> Option<String> {
    object_namespace
        .filter(|ns| !ns.is_empty())
        .or(request_namespace.filter(|ns| !ns.is_empty()))
        .map(str::to_string)
}
