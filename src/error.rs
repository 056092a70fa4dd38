//! Error types for the secretsbeam webhook
//!
//! Every variant is request-scoped: an error aborts the admission request it
//! was raised in and nothing else. The webhook never retries on its own; the
//! API server decides what to do with a failed request based on the webhook's
//! failure policy.

use thiserror::Error;

/// Main error type for mutation requests
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// The inbound object could not be decoded
    #[error("decode error: {0}")]
    Decode(String),

    /// A referenced custom resource does not exist
    #[error("retrieval error: {0}")]
    Retrieval(String),

    /// A fetched custom resource is missing an expected field or has the wrong type
    #[error("schema error: {0}")]
    Schema(String),

    /// The secret-config blob for an agent could not be encoded
    #[error("serialization error: {0}")]
    Serialization(String),

    /// The JSON patch between the original and mutated object could not be computed
    #[error("patch computation error: {0}")]
    PatchComputation(String),

    /// Kubernetes API error other than not-found
    #[error("kubernetes error: {0}")]
    Kube(#[from] kube::Error),

    /// Missing or invalid runtime configuration
    #[error("configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Create a decode error with the given message
    pub fn decode(msg: impl Into<String>) -> Self {
        Self::Decode(msg.into())
    }

    /// Create a retrieval error with the given message
    pub fn retrieval(msg: impl Into<String>) -> Self {
        Self::Retrieval(msg.into())
    }

    /// Create a schema error with the given message
    pub fn schema(msg: impl Into<String>) -> Self {
        Self::Schema(msg.into())
    }

    /// Create a serialization error with the given message
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization(msg.into())
    }

    /// Create a patch computation error with the given message
    pub fn patch_computation(msg: impl Into<String>) -> Self {
        Self::PatchComputation(msg.into())
    }

    /// Create a configuration error with the given message
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }
}
