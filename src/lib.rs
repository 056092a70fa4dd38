//! secretsbeam webhook - inject secret-fetching agents into Pods
//!
//! A mutating admission webhook. Pods annotated with
//! `beam.orbitops.dev/secret-<NAME>` get one init container per secret
//! provider; the agent in that container fetches the secrets before the
//! application starts. ServiceAccounts annotated with
//! `beam.orbitops.dev/access` get the annotation their provider needs for
//! workload identity.
//!
//! # Modules
//!
//! - [`annotations`] - Annotation scheme and request parsing
//! - [`crd`] - Typed views of ExternalSecret / ExternalSecretAccess
//! - [`lookup`] - Cluster reads and secret resolution
//! - [`config`] - Agent hand-off types and image selection
//! - [`volumes`] - Volume merge shared by all injected containers
//! - [`pod`] - Pod mutation
//! - [`service_account`] - ServiceAccount mutation
//! - [`patch`] - JSON patch computation
//! - [`mutator`] - Common mutator entry point
//! - [`webhook`] - AdmissionReview HTTP handlers
//! - [`server`] - HTTP(S) listener
//! - [`error`] - Error types

#![deny(missing_docs)]

pub mod annotations;
pub mod config;
pub mod crd;
pub mod error;
pub mod lookup;
pub mod mutator;
pub mod patch;
pub mod pod;
pub mod server;
pub mod service_account;
pub mod volumes;
pub mod webhook;

pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Compute a deterministic hash of the input string, returning a 16-char hex digest.
///
/// Uses truncated SHA-256 so names derived from it stay the same across
/// releases; `DefaultHasher` makes no such promise.
pub fn deterministic_hash(input: &str) -> String {
    use aws_lc_rs::digest;
    let hash = digest::digest(&digest::SHA256, input.as_bytes());
    hash.as_ref()[..8]
        .iter()
        .fold(String::with_capacity(16), |mut s, b| {
            use std::fmt::Write;
            let _ = write!(s, "{:02x}", b);
            s
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deterministic_hash_is_stable_hex() {
        let a = deterministic_hash("aws");
        assert_eq!(a, deterministic_hash("aws"));
        assert_eq!(a.len(), 16);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a, deterministic_hash("gcp"));
    }
}
