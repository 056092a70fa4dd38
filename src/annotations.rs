//! Annotation Resolver
//!
//! Reads the secret-injection intent declared on an object's annotations:
//!
//! ```yaml
//! metadata:
//!   annotations:
//!     beam.orbitops.dev/secret-db: "true"
//!     beam.orbitops.dev/secret-db-target: /etc/app/db.json
//!     beam.orbitops.dev/secret-db-template: "{{ .password }}"
//!     beam.orbitops.dev/secret-db-namespace: shared-secrets
//!     beam.orbitops.dev/container-position: first
//! ```
//!
//! Keys that do not match the scheme are ignored rather than rejected.

use std::collections::BTreeMap;

use tracing::warn;

/// Annotation prefix used by all recognised keys
pub const DEFAULT_ANNOTATION_PREFIX: &str = "beam.orbitops.dev";

/// Directory under which secrets land when no target annotation is given
pub const DEFAULT_SECRETS_ROOT: &str = "/var/run/secrets/orbitops.dev";

/// Value written to the skip annotation after a successful mutation
pub const INJECTED_VALUE: &str = "true";

const SECRET_KEY_PREFIX: &str = "secret-";
const TEMPLATE_SUFFIX: &str = "-template";
const TARGET_SUFFIX: &str = "-target";
const NAMESPACE_SUFFIX: &str = "-namespace";
const SIBLING_SUFFIXES: [&str; 3] = [TEMPLATE_SUFFIX, TARGET_SUFFIX, NAMESPACE_SUFFIX];

/// Where injected init containers go relative to existing ones
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ContainerPosition {
    /// Before any init container already on the Pod
    First,
    /// After every init container already on the Pod
    #[default]
    Last,
}

/// One secret requested through annotations, before its custom resource is read
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SecretRequest {
    /// Secret identifier captured from the annotation key
    pub name: String,
    /// Optional rendering template for the agent
    pub template: Option<String>,
    /// Absolute path the agent writes the secret to
    pub target: String,
    /// Namespace override for the ExternalSecret lookup
    pub namespace: Option<String>,
}

/// The annotation keys recognised by the webhook
///
/// Owned by each mutator instead of living in process-wide statics, so a
/// deployment can select a different prefix at startup.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AnnotationScheme {
    prefix: String,
    secrets_root: String,
}

impl Default for AnnotationScheme {
    fn default() -> Self {
        Self::new(DEFAULT_ANNOTATION_PREFIX, DEFAULT_SECRETS_ROOT)
    }
}

impl AnnotationScheme {
    /// Create a scheme for the given key prefix and default secrets directory
    pub fn new(prefix: impl Into<String>, secrets_root: impl Into<String>) -> Self {
        let prefix = prefix.into().trim_end_matches('/').to_string();
        let secrets_root = secrets_root.into().trim_end_matches('/').to_string();
        Self {
            prefix,
            secrets_root,
        }
    }

    /// Key prefix shared by all annotations
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Annotation marking an object as already mutated
    pub fn skip_key(&self) -> String {
        format!("{}/injected", self.prefix)
    }

    /// ServiceAccount annotation naming an ExternalSecretAccess
    pub fn access_key(&self) -> String {
        format!("{}/access", self.prefix)
    }

    /// Pod annotation selecting where init containers are inserted
    pub fn position_key(&self) -> String {
        format!("{}/container-position", self.prefix)
    }

    /// Annotation requesting the secret `name`
    pub fn secret_key(&self, name: &str) -> String {
        format!("{}/{}{}", self.prefix, SECRET_KEY_PREFIX, name)
    }

    fn sibling_key(&self, name: &str, suffix: &str) -> String {
        format!("{}{}", self.secret_key(name), suffix)
    }

    /// Target path used when no `-target` annotation is present
    pub fn default_target(&self, name: &str) -> String {
        format!("{}/{}", self.secrets_root, name)
    }

    /// Whether the skip annotation is present, whatever its value
    pub fn is_skipped(&self, annotations: Option<&BTreeMap<String, String>>) -> bool {
        annotations.is_some_and(|a| a.contains_key(&self.skip_key()))
    }

    /// Set the skip annotation so a resubmitted object is left alone
    pub fn mark_injected(&self, annotations: &mut BTreeMap<String, String>) {
        annotations.insert(self.skip_key(), INJECTED_VALUE.to_string());
    }

    /// Secret identifier carried by `key`, if it has the `secret-<NAME>` shape
    pub fn secret_name<'a>(&self, key: &'a str) -> Option<&'a str> {
        let name = key
            .strip_prefix(self.prefix.as_str())?
            .strip_prefix('/')?
            .strip_prefix(SECRET_KEY_PREFIX)?;

        let valid = !name.is_empty()
            && name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        valid.then_some(name)
    }

    /// A `secret-X-template|target|namespace` key is a sibling only when
    /// `secret-X` is also present; otherwise it requests a secret of that name.
    fn is_sibling(&self, name: &str, annotations: &BTreeMap<String, String>) -> bool {
        SIBLING_SUFFIXES.iter().any(|suffix| {
            name.strip_suffix(suffix)
                .is_some_and(|base| !base.is_empty() && annotations.contains_key(&self.secret_key(base)))
        })
    }

    /// Every secret requested on the object, in annotation key order
    pub fn requested_secrets(&self, annotations: &BTreeMap<String, String>) -> Vec<SecretRequest> {
        annotations
            .keys()
            .filter_map(|key| self.secret_name(key))
            .filter(|name| !self.is_sibling(name, annotations))
            .map(|name| SecretRequest {
                name: name.to_string(),
                template: annotations
                    .get(&self.sibling_key(name, TEMPLATE_SUFFIX))
                    .cloned(),
                target: annotations
                    .get(&self.sibling_key(name, TARGET_SUFFIX))
                    .cloned()
                    .unwrap_or_else(|| self.default_target(name)),
                namespace: annotations
                    .get(&self.sibling_key(name, NAMESPACE_SUFFIX))
                    .cloned(),
            })
            .collect()
    }

    /// Requested init container placement, defaulting to the end
    pub fn container_position(&self, annotations: &BTreeMap<String, String>) -> ContainerPosition {
        match annotations.get(&self.position_key()).map(|v| v.trim()) {
            None => ContainerPosition::default(),
            Some(v) if v.eq_ignore_ascii_case("first") => ContainerPosition::First,
            Some(v) if v.eq_ignore_ascii_case("last") => ContainerPosition::Last,
            Some(other) => {
                warn!(value = %other, "Unknown container position, appending init containers");
                ContainerPosition::default()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn annotations(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn secret_name_matches_scheme() {
        let scheme = AnnotationScheme::default();
        assert_eq!(scheme.secret_name("beam.orbitops.dev/secret-db"), Some("db"));
        assert_eq!(
            scheme.secret_name("beam.orbitops.dev/secret-api_key-2"),
            Some("api_key-2")
        );
    }

    #[test]
    fn malformed_keys_are_ignored() {
        let scheme = AnnotationScheme::default();
        assert_eq!(scheme.secret_name("beam.orbitops.dev/secret-"), None);
        assert_eq!(scheme.secret_name("beam.orbitops.dev/secret-a.b"), None);
        assert_eq!(scheme.secret_name("beam.orbitops.dev/injected"), None);
        assert_eq!(scheme.secret_name("other.dev/secret-db"), None);
        assert_eq!(scheme.secret_name("beam.orbitops.devsecret-db"), None);
    }

    #[test]
    fn default_target_uses_secrets_root() {
        let scheme = AnnotationScheme::default();
        assert_eq!(
            scheme.default_target("db"),
            "/var/run/secrets/orbitops.dev/db"
        );
    }

    #[test]
    fn trailing_slashes_are_trimmed() {
        let scheme = AnnotationScheme::new("secrets.kscp.io/", "/run/secrets/");
        assert_eq!(scheme.skip_key(), "secrets.kscp.io/injected");
        assert_eq!(scheme.default_target("db"), "/run/secrets/db");
    }

    #[test]
    fn requested_secret_without_overrides_uses_defaults() {
        let scheme = AnnotationScheme::default();
        let found = scheme.requested_secrets(&annotations(&[("beam.orbitops.dev/secret-db", "aws")]));

        assert_eq!(
            found,
            vec![SecretRequest {
                name: "db".to_string(),
                template: None,
                target: "/var/run/secrets/orbitops.dev/db".to_string(),
                namespace: None,
            }]
        );
    }

    #[test]
    fn sibling_annotations_override_defaults_and_are_not_secrets() {
        let scheme = AnnotationScheme::default();
        let found = scheme.requested_secrets(&annotations(&[
            ("beam.orbitops.dev/secret-db", "true"),
            ("beam.orbitops.dev/secret-db-template", "{{ .password }}"),
            ("beam.orbitops.dev/secret-db-target", "/etc/app/db.json"),
            ("beam.orbitops.dev/secret-db-namespace", "shared"),
        ]));

        assert_eq!(found.len(), 1);
        let db = &found[0];
        assert_eq!(db.name, "db");
        assert_eq!(db.template.as_deref(), Some("{{ .password }}"));
        assert_eq!(db.target, "/etc/app/db.json");
        assert_eq!(db.namespace.as_deref(), Some("shared"));
    }

    #[test]
    fn suffix_without_base_secret_is_its_own_secret() {
        let scheme = AnnotationScheme::default();
        let found =
            scheme.requested_secrets(&annotations(&[("beam.orbitops.dev/secret-tls-target", "true")]));

        assert_eq!(found.len(), 1);
        assert_eq!(found[0].name, "tls-target");
        assert_eq!(found[0].target, "/var/run/secrets/orbitops.dev/tls-target");
    }

    #[test]
    fn multiple_secrets_in_key_order() {
        let scheme = AnnotationScheme::default();
        let found = scheme.requested_secrets(&annotations(&[
            ("beam.orbitops.dev/secret-zeta", "x"),
            ("beam.orbitops.dev/secret-alpha", "x"),
            ("app.kubernetes.io/name", "web"),
        ]));
        let names: Vec<_> = found.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["alpha", "zeta"]);
    }

    #[test]
    fn skip_annotation_presence_is_enough() {
        let scheme = AnnotationScheme::default();
        assert!(!scheme.is_skipped(None));
        assert!(!scheme.is_skipped(Some(&annotations(&[]))));
        assert!(scheme.is_skipped(Some(&annotations(&[("beam.orbitops.dev/injected", "false")]))));
    }

    #[test]
    fn mark_injected_sets_truthy_value() {
        let scheme = AnnotationScheme::default();
        let mut a = BTreeMap::new();
        scheme.mark_injected(&mut a);
        assert_eq!(a.get("beam.orbitops.dev/injected").map(String::as_str), Some("true"));
    }

    #[test]
    fn container_position_parsing() {
        let scheme = AnnotationScheme::default();
        let key = "beam.orbitops.dev/container-position";
        assert_eq!(scheme.container_position(&annotations(&[])), ContainerPosition::Last);
        assert_eq!(
            scheme.container_position(&annotations(&[(key, "first")])),
            ContainerPosition::First
        );
        assert_eq!(
            scheme.container_position(&annotations(&[(key, "Last")])),
            ContainerPosition::Last
        );
        assert_eq!(
            scheme.container_position(&annotations(&[(key, "middle")])),
            ContainerPosition::Last
        );
    }
}
