//! Pod Mutation Planner
//!
//! Turns the secrets requested on a Pod into one init container per provider.
//! Each init container runs the provider's agent with the provider's secrets
//! as `--config`, and mounts one `emptyDir` per distinct target directory. The
//! same directories are mounted into every regular container so the
//! application can read what the agent wrote.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use json_patch::Patch;
use k8s_openapi::api::core::v1::{Container, Pod, PodSpec, VolumeMount};
use kube::ResourceExt;
use tracing::{debug, info};

use crate::annotations::{AnnotationScheme, ContainerPosition};
use crate::config::{encode_agent_config, AgentImages, ProviderSecretSet, SecretConfig};
use crate::lookup::{load_secret_set, ResourceReader};
use crate::mutator::{decode_object, effective_namespace, Mutator};
use crate::patch::{compute_patch, move_tail_to_front};
use crate::volumes::merge_volume_mounts;
use crate::{deterministic_hash, Error, Result};

/// Prefix of injected init container and volume names
pub const INJECTED_NAME_PREFIX: &str = "beam";

/// Entrypoint of the agent image
pub const AGENT_ENTRYPOINT: &str = "/agent";

/// Flag carrying the encoded secret configs
pub const AGENT_CONFIG_FLAG: &str = "--config";

const IMAGE_PULL_POLICY: &str = "IfNotPresent";
const INIT_CONTAINERS_PATH: &str = "/spec/initContainers";
const MAX_CONTAINER_NAME_LEN: usize = 63;

/// Init container name for `provider`
///
/// Well-formed provider identifiers are used as is. Image references are
/// folded into a DNS label and suffixed with a hash to keep them distinct.
pub fn init_container_name(provider: &str) -> String {
    let is_label = !provider.is_empty()
        && provider
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
        && !provider.starts_with('-')
        && !provider.ends_with('-')
        && INJECTED_NAME_PREFIX.len() + 1 + provider.len() <= MAX_CONTAINER_NAME_LEN;
    if is_label {
        return format!("{INJECTED_NAME_PREFIX}-{provider}");
    }

    let folded: String = provider
        .to_ascii_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect();
    let folded: String = folded
        .split('-')
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join("-");
    let hash = &deterministic_hash(provider)[..8];
    // beam-<folded>-<hash>
    let budget = MAX_CONTAINER_NAME_LEN - INJECTED_NAME_PREFIX.len() - hash.len() - 2;
    let folded = folded[..folded.len().min(budget)].trim_end_matches('-');

    if folded.is_empty() {
        format!("{INJECTED_NAME_PREFIX}-{hash}")
    } else {
        format!("{INJECTED_NAME_PREFIX}-{folded}-{hash}")
    }
}

/// Volume name for the `index`-th directory of `provider`
pub fn volume_name(provider: &str, index: usize) -> String {
    format!(
        "{INJECTED_NAME_PREFIX}-{}-{index}",
        deterministic_hash(provider)
    )
}

/// One mount per distinct parent directory of the secrets' targets
pub fn plan_mounts(provider: &str, secrets: &[SecretConfig]) -> Result<Vec<VolumeMount>> {
    let mut mounts: Vec<VolumeMount> = Vec::new();

    for secret in secrets {
        let target = Path::new(&secret.target);
        if !target.is_absolute() {
            return Err(Error::decode(format!(
                "target '{}' of secret '{}' is not an absolute path",
                secret.target, secret.name
            )));
        }
        let dir = target
            .parent()
            .filter(|p| *p != Path::new("/"))
            .and_then(Path::to_str)
            .ok_or_else(|| {
                Error::decode(format!(
                    "target '{}' of secret '{}' has no mountable parent directory",
                    secret.target, secret.name
                ))
            })?;

        if !mounts.iter().any(|m| m.mount_path == dir) {
            mounts.push(VolumeMount {
                name: volume_name(provider, mounts.len()),
                mount_path: dir.to_string(),
                ..Default::default()
            });
        }
    }

    Ok(mounts)
}

/// Build the agent init container for one provider, without mounts
pub fn build_init_container(
    provider: &str,
    secrets: &[SecretConfig],
    images: &AgentImages,
) -> Result<Container> {
    let image = images.resolve(provider)?;
    let config = encode_agent_config(secrets)?;

    Ok(Container {
        name: init_container_name(provider),
        image: Some(image),
        image_pull_policy: Some(IMAGE_PULL_POLICY.to_string()),
        command: Some(vec![AGENT_ENTRYPOINT.to_string()]),
        args: Some(vec![AGENT_CONFIG_FLAG.to_string(), config]),
        ..Default::default()
    })
}

/// Add one init container per provider to `spec`, merging its volumes
///
/// Returns the number of init containers added. With
/// [`ContainerPosition::First`] the Pod's own init containers run after the
/// agents, so they get the secret mounts too.
pub fn inject_secrets(
    spec: &mut PodSpec,
    secrets: &ProviderSecretSet,
    images: &AgentImages,
    position: ContainerPosition,
) -> Result<usize> {
    let mut injected = 0;

    for (provider, provider_secrets) in secrets.iter() {
        let mut container = build_init_container(provider, provider_secrets, images)?;
        let mounts = plan_mounts(provider, provider_secrets)?;
        let init_from = (position == ContainerPosition::First).then_some(injected);
        container.volume_mounts = Some(merge_volume_mounts(spec, mounts, init_from));

        debug!(
            provider = %provider,
            container = %container.name,
            secrets = provider_secrets.len(),
            "Injecting agent init container"
        );

        let init_containers = spec.init_containers.get_or_insert_with(Vec::new);
        match position {
            ContainerPosition::First => init_containers.insert(injected, container),
            ContainerPosition::Last => init_containers.push(container),
        }
        injected += 1;
    }

    Ok(injected)
}

/// What [`PodMutator::mutate_pod`] did to a Pod
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PodMutation {
    /// Number of agent init containers added
    pub agents: usize,
    /// Where the agents were placed
    pub position: ContainerPosition,
}

/// Mutator for Pods carrying secret annotations
pub struct PodMutator {
    reader: Arc<dyn ResourceReader>,
    scheme: AnnotationScheme,
    images: AgentImages,
}

impl PodMutator {
    /// Create a Pod mutator
    pub fn new(reader: Arc<dyn ResourceReader>, scheme: AnnotationScheme, images: AgentImages) -> Self {
        Self {
            reader,
            scheme,
            images,
        }
    }

    /// Mutate `pod` in place. Returns `None` when the Pod was already injected.
    pub async fn mutate_pod(
        &self,
        pod: &mut Pod,
        request_namespace: Option<&str>,
    ) -> Result<Option<PodMutation>> {
        if self.scheme.is_skipped(pod.metadata.annotations.as_ref()) {
            debug!(pod = %pod.name_any(), "Pod already injected, skipping");
            return Ok(None);
        }

        let annotations = pod.metadata.annotations.clone().unwrap_or_default();
        let requests = self.scheme.requested_secrets(&annotations);
        let mut mutation = PodMutation {
            agents: 0,
            position: self.scheme.container_position(&annotations),
        };

        if !requests.is_empty() {
            let namespace = effective_namespace(pod.metadata.namespace.as_deref(), request_namespace)
                .ok_or_else(|| Error::decode("pod has no namespace"))?;
            let secrets = load_secret_set(self.reader.as_ref(), &requests, &namespace).await?;

            let spec = pod
                .spec
                .as_mut()
                .ok_or_else(|| Error::decode("pod has no spec"))?;
            mutation.agents = inject_secrets(spec, &secrets, &self.images, mutation.position)?;

            info!(
                pod = %pod.name_any(),
                namespace = %namespace,
                secrets = requests.len(),
                providers = secrets.provider_count(),
                "Injected secret agents"
            );
        }

        self.scheme
            .mark_injected(pod.metadata.annotations.get_or_insert_with(Default::default));
        Ok(Some(mutation))
    }
}

#[async_trait]
impl Mutator for PodMutator {
    async fn mutate(&self, raw: &[u8], request_namespace: Option<&str>) -> Result<Option<Patch>> {
        let mut pod: Pod = decode_object("pod", raw)?;
        let original = pod.clone();

        let Some(mutation) = self.mutate_pod(&mut pod, request_namespace).await? else {
            return Ok(None);
        };

        let existing = original
            .spec
            .as_ref()
            .and_then(|s| s.init_containers.as_ref())
            .map_or(0, Vec::len);
        if mutation.position != ContainerPosition::First || mutation.agents == 0 || existing == 0 {
            return compute_patch(&original, &pod);
        }

        // Diff with the agents appended so the Pod's own init containers keep
        // their indices, then move the agents to the front.
        if let Some(init) = pod.spec.as_mut().and_then(|s| s.init_containers.as_mut()) {
            init.rotate_left(mutation.agents);
        }
        let moves = move_tail_to_front(INIT_CONTAINERS_PATH, existing, mutation.agents)?;
        Ok(Some(match compute_patch(&original, &pod)? {
            Some(mut patch) => {
                patch.0.extend(moves.0);
                patch
            }
            None => moves,
        }))
    }
}
