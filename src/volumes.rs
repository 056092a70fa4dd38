//! Shared volume-merge step
//!
//! Every directory an agent writes to is an `emptyDir` volume mounted into the
//! agent's init container and into every regular container of the Pod. Paths
//! that are already mounted somewhere on the Pod are reused instead of being
//! declared a second time. When the agents run ahead of the Pod's own init
//! containers, those init containers get the mounts as well.

use k8s_openapi::api::core::v1::{Container, EmptyDirVolumeSource, PodSpec, Volume, VolumeMount};

fn find_mount<'a>(containers: &'a [Container], path: &str) -> Option<&'a VolumeMount> {
    containers
        .iter()
        .flat_map(|c| c.volume_mounts.iter().flatten())
        .find(|m| m.mount_path == path)
}

fn has_mount_path(container: &Container, path: &str) -> bool {
    container
        .volume_mounts
        .iter()
        .flatten()
        .any(|m| m.mount_path == path)
}

/// Merge `mounts` into `spec`, returning the mounts the injected container must use
///
/// For each mount path:
/// - if a container already mounts the path, its volume name is reused and no
///   volume is declared
/// - otherwise an `emptyDir` volume is declared under the mount's name
/// - every regular container that does not mount the path yet gets the mount
/// - with `init_from = Some(i)`, so does every init container at index `i` or later
///
/// Running the merge again with the same paths leaves `spec` unchanged.
pub fn merge_volume_mounts(
    spec: &mut PodSpec,
    mounts: Vec<VolumeMount>,
    init_from: Option<usize>,
) -> Vec<VolumeMount> {
    let mut merged = Vec::with_capacity(mounts.len());

    for mut mount in mounts {
        let existing = find_mount(&spec.containers, &mount.mount_path)
            .or_else(|| find_mount(spec.init_containers.as_deref().unwrap_or_default(), &mount.mount_path))
            .map(|m| m.name.clone());

        match existing {
            Some(name) => mount.name = name,
            None => {
                let volumes = spec.volumes.get_or_insert_with(Vec::new);
                if !volumes.iter().any(|v| v.name == mount.name) {
                    volumes.push(Volume {
                        name: mount.name.clone(),
                        empty_dir: Some(EmptyDirVolumeSource::default()),
                        ..Default::default()
                    });
                }
            }
        }

        let init_containers: &mut [Container] = match (init_from, spec.init_containers.as_mut()) {
            (Some(from), Some(init)) => init.get_mut(from..).unwrap_or_default(),
            _ => Default::default(),
        };

        for container in spec.containers.iter_mut().chain(init_containers.iter_mut()) {
            if !has_mount_path(container, &mount.mount_path) {
                container
                    .volume_mounts
                    .get_or_insert_with(Vec::new)
                    .push(VolumeMount {
                        name: mount.name.clone(),
                        mount_path: mount.mount_path.clone(),
                        ..Default::default()
                    });
            }
        }

        merged.push(mount);
    }

    merged
}
