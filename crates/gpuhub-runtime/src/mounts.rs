//! Translation of a GPU placement into container launch parameters

use gpuhub_core::Placement;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Host placement constraint, serialized as `[field, operator, value]`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlacementConstraint(pub String, pub String, pub String);

impl PlacementConstraint {
    /// Pin the container to a hostname
    pub fn hostname(host: &str) -> Self {
        Self("hostname".to_string(), "LIKE".to_string(), host.to_string())
    }
}

/// A single `key=value` docker parameter
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerParameter {
    pub key: String,
    pub value: String,
}

impl ContainerParameter {
    pub fn new(key: &str, value: impl Into<String>) -> Self {
        Self {
            key: key.to_string(),
            value: value.into(),
        }
    }

    pub fn device(path: impl Into<String>) -> Self {
        Self::new("device", path)
    }
}

/// Constraint and parameters that expose the assigned GPUs to a container
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceMounts {
    pub constraint: PlacementConstraint,
    pub parameters: Vec<ContainerParameter>,
}

impl DeviceMounts {
    /// Build the mounts for a placement
    ///
    /// Without a driver version the driver volume is left out; the control
    /// devices and one `/dev/nvidia<N>` per slot are always present.
    pub fn for_placement(placement: &Placement, driver_version: Option<&str>) -> Self {
        let mut parameters = vec![
            ContainerParameter::device("/dev/nvidiactl"),
            ContainerParameter::device("/dev/nvidia-uvm"),
        ];

        match driver_version {
            Some(version) => {
                parameters.push(ContainerParameter::new("volume-driver", "nvidia-docker"));
                parameters.push(ContainerParameter::new(
                    "volume",
                    format!("nvidia_driver_{}:/usr/local/nvidia:ro", version),
                ));
            }
            None => {
                warn!(
                    host = %placement.host,
                    "No driver version in catalog, skipping driver volume"
                );
            }
        }

        parameters.extend(
            placement
                .slots
                .iter()
                .map(|slot| ContainerParameter::device(format!("/dev/nvidia{}", slot))),
        );

        Self {
            constraint: PlacementConstraint::hostname(&placement.host),
            parameters,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mounts_with_driver() {
        let placement = Placement::new("gpu-node-3", vec![0, 2]);
        let mounts = DeviceMounts::for_placement(&placement, Some("375.66"));

        assert_eq!(mounts.constraint, PlacementConstraint::hostname("gpu-node-3"));
        assert_eq!(
            mounts.parameters,
            vec![
                ContainerParameter::device("/dev/nvidiactl"),
                ContainerParameter::device("/dev/nvidia-uvm"),
                ContainerParameter::new("volume-driver", "nvidia-docker"),
                ContainerParameter::new("volume", "nvidia_driver_375.66:/usr/local/nvidia:ro"),
                ContainerParameter::device("/dev/nvidia0"),
                ContainerParameter::device("/dev/nvidia2"),
            ]
        );
    }

    #[test]
    fn test_mounts_without_driver() {
        let placement = Placement::new("gpu-node-1", vec![1]);
        let mounts = DeviceMounts::for_placement(&placement, None);

        assert!(mounts.parameters.iter().all(|p| p.key == "device"));
        assert_eq!(mounts.parameters.len(), 3);
        assert_eq!(mounts.parameters[2].value, "/dev/nvidia1");
    }

    #[test]
    fn test_constraint_json_shape() {
        let json = serde_json::to_string(&PlacementConstraint::hostname("h1")).unwrap();
        assert_eq!(json, r#"["hostname","LIKE","h1"]"#);
    }
}
