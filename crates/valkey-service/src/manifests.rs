//! Manifest builders for an instance's dependent objects
//!
//! Every object is named after the instance and lives in its namespace.
//! Pods carry `app=<name>`, which is both the Deployment selector and the
//! Service selector.

use std::collections::BTreeMap;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{
    Container, ContainerPort, EnvVar, EnvVarSource, PersistentVolumeClaim,
    PersistentVolumeClaimSpec, PersistentVolumeClaimVolumeSource, PodSpec, PodTemplateSpec,
    ResourceRequirements, Secret, SecretKeySelector, Service, ServicePort, ServiceSpec, Volume,
    VolumeMount, VolumeResourceRequirements,
};
use k8s_openapi::apimachinery::pkg::api::resource::Quantity;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use k8s_openapi::ByteString;

use valkey_common::crd::Resource;
use valkey_common::{
    APP_LABEL_KEY, FIELD_MANAGER, MANAGED_BY_LABEL_KEY, SECRET_PASSWORD_KEY, VALKEY_PORT,
};

use crate::request::CreateRequest;

/// Name of the datastore container
pub const CONTAINER_NAME: &str = "valkey";
/// Name of the pod volume backed by the claim
pub const DATA_VOLUME_NAME: &str = "data";
/// Mount path of the data volume
pub const DATA_MOUNT_PATH: &str = "/data";
/// Environment variable carrying the admin user
pub const USER_ENV: &str = "VALKEY_USER";
/// Environment variable carrying the admin password
pub const PASSWORD_ENV: &str = "VALKEY_PASSWORD";

/// Pod selector for an instance
pub fn selector_labels(name: &str) -> BTreeMap<String, String> {
    BTreeMap::from([(APP_LABEL_KEY.to_string(), name.to_string())])
}

/// Labels stamped on every dependent object
pub fn labels(name: &str) -> BTreeMap<String, String> {
    let mut labels = selector_labels(name);
    labels.insert(MANAGED_BY_LABEL_KEY.to_string(), FIELD_MANAGER.to_string());
    labels
}

fn metadata(name: &str, namespace: &str) -> ObjectMeta {
    ObjectMeta {
        name: Some(name.to_string()),
        namespace: Some(namespace.to_string()),
        labels: Some(labels(name)),
        ..Default::default()
    }
}

/// Value stored under the password key: the base64 text of the password
pub fn encode_password(password: &str) -> ByteString {
    ByteString(BASE64.encode(password).into_bytes())
}

/// Credential Secret holding the encoded password
pub fn build_secret(request: &CreateRequest) -> Secret {
    Secret {
        metadata: metadata(&request.crd_name, &request.namespace),
        data: Some(BTreeMap::from([(
            SECRET_PASSWORD_KEY.to_string(),
            encode_password(&request.password),
        )])),
        ..Default::default()
    }
}

/// Single-writer claim sized from `resource.storage`
pub fn build_pvc(request: &CreateRequest) -> PersistentVolumeClaim {
    PersistentVolumeClaim {
        metadata: metadata(&request.crd_name, &request.namespace),
        spec: Some(PersistentVolumeClaimSpec {
            access_modes: Some(vec!["ReadWriteOnce".to_string()]),
            resources: Some(VolumeResourceRequirements {
                requests: Some(BTreeMap::from([(
                    "storage".to_string(),
                    Quantity(request.resource.storage.clone()),
                )])),
                ..Default::default()
            }),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// CPU and memory applied as both requests and limits
pub fn resource_requirements(resource: &Resource) -> ResourceRequirements {
    let quotas = BTreeMap::from([
        ("cpu".to_string(), Quantity(resource.cpu.clone())),
        ("memory".to_string(), Quantity(resource.memory.clone())),
    ]);
    ResourceRequirements {
        requests: Some(quotas.clone()),
        limits: Some(quotas),
        ..Default::default()
    }
}

const BINARY_SUFFIXES: [(&str, i32); 6] = [
    ("Ki", 1),
    ("Mi", 2),
    ("Gi", 3),
    ("Ti", 4),
    ("Pi", 5),
    ("Ei", 6),
];

const DECIMAL_SUFFIXES: [(&str, i32); 9] = [
    ("n", -9),
    ("u", -6),
    ("m", -3),
    ("k", 3),
    ("M", 6),
    ("G", 9),
    ("T", 12),
    ("P", 15),
    ("E", 18),
];

/// Numeric value of a quantity, e.g. `1000m` -> 1.0, `1Gi` -> 1073741824.0
pub fn quantity_value(quantity: &Quantity) -> Option<f64> {
    let raw = quantity.0.trim();

    for (suffix, power) in BINARY_SUFFIXES {
        if let Some(number) = raw.strip_suffix(suffix) {
            return number.parse::<f64>().ok().map(|n| n * 1024f64.powi(power));
        }
    }
    for (suffix, power) in DECIMAL_SUFFIXES {
        if let Some(number) = raw.strip_suffix(suffix) {
            let n = number.parse::<f64>().ok()?;
            // Divide for sub-unit suffixes so 500m is exactly 0.5
            return Some(if power < 0 {
                n / 10f64.powi(-power)
            } else {
                n * 10f64.powi(power)
            });
        }
    }
    raw.parse::<f64>().ok()
}

/// Two quantities are equal when they denote the same amount
///
/// Unparseable quantities fall back to string equality.
pub fn same_quantity(a: &Quantity, b: &Quantity) -> bool {
    match (quantity_value(a), quantity_value(b)) {
        (Some(x), Some(y)) => (x - y).abs() <= f64::EPSILON * x.abs().max(y.abs()),
        _ => a == b,
    }
}

fn same_quantities(
    live: Option<&BTreeMap<String, Quantity>>,
    wanted: Option<&BTreeMap<String, Quantity>>,
) -> bool {
    let (live, wanted) = (live.cloned().unwrap_or_default(), wanted.cloned().unwrap_or_default());
    live.len() == wanted.len()
        && wanted
            .iter()
            .all(|(key, w)| live.get(key).is_some_and(|l| same_quantity(l, w)))
}

/// Compare container resources by amount rather than by spelling
///
/// The API server stores quantities in canonical form, so `1000m` reads back
/// as `1` and `1024Mi` as `1Gi`.
pub fn same_resources(live: Option<&ResourceRequirements>, wanted: &ResourceRequirements) -> bool {
    let Some(live) = live else {
        return false;
    };
    same_quantities(live.requests.as_ref(), wanted.requests.as_ref())
        && same_quantities(live.limits.as_ref(), wanted.limits.as_ref())
}

fn env(request: &CreateRequest) -> Vec<EnvVar> {
    vec![
        EnvVar {
            name: USER_ENV.to_string(),
            value: Some(request.user.clone()),
            ..Default::default()
        },
        EnvVar {
            name: PASSWORD_ENV.to_string(),
            value_from: Some(EnvVarSource {
                secret_key_ref: Some(SecretKeySelector {
                    name: request.crd_name.clone(),
                    key: SECRET_PASSWORD_KEY.to_string(),
                    ..Default::default()
                }),
                ..Default::default()
            }),
            ..Default::default()
        },
    ]
}

/// Workload running the datastore container
///
/// The claim is mounted at `/data` only when the volume is enabled.
pub fn build_deployment(request: &CreateRequest) -> Deployment {
    let name = &request.crd_name;

    let (volumes, volume_mounts) = if request.volume.enabled {
        (
            Some(vec![Volume {
                name: DATA_VOLUME_NAME.to_string(),
                persistent_volume_claim: Some(PersistentVolumeClaimVolumeSource {
                    claim_name: name.clone(),
                    ..Default::default()
                }),
                ..Default::default()
            }]),
            Some(vec![VolumeMount {
                name: DATA_VOLUME_NAME.to_string(),
                mount_path: DATA_MOUNT_PATH.to_string(),
                ..Default::default()
            }]),
        )
    } else {
        (None, None)
    };

    Deployment {
        metadata: metadata(name, &request.namespace),
        spec: Some(DeploymentSpec {
            replicas: Some(request.replicas),
            selector: LabelSelector {
                match_labels: Some(selector_labels(name)),
                ..Default::default()
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(labels(name)),
                    ..Default::default()
                }),
                spec: Some(PodSpec {
                    containers: vec![Container {
                        name: CONTAINER_NAME.to_string(),
                        image: Some(request.image.clone()),
                        env: Some(env(request)),
                        ports: Some(vec![ContainerPort {
                            name: Some("valkey".to_string()),
                            container_port: VALKEY_PORT,
                            protocol: Some("TCP".to_string()),
                            ..Default::default()
                        }]),
                        resources: Some(resource_requirements(&request.resource)),
                        volume_mounts,
                        ..Default::default()
                    }],
                    volumes,
                    ..Default::default()
                }),
            },
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Headless Service routing to the instance's pods
pub fn build_service(name: &str, namespace: &str) -> Service {
    Service {
        metadata: metadata(name, namespace),
        spec: Some(ServiceSpec {
            cluster_ip: Some("None".to_string()),
            selector: Some(selector_labels(name)),
            ports: Some(vec![ServicePort {
                name: Some("valkey".to_string()),
                port: VALKEY_PORT,
                target_port: Some(IntOrString::Int(VALKEY_PORT)),
                protocol: Some("TCP".to_string()),
                ..Default::default()
            }]),
            ..Default::default()
        }),
        ..Default::default()
    }
}
