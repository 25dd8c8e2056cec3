//! Apply command

use std::path::{Path, PathBuf};

use clap::Args;
use kube::api::DynamicObject;

use valkey_common::crd::{decode_instance, Valkey};

use crate::{Error, Result};

/// Namespace used when the manifest does not name one
const DEFAULT_NAMESPACE: &str = "default";

#[derive(Args, Debug, Clone)]
pub struct ApplyArgs {
    /// Manifest containing a single Valkey resource
    #[arg(short = 'f', long = "filename")]
    pub file: PathBuf,
}

/// Decode a YAML manifest into a Valkey, rejecting other kinds
pub fn parse_manifest(contents: &str) -> Result<Valkey> {
    let obj: DynamicObject = serde_yaml::from_str(contents)?;
    let mut valkey = decode_instance(obj)?;
    if valkey.metadata.namespace.as_deref().unwrap_or_default().is_empty() {
        valkey.metadata.namespace = Some(DEFAULT_NAMESPACE.to_string());
    }
    Ok(valkey)
}

pub async fn run(args: ApplyArgs, kubeconfig: Option<&Path>) -> Result<()> {
    let contents = std::fs::read_to_string(&args.file).map_err(|e| Error::io(&args.file, e))?;
    let valkey = parse_manifest(&contents)?;
    super::submit(kubeconfig, &valkey).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::ResourceExt;

    const MANIFEST: &str = r#"
apiVersion: database.kuberly.io/v1alpha1
kind: Valkey
metadata:
  name: cache
spec:
  image: valkey/valkey:8
  replicas: 2
  user: admin
  password: s3cret
  volume:
    enabled: true
    storage: 1Gi
  resource:
    cpu: 500m
    memory: 1Gi
    storage: 1Gi
"#;

    #[test]
    fn test_parse_manifest_defaults_namespace() {
        let valkey = parse_manifest(MANIFEST).expect("manifest should parse");
        assert_eq!(valkey.name_any(), "cache");
        assert_eq!(valkey.namespace().as_deref(), Some("default"));
        assert_eq!(valkey.spec.replicas, 2);
    }

    #[test]
    fn test_parse_manifest_rejects_other_kinds() {
        let manifest = r#"
apiVersion: v1
kind: ConfigMap
metadata:
  name: cache
data: {}
"#;
        match parse_manifest(manifest) {
            Err(Error::Valkey(valkey_common::Error::InvalidInputType { found, .. })) => {
                assert_eq!(found, "v1/ConfigMap");
            }
            other => panic!("expected InvalidInputType, got {other:?}"),
        }
    }

    #[test]
    fn test_parse_manifest_rejects_bad_yaml() {
        assert!(matches!(parse_manifest(": not yaml ["), Err(Error::Yaml(_))));
    }
}
