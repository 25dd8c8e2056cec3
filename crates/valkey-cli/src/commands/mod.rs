//! CLI commands

use std::path::Path;

use kube::api::{Api, PostParams};
use kube::{Client, ResourceExt};
use tracing::info;

use valkey_common::crd::Valkey;
use valkey_common::kube_utils::{create_client, ensure_namespace};
use valkey_common::validation::{Validate, Validator};

use crate::Result;

pub mod apply;
pub mod create;

/// Field manager recorded on objects written by the CLI
pub const CLI_FIELD_MANAGER: &str = "valkey-cli";

/// Validate `valkey`, make sure its namespace exists and create it
pub(crate) async fn submit(kubeconfig: Option<&Path>, valkey: &Valkey) -> Result<()> {
    valkey.validate(&Validator::new())?;

    let client = create_client(kubeconfig).await?;
    create_instance(&client, valkey).await
}

async fn create_instance(client: &Client, valkey: &Valkey) -> Result<()> {
    let target = valkey.instance_ref();
    ensure_namespace(client, &target.namespace, CLI_FIELD_MANAGER).await?;

    let api: Api<Valkey> = Api::namespaced(client.clone(), &target.namespace);
    let params = PostParams {
        dry_run: false,
        field_manager: Some(CLI_FIELD_MANAGER.to_string()),
    };
    api.create(&params, valkey).await.map_err(|e| {
        valkey_common::Error::from_kube("Valkey", &target.namespace, valkey.name_any(), e)
    })?;

    info!(instance = %target, "created Valkey");
    println!("valkey {} created", target);
    Ok(())
}
