//! Create command

use std::path::Path;

use clap::{ArgAction, Args};

use valkey_common::crd::{Resource, Valkey, ValkeySpec, Volume};
use valkey_common::validation::MAX_REPLICAS;

use crate::Result;

#[derive(Args, Debug, Clone)]
pub struct CreateArgs {
    /// Instance name
    #[arg(long, default_value = "app-db")]
    pub name: String,

    /// Namespace, created if missing
    #[arg(long, default_value = "default")]
    pub namespace: String,

    /// Container image
    #[arg(long, default_value = "valkey/valkey")]
    pub image: String,

    /// Admin username
    #[arg(long, default_value = "root")]
    pub user: String,

    /// Admin password
    #[arg(long = "pass", default_value = "root")]
    pub password: String,

    /// Replica count
    #[arg(
        long,
        default_value_t = 1,
        value_parser = clap::value_parser!(i32).range(0..=MAX_REPLICAS as i64)
    )]
    pub replicas: i32,

    /// Attach a persistent volume at /data
    #[arg(long, action = ArgAction::Set, default_value_t = true)]
    pub volume_enabled: bool,

    /// CPU quota
    #[arg(long, default_value = "200m")]
    pub cpu: String,

    /// Memory quota
    #[arg(long, default_value = "512Mi")]
    pub memory: String,

    /// Volume size
    #[arg(long, default_value = "512Mi")]
    pub storage: String,
}

impl CreateArgs {
    /// The resource these flags describe
    pub fn to_valkey(&self) -> Valkey {
        let mut valkey = Valkey::new(
            &self.name,
            ValkeySpec {
                image: self.image.clone(),
                replicas: self.replicas,
                user: self.user.clone(),
                password: self.password.clone(),
                volume: Volume {
                    enabled: self.volume_enabled,
                    storage: self.storage.clone(),
                },
                resource: Resource {
                    cpu: self.cpu.clone(),
                    memory: self.memory.clone(),
                    storage: self.storage.clone(),
                },
            },
        );
        valkey.metadata.namespace = Some(self.namespace.clone());
        valkey
    }
}

pub async fn run(args: CreateArgs, kubeconfig: Option<&Path>) -> Result<()> {
    super::submit(kubeconfig, &args.to_valkey()).await
}
