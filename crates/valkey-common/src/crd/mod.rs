//! Custom Resource Definitions for the Valkey operator

mod valkey;

pub use valkey::{
    decode_instance, InstancePhase, InstanceRef, Resource, Valkey, ValkeySpec, ValkeyStatus,
    Volume,
};
