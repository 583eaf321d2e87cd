//! Schema registry coordination.

pub mod registry;

pub use registry::{
    RegisterOutcome, SchemaOutcome, SchemaRegistry, SchemaRegistryClient, SchemaRegistryError,
};
