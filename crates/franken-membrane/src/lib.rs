#![forbid(unsafe_code)]

//! Identity-preserving membranes between two object graphs.
//!
//! Objects cross a membrane through wrappers that hide their identity,
//! values pushed back to their home graph unwrap to the exact original,
//! and private keys become usable across the boundary only once they have
//! crossed it themselves.

pub mod config;
pub mod error_code;
pub mod identity_registry;
pub mod membrane;
pub mod membrane_events;
pub mod object_model;
pub mod shadow_target;
pub mod whitelist;

pub use config::{ConfigError, MembraneOptions};
pub use membrane::{
    ExposureSet, Membrane, MembraneContext, MembraneInvariant, MembraneStats, create_membrane,
    create_mutual_membrane,
};
pub use object_model::{
    Interceptable, ObjectError, ObjectKind, ObjectRef, PropertyDescriptor, PropertyKey, Reflect,
    Symbol, Value,
};
pub use shadow_target::ShadowLookupPolicy;
pub use whitelist::KeyGating;
