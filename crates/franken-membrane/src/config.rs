//! Membrane construction options.
//!
//! Options are plain data: they can be built in code, or loaded from JSON
//! with every field optional (missing fields take their defaults).  A
//! membrane refuses options that fail [`MembraneOptions::validate`].

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::shadow_target::ShadowLookupPolicy;
use crate::whitelist::KeyGating;

pub const DEFAULT_MAX_TRAP_DEPTH: u32 = 1024;
pub const DEFAULT_MAX_EVENTS: usize = 4096;

/// Upper bound accepted for `max_trap_depth`.  Each nested trap costs
/// several native frames, so deeper limits overflow the stack first.
pub const MAX_TRAP_DEPTH_CEILING: u32 = 16_384;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MembraneOptions {
    /// Back wrappers with a shape-matching placeholder instead of the
    /// original itself.
    pub use_shadow_targets: bool,
    /// Undisclosed gated keys bypass wrapper logic entirely.
    pub enforce_private_whitelist: bool,
    /// Which symbol keys are gated by the whitelist.
    pub key_gating: KeyGating,
    /// How a shadow placeholder resolves keys it does not own.
    pub shadow_lookup: ShadowLookupPolicy,
    /// Serve `__original__`, `__target__` and `__proto_target__`.
    pub expose_diagnostics: bool,
    pub max_trap_depth: u32,
    pub record_events: bool,
    pub max_events: usize,
}

impl Default for MembraneOptions {
    fn default() -> Self {
        Self {
            use_shadow_targets: false,
            enforce_private_whitelist: true,
            key_gating: KeyGating::PrivateKeys,
            shadow_lookup: ShadowLookupPolicy::Traverse,
            expose_diagnostics: false,
            max_trap_depth: DEFAULT_MAX_TRAP_DEPTH,
            record_events: true,
            max_events: DEFAULT_MAX_EVENTS,
        }
    }
}

impl MembraneOptions {
    pub fn shadowed() -> Self {
        Self {
            use_shadow_targets: true,
            ..Self::default()
        }
    }

    pub fn with_shadow_targets(mut self, enabled: bool) -> Self {
        self.use_shadow_targets = enabled;
        self
    }

    pub fn with_diagnostics(mut self, enabled: bool) -> Self {
        self.expose_diagnostics = enabled;
        self
    }

    pub fn with_key_gating(mut self, gating: KeyGating) -> Self {
        self.key_gating = gating;
        self
    }

    pub fn with_shadow_lookup(mut self, policy: ShadowLookupPolicy) -> Self {
        self.shadow_lookup = policy;
        self
    }

    pub fn with_max_trap_depth(mut self, depth: u32) -> Self {
        self.max_trap_depth = depth;
        self
    }

    /// Parse and validate options from JSON.
    pub fn from_json(input: &str) -> Result<Self, ConfigError> {
        let options: Self = serde_json::from_str(input).map_err(|err| ConfigError::Parse {
            message: err.to_string(),
        })?;
        options.validate()?;
        Ok(options)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_trap_depth == 0 || self.max_trap_depth > MAX_TRAP_DEPTH_CEILING {
            return Err(ConfigError::TrapDepthOutOfRange {
                value: self.max_trap_depth,
                max: MAX_TRAP_DEPTH_CEILING,
            });
        }
        if self.record_events && self.max_events == 0 {
            return Err(ConfigError::ZeroEventCapacity);
        }
        if self.shadow_lookup != ShadowLookupPolicy::Traverse && !self.use_shadow_targets {
            return Err(ConfigError::LookupPolicyWithoutShadow {
                policy: self.shadow_lookup,
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("membrane options parse error: {message}")]
    Parse { message: String },
    #[error("max_trap_depth {value} is outside 1..={max}")]
    TrapDepthOutOfRange { value: u32, max: u32 },
    #[error("record_events requires max_events > 0")]
    ZeroEventCapacity,
    #[error("shadow_lookup {policy} requires use_shadow_targets")]
    LookupPolicyWithoutShadow { policy: ShadowLookupPolicy },
}
