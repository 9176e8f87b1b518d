use std::fmt;

use serde::{Deserialize, Serialize};

use crate::config::ConfigError;
use crate::membrane::MembraneInvariant;
use crate::object_model::ObjectError;

pub const ERROR_CODE_REGISTRY_VERSION: u32 = 1;
pub const ERROR_CODE_COMPATIBILITY_POLICY: &str =
    "append-only: assigned codes are permanent, never reused, and may only be marked deprecated";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorSeverity {
    Critical,
    Error,
    Warning,
    Info,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorSubsystem {
    ObjectModel,
    IdentityRegistry,
    KeyDisclosure,
    ShadowPolicy,
    Configuration,
    Reserved,
}

impl ErrorSubsystem {
    pub const fn includes(self, numeric: u16) -> bool {
        let (start, end) = self.range();
        numeric >= start && numeric <= end
    }

    pub const fn range(self) -> (u16, u16) {
        match self {
            Self::ObjectModel => (1, 999),
            Self::IdentityRegistry => (1000, 1999),
            Self::KeyDisclosure => (2000, 2999),
            Self::ShadowPolicy => (3000, 3999),
            Self::Configuration => (4000, 4999),
            Self::Reserved => (5000, 9999),
        }
    }
}

#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MembraneErrorCode {
    HostTypeError = 1,
    PrototypeCycleError = 2,
    PrototypeChainDepthError = 3,
    TrapDepthExceededError = 4,

    RegistryConflictError = 1000,
    DetachedMembraneError = 1001,

    MissingBackingStorageError = 2000,

    ShadowPolicyDeniedError = 3000,

    InvalidOptionsError = 4000,
}

pub const ALL_ERROR_CODES: &[MembraneErrorCode] = &[
    MembraneErrorCode::HostTypeError,
    MembraneErrorCode::PrototypeCycleError,
    MembraneErrorCode::PrototypeChainDepthError,
    MembraneErrorCode::TrapDepthExceededError,
    MembraneErrorCode::RegistryConflictError,
    MembraneErrorCode::DetachedMembraneError,
    MembraneErrorCode::MissingBackingStorageError,
    MembraneErrorCode::ShadowPolicyDeniedError,
    MembraneErrorCode::InvalidOptionsError,
];

impl MembraneErrorCode {
    pub const fn numeric(self) -> u16 {
        self as u16
    }

    pub fn stable_code(self) -> String {
        format!("FE-MBR-{:04}", self.numeric())
    }

    pub const fn subsystem(self) -> ErrorSubsystem {
        match self.numeric() {
            1..=999 => ErrorSubsystem::ObjectModel,
            1000..=1999 => ErrorSubsystem::IdentityRegistry,
            2000..=2999 => ErrorSubsystem::KeyDisclosure,
            3000..=3999 => ErrorSubsystem::ShadowPolicy,
            4000..=4999 => ErrorSubsystem::Configuration,
            _ => ErrorSubsystem::Reserved,
        }
    }

    pub const fn severity(self) -> ErrorSeverity {
        match self {
            Self::RegistryConflictError
            | Self::DetachedMembraneError
            | Self::MissingBackingStorageError => ErrorSeverity::Critical,
            Self::ShadowPolicyDeniedError => ErrorSeverity::Warning,
            _ => ErrorSeverity::Error,
        }
    }

    pub const fn description(self) -> &'static str {
        match self {
            Self::HostTypeError => "Host object operation rejected a value of the wrong type.",
            Self::PrototypeCycleError => "Prototype assignment would close a prototype cycle.",
            Self::PrototypeChainDepthError => {
                "Ordinary prototype chain exceeded the maximum walk depth."
            }
            Self::TrapDepthExceededError => {
                "Nested membrane traps exceeded the configured maximum depth."
            }
            Self::RegistryConflictError => {
                "Identity registry refused a binding that conflicts with a live wrapper."
            }
            Self::DetachedMembraneError => {
                "Shadow storage outlived the membrane or original it belongs to."
            }
            Self::MissingBackingStorageError => {
                "Exposed original has no registered backing storage during disclosure."
            }
            Self::ShadowPolicyDeniedError => {
                "Shadow lookup policy refused an operation on a key the placeholder does not own."
            }
            Self::InvalidOptionsError => "Membrane options failed to parse or validate.",
        }
    }

    pub const fn operator_action(self) -> &'static str {
        match self {
            Self::HostTypeError => "Check the receiver and callee types passed across the membrane.",
            Self::PrototypeCycleError => "Break the cycle before assigning the prototype.",
            Self::PrototypeChainDepthError => {
                "Flatten the prototype chain or inspect it for runaway growth."
            }
            Self::TrapDepthExceededError => {
                "Look for prototype loops spanning both graphs or raise max_trap_depth."
            }
            Self::RegistryConflictError => {
                "Stop using the membrane; a wrapper was registered outside the wrap path."
            }
            Self::DetachedMembraneError => {
                "Stop using the membrane; keep the context alive while wrappers are reachable."
            }
            Self::MissingBackingStorageError => {
                "Stop using the membrane; wrapper creation skipped backing registration."
            }
            Self::ShadowPolicyDeniedError => {
                "Define the key on the wrapper first or switch shadow_lookup to traverse."
            }
            Self::InvalidOptionsError => "Correct the options document and rebuild the membrane.",
        }
    }

    pub const fn deprecated(self) -> bool {
        false
    }

    pub fn from_numeric(numeric: u16) -> Option<Self> {
        ALL_ERROR_CODES
            .iter()
            .copied()
            .find(|candidate| candidate.numeric() == numeric)
    }

    pub fn to_registry_entry(self) -> ErrorCodeEntry {
        ErrorCodeEntry {
            code: self.stable_code(),
            numeric: self.numeric(),
            subsystem: self.subsystem(),
            severity: self.severity(),
            description: self.description().to_string(),
            operator_action: self.operator_action().to_string(),
            deprecated: self.deprecated(),
        }
    }
}

impl fmt::Display for MembraneErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.stable_code())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorCodeEntry {
    pub code: String,
    pub numeric: u16,
    pub subsystem: ErrorSubsystem,
    pub severity: ErrorSeverity,
    pub description: String,
    pub operator_action: String,
    pub deprecated: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorCodeRegistry {
    pub version: u32,
    pub compatibility_policy: String,
    pub entries: Vec<ErrorCodeEntry>,
}

pub fn error_code_registry() -> ErrorCodeRegistry {
    ErrorCodeRegistry {
        version: ERROR_CODE_REGISTRY_VERSION,
        compatibility_policy: ERROR_CODE_COMPATIBILITY_POLICY.to_string(),
        entries: ALL_ERROR_CODES
            .iter()
            .copied()
            .map(MembraneErrorCode::to_registry_entry)
            .collect(),
    }
}

pub trait HasErrorCode {
    fn error_code(&self) -> MembraneErrorCode;
}

impl HasErrorCode for MembraneInvariant {
    fn error_code(&self) -> MembraneErrorCode {
        match self {
            MembraneInvariant::MissingBackingStorage { .. } => {
                MembraneErrorCode::MissingBackingStorageError
            }
            MembraneInvariant::RegistryConflict { .. } => MembraneErrorCode::RegistryConflictError,
            MembraneInvariant::Detached => MembraneErrorCode::DetachedMembraneError,
        }
    }
}

impl HasErrorCode for ConfigError {
    fn error_code(&self) -> MembraneErrorCode {
        match self {
            ConfigError::Parse { .. }
            | ConfigError::TrapDepthOutOfRange { .. }
            | ConfigError::ZeroEventCapacity
            | ConfigError::LookupPolicyWithoutShadow { .. } => {
                MembraneErrorCode::InvalidOptionsError
            }
        }
    }
}

impl HasErrorCode for ObjectError {
    fn error_code(&self) -> MembraneErrorCode {
        match self {
            ObjectError::TypeError(_) => MembraneErrorCode::HostTypeError,
            ObjectError::PrototypeCycleDetected => MembraneErrorCode::PrototypeCycleError,
            ObjectError::PrototypeChainTooDeep { .. } => {
                MembraneErrorCode::PrototypeChainDepthError
            }
            ObjectError::PolicyDenied { .. } => MembraneErrorCode::ShadowPolicyDeniedError,
            ObjectError::Invariant(invariant) => invariant.error_code(),
            ObjectError::TrapDepthExceeded { .. } => MembraneErrorCode::TrapDepthExceededError,
            ObjectError::InvalidOptions(err) => err.error_code(),
        }
    }
}
