//! Shadow backing storage.
//!
//! With the shadow policy on, a wrapper is backed by a [`ShadowTarget`]
//! instead of the original.  The shadow owns an empty placeholder of the
//! original's shape that receives bypassed (undisclosed private-key)
//! writes.  It never exposes the placeholder's own prototype: structural
//! lookups that miss the placeholder continue through the original's live
//! prototype as seen from the wrapper's side of the membrane.

use std::fmt;
use std::rc::{Rc, Weak};

use serde::{Deserialize, Serialize};

use crate::membrane::{ExposureSet, MembraneContext, MembraneInvariant};
use crate::membrane_events::EVENT_POLICY_DENIED;
use crate::object_model::{
    Interceptable, ObjectError, ObjectKind, ObjectRef, OrdinaryObject, PropertyDescriptor,
    PropertyKey, Reflect, TrapOperation, Value, WeakObjectRef, ordinary_set_with_own_descriptor,
};

pub const DIAGNOSTIC_PROTO_TARGET: &str = "__proto_target__";

const COMPONENT: &str = "shadow_target";

/// How a shadow resolves a key its placeholder does not own.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShadowLookupPolicy {
    /// Continue through the membrane prototype.
    #[default]
    Traverse,
    /// Refuse get, set and has on keys not owned by the placeholder.
    Block,
    /// Refuse get; set defines on the receiver without consulting the
    /// prototype; has reports `false`.
    BlockAllowOwn,
}

impl ShadowLookupPolicy {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Traverse => "traverse",
            Self::Block => "block",
            Self::BlockAllowOwn => "block_allow_own",
        }
    }
}

impl fmt::Display for ShadowLookupPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Empty object matching `kind`: `{}`, `[]`, or a no-op function.
pub fn placeholder_for(kind: ObjectKind) -> ObjectRef {
    match kind {
        ObjectKind::Array => ObjectRef::array(Vec::new()),
        ObjectKind::Plain | ObjectKind::Function => {
            ObjectRef::new(OrdinaryObject::new(kind, None))
        }
    }
}

pub struct ShadowTarget {
    placeholder: ObjectRef,
    original: WeakObjectRef,
    context: Weak<MembraneContext>,
    /// Graph the original belongs to.
    mines: ExposureSet,
    others: ExposureSet,
    lookup: ShadowLookupPolicy,
    diagnostics: bool,
}

impl ShadowTarget {
    pub(crate) fn new(
        original: &ObjectRef,
        context: &Rc<MembraneContext>,
        mines: &ExposureSet,
        others: &ExposureSet,
    ) -> Self {
        let options = context.options();
        Self {
            placeholder: placeholder_for(original.kind()),
            original: original.downgrade(),
            context: Rc::downgrade(context),
            mines: mines.clone(),
            others: others.clone(),
            lookup: options.shadow_lookup,
            diagnostics: options.expose_diagnostics,
        }
    }

    pub fn placeholder(&self) -> &ObjectRef {
        &self.placeholder
    }

    fn context(&self) -> Result<Rc<MembraneContext>, ObjectError> {
        self.context
            .upgrade()
            .ok_or(ObjectError::Invariant(MembraneInvariant::Detached))
    }

    /// The original's prototype, crossed to the wrapper's side.
    fn membrane_prototype(&self) -> Result<Option<ObjectRef>, ObjectError> {
        let context = self.context()?;
        let original = self
            .original
            .upgrade()
            .ok_or(ObjectError::Invariant(MembraneInvariant::Detached))?;
        let proto = Reflect::get_prototype_of(&original)?;
        context
            .cross(Value::from_prototype(proto), &self.mines, &self.others)?
            .into_prototype()
    }

    fn deny(&self, operation: TrapOperation, key: &PropertyKey) -> ObjectError {
        let err = ObjectError::PolicyDenied {
            operation,
            key: key.to_string(),
        };
        if let Some(context) = self.context.upgrade() {
            context.record_error(
                COMPONENT,
                EVENT_POLICY_DENIED,
                &err,
                format!("{operation} {key} under {}", self.lookup),
            );
        }
        err
    }
}

impl Interceptable for ShadowTarget {
    fn kind(&self) -> ObjectKind {
        self.placeholder.kind()
    }

    fn get_prototype_of(&self) -> Result<Option<ObjectRef>, ObjectError> {
        self.membrane_prototype()
    }

    fn set_prototype_of(&self, proto: Option<ObjectRef>) -> Result<bool, ObjectError> {
        Reflect::set_prototype_of(&self.placeholder, proto)
    }

    fn is_extensible(&self) -> Result<bool, ObjectError> {
        Reflect::is_extensible(&self.placeholder)
    }

    fn prevent_extensions(&self) -> Result<bool, ObjectError> {
        Reflect::prevent_extensions(&self.placeholder)
    }

    fn get_own_property(
        &self,
        key: &PropertyKey,
    ) -> Result<Option<PropertyDescriptor>, ObjectError> {
        Reflect::get_own_property_descriptor(&self.placeholder, key)
    }

    fn define_own_property(
        &self,
        key: PropertyKey,
        desc: PropertyDescriptor,
    ) -> Result<bool, ObjectError> {
        Reflect::define_property(&self.placeholder, key, desc)
    }

    fn has_property(&self, key: &PropertyKey) -> Result<bool, ObjectError> {
        if Reflect::get_own_property_descriptor(&self.placeholder, key)?.is_some() {
            return Ok(true);
        }
        match self.lookup {
            ShadowLookupPolicy::Traverse => match self.membrane_prototype()? {
                Some(proto) => Reflect::has(&proto, key),
                None => Ok(false),
            },
            ShadowLookupPolicy::Block => Err(self.deny(TrapOperation::Has, key)),
            ShadowLookupPolicy::BlockAllowOwn => Ok(false),
        }
    }

    fn get(&self, key: &PropertyKey, receiver: &Value) -> Result<Value, ObjectError> {
        if self.diagnostics && key.is_str(DIAGNOSTIC_PROTO_TARGET) {
            return Ok(Value::Object(self.placeholder.clone()));
        }
        if Reflect::get_own_property_descriptor(&self.placeholder, key)?.is_some() {
            return Reflect::get(&self.placeholder, key, receiver);
        }
        match self.lookup {
            ShadowLookupPolicy::Traverse => match self.membrane_prototype()? {
                Some(proto) => Reflect::get(&proto, key, receiver),
                None => Ok(Value::Undefined),
            },
            ShadowLookupPolicy::Block | ShadowLookupPolicy::BlockAllowOwn => {
                Err(self.deny(TrapOperation::Get, key))
            }
        }
    }

    fn set(&self, key: PropertyKey, value: Value, receiver: &Value) -> Result<bool, ObjectError> {
        let own = Reflect::get_own_property_descriptor(&self.placeholder, &key)?;
        if own.is_some() {
            return ordinary_set_with_own_descriptor(own, None, key, value, receiver);
        }
        match self.lookup {
            ShadowLookupPolicy::Traverse => {
                let parent = self.membrane_prototype()?;
                ordinary_set_with_own_descriptor(None, parent, key, value, receiver)
            }
            ShadowLookupPolicy::Block => Err(self.deny(TrapOperation::Set, &key)),
            ShadowLookupPolicy::BlockAllowOwn => {
                ordinary_set_with_own_descriptor(None, None, key, value, receiver)
            }
        }
    }

    fn delete(&self, key: &PropertyKey) -> Result<bool, ObjectError> {
        Reflect::delete_property(&self.placeholder, key)
    }

    fn own_keys(&self) -> Result<Vec<PropertyKey>, ObjectError> {
        Reflect::own_keys(&self.placeholder)
    }

    fn call(&self, this: Value, args: Vec<Value>) -> Result<Value, ObjectError> {
        Reflect::apply(&self.placeholder, this, args)
    }
}
