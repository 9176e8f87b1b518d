//! Membrane engine: crossing, disclosure and wrapper traps.
//!
//! A membrane separates two object graphs.  Every value observed by an
//! intercepted operation is *crossed* from the graph it is known to come
//! from (`mines`) to the graph that will observe it (`others`):
//!
//! 1. an undisclosed gated key first runs the disclosure protocol,
//! 2. primitives pass through unchanged,
//! 3. a wrapper of this membrane unwraps to its original,
//! 4. anything else is wrapped (reusing the live wrapper if one exists).
//!
//! Callers always name the direction: two records of different graphs are
//! indistinguishable by shape.
//!
//! All per-membrane state lives in one [`MembraneContext`] shared by every
//! wrapper it creates.  Independent membranes share nothing.
//!
//! Re-entrancy: traps cross values, crossing may disclose, disclosure
//! defines properties that run user accessors.  No `RefCell` borrow is
//! held across any of these steps, and nesting is bounded by
//! `max_trap_depth`.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::{ConfigError, MembraneOptions};
use crate::error_code::HasErrorCode;
use crate::identity_registry::{Backing, IdentityRegistry, RegistryStats, WeakObjectMap};
use crate::membrane_events::{
    EVENT_DISCLOSURE_PATCHED, EVENT_INVARIANT_VIOLATION, EVENT_KEY_DISCLOSED,
    EVENT_WRAPPER_CREATED, EVENT_WRAPPER_RECREATED, EventLog, MembraneEvent,
};
use crate::object_model::{
    Interceptable, ObjectError, ObjectId, ObjectKind, ObjectRef, PropertyDescriptor, PropertyKey,
    Reflect, Symbol, Value,
};
use crate::shadow_target::ShadowTarget;
use crate::whitelist::PrivateKeyWhitelist;

pub const DIAGNOSTIC_ORIGINAL: &str = "__original__";
pub const DIAGNOSTIC_TARGET: &str = "__target__";

const COMPONENT: &str = "membrane";

// ---------------------------------------------------------------------------
// MembraneInvariant
// ---------------------------------------------------------------------------

/// Bookkeeping violations.  Any of these means wrapper registration
/// discipline was broken; they are never recovered from.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MembraneInvariant {
    #[error("no backing storage registered for exposed {original}")]
    MissingBackingStorage { original: ObjectId },
    #[error("{original} is already bound to a different counterpart")]
    RegistryConflict { original: ObjectId },
    #[error("membrane state is no longer reachable")]
    Detached,
}

// ---------------------------------------------------------------------------
// ExposureSet
// ---------------------------------------------------------------------------

/// Originals of one graph that have been wrapped for the opposite graph.
/// Members are held weakly.
#[derive(Clone, Default)]
pub struct ExposureSet {
    members: Rc<RefCell<WeakObjectMap<()>>>,
}

impl ExposureSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` if `original` was not yet a member.
    pub fn insert(&self, original: &ObjectRef) -> bool {
        self.members.borrow_mut().insert(original, ()).is_none()
    }

    pub fn contains(&self, original: &ObjectRef) -> bool {
        self.members.borrow().contains_key(original)
    }

    /// Live members in id (creation) order.  A snapshot: the set may grow
    /// while the caller iterates.
    pub fn live_members(&self) -> Vec<ObjectRef> {
        let mut members = self.members.borrow().live_keys();
        members.sort_by_key(ObjectRef::id);
        members
    }

    pub fn len(&self) -> usize {
        self.members.borrow().live_len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn sweep(&self) -> usize {
        self.members.borrow_mut().sweep()
    }

    pub fn same_set(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.members, &other.members)
    }
}

impl fmt::Debug for ExposureSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ExposureSet(live={})", self.len())
    }
}

// ---------------------------------------------------------------------------
// MembraneContext
// ---------------------------------------------------------------------------

/// Shared state of one membrane instance.
pub struct MembraneContext {
    options: MembraneOptions,
    registry: RefCell<IdentityRegistry>,
    whitelist: RefCell<PrivateKeyWhitelist>,
    events: RefCell<EventLog>,
    depth: Cell<u32>,
}

/// Releases one level of trap nesting on drop.
pub(crate) struct DepthGuard<'a> {
    depth: &'a Cell<u32>,
}

impl Drop for DepthGuard<'_> {
    fn drop(&mut self) {
        self.depth.set(self.depth.get().saturating_sub(1));
    }
}

impl MembraneContext {
    pub fn new(options: MembraneOptions) -> Result<Rc<Self>, ConfigError> {
        options.validate()?;
        Ok(Self::build(options))
    }

    fn build(options: MembraneOptions) -> Rc<Self> {
        let gating = options
            .enforce_private_whitelist
            .then_some(options.key_gating);
        Rc::new(Self {
            registry: RefCell::new(IdentityRegistry::new()),
            whitelist: RefCell::new(PrivateKeyWhitelist::new(gating)),
            events: RefCell::new(EventLog::new(options.record_events, options.max_events)),
            depth: Cell::new(0),
            options,
        })
    }

    pub fn options(&self) -> &MembraneOptions {
        &self.options
    }

    /// Cross `value` from graph `mines` to graph `others`.
    pub fn cross(
        self: &Rc<Self>,
        value: Value,
        mines: &ExposureSet,
        others: &ExposureSet,
    ) -> Result<Value, ObjectError> {
        match value {
            Value::Symbol(sym) => {
                let pending = self.whitelist.borrow().requires_disclosure(&sym);
                if pending {
                    self.disclose(&sym, mines, others)?;
                }
                Ok(Value::Symbol(sym))
            }
            Value::Object(object) => {
                let unwrapped = self.registry.borrow().lookup_original(&object);
                match unwrapped {
                    Some(original) => Ok(Value::Object(original)),
                    None => self.wrap(&object, mines, others).map(Value::Object),
                }
            }
            primitive => Ok(primitive),
        }
    }

    /// Cross every payload of a descriptor: data value, getter, setter.
    pub fn cross_descriptor(
        self: &Rc<Self>,
        desc: PropertyDescriptor,
        mines: &ExposureSet,
        others: &ExposureSet,
    ) -> Result<PropertyDescriptor, ObjectError> {
        Ok(match desc {
            PropertyDescriptor::Data {
                value,
                writable,
                enumerable,
                configurable,
            } => PropertyDescriptor::Data {
                value: self.cross(value, mines, others)?,
                writable,
                enumerable,
                configurable,
            },
            PropertyDescriptor::Accessor {
                get,
                set,
                enumerable,
                configurable,
            } => PropertyDescriptor::Accessor {
                get: self.cross_accessor(get, mines, others)?,
                set: self.cross_accessor(set, mines, others)?,
                enumerable,
                configurable,
            },
        })
    }

    fn cross_accessor(
        self: &Rc<Self>,
        function: Option<ObjectRef>,
        mines: &ExposureSet,
        others: &ExposureSet,
    ) -> Result<Option<ObjectRef>, ObjectError> {
        let Some(function) = function else {
            return Ok(None);
        };
        match self.cross(Value::Object(function), mines, others)? {
            Value::Object(crossed) => Ok(Some(crossed)),
            other => Err(ObjectError::TypeError(format!(
                "accessor crossed to {}",
                other.type_name()
            ))),
        }
    }

    /// First crossing of gated key `sym` from `mines` to `others`: whitelist
    /// it, then move every value already stored under it on the backing
    /// storage of an exposed `others` original onto the original itself.
    fn disclose(
        self: &Rc<Self>,
        sym: &Symbol,
        mines: &ExposureSet,
        others: &ExposureSet,
    ) -> Result<(), ObjectError> {
        if !self.whitelist.borrow_mut().insert(sym) {
            return Ok(());
        }
        // Snapshot: patching can wrap and expose further originals.
        let exposed = others.live_members();
        self.record(
            EVENT_KEY_DISCLOSED,
            "ok",
            format!("{sym} disclosed, checking {} exposed originals", exposed.len()),
        );

        let key = PropertyKey::Symbol(sym.clone());
        for original in exposed {
            let entry = self.registry.borrow().backing_entry(&original).cloned();
            let Some(entry) = entry else {
                let err = ObjectError::Invariant(MembraneInvariant::MissingBackingStorage {
                    original: original.id(),
                });
                self.record_error(
                    COMPONENT,
                    EVENT_INVARIANT_VIOLATION,
                    &err,
                    format!("disclosing {sym}"),
                );
                return Err(err);
            };
            // Shadow storage is released with its wrapper.
            let Some(backing) = entry.resolve(&original) else {
                continue;
            };
            let Some(desc) = Reflect::get_own_property_descriptor(&backing, &key)? else {
                continue;
            };
            let crossed = self.cross_descriptor(desc, mines, others)?;
            let applied = Reflect::define_property(&original, key.clone(), crossed)?;
            self.record(
                EVENT_DISCLOSURE_PATCHED,
                if applied { "ok" } else { "rejected" },
                format!("{sym} on {}", original.id()),
            );
        }
        Ok(())
    }

    /// Wrapper of `original` for observers in `others`, created on first
    /// use.  `original` must not itself be a wrapper of this membrane.
    pub fn wrap(
        self: &Rc<Self>,
        original: &ObjectRef,
        mines: &ExposureSet,
        others: &ExposureSet,
    ) -> Result<ObjectRef, ObjectError> {
        let existing = self.registry.borrow().lookup_wrapper(original);
        if let Some(wrapper) = existing {
            return Ok(wrapper);
        }

        let previous = self.registry.borrow().backing_entry(original).cloned();
        let recreated = previous.is_some();
        let target = match previous.and_then(|backing| backing.resolve(original)) {
            Some(storage) => storage,
            None if self.options.use_shadow_targets => {
                ObjectRef::new(ShadowTarget::new(original, self, mines, others))
            }
            None => original.clone(),
        };
        let backing = if target == *original {
            Backing::Original
        } else {
            Backing::shadow(&target)
        };

        let wrapper = ObjectRef::new(MembraneProxy {
            context: Rc::clone(self),
            kind: original.kind(),
            original: original.clone(),
            target,
            mines: mines.clone(),
            others: others.clone(),
        });

        let registered = {
            let mut registry = self.registry.borrow_mut();
            let registered = registry.register(original, &wrapper);
            if registered {
                registry.register_backing(original, backing);
            }
            registered
        };
        if !registered {
            let err = ObjectError::Invariant(MembraneInvariant::RegistryConflict {
                original: original.id(),
            });
            self.record_error(COMPONENT, EVENT_INVARIANT_VIOLATION, &err, "wrap");
            return Err(err);
        }
        mines.insert(original);

        self.record(
            if recreated {
                EVENT_WRAPPER_RECREATED
            } else {
                EVENT_WRAPPER_CREATED
            },
            "ok",
            format!("{} {} as {}", original.kind(), original.id(), wrapper.id()),
        );
        Ok(wrapper)
    }

    pub fn unwrap(&self, value: &ObjectRef) -> Option<ObjectRef> {
        self.registry.borrow().lookup_original(value)
    }

    pub fn wrapper_of(&self, original: &ObjectRef) -> Option<ObjectRef> {
        self.registry.borrow().lookup_wrapper(original)
    }

    pub fn is_wrapper(&self, value: &ObjectRef) -> bool {
        self.registry.borrow().is_wrapper(value)
    }

    pub fn bypasses(&self, key: &PropertyKey) -> bool {
        self.whitelist.borrow().bypasses(key)
    }

    pub fn is_disclosed(&self, sym: &Symbol) -> bool {
        self.whitelist.borrow().contains(sym)
    }

    pub fn disclosed_keys(&self) -> Vec<Symbol> {
        self.whitelist.borrow().disclosed().cloned().collect()
    }

    pub(crate) fn enter(&self) -> Result<DepthGuard<'_>, ObjectError> {
        let depth = self.depth.get().saturating_add(1);
        if depth > self.options.max_trap_depth {
            return Err(ObjectError::TrapDepthExceeded {
                depth,
                max: self.options.max_trap_depth,
            });
        }
        self.depth.set(depth);
        Ok(DepthGuard { depth: &self.depth })
    }

    fn record(&self, event: &str, outcome: &str, detail: String) {
        self.events
            .borrow_mut()
            .push(COMPONENT, event, outcome, None, detail);
    }

    pub(crate) fn record_error(
        &self,
        component: &str,
        event: &str,
        err: &ObjectError,
        detail: impl Into<String>,
    ) {
        self.events.borrow_mut().push(
            component,
            event,
            "error",
            Some(err.error_code().stable_code()),
            detail,
        );
    }

    pub fn events(&self) -> Vec<MembraneEvent> {
        self.events.borrow().events()
    }

    pub fn take_events(&self) -> Vec<MembraneEvent> {
        self.events.borrow_mut().take()
    }

    pub fn dropped_events(&self) -> u64 {
        self.events.borrow().dropped()
    }

    pub fn event_count(&self, event: &str) -> usize {
        self.events.borrow().count(event)
    }

    pub fn sweep(&self) -> usize {
        self.registry.borrow_mut().sweep()
    }

    pub fn registry_stats(&self) -> RegistryStats {
        self.registry.borrow().stats()
    }
}

// ---------------------------------------------------------------------------
// MembraneProxy: wrapper traps
// ---------------------------------------------------------------------------

/// Wrapper standing in for `original` on the `others` side.
struct MembraneProxy {
    context: Rc<MembraneContext>,
    kind: ObjectKind,
    original: ObjectRef,
    /// Backing storage for gated-key operations.  Sole owner of a shadow.
    target: ObjectRef,
    mines: ExposureSet,
    others: ExposureSet,
}

impl MembraneProxy {
    fn bypasses(&self, key: &PropertyKey) -> bool {
        self.context.bypasses(key)
    }

    /// Value arriving from the observing side.
    fn inward(&self, value: Value) -> Result<Value, ObjectError> {
        self.context.cross(value, &self.others, &self.mines)
    }

    /// Value leaving the original's side.
    fn outward(&self, value: Value) -> Result<Value, ObjectError> {
        self.context.cross(value, &self.mines, &self.others)
    }
}

impl Interceptable for MembraneProxy {
    fn kind(&self) -> ObjectKind {
        self.kind
    }

    fn get_prototype_of(&self) -> Result<Option<ObjectRef>, ObjectError> {
        let _guard = self.context.enter()?;
        let proto = Reflect::get_prototype_of(&self.original)?;
        self.outward(Value::from_prototype(proto))?.into_prototype()
    }

    fn set_prototype_of(&self, proto: Option<ObjectRef>) -> Result<bool, ObjectError> {
        let _guard = self.context.enter()?;
        let proto = self.inward(Value::from_prototype(proto))?.into_prototype()?;
        Reflect::set_prototype_of(&self.original, proto)
    }

    fn is_extensible(&self) -> Result<bool, ObjectError> {
        Reflect::is_extensible(&self.original)
    }

    fn prevent_extensions(&self) -> Result<bool, ObjectError> {
        Reflect::prevent_extensions(&self.original)
    }

    fn get_own_property(
        &self,
        key: &PropertyKey,
    ) -> Result<Option<PropertyDescriptor>, ObjectError> {
        if self.bypasses(key) {
            return Reflect::get_own_property_descriptor(&self.target, key);
        }
        let _guard = self.context.enter()?;
        match Reflect::get_own_property_descriptor(&self.original, key)? {
            Some(desc) => self
                .context
                .cross_descriptor(desc, &self.mines, &self.others)
                .map(Some),
            None => Ok(None),
        }
    }

    fn define_own_property(
        &self,
        key: PropertyKey,
        desc: PropertyDescriptor,
    ) -> Result<bool, ObjectError> {
        if self.bypasses(&key) {
            return Reflect::define_property(&self.target, key, desc);
        }
        let _guard = self.context.enter()?;
        let desc = self
            .context
            .cross_descriptor(desc, &self.others, &self.mines)?;
        Reflect::define_property(&self.original, key, desc)
    }

    fn has_property(&self, key: &PropertyKey) -> Result<bool, ObjectError> {
        let _guard = self.context.enter()?;
        if self.bypasses(key) {
            return Reflect::has(&self.target, key);
        }
        Reflect::has(&self.original, key)
    }

    fn get(&self, key: &PropertyKey, receiver: &Value) -> Result<Value, ObjectError> {
        if self.context.options().expose_diagnostics {
            if key.is_str(DIAGNOSTIC_ORIGINAL) {
                return Ok(Value::Object(self.original.clone()));
            }
            if key.is_str(DIAGNOSTIC_TARGET) {
                return Ok(Value::Object(self.target.clone()));
            }
        }
        // Bypassed lookups can loop through prototypes too.
        let _guard = self.context.enter()?;
        if self.bypasses(key) {
            return Reflect::get(&self.target, key, receiver);
        }
        let receiver = self.inward(receiver.clone())?;
        let value = Reflect::get(&self.original, key, &receiver)?;
        self.outward(value)
    }

    fn set(&self, key: PropertyKey, value: Value, receiver: &Value) -> Result<bool, ObjectError> {
        let _guard = self.context.enter()?;
        if self.bypasses(&key) {
            return Reflect::set(&self.target, key, value, receiver);
        }
        let value = self.inward(value)?;
        let receiver = self.inward(receiver.clone())?;
        Reflect::set(&self.original, key, value, &receiver)
    }

    fn delete(&self, key: &PropertyKey) -> Result<bool, ObjectError> {
        if self.bypasses(key) {
            return Reflect::delete_property(&self.target, key);
        }
        Reflect::delete_property(&self.original, key)
    }

    fn own_keys(&self) -> Result<Vec<PropertyKey>, ObjectError> {
        let keys = Reflect::own_keys(&self.original)?;
        Ok(keys.into_iter().filter(|key| !self.bypasses(key)).collect())
    }

    fn call(&self, this: Value, args: Vec<Value>) -> Result<Value, ObjectError> {
        let _guard = self.context.enter()?;
        let this = self.inward(this)?;
        let args = args
            .into_iter()
            .map(|arg| self.inward(arg))
            .collect::<Result<Vec<_>, _>>()?;
        let result = Reflect::apply(&self.original, this, args)?;
        self.outward(result)
    }
}

// ---------------------------------------------------------------------------
// Membrane handle
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MembraneStats {
    pub live_wrappers: usize,
    pub live_backings: usize,
    pub tracked_entries: usize,
    pub inner_exposed: usize,
    pub outer_exposed: usize,
    pub disclosed_keys: usize,
    /// Events evicted from the bounded ledger.
    pub dropped_events: u64,
}

/// One membrane between an *inner* graph (the root's) and an *outer*
/// graph (whoever holds the wrapped root).
#[derive(Clone)]
pub struct Membrane {
    context: Rc<MembraneContext>,
    inner: ExposureSet,
    outer: ExposureSet,
}

impl Membrane {
    pub fn new(options: MembraneOptions) -> Result<Self, ConfigError> {
        Ok(Self::from_context(MembraneContext::new(options)?))
    }

    pub fn with_default_options() -> Self {
        Self::from_context(MembraneContext::build(MembraneOptions::default()))
    }

    fn from_context(context: Rc<MembraneContext>) -> Self {
        Self {
            context,
            inner: ExposureSet::new(),
            outer: ExposureSet::new(),
        }
    }

    pub fn options(&self) -> &MembraneOptions {
        self.context.options()
    }

    pub fn context(&self) -> &Rc<MembraneContext> {
        &self.context
    }

    pub fn inner(&self) -> &ExposureSet {
        &self.inner
    }

    pub fn outer(&self) -> &ExposureSet {
        &self.outer
    }

    /// Expose an inner-graph root to the outer graph.
    pub fn wrap_root(&self, root: Value) -> Result<Value, ObjectError> {
        self.context.cross(root, &self.inner, &self.outer)
    }

    /// Set up two graphs at once: `left` is exposed to the right side and
    /// `right` to the left side.
    pub fn wrap_mutual(&self, left: Value, right: Value) -> Result<(Value, Value), ObjectError> {
        let wrapped_left = self.context.cross(left, &self.inner, &self.outer)?;
        let wrapped_right = self.context.cross(right, &self.outer, &self.inner)?;
        Ok((wrapped_left, wrapped_right))
    }

    pub fn cross(
        &self,
        value: Value,
        mines: &ExposureSet,
        others: &ExposureSet,
    ) -> Result<Value, ObjectError> {
        self.context.cross(value, mines, others)
    }

    /// Wrap an inner-graph value for the outer graph.  A value that already
    /// is a wrapper of this membrane is returned unchanged.
    pub fn wrap(&self, value: Value) -> Result<Value, ObjectError> {
        self.wrap_towards(value, &self.inner, &self.outer)
    }

    /// Wrap an outer-graph value for the inner graph.
    pub fn wrap_outer(&self, value: Value) -> Result<Value, ObjectError> {
        self.wrap_towards(value, &self.outer, &self.inner)
    }

    fn wrap_towards(
        &self,
        value: Value,
        mines: &ExposureSet,
        others: &ExposureSet,
    ) -> Result<Value, ObjectError> {
        if let Value::Object(object) = &value
            && self.context.is_wrapper(object)
        {
            return Ok(value);
        }
        self.context.cross(value, mines, others)
    }

    /// The original behind a wrapper; any other value is returned as is.
    pub fn unwrap(&self, value: Value) -> Value {
        match &value {
            Value::Object(object) => match self.context.unwrap(object) {
                Some(original) => Value::Object(original),
                None => value,
            },
            _ => value,
        }
    }

    pub fn original_of(&self, wrapper: &ObjectRef) -> Option<ObjectRef> {
        self.context.unwrap(wrapper)
    }

    pub fn wrapper_of(&self, original: &ObjectRef) -> Option<ObjectRef> {
        self.context.wrapper_of(original)
    }

    pub fn is_wrapper(&self, value: &ObjectRef) -> bool {
        self.context.is_wrapper(value)
    }

    pub fn is_disclosed(&self, sym: &Symbol) -> bool {
        self.context.is_disclosed(sym)
    }

    pub fn disclosed_keys(&self) -> Vec<Symbol> {
        self.context.disclosed_keys()
    }

    pub fn events(&self) -> Vec<MembraneEvent> {
        self.context.events()
    }

    pub fn take_events(&self) -> Vec<MembraneEvent> {
        self.context.take_events()
    }

    /// Reclaim bookkeeping for objects that are gone.  Returns the number
    /// of entries removed.
    pub fn sweep(&self) -> usize {
        self.context.sweep() + self.inner.sweep() + self.outer.sweep()
    }

    pub fn stats(&self) -> MembraneStats {
        let registry = self.context.registry_stats();
        MembraneStats {
            live_wrappers: registry.live_wrappers,
            live_backings: registry.live_backings,
            tracked_entries: registry.tracked_entries,
            inner_exposed: self.inner.len(),
            outer_exposed: self.outer.len(),
            disclosed_keys: self.context.whitelist.borrow().len(),
            dropped_events: self.context.dropped_events(),
        }
    }
}

impl fmt::Debug for Membrane {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Membrane")
            .field("options", self.options())
            .field("stats", &self.stats())
            .finish()
    }
}

/// Wrap `root` behind a fresh membrane.
pub fn create_membrane(root: Value, options: MembraneOptions) -> Result<Value, ObjectError> {
    Membrane::new(options)?.wrap_root(root)
}

/// Wrap two roots behind one fresh membrane, one for each side.
pub fn create_mutual_membrane(
    left: Value,
    right: Value,
    options: MembraneOptions,
) -> Result<(Value, Value), ObjectError> {
    Membrane::new(options)?.wrap_mutual(left, right)
}
