//! Host object model the membrane operates on.
//!
//! Every object is an [`Interceptable`]: a polymorphic handle exposing the
//! internal methods a membrane needs to intercept (`get`, `set`, `call`,
//! `has_property`, prototype lookup, descriptor access).  Ordinary objects,
//! membrane wrappers and shadow targets all implement the same trait, so
//! membrane logic is written purely against this interface.
//!
//! - **Symbols**: unforgeable keys; a *private* symbol never shows up in
//!   `own_keys` and is only trappable once disclosed to a membrane.
//! - **Property descriptors**: data vs accessor, configurable/enumerable/writable
//! - **Ordinary algorithms**: receiver-aware `[[Get]]`/`[[Set]]`/`[[HasProperty]]`
//!   shared by every implementation that wants ordinary semantics.
//! - **Reflect**: one free function per internal method.
//!
//! The model is single-threaded: objects live behind `Rc` and mutate through
//! `RefCell`/`Cell`.  No borrow is held while user code runs.
//!
//! `BTreeMap` for deterministic property ordering.

use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::fmt;
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::ConfigError;
use crate::membrane::MembraneInvariant;

/// Maximum ordinary prototype chain depth walked in a single lookup.
pub const MAX_PROTOTYPE_CHAIN_DEPTH: u32 = 1024;

static NEXT_SYMBOL_ID: AtomicU64 = AtomicU64::new(1);
static NEXT_OBJECT_ID: AtomicU64 = AtomicU64::new(1);

// ---------------------------------------------------------------------------
// Symbol: unforgeable atomic key
// ---------------------------------------------------------------------------

/// Identity of a symbol.  Only the allocator hands these out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct SymbolId(u64);

impl SymbolId {
    fn fresh() -> Self {
        Self(NEXT_SYMBOL_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

/// A unique property key.  Two symbols are equal only if they came from the
/// same constructor call; the description plays no part in identity.
#[derive(Clone)]
pub struct Symbol {
    id: SymbolId,
    description: Option<Rc<str>>,
    private: bool,
}

impl Symbol {
    /// Create a public symbol.
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            id: SymbolId::fresh(),
            description: Some(Rc::from(description.into())),
            private: false,
        }
    }

    /// Create a public symbol without a description.
    pub fn anonymous() -> Self {
        Self {
            id: SymbolId::fresh(),
            description: None,
            private: false,
        }
    }

    /// Create a private symbol.  Operations keyed by it bypass membrane
    /// traps until the symbol itself has crossed the membrane.
    pub fn new_private(description: impl Into<String>) -> Self {
        Self {
            id: SymbolId::fresh(),
            description: Some(Rc::from(description.into())),
            private: true,
        }
    }

    pub fn id(&self) -> SymbolId {
        self.id
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn is_private(&self) -> bool {
        self.private
    }
}

impl PartialEq for Symbol {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Symbol {}

impl PartialOrd for Symbol {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Symbol {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.id.cmp(&other.id)
    }
}

impl std::hash::Hash for Symbol {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Debug for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self}#{}", self.id.0)
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = if self.private {
            "PrivateSymbol"
        } else {
            "Symbol"
        };
        write!(f, "{tag}({})", self.description().unwrap_or(""))
    }
}

// ---------------------------------------------------------------------------
// PropertyKey: string or symbol
// ---------------------------------------------------------------------------

/// A property key: either a string or a symbol.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PropertyKey {
    /// String key.
    String(String),
    /// Symbol key (public or private).
    Symbol(Symbol),
}

impl PropertyKey {
    pub fn as_symbol(&self) -> Option<&Symbol> {
        match self {
            Self::Symbol(sym) => Some(sym),
            Self::String(_) => None,
        }
    }

    pub fn is_private(&self) -> bool {
        self.as_symbol().is_some_and(Symbol::is_private)
    }

    pub fn is_str(&self, s: &str) -> bool {
        matches!(self, Self::String(k) if k == s)
    }
}

impl fmt::Display for PropertyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::String(s) => write!(f, "{s}"),
            Self::Symbol(sym) => write!(f, "{sym}"),
        }
    }
}

impl From<&str> for PropertyKey {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<String> for PropertyKey {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<Symbol> for PropertyKey {
    fn from(sym: Symbol) -> Self {
        Self::Symbol(sym)
    }
}

impl From<&Symbol> for PropertyKey {
    fn from(sym: &Symbol) -> Self {
        Self::Symbol(sym.clone())
    }
}

impl From<&PropertyKey> for PropertyKey {
    fn from(key: &PropertyKey) -> Self {
        key.clone()
    }
}

// ---------------------------------------------------------------------------
// ObjectId / ObjectKind
// ---------------------------------------------------------------------------

/// Process-unique object identity.  Never reused, so a stale id in a weak
/// map can never alias a newer object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct ObjectId(u64);

impl ObjectId {
    fn fresh() -> Self {
        Self(NEXT_OBJECT_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "object#{}", self.0)
    }
}

/// Structural shape of an object: what a shadow placeholder has to mimic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectKind {
    Plain,
    Array,
    Function,
}

impl ObjectKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Plain => "plain",
            Self::Array => "array",
            Self::Function => "function",
        }
    }
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Value
// ---------------------------------------------------------------------------

/// Runtime value.  Everything except `Object` is a primitive and crosses a
/// membrane unchanged.
#[derive(Debug, Clone)]
pub enum Value {
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    Str(String),
    Symbol(Symbol),
    Object(ObjectRef),
}

impl Value {
    pub fn is_primitive(&self) -> bool {
        !self.is_object()
    }

    pub fn is_object(&self) -> bool {
        matches!(self, Self::Object(_))
    }

    pub fn is_undefined(&self) -> bool {
        matches!(self, Self::Undefined)
    }

    pub fn is_callable(&self) -> bool {
        matches!(self, Self::Object(o) if o.is_callable())
    }

    pub fn as_object(&self) -> Option<&ObjectRef> {
        match self {
            Self::Object(o) => Some(o),
            _ => None,
        }
    }

    pub fn as_symbol(&self) -> Option<&Symbol> {
        match self {
            Self::Symbol(sym) => Some(sym),
            _ => None,
        }
    }

    /// Borrow the object or fail with a `TypeError`.
    pub fn expect_object(&self) -> Result<&ObjectRef, ObjectError> {
        self.as_object()
            .ok_or_else(|| ObjectError::TypeError(format!("{} is not an object", self.type_name())))
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Undefined => "undefined",
            Self::Null => "null",
            Self::Bool(_) => "boolean",
            Self::Number(_) => "number",
            Self::Str(_) => "string",
            Self::Symbol(_) => "symbol",
            Self::Object(o) if o.is_callable() => "function",
            Self::Object(_) => "object",
        }
    }

    /// SameValue comparison: `NaN` equals itself, `+0` and `-0` differ,
    /// objects compare by identity.
    pub fn same_value(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Undefined, Self::Undefined) | (Self::Null, Self::Null) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Number(a), Self::Number(b)) => {
                (a.is_nan() && b.is_nan()) || (a == b && a.is_sign_negative() == b.is_sign_negative())
            }
            (Self::Str(a), Self::Str(b)) => a == b,
            (Self::Symbol(a), Self::Symbol(b)) => a == b,
            (Self::Object(a), Self::Object(b)) => a == b,
            _ => false,
        }
    }

    /// `Object | Null` as a prototype slot value.
    pub fn from_prototype(proto: Option<ObjectRef>) -> Self {
        match proto {
            Some(o) => Self::Object(o),
            None => Self::Null,
        }
    }

    /// Interpret this value as a prototype slot (`Object` or `Null`).
    pub fn into_prototype(self) -> Result<Option<ObjectRef>, ObjectError> {
        match self {
            Self::Object(o) => Ok(Some(o)),
            Self::Null => Ok(None),
            other => Err(ObjectError::TypeError(format!(
                "object prototype may only be an object or null, got {}",
                other.type_name()
            ))),
        }
    }

    /// `value[key]`, using the value itself as receiver.
    pub fn get(&self, key: impl Into<PropertyKey>) -> Result<Value, ObjectError> {
        let key = key.into();
        match self {
            Self::Object(o) => Reflect::get(o, &key, self),
            Self::Undefined | Self::Null => Err(ObjectError::TypeError(format!(
                "cannot read property '{key}' of {}",
                self.type_name()
            ))),
            _ => Ok(Value::Undefined),
        }
    }

    /// `value[key] = v`, using the value itself as receiver.
    pub fn set(
        &self,
        key: impl Into<PropertyKey>,
        value: impl Into<Value>,
    ) -> Result<bool, ObjectError> {
        let key = key.into();
        let target = self.as_object().ok_or_else(|| {
            ObjectError::TypeError(format!(
                "cannot set property '{key}' on {}",
                self.type_name()
            ))
        })?;
        Reflect::set(target, key, value.into(), self)
    }

    /// `value(...args)` with an undefined `this`.
    pub fn call(&self, args: Vec<Value>) -> Result<Value, ObjectError> {
        Reflect::apply(self.expect_object()?, Value::Undefined, args)
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.same_value(other)
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Undefined => write!(f, "undefined"),
            Self::Null => write!(f, "null"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Number(n) => write!(f, "{n}"),
            Self::Str(s) => write!(f, "{s}"),
            Self::Symbol(sym) => write!(f, "{sym}"),
            Self::Object(o) => write!(f, "[{} {}]", o.kind(), o.id()),
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Self::Number(n)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Self::Number(f64::from(n))
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::Str(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::Str(s)
    }
}

impl From<Symbol> for Value {
    fn from(sym: Symbol) -> Self {
        Self::Symbol(sym)
    }
}

impl From<&Symbol> for Value {
    fn from(sym: &Symbol) -> Self {
        Self::Symbol(sym.clone())
    }
}

impl From<ObjectRef> for Value {
    fn from(o: ObjectRef) -> Self {
        Self::Object(o)
    }
}

impl From<&ObjectRef> for Value {
    fn from(o: &ObjectRef) -> Self {
        Self::Object(o.clone())
    }
}

impl From<&Value> for Value {
    fn from(v: &Value) -> Self {
        v.clone()
    }
}

// ---------------------------------------------------------------------------
// PropertyDescriptor
// ---------------------------------------------------------------------------

/// Property descriptor.
#[derive(Debug, Clone, PartialEq)]
pub enum PropertyDescriptor {
    /// Data descriptor: has `value` and `writable`.
    Data {
        value: Value,
        writable: bool,
        enumerable: bool,
        configurable: bool,
    },
    /// Accessor descriptor: has `get` and/or `set`.
    Accessor {
        get: Option<ObjectRef>,
        set: Option<ObjectRef>,
        enumerable: bool,
        configurable: bool,
    },
}

impl PropertyDescriptor {
    /// Create a default data descriptor (writable, enumerable, configurable).
    pub fn data(value: impl Into<Value>) -> Self {
        Self::Data {
            value: value.into(),
            writable: true,
            enumerable: true,
            configurable: true,
        }
    }

    /// Create a non-writable, non-enumerable, non-configurable data descriptor.
    pub fn data_frozen(value: impl Into<Value>) -> Self {
        Self::Data {
            value: value.into(),
            writable: false,
            enumerable: false,
            configurable: false,
        }
    }

    /// Create an enumerable, configurable accessor descriptor.
    pub fn accessor(get: Option<ObjectRef>, set: Option<ObjectRef>) -> Self {
        Self::Accessor {
            get,
            set,
            enumerable: true,
            configurable: true,
        }
    }

    pub fn is_configurable(&self) -> bool {
        match self {
            Self::Data { configurable, .. } | Self::Accessor { configurable, .. } => *configurable,
        }
    }

    pub fn is_enumerable(&self) -> bool {
        match self {
            Self::Data { enumerable, .. } | Self::Accessor { enumerable, .. } => *enumerable,
        }
    }

    pub fn is_data(&self) -> bool {
        matches!(self, Self::Data { .. })
    }

    pub fn is_accessor(&self) -> bool {
        matches!(self, Self::Accessor { .. })
    }

    /// Get the value if this is a data descriptor.
    pub fn value(&self) -> Option<&Value> {
        match self {
            Self::Data { value, .. } => Some(value),
            Self::Accessor { .. } => None,
        }
    }

    /// Is this a data descriptor with writable=true?
    pub fn is_writable(&self) -> bool {
        match self {
            Self::Data { writable, .. } => *writable,
            Self::Accessor { .. } => false,
        }
    }

    /// Same attributes with a replaced data value.  Accessors become a
    /// default data descriptor.
    pub fn with_value(self, value: Value) -> Self {
        match self {
            Self::Data {
                writable,
                enumerable,
                configurable,
                ..
            } => Self::Data {
                value,
                writable,
                enumerable,
                configurable,
            },
            Self::Accessor { .. } => Self::data(value),
        }
    }
}

// ---------------------------------------------------------------------------
// ObjectError
// ---------------------------------------------------------------------------

/// Internal method a policy can refuse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrapOperation {
    Get,
    Set,
    Has,
}

impl TrapOperation {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Get => "get",
            Self::Set => "set",
            Self::Has => "has",
        }
    }
}

impl fmt::Display for TrapOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors from object model and membrane operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ObjectError {
    #[error("TypeError: {0}")]
    TypeError(String),
    #[error("TypeError: prototype chain cycle detected")]
    PrototypeCycleDetected,
    #[error("TypeError: prototype chain depth {depth} exceeds max {max}")]
    PrototypeChainTooDeep { depth: u32, max: u32 },
    /// A structural-lookup policy refused the operation.
    #[error("policy denied {operation} of '{key}' past the membrane")]
    PolicyDenied { operation: TrapOperation, key: String },
    /// Membrane bookkeeping is inconsistent.  Fatal.
    #[error("membrane invariant violated: {0}")]
    Invariant(MembraneInvariant),
    #[error("trap nesting depth {depth} exceeds max {max}")]
    TrapDepthExceeded { depth: u32, max: u32 },
    #[error("invalid membrane options: {0}")]
    InvalidOptions(#[from] ConfigError),
}

impl ObjectError {
    pub fn not_callable(kind: ObjectKind) -> Self {
        Self::TypeError(format!("{kind} object is not a function"))
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Invariant(_))
    }
}

// ---------------------------------------------------------------------------
// Interceptable: the trap dispatcher seam
// ---------------------------------------------------------------------------

/// Internal methods of an object.  Every operation the membrane intercepts
/// is one of these; a wrapper overrides all of them.
pub trait Interceptable {
    fn kind(&self) -> ObjectKind;

    /// Whether `get_prototype_of` is a plain slot read.  Prototype chain
    /// walks only iterate through ordinary objects and dispatch otherwise.
    fn is_ordinary(&self) -> bool {
        false
    }

    fn get_prototype_of(&self) -> Result<Option<ObjectRef>, ObjectError>;

    fn set_prototype_of(&self, proto: Option<ObjectRef>) -> Result<bool, ObjectError>;

    fn is_extensible(&self) -> Result<bool, ObjectError>;

    fn prevent_extensions(&self) -> Result<bool, ObjectError>;

    fn get_own_property(&self, key: &PropertyKey)
    -> Result<Option<PropertyDescriptor>, ObjectError>;

    fn define_own_property(
        &self,
        key: PropertyKey,
        desc: PropertyDescriptor,
    ) -> Result<bool, ObjectError>;

    fn has_property(&self, key: &PropertyKey) -> Result<bool, ObjectError>;

    fn get(&self, key: &PropertyKey, receiver: &Value) -> Result<Value, ObjectError>;

    fn set(&self, key: PropertyKey, value: Value, receiver: &Value) -> Result<bool, ObjectError>;

    fn delete(&self, key: &PropertyKey) -> Result<bool, ObjectError>;

    fn own_keys(&self) -> Result<Vec<PropertyKey>, ObjectError>;

    fn call(&self, this: Value, args: Vec<Value>) -> Result<Value, ObjectError>;
}

// ---------------------------------------------------------------------------
// ObjectRef / WeakObjectRef
// ---------------------------------------------------------------------------

/// Strong, shared reference to an object.  Equality is identity.
#[derive(Clone)]
pub struct ObjectRef {
    id: ObjectId,
    inner: Rc<dyn Interceptable>,
}

impl ObjectRef {
    pub fn new<T: Interceptable + 'static>(object: T) -> Self {
        Self {
            id: ObjectId::fresh(),
            inner: Rc::new(object),
        }
    }

    /// Empty plain object with no prototype.
    pub fn plain() -> Self {
        Self::new(OrdinaryObject::new(ObjectKind::Plain, None))
    }

    /// Empty plain object with the given prototype.
    pub fn with_prototype(proto: Option<ObjectRef>) -> Self {
        Self::new(OrdinaryObject::new(ObjectKind::Plain, proto))
    }

    /// Array-shaped object holding `items` under index keys plus `length`.
    /// Defining an index at or past `length` grows it.
    pub fn array(items: Vec<Value>) -> Self {
        let object = OrdinaryObject::new(ObjectKind::Array, None);
        {
            let mut props = object.properties.borrow_mut();
            let len = items.len();
            for (idx, item) in items.into_iter().enumerate() {
                props.insert(
                    PropertyKey::String(idx.to_string()),
                    PropertyDescriptor::data(item),
                );
            }
            props.insert(
                PropertyKey::from("length"),
                PropertyDescriptor::Data {
                    value: Value::Number(len as f64),
                    writable: true,
                    enumerable: false,
                    configurable: false,
                },
            );
        }
        Self::new(object)
    }

    /// Native function object.
    pub fn function(
        behavior: impl Fn(&Value, &[Value]) -> Result<Value, ObjectError> + 'static,
    ) -> Self {
        Self::new(OrdinaryObject::function(Rc::new(behavior), None))
    }

    pub fn id(&self) -> ObjectId {
        self.id
    }

    pub fn kind(&self) -> ObjectKind {
        self.inner.kind()
    }

    pub fn is_callable(&self) -> bool {
        self.kind() == ObjectKind::Function
    }

    pub fn downgrade(&self) -> WeakObjectRef {
        WeakObjectRef {
            id: self.id,
            inner: Rc::downgrade(&self.inner),
        }
    }

    /// Number of strong references to the underlying object.
    pub fn strong_count(&self) -> usize {
        Rc::strong_count(&self.inner)
    }

    pub fn interceptable(&self) -> &dyn Interceptable {
        self.inner.as_ref()
    }

    /// `self[key]` with `self` as receiver.
    pub fn get(&self, key: impl Into<PropertyKey>) -> Result<Value, ObjectError> {
        Reflect::get(self, &key.into(), &Value::Object(self.clone()))
    }

    /// `self[key] = value` with `self` as receiver.
    pub fn set(
        &self,
        key: impl Into<PropertyKey>,
        value: impl Into<Value>,
    ) -> Result<bool, ObjectError> {
        Reflect::set(self, key.into(), value.into(), &Value::Object(self.clone()))
    }

    /// `key in self`.
    pub fn has(&self, key: impl Into<PropertyKey>) -> Result<bool, ObjectError> {
        Reflect::has(self, &key.into())
    }

    pub fn call(&self, this: impl Into<Value>, args: Vec<Value>) -> Result<Value, ObjectError> {
        Reflect::apply(self, this.into(), args)
    }

    pub fn prototype(&self) -> Result<Option<ObjectRef>, ObjectError> {
        Reflect::get_prototype_of(self)
    }

    pub fn set_prototype(&self, proto: Option<ObjectRef>) -> Result<bool, ObjectError> {
        Reflect::set_prototype_of(self, proto)
    }
}

impl PartialEq for ObjectRef {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for ObjectRef {}

impl std::hash::Hash for ObjectRef {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Debug for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectRef({}, {})", self.id, self.kind())
    }
}

/// Non-owning reference to an object.
#[derive(Clone)]
pub struct WeakObjectRef {
    id: ObjectId,
    inner: Weak<dyn Interceptable>,
}

impl WeakObjectRef {
    pub fn id(&self) -> ObjectId {
        self.id
    }

    pub fn upgrade(&self) -> Option<ObjectRef> {
        self.inner.upgrade().map(|inner| ObjectRef { id: self.id, inner })
    }

    pub fn is_alive(&self) -> bool {
        self.inner.strong_count() > 0
    }
}

impl fmt::Debug for WeakObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = if self.is_alive() { "alive" } else { "dead" };
        write!(f, "WeakObjectRef({}, {state})", self.id)
    }
}

// ---------------------------------------------------------------------------
// OrdinaryObject
// ---------------------------------------------------------------------------

/// Behaviour of a native function: `(this, args) -> result`.
pub type NativeFunction = Rc<dyn Fn(&Value, &[Value]) -> Result<Value, ObjectError>>;

/// An object with ordinary internal methods.
pub struct OrdinaryObject {
    kind: ObjectKind,
    /// `[[Prototype]]` (None means end of chain).
    prototype: RefCell<Option<ObjectRef>>,
    /// `[[Extensible]]`.
    extensible: Cell<bool>,
    /// Own properties keyed by PropertyKey.
    properties: RefCell<BTreeMap<PropertyKey, PropertyDescriptor>>,
    behavior: Option<NativeFunction>,
}

impl OrdinaryObject {
    /// Non-callable object of the given shape.  A `Function` kind built here
    /// is a no-op function returning `undefined`.
    pub fn new(kind: ObjectKind, prototype: Option<ObjectRef>) -> Self {
        let behavior: Option<NativeFunction> = match kind {
            ObjectKind::Function => Some(Rc::new(|_: &Value, _: &[Value]| Ok(Value::Undefined))),
            ObjectKind::Plain | ObjectKind::Array => None,
        };
        Self {
            kind,
            prototype: RefCell::new(prototype),
            extensible: Cell::new(true),
            properties: RefCell::new(BTreeMap::new()),
            behavior,
        }
    }

    pub fn function(behavior: NativeFunction, prototype: Option<ObjectRef>) -> Self {
        Self {
            kind: ObjectKind::Function,
            prototype: RefCell::new(prototype),
            extensible: Cell::new(true),
            properties: RefCell::new(BTreeMap::new()),
            behavior: Some(behavior),
        }
    }

    /// Validate a `[[DefineOwnProperty]]` request against the current
    /// descriptor.  `true` means the new descriptor may replace it.
    fn is_compatible(current: &PropertyDescriptor, desc: &PropertyDescriptor) -> bool {
        if current.is_configurable() {
            return true;
        }
        if desc.is_configurable() || desc.is_enumerable() != current.is_enumerable() {
            return false;
        }
        match (current, desc) {
            (
                PropertyDescriptor::Data {
                    value: current_v,
                    writable: current_w,
                    ..
                },
                PropertyDescriptor::Data {
                    value: new_v,
                    writable: new_w,
                    ..
                },
            ) => *current_w || (!new_w && current_v.same_value(new_v)),
            (
                PropertyDescriptor::Accessor {
                    get: cur_get,
                    set: cur_set,
                    ..
                },
                PropertyDescriptor::Accessor {
                    get: new_get,
                    set: new_set,
                    ..
                },
            ) => cur_get == new_get && cur_set == new_set,
            // Cannot change data↔accessor type on a non-configurable property.
            _ => false,
        }
    }
}

impl Interceptable for OrdinaryObject {
    fn kind(&self) -> ObjectKind {
        self.kind
    }

    fn is_ordinary(&self) -> bool {
        true
    }

    fn get_prototype_of(&self) -> Result<Option<ObjectRef>, ObjectError> {
        Ok(self.prototype.borrow().clone())
    }

    fn set_prototype_of(&self, proto: Option<ObjectRef>) -> Result<bool, ObjectError> {
        if *self.prototype.borrow() == proto {
            return Ok(true);
        }
        if !self.extensible.get() {
            return Ok(false);
        }
        *self.prototype.borrow_mut() = proto;
        Ok(true)
    }

    fn is_extensible(&self) -> Result<bool, ObjectError> {
        Ok(self.extensible.get())
    }

    fn prevent_extensions(&self) -> Result<bool, ObjectError> {
        self.extensible.set(false);
        Ok(true)
    }

    fn get_own_property(
        &self,
        key: &PropertyKey,
    ) -> Result<Option<PropertyDescriptor>, ObjectError> {
        Ok(self.properties.borrow().get(key).cloned())
    }

    fn define_own_property(
        &self,
        key: PropertyKey,
        desc: PropertyDescriptor,
    ) -> Result<bool, ObjectError> {
        let mut props = self.properties.borrow_mut();
        let index = match self.kind {
            ObjectKind::Array => array_index(&key),
            ObjectKind::Plain | ObjectKind::Function => None,
        };
        let accepted = match props.get(&key) {
            Some(current) => Self::is_compatible(current, &desc),
            None => self.extensible.get() && index.is_none_or(|i| length_accepts(&props, i)),
        };
        if !accepted {
            return Ok(false);
        }
        props.insert(key, desc);
        if let Some(index) = index {
            grow_length(&mut props, index);
        }
        Ok(true)
    }

    fn has_property(&self, key: &PropertyKey) -> Result<bool, ObjectError> {
        ordinary_has(self, key)
    }

    fn get(&self, key: &PropertyKey, receiver: &Value) -> Result<Value, ObjectError> {
        ordinary_get(self, key, receiver)
    }

    fn set(&self, key: PropertyKey, value: Value, receiver: &Value) -> Result<bool, ObjectError> {
        ordinary_set(self, key, value, receiver)
    }

    fn delete(&self, key: &PropertyKey) -> Result<bool, ObjectError> {
        let mut props = self.properties.borrow_mut();
        match props.get(key) {
            Some(desc) if !desc.is_configurable() => Ok(false),
            Some(_) => {
                props.remove(key);
                Ok(true)
            }
            // Absent property: vacuously deleted.
            None => Ok(true),
        }
    }

    /// Integer indices (numeric order), then string keys, then public
    /// symbols.  Private symbols are never enumerated.
    fn own_keys(&self) -> Result<Vec<PropertyKey>, ObjectError> {
        let props = self.properties.borrow();
        let mut int_keys: Vec<(u64, PropertyKey)> = Vec::new();
        let mut str_keys: Vec<PropertyKey> = Vec::new();
        let mut sym_keys: Vec<PropertyKey> = Vec::new();

        for key in props.keys() {
            match key {
                PropertyKey::String(s) => {
                    if let Ok(n) = s.parse::<u64>() {
                        int_keys.push((n, key.clone()));
                    } else {
                        str_keys.push(key.clone());
                    }
                }
                PropertyKey::Symbol(sym) if !sym.is_private() => sym_keys.push(key.clone()),
                PropertyKey::Symbol(_) => {}
            }
        }

        int_keys.sort_by_key(|(n, _)| *n);
        let mut result: Vec<PropertyKey> = int_keys.into_iter().map(|(_, k)| k).collect();
        result.extend(str_keys);
        result.extend(sym_keys);
        Ok(result)
    }

    fn call(&self, this: Value, args: Vec<Value>) -> Result<Value, ObjectError> {
        match &self.behavior {
            // Clone out so the function may re-enter this object.
            Some(behavior) => {
                let behavior = Rc::clone(behavior);
                behavior(&this, &args)
            }
            None => Err(ObjectError::not_callable(self.kind)),
        }
    }
}

// ---------------------------------------------------------------------------
// Array length
// ---------------------------------------------------------------------------

/// Canonical array index named by `key`, if any.
fn array_index(key: &PropertyKey) -> Option<u32> {
    let PropertyKey::String(s) = key else {
        return None;
    };
    s.parse::<u32>()
        .ok()
        .filter(|n| *n != u32::MAX && n.to_string() == *s)
}

fn current_length(props: &BTreeMap<PropertyKey, PropertyDescriptor>) -> Option<(f64, bool)> {
    match props.get(&PropertyKey::from("length")) {
        Some(PropertyDescriptor::Data {
            value: Value::Number(len),
            writable,
            ..
        }) => Some((*len, *writable)),
        _ => None,
    }
}

/// A new index at or past a read-only `length` is refused.
fn length_accepts(props: &BTreeMap<PropertyKey, PropertyDescriptor>, index: u32) -> bool {
    match current_length(props) {
        Some((len, writable)) => writable || f64::from(index) < len,
        None => true,
    }
}

/// Grow `length` past `index`.  Writing `length` never truncates.
fn grow_length(props: &mut BTreeMap<PropertyKey, PropertyDescriptor>, index: u32) {
    if let Some((len, true)) = current_length(props)
        && f64::from(index) >= len
        && let Some(PropertyDescriptor::Data { value, .. }) =
            props.get_mut(&PropertyKey::from("length"))
    {
        *value = Value::Number(f64::from(index) + 1.0);
    }
}

// ---------------------------------------------------------------------------
// Ordinary algorithms
// ---------------------------------------------------------------------------

fn read_descriptor(desc: PropertyDescriptor, receiver: &Value) -> Result<Value, ObjectError> {
    match desc {
        PropertyDescriptor::Data { value, .. } => Ok(value),
        PropertyDescriptor::Accessor { get: Some(getter), .. } => {
            Reflect::apply(&getter, receiver.clone(), Vec::new())
        }
        PropertyDescriptor::Accessor { get: None, .. } => Ok(Value::Undefined),
    }
}

/// Walk ordinary ancestors of `object` until `key` is found as an own
/// property or a non-ordinary ancestor is reached.
enum ChainLookup {
    Found(PropertyDescriptor),
    Dispatch(ObjectRef),
    Missing,
}

fn lookup_chain(object: &dyn Interceptable, key: &PropertyKey) -> Result<ChainLookup, ObjectError> {
    if let Some(desc) = object.get_own_property(key)? {
        return Ok(ChainLookup::Found(desc));
    }
    let mut current = object.get_prototype_of()?;
    let mut depth: u32 = 0;
    while let Some(parent) = current {
        if !parent.inner.is_ordinary() {
            return Ok(ChainLookup::Dispatch(parent));
        }
        depth += 1;
        if depth > MAX_PROTOTYPE_CHAIN_DEPTH {
            return Err(ObjectError::PrototypeChainTooDeep {
                depth,
                max: MAX_PROTOTYPE_CHAIN_DEPTH,
            });
        }
        if let Some(desc) = parent.inner.get_own_property(key)? {
            return Ok(ChainLookup::Found(desc));
        }
        current = parent.inner.get_prototype_of()?;
    }
    Ok(ChainLookup::Missing)
}

/// Ordinary `[[Get]]`: own property, else the prototype's `[[Get]]` with the
/// original receiver.
pub fn ordinary_get(
    object: &dyn Interceptable,
    key: &PropertyKey,
    receiver: &Value,
) -> Result<Value, ObjectError> {
    match lookup_chain(object, key)? {
        ChainLookup::Found(desc) => read_descriptor(desc, receiver),
        ChainLookup::Dispatch(parent) => Reflect::get(&parent, key, receiver),
        ChainLookup::Missing => Ok(Value::Undefined),
    }
}

/// Ordinary `[[HasProperty]]`.
pub fn ordinary_has(object: &dyn Interceptable, key: &PropertyKey) -> Result<bool, ObjectError> {
    match lookup_chain(object, key)? {
        ChainLookup::Found(_) => Ok(true),
        ChainLookup::Dispatch(parent) => Reflect::has(&parent, key),
        ChainLookup::Missing => Ok(false),
    }
}

/// Ordinary `[[Set]]`.
pub fn ordinary_set(
    object: &dyn Interceptable,
    key: PropertyKey,
    value: Value,
    receiver: &Value,
) -> Result<bool, ObjectError> {
    match lookup_chain(object, &key)? {
        ChainLookup::Found(desc) => {
            ordinary_set_with_own_descriptor(Some(desc), None, key, value, receiver)
        }
        ChainLookup::Dispatch(parent) => {
            ordinary_set_with_own_descriptor(None, Some(parent), key, value, receiver)
        }
        ChainLookup::Missing => ordinary_set_with_own_descriptor(None, None, key, value, receiver),
    }
}

/// `OrdinarySetWithOwnDescriptor`: with no own descriptor the write goes to
/// `parent`, or creates a fresh data property on the receiver.  Data writes
/// always land on the receiver, never on the object holding the descriptor.
pub fn ordinary_set_with_own_descriptor(
    own: Option<PropertyDescriptor>,
    parent: Option<ObjectRef>,
    key: PropertyKey,
    value: Value,
    receiver: &Value,
) -> Result<bool, ObjectError> {
    let own = match (own, parent) {
        (Some(desc), _) => desc,
        (None, Some(parent)) => return Reflect::set(&parent, key, value, receiver),
        (None, None) => PropertyDescriptor::data(Value::Undefined),
    };

    match own {
        PropertyDescriptor::Data { writable, .. } => {
            if !writable {
                return Ok(false);
            }
            let Value::Object(target) = receiver else {
                return Ok(false);
            };
            match Reflect::get_own_property_descriptor(target, &key)? {
                Some(existing) => {
                    if existing.is_accessor() || !existing.is_writable() {
                        return Ok(false);
                    }
                    Reflect::define_property(target, key, existing.with_value(value))
                }
                None => Reflect::define_property(target, key, PropertyDescriptor::data(value)),
            }
        }
        PropertyDescriptor::Accessor { set: None, .. } => Ok(false),
        PropertyDescriptor::Accessor {
            set: Some(setter), ..
        } => {
            Reflect::apply(&setter, receiver.clone(), vec![value])?;
            Ok(true)
        }
    }
}

// ---------------------------------------------------------------------------
// Reflect
// ---------------------------------------------------------------------------

/// `Reflect` namespace: one function per internal method, dispatched
/// through the target's [`Interceptable`] implementation.
pub struct Reflect;

impl Reflect {
    pub fn get(target: &ObjectRef, key: &PropertyKey, receiver: &Value) -> Result<Value, ObjectError> {
        target.inner.get(key, receiver)
    }

    pub fn set(
        target: &ObjectRef,
        key: PropertyKey,
        value: Value,
        receiver: &Value,
    ) -> Result<bool, ObjectError> {
        target.inner.set(key, value, receiver)
    }

    pub fn has(target: &ObjectRef, key: &PropertyKey) -> Result<bool, ObjectError> {
        target.inner.has_property(key)
    }

    pub fn delete_property(target: &ObjectRef, key: &PropertyKey) -> Result<bool, ObjectError> {
        target.inner.delete(key)
    }

    pub fn own_keys(target: &ObjectRef) -> Result<Vec<PropertyKey>, ObjectError> {
        target.inner.own_keys()
    }

    pub fn get_prototype_of(target: &ObjectRef) -> Result<Option<ObjectRef>, ObjectError> {
        target.inner.get_prototype_of()
    }

    /// Rejects prototypes that would close a cycle through ordinary objects.
    pub fn set_prototype_of(
        target: &ObjectRef,
        proto: Option<ObjectRef>,
    ) -> Result<bool, ObjectError> {
        let mut current = proto.clone();
        let mut depth: u32 = 0;
        while let Some(h) = current {
            if h == *target {
                return Err(ObjectError::PrototypeCycleDetected);
            }
            if !h.inner.is_ordinary() {
                break;
            }
            depth += 1;
            if depth > MAX_PROTOTYPE_CHAIN_DEPTH {
                return Err(ObjectError::PrototypeChainTooDeep {
                    depth,
                    max: MAX_PROTOTYPE_CHAIN_DEPTH,
                });
            }
            current = h.inner.get_prototype_of()?;
        }
        target.inner.set_prototype_of(proto)
    }

    pub fn is_extensible(target: &ObjectRef) -> Result<bool, ObjectError> {
        target.inner.is_extensible()
    }

    pub fn prevent_extensions(target: &ObjectRef) -> Result<bool, ObjectError> {
        target.inner.prevent_extensions()
    }

    pub fn define_property(
        target: &ObjectRef,
        key: PropertyKey,
        desc: PropertyDescriptor,
    ) -> Result<bool, ObjectError> {
        target.inner.define_own_property(key, desc)
    }

    pub fn get_own_property_descriptor(
        target: &ObjectRef,
        key: &PropertyKey,
    ) -> Result<Option<PropertyDescriptor>, ObjectError> {
        target.inner.get_own_property(key)
    }

    pub fn apply(target: &ObjectRef, this: Value, args: Vec<Value>) -> Result<Value, ObjectError> {
        if !target.is_callable() {
            return Err(ObjectError::not_callable(target.kind()));
        }
        target.inner.call(this, args)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
