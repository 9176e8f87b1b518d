//! Two-sided membrane scenarios with private fields.
//!
//! Each side is a "class" object carrying a private key, a value record and
//! `get`/`set` functions closing over the private key.  A field is written
//! on one side of the membrane (directly or through a wrapper), then read
//! back from either side.
//!
//! Naming follows `base[field] = value` where each of the three is taken
//! from the left graph (`T`, the target side) or through the membrane from
//! the right graph (`P`, the proxied side).
//!
//! - Section 1: closure access only; the private keys never cross.
//! - Section 2: reified access; the keys cross after the write, which
//!   retroactively discloses values already stored under them.

use anyhow::Result;
use frankenengine_membrane::{
    MembraneOptions, ObjectRef, PropertyKey, Symbol, Value, create_mutual_membrane,
};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

struct Side {
    class: ObjectRef,
    value: ObjectRef,
    private: Symbol,
}

impl Side {
    fn class_value(&self) -> Value {
        Value::from(&self.class)
    }

    fn value(&self) -> Value {
        Value::from(&self.value)
    }
}

fn build_side(label: &str) -> Result<Side> {
    let private = Symbol::new_private(format!("{label} private"));
    let class = ObjectRef::function(|_, _| Ok(Value::Undefined));

    let value = ObjectRef::plain();
    value.set(format!("{label}Value"), true)?;
    class.set(format!("{label}Value"), &value)?;
    class.set(format!("{label}Priv"), &private)?;

    let read_key = private.clone();
    let get = ObjectRef::function(move |_this, args| {
        args.first().cloned().unwrap_or(Value::Undefined).get(&read_key)
    });
    let write_key = private.clone();
    let set = ObjectRef::function(move |_this, args| {
        let target = args.first().cloned().unwrap_or(Value::Undefined);
        let value = args.get(1).cloned().unwrap_or(Value::Undefined);
        target.set(&write_key, value)?;
        Ok(Value::Undefined)
    });
    class.set("get", get)?;
    class.set("set", set)?;

    Ok(Side {
        class,
        value,
        private,
    })
}

struct Scenario {
    left: Side,
    right: Side,
    wrapped_left: Value,
    wrapped_right: Value,
}

impl Scenario {
    fn new(options: MembraneOptions) -> Result<Self> {
        let left = build_side("left")?;
        let right = build_side("right")?;
        let (wrapped_left, wrapped_right) =
            create_mutual_membrane(left.class_value(), right.class_value(), options)?;
        Ok(Self {
            left,
            right,
            wrapped_left,
            wrapped_right,
        })
    }

    /// `wrappedRightSide.rightValue`: the right record as seen from the left.
    fn proxied_right_value(&self) -> Result<Value> {
        Ok(self.wrapped_right.get("rightValue")?)
    }

    /// `wrappedLeftSide.leftValue`: the left record as seen from the right.
    fn proxied_left_value(&self) -> Result<Value> {
        Ok(self.wrapped_left.get("leftValue")?)
    }

    /// Make both private keys cross the membrane.
    fn expose(&self) -> Result<()> {
        self.wrapped_left.get("leftPriv")?;
        self.wrapped_right.get("rightPriv")?;
        Ok(())
    }
}

fn invoke(receiver: &Value, method: &str, args: Vec<Value>) -> Result<Value> {
    Ok(receiver.get(method)?.call(args)?)
}

fn key_of(value: &Value) -> PropertyKey {
    match value {
        Value::Symbol(sym) => PropertyKey::from(sym),
        other => PropertyKey::from(other.to_string()),
    }
}

/// `got` is a wrapper of the left record: a different reference that still
/// reads through to the left record's fields.
fn assert_wrapped_left_value(got: &Value, left: &Side) -> Result<()> {
    assert!(got.is_object());
    assert_ne!(*got, left.value());
    assert_eq!(got.get("leftValue")?, Value::from(true));
    Ok(())
}

fn modes() -> [MembraneOptions; 2] {
    [MembraneOptions::default(), MembraneOptions::shadowed()]
}

// ===========================================================================
// 1. Closure access only (keys never cross)
// ===========================================================================

#[test]
fn closure_left_base_left_field_left_value() -> Result<()> {
    for options in modes() {
        let s = Scenario::new(options)?;
        let left_class = s.left.class_value();
        invoke(&left_class, "set", vec![s.left.value(), s.left.value()])?;

        let got = invoke(&s.wrapped_left, "get", vec![s.proxied_left_value()?])?;
        assert_wrapped_left_value(&got, &s.left)?;

        assert_eq!(invoke(&left_class, "get", vec![s.left.value()])?, s.left.value());
    }
    Ok(())
}

#[test]
fn closure_left_base_left_field_proxied_value() -> Result<()> {
    for options in modes() {
        let s = Scenario::new(options)?;
        let left_class = s.left.class_value();
        let proxied = s.proxied_right_value()?;
        invoke(&left_class, "set", vec![s.left.value(), proxied.clone()])?;

        let got = invoke(&s.wrapped_left, "get", vec![s.proxied_left_value()?])?;
        assert_eq!(got, s.right.value());

        assert_eq!(invoke(&left_class, "get", vec![s.left.value()])?, proxied);
    }
    Ok(())
}

#[test]
fn closure_left_base_proxied_field_left_value() -> Result<()> {
    for options in modes() {
        let s = Scenario::new(options)?;
        invoke(&s.wrapped_right, "set", vec![s.left.value(), s.left.value()])?;

        let got = invoke(&s.right.class_value(), "get", vec![s.proxied_left_value()?])?;
        assert_wrapped_left_value(&got, &s.left)?;

        assert_eq!(
            invoke(&s.wrapped_right, "get", vec![s.left.value()])?,
            s.left.value()
        );
    }
    Ok(())
}

#[test]
fn closure_left_base_proxied_field_proxied_value() -> Result<()> {
    for options in modes() {
        let s = Scenario::new(options)?;
        invoke(
            &s.wrapped_right,
            "set",
            vec![s.left.value(), s.proxied_right_value()?],
        )?;

        let got = invoke(&s.right.class_value(), "get", vec![s.proxied_left_value()?])?;
        assert_eq!(got, s.right.value());

        let proxied = s.proxied_right_value()?;
        assert_eq!(invoke(&s.wrapped_right, "get", vec![s.left.value()])?, proxied);
    }
    Ok(())
}

#[test]
fn closure_proxied_base_left_field_left_value() -> Result<()> {
    for options in modes() {
        let s = Scenario::new(options)?;
        let left_class = s.left.class_value();
        invoke(&left_class, "set", vec![s.proxied_right_value()?, s.left.value()])?;

        let got = invoke(&s.wrapped_left, "get", vec![s.right.value()])?;
        assert_wrapped_left_value(&got, &s.left)?;

        assert_eq!(
            invoke(&left_class, "get", vec![s.proxied_right_value()?])?,
            s.left.value()
        );
    }
    Ok(())
}

#[test]
fn closure_proxied_base_left_field_proxied_value() -> Result<()> {
    for options in modes() {
        let s = Scenario::new(options)?;
        let left_class = s.left.class_value();
        let proxied = s.proxied_right_value()?;
        invoke(&left_class, "set", vec![proxied.clone(), proxied.clone()])?;

        let got = invoke(&s.wrapped_left, "get", vec![s.right.value()])?;
        assert_eq!(got, s.right.value());

        assert_eq!(invoke(&left_class, "get", vec![proxied.clone()])?, proxied);
    }
    Ok(())
}

#[test]
fn closure_proxied_base_proxied_field_left_value() -> Result<()> {
    for options in modes() {
        let s = Scenario::new(options)?;
        invoke(
            &s.wrapped_right,
            "set",
            vec![s.proxied_right_value()?, s.left.value()],
        )?;

        let got = invoke(&s.right.class_value(), "get", vec![s.right.value()])?;
        assert_wrapped_left_value(&got, &s.left)?;

        assert_eq!(
            invoke(&s.wrapped_right, "get", vec![s.proxied_right_value()?])?,
            s.left.value()
        );
    }
    Ok(())
}

#[test]
fn closure_proxied_base_proxied_field_proxied_value() -> Result<()> {
    for options in modes() {
        let s = Scenario::new(options)?;
        let proxied = s.proxied_right_value()?;
        invoke(&s.wrapped_right, "set", vec![proxied.clone(), proxied.clone()])?;

        let got = invoke(&s.right.class_value(), "get", vec![s.right.value()])?;
        assert_eq!(got, s.right.value());

        assert_eq!(
            invoke(&s.wrapped_right, "get", vec![proxied.clone()])?,
            proxied
        );
    }
    Ok(())
}

#[test]
fn closure_access_never_discloses_keys() -> Result<()> {
    let s = Scenario::new(MembraneOptions::default())?;
    invoke(&s.wrapped_right, "set", vec![s.left.value(), s.left.value()])?;
    invoke(&s.right.class_value(), "get", vec![s.proxied_left_value()?])?;
    let leaked = s.left.value.get(&s.right.private)?;
    assert!(leaked.is_object());
    assert_ne!(leaked, s.left.value());
    Ok(())
}

// ===========================================================================
// 2. Reified access (keys known after the write)
// ===========================================================================

#[test]
fn reified_left_base_left_field_left_value() -> Result<()> {
    for options in modes() {
        let s = Scenario::new(options)?;
        s.left.value.set(&s.left.private, &s.left.value)?;

        s.expose()?;

        let key = key_of(&s.wrapped_left.get("leftPriv")?);
        let got = s.proxied_left_value()?.get(key)?;
        assert_wrapped_left_value(&got, &s.left)?;
    }
    Ok(())
}

#[test]
fn reified_left_base_left_field_proxied_value() -> Result<()> {
    for options in modes() {
        let s = Scenario::new(options)?;
        s.left.value.set(&s.left.private, s.proxied_right_value()?)?;

        s.expose()?;

        let key = key_of(&s.wrapped_left.get("leftPriv")?);
        let got = s.proxied_left_value()?.get(key)?;
        assert_eq!(got, s.right.value());
    }
    Ok(())
}

#[test]
fn reified_left_base_proxied_field_left_value() -> Result<()> {
    for options in modes() {
        let s = Scenario::new(options)?;
        let key = key_of(&s.wrapped_right.get("rightPriv")?);
        s.left.value.set(key, &s.left.value)?;

        s.expose()?;

        let got = s.proxied_left_value()?.get(&s.right.private)?;
        assert_wrapped_left_value(&got, &s.left)?;
    }
    Ok(())
}

#[test]
fn reified_left_base_proxied_field_proxied_value() -> Result<()> {
    for options in modes() {
        let s = Scenario::new(options)?;
        let key = key_of(&s.wrapped_right.get("rightPriv")?);
        s.left.value.set(key, s.proxied_right_value()?)?;

        s.expose()?;

        let got = s.proxied_left_value()?.get(&s.right.private)?;
        assert_eq!(got, s.right.value());
    }
    Ok(())
}

#[test]
fn reified_proxied_base_left_field_left_value() -> Result<()> {
    for options in modes() {
        let s = Scenario::new(options)?;
        s.proxied_right_value()?.set(&s.left.private, s.left.value())?;

        s.expose()?;

        let got = s.right.value.get(&s.left.private)?;
        assert_wrapped_left_value(&got, &s.left)?;
    }
    Ok(())
}

#[test]
fn reified_proxied_base_left_field_proxied_value() -> Result<()> {
    for options in modes() {
        let s = Scenario::new(options)?;
        let proxied = s.proxied_right_value()?;
        proxied.set(&s.left.private, proxied.clone())?;

        s.expose()?;

        let key = key_of(&s.wrapped_left.get("leftPriv")?);
        let got = s.right.value.get(key)?;
        assert_eq!(got, s.right.value());
    }
    Ok(())
}

#[test]
fn reified_proxied_base_proxied_field_left_value() -> Result<()> {
    for options in modes() {
        let s = Scenario::new(options)?;
        let key = key_of(&s.wrapped_right.get("rightPriv")?);
        s.proxied_right_value()?.set(key, s.left.value())?;

        s.expose()?;

        let got = s.right.value.get(&s.right.private)?;
        assert_wrapped_left_value(&got, &s.left)?;
    }
    Ok(())
}

#[test]
fn reified_proxied_base_proxied_field_proxied_value() -> Result<()> {
    for options in modes() {
        let s = Scenario::new(options)?;
        let key = key_of(&s.wrapped_right.get("rightPriv")?);
        let proxied = s.proxied_right_value()?;
        proxied.set(key, proxied.clone())?;

        s.expose()?;

        let got = s.right.value.get(&s.right.private)?;
        assert_eq!(got, s.right.value());
    }
    Ok(())
}

#[test]
fn exposure_is_idempotent() -> Result<()> {
    let s = Scenario::new(MembraneOptions::shadowed())?;
    s.proxied_right_value()?.set(&s.left.private, s.left.value())?;
    s.expose()?;
    let first = s.right.value.get(&s.left.private)?;
    s.expose()?;
    let second = s.right.value.get(&s.left.private)?;
    assert_eq!(first, second);
    Ok(())
}
