//! Field access through a single-root membrane.
//!
//! The inner graph holds `Left`; the outer graph attaches `Right` through
//! the wrapped root.  `pLeft` is `Left` as seen from outside, `pRight` is
//! `Right` as seen from inside.  Each side record carries a `base`, a
//! `proto`, a `value`, its `field` key and `get`/`set` functions closing
//! over that key.
//!
//! Every case writes `value` under a side's field on some base, optionally
//! through a prototype, then reads it back from the other side of the
//! membrane.  The whole matrix runs for:
//!
//! - field kinds: string, public symbol, private symbol, pre-exposed private
//! - direct and shadow backing storage
//! - closure and reified writes, closure and reified reads

use frankenengine_membrane::{
    Membrane, MembraneOptions, ObjectRef, PropertyKey, Symbol, Value,
};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn arg(args: &[Value], idx: usize) -> Value {
    args.get(idx).cloned().unwrap_or(Value::Undefined)
}

fn key_of(value: &Value) -> PropertyKey {
    match value {
        Value::Symbol(sym) => PropertyKey::from(sym),
        other => PropertyKey::from(other.to_string()),
    }
}

fn build_side(field: Value, flag: &str) -> ObjectRef {
    let side = ObjectRef::plain();
    side.set("base", ObjectRef::plain()).expect("base");
    side.set("proto", ObjectRef::plain()).expect("proto");
    side.set("field", field.clone()).expect("field");
    let value = ObjectRef::plain();
    value.set(flag, true).expect("flag");
    side.set("value", value).expect("value");

    let get_key = key_of(&field);
    side.set(
        "get",
        ObjectRef::function(move |_this, args| arg(args, 0).get(&get_key)),
    )
    .expect("get");
    let set_key = key_of(&field);
    side.set(
        "set",
        ObjectRef::function(move |_this, args| {
            arg(args, 0).set(&set_key, arg(args, 1))?;
            Ok(Value::Undefined)
        }),
    )
    .expect("set");
    side
}

#[derive(Debug, Clone, Copy)]
enum FieldKind {
    String,
    PublicSymbol,
    PrivateSymbol,
    PreExposedPrivate,
}

impl FieldKind {
    fn fields(self) -> (Value, Value) {
        match self {
            Self::String => (Value::from("leftField"), Value::from("rightField")),
            Self::PublicSymbol => (
                Value::from(Symbol::new("leftField")),
                Value::from(Symbol::new("rightField")),
            ),
            Self::PrivateSymbol | Self::PreExposedPrivate => (
                Value::from(Symbol::new_private("leftField")),
                Value::from(Symbol::new_private("rightField")),
            ),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Access {
    Closure,
    Reified,
}

#[derive(Debug, Clone, Copy)]
enum Who {
    Left,
    Right,
    PLeft,
    PRight,
}

struct Graph {
    membrane: Membrane,
    left: Value,
    right: Value,
    p_left: Value,
    p_right: Value,
}

impl Graph {
    fn new(kind: FieldKind, shadow: bool) -> Self {
        let options = MembraneOptions::default()
            .with_shadow_targets(shadow)
            .with_diagnostics(true);
        let membrane = Membrane::new(options).expect("options");
        let (left_field, right_field) = kind.fields();
        let left = build_side(left_field, "fromTheLeft");
        let right = build_side(right_field, "fromTheRight");

        let graph = ObjectRef::plain();
        let wrapped_graph = membrane.wrap_root(Value::from(&graph)).expect("wrap root");
        graph.set("Left", &left).expect("attach left");
        wrapped_graph.set("Right", &right).expect("attach right");
        let p_left = wrapped_graph.get("Left").expect("pLeft");
        let p_right = graph.get("Right").expect("pRight");

        let state = Self {
            membrane,
            left: Value::from(left),
            right: Value::from(right),
            p_left,
            p_right,
        };
        if matches!(kind, FieldKind::PreExposedPrivate) {
            state.p_left.get("field").expect("expose left");
            state.p_right.get("field").expect("expose right");
        }
        state
    }

    fn who(&self, who: Who) -> &Value {
        match who {
            Who::Left => &self.left,
            Who::Right => &self.right,
            Who::PLeft => &self.p_left,
            Who::PRight => &self.p_right,
        }
    }

    fn path(&self, (who, prop): (Who, &str)) -> Value {
        self.who(who).get(prop).expect("path")
    }

    fn write(&self, access: Access, side: Who, base: &Value, value: Value) {
        let side = self.who(side);
        match access {
            Access::Closure => {
                side.get("set")
                    .expect("set fn")
                    .call(vec![base.clone(), value])
                    .expect("closure set");
            }
            Access::Reified => {
                let key = key_of(&side.get("field").expect("field"));
                base.set(key, value).expect("reified set");
            }
        }
    }

    fn read(&self, access: Access, side: Who, base: &Value) -> Value {
        let side = self.who(side);
        match access {
            Access::Closure => side
                .get("get")
                .expect("get fn")
                .call(vec![base.clone()])
                .expect("closure get"),
            Access::Reified => {
                let key = key_of(&side.get("field").expect("field"));
                base.get(key).expect("reified get")
            }
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Expect {
    /// A wrapper whose original is `Left.value`.
    WrappedLeftValue,
    /// Exactly `Right.value`.
    RightValue,
}

/// One block of cases: where the value is written, and from where it is
/// read back.
struct Block {
    set_side: Who,
    set_base: (Who, &'static str),
    value: (Who, &'static str),
    protos: [Option<(Who, &'static str)>; 3],
    get_side: Who,
    get_base: (Who, &'static str),
    expect: Expect,
    sanity_side: Who,
    sanity_base: (Who, &'static str),
    sanity_value: (Who, &'static str),
}

const BLOCKS: [Block; 8] = [
    Block {
        set_side: Who::Left,
        set_base: (Who::Left, "base"),
        value: (Who::Left, "value"),
        protos: [None, Some((Who::Left, "proto")), Some((Who::PRight, "base"))],
        get_side: Who::PLeft,
        get_base: (Who::PLeft, "base"),
        expect: Expect::WrappedLeftValue,
        sanity_side: Who::Left,
        sanity_base: (Who::Left, "base"),
        sanity_value: (Who::Left, "value"),
    },
    Block {
        set_side: Who::Left,
        set_base: (Who::Left, "base"),
        value: (Who::PRight, "value"),
        protos: [None, Some((Who::Left, "proto")), Some((Who::PRight, "base"))],
        get_side: Who::PLeft,
        get_base: (Who::PLeft, "base"),
        expect: Expect::RightValue,
        sanity_side: Who::Left,
        sanity_base: (Who::Left, "base"),
        sanity_value: (Who::PRight, "value"),
    },
    Block {
        set_side: Who::Left,
        set_base: (Who::PRight, "base"),
        value: (Who::Left, "value"),
        protos: [None, Some((Who::PRight, "proto")), Some((Who::Left, "base"))],
        get_side: Who::PLeft,
        get_base: (Who::Right, "base"),
        expect: Expect::WrappedLeftValue,
        sanity_side: Who::Left,
        sanity_base: (Who::PRight, "base"),
        sanity_value: (Who::Left, "value"),
    },
    Block {
        set_side: Who::Left,
        set_base: (Who::PRight, "base"),
        value: (Who::PRight, "value"),
        protos: [None, Some((Who::PRight, "proto")), Some((Who::Left, "base"))],
        get_side: Who::PLeft,
        get_base: (Who::Right, "base"),
        expect: Expect::RightValue,
        sanity_side: Who::Left,
        sanity_base: (Who::PRight, "base"),
        sanity_value: (Who::PRight, "value"),
    },
    Block {
        set_side: Who::PRight,
        set_base: (Who::Left, "base"),
        value: (Who::Left, "value"),
        protos: [None, Some((Who::Left, "proto")), Some((Who::PRight, "base"))],
        get_side: Who::Right,
        get_base: (Who::PLeft, "base"),
        expect: Expect::WrappedLeftValue,
        sanity_side: Who::PRight,
        sanity_base: (Who::Left, "base"),
        sanity_value: (Who::Left, "value"),
    },
    Block {
        set_side: Who::PRight,
        set_base: (Who::Left, "base"),
        value: (Who::PRight, "value"),
        protos: [None, Some((Who::Left, "proto")), Some((Who::PRight, "base"))],
        get_side: Who::Right,
        get_base: (Who::PLeft, "base"),
        expect: Expect::RightValue,
        sanity_side: Who::PRight,
        sanity_base: (Who::Left, "base"),
        sanity_value: (Who::PRight, "value"),
    },
    Block {
        set_side: Who::PRight,
        set_base: (Who::PRight, "base"),
        value: (Who::Left, "value"),
        protos: [None, Some((Who::PRight, "proto")), Some((Who::Left, "base"))],
        get_side: Who::Right,
        get_base: (Who::Right, "base"),
        expect: Expect::WrappedLeftValue,
        sanity_side: Who::PRight,
        sanity_base: (Who::PRight, "base"),
        sanity_value: (Who::Left, "value"),
    },
    Block {
        set_side: Who::PRight,
        set_base: (Who::PRight, "base"),
        value: (Who::PRight, "value"),
        protos: [None, Some((Who::PRight, "proto")), Some((Who::Left, "base"))],
        get_side: Who::Right,
        get_base: (Who::Right, "base"),
        expect: Expect::RightValue,
        sanity_side: Who::PRight,
        sanity_base: (Who::PRight, "base"),
        sanity_value: (Who::PRight, "value"),
    },
];

fn run_case(
    kind: FieldKind,
    shadow: bool,
    set: Access,
    get: Access,
    block: &Block,
    proto: Option<(Who, &'static str)>,
) {
    let label = format!(
        "{kind:?} shadow={shadow} set={set:?} get={get:?} base={:?} value={:?} proto={proto:?}",
        block.set_base, block.value
    );
    let state = Graph::new(kind, shadow);

    let write_base = match proto {
        Some(path) => state.path(path),
        None => state.path(block.set_base),
    };
    let value = state.path(block.value);
    state.write(set, block.set_side, &write_base, value);

    if proto.is_some() {
        let base = state.path(block.set_base);
        let base = base.expect_object().expect("base object");
        assert!(
            base.set_prototype(write_base.as_object().cloned())
                .expect("set prototype"),
            "{label}: prototype rejected"
        );
    }

    let base = state.path(block.get_base);
    let got = state.read(get, block.get_side, &base);
    match block.expect {
        Expect::WrappedLeftValue => {
            let left_value = state.path((Who::Left, "value"));
            assert!(got.is_object(), "{label}: expected an object, got {got}");
            assert_ne!(got, left_value, "{label}: raw left value leaked");
            assert_eq!(
                got.get("__original__").expect("diagnostic"),
                left_value,
                "{label}: wrong original"
            );
            assert_eq!(state.membrane.unwrap(got), left_value, "{label}");
        }
        Expect::RightValue => {
            assert_eq!(got, state.path((Who::Right, "value")), "{label}");
        }
    }

    let sanity_base = state.path(block.sanity_base);
    let sanity = state.read(get, block.sanity_side, &sanity_base);
    assert_eq!(sanity, state.path(block.sanity_value), "{label}: sanity");
}

fn run_suite(kind: FieldKind) {
    for shadow in [true, false] {
        for set in [Access::Closure, Access::Reified] {
            for get in [Access::Closure, Access::Reified] {
                for block in &BLOCKS {
                    for proto in block.protos {
                        run_case(kind, shadow, set, get, block, proto);
                    }
                }
            }
        }
    }
}

// ===========================================================================
// 1. Field kinds
// ===========================================================================

#[test]
fn string_fields() {
    run_suite(FieldKind::String);
}

#[test]
fn public_symbol_fields() {
    run_suite(FieldKind::PublicSymbol);
}

#[test]
fn private_symbol_fields() {
    run_suite(FieldKind::PrivateSymbol);
}

#[test]
fn pre_exposed_private_symbol_fields() {
    run_suite(FieldKind::PreExposedPrivate);
}

// ===========================================================================
// 2. Setup invariants
// ===========================================================================

#[test]
fn side_views_are_wrappers_of_the_raw_sides() {
    let state = Graph::new(FieldKind::String, false);
    let p_left = state.p_left.expect_object().expect("pLeft");
    let p_right = state.p_right.expect_object().expect("pRight");
    assert_eq!(state.membrane.original_of(p_left), state.left.as_object().cloned());
    assert_eq!(state.membrane.original_of(p_right), state.right.as_object().cloned());
    assert!(state.membrane.inner().contains(state.left.as_object().expect("left")));
    assert!(state.membrane.outer().contains(state.right.as_object().expect("right")));
}

#[test]
fn pre_exposure_discloses_both_fields() {
    let state = Graph::new(FieldKind::PreExposedPrivate, true);
    let left_field = state.left.get("field").expect("field");
    let right_field = state.right.get("field").expect("field");
    let left_sym = left_field.as_symbol().expect("symbol");
    let right_sym = right_field.as_symbol().expect("symbol");
    assert!(state.membrane.is_disclosed(left_sym));
    assert!(state.membrane.is_disclosed(right_sym));
}

#[test]
fn undisclosed_private_field_stays_on_shadow_storage() {
    let state = Graph::new(FieldKind::PrivateSymbol, true);
    let p_right_base = state.path((Who::PRight, "base"));
    let left_value = state.path((Who::Left, "value"));
    state.write(Access::Closure, Who::Left, &p_right_base, left_value);

    let right_base = state.path((Who::Right, "base"));
    let left_field = state.left.get("field").expect("field");
    assert_eq!(right_base.get(key_of(&left_field)).expect("raw read"), Value::Undefined);
}
