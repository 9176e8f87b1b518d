#![no_main]

use frankenengine_membrane::{
    Membrane, MembraneOptions, ObjectError, ObjectRef, PropertyKey, Symbol, Value,
};
use libfuzzer_sys::fuzz_target;

const MAX_STEPS: usize = 128;
const MAX_POOL: usize = 16;

fuzz_target!(|data: &[u8]| {
    if data.is_empty() {
        return;
    }

    run_crossing_program(data);
});

/// Objects of one graph plus the wrappers the other graph holds for them.
#[derive(Default)]
struct GraphPool {
    originals: Vec<ObjectRef>,
    wrappers: Vec<(ObjectRef, Value)>,
}

fn run_crossing_program(data: &[u8]) {
    let options = MembraneOptions {
        use_shadow_targets: byte(data, 0) & 1 == 1,
        max_trap_depth: 64,
        max_events: 64,
        ..MembraneOptions::default()
    };
    let Ok(membrane) = Membrane::new(options) else {
        return;
    };

    let keys = [
        Symbol::new_private("k0"),
        Symbol::new_private("k1"),
        Symbol::new("public"),
    ];
    let mut inner = GraphPool::default();
    let mut outer = GraphPool::default();
    let mut disclosed = 0usize;

    let mut cursor = 1usize;
    for _ in 0..MAX_STEPS.min(data.len()) {
        let opcode = byte(data, cursor);
        cursor = cursor.saturating_add(1);
        let pick = usize::from(byte(data, cursor));
        cursor = cursor.saturating_add(1);
        let inward = opcode & 0x80 == 0;

        match opcode % 8 {
            0 => {
                let pool = if inward { &mut inner } else { &mut outer };
                if pool.originals.len() < MAX_POOL {
                    pool.originals.push(ObjectRef::plain());
                }
            }
            1 => {
                let (pool, wrapped) = if inward {
                    let pool = &mut inner;
                    let original = pool.originals.get(pick % pool.originals.len().max(1)).cloned();
                    let wrapped = original
                        .as_ref()
                        .and_then(|o| membrane.wrap(Value::from(o)).ok());
                    (pool, original.zip(wrapped))
                } else {
                    let pool = &mut outer;
                    let original = pool.originals.get(pick % pool.originals.len().max(1)).cloned();
                    let wrapped = original
                        .as_ref()
                        .and_then(|o| membrane.wrap_outer(Value::from(o)).ok());
                    (pool, original.zip(wrapped))
                };
                if let Some((original, wrapper)) = wrapped
                    && pool.wrappers.len() < MAX_POOL
                {
                    pool.wrappers.push((original, wrapper));
                }
            }
            2 => {
                // Write through a wrapper held by the other side.
                let (holder, writer) = if inward {
                    (&inner, &outer)
                } else {
                    (&outer, &inner)
                };
                if let Some((_, wrapper)) = holder.wrappers.get(pick % holder.wrappers.len().max(1))
                {
                    let key = pick_key(&keys, byte(data, cursor));
                    let value = pick_value(writer, &keys, byte(data, cursor.saturating_add(1)));
                    check_error(wrapper.set(key, value).err());
                }
                cursor = cursor.saturating_add(2);
            }
            3 => {
                let pool = if inward { &inner } else { &outer };
                if let Some((_, wrapper)) = pool.wrappers.get(pick % pool.wrappers.len().max(1)) {
                    let key = pick_key(&keys, byte(data, cursor));
                    // Gated keys may bypass crossing; string keys never do.
                    let trapped = key.as_symbol().is_none();
                    match wrapper.get(key) {
                        Ok(value) if trapped => assert_not_leaked(&membrane, &value, pool),
                        Ok(_) => {}
                        Err(err) => check_error(Some(err)),
                    }
                }
                cursor = cursor.saturating_add(1);
            }
            4 => {
                let key = &keys[pick % keys.len()];
                let crossed = if inward {
                    membrane.cross(Value::from(key), membrane.inner(), membrane.outer())
                } else {
                    membrane.cross(Value::from(key), membrane.outer(), membrane.inner())
                };
                match crossed {
                    Ok(value) => assert_eq!(value, Value::from(key)),
                    Err(err) => check_error(Some(err)),
                }
            }
            5 => {
                let pool = if inward { &inner } else { &outer };
                if let (Some(original), Some((_, wrapper))) = (
                    pool.originals.get(pick % pool.originals.len().max(1)),
                    outer_or_inner_wrapper(if inward { &outer } else { &inner }, pick),
                ) {
                    let proto = wrapper.as_object().cloned();
                    check_error(original.set_prototype(proto).err());
                }
            }
            6 => {
                let pool = if inward { &mut inner } else { &mut outer };
                if !pool.wrappers.is_empty() {
                    pool.wrappers.remove(pick % pool.wrappers.len());
                }
                membrane.sweep();
            }
            _ => {
                for primitive in [Value::Undefined, Value::Null, Value::from(i32::from(opcode))] {
                    assert_eq!(membrane.wrap(primitive.clone()).ok(), Some(primitive));
                }
                let _ = membrane.take_events();
            }
        }

        let now_disclosed = membrane.disclosed_keys().len();
        assert!(now_disclosed >= disclosed, "whitelist shrank");
        disclosed = now_disclosed;
        assert_identity(&membrane, &inner);
        assert_identity(&membrane, &outer);
    }
}

fn outer_or_inner_wrapper(pool: &GraphPool, pick: usize) -> Option<&(ObjectRef, Value)> {
    pool.wrappers.get(pick % pool.wrappers.len().max(1))
}

/// Every held wrapper stays the one wrapper of its original.
fn assert_identity(membrane: &Membrane, pool: &GraphPool) {
    for (original, wrapper) in &pool.wrappers {
        let Some(wrapper_object) = wrapper.as_object() else {
            panic!("object wrapped to a primitive");
        };
        assert_ne!(wrapper_object, original);
        assert!(membrane.is_wrapper(wrapper_object));
        assert_eq!(membrane.original_of(wrapper_object).as_ref(), Some(original));
        assert_eq!(membrane.wrapper_of(original).as_ref(), Some(wrapper_object));
        assert_eq!(membrane.unwrap(wrapper.clone()), Value::from(original));
    }
}

/// A value read through a wrapper of `pool`'s graph never is a raw
/// original of that graph.
fn assert_not_leaked(membrane: &Membrane, value: &Value, pool: &GraphPool) {
    if let Value::Object(object) = value {
        assert!(
            !pool.originals.contains(object),
            "raw original crossed the membrane"
        );
        if let Some(original) = membrane.original_of(object) {
            assert_ne!(&original, object);
        }
    }
}

fn check_error(err: Option<ObjectError>) {
    if let Some(err) = err {
        assert!(!err.is_fatal(), "invariant violation: {err}");
    }
}

fn pick_key(keys: &[Symbol], selector: u8) -> PropertyKey {
    match selector % 5 {
        0 => PropertyKey::from("a"),
        1 => PropertyKey::from("b"),
        n => PropertyKey::from(&keys[usize::from(n - 2) % keys.len()]),
    }
}

fn pick_value(pool: &GraphPool, keys: &[Symbol], selector: u8) -> Value {
    match selector % 4 {
        0 => Value::from(i32::from(selector)),
        1 => Value::from(&keys[usize::from(selector) % keys.len()]),
        _ => pool
            .originals
            .get(usize::from(selector) % pool.originals.len().max(1))
            .map(Value::from)
            .unwrap_or(Value::Null),
    }
}

fn byte(data: &[u8], index: usize) -> u8 {
    if data.is_empty() {
        return 0;
    }
    data[index % data.len()]
}
