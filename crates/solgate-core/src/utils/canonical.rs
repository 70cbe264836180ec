//! Canonical JSON rendering and deterministic hashing.
//!
//! Two requests that differ only in object key order, or in how an integral number was
//! spelled (`5` vs `5.0`), canonicalize identically. Array order is preserved: positional
//! RPC parameters are order-sensitive.
//!
//! The rendered form feeds request signing; the hashed form feeds cache keys. Both walk
//! the value the same way so the two never disagree about what "identical" means.

use ahash::RandomState;
use serde_json::{Number, Value};
use std::{
    cell::RefCell,
    fmt::Write,
    hash::{BuildHasher, Hash, Hasher},
};

thread_local! {
    /// Reusable render buffer. Most parameter lists fit in 1KB.
    static RENDER_BUFFER: RefCell<String> = RefCell::new(String::with_capacity(1024));
}

/// Fixed seeds so keys are stable for the lifetime of the process and across instances.
const SEEDS: (u64, u64, u64, u64) =
    (0x736f_6c67_6174_6531, 0x9e37_79b9_7f4a_7c15, 0xbf58_476d_1ce4_e5b9, 0x94d0_49bb_1331_11eb);

fn hasher() -> impl Hasher {
    RandomState::with_seeds(SEEDS.0, SEEDS.1, SEEDS.2, SEEDS.3).build_hasher()
}

/// A number reduced to one representation per mathematical value.
enum CanonicalNumber {
    Int(i64),
    UInt(u64),
    Float(u64),
}

#[allow(clippy::cast_possible_truncation, clippy::cast_precision_loss)]
fn canonical_number(n: &Number) -> CanonicalNumber {
    if let Some(i) = n.as_i64() {
        return CanonicalNumber::Int(i);
    }
    if let Some(u) = n.as_u64() {
        return CanonicalNumber::UInt(u);
    }
    let f = n.as_f64().unwrap_or(f64::NAN);
    // integral floats inside the i64 range collapse onto the integer path
    if f.is_finite() && f.fract() == 0.0 && f >= i64::MIN as f64 && f < i64::MAX as f64 {
        return CanonicalNumber::Int(f as i64);
    }
    let bits = if f.is_nan() { f64::NAN.to_bits() } else { f.to_bits() };
    CanonicalNumber::Float(bits)
}

/// Feeds a JSON value into `hasher` with type discriminants and sorted object keys.
///
/// Each JSON type is prefixed with a discriminant byte so `"1"` and `1` never collide.
pub fn hash_json_value(value: &Value, hasher: &mut impl Hasher) {
    match value {
        Value::Null => 0u8.hash(hasher),
        Value::Bool(b) => {
            1u8.hash(hasher);
            b.hash(hasher);
        }
        Value::Number(n) => {
            2u8.hash(hasher);
            match canonical_number(n) {
                CanonicalNumber::Int(i) => {
                    0u8.hash(hasher);
                    i.hash(hasher);
                }
                CanonicalNumber::UInt(u) => {
                    1u8.hash(hasher);
                    u.hash(hasher);
                }
                CanonicalNumber::Float(bits) => {
                    2u8.hash(hasher);
                    bits.hash(hasher);
                }
            }
        }
        Value::String(s) => {
            3u8.hash(hasher);
            s.hash(hasher);
        }
        Value::Array(arr) => {
            4u8.hash(hasher);
            arr.len().hash(hasher);
            for element in arr {
                hash_json_value(element, hasher);
            }
        }
        Value::Object(obj) => {
            5u8.hash(hasher);
            obj.len().hash(hasher);

            let mut sorted: Vec<(&String, &Value)> = obj.iter().collect();
            sorted.sort_unstable_by(|a, b| a.0.cmp(b.0));
            for (key, value) in sorted {
                key.hash(hasher);
                hash_json_value(value, hasher);
            }
        }
    }
}

/// Computes the cache key for `(method, params, context)`.
#[must_use]
pub fn request_key(method: &str, params: &Value, context: &str) -> u64 {
    let mut hasher = hasher();
    method.hash(&mut hasher);
    context.hash(&mut hasher);
    hash_json_value(params, &mut hasher);
    hasher.finish()
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Null => out.push_str("null"),
        Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        Value::Number(n) => match canonical_number(n) {
            CanonicalNumber::Int(i) => {
                let _ = write!(out, "{i}");
            }
            CanonicalNumber::UInt(u) => {
                let _ = write!(out, "{u}");
            }
            CanonicalNumber::Float(bits) => {
                let _ = write!(out, "{:?}", f64::from_bits(bits));
            }
        },
        Value::String(s) => write_escaped(s, out),
        Value::Array(arr) => {
            out.push('[');
            for (i, element) in arr.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(element, out);
            }
            out.push(']');
        }
        Value::Object(obj) => {
            let mut sorted: Vec<(&String, &Value)> = obj.iter().collect();
            sorted.sort_unstable_by(|a, b| a.0.cmp(b.0));
            out.push('{');
            for (i, (key, value)) in sorted.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_escaped(key, out);
                out.push(':');
                write_canonical(value, out);
            }
            out.push('}');
        }
    }
}

fn write_escaped(s: &str, out: &mut String) {
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            c if c.is_control() => {
                let _ = write!(out, "\\u{:04x}", c as u32);
            }
            c => out.push(c),
        }
    }
    out.push('"');
}

/// Renders a value as compact JSON with sorted object keys.
#[must_use]
pub fn canonical_string(value: &Value) -> String {
    RENDER_BUFFER.with(|buffer| {
        let mut buffer = buffer.borrow_mut();
        buffer.clear();
        write_canonical(value, &mut buffer);
        buffer.clone()
    })
}
