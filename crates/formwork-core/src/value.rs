//! Dynamic field values with cycle-safe equality and snapshotting.
//!
//! A form stores every field as a [`Value`]. Most values are plain trees, but
//! [`Value::Shared`] lets a value alias another node (or itself), so two
//! operations need care:
//!
//! - **Equality** ([`deep_equal`]) tracks the pairs of nodes already under
//!   comparison. Revisiting a pair is treated as equal, which makes the
//!   comparison terminate on cycles.
//! - **Snapshots** ([`Snapshot`]) copy each distinct shared node exactly once,
//!   reproducing aliasing and cycles in the copy. A snapshot never shares a
//!   cell with its source, so mutating the live value cannot alter history.
//!
//! `Rc` cycles are never collected; values with self-references live until
//! the process exits. That is the price of modelling self-referential data.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

use ahash::{AHashMap, AHashSet};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::FormError;

/// Field name to value, ordered by name.
pub type ValueMap = BTreeMap<String, Value>;

/// A shared, mutable node inside a value graph.
pub type SharedValue = Rc<RefCell<Value>>;

/// A dynamically typed field value.
#[derive(Clone, Default)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    List(Vec<Value>),
    Map(ValueMap),
    /// An aliased node; may participate in cycles.
    Shared(SharedValue),
}

/// 2^63, the first float above the `i64` range.
const I64_LIMIT: f64 = 9_223_372_036_854_775_808.0;

/// `f` as an integer, if it is whole and fits `i64` without saturating.
pub(crate) fn exact_i64(f: f64) -> Option<i64> {
    (f.fract() == 0.0 && (-I64_LIMIT..I64_LIMIT).contains(&f)).then_some(f as i64)
}

impl Value {
    /// Wrap a value in a fresh shared node.
    #[must_use]
    pub fn shared(value: Value) -> Self {
        Self::Shared(Rc::new(RefCell::new(value)))
    }

    #[must_use]
    pub fn is_null(&self) -> bool {
        match self {
            Self::Null => true,
            Self::Shared(node) => node.borrow().is_null(),
            _ => false,
        }
    }

    /// `Null`, empty text, empty list, or empty map.
    ///
    /// A shared node that (directly) contains itself counts as non-empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        let mut seen = AHashSet::new();
        is_empty_inner(self, &mut seen)
    }

    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            Self::Shared(node) => node.borrow().as_bool(),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(n) => Some(*n),
            Self::Float(f) => exact_i64(*f),
            Self::Shared(node) => node.borrow().as_i64(),
            _ => None,
        }
    }

    /// Numeric view of `Int` and `Float`.
    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Int(n) => Some(*n as f64),
            Self::Float(f) => Some(*f),
            Self::Shared(node) => node.borrow().as_f64(),
            _ => None,
        }
    }

    /// Borrow text content. Shared nodes are not looked through; use
    /// [`Value::to_text`] for that.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Owned text content, looking through shared nodes.
    #[must_use]
    pub fn to_text(&self) -> Option<String> {
        match self {
            Self::Text(s) => Some(s.clone()),
            Self::Shared(node) => node.borrow().to_text(),
            _ => None,
        }
    }

    /// Look up a key of a map value.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<Value> {
        match self {
            Self::Map(map) => map.get(key).cloned(),
            Self::Shared(node) => node.borrow().get(key),
            _ => None,
        }
    }

    /// Convert into plain JSON for hand-off to transport or persistence.
    ///
    /// Aliased nodes are duplicated. A node that contains itself yields
    /// [`FormError::CyclicValue`].
    pub fn to_json(&self) -> Result<serde_json::Value, FormError> {
        let mut path = Vec::new();
        to_json_inner(self, &mut path)
    }
}

fn node_addr(node: &SharedValue) -> usize {
    Rc::as_ptr(node) as usize
}

fn is_empty_inner(value: &Value, seen: &mut AHashSet<usize>) -> bool {
    match value {
        Value::Null => true,
        Value::Text(s) => s.is_empty(),
        Value::List(items) => items.is_empty(),
        Value::Map(map) => map.is_empty(),
        Value::Shared(node) => seen.insert(node_addr(node)) && is_empty_inner(&node.borrow(), seen),
        Value::Bool(_) | Value::Int(_) | Value::Float(_) => false,
    }
}

fn to_json_inner(value: &Value, path: &mut Vec<usize>) -> Result<serde_json::Value, FormError> {
    use serde_json::Value as Json;
    Ok(match value {
        Value::Null => Json::Null,
        Value::Bool(b) => Json::Bool(*b),
        Value::Int(n) => Json::from(*n),
        Value::Float(f) => serde_json::Number::from_f64(*f).map_or(Json::Null, Json::Number),
        Value::Text(s) => Json::String(s.clone()),
        Value::List(items) => Json::Array(
            items
                .iter()
                .map(|item| to_json_inner(item, path))
                .collect::<Result<_, _>>()?,
        ),
        Value::Map(map) => {
            let mut out = serde_json::Map::with_capacity(map.len());
            for (key, item) in map {
                out.insert(key.clone(), to_json_inner(item, path)?);
            }
            Json::Object(out)
        }
        Value::Shared(node) => {
            let addr = node_addr(node);
            if path.contains(&addr) {
                return Err(FormError::CyclicValue);
            }
            path.push(addr);
            let out = to_json_inner(&node.borrow(), path);
            path.pop();
            out?
        }
    })
}

// ---------------------------------------------------------------------------
// Equality
// ---------------------------------------------------------------------------

/// Structural equality that terminates on self-referential values.
///
/// Shared nodes are compared by content, not identity. `NaN` equals `NaN` so
/// that a field holding `NaN` is not perpetually dirty.
#[must_use]
pub fn deep_equal(a: &Value, b: &Value) -> bool {
    let mut seen = AHashSet::new();
    eq_inner(a, b, &mut seen)
}

fn value_addr(value: &Value) -> usize {
    match value {
        Value::Shared(node) => node_addr(node),
        other => other as *const Value as usize,
    }
}

fn eq_inner(a: &Value, b: &Value, seen: &mut AHashSet<(usize, usize)>) -> bool {
    match (a, b) {
        (Value::Shared(x), Value::Shared(y)) if Rc::ptr_eq(x, y) => true,
        (Value::Shared(_), _) | (_, Value::Shared(_)) => {
            // Already comparing this pair further up: assume equal.
            if !seen.insert((value_addr(a), value_addr(b))) {
                return true;
            }
            match (a, b) {
                (Value::Shared(x), Value::Shared(y)) => eq_inner(&x.borrow(), &y.borrow(), seen),
                (Value::Shared(x), other) => eq_inner(&x.borrow(), other, seen),
                (other, Value::Shared(y)) => eq_inner(other, &y.borrow(), seen),
                _ => unreachable!("outer arm requires a shared side"),
            }
        }
        (Value::Null, Value::Null) => true,
        (Value::Bool(x), Value::Bool(y)) => x == y,
        (Value::Int(x), Value::Int(y)) => x == y,
        (Value::Float(x), Value::Float(y)) => x == y || (x.is_nan() && y.is_nan()),
        (Value::Text(x), Value::Text(y)) => x == y,
        (Value::List(x), Value::List(y)) => {
            x.len() == y.len() && x.iter().zip(y).all(|(p, q)| eq_inner(p, q, seen))
        }
        (Value::Map(x), Value::Map(y)) => {
            x.len() == y.len()
                && x
                    .iter()
                    .zip(y)
                    .all(|((ka, va), (kb, vb))| ka == kb && eq_inner(va, vb, seen))
        }
        _ => false,
    }
}

/// Deep equality over whole value maps.
#[must_use]
pub fn maps_equal(a: &ValueMap, b: &ValueMap) -> bool {
    let mut seen = AHashSet::new();
    a.len() == b.len()
        && a
            .iter()
            .zip(b)
            .all(|((ka, va), (kb, vb))| ka == kb && eq_inner(va, vb, &mut seen))
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        deep_equal(self, other)
    }
}

// ---------------------------------------------------------------------------
// Snapshots
// ---------------------------------------------------------------------------

/// Independent deep copy used for history entries and initial values.
pub trait Snapshot {
    /// Produce a copy that shares no mutable state with `self`.
    #[must_use]
    fn snapshot(&self) -> Self;
}

type Memo = AHashMap<usize, SharedValue>;

fn snapshot_inner(value: &Value, memo: &mut Memo) -> Value {
    match value {
        Value::Shared(node) => {
            let addr = node_addr(node);
            if let Some(copy) = memo.get(&addr) {
                return Value::Shared(Rc::clone(copy));
            }
            // Register the copy before descending so cycles resolve to it.
            let copy = Rc::new(RefCell::new(Value::Null));
            memo.insert(addr, Rc::clone(&copy));
            let inner = snapshot_inner(&node.borrow(), memo);
            *copy.borrow_mut() = inner;
            Value::Shared(copy)
        }
        Value::List(items) => Value::List(items.iter().map(|v| snapshot_inner(v, memo)).collect()),
        Value::Map(map) => Value::Map(
            map.iter()
                .map(|(k, v)| (k.clone(), snapshot_inner(v, memo)))
                .collect(),
        ),
        Value::Null => Value::Null,
        Value::Bool(b) => Value::Bool(*b),
        Value::Int(n) => Value::Int(*n),
        Value::Float(f) => Value::Float(*f),
        Value::Text(s) => Value::Text(s.clone()),
    }
}

impl Snapshot for Value {
    fn snapshot(&self) -> Self {
        snapshot_inner(self, &mut Memo::default())
    }
}

impl Snapshot for ValueMap {
    /// One memo for the whole map, so nodes aliased across fields stay
    /// aliased in the copy.
    fn snapshot(&self) -> Self {
        let mut memo = Memo::default();
        self.iter()
            .map(|(k, v)| (k.clone(), snapshot_inner(v, &mut memo)))
            .collect()
    }
}

macro_rules! snapshot_by_clone {
    ($($ty:ty),*) => {
        $(impl Snapshot for $ty {
            fn snapshot(&self) -> Self {
                self.clone()
            }
        })*
    };
}

snapshot_by_clone!(bool, i32, i64, u32, u64, usize, f64, String);

impl<T: Snapshot> Snapshot for Vec<T> {
    fn snapshot(&self) -> Self {
        self.iter().map(Snapshot::snapshot).collect()
    }
}

// ---------------------------------------------------------------------------
// Formatting
// ---------------------------------------------------------------------------

fn debug_inner(value: &Value, f: &mut fmt::Formatter<'_>, path: &mut Vec<usize>) -> fmt::Result {
    match value {
        Value::Null => f.write_str("Null"),
        Value::Bool(b) => write!(f, "Bool({b})"),
        Value::Int(n) => write!(f, "Int({n})"),
        Value::Float(x) => write!(f, "Float({x:?})"),
        Value::Text(s) => write!(f, "Text({s:?})"),
        Value::List(items) => {
            f.write_str("List([")?;
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    f.write_str(", ")?;
                }
                debug_inner(item, f, path)?;
            }
            f.write_str("])")
        }
        Value::Map(map) => {
            f.write_str("Map({")?;
            for (i, (key, item)) in map.iter().enumerate() {
                if i > 0 {
                    f.write_str(", ")?;
                }
                write!(f, "{key:?}: ")?;
                debug_inner(item, f, path)?;
            }
            f.write_str("})")
        }
        Value::Shared(node) => {
            let addr = node_addr(node);
            if path.contains(&addr) {
                return f.write_str("Shared(<cycle>)");
            }
            path.push(addr);
            f.write_str("Shared(")?;
            let out = debug_inner(&node.borrow(), f, path);
            path.pop();
            out?;
            f.write_str(")")
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        debug_inner(self, f, &mut Vec::new())
    }
}

fn display_inner(value: &Value, f: &mut fmt::Formatter<'_>, path: &mut Vec<usize>) -> fmt::Result {
    match value {
        Value::Null => Ok(()),
        Value::Bool(b) => write!(f, "{b}"),
        Value::Int(n) => write!(f, "{n}"),
        Value::Float(x) => write!(f, "{x}"),
        Value::Text(s) => f.write_str(s),
        Value::List(items) => {
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    f.write_str(", ")?;
                }
                display_inner(item, f, path)?;
            }
            Ok(())
        }
        Value::Map(map) => {
            for (i, (key, item)) in map.iter().enumerate() {
                if i > 0 {
                    f.write_str(", ")?;
                }
                write!(f, "{key}: ")?;
                display_inner(item, f, path)?;
            }
            Ok(())
        }
        Value::Shared(node) => {
            let addr = node_addr(node);
            if path.contains(&addr) {
                return f.write_str("...");
            }
            path.push(addr);
            let out = display_inner(&node.borrow(), f, path);
            path.pop();
            out
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        display_inner(self, f, &mut Vec::new())
    }
}

// ---------------------------------------------------------------------------
// Conversions
// ---------------------------------------------------------------------------

impl From<serde_json::Value> for Value {
    fn from(json: serde_json::Value) -> Self {
        use serde_json::Value as Json;
        match json {
            Json::Null => Self::Null,
            Json::Bool(b) => Self::Bool(b),
            Json::Number(n) => match n.as_i64() {
                Some(i) => Self::Int(i),
                None => n.as_f64().map_or(Self::Null, Self::Float),
            },
            Json::String(s) => Self::Text(s),
            Json::Array(items) => Self::List(items.into_iter().map(Self::from).collect()),
            Json::Object(map) => Self::Map(map.into_iter().map(|(k, v)| (k, Self::from(v))).collect()),
        }
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json()
            .map_err(serde::ser::Error::custom)?
            .serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Value {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        serde_json::Value::deserialize(deserializer).map(Self::from)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Self::Int(i64::from(n))
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Self::Int(n)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Self::Float(f)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::Text(s.to_owned())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Self::List(items)
    }
}

impl From<ValueMap> for Value {
    fn from(map: ValueMap) -> Self {
        Self::Map(map)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(opt: Option<T>) -> Self {
        opt.map_or(Self::Null, Into::into)
    }
}

/// Build a [`ValueMap`] from `(name, value)` pairs.
pub fn value_map<K, V, I>(pairs: I) -> ValueMap
where
    K: Into<String>,
    V: Into<Value>,
    I: IntoIterator<Item = (K, V)>,
{
    pairs
        .into_iter()
        .map(|(k, v)| (k.into(), v.into()))
        .collect()
}
