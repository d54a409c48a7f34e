//! Dynamic Value Module
//!
//! A JSON-like value graph whose containers are shared by reference, so the same
//! substructure can appear at several places (aliasing) or inside itself (cycles).
//! Cached query data, persisted snapshots and the sanitizer all work on this type.
//!
//! Besides plain data a value may hold things that must never reach a durable
//! store: callables and pending operations.

use std::collections::HashSet;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::error::{Result, SyncError};

// == Shared Container ==
/// Reference-counted, identity-bearing container cell.
pub struct Shared<T>(Arc<RwLock<T>>);

impl<T> Shared<T> {
    pub fn new(inner: T) -> Self {
        Self(Arc::new(RwLock::new(inner)))
    }

    /// Stable identity of the container for the lifetime of the allocation.
    pub fn id(&self) -> usize {
        Arc::as_ptr(&self.0) as *const () as usize
    }

    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    pub fn read(&self) -> RwLockReadGuard<'_, T> {
        self.0.read().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn write(&self) -> RwLockWriteGuard<'_, T> {
        self.0.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<T> Clone for Shared<T> {
    fn clone(&self) -> Self {
        Self(Arc::clone(&self.0))
    }
}

// == Callable ==
type CallableFn = dyn Fn(&[Value]) -> Value + Send + Sync;

/// An opaque function value. Never serializable.
#[derive(Clone)]
pub struct Callable {
    name: Arc<str>,
    func: Arc<CallableFn>,
}

impl Callable {
    pub fn new(name: &str, func: impl Fn(&[Value]) -> Value + Send + Sync + 'static) -> Self {
        Self {
            name: Arc::from(name),
            func: Arc::new(func),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn call(&self, args: &[Value]) -> Value {
        (self.func)(args)
    }

    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.func, &other.func)
    }
}

impl fmt::Debug for Callable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Callable").field(&self.name).finish()
    }
}

// == Pending Operation ==
/// Placeholder for an asynchronous operation that may not have settled yet.
#[derive(Clone)]
pub struct PendingOp(Shared<Option<Value>>);

impl PendingOp {
    pub fn new() -> Self {
        Self(Shared::new(None))
    }

    /// Records the settled outcome. Settling twice keeps the first outcome.
    pub fn settle(&self, value: Value) {
        let mut slot = self.0.write();
        if slot.is_none() {
            *slot = Some(value);
        }
    }

    pub fn settled(&self) -> Option<Value> {
        self.0.read().clone()
    }

    pub fn is_settled(&self) -> bool {
        self.0.read().is_some()
    }

    /// Follows settled-to-pending chains down to a concrete value. A chain
    /// that ends unsettled or loops back on itself has no value.
    pub fn resolved(&self) -> Option<Value> {
        let mut seen = HashSet::new();
        let mut current = self.clone();
        loop {
            if !seen.insert(current.0.id()) {
                return None;
            }
            match current.settled()? {
                Value::Pending(next) => current = next,
                value => return Some(value),
            }
        }
    }

    pub fn ptr_eq(&self, other: &Self) -> bool {
        self.0.ptr_eq(&other.0)
    }
}

impl fmt::Debug for PendingOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingOp")
            .field("settled", &self.is_settled())
            .finish()
    }
}

impl Default for PendingOp {
    fn default() -> Self {
        Self::new()
    }
}

// == Value ==
/// Ordered object fields.
pub type Fields = Vec<(String, Value)>;

/// A dynamically typed value.
#[derive(Clone)]
pub enum Value {
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    Function(Callable),
    Pending(PendingOp),
    Array(Shared<Vec<Value>>),
    Object(Shared<Fields>),
    Set(Shared<Vec<Value>>),
    Map(Shared<Vec<(Value, Value)>>),
}

impl Value {
    pub fn string(s: impl Into<String>) -> Self {
        Value::String(s.into())
    }

    pub fn object<K: Into<String>>(fields: impl IntoIterator<Item = (K, Value)>) -> Self {
        Value::Object(Shared::new(
            fields.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        ))
    }

    pub fn array(items: impl IntoIterator<Item = Value>) -> Self {
        Value::Array(Shared::new(items.into_iter().collect()))
    }

    pub fn set(items: impl IntoIterator<Item = Value>) -> Self {
        Value::Set(Shared::new(items.into_iter().collect()))
    }

    pub fn map(pairs: impl IntoIterator<Item = (Value, Value)>) -> Self {
        Value::Map(Shared::new(pairs.into_iter().collect()))
    }

    pub fn function(name: &str, func: impl Fn(&[Value]) -> Value + Send + Sync + 'static) -> Self {
        Value::Function(Callable::new(name, func))
    }

    /// Identity of the underlying container, `None` for scalars.
    pub fn identity(&self) -> Option<usize> {
        match self {
            Value::Array(s) | Value::Set(s) => Some(s.id()),
            Value::Object(s) => Some(s.id()),
            Value::Map(s) => Some(s.id()),
            _ => None,
        }
    }

    /// True when both values are the same container (or the same callable/pending op).
    pub fn same_ref(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Function(a), Value::Function(b)) => a.ptr_eq(b),
            (Value::Pending(a), Value::Pending(b)) => a.ptr_eq(b),
            _ => match (self.identity(), other.identity()) {
                (Some(a), Some(b)) => a == b,
                _ => false,
            },
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_u64(&self) -> Option<u64> {
        self.as_f64()
            .filter(|n| *n >= 0.0 && n.fract() == 0.0)
            .map(|n| n as u64)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    // == Object Field Access ==
    /// Returns a field of an object value.
    pub fn get(&self, field: &str) -> Option<Value> {
        match self {
            Value::Object(fields) => fields
                .read()
                .iter()
                .find(|(k, _)| k == field)
                .map(|(_, v)| v.clone()),
            _ => None,
        }
    }

    /// Sets (or replaces) a field of an object value. No-op on non-objects.
    pub fn insert(&self, field: &str, value: Value) {
        if let Value::Object(fields) = self {
            let mut fields = fields.write();
            match fields.iter_mut().find(|(k, _)| k == field) {
                Some((_, slot)) => *slot = value,
                None => fields.push((field.to_string(), value)),
            }
        }
    }

    /// Removes a field of an object value.
    pub fn remove(&self, field: &str) -> Option<Value> {
        match self {
            Value::Object(fields) => {
                let mut fields = fields.write();
                let pos = fields.iter().position(|(k, _)| k == field)?;
                Some(fields.remove(pos).1)
            }
            _ => None,
        }
    }

    /// Items of an array or set value.
    pub fn items(&self) -> Option<Vec<Value>> {
        match self {
            Value::Array(items) | Value::Set(items) => Some(items.read().clone()),
            _ => None,
        }
    }

    // == Reachability ==
    /// True when a callable or unsettled pending operation is reachable from here.
    pub fn contains_unserializable(&self) -> bool {
        let mut seen = HashSet::new();
        self.find_unserializable(&mut seen)
    }

    fn find_unserializable(&self, seen: &mut HashSet<usize>) -> bool {
        if let Some(id) = self.identity() {
            if !seen.insert(id) {
                return false;
            }
        }
        match self {
            Value::Function(_) => true,
            Value::Pending(op) => match op.resolved() {
                Some(v) => v.find_unserializable(seen),
                None => true,
            },
            Value::Array(items) | Value::Set(items) => {
                let items = items.read().clone();
                items.iter().any(|v| v.find_unserializable(seen))
            }
            Value::Object(fields) => {
                let fields = fields.read().clone();
                fields.iter().any(|(_, v)| v.find_unserializable(seen))
            }
            Value::Map(pairs) => {
                let pairs = pairs.read().clone();
                pairs
                    .iter()
                    .any(|(k, v)| k.find_unserializable(seen) || v.find_unserializable(seen))
            }
            _ => false,
        }
    }

    // == JSON Conversion ==
    /// Encodes as JSON. Sets and maps are tagged (`{"$set": [...]}`,
    /// `{"$map": [[k, v], ...]}`) so they survive a round trip.
    ///
    /// Fails on callables, pending operations and cycles. Aliased substructures
    /// are written out once per occurrence.
    pub fn to_json(&self) -> Result<serde_json::Value> {
        let mut ancestors = Vec::new();
        self.to_json_inner(&mut ancestors)
    }

    fn to_json_inner(&self, ancestors: &mut Vec<usize>) -> Result<serde_json::Value> {
        use serde_json::Value as Json;

        if let Some(id) = self.identity() {
            if ancestors.contains(&id) {
                return Err(SyncError::Serialization("cyclic value".to_string()));
            }
            ancestors.push(id);
        }

        let out = match self {
            Value::Null => Ok(Json::Null),
            Value::Bool(b) => Ok(Json::Bool(*b)),
            // Integral numbers stay integers so key parts keep their canonical form.
            Value::Number(n) if n.fract() == 0.0 && n.abs() < 9.0e15 => Ok(Json::from(*n as i64)),
            Value::Number(n) => Ok(serde_json::Number::from_f64(*n)
                .map(Json::Number)
                .unwrap_or(Json::Null)),
            Value::String(s) => Ok(Json::String(s.clone())),
            Value::Function(f) => Err(SyncError::Serialization(format!(
                "function '{}' is not serializable",
                f.name()
            ))),
            Value::Pending(_) => Err(SyncError::Serialization(
                "pending operation is not serializable".to_string(),
            )),
            Value::Array(items) => {
                let items = items.read().clone();
                items
                    .iter()
                    .map(|v| v.to_json_inner(ancestors))
                    .collect::<Result<Vec<_>>>()
                    .map(Json::Array)
            }
            Value::Set(items) => {
                let items = items.read().clone();
                let encoded = items
                    .iter()
                    .map(|v| v.to_json_inner(ancestors))
                    .collect::<Result<Vec<_>>>()?;
                Ok(serde_json::json!({ "$set": encoded }))
            }
            Value::Object(fields) => {
                let fields = fields.read().clone();
                let mut map = serde_json::Map::with_capacity(fields.len());
                for (k, v) in &fields {
                    map.insert(k.clone(), v.to_json_inner(ancestors)?);
                }
                Ok(Json::Object(map))
            }
            Value::Map(pairs) => {
                let pairs = pairs.read().clone();
                let mut encoded = Vec::with_capacity(pairs.len());
                for (k, v) in &pairs {
                    encoded.push(Json::Array(vec![
                        k.to_json_inner(ancestors)?,
                        v.to_json_inner(ancestors)?,
                    ]));
                }
                Ok(serde_json::json!({ "$map": encoded }))
            }
        };

        if self.identity().is_some() {
            ancestors.pop();
        }
        out
    }
}

impl From<serde_json::Value> for Value {
    fn from(json: serde_json::Value) -> Self {
        use serde_json::Value as Json;

        match json {
            Json::Null => Value::Null,
            Json::Bool(b) => Value::Bool(b),
            Json::Number(n) => Value::Number(n.as_f64().unwrap_or(0.0)),
            Json::String(s) => Value::String(s),
            Json::Array(items) => Value::array(items.into_iter().map(Value::from)),
            Json::Object(map) => {
                if map.len() == 1 {
                    if let Some(Json::Array(items)) = map.get("$set") {
                        return Value::set(items.iter().cloned().map(Value::from));
                    }
                    if let Some(Json::Array(pairs)) = map.get("$map") {
                        return Value::map(pairs.iter().filter_map(|pair| match pair {
                            Json::Array(kv) if kv.len() == 2 => {
                                Some((Value::from(kv[0].clone()), Value::from(kv[1].clone())))
                            }
                            _ => None,
                        }));
                    }
                }
                Value::object(map.into_iter().map(|(k, v)| (k, Value::from(v))))
            }
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<u64> for Value {
    fn from(n: u64) -> Self {
        Value::Number(n as f64)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl fmt::Debug for Value {
    // Containers print shallowly; a derived impl would not terminate on cycles.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{}", b),
            Value::Number(n) => write!(f, "{}", n),
            Value::String(s) => write!(f, "{:?}", s),
            Value::Function(c) => write!(f, "Function({})", c.name()),
            Value::Pending(op) => write!(
                f,
                "Pending({})",
                if op.is_settled() { "settled" } else { "unsettled" }
            ),
            Value::Array(s) => write!(f, "Array#{:x}[{}]", s.id(), s.read().len()),
            Value::Set(s) => write!(f, "Set#{:x}[{}]", s.id(), s.read().len()),
            Value::Object(s) => write!(f, "Object#{:x}{{{}}}", s.id(), s.read().len()),
            Value::Map(s) => write!(f, "Map#{:x}{{{}}}", s.id(), s.read().len()),
        }
    }
}

// == Structural Equality ==
/// Deep equality that terminates on cycles.
///
/// Container pairs currently being compared are assumed equal, so two cyclic
/// graphs with the same shape compare equal. Callables and pending operations
/// compare by identity.
pub fn structural_eq(a: &Value, b: &Value) -> bool {
    let mut assumed = HashSet::new();
    eq_inner(a, b, &mut assumed)
}

fn eq_inner(a: &Value, b: &Value, assumed: &mut HashSet<(usize, usize)>) -> bool {
    if let (Some(ia), Some(ib)) = (a.identity(), b.identity()) {
        if ia == ib || !assumed.insert((ia, ib)) {
            return true;
        }
    }
    match (a, b) {
        (Value::Null, Value::Null) => true,
        (Value::Bool(x), Value::Bool(y)) => x == y,
        (Value::Number(x), Value::Number(y)) => x == y,
        (Value::String(x), Value::String(y)) => x == y,
        (Value::Function(x), Value::Function(y)) => x.ptr_eq(y),
        (Value::Pending(x), Value::Pending(y)) => x.ptr_eq(y),
        (Value::Array(x), Value::Array(y)) | (Value::Set(x), Value::Set(y)) => {
            let (x, y) = (x.read().clone(), y.read().clone());
            x.len() == y.len() && x.iter().zip(&y).all(|(p, q)| eq_inner(p, q, assumed))
        }
        (Value::Object(x), Value::Object(y)) => {
            let (x, y) = (x.read().clone(), y.read().clone());
            x.len() == y.len()
                && x
                    .iter()
                    .zip(&y)
                    .all(|((kp, p), (kq, q))| kp == kq && eq_inner(p, q, assumed))
        }
        (Value::Map(x), Value::Map(y)) => {
            let (x, y) = (x.read().clone(), y.read().clone());
            x.len() == y.len()
                && x.iter().zip(&y).all(|((kp, p), (kq, q))| {
                    eq_inner(kp, kq, assumed) && eq_inner(p, q, assumed)
                })
        }
        _ => false,
    }
}
