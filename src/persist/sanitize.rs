//! Sanitizer Module
//!
//! Strips callables and unsettled pending operations out of a value graph so
//! the result can be handed to a durable store.
//!
//! The pass runs in two phases:
//! 1. Scan: walk every reachable container once, remember which containers
//!    directly hold something that must be rewritten, and record parent edges.
//!    Dirtiness then propagates up the parent edges (cycles included).
//! 2. Build: clean containers are returned as the original reference. Each dirty
//!    container gets exactly one new container, registered in the memo table
//!    before its children are built, so cycles and aliases resolve to that single
//!    sanitized node.

use std::collections::{HashMap, HashSet};

use crate::value::{Shared, Value};

// == Options ==
/// Sanitizer behaviour switches.
#[derive(Debug, Clone, Copy)]
pub struct SanitizeOptions {
    /// When true an omitted array slot becomes `null`, keeping later indices
    /// stable. When false the slot is dropped.
    pub preserve_array_indices: bool,
}

impl Default for SanitizeOptions {
    fn default() -> Self {
        Self {
            preserve_array_indices: true,
        }
    }
}

/// Sanitizes with default options. `None` means the value itself is omitted.
pub fn sanitize(value: &Value) -> Option<Value> {
    Sanitizer::new(SanitizeOptions::default()).run(value)
}

// == Sanitizer ==
/// One sanitize pass. The memo table lives only as long as the pass.
pub struct Sanitizer {
    options: SanitizeOptions,
    visited: HashSet<usize>,
    directly_dirty: HashSet<usize>,
    parents: HashMap<usize, Vec<usize>>,
    dirty: HashSet<usize>,
    memo: HashMap<usize, Value>,
}

impl Sanitizer {
    pub fn new(options: SanitizeOptions) -> Self {
        Self {
            options,
            visited: HashSet::new(),
            directly_dirty: HashSet::new(),
            parents: HashMap::new(),
            dirty: HashSet::new(),
            memo: HashMap::new(),
        }
    }

    /// Runs the pass over `value`.
    pub fn run(mut self, value: &Value) -> Option<Value> {
        self.scan(value, None);
        self.propagate();
        self.build(value)
    }

    // == Phase 1: Scan ==
    fn scan(&mut self, value: &Value, parent: Option<usize>) {
        match value {
            Value::Function(_) => self.mark_direct(parent),
            Value::Pending(op) => {
                // The slot is rewritten either way: dropped, or replaced by the
                // settled value.
                self.mark_direct(parent);
                if let Some(settled) = op.resolved() {
                    self.scan(&settled, parent);
                }
            }
            Value::Array(_) | Value::Set(_) | Value::Object(_) | Value::Map(_) => {
                let Some(id) = value.identity() else { return };
                if let Some(parent) = parent {
                    self.parents.entry(id).or_default().push(parent);
                }
                if !self.visited.insert(id) {
                    return;
                }
                for child in children(value) {
                    self.scan(&child, Some(id));
                }
            }
            _ => {}
        }
    }

    fn mark_direct(&mut self, parent: Option<usize>) {
        if let Some(parent) = parent {
            self.directly_dirty.insert(parent);
        }
    }

    fn propagate(&mut self) {
        let mut work: Vec<usize> = self.directly_dirty.iter().copied().collect();
        while let Some(id) = work.pop() {
            if !self.dirty.insert(id) {
                continue;
            }
            if let Some(parents) = self.parents.get(&id) {
                work.extend(parents.iter().copied());
            }
        }
    }

    // == Phase 2: Build ==
    fn build(&mut self, value: &Value) -> Option<Value> {
        match value {
            Value::Function(_) => None,
            Value::Pending(op) => op.resolved().and_then(|settled| self.build(&settled)),
            Value::Array(items) => self.rebuild(value, |out: &mut Self, id| {
                let shell = Shared::new(Vec::new());
                out.memo.insert(id, Value::Array(shell.clone()));
                let source = items.read().clone();
                let mut built = Vec::with_capacity(source.len());
                for item in &source {
                    match out.build(item) {
                        Some(v) => built.push(v),
                        None if out.options.preserve_array_indices => built.push(Value::Null),
                        None => {}
                    }
                }
                *shell.write() = built;
            }),
            Value::Set(items) => self.rebuild(value, |out: &mut Self, id| {
                let shell = Shared::new(Vec::new());
                out.memo.insert(id, Value::Set(shell.clone()));
                let source = items.read().clone();
                let built: Vec<Value> = source.iter().filter_map(|v| out.build(v)).collect();
                *shell.write() = built;
            }),
            Value::Object(fields) => self.rebuild(value, |out: &mut Self, id| {
                let shell = Shared::new(Vec::new());
                out.memo.insert(id, Value::Object(shell.clone()));
                let source = fields.read().clone();
                let built: Vec<(String, Value)> = source
                    .iter()
                    .filter_map(|(k, v)| out.build(v).map(|v| (k.clone(), v)))
                    .collect();
                *shell.write() = built;
            }),
            Value::Map(pairs) => self.rebuild(value, |out: &mut Self, id| {
                let shell = Shared::new(Vec::new());
                out.memo.insert(id, Value::Map(shell.clone()));
                let source = pairs.read().clone();
                let mut built = Vec::with_capacity(source.len());
                for (k, v) in &source {
                    if let (Some(k), Some(v)) = (out.build(k), out.build(v)) {
                        built.push((k, v));
                    }
                }
                *shell.write() = built;
            }),
            scalar => Some(scalar.clone()),
        }
    }

    /// Shared container handling: memo lookup, clean pass-through, or a fresh
    /// container filled by `fill` (which must register itself in the memo first).
    fn rebuild(&mut self, value: &Value, fill: impl FnOnce(&mut Self, usize)) -> Option<Value> {
        let id = value.identity()?;
        if let Some(done) = self.memo.get(&id) {
            return Some(done.clone());
        }
        if !self.dirty.contains(&id) {
            self.memo.insert(id, value.clone());
            return Some(value.clone());
        }
        fill(self, id);
        self.memo.get(&id).cloned()
    }
}

fn children(value: &Value) -> Vec<Value> {
    match value {
        Value::Array(items) | Value::Set(items) => items.read().clone(),
        Value::Object(fields) => fields.read().iter().map(|(_, v)| v.clone()).collect(),
        Value::Map(pairs) => pairs
            .read()
            .iter()
            .flat_map(|(k, v)| [k.clone(), v.clone()])
            .collect(),
        _ => Vec::new(),
    }
}
