//! General-purpose function namespace.
//!
//! Plain worksheet functions live here next to the appliers the catalog publishes for
//! sheet-defined functions. Names are case-insensitive and surrounding whitespace is
//! ignored, the same folding the catalog applies.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, Weak};

use crate::backend::{FunctionNamespace, NamespaceEntry};
use crate::catalog::{normalize_name, FunctionCatalog};
use crate::dispatch::Applier;
use crate::value::{ErrorKind, FunctionValue, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Volatility {
    NonVolatile,
    Volatile,
}

pub type FunctionImpl = fn(&[Value]) -> Value;

#[derive(Clone, Copy)]
pub struct FunctionSpec {
    pub name: &'static str,
    pub min_args: usize,
    pub max_args: usize,
    pub volatility: Volatility,
    pub implementation: FunctionImpl,
}

const BUILTINS: &[FunctionSpec] = &[
    FunctionSpec {
        name: "SUM",
        min_args: 0,
        max_args: 255,
        volatility: Volatility::NonVolatile,
        implementation: sum,
    },
    FunctionSpec {
        name: "MAX",
        min_args: 1,
        max_args: 255,
        volatility: Volatility::NonVolatile,
        implementation: max,
    },
    FunctionSpec {
        name: "MIN",
        min_args: 1,
        max_args: 255,
        volatility: Volatility::NonVolatile,
        implementation: min,
    },
    FunctionSpec {
        name: "ABS",
        min_args: 1,
        max_args: 1,
        volatility: Volatility::NonVolatile,
        implementation: abs,
    },
    FunctionSpec {
        name: "NOT",
        min_args: 1,
        max_args: 1,
        volatility: Volatility::NonVolatile,
        implementation: not,
    },
    FunctionSpec {
        name: "LEN",
        min_args: 1,
        max_args: 1,
        volatility: Volatility::NonVolatile,
        implementation: len,
    },
    FunctionSpec {
        name: "RAND",
        min_args: 0,
        max_args: 0,
        volatility: Volatility::Volatile,
        implementation: rand,
    },
];

fn spec_applier(spec: FunctionSpec) -> Applier {
    Arc::new(move |args: &[Value]| {
        if args.len() < spec.min_args || args.len() > spec.max_args {
            return Value::Error(ErrorKind::Value);
        }
        (spec.implementation)(args)
    })
}

#[derive(Default)]
pub struct FunctionTable {
    entries: RwLock<HashMap<String, NamespaceEntry>>,
}

impl FunctionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// A table preloaded with the built-in worksheet functions.
    pub fn with_builtins() -> Self {
        let table = Self::new();
        for spec in BUILTINS {
            table.register(
                spec.name,
                spec_applier(*spec),
                spec.volatility == Volatility::Volatile,
            );
        }
        table
    }

    /// Calls `name`; `#NAME?` if it is not registered.
    pub fn call(&self, name: &str, args: &[Value]) -> Value {
        match self.get(name) {
            Some(entry) => (entry.applier)(args),
            None => Value::Error(ErrorKind::Name),
        }
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.read().keys().cloned().collect();
        names.sort();
        names
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<String, NamespaceEntry>> {
        match self.entries.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<String, NamespaceEntry>> {
        match self.entries.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl FunctionNamespace for FunctionTable {
    fn get(&self, name: &str) -> Option<NamespaceEntry> {
        self.read().get(&normalize_name(name)).cloned()
    }

    fn remove(&self, name: &str) -> bool {
        self.write().remove(&normalize_name(name)).is_some()
    }

    fn register(&self, name: &str, applier: Applier, is_volatile: bool) {
        self.write().insert(
            normalize_name(name),
            NamespaceEntry {
                applier,
                is_volatile,
            },
        );
    }

    fn update_applier(&self, name: &str, applier: Applier, is_volatile: bool) -> bool {
        match self.write().get_mut(&normalize_name(name)) {
            Some(entry) => {
                entry.applier = applier;
                entry.is_volatile = is_volatile;
                true
            }
            None => false,
        }
    }
}

/// Registers `CLOSURE`, `APPLY` and `SPECIALIZE`, which create, call and specialize
/// function values of `catalog`.
///
/// `CLOSURE(name, args...)` takes one argument per input of `name`; pass `#N/A` to
/// leave an input unbound.
pub fn register_function_value_builtins(
    namespace: &dyn FunctionNamespace,
    catalog: &Arc<FunctionCatalog>,
) {
    let weak = Arc::downgrade(catalog);
    namespace.register("CLOSURE", Arc::new(move |args| closure(&weak, args)), false);
    namespace.register("APPLY", Arc::new(apply), false);
    let weak = Arc::downgrade(catalog);
    namespace.register(
        "SPECIALIZE",
        Arc::new(move |args| specialize(&weak, args)),
        false,
    );
}

fn closure(catalog: &Weak<FunctionCatalog>, args: &[Value]) -> Value {
    let Some(catalog) = catalog.upgrade() else {
        return Value::Error(ErrorKind::Ref);
    };
    let Some((Value::Text(name), bound)) = args.split_first() else {
        return Value::Error(ErrorKind::Value);
    };
    let Some(sdf) = catalog.lookup(name) else {
        return Value::Error(ErrorKind::Name);
    };
    match FunctionValue::new(sdf, bound.to_vec()) {
        Ok(value) => Value::Function(value),
        Err(e) => Value::Error(e),
    }
}

fn apply(args: &[Value]) -> Value {
    match args.split_first() {
        Some((Value::Function(f), rest)) => f.apply(rest),
        Some((Value::Error(e), _)) => Value::Error(*e),
        _ => Value::Error(ErrorKind::Value),
    }
}

fn specialize(catalog: &Weak<FunctionCatalog>, args: &[Value]) -> Value {
    let Some(catalog) = catalog.upgrade() else {
        return Value::Error(ErrorKind::Ref);
    };
    let [Value::Function(value)] = args else {
        return Value::Error(ErrorKind::Value);
    };
    match catalog.specialize(value) {
        Ok(residual) => {
            let unbound = vec![Value::Error(ErrorKind::NA); residual.arity().get()];
            match FunctionValue::new(residual, unbound) {
                Ok(value) => Value::Function(value),
                Err(e) => Value::Error(e),
            }
        }
        Err(err) => {
            log::debug!("SPECIALIZE failed: {err}");
            Value::Error(ErrorKind::Value)
        }
    }
}

fn numbers(args: &[Value], out: &mut Vec<f64>) -> Result<(), ErrorKind> {
    for arg in args {
        match arg {
            Value::Number(n) => out.push(*n),
            Value::Bool(b) => out.push(if *b { 1.0 } else { 0.0 }),
            Value::Error(e) => return Err(*e),
            Value::Array(arr) => {
                for v in &arr.values {
                    match v {
                        Value::Number(n) => out.push(*n),
                        Value::Error(e) => return Err(*e),
                        _ => {}
                    }
                }
            }
            Value::Text(s) => out.push(s.trim().parse().map_err(|_| ErrorKind::Value)?),
            Value::Blank => {}
            Value::Function(_) | Value::Object(_) => return Err(ErrorKind::Value),
        }
    }
    Ok(())
}

fn fold(args: &[Value], f: impl Fn(&[f64]) -> Value) -> Value {
    let mut out = Vec::new();
    match numbers(args, &mut out) {
        Ok(()) => f(&out),
        Err(e) => Value::Error(e),
    }
}

fn sum(args: &[Value]) -> Value {
    fold(args, |ns| Value::Number(ns.iter().sum()))
}

fn max(args: &[Value]) -> Value {
    fold(args, |ns| {
        Value::Number(ns.iter().copied().reduce(f64::max).unwrap_or(0.0))
    })
}

fn min(args: &[Value]) -> Value {
    fold(args, |ns| {
        Value::Number(ns.iter().copied().reduce(f64::min).unwrap_or(0.0))
    })
}

fn abs(args: &[Value]) -> Value {
    fold(args, |ns| Value::Number(ns.first().copied().unwrap_or(0.0).abs()))
}

fn not(args: &[Value]) -> Value {
    match &args[0] {
        Value::Error(e) => Value::Error(*e),
        v => match v.as_bool() {
            Some(b) => Value::Bool(!b),
            None => Value::Error(ErrorKind::Value),
        },
    }
}

fn len(args: &[Value]) -> Value {
    match &args[0] {
        Value::Error(e) => Value::Error(*e),
        Value::Array(_) | Value::Function(_) | Value::Object(_) => Value::Error(ErrorKind::Value),
        v => Value::Number(v.to_string().chars().count() as f64),
    }
}

fn rand(_args: &[Value]) -> Value {
    static STATE: AtomicU64 = AtomicU64::new(0x9E37_79B9_7F4A_7C15);
    // xorshift64*
    let mut x = STATE.load(Ordering::Relaxed);
    x ^= x >> 12;
    x ^= x << 25;
    x ^= x >> 27;
    STATE.store(x, Ordering::Relaxed);
    let bits = x.wrapping_mul(0x2545_F491_4F6C_DD1D) >> 11;
    Value::Number(bits as f64 / (1u64 << 53) as f64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Array;

    #[test]
    fn lookup_is_case_insensitive() {
        let table = FunctionTable::with_builtins();
        assert!(table.get("sum").is_some());
        assert_eq!(
            table.call("Sum", &[1.0.into(), 2.0.into()]),
            Value::Number(3.0)
        );
        assert_eq!(table.call("NOPE", &[]), Value::Error(ErrorKind::Name));
    }

    #[test]
    fn lookup_ignores_surrounding_whitespace() {
        let table = FunctionTable::with_builtins();
        assert!(table.get(" sum ").is_some());
        table.register(" twice\t", Arc::new(|args: &[Value]| args[0].clone()), false);
        assert!(table.names().contains(&"TWICE".to_string()));
        assert_eq!(table.call("TWICE", &[1.0.into()]), Value::Number(1.0));
        assert!(table.update_applier("Twice ", Arc::new(|_: &[Value]| Value::Blank), false));
        assert_eq!(table.call(" twice", &[1.0.into()]), Value::Blank);
        assert!(table.remove("\tTWICE"));
        assert!(table.get("TWICE").is_none());
    }

    #[test]
    fn builtins_validate_argument_counts() {
        let table = FunctionTable::with_builtins();
        assert_eq!(table.call("ABS", &[]), Value::Error(ErrorKind::Value));
        assert_eq!(table.call("ABS", &[(-2.0).into()]), Value::Number(2.0));
    }

    #[test]
    fn sum_flattens_arrays_and_propagates_errors() {
        let table = FunctionTable::with_builtins();
        let arr = Value::Array(Arc::new(Array::row(vec![1.0.into(), "x".into(), 2.0.into()])));
        assert_eq!(table.call("SUM", &[arr, 4.0.into()]), Value::Number(7.0));
        assert_eq!(
            table.call("SUM", &[1.0.into(), Value::Error(ErrorKind::Div0)]),
            Value::Error(ErrorKind::Div0)
        );
    }

    #[test]
    fn rand_is_volatile_and_in_range() {
        let table = FunctionTable::with_builtins();
        assert!(table.get("RAND").is_some_and(|e| e.is_volatile));
        for _ in 0..100 {
            let Value::Number(n) = table.call("RAND", &[]) else {
                panic!("RAND returned a non-number");
            };
            assert!((0.0..1.0).contains(&n));
        }
    }

    #[test]
    fn update_applier_requires_existing_entry() {
        let table = FunctionTable::new();
        let applier: Applier = Arc::new(|_| Value::Number(1.0));
        assert!(!table.update_applier("F", applier.clone(), false));
        table.register("f", applier, false);
        assert!(table.update_applier("F", Arc::new(|_| Value::Number(2.0)), true));
        assert_eq!(table.call("f", &[]), Value::Number(2.0));
        assert!(table.get("F").is_some_and(|e| e.is_volatile));
        assert!(table.remove("F"));
        assert!(table.get("f").is_none());
    }
}
