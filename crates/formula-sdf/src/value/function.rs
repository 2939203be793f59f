use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use smallvec::SmallVec;

use super::{ErrorKind, Value};
use crate::catalog::SdfInfo;
use crate::MAX_ARITY;

/// A sheet-defined function with some of its arguments fixed.
///
/// Every argument slot holds either a bound value or `#N/A`, which marks the slot as
/// unbound. Function values are immutable, so they can key the specialization cache
/// for as long as the catalog lives.
#[derive(Clone)]
pub struct FunctionValue {
    sdf: Arc<SdfInfo>,
    args: Arc<[Value]>,
}

impl FunctionValue {
    /// Fails with [`ErrorKind::ArgCount`] when `args` does not match the arity of `sdf`.
    pub fn new(sdf: Arc<SdfInfo>, args: Vec<Value>) -> Result<Self, ErrorKind> {
        if args.len() != sdf.arity().get() {
            return Err(ErrorKind::ArgCount);
        }
        Ok(Self {
            sdf,
            args: args.into(),
        })
    }

    pub fn sdf(&self) -> &Arc<SdfInfo> {
        &self.sdf
    }

    pub fn args(&self) -> &Arc<[Value]> {
        &self.args
    }

    pub fn unbound_count(&self) -> usize {
        self.args.iter().filter(|v| v.is_unbound()).count()
    }

    /// Calls the base function, filling the unbound slots with `extra` from left to right.
    pub fn apply(&self, extra: &[Value]) -> Value {
        if extra.len() > MAX_ARITY {
            return Value::Error(ErrorKind::TooManyArgs);
        }
        if extra.len() != self.unbound_count() {
            return Value::Error(ErrorKind::ArgCount);
        }
        let mut extra = extra.iter();
        let merged: SmallVec<[Value; MAX_ARITY]> = self
            .args
            .iter()
            .map(|arg| match arg {
                v if v.is_unbound() => extra.next().cloned().unwrap_or(Value::Blank),
                v => v.clone(),
            })
            .collect();
        self.sdf.apply(&merged)
    }

    pub(crate) fn same_as(&self, other: &FunctionValue) -> bool {
        Arc::ptr_eq(&self.sdf, &other.sdf)
            && self.args.len() == other.args.len()
            && self
                .args
                .iter()
                .zip(other.args.iter())
                .all(|(a, b)| a.same_as(b))
    }

    pub(crate) fn hash_into<H: Hasher>(&self, state: &mut H) {
        self.sdf.index().hash(state);
        self.args.len().hash(state);
        for arg in self.args.iter() {
            arg.hash_into(state);
        }
    }
}

impl PartialEq for FunctionValue {
    fn eq(&self, other: &Self) -> bool {
        self.same_as(other)
    }
}

impl fmt::Debug for FunctionValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FunctionValue")
            .field("name", &self.sdf.name())
            .field("index", &self.sdf.index())
            .field("args", &self.args)
            .finish()
    }
}

impl fmt::Display for FunctionValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(", self.sdf.name())?;
        for (idx, arg) in self.args.iter().enumerate() {
            if idx > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{arg}")?;
        }
        f.write_str(")")
    }
}
