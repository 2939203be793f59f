//! Call dispatch protocol shared by sheet-defined functions and external bindings.
//!
//! A callable has a fixed arity in `0..=MAX_ARITY` and is invoked with an ordered argument
//! slice. Count mismatches never reach the body: they come back as `#ARGCOUNT!`, and any
//! call with more than [`MAX_ARITY`] arguments as `#TOOMANY!`.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::value::{ErrorKind, Value};
use crate::MAX_ARITY;

/// Number of arguments a callable accepts, validated against [`MAX_ARITY`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "usize", into = "usize")]
pub struct Arity(u8);

impl Arity {
    pub const ZERO: Arity = Arity(0);

    pub fn new(n: usize) -> Option<Self> {
        if n > MAX_ARITY {
            return None;
        }
        Some(Arity(n as u8))
    }

    #[inline]
    pub fn get(self) -> usize {
        self.0 as usize
    }

    /// Checks an incoming argument count against this arity.
    #[inline]
    pub fn check(self, count: usize) -> Result<(), ErrorKind> {
        if count > MAX_ARITY {
            Err(ErrorKind::TooManyArgs)
        } else if count != self.get() {
            Err(ErrorKind::ArgCount)
        } else {
            Ok(())
        }
    }
}

impl TryFrom<usize> for Arity {
    type Error = String;

    fn try_from(value: usize) -> Result<Self, Self::Error> {
        Arity::new(value).ok_or_else(|| format!("arity {value} exceeds {MAX_ARITY}"))
    }
}

impl From<Arity> for usize {
    fn from(value: Arity) -> Self {
        value.get()
    }
}

impl fmt::Display for Arity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Body of a compiled callable. Receives exactly `arity` arguments.
pub type Applier = Arc<dyn Fn(&[Value]) -> Value + Send + Sync>;

/// One slot of the dispatch table.
#[derive(Clone)]
pub enum Callable {
    /// Never assigned.
    Vacant,
    /// Registered, first compilation in flight.
    Pending(Arity),
    Compiled { arity: Arity, body: Applier },
    /// Tombstone left behind by a deleted function.
    Deleted(Arity),
}

impl Callable {
    pub fn compiled(arity: Arity, body: Applier) -> Self {
        Callable::Compiled { arity, body }
    }

    pub fn arity(&self) -> Option<Arity> {
        match self {
            Callable::Vacant => None,
            Callable::Pending(arity) | Callable::Deleted(arity) => Some(*arity),
            Callable::Compiled { arity, .. } => Some(*arity),
        }
    }

    pub fn is_compiled(&self) -> bool {
        matches!(self, Callable::Compiled { .. })
    }

    pub fn call(&self, args: &[Value]) -> Value {
        let arity = match self.arity() {
            Some(arity) => arity,
            None => return Value::Error(ErrorKind::Ref),
        };
        if let Err(err) = arity.check(args.len()) {
            return Value::Error(err);
        }
        match self {
            Callable::Compiled { body, .. } => body(args),
            Callable::Pending(_) => Value::Error(ErrorKind::Pending),
            Callable::Deleted(_) => Value::Error(ErrorKind::Deleted),
            Callable::Vacant => Value::Error(ErrorKind::Ref),
        }
    }

    /// Evaluates `exprs` one at a time through `eval` and calls the body.
    ///
    /// The count is checked before any argument is evaluated, and arguments are collected
    /// on the stack.
    pub fn call_with<E>(&self, exprs: &[E], mut eval: impl FnMut(&E) -> Value) -> Value {
        if exprs.len() > MAX_ARITY {
            return Value::Error(ErrorKind::TooManyArgs);
        }
        match self.arity() {
            Some(arity) if arity.get() != exprs.len() => return Value::Error(ErrorKind::ArgCount),
            Some(_) => {}
            None => return Value::Error(ErrorKind::Ref),
        }
        let args: SmallVec<[Value; MAX_ARITY]> = exprs.iter().map(&mut eval).collect();
        self.call(&args)
    }
}

impl fmt::Debug for Callable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Callable::Vacant => f.write_str("Vacant"),
            Callable::Pending(arity) => write!(f, "Pending({arity})"),
            Callable::Compiled { arity, .. } => write!(f, "Compiled({arity})"),
            Callable::Deleted(arity) => write!(f, "Deleted({arity})"),
        }
    }
}
