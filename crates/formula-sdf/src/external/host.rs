//! Host types that external functions bind to.
//!
//! Host types self-register with [`inventory::submit!`] under a module name; the binder
//! searches modules in the order configured by [`BinderSettings`](crate::BinderSettings).

use std::collections::HashMap;
use std::sync::OnceLock;

use crate::value::{ObjectValue, Value};

/// A value on the native side of a binding.
///
/// Integer and floating point widths are carried in the widest representation; the
/// binding's [`NativeType`](crate::signature::NativeType) fixes the actual width.
#[derive(Debug, Clone, PartialEq)]
pub enum NativeValue {
    Void,
    Bool(bool),
    Char(char),
    Int(i64),
    UInt(u64),
    Float(f64),
    Str(String),
    Array(Vec<NativeValue>),
    Matrix {
        rows: usize,
        cols: usize,
        values: Vec<NativeValue>,
    },
    Value(Value),
    Object(ObjectValue),
}

impl NativeValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            NativeValue::Float(n) => Some(*n),
            NativeValue::Int(n) => Some(*n as f64),
            NativeValue::UInt(n) => Some(*n as f64),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            NativeValue::Int(n) => Some(*n),
            NativeValue::UInt(n) => i64::try_from(*n).ok(),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            NativeValue::Str(s) => Some(s),
            _ => None,
        }
    }
}

/// Failure raised by a host member.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct HostError(pub String);

impl HostError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

pub type NativeFn = fn(&[NativeValue]) -> Result<NativeValue, HostError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemberKind {
    Static,
    /// Receives the receiver as argument 0.
    Instance,
    Constructor,
}

#[derive(Debug, Clone, Copy)]
pub struct HostMember {
    pub name: &'static str,
    pub kind: MemberKind,
    /// Function signature, excluding the receiver of instance members.
    pub signature: &'static str,
    pub invoke: NativeFn,
}

#[derive(Debug)]
pub struct HostTypeSpec {
    pub module: &'static str,
    pub name: &'static str,
    /// Signature of the receiver type for instance members.
    pub receiver: &'static str,
    pub members: &'static [HostMember],
}

inventory::collect!(HostTypeSpec);

impl HostTypeSpec {
    pub fn members_named<'n>(
        &self,
        name: &'n str,
    ) -> impl Iterator<Item = &'static HostMember> + 'n {
        let members: &'static [HostMember] = self.members;
        members.iter().filter(move |m| m.name == name)
    }
}

/// Iterates all registered host types.
pub fn iter_host_types() -> impl Iterator<Item = &'static HostTypeSpec> {
    inventory::iter::<HostTypeSpec>.into_iter()
}

type Registry = HashMap<&'static str, HashMap<&'static str, &'static HostTypeSpec>>;

fn registry() -> &'static Registry {
    static REGISTRY: OnceLock<Registry> = OnceLock::new();
    REGISTRY.get_or_init(|| {
        let mut map: Registry = HashMap::new();
        for spec in iter_host_types() {
            let module = map.entry(spec.module).or_default();
            if module.insert(spec.name, spec).is_some() {
                log::warn!(
                    "host type {} registered twice in module {}",
                    spec.name,
                    spec.module
                );
            }
        }
        map
    })
}

/// Looks up `name` in `module`. Type names are case-sensitive.
pub fn host_type(module: &str, name: &str) -> Option<&'static HostTypeSpec> {
    registry().get(module)?.get(name).copied()
}
