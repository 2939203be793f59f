//! External function binder.
//!
//! A binding string names a host member and its signature:
//!
//! ```text
//! System.Math.Max$(DD)D        static method
//! System.String.ToUpper()T     instance method, the receiver is argument 0
//! System.Text.StringBuilder.new$(T)LSystem.Text.StringBuilder;   constructor
//! ```
//!
//! Bindings are resolved once and cached by their literal text.

mod convert;
pub mod host;
mod system;

use std::fmt;
use std::sync::{Arc, Mutex, TryLockError};

use dashmap::DashMap;

pub use convert::{from_native, to_native, FromNative, ToNative};
pub use host::{
    host_type, iter_host_types, HostError, HostMember, HostTypeSpec, MemberKind, NativeFn,
    NativeValue,
};
pub use system::StringBuilder;

use crate::dispatch::Applier;
use crate::settings::BinderSettings;
use crate::signature::{parse_function_signature, parse_signature, FunctionType, SignatureError};
use crate::value::{ErrorKind, Value};

/// Marks a static binding when it directly precedes the signature.
pub const STATIC_MARKER: char = '$';
/// Member name of a constructor on a static binding.
pub const CONSTRUCTOR: &str = "new";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BindError {
    #[error("malformed binding '{text}': {reason}")]
    Malformed { text: String, reason: &'static str },
    #[error("unknown type '{0}'")]
    UnknownType(String),
    #[error("{type_name} has no {kind} member {member}{signature}")]
    NoSuchMember {
        type_name: String,
        member: String,
        kind: &'static str,
        signature: String,
    },
    #[error(transparent)]
    Signature(#[from] SignatureError),
}

/// The parts of a binding string.
#[derive(Debug, Clone, PartialEq, Eq)]
struct BindingText<'a> {
    type_name: &'a str,
    member: &'a str,
    is_static: bool,
    signature: &'a str,
}

fn split_binding(text: &str) -> Result<BindingText<'_>, BindError> {
    let malformed = |reason| BindError::Malformed {
        text: text.to_string(),
        reason,
    };
    let open = text.find('(').ok_or_else(|| malformed("missing signature"))?;
    let (target, signature) = text.split_at(open);
    let (target, is_static) = match target.strip_suffix(STATIC_MARKER) {
        Some(rest) => (rest, true),
        None => (target, false),
    };
    if target.contains(STATIC_MARKER) {
        return Err(malformed("static marker must directly precede the signature"));
    }
    let (type_name, member) = target
        .rsplit_once('.')
        .ok_or_else(|| malformed("expected Type.Member"))?;
    if type_name.is_empty() || member.is_empty() {
        return Err(malformed("expected Type.Member"));
    }
    Ok(BindingText {
        type_name,
        member,
        is_static,
        signature,
    })
}

/// A resolved host member with its argument and result converters.
pub struct ExternalFunction {
    text: String,
    type_name: &'static str,
    member: &'static HostMember,
    signature: FunctionType,
    is_static: bool,
    receiver: Option<ToNative>,
    params: Vec<ToNative>,
    result: FromNative,
    buffer: Mutex<Vec<NativeValue>>,
}

impl ExternalFunction {
    fn resolve(
        text: &str,
        binder: &ExternalFunctions,
    ) -> Result<ExternalFunction, BindError> {
        let parts = split_binding(text)?;
        let host = binder
            .find_type(parts.type_name)
            .ok_or_else(|| BindError::UnknownType(parts.type_name.to_string()))?;
        let signature = parse_function_signature(parts.signature)?;

        let kind = match (parts.is_static, parts.member == CONSTRUCTOR) {
            (true, true) => MemberKind::Constructor,
            (true, false) => MemberKind::Static,
            (false, _) => MemberKind::Instance,
        };
        let member = host
            .members_named(parts.member)
            .filter(|m| m.kind == kind)
            .find(|m| declared_signature(m).as_ref() == Some(&signature))
            .ok_or_else(|| BindError::NoSuchMember {
                type_name: host.name.to_string(),
                member: parts.member.to_string(),
                kind: match kind {
                    MemberKind::Static => "static",
                    MemberKind::Instance => "instance",
                    MemberKind::Constructor => "constructor",
                },
                signature: signature.to_string(),
            })?;

        let receiver = match kind {
            MemberKind::Instance => Some(to_native(&parse_signature(host.receiver)?)),
            MemberKind::Static | MemberKind::Constructor => None,
        };
        let params = signature.args.iter().map(to_native).collect();
        let result = from_native(&signature.result);
        Ok(ExternalFunction {
            text: text.to_string(),
            type_name: host.name,
            member,
            is_static: parts.is_static,
            receiver,
            params,
            result,
            buffer: Mutex::new(Vec::with_capacity(signature.args.len() + 1)),
            signature,
        })
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    pub fn member_name(&self) -> &'static str {
        self.member.name
    }

    pub fn signature(&self) -> &FunctionType {
        &self.signature
    }

    pub fn is_static(&self) -> bool {
        self.is_static
    }

    /// Spreadsheet-side argument count; instance bindings take the receiver first.
    pub fn arity(&self) -> usize {
        self.params.len() + usize::from(self.receiver.is_some())
    }

    /// Invokes the member. Argument count mismatches give `#ARGCOUNT!`, conversion
    /// failures their error value, and host failures `#VALUE!`.
    pub fn call(&self, args: &[Value]) -> Value {
        if args.len() != self.arity() {
            return Value::Error(ErrorKind::ArgCount);
        }
        match self.buffer.try_lock() {
            Ok(mut buffer) => self.invoke(&mut buffer, args),
            Err(TryLockError::Poisoned(poisoned)) => self.invoke(&mut poisoned.into_inner(), args),
            Err(TryLockError::WouldBlock) => {
                self.invoke(&mut Vec::with_capacity(args.len()), args)
            }
        }
    }

    fn invoke(&self, buffer: &mut Vec<NativeValue>, args: &[Value]) -> Value {
        buffer.clear();
        let converted = self.convert_args(buffer, args);
        let outcome = match converted {
            Ok(()) => (self.member.invoke)(buffer),
            Err(e) => {
                buffer.clear();
                return Value::Error(e);
            }
        };
        buffer.clear();
        match outcome {
            Ok(native) => (self.result)(native),
            Err(err) => {
                log::debug!("{} failed: {err}", self.text);
                Value::Error(ErrorKind::Value)
            }
        }
    }

    fn convert_args(&self, buffer: &mut Vec<NativeValue>, args: &[Value]) -> Result<(), ErrorKind> {
        let rest = match self.receiver {
            Some(receiver) => {
                buffer.push(receiver(&args[0])?);
                &args[1..]
            }
            None => args,
        };
        for (convert, arg) in self.params.iter().zip(rest) {
            buffer.push(convert(arg)?);
        }
        Ok(())
    }

    /// Adapts the binding to the namespace calling convention.
    pub fn applier(self: &Arc<Self>) -> Applier {
        let this = Arc::clone(self);
        Arc::new(move |args| this.call(args))
    }
}

impl fmt::Debug for ExternalFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExternalFunction")
            .field("text", &self.text)
            .field("type_name", &self.type_name)
            .field("member", &self.member.name)
            .field("is_static", &self.is_static)
            .field("arity", &self.arity())
            .finish()
    }
}

fn declared_signature(member: &HostMember) -> Option<FunctionType> {
    match parse_function_signature(member.signature) {
        Ok(f) => Some(f),
        Err(err) => {
            log::warn!("host member {} has a bad signature: {err}", member.name);
            None
        }
    }
}

/// Binder with a per-string cache of resolved bindings.
#[derive(Debug, Default)]
pub struct ExternalFunctions {
    settings: BinderSettings,
    cache: DashMap<String, Arc<ExternalFunction>>,
}

impl ExternalFunctions {
    pub fn new(settings: BinderSettings) -> Self {
        Self {
            settings,
            cache: DashMap::new(),
        }
    }

    pub fn settings(&self) -> &BinderSettings {
        &self.settings
    }

    /// Resolves `text`, reusing an earlier binding of the same string.
    ///
    /// Failed bindings are not cached.
    pub fn bind(&self, text: &str) -> Result<Arc<ExternalFunction>, BindError> {
        if let Some(hit) = self.cache.get(text) {
            return Ok(Arc::clone(hit.value()));
        }
        let resolved = Arc::new(ExternalFunction::resolve(text, self)?);
        log::debug!(
            "bound {text} to {}.{} (arity {})",
            resolved.type_name,
            resolved.member.name,
            resolved.arity()
        );
        let entry = self.cache.entry(text.to_string()).or_insert(resolved);
        Ok(Arc::clone(entry.value()))
    }

    /// Finds a host type by searching the configured modules in order.
    pub fn find_type(&self, name: &str) -> Option<&'static HostTypeSpec> {
        self.settings
            .module_search_order
            .iter()
            .find_map(|module| host_type(module, name))
    }

    pub fn len(&self) -> usize {
        self.cache.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.is_empty()
    }

    pub fn clear(&self) {
        self.cache.clear();
    }
}
