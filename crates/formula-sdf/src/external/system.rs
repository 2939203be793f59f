//! Built-in `system` host module.

use std::sync::Mutex;

use super::host::{HostError, HostMember, HostTypeSpec, MemberKind, NativeValue};
use crate::value::ObjectValue;

const MODULE: &str = "system";

fn f64_arg(args: &[NativeValue], i: usize) -> Result<f64, HostError> {
    args.get(i)
        .and_then(NativeValue::as_f64)
        .ok_or_else(|| HostError::new(format!("argument {i} is not a number")))
}

fn i64_arg(args: &[NativeValue], i: usize) -> Result<i64, HostError> {
    args.get(i)
        .and_then(NativeValue::as_i64)
        .ok_or_else(|| HostError::new(format!("argument {i} is not an integer")))
}

fn str_arg(args: &[NativeValue], i: usize) -> Result<&str, HostError> {
    args.get(i)
        .and_then(NativeValue::as_str)
        .ok_or_else(|| HostError::new(format!("argument {i} is not a string")))
}

fn float(n: f64) -> Result<NativeValue, HostError> {
    Ok(NativeValue::Float(n))
}

inventory::submit! {
    HostTypeSpec {
        module: MODULE,
        name: "System.Math",
        receiver: "O",
        members: &[
            HostMember { name: "Abs", kind: MemberKind::Static, signature: "(D)D", invoke: math_abs },
            HostMember { name: "Max", kind: MemberKind::Static, signature: "(DD)D", invoke: math_max },
            HostMember { name: "Max", kind: MemberKind::Static, signature: "(JJ)J", invoke: math_max_i64 },
            HostMember { name: "Min", kind: MemberKind::Static, signature: "(DD)D", invoke: math_min },
            HostMember { name: "Pow", kind: MemberKind::Static, signature: "(DD)D", invoke: math_pow },
            HostMember { name: "Sqrt", kind: MemberKind::Static, signature: "(D)D", invoke: math_sqrt },
            HostMember { name: "Floor", kind: MemberKind::Static, signature: "(D)D", invoke: math_floor },
            HostMember { name: "Round", kind: MemberKind::Static, signature: "(DI)D", invoke: math_round },
        ],
    }
}

fn math_abs(args: &[NativeValue]) -> Result<NativeValue, HostError> {
    float(f64_arg(args, 0)?.abs())
}

fn math_max(args: &[NativeValue]) -> Result<NativeValue, HostError> {
    float(f64_arg(args, 0)?.max(f64_arg(args, 1)?))
}

fn math_max_i64(args: &[NativeValue]) -> Result<NativeValue, HostError> {
    Ok(NativeValue::Int(i64_arg(args, 0)?.max(i64_arg(args, 1)?)))
}

fn math_min(args: &[NativeValue]) -> Result<NativeValue, HostError> {
    float(f64_arg(args, 0)?.min(f64_arg(args, 1)?))
}

fn math_pow(args: &[NativeValue]) -> Result<NativeValue, HostError> {
    float(f64_arg(args, 0)?.powf(f64_arg(args, 1)?))
}

fn math_sqrt(args: &[NativeValue]) -> Result<NativeValue, HostError> {
    let n = f64_arg(args, 0)?;
    if n < 0.0 {
        return Err(HostError::new("square root of a negative number"));
    }
    float(n.sqrt())
}

fn math_floor(args: &[NativeValue]) -> Result<NativeValue, HostError> {
    float(f64_arg(args, 0)?.floor())
}

fn math_round(args: &[NativeValue]) -> Result<NativeValue, HostError> {
    let n = f64_arg(args, 0)?;
    let digits = i64_arg(args, 1)?;
    if !(0..=15).contains(&digits) {
        return Err(HostError::new(format!("digits out of range: {digits}")));
    }
    let scale = 10f64.powi(digits as i32);
    float((n * scale).round() / scale)
}

inventory::submit! {
    HostTypeSpec {
        module: MODULE,
        name: "System.String",
        receiver: "T",
        members: &[
            HostMember { name: "ToUpper", kind: MemberKind::Instance, signature: "()T", invoke: string_to_upper },
            HostMember { name: "ToLower", kind: MemberKind::Instance, signature: "()T", invoke: string_to_lower },
            HostMember { name: "Trim", kind: MemberKind::Instance, signature: "()T", invoke: string_trim },
            HostMember { name: "Substring", kind: MemberKind::Instance, signature: "(II)T", invoke: string_substring },
            HostMember { name: "IndexOf", kind: MemberKind::Instance, signature: "(T)I", invoke: string_index_of },
            HostMember { name: "Contains", kind: MemberKind::Instance, signature: "(T)Z", invoke: string_contains },
            HostMember { name: "Concat", kind: MemberKind::Static, signature: "(TT)T", invoke: string_concat },
        ],
    }
}

fn string_to_upper(args: &[NativeValue]) -> Result<NativeValue, HostError> {
    Ok(NativeValue::Str(str_arg(args, 0)?.to_uppercase()))
}

fn string_to_lower(args: &[NativeValue]) -> Result<NativeValue, HostError> {
    Ok(NativeValue::Str(str_arg(args, 0)?.to_lowercase()))
}

fn string_trim(args: &[NativeValue]) -> Result<NativeValue, HostError> {
    Ok(NativeValue::Str(str_arg(args, 0)?.trim().to_string()))
}

/// Character-based `Substring(start, length)`.
fn string_substring(args: &[NativeValue]) -> Result<NativeValue, HostError> {
    let s = str_arg(args, 0)?;
    let start = i64_arg(args, 1)?;
    let len = i64_arg(args, 2)?;
    let count = s.chars().count() as i64;
    if start < 0 || len < 0 || start + len > count {
        return Err(HostError::new(format!(
            "substring {start}+{len} out of range for length {count}"
        )));
    }
    Ok(NativeValue::Str(
        s.chars().skip(start as usize).take(len as usize).collect(),
    ))
}

/// Character index of the first match, or -1.
fn string_index_of(args: &[NativeValue]) -> Result<NativeValue, HostError> {
    let s = str_arg(args, 0)?;
    let needle = str_arg(args, 1)?;
    let index = s
        .find(needle)
        .map_or(-1, |byte| s[..byte].chars().count() as i64);
    Ok(NativeValue::Int(index))
}

fn string_contains(args: &[NativeValue]) -> Result<NativeValue, HostError> {
    Ok(NativeValue::Bool(str_arg(args, 0)?.contains(str_arg(args, 1)?)))
}

fn string_concat(args: &[NativeValue]) -> Result<NativeValue, HostError> {
    Ok(NativeValue::Str(format!("{}{}", str_arg(args, 0)?, str_arg(args, 1)?)))
}

/// Mutable text buffer shared through an object handle.
#[derive(Debug, Default)]
pub struct StringBuilder(Mutex<String>);

impl StringBuilder {
    pub fn text(&self) -> String {
        match self.0.lock() {
            Ok(s) => s.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn push(&self, text: &str) {
        match self.0.lock() {
            Ok(mut s) => s.push_str(text),
            Err(poisoned) => poisoned.into_inner().push_str(text),
        }
    }
}

inventory::submit! {
    HostTypeSpec {
        module: MODULE,
        name: "System.Text.StringBuilder",
        receiver: "LSystem.Text.StringBuilder;",
        members: &[
            HostMember {
                name: "new",
                kind: MemberKind::Constructor,
                signature: "()LSystem.Text.StringBuilder;",
                invoke: builder_new,
            },
            HostMember {
                name: "new",
                kind: MemberKind::Constructor,
                signature: "(T)LSystem.Text.StringBuilder;",
                invoke: builder_new,
            },
            HostMember {
                name: "Append",
                kind: MemberKind::Instance,
                signature: "(T)LSystem.Text.StringBuilder;",
                invoke: builder_append,
            },
            HostMember {
                name: "ToString",
                kind: MemberKind::Instance,
                signature: "()T",
                invoke: builder_to_string,
            },
        ],
    }
}

fn builder(args: &[NativeValue]) -> Result<&StringBuilder, HostError> {
    match args.first() {
        Some(NativeValue::Object(obj)) => obj
            .downcast_ref::<StringBuilder>()
            .ok_or_else(|| HostError::new("receiver is not a StringBuilder")),
        _ => Err(HostError::new("receiver is not an object")),
    }
}

fn builder_new(args: &[NativeValue]) -> Result<NativeValue, HostError> {
    let sb = StringBuilder::default();
    if let Some(initial) = args.first() {
        sb.push(initial.as_str().unwrap_or_default());
    }
    Ok(NativeValue::Object(ObjectValue::new(sb)))
}

fn builder_append(args: &[NativeValue]) -> Result<NativeValue, HostError> {
    builder(args)?.push(str_arg(args, 1)?);
    Ok(args[0].clone())
}

fn builder_to_string(args: &[NativeValue]) -> Result<NativeValue, HostError> {
    Ok(NativeValue::Str(builder(args)?.text()))
}

inventory::submit! {
    HostTypeSpec {
        module: MODULE,
        name: "System.Array",
        receiver: "O",
        members: &[
            HostMember { name: "Sum", kind: MemberKind::Static, signature: "([D)D", invoke: array_sum },
            HostMember { name: "Total", kind: MemberKind::Static, signature: "({D)D", invoke: array_total },
            HostMember { name: "Length", kind: MemberKind::Static, signature: "([D)I", invoke: array_length },
        ],
    }
}

fn sum_of(values: &[NativeValue]) -> Result<NativeValue, HostError> {
    let mut total = 0.0;
    for v in values {
        total += v
            .as_f64()
            .ok_or_else(|| HostError::new("array element is not a number"))?;
    }
    float(total)
}

fn array_sum(args: &[NativeValue]) -> Result<NativeValue, HostError> {
    match args.first() {
        Some(NativeValue::Array(values)) => sum_of(values),
        _ => Err(HostError::new("expected a one-dimensional array")),
    }
}

fn array_total(args: &[NativeValue]) -> Result<NativeValue, HostError> {
    match args.first() {
        Some(NativeValue::Matrix { values, .. }) => sum_of(values),
        _ => Err(HostError::new("expected a two-dimensional array")),
    }
}

fn array_length(args: &[NativeValue]) -> Result<NativeValue, HostError> {
    match args.first() {
        Some(NativeValue::Array(values)) => Ok(NativeValue::Int(values.len() as i64)),
        _ => Err(HostError::new("expected a one-dimensional array")),
    }
}
