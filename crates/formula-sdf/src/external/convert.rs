//! Conversions between spreadsheet values and native values.
//!
//! Both directions are fixed tables keyed by [`NativeType`]. A type missing from a table
//! converts through the boxed-object converter instead of failing.

use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

use super::host::NativeValue;
use crate::signature::{NativeType, Primitive};
use crate::value::{Array, ErrorKind, ObjectValue, Value};

pub type ToNative = fn(&Value) -> Result<NativeValue, ErrorKind>;
pub type FromNative = fn(NativeValue) -> Value;

fn double_array() -> NativeType {
    NativeType::array(Primitive::F64.into(), 1)
}

fn double_matrix() -> NativeType {
    NativeType::array(Primitive::F64.into(), 2)
}

fn to_native_table() -> &'static HashMap<NativeType, ToNative> {
    static TABLE: OnceLock<HashMap<NativeType, ToNative>> = OnceLock::new();
    TABLE.get_or_init(|| {
        let entries: [(Primitive, ToNative); 17] = [
            (Primitive::Bool, to_bool),
            (Primitive::Char, to_char),
            (Primitive::I8, to_i8),
            (Primitive::U8, to_u8),
            (Primitive::I16, to_i16),
            (Primitive::U16, to_u16),
            (Primitive::I32, to_i32),
            (Primitive::U32, to_u32),
            (Primitive::I64, to_i64),
            (Primitive::U64, to_u64),
            (Primitive::F32, to_f32),
            (Primitive::F64, to_f64),
            (Primitive::Decimal, to_f64),
            (Primitive::String, to_string),
            (Primitive::Object, boxed_to_native),
            (Primitive::Void, to_void),
            (Primitive::Value, to_value),
        ];
        let mut map: HashMap<NativeType, ToNative> = entries
            .into_iter()
            .map(|(p, f)| (NativeType::Primitive(p), f))
            .collect();
        map.insert(double_array(), to_double_array);
        map.insert(double_matrix(), to_double_matrix);
        map
    })
}

fn from_native_table() -> &'static HashMap<NativeType, FromNative> {
    static TABLE: OnceLock<HashMap<NativeType, FromNative>> = OnceLock::new();
    TABLE.get_or_init(|| {
        let mut map: HashMap<NativeType, FromNative> = HashMap::new();
        map.insert(Primitive::Bool.into(), from_scalar);
        map.insert(Primitive::Char.into(), from_scalar);
        for p in [
            Primitive::I8,
            Primitive::U8,
            Primitive::I16,
            Primitive::U16,
            Primitive::I32,
            Primitive::U32,
            Primitive::I64,
            Primitive::U64,
            Primitive::F32,
            Primitive::F64,
            Primitive::Decimal,
        ] {
            map.insert(p.into(), from_number);
        }
        map.insert(Primitive::String.into(), from_scalar);
        map.insert(Primitive::Object.into(), boxed_from_native);
        map.insert(Primitive::Void.into(), from_void);
        map.insert(Primitive::Value.into(), from_scalar);
        map.insert(double_array(), from_array);
        map.insert(double_matrix(), from_array);
        map
    })
}

/// Converter from a spreadsheet value to `ty`.
pub fn to_native(ty: &NativeType) -> ToNative {
    match to_native_table().get(ty) {
        Some(f) => *f,
        None => {
            log::trace!("no argument converter for {ty}, boxing");
            boxed_to_native
        }
    }
}

/// Converter from a native `ty` back to a spreadsheet value.
pub fn from_native(ty: &NativeType) -> FromNative {
    match from_native_table().get(ty) {
        Some(f) => *f,
        None => {
            log::trace!("no result converter for {ty}, boxing");
            boxed_from_native
        }
    }
}

fn number(value: &Value) -> Result<f64, ErrorKind> {
    match value {
        Value::Error(e) => Err(*e),
        Value::Text(s) => s.trim().parse().map_err(|_| ErrorKind::Value),
        v => v.as_number().ok_or(ErrorKind::Value),
    }
}

fn integer(value: &Value, min: f64, max: f64) -> Result<f64, ErrorKind> {
    let n = number(value)?.trunc();
    if !n.is_finite() || n < min || n > max {
        return Err(ErrorKind::Num);
    }
    Ok(n)
}

fn to_i8(v: &Value) -> Result<NativeValue, ErrorKind> {
    Ok(NativeValue::Int(integer(v, i8::MIN.into(), i8::MAX.into())? as i64))
}

fn to_u8(v: &Value) -> Result<NativeValue, ErrorKind> {
    Ok(NativeValue::UInt(integer(v, 0.0, u8::MAX.into())? as u64))
}

fn to_i16(v: &Value) -> Result<NativeValue, ErrorKind> {
    Ok(NativeValue::Int(integer(v, i16::MIN.into(), i16::MAX.into())? as i64))
}

fn to_u16(v: &Value) -> Result<NativeValue, ErrorKind> {
    Ok(NativeValue::UInt(integer(v, 0.0, u16::MAX.into())? as u64))
}

fn to_i32(v: &Value) -> Result<NativeValue, ErrorKind> {
    Ok(NativeValue::Int(integer(v, i32::MIN.into(), i32::MAX.into())? as i64))
}

fn to_u32(v: &Value) -> Result<NativeValue, ErrorKind> {
    Ok(NativeValue::UInt(integer(v, 0.0, u32::MAX.into())? as u64))
}

fn to_i64(v: &Value) -> Result<NativeValue, ErrorKind> {
    Ok(NativeValue::Int(integer(v, i64::MIN as f64, i64::MAX as f64)? as i64))
}

fn to_u64(v: &Value) -> Result<NativeValue, ErrorKind> {
    Ok(NativeValue::UInt(integer(v, 0.0, u64::MAX as f64)? as u64))
}

fn to_f32(v: &Value) -> Result<NativeValue, ErrorKind> {
    Ok(NativeValue::Float(f64::from(number(v)? as f32)))
}

fn to_f64(v: &Value) -> Result<NativeValue, ErrorKind> {
    Ok(NativeValue::Float(number(v)?))
}

fn to_bool(v: &Value) -> Result<NativeValue, ErrorKind> {
    match v {
        Value::Error(e) => Err(*e),
        Value::Text(s) if s.eq_ignore_ascii_case("TRUE") => Ok(NativeValue::Bool(true)),
        Value::Text(s) if s.eq_ignore_ascii_case("FALSE") => Ok(NativeValue::Bool(false)),
        v => v.as_bool().map(NativeValue::Bool).ok_or(ErrorKind::Value),
    }
}

fn to_char(v: &Value) -> Result<NativeValue, ErrorKind> {
    match v {
        Value::Error(e) => Err(*e),
        Value::Text(s) => {
            let mut chars = s.chars();
            match (chars.next(), chars.next()) {
                (Some(c), None) => Ok(NativeValue::Char(c)),
                _ => Err(ErrorKind::Value),
            }
        }
        _ => Err(ErrorKind::Value),
    }
}

fn to_string(v: &Value) -> Result<NativeValue, ErrorKind> {
    match v {
        Value::Error(e) => Err(*e),
        Value::Array(_) | Value::Function(_) | Value::Object(_) => Err(ErrorKind::Value),
        v => Ok(NativeValue::Str(v.to_string())),
    }
}

fn to_void(_: &Value) -> Result<NativeValue, ErrorKind> {
    Ok(NativeValue::Void)
}

fn to_value(v: &Value) -> Result<NativeValue, ErrorKind> {
    Ok(NativeValue::Value(v.clone()))
}

fn to_double_array(v: &Value) -> Result<NativeValue, ErrorKind> {
    match v {
        Value::Array(arr) if arr.is_vector() => arr
            .values
            .iter()
            .map(to_f64)
            .collect::<Result<_, _>>()
            .map(NativeValue::Array),
        Value::Array(_) => Err(ErrorKind::Value),
        scalar => Ok(NativeValue::Array(vec![to_f64(scalar)?])),
    }
}

fn to_double_matrix(v: &Value) -> Result<NativeValue, ErrorKind> {
    match v {
        Value::Array(arr) => Ok(NativeValue::Matrix {
            rows: arr.rows,
            cols: arr.cols,
            values: arr.values.iter().map(to_f64).collect::<Result<_, _>>()?,
        }),
        scalar => Ok(NativeValue::Matrix {
            rows: 1,
            cols: 1,
            values: vec![to_f64(scalar)?],
        }),
    }
}

fn boxed_to_native(v: &Value) -> Result<NativeValue, ErrorKind> {
    match v {
        Value::Object(obj) => Ok(NativeValue::Object(obj.clone())),
        Value::Error(e) => Err(*e),
        other => Ok(NativeValue::Object(ObjectValue::new(other.clone()))),
    }
}

fn boxed_from_native(n: NativeValue) -> Value {
    match n {
        NativeValue::Object(obj) => match obj.downcast_ref::<Value>() {
            Some(v) => v.clone(),
            None => Value::Object(obj),
        },
        other => from_scalar(other),
    }
}

fn from_number(n: NativeValue) -> Value {
    match n.as_f64() {
        Some(f) if f.is_finite() => Value::Number(f),
        Some(_) => Value::Error(ErrorKind::Num),
        None => from_scalar(n),
    }
}

fn from_void(_: NativeValue) -> Value {
    Value::Blank
}

fn from_array(n: NativeValue) -> Value {
    let array = match n {
        NativeValue::Array(values) => Some(Array::row(values.into_iter().map(from_scalar).collect())),
        NativeValue::Matrix { rows, cols, values } => {
            Array::new(rows, cols, values.into_iter().map(from_scalar).collect())
        }
        other => return from_scalar(other),
    };
    match array {
        Some(array) => Value::Array(Arc::new(array)),
        None => Value::Error(ErrorKind::Value),
    }
}

/// Shape-directed conversion used when the declared type says nothing more specific.
fn from_scalar(n: NativeValue) -> Value {
    match n {
        NativeValue::Void => Value::Blank,
        NativeValue::Bool(b) => Value::Bool(b),
        NativeValue::Char(c) => Value::Text(c.to_string()),
        NativeValue::Int(_) | NativeValue::UInt(_) | NativeValue::Float(_) => from_number(n),
        NativeValue::Str(s) => Value::Text(s),
        NativeValue::Array(_) | NativeValue::Matrix { .. } => from_array(n),
        NativeValue::Value(v) => v,
        NativeValue::Object(obj) => boxed_from_native(NativeValue::Object(obj)),
    }
}
