mod common;

use std::sync::Arc;

use common::{cell, cells, refer, Fixture};
use formula_sdf::external::{
    HostError, HostMember, HostTypeSpec, MemberKind, NativeValue, StringBuilder,
};
use formula_sdf::{
    Array, BindError, BinderSettings, ErrorKind, Expr, ExternalFunctions, FunctionNamespace,
    NativeType, Primitive, SignatureError, Value,
};
use pretty_assertions::assert_eq;

fn n(v: f64) -> Value {
    Value::Number(v)
}

fn text(s: &str) -> Value {
    Value::Text(s.to_string())
}

#[test]
fn binds_a_static_method() {
    let binder = ExternalFunctions::default();
    let max = binder.bind("System.Math.Max$(DD)D").unwrap();

    assert!(max.is_static());
    assert_eq!(max.arity(), 2);
    assert_eq!(max.type_name(), "System.Math");
    assert_eq!(max.member_name(), "Max");
    assert_eq!(
        max.signature().args,
        vec![
            NativeType::Primitive(Primitive::F64),
            NativeType::Primitive(Primitive::F64)
        ]
    );
    assert_eq!(max.call(&[n(3.0), n(7.0)]), n(7.0));
    assert_eq!(max.call(&[text(" 9 "), n(7.0)]), n(9.0));
    assert_eq!(
        max.call(&[n(3.0), n(7.0), n(1.0)]),
        Value::Error(ErrorKind::ArgCount)
    );
}

#[test]
fn overloads_are_picked_by_signature() {
    let binder = ExternalFunctions::default();
    let wide = binder.bind("System.Math.Max$(JJ)J").unwrap();
    assert_eq!(wide.call(&[n(-4.9), n(-5.0)]), n(-4.0));
}

#[test]
fn bindings_are_cached_by_text() {
    let binder = ExternalFunctions::default();
    let first = binder.bind("System.Math.Abs$(D)D").unwrap();
    let second = binder.bind("System.Math.Abs$(D)D").unwrap();
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(binder.len(), 1);

    assert!(binder.bind("System.Math.Abs$(DD)D").is_err());
    assert_eq!(binder.len(), 1);

    binder.clear();
    assert!(binder.is_empty());
    let third = binder.bind("System.Math.Abs$(D)D").unwrap();
    assert!(!Arc::ptr_eq(&first, &third));
}

#[test]
fn instance_methods_take_the_receiver_first() {
    let binder = ExternalFunctions::default();
    let upper = binder.bind("System.String.ToUpper()T").unwrap();
    assert!(!upper.is_static());
    assert_eq!(upper.arity(), 1);
    assert_eq!(upper.call(&[text("abc")]), text("ABC"));

    let substring = binder.bind("System.String.Substring(II)T").unwrap();
    assert_eq!(substring.arity(), 3);
    assert_eq!(substring.call(&[text("hello"), n(1.0), n(3.0)]), text("ell"));

    let index_of = binder.bind("System.String.IndexOf(T)I").unwrap();
    assert_eq!(index_of.call(&[text("héllo"), text("l")]), n(2.0));
    assert_eq!(index_of.call(&[text("hello"), text("z")]), n(-1.0));

    let contains = binder.bind("System.String.Contains(T)Z").unwrap();
    assert_eq!(contains.call(&[text("hello"), text("ell")]), Value::Bool(true));
}

#[test]
fn constructors_produce_object_handles() {
    let binder = ExternalFunctions::default();
    let new = binder
        .bind("System.Text.StringBuilder.new$(T)LSystem.Text.StringBuilder;")
        .unwrap();
    let append = binder
        .bind("System.Text.StringBuilder.Append(T)LSystem.Text.StringBuilder;")
        .unwrap();
    let to_string = binder.bind("System.Text.StringBuilder.ToString()T").unwrap();

    let sb = new.call(&[text("ab")]);
    let Value::Object(ref handle) = sb else {
        panic!("expected an object, got {sb:?}");
    };
    assert_eq!(append.call(&[sb.clone(), text("cd")]), sb);
    assert_eq!(to_string.call(&[sb.clone()]), text("abcd"));
    assert_eq!(
        handle.downcast_ref::<StringBuilder>().map(StringBuilder::text),
        Some("abcd".to_string())
    );

    let empty = binder
        .bind("System.Text.StringBuilder.new$()LSystem.Text.StringBuilder;")
        .unwrap();
    let blank = empty.call(&[]);
    assert_eq!(to_string.call(&[blank]), text(""));
    assert_eq!(to_string.call(&[n(1.0)]), Value::Error(ErrorKind::Value));
}

#[test]
fn array_arguments() {
    let binder = ExternalFunctions::default();
    let sum = binder.bind("System.Array.Sum$([D)D").unwrap();
    let total = binder.bind("System.Array.Total$({D)D").unwrap();
    let length = binder.bind("System.Array.Length$([D)I").unwrap();

    let row = Value::Array(Arc::new(Array::row(vec![n(1.0), n(2.0), n(3.5)])));
    let grid = Value::Array(Arc::new(
        Array::new(2, 2, vec![n(1.0), n(2.0), n(3.0), n(4.0)]).unwrap(),
    ));

    assert_eq!(sum.call(&[row.clone()]), n(6.5));
    assert_eq!(length.call(&[row]), n(3.0));
    assert_eq!(sum.call(&[n(4.0)]), n(4.0));
    assert_eq!(sum.call(&[grid.clone()]), Value::Error(ErrorKind::Value));
    assert_eq!(total.call(&[grid]), n(10.0));
}

#[test]
fn resolution_errors() {
    let binder = ExternalFunctions::default();
    assert_eq!(
        binder.bind("Nope.Type.Foo$(D)D").unwrap_err(),
        BindError::UnknownType("Nope.Type".to_string())
    );
    assert!(matches!(
        binder.bind("System.Math.Max$(DDD)D").unwrap_err(),
        BindError::NoSuchMember { ref member, kind: "static", .. } if member == "Max"
    ));
    assert!(matches!(
        binder.bind("System.String.ToUpper$()T").unwrap_err(),
        BindError::NoSuchMember { kind: "static", .. }
    ));
    assert!(matches!(
        binder.bind("System.Math.new$()O").unwrap_err(),
        BindError::NoSuchMember { kind: "constructor", .. }
    ));
    assert_eq!(
        binder.bind("System.Math.Max$(DQ)D").unwrap_err(),
        BindError::Signature(SignatureError {
            message: "illegal character 'Q'".to_string(),
            position: 2,
        })
    );
    assert!(matches!(
        binder.bind("System.Math.Max$D").unwrap_err(),
        BindError::Malformed { .. }
    ));
    assert!(matches!(
        binder.bind("System.Math.Abs$(D)D)").unwrap_err(),
        BindError::Signature(_)
    ));
    assert!(binder.is_empty());
}

#[test]
fn host_and_conversion_failures_become_error_values() {
    let binder = ExternalFunctions::default();
    let sqrt = binder.bind("System.Math.Sqrt$(D)D").unwrap();
    assert_eq!(sqrt.call(&[n(-1.0)]), Value::Error(ErrorKind::Value));
    assert_eq!(sqrt.call(&[n(16.0)]), n(4.0));

    let max = binder.bind("System.Math.Max$(DD)D").unwrap();
    assert_eq!(max.call(&[text("abc"), n(1.0)]), Value::Error(ErrorKind::Value));
    assert_eq!(
        max.call(&[Value::Error(ErrorKind::Div0), n(1.0)]),
        Value::Error(ErrorKind::Div0)
    );

    let round = binder.bind("System.Math.Round$(DI)D").unwrap();
    assert_eq!(round.call(&[n(2.346), n(2.0)]), n(2.35));
    assert_eq!(round.call(&[n(1.0), n(3e9)]), Value::Error(ErrorKind::Num));
    assert_eq!(round.call(&[n(1.0), n(40.0)]), Value::Error(ErrorKind::Value));

    let substring = binder.bind("System.String.Substring(II)T").unwrap();
    assert_eq!(
        substring.call(&[text("abc"), n(2.0), n(5.0)]),
        Value::Error(ErrorKind::Value)
    );
}

fn always_minus_one(_: &[NativeValue]) -> Result<NativeValue, HostError> {
    Ok(NativeValue::Float(-1.0))
}

inventory::submit! {
    HostTypeSpec {
        module: "custom",
        name: "System.Math",
        receiver: "O",
        members: &[HostMember {
            name: "Max",
            kind: MemberKind::Static,
            signature: "(DD)D",
            invoke: always_minus_one,
        }],
    }
}

#[test]
fn module_search_order_picks_the_first_match() {
    let shadowed = ExternalFunctions::new(BinderSettings {
        module_search_order: vec!["custom".to_string(), "system".to_string()],
    });
    let max = shadowed.bind("System.Math.Max$(DD)D").unwrap();
    assert_eq!(max.call(&[n(1.0), n(2.0)]), n(-1.0));
    assert!(matches!(
        shadowed.bind("System.Math.Abs$(D)D").unwrap_err(),
        BindError::NoSuchMember { .. }
    ));

    let core_only = ExternalFunctions::new(BinderSettings {
        module_search_order: vec!["core".to_string()],
    });
    assert!(matches!(
        core_only.bind("System.Math.Max$(DD)D").unwrap_err(),
        BindError::UnknownType(_)
    ));

    let default = ExternalFunctions::default();
    let max = default.bind("System.Math.Max$(DD)D").unwrap();
    assert_eq!(max.call(&[n(1.0), n(2.0)]), n(2.0));
}

#[test]
fn bound_functions_are_callable_from_sheet_functions() {
    let fx = Fixture::new();
    let binder = ExternalFunctions::default();
    let max = binder.bind("System.Math.Max$(DD)D").unwrap();
    fx.namespace.register("MAXOF", max.applier(), false);

    fx.formula(
        "B1",
        Expr::call("MAXOF", vec![refer("B2"), Expr::number(10.0)]),
    );
    let at_least_ten = fx
        .catalog
        .create("ATLEASTTEN", cell("B1"), &cells(&["B2"]))
        .unwrap();
    assert_eq!(at_least_ten.apply(&[n(3.0)]), n(10.0));
    assert_eq!(at_least_ten.apply(&[n(12.0)]), n(12.0));
    assert_eq!(
        fx.namespace.call("MAXOF", &[n(1.0)]),
        Value::Error(ErrorKind::ArgCount)
    );
}
