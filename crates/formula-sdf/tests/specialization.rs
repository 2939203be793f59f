mod common;

use std::sync::{Arc, Mutex};
use std::thread;

use common::{cell, cells, refer, Fixture};
use formula_sdf::{
    Applier, Backend, BinaryOp, CatalogError, CellId, CellSource, CodeGenerator, CompileError,
    ErrorKind, Expr, FunctionCatalog, FunctionTable, FunctionValue, Phase, SdfInfo, SdfProgram,
    SheetGraphBuilder, Value, Workbook,
};
use pretty_assertions::assert_eq;

fn n(v: f64) -> Value {
    Value::Number(v)
}

fn unbound() -> Value {
    Value::Error(ErrorKind::NA)
}

/// `F(x, y) = x * 10 + y` at A1 with inputs A2, A3.
fn fixture_with_f() -> (Fixture, Arc<SdfInfo>) {
    let fx = Fixture::new();
    fx.formula(
        "A1",
        Expr::binary(
            BinaryOp::Add,
            Expr::binary(BinaryOp::Mul, refer("A2"), Expr::number(10.0)),
            refer("A3"),
        ),
    );
    let f = fx.catalog.create("F", cell("A1"), &cells(&["A2", "A3"])).unwrap();
    (fx, f)
}

#[test]
fn specialization_is_memoized() {
    let (fx, f) = fixture_with_f();
    let value = FunctionValue::new(f.clone(), vec![n(5.0), unbound()]).unwrap();

    let first = fx.catalog.specialize(&value).unwrap();
    let again = fx.catalog.specialize(&value).unwrap();
    let equal = FunctionValue::new(f.clone(), vec![n(5.0), unbound()]).unwrap();
    let third = fx.catalog.specialize(&equal).unwrap();

    assert!(Arc::ptr_eq(&first, &again));
    assert!(Arc::ptr_eq(&first, &third));
    assert_eq!(fx.catalog.specialization_count(), 1);

    assert!(first.is_residual());
    assert!(first.name().starts_with("F#"));
    assert!(Arc::ptr_eq(first.base().unwrap(), &f));
    assert_eq!(first.arity().get(), 1);
    assert_eq!(first.inputs(), &cells(&["A3"])[..]);
    assert_eq!(first.apply(&[n(3.0)]), n(53.0));
    assert_eq!(value.apply(&[n(3.0)]), n(53.0));
}

#[test]
fn distinct_partial_applications_get_distinct_residuals() {
    let (fx, f) = fixture_with_f();
    let five = FunctionValue::new(f.clone(), vec![n(5.0), unbound()]).unwrap();
    let six = FunctionValue::new(f.clone(), vec![n(6.0), unbound()]).unwrap();
    let other_slot = FunctionValue::new(f.clone(), vec![unbound(), n(5.0)]).unwrap();

    let a = fx.catalog.specialize(&five).unwrap();
    let b = fx.catalog.specialize(&six).unwrap();
    let c = fx.catalog.specialize(&other_slot).unwrap();

    assert!(!Arc::ptr_eq(&a, &b));
    assert_ne!(a.name(), b.name());
    assert_eq!(b.apply(&[n(1.0)]), n(61.0));
    assert_eq!(c.apply(&[n(1.0)]), n(15.0));
    assert_eq!(fx.catalog.specialization_count(), 3);
}

#[test]
fn fully_bound_value_specializes_to_zero_arity() {
    let (fx, f) = fixture_with_f();
    let value = FunctionValue::new(f, vec![n(2.0), n(3.0)]).unwrap();
    let residual = fx.catalog.specialize(&value).unwrap();
    assert_eq!(residual.arity().get(), 0);
    assert_eq!(residual.apply(&[]), n(23.0));
    assert_eq!(residual.apply(&[n(1.0)]), Value::Error(ErrorKind::ArgCount));
}

#[test]
fn pending_specializations_lists_bound_arguments() {
    let (fx, f) = fixture_with_f();
    let value = FunctionValue::new(f, vec![n(5.0), unbound()]).unwrap();
    fx.catalog.specialize(&value).unwrap();

    let pending = fx.catalog.pending_specializations("f");
    assert_eq!(pending.len(), 1);
    assert_eq!(&pending[0][..], &[n(5.0), unbound()][..]);
    assert!(fx.catalog.pending_specializations("G").is_empty());
}

#[test]
fn concurrent_requests_share_one_residual() {
    let (fx, f) = fixture_with_f();
    let value = FunctionValue::new(f, vec![n(1.0), unbound()]).unwrap();

    let results: Vec<Arc<SdfInfo>> = thread::scope(|scope| {
        let handles: Vec<_> = (0..8)
            .map(|_| scope.spawn(|| fx.catalog.specialize(&value).unwrap()))
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    for residual in &results[1..] {
        assert!(Arc::ptr_eq(&results[0], residual));
    }
    assert_eq!(fx.catalog.specialization_count(), 1);
    assert_eq!(fx.catalog.len(), 2);
}

#[test]
fn residuals_cannot_be_regenerated() {
    let (fx, f) = fixture_with_f();
    let value = FunctionValue::new(f, vec![n(5.0), unbound()]).unwrap();
    let residual = fx.catalog.specialize(&value).unwrap();

    let err = fx.catalog.regenerate(residual.name()).unwrap_err();
    assert!(matches!(err, CatalogError::ResidualRegeneration(ref name) if name == residual.name()));
    assert!(fx.catalog.regenerate_all().is_empty());
    assert_eq!(residual.apply(&[n(3.0)]), n(53.0));
}

#[test]
fn residual_of_a_recursive_function_recurses_through_the_base() {
    let fx = Fixture::new();
    // A1 = IF(A2 <= 0, A3, F(A2 - 1, A3 * 2))
    fx.formula(
        "A1",
        Expr::if_(
            Expr::binary(BinaryOp::Le, refer("A2"), Expr::number(0.0)),
            refer("A3"),
            Expr::call(
                "F",
                vec![
                    Expr::binary(BinaryOp::Sub, refer("A2"), Expr::number(1.0)),
                    Expr::binary(BinaryOp::Mul, refer("A3"), Expr::number(2.0)),
                ],
            ),
        ),
    );
    let f = fx.catalog.create("F", cell("A1"), &cells(&["A2", "A3"])).unwrap();
    let value = FunctionValue::new(f, vec![unbound(), n(1.0)]).unwrap();
    let residual = fx.catalog.specialize(&value).unwrap();
    assert_eq!(residual.apply(&[n(3.0)]), n(8.0));
}

#[test]
fn placeholders_cannot_be_specialized() {
    let fx = Fixture::new();
    let f = fx.catalog.register(cell("A1"), &cells(&["A2"]), "F").unwrap();
    let value = FunctionValue::new(f, vec![n(1.0)]).unwrap();
    assert!(matches!(
        fx.catalog.specialize(&value),
        Err(CatalogError::NotCompiled(ref name)) if name == "F"
    ));
    assert_eq!(fx.catalog.specialization_count(), 0);
}

#[test]
fn reset_drops_cached_specializations() {
    let (fx, f) = fixture_with_f();
    let value = FunctionValue::new(f, vec![n(5.0), unbound()]).unwrap();
    let residual = fx.catalog.specialize(&value).unwrap();
    fx.catalog.reset();
    assert_eq!(fx.catalog.specialization_count(), 0);
    assert_eq!(residual.phase(), Phase::Deleted);
}

#[test]
fn function_values_from_the_sheet() {
    let (fx, _) = fixture_with_f();
    let closure = fx
        .namespace
        .call("CLOSURE", &["f".into(), n(5.0), unbound()]);
    let Value::Function(ref value) = closure else {
        panic!("expected a function value, got {closure:?}");
    };
    assert_eq!(value.unbound_count(), 1);
    assert_eq!(fx.namespace.call("APPLY", &[closure.clone(), n(2.0)]), n(52.0));

    let specialized = fx.namespace.call("SPECIALIZE", &[closure.clone()]);
    let Value::Function(ref residual) = specialized else {
        panic!("expected a function value, got {specialized:?}");
    };
    assert!(residual.sdf().is_residual());
    assert_eq!(fx.namespace.call("APPLY", &[specialized.clone(), n(2.0)]), n(52.0));
    assert_eq!(fx.catalog.specialization_count(), 1);

    assert_eq!(
        fx.namespace.call("CLOSURE", &["NOPE".into()]),
        Value::Error(ErrorKind::Name)
    );
    assert_eq!(
        fx.namespace.call("CLOSURE", &["F".into(), n(1.0)]),
        Value::Error(ErrorKind::ArgCount)
    );
    assert_eq!(
        fx.namespace.call("APPLY", &[n(1.0)]),
        Value::Error(ErrorKind::Value)
    );
}

/// A program whose partial evaluation asks for its own specialization again.
#[derive(Debug)]
struct Reentrant {
    inputs: Vec<CellId>,
    seen: Arc<Mutex<Option<(Arc<SdfInfo>, Phase)>>>,
    fail: bool,
}

impl SdfProgram for Reentrant {
    fn residual_inputs(&self, value: &FunctionValue) -> Vec<CellId> {
        self.inputs
            .iter()
            .zip(value.args().iter())
            .filter(|(_, arg)| arg.is_unbound())
            .map(|(cell, _)| *cell)
            .collect()
    }

    fn partial_evaluate(
        &self,
        catalog: &Arc<FunctionCatalog>,
        args: &[Value],
        _residual_inputs: &[CellId],
    ) -> Result<Arc<dyn SdfProgram>, CompileError> {
        let base = catalog.lookup("R").unwrap();
        let value = FunctionValue::new(base, args.to_vec()).unwrap();
        let inner = catalog.specialize(&value).unwrap();
        *self.seen.lock().unwrap() = Some((inner.clone(), inner.phase()));
        if self.fail {
            return Err(CompileError::Unsupported("partial evaluation".to_string()));
        }
        Ok(Arc::new(Reentrant {
            inputs: Vec::new(),
            seen: self.seen.clone(),
            fail: false,
        }))
    }

    fn compile_to_callable(
        &self,
        _catalog: &Arc<FunctionCatalog>,
        _sdf: &Arc<SdfInfo>,
    ) -> Result<Applier, CompileError> {
        Ok(Arc::new(|_| Value::Number(1.0)))
    }
}

struct ReentrantCodegen {
    seen: Arc<Mutex<Option<(Arc<SdfInfo>, Phase)>>>,
    fail: bool,
}

impl CodeGenerator for ReentrantCodegen {
    fn generate(
        &self,
        _catalog: &Arc<FunctionCatalog>,
        sdf: &Arc<SdfInfo>,
        _order: &[CellId],
        _cells: &dyn CellSource,
    ) -> Result<Arc<dyn SdfProgram>, CompileError> {
        Ok(Arc::new(Reentrant {
            inputs: sdf.inputs().to_vec(),
            seen: self.seen.clone(),
            fail: self.fail,
        }))
    }
}

type Seen = Arc<Mutex<Option<(Arc<SdfInfo>, Phase)>>>;

/// A catalog holding `R(x) = x` compiled by [`ReentrantCodegen`].
fn reentrant_catalog(fail: bool) -> (Arc<FunctionCatalog>, Arc<SdfInfo>, Seen) {
    let namespace = Arc::new(FunctionTable::new());
    let book = Arc::new(Workbook::new(namespace.clone()));
    book.set_formula(cell("A1"), refer("A2"));
    let seen = Arc::new(Mutex::new(None));
    let catalog = FunctionCatalog::new(Backend {
        cells: book,
        graphs: Arc::new(SheetGraphBuilder),
        codegen: Arc::new(ReentrantCodegen {
            seen: seen.clone(),
            fail,
        }),
        namespace,
    });
    let r = catalog.create("R", cell("A1"), &cells(&["A2"])).unwrap();
    (catalog, r, seen)
}

#[test]
fn reentrant_request_gets_the_in_flight_residual() {
    let (catalog, r, seen) = reentrant_catalog(false);

    let value = FunctionValue::new(r, vec![n(4.0)]).unwrap();
    let outer = catalog.specialize(&value).unwrap();

    let (inner, phase_during_compile) = seen.lock().unwrap().clone().unwrap();
    assert!(Arc::ptr_eq(&outer, &inner));
    assert_eq!(phase_during_compile, Phase::Compiling);
    assert_eq!(outer.phase(), Phase::Ready);
    assert_eq!(catalog.specialization_count(), 1);
    assert_eq!(outer.apply(&[]), n(1.0));
}

#[test]
fn failed_specialization_never_recycles_its_index() {
    let (catalog, r, seen) = reentrant_catalog(true);
    let value = FunctionValue::new(r.clone(), vec![n(4.0)]).unwrap();

    let err = catalog.specialize(&value).unwrap_err();
    assert!(matches!(err, CatalogError::Compile { .. }));
    let (escaped, _) = seen.lock().unwrap().clone().unwrap();
    assert_eq!(escaped.index(), 1);
    assert_eq!(escaped.phase(), Phase::Deleted);
    assert_eq!(catalog.specialization_count(), 0);
    assert!(catalog.lookup(escaped.name()).is_none());
    assert_eq!(catalog.call_index(1, &[]), Value::Error(ErrorKind::Deleted));

    let q = catalog.create("Q", cell("A1"), &cells(&["A2"])).unwrap();
    assert_eq!(q.index(), 2);
    assert_eq!(catalog.call_index(1, &[]), Value::Error(ErrorKind::Deleted));
}

#[test]
fn deleted_residual_is_specialized_afresh() {
    let (fx, f) = fixture_with_f();
    let value = FunctionValue::new(f, vec![n(5.0), unbound()]).unwrap();
    let first = fx.catalog.specialize(&value).unwrap();
    assert!(fx.catalog.delete(first.name()));
    assert_eq!(first.phase(), Phase::Deleted);
    assert_eq!(fx.catalog.specialization_count(), 0);

    let second = fx.catalog.specialize(&value).unwrap();
    assert!(!Arc::ptr_eq(&first, &second));
    assert_eq!(second.phase(), Phase::Ready);
    assert!(second.index() > first.index());
    assert_eq!(second.apply(&[n(3.0)]), n(53.0));
    assert_eq!(fx.catalog.specialization_count(), 1);
}
