#![forbid(unsafe_code)]
#![deny(unreachable_patterns)]

//! Sheet-defined functions: a catalog that compiles a named output cell plus an ordered
//! list of input cells into a callable, a cache of partially applied (specialized)
//! functions, and a binder for external host functions described by compact type
//! signatures.
//!
//! The catalog does not evaluate formulas itself. It drives the collaborators in
//! [`backend`]: a cell accessor, a dependency graph builder, a code generator and the
//! general-purpose function namespace. [`sheet`], [`graph`], [`interp`] and [`namespace`]
//! provide in-memory implementations of those.
//!
//! ```
//! use std::sync::Arc;
//! use formula_sdf::{
//!     Backend, BinaryOp, CellId, Expr, FunctionCatalog, FunctionTable, Interpreter,
//!     SheetGraphBuilder, Value, Workbook,
//! };
//!
//! let namespace = Arc::new(FunctionTable::with_builtins());
//! let book = Arc::new(Workbook::new(namespace.clone()));
//! let a = |s: &str| CellId::from_a1(0, s).unwrap();
//! book.set_formula(a("A1"), Expr::binary(BinaryOp::Mul, Expr::cell(a("A2")), Expr::number(2.0)));
//!
//! let catalog = FunctionCatalog::new(Backend {
//!     cells: book,
//!     graphs: Arc::new(SheetGraphBuilder),
//!     codegen: Arc::new(Interpreter),
//!     namespace,
//! });
//! let double = catalog.create("DOUBLE", a("A1"), &[a("A2")]).unwrap();
//! assert_eq!(double.apply(&[Value::Number(21.0)]), Value::Number(42.0));
//! ```

pub mod address;
pub mod backend;
pub mod catalog;
pub mod dispatch;
pub mod external;
pub mod graph;
pub mod interp;
pub mod namespace;
pub mod settings;
pub mod sheet;
pub mod signature;
pub mod value;

/// Largest number of arguments a sheet-defined function accepts.
pub const MAX_ARITY: usize = 9;

pub use address::{AddressParseError, CellAddr, CellId, SheetId};
pub use backend::{
    Backend, CatalogObserver, CellGraph, CellSource, CodeGenerator, CompileError,
    DependencyGraphBuilder, FunctionNamespace, NamespaceEntry, SdfProgram,
};
pub use catalog::{CatalogError, FunctionCatalog, Origin, Phase, SdfInfo};
pub use dispatch::{Applier, Arity, Callable};
pub use external::{BindError, ExternalFunction, ExternalFunctions};
pub use graph::{PrecedentGraph, SheetGraphBuilder};
pub use interp::{CellProgram, Interpreter};
pub use namespace::{register_function_value_builtins, FunctionTable};
pub use settings::{BinderSettings, CatalogSettings};
pub use sheet::{BinaryOp, CellContent, Expr, UnaryOp, Workbook};
pub use signature::{parse_signature, FunctionType, NativeType, Primitive, SignatureError};
pub use value::{Array, ErrorKind, FunctionValue, ObjectValue, Value};
