//! Collaborator contracts consumed by the [`FunctionCatalog`].
//!
//! The catalog never looks inside a function body. Ordering cells, lowering them to an
//! executable and partial evaluation all happen behind these traits; the crate ships
//! reference implementations in [`crate::sheet`], [`crate::graph`], [`crate::interp`] and
//! [`crate::namespace`].

use std::fmt;
use std::sync::Arc;

use thiserror::Error;

use crate::address::CellId;
use crate::catalog::{FunctionCatalog, SdfInfo};
use crate::dispatch::Applier;
use crate::sheet::CellContent;
use crate::value::{FunctionValue, Value};

#[derive(Debug, Clone, Error, PartialEq)]
pub enum CompileError {
    #[error("unknown function {0}")]
    UnknownFunction(String),
    #[error("{}", format_cycle(.0))]
    Cycle(Vec<CellId>),
    #[error("function accepts at most {max} arguments, got {got}")]
    InvalidArity { got: usize, max: usize },
    #[error("{name} expects {expected} arguments, call site passes {got}")]
    CallArity {
        name: String,
        expected: usize,
        got: usize,
    },
    #[error("{0}")]
    Unsupported(String),
}

fn format_cycle(path: &[CellId]) -> String {
    let mut out = String::from("circular reference: ");
    for (idx, cell) in path.iter().enumerate() {
        if idx > 0 {
            out.push_str(" -> ");
        }
        out.push_str(&cell.to_string());
    }
    out
}

/// Address -> cell content, plus the per-cell volatility predicate.
pub trait CellSource: Send + Sync {
    fn cell(&self, cell: CellId) -> Option<CellContent>;
    fn is_volatile(&self, cell: CellId) -> bool;
}

/// Result of a dependency-graph build for one function body.
pub trait CellGraph {
    /// Cells needed by the output in evaluation order (precedents first, output last).
    /// Constant cells and declared inputs are excluded.
    fn precedent_order(&self) -> Vec<CellId>;

    /// Every non-input cell whose content the body depends on: the formula cells of
    /// [`precedent_order`](Self::precedent_order) followed by the constant and blank
    /// cells they read.
    fn referenced_cells(&self) -> Vec<CellId> {
        self.precedent_order()
    }
}

pub trait DependencyGraphBuilder: Send + Sync {
    fn build(
        &self,
        output: CellId,
        inputs: &[CellId],
        cells: &dyn CellSource,
    ) -> Result<Box<dyn CellGraph>, CompileError>;
}

/// Intermediate representation of a compiled function body.
///
/// Kept on the record so residual functions can be specialized again.
pub trait SdfProgram: Send + Sync + fmt::Debug {
    /// Input cells that stay parameters when `value` is applied to this program.
    fn residual_inputs(&self, value: &FunctionValue) -> Vec<CellId>;

    /// Specializes this program to `args` (one per declared input; `#N/A` = unbound).
    fn partial_evaluate(
        &self,
        catalog: &Arc<FunctionCatalog>,
        args: &[Value],
        residual_inputs: &[CellId],
    ) -> Result<Arc<dyn SdfProgram>, CompileError>;

    fn compile_to_callable(
        &self,
        catalog: &Arc<FunctionCatalog>,
        sdf: &Arc<SdfInfo>,
    ) -> Result<Applier, CompileError>;
}

pub trait CodeGenerator: Send + Sync {
    /// Lowers the ordered cell list of `sdf` into a program.
    ///
    /// `sdf` is already published in the catalog, so the body may refer to it by name.
    fn generate(
        &self,
        catalog: &Arc<FunctionCatalog>,
        sdf: &Arc<SdfInfo>,
        order: &[CellId],
        cells: &dyn CellSource,
    ) -> Result<Arc<dyn SdfProgram>, CompileError>;
}

/// A function registered in the general-purpose namespace.
#[derive(Clone)]
pub struct NamespaceEntry {
    pub applier: Applier,
    pub is_volatile: bool,
}

impl fmt::Debug for NamespaceEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NamespaceEntry")
            .field("is_volatile", &self.is_volatile)
            .finish_non_exhaustive()
    }
}

/// The general-purpose function namespace that plain (non sheet-defined) functions live in.
pub trait FunctionNamespace: Send + Sync {
    fn get(&self, name: &str) -> Option<NamespaceEntry>;
    fn remove(&self, name: &str) -> bool;
    fn register(&self, name: &str, applier: Applier, is_volatile: bool);
    /// Replaces the applier of an existing entry. Returns `false` if `name` is unknown.
    fn update_applier(&self, name: &str, applier: Applier, is_volatile: bool) -> bool;
}

/// Receives lifecycle notifications (e.g. a function list in the UI).
pub trait CatalogObserver: Send + Sync {
    fn function_created(&self, name: &str);
    fn function_deleted(&self, _name: &str) {}
}

/// The collaborators a catalog is wired to.
#[derive(Clone)]
pub struct Backend {
    pub cells: Arc<dyn CellSource>,
    pub graphs: Arc<dyn DependencyGraphBuilder>,
    pub codegen: Arc<dyn CodeGenerator>,
    pub namespace: Arc<dyn FunctionNamespace>,
}
