#![allow(dead_code)]

use std::sync::Arc;

use formula_sdf::{
    register_function_value_builtins, Backend, CatalogSettings, CellId, Expr, FunctionCatalog,
    FunctionTable, Interpreter, SheetGraphBuilder, Workbook,
};

pub fn cell(a1: &str) -> CellId {
    CellId::from_a1(0, a1).unwrap()
}

pub fn cells(a1s: &[&str]) -> Vec<CellId> {
    a1s.iter().map(|a1| cell(a1)).collect()
}

pub fn refer(a1: &str) -> Expr {
    Expr::cell(cell(a1))
}

/// A workbook, the built-in namespace and a catalog wired to the in-memory collaborators.
pub struct Fixture {
    pub book: Arc<Workbook>,
    pub namespace: Arc<FunctionTable>,
    pub catalog: Arc<FunctionCatalog>,
}

impl Fixture {
    pub fn new() -> Self {
        Self::with_settings(CatalogSettings::default())
    }

    pub fn with_settings(settings: CatalogSettings) -> Self {
        let namespace = Arc::new(FunctionTable::with_builtins());
        let book = Arc::new(Workbook::new(namespace.clone()));
        let catalog = FunctionCatalog::with_settings(
            Backend {
                cells: book.clone(),
                graphs: Arc::new(SheetGraphBuilder),
                codegen: Arc::new(Interpreter),
                namespace: namespace.clone(),
            },
            settings,
        );
        register_function_value_builtins(namespace.as_ref(), &catalog);
        Self {
            book,
            namespace,
            catalog,
        }
    }

    pub fn formula(&self, a1: &str, expr: Expr) {
        self.book.set_formula(cell(a1), expr);
    }
}
