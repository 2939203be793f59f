//! Minimal in-memory workbook used as the cell accessor for function bodies.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::address::CellId;
use crate::backend::{CellSource, FunctionNamespace};
use crate::value::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Plus,
    Neg,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Pow,
    Concat,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

/// Formula tree stored in a cell.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Const(Value),
    Cell(CellId),
    Unary(UnaryOp, Box<Expr>),
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
    If(Box<Expr>, Box<Expr>, Box<Expr>),
    Call(String, Vec<Expr>),
}

impl Expr {
    pub fn number(n: f64) -> Self {
        Expr::Const(Value::Number(n))
    }

    pub fn cell(cell: CellId) -> Self {
        Expr::Cell(cell)
    }

    pub fn unary(op: UnaryOp, operand: Expr) -> Self {
        Expr::Unary(op, Box::new(operand))
    }

    pub fn binary(op: BinaryOp, left: Expr, right: Expr) -> Self {
        Expr::Binary(op, Box::new(left), Box::new(right))
    }

    pub fn if_(cond: Expr, then: Expr, otherwise: Expr) -> Self {
        Expr::If(Box::new(cond), Box::new(then), Box::new(otherwise))
    }

    pub fn call(name: &str, args: Vec<Expr>) -> Self {
        Expr::Call(name.to_string(), args)
    }

    /// Visits every cell reference.
    pub fn for_each_cell(&self, f: &mut impl FnMut(CellId)) {
        match self {
            Expr::Const(_) => {}
            Expr::Cell(cell) => f(*cell),
            Expr::Unary(_, operand) => operand.for_each_cell(f),
            Expr::Binary(_, left, right) => {
                left.for_each_cell(f);
                right.for_each_cell(f);
            }
            Expr::If(cond, then, otherwise) => {
                cond.for_each_cell(f);
                then.for_each_cell(f);
                otherwise.for_each_cell(f);
            }
            Expr::Call(_, args) => args.iter().for_each(|arg| arg.for_each_cell(f)),
        }
    }

    /// Visits every called function name.
    pub fn for_each_call(&self, f: &mut impl FnMut(&str)) {
        match self {
            Expr::Const(_) | Expr::Cell(_) => {}
            Expr::Unary(_, operand) => operand.for_each_call(f),
            Expr::Binary(_, left, right) => {
                left.for_each_call(f);
                right.for_each_call(f);
            }
            Expr::If(cond, then, otherwise) => {
                cond.for_each_call(f);
                then.for_each_call(f);
                otherwise.for_each_call(f);
            }
            Expr::Call(name, args) => {
                f(name);
                args.iter().for_each(|arg| arg.for_each_call(f));
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum CellContent {
    Constant(Value),
    Formula(Arc<Expr>),
}

/// Cell store. A formula cell is volatile iff it calls a function the namespace marks
/// volatile.
pub struct Workbook {
    cells: RwLock<HashMap<CellId, CellContent>>,
    namespace: Arc<dyn FunctionNamespace>,
}

impl Workbook {
    pub fn new(namespace: Arc<dyn FunctionNamespace>) -> Self {
        Self {
            cells: RwLock::new(HashMap::new()),
            namespace,
        }
    }

    pub fn set_value(&self, cell: CellId, value: impl Into<Value>) {
        self.set(cell, CellContent::Constant(value.into()));
    }

    pub fn set_formula(&self, cell: CellId, expr: Expr) {
        self.set(cell, CellContent::Formula(Arc::new(expr)));
    }

    pub fn clear(&self, cell: CellId) {
        match self.cells.write() {
            Ok(mut cells) => cells.remove(&cell),
            Err(poisoned) => poisoned.into_inner().remove(&cell),
        };
    }

    fn set(&self, cell: CellId, content: CellContent) {
        match self.cells.write() {
            Ok(mut cells) => cells.insert(cell, content),
            Err(poisoned) => poisoned.into_inner().insert(cell, content),
        };
    }
}

impl CellSource for Workbook {
    fn cell(&self, cell: CellId) -> Option<CellContent> {
        match self.cells.read() {
            Ok(cells) => cells.get(&cell).cloned(),
            Err(poisoned) => poisoned.into_inner().get(&cell).cloned(),
        }
    }

    fn is_volatile(&self, cell: CellId) -> bool {
        let Some(CellContent::Formula(expr)) = self.cell(cell) else {
            return false;
        };
        let mut volatile = false;
        expr.for_each_call(&mut |name| {
            if !volatile {
                volatile = self
                    .namespace
                    .get(name)
                    .is_some_and(|entry| entry.is_volatile);
            }
        });
        volatile
    }
}
