//! Reference code generator: lowers a function body to a [`CellProgram`] and runs it as a
//! tree-walking interpreter.
//!
//! Calls to sheet-defined functions are resolved to catalog indices when the body is
//! lowered and dispatched through the index table at run time, so a regenerated callee is
//! picked up without recompiling its callers.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Weak};

use smallvec::SmallVec;

use crate::address::CellId;
use crate::backend::{CellSource, CodeGenerator, CompileError, SdfProgram};
use crate::catalog::{normalize_name, FunctionCatalog, SdfInfo};
use crate::dispatch::Applier;
use crate::sheet::{BinaryOp, CellContent, Expr, UnaryOp};
use crate::value::{ErrorKind, FunctionValue, Value};
use crate::MAX_ARITY;

#[derive(Clone)]
enum Node {
    Const(Value),
    /// Argument slot.
    Input(usize),
    /// Result of an earlier step.
    Local(usize),
    Unary(UnaryOp, Box<Node>),
    Binary(BinaryOp, Box<Node>, Box<Node>),
    If(Box<Node>, Box<Node>, Box<Node>),
    CallSdf {
        name: String,
        index: usize,
        args: Vec<Node>,
    },
    CallNamed {
        name: String,
        applier: Applier,
        volatile: bool,
        args: Vec<Node>,
    },
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Node::Const(v) => write!(f, "Const({v:?})"),
            Node::Input(i) => write!(f, "Input({i})"),
            Node::Local(i) => write!(f, "Local({i})"),
            Node::Unary(op, x) => write!(f, "{op:?}({x:?})"),
            Node::Binary(op, l, r) => write!(f, "{op:?}({l:?}, {r:?})"),
            Node::If(c, t, e) => write!(f, "If({c:?}, {t:?}, {e:?})"),
            Node::CallSdf { name, index, args } => write!(f, "{name}@{index}{args:?}"),
            Node::CallNamed { name, args, .. } => write!(f, "{name}{args:?}"),
        }
    }
}

#[derive(Debug, Clone)]
struct Step {
    cell: CellId,
    node: Node,
}

/// A lowered function body: steps evaluated in order, then the output expression.
#[derive(Debug, Clone)]
pub struct CellProgram {
    inputs: Vec<CellId>,
    steps: Vec<Step>,
    output: Node,
}

impl CellProgram {
    pub fn inputs(&self) -> &[CellId] {
        &self.inputs
    }

    /// Cells that still have a step (folded cells are gone after specialization).
    pub fn step_cells(&self) -> Vec<CellId> {
        self.steps.iter().map(|step| step.cell).collect()
    }

    /// True if the output folded to a constant.
    pub fn is_constant(&self) -> bool {
        matches!(self.output, Node::Const(_))
    }

    pub fn run(&self, args: &[Value], catalog: &Weak<FunctionCatalog>) -> Value {
        let mut locals: SmallVec<[Value; 16]> = SmallVec::with_capacity(self.steps.len());
        for step in &self.steps {
            let value = eval(&step.node, args, &locals, catalog);
            locals.push(value);
        }
        eval(&self.output, args, &locals, catalog)
    }
}

impl SdfProgram for CellProgram {
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
        _catalog: &Arc<FunctionCatalog>,
        args: &[Value],
        residual_inputs: &[CellId],
    ) -> Result<Arc<dyn SdfProgram>, CompileError> {
        if args.len() != self.inputs.len() {
            return Err(CompileError::CallArity {
                name: "specialization".to_string(),
                expected: self.inputs.len(),
                got: args.len(),
            });
        }

        let mut input_map = Vec::with_capacity(args.len());
        for (cell, arg) in self.inputs.iter().zip(args) {
            if arg.is_unbound() {
                let slot = residual_inputs
                    .iter()
                    .position(|c| c == cell)
                    .ok_or_else(|| {
                        CompileError::Unsupported(format!(
                            "unbound input {cell} is missing from the residual inputs"
                        ))
                    })?;
                input_map.push(Node::Input(slot));
            } else {
                input_map.push(Node::Const(arg.clone()));
            }
        }

        let mut local_map = Vec::with_capacity(self.steps.len());
        let mut steps = Vec::new();
        for step in &self.steps {
            match specialize_node(&step.node, &input_map, &local_map) {
                Node::Const(v) => local_map.push(Node::Const(v)),
                node => {
                    local_map.push(Node::Local(steps.len()));
                    steps.push(Step {
                        cell: step.cell,
                        node,
                    });
                }
            }
        }
        let output = specialize_node(&self.output, &input_map, &local_map);

        Ok(Arc::new(CellProgram {
            inputs: residual_inputs.to_vec(),
            steps,
            output,
        }))
    }

    fn compile_to_callable(
        &self,
        catalog: &Arc<FunctionCatalog>,
        _sdf: &Arc<SdfInfo>,
    ) -> Result<Applier, CompileError> {
        let program = Arc::new(self.clone());
        let catalog = Arc::downgrade(catalog);
        Ok(Arc::new(move |args: &[Value]| program.run(args, &catalog)))
    }
}

/// [`CodeGenerator`] producing [`CellProgram`]s.
#[derive(Debug, Clone, Copy, Default)]
pub struct Interpreter;

impl CodeGenerator for Interpreter {
    fn generate(
        &self,
        catalog: &Arc<FunctionCatalog>,
        sdf: &Arc<SdfInfo>,
        order: &[CellId],
        cells: &dyn CellSource,
    ) -> Result<Arc<dyn SdfProgram>, CompileError> {
        let mut lowering = Lowering {
            catalog,
            cells,
            inputs: sdf.inputs(),
            locals: HashMap::new(),
        };
        let mut steps = Vec::with_capacity(order.len());
        for cell in order {
            let node = match cells.cell(*cell) {
                Some(CellContent::Formula(expr)) => lowering.lower(&expr)?,
                Some(CellContent::Constant(v)) => Node::Const(v),
                None => Node::Const(Value::Blank),
            };
            lowering.locals.insert(*cell, steps.len());
            steps.push(Step { cell: *cell, node });
        }
        let output = lowering.lower_ref(sdf.output())?;
        Ok(Arc::new(CellProgram {
            inputs: sdf.inputs().to_vec(),
            steps,
            output,
        }))
    }
}

struct Lowering<'a> {
    catalog: &'a Arc<FunctionCatalog>,
    cells: &'a dyn CellSource,
    inputs: &'a [CellId],
    locals: HashMap<CellId, usize>,
}

impl Lowering<'_> {
    fn lower_ref(&self, cell: CellId) -> Result<Node, CompileError> {
        if let Some(slot) = self.inputs.iter().position(|c| *c == cell) {
            return Ok(Node::Input(slot));
        }
        if let Some(local) = self.locals.get(&cell) {
            return Ok(Node::Local(*local));
        }
        match self.cells.cell(cell) {
            Some(CellContent::Constant(v)) => Ok(Node::Const(v)),
            None => Ok(Node::Const(Value::Blank)),
            Some(CellContent::Formula(_)) => Err(CompileError::Unsupported(format!(
                "{cell} is read before it is calculated"
            ))),
        }
    }

    fn lower(&self, expr: &Expr) -> Result<Node, CompileError> {
        Ok(match expr {
            Expr::Const(v) => Node::Const(v.clone()),
            Expr::Cell(cell) => self.lower_ref(*cell)?,
            Expr::Unary(op, operand) => Node::Unary(*op, Box::new(self.lower(operand)?)),
            Expr::Binary(op, left, right) => Node::Binary(
                *op,
                Box::new(self.lower(left)?),
                Box::new(self.lower(right)?),
            ),
            Expr::If(cond, then, otherwise) => Node::If(
                Box::new(self.lower(cond)?),
                Box::new(self.lower(then)?),
                Box::new(self.lower(otherwise)?),
            ),
            Expr::Call(name, args) => self.lower_call(name, args)?,
        })
    }

    fn lower_call(&self, name: &str, args: &[Expr]) -> Result<Node, CompileError> {
        let args = args
            .iter()
            .map(|arg| self.lower(arg))
            .collect::<Result<Vec<_>, _>>()?;
        if let Some(sdf) = self.catalog.lookup(name) {
            if sdf.arity().get() != args.len() {
                return Err(CompileError::CallArity {
                    name: sdf.name().to_string(),
                    expected: sdf.arity().get(),
                    got: args.len(),
                });
            }
            return Ok(Node::CallSdf {
                name: sdf.name().to_string(),
                index: sdf.index(),
                args,
            });
        }
        match self.catalog.backend().namespace.get(name) {
            Some(entry) => Ok(Node::CallNamed {
                name: normalize_name(name),
                applier: entry.applier,
                volatile: entry.is_volatile,
                args,
            }),
            None => Err(CompileError::UnknownFunction(normalize_name(name))),
        }
    }
}

fn eval(node: &Node, args: &[Value], locals: &[Value], catalog: &Weak<FunctionCatalog>) -> Value {
    match node {
        Node::Const(v) => v.clone(),
        Node::Input(slot) => args.get(*slot).cloned().unwrap_or(Value::Blank),
        Node::Local(slot) => locals.get(*slot).cloned().unwrap_or(Value::Blank),
        Node::Unary(op, operand) => apply_unary(*op, eval(operand, args, locals, catalog)),
        Node::Binary(op, left, right) => apply_binary(
            *op,
            eval(left, args, locals, catalog),
            eval(right, args, locals, catalog),
        ),
        Node::If(cond, then, otherwise) => match truth(&eval(cond, args, locals, catalog)) {
            Ok(true) => eval(then, args, locals, catalog),
            Ok(false) => eval(otherwise, args, locals, catalog),
            Err(e) => Value::Error(e),
        },
        Node::CallSdf {
            index, args: exprs, ..
        } => {
            let Some(callable) = catalog.upgrade().and_then(|c| c.callable(*index)) else {
                return Value::Error(ErrorKind::Ref);
            };
            callable.call_with(exprs, |arg| eval(arg, args, locals, catalog))
        }
        Node::CallNamed {
            applier,
            args: exprs,
            ..
        } => {
            let values: SmallVec<[Value; MAX_ARITY]> = exprs
                .iter()
                .map(|arg| eval(arg, args, locals, catalog))
                .collect();
            applier(&values)
        }
    }
}

/// Substitutes known inputs/locals and folds what became constant.
fn specialize_node(node: &Node, inputs: &[Node], locals: &[Node]) -> Node {
    match node {
        Node::Const(v) => Node::Const(v.clone()),
        Node::Input(slot) => inputs
            .get(*slot)
            .cloned()
            .unwrap_or(Node::Const(Value::Blank)),
        Node::Local(slot) => locals
            .get(*slot)
            .cloned()
            .unwrap_or(Node::Const(Value::Blank)),
        Node::Unary(op, operand) => match specialize_node(operand, inputs, locals) {
            Node::Const(v) => Node::Const(apply_unary(*op, v)),
            operand => Node::Unary(*op, Box::new(operand)),
        },
        Node::Binary(op, left, right) => {
            let left = specialize_node(left, inputs, locals);
            let right = specialize_node(right, inputs, locals);
            match (left, right) {
                (Node::Const(l), Node::Const(r)) => Node::Const(apply_binary(*op, l, r)),
                (left, right) => Node::Binary(*op, Box::new(left), Box::new(right)),
            }
        }
        Node::If(cond, then, otherwise) => match specialize_node(cond, inputs, locals) {
            Node::Const(v) => match truth(&v) {
                Ok(true) => specialize_node(then, inputs, locals),
                Ok(false) => specialize_node(otherwise, inputs, locals),
                Err(e) => Node::Const(Value::Error(e)),
            },
            cond => Node::If(
                Box::new(cond),
                Box::new(specialize_node(then, inputs, locals)),
                Box::new(specialize_node(otherwise, inputs, locals)),
            ),
        },
        Node::CallSdf { name, index, args } => Node::CallSdf {
            name: name.clone(),
            index: *index,
            args: args
                .iter()
                .map(|arg| specialize_node(arg, inputs, locals))
                .collect(),
        },
        Node::CallNamed {
            name,
            applier,
            volatile,
            args,
        } => {
            let args: Vec<Node> = args
                .iter()
                .map(|arg| specialize_node(arg, inputs, locals))
                .collect();
            let constant = !*volatile && args.iter().all(|arg| matches!(arg, Node::Const(_)));
            if constant {
                let values: SmallVec<[Value; MAX_ARITY]> = args
                    .into_iter()
                    .filter_map(|arg| match arg {
                        Node::Const(v) => Some(v),
                        _ => None,
                    })
                    .collect();
                return Node::Const(applier(&values));
            }
            Node::CallNamed {
                name: name.clone(),
                applier: applier.clone(),
                volatile: *volatile,
                args,
            }
        }
    }
}

fn truth(value: &Value) -> Result<bool, ErrorKind> {
    match value {
        Value::Error(e) => Err(*e),
        other => other.as_bool().ok_or(ErrorKind::Value),
    }
}

fn to_number(value: &Value) -> Result<f64, ErrorKind> {
    match value {
        Value::Error(e) => Err(*e),
        Value::Text(s) => s.trim().parse::<f64>().map_err(|_| ErrorKind::Value),
        other => other.as_number().ok_or(ErrorKind::Value),
    }
}

fn to_text(value: &Value) -> Result<String, ErrorKind> {
    match value {
        Value::Error(e) => Err(*e),
        Value::Array(_) | Value::Function(_) | Value::Object(_) => Err(ErrorKind::Value),
        other => Ok(other.to_string()),
    }
}

fn apply_unary(op: UnaryOp, value: Value) -> Value {
    match to_number(&value) {
        Ok(n) => match op {
            UnaryOp::Plus => Value::Number(n),
            UnaryOp::Neg => Value::Number(-n),
        },
        Err(e) => Value::Error(e),
    }
}

fn apply_binary(op: BinaryOp, left: Value, right: Value) -> Value {
    match op {
        BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div | BinaryOp::Pow => {
            let (l, r) = match (to_number(&left), to_number(&right)) {
                (Ok(l), Ok(r)) => (l, r),
                (Err(e), _) | (_, Err(e)) => return Value::Error(e),
            };
            let out = match op {
                BinaryOp::Add => l + r,
                BinaryOp::Sub => l - r,
                BinaryOp::Mul => l * r,
                BinaryOp::Div if r == 0.0 => return Value::Error(ErrorKind::Div0),
                BinaryOp::Div => l / r,
                _ => l.powf(r),
            };
            if out.is_finite() {
                Value::Number(out)
            } else {
                Value::Error(ErrorKind::Num)
            }
        }
        BinaryOp::Concat => match (to_text(&left), to_text(&right)) {
            (Ok(l), Ok(r)) => Value::Text(l + &r),
            (Err(e), _) | (_, Err(e)) => Value::Error(e),
        },
        BinaryOp::Eq
        | BinaryOp::Ne
        | BinaryOp::Lt
        | BinaryOp::Le
        | BinaryOp::Gt
        | BinaryOp::Ge => {
            let ord = match compare(&left, &right) {
                Ok(ord) => ord,
                Err(e) => return Value::Error(e),
            };
            Value::Bool(match op {
                BinaryOp::Eq => ord == Ordering::Equal,
                BinaryOp::Ne => ord != Ordering::Equal,
                BinaryOp::Lt => ord == Ordering::Less,
                BinaryOp::Le => ord != Ordering::Greater,
                BinaryOp::Gt => ord == Ordering::Greater,
                _ => ord != Ordering::Less,
            })
        }
    }
}

/// Spreadsheet ordering: numbers < text < booleans; blank acts as 0 or "".
fn compare(left: &Value, right: &Value) -> Result<Ordering, ErrorKind> {
    fn rank(v: &Value) -> Result<u8, ErrorKind> {
        match v {
            Value::Number(_) => Ok(0),
            Value::Text(_) => Ok(1),
            Value::Bool(_) => Ok(2),
            Value::Error(e) => Err(*e),
            _ => Err(ErrorKind::Value),
        }
    }
    let (left, right) = match (left, right) {
        (Value::Blank, Value::Blank) => return Ok(Ordering::Equal),
        (Value::Blank, Value::Text(_)) => (Value::Text(String::new()), right.clone()),
        (Value::Text(_), Value::Blank) => (left.clone(), Value::Text(String::new())),
        (Value::Blank, Value::Bool(_)) => (Value::Bool(false), right.clone()),
        (Value::Bool(_), Value::Blank) => (left.clone(), Value::Bool(false)),
        (Value::Blank, _) => (Value::Number(0.0), right.clone()),
        (_, Value::Blank) => (left.clone(), Value::Number(0.0)),
        _ => (left.clone(), right.clone()),
    };
    let (lr, rr) = (rank(&left)?, rank(&right)?);
    if lr != rr {
        return Ok(lr.cmp(&rr));
    }
    Ok(match (&left, &right) {
        (Value::Number(a), Value::Number(b)) => a.partial_cmp(b).unwrap_or(Ordering::Equal),
        (Value::Text(a), Value::Text(b)) => a.to_lowercase().cmp(&b.to_lowercase()),
        (Value::Bool(a), Value::Bool(b)) => a.cmp(b),
        _ => Ordering::Equal,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arithmetic_propagates_errors_and_flags_division_by_zero() {
        assert_eq!(
            apply_binary(BinaryOp::Add, 1.0.into(), "2".into()),
            Value::Number(3.0)
        );
        assert_eq!(
            apply_binary(BinaryOp::Div, 1.0.into(), 0.0.into()),
            Value::Error(ErrorKind::Div0)
        );
        assert_eq!(
            apply_binary(BinaryOp::Mul, Value::Error(ErrorKind::Name), 2.0.into()),
            Value::Error(ErrorKind::Name)
        );
        assert_eq!(
            apply_binary(BinaryOp::Sub, "abc".into(), 1.0.into()),
            Value::Error(ErrorKind::Value)
        );
    }

    #[test]
    fn comparisons_follow_spreadsheet_type_order() {
        assert_eq!(
            apply_binary(BinaryOp::Lt, 100.0.into(), "a".into()),
            Value::Bool(true)
        );
        assert_eq!(
            apply_binary(BinaryOp::Eq, "ABC".into(), "abc".into()),
            Value::Bool(true)
        );
        assert_eq!(
            apply_binary(BinaryOp::Eq, Value::Blank, 0.0.into()),
            Value::Bool(true)
        );
        assert_eq!(
            apply_binary(BinaryOp::Gt, true.into(), "zzz".into()),
            Value::Bool(true)
        );
    }

    #[test]
    fn specialization_folds_constant_branches() {
        let node = Node::If(
            Box::new(Node::Binary(
                BinaryOp::Gt,
                Box::new(Node::Input(0)),
                Box::new(Node::Const(0.0.into())),
            )),
            Box::new(Node::Input(1)),
            Box::new(Node::Const("neg".into())),
        );
        let inputs = [Node::Const(5.0.into()), Node::Input(0)];
        let folded = specialize_node(&node, &inputs, &[]);
        assert!(matches!(folded, Node::Input(0)));

        let inputs = [Node::Const((-1.0).into()), Node::Input(0)];
        let folded = specialize_node(&node, &inputs, &[]);
        assert!(matches!(folded, Node::Const(Value::Text(ref s)) if s == "neg"));
    }
}
