use std::fmt;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::address::CellId;
use crate::backend::SdfProgram;
use crate::dispatch::{Arity, Callable};
use crate::value::Value;

/// Lifecycle state of a [`SdfInfo`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Registered and reachable by name, first body not installed yet.
    Compiling,
    Ready,
    Deleted,
}

/// Where a record's body came from.
#[derive(Clone)]
pub enum Origin {
    /// Compiled from the sheet.
    Sheet,
    /// Produced by specializing `base`.
    Residual { base: Arc<SdfInfo> },
}

struct SdfState {
    phase: Phase,
    callable: Callable,
    is_volatile: bool,
    used_cells: Vec<CellId>,
    program: Option<Arc<dyn SdfProgram>>,
}

/// One compiled sheet-defined function.
///
/// The name, index, cells and arity never change; regeneration swaps the body,
/// volatility and program in place.
pub struct SdfInfo {
    name: String,
    index: usize,
    output: CellId,
    inputs: Vec<CellId>,
    arity: Arity,
    origin: Origin,
    state: RwLock<SdfState>,
}

impl SdfInfo {
    pub(crate) fn new(
        name: String,
        index: usize,
        output: CellId,
        inputs: Vec<CellId>,
        arity: Arity,
        origin: Origin,
    ) -> Self {
        Self {
            name,
            index,
            output,
            inputs,
            arity,
            origin,
            state: RwLock::new(SdfState {
                phase: Phase::Compiling,
                callable: Callable::Pending(arity),
                is_volatile: false,
                used_cells: Vec::new(),
                program: None,
            }),
        }
    }

    /// Case-folded name.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn output(&self) -> CellId {
        self.output
    }

    pub fn inputs(&self) -> &[CellId] {
        &self.inputs
    }

    pub fn arity(&self) -> Arity {
        self.arity
    }

    pub fn origin(&self) -> &Origin {
        &self.origin
    }

    pub fn is_residual(&self) -> bool {
        matches!(self.origin, Origin::Residual { .. })
    }

    /// The function this one was specialized from, if any.
    pub fn base(&self) -> Option<&Arc<SdfInfo>> {
        match &self.origin {
            Origin::Sheet => None,
            Origin::Residual { base } => Some(base),
        }
    }

    pub fn phase(&self) -> Phase {
        self.read().phase
    }

    pub fn is_placeholder(&self) -> bool {
        self.phase() == Phase::Compiling
    }

    pub fn is_volatile(&self) -> bool {
        self.read().is_volatile
    }

    /// Cells read by the installed body: formula cells in evaluation order, then the
    /// constant and blank cells folded into it.
    pub fn used_cells(&self) -> Vec<CellId> {
        self.read().used_cells.clone()
    }

    pub fn program(&self) -> Option<Arc<dyn SdfProgram>> {
        self.read().program.clone()
    }

    pub fn callable(&self) -> Callable {
        self.read().callable.clone()
    }

    /// Calls the installed body. The state lock is released before the body runs, so
    /// recursive calls are fine.
    pub fn apply(&self, args: &[Value]) -> Value {
        self.callable().call(args)
    }

    /// Like [`SdfInfo::apply`], evaluating argument expressions one at a time.
    pub fn apply_with<E>(&self, exprs: &[E], eval: impl FnMut(&E) -> Value) -> Value {
        self.callable().call_with(exprs, eval)
    }

    pub(crate) fn install(
        &self,
        is_volatile: bool,
        used_cells: Vec<CellId>,
        program: Arc<dyn SdfProgram>,
    ) {
        let mut state = self.write();
        state.phase = Phase::Ready;
        state.is_volatile = is_volatile;
        state.used_cells = used_cells;
        state.program = Some(program);
    }

    pub(crate) fn set_callable(&self, callable: Callable) {
        self.write().callable = callable;
    }

    pub(crate) fn mark_deleted(&self) {
        let mut state = self.write();
        state.phase = Phase::Deleted;
        state.callable = Callable::Deleted(self.arity);
    }

    fn read(&self) -> RwLockReadGuard<'_, SdfState> {
        match self.state.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn write(&self) -> RwLockWriteGuard<'_, SdfState> {
        match self.state.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl fmt::Debug for SdfInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SdfInfo")
            .field("name", &self.name)
            .field("index", &self.index)
            .field("output", &self.output)
            .field("inputs", &self.inputs)
            .field("phase", &self.phase())
            .field("residual", &self.is_residual())
            .finish()
    }
}

pub(crate) fn normalize_name(name: &str) -> String {
    name.trim().to_ascii_uppercase()
}
