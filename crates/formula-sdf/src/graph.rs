//! Dependency graph of a function body.

use std::collections::{HashMap, HashSet};

use crate::address::CellId;
use crate::backend::{CellGraph, CellSource, CompileError, DependencyGraphBuilder};
use crate::sheet::CellContent;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mark {
    Visiting,
    Done,
}

/// Formula cells reachable from an output cell, in calculation order.
#[derive(Debug, Clone, Default)]
pub struct PrecedentGraph {
    output: Option<CellId>,
    inputs: HashSet<CellId>,
    order: Vec<CellId>,
    edges: HashMap<CellId, Vec<CellId>>,
}

impl PrecedentGraph {
    /// Walks precedents of `output`, stopping at `inputs` and at non-formula cells.
    pub fn build(
        output: CellId,
        inputs: &[CellId],
        cells: &dyn CellSource,
    ) -> Result<Self, CompileError> {
        let inputs: HashSet<CellId> = inputs.iter().copied().collect();
        let mut graph = PrecedentGraph {
            output: Some(output),
            ..PrecedentGraph::default()
        };
        let mut marks = HashMap::new();
        let mut path = Vec::new();
        graph.visit(output, &inputs, cells, &mut marks, &mut path)?;
        graph.inputs = inputs;
        Ok(graph)
    }

    fn visit(
        &mut self,
        cell: CellId,
        inputs: &HashSet<CellId>,
        cells: &dyn CellSource,
        marks: &mut HashMap<CellId, Mark>,
        path: &mut Vec<CellId>,
    ) -> Result<(), CompileError> {
        if inputs.contains(&cell) {
            return Ok(());
        }
        match marks.get(&cell) {
            Some(Mark::Done) => return Ok(()),
            Some(Mark::Visiting) => {
                let start = path.iter().position(|c| *c == cell).unwrap_or(0);
                let mut cycle = path[start..].to_vec();
                cycle.push(cell);
                return Err(CompileError::Cycle(cycle));
            }
            None => {}
        }
        let Some(CellContent::Formula(expr)) = cells.cell(cell) else {
            return Ok(());
        };

        marks.insert(cell, Mark::Visiting);
        path.push(cell);
        let mut precedents = Vec::new();
        expr.for_each_cell(&mut |p| {
            if !precedents.contains(&p) {
                precedents.push(p);
            }
        });
        for precedent in &precedents {
            self.visit(*precedent, inputs, cells, marks, path)?;
        }
        path.pop();
        marks.insert(cell, Mark::Done);
        self.edges.insert(cell, precedents);
        self.order.push(cell);
        Ok(())
    }

    /// Direct precedents of a formula cell in the graph.
    pub fn precedents(&self, cell: CellId) -> &[CellId] {
        self.edges.get(&cell).map(Vec::as_slice).unwrap_or(&[])
    }
}

impl CellGraph for PrecedentGraph {
    fn precedent_order(&self) -> Vec<CellId> {
        self.order.clone()
    }

    fn referenced_cells(&self) -> Vec<CellId> {
        let mut cells = self.order.clone();
        let mut seen: HashSet<CellId> = cells.iter().copied().collect();
        let leaves = self
            .order
            .iter()
            .flat_map(|cell| self.precedents(*cell).iter().copied())
            .chain(self.output);
        for cell in leaves {
            if !self.inputs.contains(&cell) && seen.insert(cell) {
                cells.push(cell);
            }
        }
        cells
    }
}

/// [`DependencyGraphBuilder`] backed by [`PrecedentGraph`].
#[derive(Debug, Clone, Copy, Default)]
pub struct SheetGraphBuilder;

impl DependencyGraphBuilder for SheetGraphBuilder {
    fn build(
        &self,
        output: CellId,
        inputs: &[CellId],
        cells: &dyn CellSource,
    ) -> Result<Box<dyn CellGraph>, CompileError> {
        Ok(Box::new(PrecedentGraph::build(output, inputs, cells)?))
    }
}
