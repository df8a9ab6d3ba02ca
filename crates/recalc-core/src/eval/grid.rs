//! The bundled formula evaluator.
//!
//! Each registered sheet keeps its dense grid, the parsed form of every
//! formula, and a precedent -> dependent graph. Evaluation is on demand:
//! a computation first walks the target's precedents (post-order, so
//! precedents come first) and evaluates them into a per-call memo. That
//! keeps recursion shallow for long reference chains; recursion only
//! deepens inside reference cycles, which resolve to `#CYCLE!`.

use std::cmp::Ordering;

use petgraph::Direction;
use petgraph::graphmap::DiGraphMap;
use rustc_hash::{FxHashMap, FxHashSet};

use super::functions::{self, Arg, finite, to_bool, to_number, to_text};
use super::parser::{BinaryOp, Expr, MAX_RANGE_CELLS, ParseError, UnaryOp, parse_formula};
use super::{DenseGrid, EvalError, Evaluator, SheetHandle};
use crate::value::{CellContent, CellError, CellValue};

type Pos = (u32, u32);

/// Recursion guard for nested cell evaluation.
const MAX_DEPTH: usize = 256;

struct Sheet {
    name: String,
    grid: DenseGrid,
    formulas: FxHashMap<Pos, Result<Expr, ParseError>>,
    /// Edges go from precedent to dependent.
    graph: DiGraphMap<Pos, ()>,
}

impl Sheet {
    fn new(name: &str, grid: DenseGrid) -> Self {
        let mut sheet = Self {
            name: name.to_string(),
            grid,
            formulas: FxHashMap::default(),
            graph: DiGraphMap::new(),
        };
        let formulas: Vec<(Pos, CellContent)> = sheet
            .grid
            .iter_filled()
            .filter(|(_, _, c)| c.is_formula())
            .map(|(r, c, content)| ((r, c), content.clone()))
            .collect();
        for (pos, content) in formulas {
            sheet.link(pos, &content);
        }
        sheet
    }

    /// Re-parse a cell and rebuild its incoming edges.
    fn link(&mut self, pos: Pos, content: &CellContent) {
        if self.graph.contains_node(pos) {
            let old: Vec<Pos> = self
                .graph
                .neighbors_directed(pos, Direction::Incoming)
                .collect();
            for precedent in old {
                self.graph.remove_edge(precedent, pos);
            }
        }
        self.formulas.remove(&pos);

        if let CellContent::Formula(src) = content {
            let parsed = parse_formula(src);
            if let Ok(expr) = &parsed {
                let mut refs = Vec::new();
                expr.references(&mut refs);
                for cell in refs {
                    self.graph.add_edge((cell.row, cell.col), pos, ());
                }
            }
            self.formulas.insert(pos, parsed);
        }
    }

    fn neighbors(&self, pos: Pos, direction: Direction) -> Vec<Pos> {
        if !self.graph.contains_node(pos) {
            return Vec::new();
        }
        let mut out: Vec<Pos> = self.graph.neighbors_directed(pos, direction).collect();
        out.sort_unstable();
        out.dedup();
        out
    }
}

/// One computation pass over a sheet, memoizing every cell it touches.
struct Evaluation<'a> {
    sheet: &'a Sheet,
    memo: FxHashMap<Pos, Result<CellValue, EvalError>>,
    active: FxHashSet<Pos>,
    depth: usize,
}

impl<'a> Evaluation<'a> {
    fn new(sheet: &'a Sheet) -> Self {
        Self {
            sheet,
            memo: FxHashMap::default(),
            active: FxHashSet::default(),
            depth: 0,
        }
    }

    /// Evaluate everything `root` transitively reads, precedents first.
    fn prime(&mut self, root: Pos) {
        let sheet = self.sheet;
        let mut order = Vec::new();
        let mut seen = FxHashSet::default();
        let mut stack = vec![(root, false)];

        while let Some((pos, expanded)) = stack.pop() {
            if expanded {
                order.push(pos);
                continue;
            }
            if self.memo.contains_key(&pos) || !seen.insert(pos) {
                continue;
            }
            stack.push((pos, true));
            if sheet.graph.contains_node(pos) {
                for precedent in sheet.graph.neighbors_directed(pos, Direction::Incoming) {
                    if !seen.contains(&precedent) {
                        stack.push((precedent, false));
                    }
                }
            }
        }

        for pos in order {
            if pos != root {
                let _ = self.cell(pos);
            }
        }
    }

    fn cell(&mut self, pos: Pos) -> Result<CellValue, EvalError> {
        if let Some(result) = self.memo.get(&pos) {
            return result.clone();
        }
        if self.active.contains(&pos) {
            return Ok(CellError::Cycle.into());
        }

        let sheet = self.sheet;
        let result = match sheet.grid.get(pos.0, pos.1) {
            None | Some(CellContent::Empty) => return Ok(CellValue::Empty),
            Some(CellContent::Value(v)) => return Ok(v.clone()),
            Some(CellContent::Formula(_)) => match sheet.formulas.get(&pos) {
                Some(Ok(expr)) if self.depth < MAX_DEPTH => {
                    self.active.insert(pos);
                    self.depth += 1;
                    let result = self.value(expr);
                    self.depth -= 1;
                    self.active.remove(&pos);
                    result
                }
                Some(Ok(_)) => Err(EvalError::DepthExceeded),
                _ => Ok(CellError::Error.into()),
            },
        };

        self.memo.insert(pos, result.clone());
        result
    }

    /// Evaluate to a single value; multi-cell ranges are `#VALUE!`.
    fn value(&mut self, expr: &Expr) -> Result<CellValue, EvalError> {
        match self.eval(expr)? {
            Arg::Scalar(v) => Ok(v),
            Arg::Range(mut values) if values.len() == 1 => Ok(values.swap_remove(0)),
            Arg::Range(_) => Ok(CellError::Value.into()),
        }
    }

    fn eval(&mut self, expr: &Expr) -> Result<Arg, EvalError> {
        let value = match expr {
            Expr::Number(n) => CellValue::Number(*n),
            Expr::Text(s) => CellValue::Text(s.clone()),
            Expr::Bool(b) => CellValue::Bool(*b),
            Expr::Name(_) => CellError::Name.into(),
            Expr::Ref(cell) => self.cell((cell.row, cell.col))?,
            Expr::Range(start, end) => {
                let rows = u64::from(end.row - start.row) + 1;
                let cols = u64::from(end.col - start.col) + 1;
                if rows * cols > MAX_RANGE_CELLS {
                    return Ok(Arg::Scalar(CellError::Ref.into()));
                }
                let mut values = Vec::with_capacity((rows * cols) as usize);
                for row in start.row..=end.row {
                    for col in start.col..=end.col {
                        values.push(self.cell((row, col))?);
                    }
                }
                return Ok(Arg::Range(values));
            }
            Expr::Unary(op, inner) => {
                let v = self.value(inner)?;
                let n = match to_number(&v) {
                    Ok(n) => n,
                    Err(e) => return Ok(Arg::Scalar(e.into())),
                };
                match op {
                    UnaryOp::Neg => CellValue::Number(-n),
                    UnaryOp::Plus => CellValue::Number(n),
                    UnaryOp::Percent => CellValue::Number(n / 100.0),
                }
            }
            Expr::Binary(op, lhs, rhs) => {
                let a = self.value(lhs)?;
                let b = self.value(rhs)?;
                binary(*op, a, b)?
            }
            Expr::Call(name, args) if name == "IF" => self.if_call(args)?,
            Expr::Call(name, args) => {
                let mut evaluated = Vec::with_capacity(args.len());
                for arg in args {
                    evaluated.push(self.eval(arg)?);
                }
                functions::call(name, &evaluated)?
            }
        };
        Ok(Arg::Scalar(value))
    }

    fn if_call(&mut self, args: &[Expr]) -> Result<CellValue, EvalError> {
        let (cond, then, otherwise) = match args {
            [c, t] => (c, t, None),
            [c, t, e] => (c, t, Some(e)),
            _ => return Ok(CellError::Value.into()),
        };
        let cond = self.value(cond)?;
        let taken = match to_bool(&cond) {
            Ok(b) => b,
            Err(e) => return Ok(e.into()),
        };
        match (taken, otherwise) {
            (true, _) => self.value(then),
            (false, Some(e)) => self.value(e),
            (false, None) => Ok(CellValue::Bool(false)),
        }
    }
}

fn binary(op: BinaryOp, a: CellValue, b: CellValue) -> Result<CellValue, EvalError> {
    if let CellValue::Error(e) = a {
        return Ok(e.into());
    }
    if let CellValue::Error(e) = b {
        return Ok(e.into());
    }

    match op {
        BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div | BinaryOp::Pow => {
            let (x, y) = match (to_number(&a), to_number(&b)) {
                (Ok(x), Ok(y)) => (x, y),
                (Err(e), _) | (_, Err(e)) => return Ok(e.into()),
            };
            match op {
                BinaryOp::Add => finite(x + y),
                BinaryOp::Sub => finite(x - y),
                BinaryOp::Mul => finite(x * y),
                BinaryOp::Div if y == 0.0 => Err(EvalError::DivisionByZero),
                BinaryOp::Div => finite(x / y),
                _ => finite(x.powf(y)),
            }
        }
        BinaryOp::Concat => match (to_text(&a), to_text(&b)) {
            (Ok(x), Ok(y)) => Ok(CellValue::Text(x + &y)),
            (Err(e), _) | (_, Err(e)) => Ok(e.into()),
        },
        BinaryOp::Eq => Ok(CellValue::Bool(compare(&a, &b) == Ordering::Equal)),
        BinaryOp::Ne => Ok(CellValue::Bool(compare(&a, &b) != Ordering::Equal)),
        BinaryOp::Lt => Ok(CellValue::Bool(compare(&a, &b) == Ordering::Less)),
        BinaryOp::Le => Ok(CellValue::Bool(compare(&a, &b) != Ordering::Greater)),
        BinaryOp::Gt => Ok(CellValue::Bool(compare(&a, &b) == Ordering::Greater)),
        BinaryOp::Ge => Ok(CellValue::Bool(compare(&a, &b) != Ordering::Less)),
    }
}

/// Grid ordering: numbers < text < booleans; text compares case-insensitively.
/// An empty cell takes the zero value of whatever it is compared with.
fn compare(a: &CellValue, b: &CellValue) -> Ordering {
    fn blank_like(other: &CellValue) -> CellValue {
        match other {
            CellValue::Text(_) => CellValue::Text(String::new()),
            CellValue::Bool(_) => CellValue::Bool(false),
            _ => CellValue::Number(0.0),
        }
    }
    fn rank(v: &CellValue) -> u8 {
        match v {
            CellValue::Number(_) | CellValue::Empty => 0,
            CellValue::Text(_) => 1,
            CellValue::Bool(_) => 2,
            CellValue::Error(_) => 3,
        }
    }

    let a = if a.is_empty() { blank_like(b) } else { a.clone() };
    let b = if b.is_empty() { blank_like(&a) } else { b.clone() };
    match (&a, &b) {
        (CellValue::Number(x), CellValue::Number(y)) => x.partial_cmp(y).unwrap_or(Ordering::Equal),
        (CellValue::Text(x), CellValue::Text(y)) => x.to_lowercase().cmp(&y.to_lowercase()),
        (CellValue::Bool(x), CellValue::Bool(y)) => x.cmp(y),
        _ => rank(&a).cmp(&rank(&b)),
    }
}

/// In-process formula evaluator backing the engine.
#[derive(Default)]
pub struct GridEvaluator {
    sheets: Vec<Sheet>,
}

impl GridEvaluator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sheet_count(&self) -> usize {
        self.sheets.len()
    }

    /// Name a sheet was registered under.
    pub fn sheet_name(&self, handle: SheetHandle) -> Option<&str> {
        self.sheet(handle).map(|s| s.name.as_str())
    }

    fn sheet(&self, handle: SheetHandle) -> Option<&Sheet> {
        self.sheets.get(handle.0 as usize)
    }
}

impl Evaluator for GridEvaluator {
    fn register_sheet(&mut self, name: &str, grid: DenseGrid) -> SheetHandle {
        let handle = SheetHandle(self.sheets.len() as u32);
        self.sheets.push(Sheet::new(name, grid));
        handle
    }

    fn set_contents(
        &mut self,
        handle: SheetHandle,
        row: u32,
        col: u32,
        contents: CellContent,
    ) -> Result<bool, EvalError> {
        let sheet = self
            .sheets
            .get_mut(handle.0 as usize)
            .ok_or(EvalError::UnknownSheet(handle))?;
        if sheet.grid.get(row, col).unwrap_or(&CellContent::Empty) == &contents {
            return Ok(false);
        }
        sheet.link((row, col), &contents);
        sheet.grid.set(row, col, contents);
        Ok(true)
    }

    fn compute_at(&self, handle: SheetHandle, row: u32, col: u32) -> Result<CellValue, EvalError> {
        let sheet = self.sheet(handle).ok_or(EvalError::UnknownSheet(handle))?;
        let mut evaluation = Evaluation::new(sheet);
        evaluation.prime((row, col));
        evaluation.cell((row, col))
    }

    fn precedents_of(&self, handle: SheetHandle, row: u32, col: u32) -> Vec<(u32, u32)> {
        self.sheet(handle)
            .map(|s| s.neighbors((row, col), Direction::Incoming))
            .unwrap_or_default()
    }

    fn dependents_of(&self, handle: SheetHandle, row: u32, col: u32) -> Vec<(u32, u32)> {
        self.sheet(handle)
            .map(|s| s.neighbors((row, col), Direction::Outgoing))
            .unwrap_or_default()
    }

    fn serialized_state(&self, handle: SheetHandle) -> Option<Vec<Vec<CellValue>>> {
        let sheet = self.sheet(handle)?;
        let mut evaluation = Evaluation::new(sheet);
        let mut state = Vec::with_capacity(sheet.grid.rows() as usize);
        for row in 0..sheet.grid.rows() {
            let mut values = Vec::with_capacity(sheet.grid.cols() as usize);
            for col in 0..sheet.grid.cols() {
                evaluation.prime((row, col));
                let value = evaluation
                    .cell((row, col))
                    .unwrap_or(CellValue::Error(CellError::Error));
                values.push(value);
            }
            state.push(values);
        }
        Some(state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sheet(cells: &[(u32, u32, &str)]) -> (GridEvaluator, SheetHandle) {
        let mut grid = DenseGrid::new(10, 5);
        for (row, col, input) in cells {
            grid.set(*row, *col, CellContent::from_input(input));
        }
        let mut evaluator = GridEvaluator::new();
        let handle = evaluator.register_sheet("test", grid);
        (evaluator, handle)
    }

    #[test]
    fn test_sum_over_range() {
        let (ev, h) = sheet(&[(0, 0, "10"), (1, 0, "20"), (2, 0, "30"), (0, 1, "=SUM(A1:A3)")]);
        assert_eq!(ev.compute_at(h, 0, 1), Ok(CellValue::Number(60.0)));
        assert_eq!(ev.precedents_of(h, 0, 1), vec![(0, 0), (1, 0), (2, 0)]);
        assert_eq!(ev.dependents_of(h, 1, 0), vec![(0, 1)]);
        assert!(ev.precedents_of(h, 0, 0).is_empty());
    }

    #[test]
    fn test_arithmetic_and_text() {
        let (ev, h) = sheet(&[
            (0, 0, "=2+2"),
            (1, 0, "=-2^2"),
            (2, 0, "=50%"),
            (3, 0, "=\"n=\"&A1"),
            (4, 0, "=A1>3"),
            (5, 0, "=IF(A5,\"yes\",1/0)"),
            (6, 0, "=\"abc\"=\"ABC\""),
        ]);
        assert_eq!(ev.compute_at(h, 0, 0), Ok(CellValue::Number(4.0)));
        assert_eq!(ev.compute_at(h, 1, 0), Ok(CellValue::Number(4.0)));
        assert_eq!(ev.compute_at(h, 2, 0), Ok(CellValue::Number(0.5)));
        assert_eq!(ev.compute_at(h, 3, 0), Ok(CellValue::Text("n=4".to_string())));
        assert_eq!(ev.compute_at(h, 4, 0), Ok(CellValue::Bool(true)));
        assert_eq!(ev.compute_at(h, 5, 0), Ok(CellValue::Text("yes".to_string())));
        assert_eq!(ev.compute_at(h, 6, 0), Ok(CellValue::Bool(true)));
    }

    #[test]
    fn test_faults_and_in_band_errors() {
        let (ev, h) = sheet(&[
            (0, 0, "=1/0"),
            (1, 0, "=A1+1"),
            (2, 0, "=NOPE(1)"),
            (3, 0, "=1+"),
            (4, 0, "=\"x\"*2"),
            (5, 0, "=A3+1"),
        ]);
        assert_eq!(ev.compute_at(h, 0, 0), Err(EvalError::DivisionByZero));
        assert_eq!(ev.compute_at(h, 1, 0), Err(EvalError::DivisionByZero));
        assert_eq!(ev.compute_at(h, 2, 0), Ok(CellValue::Error(CellError::Name)));
        assert_eq!(ev.compute_at(h, 3, 0), Ok(CellValue::Error(CellError::Error)));
        assert_eq!(ev.compute_at(h, 4, 0), Ok(CellValue::Error(CellError::Value)));
        assert_eq!(ev.compute_at(h, 5, 0), Ok(CellValue::Error(CellError::Name)));
    }

    #[test]
    fn test_cycle_yields_marker() {
        let (ev, h) = sheet(&[(0, 0, "=B1"), (0, 1, "=A1"), (0, 2, "=A1+1")]);
        assert_eq!(ev.compute_at(h, 0, 0), Ok(CellValue::Error(CellError::Cycle)));
        assert_eq!(ev.compute_at(h, 0, 1), Ok(CellValue::Error(CellError::Cycle)));
        assert_eq!(ev.compute_at(h, 0, 2), Ok(CellValue::Error(CellError::Cycle)));

        let state = ev.serialized_state(h).unwrap();
        assert_eq!(state[0][0], CellValue::Error(CellError::Cycle));
        assert_eq!(state[0][1], CellValue::Error(CellError::Cycle));
        assert_eq!(state[1][0], CellValue::Empty);
    }

    #[test]
    fn test_long_chain_stays_shallow() {
        let mut grid = DenseGrid::new(2000, 1);
        grid.set(0, 0, CellContent::from_input("1"));
        for row in 1..2000 {
            grid.set(row, 0, CellContent::Formula(format!("=A{}+1", row)));
        }
        let mut ev = GridEvaluator::new();
        let h = ev.register_sheet("chain", grid);
        assert_eq!(ev.compute_at(h, 1999, 0), Ok(CellValue::Number(2000.0)));
    }

    #[test]
    fn test_set_contents_rewires_graph() {
        let (mut ev, h) = sheet(&[(0, 0, "1"), (0, 1, "2"), (1, 0, "=A1*10")]);
        assert_eq!(ev.dependents_of(h, 0, 0), vec![(1, 0)]);

        let changed = ev
            .set_contents(h, 1, 0, CellContent::from_input("=B1*10"))
            .unwrap();
        assert!(changed);
        assert!(ev.dependents_of(h, 0, 0).is_empty());
        assert_eq!(ev.dependents_of(h, 0, 1), vec![(1, 0)]);
        assert_eq!(ev.compute_at(h, 1, 0), Ok(CellValue::Number(20.0)));

        let unchanged = ev
            .set_contents(h, 1, 0, CellContent::from_input("=B1*10"))
            .unwrap();
        assert!(!unchanged);

        assert!(ev.set_contents(h, 50, 9, CellContent::from_input("=B1")).unwrap());
        assert_eq!(ev.compute_at(h, 50, 9), Ok(CellValue::Number(2.0)));
    }

    #[test]
    fn test_far_writes_do_not_resize_grid() {
        let (mut ev, h) = sheet(&[(0, 0, "4")]);
        let (far_row, far_col) = (1_048_575, 16_383);

        assert!(ev.set_contents(h, far_row, far_col, CellContent::from_input("=A1*2")).unwrap());
        assert!(ev.set_contents(h, u32::MAX, u32::MAX, CellContent::from_input("9")).unwrap());
        assert_eq!(ev.compute_at(h, far_row, far_col), Ok(CellValue::Number(8.0)));
        assert_eq!(ev.compute_at(h, u32::MAX, u32::MAX), Ok(CellValue::Number(9.0)));
        assert_eq!(ev.dependents_of(h, 0, 0), vec![(far_row, far_col)]);

        let grid = &ev.sheets[h.as_u32() as usize].grid;
        assert_eq!((grid.rows(), grid.cols()), (10, 5));
        assert_eq!(grid.overflow_len(), 2);
    }

    #[test]
    fn test_unknown_sheet() {
        let ev = GridEvaluator::new();
        let h = SheetHandle::new(7);
        assert_eq!(ev.compute_at(h, 0, 0), Err(EvalError::UnknownSheet(h)));
        assert!(ev.serialized_state(h).is_none());
        assert!(ev.dependents_of(h, 0, 0).is_empty());
    }
}
