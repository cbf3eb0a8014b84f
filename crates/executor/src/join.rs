//! Join operators: nested-loop and hash join.

use crate::eval::eval_resolved_predicate;
use crate::{ExecutionContext, Executor};
use common::{DbResult, Tuple};
use hashbrown::HashMap;
use parser::JoinType;
use planner::ResolvedExpr;
use std::collections::VecDeque;
use types::Value;

fn combine(left: &Tuple, right_values: &[Value]) -> Tuple {
    let mut values = left.values.clone();
    values.extend_from_slice(right_values);
    Tuple::new(values)
}

/// Nested loop join: the right child is re-initialized for every outer
/// tuple. Left-outer emits a NULL-padded row for unmatched outer tuples.
pub struct NestedLoopJoinExec {
    left: Box<dyn Executor>,
    right: Box<dyn Executor>,
    join_type: JoinType,
    condition: ResolvedExpr,
    schema: Vec<String>,
    current_left: Option<Tuple>,
    left_matched: bool,
}

impl NestedLoopJoinExec {
    pub fn new(
        left: Box<dyn Executor>,
        right: Box<dyn Executor>,
        join_type: JoinType,
        condition: ResolvedExpr,
        schema: Vec<String>,
    ) -> Self {
        Self {
            left,
            right,
            join_type,
            condition,
            schema,
            current_left: None,
            left_matched: false,
        }
    }

    fn right_width(&self) -> usize {
        self.right.schema().len()
    }
}

impl Executor for NestedLoopJoinExec {
    fn init(&mut self, ctx: &mut ExecutionContext) -> DbResult<()> {
        self.current_left = None;
        self.left_matched = false;
        self.left.init(ctx)
    }

    fn next(&mut self, ctx: &mut ExecutionContext) -> DbResult<Option<Tuple>> {
        loop {
            ctx.cancel.check()?;
            if self.current_left.is_none() {
                match self.left.next(ctx)? {
                    None => return Ok(None),
                    Some(tuple) => {
                        self.current_left = Some(tuple);
                        self.left_matched = false;
                        // Rewind the inner side for this outer tuple.
                        self.right.init(ctx)?;
                    }
                }
            }

            match self.right.next(ctx)? {
                Some(right_tuple) => {
                    let left_tuple = self.current_left.as_ref().unwrap();
                    let combined = combine(left_tuple, &right_tuple.values);
                    if eval_resolved_predicate(&self.condition, &combined)? {
                        self.left_matched = true;
                        return Ok(Some(combined));
                    }
                }
                None => {
                    let left_tuple = self.current_left.take().unwrap();
                    if self.join_type == JoinType::LeftOuter && !self.left_matched {
                        let padding = vec![Value::Null; self.right_width()];
                        return Ok(Some(combine(&left_tuple, &padding)));
                    }
                }
            }
        }
    }

    fn schema(&self) -> &[String] {
        &self.schema
    }
}

/// Hash join for a single-column equijoin: builds on the left input,
/// probes with the right. NULL keys never match; under left-outer, build
/// rows that never matched are emitted NULL-padded after the probe side
/// is exhausted.
pub struct HashJoinExec {
    left: Box<dyn Executor>,
    right: Box<dyn Executor>,
    join_type: JoinType,
    left_key: usize,
    right_key: usize,
    schema: Vec<String>,

    build_rows: Vec<Tuple>,
    build_table: HashMap<Value, Vec<usize>>,
    matched: Vec<bool>,
    built: bool,
    pending: VecDeque<Tuple>,
    probe_done: bool,
    unmatched_cursor: usize,
}

impl HashJoinExec {
    pub fn new(
        left: Box<dyn Executor>,
        right: Box<dyn Executor>,
        join_type: JoinType,
        left_key: usize,
        right_key: usize,
        schema: Vec<String>,
    ) -> Self {
        Self {
            left,
            right,
            join_type,
            left_key,
            right_key,
            schema,
            build_rows: Vec::new(),
            build_table: HashMap::new(),
            matched: Vec::new(),
            built: false,
            pending: VecDeque::new(),
            probe_done: false,
            unmatched_cursor: 0,
        }
    }

    fn build(&mut self, ctx: &mut ExecutionContext) -> DbResult<()> {
        while let Some(tuple) = self.left.next(ctx)? {
            ctx.cancel.check()?;
            let key = normalize_key(tuple.value(self.left_key)?);
            let idx = self.build_rows.len();
            if !key.is_null() {
                self.build_table.entry(key).or_default().push(idx);
            }
            self.build_rows.push(tuple);
        }
        self.matched = vec![false; self.build_rows.len()];
        self.built = true;
        Ok(())
    }

    fn right_width(&self) -> usize {
        self.right.schema().len()
    }
}

impl Executor for HashJoinExec {
    fn init(&mut self, ctx: &mut ExecutionContext) -> DbResult<()> {
        self.build_rows.clear();
        self.build_table.clear();
        self.matched.clear();
        self.built = false;
        self.pending.clear();
        self.probe_done = false;
        self.unmatched_cursor = 0;
        self.left.init(ctx)?;
        self.right.init(ctx)
    }

    fn next(&mut self, ctx: &mut ExecutionContext) -> DbResult<Option<Tuple>> {
        if !self.built {
            self.build(ctx)?;
        }

        loop {
            ctx.cancel.check()?;
            if let Some(tuple) = self.pending.pop_front() {
                return Ok(Some(tuple));
            }

            if !self.probe_done {
                match self.right.next(ctx)? {
                    Some(right_tuple) => {
                        let key = normalize_key(right_tuple.value(self.right_key)?);
                        if key.is_null() {
                            continue;
                        }
                        if let Some(indices) = self.build_table.get(&key) {
                            for &idx in indices {
                                self.matched[idx] = true;
                                self.pending
                                    .push_back(combine(&self.build_rows[idx], &right_tuple.values));
                            }
                        }
                    }
                    None => self.probe_done = true,
                }
                continue;
            }

            // Probe side exhausted: under left-outer, drain unmatched
            // build rows NULL-padded.
            if self.join_type == JoinType::LeftOuter {
                while self.unmatched_cursor < self.build_rows.len() {
                    let idx = self.unmatched_cursor;
                    self.unmatched_cursor += 1;
                    if !self.matched[idx] {
                        let padding = vec![Value::Null; self.right_width()];
                        return Ok(Some(combine(&self.build_rows[idx], &padding)));
                    }
                }
            }
            return Ok(None);
        }
    }

    fn schema(&self) -> &[String] {
        &self.schema
    }
}

/// Hash keys compare bitwise, so widen integers to one representation to
/// let INT columns join BIGINT columns.
fn normalize_key(value: &Value) -> Value {
    match value {
        Value::Integer(v) => Value::BigInt(*v as i64),
        other => other.clone(),
    }
}
