//! Query planner: statement AST → logical plan → physical plan.
//!
//! Three stages, following the lower → optimize → bind pipeline:
//! name binding resolves columns to ordinals against catalog schemas,
//! optimization pushes predicates below joins, and access selection
//! picks index scans for indexed point/range predicates and a hash join
//! for equijoins.


use catalog::{Catalog, TableMeta};
use common::{DbError, DbResult, IndexOid, TableOid};
use expr::{AggFunc, BinaryOp, EvalContext, Expr, UnaryOp};
use hashbrown::HashSet;
use parser::{JoinType, SelectItem, SelectStatement, Statement};
use types::Value;

/// Logical plan: names, not ordinals.
#[derive(Clone, Debug, PartialEq)]
pub enum LogicalPlan {
    TableScan {
        table: String,
        alias: String,
    },
    Filter {
        input: Box<LogicalPlan>,
        predicate: Expr,
    },
    Join {
        left: Box<LogicalPlan>,
        right: Box<LogicalPlan>,
        join_type: JoinType,
        condition: Expr,
    },
    Aggregate {
        input: Box<LogicalPlan>,
        group_by: Vec<Expr>,
        aggregates: Vec<Expr>,
        having: Option<Expr>,
    },
    Projection {
        input: Box<LogicalPlan>,
        items: Vec<(Expr, String)>,
        /// Wildcard items expand at bind time when schemas are known.
        wildcard: bool,
    },
    Distinct {
        input: Box<LogicalPlan>,
    },
    Sort {
        input: Box<LogicalPlan>,
        keys: Vec<(Option<String>, String, bool)>,
    },
    Limit {
        input: Box<LogicalPlan>,
        limit: u64,
    },
    Insert {
        table: String,
        columns: Option<Vec<String>>,
        rows: Vec<Vec<Expr>>,
    },
    Update {
        table: String,
        assignments: Vec<(String, Expr)>,
        predicate: Option<Expr>,
    },
    Delete {
        table: String,
        predicate: Option<Expr>,
    },
}

/// Expression with column references bound to input ordinals.
#[derive(Clone, Debug, PartialEq)]
pub enum ResolvedExpr {
    Literal(Value),
    Column(usize),
    Unary {
        op: UnaryOp,
        expr: Box<ResolvedExpr>,
    },
    Binary {
        left: Box<ResolvedExpr>,
        op: BinaryOp,
        right: Box<ResolvedExpr>,
    },
    IsNull {
        expr: Box<ResolvedExpr>,
        negated: bool,
    },
}

/// Physical plan: executor-ready operators with resolved ordinals.
#[derive(Clone, Debug, PartialEq)]
pub enum PhysicalPlan {
    SeqScan {
        table: TableOid,
        schema: Vec<String>,
    },
    IndexScan {
        table: TableOid,
        index: IndexOid,
        low: Option<(Value, bool)>,
        high: Option<(Value, bool)>,
        schema: Vec<String>,
    },
    Filter {
        input: Box<PhysicalPlan>,
        predicate: ResolvedExpr,
    },
    Projection {
        input: Box<PhysicalPlan>,
        exprs: Vec<ResolvedExpr>,
        schema: Vec<String>,
    },
    Distinct {
        input: Box<PhysicalPlan>,
    },
    Sort {
        input: Box<PhysicalPlan>,
        keys: Vec<(usize, bool)>,
    },
    Limit {
        input: Box<PhysicalPlan>,
        limit: u64,
    },
    NestedLoopJoin {
        left: Box<PhysicalPlan>,
        right: Box<PhysicalPlan>,
        join_type: JoinType,
        condition: ResolvedExpr,
        schema: Vec<String>,
    },
    HashJoin {
        left: Box<PhysicalPlan>,
        right: Box<PhysicalPlan>,
        join_type: JoinType,
        left_key: usize,
        right_key: usize,
        schema: Vec<String>,
    },
    Aggregate {
        input: Box<PhysicalPlan>,
        group_by: Vec<ResolvedExpr>,
        aggs: Vec<(AggFunc, Option<ResolvedExpr>)>,
        having: Option<ResolvedExpr>,
        schema: Vec<String>,
    },
    Insert {
        table: TableOid,
        rows: Vec<Vec<ResolvedExpr>>,
    },
    Update {
        table: TableOid,
        assignments: Vec<(usize, ResolvedExpr)>,
        predicate: Option<ResolvedExpr>,
    },
    Delete {
        table: TableOid,
        predicate: Option<ResolvedExpr>,
    },
}

impl PhysicalPlan {
    /// Output column labels of this operator.
    pub fn schema(&self) -> Vec<String> {
        match self {
            PhysicalPlan::SeqScan { schema, .. }
            | PhysicalPlan::IndexScan { schema, .. }
            | PhysicalPlan::Projection { schema, .. }
            | PhysicalPlan::NestedLoopJoin { schema, .. }
            | PhysicalPlan::HashJoin { schema, .. }
            | PhysicalPlan::Aggregate { schema, .. } => schema.clone(),
            PhysicalPlan::Filter { input, .. }
            | PhysicalPlan::Distinct { input }
            | PhysicalPlan::Sort { input, .. }
            | PhysicalPlan::Limit { input, .. } => input.schema(),
            PhysicalPlan::Insert { .. }
            | PhysicalPlan::Update { .. }
            | PhysicalPlan::Delete { .. } => vec!["rows_affected".into()],
        }
    }
}

/// Catalog access for the planner.
pub struct PlanningContext<'a> {
    pub catalog: &'a Catalog,
}

impl<'a> PlanningContext<'a> {
    pub fn new(catalog: &'a Catalog) -> Self {
        Self { catalog }
    }

    fn table(&self, name: &str) -> DbResult<TableMeta> {
        self.catalog.get_table(name)
    }
}

pub struct Planner;

impl Planner {
    /// Plans a DML or query statement. DDL and transaction control are
    /// handled by the engine before planning.
    pub fn plan(stmt: Statement, ctx: &PlanningContext) -> DbResult<PhysicalPlan> {
        let logical = Self::lower(stmt)?;
        let optimized = Self::pushdown(logical);
        Self::bind(optimized, ctx)
    }

    // ---- lowering ----

    fn lower(stmt: Statement) -> DbResult<LogicalPlan> {
        match stmt {
            Statement::Select(select) => Self::lower_select(select),
            Statement::Insert {
                table,
                columns,
                rows,
            } => Ok(LogicalPlan::Insert {
                table,
                columns,
                rows,
            }),
            Statement::Update {
                table,
                assignments,
                selection,
            } => Ok(LogicalPlan::Update {
                table,
                assignments,
                predicate: selection,
            }),
            Statement::Delete { table, selection } => Ok(LogicalPlan::Delete {
                table,
                predicate: selection,
            }),
            other => Err(DbError::Internal(format!(
                "statement {other:?} does not go through the planner"
            ))),
        }
    }

    fn lower_select(select: SelectStatement) -> DbResult<LogicalPlan> {
        if select.as_of_tx.is_some() {
            return Err(DbError::Semantic(
                "FOR SYSTEM_TIME is not supported by this engine".into(),
            ));
        }

        let mut plan = LogicalPlan::TableScan {
            table: select.from.name.clone(),
            alias: select.from.effective_name().to_string(),
        };
        for join in select.joins {
            let right = LogicalPlan::TableScan {
                table: join.table.name.clone(),
                alias: join.table.effective_name().to_string(),
            };
            plan = LogicalPlan::Join {
                left: Box::new(plan),
                right: Box::new(right),
                join_type: join.join_type,
                condition: join.on,
            };
        }

        if let Some(predicate) = select.selection {
            plan = LogicalPlan::Filter {
                input: Box::new(plan),
                predicate,
            };
        }

        let has_wildcard = select.items.iter().any(|i| matches!(i, SelectItem::Wildcard));
        let grouped = !select.group_by.is_empty()
            || select.having.is_some()
            || select.items.iter().any(|item| match item {
                SelectItem::Expr { expr, .. } => expr.contains_aggregate(),
                SelectItem::Wildcard => false,
            });

        let items: Vec<(Expr, String)> = select
            .items
            .iter()
            .filter_map(|item| match item {
                SelectItem::Wildcard => None,
                SelectItem::Expr { expr, alias } => {
                    let label = alias.clone().unwrap_or_else(|| expr.to_string());
                    Some((expr.clone(), label))
                }
            })
            .collect();

        if grouped {
            if has_wildcard {
                return Err(DbError::Semantic(
                    "SELECT * cannot be combined with GROUP BY or aggregates".into(),
                ));
            }
            let mut aggregates = Vec::new();
            for (expr, _) in &items {
                collect_aggregates(expr, &mut aggregates);
            }
            if let Some(having) = &select.having {
                collect_aggregates(having, &mut aggregates);
            }
            plan = LogicalPlan::Aggregate {
                input: Box::new(plan),
                group_by: select.group_by.clone(),
                aggregates,
                having: select.having,
            };
        }

        plan = LogicalPlan::Projection {
            input: Box::new(plan),
            items,
            wildcard: has_wildcard,
        };

        if select.distinct {
            plan = LogicalPlan::Distinct {
                input: Box::new(plan),
            };
        }

        if !select.order_by.is_empty() {
            let keys = select
                .order_by
                .into_iter()
                .map(|k| (k.table, k.column, k.desc))
                .collect();
            plan = LogicalPlan::Sort {
                input: Box::new(plan),
                keys,
            };
        }

        if let Some(limit) = select.limit {
            plan = LogicalPlan::Limit {
                input: Box::new(plan),
                limit,
            };
        }

        Ok(plan)
    }

    // ---- optimization ----

    /// Pushes filter conjuncts below joins when every column they touch is
    /// qualified with aliases from one side.
    fn pushdown(plan: LogicalPlan) -> LogicalPlan {
        match plan {
            LogicalPlan::Filter { input, predicate } => {
                let input = Self::pushdown(*input);
                if let LogicalPlan::Join {
                    left,
                    right,
                    join_type,
                    condition,
                } = input
                {
                    let left_aliases = collect_aliases(&left);
                    let right_aliases = collect_aliases(&right);
                    let mut push_left = Vec::new();
                    let mut push_right = Vec::new();
                    let mut keep = Vec::new();
                    for conjunct in split_and(predicate) {
                        match qualifiers_of(&conjunct) {
                            Some(quals) if quals.is_subset(&left_aliases) => {
                                push_left.push(conjunct)
                            }
                            // Pushing below the null-padded side of an
                            // outer join would change results.
                            Some(quals)
                                if quals.is_subset(&right_aliases)
                                    && join_type == JoinType::Inner =>
                            {
                                push_right.push(conjunct)
                            }
                            _ => keep.push(conjunct),
                        }
                    }
                    let left = wrap_filter(*left, and_all(push_left));
                    let right = wrap_filter(*right, and_all(push_right));
                    let join = LogicalPlan::Join {
                        left: Box::new(left),
                        right: Box::new(right),
                        join_type,
                        condition,
                    };
                    wrap_filter(join, and_all(keep))
                } else {
                    LogicalPlan::Filter {
                        input: Box::new(input),
                        predicate,
                    }
                }
            }
            LogicalPlan::Join {
                left,
                right,
                join_type,
                condition,
            } => LogicalPlan::Join {
                left: Box::new(Self::pushdown(*left)),
                right: Box::new(Self::pushdown(*right)),
                join_type,
                condition,
            },
            LogicalPlan::Aggregate {
                input,
                group_by,
                aggregates,
                having,
            } => LogicalPlan::Aggregate {
                input: Box::new(Self::pushdown(*input)),
                group_by,
                aggregates,
                having,
            },
            LogicalPlan::Projection {
                input,
                items,
                wildcard,
            } => LogicalPlan::Projection {
                input: Box::new(Self::pushdown(*input)),
                items,
                wildcard,
            },
            LogicalPlan::Distinct { input } => LogicalPlan::Distinct {
                input: Box::new(Self::pushdown(*input)),
            },
            LogicalPlan::Sort { input, keys } => LogicalPlan::Sort {
                input: Box::new(Self::pushdown(*input)),
                keys,
            },
            LogicalPlan::Limit { input, limit } => LogicalPlan::Limit {
                input: Box::new(Self::pushdown(*input)),
                limit,
            },
            other => other,
        }
    }

    // ---- binding ----

    fn bind(plan: LogicalPlan, ctx: &PlanningContext) -> DbResult<PhysicalPlan> {
        match plan {
            LogicalPlan::TableScan { table, alias } => {
                let meta = ctx.table(&table)?;
                Ok(PhysicalPlan::SeqScan {
                    table: meta.oid,
                    schema: qualified_schema(&meta, &alias),
                })
            }
            LogicalPlan::Filter { input, predicate } => Self::bind_filter(*input, predicate, ctx),
            LogicalPlan::Join {
                left,
                right,
                join_type,
                condition,
            } => {
                let left = Self::bind(*left, ctx)?;
                let right = Self::bind(*right, ctx)?;
                let mut schema = left.schema();
                let left_len = schema.len();
                schema.extend(right.schema());
                let resolved = resolve_expr(&condition, &schema)?;

                if let Some((lk, rk)) = equi_join_keys(&resolved, left_len) {
                    return Ok(PhysicalPlan::HashJoin {
                        left: Box::new(left),
                        right: Box::new(right),
                        join_type,
                        left_key: lk,
                        right_key: rk,
                        schema,
                    });
                }
                Ok(PhysicalPlan::NestedLoopJoin {
                    left: Box::new(left),
                    right: Box::new(right),
                    join_type,
                    condition: resolved,
                    schema,
                })
            }
            LogicalPlan::Aggregate {
                input,
                group_by,
                aggregates,
                having,
            } => {
                let input = Self::bind(*input, ctx)?;
                let input_schema = input.schema();

                let mut bound_groups = Vec::new();
                let mut group_labels = Vec::new();
                for expr in &group_by {
                    bound_groups.push(resolve_expr(expr, &input_schema)?);
                    group_labels.push(label_of(expr));
                }

                let mut bound_aggs = Vec::new();
                let mut agg_labels = Vec::new();
                for agg in &aggregates {
                    let Expr::Aggregate { func, arg } = agg else {
                        return Err(DbError::Internal("non-aggregate in aggregate list".into()));
                    };
                    let bound_arg = match arg {
                        Some(arg) => Some(resolve_expr(arg, &input_schema)?),
                        None => None,
                    };
                    bound_aggs.push((*func, bound_arg));
                    agg_labels.push(agg.to_string());
                }

                let mut schema = group_labels;
                schema.extend(agg_labels);

                let having = having
                    .map(|h| resolve_over_aggregate(&h, &group_by, &aggregates, &schema))
                    .transpose()?;

                Ok(PhysicalPlan::Aggregate {
                    input: Box::new(input),
                    group_by: bound_groups,
                    aggs: bound_aggs,
                    having,
                    schema,
                })
            }
            LogicalPlan::Projection {
                input,
                items,
                wildcard,
            } => {
                // Over an aggregate, select items are rewritten in terms of
                // the aggregate's output columns.
                if let LogicalPlan::Aggregate {
                    group_by,
                    aggregates,
                    ..
                } = &*input
                {
                    let group_by = group_by.clone();
                    let aggregates = aggregates.clone();
                    let bound_input = Self::bind(*input, ctx)?;
                    let agg_schema = bound_input.schema();
                    let mut exprs = Vec::new();
                    let mut schema = Vec::new();
                    for (expr, label) in items {
                        exprs.push(resolve_over_aggregate(
                            &expr,
                            &group_by,
                            &aggregates,
                            &agg_schema,
                        )?);
                        schema.push(label);
                    }
                    return Ok(PhysicalPlan::Projection {
                        input: Box::new(bound_input),
                        exprs,
                        schema,
                    });
                }

                let input = Self::bind(*input, ctx)?;
                let input_schema = input.schema();
                let mut exprs = Vec::new();
                let mut schema = Vec::new();
                if wildcard {
                    // `SELECT *` keeps the input order; bare labels when a
                    // single table makes them unambiguous.
                    let single_table = is_single_qualifier(&input_schema);
                    for (idx, label) in input_schema.iter().enumerate() {
                        exprs.push(ResolvedExpr::Column(idx));
                        schema.push(if single_table {
                            strip_qualifier(label)
                        } else {
                            label.clone()
                        });
                    }
                }
                for (expr, label) in items {
                    exprs.push(resolve_expr(&expr, &input_schema)?);
                    schema.push(label);
                }
                Ok(PhysicalPlan::Projection {
                    input: Box::new(input),
                    exprs,
                    schema,
                })
            }
            LogicalPlan::Distinct { input } => Ok(PhysicalPlan::Distinct {
                input: Box::new(Self::bind(*input, ctx)?),
            }),
            LogicalPlan::Sort { input, keys } => {
                let input = Self::bind(*input, ctx)?;
                let schema = input.schema();
                let eval = EvalContext::new(&schema);
                let keys = keys
                    .into_iter()
                    .map(|(table, column, desc)| {
                        eval.resolve(table.as_deref(), &column).map(|i| (i, desc))
                    })
                    .collect::<DbResult<Vec<_>>>()?;
                Ok(PhysicalPlan::Sort {
                    input: Box::new(input),
                    keys,
                })
            }
            LogicalPlan::Limit { input, limit } => Ok(PhysicalPlan::Limit {
                input: Box::new(Self::bind(*input, ctx)?),
                limit,
            }),
            LogicalPlan::Insert {
                table,
                columns,
                rows,
            } => Self::bind_insert(table, columns, rows, ctx),
            LogicalPlan::Update {
                table,
                assignments,
                predicate,
            } => {
                let meta = ctx.table(&table)?;
                let schema = qualified_schema(&meta, &table);
                let assignments = assignments
                    .into_iter()
                    .map(|(col, expr)| {
                        let ordinal = meta.schema.column_index(&col)?;
                        Ok((ordinal, resolve_expr(&expr, &schema)?))
                    })
                    .collect::<DbResult<Vec<_>>>()?;
                let predicate = predicate.map(|p| resolve_expr(&p, &schema)).transpose()?;
                Ok(PhysicalPlan::Update {
                    table: meta.oid,
                    assignments,
                    predicate,
                })
            }
            LogicalPlan::Delete { table, predicate } => {
                let meta = ctx.table(&table)?;
                let schema = qualified_schema(&meta, &table);
                let predicate = predicate.map(|p| resolve_expr(&p, &schema)).transpose()?;
                Ok(PhysicalPlan::Delete {
                    table: meta.oid,
                    predicate,
                })
            }
        }
    }

    /// Binds a filter, choosing an index scan when a conjunct matches a
    /// single-column index on the scanned table.
    fn bind_filter(
        input: LogicalPlan,
        predicate: Expr,
        ctx: &PlanningContext,
    ) -> DbResult<PhysicalPlan> {
        if let LogicalPlan::TableScan { table, alias } = &input {
            let meta = ctx.table(table)?;
            let schema = qualified_schema(&meta, alias);
            let eval = EvalContext::new(&schema);
            let indexes = ctx.catalog.indexes_for(meta.oid);

            let mut low: Option<(Value, bool)> = None;
            let mut high: Option<(Value, bool)> = None;
            let mut chosen: Option<IndexOid> = None;
            let mut residual = Vec::new();

            for conjunct in split_and(predicate.clone()) {
                let absorbed = index_conjunct(&conjunct, &eval).and_then(|(ordinal, op, value)| {
                    let index = indexes.iter().find(|i| i.key_attrs == [ordinal])?;
                    if chosen.is_some() && chosen != Some(index.oid) {
                        return None;
                    }
                    // Only the first conjunct per bound direction turns
                    // into a scan bound; any further conjunct on the
                    // column stays in the residual filter, so overlapping
                    // predicates are still enforced.
                    match op {
                        BinaryOp::Eq if low.is_none() && high.is_none() => {
                            low = Some((value.clone(), true));
                            high = Some((value, true));
                        }
                        BinaryOp::Lt if high.is_none() => high = Some((value, false)),
                        BinaryOp::Le if high.is_none() => high = Some((value, true)),
                        BinaryOp::Gt if low.is_none() => low = Some((value, false)),
                        BinaryOp::Ge if low.is_none() => low = Some((value, true)),
                        _ => return None,
                    }
                    chosen = Some(index.oid);
                    Some(())
                });
                if absorbed.is_none() {
                    residual.push(conjunct);
                }
            }

            if let Some(index) = chosen {
                let scan = PhysicalPlan::IndexScan {
                    table: meta.oid,
                    index,
                    low,
                    high,
                    schema: schema.clone(),
                };
                return match and_all(residual) {
                    Some(rest) => Ok(PhysicalPlan::Filter {
                        input: Box::new(scan),
                        predicate: resolve_expr(&rest, &schema)?,
                    }),
                    None => Ok(scan),
                };
            }
        }

        let bound = Self::bind(input, ctx)?;
        let schema = bound.schema();
        Ok(PhysicalPlan::Filter {
            input: Box::new(bound),
            predicate: resolve_expr(&predicate, &schema)?,
        })
    }

    fn bind_insert(
        table: String,
        columns: Option<Vec<String>>,
        rows: Vec<Vec<Expr>>,
        ctx: &PlanningContext,
    ) -> DbResult<PhysicalPlan> {
        let meta = ctx.table(&table)?;
        let targets: Vec<usize> = match &columns {
            Some(names) => names
                .iter()
                .map(|n| meta.schema.column_index(n))
                .collect::<DbResult<Vec<_>>>()?,
            None => (0..meta.schema.len()).collect(),
        };

        let empty: [String; 0] = [];
        let mut bound_rows = Vec::with_capacity(rows.len());
        for row in rows {
            if row.len() != targets.len() {
                return Err(DbError::Semantic(format!(
                    "INSERT has {} values for {} columns",
                    row.len(),
                    targets.len()
                )));
            }
            let mut full: Vec<ResolvedExpr> =
                vec![ResolvedExpr::Literal(Value::Null); meta.schema.len()];
            for (expr, &target) in row.iter().zip(&targets) {
                full[target] = resolve_expr(expr, &empty)?;
            }
            bound_rows.push(full);
        }

        Ok(PhysicalPlan::Insert {
            table: meta.oid,
            rows: bound_rows,
        })
    }
}

// ---- helpers ----

fn qualified_schema(meta: &TableMeta, alias: &str) -> Vec<String> {
    meta.schema
        .columns()
        .iter()
        .map(|c| format!("{alias}.{}", c.name))
        .collect()
}

fn label_of(expr: &Expr) -> String {
    match expr {
        Expr::Column { table: None, name } => name.clone(),
        other => other.to_string(),
    }
}

fn is_single_qualifier(schema: &[String]) -> bool {
    let mut qualifiers = schema.iter().filter_map(|c| c.split_once('.').map(|q| q.0));
    match qualifiers.next() {
        Some(first) => qualifiers.all(|q| q == first),
        None => true,
    }
}

fn strip_qualifier(label: &str) -> String {
    label
        .split_once('.')
        .map(|(_, c)| c.to_string())
        .unwrap_or_else(|| label.to_string())
}

fn split_and(expr: Expr) -> Vec<Expr> {
    match expr {
        Expr::Binary {
            left,
            op: BinaryOp::And,
            right,
        } => {
            let mut out = split_and(*left);
            out.extend(split_and(*right));
            out
        }
        other => vec![other],
    }
}

fn and_all(conjuncts: Vec<Expr>) -> Option<Expr> {
    conjuncts
        .into_iter()
        .reduce(|acc, c| Expr::binary(acc, BinaryOp::And, c))
}

fn wrap_filter(plan: LogicalPlan, predicate: Option<Expr>) -> LogicalPlan {
    match predicate {
        Some(predicate) => LogicalPlan::Filter {
            input: Box::new(plan),
            predicate,
        },
        None => plan,
    }
}

fn collect_aliases(plan: &LogicalPlan) -> HashSet<String> {
    match plan {
        LogicalPlan::TableScan { alias, .. } => std::iter::once(alias.clone()).collect(),
        LogicalPlan::Join { left, right, .. } => {
            let mut set = collect_aliases(left);
            set.extend(collect_aliases(right));
            set
        }
        LogicalPlan::Filter { input, .. }
        | LogicalPlan::Projection { input, .. }
        | LogicalPlan::Distinct { input }
        | LogicalPlan::Sort { input, .. }
        | LogicalPlan::Limit { input, .. }
        | LogicalPlan::Aggregate { input, .. } => collect_aliases(input),
        _ => HashSet::new(),
    }
}

/// The set of table qualifiers an expression references, or `None` when
/// any reference is unqualified (side unknown).
fn qualifiers_of(expr: &Expr) -> Option<HashSet<String>> {
    fn walk(expr: &Expr, out: &mut HashSet<String>) -> bool {
        match expr {
            Expr::Literal(_) => true,
            Expr::Column { table: Some(t), .. } => {
                out.insert(t.clone());
                true
            }
            Expr::Column { table: None, .. } => false,
            Expr::Unary { expr, .. } | Expr::IsNull { expr, .. } => walk(expr, out),
            Expr::Binary { left, right, .. } => walk(left, out) && walk(right, out),
            Expr::Aggregate { arg, .. } => arg.as_ref().map_or(true, |a| walk(a, out)),
        }
    }
    let mut out = HashSet::new();
    walk(expr, &mut out).then_some(out)
}

fn collect_aggregates(expr: &Expr, out: &mut Vec<Expr>) {
    match expr {
        Expr::Aggregate { .. } => {
            if !out.contains(expr) {
                out.push(expr.clone());
            }
        }
        Expr::Unary { expr, .. } | Expr::IsNull { expr, .. } => collect_aggregates(expr, out),
        Expr::Binary { left, right, .. } => {
            collect_aggregates(left, out);
            collect_aggregates(right, out);
        }
        Expr::Literal(_) | Expr::Column { .. } => {}
    }
}

/// Resolves column names against a schema of qualified labels.
pub fn resolve_expr(expr: &Expr, schema: &[String]) -> DbResult<ResolvedExpr> {
    let eval = EvalContext::new(schema);
    fn walk(expr: &Expr, eval: &EvalContext) -> DbResult<ResolvedExpr> {
        Ok(match expr {
            Expr::Literal(v) => ResolvedExpr::Literal(v.clone()),
            Expr::Column { table, name } => {
                ResolvedExpr::Column(eval.resolve(table.as_deref(), name)?)
            }
            Expr::Unary { op, expr } => ResolvedExpr::Unary {
                op: *op,
                expr: Box::new(walk(expr, eval)?),
            },
            Expr::Binary { left, op, right } => ResolvedExpr::Binary {
                left: Box::new(walk(left, eval)?),
                op: *op,
                right: Box::new(walk(right, eval)?),
            },
            Expr::IsNull { expr, negated } => ResolvedExpr::IsNull {
                expr: Box::new(walk(expr, eval)?),
                negated: *negated,
            },
            Expr::Aggregate { .. } => {
                return Err(DbError::Semantic(
                    "aggregate is not allowed in this context".into(),
                ))
            }
        })
    }
    walk(expr, &eval)
}

/// Rewrites an expression over an aggregate's output: group expressions
/// and aggregate calls become column references into the output row.
fn resolve_over_aggregate(
    expr: &Expr,
    group_by: &[Expr],
    aggregates: &[Expr],
    agg_schema: &[String],
) -> DbResult<ResolvedExpr> {
    if let Some(pos) = group_by.iter().position(|g| g == expr) {
        return Ok(ResolvedExpr::Column(pos));
    }
    if let Some(pos) = aggregates.iter().position(|a| a == expr) {
        return Ok(ResolvedExpr::Column(group_by.len() + pos));
    }
    Ok(match expr {
        Expr::Literal(v) => ResolvedExpr::Literal(v.clone()),
        Expr::Column { table, name } => {
            // A bare column may still name a group expression's label.
            let eval = EvalContext::new(agg_schema);
            ResolvedExpr::Column(eval.resolve(table.as_deref(), name).map_err(|_| {
                DbError::Semantic(format!(
                    "column '{name}' must appear in GROUP BY or an aggregate"
                ))
            })?)
        }
        Expr::Unary { op, expr } => ResolvedExpr::Unary {
            op: *op,
            expr: Box::new(resolve_over_aggregate(expr, group_by, aggregates, agg_schema)?),
        },
        Expr::Binary { left, op, right } => ResolvedExpr::Binary {
            left: Box::new(resolve_over_aggregate(left, group_by, aggregates, agg_schema)?),
            op: *op,
            right: Box::new(resolve_over_aggregate(
                right, group_by, aggregates, agg_schema,
            )?),
        },
        Expr::IsNull { expr, negated } => ResolvedExpr::IsNull {
            expr: Box::new(resolve_over_aggregate(expr, group_by, aggregates, agg_schema)?),
            negated: *negated,
        },
        Expr::Aggregate { .. } => {
            return Err(DbError::Internal(
                "aggregate missing from the aggregate list".into(),
            ))
        }
    })
}

/// `col op literal` (or mirrored) conjunct usable for an index probe.
fn index_conjunct(expr: &Expr, eval: &EvalContext) -> Option<(usize, BinaryOp, Value)> {
    let Expr::Binary { left, op, right } = expr else {
        return None;
    };
    let op = *op;
    if !matches!(
        op,
        BinaryOp::Eq | BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge
    ) {
        return None;
    }
    match (&**left, &**right) {
        (Expr::Column { table, name }, Expr::Literal(v)) if !v.is_null() => {
            let ordinal = eval.resolve(table.as_deref(), name).ok()?;
            Some((ordinal, op, v.clone()))
        }
        (Expr::Literal(v), Expr::Column { table, name }) if !v.is_null() => {
            let ordinal = eval.resolve(table.as_deref(), name).ok()?;
            let flipped = match op {
                BinaryOp::Lt => BinaryOp::Gt,
                BinaryOp::Le => BinaryOp::Ge,
                BinaryOp::Gt => BinaryOp::Lt,
                BinaryOp::Ge => BinaryOp::Le,
                other => other,
            };
            Some((ordinal, flipped, v.clone()))
        }
        _ => None,
    }
}

/// `Column(i) = Column(j)` with one side from each input.
fn equi_join_keys(condition: &ResolvedExpr, left_len: usize) -> Option<(usize, usize)> {
    let ResolvedExpr::Binary {
        left,
        op: BinaryOp::Eq,
        right,
    } = condition
    else {
        return None;
    };
    match (&**left, &**right) {
        (ResolvedExpr::Column(a), ResolvedExpr::Column(b)) => {
            if *a < left_len && *b >= left_len {
                Some((*a, *b - left_len))
            } else if *b < left_len && *a >= left_len {
                Some((*b, *a - left_len))
            } else {
                None
            }
        }
        _ => None,
    }
}
