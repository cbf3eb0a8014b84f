//! Maps physical plan nodes onto their operators.

use crate::agg::AggregateExec;
use crate::dml::{DeleteExec, InsertExec, UpdateExec};
use crate::filter::FilterExec;
use crate::join::{HashJoinExec, NestedLoopJoinExec};
use crate::limit::LimitExec;
use crate::project::{DistinctExec, ProjectionExec};
use crate::scan::{IndexScanExec, SeqScanExec};
use crate::sort::SortExec;
use crate::Executor;
use planner::PhysicalPlan;

pub fn build_executor(plan: PhysicalPlan) -> Box<dyn Executor> {
    match plan {
        PhysicalPlan::SeqScan { table, schema } => Box::new(SeqScanExec::new(table, schema)),
        PhysicalPlan::IndexScan {
            table,
            index,
            low,
            high,
            schema,
        } => Box::new(IndexScanExec::new(table, index, low, high, schema)),
        PhysicalPlan::Filter { input, predicate } => {
            Box::new(FilterExec::new(build_executor(*input), predicate))
        }
        PhysicalPlan::Projection {
            input,
            exprs,
            schema,
        } => Box::new(ProjectionExec::new(build_executor(*input), exprs, schema)),
        PhysicalPlan::Distinct { input } => Box::new(DistinctExec::new(build_executor(*input))),
        PhysicalPlan::Sort { input, keys } => Box::new(SortExec::new(build_executor(*input), keys)),
        PhysicalPlan::Limit { input, limit } => {
            Box::new(LimitExec::new(build_executor(*input), limit))
        }
        PhysicalPlan::NestedLoopJoin {
            left,
            right,
            join_type,
            condition,
            schema,
        } => Box::new(NestedLoopJoinExec::new(
            build_executor(*left),
            build_executor(*right),
            join_type,
            condition,
            schema,
        )),
        PhysicalPlan::HashJoin {
            left,
            right,
            join_type,
            left_key,
            right_key,
            schema,
        } => Box::new(HashJoinExec::new(
            build_executor(*left),
            build_executor(*right),
            join_type,
            left_key,
            right_key,
            schema,
        )),
        PhysicalPlan::Aggregate {
            input,
            group_by,
            aggs,
            having,
            schema,
        } => Box::new(AggregateExec::new(
            build_executor(*input),
            group_by,
            aggs,
            having,
            schema,
        )),
        PhysicalPlan::Insert { table, rows } => Box::new(InsertExec::new(table, rows)),
        PhysicalPlan::Update {
            table,
            assignments,
            predicate,
        } => Box::new(UpdateExec::new(table, assignments, predicate)),
        PhysicalPlan::Delete { table, predicate } => Box::new(DeleteExec::new(table, predicate)),
    }
}
