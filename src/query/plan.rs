//! Per-index-type compiled queries.
//!
//! Graph expansion is comparatively expensive, so a query is compiled
//! once per index type and the compiled form is then evaluated against
//! every dataset. The compiled tree mirrors the query tree with literals
//! replaced by their query graphs.

use std::collections::{BTreeSet, HashMap};

use crate::error::IndexResult;
use crate::query::graph::{to_query_graph, QueryOracle};
use crate::query::{Query, QueryCounters, QueryGraph, QueryResult};
use crate::types::IndexType;

/// A query compiled for one index type.
#[derive(Debug, Clone)]
pub enum QueryPlan {
    Fetch(QueryGraph),
    And(Vec<QueryPlan>),
    Or(Vec<QueryPlan>),
    MinOf(u32, Vec<QueryPlan>),
}

impl QueryPlan {
    /// Compiles `query` for an index of the given type.
    #[must_use]
    pub fn compile(query: &Query, ntype: IndexType, max_edge: u64, max_ngram: u64) -> Self {
        let compile_all = |queries: &[Query]| {
            queries
                .iter()
                .map(|sub| QueryPlan::compile(sub, ntype, max_edge, max_ngram))
                .collect()
        };
        match query {
            Query::Literal(qstr) => QueryPlan::Fetch(to_query_graph(
                qstr,
                ntype.window_size(),
                max_edge,
                max_ngram,
            )),
            Query::And(queries) => QueryPlan::And(compile_all(queries)),
            Query::Or(queries) => QueryPlan::Or(compile_all(queries)),
            Query::MinOf(count, queries) => QueryPlan::MinOf(*count, compile_all(queries)),
        }
    }

    /// Evaluates the compiled query with the given posting-run oracle.
    pub fn run(
        &self,
        oracle: &mut QueryOracle<'_>,
        counters: &mut QueryCounters,
    ) -> IndexResult<QueryResult> {
        match self {
            QueryPlan::Fetch(graph) => graph.run(oracle, counters),
            QueryPlan::And(plans) => {
                let mut result = QueryResult::everything();
                for plan in plans {
                    if result.is_empty() {
                        break;
                    }
                    let mut sub = plan.run(oracle, counters)?;
                    result.do_and(&mut sub, &mut counters.ands);
                }
                Ok(result)
            }
            QueryPlan::Or(plans) => {
                let mut result = QueryResult::empty();
                for plan in plans {
                    if result.is_everything() {
                        break;
                    }
                    let mut sub = plan.run(oracle, counters)?;
                    result.do_or(&mut sub, &mut counters.ors);
                }
                Ok(result)
            }
            QueryPlan::MinOf(count, plans) => {
                let mut sources = Vec::with_capacity(plans.len());
                for plan in plans {
                    sources.push(plan.run(oracle, counters)?);
                }
                Ok(QueryResult::do_min_of(
                    *count,
                    sources,
                    &mut counters.minofs,
                ))
            }
        }
    }
}

/// One compiled plan per index type occurring in the queried datasets.
#[derive(Debug, Clone, Default)]
pub struct QueryPlanSet {
    plans: HashMap<IndexType, QueryPlan>,
}

impl QueryPlanSet {
    #[must_use]
    pub fn compile(
        query: &Query,
        types: &BTreeSet<IndexType>,
        max_edge: u64,
        max_ngram: u64,
    ) -> Self {
        let plans = types
            .iter()
            .map(|&ntype| (ntype, QueryPlan::compile(query, ntype, max_edge, max_ngram)))
            .collect();
        Self { plans }
    }

    #[must_use]
    pub fn get(&self, ntype: IndexType) -> Option<&QueryPlan> {
        self.plans.get(&ntype)
    }
}
