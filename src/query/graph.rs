//! Directed graphs of n-grams: the query decomposition engine.
//!
//! A query graph is interpreted as: "a file can match if there is at
//! least one path from a source to a sink such that the file contains the
//! n-gram of every node on the path". Sources are nodes with no incoming
//! edges, sinks are nodes with no outgoing edges. For example:
//!
//! ```text
//!  ABC -> BCD -> CDE
//! ```
//!
//! matches files containing all of "ABC", "BCD" and "CDE", while
//!
//! ```text
//!          BCX -> CXE -> XEF
//!  ABC -<                     >- EFG
//!          BCY -> CYE -> YEF
//! ```
//!
//! matches files with ABC, EFG and either (BCX, CXE, XEF) or
//! (BCY, CYE, YEF) - the most precise 3-gram decomposition of the query
//! "ABC(X|Y)EFG".

use crate::error::IndexResult;
use crate::query::{QString, QueryCounters, QueryResult, QToken};

/// Resolves one packed n-gram window to a posting-run result.
pub type QueryOracle<'a> = dyn FnMut(u64) -> IndexResult<QueryResult> + 'a;

#[derive(Debug, Clone)]
struct QueryGraphNode {
    // N-gram with implicit n, packed big-endian. For example 0x112233
    // represents {11 22 33}. Wide enough for the 8-byte window types.
    gram: u64,

    // Adjacency list; indices into the parent graph's `nodes`.
    edges: Vec<usize>,
}

/// A DAG of n-grams. Built strictly left-to-right from a query string, so
/// it stays acyclic by construction.
#[derive(Debug, Clone, Default)]
pub struct QueryGraph {
    nodes: Vec<QueryGraphNode>,
    sources: Vec<usize>,
}

impl QueryGraph {
    #[must_use]
    pub fn size(&self) -> usize {
        self.nodes.len()
    }

    fn make_node(&mut self, gram: u64) -> usize {
        self.nodes.push(QueryGraphNode {
            gram,
            edges: Vec::new(),
        });
        self.nodes.len() - 1
    }

    /// Converts a query string to a naive graph of 1-grams. For example,
    /// "ABCD" becomes `A -> B -> C -> D`.
    #[must_use]
    pub fn from_qstring(qstr: &[QToken]) -> Self {
        let mut result = QueryGraph::default();

        let mut sinks: Vec<usize> = Vec::new();
        for token in qstr {
            let mut new_sinks = Vec::with_capacity(token.possible_values().len());
            for &opt in token.possible_values() {
                let node = result.make_node(u64::from(opt));
                for &left in &sinks {
                    result.nodes[left].edges.push(node);
                }
                new_sinks.push(node);
            }
            if result.sources.is_empty() {
                result.sources = new_sinks.clone();
            }
            sinks = new_sinks;
        }

        result
    }

    /// Constructs the edge-to-vertex dual, merging adjacent n-grams. This
    /// transformation preserves the set of matching files; applied w-1
    /// times to a 1-gram graph it yields the graph of w-grams. For
    /// example:
    ///
    /// ```text
    ///              X                          BX -> XC
    /// A -> B  -<      >-  C -> D   =>  AB -<            >- CD
    ///              Y                          BY -> YC
    /// ```
    #[must_use]
    pub fn dual(&self) -> Self {
        let mut result = QueryGraph::default();

        let mut newnodes = std::collections::BTreeMap::new();
        for src in 0..self.nodes.len() {
            for &dst in &self.nodes[src].edges {
                let gram = (self.nodes[src].gram << 8) | (self.nodes[dst].gram & 0xFF);
                let node = result.make_node(gram);
                newnodes.insert((src, dst), node);
            }
        }
        for &src in &self.sources {
            for &dst in &self.nodes[src].edges {
                result.sources.push(newnodes[&(src, dst)]);
            }
        }
        for (&(_, via), &node) in &newnodes {
            for &target in &self.nodes[via].edges {
                let successor = newnodes[&(via, target)];
                result.nodes[node].edges.push(successor);
            }
        }

        result
    }

    /// Parallel disjunction: either graph may provide the matching path.
    pub fn join(&mut self, mut other: QueryGraph) {
        let offset = self.nodes.len();
        for node in &mut other.nodes {
            for edge in &mut node.edges {
                *edge += offset;
            }
        }
        self.nodes.append(&mut other.nodes);
        self.sources
            .extend(other.sources.into_iter().map(|src| src + offset));
    }

    /// Evaluates the graph: a topological sweep from sources to sinks.
    ///
    /// Each node's state is `oracle(gram)` intersected with the union of
    /// its predecessors' states (an empty predecessor set constrains
    /// nothing); the final result is the union of all sink states. A
    /// graph with no sources represents no constraint at all.
    pub fn run(
        &self,
        oracle: &mut QueryOracle<'_>,
        counters: &mut QueryCounters,
    ) -> IndexResult<QueryResult> {
        if self.sources.is_empty() {
            return Ok(QueryResult::everything());
        }

        let mut total_preds = vec![0u32; self.nodes.len()];
        for node in &self.nodes {
            for &target in &node.edges {
                total_preds[target] += 1;
            }
        }

        let mut ready_preds: Vec<Vec<usize>> = vec![Vec::new(); self.nodes.len()];
        let mut states: Vec<QueryResult> = vec![QueryResult::everything(); self.nodes.len()];
        let mut ready: Vec<usize> = self.sources.clone();

        let mut result = QueryResult::empty();
        while let Some(node) = ready.pop() {
            let mask = oracle(self.nodes[node].gram)?;
            states[node] = masked_or(&ready_preds[node], &states, mask, counters);

            for &succ in &self.nodes[node].edges {
                ready_preds[succ].push(node);
                if ready_preds[succ].len() as u32 >= total_preds[succ] {
                    ready.push(succ);
                }
            }

            if self.nodes[node].edges.is_empty() {
                let mut sink_state = states[node].clone();
                result.do_or(&mut sink_state, &mut counters.ors);
            }
        }

        Ok(result)
    }

    #[cfg(test)]
    fn grams_of_single_path(&self) -> Option<Vec<u64>> {
        // Follows the unique path of a linear graph; fails on branching.
        let mut out = Vec::new();
        let mut current = match self.sources.as_slice() {
            [only] => *only,
            _ => return None,
        };
        loop {
            out.push(self.nodes[current].gram);
            match self.nodes[current].edges.as_slice() {
                [] => return Some(out),
                [next] => current = *next,
                _ => return None,
            }
        }
    }
}

fn masked_or(
    preds: &[usize],
    states: &[QueryResult],
    mut mask: QueryResult,
    counters: &mut QueryCounters,
) -> QueryResult {
    if preds.is_empty() {
        return mask;
    }
    let mut result = QueryResult::empty();
    for &pred in preds {
        let mut alternative = states[pred].clone();
        alternative.do_and(&mut mask, &mut counters.ands);
        result.do_or(&mut alternative, &mut counters.ors);
    }
    result
}

/// Expands a query string to a query graph of `ngram_size`-grams, while
/// keeping the graph from blowing up on wildcards.
///
/// The string is scanned left to right and split into subgraphs grown
/// greedily under two bounds: a position may only start or end a subgraph
/// when it has at most `max_edge` candidate bytes (so a subquery never
/// starts with a pure wildcard), and a subgraph is only extended while
/// the number of concrete w-grams at its tip stays within `max_ngram`.
/// The subgraphs are joined as alternatives. This is a limiting
/// heuristic: it cannot account for more complex token structure, but it
/// supports everything the parser can produce.
#[must_use]
pub fn to_query_graph(
    qstr: &QString,
    ngram_size: usize,
    max_edge: u64,
    max_ngram: u64,
) -> QueryGraph {
    let mut result = QueryGraph::default();

    tracing::debug!("Expand+prune for a query graph, window={}", ngram_size);

    let mut offset = 0;
    while offset < qstr.len() {
        // Look for a position that may start a subgraph.
        if qstr[offset].num_possible_values() > max_edge {
            offset += 1;
            continue;
        }

        // Take the first ngram_size - 1 tokens unconditionally.
        let mut tokens: Vec<QToken> = Vec::new();
        for _ in 0..ngram_size - 1 {
            if offset >= qstr.len() {
                break;
            }
            tokens.push(qstr[offset].clone());
            offset += 1;
        }

        // Extend while the w-gram at the tip stays small enough.
        while offset < qstr.len() {
            let mut num_possible: u64 = 1;
            for i in 0..ngram_size {
                num_possible = num_possible.saturating_mul(qstr[offset - i].num_possible_values());
            }
            if num_possible > max_ngram {
                break;
            }
            tokens.push(qstr[offset].clone());
            offset += 1;
        }

        // Finally, prune the subquery from the right. This terminates
        // because the first token is already within max_edge.
        while tokens
            .last()
            .is_some_and(|token| token.num_possible_values() > max_edge)
        {
            tokens.pop();
        }

        if tokens.len() < ngram_size {
            continue;
        }

        let mut subgraph = QueryGraph::from_qstring(&tokens);
        for _ in 0..ngram_size - 1 {
            subgraph = subgraph.dual();
        }
        result.join(subgraph);
    }

    tracing::debug!("Query graph expansion succeeded ({} nodes)", result.size());
    result
}
