//! Partial and final results of index queries.

use std::time::{Duration, Instant};

use crate::run::SortedRun;

/// The result of evaluating (part of) a query against one index.
///
/// `everything` is a distinguished value meaning "no constraint": the
/// index cannot prune anything for this subquery. It is the identity of
/// `and` and the absorbing element of `or`.
#[derive(Debug, Clone)]
pub struct QueryResult {
    run: SortedRun,
    has_everything: bool,
}

impl QueryResult {
    #[must_use]
    pub fn everything() -> Self {
        Self {
            run: SortedRun::empty(),
            has_everything: true,
        }
    }

    #[must_use]
    pub fn empty() -> Self {
        Self {
            run: SortedRun::empty(),
            has_everything: false,
        }
    }

    #[must_use]
    pub fn from_run(run: SortedRun) -> Self {
        Self {
            run,
            has_everything: false,
        }
    }

    #[must_use]
    pub fn is_everything(&self) -> bool {
        self.has_everything
    }

    /// True for a definite empty result. Useful for short-circuiting.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        !self.has_everything && self.run.is_empty()
    }

    /// The underlying run. Meaningless when `is_everything()`.
    pub fn run_mut(&mut self) -> &mut SortedRun {
        &mut self.run
    }

    #[must_use]
    pub fn into_run(self) -> SortedRun {
        self.run
    }

    pub fn do_or(&mut self, other: &mut QueryResult, counter: &mut QueryCounter) {
        let op = Instant::now();
        if self.has_everything || other.has_everything {
            self.has_everything = true;
            self.run = SortedRun::empty();
        } else {
            self.run.do_or(&mut other.run);
        }
        counter.record(op);
    }

    pub fn do_and(&mut self, other: &mut QueryResult, counter: &mut QueryCounter) {
        let op = Instant::now();
        if other.has_everything {
            counter.record(op);
            return;
        }
        if self.has_everything {
            // Clone instead of stealing: the caller may intersect several
            // alternatives against the same operand.
            other.run.decompressed();
            self.run = other.run.clone();
            self.has_everything = false;
        } else {
            self.run.do_and(&mut other.run);
        }
        counter.record(op);
    }

    /// Threshold combination: files present in at least `cutoff` sources.
    ///
    /// An *everything* source holds every file, so it contributes one
    /// count to every candidate; the cutoff is lowered accordingly before
    /// the remaining runs are swept.
    #[must_use]
    pub fn do_min_of(
        cutoff: u32,
        sources: Vec<QueryResult>,
        counter: &mut QueryCounter,
    ) -> QueryResult {
        let op = Instant::now();
        let everything_count = sources.iter().filter(|s| s.is_everything()).count() as u32;
        let result = if everything_count >= cutoff {
            QueryResult::everything()
        } else {
            let cutoff = (cutoff - everything_count) as usize;
            let mut runs: Vec<SortedRun> = sources
                .into_iter()
                .filter(|s| !s.is_everything())
                .map(QueryResult::into_run)
                .collect();
            QueryResult::from_run(SortedRun::pick_common(cutoff, &mut runs))
        };
        counter.record(op);
        result
    }
}

/// Counts one kind of query operation and the time spent on it.
#[derive(Debug, Clone, Copy, Default)]
pub struct QueryCounter {
    count: u32,
    duration: Duration,
}

impl QueryCounter {
    pub fn record(&mut self, started: Instant) {
        self.count += 1;
        self.duration += started.elapsed();
    }

    pub fn add(&mut self, other: &QueryCounter) {
        self.count += other.count;
        self.duration += other.duration;
    }

    #[must_use]
    pub fn count(&self) -> u32 {
        self.count
    }

    #[must_use]
    pub fn duration_ms(&self) -> u64 {
        u64::try_from(self.duration.as_millis()).unwrap_or(u64::MAX)
    }
}

/// Per-query performance counters, aggregated across datasets.
#[derive(Debug, Clone, Copy, Default)]
pub struct QueryCounters {
    pub ands: QueryCounter,
    pub ors: QueryCounter,
    pub reads: QueryCounter,
    pub minofs: QueryCounter,
}

impl QueryCounters {
    pub fn add(&mut self, other: &QueryCounters) {
        self.ands.add(&other.ands);
        self.ors.add(&other.ors);
        self.reads.add(&other.reads);
        self.minofs.add(&other.minofs);
    }
}
