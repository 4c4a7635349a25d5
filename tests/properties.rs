//! Property tests for the run codec, the sorted-run algebra, and the
//! query-graph decomposition.

use proptest::prelude::*;
use std::collections::HashMap;

use ursadb::ngram::all_grams;
use ursadb::query::{qstring_from_bytes, Query, QueryCounters, QueryPlan, QueryResult};
use ursadb::run::{compress_run, read_compressed_run, SortedRun};
use ursadb::types::{FileId, IndexType};

/// Strictly ascending FileId sequences, built from positive deltas.
fn ascending_fids() -> impl Strategy<Value = Vec<FileId>> {
    prop::collection::vec(1u32..100_000, 0..200).prop_map(|deltas| {
        let mut out = Vec::with_capacity(deltas.len());
        let mut current: u32 = 0;
        for (i, delta) in deltas.into_iter().enumerate() {
            // The first value may be zero, later ones must grow.
            current = if i == 0 { delta - 1 } else { current + delta };
            out.push(FileId::new(current));
        }
        out
    })
}

fn run(ids: &[FileId]) -> SortedRun {
    SortedRun::from_sorted(ids.to_vec())
}

fn union(a: &SortedRun, b: &SortedRun) -> Vec<FileId> {
    let mut a = a.clone();
    let mut b = b.clone();
    a.do_or(&mut b);
    a.into_sorted_vec()
}

fn intersect(a: &SortedRun, b: &SortedRun) -> Vec<FileId> {
    let mut a = a.clone();
    let mut b = b.clone();
    a.do_and(&mut b);
    a.into_sorted_vec()
}

fn pick(cutoff: usize, sources: &[SortedRun]) -> Vec<FileId> {
    let mut sources = sources.to_vec();
    SortedRun::pick_common(cutoff, &mut sources).into_sorted_vec()
}

proptest! {
    #[test]
    fn run_codec_round_trips(ids in ascending_fids()) {
        let compressed = compress_run(&ids);
        prop_assert_eq!(read_compressed_run(&compressed), ids);
    }

    #[test]
    fn compressed_and_decoded_runs_behave_identically(
        a in ascending_fids(),
        b in ascending_fids(),
    ) {
        let decoded = (run(&a), run(&b));
        let compressed = (
            SortedRun::from_compressed(compress_run(&a)),
            SortedRun::from_compressed(compress_run(&b)),
        );
        prop_assert_eq!(
            union(&decoded.0, &decoded.1),
            union(&compressed.0, &compressed.1)
        );
        prop_assert_eq!(
            intersect(&decoded.0, &decoded.1),
            intersect(&compressed.0, &compressed.1)
        );
    }

    #[test]
    fn union_is_commutative_associative_idempotent(
        a in ascending_fids(),
        b in ascending_fids(),
        c in ascending_fids(),
    ) {
        let (a, b, c) = (run(&a), run(&b), run(&c));
        prop_assert_eq!(union(&a, &b), union(&b, &a));
        prop_assert_eq!(
            union(&run(&union(&a, &b)), &c),
            union(&a, &run(&union(&b, &c)))
        );
        prop_assert_eq!(union(&a, &a), a.clone().into_sorted_vec());
    }

    #[test]
    fn intersect_is_commutative_associative_idempotent(
        a in ascending_fids(),
        b in ascending_fids(),
        c in ascending_fids(),
    ) {
        let (a, b, c) = (run(&a), run(&b), run(&c));
        prop_assert_eq!(intersect(&a, &b), intersect(&b, &a));
        prop_assert_eq!(
            intersect(&run(&intersect(&a, &b)), &c),
            intersect(&a, &run(&intersect(&b, &c)))
        );
        prop_assert_eq!(intersect(&a, &a), a.clone().into_sorted_vec());
    }

    #[test]
    fn pick_common_generalizes_union_and_intersection(
        a in ascending_fids(),
        b in ascending_fids(),
        c in ascending_fids(),
    ) {
        let sources = vec![run(&a), run(&b), run(&c)];

        // k=1 is the union of all sources.
        let mut expected_union = union(&sources[0], &sources[1]);
        expected_union = union(&run(&expected_union), &sources[2]);
        prop_assert_eq!(pick(1, &sources), expected_union);

        // k=n is the intersection of all sources.
        let mut expected_intersection = intersect(&sources[0], &sources[1]);
        expected_intersection = intersect(&run(&expected_intersection), &sources[2]);
        prop_assert_eq!(pick(3, &sources), expected_intersection);

        // Raising k never adds results.
        for k in 1..3 {
            let lower = pick(k, &sources);
            let higher = pick(k + 1, &sources);
            prop_assert!(higher.iter().all(|fid| lower.contains(fid)));
        }
    }

    /// For a concrete pattern, the graph decomposition visits exactly the
    /// pattern's w-grams (the dual identity applied w-1 times).
    #[test]
    fn concrete_patterns_decompose_into_their_wgrams(
        pattern in prop::collection::vec(any::<u8>(), 3..24),
    ) {
        let query = Query::Literal(qstring_from_bytes(&pattern));
        let plan = QueryPlan::compile(&query, IndexType::Gram3, 16, 65536);

        let mut visited = Vec::new();
        let mut counters = QueryCounters::default();
        let mut oracle = |gram: u64| -> ursadb::error::IndexResult<QueryResult> {
            visited.push(gram);
            Ok(QueryResult::everything())
        };
        plan.run(&mut oracle, &mut counters).unwrap();

        let mut expected: Vec<u64> = pattern
            .windows(3)
            .map(|w| (u64::from(w[0]) << 16) | (u64::from(w[1]) << 8) | u64::from(w[2]))
            .collect();
        expected.sort_unstable();
        expected.dedup();
        visited.sort_unstable();
        visited.dedup();
        prop_assert_eq!(visited, expected);
    }

    /// Index soundness at the decomposition level: a query for any
    /// substring of a file must keep that file in the result.
    #[test]
    fn queries_never_lose_matching_files(
        files in prop::collection::vec(prop::collection::vec(any::<u8>(), 0..120), 1..8),
        pattern_file in any::<prop::sample::Index>(),
        pattern_start in any::<prop::sample::Index>(),
        pattern_len in 3usize..10,
    ) {
        // Build a posting oracle exactly like an index would.
        let mut postings: HashMap<u64, Vec<FileId>> = HashMap::new();
        for (fid, data) in files.iter().enumerate() {
            let mut grams: Vec<u64> = all_grams(IndexType::Gram3, data)
                .into_iter()
                .map(|gram| u64::from(gram.as_u32()))
                .collect();
            grams.sort_unstable();
            grams.dedup();
            for gram in grams {
                postings.entry(gram).or_default().push(FileId::new(fid as u32));
            }
        }

        let chosen = pattern_file.index(files.len());
        let data = &files[chosen];
        prop_assume!(data.len() >= 3);
        let start = pattern_start.index(data.len().saturating_sub(2));
        let len = pattern_len.min(data.len() - start);
        prop_assume!(len >= 3);
        let pattern = &data[start..start + len];

        let query = Query::Literal(qstring_from_bytes(pattern));
        let plan = QueryPlan::compile(&query, IndexType::Gram3, 16, 65536);
        let mut counters = QueryCounters::default();
        let mut oracle = |gram: u64| -> ursadb::error::IndexResult<QueryResult> {
            Ok(match postings.get(&gram) {
                Some(fids) => QueryResult::from_run(SortedRun::from_sorted(fids.clone())),
                None => QueryResult::from_run(SortedRun::empty()),
            })
        };
        let result = plan.run(&mut oracle, &mut counters).unwrap();

        let matched = result.is_everything()
            || result
                .into_run()
                .into_sorted_vec()
                .contains(&FileId::new(chosen as u32));
        prop_assert!(matched, "file {} lost for pattern {:?}", chosen, pattern);
    }
}
