//! End-to-end tests through the dispatch pipeline: index, select with
//! combinators and wildcards, iterators, taints, compaction, reindex.

mod common;

use common::TestEnv;
use ursadb::db::DatabaseLock;

fn dataset_ids(env: &mut TestEnv) -> Vec<String> {
    let response = env.request("topology;");
    assert_eq!(response.type_name(), "topology");
    response.content()["result"]["datasets"]
        .as_object()
        .expect("datasets object")
        .keys()
        .cloned()
        .collect()
}

#[test]
fn boolean_composition_follows_set_semantics() {
    let mut env = TestEnv::new();
    env.write_sample("football.bin", b"football rules");
    env.write_sample("footing.bin", b"solid footing");
    env.write_sample("ingest.bin", b"data ingest");
    env.index_samples("gram3");

    assert_eq!(
        env.select_names("\"foot\""),
        vec!["football.bin", "footing.bin"]
    );
    assert_eq!(env.select_names("\"foot\" & \"ing\""), vec!["footing.bin"]);
    assert_eq!(
        env.select_names("\"foot\" | \"ing\""),
        vec!["football.bin", "footing.bin", "ingest.bin"]
    );
    assert_eq!(env.select_names("\"nothing here\""), Vec::<String>::new());
}

#[test]
fn min_of_counts_matching_terms() {
    let mut env = TestEnv::new();
    env.write_sample("wingtool.bin", b"wing tool");
    env.write_sample("toolless.bin", b"tool less");
    env.write_sample("wingless.bin", b"wing less");
    env.write_sample("onlywing.bin", b"wing only");
    env.index_samples("gram3");

    assert_eq!(
        env.select_names("min 2 of (\"wing\", \"tool\", \"less\")"),
        vec!["toolless.bin", "wingless.bin", "wingtool.bin"]
    );
    assert_eq!(
        env.select_names("min 1 of (\"wing\", \"tool\", \"less\")"),
        vec!["onlywing.bin", "toolless.bin", "wingless.bin", "wingtool.bin"]
    );
    assert_eq!(
        env.select_names("min 3 of (\"wing\", \"tool\", \"less\")"),
        Vec::<String>::new()
    );
}

#[test]
fn hex_wildcards_match_by_nibble() {
    let mut env = TestEnv::new();
    env.write_sample("msm.bin", b"__MSM__");
    env.write_sample("m0m.bin", b"__M\x00M__");
    env.write_sample("mxm.bin", b"__MxM__");
    env.index_samples("gram3");

    // Full wildcard in the middle: all three middle bytes match.
    assert_eq!(
        env.select_names("{ 4D ?? 4D }"),
        vec!["m0m.bin", "msm.bin", "mxm.bin"]
    );
    // Fixed low nibble 3: only 'S' (0x53) qualifies.
    assert_eq!(env.select_names("{ 4D ?3 4D }"), vec!["msm.bin"]);
    // Fixed high nibble 5: again only 'S'.
    assert_eq!(env.select_names("{ 4D 5? 4D }"), vec!["msm.bin"]);
}

#[test]
fn iterators_pop_disjoint_slices_until_exhausted() {
    let mut env = TestEnv::new();
    for i in 0..4 {
        env.write_sample(&format!("file{i}.bin"), format!("needle {i}").as_bytes());
    }
    env.index_samples("gram3");

    let response = env.request("select into iterator \"needle\";");
    assert_eq!(response.type_name(), "select");
    let result = &response.content()["result"];
    assert_eq!(result["mode"], "iterator");
    assert_eq!(result["file_count"], 4);
    let iterator_id = result["iterator"].as_str().expect("iterator id").to_string();

    let pop = |env: &mut TestEnv| -> Vec<String> {
        let response = env.request(&format!("iterator \"{iterator_id}\" pop 2;"));
        assert_eq!(response.type_name(), "select", "pop failed: {response}");
        response.content()["result"]["files"]
            .as_array()
            .expect("files")
            .iter()
            .map(|v| v.as_str().unwrap().to_string())
            .collect()
    };

    let first = pop(&mut env);
    let second = pop(&mut env);
    assert_eq!(first.len(), 2);
    assert_eq!(second.len(), 2);
    assert!(first.iter().all(|file| !second.contains(file)));

    let mut all: Vec<String> = first.into_iter().chain(second).collect();
    all.sort();
    assert_eq!(all, env.select("\"needle\""));

    // Fully consumed: the iterator is gone now.
    let response = env.request(&format!("iterator \"{iterator_id}\" pop 2;"));
    assert_eq!(response.type_name(), "error");
}

#[test]
fn compaction_preserves_query_results() {
    let mut env = TestEnv::new();
    env.write_sample("batch1/alpha.bin", b"shared marker alpha");
    env.write_sample("batch1/beta.bin", b"shared marker beta");
    env.write_sample("batch2/gamma.bin", b"shared marker gamma");
    env.write_sample("batch2/delta.bin", b"unrelated content");
    let batch1 = env.dir.path().join("samples/batch1");

    let response = env.request(&format!(
        "index \"{}\" with [gram3];",
        batch1.to_string_lossy()
    ));
    assert_eq!(response.type_name(), "ok");
    let batch2 = env.dir.path().join("samples/batch2");
    let response = env.request(&format!(
        "index \"{}\" with [gram3];",
        batch2.to_string_lossy()
    ));
    assert_eq!(response.type_name(), "ok");

    assert_eq!(dataset_ids(&mut env).len(), 2);
    let before_marker = env.select_names("\"shared marker\"");
    let before_alpha = env.select_names("\"alpha\"");
    assert_eq!(
        before_marker,
        vec!["alpha.bin", "beta.bin", "gamma.bin"]
    );

    let response = env.request("compact all;");
    assert_eq!(response.type_name(), "ok", "compact failed: {response}");
    assert_eq!(dataset_ids(&mut env).len(), 1);

    assert_eq!(env.select_names("\"shared marker\""), before_marker);
    assert_eq!(env.select_names("\"alpha\""), before_alpha);
}

#[test]
fn taint_filtering_limits_selects() {
    let mut env = TestEnv::new();
    env.write_sample("a/secret.bin", b"classified needle");
    env.write_sample("b/public.bin", b"public needle");
    let a = env.dir.path().join("samples/a");
    let b = env.dir.path().join("samples/b");
    env.request(&format!("index \"{}\";", a.to_string_lossy()));
    env.request(&format!("index \"{}\";", b.to_string_lossy()));

    // Find the dataset holding the secret file: taint candidates one by
    // one and check what a tainted select still sees.
    let ids = dataset_ids(&mut env);
    assert_eq!(ids.len(), 2);

    let mut secret_id = None;
    for id in &ids {
        let response = env.request(&format!("dataset \"{id}\" taint \"secret\";"));
        assert_eq!(response.type_name(), "ok");
        let seen = env.select_names("with taints [\"secret\"] \"classified\"");
        let response = env.request(&format!("dataset \"{id}\" untaint \"secret\";"));
        assert_eq!(response.type_name(), "ok");
        if seen == vec!["secret.bin"] {
            secret_id = Some(id.clone());
        }
    }
    let secret_id = secret_id.expect("a dataset contains the secret file");

    // With the taint in place, untainted data disappears from the view.
    env.request(&format!("dataset \"{secret_id}\" taint \"secret\";"));
    assert_eq!(
        env.select_names("with taints [\"secret\"] \"needle\""),
        vec!["secret.bin"]
    );
    assert_eq!(
        env.select_names("\"needle\""),
        vec!["public.bin", "secret.bin"]
    );

    // Differently tainted datasets refuse to merge; compaction skips
    // them and reports no candidates.
    let response = env.request("compact smart;");
    assert_eq!(response.type_name(), "ok");
    assert_eq!(dataset_ids(&mut env).len(), 2);
}

#[test]
fn reindex_replaces_the_dataset_with_new_types() {
    let mut env = TestEnv::new();
    env.write_sample("doc.bin", b"readable sample text");
    env.index_samples("gram3");

    let ids = dataset_ids(&mut env);
    assert_eq!(ids.len(), 1);
    let response = env.request(&format!("reindex \"{}\" with [gram3, text4];", ids[0]));
    assert_eq!(response.type_name(), "ok", "reindex failed: {response}");

    let ids_after = dataset_ids(&mut env);
    assert_eq!(ids_after.len(), 1);
    assert_ne!(ids[0], ids_after[0]);

    let response = env.request("topology;");
    let indexes = response.content()["result"]["datasets"][&ids_after[0]]["indexes"]
        .as_array()
        .expect("indexes")
        .len();
    assert_eq!(indexes, 2);

    assert_eq!(env.select_names("\"readable\""), vec!["doc.bin"]);
}

#[test]
fn dataset_drop_removes_results() {
    let mut env = TestEnv::new();
    env.write_sample("gone.bin", b"ephemeral needle");
    env.index_samples("gram3");

    assert_eq!(env.select_names("\"ephemeral\""), vec!["gone.bin"]);
    let ids = dataset_ids(&mut env);
    let response = env.request(&format!("dataset \"{}\" drop;", ids[0]));
    assert_eq!(response.type_name(), "ok");

    assert!(dataset_ids(&mut env).is_empty());
    assert_eq!(env.select_names("\"ephemeral\""), Vec::<String>::new());
}

#[test]
fn empty_files_are_skipped_not_fatal() {
    let mut env = TestEnv::new();
    env.write_sample("empty.bin", b"");
    env.write_sample("full.bin", b"some content");
    env.index_samples("gram3");

    let response = env.request("topology;");
    let datasets = response.content()["result"]["datasets"]
        .as_object()
        .expect("datasets");
    let file_count: u64 = datasets
        .values()
        .map(|dataset| dataset["file_count"].as_u64().unwrap())
        .sum();
    assert_eq!(file_count, 1);
}

#[test]
fn config_round_trips_through_commands() {
    let mut env = TestEnv::new();

    let response = env.request("config get;");
    assert_eq!(response.type_name(), "config");
    assert_eq!(response.content()["result"]["keys"]["query_max_edge"], 16);

    let response = env.request("config set \"merge_max_datasets\" 5;");
    assert_eq!(response.type_name(), "ok");

    let response = env.request("config get \"merge_max_datasets\";");
    assert_eq!(response.content()["result"]["keys"]["merge_max_datasets"], 5);

    let response = env.request("config get \"no_such_key\";");
    assert_eq!(response.type_name(), "error");
}

#[test]
fn ping_status_and_errors_have_the_right_shape() {
    let mut env = TestEnv::new();

    let response = env.request("ping;");
    assert_eq!(response.type_name(), "ping");
    assert_eq!(response.content()["result"]["connection_id"], "test-client");

    let response = env.request("status;");
    assert_eq!(response.type_name(), "status");
    assert!(response.content()["result"]["tasks"].is_array());

    let response = env.request("this is not a command;");
    assert_eq!(response.type_name(), "error");
    assert_eq!(response.content()["error"]["retry"], false);
}

#[test]
fn overlapping_locks_are_refused_until_commit() {
    let mut env = TestEnv::new();

    let lock = || vec![DatabaseLock::Dataset("abcd1234".to_string())];
    let spec = env.db.allocate_task("a;", "t1", lock()).unwrap();
    assert!(env.db.allocate_task("b;", "t2", lock()).is_err());
    // A different resource is fine.
    let other = vec![DatabaseLock::Iterator("abcd1234".to_string())];
    assert!(env.db.allocate_task("c;", "t3", other).is_ok());

    // Locks are released when the task is gone.
    env.db.erase_task(spec.id());
    assert!(env.db.allocate_task("d;", "t4", lock()).is_ok());
}
