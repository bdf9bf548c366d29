#![allow(missing_docs)]

use std::collections::BTreeMap;

use proptest::prelude::*;
use proptest::test_runner::TestCaseError;
use rusqlite::{params, Connection};
use sendero::query::is_ancestor_of;
use sendero::{
    GapPolicy, MemoryStore, NewNode, Node, NodeId, NodeSource, NodeStore, OrphanPolicy,
    PathConfig, Predicate, SqliteStore, Transactional, TreeEngine, TreeError,
};
use tempfile::TempDir;

/// Raw node rows: parent index into the earlier rows, and a name.
type Shape = Vec<(Option<usize>, String)>;

fn import<S: NodeStore + Transactional>(engine: &mut TreeEngine<S>, shape: &Shape) {
    engine
        .with_maintenance_disabled(|engine| {
            let mut ids: Vec<NodeId> = Vec::new();
            for (parent, name) in shape {
                let node = match parent.and_then(|idx| ids.get(idx).copied()) {
                    Some(parent) => NewNode::child_of(parent),
                    None => NewNode::root(),
                };
                ids.push(engine.insert(node.with("name", name.as_str()))?.id);
            }
            Ok(())
        })
        .expect("import");
}

fn path_map<S: NodeStore + Transactional>(engine: &TreeEngine<S>) -> BTreeMap<NodeId, String> {
    engine
        .store()
        .filter(&Predicate::All)
        .expect("all")
        .into_iter()
        .map(|node| {
            let text = node
                .path
                .as_ref()
                .map(|p| engine.config().encoding.format(p).expect("format"))
                .unwrap_or_default();
            (node.id, text)
        })
        .collect()
}

fn shape_strategy() -> impl Strategy<Value = Shape> {
    prop::collection::vec((any::<prop::sample::Index>(), any::<bool>(), "[a-e]{1,3}"), 1..40)
        .prop_map(|rows| {
            rows.into_iter()
                .enumerate()
                .map(|(idx, (pick, root, name))| {
                    let parent = (idx > 0 && !root).then(|| pick.index(idx));
                    (parent, name)
                })
                .collect()
        })
}

fn label_config() -> PathConfig {
    PathConfig::labels(2, ["name"]).expect("config")
}

fn sqlite_engine(config: PathConfig) -> TreeEngine<SqliteStore> {
    let store = SqliteStore::open_in_memory(config.encoding.clone()).expect("store");
    TreeEngine::new(store, config).expect("engine")
}

fn memory_engine(config: PathConfig) -> TreeEngine<MemoryStore> {
    TreeEngine::new(MemoryStore::new(), config).expect("engine")
}

/// Creates a node table without a foreign key so dangling parents can be stored.
fn loose_table(dir: &TempDir, rows: &[(i64, Option<i64>, &str)]) -> std::path::PathBuf {
    let path = dir.path().join("loose.db");
    let conn = Connection::open(&path).expect("open");
    conn.execute_batch(
        "CREATE TABLE tree_nodes (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            parent_id INTEGER,
            attributes TEXT NOT NULL DEFAULT '{}',
            path TEXT
        );",
    )
    .expect("schema");
    for (id, parent, name) in rows {
        conn.execute(
            "INSERT INTO tree_nodes (id, parent_id, attributes) VALUES (?1, ?2, ?3)",
            params![id, parent, format!("{{\"name\":\"{name}\"}}")],
        )
        .expect("row");
    }
    path
}

#[test]
fn set_based_and_node_by_node_rebuilds_agree() {
    let shape: Shape = vec![
        (None, "France".into()),
        (Some(0), "Normandie".into()),
        (Some(1), "Seine-Maritime".into()),
        (Some(1), "Eure".into()),
        (None, "Autriche".into()),
        (Some(4), "Tirol".into()),
        (Some(0), "Bretagne".into()),
        (Some(1), "Manche".into()),
    ];
    let mut sqlite = sqlite_engine(label_config());
    let mut memory = memory_engine(label_config());
    import(&mut sqlite, &shape);
    import(&mut memory, &shape);

    let set_based = sqlite.rebuild().expect("sqlite rebuild");
    let node_by_node = memory.rebuild().expect("memory rebuild");
    assert!(set_based.set_based);
    assert!(!node_by_node.set_based);
    assert_eq!(set_based.nodes, 8);
    assert_eq!(node_by_node.nodes, 8);
    assert_eq!(path_map(&sqlite), path_map(&memory));
    assert_eq!(path_map(&sqlite)[&3], "01.01.02");
    assert!(sqlite.verify().expect("verify").success);
}

#[test]
fn rebuild_is_idempotent() {
    let mut engine = sqlite_engine(label_config());
    import(
        &mut engine,
        &vec![(None, "b".into()), (None, "a".into()), (Some(0), "c".into())],
    );
    engine.rebuild().expect("first");
    let first = path_map(&engine);
    engine.rebuild().expect("second");
    assert_eq!(first, path_map(&engine));
    assert_eq!(first[&2], "00");
    assert_eq!(first[&3], "01.00");
}

#[test]
fn strict_orphans_fail_and_as_root_orphans_become_roots() {
    let dir = TempDir::new().expect("tempdir");
    let db = loose_table(
        &dir,
        &[(1, None, "Root"), (2, Some(1), "Child"), (3, Some(42), "Stray")],
    );

    let config = label_config();
    let store = SqliteStore::open(&db, config.encoding.clone()).expect("open");
    let mut strict = TreeEngine::new(store, config).expect("engine");
    let err = strict.rebuild().expect_err("orphan");
    assert!(matches!(err, TreeError::Integrity { node: 3, parent: 42 }));
    drop(strict);

    let config = label_config().with_orphans(OrphanPolicy::AsRoot);
    let store = SqliteStore::open(&db, config.encoding.clone()).expect("open");
    let mut lenient = TreeEngine::new(store, config).expect("engine");
    let report = lenient.rebuild().expect("rebuild");
    assert_eq!(report.nodes, 3);
    let paths = path_map(&lenient);
    assert_eq!(paths[&1], "00");
    assert_eq!(paths[&2], "00.00");
    assert_eq!(paths[&3], "01");
}

#[test]
fn cyclic_parent_data_is_corruption() {
    let dir = TempDir::new().expect("tempdir");
    let db = loose_table(
        &dir,
        &[(1, None, "Root"), (2, Some(3), "Ping"), (3, Some(2), "Pong")],
    );
    let config = label_config();
    let store = SqliteStore::open(&db, config.encoding.clone()).expect("open");
    let mut engine = TreeEngine::new(store, config).expect("engine");
    let err = engine.rebuild().expect_err("cycle");
    assert!(matches!(err, TreeError::Corruption(_)));
    assert!(path_map(&engine).values().all(String::is_empty));

    let mut memory = memory_engine(label_config());
    import(&mut memory, &vec![(None, "a".into()), (None, "b".into()), (Some(1), "c".into())]);
    let mut b = memory.get(2).expect("b");
    b.parent = Some(3);
    memory.store_mut().update(&b).expect("raw update");
    let err = memory.rebuild().expect_err("cycle");
    assert!(matches!(err, TreeError::Corruption(_)));
}

#[derive(Debug, Clone)]
enum Mutation {
    Insert { parent: Option<prop::sample::Index>, name: String },
    Move { node: prop::sample::Index, parent: Option<prop::sample::Index> },
    Rename { node: prop::sample::Index, name: String },
    Delete { node: prop::sample::Index },
}

fn mutation_strategy() -> impl Strategy<Value = Mutation> {
    let name = "[a-f]{1,2}";
    prop_oneof![
        4 => (proptest::option::of(any::<prop::sample::Index>()), name)
            .prop_map(|(parent, name)| Mutation::Insert { parent, name }),
        2 => (any::<prop::sample::Index>(), proptest::option::of(any::<prop::sample::Index>()))
            .prop_map(|(node, parent)| Mutation::Move { node, parent }),
        2 => (any::<prop::sample::Index>(), name)
            .prop_map(|(node, name)| Mutation::Rename { node, name }),
        1 => any::<prop::sample::Index>().prop_map(|node| Mutation::Delete { node }),
    ]
}

fn apply<S: NodeStore + Transactional>(engine: &mut TreeEngine<S>, mutation: &Mutation) {
    let live: Vec<NodeId> = engine
        .store()
        .filter(&Predicate::All)
        .expect("all")
        .iter()
        .map(|n| n.id)
        .collect();
    let pick = |index: &prop::sample::Index| live[index.index(live.len())];
    match mutation {
        Mutation::Insert { parent, name } => {
            let node = match parent.as_ref().filter(|_| !live.is_empty()) {
                Some(index) => NewNode::child_of(pick(index)),
                None => NewNode::root(),
            };
            engine.insert(node.with("name", name.as_str())).expect("insert");
        }
        _ if live.is_empty() => {}
        Mutation::Move { node, parent } => {
            let before = path_map(engine);
            let target = parent.as_ref().map(pick);
            match engine.move_node(pick(node), target) {
                Ok(_) => {}
                Err(TreeError::Cycle { .. }) => assert_eq!(before, path_map(engine)),
                Err(err) => panic!("move failed: {err}"),
            }
        }
        Mutation::Rename { node, name } => {
            engine
                .set_attribute(pick(node), "name", name.as_str())
                .expect("rename");
        }
        Mutation::Delete { node } => {
            engine.delete(pick(node)).expect("delete");
        }
    }
}

fn ancestry_by_parents(nodes: &BTreeMap<NodeId, Node>, ancestor: NodeId, node: NodeId) -> bool {
    let mut cursor = nodes.get(&node).and_then(|n| n.parent);
    while let Some(id) = cursor {
        if id == ancestor {
            return true;
        }
        cursor = nodes.get(&id).and_then(|n| n.parent);
    }
    false
}

/// Applies `mutations` one by one, checking the stored paths after each, then checks
/// prefix ancestry against parent references and that rebuilding changes nothing twice.
fn run_mutations<S: NodeStore + Transactional>(
    mut engine: TreeEngine<S>,
    mutations: &[Mutation],
) -> Result<(), TestCaseError> {
    for mutation in mutations {
        apply(&mut engine, mutation);
        let report = engine.verify().expect("verify");
        prop_assert!(report.success, "{:?} after {:?}", report.findings, mutation);
    }

    let nodes: BTreeMap<NodeId, Node> = engine
        .store()
        .filter(&Predicate::All)
        .expect("all")
        .into_iter()
        .map(|n| (n.id, n))
        .collect();
    for a in nodes.values() {
        for b in nodes.values() {
            prop_assert_eq!(
                is_ancestor_of(a, b, false),
                ancestry_by_parents(&nodes, a.id, b.id)
            );
        }
    }

    engine.rebuild().expect("rebuild");
    let rebuilt = path_map(&engine);
    engine.rebuild().expect("rebuild again");
    prop_assert_eq!(rebuilt, path_map(&engine));
    prop_assert!(engine.verify().expect("verify").success);
    Ok(())
}

fn sparse_config() -> PathConfig {
    PathConfig::sparse(["name"]).expect("config")
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn prop_rebuild_matches_across_stores(shape in shape_strategy()) {
        let mut sqlite = sqlite_engine(label_config());
        let mut memory = memory_engine(label_config());
        import(&mut sqlite, &shape);
        import(&mut memory, &shape);
        sqlite.rebuild().expect("sqlite rebuild");
        memory.rebuild().expect("memory rebuild");
        prop_assert_eq!(path_map(&sqlite), path_map(&memory));
    }

    #[test]
    fn prop_sparse_rebuild_matches_across_stores(shape in shape_strategy()) {
        let mut sqlite = sqlite_engine(sparse_config());
        let mut memory = memory_engine(sparse_config());
        import(&mut sqlite, &shape);
        import(&mut memory, &shape);
        sqlite.rebuild().expect("sqlite rebuild");
        memory.rebuild().expect("memory rebuild");
        prop_assert_eq!(path_map(&sqlite), path_map(&memory));
    }

    #[test]
    fn prop_label_mutations_in_memory(
        mutations in prop::collection::vec(mutation_strategy(), 1..40)
    ) {
        run_mutations(memory_engine(label_config()), &mutations)?;
    }

    #[test]
    fn prop_label_mutations_in_sqlite(
        mutations in prop::collection::vec(mutation_strategy(), 1..40)
    ) {
        run_mutations(sqlite_engine(label_config()), &mutations)?;
    }

    #[test]
    fn prop_compacting_label_mutations_in_sqlite(
        mutations in prop::collection::vec(mutation_strategy(), 1..40)
    ) {
        let config = label_config().with_gaps(GapPolicy::Compact);
        run_mutations(sqlite_engine(config), &mutations)?;
    }

    #[test]
    fn prop_sparse_mutations_in_memory(
        mutations in prop::collection::vec(mutation_strategy(), 1..40)
    ) {
        run_mutations(memory_engine(sparse_config()), &mutations)?;
    }

    #[test]
    fn prop_sparse_mutations_in_sqlite(
        mutations in prop::collection::vec(mutation_strategy(), 1..40)
    ) {
        run_mutations(sqlite_engine(sparse_config()), &mutations)?;
    }
}
