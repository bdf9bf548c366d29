#![allow(missing_docs)]

use sendero::{
    Encoding, KeyFormat, NewNode, NodeId, PathConfig, SqliteStore, TreeEngine, TreeError,
};

fn setup_engine(step: i64) -> TreeEngine<SqliteStore> {
    let config = PathConfig::sparse(["name"])
        .expect("config")
        .with_encoding(Encoding::Key(KeyFormat { step }));
    let store = SqliteStore::open_in_memory(config.encoding.clone()).expect("store");
    TreeEngine::new(store, config).expect("engine")
}

fn add(engine: &mut TreeEngine<SqliteStore>, parent: Option<NodeId>, name: &str) -> NodeId {
    let node = match parent {
        Some(parent) => NewNode::child_of(parent),
        None => NewNode::root(),
    };
    engine.insert(node.with("name", name)).expect("insert").id
}

fn path_text(engine: &TreeEngine<SqliteStore>, id: NodeId) -> String {
    let path = engine.get(id).expect("node").path.expect("path set");
    engine.config().encoding.format(&path).expect("format")
}

#[test]
fn inserts_take_midpoints_without_touching_siblings() {
    let mut engine = setup_engine(1);
    let a = add(&mut engine, None, "a");
    let c = add(&mut engine, None, "c");
    assert_eq!(path_text(&engine, a), "0");
    assert_eq!(path_text(&engine, c), "1");

    let b = add(&mut engine, None, "b");
    assert_eq!(path_text(&engine, b), "0.5");
    let ab = add(&mut engine, None, "ab");
    assert_eq!(path_text(&engine, ab), "0.25");

    assert_eq!(path_text(&engine, a), "0");
    assert_eq!(path_text(&engine, b), "0.5");
    assert_eq!(path_text(&engine, c), "1");
    assert!(engine.verify().expect("verify").success);
}

#[test]
fn ends_of_a_group_step_outwards() {
    let mut engine = setup_engine(2);
    let m = add(&mut engine, None, "m");
    let z = add(&mut engine, None, "z");
    let a = add(&mut engine, None, "a");
    assert_eq!(path_text(&engine, m), "0");
    assert_eq!(path_text(&engine, z), "2");
    assert_eq!(path_text(&engine, a), "-2");

    let child = add(&mut engine, Some(a), "child");
    assert_eq!(path_text(&engine, child), "-2/0");
    let roots = engine.query().roots().expect("roots");
    let order: Vec<_> = roots.iter().map(|n| n.id).collect();
    assert_eq!(order, vec![a, m, z]);
}

#[test]
fn rank_changes_move_one_key_and_its_subtree() {
    let mut engine = setup_engine(2);
    let a = add(&mut engine, None, "a");
    let b = add(&mut engine, None, "b");
    let c = add(&mut engine, None, "c");
    let a1 = add(&mut engine, Some(a), "a1");

    engine.set_attribute(a, "name", "bb").expect("rename");
    assert_eq!(path_text(&engine, a), "3");
    assert_eq!(path_text(&engine, a1), "3/0");
    assert_eq!(path_text(&engine, b), "2");
    assert_eq!(path_text(&engine, c), "4");
}

#[test]
fn exhausted_precision_is_reported_and_fixed_by_rebuild() {
    let mut engine = setup_engine(2);
    add(&mut engine, None, "a");
    add(&mut engine, None, "z");

    let mut failure = None;
    for n in (0..500).rev() {
        let name = format!("m{n:03}");
        match engine.insert(NewNode::root().with("name", name)) {
            Ok(_) => {}
            Err(err) => {
                failure = Some(err);
                break;
            }
        }
    }
    let err = failure.expect("precision runs out");
    assert!(matches!(err, TreeError::KeyPrecision { .. }));
    assert!(err.is_user_error());
    assert!(engine.verify().expect("verify").success);

    let report = engine.rebuild().expect("rebuild");
    assert!(report.set_based);
    let roots = engine.query().roots().expect("roots");
    let last = roots.last().expect("roots");
    assert_eq!(
        engine
            .config()
            .encoding
            .format(last.path.as_ref().expect("path"))
            .expect("format"),
        ((roots.len() - 1) * 2).to_string()
    );
    engine
        .insert(NewNode::root().with("name", "m999"))
        .expect("insert after respacing");
}
