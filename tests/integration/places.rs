#![allow(missing_docs)]

use std::path::PathBuf;

use sendero::{
    NewNode, NodeId, NodeSource, Predicate, SqliteStore, TreeEngine, TreeError, TreeQuery,
};
use tempfile::TempDir;

fn setup_engine(name: &str) -> (TempDir, PathBuf, TreeEngine<SqliteStore>) {
    let dir = TempDir::new().expect("tempdir");
    let path = dir.path().join(format!("{name}.db"));
    let config = sendero::PathConfig::labels(2, ["name"]).expect("config");
    let store = SqliteStore::open(&path, config.encoding.clone()).expect("open store");
    let engine = TreeEngine::new(store, config).expect("engine");
    (dir, path, engine)
}

fn add(engine: &mut TreeEngine<SqliteStore>, parent: Option<NodeId>, name: &str) -> NodeId {
    let node = match parent {
        Some(parent) => NewNode::child_of(parent),
        None => NewNode::root(),
    };
    engine.insert(node.with("name", name)).expect("insert").id
}

fn path_text(engine: &TreeEngine<SqliteStore>, id: NodeId) -> String {
    let node = engine.get(id).expect("node");
    let path = node.path.expect("path set");
    engine.config().encoding.format(&path).expect("format")
}

fn names(nodes: &[sendero::Node]) -> Vec<&str> {
    nodes.iter().map(|n| n.text("name").unwrap_or("")).collect()
}

#[test]
fn insertion_relabels_shifted_siblings() {
    let (_dir, _path, mut engine) = setup_engine("insert");
    let france = add(&mut engine, None, "France");
    let normandie = add(&mut engine, Some(france), "Normandie");
    let seine = add(&mut engine, Some(normandie), "Seine-Maritime");
    assert_eq!(path_text(&engine, france), "00");
    assert_eq!(path_text(&engine, normandie), "00.00");
    assert_eq!(path_text(&engine, seine), "00.00.00");

    let eure = add(&mut engine, Some(normandie), "Eure");
    assert_eq!(path_text(&engine, eure), "00.00.00");
    assert_eq!(path_text(&engine, seine), "00.00.01");

    let report = engine.verify().expect("verify");
    assert!(report.success, "{:?}", report.findings);
}

#[test]
fn renaming_a_root_rewrites_descendant_prefixes() {
    let (_dir, _path, mut engine) = setup_engine("rename");
    let france = add(&mut engine, None, "France");
    let austria = add(&mut engine, None, "Österreich");
    let normandie = add(&mut engine, Some(france), "Normandie");
    let eure = add(&mut engine, Some(normandie), "Eure");
    let manche = add(&mut engine, Some(normandie), "Manche");
    let tirol = add(&mut engine, Some(austria), "Tirol");
    assert_eq!(path_text(&engine, france), "00");
    assert_eq!(path_text(&engine, austria), "01");

    engine
        .set_attribute(austria, "name", "Autriche")
        .expect("rename");
    assert_eq!(path_text(&engine, austria), "00");
    assert_eq!(path_text(&engine, tirol), "00.00");
    assert_eq!(path_text(&engine, france), "01");
    assert_eq!(path_text(&engine, normandie), "01.00");
    assert_eq!(path_text(&engine, eure), "01.00.00");
    assert_eq!(path_text(&engine, manche), "01.00.01");

    let all = engine.query().all().expect("all");
    assert_eq!(
        names(&all),
        vec!["Autriche", "Tirol", "France", "Normandie", "Eure", "Manche"]
    );
}

#[test]
fn deleting_a_branch_removes_its_descendants() {
    let (_dir, _path, mut engine) = setup_engine("delete");
    let france = add(&mut engine, None, "France");
    let bretagne = add(&mut engine, Some(france), "Bretagne");
    let normandie = add(&mut engine, Some(france), "Normandie");
    let provence = add(&mut engine, Some(france), "Provence");
    for name in ["Eure", "Manche", "Seine-Maritime"] {
        add(&mut engine, Some(normandie), name);
    }

    let removed = engine.delete(normandie).expect("delete");
    assert_eq!(removed.len(), 4);
    assert!(engine
        .store()
        .filter(&Predicate::DescendantOf {
            path: engine.get(france).expect("france").path.expect("path"),
            inclusive: false,
        })
        .expect("filter")
        .iter()
        .all(|n| n.id == bretagne || n.id == provence));
    assert_eq!(path_text(&engine, bretagne), "00.00");
    assert_eq!(path_text(&engine, provence), "00.02");

    let picardie = add(&mut engine, Some(france), "Picardie");
    assert_eq!(path_text(&engine, picardie), "00.01");
    assert_eq!(path_text(&engine, provence), "00.02");
}

#[test]
fn moving_under_a_descendant_is_a_cycle() {
    let (_dir, _path, mut engine) = setup_engine("cycle");
    let a = add(&mut engine, None, "A");
    let b = add(&mut engine, Some(a), "B");
    let c = add(&mut engine, Some(b), "C");
    let d = add(&mut engine, Some(c), "D");
    let before: Vec<_> = [a, b, c, d].iter().map(|id| path_text(&engine, *id)).collect();

    let err = engine.move_node(a, Some(d)).expect_err("cycle");
    assert!(matches!(err, TreeError::Cycle { node, parent } if node == a && parent == d));

    let after: Vec<_> = [a, b, c, d].iter().map(|id| path_text(&engine, *id)).collect();
    assert_eq!(before, after);
    assert_eq!(engine.get(a).expect("a").parent, None);
}

#[test]
fn moves_carry_subtrees_and_survive_reopen() {
    let (_dir, path, mut engine) = setup_engine("move");
    let europe = add(&mut engine, None, "Europe");
    let asia = add(&mut engine, None, "Asia");
    let japan = add(&mut engine, Some(europe), "Japan");
    let tokyo = add(&mut engine, Some(japan), "Tokyo");
    let osaka = add(&mut engine, Some(japan), "Osaka");
    add(&mut engine, Some(asia), "Korea");

    engine.move_node(japan, Some(asia)).expect("move");
    assert_eq!(path_text(&engine, japan), "00.00");
    assert_eq!(path_text(&engine, osaka), "00.00.00");
    assert_eq!(path_text(&engine, tokyo), "00.00.01");
    drop(engine);

    let config = sendero::PathConfig::labels(2, ["name"]).expect("config");
    let store = SqliteStore::open(&path, config.encoding.clone()).expect("reopen");
    let query = TreeQuery::new(&store);
    let tokyo = store.get(tokyo).expect("get").expect("tokyo");
    let ancestors = query.ancestors(&tokyo, false).expect("ancestors");
    assert_eq!(names(&ancestors), vec!["Asia", "Japan"]);
    let asia = store.get(asia).expect("get").expect("asia");
    let subtree = query.descendants(&asia, false).expect("descendants");
    assert_eq!(names(&subtree), vec!["Japan", "Osaka", "Tokyo", "Korea"]);
    assert_eq!(query.is_leaf(&tokyo).expect("leaf"), Some(true));
}

#[test]
fn moving_out_from_under_a_relabelled_parent() {
    let (_dir, _path, mut engine) = setup_engine("nested");
    let austria = add(&mut engine, None, "Austria");
    let germany = add(&mut engine, None, "Germany");
    let bavaria = add(&mut engine, Some(germany), "Bavaria");
    let munich = add(&mut engine, Some(bavaria), "Munich");
    let saxony = add(&mut engine, Some(germany), "Saxony");
    assert_eq!(path_text(&engine, germany), "01");
    assert_eq!(path_text(&engine, bavaria), "01.00");
    assert_eq!(path_text(&engine, saxony), "01.01");

    // Bavaria takes Germany's label while Germany shifts to the next one.
    engine.move_node(bavaria, None).expect("move");
    assert_eq!(path_text(&engine, austria), "00");
    assert_eq!(path_text(&engine, bavaria), "01");
    assert_eq!(path_text(&engine, munich), "01.00");
    assert_eq!(path_text(&engine, germany), "02");
    assert_eq!(path_text(&engine, saxony), "02.01");
    assert!(engine.verify().expect("verify").success);

    let roots = engine.query().roots().expect("roots");
    assert_eq!(names(&roots), vec!["Austria", "Bavaria", "Germany"]);
}

#[test]
fn descending_order_and_secondary_keys() {
    let dir = TempDir::new().expect("tempdir");
    let config = sendero::PathConfig::labels(2, ["-population", "name"]).expect("config");
    let store =
        SqliteStore::open(dir.path().join("order.db"), config.encoding.clone()).expect("open");
    let mut engine = TreeEngine::new(store, config).expect("engine");
    let lyon = engine
        .insert(NewNode::root().with("name", "Lyon").with("population", 500))
        .expect("insert")
        .id;
    let paris = engine
        .insert(NewNode::root().with("name", "Paris").with("population", 2000))
        .expect("insert")
        .id;
    let nice = engine
        .insert(NewNode::root().with("name", "Nice").with("population", 500))
        .expect("insert")
        .id;
    assert_eq!(path_text(&engine, paris), "00");
    assert_eq!(path_text(&engine, lyon), "01");
    assert_eq!(path_text(&engine, nice), "02");

    engine.set_attribute(nice, "population", 3000).expect("update");
    assert_eq!(path_text(&engine, nice), "00");
    assert_eq!(path_text(&engine, paris), "01");
    assert_eq!(path_text(&engine, lyon), "02");
}

#[test]
fn configured_field_names_become_column_names() {
    let dir = TempDir::new().expect("tempdir");
    let path = dir.path().join("renamed.db");
    let mut config = sendero::PathConfig::labels(2, ["name"]).expect("config");
    config.parent_field = "mother".to_string();
    config.path_field = "lineage".to_string();
    let store = SqliteStore::open_with_config(&path, &config).expect("open store");
    assert_eq!(store.schema().parent_column, "mother");
    assert_eq!(store.schema().path_column, "lineage");
    let mut engine = TreeEngine::new(store, config).expect("engine");
    let france = add(&mut engine, None, "France");
    add(&mut engine, Some(france), "Normandie");
    drop(engine);

    let conn = rusqlite::Connection::open(&path).expect("raw connection");
    let lineage: Vec<String> = conn
        .prepare("SELECT lineage FROM tree_nodes WHERE mother IS NOT NULL")
        .expect("prepare")
        .query_map([], |row| row.get(0))
        .expect("query")
        .collect::<Result<_, _>>()
        .expect("rows");
    assert_eq!(lineage, vec!["00.00".to_string()]);
}
