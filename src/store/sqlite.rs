//! SQLite node store.
//!
//! Rows live in one table with an integer primary key, a self-referencing parent column
//! (`ON DELETE CASCADE`), a JSON attribute column and the text form of the path. Prefix
//! predicates become range scans over the path index: the descendants of `p` are the
//! paths in `[p + sep, p + succ(sep))`.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path as FsPath;
use std::time::Duration;

use rusqlite::functions::FunctionFlags;
use rusqlite::types::Value as SqlValue;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};
use tracing::{debug, info, trace};

use super::{NodeSource, NodeStore, Predicate, PrefixMove, RebuildPlan, Transactional};
use crate::config::{Direction, OrphanPolicy, PathConfig};
use crate::error::{Result, TreeError};
use crate::model::{NewNode, Node, NodeId, ID_FIELDS};
use crate::path::{Encoding, Path};

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Node table used when none is named.
pub const DEFAULT_TABLE: &str = "tree_nodes";

/// Table and column names of the node table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SqliteSchema {
    /// Node table.
    pub table: String,
    /// Parent reference column.
    pub parent_column: String,
    /// Path column.
    pub path_column: String,
}

impl Default for SqliteSchema {
    fn default() -> Self {
        Self {
            table: DEFAULT_TABLE.to_string(),
            parent_column: "parent_id".to_string(),
            path_column: "path".to_string(),
        }
    }
}

impl SqliteSchema {
    /// Schema for `table` using the field names of `config`.
    pub fn for_config(table: impl Into<String>, config: &PathConfig) -> Result<Self> {
        let schema = Self {
            table: table.into(),
            parent_column: config.parent_field.clone(),
            path_column: config.path_field.clone(),
        };
        schema.validate()?;
        Ok(schema)
    }

    fn validate(&self) -> Result<()> {
        for name in [&self.table, &self.parent_column, &self.path_column] {
            if !is_identifier(name) {
                return Err(TreeError::InvalidConfig(format!(
                    "{name:?} is not a valid SQL identifier"
                )));
            }
        }
        for reserved in ["id", "attributes"] {
            if self.parent_column == reserved || self.path_column == reserved {
                return Err(TreeError::InvalidConfig(format!(
                    "column name {reserved:?} is reserved"
                )));
            }
        }
        Ok(())
    }
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Node store backed by a SQLite database.
pub struct SqliteStore {
    conn: Connection,
    schema: SqliteSchema,
    encoding: Encoding,
    depth: usize,
}

impl std::fmt::Debug for SqliteStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteStore")
            .field("schema", &self.schema)
            .field("encoding", &self.encoding)
            .field("depth", &self.depth)
            .finish()
    }
}

impl SqliteStore {
    /// Opens or creates a database file with the default schema: columns `parent_id` and
    /// `path` of table `tree_nodes`. Field names set in a [`PathConfig`] are not consulted;
    /// see [`SqliteStore::open_with_config`].
    pub fn open(path: impl AsRef<FsPath>, encoding: Encoding) -> Result<Self> {
        Self::open_with_schema(path, encoding, SqliteSchema::default())
    }

    /// Opens or creates a database file holding `config.encoding`, with the parent and
    /// path columns named after `config.parent_field` and `config.path_field`.
    pub fn open_with_config(path: impl AsRef<FsPath>, config: &PathConfig) -> Result<Self> {
        let schema = SqliteSchema::for_config(DEFAULT_TABLE, config)?;
        Self::open_with_schema(path, config.encoding.clone(), schema)
    }

    /// Opens or creates a database file.
    pub fn open_with_schema(
        path: impl AsRef<FsPath>,
        encoding: Encoding,
        schema: SqliteSchema,
    ) -> Result<Self> {
        let conn = Connection::open(path.as_ref())?;
        conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| {
            row.get::<_, String>(0)
        })?;
        Self::from_connection(conn, encoding, schema)
    }

    /// A private in-memory database with the default schema.
    pub fn open_in_memory(encoding: Encoding) -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?, encoding, SqliteSchema::default())
    }

    /// Wraps an open connection, creating the node table if needed.
    pub fn from_connection(
        conn: Connection,
        encoding: Encoding,
        schema: SqliteSchema,
    ) -> Result<Self> {
        schema.validate()?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.pragma_update(None, "foreign_keys", "ON")?;
        let store = Self {
            conn,
            schema,
            encoding,
            depth: 0,
        };
        store.create_schema()?;
        Ok(store)
    }

    /// Path encoding of the stored text.
    pub fn encoding(&self) -> &Encoding {
        &self.encoding
    }

    /// Table layout.
    pub fn schema(&self) -> &SqliteSchema {
        &self.schema
    }

    fn create_schema(&self) -> Result<()> {
        let SqliteSchema {
            table,
            parent_column: parent,
            path_column: path,
        } = &self.schema;
        self.conn.execute_batch(&format!(
            "CREATE TABLE IF NOT EXISTS \"{table}\" (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                \"{parent}\" INTEGER REFERENCES \"{table}\" (id) ON DELETE CASCADE,
                attributes TEXT NOT NULL DEFAULT '{{}}',
                \"{path}\" TEXT
            );
            CREATE INDEX IF NOT EXISTS \"{table}_{parent}_idx\" ON \"{table}\" (\"{parent}\");
            CREATE INDEX IF NOT EXISTS \"{table}_{path}_idx\" ON \"{table}\" (\"{path}\");"
        ))?;
        Ok(())
    }

    fn table(&self) -> String {
        format!("\"{}\"", self.schema.table)
    }

    fn parent_col(&self) -> String {
        format!("\"{}\"", self.schema.parent_column)
    }

    fn path_col(&self) -> String {
        format!("\"{}\"", self.schema.path_column)
    }

    fn path_text(&self, path: Option<&Path>) -> Result<Option<String>> {
        path.map(|p| self.encoding.format(p)).transpose()
    }

    fn separator_bounds(&self) -> (String, String) {
        let sep = self.encoding.separator();
        let next = char::from_u32(sep as u32 + 1).unwrap_or(sep);
        (sep.to_string(), next.to_string())
    }

    fn parent_exists(&self, parent: NodeId) -> Result<bool> {
        let found: Option<i64> = self
            .conn
            .query_row(
                &format!("SELECT id FROM {} WHERE id = ?1", self.table()),
                [parent as i64],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    /// Translates a predicate into a `WHERE` clause with positional parameters.
    fn clause(&self, predicate: &Predicate) -> Result<(String, Vec<SqlValue>)> {
        let path = self.path_col();
        let parent = self.parent_col();
        let (sep, next) = self.separator_bounds();
        let depth_expr = format!("(length({path}) - length(replace({path}, ?, '')))");
        Ok(match predicate {
            Predicate::All => ("1".to_string(), Vec::new()),
            Predicate::Id(id) => ("id = ?".to_string(), vec![SqlValue::Integer(*id as i64)]),
            Predicate::ParentIs(Some(id)) => (
                format!("{parent} = ?"),
                vec![SqlValue::Integer(*id as i64)],
            ),
            Predicate::ParentIs(None) => (format!("{parent} IS NULL"), Vec::new()),
            Predicate::PathIsNull => (format!("{path} IS NULL"), Vec::new()),
            Predicate::PathEquals(target) => (
                format!("{path} = ?"),
                vec![SqlValue::Text(self.encoding.format(target)?)],
            ),
            Predicate::DescendantOf {
                path: prefix,
                inclusive,
            } => {
                if prefix.is_empty() {
                    (format!("{path} IS NOT NULL"), Vec::new())
                } else {
                    let text = self.encoding.format(prefix)?;
                    let mut params = vec![
                        SqlValue::Text(format!("{text}{sep}")),
                        SqlValue::Text(format!("{text}{next}")),
                    ];
                    let mut sql = format!("({path} >= ? AND {path} < ?)");
                    if *inclusive {
                        sql = format!("({sql} OR {path} = ?)");
                        params.push(SqlValue::Text(text));
                    }
                    (sql, params)
                }
            }
            Predicate::AncestorOf {
                path: target,
                inclusive,
            } => {
                let ancestors = target
                    .ancestors(*inclusive)
                    .iter()
                    .map(|p| self.encoding.format(p).map(SqlValue::Text))
                    .collect::<Result<Vec<_>>>()?;
                if ancestors.is_empty() {
                    ("0".to_string(), Vec::new())
                } else {
                    let marks = vec!["?"; ancestors.len()].join(", ");
                    (format!("{path} IN ({marks})"), ancestors)
                }
            }
            Predicate::ChildrenOf(prefix) => {
                if prefix.is_empty() {
                    (
                        format!("{path} IS NOT NULL AND instr({path}, ?) = 0"),
                        vec![SqlValue::Text(sep)],
                    )
                } else {
                    let text = self.encoding.format(prefix)?;
                    (
                        format!("{path} >= ? AND {path} < ? AND {depth_expr} = ?"),
                        vec![
                            SqlValue::Text(format!("{text}{sep}")),
                            SqlValue::Text(format!("{text}{next}")),
                            SqlValue::Text(sep),
                            SqlValue::Integer(prefix.depth() as i64),
                        ],
                    )
                }
            }
            Predicate::Depth(0) => ("0".to_string(), Vec::new()),
            Predicate::Depth(depth) => (
                format!("{path} IS NOT NULL AND {depth_expr} = ?"),
                vec![SqlValue::Text(sep), SqlValue::Integer(*depth as i64 - 1)],
            ),
        })
    }

    fn load(&self, clause: &str, params: Vec<SqlValue>) -> Result<Vec<Node>> {
        let sql = format!(
            "SELECT id, {}, attributes, {} FROM {} WHERE {clause} ORDER BY id",
            self.parent_col(),
            self.path_col(),
            self.table()
        );
        let mut stmt = self.conn.prepare_cached(&sql)?;
        let rows = stmt.query_map(params_from_iter(params), |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, Option<i64>>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, Option<String>>(3)?,
            ))
        })?;
        let mut nodes = Vec::new();
        for row in rows {
            let (id, parent, attributes, path) = row?;
            nodes.push(Node {
                id: id as NodeId,
                parent: parent.map(|p| p as NodeId),
                attributes: serde_json::from_str(&attributes)?,
                path: path.map(|text| self.encoding.parse(&text)).transpose()?,
            });
        }
        Ok(nodes)
    }

    /// `ORDER BY` terms matching a rank ordering, or `None` if a field cannot be expressed.
    fn order_terms(plan: &RebuildPlan<'_>) -> Option<String> {
        let mut terms = Vec::new();
        for key in plan.ordering.keys() {
            let dir = match key.direction {
                Direction::Ascending => "ASC",
                Direction::Descending => "DESC",
            };
            if ID_FIELDS.contains(&key.field.as_str()) {
                terms.push(format!("n.id {dir}"));
                continue;
            }
            if !is_identifier(&key.field) {
                return None;
            }
            let value = format!("json_extract(n.attributes, '$.\"{}\"')", key.field);
            terms.push(format!("({value} IS NULL) {dir}"));
            terms.push(format!("{value} {dir}"));
        }
        terms.push("n.id ASC".to_string());
        Some(terms.join(", "))
    }
}

impl NodeSource for SqliteStore {
    fn get(&self, id: NodeId) -> Result<Option<Node>> {
        Ok(self
            .load("id = ?", vec![SqlValue::Integer(id as i64)])?
            .into_iter()
            .next())
    }

    fn filter(&self, predicate: &Predicate) -> Result<Vec<Node>> {
        let (clause, params) = self.clause(predicate)?;
        self.load(&clause, params)
    }

    fn exists(&self, predicate: &Predicate) -> Result<bool> {
        let (clause, params) = self.clause(predicate)?;
        let sql = format!("SELECT EXISTS (SELECT 1 FROM {} WHERE {clause})", self.table());
        let found: bool = self
            .conn
            .query_row(&sql, params_from_iter(params), |row| row.get(0))?;
        Ok(found)
    }
}

impl NodeStore for SqliteStore {
    fn insert(&mut self, node: NewNode) -> Result<Node> {
        if let Some(parent) = node.parent {
            if !self.parent_exists(parent)? {
                return Err(TreeError::NodeNotFound(parent));
            }
        }
        let attributes = serde_json::to_string(&node.attributes)?;
        let path = self.path_text(node.path.as_ref())?;
        self.conn.execute(
            &format!(
                "INSERT INTO {} ({}, attributes, {}) VALUES (?1, ?2, ?3)",
                self.table(),
                self.parent_col(),
                self.path_col()
            ),
            params![node.parent.map(|p| p as i64), attributes, path],
        )?;
        let id = self.conn.last_insert_rowid() as NodeId;
        Ok(node.into_node(id))
    }

    fn update(&mut self, node: &Node) -> Result<()> {
        if let Some(parent) = node.parent {
            if !self.parent_exists(parent)? {
                return Err(TreeError::Integrity {
                    node: node.id,
                    parent,
                });
            }
        }
        let attributes = serde_json::to_string(&node.attributes)?;
        let path = self.path_text(node.path.as_ref())?;
        let changed = self.conn.execute(
            &format!(
                "UPDATE {} SET {} = ?1, attributes = ?2, {} = ?3 WHERE id = ?4",
                self.table(),
                self.parent_col(),
                self.path_col()
            ),
            params![node.parent.map(|p| p as i64), attributes, path, node.id as i64],
        )?;
        if changed == 0 {
            return Err(TreeError::NodeNotFound(node.id));
        }
        Ok(())
    }

    fn delete(&mut self, id: NodeId) -> Result<Vec<NodeId>> {
        let sql = format!(
            "WITH RECURSIVE doomed(id) AS (
                SELECT id FROM {table} WHERE id = ?1
                UNION
                SELECT n.id FROM {table} n JOIN doomed d ON n.{parent} = d.id
            )
            SELECT id FROM doomed",
            table = self.table(),
            parent = self.parent_col()
        );
        let removed = {
            let mut stmt = self.conn.prepare_cached(&sql)?;
            let ids = stmt.query_map([id as i64], |row| row.get::<_, i64>(0))?;
            ids.map(|r| r.map(|id| id as NodeId))
                .collect::<std::result::Result<Vec<_>, _>>()?
        };
        if removed.is_empty() {
            return Err(TreeError::NodeNotFound(id));
        }
        self.conn.execute(
            &format!("DELETE FROM {} WHERE id = ?1", self.table()),
            [id as i64],
        )?;
        debug!(node = id, removed = removed.len(), "store.sqlite.cascade_delete");
        Ok(removed)
    }

    fn set_paths(&mut self, paths: &[(NodeId, Option<Path>)]) -> Result<()> {
        let sql = format!(
            "UPDATE {} SET {} = ?1 WHERE id = ?2",
            self.table(),
            self.path_col()
        );
        let texts = paths
            .iter()
            .map(|(id, path)| Ok((*id, self.path_text(path.as_ref())?)))
            .collect::<Result<Vec<_>>>()?;
        let mut stmt = self.conn.prepare_cached(&sql)?;
        for (id, text) in texts {
            if stmt.execute(params![text, id as i64])? == 0 {
                return Err(TreeError::NodeNotFound(id));
            }
        }
        Ok(())
    }

    fn rewrite_prefixes(&mut self, moves: &[PrefixMove]) -> Result<usize> {
        if moves.is_empty() {
            return Ok(0);
        }
        self.conn.execute_batch(
            "CREATE TEMP TABLE IF NOT EXISTS sendero_moves (
                from_path TEXT NOT NULL,
                to_path TEXT NOT NULL
            );
            DELETE FROM temp.sendero_moves;",
        )?;
        {
            let mut stmt = self
                .conn
                .prepare_cached("INSERT INTO temp.sendero_moves (from_path, to_path) VALUES (?1, ?2)")?;
            for mv in moves {
                stmt.execute(params![
                    self.encoding.format(&mv.from)?,
                    self.encoding.format(&mv.to)?
                ])?;
            }
        }
        let (sep, next) = self.separator_bounds();
        let path = self.path_col();
        let matches = format!(
            "({path} = m.from_path OR ({path} >= m.from_path || ?1 AND {path} < m.from_path || ?2))"
        );
        let sql = format!(
            "UPDATE {table} SET {path} = (
                SELECT m.to_path || substr({table}.{path}, length(m.from_path) + 1)
                FROM temp.sendero_moves m
                WHERE {matches}
                ORDER BY length(m.from_path) DESC
                LIMIT 1
            )
            WHERE EXISTS (SELECT 1 FROM temp.sendero_moves m WHERE {matches})",
            table = self.table(),
        );
        let changed = self.conn.execute(&sql, params![sep, next])?;
        self.conn.execute("DELETE FROM temp.sendero_moves", [])?;
        debug!(moves = moves.len(), changed, "store.sqlite.prefix_rewrite");
        Ok(changed)
    }

    fn duplicate_paths(&self, prefixes: &[Path]) -> Result<Vec<(Path, Vec<NodeId>)>> {
        let mut duplicates: BTreeMap<String, BTreeSet<NodeId>> = BTreeMap::new();
        for prefix in prefixes {
            let (scope, params) = self.clause(&Predicate::DescendantOf {
                path: prefix.clone(),
                inclusive: true,
            })?;
            let sql = format!(
                "SELECT {path}, id FROM {table}
                 WHERE {scope}
                   AND EXISTS (
                       SELECT 1 FROM {table} AS d WHERE d.{path} = {table}.{path} AND d.id <> {table}.id
                   )",
                path = self.path_col(),
                table = self.table()
            );
            let mut stmt = self.conn.prepare_cached(&sql)?;
            let rows = stmt.query_map(params_from_iter(params), |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
            })?;
            for row in rows {
                let (text, id) = row?;
                duplicates.entry(text).or_default().insert(id as NodeId);
            }
        }
        trace!(
            prefixes = prefixes.len(),
            duplicates = duplicates.len(),
            "store.sqlite.duplicate_check"
        );
        duplicates
            .into_iter()
            .map(|(text, ids)| Ok((self.encoding.parse(&text)?, ids.into_iter().collect())))
            .collect()
    }

    fn rebuild_paths(&mut self, plan: &RebuildPlan<'_>) -> Result<Option<usize>> {
        let Some(order) = Self::order_terms(plan) else {
            return Ok(None);
        };
        let table = self.table();
        let parent = self.parent_col();
        let path = self.path_col();

        let orphan: Option<(i64, i64)> = self
            .conn
            .query_row(
                &format!(
                    "SELECT c.id, c.{parent} FROM {table} c
                     WHERE c.{parent} IS NOT NULL
                       AND NOT EXISTS (SELECT 1 FROM {table} p WHERE p.id = c.{parent})
                     ORDER BY c.id LIMIT 1"
                ),
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        if let (Some((node, missing)), OrphanPolicy::Strict) = (orphan, plan.orphans) {
            return Err(TreeError::Integrity {
                node: node as NodeId,
                parent: missing as NodeId,
            });
        }

        let effective = format!(
            "SELECT n.id, n.attributes,
                    CASE WHEN n.{parent} IS NOT NULL
                          AND NOT EXISTS (SELECT 1 FROM {table} p WHERE p.id = n.{parent})
                         THEN NULL ELSE n.{parent} END AS parent
             FROM {table} n"
        );

        if let Some(capacity) = plan.encoding.capacity() {
            let largest: Option<(Option<i64>, i64)> = self
                .conn
                .query_row(
                    &format!(
                        "SELECT parent, count(*) AS size FROM ({effective})
                         GROUP BY parent ORDER BY size DESC LIMIT 1"
                    ),
                    [],
                    |row| Ok((row.get(0)?, row.get(1)?)),
                )
                .optional()?;
            if let Some((group, size)) = largest {
                if size as u64 > capacity {
                    return Err(TreeError::Capacity {
                        parent: group.map(|p| p as NodeId),
                        requested: size as usize,
                        max: capacity,
                    });
                }
            }
        }

        let encoding = plan.encoding.clone();
        self.conn.create_scalar_function(
            "sendero_component",
            1,
            FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC,
            move |ctx| {
                let rank: i64 = ctx.get(0)?;
                encoding
                    .render_rank(rank as u64)
                    .map_err(|err| rusqlite::Error::UserFunctionError(Box::new(err)))
            },
        )?;

        self.conn.execute_batch(
            "CREATE TEMP TABLE IF NOT EXISTS sendero_rebuild (
                id INTEGER PRIMARY KEY,
                path TEXT NOT NULL
            );
            DELETE FROM temp.sendero_rebuild;",
        )?;
        let walk = format!(
            "WITH RECURSIVE
                ranked AS (
                    SELECT n.id, n.parent,
                           row_number() OVER (PARTITION BY n.parent ORDER BY {order}) - 1 AS rank
                    FROM ({effective}) n
                ),
                walk(id, path) AS (
                    SELECT id, sendero_component(rank) FROM ranked WHERE parent IS NULL
                    UNION ALL
                    SELECT r.id, w.path || ?1 || sendero_component(r.rank)
                    FROM ranked r JOIN walk w ON r.parent = w.id
                )
             INSERT INTO temp.sendero_rebuild (id, path) SELECT id, path FROM walk"
        );
        let placed = self
            .conn
            .execute(&walk, [plan.encoding.separator().to_string()])?;

        let unreachable: i64 = self.conn.query_row(
            &format!(
                "SELECT count(*) FROM {table}
                 WHERE id NOT IN (SELECT id FROM temp.sendero_rebuild)"
            ),
            [],
            |row| row.get(0),
        )?;
        if unreachable > 0 {
            return Err(TreeError::Corruption(format!(
                "{unreachable} nodes are unreachable from any root; their parent references form a cycle"
            )));
        }

        self.conn.execute(
            &format!(
                "UPDATE {table} SET {path} = r.path
                 FROM temp.sendero_rebuild AS r WHERE r.id = {table}.id"
            ),
            [],
        )?;
        self.conn.execute("DELETE FROM temp.sendero_rebuild", [])?;
        self.encoding = plan.encoding.clone();
        info!(nodes = placed, "store.sqlite.rebuild");
        Ok(Some(placed))
    }
}

impl Transactional for SqliteStore {
    fn begin(&mut self) -> Result<()> {
        if self.depth == 0 {
            self.conn.execute_batch("BEGIN IMMEDIATE")?;
        } else {
            self.conn
                .execute_batch(&format!("SAVEPOINT sendero_{}", self.depth))?;
        }
        self.depth += 1;
        Ok(())
    }

    fn commit(&mut self) -> Result<()> {
        match self.depth {
            0 => return Err(TreeError::Corruption("commit without a transaction".into())),
            1 => self.conn.execute_batch("COMMIT")?,
            depth => self
                .conn
                .execute_batch(&format!("RELEASE sendero_{}", depth - 1))?,
        }
        self.depth -= 1;
        Ok(())
    }

    fn rollback(&mut self) -> Result<()> {
        match self.depth {
            0 => return Err(TreeError::Corruption("rollback without a transaction".into())),
            1 => self.conn.execute_batch("ROLLBACK")?,
            depth => self.conn.execute_batch(&format!(
                "ROLLBACK TO sendero_{level}; RELEASE sendero_{level}",
                level = depth - 1
            ))?,
        }
        self.depth -= 1;
        Ok(())
    }

    fn depth(&self) -> usize {
        self.depth
    }
}
