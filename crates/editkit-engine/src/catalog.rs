//! In-memory schema catalog
//!
//! Tables and columns live in one id arena. Commands reference them through
//! `ObjectHandle`s (`table#N`, `column#N`); an object keeps its slot while it
//! is hidden by an unsaved delete so undo can bring it back.

use std::collections::BTreeMap;
use std::sync::Arc;

use editkit_core::{ExError, ExErrorKind, ObjectHandle};
use editkit_store::errors::{from_rusqlite, Result};
use parking_lot::RwLock;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const TABLE: &str = "table";
pub const COLUMN: &str = "column";
pub const SCRIPT: &str = "script";

/// Catalog shared between the editor, its managers and reflectors
pub type SharedCatalog = Arc<RwLock<Catalog>>;

/// Column definition as rendered into DDL
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnSpec {
    #[serde(rename = "type", default)]
    pub data_type: String,
    #[serde(default)]
    pub not_null: bool,
    #[serde(default)]
    pub primary_key: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<String>,
}

impl ColumnSpec {
    pub fn new(data_type: impl Into<String>) -> Self {
        Self {
            data_type: data_type.into(),
            ..Self::default()
        }
    }

    pub fn not_null(mut self) -> Self {
        self.not_null = true;
        self
    }

    pub fn primary_key(mut self) -> Self {
        self.primary_key = true;
        self
    }

    pub fn with_default(mut self, default: impl Into<String>) -> Self {
        self.default = Some(default.into());
        self
    }

    /// Properties map carried by a column `Create` command
    pub fn to_properties(&self) -> BTreeMap<String, Value> {
        match serde_json::to_value(self) {
            Ok(Value::Object(map)) => map.into_iter().collect(),
            _ => BTreeMap::new(),
        }
    }

    /// # Errors
    ///
    /// Returns `Serialization` when a property has the wrong type.
    pub fn from_properties(properties: &BTreeMap<String, Value>) -> Result<Self> {
        let map: serde_json::Map<String, Value> = properties
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        Ok(serde_json::from_value(Value::Object(map))?)
    }
}

#[derive(Debug, Clone)]
pub struct TableInfo {
    pub name: String,
    /// Exists in the database
    pub persisted: bool,
    /// Visible in the model; false while created-and-undone or deleted
    pub live: bool,
    columns: Vec<u64>,
}

#[derive(Debug, Clone)]
pub struct ColumnInfo {
    pub table: u64,
    pub name: String,
    pub spec: ColumnSpec,
    pub persisted: bool,
    pub live: bool,
}

#[derive(Debug, Default)]
pub struct Catalog {
    next_id: u64,
    tables: BTreeMap<u64, TableInfo>,
    columns: BTreeMap<u64, ColumnInfo>,
}

fn not_found(handle: &ObjectHandle) -> ExError {
    ExError::new(ExErrorKind::NotFound)
        .with_target(handle.clone())
        .with_message(format!("No catalog object for '{}'", handle))
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn shared(self) -> SharedCatalog {
        Arc::new(RwLock::new(self))
    }

    /// Read every user table and its columns from a SQLite connection
    ///
    /// # Errors
    ///
    /// Returns `Persistence` when the schema queries fail.
    pub fn load(conn: &Connection) -> Result<Self> {
        let mut catalog = Self::new();
        let mut stmt = conn
            .prepare(
                "SELECT name FROM sqlite_master \
                 WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
            )
            .map_err(from_rusqlite)?;
        let names = stmt
            .query_map([], |row| row.get::<_, String>(0))
            .map_err(from_rusqlite)?
            .collect::<std::result::Result<Vec<_>, _>>()
            .map_err(from_rusqlite)?;

        let mut info = conn
            .prepare(
                "SELECT name, type, \"notnull\", dflt_value, pk \
                 FROM pragma_table_info(?1) ORDER BY cid",
            )
            .map_err(from_rusqlite)?;
        for name in names {
            let table = catalog.allocate_table(&name);
            catalog.set_state(&table, true, true)?;
            let columns = info
                .query_map([&name], |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        ColumnSpec {
                            data_type: row.get::<_, String>(1)?,
                            not_null: row.get::<_, i64>(2)? != 0,
                            default: row.get::<_, Option<String>>(3)?,
                            primary_key: row.get::<_, i64>(4)? != 0,
                        },
                    ))
                })
                .map_err(from_rusqlite)?
                .collect::<std::result::Result<Vec<_>, _>>()
                .map_err(from_rusqlite)?;
            for (column_name, spec) in columns {
                let column = catalog.allocate_column(&table, &column_name, spec)?;
                catalog.set_state(&column, true, true)?;
            }
        }
        Ok(catalog)
    }

    fn next(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    /// Reserve a slot for a new table; it stays hidden until made live
    pub fn allocate_table(&mut self, name: &str) -> ObjectHandle {
        let id = self.next();
        self.tables.insert(
            id,
            TableInfo {
                name: name.to_string(),
                persisted: false,
                live: false,
                columns: Vec::new(),
            },
        );
        ObjectHandle::new(TABLE, id)
    }

    /// # Errors
    ///
    /// Returns `NotFound` when `table` is not a catalog table.
    pub fn allocate_column(
        &mut self,
        table: &ObjectHandle,
        name: &str,
        spec: ColumnSpec,
    ) -> Result<ObjectHandle> {
        if self.table(table).is_none() {
            return Err(not_found(table));
        }
        let id = self.next();
        self.columns.insert(
            id,
            ColumnInfo {
                table: table.id(),
                name: name.to_string(),
                spec,
                persisted: false,
                live: false,
            },
        );
        if let Some(info) = self.tables.get_mut(&table.id()) {
            info.columns.push(id);
        }
        Ok(ObjectHandle::new(COLUMN, id))
    }

    /// Handle for a script command; scripts have no catalog object
    pub fn allocate_script(&mut self) -> ObjectHandle {
        ObjectHandle::new(SCRIPT, self.next())
    }

    pub fn table(&self, handle: &ObjectHandle) -> Option<&TableInfo> {
        if handle.kind() != TABLE {
            return None;
        }
        self.tables.get(&handle.id())
    }

    pub fn column(&self, handle: &ObjectHandle) -> Option<&ColumnInfo> {
        if handle.kind() != COLUMN {
            return None;
        }
        self.columns.get(&handle.id())
    }

    /// Table owning a column
    pub fn parent(&self, column: &ObjectHandle) -> Option<ObjectHandle> {
        self.column(column)
            .map(|info| ObjectHandle::new(TABLE, info.table))
    }

    pub fn name(&self, handle: &ObjectHandle) -> Option<&str> {
        match handle.kind() {
            TABLE => self.table(handle).map(|t| t.name.as_str()),
            COLUMN => self.column(handle).map(|c| c.name.as_str()),
            _ => None,
        }
    }

    pub fn is_live(&self, handle: &ObjectHandle) -> bool {
        match handle.kind() {
            TABLE => self.table(handle).map(|t| t.live).unwrap_or(false),
            COLUMN => self.column(handle).map(|c| c.live).unwrap_or(false),
            _ => false,
        }
    }

    pub fn is_persisted(&self, handle: &ObjectHandle) -> bool {
        match handle.kind() {
            TABLE => self.table(handle).map(|t| t.persisted).unwrap_or(false),
            COLUMN => self.column(handle).map(|c| c.persisted).unwrap_or(false),
            _ => false,
        }
    }

    /// Path of the object: `[table]` or `[table, column]`
    pub fn qualified_name(&self, handle: &ObjectHandle) -> Vec<String> {
        match handle.kind() {
            TABLE => self
                .table(handle)
                .map(|t| vec![t.name.clone()])
                .unwrap_or_default(),
            COLUMN => match self.column(handle) {
                Some(column) => {
                    let mut path = self
                        .tables
                        .get(&column.table)
                        .map(|t| vec![t.name.clone()])
                        .unwrap_or_default();
                    path.push(column.name.clone());
                    path
                }
                None => Vec::new(),
            },
            _ => Vec::new(),
        }
    }

    /// # Errors
    ///
    /// Returns `NotFound` for unknown handles.
    pub fn set_live(&mut self, handle: &ObjectHandle, live: bool) -> Result<()> {
        let updated = match handle.kind() {
            TABLE => self.tables.get_mut(&handle.id()).map(|t| t.live = live),
            COLUMN => self.columns.get_mut(&handle.id()).map(|c| c.live = live),
            _ => None,
        };
        updated.ok_or_else(|| not_found(handle))
    }

    /// # Errors
    ///
    /// Returns `NotFound` for unknown handles.
    pub fn rename(&mut self, handle: &ObjectHandle, name: &str) -> Result<()> {
        let updated = match handle.kind() {
            TABLE => self
                .tables
                .get_mut(&handle.id())
                .map(|t| t.name = name.to_string()),
            COLUMN => self
                .columns
                .get_mut(&handle.id())
                .map(|c| c.name = name.to_string()),
            _ => None,
        };
        updated.ok_or_else(|| not_found(handle))
    }

    /// Record that the object now exists in the database
    ///
    /// # Errors
    ///
    /// Returns `NotFound` for unknown handles.
    pub fn mark_persisted(&mut self, handle: &ObjectHandle) -> Result<()> {
        self.set_state(handle, true, true)
    }

    fn set_state(&mut self, handle: &ObjectHandle, live: bool, persisted: bool) -> Result<()> {
        let updated = match handle.kind() {
            TABLE => self.tables.get_mut(&handle.id()).map(|t| {
                t.live = live;
                t.persisted = persisted;
            }),
            COLUMN => self.columns.get_mut(&handle.id()).map(|c| {
                c.live = live;
                c.persisted = persisted;
            }),
            _ => None,
        };
        updated.ok_or_else(|| not_found(handle))
    }

    /// Drop the object for good; a table takes its columns with it
    pub fn forget(&mut self, handle: &ObjectHandle) {
        match handle.kind() {
            TABLE => {
                if let Some(table) = self.tables.remove(&handle.id()) {
                    for column in table.columns {
                        self.columns.remove(&column);
                    }
                }
            }
            COLUMN => {
                if let Some(column) = self.columns.remove(&handle.id()) {
                    if let Some(table) = self.tables.get_mut(&column.table) {
                        table.columns.retain(|&id| id != handle.id());
                    }
                }
            }
            _ => {}
        }
    }

    /// Live tables ordered by name
    pub fn tables(&self) -> Vec<ObjectHandle> {
        let mut live: Vec<(&str, u64)> = self
            .tables
            .iter()
            .filter(|(_, t)| t.live)
            .map(|(&id, t)| (t.name.as_str(), id))
            .collect();
        live.sort();
        live.into_iter()
            .map(|(_, id)| ObjectHandle::new(TABLE, id))
            .collect()
    }

    /// Live columns of a table in definition order
    pub fn columns(&self, table: &ObjectHandle) -> Vec<ObjectHandle> {
        self.table(table)
            .map(|t| {
                t.columns
                    .iter()
                    .filter(|id| self.columns.get(id).map(|c| c.live).unwrap_or(false))
                    .map(|&id| ObjectHandle::new(COLUMN, id))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Every table slot, live or not, in allocation order
    pub fn table_slots(&self) -> Vec<ObjectHandle> {
        self.tables
            .keys()
            .map(|&id| ObjectHandle::new(TABLE, id))
            .collect()
    }

    /// Every column slot of a table, live or not
    pub fn column_slots(&self, table: &ObjectHandle) -> Vec<ObjectHandle> {
        self.table(table)
            .map(|t| {
                t.columns
                    .iter()
                    .map(|&id| ObjectHandle::new(COLUMN, id))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Live table with this name, ignoring case as SQLite does
    pub fn find_table(&self, name: &str) -> Option<ObjectHandle> {
        self.tables
            .iter()
            .find(|(_, t)| t.live && t.name.eq_ignore_ascii_case(name))
            .map(|(&id, _)| ObjectHandle::new(TABLE, id))
    }

    pub fn find_column(&self, table: &ObjectHandle, name: &str) -> Option<ObjectHandle> {
        self.columns(table).into_iter().find(|c| {
            self.column(c)
                .map(|info| info.name.eq_ignore_ascii_case(name))
                .unwrap_or(false)
        })
    }
}
