//! Schema editor
//!
//! Turns high-level schema edits into commands on a `CommandContext` backed
//! by the catalog managers and reflector:
//! - `create_table` issues the table create, one create per column and an
//!   aggregate that folds them into a single `CREATE TABLE`
//! - `drop_table` also drops columns whose creation is still pending, so the
//!   whole pending table cancels out
//! - `effective_name` answers with pending edits applied, in atomic contexts
//!   too where the catalog only changes after a save
//!
//! ## Logging Ownership
//!
//! Each edit logs `log_op_start!` / `log_op_end!` / `log_op_error!`. Saving,
//! undo and redo are logged by the context itself.

use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::sync::Arc;

use editkit_core::{
    Command, CommandContext, CommandKind, CommandReflector, ContextConfig, ExError, ExErrorKind,
    ExecutionContext, ManagerResolver, ObjectHandle, PersistAction, Result,
};
use editkit_core::{log_op_end, log_op_error, log_op_start};
use editkit_store::SqliteExecutionContext;

use crate::catalog::{Catalog, ColumnSpec, SharedCatalog};
use crate::managers::manager_resolver;
use crate::reflectors::CatalogReflector;

/// Schema editing session over one execution context
pub struct SchemaEditor {
    context: CommandContext,
    catalog: SharedCatalog,
    resolver: Arc<dyn ManagerResolver>,
    reflector: Arc<dyn CommandReflector>,
}

fn unknown(handle: &ObjectHandle) -> ExError {
    ExError::new(ExErrorKind::NotFound)
        .with_target(handle.clone())
        .with_message(format!("'{}' does not exist", handle))
}

fn logged<T>(op: &'static str, f: impl FnOnce() -> Result<T>) -> Result<T> {
    log_op_start!(op);
    let start = std::time::Instant::now();
    let result = f().map_err(|e| {
        log_op_error!(op, e.clone(), duration_ms = start.elapsed().as_millis() as u64);
        e
    })?;
    log_op_end!(op, duration_ms = start.elapsed().as_millis() as u64);
    Ok(result)
}

impl SchemaEditor {
    pub fn new(
        execution_context: Arc<dyn ExecutionContext>,
        catalog: SharedCatalog,
        config: ContextConfig,
    ) -> Self {
        let resolver = manager_resolver(&catalog);
        let reflector: Arc<dyn CommandReflector> = Arc::new(CatalogReflector::new(catalog.clone()));
        let context = CommandContext::new(execution_context, resolver.clone(), config);
        Self {
            context,
            catalog,
            resolver,
            reflector,
        }
    }

    /// Load the catalog of `db` and start editing it
    ///
    /// # Errors
    ///
    /// Returns `NotConnected` or `Persistence` when the schema can't be read.
    pub fn open(db: Arc<SqliteExecutionContext>, config: ContextConfig) -> Result<Self> {
        let catalog = db.with_connection(Catalog::load)?.shared();
        Ok(Self::new(db, catalog, config))
    }

    /// Open a database file with a fresh SQLite execution context
    ///
    /// # Errors
    ///
    /// Returns `Persistence` when the file can't be opened or read.
    pub fn open_path<P: AsRef<Path>>(path: P, config: ContextConfig) -> Result<Self> {
        let db = Arc::new(SqliteExecutionContext::open(path)?);
        Self::open(db, config)
    }

    pub fn context(&self) -> &CommandContext {
        &self.context
    }

    pub fn catalog(&self) -> &SharedCatalog {
        &self.catalog
    }

    pub fn manager_resolver(&self) -> Arc<dyn ManagerResolver> {
        self.resolver.clone()
    }

    /// Create a table with its columns as one undoable unit
    ///
    /// # Errors
    ///
    /// Never fails for a fresh table; errors come from the catalog arena.
    pub fn create_table<I, N>(&self, name: &str, columns: I) -> Result<ObjectHandle>
    where
        I: IntoIterator<Item = (N, ColumnSpec)>,
        N: Into<String>,
    {
        logged("create_table", || {
            let (table, allocated) = {
                let mut catalog = self.catalog.write();
                let table = catalog.allocate_table(name);
                let mut allocated = Vec::new();
                for (column, spec) in columns {
                    let column: String = column.into();
                    let handle = catalog.allocate_column(&table, &column, spec.clone())?;
                    allocated.push((handle, column, spec));
                }
                (table, allocated)
            };

            let mut scope = vec![table.clone()];
            let mut commands = vec![Command::create(table.clone(), name, BTreeMap::new())
                .with_qualified_name(vec![name.to_string()])];
            for (handle, column, spec) in allocated {
                scope.push(handle.clone());
                commands.push(
                    Command::create(handle, column.clone(), spec.to_properties())
                        .with_qualified_name(vec![name.to_string(), column]),
                );
            }
            commands.push(
                Command::aggregate(table.clone(), scope).with_title(format!("Create table {}", name)),
            );
            self.context
                .add_command_batch(commands, Some(self.reflector.clone()), true);
            Ok(table)
        })
    }

    /// # Errors
    ///
    /// Returns `NotFound` when the table doesn't exist (or is pending a drop).
    pub fn add_column(&self, table: &ObjectHandle, name: &str, spec: ColumnSpec) -> Result<ObjectHandle> {
        logged("add_column", || {
            let table_name = self.effective_name(table).ok_or_else(|| unknown(table))?;
            let column = self
                .catalog
                .write()
                .allocate_column(table, name, spec.clone())?;
            let command = Command::create(column.clone(), name, spec.to_properties())
                .with_qualified_name(vec![table_name, name.to_string()]);
            self.context
                .add_command(command, Some(self.reflector.clone()), true);
            Ok(column)
        })
    }

    /// # Errors
    ///
    /// Returns `NotFound` when the table doesn't exist.
    pub fn rename_table(&self, table: &ObjectHandle, new_name: &str) -> Result<()> {
        logged("rename_table", || {
            let old_name = self.effective_name(table).ok_or_else(|| unknown(table))?;
            let command = Command::rename(table.clone(), old_name.clone(), new_name)
                .with_qualified_name(vec![old_name]);
            self.context
                .add_command(command, Some(self.reflector.clone()), true);
            Ok(())
        })
    }

    /// # Errors
    ///
    /// Returns `NotFound` when the column or its table doesn't exist.
    pub fn rename_column(&self, column: &ObjectHandle, new_name: &str) -> Result<()> {
        logged("rename_column", || {
            let (table_name, old_name) = self.column_path(column)?;
            let command = Command::rename(column.clone(), old_name.clone(), new_name)
                .with_qualified_name(vec![table_name, old_name]);
            self.context
                .add_command(command, Some(self.reflector.clone()), true);
            Ok(())
        })
    }

    /// Drop a table, cancelling columns whose creation is still pending
    ///
    /// # Errors
    ///
    /// Returns `NotFound` when the table doesn't exist.
    pub fn drop_table(&self, table: &ObjectHandle) -> Result<()> {
        logged("drop_table", || {
            let name = self.effective_name(table).ok_or_else(|| unknown(table))?;
            let pending = self.pending_creates();
            let slots = self.catalog.read().column_slots(table);

            let mut commands = Vec::new();
            for column in slots.into_iter().filter(|c| pending.contains(c)) {
                let column_name = self.effective_name(&column).unwrap_or_default();
                commands.push(
                    Command::delete(column).with_qualified_name(vec![name.clone(), column_name]),
                );
            }
            commands.push(Command::delete(table.clone()).with_qualified_name(vec![name]));
            self.context
                .add_command_batch(commands, Some(self.reflector.clone()), true);
            Ok(())
        })
    }

    /// # Errors
    ///
    /// Returns `NotFound` when the column or its table doesn't exist.
    pub fn drop_column(&self, column: &ObjectHandle) -> Result<()> {
        logged("drop_column", || {
            let (table_name, name) = self.column_path(column)?;
            let command =
                Command::delete(column.clone()).with_qualified_name(vec![table_name, name]);
            self.context
                .add_command(command, Some(self.reflector.clone()), true);
            Ok(())
        })
    }

    /// Queue a literal SQL script; scripts can't be undone
    pub fn run_script(&self, title: &str, sql: &str) -> ObjectHandle {
        let handle = self.catalog.write().allocate_script();
        let command = Command::script(handle.clone(), title, vec![PersistAction::script(sql)]);
        self.context.add_command(command, None, true);
        handle
    }

    /// Name of a table or column with every pending edit applied
    ///
    /// `None` when the object is dropped or was never created.
    pub fn effective_name(&self, handle: &ObjectHandle) -> Option<String> {
        let mut pending: Option<Option<String>> = None;
        for command in flatten(self.context.get_final_commands()) {
            if command.target() != handle {
                continue;
            }
            match command.kind() {
                CommandKind::Create { name, .. } => pending = Some(Some(name.clone())),
                CommandKind::Rename { new_name, .. } => pending = Some(Some(new_name.clone())),
                CommandKind::Delete => pending = Some(None),
                _ => {}
            }
        }
        match pending {
            Some(name) => name,
            None => {
                let catalog = self.catalog.read();
                if catalog.is_live(handle) || catalog.is_persisted(handle) {
                    catalog.name(handle).map(str::to_string)
                } else {
                    None
                }
            }
        }
    }

    /// Table whose effective name is `name`, pending creates included
    pub fn find_table(&self, name: &str) -> Option<ObjectHandle> {
        let slots = self.catalog.read().table_slots();
        self.find_named(slots, name)
    }

    /// Column of `table` whose effective name is `name`
    pub fn find_column(&self, table: &ObjectHandle, name: &str) -> Option<ObjectHandle> {
        let slots = self.catalog.read().column_slots(table);
        self.find_named(slots, name)
    }

    fn find_named(&self, slots: Vec<ObjectHandle>, name: &str) -> Option<ObjectHandle> {
        slots.into_iter().find(|slot| {
            self.effective_name(slot)
                .map(|n| n.eq_ignore_ascii_case(name))
                .unwrap_or(false)
        })
    }

    /// Effective table and column name of a column
    fn column_path(&self, column: &ObjectHandle) -> Result<(String, String)> {
        let parent = self
            .catalog
            .read()
            .parent(column)
            .ok_or_else(|| unknown(column))?;
        let table_name = self.effective_name(&parent).ok_or_else(|| unknown(&parent))?;
        let name = self.effective_name(column).ok_or_else(|| unknown(column))?;
        Ok((table_name, name))
    }

    /// Targets whose `Create` has not been saved yet
    fn pending_creates(&self) -> HashSet<ObjectHandle> {
        flatten(self.context.get_final_commands())
            .into_iter()
            .filter(|c| matches!(c.kind(), CommandKind::Create { .. }))
            .map(|c| c.target().clone())
            .collect()
    }
}

/// Final commands with aggregate claims spliced in before their aggregate
fn flatten(commands: Vec<Command>) -> Vec<Command> {
    let mut flat = Vec::with_capacity(commands.len());
    for command in commands {
        if let CommandKind::Aggregate { claimed, .. } = command.kind() {
            flat.extend(claimed.iter().cloned());
        }
        flat.push(command);
    }
    flat
}
