//! SQLite object managers
//!
//! Render DDL for table and column commands, check them against the catalog
//! before a save and bring the catalog in line once the save is committed.

use std::collections::BTreeMap;
use std::sync::Arc;

use editkit_core::{
    Command, CommandKind, EditError, ExError, ExErrorKind, ManagerResolver, ObjectHandle,
    ObjectManager, PersistAction, QueueFilter, Result, SaveOptions,
};
use serde::Deserialize;
use serde_json::Value;

use crate::catalog::{ColumnSpec, SharedCatalog, COLUMN, SCRIPT, TABLE};

/// Quote an identifier for SQLite
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Column definition as used by `CREATE TABLE` and `ADD COLUMN`
pub fn column_definition(name: &str, spec: &ColumnSpec) -> String {
    let mut def = quote_ident(name);
    if !spec.data_type.is_empty() {
        def.push(' ');
        def.push_str(&spec.data_type);
    }
    if spec.primary_key {
        def.push_str(" PRIMARY KEY");
    }
    if spec.not_null {
        def.push_str(" NOT NULL");
    }
    if let Some(default) = &spec.default {
        def.push_str(" DEFAULT ");
        def.push_str(default);
    }
    def
}

fn create_table_sql(name: &str, columns: &[String]) -> String {
    format!("CREATE TABLE {} ({})", quote_ident(name), columns.join(", "))
}

fn unsupported(command: &Command) -> ExError {
    EditError::UnsupportedCommand {
        kind: command.kind().name().to_string(),
        target: command.target().clone(),
    }
    .into()
}

fn invalid(command: &Command, reason: String) -> ExError {
    EditError::Validation {
        command: command.title().to_string(),
        reason,
    }
    .into()
}

fn missing(target: &ObjectHandle) -> ExError {
    ExError::new(ExErrorKind::NotFound)
        .with_target(target.clone())
        .with_message(format!("No catalog object for '{}'", target))
}

/// Inline column list of a standalone table `Create`
#[derive(Debug, Deserialize)]
struct ColumnDef {
    name: String,
    #[serde(flatten)]
    spec: ColumnSpec,
}

fn inline_columns(properties: &BTreeMap<String, Value>) -> Result<Vec<ColumnDef>> {
    match properties.get("columns") {
        Some(columns) => Ok(serde_json::from_value(columns.clone())?),
        None => Ok(Vec::new()),
    }
}

pub struct TableManager {
    catalog: SharedCatalog,
}

impl TableManager {
    pub fn new(catalog: SharedCatalog) -> Self {
        Self { catalog }
    }

    /// Table name as it was when the command was issued
    fn object_name(&self, command: &Command) -> Result<String> {
        if let Some(name) = command.object_name() {
            return Ok(name.to_string());
        }
        self.catalog
            .read()
            .name(command.target())
            .map(str::to_string)
            .ok_or_else(|| missing(command.target()))
    }

    fn check_unique(&self, command: &Command, name: &str) -> Result<()> {
        match self.catalog.read().find_table(name) {
            Some(other) if &other != command.target() => Err(invalid(
                command,
                format!("Table '{}' already exists", name),
            )),
            _ => Ok(()),
        }
    }

    fn aggregate_actions(&self, command: &Command, claimed: &[Command]) -> Result<Vec<PersistAction>> {
        let mut table = None;
        let mut columns = Vec::new();
        for claim in claimed {
            match (claim.target().kind(), claim.kind()) {
                (TABLE, CommandKind::Create { name, properties }) if claim.target() == command.target() => {
                    for def in inline_columns(properties)? {
                        columns.push(column_definition(&def.name, &def.spec));
                    }
                    table = Some(name.clone());
                }
                (COLUMN, CommandKind::Create { name, properties }) => {
                    let spec = ColumnSpec::from_properties(properties)?;
                    columns.push(column_definition(name, &spec));
                }
                _ => return Err(unsupported(claim)),
            }
        }
        let name = table.ok_or_else(|| {
            ExError::new(ExErrorKind::Internal)
                .with_target(command.target().clone())
                .with_message("Table save has no table create")
        })?;
        Ok(vec![
            PersistAction::script(create_table_sql(&name, &columns))
                .with_title(format!("Create table {}", name)),
        ])
    }
}

impl ObjectManager for TableManager {
    fn persist_actions(&self, command: &Command, _options: &SaveOptions) -> Result<Vec<PersistAction>> {
        match command.kind() {
            CommandKind::Create { name, properties } => {
                let columns: Vec<String> = inline_columns(properties)?
                    .iter()
                    .map(|def| column_definition(&def.name, &def.spec))
                    .collect();
                Ok(vec![PersistAction::script(create_table_sql(name, &columns))
                    .with_title(format!("Create table {}", name))])
            }
            CommandKind::Aggregate { claimed, .. } => self.aggregate_actions(command, claimed),
            CommandKind::Delete => {
                let name = self.object_name(command)?;
                Ok(vec![
                    PersistAction::script("PRAGMA defer_foreign_keys = ON")
                        .with_title("Defer foreign keys"),
                    PersistAction::script(format!("DROP TABLE {}", quote_ident(&name)))
                        .with_title(format!("Drop table {}", name)),
                    PersistAction::script("PRAGMA defer_foreign_keys = OFF")
                        .with_title("Restore foreign keys")
                        .finalizer(),
                ])
            }
            CommandKind::Rename { old_name, new_name } => Ok(vec![PersistAction::script(format!(
                "ALTER TABLE {} RENAME TO {}",
                quote_ident(old_name),
                quote_ident(new_name)
            ))
            .with_title(format!("Rename table {} to {}", old_name, new_name))]),
            _ => Err(unsupported(command)),
        }
    }

    fn validate(&self, command: &Command) -> Result<()> {
        match command.kind() {
            CommandKind::Create { name, properties } => {
                self.check_unique(command, name)?;
                if inline_columns(properties)?.is_empty() {
                    return Err(invalid(command, format!("Table '{}' has no columns", name)));
                }
                Ok(())
            }
            CommandKind::Aggregate { claimed, .. } => {
                let create = claimed.iter().find_map(|c| match c.kind() {
                    CommandKind::Create { name, properties } if c.target() == command.target() => {
                        Some((name, properties))
                    }
                    _ => None,
                });
                let Some((name, properties)) = create else {
                    return Ok(());
                };
                self.check_unique(command, name)?;
                let has_columns = claimed.iter().any(|c| c.target().kind() == COLUMN)
                    || !inline_columns(properties)?.is_empty();
                if !has_columns {
                    return Err(invalid(command, format!("Table '{}' has no columns", name)));
                }
                Ok(())
            }
            CommandKind::Rename { new_name, .. } => self.check_unique(command, new_name),
            _ => Ok(()),
        }
    }

    fn update_model(&self, command: &Command) -> Result<()> {
        let mut catalog = self.catalog.write();
        match command.kind() {
            CommandKind::Create { name, .. } => {
                catalog.rename(command.target(), name)?;
                catalog.mark_persisted(command.target())
            }
            CommandKind::Aggregate { claimed, .. } => {
                for claim in claimed {
                    if let CommandKind::Create { name, .. } = claim.kind() {
                        catalog.rename(claim.target(), name)?;
                        catalog.mark_persisted(claim.target())?;
                    }
                }
                Ok(())
            }
            CommandKind::Delete => {
                catalog.forget(command.target());
                Ok(())
            }
            CommandKind::Rename { new_name, .. } => catalog.rename(command.target(), new_name),
            _ => Ok(()),
        }
    }
}

pub struct ColumnManager {
    catalog: SharedCatalog,
}

impl ColumnManager {
    pub fn new(catalog: SharedCatalog) -> Self {
        Self { catalog }
    }

    /// Name of the owning table in the database at execution time
    ///
    /// A table created in the same save carries every rename in its
    /// `CREATE`, so its current model name is used. For an existing table
    /// the name recorded when the command was issued wins.
    fn table_name(&self, command: &Command) -> Result<String> {
        let catalog = self.catalog.read();
        let parent = catalog
            .parent(command.target())
            .ok_or_else(|| missing(command.target()))?;
        let current = catalog.name(&parent).map(str::to_string);
        if !catalog.is_persisted(&parent) {
            return current.ok_or_else(|| missing(&parent));
        }
        command
            .container_name()
            .map(str::to_string)
            .or(current)
            .ok_or_else(|| missing(&parent))
    }

    fn column_name(&self, command: &Command) -> Result<String> {
        if let Some(name) = command.object_name() {
            return Ok(name.to_string());
        }
        self.catalog
            .read()
            .name(command.target())
            .map(str::to_string)
            .ok_or_else(|| missing(command.target()))
    }

    fn check_unique(&self, command: &Command, name: &str) -> Result<()> {
        let catalog = self.catalog.read();
        let parent = catalog
            .parent(command.target())
            .ok_or_else(|| missing(command.target()))?;
        match catalog.find_column(&parent, name) {
            Some(other) if &other != command.target() => Err(invalid(
                command,
                format!("Column '{}' already exists", name),
            )),
            _ => Ok(()),
        }
    }
}

impl ObjectManager for ColumnManager {
    fn persist_actions(&self, command: &Command, _options: &SaveOptions) -> Result<Vec<PersistAction>> {
        let table = self.table_name(command)?;
        match command.kind() {
            CommandKind::Create { name, properties } => {
                let spec = ColumnSpec::from_properties(properties)?;
                Ok(vec![PersistAction::script(format!(
                    "ALTER TABLE {} ADD COLUMN {}",
                    quote_ident(&table),
                    column_definition(name, &spec)
                ))
                .with_title(format!("Add column {}.{}", table, name))])
            }
            CommandKind::Delete => {
                let name = self.column_name(command)?;
                Ok(vec![PersistAction::script(format!(
                    "ALTER TABLE {} DROP COLUMN {}",
                    quote_ident(&table),
                    quote_ident(&name)
                ))
                .with_title(format!("Drop column {}.{}", table, name))])
            }
            CommandKind::Rename { old_name, new_name } => Ok(vec![PersistAction::script(format!(
                "ALTER TABLE {} RENAME COLUMN {} TO {}",
                quote_ident(&table),
                quote_ident(old_name),
                quote_ident(new_name)
            ))
            .with_title(format!("Rename column {}.{} to {}", table, old_name, new_name))]),
            _ => Err(unsupported(command)),
        }
    }

    fn validate(&self, command: &Command) -> Result<()> {
        match command.kind() {
            CommandKind::Create { name, .. } => self.check_unique(command, name),
            CommandKind::Rename { new_name, .. } => self.check_unique(command, new_name),
            _ => Ok(()),
        }
    }

    fn update_model(&self, command: &Command) -> Result<()> {
        let mut catalog = self.catalog.write();
        match command.kind() {
            CommandKind::Create { name, .. } => {
                catalog.rename(command.target(), name)?;
                catalog.mark_persisted(command.target())
            }
            CommandKind::Delete => {
                catalog.forget(command.target());
                Ok(())
            }
            CommandKind::Rename { new_name, .. } => catalog.rename(command.target(), new_name),
            _ => Ok(()),
        }
    }

    /// Columns of an existing table that is being dropped need no DDL
    fn filter_commands(&self, queue: &mut QueueFilter<'_>) {
        let dropped = {
            let catalog = self.catalog.read();
            catalog
                .parent(queue.target())
                .map(|parent| catalog.is_persisted(&parent) && !catalog.is_live(&parent))
                .unwrap_or(false)
        };
        if dropped {
            tracing::debug!(handle = %queue.target(), "Skipping column commands of dropped table");
            queue.retain(|_| false);
        }
    }
}

/// Manager for literal script commands, which carry their own actions
pub struct ScriptManager;

impl ObjectManager for ScriptManager {
    fn persist_actions(&self, command: &Command, _options: &SaveOptions) -> Result<Vec<PersistAction>> {
        Err(unsupported(command))
    }
}

/// Resolver dispatching on the handle kind
pub fn manager_resolver(catalog: &SharedCatalog) -> Arc<dyn ManagerResolver> {
    let tables: Arc<dyn ObjectManager> = Arc::new(TableManager::new(catalog.clone()));
    let columns: Arc<dyn ObjectManager> = Arc::new(ColumnManager::new(catalog.clone()));
    let scripts: Arc<dyn ObjectManager> = Arc::new(ScriptManager);
    Arc::new(
        move |target: &ObjectHandle| -> Option<Arc<dyn ObjectManager>> {
            match target.kind() {
                TABLE => Some(tables.clone()),
                COLUMN => Some(columns.clone()),
                SCRIPT => Some(scripts.clone()),
                _ => None,
            }
        },
    )
}
