//! Catalog reflector
//!
//! Mirrors create, delete and rename commands into the shared catalog so the
//! model shows unsaved edits. Other kinds leave the catalog alone.

use editkit_core::{Command, CommandKind, CommandReflector};
use tracing::warn;

use crate::catalog::SharedCatalog;

pub struct CatalogReflector {
    catalog: SharedCatalog,
}

impl CatalogReflector {
    pub fn new(catalog: SharedCatalog) -> Self {
        Self { catalog }
    }

    fn apply(&self, command: &Command, forward: bool) {
        let target = command.target();
        let mut catalog = self.catalog.write();
        let result = match (command.kind(), forward) {
            (CommandKind::Create { name, .. }, true) => catalog
                .rename(target, name)
                .and_then(|_| catalog.set_live(target, true)),
            (CommandKind::Create { .. }, false) => catalog.set_live(target, false),
            (CommandKind::Delete, true) => catalog.set_live(target, false),
            (CommandKind::Delete, false) => catalog.set_live(target, true),
            (CommandKind::Rename { new_name, .. }, true) => catalog.rename(target, new_name),
            (CommandKind::Rename { old_name, .. }, false) => catalog.rename(target, old_name),
            _ => Ok(()),
        };
        if let Err(err) = result {
            warn!(
                handle = %target,
                command_title = command.title(),
                err_code = err.code(),
                error = %err,
                "Can't reflect command"
            );
        }
    }
}

impl CommandReflector for CatalogReflector {
    fn redo(&self, command: &Command) {
        self.apply(command, true);
    }

    fn undo(&self, command: &Command) {
        self.apply(command, false);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{Catalog, ColumnSpec};
    use std::collections::BTreeMap;

    #[test]
    fn test_create_redo_and_undo_toggle_visibility() {
        let catalog = Catalog::new().shared();
        let table = catalog.write().allocate_table("t");
        let reflector = CatalogReflector::new(catalog.clone());
        let create = Command::create(table.clone(), "t", BTreeMap::new());

        reflector.redo(&create);
        assert!(catalog.read().is_live(&table));
        reflector.undo(&create);
        assert!(!catalog.read().is_live(&table));
    }

    #[test]
    fn test_rename_round_trip() {
        let catalog = Catalog::new().shared();
        let column = {
            let mut c = catalog.write();
            let table = c.allocate_table("t");
            c.allocate_column(&table, "a", ColumnSpec::new("TEXT")).unwrap()
        };
        let reflector = CatalogReflector::new(catalog.clone());
        let rename = Command::rename(column.clone(), "a", "b");

        reflector.redo(&rename);
        assert_eq!(catalog.read().name(&column), Some("b"));
        reflector.undo(&rename);
        assert_eq!(catalog.read().name(&column), Some("a"));
    }
}
