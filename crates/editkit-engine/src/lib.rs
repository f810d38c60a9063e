//! editkit Engine - SQL schema editing on top of the command kernel
//!
//! Provides the catalog, the object managers and reflectors for SQLite
//! tables and columns, and `SchemaEditor`, which issues commands for
//! high-level schema edits.

pub mod catalog;
pub mod editor;
pub mod managers;
pub mod reflectors;

pub use catalog::{Catalog, ColumnSpec, SharedCatalog};
pub use editor::SchemaEditor;
pub use managers::{manager_resolver, ColumnManager, ScriptManager, TableManager};
pub use reflectors::CatalogReflector;
