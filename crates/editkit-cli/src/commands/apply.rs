//! Apply command
//!
//! Replays a JSON edit script against a database through a schema editor,
//! prints the merged commands and saves them in one transaction.

use std::path::PathBuf;

use clap::Args;
use editkit_core::{ContextConfig, NullProgressMonitor, ObjectHandle, SaveOptions};
use editkit_engine::{ColumnSpec, SchemaEditor};
use serde::Deserialize;

#[derive(Debug, Args)]
pub struct ApplyArgs {
    /// JSON file holding an array of edit steps
    pub script: PathBuf,

    #[arg(long, default_value = "editkit.db")]
    pub db: PathBuf,

    /// Reflect edits into the catalog only after a successful save
    #[arg(long)]
    pub atomic: bool,

    /// Print the merged commands without saving
    #[arg(long)]
    pub dry_run: bool,
}

#[derive(Debug, Deserialize)]
struct ColumnDef {
    name: String,
    #[serde(flatten)]
    spec: ColumnSpec,
}

/// One step of an edit script; tables and columns are named by their
/// current (pending) names
#[derive(Debug, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum Step {
    CreateTable {
        name: String,
        #[serde(default)]
        columns: Vec<ColumnDef>,
    },
    AddColumn {
        table: String,
        column: ColumnDef,
    },
    RenameTable {
        table: String,
        new_name: String,
    },
    RenameColumn {
        table: String,
        column: String,
        new_name: String,
    },
    DropTable {
        table: String,
    },
    DropColumn {
        table: String,
        column: String,
    },
    Sql {
        #[serde(default)]
        title: Option<String>,
        sql: String,
    },
    Undo,
    Redo,
}

pub fn execute(args: ApplyArgs) -> Result<(), Box<dyn std::error::Error>> {
    let text = std::fs::read_to_string(&args.script)?;
    let steps: Vec<Step> = serde_json::from_str(&text)?;

    let config = if args.atomic {
        ContextConfig::atomic()
    } else {
        ContextConfig::default()
    };
    let editor = SchemaEditor::open_path(&args.db, config)?;

    for (index, step) in steps.into_iter().enumerate() {
        apply_step(&editor, step).map_err(|e| format!("step {}: {}", index + 1, e))?;
    }

    let commands = editor.context().get_final_commands();
    if commands.is_empty() {
        println!("No pending changes");
    } else {
        println!("Pending commands:");
        for command in &commands {
            println!(
                "  {} [{} {}]",
                command.title(),
                command.kind().name(),
                command.target()
            );
        }
    }

    if args.dry_run {
        println!("Dry run: nothing saved");
        return Ok(());
    }

    editor
        .context()
        .save_changes(&NullProgressMonitor, &SaveOptions::new())?;
    println!("Saved {} command(s) to {}", commands.len(), args.db.display());
    Ok(())
}

fn apply_step(editor: &SchemaEditor, step: Step) -> Result<(), Box<dyn std::error::Error>> {
    match step {
        Step::CreateTable { name, columns } => {
            editor.create_table(&name, columns.into_iter().map(|c| (c.name, c.spec)))?;
        }
        Step::AddColumn { table, column } => {
            let table = table_handle(editor, &table)?;
            editor.add_column(&table, &column.name, column.spec)?;
        }
        Step::RenameTable { table, new_name } => {
            let table = table_handle(editor, &table)?;
            editor.rename_table(&table, &new_name)?;
        }
        Step::RenameColumn {
            table,
            column,
            new_name,
        } => {
            let column = column_handle(editor, &table, &column)?;
            editor.rename_column(&column, &new_name)?;
        }
        Step::DropTable { table } => {
            let table = table_handle(editor, &table)?;
            editor.drop_table(&table)?;
        }
        Step::DropColumn { table, column } => {
            let column = column_handle(editor, &table, &column)?;
            editor.drop_column(&column)?;
        }
        Step::Sql { title, sql } => {
            let title = title.unwrap_or_else(|| "Execute SQL".to_string());
            editor.run_script(&title, &sql);
        }
        Step::Undo => editor.context().undo_command()?,
        Step::Redo => editor.context().redo_command()?,
    }
    Ok(())
}

fn table_handle(editor: &SchemaEditor, name: &str) -> Result<ObjectHandle, String> {
    editor
        .find_table(name)
        .ok_or_else(|| format!("unknown table '{}'", name))
}

fn column_handle(editor: &SchemaEditor, table: &str, column: &str) -> Result<ObjectHandle, String> {
    let parent = table_handle(editor, table)?;
    editor
        .find_column(&parent, column)
        .ok_or_else(|| format!("unknown column '{}.{}'", table, column))
}
