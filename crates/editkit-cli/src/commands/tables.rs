//! Tables command

use std::path::PathBuf;

use clap::Args;
use editkit_engine::Catalog;
use editkit_store::SqliteExecutionContext;

#[derive(Debug, Args)]
pub struct TablesArgs {
    #[arg(long, default_value = "editkit.db")]
    pub db: PathBuf,
}

pub fn execute(args: TablesArgs) -> Result<(), Box<dyn std::error::Error>> {
    let db = SqliteExecutionContext::open(&args.db)?;
    let catalog = db.with_connection(Catalog::load)?;

    for table in catalog.tables() {
        let columns: Vec<String> = catalog
            .columns(&table)
            .iter()
            .filter_map(|c| catalog.column(c))
            .map(|c| {
                if c.spec.data_type.is_empty() {
                    c.name.clone()
                } else {
                    format!("{} {}", c.name, c.spec.data_type)
                }
            })
            .collect();
        println!(
            "{}: {}",
            catalog.name(&table).unwrap_or_default(),
            columns.join(", ")
        );
    }
    Ok(())
}
