//! Database setup command (`helpdesk init`).

use std::path::Path;

use anyhow::Result;

pub fn cmd_init(db_path: &Path) -> Result<()> {
    helpdesk::desk::server::open_database(db_path)?;
    println!("Database initialized at {}", db_path.display());
    Ok(())
}
