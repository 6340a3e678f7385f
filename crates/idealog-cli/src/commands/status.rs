use idealog_core::Collection;
use serde::Serialize;

use crate::commands::common::{print_json, Context};
use crate::error::CliError;

#[derive(Debug, Serialize)]
pub struct StatusItem {
    pub owner: String,
    pub db_path: String,
    pub ideas: usize,
    pub drafts: usize,
    pub pending_changes: usize,
    pub pending_deletes: usize,
    pub remote_configured: bool,
}

pub async fn run_status(ctx: &Context) -> Result<(), CliError> {
    let owner = ctx.owner()?;
    let store = ctx.open_store()?;
    let pending = store.pending_for_sync(&owner).await?;

    let status = StatusItem {
        owner: owner.to_string(),
        db_path: ctx.db_path.display().to_string(),
        ideas: store.count(Collection::Ideas, &owner).await?,
        drafts: store.count(Collection::Drafts, &owner).await?,
        pending_changes: pending.creates_and_edits.len(),
        pending_deletes: pending.deletes.len(),
        remote_configured: crate::commands::common::remote_config_from_env()?.is_some(),
    };

    if ctx.json {
        return print_json(&status);
    }

    println!("Owner:    {}", status.owner);
    println!("Database: {}", status.db_path);
    println!("Ideas:    {}", status.ideas);
    println!("Drafts:   {}", status.drafts);
    println!(
        "Pending:  {} change(s), {} delete(s)",
        status.pending_changes, status.pending_deletes
    );
    if !status.remote_configured {
        println!("Remote:   not configured");
    }
    Ok(())
}
