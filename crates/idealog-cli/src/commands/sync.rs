use idealog_core::sync::{ConflictPolicy, MergeOutcome, PushAction, PushReport};

use crate::commands::common::{
    format_sync_conflict_lines, print_json, sync_conflict_to_item, Context, SyncConflictItem,
};
use crate::error::CliError;

pub async fn run_push(ctx: &Context) -> Result<(), CliError> {
    let owner = ctx.owner()?;
    let engine = ctx.open_engine()?;
    let result = engine.push(&owner).await;
    engine.shutdown().await;
    let report = result?;

    if ctx.json {
        return print_json(&report);
    }
    for line in format_push_report(&report) {
        println!("{line}");
    }
    Ok(())
}

pub async fn run_sync(ctx: &Context) -> Result<(), CliError> {
    let owner = ctx.owner()?;
    let engine = ctx.open_engine()?;
    let result = engine.sync_from_remote(&owner).await;
    engine.shutdown().await;
    print_outcome(&result?, ctx.json)
}

pub async fn run_merge(policy: ConflictPolicy, ctx: &Context) -> Result<(), CliError> {
    let owner = ctx.owner()?;
    let engine = ctx.open_engine()?;
    let result = engine.merge(&owner, policy).await;
    engine.shutdown().await;
    print_outcome(&result?, ctx.json)
}

pub async fn run_force_replace(confirmed: bool, ctx: &Context) -> Result<(), CliError> {
    if !confirmed {
        return Err(CliError::ConfirmationRequired);
    }
    let owner = ctx.owner()?;
    let engine = ctx.open_engine()?;
    let result = engine.force_replace(&owner).await;
    engine.shutdown().await;
    print_outcome(&result?, ctx.json)
}

pub async fn run_conflicts(limit: usize, ctx: &Context) -> Result<(), CliError> {
    let owner = ctx.owner()?;
    let store = ctx.open_store()?;
    let conflicts = store.list_conflicts(&owner, limit).await?;

    if ctx.json {
        let items = conflicts
            .iter()
            .map(sync_conflict_to_item)
            .collect::<Vec<SyncConflictItem>>();
        return print_json(&items);
    }

    if conflicts.is_empty() {
        println!("No sync conflicts recorded.");
        return Ok(());
    }
    for line in format_sync_conflict_lines(&conflicts) {
        println!("{line}");
    }
    Ok(())
}

fn print_outcome(outcome: &MergeOutcome, as_json: bool) -> Result<(), CliError> {
    if as_json {
        return print_json(outcome);
    }
    for line in format_merge_outcome(outcome) {
        println!("{line}");
    }
    Ok(())
}

pub fn format_push_report(report: &PushReport) -> Vec<String> {
    if report.succeeded.is_empty() && report.failed.is_empty() {
        return vec!["Nothing to push".to_string()];
    }

    let mut lines = Vec::new();
    for item in &report.succeeded {
        let action = match item.action {
            PushAction::Created => "created",
            PushAction::Updated => "updated",
            PushAction::Deleted => "deleted",
            PushAction::DiscardedLocal => "discarded",
        };
        lines.push(format!(
            "{action:<9}  {} {}",
            item.collection.singular(),
            item.local_id
        ));
    }
    for item in &report.failed {
        let hint = if item.retryable { " (retry later)" } else { "" };
        lines.push(format!(
            "failed     {} {}: {}{hint}",
            item.collection.singular(),
            item.local_id,
            item.error
        ));
    }
    for warning in &report.warnings {
        lines.push(format!("warning    {warning}"));
    }
    lines.push(format!(
        "Push finished: {} succeeded, {} failed",
        report.succeeded.len(),
        report.failed.len()
    ));
    lines
}

pub fn format_merge_outcome(outcome: &MergeOutcome) -> Vec<String> {
    let mut lines = Vec::new();
    if outcome.cleared {
        lines.push("Local data cleared".to_string());
    }
    for conflict in &outcome.conflicts {
        lines.push(format!(
            "conflict   {} {} (local={} remote={})",
            conflict.collection.singular(),
            conflict.local.local_id,
            conflict.local_updated_at(),
            conflict.remote_updated_at()
        ));
    }
    lines.push(format!(
        "Sync finished: {} inserted, {} updated, {} deleted, {} conflict(s)",
        outcome.inserted,
        outcome.updated,
        outcome.deleted,
        outcome.conflicts.len()
    ));
    lines
}
