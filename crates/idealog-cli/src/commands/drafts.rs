use idealog_core::{Collection, DraftFields, OwnerId, Record, RecordFields, RecordPatch, RecordStore};

use crate::cli::{DraftCommands, ListArgs};
use crate::commands::common::{
    build_query, format_record_lines, parse_local_id, print_json, record_to_list_item,
    resolve_content, Context, RecordListItem,
};
use crate::error::CliError;

pub async fn run_draft(command: DraftCommands, ctx: &Context) -> Result<(), CliError> {
    let owner = ctx.owner()?;
    let store = ctx.open_store()?;

    match command {
        DraftCommands::Add { content, idea } => {
            let content = resolve_content(&content)?;
            let record = add_draft(&store, &owner, content, idea.as_deref()).await?;
            if ctx.json {
                print_json(&record)?;
            } else {
                println!("{}", record.local_id);
            }
        }
        DraftCommands::List { list, idea } => {
            list_drafts(&store, &owner, &list, idea.as_deref(), ctx.json).await?;
        }
        DraftCommands::Show { id } => {
            let record = store
                .get(Collection::Drafts, parse_local_id(&id)?, &owner)
                .await?;
            if ctx.json {
                print_json(&record)?;
            } else if let Some(draft) = record.as_draft() {
                println!("{}", draft.content);
            }
        }
        DraftCommands::Edit { id, content } => {
            let content = resolve_content(&content)?;
            let record = edit_draft(&store, &owner, &id, content).await?;
            println!("{}", record.local_id);
        }
        DraftCommands::Delete { id } => {
            let local_id = parse_local_id(&id)?;
            if !store.soft_delete(Collection::Drafts, local_id, &owner).await? {
                return Err(CliError::RecordNotFound {
                    collection: "draft",
                    id,
                });
            }
            println!("{local_id}");
        }
    }

    Ok(())
}

/// Create a draft, checking that a referenced idea exists.
pub async fn add_draft(
    store: &RecordStore,
    owner: &OwnerId,
    content: String,
    idea: Option<&str>,
) -> Result<Record, CliError> {
    let idea_id = match idea {
        Some(id) => {
            let idea_id = parse_local_id(id)?;
            store.get(Collection::Ideas, idea_id, owner).await?;
            Some(idea_id)
        }
        None => None,
    };

    let fields = DraftFields {
        content,
        idea_id,
    };
    Ok(store.create(owner, RecordFields::Draft(fields)).await?)
}

pub async fn edit_draft(
    store: &RecordStore,
    owner: &OwnerId,
    id: &str,
    content: String,
) -> Result<Record, CliError> {
    let local_id = parse_local_id(id)?;
    let current = store.get(Collection::Drafts, local_id, owner).await?;
    let idea_id = current.as_draft().and_then(|draft| draft.idea_id);

    store
        .update(
            Collection::Drafts,
            local_id,
            owner,
            RecordPatch::fields(RecordFields::Draft(DraftFields { content, idea_id })),
        )
        .await?
        .ok_or_else(|| CliError::RecordNotFound {
            collection: "draft",
            id: id.to_string(),
        })
}

async fn list_drafts(
    store: &RecordStore,
    owner: &OwnerId,
    args: &ListArgs,
    idea: Option<&str>,
    as_json: bool,
) -> Result<(), CliError> {
    let mut query = build_query(args)?;
    if let Some(idea) = idea {
        query = query.with_idea(parse_local_id(idea)?);
    }
    let page = store.query(Collection::Drafts, owner, &query).await?;

    if as_json {
        let items = page
            .items
            .iter()
            .map(record_to_list_item)
            .collect::<Vec<RecordListItem>>();
        print_json(&serde_json::json!({ "total": page.total, "items": items }))?;
        return Ok(());
    }

    if page.items.is_empty() {
        println!("No drafts found.");
        return Ok(());
    }
    for line in format_record_lines(&page.items) {
        println!("{line}");
    }
    println!("page {} ({} total)", query.page, page.total);
    Ok(())
}
