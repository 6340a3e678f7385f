use idealog_core::{Collection, IdeaFields, OwnerId, Record, RecordFields, RecordPatch, RecordStore};

use crate::cli::{IdeaCommands, IdeaFieldArgs, ListArgs};
use crate::commands::common::{
    build_query, format_record_lines, normalize_content, parse_local_id, print_json,
    record_to_list_item, Context, RecordListItem,
};
use crate::error::CliError;

pub async fn run_idea(command: IdeaCommands, ctx: &Context) -> Result<(), CliError> {
    let owner = ctx.owner()?;
    let store = ctx.open_store()?;

    match command {
        IdeaCommands::Add { title, fields } => {
            let record = add_idea(&store, &owner, &title.join(" "), fields).await?;
            if ctx.json {
                print_json(&record)?;
            } else {
                println!("{}", record.local_id);
            }
        }
        IdeaCommands::List(args) => list_ideas(&store, &owner, &args, ctx.json).await?,
        IdeaCommands::Show { id } => {
            let record = store
                .get(Collection::Ideas, parse_local_id(&id)?, &owner)
                .await?;
            if ctx.json {
                print_json(&record)?;
            } else {
                print_idea(&record);
            }
        }
        IdeaCommands::Edit { id, title, fields } => {
            let record = edit_idea(&store, &owner, &id, title, fields).await?;
            println!("{}", record.local_id);
        }
        IdeaCommands::Delete { id } => {
            let local_id = parse_local_id(&id)?;
            if !store.soft_delete(Collection::Ideas, local_id, &owner).await? {
                return Err(CliError::RecordNotFound {
                    collection: "idea",
                    id,
                });
            }
            println!("{local_id}");
        }
    }

    Ok(())
}

pub async fn add_idea(
    store: &RecordStore,
    owner: &OwnerId,
    title: &str,
    args: IdeaFieldArgs,
) -> Result<Record, CliError> {
    let title = normalize_content(title).ok_or(CliError::EmptyTitle)?;
    let mut fields = IdeaFields::titled(title);
    apply_field_args(&mut fields, args);
    Ok(store.create(owner, RecordFields::Idea(fields)).await?)
}

pub async fn edit_idea(
    store: &RecordStore,
    owner: &OwnerId,
    id: &str,
    title: Option<String>,
    args: IdeaFieldArgs,
) -> Result<Record, CliError> {
    let local_id = parse_local_id(id)?;
    let current = store.get(Collection::Ideas, local_id, owner).await?;
    let Some(mut fields) = current.as_idea().cloned() else {
        return Err(CliError::RecordNotFound {
            collection: "idea",
            id: id.to_string(),
        });
    };

    let original = fields.clone();
    if let Some(title) = title {
        fields.title = normalize_content(&title).ok_or(CliError::EmptyTitle)?;
    }
    apply_field_args(&mut fields, args);
    if fields == original {
        return Err(CliError::EmptyEdit);
    }

    store
        .update(
            Collection::Ideas,
            local_id,
            owner,
            RecordPatch::fields(RecordFields::Idea(fields)),
        )
        .await?
        .ok_or_else(|| CliError::RecordNotFound {
            collection: "idea",
            id: id.to_string(),
        })
}

fn apply_field_args(fields: &mut IdeaFields, args: IdeaFieldArgs) {
    let IdeaFieldArgs {
        content_idea,
        context,
        problem,
        discovery,
        teaching_angle,
        code,
        hook,
    } = args;

    for (target, value) in [
        (&mut fields.content_idea, content_idea),
        (&mut fields.context, context),
        (&mut fields.problem, problem),
        (&mut fields.discovery, discovery),
        (&mut fields.teaching_angle, teaching_angle),
        (&mut fields.code, code),
        (&mut fields.hook, hook),
    ] {
        if let Some(value) = value {
            *target = value.trim().to_string();
        }
    }
}

async fn list_ideas(
    store: &RecordStore,
    owner: &OwnerId,
    args: &ListArgs,
    as_json: bool,
) -> Result<(), CliError> {
    let query = build_query(args)?;
    let page = store.query(Collection::Ideas, owner, &query).await?;

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
        println!("No ideas found.");
        return Ok(());
    }
    for line in format_record_lines(&page.items) {
        println!("{line}");
    }
    println!("page {} ({} total)", query.page, page.total);
    Ok(())
}

fn print_idea(record: &Record) {
    let Some(idea) = record.as_idea() else {
        return;
    };
    println!("# {}", idea.title);
    for (label, value) in [
        ("Content idea", &idea.content_idea),
        ("Context", &idea.context),
        ("Problem", &idea.problem),
        ("Discovery", &idea.discovery),
        ("Teaching angle", &idea.teaching_angle),
        ("Hook", &idea.hook),
    ] {
        if !value.is_empty() {
            println!("\n{label}: {value}");
        }
    }
    if !idea.code.is_empty() {
        println!("\n```\n{}\n```", idea.code);
    }
}
