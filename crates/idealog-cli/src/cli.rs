use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};
use idealog_core::models::{Sort, SortDirection, SortField};
use idealog_core::sync::ConflictPolicy;

#[derive(Parser)]
#[command(name = "idealog")]
#[command(about = "Capture content ideas and drafts offline, sync them when you choose")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Optional path to local database file
    #[arg(long, global = true, value_name = "PATH")]
    pub db_path: Option<PathBuf>,

    /// Owner id to act as (defaults to IDEALOG_OWNER_ID)
    #[arg(long, global = true, value_name = "ID")]
    pub owner: Option<String>,

    /// Output as JSON
    #[arg(long, global = true)]
    pub json: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Manage ideas
    #[command(alias = "ideas")]
    Idea {
        #[command(subcommand)]
        command: IdeaCommands,
    },
    /// Manage drafts
    #[command(alias = "drafts")]
    Draft {
        #[command(subcommand)]
        command: DraftCommands,
    },
    /// Upload pending local changes to the remote store
    Push,
    /// Pull remote records into the local store (requires nothing pending)
    Sync,
    /// Pull remote records, flagging conflicts with pending local edits
    Merge {
        /// Which copy wins a conflict
        #[arg(long, value_enum, default_value_t = PolicyArg::RemoteWins)]
        policy: PolicyArg,
    },
    /// Replace all local data with the remote copy
    ForceReplace {
        /// Confirm that unpushed local changes will be lost
        #[arg(long)]
        yes: bool,
    },
    /// List recently resolved sync conflicts
    Conflicts {
        /// Number of conflicts to show
        #[arg(short, long, default_value = "10")]
        limit: usize,
    },
    /// Show local record counts and pending changes
    Status,
}

#[derive(Subcommand)]
pub enum IdeaCommands {
    /// Create a new idea
    #[command(alias = "new")]
    Add {
        /// Idea title
        title: Vec<String>,
        #[command(flatten)]
        fields: IdeaFieldArgs,
    },
    /// List ideas
    List(ListArgs),
    /// Show one idea
    Show {
        /// Local id
        id: String,
    },
    /// Edit an idea
    Edit {
        /// Local id
        id: String,
        /// New title
        #[arg(long)]
        title: Option<String>,
        #[command(flatten)]
        fields: IdeaFieldArgs,
    },
    /// Delete an idea
    Delete {
        /// Local id
        id: String,
    },
}

#[derive(Subcommand)]
pub enum DraftCommands {
    /// Create a new draft (content from arguments or stdin)
    #[command(alias = "new")]
    Add {
        /// Markdown content
        content: Vec<String>,
        /// Local id of the idea this draft develops
        #[arg(long, value_name = "ID")]
        idea: Option<String>,
    },
    /// List drafts
    List {
        #[command(flatten)]
        list: ListArgs,
        /// Only drafts of this idea
        #[arg(long, value_name = "ID")]
        idea: Option<String>,
    },
    /// Show one draft
    Show {
        /// Local id
        id: String,
    },
    /// Replace a draft's content (from arguments or stdin)
    Edit {
        /// Local id
        id: String,
        /// New markdown content
        content: Vec<String>,
    },
    /// Delete a draft
    Delete {
        /// Local id
        id: String,
    },
}

/// Optional idea fields shared by `add` and `edit`
#[derive(Args, Debug, Default, Clone)]
pub struct IdeaFieldArgs {
    /// The content idea itself
    #[arg(long)]
    pub content_idea: Option<String>,
    #[arg(long)]
    pub context: Option<String>,
    #[arg(long)]
    pub problem: Option<String>,
    #[arg(long)]
    pub discovery: Option<String>,
    #[arg(long)]
    pub teaching_angle: Option<String>,
    /// Code snippet illustrating the idea
    #[arg(long)]
    pub code: Option<String>,
    #[arg(long)]
    pub hook: Option<String>,
}

#[derive(Args, Debug, Clone)]
pub struct ListArgs {
    /// Case-insensitive text filter
    #[arg(short, long)]
    pub search: Option<String>,
    /// Created on or after (YYYY-MM-DD, RFC 3339 or Unix ms)
    #[arg(long, value_name = "DATE")]
    pub from: Option<String>,
    /// Created on or before (YYYY-MM-DD, RFC 3339 or Unix ms)
    #[arg(long, value_name = "DATE")]
    pub to: Option<String>,
    /// Sort field
    #[arg(long, value_enum, default_value_t = SortArg::Created)]
    pub sort: SortArg,
    /// Sort ascending instead of descending
    #[arg(long)]
    pub asc: bool,
    /// Page number, starting at 1
    #[arg(short, long, default_value = "1")]
    pub page: usize,
    /// Records per page
    #[arg(short, long, default_value = "10")]
    pub limit: usize,
}

impl ListArgs {
    pub const fn sort(&self) -> Sort {
        Sort {
            field: match self.sort {
                SortArg::Created => SortField::CreatedAt,
                SortArg::Updated => SortField::UpdatedAt,
                SortArg::Title => SortField::Title,
            },
            direction: if self.asc {
                SortDirection::Ascending
            } else {
                SortDirection::Descending
            },
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum SortArg {
    Created,
    Updated,
    Title,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum PolicyArg {
    RemoteWins,
    LocalWins,
}

impl From<PolicyArg> for ConflictPolicy {
    fn from(policy: PolicyArg) -> Self {
        match policy {
            PolicyArg::RemoteWins => Self::RemoteWins,
            PolicyArg::LocalWins => Self::LocalWins,
        }
    }
}
