use std::env;
use std::io::{self, IsTerminal, Read};
use std::path::{Path, PathBuf};

use chrono::{NaiveDate, Utc};
use idealog_core::config::{EngineConfig, RemoteConfig};
use idealog_core::models::{parse_text_timestamp, RecordQuery, SyncConflict};
use idealog_core::session::Session;
use idealog_core::sync::HttpRemoteStore;
use idealog_core::util::non_blank;
use idealog_core::{Collection, LocalId, OwnerId, Record, RecordStore, SyncEngine};
use serde::Serialize;

use crate::cli::ListArgs;
use crate::error::CliError;

pub const DB_PATH_ENV: &str = "IDEALOG_DB_PATH";
pub const OWNER_ENV: &str = "IDEALOG_OWNER_ID";
pub const REMOTE_URL_ENV: &str = "IDEALOG_REMOTE_URL";
pub const REMOTE_TOKEN_ENV: &str = "IDEALOG_REMOTE_TOKEN";

/// Everything a command needs: where the data lives and who is acting.
pub struct Context {
    pub db_path: PathBuf,
    pub session: Session,
    pub config: EngineConfig,
    pub json: bool,
}

impl Context {
    pub fn owner(&self) -> Result<OwnerId, CliError> {
        Ok(self.session.require_owner()?)
    }

    pub fn open_store(&self) -> Result<RecordStore, CliError> {
        open_store(&self.db_path, &self.config)
    }

    /// Start an engine against the configured remote store.
    pub fn open_engine(&self) -> Result<SyncEngine<HttpRemoteStore>, CliError> {
        let remote_config = remote_config_from_env()?.ok_or(CliError::RemoteNotConfigured)?;
        tracing::debug!("Using remote store at {}", remote_config.base_url);
        let remote = HttpRemoteStore::new(remote_config)?;
        Ok(SyncEngine::start(self.open_store()?, remote, self.config))
    }
}

#[derive(Debug, Serialize)]
pub struct RecordListItem {
    pub id: i64,
    pub collection: Collection,
    pub preview: String,
    pub created_at: i64,
    pub updated_at: Option<i64>,
    pub relative_time: String,
    pub sync_state: String,
    pub remote_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SyncConflictItem {
    pub id: i64,
    pub collection: Collection,
    pub local_id: i64,
    pub remote_id: String,
    pub local_updated_at: i64,
    pub remote_updated_at: i64,
    pub resolved_at: i64,
    pub resolved_at_iso: String,
    pub policy: String,
}

pub fn resolve_db_path(cli_db_path: Option<PathBuf>) -> PathBuf {
    cli_db_path
        .or_else(|| env::var_os(DB_PATH_ENV).map(PathBuf::from))
        .unwrap_or_else(default_db_path)
}

pub fn default_db_path() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("idealog")
        .join("idealog.db")
}

/// Session for the owner given on the command line, else from the environment.
pub fn resolve_session(cli_owner: Option<String>) -> Result<Session, CliError> {
    let owner = non_blank(cli_owner).or_else(|| non_blank(env::var(OWNER_ENV).ok()));
    Ok(match owner {
        Some(owner) => Session::signed_in(OwnerId::new(owner)?),
        None => Session::new(),
    })
}

pub fn remote_config_from_env() -> Result<Option<RemoteConfig>, CliError> {
    let Some(url) = non_blank(env::var(REMOTE_URL_ENV).ok()) else {
        return Ok(None);
    };
    let token = env::var(REMOTE_TOKEN_ENV).ok();
    Ok(Some(RemoteConfig::new(url, token)?))
}

pub fn open_store(path: &Path, config: &EngineConfig) -> Result<RecordStore, CliError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    Ok(RecordStore::open_path(path, config)?)
}

pub fn parse_local_id(id: &str) -> Result<LocalId, CliError> {
    id.trim()
        .parse::<LocalId>()
        .map_err(|_| CliError::InvalidId(id.to_string()))
}

/// Parse a creation-date bound. Bare dates cover the whole day.
pub fn parse_date_bound(value: &str, end_of_day: bool) -> Result<i64, CliError> {
    let trimmed = value.trim();
    if let Ok(date) = NaiveDate::parse_from_str(trimmed, "%Y-%m-%d") {
        let time = if end_of_day {
            date.and_hms_milli_opt(23, 59, 59, 999)
        } else {
            date.and_hms_opt(0, 0, 0)
        };
        if let Some(time) = time {
            return Ok(time.and_utc().timestamp_millis());
        }
    }

    parse_text_timestamp(trimmed).ok_or_else(|| CliError::InvalidDate(value.to_string()))
}

pub fn build_query(args: &ListArgs) -> Result<RecordQuery, CliError> {
    let from = args
        .from
        .as_deref()
        .map(|value| parse_date_bound(value, false))
        .transpose()?;
    let to = args
        .to
        .as_deref()
        .map(|value| parse_date_bound(value, true))
        .transpose()?;

    let mut query = RecordQuery::default()
        .with_created_range(from, to)
        .with_sort(args.sort())
        .with_page(args.page, args.limit);
    if let Some(search) = &args.search {
        query = query.with_search(search.as_str());
    }
    Ok(query)
}

/// Content from the arguments, else from piped stdin.
pub fn resolve_content(parts: &[String]) -> Result<String, CliError> {
    if let Some(content) = normalize_content(&parts.join(" ")) {
        return Ok(content);
    }

    if let Some(content) = read_piped_stdin()? {
        return Ok(content);
    }

    Err(CliError::EmptyContent)
}

pub fn normalize_content(content: &str) -> Option<String> {
    let trimmed = content.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn read_piped_stdin() -> Result<Option<String>, CliError> {
    let mut stdin = io::stdin();
    if stdin.is_terminal() {
        return Ok(None);
    }

    let mut buffer = String::new();
    stdin.read_to_string(&mut buffer)?;
    Ok(normalize_content(&buffer))
}

pub fn print_json<T: Serialize>(value: &T) -> Result<(), CliError> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

pub fn record_preview(record: &Record, max_chars: usize) -> String {
    let collapsed = record
        .fields
        .headline()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ");

    if collapsed.chars().count() <= max_chars {
        collapsed
    } else {
        let take_len = max_chars.saturating_sub(3);
        let mut truncated = collapsed.chars().take(take_len).collect::<String>();
        truncated.push_str("...");
        truncated
    }
}

pub fn record_to_list_item(record: &Record) -> RecordListItem {
    let now_ms = Utc::now().timestamp_millis();
    RecordListItem {
        id: record.local_id.get(),
        collection: record.collection(),
        preview: record_preview(record, 80),
        created_at: record.created_at,
        updated_at: record.updated_at,
        relative_time: format_relative_time(record.effective_updated_at(), now_ms),
        sync_state: record.sync_state.as_str().to_string(),
        remote_id: record.remote_id.as_ref().map(ToString::to_string),
    }
}

pub fn format_record_lines(records: &[Record]) -> Vec<String> {
    let now_ms = Utc::now().timestamp_millis();
    records
        .iter()
        .map(|record| {
            let preview = record_preview(record, 40);
            let relative_time = format_relative_time(record.effective_updated_at(), now_ms);
            let marker = if record.is_pending() { "*" } else { " " };
            format!(
                "{:>6}{marker} {preview:<40}  {relative_time}",
                record.local_id.get()
            )
        })
        .collect()
}

pub fn sync_conflict_to_item(conflict: &SyncConflict) -> SyncConflictItem {
    SyncConflictItem {
        id: conflict.id,
        collection: conflict.collection,
        local_id: conflict.local_id.get(),
        remote_id: conflict.remote_id.to_string(),
        local_updated_at: conflict.local_updated_at,
        remote_updated_at: conflict.remote_updated_at,
        resolved_at: conflict.resolved_at,
        resolved_at_iso: format_sync_timestamp(conflict.resolved_at),
        policy: conflict.policy.clone(),
    }
}

pub fn format_sync_conflict_lines(conflicts: &[SyncConflict]) -> Vec<String> {
    conflicts
        .iter()
        .map(|conflict| {
            format!(
                "{}  {:<11}  {} {}  local={} remote={}",
                format_sync_timestamp(conflict.resolved_at),
                conflict.policy,
                conflict.collection.singular(),
                conflict.local_id,
                conflict.local_updated_at,
                conflict.remote_updated_at
            )
        })
        .collect()
}

pub fn format_sync_timestamp(timestamp_ms: i64) -> String {
    chrono::DateTime::from_timestamp_millis(timestamp_ms).map_or_else(
        || timestamp_ms.to_string(),
        |date_time| date_time.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
    )
}

pub fn format_relative_time(timestamp_ms: i64, now_ms: i64) -> String {
    let diff = now_ms.saturating_sub(timestamp_ms);
    let minute = 60_000;
    let hour = 60 * minute;
    let day = 24 * hour;
    let week = 7 * day;
    let month = 30 * day;
    let year = 365 * day;

    if diff < minute {
        "just now".to_string()
    } else if diff < hour {
        format!("{}m ago", diff / minute)
    } else if diff < day {
        format!("{}h ago", diff / hour)
    } else if diff < week {
        format!("{}d ago", diff / day)
    } else if diff < month {
        format!("{}w ago", diff / week)
    } else if diff < year {
        format!("{}mo ago", diff / month)
    } else {
        format!("{}y ago", diff / year)
    }
}
