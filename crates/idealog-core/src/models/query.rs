//! Query, pagination and pending-sync result types

use serde::{Deserialize, Serialize};

use super::{LocalId, Record};
use crate::error::{Error, Result};

/// Field a listing is ordered by.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortField {
    #[default]
    CreatedAt,
    UpdatedAt,
    /// Idea title, or draft content
    Title,
}

/// Sort direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortDirection {
    Ascending,
    #[default]
    Descending,
}

impl SortDirection {
    /// SQL keyword
    pub const fn as_sql(self) -> &'static str {
        match self {
            Self::Ascending => "ASC",
            Self::Descending => "DESC",
        }
    }
}

/// Ordering of a listing. Ties are always broken by insertion order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Sort {
    pub field: SortField,
    pub direction: SortDirection,
}

impl Sort {
    /// Newest records first
    pub const fn newest_first() -> Self {
        Self {
            field: SortField::CreatedAt,
            direction: SortDirection::Descending,
        }
    }

    /// Oldest records first
    pub const fn oldest_first() -> Self {
        Self {
            field: SortField::CreatedAt,
            direction: SortDirection::Ascending,
        }
    }
}

/// Owner-scoped listing request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordQuery {
    /// Case-insensitive substring matched against the text fields
    pub search: Option<String>,
    /// Inclusive lower bound on `created_at` (Unix ms)
    pub created_from: Option<i64>,
    /// Inclusive upper bound on `created_at` (Unix ms)
    pub created_to: Option<i64>,
    /// Only drafts referencing this idea
    pub idea_id: Option<LocalId>,
    pub sort: Sort,
    /// 1-based page number
    pub page: usize,
    /// Page size
    pub limit: usize,
}

impl Default for RecordQuery {
    fn default() -> Self {
        Self {
            search: None,
            created_from: None,
            created_to: None,
            idea_id: None,
            sort: Sort::newest_first(),
            page: 1,
            limit: 10,
        }
    }
}

impl RecordQuery {
    /// Set the search term; blank terms are ignored
    #[must_use]
    pub fn with_search(mut self, term: impl Into<String>) -> Self {
        let term = term.into();
        self.search = (!term.trim().is_empty()).then(|| term.trim().to_string());
        self
    }

    /// Restrict to an inclusive creation-time range
    #[must_use]
    pub const fn with_created_range(mut self, from: Option<i64>, to: Option<i64>) -> Self {
        self.created_from = from;
        self.created_to = to;
        self
    }

    /// Restrict drafts to one idea
    #[must_use]
    pub const fn with_idea(mut self, idea_id: LocalId) -> Self {
        self.idea_id = Some(idea_id);
        self
    }

    #[must_use]
    pub const fn with_sort(mut self, sort: Sort) -> Self {
        self.sort = sort;
        self
    }

    #[must_use]
    pub const fn with_page(mut self, page: usize, limit: usize) -> Self {
        self.page = page;
        self.limit = limit;
        self
    }

    /// Reject unusable pagination.
    pub fn validate(&self) -> Result<()> {
        if self.page == 0 {
            return Err(Error::Validation("page numbers start at 1".into()));
        }
        if self.limit == 0 {
            return Err(Error::Validation("page limit must be positive".into()));
        }
        if let (Some(from), Some(to)) = (self.created_from, self.created_to) {
            if from > to {
                return Err(Error::Validation(
                    "date range start is after its end".into(),
                ));
            }
        }
        Ok(())
    }

    /// Number of rows skipped before this page
    pub const fn offset(&self) -> usize {
        self.page.saturating_sub(1).saturating_mul(self.limit)
    }

    /// Stable text form used in cache keys
    pub fn cache_params(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// One page of a listing plus the total number of matches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordPage {
    pub items: Vec<Record>,
    /// Matches across all pages
    pub total: usize,
}

/// Records awaiting a push, partitioned by the tombstone flag.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingSync {
    /// Live records created or edited locally
    pub creates_and_edits: Vec<Record>,
    /// Tombstoned records whose deletion has not been pushed
    pub deletes: Vec<Record>,
}

impl PendingSync {
    /// Total pending records
    pub fn len(&self) -> usize {
        self.creates_and_edits.len() + self.deletes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.creates_and_edits.is_empty() && self.deletes.is_empty()
    }

    /// Split a list of pending records by their tombstone flag
    pub fn partition(records: Vec<Record>) -> Self {
        let (deletes, creates_and_edits) = records.into_iter().partition(|record| record.deleted);
        Self {
            creates_and_edits,
            deletes,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn offset_is_derived_from_one_based_page() {
        let query = RecordQuery::default().with_page(2, 10);
        assert_eq!(query.offset(), 10);
        assert_eq!(RecordQuery::default().offset(), 0);
    }

    #[test]
    fn zero_page_or_limit_is_rejected() {
        assert!(RecordQuery::default().with_page(0, 10).validate().is_err());
        assert!(RecordQuery::default().with_page(1, 0).validate().is_err());
    }

    #[test]
    fn inverted_date_range_is_rejected() {
        let query = RecordQuery::default().with_created_range(Some(10), Some(5));
        assert!(query.validate().is_err());
    }

    #[test]
    fn blank_search_is_dropped() {
        assert_eq!(RecordQuery::default().with_search("   ").search, None);
        assert_eq!(
            RecordQuery::default().with_search(" Rust ").search.as_deref(),
            Some("Rust")
        );
    }

    #[test]
    fn cache_params_differ_per_page() {
        let first = RecordQuery::default().with_page(1, 10).cache_params();
        let second = RecordQuery::default().with_page(2, 10).cache_params();
        assert_ne!(first, second);
    }
}
