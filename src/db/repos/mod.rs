mod attachments;
mod conversations;
pub mod cursor;
mod entries;
mod memberships;
mod tasks;

pub use attachments::*;
pub use conversations::*;
pub use cursor::*;
pub use entries::*;
pub use memberships::*;
pub use tasks::*;

/// Sort order for list queries.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SortOrder {
    /// Ascending (oldest first). Entry listings default to this.
    Asc,
    /// Descending (newest first). Conversation listings default to this.
    #[default]
    Desc,
}

impl SortOrder {
    pub fn as_sql(&self) -> &'static str {
        match self {
            SortOrder::Asc => "ASC",
            SortOrder::Desc => "DESC",
        }
    }

    /// Compute the SQL comparison operator and ORDER BY direction for cursor
    /// pagination.
    ///
    /// Returns (comparison_operator, order_direction, should_reverse_results).
    pub fn cursor_query_params(
        &self,
        direction: CursorDirection,
    ) -> (&'static str, &'static str, bool) {
        match (self, direction) {
            (SortOrder::Desc, CursorDirection::Forward) => ("<", "DESC", false),
            (SortOrder::Desc, CursorDirection::Backward) => (">", "ASC", true),
            (SortOrder::Asc, CursorDirection::Forward) => (">", "ASC", false),
            (SortOrder::Asc, CursorDirection::Backward) => ("<", "DESC", true),
        }
    }
}

/// Pagination and listing parameters.
#[derive(Debug, Clone, Default)]
pub struct ListParams {
    pub limit: Option<i64>,
    pub cursor: Option<Cursor>,
    pub direction: CursorDirection,
    pub sort_order: SortOrder,
    /// Include soft-deleted rows. Admin paths only.
    pub include_deleted: bool,
}

impl ListParams {
    /// Effective limit, clamped to `[1, max]`.
    pub fn effective_limit(&self, default: i64, max: i64) -> i64 {
        self.limit.unwrap_or(default).clamp(1, max)
    }
}

/// Result of a paginated list query.
#[derive(Debug, Clone)]
pub struct ListResult<T> {
    pub items: Vec<T>,
    pub has_more: bool,
    pub cursors: PageCursors,
}

impl<T> ListResult<T> {
    pub fn new(items: Vec<T>, has_more: bool, cursors: PageCursors) -> Self {
        Self {
            items,
            has_more,
            cursors,
        }
    }

    pub fn empty() -> Self {
        Self {
            items: Vec::new(),
            has_more: false,
            cursors: PageCursors::default(),
        }
    }

    /// Map the items, preserving pagination metadata.
    pub fn map<U>(self, f: impl FnMut(T) -> U) -> ListResult<U> {
        ListResult {
            items: self.items.into_iter().map(f).collect(),
            has_more: self.has_more,
            cursors: self.cursors,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn effective_limit_clamps() {
        let mut params = ListParams::default();
        assert_eq!(params.effective_limit(50, 200), 50);
        params.limit = Some(1000);
        assert_eq!(params.effective_limit(50, 200), 200);
        params.limit = Some(0);
        assert_eq!(params.effective_limit(50, 200), 1);
    }

    #[test]
    fn cursor_query_params_match_sort_and_direction() {
        assert_eq!(
            SortOrder::Desc.cursor_query_params(CursorDirection::Forward),
            ("<", "DESC", false)
        );
        assert_eq!(
            SortOrder::Asc.cursor_query_params(CursorDirection::Backward),
            ("<", "DESC", true)
        );
    }
}
