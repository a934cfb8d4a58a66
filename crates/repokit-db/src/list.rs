//! List helpers: filtering, ordering, and limit/offset pagination.
//!
//! These compose over a [`QuerySet`] the way a list endpoint needs them:
//! a [`FilterSet`] narrows the set, an [`Ordering`] sorts it, and a
//! [`LimitOffsetPagination`] cuts one page out of it alongside the total
//! count. [`ListService`] wires the three together.
//!
//! ```ignore
//! let listed = ListService::new(sections.objects())
//!     .with_filterset(FilterSet::new().condition("title__icontains", "intro"))
//!     .with_ordering(Ordering::new(["-position"]))
//!     .with_pagination(LimitOffsetPagination::new(10, 20)?)
//!     .list()
//!     .await?;
//! ```

use repokit_core::{QuerySettings, RepoError, RepoResult};
use serde::{Deserialize, Serialize};

use crate::entity::{Entity, Fields};
use crate::query::queryset::QuerySet;
use crate::value::Value;

/// Default page size for [`LimitOffsetPagination`].
pub const DEFAULT_LIMIT: i64 = 10;

/// Largest page size [`LimitOffsetPagination`] accepts by default.
pub const MAX_LIMIT: i64 = 100;

/// Ordering directives, e.g. `["-position", "section__title"]`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ordering {
    #[serde(default)]
    pub ordering: Vec<String>,
}

impl Ordering {
    /// Creates directives from field paths; a leading `-` sorts descending.
    pub fn new<I, S>(ordering: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            ordering: ordering.into_iter().map(Into::into).collect(),
        }
    }

    /// Applies the directives with `order_by`.
    pub fn order_queryset<'s, E: Entity>(
        &self,
        queryset: &QuerySet<'s, E>,
    ) -> RepoResult<QuerySet<'s, E>> {
        queryset.order_by(&self.ordering)
    }
}

/// Filter conditions keyed by lookup path.
///
/// Conditions whose value is `Null` are treated as unset and skipped; use
/// an explicit `isnull` lookup to filter on NULL.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FilterSet {
    pub conditions: Fields,
}

impl FilterSet {
    /// An empty filter set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a condition. A later condition on the same path replaces it.
    pub fn condition(mut self, path: impl Into<String>, value: impl Into<Value>) -> Self {
        let path = path.into();
        let value = value.into();
        match self.conditions.iter_mut().find(|(p, _)| *p == path) {
            Some(slot) => slot.1 = value,
            None => self.conditions.push((path, value)),
        }
        self
    }

    /// The conditions that will be applied.
    pub fn active(&self) -> impl Iterator<Item = &(String, Value)> {
        self.conditions.iter().filter(|(_, v)| !v.is_null())
    }

    /// Applies the active conditions with `filter`.
    pub fn filter_queryset<'s, E: Entity>(
        &self,
        queryset: &QuerySet<'s, E>,
    ) -> RepoResult<QuerySet<'s, E>> {
        queryset.filter(self.active().map(|(p, v)| (p.as_str(), v.clone())))
    }
}

/// One page of results plus the unpaginated total.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page<T> {
    /// Matching entities across all pages.
    pub count: u64,
    /// This page's entities.
    pub results: Vec<T>,
}

/// Cuts `[offset, offset + limit)` out of a query set.
///
/// Deserialising from request parameters applies the same checks as
/// [`new`](Self::new), with missing values taking their defaults.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "PaginationParams")]
pub struct LimitOffsetPagination {
    limit: i64,
    offset: i64,
    #[serde(skip)]
    max_limit: i64,
}

#[derive(Deserialize)]
struct PaginationParams {
    limit: Option<i64>,
    offset: Option<i64>,
}

impl TryFrom<PaginationParams> for LimitOffsetPagination {
    type Error = RepoError;

    fn try_from(params: PaginationParams) -> RepoResult<Self> {
        Self::new(
            params.limit.unwrap_or(DEFAULT_LIMIT),
            params.offset.unwrap_or(0),
        )
    }
}

impl Default for LimitOffsetPagination {
    fn default() -> Self {
        Self {
            limit: DEFAULT_LIMIT,
            offset: 0,
            max_limit: MAX_LIMIT,
        }
    }
}

impl LimitOffsetPagination {
    /// Creates a paginator.
    ///
    /// # Errors
    ///
    /// `ConfigurationError` unless `1 <= limit <= 100` and `offset >= 0`.
    pub fn new(limit: i64, offset: i64) -> RepoResult<Self> {
        Self::default().with_bounds(limit, offset)
    }

    /// A paginator using the configured default and maximum page sizes.
    pub fn from_settings(settings: &QuerySettings) -> RepoResult<Self> {
        let base = Self {
            max_limit: settings.max_page_size,
            ..Self::default()
        };
        base.with_bounds(settings.default_page_size, 0)
    }

    /// A copy with new bounds, checked against this paginator's maximum.
    pub fn with_bounds(&self, limit: i64, offset: i64) -> RepoResult<Self> {
        if limit < 1 || limit > self.max_limit {
            return Err(RepoError::ConfigurationError(format!(
                "limit must be between 1 and {}, got {limit}",
                self.max_limit
            )));
        }
        if offset < 0 {
            return Err(RepoError::ConfigurationError(format!(
                "offset must be non-negative, got {offset}"
            )));
        }
        Ok(Self {
            limit,
            offset,
            max_limit: self.max_limit,
        })
    }

    /// The page size.
    pub const fn limit(&self) -> i64 {
        self.limit
    }

    /// The number of rows skipped before the page.
    pub const fn offset(&self) -> i64 {
        self.offset
    }

    /// Counts the full set, then evaluates the requested page.
    pub async fn paginate_queryset<E: Entity>(
        &self,
        queryset: &QuerySet<'_, E>,
    ) -> RepoResult<Page<E>> {
        let count = queryset.count().await?;
        let end = self.offset.checked_add(self.limit).ok_or_else(|| {
            RepoError::ConfigurationError(format!("offset {} is out of range", self.offset))
        })?;
        let results = queryset.slice(self.offset..end)?.fetch().await?;
        tracing::debug!(
            entity = E::descriptor().name,
            count,
            page = results.len(),
            "paginated list"
        );
        Ok(Page { count, results })
    }
}

/// What [`ListService::list`] produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Listing<T> {
    /// A paginated listing.
    Page(Page<T>),
    /// Every matching entity.
    All(Vec<T>),
}

impl<T> Listing<T> {
    /// The listed items, without the page count.
    pub fn into_results(self) -> Vec<T> {
        match self {
            Self::Page(page) => page.results,
            Self::All(items) => items,
        }
    }
}

/// Filters, orders, and optionally paginates a base query set.
#[derive(Debug, Clone)]
pub struct ListService<'s, E: Entity> {
    queryset: QuerySet<'s, E>,
    filterset: Option<FilterSet>,
    ordering: Option<Ordering>,
    pagination: Option<LimitOffsetPagination>,
}

impl<'s, E: Entity> ListService<'s, E> {
    /// Lists `queryset` as-is until filters, ordering or pagination are added.
    pub fn new(queryset: QuerySet<'s, E>) -> Self {
        Self {
            queryset,
            filterset: None,
            ordering: None,
            pagination: None,
        }
    }

    /// Narrows the listing with `filterset`.
    #[must_use]
    pub fn with_filterset(mut self, filterset: FilterSet) -> Self {
        self.filterset = Some(filterset);
        self
    }

    /// Orders the listing.
    #[must_use]
    pub fn with_ordering(mut self, ordering: Ordering) -> Self {
        self.ordering = Some(ordering);
        self
    }

    /// Returns one page instead of every row.
    #[must_use]
    pub fn with_pagination(mut self, pagination: LimitOffsetPagination) -> Self {
        self.pagination = Some(pagination);
        self
    }

    /// The base query set with the filter set and ordering applied.
    pub fn queryset(&self) -> RepoResult<QuerySet<'s, E>> {
        let mut queryset = self.queryset.all();
        if let Some(filterset) = &self.filterset {
            queryset = filterset.filter_queryset(&queryset)?;
        }
        if let Some(ordering) = &self.ordering {
            queryset = ordering.order_queryset(&queryset)?;
        }
        Ok(queryset)
    }

    /// Evaluates the list: one page with a count when paginated, every
    /// entity otherwise.
    pub async fn list(&self) -> RepoResult<Listing<E>> {
        let queryset = self.queryset()?;
        match &self.pagination {
            Some(pagination) => Ok(Listing::Page(pagination.paginate_queryset(&queryset).await?)),
            None => Ok(Listing::All(queryset.fetch().await?)),
        }
    }
}
