use std::{collections::VecDeque, fmt, sync::Mutex};

use log::debug;
use sqlx::{any::AnyRow, Any, Pool};
use tokio::{runtime, task};

use crate::{
    core::{
        item::{ItemReader, ItemReaderResult},
        parameters::ParameterValue,
    },
    error::BatchError,
};

/// Direction of one sort key in the page statement's `ORDER BY` clause.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Ascending,
    Descending,
}

impl fmt::Display for SortOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SortOrder::Ascending => write!(f, "ASC"),
            SortOrder::Descending => write!(f, "DESC"),
        }
    }
}

/// Composes the page statement from its clauses.
///
/// Every page runs the same statement with a different `LIMIT`/`OFFSET`
/// window. Bind parameters in the where clause are positional `?`
/// placeholders; the values are supplied to the reader builder in the same
/// order. Sort keys are emitted in the order they were added; restart
/// correctness requires them to impose a deterministic total order.
pub struct PagingQueryProvider {
    select_clause: String,
    from_clause: String,
    where_clause: Option<String>,
    sort_keys: Vec<(String, SortOrder)>,
}

impl PagingQueryProvider {
    fn page_sql(&self, page_size: usize, offset: usize) -> String {
        let mut sql = format!("SELECT {} FROM {}", self.select_clause, self.from_clause);
        if let Some(where_clause) = &self.where_clause {
            sql.push_str(" WHERE ");
            sql.push_str(where_clause);
        }
        if !self.sort_keys.is_empty() {
            let keys: Vec<String> = self
                .sort_keys
                .iter()
                .map(|(column, order)| format!("{} {}", column, order))
                .collect();
            sql.push_str(" ORDER BY ");
            sql.push_str(&keys.join(", "));
        }
        sql.push_str(&format!(" LIMIT {} OFFSET {}", page_size, offset));
        sql
    }
}

/// Builder for [`PagingQueryProvider`].
#[derive(Default)]
pub struct PagingQueryProviderBuilder {
    select_clause: Option<String>,
    from_clause: Option<String>,
    where_clause: Option<String>,
    sort_keys: Vec<(String, SortOrder)>,
}

impl PagingQueryProviderBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Column list of the select clause, without the `SELECT` keyword.
    pub fn select(mut self, clause: &str) -> Self {
        self.select_clause = Some(clause.to_string());
        self
    }

    /// Table expression, without the `FROM` keyword.
    pub fn from(mut self, clause: &str) -> Self {
        self.from_clause = Some(clause.to_string());
        self
    }

    /// Optional filter, without the `WHERE` keyword. Use positional `?`
    /// placeholders for bound values.
    pub fn where_clause(mut self, clause: &str) -> Self {
        self.where_clause = Some(clause.to_string());
        self
    }

    /// Appends one sort key to the `ORDER BY` clause.
    pub fn sort_key(mut self, column: &str, order: SortOrder) -> Self {
        self.sort_keys.push((column.to_string(), order));
        self
    }

    pub fn build(self) -> PagingQueryProvider {
        PagingQueryProvider {
            select_clause: self
                .select_clause
                .expect("Select clause is required for building a query provider"),
            from_clause: self
                .from_clause
                .expect("From clause is required for building a query provider"),
            where_clause: self.where_clause,
            sort_keys: self.sort_keys,
        }
    }
}

/// Maps one database row to an item.
pub trait RowMapper<T>: Send + Sync {
    /// A row that cannot be mapped is reported as
    /// [`BatchError::DataFormat`] so the skip policy can discard it.
    fn map_row(&self, row: &AnyRow) -> Result<T, BatchError>;
}

struct PageState {
    buffer: VecDeque<AnyRow>,
    /// Rows handed out so far; doubles as the offset of the next page.
    position: usize,
    exhausted: bool,
}

/// Item reader over a paged SQL query.
///
/// Each page is fetched with `LIMIT page_size OFFSET position` and buffered;
/// `read` hands out one mapped row at a time and fetches the next page when
/// the buffer drains. A short page marks the query exhausted.
///
/// The reader blocks on each page fetch. Inside a tokio context it requires
/// the multi-threaded runtime; outside, it drives the query on a runtime of
/// its own.
pub struct RdbcPagingItemReader<'a, T> {
    pool: &'a Pool<Any>,
    provider: PagingQueryProvider,
    page_size: usize,
    parameters: Vec<ParameterValue>,
    row_mapper: &'a dyn RowMapper<T>,
    state: Mutex<PageState>,
}

impl<T> RdbcPagingItemReader<'_, T> {
    fn fetch_page(&self, offset: usize) -> Result<Vec<AnyRow>, BatchError> {
        let sql = self.provider.page_sql(self.page_size, offset);
        debug!("Fetching page: {}", sql);

        let fetch = async {
            let mut query = sqlx::query(&sql);
            for value in &self.parameters {
                query = match value {
                    ParameterValue::String(v) => query.bind(v.clone()),
                    ParameterValue::I64(v) => query.bind(*v),
                    ParameterValue::F64(v) => query.bind(*v),
                    ParameterValue::Bool(v) => query.bind(*v),
                };
            }
            query.fetch_all(self.pool).await
        };

        let rows = match runtime::Handle::try_current() {
            Ok(handle) => task::block_in_place(|| handle.block_on(fetch)),
            Err(_) => runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .map_err(|error| BatchError::TransientIo(error.to_string()))?
                .block_on(fetch),
        };

        rows.map_err(|error| BatchError::TransientIo(error.to_string()))
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, PageState>, BatchError> {
        self.state
            .lock()
            .map_err(|_| BatchError::TransientIo("rdbc reader lock poisoned".to_string()))
    }
}

impl<T> ItemReader<T> for RdbcPagingItemReader<'_, T> {
    fn read(&self) -> ItemReaderResult<T> {
        let mut state = self.lock()?;

        if state.buffer.is_empty() {
            if state.exhausted {
                return Ok(None);
            }
            let rows = self.fetch_page(state.position)?;
            if rows.len() < self.page_size {
                state.exhausted = true;
            }
            state.buffer.extend(rows);
            if state.buffer.is_empty() {
                return Ok(None);
            }
        }

        // The row is consumed whether or not it maps cleanly, so a skipped
        // bad row is not re-read.
        match state.buffer.pop_front() {
            Some(row) => {
                state.position += 1;
                self.row_mapper.map_row(&row).map(Some)
            }
            None => Ok(None),
        }
    }

    fn checkpoint(&self) -> Option<usize> {
        self.lock().ok().map(|state| state.position)
    }

    fn restore(&self, checkpoint: usize) -> Result<(), BatchError> {
        let mut state = self.lock()?;
        state.position = checkpoint;
        state.buffer.clear();
        state.exhausted = false;
        Ok(())
    }
}

/// Builder for [`RdbcPagingItemReader`].
pub struct RdbcPagingItemReaderBuilder<'a, T> {
    pool: Option<&'a Pool<Any>>,
    provider: Option<PagingQueryProvider>,
    page_size: usize,
    parameters: Vec<ParameterValue>,
    row_mapper: Option<&'a dyn RowMapper<T>>,
}

impl<'a, T> RdbcPagingItemReaderBuilder<'a, T> {
    pub fn new() -> Self {
        Self {
            pool: None,
            provider: None,
            page_size: 10,
            parameters: Vec::new(),
            row_mapper: None,
        }
    }

    pub fn pool(mut self, pool: &'a Pool<Any>) -> Self {
        self.pool = Some(pool);
        self
    }

    pub fn query_provider(mut self, provider: PagingQueryProvider) -> Self {
        self.provider = Some(provider);
        self
    }

    /// Rows fetched per page. Defaults to 10.
    pub fn page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Appends one bound value for the where clause. Values are applied in
    /// the order they were added, matching the `?` placeholders.
    pub fn parameter(mut self, value: ParameterValue) -> Self {
        self.parameters.push(value);
        self
    }

    pub fn row_mapper(mut self, row_mapper: &'a dyn RowMapper<T>) -> Self {
        self.row_mapper = Some(row_mapper);
        self
    }

    pub fn build(self) -> RdbcPagingItemReader<'a, T> {
        RdbcPagingItemReader {
            pool: self.pool.expect("Pool is required for building a reader"),
            provider: self
                .provider
                .expect("Query provider is required for building a reader"),
            page_size: self.page_size,
            parameters: self.parameters,
            row_mapper: self
                .row_mapper
                .expect("Row mapper is required for building a reader"),
            state: Mutex::new(PageState {
                buffer: VecDeque::new(),
                position: 0,
                exhausted: false,
            }),
        }
    }
}

impl<T> Default for RdbcPagingItemReaderBuilder<'_, T> {
    fn default() -> Self {
        Self::new()
    }
}
