/// Paged-query support for reading from SQL databases.
///
/// A [`PagingQueryProvider`](rdbc_reader::PagingQueryProvider) composes the
/// page statement from select, from, where and sort-key clauses; the
/// [`RdbcPagingItemReader`](rdbc_reader::RdbcPagingItemReader) fetches the
/// result page by page over a sqlx `Any` pool and maps each row through a
/// [`RowMapper`](rdbc_reader::RowMapper).
///
/// The reader tracks how many rows it has handed out and exposes the count
/// through the checkpoint surface, so a restarted step resumes at the first
/// row of the chunk that failed instead of re-reading the table.
pub mod rdbc_reader;
