use sea_orm::sea_query::{
    MysqlQueryBuilder, PostgresQueryBuilder, QueryStatementWriter, SqliteQueryBuilder, Values,
};
use sea_orm::{ConnectionTrait, DatabaseBackend, DeriveIden, QueryResult, Statement};

use eventslog_core::EventsLogResult;

#[derive(DeriveIden, Clone, Copy)]
pub enum ChangeEvents {
    Table,
    Id,
    Project,
    DateCreated,
    EventInfo,
}

pub fn build_stmt<S: QueryStatementWriter>(backend: DatabaseBackend, stmt: &S) -> (String, Values) {
    match backend {
        DatabaseBackend::Sqlite => stmt.build(SqliteQueryBuilder),
        DatabaseBackend::Postgres => stmt.build(PostgresQueryBuilder),
        DatabaseBackend::MySql => stmt.build(MysqlQueryBuilder),
        _ => stmt.build(SqliteQueryBuilder),
    }
}

pub async fn exec<C, S>(conn: &C, stmt: &S) -> EventsLogResult<u64>
where
    C: ConnectionTrait,
    S: QueryStatementWriter,
{
    let backend = conn.get_database_backend();
    let (sql, values) = build_stmt(backend, stmt);
    let result = conn
        .execute_raw(Statement::from_sql_and_values(backend, sql, values))
        .await?;
    Ok(result.rows_affected())
}

pub async fn query_raw<C>(conn: &C, sql: &str) -> EventsLogResult<Vec<QueryResult>>
where
    C: ConnectionTrait,
{
    let backend = conn.get_database_backend();
    let rows = conn
        .query_all_raw(Statement::from_string(backend, sql.to_string()))
        .await?;
    Ok(rows)
}
