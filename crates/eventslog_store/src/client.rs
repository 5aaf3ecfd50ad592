use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use sea_orm::sea_query::{Expr, ExprTrait, InsertStatement, Query};
use sea_orm::{
    ConnectOptions, ConnectionTrait, Database, DatabaseConnection, QueryResult, TransactionTrait,
};
use time::PrimitiveDateTime;

use eventslog_core::clock::{days_before, now_utc};
use eventslog_core::dialect::{DATE_ENTRY, EVENT_ENTRY, PRIMARY_ENTRY, PROJECT_ENTRY, TABLE_NAME};
use eventslog_core::{
    Dialect, EventRecord, EventRecordStore, EventsLogError, EventsLogResult, NewRecord,
    OrderingKey, ProjectEvents,
};

use crate::batch::{BatchSink, BatchWriter};
use crate::config::{BatchSettings, EventsLogConfig, PoolConfig};
use crate::db::{ChangeEvents, exec, query_raw};

/// Record store over one sea-orm connection pool.
pub struct SqlClient {
    inner: Arc<SqlConnection>,
    batch: Option<BatchWriter>,
}

struct SqlConnection {
    conn: DatabaseConnection,
    dialect: Dialect,
    path: Option<PathBuf>,
}

impl SqlClient {
    pub async fn connect(
        url: &str,
        dialect: Dialect,
        pool: Option<&PoolConfig>,
        batch: Option<BatchSettings>,
    ) -> EventsLogResult<Self> {
        Self::open(url.to_string(), dialect, None, pool, batch).await
    }

    pub async fn connect_sqlite(
        path: &Path,
        pool: Option<&PoolConfig>,
        batch: Option<BatchSettings>,
    ) -> EventsLogResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|err| EventsLogError::storage(format!("create database dir: {err}")))?;
        }
        let url = format!("sqlite://{}?mode=rwc", path.display());
        Self::open(
            url,
            Dialect::Embedded,
            Some(path.to_path_buf()),
            pool,
            batch,
        )
        .await
    }

    /// Client for the configured primary database.
    pub async fn primary(config: &EventsLogConfig, base_dir: &Path) -> EventsLogResult<Self> {
        let batch = config.batch_settings();
        match config.connection_url() {
            Some(url) => Self::connect(url, config.dialect(), config.pool.as_ref(), batch).await,
            None => {
                let path = config.sqlite_path(base_dir)?;
                Self::connect_sqlite(&path, config.pool.as_ref(), batch).await
            }
        }
    }

    /// Client for the local backup database.
    pub async fn local(config: &EventsLogConfig, base_dir: &Path) -> EventsLogResult<Self> {
        Self::connect_sqlite(&config.local_path(base_dir), config.pool.as_ref(), None).await
    }

    async fn open(
        url: String,
        dialect: Dialect,
        path: Option<PathBuf>,
        pool: Option<&PoolConfig>,
        batch: Option<BatchSettings>,
    ) -> EventsLogResult<Self> {
        if dialect == Dialect::Spanner {
            return Err(EventsLogError::config(
                "no database driver is available for the spanner dialect",
            ));
        }
        let mut options = ConnectOptions::new(url);
        options.sqlx_logging(false);
        // Remote servers may be down at startup; connect on first use instead.
        options.connect_lazy(path.is_none());
        if let Some(pool) = pool {
            if let Some(max) = pool.max_connections {
                options.max_connections(max);
            }
            if let Some(min) = pool.min_connections {
                options.min_connections(min);
            }
            if let Some(timeout_ms) = pool.connect_timeout_ms {
                options.connect_timeout(Duration::from_millis(timeout_ms));
            }
            if let Some(timeout_ms) = pool.acquire_timeout_ms {
                options.acquire_timeout(Duration::from_millis(timeout_ms));
            }
            if let Some(timeout_ms) = pool.idle_timeout_ms {
                options.idle_timeout(Duration::from_millis(timeout_ms));
            }
        }
        let conn = Database::connect(options).await?;
        log::info!(
            "eventslog: connected {} store (backend {:?})",
            dialect.name(),
            conn.get_database_backend()
        );
        let inner = Arc::new(SqlConnection {
            conn,
            dialect,
            path,
        });
        let batch = batch.map(|settings| BatchWriter::spawn(inner.clone(), settings));
        Ok(Self { inner, batch })
    }

    pub fn connection(&self) -> &DatabaseConnection {
        &self.inner.conn
    }

    pub fn is_batching(&self) -> bool {
        self.batch.is_some()
    }

    fn reached(&self) {
        if let Some(batch) = &self.batch {
            batch.mark_healthy();
        }
    }
}

impl SqlConnection {
    async fn ensure_schema(&self) -> EventsLogResult<()> {
        let txn = self.conn.begin().await?;
        txn.execute_unprepared(&self.dialect.create_table()).await?;
        for statement in self.dialect.create_indexes() {
            txn.execute_unprepared(&statement).await?;
        }
        txn.commit().await?;
        Ok(())
    }

    fn insert_statement(&self, records: &[NewRecord]) -> InsertStatement {
        let mut insert = Query::insert();
        insert.into_table(ChangeEvents::Table).columns([
            ChangeEvents::Project,
            ChangeEvents::DateCreated,
            ChangeEvents::EventInfo,
        ]);
        for record in records {
            let payload = self.dialect.escape_value(&record.payload).into_owned();
            insert.values_panic([
                record.project.clone().into(),
                record.occurred_at.into(),
                payload.into(),
            ]);
        }
        insert.to_owned()
    }

    async fn insert(&self, records: &[NewRecord]) -> EventsLogResult<()> {
        if records.is_empty() {
            return Ok(());
        }
        exec(&self.conn, &self.insert_statement(records)).await?;
        Ok(())
    }

    async fn select(&self, sql: &str) -> EventsLogResult<Vec<EventRecord>> {
        let rows = query_raw(&self.conn, sql).await?;
        rows.iter().map(|row| self.read_row(row)).collect()
    }

    fn read_row(&self, row: &QueryResult) -> EventsLogResult<EventRecord> {
        let key = if self.dialect.has_serial_key() {
            OrderingKey::Serial(row.try_get::<i64>("", PRIMARY_ENTRY)?)
        } else {
            OrderingKey::Generated(row.try_get::<String>("", PRIMARY_ENTRY)?)
        };
        let project = row
            .try_get::<Option<String>>("", PROJECT_ENTRY)?
            .unwrap_or_default();
        let occurred_at = row.try_get::<PrimitiveDateTime>("", DATE_ENTRY)?;
        let payload = row
            .try_get::<Option<String>>("", EVENT_ENTRY)?
            .unwrap_or_default();
        Ok(EventRecord {
            key,
            project,
            occurred_at,
            payload,
        })
    }

    async fn delete_older_than(&self, max_age_days: u32) -> EventsLogResult<u64> {
        let mut delete = Query::delete();
        delete.from_table(ChangeEvents::Table);
        if max_age_days > 0 {
            let cutoff = days_before(now_utc(), max_age_days);
            delete.and_where(Expr::col(ChangeEvents::DateCreated).lt(cutoff));
        }
        exec(&self.conn, &delete.to_owned()).await
    }

    async fn delete_for_project(&self, project: &str) -> EventsLogResult<u64> {
        let delete = Query::delete()
            .from_table(ChangeEvents::Table)
            .and_where(Expr::col(ChangeEvents::Project).eq(project))
            .to_owned();
        exec(&self.conn, &delete).await
    }
}

#[async_trait]
impl BatchSink for SqlConnection {
    async fn write_batch(&self, records: Vec<NewRecord>) -> EventsLogResult<()> {
        self.insert(&records).await
    }
}

#[async_trait]
impl EventRecordStore for SqlClient {
    fn dialect(&self) -> Dialect {
        self.inner.dialect
    }

    fn local_path(&self) -> Option<PathBuf> {
        self.inner.path.clone()
    }

    async fn ensure_schema(&self) -> EventsLogResult<()> {
        self.inner.ensure_schema().await?;
        self.reached();
        Ok(())
    }

    async fn insert(&self, record: NewRecord) -> EventsLogResult<()> {
        match &self.batch {
            Some(batch) => batch.enqueue(record),
            None => self.inner.insert(std::slice::from_ref(&record)).await,
        }
    }

    /// Writes synchronously even when inserts are batched.
    async fn insert_batch(&self, records: Vec<NewRecord>) -> EventsLogResult<()> {
        self.inner.insert(&records).await?;
        self.reached();
        Ok(())
    }

    async fn select_range(&self, sql: &str) -> EventsLogResult<ProjectEvents> {
        let records = self.inner.select(sql).await.map_err(|err| {
            if err.is_connectivity() {
                err
            } else {
                EventsLogError::malformed(format!("{sql}: {err}"))
            }
        })?;
        let mut grouped = ProjectEvents::new();
        for record in records {
            grouped
                .entry(record.project.clone())
                .or_default()
                .push(record);
        }
        Ok(grouped)
    }

    async fn select_all(&self) -> EventsLogResult<Vec<EventRecord>> {
        let sql = format!(
            "SELECT * FROM {TABLE_NAME} ORDER BY {} ASC",
            self.inner.dialect.ordering_column()
        );
        self.inner.select(&sql).await
    }

    async fn delete_older_than(&self, max_age_days: u32) {
        match self.inner.delete_older_than(max_age_days).await {
            Ok(removed) => log::debug!(
                "eventslog: removed {removed} events older than {max_age_days} days"
            ),
            Err(err) => log::warn!(
                "eventslog: cannot delete events older than {max_age_days} days: {err}"
            ),
        }
    }

    async fn delete_for_project(&self, project: &str) {
        match self.inner.delete_for_project(project).await {
            Ok(removed) => log::debug!("eventslog: removed {removed} events of project {project}"),
            Err(err) => log::warn!("eventslog: cannot delete events of project {project}: {err}"),
        }
    }

    async fn probe(&self) -> EventsLogResult<()> {
        query_raw(&self.inner.conn, &self.inner.dialect.probe_query()).await?;
        Ok(())
    }

    async fn exists(&self) -> EventsLogResult<bool> {
        let rows = query_raw(&self.inner.conn, &self.inner.dialect.table_exists_query()).await?;
        Ok(!rows.is_empty())
    }

    async fn close(&self) {
        if let Some(batch) = &self.batch {
            batch.shutdown().await;
        }
        if let Err(err) = self.inner.conn.clone().close().await {
            log::warn!("eventslog: closing {} store failed: {err}", self.inner.dialect.name());
        }
    }
}
