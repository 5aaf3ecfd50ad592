use std::time::Duration;

use eventslog_store::{
    BatchSettings, Dialect, EventRecordStore, EventsLogError, EventsLogResult, NewRecord,
    OrderingKey, QueryMaker, SqlClient, SqlQueryMaker,
};
use sea_orm::{ConnectionTrait, Statement};
use tempfile::tempdir;
use time::macros::datetime;
use time::{Duration as TimeDuration, OffsetDateTime, PrimitiveDateTime};

fn record(project: &str, occurred_at: PrimitiveDateTime, payload: &str) -> NewRecord {
    NewRecord {
        project: project.to_string(),
        occurred_at,
        payload: payload.to_string(),
    }
}

fn recent(offset_seconds: i64) -> PrimitiveDateTime {
    let now = OffsetDateTime::now_utc() + TimeDuration::seconds(offset_seconds);
    PrimitiveDateTime::new(now.date(), now.time().replace_nanosecond(0).unwrap_or(now.time()))
}

async fn index_count(client: &SqlClient) -> EventsLogResult<usize> {
    let conn = client.connection();
    let rows = conn
        .query_all_raw(Statement::from_string(
            conn.get_database_backend(),
            "SELECT name FROM sqlite_master WHERE type = 'index' AND tbl_name = 'change_events'"
                .to_string(),
        ))
        .await?;
    Ok(rows.len())
}

#[tokio::test]
async fn schema_setup_is_idempotent() -> EventsLogResult<()> {
    let dir = tempdir().expect("tempdir");
    let client = SqlClient::connect_sqlite(&dir.path().join("events.sqlite"), None, None).await?;
    assert!(!client.exists().await?);

    client.ensure_schema().await?;
    client.ensure_schema().await?;

    assert!(client.exists().await?);
    assert_eq!(index_count(&client).await?, 2);
    client.close().await;
    Ok(())
}

#[tokio::test]
async fn probe_fails_before_schema_exists() -> EventsLogResult<()> {
    let dir = tempdir().expect("tempdir");
    let client = SqlClient::connect_sqlite(&dir.path().join("events.sqlite"), None, None).await?;
    assert!(client.probe().await.is_err());
    client.ensure_schema().await?;
    client.probe().await?;
    client.close().await;
    Ok(())
}

#[tokio::test]
async fn select_groups_records_by_project() -> EventsLogResult<()> {
    let dir = tempdir().expect("tempdir");
    let client = SqlClient::connect_sqlite(&dir.path().join("events.sqlite"), None, None).await?;
    client.ensure_schema().await?;
    client.insert(record("alpha", recent(-3), "a1")).await?;
    client.insert(record("beta", recent(-2), "b1")).await?;
    client.insert(record("alpha", recent(-1), "a2")).await?;

    let grouped = client.select_range("SELECT * FROM change_events").await?;
    assert_eq!(grouped.len(), 2);
    let alpha: Vec<_> = grouped["alpha"]
        .iter()
        .map(|record| record.payload.as_str())
        .collect();
    assert_eq!(alpha, vec!["a1", "a2"]);
    assert_eq!(grouped["alpha"][0].key, OrderingKey::Serial(1));

    let all = client.select_all().await?;
    let payloads: Vec<_> = all.iter().map(|record| record.payload.as_str()).collect();
    assert_eq!(payloads, vec!["a1", "b1", "a2"]);
    client.close().await;
    Ok(())
}

#[tokio::test]
async fn stored_timestamp_survives_round_trip() -> EventsLogResult<()> {
    let dir = tempdir().expect("tempdir");
    let client = SqlClient::connect_sqlite(&dir.path().join("events.sqlite"), None, None).await?;
    client.ensure_schema().await?;
    let at = datetime!(2024-02-29 13:14:15);
    client.insert(record("alpha", at, "leap")).await?;
    let all = client.select_all().await?;
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].occurred_at, at);
    assert_eq!(all[0].project, "alpha");
    client.close().await;
    Ok(())
}

#[tokio::test]
async fn range_query_includes_both_bounds() -> EventsLogResult<()> {
    let dir = tempdir().expect("tempdir");
    let client = SqlClient::connect_sqlite(&dir.path().join("events.sqlite"), None, None).await?;
    client.ensure_schema().await?;
    client
        .insert(record("alpha", datetime!(2024-04-30 23:59:59), "before"))
        .await?;
    client
        .insert(record("alpha", datetime!(2024-05-01 00:00:00), "lower"))
        .await?;
    client
        .insert(record("beta", datetime!(2024-05-02 00:00:00), "upper"))
        .await?;
    client
        .insert(record("beta", datetime!(2024-05-02 00:00:01), "after"))
        .await?;

    let sql = SqlQueryMaker::new(Dialect::Embedded, 100)
        .build_from_range(Some("2024-05-01"), Some("2024-05-02"))?;
    let grouped = client.select_range(&sql).await?;
    let mut payloads: Vec<_> = grouped
        .values()
        .flatten()
        .map(|record| record.payload.as_str())
        .collect();
    payloads.sort_unstable();
    assert_eq!(payloads, vec!["lower", "upper"]);
    client.close().await;
    Ok(())
}

#[tokio::test]
async fn invalid_select_is_malformed() -> EventsLogResult<()> {
    let dir = tempdir().expect("tempdir");
    let client = SqlClient::connect_sqlite(&dir.path().join("events.sqlite"), None, None).await?;
    client.ensure_schema().await?;
    let err = client
        .select_range("SELECT * FROM missing_table")
        .await
        .expect_err("malformed");
    assert!(matches!(err, EventsLogError::MalformedQuery { .. }));
    client.close().await;
    Ok(())
}

#[tokio::test]
async fn retention_removes_only_old_rows_unless_age_is_zero() -> EventsLogResult<()> {
    let dir = tempdir().expect("tempdir");
    let client = SqlClient::connect_sqlite(&dir.path().join("events.sqlite"), None, None).await?;
    client.ensure_schema().await?;
    client
        .insert(record("alpha", datetime!(2000-01-01 00:00:00), "ancient"))
        .await?;
    client.insert(record("alpha", recent(-10), "fresh")).await?;
    client.insert(record("alpha", recent(3_600), "future")).await?;

    client.delete_older_than(30).await;
    let payloads: Vec<_> = client
        .select_all()
        .await?
        .into_iter()
        .map(|record| record.payload)
        .collect();
    assert_eq!(payloads, vec!["fresh", "future"]);

    client.delete_older_than(0).await;
    assert!(client.select_all().await?.is_empty());
    client.close().await;
    Ok(())
}

#[tokio::test]
async fn project_removal_keeps_other_projects() -> EventsLogResult<()> {
    let dir = tempdir().expect("tempdir");
    let client = SqlClient::connect_sqlite(&dir.path().join("events.sqlite"), None, None).await?;
    client.ensure_schema().await?;
    client.insert(record("alpha", recent(-2), "a")).await?;
    client.insert(record("beta", recent(-1), "b")).await?;

    client.delete_for_project("alpha").await;
    let remaining = client.select_all().await?;
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].project, "beta");
    client.close().await;
    Ok(())
}

#[tokio::test]
async fn maintenance_on_missing_table_is_swallowed() -> EventsLogResult<()> {
    let dir = tempdir().expect("tempdir");
    let client = SqlClient::connect_sqlite(&dir.path().join("events.sqlite"), None, None).await?;
    client.delete_older_than(30).await;
    client.delete_for_project("alpha").await;
    assert!(!client.exists().await?);
    client.close().await;
    Ok(())
}

#[tokio::test]
async fn batching_client_flushes_in_background() -> EventsLogResult<()> {
    let dir = tempdir().expect("tempdir");
    let settings = BatchSettings {
        capacity: 100,
        batch_size: 2,
        flush_interval: Duration::from_millis(20),
    };
    let client =
        SqlClient::connect_sqlite(&dir.path().join("events.sqlite"), None, Some(settings)).await?;
    assert!(client.is_batching());
    assert_eq!(client.dialect(), Dialect::Embedded);
    client.ensure_schema().await?;
    for payload in ["one", "two", "three"] {
        client.insert(record("alpha", recent(0), payload)).await?;
    }

    let mut flushed = 0;
    for _ in 0..200 {
        flushed = client.select_all().await?.len();
        if flushed == 3 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(flushed, 3);
    client.close().await;
    Ok(())
}

#[tokio::test]
async fn spanner_has_no_driver() {
    let err = SqlClient::connect(
        "cloudspanner:/projects/p/instances/i/databases/d",
        Dialect::Spanner,
        None,
        None,
    )
    .await
    .err()
    .expect("spanner is rejected");
    assert!(matches!(err, EventsLogError::Config { .. }));
}
