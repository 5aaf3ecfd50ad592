//! SQL text for each supported backend.
//!
//! Everything here is pure string construction; executing the statements is
//! the record store's job.

use std::borrow::Cow;
use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use crate::{EventRecord, OrderingKey};

pub const TABLE_NAME: &str = "change_events";
pub const PRIMARY_ENTRY: &str = "id";
pub const PROJECT_ENTRY: &str = "project";
pub const DATE_ENTRY: &str = "date_created";
pub const EVENT_ENTRY: &str = "event_info";

const CREATED_INDEX: &str = "change_events_created_idx";
const PROJECT_INDEX: &str = "change_events_project_idx";

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    #[default]
    Embedded,
    MySql,
    Postgres,
    Spanner,
}

impl Dialect {
    /// Pick the dialect from a connection URL scheme. Unknown schemes fall
    /// back to the embedded dialect.
    pub fn from_url(url: &str) -> Self {
        let scheme = url
            .split_once(':')
            .map(|(scheme, _)| scheme.trim().to_ascii_lowercase())
            .unwrap_or_default();
        match scheme.as_str() {
            "postgres" | "postgresql" => Dialect::Postgres,
            "mysql" | "mariadb" => Dialect::MySql,
            "cloudspanner" | "spanner" => Dialect::Spanner,
            _ => Dialect::Embedded,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Dialect::Embedded => "embedded",
            Dialect::MySql => "mysql",
            Dialect::Postgres => "postgres",
            Dialect::Spanner => "spanner",
        }
    }

    /// Whether the backend hands out integer sequence keys.
    pub fn has_serial_key(self) -> bool {
        !matches!(self, Dialect::Spanner)
    }

    /// Whether inserts should go through the batch writer by default.
    pub fn prefers_batching(self) -> bool {
        matches!(self, Dialect::Spanner)
    }

    /// Column that reproduces write order.
    pub fn ordering_column(self) -> &'static str {
        if self.has_serial_key() {
            PRIMARY_ENTRY
        } else {
            DATE_ENTRY
        }
    }

    /// Created-date expression comparable with `yyyy-MM-dd HH:mm:ss` literals.
    /// SQLite keeps timestamps as text with a fractional second suffix.
    pub fn comparable_date(self) -> &'static str {
        match self {
            Dialect::Embedded => "datetime(date_created)",
            _ => DATE_ENTRY,
        }
    }

    pub fn create_table(self) -> String {
        let mut query = format!("CREATE TABLE IF NOT EXISTS {TABLE_NAME}(");
        match self {
            Dialect::Embedded => {
                query.push_str(&format!("{PRIMARY_ENTRY} INTEGER PRIMARY KEY AUTOINCREMENT, "));
            }
            Dialect::MySql => {
                query.push_str(&format!("{PRIMARY_ENTRY} BIGINT AUTO_INCREMENT PRIMARY KEY, "));
            }
            Dialect::Postgres => {
                query.push_str(&format!("{PRIMARY_ENTRY} BIGSERIAL PRIMARY KEY, "));
            }
            Dialect::Spanner => {
                query.push_str(&format!(
                    "{PRIMARY_ENTRY} STRING(36) DEFAULT (GENERATE_UUID()), "
                ));
            }
        }
        match self {
            Dialect::Spanner => {
                query.push_str(&format!("{PROJECT_ENTRY} STRING(255), "));
                query.push_str(&format!(
                    "{DATE_ENTRY} TIMESTAMP DEFAULT (CURRENT_TIMESTAMP()), "
                ));
                query.push_str(&format!("{EVENT_ENTRY} STRING(MAX))"));
                query.push_str(&format!(" PRIMARY KEY ({PRIMARY_ENTRY})"));
            }
            Dialect::Embedded => {
                query.push_str(&format!("{PROJECT_ENTRY} VARCHAR(255), "));
                query.push_str(&format!("{DATE_ENTRY} TIMESTAMP DEFAULT CURRENT_TIMESTAMP, "));
                query.push_str(&format!("{EVENT_ENTRY} TEXT)"));
            }
            Dialect::MySql | Dialect::Postgres => {
                query.push_str(&format!("{PROJECT_ENTRY} VARCHAR(255), "));
                query.push_str(&format!("{DATE_ENTRY} TIMESTAMP DEFAULT NOW(), "));
                query.push_str(&format!("{EVENT_ENTRY} TEXT)"));
            }
        }
        query
    }

    /// Statements creating the created-date and project indexes when absent.
    ///
    /// MySQL needs session variables, so its statements must run in order on
    /// a single connection.
    pub fn create_indexes(self) -> Vec<String> {
        let indexes = [(CREATED_INDEX, DATE_ENTRY), (PROJECT_INDEX, PROJECT_ENTRY)];
        indexes
            .iter()
            .flat_map(|(index, column)| match self {
                Dialect::Postgres => vec![postgres_index(index, column)],
                Dialect::MySql => mysql_index(index, column),
                Dialect::Spanner => vec![format!(
                    "CREATE INDEX IF NOT EXISTS {index} ON {TABLE_NAME}({column})"
                )],
                Dialect::Embedded => vec![format!(
                    "CREATE INDEX IF NOT EXISTS {index} ON {TABLE_NAME} ({column})"
                )],
            })
            .collect()
    }

    /// Query returning a row when the events table exists.
    pub fn table_exists_query(self) -> String {
        match self {
            Dialect::Embedded => format!(
                "SELECT name FROM sqlite_master WHERE type = 'table' AND name = '{TABLE_NAME}'"
            ),
            Dialect::MySql => format!(
                "SELECT table_name FROM information_schema.tables \
                 WHERE table_schema = DATABASE() AND table_name = '{TABLE_NAME}'"
            ),
            Dialect::Postgres => format!(
                "SELECT table_name FROM information_schema.tables \
                 WHERE table_schema = current_schema() AND table_name = '{TABLE_NAME}'"
            ),
            Dialect::Spanner => format!(
                "SELECT table_name FROM information_schema.tables \
                 WHERE table_schema = '' AND table_name = '{TABLE_NAME}'"
            ),
        }
    }

    pub fn probe_query(self) -> String {
        format!("SELECT * FROM {TABLE_NAME} LIMIT 1")
    }

    /// Spanner string literals interpret backslash escapes, so `\n` sequences
    /// inside serialized payloads must be escaped once more.
    pub fn escape_value(self, value: &str) -> Cow<'_, str> {
        match self {
            Dialect::Spanner if value.contains("\\n") => Cow::Owned(value.replace("\\n", "\\\\n")),
            _ => Cow::Borrowed(value),
        }
    }

    /// Display order of two records.
    pub fn compare(self, left: &EventRecord, right: &EventRecord) -> Ordering {
        if self.has_serial_key()
            && let (OrderingKey::Serial(a), OrderingKey::Serial(b)) = (&left.key, &right.key)
        {
            return a.cmp(b);
        }
        left.occurred_at
            .cmp(&right.occurred_at)
            .then_with(|| key_text(&left.key).cmp(&key_text(&right.key)))
    }
}

fn key_text(key: &OrderingKey) -> Cow<'_, str> {
    match key {
        OrderingKey::Serial(value) => Cow::Owned(format!("{value:020}")),
        OrderingKey::Generated(value) => Cow::Borrowed(value),
    }
}

fn postgres_index(index: &str, column: &str) -> String {
    format!(
        "DO $$\n\
         BEGIN\n\
         IF NOT EXISTS (\n    \
             SELECT 1\n    \
             FROM   pg_class c\n    \
             JOIN   pg_namespace n ON n.oid = c.relnamespace\n    \
             WHERE  c.relname = '{index}'\n    \
             AND    n.nspname = current_schema()\n    \
         ) THEN\n    \
             CREATE INDEX {index} ON {TABLE_NAME} ({column});\n\
         END IF;\n\
         END$$;"
    )
}

fn mysql_index(index: &str, column: &str) -> Vec<String> {
    vec![
        format!(
            "SET @x := (SELECT COUNT(*) FROM information_schema.statistics \
             WHERE table_name = '{TABLE_NAME}' AND index_name = '{index}' \
             AND table_schema = DATABASE())"
        ),
        format!(
            "SET @sql := IF(@x > 0, 'SELECT ''Index exists.''', \
             'ALTER TABLE {TABLE_NAME} ADD INDEX {index} ({column})')"
        ),
        "PREPARE stmt FROM @sql".to_string(),
        "EXECUTE stmt".to_string(),
        "DEALLOCATE PREPARE stmt".to_string(),
    ]
}
