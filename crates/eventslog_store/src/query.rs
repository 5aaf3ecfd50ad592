use std::collections::HashMap;

use eventslog_core::clock::{format_timestamp, now_utc, parse_timestamp};
use eventslog_core::dialect::{DATE_ENTRY, TABLE_NAME};
use eventslog_core::{Dialect, EventsLogError, EventsLogResult, QueryMaker};

pub const FROM_PARAM: &str = "t1";
pub const TO_PARAM: &str = "t2";

/// Builds bounded SELECT statements over the events table.
#[derive(Clone, Debug)]
pub struct SqlQueryMaker {
    dialect: Dialect,
    return_limit: u32,
}

impl SqlQueryMaker {
    pub fn new(dialect: Dialect, return_limit: u32) -> Self {
        Self {
            dialect,
            return_limit,
        }
    }
}

impl QueryMaker for SqlQueryMaker {
    /// The newest `return_limit` events, oldest first.
    fn default_query(&self) -> String {
        let column = self.dialect.ordering_column();
        format!(
            "SELECT * FROM (SELECT * FROM {TABLE_NAME} ORDER BY {column} DESC LIMIT {limit}) a \
             ORDER BY {column} ASC",
            limit = self.return_limit
        )
    }

    fn build_from_range(&self, from: Option<&str>, to: Option<&str>) -> EventsLogResult<String> {
        let (from, to) = match (from, to) {
            (None, None) => {
                return Err(EventsLogError::malformed(
                    "at least one of the range bounds is required",
                ));
            }
            (Some(from), Some(to)) => (parse_timestamp(from)?, parse_timestamp(to)?),
            (Some(from), None) => (parse_timestamp(from)?, now_utc()),
            (None, Some(to)) => (now_utc(), parse_timestamp(to)?),
        };
        let (lower, upper) = if from <= to { (from, to) } else { (to, from) };
        Ok(format!(
            "SELECT * FROM {TABLE_NAME} WHERE {} BETWEEN '{}' AND '{}' \
             ORDER BY {DATE_ENTRY} ASC LIMIT {}",
            self.dialect.comparable_date(),
            format_timestamp(lower)?,
            format_timestamp(upper)?,
            self.return_limit
        ))
    }

    fn form_query(&self, params: Option<&HashMap<String, String>>) -> EventsLogResult<String> {
        match params {
            None => Ok(self.default_query()),
            Some(params) => self.build_from_range(
                params.get(FROM_PARAM).map(String::as_str),
                params.get(TO_PARAM).map(String::as_str),
            ),
        }
    }
}
