//! JSON queries over the indexes
//!
//! A [`Query`] is parsed into a [`selector::Selector`] tree, matched against
//! the declared indexes by the [`planner`], rendered to a single statement by
//! [`render`] and answered with a [`ResultSet`].

pub mod planner;
pub mod render;
pub mod result;
pub mod selector;

use serde_json::Value;

use crate::error::{QueryError, QueryResult};
pub use result::{ResultIter, ResultSet};
pub use selector::{SortDirection, SortField};

/// A query: selector plus paging, sort and projection options
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub selector: Value,
    pub skip: usize,
    /// `None` returns every match
    pub limit: Option<usize>,
    /// Top-level fields to return; `None` returns whole documents
    pub fields: Option<Vec<String>>,
    pub sort: Vec<SortField>,
}

impl Query {
    pub fn new(selector: Value) -> Self {
        Self {
            selector,
            skip: 0,
            limit: None,
            fields: None,
            sort: Vec::new(),
        }
    }

    #[must_use]
    pub fn skip(mut self, skip: usize) -> Self {
        self.skip = skip;
        self
    }

    #[must_use]
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    #[must_use]
    pub fn fields<S: AsRef<str>>(mut self, fields: &[S]) -> Self {
        self.fields = Some(fields.iter().map(|f| f.as_ref().to_string()).collect());
        self
    }

    #[must_use]
    pub fn sort(mut self, sort: Vec<SortField>) -> Self {
        self.sort = sort;
        self
    }

    /// Parse the request form
    /// `{"selector": {..}, "skip": n, "limit": n, "fields": [..], "sort": [..]}`
    pub fn from_json(value: &Value) -> QueryResult<Self> {
        let object = value
            .as_object()
            .ok_or_else(|| QueryError::InvalidQuery("query must be an object".to_string()))?;

        let mut query = Self::new(
            object
                .get("selector")
                .cloned()
                .ok_or_else(|| QueryError::InvalidQuery("query needs a selector".to_string()))?,
        );

        for (key, option) in object {
            match key.as_str() {
                "selector" => {}
                "skip" => query.skip = count_option(key, option)?,
                "limit" => query.limit = Some(count_option(key, option)?),
                "fields" => {
                    let fields = option
                        .as_array()
                        .and_then(|items| {
                            items
                                .iter()
                                .map(|f| f.as_str().map(str::to_string))
                                .collect::<Option<Vec<_>>>()
                        })
                        .ok_or_else(|| {
                            QueryError::InvalidQuery("fields must be an array of strings".to_string())
                        })?;
                    query.fields = Some(fields);
                }
                "sort" => query.sort = selector::parse_sort(option)?,
                other => {
                    return Err(QueryError::InvalidQuery(format!(
                        "unknown query option '{}'",
                        other
                    )))
                }
            }
        }

        Ok(query)
    }

    /// Check the options that do not depend on the selector
    pub(crate) fn validate_options(&self) -> QueryResult<()> {
        if let Some(fields) = &self.fields {
            if let Some(bad) = fields.iter().find(|f| f.is_empty() || f.contains('.')) {
                return Err(QueryError::InvalidQuery(format!(
                    "projected field '{}' must be a top-level field name",
                    bad
                )));
            }
        }
        Ok(())
    }
}

fn count_option(key: &str, value: &Value) -> QueryResult<usize> {
    value
        .as_u64()
        .and_then(|n| usize::try_from(n).ok())
        .ok_or_else(|| QueryError::InvalidQuery(format!("{} must be a non-negative integer", key)))
}
