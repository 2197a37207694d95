use crate::error::WarehouseError;
use crate::query::Statement;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use std::sync::Arc;

/// Anything that can run a [`Statement`] and materialize its rows.
#[async_trait]
pub trait Warehouse {
    async fn execute(&self, statement: &Statement) -> Result<ResultSet, WarehouseError>;
}

#[async_trait]
impl<W> Warehouse for &W
where
    W: Warehouse + Sync + ?Sized,
{
    async fn execute(&self, statement: &Statement) -> Result<ResultSet, WarehouseError> {
        (**self).execute(statement).await
    }
}

#[async_trait]
impl<W> Warehouse for Arc<W>
where
    W: Warehouse + Send + Sync + ?Sized,
{
    async fn execute(&self, statement: &Statement) -> Result<ResultSet, WarehouseError> {
        (**self).execute(statement).await
    }
}

/// Named columns plus rows as JSON objects keyed by column name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResultSet {
    columns: Vec<String>,
    rows: Vec<Map<String, Value>>,
}

impl ResultSet {
    pub fn new(columns: Vec<String>, rows: Vec<Map<String, Value>>) -> Self {
        Self { columns, rows }
    }

    /// Builds a result set from JSON objects, taking column order from the
    /// first row.
    pub fn from_rows(rows: Vec<Value>) -> Self {
        let rows: Vec<Map<String, Value>> = rows
            .into_iter()
            .filter_map(|row| match row {
                Value::Object(map) => Some(map),
                _ => None,
            })
            .collect();
        let columns = rows
            .first()
            .map(|row| row.keys().cloned().collect())
            .unwrap_or_default();
        Self { columns, rows }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> impl Iterator<Item = &Map<String, Value>> {
        self.rows.iter()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn decode<T: DeserializeOwned>(self) -> Result<Vec<T>, WarehouseError> {
        self.rows
            .into_iter()
            .enumerate()
            .map(|(index, row)| {
                serde_json::from_value(Value::Object(row))
                    .map_err(|error| WarehouseError::Decode(format!("row {index}: {error}")))
            })
            .collect()
    }
}
