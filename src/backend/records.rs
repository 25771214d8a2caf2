use std::marker::PhantomData;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use super::{Backend, BackendError, EntityKind};

/// Newest first.
pub const SORT_NEWEST: &str = "-created_date";

pub trait Record: Serialize + DeserializeOwned + Send + Sync {
    const KIND: EntityKind;
    fn id(&self) -> &str;
}

/// Typed view over one entity collection.
pub struct Records<'a, T> {
    backend: &'a dyn Backend,
    _marker: PhantomData<fn() -> T>,
}

impl<'a, T: Record> Records<'a, T> {
    pub fn new(backend: &'a dyn Backend) -> Self {
        Self {
            backend,
            _marker: PhantomData,
        }
    }

    pub async fn list(&self, sort: Option<&str>, limit: Option<u32>) -> Result<Vec<T>, BackendError> {
        let rows = self.backend.list(T::KIND, sort, limit).await?;
        decode_all(rows)
    }

    pub async fn filter(&self, query: Value, sort: Option<&str>) -> Result<Vec<T>, BackendError> {
        let rows = self.backend.filter(T::KIND, query, sort).await?;
        decode_all(rows)
    }

    pub async fn get(&self, id: &str) -> Result<T, BackendError> {
        decode(self.backend.get(T::KIND, id).await?)
    }

    pub async fn create(&self, record: &T) -> Result<T, BackendError> {
        let data = serde_json::to_value(record).map_err(|e| BackendError::Decode(e.to_string()))?;
        decode(self.backend.create(T::KIND, data).await?)
    }

    pub async fn update(&self, id: &str, patch: Value) -> Result<T, BackendError> {
        decode(self.backend.update(T::KIND, id, patch).await?)
    }

    pub async fn delete(&self, id: &str) -> Result<(), BackendError> {
        self.backend.delete(T::KIND, id).await
    }
}

fn decode<T: DeserializeOwned>(value: Value) -> Result<T, BackendError> {
    serde_json::from_value(value).map_err(|e| BackendError::Decode(e.to_string()))
}

fn decode_all<T: DeserializeOwned>(rows: Vec<Value>) -> Result<Vec<T>, BackendError> {
    rows.into_iter().map(decode).collect()
}
