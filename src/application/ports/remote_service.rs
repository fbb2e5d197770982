use crate::shared::error::Result;
use async_trait::async_trait;
use serde_json::Value;

/// The remote API as the cache sees it: an opaque asynchronous service
/// exposing CRUD-style calls keyed by resource name and id. The cache
/// never inspects transport status codes; a call either succeeds with a
/// value or fails.
#[async_trait]
pub trait RemoteService: Send + Sync {
    async fn fetch(&self, resource: &str, params: &Value) -> Result<Value>;

    async fn create(&self, resource: &str, payload: &Value) -> Result<Value>;

    async fn update(&self, resource: &str, id: &str, payload: &Value) -> Result<Value>;
}
