//! Shared fixtures for the crate's unit tests and the `tests/` suites.
//! Not part of the public API surface.

use crate::application::ports::RemoteService;
use crate::shared::error::{CacheError, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// Scripted stand-in for the remote API. Unscripted calls fail, which is
/// what a test usually wants: nothing succeeds by accident.
#[derive(Default)]
pub struct MockRemoteService {
    fetch_responses: Mutex<HashMap<String, Value>>,
    create_responses: Mutex<HashMap<String, Value>>,
    update_responses: Mutex<HashMap<String, Value>>,
    fail: AtomicBool,
    fetch_count: AtomicU32,
    create_count: AtomicU32,
    update_count: AtomicU32,
}

impl MockRemoteService {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script_fetch(&self, resource: &str, value: Value) {
        self.fetch_responses
            .lock()
            .unwrap()
            .insert(resource.to_string(), value);
    }

    pub fn script_create(&self, resource: &str, value: Value) {
        self.create_responses
            .lock()
            .unwrap()
            .insert(resource.to_string(), value);
    }

    pub fn script_update(&self, resource: &str, value: Value) {
        self.update_responses
            .lock()
            .unwrap()
            .insert(resource.to_string(), value);
    }

    /// While set, every call fails with `RemoteCallFailed` regardless of
    /// scripting.
    pub fn fail_all(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn fetch_calls(&self) -> u32 {
        self.fetch_count.load(Ordering::SeqCst)
    }

    pub fn create_calls(&self) -> u32 {
        self.create_count.load(Ordering::SeqCst)
    }

    pub fn update_calls(&self) -> u32 {
        self.update_count.load(Ordering::SeqCst)
    }

    fn respond(&self, scripted: Option<Value>, call: &str, resource: &str) -> Result<Value> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(CacheError::RemoteCallFailed(format!(
                "simulated outage: {call} {resource}"
            )));
        }
        scripted.ok_or_else(|| {
            CacheError::RemoteCallFailed(format!("no scripted response for {call} {resource}"))
        })
    }
}

#[async_trait]
impl RemoteService for MockRemoteService {
    async fn fetch(&self, resource: &str, _params: &Value) -> Result<Value> {
        self.fetch_count.fetch_add(1, Ordering::SeqCst);
        let scripted = self.fetch_responses.lock().unwrap().get(resource).cloned();
        self.respond(scripted, "fetch", resource)
    }

    async fn create(&self, resource: &str, _payload: &Value) -> Result<Value> {
        self.create_count.fetch_add(1, Ordering::SeqCst);
        let scripted = self.create_responses.lock().unwrap().get(resource).cloned();
        self.respond(scripted, "create", resource)
    }

    async fn update(&self, resource: &str, _id: &str, _payload: &Value) -> Result<Value> {
        self.update_count.fetch_add(1, Ordering::SeqCst);
        let scripted = self.update_responses.lock().unwrap().get(resource).cloned();
        self.respond(scripted, "update", resource)
    }
}

/// Polls an async condition until it holds or ~2 seconds elapse. Returns
/// whether the condition was ever observed true.
pub async fn eventually<F, Fut>(mut condition: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..200 {
        if condition().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}
