//! Test doubles shared by the worker's unit tests.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use offcache_core::{
    AppConfig, CacheDb, Error, RequestDescriptor, RequestKey, ResponseDescriptor, StoredResponse,
};

use crate::fetch::Network;
use crate::lifecycle::ActiveGeneration;

pub const ORIGIN: &str = "https://epk.example";

pub fn test_config() -> AppConfig {
    AppConfig { origin: ORIGIN.into(), db_path: ":memory:".into(), ..Default::default() }
}

fn content_type(url: &str) -> &'static str {
    match url.rsplit_once('.').map(|(_, ext)| ext) {
        Some("css") => "text/css",
        Some("js") => "text/javascript",
        Some("svg") => "image/svg+xml",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("png") => "image/png",
        Some("json") => "application/json",
        _ => "text/html; charset=utf-8",
    }
}

#[derive(Clone)]
enum Route {
    Respond(ResponseDescriptor),
    Fail,
    Delay(Duration, ResponseDescriptor),
}

/// Scripted network. Unknown URLs fail as if offline.
#[derive(Default)]
pub struct MockNetwork {
    routes: Mutex<HashMap<String, Route>>,
    offline: AtomicBool,
    calls: Mutex<Vec<RequestDescriptor>>,
}

impl MockNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn respond(&self, url: &str, status: u16, body: &str) {
        let response = ResponseDescriptor::new(status, body).with_header("content-type", content_type(url));
        self.respond_with(url, response);
    }

    pub fn respond_with(&self, url: &str, response: ResponseDescriptor) {
        self.routes.lock().unwrap().insert(url.to_string(), Route::Respond(response));
    }

    pub fn fail(&self, url: &str) {
        self.routes.lock().unwrap().insert(url.to_string(), Route::Fail);
    }

    pub fn delay(&self, url: &str, delay: Duration, body: &str) {
        let response = ResponseDescriptor::new(200, body).with_header("content-type", content_type(url));
        self.routes.lock().unwrap().insert(url.to_string(), Route::Delay(delay, response));
    }

    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<RequestDescriptor> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl Network for MockNetwork {
    async fn fetch(&self, request: &RequestDescriptor) -> Result<ResponseDescriptor, Error> {
        self.calls.lock().unwrap().push(request.clone());
        if self.offline.load(Ordering::SeqCst) {
            return Err(Error::NetworkUnavailable("offline".into()));
        }
        let route = self.routes.lock().unwrap().get(&request.url).cloned();
        match route {
            Some(Route::Respond(response)) => Ok(response),
            Some(Route::Delay(delay, response)) => {
                tokio::time::sleep(delay).await;
                Ok(response)
            }
            Some(Route::Fail) | None => Err(Error::NetworkUnavailable(format!("no route to {}", request.url))),
        }
    }
}

/// In-memory store with `generation` installed from `entries` (origin-relative
/// path, body) and activated.
pub async fn active_store(generation: &str, entries: &[(&str, &str)]) -> (CacheDb, ActiveGeneration) {
    let store = CacheDb::open_in_memory().await.unwrap();
    store.create_generation(generation).await.unwrap();
    let stored = entries
        .iter()
        .map(|(path, body)| {
            let url = format!("{ORIGIN}{path}");
            let mut headers = offcache_core::Headers::new();
            headers.insert("content-type".into(), content_type(path).into());
            StoredResponse::new(&RequestKey::get(&url), 200, headers, body.as_bytes().to_vec())
        })
        .collect();
    store.commit_install(generation, stored).await.unwrap();
    store.activate_generation(generation).await.unwrap();
    (store, ActiveGeneration::new(Some(generation.to_string())))
}
