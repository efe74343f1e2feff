//! In-memory Kubernetes API server for tests that drive a real `kube::Client`
//!
//! Objects are stored as JSON keyed by their API path. Supported verbs:
//! get, list (with equality label selectors), create, replace, merge patch
//! and delete. Writes carrying a stale `metadata.resourceVersion` get a 409.

use axum::{Json, Router};
use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::{Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use serde_json::{Value, json};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;

/// Last path segments that name a collection rather than an object
const COLLECTIONS: &[&str] = &[
    "pods",
    "secrets",
    "configmaps",
    "namespaces",
    "services",
    "statefulsets",
    "dynakubes",
    "mutatingwebhookconfigurations",
    "validatingwebhookconfigurations",
];

#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: Method,
    pub path: String,
    pub body: Option<Value>,
}

#[derive(Debug, Default)]
struct Store {
    objects: BTreeMap<String, Value>,
    requests: Vec<RecordedRequest>,
    resource_version: u64,
}

impl Store {
    fn next_version(&mut self) -> String {
        self.resource_version += 1;
        self.resource_version.to_string()
    }

    fn put(&mut self, path: String, mut object: Value) -> Value {
        object["metadata"]["resourceVersion"] = json!(self.next_version());
        self.objects.insert(path, object.clone());
        object
    }
}

type SharedStore = Arc<Mutex<Store>>;

#[derive(Debug)]
pub struct FakeApiServer {
    url: String,
    store: SharedStore,
    handle: JoinHandle<()>,
}

impl FakeApiServer {
    pub async fn start() -> Self {
        let store = SharedStore::default();
        let app = Router::new().fallback(handle).with_state(Arc::clone(&store));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind fake API server");
        let url = format!("http://{}", listener.local_addr().expect("local addr"));
        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.expect("fake API server failed");
        });
        Self { url, store, handle }
    }

    /// Client talking to this server
    pub fn client(&self) -> kube::Client {
        super::init_rustls();
        let config = kube::Config::new(self.url.parse().expect("server url"));
        kube::Client::try_from(config).expect("Failed to build kube client")
    }

    pub fn insert(&self, path: &str, object: Value) {
        self.store
            .lock()
            .unwrap()
            .put(path.to_string(), object);
    }

    pub fn object(&self, path: &str) -> Option<Value> {
        self.store.lock().unwrap().objects.get(path).cloned()
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.store.lock().unwrap().requests.clone()
    }

    /// Recorded writes, everything but GET
    pub fn writes(&self) -> Vec<(Method, String)> {
        self.requests()
            .into_iter()
            .filter(|r| r.method != Method::GET)
            .map(|r| (r.method, r.path))
            .collect()
    }
}

impl Drop for FakeApiServer {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

async fn handle(
    State(store): State<SharedStore>,
    method: Method,
    uri: Uri,
    Query(params): Query<HashMap<String, String>>,
    body: Bytes,
) -> Response {
    let path = uri.path().trim_end_matches('/').to_string();
    let body: Option<Value> = serde_json::from_slice(&body).ok();
    let mut store = store.lock().unwrap();
    store.requests.push(RecordedRequest {
        method: method.clone(),
        path: path.clone(),
        body: body.clone(),
    });

    // status subresource writes land on the parent object
    let object_path = path.strip_suffix("/status").map_or(path.clone(), str::to_string);

    match method {
        Method::GET => {
            if let Some(object) = store.objects.get(&path) {
                return (StatusCode::OK, Json(object.clone())).into_response();
            }
            if is_collection(&path) {
                return list(&store, &path, params.get("labelSelector").map(String::as_str));
            }
            status(StatusCode::NOT_FOUND, "NotFound", &path)
        }
        Method::POST => {
            let Some(object) = body else {
                return status(StatusCode::BAD_REQUEST, "BadRequest", &path);
            };
            let Some(name) = object["metadata"]["name"].as_str() else {
                return status(StatusCode::BAD_REQUEST, "BadRequest", &path);
            };
            let key = format!("{path}/{name}");
            if store.objects.contains_key(&key) {
                return status(StatusCode::CONFLICT, "AlreadyExists", &key);
            }
            let created = store.put(key, object);
            (StatusCode::CREATED, Json(created)).into_response()
        }
        Method::PUT => {
            let Some(object) = body else {
                return status(StatusCode::BAD_REQUEST, "BadRequest", &path);
            };
            let Some(current) = store.objects.get(&object_path) else {
                return status(StatusCode::NOT_FOUND, "NotFound", &path);
            };
            if is_stale(current, &object) {
                return status(StatusCode::CONFLICT, "Conflict", &path);
            }
            let replaced = store.put(object_path, object);
            (StatusCode::OK, Json(replaced)).into_response()
        }
        Method::PATCH => {
            let Some(patch) = body else {
                return status(StatusCode::BAD_REQUEST, "BadRequest", &path);
            };
            let Some(current) = store.objects.get(&object_path).cloned() else {
                return status(StatusCode::NOT_FOUND, "NotFound", &path);
            };
            if is_stale(&current, &patch) {
                return status(StatusCode::CONFLICT, "Conflict", &path);
            }
            let mut merged = current;
            merge_patch(&mut merged, &patch);
            let patched = store.put(object_path, merged);
            (StatusCode::OK, Json(patched)).into_response()
        }
        Method::DELETE => match store.objects.remove(&path) {
            Some(object) => (StatusCode::OK, Json(object)).into_response(),
            None => status(StatusCode::NOT_FOUND, "NotFound", &path),
        },
        _ => status(StatusCode::METHOD_NOT_ALLOWED, "MethodNotAllowed", &path),
    }
}

fn is_collection(path: &str) -> bool {
    path.rsplit('/')
        .next()
        .is_some_and(|last| COLLECTIONS.contains(&last))
}

fn is_stale(current: &Value, write: &Value) -> bool {
    match write["metadata"]["resourceVersion"].as_str() {
        Some(version) => current["metadata"]["resourceVersion"].as_str() != Some(version),
        None => false,
    }
}

fn list(store: &Store, path: &str, selector: Option<&str>) -> Response {
    let prefix = format!("{path}/");
    let wanted: Vec<(&str, &str)> = selector
        .into_iter()
        .flat_map(|s| s.split(','))
        .filter_map(|term| term.split_once('='))
        .collect();
    let items: Vec<Value> = store
        .objects
        .iter()
        .filter(|(key, _)| key.strip_prefix(&prefix).is_some_and(|rest| !rest.contains('/')))
        .map(|(_, object)| object)
        .filter(|object| {
            wanted
                .iter()
                .all(|(k, v)| object["metadata"]["labels"][*k].as_str() == Some(*v))
        })
        .cloned()
        .collect();
    let body = json!({
        "apiVersion": "v1",
        "kind": "List",
        "metadata": { "resourceVersion": store.resource_version.to_string() },
        "items": items,
    });
    (StatusCode::OK, Json(body)).into_response()
}

fn status(code: StatusCode, reason: &str, path: &str) -> Response {
    let body = json!({
        "kind": "Status",
        "apiVersion": "v1",
        "metadata": {},
        "status": "Failure",
        "message": format!("{path}: {reason}"),
        "reason": reason,
        "code": code.as_u16(),
    });
    (code, Json(body)).into_response()
}

/// JSON merge patch, `null` removes a key
fn merge_patch(target: &mut Value, patch: &Value) {
    let Value::Object(patch) = patch else {
        *target = patch.clone();
        return;
    };
    if !target.is_object() {
        *target = json!({});
    }
    if let Value::Object(target) = target {
        for (key, value) in patch {
            if value.is_null() {
                target.remove(key);
            } else {
                merge_patch(target.entry(key.clone()).or_insert(Value::Null), value);
            }
        }
    }
}
