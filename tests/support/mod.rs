//! Shared fixtures: a tiny_http registry serving canned metadata and tarballs.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::thread;

use pkgmirror_core::integrity::sha1_hex;
use serde_json::{json, Map, Value};
use tiny_http::{Response, Server};

type Routes = Arc<Mutex<HashMap<String, (u16, Vec<u8>)>>>;

pub struct FakeRegistry {
    pub base: String,
    routes: Routes,
    hits: Arc<Mutex<HashMap<String, usize>>>,
}

impl FakeRegistry {
    pub fn start() -> Self {
        let server = Server::http("127.0.0.1:0").unwrap();
        let base = format!("http://{}", server.server_addr().to_ip().unwrap());
        let routes: Routes = Arc::default();
        let hits: Arc<Mutex<HashMap<String, usize>>> = Arc::default();

        let (r, h) = (Arc::clone(&routes), Arc::clone(&hits));
        thread::spawn(move || {
            for request in server.incoming_requests() {
                let url = request.url().to_string();
                *h.lock().unwrap().entry(url.clone()).or_insert(0) += 1;
                let hit = r.lock().unwrap().get(&url).cloned();
                let response = match hit {
                    Some((status, body)) => Response::from_data(body).with_status_code(status),
                    None => Response::from_data(b"not found".to_vec()).with_status_code(404),
                };
                let _ = request.respond(response);
            }
        });

        Self { base, routes, hits }
    }

    pub fn route(&self, path: &str, status: u16, body: Vec<u8>) {
        self.routes.lock().unwrap().insert(path.to_string(), (status, body));
    }

    pub fn hits(&self, path: &str) -> usize {
        self.hits.lock().unwrap().get(path).copied().unwrap_or(0)
    }

    pub fn tarball_url(&self, name: &str, version: &str) -> String {
        let bare = name.rsplit('/').next().unwrap_or(name);
        format!("{}/{}/-/{}-{}.tgz", self.base, name, bare, version)
    }

    pub fn tarball_path(&self, name: &str, version: &str) -> String {
        self.tarball_url(name, version)[self.base.len()..].to_string()
    }

    /// Publish `name` with the given versions and dependencies. Tarball bodies are
    /// `"<name>@<version>"` and carry a correct sha1 shasum.
    pub fn publish(&self, name: &str, latest: &str, versions: &[(&str, &[(&str, &str)])]) -> Value {
        let mut map = Map::new();
        for (version, deps) in versions {
            let body = format!("{}@{}", name, version).into_bytes();
            let dependencies: Map<String, Value> = deps
                .iter()
                .map(|(d, r)| (d.to_string(), Value::String(r.to_string())))
                .collect();
            map.insert(
                version.to_string(),
                json!({
                    "name": name,
                    "version": version,
                    "dependencies": dependencies,
                    "dist": {
                        "tarball": self.tarball_url(name, version),
                        "shasum": sha1_hex(&body),
                    }
                }),
            );
            self.route(&self.tarball_path(name, version), 200, body);
        }
        let document = json!({
            "name": name,
            "dist-tags": { "latest": latest },
            "versions": map,
        });
        self.put_document(name, &document);
        document
    }

    pub fn put_document(&self, name: &str, document: &Value) {
        self.route(&metadata_path(name), 200, serde_json::to_vec(document).unwrap());
    }
}

/// Request path the crawler uses for a package's metadata.
pub fn metadata_path(name: &str) -> String {
    format!("/{}", name.replace('/', "%2F"))
}
