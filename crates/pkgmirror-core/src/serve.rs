//! Re-serve a mirror directory over HTTP. Metadata is rewritten so tarball URLs point
//! back at this server; tarballs and tool files are streamed from disk.

use std::fs::File;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use percent_encoding::percent_decode_str;
use serde_json::Value;
use tiny_http::{Header, Method, Request, Response, Server};

use crate::error::{MirrorError, Result};
use crate::layout;
use crate::logging;

pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 16000;

/// Origins whose tarball URLs are rewritten when none is configured.
pub const UPSTREAM_ORIGINS: [&str; 2] = ["https://registry.npmjs.org/", "http://registry.npmjs.org/"];

#[derive(Clone, Debug)]
pub struct ServeOptions {
    pub root: PathBuf,
    pub host: String,
    pub port: u16,
    /// Origin clients reach this server at. Defaults to the bound address.
    pub public_url: Option<String>,
    /// Extra upstream origins to rewrite (e.g. the registry the mirror was built from).
    pub upstreams: Vec<String>,
}

impl ServeOptions {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            public_url: None,
            upstreams: Vec::new(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Route {
    Metadata { scope: Option<String>, name: String },
    Tarball { scope: Option<String>, file: String },
    Tool { tool: String, path: PathBuf },
    Shutdown,
    Rejected,
    NotFound,
}

/// Map a request onto the mirror layout. Percent-escapes are decoded first, so
/// `/@scope%2fname` and `/@scope/name` are the same route.
pub fn route(method: &str, url: &str) -> Route {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    let Ok(decoded) = percent_decode_str(path).decode_utf8() else {
        return Route::Rejected;
    };
    let segments: Vec<&str> = decoded.split('/').filter(|s| !s.is_empty()).collect();
    if segments.iter().any(|s| !layout::is_safe_component(s)) {
        return Route::Rejected;
    }

    let is_get = method.eq_ignore_ascii_case("GET") || method.eq_ignore_ascii_case("HEAD");
    match segments.as_slice() {
        ["-", "shutdown"] if method.eq_ignore_ascii_case("POST") => Route::Shutdown,
        ["-", "tools", tool, rest @ ..] if is_get && !rest.is_empty() => Route::Tool {
            tool: tool.to_string(),
            path: rest.iter().collect(),
        },
        _ if !is_get => Route::NotFound,
        [name] if !name.starts_with('@') && !name.starts_with('-') => Route::Metadata {
            scope: None,
            name: name.to_string(),
        },
        [scope, name] if scope_of(scope).is_some() => Route::Metadata {
            scope: scope_of(scope),
            name: name.to_string(),
        },
        [name, "-", file] if !name.starts_with('@') => Route::Tarball {
            scope: None,
            file: file.to_string(),
        },
        [scope, _name, "-", file] if scope_of(scope).is_some() => Route::Tarball {
            scope: scope_of(scope),
            file: file.to_string(),
        },
        _ => Route::NotFound,
    }
}

fn scope_of(segment: &str) -> Option<String> {
    segment
        .strip_prefix('@')
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Rewrite every `versions.*.dist.tarball` that starts with one of `upstreams` onto `public_url`.
pub fn rewrite_tarball_urls(document: &mut Value, upstreams: &[String], public_url: &str) -> usize {
    let target = format!("{}/", public_url.trim_end_matches('/'));
    let mut rewritten = 0;
    let Some(versions) = document.get_mut("versions").and_then(Value::as_object_mut) else {
        return 0;
    };
    for body in versions.values_mut() {
        let Some(tarball) = body.pointer_mut("/dist/tarball") else {
            continue;
        };
        let Some(url) = tarball.as_str() else {
            continue;
        };
        let Some(rest) = upstreams.iter().find_map(|u| url.strip_prefix(u.as_str())) else {
            continue;
        };
        let local = format!("{}{}", target, rest);
        *tarball = Value::String(local);
        rewritten += 1;
    }
    rewritten
}

/// What to send back for one request.
#[derive(Debug)]
pub enum Reply {
    Json(Vec<u8>),
    File(PathBuf),
    Status(u16, &'static str),
    Shutdown,
}

pub struct MirrorServer {
    server: Server,
    root: PathBuf,
    public_url: String,
    upstreams: Vec<String>,
}

impl MirrorServer {
    pub fn bind(options: ServeOptions) -> Result<Self> {
        let addr = format!("{}:{}", options.host, options.port);
        let server = Server::http(&addr)
            .map_err(|e| MirrorError::network("bind", &addr, None, e.to_string()))?;
        let bound = server.server_addr().to_ip();
        let public_url = match (options.public_url, bound) {
            (Some(url), _) => url.trim_end_matches('/').to_string(),
            (None, Some(ip)) if ip.ip().is_unspecified() => format!("http://localhost:{}", ip.port()),
            (None, Some(ip)) => format!("http://{}", ip),
            (None, None) => format!("http://{}", addr),
        };

        let mut upstreams: Vec<String> = UPSTREAM_ORIGINS.iter().map(|s| s.to_string()).collect();
        for u in options.upstreams {
            let u = format!("{}/", u.trim_end_matches('/'));
            if !upstreams.contains(&u) {
                upstreams.push(u);
            }
        }

        Ok(Self {
            server,
            root: options.root,
            public_url,
            upstreams,
        })
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.server.server_addr().to_ip()
    }

    pub fn public_url(&self) -> &str {
        &self.public_url
    }

    /// Lines a client `.npmrc` needs to use this server.
    pub fn npmrc_hints(&self) -> Vec<String> {
        vec![format!("registry={}/", self.public_url), "audit=false".to_string()]
    }

    /// Serve until a shutdown request arrives.
    pub fn run(&self) -> Result<()> {
        logging::info(&format!(
            "Serving {} at {}",
            self.root.display(),
            self.public_url
        ));
        logging::info("Add these lines to your .npmrc:");
        for line in self.npmrc_hints() {
            logging::info(&format!("  {}", line));
        }

        for request in self.server.incoming_requests() {
            let method = request.method().to_string();
            let url = request.url().to_string();
            let reply = self.reply(&method, &url);
            logging::debug(&format!("{} {} -> {}", method, url, reply_status(&reply)));
            let stop = matches!(reply, Reply::Shutdown);
            if let Err(e) = send(request, reply) {
                logging::warn(&format!("Failed to respond to {} {}: {}", method, url, e));
            }
            if stop {
                logging::info("Shutdown requested.");
                break;
            }
        }
        Ok(())
    }

    pub fn reply(&self, method: &str, url: &str) -> Reply {
        match route(method, url) {
            Route::Metadata { scope, name } => {
                let path = layout::metadata_path(&self.root, scope.as_deref(), &name);
                self.metadata_reply(&path)
            }
            Route::Tarball { scope, file } => {
                file_reply(layout::tarball_dir(&self.root, scope.as_deref()).join(file))
            }
            Route::Tool { tool, path } => file_reply(layout::tools_dir(&self.root, &tool).join(path)),
            Route::Shutdown => Reply::Shutdown,
            Route::Rejected => Reply::Status(400, "Bad Request"),
            Route::NotFound => Reply::Status(404, "Not Found"),
        }
    }

    fn metadata_reply(&self, path: &Path) -> Reply {
        let Ok(body) = std::fs::read(path) else {
            return Reply::Status(404, "Not Found");
        };
        let mut document: Value = match serde_json::from_slice(&body) {
            Ok(v) => v,
            Err(e) => {
                logging::warn(&MirrorError::parse(&path.display().to_string(), e).to_string());
                return Reply::Status(500, "Internal Server Error");
            }
        };
        rewrite_tarball_urls(&mut document, &self.upstreams, &self.public_url);
        match serde_json::to_vec(&document) {
            Ok(bytes) => Reply::Json(bytes),
            Err(_) => Reply::Status(500, "Internal Server Error"),
        }
    }
}

fn file_reply(path: PathBuf) -> Reply {
    if path.is_file() {
        Reply::File(path)
    } else {
        Reply::Status(404, "Not Found")
    }
}

fn reply_status(reply: &Reply) -> u16 {
    match reply {
        Reply::Status(code, _) => *code,
        _ => 200,
    }
}

fn content_type(value: &str) -> Option<Header> {
    Header::from_bytes(&b"Content-Type"[..], value.as_bytes()).ok()
}

fn send(request: Request, reply: Reply) -> std::io::Result<()> {
    let head_only = *request.method() == Method::Head;
    match reply {
        Reply::Json(body) => {
            let mut resp = Response::from_data(if head_only { Vec::new() } else { body });
            if let Some(h) = content_type("application/json") {
                resp = resp.with_header(h);
            }
            request.respond(resp)
        }
        Reply::File(path) => {
            if head_only {
                return request.respond(Response::empty(200u16));
            }
            let file = File::open(&path)?;
            let mut resp = Response::from_file(file);
            if let Some(h) = content_type("application/octet-stream") {
                resp = resp.with_header(h);
            }
            request.respond(resp)
        }
        Reply::Status(code, text) => request.respond(Response::from_string(text).with_status_code(code)),
        Reply::Shutdown => request.respond(Response::from_string("shutting down")),
    }
}
