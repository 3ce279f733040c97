//! Mirror a small closure, then serve it and fetch through the npm-compatible surface.

mod support;

use std::fs;
use std::io::Read;
use std::path::Path;
use std::thread;
use std::time::Duration;

use pkgmirror_core::{
    ContentStore, CrawlOptions, Crawler, HttpRegistry, HttpSettings, MirrorServer, MirrorWriter,
    ResolutionState, ServeOptions,
};
use serde_json::Value;

use support::FakeRegistry;

fn mirror(reg: &FakeRegistry, root: &Path, roots: &[&str]) {
    let source = HttpRegistry::new(&reg.base, HttpSettings::default());
    let writer = MirrorWriter::new(root, ContentStore::default());
    let options = CrawlOptions {
        delay: Duration::ZERO,
        deadline: None,
    };
    let roots: Vec<String> = roots.iter().map(|s| s.to_string()).collect();
    Crawler::new(&source, &writer, options)
        .crawl(&roots, &mut ResolutionState::new())
        .unwrap();
}

fn start(root: &Path, upstream: &str) -> (String, thread::JoinHandle<()>) {
    let mut options = ServeOptions::new(root);
    options.host = "127.0.0.1".to_string();
    options.port = 0;
    options.upstreams.push(upstream.to_string());
    let server = MirrorServer::bind(options).unwrap();
    let url = server.public_url().to_string();
    let handle = thread::spawn(move || server.run().unwrap());
    (url, handle)
}

fn get_json(url: &str) -> Value {
    let resp = ureq::get(url).call().unwrap();
    serde_json::from_reader(resp.into_reader()).unwrap()
}

fn status_of(result: Result<ureq::Response, ureq::Error>) -> u16 {
    match result {
        Ok(resp) => resp.status(),
        Err(ureq::Error::Status(code, _)) => code,
        Err(e) => panic!("transport error: {}", e),
    }
}

#[test]
fn test_serve_mirrored_closure() {
    let reg = FakeRegistry::start();
    reg.publish("web", "1.0.0", &[("1.0.0", &[("@types/web", "^1")])]);
    reg.publish("@types/web", "1.2.0", &[("1.2.0", &[])]);
    let dir = tempfile::tempdir().unwrap();
    mirror(&reg, dir.path(), &["web"]);

    let (url, handle) = start(dir.path(), &reg.base);

    let doc = get_json(&format!("{}/web", url));
    let tarball = doc["versions"]["1.0.0"]["dist"]["tarball"].as_str().unwrap().to_string();
    assert_eq!(tarball, format!("{}/web/-/web-1.0.0.tgz", url));

    let mut body = Vec::new();
    ureq::get(&tarball)
        .call()
        .unwrap()
        .into_reader()
        .read_to_end(&mut body)
        .unwrap();
    assert_eq!(body, b"web@1.0.0");

    for path in ["/@types/web", "/@types%2fweb", "/@types%2Fweb"] {
        let scoped = get_json(&format!("{}{}", url, path));
        assert_eq!(scoped["name"], "@types/web", "path {}", path);
    }
    let scoped_tgz = ureq::get(&format!("{}/@types/web/-/web-1.2.0.tgz", url)).call();
    assert_eq!(status_of(scoped_tgz), 200);

    assert_eq!(status_of(ureq::get(&format!("{}/missing", url)).call()), 404);
    assert_eq!(status_of(ureq::get(&format!("{}/web/-/web-9.9.9.tgz", url)).call()), 404);
    assert_eq!(status_of(ureq::get(&format!("{}/web/-/..%2Fsecret", url)).call()), 400);

    assert_eq!(status_of(ureq::post(&format!("{}/-/shutdown", url)).call()), 200);
    handle.join().unwrap();
}

#[test]
fn test_serve_tool_files() {
    let dir = tempfile::tempdir().unwrap();
    let tool_dir = dir.path().join("_tools/chromedriver/2.46");
    fs::create_dir_all(&tool_dir).unwrap();
    fs::write(tool_dir.join("notes.txt"), "release notes").unwrap();

    let (url, handle) = start(dir.path(), "https://registry.npmjs.org");

    let body = ureq::get(&format!("{}/-/tools/chromedriver/2.46/notes.txt", url))
        .call()
        .unwrap()
        .into_string()
        .unwrap();
    assert_eq!(body, "release notes");
    assert_eq!(
        status_of(ureq::get(&format!("{}/-/tools/chromedriver/2.46/absent.zip", url)).call()),
        404
    );

    ureq::post(&format!("{}/-/shutdown", url)).call().unwrap();
    handle.join().unwrap();
}
