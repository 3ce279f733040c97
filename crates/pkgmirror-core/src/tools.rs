//! Auxiliary tool mirror: fetch an S3-style bucket listing and download every key.
//! Flat and non-recursive; no version resolution.

use std::fs;
use std::path::{Path, PathBuf};

use quick_xml::events::Event;
use quick_xml::Reader;
use serde::Serialize;

use crate::error::{MirrorError, Result};
use crate::http_client::HttpClient;
use crate::layout;
use crate::logging;
use crate::store;

pub const DEFAULT_TOOL: &str = "chromedriver";
pub const DEFAULT_INDEX_URL: &str = "https://chromedriver.storage.googleapis.com/";
pub const INDEX_FILE: &str = "index.xml";

#[derive(Clone, Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolMirrorReport {
    pub tool: String,
    pub keys: usize,
    pub downloaded: usize,
    pub cached: usize,
    pub failures: Vec<MirrorError>,
}

/// Extract every `Contents/Key` from a bucket listing. Namespaces are ignored.
pub fn parse_bucket_keys(xml: &str) -> Result<Vec<String>> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut keys = Vec::new();
    let mut in_contents = false;
    let mut in_key = false;
    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => match e.local_name().as_ref() {
                b"Contents" => in_contents = true,
                b"Key" => in_key = in_contents,
                _ => {}
            },
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"Contents" => in_contents = false,
                b"Key" => in_key = false,
                _ => {}
            },
            Ok(Event::Text(text)) if in_key => {
                let key = text
                    .unescape()
                    .map_err(|e| MirrorError::parse("tool index key", e))?;
                keys.push(key.into_owned());
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(MirrorError::parse("tool index", e)),
            _ => {}
        }
    }
    Ok(keys)
}

/// Relative path for a key, or None for directory markers and unsafe keys.
fn key_path(key: &str) -> Option<PathBuf> {
    if key.ends_with('/') {
        return None;
    }
    let mut path = PathBuf::new();
    for component in key.split('/') {
        if !layout::is_safe_component(component) {
            return None;
        }
        path.push(component);
    }
    Some(path)
}

/// Mirror `tool` from `index_url` into `<root>/_tools/<tool>/`. `on_key` is called before each
/// key with (index, total, key).
pub fn mirror_tool(
    client: &HttpClient,
    index_url: &str,
    tool: &str,
    root: &Path,
    on_key: &mut dyn FnMut(usize, usize, &str),
) -> Result<ToolMirrorReport> {
    logging::info(&format!("Downloading {} resources.", tool));
    let mut report = ToolMirrorReport {
        tool: tool.to_string(),
        ..Default::default()
    };

    let body = client
        .get_bytes(index_url)
        .map_err(|f| MirrorError::network("tool index", index_url, f.status, f.message))?;
    let xml = String::from_utf8_lossy(&body);
    let keys = parse_bucket_keys(&xml)?;

    let dir = layout::tools_dir(root, tool);
    store::ensure_dir(&dir);
    let index_path = dir.join(INDEX_FILE);
    fs::write(&index_path, &body).map_err(|e| MirrorError::io("write tool index", Some(&index_path), e))?;

    let files: Vec<(String, PathBuf)> = keys
        .into_iter()
        .filter_map(|k| key_path(&k).map(|p| (k, p)))
        .collect();
    report.keys = files.len();

    let base = index_url.trim_end_matches('/');
    for (i, (key, rel)) in files.iter().enumerate() {
        on_key(i, files.len(), key);
        let dest = dir.join(rel);
        let url = format!("{}/{}", base, key);

        if dest.is_file() {
            logging::debug(&format!("Using cached {} at {}", url, dest.display()));
            report.cached += 1;
            continue;
        }
        if let Some(parent) = dest.parent() {
            store::ensure_dir(parent);
        }

        logging::info(&format!("Downloading {} to {}", url, dest.display()));
        let name = rel.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_default();
        let partial = dest.with_file_name(format!(".{}.part", name));
        let fetched = client
            .get_to_file(&url, &partial)
            .and_then(|_| fs::rename(&partial, &dest).map_err(|e| MirrorError::io("rename", Some(&dest), e)));
        match fetched {
            Ok(()) => report.downloaded += 1,
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                let _ = fs::remove_file(&partial);
                logging::warn(&e.to_string());
                report.failures.push(e);
            }
        }
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http_client::HttpSettings;

    const LISTING: &str = r#"<?xml version='1.0' encoding='UTF-8'?>
<ListBucketResult xmlns="http://doc.s3.amazonaws.com/2006-03-01">
  <Name>chromedriver</Name>
  <Contents><Key>2.0/chromedriver_linux64.zip</Key><Size>10</Size></Contents>
  <Contents><Key>2.0/</Key></Contents>
  <Contents><Key>LATEST_RELEASE</Key></Contents>
  <Contents><Key>../escape</Key></Contents>
</ListBucketResult>"#;

    #[test]
    fn test_parse_bucket_keys() {
        let keys = parse_bucket_keys(LISTING).unwrap();
        assert_eq!(
            keys,
            vec!["2.0/chromedriver_linux64.zip", "2.0/", "LATEST_RELEASE", "../escape"]
        );
    }

    #[test]
    fn test_key_path_filters() {
        assert_eq!(key_path("2.0/a.zip"), Some(PathBuf::from("2.0").join("a.zip")));
        assert_eq!(key_path("2.0/"), None);
        assert_eq!(key_path("../escape"), None);
    }

    #[test]
    fn test_malformed_listing() {
        assert!(parse_bucket_keys("<a><b></a>").is_err());
    }

    #[test]
    fn test_mirror_tool_downloads_and_caches() {
        let server = tiny_http::Server::http("127.0.0.1:0").unwrap();
        let base = format!("http://{}", server.server_addr().to_ip().unwrap());
        std::thread::spawn(move || {
            for req in server.incoming_requests() {
                let body: Vec<u8> = match req.url() {
                    "/" => LISTING.as_bytes().to_vec(),
                    "/2.0/chromedriver_linux64.zip" => b"zip".to_vec(),
                    "/LATEST_RELEASE" => b"2.0".to_vec(),
                    _ => {
                        let _ = req.respond(tiny_http::Response::empty(404u16));
                        continue;
                    }
                };
                let _ = req.respond(tiny_http::Response::from_data(body));
            }
        });

        let client = HttpClient::new(HttpSettings {
            retries: 0,
            ..HttpSettings::default()
        });
        let dir = tempfile::tempdir().unwrap();
        let mut seen = Vec::new();
        let report = mirror_tool(&client, &format!("{}/", base), "chromedriver", dir.path(), &mut |_, _, k| {
            seen.push(k.to_string())
        })
        .unwrap();

        let tool_dir = dir.path().join("_tools").join("chromedriver");
        assert_eq!(report.keys, 2);
        assert_eq!(report.downloaded, 2);
        assert_eq!(seen.len(), 2);
        assert!(tool_dir.join(INDEX_FILE).exists());
        assert_eq!(fs::read(tool_dir.join("2.0").join("chromedriver_linux64.zip")).unwrap(), b"zip");

        let again = mirror_tool(&client, &format!("{}/", base), "chromedriver", dir.path(), &mut |_, _, _| {}).unwrap();
        assert_eq!(again.downloaded, 0);
        assert_eq!(again.cached, 2);
    }
}
