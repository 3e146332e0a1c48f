//! Console asset collaborator.

use std::path::PathBuf;

use bytes::Bytes;

/// Name the single-page fallback resolves to.
pub const INDEX_DOCUMENT: &str = "index.html";

/// A static file ready to be served.
#[derive(Debug, Clone)]
pub struct Asset {
    pub body: Bytes,
    pub content_type: &'static str,
}

/// Source of console bundle files, addressed by bare file name.
pub trait AssetStore: Send + Sync + 'static {
    fn load(&self, name: &str) -> Option<Asset>;
}

/// Assets read from a directory on disk.
#[derive(Debug, Clone)]
pub struct DirAssets {
    root: PathBuf,
}

impl DirAssets {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl AssetStore for DirAssets {
    fn load(&self, name: &str) -> Option<Asset> {
        if !is_plain_file_name(name) {
            return None;
        }
        let body = std::fs::read(self.root.join(name)).ok()?;
        Some(Asset {
            body: Bytes::from(body),
            content_type: content_type_for(name),
        })
    }
}

/// The bootstrap document compiled into the binary, used when no bundle
/// directory is configured.
#[derive(Debug, Clone, Default)]
pub struct BuiltinAssets;

const BUILTIN_INDEX: &str = r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="utf-8">
<title>BleepGate Console</title>
<link rel="stylesheet" href="loader.css">
</head>
<body>
<div id="root">BleepGate console</div>
<script src="index_bundle.js"></script>
</body>
</html>
"#;

const BUILTIN_LOADER_CSS: &str = "body{font-family:sans-serif;margin:0}#root{padding:2rem}\n";

impl AssetStore for BuiltinAssets {
    fn load(&self, name: &str) -> Option<Asset> {
        let body = match name {
            INDEX_DOCUMENT => BUILTIN_INDEX,
            "loader.css" => BUILTIN_LOADER_CSS,
            _ => return None,
        };
        Some(Asset {
            body: Bytes::from_static(body.as_bytes()),
            content_type: content_type_for(name),
        })
    }
}

/// A single path segment with no traversal.
fn is_plain_file_name(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains(['/', '\\', '\0'])
}

/// MIME type by file extension.
pub fn content_type_for(name: &str) -> &'static str {
    match name.rsplit_once('.').map(|(_, ext)| ext) {
        Some("html") => "text/html; charset=utf-8",
        Some("js") => "application/javascript",
        Some("css") => "text/css",
        Some("svg") => "image/svg+xml",
        Some("png") => "image/png",
        Some("ico") => "image/x-icon",
        Some("json") => "application/json",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_types() {
        assert_eq!(content_type_for("index_bundle.js"), "application/javascript");
        assert_eq!(content_type_for("logo.svg"), "image/svg+xml");
        assert_eq!(content_type_for("favicon.ico"), "image/x-icon");
        assert_eq!(content_type_for("README"), "application/octet-stream");
    }

    #[test]
    fn test_builtin_assets() {
        let assets = BuiltinAssets;
        let index = assets.load(INDEX_DOCUMENT).unwrap();
        assert!(index.content_type.starts_with("text/html"));
        assert!(assets.load("loader.css").is_some());
        assert!(assets.load("missing.js").is_none());
    }

    #[test]
    fn test_dir_assets_reads_files_and_refuses_traversal() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("secret.txt"), "nope").unwrap();
        std::fs::create_dir(dir.path().join("bundle")).unwrap();
        let assets = DirAssets::new(dir.path().join("bundle"));
        std::fs::write(dir.path().join("bundle/app.js"), "console.log(1)").unwrap();

        let asset = assets.load("app.js").unwrap();
        assert_eq!(asset.body, Bytes::from_static(b"console.log(1)"));
        assert_eq!(asset.content_type, "application/javascript");

        assert!(assets.load("../secret.txt").is_none());
        assert!(assets.load("..").is_none());
        assert!(assets.load("missing.js").is_none());
    }
}
