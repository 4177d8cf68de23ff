use std::fs;
use std::path::{Path, PathBuf};

use crate::request::RequestCtx;
use crate::route::Route;

/// Map the request target to physical storage, setting `tx.filename`,
/// `tx.ext` and `tx.etag`.
///
/// The extension map is consulted to prefer compressed or minified
/// variants; results are cached on the route so repeated lookups are O(1).
pub fn map_file(ctx: &mut RequestCtx, route: &Route) {
    let mut filename = PathBuf::new();

    if let Some(ref dir) = ctx.rx.language_dir {
        filename.push(dir);
    }
    filename.push(&ctx.rx.target);

    let mut filename = route.dir.join(filename);
    let mut info = fs::metadata(&filename).ok();

    if !route.map.is_empty() {
        if let Some(mapped) = route.lookup_mapping(&filename) {
            filename = mapped;
            info = fs::metadata(&filename).ok();
        } else if let Some(ext) = file_ext(&filename) {
            if let Some(alternates) = route.map.get(&ext) {
                let accept_gzip = ctx
                    .header("accept-encoding")
                    .map(|v| v.contains("gzip"))
                    .unwrap_or(false);

                for alt in alternates {
                    let zipped = alt.ends_with("gz");
                    if zipped && !accept_gzip {
                        continue;
                    }

                    let path = filename.with_extension(alt);
                    if let Ok(meta) = fs::metadata(&path) {
                        route.cache_mapping(&filename, &path);
                        filename = path;
                        info = Some(meta);
                        if zipped {
                            ctx.add_header("content-encoding", "gzip");
                        }
                        break;
                    }
                }
            }
        }
    }

    if let Some(info) = info {
        ctx.tx.etag = Some(etag(&info));
    }

    ctx.tx.ext = file_ext(&filename);
    tracing::trace!(
        "map_file uri \"{}\", filename \"{}\"",
        ctx.rx.uri,
        filename.display()
    );
    ctx.tx.filename = Some(filename);
}

fn file_ext(path: &Path) -> Option<String> {
    path.extension().map(|e| e.to_string_lossy().into_owned())
}

/// `"inode-size-mtime"`, all in hex.
fn etag(info: &fs::Metadata) -> String {
    let mtime = info
        .modified()
        .ok()
        .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
        .map(|d| d.as_secs())
        .unwrap_or(0);

    format!("\"{:x}-{:x}-{:x}\"", inode(info), info.len(), mtime)
}

#[cfg(unix)]
fn inode(info: &fs::Metadata) -> u64 {
    use std::os::unix::fs::MetadataExt;
    info.ino()
}

#[cfg(not(unix))]
fn inode(_info: &fs::Metadata) -> u64 {
    0
}

#[cfg(test)]
mod test {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use super::*;
    use crate::auth::SessionStore;

    /// A scratch directory holding the given files, removed on drop.
    struct Docs {
        dir: PathBuf,
    }

    impl Docs {
        fn new(name: &str, files: &[&str]) -> Docs {
            static SEQ: AtomicUsize = AtomicUsize::new(0);

            let dir = std::env::temp_dir().join(format!(
                "trellis-map-{}-{}-{}",
                name,
                std::process::id(),
                SEQ.fetch_add(1, Ordering::SeqCst),
            ));
            fs::create_dir_all(&dir).unwrap();
            for file in files {
                fs::write(dir.join(file), file.as_bytes()).unwrap();
            }
            Docs { dir }
        }
    }

    impl Drop for Docs {
        fn drop(&mut self) {
            let _ = fs::remove_dir_all(&self.dir);
        }
    }

    fn route_with_map(dir: &Path) -> Route {
        let mut route = Route::new();
        route.set_dir(dir);
        route.add_mapping("css", "${1}.gz");
        route.finalize();
        route
    }

    fn ctx_for(target: &str, accept_encoding: Option<&str>) -> RequestCtx {
        let mut ctx = RequestCtx::new(Arc::new(SessionStore::new()));
        ctx.rx.target = target.to_owned();
        if let Some(value) = accept_encoding {
            ctx.rx.headers.insert(
                "accept-encoding",
                http::HeaderValue::from_str(value).unwrap(),
            );
        }
        ctx
    }

    #[test]
    fn gzip_variant_is_preferred_and_cached() {
        let docs = Docs::new("gzip", &["style.css", "style.css.gz"]);
        let route = route_with_map(&docs.dir);

        let mut ctx = ctx_for("style.css", Some("gzip, deflate"));
        map_file(&mut ctx, &route);

        let filename = ctx.tx.filename.clone().unwrap();
        assert!(filename.to_string_lossy().ends_with("style.css.gz"));
        assert_eq!(ctx.tx.headers.get("content-encoding").unwrap(), "gzip");
        assert!(ctx.tx.etag.as_deref().unwrap().starts_with('"'));

        // The negotiation result is cached against the unmapped filename.
        let base = docs.dir.join("style.css");
        assert_eq!(route.lookup_mapping(&base), Some(filename.clone()));

        // A cache hit resolves without re-running the variant probes: the
        // variant file can disappear and the mapping still holds.
        fs::remove_file(&filename).unwrap();
        let mut ctx = ctx_for("style.css", Some("gzip"));
        map_file(&mut ctx, &route);
        assert_eq!(ctx.tx.filename, Some(filename));
    }

    #[test]
    fn gzip_variant_is_skipped_without_accept_encoding() {
        let docs = Docs::new("plain", &["style.css", "style.css.gz"]);
        let route = route_with_map(&docs.dir);

        let mut ctx = ctx_for("style.css", None);
        map_file(&mut ctx, &route);

        let filename = ctx.tx.filename.clone().unwrap();
        assert!(filename.to_string_lossy().ends_with("style.css"));
        assert!(ctx.tx.headers.get("content-encoding").is_none());
        // The plain file exists, so the etag is still computed.
        assert!(ctx.tx.etag.is_some());
        assert_eq!(ctx.tx.ext.as_deref(), Some("css"));
    }

    #[test]
    fn missing_files_leave_no_etag() {
        let docs = Docs::new("missing", &[]);
        let route = route_with_map(&docs.dir);

        let mut ctx = ctx_for("absent.css", Some("gzip"));
        map_file(&mut ctx, &route);

        assert!(ctx.tx.filename.is_some());
        assert!(ctx.tx.etag.is_none());
        assert!(ctx.tx.headers.get("content-encoding").is_none());
    }
}
