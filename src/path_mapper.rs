use std::path::{Path, PathBuf};
use url::Url;

/// Maps a resource URL to its location inside the mirror.
///
/// Resources on the mirrored host land at `<mirror_root>/<path>`; anything
/// else is nested under `<mirror_root>/<host>/<path>`. Directory-style URLs
/// (trailing `/`) become `index.html` inside that directory. Query strings and
/// fragments do not take part in the mapping.
pub fn map_path(url: &Url, site_root: &Url, mirror_root: &Path) -> PathBuf {
    let mut path = mirror_root.to_path_buf();

    if url.host_str() != site_root.host_str() {
        if let Some(host) = url.host_str() {
            path.push(host);
        }
    }

    let url_path = url.path();
    for segment in url_path.split('/') {
        match segment {
            "" | "." | ".." => {}
            segment => path.push(segment),
        }
    }

    if url_path.ends_with('/') {
        path.push("index.html");
    }

    path
}
