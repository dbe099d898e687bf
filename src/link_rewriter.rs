use anyhow::{Context, Result};
use regex::{Captures, Regex};
use url::Url;

/// Rewrites absolute references in captured documents so the mirror can be
/// browsed offline.
///
/// Two passes, each over its own textual pattern:
/// - `onclick="location.href='...'"` targets become path + query + fragment.
/// - `<script src="...">` sources become path-relative when they live on the
///   base host, and `/<host>/<path>` otherwise, matching where the path mapper
///   stores cross-site files.
///
/// Anything the patterns do not match is left as it is.
#[derive(Debug, Clone)]
pub struct LinkRewriter {
    base_url: Url,
    location_href: Regex,
    script_src: Regex,
}

impl LinkRewriter {
    pub fn new(base_url: Url) -> Result<Self> {
        let location_href = Regex::new(r#"(onclick="location\.href=')([^']+)(')"#)
            .context("Failed to compile location.href pattern")?;
        let script_src = Regex::new(r#"(<script\ssrc=")([^"]+)(")"#)
            .context("Failed to compile script src pattern")?;

        Ok(Self {
            base_url,
            location_href,
            script_src,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    pub fn rewrite_document(&self, html: &str) -> String {
        let output = self.location_href.replace_all(html, |caps: &Captures| {
            match self.resolve(&caps[2]) {
                Some(href) => format!("{}{}{}", &caps[1], relative_reference(&href), &caps[3]),
                None => caps[0].to_string(),
            }
        });

        let output = self.script_src.replace_all(&output, |caps: &Captures| {
            let href = match self.resolve(&caps[2]) {
                Some(href) => href,
                None => return caps[0].to_string(),
            };
            let relative = relative_reference(&href);
            if href.host_str() == self.base_url.host_str() {
                format!("{}{}{}", &caps[1], relative, &caps[3])
            } else {
                let host = href.host_str().unwrap_or_default();
                format!("{}/{}{}{}", &caps[1], host, relative, &caps[3])
            }
        });

        output.into_owned()
    }

    /// Resolves a reference against the base, keeping only web URLs.
    fn resolve(&self, link: &str) -> Option<Url> {
        let href = self.base_url.join(link).ok()?;
        match href.scheme() {
            "http" | "https" => Some(href),
            _ => None,
        }
    }
}

/// Path, query and fragment of a URL, with empty query/fragment dropped.
fn relative_reference(url: &Url) -> String {
    let mut relative = url.path().to_string();
    if let Some(query) = url.query().filter(|q| !q.is_empty()) {
        relative.push('?');
        relative.push_str(query);
    }
    if let Some(fragment) = url.fragment().filter(|f| !f.is_empty()) {
        relative.push('#');
        relative.push_str(fragment);
    }
    relative
}
