//! Post-login redirect resolution with open-redirect protection.

use url::Url;

use dirsync_core::error::{DirsyncError, Result};

/// Decides where a browser goes after the assertion consumer finishes.
#[derive(Debug, Clone)]
pub struct RedirectPolicy {
    base: Url,
    default_dest: Option<String>,
}

impl RedirectPolicy {
    pub fn new(base_url: &str, default_dest: Option<&str>) -> Result<Self> {
        let base = Url::parse(base_url)
            .map_err(|e| DirsyncError::Config(format!("invalid dirsync.base_url: {e}")))?;
        Ok(Self {
            base,
            default_dest: default_dest
                .map(str::trim)
                .filter(|d| !d.is_empty())
                .map(String::from),
        })
    }

    /// Application root.
    pub fn root(&self) -> &str {
        self.base.as_str()
    }

    /// The return URL when it is same-origin, otherwise the configured
    /// default destination, otherwise the root.
    pub fn resolve(&self, back_url: Option<&str>) -> String {
        back_url
            .map(str::trim)
            .filter(|u| !u.is_empty())
            .and_then(|u| self.same_origin(u))
            .or_else(|| {
                self.default_dest
                    .as_deref()
                    .and_then(|d| self.same_origin(d).or_else(|| self.base_relative(d)))
            })
            .unwrap_or_else(|| self.base.to_string())
    }

    /// `target` as an absolute URL if it stays on this site.
    fn same_origin(&self, target: &str) -> Option<String> {
        // the URL parser drops tabs and newlines, so "/\t/host" would become "//host"
        if target.chars().any(char::is_control) {
            return None;
        }
        let url = if is_local_path(target) {
            self.base.join(target).ok()?
        } else {
            Url::parse(target).ok()?
        };
        self.is_same_origin(&url).then(|| url.to_string())
    }

    fn is_same_origin(&self, url: &Url) -> bool {
        url.scheme() == self.base.scheme()
            && url.host_str().map(str::to_ascii_lowercase)
                == self.base.host_str().map(str::to_ascii_lowercase)
            && url.port_or_known_default() == self.base.port_or_known_default()
    }

    /// A configured destination written relative to the base, like `admin/`.
    fn base_relative(&self, dest: &str) -> Option<String> {
        if dest.contains("://")
            || dest.starts_with("//")
            || dest.contains('\\')
            || dest.chars().any(char::is_control)
        {
            return None;
        }
        let joined = self.base.join(dest).ok()?;
        self.is_same_origin(&joined).then(|| joined.to_string())
    }
}

/// A path starting with exactly one `/`. `//host` and `/\host` are
/// scheme-relative to browsers and therefore not local.
fn is_local_path(target: &str) -> bool {
    let mut chars = target.chars();
    chars.next() == Some('/') && !matches!(chars.next(), Some('/') | Some('\\'))
}
