//! Detection and rewriting of Twitter/X status links.

use std::sync::OnceLock;

use regex::{Captures, Regex};

/// Status links on twitter.com / x.com. Scheme and host match case-insensitively;
/// handle, status id and query are captured so they survive the rewrite verbatim.
const STATUS_LINK_PATTERN: &str = r"(?P<scheme>(?i:https?))://(?P<host>(?i:(?:www\.)?(?:twitter\.com|x\.com)))(?P<path>/[A-Za-z0-9_]+/status/[0-9]+(?:\?[\w=&-]+)?)";

fn status_link_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(STATUS_LINK_PATTERN).expect("status link pattern is valid"))
}

/// Rewrites status links to an embed-friendly host.
#[derive(Clone, Debug)]
pub struct LinkRewriter {
    target_domain: String,
}

impl LinkRewriter {
    pub fn new(target_domain: impl Into<String>) -> Self {
        Self {
            target_domain: target_domain.into(),
        }
    }

    /// True when `text` holds at least one status link.
    pub fn contains_link(&self, text: &str) -> bool {
        status_link_regex().is_match(text)
    }

    /// Returns the rewritten body, or `None` when nothing matched.
    pub fn rewrite(&self, text: &str) -> Option<String> {
        if !self.contains_link(text) {
            return None;
        }

        let rewritten = status_link_regex().replace_all(text, |caps: &Captures<'_>| {
            format!(
                "{}://{}{}",
                &caps["scheme"], self.target_domain, &caps["path"]
            )
        });
        Some(rewritten.into_owned())
    }
}
