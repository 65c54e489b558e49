use regex::Regex;
use std::sync::Arc;

use super::config::RewriteFn;

/// A compiled path-rewrite rule: paths matching `pattern` are rewritten
/// to `replacement`, with `$1`-style capture references expanded.
#[derive(Debug)]
pub struct RewriteRule {
    pattern: Regex,
    replacement: String,
}

impl RewriteRule {
    /// Compile a `(pattern, replacement)` pair. Returns a descriptive
    /// message when the regex is invalid.
    pub fn compile(pattern: &str, replacement: &str) -> Result<Self, String> {
        let pattern = Regex::new(pattern)
            .map_err(|err| format!("invalid rewrite pattern '{pattern}': {err}"))?;
        Ok(Self {
            pattern,
            replacement: expand_capture_refs(replacement),
        })
    }

    /// Apply the rule to a path. Returns the rewritten path on match.
    pub fn apply(&self, path: &str) -> Option<String> {
        if !self.pattern.is_match(path) {
            return None;
        }
        Some(
            self.pattern
                .replacen(path, 1, self.replacement.as_str())
                .into_owned(),
        )
    }

    /// Wrap an ordered rule list into a rewrite function; the first
    /// matching rule wins.
    pub fn rewrite_fn(rules: Vec<RewriteRule>) -> RewriteFn {
        Arc::new(move |uri: &hyper::Uri| {
            let path = uri.path();
            rules.iter().find_map(|rule| rule.apply(path))
        })
    }
}

/// Converts bare `$1` / `$name` capture references in a replacement
/// string to the `regex` crate's `${1}` / `${name}` form, so adjacent
/// literal text cannot be absorbed into the group name.
fn expand_capture_refs(replacement: &str) -> String {
    let chars: Vec<char> = replacement.chars().collect();
    let mut out = String::with_capacity(replacement.len() + 8);
    let mut i = 0;
    while i < chars.len() {
        if chars[i] == '$'
            && i + 1 < chars.len()
            && (chars[i + 1].is_ascii_alphanumeric() || chars[i + 1] == '_')
        {
            let start = i + 1;
            // `$1` references stop at the first non-digit; named
            // references consume the full identifier.
            let digit_ref = chars[start].is_ascii_digit();
            let mut end = start + 1;
            while end < chars.len() {
                let c = chars[end];
                let more = if digit_ref {
                    c.is_ascii_digit()
                } else {
                    c.is_ascii_alphanumeric() || c == '_'
                };
                if !more {
                    break;
                }
                end += 1;
            }
            out.push_str("${");
            out.extend(&chars[start..end]);
            out.push('}');
            i = end;
        } else {
            out.push(chars[i]);
            i += 1;
        }
    }
    out
}
