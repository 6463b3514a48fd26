//! Relative reference resolution.
//!
//! Works on strings rather than parsed URLs: the base may be a bare
//! relative path (`path?foo`) and the result is re-parsed by the caller,
//! which is where `.`/`..` segments get simplified.

use super::parse::scheme_name;

/// Index of the first `?` or `#` in `base`, or its length.
fn path_end(base: &str) -> usize {
    base.find(['?', '#']).unwrap_or(base.len())
}

/// Resolves `link` relative to `base`.
///
/// A link that carries its own scheme is returned as is. Otherwise the
/// first character of `link` decides which suffix of `base` it replaces:
///
/// | link starts with | replaces |
/// |---|---|
/// | `?` | query and fragment |
/// | `#` | fragment |
/// | `//` | everything after the scheme |
/// | `/` | the whole path |
/// | anything else | the last path segment |
#[must_use]
pub fn merge(base: &str, link: &str) -> String {
    if scheme_name(link).is_some() {
        return link.to_string();
    }
    if link.is_empty() {
        return base.to_string();
    }

    let end = path_end(base);
    if link.starts_with('?') {
        return format!("{}{link}", &base[..end]);
    }
    if link.starts_with('#') {
        let fragment_start = base.find('#').unwrap_or(base.len());
        return format!("{}{link}", &base[..fragment_start]);
    }
    if link.starts_with("//") {
        let start = base.find("//").unwrap_or(0);
        return format!("{}{link}", &base[..start]);
    }
    if link.starts_with('/') {
        let start = root_insert_point(base, end);
        return format!("{}{link}", &base[..start]);
    }

    let bytes = base.as_bytes();
    match base[..end].rfind('/') {
        None => link.to_string(),
        // "http://host" has no path yet; add the separating slash.
        Some(slash) if slash >= 2 && &bytes[slash - 2..slash] == b":/" => {
            format!("{}/{link}", &base[..end])
        }
        Some(slash) => format!("{}{link}", &base[..=slash]),
    }
}

/// Where an absolute-path link is spliced into `base`: the first `/`
/// after `//host`, or the end of the authority when there is no path.
fn root_insert_point(base: &str, end: usize) -> usize {
    let bytes = base.as_bytes();
    let mut pos = 0;
    let mut seen_slash_slash = false;
    let slash = loop {
        match base[pos..end].find('/') {
            Some(offset) => {
                let slash = pos + offset;
                if !seen_slash_slash && bytes.get(slash + 1) == Some(&b'/') {
                    pos = slash + 2;
                    seen_slash_slash = true;
                    continue;
                }
                break Some(slash);
            }
            None => break None,
        }
    };
    match (slash, seen_slash_slash) {
        (Some(slash), true) => slash,
        (None, true) => end,
        (_, false) => 0,
    }
}

/// Turns shorthand like `example.com/x` or `localhost:8080/x` into an
/// `http://` URL. Returns `None` when `text` already names a scheme.
#[must_use]
pub fn maybe_prepend_scheme(text: &str) -> Option<String> {
    if text.contains("://") {
        return None;
    }
    if let Some(name) = scheme_name(text) {
        let after = &text[name.len() + 1..];
        if !after.starts_with(|c: char| c.is_ascii_digit()) {
            return None;
        }
    }
    Some(format!("http://{text}"))
}
