//! `Content-Range` parsing.

/// A parsed `Content-Range` value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentRange {
    /// `bytes first-last/total`, with `total` unknown for `*`.
    Bytes {
        first: u64,
        last: u64,
        total: Option<u64>,
    },
    /// `bytes */total`, as sent with 416 responses.
    Unsatisfied { total: u64 },
}

impl ContentRange {
    /// Offset of the first byte carried, zero for an unsatisfied range.
    #[must_use]
    pub fn first(&self) -> u64 {
        match self {
            Self::Bytes { first, .. } => *first,
            Self::Unsatisfied { .. } => 0,
        }
    }

    /// Number of bytes in the range.
    #[must_use]
    pub fn len(&self) -> u64 {
        match self {
            Self::Bytes { first, last, .. } => (last - first).saturating_add(1),
            Self::Unsatisfied { .. } => 0,
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Full size of the entity, when stated.
    #[must_use]
    pub fn total(&self) -> Option<u64> {
        match self {
            Self::Bytes { total, .. } => *total,
            Self::Unsatisfied { total } => Some(*total),
        }
    }
}

/// Parses `bytes <first>-<last>/<total|*>` or `bytes */<total>`.
///
/// The unit is optional and may be followed by a colon, as some old
/// servers send. Returns `None` for malformed values, for `last < first`,
/// for a span whose length does not fit in a `u64`, and for a known total
/// that does not exceed `last`.
#[must_use]
pub fn parse_content_range(value: &str) -> Option<ContentRange> {
    let mut rest = value.trim();
    if let Some(after) = strip_prefix_ignore_case(rest, "bytes") {
        rest = after.strip_prefix(':').unwrap_or(after).trim_start();
    }

    if let Some(total) = rest.strip_prefix("*/") {
        return Some(ContentRange::Unsatisfied {
            total: parse_number(total)?,
        });
    }

    let (span, total) = rest.split_once('/')?;
    let (first, last) = span.split_once('-')?;
    let first = parse_number(first)?;
    let last = parse_number(last)?;
    if last < first {
        return None;
    }
    (last - first).checked_add(1)?;
    let total = match total.trim() {
        "*" => None,
        text => {
            let total = parse_number(text)?;
            if total <= last {
                return None;
            }
            Some(total)
        }
    };
    Some(ContentRange::Bytes { first, last, total })
}

fn strip_prefix_ignore_case<'a>(text: &'a str, prefix: &str) -> Option<&'a str> {
    let head = text.get(..prefix.len())?;
    head.eq_ignore_ascii_case(prefix)
        .then(|| &text[prefix.len()..])
}

fn parse_number(text: &str) -> Option<u64> {
    let text = text.trim();
    if text.is_empty() || !text.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    text.parse().ok()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_full_range() {
        let range = parse_content_range("bytes 500-999/1000").unwrap();
        assert_eq!(
            range,
            ContentRange::Bytes {
                first: 500,
                last: 999,
                total: Some(1000)
            }
        );
        assert_eq!(range.first(), 500);
        assert_eq!(range.len(), 500);
    }

    #[test]
    fn test_unknown_total() {
        let range = parse_content_range("bytes 0-9/*").unwrap();
        assert_eq!(range.total(), None);
        assert_eq!(range.len(), 10);
    }

    #[test]
    fn test_unsatisfied() {
        let range = parse_content_range("bytes */1234").unwrap();
        assert_eq!(range, ContentRange::Unsatisfied { total: 1234 });
        assert_eq!(range.total(), Some(1234));
    }

    #[test]
    fn test_old_style_unit() {
        assert_eq!(
            parse_content_range("bytes: 1-2/3").unwrap().first(),
            1
        );
        assert_eq!(parse_content_range("1-2/3").unwrap().len(), 2);
    }

    #[test]
    fn test_rejects_inconsistent_ranges() {
        assert!(parse_content_range("bytes 10-5/100").is_none());
        assert!(parse_content_range("bytes 0-99/99").is_none());
        assert!(parse_content_range("bytes 0-99/50").is_none());
    }

    #[test]
    fn test_rejects_span_longer_than_u64() {
        assert!(parse_content_range("bytes 0-18446744073709551615/*").is_none());
        let widest = parse_content_range("bytes 1-18446744073709551615/*").unwrap();
        assert_eq!(widest.len(), u64::MAX);
    }

    #[test]
    fn test_rejects_malformed() {
        assert!(parse_content_range("bytes").is_none());
        assert!(parse_content_range("bytes a-b/c").is_none());
        assert!(parse_content_range("bytes -5/10").is_none());
        assert!(parse_content_range("bytes 5-/10").is_none());
        assert!(parse_content_range("bytes 1-2").is_none());
    }
}
