//! Response head parsing.
//!
//! The head is kept as raw text. Headers are looked up by scanning its
//! lines, case-insensitively, with continuation lines folded into the line
//! they continue. Repeated headers are found by scanning again from just
//! past the previous match.

/// Reason reported for a head-less (HTTP/0.9) response.
pub const HTTP09_REASON: &str = "No headers, assuming HTTP/0.9";

/// A parsed status line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusLine {
    /// `(major, minor)` when the line carried a version.
    pub version: Option<(u32, u32)>,
    pub code: u16,
    pub reason: String,
}

impl StatusLine {
    /// Whether the server spoke HTTP/1.1 or later.
    #[must_use]
    pub fn is_http11(&self) -> bool {
        matches!(self.version, Some((major, minor)) if major > 1 || (major == 1 && minor >= 1))
    }
}

/// A response head.
#[derive(Debug, Clone, Default)]
pub struct Response {
    /// Status line first, then one folded entry per header.
    lines: Vec<String>,
}

impl Response {
    /// Splits `head` into its logical lines. An empty head stands for an
    /// HTTP/0.9 response.
    #[must_use]
    pub fn parse(head: &[u8]) -> Self {
        let text = String::from_utf8_lossy(head);
        let mut lines: Vec<String> = Vec::new();
        for raw in text.split('\n') {
            let line = raw.strip_suffix('\r').unwrap_or(raw);
            if line.is_empty() {
                if lines.is_empty() {
                    continue;
                }
                break;
            }
            if line.starts_with([' ', '\t'])
                && lines.len() > 1
                && let Some(previous) = lines.last_mut()
            {
                previous.push(' ');
                previous.push_str(line.trim_start());
                continue;
            }
            lines.push(line.to_string());
        }
        Self { lines }
    }

    /// Whether there was no head at all.
    #[must_use]
    pub fn is_http09(&self) -> bool {
        self.lines.is_empty()
    }

    /// Parses the status line.
    ///
    /// The version token may be missing (`HTTP 200 OK`); the code must be
    /// exactly three digits. Returns `None` for a malformed line. An empty
    /// head yields an implied `200`.
    #[must_use]
    pub fn status(&self) -> Option<StatusLine> {
        let Some(line) = self.lines.first() else {
            return Some(StatusLine {
                version: None,
                code: 200,
                reason: HTTP09_REASON.to_string(),
            });
        };
        parse_status_line(line)
    }

    /// Finds header `name` starting at line `start`. Returns the value and
    /// the index to resume from for the next occurrence.
    #[must_use]
    pub fn header_from(&self, name: &str, start: usize) -> Option<(&str, usize)> {
        let first = start.max(1);
        self.lines
            .iter()
            .enumerate()
            .skip(first)
            .find_map(|(index, line)| {
                let (key, value) = line.split_once(':')?;
                key.eq_ignore_ascii_case(name)
                    .then(|| (value.trim_matches([' ', '\t']), index + 1))
            })
    }

    /// First value of header `name`.
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.header_from(name, 0).map(|(value, _)| value)
    }

    /// Every value of header `name`, in order.
    #[must_use]
    pub fn header_all(&self, name: &str) -> Vec<&str> {
        let mut values = Vec::new();
        let mut next = 0;
        while let Some((value, resume)) = self.header_from(name, next) {
            values.push(value);
            next = resume;
        }
        values
    }

    /// Whether any value of `name` contains `token` as a comma-separated
    /// element.
    #[must_use]
    pub fn header_has_token(&self, name: &str, token: &str) -> bool {
        self.header_all(name).iter().any(|value| {
            value
                .split(',')
                .any(|item| item.trim().eq_ignore_ascii_case(token))
        })
    }

    /// The status line and header lines, for logging.
    pub fn lines(&self) -> impl Iterator<Item = &str> {
        self.lines.iter().map(String::as_str)
    }
}

fn parse_status_line(line: &str) -> Option<StatusLine> {
    let rest = line.strip_prefix("HTTP")?;
    let mut version = None;
    let rest = match rest.strip_prefix('/') {
        Some(after_slash) => {
            let end = after_slash.find([' ', '\t']).unwrap_or(after_slash.len());
            let (token, remainder) = after_slash.split_at(end);
            let (major, minor) = token.split_once('.').unwrap_or((token, "0"));
            version = Some((major.parse().ok()?, minor.parse().ok()?));
            remainder
        }
        None => rest,
    };

    let rest = rest.trim_start_matches([' ', '\t']);
    let digits = rest.get(..3)?;
    if !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let after = &rest[3..];
    if after.starts_with(|c: char| c.is_ascii_digit()) {
        return None;
    }
    let code = digits.parse().ok()?;
    Some(StatusLine {
        version,
        code,
        reason: after.trim().to_string(),
    })
}
