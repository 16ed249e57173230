/// `Range` header value requesting everything from `offset` on.
///
/// # Examples
///
/// ```
/// use bytebridge_transfer::core::range_header;
///
/// assert_eq!(range_header(100), "bytes=100-");
/// ```
pub fn range_header(offset: u64) -> String { format!("bytes={offset}-") }

/// Start offset of a `bytes=N-` or `bytes=N-M` range request.
pub fn parse_range_start(value: &str) -> Option<u64> {
    let spec = value.trim().strip_prefix("bytes=")?;
    let (start, _) = spec.split_once('-')?;
    start.trim().parse().ok()
}

/// A parsed `Content-Range: bytes start-end/total` header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContentRange {
    pub start: u64,
    /// Inclusive.
    pub end: u64,
    /// `None` when the server sent `*`.
    pub total: Option<u64>,
}

pub fn parse_content_range(value: &str) -> Option<ContentRange> {
    let rest = value.trim().strip_prefix("bytes")?.trim_start();
    let (range, total) = rest.split_once('/')?;
    let (start, end) = range.split_once('-')?;
    let start = start.trim().parse().ok()?;
    let end = end.trim().parse().ok()?;
    if end < start {
        return None;
    }
    let total = match total.trim() {
        "*" => None,
        total => Some(total.parse().ok()?),
    };
    Some(ContentRange { start, end, total })
}

/// `Content-Range` value for `len` bytes starting at `start` of a `total`-byte upload.
///
/// An empty piece is written as `bytes */total`.
pub fn content_range_header(start: u64, len: u64, total: u64) -> String {
    if len == 0 {
        return format!("bytes */{total}");
    }
    format!("bytes {start}-{}/{total}", start + len - 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_range_start() {
        assert_eq!(parse_range_start("bytes=100-"), Some(100));
        assert_eq!(parse_range_start("bytes=0-499"), Some(0));
        assert_eq!(parse_range_start("items=1-"), None);
        assert_eq!(parse_range_start("bytes=-500"), None);
    }

    #[test]
    fn test_parse_content_range() {
        assert_eq!(
            parse_content_range("bytes 100-199/1000"),
            Some(ContentRange { start: 100, end: 199, total: Some(1000) })
        );
        assert_eq!(
            parse_content_range("bytes 0-9/*"),
            Some(ContentRange { start: 0, end: 9, total: None })
        );
        assert_eq!(parse_content_range("bytes */1000"), None);
        assert_eq!(parse_content_range("bytes 9-0/10"), None);
    }

    #[test]
    fn test_content_range_header() {
        assert_eq!(content_range_header(0, 524_288, 1_000_000), "bytes 0-524287/1000000");
        assert_eq!(content_range_header(524_288, 475_712, 1_000_000), "bytes 524288-999999/1000000");
        assert_eq!(content_range_header(0, 0, 0), "bytes */0");
    }
}
