use std::fmt;

pub fn is_success(status: u16) -> bool { (200..300).contains(&status) }

/// Category of a failed service response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServiceErrorKind {
    /// 400: the server rejected the request as malformed.
    BadRequest,
    /// 401 and 403.
    AuthenticationRequired,
    /// 404.
    NotFound,
    /// 409 and 412: the resource changed underneath the request.
    Conflict,
    /// 503.
    Unavailable,
    /// Any other failure status.
    Protocol,
}

impl fmt::Display for ServiceErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServiceErrorKind::BadRequest => write!(f, "bad request"),
            ServiceErrorKind::AuthenticationRequired => write!(f, "authentication required"),
            ServiceErrorKind::NotFound => write!(f, "not found"),
            ServiceErrorKind::Conflict => write!(f, "conflict"),
            ServiceErrorKind::Unavailable => write!(f, "service unavailable"),
            ServiceErrorKind::Protocol => write!(f, "service error"),
        }
    }
}

pub fn classify_status(status: u16) -> ServiceErrorKind {
    match status {
        400 => ServiceErrorKind::BadRequest,
        401 | 403 => ServiceErrorKind::AuthenticationRequired,
        404 => ServiceErrorKind::NotFound,
        409 | 412 => ServiceErrorKind::Conflict,
        503 => ServiceErrorKind::Unavailable,
        _ => ServiceErrorKind::Protocol,
    }
}

/// Human-readable message for a failed response: the body when it is
/// readable text, otherwise the reason phrase, otherwise the bare status.
pub fn error_message(status: u16, reason: Option<&str>, body: &[u8]) -> String {
    if let Ok(text) = std::str::from_utf8(body) {
        let text = text.trim();
        if !text.is_empty() {
            return text.to_owned();
        }
    }
    match reason {
        Some(reason) if !reason.is_empty() => reason.to_owned(),
        _ => format!("HTTP status {status}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_status() {
        assert_eq!(classify_status(400), ServiceErrorKind::BadRequest);
        assert_eq!(classify_status(401), ServiceErrorKind::AuthenticationRequired);
        assert_eq!(classify_status(403), ServiceErrorKind::AuthenticationRequired);
        assert_eq!(classify_status(404), ServiceErrorKind::NotFound);
        assert_eq!(classify_status(409), ServiceErrorKind::Conflict);
        assert_eq!(classify_status(412), ServiceErrorKind::Conflict);
        assert_eq!(classify_status(503), ServiceErrorKind::Unavailable);
        assert_eq!(classify_status(500), ServiceErrorKind::Protocol);
    }

    #[test]
    fn test_error_message_fallbacks() {
        assert_eq!(error_message(500, Some("Internal Server Error"), b" quota exceeded \n"), "quota exceeded");
        assert_eq!(error_message(500, Some("Internal Server Error"), b""), "Internal Server Error");
        assert_eq!(error_message(500, None, &[0xff, 0xfe]), "HTTP status 500");
    }

    #[test]
    fn test_success_range() {
        assert!(is_success(200));
        assert!(is_success(201));
        assert!(is_success(206));
        assert!(!is_success(308));
        assert!(!is_success(199));
    }
}
