//! Framing for uploads that carry a metadata entry next to the content.
//!
//! The body is a two-part `multipart/related` document: the serialized entry,
//! then the raw content. The preamble is everything up to the first content
//! byte and the footer closes the document after the last one.

use bytes::Bytes;

pub const BOUNDARY: &str = "0003Z5W789deadbeefRTE456KlemsnoZV";

/// `Content-Type` of the whole request body.
pub fn multipart_content_type() -> String { format!("multipart/related; boundary={BOUNDARY}") }

/// Entry part plus the headers of the content part.
pub fn multipart_preamble(entry_type: &str, entry: &[u8], content_type: &str) -> Bytes {
    let mut out = Vec::with_capacity(entry.len() + content_type.len() + 2 * BOUNDARY.len() + 128);
    out.extend_from_slice(format!("--{BOUNDARY}\nContent-Type: {entry_type}; charset=UTF-8\n\n").as_bytes());
    out.extend_from_slice(entry);
    out.extend_from_slice(
        format!(
            "\n--{BOUNDARY}\nContent-Type: {content_type}\nContent-Transfer-Encoding: binary\n\n"
        )
        .as_bytes(),
    );
    Bytes::from(out)
}

pub fn multipart_footer() -> Bytes { Bytes::from(format!("\n--{BOUNDARY}--")) }

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_preamble_layout() {
        let preamble = multipart_preamble("application/json", br#"{"title":"a"}"#, "text/plain");
        let expected = "--0003Z5W789deadbeefRTE456KlemsnoZV\n\
                        Content-Type: application/json; charset=UTF-8\n\
                        \n\
                        {\"title\":\"a\"}\n\
                        --0003Z5W789deadbeefRTE456KlemsnoZV\n\
                        Content-Type: text/plain\n\
                        Content-Transfer-Encoding: binary\n\
                        \n";
        assert_eq!(preamble, expected.as_bytes());
    }

    #[test]
    fn test_footer_closes_boundary() {
        assert_eq!(multipart_footer(), "\n--0003Z5W789deadbeefRTE456KlemsnoZV--".as_bytes());
        assert_eq!(
            multipart_content_type(),
            "multipart/related; boundary=0003Z5W789deadbeefRTE456KlemsnoZV"
        );
    }
}
