//! Pure helpers: header formatting and parsing, body framing, status classification.

mod multipart;
mod range;
mod resumable;
mod status;

pub use multipart::{
    BOUNDARY, multipart_content_type, multipart_footer, multipart_preamble,
};
pub use range::{ContentRange, content_range_header, parse_content_range, parse_range_start, range_header};
pub use resumable::{MAX_RESUMABLE_CHUNK_SIZE, RESUME_INCOMPLETE, next_chunk_length};
pub use status::{ServiceErrorKind, classify_status, error_message, is_success};
