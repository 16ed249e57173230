/// Largest number of content bytes carried by one resumable request.
pub const MAX_RESUMABLE_CHUNK_SIZE: u64 = 512 * 1024;

/// Status returned while a resumable session still expects more content.
pub const RESUME_INCOMPLETE: u16 = 308;

/// Size of the next resumable request given how much has been sent.
pub fn next_chunk_length(total: u64, sent: u64, max_chunk: u64) -> u64 {
    total.saturating_sub(sent).min(max_chunk.max(1))
}
