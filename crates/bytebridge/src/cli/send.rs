use std::fs::{self, File};
use std::io::{self, BufReader, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, bail};
use bytebridge_transfer::{
    HttpTransport, JsonEntry, Method, Progress, SendOptions, SendStream, UploadResponse, UploadTarget,
};
use clap::Args;
use tracing::{debug, info};

use super::parse_header;

#[derive(Clone, Debug, Args)]
pub struct SendArg {
    /// URL to upload to
    pub url: String,

    /// File to upload; `-` reads stdin
    pub input: PathBuf,

    /// HTTP method of the upload request
    #[arg(short = 'X', long, default_value = "post")]
    pub method: Method,

    /// Content type of the uploaded data
    #[arg(short = 't', long, default_value = "application/octet-stream")]
    pub content_type: String,

    /// File name suggested to the server
    #[arg(long)]
    pub slug: Option<String>,

    /// JSON file with metadata sent alongside the content
    #[arg(long)]
    pub metadata: Option<PathBuf>,

    /// ETag of the metadata being replaced, sent as If-Match
    #[arg(long, requires = "metadata")]
    pub etag: Option<String>,

    /// Use the resumable upload protocol (needs a file input)
    #[arg(long)]
    pub resumable: bool,

    /// Extra request header in `Name: value` form
    #[arg(short = 'H', long = "header", value_parser = parse_header)]
    pub headers: Vec<(String, String)>,
}

impl SendArg {
    pub fn run(self, transport: Arc<dyn HttpTransport>) -> anyhow::Result<()> {
        let reply = if self.input == Path::new("-") {
            self.upload(transport, &mut io::stdin().lock(), None)?
        } else {
            let file = File::open(&self.input)
                .with_context(|| format!("failed to open {}", self.input.display()))?;
            let length = file.metadata()?.len();
            self.upload(transport, &mut BufReader::new(file), Some(length))?
        };

        let mut stdout = io::stdout().lock();
        stdout.write_all(&reply)?;
        if !reply.is_empty() && !reply.ends_with(b"\n") {
            writeln!(stdout)?;
        }
        Ok(())
    }

    /// Upload everything `input` yields, returning the server's reply body.
    pub fn upload<R: Read>(
        &self,
        transport: Arc<dyn HttpTransport>,
        input: &mut R,
        length: Option<u64>,
    ) -> anyhow::Result<Vec<u8>> {
        let mut target = UploadTarget::new(self.method, &self.url, &self.content_type);
        if let Some(slug) = &self.slug {
            target = target.slug(slug);
        }
        if let Some(path) = &self.metadata {
            let raw = fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
            let value: serde_json::Value = serde_json::from_slice(&raw)
                .with_context(|| format!("{} is not valid JSON", path.display()))?;
            let mut entry = JsonEntry::new(value);
            if let Some(etag) = &self.etag {
                entry = entry.with_etag(etag);
            }
            target = target.entry(entry);
        }
        if self.resumable {
            let Some(length) = length else {
                bail!("--resumable needs a file input so the upload length is known");
            };
            target = target.resumable(length);
        }

        let options = SendOptions::default().headers(self.headers.clone()).on_progress(Arc::new(
            |progress: &Progress| {
                debug!(
                    phase = %progress.phase,
                    bytes = progress.bytes_transferred,
                    total = ?progress.total_bytes,
                    "upload progress"
                );
            },
        ));

        let mut stream = SendStream::new(transport, target, options);
        let copied = io::copy(input, &mut stream).with_context(|| format!("failed to upload to {}", self.url))?;
        stream.close().with_context(|| format!("upload to {} failed", self.url))?;
        info!(url = %self.url, bytes = copied, "upload complete");

        match stream.response() {
            UploadResponse::Complete { body, .. } => Ok(body.to_vec()),
            other => bail!("upload to {} ended without a reply ({other:?})", self.url),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytebridge_transfer::{MockResponse, MockTransport};

    fn arg(input: PathBuf) -> SendArg {
        SendArg {
            url: "mock://upload".to_owned(),
            input,
            method: Method::Post,
            content_type: "text/plain".to_owned(),
            slug: None,
            metadata: None,
            etag: None,
            resumable: false,
            headers: Vec::new(),
        }
    }

    fn echo() -> Arc<MockTransport> {
        Arc::new(MockTransport::new(|request| MockResponse::new(201).with_body(request.body.clone())))
    }

    #[test]
    fn test_upload_file_contents() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"line one\nline two\n").unwrap();

        let arg = SendArg { slug: Some("lines.txt".into()), ..arg(file.path().to_owned()) };
        let transport = echo();
        let mut input = File::open(file.path()).unwrap();
        let reply = arg.upload(transport.clone(), &mut input, None).unwrap();

        assert_eq!(reply, b"line one\nline two\n");
        let request = &transport.requests()[0];
        assert_eq!(request.header("Slug"), Some("lines.txt"));
        assert_eq!(request.header("Content-Type"), Some("text/plain"));
    }

    #[test]
    fn test_upload_with_metadata_is_multipart() {
        let dir = tempfile::tempdir().unwrap();
        let metadata = dir.path().join("meta.json");
        fs::write(&metadata, r#"{"title":"report"}"#).unwrap();

        let arg = SendArg { metadata: Some(metadata), etag: Some("\"e1\"".into()), ..arg(PathBuf::from("-")) };
        let transport = echo();
        let reply = arg.upload(transport.clone(), &mut &b"DATA"[..], None).unwrap();

        let body = String::from_utf8(reply).unwrap();
        assert!(body.contains(r#"{"title":"report"}"#));
        assert!(body.contains("\n\nDATA\n--"));
        assert_eq!(transport.requests()[0].header("If-Match"), Some("\"e1\""));
    }

    #[test]
    fn test_resumable_needs_length() {
        let arg = SendArg { resumable: true, ..arg(PathBuf::from("-")) };
        let error = arg.upload(echo(), &mut &b"abc"[..], None).unwrap_err();
        assert!(error.to_string().contains("--resumable"));
    }

    #[test]
    fn test_resumable_upload_declares_length() {
        let transport = Arc::new(MockTransport::new(|request| match request.method {
            Method::Put => MockResponse::new(200).with_body("stored"),
            _ => MockResponse::new(200).with_header("Location", "mock://session"),
        }));
        let arg = SendArg { resumable: true, ..arg(PathBuf::from("data.bin")) };

        let reply = arg.upload(transport.clone(), &mut &b"abcdef"[..], Some(6)).unwrap();
        assert_eq!(reply, b"stored");

        let requests = transport.requests();
        assert_eq!(requests[0].header("X-Upload-Content-Length"), Some("6"));
        assert_eq!(requests[1].url, "mock://session");
        assert_eq!(requests[1].header("Content-Range"), Some("bytes 0-5/6"));
    }

    #[test]
    fn test_rejected_upload_fails() {
        let transport = Arc::new(MockTransport::new(|_| MockResponse::new(401).with_body("login required")));
        let error = arg(PathBuf::from("-")).upload(transport, &mut &b"x"[..], None).unwrap_err();
        assert!(format!("{error:#}").contains("login required"));
    }
}
