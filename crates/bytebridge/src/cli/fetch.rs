use std::fs::File;
use std::io::{self, BufWriter, Seek, SeekFrom, Write};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use bytebridge_transfer::{FetchOptions, FetchStream, HttpTransport};
use clap::Args;
use tracing::info;

use super::parse_header;

#[derive(Clone, Debug, Args)]
pub struct FetchArg {
    /// URL to download
    pub url: String,

    /// Start the download at this byte offset
    #[arg(long, default_value_t = 0)]
    pub offset: u64,

    /// Write to this file instead of stdout
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Extra request header in `Name: value` form
    #[arg(short = 'H', long = "header", value_parser = parse_header)]
    pub headers: Vec<(String, String)>,
}

impl FetchArg {
    pub fn run(self, transport: Arc<dyn HttpTransport>) -> anyhow::Result<()> {
        match &self.output {
            Some(path) => {
                let file = File::create(path).with_context(|| format!("failed to create {}", path.display()))?;
                let mut out = BufWriter::new(file);
                self.download(transport, &mut out)?;
                out.flush().with_context(|| format!("failed to write {}", path.display()))?;
            }
            None => {
                let mut out = io::stdout().lock();
                self.download(transport, &mut out)?;
                out.flush()?;
            }
        }
        Ok(())
    }

    /// Copy the resource into `out`, returning the bytes copied.
    pub fn download<W: Write>(&self, transport: Arc<dyn HttpTransport>, out: &mut W) -> anyhow::Result<u64> {
        let options = FetchOptions::default().headers(self.headers.clone());
        let mut stream = FetchStream::new(transport, &self.url, options);
        if self.offset > 0 {
            stream.seek(SeekFrom::Start(self.offset))?;
        }

        let copied = io::copy(&mut stream, out).with_context(|| format!("failed to download {}", self.url))?;
        stream.close();

        info!(
            url = %self.url,
            bytes = copied,
            content_type = ?stream.content_type(),
            content_length = ?stream.content_length(),
            "download complete"
        );
        Ok(copied)
    }
}
