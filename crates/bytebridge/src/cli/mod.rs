use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, bail};
use bytebridge_transfer::{ClientSettings, HttpTransport, ReqwestTransport};
use clap::{Args, Parser, Subcommand};

pub mod fetch;
pub mod send;

#[derive(Clone, Debug, Parser)]
#[command(name = "bytebridge", version = env!("CARGO_PKG_VERSION"), about, long_about = None, propagate_version = true)]
pub struct App {
    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(flatten)]
    pub client: ClientArgs,

    #[command(subcommand)]
    pub cmd: Commands,
}

#[derive(Clone, Debug, Subcommand)]
pub enum Commands {
    #[command(alias = "get", name = "fetch", about = "Download a URL to a file or stdout")]
    Fetch(fetch::FetchArg),
    #[command(alias = "put", name = "send", about = "Upload a file or stdin to a URL")]
    Send(send::SendArg),
}

#[derive(Clone, Debug, Args)]
pub struct ClientArgs {
    /// Proxy URL; https:// proxies carry HTTPS traffic, others HTTP
    #[arg(long = "proxy", global = true)]
    pub proxies: Vec<String>,

    #[arg(long, global = true)]
    pub user_agent: Option<String>,

    /// Connection timeout in seconds
    #[arg(long, global = true)]
    pub connect_timeout: Option<u64>,
}

impl ClientArgs {
    pub fn settings(&self) -> anyhow::Result<ClientSettings> {
        let mut settings = ClientSettings::default();
        if !self.proxies.is_empty() {
            let proxies = self
                .proxies
                .iter()
                .map(|p| p.parse().with_context(|| format!("invalid proxy URL `{p}`")))
                .collect::<anyhow::Result<Vec<_>>>()?;
            settings = settings.proxies(proxies);
        }
        if let Some(user_agent) = &self.user_agent {
            settings = settings.user_agent(user_agent.as_str());
        }
        if let Some(secs) = self.connect_timeout {
            settings = settings.connect_timeout(Duration::from_secs(secs));
        }
        Ok(settings)
    }
}

impl App {
    pub fn run(self) -> anyhow::Result<()> {
        let settings = self.client.settings()?;
        let transport: Arc<dyn HttpTransport> =
            Arc::new(ReqwestTransport::with_settings(&settings).context("failed to set up HTTP client")?);

        match self.cmd {
            Commands::Fetch(arg) => arg.run(transport),
            Commands::Send(arg) => arg.run(transport),
        }
    }
}

/// Parse a `Name: value` header argument.
pub fn parse_header(raw: &str) -> anyhow::Result<(String, String)> {
    let Some((name, value)) = raw.split_once(':') else {
        bail!("header `{raw}` is not in `Name: value` form");
    };
    let name = name.trim();
    if name.is_empty() {
        bail!("header `{raw}` has an empty name");
    }
    Ok((name.to_owned(), value.trim().to_owned()))
}
