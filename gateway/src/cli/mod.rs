use std::io::Read;
use std::path::PathBuf;
use std::sync::OnceLock;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use crate::api;
use crate::api::config::{GitHubAppSecrets, GitHubAppSettings};
use crate::config::AppConfig;
use crate::github::sign_payload;
use crate::utils;

#[derive(Parser)]
#[clap(name = "ghapp-gateway")]
#[clap(version = version_string())]
#[clap(subcommand_required = true, arg_required_else_help = true)]
pub struct App {
    #[clap(subcommand)]
    cmd: Cmd,
}

impl App {
    pub fn run(self) -> Result<()> {
        self.cmd.run()
    }
}

#[derive(Subcommand)]
enum Cmd {
    /// Start service.
    Run(CmdRun),

    /// Print the URLs to register in the GitHub App settings.
    Urls(CmdUrls),

    /// Print the `X-Hub-Signature-256` value for a payload.
    Sign(CmdSign),
}

impl Cmd {
    fn run(self) -> Result<()> {
        match self {
            Cmd::Run(cmd) => cmd.run(),
            Cmd::Urls(cmd) => cmd.run(),
            Cmd::Sign(cmd) => cmd.run(),
        }
    }
}

#[derive(Parser)]
struct CmdRun {
    /// Path to the service config.
    #[clap(short, long)]
    config: Option<PathBuf>,

    /// Path to the logger targets config.
    #[clap(short, long)]
    logger_config: Option<PathBuf>,
}

impl CmdRun {
    fn run(self) -> Result<()> {
        let config: AppConfig = match self.config.as_ref() {
            Some(path) => {
                utils::serde::load_json_from_file(path).context("failed to load service config")?
            }
            None => AppConfig::default(),
        };

        tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()?
            .block_on(utils::signal::run_or_terminate(self.run_impl(config)))
    }

    async fn run_impl(self, config: AppConfig) -> Result<()> {
        utils::logger::init_logger(&config.logger, self.logger_config)?;
        utils::logger::set_abort_with_tracing();

        api::http_service(config).await?;

        std::future::pending::<()>().await;

        Ok(())
    }
}

#[derive(Parser)]
struct CmdUrls {}

impl CmdUrls {
    fn run(self) -> Result<()> {
        let settings = GitHubAppSettings::from_env()?;
        println!("Setup URL (callback): {}", settings.callback_url());
        println!("Webhook URL:          {}", settings.webhook_url());
        Ok(())
    }
}

#[derive(Parser)]
struct CmdSign {
    /// Payload file. Reads stdin when omitted.
    path: Option<PathBuf>,
}

impl CmdSign {
    fn run(self) -> Result<()> {
        let secrets = GitHubAppSecrets::from_env()?;

        let payload = match &self.path {
            Some(path) => std::fs::read(path)
                .with_context(|| format!("failed to read {}", path.display()))?,
            None => {
                let mut buf = Vec::new();
                std::io::stdin()
                    .read_to_end(&mut buf)
                    .context("failed to read stdin")?;
                buf
            }
        };

        println!("{}", sign_payload(secrets.webhook_secret.as_bytes(), &payload));
        Ok(())
    }
}

fn version_string() -> &'static str {
    static STRING: OnceLock<String> = OnceLock::new();
    STRING.get_or_init(|| format!("(release {GATEWAY_VERSION}) (rustc {RUSTC_VERSION})"))
}

static GATEWAY_VERSION: &str = env!("GHAPP_GATEWAY_VERSION");
static RUSTC_VERSION: &str = env!("GHAPP_GATEWAY_RUSTC_VERSION");
