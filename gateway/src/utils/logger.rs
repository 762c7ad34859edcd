use std::collections::BTreeMap;
use std::io::IsTerminal;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::Once;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::Subscriber;
use tracing_appender::rolling::Rotation;
use tracing_subscriber::filter::Directive;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::{EnvFilter, Layer, fmt};

use crate::utils;

type BoxedLayer<S> = Box<dyn Layer<S> + Send + Sync + 'static>;

/// Per-target log levels, e.g. `{"ghapp_gateway": "debug", "redis": "warn"}`.
pub struct LoggerTargets {
    directives: Vec<Directive>,
}

impl LoggerTargets {
    pub fn load_from<P: AsRef<Path>>(path: P) -> Result<Self> {
        let targets: BTreeMap<String, String> = utils::serde::load_json_from_file(path)?;
        Self::from_map(targets)
    }

    fn from_map(targets: BTreeMap<String, String>) -> Result<Self> {
        let directives = targets
            .into_iter()
            .map(|(target, level)| {
                format!("{target}={level}")
                    .parse::<Directive>()
                    .with_context(|| format!("invalid log directive for target '{target}'"))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { directives })
    }

    pub fn build_filter(&self) -> EnvFilter {
        self.directives
            .iter()
            .fold(EnvFilter::default(), |filter, directive| {
                filter.add_directive(directive.clone())
            })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggerConfig {
    pub outputs: Vec<LoggerOutput>,
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            outputs: vec![LoggerOutput::Stderr(LoggerStderrOutput::default())],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    /// Human-readable on a terminal or under systemd, plain text otherwise.
    #[default]
    Auto,
    Human,
    Json,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum LoggerOutput {
    Stderr(LoggerStderrOutput),
    File(LoggerFileOutput),
}

impl LoggerOutput {
    fn as_layer<S>(&self) -> Result<BoxedLayer<S>>
    where
        S: Subscriber + for<'a> LookupSpan<'a>,
    {
        match self {
            Self::Stderr(stderr) => Ok(stderr.as_layer()),
            Self::File(file) => file.as_layer(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default)]
pub struct LoggerStderrOutput {
    #[serde(default)]
    pub format: LogFormat,
}

impl LoggerStderrOutput {
    fn as_layer<S>(&self) -> BoxedLayer<S>
    where
        S: Subscriber + for<'a> LookupSpan<'a>,
    {
        match self.format {
            LogFormat::Json => tracing_stackdriver::layer()
                .with_writer(std::io::stderr)
                .boxed(),
            LogFormat::Human | LogFormat::Auto => {
                let layer = fmt::layer().with_writer(std::io::stderr);
                if is_systemd_child() {
                    layer.without_time().with_ansi(false).boxed()
                } else if !std::io::stderr().is_terminal() {
                    layer.with_ansi(false).boxed()
                } else {
                    layer.boxed()
                }
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum LogRotation {
    #[default]
    Hourly,
    Daily,
    Never,
}

impl From<LogRotation> for Rotation {
    fn from(value: LogRotation) -> Self {
        match value {
            LogRotation::Hourly => Rotation::HOURLY,
            LogRotation::Daily => Rotation::DAILY,
            LogRotation::Never => Rotation::NEVER,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggerFileOutput {
    pub dir: PathBuf,
    /// Files default to JSON lines; `human` switches to plain text.
    #[serde(default)]
    pub format: Option<LogFormat>,
    #[serde(default)]
    pub rotation: LogRotation,
    #[serde(default = "log_file_prefix")]
    pub file_prefix: String,
    #[serde(default = "max_log_files")]
    pub max_files: NonZeroUsize,
}

impl LoggerFileOutput {
    fn as_layer<S>(&self) -> Result<BoxedLayer<S>>
    where
        S: Subscriber + for<'a> LookupSpan<'a>,
    {
        let writer = tracing_appender::rolling::Builder::new()
            .rotation(self.rotation.into())
            .filename_prefix(&self.file_prefix)
            .max_log_files(self.max_files.get())
            .build(&self.dir)
            .with_context(|| format!("failed to open log dir {}", self.dir.display()))?;

        Ok(match self.format.unwrap_or(LogFormat::Json) {
            LogFormat::Human => fmt::layer()
                .without_time()
                .with_ansi(false)
                .with_writer(writer)
                .boxed(),
            LogFormat::Json | LogFormat::Auto => {
                tracing_stackdriver::layer().with_writer(writer).boxed()
            }
        })
    }
}

fn log_file_prefix() -> String {
    "ghapp-gateway.log".to_owned()
}

fn max_log_files() -> NonZeroUsize {
    NonZeroUsize::new(25).unwrap_or(NonZeroUsize::MIN)
}

pub fn is_systemd_child() -> bool {
    #[cfg(target_os = "linux")]
    {
        // SAFETY: getppid has no preconditions.
        let ppid = unsafe { libc::getppid() };
        ppid == 1 || std::env::var_os("SYSTEMD_EXEC_PID").is_some()
    }

    #[cfg(not(target_os = "linux"))]
    {
        false
    }
}

/// Installs the global subscriber. Fails on every call after the first.
///
/// With `logger_targets`, the filter is read from that file instead of
/// `RUST_LOG`, and a watcher thread reloads it whenever the file changes.
pub fn init_logger(config: &LoggerConfig, logger_targets: Option<PathBuf>) -> Result<()> {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::reload;

    let make_filter = {
        let logger_targets = logger_targets.clone();
        move || -> Result<EnvFilter> {
            Ok(match &logger_targets {
                None => EnvFilter::builder()
                    .with_default_directive(tracing::Level::INFO.into())
                    .from_env_lossy(),
                Some(path) => LoggerTargets::load_from(path)
                    .context("failed to load logger targets")?
                    .build_filter(),
            })
        }
    };

    static ONCE: Once = Once::new();

    let mut result = None;
    ONCE.call_once(|| {
        result = Some((|| -> Result<_> {
            let (filter, handle) = reload::Layer::new(make_filter()?);
            let outputs = config
                .outputs
                .iter()
                .map(LoggerOutput::as_layer)
                .collect::<Result<Vec<_>>>()?;

            let subscriber = tracing_subscriber::registry().with(filter).with(outputs);
            tracing::subscriber::set_global_default(subscriber)?;
            Ok(handle)
        })());
    });

    let handle = match result {
        Some(res) => res?,
        None => anyhow::bail!("logger was already initialized"),
    };

    let Some(path) = logger_targets else {
        return Ok(());
    };

    const POLL_INTERVAL: Duration = Duration::from_secs(10);

    // A plain thread keeps the watcher independent of the runtime lifecycle.
    std::thread::Builder::new()
        .name("watch_logger_targets".to_owned())
        .spawn(move || {
            tracing::info!(path = %path.display(), "watching logger targets");

            let modified_at = || std::fs::metadata(&path).and_then(|m| m.modified()).ok();
            let mut last_modified = modified_at();

            loop {
                std::thread::sleep(POLL_INTERVAL);

                let modified = modified_at();
                if modified == last_modified {
                    continue;
                }
                last_modified = modified;

                match make_filter() {
                    Ok(filter) => {
                        if handle.reload(filter).is_err() {
                            break;
                        }
                        tracing::info!("reloaded logger targets");
                    }
                    Err(e) => tracing::error!("failed to reload logger targets: {e:#}"),
                }
            }

            tracing::info!("stopped watching logger targets");
        })?;

    Ok(())
}

pub fn set_abort_with_tracing() {
    std::panic::set_hook(Box::new(|info| {
        use std::io::Write;

        let backtrace = std::backtrace::Backtrace::force_capture();
        tracing::error!("panic: {info}\n{backtrace}");

        std::io::stderr().flush().ok();
        std::io::stdout().flush().ok();

        #[allow(clippy::exit)]
        std::process::exit(1);
    }));
}
