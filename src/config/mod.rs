//! Configuration layer: typed settings with layered precedence (file → env → CLI).

use std::{
    net::SocketAddr,
    num::NonZeroU32,
    path::PathBuf,
    str::FromStr,
    time::Duration,
};

use clap::{Args, Parser, Subcommand, ValueHint, builder::BoolishValueParser};
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;
use url::Url;

use crate::application::listing::DEFAULT_LISTING_PAGE_SIZE;
use crate::application::paths::FallbackPolicy;
use crate::application::repos::DEFAULT_MAX_PAGE_SIZE;
use crate::application::revalidate::DEFAULT_REVALIDATE_WINDOW;

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "spacetraveling";
const ENV_PREFIX: &str = "SPACETRAVELING";
const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 3000;
const DEFAULT_GRACEFUL_SHUTDOWN_SECS: u64 = 30;
const DEFAULT_DOCUMENT_TYPE: &str = "posts";
const DEFAULT_REPOSITORY_TIMEOUT_SECS: u64 = 10;
const DEFAULT_OUTPUT_DIR: &str = "dist";
const DEFAULT_MAX_LOADS: usize = 20;

/// Command-line arguments for the spacetraveling binary.
#[derive(Debug, Parser)]
#[command(
    name = "spacetraveling",
    version,
    about = "Blog front end for a headless content repository"
)]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(long = "config-file", env = "SPACETRAVELING_CONFIG_FILE", value_name = "PATH")]
    pub config_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Serve the blog over HTTP with on-the-fly revalidation.
    Serve(Box<ServeArgs>),
    /// Generate every page into an output directory.
    Build(BuildArgs),
    /// Page through a running site's listing from the terminal.
    Browse(BrowseArgs),
}

#[derive(Debug, Args, Default, Clone)]
pub struct RepositoryOverrides {
    /// Override the content repository API endpoint.
    #[arg(long = "repository-endpoint", value_name = "URL", value_hint = ValueHint::Url)]
    pub repository_endpoint: Option<String>,

    /// Override the content repository access token.
    #[arg(long = "repository-access-token", value_name = "TOKEN")]
    pub repository_access_token: Option<String>,

    /// Override the number of posts per listing page.
    #[arg(long = "listing-page-size", value_name = "COUNT")]
    pub listing_page_size: Option<u32>,
}

#[derive(Debug, Args, Default, Clone)]
pub struct LoggingOverrides {
    /// Override the base log level (trace|debug|info|warn|error).
    #[arg(long = "log-level", value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Toggle JSON logging.
    #[arg(
        long = "log-json",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub log_json: Option<bool>,
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeArgs {
    #[command(flatten)]
    pub overrides: ServeOverrides,
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeOverrides {
    #[command(flatten)]
    pub repository: RepositoryOverrides,

    #[command(flatten)]
    pub logging: LoggingOverrides,

    /// Override the listener host.
    #[arg(long = "server-host", value_name = "HOST")]
    pub server_host: Option<String>,

    /// Override the listener port.
    #[arg(long = "server-port", value_name = "PORT")]
    pub server_port: Option<u16>,

    /// Override the graceful shutdown timeout.
    #[arg(long = "server-graceful-shutdown-seconds", value_name = "SECONDS")]
    pub server_graceful_shutdown_seconds: Option<u64>,

    /// Override the page staleness window.
    #[arg(long = "revalidate-seconds", value_name = "SECONDS")]
    pub revalidate_seconds: Option<u64>,

    /// Override the policy for posts outside the planned set.
    #[arg(long = "fallback", value_name = "POLICY")]
    pub fallback: Option<String>,
}

#[derive(Debug, Args, Default, Clone)]
pub struct BuildArgs {
    #[command(flatten)]
    pub repository: RepositoryOverrides,

    #[command(flatten)]
    pub logging: LoggingOverrides,

    /// Directory the site is written to.
    #[arg(long = "output", value_name = "DIR", value_hint = ValueHint::DirPath)]
    pub output: Option<PathBuf>,

    /// Override the policy recorded in the build manifest.
    #[arg(long = "fallback", value_name = "POLICY")]
    pub fallback: Option<String>,
}

#[derive(Debug, Args, Clone)]
pub struct BrowseArgs {
    #[command(flatten)]
    pub logging: LoggingOverrides,

    /// Base URL of a running site.
    #[arg(long = "site", value_name = "URL", value_hint = ValueHint::Url)]
    pub site: String,

    /// Stop after this many "load more" requests.
    #[arg(long = "max-loads", value_name = "COUNT", default_value_t = DEFAULT_MAX_LOADS)]
    pub max_loads: usize,
}

/// Fully-resolved settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    pub logging: LoggingSettings,
    pub repository: RepositorySettings,
    pub revalidation: RevalidationSettings,
    pub build: BuildSettings,
}

#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub addr: SocketAddr,
    pub graceful_shutdown: Duration,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy)]
pub enum LogFormat {
    Json,
    Compact,
}

#[derive(Debug, Clone)]
pub struct RepositorySettings {
    /// Required by `serve` and `build`; see [`RepositorySettings::require_endpoint`].
    pub endpoint: Option<Url>,
    pub access_token: Option<String>,
    pub document_type: String,
    pub listing_page_size: NonZeroU32,
    pub max_page_size: NonZeroU32,
    pub timeout: Duration,
}

impl RepositorySettings {
    pub fn require_endpoint(&self) -> Result<&Url, LoadError> {
        self.endpoint.as_ref().ok_or_else(|| {
            LoadError::invalid(
                "repository.endpoint",
                format!(
                    "a repository endpoint is required (set {ENV_PREFIX}__REPOSITORY__ENDPOINT \
                     or pass --repository-endpoint)"
                ),
            )
        })
    }
}

#[derive(Debug, Clone)]
pub struct RevalidationSettings {
    pub window: Duration,
}

#[derive(Debug, Clone)]
pub struct BuildSettings {
    pub output_dir: PathBuf,
    pub fallback: FallbackPolicy,
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),
    #[error("invalid configuration for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl LoadError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

/// Load settings using the configured precedence (file → environment → CLI).
pub fn load(cli: &CliArgs) -> Result<Settings, LoadError> {
    let mut builder = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = cli.config_file.as_ref() {
        builder = builder.add_source(File::from(path.as_path()).required(true));
    }

    builder = builder.add_source(Environment::with_prefix(ENV_PREFIX).separator("__"));

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;

    match cli.command.as_ref() {
        Some(Command::Serve(args)) => raw.apply_serve_overrides(&args.overrides),
        Some(Command::Build(args)) => raw.apply_build_overrides(args),
        Some(Command::Browse(args)) => raw.apply_logging_overrides(&args.logging),
        None => raw.apply_serve_overrides(&ServeOverrides::default()),
    }

    Settings::from_raw(raw)
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    server: RawServerSettings,
    logging: RawLoggingSettings,
    repository: RawRepositorySettings,
    revalidation: RawRevalidationSettings,
    build: RawBuildSettings,
}

impl RawSettings {
    fn apply_serve_overrides(&mut self, overrides: &ServeOverrides) {
        if let Some(host) = overrides.server_host.as_ref() {
            self.server.host = Some(host.clone());
        }
        if let Some(port) = overrides.server_port {
            self.server.port = Some(port);
        }
        if let Some(seconds) = overrides.server_graceful_shutdown_seconds {
            self.server.graceful_shutdown_seconds = Some(seconds);
        }
        if let Some(seconds) = overrides.revalidate_seconds {
            self.revalidation.window_seconds = Some(seconds);
        }
        if let Some(fallback) = overrides.fallback.as_ref() {
            self.build.fallback = Some(fallback.clone());
        }

        self.apply_repository_overrides(&overrides.repository);
        self.apply_logging_overrides(&overrides.logging);
    }

    fn apply_build_overrides(&mut self, args: &BuildArgs) {
        if let Some(output) = args.output.as_ref() {
            self.build.output_dir = Some(output.clone());
        }
        if let Some(fallback) = args.fallback.as_ref() {
            self.build.fallback = Some(fallback.clone());
        }

        self.apply_repository_overrides(&args.repository);
        self.apply_logging_overrides(&args.logging);
    }

    fn apply_repository_overrides(&mut self, overrides: &RepositoryOverrides) {
        if let Some(endpoint) = overrides.repository_endpoint.as_ref() {
            self.repository.endpoint = Some(endpoint.clone());
        }
        if let Some(token) = overrides.repository_access_token.as_ref() {
            self.repository.access_token = Some(token.clone());
        }
        if let Some(size) = overrides.listing_page_size {
            self.repository.listing_page_size = Some(size);
        }
    }

    fn apply_logging_overrides(&mut self, overrides: &LoggingOverrides) {
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            server,
            logging,
            repository,
            revalidation,
            build,
        } = raw;

        Ok(Self {
            server: build_server_settings(server)?,
            logging: build_logging_settings(logging)?,
            repository: build_repository_settings(repository)?,
            revalidation: build_revalidation_settings(revalidation)?,
            build: build_build_settings(build)?,
        })
    }
}

fn build_server_settings(server: RawServerSettings) -> Result<ServerSettings, LoadError> {
    let host = server.host.unwrap_or_else(|| DEFAULT_HOST.to_string());

    let port = server.port.unwrap_or(DEFAULT_PORT);
    if port == 0 {
        return Err(LoadError::invalid(
            "server.port",
            "port must be greater than zero",
        ));
    }

    let addr = parse_socket_addr(&host, port)
        .map_err(|reason| LoadError::invalid("server.addr", reason))?;

    let graceful_secs = server
        .graceful_shutdown_seconds
        .unwrap_or(DEFAULT_GRACEFUL_SHUTDOWN_SECS);
    if graceful_secs == 0 {
        return Err(LoadError::invalid(
            "server.graceful_shutdown_seconds",
            "must be greater than zero",
        ));
    }

    Ok(ServerSettings {
        addr,
        graceful_shutdown: Duration::from_secs(graceful_secs),
    })
}

fn build_logging_settings(logging: RawLoggingSettings) -> Result<LoggingSettings, LoadError> {
    let level = match logging.level {
        Some(level) => LevelFilter::from_str(level.as_str()).map_err(|err| {
            LoadError::invalid("logging.level", format!("failed to parse: {err}"))
        })?,
        None => LevelFilter::INFO,
    };

    let format = if logging.json.unwrap_or(false) {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };

    Ok(LoggingSettings { level, format })
}

fn build_repository_settings(
    repository: RawRepositorySettings,
) -> Result<RepositorySettings, LoadError> {
    let endpoint = match non_blank(repository.endpoint) {
        Some(value) => {
            let url = Url::parse(&value).map_err(|err| {
                LoadError::invalid("repository.endpoint", format!("invalid URL: {err}"))
            })?;
            if !matches!(url.scheme(), "http" | "https") || url.cannot_be_a_base() {
                return Err(LoadError::invalid(
                    "repository.endpoint",
                    "endpoint must be an http(s) URL",
                ));
            }
            Some(url)
        }
        None => None,
    };

    let document_type = non_blank(repository.document_type)
        .unwrap_or_else(|| DEFAULT_DOCUMENT_TYPE.to_string());

    let max_page_size = non_zero_u32(
        repository
            .max_page_size
            .unwrap_or(DEFAULT_MAX_PAGE_SIZE)
            .into(),
        "repository.max_page_size",
    )?;
    if max_page_size.get() > DEFAULT_MAX_PAGE_SIZE {
        return Err(LoadError::invalid(
            "repository.max_page_size",
            format!("must not exceed {DEFAULT_MAX_PAGE_SIZE}"),
        ));
    }

    let listing_page_size = non_zero_u32(
        repository
            .listing_page_size
            .unwrap_or(DEFAULT_LISTING_PAGE_SIZE)
            .into(),
        "repository.listing_page_size",
    )?;
    if listing_page_size > max_page_size {
        return Err(LoadError::invalid(
            "repository.listing_page_size",
            format!("must not exceed repository.max_page_size ({max_page_size})"),
        ));
    }

    let timeout_secs = repository
        .timeout_seconds
        .unwrap_or(DEFAULT_REPOSITORY_TIMEOUT_SECS);
    if timeout_secs == 0 {
        return Err(LoadError::invalid(
            "repository.timeout_seconds",
            "must be greater than zero",
        ));
    }

    Ok(RepositorySettings {
        endpoint,
        access_token: non_blank(repository.access_token),
        document_type,
        listing_page_size,
        max_page_size,
        timeout: Duration::from_secs(timeout_secs),
    })
}

fn build_revalidation_settings(
    revalidation: RawRevalidationSettings,
) -> Result<RevalidationSettings, LoadError> {
    let window_secs = revalidation
        .window_seconds
        .unwrap_or(DEFAULT_REVALIDATE_WINDOW.as_secs());
    if window_secs == 0 {
        return Err(LoadError::invalid(
            "revalidation.window_seconds",
            "must be greater than zero",
        ));
    }

    Ok(RevalidationSettings {
        window: Duration::from_secs(window_secs),
    })
}

fn build_build_settings(build: RawBuildSettings) -> Result<BuildSettings, LoadError> {
    let output_dir = build
        .output_dir
        .unwrap_or_else(|| PathBuf::from(DEFAULT_OUTPUT_DIR));
    if output_dir.as_os_str().is_empty() {
        return Err(LoadError::invalid(
            "build.output_dir",
            "path must not be empty",
        ));
    }

    let fallback = match non_blank(build.fallback) {
        Some(value) => value
            .parse::<FallbackPolicy>()
            .map_err(|err| LoadError::invalid("build.fallback", err.to_string()))?,
        None => FallbackPolicy::default(),
    };

    Ok(BuildSettings {
        output_dir,
        fallback,
    })
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawServerSettings {
    host: Option<String>,
    port: Option<u16>,
    graceful_shutdown_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawRepositorySettings {
    endpoint: Option<String>,
    access_token: Option<String>,
    document_type: Option<String>,
    listing_page_size: Option<u32>,
    max_page_size: Option<u32>,
    timeout_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawRevalidationSettings {
    window_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawBuildSettings {
    output_dir: Option<PathBuf>,
    fallback: Option<String>,
}

fn parse_socket_addr(host: &str, port: u16) -> Result<SocketAddr, String> {
    let candidate = format!("{host}:{port}");
    candidate
        .parse()
        .map_err(|err| format!("invalid address `{candidate}`: {err}"))
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.and_then(|value| {
        let trimmed = value.trim();
        (!trimmed.is_empty()).then(|| trimmed.to_string())
    })
}

fn non_zero_u32(value: u64, key: &'static str) -> Result<NonZeroU32, LoadError> {
    if value == 0 {
        return Err(LoadError::invalid(key, "must be greater than zero"));
    }
    let value_u32: u32 = value
        .try_into()
        .map_err(|_| LoadError::invalid(key, "value exceeds supported range for u32"))?;
    NonZeroU32::new(value_u32).ok_or_else(|| LoadError::invalid(key, "must be greater than zero"))
}

/// Resolve configuration using the supplied CLI arguments, returning both for downstream use.
pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}
