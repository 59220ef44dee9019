use crate::services::gateway_service::PrefixStripping;
use anyhow::{Result, anyhow};
use clap::{Parser, Subcommand};
use std::{env, fmt, path::PathBuf, str::FromStr};

const DEFAULT_STORAGE_DIR: &str = "./data/objects";
const DEFAULT_DATABASE_URL: &str = "sqlite://./data/meta/catalog.db";
const DEFAULT_PAGE_SIZE: usize = 1000;

/// Which object store the gateway talks to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Backend {
    /// S3 or an S3-compatible service, through the AWS SDK.
    #[default]
    S3,
    /// Local disk plus a SQLite catalogue.
    Local,
}

impl FromStr for Backend {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "s3" => Ok(Backend::S3),
            "local" => Ok(Backend::Local),
            other => Err(format!(
                "unknown backend `{other}` (expected `s3` or `local`)"
            )),
        }
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Backend::S3 => f.write_str("s3"),
            Backend::Local => f.write_str("local"),
        }
    }
}

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    pub backend: Backend,
    pub region: Option<String>,
    pub endpoint: Option<String>,
    pub profile: Option<String>,
    pub storage_dir: String,
    pub database_url: String,
    pub page_size: usize,
    pub prefix_stripping: PrefixStripping,
}

/// Command-line + environment configuration.
#[derive(Parser, Debug)]
#[command(author, version, about = "Upload, download and list objects in an object store")]
pub struct Args {
    /// Backend to use: `s3` or `local` (overrides OBJECT_GATEWAY_BACKEND)
    #[arg(long, global = true)]
    pub backend: Option<Backend>,

    /// Region (overrides OBJECT_GATEWAY_REGION)
    #[arg(long, global = true)]
    pub region: Option<String>,

    /// Custom S3 endpoint URL (overrides OBJECT_GATEWAY_ENDPOINT)
    #[arg(long, global = true)]
    pub endpoint: Option<String>,

    /// Shared-config profile name (overrides OBJECT_GATEWAY_PROFILE)
    #[arg(long, global = true)]
    pub profile: Option<String>,

    /// Payload directory of the local backend (overrides OBJECT_GATEWAY_STORAGE_DIR)
    #[arg(long, global = true)]
    pub storage_dir: Option<String>,

    /// Catalogue database of the local backend (overrides OBJECT_GATEWAY_DATABASE_URL)
    #[arg(long, global = true)]
    pub database_url: Option<String>,

    /// Keys per listing page (overrides OBJECT_GATEWAY_PAGE_SIZE)
    #[arg(long, global = true)]
    pub page_size: Option<usize>,

    /// `substring` or `leading` (overrides OBJECT_GATEWAY_PREFIX_STRIPPING)
    #[arg(long, global = true)]
    pub prefix_stripping: Option<PrefixStripping>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Upload a local file; the key defaults to the path as given
    Upload {
        local_path: PathBuf,
        bucket: String,
        #[arg(long)]
        key: Option<String>,
    },
    /// Download an object into a local file
    Download {
        local_path: PathBuf,
        bucket: String,
        key: String,
    },
    /// List objects with their metadata as JSON
    List {
        bucket: String,
        #[arg(long)]
        prefix: Option<String>,
    },
    /// Create a bucket (local backend only)
    MakeBucket { bucket: String },
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig and the command to run.
    pub fn from_env_and_args() -> Result<(Self, Command)> {
        // Parse CLI once
        let args = Args::parse();
        let cfg = Self::resolve(&args, |name| env::var(name))?;
        Ok((cfg, args.command))
    }

    /// Merge `args` over the variables returned by `lookup`, then over defaults.
    pub fn resolve<F>(args: &Args, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Result<String, env::VarError>,
    {
        // --- Environment fallback ---
        let env_backend = env_parse(&lookup, "OBJECT_GATEWAY_BACKEND", Backend::default())?;
        let env_region = env_opt(&lookup, "OBJECT_GATEWAY_REGION")?;
        let env_endpoint = env_opt(&lookup, "OBJECT_GATEWAY_ENDPOINT")?;
        let env_profile = env_opt(&lookup, "OBJECT_GATEWAY_PROFILE")?;
        let env_storage = env_opt(&lookup, "OBJECT_GATEWAY_STORAGE_DIR")?
            .unwrap_or_else(|| DEFAULT_STORAGE_DIR.into());
        let env_db = env_opt(&lookup, "OBJECT_GATEWAY_DATABASE_URL")?
            .unwrap_or_else(|| DEFAULT_DATABASE_URL.into());
        let env_page_size = env_parse(&lookup, "OBJECT_GATEWAY_PAGE_SIZE", DEFAULT_PAGE_SIZE)?;
        let env_stripping = env_parse(
            &lookup,
            "OBJECT_GATEWAY_PREFIX_STRIPPING",
            PrefixStripping::default(),
        )?;

        // --- Merge ---
        let cfg = Self {
            backend: args.backend.unwrap_or(env_backend),
            region: args.region.clone().or(env_region),
            endpoint: args.endpoint.clone().or(env_endpoint),
            profile: args.profile.clone().or(env_profile),
            storage_dir: args.storage_dir.clone().unwrap_or(env_storage),
            database_url: args.database_url.clone().unwrap_or(env_db),
            page_size: args.page_size.unwrap_or(env_page_size),
            prefix_stripping: args.prefix_stripping.unwrap_or(env_stripping),
        };

        if cfg.page_size == 0 {
            return Err(anyhow!("page size must be at least 1"));
        }
        Ok(cfg)
    }
}

fn env_opt<F>(lookup: &F, name: &str) -> Result<Option<String>>
where
    F: Fn(&str) -> Result<String, env::VarError>,
{
    match lookup(name) {
        Ok(value) => Ok(Some(value)),
        Err(env::VarError::NotPresent) => Ok(None),
        Err(err) => Err(anyhow!("reading {}: {}", name, err)),
    }
}

fn env_parse<F, T>(lookup: &F, name: &str, default: T) -> Result<T>
where
    F: Fn(&str) -> Result<String, env::VarError>,
    T: FromStr,
    T::Err: fmt::Display,
{
    match env_opt(lookup, name)? {
        Some(value) => value
            .parse::<T>()
            .map_err(|err| anyhow!("parsing {} value `{}`: {}", name, value, err)),
        None => Ok(default),
    }
}
