use anyhow::{Context, Result, bail};
use object_gateway::{
    LocalObjectStore, MetadataListing, ObjectStoreClient, ObjectStoreGateway, S3ObjectStore,
    clients::s3_client::S3Settings,
    config::{AppConfig, Backend, Command},
    errors::GatewayResult,
};
use std::{
    io::{self, Write},
    path::Path,
    process::ExitCode,
    sync::Arc,
};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<ExitCode> {
    // --- Logging setup (stderr, stdout carries command output) ---
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    // --- Parse config + command ---
    let (cfg, command) = AppConfig::from_env_and_args()?;
    tracing::debug!("Starting object-gateway with config: {:?}", cfg);

    match command {
        Command::Upload {
            local_path,
            bucket,
            key,
        } => {
            let gateway = build_gateway(&cfg).await?;
            Ok(report(gateway.upload(&local_path, &bucket, key.as_deref()).await))
        }
        Command::Download {
            local_path,
            bucket,
            key,
        } => {
            let gateway = build_gateway(&cfg).await?;
            Ok(report(gateway.download(&local_path, &bucket, &key).await))
        }
        Command::List { bucket, prefix } => {
            let gateway = build_gateway(&cfg).await?;
            let listing = gateway
                .try_list_with_metadata(&bucket, prefix.as_deref())
                .await;
            print_listing(listing, &mut io::stdout().lock())
        }
        Command::MakeBucket { bucket } => {
            if cfg.backend != Backend::Local {
                bail!("make-bucket is only supported by the local backend");
            }
            open_local_store(&cfg).await?.create_bucket(&bucket).await?;
            tracing::info!("Created bucket {}", bucket);
            Ok(ExitCode::SUCCESS)
        }
    }
}

/// Print the boolean outcome and map it to the process exit code.
fn report(ok: bool) -> ExitCode {
    println!("{}", ok);
    if ok {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

/// Print the records as JSON. A listing that could not be fetched prints
/// nothing and fails the process; skipped objects were already logged.
fn print_listing(
    listing: GatewayResult<MetadataListing>,
    out: &mut impl Write,
) -> Result<ExitCode> {
    match listing {
        Ok(listing) => {
            serde_json::to_writer_pretty(&mut *out, &listing.records)?;
            writeln!(out)?;
            Ok(ExitCode::SUCCESS)
        }
        Err(err) => {
            tracing::error!("{}", err);
            Ok(ExitCode::FAILURE)
        }
    }
}

fn s3_settings(cfg: &AppConfig) -> S3Settings {
    let mut settings = S3Settings::default().with_page_size(cfg.page_size.min(1000) as i32);
    if let Some(region) = &cfg.region {
        settings = settings.with_region(region);
    }
    if let Some(endpoint) = &cfg.endpoint {
        settings = settings.with_endpoint(endpoint);
    }
    if let Some(profile) = &cfg.profile {
        settings = settings.with_profile(profile);
    }
    settings
}

async fn build_gateway(cfg: &AppConfig) -> Result<ObjectStoreGateway> {
    let client: Arc<dyn ObjectStoreClient> = match cfg.backend {
        Backend::S3 => Arc::new(S3ObjectStore::from_settings(&s3_settings(cfg)).await),
        Backend::Local => Arc::new(open_local_store(cfg).await?),
    };
    Ok(ObjectStoreGateway::new(client).with_prefix_stripping(cfg.prefix_stripping))
}

/// Open the local store, creating the catalogue's parent directory if needed.
async fn open_local_store(cfg: &AppConfig) -> Result<LocalObjectStore> {
    let db_path = cfg
        .database_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("file:");
    if let Some(parent) = Path::new(db_path).parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            std::fs::create_dir_all(parent)?;
            tracing::info!("Created missing directory {:?}", parent);
        }
    }

    LocalObjectStore::open(&cfg.storage_dir, &cfg.database_url, cfg.page_size)
        .await
        .with_context(|| format!("opening local store at {}", cfg.storage_dir))
}
