mod config;

use std::{
    io::Write,
    net::SocketAddr,
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use config::RuntimeConfig;
use pastewords_http::{build_router, AppState};
use pastewords_storage::{SqliteTransferStore, TransferStore};
use pastewords_transfer::{spawn_stale_sweeper, Broker, SenderSession, Upload, WordPool};
use tempfile::NamedTempFile;
use tracing::{info, warn};

#[derive(Debug, Parser)]
#[command(author, version, about = "Word-code file transfer broker")]
struct Cli {
    #[arg(long, global = true, default_value = "config/pastewords.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the HTTP broker.
    Serve,
    /// Store a file and print the code that retrieves it.
    Send {
        file: PathBuf,
        #[arg(long)]
        content_type: Option<String>,
    },
    /// Fetch the file behind a code. The code stops working afterwards.
    Receive {
        code: String,
        /// Destination path; defaults to the stored file name.
        #[arg(long)]
        out: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,sqlx=warn".into()),
        )
        .init();

    let cli = Cli::parse();
    let config = RuntimeConfig::from_file(&cli.config)?;
    match cli.command {
        Command::Serve => serve(config).await,
        Command::Send { file, content_type } => send(config, file, content_type).await,
        Command::Receive { code, out } => receive(config, code, out).await,
    }
}

async fn open_broker(config: &RuntimeConfig) -> Result<(Broker, Arc<dyn TransferStore>)> {
    let storage_config = config.storage_config();
    let store: Arc<dyn TransferStore> = Arc::new(
        SqliteTransferStore::connect(&storage_config)
            .await
            .with_context(|| format!("failed to open store at {}", storage_config.sqlite_path))?,
    );

    let limits = config.broker_limits();
    let pool = WordPool::load(
        &config.words.path,
        config.words.reserved_marker,
        limits.max_code_len,
    )?;
    Ok((Broker::new(store.clone(), Arc::new(pool), limits), store))
}

async fn serve(config: RuntimeConfig) -> Result<()> {
    let (broker, store) = open_broker(&config).await?;
    let sweeper = spawn_stale_sweeper(store, config.sweep_config());

    let socket: SocketAddr = config
        .http
        .bind
        .parse()
        .with_context(|| format!("invalid socket address {}", config.http.bind))?;
    if !socket.ip().is_loopback() {
        warn!(bind = %socket, "listening on a non-loopback address");
    }

    let state = AppState::new(broker, config.http_settings());
    let session_sweeper =
        state.spawn_session_sweeper(config.sweep_config().interval.max(Duration::from_secs(1)));
    let app = build_router(state);
    let listener = tokio::net::TcpListener::bind(socket)
        .await
        .with_context(|| format!("failed to bind {}", config.http.bind))?;

    info!(bind = %config.http.bind, "pastewordsd listening");
    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("axum server failed");
    sweeper.abort();
    session_sweeper.abort();
    served
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "could not install ctrl-c handler");
        std::future::pending::<()>().await;
    }
    info!("shutdown requested");
}

async fn send(config: RuntimeConfig, file: PathBuf, content_type: Option<String>) -> Result<()> {
    let bytes = tokio::fs::read(&file)
        .await
        .with_context(|| format!("failed to read {}", file.display()))?;
    let (broker, _) = open_broker(&config).await?;

    let upload = Upload {
        file_name: file
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default(),
        content_type: content_type.unwrap_or_default(),
        bytes,
    };
    let receipt = broker.send(&SenderSession::new(), upload).await?;

    info!(transfer_id = %receipt.transfer_id, size_bytes = receipt.size_bytes, "file stored");
    println!("{}", receipt.code);
    Ok(())
}

async fn receive(config: RuntimeConfig, code: String, out: Option<PathBuf>) -> Result<()> {
    if let Some(out) = &out {
        if out.exists() {
            bail!("{} already exists", out.display());
        }
    }
    // Fail on an unwritable destination before the code is spent.
    let staging_dir = out
        .as_deref()
        .and_then(Path::parent)
        .filter(|dir| !dir.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let mut staged = tempfile::Builder::new()
        .prefix("pastewords-received-")
        .tempfile_in(staging_dir)
        .with_context(|| format!("cannot write into {}", staging_dir.display()))?;

    let (broker, _) = open_broker(&config).await?;
    let payload = broker.receive(&code).await?;

    staged
        .write_all(&payload.bytes)
        .context("failed to write received file")?;
    let target = out.unwrap_or_else(|| PathBuf::from(&payload.file_name));
    let written = place_file(staged, &target)?;
    info!(
        path = %written.display(),
        content_type = %payload.content_type,
        size_bytes = payload.size_bytes(),
        "file received"
    );
    println!("{}", written.display());
    Ok(())
}

/// Move `staged` to `target` without clobbering. If `target` appeared in the
/// meantime the file keeps its staging name, which is returned instead.
fn place_file(staged: NamedTempFile, target: &Path) -> Result<PathBuf> {
    match staged.persist_noclobber(target) {
        Ok(_) => Ok(target.to_path_buf()),
        Err(tempfile::PersistError { error, file }) => {
            let (_, kept) = file.keep().context("failed to keep received file")?;
            warn!(
                wanted = %target.display(),
                kept = %kept.display(),
                %error,
                "target exists, received file kept under staging name"
            );
            Ok(kept)
        }
    }
}
