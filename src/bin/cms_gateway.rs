//! CMS Gateway client CLI binary.
//!
//! # Commands
//!
//! - `listen` - Connect to the gateway and serve requested URIs from a directory
//! - `upload` - Upload one file as the answer to a request

use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use cms_gateway::{
    ChannelEvent, Command, ErrorResponse, FileUpload, GatewayClient, GatewayConfig, HtmlUpload,
    ResourceRequest, Upload, VERSION,
};
use tokio::sync::mpsc;

#[derive(Parser)]
#[command(name = "cms-gateway")]
#[command(version = VERSION)]
#[command(about = "CMS Gateway client - serve content requests over the command channel", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect and serve requested URIs from a local directory
    Listen {
        /// Directory requested URIs resolve against
        root: PathBuf,

        /// Base URL reported with HTML uploads
        #[arg(long)]
        base_url: Option<String>,

        #[command(flatten)]
        gateway: GatewayArgs,
    },

    /// Upload a file as the answer to a request
    Upload {
        /// Request ID (rid)
        #[arg(short, long)]
        rid: String,

        /// Requested URI
        #[arg(short, long)]
        uri: String,

        /// File to upload
        file: PathBuf,

        /// Send as an HTML page
        #[arg(long)]
        html: bool,

        /// Content type (default: guessed from the file extension)
        #[arg(long)]
        content_type: Option<String>,

        /// Base URL reported with HTML uploads
        #[arg(long)]
        base_url: Option<String>,

        #[command(flatten)]
        gateway: GatewayArgs,
    },
}

#[derive(Args)]
struct GatewayArgs {
    /// Config file (default: <config dir>/cms-gateway/config.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// API key
    #[arg(long)]
    api_key: Option<String>,

    /// Project ID
    #[arg(long)]
    project_id: Option<String>,

    /// Command channel endpoint
    #[arg(long)]
    command_endpoint: Option<String>,

    /// Upload channel endpoint
    #[arg(long)]
    upload_endpoint: Option<String>,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,
}

impl GatewayArgs {
    fn client(&self) -> anyhow::Result<GatewayClient> {
        let mut config = GatewayConfig::load(self.config.as_deref())?;

        if let Some(api_key) = &self.api_key {
            config.credentials.api_key = Some(api_key.clone());
        }
        if let Some(project_id) = &self.project_id {
            config.credentials.project_id = Some(project_id.clone());
        }
        if let Some(endpoint) = &self.command_endpoint {
            config.command_channel.endpoint.clone_from(endpoint);
        }
        if let Some(endpoint) = &self.upload_endpoint {
            config.upload_channel.endpoint.clone_from(endpoint);
        }

        Ok(GatewayClient::from_config(&config)?)
    }
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Listen {
            root,
            base_url,
            gateway,
        } => cmd_listen(root, base_url, gateway),

        Commands::Upload {
            rid,
            uri,
            file,
            html,
            content_type,
            base_url,
            gateway,
        } => cmd_upload(rid, uri, file, html, content_type, base_url, gateway),
    }
}

fn init_logging(verbose: bool) {
    let log_level = if verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .init();
}

fn cmd_listen(root: PathBuf, base_url: Option<String>, gateway: GatewayArgs) -> anyhow::Result<()> {
    init_logging(gateway.verbose);

    anyhow::ensure!(root.is_dir(), "{} is not a directory", root.display());
    let client = Arc::new(gateway.client()?);
    let root = Arc::new(root);

    tracing::info!("Serving {} via {}", root.display(), client.command_channel_uri().path());

    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(async {
        let (tx, mut rx) = mpsc::unbounded_channel::<ChannelEvent>();
        client.connect(tx).await?;

        loop {
            let event = tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    tracing::info!("Interrupted, closing");
                    client.close().await;
                    continue;
                },
                event = rx.recv() => event,
            };

            match event {
                Some(ChannelEvent::Connected) => tracing::info!("Authenticated with gateway"),
                Some(ChannelEvent::Command(command)) => {
                    let client = Arc::clone(&client);
                    let root = Arc::clone(&root);
                    let base_url = base_url.clone();
                    tokio::spawn(async move {
                        if let Err(e) = serve(&client, &root, command, base_url).await {
                            tracing::warn!("Failed to answer request: {e:#}");
                        }
                    });
                },
                Some(ChannelEvent::Error(e)) => tracing::warn!("Gateway error: {e}"),
                Some(ChannelEvent::Disconnected) | None => break,
            }
        }

        tracing::info!("Disconnected");
        Ok::<_, anyhow::Error>(())
    })
}

/// Answer one request from `root`: upload the file, or report why not.
async fn serve(
    client: &GatewayClient,
    root: &Path,
    command: Command,
    base_url: Option<String>,
) -> anyhow::Result<()> {
    let Some(request) = command.request().cloned() else {
        return Ok(());
    };

    let Some(path) = resolve(root, &request.uri) else {
        return reject(client, &request, 400, "invalid path").await;
    };

    let content = match tokio::fs::read(&path).await {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return reject(client, &request, 404, "not found").await;
        },
        Err(e) => return reject(client, &request, 500, &e.to_string()).await,
    };

    let upload = match command {
        Command::GetHtml(_) => {
            let body = String::from_utf8(content).context("page is not valid UTF-8")?;
            let mut page = HtmlUpload::new(request.clone()).body(body);
            if let Some(base_url) = base_url {
                page = page.base_url(base_url);
            }
            Upload::from(page)
        },
        _ => Upload::from(file_upload(request.clone(), &path, content, None)),
    };

    let outcome = client.upload(upload)?.await?;
    tracing::info!("rid={} {} -> {}", request.id, request.uri, outcome.code);
    Ok(())
}

async fn reject(
    client: &GatewayClient,
    request: &ResourceRequest,
    http_code: u16,
    message: &str,
) -> anyhow::Result<()> {
    tracing::info!("rid={} {} -> {} {}", request.id, request.uri, http_code, message);
    let error = ErrorResponse::new(request)
        .with_http_code(http_code)
        .with_message(message);
    client.send_error(&error).await?;
    Ok(())
}

#[allow(clippy::too_many_arguments)]
fn cmd_upload(
    rid: String,
    uri: String,
    file: PathBuf,
    html: bool,
    content_type: Option<String>,
    base_url: Option<String>,
    gateway: GatewayArgs,
) -> anyhow::Result<()> {
    init_logging(gateway.verbose);

    let client = gateway.client()?;
    let request = ResourceRequest::new(rid, uri);
    let content =
        std::fs::read(&file).with_context(|| format!("Failed to read {}", file.display()))?;

    let upload = if html {
        let body = String::from_utf8(content).context("page is not valid UTF-8")?;
        let mut page = HtmlUpload::new(request).body(body);
        if let Some(base_url) = base_url {
            page = page.base_url(base_url);
        }
        Upload::from(page)
    } else {
        Upload::from(file_upload(request, &file, content, content_type.as_deref()))
    };

    let runtime = tokio::runtime::Runtime::new()?;
    let _guard = runtime.enter();
    let handle = client.upload(upload)?;
    let outcome = runtime.block_on(handle)?;

    println!("{} {}", outcome.code, outcome.message());
    Ok(())
}

fn file_upload(
    request: ResourceRequest,
    path: &Path,
    content: Vec<u8>,
    content_type: Option<&str>,
) -> FileUpload {
    let mut upload = FileUpload::new(request)
        .content_type(content_type.unwrap_or_else(|| guess_content_type(path)), None)
        .content(content);
    if let Some(name) = path.file_name() {
        upload = upload.filename(name.to_string_lossy());
    }
    upload
}

/// Map a requested URI onto a file under `root`, refusing to leave it.
fn resolve(root: &Path, uri: &str) -> Option<PathBuf> {
    let path = uri.split(['?', '#']).next().unwrap_or_default();
    let mut resolved = root.to_path_buf();

    for component in Path::new(path.trim_start_matches('/')).components() {
        match component {
            Component::Normal(part) => resolved.push(part),
            Component::CurDir => {},
            _ => return None,
        }
    }

    if resolved.is_dir() || path.ends_with('/') {
        resolved.push("index.html");
    }
    Some(resolved)
}

fn guess_content_type(path: &Path) -> &'static str {
    let extension = path
        .extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default();

    match extension.as_str() {
        "html" | "htm" => "text/html",
        "css" => "text/css",
        "js" => "application/javascript",
        "json" => "application/json",
        "svg" => "image/svg+xml",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "woff2" => "font/woff2",
        "txt" => "text/plain",
        _ => "application/octet-stream",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_stays_under_root() {
        let root = Path::new("/srv/site");
        assert_eq!(
            resolve(root, "/css/site.css?v=3"),
            Some(PathBuf::from("/srv/site/css/site.css"))
        );
        assert_eq!(
            resolve(root, "/blog/"),
            Some(PathBuf::from("/srv/site/blog/index.html"))
        );
        assert_eq!(resolve(root, "/../etc/passwd"), None);
    }

    #[test]
    fn test_guess_content_type() {
        assert_eq!(guess_content_type(Path::new("a/logo.PNG")), "image/png");
        assert_eq!(guess_content_type(Path::new("noext")), "application/octet-stream");
    }
}
