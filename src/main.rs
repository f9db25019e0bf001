//! `h1-fetch`: fetch URLs through one shared transport.
//!
//! Every URL goes through the same `Transport`, so requests to the same host
//! reuse connections (visible with `RUST_LOG=h1_transport=debug`).

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use serde_json::{json, Value};

use h1_transport::config::{load_config, TransportConfig};
use h1_transport::observability::{logging, metrics};
use h1_transport::{Request, Response, Transport};

#[derive(Parser)]
#[command(name = "h1-fetch")]
#[command(about = "Fetch URLs over the HTTP/1.1 client transport", long_about = None)]
struct Cli {
    /// URLs to fetch, in order
    #[arg(required = true)]
    urls: Vec<String>,

    /// TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Request method
    #[arg(short = 'X', long, default_value = "GET")]
    method: String,

    /// Extra request header, `Name: value` (repeatable)
    #[arg(short = 'H', long = "header")]
    headers: Vec<String>,

    /// Request body
    #[arg(short, long)]
    data: Option<String>,

    /// Expose Prometheus metrics on the configured address
    #[arg(long)]
    metrics: bool,

    /// Print status and headers as JSON instead of the body
    #[arg(long)]
    json: bool,
}

fn build_request(cli: &Cli, url: &str) -> Result<Request, Box<dyn std::error::Error>> {
    let mut request = Request::parse(cli.method.to_uppercase(), url)?;
    for header in &cli.headers {
        let (name, value) = header
            .split_once(':')
            .ok_or_else(|| format!("header {header:?} is not `Name: value`"))?;
        request = request.header(name.trim(), value.trim());
    }
    if let Some(data) = &cli.data {
        request = request.body(data.clone().into_bytes());
    }
    Ok(request)
}

fn describe(response: &Response) -> Value {
    let headers: Vec<Value> = response
        .headers()
        .iter()
        .map(|(name, value)| json!([name, value]))
        .collect();
    json!({
        "url": response.url().as_str(),
        "status": response.status(),
        "reason": response.reason(),
        "version": format!("{}.{}", response.version().0, response.version().1),
        "headers": headers,
        "downloaded": response.downloaded(),
        "connection_id": response.connection_id().to_string(),
        "retries": response.retries(),
    })
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => match load_config(path) {
            Ok(config) => config,
            Err(e) => {
                eprintln!("h1-fetch: {e}");
                return ExitCode::FAILURE;
            }
        },
        None => TransportConfig::default(),
    };
    logging::init(&config.observability.log_level);

    if cli.metrics || config.observability.metrics_enabled {
        match config.observability.metrics_address.parse() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let transport = match Transport::new(config) {
        Ok(transport) => transport,
        Err(e) => {
            eprintln!("h1-fetch: {e}");
            return ExitCode::FAILURE;
        }
    };

    let mut failed = false;
    for url in &cli.urls {
        let request = match build_request(&cli, url) {
            Ok(request) => request,
            Err(e) => {
                eprintln!("h1-fetch: {url}: {e}");
                failed = true;
                continue;
            }
        };
        match transport.execute(request).await {
            Ok(response) if cli.json => println!("{}", describe(&response)),
            Ok(response) => {
                tracing::info!(url = %url, status = response.status(), connection_id = %response.connection_id(), "Fetched");
                println!("{}", String::from_utf8_lossy(response.body()));
            }
            Err(e) => {
                eprintln!("h1-fetch: {url}: {e}");
                failed = true;
            }
        }
    }

    transport.shutdown();
    if failed {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}
