// src/main.rs
// =============================================================================
// This is the entry point of the pushscan CLI.
//
// What happens here:
// 1. Install the log subscriber (RUST_LOG controls verbosity, output on stderr)
// 2. Parse command-line arguments using clap
// 3. Open the document, scan it (recursively unless --no-recurse)
// 4. Print the resources as a table or JSON
// 5. Exit with proper code (0 = success, 1 = scan error, 2 = internal error)
//
// All the real work lives in the library; this file only wires it together.
// =============================================================================

mod cli;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{bail, Context, Result};
use clap::Parser;
use serde::Serialize;
use tracing::info;
use tracing_subscriber::EnvFilter;
use url::{Position, Url};

use cli::{Cli, Commands, ScanArgs};
use pushscan::{
    DirOpener, DocumentAddress, HttpOpener, ListSink, Mimetype, Opener, Resource, ScanConfig,
    Scanner,
};

#[tokio::main]
async fn main() {
    init_logging();

    let exit_code = match run().await {
        Ok(code) => code,
        Err(e) => {
            // {:#} prints the whole context chain on one line
            eprintln!("Error: {:#}", e);
            2
        }
    };

    std::process::exit(exit_code);
}

// Logs go to stderr so `--json` output on stdout stays machine readable.
fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn run() -> Result<i32> {
    let cli = Cli::parse();

    match cli.command {
        Commands::File {
            uri,
            root,
            host,
            options,
        } => handle_file_scan(&uri, root, &host, &options).await,
        Commands::Site { url, options } => handle_site_scan(&url, &options).await,
    }
}

// Config file first, then flags on top.
fn load_config(options: &ScanArgs) -> Result<ScanConfig> {
    let mut config = match &options.config {
        Some(path) => ScanConfig::load(path)?,
        None => ScanConfig::default(),
    };
    if let Some(base) = &options.base {
        config.base = base.clone();
    }
    Ok(config)
}

fn build_scanner(config: &ScanConfig, opener: Arc<dyn Opener>, options: &ScanArgs) -> Scanner {
    let scanner = Scanner::new(config);
    if options.no_recurse {
        scanner
    } else {
        scanner.with_opener(opener)
    }
}

// Handles the 'file' subcommand
async fn handle_file_scan(uri: &str, root: PathBuf, host: &str, options: &ScanArgs) -> Result<i32> {
    let config = load_config(options)?;
    let document = DocumentAddress::from_request(host, uri);

    let opener = Arc::new(DirOpener::new(root));
    let resource = opener
        .open(document.path())
        .await
        .with_context(|| format!("failed to open {} under {}", document.path(), opener.root().display()))?;

    let scanner = build_scanner(&config, opener, options);
    scan_document(&scanner, &document, resource, options.json).await
}

// Handles the 'site' subcommand
async fn handle_site_scan(url: &str, options: &ScanArgs) -> Result<i32> {
    let config = load_config(options)?;
    let url = Url::parse(url).with_context(|| format!("invalid URL {url}"))?;
    let Some(host) = url.host_str() else {
        bail!("URL has no host: {url}");
    };
    let host = match url.port() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_string(),
    };
    let document = DocumentAddress::new(host, url.path());

    let origin = url.join("/")?;
    let opener = Arc::new(HttpOpener::new(origin).context("failed to create HTTP client")?);
    let resource = opener
        .open(&url[Position::BeforePath..Position::AfterQuery])
        .await
        .with_context(|| format!("failed to fetch {url}"))?;

    let scanner = build_scanner(&config, opener, options);
    scan_document(&scanner, &document, resource, options.json).await
}

// What we print for one document
#[derive(Debug, Serialize)]
struct ScanReport {
    document: String,
    mimetype: Mimetype,
    recursive: bool,
    resources: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

async fn scan_document(
    scanner: &Scanner,
    document: &DocumentAddress,
    resource: Resource,
    json: bool,
) -> Result<i32> {
    let mimetype = match resource.mimetype.as_deref() {
        Some(mimetype) => Mimetype::from_essence(mimetype),
        None => scanner.mimetypes().lookup(document.path()),
    };
    let Some(mimetype) = mimetype else {
        bail!("{document} is not an HTML, CSS or SVG document");
    };

    // A ListSink we own keeps whatever was found before a failure
    let sink = Arc::new(ListSink::new());
    let started = Instant::now();
    let result = scanner
        .scan(resource.reader, document, mimetype, sink.clone())
        .await;
    info!(%document, elapsed = ?started.elapsed(), "scan finished");

    let report = ScanReport {
        document: document.to_string(),
        mimetype,
        recursive: scanner.is_recursive(),
        resources: sink.uris(),
        error: result.err().map(|err| err.to_string()),
    };
    print_report(&report, json)?;

    Ok(if report.error.is_some() { 1 } else { 0 })
}

fn print_report(report: &ScanReport, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
    } else {
        print_table(report);
    }
    Ok(())
}

fn print_table(report: &ScanReport) {
    println!("🔍 {} ({})", report.document, report.mimetype);
    println!();
    println!("{:<6} {:<70}", "#", "RESOURCE");
    println!("{}", "=".repeat(76));

    for (i, uri) in report.resources.iter().enumerate() {
        // Truncate long URIs for display
        let uri_display = if uri.chars().count() > 67 {
            format!("{}...", uri.chars().take(67).collect::<String>())
        } else {
            uri.clone()
        };
        println!("{:<6} {:<70}", i + 1, uri_display);
    }

    println!();
    println!("📊 Summary:");
    println!("   📦 Resources: {}", report.resources.len());
    println!(
        "   🔁 Recursive: {}",
        if report.recursive { "yes" } else { "no" }
    );
    if let Some(error) = &report.error {
        println!("   ❌ Scan error: {}", error);
    }
}
