// ABOUTME: CLI binary for Ogie: extracts metadata from URLs or an HTML file and prints JSON.
// ABOUTME: Several URLs run through bulk extraction; any failure sets exit code 1.

use std::fs;
use std::io::{self, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::{Duration, Instant};

use clap::Parser;
use digests_ogie::{BulkOptions, Client, ExtractOptions};
use tracing::debug;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "ogie")]
#[command(about = "Extract OpenGraph, Twitter Card and page metadata")]
struct Args {
    /// URLs to extract (fetch mode)
    #[arg()]
    urls: Vec<String>,

    /// HTML file to parse instead of fetching
    #[arg(long = "html")]
    html: Option<PathBuf>,

    /// Base URL for resolving relative links in --html mode
    #[arg(long = "base-url")]
    base_url: Option<String>,

    /// Allow fetching from private/local networks
    #[arg(long = "allow-private-urls")]
    allow_private_urls: bool,

    /// Fetch discovered oEmbed data
    #[arg(long = "oembed")]
    oembed: bool,

    /// Detect the document charset and decode accordingly
    #[arg(long = "convert-charset")]
    convert_charset: bool,

    /// Do not fall back to Twitter/basic meta for og title and description
    #[arg(long = "only-open-graph")]
    only_open_graph: bool,

    /// Request timeout in milliseconds
    #[arg(long = "timeout-ms")]
    timeout_ms: Option<u64>,

    #[arg(long = "max-redirects")]
    max_redirects: Option<u32>,

    #[arg(long = "user-agent")]
    user_agent: Option<String>,

    /// Extra request header, "Name: value" (repeatable)
    #[arg(short = 'H', long = "header")]
    headers: Vec<String>,

    /// Global concurrency for several URLs
    #[arg(long = "concurrency")]
    concurrency: Option<usize>,

    /// Concurrency per domain for several URLs
    #[arg(long = "per-domain")]
    per_domain: Option<usize>,

    /// Minimum delay between requests to one domain, in milliseconds
    #[arg(long = "min-delay-ms")]
    min_delay_ms: Option<u64>,

    /// Global requests per minute
    #[arg(long = "rpm")]
    rpm: Option<u32>,

    /// Stop at the first failure that is not an extraction result
    #[arg(long = "fail-fast")]
    fail_fast: bool,

    /// Output file path (default: stdout)
    #[arg(short = 'o', long = "output")]
    output: Option<PathBuf>,

    /// Print elapsed time in ms to stderr
    #[arg(long = "timing")]
    timing: bool,

    /// Debug logging on stderr
    #[arg(short = 'v', long = "verbose")]
    verbose: bool,
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "digests_ogie=debug,ogie=debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

fn parse_header(raw: &str) -> Result<(String, String), String> {
    match raw.split_once(':') {
        Some((name, value)) if !name.trim().is_empty() => {
            Ok((name.trim().to_string(), value.trim().to_string()))
        }
        _ => Err(format!("invalid header {:?}, expected \"Name: value\"", raw)),
    }
}

fn extract_options(args: &Args) -> Result<ExtractOptions, String> {
    let mut opts = ExtractOptions::new();
    if args.allow_private_urls {
        opts = opts.allow_private_urls(true);
    }
    if args.oembed {
        opts = opts.fetch_oembed(true);
    }
    if args.convert_charset {
        opts = opts.convert_charset(true);
    }
    if args.only_open_graph {
        opts = opts.only_open_graph(true);
    }
    if let Some(ms) = args.timeout_ms {
        opts = opts.timeout(Duration::from_millis(ms));
    }
    if let Some(n) = args.max_redirects {
        opts = opts.max_redirects(n);
    }
    if let Some(ua) = &args.user_agent {
        opts = opts.user_agent(ua.clone());
    }
    if let Some(base) = &args.base_url {
        opts = opts.base_url(base.clone());
    }
    for raw in &args.headers {
        let (name, value) = parse_header(raw)?;
        opts = opts.header(name, value);
    }
    Ok(opts)
}

fn bulk_options(args: &Args, extract: ExtractOptions) -> BulkOptions {
    let mut opts = BulkOptions::new()
        .extract_options(extract.clone())
        .continue_on_error(!args.fail_fast)
        .on_progress(|p| {
            debug!(
                completed = p.completed,
                total = p.total,
                current = p.current_url.as_deref().unwrap_or(""),
                "progress"
            )
        });
    if let Some(timeout) = extract.timeout {
        opts = opts.timeout(timeout);
    }
    if let Some(n) = args.concurrency {
        opts = opts.concurrency(n);
    }
    if let Some(n) = args.per_domain {
        opts = opts.concurrency_per_domain(n);
    }
    if let Some(ms) = args.min_delay_ms {
        opts = opts.min_delay_per_domain(Duration::from_millis(ms));
    }
    if let Some(rpm) = args.rpm {
        opts = opts.requests_per_minute(rpm);
    }
    opts
}

/// Run the requested extraction. Returns the JSON to print and whether anything failed.
async fn run(args: &Args, client: &Client) -> Result<(Option<serde_json::Value>, bool), String> {
    let opts = extract_options(args)?;

    if let Some(path) = &args.html {
        let html = fs::read_to_string(path)
            .map_err(|e| format!("error reading file {:?}: {}", path, e))?;
        return match client.extract_from_html(&html, &opts) {
            Ok(meta) => Ok((Some(to_json(&meta)?), false)),
            Err(e) => {
                eprintln!("error parsing HTML: {}", e);
                Ok((None, true))
            }
        };
    }

    if let [url] = args.urls.as_slice() {
        return match client.extract(url, &opts).await {
            Ok(meta) => Ok((Some(to_json(&meta)?), false)),
            Err(e) => {
                eprintln!("error extracting {}: {}", url, e);
                Ok((None, true))
            }
        };
    }

    let bulk = client
        .extract_bulk(args.urls.as_slice(), &bulk_options(args, opts))
        .await
        .map_err(|e| format!("bulk extraction stopped: {}", e))?;
    for item in &bulk.results {
        if let Err(e) = &item.result {
            eprintln!("error extracting {}: {}", item.url, e);
        }
    }
    Ok((Some(to_json(&bulk.results)?), bulk.stats.failed > 0))
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<serde_json::Value, String> {
    serde_json::to_value(value).map_err(|e| format!("error serializing output: {}", e))
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    init_tracing(args.verbose);

    if args.html.is_some() && !args.urls.is_empty() {
        eprintln!("error: cannot use both --html and positional URLs");
        return ExitCode::from(1);
    }
    if args.html.is_none() && args.urls.is_empty() {
        eprintln!("error: at least one URL is required, or use --html");
        return ExitCode::from(1);
    }

    let client = match Client::builder().build() {
        Ok(client) => client,
        Err(e) => {
            eprintln!("error: {}", e);
            return ExitCode::from(1);
        }
    };

    let start = Instant::now();
    let (output, mut had_error) = match run(&args, &client).await {
        Ok(done) => done,
        Err(message) => {
            eprintln!("error: {}", message);
            (None, true)
        }
    };
    let elapsed = start.elapsed();

    if let Some(value) = output {
        match serde_json::to_string_pretty(&value) {
            Ok(text) => {
                if let Some(path) = &args.output {
                    if let Err(e) = fs::write(path, &text) {
                        eprintln!("error writing to {:?}: {}", path, e);
                        had_error = true;
                    }
                } else {
                    println!("{}", text);
                }
            }
            Err(e) => {
                eprintln!("error serializing output: {}", e);
                had_error = true;
            }
        }
    }

    if args.timing {
        let _ = writeln!(io::stderr(), "elapsed: {}ms", elapsed.as_millis());
    }

    if had_error {
        ExitCode::from(1)
    } else {
        ExitCode::SUCCESS
    }
}
