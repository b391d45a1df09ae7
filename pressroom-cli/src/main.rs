//! Pressroom CLI
//!
//! Fetch news articles as structured JSON while backing off from sites
//! that push back.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{warn, Level};
use tracing_subscriber::{EnvFilter, FmtSubscriber};
use url::Url;

use pressroom_core::{EngineConfig, FetchMode, RenderingHint, SiteRegistry};
use pressroom_net::{BrowserHeaders, FetchRequest, HttpTransport, Transport};
use pressroom_runtime::{BatchOptions, BatchReport, Orchestrator, TOP_TAGS};

#[derive(Parser)]
#[command(name = "pressroom")]
#[command(author, version, about = "Pressroom: adaptive news fetch-and-extract", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Verbosity level (0-3); RUST_LOG takes precedence when set
    #[arg(short, long, default_value = "1", global = true)]
    verbose: u8,

    /// Engine configuration file (TOML)
    #[arg(short, long, global = true, env = "PRESSROOM_CONFIG")]
    config: Option<PathBuf>,

    /// Site registry file, replacing the built-in templates
    #[arg(long, global = true)]
    sites: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch and extract articles
    Fetch {
        /// URLs to fetch
        urls: Vec<String>,

        /// File with one URL per line ('#' starts a comment)
        #[arg(short, long)]
        input: Option<PathBuf>,

        /// Output file (default: pressroom_results_<timestamp>.json)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// URLs processed in parallel
        #[arg(long)]
        concurrency: Option<usize>,

        /// Times a deferred URL is retried
        #[arg(long, default_value = "3")]
        max_deferrals: u32,

        /// Longest wait before a retry, in seconds
        #[arg(long, default_value = "60")]
        max_wait: u64,

        /// Remote rendering service for scripted pages
        #[arg(long, env = "PRESSROOM_RENDER_ENDPOINT")]
        render_endpoint: Option<String>,

        /// Proxy URL (http, https or socks5)
        #[arg(long, env = "PRESSROOM_PROXY")]
        proxy: Option<String>,
    },

    /// List known site templates
    Sites,

    /// Fetch one page statically and report defenses and rendering needs
    Probe {
        /// URL to probe
        url: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Set up logging
    let log_level = match cli.verbose {
        0 => Level::ERROR,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };

    let builder = FmtSubscriber::builder()
        .with_target(false)
        .with_thread_ids(false)
        .compact();
    match EnvFilter::try_from_default_env() {
        Ok(filter) => builder.with_env_filter(filter).init(),
        Err(_) => builder.with_max_level(log_level).init(),
    }

    let mut config = match &cli.config {
        Some(path) => EngineConfig::load(path)?,
        None => EngineConfig::default(),
    };
    if cli.sites.is_some() {
        config.sites_path = cli.sites.clone();
    }

    match cli.command {
        Commands::Fetch {
            urls,
            input,
            output,
            concurrency,
            max_deferrals,
            max_wait,
            render_endpoint,
            proxy,
        } => {
            if let Some(concurrency) = concurrency {
                config.runtime.max_concurrent = concurrency.max(1);
            }
            if render_endpoint.is_some() {
                config.transport.render_endpoint = render_endpoint;
            }
            if proxy.is_some() {
                config.transport.proxy = proxy;
            }

            let mut urls = urls;
            if let Some(path) = &input {
                urls.extend(read_url_file(path)?);
            }
            if urls.is_empty() {
                anyhow::bail!("No URLs given. Pass them as arguments or with --input");
            }

            let options = BatchOptions::default()
                .with_concurrency(config.runtime.max_concurrent)
                .with_max_deferrals(max_deferrals)
                .with_max_wait(std::time::Duration::from_secs(max_wait));
            run_fetch(config, urls, options, output).await?;
        }
        Commands::Sites => {
            list_sites(&config)?;
        }
        Commands::Probe { url } => {
            probe(config, &url).await?;
        }
    }

    Ok(())
}

fn read_url_file(path: &Path) -> Result<Vec<String>> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("Failed to read URL list {}", path.display()))?;
    Ok(content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(str::to_string)
        .collect())
}

async fn run_fetch(
    config: EngineConfig,
    urls: Vec<String>,
    options: BatchOptions,
    output: Option<PathBuf>,
) -> Result<()> {
    println!("📰 Pressroom - adaptive fetch and extract\n");
    println!("🔗 URLs: {} | Concurrency: {}", urls.len(), options.concurrency);
    match &config.transport.render_endpoint {
        Some(endpoint) => println!("🖥️  Render endpoint: {}\n", endpoint),
        None => println!("🖥️  Render endpoint: none (scripted pages fetched statically)\n"),
    }

    let engine = Orchestrator::with_http(config)?;

    let cancel = CancellationToken::new();
    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling in-flight fetches");
            ctrl_c.cancel();
        }
    });

    let report = engine.run_batch(urls, options.with_cancel(cancel)).await;
    report.log_summary();

    let output_path = output.unwrap_or_else(|| {
        let timestamp = chrono::Utc::now().format("%Y%m%d_%H%M%S");
        PathBuf::from(format!("pressroom_results_{}.json", timestamp))
    });
    let document = results_document(&report);
    fs::write(&output_path, serde_json::to_string_pretty(&document)?)
        .with_context(|| format!("Failed to write {}", output_path.display()))?;

    println!(
        "\n✅ {}/{} articles extracted ({:.1}%)",
        report.completed(),
        report.total(),
        report.success_ratio() * 100.0
    );
    for (label, count) in report.failure_breakdown() {
        println!("   {}: {}", label, count);
    }
    println!("📄 Results saved to: {}", output_path.display());

    Ok(())
}

/// Result file: a metadata block followed by articles and per-URL outcomes
fn results_document(report: &BatchReport) -> serde_json::Value {
    let articles: Vec<_> = report
        .results
        .iter()
        .filter_map(|r| r.outcome.article())
        .collect();
    let top_tags: Vec<_> = report
        .top_tags(TOP_TAGS)
        .into_iter()
        .map(|(tag, count)| json!({ "tag": tag, "count": count }))
        .collect();

    json!({
        "metadata": {
            "run_id": report.run_id.to_string(),
            "generated_at": chrono::Utc::now().to_rfc3339(),
            "started_at": report.started_at,
            "finished_at": report.finished_at,
            "total_urls": report.total(),
            "total_articles": report.completed(),
            "success_ratio": report.success_ratio(),
            "average_words": report.average_words(),
            "sources": report.sources(),
            "top_tags": top_tags,
            "failures": report.failure_breakdown(),
            "domains": report.domains,
        },
        "articles": articles,
        "results": report.results,
    })
}

fn list_sites(config: &EngineConfig) -> Result<()> {
    let registry = match &config.sites_path {
        Some(path) => SiteRegistry::load_from_path(path)?,
        None => SiteRegistry::load_embedded()?,
    };

    println!("{:<12} {:>8}  {:<9} DOMAINS", "TEMPLATE", "DELAY", "RENDER");
    for template in registry.templates() {
        println!(
            "{:<12} {:>6}ms  {:<9} {}",
            template.id,
            template.base_delay_ms,
            rendering_label(template.rendering),
            template.domains.join(", ")
        );
    }
    println!(
        "{:<12} {:>6}ms  {:<9} (everything else)",
        "generic",
        registry.generic_delay().as_millis(),
        rendering_label(RenderingHint::Unknown)
    );

    Ok(())
}

fn rendering_label(hint: RenderingHint) -> &'static str {
    match hint {
        RenderingHint::Static => "static",
        RenderingHint::Scripted => "scripted",
        RenderingHint::Unknown => "probe",
    }
}

async fn probe(config: EngineConfig, url: &str) -> Result<()> {
    let target = Url::parse(url).with_context(|| format!("Invalid URL '{}'", url))?;

    let transport = HttpTransport::new(config.transport.clone())?;
    let engine = Orchestrator::new(config.clone(), Arc::new(transport.clone()))?;
    let profile = engine.resolver().resolve(&target);

    println!("🔍 Probing {}", target);
    println!("   Domain: {} | Template: {}", profile.domain, profile.template);

    let headers = BrowserHeaders::new()
        .with_user_agent(config.transport.user_agent.as_deref())
        .with_accept_language(profile.accept_language.as_deref())
        .build(&target);
    let request = FetchRequest::new(target.as_str(), FetchMode::Static, config.transport.timeout())
        .with_headers(headers);
    let attempt = transport.fetch(&request).await?.into_attempt(&request);

    let defenses = engine.detector().report(&attempt);
    let rendering = engine.selector().probe(&attempt.body);
    let mode = engine.selector().select_mode(&profile, Some(&rendering));

    let document = json!({
        "url": attempt.url,
        "final_url": attempt.final_url,
        "status": attempt.status,
        "elapsed_ms": attempt.elapsed.as_millis() as u64,
        "profile": {
            "domain": profile.domain,
            "template": profile.template.to_string(),
            "base_delay_ms": profile.base_delay.as_millis() as u64,
            "rendering_hint": rendering_label(profile.rendering),
        },
        "defenses": defenses,
        "rendering": rendering,
        "selected_mode": mode,
    });
    println!("{}", serde_json::to_string_pretty(&document)?);

    Ok(())
}
