use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use chatbench_client::{fetch_model_ids, HttpIssuer};
use chatbench_common::{BenchConfig, BenchError};
use chatbench_core::RunDriver;
use chatbench_server::MockServerConfig;
use clap::{Args, Parser, Subcommand};
use opentelemetry_otlp::WithExportConfig;
use tracing_opentelemetry::OpenTelemetryLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(
    name = "chatbench",
    version,
    about = "Concurrent load generator for chat-completions endpoints"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Issue N requests at concurrency C and report latency and throughput
    Run(RunArgs),
    /// List the models served at the base URL
    Models(ModelsArgs),
    /// Start a mock chat-completions server
    ServeMock(ServeMockArgs),
    Version,
}

/// Flags override `CHATBENCH_CONFIG` and the environment.
#[derive(Args, Debug, Default)]
struct RunArgs {
    #[arg(long)]
    base_url: Option<String>,
    #[arg(short, long)]
    model: Option<String>,
    #[arg(short = 'n', long)]
    requests: Option<usize>,
    #[arg(short, long)]
    concurrency: Option<usize>,
    #[arg(long)]
    input_len: Option<usize>,
    #[arg(long)]
    output_len: Option<usize>,
    #[arg(long)]
    timeout_secs: Option<u64>,
    #[arg(long)]
    stream: bool,
    #[arg(long)]
    warmup: Option<usize>,
    /// Print the summary as JSON instead of a single line
    #[arg(long)]
    json: bool,
    /// Write client-side Prometheus metrics here after the run
    #[arg(long)]
    metrics_out: Option<PathBuf>,
    #[arg(long)]
    no_host_stats: bool,
}

impl RunArgs {
    fn apply(&self, cfg: &mut BenchConfig) {
        if let Some(v) = &self.base_url { cfg.base_url = v.clone(); }
        if let Some(v) = &self.model { cfg.model = Some(v.clone()); }
        if let Some(v) = self.requests { cfg.requests = v; }
        if let Some(v) = self.concurrency { cfg.concurrency = v; }
        if let Some(v) = self.input_len { cfg.input_len = v; }
        if let Some(v) = self.output_len { cfg.output_len = v; }
        if let Some(v) = self.timeout_secs { cfg.timeout_secs = v; }
        if let Some(v) = self.warmup { cfg.warmup = v; }
        if self.stream { cfg.stream = true; }
    }
}

#[derive(Args, Debug)]
struct ModelsArgs {
    #[arg(long)]
    base_url: Option<String>,
}

#[derive(Args, Debug)]
struct ServeMockArgs {
    #[arg(long, default_value = "127.0.0.1")]
    host: String,
    #[arg(short, long, default_value_t = 8000)]
    port: u16,
    #[arg(long, default_value = "mock-model")]
    model: String,
    #[arg(long, default_value_t = 50)]
    latency_ms: u64,
    #[arg(long, default_value_t = 0)]
    jitter_ms: u64,
    #[arg(long, default_value_t = 0.0)]
    error_rate: f64,
    #[arg(long)]
    fail_every: Option<usize>,
    #[arg(long)]
    no_usage: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let cli = Cli::parse();
    let result = match cli.command {
        Commands::Run(args) => run_benchmark(args).await,
        Commands::Models(args) => list_models(args).await,
        Commands::ServeMock(args) => serve_mock(args).await,
        Commands::Version => {
            println!("{}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    };
    opentelemetry::global::shutdown_tracer_provider();
    result
}

async fn run_benchmark(args: RunArgs) -> anyhow::Result<()> {
    let mut cfg = BenchConfig::load()?;
    args.apply(&mut cfg);

    let model = match cfg.model.clone() {
        Some(model) => model,
        None => discover_model(&cfg).await?,
    };
    let config = cfg.into_run_config(model)?;
    let issuer = Arc::new(HttpIssuer::new(&config)?);
    let driver = RunDriver::new(config, issuer)?.with_host_sampling(!args.no_host_stats);

    let outcome = driver.run().await;

    if let Some(path) = &args.metrics_out {
        std::fs::write(path, driver.metrics().render())
            .with_context(|| format!("writing metrics to {}", path.display()))?;
        tracing::info!("metrics written to {}", path.display());
    }

    let summary = outcome?;
    if args.json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        println!("{}", summary);
    }
    Ok(())
}

async fn discover_model(cfg: &BenchConfig) -> anyhow::Result<String> {
    let url = cfg.models_url();
    tracing::info!("no model configured, asking {}", url);
    let ids = fetch_model_ids(&url, Duration::from_secs(cfg.timeout_secs.max(1))).await?;
    let first = ids
        .into_iter()
        .next()
        .ok_or_else(|| BenchError::Configuration(format!("no models available at {url}")))?;
    tracing::info!("using model {}", first);
    Ok(first)
}

async fn list_models(args: ModelsArgs) -> anyhow::Result<()> {
    let mut cfg = BenchConfig::load()?;
    if let Some(base) = args.base_url {
        cfg.base_url = base;
    }
    let timeout = Duration::from_secs(cfg.timeout_secs.max(1));
    for id in fetch_model_ids(&cfg.models_url(), timeout).await? {
        println!("{}", id);
    }
    Ok(())
}

async fn serve_mock(args: ServeMockArgs) -> anyhow::Result<()> {
    let config = MockServerConfig {
        model_id: args.model,
        latency: Duration::from_millis(args.latency_ms),
        jitter: Duration::from_millis(args.jitter_ms),
        error_rate: args.error_rate,
        fail_every: args.fail_every,
        include_usage: !args.no_usage,
        ..MockServerConfig::default()
    };
    let listener = tokio::net::TcpListener::bind((args.host.as_str(), args.port))
        .await
        .with_context(|| format!("binding {}:{}", args.host, args.port))?;
    let shutdown = async {
        let _ = tokio::signal::ctrl_c().await;
        tracing::info!("shutdown signal received");
    };
    chatbench_server::serve(listener, config, shutdown).await?;
    Ok(())
}

fn init_tracing() {
    let env_filter = tracing_subscriber::EnvFilter::new(
        std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
    );
    // stdout carries the report; logs stay on stderr
    let fmt_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);

    if let Ok(endpoint) = std::env::var("OTEL_EXPORTER_OTLP_ENDPOINT") {
        let tracer = opentelemetry_otlp::new_pipeline()
            .tracing()
            .with_exporter(opentelemetry_otlp::new_exporter().tonic().with_endpoint(endpoint))
            .install_simple()
            .ok();
        if let Some(tracer) = tracer {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt_layer)
                .with(OpenTelemetryLayer::new(tracer))
                .init();
            return;
        }
    }

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();
}
