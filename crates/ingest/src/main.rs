use clap::Parser;
use kestrel_event_log::FileEventLog;
use kestrel_ingest::{
    CommandSink, HttpCommandSink, IngestPipeline, PipelineConfig, RuntimeCommandSink,
};
use kestrel_ports::{RetryPolicy, SystemClock};
use kestrel_runtime::{EntityRuntime, RuntimeConfig};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

/// Stream CSV trader records into Kestrel
#[derive(Parser, Debug)]
#[command(name = "kestrel-ingest", version, about)]
struct Args {
    /// Input files, ingested concurrently
    #[arg(required = true)]
    inputs: Vec<PathBuf>,

    /// Gateway base URL
    #[arg(long, env = "KESTREL_GATEWAY", default_value = "http://127.0.0.1:8080")]
    gateway: String,

    /// Dispatch into an in-process runtime over this event log directory
    /// instead of calling a gateway
    #[arg(long, env = "KESTREL_DATA_DIR", conflicts_with = "gateway")]
    data_dir: Option<PathBuf>,

    #[arg(long, default_value_t = 1024)]
    buffer_size: usize,

    #[arg(long, default_value_t = 256)]
    batch_size: usize,

    /// Skip the first row of every input
    #[arg(long)]
    has_headers: bool,

    #[arg(long, default_value_t = 5)]
    retry_attempts: u32,

    #[arg(long, default_value_t = 100)]
    retry_backoff_ms: u64,

    #[arg(long, default_value_t = 5_000)]
    retry_max_backoff_ms: u64,

    #[arg(long, default_value_t = 10_000)]
    request_timeout_ms: u64,
}

impl Args {
    fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            buffer_size: self.buffer_size,
            batch_size: self.batch_size,
            has_headers: self.has_headers,
            retry: RetryPolicy {
                max_attempts: self.retry_attempts,
                initial_backoff_ms: self.retry_backoff_ms,
                max_backoff_ms: self.retry_max_backoff_ms,
                multiplier: 2.0,
            },
        }
    }
}

async fn ingest<S: CommandSink>(sink: Arc<S>, args: &Args) -> bool {
    let pipeline = IngestPipeline::new(sink, args.pipeline_config());
    let mut ok = true;

    for result in pipeline.run_all(&args.inputs).await {
        match result {
            Ok(report) => match serde_json::to_string_pretty(&report) {
                Ok(json) => println!("{json}"),
                Err(e) => error!(error = %e, "Cannot render report"),
            },
            Err(e) => {
                ok = false;
                error!(error = %e, "Ingestion halted");
                if let Some(Ok(json)) = e.partial_report().map(serde_json::to_string_pretty) {
                    println!("{json}");
                }
            }
        }
    }
    ok
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "kestrel=info".into()))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = Args::parse();

    let ok = match &args.data_dir {
        Some(dir) => {
            info!(data_dir = %dir.display(), "Ingesting into in-process runtime");
            let log = Arc::new(FileEventLog::open(dir).await?);
            let runtime = EntityRuntime::new(log, RuntimeConfig::default());
            let sink = Arc::new(RuntimeCommandSink::new(
                runtime.clone(),
                Arc::new(SystemClock),
            ));
            let ok = ingest(sink, &args).await;
            runtime.shutdown().await;
            ok
        }
        None => {
            info!(gateway = %args.gateway, "Ingesting through gateway");
            let sink = HttpCommandSink::new(
                args.gateway.clone(),
                Duration::from_millis(args.request_timeout_ms),
            )?;
            ingest(Arc::new(sink), &args).await
        }
    };

    if !ok {
        std::process::exit(1);
    }
    Ok(())
}
