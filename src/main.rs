mod annotate;
mod capture;
mod document;
mod model;
mod prompt;
mod server;

use std::sync::Arc;

use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::capture::FrameStrategy;
use crate::model::OpenAiCaptioner;
use crate::server::AppState;

#[derive(Parser)]
#[command(name = "captionai")]
#[command(about = "Caption video frames with a vision-language model", long_about = None)]
struct Cli {
    /// Port to listen on.
    #[arg(long, default_value_t = 5000)]
    port: u16,
    /// Run with production logging.
    #[arg(long)]
    production: bool,
    /// Interval between sampled frames when no timeframes are present.
    #[arg(long, default_value_t = 10)]
    frame_interval: u64,
    /// Batch size for prompt+image pairs.
    #[arg(long, default_value_t = 4)]
    batch_size: usize,
    /// Which frame stands in for a timeframe.
    #[arg(long, value_enum, default_value = "midpoint")]
    frame_strategy: FrameStrategy,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.production {
        "captionai=info,tower_http=info"
    } else {
        "captionai=debug,tower_http=debug"
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    capture::init();

    let state = AppState {
        model: Arc::new(OpenAiCaptioner::new()),
        strategy: cli.frame_strategy,
        frame_interval: cli.frame_interval,
        batch_size: cli.batch_size,
    };
    server::serve(state, cli.port).await
}
