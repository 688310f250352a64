//! `ask`: submit a question to a streaming workflow endpoint and print the
//! answer as it arrives.

mod args;

use std::io::Write as _;
use std::sync::Arc;

use answer_stream::{
    HttpTransport, RetryingStreamer, StreamError, StreamObserver, StreamingChunk, StreamingStatus,
};
use clap::Parser as _;

use crate::args::Cli;

/// Writes answer text to stdout. Failures surface through `main`'s result.
struct PrintObserver;

impl StreamObserver for PrintObserver {
    fn on_chunk(&self, chunk: &StreamingChunk) {
        let mut out = std::io::stdout().lock();
        let _ = write!(out, "{}", chunk.content);
        let _ = out.flush();
    }

    fn on_complete(&self, _content: &str) {
        println!();
    }

    fn on_status_change(&self, status: StreamingStatus) {
        tracing::debug!(%status, "session status");
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    answer_stream::init_observability();

    let cli = Cli::parse();
    let request = cli.build_request()?;
    let transport = Arc::new(HttpTransport::new(cli.client_config())?);
    let streamer = RetryingStreamer::new(transport, cli.retry_config());

    let abort = streamer.abort_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            abort.abort();
        }
    });

    let mut client = match streamer.start(&request, Arc::new(PrintObserver)).await {
        Ok(client) => client,
        Err(StreamError::Cancelled) => {
            eprintln!("cancelled");
            return Ok(());
        }
        Err(err) => return Err(err.into()),
    };

    if client.run().await? == StreamingStatus::Cancelled {
        eprintln!("\ncancelled");
    }
    Ok(())
}
