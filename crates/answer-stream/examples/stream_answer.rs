use std::sync::Arc;

use answer_stream::prelude::*;

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), StreamError> {
    answer_stream::init_observability();

    let transport = Arc::new(HttpTransport::from_env()?);
    let request = StreamingRequest::builder("Summarize how server-sent events work.")
        .model("gpt-4o-mini")
        .build()?;

    let (observer, mut events) = event_channel();
    let mut client = StreamingClient::new(transport, Arc::new(observer));
    let session = tokio::spawn(async move { client.start_streaming(&request).await });

    while let Some(event) = events.next_event().await {
        match event {
            StreamEvent::Chunk(chunk) => print!("{}", chunk.content),
            StreamEvent::Complete(_) => {
                println!();
                break;
            }
            StreamEvent::Error(message) => {
                eprintln!("stream error: {message}");
                break;
            }
            StreamEvent::Status(StreamingStatus::Cancelled) => break,
            StreamEvent::Status(_) => {}
        }
    }

    session
        .await
        .map_err(|e| StreamError::Protocol(format!("session task failed: {e}")))??;
    Ok(())
}
