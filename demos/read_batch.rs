//! Read Batch - detects and reads a batch from stdin.
//!
//! This example demonstrates:
//! - Buffering an asynchronous source once
//! - Detecting the payload kind before parsing
//! - Walking the reader state by state and reading operation bodies
//!
//! # Running
//!
//! ```text
//! cargo run --example write_batch 2>/dev/null \
//!     | RUST_LOG=batchwire=trace cargo run --example read_batch -- \
//!         "multipart/mixed; boundary=batch_36522ad7"
//! ```

use batchwire::batch::{BatchReader, BatchReaderSettings, BatchReaderState};
use batchwire::format::{BufferedMessage, PayloadKind, PayloadKindResolver};
use batchwire::protocol::Headers;
use batchwire::stream::ExecutionMode;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let content_type = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "multipart/mixed; boundary=batch_36522ad7".to_string());

    let headers = Headers::new().with("Content-Type", content_type);
    let mut message = BufferedMessage::from_source(headers, tokio::io::stdin()).await?;
    println!("buffered {} bytes", message.buffer().len());

    let resolver = PayloadKindResolver::default();
    let candidates = resolver.detect_async(&mut message).await?;
    for candidate in &candidates {
        println!("candidate: {} (format {})", candidate.kind, candidate.format);
    }
    if !candidates.iter().any(|c| c.kind == PayloadKind::Batch) {
        println!("not a batch");
        return Ok(());
    }

    let mut reader = BatchReader::from_message(
        &mut message,
        BatchReaderSettings::default(),
        ExecutionMode::Suspending,
    )?;

    while reader.read_async().await? {
        match reader.state() {
            BatchReaderState::ChangesetStart => {
                println!("changeset {}", reader.changeset_boundary().unwrap_or_default());
            }
            BatchReaderState::ChangesetEnd => println!("end of changeset"),
            BatchReaderState::Operation => {
                let operation = reader.operation().cloned();
                let body = reader.read_body_async().await?;
                if let Some(operation) = operation {
                    println!(
                        "  {} {} content-id={:?} depends-on={:?} body={} bytes",
                        operation.method().unwrap_or("-"),
                        operation.url().unwrap_or("-"),
                        operation.content_id,
                        operation.depends_on_ids,
                        body.len()
                    );
                }
            }
            _ => {}
        }
    }

    println!("completed");
    Ok(())
}
