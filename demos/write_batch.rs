//! Write Batch - builds a batch with a change-set and prints it.
//!
//! This example demonstrates:
//! - Writing standalone operations and a change-set
//! - Streaming operation bodies through scoped writers
//! - Referencing an earlier operation with `$<Content-ID>`
//!
//! # Running
//!
//! ```text
//! cargo run --example write_batch > batch.txt
//! cargo run --example read_batch -- "multipart/mixed; boundary=batch_36522ad7" < batch.txt
//! ```

use std::io::Write;

use batchwire::batch::{BatchWriter, BatchWriterSettings, OutgoingOperation};
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let mut writer = BatchWriter::new("batch_36522ad7", BatchWriterSettings::default())?;
    writer.write_start_batch()?;

    writer
        .create_operation(
            OutgoingOperation::request("GET", "http://tempuri.org/Customers?$top=2")
                .header("Accept", "application/json"),
        )?
        .release()?;

    writer.write_start_changeset("changeset_77162fcd")?;
    {
        let mut body = writer.create_operation(
            OutgoingOperation::request("POST", "http://tempuri.org/Customers")
                .content_id("1")
                .header("Content-Type", "application/json"),
        )?;
        let outcome = body
            .stream()
            .and_then(|sink| Ok(sink.write_all(br#"{"Name":"Contoso"}"#)?));
        body.release_with(outcome)?;
    }
    {
        let mut body = writer.create_operation(
            OutgoingOperation::request("POST", "$1/Orders")
                .content_id("2")
                .header("Content-Type", "application/json"),
        )?;
        let outcome = body
            .stream()
            .and_then(|sink| Ok(sink.write_all(br#"{"Total":12}"#)?));
        body.release_with(outcome)?;
    }
    writer.write_end_changeset()?;
    writer.write_end_batch()?;

    eprintln!("Content-Type: {}", writer.content_type());
    writer.write_to(std::io::stdout().lock())?;
    Ok(())
}
