//! Example: Parse a saved message and store its attachments, without a server.
//!
//! # Usage
//!
//! ```bash
//! cargo run --example parse_eml -- message.eml [output-dir]
//! ```

use mail_ingest::{parse, AttachmentStore};
use std::env;

#[tokio::main]
async fn main() -> mail_ingest::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter("mail_ingest=debug")
        .init();

    let mut args = env::args().skip(1);
    let path = args.next().expect("usage: parse_eml <message.eml> [output-dir]");
    let output = args.next().unwrap_or_else(|| "attachments".to_string());

    let raw = tokio::fs::read(&path).await.expect("readable message file");
    let message = parse(&raw)?;

    println!("From:    {}", message.from.as_deref().unwrap_or("-"));
    println!("To:      {}", message.to.as_deref().unwrap_or("-"));
    println!("Subject: {}", message.subject.as_deref().unwrap_or("-"));
    println!(
        "Date:    {}",
        message.date.map_or_else(|| "-".to_string(), |d| d.to_rfc3339())
    );
    if let Some(text) = &message.text {
        println!("\n{}\n", text.trim());
    }

    for attachment in &message.attachments {
        println!(
            "  {} ({}, {} bytes{})",
            attachment.filename,
            attachment.content_type,
            attachment.size(),
            if attachment.generated_name { ", generated name" } else { "" }
        );
    }

    let report = AttachmentStore::new(output).persist(&message).await;
    if let Some(directory) = &report.directory {
        println!("\nWrote {} file(s) to {}", report.written.len(), directory.display());
    }
    for (filename, error) in &report.failed {
        println!("Failed to write {filename}: {error}");
    }

    Ok(())
}
