//! Pipe CLI Demo
//!
//! Lines typed on stdin go through a buffering pipe writer; a reader task
//! prints what it pulls out of the pipe. The flush timer decides when typed
//! lines become visible. Configure with `TEXTPIPE_*` environment variables.

use futures::StreamExt;
use textpipe::{BufferConfig, Pipe};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = BufferConfig::from_env()?;
    info!(?config, "starting demo");

    let (writer, reader) = Pipe::new(config, "demo").into_parts();

    let writer_task = tokio::spawn(async move {
        println!("Enter text (empty line to quit):");
        let mut lines = BufReader::new(tokio::io::stdin()).lines();

        while let Ok(Some(line)) = lines.next_line().await {
            let trimmed = line.trim();
            if trimmed.is_empty() {
                break;
            }
            writer.write_line(trimmed);
        }

        writer.close();
        writer.closed().await;
        println!("Writer closed");
    });

    let reader_task = tokio::spawn(async move {
        let mut chunks = Box::pin(reader.into_stream());
        while let Some(chunk) = chunks.next().await {
            match chunk {
                Ok(text) => print!("(reader): {text}"),
                Err(e) => {
                    eprintln!("(reader) Error: {e}");
                    break;
                }
            }
        }
        println!("(reader) EOF");
    });

    let (writer_result, reader_result) = tokio::join!(writer_task, reader_task);
    writer_result?;
    reader_result?;

    println!("All tasks completed");
    Ok(())
}
