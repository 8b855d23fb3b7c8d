#![allow(dead_code)]

use std::time::Duration;
use textpipe::Emission;
use tokio::sync::mpsc;

/// Upper bound for any single wait in the tests
pub const WAIT: Duration = Duration::from_secs(2);

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}

pub async fn next_emission(rx: &mut mpsc::UnboundedReceiver<Emission>) -> Emission {
    tokio::time::timeout(WAIT, rx.recv())
        .await
        .expect("timed out waiting for an emission")
        .expect("sink channel closed")
}

pub fn chunk(text: &str) -> Emission {
    Emission::Chunk(text.to_string())
}
