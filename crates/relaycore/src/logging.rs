//! Logging initialization
//!
//! The code base logs through the `log` facade; records are forwarded into a
//! `tracing` subscriber so that worker spans (one per bot) decorate every line.

use anyhow::Result;
use tracing_subscriber::fmt;
use tracing_subscriber::prelude::*;
use tracing_subscriber::EnvFilter;

/// Filter used when `RUST_LOG` is not set
pub const DEFAULT_FILTER: &str = "info";

/// Maximum characters of a payload echoed into log lines
pub const PAYLOAD_PREVIEW_CHARS: usize = 50;

/// Initialize the global logger (stderr, env-filtered)
///
/// # Returns
/// * `Ok(())` - Logger initialized successfully
/// * `Err(anyhow::Error)` - A logger was already installed
pub fn init_logger() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let subscriber = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(true).with_writer(std::io::stderr));

    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| anyhow::anyhow!("Failed to initialize logger: {}", e))?;
    tracing_log::LogTracer::init().map_err(|e| anyhow::anyhow!("Failed to bridge log records: {}", e))?;

    Ok(())
}

/// Lossy, length-capped rendering of a raw payload for log lines.
pub fn payload_preview(payload: &[u8]) -> String {
    let text = String::from_utf8_lossy(payload);
    let mut preview: String = text.chars().take(PAYLOAD_PREVIEW_CHARS).collect();
    if text.chars().count() > PAYLOAD_PREVIEW_CHARS {
        preview.push('…');
    }
    preview
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_logger_twice_fails_second_time() {
        // Another test may already have installed a logger in this process;
        // only the second call is guaranteed to fail.
        let _ = init_logger();
        assert!(init_logger().is_err());
    }

    #[test]
    fn test_payload_preview_truncates() {
        let long = "x".repeat(80);
        let preview = payload_preview(long.as_bytes());
        assert_eq!(preview.chars().count(), PAYLOAD_PREVIEW_CHARS + 1);
        assert!(preview.ends_with('…'));

        assert_eq!(payload_preview(b"{\"update_id\":1}"), "{\"update_id\":1}");
    }

    #[test]
    fn test_payload_preview_handles_invalid_utf8() {
        let preview = payload_preview(&[0xff, 0xfe, b'a']);
        assert!(preview.ends_with('a'));
    }
}
