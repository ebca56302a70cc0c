//! Command line interface for the `redelivery` demo binary.
//!
//! The binary runs one exchange through a stage that fails a configurable
//! number of times and reports how the error handler disposed of it.

use clap::Parser;

/// Command line arguments for the `redelivery` binary.
#[derive(Debug, Parser)]
#[command(
    name = "redelivery",
    version,
    about = "Run a flaky stage under a redelivery policy"
)]
pub struct Cli {
    /// Redeliveries allowed before exhaustion; negative means unlimited.
    #[arg(short = 'm', long, default_value_t = 3, allow_negative_numbers = true)]
    pub max_redeliveries: i32,

    /// Base delay between redeliveries, in milliseconds.
    #[arg(short, long, default_value_t = 100)]
    pub delay_ms: u64,

    /// Number of times the stage fails before succeeding.
    #[arg(short, long, default_value_t = 2)]
    pub failures: u32,

    /// Enable exponential back-off with this multiplier.
    #[arg(long)]
    pub backoff: Option<f64>,

    /// Enable collision avoidance with this factor (0.0 to 1.0).
    #[arg(long)]
    pub jitter: Option<f64>,

    /// Stepped delays as `threshold:millis` pairs, e.g. `0:100;3:1000`.
    #[arg(long)]
    pub delay_pattern: Option<String>,

    /// Send exhausted exchanges to this fallback destination.
    #[arg(long)]
    pub dead_letter: Option<String>,

    /// Wait for redeliveries on the scheduler instead of inline.
    #[arg(long)]
    pub async_delayed: bool,

    /// Mark the failure handled instead of redelivering.
    #[arg(long)]
    pub handled: bool,
}
