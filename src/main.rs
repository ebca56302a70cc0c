//! Demo binary: runs a flaky stage under a redelivery policy.

mod cli;

use std::{
    error::Error,
    process::ExitCode,
    sync::{
        Arc,
        atomic::{AtomicU32, Ordering},
    },
    time::Duration,
};

use clap::Parser;
use redelivery::{
    ChannelProducer,
    DelayPattern,
    ErrorHandler,
    ExceptionPolicy,
    Exchange,
    Failure,
    FailureType,
    RedeliveryOverrides,
    predicate::constant,
    stage_fn,
};
use tokio::time::Instant;

fn overrides(cli: &cli::Cli) -> Result<RedeliveryOverrides, Box<dyn Error>> {
    let mut overrides = RedeliveryOverrides::default()
        .maximum_redeliveries(cli.max_redeliveries)
        .redelivery_delay(Duration::from_millis(cli.delay_ms))
        .async_delayed_redelivery(cli.async_delayed);
    if let Some(multiplier) = cli.backoff {
        overrides = overrides
            .use_exponential_back_off(true)
            .back_off_multiplier(multiplier);
    }
    if let Some(factor) = cli.jitter {
        overrides = overrides
            .use_collision_avoidance(true)
            .collision_avoidance_factor(factor);
    }
    if let Some(pattern) = &cli.delay_pattern {
        overrides = overrides.delay_pattern(pattern.parse::<DelayPattern>()?);
    }
    Ok(overrides)
}

#[tokio::main]
async fn main() -> Result<ExitCode, Box<dyn Error>> {
    // Applications embedding the library should install their own subscriber.
    tracing_subscriber::fmt::init();

    let cli = cli::Cli::parse();
    let kind = FailureType::root("Error").subtype("DemoError");
    let stage_kind = kind.clone();
    let remaining = AtomicU32::new(cli.failures);
    let stage = stage_fn(move |_: &mut Exchange| -> Result<(), Failure> {
        let left = remaining.load(Ordering::SeqCst);
        if left == 0 {
            return Ok(());
        }
        remaining.store(left - 1, Ordering::SeqCst);
        Err(Failure::new(stage_kind.clone(), format!("{left} failure(s) to go")))
    });

    let mut policy = ExceptionPolicy::builder("demo")
        .exception(kind)
        .redelivery(overrides(&cli)?);
    if cli.handled {
        policy = policy.handled(constant(true));
    }
    let mut builder = ErrorHandler::builder(stage)
        .route_id("demo")
        .exception_policy(policy);
    let mut dead_letters = None;
    if let Some(destination) = cli.dead_letter {
        let (producer, rx) = ChannelProducer::channel(16);
        builder = builder.dead_letter(destination, Arc::new(producer));
        dead_letters = Some(rx);
    }
    let handler = builder.build()?;

    let mut exchange = Exchange::new("demo payload");
    let started = Instant::now();
    let (outcome, state) = handler.process_with_state(&mut exchange).await;
    println!(
        "redeliveries: {}, last delay: {:?}, elapsed: {:?}",
        state.attempt_count(),
        state.last_computed_delay(),
        started.elapsed()
    );
    if let Some(letter) = dead_letters.as_mut().and_then(|rx| rx.try_recv().ok()) {
        println!("dead-lettered {} to {}", letter.exchange.id(), letter.destination);
    }

    Ok(match outcome {
        Ok(disposition) => {
            println!("disposition: {disposition:?}");
            ExitCode::SUCCESS
        }
        Err(failure) => {
            eprintln!("failed: {}", failure.chain());
            ExitCode::FAILURE
        }
    })
}
