use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use callgate::config::{CallgateConfig, LoggingConfig};
use callgate::{Policy, RateLimiter};

/// How often the pending window is checked after stdin closes.
const DRAIN_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Rate-limit lines read from stdin and echo the ones that run.
#[derive(Debug, Parser)]
#[command(name = "callgate", version, about)]
struct Args {
    /// YAML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Policy: trailing, leading or throttle
    #[arg(short, long)]
    policy: Option<Policy>,

    /// Window length in milliseconds
    #[arg(short, long, allow_negative_numbers = true)]
    delay_ms: Option<i64>,

    /// Emit logs as JSON lines
    #[arg(long)]
    log_json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = match args.config {
        Some(ref path) => CallgateConfig::from_file(path)?,
        None => CallgateConfig::default(),
    };
    if let Some(policy) = args.policy {
        config.limiter.policy = policy;
    }
    if let Some(delay_ms) = args.delay_ms {
        config.limiter.delay_ms = delay_ms;
    }
    config.logging.json |= args.log_json;
    config.validate()?;

    init_tracing(&config.logging);

    info!("Starting callgate");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let limiter = RateLimiter::from_config(&config.limiter, |line: String| {
        println!("{}", line);
    })?;
    info!(
        limiter = %limiter.name(),
        policy = %limiter.policy(),
        delay_ms = limiter.delay().as_millis() as u64,
        "Rate limiter initialized"
    );

    tokio::select! {
        result = pump_stdin(&limiter) => result?,
        _ = shutdown_signal() => {
            limiter.cancel();
        }
    }

    info!("callgate stopped");
    Ok(())
}

fn init_tracing(logging: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&logging.level));

    // Logs go to stderr so stdout only carries executed lines
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr);

    if logging.json {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Feed every stdin line to the limiter, then wait for the last window to close.
async fn pump_stdin(limiter: &RateLimiter<String>) -> anyhow::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    while let Some(line) = lines.next_line().await? {
        limiter.call(line);
    }

    drain(limiter).await;
    Ok(())
}

/// Wait until the limiter has performed its deferred run, if it holds one.
async fn drain(limiter: &RateLimiter<String>) {
    // A leading cool-down has nothing left to run
    if !limiter.policy().defers_run() {
        return;
    }

    info!("stdin closed, waiting for pending window");
    while limiter.is_pending() {
        tokio::time::sleep(DRAIN_POLL_INTERVAL).await;
    }
}

/// Wait for a shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        }
        _ = terminate => {
            info!("Received SIGTERM, shutting down");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use parking_lot::Mutex;
    use tokio::time::Instant;

    #[test]
    fn test_negative_delay_reaches_validation() {
        let args = Args::try_parse_from(["callgate", "--delay-ms", "-5"]).unwrap();
        assert_eq!(args.delay_ms, Some(-5));

        let mut config = CallgateConfig::default();
        config.limiter.delay_ms = args.delay_ms.unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_parse_policy_flag() {
        let args = Args::try_parse_from(["callgate", "-p", "throttle", "-d", "250"]).unwrap();
        assert_eq!(args.policy, Some(Policy::Throttle));
        assert_eq!(args.delay_ms, Some(250));
    }

    async fn drain_duration(policy: Policy) -> (Duration, usize) {
        let runs = Arc::new(Mutex::new(0));
        let sink = runs.clone();
        let limiter = RateLimiter::new(
            move |_: String| *sink.lock() += 1,
            Duration::from_millis(1000),
            policy,
        )
        .unwrap();

        limiter.call("line".to_string());

        let start = Instant::now();
        drain(&limiter).await;
        let ran = *runs.lock();
        (start.elapsed(), ran)
    }

    #[tokio::test(start_paused = true)]
    async fn test_leading_drain_does_not_wait_cool_down() {
        let (waited, runs) = drain_duration(Policy::Leading).await;
        assert_eq!(waited, Duration::ZERO);
        assert_eq!(runs, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_trailing_drain_stops_shortly_after_run() {
        let (waited, runs) = drain_duration(Policy::Trailing).await;
        assert_eq!(runs, 1);
        assert!(waited >= Duration::from_millis(1000));
        assert!(waited < Duration::from_millis(1000) + DRAIN_POLL_INTERVAL * 2);
    }
}
