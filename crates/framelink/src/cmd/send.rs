use std::fs;
use std::time::Duration;

use framelink::client::{ClientConfig, ClientError, ConnectionManager, ConnectionState};
use framelink::transport::WebSocketTransport;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::cmd::SendArgs;
use crate::exit::{client_error, io_error, CliError, CliResult, SUCCESS, TIMEOUT, USAGE};
use crate::output::{print_message, OutputFormat};

pub fn run(args: SendArgs, format: OutputFormat) -> CliResult<i32> {
    let plan = Plan {
        interval: parse_duration(&args.interval)?,
        timeout: parse_duration(&args.timeout)?,
        config: ClientConfig {
            max_reconnect_attempts: args.retries,
            reconnect_delay: parse_duration(&args.retry_delay)?,
            confidence: args.confidence,
        },
        payload: resolve_payload(&args)?,
        count: args.count,
        wait: args.wait,
    };

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|err| io_error("runtime setup failed", err))?;
    runtime.block_on(stream(&args.endpoint, plan, format))
}

/// How long queued frames get to reach the endpoint after the last one.
const FLUSH_GRACE: Duration = Duration::from_secs(2);

struct Plan {
    interval: Duration,
    timeout: Duration,
    config: ClientConfig,
    payload: Vec<u8>,
    count: usize,
    wait: usize,
}

enum Step {
    Pumped,
    Tick,
    Inbound(Value),
    TimedOut,
    Interrupted,
}

async fn stream(endpoint: &str, plan: Plan, format: OutputFormat) -> CliResult<i32> {
    let mut client = ConnectionManager::new(WebSocketTransport::new(), plan.config);
    let (inbox_tx, mut inbox) = mpsc::unbounded_channel();
    client.on_message(move |message| {
        let _ = inbox_tx.send(message.clone());
    });
    client.connect(endpoint);

    let mut ticker = tokio::time::interval(plan.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let deadline = tokio::time::sleep(plan.timeout);
    tokio::pin!(deadline);
    let interrupted = tokio::signal::ctrl_c();
    tokio::pin!(interrupted);

    let mut sent = 0usize;
    let mut received = 0usize;

    while sent < plan.count || received < plan.wait {
        if client.state() == ConnectionState::Exhausted {
            let attempts = client.retry().attempts();
            return Err(client_error(
                &format!("giving up on {endpoint}"),
                ClientError::RetryExhausted { attempts },
            ));
        }

        let step = tokio::select! {
            () = client.run_once() => Step::Pumped,
            _ = ticker.tick(), if sent < plan.count => Step::Tick,
            Some(message) = inbox.recv() => Step::Inbound(message),
            () = &mut deadline => Step::TimedOut,
            _ = &mut interrupted => Step::Interrupted,
        };

        match step {
            Step::Pumped => {}
            // Ticks while not open are skipped; frames are never queued.
            Step::Tick if client.is_open() => {
                client.send_frame(&plan.payload);
                sent += 1;
                debug!(sent, bytes = plan.payload.len(), "frame sent");
            }
            Step::Tick => debug!(state = ?client.state(), "not open, skipping frame"),
            Step::Inbound(message) => {
                print_message(&message, format);
                received += 1;
            }
            Step::TimedOut => {
                shut_down(&mut client).await;
                return Err(CliError::new(
                    TIMEOUT,
                    format!("timed out after {sent} frames sent and {received} messages received"),
                ));
            }
            Step::Interrupted => {
                info!(sent, received, "interrupted");
                shut_down(&mut client).await;
                return Ok(SUCCESS);
            }
        }
    }

    info!(sent, received, "done");
    shut_down(&mut client).await;
    Ok(SUCCESS)
}

/// Close the session and wait for frames it already accepted to go out.
async fn shut_down(client: &mut ConnectionManager<WebSocketTransport>) {
    client.disconnect();
    if tokio::time::timeout(FLUSH_GRACE, client.transport().wait_idle())
        .await
        .is_err()
    {
        warn!(grace = ?FLUSH_GRACE, "session did not close in time");
    }
}

fn resolve_payload(args: &SendArgs) -> CliResult<Vec<u8>> {
    if let Some(data) = &args.data {
        return Ok(data.as_bytes().to_vec());
    }
    if let Some(path) = &args.file {
        return fs::read(path)
            .map_err(|err| io_error(&format!("failed reading {}", path.display()), err));
    }
    Ok(Vec::new())
}

fn parse_duration(input: &str) -> CliResult<Duration> {
    let input = input.trim();
    if input.is_empty() {
        return Err(CliError::new(USAGE, "duration must not be empty"));
    }

    let (number, unit) = if let Some(num) = input.strip_suffix("ms") {
        (num, "ms")
    } else if let Some(num) = input.strip_suffix('s') {
        (num, "s")
    } else {
        (input, "s")
    };

    let value: u64 = number
        .parse()
        .map_err(|_| CliError::new(USAGE, format!("invalid duration value: {input}")))?;

    if value == 0 {
        return Err(CliError::new(USAGE, "duration must be greater than zero"));
    }

    match unit {
        "ms" => Ok(Duration::from_millis(value)),
        _ => Ok(Duration::from_secs(value)),
    }
}
