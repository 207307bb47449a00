use backon::{ConstantBuilder, Retryable};
use cloudrt_core::{FailureSignal, RawError, RetryPolicy};
use std::future::Future;
use std::io;
use std::time::Duration;
use tracing::warn;

/// Failures worth another attempt: throttling, 5xx, dropped connections.
pub fn is_transient(err: &RawError) -> bool {
    match &err.signal {
        FailureSignal::HttpStatus(status) => {
            *status == 429 || ((500..=599).contains(status) && *status != 504)
        }
        FailureSignal::VendorCode(code) => {
            let code = code.to_ascii_lowercase();
            code.starts_with("throttling") || code == "serviceunavailable"
        }
        FailureSignal::Io(kind) => matches!(
            kind,
            io::ErrorKind::ConnectionReset
                | io::ErrorKind::ConnectionAborted
                | io::ErrorKind::BrokenPipe
                | io::ErrorKind::WouldBlock
        ),
        _ => false,
    }
}

/// Run `op` until it succeeds, fails permanently, or `policy` runs out of attempts.
pub async fn with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    operation: &str,
    op: F,
) -> Result<T, RawError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, RawError>>,
{
    let max_attempts = policy.max_attempts().max(1);
    let backoff = ConstantBuilder::default()
        .with_delay(policy.backoff())
        .with_max_times((max_attempts - 1) as usize);

    let mut attempt = 1u32;
    op.retry(backoff)
        .sleep(tokio::time::sleep)
        .when(is_transient)
        .notify(move |err: &RawError, delay: Duration| {
            warn!(
                operation,
                attempt,
                max_attempts,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "Transient provider failure, retrying"
            );
            attempt += 1;
        })
        .await
}
