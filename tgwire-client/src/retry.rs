//! Retry policies for `FLOOD_WAIT`, server hiccups and transient I/O errors.
//!
//! DC migrations are not a policy decision; [`crate::Client::invoke`] always
//! follows them.

use std::num::NonZeroU32;
use std::ops::ControlFlow;
use std::time::Duration;

use crate::errors::{ConnectionError, InvocationError};

/// Longest flood wait anyone may choose to sleep through.
pub const MAX_FLOOD_SLEEP: Duration = Duration::from_secs(24 * 60 * 60);

/// Controls how the client reacts when an RPC call fails.
pub trait RetryPolicy: Send + Sync + 'static {
    /// `Continue(delay)` to sleep and retry, `Break` to surface the error.
    fn should_retry(&self, ctx: &RetryContext) -> ControlFlow<(), Duration>;
}

/// Context passed to [`RetryPolicy::should_retry`] on each failure.
pub struct RetryContext {
    pub fail_count: NonZeroU32,
    pub slept_so_far: Duration,
    pub error: InvocationError,
}

/// Never retry.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoRetries;

impl RetryPolicy for NoRetries {
    fn should_retry(&self, _: &RetryContext) -> ControlFlow<(), Duration> {
        ControlFlow::Break(())
    }
}

/// Sleep through short flood waits and server errors.
#[derive(Clone, Debug)]
pub struct AutoSleep {
    /// Flood waits up to this long are slept through.
    pub threshold: Duration,
    /// Pause before retrying `500`, `RPC_CALL_FAIL` and `RPC_MCGET_FAIL`.
    pub server_error_delay: Duration,
    /// Retry once after this long when the connection failed underneath.
    pub io_errors_as_flood_of: Option<Duration>,
}

impl AutoSleep {
    /// `threshold` is capped at [`MAX_FLOOD_SLEEP`].
    pub fn new(threshold: Duration) -> Self {
        Self { threshold: threshold.min(MAX_FLOOD_SLEEP), ..Self::default() }
    }
}

impl Default for AutoSleep {
    fn default() -> Self {
        Self {
            threshold: Duration::from_secs(60),
            server_error_delay: Duration::from_secs(2),
            io_errors_as_flood_of: Some(Duration::from_secs(1)),
        }
    }
}

impl RetryPolicy for AutoSleep {
    fn should_retry(&self, ctx: &RetryContext) -> ControlFlow<(), Duration> {
        if let Some(secs) = ctx.error.flood_wait_seconds() {
            let wait = Duration::from_secs(secs);
            if wait <= self.threshold.min(MAX_FLOOD_SLEEP) {
                tracing::info!("[client] sleeping {secs}s on flood wait before retrying");
                return ControlFlow::Continue(wait);
            }
            return ControlFlow::Break(());
        }

        if let InvocationError::Rpc(rpc) = &ctx.error {
            if rpc.is_server_error() {
                tracing::info!("[client] server error {rpc}, retrying in {:?}", self.server_error_delay);
                return ControlFlow::Continue(self.server_error_delay);
            }
        }

        if matches!(ctx.error, InvocationError::Connection(ConnectionError::Io(_))) && ctx.fail_count.get() == 1 {
            if let Some(d) = self.io_errors_as_flood_of {
                tracing::info!("[client] I/O error, sleeping {d:?} before retrying");
                return ControlFlow::Continue(d);
            }
        }
        ControlFlow::Break(())
    }
}
