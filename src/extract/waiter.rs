//! Bounded polling until an extract is ready.
//!
//! The provider produces extracts asynchronously; [`wait_for_extract`]
//! polls [`ExtractService::status`] with a growing sleep between polls.
//!
//! Only the "not yet ready" answer is retried. A failed poll request or a
//! terminal failure status ends the wait immediately.
//!
//! # Delay Calculation
//!
//! ```text
//! delay(n) = min(initial * multiplier^n, max_interval) + jitter
//! ```
//!
//! With defaults the delays are roughly 5s, 7.5s, 11s, 17s, 25s, 30s, 30s...
//!
//! Unlike the provider SDK's own wait loop, the wait is bounded by
//! [`WaitPolicy::timeout`]; a `None` timeout waits forever.

use std::time::Duration;

use rand::Rng;
use tokio::time::Instant;
use tracing::{debug, info, instrument};

use super::{ExtractHandle, ExtractService, ExtractStatus};
use crate::error::ExtractError;

/// Default delay before the second poll (5 seconds).
const DEFAULT_INITIAL_INTERVAL: Duration = Duration::from_secs(5);

/// Default cap on the delay between polls (30 seconds).
const DEFAULT_MAX_INTERVAL: Duration = Duration::from_secs(30);

/// Default growth factor between polls.
const DEFAULT_MULTIPLIER: f32 = 1.5;

/// Default upper bound on the whole wait (2 hours).
pub const DEFAULT_WAIT_TIMEOUT: Duration = Duration::from_secs(2 * 60 * 60);

/// Maximum jitter added to each delay (500ms).
const MAX_JITTER: Duration = Duration::from_millis(500);

/// Poll pacing and time budget for [`wait_for_extract`].
#[derive(Debug, Clone, PartialEq)]
pub struct WaitPolicy {
    initial_interval: Duration,
    max_interval: Duration,
    multiplier: f32,
    jitter: Duration,
    timeout: Option<Duration>,
}

impl Default for WaitPolicy {
    fn default() -> Self {
        Self {
            initial_interval: DEFAULT_INITIAL_INTERVAL,
            max_interval: DEFAULT_MAX_INTERVAL,
            multiplier: DEFAULT_MULTIPLIER,
            jitter: MAX_JITTER,
            timeout: Some(DEFAULT_WAIT_TIMEOUT),
        }
    }
}

impl WaitPolicy {
    /// Creates a policy with explicit pacing and no jitter.
    ///
    /// `max_interval` is raised to `initial_interval` if smaller, and a
    /// multiplier below 1.0 is treated as 1.0 (constant interval).
    #[must_use]
    pub fn new(
        initial_interval: Duration,
        max_interval: Duration,
        multiplier: f32,
        timeout: Option<Duration>,
    ) -> Self {
        Self {
            initial_interval,
            max_interval: max_interval.max(initial_interval),
            multiplier: multiplier.max(1.0),
            jitter: Duration::ZERO,
            timeout,
        }
    }

    /// Constant polling interval with the given timeout.
    #[must_use]
    pub fn fixed(interval: Duration, timeout: Option<Duration>) -> Self {
        Self::new(interval, interval, 1.0, timeout)
    }

    /// Returns a copy with a different overall timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Returns a copy with a different starting interval; the cap is kept
    /// at least as large.
    #[must_use]
    pub fn with_initial_interval(mut self, interval: Duration) -> Self {
        self.initial_interval = interval;
        self.max_interval = self.max_interval.max(interval);
        self
    }

    /// Overall time budget, `None` for unbounded.
    #[must_use]
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Delay before the next poll after `polls` unsuccessful polls, without jitter.
    #[must_use]
    pub fn base_delay(&self, polls: u32) -> Duration {
        let exponent = i32::try_from(polls.saturating_sub(1)).unwrap_or(i32::MAX);
        let factor = f64::from(self.multiplier).powi(exponent);
        let scaled = self.initial_interval.as_secs_f64() * factor;
        let capped = scaled.min(self.max_interval.as_secs_f64());
        Duration::from_secs_f64(capped)
    }

    fn delay(&self, polls: u32) -> Duration {
        let base = self.base_delay(polls);
        if self.jitter.is_zero() {
            return base;
        }
        let jitter_ms = u64::try_from(self.jitter.as_millis()).unwrap_or(u64::MAX);
        base + Duration::from_millis(rand::thread_rng().gen_range(0..=jitter_ms))
    }
}

/// Polls `service` until `handle` is ready.
///
/// `on_status` is called with every status observed, for progress display.
///
/// # Errors
///
/// - [`ExtractError::RemoteService`] if a poll fails or the extract ends in
///   a failure status
/// - [`ExtractError::Cancelled`] if the policy's timeout elapses first
#[instrument(skip(service, policy, on_status), fields(extract = %handle))]
pub async fn wait_for_extract(
    service: &dyn ExtractService,
    handle: &ExtractHandle,
    policy: &WaitPolicy,
    on_status: &(dyn Fn(&ExtractStatus) + Send + Sync),
) -> Result<(), ExtractError> {
    let started = Instant::now();
    let mut polls: u32 = 0;

    loop {
        let status = service.status(handle).await?;
        polls = polls.saturating_add(1);
        on_status(&status);

        if status.is_ready() {
            info!(polls, waited_secs = started.elapsed().as_secs(), "extract ready");
            return Ok(());
        }
        if status.is_failure() {
            return Err(ExtractError::remote(
                "status",
                format!("extract {handle} ended with status {status}"),
            ));
        }

        let mut delay = policy.delay(polls);
        if let Some(timeout) = policy.timeout {
            let elapsed = started.elapsed();
            if elapsed >= timeout {
                return Err(ExtractError::cancelled(
                    handle.to_string(),
                    elapsed.as_secs(),
                    status.to_string(),
                ));
            }
            delay = delay.min(timeout - elapsed);
        }

        debug!(%status, polls, delay_ms = delay.as_millis() as u64, "extract not ready; sleeping");
        tokio::time::sleep(delay).await;
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::path::{Path, PathBuf};
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::error::ErrorKind;
    use crate::extract::ExtractRequest;

    /// Replays a scripted list of statuses; the last one repeats.
    struct ScriptedService {
        script: Mutex<Vec<Result<ExtractStatus, ExtractError>>>,
        polls: AtomicUsize,
    }

    impl ScriptedService {
        fn new(script: Vec<Result<ExtractStatus, ExtractError>>) -> Self {
            Self {
                script: Mutex::new(script),
                polls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl ExtractService for ScriptedService {
        async fn submit(&self, request: &ExtractRequest) -> Result<ExtractHandle, ExtractError> {
            Ok(ExtractHandle::new(request.collection(), 1))
        }

        async fn status(&self, _handle: &ExtractHandle) -> Result<ExtractStatus, ExtractError> {
            self.polls.fetch_add(1, Ordering::SeqCst);
            let mut script = self.script.lock().unwrap();
            if script.len() > 1 {
                script.remove(0)
            } else {
                match &script[0] {
                    Ok(status) => Ok(status.clone()),
                    Err(_) => Err(ExtractError::remote("status", "scripted failure")),
                }
            }
        }

        async fn download(
            &self,
            _handle: &ExtractHandle,
            _dir: &Path,
        ) -> Result<Vec<PathBuf>, ExtractError> {
            Ok(Vec::new())
        }
    }

    fn fast_policy(timeout: Option<Duration>) -> WaitPolicy {
        WaitPolicy::fixed(Duration::from_millis(5), timeout)
    }

    fn ignore(_: &ExtractStatus) {}

    #[test]
    fn test_default_policy_delays_grow_and_cap() {
        let policy = WaitPolicy::default();
        assert_eq!(policy.base_delay(1), Duration::from_secs(5));
        assert_eq!(policy.base_delay(2), Duration::from_millis(7500));
        assert!(policy.base_delay(3) > policy.base_delay(2));
        assert_eq!(policy.base_delay(20), Duration::from_secs(30));
        assert_eq!(policy.timeout(), Some(DEFAULT_WAIT_TIMEOUT));
    }

    #[test]
    fn test_policy_new_clamps_inputs() {
        let policy = WaitPolicy::new(Duration::from_secs(10), Duration::from_secs(1), 0.5, None);
        assert_eq!(policy.base_delay(1), Duration::from_secs(10));
        assert_eq!(policy.base_delay(5), Duration::from_secs(10));
    }

    #[test]
    fn test_jittered_delay_stays_within_bounds() {
        let policy = WaitPolicy::default();
        for _ in 0..50 {
            let delay = policy.delay(1);
            assert!(delay >= Duration::from_secs(5));
            assert!(delay <= Duration::from_secs(5) + MAX_JITTER);
        }
    }

    #[tokio::test]
    async fn test_wait_returns_when_completed() {
        let service = ScriptedService::new(vec![
            Ok(ExtractStatus::Queued),
            Ok(ExtractStatus::Started),
            Ok(ExtractStatus::Produced),
            Ok(ExtractStatus::Completed),
        ]);
        let handle = ExtractHandle::new("cps", 1);
        let seen = Mutex::new(Vec::new());
        let record = |status: &ExtractStatus| seen.lock().unwrap().push(status.to_string());

        wait_for_extract(&service, &handle, &fast_policy(None), &record)
            .await
            .unwrap();

        assert_eq!(service.polls.load(Ordering::SeqCst), 4);
        assert_eq!(
            *seen.lock().unwrap(),
            vec!["queued", "started", "produced", "completed"]
        );
    }

    #[tokio::test]
    async fn test_wait_fails_on_terminal_failure_status() {
        let service = ScriptedService::new(vec![Ok(ExtractStatus::Queued), Ok(ExtractStatus::Failed)]);
        let handle = ExtractHandle::new("cps", 1);

        let err = wait_for_extract(&service, &handle, &fast_policy(None), &ignore)
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::RemoteService);
        assert!(err.to_string().contains("failed"));
        assert_eq!(service.polls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_wait_does_not_retry_poll_errors() {
        let service = ScriptedService::new(vec![Err(ExtractError::remote("status", "boom"))]);
        let handle = ExtractHandle::new("cps", 1);

        let err = wait_for_extract(&service, &handle, &fast_policy(None), &ignore)
            .await
            .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::RemoteService);
        assert_eq!(service.polls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_wait_times_out_with_cancelled() {
        let service = ScriptedService::new(vec![Ok(ExtractStatus::Started)]);
        let handle = ExtractHandle::new("cps", 9);

        let err = wait_for_extract(
            &service,
            &handle,
            &fast_policy(Some(Duration::from_millis(40))),
            &ignore,
        )
        .await
        .unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Cancelled);
        assert!(err.to_string().contains("cps:9"));
        assert!(service.polls.load(Ordering::SeqCst) >= 2);
    }
}
