//! Readiness polling
//!
//! Fixed-interval polling with a hard attempt budget. The primitive never
//! cleans up after itself; callers decide what exhaustion means.

use std::future::Future;
use std::net::Ipv4Addr;
use std::time::Duration;
use tracing::debug;

use crate::error::{VpnError, VpnResult};
use crate::host::Host;

/// `(interval, max_attempts)` for a bounded poll
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub interval: Duration,
    pub max_attempts: u32,
}

impl RetryPolicy {
    pub fn new(interval: Duration, max_attempts: u32) -> Self {
        Self { interval, max_attempts }
    }

    /// Wall-clock budget reported in timeout messages
    pub fn budget(&self) -> Duration {
        self.interval * self.max_attempts
    }
}

/// What a successful readiness probe found
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Readiness {
    pub address: Option<Ipv4Addr>,
}

/// Call `probe` up to `max_attempts` times, sleeping `interval` between
/// attempts, until it yields a value.
///
/// Dropping the returned future cancels the poll.
pub async fn poll_until<T, F, Fut>(policy: RetryPolicy, mut probe: F) -> Option<T>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Option<T>>,
{
    for attempt in 1..=policy.max_attempts {
        if let Some(value) = probe(attempt).await {
            debug!("Poll satisfied on attempt {}/{}", attempt, policy.max_attempts);
            return Some(value);
        }
        if attempt < policy.max_attempts {
            tokio::time::sleep(policy.interval).await;
        }
    }
    None
}

/// Poll a readiness probe, mapping exhaustion to `ConnectTimeout` for `target`
pub async fn wait_until_ready<F, Fut>(policy: RetryPolicy, target: &str, mut probe: F) -> VpnResult<Readiness>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Option<Readiness>>,
{
    poll_until(policy, |_| probe())
        .await
        .ok_or_else(|| VpnError::ConnectTimeout {
            interface: target.to_string(),
            waited_secs: policy.budget().as_secs(),
        })
}

/// One readiness check: the interface exists and holds an IPv4 address
pub async fn probe_interface(host: &dyn Host, interface: &str) -> Option<Readiness> {
    if !host.interface_exists(interface).await {
        return None;
    }
    host.interface_ipv4(interface)
        .await
        .map(|address| Readiness { address: Some(address) })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::MockHost;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;
    use tokio::time::Instant;

    #[tokio::test(start_paused = true)]
    async fn test_poll_succeeds_midway() {
        let start = Instant::now();
        let calls = AtomicU32::new(0);
        let result = poll_until(RetryPolicy::new(Duration::from_secs(1), 10), |attempt| {
            calls.fetch_add(1, Ordering::SeqCst);
            async move { (attempt == 4).then_some(attempt) }
        })
        .await;

        assert_eq!(result, Some(4));
        assert_eq!(calls.load(Ordering::SeqCst), 4);
        // Three sleeps between four attempts, no backoff
        assert_eq!(start.elapsed(), Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_poll_exhaustion_has_no_trailing_sleep() {
        let start = Instant::now();
        let result: Option<()> = poll_until(RetryPolicy::new(Duration::from_secs(1), 15), |_| async { None }).await;

        assert_eq!(result, None);
        assert_eq!(start.elapsed(), Duration::from_secs(14));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_message() {
        let err = wait_until_ready(RetryPolicy::new(Duration::from_secs(1), 15), "tun0", || async { None })
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "tun0 not detected after 15s");
    }

    #[tokio::test(start_paused = true)]
    async fn test_interface_probe_reports_address() {
        let probes = Arc::new(AtomicU32::new(0));
        let mut host = MockHost::new();
        let seen = probes.clone();
        host.expect_interface_exists()
            .returning(move |_| seen.fetch_add(1, Ordering::SeqCst) >= 2);
        host.expect_interface_ipv4()
            .returning(|_| Some(Ipv4Addr::new(10, 0, 0, 2)));

        let policy = RetryPolicy::new(Duration::from_secs(1), 10);
        let ready = wait_until_ready(policy, "wg0", || probe_interface(&host, "wg0"))
            .await
            .unwrap();
        assert_eq!(ready.address, Some(Ipv4Addr::new(10, 0, 0, 2)));
        assert_eq!(probes.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_interface_without_address_is_not_ready() {
        let mut host = MockHost::new();
        host.expect_interface_exists().returning(|_| true);
        host.expect_interface_ipv4().times(3).returning(|_| None);

        let policy = RetryPolicy::new(Duration::from_secs(1), 3);
        let err = wait_until_ready(policy, "ppp0", || probe_interface(&host, "ppp0"))
            .await
            .unwrap_err();
        assert!(matches!(err, VpnError::ConnectTimeout { ref interface, waited_secs: 3 } if interface == "ppp0"));
    }

    #[tokio::test]
    async fn test_dropping_the_poll_cancels_it() {
        let outcome = tokio::time::timeout(
            Duration::from_millis(20),
            poll_until(RetryPolicy::new(Duration::from_secs(60), 5), |_| async { None::<()> }),
        )
        .await;
        assert!(outcome.is_err());
    }
}
