use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tokio::time::sleep;

/// How often, and how many times, to check a long-running job.
///
/// The default leaves `max_attempts` unset, so polling only stops when
/// the job finishes or the future is dropped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollPolicy {
    pub interval: Duration,
    pub max_attempts: Option<u32>,
}

impl PollPolicy {
    pub fn unbounded(interval: Duration) -> Self {
        PollPolicy {
            interval,
            max_attempts: None,
        }
    }

    pub fn bounded(interval: Duration, max_attempts: u32) -> Self {
        PollPolicy {
            interval,
            max_attempts: Some(max_attempts),
        }
    }
}

impl Default for PollPolicy {
    fn default() -> Self {
        PollPolicy::unbounded(Duration::from_secs(10))
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("job did not finish after {attempts} polls")]
pub struct PollExhausted {
    pub attempts: u32,
}

/// Call `check` until it yields a value, sleeping `interval` between calls.
/// An error from `check` ends polling immediately.
pub async fn poll_until<T, E, F, Fut>(policy: &PollPolicy, mut check: F) -> Result<T, E>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<Option<T>, E>>,
    E: From<PollExhausted>,
{
    let mut attempt = 0u32;
    loop {
        attempt += 1;
        if let Some(value) = check(attempt).await? {
            return Ok(value);
        }
        if policy.max_attempts.is_some_and(|max| attempt >= max) {
            return Err(PollExhausted { attempts: attempt }.into());
        }
        sleep(policy.interval).await;
    }
}
