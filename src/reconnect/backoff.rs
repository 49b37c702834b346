//! Client-side reconnect state machine with capped exponential backoff.

use std::future::Future;
use std::time::Duration;

use crate::error::AuthError;

/// Backoff schedule and attempt bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    /// Delay after the first failed attempt.
    pub base: Duration,
    /// Multiplier applied per further attempt.
    pub factor: u32,
    /// Upper bound for any single delay.
    pub cap: Duration,
    /// Attempts allowed before going offline.
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(1),
            factor: 2,
            cap: Duration::from_secs(30),
            max_attempts: 10,
        }
    }
}

impl ReconnectPolicy {
    /// Delay to wait after attempt number `attempt` (1-based) failed:
    /// `min(base * factor^(attempt-1), cap)`.
    #[must_use]
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1);
        let multiplier = self.factor.checked_pow(exponent).unwrap_or(u32::MAX);
        self.base.saturating_mul(multiplier).min(self.cap)
    }
}

/// Why a connect attempt failed, as far as the retry logic cares.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectFailure {
    /// Network or transport error; retry per the schedule.
    Transport,
    /// Server asked the client to slow down.
    RateLimited {
        /// Minimum wait before the next attempt.
        retry_after: Duration,
    },
    /// Credential missing or refused; retrying cannot help.
    Rejected,
}

impl From<&AuthError> for ConnectFailure {
    fn from(err: &AuthError) -> Self {
        match err {
            AuthError::RateLimited { retry_after_ms } => Self::RateLimited {
                retry_after: Duration::from_millis(*retry_after_ms),
            },
            AuthError::NoCredential | AuthError::InvalidOrExpired => Self::Rejected,
        }
    }
}

/// Connection states surfaced to the UI.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectState {
    /// Not started.
    Idle,
    /// Attempt in flight.
    Connecting {
        /// 1-based attempt number.
        attempt: u32,
    },
    /// Handshake succeeded.
    Connected,
    /// Waiting before the next attempt.
    Backoff {
        /// The attempt that just failed.
        attempt: u32,
        /// How long to wait.
        delay: Duration,
    },
    /// Terminal: attempts exhausted or credential rejected.
    Offline,
}

/// Inputs that move the machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconnectTrigger {
    /// User or app asked to connect.
    Start,
    /// The in-flight attempt succeeded.
    Succeeded,
    /// The in-flight attempt failed.
    Failed(ConnectFailure),
    /// An established connection dropped.
    TransportLost,
    /// The backoff timer fired.
    BackoffElapsed,
}

/// Reconnect state machine.
#[derive(Debug, Clone)]
pub struct ReconnectMachine {
    policy: ReconnectPolicy,
    state: ReconnectState,
}

impl ReconnectMachine {
    /// Creates an idle machine.
    #[must_use]
    pub fn new(policy: ReconnectPolicy) -> Self {
        Self {
            policy,
            state: ReconnectState::Idle,
        }
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> ReconnectState {
        self.state
    }

    /// Applies a trigger and returns the resulting state. Triggers that make
    /// no sense in the current state leave it unchanged.
    pub fn apply(&mut self, trigger: ReconnectTrigger) -> ReconnectState {
        use ReconnectState as S;
        use ReconnectTrigger as T;

        let next = match (self.state, trigger) {
            (S::Idle | S::Offline, T::Start) => S::Connecting { attempt: 1 },
            (S::Connecting { .. }, T::Succeeded) => S::Connected,
            (S::Connecting { .. }, T::Failed(ConnectFailure::Rejected)) => S::Offline,
            (S::Connecting { attempt }, T::Failed(failure)) => self.after_failure(attempt, failure),
            (S::Connected, T::TransportLost) => S::Connecting { attempt: 1 },
            (S::Backoff { attempt, .. }, T::BackoffElapsed) => S::Connecting {
                attempt: attempt.saturating_add(1),
            },
            (state, trigger) => {
                tracing::debug!(?state, ?trigger, "ignored reconnect trigger");
                state
            }
        };
        self.state = next;
        next
    }

    fn after_failure(&self, attempt: u32, failure: ConnectFailure) -> ReconnectState {
        if attempt >= self.policy.max_attempts {
            return ReconnectState::Offline;
        }
        let mut delay = self.policy.delay_for(attempt);
        if let ConnectFailure::RateLimited { retry_after } = failure {
            delay = delay.max(retry_after);
        }
        ReconnectState::Backoff { attempt, delay }
    }
}

/// Runs the machine until `connect` succeeds or the policy gives up.
///
/// `connect` receives the 1-based attempt number.
///
/// # Errors
///
/// Returns the last [`ConnectFailure`] once the machine reaches
/// [`ReconnectState::Offline`].
pub async fn drive<T, F, Fut>(policy: ReconnectPolicy, mut connect: F) -> Result<T, ConnectFailure>
where
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, ConnectFailure>>,
{
    let mut machine = ReconnectMachine::new(policy);
    let mut last_failure = ConnectFailure::Transport;
    let mut state = machine.apply(ReconnectTrigger::Start);

    loop {
        state = match state {
            ReconnectState::Connecting { attempt } => match connect(attempt).await {
                Ok(conn) => {
                    machine.apply(ReconnectTrigger::Succeeded);
                    return Ok(conn);
                }
                Err(failure) => {
                    tracing::debug!(attempt, ?failure, "connect attempt failed");
                    last_failure = failure;
                    machine.apply(ReconnectTrigger::Failed(failure))
                }
            },
            ReconnectState::Backoff { delay, .. } => {
                tokio::time::sleep(delay).await;
                machine.apply(ReconnectTrigger::BackoffElapsed)
            }
            ReconnectState::Idle | ReconnectState::Connected | ReconnectState::Offline => {
                return Err(last_failure);
            }
        };
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn policy(max_attempts: u32) -> ReconnectPolicy {
        ReconnectPolicy {
            base: Duration::from_millis(1),
            factor: 2,
            cap: Duration::from_millis(5),
            max_attempts,
        }
    }

    #[test]
    fn delay_doubles_until_cap() {
        let p = ReconnectPolicy::default();
        assert_eq!(p.delay_for(1), Duration::from_secs(1));
        assert_eq!(p.delay_for(2), Duration::from_secs(2));
        assert_eq!(p.delay_for(5), Duration::from_secs(16));
        assert_eq!(p.delay_for(6), Duration::from_secs(30));
        assert_eq!(p.delay_for(200), Duration::from_secs(30));
    }

    #[test]
    fn transport_failures_back_off_then_go_offline() {
        let mut m = ReconnectMachine::new(ReconnectPolicy {
            max_attempts: 2,
            ..ReconnectPolicy::default()
        });
        m.apply(ReconnectTrigger::Start);
        assert_eq!(
            m.apply(ReconnectTrigger::Failed(ConnectFailure::Transport)),
            ReconnectState::Backoff {
                attempt: 1,
                delay: Duration::from_secs(1)
            }
        );
        assert_eq!(
            m.apply(ReconnectTrigger::BackoffElapsed),
            ReconnectState::Connecting { attempt: 2 }
        );
        assert_eq!(
            m.apply(ReconnectTrigger::Failed(ConnectFailure::Transport)),
            ReconnectState::Offline
        );
    }

    #[test]
    fn rejection_is_terminal() {
        let mut m = ReconnectMachine::new(ReconnectPolicy::default());
        m.apply(ReconnectTrigger::Start);
        assert_eq!(
            m.apply(ReconnectTrigger::Failed(ConnectFailure::Rejected)),
            ReconnectState::Offline
        );
    }

    #[test]
    fn rate_limit_waits_at_least_retry_after() {
        let mut m = ReconnectMachine::new(ReconnectPolicy::default());
        m.apply(ReconnectTrigger::Start);
        let state = m.apply(ReconnectTrigger::Failed(ConnectFailure::RateLimited {
            retry_after: Duration::from_secs(10),
        }));
        assert_eq!(
            state,
            ReconnectState::Backoff {
                attempt: 1,
                delay: Duration::from_secs(10)
            }
        );
    }

    #[test]
    fn transport_loss_restarts_from_first_attempt() {
        let mut m = ReconnectMachine::new(ReconnectPolicy::default());
        m.apply(ReconnectTrigger::Start);
        m.apply(ReconnectTrigger::Succeeded);
        assert_eq!(m.state(), ReconnectState::Connected);
        assert_eq!(
            m.apply(ReconnectTrigger::TransportLost),
            ReconnectState::Connecting { attempt: 1 }
        );
    }

    #[test]
    fn nonsense_triggers_are_ignored() {
        let mut m = ReconnectMachine::new(ReconnectPolicy::default());
        assert_eq!(m.apply(ReconnectTrigger::Succeeded), ReconnectState::Idle);
        assert_eq!(m.apply(ReconnectTrigger::BackoffElapsed), ReconnectState::Idle);
    }

    #[test]
    fn auth_errors_map_to_failures() {
        assert_eq!(
            ConnectFailure::from(&AuthError::NoCredential),
            ConnectFailure::Rejected
        );
        assert_eq!(
            ConnectFailure::from(&AuthError::RateLimited { retry_after_ms: 250 }),
            ConnectFailure::RateLimited {
                retry_after: Duration::from_millis(250)
            }
        );
    }

    #[tokio::test]
    async fn drive_retries_until_success() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        let result = drive(policy(5), move |attempt| {
            counter.fetch_add(1, Ordering::SeqCst);
            async move {
                if attempt < 3 {
                    Err(ConnectFailure::Transport)
                } else {
                    Ok(attempt)
                }
            }
        })
        .await;
        assert_eq!(result, Ok(3));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn drive_gives_up_after_max_attempts() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        let result: Result<(), _> = drive(policy(3), move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Err(ConnectFailure::Transport) }
        })
        .await;
        assert_eq!(result, Err(ConnectFailure::Transport));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn drive_stops_immediately_on_rejection() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = Arc::clone(&calls);
        let result: Result<(), _> = drive(policy(5), move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Err(ConnectFailure::Rejected) }
        })
        .await;
        assert_eq!(result, Err(ConnectFailure::Rejected));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
