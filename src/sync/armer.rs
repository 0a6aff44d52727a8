//! One watch loop per path.
//!
//! ```text
//!          ┌──────────── re-arm ─────────────┐
//!          ▼                                 │
//!   Idle ─► Armed ──fired──► Firing ──signal─┘
//!            │
//!            ├─connection error─► Reconnecting ──ok──► (resync signal) ─► Idle
//!            │                         │
//!            │                   budget spent
//!            ▼                         ▼
//!          Failed ◄────────────────────┘        cancel (any state) ─► Stopped
//! ```

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::sync::watch;
use tokio::time::sleep;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::warn;

use super::WatchSignal;
use crate::metrics::RECONNECT_ATTEMPTS_TOTAL;
use crate::metrics::WATCH_FIRED_TOTAL;
use crate::metrics::WATCH_LOOP_FAILURES_TOTAL;
use crate::metrics::WATCH_STATE;
use crate::BackoffPolicy;
use crate::Error;
use crate::Result;
use crate::Session;
use crate::WatchError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchState {
    Idle,
    Armed,
    Firing,
    Reconnecting,
    /// Terminal: registration failed or the reconnect budget is spent
    Failed,
    /// Terminal: cancelled
    Stopped,
}

impl WatchState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, WatchState::Failed | WatchState::Stopped)
    }

    fn as_gauge(&self) -> i64 {
        match self {
            WatchState::Idle => 0,
            WatchState::Armed => 1,
            WatchState::Firing => 2,
            WatchState::Reconnecting => 3,
            WatchState::Failed => 4,
            WatchState::Stopped => 5,
        }
    }
}

pub struct WatchArmer {
    session: Session,
    path: String,
    policy: BackoffPolicy,
    state: watch::Sender<WatchState>,
}

impl WatchArmer {
    pub fn new(
        session: Session,
        path: impl Into<String>,
        policy: BackoffPolicy,
    ) -> (Self, watch::Receiver<WatchState>) {
        let (state, state_rx) = watch::channel(WatchState::Idle);
        let armer = Self {
            session,
            path: path.into(),
            policy,
            state,
        };
        armer.set_state(WatchState::Idle);
        (armer, state_rx)
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Arm a one-shot watch and block until it fires.
    pub async fn arm_and_wait(&self) -> Result<()> {
        self.set_state(WatchState::Armed);
        self.session.watch(&self.path).await
    }

    /// Run the watch loop until cancelled or failed.
    ///
    /// Every firing is published on `signals`, then the watch is re-armed
    /// immediately. After a successful reconnect one extra signal is published
    /// so the path is re-read even if it changed while the session was down.
    ///
    /// # Errors
    /// `WatchError::RetryBudgetExhausted` when the session does not come back,
    /// `WatchError::SignalChannelClosed` when the consumer is gone, and any
    /// non connection level registration error.
    pub async fn run(
        self,
        signals: mpsc::Sender<WatchSignal>,
        cancel: CancellationToken,
    ) -> Result<()> {
        loop {
            let fired = tokio::select! {
                biased;
                _ = cancel.cancelled() => return self.stop(),
                r = self.arm_and_wait() => r,
            };

            match fired {
                Ok(()) => {
                    self.set_state(WatchState::Firing);
                    WATCH_FIRED_TOTAL.with_label_values(&[&self.path]).inc();
                    debug!(path = %self.path, "watch fired");
                    self.publish(&signals, &cancel).await?;
                    self.set_state(WatchState::Idle);
                }
                Err(e) if e.is_connection_level() => {
                    warn!(path = %self.path, "watch lost its session: {}", e);
                    if !self.recover(&cancel).await? {
                        return self.stop();
                    }
                    self.publish(&signals, &cancel).await?;
                    self.set_state(WatchState::Idle);
                }
                Err(e) => return Err(self.fail(e)),
            }
        }
    }

    /// Reconnect with exponential backoff until the session is back.
    ///
    /// Returns `false` when cancelled while waiting.
    async fn recover(
        &self,
        cancel: &CancellationToken,
    ) -> Result<bool> {
        for attempt in 1..=self.policy.max_retries {
            self.set_state(WatchState::Reconnecting);
            RECONNECT_ATTEMPTS_TOTAL.with_label_values(&[&self.path]).inc();
            let delay = self.jittered(self.policy.delay_for(attempt));
            debug!(path = %self.path, attempt, ?delay, "reconnecting");

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Ok(false),
                _ = sleep(delay) => {}
            }

            let recovered = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Ok(false),
                r = self.try_reconnect() => r,
            };
            if recovered {
                return Ok(true);
            }
        }

        Err(self.fail(
            WatchError::RetryBudgetExhausted {
                path: self.path.clone(),
                attempts: self.policy.max_retries,
            }
            .into(),
        ))
    }

    async fn try_reconnect(&self) -> bool {
        match timeout(self.policy.timeout(), self.session.reconnect()).await {
            Ok(Ok(())) => {
                info!(path = %self.path, backend = self.session.name(), "session recovered, resyncing");
                true
            }
            Ok(Err(e)) => {
                warn!(path = %self.path, "reconnect failed: {}", e);
                false
            }
            Err(_) => {
                warn!(path = %self.path, "reconnect timed out after {:?}", self.policy.timeout());
                false
            }
        }
    }

    async fn publish(
        &self,
        signals: &mpsc::Sender<WatchSignal>,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let signal = WatchSignal {
            path: self.path.clone(),
        };
        tokio::select! {
            biased;
            // The next loop iteration observes the cancellation
            _ = cancel.cancelled() => Ok(()),
            r = signals.send(signal) => r.map_err(|_| {
                self.fail(WatchError::SignalChannelClosed.into())
            }),
        }
    }

    fn jittered(
        &self,
        delay: Duration,
    ) -> Duration {
        let spread = delay.as_millis() as u64 / 10;
        if spread == 0 {
            return delay;
        }
        delay + Duration::from_millis(rand::random::<u64>() % spread)
    }

    fn stop(&self) -> Result<()> {
        debug!(path = %self.path, "watch loop cancelled");
        self.set_state(WatchState::Stopped);
        Ok(())
    }

    fn fail(
        &self,
        e: Error,
    ) -> Error {
        error!(path = %self.path, "watch loop failed, no further updates for this path: {}", e);
        WATCH_LOOP_FAILURES_TOTAL.with_label_values(&[&self.path]).inc();
        self.set_state(WatchState::Failed);
        e
    }

    fn set_state(
        &self,
        state: WatchState,
    ) {
        self.state.send_replace(state);
        WATCH_STATE.with_label_values(&[&self.path]).set(state.as_gauge());
    }
}
