//! Network mode controller
//!
//! Decides whether the wireless interface runs as a WiFi client or falls back
//! to broadcasting its own access point, and moves the daemons between those
//! two states. The supplicant and hostapd are mutually exclusive consumers of
//! the radio, and the DHCP server runs exactly when hostapd does.
//!
//! The boot-time decision is one-shot ([`NetworkModeController::evaluate_and_enforce`]).
//! [`NetworkModeController::reconcile`] optionally keeps watching afterwards
//! and returns to client mode once a known network is reachable again.

use crate::daemon::{Daemon, NetworkDaemonController};
use crate::error::{NetmodeError, NetmodeResult};
use crate::mode::{Mode, ModeTransition, TransitionResult, WirelessInterface};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

/// Daemons that make up access-point mode, in start order
const ACCESS_POINT_DAEMONS: [Daemon; 2] = [Daemon::AccessPoint, Daemon::DhcpServer];

/// Timing of the reconciliation loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconcilePolicy {
    /// Association check period in client mode; first recovery delay in AP mode
    pub interval: Duration,
    /// Cap for the doubling recovery delay
    pub max_backoff: Duration,
}

impl ReconcilePolicy {
    fn next_backoff(&self, current: Duration) -> Duration {
        current.saturating_mul(2).min(self.max_backoff)
    }
}

pub struct NetworkModeController<D> {
    daemons: D,
    interface: WirelessInterface,
    rollback_on_failure: bool,
    transitions: Vec<ModeTransition>,
}

impl<D: NetworkDaemonController> NetworkModeController<D> {
    pub fn new(daemons: D, interface: impl Into<String>) -> Self {
        Self {
            daemons,
            interface: WirelessInterface::new(interface),
            rollback_on_failure: true,
            transitions: Vec::new(),
        }
    }

    /// Whether a half-finished transition is undone before reporting failure
    pub fn with_rollback(mut self, enabled: bool) -> Self {
        self.rollback_on_failure = enabled;
        self
    }

    pub fn interface(&self) -> &WirelessInterface {
        &self.interface
    }

    pub fn mode(&self) -> Mode {
        self.interface.mode
    }

    /// Audit trail of every mode change made by this controller
    pub fn transitions(&self) -> &[ModeTransition] {
        &self.transitions
    }

    /// Boot-time decision: wait, look, and fall back to AP if not associated
    ///
    /// The grace period always elapses in full before the status query. A
    /// failed query counts as "not associated".
    pub async fn evaluate_and_enforce(
        &mut self,
        grace_period: Duration,
    ) -> NetmodeResult<TransitionResult> {
        info!(
            "Waiting {}s for {} to associate",
            grace_period.as_secs(),
            self.interface.name
        );
        sleep(grace_period).await;

        if self.query_association().await {
            info!("{} is associated, staying in client mode", self.interface.name);
            let from = self.interface.mode;
            self.interface.mode = Mode::Client;
            self.interface.associated = true;
            if from != Mode::Client {
                self.record(from, Mode::Client, "associated within grace period");
            }
            return Ok(TransitionResult::unchanged(Mode::Client));
        }

        info!(
            "{} did not associate, switching to access-point mode",
            self.interface.name
        );
        self.enter_access_point("not associated after grace period")
            .await?;
        Ok(TransitionResult::transitioned(Mode::AccessPoint))
    }

    /// Keep the mode correct until `shutdown` fires
    ///
    /// Client mode is checked every `interval`; losing association triggers
    /// the AP fallback. AP mode probes the client side after a back-off that
    /// doubles per failed probe up to `max_backoff`. Transition failures end
    /// the loop with an error, leaving restarts to the supervisor.
    pub async fn reconcile(
        &mut self,
        policy: ReconcilePolicy,
        grace_period: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) -> NetmodeResult<()> {
        let mut backoff = policy.interval;

        loop {
            if *shutdown.borrow() {
                break;
            }

            let delay = match self.interface.mode {
                Mode::AccessPoint => backoff,
                _ => policy.interval,
            };
            debug!("Next evaluation in {}s", delay.as_secs());

            let interrupted = tokio::select! {
                _ = sleep(delay) => false,
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    true
                }
            };
            if interrupted {
                continue;
            }

            match self.interface.mode {
                Mode::AccessPoint => {
                    if self.probe_client(grace_period).await? {
                        backoff = policy.interval;
                    } else {
                        backoff = policy.next_backoff(backoff);
                        info!(
                            "No known network yet, next probe in {}s",
                            backoff.as_secs()
                        );
                    }
                }
                Mode::Client | Mode::Unknown => {
                    if self.query_association().await {
                        self.interface.mode = Mode::Client;
                        self.interface.associated = true;
                    } else {
                        warn!("{} lost association", self.interface.name);
                        self.enter_access_point("association lost").await?;
                        backoff = policy.interval;
                    }
                }
            }
        }

        info!("Reconciliation stopped in {} mode", self.interface.mode);
        Ok(())
    }

    /// Infer the mode from what is actually running
    pub async fn observe(&self) -> NetmodeResult<WirelessInterface> {
        let mut observed = WirelessInterface::new(self.interface.name.clone());

        if self.daemons.is_running(Daemon::AccessPoint).await? {
            observed.mode = Mode::AccessPoint;
            return Ok(observed);
        }

        if self.daemons.is_running(Daemon::Supplicant).await? {
            observed.associated = self.query_association().await;
            if observed.associated {
                observed.mode = Mode::Client;
            }
        }

        Ok(observed)
    }

    /// Tear down AP mode, try the supplicant, and fall back if it does not join
    async fn probe_client(&mut self, grace_period: Duration) -> NetmodeResult<bool> {
        info!("Probing for a known network on {}", self.interface.name);

        let mut stopped = Vec::new();
        for daemon in ACCESS_POINT_DAEMONS.iter().rev() {
            if let Err(e) = self.stop_daemon(*daemon).await {
                return Err(self.restore_access_point(e, &stopped).await);
            }
            stopped.push(*daemon);
        }

        if let Err(e) = self.start_daemon(Daemon::Supplicant).await {
            return Err(self.restore_access_point(e, &stopped).await);
        }

        sleep(grace_period).await;

        if self.query_association().await {
            info!("{} associated, returning to client mode", self.interface.name);
            self.interface.mode = Mode::Client;
            self.interface.associated = true;
            self.record(Mode::AccessPoint, Mode::Client, "known network reachable");
            return Ok(true);
        }

        debug!("Probe did not associate, restoring access point");
        self.enter_access_point("probe did not associate").await?;
        Ok(false)
    }

    /// Stop the supplicant, then start hostapd and the DHCP server
    async fn enter_access_point(&mut self, reason: &str) -> NetmodeResult<()> {
        let from = self.interface.mode;

        self.stop_daemon(Daemon::Supplicant).await?;

        let mut attempted = Vec::new();
        for daemon in ACCESS_POINT_DAEMONS {
            // A failed start may leave partial state behind (e.g. the gateway address)
            attempted.push(daemon);
            if let Err(e) = self.start_daemon(daemon).await {
                return Err(self.restore_client(e, &attempted).await);
            }
        }

        self.interface.mode = Mode::AccessPoint;
        self.interface.associated = false;
        if from != Mode::AccessPoint {
            self.record(from, Mode::AccessPoint, reason);
        }
        Ok(())
    }

    /// Undo a failed client -> AP transition
    ///
    /// `attempted` includes the daemon whose start failed; stopping a daemon
    /// that is not running is a no-op.
    async fn restore_client(&mut self, cause: NetmodeError, attempted: &[Daemon]) -> NetmodeError {
        error!("Access-point transition failed: {}", cause);
        if !self.rollback_on_failure {
            self.interface.mode = Mode::Unknown;
            return cause;
        }

        let mut failures = Vec::new();
        for daemon in attempted.iter().rev() {
            if let Err(e) = self.daemons.stop(*daemon).await {
                failures.push(format!("stop {}: {}", daemon, e));
            }
        }
        if failures.is_empty() {
            if let Err(e) = self.daemons.start(Daemon::Supplicant).await {
                failures.push(format!("start {}: {}", Daemon::Supplicant, e));
            }
        }

        self.finish_rollback(cause, failures, Mode::Client)
    }

    /// Undo a failed AP -> client probe
    async fn restore_access_point(&mut self, cause: NetmodeError, stopped: &[Daemon]) -> NetmodeError {
        error!("Client probe failed: {}", cause);
        if !self.rollback_on_failure {
            self.interface.mode = Mode::Unknown;
            return cause;
        }

        let mut failures = Vec::new();
        if let Err(e) = self.daemons.stop(Daemon::Supplicant).await {
            failures.push(format!("stop {}: {}", Daemon::Supplicant, e));
        }
        if failures.is_empty() {
            for daemon in stopped.iter().rev() {
                if let Err(e) = self.daemons.start(*daemon).await {
                    failures.push(format!("start {}: {}", daemon, e));
                    break;
                }
            }
        }

        self.finish_rollback(cause, failures, Mode::AccessPoint)
    }

    fn finish_rollback(
        &mut self,
        cause: NetmodeError,
        failures: Vec<String>,
        restored: Mode,
    ) -> NetmodeError {
        if failures.is_empty() {
            warn!("Rolled back to {} mode", restored);
            self.interface.mode = restored;
            return cause;
        }

        error!(
            "Rollback to {} mode failed, {} has no usable network: {}",
            restored,
            self.interface.name,
            failures.join("; ")
        );
        self.interface.mode = Mode::Unknown;
        NetmodeError::NoNetworkAvailable {
            cause: cause.to_string(),
            rollback: failures.join("; "),
        }
    }

    async fn query_association(&self) -> bool {
        match self.daemons.is_associated(&self.interface.name).await {
            Ok(associated) => associated,
            Err(e) => {
                warn!(
                    "Association status of {} unknown ({}), treating as not associated",
                    self.interface.name, e
                );
                false
            }
        }
    }

    async fn start_daemon(&self, daemon: Daemon) -> NetmodeResult<()> {
        self.daemons.start(daemon).await.map_err(|e| match e {
            e @ NetmodeError::DaemonStart { .. } => e,
            e => NetmodeError::DaemonStart {
                daemon,
                reason: e.to_string(),
            },
        })
    }

    async fn stop_daemon(&self, daemon: Daemon) -> NetmodeResult<()> {
        self.daemons.stop(daemon).await.map_err(|e| match e {
            e @ NetmodeError::DaemonStop { .. } => e,
            e => NetmodeError::DaemonStop {
                daemon,
                reason: e.to_string(),
            },
        })
    }

    fn record(&mut self, from: Mode, to: Mode, reason: &str) {
        let transition = ModeTransition::now(from, to, reason);
        info!(
            from = %transition.from,
            to = %transition.to,
            reason = %transition.reason,
            "Mode transition on {}",
            self.interface.name
        );
        self.transitions.push(transition);
    }
}
