//! Mode controller integration tests
//!
//! Drive `NetworkModeController` against an in-memory daemon table and check
//! the radio-ownership invariants after every scenario:
//! - supplicant and hostapd never run together
//! - the DHCP server runs exactly when the device is an access point

use async_trait::async_trait;
use libnetmode::{
    Daemon, Mode, NetmodeError, NetmodeResult, NetworkDaemonController, NetworkModeController,
    ReconcilePolicy, TransitionAction, TransitionResult,
};
use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;

const GRACE: Duration = Duration::from_secs(60);

/// What the fake answers to an association query
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Association {
    Associated,
    NotAssociated,
    QueryError,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Call {
    Start(Daemon),
    Stop(Daemon),
    Query,
}

#[derive(Debug)]
struct FakeState {
    running: HashSet<Daemon>,
    answers: VecDeque<Association>,
    last_answer: Association,
    fail_start: HashSet<Daemon>,
    fail_stop: HashSet<Daemon>,
    /// The AP gateway address is on the interface
    gateway_assigned: bool,
    calls: Vec<Call>,
    queried_at: Vec<Instant>,
}

/// In-memory daemon table shared between the controller and the test
#[derive(Clone)]
struct FakeDaemons {
    state: Arc<Mutex<FakeState>>,
}

impl FakeDaemons {
    /// Boot state: the supplicant is up and trying to associate
    fn booted(answers: &[Association]) -> Self {
        let mut answers: VecDeque<Association> = answers.iter().copied().collect();
        let last_answer = answers.pop_back().unwrap_or(Association::NotAssociated);
        answers.push_back(last_answer);
        Self {
            state: Arc::new(Mutex::new(FakeState {
                running: HashSet::from([Daemon::Supplicant]),
                answers,
                last_answer,
                fail_start: HashSet::new(),
                fail_stop: HashSet::new(),
                gateway_assigned: false,
                calls: Vec::new(),
                queried_at: Vec::new(),
            })),
        }
    }

    fn fail_start(self, daemon: Daemon) -> Self {
        self.break_start(daemon);
        self
    }

    /// Make later starts of `daemon` fail
    fn break_start(&self, daemon: Daemon) {
        self.state.lock().unwrap().fail_start.insert(daemon);
    }

    /// Make later stops of `daemon` fail and leave it running
    fn break_stop(&self, daemon: Daemon) {
        self.state.lock().unwrap().fail_stop.insert(daemon);
    }

    fn gateway_assigned(&self) -> bool {
        self.state.lock().unwrap().gateway_assigned
    }

    fn running(&self, daemon: Daemon) -> bool {
        self.state.lock().unwrap().running.contains(&daemon)
    }

    fn calls(&self) -> Vec<Call> {
        self.state.lock().unwrap().calls.clone()
    }

    fn mutating_calls(&self) -> Vec<Call> {
        self.calls().into_iter().filter(|c| *c != Call::Query).collect()
    }

    fn queried_at(&self) -> Vec<Instant> {
        self.state.lock().unwrap().queried_at.clone()
    }

    fn assert_invariants(&self, mode: Mode) {
        let supplicant = self.running(Daemon::Supplicant);
        let hostapd = self.running(Daemon::AccessPoint);
        let dhcp = self.running(Daemon::DhcpServer);
        assert!(!(supplicant && hostapd), "supplicant and hostapd both running");
        assert_eq!(dhcp, mode == Mode::AccessPoint, "DHCP running in {} mode", mode);
        assert_eq!(
            self.gateway_assigned(),
            mode == Mode::AccessPoint,
            "gateway address held in {} mode",
            mode
        );
    }
}

#[async_trait]
impl NetworkDaemonController for FakeDaemons {
    async fn start(&self, daemon: Daemon) -> NetmodeResult<()> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(Call::Start(daemon));
        // Like the real DHCP start, the address goes on before the daemon starts
        if daemon == Daemon::DhcpServer {
            state.gateway_assigned = true;
        }
        if state.fail_start.contains(&daemon) {
            return Err(NetmodeError::ServiceError(format!("{} refused to start", daemon)));
        }
        state.running.insert(daemon);
        Ok(())
    }

    async fn stop(&self, daemon: Daemon) -> NetmodeResult<()> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(Call::Stop(daemon));
        if state.fail_stop.contains(&daemon) {
            return Err(NetmodeError::Timeout(format!("{} did not stop", daemon)));
        }
        state.running.remove(&daemon);
        if daemon == Daemon::DhcpServer {
            state.gateway_assigned = false;
        }
        Ok(())
    }

    async fn is_running(&self, daemon: Daemon) -> NetmodeResult<bool> {
        Ok(self.running(daemon))
    }

    async fn is_associated(&self, interface: &str) -> NetmodeResult<bool> {
        assert_eq!(interface, "wlan0");
        let mut state = self.state.lock().unwrap();
        state.calls.push(Call::Query);
        state.queried_at.push(Instant::now());

        let answer = if state.answers.len() > 1 {
            state.answers.pop_front().unwrap_or(state.last_answer)
        } else {
            state.last_answer
        };

        match answer {
            Association::Associated => Ok(state.running.contains(&Daemon::Supplicant)),
            Association::NotAssociated => Ok(false),
            Association::QueryError => Err(NetmodeError::StatusQuery(
                "wpa_cli: could not connect to wpa_supplicant".to_string(),
            )),
        }
    }
}

fn controller(daemons: &FakeDaemons) -> NetworkModeController<FakeDaemons> {
    NetworkModeController::new(daemons.clone(), "wlan0")
}

#[tokio::test(start_paused = true)]
async fn never_associates_falls_back_to_access_point() {
    let daemons = FakeDaemons::booted(&[Association::NotAssociated]);
    let mut ctl = controller(&daemons);

    let result = ctl.evaluate_and_enforce(GRACE).await.unwrap();

    assert_eq!(result, TransitionResult::transitioned(Mode::AccessPoint));
    assert!(!daemons.running(Daemon::Supplicant));
    assert!(daemons.running(Daemon::AccessPoint));
    assert!(daemons.running(Daemon::DhcpServer));
    assert_eq!(
        daemons.mutating_calls(),
        vec![
            Call::Stop(Daemon::Supplicant),
            Call::Start(Daemon::AccessPoint),
            Call::Start(Daemon::DhcpServer),
        ]
    );
    daemons.assert_invariants(result.mode);

    let audit = ctl.transitions();
    assert_eq!(audit.len(), 1);
    assert_eq!((audit[0].from, audit[0].to), (Mode::Unknown, Mode::AccessPoint));
    assert_eq!(audit[0].reason, "not associated after grace period");
}

#[tokio::test(start_paused = true)]
async fn associated_stays_client_without_side_effects() {
    let daemons = FakeDaemons::booted(&[Association::Associated]);
    let mut ctl = controller(&daemons);

    let result = ctl.evaluate_and_enforce(GRACE).await.unwrap();

    assert_eq!(result, TransitionResult::unchanged(Mode::Client));
    assert_eq!(result.action, TransitionAction::None);
    assert!(daemons.mutating_calls().is_empty());
    assert!(daemons.running(Daemon::Supplicant));
    daemons.assert_invariants(result.mode);
    assert!(ctl.interface().associated);
}

#[tokio::test(start_paused = true)]
async fn status_query_error_is_treated_as_not_associated() {
    let daemons = FakeDaemons::booted(&[Association::QueryError]);
    let mut ctl = controller(&daemons);

    let result = ctl.evaluate_and_enforce(GRACE).await.unwrap();

    assert_eq!(result, TransitionResult::transitioned(Mode::AccessPoint));
    daemons.assert_invariants(result.mode);
}

#[tokio::test(start_paused = true)]
async fn grace_period_elapses_before_status_query() {
    let daemons = FakeDaemons::booted(&[Association::Associated]);
    let mut ctl = controller(&daemons);

    let started = Instant::now();
    ctl.evaluate_and_enforce(GRACE).await.unwrap();

    let queried = daemons.queried_at();
    assert_eq!(queried.len(), 1);
    assert!(queried[0].duration_since(started) >= GRACE);
}

#[tokio::test(start_paused = true)]
async fn start_failure_without_rollback_leaves_supplicant_stopped() {
    let daemons =
        FakeDaemons::booted(&[Association::NotAssociated]).fail_start(Daemon::AccessPoint);
    let mut ctl = controller(&daemons).with_rollback(false);

    let err = ctl.evaluate_and_enforce(GRACE).await.unwrap_err();

    assert!(matches!(
        err,
        NetmodeError::DaemonStart { daemon: Daemon::AccessPoint, .. }
    ));
    assert!(!daemons.running(Daemon::Supplicant));
    assert!(!daemons.running(Daemon::AccessPoint));
    assert_eq!(ctl.mode(), Mode::Unknown);
    assert!(ctl.transitions().is_empty());
}

#[tokio::test(start_paused = true)]
async fn dhcp_failure_rolls_back_to_client() {
    let daemons =
        FakeDaemons::booted(&[Association::NotAssociated]).fail_start(Daemon::DhcpServer);
    let mut ctl = controller(&daemons);

    let err = ctl.evaluate_and_enforce(GRACE).await.unwrap_err();

    assert!(err.is_daemon_failure());
    assert_eq!(
        daemons.mutating_calls(),
        vec![
            Call::Stop(Daemon::Supplicant),
            Call::Start(Daemon::AccessPoint),
            Call::Start(Daemon::DhcpServer),
            Call::Stop(Daemon::DhcpServer),
            Call::Stop(Daemon::AccessPoint),
            Call::Start(Daemon::Supplicant),
        ]
    );
    assert!(!daemons.gateway_assigned());
    assert_eq!(ctl.mode(), Mode::Client);
    daemons.assert_invariants(Mode::Client);
    assert!(ctl.transitions().is_empty());
}

#[tokio::test(start_paused = true)]
async fn rollback_failure_reports_no_network() {
    let daemons = FakeDaemons::booted(&[Association::NotAssociated])
        .fail_start(Daemon::AccessPoint)
        .fail_start(Daemon::Supplicant);
    let mut ctl = controller(&daemons);

    let err = ctl.evaluate_and_enforce(GRACE).await.unwrap_err();

    assert!(matches!(err, NetmodeError::NoNetworkAvailable { .. }));
    assert!(err.to_string().starts_with("No network available"));
    assert!(!daemons.running(Daemon::Supplicant));
    assert_eq!(ctl.mode(), Mode::Unknown);
}

#[tokio::test(start_paused = true)]
async fn reconcile_returns_to_client_when_network_reappears() {
    // Boot check fails, the first recovery attempt associates
    let daemons = FakeDaemons::booted(&[Association::NotAssociated, Association::Associated]);
    let mut ctl = controller(&daemons);
    ctl.evaluate_and_enforce(GRACE).await.unwrap();

    let (tx, rx) = watch::channel(false);
    let policy = ReconcilePolicy {
        interval: Duration::from_secs(30),
        max_backoff: Duration::from_secs(300),
    };

    let handle = tokio::spawn(async move {
        ctl.reconcile(policy, GRACE, rx).await.map(|_| ctl)
    });

    // One back-off plus the recovery grace period
    tokio::time::sleep(Duration::from_secs(30) + GRACE + Duration::from_secs(1)).await;
    tx.send(true).unwrap();
    let ctl = handle.await.unwrap().unwrap();

    assert_eq!(ctl.mode(), Mode::Client);
    daemons.assert_invariants(Mode::Client);
    assert!(daemons.running(Daemon::Supplicant));

    let audit: Vec<_> = ctl.transitions().iter().map(|t| (t.from, t.to)).collect();
    assert_eq!(
        audit,
        vec![
            (Mode::Unknown, Mode::AccessPoint),
            (Mode::AccessPoint, Mode::Client),
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn reconcile_backs_off_between_failed_recoveries() {
    let daemons = FakeDaemons::booted(&[Association::NotAssociated]);
    let mut ctl = controller(&daemons);
    ctl.evaluate_and_enforce(GRACE).await.unwrap();

    let (tx, rx) = watch::channel(false);
    let policy = ReconcilePolicy {
        interval: Duration::from_secs(10),
        max_backoff: Duration::from_secs(40),
    };
    let grace = Duration::from_secs(5);

    let started = Instant::now();
    let handle = tokio::spawn(async move {
        ctl.reconcile(policy, grace, rx).await.map(|_| ctl)
    });

    // Attempts at 10+5, then 20+5 later, then 40+5, then 40+5 (capped)
    tokio::time::sleep(Duration::from_secs(15 + 25 + 45 + 45 + 1)).await;
    tx.send(true).unwrap();
    let ctl = handle.await.unwrap().unwrap();

    let attempts: Vec<u64> = daemons
        .queried_at()
        .iter()
        .skip(1)
        .map(|t| t.duration_since(started).as_secs())
        .collect();
    assert_eq!(attempts, vec![15, 40, 85, 130]);

    assert_eq!(ctl.mode(), Mode::AccessPoint);
    daemons.assert_invariants(Mode::AccessPoint);
    // Failed recoveries do not count as mode changes
    assert_eq!(ctl.transitions().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn reconcile_falls_back_when_association_is_lost() {
    let daemons = FakeDaemons::booted(&[
        Association::Associated,
        Association::Associated,
        Association::NotAssociated,
    ]);
    let mut ctl = controller(&daemons);
    assert_eq!(
        ctl.evaluate_and_enforce(GRACE).await.unwrap().mode,
        Mode::Client
    );

    let (tx, rx) = watch::channel(false);
    let policy = ReconcilePolicy {
        interval: Duration::from_secs(30),
        max_backoff: Duration::from_secs(3600),
    };
    let handle = tokio::spawn(async move {
        ctl.reconcile(policy, GRACE, rx).await.map(|_| ctl)
    });

    // Checks at 30s (still associated) and 60s (lost)
    tokio::time::sleep(Duration::from_secs(61)).await;
    tx.send(true).unwrap();
    let ctl = handle.await.unwrap().unwrap();

    assert_eq!(ctl.mode(), Mode::AccessPoint);
    daemons.assert_invariants(Mode::AccessPoint);
    let last = ctl.transitions().last().unwrap();
    assert_eq!((last.from, last.to), (Mode::Client, Mode::AccessPoint));
    assert_eq!(last.reason, "association lost");
}

#[tokio::test(start_paused = true)]
async fn reconcile_stops_immediately_on_shutdown() {
    let daemons = FakeDaemons::booted(&[Association::Associated]);
    let mut ctl = controller(&daemons);

    let (tx, rx) = watch::channel(true);
    let policy = ReconcilePolicy {
        interval: Duration::from_secs(30),
        max_backoff: Duration::from_secs(60),
    };
    ctl.reconcile(policy, GRACE, rx).await.unwrap();
    drop(tx);

    assert!(daemons.calls().is_empty());
}

#[tokio::test]
async fn observe_reports_access_point_from_running_daemons() {
    let daemons = FakeDaemons::booted(&[Association::NotAssociated]);
    daemons.stop(Daemon::Supplicant).await.unwrap();
    daemons.start(Daemon::AccessPoint).await.unwrap();
    daemons.start(Daemon::DhcpServer).await.unwrap();

    let ctl = controller(&daemons);
    let observed = ctl.observe().await.unwrap();
    assert_eq!(observed.mode, Mode::AccessPoint);
    assert!(!observed.associated);
}

/// Boot into access-point mode, then hand back the controller for reconciling
async fn in_access_point_mode() -> (FakeDaemons, NetworkModeController<FakeDaemons>) {
    let daemons = FakeDaemons::booted(&[Association::NotAssociated]);
    let mut ctl = controller(&daemons);
    assert_eq!(
        ctl.evaluate_and_enforce(GRACE).await.unwrap().mode,
        Mode::AccessPoint
    );
    (daemons, ctl)
}

/// Calls made after the boot-time fallback
fn calls_after_fallback(daemons: &FakeDaemons) -> Vec<Call> {
    daemons.mutating_calls().into_iter().skip(3).collect()
}

const RECOVERY: ReconcilePolicy = ReconcilePolicy {
    interval: Duration::from_secs(30),
    max_backoff: Duration::from_secs(300),
};

#[tokio::test(start_paused = true)]
async fn recovery_supplicant_failure_restores_access_point() {
    let (daemons, mut ctl) = in_access_point_mode().await;
    daemons.break_start(Daemon::Supplicant);

    let (_tx, rx) = watch::channel(false);
    let err = ctl.reconcile(RECOVERY, GRACE, rx).await.unwrap_err();

    assert!(matches!(
        err,
        NetmodeError::DaemonStart { daemon: Daemon::Supplicant, .. }
    ));
    assert_eq!(
        calls_after_fallback(&daemons),
        vec![
            Call::Stop(Daemon::DhcpServer),
            Call::Stop(Daemon::AccessPoint),
            Call::Start(Daemon::Supplicant),
            Call::Stop(Daemon::Supplicant),
            Call::Start(Daemon::AccessPoint),
            Call::Start(Daemon::DhcpServer),
        ]
    );
    assert_eq!(ctl.mode(), Mode::AccessPoint);
    daemons.assert_invariants(Mode::AccessPoint);
    assert_eq!(ctl.transitions().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn recovery_stop_failure_keeps_access_point() {
    let (daemons, mut ctl) = in_access_point_mode().await;
    daemons.break_stop(Daemon::AccessPoint);

    let (_tx, rx) = watch::channel(false);
    let err = ctl.reconcile(RECOVERY, GRACE, rx).await.unwrap_err();

    assert!(matches!(
        err,
        NetmodeError::DaemonStop { daemon: Daemon::AccessPoint, .. }
    ));
    // The supplicant is never started while hostapd still holds the radio
    assert_eq!(
        calls_after_fallback(&daemons),
        vec![
            Call::Stop(Daemon::DhcpServer),
            Call::Stop(Daemon::AccessPoint),
            Call::Stop(Daemon::Supplicant),
            Call::Start(Daemon::DhcpServer),
        ]
    );
    assert_eq!(ctl.mode(), Mode::AccessPoint);
    assert!(daemons.running(Daemon::AccessPoint));
    daemons.assert_invariants(Mode::AccessPoint);
}

#[tokio::test(start_paused = true)]
async fn recovery_with_failed_restore_reports_no_network() {
    let (daemons, mut ctl) = in_access_point_mode().await;
    daemons.break_start(Daemon::Supplicant);
    daemons.break_start(Daemon::AccessPoint);

    let (_tx, rx) = watch::channel(false);
    let err = ctl.reconcile(RECOVERY, GRACE, rx).await.unwrap_err();

    match err {
        NetmodeError::NoNetworkAvailable { cause, rollback } => {
            assert!(cause.contains("client supplicant"));
            assert!(rollback.contains("access-point daemon"));
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(
        calls_after_fallback(&daemons),
        vec![
            Call::Stop(Daemon::DhcpServer),
            Call::Stop(Daemon::AccessPoint),
            Call::Start(Daemon::Supplicant),
            Call::Stop(Daemon::Supplicant),
            Call::Start(Daemon::AccessPoint),
        ]
    );
    assert_eq!(ctl.mode(), Mode::Unknown);
    daemons.assert_invariants(Mode::Unknown);
    assert!(!daemons.running(Daemon::AccessPoint));
}

#[tokio::test(start_paused = true)]
async fn failed_dhcp_start_does_not_leave_gateway_address() {
    let daemons =
        FakeDaemons::booted(&[Association::NotAssociated]).fail_start(Daemon::DhcpServer);
    let mut ctl = controller(&daemons);

    assert!(ctl.evaluate_and_enforce(GRACE).await.is_err());

    assert!(!daemons.gateway_assigned());
    assert!(daemons.running(Daemon::Supplicant));
    daemons.assert_invariants(ctl.mode());
}
