use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use scene_supervisor::config::{RecoveryConfig, SceneConfig};
use scene_supervisor::events::{FaultCause, MountState, SceneCommand};
use scene_supervisor::platform::capability::{Capability, FixedProbe, Probe};
use scene_supervisor::supervisor::RenderSupervisor;
use scene_supervisor::tasks::recovery::RecoveryBudget;
use scene_supervisor::tasks::scene::{SceneHost, ScenePage, SurfaceCallbacks};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep};
use tokio_util::sync::CancellationToken;

const MOUNT_DELAY: Duration = Duration::from_millis(1000);
const COOLDOWN: Duration = Duration::from_millis(2000);

#[derive(Debug, Clone, PartialEq, Eq)]
enum HostEvent {
    Mounted(u32),
    Unmounted(u32),
    Fallback { retry_available: bool },
}

#[derive(Default)]
struct RecorderState {
    events: Vec<HostEvent>,
    live: u32,
    max_live: u32,
    next_id: u32,
    failed_mounts: u32,
    fail_mounts: bool,
    callbacks: Option<SurfaceCallbacks>,
}

#[derive(Clone, Default)]
struct Recorder(Arc<Mutex<RecorderState>>);

impl Recorder {
    fn events(&self) -> Vec<HostEvent> {
        self.0.lock().unwrap().events.clone()
    }

    fn mounts(&self) -> usize {
        self.events()
            .iter()
            .filter(|ev| matches!(ev, HostEvent::Mounted(_)))
            .count()
    }

    fn max_live(&self) -> u32 {
        self.0.lock().unwrap().max_live
    }

    fn live(&self) -> u32 {
        self.0.lock().unwrap().live
    }

    fn failed_mounts(&self) -> u32 {
        self.0.lock().unwrap().failed_mounts
    }

    fn set_fail_mounts(&self, fail: bool) {
        self.0.lock().unwrap().fail_mounts = fail;
    }

    fn lose_context(&self, reason: &str) {
        let callbacks = self
            .0
            .lock()
            .unwrap()
            .callbacks
            .clone()
            .expect("a scene should be mounted");
        callbacks.on_context_lost(reason);
    }
}

struct RecordingHost(Recorder);

impl SceneHost for RecordingHost {
    type Scene = u32;

    fn mount(&mut self, callbacks: SurfaceCallbacks) -> anyhow::Result<u32> {
        let mut st = self.0.0.lock().unwrap();
        if st.fail_mounts {
            st.failed_mounts += 1;
            anyhow::bail!("surface init failed");
        }
        st.next_id += 1;
        st.live += 1;
        st.max_live = st.max_live.max(st.live);
        st.callbacks = Some(callbacks);
        let id = st.next_id;
        st.events.push(HostEvent::Mounted(id));
        Ok(id)
    }

    fn unmount(&mut self, scene: u32) {
        let mut st = self.0.0.lock().unwrap();
        st.live -= 1;
        st.callbacks = None;
        st.events.push(HostEvent::Unmounted(scene));
    }

    fn show_fallback(&mut self, retry_available: bool) {
        self.0
            .0
            .lock()
            .unwrap()
            .events
            .push(HostEvent::Fallback { retry_available });
    }
}

struct Harness {
    recorder: Recorder,
    supervisor: RenderSupervisor,
    budget: RecoveryBudget,
    state: watch::Receiver<MountState>,
    commands: mpsc::Sender<SceneCommand>,
    cancel: CancellationToken,
    handle: JoinHandle<anyhow::Result<()>>,
}

fn scene_cfg() -> SceneConfig {
    SceneConfig {
        mount_delay: MOUNT_DELAY,
        reduced_motion: false,
    }
}

fn recovery_cfg() -> RecoveryConfig {
    RecoveryConfig {
        cooldown: COOLDOWN,
        max_attempts: 3,
    }
}

fn start_page(
    probe: impl Probe + 'static,
    supervisor: RenderSupervisor,
    budget: RecoveryBudget,
    scene: SceneConfig,
) -> Harness {
    let recorder = Recorder::default();
    let page = ScenePage::new(
        RecordingHost(recorder.clone()),
        Capability::new(probe),
        supervisor.clone(),
        budget.clone(),
        scene,
        recovery_cfg(),
    );
    let state = page.subscribe_state();
    let (commands, command_rx) = mpsc::channel(4);
    let cancel = CancellationToken::new();
    let handle = tokio::spawn(page.run(command_rx, cancel.clone()));
    Harness {
        recorder,
        supervisor,
        budget,
        state,
        commands,
        cancel,
        handle,
    }
}

fn start_capable_page() -> Harness {
    start_page(
        FixedProbe(true),
        RenderSupervisor::default(),
        RecoveryBudget::new(3),
        scene_cfg(),
    )
}

async fn wait_for_state(rx: &mut watch::Receiver<MountState>, target: MountState) {
    tokio::time::timeout(Duration::from_secs(30), rx.wait_for(|s| *s == target))
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for {target:?}"))
        .expect("page dropped its state channel");
}

impl Harness {
    async fn shutdown(self) -> Recorder {
        self.cancel.cancel();
        self.handle
            .await
            .expect("page task panicked")
            .expect("page returned an error");
        self.recorder
    }
}

#[tokio::test(start_paused = true)]
async fn capable_page_mounts_after_delay() {
    let start = Instant::now();
    let mut h = start_capable_page();

    wait_for_state(&mut h.state, MountState::PendingMount).await;
    assert_eq!(h.recorder.mounts(), 0, "scene must wait for the mount delay");

    wait_for_state(&mut h.state, MountState::Mounted).await;
    assert!(
        start.elapsed() >= MOUNT_DELAY,
        "mounted too early: {:?}",
        start.elapsed()
    );
    assert_eq!(h.recorder.events(), vec![HostEvent::Mounted(1)]);

    let recorder = h.shutdown().await;
    assert_eq!(recorder.live(), 0, "teardown must unmount the scene");
}

#[tokio::test(start_paused = true)]
async fn context_loss_faults_then_recovers_after_cooldown() {
    let mut h = start_capable_page();
    wait_for_state(&mut h.state, MountState::Mounted).await;

    let fault_at = Instant::now();
    h.recorder.lose_context("gpu reset");
    wait_for_state(&mut h.state, MountState::Faulted).await;
    assert_eq!(
        h.recorder.events(),
        vec![
            HostEvent::Mounted(1),
            HostEvent::Unmounted(1),
            HostEvent::Fallback {
                retry_available: true
            },
        ]
    );
    assert_eq!(h.supervisor.status().error_count, 1);

    wait_for_state(&mut h.state, MountState::Mounted).await;
    assert!(fault_at.elapsed() >= COOLDOWN + MOUNT_DELAY);
    assert_eq!(h.budget.used(), 1);
    assert!(!h.supervisor.status().has_error);
    assert_eq!(h.recorder.mounts(), 2);
    assert_eq!(h.recorder.max_live(), 1, "never more than one live scene");

    h.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn persistent_failure_exhausts_automatic_recovery() {
    let mut h = start_capable_page();
    wait_for_state(&mut h.state, MountState::Mounted).await;

    h.recorder.set_fail_mounts(true);
    h.recorder.lose_context("flap 0");
    // the scene is gone after the first loss; the rest arrive straight at the supervisor
    for n in 1..4 {
        h.supervisor.report_error(FaultCause::ContextLost {
            reason: format!("flap {n}"),
        });
    }
    assert_eq!(h.supervisor.status().error_count, 4);
    wait_for_state(&mut h.state, MountState::Faulted).await;

    sleep(Duration::from_secs(20)).await;
    assert_eq!(h.budget.used(), 3);
    assert_eq!(h.recorder.failed_mounts(), 3);
    assert_eq!(*h.state.borrow(), MountState::Faulted);
    assert!(h.supervisor.status().has_error);

    sleep(Duration::from_secs(120)).await;
    assert_eq!(h.budget.used(), 3, "no automatic attempts past the limit");
    assert_eq!(h.recorder.failed_mounts(), 3);

    // manual retry is still offered
    h.recorder.set_fail_mounts(false);
    h.commands.send(SceneCommand::Retry).await.unwrap();
    wait_for_state(&mut h.state, MountState::Mounted).await;
    assert_eq!(h.budget.used(), 3);
    assert_eq!(h.recorder.live(), 1);

    h.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn missing_capability_never_mounts() {
    let mut h = start_page(
        FixedProbe(false),
        RenderSupervisor::default(),
        RecoveryBudget::new(3),
        scene_cfg(),
    );

    wait_for_state(&mut h.state, MountState::CapabilityDenied).await;
    assert_eq!(
        h.recorder.events(),
        vec![HostEvent::Fallback {
            retry_available: false
        }]
    );

    h.commands.send(SceneCommand::Retry).await.unwrap();
    sleep(Duration::from_secs(60)).await;
    assert_eq!(*h.state.borrow(), MountState::CapabilityDenied);
    assert_eq!(h.recorder.mounts(), 0);

    let recorder = h.shutdown().await;
    assert_eq!(recorder.mounts(), 0);
}

struct CountingProbe(Arc<AtomicUsize>);

impl Probe for CountingProbe {
    fn probe(&self) -> bool {
        self.0.fetch_add(1, Ordering::SeqCst);
        true
    }
}

#[tokio::test(start_paused = true)]
async fn reduced_motion_disables_scene_without_probing() {
    let calls = Arc::new(AtomicUsize::new(0));
    let mut h = start_page(
        CountingProbe(calls.clone()),
        RenderSupervisor::default(),
        RecoveryBudget::new(3),
        SceneConfig {
            reduced_motion: true,
            ..scene_cfg()
        },
    );

    wait_for_state(&mut h.state, MountState::CapabilityDenied).await;
    sleep(Duration::from_secs(5)).await;
    assert_eq!(h.recorder.mounts(), 0);
    assert_eq!(calls.load(Ordering::SeqCst), 0);

    h.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn teardown_cancels_pending_mount() {
    let mut h = start_capable_page();
    wait_for_state(&mut h.state, MountState::PendingMount).await;

    let mut state = h.state.clone();
    let recorder = h.shutdown().await;
    assert_eq!(*state.borrow_and_update(), MountState::NotMounted);

    sleep(MOUNT_DELAY * 5).await;
    assert_eq!(recorder.mounts(), 0, "timer fired after teardown");
}

#[tokio::test(start_paused = true)]
async fn retry_is_ignored_while_healthy() {
    let mut h = start_capable_page();
    wait_for_state(&mut h.state, MountState::Mounted).await;

    h.commands.send(SceneCommand::Retry).await.unwrap();
    sleep(Duration::from_secs(5)).await;
    assert_eq!(*h.state.borrow(), MountState::Mounted);
    assert_eq!(h.recorder.mounts(), 1);

    h.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn page_opened_during_fault_shows_fallback_first() {
    let supervisor = RenderSupervisor::default();
    supervisor.report_error(FaultCause::ContextLost {
        reason: "left over from previous page".into(),
    });

    let mut h = start_page(
        FixedProbe(true),
        supervisor,
        RecoveryBudget::new(3),
        scene_cfg(),
    );
    wait_for_state(&mut h.state, MountState::Faulted).await;
    assert_eq!(h.recorder.mounts(), 0);

    wait_for_state(&mut h.state, MountState::Mounted).await;
    assert_eq!(h.budget.used(), 1);

    h.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn recovery_budget_spans_page_visits() {
    let supervisor = RenderSupervisor::default();
    let budget = RecoveryBudget::new(3);

    let mut first = start_page(
        FixedProbe(true),
        supervisor.clone(),
        budget.clone(),
        scene_cfg(),
    );
    for _ in 0..2 {
        wait_for_state(&mut first.state, MountState::Mounted).await;
        first.recorder.lose_context("gpu reset");
        wait_for_state(&mut first.state, MountState::Faulted).await;
    }
    wait_for_state(&mut first.state, MountState::Mounted).await;
    assert_eq!(budget.used(), 2);
    first.shutdown().await;

    let mut second = start_page(FixedProbe(true), supervisor, budget.clone(), scene_cfg());
    wait_for_state(&mut second.state, MountState::Mounted).await;
    second.recorder.lose_context("gpu reset");
    wait_for_state(&mut second.state, MountState::Faulted).await;
    wait_for_state(&mut second.state, MountState::Mounted).await;
    assert_eq!(budget.used(), 3);

    second.recorder.lose_context("gpu reset");
    wait_for_state(&mut second.state, MountState::Faulted).await;
    sleep(Duration::from_secs(30)).await;
    assert_eq!(*second.state.borrow(), MountState::Faulted);
    assert_eq!(budget.used(), 3);

    second.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn aborted_page_stops_its_recovery_loop() {
    let mut h = start_capable_page();
    wait_for_state(&mut h.state, MountState::Mounted).await;

    h.handle.abort();
    let joined = h.handle.await;
    assert!(joined.unwrap_err().is_cancelled());

    h.supervisor.report_error(FaultCause::ContextLost {
        reason: "gpu reset".into(),
    });
    sleep(COOLDOWN * 5).await;
    assert!(h.supervisor.status().has_error);
    assert_eq!(h.budget.used(), 0);
}

#[tokio::test(start_paused = true)]
async fn concurrent_pages_spend_one_attempt_per_fault() {
    let supervisor = RenderSupervisor::default();
    let budget = RecoveryBudget::new(3);
    let mut left = start_page(
        FixedProbe(true),
        supervisor.clone(),
        budget.clone(),
        scene_cfg(),
    );
    let mut right = start_page(
        FixedProbe(true),
        supervisor.clone(),
        budget.clone(),
        scene_cfg(),
    );

    for fault in 1..=3 {
        wait_for_state(&mut left.state, MountState::Mounted).await;
        wait_for_state(&mut right.state, MountState::Mounted).await;
        left.recorder.lose_context("gpu reset");
        wait_for_state(&mut right.state, MountState::Faulted).await;
        wait_for_state(&mut right.state, MountState::Mounted).await;
        assert_eq!(budget.used(), fault);
    }
    assert!(!supervisor.status().has_error);

    left.shutdown().await;
    right.shutdown().await;
}

#[tokio::test(start_paused = true)]
async fn disabled_page_keeps_accepting_retries() {
    let mut h = start_page(
        FixedProbe(false),
        RenderSupervisor::default(),
        RecoveryBudget::new(3),
        scene_cfg(),
    );
    wait_for_state(&mut h.state, MountState::CapabilityDenied).await;

    for _ in 0..10 {
        tokio::time::timeout(Duration::from_secs(1), h.commands.send(SceneCommand::Retry))
            .await
            .expect("retry send stalled")
            .expect("page dropped its command channel");
    }
    assert_eq!(*h.state.borrow(), MountState::CapabilityDenied);

    let recorder = h.shutdown().await;
    assert_eq!(recorder.mounts(), 0);
}
