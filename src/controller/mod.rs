//! Per-appliance controller
//!
//! A [`Controller`] owns the connection state of one fireplace. It polls the
//! appliance in the background, buffers setting changes while the appliance
//! cannot take them, and pushes them back once contact is restored.

mod refresh;

use std::net::SocketAddr;
use std::sync::{Arc, Mutex, Weak};

use chrono::{DateTime, Utc};
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant};
use tracing::{debug, info};

use crate::core::{ControllerConfig, Error, FanMode, Result, SerialNumber, MAX_SET_TEMP, MIN_SET_TEMP};
use crate::network::Transport;
use crate::protocol::message::check_set_temp;
use crate::protocol::{ConnectionState, Settings};
use crate::util::lock;

/// Point-in-time view of one appliance
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Snapshot {
    pub serial: SerialNumber,
    pub addr: SocketAddr,
    pub state: ConnectionState,
    pub settings: Settings,
    /// Wall clock time of the last answered request
    pub last_response: Option<DateTime<Utc>>,
}

impl Snapshot {
    /// Room temperature, unknown while disconnected
    pub fn current_temp(&self) -> Option<u8> {
        match self.state {
            ConnectionState::Disconnected => None,
            _ => Some(self.settings.current_temp),
        }
    }
}

/// Receives controller state changes.
///
/// Called synchronously from the controller's poll task; implementations
/// must not block and must not call [`Controller::close`].
pub trait Notifier: Send + Sync {
    /// Settings or state changed
    fn updated(&self, _snapshot: &Snapshot) {}

    /// The appliance stopped answering for longer than the retry timeout
    fn disconnected(&self, _snapshot: &Snapshot, _reason: &Error) {}

    /// A disconnected appliance answered again and was resynchronised
    fn reconnected(&self, _snapshot: &Snapshot) {}
}

impl Notifier for () {}

/// Bookkeeping only touched while an exchange is in progress
struct Link {
    last_response: Instant,
    disconnect_notified: bool,
}

struct Inner {
    serial: SerialNumber,
    config: ControllerConfig,
    transport: Arc<dyn Transport>,
    notifier: Arc<dyn Notifier>,
    /// Held across every request so exchanges with the appliance never
    /// interleave
    link: tokio::sync::Mutex<Link>,
    snapshot: watch::Sender<Snapshot>,
    wake: Arc<Notify>,
    shutdown: watch::Sender<bool>,
    poll: Mutex<Option<JoinHandle<()>>>,
}

/// Handle to one appliance.
///
/// Clones share the same appliance. The background poll loop stops when
/// [`Controller::close`] is called or the last handle is dropped.
#[derive(Clone)]
pub struct Controller {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for Controller {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Controller")
            .field("snapshot", &self.snapshot())
            .finish()
    }
}

impl Controller {
    /// Connects to the appliance at `addr` and starts polling it.
    ///
    /// Fails if the first status request goes unanswered.
    pub async fn initialize(
        serial: SerialNumber,
        addr: SocketAddr,
        config: ControllerConfig,
        transport: Arc<dyn Transport>,
        notifier: Arc<dyn Notifier>,
    ) -> Result<Controller> {
        let status = refresh::fetch_status(transport.as_ref(), addr).await?;

        let snapshot = Snapshot {
            serial,
            addr,
            state: ConnectionState::Ready,
            settings: Settings::from(status),
            last_response: Some(Utc::now()),
        };
        let (snapshot, _) = watch::channel(snapshot);
        let (shutdown, shutdown_rx) = watch::channel(false);

        let inner = Arc::new(Inner {
            serial,
            config,
            transport,
            notifier,
            link: tokio::sync::Mutex::new(Link {
                last_response: Instant::now(),
                disconnect_notified: false,
            }),
            snapshot,
            wake: Arc::new(Notify::new()),
            shutdown,
            poll: Mutex::new(None),
        });

        let handle = tokio::spawn(poll_loop(
            Arc::downgrade(&inner),
            inner.config.clone(),
            inner.wake.clone(),
            inner.snapshot.subscribe(),
            shutdown_rx,
        ));
        *lock(&inner.poll) = Some(handle);

        info!(%serial, %addr, ?status, "Controller initialized");
        Ok(Controller { inner })
    }

    pub fn serial(&self) -> SerialNumber {
        self.inner.serial
    }

    /// Current network address of the appliance
    pub fn addr(&self) -> SocketAddr {
        self.inner.snapshot.borrow().addr
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.snapshot.borrow().state
    }

    pub fn is_on(&self) -> bool {
        self.inner.snapshot.borrow().settings.is_on
    }

    pub fn fan(&self) -> FanMode {
        self.inner.snapshot.borrow().settings.fan
    }

    pub fn desired_temp(&self) -> u8 {
        self.inner.snapshot.borrow().settings.desired_temp
    }

    /// Room temperature as last reported, `None` while disconnected
    pub fn current_temp(&self) -> Option<u8> {
        self.inner.snapshot.borrow().current_temp()
    }

    pub fn has_new_timers(&self) -> bool {
        self.inner.snapshot.borrow().settings.has_new_timers
    }

    pub fn min_temp(&self) -> u8 {
        MIN_SET_TEMP
    }

    pub fn max_temp(&self) -> u8 {
        MAX_SET_TEMP
    }

    pub fn snapshot(&self) -> Snapshot {
        *self.inner.snapshot.borrow()
    }

    /// Receives every snapshot change from now on
    pub fn subscribe(&self) -> watch::Receiver<Snapshot> {
        self.inner.snapshot.subscribe()
    }

    /// Turns the fire on or off.
    ///
    /// Applied immediately when the appliance is ready, otherwise buffered
    /// until contact is restored.
    pub async fn set_on(&self, on: bool) {
        self.inner.change(refresh::Change::Power(on)).await
    }

    /// Selects the fan mode, buffered like [`Controller::set_on`]
    pub async fn set_fan(&self, fan: FanMode) {
        self.inner.change(refresh::Change::Fan(fan)).await
    }

    /// Sets the desired temperature, buffered like [`Controller::set_on`]
    pub async fn set_desired_temp(&self, temp: u8) -> Result<()> {
        check_set_temp(temp).map_err(|_| Error::TemperatureOutOfRange(temp))?;
        self.inner.change(refresh::Change::DesiredTemp(temp)).await;
        Ok(())
    }

    /// Polls the appliance now instead of waiting for the next interval
    pub async fn refresh(&self) {
        self.inner.refresh().await
    }

    /// Records the address discovery last saw the appliance at.
    ///
    /// Triggers an immediate poll when the appliance is not ready, so a
    /// moved appliance is picked up without waiting out the interval.
    pub fn refresh_address(&self, addr: SocketAddr) {
        let mut changed = false;
        self.inner.snapshot.send_if_modified(|snapshot| {
            changed = snapshot.addr != addr;
            snapshot.addr = addr;
            changed
        });
        if changed {
            info!(serial = %self.inner.serial, %addr, "Appliance address changed");
        }

        if !self.state().is_ready() {
            debug!(serial = %self.inner.serial, "Waking poll loop");
            self.inner.wake.notify_one();
        }
    }

    /// Stops the poll loop, letting an exchange in flight finish first
    pub async fn close(&self) {
        self.inner.shutdown.send_replace(true);
        let handle = lock(&self.inner.poll).take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                debug!(serial = %self.inner.serial, error = %e, "Poll task ended abnormally");
            }
            info!(serial = %self.inner.serial, "Controller closed");
        }
    }

    pub fn is_closed(&self) -> bool {
        *self.inner.shutdown.borrow()
    }
}

/// Polls until shutdown or until every handle is gone.
///
/// The next poll is rescheduled whenever the connection state changes.
async fn poll_loop(
    inner: Weak<Inner>,
    config: ControllerConfig,
    wake: Arc<Notify>,
    mut changes: watch::Receiver<Snapshot>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut state = changes.borrow_and_update().state;
    let mut deadline = Instant::now() + state.poll_delay(Instant::now(), &config);

    loop {
        tokio::select! {
            _ = time::sleep_until(deadline) => {}
            _ = wake.notified() => {}
            changed = changes.changed() => {
                if changed.is_err() {
                    return;
                }
                let next = changes.borrow_and_update().state;
                if next != state {
                    state = next;
                    deadline = Instant::now() + state.poll_delay(Instant::now(), &config);
                }
                continue;
            }
            _ = shutdown.changed() => return,
        }

        match inner.upgrade() {
            Some(inner) => inner.refresh().await,
            None => return,
        }

        state = changes.borrow_and_update().state;
        deadline = Instant::now() + state.poll_delay(Instant::now(), &config);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use tokio_test::{assert_err, assert_ok};

    use crate::protocol::{Command, CommandId};
    use crate::testing::{addr, status, Event, FakeNetwork, Recorder};

    const SERIAL: u32 = 1111;

    async fn setup() -> (FakeNetwork, Arc<Recorder>, Controller) {
        let network = FakeNetwork::new();
        network.add(addr(10), SERIAL, status(false, 19, 16));
        let recorder = Recorder::new();

        let ctrl = Controller::initialize(
            SerialNumber(SERIAL),
            addr(10),
            ControllerConfig::default(),
            Arc::new(network.clone()),
            recorder.clone(),
        )
        .await
        .unwrap();
        network.take_sent();

        (network, recorder, ctrl)
    }

    #[tokio::test(start_paused = true)]
    async fn test_initialize_reads_status() {
        let (_network, _recorder, ctrl) = setup().await;

        assert_eq!(ctrl.state(), ConnectionState::Ready);
        assert!(!ctrl.is_on());
        assert_eq!(ctrl.fan(), FanMode::Auto);
        assert_eq!(ctrl.desired_temp(), 19);
        assert_eq!(ctrl.current_temp(), Some(16));
        assert_eq!(ctrl.min_temp(), 4);
        assert_eq!(ctrl.max_temp(), 30);
        assert!(ctrl.snapshot().last_response.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_initialize_fails_when_unanswered() {
        let network = FakeNetwork::new();
        let result = Controller::initialize(
            SerialNumber(SERIAL),
            addr(10),
            ControllerConfig::default(),
            Arc::new(network.clone()),
            Arc::new(()),
        )
        .await;

        assert!(matches!(result, Err(Error::NoResponse { .. })));
        assert_eq!(network.sent(), vec![Command::StatusPlease]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_power_on_then_set_temp() {
        let (network, _recorder, ctrl) = setup().await;

        ctrl.set_on(true).await;
        assert!(ctrl.is_on());
        assert!(matches!(ctrl.state(), ConnectionState::Busy { .. }));
        assert_eq!(network.take_sent(), vec![Command::PowerOn]);

        time::sleep(Duration::from_secs(125)).await;
        assert_eq!(ctrl.state(), ConnectionState::Ready);
        assert!(network.status_of(SERIAL).fire_on);
        assert_eq!(network.take_sent(), vec![Command::StatusPlease]);

        assert_ok!(ctrl.set_desired_temp(24).await);
        assert_eq!(ctrl.desired_temp(), 24);
        assert_eq!(network.status_of(SERIAL).desired_temp, 24);
        assert_eq!(
            network.take_sent(),
            vec![Command::NewSetTemp(24), Command::StatusPlease]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_unchanged_setting_sends_nothing() {
        let (network, _recorder, ctrl) = setup().await;

        ctrl.set_on(false).await;
        ctrl.set_fan(FanMode::Auto).await;
        ctrl.set_desired_temp(19).await.unwrap();

        assert!(network.sent().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_out_of_range_temperature() {
        let (network, _recorder, ctrl) = setup().await;

        let err = ctrl.set_desired_temp(31).await.unwrap_err();
        assert!(matches!(err, Error::TemperatureOutOfRange(31)));
        assert_err!(ctrl.set_desired_temp(3).await);
        assert_eq!(ctrl.desired_temp(), 19);
        assert!(network.sent().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_fan_changes_are_sequenced() {
        let (network, _recorder, ctrl) = setup().await;

        ctrl.set_fan(FanMode::FanBoost).await;
        assert_eq!(
            network.take_sent(),
            vec![Command::FanBoostOn, Command::StatusPlease]
        );

        ctrl.set_fan(FanMode::FlameEffect).await;
        assert_eq!(
            network.take_sent(),
            vec![Command::FanBoostOff, Command::FlameEffectOn, Command::StatusPlease]
        );

        ctrl.set_fan(FanMode::Auto).await;
        assert_eq!(
            network.take_sent(),
            vec![Command::FlameEffectOff, Command::StatusPlease]
        );
        assert_eq!(ctrl.fan(), FanMode::Auto);
    }

    #[tokio::test(start_paused = true)]
    async fn test_changes_buffered_while_busy() {
        let (network, _recorder, ctrl) = setup().await;

        ctrl.set_on(true).await;
        ctrl.set_fan(FanMode::FlameEffect).await;
        assert_eq!(ctrl.fan(), FanMode::FlameEffect);
        assert_eq!(network.take_sent(), vec![Command::PowerOn]);

        time::sleep(Duration::from_secs(60)).await;
        assert!(network.sent().is_empty());

        time::sleep(Duration::from_secs(65)).await;
        assert_eq!(ctrl.state(), ConnectionState::Ready);
        assert_eq!(
            network.take_sent(),
            vec![Command::StatusPlease, Command::FlameEffectOn]
        );
        assert!(network.status_of(SERIAL).flame_effect_on);
        assert_eq!(ctrl.fan(), FanMode::FlameEffect);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disconnect_and_reconnect() {
        let (network, recorder, ctrl) = setup().await;
        let serial = SerialNumber(SERIAL);
        network.set_responsive(SERIAL, false);

        // First poll at 30s, times out at 35s
        time::sleep(Duration::from_secs(36)).await;
        assert_eq!(ctrl.state(), ConnectionState::NonResponsive);
        assert_eq!(ctrl.current_temp(), Some(16));

        time::sleep(Duration::from_secs(200)).await;
        assert_eq!(ctrl.state(), ConnectionState::Disconnected);
        assert_eq!(ctrl.current_temp(), None);
        assert_eq!(recorder.count(Event::Disconnected(serial)), 1);

        // Buffered while disconnected, pushed on reconnect
        ctrl.set_desired_temp(22).await.unwrap();
        assert_eq!(ctrl.desired_temp(), 22);
        network.set_responsive(SERIAL, true);
        network.take_sent();

        // Next disconnected poll is due at 255s
        time::sleep(Duration::from_secs(20)).await;
        assert_eq!(ctrl.state(), ConnectionState::Ready);
        assert_eq!(recorder.count(Event::Disconnected(serial)), 1);
        assert_eq!(recorder.count(Event::Reconnected(serial)), 1);
        assert_eq!(network.status_of(SERIAL).desired_temp, 22);
        assert_eq!(
            network.take_sent(),
            vec![Command::StatusPlease, Command::NewSetTemp(22)]
        );

        let events = recorder.events();
        let reconnected = events
            .iter()
            .position(|e| *e == Event::Reconnected(serial))
            .unwrap();
        assert_eq!(events.last(), Some(&Event::Updated(serial)));
        assert!(reconnected < events.len() - 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_change_is_buffered() {
        let (network, _recorder, ctrl) = setup().await;
        network.set_responsive(SERIAL, false);

        ctrl.set_on(true).await;
        assert_eq!(ctrl.state(), ConnectionState::NonResponsive);
        assert!(ctrl.is_on());

        network.set_responsive(SERIAL, true);
        network.take_sent();
        time::sleep(Duration::from_secs(11)).await;

        assert!(matches!(ctrl.state(), ConnectionState::Busy { .. }));
        assert!(network.status_of(SERIAL).fire_on);
        assert_eq!(
            network.take_sent(),
            vec![Command::StatusPlease, Command::PowerOn]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_lost_reply_after_settling_is_not_a_disconnect() {
        let (network, recorder, ctrl) = setup().await;
        let serial = SerialNumber(SERIAL);

        ctrl.set_on(true).await;
        network.set_responsive(SERIAL, false);

        // Settled at 120s, first poll after that times out at 125s
        time::sleep(Duration::from_secs(126)).await;
        assert_eq!(ctrl.state(), ConnectionState::NonResponsive);
        assert_eq!(recorder.count(Event::Disconnected(serial)), 0);

        // Retry timeout counts from the end of the settle period
        time::sleep(Duration::from_secs(70)).await;
        assert_eq!(ctrl.state(), ConnectionState::Disconnected);
        assert_eq!(recorder.count(Event::Disconnected(serial)), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_resync_clears_both_fan_toggles() {
        let (network, _recorder, ctrl) = setup().await;
        let mut both_on = status(false, 19, 16);
        both_on.fan_boost_on = true;
        both_on.flame_effect_on = true;
        network.set_status(SERIAL, both_on);
        network.set_responsive(SERIAL, false);

        time::sleep(Duration::from_secs(36)).await;
        assert_eq!(ctrl.state(), ConnectionState::NonResponsive);
        network.set_responsive(SERIAL, true);
        network.take_sent();

        time::sleep(Duration::from_secs(10)).await;
        assert_eq!(ctrl.state(), ConnectionState::Ready);
        assert_eq!(
            network.take_sent(),
            vec![Command::StatusPlease, Command::FanBoostOff, Command::FlameEffectOff]
        );
        let device = network.status_of(SERIAL);
        assert!(!device.fan_boost_on);
        assert!(!device.flame_effect_on);

        // The next regular poll agrees with what was pushed
        time::sleep(Duration::from_secs(40)).await;
        assert_eq!(ctrl.fan(), FanMode::Auto);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fan_change_failing_partway_is_finished_on_resync() {
        let (network, _recorder, ctrl) = setup().await;
        ctrl.set_fan(FanMode::FanBoost).await;
        network.take_sent();

        network.drop_next(CommandId::FlameEffectOn);
        ctrl.set_fan(FanMode::FlameEffect).await;
        assert_eq!(ctrl.state(), ConnectionState::NonResponsive);
        assert_eq!(ctrl.fan(), FanMode::FlameEffect);
        assert_eq!(
            network.take_sent(),
            vec![Command::FanBoostOff, Command::FlameEffectOn]
        );
        let device = network.status_of(SERIAL);
        assert!(!device.fan_boost_on);
        assert!(!device.flame_effect_on);

        time::sleep(Duration::from_secs(11)).await;
        assert_eq!(ctrl.state(), ConnectionState::Ready);
        assert_eq!(
            network.take_sent(),
            vec![Command::StatusPlease, Command::FlameEffectOn]
        );
        assert!(network.status_of(SERIAL).flame_effect_on);
    }

    #[tokio::test(start_paused = true)]
    async fn test_refresh_address_wakes_poll() {
        let (network, _recorder, ctrl) = setup().await;
        network.relocate(SERIAL, addr(20));

        time::sleep(Duration::from_secs(36)).await;
        assert_eq!(ctrl.state(), ConnectionState::NonResponsive);

        ctrl.refresh_address(addr(20));
        time::sleep(Duration::from_secs(1)).await;
        assert_eq!(ctrl.addr(), addr(20));
        assert_eq!(ctrl.state(), ConnectionState::Ready);
    }

    #[tokio::test(start_paused = true)]
    async fn test_subscribe_sees_changes() {
        let (_network, _recorder, ctrl) = setup().await;
        let mut updates = ctrl.subscribe();

        ctrl.set_fan(FanMode::FanBoost).await;
        assert!(updates.has_changed().unwrap());
        assert_eq!(updates.borrow_and_update().settings.fan, FanMode::FanBoost);
    }

    #[tokio::test(start_paused = true)]
    async fn test_close_stops_polling() {
        let (network, _recorder, ctrl) = setup().await;

        ctrl.close().await;
        assert!(ctrl.is_closed());
        time::sleep(Duration::from_secs(600)).await;
        assert!(network.sent().is_empty());
    }
}
