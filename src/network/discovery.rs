use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex, RwLock, Weak};

use futures::future::join_all;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tokio::time;
use tracing::{debug, info, warn};

use crate::controller::{Controller, Notifier, Snapshot};
use crate::core::{Config, Error, Result, SerialNumber};
use crate::protocol::{Command, Response};
use crate::util::{lock, read, write};
use super::{udp_transport_factory, Transport, TransportFactory};

/// Receives discovery and controller events.
///
/// Every method has an empty default, so implementors only override what
/// they care about. Calls are made synchronously from background tasks.
pub trait Listener: Send + Sync {
    /// A new appliance was found and its controller initialized
    fn controller_discovered(&self, _ctrl: &Controller) {}

    /// An appliance stopped answering
    fn controller_disconnected(&self, _ctrl: &Controller, _reason: &Error) {}

    /// A disconnected appliance answered again
    fn controller_reconnected(&self, _ctrl: &Controller) {}

    /// An appliance's settings or state changed
    fn controller_update(&self, _ctrl: &Controller) {}
}

/// State shared between the service handle and its background tasks
struct Shared {
    config: Config,
    factory: TransportFactory,
    /// Transport used for search broadcasts
    search: Arc<dyn Transport>,
    controllers: RwLock<HashMap<SerialNumber, Controller>>,
    /// Serials whose controller is still being initialized
    pending: Mutex<HashSet<SerialNumber>>,
    /// Serials currently reported disconnected
    disconnected: Mutex<HashSet<SerialNumber>>,
    listeners: RwLock<Vec<Arc<dyn Listener>>>,
    rescan: Arc<Notify>,
    shutdown: watch::Sender<bool>,
}

/// Finds appliances on the local network and keeps a controller per serial.
///
/// A search is broadcast every `scan_interval`, or every `rescan_interval`
/// while any known appliance is disconnected, so moved appliances are
/// found again quickly.
pub struct DiscoveryService {
    shared: Arc<Shared>,
    scan: Mutex<Option<JoinHandle<()>>>,
}

impl DiscoveryService {
    /// Starts discovery with real UDP transports
    pub fn start_udp(config: Config) -> Result<Self> {
        let factory = udp_transport_factory(config.transport.clone());
        Self::start(config, factory)
    }

    /// Starts discovery, creating each controller's transport from `factory`
    pub fn start(config: Config, factory: TransportFactory) -> Result<Self> {
        config.validate()?;

        let (shutdown, shutdown_rx) = watch::channel(false);
        let shared = Arc::new(Shared {
            search: factory(),
            config,
            factory,
            controllers: RwLock::new(HashMap::new()),
            pending: Mutex::new(HashSet::new()),
            disconnected: Mutex::new(HashSet::new()),
            listeners: RwLock::new(Vec::new()),
            rescan: Arc::new(Notify::new()),
            shutdown,
        });

        let scan = tokio::spawn(scan_loop(
            Arc::downgrade(&shared),
            shared.rescan.clone(),
            shutdown_rx,
        ));
        info!("Discovery started");

        Ok(DiscoveryService {
            shared,
            scan: Mutex::new(Some(scan)),
        })
    }

    /// Registers a listener.
    ///
    /// The listener is immediately told about every appliance already found.
    pub fn add_listener(&self, listener: Arc<dyn Listener>) {
        write(&self.shared.listeners).push(listener.clone());
        for ctrl in self.controllers() {
            listener.controller_discovered(&ctrl);
        }
    }

    /// Unregisters a listener previously passed to `add_listener`
    pub fn remove_listener(&self, listener: &Arc<dyn Listener>) {
        write(&self.shared.listeners).retain(|l| !same_listener(l, listener));
    }

    /// Controllers for every appliance found so far
    pub fn controllers(&self) -> Vec<Controller> {
        self.shared.controllers()
    }

    pub fn controller(&self, serial: SerialNumber) -> Option<Controller> {
        self.shared.controller(serial)
    }

    /// Broadcasts a search now instead of waiting for the next interval
    pub fn rescan(&self) -> Result<()> {
        if self.is_closed() {
            return Err(Error::Closed);
        }
        self.shared.rescan.notify_one();
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        *self.shared.shutdown.borrow()
    }

    /// Stops scanning and closes every controller
    pub async fn close(&self) {
        if self.shared.shutdown.send_replace(true) {
            return;
        }

        let scan = lock(&self.scan).take();
        if let Some(scan) = scan {
            if let Err(e) = scan.await {
                debug!(error = %e, "Scan task ended abnormally");
            }
        }

        let controllers = self.controllers();
        join_all(controllers.iter().map(|ctrl| ctrl.close())).await;
        info!(count = controllers.len(), "Discovery closed");
    }
}

fn same_listener(a: &Arc<dyn Listener>, b: &Arc<dyn Listener>) -> bool {
    Arc::as_ptr(a) as *const () == Arc::as_ptr(b) as *const ()
}

impl Shared {
    fn controllers(&self) -> Vec<Controller> {
        read(&self.controllers).values().cloned().collect()
    }

    fn controller(&self, serial: SerialNumber) -> Option<Controller> {
        read(&self.controllers).get(&serial).cloned()
    }

    fn listeners(&self) -> Vec<Arc<dyn Listener>> {
        read(&self.listeners).clone()
    }

    fn is_closed(&self) -> bool {
        *self.shutdown.borrow()
    }

    fn any_disconnected(&self) -> bool {
        !lock(&self.disconnected).is_empty()
    }

    /// Broadcasts one search and handles every announcement
    async fn scan(self: &Arc<Self>) {
        let target = self.config.transport.broadcast_target();
        let responses = match self.search.send_command(target, Command::SearchForFires, true).await {
            Ok(responses) => responses,
            Err(e) => {
                debug!(error = %e, "No appliances answered the search");
                return;
            }
        };

        for (addr, response) in responses {
            if let Response::IAmAFire(announcement) = response {
                self.announced(announcement.serial, addr);
            }
        }
    }

    fn announced(self: &Arc<Self>, serial: SerialNumber, addr: SocketAddr) {
        if let Some(ctrl) = self.controller(serial) {
            ctrl.refresh_address(addr);
            return;
        }

        if !lock(&self.pending).insert(serial) {
            return;
        }

        debug!(%serial, %addr, "Found appliance");
        tokio::spawn(initialize(Arc::downgrade(self), serial, addr));
    }

    fn notify(&self, serial: SerialNumber, event: impl Fn(&dyn Listener, &Controller)) {
        if let Some(ctrl) = self.controller(serial) {
            for listener in self.listeners() {
                event(listener.as_ref(), &ctrl);
            }
        }
    }
}

/// Creates the controller for a newly announced appliance
async fn initialize(shared: Weak<Shared>, serial: SerialNumber, addr: SocketAddr) {
    let (config, transport) = match shared.upgrade() {
        Some(shared) => (shared.config.controller.clone(), (shared.factory)()),
        None => return,
    };
    let relay = Arc::new(Relay {
        shared: shared.clone(),
    });

    let result = Controller::initialize(serial, addr, config, transport, relay).await;

    let Some(shared) = shared.upgrade() else {
        if let Ok(ctrl) = result {
            ctrl.close().await;
        }
        return;
    };
    lock(&shared.pending).remove(&serial);

    match result {
        Ok(ctrl) if shared.is_closed() => ctrl.close().await,
        Ok(ctrl) => {
            write(&shared.controllers).insert(serial, ctrl.clone());
            info!(%serial, %addr, "Appliance discovered");
            for listener in shared.listeners() {
                listener.controller_discovered(&ctrl);
            }
        }
        Err(e) => warn!(%serial, %addr, error = %e, "Unable to connect to appliance"),
    }
}

/// Searches until shutdown or until the service is dropped
async fn scan_loop(shared: Weak<Shared>, rescan: Arc<Notify>, mut shutdown: watch::Receiver<bool>) {
    loop {
        let delay = match shared.upgrade() {
            Some(shared) => {
                shared.scan().await;
                if shared.any_disconnected() {
                    shared.config.discovery.rescan_interval
                } else {
                    shared.config.discovery.scan_interval
                }
            }
            None => return,
        };

        tokio::select! {
            _ = time::sleep(delay) => {}
            _ = rescan.notified() => debug!("Rescan requested"),
            _ = shutdown.changed() => return,
        }
    }
}

/// Forwards controller notifications to the service's listeners
struct Relay {
    shared: Weak<Shared>,
}

impl Notifier for Relay {
    fn updated(&self, snapshot: &Snapshot) {
        if let Some(shared) = self.shared.upgrade() {
            shared.notify(snapshot.serial, |listener, ctrl| listener.controller_update(ctrl));
        }
    }

    fn disconnected(&self, snapshot: &Snapshot, reason: &Error) {
        if let Some(shared) = self.shared.upgrade() {
            lock(&shared.disconnected).insert(snapshot.serial);
            shared.rescan.notify_one();
            shared.notify(snapshot.serial, |listener, ctrl| {
                listener.controller_disconnected(ctrl, reason)
            });
        }
    }

    fn reconnected(&self, snapshot: &Snapshot) {
        if let Some(shared) = self.shared.upgrade() {
            lock(&shared.disconnected).remove(&snapshot.serial);
            shared.notify(snapshot.serial, |listener, ctrl| listener.controller_reconnected(ctrl));
        }
    }
}
