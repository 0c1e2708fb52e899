//! Simulated appliances for tests
//!
//! Each test builds its own `FakeNetwork`; nothing here is shared between
//! tests.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use crate::controller::{Controller, Notifier, Snapshot};
use crate::core::{Error, Result, SerialNumber};
use crate::network::{Listener, Responses, Transport, TransportFactory};
use crate::protocol::{Command, CommandId, DeviceAnnouncement, DeviceStatus, Response};

/// Simulated round trip of an answered request
pub(crate) const LATENCY: Duration = Duration::from_millis(10);

/// Transport request timeout used by the fake
pub(crate) const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
struct FakeAppliance {
    serial: SerialNumber,
    responsive: bool,
    status: DeviceStatus,
}

#[derive(Default)]
struct FakeState {
    appliances: HashMap<SocketAddr, FakeAppliance>,
    sent: Vec<(SocketAddr, Command)>,
    /// Commands whose next delivery is lost on the way
    dropped: Vec<CommandId>,
}

/// In-memory network of appliances implementing [`Transport`]
#[derive(Clone, Default)]
pub(crate) struct FakeNetwork {
    state: Arc<Mutex<FakeState>>,
}

pub(crate) fn addr(last_octet: u8) -> SocketAddr {
    SocketAddr::from(([192, 168, 1, last_octet], 3300))
}

pub(crate) fn status(fire_on: bool, desired_temp: u8, current_temp: u8) -> DeviceStatus {
    DeviceStatus {
        has_new_timers: false,
        fire_on,
        fan_boost_on: false,
        flame_effect_on: false,
        desired_temp,
        current_temp,
    }
}

impl FakeNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, addr: SocketAddr, serial: u32, status: DeviceStatus) {
        let appliance = FakeAppliance {
            serial: SerialNumber(serial),
            responsive: true,
            status,
        };
        self.state.lock().unwrap().appliances.insert(addr, appliance);
    }

    pub fn set_responsive(&self, serial: u32, responsive: bool) {
        self.with_appliance(serial, |appliance| appliance.responsive = responsive);
    }

    pub fn set_status(&self, serial: u32, status: DeviceStatus) {
        self.with_appliance(serial, |appliance| appliance.status = status);
    }

    /// Loses the next `command` sent to any appliance, as if the datagram
    /// never arrived
    pub fn drop_next(&self, command: CommandId) {
        self.state.lock().unwrap().dropped.push(command);
    }

    /// Moves the appliance with `serial` to a new address
    pub fn relocate(&self, serial: u32, to: SocketAddr) {
        let mut state = self.state.lock().unwrap();
        let from = state
            .appliances
            .iter()
            .find(|(_, a)| a.serial == SerialNumber(serial))
            .map(|(addr, _)| *addr)
            .expect("unknown appliance");
        let appliance = state.appliances.remove(&from).unwrap();
        state.appliances.insert(to, appliance);
    }

    pub fn status_of(&self, serial: u32) -> DeviceStatus {
        let mut found = None;
        self.with_appliance(serial, |appliance| found = Some(appliance.status));
        found.unwrap()
    }

    /// Commands sent so far, oldest first
    pub fn sent(&self) -> Vec<Command> {
        self.state.lock().unwrap().sent.iter().map(|(_, c)| *c).collect()
    }

    /// Commands sent since the last call
    pub fn take_sent(&self) -> Vec<Command> {
        let mut state = self.state.lock().unwrap();
        state.sent.drain(..).map(|(_, c)| c).collect()
    }

    pub fn factory(&self) -> TransportFactory {
        let network = self.clone();
        Arc::new(move || Arc::new(network.clone()) as Arc<dyn Transport>)
    }

    fn with_appliance(&self, serial: u32, f: impl FnOnce(&mut FakeAppliance)) {
        let mut state = self.state.lock().unwrap();
        let appliance = state
            .appliances
            .values_mut()
            .find(|a| a.serial == SerialNumber(serial))
            .expect("unknown appliance");
        f(appliance);
    }

    fn exchange(&self, target: SocketAddr, command: Command, broadcast: bool) -> Responses {
        let mut state = self.state.lock().unwrap();
        state.sent.push((target, command));

        if let Some(pos) = state.dropped.iter().position(|id| *id == command.id()) {
            state.dropped.remove(pos);
            return Responses::new();
        }

        let mut responses = Responses::new();
        if broadcast {
            for (addr, appliance) in state.appliances.iter().filter(|(_, a)| a.responsive) {
                let announcement = DeviceAnnouncement {
                    serial: appliance.serial,
                    pin: 9999,
                };
                responses.insert(*addr, Response::IAmAFire(announcement));
            }
            return responses;
        }

        let appliance = match state.appliances.get_mut(&target) {
            Some(appliance) if appliance.responsive => appliance,
            _ => return responses,
        };

        let status = &mut appliance.status;
        match command {
            Command::PowerOn => status.fire_on = true,
            Command::PowerOff => status.fire_on = false,
            Command::FanBoostOn => status.fan_boost_on = true,
            Command::FanBoostOff => status.fan_boost_on = false,
            Command::FlameEffectOn => status.flame_effect_on = true,
            Command::FlameEffectOff => status.flame_effect_on = false,
            Command::NewSetTemp(temp) => status.desired_temp = temp,
            Command::StatusPlease | Command::SearchForFires => {}
        }

        let response = match command {
            Command::StatusPlease => Response::Status(*status),
            other => Response::ack(other.expected_response()).expect("ack without payload"),
        };
        responses.insert(target, response);
        responses
    }
}

#[async_trait]
impl Transport for FakeNetwork {
    async fn send_command(
        &self,
        target: SocketAddr,
        command: Command,
        broadcast: bool,
    ) -> Result<Responses> {
        let responses = self.exchange(target, command, broadcast);
        if responses.is_empty() {
            tokio::time::sleep(REQUEST_TIMEOUT).await;
            return Err(Error::NoResponse {
                command: command.id(),
                addr: target,
                timeout: REQUEST_TIMEOUT,
            });
        }

        tokio::time::sleep(LATENCY).await;
        Ok(responses)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Event {
    Discovered(SerialNumber),
    Updated(SerialNumber),
    Disconnected(SerialNumber),
    Reconnected(SerialNumber),
}

/// Records notifications from controllers and discovery
#[derive(Default)]
pub(crate) struct Recorder {
    events: Mutex<Vec<Event>>,
}

impl Recorder {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }

    pub fn count(&self, event: Event) -> usize {
        self.events().iter().filter(|e| **e == event).count()
    }

    fn push(&self, event: Event) {
        self.events.lock().unwrap().push(event);
    }
}

impl Notifier for Recorder {
    fn updated(&self, snapshot: &Snapshot) {
        self.push(Event::Updated(snapshot.serial));
    }

    fn disconnected(&self, snapshot: &Snapshot, _reason: &Error) {
        self.push(Event::Disconnected(snapshot.serial));
    }

    fn reconnected(&self, snapshot: &Snapshot) {
        self.push(Event::Reconnected(snapshot.serial));
    }
}

impl Listener for Recorder {
    fn controller_discovered(&self, ctrl: &Controller) {
        self.push(Event::Discovered(ctrl.serial()));
    }

    fn controller_disconnected(&self, ctrl: &Controller, _reason: &Error) {
        self.push(Event::Disconnected(ctrl.serial()));
    }

    fn controller_reconnected(&self, ctrl: &Controller) {
        self.push(Event::Reconnected(ctrl.serial()));
    }

    fn controller_update(&self, ctrl: &Controller) {
        self.push(Event::Updated(ctrl.serial()));
    }
}
