use std::net::SocketAddr;
use std::time::Duration;

use chrono::Utc;
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

use crate::core::{Error, FanMode, Result};
use crate::network::Transport;
use crate::protocol::state::{fan_commands, is_power_command};
use crate::protocol::{Command, ConnectionState, DeviceStatus, Response, Settings};
use super::{Inner, Link, Snapshot};

/// A setting change requested by a caller
#[derive(Debug, Clone, Copy)]
pub(super) enum Change {
    Power(bool),
    Fan(FanMode),
    DesiredTemp(u8),
}

impl Change {
    /// Settings after the change, and the commands that apply it
    fn apply(&self, current: &Settings) -> (Settings, Vec<Command>) {
        let mut wanted = *current;
        let commands = match *self {
            Change::Power(on) => {
                wanted.is_on = on;
                vec![Command::power(on)]
            }
            Change::Fan(fan) => {
                wanted.fan = fan;
                fan_commands(current.fan, fan)
            }
            Change::DesiredTemp(temp) => {
                wanted.desired_temp = temp;
                vec![Command::NewSetTemp(temp)]
            }
        };
        (wanted, commands)
    }
}

/// Single unicast exchange, returning the one validated reply
async fn request(transport: &dyn Transport, addr: SocketAddr, command: Command) -> Result<Response> {
    let responses = transport.send_command(addr, command, false).await?;
    responses.into_values().next().ok_or(Error::NoResponse {
        command: command.id(),
        addr,
        timeout: Duration::ZERO,
    })
}

fn into_status(response: Response) -> Result<DeviceStatus> {
    match response {
        Response::Status(status) => Ok(status),
        other => Err(Error::UnexpectedResponse {
            expected: Command::StatusPlease.expected_response(),
            actual: other.id(),
        }),
    }
}

pub(super) async fn fetch_status(transport: &dyn Transport, addr: SocketAddr) -> Result<DeviceStatus> {
    into_status(request(transport, addr, Command::StatusPlease).await?)
}

impl Inner {
    fn current(&self) -> Snapshot {
        *self.snapshot.borrow()
    }

    fn set_state(&self, state: ConnectionState) {
        self.snapshot.send_if_modified(|snapshot| {
            let changed = snapshot.state != state;
            snapshot.state = state;
            changed
        });
    }

    /// Sends `command` and records the contact
    async fn send(&self, link: &mut Link, command: Command) -> Result<Response> {
        let addr = self.current().addr;
        let response = request(self.transport.as_ref(), addr, command).await?;

        link.last_response = Instant::now();
        self.snapshot.send_modify(|snapshot| snapshot.last_response = Some(Utc::now()));
        trace!(serial = %self.serial, ?command, ?response, "Exchange complete");
        Ok(response)
    }

    async fn status(&self, link: &mut Link) -> Result<DeviceStatus> {
        into_status(self.send(link, Command::StatusPlease).await?)
    }

    /// Sends each command in order, stopping at the first failure
    async fn send_all(&self, link: &mut Link, commands: &[Command]) -> Result<()> {
        for command in commands {
            self.send(link, *command).await?;
        }
        Ok(())
    }

    /// Moves to the state a failed exchange leads to
    fn failed(&self, link: &mut Link, reason: Error) {
        let next = ConnectionState::after_failure(link.last_response, Instant::now(), &self.config);
        self.set_state(next);

        if next == ConnectionState::Disconnected {
            if !link.disconnect_notified {
                link.disconnect_notified = true;
                warn!(serial = %self.serial, error = %reason, "Appliance disconnected");
                self.notifier.disconnected(&self.current(), &reason);
            }
        } else {
            debug!(serial = %self.serial, error = %reason, "Appliance not responding");
        }
    }

    pub(super) async fn change(&self, change: Change) {
        let mut link = self.link.lock().await;

        let current = self.current();
        let (wanted, commands) = change.apply(&current.settings);
        if wanted == current.settings {
            return;
        }
        self.snapshot.send_modify(|snapshot| snapshot.settings = wanted);

        if !current.state.is_ready() {
            debug!(serial = %self.serial, ?change, state = %current.state, "Buffering change");
            return;
        }

        if let Err(e) = self.send_all(&mut link, &commands).await {
            self.failed(&mut link, e);
            return;
        }

        if let Change::Power(on) = change {
            let until = Instant::now() + self.config.busy_wait;
            self.set_state(ConnectionState::Busy { until });
            info!(serial = %self.serial, on, "Power changed, waiting for appliance to settle");
            self.notifier.updated(&self.current());
        } else {
            self.refresh_locked(&mut link).await;
        }
    }

    pub(super) async fn refresh(&self) {
        let mut link = self.link.lock().await;
        self.refresh_locked(&mut link).await;
    }

    async fn refresh_locked(&self, link: &mut Link) {
        let prior = self.current().state;
        if prior.is_settling(Instant::now()) {
            trace!(serial = %self.serial, "Still settling, skipping poll");
            return;
        }
        // The retry timeout runs from the end of the settle period
        if let ConnectionState::Busy { until } = prior {
            link.last_response = link.last_response.max(until);
        }

        let status = match self.status(link).await {
            Ok(status) => status,
            Err(e) => {
                self.failed(link, e);
                return;
            }
        };

        if prior.is_ready() {
            self.snapshot.send_modify(|snapshot| snapshot.settings = Settings::from(status));
            self.notifier.updated(&self.current());
        } else {
            self.resync(link, prior, status).await;
        }
    }

    /// Pushes buffered settings to an appliance that answered again
    async fn resync(&self, link: &mut Link, prior: ConnectionState, reported: DeviceStatus) {
        let commands = self.current().settings.resync_commands(&reported);
        info!(serial = %self.serial, from = %prior, pending = commands.len(), "Resynchronising appliance");

        if let Err(e) = self.send_all(link, &commands).await {
            self.failed(link, e);
            return;
        }

        let next = if commands.iter().any(is_power_command) {
            ConnectionState::Busy {
                until: Instant::now() + self.config.busy_wait,
            }
        } else {
            ConnectionState::Ready
        };
        self.snapshot.send_modify(|snapshot| {
            snapshot.state = next;
            snapshot.settings.apply_readings(&reported);
        });

        if link.disconnect_notified {
            link.disconnect_notified = false;
            info!(serial = %self.serial, "Appliance reconnected");
            self.notifier.reconnected(&self.current());
        }
        self.notifier.updated(&self.current());
    }
}
