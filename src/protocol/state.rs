use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::core::{ControllerConfig, FanMode};
use super::message::{Command, DeviceStatus};

/// Connectivity of one appliance
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Last contact succeeded, setting changes are sent straight away
    Ready,

    /// A power command was acknowledged and the appliance is settling
    Busy {
        /// No status polling before this point
        until: Instant,
    },

    /// A recent request went unanswered
    NonResponsive,

    /// Nothing usable heard for longer than the retry timeout
    Disconnected,
}

impl ConnectionState {
    pub fn is_ready(&self) -> bool {
        matches!(self, ConnectionState::Ready)
    }

    /// True while a power change is still settling at `now`
    pub fn is_settling(&self, now: Instant) -> bool {
        matches!(self, ConnectionState::Busy { until } if now < *until)
    }

    /// How long the poll loop sleeps before the next refresh
    pub fn poll_delay(&self, now: Instant, config: &ControllerConfig) -> Duration {
        match self {
            ConnectionState::Ready => config.refresh_interval,
            ConnectionState::Busy { until } => until.saturating_duration_since(now),
            ConnectionState::NonResponsive => config.retry_interval,
            ConnectionState::Disconnected => config.disconnected_interval,
        }
    }

    /// State after a failed exchange, given when the appliance last answered
    pub fn after_failure(last_response: Instant, now: Instant, config: &ControllerConfig) -> Self {
        if now.saturating_duration_since(last_response) <= config.retry_timeout {
            ConnectionState::NonResponsive
        } else {
            ConnectionState::Disconnected
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConnectionState::Ready => "ready",
            ConnectionState::Busy { .. } => "busy",
            ConnectionState::NonResponsive => "non-responsive",
            ConnectionState::Disconnected => "disconnected",
        };
        f.write_str(name)
    }
}

/// Cached appliance settings.
///
/// While the appliance is reachable these mirror its last status. Otherwise
/// `is_on`, `fan` and `desired_temp` hold what callers asked for, waiting to
/// be pushed on the next successful contact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    pub has_new_timers: bool,
    pub is_on: bool,
    pub fan: FanMode,
    pub desired_temp: u8,
    pub current_temp: u8,
}

impl From<DeviceStatus> for Settings {
    fn from(status: DeviceStatus) -> Self {
        Settings {
            has_new_timers: status.has_new_timers,
            is_on: status.fire_on,
            fan: status.fan_mode(),
            desired_temp: status.desired_temp,
            current_temp: status.current_temp,
        }
    }
}

impl Settings {
    /// Commands that bring an appliance reporting `reported` to these
    /// settings, in send order: set point, fan toggles, then power.
    pub fn resync_commands(&self, reported: &DeviceStatus) -> Vec<Command> {
        let mut commands = Vec::new();

        if self.desired_temp != reported.desired_temp {
            commands.push(Command::NewSetTemp(self.desired_temp));
        }

        commands.extend(toggle_commands(
            (reported.fan_boost_on, reported.flame_effect_on),
            self.fan,
        ));

        if self.is_on != reported.fire_on {
            commands.push(Command::power(self.is_on));
        }

        commands
    }

    /// Takes the readings only the appliance can know from `status`
    pub fn apply_readings(&mut self, status: &DeviceStatus) {
        self.has_new_timers = status.has_new_timers;
        self.current_temp = status.current_temp;
    }
}

/// Compiles a fan mode change into toggle commands.
///
/// The active toggle is switched off before the target toggle is switched
/// on, so the appliance never sees both on at once. Yields at most two
/// commands, none when `current == target`.
pub fn fan_commands(current: FanMode, target: FanMode) -> Vec<Command> {
    toggle_commands(current.toggles(), target)
}

/// Commands taking the raw (fan boost, flame effect) toggles to `target`.
///
/// Every toggle that is on but not wanted is switched off first, so a unit
/// reporting both toggles on still ends up in the target mode.
pub fn toggle_commands(toggles: (bool, bool), target: FanMode) -> Vec<Command> {
    let (boost, effect) = toggles;
    let (want_boost, want_effect) = target.toggles();

    let mut commands = Vec::with_capacity(3);
    if boost && !want_boost {
        commands.push(Command::FanBoostOff);
    }
    if effect && !want_effect {
        commands.push(Command::FlameEffectOff);
    }
    if want_boost && !boost {
        commands.push(Command::FanBoostOn);
    }
    if want_effect && !effect {
        commands.push(Command::FlameEffectOn);
    }
    commands
}

/// True for commands after which the appliance needs to settle
pub fn is_power_command(command: &Command) -> bool {
    matches!(command, Command::PowerOn | Command::PowerOff)
}
