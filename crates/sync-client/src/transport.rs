//! Transport reconciler
//!
//! State machine for the push channel. It owns no sockets or timers: each
//! event returns the commands the driver must carry out, which keeps the
//! single-flight and cancellation rules testable without I/O.
//!
//! - `Connecting`: one handshake in flight
//! - `Live`: push channel up, sync requested, liveness pings running
//! - `DegradedPolling`: socket up but the server lost its chain connection;
//!   the ledger is polled directly
//! - `ReconnectPending`: socket down, ledger polled, one reconnect armed
//! - `Stopped`: permanent teardown

use tracing::debug;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransportState {
    Idle,
    Connecting,
    Live,
    DegradedPolling,
    ReconnectPending,
    Stopped,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransportEvent {
    Start,
    /// Handshake completed
    Connected,
    /// Handshake failed
    ConnectFailed,
    /// Socket closed or errored
    Disconnected,
    /// `connection-status` from the server
    UpstreamStatus(bool),
    ReconnectTimerFired,
    Stop,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransportCommand {
    OpenConnection,
    CloseConnection,
    RequestSync,
    StartPing,
    StopPing,
    StartPolling,
    StopPolling,
    ScheduleReconnect,
    CancelReconnect,
}

#[derive(Debug)]
pub struct TransportReconciler {
    state: TransportState,
    connect_in_flight: bool,
    reconnect_armed: bool,
    polling: bool,
    pinging: bool,
}

impl Default for TransportReconciler {
    fn default() -> Self {
        Self::new()
    }
}

impl TransportReconciler {
    pub fn new() -> Self {
        Self {
            state: TransportState::Idle,
            connect_in_flight: false,
            reconnect_armed: false,
            polling: false,
            pinging: false,
        }
    }

    pub fn state(&self) -> TransportState {
        self.state
    }

    pub fn is_polling(&self) -> bool {
        self.polling
    }

    pub fn handle(&mut self, event: TransportEvent) -> Vec<TransportCommand> {
        use TransportCommand::*;

        if self.state == TransportState::Stopped {
            // A handshake that completes after teardown is closed right away
            return match event {
                TransportEvent::Connected => vec![CloseConnection],
                _ => Vec::new(),
            };
        }

        let mut commands = Vec::new();
        match event {
            TransportEvent::Start => self.open(&mut commands),
            TransportEvent::ReconnectTimerFired => {
                self.reconnect_armed = false;
                self.open(&mut commands);
            }
            TransportEvent::Connected => {
                self.connect_in_flight = false;
                self.state = TransportState::Live;
                if self.polling {
                    self.polling = false;
                    commands.push(StopPolling);
                }
                if self.reconnect_armed {
                    self.reconnect_armed = false;
                    commands.push(CancelReconnect);
                }
                commands.push(RequestSync);
                if !self.pinging {
                    self.pinging = true;
                    commands.push(StartPing);
                }
            }
            TransportEvent::ConnectFailed | TransportEvent::Disconnected => {
                self.connect_in_flight = false;
                self.state = TransportState::ReconnectPending;
                if self.pinging {
                    self.pinging = false;
                    commands.push(StopPing);
                }
                self.start_polling(&mut commands);
                if !self.reconnect_armed {
                    self.reconnect_armed = true;
                    commands.push(ScheduleReconnect);
                }
            }
            TransportEvent::UpstreamStatus(connected) => match (self.state, connected) {
                (TransportState::Live, false) => {
                    self.state = TransportState::DegradedPolling;
                    self.start_polling(&mut commands);
                }
                (TransportState::DegradedPolling, true) => {
                    self.state = TransportState::Live;
                    if self.polling {
                        self.polling = false;
                        commands.push(StopPolling);
                    }
                    commands.push(RequestSync);
                }
                _ => {}
            },
            TransportEvent::Stop => {
                self.state = TransportState::Stopped;
                self.connect_in_flight = false;
                self.reconnect_armed = false;
                self.polling = false;
                self.pinging = false;
                // Each command is a no-op for a driver that never started it
                commands.extend([CancelReconnect, StopPolling, StopPing, CloseConnection]);
            }
        }

        if !commands.is_empty() {
            debug!("transport {:?} on {:?} -> {:?}", self.state, event, commands);
        }
        commands
    }

    fn open(&mut self, commands: &mut Vec<TransportCommand>) {
        if self.connect_in_flight || matches!(self.state, TransportState::Live | TransportState::DegradedPolling) {
            return;
        }
        self.connect_in_flight = true;
        self.state = TransportState::Connecting;
        commands.push(TransportCommand::OpenConnection);
    }

    fn start_polling(&mut self, commands: &mut Vec<TransportCommand>) {
        if !self.polling {
            self.polling = true;
            commands.push(TransportCommand::StartPolling);
        }
    }
}
