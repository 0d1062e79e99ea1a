//! The connect, discover, write, disconnect state machine.
//!
//! [`SessionMachine`] does no I/O. It consumes transport events and
//! request outcomes and answers with the [`Action`]s the session should
//! issue next. States only move forward; once `Completed`, the result is
//! fixed and later input only finishes teardown.

use tracing::debug;
use uuid::Uuid;

use blecmd_types::{CommandDescriptor, FailureReason, GattStatus, SessionResult, SessionState};

use crate::transport::{ConnectionHandle, DiscoveredService, LinkState, TransportEvent, WriteRequest};

/// A request the session must hand to the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    DiscoverServices,
    Write(WriteRequest),
    Disconnect,
    Release,
}

/// Output of feeding one input to the machine.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Step {
    pub actions: Vec<Action>,
    /// Set when this input completed the session.
    pub completed: Option<SessionResult>,
}

impl Step {
    fn none() -> Self {
        Self::default()
    }
}

/// One session's protocol state.
#[derive(Debug)]
pub struct SessionMachine {
    command: CommandDescriptor,
    state: SessionState,
    handle: Option<ConnectionHandle>,
    write_issued: bool,
    link_down: bool,
    disconnect_requested: bool,
    released: bool,
}

impl SessionMachine {
    pub fn new(command: CommandDescriptor) -> Self {
        Self {
            command,
            state: SessionState::Idle,
            handle: None,
            write_issued: false,
            link_down: false,
            disconnect_requested: false,
            released: false,
        }
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn result(&self) -> Option<&SessionResult> {
        self.state.result()
    }

    pub fn handle(&self) -> Option<ConnectionHandle> {
        self.handle
    }

    /// Whether a write has been handed to the transport.
    pub fn write_issued(&self) -> bool {
        self.write_issued
    }

    pub fn disconnect_requested(&self) -> bool {
        self.disconnect_requested
    }

    pub fn released(&self) -> bool {
        self.released
    }

    /// Completed and nothing left to free.
    pub fn teardown_complete(&self) -> bool {
        self.state.is_completed() && (self.handle.is_none() || self.released)
    }

    fn advance(&mut self, next: SessionState) -> bool {
        if !self.state.can_advance_to(&next) {
            debug!(from = self.state.name(), to = next.name(), "Ignoring backward transition");
            return false;
        }
        debug!(from = self.state.name(), to = next.name(), "Session transition");
        self.state = next;
        true
    }

    fn complete(&mut self, result: SessionResult, step: &mut Step) {
        if self.advance(SessionState::Completed(result.clone())) {
            step.completed = Some(result);
        }
    }

    fn request_disconnect(&mut self, step: &mut Step) {
        if self.handle.is_some() && !self.disconnect_requested && !self.link_down {
            self.disconnect_requested = true;
            step.actions.push(Action::Disconnect);
        }
    }

    fn request_release(&mut self, step: &mut Step) {
        if self.handle.is_some() && !self.released {
            self.released = true;
            step.actions.push(Action::Release);
        }
    }

    /// Idle to Connecting, before the transport is asked to connect.
    pub fn begin_connect(&mut self) {
        self.advance(SessionState::Connecting);
    }

    /// The transport accepted the connect request.
    pub fn attach(&mut self, handle: ConnectionHandle) {
        self.handle = Some(handle);
    }

    /// The transport could not even start connecting.
    pub fn connect_failed(&mut self, message: impl Into<String>) -> Step {
        let mut step = Step::none();
        self.complete(
            SessionResult::Failure(FailureReason::ConnectError {
                message: message.into(),
            }),
            &mut step,
        );
        step
    }

    /// The transport refused the discovery request.
    pub fn discovery_rejected(&mut self) -> Step {
        let mut step = Step::none();
        if matches!(self.state, SessionState::Discovering) {
            self.complete(
                SessionResult::Failure(FailureReason::DiscoveryFailed {
                    status: GattStatus::FAILURE,
                }),
                &mut step,
            );
            self.request_disconnect(&mut step);
        }
        step
    }

    /// The transport refused the write request.
    pub fn write_rejected(&mut self) -> Step {
        let mut step = Step::none();
        if matches!(self.state, SessionState::Writing) {
            self.complete(
                SessionResult::Failure(FailureReason::WriteFailed { status: None }),
                &mut step,
            );
            self.request_disconnect(&mut step);
        }
        step
    }

    /// An outside source (deadline, cancellation) resolved the session.
    ///
    /// Has no effect on the result if the machine already completed; in
    /// both cases any teardown still outstanding is requested.
    pub fn force_complete(&mut self, result: SessionResult) -> Step {
        let mut step = Step::none();
        self.complete(result, &mut step);
        self.request_disconnect(&mut step);
        self.request_release(&mut step);
        step
    }

    /// Give up waiting for the link to report down and free the handle.
    pub fn finish_teardown(&mut self) -> Step {
        let mut step = Step::none();
        self.request_release(&mut step);
        step
    }

    /// Feed one transport event.
    pub fn on_event(&mut self, event: TransportEvent) -> Step {
        if Some(event.handle()) != self.handle {
            debug!(event = event.kind(), handle = %event.handle(), "Ignoring event for another handle");
            return Step::none();
        }

        match event {
            TransportEvent::ConnectionStateChanged {
                status,
                state: LinkState::Connected,
                ..
            } => self.on_connected(status),
            TransportEvent::ConnectionStateChanged {
                state: LinkState::Disconnected,
                ..
            } => self.on_disconnected(),
            TransportEvent::ServicesDiscovered {
                status, services, ..
            } => self.on_services_discovered(status, &services),
            TransportEvent::CharacteristicWriteComplete {
                characteristic,
                status,
                ..
            } => self.on_write_complete(characteristic, status),
        }
    }

    fn on_connected(&mut self, status: GattStatus) -> Step {
        let mut step = Step::none();
        if !matches!(self.state, SessionState::Connecting) {
            debug!(state = self.state.name(), "Ignoring connected event");
            return step;
        }

        if !status.is_success() {
            self.complete(
                SessionResult::Failure(FailureReason::ConnectError {
                    message: format!("connection reported status {status}"),
                }),
                &mut step,
            );
            self.request_disconnect(&mut step);
            return step;
        }

        if self.advance(SessionState::Discovering) {
            step.actions.push(Action::DiscoverServices);
        }
        step
    }

    fn on_disconnected(&mut self) -> Step {
        let mut step = Step::none();
        self.link_down = true;
        if !self.state.is_completed() {
            self.complete(
                SessionResult::Failure(FailureReason::DisconnectedEarly),
                &mut step,
            );
        }
        self.request_release(&mut step);
        step
    }

    fn on_services_discovered(&mut self, status: GattStatus, services: &[DiscoveredService]) -> Step {
        let mut step = Step::none();
        if !matches!(self.state, SessionState::Discovering) {
            debug!(state = self.state.name(), "Ignoring services-discovered event");
            return step;
        }

        if !status.is_success() {
            self.complete(
                SessionResult::Failure(FailureReason::DiscoveryFailed { status }),
                &mut step,
            );
            self.request_disconnect(&mut step);
            return step;
        }

        let service_id = self.command.service_id();
        let characteristic_id = self.command.characteristic_id();
        let Some(service) = services.iter().find(|s| s.uuid == service_id) else {
            self.complete(
                SessionResult::Failure(FailureReason::ServiceNotFound {
                    service: service_id,
                }),
                &mut step,
            );
            self.request_disconnect(&mut step);
            return step;
        };

        if !service.has_characteristic(&characteristic_id) {
            self.complete(
                SessionResult::Failure(FailureReason::CharacteristicNotFound {
                    characteristic: characteristic_id,
                }),
                &mut step,
            );
            self.request_disconnect(&mut step);
            return step;
        }

        if self.advance(SessionState::Writing) {
            self.write_issued = true;
            step.actions
                .push(Action::Write(WriteRequest::from(&self.command)));
        }
        step
    }

    fn on_write_complete(&mut self, characteristic: Uuid, status: GattStatus) -> Step {
        let mut step = Step::none();
        if !matches!(self.state, SessionState::Writing)
            || characteristic != self.command.characteristic_id()
        {
            debug!(state = self.state.name(), %characteristic, "Ignoring write-complete event");
            return step;
        }

        let result = if status.is_success() {
            SessionResult::Success
        } else {
            SessionResult::Failure(FailureReason::WriteFailed {
                status: Some(status),
            })
        };
        self.complete(result, &mut step);
        self.request_disconnect(&mut step);
        step
    }
}
