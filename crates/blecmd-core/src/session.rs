//! Deadline-bounded command sessions.
//!
//! A [`CommandSession`] makes one connect, discover, write, disconnect
//! attempt against one peripheral. Transport events are applied to a
//! [`SessionMachine`] under a mutex, and whichever of the machine, the
//! deadline timer or a cancellation token resolves the [`CompletionGate`]
//! first decides the result.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use blecmd_core::{BtleTransport, CommandSession};
//! use blecmd_types::{CommandDescriptor, PeripheralAddress};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let transport = Arc::new(BtleTransport::new().await?);
//! let address = PeripheralAddress::new("AA:BB:CC:DD:EE:FF")?;
//!
//! let result = CommandSession::new(transport, address, CommandDescriptor::machine_sleep())
//!     .deadline(Duration::from_secs(5))
//!     .execute()
//!     .await;
//! println!("{result}");
//! # Ok(())
//! # }
//! ```

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tokio::sync::Notify;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use blecmd_types::{CommandDescriptor, FailureReason, PeripheralAddress, SessionResult};

use crate::error::{Error, Result};
use crate::gate::CompletionGate;
use crate::machine::{Action, SessionMachine, Step};
use crate::transport::{SharedTransport, TransportEvent, event_channel};

/// Default wall-clock budget for a session.
pub const DEFAULT_DEADLINE: Duration = Duration::from_secs(5);

/// Default time allowed for the link to report down after resolution.
pub const DEFAULT_TEARDOWN_GRACE: Duration = Duration::from_millis(500);

/// Timing for a [`CommandSession`].
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use blecmd_core::SessionConfig;
///
/// let config = SessionConfig::default().deadline(Duration::from_secs(3));
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionConfig {
    /// Budget for reaching a result.
    pub deadline: Duration,
    /// Extra time, after the result, to wait for the link to go down
    /// before the handle is released regardless.
    pub teardown_grace: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            deadline: DEFAULT_DEADLINE,
            teardown_grace: DEFAULT_TEARDOWN_GRACE,
        }
    }
}

impl SessionConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a config tuned for the current platform.
    pub fn for_current_platform() -> Self {
        let platform = crate::platform::PlatformConfig::for_current_platform();
        Self {
            deadline: platform.recommended_deadline,
            teardown_grace: platform.teardown_grace,
        }
    }

    /// Set the deadline.
    #[must_use]
    pub fn deadline(mut self, deadline: Duration) -> Self {
        self.deadline = deadline;
        self
    }

    /// Set the teardown grace period.
    #[must_use]
    pub fn teardown_grace(mut self, grace: Duration) -> Self {
        self.teardown_grace = grace;
        self
    }

    /// Upper bound on how long a session can take.
    pub fn max_duration(&self) -> Duration {
        self.deadline + self.teardown_grace
    }

    pub fn validate(&self) -> Result<()> {
        if self.deadline.is_zero() {
            return Err(Error::invalid_config("deadline must be greater than zero"));
        }
        if self.teardown_grace.is_zero() {
            return Err(Error::invalid_config(
                "teardown grace must be greater than zero",
            ));
        }
        Ok(())
    }
}

/// Outcome of one session, with the bookkeeping callers log or print.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionReport {
    pub address: PeripheralAddress,
    pub result: SessionResult,
    /// Time from start until the session was fully torn down.
    #[serde(rename = "elapsed_ms", with = "duration_millis")]
    pub elapsed: Duration,
    #[serde(with = "time::serde::rfc3339")]
    pub finished_at: OffsetDateTime,
    /// A disconnect was issued to the transport.
    pub disconnect_requested: bool,
    /// The transport handle was released.
    pub released: bool,
}

mod duration_millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(value.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

/// State shared between the caller's task and the event pump.
struct Shared {
    transport: SharedTransport,
    machine: Mutex<SessionMachine>,
    gate: CompletionGate,
    torn_down: Notify,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, SessionMachine> {
        // Machine updates are single calls; a poisoned guard is still consistent.
        self.machine.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn on_event(&self, event: TransportEvent) {
        let mut machine = self.lock();
        debug!(event = event.kind(), state = machine.state().name(), "Transport event");
        let step = machine.on_event(event);
        self.drive(&mut machine, step);
    }

    /// Resolve from outside the machine unless it already finished.
    fn resolve_external(&self, result: SessionResult) {
        let mut machine = self.lock();
        if machine.state().is_completed() {
            return;
        }
        let step = machine.force_complete(result);
        self.drive(&mut machine, step);
    }

    fn finish_teardown(&self) {
        let mut machine = self.lock();
        let step = machine.finish_teardown();
        self.drive(&mut machine, step);
    }

    /// Hand actions to the transport, feeding refusals back into the
    /// machine. Must be called with the machine lock held.
    fn drive(&self, machine: &mut SessionMachine, step: Step) {
        let mut pending = VecDeque::new();
        self.absorb(step, &mut pending);

        while let Some(action) = pending.pop_front() {
            let Some(handle) = machine.handle() else {
                continue;
            };
            let follow_up = match action {
                Action::DiscoverServices => match self.transport.discover_services(handle) {
                    Ok(()) => None,
                    Err(e) => {
                        warn!(error = %e, %handle, "Service discovery request rejected");
                        Some(machine.discovery_rejected())
                    }
                },
                Action::Write(request) => {
                    debug!(
                        %handle,
                        characteristic = %request.characteristic,
                        mode = %request.mode,
                        bytes = request.payload.len(),
                        "Writing characteristic"
                    );
                    match self.transport.write_characteristic(handle, &request) {
                        Ok(()) => None,
                        Err(e) => {
                            warn!(error = %e, %handle, "Write request rejected");
                            Some(machine.write_rejected())
                        }
                    }
                }
                Action::Disconnect => {
                    debug!(%handle, "Requesting disconnect");
                    self.transport.disconnect(handle);
                    None
                }
                Action::Release => {
                    debug!(%handle, "Releasing connection");
                    self.transport.release(handle);
                    None
                }
            };
            if let Some(step) = follow_up {
                self.absorb(step, &mut pending);
            }
        }

        if machine.teardown_complete() {
            self.torn_down.notify_waiters();
        }
    }

    fn absorb(&self, step: Step, pending: &mut VecDeque<Action>) {
        if let Some(result) = step.completed {
            self.gate.try_complete(result);
        }
        pending.extend(step.actions);
    }

    async fn wait_torn_down(&self) {
        loop {
            let notified = self.torn_down.notified();
            if self.lock().teardown_complete() {
                return;
            }
            notified.await;
        }
    }
}

/// One bounded command attempt against one peripheral.
///
/// A session is consumed by `execute`/`run`; retry by building a new one.
pub struct CommandSession {
    transport: SharedTransport,
    address: PeripheralAddress,
    command: CommandDescriptor,
    config: SessionConfig,
}

impl CommandSession {
    pub fn new(
        transport: SharedTransport,
        address: PeripheralAddress,
        command: CommandDescriptor,
    ) -> Self {
        Self {
            transport,
            address,
            command,
            config: SessionConfig::default(),
        }
    }

    /// Replace the timing configuration.
    #[must_use]
    pub fn with_config(mut self, config: SessionConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the deadline.
    #[must_use]
    pub fn deadline(mut self, deadline: Duration) -> Self {
        self.config.deadline = deadline;
        self
    }

    pub fn address(&self) -> &PeripheralAddress {
        &self.address
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Run the session and return its result.
    ///
    /// Returns within `deadline + teardown_grace`, whatever the transport
    /// does. A zero deadline has already expired: the session resolves
    /// `Timeout` without connecting.
    pub async fn execute(self) -> SessionResult {
        self.perform(None).await.result
    }

    /// Like [`execute`](Self::execute), but `cancel` competes with the
    /// deadline and resolves `Failure{cancelled}` if it fires first.
    pub async fn execute_with_cancel(self, cancel: CancellationToken) -> SessionResult {
        self.perform(Some(cancel)).await.result
    }

    /// Run the session and return a full report.
    pub async fn run(self) -> SessionReport {
        self.perform(None).await
    }

    /// Run with a cancellation token and return a full report.
    pub async fn run_with_cancel(self, cancel: CancellationToken) -> SessionReport {
        self.perform(Some(cancel)).await
    }

    #[tracing::instrument(level = "info", skip_all, fields(address = %self.address, deadline = ?self.config.deadline))]
    async fn perform(self, cancel: Option<CancellationToken>) -> SessionReport {
        let started = Instant::now();
        if self.config.deadline.is_zero() {
            warn!("Deadline already expired, not connecting");
            return SessionReport {
                address: self.address,
                result: SessionResult::Timeout,
                elapsed: started.elapsed(),
                finished_at: OffsetDateTime::now_utc(),
                disconnect_requested: false,
                released: false,
            };
        }

        let shared = Arc::new(Shared {
            transport: Arc::clone(&self.transport),
            machine: Mutex::new(SessionMachine::new(self.command.clone())),
            gate: CompletionGate::new(),
            torn_down: Notify::new(),
        });

        let (events_tx, mut events_rx) = event_channel();
        {
            let mut machine = shared.lock();
            machine.begin_connect();
            debug!(
                capabilities = ?self.transport.capabilities(),
                "Connecting"
            );
            match self.transport.connect(&self.address, events_tx) {
                Ok(handle) => {
                    debug!(%handle, "Connect initiated");
                    machine.attach(handle);
                }
                Err(e) => {
                    let step = machine.connect_failed(e.to_string());
                    shared.drive(&mut machine, step);
                }
            }
        }

        let pump = {
            let shared = Arc::clone(&shared);
            tokio::spawn(async move {
                while let Some(event) = events_rx.recv().await {
                    shared.on_event(event);
                }
            })
        };

        let cancelled = async {
            match &cancel {
                Some(token) => token.cancelled().await,
                None => std::future::pending().await,
            }
        };

        tokio::select! {
            biased;
            _ = shared.gate.wait() => {}
            () = tokio::time::sleep(self.config.deadline) => {
                debug!("Deadline reached");
                shared.resolve_external(SessionResult::Timeout);
            }
            () = cancelled => {
                debug!("Session cancelled");
                shared.resolve_external(SessionResult::Failure(FailureReason::Cancelled));
            }
        }
        let result = shared.gate.wait().await;

        if tokio::time::timeout(self.config.teardown_grace, shared.wait_torn_down())
            .await
            .is_err()
        {
            debug!(grace = ?self.config.teardown_grace, "Link did not report down, releasing");
            shared.finish_teardown();
        }
        pump.abort();

        let (disconnect_requested, released) = {
            let machine = shared.lock();
            (machine.disconnect_requested(), machine.released())
        };
        let elapsed = started.elapsed();

        if result.is_success() {
            info!(?elapsed, "Command delivered");
        } else {
            warn!(%result, ?elapsed, "Command not delivered");
        }

        SessionReport {
            address: self.address,
            result,
            elapsed,
            finished_at: OffsetDateTime::now_utc(),
            disconnect_requested,
            released,
        }
    }
}
