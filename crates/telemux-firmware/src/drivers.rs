//! Modem subsystem drivers: network attach, GNSS acquisition, and the
//! messaging session. Each drives its slice of the modem through the
//! command arbiter; none touches the transport directly.

use std::sync::Arc;
use std::time::Duration;

use telemux_supervisor::{ProbeOutcome, RecoveryCtx, SubsystemDriver, SubsystemError, SubsystemId};
use telemux_transport::{ArbiterError, CommandArbiter};
use tracing::{debug, warn};

use crate::position::PositionShared;

/// Commands issued once to take the radio from cold to registering.
const NETWORK_BRING_UP: &[&str] = &["AT", "ATE0", "AT+CFUN=1", "AT+CREG=1"];

/// Map an arbiter result onto a probe outcome. `Busy` means another
/// worker's command is in flight, which says nothing about the subsystem.
fn probe_outcome(result: Result<String, ArbiterError>, healthy: impl Fn(&str) -> bool) -> ProbeOutcome {
    match result {
        Ok(text) if healthy(&text) => ProbeOutcome::Healthy,
        Ok(_) => ProbeOutcome::Pending,
        Err(ArbiterError::Busy) => ProbeOutcome::Pending,
        Err(err) => {
            debug!(%err, "probe command failed");
            ProbeOutcome::Failed
        }
    }
}

/// Run a command, treating an explicit modem rejection as fatal for the
/// recovery step but passing `Busy` through as retriable.
fn recovery_step(
    arbiter: &CommandArbiter,
    ctx: &RecoveryCtx,
    command: &str,
    marker: Option<&str>,
    timeout: Duration,
) -> Result<(), SubsystemError> {
    if ctx.abandoned() {
        return Err(SubsystemError::Abandoned);
    }
    match arbiter.send(command, marker, timeout) {
        Ok(_) => Ok(()),
        Err(err) => Err(SubsystemError::Unhealthy(err.to_string())),
    }
}

/// `+CREG: <n>,<stat>` with stat 1 (home) or 5 (roaming) means registered.
fn registered(text: &str) -> bool {
    text.lines()
        .filter_map(|line| line.trim().strip_prefix("+CREG:"))
        .any(|rest| {
            matches!(
                rest.rsplit(',').next().map(str::trim),
                Some("1") | Some("5")
            )
        })
}

/// `+QMTCONN: <client>,<state>` with state 3 means session established.
fn session_up(text: &str) -> bool {
    text.lines()
        .filter_map(|line| line.trim().strip_prefix("+QMTCONN:"))
        .any(|rest| rest.rsplit(',').next().map(str::trim) == Some("3"))
}

/// Cellular network attach.
pub struct NetworkDriver {
    arbiter: Arc<CommandArbiter>,
    timeout: Duration,
}

impl NetworkDriver {
    pub fn new(arbiter: Arc<CommandArbiter>, timeout: Duration) -> Self {
        NetworkDriver { arbiter, timeout }
    }

    fn configure_radio(&self) -> Result<(), SubsystemError> {
        for command in NETWORK_BRING_UP {
            self.arbiter
                .send(command, None, self.timeout)
                .map_err(|err| SubsystemError::Unhealthy(err.to_string()))?;
        }
        Ok(())
    }
}

impl SubsystemDriver for NetworkDriver {
    fn id(&self) -> SubsystemId {
        SubsystemId::Network
    }

    fn bring_up(&mut self) -> Result<ProbeOutcome, SubsystemError> {
        self.configure_radio()?;
        // Registration takes time; probes observe completion.
        Ok(self.probe())
    }

    fn probe(&mut self) -> ProbeOutcome {
        probe_outcome(
            self.arbiter.send("AT+CREG?", Some("+CREG:"), self.timeout),
            registered,
        )
    }

    fn reconnect(&mut self, ctx: &RecoveryCtx) -> Result<(), SubsystemError> {
        // Automatic operator reselection without a radio restart.
        recovery_step(&self.arbiter, ctx, "AT+COPS=0", None, self.timeout)
    }

    fn reinitialize(&mut self, ctx: &RecoveryCtx) -> Result<(), SubsystemError> {
        recovery_step(&self.arbiter, ctx, "AT+CFUN=0", None, self.timeout)?;
        if ctx.abandoned() {
            return Err(SubsystemError::Abandoned);
        }
        self.configure_radio()
    }

    fn tear_down(&mut self) {
        if let Err(err) = self.arbiter.send("AT+CFUN=0", None, self.timeout) {
            warn!(%err, "radio power-down failed");
        }
    }
}

/// Publish/subscribe messaging session, carried as framed modem commands.
pub struct MessagingDriver {
    arbiter: Arc<CommandArbiter>,
    timeout: Duration,
}

impl MessagingDriver {
    pub fn new(arbiter: Arc<CommandArbiter>, timeout: Duration) -> Self {
        MessagingDriver { arbiter, timeout }
    }

    fn open_session(&self) -> Result<(), SubsystemError> {
        self.arbiter
            .send("AT+QMTOPEN=0", Some("+QMTOPEN: 0,0"), self.timeout)
            .map_err(|err| SubsystemError::Unhealthy(err.to_string()))?;
        self.arbiter
            .send("AT+QMTCONN=0", Some("+QMTCONN: 0,0,0"), self.timeout)
            .map_err(|err| SubsystemError::Unhealthy(err.to_string()))?;
        Ok(())
    }
}

impl SubsystemDriver for MessagingDriver {
    fn id(&self) -> SubsystemId {
        SubsystemId::Messaging
    }

    fn bring_up(&mut self) -> Result<ProbeOutcome, SubsystemError> {
        self.open_session()?;
        Ok(ProbeOutcome::Healthy)
    }

    fn probe(&mut self) -> ProbeOutcome {
        probe_outcome(
            self.arbiter
                .send("AT+QMTCONN?", Some("+QMTCONN:"), self.timeout),
            session_up,
        )
    }

    fn reconnect(&mut self, ctx: &RecoveryCtx) -> Result<(), SubsystemError> {
        // The underlying session dropped; the open socket usually survives.
        recovery_step(
            &self.arbiter,
            ctx,
            "AT+QMTCONN=0",
            Some("+QMTCONN: 0,0,0"),
            self.timeout,
        )
    }

    fn reinitialize(&mut self, ctx: &RecoveryCtx) -> Result<(), SubsystemError> {
        recovery_step(&self.arbiter, ctx, "AT+QMTCLOSE=0", None, self.timeout)?;
        if ctx.abandoned() {
            return Err(SubsystemError::Abandoned);
        }
        self.open_session()
    }

    fn tear_down(&mut self) {
        if let Err(err) = self.arbiter.send("AT+QMTCLOSE=0", None, self.timeout) {
            debug!(%err, "session close failed");
        }
    }
}

/// GNSS position acquisition.
///
/// Health is judged from the sentence stream the classifier routes to the
/// position channel, not from command responses: a fresh stream plus a
/// parser-confirmed fix is healthy, a fresh stream without a fix is still
/// searching, and a stalled stream means the engine needs a restart.
pub struct PositionDriver {
    arbiter: Arc<CommandArbiter>,
    shared: Arc<PositionShared>,
    timeout: Duration,
    stale_after: Duration,
}

impl PositionDriver {
    pub fn new(
        arbiter: Arc<CommandArbiter>,
        shared: Arc<PositionShared>,
        timeout: Duration,
        stale_after: Duration,
    ) -> Self {
        PositionDriver {
            arbiter,
            shared,
            timeout,
            stale_after,
        }
    }

    fn enable_engine(&self) -> Result<(), SubsystemError> {
        match self.arbiter.send("AT+QGPS=1", None, self.timeout) {
            Ok(_) => Ok(()),
            // Already-enabled is reported as an error token by the modem.
            Err(ArbiterError::CommandFailed { .. }) => Ok(()),
            Err(err) => Err(SubsystemError::Unhealthy(err.to_string())),
        }
    }
}

impl SubsystemDriver for PositionDriver {
    fn id(&self) -> SubsystemId {
        SubsystemId::Position
    }

    fn bring_up(&mut self) -> Result<ProbeOutcome, SubsystemError> {
        self.enable_engine()?;
        // Searching starts now; a fix may take minutes or never come.
        Ok(ProbeOutcome::Pending)
    }

    fn probe(&mut self) -> ProbeOutcome {
        if self.shared.stream_fresh(self.stale_after) {
            if self.shared.has_fix() {
                ProbeOutcome::Healthy
            } else {
                ProbeOutcome::Pending
            }
        } else if self.shared.stream_seen() {
            // Sentences used to flow and stopped: the engine stalled.
            ProbeOutcome::Failed
        } else {
            ProbeOutcome::Pending
        }
    }

    fn reconnect(&mut self, ctx: &RecoveryCtx) -> Result<(), SubsystemError> {
        if ctx.abandoned() {
            return Err(SubsystemError::Abandoned);
        }
        self.enable_engine()
    }

    fn reinitialize(&mut self, ctx: &RecoveryCtx) -> Result<(), SubsystemError> {
        recovery_step(&self.arbiter, ctx, "AT+QGPSEND", None, self.timeout)?;
        if ctx.abandoned() {
            return Err(SubsystemError::Abandoned);
        }
        self.enable_engine()
    }

    fn tear_down(&mut self) {
        if let Err(err) = self.arbiter.send("AT+QGPSEND", None, self.timeout) {
            debug!(%err, "gnss stop failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registered_accepts_home_and_roaming() {
        assert!(registered("+CREG: 0,1\r\nOK"));
        assert!(registered("+CREG: 2,5"));
        assert!(!registered("+CREG: 0,2")); // still searching
        assert!(!registered("+CREG: 0,0"));
        assert!(!registered("OK"));
    }

    #[test]
    fn test_session_up_requires_connected_state() {
        assert!(session_up("+QMTCONN: 0,3\r\nOK"));
        assert!(!session_up("+QMTCONN: 0,1")); // mid-handshake
        assert!(!session_up("OK"));
    }
}
