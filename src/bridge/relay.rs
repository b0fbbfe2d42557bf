use std::io::{Read, Write};
use std::time::Instant;

use tracing::{debug, info, warn};

use super::command::{ProtocolError, RemoteRequest};
use super::remote::{RemoteListener, RemotePeer};
use super::{BridgeState, RelayStats, UnknownVerbPolicy};
use crate::core::{BridgeConfig, Error, Result};
use crate::protocol::ascii::encode_telemetry_as;
use crate::protocol::{CommandFrame, TelemetryFrame, TelemetrySchema};
use crate::transport::StreamAdapter;
use crate::util::IntervalGate;

/// Reply to `GET_DATA` before any telemetry has been seen
pub const NO_TELEMETRY_REPLY: &str = "ERROR: no telemetry available";

/// What one tick did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Connection state at the end of the tick
    pub state: BridgeState,
    /// Telemetry forwarded to the peer
    pub telemetry: Option<TelemetryFrame>,
    /// Command forwarded to the stream
    pub command: Option<CommandFrame>,
    /// Line sent back to the peer in answer to its request
    pub reply: Option<String>,
}

/// Single-peer relay between a remote listener and the robot's stream link.
///
/// Each tick checks the connection, forwards at most one telemetry line per
/// interval and handles at most one remote request.
pub struct Relay<L: RemoteListener, S> {
    listener: L,
    peer: Option<L::Peer>,
    stream: StreamAdapter<S>,
    telemetry_gate: IntervalGate,
    unknown_verb_policy: UnknownVerbPolicy,
    last_telemetry: Option<TelemetryFrame>,
    stats: RelayStats,
}

/// Stream failures that only cost the current frame
fn absorbed(err: &Error) -> bool {
    matches!(
        err,
        Error::Format(_) | Error::Range(_) | Error::Transport { .. }
    )
}

impl<L, S> Relay<L, S>
where
    L: RemoteListener,
    S: Read + Write,
{
    pub fn new(listener: L, stream: StreamAdapter<S>, config: &BridgeConfig) -> Self {
        Relay {
            listener,
            peer: None,
            stream,
            telemetry_gate: IntervalGate::new(config.telemetry_interval),
            unknown_verb_policy: config.unknown_verb_policy,
            last_telemetry: None,
            stats: RelayStats::default(),
        }
    }

    pub fn state(&self) -> BridgeState {
        if self.peer.is_some() {
            BridgeState::Connected
        } else {
            BridgeState::Disconnected
        }
    }

    pub fn stats(&self) -> RelayStats {
        self.stats
    }

    pub fn last_telemetry(&self) -> Option<TelemetryFrame> {
        self.last_telemetry
    }

    pub fn stream(&self) -> &StreamAdapter<S> {
        &self.stream
    }

    pub fn stream_mut(&mut self) -> &mut StreamAdapter<S> {
        &mut self.stream
    }

    pub fn listener(&self) -> &L {
        &self.listener
    }

    pub fn tick(&mut self) -> Result<TickReport> {
        self.tick_at(Instant::now())
    }

    /// Runs one iteration as if the clock read `now`.
    ///
    /// Only a lost stream link is returned as an error; everything else is
    /// logged, counted and absorbed.
    pub fn tick_at(&mut self, now: Instant) -> Result<TickReport> {
        let mut report = TickReport::default();

        if !self.refresh_connection() {
            return Ok(report);
        }

        if self.telemetry_gate.ready(now) {
            report.telemetry = self.forward_telemetry()?;
        }

        self.handle_request(&mut report)?;

        report.state = self.state();
        Ok(report)
    }

    /// Drops a dead peer and accepts a waiting one
    fn refresh_connection(&mut self) -> bool {
        if let Some(peer) = self.peer.as_mut() {
            if peer.is_connected() {
                return true;
            }
            info!(peer = %peer.label(), "client disconnected");
            self.peer = None;
            self.stats.disconnects += 1;
        }

        match self.listener.accept() {
            Ok(Some(peer)) => {
                info!(peer = %peer.label(), "new client connected");
                self.peer = Some(peer);
                self.stats.connections += 1;
                true
            }
            Ok(None) => false,
            Err(err) => {
                warn!(%err, "accept failed");
                false
            }
        }
    }

    fn forward_telemetry(&mut self) -> Result<Option<TelemetryFrame>> {
        let frame = match self.stream.read_telemetry_line() {
            Ok(Some((frame, schema))) => {
                debug!(?schema, "telemetry from robot");
                frame
            }
            Ok(None) => return Ok(None),
            Err(err) if absorbed(&err) => {
                warn!(%err, "dropping telemetry line");
                self.stats.telemetry_failures += 1;
                return Ok(None);
            }
            Err(err) => return Err(err),
        };

        let line = encode_telemetry_as(&frame, TelemetrySchema::Minimal);
        if !self.send_to_peer(&line) {
            return Ok(None);
        }
        debug!(line = %line, "forwarded telemetry");
        self.stats.telemetry_forwarded += 1;
        self.last_telemetry = Some(frame);
        Ok(Some(frame))
    }

    fn handle_request(&mut self, report: &mut TickReport) -> Result<()> {
        let line = match self.peer.as_mut().map(|peer| peer.read_line()) {
            Some(Ok(Some(line))) => line,
            Some(Ok(None)) | None => return Ok(()),
            Some(Err(err)) => {
                warn!(%err, "reading from client failed");
                return Ok(());
            }
        };

        let line = line.trim();
        match RemoteRequest::parse(line) {
            Ok(RemoteRequest::GetData) => {
                info!("received command: GET_DATA");
                let reply = match self.last_telemetry {
                    Some(frame) => encode_telemetry_as(&frame, TelemetrySchema::Minimal),
                    None => NO_TELEMETRY_REPLY.to_string(),
                };
                self.reply(report, reply);
            }
            Ok(request) => {
                info!(command = line, "received command");
                if let Some(frame) = request.to_command() {
                    self.forward_command(report, frame)?;
                }
            }
            Err(ProtocolError::Empty) => {}
            Err(err @ ProtocolError::UnknownVerb(_)) => {
                warn!(command = line, "unknown command");
                self.stats.unknown_verbs += 1;
                if self.unknown_verb_policy == UnknownVerbPolicy::Acknowledge {
                    self.reply(report, err.reply());
                }
            }
            Err(err) => {
                warn!(command = line, %err, "rejected command");
                self.stats.protocol_errors += 1;
                self.reply(report, err.reply());
            }
        }
        Ok(())
    }

    fn forward_command(&mut self, report: &mut TickReport, frame: CommandFrame) -> Result<()> {
        match self.stream.write_command_line(&frame) {
            Ok(()) => {
                debug!(%frame, "forwarded command");
                self.stats.commands_forwarded += 1;
                report.command = Some(frame);
                Ok(())
            }
            Err(err) if absorbed(&err) => {
                warn!(%err, "command not forwarded");
                self.stats.command_failures += 1;
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    fn reply(&mut self, report: &mut TickReport, line: String) {
        if self.send_to_peer(&line) {
            report.reply = Some(line);
        }
    }

    fn send_to_peer(&mut self, line: &str) -> bool {
        let Some(peer) = self.peer.as_mut() else {
            return false;
        };
        match peer.write_line(line) {
            Ok(()) => true,
            Err(err) => {
                warn!(peer = %peer.label(), %err, "write to client failed");
                false
            }
        }
    }
}
