use super::{
    segment::{BuildSegmentError, Segment, SegmentKind},
    stcp_parsing::StcpHeaderBuilder,
    window::{Acked, Window, WINDOW_CEILING},
};
use crate::{
    transfer_log::{LogRecord, TransferLog, TransferLogError},
    Config,
};
use thiserror::Error as ThisError;

mod state;
pub use state::{Action, InvalidTransition, Role, State, Transition, Trigger};


/// The fields of the most recently sent segment
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct Sent {
    seq: u32,
    ack: u32,
    kind: Option<SegmentKind>,
    len: u32,
}

/// The fields of the most recently received segment
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct Received {
    seq: u32,
    ack: u32,
    /// Sequence space occupied by the segment
    len: u32,
    win: u16,
}

/// The connection context: state, sequence bookkeeping and the send window of
/// one end of a connection. Owned by a single event loop for its lifetime.
#[derive(Debug)]
pub struct Connection {
    role: Role,
    state: State,
    iss: u32,
    local_port: u16,
    remote_port: u16,
    next_seq: u32,
    prev: Sent,
    rcvd: Received,
    window: Window,
    /// The length of the unacknowledged data segment, if there is one
    in_flight: Option<u32>,
    done: bool,
    transfer_log: Option<TransferLog>,
}

impl Connection {
    pub fn new(config: &Config, role: Role) -> Self {
        Self {
            role,
            state: State::Listen,
            iss: config.iss,
            local_port: config.local_port,
            remote_port: config.remote_port,
            next_seq: config.iss,
            prev: Sent::default(),
            rcvd: Received::default(),
            window: Window::new(),
            in_flight: None,
            done: false,
            transfer_log: None,
        }
    }

    /// Records every data segment sent and acknowledged to `log`
    pub fn with_transfer_log(mut self, log: TransferLog) -> Self {
        self.transfer_log = Some(log);
        self
    }

    /// Moves the state machine and returns the actions the caller must perform
    /// in order.
    pub fn apply(&mut self, trigger: Trigger) -> Result<&'static [Action], ConnectionError> {
        if self.done {
            Err(ConnectionError::Closed)?
        }
        let transition = self.state.on(trigger).map_err(|e| {
            if e.is_contract_violation() {
                ConnectionError::ContractViolation(e)
            } else {
                ConnectionError::InvalidTransition(e)
            }
        })?;
        if transition.next != self.state {
            tracing::info!(
                role = ?self.role,
                from = %self.state,
                to = %transition.next,
                "State change"
            );
        }
        self.state = transition.next;
        Ok(transition.actions)
    }

    /// Builds the next segment of the given kind and accounts for it having
    /// been sent. Only data segments carry a payload.
    pub fn segment(
        &mut self,
        kind: SegmentKind,
        payload: &[u8],
    ) -> Result<Segment, ConnectionError> {
        if self.done {
            Err(ConnectionError::Closed)?
        }
        if kind == SegmentKind::Data {
            if let Some(len) = self.in_flight {
                Err(ConnectionError::DataInFlight(len))?
            }
        }

        let (seq, ack) = match kind {
            SegmentKind::Syn => (self.iss, 0),
            SegmentKind::SynAck => (self.iss, self.rcvd.seq.wrapping_add(1)),
            SegmentKind::Ack => (self.next_seq, self.rcvd.seq.wrapping_add(self.rcvd.len)),
            SegmentKind::Data | SegmentKind::Fin => (self.next_seq, self.prev.ack),
            SegmentKind::FinAck => (self.rcvd.ack, self.rcvd.seq.wrapping_add(1)),
        };
        let header = StcpHeaderBuilder::new(self.local_port, self.remote_port, seq)
            .ack_number(ack)
            .wnd(WINDOW_CEILING as u16);
        let segment = Segment::new(kind, header, payload)?;

        if kind == SegmentKind::Data {
            let len = payload.len() as u32;
            self.log(LogRecord::send(
                self.window.swnd(),
                self.window.remainder(),
                len,
            ))?;
            self.window.on_send(len);
            self.in_flight = Some(len);
        }
        self.prev = Sent {
            seq,
            ack,
            kind: Some(kind),
            len: segment.seg_len(),
        };
        Ok(segment)
    }

    /// Takes in a segment the event loop was waiting for. The segment must
    /// carry every control bit of `expected`. An acknowledgment of a data
    /// segment grows the send window.
    pub fn accept(
        &mut self,
        expected: SegmentKind,
        segment: &Segment,
    ) -> Result<(), ConnectionError> {
        if self.done {
            Err(ConnectionError::Closed)?
        }
        if !expected.accepts(segment.header.ctl) {
            Err(ConnectionError::UnexpectedSegment {
                expected,
                actual: segment.kind(),
            })?
        }
        self.record(segment)?;

        if expected == SegmentKind::Syn {
            self.next_seq = self.iss;
            if self.remote_port == 0 {
                self.remote_port = segment.header.src_port;
            }
        } else {
            self.next_seq = segment.header.ack;
        }

        if expected.control().ack() {
            match self.in_flight.take() {
                Some(len) => {
                    self.log(LogRecord::recv(
                        self.window.swnd(),
                        self.window.remainder(),
                        len,
                    ))?;
                    self.window.on_ack(Acked::Data(len));
                }
                None => self.window.on_ack(Acked::Control),
            }
        }
        Ok(())
    }

    /// Records the fields of an arriving segment without consulting any
    /// expectation. Used for data and FIN segments arriving unprompted.
    pub fn record(&mut self, segment: &Segment) -> Result<(), ConnectionError> {
        if self.done {
            Err(ConnectionError::Closed)?
        }
        self.rcvd = Received {
            seq: segment.header.seq,
            ack: segment.header.ack,
            len: segment.seg_len(),
            win: segment.header.wnd,
        };
        Ok(())
    }

    /// Marks the connection as done once it has reached CLOSED and releases the
    /// transfer log. Returns true only on the call that did so.
    pub fn finish(&mut self) -> bool {
        if self.done || self.state != State::Closed {
            return false;
        }
        self.done = true;
        self.transfer_log = None;
        tracing::info!(role = ?self.role, "Connection closed");
        true
    }

    fn log(&mut self, record: LogRecord) -> Result<(), TransferLogError> {
        match self.transfer_log.as_mut() {
            Some(log) => log.record(&record),
            None => Ok(()),
        }
    }

    /// How many bytes the next data segment may carry
    pub fn budget(&self) -> usize {
        self.window.budget()
    }

    pub fn role(&self) -> Role {
        self.role
    }

    pub fn state(&self) -> State {
        self.state
    }

    /// The sequence number of the next segment this end sends
    pub fn next_seq(&self) -> u32 {
        self.next_seq
    }

    /// The sequence number this end expects the peer to send next
    pub fn expected_seq(&self) -> u32 {
        self.rcvd.seq.wrapping_add(self.rcvd.len)
    }

    /// The window last advertised by the peer. Recorded but not used to size
    /// sends.
    pub fn peer_window(&self) -> u16 {
        self.rcvd.win
    }

    /// The kind of the most recently sent segment
    pub fn last_sent(&self) -> Option<SegmentKind> {
        self.prev.kind
    }

    /// The sequence number just past the most recently sent segment
    #[cfg(test)]
    fn sent_through(&self) -> u32 {
        self.prev.seq.wrapping_add(self.prev.len)
    }

    pub fn window(&self) -> &Window {
        &self.window
    }

    pub fn in_flight(&self) -> Option<u32> {
        self.in_flight
    }

    pub fn is_done(&self) -> bool {
        self.done
    }
}

/// An error that occurred while advancing a connection
#[derive(Debug, ThisError)]
pub enum ConnectionError {
    #[error("{0}")]
    InvalidTransition(InvalidTransition),
    #[error("Contract violation: {0}")]
    ContractViolation(InvalidTransition),
    #[error("Expected a {expected:?} segment but a {actual:?} segment arrived")]
    UnexpectedSegment {
        expected: SegmentKind,
        actual: SegmentKind,
    },
    #[error("A data segment of {0} bytes is still unacknowledged")]
    DataInFlight(u32),
    #[error("The connection is closed")]
    Closed,
    #[error("{0}")]
    Build(#[from] BuildSegmentError),
    #[error("{0}")]
    TransferLog(#[from] TransferLogError),
}

impl ConnectionError {
    /// Whether the error came from misuse by the caller rather than from the
    /// peer or the environment
    pub fn is_contract_violation(&self) -> bool {
        matches!(
            self,
            ConnectionError::ContractViolation(_)
                | ConnectionError::DataInFlight(_)
                | ConnectionError::Closed
        )
    }
}
