use crate::stcp::segment::SegmentKind;
use std::fmt;
use thiserror::Error as ThisError;

/// The state of the STCP state machine. The transitions are a subset of the
/// TCP diagram below: there is no simultaneous open or close, no reset, and
/// no TIME-WAIT. A connection that completes either close sequence goes
/// straight to CLOSED.
///
/// ```text
///                               +---------+
///                               |  LISTEN |
///                               +---------+
///           rcv SYN               |     |     active OPEN
///          -----------           /       \    -----------
///          snd SYN,ACK          /         \     snd SYN
/// +--------+<------------------            ------------------>+--------+
/// |  SYN   |                                                  |  SYN   |
/// |  RCVD  |                                                  |  SENT  |
/// +--------+                                                  +--------+
///    |   rcv ACK of SYN        +---------+    rcv SYN,ACK          |
///     ---------------------->  |  ESTAB  |  <-----------------------
///                              +---------+      snd ACK
///                 CLOSE          |     |        rcv FIN
///                -------        /       \       -------
///                snd FIN       /         \      snd ACK
/// +---------+<-----------------           ------------------->+---------+
/// |  FIN    |                                                 |  CLOSE  |
/// | WAIT-1  |                                                 |   WAIT  |
/// +---------+                                                 +---------+
///   | rcv ACK of FIN                                  snd FIN      |
///   V                                                              V
/// +---------+                                                 +---------+
/// |FINWAIT-2|                                                 | LAST-ACK|
/// +---------+                                                 +---------+
///   |  rcv FIN                                 rcv ACK of FIN      |
///   |  snd ACK                                                     |
///    \                         +---------+                        /
///     -----------------------> | CLOSED  | <---------------------
///                              +---------+
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum State {
    /// Not yet opened, or waiting for a SYN after a passive open.
    Listen,
    /// Waiting for a matching connection request acknowledgment after having
    /// sent a connection request.
    SynSent,
    /// Waiting for the acknowledgment of the SYN,ACK sent in response to a
    /// connection request.
    SynReceived,
    /// An open connection. The normal state for the data transfer phase.
    Established,
    /// Waiting for the acknowledgment of the FIN sent on a local close.
    FinWait1,
    /// Waiting for a connection termination request from the peer.
    FinWait2,
    /// The peer has closed. The local FIN follows immediately.
    CloseWait,
    /// Both sides sent FIN at once. Not reachable: a FIN arriving in FIN-WAIT-1
    /// fails the type check for the awaited ACK and aborts the connection.
    Closing,
    /// Waiting for the acknowledgment of the FIN sent after the peer's FIN.
    LastAck,
    /// The close handshake is complete.
    Closed,
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            State::Listen => write!(f, "LISTEN"),
            State::SynSent => write!(f, "SYN-SENT"),
            State::SynReceived => write!(f, "SYN-RECEIVED"),
            State::Established => write!(f, "ESTABLISHED"),
            State::FinWait1 => write!(f, "FIN-WAIT-1"),
            State::FinWait2 => write!(f, "FIN-WAIT-2"),
            State::CloseWait => write!(f, "CLOSE-WAIT"),
            State::Closing => write!(f, "CLOSING"),
            State::LastAck => write!(f, "LAST-ACK"),
            State::Closed => write!(f, "CLOSED"),
        }
    }
}

/// Which side of the connection opened it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// Sends the SYN
    Active,
    /// Waits for a SYN
    Passive,
}

/// Something that moves the state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Trigger {
    /// Begin the opening handshake
    Open(Role),
    /// The application has data to send
    Write,
    /// A segment of the given kind arrived. For an awaited segment this is the
    /// awaited kind, which the arriving segment may exceed.
    Arrived(SegmentKind),
    /// Close the local half of the connection
    Close,
}

/// A side effect of a transition, performed in order by the event loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    /// Build and transmit a segment of the given kind
    Send(SegmentKind),
    /// Block until a segment satisfying the given kind arrives, then feed it
    /// back as [`Trigger::Arrived`]. Always the final action.
    Await(SegmentKind),
    /// Hand the arriving segment's payload to the application. A FIN may
    /// carry data too, and its acknowledgment covers those bytes.
    Deliver,
    /// Tell the application the peer will send no more data
    SignalPeerFin,
    /// Release an application waiting for the connection to open
    Unblock,
    /// Feed [`Trigger::Close`] back immediately. Always the final action.
    Close,
}

/// The result of applying a [`Trigger`] in some [`State`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub next: State,
    pub actions: &'static [Action],
}

impl Transition {
    const fn new(next: State, actions: &'static [Action]) -> Self {
        Self { next, actions }
    }
}

impl State {
    /// The transition function. Every combination not listed is an error.
    pub fn on(self, trigger: Trigger) -> Result<Transition, InvalidTransition> {
        use self::Action::*;
        use SegmentKind::{Ack, Data, Fin, Syn, SynAck};
        use State::*;

        let transition = match (self, trigger) {
            // Opening
            (Listen, Trigger::Open(Role::Active)) => {
                Transition::new(SynSent, &[Send(Syn), Await(SynAck)])
            }
            (Listen, Trigger::Open(Role::Passive)) => Transition::new(Listen, &[Await(Syn)]),
            (Listen, Trigger::Arrived(Syn)) => {
                Transition::new(SynReceived, &[Send(SynAck), Await(Ack)])
            }
            (SynSent, Trigger::Arrived(SynAck)) => {
                Transition::new(Established, &[Send(Ack), Unblock])
            }
            (SynReceived, Trigger::Arrived(Ack)) => Transition::new(Established, &[Unblock]),

            // Data transfer
            (Established, Trigger::Write) => Transition::new(Established, &[Send(Data), Await(Ack)]),
            (Established, Trigger::Arrived(Ack)) => Transition::new(Established, &[]),
            (Established, Trigger::Arrived(Data)) => {
                Transition::new(Established, &[Deliver, Send(Ack)])
            }

            // Peer-initiated close
            (Established, Trigger::Arrived(Fin)) => {
                Transition::new(CloseWait, &[Deliver, Send(Ack), SignalPeerFin, Close])
            }
            (CloseWait, Trigger::Close) => Transition::new(LastAck, &[Send(Fin), Await(Ack)]),
            (LastAck, Trigger::Arrived(Ack)) => Transition::new(Closed, &[]),

            // Local close
            (Established, Trigger::Close) => Transition::new(FinWait1, &[Send(Fin), Await(Ack)]),
            (FinWait1, Trigger::Arrived(Ack)) => Transition::new(FinWait2, &[Await(Fin)]),
            (FinWait2, Trigger::Arrived(Fin)) => Transition::new(Closed, &[Deliver, Send(Ack)]),

            (state, trigger) => Err(InvalidTransition {
                state,
                trigger,
            })?,
        };
        Ok(transition)
    }
}

/// A trigger that has no transition from the current state
#[derive(Debug, ThisError, PartialEq, Eq, Clone, Copy)]
#[error("No transition from {state} on {trigger:?}")]
pub struct InvalidTransition {
    pub state: State,
    pub trigger: Trigger,
}

impl InvalidTransition {
    /// Whether the trigger came from misuse by the application rather than from
    /// the peer. Closing a connection that is not established and writing to
    /// one are the only such triggers.
    pub fn is_contract_violation(&self) -> bool {
        matches!(
            self.trigger,
            Trigger::Close | Trigger::Write | Trigger::Open(_)
        )
    }
}
