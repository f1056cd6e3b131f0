use super::stcp_parsing::{
    BuildHeaderError, Control, ParseError, StcpHeader, StcpHeaderBuilder, HEADER_OCTETS,
};
use super::window::MSS;
use thiserror::Error as ThisError;

/// The role a segment plays in the protocol. Decided by the control bits
/// alone; a segment without any control bits is data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SegmentKind {
    Syn,
    Ack,
    SynAck,
    Data,
    Fin,
    /// FIN and ACK together. No transition sends one; the kind exists so an
    /// arriving FIN,ACK is classified, and it can satisfy a wait for a FIN or
    /// an ACK.
    FinAck,
}

impl SegmentKind {
    /// The control bits that identify this kind on the wire
    pub const fn control(self) -> Control {
        match self {
            SegmentKind::Syn => Control::new(false, true, false),
            SegmentKind::Ack => Control::new(true, false, false),
            SegmentKind::SynAck => Control::new(true, true, false),
            SegmentKind::Data => Control::new(false, false, false),
            SegmentKind::Fin => Control::new(false, false, true),
            SegmentKind::FinAck => Control::new(true, false, true),
        }
    }

    /// Classifies a set of control bits
    pub fn from_control(ctl: Control) -> Self {
        match (ctl.syn(), ctl.fin(), ctl.ack()) {
            (true, _, true) => SegmentKind::SynAck,
            (true, _, false) => SegmentKind::Syn,
            (false, true, true) => SegmentKind::FinAck,
            (false, true, false) => SegmentKind::Fin,
            (false, false, true) => SegmentKind::Ack,
            (false, false, false) => SegmentKind::Data,
        }
    }

    /// Whether a segment with the control bits `ctl` is acceptable where this
    /// kind is awaited. Every bit of this kind must be present; extra bits are
    /// tolerated.
    pub const fn accepts(self, ctl: Control) -> bool {
        ctl.contains(self.control())
    }
}

/// A segment in transit. Built for a single send or decoded from a single
/// receive and then dropped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub header: StcpHeader,
    pub payload: Vec<u8>,
}

impl Segment {
    /// Builds a segment of the given kind. Data segments must carry between 1
    /// and [`MSS`] bytes, control segments none.
    pub fn new(
        kind: SegmentKind,
        mut header: StcpHeaderBuilder,
        payload: &[u8],
    ) -> Result<Self, BuildSegmentError> {
        match kind {
            SegmentKind::Data if payload.is_empty() => Err(BuildSegmentError::EmptyData)?,
            SegmentKind::Data if payload.len() > MSS as usize => {
                Err(BuildSegmentError::ExceedsMss(payload.len()))?
            }
            SegmentKind::Data => {}
            _ if !payload.is_empty() => Err(BuildSegmentError::PayloadOnControl(kind))?,
            _ => {}
        }

        let ctl = kind.control();
        if ctl.syn() {
            header = header.syn();
        }
        if ctl.fin() {
            header = header.fin();
        }
        let mut header = header.build(payload.len())?;
        header.ctl.set_ack(ctl.ack());

        Ok(Self {
            header,
            payload: payload.into(),
        })
    }

    /// Decodes a received datagram
    pub fn parse(bytes: &[u8]) -> Result<Self, ParseError> {
        let header = StcpHeader::from_bytes(bytes.iter().cloned())?;
        Ok(Self {
            header,
            payload: bytes[HEADER_OCTETS..].to_vec(),
        })
    }

    /// The datagram to hand to the network
    pub fn serialize(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(HEADER_OCTETS + self.payload.len());
        self.header.serialize_into(&mut out);
        out.extend_from_slice(&self.payload);
        out
    }

    pub fn kind(&self) -> SegmentKind {
        SegmentKind::from_control(self.header.ctl)
    }

    /// The amount of sequence space the segment occupies: its payload, plus one
    /// for each of SYN and FIN.
    pub fn seg_len(&self) -> u32 {
        self.payload.len() as u32 + self.header.ctl.syn() as u32 + self.header.ctl.fin() as u32
    }
}

/// An error that occurred while building a segment
#[derive(Debug, ThisError, PartialEq, Eq, Clone, Copy)]
pub enum BuildSegmentError {
    #[error("A data segment must carry at least one byte")]
    EmptyData,
    #[error("A data segment of {0} bytes exceeds the maximum segment size")]
    ExceedsMss(usize),
    #[error("A {0:?} segment cannot carry a payload")]
    PayloadOnControl(SegmentKind),
    #[error("{0}")]
    Header(#[from] BuildHeaderError),
}
