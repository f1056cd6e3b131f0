use thiserror::Error as ThisError;

/// The number of 32-bit words in an STCP header. Options are never sent.
const HEADER_WORDS: u8 = 5;
/// The number of bytes in an STCP header
pub const HEADER_OCTETS: usize = HEADER_WORDS as usize * 4;

/// The data for an STCP header
#[derive(Debug, Copy, Clone, Hash, PartialEq, Eq)]
pub struct StcpHeader {
    /// The source port number
    pub src_port: u16,
    /// The destination port number
    pub dst_port: u16,
    /// The sequence number of the first data octet in this segment. For a
    /// segment carrying SYN this is the initial sequence number.
    pub seq: u32,
    /// The next sequence number the sender of the segment expects to receive.
    /// Carried on every segment after the SYN, whether or not the ACK bit is
    /// set.
    pub ack: u32,
    /// The number of 32-bit words in the header
    pub data_offset: u8,
    /// Flags that adjust how segments are handled
    pub ctl: Control,
    /// The number of data octets the sender of this segment is willing to
    /// accept.
    pub wnd: u16,
    /// Opaque to this transport. Passed through as read and written as zero.
    pub checksum: u16,
    /// Unused and always zero. Present so the header spans five words.
    pub urg: u16,
}

impl StcpHeader {
    /// Parses a serialized STCP header into its constituent fields. Consumes
    /// exactly [`HEADER_OCTETS`] bytes from `packet`.
    pub fn from_bytes(mut packet: impl Iterator<Item = u8>) -> Result<Self, ParseError> {
        let mut next =
            || -> Result<u8, ParseError> { packet.next().ok_or(ParseError::HeaderTooShort) };

        let src_port = u16::from_be_bytes([next()?, next()?]);
        let dst_port = u16::from_be_bytes([next()?, next()?]);
        let seq = u32::from_be_bytes([next()?, next()?, next()?, next()?]);
        let ack = u32::from_be_bytes([next()?, next()?, next()?, next()?]);

        let offset_reserved_control = [next()?, next()?];
        let data_offset = offset_reserved_control[0] >> 4;
        let ctl = Control::from(offset_reserved_control[1]);

        let wnd = u16::from_be_bytes([next()?, next()?]);
        let checksum = u16::from_be_bytes([next()?, next()?]);
        let urg = u16::from_be_bytes([next()?, next()?]);

        if data_offset != HEADER_WORDS {
            Err(ParseError::UnexpectedOptions(data_offset))?
        }

        Ok(StcpHeader {
            src_port,
            dst_port,
            seq,
            ack,
            data_offset,
            ctl,
            wnd,
            checksum,
            urg,
        })
    }

    /// Convert the header to its serialized format, ready to prepend to a
    /// payload and send over the wire.
    pub fn serialize(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(HEADER_OCTETS);
        self.serialize_into(&mut out);
        out
    }

    /// Appends the serialized header to `out`.
    pub fn serialize_into(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.src_port.to_be_bytes());
        out.extend_from_slice(&self.dst_port.to_be_bytes());
        out.extend_from_slice(&self.seq.to_be_bytes());
        out.extend_from_slice(&self.ack.to_be_bytes());
        out.push(self.data_offset << 4);
        out.push(self.ctl.into());
        out.extend_from_slice(&self.wnd.to_be_bytes());
        out.extend_from_slice(&self.checksum.to_be_bytes());
        out.extend_from_slice(&self.urg.to_be_bytes());
    }
}

/// An error that occurred while parsing an STCP header
#[derive(Debug, ThisError, PartialEq, Eq, Clone, Copy)]
pub enum ParseError {
    #[error("Too few bytes to constitute an STCP header")]
    HeaderTooShort,
    #[error("Header length of {0} words is different from the 5 words of a header without options")]
    UnexpectedOptions(u8),
}

/// Used for building an STCP header
#[derive(Debug)]
pub struct StcpHeaderBuilder(StcpHeader);

impl StcpHeaderBuilder {
    /// Initialize the header with defaults and the given values
    pub fn new(src_port: u16, dst_port: u16, seq: u32) -> Self {
        Self(StcpHeader {
            src_port,
            dst_port,
            seq,
            wnd: 0,
            ack: 0,
            ctl: Control::default(),
            urg: 0,
            checksum: 0,

            // Filled in by .build()
            data_offset: 0,
        })
    }

    /// Set the window size
    pub fn wnd(mut self, wnd: u16) -> Self {
        self.0.wnd = wnd;
        self
    }

    /// Set the acknowledgement number and the ack bit
    pub fn ack(mut self, ack: u32) -> Self {
        self.0.ack = ack;
        self.0.ctl.set_ack(true);
        self
    }

    /// Set the acknowledgement number without claiming the ack bit
    pub fn ack_number(mut self, ack: u32) -> Self {
        self.0.ack = ack;
        self
    }

    /// Set the syn bit up
    pub fn syn(mut self) -> Self {
        self.0.ctl.set_syn(true);
        self
    }

    /// Set the fin bit up
    pub fn fin(mut self) -> Self {
        self.0.ctl.set_fin(true);
        self
    }

    /// Get the finished header for a segment with `text_len` bytes of payload
    pub fn build(self, text_len: usize) -> Result<StcpHeader, BuildHeaderError> {
        if text_len + HEADER_OCTETS > usize::from(u16::MAX) {
            Err(BuildHeaderError::OverlyLongPayload(text_len))?
        }

        let mut header = self.0;
        header.data_offset = HEADER_WORDS;
        Ok(header)
    }
}

/// An error that occurred while building an STCP header
#[derive(Debug, ThisError, PartialEq, Eq, Clone, Copy)]
pub enum BuildHeaderError {
    #[error("A payload of {0} bytes is longer than can fit into a single segment")]
    OverlyLongPayload(usize),
}

/// The control bits of an STCP header. Only FIN, SYN and ACK have meaning;
/// the remaining bits are dropped when parsing.
#[derive(Default, Hash, PartialEq, Eq, Clone, Copy)]
pub struct Control(u8);

impl Control {
    const FIN: u8 = 0;
    const SYN: u8 = 1;
    const ACK: u8 = 4;
    const MASK: u8 = 1 << Self::FIN | 1 << Self::SYN | 1 << Self::ACK;

    /// Create a new Control with the given bits
    pub const fn new(ack: bool, syn: bool, fin: bool) -> Self {
        Self((fin as u8) << Self::FIN | (syn as u8) << Self::SYN | (ack as u8) << Self::ACK)
    }

    /// Get whether the acknowledgment bit is set
    pub const fn ack(self) -> bool {
        self.bit(Self::ACK)
    }

    /// Set whether the acknowledgment bit is set
    pub fn set_ack(&mut self, state: bool) {
        self.set_bit(Self::ACK, state);
    }

    /// Get whether to synchronize sequence numbers
    pub const fn syn(self) -> bool {
        self.bit(Self::SYN)
    }

    /// Set whether to synchronize sequence numbers
    pub fn set_syn(&mut self, state: bool) {
        self.set_bit(Self::SYN, state);
    }

    /// Get whether there is no more data to send
    pub const fn fin(self) -> bool {
        self.bit(Self::FIN)
    }

    /// Set whether there is no more data to send
    pub fn set_fin(&mut self, state: bool) {
        self.set_bit(Self::FIN, state);
    }

    /// Whether every bit set in `other` is also set here
    pub const fn contains(self, other: Control) -> bool {
        self.0 & other.0 == other.0
    }

    /// Get the given bit
    const fn bit(self, bit: u8) -> bool {
        (self.0 >> bit) & 0b1 == 1
    }

    /// Set the given bit
    fn set_bit(&mut self, bit: u8, state: bool) {
        self.0 = (self.0 & !(1 << bit)) | ((state as u8) << bit);
    }
}

impl From<u8> for Control {
    fn from(n: u8) -> Self {
        Self(n & Self::MASK)
    }
}

impl From<Control> for u8 {
    fn from(control: Control) -> Self {
        control.0
    }
}

impl std::fmt::Debug for Control {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names = [(self.ack(), "ACK"), (self.syn(), "SYN"), (self.fin(), "FIN")];
        write!(f, "Control(")?;
        let mut wrote = false;
        for (_, name) in names.iter().filter(|(set, _)| *set) {
            if wrote {
                write!(f, ", ")?;
            }
            wrote = true;
            write!(f, "{name}")?;
        }
        write!(f, ")")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SRC_PORT: u16 = 0xcafe;
    const DST_PORT: u16 = 0xbabe;
    const SEQUENCE: u32 = 123456789;
    const WINDOW: u16 = 3072;
    const ACKNOWLEDGEMENT: u32 = 10;

    fn build_expected() -> (etherparse::TcpHeader, Vec<u8>) {
        let mut expected = etherparse::TcpHeader::new(SRC_PORT, DST_PORT, SEQUENCE, WINDOW);
        expected.acknowledgment_number = ACKNOWLEDGEMENT;
        expected.ack = true;
        expected.fin = true;

        let serial = {
            let mut serial = vec![];
            expected.write(&mut serial).unwrap();
            serial
        };

        (expected, serial)
    }

    #[test]
    fn parses_header() {
        let (expected, serial) = build_expected();

        let actual = StcpHeader::from_bytes(serial.into_iter()).unwrap();

        assert_eq!(actual.src_port, expected.source_port);
        assert_eq!(actual.dst_port, expected.destination_port);
        assert_eq!(actual.seq, SEQUENCE);
        assert_eq!(actual.ack, ACKNOWLEDGEMENT);
        assert_eq!(actual.data_offset, 5);
        assert_eq!(actual.ctl, Control::new(true, false, true));
        assert_eq!(actual.wnd, WINDOW);
        assert_eq!(actual.checksum, expected.checksum);
        assert_eq!(actual.urg, 0);
    }

    #[test]
    fn builds_header() {
        let (_, expected) = build_expected();

        let actual = StcpHeaderBuilder::new(SRC_PORT, DST_PORT, SEQUENCE)
            .wnd(WINDOW)
            .fin()
            .ack(ACKNOWLEDGEMENT)
            .build(0)
            .unwrap()
            .serialize();

        assert_eq!(actual.len(), HEADER_OCTETS);
        assert_eq!(expected, actual);
    }

    #[test]
    fn ack_number_leaves_flag_clear() {
        let header = StcpHeaderBuilder::new(1, 2, 3)
            .ack_number(99)
            .build(10)
            .unwrap();
        assert_eq!(header.ack, 99);
        assert!(!header.ctl.ack());

        let (parsed, _) = etherparse::TcpHeader::from_slice(&header.serialize()).unwrap();
        assert_eq!(parsed.acknowledgment_number, 99);
        assert!(!parsed.ack);
        assert!(!parsed.syn);
        assert!(!parsed.fin);
    }

    #[test]
    fn rejects_short_header() {
        let bytes = [0u8; HEADER_OCTETS - 1];
        assert_eq!(
            StcpHeader::from_bytes(bytes.into_iter()),
            Err(ParseError::HeaderTooShort)
        );
    }

    #[test]
    fn rejects_options() {
        let mut bytes = StcpHeaderBuilder::new(1, 2, 3).build(0).unwrap().serialize();
        bytes[12] = 6 << 4;
        assert_eq!(
            StcpHeader::from_bytes(bytes.into_iter()),
            Err(ParseError::UnexpectedOptions(6))
        );
    }

    #[test]
    fn rejects_oversized_payload() {
        assert_eq!(
            StcpHeaderBuilder::new(1, 2, 3).build(usize::from(u16::MAX)),
            Err(BuildHeaderError::OverlyLongPayload(usize::from(u16::MAX)))
        );
        let largest = usize::from(u16::MAX) - HEADER_OCTETS;
        assert!(StcpHeaderBuilder::new(1, 2, 3).build(largest).is_ok());
    }

    #[test]
    fn control_works() {
        let control = Control::new(true, true, false);
        assert!(control.ack());
        assert!(control.syn());
        assert!(!control.fin());
        assert!(control.contains(Control::new(false, true, false)));
        assert!(!control.contains(Control::new(false, false, true)));

        let control = {
            let mut control = Control::default();
            control.set_ack(true);
            control.set_fin(true);
            control.set_ack(false);
            control
        };
        assert!(!control.ack());
        assert!(control.fin());
        assert_eq!(format!("{control:?}"), "Control(FIN)");
    }

    #[test]
    fn unused_bits_are_dropped() {
        // RST | PSH | URG
        let control = Control::from(0b10_1100);
        assert_eq!(control, Control::default());
        assert_eq!(u8::from(Control::from(0xff)), 0b1_0011);
    }
}
