//! Wrappers around `tracing` events shared by the protocol code.

use crate::stcp::{segment::Segment, Role};
use tracing::{event, Level};

/// Segment event handler. Captures the direction the segment travelled, the
/// side of the connection, and the header fields of interest.
pub fn segment_event(direction: &str, role: Role, segment: &Segment) {
    event!(
        target: "SEGMENT",
        Level::DEBUG,
        direction = direction,
        role = ?role,
        kind = ?segment.kind(),
        seq = segment.header.seq,
        ack = segment.header.ack,
        flags = ?segment.header.ctl,
        wnd = segment.header.wnd,
        len = segment.payload.len(),
        "Segment"
    );
}
