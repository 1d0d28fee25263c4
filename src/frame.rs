//! Wire framing: every datagram is an 8-byte sequence id followed by
//! one raw IP packet.  The datagram boundary is the packet boundary,
//! so there is no length field.

use crate::err::*;

pub const HEADER_LEN: usize = 8;

/// Sequence id of the client's rendezvous datagram.  Never handed out
/// by a `SequenceCounter`.
pub const RENDEZVOUS_ID: u64 = u64::MAX;

/// Append the frame for (`id`, `payload`) to `buf`, which is cleared
/// first.
pub fn encode(id: u64, payload: &[u8], buf: &mut Vec<u8>) {
    buf.clear();
    buf.reserve(HEADER_LEN + payload.len());
    buf.extend_from_slice(&id.to_le_bytes());
    buf.extend_from_slice(payload);
}

/// Split a received datagram into its sequence id and payload.
pub fn decode(datagram: &[u8]) -> Result<(u64, &[u8]), HLError> {
    if datagram.len() < HEADER_LEN {
        return Err(HLError::ShortFrame { len: datagram.len() });
    }
    let (header, payload) = datagram.split_at(HEADER_LEN);
    let mut id = [0u8; HEADER_LEN];
    id.copy_from_slice(header);
    Ok((u64::from_le_bytes(id), payload))
}

/// The rendezvous datagram: a bare header carrying `RENDEZVOUS_ID`.
pub fn rendezvous() -> [u8; HEADER_LEN] {
    RENDEZVOUS_ID.to_le_bytes()
}

/// Per-direction packet counter.  Starts at zero, advances once per
/// packet sent.
#[derive(Debug, Default)]
pub struct SequenceCounter {
    next: u64,
}

impl SequenceCounter {
    pub fn new() -> SequenceCounter {
        SequenceCounter { next: 0 }
    }

    /// Hand out the next id.  Skips `RENDEZVOUS_ID` by wrapping to zero
    /// in its place.
    pub fn advance(&mut self) -> u64 {
        let id = self.next;
        self.next = id.wrapping_add(1);
        if self.next == RENDEZVOUS_ID {
            self.next = 0;
        }
        id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_round_trips() {
        let mut buf = Vec::new();
        for &(id, payload) in &[(0u64, &b""[..]),
                                (1, &[0x45u8, 0, 0, 20][..]),
                                (0x0123_4567_89ab_cdef, &[0xffu8; 1500][..])] {
            encode(id, payload, &mut buf);
            assert_eq!(buf.len(), HEADER_LEN + payload.len());
            let (got_id, got_payload) = decode(&buf).unwrap();
            assert_eq!(got_id, id);
            assert_eq!(got_payload, payload);
        }
    }

    #[test]
    fn short_datagram_is_a_framing_violation() {
        match decode(&[1, 2, 3]) {
            Err(HLError::ShortFrame { len: 3 }) => (),
            other => panic!("unexpected {:?}", other),
        }
        assert!(decode(&[]).is_err());
    }

    #[test]
    fn rendezvous_is_all_ones_and_empty() {
        let dgram = rendezvous();
        assert_eq!(dgram, [0xff; HEADER_LEN]);
        let (id, payload) = decode(&dgram).unwrap();
        assert_eq!(id, RENDEZVOUS_ID);
        assert!(payload.is_empty());
    }

    #[test]
    fn counter_starts_at_zero_and_increases() {
        let mut seq = SequenceCounter::new();
        let ids: Vec<u64> = (0..5).map(|_| seq.advance()).collect();
        assert_eq!(ids, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn counter_never_yields_the_sentinel() {
        let mut seq = SequenceCounter { next: RENDEZVOUS_ID - 2 };
        assert_eq!(seq.advance(), RENDEZVOUS_ID - 2);
        assert_eq!(seq.advance(), RENDEZVOUS_ID - 1);
        assert_eq!(seq.advance(), 0);
        assert_eq!(seq.advance(), 1);
    }
}
