//! Sync-pattern discovery, bit-repetition redundancy, and length-prefixed
//! packet reassembly over an arbitrary bit stream produced by any of the
//! symbol demodulators.

use crate::bitcursor;
use crate::error::{ModemError, Result};

const DEFAULT_SYNC: [u8; 2] = [0xC9, 0x3F];
const DEFAULT_MASK: [u8; 2] = [0x5A, 0xA5];

#[derive(Debug, Clone)]
pub struct PktFramer {
    sync: Vec<u8>,
    mask: Vec<u8>,
    redundancy: usize,
    rx_sync_reg: Vec<u8>,
    rx_sync_bitcount: usize,
    synced: bool,
    rx_packet: Vec<u8>,
    rx_bit_offset: usize,
    rx_src_bitcount: usize,
}

impl Default for PktFramer {
    fn default() -> Self {
        Self::new(DEFAULT_SYNC.to_vec(), DEFAULT_MASK.to_vec(), 1).expect("default config is valid")
    }
}

impl PktFramer {
    pub fn new(sync: Vec<u8>, mask: Vec<u8>, redundancy: usize) -> Result<Self> {
        if sync.is_empty() {
            return Err(ModemError::ConfigError("sync pattern must be non-empty".into()));
        }
        if mask.is_empty() {
            return Err(ModemError::ConfigError("mask must be non-empty".into()));
        }
        // A request of 0 is coerced up to 1 (no repetition) rather than
        // rejected; only a nonzero even count is invalid.
        let redundancy = if redundancy == 0 { 1 } else { redundancy };
        if redundancy % 2 == 0 {
            return Err(ModemError::ConfigError("redundancy must be odd".into()));
        }
        Ok(Self {
            sync,
            mask,
            redundancy,
            rx_sync_reg: Vec::new(),
            rx_sync_bitcount: 0,
            synced: false,
            rx_packet: Vec::new(),
            rx_bit_offset: 0,
            rx_src_bitcount: 0,
        })
    }

    /// Attempts to change the redundancy in place, following the source
    /// design's own convention: a request of 0 is coerced to 1, a nonzero
    /// even request is silently ignored and reports `false` instead of
    /// erroring.
    pub fn set_redundancy(&mut self, redundancy: usize) -> bool {
        let redundancy = if redundancy == 0 { 1 } else { redundancy };
        if redundancy % 2 == 0 {
            return false;
        }
        self.redundancy = redundancy;
        true
    }

    fn mask_bit(&self, src_bit_index: usize) -> u8 {
        let mask_bits = self.mask.len() * 8;
        bitcursor::get(&self.mask, src_bit_index % mask_bits, 1) as u8
    }

    /// Frames `payload` into a continuous bit-repeated, masked byte stream.
    pub fn tx(&self, payload: &[u8]) -> Result<Vec<u8>> {
        if payload.len() > u16::MAX as usize {
            return Err(ModemError::PacketOverflow);
        }

        let sync_bits = self.sync.len() * 8;
        let header_bits = 16;
        let payload_bits = payload.len() * 8;
        let src_bits = sync_bits + header_bits + payload_bits;
        let wire_bits = src_bits * self.redundancy;
        let mut wire = vec![0u8; (wire_bits + 7) / 8];

        let mut wire_bit = 0usize;
        let mut src_bit = 0usize;

        let mut push_src_bit = |wire: &mut [u8], wire_bit: &mut usize, bit: u8, post_sync: bool, src_index: usize| {
            for j in 0..self.redundancy {
                let masked = if post_sync {
                    bit ^ self.mask_bit(src_index * self.redundancy + j)
                } else {
                    bit
                };
                bitcursor::put(wire, *wire_bit, 1, masked as u32);
                *wire_bit += 1;
            }
        };

        for i in 0..sync_bits {
            let bit = bitcursor::get(&self.sync, i, 1) as u8;
            push_src_bit(&mut wire, &mut wire_bit, bit, false, src_bit);
            src_bit += 1;
        }

        let len = payload.len() as u16;
        let header = len.to_be_bytes();
        for i in 0..header_bits {
            let bit = bitcursor::get(&header, i, 1) as u8;
            push_src_bit(&mut wire, &mut wire_bit, bit, true, src_bit - sync_bits);
            src_bit += 1;
        }

        for i in 0..payload_bits {
            let bit = bitcursor::get(payload, i, 1) as u8;
            push_src_bit(&mut wire, &mut wire_bit, bit, true, src_bit - sync_bits);
            src_bit += 1;
        }

        Ok(wire)
    }

    /// Feeds `bit_count` bits (MSB-first, packed into `bits`) through the
    /// receive state machine, voting every `redundancy` wire bits into one
    /// source bit. Returns every packet fully reassembled during this call.
    pub fn rx_bits(&mut self, bits: &[u8], bit_count: usize) -> Vec<Vec<u8>> {
        let mut out = Vec::new();
        let mut i = 0usize;
        while i + self.redundancy <= bit_count {
            let mut votes = 0usize;
            for j in 0..self.redundancy {
                let raw = bitcursor::get(bits, i + j, 1) as u8;
                let bit = if self.synced {
                    raw ^ self.mask_bit(self.rx_src_bitcount * self.redundancy + j)
                } else {
                    raw
                };
                votes += bit as usize;
            }
            let bit = if votes * 2 > self.redundancy { 1u8 } else { 0u8 };
            self.consume_bit(bit, &mut out);
            i += self.redundancy;
        }
        out
    }

    fn consume_bit(&mut self, bit: u8, out: &mut Vec<Vec<u8>>) {
        if !self.synced {
            let sync_bits = self.sync.len() * 8;
            if self.rx_sync_reg.len() != self.sync.len() {
                self.rx_sync_reg = vec![0u8; self.sync.len()];
                self.rx_sync_bitcount = 0;
            }
            bitcursor::shift_left(&mut self.rx_sync_reg, 1);
            if bit != 0 {
                bitcursor::put(&mut self.rx_sync_reg, sync_bits - 1, 1, 1);
            }
            self.rx_sync_bitcount = (self.rx_sync_bitcount + 1).min(sync_bits);
            if self.rx_sync_bitcount == sync_bits && self.rx_sync_reg == self.sync {
                log::debug!("sync pattern found, starting packet reassembly");
                self.synced = true;
                self.rx_bit_offset = 0;
                self.rx_src_bitcount = 0;
                self.rx_packet = vec![0u8; 2];
                self.rx_sync_reg = vec![0u8; self.sync.len()];
                self.rx_sync_bitcount = 0;
            }
            return;
        }

        bitcursor::put(&mut self.rx_packet, self.rx_bit_offset, 1, bit as u32);
        self.rx_bit_offset += 1;
        self.rx_src_bitcount += 1;

        if self.rx_bit_offset == 16 {
            let len = u16::from_be_bytes([self.rx_packet[0], self.rx_packet[1]]) as usize;
            self.rx_packet.resize(2 + len, 0);
        } else if self.rx_bit_offset == 8 * self.rx_packet.len() {
            out.push(self.rx_packet[2..].to_vec());
            self.synced = false;
            self.rx_bit_offset = 0;
            self.rx_src_bitcount = 0;
            self.rx_packet.clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roundtrip_no_redundancy() {
        let framer = PktFramer::new(DEFAULT_SYNC.to_vec(), DEFAULT_MASK.to_vec(), 1).unwrap();
        let payload = b"hello world".to_vec();
        let wire = framer.tx(&payload).unwrap();

        let mut rx = PktFramer::new(DEFAULT_SYNC.to_vec(), DEFAULT_MASK.to_vec(), 1).unwrap();
        let packets = rx.rx_bits(&wire, wire.len() * 8);
        assert_eq!(packets, vec![payload]);
    }

    #[test]
    fn roundtrip_with_redundancy_and_bit_flip() {
        let framer = PktFramer::new(DEFAULT_SYNC.to_vec(), DEFAULT_MASK.to_vec(), 3).unwrap();
        let payload = vec![1u8, 2, 3, 4, 5];
        let mut wire = framer.tx(&payload).unwrap();
        // flip one wire bit inside a 3-redundancy group; majority vote should absorb it
        let flip_bit = 40usize;
        wire[flip_bit / 8] ^= 1 << (7 - (flip_bit % 8));

        let mut rx = PktFramer::new(DEFAULT_SYNC.to_vec(), DEFAULT_MASK.to_vec(), 3).unwrap();
        let packets = rx.rx_bits(&wire, wire.len() * 8);
        assert_eq!(packets, vec![payload]);
    }

    #[test]
    fn rejects_even_redundancy() {
        assert!(PktFramer::new(DEFAULT_SYNC.to_vec(), DEFAULT_MASK.to_vec(), 2).is_err());
    }

    #[test]
    fn zero_redundancy_coerces_to_one() {
        let framer = PktFramer::new(DEFAULT_SYNC.to_vec(), DEFAULT_MASK.to_vec(), 0).unwrap();
        assert_eq!(framer.redundancy, 1);
    }

    #[test]
    fn set_redundancy_ignores_even_request() {
        let mut framer = PktFramer::default();
        assert!(!framer.set_redundancy(4));
        assert_eq!(framer.redundancy, 1);
        assert!(framer.set_redundancy(5));
        assert_eq!(framer.redundancy, 5);
        assert!(framer.set_redundancy(0));
        assert_eq!(framer.redundancy, 1);
    }

    #[test]
    fn rejects_oversized_payload() {
        let framer = PktFramer::default();
        let huge = vec![0u8; u16::MAX as usize + 1];
        assert!(matches!(framer.tx(&huge), Err(ModemError::PacketOverflow)));
    }
}
