//! Core data types for sample transport

use std::fmt;
use std::sync::Arc;

/// A level change on a single channel.
///
/// Run-length view of one channel: the value holds from `position` until the
/// next edge's position. Decoders walk these instead of every sample.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Edge {
    /// Channel level from this position on
    pub value: bool,
    /// Global sample index where this level starts
    pub position: u64,
}

impl Edge {
    pub fn new(value: bool, position: u64) -> Self {
        Self { value, position }
    }
}

impl fmt::Display for Edge {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Edge[v={}, pos={}]", self.value, self.position)
    }
}

/// A batch of samples delivered by a source
///
/// Samples are stored sample-major: each sample occupies `unit_size` bytes,
/// little-endian, with bit N holding channel N (the DSLogic in-memory layout).
/// Analog chunks use one byte per channel instead.
///
/// `sequence` increases by one per chunk produced by a source, so consumers
/// can spot chunks that were dropped on the way.
#[derive(Clone, Debug)]
pub struct SampleChunk {
    /// Sample payload. Shared via Arc so handing a chunk around never copies it.
    pub data: Arc<[u8]>,
    /// Monotonic chunk counter assigned by the source
    pub sequence: u64,
    /// Global index of the first sample in this chunk
    pub start_position: u64,
    /// Number of samples in this chunk
    pub num_samples: usize,
    /// Bytes per sample
    pub unit_size: usize,
}

impl SampleChunk {
    /// Wrap an already laid out payload
    pub fn new(sequence: u64, start_position: u64, unit_size: usize, data: Arc<[u8]>) -> Self {
        let unit_size = unit_size.max(1);
        Self {
            num_samples: data.len() / unit_size,
            data,
            sequence,
            start_position,
            unit_size,
        }
    }

    /// Pack per-sample channel words into a chunk.
    ///
    /// Only the low `unit_size * 8` bits of each value are kept.
    pub fn from_values(sequence: u64, start_position: u64, unit_size: usize, values: &[u64]) -> Self {
        let unit_size = unit_size.clamp(1, 8);
        let mut data = Vec::with_capacity(values.len() * unit_size);
        for value in values {
            data.extend_from_slice(&value.to_le_bytes()[..unit_size]);
        }
        Self::new(sequence, start_position, unit_size, Arc::from(data))
    }

    /// Raw bytes of one sample
    #[inline]
    pub fn unit(&self, index: usize) -> &[u8] {
        let start = index * self.unit_size;
        &self.data[start..start + self.unit_size]
    }

    /// Channel word for one sample (up to 64 channels)
    #[inline]
    pub fn value(&self, index: usize) -> u64 {
        unit_value(self.unit(index))
    }

    /// O(1) bit lookup for a single channel
    #[inline]
    pub fn bit(&self, index: usize, channel: usize) -> bool {
        let byte = self.data[index * self.unit_size + channel / 8];
        (byte >> (channel % 8)) & 1 == 1
    }

    /// The position one past the last sample in this chunk
    #[inline]
    pub fn end_position(&self) -> u64 {
        self.start_position + self.num_samples as u64
    }

    pub fn is_empty(&self) -> bool {
        self.num_samples == 0
    }
}

impl fmt::Display for SampleChunk {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "SampleChunk[seq={}, start={}, samples={}, unit={}]",
            self.sequence, self.start_position, self.num_samples, self.unit_size
        )
    }
}

/// Little-endian channel word from a sample unit (first 8 bytes at most)
#[inline]
pub fn unit_value(unit: &[u8]) -> u64 {
    unit.iter()
        .take(8)
        .enumerate()
        .fold(0u64, |acc, (i, b)| acc | (u64::from(*b) << (8 * i)))
}

/// Bytes needed to hold one logic sample for `channels` channels
#[inline]
pub fn logic_unit_size(channels: usize) -> usize {
    channels.div_ceil(8).max(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_values_packs_little_endian() {
        let chunk = SampleChunk::from_values(0, 100, 2, &[0x0102, 0xFFFF, 0x8000]);
        assert_eq!(chunk.num_samples, 3);
        assert_eq!(chunk.unit(0), &[0x02, 0x01]);
        assert_eq!(chunk.value(1), 0xFFFF);
        assert_eq!(chunk.end_position(), 103);
    }

    #[test]
    fn test_bit_lookup() {
        let chunk = SampleChunk::from_values(0, 0, 2, &[0b1000_0000_0000_0101]);
        assert!(chunk.bit(0, 0));
        assert!(!chunk.bit(0, 1));
        assert!(chunk.bit(0, 2));
        assert!(chunk.bit(0, 15));
        assert!(!chunk.bit(0, 14));
    }

    #[test]
    fn test_logic_unit_size() {
        assert_eq!(logic_unit_size(1), 1);
        assert_eq!(logic_unit_size(8), 1);
        assert_eq!(logic_unit_size(9), 2);
        assert_eq!(logic_unit_size(16), 2);
        assert_eq!(logic_unit_size(32), 4);
    }
}
