//! Run-length encoding of sample units
//!
//! A run is one sample unit (all channels of one sample) plus the number of
//! consecutive samples holding it. Encoding is incremental, so runs continue
//! across chunk boundaries and chunking never changes the result.

use crate::runtime::unit_value;

/// Run-length encoded sample stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RleData {
    unit_size: usize,
    /// One unit per run
    values: Vec<u8>,
    /// Exclusive end sample index of each run (cumulative)
    ends: Vec<u64>,
}

impl RleData {
    pub fn new(unit_size: usize) -> Self {
        Self {
            unit_size: unit_size.max(1),
            values: Vec::new(),
            ends: Vec::new(),
        }
    }

    /// Encode a raw sample-major byte stream
    pub fn compress(data: &[u8], unit_size: usize) -> Self {
        let mut rle = Self::new(unit_size);
        rle.push_units(data);
        rle
    }

    /// Expand back to the raw byte stream
    pub fn decompress(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.sample_count() as usize * self.unit_size);
        self.decompress_into(&mut out);
        out
    }

    pub fn decompress_into(&self, out: &mut Vec<u8>) {
        let mut start = 0u64;
        for (run, end) in self.ends.iter().enumerate() {
            let unit = self.run_unit(run);
            for _ in start..*end {
                out.extend_from_slice(unit);
            }
            start = *end;
        }
    }

    /// Append raw units; a trailing partial unit is ignored
    pub fn push_units(&mut self, data: &[u8]) {
        for unit in data.chunks_exact(self.unit_size) {
            self.push_run(unit, 1);
        }
    }

    /// Append `length` copies of `unit`, merging with the last run when equal
    pub fn push_run(&mut self, unit: &[u8], length: u64) {
        if length == 0 || unit.len() != self.unit_size {
            return;
        }
        let end = self.sample_count() + length;
        if let Some(last) = self.ends.len().checked_sub(1)
            && self.run_unit(last) == unit
        {
            self.ends[last] = end;
            return;
        }
        self.values.extend_from_slice(unit);
        self.ends.push(end);
    }

    /// Append all runs of another stream
    pub fn extend(&mut self, other: &RleData) {
        for (unit, length) in other.runs() {
            self.push_run(unit, length);
        }
    }

    /// Iterate `(unit, length)` pairs
    pub fn runs(&self) -> impl Iterator<Item = (&[u8], u64)> + '_ {
        let mut start = 0u64;
        self.ends.iter().enumerate().map(move |(run, end)| {
            let length = end - start;
            start = *end;
            (self.run_unit(run), length)
        })
    }

    pub fn unit_size(&self) -> usize {
        self.unit_size
    }

    pub fn sample_count(&self) -> u64 {
        self.ends.last().copied().unwrap_or(0)
    }

    pub fn run_count(&self) -> usize {
        self.ends.len()
    }

    /// Bytes held by the encoded form
    pub fn encoded_bytes(&self) -> usize {
        self.values.len() + self.ends.len() * std::mem::size_of::<u64>()
    }

    /// Unit at sample `index`, found by binary search over run ends
    pub fn unit_at(&self, index: u64) -> Option<&[u8]> {
        if index >= self.sample_count() {
            return None;
        }
        let run = self.ends.partition_point(|end| *end <= index);
        Some(self.run_unit(run))
    }

    pub fn value_at(&self, index: u64) -> Option<u64> {
        self.unit_at(index).map(unit_value)
    }

    /// Start index and unit of every run
    pub(crate) fn run_starts(&self) -> impl Iterator<Item = (u64, &[u8])> + '_ {
        std::iter::once(0)
            .chain(self.ends.iter().copied())
            .zip(0..self.ends.len())
            .map(move |(start, run)| (start, self.run_unit(run)))
    }

    fn run_unit(&self, run: usize) -> &[u8] {
        &self.values[run * self.unit_size..(run + 1) * self.unit_size]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip_is_byte_exact() {
        let data: Vec<u8> = vec![1, 0, 1, 0, 1, 0, 2, 0, 2, 0, 1, 0, 0xFF, 0xFF];
        let rle = RleData::compress(&data, 2);
        assert_eq!(rle.run_count(), 4);
        assert_eq!(rle.sample_count(), 7);
        assert_eq!(rle.decompress(), data);
    }

    #[test]
    fn test_runs_continue_across_pushes() {
        let mut rle = RleData::new(1);
        rle.push_units(&[7, 7]);
        rle.push_units(&[7, 8]);
        assert_eq!(rle.run_count(), 2);
        let runs: Vec<(Vec<u8>, u64)> = rle.runs().map(|(u, n)| (u.to_vec(), n)).collect();
        assert_eq!(runs, vec![(vec![7], 3), (vec![8], 1)]);
    }

    #[test]
    fn test_random_access() {
        let rle = RleData::compress(&[5, 5, 5, 9, 4, 4], 1);
        assert_eq!(rle.value_at(0), Some(5));
        assert_eq!(rle.value_at(2), Some(5));
        assert_eq!(rle.value_at(3), Some(9));
        assert_eq!(rle.value_at(5), Some(4));
        assert_eq!(rle.value_at(6), None);
        let starts: Vec<u64> = rle.run_starts().map(|(s, _)| s).collect();
        assert_eq!(starts, vec![0, 3, 4]);
    }

    #[test]
    fn test_extend_merges_boundary_run() {
        let mut a = RleData::compress(&[1, 2, 2], 1);
        let b = RleData::compress(&[2, 3], 1);
        a.extend(&b);
        assert_eq!(a.run_count(), 3);
        assert_eq!(a.decompress(), vec![1, 2, 2, 2, 3]);
    }

    #[test]
    fn test_empty_stream() {
        let rle = RleData::compress(&[], 4);
        assert_eq!(rle.sample_count(), 0);
        assert!(rle.decompress().is_empty());
    }
}
