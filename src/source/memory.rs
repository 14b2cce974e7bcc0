//! In-memory sample source
//!
//! Replays a prepared vector of channel words as chunks. Used for pattern
//! generation, replaying decoded files, and tests. It can pretend to be a
//! streaming-only device and can pace its output to mimic a live stream.

use super::{Capabilities, Channel, DeviceInfo, DeviceMode, SampleSource, SourceConfig, SourceError};
use crate::runtime::SampleChunk;
use std::time::Duration;
use tracing::debug;

pub struct MemorySource {
    name: String,
    info: DeviceInfo,
    values: Vec<u64>,
    chunk_samples: usize,
    limit: usize,
    position: usize,
    sequence: u64,
    opened: bool,
    streaming_only: bool,
    max_sample_depth: u64,
    interval: Option<Duration>,
    fail_after: Option<u64>,
}

impl MemorySource {
    /// A logic source with `channels` digital channels replaying `values`.
    pub fn new(channels: usize, samplerate_hz: u64, values: Vec<u64>) -> Self {
        Self {
            name: "memory_source".to_string(),
            info: DeviceInfo {
                mode: DeviceMode::Logic,
                samplerate_hz,
                channels: (0..channels).map(Channel::digital).collect(),
            },
            limit: values.len(),
            values,
            chunk_samples: 4096,
            position: 0,
            sequence: 0,
            opened: false,
            streaming_only: false,
            max_sample_depth: 1 << 32,
            interval: None,
            fail_after: None,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Replace the channel list (e.g. to disable or rename channels)
    pub fn with_channels(mut self, channels: Vec<Channel>) -> Self {
        self.info.channels = channels;
        self
    }

    /// Acquisition mode; analog and DSO values carry one byte per channel
    pub fn with_mode(mut self, mode: DeviceMode) -> Self {
        self.info.mode = mode;
        self
    }

    /// Report no buffered random access, like a pure streaming device
    pub fn streaming_only(mut self) -> Self {
        self.streaming_only = true;
        self
    }

    pub fn with_max_sample_depth(mut self, depth: u64) -> Self {
        self.max_sample_depth = depth;
        self
    }

    /// Sleep this long before each chunk
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = Some(interval);
        self
    }

    /// Fail with a device error after this many chunks
    pub fn fail_after(mut self, chunks: u64) -> Self {
        self.fail_after = Some(chunks);
        self
    }
}

impl SampleSource for MemorySource {
    fn name(&self) -> &str {
        &self.name
    }

    fn open(&mut self, config: &SourceConfig) -> Result<(), SourceError> {
        self.chunk_samples = config.chunk_samples.max(1);
        self.limit = config
            .limit_samples
            .map_or(self.values.len(), |l| (l as usize).min(self.values.len()));
        self.position = 0;
        self.sequence = 0;
        self.opened = true;
        debug!(
            "[{}] Opened: {} samples in chunks of {}",
            self.name, self.limit, self.chunk_samples
        );
        Ok(())
    }

    fn read_chunk(&mut self) -> Result<SampleChunk, SourceError> {
        if !self.opened {
            return Err(SourceError::NotOpen);
        }
        if let Some(limit) = self.fail_after
            && self.sequence >= limit
        {
            return Err(SourceError::Device(format!(
                "{} disconnected after {} chunks",
                self.name, limit
            )));
        }
        if self.position >= self.limit {
            return Err(SourceError::EndOfStream);
        }
        if let Some(interval) = self.interval {
            std::thread::sleep(interval);
        }

        let end = (self.position + self.chunk_samples).min(self.limit);
        let chunk = SampleChunk::from_values(
            self.sequence,
            self.position as u64,
            self.info.unit_size(),
            &self.values[self.position..end],
        );
        self.position = end;
        self.sequence += 1;
        Ok(chunk)
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            supports_random_access: !self.streaming_only,
            max_sample_depth: self.max_sample_depth,
            channel_count: self.info.channels.len(),
        }
    }

    fn device_info(&self) -> DeviceInfo {
        self.info.clone()
    }

    fn close(&mut self) {
        self.opened = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drain(source: &mut MemorySource) -> Vec<SampleChunk> {
        let mut chunks = Vec::new();
        loop {
            match source.read_chunk() {
                Ok(chunk) => chunks.push(chunk),
                Err(SourceError::EndOfStream) => break,
                Err(e) => panic!("unexpected error: {e}"),
            }
        }
        chunks
    }

    #[test]
    fn test_chunks_cover_all_samples() {
        let mut source = MemorySource::new(4, 1_000, (0..10).collect());
        source
            .open(&SourceConfig { chunk_samples: 4, limit_samples: None })
            .unwrap();
        let chunks = drain(&mut source);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[2].start_position, 8);
        assert_eq!(chunks[2].num_samples, 2);
        assert_eq!(chunks[1].sequence, 1);
        assert_eq!(chunks[1].value(0), 4);
    }

    #[test]
    fn test_limit_samples() {
        let mut source = MemorySource::new(1, 1_000, vec![1; 100]);
        source
            .open(&SourceConfig { chunk_samples: 64, limit_samples: Some(70) })
            .unwrap();
        let total: usize = drain(&mut source).iter().map(|c| c.num_samples).sum();
        assert_eq!(total, 70);
    }

    #[test]
    fn test_read_before_open() {
        let mut source = MemorySource::new(1, 1_000, vec![0; 4]);
        assert!(matches!(source.read_chunk(), Err(SourceError::NotOpen)));
    }

    #[test]
    fn test_device_failure() {
        let mut source = MemorySource::new(1, 1_000, vec![0; 100]).fail_after(1);
        source
            .open(&SourceConfig { chunk_samples: 10, limit_samples: None })
            .unwrap();
        assert!(source.read_chunk().is_ok());
        assert!(matches!(source.read_chunk(), Err(SourceError::Device(_))));
    }

    #[test]
    fn test_streaming_only_capability() {
        let source = MemorySource::new(2, 1_000, vec![]).streaming_only();
        assert!(!source.capabilities().supports_random_access);
        assert_eq!(source.capabilities().channel_count, 2);
    }
}
