//! Bounded capture buffer
//!
//! Before the trigger the buffer is a ring holding at most `pre_trigger`
//! samples; the oldest samples are overwritten. After
//! [`CaptureBuffer::mark_triggered`] it only appends, until `post_trigger`
//! samples are stored or the source is exhausted. Post-trigger samples may
//! be run-length encoded.

use super::rle::RleData;
use super::window::{CaptureWindow, WindowData};
use super::{BufferError, WindowSpec};
use crate::runtime::SampleChunk;
use crate::source::DeviceInfo;
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Allocation attempts for transient failures
pub const DEFAULT_ALLOC_RETRIES: u32 = 3;

/// Buffer sizing and storage options
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BufferOptions {
    pub pre_trigger: u64,
    pub post_trigger: u64,
    /// Run-length encode post-trigger samples
    pub rle: bool,
    /// Refuse windows needing more bytes than this
    pub memory_limit: Option<u64>,
    /// Attempts for allocations that fail transiently
    pub alloc_retries: u32,
}

impl BufferOptions {
    pub fn new(pre_trigger: u64, post_trigger: u64) -> Self {
        Self {
            pre_trigger,
            post_trigger,
            rle: false,
            memory_limit: None,
            alloc_retries: DEFAULT_ALLOC_RETRIES,
        }
    }

    pub fn from_window(window: &WindowSpec) -> Self {
        let (pre, post) = window.split();
        Self::new(pre, post)
    }

    pub fn with_rle(mut self, rle: bool) -> Self {
        self.rle = rle;
        self
    }

    pub fn with_memory_limit(mut self, limit: Option<u64>) -> Self {
        self.memory_limit = limit;
        self
    }

    pub fn with_alloc_retries(mut self, retries: u32) -> Self {
        self.alloc_retries = retries;
        self
    }
}

enum PostStore {
    Raw(Vec<u8>),
    Rle(RleData),
}

/// Capture storage, exclusively owned by the consumer path while capturing
pub struct CaptureBuffer {
    options: BufferOptions,
    info: DeviceInfo,
    unit_size: usize,
    ring: VecDeque<u8>,
    ring_capacity: usize,
    post: PostStore,
    post_samples: u64,
    trigger: Option<u64>,
    /// Stream position the next chunk should start at
    next_position: Option<u64>,
    /// Samples seen before the trigger, retained or not
    pre_seen: u64,
    exhausted: bool,
    overflow: bool,
    dropped_chunks: u64,
    missing_samples: u64,
}

impl CaptureBuffer {
    /// Allocate storage for the window, retrying transient failures.
    ///
    /// A window over the memory limit fails immediately.
    pub fn new(options: BufferOptions, info: DeviceInfo) -> Result<Self, BufferError> {
        let unit_size = info.unit_size();
        let ring_bytes = bytes_for(options.pre_trigger, unit_size)?;
        let post_bytes = bytes_for(options.post_trigger, unit_size)?;
        let total = ring_bytes.checked_add(post_bytes).ok_or_else(|| too_large(u64::MAX))?;

        if let Some(limit) = options.memory_limit
            && total > limit
            && !(options.rle && ring_bytes <= limit)
        {
            return Err(BufferError::Resource {
                requested_bytes: total,
                reason: format!("window needs {} bytes, limit is {}", total, limit),
                transient: false,
                attempts: 1,
            });
        }

        let attempts = options.alloc_retries.max(1);
        let mut last_error = String::new();
        for attempt in 1..=attempts {
            match Self::allocate(ring_bytes, post_bytes, options.rle, unit_size) {
                Ok((ring, post)) => {
                    debug!(
                        "Capture buffer ready: {} pre + {} post samples, {} bytes/sample{}",
                        options.pre_trigger,
                        options.post_trigger,
                        unit_size,
                        if options.rle { ", RLE" } else { "" }
                    );
                    return Ok(Self {
                        ring_capacity: ring_bytes as usize,
                        ring,
                        post,
                        options,
                        info,
                        unit_size,
                        post_samples: 0,
                        trigger: None,
                        next_position: None,
                        pre_seen: 0,
                        exhausted: false,
                        overflow: false,
                        dropped_chunks: 0,
                        missing_samples: 0,
                    });
                }
                Err(e) => {
                    warn!("Capture buffer allocation failed (attempt {}/{}): {}", attempt, attempts, e);
                    last_error = e;
                }
            }
        }

        Err(BufferError::Resource {
            requested_bytes: total,
            reason: last_error,
            transient: true,
            attempts,
        })
    }

    fn allocate(
        ring_bytes: u64,
        post_bytes: u64,
        rle: bool,
        unit_size: usize,
    ) -> Result<(VecDeque<u8>, PostStore), String> {
        let ring_bytes = usize::try_from(ring_bytes).map_err(|e| e.to_string())?;
        let mut ring = VecDeque::new();
        ring.try_reserve_exact(ring_bytes).map_err(|e| e.to_string())?;

        let post = if rle {
            PostStore::Rle(RleData::new(unit_size))
        } else {
            let post_bytes = usize::try_from(post_bytes).map_err(|e| e.to_string())?;
            let mut post = Vec::new();
            post.try_reserve_exact(post_bytes).map_err(|e| e.to_string())?;
            PostStore::Raw(post)
        };
        Ok((ring, post))
    }

    pub fn options(&self) -> &BufferOptions {
        &self.options
    }

    /// Declare the trigger sample's global position.
    ///
    /// May be called before the chunk holding `offset` is appended.
    pub fn mark_triggered(&mut self, offset: u64) -> Result<(), BufferError> {
        if let Some(existing) = self.trigger {
            return Err(BufferError::AlreadyTriggered(existing));
        }
        if let Some(next) = self.next_position
            && offset < next
        {
            return Err(BufferError::TriggerBehind { trigger: offset, next });
        }
        debug!("Capture buffer triggered at sample {}", offset);
        self.trigger = Some(offset);
        Ok(())
    }

    /// The source has no more data; a triggered buffer completes now
    pub fn mark_exhausted(&mut self) {
        self.exhausted = true;
    }

    /// Record chunks dropped before reaching the buffer
    pub fn note_overflow(&mut self, dropped_chunks: u64) {
        if dropped_chunks > self.dropped_chunks {
            self.overflow = true;
            self.dropped_chunks = dropped_chunks;
        }
    }

    pub fn append(&mut self, chunk: &SampleChunk) -> Result<(), BufferError> {
        if chunk.unit_size != self.unit_size {
            return Err(BufferError::Malformed(format!(
                "chunk {} has {} bytes per sample, expected {}",
                chunk.sequence, chunk.unit_size, self.unit_size
            )));
        }
        if self.is_complete() || chunk.is_empty() {
            return Ok(());
        }

        if let Some(next) = self.next_position
            && chunk.start_position != next
        {
            if chunk.start_position < next {
                return Err(BufferError::Malformed(format!(
                    "chunk {} starts at {} but {} samples were already stored",
                    chunk.sequence, chunk.start_position, next
                )));
            }
            let gap = chunk.start_position - next;
            debug!("Gap of {} samples before chunk {}", gap, chunk.sequence);
            self.overflow = true;
            self.missing_samples += gap;
        }
        self.next_position = Some(chunk.end_position());

        let split = match self.trigger {
            Some(t) if t <= chunk.start_position => 0,
            Some(t) => (t - chunk.start_position).min(chunk.num_samples as u64) as usize,
            None => chunk.num_samples,
        };
        let pre_bytes = &chunk.data[..split * self.unit_size];
        self.push_ring(pre_bytes);
        self.pre_seen += split as u64;

        if split < chunk.num_samples {
            let remaining = self.options.post_trigger - self.post_samples;
            let take = ((chunk.num_samples - split) as u64).min(remaining) as usize;
            let bytes = &chunk.data[split * self.unit_size..(split + take) * self.unit_size];
            self.push_post(bytes)?;
            if self.post_samples == self.options.post_trigger {
                info!("Capture window full ({} post-trigger samples)", self.post_samples);
            }
        }
        Ok(())
    }

    fn push_ring(&mut self, bytes: &[u8]) {
        if self.ring_capacity == 0 {
            return;
        }
        // Only the newest `ring_capacity` bytes can survive
        let keep = bytes.len().min(self.ring_capacity);
        let bytes = &bytes[bytes.len() - keep..];
        let overflow = (self.ring.len() + bytes.len()).saturating_sub(self.ring_capacity);
        self.ring.drain(..overflow);
        self.ring.extend(bytes);
    }

    fn push_post(&mut self, bytes: &[u8]) -> Result<(), BufferError> {
        let samples = (bytes.len() / self.unit_size) as u64;
        match &mut self.post {
            PostStore::Raw(post) => post.extend_from_slice(bytes),
            PostStore::Rle(rle) => {
                rle.push_units(bytes);
                let used = (self.ring_capacity + rle.encoded_bytes()) as u64;
                if let Some(limit) = self.options.memory_limit
                    && used > limit
                {
                    return Err(BufferError::Resource {
                        requested_bytes: used,
                        reason: format!("compressed window grew to {} bytes, limit is {}", used, limit),
                        transient: false,
                        attempts: 1,
                    });
                }
            }
        }
        self.post_samples += samples;
        Ok(())
    }

    pub fn is_triggered(&self) -> bool {
        self.trigger.is_some()
    }

    pub fn is_complete(&self) -> bool {
        self.trigger.is_some() && (self.post_samples >= self.options.post_trigger || self.exhausted)
    }

    /// Samples currently retained before the trigger
    pub fn pre_len(&self) -> u64 {
        (self.ring.len() / self.unit_size) as u64
    }

    pub fn post_len(&self) -> u64 {
        self.post_samples
    }

    pub fn overflow(&self) -> bool {
        self.overflow
    }

    /// Percentage of the post-trigger region filled
    pub fn progress(&self) -> u8 {
        if self.trigger.is_none() {
            return 0;
        }
        if self.options.post_trigger == 0 {
            return 100;
        }
        (self.post_samples.saturating_mul(100) / self.options.post_trigger).min(100) as u8
    }

    /// Samples a complete window must hold: `min(pre, samples before trigger) + post`
    pub fn expected_samples(&self) -> u64 {
        self.options.pre_trigger.min(self.pre_seen) + self.options.post_trigger
    }

    /// Verify the sample count and hand out an immutable window
    pub fn snapshot(&self) -> Result<CaptureWindow, BufferError> {
        let Some(trigger) = self.trigger else {
            return Err(BufferError::NotComplete);
        };
        if !self.is_complete() {
            return Err(BufferError::NotComplete);
        }

        let expected = self.expected_samples();
        let received = self.pre_len() + self.post_samples;
        if expected != received {
            return Err(BufferError::DataIntegrity { expected, received });
        }

        let pre = self.pre_len();
        let (front, back) = self.ring.as_slices();
        let data = match &self.post {
            PostStore::Raw(post) => {
                let mut bytes = Vec::with_capacity(self.ring.len() + post.len());
                bytes.extend_from_slice(front);
                bytes.extend_from_slice(back);
                bytes.extend_from_slice(post);
                WindowData::Raw(Arc::from(bytes))
            }
            PostStore::Rle(post) => {
                let mut rle = RleData::new(self.unit_size);
                rle.push_units(front);
                rle.push_units(back);
                rle.extend(post);
                debug!(
                    "Window compressed to {} runs ({} bytes)",
                    rle.run_count(),
                    rle.encoded_bytes()
                );
                WindowData::Rle(Arc::new(rle))
            }
        };

        if self.missing_samples > 0 {
            warn!("Window has {} samples missing from dropped chunks", self.missing_samples);
        }

        Ok(CaptureWindow::new(self.info.clone(), self.unit_size, data, pre, trigger)
            .with_overflow(self.overflow, self.dropped_chunks))
    }
}

fn bytes_for(samples: u64, unit_size: usize) -> Result<u64, BufferError> {
    samples
        .checked_mul(unit_size as u64)
        .ok_or_else(|| too_large(samples))
}

fn too_large(samples: u64) -> BufferError {
    BufferError::Resource {
        requested_bytes: u64::MAX,
        reason: format!("{} samples do not fit in memory", samples),
        transient: false,
        attempts: 1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::{Channel, DeviceMode};

    fn info() -> DeviceInfo {
        DeviceInfo {
            mode: DeviceMode::Logic,
            samplerate_hz: 1_000_000,
            channels: (0..8).map(Channel::digital).collect(),
        }
    }

    fn feed(buffer: &mut CaptureBuffer, values: &[u64], chunk: usize, trigger: Option<u64>) {
        for (i, part) in values.chunks(chunk).enumerate() {
            let c = SampleChunk::from_values(i as u64, (i * chunk) as u64, 1, part);
            if let Some(t) = trigger
                && !buffer.is_triggered()
                && t < c.end_position()
            {
                buffer.mark_triggered(t).unwrap();
            }
            buffer.append(&c).unwrap();
        }
    }

    #[test]
    fn test_ring_keeps_newest_pre_samples() {
        let mut buffer = CaptureBuffer::new(BufferOptions::new(3, 2), info()).unwrap();
        let values: Vec<u64> = (0..20).collect();
        feed(&mut buffer, &values[..10], 4, None);
        assert_eq!(buffer.pre_len(), 3);
        assert!(!buffer.is_complete());
        assert_eq!(buffer.progress(), 0);

        buffer.mark_triggered(10).unwrap();
        buffer.append(&SampleChunk::from_values(3, 10, 1, &values[10..14])).unwrap();
        assert!(buffer.is_complete());

        let window = buffer.snapshot().unwrap();
        assert_eq!(window.to_bytes(), vec![7, 8, 9, 10, 11]);
        assert_eq!(window.trigger_index(), 3);
        assert_eq!(window.trigger_position, 10);
    }

    #[test]
    fn test_trigger_inside_chunk_splits_it() {
        let mut buffer = CaptureBuffer::new(BufferOptions::new(2, 3), info()).unwrap();
        buffer.mark_triggered(5).unwrap();
        let values: Vec<u64> = (0..16).collect();
        buffer.append(&SampleChunk::from_values(0, 0, 1, &values)).unwrap();
        let window = buffer.snapshot().unwrap();
        assert_eq!(window.to_bytes(), vec![3, 4, 5, 6, 7]);
    }

    #[test]
    fn test_trigger_before_pre_filled() {
        let mut buffer = CaptureBuffer::new(BufferOptions::new(10, 2), info()).unwrap();
        feed(&mut buffer, &[1, 2, 3, 4, 5], 2, Some(2));
        let window = buffer.snapshot().unwrap();
        assert_eq!(window.pre_trigger(), 2);
        assert_eq!(window.to_bytes(), vec![1, 2, 3, 4]);
        assert_eq!(buffer.expected_samples(), 4);
    }

    #[test]
    fn test_rle_window_matches_raw() {
        let values: Vec<u64> = (0..64).map(|i| (i / 8) % 2).collect();
        let mut raw = CaptureBuffer::new(BufferOptions::new(4, 40), info()).unwrap();
        let mut rle = CaptureBuffer::new(BufferOptions::new(4, 40).with_rle(true), info()).unwrap();
        feed(&mut raw, &values, 5, Some(12));
        feed(&mut rle, &values, 7, Some(12));

        let a = raw.snapshot().unwrap();
        let b = rle.snapshot().unwrap();
        assert!(b.is_compressed());
        assert_eq!(a.to_bytes(), b.to_bytes());
        assert_eq!(a.trigger_index(), b.trigger_index());
    }

    #[test]
    fn test_memory_limit_fails_fast() {
        let options = BufferOptions::new(1000, 1000).with_memory_limit(Some(100));
        match CaptureBuffer::new(options, info()) {
            Err(BufferError::Resource { transient, attempts, .. }) => {
                assert!(!transient);
                assert_eq!(attempts, 1);
            }
            other => panic!("expected resource error, got {:?}", other.err()),
        }
    }

    #[test]
    fn test_failed_allocation_is_retried() {
        let options = BufferOptions::new(0, isize::MAX as u64 + 1).with_alloc_retries(3);
        match CaptureBuffer::new(options, info()) {
            Err(BufferError::Resource { transient, attempts, .. }) => {
                assert!(transient);
                assert_eq!(attempts, 3);
            }
            other => panic!("expected resource error, got {:?}", other.err()),
        }
    }

    #[test]
    fn test_exhausted_short_window_is_integrity_error() {
        let mut buffer = CaptureBuffer::new(BufferOptions::new(0, 10), info()).unwrap();
        buffer.mark_triggered(0).unwrap();
        buffer.append(&SampleChunk::from_values(0, 0, 1, &[1, 2, 3])).unwrap();
        assert!(!buffer.is_complete());
        buffer.mark_exhausted();
        assert!(buffer.is_complete());
        assert_eq!(
            buffer.snapshot().err(),
            Some(BufferError::DataIntegrity { expected: 10, received: 3 })
        );
    }

    #[test]
    fn test_gap_sets_overflow_flag() {
        let mut buffer = CaptureBuffer::new(BufferOptions::new(0, 4), info()).unwrap();
        buffer.mark_triggered(0).unwrap();
        buffer.append(&SampleChunk::from_values(0, 0, 1, &[1, 1])).unwrap();
        buffer.append(&SampleChunk::from_values(2, 4, 1, &[2, 2])).unwrap();
        let window = buffer.snapshot().unwrap();
        assert!(window.overflow);
        assert_eq!(window.num_samples(), 4);
    }

    #[test]
    fn test_rejects_bad_chunks_and_double_trigger() {
        let mut buffer = CaptureBuffer::new(BufferOptions::new(2, 2), info()).unwrap();
        let wide = SampleChunk::from_values(0, 0, 2, &[1]);
        assert!(matches!(buffer.append(&wide), Err(BufferError::Malformed(_))));

        buffer.append(&SampleChunk::from_values(0, 0, 1, &[1, 2, 3])).unwrap();
        assert_eq!(
            buffer.mark_triggered(1),
            Err(BufferError::TriggerBehind { trigger: 1, next: 3 })
        );
        buffer.mark_triggered(3).unwrap();
        assert_eq!(buffer.mark_triggered(4), Err(BufferError::AlreadyTriggered(3)));
        assert_eq!(buffer.snapshot().err(), Some(BufferError::NotComplete));
    }
}
