//! Immutable capture window handed to decoders and exporters

use super::rle::RleData;
use crate::runtime::{Edge, unit_value};
use crate::source::{Channel, ChannelKind, DeviceInfo, DeviceMode};
use std::sync::Arc;

/// Sample storage of a finished window
#[derive(Debug, Clone)]
pub enum WindowData {
    Raw(Arc<[u8]>),
    Rle(Arc<RleData>),
}

/// A completed capture: pre-trigger samples followed by post-trigger samples.
///
/// Sample indices are window-relative: index 0 is the oldest retained
/// pre-trigger sample and [`CaptureWindow::trigger_index`] is the trigger
/// sample. Cloning is cheap, the sample data is shared.
#[derive(Debug, Clone)]
pub struct CaptureWindow {
    pub info: DeviceInfo,
    pub unit_size: usize,
    data: WindowData,
    num_samples: u64,
    pre_trigger: u64,
    /// Global stream position of the trigger sample
    pub trigger_position: u64,
    /// Chunks were dropped between source and consumer
    pub overflow: bool,
    pub dropped_chunks: u64,
}

impl CaptureWindow {
    pub(crate) fn new(
        info: DeviceInfo,
        unit_size: usize,
        data: WindowData,
        pre_trigger: u64,
        trigger_position: u64,
    ) -> Self {
        let num_samples = match &data {
            WindowData::Raw(bytes) => (bytes.len() / unit_size.max(1)) as u64,
            WindowData::Rle(rle) => rle.sample_count(),
        };
        Self {
            info,
            unit_size,
            data,
            num_samples,
            pre_trigger,
            trigger_position,
            overflow: false,
            dropped_chunks: 0,
        }
    }

    /// Build a window directly from raw sample-major bytes
    pub fn from_raw(info: DeviceInfo, data: Vec<u8>, trigger_index: u64) -> Self {
        let unit_size = info.unit_size();
        Self::new(info, unit_size, WindowData::Raw(Arc::from(data)), trigger_index, trigger_index)
    }

    pub(crate) fn with_overflow(mut self, overflow: bool, dropped_chunks: u64) -> Self {
        self.overflow = overflow;
        self.dropped_chunks = dropped_chunks;
        self
    }

    pub fn num_samples(&self) -> u64 {
        self.num_samples
    }

    pub fn is_empty(&self) -> bool {
        self.num_samples == 0
    }

    /// Number of samples before the trigger sample
    pub fn pre_trigger(&self) -> u64 {
        self.pre_trigger
    }

    /// Window index of the trigger sample
    pub fn trigger_index(&self) -> u64 {
        self.pre_trigger
    }

    pub fn post_trigger(&self) -> u64 {
        self.num_samples - self.pre_trigger
    }

    pub fn mode(&self) -> DeviceMode {
        self.info.mode
    }

    pub fn samplerate_hz(&self) -> u64 {
        self.info.samplerate_hz
    }

    pub fn channels(&self) -> &[Channel] {
        &self.info.channels
    }

    /// Enabled channel with this id
    pub fn enabled_channel(&self, id: usize) -> Option<&Channel> {
        self.info.channel(id).filter(|c| c.enabled)
    }

    pub fn is_compressed(&self) -> bool {
        matches!(self.data, WindowData::Rle(_))
    }

    pub fn data(&self) -> &WindowData {
        &self.data
    }

    /// Channel word of one sample
    pub fn value(&self, index: u64) -> Option<u64> {
        if index >= self.num_samples {
            return None;
        }
        match &self.data {
            WindowData::Raw(bytes) => {
                let start = index as usize * self.unit_size;
                Some(unit_value(&bytes[start..start + self.unit_size]))
            }
            WindowData::Rle(rle) => rle.value_at(index),
        }
    }

    pub fn bit(&self, index: u64, channel: usize) -> Option<bool> {
        self.value(index).map(|v| channel < 64 && (v >> channel) & 1 == 1)
    }

    /// Raw analog reading of `channel` at `index`
    pub fn analog(&self, index: u64, channel: usize) -> Option<u8> {
        if channel >= self.unit_size || index >= self.num_samples {
            return None;
        }
        match &self.data {
            WindowData::Raw(bytes) => bytes.get(index as usize * self.unit_size + channel).copied(),
            WindowData::Rle(rle) => rle.unit_at(index).map(|u| u[channel]),
        }
    }

    /// Calibrated analog reading in volts
    pub fn volts(&self, index: u64, channel: usize) -> Option<f64> {
        let ch = self.info.channel(channel)?;
        if ch.kind != ChannelKind::Analog {
            return None;
        }
        self.analog(index, channel).map(|raw| ch.to_volts(raw))
    }

    /// Level changes of one channel: the level at index 0 followed by one
    /// entry per change.
    pub fn edges(&self, channel: usize) -> Vec<Edge> {
        let mut edges = Vec::new();
        if channel >= 64 {
            return edges;
        }
        let mut push = |value: bool, position: u64| {
            if edges.last().is_none_or(|e: &Edge| e.value != value) {
                edges.push(Edge::new(value, position));
            }
        };
        match &self.data {
            WindowData::Raw(bytes) => {
                for (i, unit) in bytes.chunks_exact(self.unit_size).enumerate() {
                    push((unit_value(unit) >> channel) & 1 == 1, i as u64);
                }
            }
            WindowData::Rle(rle) => {
                for (start, unit) in rle.run_starts() {
                    push((unit_value(unit) >> channel) & 1 == 1, start);
                }
            }
        }
        edges
    }

    /// The whole window as raw sample-major bytes
    pub fn to_bytes(&self) -> Vec<u8> {
        match &self.data {
            WindowData::Raw(bytes) => bytes.to_vec(),
            WindowData::Rle(rle) => rle.decompress(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::Calibration;

    fn logic_info(channels: usize) -> DeviceInfo {
        DeviceInfo {
            mode: DeviceMode::Logic,
            samplerate_hz: 1_000_000,
            channels: (0..channels).map(Channel::digital).collect(),
        }
    }

    #[test]
    fn test_edges_raw_and_rle_agree() {
        let bytes = vec![0b00, 0b01, 0b01, 0b11, 0b10, 0b10];
        let raw = CaptureWindow::from_raw(logic_info(2), bytes.clone(), 2);
        let rle = CaptureWindow::new(
            logic_info(2),
            1,
            WindowData::Rle(Arc::new(RleData::compress(&bytes, 1))),
            2,
            2,
        );

        let expected = vec![Edge::new(false, 0), Edge::new(true, 1), Edge::new(false, 4)];
        assert_eq!(raw.edges(0), expected);
        assert_eq!(rle.edges(0), expected);
        assert_eq!(rle.edges(1), vec![Edge::new(false, 0), Edge::new(true, 3)]);
        assert_eq!(raw.value(3), rle.value(3));
        assert_eq!(rle.to_bytes(), bytes);
        assert_eq!(raw.post_trigger(), 4);
    }

    #[test]
    fn test_analog_volts() {
        let info = DeviceInfo {
            mode: DeviceMode::Analog,
            samplerate_hz: 1_000,
            channels: vec![
                Channel::analog(0, Calibration { gain: 0.1, offset: 0.0 }),
                Channel::analog(1, Calibration { gain: 1.0, offset: -128.0 }),
            ],
        };
        let window = CaptureWindow::from_raw(info, vec![10, 128, 20, 130], 0);
        assert_eq!(window.num_samples(), 2);
        assert_eq!(window.analog(1, 1), Some(130));
        assert_eq!(window.volts(1, 1), Some(2.0));
        assert!(window.volts(0, 0).is_some_and(|v| (v - 1.0).abs() < 1e-9));
        assert_eq!(window.analog(0, 2), None);
    }

    #[test]
    fn test_out_of_range() {
        let window = CaptureWindow::from_raw(logic_info(1), vec![1], 0);
        assert_eq!(window.value(1), None);
        assert_eq!(window.bit(0, 0), Some(true));
        assert!(window.enabled_channel(0).is_some());
        assert!(window.enabled_channel(3).is_none());
    }
}
