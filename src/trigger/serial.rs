//! Serial (clocked shift-register) trigger
//!
//! On each qualifying clock edge the data channel is shifted MSB-first into a
//! `bits`-wide register, which is compared against `value` under `mask` once
//! it holds `bits` samples. Nothing is evaluated between qualifying edges.

use super::TriggerError;
use super::stage::TriggerStage;
use crate::runtime::SampleChunk;
use serde::{Deserialize, Serialize};
use tracing::trace;

/// Clock edge that clocks data into the shift register
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClockEdge {
    #[default]
    Rising,
    Falling,
}

/// Serial trigger settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SerialTrigger {
    pub clock: usize,
    pub data: usize,
    #[serde(default)]
    pub edge: ClockEdge,
    /// Register width, 1..=64
    pub bits: u8,
    pub value: u64,
    /// Bits of the register that take part in the compare
    #[serde(default = "full_mask")]
    pub mask: u64,
    /// The shifter only runs once this condition has matched
    #[serde(default)]
    pub start: Option<TriggerStage>,
    /// Clears the shifter and waits for `start` again
    #[serde(default)]
    pub stop: Option<TriggerStage>,
}

fn full_mask() -> u64 {
    u64::MAX
}

impl SerialTrigger {
    pub fn new(clock: usize, data: usize, bits: u8, value: u64) -> Self {
        Self {
            clock,
            data,
            edge: ClockEdge::Rising,
            bits,
            value,
            mask: u64::MAX,
            start: None,
            stop: None,
        }
    }

    pub fn with_edge(mut self, edge: ClockEdge) -> Self {
        self.edge = edge;
        self
    }

    pub fn with_mask(mut self, mask: u64) -> Self {
        self.mask = mask;
        self
    }

    pub fn with_start(mut self, start: TriggerStage) -> Self {
        self.start = Some(start);
        self
    }

    pub fn with_stop(mut self, stop: TriggerStage) -> Self {
        self.stop = Some(stop);
        self
    }

    pub fn validate(&self, channel_count: usize) -> Result<(), TriggerError> {
        if self.bits == 0 || self.bits > 64 {
            return Err(TriggerError::InvalidBits(self.bits));
        }
        // Samples are evaluated as 64-bit channel words
        for channel in [self.clock, self.data] {
            if channel >= channel_count || channel >= 64 {
                return Err(TriggerError::ChannelOutOfRange { channel, channels: channel_count });
            }
        }
        for stage in self.start.iter().chain(self.stop.iter()) {
            if let Some(channel) = stage.pattern.highest_channel()
                && channel >= channel_count
            {
                return Err(TriggerError::ChannelOutOfRange { channel, channels: channel_count });
            }
        }
        Ok(())
    }

    fn register_mask(&self) -> u64 {
        if self.bits >= 64 { u64::MAX } else { (1u64 << self.bits) - 1 }
    }
}

/// Running state of a serial trigger
#[derive(Debug, Clone)]
pub(crate) struct SerialMatcher {
    config: SerialTrigger,
    armed: bool,
    register: u64,
    collected: u8,
    evaluations: u64,
}

impl SerialMatcher {
    pub(crate) fn new(config: SerialTrigger) -> Self {
        let armed = config.start.is_none();
        Self {
            config,
            armed,
            register: 0,
            collected: 0,
            evaluations: 0,
        }
    }

    pub(crate) fn reset(&mut self) {
        self.armed = self.config.start.is_none();
        self.register = 0;
        self.collected = 0;
        self.evaluations = 0;
    }

    /// Qualifying clock edges seen while armed
    pub(crate) fn evaluations(&self) -> u64 {
        self.evaluations
    }

    /// Process one sample; returns true when the register matches
    #[inline]
    pub(crate) fn step(&mut self, chunk: &SampleChunk, index: usize, prev: Option<u64>) -> bool {
        let cur = chunk.value(index);

        if let Some(stop) = &self.config.stop
            && stop.matches(prev, cur)
        {
            self.register = 0;
            self.collected = 0;
            self.armed = self.config.start.is_none();
        }

        if !self.armed {
            if let Some(start) = &self.config.start
                && start.matches(prev, cur)
            {
                trace!("serial trigger armed at {}", chunk.start_position + index as u64);
                self.armed = true;
            }
            return false;
        }

        let Some(prev) = prev else {
            return false;
        };
        let clock_before = level(prev, self.config.clock);
        let clock_now = level(cur, self.config.clock);
        let qualifying = match self.config.edge {
            ClockEdge::Rising => !clock_before && clock_now,
            ClockEdge::Falling => clock_before && !clock_now,
        };
        if !qualifying {
            return false;
        }

        self.evaluations += 1;
        let bit = u64::from(level(cur, self.config.data));
        self.register = ((self.register << 1) | bit) & self.config.register_mask();
        self.collected = self.collected.saturating_add(1).min(self.config.bits);

        self.collected == self.config.bits
            && (self.register & self.config.mask) == (self.config.value & self.config.mask)
    }
}

/// Level of `channel` in a channel word; channels past the word read low
#[inline]
fn level(word: u64, channel: usize) -> bool {
    u32::try_from(channel)
        .ok()
        .and_then(|shift| word.checked_shr(shift))
        .is_some_and(|shifted| shifted & 1 == 1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    /// Clock on ch0, data on ch1: each bit is a low/high clock pair with data held
    fn clocked(bits: &[bool]) -> Vec<u64> {
        let mut out = vec![0];
        for bit in bits {
            let d = u64::from(*bit) << 1;
            out.push(d);
            out.push(d | 1);
        }
        out
    }

    fn run(matcher: &mut SerialMatcher, values: &[u64]) -> Option<u64> {
        let chunk = SampleChunk::from_values(0, 0, 1, values);
        let mut prev = None;
        for i in 0..chunk.num_samples {
            if matcher.step(&chunk, i, prev) {
                return Some(i as u64);
            }
            prev = Some(chunk.value(i));
        }
        None
    }

    #[test]
    fn test_matches_after_full_register() {
        let mut m = SerialMatcher::new(SerialTrigger::new(0, 1, 4, 0b1011));
        let values = clocked(&[true, false, true, true]);
        assert_eq!(run(&mut m, &values), Some(values.len() as u64 - 1));
        assert_eq!(m.evaluations(), 4);
    }

    #[test]
    fn test_mask_ignores_bits() {
        let mut m = SerialMatcher::new(SerialTrigger::new(0, 1, 4, 0b1000).with_mask(0b1000));
        assert!(run(&mut m, &clocked(&[true, true, true, true])).is_some());
    }

    #[test]
    fn test_falling_edge_clock() {
        let mut m = SerialMatcher::new(SerialTrigger::new(0, 1, 2, 0b11).with_edge(ClockEdge::Falling));
        // data held high, clock toggles: falling edges at samples 3 and 5
        let values = [0b10, 0b11, 0b11, 0b10, 0b11, 0b10];
        assert_eq!(run(&mut m, &values), Some(5));
        assert_eq!(m.evaluations(), 2);
    }

    #[test]
    fn test_start_condition_gates_shifter() {
        // ch2 high arms the shifter
        let start = TriggerStage::parse("1 X X").unwrap();
        let mut m = SerialMatcher::new(SerialTrigger::new(0, 1, 2, 0b11).with_start(start));
        let mut values = clocked(&[true, true]);
        assert_eq!(run(&mut m, &values), None);
        assert_eq!(m.evaluations(), 0);

        m.reset();
        values.insert(1, 0b100);
        assert_eq!(run(&mut m, &values), Some(values.len() as u64 - 1));
    }

    #[test]
    fn test_validate_rejects_bad_width_and_channels() {
        assert!(matches!(
            SerialTrigger::new(0, 1, 0, 0).validate(4),
            Err(TriggerError::InvalidBits(0))
        ));
        assert!(matches!(
            SerialTrigger::new(0, 9, 8, 0).validate(4),
            Err(TriggerError::ChannelOutOfRange { channel: 9, channels: 4 })
        ));
        assert!(SerialTrigger::new(0, 1, 64, 0).validate(2).is_ok());
    }

    #[test]
    fn test_channels_past_word_rejected_and_read_low() {
        assert!(matches!(
            SerialTrigger::new(70, 1, 8, 0xFF).validate(72),
            Err(TriggerError::ChannelOutOfRange { channel: 70, channels: 72 })
        ));
        assert!(matches!(
            SerialTrigger::new(0, 64, 8, 0xFF).validate(72),
            Err(TriggerError::ChannelOutOfRange { channel: 64, .. })
        ));

        // An unvalidated matcher on a wide device never sees a clock edge
        let mut m = SerialMatcher::new(SerialTrigger::new(70, 1, 8, 0xFF));
        let chunk = SampleChunk::new(0, 0, 9, Arc::from(vec![0xFFu8; 9 * 4]));
        let mut prev = None;
        for i in 0..chunk.num_samples {
            assert!(!m.step(&chunk, i, prev));
            prev = Some(chunk.value(i));
        }
        assert_eq!(m.evaluations(), 0);
    }
}
