//! Sample-by-sample trigger evaluation on the consumer path

use super::serial::SerialMatcher;
use super::stage::{StageKind, TriggerStage};
use super::{TriggerConfig, TriggerError};
use crate::runtime::SampleChunk;
use tracing::{debug, info, trace};

/// Outcome of feeding one chunk
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchResult {
    NoMatch,
    /// The chunk ended on a later stage than it started on. Carries the
    /// stage in effect after the last sample, so a contiguous break back to
    /// stage 0 inside the chunk is never reported as progress.
    StageAdvanced(usize),
    /// Global sample offset where the final stage completed
    Triggered(u64),
}

enum Plan {
    Stages {
        stages: Vec<TriggerStage>,
        current: usize,
        counter: u32,
    },
    Serial(SerialMatcher),
}

/// Evaluates a trigger configuration against a stream of chunks
///
/// The previous sample is carried across chunk boundaries so edge terms
/// work regardless of chunk sizing. Once triggered the matcher ignores
/// further input until [`TriggerMatcher::reset`].
pub struct TriggerMatcher {
    plan: Plan,
    prev: Option<u64>,
    triggered_at: Option<u64>,
    evaluations: u64,
}

impl TriggerMatcher {
    pub fn new(config: &TriggerConfig) -> Result<Self, TriggerError> {
        let plan = match config {
            TriggerConfig::Serial(serial) => Plan::Serial(SerialMatcher::new(serial.clone())),
            _ => {
                let stages = config.stages();
                if stages.is_empty() {
                    return Err(TriggerError::NoStages);
                }
                if let Some(stage) = stages.iter().position(|s| s.count == 0) {
                    return Err(TriggerError::ZeroCount { stage });
                }
                Plan::Stages { stages, current: 0, counter: 0 }
            }
        };
        Ok(Self {
            plan,
            prev: None,
            triggered_at: None,
            evaluations: 0,
        })
    }

    /// Start over as if no sample had been seen
    pub fn reset(&mut self) {
        self.prev = None;
        self.triggered_at = None;
        self.evaluations = 0;
        match &mut self.plan {
            Plan::Stages { current, counter, .. } => {
                *current = 0;
                *counter = 0;
            }
            Plan::Serial(serial) => serial.reset(),
        }
    }

    pub fn is_triggered(&self) -> bool {
        self.triggered_at.is_some()
    }

    pub fn trigger_position(&self) -> Option<u64> {
        self.triggered_at
    }

    /// Stage currently being matched (always 0 for serial triggers)
    pub fn current_stage(&self) -> usize {
        match &self.plan {
            Plan::Stages { current, .. } => *current,
            Plan::Serial(_) => 0,
        }
    }

    /// Number of match evaluations performed. For serial triggers this is
    /// the number of qualifying clock edges.
    pub fn evaluations(&self) -> u64 {
        match &self.plan {
            Plan::Stages { .. } => self.evaluations,
            Plan::Serial(serial) => serial.evaluations(),
        }
    }

    /// Evaluate every sample of `chunk` in order
    pub fn feed(&mut self, chunk: &SampleChunk) -> MatchResult {
        if self.triggered_at.is_some() {
            trace!("trigger already fired, ignoring {}", chunk);
            return MatchResult::NoMatch;
        }

        let start_stage = self.current_stage();

        for index in 0..chunk.num_samples {
            let position = chunk.start_position + index as u64;
            let value = chunk.value(index);
            let prev = self.prev;
            self.prev = Some(value);

            let fired = match &mut self.plan {
                Plan::Serial(serial) => serial.step(chunk, index, prev),
                Plan::Stages { stages, current, counter } => {
                    self.evaluations += 1;
                    // A completed stage hands the same sample to the next one
                    loop {
                        let stage = &stages[*current];
                        if stage.matches(prev, value) {
                            *counter += 1;
                            if *counter >= stage.count {
                                *current += 1;
                                *counter = 0;
                                if *current == stages.len() {
                                    break true;
                                }
                                debug!("Trigger stage {} complete at sample {}", *current - 1, position);
                                continue;
                            }
                        } else if stage.kind == StageKind::Contiguous && *counter > 0 {
                            trace!("Contiguous run broken at sample {}, back to stage 0", position);
                            *counter = 0;
                            *current = 0;
                            continue;
                        }
                        break false;
                    }
                }
            };

            if fired {
                info!("Triggered at sample {}", position);
                self.triggered_at = Some(position);
                return MatchResult::Triggered(position);
            }
        }

        let stage = self.current_stage();
        if stage > start_stage {
            MatchResult::StageAdvanced(stage)
        } else {
            MatchResult::NoMatch
        }
    }
}
