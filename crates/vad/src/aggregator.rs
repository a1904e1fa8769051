//! Three independent hysteresis-smoothing detectors (`turn`, `ipu`,
//! `fast`) built on top of per-frame classifications.

use std::collections::VecDeque;

use duet_iu::VadKind;

/// Configuration for one detector's onset/offset ring buffers, in
/// milliseconds. Recommended defaults per kind (§4.3):
/// `onset_time = 200ms` for all three; `turn_offset = 750ms`,
/// `ipu_offset = 200ms`, `fast_offset = 100ms`.
#[derive(Debug, Clone, Copy)]
pub struct DetectorConfig {
    pub onset_ms: u32,
    pub offset_ms: u32,
}

#[derive(Debug, Clone, Copy)]
pub struct VadAggregatorConfig {
    pub frame_ms: u32,
    pub prob_thresh: f32,
    pub turn: DetectorConfig,
    pub ipu: DetectorConfig,
    pub fast: DetectorConfig,
}

impl Default for VadAggregatorConfig {
    fn default() -> Self {
        Self {
            frame_ms: 20,
            prob_thresh: 0.9,
            turn: DetectorConfig {
                onset_ms: 200,
                offset_ms: 750,
            },
            ipu: DetectorConfig {
                onset_ms: 200,
                offset_ms: 200,
            },
            fast: DetectorConfig {
                onset_ms: 200,
                offset_ms: 100,
            },
        }
    }
}

/// A smoothed activation edge, carrying enough to become a `VadStateIU` and
/// to fire its corresponding `vad_<kind>_change` event.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VadEdge {
    pub kind: VadKind,
    pub active: bool,
    pub probability: f32,
}

struct RingMean {
    buffer: VecDeque<u8>,
    capacity: usize,
    sum: u32,
}

impl RingMean {
    fn new(capacity: usize) -> Self {
        Self {
            buffer: VecDeque::with_capacity(capacity.max(1)),
            capacity: capacity.max(1),
            sum: 0,
        }
    }

    /// Push a new sample, evicting the oldest if full, and return the
    /// current mean.
    fn push(&mut self, sample: u8) -> f32 {
        self.buffer.push_back(sample);
        self.sum += sample as u32;
        if self.buffer.len() > self.capacity {
            if let Some(evicted) = self.buffer.pop_front() {
                self.sum -= evicted as u32;
            }
        }
        self.sum as f32 / self.buffer.len() as f32
    }
}

struct Detector {
    kind: VadKind,
    onset: RingMean,
    offset: RingMean,
    active: bool,
}

impl Detector {
    fn new(kind: VadKind, config: DetectorConfig, frame_ms: u32) -> Self {
        let frame_ms = frame_ms.max(1);
        let onset_len = (config.onset_ms as f32 / frame_ms as f32).ceil() as usize;
        let offset_len = (config.offset_ms as f32 / frame_ms as f32).ceil() as usize;
        Self {
            kind,
            onset: RingMean::new(onset_len.max(1)),
            offset: RingMean::new(offset_len.max(1)),
            active: false,
        }
    }

    fn update(&mut self, is_speaking: bool, prob_thresh: f32) -> Option<VadEdge> {
        let onset_mean = self.onset.push(is_speaking as u8);
        let offset_mean = self.offset.push(!is_speaking as u8);

        if !self.active && onset_mean >= prob_thresh {
            self.active = true;
            return Some(VadEdge {
                kind: self.kind,
                active: true,
                probability: onset_mean,
            });
        }
        if self.active && offset_mean >= prob_thresh {
            self.active = false;
            return Some(VadEdge {
                kind: self.kind,
                active: false,
                probability: offset_mean,
            });
        }
        None
    }
}

/// Maintains the `turn`/`ipu`/`fast` detectors and turns per-frame
/// classifications into smoothed activation edges.
pub struct VadAggregator {
    turn: Detector,
    ipu: Detector,
    fast: Detector,
    prob_thresh: f32,
}

impl VadAggregator {
    pub fn new(config: VadAggregatorConfig) -> Self {
        Self {
            turn: Detector::new(VadKind::Turn, config.turn, config.frame_ms),
            ipu: Detector::new(VadKind::Ipu, config.ipu, config.frame_ms),
            fast: Detector::new(VadKind::Fast, config.fast, config.frame_ms),
            prob_thresh: config.prob_thresh,
        }
    }

    /// Feed one frame classification through all three detectors. At most
    /// one edge per detector can fire per frame.
    pub fn process_frame(&mut self, is_speaking: bool) -> Vec<VadEdge> {
        [
            self.turn.update(is_speaking, self.prob_thresh),
            self.ipu.update(is_speaking, self.prob_thresh),
            self.fast.update(is_speaking, self.prob_thresh),
        ]
        .into_iter()
        .flatten()
        .collect()
    }

    pub fn turn_active(&self) -> bool {
        self.turn.active
    }

    pub fn ipu_active(&self) -> bool {
        self.ipu.active
    }

    pub fn fast_active(&self) -> bool {
        self.fast.active
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config_fast_detector() -> VadAggregatorConfig {
        VadAggregatorConfig {
            frame_ms: 20,
            prob_thresh: 0.9,
            turn: DetectorConfig {
                onset_ms: 40,
                offset_ms: 40,
            },
            ipu: DetectorConfig {
                onset_ms: 40,
                offset_ms: 40,
            },
            fast: DetectorConfig {
                onset_ms: 40,
                offset_ms: 40,
            },
        }
    }

    #[test]
    fn stays_inactive_below_threshold() {
        let mut agg = VadAggregator::new(config_fast_detector());
        let edges = agg.process_frame(true);
        assert!(edges.is_empty());
        assert!(!agg.turn_active());
    }

    #[test]
    fn activates_once_onset_mean_crosses_threshold() {
        let mut agg = VadAggregator::new(config_fast_detector());
        agg.process_frame(true);
        let edges = agg.process_frame(true);
        assert!(edges.iter().any(|e| e.kind == VadKind::Turn && e.active));
        assert!(agg.turn_active());
    }

    #[test]
    fn deactivates_once_offset_mean_crosses_threshold() {
        let mut agg = VadAggregator::new(config_fast_detector());
        agg.process_frame(true);
        agg.process_frame(true);
        assert!(agg.turn_active());

        agg.process_frame(false);
        let edges = agg.process_frame(false);
        assert!(edges.iter().any(|e| e.kind == VadKind::Turn && !e.active));
        assert!(!agg.turn_active());
    }

    #[test]
    fn edges_alternate_no_double_activation() {
        let mut agg = VadAggregator::new(config_fast_detector());
        agg.process_frame(true);
        let first_activation = agg.process_frame(true);
        assert!(first_activation.iter().any(|e| e.active));
        // Staying speaking produces no further "active=true" edges.
        let repeat = agg.process_frame(true);
        assert!(!repeat.iter().any(|e| e.kind == VadKind::Turn));
    }

    #[test]
    fn detectors_are_independent() {
        let mut config = config_fast_detector();
        config.fast.onset_ms = 20;
        let mut agg = VadAggregator::new(config);
        let edges = agg.process_frame(true);
        assert!(edges.iter().any(|e| e.kind == VadKind::Fast && e.active));
        assert!(!edges.iter().any(|e| e.kind == VadKind::Turn));
    }
}
