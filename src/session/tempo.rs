use crate::constants::{BASE_BPM, MAX_BPM};
use crate::scoring::next_tempo;

use super::timer::Ticker;

pub const BEATS_PER_BAR: u32 = 4;
const SMOOTHING: f64 = 0.1;
const SNAP_DISTANCE: f64 = 0.1;

pub fn beat_interval_ms(bpm: f64) -> u64 {
    (60_000.0 / bpm.max(1.0)).round() as u64
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Pulse {
    Beat { count: u32 },
    Bar { count: u32 },
}

/// Metronome driving the Flow visuals.
///
/// The playing bpm eases toward the target on every beat instead of jumping.
#[derive(Clone, Debug)]
pub struct TempoManager {
    current_bpm: f64,
    target_bpm: f64,
    beat_count: u32,
    bar_count: u32,
    interval_ms: u64,
    ticker: Ticker,
}

impl Default for TempoManager {
    fn default() -> Self {
        Self::new()
    }
}

impl TempoManager {
    pub fn new() -> Self {
        let bpm = f64::from(BASE_BPM);
        Self {
            current_bpm: bpm,
            target_bpm: bpm,
            beat_count: 0,
            bar_count: 0,
            interval_ms: beat_interval_ms(bpm),
            ticker: Ticker::new(beat_interval_ms(bpm)),
        }
    }

    pub fn current_bpm(&self) -> f64 {
        self.current_bpm
    }

    pub fn target_bpm(&self) -> f64 {
        self.target_bpm
    }

    pub fn beat_count(&self) -> u32 {
        self.beat_count
    }

    pub fn bar_count(&self) -> u32 {
        self.bar_count
    }

    pub fn is_running(&self) -> bool {
        self.ticker.is_running()
    }

    pub fn start(&mut self, now_ms: u64) {
        self.beat_count = 0;
        self.bar_count = 0;
        self.interval_ms = beat_interval_ms(self.current_bpm);
        self.ticker = Ticker::new(self.interval_ms);
        self.ticker.start(now_ms);
    }

    pub fn stop(&mut self) {
        self.ticker.stop();
    }

    pub fn set_tempo(&mut self, bpm: u32) {
        self.target_bpm = f64::from(bpm.clamp(BASE_BPM, MAX_BPM));
    }

    pub fn increase(&mut self) {
        self.set_tempo(next_tempo(self.target_bpm.round() as u32, true));
    }

    pub fn reset(&mut self) {
        self.set_tempo(next_tempo(self.target_bpm.round() as u32, false));
    }

    /// Emits the beats and bars due at `now_ms`.
    pub fn tick(&mut self, now_ms: u64) -> Vec<Pulse> {
        let mut pulses = Vec::new();
        for _ in 0..self.ticker.poll(now_ms) {
            self.smooth();
            self.beat_count += 1;
            pulses.push(Pulse::Beat {
                count: self.beat_count,
            });
            if self.beat_count % BEATS_PER_BAR == 0 {
                self.bar_count += 1;
                pulses.push(Pulse::Bar {
                    count: self.bar_count,
                });
            }
        }
        let interval = beat_interval_ms(self.current_bpm);
        if !pulses.is_empty() && interval != self.interval_ms {
            self.reschedule(now_ms, interval);
        }
        pulses
    }

    fn smooth(&mut self) {
        let diff = self.target_bpm - self.current_bpm;
        if diff.abs() > SNAP_DISTANCE {
            self.current_bpm += diff * SMOOTHING;
        } else {
            self.current_bpm = self.target_bpm;
        }
    }

    fn reschedule(&mut self, now_ms: u64, interval: u64) {
        let running = self.ticker.is_running();
        self.interval_ms = interval;
        self.ticker = Ticker::new(interval);
        if running {
            self.ticker.start(now_ms);
        }
    }
}
