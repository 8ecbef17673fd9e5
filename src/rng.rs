use chrono::{Datelike, NaiveDate};
use rand::Rng as _;

/// Uniform `[0, 1)` source shared by every generator in the crate.
///
/// Generators take `&mut impl RandomSource` so the same code runs against the
/// reproducible sources (`Rng`, `SeededRandom`) used for versus and daily play
/// and the non-reproducible `ThreadRandom` used for solo floors.
pub trait RandomSource {
    fn next_f64(&mut self) -> f64;

    /// Inclusive integer range. Returns `min` for an empty range.
    fn int(&mut self, min: i32, max: i32) -> i32 {
        if max <= min {
            return min;
        }
        let span = (max - min + 1) as f64;
        min + (self.next_f64() * span).floor() as i32
    }

    fn bool(&mut self, probability: f64) -> bool {
        self.next_f64() < probability
    }

    fn pick_index(&mut self, len: usize) -> usize {
        if len <= 1 {
            return 0;
        }
        ((self.next_f64() * len as f64).floor() as usize).min(len - 1)
    }

    /// Fisher-Yates, walking from the back.
    fn shuffle<T>(&mut self, items: &mut [T]) {
        for i in (1..items.len()).rev() {
            let j = self.pick_index(i + 1);
            items.swap(i, j);
        }
    }
}

/// Mulberry32. Output matches the browser client bit for bit so two clients
/// derive the same path from the same seed.
#[derive(Clone, Debug)]
pub struct Rng {
    seed: u32,
}

impl Rng {
    pub fn new(seed: u32) -> Self {
        Self { seed }
    }

    pub fn next_u32(&mut self) -> u32 {
        self.seed = self.seed.wrapping_add(0x6d2b79f5);
        let mut t = self.seed;
        t = (t ^ (t >> 15)).wrapping_mul(t | 1);
        t ^= t.wrapping_add((t ^ (t >> 7)).wrapping_mul(t | 61));
        t ^ (t >> 14)
    }
}

impl RandomSource for Rng {
    fn next_f64(&mut self) -> f64 {
        self.next_u32() as f64 / 4_294_967_296.0
    }
}

const PARK_MILLER_MODULUS: i64 = 2_147_483_647;
const PARK_MILLER_MULTIPLIER: i64 = 16_807;

/// Park-Miller minimal standard LCG used for the daily pattern sequence.
#[derive(Clone, Debug)]
pub struct SeededRandom {
    seed: i64,
}

impl SeededRandom {
    pub fn new(seed: i64) -> Self {
        let mut seed = seed % PARK_MILLER_MODULUS;
        if seed <= 0 {
            seed += PARK_MILLER_MODULUS - 1;
        }
        Self { seed }
    }

    pub fn next(&mut self) -> f64 {
        self.seed = (self.seed * PARK_MILLER_MULTIPLIER) % PARK_MILLER_MODULUS;
        (self.seed - 1) as f64 / (PARK_MILLER_MODULUS - 1) as f64
    }

    pub fn next_int(&mut self, min: i32, max: i32) -> i32 {
        (self.next() * (max - min + 1) as f64).floor() as i32 + min
    }
}

impl RandomSource for SeededRandom {
    fn next_f64(&mut self) -> f64 {
        self.next()
    }

    fn int(&mut self, min: i32, max: i32) -> i32 {
        self.next_int(min, max)
    }
}

/// Non-reproducible source for solo play.
#[derive(Debug, Default)]
pub struct ThreadRandom;

impl RandomSource for ThreadRandom {
    fn next_f64(&mut self) -> f64 {
        rand::rng().random::<f64>()
    }
}

/// 32-bit string hash over UTF-16 code units (`h = h*31 + unit`).
pub fn hash_string(value: &str) -> i32 {
    value
        .encode_utf16()
        .fold(0i32, |hash, unit| {
            hash.wrapping_shl(5)
                .wrapping_sub(hash)
                .wrapping_add(unit as i32)
        })
}

pub fn daily_seed(date: NaiveDate) -> i64 {
    date.year() as i64 * 10_000 + date.month() as i64 * 100 + date.day() as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mulberry_matches_reference_sequence() {
        // First outputs of mulberry32(1) in the browser client.
        let mut rng = Rng::new(1);
        let first = rng.next_f64();
        let second = rng.next_f64();
        assert!((first - 0.627_073_940_588_161_3).abs() < 1e-12);
        assert!((second - 0.002_735_721_180_215_478).abs() < 1e-12);
    }

    #[test]
    fn same_seed_same_sequence() {
        let mut a = Rng::new(424_242);
        let mut b = Rng::new(424_242);
        for _ in 0..1_000 {
            assert_eq!(a.next_u32(), b.next_u32());
        }
    }

    #[test]
    fn park_miller_normalizes_seed_and_stays_in_range() {
        let mut zero = SeededRandom::new(0);
        let mut wrapped = SeededRandom::new(PARK_MILLER_MODULUS);
        assert_eq!(zero.next().to_bits(), wrapped.next().to_bits());

        let mut rng = SeededRandom::new(20_260_101);
        for _ in 0..10_000 {
            let value = rng.next();
            assert!((0.0..1.0).contains(&value));
            let int = rng.next_int(3, 6);
            assert!((3..=6).contains(&int));
        }
    }

    #[test]
    fn park_miller_first_step_is_multiplier_times_seed() {
        let mut rng = SeededRandom::new(1);
        let value = rng.next();
        assert_eq!(value, (16_807 - 1) as f64 / (PARK_MILLER_MODULUS - 1) as f64);
    }

    #[test]
    fn int_and_pick_index_respect_bounds() {
        let mut rng = Rng::new(7);
        for _ in 0..5_000 {
            let v = rng.int(-1, 1);
            assert!((-1..=1).contains(&v));
            assert!(rng.pick_index(4) < 4);
        }
        assert_eq!(rng.int(5, 5), 5);
        assert_eq!(rng.pick_index(0), 0);
    }

    #[test]
    fn shuffle_keeps_elements() {
        let mut rng = Rng::new(99);
        let mut items: Vec<i32> = (0..20).collect();
        rng.shuffle(&mut items);
        let mut sorted = items.clone();
        sorted.sort();
        assert_eq!(sorted, (0..20).collect::<Vec<_>>());
    }

    #[test]
    fn hash_string_matches_java_style_hash() {
        assert_eq!(hash_string(""), 0);
        assert_eq!(hash_string("a"), 97);
        assert_eq!(hash_string("ab"), 97 * 31 + 98);
        assert_eq!(hash_string("player-1"), hash_string("player-1"));
        assert_ne!(hash_string("player-1"), hash_string("player-2"));
    }

    #[test]
    fn daily_seed_uses_calendar_date() {
        let date = NaiveDate::from_ymd_opt(2026, 10, 19).expect("valid date");
        assert_eq!(daily_seed(date), 20_261_019);
    }
}
