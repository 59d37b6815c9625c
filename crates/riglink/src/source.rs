//! Vector sources for control loops.
//!
//! A control loop pulls one vector per tick from a [`VectorSource`] and hands
//! it to the link. Hardware readers live outside this crate; the sources here
//! cover fixed values and, behind the `sim` feature, random joystick input.

/// Delivers a fixed-length vector on demand.
pub trait VectorSource {
    /// Number of values in every vector.
    fn width(&self) -> usize;

    /// Produce the next vector. Always `width()` values long.
    fn next_vector(&mut self) -> Vec<f64>;
}

/// Emits the same vector every tick.
#[derive(Debug, Clone, PartialEq)]
pub struct ConstantSource {
    values: Vec<f64>,
}

impl ConstantSource {
    pub fn new(values: Vec<f64>) -> Self {
        Self { values }
    }

    /// `width` zeros.
    pub fn zeros(width: usize) -> Self {
        Self::new(vec![0.0; width])
    }
}

impl VectorSource for ConstantSource {
    fn width(&self) -> usize {
        self.values.len()
    }

    fn next_vector(&mut self) -> Vec<f64> {
        self.values.clone()
    }
}

#[cfg(feature = "sim")]
pub use simulated::SimulatedSource;

#[cfg(feature = "sim")]
mod simulated {
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    use super::VectorSource;

    /// Stand-in for a joystick: uniform values in `[-1, 1]`, rounded.
    #[derive(Debug, Clone)]
    pub struct SimulatedSource {
        width: usize,
        factor: f64,
        rng: StdRng,
    }

    impl SimulatedSource {
        /// Values rounded to `decimals` places, seeded from the OS.
        pub fn new(width: usize, decimals: u32) -> Self {
            Self::with_rng(width, decimals, StdRng::from_rng(&mut rand::rng()))
        }

        /// Deterministic sequence for tests and replays.
        pub fn seeded(width: usize, decimals: u32, seed: u64) -> Self {
            Self::with_rng(width, decimals, StdRng::seed_from_u64(seed))
        }

        fn with_rng(width: usize, decimals: u32, rng: StdRng) -> Self {
            Self {
                width,
                factor: 10f64.powi(decimals.min(15) as i32),
                rng,
            }
        }
    }

    impl VectorSource for SimulatedSource {
        fn width(&self) -> usize {
            self.width
        }

        fn next_vector(&mut self) -> Vec<f64> {
            (0..self.width)
                .map(|_| {
                    let raw: f64 = self.rng.random_range(-1.0..=1.0);
                    (raw * self.factor).round() / self.factor
                })
                .collect()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constant_source_repeats() {
        let mut source = ConstantSource::new(vec![0.25, -0.5]);
        assert_eq!(source.width(), 2);
        assert_eq!(source.next_vector(), source.next_vector());
        assert_eq!(ConstantSource::zeros(3).next_vector(), vec![0.0; 3]);
    }

    #[cfg(feature = "sim")]
    #[test]
    fn simulated_values_are_bounded_and_rounded() {
        let mut source = SimulatedSource::seeded(20, 2, 7);
        for _ in 0..50 {
            let vector = source.next_vector();
            assert_eq!(vector.len(), 20);
            for value in vector {
                assert!((-1.0..=1.0).contains(&value), "{value}");
                let scaled = value * 100.0;
                assert!((scaled - scaled.round()).abs() < 1e-6, "{value}");
            }
        }
    }

    #[cfg(feature = "sim")]
    #[test]
    fn seeded_sources_agree() {
        let mut a = SimulatedSource::seeded(4, 3, 42);
        let mut b = SimulatedSource::seeded(4, 3, 42);
        assert_eq!(a.next_vector(), b.next_vector());
    }
}
