//! Synthetic work units.
//!
//! A work unit is deterministic for a given parameter, CPU bound, and returns a
//! value derived from every step of its computation. Callers fold the value
//! into a checksum behind [`black_box`] so the work cannot be optimized away.

use std::fmt;
use std::hint::black_box;

/// A unit of CPU-bound work executed by the timing protocol.
pub trait WorkUnit: Send + Sync + fmt::Debug {
    /// Execute the work once and return its data-dependent result.
    fn run(&self) -> u64;

    /// Human-readable description used in diagnostics.
    fn describe(&self) -> String;
}

/// Find the n-th prime number by trial division.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NthPrime {
    /// One-based index into the prime sequence.
    pub n: u32,
}

impl NthPrime {
    /// Create the work unit.
    pub fn new(n: u32) -> Self {
        Self { n }
    }
}

impl WorkUnit for NthPrime {
    fn run(&self) -> u64 {
        nth_prime(black_box(self.n))
    }

    fn describe(&self) -> String {
        format!("prime number {}", self.n)
    }
}

/// Returns the `n`-th prime, counting 2 as the first. `n == 0` yields 1.
pub fn nth_prime(n: u32) -> u64 {
    let mut count = 0;
    let mut candidate: u64 = 1;

    while count < n {
        candidate += 1;

        let mut divisor = 2;
        let mut prime = true;
        while divisor * divisor <= candidate {
            if candidate % divisor == 0 {
                prime = false;
                break;
            }
            divisor += 1;
        }

        if prime {
            count += 1;
        }
    }

    candidate
}

/// Fixed floating-point loop of `iters` iterations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FloatLoop {
    /// Number of inner iterations.
    pub iters: u64,
}

impl FloatLoop {
    /// Create the work unit.
    pub fn new(iters: u64) -> Self {
        Self { iters }
    }
}

impl WorkUnit for FloatLoop {
    fn run(&self) -> u64 {
        let iters = black_box(self.iters);
        let mut acc = 0.0f64;
        for i in 0..iters {
            acc += (black_box(i) as f64).sqrt() * 1.000_001;
        }
        acc.to_bits()
    }

    fn describe(&self) -> String {
        format!("{} floating-point iterations", self.iters)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nth_prime_sequence() {
        let primes: Vec<u64> = (1..=10).map(nth_prime).collect();
        assert_eq!(primes, vec![2, 3, 5, 7, 11, 13, 17, 19, 23, 29]);
        assert_eq!(nth_prime(1000), 7919);
        assert_eq!(nth_prime(0), 1);
    }

    #[test]
    fn test_work_units_are_deterministic() {
        let prime = NthPrime::new(500);
        assert_eq!(prime.run(), prime.run());

        let float = FloatLoop::new(10_000);
        assert_eq!(float.run(), float.run());
        assert_ne!(float.run(), FloatLoop::new(10_001).run());
    }

    #[test]
    fn test_float_loop_zero_iterations() {
        assert_eq!(FloatLoop::new(0).run(), 0.0f64.to_bits());
    }

    #[test]
    fn test_describe() {
        assert!(NthPrime::new(7).describe().contains('7'));
        assert!(FloatLoop::new(9).describe().contains("9 floating-point"));
    }
}
