use common::{Error, Result};

use super::ema;

/// MACD (Moving Average Convergence/Divergence) indicator.
///
/// Computes: MACD line = EMA(fast) − EMA(slow), Signal = EMA(macd_line, signal_period).
/// Both EMAs and the signal EMA run from the first row, seeded with the first
/// value. With fewer than `slow` rows nothing is reported.
#[derive(Debug, Clone)]
pub struct MacdIndicator {
    pub fast: usize,
    pub slow: usize,
    pub signal: usize,
}

/// Per-row MACD output, one entry per input close.
#[derive(Debug, Clone, PartialEq)]
pub struct MacdLines {
    pub macd: Vec<Option<f64>>,
    pub signal: Vec<Option<f64>>,
    pub histogram: Vec<Option<f64>>,
}

impl MacdIndicator {
    pub fn new(fast: usize, slow: usize, signal: usize) -> Result<Self> {
        if fast == 0 || slow == 0 || signal == 0 {
            return Err(Error::InvalidParameter {
                strategy: "macd".into(),
                reason: "periods must be > 0".into(),
            });
        }
        if fast >= slow {
            return Err(Error::InvalidParameter {
                strategy: "macd".into(),
                reason: format!("fast period ({fast}) must be less than slow period ({slow})"),
            });
        }
        Ok(Self { fast, slow, signal })
    }

    /// Rows needed before any line is reported.
    pub fn min_periods(&self) -> usize {
        self.slow
    }

    /// Compute both lines from close prices (oldest first).
    pub fn compute(&self, closes: &[f64]) -> MacdLines {
        let n = closes.len();
        let mut lines = MacdLines {
            macd: vec![None; n],
            signal: vec![None; n],
            histogram: vec![None; n],
        };
        if n < self.min_periods() {
            return lines;
        }

        let fast = ema(closes, self.fast);
        let slow = ema(closes, self.slow);
        let macd: Vec<f64> = fast.iter().zip(&slow).map(|(f, s)| f - s).collect();
        let signal = ema(&macd, self.signal);

        for (i, (m, s)) in macd.iter().zip(&signal).enumerate() {
            lines.macd[i] = Some(*m);
            lines.signal[i] = Some(*s);
            lines.histogram[i] = Some(m - s);
        }
        lines
    }
}
