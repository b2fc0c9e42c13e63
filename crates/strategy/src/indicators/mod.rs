pub mod macd;
pub mod momentum;
pub mod rsi;

pub use macd::{MacdIndicator, MacdLines};
pub use momentum::MomentumIndicator;
pub use rsi::RsiIndicator;

use common::Signal;

/// Exponential moving average over the whole input, `alpha = 2 / (span + 1)`,
/// seeded with the first value (no bias adjustment).
pub fn ema(values: &[f64], span: usize) -> Vec<f64> {
    let mut out = Vec::with_capacity(values.len());
    let Some(&first) = values.first() else {
        return out;
    };
    let alpha = 2.0 / (span as f64 + 1.0);
    let mut prev = first;
    out.push(prev);
    for &v in &values[1..] {
        prev = alpha * v + (1.0 - alpha) * prev;
        out.push(prev);
    }
    out
}

/// Crossing of line `a` over line `b` between two consecutive rows.
///
/// Buy when `a` moves strictly above `b` from at-or-below, sell when it moves
/// strictly below from at-or-above. An exact tie on the current row is never
/// a cross, so a touch followed by a break fires exactly once.
pub fn crossover(prev_a: f64, prev_b: f64, a: f64, b: f64) -> Signal {
    if a > b && prev_a <= prev_b {
        Signal::Buy
    } else if a < b && prev_a >= prev_b {
        Signal::Sell
    } else {
        Signal::Hold
    }
}

/// Per-row crossover signals for two optional lines. Rows where either line
/// is undefined on the current or previous row hold.
pub fn crossover_signals(a: &[Option<f64>], b: &[Option<f64>]) -> Vec<Signal> {
    let n = a.len().min(b.len());
    let mut signals = vec![Signal::Hold; a.len()];
    for t in 1..n {
        if let (Some(pa), Some(pb), Some(ca), Some(cb)) = (a[t - 1], b[t - 1], a[t], b[t]) {
            signals[t] = crossover(pa, pb, ca, cb);
        }
    }
    signals
}
