use common::{Error, Result};

/// RSI (Relative Strength Index) indicator.
///
/// Uses Wilder's smoothed moving average (same as TradingView / standard RSI).
/// The first defined value is at row `period`, i.e. it needs `period + 1` closes.
#[derive(Debug, Clone)]
pub struct RsiIndicator {
    pub period: usize,
    pub overbought: f64,
    pub oversold: f64,
}

impl RsiIndicator {
    pub fn new(period: usize, overbought: f64, oversold: f64) -> Result<Self> {
        if period < 2 {
            return Err(Error::InvalidParameter {
                strategy: "rsi".into(),
                reason: "period must be >= 2".into(),
            });
        }
        if !(0.0..=100.0).contains(&oversold)
            || !(0.0..=100.0).contains(&overbought)
            || oversold >= overbought
        {
            return Err(Error::InvalidParameter {
                strategy: "rsi".into(),
                reason: format!(
                    "need 0 <= oversold ({oversold}) < overbought ({overbought}) <= 100"
                ),
            });
        }
        Ok(Self { period, overbought, oversold })
    }

    pub fn min_periods(&self) -> usize {
        self.period + 1
    }

    /// RSI per row for close prices (oldest first).
    pub fn compute(&self, closes: &[f64]) -> Vec<Option<f64>> {
        let mut out = vec![None; closes.len()];
        if closes.len() < self.min_periods() {
            return out;
        }

        let changes: Vec<f64> = closes.windows(2).map(|w| w[1] - w[0]).collect();
        let initial = &changes[..self.period];
        let p = self.period as f64;

        let mut avg_gain = initial.iter().filter(|&&c| c > 0.0).sum::<f64>() / p;
        let mut avg_loss = initial.iter().filter(|&&c| c < 0.0).map(|c| c.abs()).sum::<f64>() / p;
        out[self.period] = Some(rsi_value(avg_gain, avg_loss));

        // Wilder smoothing over remaining changes; change i ends at row i + 1
        for (i, &change) in changes.iter().enumerate().skip(self.period) {
            let gain = change.max(0.0);
            let loss = (-change).max(0.0);
            avg_gain = (avg_gain * (p - 1.0) + gain) / p;
            avg_loss = (avg_loss * (p - 1.0) + loss) / p;
            out[i + 1] = Some(rsi_value(avg_gain, avg_loss));
        }
        out
    }
}

fn rsi_value(avg_gain: f64, avg_loss: f64) -> f64 {
    if avg_loss == 0.0 {
        return 100.0;
    }
    let rs = avg_gain / avg_loss;
    100.0 - 100.0 / (1.0 + rs)
}
