use common::{Error, Result};

/// Price momentum: `close[t] - close[t - period]`.
#[derive(Debug, Clone)]
pub struct MomentumIndicator {
    pub period: usize,
}

impl MomentumIndicator {
    pub fn new(period: usize) -> Result<Self> {
        if period == 0 {
            return Err(Error::InvalidParameter {
                strategy: "momentum".into(),
                reason: "period must be > 0".into(),
            });
        }
        Ok(Self { period })
    }

    pub fn min_periods(&self) -> usize {
        self.period + 1
    }

    pub fn compute(&self, closes: &[f64]) -> Vec<Option<f64>> {
        (0..closes.len())
            .map(|t| t.checked_sub(self.period).map(|base| closes[t] - closes[base]))
            .collect()
    }
}
