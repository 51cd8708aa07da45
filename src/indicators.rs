//! Technical indicators
//!
//! Wilder's ATR and the ATR percentile rank used for squeeze detection.
//!
//! The batch form [`wilder_atr`] is a thin loop over the streaming
//! [`WilderAtr`] accumulator, so offline recomputation and the live engine
//! produce bit-identical values.

/// Calculate True Range
pub fn true_range(high: &[f64], low: &[f64], close: &[f64]) -> Vec<f64> {
    let mut tr = Vec::with_capacity(high.len());

    for i in 0..high.len() {
        let prev_close = if i == 0 { None } else { Some(close[i - 1]) };
        tr.push(true_range_step(high[i], low[i], prev_close));
    }

    tr
}

/// True range of a single bar given the previous close, if any
#[inline]
pub fn true_range_step(high: f64, low: f64, prev_close: Option<f64>) -> f64 {
    let hl = high - low;
    match prev_close {
        None => hl,
        Some(pc) => {
            let hc = (high - pc).abs();
            let lc = (low - pc).abs();
            hl.max(hc).max(lc)
        }
    }
}

/// Streaming Wilder ATR.
///
/// Seeds with the arithmetic mean of the first `period` true ranges, then
/// smooths with `(prev * (period - 1) + tr) / period`.
#[derive(Debug, Clone)]
pub struct WilderAtr {
    period: usize,
    prev_close: Option<f64>,
    seed_sum: f64,
    seed_count: usize,
    value: Option<f64>,
    broken: bool,
}

impl WilderAtr {
    pub fn new(period: usize) -> Self {
        Self {
            period,
            prev_close: None,
            seed_sum: 0.0,
            seed_count: 0,
            value: None,
            broken: false,
        }
    }

    /// Latest ATR, `None` during warm-up
    pub fn value(&self) -> Option<f64> {
        self.value
    }

    /// Feed one bar and return the ATR for it
    pub fn next(&mut self, high: f64, low: f64, close: f64) -> Option<f64> {
        let tr = true_range_step(high, low, self.prev_close);
        self.prev_close = Some(close);
        self.push_tr(tr)
    }

    /// Feed a precomputed true range
    pub fn push_tr(&mut self, tr: f64) -> Option<f64> {
        if self.period == 0 || self.broken {
            return None;
        }

        // An undefined TR leaves the recursion without a defined predecessor
        // for every later bar.
        if !tr.is_finite() {
            self.value = None;
            self.broken = true;
            return None;
        }

        let n = self.period as f64;
        self.value = match self.value {
            Some(prev) => Some((prev * (n - 1.0) + tr) / n),
            None => {
                self.seed_sum += tr;
                self.seed_count += 1;
                if self.seed_count == self.period {
                    Some(self.seed_sum / n)
                } else {
                    None
                }
            }
        };
        self.value
    }

    pub fn reset(&mut self) {
        *self = Self::new(self.period);
    }
}

/// Calculate Wilder's Average True Range for a whole series
pub fn wilder_atr(high: &[f64], low: &[f64], close: &[f64], period: usize) -> Vec<Option<f64>> {
    let mut acc = WilderAtr::new(period);
    true_range(high, low, close)
        .into_iter()
        .map(|tr| acc.push_tr(tr))
        .collect()
}

/// Percentile rank of `current` against a trailing window.
///
/// Counts defined window values strictly below `current` and divides by
/// `lookback`, not by the window length: a window shorter than `lookback`
/// (start of history) is not padded.
pub fn percentile_rank<I>(window: I, current: Option<f64>, lookback: usize) -> f64
where
    I: IntoIterator<Item = Option<f64>>,
{
    let current = match current {
        Some(v) if v > 0.0 && lookback > 0 => v,
        _ => return 50.0,
    };

    let count_below = window
        .into_iter()
        .flatten()
        .filter(|&v| v < current)
        .count();

    count_below as f64 / lookback as f64 * 100.0
}

/// ATR percentile rank at `idx` over bars `[idx - lookback, idx - 1]`,
/// clamped at the start of the series.
pub fn atr_percentile_rank(atr: &[Option<f64>], idx: usize, lookback: usize) -> f64 {
    let current = atr.get(idx).copied().flatten();
    let start = idx.saturating_sub(lookback);
    let end = idx.min(atr.len());
    percentile_rank(atr[start.min(end)..end].iter().copied(), current, lookback)
}
