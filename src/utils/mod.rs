use std::time::{Duration, Instant};
use tracing::info;

/// A simple wall-clock timer for logging elapsed time.
pub struct Timer {
    label: String,
    start: Instant,
}

impl Timer {
    pub fn start(label: impl Into<String>) -> Self {
        let label = label.into();
        info!("⏱  Starting: {}", label);
        Self {
            label,
            start: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }
}

impl Drop for Timer {
    fn drop(&mut self) {
        info!(
            "⏱  Finished: {} (took {:.2?})",
            self.label,
            self.elapsed()
        );
    }
}

/// Two decimals, `—` for undefined values.
pub fn fmt_value(v: f64) -> String {
    if v.is_finite() {
        format!("{:.2}", v)
    } else {
        "—".to_string()
    }
}

/// Capacity cell: `—` when unknown.
pub fn fmt_kwc(kwc: Option<f64>) -> String {
    kwc.map(fmt_value).unwrap_or_else(|| "—".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fmt_value() {
        assert_eq!(fmt_value(1.234), "1.23");
        assert_eq!(fmt_value(0.0), "0.00");
        assert_eq!(fmt_value(f64::NAN), "—");
        assert_eq!(fmt_kwc(None), "—");
        assert_eq!(fmt_kwc(Some(36.0)), "36.00");
    }

    #[test]
    fn test_timer_elapsed() {
        let t = Timer::start("test");
        assert!(t.elapsed() < Duration::from_secs(60));
    }
}
