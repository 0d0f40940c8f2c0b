//! Phase timing.

use std::time::{Duration, Instant};

/// Measures one build phase and prints how long it took.
pub struct Timer {
    label: String,
    start: Instant,
}

impl Timer {
    pub fn start(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            start: Instant::now(),
        }
    }

    /// Print the elapsed time as `  [1.2m] <label>`.
    pub fn finish(self) {
        println!("  [{}] {}", format_elapsed(self.start.elapsed()), self.label);
    }
}

fn format_elapsed(elapsed: Duration) -> String {
    let secs = elapsed.as_secs_f64();
    if secs >= 3600.0 {
        format!("{:.1}h", secs / 3600.0)
    } else if secs >= 60.0 {
        format!("{:.1}m", secs / 60.0)
    } else {
        format!("{:.1}s", secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_elapsed() {
        assert_eq!(format_elapsed(Duration::from_millis(1500)), "1.5s");
        assert_eq!(format_elapsed(Duration::from_secs(90)), "1.5m");
        assert_eq!(format_elapsed(Duration::from_secs(5400)), "1.5h");
    }
}
