//! FFmpeg `-progress` output parsing.
//!
//! With `-progress pipe:1 -nostats`, FFmpeg writes blocks of `key=value` lines
//! to stdout. The keys we care about are `out_time_us` / `out_time_ms` (both
//! microseconds, a long-standing FFmpeg quirk), `out_time` (HH:MM:SS.ffffff),
//! and the final `progress=end` marker.

/// Accumulates progress lines and turns them into completion fractions.
///
/// Fractions are only produced when the input duration is known (from a probe
/// of the source before the engine was spawned). Out-of-order or duplicate
/// values are passed through as-is; the job stores last-write-wins.
#[derive(Debug)]
pub struct ProgressParser {
    duration_seconds: Option<f64>,
}

impl ProgressParser {
    pub fn new(duration_seconds: Option<f64>) -> Self {
        Self { duration_seconds }
    }

    /// Feed one line of `-progress` output. Returns a fraction in `0.0..=1.0`
    /// when the line advances the position.
    pub fn push_line(&mut self, line: &str) -> Option<f64> {
        let (key, value) = line.split_once('=')?;
        let (key, value) = (key.trim(), value.trim());

        match key {
            "out_time_us" | "out_time_ms" => {
                let micros: i64 = value.parse().ok()?;
                if micros < 0 {
                    return None;
                }
                self.fraction(micros as f64 / 1_000_000.0)
            }
            "out_time" => self.fraction(parse_clock(value)?),
            "progress" if value == "end" => Some(1.0),
            _ => None,
        }
    }

    fn fraction(&self, seconds: f64) -> Option<f64> {
        let duration = self.duration_seconds?;
        if duration <= 0.0 {
            return None;
        }
        Some((seconds / duration).clamp(0.0, 1.0))
    }
}

/// Parse an FFmpeg `HH:MM:SS.ffffff` clock value into seconds.
fn parse_clock(value: &str) -> Option<f64> {
    let mut parts = value.split(':');
    let hours: f64 = parts.next()?.parse().ok()?;
    let minutes: f64 = parts.next()?.parse().ok()?;
    let seconds: f64 = parts.next()?.parse().ok()?;
    if parts.next().is_some() {
        return None;
    }
    Some(hours * 3600.0 + minutes * 60.0 + seconds)
}
