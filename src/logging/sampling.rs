//! Per-message log sampling.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::{Deserialize, Deserializer};

use crate::logging::logger::LogLevel;

const DEFAULT_INTERVAL: Duration = Duration::from_secs(1);
const DEFAULT_FIRST: u64 = 100;
const DEFAULT_THEREAFTER: u64 = 100;

/// Counters are pruned once this many distinct messages are tracked.
const MAX_TRACKED: usize = 4096;

/// Sampling settings of a custom log. Zero values take the defaults.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LogSampling {
    /// Window length, as integer nanoseconds or a string like `"500ms"`.
    #[serde(deserialize_with = "deserialize_interval")]
    pub interval: Duration,

    /// Entries emitted per window before sampling starts.
    pub first: u64,

    /// After `first`, every `thereafter`-th entry is emitted.
    pub thereafter: u64,
}

impl LogSampling {
    pub fn with_defaults(self) -> Self {
        Self {
            interval: if self.interval.is_zero() { DEFAULT_INTERVAL } else { self.interval },
            first: if self.first == 0 { DEFAULT_FIRST } else { self.first },
            thereafter: if self.thereafter == 0 { DEFAULT_THEREAFTER } else { self.thereafter },
        }
    }
}

#[derive(Debug)]
struct Window {
    start: Instant,
    count: u64,
}

/// Counts identical (level, message) entries per window.
#[derive(Debug)]
pub struct Sampler {
    settings: LogSampling,
    windows: Mutex<HashMap<(LogLevel, String), Window>>,
}

impl Sampler {
    pub fn new(settings: LogSampling) -> Self {
        Self {
            settings: settings.with_defaults(),
            windows: Mutex::new(HashMap::new()),
        }
    }

    pub fn settings(&self) -> LogSampling {
        self.settings
    }

    /// Should this entry be emitted?
    pub fn sample(&self, level: LogLevel, message: &str) -> bool {
        self.sample_at(level, message, Instant::now())
    }

    pub(crate) fn sample_at(&self, level: LogLevel, message: &str, now: Instant) -> bool {
        let LogSampling { interval, first, thereafter } = self.settings;
        let mut windows = self.windows.lock();

        if windows.len() >= MAX_TRACKED {
            windows.retain(|_, window| now.saturating_duration_since(window.start) < interval);
        }

        let window = windows
            .entry((level, message.to_string()))
            .or_insert(Window { start: now, count: 0 });
        if now.saturating_duration_since(window.start) >= interval {
            window.start = now;
            window.count = 0;
        }
        window.count += 1;

        let n = window.count;
        n <= first || (n - first) % thereafter == 0
    }
}

fn deserialize_interval<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Interval {
        Nanos(u64),
        Text(String),
    }

    match Interval::deserialize(deserializer)? {
        Interval::Nanos(nanos) => Ok(Duration::from_nanos(nanos)),
        Interval::Text(text) => parse_duration(&text).map_err(serde::de::Error::custom),
    }
}

/// Parse `"250ms"`, `"1.5s"`, `"2m"` and the like.
pub fn parse_duration(text: &str) -> Result<Duration, String> {
    let text = text.trim();
    let split = text
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(text.len());
    let (number, unit) = text.split_at(split);

    let value: f64 = number
        .parse()
        .map_err(|_| format!("invalid duration '{}'", text))?;
    let seconds = match unit {
        "ns" => value / 1e9,
        "us" | "µs" => value / 1e6,
        "ms" => value / 1e3,
        "s" => value,
        "m" => value * 60.0,
        "h" => value * 3600.0,
        _ => return Err(format!("invalid duration unit in '{}'", text)),
    };
    Duration::try_from_secs_f64(seconds).map_err(|e| format!("invalid duration '{}': {}", text, e))
}
