use log::warn;
use std::{env::var, str::FromStr, time::Duration};

/// Tunables of the collective layer.
#[derive(Clone, Debug)]
pub struct CommConfig {
    /// How long a replica waits for one peer message; `None` waits forever.
    pub timeout: Option<Duration>,
    /// Upper bound on the payload of one batched gradient reduce.
    pub bucket_bytes: usize,
}

impl Default for CommConfig {
    fn default() -> Self {
        Self {
            timeout: None,
            bucket_bytes: 25 << 20,
        }
    }
}

impl CommConfig {
    pub const TIMEOUT_ENV: &'static str = "COLLECTIVE_TIMEOUT_MS";
    pub const BUCKET_BYTES_ENV: &'static str = "COLLECTIVE_BUCKET_BYTES";

    /// Defaults overridden by `COLLECTIVE_TIMEOUT_MS` and `COLLECTIVE_BUCKET_BYTES`.
    pub fn from_env() -> Self {
        Self::default().overridden_by(|key| var(key).ok())
    }

    fn overridden_by(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(ms) = parse::<u64>(Self::TIMEOUT_ENV, &lookup) {
            self.timeout = Some(Duration::from_millis(ms))
        }
        if let Some(bytes) = parse::<usize>(Self::BUCKET_BYTES_ENV, &lookup) {
            self.bucket_bytes = bytes
        }
        self
    }
}

fn parse<T: FromStr>(key: &str, lookup: impl Fn(&str) -> Option<String>) -> Option<T> {
    let val = lookup(key)?;
    match val.trim().parse() {
        Ok(val) => Some(val),
        Err(_) => {
            warn!("ignoring {key}={val:?}");
            None
        }
    }
}

#[test]
fn test_overrides() {
    use std::collections::HashMap;

    let env = HashMap::from([
        (CommConfig::TIMEOUT_ENV, "1500".to_string()),
        (CommConfig::BUCKET_BYTES_ENV, "lots".to_string()),
    ]);
    let config = CommConfig::default().overridden_by(|key| env.get(key).cloned());
    assert_eq!(config.timeout, Some(Duration::from_millis(1500)));
    assert_eq!(config.bucket_bytes, CommConfig::default().bucket_bytes);
}
