use serde::{Deserialize, Serialize};

use crate::core::{
    error::{ComponentError, ComponentResult},
    traits::Source,
};

const PROC_UPTIME: &str = "/proc/uptime";

/// Reading of `/proc/uptime`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Uptime {
    /// Seconds since boot, suspend excluded.
    pub uptime_seconds: f64,
    /// Idle seconds summed over all CPUs; 0 when the kernel omits it.
    pub idle_time_seconds: f64,
    /// Unix timestamp of the last boot.
    pub boot_time_seconds: i64,
}

impl Uptime {
    /// Parses the two whitespace-separated fields of `/proc/uptime`.
    ///
    /// Only the first field is required.
    pub fn parse(content: &str, now: i64) -> ComponentResult<Self> {
        let mut parts = content.split_whitespace();
        let first = parts.next().ok_or_else(|| ComponentError::Parse {
            what: "uptime_seconds".to_string(),
            location: PROC_UPTIME.to_string(),
            reason: "expected at least 1 field".to_string(),
        })?;

        let uptime_seconds = first.parse::<f64>().map_err(|_| ComponentError::Parse {
            what: "uptime_seconds".to_string(),
            location: PROC_UPTIME.to_string(),
            reason: format!("invalid value: {first}"),
        })?;

        let idle_time_seconds = parts
            .next()
            .and_then(|s| s.parse::<f64>().ok())
            .unwrap_or(0.0);

        Ok(Uptime {
            uptime_seconds,
            idle_time_seconds,
            boot_time_seconds: now - uptime_seconds as i64,
        })
    }
}

/// System uptime source. Linux only; elsewhere init fails as unsupported.
#[derive(Debug, Clone)]
pub struct UptimeSource {
    path: String,
}

impl Default for UptimeSource {
    fn default() -> Self {
        Self {
            path: PROC_UPTIME.to_string(),
        }
    }
}

impl UptimeSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reads another file with the same layout.
    pub fn with_path(path: impl Into<String>) -> Self {
        Self { path: path.into() }
    }
}

fn unix_now() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or_default()
}

#[async_trait::async_trait]
impl Source<Uptime> for UptimeSource {
    async fn init(&mut self, _debug: bool) -> ComponentResult<()> {
        if cfg!(not(target_os = "linux")) && self.path == PROC_UPTIME {
            return Err(ComponentError::Unsupported(
                "uptime source requires /proc/uptime".to_string(),
            ));
        }
        Ok(())
    }

    async fn produce(&mut self) -> ComponentResult<Uptime> {
        let content = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|source| ComponentError::FileRead {
                path: self.path.clone(),
                source,
            })?;
        Uptime::parse(&content, unix_now())
    }

    fn kind(&self) -> &'static str {
        "uptime"
    }
}
