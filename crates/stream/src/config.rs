use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tilestream_common::{GridError, TileResolution};
use tilestream_mesh::SurfaceParams;

/// Errors from loading or validating a [`StreamConfig`].
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Grid(#[from] GridError),
    #[error("{field} must be greater than zero")]
    ZeroTimeout { field: &'static str },
    #[error("{field} is {value}, above the limit of {max}")]
    TooLarge {
        field: &'static str,
        value: u64,
        max: u64,
    },
    #[error("unknown retirement policy {0:?} (expected \"eager\" or \"regenerated-slot\")")]
    UnknownPolicy(String),
}

/// Upper bound on `fence_retries`.
pub const MAX_FENCE_RETRIES: u32 = 1000;

/// Which drawables the producer flags for teardown on each cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RetirementPolicy {
    /// Every drawable slot of the generation being prepared is retired, so
    /// only the most recently uploaded tile stays on screen.
    #[default]
    Eager,
    /// Only the slot under the cursor is retired; it is re-uploaded on the
    /// following cycle.
    RegeneratedSlot,
}

impl FromStr for RetirementPolicy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "eager" => Ok(RetirementPolicy::Eager),
            "regenerated-slot" => Ok(RetirementPolicy::RegeneratedSlot),
            other => Err(ConfigError::UnknownPolicy(other.to_string())),
        }
    }
}

impl fmt::Display for RetirementPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RetirementPolicy::Eager => "eager",
            RetirementPolicy::RegeneratedSlot => "regenerated-slot",
        })
    }
}

/// Streaming configuration: tile shape, producer pacing and wait bounds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Samples per tile edge.
    pub resolution: TileResolution,
    /// Height field the tiles are sampled from.
    pub surface: SurfaceParams,
    pub policy: RetirementPolicy,
    /// Producer sleep before its first cycle.
    pub startup_delay_ms: u64,
    /// Pause between regeneration cycles.
    pub cycle_delay_ms: u64,
    /// How long one acknowledgment wait lasts before it is retried.
    pub handoff_timeout_ms: u64,
    /// Bound on a single upload fence wait.
    pub fence_timeout_ms: u64,
    /// Extra fence waits before an upload is reported as timed out.
    pub fence_retries: u32,
    /// Bound on joining the producer thread at shutdown.
    pub join_timeout_ms: u64,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            resolution: TileResolution::default(),
            surface: SurfaceParams::default(),
            policy: RetirementPolicy::Eager,
            startup_delay_ms: 1000,
            cycle_delay_ms: 700,
            handoff_timeout_ms: 1000,
            fence_timeout_ms: 1000,
            fence_retries: 2,
            join_timeout_ms: 2000,
        }
    }
}

impl StreamConfig {
    /// Read a JSON config file. Missing fields take their defaults.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let file = std::fs::File::open(path.as_ref())?;
        let config: StreamConfig = serde_json::from_reader(std::io::BufReader::new(file))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.resolution.validate()?;
        if self.handoff_timeout_ms == 0 {
            return Err(ConfigError::ZeroTimeout {
                field: "handoff_timeout_ms",
            });
        }
        if self.fence_timeout_ms == 0 {
            return Err(ConfigError::ZeroTimeout {
                field: "fence_timeout_ms",
            });
        }
        if self.fence_retries > MAX_FENCE_RETRIES {
            return Err(ConfigError::TooLarge {
                field: "fence_retries",
                value: u64::from(self.fence_retries),
                max: u64::from(MAX_FENCE_RETRIES),
            });
        }
        let vertices = self.resolution.vertex_count();
        if u32::try_from(vertices).is_err() {
            return Err(ConfigError::TooLarge {
                field: "vertices per tile",
                value: vertices as u64,
                max: u64::from(u32::MAX),
            });
        }
        Ok(())
    }

    pub fn startup_delay(&self) -> Duration {
        Duration::from_millis(self.startup_delay_ms)
    }

    pub fn cycle_delay(&self) -> Duration {
        Duration::from_millis(self.cycle_delay_ms)
    }

    pub fn handoff_timeout(&self) -> Duration {
        Duration::from_millis(self.handoff_timeout_ms)
    }

    pub fn fence_timeout(&self) -> Duration {
        Duration::from_millis(self.fence_timeout_ms)
    }

    pub fn join_timeout(&self) -> Duration {
        Duration::from_millis(self.join_timeout_ms)
    }

    /// Vertices per tile, as passed to draw calls. Saturates on a
    /// resolution that [`validate`](Self::validate) would reject.
    pub fn vertex_count(&self) -> u32 {
        u32::try_from(self.resolution.vertex_count()).unwrap_or(u32::MAX)
    }
}
