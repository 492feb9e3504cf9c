use crate::error::{TrainingError, TrainingResult};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// What the driver needs to know about the accelerator it will train on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AcceleratorInfo {
    pub name: String,
    pub total_memory_mib: u64,
    /// CUDA compute capability as `(major, minor)`, when reported.
    #[serde(default)]
    pub compute_capability: Option<(u32, u32)>,
}

impl AcceleratorInfo {
    /// bf16 needs Ampere (sm_80) or newer.
    #[must_use]
    pub fn supports_bf16(&self) -> bool {
        self.compute_capability.is_some_and(|(major, _)| major >= 8)
    }

    #[must_use]
    pub fn total_memory_gb(&self) -> f64 {
        self.total_memory_mib as f64 * 1024.0 * 1024.0 / 1e9
    }
}

/// Mixed-precision mode requested for training.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Precision {
    /// bf16 when the accelerator supports it, fp16 otherwise. Stays `Auto`
    /// when the compute capability is unknown, leaving the choice to the
    /// framework.
    #[default]
    Auto,
    Fp16,
    Bf16,
    Fp32,
}

impl Precision {
    #[must_use]
    pub fn resolve(self, accelerator: &AcceleratorInfo) -> Self {
        match self {
            Self::Auto if accelerator.compute_capability.is_none() => Self::Auto,
            Self::Auto if accelerator.supports_bf16() => Self::Bf16,
            Self::Auto => Self::Fp16,
            other => other,
        }
    }

    #[must_use]
    pub fn is_fp16(self) -> bool {
        self == Self::Fp16
    }

    #[must_use]
    pub fn is_bf16(self) -> bool {
        self == Self::Bf16
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::Fp16 => "fp16",
            Self::Bf16 => "bf16",
            Self::Fp32 => "fp32",
        }
    }
}

impl std::fmt::Display for Precision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Precision {
    type Err = TrainingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "fp16" | "f16" => Ok(Self::Fp16),
            "bf16" => Ok(Self::Bf16),
            "fp32" | "f32" => Ok(Self::Fp32),
            other => Err(TrainingError::InvalidSpec(format!("unknown precision: {other}"))),
        }
    }
}

/// Source of accelerator information.
///
/// `Ok(None)` means no usable accelerator; `Err` is reserved for a detector that
/// could not run at all for reasons other than absence.
#[async_trait]
pub trait DeviceDetector: Send + Sync {
    async fn detect(&self) -> TrainingResult<Option<AcceleratorInfo>>;
}

/// A detector with a fixed answer.
#[derive(Debug, Clone, Default)]
pub struct StaticDetector(pub Option<AcceleratorInfo>);

#[async_trait]
impl DeviceDetector for StaticDetector {
    async fn detect(&self) -> TrainingResult<Option<AcceleratorInfo>> {
        Ok(self.0.clone())
    }
}
