// Copyright 2025 eraflo
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Maximum number of frames the CPU may record ahead of the GPU.
pub const MAX_FRAMES_IN_FLIGHT: usize = 4;

/// Sizes and limits of the backend's allocators.
///
/// Missing fields take their default value when deserializing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    /// Number of frame slots, between 1 and [`MAX_FRAMES_IN_FLIGHT`].
    pub frames_in_flight: usize,
    /// Descriptors per CPU-only heap of the descriptor pools.
    pub cpu_descriptor_heap_size: u32,
    /// Initial shader-visible resource descriptors per frame slot.
    pub gpu_resource_descriptors_per_frame: u32,
    /// Initial shader-visible sampler descriptors per frame slot.
    pub gpu_sampler_descriptors_per_frame: u32,
    /// Upload staging bytes per frame slot.
    pub upload_bytes_per_frame: u64,
    /// Readback staging bytes per frame slot.
    pub readback_bytes_per_frame: u64,
    /// Alignment of staging allocations, a power of two.
    pub staging_alignment: u64,
    /// Upper bound of the wait for a frame slot's fence in `begin_frame`.
    pub frame_wait_timeout_ms: u64,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            frames_in_flight: 2,
            cpu_descriptor_heap_size: 256,
            gpu_resource_descriptors_per_frame: 1024,
            gpu_sampler_descriptors_per_frame: 64,
            upload_bytes_per_frame: 4 * 1024 * 1024,
            readback_bytes_per_frame: 1024 * 1024,
            staging_alignment: 512,
            frame_wait_timeout_ms: 5000,
        }
    }
}

impl BackendConfig {
    /// Load the configuration from a JSON string.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load the configuration from a JSON file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json(&content)
    }

    /// Save the configuration to a JSON file.
    pub fn to_file(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }

    /// Checks that the backend can work with these values.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.frames_in_flight == 0 || self.frames_in_flight > MAX_FRAMES_IN_FLIGHT {
            return Err(ConfigError::Invalid(format!(
                "frames_in_flight must be between 1 and {MAX_FRAMES_IN_FLIGHT}, got {}",
                self.frames_in_flight
            )));
        }
        let sizes = [
            ("cpu_descriptor_heap_size", self.cpu_descriptor_heap_size as u64),
            (
                "gpu_resource_descriptors_per_frame",
                self.gpu_resource_descriptors_per_frame as u64,
            ),
            (
                "gpu_sampler_descriptors_per_frame",
                self.gpu_sampler_descriptors_per_frame as u64,
            ),
            ("upload_bytes_per_frame", self.upload_bytes_per_frame),
            ("readback_bytes_per_frame", self.readback_bytes_per_frame),
        ];
        if let Some((name, _)) = sizes.iter().find(|(_, value)| *value == 0) {
            return Err(ConfigError::Invalid(format!("{name} must not be 0")));
        }
        if !self.staging_alignment.is_power_of_two() {
            return Err(ConfigError::Invalid(format!(
                "staging_alignment must be a power of two, got {}",
                self.staging_alignment
            )));
        }
        Ok(())
    }

    /// The bounded wait of `begin_frame`.
    pub fn frame_wait_timeout(&self) -> Duration {
        Duration::from_millis(self.frame_wait_timeout_ms)
    }
}
