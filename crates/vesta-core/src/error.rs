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

//! Defines the hierarchy of error types for the backend core.

use std::fmt;

/// An error reported by the native graphics driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DriverError {
    /// The driver could not allocate device or host memory for the request.
    OutOfMemory,
    /// The device was removed or reset. Terminal for the device instance.
    DeviceLost,
    /// A bounded wait expired before the fence reached the requested value.
    Timeout,
    /// A native object passed to the driver is unknown or already destroyed.
    InvalidObject,
    /// Any other native failure, carrying the driver's message.
    Backend(String),
}

impl fmt::Display for DriverError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DriverError::OutOfMemory => write!(f, "The driver ran out of memory."),
            DriverError::DeviceLost => write!(f, "The device was lost."),
            DriverError::Timeout => write!(f, "Timed out waiting for the GPU."),
            DriverError::InvalidObject => write!(f, "Invalid or destroyed native object."),
            DriverError::Backend(msg) => write!(f, "Native driver error: {msg}"),
        }
    }
}

impl std::error::Error for DriverError {}

/// An error related to descriptor heap creation or descriptor allocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DescriptorError {
    /// The native descriptor heap could not be created.
    HeapCreationFailed(DriverError),
    /// A zero-sized allocation was requested.
    EmptyRequest,
    /// A bump allocator has no room left for the request.
    Exhausted {
        /// Descriptors requested.
        requested: u32,
    },
}

impl fmt::Display for DescriptorError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DescriptorError::HeapCreationFailed(err) => {
                write!(f, "Failed to create descriptor heap: {err}")
            }
            DescriptorError::EmptyRequest => write!(f, "Requested zero descriptors."),
            DescriptorError::Exhausted { requested } => {
                write!(f, "No room left for {requested} descriptors.")
            }
        }
    }
}

impl std::error::Error for DescriptorError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            DescriptorError::HeapCreationFailed(err) => Some(err),
            DescriptorError::EmptyRequest | DescriptorError::Exhausted { .. } => None,
        }
    }
}

/// An error related to the creation or use of a GPU resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResourceError {
    /// The handle does not refer to a live object.
    InvalidHandle,
    /// An access fell outside of the resource.
    OutOfBounds {
        /// Requested end offset in bytes.
        end: u64,
        /// Size of the resource in bytes.
        size: u64,
    },
    /// The resource was not created with the usage the operation requires.
    MissingUsage(&'static str),
    /// The description is not valid (zero size, missing format, ...).
    InvalidDescription(String),
    /// Descriptor allocation for the resource's views failed.
    Descriptor(DescriptorError),
    /// The driver failed the request.
    Driver(DriverError),
}

impl fmt::Display for ResourceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceError::InvalidHandle => write!(f, "Invalid resource handle."),
            ResourceError::OutOfBounds { end, size } => {
                write!(f, "Access up to byte {end} is out of bounds for size {size}.")
            }
            ResourceError::MissingUsage(usage) => {
                write!(f, "Resource was not created with usage {usage}.")
            }
            ResourceError::InvalidDescription(msg) => {
                write!(f, "Invalid resource description: {msg}")
            }
            ResourceError::Descriptor(err) => write!(f, "Descriptor allocation failed: {err}"),
            ResourceError::Driver(err) => write!(f, "Resource creation failed: {err}"),
        }
    }
}

impl std::error::Error for ResourceError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ResourceError::Descriptor(err) => Some(err),
            ResourceError::Driver(err) => Some(err),
            _ => None,
        }
    }
}

impl From<DriverError> for ResourceError {
    fn from(err: DriverError) -> Self {
        ResourceError::Driver(err)
    }
}

impl From<DescriptorError> for ResourceError {
    fn from(err: DescriptorError) -> Self {
        ResourceError::Descriptor(err)
    }
}

/// An error related to the creation of a pipeline and its binding layout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineError {
    /// The native binding layout (root signature) could not be created.
    LayoutCreationFailed(DriverError),
    /// The driver failed to compile the pipeline state object.
    CompilationFailed {
        /// A descriptive label for the pipeline, if available.
        label: Option<String>,
        /// The driver error.
        source: DriverError,
    },
    /// The pipeline description does not provide the shader stages its kind needs.
    MissingStage(&'static str),
}

impl fmt::Display for PipelineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PipelineError::LayoutCreationFailed(err) => {
                write!(f, "Binding layout creation failed: {err}")
            }
            PipelineError::CompilationFailed { label, source } => write!(
                f,
                "Pipeline compilation failed for '{}': {}",
                label.as_deref().unwrap_or("Unknown"),
                source
            ),
            PipelineError::MissingStage(stage) => {
                write!(f, "Pipeline is missing its {stage} shader.")
            }
        }
    }
}

impl std::error::Error for PipelineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            PipelineError::LayoutCreationFailed(err) => Some(err),
            PipelineError::CompilationFailed { source, .. } => Some(source),
            PipelineError::MissingStage(_) => None,
        }
    }
}

/// An error returned by the frame operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    /// The device was lost. The backend must be destroyed and recreated.
    DeviceLost,
    /// The operation is not valid in the scheduler's current state.
    InvalidState(&'static str),
    /// A non-fatal driver failure during the frame operation.
    Driver(DriverError),
}

impl fmt::Display for FrameError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FrameError::DeviceLost => write!(
                f,
                "The graphics device was lost and needs to be reinitialized."
            ),
            FrameError::InvalidState(msg) => write!(f, "Invalid frame state: {msg}"),
            FrameError::Driver(err) => write!(f, "Frame operation failed: {err}"),
        }
    }
}

impl std::error::Error for FrameError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            FrameError::Driver(err) => Some(err),
            _ => None,
        }
    }
}

impl From<DriverError> for FrameError {
    fn from(err: DriverError) -> Self {
        match err {
            DriverError::DeviceLost => FrameError::DeviceLost,
            other => FrameError::Driver(other),
        }
    }
}

/// An error while loading or validating a [`crate::BackendConfig`].
#[derive(Debug)]
pub enum ConfigError {
    /// The configuration file could not be read or written.
    Io(std::io::Error),
    /// The configuration could not be parsed.
    Parse(serde_json::Error),
    /// A field holds a value the backend cannot work with.
    Invalid(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Io(err) => write!(f, "Failed to access configuration: {err}"),
            ConfigError::Parse(err) => write!(f, "Failed to parse configuration: {err}"),
            ConfigError::Invalid(msg) => write!(f, "Invalid configuration: {msg}"),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Io(err) => Some(err),
            ConfigError::Parse(err) => Some(err),
            ConfigError::Invalid(_) => None,
        }
    }
}

impl From<std::io::Error> for ConfigError {
    fn from(err: std::io::Error) -> Self {
        ConfigError::Io(err)
    }
}

impl From<serde_json::Error> for ConfigError {
    fn from(err: serde_json::Error) -> Self {
        ConfigError::Parse(err)
    }
}

/// A high-level error of the [`crate::RenderBackend`].
#[derive(Debug)]
pub enum BackendError {
    /// The configuration was rejected.
    Config(ConfigError),
    /// A descriptor heap required at startup could not be created.
    Descriptor(DescriptorError),
    /// A resource operation failed.
    Resource(ResourceError),
    /// A pipeline operation failed.
    Pipeline(PipelineError),
    /// A frame operation failed.
    Frame(FrameError),
    /// The driver failed during initialization or teardown.
    Driver(DriverError),
}

impl fmt::Display for BackendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendError::Config(err) => write!(f, "Backend configuration error: {err}"),
            BackendError::Descriptor(err) => write!(f, "Backend descriptor error: {err}"),
            BackendError::Resource(err) => write!(f, "Backend resource error: {err}"),
            BackendError::Pipeline(err) => write!(f, "Backend pipeline error: {err}"),
            BackendError::Frame(err) => write!(f, "Backend frame error: {err}"),
            BackendError::Driver(err) => write!(f, "Backend driver error: {err}"),
        }
    }
}

impl std::error::Error for BackendError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            BackendError::Config(err) => Some(err),
            BackendError::Descriptor(err) => Some(err),
            BackendError::Resource(err) => Some(err),
            BackendError::Pipeline(err) => Some(err),
            BackendError::Frame(err) => Some(err),
            BackendError::Driver(err) => Some(err),
        }
    }
}

impl From<ConfigError> for BackendError {
    fn from(err: ConfigError) -> Self {
        BackendError::Config(err)
    }
}

impl From<DescriptorError> for BackendError {
    fn from(err: DescriptorError) -> Self {
        BackendError::Descriptor(err)
    }
}

impl From<ResourceError> for BackendError {
    fn from(err: ResourceError) -> Self {
        BackendError::Resource(err)
    }
}

impl From<PipelineError> for BackendError {
    fn from(err: PipelineError) -> Self {
        BackendError::Pipeline(err)
    }
}

impl From<FrameError> for BackendError {
    fn from(err: FrameError) -> Self {
        BackendError::Frame(err)
    }
}

impl From<DriverError> for BackendError {
    fn from(err: DriverError) -> Self {
        BackendError::Driver(err)
    }
}

#[cfg(test)]
mod tests {
    use std::error::Error;

    use super::*;

    #[test]
    fn device_lost_maps_to_distinguished_frame_error() {
        let err: FrameError = DriverError::DeviceLost.into();
        assert_eq!(err, FrameError::DeviceLost);

        let err: FrameError = DriverError::Timeout.into();
        assert_eq!(err, FrameError::Driver(DriverError::Timeout));
        assert!(err.source().is_some());
    }

    #[test]
    fn resource_error_display_wrapping_driver_error() {
        let err: ResourceError = DriverError::OutOfMemory.into();
        assert_eq!(
            format!("{err}"),
            "Resource creation failed: The driver ran out of memory."
        );
        assert!(err.source().is_some());
    }

    #[test]
    fn backend_error_chains_sources() {
        let descriptor_err = DescriptorError::HeapCreationFailed(DriverError::OutOfMemory);
        let resource_err: ResourceError = descriptor_err.into();
        let backend_err: BackendError = resource_err.into();
        assert_eq!(
            format!("{backend_err}"),
            "Backend resource error: Descriptor allocation failed: Failed to create descriptor heap: The driver ran out of memory."
        );
        assert!(backend_err.source().unwrap().source().is_some());
    }
}
