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

//! # Vesta Core
//!
//! Backend-agnostic core of an explicit graphics API backend: resource pools with
//! generational handles, deferred release synchronized with GPU fences, CPU and
//! shader-visible descriptor allocation, resource barrier generation, staging
//! memory, frame scheduling and the shader-resource binding visitor.
//!
//! The native graphics API is only ever reached through the [`NativeDevice`] trait.
//! Concrete implementations live in the `vesta-infra` crate.

#![warn(missing_docs)]

pub mod backend;
pub mod barrier;
pub mod binding;
pub mod config;
pub mod descriptor;
pub mod driver;
pub mod error;
pub mod frame;
pub mod pool;
pub mod release;
pub mod resource;
pub mod staging;

pub use backend::{BackendStats, RenderBackend};
pub use config::BackendConfig;
pub use driver::NativeDevice;
pub use error::{
    BackendError, ConfigError, DescriptorError, DriverError, FrameError, PipelineError,
    ResourceError,
};
pub use pool::{Handle, ObjectPool};
