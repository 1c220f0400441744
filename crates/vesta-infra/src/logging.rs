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

//! Logger initialisation.
//!
//! The filter defaults to `info` and can be overridden with `RUST_LOG`.

use env_logger::{Builder, Env};

fn builder() -> Builder {
    Builder::from_env(Env::default().default_filter_or("info"))
}

/// Installs the global logger. Panics if a logger is already installed.
pub fn init() {
    builder().init();
}

/// Installs a logger that writes through the test harness's capture.
///
/// Safe to call from every test: only the first call installs it.
pub fn init_for_tests() {
    let _ = builder().is_test(true).try_init();
}
