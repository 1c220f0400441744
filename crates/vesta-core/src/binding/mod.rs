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

//! Mapping of abstract resource bindings to native registers and tables.
//!
//! A single traversal, [`visit_bindings`], serves two call sites that only differ
//! in the [`BindingVisitor`] they pass in:
//! - [`RootLayoutBuilder`] turns the bindings into a root layout when a pipeline is created.
//! - [`DescriptorWriter`] resolves the bound resources into descriptor copies and
//!   root bindings at draw time.

mod root_layout;
mod stage;
mod visitor;
mod writer;

pub use self::root_layout::*;
pub use self::stage::*;
pub use self::visitor::*;
pub use self::writer::*;
