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

//! The simulated GPU timeline.

use vesta_core::driver::{
    ColorAttachment, DepthAttachment, GpuCommand, NativeBarrier, NativeCommandList, NativeFence,
    NativeResource, ViewDesc,
};
use vesta_core::resource::{ResourceKind, ResourceState, TextureFormat};

use super::{HeadlessEvent, HeadlessState};

/// Work waiting on the queue.
#[derive(Debug)]
pub(super) enum QueueItem {
    Execute {
        list: NativeCommandList,
        commands: Vec<GpuCommand>,
    },
    Signal {
        fence: NativeFence,
        value: u64,
    },
}

/// Executes the oldest queued item.
pub(super) fn step(state: &mut HeadlessState) -> bool {
    let Some(item) = state.queue.pop_front() else {
        return false;
    };
    match item {
        QueueItem::Execute { list, commands } => {
            for command in &commands {
                execute(state, command);
            }
            if let Some(list) = state.lists.get_mut(&list) {
                list.in_flight = list.in_flight.saturating_sub(1);
            }
        }
        QueueItem::Signal { fence, value } => {
            if let Some(fence_state) = state.fences.get_mut(&fence) {
                fence_state.completed = fence_state.completed.max(value);
            }
            state
                .events
                .push(HeadlessEvent::FenceCompleted { fence, value });
        }
    }
    true
}

/// Executes everything queued.
pub(super) fn drain(state: &mut HeadlessState) {
    while step(state) {}
}

/// Executes queued items until `fence` reaches `value`. Returns whether it did.
pub(super) fn drain_until(state: &mut HeadlessState, fence: NativeFence, value: u64) -> bool {
    loop {
        let completed = state.fences.get(&fence).map_or(0, |f| f.completed);
        if completed >= value {
            return true;
        }
        if !step(state) {
            return false;
        }
    }
}

fn execute(state: &mut HeadlessState, command: &GpuCommand) {
    match command {
        GpuCommand::Barriers(barriers) => {
            for barrier in barriers {
                apply_barrier(state, barrier);
            }
        }
        GpuCommand::BeginRenderPass { color, depth } => {
            for attachment in color {
                clear_color(state, attachment);
            }
            if let Some(attachment) = depth {
                clear_depth(state, attachment);
            }
        }
        GpuCommand::Draw { .. } | GpuCommand::DrawIndexed { .. } => state.draws += 1,
        GpuCommand::Dispatch { .. } => state.dispatches += 1,
        GpuCommand::CopyBuffer {
            src,
            src_offset,
            dst,
            dst_offset,
            size,
        } => copy_buffer(state, *src, *src_offset, *dst, *dst_offset, *size),
        GpuCommand::CopyBufferToTexture {
            src,
            src_offset,
            bytes_per_row,
            dst,
            width,
            height,
        } => {
            let rows = RowCopy {
                width: *width,
                height: *height,
                bytes_per_row: *bytes_per_row,
            };
            copy_rows(state, *src, *src_offset, *dst, 0, rows, RowSide::Source);
        }
        GpuCommand::CopyTextureToBuffer {
            src,
            dst,
            dst_offset,
            bytes_per_row,
            width,
            height,
        } => {
            let rows = RowCopy {
                width: *width,
                height: *height,
                bytes_per_row: *bytes_per_row,
            };
            copy_rows(state, *src, 0, *dst, *dst_offset, rows, RowSide::Destination);
        }
        // Binding commands only matter to real shaders.
        _ => {}
    }
}

fn apply_barrier(state: &mut HeadlessState, barrier: &NativeBarrier) {
    let NativeBarrier::Transition {
        resource,
        before,
        after,
    } = *barrier
    else {
        return;
    };
    let message = match state.resources.get_mut(&resource) {
        Some(host) if host.gpu_state == before => {
            host.gpu_state = after;
            return;
        }
        Some(host) => format!(
            "barrier on {resource:?} expects {before:?} but the resource is in {:?}",
            host.gpu_state
        ),
        None => format!("barrier on unknown resource {resource:?}"),
    };
    state.validation_error(message);
}

fn expect_state(
    state: &mut HeadlessState,
    resource: NativeResource,
    expected: ResourceState,
) -> bool {
    let message = match state.resources.get(&resource) {
        Some(host) if host.gpu_state == expected => return true,
        Some(host) => format!(
            "{resource:?} used as {expected:?} while in {:?}",
            host.gpu_state
        ),
        None => format!("unknown resource {resource:?}"),
    };
    state.validation_error(message);
    false
}

fn copy_buffer(
    state: &mut HeadlessState,
    src: NativeResource,
    src_offset: u64,
    dst: NativeResource,
    dst_offset: u64,
    size: u64,
) {
    if !expect_state(state, src, ResourceState::CopySource)
        || !expect_state(state, dst, ResourceState::CopyDest)
    {
        return;
    }
    let Some(bytes) = read_range(state, src, src_offset, size) else {
        return;
    };
    write_range(state, dst, dst_offset, &bytes);
}

#[derive(Debug, Clone, Copy)]
struct RowCopy {
    width: u32,
    height: u32,
    bytes_per_row: u32,
}

/// Which end of a row copy is the pitched buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RowSide {
    Source,
    Destination,
}

fn copy_rows(
    state: &mut HeadlessState,
    src: NativeResource,
    src_offset: u64,
    dst: NativeResource,
    dst_offset: u64,
    rows: RowCopy,
    buffer_side: RowSide,
) {
    if !expect_state(state, src, ResourceState::CopySource)
        || !expect_state(state, dst, ResourceState::CopyDest)
    {
        return;
    }
    let texture = if buffer_side == RowSide::Source { dst } else { src };
    let Some(texel_size) = texel_size(state, texture) else {
        state.validation_error(format!("{texture:?} is not a texture"));
        return;
    };
    let packed = rows.width as u64 * texel_size as u64;
    if (rows.bytes_per_row as u64) < packed {
        state.validation_error(format!(
            "row pitch {} is smaller than a row of {packed} bytes",
            rows.bytes_per_row
        ));
        return;
    }
    for row in 0..rows.height as u64 {
        let (from, to) = match buffer_side {
            RowSide::Source => (src_offset + row * rows.bytes_per_row as u64, row * packed),
            RowSide::Destination => (row * packed, dst_offset + row * rows.bytes_per_row as u64),
        };
        let Some(bytes) = read_range(state, src, from, packed) else {
            return;
        };
        if !write_range(state, dst, to, &bytes) {
            return;
        }
    }
}

fn texel_size(state: &HeadlessState, resource: NativeResource) -> Option<u32> {
    match state.resources.get(&resource)?.desc.kind {
        ResourceKind::Texture2D { format, .. } => Some(format.bytes_per_texel()),
        ResourceKind::Buffer => None,
    }
}

fn read_range(
    state: &mut HeadlessState,
    resource: NativeResource,
    offset: u64,
    size: u64,
) -> Option<Vec<u8>> {
    let range = state.resources.get(&resource).and_then(|host| {
        let end = offset.checked_add(size)?;
        host.memory.get(offset as usize..end as usize).map(<[u8]>::to_vec)
    });
    if range.is_none() {
        state.validation_error(format!(
            "read of {size} bytes at {offset} is outside of {resource:?}"
        ));
    }
    range
}

fn write_range(
    state: &mut HeadlessState,
    resource: NativeResource,
    offset: u64,
    bytes: &[u8],
) -> bool {
    let written = state.resources.get_mut(&resource).and_then(|host| {
        let end = offset as usize + bytes.len();
        host.memory
            .get_mut(offset as usize..end)
            .map(|range| range.copy_from_slice(bytes))
    });
    if written.is_none() {
        state.validation_error(format!(
            "write of {} bytes at {offset} is outside of {resource:?}",
            bytes.len()
        ));
    }
    written.is_some()
}

fn clear_color(state: &mut HeadlessState, attachment: &ColorAttachment) {
    let Some(ViewDesc::RenderTarget { resource, format }) =
        state.descriptors.get(&attachment.view).cloned()
    else {
        state.validation_error(format!(
            "color attachment {:?} is not a render target view",
            attachment.view
        ));
        return;
    };
    if !expect_state(state, resource, ResourceState::RenderTarget) {
        return;
    }
    if let Some(color) = attachment.clear {
        match encode_color(format, color) {
            Some(texel) => fill(state, resource, &texel),
            None => log::trace!("Clear of {format:?} targets is not simulated"),
        }
    }
}

fn clear_depth(state: &mut HeadlessState, attachment: &DepthAttachment) {
    let Some(ViewDesc::DepthStencil { resource, format }) =
        state.descriptors.get(&attachment.view).cloned()
    else {
        state.validation_error(format!(
            "depth attachment {:?} is not a depth view",
            attachment.view
        ));
        return;
    };
    if !expect_state(state, resource, ResourceState::DepthWrite) {
        return;
    }
    if let Some(depth) = attachment.clear {
        let texel = match format {
            TextureFormat::Depth32Float => depth.to_le_bytes(),
            _ => (((depth.clamp(0.0, 1.0) * 16_777_215.0).round() as u32) & 0x00ff_ffff)
                .to_le_bytes(),
        };
        fill(state, resource, &texel);
    }
}

fn unorm8(value: f32) -> u8 {
    (value.clamp(0.0, 1.0) * 255.0).round() as u8
}

/// The bytes of one texel of `format` holding `color`.
pub(super) fn encode_color(format: TextureFormat, [r, g, b, a]: [f32; 4]) -> Option<Vec<u8>> {
    match format {
        TextureFormat::Rgba8Unorm => Some(vec![unorm8(r), unorm8(g), unorm8(b), unorm8(a)]),
        TextureFormat::Bgra8Unorm => Some(vec![unorm8(b), unorm8(g), unorm8(r), unorm8(a)]),
        TextureFormat::R32Float => Some(r.to_le_bytes().to_vec()),
        _ => None,
    }
}

fn fill(state: &mut HeadlessState, resource: NativeResource, texel: &[u8]) {
    if let Some(host) = state.resources.get_mut(&resource) {
        for chunk in host.memory.chunks_exact_mut(texel.len()) {
            chunk.copy_from_slice(texel);
        }
    }
}
