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

use vesta_core::backend::{ColorTarget, RenderPassDesc};
use vesta_core::driver::SamplerDesc;
use vesta_core::resource::{ResourceDesc, ResourceUsage, TextureFormat};
use vesta_core::resource::ResourceState;
use vesta_core::{BackendConfig, DriverError, FrameError, NativeDevice, RenderBackend};
use vesta_infra::{logging, HeadlessDevice, HeadlessEvent, LiveObjects};

fn backend_with_swapchain(images: usize) -> RenderBackend<HeadlessDevice> {
    logging::init_for_tests();
    let device = HeadlessDevice::with_swapchain(images, 8, 8).expect("headless device");
    RenderBackend::new(device, BackendConfig::default()).expect("backend")
}

#[test]
fn test_destroyed_buffer_lives_until_its_slot_comes_back() {
    // --- 1. ARRANGE ---
    let mut backend = backend_with_swapchain(2);
    let desc = ResourceDesc::buffer("vertices", 1024, ResourceUsage::VERTEX);
    let buffer = backend.create_buffer(&desc).unwrap();
    let native = backend.resource(buffer).unwrap().native();

    // --- 2. ACT ---
    // Destroyed while recording slot 0.
    assert_eq!(backend.begin_frame().unwrap(), 0);
    assert!(backend.destroy_resource(buffer));
    backend.end_frame().unwrap();

    // --- 3. ASSERT ---
    assert!(backend.resource(buffer).is_none(), "Handle is stale at once");
    assert!(backend.device().live_resources().contains(&native));
    assert_eq!(backend.stats().pending_releases, 1);

    // Slot 1 does not free slot 0's objects.
    assert_eq!(backend.begin_frame().unwrap(), 1);
    backend.end_frame().unwrap();
    assert!(backend.device().live_resources().contains(&native));

    // Back on slot 0, its fence has passed.
    assert_eq!(backend.begin_frame().unwrap(), 0);
    assert!(!backend.device().live_resources().contains(&native));
    assert_eq!(backend.stats().pending_releases, 0);
    backend.end_frame().unwrap();

    assert!(backend.device().validation_errors().is_empty());
}

#[test]
fn test_stalled_gpu_times_out_begin_frame() {
    // --- 1. ARRANGE ---
    let mut backend = backend_with_swapchain(2);
    backend.device().set_auto_complete(false);
    for _ in 0..2 {
        backend.begin_frame().unwrap();
        backend.end_frame().unwrap();
    }

    // --- 2. ACT ---
    let stalled = backend.begin_frame();

    // --- 3. ASSERT ---
    assert_eq!(stalled, Err(FrameError::Driver(DriverError::Timeout)));
    assert!(!backend.frames().is_recording(), "Nothing was reset");

    // Once the GPU catches up, the same call succeeds.
    backend.device().complete_all();
    assert_eq!(backend.begin_frame().unwrap(), 0);
    backend.end_frame().unwrap();
    backend.device().complete_all();

    let presented = backend
        .device()
        .events()
        .into_iter()
        .filter(|event| matches!(event, HeadlessEvent::Presented { .. }))
        .count();
    assert_eq!(presented, 3);
    assert!(backend.device().validation_errors().is_empty());
}

#[test]
fn test_skipped_present_reuses_the_slot() {
    let mut backend = backend_with_swapchain(2);
    backend.device().skip_presents(true);

    assert_eq!(backend.begin_frame().unwrap(), 0);
    backend.end_frame().unwrap();
    assert_eq!(backend.begin_frame().unwrap(), 0);
    backend.end_frame().unwrap();

    backend.device().skip_presents(false);
    assert_eq!(backend.begin_frame().unwrap(), 0);
    backend.end_frame().unwrap();
    assert_eq!(backend.begin_frame().unwrap(), 1);
    backend.end_frame().unwrap();
}

#[test]
fn test_render_pass_clears_the_back_buffer() {
    // --- 1. ARRANGE ---
    let mut backend = backend_with_swapchain(2);
    backend.begin_frame().unwrap();
    let back_buffer = backend.back_buffer().expect("swapchain frame has a back buffer");
    let native = backend.resource(back_buffer).unwrap().native();

    // --- 2. ACT ---
    backend
        .begin_pass(&RenderPassDesc {
            color: vec![ColorTarget {
                texture: back_buffer,
                clear: Some([1.0, 0.0, 0.0, 1.0]),
            }],
            depth: None,
        })
        .unwrap();
    backend.end_pass().unwrap();
    backend.end_frame().unwrap();

    // --- 3. ASSERT ---
    let pixels = backend.device().read_resource(native).unwrap();
    assert_eq!(pixels.len(), 8 * 8 * 4);
    // The swapchain is BGRA.
    assert!(pixels.chunks_exact(4).all(|texel| texel == [0, 0, 255, 255]));
    assert_eq!(
        backend.device().gpu_state(native),
        Some(ResourceState::Present),
        "The back buffer goes back to Present before the present"
    );
    assert!(backend.device().validation_errors().is_empty());
}

#[test]
fn test_back_buffers_follow_the_swapchain_index() {
    let mut backend = backend_with_swapchain(3);
    let mut seen = Vec::new();
    let mut handles = Vec::new();

    for _ in 0..3 {
        backend.begin_frame().unwrap();
        let back_buffer = backend.back_buffer().unwrap();
        handles.push(back_buffer);
        seen.push(backend.resource(back_buffer).unwrap().native());
        backend.end_frame().unwrap();
    }

    let images: Vec<_> = backend
        .device()
        .swapchain_images()
        .into_iter()
        .map(|image| image.resource)
        .collect();
    assert_eq!(seen, images);

    // Swapchain images belong to the swapchain.
    assert!(!backend.destroy_resource(handles[0]));
    assert!(backend.resource(handles[0]).is_some());
}

#[test]
fn test_device_loss_is_reported_and_teardown_still_succeeds() {
    // --- 1. ARRANGE ---
    let mut backend = backend_with_swapchain(2);
    backend.begin_frame().unwrap();
    backend.end_frame().unwrap();

    // --- 2. ACT ---
    backend.device().lose_device();
    let result = backend.begin_frame();

    // --- 3. ASSERT ---
    assert_eq!(result, Err(FrameError::DeviceLost));
    assert!(backend.frames().is_device_lost());
    assert_eq!(backend.begin_frame(), Err(FrameError::DeviceLost));
    backend.destroy();
    assert!(backend
        .device()
        .events()
        .contains(&HeadlessEvent::DeviceLost));
}

#[test]
fn test_teardown_releases_every_native_object() {
    // --- 1. ARRANGE ---
    let mut backend = backend_with_swapchain(2);
    let buffer = backend
        .create_buffer(&ResourceDesc::buffer(
            "constants",
            256,
            ResourceUsage::UNIFORM | ResourceUsage::COPY_DST,
        ))
        .unwrap();
    let target = backend
        .create_render_target("offscreen", 16, 16, TextureFormat::Rgba8Unorm)
        .unwrap();
    let _sampler = backend.create_sampler(SamplerDesc::default()).unwrap();
    let _leaked = backend
        .create_texture(&ResourceDesc::texture(
            "leaked",
            4,
            4,
            TextureFormat::Rgba8Unorm,
            ResourceUsage::SHADER_READ,
        ))
        .unwrap();

    backend.begin_frame().unwrap();
    backend.destroy_resource(buffer);
    backend.end_frame().unwrap();
    backend.begin_frame().unwrap();
    backend.destroy_resource(target);
    backend.end_frame().unwrap();

    // --- 2. ACT ---
    backend.destroy();

    // --- 3. ASSERT ---
    // Only the swapchain images remain: they belong to the swapchain.
    assert_eq!(
        backend.device().live_objects(),
        LiveObjects {
            resources: 2,
            ..LiveObjects::default()
        }
    );
    assert!(backend.device().validation_errors().is_empty());

    // A second teardown is a no-op.
    backend.destroy();
    assert!(backend.device().validation_errors().is_empty());
}
