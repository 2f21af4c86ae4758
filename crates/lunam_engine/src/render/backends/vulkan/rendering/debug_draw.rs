//! Immediate-mode debug lines
//!
//! [`DebugBatch`] collects colored line segments on the CPU and groups them
//! into draw commands sharing depth testing and distance fade. Once per
//! frame, [`DebugDraw::prepare`] copies the batch into the ring slot's region
//! of a persistently mapped vertex buffer and hands back a [`DebugDrawList`]
//! that any render thread can record, whole or by command range.
//!
//! The batch holds at most `debug_draw_vertex_cap` vertices. Lines past the
//! cap are dropped and reported once per frame.

use std::ops::Range;
use std::sync::Arc;

use ash::vk;
use bytemuck::{Pod, Zeroable};
use nalgebra::{Rotation3, Unit};

use super::pipeline::{GraphicsRecipe, Pipeline, PipelineHandles};
use super::shader::{ShaderStage, ShaderVariant};
use crate::foundation::math::{Mat4, Vec3};
use crate::render::backends::vulkan::initialization::device::Device;
use crate::render::backends::vulkan::resources::buffer::{GpuBuffer, MemoryLocation};
use crate::render::backends::vulkan::resources::frame_data::SET_IDX_PER_FRAME;
use crate::render::backends::vulkan::state::context::GraphicsContext;
use crate::render::backends::vulkan::{VulkanError, VulkanResult};

/// Vertex stage of the line pipelines
pub const DEBUG_LINE_VERTEX_SHADER: &str = "engine_assets/shaders/debug_line.vert";
/// Fragment stage of the line pipelines
pub const DEBUG_LINE_FRAGMENT_SHADER: &str = "engine_assets/shaders/debug_line.frag";
/// Pipeline used by depth-tested commands
pub const PIPELINE_LINES_DEPTH: &str = "debug_lines_depth";
/// Pipeline used by commands drawn on top of the scene
pub const PIPELINE_LINES_NO_DEPTH: &str = "debug_lines_no_depth";

const FADE_PUSH_SIZE: u32 = std::mem::size_of::<[f32; 4]>() as u32;
const ARROW_SPOKES: usize = 8;

/// Line vertex as laid out in the vertex buffer
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct DebugVertex {
    /// World position
    pub pos: [f32; 3],
    /// Linear RGB
    pub color: [f32; 3],
}

impl DebugVertex {
    fn new(pos: &Vec3, color: &Vec3) -> Self {
        Self {
            pos: [pos.x, pos.y, pos.z],
            color: [color.x, color.y, color.z],
        }
    }

    /// Per-vertex binding 0
    pub fn binding() -> vk::VertexInputBindingDescription {
        vk::VertexInputBindingDescription {
            binding: 0,
            stride: std::mem::size_of::<Self>() as u32,
            input_rate: vk::VertexInputRate::VERTEX,
        }
    }

    /// Position at location 0, color at location 1
    pub fn attributes() -> [vk::VertexInputAttributeDescription; 2] {
        [
            vk::VertexInputAttributeDescription {
                location: 0,
                binding: 0,
                format: vk::Format::R32G32B32_SFLOAT,
                offset: 0,
            },
            vk::VertexInputAttributeDescription {
                location: 1,
                binding: 0,
                format: vk::Format::R32G32B32_SFLOAT,
                offset: std::mem::size_of::<[f32; 3]>() as u32,
            },
        ]
    }
}

/// Fade lines out between `start` and `end` world units from the camera
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DistanceFade {
    /// Distance where fading begins
    pub start: f32,
    /// Distance where lines are fully transparent
    pub end: f32,
}

/// A run of line-list vertices drawn with the same state
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DebugDrawCommand {
    /// First vertex within the frame's vertex range
    pub first_vertex: u32,
    /// Vertex count, always even
    pub num_vertices: u32,
    /// Test against the scene depth buffer
    pub depth_test: bool,
    /// Optional distance fade
    pub fade: Option<DistanceFade>,
}

impl DebugDrawCommand {
    /// Fragment push constants: x is the fade start (negative disables), y the fade end
    pub fn fade_params(&self) -> [f32; 4] {
        match self.fade {
            Some(fade) => [fade.start, fade.end, 0.0, 0.0],
            None => [-1.0, 0.0, 0.0, 0.0],
        }
    }
}

/// CPU-side line collector
#[derive(Debug)]
pub struct DebugBatch {
    vertex_cap: usize,
    vertices: Vec<DebugVertex>,
    commands: Vec<DebugDrawCommand>,
    depth_test: bool,
    fade: Option<DistanceFade>,
    merging: bool,
    batch_open: bool,
    dropped: usize,
}

impl DebugBatch {
    /// Empty batch holding at most `vertex_cap` vertices
    pub fn new(vertex_cap: usize) -> Self {
        Self {
            vertex_cap,
            vertices: Vec::new(),
            commands: Vec::new(),
            depth_test: false,
            fade: None,
            merging: false,
            batch_open: false,
            dropped: 0,
        }
    }

    /// Depth test lines added from now on
    pub fn set_depth_test(&mut self, enable: bool) {
        self.depth_test = enable;
    }

    /// Whether new lines are depth tested
    pub fn depth_test(&self) -> bool {
        self.depth_test
    }

    /// Fade lines added from now on, or stop fading with `None`
    pub fn set_distance_fade(&mut self, fade: Option<DistanceFade>) {
        self.fade = fade;
    }

    /// Fade applied to new lines
    pub fn distance_fade(&self) -> Option<DistanceFade> {
        self.fade
    }

    /// Run `draw`, merging every line it adds into a single draw command
    ///
    /// State changes inside the closure do not split the command. Nested
    /// calls join the outer batch.
    pub fn batch(&mut self, draw: impl FnOnce(&mut Self)) {
        if self.merging {
            draw(self);
            return;
        }
        self.merging = true;
        self.batch_open = false;
        draw(self);
        self.merging = false;
        self.batch_open = false;
    }

    /// Line from `from` to `to`
    pub fn draw_line(&mut self, from: &Vec3, to: &Vec3, color: &Vec3) {
        if self.vertices.len() + 2 > self.vertex_cap {
            self.dropped += 1;
            return;
        }
        let first_vertex = self.vertices.len() as u32;
        self.vertices.push(DebugVertex::new(from, color));
        self.vertices.push(DebugVertex::new(to, color));

        if self.merging && self.batch_open {
            if let Some(last) = self.commands.last_mut() {
                last.num_vertices += 2;
                return;
            }
        }
        self.commands.push(DebugDrawCommand {
            first_vertex,
            num_vertices: 2,
            depth_test: self.depth_test,
            fade: self.fade,
        });
        self.batch_open = self.merging;
    }

    /// Line with a cone of spokes at `to`
    pub fn draw_arrow(&mut self, from: &Vec3, to: &Vec3, color: &Vec3, head_length: f32) {
        let Some(dir) = Unit::try_new(to - from, f32::EPSILON) else {
            return;
        };
        let side = if dir.y.abs() > 0.99 { Vec3::x() } else { Vec3::y() };
        let perp = dir.cross(&side).normalize() * (head_length * 0.35);
        let base = to - dir.into_inner() * head_length;
        self.batch(|batch| {
            batch.draw_line(from, to, color);
            for i in 0..ARROW_SPOKES {
                let angle = std::f32::consts::TAU * i as f32 / ARROW_SPOKES as f32;
                let spoke = Rotation3::from_axis_angle(&dir, angle) * perp;
                batch.draw_line(to, &(base + spoke), color);
            }
        });
    }

    /// Arrow starting at `from` pointing along `dir`
    pub fn draw_arrow_dir(&mut self, from: &Vec3, dir: &Vec3, color: &Vec3, head_length: f32) {
        self.draw_arrow(from, &(from + dir), color, head_length);
    }

    /// Grid on the XZ plane at `center.y`, reaching `half_extent` out from `center`
    pub fn draw_grid(&mut self, center: &Vec3, half_extent: f32, step: f32, color: &Vec3) {
        if step <= 0.0 || half_extent < 0.0 {
            return;
        }
        let lines = (half_extent / step).floor() as i32;
        let reach = lines as f32 * step;
        self.batch(|batch| {
            for i in -lines..=lines {
                let offset = i as f32 * step;
                batch.draw_line(
                    &Vec3::new(center.x + offset, center.y, center.z - reach),
                    &Vec3::new(center.x + offset, center.y, center.z + reach),
                    color,
                );
                batch.draw_line(
                    &Vec3::new(center.x - reach, center.y, center.z + offset),
                    &Vec3::new(center.x + reach, center.y, center.z + offset),
                    color,
                );
            }
        });
    }

    /// Axis-aligned box from its corners
    pub fn draw_aabb(&mut self, min: &Vec3, max: &Vec3, color: &Vec3) {
        let corners = box_corners(min, max);
        self.draw_box(&corners, color);
    }

    /// Box of `half_extents` around `center`, transformed by `model`
    pub fn draw_obb(&mut self, center: &Vec3, half_extents: &Vec3, model: &Mat4, color: &Vec3) {
        let corners = box_corners(&(center - half_extents), &(center + half_extents))
            .map(|corner| model.transform_point(&corner.into()).coords);
        self.draw_box(&corners, color);
    }

    /// Red, green and blue lines along the X, Y and Z axes of `transform`
    pub fn draw_transform(&mut self, transform: &Mat4, axis_length: f32) {
        let origin = transform.fixed_view::<3, 1>(0, 3).into_owned();
        let colors = [Vec3::x(), Vec3::y(), Vec3::z()];
        self.batch(|batch| {
            for (axis, color) in colors.iter().enumerate() {
                let column = transform.fixed_view::<3, 1>(0, axis).into_owned();
                let Some(dir) = column.try_normalize(f32::EPSILON) else {
                    continue;
                };
                batch.draw_line(&origin, &(origin + dir * axis_length), color);
            }
        });
    }

    fn draw_box(&mut self, corners: &[Vec3; 8], color: &Vec3) {
        const EDGES: [(usize, usize); 12] = [
            (0, 1), (1, 3), (3, 2), (2, 0),
            (4, 5), (5, 7), (7, 6), (6, 4),
            (0, 4), (1, 5), (2, 6), (3, 7),
        ];
        self.batch(|batch| {
            for (a, b) in EDGES {
                batch.draw_line(&corners[a], &corners[b], color);
            }
        });
    }

    /// Collected vertices
    pub fn vertices(&self) -> &[DebugVertex] {
        &self.vertices
    }

    /// Collected draw commands
    pub fn commands(&self) -> &[DebugDrawCommand] {
        &self.commands
    }

    /// Lines rejected since the last [`Self::clear`] because the cap was reached
    pub fn dropped(&self) -> usize {
        self.dropped
    }

    /// Vertex budget
    pub fn vertex_cap(&self) -> usize {
        self.vertex_cap
    }

    /// Whether nothing was drawn
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Forget every line; depth test and fade settings are kept
    pub fn clear(&mut self) {
        self.vertices.clear();
        self.commands.clear();
        self.dropped = 0;
    }
}

/// Corners indexed by bit: 1 selects max x, 2 max y, 4 max z
fn box_corners(min: &Vec3, max: &Vec3) -> [Vec3; 8] {
    std::array::from_fn(|i| {
        Vec3::new(
            if i & 1 == 0 { min.x } else { max.x },
            if i & 2 == 0 { min.y } else { max.y },
            if i & 4 == 0 { min.z } else { max.z },
        )
    })
}

/// Line-list recipe drawing [`DebugVertex`] data with the per-frame set at set 0
pub fn line_recipe(
    name: &str,
    depth_test: bool,
    render_pass: vk::RenderPass,
    samples: vk::SampleCountFlags,
    frame_layout: vk::DescriptorSetLayout,
) -> GraphicsRecipe {
    let compare_op = if depth_test { vk::CompareOp::LESS_OR_EQUAL } else { vk::CompareOp::ALWAYS };
    GraphicsRecipe::new(name, render_pass)
        .with_shader(ShaderVariant::new(DEBUG_LINE_VERTEX_SHADER, ShaderStage::Vertex))
        .with_shader(ShaderVariant::new(DEBUG_LINE_FRAGMENT_SHADER, ShaderStage::Fragment))
        .with_set_layouts(&[frame_layout])
        .with_push_constants(vk::ShaderStageFlags::FRAGMENT, 0, FADE_PUSH_SIZE)
        .with_vertex_input(&[DebugVertex::binding()], &DebugVertex::attributes())
        .with_topology(vk::PrimitiveTopology::LINE_LIST)
        .with_cull_mode(vk::CullModeFlags::NONE)
        .with_depth(depth_test, false, compare_op)
        .with_samples(samples)
        .with_alpha_blending()
}

/// Debug line renderer bound to a [`GraphicsContext`]
pub struct DebugDraw {
    batch: DebugBatch,
    vertex_buffer: GpuBuffer,
    slot_stride: vk::DeviceSize,
    slots: usize,
}

impl DebugDraw {
    /// Allocate the vertex ring and register both line pipelines
    ///
    /// With `force_success`, a pipeline that fails to build panics inside
    /// [`PipelineCache::register_pipeline`](super::pipeline_cache::PipelineCache::register_pipeline).
    pub fn new(context: &mut GraphicsContext, force_success: bool) -> VulkanResult<Self> {
        let vertex_cap = context.config().debug_draw_vertex_cap;
        let slots = context.concurrent_frames();
        let slot_stride = (vertex_cap * std::mem::size_of::<DebugVertex>()) as vk::DeviceSize;
        let size = (slot_stride * slots as vk::DeviceSize).max(std::mem::size_of::<DebugVertex>() as vk::DeviceSize);
        let vertex_buffer = GpuBuffer::new(
            Arc::clone(context.device()),
            size,
            vk::BufferUsageFlags::VERTEX_BUFFER,
            MemoryLocation::CpuToGpu,
            true,
        )?;

        let render_pass = context.render_pass();
        let samples = context.samples();
        let frame_layout = context.shared_buffers().descriptor_set_layout();
        for (name, depth_test) in [(PIPELINE_LINES_DEPTH, true), (PIPELINE_LINES_NO_DEPTH, false)] {
            let recipe = line_recipe(name, depth_test, render_pass, samples, frame_layout);
            if !context.pipelines_mut().register_pipeline(recipe, force_success) {
                return Err(VulkanError::InitializationFailed(format!(
                    "debug line pipeline '{name}' failed to build"
                )));
            }
        }

        log::info!("[DEBUG_DRAW] Ready: {vertex_cap} vertices per frame, {slots} slots");
        Ok(Self {
            batch: DebugBatch::new(vertex_cap),
            vertex_buffer,
            slot_stride,
            slots,
        })
    }

    /// Line collector for the current frame
    pub fn batch(&mut self) -> &mut DebugBatch {
        &mut self.batch
    }

    /// Upload this frame's lines into `slot` and empty the batch
    ///
    /// `slot` must be the ring slot of the frame being recorded, so its
    /// previous contents are no longer read by the GPU.
    pub fn prepare(&mut self, context: &GraphicsContext, slot: usize) -> VulkanResult<DebugDrawList> {
        if slot >= self.slots {
            return Err(VulkanError::InvalidOperation {
                reason: format!("debug draw slot {slot} out of range for {} slots", self.slots),
            });
        }
        let handles = |name: &str| {
            context
                .pipelines()
                .try_get_pipeline(name)
                .map(Pipeline::handles)
                .ok_or_else(|| VulkanError::InvalidOperation {
                    reason: format!("pipeline '{name}' is not registered"),
                })
        };
        let depth = handles(PIPELINE_LINES_DEPTH)?;
        let no_depth = handles(PIPELINE_LINES_NO_DEPTH)?;

        if self.batch.dropped() > 0 {
            log::warn!(
                "[DEBUG_DRAW] Vertex cap of {} reached, dropped {} lines",
                self.batch.vertex_cap(),
                self.batch.dropped()
            );
        }
        let vertex_offset = self.slot_stride * slot as vk::DeviceSize;
        let bytes: &[u8] = bytemuck::cast_slice(self.batch.vertices());
        if !bytes.is_empty() {
            self.vertex_buffer.write(vertex_offset, bytes)?;
        }

        let list = DebugDrawList {
            commands: self.batch.commands().to_vec(),
            vertex_buffer: self.vertex_buffer.handle(),
            vertex_offset,
            depth,
            no_depth,
            frame_set: context.shared_buffers().descriptor_set(),
            dynamic_offset: context.shared_buffers().dynamic_offset(slot),
        };
        self.batch.clear();
        Ok(list)
    }
}

/// One frame's uploaded debug lines, ready to record
#[derive(Debug, Clone)]
pub struct DebugDrawList {
    commands: Vec<DebugDrawCommand>,
    vertex_buffer: vk::Buffer,
    vertex_offset: vk::DeviceSize,
    depth: PipelineHandles,
    no_depth: PipelineHandles,
    frame_set: vk::DescriptorSet,
    dynamic_offset: u32,
}

impl DebugDrawList {
    /// Draw commands in submission order
    pub fn commands(&self) -> &[DebugDrawCommand] {
        &self.commands
    }

    /// Number of draw commands
    pub fn len(&self) -> usize {
        self.commands.len()
    }

    /// Whether there is nothing to draw
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Record the commands in `range` into `cmd`
    ///
    /// `cmd` must be recording inside the scene render pass with viewport
    /// and scissor set. Out-of-range commands are ignored.
    pub fn record(&self, device: &Device, cmd: vk::CommandBuffer, range: Range<usize>) {
        let end = range.end.min(self.commands.len());
        let commands = &self.commands[range.start.min(end)..end];
        if commands.is_empty() {
            return;
        }

        let logical = device.logical();
        let mut bound: Option<vk::Pipeline> = None;
        unsafe {
            logical.cmd_bind_vertex_buffers(cmd, 0, &[self.vertex_buffer], &[self.vertex_offset]);
            for command in commands {
                let handles = if command.depth_test { self.depth } else { self.no_depth };
                if bound != Some(handles.pipeline) {
                    logical.cmd_bind_pipeline(cmd, vk::PipelineBindPoint::GRAPHICS, handles.pipeline);
                    // Both line pipelines share one layout shape, so the set survives a switch.
                    if bound.is_none() {
                        logical.cmd_bind_descriptor_sets(
                            cmd,
                            vk::PipelineBindPoint::GRAPHICS,
                            handles.layout,
                            SET_IDX_PER_FRAME,
                            &[self.frame_set],
                            &[self.dynamic_offset],
                        );
                    }
                    bound = Some(handles.pipeline);
                }
                logical.cmd_push_constants(
                    cmd,
                    handles.layout,
                    vk::ShaderStageFlags::FRAGMENT,
                    0,
                    bytemuck::bytes_of(&command.fade_params()),
                );
                logical.cmd_draw(cmd, command.num_vertices, 1, command.first_vertex, 0);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::backends::vulkan::rendering::pipeline::PipelineRecipe;
    use approx::assert_relative_eq;
    use ash::vk::Handle;

    fn red() -> Vec3 {
        Vec3::new(1.0, 0.0, 0.0)
    }

    #[test]
    fn test_unbatched_lines_get_own_commands() {
        let mut batch = DebugBatch::new(64);
        batch.draw_line(&Vec3::zeros(), &Vec3::x(), &red());
        batch.set_depth_test(true);
        batch.draw_line(&Vec3::zeros(), &Vec3::y(), &red());

        assert_eq!(batch.vertices().len(), 4);
        let commands = batch.commands();
        assert_eq!(commands.len(), 2);
        assert_eq!((commands[0].first_vertex, commands[0].num_vertices), (0, 2));
        assert!(!commands[0].depth_test);
        assert_eq!((commands[1].first_vertex, commands[1].num_vertices), (2, 2));
        assert!(commands[1].depth_test);
    }

    #[test]
    fn test_aabb_is_one_command_of_twelve_lines() {
        let mut batch = DebugBatch::new(64);
        batch.draw_line(&Vec3::zeros(), &Vec3::x(), &red());
        batch.draw_aabb(&Vec3::new(-1.0, -1.0, -1.0), &Vec3::new(1.0, 1.0, 1.0), &red());

        let commands = batch.commands();
        assert_eq!(commands.len(), 2);
        assert_eq!(commands[1].first_vertex, 2);
        assert_eq!(commands[1].num_vertices, 24);
        for v in &batch.vertices()[2..] {
            assert!(v.pos.iter().all(|c| c.abs() == 1.0));
        }
    }

    #[test]
    fn test_nested_batches_merge_into_outer() {
        let mut batch = DebugBatch::new(256);
        batch.batch(|b| {
            b.draw_line(&Vec3::zeros(), &Vec3::x(), &red());
            b.draw_aabb(&Vec3::zeros(), &Vec3::new(1.0, 1.0, 1.0), &red());
        });
        batch.draw_line(&Vec3::zeros(), &Vec3::z(), &red());

        let commands = batch.commands();
        assert_eq!(commands.len(), 2);
        assert_eq!(commands[0].num_vertices, 26);
        assert_eq!(commands[1].first_vertex, 26);
    }

    #[test]
    fn test_grid_line_count() {
        let mut batch = DebugBatch::new(1024);
        batch.draw_grid(&Vec3::new(0.0, -0.5, 0.0), 5.0, 1.0, &red());
        assert_eq!(batch.commands().len(), 1);
        assert_eq!(batch.vertices().len(), 2 * 2 * 11);
        assert!(batch.vertices().iter().all(|v| v.pos[1] == -0.5));

        batch.clear();
        batch.draw_grid(&Vec3::zeros(), 5.0, 0.0, &red());
        assert!(batch.is_empty());
    }

    #[test]
    fn test_vertex_cap_drops_excess_lines() {
        let mut batch = DebugBatch::new(6);
        for _ in 0..5 {
            batch.draw_line(&Vec3::zeros(), &Vec3::x(), &red());
        }
        assert_eq!(batch.vertices().len(), 6);
        assert_eq!(batch.dropped(), 2);

        batch.clear();
        assert_eq!(batch.dropped(), 0);
        batch.draw_aabb(&Vec3::zeros(), &Vec3::new(1.0, 1.0, 1.0), &red());
        assert_eq!(batch.vertices().len(), 6);
        assert_eq!(batch.commands().len(), 1);
        assert_eq!(batch.commands()[0].num_vertices, 6);
    }

    #[test]
    fn test_transform_axes_ignore_scale() {
        let mut batch = DebugBatch::new(64);
        let transform = Mat4::new_translation(&Vec3::new(1.0, 2.0, 3.0)) * Mat4::new_scaling(4.0);
        batch.draw_transform(&transform, 0.5);

        let v = batch.vertices();
        assert_eq!(v.len(), 6);
        assert_eq!(v[0].pos, [1.0, 2.0, 3.0]);
        assert_relative_eq!(v[1].pos[0], 1.5);
        assert_relative_eq!(v[3].pos[1], 2.5);
        assert_relative_eq!(v[5].pos[2], 3.5);
        assert_eq!(v[3].color, [0.0, 1.0, 0.0]);
    }

    #[test]
    fn test_arrow_spokes_end_behind_tip() {
        let mut batch = DebugBatch::new(64);
        batch.draw_arrow(&Vec3::zeros(), &Vec3::new(0.0, 0.0, 2.0), &red(), 0.5);

        assert_eq!(batch.commands().len(), 1);
        assert_eq!(batch.vertices().len(), 2 * (1 + ARROW_SPOKES));
        for spoke in batch.vertices()[2..].chunks(2) {
            assert_eq!(spoke[0].pos, [0.0, 0.0, 2.0]);
            assert_relative_eq!(spoke[1].pos[2], 1.5, epsilon = 1e-5);
        }

        batch.clear();
        batch.draw_arrow(&Vec3::x(), &Vec3::x(), &red(), 0.5);
        assert!(batch.is_empty());
    }

    #[test]
    fn test_fade_params_encode_disabled_fade() {
        let mut batch = DebugBatch::new(8);
        batch.draw_line(&Vec3::zeros(), &Vec3::x(), &red());
        batch.set_distance_fade(Some(DistanceFade { start: 10.0, end: 20.0 }));
        batch.draw_line(&Vec3::zeros(), &Vec3::x(), &red());

        assert_eq!(batch.commands()[0].fade_params()[0], -1.0);
        assert_eq!(batch.commands()[1].fade_params(), [10.0, 20.0, 0.0, 0.0]);
    }

    #[test]
    fn test_line_recipe_state() {
        let pass = vk::RenderPass::from_raw(3);
        let layout = vk::DescriptorSetLayout::from_raw(9);
        let recipe = line_recipe(PIPELINE_LINES_NO_DEPTH, false, pass, vk::SampleCountFlags::TYPE_4, layout);

        assert_eq!(recipe.topology, vk::PrimitiveTopology::LINE_LIST);
        assert_eq!(recipe.cull_mode, vk::CullModeFlags::NONE);
        assert!(!recipe.depth_test && !recipe.depth_write);
        assert_eq!(recipe.samples, vk::SampleCountFlags::TYPE_4);
        assert_eq!(recipe.set_layouts, vec![layout]);
        assert_eq!(recipe.vertex_bindings[0].stride, 24);
        assert_eq!(recipe.push_constant_ranges[0].size, 16);
        assert!(PipelineRecipe::from(recipe).validate().is_ok());
    }
}
