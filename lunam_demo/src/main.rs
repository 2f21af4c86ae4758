//! Frame loop demo
//!
//! Opens a window, boots the graphics context and draws a debug scene every
//! frame: a ground grid, a spinning box and the world axes. The line
//! pipelines are compiled from `engine_assets/shaders` at startup. The render
//! thread pool splits the line draw commands across its workers, each
//! recording a secondary command buffer; with no workers the lines are
//! recorded inline. The per-frame uniform buffer carries an orbiting camera
//! and a sky that cycles through the day. A small vertex buffer is streamed
//! through the async upload manager at startup.
//!
//! Settings are read from `lunam.toml` when it exists.

use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Instant;

use ash::vk;
use glfw::{Action, Key, WindowEvent};
use thiserror::Error;

use lunam_engine::foundation::logging;
use lunam_engine::foundation::math::{look_at, perspective};
use lunam_engine::prelude::*;
use lunam_engine::render::backends::vulkan::rendering::debug_draw::DEBUG_LINE_FRAGMENT_SHADER;
use lunam_engine::render::backends::vulkan::rendering::draw_partition::compute_render_bucket_range;
use lunam_engine::render::backends::vulkan::{
    AsyncUploadManager, DebugBatch, DebugDraw, DebugDrawList, DistanceFade, GpuBuffer, MemoryLocation, ShaderError,
    UploadContext, UploadTask,
};
use lunam_engine::render::WindowError;

const CONFIG_PATH: &str = "lunam.toml";
const SECONDS_PER_DAY: f32 = 120.0;

#[derive(Error, Debug)]
enum DemoError {
    #[error("window: {0}")]
    Window(#[from] WindowError),
    #[error("vulkan: {0}")]
    Vulkan(#[from] VulkanError),
    #[error("config: {0}")]
    Config(#[from] ConfigError),
    #[error("shader: {0}")]
    Shader(#[from] ShaderError),
}

/// Copies a fixed byte payload into `dst`
struct BufferUpload {
    data: Vec<u8>,
    dst: vk::Buffer,
    done: Arc<AtomicUsize>,
}

impl UploadTask for BufferUpload {
    fn upload_size(&self) -> usize {
        self.data.len()
    }

    fn record(&mut self, ctx: UploadContext<'_>) {
        ctx.staging.copy_from_slice(&self.data);
        ctx.cmd.copy_buffer(
            ctx.staging_buffer,
            self.dst,
            &[vk::BufferCopy {
                src_offset: 0,
                dst_offset: 0,
                size: self.data.len() as vk::DeviceSize,
            }],
        );
    }

    fn on_finish(&mut self) {
        self.done.fetch_add(1, Ordering::SeqCst);
    }
}

fn load_config() -> Result<RendererConfig, DemoError> {
    if Path::new(CONFIG_PATH).exists() {
        log::info!("Loading {CONFIG_PATH}");
        Ok(RendererConfig::load_validated(CONFIG_PATH)?)
    } else {
        Ok(RendererConfig::new("Lunam Demo").with_render_threads(2))
    }
}

fn quad_vertices() -> Vec<u8> {
    let vertices: [[f32; 3]; 4] = [[-1.0, -1.0, 0.0], [1.0, -1.0, 0.0], [1.0, 1.0, 0.0], [-1.0, 1.0, 0.0]];
    vertices.iter().flatten().flat_map(|v| v.to_ne_bytes()).collect()
}

/// Compile the line fragment shader with reflection and log what it binds
fn log_line_shader_layout(context: &GraphicsContext) -> Result<(), DemoError> {
    let mut variant = ShaderVariant::new(DEBUG_LINE_FRAGMENT_SHADER, ShaderStage::Fragment);
    variant.set_reflect(true);
    let shader = context.shader_cache().get_shader(variant)?;
    if let Some(reflection) = shader.reflection() {
        for binding in &reflection.bindings {
            log::info!(
                "Line shader binds '{}' at set {} binding {} as {:?}",
                binding.name,
                binding.set,
                binding.binding,
                binding.ty
            );
        }
        for range in &reflection.push_constants {
            log::info!("Line shader pushes {} bytes at offset {}", range.size, range.offset);
        }
    }
    Ok(())
}

fn draw_scene(batch: &mut DebugBatch, elapsed: f32) {
    batch.set_depth_test(true);
    batch.set_distance_fade(Some(DistanceFade { start: 8.0, end: 20.0 }));
    batch.draw_grid(&Vec3::zeros(), 20.0, 1.0, &Vec3::new(0.35, 0.35, 0.4));

    batch.set_distance_fade(None);
    let spin = Mat4::from_euler_angles(0.0, elapsed * 0.7, 0.0) * Mat4::new_translation(&Vec3::new(0.0, 0.75, 0.0));
    batch.draw_obb(&Vec3::zeros(), &Vec3::new(0.5, 0.5, 0.5), &spin, &Vec3::new(1.0, 0.8, 0.2));
    batch.draw_aabb(&Vec3::new(2.0, 0.0, -1.0), &Vec3::new(3.0, 1.5, 0.0), &Vec3::new(0.2, 0.9, 0.4));
    batch.draw_arrow(&Vec3::new(-2.5, 0.0, 0.0), &Vec3::new(-2.5, 1.5, 0.0), &Vec3::new(0.9, 0.3, 0.9), 0.25);

    batch.set_depth_test(false);
    batch.draw_transform(&Mat4::identity(), 1.0);
}

fn run() -> Result<(), DemoError> {
    let config = load_config()?;
    let mut window = Window::new(&config.application_name, 1280, 720)?;
    let assets = Arc::new(FileSystemAccessor::new(env!("CARGO_MANIFEST_DIR")));
    let render_threads = config.render_threads;
    let upload_threshold = config.upload_size_threshold;
    let mut context = GraphicsContext::new(&window, config, assets)?;
    log_line_shader_layout(&context)?;
    let mut debug_draw = DebugDraw::new(&mut context, true)?;
    context.shader_cache().shutdown_compiler();

    let lines: Arc<RwLock<Option<DebugDrawList>>> = Arc::new(RwLock::new(None));
    let recorded = Arc::new(AtomicUsize::new(0));
    let callback = {
        let recorded = Arc::clone(&recorded);
        let lines = Arc::clone(&lines);
        let device = Arc::clone(context.device());
        Arc::new(move |cmd: vk::CommandBuffer, thread_id: usize, num_threads: usize| {
            recorded.fetch_add(1, Ordering::Relaxed);
            let lines = lines.read().unwrap_or_else(PoisonError::into_inner);
            if let Some(list) = lines.as_ref() {
                list.record(&device, cmd, compute_render_bucket_range(thread_id, list.len(), num_threads));
            }
        })
    };
    let mut pool = RenderThreadPool::with_device(
        context.device(),
        render_threads,
        context.concurrent_frames(),
        callback,
    )?;

    let uploads = AsyncUploadManager::with_device(context.device(), upload_threshold)?;
    let payload = quad_vertices();
    let quad = GpuBuffer::new(
        Arc::clone(context.device()),
        payload.len() as vk::DeviceSize,
        vk::BufferUsageFlags::VERTEX_BUFFER | vk::BufferUsageFlags::TRANSFER_DST,
        MemoryLocation::GpuOnly,
        false,
    )?;
    let uploaded = Arc::new(AtomicUsize::new(0));
    uploads.push_task(Box::new(BufferUpload {
        data: payload,
        dst: quad.handle(),
        done: Arc::clone(&uploaded),
    }));

    let start = Instant::now();
    let mut frames = 0_u64;
    while !window.should_close() {
        window.poll_events();
        let events: Vec<_> = window.flush_events().collect();
        for (_, event) in events {
            if let WindowEvent::Key(Key::Escape, _, Action::Press, _) = event {
                window.set_should_close(true);
            }
        }
        uploads.tick();

        let elapsed = start.elapsed().as_secs_f32();
        let hour = (elapsed / SECONDS_PER_DAY * 24.0) % 24.0;
        let sky = SkyParams::at_hour(hour, 2.5, 1.0);
        let clear = [sky.sky_luminance[0] * 0.2, sky.sky_luminance[1] * 0.2, sky.sky_luminance[2] * 0.2, 1.0];

        let Some(mut frame) = context.begin_frame(&window, clear, pool.num_threads() > 0)? else {
            if context.is_minimized() {
                window.wait_events();
            }
            continue;
        };

        let eye = Vec3::new(elapsed.cos() * 5.0, 2.0, elapsed.sin() * 5.0);
        let view = look_at(&eye, &Vec3::zeros(), &Vec3::y());
        let proj = perspective(60_f32.to_radians(), context.aspect_ratio(), 0.1, 500.0);
        let data = PerFrameData::from_camera(&view, &proj, &eye)
            .with_sun(&Vec3::new(0.3, 1.0, 0.2), &Vec3::new(1.0, 0.95, 0.9), 1.0)
            .with_ambient(&Vec3::new(0.1, 0.1, 0.15), 1.0)
            .with_sky(sky);
        context.shared_buffers_mut().write(frame.slot(), &data)?;

        draw_scene(debug_draw.batch(), elapsed);
        let list = debug_draw.prepare(&context, frame.slot())?;

        frame.cmd().begin(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT, None)?;
        if let Some(inheritance) = frame.inheritance().copied() {
            *lines.write().unwrap_or_else(PoisonError::into_inner) = Some(list);
            pool.begin_frame(inheritance);
            context.begin_render_pass(&mut frame, vk::SubpassContents::SECONDARY_COMMAND_BUFFERS);
            pool.process_frame(frame.cmd())?;
        } else {
            context.begin_render_pass(&mut frame, vk::SubpassContents::INLINE);
            frame.cmd().set_viewport(context.flipped_viewport());
            frame.cmd().set_scissor(context.scissor());
            list.record(context.device(), frame.cmd().handle(), 0..list.len());
        }
        context.end_render_pass(&mut frame);
        frame.cmd().end()?;
        context.end_frame(&window, frame)?;
        frames += 1;
    }

    uploads.flush_task();
    let seconds = start.elapsed().as_secs_f64();
    log::info!(
        "{} frames in {:.1}s ({:.1} fps), {} secondary recordings, {} uploads finished",
        frames,
        seconds,
        frames as f64 / seconds.max(f64::EPSILON),
        recorded.load(Ordering::Relaxed),
        uploaded.load(Ordering::SeqCst)
    );
    drop(uploads);
    drop(quad);
    drop(pool);
    drop(debug_draw);
    Ok(())
}

fn main() {
    logging::init_with_default("info");
    log::info!("Starting Lunam demo");
    if let Err(e) = run() {
        log::error!("Lunam demo failed: {e}");
        std::process::exit(1);
    }
}
