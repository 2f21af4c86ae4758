//! Pipeline recipes and the Vulkan routine that builds them
//!
//! A pipeline is described by a [`PipelineRecipe`]: either a
//! [`GraphicsRecipe`] or a [`ComputeRecipe`]. Recipes hold shader variants
//! rather than compiled shaders, so rebuilding after a shader invalidation
//! recompiles from source. The [`PipelineBackend`] turns a recipe into
//! Vulkan handles; [`VulkanPipelineBackend`] is the real one and owns the
//! `VkPipelineCache` shared by every creation in this process.

use std::fmt;
use std::sync::Arc;

use ash::vk;
use thiserror::Error;

use super::shader::{Shader, ShaderError, ShaderStage, ShaderVariant};
use super::shader_cache::ShaderCache;
use crate::render::backends::vulkan::initialization::device::Device;
use crate::render::backends::vulkan::{VulkanError, VulkanResult};

/// Errors produced while building a pipeline
#[derive(Error, Debug)]
pub enum PipelineError {
    /// One of the recipe's shaders failed to compile
    #[error(transparent)]
    Shader(#[from] ShaderError),

    /// Vulkan rejected the layout or pipeline
    #[error(transparent)]
    Vulkan(#[from] VulkanError),

    /// The recipe cannot describe a valid pipeline
    #[error("Invalid pipeline recipe '{name}': {reason}")]
    InvalidRecipe {
        /// Pipeline name
        name: String,
        /// What is wrong with it
        reason: String,
    },

    /// A configure hook vetoed the pipeline
    #[error("{stage} rejected pipeline '{name}'")]
    Rejected {
        /// Pipeline name
        name: String,
        /// `pre_configure` or `post_configure`
        stage: &'static str,
    },
}

/// Check run before a pipeline is built; `false` aborts the build
pub type PreConfigure = Arc<dyn Fn(&PipelineRecipe) -> bool + Send + Sync>;

/// Step run once the Vulkan objects exist; `false` discards them
pub type PostConfigure = Arc<dyn Fn(&PipelineRecipe, &PipelineHandles) -> bool + Send + Sync>;

/// Optional per-pipeline steps around creation
#[derive(Clone, Default)]
pub struct ConfigureHooks {
    /// Runs before shaders are loaded
    pub pre: Option<PreConfigure>,
    /// Runs after the pipeline is created
    pub post: Option<PostConfigure>,
}

impl ConfigureHooks {
    /// Run the pre hook; passes when there is none
    pub fn pre_configure(&self, recipe: &PipelineRecipe) -> bool {
        self.pre.as_ref().map_or(true, |hook| hook(recipe))
    }

    /// Run the post hook; passes when there is none
    pub fn post_configure(&self, recipe: &PipelineRecipe, handles: &PipelineHandles) -> bool {
        self.post.as_ref().map_or(true, |hook| hook(recipe, handles))
    }
}

impl fmt::Debug for ConfigureHooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConfigureHooks")
            .field("pre", &self.pre.is_some())
            .field("post", &self.post.is_some())
            .finish()
    }
}

/// Whether a pipeline rasterizes or dispatches
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PipelineKind {
    /// Graphics pipeline bound at `VK_PIPELINE_BIND_POINT_GRAPHICS`
    Graphics,
    /// Compute pipeline bound at `VK_PIPELINE_BIND_POINT_COMPUTE`
    Compute,
}

impl PipelineKind {
    /// Bind point for `vkCmdBindPipeline`
    pub fn bind_point(self) -> vk::PipelineBindPoint {
        match self {
            PipelineKind::Graphics => vk::PipelineBindPoint::GRAPHICS,
            PipelineKind::Compute => vk::PipelineBindPoint::COMPUTE,
        }
    }

    /// Lowercase name used in log messages
    pub fn label(self) -> &'static str {
        match self {
            PipelineKind::Graphics => "graphics",
            PipelineKind::Compute => "compute",
        }
    }
}

/// Fixed-function state and shaders of a graphics pipeline
///
/// [`GraphicsRecipe::new`] starts from the engine defaults: triangle lists,
/// back-face culling with clockwise front faces, depth test and write with
/// `LESS_OR_EQUAL`, blending off, dynamic viewport and scissor, one sample.
#[derive(Debug, Clone)]
pub struct GraphicsRecipe {
    /// Unique pipeline name
    pub name: String,
    /// Shader stages, usually a vertex and a fragment variant
    pub shaders: Vec<ShaderVariant>,
    /// Descriptor set layouts, indexed by set number
    pub set_layouts: Vec<vk::DescriptorSetLayout>,
    /// Push constant ranges
    pub push_constant_ranges: Vec<vk::PushConstantRange>,
    /// Vertex buffer bindings
    pub vertex_bindings: Vec<vk::VertexInputBindingDescription>,
    /// Vertex attributes
    pub vertex_attributes: Vec<vk::VertexInputAttributeDescription>,
    /// Primitive topology
    pub topology: vk::PrimitiveTopology,
    /// Fill, line or point rasterization
    pub polygon_mode: vk::PolygonMode,
    /// Faces to cull
    pub cull_mode: vk::CullModeFlags,
    /// Winding of front faces
    pub front_face: vk::FrontFace,
    /// Enable depth testing
    pub depth_test: bool,
    /// Enable depth writing
    pub depth_write: bool,
    /// Depth comparison
    pub depth_compare_op: vk::CompareOp,
    /// Rasterization samples, must match the render pass attachments
    pub samples: vk::SampleCountFlags,
    /// Enable alpha blending on the color attachment
    pub alpha_blending: bool,
    /// Dynamic states
    pub dynamic_states: Vec<vk::DynamicState>,
    /// Render pass the pipeline is compatible with
    pub render_pass: vk::RenderPass,
    /// Subpass index within `render_pass`
    pub subpass: u32,
    /// Steps run around creation
    pub hooks: ConfigureHooks,
}

impl GraphicsRecipe {
    /// Recipe with default state targeting `render_pass`
    pub fn new(name: impl Into<String>, render_pass: vk::RenderPass) -> Self {
        Self {
            name: name.into(),
            shaders: Vec::new(),
            set_layouts: Vec::new(),
            push_constant_ranges: Vec::new(),
            vertex_bindings: Vec::new(),
            vertex_attributes: Vec::new(),
            topology: vk::PrimitiveTopology::TRIANGLE_LIST,
            polygon_mode: vk::PolygonMode::FILL,
            cull_mode: vk::CullModeFlags::BACK,
            front_face: vk::FrontFace::CLOCKWISE,
            depth_test: true,
            depth_write: true,
            depth_compare_op: vk::CompareOp::LESS_OR_EQUAL,
            samples: vk::SampleCountFlags::TYPE_1,
            alpha_blending: false,
            dynamic_states: vec![vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR],
            render_pass,
            subpass: 0,
            hooks: ConfigureHooks::default(),
        }
    }

    /// Add a shader stage
    pub fn with_shader(mut self, variant: ShaderVariant) -> Self {
        self.shaders.push(variant);
        self
    }

    /// Set the descriptor set layouts
    pub fn with_set_layouts(mut self, layouts: &[vk::DescriptorSetLayout]) -> Self {
        self.set_layouts = layouts.to_vec();
        self
    }

    /// Add a push constant range
    pub fn with_push_constants(mut self, stages: vk::ShaderStageFlags, offset: u32, size: u32) -> Self {
        self.push_constant_ranges.push(vk::PushConstantRange { stage_flags: stages, offset, size });
        self
    }

    /// Set the vertex input description
    pub fn with_vertex_input(
        mut self,
        bindings: &[vk::VertexInputBindingDescription],
        attributes: &[vk::VertexInputAttributeDescription],
    ) -> Self {
        self.vertex_bindings = bindings.to_vec();
        self.vertex_attributes = attributes.to_vec();
        self
    }

    /// Set the primitive topology
    pub fn with_topology(mut self, topology: vk::PrimitiveTopology) -> Self {
        self.topology = topology;
        self
    }

    /// Run `hook` before every build; returning `false` aborts it
    pub fn with_pre_configure(mut self, hook: impl Fn(&PipelineRecipe) -> bool + Send + Sync + 'static) -> Self {
        self.hooks.pre = Some(Arc::new(hook));
        self
    }

    /// Run `hook` after every build; returning `false` discards the result
    pub fn with_post_configure(
        mut self,
        hook: impl Fn(&PipelineRecipe, &PipelineHandles) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.hooks.post = Some(Arc::new(hook));
        self
    }

    /// Set the rasterization sample count
    pub fn with_samples(mut self, samples: vk::SampleCountFlags) -> Self {
        self.samples = samples;
        self
    }

    /// Set the cull mode
    pub fn with_cull_mode(mut self, cull_mode: vk::CullModeFlags) -> Self {
        self.cull_mode = cull_mode;
        self
    }

    /// Configure depth test, depth write and the compare op
    pub fn with_depth(mut self, test: bool, write: bool, compare_op: vk::CompareOp) -> Self {
        self.depth_test = test;
        self.depth_write = write;
        self.depth_compare_op = compare_op;
        self
    }

    /// Enable straight alpha blending
    pub fn with_alpha_blending(mut self) -> Self {
        self.alpha_blending = true;
        self
    }

    /// Color blend state of the single color attachment
    pub fn color_blend_attachment(&self) -> vk::PipelineColorBlendAttachmentState {
        vk::PipelineColorBlendAttachmentState::builder()
            .color_write_mask(vk::ColorComponentFlags::RGBA)
            .blend_enable(self.alpha_blending)
            .src_color_blend_factor(vk::BlendFactor::SRC_ALPHA)
            .dst_color_blend_factor(vk::BlendFactor::ONE_MINUS_SRC_ALPHA)
            .color_blend_op(vk::BlendOp::ADD)
            .src_alpha_blend_factor(vk::BlendFactor::ONE)
            .dst_alpha_blend_factor(vk::BlendFactor::ZERO)
            .alpha_blend_op(vk::BlendOp::ADD)
            .build()
    }
}

/// Shader and layout of a compute pipeline
#[derive(Debug, Clone)]
pub struct ComputeRecipe {
    /// Unique pipeline name
    pub name: String,
    /// Compute shader variant
    pub shader: ShaderVariant,
    /// Descriptor set layouts, indexed by set number
    pub set_layouts: Vec<vk::DescriptorSetLayout>,
    /// Push constant ranges
    pub push_constant_ranges: Vec<vk::PushConstantRange>,
    /// Steps run around creation
    pub hooks: ConfigureHooks,
}

impl ComputeRecipe {
    /// Recipe dispatching `shader`
    pub fn new(name: impl Into<String>, shader: ShaderVariant) -> Self {
        Self {
            name: name.into(),
            shader,
            set_layouts: Vec::new(),
            push_constant_ranges: Vec::new(),
            hooks: ConfigureHooks::default(),
        }
    }

    /// Run `hook` before every build; returning `false` aborts it
    pub fn with_pre_configure(mut self, hook: impl Fn(&PipelineRecipe) -> bool + Send + Sync + 'static) -> Self {
        self.hooks.pre = Some(Arc::new(hook));
        self
    }

    /// Run `hook` after every build; returning `false` discards the result
    pub fn with_post_configure(
        mut self,
        hook: impl Fn(&PipelineRecipe, &PipelineHandles) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.hooks.post = Some(Arc::new(hook));
        self
    }

    /// Set the descriptor set layouts
    pub fn with_set_layouts(mut self, layouts: &[vk::DescriptorSetLayout]) -> Self {
        self.set_layouts = layouts.to_vec();
        self
    }

    /// Add a compute push constant range
    pub fn with_push_constants(mut self, offset: u32, size: u32) -> Self {
        self.push_constant_ranges.push(vk::PushConstantRange {
            stage_flags: vk::ShaderStageFlags::COMPUTE,
            offset,
            size,
        });
        self
    }
}

/// Every kind of pipeline the engine can build
#[derive(Debug, Clone)]
pub enum PipelineRecipe {
    /// Rasterization pipeline
    Graphics(GraphicsRecipe),
    /// Compute pipeline
    Compute(ComputeRecipe),
}

impl PipelineRecipe {
    /// Pipeline name
    pub fn name(&self) -> &str {
        match self {
            PipelineRecipe::Graphics(recipe) => &recipe.name,
            PipelineRecipe::Compute(recipe) => &recipe.name,
        }
    }

    /// Graphics or compute
    pub fn kind(&self) -> PipelineKind {
        match self {
            PipelineRecipe::Graphics(_) => PipelineKind::Graphics,
            PipelineRecipe::Compute(_) => PipelineKind::Compute,
        }
    }

    /// Steps run around creation
    pub fn hooks(&self) -> &ConfigureHooks {
        match self {
            PipelineRecipe::Graphics(recipe) => &recipe.hooks,
            PipelineRecipe::Compute(recipe) => &recipe.hooks,
        }
    }

    /// Shader variants the pipeline is built from
    pub fn shader_variants(&self) -> Vec<&ShaderVariant> {
        match self {
            PipelineRecipe::Graphics(recipe) => recipe.shaders.iter().collect(),
            PipelineRecipe::Compute(recipe) => vec![&recipe.shader],
        }
    }

    /// Check the recipe can describe a pipeline before touching Vulkan
    pub fn validate(&self) -> Result<(), PipelineError> {
        let invalid = |reason: &str| PipelineError::InvalidRecipe {
            name: self.name().to_string(),
            reason: reason.to_string(),
        };
        match self {
            PipelineRecipe::Graphics(recipe) => {
                if recipe.shaders.is_empty() {
                    return Err(invalid("no shader stages"));
                }
                if recipe.shaders.iter().any(|s| s.stage() == ShaderStage::Compute) {
                    return Err(invalid("compute shader in a graphics pipeline"));
                }
                if recipe.render_pass == vk::RenderPass::null() {
                    return Err(invalid("no render pass"));
                }
            }
            PipelineRecipe::Compute(recipe) => {
                if recipe.shader.stage() != ShaderStage::Compute {
                    return Err(invalid("compute pipeline needs a compute shader"));
                }
            }
        }
        Ok(())
    }
}

impl From<GraphicsRecipe> for PipelineRecipe {
    fn from(recipe: GraphicsRecipe) -> Self {
        PipelineRecipe::Graphics(recipe)
    }
}

impl From<ComputeRecipe> for PipelineRecipe {
    fn from(recipe: ComputeRecipe) -> Self {
        PipelineRecipe::Compute(recipe)
    }
}

/// Vulkan objects backing one pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineHandles {
    /// Pipeline layout
    pub layout: vk::PipelineLayout,
    /// Pipeline object
    pub pipeline: vk::Pipeline,
}

/// A built pipeline and the recipe it came from
#[derive(Debug)]
pub struct Pipeline {
    recipe: PipelineRecipe,
    handles: PipelineHandles,
    num_creations: u32,
}

impl Pipeline {
    pub(crate) fn new(recipe: PipelineRecipe, handles: PipelineHandles, num_creations: u32) -> Self {
        Self { recipe, handles, num_creations }
    }

    /// Pipeline name
    pub fn name(&self) -> &str {
        self.recipe.name()
    }

    /// Graphics or compute
    pub fn kind(&self) -> PipelineKind {
        self.recipe.kind()
    }

    /// Bind point matching the kind
    pub fn bind_point(&self) -> vk::PipelineBindPoint {
        self.kind().bind_point()
    }

    /// Pipeline handle
    pub fn handle(&self) -> vk::Pipeline {
        self.handles.pipeline
    }

    /// Pipeline layout handle
    pub fn layout(&self) -> vk::PipelineLayout {
        self.handles.layout
    }

    /// Both handles
    pub fn handles(&self) -> PipelineHandles {
        self.handles
    }

    /// Recipe this pipeline was built from
    pub fn recipe(&self) -> &PipelineRecipe {
        &self.recipe
    }

    /// How many times a pipeline of this name has been built successfully
    pub fn num_creations(&self) -> u32 {
        self.num_creations
    }

    pub(crate) fn recipe_mut(&mut self) -> &mut PipelineRecipe {
        &mut self.recipe
    }

    pub(crate) fn replace_handles(&mut self, handles: PipelineHandles) -> PipelineHandles {
        self.num_creations += 1;
        std::mem::replace(&mut self.handles, handles)
    }
}

/// Builds and destroys the Vulkan objects for recipes
pub trait PipelineBackend {
    /// Build the layout and pipeline for `recipe`
    fn create(&mut self, recipe: &PipelineRecipe) -> Result<PipelineHandles, PipelineError>;

    /// Destroy handles previously returned by `create`
    fn destroy(&mut self, handles: PipelineHandles);

    /// Drop cached shaders so the next `create` recompiles them
    fn invalidate_shaders(&mut self);
}

/// Build `recipe`: `pre_configure`, then `backend.create`, then `post_configure`
///
/// A failing step aborts the whole build. Handles rejected by the post
/// hook are destroyed before returning.
pub fn initialize<B: PipelineBackend + ?Sized>(
    backend: &mut B,
    recipe: &PipelineRecipe,
) -> Result<PipelineHandles, PipelineError> {
    let rejected = |stage| PipelineError::Rejected {
        name: recipe.name().to_string(),
        stage,
    };
    let hooks = recipe.hooks();
    if !hooks.pre_configure(recipe) {
        return Err(rejected("pre_configure"));
    }
    let handles = backend.create(recipe)?;
    if !hooks.post_configure(recipe, &handles) {
        backend.destroy(handles);
        return Err(rejected("post_configure"));
    }
    Ok(handles)
}

/// Real backend creating pipelines on a [`Device`]
pub struct VulkanPipelineBackend {
    device: Arc<Device>,
    shaders: Arc<ShaderCache>,
    cache: vk::PipelineCache,
}

impl VulkanPipelineBackend {
    /// Create the backend and its `VkPipelineCache`
    pub fn new(device: Arc<Device>, shaders: Arc<ShaderCache>) -> VulkanResult<Self> {
        let create_info = vk::PipelineCacheCreateInfo::builder();
        let cache = unsafe {
            device.logical().create_pipeline_cache(&create_info, None)
                .map_err(VulkanError::Api)?
        };
        Ok(Self { device, shaders, cache })
    }

    /// The shader cache pipelines compile through
    pub fn shader_cache(&self) -> &Arc<ShaderCache> {
        &self.shaders
    }

    /// Raw `VkPipelineCache`
    pub fn pipeline_cache(&self) -> vk::PipelineCache {
        self.cache
    }

    /// Opaque pipeline cache blob
    pub fn cache_data(&self) -> VulkanResult<Vec<u8>> {
        unsafe {
            self.device.logical().get_pipeline_cache_data(self.cache)
                .map_err(VulkanError::Api)
        }
    }

    fn load_shaders(&self, variants: &[&ShaderVariant]) -> Result<Vec<Arc<Shader>>, PipelineError> {
        variants
            .iter()
            .map(|variant| self.shaders.get_shader((*variant).clone()).map_err(PipelineError::from))
            .collect()
    }

    fn create_layout(
        &self,
        set_layouts: &[vk::DescriptorSetLayout],
        push_constant_ranges: &[vk::PushConstantRange],
    ) -> VulkanResult<vk::PipelineLayout> {
        let layout_info = vk::PipelineLayoutCreateInfo::builder()
            .set_layouts(set_layouts)
            .push_constant_ranges(push_constant_ranges);
        unsafe {
            self.device.logical().create_pipeline_layout(&layout_info, None)
                .map_err(VulkanError::Api)
        }
    }

    fn create_graphics(&self, recipe: &GraphicsRecipe, shaders: &[Arc<Shader>]) -> VulkanResult<PipelineHandles> {
        let device = self.device.logical();
        let stages: Vec<vk::PipelineShaderStageCreateInfo> = shaders.iter().map(|s| s.stage_info()).collect();

        let vertex_input = vk::PipelineVertexInputStateCreateInfo::builder()
            .vertex_binding_descriptions(&recipe.vertex_bindings)
            .vertex_attribute_descriptions(&recipe.vertex_attributes);

        let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::builder()
            .topology(recipe.topology)
            .primitive_restart_enable(false);

        // Viewport and scissor are dynamic
        let viewport_state = vk::PipelineViewportStateCreateInfo::builder()
            .viewport_count(1)
            .scissor_count(1);

        let rasterizer = vk::PipelineRasterizationStateCreateInfo::builder()
            .depth_clamp_enable(false)
            .rasterizer_discard_enable(false)
            .polygon_mode(recipe.polygon_mode)
            .line_width(1.0)
            .cull_mode(recipe.cull_mode)
            .front_face(recipe.front_face)
            .depth_bias_enable(false);

        let multisampling = vk::PipelineMultisampleStateCreateInfo::builder()
            .sample_shading_enable(false)
            .alpha_to_coverage_enable(false)
            .rasterization_samples(recipe.samples);

        let stencil = vk::StencilOpState {
            fail_op: vk::StencilOp::KEEP,
            pass_op: vk::StencilOp::KEEP,
            compare_op: vk::CompareOp::ALWAYS,
            ..Default::default()
        };
        let depth_stencil = vk::PipelineDepthStencilStateCreateInfo::builder()
            .depth_test_enable(recipe.depth_test)
            .depth_write_enable(recipe.depth_write)
            .depth_compare_op(recipe.depth_compare_op)
            .depth_bounds_test_enable(false)
            .stencil_test_enable(false)
            .front(stencil)
            .back(stencil);

        let color_blend_attachments = [recipe.color_blend_attachment()];
        let color_blending = vk::PipelineColorBlendStateCreateInfo::builder()
            .logic_op_enable(false)
            .attachments(&color_blend_attachments);

        let dynamic_state = vk::PipelineDynamicStateCreateInfo::builder()
            .dynamic_states(&recipe.dynamic_states);

        let layout = self.create_layout(&recipe.set_layouts, &recipe.push_constant_ranges)?;

        let pipeline_info = vk::GraphicsPipelineCreateInfo::builder()
            .stages(&stages)
            .vertex_input_state(&vertex_input)
            .input_assembly_state(&input_assembly)
            .viewport_state(&viewport_state)
            .rasterization_state(&rasterizer)
            .multisample_state(&multisampling)
            .depth_stencil_state(&depth_stencil)
            .color_blend_state(&color_blending)
            .dynamic_state(&dynamic_state)
            .layout(layout)
            .render_pass(recipe.render_pass)
            .subpass(recipe.subpass);

        let result = unsafe { device.create_graphics_pipelines(self.cache, &[pipeline_info.build()], None) };
        match result {
            Ok(pipelines) => Ok(PipelineHandles { layout, pipeline: pipelines[0] }),
            Err((_, err)) => {
                unsafe { device.destroy_pipeline_layout(layout, None) };
                Err(VulkanError::Api(err))
            }
        }
    }

    fn create_compute(&self, recipe: &ComputeRecipe, shader: &Shader) -> VulkanResult<PipelineHandles> {
        let device = self.device.logical();
        let layout = self.create_layout(&recipe.set_layouts, &recipe.push_constant_ranges)?;

        let pipeline_info = vk::ComputePipelineCreateInfo::builder()
            .stage(shader.stage_info())
            .layout(layout);

        let result = unsafe { device.create_compute_pipelines(self.cache, &[pipeline_info.build()], None) };
        match result {
            Ok(pipelines) => Ok(PipelineHandles { layout, pipeline: pipelines[0] }),
            Err((_, err)) => {
                unsafe { device.destroy_pipeline_layout(layout, None) };
                Err(VulkanError::Api(err))
            }
        }
    }
}

impl PipelineBackend for VulkanPipelineBackend {
    fn create(&mut self, recipe: &PipelineRecipe) -> Result<PipelineHandles, PipelineError> {
        recipe.validate()?;
        let shaders = self.load_shaders(&recipe.shader_variants())?;
        let handles = match recipe {
            PipelineRecipe::Graphics(graphics) => self.create_graphics(graphics, &shaders)?,
            PipelineRecipe::Compute(compute) => self.create_compute(compute, &shaders[0])?,
        };
        Ok(handles)
    }

    fn destroy(&mut self, handles: PipelineHandles) {
        let device = self.device.logical();
        unsafe {
            device.destroy_pipeline(handles.pipeline, None);
            device.destroy_pipeline_layout(handles.layout, None);
        }
    }

    fn invalidate_shaders(&mut self) {
        self.shaders.invalidate_all();
    }
}

impl Drop for VulkanPipelineBackend {
    fn drop(&mut self) {
        unsafe { self.device.logical().destroy_pipeline_cache(self.cache, None) };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk::Handle;

    fn vertex() -> ShaderVariant {
        ShaderVariant::new("shaders/tri.vert", ShaderStage::Vertex)
    }

    fn fragment() -> ShaderVariant {
        ShaderVariant::new("shaders/tri.frag", ShaderStage::Fragment)
    }

    #[test]
    fn test_graphics_defaults() {
        let recipe = GraphicsRecipe::new("tri", vk::RenderPass::from_raw(1));
        assert_eq!(recipe.topology, vk::PrimitiveTopology::TRIANGLE_LIST);
        assert_eq!(recipe.cull_mode, vk::CullModeFlags::BACK);
        assert_eq!(recipe.front_face, vk::FrontFace::CLOCKWISE);
        assert!(recipe.depth_test && recipe.depth_write);
        assert_eq!(recipe.depth_compare_op, vk::CompareOp::LESS_OR_EQUAL);
        assert_eq!(recipe.dynamic_states, vec![vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR]);
        assert_eq!(recipe.color_blend_attachment().blend_enable, vk::FALSE);
        assert_eq!(recipe.with_alpha_blending().color_blend_attachment().blend_enable, vk::TRUE);
    }

    #[test]
    fn test_kind_and_bind_point() {
        let graphics: PipelineRecipe = GraphicsRecipe::new("g", vk::RenderPass::from_raw(1)).into();
        let compute: PipelineRecipe =
            ComputeRecipe::new("c", ShaderVariant::new("shaders/blur.comp", ShaderStage::Compute)).into();
        assert_eq!(graphics.kind().bind_point(), vk::PipelineBindPoint::GRAPHICS);
        assert_eq!(compute.kind().bind_point(), vk::PipelineBindPoint::COMPUTE);
        assert_eq!(compute.shader_variants().len(), 1);
    }

    #[test]
    fn test_validate_graphics() {
        let pass = vk::RenderPass::from_raw(1);
        assert!(PipelineRecipe::from(GraphicsRecipe::new("empty", pass)).validate().is_err());
        assert!(PipelineRecipe::from(GraphicsRecipe::new("no_pass", vk::RenderPass::null()).with_shader(vertex()))
            .validate()
            .is_err());
        let ok = GraphicsRecipe::new("ok", pass).with_shader(vertex()).with_shader(fragment());
        assert!(PipelineRecipe::from(ok).validate().is_ok());
    }

    #[test]
    fn test_validate_compute_stage() {
        let wrong = ComputeRecipe::new("c", fragment());
        assert!(matches!(
            PipelineRecipe::from(wrong).validate(),
            Err(PipelineError::InvalidRecipe { .. })
        ));
    }
}
