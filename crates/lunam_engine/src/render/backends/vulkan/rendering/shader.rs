//! Shader variants and compiled shader modules
//!
//! A [`ShaderVariant`] names one compilation of a GLSL file: path, stage,
//! entry point and the preprocessor macros it is built with. Its
//! [`cache_key`](ShaderVariant::cache_key) is the identity the shader cache
//! deduplicates on. Artifact retention flags are not part of that identity.

use std::collections::{BTreeMap, BTreeSet};
use std::ffi::{CStr, CString};
use std::sync::Arc;

use ash::vk;
use bitflags::bitflags;
use thiserror::Error;

use crate::render::backends::vulkan::initialization::device::Device;

/// Errors produced while building a shader
#[derive(Error, Debug)]
pub enum ShaderError {
    /// The GLSL source could not be read through the asset accessor
    #[error("Failed to load shader file: {path}")]
    Load {
        /// Asset path of the shader
        path: String,
    },

    /// shaderc could not be initialized
    #[error("Shader compiler unavailable: {0}")]
    CompilerUnavailable(String),

    /// Preprocessing (includes, macros) failed
    #[error("{file}: preprocessing failed\n{message}")]
    Preprocess {
        /// File name of the shader
        file: String,
        /// Diagnostics from the compiler
        message: String,
    },

    /// GLSL to SPIR-V compilation failed
    #[error("{file}: compilation failed\n{message}")]
    Compile {
        /// File name of the shader
        file: String,
        /// Diagnostics from the compiler
        message: String,
    },

    /// Compilation succeeded but produced no SPIR-V
    #[error("{file}: compiler produced empty SPIR-V")]
    EmptyBytecode {
        /// File name of the shader
        file: String,
    },

    /// SPIR-V reflection failed
    #[error("{file}: reflection failed: {message}")]
    Reflection {
        /// File name of the shader
        file: String,
        /// Reflection error
        message: String,
    },

    /// The entry point name contains a NUL byte
    #[error("Invalid entry point name: {0}")]
    EntryPoint(String),

    /// `vkCreateShaderModule` failed
    #[error("Failed to create shader module: {0:?}")]
    Module(vk::Result),
}

/// Pipeline stage a shader is compiled for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ShaderStage {
    /// Vertex shader
    Vertex,
    /// Fragment shader
    Fragment,
    /// Compute shader
    Compute,
}

impl ShaderStage {
    /// Matching Vulkan stage flag
    pub fn vk_stage(self) -> vk::ShaderStageFlags {
        match self {
            Self::Vertex => vk::ShaderStageFlags::VERTEX,
            Self::Fragment => vk::ShaderStageFlags::FRAGMENT,
            Self::Compute => vk::ShaderStageFlags::COMPUTE,
        }
    }

    /// Guess the stage from a `.vert`, `.frag` or `.comp` extension
    pub fn from_path(path: &str) -> Option<Self> {
        match path.rsplit('.').next()? {
            "vert" => Some(Self::Vertex),
            "frag" => Some(Self::Fragment),
            "comp" => Some(Self::Compute),
            _ => None,
        }
    }
}

bitflags! {
    /// Compilation artifacts kept on the [`Shader`] after module creation
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct KeepArtifacts: u8 {
        /// Human-readable SPIR-V assembly
        const ASSEMBLY = 1 << 0;
        /// Original GLSL source
        const SOURCE = 1 << 1;
        /// SPIR-V words
        const BYTECODE = 1 << 2;
    }
}

/// One compilation of a GLSL file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShaderVariant {
    path: String,
    stage: ShaderStage,
    entry_point: String,
    macro_values: BTreeMap<String, i32>,
    macros: BTreeSet<String>,
    keep: KeepArtifacts,
    reflect: bool,
}

impl ShaderVariant {
    /// Variant of `path` for `stage` with entry point `main` and no macros
    pub fn new(path: impl Into<String>, stage: ShaderStage) -> Self {
        Self {
            path: path.into(),
            stage,
            entry_point: "main".to_string(),
            macro_values: BTreeMap::new(),
            macros: BTreeSet::new(),
            keep: KeepArtifacts::empty(),
            reflect: false,
        }
    }

    /// Define `key` to an integer value
    pub fn set_int(&mut self, key: impl Into<String>, value: i32) -> &mut Self {
        self.macro_values.insert(key.into(), value);
        self
    }

    /// Define `key` to 1 or 0
    pub fn set_bool(&mut self, key: impl Into<String>, value: bool) -> &mut Self {
        self.set_int(key, i32::from(value))
    }

    /// Define a value-less macro
    pub fn set_macro(&mut self, name: impl Into<String>) -> &mut Self {
        self.macros.insert(name.into());
        self
    }

    /// Override the entry point
    pub fn set_entry_point(&mut self, entry_point: impl Into<String>) -> &mut Self {
        self.entry_point = entry_point.into();
        self
    }

    /// Choose which artifacts survive compilation
    pub fn set_keep(&mut self, keep: KeepArtifacts) -> &mut Self {
        self.keep = keep;
        self
    }

    /// Request descriptor and push constant reflection
    pub fn set_reflect(&mut self, reflect: bool) -> &mut Self {
        self.reflect = reflect;
        self
    }

    /// Asset path of the GLSL source
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Target stage
    pub fn stage(&self) -> ShaderStage {
        self.stage
    }

    /// Entry point name
    pub fn entry_point(&self) -> &str {
        &self.entry_point
    }

    /// Macros with integer values
    pub fn macro_values(&self) -> &BTreeMap<String, i32> {
        &self.macro_values
    }

    /// Value-less macros
    pub fn macros(&self) -> &BTreeSet<String> {
        &self.macros
    }

    /// Artifacts to keep
    pub fn keep(&self) -> KeepArtifacts {
        self.keep
    }

    /// Whether reflection was requested
    pub fn reflect(&self) -> bool {
        self.reflect
    }

    /// Identity over path, stage, entry point and macros
    pub fn cache_key(&self) -> VariantKey {
        VariantKey {
            path: self.path.clone(),
            stage: self.stage,
            entry_point: self.entry_point.clone(),
            macro_values: self.macro_values.clone(),
            macros: self.macros.clone(),
        }
    }
}

/// Compared field by field, so two variants share a cache entry only when
/// they compile the same thing
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct VariantKey {
    path: String,
    stage: ShaderStage,
    entry_point: String,
    macro_values: BTreeMap<String, i32>,
    macros: BTreeSet<String>,
}

/// A descriptor binding found by reflection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReflectedBinding {
    /// Variable name, empty when stripped
    pub name: String,
    /// Descriptor set index
    pub set: u32,
    /// Binding index within the set
    pub binding: u32,
    /// Descriptor type
    pub ty: vk::DescriptorType,
    /// Stage the binding was found in
    pub stages: vk::ShaderStageFlags,
}

/// Reflection data of one shader stage
#[derive(Debug, Clone, Default)]
pub struct ShaderReflection {
    /// Descriptor bindings, in declaration order
    pub bindings: Vec<ReflectedBinding>,
    /// Push constant ranges
    pub push_constants: Vec<vk::PushConstantRange>,
}

fn descriptor_type(ty: &spirq::ty::DescriptorType) -> Option<vk::DescriptorType> {
    use spirq::ty::DescriptorType;
    match ty {
        DescriptorType::UniformBuffer() => Some(vk::DescriptorType::UNIFORM_BUFFER),
        DescriptorType::StorageBuffer(..) => Some(vk::DescriptorType::STORAGE_BUFFER),
        DescriptorType::CombinedImageSampler() => Some(vk::DescriptorType::COMBINED_IMAGE_SAMPLER),
        DescriptorType::SampledImage() => Some(vk::DescriptorType::SAMPLED_IMAGE),
        DescriptorType::Sampler() => Some(vk::DescriptorType::SAMPLER),
        DescriptorType::StorageImage(..) => Some(vk::DescriptorType::STORAGE_IMAGE),
        DescriptorType::InputAttachment(..) => Some(vk::DescriptorType::INPUT_ATTACHMENT),
        _ => None,
    }
}

/// Extract descriptor bindings and push constant ranges from SPIR-V
pub fn reflect_spirv(code: &[u32], stage: ShaderStage) -> Result<ShaderReflection, String> {
    let entry_points = spirq::ReflectConfig::new()
        .spv(code)
        .ref_all_rscs(true)
        .reflect()
        .map_err(|e| format!("{e:?}"))?;

    let stages = stage.vk_stage();
    let mut reflection = ShaderReflection::default();
    for entry_point in &entry_points {
        for var in &entry_point.vars {
            match var {
                spirq::var::Variable::Descriptor { name, desc_bind, desc_ty, .. } => {
                    let Some(ty) = descriptor_type(desc_ty) else {
                        log::warn!("[SHADER] Skipping unsupported descriptor type {:?}", desc_ty);
                        continue;
                    };
                    reflection.bindings.push(ReflectedBinding {
                        name: name.clone().unwrap_or_default(),
                        set: desc_bind.set(),
                        binding: desc_bind.bind(),
                        ty,
                        stages,
                    });
                }
                spirq::var::Variable::PushConstant { ty, .. } => {
                    reflection.push_constants.push(vk::PushConstantRange {
                        stage_flags: stages,
                        offset: 0,
                        size: ty.nbyte().unwrap_or(0) as u32,
                    });
                }
                _ => {}
            }
        }
    }
    Ok(reflection)
}

/// A compiled shader module with the artifacts its variant asked to keep
pub struct Shader {
    device: Option<Arc<Device>>,
    module: vk::ShaderModule,
    variant: ShaderVariant,
    entry_point: CString,
    source: Option<String>,
    assembly: Option<String>,
    bytecode: Option<Vec<u32>>,
    reflection: Option<ShaderReflection>,
}

impl Shader {
    /// Create the Vulkan module for `bytecode`
    pub fn from_spirv(device: Arc<Device>, variant: ShaderVariant, bytecode: &[u32]) -> Result<Self, ShaderError> {
        let entry_point = CString::new(variant.entry_point())
            .map_err(|_| ShaderError::EntryPoint(variant.entry_point().to_string()))?;
        let create_info = vk::ShaderModuleCreateInfo::builder().code(bytecode);
        let module = unsafe {
            device.logical().create_shader_module(&create_info, None)
                .map_err(ShaderError::Module)?
        };
        Ok(Self {
            device: Some(device),
            module,
            variant,
            entry_point,
            source: None,
            assembly: None,
            bytecode: None,
            reflection: None,
        })
    }

    /// A shader without a Vulkan module, for code paths that never reach the GPU
    pub fn detached(variant: ShaderVariant) -> Self {
        let entry_point = CString::new(variant.entry_point()).unwrap_or_default();
        Self {
            device: None,
            module: vk::ShaderModule::null(),
            variant,
            entry_point,
            source: None,
            assembly: None,
            bytecode: None,
            reflection: None,
        }
    }

    pub(crate) fn set_source(&mut self, source: String) {
        self.source = Some(source);
    }

    pub(crate) fn set_assembly(&mut self, assembly: String) {
        self.assembly = Some(assembly);
    }

    pub(crate) fn set_bytecode(&mut self, bytecode: Vec<u32>) {
        self.bytecode = Some(bytecode);
    }

    pub(crate) fn set_reflection(&mut self, reflection: ShaderReflection) {
        self.reflection = Some(reflection);
    }

    /// Module handle
    pub fn module(&self) -> vk::ShaderModule {
        self.module
    }

    /// Variant this shader was compiled from
    pub fn variant(&self) -> &ShaderVariant {
        &self.variant
    }

    /// Entry point as a C string
    pub fn entry_point(&self) -> &CStr {
        &self.entry_point
    }

    /// GLSL source, if kept
    pub fn source(&self) -> Option<&str> {
        self.source.as_deref()
    }

    /// SPIR-V assembly, if kept
    pub fn assembly(&self) -> Option<&str> {
        self.assembly.as_deref()
    }

    /// SPIR-V words, if kept
    pub fn bytecode(&self) -> Option<&[u32]> {
        self.bytecode.as_deref()
    }

    /// Reflection data, if requested
    pub fn reflection(&self) -> Option<&ShaderReflection> {
        self.reflection.as_ref()
    }

    /// Stage description for pipeline creation; borrows the entry point from `self`
    pub fn stage_info(&self) -> vk::PipelineShaderStageCreateInfo {
        vk::PipelineShaderStageCreateInfo::builder()
            .stage(self.variant.stage().vk_stage())
            .module(self.module)
            .name(&self.entry_point)
            .build()
    }
}

impl Drop for Shader {
    fn drop(&mut self) {
        if let Some(device) = &self.device {
            unsafe { device.logical().destroy_shader_module(self.module, None) };
        }
    }
}

impl std::fmt::Debug for Shader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Shader")
            .field("path", &self.variant.path())
            .field("stage", &self.variant.stage())
            .field("module", &self.module)
            .finish()
    }
}
