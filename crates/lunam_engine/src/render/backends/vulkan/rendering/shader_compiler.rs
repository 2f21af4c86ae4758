//! GLSL to SPIR-V compilation through shaderc
//!
//! Sources and includes are read through the [`AssetAccessor`], so the
//! compiler works the same against loose files and packed archives.
//! Compilation targets Vulkan 1.2 with performance optimization, and
//! warnings are treated as errors.

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use super::shader::{reflect_spirv, Shader, ShaderError, ShaderStage, ShaderVariant, KeepArtifacts};
use crate::assets::AssetAccessor;
use crate::render::backends::vulkan::initialization::device::Device;

/// Turns a [`ShaderVariant`] into a [`Shader`]
pub trait CompileShader {
    /// Compile `variant`, returning the shader or a message describing why it failed
    fn compile(&mut self, variant: &ShaderVariant) -> Result<Shader, ShaderError>;
}

/// Paths tried, in order, for an `#include` of `requested` from `requesting`
///
/// Quoted includes look next to the including file first; both forms then
/// search the include directories.
pub fn include_candidates(
    requested: &str,
    requesting: &str,
    relative: bool,
    include_dirs: &[String],
) -> Vec<String> {
    let mut candidates = Vec::with_capacity(include_dirs.len() + 1);
    if relative {
        let sibling = match Path::new(requesting).parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.join(requested),
            _ => Path::new(requested).to_path_buf(),
        };
        candidates.push(sibling.to_string_lossy().replace('\\', "/"));
    }
    for dir in include_dirs {
        candidates.push(format!("{}/{}", dir.trim_end_matches('/'), requested));
    }
    candidates
}

fn shader_kind(stage: ShaderStage) -> shaderc::ShaderKind {
    match stage {
        ShaderStage::Vertex => shaderc::ShaderKind::Vertex,
        ShaderStage::Fragment => shaderc::ShaderKind::Fragment,
        ShaderStage::Compute => shaderc::ShaderKind::Compute,
    }
}

/// shaderc-backed compiler creating Vulkan shader modules
pub struct ShaderCompiler {
    device: Arc<Device>,
    accessor: Arc<dyn AssetAccessor>,
    include_dirs: Vec<String>,
    compiler: shaderc::Compiler,
}

impl ShaderCompiler {
    /// Create a compiler resolving includes in `include_dirs`
    pub fn new(
        device: Arc<Device>,
        accessor: Arc<dyn AssetAccessor>,
        include_dirs: Vec<String>,
    ) -> Result<Self, ShaderError> {
        let compiler = shaderc::Compiler::new()
            .ok_or_else(|| ShaderError::CompilerUnavailable("shaderc::Compiler::new failed".to_string()))?;
        log::info!("[SHADER] Shader compiler initialized");
        Ok(Self { device, accessor, include_dirs, compiler })
    }

    fn options(&self, variant: &ShaderVariant) -> Result<shaderc::CompileOptions<'static>, ShaderError> {
        let mut options = shaderc::CompileOptions::new()
            .ok_or_else(|| ShaderError::CompilerUnavailable("shaderc::CompileOptions::new failed".to_string()))?;
        options.set_source_language(shaderc::SourceLanguage::GLSL);
        options.set_target_env(shaderc::TargetEnv::Vulkan, shaderc::EnvVersion::Vulkan1_2 as u32);
        options.set_optimization_level(shaderc::OptimizationLevel::Performance);
        options.set_warnings_as_errors();

        for name in variant.macros() {
            options.add_macro_definition(name, None);
        }
        for (name, value) in variant.macro_values() {
            options.add_macro_definition(name, Some(&value.to_string()));
        }

        let accessor = Arc::clone(&self.accessor);
        let include_dirs = self.include_dirs.clone();
        options.set_include_callback(move |requested, include_type, requesting, _depth| {
            let relative = matches!(include_type, shaderc::IncludeType::Relative);
            for candidate in include_candidates(requested, requesting, relative, &include_dirs) {
                if let Ok(content) = accessor.load_txt_file(&candidate) {
                    log::debug!("[SHADER] Resolved include {} -> {}", requested, candidate);
                    return Ok(shaderc::ResolvedInclude { resolved_name: candidate, content });
                }
            }
            Err(format!("Requested include file does not exist: {requested}"))
        });
        Ok(options)
    }
}

impl CompileShader for ShaderCompiler {
    fn compile(&mut self, variant: &ShaderVariant) -> Result<Shader, ShaderError> {
        let start = Instant::now();

        let source = self
            .accessor
            .load_txt_file(variant.path())
            .map_err(|_| ShaderError::Load { path: variant.path().to_string() })?;

        let file_name = Path::new(variant.path())
            .file_name()
            .map_or_else(|| variant.path().to_string(), |name| name.to_string_lossy().into_owned());
        let options = self.options(variant)?;
        let kind = shader_kind(variant.stage());
        let entry = variant.entry_point();

        let preprocessed = self
            .compiler
            .preprocess(&source, variant.path(), entry, Some(&options))
            .map_err(|e| ShaderError::Preprocess { file: file_name.clone(), message: e.to_string() })?
            .as_text();

        let artifact = self
            .compiler
            .compile_into_spirv(&preprocessed, kind, variant.path(), entry, Some(&options))
            .map_err(|e| ShaderError::Compile { file: file_name.clone(), message: e.to_string() })?;
        let bytecode = artifact.as_binary().to_vec();
        if bytecode.is_empty() {
            return Err(ShaderError::EmptyBytecode { file: file_name });
        }

        let mut shader = Shader::from_spirv(Arc::clone(&self.device), variant.clone(), &bytecode)?;

        if variant.reflect() {
            let reflection = reflect_spirv(&bytecode, variant.stage())
                .map_err(|message| ShaderError::Reflection { file: file_name.clone(), message })?;
            shader.set_reflection(reflection);
        }
        let keep = variant.keep();
        if keep.contains(KeepArtifacts::ASSEMBLY) {
            let assembly = self
                .compiler
                .compile_into_spirv_assembly(&preprocessed, kind, variant.path(), entry, Some(&options))
                .map_err(|e| ShaderError::Compile { file: file_name.clone(), message: e.to_string() })?;
            shader.set_assembly(assembly.as_text());
        }
        if keep.contains(KeepArtifacts::SOURCE) {
            shader.set_source(source);
        }
        if keep.contains(KeepArtifacts::BYTECODE) {
            shader.set_bytecode(bytecode);
        }

        log::info!("[SHADER] Compiled shader: {} in {:.03}s", file_name, start.elapsed().as_secs_f64());
        Ok(shader)
    }
}

impl Drop for ShaderCompiler {
    fn drop(&mut self) {
        log::info!("[SHADER] Shader compiler shutdown");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relative_include_checks_sibling_first() {
        let dirs = vec!["engine_assets/shaders/include".to_string()];
        let candidates = include_candidates("common.h", "shaders/pbr/pbr.frag", true, &dirs);
        assert_eq!(
            candidates,
            vec![
                "shaders/pbr/common.h".to_string(),
                "engine_assets/shaders/include/common.h".to_string(),
            ]
        );
    }

    #[test]
    fn test_standard_include_uses_dirs_only() {
        let dirs = vec!["a/".to_string(), "b".to_string()];
        let candidates = include_candidates("x.h", "main.frag", false, &dirs);
        assert_eq!(candidates, vec!["a/x.h".to_string(), "b/x.h".to_string()]);
    }

    #[test]
    fn test_relative_include_without_parent() {
        let candidates = include_candidates("x.h", "main.frag", true, &[]);
        assert_eq!(candidates, vec!["x.h".to_string()]);
    }
}
