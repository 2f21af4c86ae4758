//! Memoized shader compilation
//!
//! Shaders are cached by [`ShaderVariant::cache_key`]. The compiler is built
//! on the first miss and can be dropped again with
//! [`ShaderCache::shutdown_compiler`] once loading is done. Failed
//! compilations are logged and never cached, so a fixed source compiles on
//! the next request.
//!
//! Compilation runs under the compiler's own lock, not the cache lock, so
//! lookups of cached shaders never wait behind a compile. When two threads
//! miss on the same variant, the first result stored wins.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use super::shader::{Shader, ShaderError, ShaderVariant, VariantKey};
use super::shader_compiler::{CompileShader, ShaderCompiler};
use crate::assets::AssetAccessor;
use crate::render::backends::vulkan::initialization::device::Device;

/// Builds the compiler on the first cache miss
pub type CompilerFactory = Box<dyn Fn() -> Result<Box<dyn CompileShader + Send>, ShaderError> + Send + Sync>;

type SharedCompiler = Arc<Mutex<Box<dyn CompileShader + Send>>>;

struct CacheState {
    shaders: HashMap<VariantKey, Arc<Shader>>,
    compiler: Option<SharedCompiler>,
}

/// Thread-safe variant-keyed shader cache
pub struct ShaderCache {
    state: Mutex<CacheState>,
    factory: CompilerFactory,
}

impl ShaderCache {
    /// Cache using `factory` to build its compiler lazily
    pub fn new(factory: CompilerFactory) -> Self {
        Self {
            state: Mutex::new(CacheState {
                shaders: HashMap::new(),
                compiler: None,
            }),
            factory,
        }
    }

    /// Cache backed by a shaderc [`ShaderCompiler`]
    pub fn with_shaderc(device: Arc<Device>, accessor: Arc<dyn AssetAccessor>, include_dirs: Vec<String>) -> Self {
        Self::new(Box::new(move || {
            let compiler = ShaderCompiler::new(Arc::clone(&device), Arc::clone(&accessor), include_dirs.clone())?;
            Ok(Box::new(compiler) as Box<dyn CompileShader + Send>)
        }))
    }

    fn lock(&self) -> MutexGuard<'_, CacheState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Cached shader for `variant`, compiling it on a miss
    pub fn get_shader(&self, variant: ShaderVariant) -> Result<Arc<Shader>, ShaderError> {
        let key = variant.cache_key();
        let compiler = {
            let mut state = self.lock();
            if let Some(shader) = state.shaders.get(&key) {
                return Ok(Arc::clone(shader));
            }
            match &state.compiler {
                Some(compiler) => Arc::clone(compiler),
                None => {
                    let compiler: SharedCompiler = Arc::new(Mutex::new((self.factory)()?));
                    state.compiler = Some(Arc::clone(&compiler));
                    compiler
                }
            }
        };

        let compiled = compiler
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .compile(&variant);
        match compiled {
            Ok(shader) => {
                let mut state = self.lock();
                let cached = state.shaders.entry(key).or_insert_with(|| Arc::new(shader));
                Ok(Arc::clone(cached))
            }
            Err(e) => {
                log::error!("[SHADER] {}", e);
                Err(e)
            }
        }
    }

    /// Drop the compiler; the next miss builds a new one
    pub fn shutdown_compiler(&self) {
        self.lock().compiler = None;
    }

    /// Forget every cached shader so the next request recompiles
    pub fn invalidate_all(&self) {
        self.lock().shaders.clear();
    }

    /// Number of cached shaders
    pub fn len(&self) -> usize {
        self.lock().shaders.len()
    }

    /// Whether nothing is cached
    pub fn is_empty(&self) -> bool {
        self.lock().shaders.is_empty()
    }

    /// Whether a compiler is currently alive
    pub fn has_compiler(&self) -> bool {
        self.lock().compiler.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::backends::vulkan::rendering::shader::ShaderStage;
    use crate::render::backends::vulkan::state::signal::Signal;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    struct CountingCompiler {
        compiles: Arc<AtomicUsize>,
        fail_path: Option<String>,
    }

    impl CompileShader for CountingCompiler {
        fn compile(&mut self, variant: &ShaderVariant) -> Result<Shader, ShaderError> {
            self.compiles.fetch_add(1, Ordering::SeqCst);
            if self.fail_path.as_deref() == Some(variant.path()) {
                return Err(ShaderError::Compile {
                    file: variant.path().to_string(),
                    message: "syntax error".to_string(),
                });
            }
            Ok(Shader::detached(variant.clone()))
        }
    }

    fn cache(compiles: &Arc<AtomicUsize>, factories: &Arc<AtomicUsize>, fail_path: Option<&str>) -> ShaderCache {
        let compiles = Arc::clone(compiles);
        let factories = Arc::clone(factories);
        let fail_path = fail_path.map(str::to_string);
        ShaderCache::new(Box::new(move || {
            factories.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(CountingCompiler {
                compiles: Arc::clone(&compiles),
                fail_path: fail_path.clone(),
            }) as Box<dyn CompileShader + Send>)
        }))
    }

    fn variant(path: &str) -> ShaderVariant {
        let mut variant = ShaderVariant::new(path, ShaderStage::Fragment);
        variant.set_int("MAX_LIGHTS", 8);
        variant
    }

    #[test]
    fn test_identical_variant_hits_cache() {
        let compiles = Arc::new(AtomicUsize::new(0));
        let factories = Arc::new(AtomicUsize::new(0));
        let cache = cache(&compiles, &factories, None);

        let first = cache.get_shader(variant("pbr.frag")).unwrap();
        let second = cache.get_shader(variant("pbr.frag")).unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(compiles.load(Ordering::SeqCst), 1);
        assert_eq!(cache.len(), 1);
    }

    #[test]
    fn test_compiler_built_lazily_once() {
        let compiles = Arc::new(AtomicUsize::new(0));
        let factories = Arc::new(AtomicUsize::new(0));
        let cache = cache(&compiles, &factories, None);
        assert!(!cache.has_compiler());
        assert_eq!(factories.load(Ordering::SeqCst), 0);

        cache.get_shader(variant("a.frag")).unwrap();
        cache.get_shader(variant("b.frag")).unwrap();
        assert_eq!(factories.load(Ordering::SeqCst), 1);

        cache.shutdown_compiler();
        assert!(!cache.has_compiler());
        cache.get_shader(variant("a.frag")).unwrap();
        assert_eq!(factories.load(Ordering::SeqCst), 1);
        cache.get_shader(variant("c.frag")).unwrap();
        assert_eq!(factories.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_failures_are_not_cached() {
        let compiles = Arc::new(AtomicUsize::new(0));
        let factories = Arc::new(AtomicUsize::new(0));
        let cache = cache(&compiles, &factories, Some("broken.frag"));

        assert!(cache.get_shader(variant("broken.frag")).is_err());
        assert!(cache.get_shader(variant("broken.frag")).is_err());
        assert_eq!(compiles.load(Ordering::SeqCst), 2);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_invalidate_forces_recompile() {
        let compiles = Arc::new(AtomicUsize::new(0));
        let factories = Arc::new(AtomicUsize::new(0));
        let cache = cache(&compiles, &factories, None);

        let before = cache.get_shader(variant("a.frag")).unwrap();
        cache.invalidate_all();
        let after = cache.get_shader(variant("a.frag")).unwrap();
        assert!(!Arc::ptr_eq(&before, &after));
        assert_eq!(compiles.load(Ordering::SeqCst), 2);
    }

    struct GatedCompiler {
        started: Arc<Signal>,
        release: Arc<Signal>,
    }

    impl CompileShader for GatedCompiler {
        fn compile(&mut self, variant: &ShaderVariant) -> Result<Shader, ShaderError> {
            if variant.path() == "slow.frag" {
                self.started.trigger(true, 1);
                self.release.wait(false, 0);
            }
            Ok(Shader::detached(variant.clone()))
        }
    }

    #[test]
    fn test_cached_lookup_not_blocked_by_compile() {
        let started = Arc::new(Signal::new());
        let release = Arc::new(Signal::new());
        let cache = {
            let started = Arc::clone(&started);
            let release = Arc::clone(&release);
            Arc::new(ShaderCache::new(Box::new(move || {
                Ok(Box::new(GatedCompiler {
                    started: Arc::clone(&started),
                    release: Arc::clone(&release),
                }) as Box<dyn CompileShader + Send>)
            })))
        };
        let warm = cache.get_shader(variant("fast.frag")).unwrap();

        let slow = {
            let cache = Arc::clone(&cache);
            thread::spawn(move || cache.get_shader(variant("slow.frag")).map(|_| ()))
        };
        started.wait(false, 0);

        let hit = cache.get_shader(variant("fast.frag")).unwrap();
        assert!(Arc::ptr_eq(&warm, &hit));
        assert_eq!(cache.len(), 1);

        release.trigger(true, 1);
        slow.join().unwrap().unwrap();
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn test_variants_differing_only_in_macros_get_own_entries() {
        let compiles = Arc::new(AtomicUsize::new(0));
        let factories = Arc::new(AtomicUsize::new(0));
        let cache = cache(&compiles, &factories, None);

        let mut flag = ShaderVariant::new("lit.frag", ShaderStage::Fragment);
        flag.set_macro("SHADOWS");
        let mut valued = ShaderVariant::new("lit.frag", ShaderStage::Fragment);
        valued.set_int("SHADOWS", 1);

        let a = cache.get_shader(flag).unwrap();
        let b = cache.get_shader(valued).unwrap();
        assert!(!Arc::ptr_eq(&a, &b));
        assert_eq!(cache.len(), 2);
    }
}
