//! Named pipeline registry
//!
//! Registration is transactional: a pipeline that fails to build never
//! replaces a working one of the same name. Rebuilding everything (after a
//! shader edit, for instance) follows the same rule per pipeline.

use std::collections::HashMap;
use std::time::Instant;

use ash::vk;

use super::pipeline::{initialize, Pipeline, PipelineBackend, PipelineRecipe};

/// Name to pipeline map over a [`PipelineBackend`]
pub struct PipelineCache<B: PipelineBackend> {
    backend: B,
    pipelines: HashMap<String, Pipeline>,
}

impl<B: PipelineBackend> PipelineCache<B> {
    /// Empty cache building through `backend`
    pub fn new(backend: B) -> Self {
        Self {
            backend,
            pipelines: HashMap::new(),
        }
    }

    /// Build `recipe` and install it under its name
    ///
    /// The build runs the recipe's `pre_configure` hook, creates the Vulkan
    /// objects and runs `post_configure`. An existing pipeline of the same
    /// name is kept aside while the new one builds. On success it is destroyed and replaced; on failure it stays
    /// installed and `false` is returned, unless `force_success` is set, in
    /// which case the failure panics.
    pub fn register_pipeline(&mut self, recipe: impl Into<PipelineRecipe>, force_success: bool) -> bool {
        let recipe = recipe.into();
        let name = recipe.name().to_string();
        let kind = recipe.kind();
        let previous = self.pipelines.remove(&name);
        let attempt = previous.as_ref().map_or(1, |p| p.num_creations() + 1);
        log::info!("[PIPELINE] Creating {} pipeline '{}' (build #{})", kind.label(), name, attempt);

        let start = Instant::now();
        match initialize(&mut self.backend, &recipe) {
            Ok(handles) => {
                if let Some(old) = previous {
                    self.backend.destroy(old.handles());
                }
                log::info!(
                    "[PIPELINE] Created {} pipeline '{}' in {:.03}s",
                    kind.label(),
                    name,
                    start.elapsed().as_secs_f64()
                );
                self.pipelines.insert(name, Pipeline::new(recipe, handles, attempt));
                true
            }
            Err(e) => {
                log::error!("[PIPELINE] Failed to create pipeline '{}': {}", name, e);
                if force_success {
                    panic!("Failed to create required pipeline '{name}': {e}");
                }
                if let Some(old) = previous {
                    log::warn!("[PIPELINE] Keeping previous instance of '{}'", name);
                    self.pipelines.insert(name, old);
                }
                false
            }
        }
    }

    /// Pipeline registered as `name`
    ///
    /// # Panics
    /// When no pipeline has that name; the registered names are logged first.
    pub fn get_pipeline(&self, name: &str) -> &Pipeline {
        match self.pipelines.get(name) {
            Some(pipeline) => pipeline,
            None => {
                log::error!("[PIPELINE] Pipeline not found in registry: '{}'", name);
                for key in self.pipelines.keys() {
                    log::error!("[PIPELINE] Available pipeline: '{}'", key);
                }
                panic!("Pipeline not found in registry: '{name}'");
            }
        }
    }

    /// Pipeline registered as `name`, if any
    pub fn try_get_pipeline(&self, name: &str) -> Option<&Pipeline> {
        self.pipelines.get(name)
    }

    /// All registered pipelines
    pub fn pipelines(&self) -> impl Iterator<Item = &Pipeline> {
        self.pipelines.values()
    }

    /// Number of registered pipelines
    pub fn len(&self) -> usize {
        self.pipelines.len()
    }

    /// Whether nothing is registered
    pub fn is_empty(&self) -> bool {
        self.pipelines.is_empty()
    }

    /// The backend pipelines are built through
    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Destroy every pipeline
    pub fn invalidate_all(&mut self) {
        for (_, pipeline) in self.pipelines.drain() {
            self.backend.destroy(pipeline.handles());
        }
    }

    /// Recompile shaders and rebuild every pipeline from its recipe
    ///
    /// Pipelines that fail to rebuild keep their current objects. Returns
    /// the number rebuilt.
    pub fn recreate_all(&mut self) -> usize {
        self.backend.invalidate_shaders();
        let mut rebuilt = 0;
        for pipeline in self.pipelines.values_mut() {
            if rebuild(&mut self.backend, pipeline) {
                rebuilt += 1;
            }
        }
        log::info!("[PIPELINE] Recreated {}/{} pipelines", rebuilt, self.pipelines.len());
        rebuilt
    }

    /// Point every graphics recipe targeting `old` at `new` and rebuild those pipelines
    ///
    /// Used when the scene render pass is recreated. Pipelines that fail to
    /// rebuild keep their current objects and the updated recipe, so the
    /// next [`Self::recreate_all`] retries them. Returns the number rebuilt.
    pub fn retarget_render_pass(&mut self, old: vk::RenderPass, new: vk::RenderPass) -> usize {
        let mut rebuilt = 0;
        for pipeline in self.pipelines.values_mut() {
            match pipeline.recipe_mut() {
                PipelineRecipe::Graphics(recipe) if recipe.render_pass == old => recipe.render_pass = new,
                _ => continue,
            }
            if rebuild(&mut self.backend, pipeline) {
                rebuilt += 1;
            }
        }
        rebuilt
    }
}

fn rebuild<B: PipelineBackend>(backend: &mut B, pipeline: &mut Pipeline) -> bool {
    match initialize(backend, pipeline.recipe()) {
        Ok(handles) => {
            let old = pipeline.replace_handles(handles);
            backend.destroy(old);
            true
        }
        Err(e) => {
            log::error!("[PIPELINE] Failed to recreate pipeline '{}', keeping old one: {}", pipeline.name(), e);
            false
        }
    }
}

impl<B: PipelineBackend> Drop for PipelineCache<B> {
    fn drop(&mut self) {
        self.invalidate_all();
    }
}
