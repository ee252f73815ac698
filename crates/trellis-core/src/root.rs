//! A reconciler bound to a backend.

use crate::backend::{Backend, WidgetId};
use crate::builder::capture_root;
use crate::config::RenderConfig;
use crate::element::Element;
use crate::error::{RenderError, RenderResult};
use crate::props::PropValue;
use crate::reconciler::{Reconciler, RenderOutcome};
use crate::runtime::{Runtime, RuntimeHandle};
use crate::NodeId;

/// Drives render passes and applies their commands to a [`Backend`].
///
/// Every successful pass is committed in three steps: teardown of removed
/// nodes, command application, then lifecycle callbacks, effects and async
/// starts.
pub struct Root<B: Backend> {
    reconciler: Reconciler,
    backend: B,
    runtime: Runtime,
    config: RenderConfig,
}

impl<B: Backend> Root<B> {
    pub fn new(backend: B) -> Self {
        Self::with_runtime(backend, Runtime::default())
    }

    pub fn with_runtime(backend: B, runtime: Runtime) -> Self {
        Self::with_config(backend, runtime, RenderConfig::default())
    }

    pub fn with_config(backend: B, runtime: Runtime, config: RenderConfig) -> Self {
        Self {
            reconciler: Reconciler::with_config(runtime.clone(), config.clone()),
            backend,
            runtime,
            config,
        }
    }

    pub fn render(&mut self, element: Element) -> Result<RenderOutcome, RenderError> {
        let outcome = self.reconciler.render(element)?;
        self.commit(&outcome)?;
        Ok(outcome)
    }

    /// Captures the single element emitted by `content` and renders it.
    pub fn set_content(&mut self, content: impl FnOnce() -> RenderResult) -> Result<RenderOutcome, RenderError> {
        let element = capture_root(content)?;
        self.render(element)
    }

    pub fn request_rerender(&mut self, nodes: &[NodeId]) -> Result<RenderOutcome, RenderError> {
        let outcome = self.reconciler.request_rerender(nodes)?;
        self.commit(&outcome)?;
        Ok(outcome)
    }

    pub fn hot_swap(&mut self, node: NodeId, replacement: Element) -> Result<RenderOutcome, RenderError> {
        let outcome = self.reconciler.hot_swap(node, replacement)?;
        self.commit(&outcome)?;
        Ok(outcome)
    }

    /// Drains ready tasks and renders until nothing is pending. Returns the
    /// number of passes run.
    pub fn pump(&mut self) -> Result<usize, RenderError> {
        let handle = self.runtime.handle();
        let mut passes = 0;
        loop {
            handle.drain_tasks();
            if !self.reconciler.needs_render() {
                return Ok(passes);
            }
            if passes >= self.config.max_passes {
                log::error!("render did not settle after {passes} passes");
                return Err(RenderError::Runaway { passes });
            }
            self.request_rerender(&[])?;
            passes += 1;
        }
    }

    /// Calls the handler stored under `prop` on the host bound to `widget`.
    /// Returns `false` when there is no such handler.
    pub fn dispatch(&mut self, widget: WidgetId, prop: &str, args: &[PropValue]) -> bool {
        match self.reconciler.handler(widget, prop) {
            Some(handler) => {
                log::trace!("dispatch {prop} on {widget}");
                handler.call(args);
                true
            }
            None => false,
        }
    }

    /// Unmounts the tree, then cancels and drains every remaining task.
    pub fn shutdown(&mut self) -> RenderResult {
        let outcome = self.reconciler.unmount_all()?;
        self.commit(&outcome)?;
        let handle = self.runtime.handle();
        handle.cancel_all_tasks();
        while handle.has_ready_tasks() {
            handle.drain_tasks();
        }
        log::debug!("shutdown complete, {} tasks left", handle.live_tasks());
        Ok(())
    }

    fn commit(&mut self, outcome: &RenderOutcome) -> RenderResult {
        self.reconciler.run_teardown();
        for command in &outcome.commands {
            if let Err(err) = self.backend.apply(command) {
                log::error!("backend rejected {command:?}: {err}");
                self.reconciler.discard_post_commit();
                return Err(err.into());
            }
        }
        self.reconciler.run_effects();
        if self.config.debug_tree {
            log::debug!("committed tree:\n{}", self.reconciler.dump_tree());
        }
        Ok(())
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    pub fn reconciler(&self) -> &Reconciler {
        &self.reconciler
    }

    pub fn runtime_handle(&self) -> RuntimeHandle {
        self.runtime.handle()
    }

    pub fn config(&self) -> &RenderConfig {
        &self.config
    }
}

#[cfg(test)]
#[path = "tests/root_tests.rs"]
mod tests;
