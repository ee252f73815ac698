use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use trellis_core::{
    capture_root, Command, MemoryBackend, NodeId, PropValue, Reconciler, RenderConfig, RenderError,
    RenderOutcome, RenderResult, Root, Runtime, RuntimeHandle, RuntimeScheduler, WidgetId,
};

/// Scheduler that counts frame requests.
#[derive(Debug, Default)]
pub struct FrameCounter(AtomicUsize);

impl FrameCounter {
    pub fn count(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }
}

impl RuntimeScheduler for FrameCounter {
    fn schedule_frame(&self) {
        self.0.fetch_add(1, Ordering::SeqCst);
    }
}

/// Headless harness for exercising component trees in tests.
///
/// Owns a [`Root`] over a [`MemoryBackend`], keeps the installed content so
/// it can be re-rendered, and exposes helpers for pumping updates, draining
/// frame callbacks and inspecting the commands and trees produced.
pub struct TestRule {
    root: Root<MemoryBackend>,
    content: Option<Box<dyn FnMut() -> RenderResult>>,
    frames: Arc<FrameCounter>,
}

impl TestRule {
    pub fn new() -> Self {
        Self::with_config(RenderConfig::default())
    }

    pub fn with_config(config: RenderConfig) -> Self {
        let frames = Arc::new(FrameCounter::default());
        let runtime = Runtime::new(frames.clone());
        Self {
            root: Root::with_config(MemoryBackend::new(), runtime, config),
            content: None,
            frames,
        }
    }

    /// Installs `content` and renders it. `content` must emit exactly one
    /// root element.
    pub fn set_content(&mut self, content: impl FnMut() -> RenderResult + 'static) -> Result<RenderOutcome, RenderError> {
        self.content = Some(Box::new(content));
        self.recompose()
    }

    /// Re-runs the installed content and reconciles its output.
    pub fn recompose(&mut self) -> Result<RenderOutcome, RenderError> {
        let Some(content) = self.content.as_mut() else {
            return Ok(RenderOutcome::default());
        };
        let element = capture_root(|| content())?;
        self.root.render(element)
    }

    pub fn has_content(&self) -> bool {
        self.content.is_some()
    }

    /// Drains tasks and renders until nothing is pending. Returns the number
    /// of passes run.
    pub fn pump_until_idle(&mut self) -> Result<usize, RenderError> {
        self.root.pump()
    }

    /// Runs frame callbacks stamped `frame_time_nanos`, then pumps.
    pub fn advance_frame(&mut self, frame_time_nanos: u64) -> Result<usize, RenderError> {
        self.runtime_handle().drain_frame_callbacks(frame_time_nanos);
        self.pump_until_idle()
    }

    /// Commands applied to the backend since the last call.
    pub fn take_commands(&mut self) -> Vec<Command> {
        self.root.backend_mut().take_applied()
    }

    /// Committed node tree, one node per line.
    pub fn dump(&self) -> String {
        self.root.reconciler().dump_tree()
    }

    /// Backend widget tree, one widget per line.
    pub fn dump_widgets(&self) -> String {
        self.root.backend().dump_tree()
    }

    /// Number of frames the runtime requested from the host.
    pub fn frame_requests(&self) -> usize {
        self.frames.count()
    }

    /// Widget of the first host node, in tree order, whose `text` or
    /// `title` prop equals `text`.
    pub fn find_text(&self, text: &str) -> Option<WidgetId> {
        let reconciler = self.root.reconciler();
        let node = reconciler.find(|node| {
            node.props().is_some_and(|props| {
                ["text", "title"]
                    .iter()
                    .any(|name| props.get(*name).and_then(PropValue::as_str) == Some(text))
            })
        })?;
        reconciler.node(node)?.widget()
    }

    /// Texts of the children of `widget`, in backend order.
    pub fn child_texts(&self, widget: WidgetId) -> Vec<String> {
        let backend = self.root.backend();
        backend
            .children_of(widget)
            .iter()
            .filter_map(|child| backend.widget(*child))
            .filter_map(|child| {
                child
                    .props
                    .get("text")
                    .or_else(|| child.props.get("title"))
                    .and_then(PropValue::as_str)
                    .map(str::to_string)
            })
            .collect()
    }

    /// Invokes the `on_click` handler bound to `widget`. Returns `false`
    /// when it has none.
    pub fn click(&mut self, widget: WidgetId) -> bool {
        self.root.dispatch(widget, "on_click", &[])
    }

    pub fn request_rerender(&mut self, nodes: &[NodeId]) -> Result<RenderOutcome, RenderError> {
        self.root.request_rerender(nodes)
    }

    pub fn shutdown(&mut self) -> RenderResult {
        self.content = None;
        self.root.shutdown()
    }

    pub fn runtime_handle(&self) -> RuntimeHandle {
        self.root.runtime_handle()
    }

    pub fn backend(&self) -> &MemoryBackend {
        self.root.backend()
    }

    pub fn reconciler(&self) -> &Reconciler {
        self.root.reconciler()
    }

    pub fn root(&mut self) -> &mut Root<MemoryBackend> {
        &mut self.root
    }
}

impl Default for TestRule {
    fn default() -> Self {
        Self::new()
    }
}

/// Runs `f` against a fresh [`TestRule`].
pub fn run_test<R>(f: impl FnOnce(&mut TestRule) -> R) -> R {
    let mut rule = TestRule::new();
    f(&mut rule)
}
