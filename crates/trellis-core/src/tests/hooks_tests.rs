use std::cell::Cell;

use super::*;
use crate::backend::MemoryBackend;
use crate::element::{component, host, Component};
use crate::error::{RenderError, RenderResult};
use crate::root::Root;
use crate::tests::fixtures::{counting_runtime, Label, View};

thread_local! {
    static COUNTER: RefCell<Option<Setter<i32>>> = const { RefCell::new(None) };
    static RENDERS: Cell<usize> = const { Cell::new(0) };
    static LOG: RefCell<Vec<String>> = const { RefCell::new(Vec::new()) };
    static LAYOUT: Cell<u8> = const { Cell::new(0) };
    static MEMO_RUNS: Cell<usize> = const { Cell::new(0) };
}

fn log_line(line: impl Into<String>) {
    LOG.with(|log| log.borrow_mut().push(line.into()));
}

fn take_log() -> Vec<String> {
    LOG.with(|log| std::mem::take(&mut *log.borrow_mut()))
}

fn counter_setter() -> Setter<i32> {
    COUNTER.with(|slot| slot.borrow().clone().expect("counter mounted"))
}

fn root_text(root: &Root<MemoryBackend>) -> Option<String> {
    let backend = root.backend();
    let widget = backend.widget(backend.root()?)?;
    widget.props.get("text")?.as_str().map(str::to_string)
}

#[derive(PartialEq)]
struct Counter {
    label: &'static str,
}

impl Component for Counter {
    fn render(&self) -> RenderResult {
        RENDERS.with(|renders| renders.set(renders.get() + 1));
        let (count, set_count) = use_state(|| 0)?;
        COUNTER.with(|slot| *slot.borrow_mut() = Some(set_count));
        host(&Label)
            .prop("text", format!("{}: {count}", self.label))
            .emit()?;
        Ok(())
    }
}

fn counter(label: &'static str) -> Element {
    component(Counter { label }).build().expect("counter")
}

#[test]
fn queued_updaters_compose_and_schedule_one_frame() {
    let (runtime, scheduler) = counting_runtime();
    let mut root = Root::with_runtime(MemoryBackend::new(), runtime);
    root.render(counter("n")).expect("mount");
    let baseline = scheduler.count();

    let setter = counter_setter();
    setter.update(|value| value + 1);
    setter.update(|value| value + 1);
    assert_eq!(scheduler.count(), baseline + 1);
    assert_eq!(root_text(&root).as_deref(), Some("n: 0"));

    assert_eq!(root.pump().expect("pump"), 1);
    let node = root.reconciler().root().expect("root");
    assert_eq!(root.reconciler().state_value::<i32>(node, 0), Some(2));
    assert_eq!(root_text(&root).as_deref(), Some("n: 2"));
}

#[test]
fn setting_an_equal_value_does_not_rerender() {
    let mut root = Root::new(MemoryBackend::new());
    root.render(counter("n")).expect("mount");
    counter_setter().set(0);
    root.pump().expect("pump");
    assert_eq!(RENDERS.with(Cell::get), 1);
}

#[test]
fn state_survives_prop_changes() {
    let mut root = Root::new(MemoryBackend::new());
    root.render(counter("a")).expect("mount");
    counter_setter().set(7);
    root.pump().expect("pump");

    root.render(counter("b")).expect("new label");
    assert_eq!(root_text(&root).as_deref(), Some("b: 7"));
}

#[test]
fn setters_of_unmounted_components_are_ignored() {
    let mut root = Root::new(MemoryBackend::new());
    root.render(counter("a")).expect("mount");
    let setter = counter_setter();
    root.render(host(&View).build().expect("view")).expect("replace");

    setter.set(3);
    assert_eq!(root.pump().expect("pump"), 1);
    assert_eq!(RENDERS.with(Cell::get), 1);
}

/// Calls a different hook sequence depending on `LAYOUT`.
#[derive(PartialEq)]
struct Shifty {
    revision: u32,
}

impl Component for Shifty {
    fn render(&self) -> RenderResult {
        match LAYOUT.with(Cell::get) {
            0 => {
                use_state(|| 0)?;
            }
            1 => {
                use_effect(None::<()>, || ())?;
            }
            2 => {
                use_state(|| 0)?;
                use_state(|| 0)?;
            }
            _ => {}
        }
        host(&Label).prop("text", self.revision.to_string()).emit()?;
        Ok(())
    }
}

fn shifty(revision: u32) -> Element {
    component(Shifty { revision }).build().expect("shifty")
}

#[test]
fn changed_hook_order_is_reported() {
    let mut root = Root::new(MemoryBackend::new());
    root.render(shifty(0)).expect("mount");
    LAYOUT.with(|layout| layout.set(1));
    let err = root.render(shifty(1)).unwrap_err();
    assert!(matches!(
        err,
        RenderError::Hook(HookError::OrderMismatch {
            index: 0,
            expected: SlotTag::State,
            found: SlotTag::Effect,
            ..
        })
    ));
}

#[test]
fn extra_hook_calls_are_reported() {
    let mut root = Root::new(MemoryBackend::new());
    root.render(shifty(0)).expect("mount");
    LAYOUT.with(|layout| layout.set(2));
    let err = root.render(shifty(1)).unwrap_err();
    assert!(matches!(
        err,
        RenderError::Hook(HookError::Overrun {
            index: 1,
            previous: 1,
            ..
        })
    ));
}

#[test]
fn missing_hook_calls_are_reported() {
    let mut root = Root::new(MemoryBackend::new());
    LAYOUT.with(|layout| layout.set(2));
    root.render(shifty(0)).expect("mount");
    LAYOUT.with(|layout| layout.set(0));
    let err = root.render(shifty(1)).unwrap_err();
    assert!(matches!(
        err,
        RenderError::Hook(HookError::Underrun {
            used: 1,
            previous: 2,
            ..
        })
    ));
    let node = root.reconciler().root().expect("root");
    assert_eq!(
        root.reconciler().node(node).expect("node").slot_tags(),
        [SlotTag::State, SlotTag::State]
    );
}

#[test]
fn hooks_outside_render_fail() {
    assert!(matches!(use_state(|| 0), Err(HookError::OutsideRender)));
    assert!(matches!(use_node(), Err(HookError::OutsideRender)));
}

#[derive(PartialEq)]
struct Effectful {
    value: i32,
    every_render: bool,
}

impl Component for Effectful {
    fn render(&self) -> RenderResult {
        let value = self.value;
        let deps = if self.every_render { None } else { Some(value) };
        use_effect(deps, move || {
            log_line(format!("setup {value}"));
            Cleanup::new(move || log_line(format!("cleanup {value}")))
        })?;
        use_effect_final(move || log_line("final"))?;
        host(&Label).prop("text", value.to_string()).emit()?;
        Ok(())
    }
}

fn effectful(value: i32, every_render: bool) -> Element {
    component(Effectful { value, every_render })
        .build()
        .expect("effectful")
}

#[test]
fn effects_follow_dependencies_and_clean_up_once() {
    let mut root = Root::new(MemoryBackend::new());
    root.render(effectful(1, false)).expect("mount");
    assert_eq!(take_log(), ["setup 1"]);

    let node = root.reconciler().root().expect("root");
    root.request_rerender(&[node]).expect("same deps");
    assert!(take_log().is_empty());

    root.render(effectful(2, false)).expect("new deps");
    assert_eq!(take_log(), ["cleanup 1", "setup 2"]);

    root.render(host(&View).build().expect("view")).expect("unmount");
    assert_eq!(take_log(), ["cleanup 2", "final"]);
}

#[test]
fn effects_without_dependencies_run_after_every_render() {
    let mut root = Root::new(MemoryBackend::new());
    root.render(effectful(1, true)).expect("mount");
    let node = root.reconciler().root().expect("root");
    root.request_rerender(&[node]).expect("rerender");
    assert_eq!(take_log(), ["setup 1", "cleanup 1", "setup 1"]);
}

#[derive(PartialEq)]
struct Faulty {
    panics: bool,
}

impl Component for Faulty {
    fn render(&self) -> RenderResult {
        let panics = self.panics;
        use_effect(Some(()), move || -> Result<Cleanup, String> {
            if panics {
                panic!("setup exploded");
            }
            Err("setup refused".to_string())
        })?;
        use_effect(Some(()), || {
            log_line("sibling setup");
            Cleanup::new(|| log_line("sibling cleanup"))
        })?;
        host(&Label).emit()?;
        Ok(())
    }
}

#[test]
fn failing_effect_setup_registers_no_cleanup() {
    for panics in [false, true] {
        let mut root = Root::new(MemoryBackend::new());
        root.render(component(Faulty { panics }).build().expect("faulty"))
            .expect("effect failures do not fail the render");
        assert_eq!(take_log(), ["sibling setup"]);
        root.render(host(&View).build().expect("view")).expect("unmount");
        assert_eq!(take_log(), ["sibling cleanup"]);
    }
}

#[derive(PartialEq)]
struct Memoized {
    input: i32,
    noise: i32,
}

impl Component for Memoized {
    fn render(&self) -> RenderResult {
        let input = self.input;
        let doubled = use_memo(input, || {
            MEMO_RUNS.with(|runs| runs.set(runs.get() + 1));
            input * 2
        })?;
        let renders = use_ref(|| 0usize)?;
        *renders.borrow_mut() += 1;
        host(&Label)
            .prop("text", format!("{doubled}/{}/{}", renders.borrow(), self.noise))
            .emit()?;
        Ok(())
    }
}

#[test]
fn memo_recomputes_only_for_new_dependencies() {
    let mut root = Root::new(MemoryBackend::new());
    let memoized = |input, noise| component(Memoized { input, noise }).build().expect("memo");
    root.render(memoized(2, 0)).expect("mount");
    root.render(memoized(2, 1)).expect("noise");
    assert_eq!(MEMO_RUNS.with(Cell::get), 1);
    assert_eq!(root_text(&root).as_deref(), Some("4/2/1"));

    root.render(memoized(5, 1)).expect("input");
    assert_eq!(MEMO_RUNS.with(Cell::get), 2);
    assert_eq!(root_text(&root).as_deref(), Some("10/3/1"));
}

#[derive(PartialEq)]
struct Frame;

impl Component for Frame {
    fn render(&self) -> RenderResult {
        let node = use_node()?;
        log_line(format!("frame {}", node.raw()));
        host(&View).children(use_children()?).emit()?;
        Ok(())
    }
}

#[test]
fn declared_children_are_available_to_the_component() {
    let mut root = Root::new(MemoryBackend::new());
    let framed = component(Frame)
        .child(host(&Label).prop("text", "inside").build().expect("label"))
        .build()
        .expect("frame");
    root.render(framed).expect("mount");

    let node = root.reconciler().root().expect("root");
    assert_eq!(take_log(), [format!("frame {}", node.raw())]);
    let backend = root.backend();
    let view = backend.root().expect("view");
    let children = backend.children_of(view);
    assert_eq!(children.len(), 1);
    let text = backend.widget(children[0]).and_then(|widget| widget.props.get("text").cloned());
    assert_eq!(text, Some("inside".into()));
}
