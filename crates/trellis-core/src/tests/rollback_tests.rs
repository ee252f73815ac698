use std::cell::{Cell, RefCell};

use super::*;
use crate::backend::MemoryBackend;
use crate::context::{ContextKey, ContextRegistry};
use crate::element::{component, host, Component};
use crate::error::{RenderError, RenderResult};
use crate::hooks::{provide_context, use_context, use_state, ContextSetter, Setter};
use crate::root::Root;
use crate::tests::fixtures::{Label, View};
use crate::tree::Tree;

const THEME: ContextKey<String> = ContextKey::new("theme");

thread_local! {
    static FAIL: Cell<bool> = const { Cell::new(false) };
    static PANIC: Cell<bool> = const { Cell::new(false) };
    static COUNT: RefCell<Option<Setter<i32>>> = const { RefCell::new(None) };
    static THEME_SETTER: RefCell<Option<ContextSetter<String>>> = const { RefCell::new(None) };
}

#[derive(Debug)]
struct Refused;

impl fmt::Display for Refused {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("refused to render")
    }
}

impl std::error::Error for Refused {}

/// Fails while `FAIL` is set, panics while `PANIC` is set.
#[derive(PartialEq)]
struct Flaky {
    text: String,
}

impl Component for Flaky {
    fn render(&self) -> RenderResult {
        if FAIL.with(Cell::get) {
            return Err(RenderError::component(Refused));
        }
        if PANIC.with(Cell::get) {
            panic!("kaboom");
        }
        host(&Label).prop("text", self.text.clone()).emit()?;
        Ok(())
    }
}

#[derive(PartialEq)]
struct Counter;

impl Component for Counter {
    fn render(&self) -> RenderResult {
        let (count, set_count) = use_state(|| 0)?;
        COUNT.with(|slot| *slot.borrow_mut() = Some(set_count));
        host(&View)
            .child(host(&Label).key("static").prop("text", "count").build()?)
            .child(component(Flaky { text: count.to_string() }).build()?)
            .emit()?;
        Ok(())
    }
}

fn set_count(value: i32) {
    COUNT.with(|slot| slot.borrow().as_ref().expect("counter mounted").set(value));
}

fn flaky_text(root: &Root<MemoryBackend>) -> Option<String> {
    let reconciler = root.reconciler();
    let node = reconciler.find(|node| node.name() == "Flaky")?;
    let widget = reconciler.node(node)?.children().first().copied()?;
    let widget = reconciler.node(widget)?.widget()?;
    let props = &root.backend().widget(widget)?.props;
    props.get("text")?.as_str().map(str::to_string)
}

#[test]
fn failed_render_restores_tree_state_and_backend() {
    let mut root = Root::new(MemoryBackend::new());
    root.render(component(Counter).build().expect("counter")).expect("mount");
    set_count(1);
    root.pump().expect("first update");

    let dump = root.reconciler().dump_tree();
    let applied = root.backend().applied().len();
    let node = root.reconciler().root().expect("root");

    FAIL.with(|fail| fail.set(true));
    set_count(2);
    let err = root.pump().unwrap_err();
    let flaky = root.reconciler().find(|node| node.name() == "Flaky");
    assert!(matches!(err, RenderError::Component { node, .. } if node == flaky));

    assert_eq!(root.reconciler().dump_tree(), dump);
    assert_eq!(root.reconciler().state_value::<i32>(node, 0), Some(1));
    assert_eq!(root.backend().applied().len(), applied);
    assert_eq!(flaky_text(&root).as_deref(), Some("1"));

    FAIL.with(|fail| fail.set(false));
    set_count(3);
    root.pump().expect("recovered");
    assert_eq!(flaky_text(&root).as_deref(), Some("3"));
}

#[test]
fn panicking_render_is_reported_against_its_node() {
    let mut root = Root::new(MemoryBackend::new());
    root.render(component(Counter).build().expect("counter")).expect("mount");
    let dump = root.reconciler().dump_tree();

    PANIC.with(|panic| panic.set(true));
    set_count(5);
    let err = root.pump().unwrap_err();
    match err {
        RenderError::Panicked { node, message } => {
            assert_eq!(node, root.reconciler().find(|node| node.name() == "Flaky"));
            assert!(message.contains("kaboom"), "{message}");
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(root.reconciler().dump_tree(), dump);
}

#[test]
fn failed_mount_leaves_no_partial_subtree() {
    let mut root = Root::new(MemoryBackend::new());
    root.render(host(&View).build().expect("view")).expect("mount");
    let nodes = root.reconciler().len();
    let applied = root.backend().applied().len();

    FAIL.with(|fail| fail.set(true));
    let subtree = host(&View)
        .child(
            host(&View)
                .child(host(&Label).prop("text", "deep").build().expect("label"))
                .child(component(Flaky { text: "x".into() }).build().expect("flaky"))
                .build()
                .expect("inner"),
        )
        .build()
        .expect("outer");
    assert!(root.render(subtree).is_err());

    assert_eq!(root.reconciler().len(), nodes);
    assert_eq!(root.backend().applied().len(), applied);
    assert!(!root.reconciler().has_post_commit());
}

#[derive(PartialEq)]
struct ThemeProvider;

impl Component for ThemeProvider {
    fn render(&self) -> RenderResult {
        let (_, setter) = provide_context(&THEME, || "light".to_string())?;
        THEME_SETTER.with(|slot| *slot.borrow_mut() = Some(setter));
        component(ThemedLabel).emit()?;
        Ok(())
    }
}

/// Refuses to render the dark theme.
#[derive(PartialEq)]
struct ThemedLabel;

impl Component for ThemedLabel {
    fn render(&self) -> RenderResult {
        let theme = use_context(&THEME)?;
        if theme == "dark" {
            return Err(RenderError::component(Refused));
        }
        host(&Label).prop("text", theme).emit()?;
        Ok(())
    }
}

fn theme_setter() -> ContextSetter<String> {
    THEME_SETTER.with(|slot| slot.borrow().clone().expect("provider mounted"))
}

#[test]
fn failed_context_update_restores_the_provided_value() {
    let mut root = Root::new(MemoryBackend::new());
    root.render(component(ThemeProvider).build().expect("provider"))
        .expect("mount");

    theme_setter().set("dark".to_string());
    assert!(root.pump().is_err());

    theme_setter().update(|theme| format!("{theme}!"));
    root.pump().expect("second update");
    let widget = root.backend().root().expect("label");
    let text = root.backend().widget(widget).and_then(|widget| widget.props.get("text").cloned());
    assert_eq!(text, Some("light!".into()));
}

#[test]
fn undo_replays_tree_mutations_in_reverse() {
    let mut tree = Tree::default();
    let mut contexts = ContextRegistry::default();
    let mut log = CommitLog::new();
    let id = tree.allocate_node();
    let element = host(&Label).build().expect("label");
    tree.insert(CommittedNode::new(id, None, 0, Key::Index(0), element), &mut log);
    tree.set_root(Some(id), &mut log);
    assert!(log.commit().is_empty());

    let mut log = CommitLog::new();
    tree.set_key(id, Key::from("renamed"), &mut log);
    tree.set_key(id, Key::from("renamed"), &mut log);
    tree.set_root(None, &mut log);
    tree.remove(id, &mut log);
    assert_eq!(log.len(), 3);
    assert!(log.entries().iter().all(LogEntry::had_previous));
    assert_eq!(log.entries()[0].field(), Field::Key);
    assert_eq!(log.entries()[2].owner(), Owner::Tree);

    tree.rollback(log, &mut contexts);
    assert_eq!(tree.root(), Some(id));
    assert_eq!(tree.get(id).map(|node| node.key.clone()), Some(Key::Index(0)));
}

#[test]
fn commit_hands_back_removed_nodes() {
    let mut tree = Tree::default();
    let mut log = CommitLog::new();
    let first = tree.allocate_node();
    let second = tree.allocate_node();
    for id in [first, second] {
        let element = host(&Label).build().expect("label");
        tree.insert(CommittedNode::new(id, None, 0, Key::Index(0), element), &mut log);
    }
    assert!(log.commit().is_empty());

    let mut log = CommitLog::new();
    tree.remove(second, &mut log);
    tree.remove(first, &mut log);
    let removed: Vec<NodeId> = log.commit().into_iter().map(|node| node.id).collect();
    assert_eq!(removed, [second, first]);
    assert_eq!(tree.len(), 0);
}
