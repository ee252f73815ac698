use std::cell::{Cell, RefCell};

use super::*;
use crate::backend::MemoryBackend;
use crate::element::{component, host, Component};
use crate::hooks::{use_state, Setter};
use crate::root::Root;
use crate::tests::fixtures::{Button, Label, View};

thread_local! {
    static GREETING_RENDERS: Cell<usize> = const { Cell::new(0) };
    static TOGGLE: RefCell<Option<Setter<bool>>> = const { RefCell::new(None) };
}

fn label(key: &str) -> Element {
    host(&Label).key(key).prop("text", key).build().expect("label")
}

fn list(keys: &[&str]) -> Element {
    host(&View)
        .children(keys.iter().map(|key| label(key)))
        .build()
        .expect("list")
}

fn widget_of(root: &Root<MemoryBackend>, key: &str) -> WidgetId {
    let reconciler = root.reconciler();
    let id = reconciler
        .find(|node| node.key() == &Key::from(key))
        .expect("keyed node");
    reconciler.node(id).and_then(|node| node.widget()).expect("widget")
}

fn texts(root: &Root<MemoryBackend>) -> Vec<String> {
    let backend = root.backend();
    let Some(top) = backend.root() else {
        return Vec::new();
    };
    backend
        .children_of(top)
        .iter()
        .filter_map(|child| backend.widget(*child))
        .filter_map(|widget| widget.props.get("text").and_then(|value| value.as_str()))
        .map(str::to_string)
        .collect()
}

#[derive(PartialEq)]
struct Greeting {
    name: &'static str,
}

impl Component for Greeting {
    fn render(&self) -> RenderResult {
        GREETING_RENDERS.with(|renders| renders.set(renders.get() + 1));
        host(&Label).prop("text", format!("hello {}", self.name)).emit()?;
        Ok(())
    }
}

#[derive(PartialEq)]
struct Toggle;

impl Component for Toggle {
    fn render(&self) -> RenderResult {
        let (expanded, set_expanded) = use_state(|| false)?;
        TOGGLE.with(|slot| *slot.borrow_mut() = Some(set_expanded));
        if expanded {
            host(&View).prop("style", "expanded").emit()?;
        } else {
            host(&Label).prop("text", "collapsed").emit()?;
        }
        Ok(())
    }
}

#[test]
fn rerender_without_changes_emits_nothing() {
    let mut root = Root::new(MemoryBackend::new());
    let first = root.render(list(&["x", "y", "z"])).expect("mount");
    assert_eq!(first.commands.iter().filter(|command| command.is_create()).count(), 4);
    assert_eq!(first.delta.mounted.len(), 4);

    let second = root.render(list(&["x", "y", "z"])).expect("rerender");
    assert!(second.commands.is_empty(), "{:?}", second.commands);
    assert!(second.delta.is_empty());
}

#[test]
fn keyed_removal_and_reorder_moves_survivors() {
    let mut root = Root::new(MemoryBackend::new());
    root.render(list(&["x", "y", "z"])).expect("mount");
    let (x, y, z) = (widget_of(&root, "x"), widget_of(&root, "y"), widget_of(&root, "z"));
    let parent = root.backend().root().expect("root widget");

    let outcome = root.render(list(&["z", "x"])).expect("reorder");

    assert!(!outcome.commands.iter().any(Command::is_create));
    assert_eq!(
        outcome.commands,
        vec![
            Command::Move {
                parent,
                child: z,
                before: Some(x),
            },
            Command::Remove { parent, child: y },
            Command::Destroy { widget: y },
        ]
    );
    assert_eq!(root.backend().children_of(parent), &[z, x]);
    assert_eq!(outcome.delta.unmounted.len(), 1);
}

#[test]
fn reversing_a_keyed_list_only_moves() {
    let mut root = Root::new(MemoryBackend::new());
    root.render(list(&["a", "b", "c", "d"])).expect("mount");
    let outcome = root.render(list(&["d", "c", "b", "a"])).expect("reverse");

    assert!(outcome.commands.iter().all(Command::is_move), "{:?}", outcome.commands);
    assert_eq!(outcome.commands.len(), 3);
    assert_eq!(texts(&root), ["d", "c", "b", "a"]);
}

#[test]
fn inserting_into_a_keyed_list_creates_only_the_new_child() {
    let mut root = Root::new(MemoryBackend::new());
    root.render(list(&["a", "c"])).expect("mount");
    let outcome = root.render(list(&["a", "b", "c"])).expect("insert");

    let creates: Vec<_> = outcome.commands.iter().filter(|command| command.is_create()).collect();
    assert_eq!(creates.len(), 1);
    let b = widget_of(&root, "b");
    let c = widget_of(&root, "c");
    assert!(outcome.commands.contains(&Command::Insert {
        parent: root.backend().root().expect("root widget"),
        child: b,
        before: Some(c),
    }));
    assert_eq!(texts(&root), ["a", "b", "c"]);
}

#[test]
fn unkeyed_children_match_by_position() {
    let mut root = Root::new(MemoryBackend::new());
    let tree = |first: &str| {
        host(&View)
            .child(host(&Label).prop("text", first).build().expect("label"))
            .child(host(&Label).prop("text", "second").build().expect("label"))
            .build()
            .expect("view")
    };
    root.render(tree("first")).expect("mount");
    let outcome = root.render(tree("changed")).expect("update");

    assert_eq!(outcome.commands.len(), 1);
    assert!(matches!(
        &outcome.commands[0],
        Command::SetProp { name: "text", value, .. } if value.as_str() == Some("changed")
    ));
    assert_eq!(outcome.delta.updated.len(), 1);
}

#[test]
fn changed_type_under_a_key_remounts() {
    let mut root = Root::new(MemoryBackend::new());
    root.render(list(&["a"])).expect("mount");
    let old = widget_of(&root, "a");

    let replaced = host(&View)
        .child(host(&View).key("a").build().expect("view"))
        .build()
        .expect("list");
    let outcome = root.render(replaced).expect("replace");

    assert_eq!(outcome.commands.iter().filter(|command| command.is_create()).count(), 1);
    assert!(outcome.commands.contains(&Command::Destroy { widget: old }));
    let new = widget_of(&root, "a");
    assert_ne!(new, old);
    assert_eq!(root.backend().widget(new).map(|widget| widget.kind), Some("View"));
}

#[test]
fn duplicate_keys_fail_and_leave_the_tree_untouched() {
    let mut root = Root::new(MemoryBackend::new());
    root.render(list(&["x"])).expect("mount");
    let before = root.reconciler().dump_tree();
    let applied = root.backend().applied().len();

    let err = root.render(list(&["y", "y"])).unwrap_err();
    match err {
        RenderError::DuplicateKey { key, parent } => {
            assert_eq!(key, Key::from("y"));
            assert_eq!(parent, root.reconciler().root());
        }
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(root.reconciler().dump_tree(), before);
    assert_eq!(root.backend().applied().len(), applied);
}

#[test]
fn equal_component_props_skip_render() {
    let mut root = Root::new(MemoryBackend::new());
    root.render(component(Greeting { name: "ada" }).build().expect("element"))
        .expect("mount");
    root.render(component(Greeting { name: "ada" }).build().expect("element"))
        .expect("same props");
    assert_eq!(GREETING_RENDERS.with(Cell::get), 1);

    let outcome = root
        .render(component(Greeting { name: "grace" }).build().expect("element"))
        .expect("new props");
    assert_eq!(GREETING_RENDERS.with(Cell::get), 2);
    assert_eq!(outcome.commands.len(), 1);
    assert_eq!(outcome.delta.updated.len(), 2);
}

#[test]
fn component_switching_its_output_replaces_the_widget_in_place() {
    let mut root = Root::new(MemoryBackend::new());
    let app = host(&View)
        .child(label("before"))
        .child(component(Toggle).build().expect("toggle"))
        .child(label("after"))
        .build()
        .expect("app");
    root.render(app).expect("mount");
    let parent = root.backend().root().expect("root widget");
    let collapsed = root.backend().children_of(parent)[1];

    TOGGLE.with(|slot| slot.borrow().as_ref().expect("setter").set(true));
    assert_eq!(root.pump().expect("pump"), 1);

    let children = root.backend().children_of(parent).to_vec();
    assert_eq!(children.len(), 3);
    assert_ne!(children[1], collapsed);
    assert_eq!(root.backend().widget(children[1]).map(|widget| widget.kind), Some("View"));
    assert!(root.backend().widget(collapsed).is_none());
    assert_eq!(children[0], widget_of(&root, "before"));
    assert_eq!(children[2], widget_of(&root, "after"));
}

#[test]
fn root_widget_change_emits_set_root() {
    let mut root = Root::new(MemoryBackend::new());
    root.render(component(Toggle).build().expect("toggle")).expect("mount");
    let first = root.backend().root();

    TOGGLE.with(|slot| slot.borrow().as_ref().expect("setter").set(true));
    root.pump().expect("pump");

    let second = root.backend().root();
    assert!(second.is_some());
    assert_ne!(first, second);
    assert!(root
        .backend()
        .applied()
        .iter()
        .any(|command| matches!(command, Command::SetRoot { widget } if *widget == second)));
}

#[test]
fn custom_update_commands_are_used_for_initial_and_changed_props() {
    let mut root = Root::new(MemoryBackend::new());
    let button = |enabled: bool| {
        host(&Button)
            .prop("title", "Go")
            .prop("enabled", enabled)
            .build()
            .expect("button")
    };
    root.render(button(true)).expect("mount");
    let outcome = root.render(button(false)).expect("disable");

    let widget = root.backend().root().expect("root widget");
    assert_eq!(
        outcome.commands,
        vec![Command::Call {
            widget,
            method: "set_enabled",
            args: vec![false.into()],
        }]
    );
    let calls = &root.backend().widget(widget).expect("widget").calls;
    assert_eq!(calls.len(), 2);
}

#[test]
fn pass_started_during_another_is_refused() {
    let runtime = Runtime::default();
    let mut reconciler = Reconciler::new(runtime.clone());
    assert!(runtime.handle().begin_render());
    let err = reconciler.render(label("x")).unwrap_err();
    assert!(matches!(err, RenderError::Reentrant));
    runtime.handle().end_render();
    assert!(reconciler.render(label("x")).is_ok());
}

#[test]
fn rerendering_an_unknown_node_fails() {
    let mut reconciler = Reconciler::new(Runtime::default());
    let err = reconciler.request_rerender(&[NodeId(99)]).unwrap_err();
    assert!(matches!(err, RenderError::UnknownNode { node } if node == NodeId(99)));
}

#[test]
fn stable_positions_keep_the_longest_ordered_run() {
    assert_eq!(stable_positions(&[Some(2), Some(0)]), [false, true]);
    assert_eq!(stable_positions(&[None, Some(0), Some(1)]), [false, true, true]);
    assert_eq!(
        stable_positions(&[Some(1), Some(2), Some(0), Some(3)]),
        [true, true, false, true]
    );
}
