use std::cell::Cell;

use trellis_core::{
    host, use_state, Element, HostType, Key, MemoryBackend, PropKind, PropSpec, RenderResult, Root,
};
use trellis_macros::component;

struct Text;

impl HostType for Text {
    fn name(&self) -> &'static str {
        "Text"
    }

    fn schema(&self) -> &'static [PropSpec] {
        const SCHEMA: &[PropSpec] = &[PropSpec::required("text", PropKind::Str)];
        SCHEMA
    }
}

struct Stack;

impl HostType for Stack {
    fn name(&self) -> &'static str {
        "Stack"
    }

    fn accepts_children(&self) -> bool {
        true
    }
}

thread_local! {
    static GREETINGS: Cell<usize> = const { Cell::new(0) };
}

#[component]
fn Greeting(name: String, excited: bool) -> RenderResult {
    GREETINGS.with(|count| count.set(count.get() + 1));
    let (visits, _) = use_state(|| 1)?;
    let mark = if excited { "!" } else { "." };
    host(&Text)
        .prop("text", format!("hello {name}{mark} ({visits})"))
        .emit()?;
    Ok(())
}

#[component]
fn Page() -> RenderResult {
    host(&Stack).emit_with(|| {
        Greeting("ada".into(), true).key("first").emit()?;
        Greeting("grace".into(), false).emit()?;
        Ok(())
    })
}

fn page() -> Element {
    Page().build().expect("page")
}

#[test]
fn generated_props_struct_compares_by_value() {
    let a = Greeting {
        name: "ada".into(),
        excited: true,
    };
    assert!(a == a.clone());
    assert!(a != Greeting {
        name: "ada".into(),
        excited: false,
    });
}

#[test]
fn generated_constructor_builds_keyed_elements() {
    let element = Greeting("ada".into(), true).key("k").build().expect("greeting");
    assert_eq!(element.name(), "Greeting");
    assert_eq!(element.key(), Some(&Key::from("k")));
    let props = element.component::<Greeting>().expect("greeting props");
    assert_eq!(props.name, "ada");
}

#[test]
fn components_render_and_skip_equal_props() {
    let mut root = Root::new(MemoryBackend::new());
    root.render(page()).expect("mount");
    assert_eq!(GREETINGS.with(Cell::get), 2);

    let stack = root.backend().root().expect("stack");
    let texts: Vec<String> = root
        .backend()
        .children_of(stack)
        .iter()
        .filter_map(|child| root.backend().widget(*child))
        .filter_map(|widget| widget.props.get("text").and_then(|value| value.as_str()))
        .map(str::to_string)
        .collect();
    assert_eq!(texts, ["hello ada! (1)", "hello grace. (1)"]);

    let node = root.reconciler().root().expect("page node");
    root.request_rerender(&[node]).expect("rerender page");
    assert_eq!(GREETINGS.with(Cell::get), 2);
}
