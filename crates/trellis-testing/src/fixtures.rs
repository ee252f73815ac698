//! Host types for headless tests.

use trellis_core::{Command, HostType, PropKind, PropSpec, PropsDiff, WidgetId};

/// Container accepting any number of children.
pub struct View;

impl HostType for View {
    fn name(&self) -> &'static str {
        "View"
    }

    fn schema(&self) -> &'static [PropSpec] {
        const SCHEMA: &[PropSpec] = &[
            PropSpec::optional("spacing", PropKind::Int),
            PropSpec::optional("style", PropKind::Str),
        ];
        SCHEMA
    }

    fn accepts_children(&self) -> bool {
        true
    }
}

pub struct Label;

impl HostType for Label {
    fn name(&self) -> &'static str {
        "Label"
    }

    fn schema(&self) -> &'static [PropSpec] {
        const SCHEMA: &[PropSpec] = &[
            PropSpec::optional("text", PropKind::Str),
            PropSpec::optional("style", PropKind::Str),
        ];
        SCHEMA
    }
}

/// Clickable host. `enabled` is applied through a `set_enabled` call and
/// `on_click` never reaches the backend; dispatch it with
/// [`TestRule::click`](crate::TestRule::click).
pub struct Button;

impl HostType for Button {
    fn name(&self) -> &'static str {
        "Button"
    }

    fn schema(&self) -> &'static [PropSpec] {
        const SCHEMA: &[PropSpec] = &[
            PropSpec::required("title", PropKind::Str),
            PropSpec::optional("on_click", PropKind::Handler),
            PropSpec::optional("enabled", PropKind::Bool),
        ];
        SCHEMA
    }

    fn update_commands(&self, widget: WidgetId, diff: &PropsDiff, commands: &mut Vec<Command>) {
        for (name, _, new) in diff.iter() {
            match (name, new) {
                ("on_click", _) => {}
                ("enabled", Some(value)) => commands.push(Command::Call {
                    widget,
                    method: "set_enabled",
                    args: vec![value.clone()],
                }),
                ("enabled", None) => commands.push(Command::Call {
                    widget,
                    method: "set_enabled",
                    args: vec![true.into()],
                }),
                (name, Some(value)) => commands.push(Command::SetProp {
                    widget,
                    name,
                    value: value.clone(),
                }),
                (name, None) => commands.push(Command::UnsetProp { widget, name }),
            }
        }
    }
}
