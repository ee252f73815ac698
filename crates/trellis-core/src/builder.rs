//! Ambient capture frames for declarative element construction.
//!
//! A capture frame collects the elements emitted while it is the innermost
//! frame on this thread. Registering an element moves it into exactly one
//! frame, so nested frames only ever see their immediate children.

use std::cell::RefCell;

use crate::element::Element;
use crate::error::{BuildError, RenderError};

thread_local! {
    static CAPTURE_STACK: RefCell<Vec<Vec<Element>>> = const { RefCell::new(Vec::new()) };
}

pub(crate) fn register(element: Element) -> Result<(), BuildError> {
    CAPTURE_STACK.with(|stack| match stack.borrow_mut().last_mut() {
        Some(frame) => {
            frame.push(element);
            Ok(())
        }
        None => Err(BuildError::NoCaptureScope),
    })
}

/// An open capture frame. Dropping it without [`close`](CaptureGuard::close)
/// discards everything captured, which keeps the stack balanced when a
/// render returns early with an error or unwinds.
pub(crate) struct CaptureGuard {
    depth: usize,
    closed: bool,
}

pub(crate) fn open() -> CaptureGuard {
    let depth = CAPTURE_STACK.with(|stack| {
        let mut stack = stack.borrow_mut();
        stack.push(Vec::new());
        stack.len()
    });
    CaptureGuard {
        depth,
        closed: false,
    }
}

impl CaptureGuard {
    pub(crate) fn close(mut self) -> Vec<Element> {
        self.closed = true;
        CAPTURE_STACK.with(|stack| {
            let mut stack = stack.borrow_mut();
            let entries = if stack.len() == self.depth {
                stack.pop().unwrap_or_default()
            } else {
                Vec::new()
            };
            stack.truncate(self.depth - 1);
            entries
        })
    }
}

impl Drop for CaptureGuard {
    fn drop(&mut self) {
        if !self.closed {
            let _ = CAPTURE_STACK.try_with(|stack| {
                if let Ok(mut stack) = stack.try_borrow_mut() {
                    stack.truncate(self.depth - 1);
                }
            });
        }
    }
}

/// Runs `content` in a fresh capture frame and returns everything it
/// emitted, in order.
pub fn capture(content: impl FnOnce() -> Result<(), RenderError>) -> Result<Vec<Element>, RenderError> {
    let guard = open();
    content()?;
    Ok(guard.close())
}

/// Like [`capture`] but requires exactly one emitted element.
pub fn capture_root(content: impl FnOnce() -> Result<(), RenderError>) -> Result<Element, RenderError> {
    Ok(single_root(capture(content)?)?)
}

pub(crate) fn single_root(mut entries: Vec<Element>) -> Result<Element, BuildError> {
    match entries.len() {
        0 => Err(BuildError::EmptyRoot),
        1 => Ok(entries.remove(0)),
        count => Err(BuildError::MultipleRoots { count }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::element::host;
    use crate::tests::fixtures::{Label, View};

    #[test]
    fn emit_without_frame_fails() {
        let err = host(&Label).prop("text", "hi").emit().unwrap_err();
        assert_eq!(err, BuildError::NoCaptureScope);
    }

    #[test]
    fn nested_frames_attribute_children_to_their_immediate_parent() {
        let root = capture_root(|| {
            host(&View).key("outer").emit_with(|| {
                host(&Label).prop("text", "a").emit()?;
                host(&View).key("inner").emit_with(|| {
                    host(&Label).prop("text", "b").emit()?;
                    Ok(())
                })?;
                host(&Label).prop("text", "c").emit()?;
                Ok(())
            })
        })
        .expect("capture");

        assert_eq!(root.children().len(), 3);
        let inner = &root.children()[1];
        assert_eq!(inner.key(), Some(&"inner".into()));
        assert_eq!(inner.children().len(), 1);
        assert_eq!(
            inner.children()[0].prop("text").and_then(|value| value.as_str()),
            Some("b")
        );
    }

    #[test]
    fn capture_root_rejects_empty_and_multiple() {
        let err = capture_root(|| Ok(())).unwrap_err();
        assert!(matches!(err, RenderError::Build(BuildError::EmptyRoot)));

        let err = capture_root(|| {
            host(&Label).prop("text", "a").emit()?;
            host(&Label).prop("text", "b").emit()?;
            Ok(())
        })
        .unwrap_err();
        assert!(matches!(
            err,
            RenderError::Build(BuildError::MultipleRoots { count: 2 })
        ));
    }

    #[test]
    fn failed_content_leaves_stack_balanced() {
        let _ = capture(|| {
            host(&Label).prop("text", "a").emit()?;
            Err(BuildError::EmptyRoot.into())
        });
        assert_eq!(host(&Label).prop("text", "x").emit(), Err(BuildError::NoCaptureScope));
    }

    #[test]
    fn host_without_children_support_rejects_children() {
        let err = capture_root(|| {
            host(&Label).prop("text", "a").emit_with(|| {
                host(&Label).prop("text", "b").emit()?;
                Ok(())
            })
        })
        .unwrap_err();
        assert!(matches!(
            err,
            RenderError::Build(BuildError::ChildrenNotAllowed { element: "Label" })
        ));
    }
}
