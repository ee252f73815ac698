//! Testing utilities and harness for Trellis.

pub mod fixtures;
pub mod gate;
pub mod rule;

pub use fixtures::{Button, Label, View};
pub use gate::{Gate, GateWait};
pub use rule::{run_test, FrameCounter, TestRule};

pub mod prelude {
    pub use crate::fixtures::{Button, Label, View};
    pub use crate::gate::Gate;
    pub use crate::rule::{run_test, TestRule};
}
