pub mod clock;
pub mod math;

pub use clock::CurrentTimeTool;
pub use math::{AddTool, DivideTool, MultiplyTool, SubtractTool};
