pub mod app;
pub mod input;
pub mod pipeline;

pub use app::{run, run_with_clock};
pub use input::{parse_line, Frame, InputError, InputLine};
pub use pipeline::CountingPipeline;
