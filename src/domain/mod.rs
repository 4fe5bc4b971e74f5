pub mod job;
pub mod model;
pub mod state;
pub mod trigger;

pub use job::*;
pub use model::*;
pub use state::*;
pub use trigger::*;
