pub mod error_classifier;
pub mod r#loop;
pub mod state_machine;
pub mod steps;

pub use error_classifier::*;
pub use r#loop::*;
pub use state_machine::*;
pub use steps::*;
