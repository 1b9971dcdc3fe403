pub mod analysis;
pub mod enums;
pub mod model_performance;
pub mod patient;
pub mod user;

pub use analysis::*;
pub use model_performance::*;
pub use patient::*;
pub use user::*;
