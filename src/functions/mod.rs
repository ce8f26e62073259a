pub mod factors;
pub mod registry;
pub mod traits;
