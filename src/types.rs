pub mod dvalue;
pub mod value;

// Re-export types for convenience.
pub use crate::types::dvalue::DValue;
pub use crate::types::value::Value;
