pub mod value;
pub mod vm;

pub use value::{HashKey, Value, ValueKind, FALSE, NULL, TRUE};
pub use vm::{RuntimeError, GLOBALS_SIZE, STACK_SIZE, VM};
