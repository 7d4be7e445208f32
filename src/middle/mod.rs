//! Names are resolved and types checked here, then every function is built
//! into MIR, simplified, and flattened into LIR for the backend.

pub mod attributes;
pub mod lir;
pub mod mir;
pub mod resolve;
pub mod ty;
pub mod type_check;
