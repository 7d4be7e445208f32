//! The backend turns LIR into assembly text. Virtual registers are mapped
//! onto physical ones as they are first used, slots get fixed offsets from
//! the frame pointer, and every instruction expands to a short sequence of
//! target instructions.

pub mod assemblers {
    pub mod x86_64;
}
pub mod layout;
pub mod targets;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CodegenOptions {
    /// Precede the code of every LIR instruction with a comment showing it
    pub emit_debug_comments: bool,
}
