use std::collections::BTreeMap;

use crate::middle::lir::RegisterId;

/// Accumulates NASM source text
#[derive(Debug, Default)]
pub struct Assembler {
    output: String,
}

impl Assembler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn into_output(self) -> String {
        self.output
    }

    /// Writes a line without indentation
    pub fn push_line(&mut self, string: impl AsRef<str>) {
        self.output.push_str(string.as_ref());
        self.output.push('\n');
    }

    pub fn emit(&mut self, string: impl AsRef<str>) {
        self.output.push_str("    ");
        self.push_line(string);
    }

    pub fn label(&mut self, name: impl AsRef<str>) {
        self.push_line(format!("{}:", name.as_ref()));
    }

    pub fn comment(&mut self, comment: impl AsRef<str>) {
        self.emit(format!("; {}", comment.as_ref()));
    }

    pub fn function_prologue(&mut self, stack_frame_size: usize) {
        self.emit("push rbp");
        self.emit("mov rbp, rsp");

        if stack_frame_size > 0 {
            self.emit(format!("sub rsp, {stack_frame_size}"));
        }
    }

    pub fn function_epilogue(&mut self) {
        self.emit("mov rsp, rbp");
        self.emit("pop rbp");
        self.emit("ret");
    }
}

/// A quadword memory operand relative to the frame pointer
pub fn frame_slot(offset: isize) -> String {
    if offset >= 0 {
        format!("QWORD [rbp+{offset}]")
    } else {
        format!("QWORD [rbp{offset}]")
    }
}

/// General Purpose Register 64-bit
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum X86FullRegister {
    Rax,
    Rbx,
    Rcx,
    Rdx,
    Rsi,
    Rdi,
    Rbp,
    Rsp,
    R8,
    R9,
    R10,
    R11,
    R12,
    R13,
    R14,
    R15,
}

impl X86FullRegister {
    pub fn as_8_bit(self) -> X86ByteRegister {
        match self {
            Self::Rax => X86ByteRegister::Al,
            Self::Rbx => X86ByteRegister::Bl,
            Self::Rcx => X86ByteRegister::Cl,
            Self::Rdx => X86ByteRegister::Dl,
            Self::Rsi => X86ByteRegister::Sil,
            Self::Rdi => X86ByteRegister::Dil,
            Self::Rbp => X86ByteRegister::Bpl,
            Self::Rsp => X86ByteRegister::Spl,
            Self::R8 => X86ByteRegister::R8b,
            Self::R9 => X86ByteRegister::R9b,
            Self::R10 => X86ByteRegister::R10b,
            Self::R11 => X86ByteRegister::R11b,
            Self::R12 => X86ByteRegister::R12b,
            Self::R13 => X86ByteRegister::R13b,
            Self::R14 => X86ByteRegister::R14b,
            Self::R15 => X86ByteRegister::R15b,
        }
    }
}

/// Low byte of a general purpose register
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "lowercase")]
#[rustfmt::skip]
pub enum X86ByteRegister {
    Al, Bl, Cl, Dl,
    Sil, Dil, Bpl, Spl,
    R8b, R9b, R10b, R11b, R12b, R13b, R14b, R15b,
}

/// Registers C functions take their integer arguments in
pub const ARGUMENT_REGISTERS: [X86FullRegister; 6] = [
    X86FullRegister::Rdi,
    X86FullRegister::Rsi,
    X86FullRegister::Rdx,
    X86FullRegister::Rcx,
    X86FullRegister::R8,
    X86FullRegister::R9,
];

/// Physical registers virtual registers are mapped onto, in preference order
pub const REGISTER_POOL: [X86FullRegister; 9] = [
    X86FullRegister::Rax,
    X86FullRegister::Rdi,
    X86FullRegister::Rsi,
    X86FullRegister::Rdx,
    X86FullRegister::Rcx,
    X86FullRegister::R8,
    X86FullRegister::R9,
    X86FullRegister::R10,
    X86FullRegister::R11,
];

/// Maps live virtual registers onto [`REGISTER_POOL`]. A virtual register
/// takes the first free name on first use and gives it back when killed.
#[derive(Debug, Default)]
pub struct RegisterPool {
    assigned: BTreeMap<RegisterId, X86FullRegister>,
}

impl RegisterPool {
    /// Returns `None` once every physical register is taken
    pub fn assign(&mut self, register: RegisterId) -> Option<X86FullRegister> {
        if let Some(physical) = self.assigned.get(&register) {
            return Some(*physical);
        }

        let physical = REGISTER_POOL
            .into_iter()
            .find(|candidate| !self.assigned.values().any(|taken| taken == candidate))?;

        self.assigned.insert(register, physical);
        Some(physical)
    }

    pub fn free(&mut self, register: RegisterId) {
        self.assigned.remove(&register);
    }

    pub fn is_occupied(&self, physical: X86FullRegister) -> bool {
        self.assigned.values().any(|taken| *taken == physical)
    }

    pub fn live(&self) -> impl Iterator<Item = RegisterId> {
        self.assigned.keys().copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::Index;

    #[test]
    fn registers_are_reused_after_kill() {
        let mut pool = RegisterPool::default();

        assert_eq!(pool.assign(RegisterId::new(10)), Some(X86FullRegister::Rax));
        assert_eq!(pool.assign(RegisterId::new(11)), Some(X86FullRegister::Rdi));
        assert_eq!(pool.assign(RegisterId::new(10)), Some(X86FullRegister::Rax));

        pool.free(RegisterId::new(10));

        assert!(!pool.is_occupied(X86FullRegister::Rax));
        assert_eq!(pool.assign(RegisterId::new(12)), Some(X86FullRegister::Rax));
    }

    #[test]
    fn pool_runs_out_after_nine_live_registers() {
        let mut pool = RegisterPool::default();

        for id in 0..REGISTER_POOL.len() {
            assert!(pool.assign(RegisterId::new(id)).is_some());
        }

        assert_eq!(pool.assign(RegisterId::new(100)), None);
        assert_eq!(pool.live().count(), REGISTER_POOL.len());
    }

    #[test]
    fn byte_register_names() {
        assert_eq!(X86FullRegister::Rdi.as_8_bit().to_string(), "dil");
        assert_eq!(X86FullRegister::R10.as_8_bit().to_string(), "r10b");
        assert_eq!(frame_slot(16), "QWORD [rbp+16]");
        assert_eq!(frame_slot(-8), "QWORD [rbp-8]");
    }
}
