use crate::{backend::CodegenOptions, error::CompileResult, middle::lir};

mod x86_64_nasm;

pub trait CodeGenerator {
    fn translate_to_asm(&self, program: &lir::Program, options: &CodegenOptions)
    -> CompileResult<String>;
}

#[allow(non_camel_case_types)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Target {
    #[default]
    x86_64Nasm,
}

impl Target {
    pub fn get_code_generator(self) -> impl CodeGenerator {
        match self {
            Target::x86_64Nasm => x86_64_nasm::CodeGeneratorX86_64Nasm,
        }
    }
}
