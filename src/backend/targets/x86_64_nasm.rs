use itertools::Itertools;

use crate::{
    backend::{
        CodegenOptions,
        assemblers::x86_64::{
            ARGUMENT_REGISTERS, Assembler, RegisterPool, X86FullRegister, frame_slot,
        },
        layout::{StackAllocator, StackLayout},
        targets::CodeGenerator,
    },
    error::{CompileError, CompileResult},
    frontend::ast::BinaryOperator,
    middle::lir::{
        self, FunctionBody, FunctionKind, Instruction, RegisterId, pretty_print::DisplayInstruction,
    },
};

const DIVIDE_HELPER: &str = "sbc_rt__div";
const MODULO_HELPER: &str = "sbc_rt__mod";

/// Signed division helpers. Both take the dividend and divisor on the stack,
/// leave the result in rax and preserve every other register.
const RUNTIME_HELPERS: &str = indoc::indoc! {"
    sbc_rt__div:
        push rdx
        push rcx
        mov rax, [rsp+32]
        mov rcx, [rsp+24]
        cqo
        idiv rcx
        pop rcx
        pop rdx
        ret
    sbc_rt__mod:
        push rdx
        push rcx
        mov rax, [rsp+32]
        mov rcx, [rsp+24]
        cqo
        idiv rcx
        mov rax, rdx
        pop rcx
        pop rdx
        ret
"};

pub struct CodeGeneratorX86_64Nasm;

impl CodeGenerator for CodeGeneratorX86_64Nasm {
    fn translate_to_asm(
        &self,
        program: &lir::Program,
        options: &CodegenOptions,
    ) -> CompileResult<String> {
        let mut assembler = Assembler::new();

        assembler.push_line("bits 64");
        assembler.push_line("section .data");

        for (id, value) in &program.strings {
            assembler.emit("align 8");
            assembler.label(format!("sbc__string_{id}"));
            assembler.emit(format!("dq {}", value.len()));

            if !value.is_empty() {
                assembler.emit(format!("db {}", format_nasm_string(value)));
            }
        }

        assembler.push_line("section .text");

        for function in program.functions.iter() {
            match &function.kind {
                FunctionKind::External { symbol } => {
                    codegen_c_function_shim(&mut assembler, function, symbol)?;
                }
                FunctionKind::Defined(body) => {
                    FunctionCodegen::new(program, function, body, options, &mut assembler)
                        .generate()?;
                }
            }

            if let Some(symbol) = &function.c_export {
                codegen_c_exporter(&mut assembler, function, symbol)?;
            }
        }

        let mut output = assembler.into_output();
        output.push_str(RUNTIME_HELPERS);

        Ok(output)
    }
}

/// Quotes `string` as a NASM backquoted literal
fn format_nasm_string(string: &str) -> String {
    let mut quoted = String::from("`");

    for c in string.chars() {
        match c {
            '\\' => quoted.push_str("\\\\"),
            '`' => quoted.push_str("\\`"),
            '"' => quoted.push_str("\\\""),
            '\n' => quoted.push_str("\\n"),
            '\t' => quoted.push_str("\\t"),
            c if c.is_ascii_control() => quoted.push_str(&format!("\\x{:02x}", c as u8)),
            c => quoted.push(c),
        }
    }

    quoted.push('`');
    quoted
}

fn argument_registers(function: &lir::Function) -> CompileResult<&'static [X86FullRegister]> {
    ARGUMENT_REGISTERS
        .get(..function.parameter_count)
        .ok_or_else(|| {
            CompileError::internal(format!(
                "`{}` has more parameters than C argument registers",
                function.label
            ))
        })
}

/// Moves the caller-pushed arguments into C argument registers and calls
/// `symbol` with a 16-byte aligned stack
fn codegen_c_function_shim(
    assembler: &mut Assembler,
    function: &lir::Function,
    symbol: &str,
) -> CompileResult<()> {
    let registers = argument_registers(function)?;

    assembler.push_line(format!("extern {symbol}"));
    assembler.label(&function.label);
    assembler.emit("push rbp");
    assembler.emit("mov rbp, rsp");
    assembler.emit("sub rsp, 8");
    assembler.emit("and rsp, 0xFFFFFFFFFFFFFFF0");

    // Last argument first so the first one is popped first
    for index in 0..registers.len() {
        assembler.emit(format!("mov rax, {}", frame_slot(((index + 2) * 8) as isize)));
        assembler.emit("push rax");
    }

    for register in registers {
        assembler.emit(format!("pop {register}"));
    }

    assembler.emit(format!("call {symbol}"));
    assembler.function_epilogue();

    Ok(())
}

/// Exposes a function to C by pushing the C argument registers the way our
/// own callers push arguments
fn codegen_c_exporter(
    assembler: &mut Assembler,
    function: &lir::Function,
    symbol: &str,
) -> CompileResult<()> {
    let registers = argument_registers(function)?;

    assembler.push_line(format!("global {symbol}"));
    assembler.label(symbol);
    assembler.emit("push rbp");
    assembler.emit("mov rbp, rsp");

    for register in registers {
        assembler.emit(format!("push {register}"));
    }

    assembler.emit(format!("call {}", function.label));
    assembler.function_epilogue();

    Ok(())
}

struct FunctionCodegen<'a> {
    program: &'a lir::Program,
    function: &'a lir::Function,
    body: &'a FunctionBody,
    options: &'a CodegenOptions,
    assembler: &'a mut Assembler,
    pool: RegisterPool,
    layout: StackLayout,
}

impl<'a> FunctionCodegen<'a> {
    fn new(
        program: &'a lir::Program,
        function: &'a lir::Function,
        body: &'a FunctionBody,
        options: &'a CodegenOptions,
        assembler: &'a mut Assembler,
    ) -> Self {
        Self {
            program,
            function,
            body,
            options,
            assembler,
            pool: RegisterPool::default(),
            layout: StackAllocator::default().finish(),
        }
    }

    fn generate(mut self) -> CompileResult<()> {
        let mut allocator = StackAllocator::default();

        let head = self
            .body
            .lines
            .iter()
            .take_while(|line| {
                matches!(
                    line.instruction,
                    Instruction::AllocParam { .. } | Instruction::AllocLocal { .. }
                )
            })
            .count();

        for line in &self.body.lines[..head] {
            match line.instruction {
                Instruction::AllocParam { register, size } => {
                    allocator.allocate_param(register, size)
                }
                Instruction::AllocLocal { register, size } => {
                    allocator.allocate_local(register, size)
                }
                _ => {}
            }
        }

        self.layout = allocator.finish();

        let return_slot = self.slot(self.body.return_register)?;

        self.assembler.label(&self.function.label);
        self.assembler.function_prologue(self.layout.frame_size);
        self.assembler.emit(format!("jmp .L{}", self.body.entry));

        let body = self.body;

        for line in &body.lines[head..] {
            for label in &line.labels {
                self.assembler.label(format!(".L{label}"));
            }

            if self.options.emit_debug_comments {
                let instruction = DisplayInstruction {
                    program: self.program,
                    instruction: &line.instruction,
                };
                self.assembler
                    .comment(strip_ansi_escapes::strip_str(instruction.to_string()));
            }

            self.codegen_instruction(line.instruction)?;
        }

        self.assembler.label(".exit");
        self.assembler.emit(format!("mov rax, {return_slot}"));
        self.assembler.function_epilogue();

        tracing::trace!(function = %self.function.label, "generated assembly");

        Ok(())
    }

    fn register(&mut self, register: RegisterId) -> CompileResult<X86FullRegister> {
        self.pool
            .assign(register)
            .ok_or_else(|| CompileError::OutOfRegisters {
                function: self.function.label.clone(),
            })
    }

    fn slot(&self, slot: RegisterId) -> CompileResult<String> {
        self.layout
            .offset(slot)
            .map(frame_slot)
            .ok_or_else(|| CompileError::internal(format!("%{slot} is not a stack slot")))
    }

    fn function_label(&self, function: lir::FunctionId) -> CompileResult<&'a str> {
        let program = self.program;

        program
            .functions
            .get(function)
            .map(|function| function.label.as_str())
            .ok_or_else(|| CompileError::internal(format!("call to unknown function {function}")))
    }

    /// Calls clobber every register in the pool
    fn ensure_nothing_live_across_call(&self, callee: Option<RegisterId>) -> CompileResult<()> {
        let live = self
            .pool
            .live()
            .filter(|register| Some(*register) != callee)
            .collect::<Vec<_>>();

        if live.is_empty() {
            Ok(())
        } else {
            Err(CompileError::internal(format!(
                "{} live across a call in `{}`",
                live.iter().map(|register| format!("%{register}")).join(", "),
                self.function.label
            )))
        }
    }

    /// Drops the caller-pushed arguments and pushes the result
    fn finish_call(&mut self, arguments: usize) {
        if arguments > 0 {
            self.assembler.emit(format!("add rsp, {}", arguments * 8));
        }

        self.assembler.emit("push rax");
    }

    fn codegen_instruction(&mut self, instruction: Instruction) -> CompileResult<()> {
        match instruction {
            Instruction::Nop => self.assembler.emit("nop"),
            Instruction::AllocParam { register, .. } | Instruction::AllocLocal { register, .. } => {
                return Err(CompileError::internal(format!(
                    "slot %{register} declared after the head of `{}`",
                    self.function.label
                )));
            }
            Instruction::MoveInt { register, value } => {
                let register = self.register(register)?;
                self.assembler.emit(format!("mov {register}, {value}"));
            }
            Instruction::MoveString { register, string } => {
                let register = self.register(register)?;
                self.assembler
                    .emit(format!("mov {register}, sbc__string_{string}"));
            }
            Instruction::MoveFunction { register, function } => {
                let label = self.function_label(function)?;
                let register = self.register(register)?;
                self.assembler.emit(format!("mov {register}, {label}"));
            }
            Instruction::Push(register) => {
                let register = self.register(register)?;
                self.assembler.emit(format!("push {register}"));
            }
            Instruction::Pop(register) => {
                let register = self.register(register)?;
                self.assembler.emit(format!("pop {register}"));
            }
            Instruction::Load { register, slot } => {
                let slot = self.slot(slot)?;
                let register = self.register(register)?;
                self.assembler.emit(format!("mov {register}, {slot}"));
            }
            Instruction::StoreRegister { slot, register } => {
                let slot = self.slot(slot)?;
                let register = self.register(register)?;
                self.assembler.emit(format!("mov {slot}, {register}"));
            }
            Instruction::StoreImmediate { slot, value } => {
                let slot = self.slot(slot)?;
                self.assembler.emit(format!("mov {slot}, {value}"));
            }
            Instruction::CallRegister {
                register,
                arguments,
            } => {
                self.ensure_nothing_live_across_call(Some(register))?;
                let callee = self.register(register)?;
                self.assembler.emit(format!("call {callee}"));
                self.finish_call(arguments);
            }
            Instruction::CallImmediate {
                function,
                arguments,
            } => {
                self.ensure_nothing_live_across_call(None)?;
                let label = self.function_label(function)?;
                self.assembler.emit(format!("call {label}"));
                self.finish_call(arguments);
            }
            Instruction::Jump(target) => self.assembler.emit(format!("jmp .L{target}")),
            Instruction::JumpIfNonZero { register, target } => {
                let register = self.register(register)?;
                self.assembler.emit(format!("cmp {register}, 0"));
                self.assembler.emit(format!("jne .L{target}"));
            }
            Instruction::Return => self.assembler.emit("jmp .exit"),
            Instruction::Binary {
                operator,
                destination,
                source,
            } => self.codegen_binary(operator, destination, source)?,
            Instruction::Kill(register) => self.pool.free(register),
        }

        Ok(())
    }

    fn codegen_binary(
        &mut self,
        operator: BinaryOperator,
        destination: RegisterId,
        source: RegisterId,
    ) -> CompileResult<()> {
        let destination = self.register(destination)?;
        let source = self.register(source)?;

        let condition = match operator {
            BinaryOperator::Add => {
                self.assembler.emit(format!("add {destination}, {source}"));
                return Ok(());
            }
            BinaryOperator::Sub => {
                self.assembler.emit(format!("sub {destination}, {source}"));
                return Ok(());
            }
            BinaryOperator::Mul => {
                self.assembler.emit(format!("imul {destination}, {source}"));
                return Ok(());
            }
            BinaryOperator::Div => {
                self.codegen_division(DIVIDE_HELPER, destination, source);
                return Ok(());
            }
            BinaryOperator::Mod => {
                self.codegen_division(MODULO_HELPER, destination, source);
                return Ok(());
            }
            BinaryOperator::Lt => "l",
            BinaryOperator::Gt => "g",
            BinaryOperator::Le => "le",
            BinaryOperator::Ge => "ge",
            BinaryOperator::Eq => "e",
            BinaryOperator::Ne => "ne",
        };

        let low_byte = destination.as_8_bit();

        self.assembler.emit(format!("cmp {destination}, {source}"));
        self.assembler.emit(format!("set{condition} {low_byte}"));
        self.assembler
            .emit(format!("movzx {destination}, {low_byte}"));

        Ok(())
    }

    fn codegen_division(
        &mut self,
        helper: &str,
        destination: X86FullRegister,
        source: X86FullRegister,
    ) {
        // The helper returns in rax, which may hold some other live value
        let save_rax =
            destination != X86FullRegister::Rax && self.pool.is_occupied(X86FullRegister::Rax);

        if save_rax {
            self.assembler.emit("push rax");
        }

        self.assembler.emit(format!("push {destination}"));
        self.assembler.emit(format!("push {source}"));
        self.assembler.emit(format!("call {helper}"));
        self.assembler.emit("add rsp, 16");

        if destination != X86FullRegister::Rax {
            self.assembler.emit(format!("mov {destination}, rax"));
        }

        if save_rax {
            self.assembler.emit("pop rax");
        }
    }
}
