use crate::{
    error::{CompileError, CompileResult, Diagnostic, Stage},
    frontend::ast::{Attr, ExprKind, FnDecl},
};

/// The attributes understood on function declarations
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FunctionAttributes {
    /// `#[c_function("symbol")]`: the body lives in C under `symbol`
    pub c_function: Option<String>,
    /// `#[c_export("symbol")]`: also callable from C as `symbol`
    pub c_export: Option<String>,
}

impl FunctionAttributes {
    pub fn of(decl: &FnDecl) -> CompileResult<Self> {
        let mut attributes = Self::default();

        for attr in &decl.attrs {
            let slot = match attr.ident.name.as_str() {
                "c_function" => &mut attributes.c_function,
                "c_export" => &mut attributes.c_export,
                other => {
                    return Err(report(attr, format!("unknown attribute `{other}`")));
                }
            };

            if slot.is_some() {
                return Err(report(
                    attr,
                    format!("duplicate attribute `{}`", attr.ident.name),
                ));
            }

            *slot = Some(single_string_argument(attr)?);
        }

        Ok(attributes)
    }
}

fn report(attr: &Attr, message: String) -> CompileError {
    CompileError::Type(Diagnostic::new(Stage::Checker, attr.line, message))
}

fn single_string_argument(attr: &Attr) -> CompileResult<String> {
    match attr.args.as_slice() {
        [argument] => match &argument.kind {
            ExprKind::Str(value) => Ok(value.clone()),
            _ => Err(report(
                attr,
                format!("`{}` expects a string argument", attr.ident.name),
            )),
        },
        args => Err(report(
            attr,
            format!(
                "`{}` expects exactly 1 argument, got {}",
                attr.ident.name,
                args.len()
            ),
        )),
    }
}
