use std::{fmt, rc::Rc};

use itertools::Itertools;
use strum::EnumString;

use crate::frontend::ast::StmtId;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Type {
    /// Result of an earlier error. Unifies with everything so one mistake
    /// is not reported twice.
    Error,
    /// Placeholder while the type of a `let` is being inferred
    Unknown,
    Void,
    Int,
    Str,
    /// *T
    Pointer(Rc<Type>),
    /// fn(int, *str) -> int
    Function(Rc<FunctionType>),
}

#[derive(Debug, Clone, Eq)]
pub struct FunctionType {
    /// Function types are nominal: two functions with identical signatures
    /// still have distinct types
    pub decl: StmtId,
    pub parameters: Vec<Type>,
    pub return_type: Type,
}

impl PartialEq for FunctionType {
    fn eq(&self, other: &Self) -> bool {
        self.decl == other.decl
    }
}

impl std::hash::Hash for FunctionType {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.decl.hash(state);
    }
}

/// Type names usable in source
#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumString)]
#[strum(serialize_all = "snake_case")]
pub enum PrimitiveKind {
    Int,
    Str,
    Void,
}

impl From<PrimitiveKind> for Type {
    fn from(kind: PrimitiveKind) -> Self {
        match kind {
            PrimitiveKind::Int => Type::Int,
            PrimitiveKind::Str => Type::Str,
            PrimitiveKind::Void => Type::Void,
        }
    }
}

impl Type {
    pub fn pointer_to(inner: Type) -> Self {
        Type::Pointer(Rc::new(inner))
    }

    pub fn as_function(&self) -> Option<&FunctionType> {
        match self {
            Type::Function(function) => Some(function),
            _ => None,
        }
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Type::Error => f.write_str("<error>"),
            Type::Unknown => f.write_str("<unknown>"),
            Type::Void => f.write_str("void"),
            Type::Int => f.write_str("int"),
            Type::Str => f.write_str("str"),
            Type::Pointer(inner) => write!(f, "*{inner}"),
            Type::Function(function) => write!(
                f,
                "fn({}) -> {}",
                function.parameters.iter().join(", "),
                function.return_type
            ),
        }
    }
}

/// Unifies two types, returning the unified type or a message naming both
pub fn resolve_types(a: &Type, b: &Type) -> Result<Type, String> {
    match (a, b) {
        (Type::Error, _) | (_, Type::Error) => Ok(a.clone()),
        (Type::Int, Type::Int) | (Type::Str, Type::Str) | (Type::Void, Type::Void) => {
            Ok(a.clone())
        }
        (Type::Pointer(a_inner), Type::Pointer(b_inner)) => {
            resolve_types(a_inner, b_inner)
                .map(|_| a.clone())
                .map_err(|_| format!("type `{a}` is not assignable to `{b}`"))
        }
        (Type::Function(a_function), Type::Function(b_function))
            if a_function.decl == b_function.decl =>
        {
            Ok(a.clone())
        }
        _ => Err(format!("type `{a}` is not assignable to `{b}`")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::Index;

    fn function(decl: usize) -> Type {
        Type::Function(Rc::new(FunctionType {
            decl: StmtId::new(decl),
            parameters: vec![Type::Int],
            return_type: Type::Int,
        }))
    }

    #[test]
    fn error_absorbs_anything() {
        assert_eq!(resolve_types(&Type::Error, &Type::Str), Ok(Type::Error));
        assert_eq!(resolve_types(&Type::Int, &Type::Error), Ok(Type::Int));
    }

    #[test]
    fn pointers_unify_through_their_pointee() {
        let pointer_to_str = Type::pointer_to(Type::Str);

        assert!(resolve_types(&pointer_to_str, &Type::pointer_to(Type::Str)).is_ok());
        assert_eq!(
            resolve_types(&pointer_to_str, &Type::pointer_to(Type::Int)),
            Err("type `*str` is not assignable to `*int`".to_string())
        );
    }

    #[test]
    fn functions_unify_by_declaration() {
        assert!(resolve_types(&function(1), &function(1)).is_ok());
        assert!(resolve_types(&function(1), &function(2)).is_err());
    }

    #[test]
    fn display() {
        assert_eq!(function(3).to_string(), "fn(int) -> int");
        assert_eq!(Type::pointer_to(Type::pointer_to(Type::Str)).to_string(), "**str");
    }
}
