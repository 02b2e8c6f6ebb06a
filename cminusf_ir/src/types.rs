//! IR type system
//!
//! Types are interned in a module-owned pool: structurally equal types
//! share one `TypeId`, so type equality is id equality everywhere else in
//! the crate.

use std::fmt::Write as _;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Handle to an interned type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TypeId(u32);

impl TypeId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// The closed set of IR types
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TypeKind {
    Void,
    /// Comparison results
    Int1,
    Int32,
    Float,
    /// The type of a basic block
    Label,
    Pointer(TypeId),
    Array(TypeId, u32),
    Function { ret: TypeId, params: Vec<TypeId> },
}

/// Interning pool; the first four slots are the scalar types
#[derive(Debug, Clone)]
pub struct TypePool {
    kinds: Vec<TypeKind>,
    interned: IndexMap<TypeKind, TypeId>,
}

impl TypePool {
    pub fn new() -> Self {
        let mut pool = TypePool {
            kinds: Vec::new(),
            interned: IndexMap::new(),
        };
        pool.intern(TypeKind::Void);
        pool.intern(TypeKind::Int1);
        pool.intern(TypeKind::Int32);
        pool.intern(TypeKind::Float);
        pool.intern(TypeKind::Label);
        pool
    }

    fn intern(&mut self, kind: TypeKind) -> TypeId {
        if let Some(&id) = self.interned.get(&kind) {
            return id;
        }
        let id = TypeId(self.kinds.len() as u32);
        self.kinds.push(kind.clone());
        self.interned.insert(kind, id);
        id
    }

    pub fn void_type(&self) -> TypeId {
        TypeId(0)
    }

    pub fn int1_type(&self) -> TypeId {
        TypeId(1)
    }

    pub fn int32_type(&self) -> TypeId {
        TypeId(2)
    }

    pub fn float_type(&self) -> TypeId {
        TypeId(3)
    }

    pub fn label_type(&self) -> TypeId {
        TypeId(4)
    }

    pub fn pointer_type(&mut self, element: TypeId) -> TypeId {
        self.intern(TypeKind::Pointer(element))
    }

    pub fn array_type(&mut self, element: TypeId, len: u32) -> TypeId {
        self.intern(TypeKind::Array(element, len))
    }

    pub fn function_type(&mut self, ret: TypeId, params: Vec<TypeId>) -> TypeId {
        self.intern(TypeKind::Function { ret, params })
    }

    pub fn kind(&self, id: TypeId) -> &TypeKind {
        &self.kinds[id.index()]
    }

    pub fn is_void(&self, id: TypeId) -> bool {
        matches!(self.kind(id), TypeKind::Void)
    }

    pub fn is_int1(&self, id: TypeId) -> bool {
        matches!(self.kind(id), TypeKind::Int1)
    }

    pub fn is_int32(&self, id: TypeId) -> bool {
        matches!(self.kind(id), TypeKind::Int32)
    }

    /// i1 or i32
    pub fn is_integer(&self, id: TypeId) -> bool {
        matches!(self.kind(id), TypeKind::Int1 | TypeKind::Int32)
    }

    pub fn is_float(&self, id: TypeId) -> bool {
        matches!(self.kind(id), TypeKind::Float)
    }

    pub fn is_pointer(&self, id: TypeId) -> bool {
        matches!(self.kind(id), TypeKind::Pointer(_))
    }

    pub fn is_array(&self, id: TypeId) -> bool {
        matches!(self.kind(id), TypeKind::Array(_, _))
    }

    pub fn is_function(&self, id: TypeId) -> bool {
        matches!(self.kind(id), TypeKind::Function { .. })
    }

    /// Element type behind a pointer
    pub fn pointee(&self, id: TypeId) -> Option<TypeId> {
        match self.kind(id) {
            TypeKind::Pointer(elem) => Some(*elem),
            _ => None,
        }
    }

    /// Element type of an array
    pub fn array_element(&self, id: TypeId) -> Option<TypeId> {
        match self.kind(id) {
            TypeKind::Array(elem, _) => Some(*elem),
            _ => None,
        }
    }

    pub fn function_return(&self, id: TypeId) -> Option<TypeId> {
        match self.kind(id) {
            TypeKind::Function { ret, .. } => Some(*ret),
            _ => None,
        }
    }

    pub fn function_params(&self, id: TypeId) -> Option<&[TypeId]> {
        match self.kind(id) {
            TypeKind::Function { params, .. } => Some(params),
            _ => None,
        }
    }

    /// LLVM-flavored rendering, e.g. `[10 x i32]*`
    pub fn display(&self, id: TypeId) -> String {
        let mut out = String::new();
        self.write_type(&mut out, id);
        out
    }

    fn write_type(&self, out: &mut String, id: TypeId) {
        match self.kind(id) {
            TypeKind::Void => out.push_str("void"),
            TypeKind::Int1 => out.push_str("i1"),
            TypeKind::Int32 => out.push_str("i32"),
            TypeKind::Float => out.push_str("float"),
            TypeKind::Label => out.push_str("label"),
            TypeKind::Pointer(elem) => {
                self.write_type(out, *elem);
                out.push('*');
            }
            TypeKind::Array(elem, len) => {
                let _ = write!(out, "[{} x ", len);
                self.write_type(out, *elem);
                out.push(']');
            }
            TypeKind::Function { ret, params } => {
                self.write_type(out, *ret);
                out.push_str(" (");
                for (i, param) in params.iter().enumerate() {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    self.write_type(out, *param);
                }
                out.push(')');
            }
        }
    }
}

impl Default for TypePool {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scalar_types_are_preinterned() {
        let pool = TypePool::new();
        assert!(pool.is_void(pool.void_type()));
        assert!(pool.is_int1(pool.int1_type()));
        assert!(pool.is_int32(pool.int32_type()));
        assert!(pool.is_float(pool.float_type()));
    }

    #[test]
    fn test_interning_makes_equal_types_identical() {
        let mut pool = TypePool::new();
        let p1 = pool.pointer_type(pool.int32_type());
        let p2 = pool.pointer_type(pool.int32_type());
        assert_eq!(p1, p2);

        let a1 = pool.array_type(pool.float_type(), 8);
        let a2 = pool.array_type(pool.float_type(), 8);
        let a3 = pool.array_type(pool.float_type(), 9);
        assert_eq!(a1, a2);
        assert_ne!(a1, a3);
    }

    #[test]
    fn test_function_type_accessors() {
        let mut pool = TypePool::new();
        let i32_ty = pool.int32_type();
        let f_ty = pool.function_type(i32_ty, vec![i32_ty, pool.float_type()]);
        assert_eq!(pool.function_return(f_ty), Some(i32_ty));
        assert_eq!(pool.function_params(f_ty).unwrap().len(), 2);
    }

    #[test]
    fn test_display() {
        let mut pool = TypePool::new();
        let arr = pool.array_type(pool.int32_type(), 10);
        let ptr = pool.pointer_type(arr);
        assert_eq!(pool.display(ptr), "[10 x i32]*");
        let f = pool.function_type(pool.void_type(), vec![pool.float_type()]);
        assert_eq!(pool.display(f), "void (float)");
    }
}
