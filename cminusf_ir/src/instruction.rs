//! Instruction opcodes
//!
//! Instructions are tagged variants over a uniform operand vector (held in
//! [`crate::value::ValueKind::Instruction`]); the opcode carries whatever
//! opcode-specific payload exists (the allocated type of an `alloca`, the
//! predicate of a comparison).

use serde::{Deserialize, Serialize};

use crate::types::TypeId;

/// Comparison predicate shared by `icmp` and `fcmp`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CmpOp {
    /// LLVM-style predicate spelling for signed integer comparison
    pub fn icmp_mnemonic(self) -> &'static str {
        match self {
            CmpOp::Eq => "eq",
            CmpOp::Ne => "ne",
            CmpOp::Lt => "slt",
            CmpOp::Le => "sle",
            CmpOp::Gt => "sgt",
            CmpOp::Ge => "sge",
        }
    }

    /// Ordered float predicate spelling
    pub fn fcmp_mnemonic(self) -> &'static str {
        match self {
            CmpOp::Eq => "oeq",
            CmpOp::Ne => "one",
            CmpOp::Lt => "olt",
            CmpOp::Le => "ole",
            CmpOp::Gt => "ogt",
            CmpOp::Ge => "oge",
        }
    }
}

/// Instruction opcodes
///
/// Operand layouts:
/// - binary arithmetic / comparisons: `[lhs, rhs]`
/// - `Load`: `[ptr]`; `Store`: `[value, ptr]`
/// - `Gep`: `[base, idx...]` (one index for pointers, `[0, i]` for arrays)
/// - `Br`: `[target]` or `[cond, then, else]`
/// - `Ret`: `[]` or `[value]`
/// - `Call`: `[callee, args...]`
/// - `Phi`: `[value, pred_block]` pairs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Opcode {
    Alloca(TypeId),
    Load,
    Store,
    Gep,
    Add,
    Sub,
    Mul,
    SDiv,
    FAdd,
    FSub,
    FMul,
    FDiv,
    ICmp(CmpOp),
    FCmp(CmpOp),
    SiToFp,
    FpToSi,
    Zext,
    Phi,
    Br,
    Ret,
    Call,
}

impl Opcode {
    pub fn is_terminator(self) -> bool {
        matches!(self, Opcode::Br | Opcode::Ret)
    }

    pub fn is_phi(self) -> bool {
        matches!(self, Opcode::Phi)
    }

    pub fn is_alloca(self) -> bool {
        matches!(self, Opcode::Alloca(_))
    }

    /// Integer add/sub/mul/div
    pub fn is_int_binary(self) -> bool {
        matches!(self, Opcode::Add | Opcode::Sub | Opcode::Mul | Opcode::SDiv)
    }

    pub fn is_float_binary(self) -> bool {
        matches!(
            self,
            Opcode::FAdd | Opcode::FSub | Opcode::FMul | Opcode::FDiv
        )
    }

    /// Does this opcode produce an SSA result value?
    pub fn has_result(self) -> bool {
        !matches!(self, Opcode::Store | Opcode::Br | Opcode::Ret)
    }

    pub fn mnemonic(self) -> &'static str {
        match self {
            Opcode::Alloca(_) => "alloca",
            Opcode::Load => "load",
            Opcode::Store => "store",
            Opcode::Gep => "getelementptr",
            Opcode::Add => "add",
            Opcode::Sub => "sub",
            Opcode::Mul => "mul",
            Opcode::SDiv => "sdiv",
            Opcode::FAdd => "fadd",
            Opcode::FSub => "fsub",
            Opcode::FMul => "fmul",
            Opcode::FDiv => "fdiv",
            Opcode::ICmp(_) => "icmp",
            Opcode::FCmp(_) => "fcmp",
            Opcode::SiToFp => "sitofp",
            Opcode::FpToSi => "fptosi",
            Opcode::Zext => "zext",
            Opcode::Phi => "phi",
            Opcode::Br => "br",
            Opcode::Ret => "ret",
            Opcode::Call => "call",
        }
    }
}
