//! Values, users and use edges
//!
//! Every IR entity that can appear as an operand (constants, globals,
//! functions, arguments, basic blocks, instructions) is one slot in the
//! module's value arena, addressed by a [`ValueId`]. A value records the
//! reverse side of the operand graph in its use-list; the module keeps
//! both directions consistent on every mutation.

use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::instruction::Opcode;

/// Handle to a value in the module arena
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ValueId(u32);

impl ValueId {
    pub(crate) fn new(index: usize) -> Self {
        ValueId(index as u32)
    }

    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// A directed edge `(user, operand index) -> value`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Use {
    pub user: ValueId,
    pub index: usize,
}

/// Operand vector; most instructions have at most three operands
pub type Operands = SmallVec<[ValueId; 3]>;

/// What a value is
#[derive(Debug, Clone)]
pub enum ValueKind {
    ConstantInt {
        value: i32,
    },
    ConstantFp {
        value: f32,
    },
    /// Zero initializer for a global scalar or array
    ConstantZero,
    GlobalVariable {
        is_const: bool,
        init: ValueId,
    },
    Function {
        args: Vec<ValueId>,
        blocks: Vec<ValueId>,
    },
    Argument {
        parent: ValueId,
        position: usize,
    },
    BasicBlock {
        parent: ValueId,
        instructions: Vec<ValueId>,
        preds: Vec<ValueId>,
        succs: Vec<ValueId>,
    },
    Instruction {
        parent: ValueId,
        opcode: Opcode,
        operands: Operands,
    },
}

/// One arena slot: type, optional name, kind and use-list
#[derive(Debug, Clone)]
pub struct ValueData {
    pub ty: crate::types::TypeId,
    /// Empty until set explicitly or by `Module::set_print_name`
    pub name: String,
    pub kind: ValueKind,
    pub uses: Vec<Use>,
}

impl ValueData {
    pub fn is_constant(&self) -> bool {
        matches!(
            self.kind,
            ValueKind::ConstantInt { .. } | ValueKind::ConstantFp { .. } | ValueKind::ConstantZero
        )
    }

    pub fn is_instruction(&self) -> bool {
        matches!(self.kind, ValueKind::Instruction { .. })
    }

    pub fn is_basic_block(&self) -> bool {
        matches!(self.kind, ValueKind::BasicBlock { .. })
    }

    pub fn is_function(&self) -> bool {
        matches!(self.kind, ValueKind::Function { .. })
    }

    pub fn is_global(&self) -> bool {
        matches!(self.kind, ValueKind::GlobalVariable { .. })
    }

    pub fn as_const_int(&self) -> Option<i32> {
        match self.kind {
            ValueKind::ConstantInt { value } => Some(value),
            _ => None,
        }
    }

    pub fn as_const_fp(&self) -> Option<f32> {
        match self.kind {
            ValueKind::ConstantFp { value } => Some(value),
            _ => None,
        }
    }

    /// Opcode if this value is an instruction
    pub fn opcode(&self) -> Option<Opcode> {
        match self.kind {
            ValueKind::Instruction { opcode, .. } => Some(opcode),
            _ => None,
        }
    }

    /// Operand list of a user value (instructions and globals)
    pub fn operands(&self) -> &[ValueId] {
        match &self.kind {
            ValueKind::Instruction { operands, .. } => operands,
            ValueKind::GlobalVariable { init, .. } => std::slice::from_ref(init),
            _ => &[],
        }
    }
}
