//! Functions, arguments and basic blocks
//!
//! All three live in the module's value arena; the operations here keep
//! the containment lists (function → blocks → instructions) and the CFG
//! edge sets (pred/succ) consistent.

use crate::module::Module;
use crate::types::TypeId;
use crate::value::{ValueId, ValueKind};

impl Module {
    // ---- functions ----------------------------------------------------

    /// Create a function of the given function type. Arguments are
    /// materialized from the parameter list; a function with no blocks is
    /// a declaration.
    pub fn create_function(&mut self, name: impl Into<String>, fn_ty: TypeId) -> ValueId {
        let params = self
            .types
            .function_params(fn_ty)
            .expect("create_function requires a function type")
            .to_vec();
        let f = self.new_value(
            fn_ty,
            name,
            ValueKind::Function {
                args: Vec::new(),
                blocks: Vec::new(),
            },
        );
        let args: Vec<ValueId> = params
            .iter()
            .enumerate()
            .map(|(position, &ty)| {
                self.new_value(
                    ty,
                    "",
                    ValueKind::Argument {
                        parent: f,
                        position,
                    },
                )
            })
            .collect();
        match &mut self.value_mut(f).kind {
            ValueKind::Function { args: slot, .. } => *slot = args,
            _ => unreachable!(),
        }
        self.push_function(f);
        f
    }

    pub fn function_args(&self, f: ValueId) -> &[ValueId] {
        match &self.value(f).kind {
            ValueKind::Function { args, .. } => args,
            _ => panic!("not a function"),
        }
    }

    pub fn function_blocks(&self, f: ValueId) -> &[ValueId] {
        match &self.value(f).kind {
            ValueKind::Function { blocks, .. } => blocks,
            _ => panic!("not a function"),
        }
    }

    pub fn function_return_type(&self, f: ValueId) -> TypeId {
        self.types
            .function_return(self.ty_of(f))
            .expect("function value with non-function type")
    }

    /// A declaration has no body
    pub fn is_declaration(&self, f: ValueId) -> bool {
        self.function_blocks(f).is_empty()
    }

    pub fn entry_block(&self, f: ValueId) -> ValueId {
        *self
            .function_blocks(f)
            .first()
            .expect("entry_block of a declaration")
    }

    // ---- basic blocks -------------------------------------------------

    pub fn create_block(&mut self, f: ValueId, name: impl Into<String>) -> ValueId {
        let label_ty = self.types.label_type();
        let bb = self.new_value(
            label_ty,
            name,
            ValueKind::BasicBlock {
                parent: f,
                instructions: Vec::new(),
                preds: Vec::new(),
                succs: Vec::new(),
            },
        );
        match &mut self.value_mut(f).kind {
            ValueKind::Function { blocks, .. } => blocks.push(bb),
            _ => panic!("create_block on a non-function"),
        }
        bb
    }

    pub fn block_parent(&self, bb: ValueId) -> ValueId {
        match &self.value(bb).kind {
            ValueKind::BasicBlock { parent, .. } => *parent,
            _ => panic!("not a basic block"),
        }
    }

    pub fn block_instructions(&self, bb: ValueId) -> &[ValueId] {
        match &self.value(bb).kind {
            ValueKind::BasicBlock { instructions, .. } => instructions,
            _ => panic!("not a basic block"),
        }
    }

    pub fn block_preds(&self, bb: ValueId) -> &[ValueId] {
        match &self.value(bb).kind {
            ValueKind::BasicBlock { preds, .. } => preds,
            _ => panic!("not a basic block"),
        }
    }

    pub fn block_succs(&self, bb: ValueId) -> &[ValueId] {
        match &self.value(bb).kind {
            ValueKind::BasicBlock { succs, .. } => succs,
            _ => panic!("not a basic block"),
        }
    }

    /// The block's terminator, if its last instruction is one
    pub fn terminator(&self, bb: ValueId) -> Option<ValueId> {
        let last = *self.block_instructions(bb).last()?;
        let opcode = self.value(last).opcode().expect("block contains non-instruction");
        opcode.is_terminator().then_some(last)
    }

    pub fn is_terminated(&self, bb: ValueId) -> bool {
        self.terminator(bb).is_some()
    }

    /// Add the CFG edge `a -> b` (idempotent)
    pub fn link_blocks(&mut self, a: ValueId, b: ValueId) {
        match &mut self.value_mut(a).kind {
            ValueKind::BasicBlock { succs, .. } => {
                if !succs.contains(&b) {
                    succs.push(b);
                }
            }
            _ => panic!("not a basic block"),
        }
        match &mut self.value_mut(b).kind {
            ValueKind::BasicBlock { preds, .. } => {
                if !preds.contains(&a) {
                    preds.push(a);
                }
            }
            _ => panic!("not a basic block"),
        }
    }

    /// Remove the CFG edge `a -> b`
    pub fn unlink_blocks(&mut self, a: ValueId, b: ValueId) {
        match &mut self.value_mut(a).kind {
            ValueKind::BasicBlock { succs, .. } => succs.retain(|&s| s != b),
            _ => panic!("not a basic block"),
        }
        match &mut self.value_mut(b).kind {
            ValueKind::BasicBlock { preds, .. } => preds.retain(|&p| p != a),
            _ => panic!("not a basic block"),
        }
    }

    /// Recompute every pred/succ set of `f` from block terminators
    pub fn reset_cfg(&mut self, f: ValueId) {
        let blocks = self.function_blocks(f).to_vec();
        for &bb in &blocks {
            match &mut self.value_mut(bb).kind {
                ValueKind::BasicBlock { preds, succs, .. } => {
                    preds.clear();
                    succs.clear();
                }
                _ => unreachable!(),
            }
        }
        for &bb in &blocks {
            let Some(term) = self.terminator(bb) else {
                continue;
            };
            let operands = self.value(term).operands().to_vec();
            match self.value(term).opcode().unwrap() {
                crate::instruction::Opcode::Br => {
                    if operands.len() == 1 {
                        self.link_blocks(bb, operands[0]);
                    } else {
                        self.link_blocks(bb, operands[1]);
                        self.link_blocks(bb, operands[2]);
                    }
                }
                _ => {}
            }
        }
    }

    /// Unlink a block from its function and the CFG, detaching the
    /// operand edges of every instruction it contains. Returns the
    /// former successors so callers can keep patching their φs.
    pub fn remove_block(&mut self, f: ValueId, bb: ValueId) -> Vec<ValueId> {
        let preds = self.block_preds(bb).to_vec();
        let succs = self.block_succs(bb).to_vec();
        for p in preds {
            self.unlink_blocks(p, bb);
        }
        for &s in &succs {
            self.unlink_blocks(bb, s);
        }
        for inst in self.block_instructions(bb).to_vec() {
            self.detach_operands(inst);
        }
        match &mut self.value_mut(bb).kind {
            ValueKind::BasicBlock { instructions, .. } => instructions.clear(),
            _ => unreachable!(),
        }
        match &mut self.value_mut(f).kind {
            ValueKind::Function { blocks, .. } => blocks.retain(|&b| b != bb),
            _ => panic!("remove_block on a non-function"),
        }
        succs
    }

    // ---- instructions in blocks ---------------------------------------

    pub fn inst_parent(&self, inst: ValueId) -> ValueId {
        match &self.value(inst).kind {
            ValueKind::Instruction { parent, .. } => *parent,
            _ => panic!("not an instruction"),
        }
    }

    fn set_inst_parent(&mut self, inst: ValueId, bb: ValueId) {
        match &mut self.value_mut(inst).kind {
            ValueKind::Instruction { parent, .. } => *parent = bb,
            _ => panic!("not an instruction"),
        }
    }

    pub fn append_instruction(&mut self, bb: ValueId, inst: ValueId) {
        self.set_inst_parent(inst, bb);
        match &mut self.value_mut(bb).kind {
            ValueKind::BasicBlock { instructions, .. } => instructions.push(inst),
            _ => panic!("not a basic block"),
        }
    }

    /// Insert at the head of the block (φ placement)
    pub fn prepend_instruction(&mut self, bb: ValueId, inst: ValueId) {
        self.set_inst_parent(inst, bb);
        match &mut self.value_mut(bb).kind {
            ValueKind::BasicBlock { instructions, .. } => instructions.insert(0, inst),
            _ => panic!("not a basic block"),
        }
    }

    /// Move an instruction to the end of another block without touching
    /// its operand edges
    pub fn transfer_instruction(&mut self, from_bb: ValueId, inst: ValueId, to_bb: ValueId) {
        match &mut self.value_mut(from_bb).kind {
            ValueKind::BasicBlock { instructions, .. } => instructions.retain(|&i| i != inst),
            _ => panic!("not a basic block"),
        }
        self.append_instruction(to_bb, inst);
    }

    /// Drop this user's edges from all of its operands' use-lists
    pub(crate) fn detach_operands(&mut self, inst: ValueId) {
        let operands = self.value(inst).operands().to_vec();
        for (i, op) in operands.into_iter().enumerate() {
            let uses = &mut self.value_mut(op).uses;
            if let Some(pos) = uses.iter().position(|u| u.user == inst && u.index == i) {
                uses.remove(pos);
            }
        }
    }

    /// Erase an instruction whose result is no longer used. Erasing a
    /// value that still has uses is a programmer fault.
    pub fn erase_instruction(&mut self, bb: ValueId, inst: ValueId) {
        assert!(
            self.value(inst).uses.is_empty(),
            "erasing an instruction that still has uses; RAUW first"
        );
        self.detach_operands(inst);
        match &mut self.value_mut(bb).kind {
            ValueKind::BasicBlock { instructions, .. } => {
                let before = instructions.len();
                instructions.retain(|&i| i != inst);
                assert!(before > instructions.len(), "instruction already erased");
            }
            _ => panic!("not a basic block"),
        }
    }

    /// Remove the φ incoming pairs that name `removed_pred`, collapsing
    /// any φ left with a single pair onto its sole value
    pub fn prune_phis_for_removed_pred(&mut self, block: ValueId, removed_pred: ValueId) {
        let mut degenerate = Vec::new();
        for inst in self.block_instructions(block).to_vec() {
            if self.value(inst).opcode() != Some(crate::instruction::Opcode::Phi) {
                continue;
            }
            let mut i = 1;
            while i < self.value(inst).operands().len() {
                if self.value(inst).operands()[i] == removed_pred {
                    // drop the (value, pred) pair
                    self.remove_operand(inst, i - 1);
                    self.remove_operand(inst, i - 1);
                } else {
                    i += 2;
                }
            }
            if self.value(inst).operands().len() == 2 {
                degenerate.push(inst);
            }
        }
        for phi in degenerate {
            let sole = self.value(phi).operands()[0];
            if sole != phi {
                self.replace_all_uses_with(phi, sole);
            }
            self.erase_instruction(block, phi);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instruction::Opcode;

    fn int_function(m: &mut Module, name: &str) -> ValueId {
        let i32_ty = m.types.int32_type();
        let fn_ty = m.types.function_type(i32_ty, vec![]);
        m.create_function(name, fn_ty)
    }

    #[test]
    fn test_declaration_vs_definition() {
        let mut m = Module::new();
        let f = int_function(&mut m, "f");
        assert!(m.is_declaration(f));
        m.create_block(f, "entry");
        assert!(!m.is_declaration(f));
    }

    #[test]
    fn test_reset_cfg_rebuilds_edges() {
        let mut m = Module::new();
        let f = int_function(&mut m, "f");
        let entry = m.create_block(f, "entry");
        let a = m.create_block(f, "a");
        let b = m.create_block(f, "b");
        let void = m.types.void_type();
        let cond = m.const_bool(true);
        let br = m.new_instruction(Opcode::Br, void, &[cond, a, b], entry);
        m.append_instruction(entry, br);
        let br_a = m.new_instruction(Opcode::Br, void, &[b], a);
        m.append_instruction(a, br_a);

        m.reset_cfg(f);
        assert_eq!(m.block_succs(entry), &[a, b]);
        assert_eq!(m.block_preds(b), &[entry, a]);
        assert_eq!(m.block_preds(a), &[entry]);
        assert!(m.block_succs(b).is_empty());
    }

    #[test]
    fn test_terminator_detection() {
        let mut m = Module::new();
        let f = int_function(&mut m, "f");
        let bb = m.create_block(f, "entry");
        assert!(!m.is_terminated(bb));
        let c = m.const_int(0);
        let ret = m.new_instruction(Opcode::Ret, m.types.void_type(), &[c], bb);
        m.append_instruction(bb, ret);
        assert_eq!(m.terminator(bb), Some(ret));
    }

    #[test]
    #[should_panic(expected = "still has uses")]
    fn test_erase_with_uses_panics() {
        let mut m = Module::new();
        let f = int_function(&mut m, "f");
        let bb = m.create_block(f, "entry");
        let c = m.const_int(1);
        let i32_ty = m.types.int32_type();
        let add = m.new_instruction(Opcode::Add, i32_ty, &[c, c], bb);
        m.append_instruction(bb, add);
        let ret = m.new_instruction(Opcode::Ret, m.types.void_type(), &[add], bb);
        m.append_instruction(bb, ret);
        m.erase_instruction(bb, add);
    }

    #[test]
    fn test_remove_block_unlinks_cfg() {
        let mut m = Module::new();
        let f = int_function(&mut m, "f");
        let entry = m.create_block(f, "entry");
        let dead = m.create_block(f, "dead");
        let exit = m.create_block(f, "exit");
        let void = m.types.void_type();
        let br = m.new_instruction(Opcode::Br, void, &[exit], dead);
        m.append_instruction(dead, br);
        m.link_blocks(dead, exit);
        let _ = entry;

        let succs = m.remove_block(f, dead);
        assert_eq!(succs, vec![exit]);
        assert!(m.block_preds(exit).is_empty());
        assert_eq!(m.function_blocks(f), &[entry, exit]);
    }

    #[test]
    fn test_phi_pruning_collapses_single_input() {
        let mut m = Module::new();
        let f = int_function(&mut m, "f");
        let a = m.create_block(f, "a");
        let b = m.create_block(f, "b");
        let join = m.create_block(f, "join");
        let i32_ty = m.types.int32_type();
        let v1 = m.const_int(1);
        let v2 = m.const_int(2);
        let phi = m.new_instruction(Opcode::Phi, i32_ty, &[v1, a, v2, b], join);
        m.prepend_instruction(join, phi);
        let ret = m.new_instruction(Opcode::Ret, m.types.void_type(), &[phi], join);
        m.append_instruction(join, ret);

        m.prune_phis_for_removed_pred(join, b);
        // the φ degenerated to [v1, a] and was collapsed onto v1
        assert_eq!(m.value(ret).operands(), &[v1]);
        assert_eq!(m.block_instructions(join).len(), 1);
    }
}
