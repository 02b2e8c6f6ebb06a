//! Function inlining
//!
//! A call site is inlined when the callee is not the caller, not
//! recursive, not a runtime builtin, and small enough. The callee body is
//! cloned block by block through a value map, the call block is split,
//! and returns are stitched onto the continuation (through a φ when the
//! callee returns from several places). After every successful inline the
//! enclosing function is rescanned from the top, so nested opportunities
//! converge.

use indexmap::{IndexMap, IndexSet};

use crate::instruction::Opcode;
use crate::module::Module;
use crate::passes::Pass;
use crate::value::ValueId;

/// Callees at or above this many blocks are left alone
const MAX_CALLEE_BLOCKS: usize = 6;

/// Runtime builtins are never inlined
const RUNTIME_BUILTINS: [&str; 4] = ["input", "output", "outputFloat", "neg_idx_except"];

#[derive(Debug, Default)]
pub struct FunctionInline {
    inlined: usize,
}

impl FunctionInline {
    pub fn new() -> Self {
        FunctionInline::default()
    }

    fn is_runtime(m: &Module, f: ValueId) -> bool {
        RUNTIME_BUILTINS.contains(&m.name_of(f))
    }

    /// Functions containing a direct self-call
    fn collect_recursive(m: &Module) -> IndexSet<ValueId> {
        let mut recursive = IndexSet::new();
        for &f in m.functions() {
            'blocks: for &bb in m.function_blocks(f) {
                for &inst in m.block_instructions(bb) {
                    if m.value(inst).opcode() == Some(Opcode::Call)
                        && m.value(inst).operands()[0] == f
                    {
                        recursive.insert(f);
                        break 'blocks;
                    }
                }
            }
        }
        recursive
    }

    /// First inlinable call site in `f`, scanning in block order
    fn find_candidate(
        &self,
        m: &Module,
        f: ValueId,
        recursive: &IndexSet<ValueId>,
    ) -> Option<ValueId> {
        for &bb in m.function_blocks(f) {
            for &inst in m.block_instructions(bb) {
                if m.value(inst).opcode() != Some(Opcode::Call) {
                    continue;
                }
                let callee = m.value(inst).operands()[0];
                if callee == f
                    || recursive.contains(&callee)
                    || Self::is_runtime(m, callee)
                    || m.is_declaration(callee)
                    || m.function_blocks(callee).len() >= MAX_CALLEE_BLOCKS
                {
                    continue;
                }
                let formal_count = m.function_args(callee).len();
                if m.value(inst).operands().len() != 1 + formal_count {
                    // malformed call site: leave the IR alone
                    log::warn!(
                        "call to '{}' with mismatched argument count; not inlining",
                        m.name_of(callee)
                    );
                    continue;
                }
                return Some(inst);
            }
        }
        None
    }

    fn inline_function(&mut self, m: &mut Module, call: ValueId) {
        let call_bb = m.inst_parent(call);
        let caller = m.block_parent(call_bb);
        let operands = m.value(call).operands().to_vec();
        let callee = operands[0];
        let actuals = &operands[1..];
        let ret_ty = m.function_return_type(callee);
        let is_void = m.types.is_void(ret_ty);

        // 1. formal → actual bindings
        let mut v_map: IndexMap<ValueId, ValueId> = IndexMap::new();
        let formals = m.function_args(callee).to_vec();
        for (formal, &actual) in formals.iter().zip(actuals) {
            v_map.insert(*formal, actual);
        }

        // 2. an empty twin for every callee block
        let callee_blocks = m.function_blocks(callee).to_vec();
        let mut new_bbs = Vec::with_capacity(callee_blocks.len());
        for &bb in &callee_blocks {
            let twin = m.create_block(caller, "");
            v_map.insert(bb, twin);
            new_bbs.push(twin);
        }

        // 3. clone instructions; returns are recorded, void returns dropped
        let mut ret_list = Vec::new();
        let mut ret_void_bbs = Vec::new();
        for (&bb, &twin) in callee_blocks.iter().zip(&new_bbs) {
            for inst in m.block_instructions(bb).to_vec() {
                let is_ret = m.value(inst).opcode() == Some(Opcode::Ret);
                if is_ret && is_void {
                    ret_void_bbs.push(twin);
                    continue;
                }
                let clone = m.clone_instruction(inst, twin);
                v_map.insert(inst, clone);
                if is_ret {
                    ret_list.push(clone);
                }
            }
        }

        // 4. rewrite cloned operands through the map; anything module-level
        // (constants, globals, other functions) passes through unchanged
        for &twin in &new_bbs {
            for inst in m.block_instructions(twin).to_vec() {
                for (i, op) in m.value(inst).operands().to_vec().into_iter().enumerate() {
                    if let Some(&mapped) = v_map.get(&op) {
                        m.set_operand(inst, i, mapped);
                    }
                }
            }
        }

        // 5. continuation block and return stitching
        let bb_after = m.create_block(caller, "");
        let void_ty = m.types.void_type();
        let mut ret_val = None;
        if !is_void {
            if ret_list.len() == 1 {
                let ret = ret_list[0];
                let ret_bb = m.inst_parent(ret);
                ret_val = Some(m.value(ret).operands()[0]);
                m.erase_instruction(ret_bb, ret);
                let br = m.new_instruction(Opcode::Br, void_ty, &[bb_after], ret_bb);
                m.append_instruction(ret_bb, br);
            } else if !ret_list.is_empty() {
                // several returns merge through a φ in a fresh block
                let bb_phi = m.create_block(caller, "");
                let mut phi_operands = Vec::with_capacity(ret_list.len() * 2);
                for &ret in &ret_list {
                    let ret_bb = m.inst_parent(ret);
                    phi_operands.push(m.value(ret).operands()[0]);
                    phi_operands.push(ret_bb);
                    m.erase_instruction(ret_bb, ret);
                    let br = m.new_instruction(Opcode::Br, void_ty, &[bb_phi], ret_bb);
                    m.append_instruction(ret_bb, br);
                }
                let phi = m.new_instruction(Opcode::Phi, ret_ty, &phi_operands, bb_phi);
                m.append_instruction(bb_phi, phi);
                let br = m.new_instruction(Opcode::Br, void_ty, &[bb_after], bb_phi);
                m.append_instruction(bb_phi, br);
                ret_val = Some(phi);
            }
            // a non-void callee with no returns is malformed IR; nothing
            // sensible to stitch
        } else {
            for &ret_bb in &ret_void_bbs {
                let br = m.new_instruction(Opcode::Br, void_ty, &[bb_after], ret_bb);
                m.append_instruction(ret_bb, br);
            }
        }

        // 6. split the call block: everything after the call moves to the
        // continuation
        let insts = m.block_instructions(call_bb).to_vec();
        let call_pos = insts.iter().position(|&i| i == call).unwrap();
        for &inst in &insts[call_pos + 1..] {
            m.transfer_instruction(call_bb, inst, bb_after);
        }

        // 7. the cloned body replaces the call
        if let Some(v) = ret_val {
            m.replace_all_uses_with(call, v);
        }
        m.erase_instruction(call_bb, call);
        let entry_twin = new_bbs[0];
        let br = m.new_instruction(Opcode::Br, void_ty, &[entry_twin], call_bb);
        m.append_instruction(call_bb, br);

        m.reset_cfg(caller);
        self.inlined += 1;
    }
}

impl Pass for FunctionInline {
    fn name(&self) -> &'static str {
        "function-inline"
    }

    fn run(&mut self, module: &mut Module) -> bool {
        let recursive = Self::collect_recursive(module);
        let before = self.inlined;
        for f in module.functions().to_vec() {
            if Self::is_runtime(module, f) {
                continue;
            }
            // rescan from the top after every mutation
            while let Some(call) = self.find_candidate(module, f, &recursive) {
                self.inline_function(module, call);
            }
        }
        let count = self.inlined - before;
        if count > 0 {
            log::debug!("inlined {} call sites", count);
        }
        count > 0
    }
}
