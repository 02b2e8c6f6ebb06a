//! Dead-code elimination
//!
//! Iterated mark/sweep per function: critical instructions (returns,
//! branches, stores, calls to functions not proven pure) seed a worklist;
//! marking walks operand definitions within the function; the sweep drops
//! everything unmarked. A cleanup removes unreachable blocks, and a
//! global sweep drops functions without uses (except `main`) and unused
//! globals.

use std::collections::VecDeque;

use indexmap::IndexSet;

use crate::instruction::Opcode;
use crate::module::Module;
use crate::passes::func_info::FuncInfo;
use crate::passes::Pass;
use crate::value::ValueId;

#[derive(Debug, Default)]
pub struct DeadCode {
    func_info: FuncInfo,
    erased: usize,
}

impl DeadCode {
    pub fn new() -> Self {
        DeadCode::default()
    }

    fn is_critical(&self, m: &Module, inst: ValueId) -> bool {
        match m.value(inst).opcode() {
            Some(Opcode::Br) | Some(Opcode::Ret) | Some(Opcode::Store) => true,
            Some(Opcode::Call) => {
                let callee = m.value(inst).operands()[0];
                !(m.value(callee).is_function() && self.func_info.is_pure(callee))
            }
            _ => false,
        }
    }

    /// Mark everything reachable from the critical roots along def-use
    /// chains, staying inside `f`
    fn mark(&self, m: &Module, f: ValueId) -> IndexSet<ValueId> {
        let mut marked = IndexSet::new();
        let mut work_list = VecDeque::new();
        for &bb in m.function_blocks(f) {
            for &inst in m.block_instructions(bb) {
                if self.is_critical(m, inst) && marked.insert(inst) {
                    work_list.push_back(inst);
                }
            }
        }
        while let Some(inst) = work_list.pop_front() {
            for &op in m.value(inst).operands() {
                if !m.value(op).is_instruction() {
                    continue;
                }
                if m.block_parent(m.inst_parent(op)) != f {
                    continue;
                }
                if marked.insert(op) {
                    work_list.push_back(op);
                }
            }
        }
        marked
    }

    fn sweep(&mut self, m: &mut Module, f: ValueId, marked: &IndexSet<ValueId>) -> bool {
        let mut wait_delete = Vec::new();
        for &bb in m.function_blocks(f) {
            for &inst in m.block_instructions(bb) {
                if self.is_critical(m, inst) {
                    continue;
                }
                if !marked.contains(&inst) {
                    wait_delete.push((bb, inst));
                }
            }
        }
        // dead instructions may use each other; detach every one first so
        // the erasures below see empty use-lists
        for &(_, inst) in &wait_delete {
            m.detach_operands(inst);
        }
        for &(bb, inst) in &wait_delete {
            m.erase_instruction(bb, inst);
        }
        self.erased += wait_delete.len();
        !wait_delete.is_empty()
    }

    /// Remove blocks with no predecessors (except the entry), repeating
    /// while removals orphan further blocks
    fn clear_basic_blocks(&mut self, m: &mut Module, f: ValueId) -> bool {
        let mut changed = false;
        loop {
            let entry = m.entry_block(f);
            let to_erase: Vec<ValueId> = m
                .function_blocks(f)
                .iter()
                .copied()
                .filter(|&bb| bb != entry && m.block_preds(bb).is_empty())
                .collect();
            if to_erase.is_empty() {
                break;
            }
            for bb in to_erase {
                let succs = m.remove_block(f, bb);
                for succ in succs {
                    m.prune_phis_for_removed_pred(succ, bb);
                }
                changed = true;
            }
        }
        changed
    }

    /// Fold straight-line chains: a block that branches unconditionally
    /// to its successor's only predecessor absorbs that successor. φs in
    /// the absorbed block are degenerate and collapse; φs further down
    /// rewrite their incoming block.
    fn merge_straightline_blocks(&mut self, m: &mut Module, f: ValueId) -> bool {
        let mut changed = false;
        'restart: loop {
            let entry = m.entry_block(f);
            for bb in m.function_blocks(f).to_vec() {
                let Some(term) = m.terminator(bb) else {
                    continue;
                };
                if m.value(term).opcode() != Some(Opcode::Br)
                    || m.value(term).operands().len() != 1
                {
                    continue;
                }
                let succ = m.value(term).operands()[0];
                if succ == bb || succ == entry || m.block_preds(succ) != [bb] {
                    continue;
                }
                // a φ with a missing incoming pair (use before init in the
                // source) is left alone rather than merged away
                let mergeable = m.block_instructions(succ).iter().all(|&inst| {
                    m.value(inst).opcode() != Some(Opcode::Phi)
                        || m.value(inst).operands().len() == 2
                });
                if !mergeable {
                    continue;
                }

                // single predecessor: any φ here has exactly one incoming
                for inst in m.block_instructions(succ).to_vec() {
                    if m.value(inst).opcode() != Some(Opcode::Phi) {
                        continue;
                    }
                    let sole = m.value(inst).operands()[0];
                    m.replace_all_uses_with(inst, sole);
                    m.erase_instruction(succ, inst);
                }

                m.erase_instruction(bb, term);
                for inst in m.block_instructions(succ).to_vec() {
                    m.transfer_instruction(succ, inst, bb);
                }
                // successors of the absorbed block now flow from `bb`;
                // rewrite their φ incoming blocks before the CFG reset
                for after in m.block_succs(succ).to_vec() {
                    for inst in m.block_instructions(after).to_vec() {
                        if m.value(inst).opcode() != Some(Opcode::Phi) {
                            continue;
                        }
                        for (i, op) in
                            m.value(inst).operands().to_vec().into_iter().enumerate()
                        {
                            if i % 2 == 1 && op == succ {
                                m.set_operand(inst, i, bb);
                            }
                        }
                    }
                }
                m.remove_block(f, succ);
                m.reset_cfg(f);
                changed = true;
                continue 'restart;
            }
            break;
        }
        changed
    }

    /// Drop functions with empty use-lists (except `main`) and globals
    /// nothing references
    pub fn sweep_globally(&mut self, m: &mut Module) -> bool {
        let mut changed = false;
        loop {
            let dead_funcs: IndexSet<ValueId> = m
                .functions()
                .iter()
                .copied()
                .filter(|&f| m.value(f).uses.is_empty() && m.name_of(f) != "main")
                .collect();
            if dead_funcs.is_empty() {
                break;
            }
            for &f in &dead_funcs {
                // detach the body so callees and globals lose these uses
                for bb in m.function_blocks(f).to_vec() {
                    m.remove_block(f, bb);
                }
            }
            m.retain_functions(|f| !dead_funcs.contains(&f));
            changed = true;
        }
        let dead_globals: IndexSet<ValueId> = m
            .globals()
            .iter()
            .copied()
            .filter(|&g| m.value(g).uses.is_empty())
            .collect();
        if !dead_globals.is_empty() {
            m.retain_globals(|g| !dead_globals.contains(&g));
            changed = true;
        }
        changed
    }
}

impl Pass for DeadCode {
    fn name(&self) -> &'static str {
        "dead-code"
    }

    fn run(&mut self, module: &mut Module) -> bool {
        self.func_info.run(module);
        let erased_before = self.erased;
        let mut any = false;
        loop {
            let mut changed = false;
            for f in module.functions().to_vec() {
                if module.is_declaration(f) {
                    continue;
                }
                let marked = self.mark(module, f);
                changed |= self.sweep(module, f, &marked);
            }
            if !changed {
                break;
            }
            any = true;
        }
        for f in module.functions().to_vec() {
            if module.is_declaration(f) {
                continue;
            }
            any |= self.clear_basic_blocks(module, f);
            any |= self.merge_straightline_blocks(module, f);
        }
        log::info!(
            "dead code pass erased {} instructions",
            self.erased - erased_before
        );
        any
    }
}
