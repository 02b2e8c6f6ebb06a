//! Dominator analysis
//!
//! Computes, per function: reverse postorder, immediate dominators via the
//! Cooper–Harvey–Kennedy iterative algorithm, dominance frontiers,
//! dominator-tree successor sets, and Euler-tour intervals for O(1)
//! dominance queries. Results are invalidated by any CFG mutation.

use std::fmt::Write as _;

use indexmap::{IndexMap, IndexSet};

use crate::module::Module;
use crate::passes::Pass;
use crate::value::ValueId;

#[derive(Debug, Default)]
pub struct Dominators {
    idom: IndexMap<ValueId, Option<ValueId>>,
    dom_frontier: IndexMap<ValueId, IndexSet<ValueId>>,
    dom_tree_succs: IndexMap<ValueId, IndexSet<ValueId>>,
    tree_l: IndexMap<ValueId, u32>,
    tree_r: IndexMap<ValueId, u32>,
    // per-function scratch
    post_order: IndexMap<ValueId, usize>,
    post_order_vec: Vec<ValueId>,
}

impl Dominators {
    pub fn new() -> Self {
        Dominators::default()
    }

    /// `None` for unreachable blocks; the entry is its own idom
    pub fn idom(&self, bb: ValueId) -> Option<ValueId> {
        self.idom.get(&bb).copied().flatten()
    }

    pub fn dominance_frontier(&self, bb: ValueId) -> &IndexSet<ValueId> {
        &self.dom_frontier[&bb]
    }

    pub fn dom_tree_successors(&self, bb: ValueId) -> &IndexSet<ValueId> {
        &self.dom_tree_succs[&bb]
    }

    /// Does `a` dominate `b`? Interval query over the dominator-tree
    /// Euler tour; false when either block is unreachable.
    pub fn dominates(&self, a: ValueId, b: ValueId) -> bool {
        match (
            self.tree_l.get(&a),
            self.tree_l.get(&b),
            self.tree_r.get(&a),
            self.tree_r.get(&b),
        ) {
            (Some(&la), Some(&lb), Some(&ra), Some(&rb)) => la <= lb && rb <= ra,
            _ => false,
        }
    }

    pub fn run_on_func(&mut self, m: &Module, f: ValueId) {
        self.post_order.clear();
        self.post_order_vec.clear();
        for &bb in m.function_blocks(f) {
            self.idom.insert(bb, None);
            self.dom_frontier.insert(bb, IndexSet::new());
            self.dom_tree_succs.insert(bb, IndexSet::new());
        }
        self.create_reverse_post_order(m, f);
        self.create_idom(m, f);
        self.create_dominance_frontier(m, f);
        self.create_dom_tree_succ(m, f);
        self.create_dom_dfs_order(m, f);
    }

    fn create_reverse_post_order(&mut self, m: &Module, f: ValueId) {
        let mut visited = IndexSet::new();
        self.dfs(m, m.entry_block(f), &mut visited);
    }

    fn dfs(&mut self, m: &Module, bb: ValueId, visited: &mut IndexSet<ValueId>) {
        visited.insert(bb);
        for &succ in m.block_succs(bb) {
            if !visited.contains(&succ) {
                self.dfs(m, succ, visited);
            }
        }
        self.post_order.insert(bb, self.post_order.len());
        self.post_order_vec.push(bb);
    }

    /// Two-finger walk up the idom chains to the common ancestor
    fn intersect(&self, mut b1: ValueId, mut b2: ValueId) -> ValueId {
        while b1 != b2 {
            while self.post_order[&b1] < self.post_order[&b2] {
                b1 = self.idom[&b1].expect("intersect walked past the entry");
            }
            while self.post_order[&b2] < self.post_order[&b1] {
                b2 = self.idom[&b2].expect("intersect walked past the entry");
            }
        }
        b1
    }

    fn create_idom(&mut self, m: &Module, f: ValueId) {
        let entry = m.entry_block(f);
        self.idom.insert(entry, Some(entry));
        let order: Vec<ValueId> = self.post_order_vec.iter().rev().copied().collect();
        let mut changed = true;
        while changed {
            changed = false;
            for &bb in &order {
                if bb == entry {
                    continue;
                }
                let preds: Vec<ValueId> = m
                    .block_preds(bb)
                    .iter()
                    .copied()
                    .filter(|p| self.idom[p].is_some())
                    .collect();
                let Some(&first) = preds.first() else {
                    continue;
                };
                let mut new_idom = first;
                for &pred in &preds[1..] {
                    new_idom = self.intersect(pred, new_idom);
                }
                if self.idom[&bb] != Some(new_idom) {
                    self.idom.insert(bb, Some(new_idom));
                    changed = true;
                }
            }
        }
    }

    fn create_dominance_frontier(&mut self, m: &Module, f: ValueId) {
        for &bb in m.function_blocks(f) {
            if m.block_preds(bb).len() < 2 {
                continue;
            }
            let Some(bb_idom) = self.idom(bb) else {
                continue;
            };
            for &pred in m.block_preds(bb) {
                if self.idom(pred).is_none() {
                    continue;
                }
                let mut runner = pred;
                while runner != bb_idom {
                    self.dom_frontier[&runner].insert(bb);
                    runner = self.idom(runner).expect("frontier walk left reachable blocks");
                }
            }
        }
    }

    fn create_dom_tree_succ(&mut self, m: &Module, f: ValueId) {
        for &bb in m.function_blocks(f) {
            if let Some(d) = self.idom(bb) {
                if d != bb {
                    self.dom_tree_succs[&d].insert(bb);
                }
            }
        }
    }

    fn create_dom_dfs_order(&mut self, m: &Module, f: ValueId) {
        let mut order = 0;
        self.dfs_intervals(m.entry_block(f), &mut order);
    }

    fn dfs_intervals(&mut self, bb: ValueId, order: &mut u32) {
        *order += 1;
        self.tree_l.insert(bb, *order);
        let children: Vec<ValueId> = self.dom_tree_succs[&bb].iter().copied().collect();
        for child in children {
            self.dfs_intervals(child, order);
        }
        self.tree_r.insert(bb, *order);
    }

    // ---- reports -------------------------------------------------------

    fn block_label(&self, m: &Module, bb: ValueId, counter: usize) -> String {
        let name = m.name_of(bb);
        if name.is_empty() {
            format!("bb{}", counter)
        } else {
            name.to_string()
        }
    }

    /// Human-readable immediate-dominator table
    pub fn print_idom(&self, m: &Module, f: ValueId) -> String {
        let mut out = format!("Immediate dominance of function {}:\n", m.name_of(f));
        for (i, &bb) in m.function_blocks(f).iter().enumerate() {
            let idom_text = match self.idom(bb) {
                Some(d) => {
                    let pos = m.function_blocks(f).iter().position(|&b| b == d).unwrap();
                    self.block_label(m, d, pos)
                }
                None => "null".to_string(),
            };
            let _ = writeln!(out, "{}: {}", self.block_label(m, bb, i), idom_text);
        }
        out
    }

    /// Human-readable dominance-frontier table
    pub fn print_dominance_frontier(&self, m: &Module, f: ValueId) -> String {
        let mut out = format!("Dominance frontier of function {}:\n", m.name_of(f));
        let blocks = m.function_blocks(f);
        for (i, &bb) in blocks.iter().enumerate() {
            let df = self.dominance_frontier(bb);
            let text = if df.is_empty() {
                "null".to_string()
            } else {
                df.iter()
                    .map(|&d| {
                        let pos = blocks.iter().position(|&b| b == d).unwrap();
                        self.block_label(m, d, pos)
                    })
                    .collect::<Vec<_>>()
                    .join(", ")
            };
            let _ = writeln!(out, "{}: {}", self.block_label(m, bb, i), text);
        }
        out
    }

    /// Graphviz source for the CFG of `f`
    pub fn cfg_dot(m: &Module, f: ValueId) -> String {
        let mut digraph = String::from("digraph G {\n");
        let mut has_edges = false;
        for &bb in m.function_blocks(f) {
            for &succ in m.block_succs(bb) {
                has_edges = true;
                let _ = writeln!(digraph, "\t{} -> {};", m.name_of(bb), m.name_of(succ));
            }
        }
        if !has_edges {
            if let Some(&bb) = m.function_blocks(f).first() {
                let _ = writeln!(digraph, "\t{};", m.name_of(bb));
            }
        }
        digraph.push_str("}\n");
        digraph
    }

    /// Graphviz source for the dominator tree of `f`
    pub fn dom_tree_dot(&self, m: &Module, f: ValueId) -> String {
        let mut digraph = String::from("digraph G {\n");
        let mut has_edges = false;
        for &bb in m.function_blocks(f) {
            if let Some(d) = self.idom(bb) {
                if d != bb {
                    has_edges = true;
                    let _ = writeln!(digraph, "\t{} -> {};", m.name_of(d), m.name_of(bb));
                }
            }
        }
        if !has_edges {
            if let Some(&bb) = m.function_blocks(f).first() {
                let _ = writeln!(digraph, "\t{};", m.name_of(bb));
            }
        }
        digraph.push_str("}\n");
        digraph
    }
}

impl Pass for Dominators {
    fn name(&self) -> &'static str {
        "dominators"
    }

    fn run(&mut self, module: &mut Module) -> bool {
        for f in module.functions().to_vec() {
            if module.is_declaration(f) {
                continue;
            }
            self.run_on_func(module, f);
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instruction::Opcode;

    /// entry -> {then, else} -> join, plus an unreachable block
    fn diamond() -> (Module, ValueId, [ValueId; 5]) {
        let mut m = Module::new();
        let i32_ty = m.types.int32_type();
        let fn_ty = m.types.function_type(i32_ty, vec![]);
        let f = m.create_function("f", fn_ty);
        let entry = m.create_block(f, "entry");
        let then_bb = m.create_block(f, "then");
        let else_bb = m.create_block(f, "else");
        let join = m.create_block(f, "join");
        let orphan = m.create_block(f, "orphan");
        let void = m.types.void_type();
        let cond = m.const_bool(true);
        let br = m.new_instruction(Opcode::Br, void, &[cond, then_bb, else_bb], entry);
        m.append_instruction(entry, br);
        for bb in [then_bb, else_bb] {
            let b = m.new_instruction(Opcode::Br, void, &[join], bb);
            m.append_instruction(bb, b);
        }
        let zero = m.const_int(0);
        let ret = m.new_instruction(Opcode::Ret, void, &[zero], join);
        m.append_instruction(join, ret);
        let orphan_br = m.new_instruction(Opcode::Br, void, &[join], orphan);
        m.append_instruction(orphan, orphan_br);
        m.reset_cfg(f);
        // reset_cfg links orphan -> join as well; drop it so the block is
        // truly unreachable with a dangling edge removed
        m.unlink_blocks(orphan, join);
        (m, f, [entry, then_bb, else_bb, join, orphan])
    }

    #[test]
    fn test_idom_of_diamond() {
        let (m, f, [entry, then_bb, else_bb, join, orphan]) = diamond();
        let mut dom = Dominators::new();
        dom.run_on_func(&m, f);
        assert_eq!(dom.idom(entry), Some(entry));
        assert_eq!(dom.idom(then_bb), Some(entry));
        assert_eq!(dom.idom(else_bb), Some(entry));
        assert_eq!(dom.idom(join), Some(entry));
        assert_eq!(dom.idom(orphan), None);
    }

    #[test]
    fn test_dominance_frontier_of_diamond() {
        let (m, f, [entry, then_bb, else_bb, join, _]) = diamond();
        let mut dom = Dominators::new();
        dom.run_on_func(&m, f);
        assert!(dom.dominance_frontier(then_bb).contains(&join));
        assert!(dom.dominance_frontier(else_bb).contains(&join));
        assert!(dom.dominance_frontier(entry).is_empty());
        assert!(dom.dominance_frontier(join).is_empty());
    }

    #[test]
    fn test_interval_dominance_query() {
        let (m, f, [entry, then_bb, else_bb, join, orphan]) = diamond();
        let mut dom = Dominators::new();
        dom.run_on_func(&m, f);
        assert!(dom.dominates(entry, join));
        assert!(dom.dominates(entry, then_bb));
        assert!(dom.dominates(join, join));
        assert!(!dom.dominates(then_bb, join));
        assert!(!dom.dominates(else_bb, then_bb));
        assert!(!dom.dominates(entry, orphan));
    }

    #[test]
    fn test_dom_tree_successors() {
        let (m, f, [entry, then_bb, else_bb, join, _]) = diamond();
        let mut dom = Dominators::new();
        dom.run_on_func(&m, f);
        let succs = dom.dom_tree_successors(entry);
        assert!(succs.contains(&then_bb));
        assert!(succs.contains(&else_bb));
        assert!(succs.contains(&join));
    }

    #[test]
    fn test_reports_render() {
        let (m, f, _) = diamond();
        let mut dom = Dominators::new();
        dom.run_on_func(&m, f);
        let idom_text = dom.print_idom(&m, f);
        assert!(idom_text.contains("join: entry"));
        assert!(idom_text.contains("orphan: null"));
        let df_text = dom.print_dominance_frontier(&m, f);
        assert!(df_text.contains("then: join"));
        let dot = Dominators::cfg_dot(&m, f);
        assert!(dot.contains("entry -> then;"));
    }

    #[test]
    fn test_loop_idom() {
        // entry -> cond; cond -> {body, exit}; body -> cond
        let mut m = Module::new();
        let i32_ty = m.types.int32_type();
        let fn_ty = m.types.function_type(i32_ty, vec![]);
        let f = m.create_function("f", fn_ty);
        let entry = m.create_block(f, "entry");
        let cond = m.create_block(f, "cond");
        let body = m.create_block(f, "body");
        let exit = m.create_block(f, "exit");
        let void = m.types.void_type();
        let c = m.const_bool(true);
        let b0 = m.new_instruction(Opcode::Br, void, &[cond], entry);
        m.append_instruction(entry, b0);
        let b1 = m.new_instruction(Opcode::Br, void, &[c, body, exit], cond);
        m.append_instruction(cond, b1);
        let b2 = m.new_instruction(Opcode::Br, void, &[cond], body);
        m.append_instruction(body, b2);
        let zero = m.const_int(0);
        let r = m.new_instruction(Opcode::Ret, void, &[zero], exit);
        m.append_instruction(exit, r);
        m.reset_cfg(f);

        let mut dom = Dominators::new();
        dom.run_on_func(&m, f);
        assert_eq!(dom.idom(cond), Some(entry));
        assert_eq!(dom.idom(body), Some(cond));
        assert_eq!(dom.idom(exit), Some(cond));
        // the loop header is its own frontier
        assert!(dom.dominance_frontier(body).contains(&cond));
        assert!(dom.dominance_frontier(cond).contains(&cond));
    }
}
