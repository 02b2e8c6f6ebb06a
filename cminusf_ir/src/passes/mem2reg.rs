//! Mem2Reg: promote stack slots to SSA values
//!
//! A slot is promotable iff it is an alloca of scalar type and every use
//! is a direct load or a store into it. φ nodes are inserted at the
//! iterated dominance frontier of the stores; a dominator-tree walk then
//! renames loads and stores into SSA values, leaving the dead allocas for
//! dead-code elimination to collect.

use indexmap::{IndexMap, IndexSet};

use crate::instruction::Opcode;
use crate::module::Module;
use crate::passes::dominators::Dominators;
use crate::passes::Pass;
use crate::value::ValueId;

#[derive(Debug, Default)]
pub struct Mem2Reg {
    dominators: Dominators,
    /// alloca → stack of reaching definitions along the current DFS path
    var_val_stack: IndexMap<ValueId, Vec<ValueId>>,
    /// φ → the alloca it merges
    phi_lval: IndexMap<ValueId, ValueId>,
    promoted: usize,
}

/// Direct-alloca-only promotability: an alloca whose every use is a
/// `load` of it or a `store` whose *pointer* operand is it. Array slots
/// are always address-taken through geps, so they never qualify.
fn is_promotable(m: &Module, v: ValueId) -> bool {
    if !matches!(m.value(v).opcode(), Some(Opcode::Alloca(_))) {
        return false;
    }
    m.value(v).uses.iter().all(|u| {
        match m.value(u.user).opcode() {
            Some(Opcode::Load) => u.index == 0,
            Some(Opcode::Store) => u.index == 1,
            _ => false,
        }
    })
}

impl Mem2Reg {
    pub fn new() -> Self {
        Mem2Reg::default()
    }

    fn generate_phi(&mut self, m: &mut Module, f: ValueId) {
        // variables stored in more than one place, and where
        let mut def_blocks: IndexMap<ValueId, IndexSet<ValueId>> = IndexMap::new();
        for &bb in m.function_blocks(f) {
            for &inst in m.block_instructions(bb) {
                if m.value(inst).opcode() != Some(Opcode::Store) {
                    continue;
                }
                let lval = m.value(inst).operands()[1];
                if is_promotable(m, lval) {
                    def_blocks.entry(lval).or_default().insert(bb);
                }
            }
        }

        // place φs on the iterated dominance frontier of each def site
        let mut has_phi: IndexSet<(ValueId, ValueId)> = IndexSet::new();
        for (var, defs) in &def_blocks {
            let elem_ty = match m.value(*var).opcode() {
                Some(Opcode::Alloca(t)) => t,
                _ => unreachable!(),
            };
            let mut work_list: Vec<ValueId> = defs.iter().copied().collect();
            let mut i = 0;
            while i < work_list.len() {
                let bb = work_list[i];
                i += 1;
                for df_bb in self.dominators.dominance_frontier(bb).clone() {
                    if has_phi.insert((df_bb, *var)) {
                        let phi = m.new_instruction(Opcode::Phi, elem_ty, &[], df_bb);
                        m.prepend_instruction(df_bb, phi);
                        self.phi_lval.insert(phi, *var);
                        work_list.push(df_bb);
                    }
                }
            }
        }
    }

    fn rename(&mut self, m: &mut Module, bb: ValueId) {
        let mut wait_delete = Vec::new();

        // φs at the head are the newest definitions of their variables
        for inst in m.block_instructions(bb).to_vec() {
            if m.value(inst).opcode() == Some(Opcode::Phi) {
                if let Some(&var) = self.phi_lval.get(&inst) {
                    self.var_val_stack.entry(var).or_default().push(inst);
                }
            }
        }

        for inst in m.block_instructions(bb).to_vec() {
            match m.value(inst).opcode() {
                Some(Opcode::Load) => {
                    let lval = m.value(inst).operands()[0];
                    if is_promotable(m, lval) {
                        if let Some(top) = self.var_val_stack.get(&lval).and_then(|s| s.last()) {
                            m.replace_all_uses_with(inst, *top);
                            wait_delete.push(inst);
                        }
                    }
                }
                Some(Opcode::Store) => {
                    let rval = m.value(inst).operands()[0];
                    let lval = m.value(inst).operands()[1];
                    if is_promotable(m, lval) {
                        self.var_val_stack.entry(lval).or_default().push(rval);
                        wait_delete.push(inst);
                    }
                }
                _ => {}
            }
        }

        // complete the φs of CFG successors with this block's definitions
        for succ in m.block_succs(bb).to_vec() {
            for inst in m.block_instructions(succ).to_vec() {
                if m.value(inst).opcode() != Some(Opcode::Phi) {
                    continue;
                }
                let Some(&var) = self.phi_lval.get(&inst) else {
                    continue;
                };
                if let Some(&top) = self.var_val_stack.get(&var).and_then(|s| s.last()) {
                    m.push_operand(inst, top);
                    m.push_operand(inst, bb);
                }
                // a variable with no definition on this path leaves the
                // pair missing: the use-before-init hole is the source
                // program's contract
            }
        }

        for child in self.dominators.dom_tree_successors(bb).clone() {
            self.rename(m, child);
        }

        // unwind this block's definitions
        for inst in m.block_instructions(bb).to_vec() {
            match m.value(inst).opcode() {
                Some(Opcode::Store) => {
                    let lval = m.value(inst).operands()[1];
                    if is_promotable(m, lval) {
                        self.var_val_stack.entry(lval).or_default().pop();
                    }
                }
                Some(Opcode::Phi) => {
                    if let Some(&var) = self.phi_lval.get(&inst) {
                        self.var_val_stack.entry(var).or_default().pop();
                    }
                }
                _ => {}
            }
        }

        self.promoted += wait_delete.len();
        for inst in wait_delete {
            m.erase_instruction(bb, inst);
        }
    }
}

impl Pass for Mem2Reg {
    fn name(&self) -> &'static str {
        "mem2reg"
    }

    fn run(&mut self, module: &mut Module) -> bool {
        self.dominators = Dominators::new();
        self.dominators.run(module);
        self.promoted = 0;
        for f in module.functions().to_vec() {
            if module.is_declaration(f) {
                continue;
            }
            self.var_val_stack.clear();
            self.phi_lval.clear();
            self.generate_phi(module, f);
            let entry = module.entry_block(f);
            self.rename(module, entry);
        }
        log::debug!("mem2reg rewrote {} loads and stores", self.promoted);
        self.promoted > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cminusf_ast::*;
    use crate::generator::lower_program;

    fn int_fun(id: &str, params: Vec<Param>, body: CompoundStmt) -> Declaration {
        Declaration::Fun(FunDeclaration {
            type_spec: TypeSpec::Int,
            id: id.to_string(),
            params,
            body,
        })
    }

    fn lower_and_promote(program: &Program) -> Module {
        let mut m = lower_program(program).expect("lowering failed");
        Mem2Reg::new().run(&mut m);
        m
    }

    fn function_named(m: &Module, name: &str) -> ValueId {
        m.functions()
            .iter()
            .copied()
            .find(|&f| m.name_of(f) == name)
            .unwrap()
    }

    fn count_opcode(m: &Module, f: ValueId, pred: impl Fn(Opcode) -> bool) -> usize {
        m.function_blocks(f)
            .iter()
            .flat_map(|&bb| m.block_instructions(bb))
            .filter(|&&inst| m.value(inst).opcode().map(&pred).unwrap_or(false))
            .count()
    }

    #[test]
    fn test_straight_line_promotion_removes_memory_traffic() {
        // int f() { int x; x = 3; return x + 2; }
        let program = Program {
            declarations: vec![int_fun(
                "f",
                vec![],
                CompoundStmt::new(
                    vec![VarDeclaration::scalar(TypeSpec::Int, "x")],
                    vec![
                        Statement::expr(Expression::assign(
                            Var {
                                id: "x".into(),
                                index: None,
                            },
                            Expression::num_int(3),
                        )),
                        Statement::ret(Some(Expression::additive(
                            Expression::var("x"),
                            AddOp::Add,
                            Expression::num_int(2),
                        ))),
                    ],
                ),
            )],
        };
        let m = lower_and_promote(&program);
        let f = function_named(&m, "f");
        assert_eq!(count_opcode(&m, f, |op| op == Opcode::Load), 0);
        assert_eq!(count_opcode(&m, f, |op| op == Opcode::Store), 0);
        // the alloca survives until DCE
        assert!(count_opcode(&m, f, |op| op.is_alloca()) > 0);
    }

    #[test]
    fn test_if_merge_inserts_phi() {
        // int h(int c) { int x; if (c) x = 1; else x = 2; return x; }
        let assign = |v: i32| {
            Statement::expr(Expression::assign(
                Var {
                    id: "x".into(),
                    index: None,
                },
                Expression::num_int(v),
            ))
        };
        let program = Program {
            declarations: vec![int_fun(
                "h",
                vec![Param {
                    type_spec: TypeSpec::Int,
                    id: "c".into(),
                    is_array: false,
                }],
                CompoundStmt::new(
                    vec![VarDeclaration::scalar(TypeSpec::Int, "x")],
                    vec![
                        Statement::Selection(SelectionStmt {
                            condition: Expression::var("c"),
                            if_statement: Box::new(assign(1)),
                            else_statement: Some(Box::new(assign(2))),
                        }),
                        Statement::ret(Some(Expression::var("x"))),
                    ],
                ),
            )],
        };
        let mut m = lower_and_promote(&program);
        let f = function_named(&m, "h");
        assert!(count_opcode(&m, f, |op| op == Opcode::Phi) >= 1);

        m.set_print_name();
        let text = m.print();
        // the merge block φ selects between the two stored constants
        assert!(text.contains("phi i32 [ 1, %if.then.0 ], [ 2, %if.else.0 ]"));
        assert_eq!(count_opcode(&m, f, |op| op == Opcode::Load), 0);
    }

    #[test]
    fn test_array_slots_are_not_promoted() {
        // int f() { int a[4]; a[0] = 1; return a[0]; }
        let program = Program {
            declarations: vec![int_fun(
                "f",
                vec![],
                CompoundStmt::new(
                    vec![VarDeclaration::array(TypeSpec::Int, "a", 4)],
                    vec![
                        Statement::expr(Expression::assign(
                            Var {
                                id: "a".into(),
                                index: Some(Box::new(Expression::num_int(0))),
                            },
                            Expression::num_int(1),
                        )),
                        Statement::ret(Some(Expression::indexed(
                            "a",
                            Expression::num_int(0),
                        ))),
                    ],
                ),
            )],
        };
        let m = lower_and_promote(&program);
        let f = function_named(&m, "f");
        // stores through geps stay
        assert!(count_opcode(&m, f, |op| op == Opcode::Store) >= 1);
        assert!(count_opcode(&m, f, |op| op == Opcode::Load) >= 1);
    }

    #[test]
    fn test_phi_arity_matches_preds() {
        // while loop: the loop-carried variable gets a φ in the header
        // int f() { int i; i = 0; while (i < 3) i = i + 1; return i; }
        let assign_i = |e: Expression| {
            Statement::expr(Expression::assign(
                Var {
                    id: "i".into(),
                    index: None,
                },
                e,
            ))
        };
        let program = Program {
            declarations: vec![int_fun(
                "f",
                vec![],
                CompoundStmt::new(
                    vec![VarDeclaration::scalar(TypeSpec::Int, "i")],
                    vec![
                        assign_i(Expression::num_int(0)),
                        Statement::Iteration(IterationStmt {
                            condition: Expression::compare(
                                Expression::var("i"),
                                RelOp::Lt,
                                Expression::num_int(3),
                            ),
                            body: Box::new(assign_i(Expression::additive(
                                Expression::var("i"),
                                AddOp::Add,
                                Expression::num_int(1),
                            ))),
                        }),
                        Statement::ret(Some(Expression::var("i"))),
                    ],
                ),
            )],
        };
        let m = lower_and_promote(&program);
        let f = function_named(&m, "f");
        for &bb in m.function_blocks(f) {
            for &inst in m.block_instructions(bb) {
                if m.value(inst).opcode() == Some(Opcode::Phi) {
                    let pairs = m.value(inst).operands().len() / 2;
                    assert_eq!(pairs, m.block_preds(bb).len());
                    // every pair names an actual predecessor
                    for pair in m.value(inst).operands().chunks(2) {
                        assert!(m.block_preds(bb).contains(&pair[1]));
                    }
                }
            }
        }
    }
}
