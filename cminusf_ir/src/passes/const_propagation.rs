//! Constant propagation and folding
//!
//! Instructions whose operands are all literal constants are replaced by
//! the folded constant: two's-complement i32 arithmetic, IEEE f32
//! arithmetic, comparisons, and the scalar conversions. A division by a
//! literal zero is never folded; the instruction stays for the back-end
//! to deal with. A second sweep rewrites conditional branches with
//! constant conditions into unconditional ones and recursively deletes
//! the blocks that become unreachable, patching φs along the way.

use crate::instruction::{CmpOp, Opcode};
use crate::module::Module;
use crate::passes::Pass;
use crate::value::ValueId;

#[derive(Debug, Default)]
pub struct ConstPropagation {
    folded: usize,
    pruned_blocks: usize,
}

fn apply_cmp<T: PartialOrd + PartialEq>(op: CmpOp, a: T, b: T) -> bool {
    match op {
        CmpOp::Eq => a == b,
        CmpOp::Ne => a != b,
        CmpOp::Lt => a < b,
        CmpOp::Le => a <= b,
        CmpOp::Gt => a > b,
        CmpOp::Ge => a >= b,
    }
}

impl ConstPropagation {
    pub fn new() -> Self {
        ConstPropagation::default()
    }

    /// Folded replacement for `inst`, or `None` when it cannot (or must
    /// not) be folded
    fn fold(&self, m: &mut Module, inst: ValueId) -> Option<ValueId> {
        let opcode = m.value(inst).opcode()?;
        let operands = m.value(inst).operands().to_vec();
        match opcode {
            Opcode::Add | Opcode::Sub | Opcode::Mul | Opcode::SDiv => {
                let a = m.value(operands[0]).as_const_int()?;
                let b = m.value(operands[1]).as_const_int()?;
                let value = match opcode {
                    Opcode::Add => a.wrapping_add(b),
                    Opcode::Sub => a.wrapping_sub(b),
                    Opcode::Mul => a.wrapping_mul(b),
                    Opcode::SDiv => {
                        if b == 0 {
                            // division by a literal zero stays in the IR
                            return None;
                        }
                        a.wrapping_div(b)
                    }
                    _ => unreachable!(),
                };
                Some(m.const_int(value))
            }
            Opcode::FAdd | Opcode::FSub | Opcode::FMul | Opcode::FDiv => {
                let a = m.value(operands[0]).as_const_fp()?;
                let b = m.value(operands[1]).as_const_fp()?;
                let value = match opcode {
                    Opcode::FAdd => a + b,
                    Opcode::FSub => a - b,
                    Opcode::FMul => a * b,
                    Opcode::FDiv => {
                        if b == 0.0 {
                            return None;
                        }
                        a / b
                    }
                    _ => unreachable!(),
                };
                Some(m.const_fp(value))
            }
            Opcode::ICmp(op) => {
                let a = m.value(operands[0]).as_const_int()?;
                let b = m.value(operands[1]).as_const_int()?;
                Some(m.const_bool(apply_cmp(op, a, b)))
            }
            Opcode::FCmp(op) => {
                let a = m.value(operands[0]).as_const_fp()?;
                let b = m.value(operands[1]).as_const_fp()?;
                Some(m.const_bool(apply_cmp(op, a, b)))
            }
            Opcode::SiToFp => {
                let a = m.value(operands[0]).as_const_int()?;
                Some(m.const_fp(a as f32))
            }
            Opcode::FpToSi => {
                let a = m.value(operands[0]).as_const_fp()?;
                Some(m.const_int(a as i32))
            }
            Opcode::Zext => {
                let a = m.value(operands[0]).as_const_int()?;
                Some(m.const_int(a))
            }
            _ => None,
        }
    }

    fn fold_function(&mut self, m: &mut Module, f: ValueId) -> bool {
        let mut changed = false;
        for bb in m.function_blocks(f).to_vec() {
            let mut wait_delete = Vec::new();
            for inst in m.block_instructions(bb).to_vec() {
                if let Some(constant) = self.fold(m, inst) {
                    m.replace_all_uses_with(inst, constant);
                    wait_delete.push(inst);
                }
            }
            changed |= !wait_delete.is_empty();
            self.folded += wait_delete.len();
            for inst in wait_delete {
                m.erase_instruction(bb, inst);
            }
        }
        changed
    }

    /// Rewrite conditional branches on constant i1 conditions; returns
    /// the blocks whose dead incoming edge may have orphaned them
    fn rewrite_branches(&mut self, m: &mut Module, f: ValueId) -> Vec<ValueId> {
        let mut orphan_candidates = Vec::new();
        for bb in m.function_blocks(f).to_vec() {
            let Some(term) = m.terminator(bb) else {
                continue;
            };
            if m.value(term).opcode() != Some(Opcode::Br) {
                continue;
            }
            let operands = m.value(term).operands().to_vec();
            if operands.len() != 3 {
                continue;
            }
            let Some(cond) = m.value(operands[0]).as_const_int() else {
                continue;
            };
            let (taken, dead) = if cond != 0 {
                (operands[1], operands[2])
            } else {
                (operands[2], operands[1])
            };
            m.erase_instruction(bb, term);
            m.unlink_blocks(bb, taken);
            m.unlink_blocks(bb, dead);
            if taken != dead {
                m.prune_phis_for_removed_pred(dead, bb);
            }
            let void = m.types.void_type();
            let br = m.new_instruction(Opcode::Br, void, &[taken], bb);
            m.append_instruction(bb, br);
            m.link_blocks(bb, taken);
            orphan_candidates.push(dead);
        }
        orphan_candidates
    }

    /// Delete `bb` if it has become unreachable, then recurse into its
    /// successors, patching their φs
    fn clear_blocks_recursively(&mut self, m: &mut Module, f: ValueId, bb: ValueId) {
        if !m.function_blocks(f).contains(&bb) {
            return;
        }
        if !m.block_preds(bb).is_empty() || bb == m.entry_block(f) {
            return;
        }
        let succs = m.remove_block(f, bb);
        self.pruned_blocks += 1;
        for succ in succs {
            m.prune_phis_for_removed_pred(succ, bb);
            self.clear_blocks_recursively(m, f, succ);
        }
    }
}

impl Pass for ConstPropagation {
    fn name(&self) -> &'static str {
        "const-propagation"
    }

    fn run(&mut self, module: &mut Module) -> bool {
        let (folded_before, pruned_before) = (self.folded, self.pruned_blocks);
        for f in module.functions().to_vec() {
            if module.is_declaration(f) {
                continue;
            }
            self.fold_function(module, f);
            let candidates = self.rewrite_branches(module, f);
            for bb in candidates {
                self.clear_blocks_recursively(module, f, bb);
            }
        }
        let changed =
            self.folded > folded_before || self.pruned_blocks > pruned_before;
        if changed {
            log::debug!(
                "const propagation folded {} instructions, pruned {} blocks",
                self.folded - folded_before,
                self.pruned_blocks - pruned_before
            );
        }
        changed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cminusf_ast::*;
    use crate::generator::lower_program;
    use crate::passes::mem2reg::Mem2Reg;

    fn int_fun(id: &str, body: CompoundStmt) -> Declaration {
        Declaration::Fun(FunDeclaration {
            type_spec: TypeSpec::Int,
            id: id.to_string(),
            params: vec![],
            body,
        })
    }

    fn function_named(m: &Module, name: &str) -> ValueId {
        m.functions()
            .iter()
            .copied()
            .find(|&f| m.name_of(f) == name)
            .unwrap()
    }

    #[test]
    fn test_integer_folding() {
        // int f() { return 2 + 3 * 4; }
        let program = Program {
            declarations: vec![int_fun(
                "f",
                CompoundStmt::new(
                    vec![],
                    vec![Statement::ret(Some(Expression::additive(
                        Expression::num_int(2),
                        AddOp::Add,
                        Expression::multiplicative(
                            Expression::num_int(3),
                            MulOp::Mul,
                            Expression::num_int(4),
                        ),
                    )))],
                ),
            )],
        };
        let mut m = lower_program(&program).unwrap();
        assert!(ConstPropagation::new().run(&mut m));
        m.set_print_name();
        assert!(m.print().contains("ret i32 14"));
    }

    #[test]
    fn test_float_folding_and_conversion() {
        // int f() { return 1.5 + 2.5; }  (converted to i32 on return)
        let program = Program {
            declarations: vec![int_fun(
                "f",
                CompoundStmt::new(
                    vec![],
                    vec![Statement::ret(Some(Expression::additive(
                        Expression::num_float(1.5),
                        AddOp::Add,
                        Expression::num_float(2.5),
                    )))],
                ),
            )],
        };
        let mut m = lower_program(&program).unwrap();
        ConstPropagation::new().run(&mut m);
        m.set_print_name();
        assert!(m.print().contains("ret i32 4"));
    }

    #[test]
    fn test_division_by_literal_zero_is_not_folded() {
        // int f() { return 1 / 0; }
        let program = Program {
            declarations: vec![int_fun(
                "f",
                CompoundStmt::new(
                    vec![],
                    vec![Statement::ret(Some(Expression::multiplicative(
                        Expression::num_int(1),
                        MulOp::Div,
                        Expression::num_int(0),
                    )))],
                ),
            )],
        };
        let mut m = lower_program(&program).unwrap();
        ConstPropagation::new().run(&mut m);
        m.set_print_name();
        assert!(m.print().contains("sdiv i32 1, 0"));
    }

    #[test]
    fn test_constant_branch_prunes_unreachable_arm() {
        // int p() { if (1) return 1; else return 2; }
        let program = Program {
            declarations: vec![int_fun(
                "p",
                CompoundStmt::new(
                    vec![],
                    vec![Statement::Selection(SelectionStmt {
                        condition: Expression::num_int(1),
                        if_statement: Box::new(Statement::ret(Some(Expression::num_int(1)))),
                        else_statement: Some(Box::new(Statement::ret(Some(
                            Expression::num_int(2),
                        )))),
                    })],
                ),
            )],
        };
        let mut m = lower_program(&program).unwrap();
        ConstPropagation::new().run(&mut m);
        let p = function_named(&m, "p");
        let names: Vec<&str> = m
            .function_blocks(p)
            .iter()
            .map(|&bb| m.name_of(bb))
            .collect();
        assert!(names.contains(&"if.then.0"));
        assert!(!names.contains(&"if.else.0"));
        m.set_print_name();
        let text = m.print();
        assert!(text.contains("ret i32 1"));
        assert!(!text.contains("ret i32 2"));
    }

    #[test]
    fn test_phi_patched_when_pred_removed() {
        // int h() { int x; if (0) x = 1; else x = 2; return x; }
        // After mem2reg the merge φ has two incomings; pruning the
        // constant-false arm collapses it onto 2.
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
                CompoundStmt::new(
                    vec![VarDeclaration::scalar(TypeSpec::Int, "x")],
                    vec![
                        Statement::Selection(SelectionStmt {
                            condition: Expression::num_int(0),
                            if_statement: Box::new(assign(1)),
                            else_statement: Some(Box::new(assign(2))),
                        }),
                        Statement::ret(Some(Expression::var("x"))),
                    ],
                ),
            )],
        };
        let mut m = lower_program(&program).unwrap();
        Mem2Reg::new().run(&mut m);
        ConstPropagation::new().run(&mut m);
        m.set_print_name();
        let text = m.print();
        assert!(text.contains("ret i32 2"));
        assert!(!text.contains("phi"));
    }

    #[test]
    fn test_idempotence() {
        let program = Program {
            declarations: vec![int_fun(
                "f",
                CompoundStmt::new(
                    vec![],
                    vec![Statement::ret(Some(Expression::additive(
                        Expression::num_int(20),
                        AddOp::Add,
                        Expression::num_int(22),
                    )))],
                ),
            )],
        };
        let mut m = lower_program(&program).unwrap();
        assert!(ConstPropagation::new().run(&mut m));
        let once = {
            m.set_print_name();
            m.print()
        };
        assert!(!ConstPropagation::new().run(&mut m));
        m.set_print_name();
        assert_eq!(once, m.print());
    }
}
