//! Conservative function purity analysis
//!
//! A function is pure iff it has a body, never stores, only ever appears
//! as a call target, and calls nothing impure. Call-graph cycles are
//! treated as impure wholesale.

use indexmap::{IndexMap, IndexSet};

use crate::instruction::Opcode;
use crate::module::Module;
use crate::value::ValueId;

#[derive(Debug, Default)]
pub struct FuncInfo {
    pure: IndexMap<ValueId, bool>,
}

impl FuncInfo {
    pub fn new() -> Self {
        FuncInfo::default()
    }

    pub fn is_pure(&self, f: ValueId) -> bool {
        self.pure.get(&f).copied().unwrap_or(false)
    }

    pub fn run(&mut self, m: &Module) {
        self.pure.clear();
        let functions = m.functions().to_vec();

        // direct call edges
        let mut callees: IndexMap<ValueId, IndexSet<ValueId>> = IndexMap::new();
        for &f in &functions {
            let mut out = IndexSet::new();
            for &bb in m.function_blocks(f) {
                for &inst in m.block_instructions(bb) {
                    if m.value(inst).opcode() == Some(Opcode::Call) {
                        out.insert(m.value(inst).operands()[0]);
                    }
                }
            }
            callees.insert(f, out);
        }

        for &f in &functions {
            let local = self.locally_pure(m, f);
            self.pure.insert(f, local);
        }

        // cycles (recursion included) are impure
        for &f in &functions {
            if self.pure[&f] && Self::on_cycle(&callees, f) {
                self.pure.insert(f, false);
            }
        }

        // propagate impurity through call sites
        let mut changed = true;
        while changed {
            changed = false;
            for &f in &functions {
                if !self.pure[&f] {
                    continue;
                }
                let dirty = callees[&f]
                    .iter()
                    .any(|callee| !self.pure.get(callee).copied().unwrap_or(false));
                if dirty {
                    self.pure.insert(f, false);
                    changed = true;
                }
            }
        }
    }

    /// Purity ignoring callees: has a body, no stores, used only as a
    /// call target
    fn locally_pure(&self, m: &Module, f: ValueId) -> bool {
        if m.is_declaration(f) {
            return false;
        }
        for u in &m.value(f).uses {
            let user = m.value(u.user);
            let used_as_callee = user.opcode() == Some(Opcode::Call) && u.index == 0;
            if !used_as_callee {
                return false;
            }
        }
        for &bb in m.function_blocks(f) {
            for &inst in m.block_instructions(bb) {
                if m.value(inst).opcode() == Some(Opcode::Store) {
                    return false;
                }
            }
        }
        true
    }

    fn on_cycle(callees: &IndexMap<ValueId, IndexSet<ValueId>>, f: ValueId) -> bool {
        let mut stack: Vec<ValueId> = callees.get(&f).map(|s| s.iter().copied().collect()).unwrap_or_default();
        let mut visited = IndexSet::new();
        while let Some(g) = stack.pop() {
            if g == f {
                return true;
            }
            if visited.insert(g) {
                if let Some(next) = callees.get(&g) {
                    stack.extend(next.iter().copied());
                }
            }
        }
        false
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

    fn find(m: &Module, name: &str) -> ValueId {
        m.functions()
            .iter()
            .copied()
            .find(|&f| m.name_of(f) == name)
            .unwrap()
    }

    #[test]
    fn test_declarations_are_impure() {
        let m = lower_program(&Program {
            declarations: vec![],
        })
        .unwrap();
        let mut info = FuncInfo::new();
        info.run(&m);
        assert!(!info.is_pure(find(&m, "input")));
        assert!(!info.is_pure(find(&m, "output")));
    }

    #[test]
    fn test_storeless_leaf_is_impure_due_to_param_spill() {
        // parameters are spilled with a store, so even `int f(int x)
        // { return x; }` stores; a zero-argument constant function is
        // the pure canary here
        let program = Program {
            declarations: vec![int_fun(
                "five",
                vec![],
                CompoundStmt::new(vec![], vec![Statement::ret(Some(Expression::num_int(5)))]),
            )],
        };
        let m = lower_program(&program).unwrap();
        let mut info = FuncInfo::new();
        info.run(&m);
        assert!(info.is_pure(find(&m, "five")));
    }

    #[test]
    fn test_recursion_is_impure() {
        // int f() { return f(); }
        let program = Program {
            declarations: vec![int_fun(
                "f",
                vec![],
                CompoundStmt::new(
                    vec![],
                    vec![Statement::ret(Some(Expression::call("f", vec![])))],
                ),
            )],
        };
        let m = lower_program(&program).unwrap();
        let mut info = FuncInfo::new();
        info.run(&m);
        assert!(!info.is_pure(find(&m, "f")));
    }

    #[test]
    fn test_impurity_propagates_to_callers() {
        // int noisy() { output(1); return 0; }  int caller() { return noisy(); }
        let program = Program {
            declarations: vec![
                int_fun(
                    "noisy",
                    vec![],
                    CompoundStmt::new(
                        vec![],
                        vec![
                            Statement::expr(Expression::call(
                                "output",
                                vec![Expression::num_int(1)],
                            )),
                            Statement::ret(Some(Expression::num_int(0))),
                        ],
                    ),
                ),
                int_fun(
                    "caller",
                    vec![],
                    CompoundStmt::new(
                        vec![],
                        vec![Statement::ret(Some(Expression::call("noisy", vec![])))],
                    ),
                ),
            ],
        };
        let m = lower_program(&program).unwrap();
        let mut info = FuncInfo::new();
        info.run(&m);
        assert!(!info.is_pure(find(&m, "noisy")));
        assert!(!info.is_pure(find(&m, "caller")));
    }
}
