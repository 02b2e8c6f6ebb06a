//! Analysis and transformation passes
//!
//! The driver order is fixed: Mem2Reg (which computes dominators) runs
//! first, then function inlining, then constant propagation and dead-code
//! elimination alternate until nothing changes, then a global sweep drops
//! unused functions and globals.

pub mod const_propagation;
pub mod dead_code;
pub mod dominators;
pub mod func_info;
pub mod inline;
pub mod mem2reg;

pub use const_propagation::ConstPropagation;
pub use dead_code::DeadCode;
pub use dominators::Dominators;
pub use func_info::FuncInfo;
pub use inline::FunctionInline;
pub use mem2reg::Mem2Reg;

use crate::module::Module;

/// A pass over a whole module
pub trait Pass {
    fn name(&self) -> &'static str;

    /// Run over the module; returns whether the IR changed
    fn run(&mut self, module: &mut Module) -> bool;
}

/// Drives registered passes in order
pub struct PassManager {
    passes: Vec<Box<dyn Pass>>,
}

impl PassManager {
    pub fn new() -> Self {
        PassManager { passes: Vec::new() }
    }

    pub fn register(&mut self, pass: Box<dyn Pass>) {
        self.passes.push(pass);
    }

    /// One round over every registered pass
    pub fn run(&mut self, module: &mut Module) -> bool {
        let mut changed = false;
        for pass in &mut self.passes {
            let pass_changed = pass.run(module);
            log::debug!(
                "pass {} {}",
                pass.name(),
                if pass_changed { "changed the module" } else { "made no change" }
            );
            changed |= pass_changed;
        }
        changed
    }

    /// The standard optimization pipeline
    pub fn optimize(module: &mut Module) {
        Mem2Reg::new().run(module);
        FunctionInline::new().run(module);
        loop {
            let mut changed = false;
            changed |= ConstPropagation::new().run(module);
            changed |= DeadCode::new().run(module);
            if !changed {
                break;
            }
        }
        DeadCode::new().sweep_globally(module);
    }
}

impl Default for PassManager {
    fn default() -> Self {
        Self::new()
    }
}
