//! AST → IR lowering
//!
//! Walks a [`cminusf_ast::Program`] and populates a [`Module`]. Variables
//! live in stack slots until Mem2Reg promotes them; every indexed access
//! is guarded by a runtime negative-index check.

use cminusf_ast::{
    AddOp, AdditiveExpression, Call, CompoundStmt, Declaration, Expression, Factor,
    FunDeclaration, IterationStmt, MulOp, Num, Program, RelOp, ReturnStmt, SelectionStmt,
    SimpleExpression, Statement, Term, TypeSpec, Var, VarDeclaration,
};
use indexmap::IndexMap;

use crate::builder::IrBuilder;
use crate::error::{IrError, Result};
use crate::instruction::{CmpOp, Opcode};
use crate::module::Module;
use crate::types::TypeId;
use crate::value::ValueId;

/// Lexical name → value scope stack
///
/// Variable names resolve to addresses (allocas or globals); function
/// names resolve to the function value itself.
#[derive(Debug)]
pub struct Scope {
    layers: Vec<IndexMap<String, ValueId>>,
}

impl Default for Scope {
    fn default() -> Self {
        Self::new()
    }
}

impl Scope {
    pub fn new() -> Self {
        Scope {
            layers: vec![IndexMap::new()],
        }
    }

    pub fn enter(&mut self) {
        self.layers.push(IndexMap::new());
    }

    pub fn exit(&mut self) {
        self.layers.pop();
    }

    pub fn in_global(&self) -> bool {
        self.layers.len() == 1
    }

    pub fn push(&mut self, name: impl Into<String>, value: ValueId) {
        self.layers
            .last_mut()
            .expect("scope stack is never empty")
            .insert(name.into(), value);
    }

    pub fn find(&self, name: &str) -> Option<ValueId> {
        self.layers
            .iter()
            .rev()
            .find_map(|layer| layer.get(name).copied())
    }
}

pub struct IrGenerator {
    module: Module,
    scope: Scope,
    current_function: Option<ValueId>,
    insert_block: Option<ValueId>,
    /// Set by assignment lowering before visiting the target variable;
    /// cleared by the variable visit that consumes it
    require_lvalue: bool,
    if_count: u32,
    while_count: u32,
    idx_count: u32,
}

impl IrGenerator {
    pub fn new() -> Self {
        let mut module = Module::new();
        let mut scope = Scope::new();

        // Runtime ABI, declared in every module
        let i32_ty = module.types.int32_type();
        let float_ty = module.types.float_type();
        let void_ty = module.types.void_type();
        let input_ty = module.types.function_type(i32_ty, vec![]);
        let output_ty = module.types.function_type(void_ty, vec![i32_ty]);
        let output_float_ty = module.types.function_type(void_ty, vec![float_ty]);
        let trap_ty = module.types.function_type(void_ty, vec![]);
        for (name, ty) in [
            ("input", input_ty),
            ("output", output_ty),
            ("outputFloat", output_float_ty),
            ("neg_idx_except", trap_ty),
        ] {
            let f = module.create_function(name, ty);
            scope.push(name, f);
        }

        IrGenerator {
            module,
            scope,
            current_function: None,
            insert_block: None,
            require_lvalue: false,
            if_count: 0,
            while_count: 0,
            idx_count: 0,
        }
    }

    /// Lower a whole program, consuming the generator
    pub fn generate(mut self, program: &Program) -> Result<Module> {
        for decl in &program.declarations {
            match decl {
                Declaration::Var(var) => {
                    self.gen_var_declaration(var)?;
                }
                Declaration::Fun(fun) => {
                    self.gen_function(fun)?;
                }
            }
        }
        Ok(self.module)
    }

    fn builder(&mut self) -> IrBuilder<'_> {
        let block = self.insert_block.expect("no insertion point");
        IrBuilder::new(&mut self.module, block)
    }

    fn scalar_type(&self, spec: TypeSpec) -> TypeId {
        match spec {
            TypeSpec::Int => self.module.types.int32_type(),
            TypeSpec::Float => self.module.types.float_type(),
            TypeSpec::Void => self.module.types.void_type(),
        }
    }

    // ---- declarations -------------------------------------------------

    fn gen_var_declaration(&mut self, node: &VarDeclaration) -> Result<ValueId> {
        if node.id.is_empty() {
            log::error!("variable declaration with an empty name");
            return Err(IrError::EmptyVariableName);
        }
        assert!(
            node.type_spec != TypeSpec::Void,
            "void variable declarations cannot come out of the parser"
        );
        let elem_ty = self.scalar_type(node.type_spec);

        let slot = if let Some(len) = node.array_len {
            if len < 0 {
                log::error!("array '{}' declared with negative length {}", node.id, len);
                return Err(IrError::InvalidArrayLength {
                    id: node.id.clone(),
                    len,
                });
            }
            let array_ty = self.module.types.array_type(elem_ty, len as u32);
            if self.scope.in_global() {
                let init = self.module.const_zero(array_ty);
                self.module.create_global(node.id.clone(), array_ty, false, init)
            } else {
                self.builder().create_alloca(array_ty)
            }
        } else if self.scope.in_global() {
            let init = self.module.const_zero(elem_ty);
            self.module.create_global(node.id.clone(), elem_ty, false, init)
        } else {
            let slot = self.builder().create_alloca(elem_ty);
            let zero = if node.type_spec == TypeSpec::Int {
                self.module.const_int(0)
            } else {
                self.module.const_fp(0.0)
            };
            self.builder().create_store(zero, slot);
            slot
        };

        self.scope.push(node.id.clone(), slot);
        Ok(slot)
    }

    fn gen_function(&mut self, node: &FunDeclaration) -> Result<()> {
        let ret_ty = self.scalar_type(node.type_spec);
        let param_types: Vec<TypeId> = node
            .params
            .iter()
            .map(|p| {
                let elem = self.scalar_type(p.type_spec);
                if p.is_array {
                    self.module.types.pointer_type(elem)
                } else {
                    elem
                }
            })
            .collect();
        let fn_ty = self.module.types.function_type(ret_ty, param_types);
        let func = self.module.create_function(node.id.clone(), fn_ty);
        self.scope.push(node.id.clone(), func);
        self.current_function = Some(func);

        self.if_count = 0;
        self.while_count = 0;
        self.idx_count = 0;

        let entry = self.module.create_block(func, "entry");
        self.insert_block = Some(entry);
        self.scope.enter();

        // Spill each formal into a stack slot; the name resolves to the slot
        let args = self.module.function_args(func).to_vec();
        for (arg, param) in args.iter().zip(&node.params) {
            self.module.set_name(*arg, param.id.clone());
            let slot_ty = self.module.ty_of(*arg);
            let slot = self.builder().create_alloca(slot_ty);
            self.builder().create_store(*arg, slot);
            self.scope.push(param.id.clone(), slot);
        }

        self.gen_compound(&node.body)?;

        let tail = self.insert_block.expect("function body left no block");
        if !self.module.is_terminated(tail) {
            if self.module.types.is_void(ret_ty) {
                self.builder().create_void_ret();
            } else if self.module.types.is_int32(ret_ty) {
                let zero = self.module.const_int(0);
                self.builder().create_ret(zero);
            } else {
                let zero = self.module.const_fp(0.0);
                self.builder().create_ret(zero);
            }
        }

        self.scope.exit();
        Ok(())
    }

    // ---- statements ---------------------------------------------------

    fn gen_compound(&mut self, node: &CompoundStmt) -> Result<()> {
        self.scope.enter();
        for decl in &node.local_declarations {
            self.gen_var_declaration(decl)?;
        }
        for stmt in &node.statement_list {
            self.gen_statement(stmt)?;
            let bb = self.insert_block.expect("statement left no block");
            // anything after a terminator is unreachable; stop lowering
            if self.module.is_terminated(bb) {
                break;
            }
        }
        self.scope.exit();
        Ok(())
    }

    fn gen_statement(&mut self, node: &Statement) -> Result<()> {
        match node {
            Statement::Expression(stmt) => {
                if let Some(expr) = &stmt.expression {
                    self.gen_expression(expr)?;
                }
                Ok(())
            }
            Statement::Compound(stmt) => self.gen_compound(stmt),
            Statement::Selection(stmt) => self.gen_selection(stmt),
            Statement::Iteration(stmt) => self.gen_iteration(stmt),
            Statement::Return(stmt) => self.gen_return(stmt),
        }
    }

    /// Coerce a condition value to i1 with a non-zero test
    fn coerce_condition(&mut self, cond: ValueId) -> ValueId {
        let ty = self.module.ty_of(cond);
        if self.module.types.is_int32(ty) {
            let zero = self.module.const_int(0);
            self.builder().create_icmp(CmpOp::Ne, cond, zero)
        } else if self.module.types.is_float(ty) {
            let zero = self.module.const_fp(0.0);
            self.builder().create_fcmp(CmpOp::Ne, cond, zero)
        } else {
            cond
        }
    }

    fn gen_selection(&mut self, node: &SelectionStmt) -> Result<()> {
        let cond = self.gen_expression(&node.condition)?;
        let cond = self.coerce_condition(cond);

        let func = self.current_function.expect("statement outside a function");
        let n = self.if_count;
        self.if_count += 1;
        let then_bb = self.module.create_block(func, format!("if.then.{}", n));
        let else_bb = node
            .else_statement
            .as_ref()
            .map(|_| self.module.create_block(func, format!("if.else.{}", n)));
        let cont_bb = self.module.create_block(func, format!("if.cont.{}", n));

        self.builder()
            .create_cond_br(cond, then_bb, else_bb.unwrap_or(cont_bb));

        self.insert_block = Some(then_bb);
        self.gen_statement(&node.if_statement)?;
        let tail = self.insert_block.unwrap();
        if !self.module.is_terminated(tail) {
            self.builder().create_br(cont_bb);
        }

        if let Some(else_stmt) = &node.else_statement {
            self.insert_block = Some(else_bb.unwrap());
            self.gen_statement(else_stmt)?;
            let tail = self.insert_block.unwrap();
            if !self.module.is_terminated(tail) {
                self.builder().create_br(cont_bb);
            }
        }

        self.insert_block = Some(cont_bb);
        Ok(())
    }

    fn gen_iteration(&mut self, node: &IterationStmt) -> Result<()> {
        let func = self.current_function.expect("statement outside a function");
        let n = self.while_count;
        self.while_count += 1;
        let cond_bb = self.module.create_block(func, format!("while.cond.{}", n));
        let body_bb = self.module.create_block(func, format!("while.body.{}", n));
        let exit_bb = self.module.create_block(func, format!("while.exit.{}", n));

        let pre = self.insert_block.unwrap();
        if !self.module.is_terminated(pre) {
            self.builder().create_br(cond_bb);
        }

        self.insert_block = Some(cond_bb);
        let cond = self.gen_expression(&node.condition)?;
        let cond = self.coerce_condition(cond);
        self.builder().create_cond_br(cond, body_bb, exit_bb);

        self.insert_block = Some(body_bb);
        self.gen_statement(&node.body)?;
        let tail = self.insert_block.unwrap();
        if !self.module.is_terminated(tail) {
            self.builder().create_br(cond_bb);
        }

        self.insert_block = Some(exit_bb);
        Ok(())
    }

    fn gen_return(&mut self, node: &ReturnStmt) -> Result<()> {
        match &node.expression {
            None => {
                self.builder().create_void_ret();
            }
            Some(expr) => {
                let func = self.current_function.expect("return outside a function");
                let ret_ty = self.module.function_return_type(func);
                let value = self.gen_expression(expr)?;
                let value = self.convert_to(value, ret_ty);
                self.builder().create_ret(value);
            }
        }
        Ok(())
    }

    // ---- expressions --------------------------------------------------

    /// Insert the conversions that carry `value` to `target`: i1 → i32
    /// via zext, i32 ↔ float via sitofp/fptosi
    fn convert_to(&mut self, value: ValueId, target: TypeId) -> ValueId {
        let have = self.module.ty_of(value);
        if have == target {
            return value;
        }
        if self.module.types.is_int1(have) {
            let widened = self.builder().create_zext(value);
            return self.convert_to(widened, target);
        }
        if self.module.types.is_int32(have) && self.module.types.is_float(target) {
            return self.builder().create_sitofp(value);
        }
        if self.module.types.is_float(have) && self.module.types.is_int32(target) {
            return self.builder().create_fptosi(value);
        }
        value
    }

    /// Promote a binary-operator pair: i1 operands widen to i32, then a
    /// mixed i32/float pair promotes to float. Returns the operands and
    /// whether the operation is integral.
    fn promote(&mut self, mut lhs: ValueId, mut rhs: ValueId) -> (ValueId, ValueId, bool) {
        let i32_ty = self.module.types.int32_type();
        if self.module.types.is_int1(self.module.ty_of(lhs)) {
            lhs = self.builder().create_zext(lhs);
        }
        if self.module.types.is_int1(self.module.ty_of(rhs)) {
            rhs = self.builder().create_zext(rhs);
        }
        let l_ty = self.module.ty_of(lhs);
        let r_ty = self.module.ty_of(rhs);
        if l_ty == r_ty {
            return (lhs, rhs, l_ty == i32_ty);
        }
        if self.module.types.is_int32(l_ty) {
            lhs = self.builder().create_sitofp(lhs);
        } else {
            rhs = self.builder().create_sitofp(rhs);
        }
        (lhs, rhs, false)
    }

    fn gen_expression(&mut self, node: &Expression) -> Result<ValueId> {
        match node {
            Expression::Assign(assign) => {
                let value = self.gen_expression(&assign.value)?;
                self.require_lvalue = true;
                let addr = self.gen_var(&assign.var)?;
                self.require_lvalue = false;
                let slot_ty = self
                    .module
                    .types
                    .pointee(self.module.ty_of(addr))
                    .expect("assignment target is an address");
                let value = self.convert_to(value, slot_ty);
                self.builder().create_store(value, addr);
                Ok(value)
            }
            Expression::Simple(simple) => self.gen_simple(simple),
        }
    }

    fn gen_simple(&mut self, node: &SimpleExpression) -> Result<ValueId> {
        let lhs = self.gen_additive(&node.lhs)?;
        let Some((op, rhs_node)) = &node.rhs else {
            return Ok(lhs);
        };
        let rhs = self.gen_additive(rhs_node)?;
        let (lhs, rhs, is_int) = self.promote(lhs, rhs);
        let cmp_op = match op {
            RelOp::Eq => CmpOp::Eq,
            RelOp::Ne => CmpOp::Ne,
            RelOp::Lt => CmpOp::Lt,
            RelOp::Le => CmpOp::Le,
            RelOp::Gt => CmpOp::Gt,
            RelOp::Ge => CmpOp::Ge,
        };
        Ok(if is_int {
            self.builder().create_icmp(cmp_op, lhs, rhs)
        } else {
            self.builder().create_fcmp(cmp_op, lhs, rhs)
        })
    }

    fn gen_additive(&mut self, node: &AdditiveExpression) -> Result<ValueId> {
        let Some((lhs_node, op)) = &node.lhs else {
            return self.gen_term(&node.term);
        };
        let lhs = self.gen_additive(lhs_node)?;
        let rhs = self.gen_term(&node.term)?;
        let (lhs, rhs, is_int) = self.promote(lhs, rhs);
        Ok(match (op, is_int) {
            (AddOp::Add, true) => self.builder().create_iadd(lhs, rhs),
            (AddOp::Add, false) => self.builder().create_fadd(lhs, rhs),
            (AddOp::Sub, true) => self.builder().create_isub(lhs, rhs),
            (AddOp::Sub, false) => self.builder().create_fsub(lhs, rhs),
        })
    }

    fn gen_term(&mut self, node: &Term) -> Result<ValueId> {
        let Some((lhs_node, op)) = &node.lhs else {
            return self.gen_factor(&node.factor);
        };
        let lhs = self.gen_term(lhs_node)?;
        let rhs = self.gen_factor(&node.factor)?;
        let (lhs, rhs, is_int) = self.promote(lhs, rhs);
        Ok(match (op, is_int) {
            (MulOp::Mul, true) => self.builder().create_imul(lhs, rhs),
            (MulOp::Mul, false) => self.builder().create_fmul(lhs, rhs),
            (MulOp::Div, true) => self.builder().create_isdiv(lhs, rhs),
            (MulOp::Div, false) => self.builder().create_fdiv(lhs, rhs),
        })
    }

    fn gen_factor(&mut self, node: &Factor) -> Result<ValueId> {
        match node {
            Factor::Expression(expr) => self.gen_expression(expr),
            Factor::Var(var) => self.gen_var(var),
            Factor::Call(call) => self.gen_call(call),
            Factor::Num(Num::Int(v)) => Ok(self.module.const_int(*v)),
            Factor::Num(Num::Float(v)) => Ok(self.module.const_fp(*v)),
        }
    }

    /// The type a named slot holds: the allocated type for allocas, the
    /// pointee for globals
    fn slot_element_type(&self, base: ValueId) -> Option<TypeId> {
        match self.module.value(base).opcode() {
            Some(Opcode::Alloca(ty)) => Some(ty),
            _ if self.module.value(base).is_global() => {
                self.module.types.pointee(self.module.ty_of(base))
            }
            _ => None,
        }
    }

    fn gen_var(&mut self, node: &Var) -> Result<ValueId> {
        let Some(base) = self.scope.find(&node.id) else {
            log::error!("reference to undefined variable '{}'", node.id);
            self.require_lvalue = false;
            return Err(IrError::UndefinedVariable(node.id.clone()));
        };
        let Some(slot_ty) = self.slot_element_type(base) else {
            log::error!("'{}' does not name a variable", node.id);
            self.require_lvalue = false;
            return Err(IrError::UndefinedVariable(node.id.clone()));
        };

        let Some(index) = &node.index else {
            // plain reference
            if self.require_lvalue {
                self.require_lvalue = false;
                return Ok(base);
            }
            if self.module.types.is_array(slot_ty) {
                // array name decays to a pointer to its first element
                let zero = self.module.const_int(0);
                return Ok(self.builder().create_gep(base, &[zero, zero]));
            }
            return Ok(self.builder().create_load(base));
        };

        // indexed reference: lower the index as an rvalue
        let orig_lvalue = self.require_lvalue;
        self.require_lvalue = false;
        let idx = self.gen_expression(index)?;
        self.require_lvalue = orig_lvalue;
        let idx_ty = self.module.ty_of(idx);
        let idx = if self.module.types.is_float(idx_ty) {
            self.builder().create_fptosi(idx)
        } else if self.module.types.is_int1(idx_ty) {
            self.builder().create_zext(idx)
        } else {
            idx
        };

        // negative-index guard, always emitted
        let func = self.current_function.expect("expression outside a function");
        let n = self.idx_count;
        self.idx_count += 1;
        let ok_bb = self.module.create_block(func, format!("idx.ok.{}", n));
        let neg_bb = self.module.create_block(func, format!("idx.neg.{}", n));
        let zero = self.module.const_int(0);
        let in_range = self.builder().create_icmp(CmpOp::Ge, idx, zero);
        self.builder().create_cond_br(in_range, ok_bb, neg_bb);

        self.insert_block = Some(neg_bb);
        match self.scope.find("neg_idx_except") {
            Some(trap) => {
                self.builder().create_call(trap, &[]);
            }
            None => log::error!("runtime function 'neg_idx_except' not in scope"),
        }
        self.builder().create_br(ok_bb);

        self.insert_block = Some(ok_bb);
        let addr = if self.module.types.is_pointer(slot_ty) {
            // decayed array parameter: load the base pointer first
            let base_ptr = self.builder().create_load(base);
            self.builder().create_gep(base_ptr, &[idx])
        } else if self.module.types.is_array(slot_ty) {
            let zero = self.module.const_int(0);
            self.builder().create_gep(base, &[zero, idx])
        } else {
            log::error!("'{}' is not indexable", node.id);
            self.require_lvalue = false;
            return Err(IrError::UndefinedVariable(node.id.clone()));
        };

        if self.require_lvalue {
            self.require_lvalue = false;
            Ok(addr)
        } else {
            Ok(self.builder().create_load(addr))
        }
    }

    fn gen_call(&mut self, node: &Call) -> Result<ValueId> {
        let Some(callee) = self.scope.find(&node.id) else {
            log::error!("call to undefined function '{}'", node.id);
            return Err(IrError::UndefinedFunction(node.id.clone()));
        };
        if !self.module.value(callee).is_function() {
            log::error!("'{}' is not a function", node.id);
            return Err(IrError::NotCallable(node.id.clone()));
        }
        let params = self
            .module
            .types
            .function_params(self.module.ty_of(callee))
            .unwrap()
            .to_vec();
        if params.len() != node.args.len() {
            log::error!(
                "call to '{}' with {} arguments, expected {}",
                node.id,
                node.args.len(),
                params.len()
            );
            return Err(IrError::ArityMismatch {
                callee: node.id.clone(),
                expected: params.len(),
                found: node.args.len(),
            });
        }
        let mut args = Vec::with_capacity(node.args.len());
        for (arg_node, &param_ty) in node.args.iter().zip(&params) {
            let v = self.gen_expression(arg_node)?;
            args.push(self.convert_to(v, param_ty));
        }
        Ok(self.builder().create_call(callee, &args))
    }
}

impl Default for IrGenerator {
    fn default() -> Self {
        Self::new()
    }
}

/// Lower a program into a fresh module
pub fn lower_program(program: &Program) -> Result<Module> {
    IrGenerator::new().generate(program)
}
