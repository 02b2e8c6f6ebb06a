//! Insertion-cursor instruction builder
//!
//! The builder appends to one block at a time and fixes result types per
//! opcode. Typing violations are programmer faults and assert; the
//! front-end is expected to have coerced operands already.

use crate::instruction::{CmpOp, Opcode};
use crate::module::Module;
use crate::types::TypeId;
use crate::value::ValueId;

pub struct IrBuilder<'m> {
    pub module: &'m mut Module,
    block: ValueId,
}

impl<'m> IrBuilder<'m> {
    pub fn new(module: &'m mut Module, block: ValueId) -> Self {
        IrBuilder { module, block }
    }

    pub fn insert_block(&self) -> ValueId {
        self.block
    }

    pub fn set_insert_point(&mut self, block: ValueId) {
        self.block = block;
    }

    fn push(&mut self, opcode: Opcode, ty: TypeId, operands: &[ValueId]) -> ValueId {
        assert!(
            !self.module.is_terminated(self.block),
            "inserting into a terminated block"
        );
        let inst = self.module.new_instruction(opcode, ty, operands, self.block);
        self.module.append_instruction(self.block, inst);
        inst
    }

    // ---- memory -------------------------------------------------------

    /// Reserve a stack slot of `ty`; the result is `ty*`
    pub fn create_alloca(&mut self, ty: TypeId) -> ValueId {
        let ptr_ty = self.module.types.pointer_type(ty);
        self.push(Opcode::Alloca(ty), ptr_ty, &[])
    }

    pub fn create_load(&mut self, ptr: ValueId) -> ValueId {
        let elem = self
            .module
            .types
            .pointee(self.module.ty_of(ptr))
            .expect("load requires a pointer operand");
        self.push(Opcode::Load, elem, &[ptr])
    }

    pub fn create_store(&mut self, value: ValueId, ptr: ValueId) -> ValueId {
        let elem = self
            .module
            .types
            .pointee(self.module.ty_of(ptr))
            .expect("store requires a pointer operand");
        assert_eq!(
            elem,
            self.module.ty_of(value),
            "store value must match the slot's element type"
        );
        let void = self.module.types.void_type();
        self.push(Opcode::Store, void, &[value, ptr])
    }

    /// `gep base, [i]` for `T*` bases, `gep base, [0, i]` for `[n x T]*`
    pub fn create_gep(&mut self, base: ValueId, indices: &[ValueId]) -> ValueId {
        let base_ty = self.module.ty_of(base);
        let pointee = self
            .module
            .types
            .pointee(base_ty)
            .expect("gep requires a pointer base");
        let result_ty = match indices.len() {
            1 => self.module.types.pointer_type(pointee),
            2 => {
                let elem = self
                    .module
                    .types
                    .array_element(pointee)
                    .expect("two-index gep requires an array base");
                self.module.types.pointer_type(elem)
            }
            n => panic!("gep supports one or two indices, got {}", n),
        };
        let mut operands = Vec::with_capacity(1 + indices.len());
        operands.push(base);
        operands.extend_from_slice(indices);
        self.push(Opcode::Gep, result_ty, &operands)
    }

    // ---- arithmetic ---------------------------------------------------

    fn int_binary(&mut self, opcode: Opcode, lhs: ValueId, rhs: ValueId) -> ValueId {
        let i32_ty = self.module.types.int32_type();
        assert!(
            self.module.ty_of(lhs) == i32_ty && self.module.ty_of(rhs) == i32_ty,
            "integer arithmetic requires i32 operands"
        );
        self.push(opcode, i32_ty, &[lhs, rhs])
    }

    fn float_binary(&mut self, opcode: Opcode, lhs: ValueId, rhs: ValueId) -> ValueId {
        let float_ty = self.module.types.float_type();
        assert!(
            self.module.ty_of(lhs) == float_ty && self.module.ty_of(rhs) == float_ty,
            "float arithmetic requires float operands"
        );
        self.push(opcode, float_ty, &[lhs, rhs])
    }

    pub fn create_iadd(&mut self, lhs: ValueId, rhs: ValueId) -> ValueId {
        self.int_binary(Opcode::Add, lhs, rhs)
    }

    pub fn create_isub(&mut self, lhs: ValueId, rhs: ValueId) -> ValueId {
        self.int_binary(Opcode::Sub, lhs, rhs)
    }

    pub fn create_imul(&mut self, lhs: ValueId, rhs: ValueId) -> ValueId {
        self.int_binary(Opcode::Mul, lhs, rhs)
    }

    pub fn create_isdiv(&mut self, lhs: ValueId, rhs: ValueId) -> ValueId {
        self.int_binary(Opcode::SDiv, lhs, rhs)
    }

    pub fn create_fadd(&mut self, lhs: ValueId, rhs: ValueId) -> ValueId {
        self.float_binary(Opcode::FAdd, lhs, rhs)
    }

    pub fn create_fsub(&mut self, lhs: ValueId, rhs: ValueId) -> ValueId {
        self.float_binary(Opcode::FSub, lhs, rhs)
    }

    pub fn create_fmul(&mut self, lhs: ValueId, rhs: ValueId) -> ValueId {
        self.float_binary(Opcode::FMul, lhs, rhs)
    }

    pub fn create_fdiv(&mut self, lhs: ValueId, rhs: ValueId) -> ValueId {
        self.float_binary(Opcode::FDiv, lhs, rhs)
    }

    // ---- comparisons --------------------------------------------------

    pub fn create_icmp(&mut self, op: CmpOp, lhs: ValueId, rhs: ValueId) -> ValueId {
        let i32_ty = self.module.types.int32_type();
        assert!(
            self.module.ty_of(lhs) == i32_ty && self.module.ty_of(rhs) == i32_ty,
            "icmp requires i32 operands"
        );
        let i1_ty = self.module.types.int1_type();
        self.push(Opcode::ICmp(op), i1_ty, &[lhs, rhs])
    }

    pub fn create_fcmp(&mut self, op: CmpOp, lhs: ValueId, rhs: ValueId) -> ValueId {
        let float_ty = self.module.types.float_type();
        assert!(
            self.module.ty_of(lhs) == float_ty && self.module.ty_of(rhs) == float_ty,
            "fcmp requires float operands"
        );
        let i1_ty = self.module.types.int1_type();
        self.push(Opcode::FCmp(op), i1_ty, &[lhs, rhs])
    }

    // ---- conversions --------------------------------------------------

    pub fn create_sitofp(&mut self, value: ValueId) -> ValueId {
        assert!(
            self.module.types.is_int32(self.module.ty_of(value)),
            "sitofp converts i32"
        );
        let float_ty = self.module.types.float_type();
        self.push(Opcode::SiToFp, float_ty, &[value])
    }

    pub fn create_fptosi(&mut self, value: ValueId) -> ValueId {
        assert!(
            self.module.types.is_float(self.module.ty_of(value)),
            "fptosi converts float"
        );
        let i32_ty = self.module.types.int32_type();
        self.push(Opcode::FpToSi, i32_ty, &[value])
    }

    pub fn create_zext(&mut self, value: ValueId) -> ValueId {
        assert!(
            self.module.types.is_int1(self.module.ty_of(value)),
            "zext widens i1"
        );
        let i32_ty = self.module.types.int32_type();
        self.push(Opcode::Zext, i32_ty, &[value])
    }

    // ---- control flow -------------------------------------------------

    pub fn create_br(&mut self, target: ValueId) -> ValueId {
        let void = self.module.types.void_type();
        let inst = self.push(Opcode::Br, void, &[target]);
        self.module.link_blocks(self.block, target);
        inst
    }

    pub fn create_cond_br(
        &mut self,
        cond: ValueId,
        then_bb: ValueId,
        else_bb: ValueId,
    ) -> ValueId {
        assert!(
            self.module.types.is_int1(self.module.ty_of(cond)),
            "conditional branch requires an i1 condition"
        );
        let void = self.module.types.void_type();
        let inst = self.push(Opcode::Br, void, &[cond, then_bb, else_bb]);
        self.module.link_blocks(self.block, then_bb);
        self.module.link_blocks(self.block, else_bb);
        inst
    }

    pub fn create_void_ret(&mut self) -> ValueId {
        let f = self.module.block_parent(self.block);
        assert!(
            self.module.types.is_void(self.module.function_return_type(f)),
            "ret void in a non-void function"
        );
        let void = self.module.types.void_type();
        self.push(Opcode::Ret, void, &[])
    }

    pub fn create_ret(&mut self, value: ValueId) -> ValueId {
        let f = self.module.block_parent(self.block);
        assert_eq!(
            self.module.function_return_type(f),
            self.module.ty_of(value),
            "return value must match the function return type"
        );
        let void = self.module.types.void_type();
        self.push(Opcode::Ret, void, &[value])
    }

    pub fn create_call(&mut self, callee: ValueId, args: &[ValueId]) -> ValueId {
        let fn_ty = self.module.ty_of(callee);
        let params = self
            .module
            .types
            .function_params(fn_ty)
            .expect("call target must have function type")
            .to_vec();
        assert_eq!(params.len(), args.len(), "call argument count mismatch");
        for (param, &arg) in params.iter().zip(args) {
            assert_eq!(
                *param,
                self.module.ty_of(arg),
                "call argument type mismatch"
            );
        }
        let ret = self.module.types.function_return(fn_ty).unwrap();
        let mut operands = Vec::with_capacity(1 + args.len());
        operands.push(callee);
        operands.extend_from_slice(args);
        self.push(Opcode::Call, ret, &operands)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scaffold() -> (Module, ValueId, ValueId) {
        let mut m = Module::new();
        let i32_ty = m.types.int32_type();
        let fn_ty = m.types.function_type(i32_ty, vec![]);
        let f = m.create_function("f", fn_ty);
        let bb = m.create_block(f, "entry");
        (m, f, bb)
    }

    #[test]
    fn test_arithmetic_result_types() {
        let (mut m, _f, bb) = scaffold();
        let a = m.const_int(1);
        let b = m.const_int(2);
        let mut builder = IrBuilder::new(&mut m, bb);
        let add = builder.create_iadd(a, b);
        assert!(m.types.is_int32(m.ty_of(add)));
    }

    #[test]
    fn test_comparison_yields_i1() {
        let (mut m, _f, bb) = scaffold();
        let a = m.const_int(1);
        let b = m.const_int(2);
        let mut builder = IrBuilder::new(&mut m, bb);
        let cmp = builder.create_icmp(CmpOp::Lt, a, b);
        assert!(m.types.is_int1(m.ty_of(cmp)));
    }

    #[test]
    fn test_gep_forms() {
        let (mut m, _f, bb) = scaffold();
        let i32_ty = m.types.int32_type();
        let arr_ty = m.types.array_type(i32_ty, 10);
        let i32_ptr = m.types.pointer_type(i32_ty);
        let zero = m.const_int(0);
        let mut builder = IrBuilder::new(&mut m, bb);
        let slot = builder.create_alloca(arr_ty);
        let elem_ptr = builder.create_gep(slot, &[zero, zero]);
        // pointer base, one index
        let ptr_slot = builder.create_alloca(i32_ptr);
        let base = builder.create_load(ptr_slot);
        let one_idx = builder.create_gep(base, &[zero]);

        assert_eq!(m.ty_of(elem_ptr), i32_ptr);
        assert_eq!(m.ty_of(one_idx), i32_ptr);
    }

    #[test]
    fn test_branches_maintain_cfg_edges() {
        let (mut m, f, bb) = scaffold();
        let then_bb = m.create_block(f, "then");
        let else_bb = m.create_block(f, "else");
        let cond = m.const_bool(true);
        let mut builder = IrBuilder::new(&mut m, bb);
        builder.create_cond_br(cond, then_bb, else_bb);
        assert_eq!(m.block_succs(bb), &[then_bb, else_bb]);
        assert_eq!(m.block_preds(then_bb), &[bb]);
    }

    #[test]
    #[should_panic(expected = "terminated block")]
    fn test_insert_after_terminator_panics() {
        let (mut m, _f, bb) = scaffold();
        let v = m.const_int(0);
        let mut builder = IrBuilder::new(&mut m, bb);
        builder.create_ret(v);
        let _ = builder.create_iadd(v, v);
    }

    #[test]
    #[should_panic(expected = "argument count")]
    fn test_call_arity_checked() {
        let (mut m, _f, bb) = scaffold();
        let i32_ty = m.types.int32_type();
        let callee_ty = m.types.function_type(i32_ty, vec![i32_ty]);
        let callee = m.create_function("g", callee_ty);
        let mut builder = IrBuilder::new(&mut m, bb);
        builder.create_call(callee, &[]);
    }
}
