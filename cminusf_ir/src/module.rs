//! Module: the top-level IR container
//!
//! The module owns every value transitively: the type pool, the value
//! arena, the hash-consed constant pools, globals and functions. All
//! def/use graph mutations go through the module so that operand vectors
//! and use-lists never disagree.

use std::fmt::Write as _;

use indexmap::IndexMap;

use crate::instruction::Opcode;
use crate::types::{TypeId, TypePool};
use crate::value::{Operands, Use, ValueData, ValueId, ValueKind};

#[derive(Debug, Clone)]
pub struct Module {
    pub types: TypePool,
    values: Vec<ValueData>,
    functions: Vec<ValueId>,
    globals: Vec<ValueId>,
    int_pool: IndexMap<i32, ValueId>,
    bool_pool: IndexMap<bool, ValueId>,
    /// Keyed by raw bits so -0.0 and 0.0 stay distinct constants
    fp_pool: IndexMap<u32, ValueId>,
    zero_pool: IndexMap<TypeId, ValueId>,
}

impl Module {
    pub fn new() -> Self {
        Module {
            types: TypePool::new(),
            values: Vec::new(),
            functions: Vec::new(),
            globals: Vec::new(),
            int_pool: IndexMap::new(),
            bool_pool: IndexMap::new(),
            fp_pool: IndexMap::new(),
            zero_pool: IndexMap::new(),
        }
    }

    // ---- arena access -------------------------------------------------

    pub fn value(&self, id: ValueId) -> &ValueData {
        &self.values[id.index()]
    }

    pub fn value_mut(&mut self, id: ValueId) -> &mut ValueData {
        &mut self.values[id.index()]
    }

    pub fn ty_of(&self, id: ValueId) -> TypeId {
        self.value(id).ty
    }

    pub fn name_of(&self, id: ValueId) -> &str {
        &self.value(id).name
    }

    pub fn set_name(&mut self, id: ValueId, name: impl Into<String>) {
        self.value_mut(id).name = name.into();
    }

    pub fn functions(&self) -> &[ValueId] {
        &self.functions
    }

    pub fn globals(&self) -> &[ValueId] {
        &self.globals
    }

    pub(crate) fn push_function(&mut self, f: ValueId) {
        self.functions.push(f);
    }

    pub(crate) fn retain_functions(&mut self, keep: impl Fn(ValueId) -> bool) {
        self.functions.retain(|&f| keep(f));
    }

    pub(crate) fn retain_globals(&mut self, keep: impl Fn(ValueId) -> bool) {
        self.globals.retain(|&g| keep(g));
    }

    pub fn new_value(&mut self, ty: TypeId, name: impl Into<String>, kind: ValueKind) -> ValueId {
        let id = ValueId::new(self.values.len());
        self.values.push(ValueData {
            ty,
            name: name.into(),
            kind,
            uses: Vec::new(),
        });
        id
    }

    // ---- constants ----------------------------------------------------

    /// i32 constant, uniqued by value
    pub fn const_int(&mut self, value: i32) -> ValueId {
        if let Some(&id) = self.int_pool.get(&value) {
            return id;
        }
        let ty = self.types.int32_type();
        let id = self.new_value(ty, "", ValueKind::ConstantInt { value });
        self.int_pool.insert(value, id);
        id
    }

    /// i1 constant, uniqued by value
    pub fn const_bool(&mut self, value: bool) -> ValueId {
        if let Some(&id) = self.bool_pool.get(&value) {
            return id;
        }
        let ty = self.types.int1_type();
        let id = self.new_value(
            ty,
            "",
            ValueKind::ConstantInt {
                value: value as i32,
            },
        );
        self.bool_pool.insert(value, id);
        id
    }

    /// f32 constant, uniqued by bit pattern
    pub fn const_fp(&mut self, value: f32) -> ValueId {
        let bits = value.to_bits();
        if let Some(&id) = self.fp_pool.get(&bits) {
            return id;
        }
        let ty = self.types.float_type();
        let id = self.new_value(ty, "", ValueKind::ConstantFp { value });
        self.fp_pool.insert(bits, id);
        id
    }

    /// Zero initializer for a scalar or array type, uniqued by type
    pub fn const_zero(&mut self, ty: TypeId) -> ValueId {
        if let Some(&id) = self.zero_pool.get(&ty) {
            return id;
        }
        let id = self.new_value(ty, "", ValueKind::ConstantZero);
        self.zero_pool.insert(ty, id);
        id
    }

    /// Create a global variable of type `ty*`; `init` must be a constant
    /// of exactly `ty`
    pub fn create_global(
        &mut self,
        name: impl Into<String>,
        ty: TypeId,
        is_const: bool,
        init: ValueId,
    ) -> ValueId {
        assert!(
            self.value(init).is_constant() && self.ty_of(init) == ty,
            "global initializer must be a constant of the declared type"
        );
        let ptr_ty = self.types.pointer_type(ty);
        let id = self.new_value(ptr_ty, name, ValueKind::GlobalVariable { is_const, init });
        self.add_use(id, 0, init);
        self.globals.push(id);
        id
    }

    // ---- def/use maintenance ------------------------------------------

    /// Record that `user`'s operand `index` is `value` (reverse edge only)
    pub fn add_use(&mut self, user: ValueId, index: usize, value: ValueId) {
        self.value_mut(value).uses.push(Use { user, index });
    }

    fn remove_use(&mut self, value: ValueId, user: ValueId, index: usize) {
        let uses = &mut self.value_mut(value).uses;
        let before = uses.len();
        uses.retain(|u| !(u.user == user && u.index == index));
        assert!(before > uses.len(), "use edge not found on removal");
    }

    /// Retarget operand `index` of `user` to `new`, updating both use-lists
    pub fn set_operand(&mut self, user: ValueId, index: usize, new: ValueId) {
        let old = match &self.value(user).kind {
            ValueKind::Instruction { operands, .. } => operands[index],
            ValueKind::GlobalVariable { init, .. } => {
                assert_eq!(index, 0, "globals have a single operand");
                *init
            }
            _ => panic!("set_operand on a non-user value"),
        };
        if old == new {
            return;
        }
        self.remove_use(old, user, index);
        match &mut self.value_mut(user).kind {
            ValueKind::Instruction { operands, .. } => operands[index] = new,
            ValueKind::GlobalVariable { init, .. } => *init = new,
            _ => unreachable!(),
        }
        self.add_use(user, index, new);
    }

    /// Remove operand `index` of an instruction, shifting the rest down
    /// and renumbering their use edges
    pub fn remove_operand(&mut self, user: ValueId, index: usize) {
        let (removed, shifted) = match &self.value(user).kind {
            ValueKind::Instruction { operands, .. } => {
                (operands[index], operands[index + 1..].to_vec())
            }
            _ => panic!("remove_operand on a non-instruction"),
        };
        self.remove_use(removed, user, index);
        for (offset, &op) in shifted.iter().enumerate() {
            let old_index = index + 1 + offset;
            for u in &mut self.value_mut(op).uses {
                if u.user == user && u.index == old_index {
                    u.index = old_index - 1;
                    break;
                }
            }
        }
        match &mut self.value_mut(user).kind {
            ValueKind::Instruction { operands, .. } => {
                operands.remove(index);
            }
            _ => unreachable!(),
        }
    }

    /// Append an operand to an instruction (phi pair completion)
    pub fn push_operand(&mut self, user: ValueId, value: ValueId) {
        let index = match &mut self.value_mut(user).kind {
            ValueKind::Instruction { operands, .. } => {
                operands.push(value);
                operands.len() - 1
            }
            _ => panic!("push_operand on a non-instruction"),
        };
        self.add_use(user, index, value);
    }

    /// RAUW: retarget every use of `old` to `new`
    pub fn replace_all_uses_with(&mut self, old: ValueId, new: ValueId) {
        assert_eq!(
            self.ty_of(old),
            self.ty_of(new),
            "replace_all_uses_with requires identical types"
        );
        assert_ne!(old, new, "replacing a value with itself");
        let uses = std::mem::take(&mut self.value_mut(old).uses);
        for u in uses {
            match &mut self.value_mut(u.user).kind {
                ValueKind::Instruction { operands, .. } => operands[u.index] = new,
                ValueKind::GlobalVariable { init, .. } => *init = new,
                _ => panic!("use edge from a non-user value"),
            }
            self.value_mut(new).uses.push(u);
        }
    }

    // ---- instruction creation -----------------------------------------

    /// Create an instruction value without inserting it into a block;
    /// operand use edges are registered immediately
    pub fn new_instruction(
        &mut self,
        opcode: Opcode,
        ty: TypeId,
        operands: &[ValueId],
        parent: ValueId,
    ) -> ValueId {
        let id = self.new_value(
            ty,
            "",
            ValueKind::Instruction {
                parent,
                opcode,
                operands: Operands::from_slice(operands),
            },
        );
        for (i, &op) in operands.iter().enumerate() {
            self.add_use(id, i, op);
        }
        id
    }

    /// Clone `inst` into `into_bb` (appended): same opcode, type and
    /// operand list. Operands still point at the original values; the
    /// caller substitutes them afterwards.
    pub fn clone_instruction(&mut self, inst: ValueId, into_bb: ValueId) -> ValueId {
        let (opcode, operands) = match &self.value(inst).kind {
            ValueKind::Instruction {
                opcode, operands, ..
            } => (*opcode, operands.to_vec()),
            _ => panic!("clone_instruction on a non-instruction"),
        };
        let ty = self.ty_of(inst);
        let clone = self.new_instruction(opcode, ty, &operands, into_bb);
        self.append_instruction(into_bb, clone);
        clone
    }

    // ---- printing ------------------------------------------------------

    /// Assign sequential names to unnamed arguments, blocks and
    /// instruction results, contiguously per function
    pub fn set_print_name(&mut self) {
        for f in self.functions.clone() {
            let mut counter = 0usize;
            let (args, blocks) = match &self.value(f).kind {
                ValueKind::Function { args, blocks } => (args.clone(), blocks.clone()),
                _ => unreachable!(),
            };
            for arg in args {
                if self.name_of(arg).is_empty() {
                    self.set_name(arg, format!("arg{}", counter));
                    counter += 1;
                }
            }
            for bb in blocks {
                if self.name_of(bb).is_empty() {
                    self.set_name(bb, format!("bb{}", counter));
                    counter += 1;
                }
                for inst in self.block_instructions(bb).to_vec() {
                    let opcode = self.value(inst).opcode().unwrap();
                    if opcode.has_result() && self.name_of(inst).is_empty() {
                        self.set_name(inst, format!("op{}", counter));
                        counter += 1;
                    }
                }
            }
        }
    }

    /// Reference spelling for an operand position: literal constants,
    /// `@name` for globals and functions, `%name` otherwise
    fn operand_ref(&self, v: ValueId) -> String {
        let data = self.value(v);
        match &data.kind {
            ValueKind::ConstantInt { value } => format!("{}", value),
            ValueKind::ConstantFp { value } => format!("{:?}", value),
            ValueKind::ConstantZero => "zeroinitializer".to_string(),
            ValueKind::GlobalVariable { .. } | ValueKind::Function { .. } => {
                format!("@{}", data.name)
            }
            _ => format!("%{}", data.name),
        }
    }

    /// Typed reference, e.g. `i32 %op3`
    fn typed_ref(&self, v: ValueId) -> String {
        format!("{} {}", self.types.display(self.ty_of(v)), self.operand_ref(v))
    }

    fn print_instruction(&self, out: &mut String, inst: ValueId) {
        let data = self.value(inst);
        let (opcode, operands) = match &data.kind {
            ValueKind::Instruction {
                opcode, operands, ..
            } => (*opcode, operands.as_slice()),
            _ => unreachable!(),
        };
        out.push_str("  ");
        match opcode {
            Opcode::Alloca(alloc_ty) => {
                let _ = write!(
                    out,
                    "%{} = alloca {}",
                    data.name,
                    self.types.display(alloc_ty)
                );
            }
            Opcode::Load => {
                let _ = write!(
                    out,
                    "%{} = load {}, {}",
                    data.name,
                    self.types.display(self.ty_of(inst)),
                    self.typed_ref(operands[0])
                );
            }
            Opcode::Store => {
                let _ = write!(
                    out,
                    "store {}, {}",
                    self.typed_ref(operands[0]),
                    self.typed_ref(operands[1])
                );
            }
            Opcode::Gep => {
                let base_ty = self.ty_of(operands[0]);
                let pointee = self.types.pointee(base_ty).expect("gep base is a pointer");
                let _ = write!(
                    out,
                    "%{} = getelementptr {}, {}",
                    data.name,
                    self.types.display(pointee),
                    self.typed_ref(operands[0])
                );
                for &idx in &operands[1..] {
                    let _ = write!(out, ", {}", self.typed_ref(idx));
                }
            }
            Opcode::Add
            | Opcode::Sub
            | Opcode::Mul
            | Opcode::SDiv
            | Opcode::FAdd
            | Opcode::FSub
            | Opcode::FMul
            | Opcode::FDiv => {
                let _ = write!(
                    out,
                    "%{} = {} {} {}, {}",
                    data.name,
                    opcode.mnemonic(),
                    self.types.display(self.ty_of(operands[0])),
                    self.operand_ref(operands[0]),
                    self.operand_ref(operands[1])
                );
            }
            Opcode::ICmp(op) => {
                let _ = write!(
                    out,
                    "%{} = icmp {} {} {}, {}",
                    data.name,
                    op.icmp_mnemonic(),
                    self.types.display(self.ty_of(operands[0])),
                    self.operand_ref(operands[0]),
                    self.operand_ref(operands[1])
                );
            }
            Opcode::FCmp(op) => {
                let _ = write!(
                    out,
                    "%{} = fcmp {} {} {}, {}",
                    data.name,
                    op.fcmp_mnemonic(),
                    self.types.display(self.ty_of(operands[0])),
                    self.operand_ref(operands[0]),
                    self.operand_ref(operands[1])
                );
            }
            Opcode::SiToFp | Opcode::FpToSi | Opcode::Zext => {
                let _ = write!(
                    out,
                    "%{} = {} {} to {}",
                    data.name,
                    opcode.mnemonic(),
                    self.typed_ref(operands[0]),
                    self.types.display(self.ty_of(inst))
                );
            }
            Opcode::Phi => {
                let _ = write!(
                    out,
                    "%{} = phi {}",
                    data.name,
                    self.types.display(self.ty_of(inst))
                );
                for (i, pair) in operands.chunks(2).enumerate() {
                    let _ = write!(
                        out,
                        "{} [ {}, {} ]",
                        if i == 0 { " " } else { ", " },
                        self.operand_ref(pair[0]),
                        self.operand_ref(pair[1])
                    );
                }
            }
            Opcode::Br => {
                if operands.len() == 1 {
                    let _ = write!(out, "br label {}", self.operand_ref(operands[0]));
                } else {
                    let _ = write!(
                        out,
                        "br {}, label {}, label {}",
                        self.typed_ref(operands[0]),
                        self.operand_ref(operands[1]),
                        self.operand_ref(operands[2])
                    );
                }
            }
            Opcode::Ret => {
                if operands.is_empty() {
                    out.push_str("ret void");
                } else {
                    let _ = write!(out, "ret {}", self.typed_ref(operands[0]));
                }
            }
            Opcode::Call => {
                let callee = operands[0];
                let ret_ty = self.ty_of(inst);
                if self.types.is_void(ret_ty) {
                    let _ = write!(out, "call void {}(", self.operand_ref(callee));
                } else {
                    let _ = write!(
                        out,
                        "%{} = call {} {}(",
                        data.name,
                        self.types.display(ret_ty),
                        self.operand_ref(callee)
                    );
                }
                for (i, &arg) in operands[1..].iter().enumerate() {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    out.push_str(&self.typed_ref(arg));
                }
                out.push(')');
            }
        }
        out.push('\n');
    }

    /// Render the whole module as LLVM-style text. Call
    /// [`Module::set_print_name`] first so unnamed values have names.
    pub fn print(&self) -> String {
        let mut out = String::new();
        for &g in &self.globals {
            let data = self.value(g);
            let (is_const, init) = match data.kind {
                ValueKind::GlobalVariable { is_const, init } => (is_const, init),
                _ => unreachable!(),
            };
            let elem_ty = self.types.pointee(data.ty).expect("globals have pointer type");
            let _ = writeln!(
                out,
                "@{} = {} {} {}",
                data.name,
                if is_const { "constant" } else { "global" },
                self.types.display(elem_ty),
                self.operand_ref(init)
            );
        }
        if !self.globals.is_empty() {
            out.push('\n');
        }
        for &f in &self.functions {
            let data = self.value(f);
            let (args, blocks) = match &data.kind {
                ValueKind::Function { args, blocks } => (args, blocks),
                _ => unreachable!(),
            };
            let ret_ty = self.types.function_return(data.ty).unwrap();
            if blocks.is_empty() {
                let params = self.types.function_params(data.ty).unwrap();
                let params = params
                    .iter()
                    .map(|&p| self.types.display(p))
                    .collect::<Vec<_>>()
                    .join(", ");
                let _ = writeln!(
                    out,
                    "declare {} @{}({})",
                    self.types.display(ret_ty),
                    data.name,
                    params
                );
                continue;
            }
            let args_text = args
                .iter()
                .map(|&a| self.typed_ref(a))
                .collect::<Vec<_>>()
                .join(", ");
            let _ = writeln!(
                out,
                "define {} @{}({}) {{",
                self.types.display(ret_ty),
                data.name,
                args_text
            );
            for &bb in blocks {
                let _ = writeln!(out, "{}:", self.name_of(bb));
                for &inst in self.block_instructions(bb) {
                    self.print_instruction(&mut out, inst);
                }
            }
            out.push_str("}\n");
        }
        out
    }
}

impl Default for Module {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instruction::CmpOp;

    #[test]
    fn test_constant_uniquing() {
        let mut m = Module::new();
        assert_eq!(m.const_int(7), m.const_int(7));
        assert_ne!(m.const_int(7), m.const_int(8));
        assert_eq!(m.const_fp(1.5), m.const_fp(1.5));
        assert_ne!(m.const_fp(1.5), m.const_fp(2.5));
        assert_eq!(m.const_bool(true), m.const_bool(true));
        // i1 and i32 constants live in separate pools
        assert_ne!(m.const_bool(true), m.const_int(1));
    }

    #[test]
    fn test_zero_constant_per_type() {
        let mut m = Module::new();
        let i32_ty = m.types.int32_type();
        let arr_ty = m.types.array_type(i32_ty, 4);
        assert_eq!(m.const_zero(i32_ty), m.const_zero(i32_ty));
        assert_ne!(m.const_zero(i32_ty), m.const_zero(arr_ty));
    }

    #[test]
    fn test_use_lists_track_operands() {
        let mut m = Module::new();
        let i32_ty = m.types.int32_type();
        let fn_ty = m.types.function_type(i32_ty, vec![]);
        let f = m.create_function("f", fn_ty);
        let bb = m.create_block(f, "entry");
        let a = m.const_int(1);
        let b = m.const_int(2);
        let add = m.new_instruction(Opcode::Add, i32_ty, &[a, b], bb);
        m.append_instruction(bb, add);

        assert_eq!(m.value(a).uses, vec![Use { user: add, index: 0 }]);
        assert_eq!(m.value(b).uses, vec![Use { user: add, index: 1 }]);

        let c = m.const_int(3);
        m.set_operand(add, 0, c);
        assert!(m.value(a).uses.is_empty());
        assert_eq!(m.value(c).uses, vec![Use { user: add, index: 0 }]);
    }

    #[test]
    fn test_replace_all_uses_with() {
        let mut m = Module::new();
        let i32_ty = m.types.int32_type();
        let fn_ty = m.types.function_type(i32_ty, vec![]);
        let f = m.create_function("f", fn_ty);
        let bb = m.create_block(f, "entry");
        let a = m.const_int(1);
        let b = m.const_int(2);
        let add = m.new_instruction(Opcode::Add, i32_ty, &[a, a], bb);
        m.append_instruction(bb, add);
        let ret = m.new_instruction(Opcode::Ret, m.types.void_type(), &[add], bb);
        m.append_instruction(bb, ret);

        m.replace_all_uses_with(a, b);
        assert!(m.value(a).uses.is_empty());
        assert_eq!(m.value(b).uses.len(), 2);
        assert_eq!(m.value(add).operands(), &[b, b]);

        let folded = m.const_int(4);
        m.replace_all_uses_with(add, folded);
        assert_eq!(m.value(ret).operands(), &[folded]);
        assert!(m.value(add).uses.is_empty());
    }

    #[test]
    #[should_panic(expected = "identical types")]
    fn test_rauw_type_mismatch_panics() {
        let mut m = Module::new();
        let a = m.const_int(1);
        let b = m.const_fp(1.0);
        m.replace_all_uses_with(a, b);
    }

    #[test]
    fn test_remove_operand_renumbers_uses() {
        let mut m = Module::new();
        let i32_ty = m.types.int32_type();
        let fn_ty = m.types.function_type(i32_ty, vec![]);
        let f = m.create_function("f", fn_ty);
        let bb = m.create_block(f, "entry");
        let a = m.const_int(1);
        let b = m.const_int(2);
        let c = m.const_int(3);
        // phi-shaped operand list
        let phi = m.new_instruction(Opcode::Phi, i32_ty, &[a, b, c], bb);
        m.append_instruction(bb, phi);

        m.remove_operand(phi, 0);
        assert_eq!(m.value(phi).operands(), &[b, c]);
        assert_eq!(m.value(b).uses, vec![Use { user: phi, index: 0 }]);
        assert_eq!(m.value(c).uses, vec![Use { user: phi, index: 1 }]);
        assert!(m.value(a).uses.is_empty());
    }

    #[test]
    fn test_print_simple_function() {
        let mut m = Module::new();
        let i32_ty = m.types.int32_type();
        let fn_ty = m.types.function_type(i32_ty, vec![i32_ty]);
        let f = m.create_function("double_it", fn_ty);
        let bb = m.create_block(f, "entry");
        let arg = m.function_args(f)[0];
        let add = m.new_instruction(Opcode::Add, i32_ty, &[arg, arg], bb);
        m.append_instruction(bb, add);
        let ret = m.new_instruction(Opcode::Ret, m.types.void_type(), &[add], bb);
        m.append_instruction(bb, ret);

        m.set_print_name();
        let text = m.print();
        assert!(text.contains("define i32 @double_it(i32 %arg0)"));
        assert!(text.contains("entry:"));
        assert!(text.contains("= add i32 %arg0, %arg0"));
        assert!(text.contains("ret i32 %op"));
    }

    #[test]
    fn test_print_comparison_and_branch() {
        let mut m = Module::new();
        let i32_ty = m.types.int32_type();
        let i1_ty = m.types.int1_type();
        let fn_ty = m.types.function_type(i32_ty, vec![i32_ty]);
        let f = m.create_function("sign", fn_ty);
        let entry = m.create_block(f, "entry");
        let then_bb = m.create_block(f, "pos");
        let else_bb = m.create_block(f, "neg");
        let arg = m.function_args(f)[0];
        let zero = m.const_int(0);
        let cmp = m.new_instruction(Opcode::ICmp(CmpOp::Ge), i1_ty, &[arg, zero], entry);
        m.append_instruction(entry, cmp);
        let br = m.new_instruction(
            Opcode::Br,
            m.types.void_type(),
            &[cmp, then_bb, else_bb],
            entry,
        );
        m.append_instruction(entry, br);

        m.set_print_name();
        let text = m.print();
        assert!(text.contains("icmp sge i32 %arg0, 0"));
        assert!(text.contains("br i1 %op"));
        assert!(text.contains("label %pos, label %neg"));
    }
}
