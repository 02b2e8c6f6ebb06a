//! Abstract syntax tree for the cminus-f language
//!
//! cminus-f is a C subset with int and float scalars, one-dimensional
//! arrays, functions and if/while/return control flow. The parser that
//! produces these nodes lives outside this workspace; the types here are
//! the contract between it and the IR lowerer.

pub mod ast;

pub use ast::{
    AddOp, AdditiveExpression, AssignExpression, Call, CompoundStmt, Declaration, Expression,
    ExpressionStmt, Factor, FunDeclaration, IterationStmt, MulOp, Num, Param, Program, RelOp,
    ReturnStmt, SelectionStmt, SimpleExpression, Statement, Term, TypeSpec, Var, VarDeclaration,
};
