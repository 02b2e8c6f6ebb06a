//! AST node definitions
//!
//! The node inventory mirrors the cminus-f grammar: a program is a list of
//! declarations, expressions keep the grammar's simple/additive/term
//! stratification, and variables carry an optional index expression.

use serde::{Deserialize, Serialize};

/// Scalar type tag attached to declarations and numbers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TypeSpec {
    Int,
    Float,
    Void,
}

/// Relational operators of a simple-expression
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RelOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

/// Additive operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AddOp {
    Add,
    Sub,
}

/// Multiplicative operators
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MulOp {
    Mul,
    Div,
}

/// Numeric literal
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Num {
    Int(i32),
    Float(f32),
}

impl Num {
    pub fn type_spec(&self) -> TypeSpec {
        match self {
            Num::Int(_) => TypeSpec::Int,
            Num::Float(_) => TypeSpec::Float,
        }
    }
}

/// A complete translation unit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Program {
    pub declarations: Vec<Declaration>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Declaration {
    Var(VarDeclaration),
    Fun(FunDeclaration),
}

/// `int x;`, `float x;` or `int x[10];`, at global or local scope
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VarDeclaration {
    pub type_spec: TypeSpec,
    pub id: String,
    /// `Some(n)` for an array declaration `T id[n]`
    pub array_len: Option<i32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunDeclaration {
    pub type_spec: TypeSpec,
    pub id: String,
    pub params: Vec<Param>,
    pub body: CompoundStmt,
}

/// Formal parameter; `is_array` marks the decayed-pointer form `T id[]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Param {
    pub type_spec: TypeSpec,
    pub id: String,
    pub is_array: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompoundStmt {
    pub local_declarations: Vec<VarDeclaration>,
    pub statement_list: Vec<Statement>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Statement {
    Expression(ExpressionStmt),
    Compound(CompoundStmt),
    Selection(SelectionStmt),
    Iteration(IterationStmt),
    Return(ReturnStmt),
}

/// An expression statement; the expression may be absent (`;`)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExpressionStmt {
    pub expression: Option<Expression>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectionStmt {
    pub condition: Expression,
    pub if_statement: Box<Statement>,
    pub else_statement: Option<Box<Statement>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IterationStmt {
    pub condition: Expression,
    pub body: Box<Statement>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReturnStmt {
    pub expression: Option<Expression>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Expression {
    Assign(AssignExpression),
    Simple(SimpleExpression),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssignExpression {
    pub var: Var,
    pub value: Box<Expression>,
}

/// A variable reference with an optional array index
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Var {
    pub id: String,
    pub index: Option<Box<Expression>>,
}

/// `additive (relop additive)?`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimpleExpression {
    pub lhs: AdditiveExpression,
    pub rhs: Option<(RelOp, AdditiveExpression)>,
}

/// Left-recursive chain `additive addop term | term`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdditiveExpression {
    pub lhs: Option<(Box<AdditiveExpression>, AddOp)>,
    pub term: Term,
}

/// Left-recursive chain `term mulop factor | factor`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Term {
    pub lhs: Option<(Box<Term>, MulOp)>,
    pub factor: Factor,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Factor {
    /// Parenthesized sub-expression
    Expression(Box<Expression>),
    Var(Var),
    Call(Call),
    Num(Num),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Call {
    pub id: String,
    pub args: Vec<Expression>,
}

// Convenience constructors. Hand-written ASTs (tests, the REPL driver)
// get verbose without these.

impl Expression {
    pub fn num_int(value: i32) -> Self {
        Expression::Simple(SimpleExpression::from_factor(Factor::Num(Num::Int(value))))
    }

    pub fn num_float(value: f32) -> Self {
        Expression::Simple(SimpleExpression::from_factor(Factor::Num(Num::Float(value))))
    }

    pub fn var(id: impl Into<String>) -> Self {
        Expression::Simple(SimpleExpression::from_factor(Factor::Var(Var {
            id: id.into(),
            index: None,
        })))
    }

    pub fn indexed(id: impl Into<String>, index: Expression) -> Self {
        Expression::Simple(SimpleExpression::from_factor(Factor::Var(Var {
            id: id.into(),
            index: Some(Box::new(index)),
        })))
    }

    pub fn call(id: impl Into<String>, args: Vec<Expression>) -> Self {
        Expression::Simple(SimpleExpression::from_factor(Factor::Call(Call {
            id: id.into(),
            args,
        })))
    }

    pub fn assign(var: Var, value: Expression) -> Self {
        Expression::Assign(AssignExpression {
            var,
            value: Box::new(value),
        })
    }

    /// `lhs op rhs` as a relational simple-expression
    pub fn compare(lhs: Expression, op: RelOp, rhs: Expression) -> Self {
        Expression::Simple(SimpleExpression {
            lhs: lhs.into_additive(),
            rhs: Some((op, rhs.into_additive())),
        })
    }

    /// `lhs + rhs` / `lhs - rhs`
    pub fn additive(lhs: Expression, op: AddOp, rhs: Expression) -> Self {
        Expression::Simple(SimpleExpression {
            lhs: AdditiveExpression {
                lhs: Some((Box::new(lhs.into_additive()), op)),
                term: rhs.into_term(),
            },
            rhs: None,
        })
    }

    /// `lhs * rhs` / `lhs / rhs`
    pub fn multiplicative(lhs: Expression, op: MulOp, rhs: Expression) -> Self {
        Expression::Simple(SimpleExpression {
            lhs: AdditiveExpression {
                lhs: None,
                term: Term {
                    lhs: Some((Box::new(lhs.into_term()), op)),
                    factor: rhs.into_factor(),
                },
            },
            rhs: None,
        })
    }

    /// Reuse an expression as an additive chain, parenthesizing when needed
    fn into_additive(self) -> AdditiveExpression {
        match self {
            Expression::Simple(SimpleExpression { lhs, rhs: None }) => lhs,
            other => AdditiveExpression {
                lhs: None,
                term: other.into_term(),
            },
        }
    }

    fn into_term(self) -> Term {
        match self {
            Expression::Simple(SimpleExpression {
                lhs:
                    AdditiveExpression {
                        lhs: None,
                        term,
                    },
                rhs: None,
            }) => term,
            other => Term {
                lhs: None,
                factor: other.into_factor(),
            },
        }
    }

    fn into_factor(self) -> Factor {
        match self {
            Expression::Simple(SimpleExpression {
                lhs:
                    AdditiveExpression {
                        lhs: None,
                        term: Term { lhs: None, factor },
                    },
                rhs: None,
            }) => factor,
            other => Factor::Expression(Box::new(other)),
        }
    }
}

impl SimpleExpression {
    fn from_factor(factor: Factor) -> Self {
        SimpleExpression {
            lhs: AdditiveExpression {
                lhs: None,
                term: Term { lhs: None, factor },
            },
            rhs: None,
        }
    }
}

impl Statement {
    pub fn expr(expression: Expression) -> Self {
        Statement::Expression(ExpressionStmt {
            expression: Some(expression),
        })
    }

    pub fn ret(expression: Option<Expression>) -> Self {
        Statement::Return(ReturnStmt { expression })
    }
}

impl CompoundStmt {
    pub fn new(local_declarations: Vec<VarDeclaration>, statement_list: Vec<Statement>) -> Self {
        CompoundStmt {
            local_declarations,
            statement_list,
        }
    }
}

impl VarDeclaration {
    pub fn scalar(type_spec: TypeSpec, id: impl Into<String>) -> Self {
        VarDeclaration {
            type_spec,
            id: id.into(),
            array_len: None,
        }
    }

    pub fn array(type_spec: TypeSpec, id: impl Into<String>, len: i32) -> Self {
        VarDeclaration {
            type_spec,
            id: id.into(),
            array_len: Some(len),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_num_type_tags() {
        assert_eq!(Num::Int(3).type_spec(), TypeSpec::Int);
        assert_eq!(Num::Float(1.5).type_spec(), TypeSpec::Float);
    }

    #[test]
    fn test_expression_builders() {
        let e = Expression::additive(Expression::num_int(1), AddOp::Add, Expression::num_int(2));
        match &e {
            Expression::Simple(simple) => {
                assert!(simple.rhs.is_none());
                assert!(simple.lhs.lhs.is_some());
            }
            _ => panic!("expected a simple expression"),
        }
    }

    #[test]
    fn test_compare_builder_keeps_operands_flat() {
        let e = Expression::compare(Expression::var("x"), RelOp::Lt, Expression::num_int(10));
        match e {
            Expression::Simple(simple) => {
                let (op, _) = simple.rhs.expect("relational rhs");
                assert_eq!(op, RelOp::Lt);
            }
            _ => panic!("expected a simple expression"),
        }
    }

    #[test]
    fn test_var_declaration_forms() {
        let scalar = VarDeclaration::scalar(TypeSpec::Int, "x");
        assert_eq!(scalar.array_len, None);
        let arr = VarDeclaration::array(TypeSpec::Float, "buf", 16);
        assert_eq!(arr.array_len, Some(16));
    }
}
