//! Parse tree.
//!
//! One sum type covers every expression and statement; nodes own their
//! children exclusively, equality is structural (spans are ignored, the
//! tokens already compare that way), and every node reports a source span.
//! `Display` prints the compact head-only form used by diagnostics and
//! tests (a function declaration prints as `fun-a(int-x,int-y)->int`).

use crate::token::{Span, Token, TokenKind};
use std::fmt;

/// A parsed type: identifier plus optional type parameters in braces.
#[derive(Debug, Clone, PartialEq)]
pub struct Type {
    pub id: Token,
    pub params: Option<TypeParamList>,
}

impl Type {
    pub fn new(id: Token) -> Type {
        Type { id, params: None }
    }

    pub fn with_params(id: Token, params: TypeParamList) -> Type {
        Type {
            id,
            params: Some(params),
        }
    }

    pub fn validate(&self) -> bool {
        self.id.kind() == TokenKind::Identifier
            && self.params.as_ref().is_none_or(TypeParamList::validate)
    }

    pub fn span(&self) -> Span {
        match &self.params {
            Some(params) => Span::combine(self.id.span(), params.span()),
            None => self.id.span(),
        }
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id.identifier().unwrap_or("err"))?;
        if let Some(params) = &self.params {
            write!(f, "{params}")?;
        }
        Ok(())
    }
}

/// Ordered types between braces: `{T,int}`.
#[derive(Debug, Clone, PartialEq)]
pub struct TypeParamList {
    pub open: Token,
    pub params: Vec<Type>,
    pub commas: Vec<Token>,
    pub close: Token,
}

impl TypeParamList {
    pub fn validate(&self) -> bool {
        self.open.kind() == TokenKind::SepOpenCurly
            && self.close.kind() == TokenKind::SepCloseCurly
            && !self.params.is_empty()
            && self.commas.len() == self.params.len() - 1
            && self.params.iter().all(Type::validate)
    }

    pub fn span(&self) -> Span {
        Span::combine(self.open.span(), self.close.span())
    }
}

impl fmt::Display for TypeParamList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        for (i, param) in self.params.iter().enumerate() {
            if i != 0 {
                f.write_str(",")?;
            }
            write!(f, "{param}")?;
        }
        f.write_str("}")
    }
}

/// Type-variable names at declaration site: `{T,U}`.
#[derive(Debug, Clone, PartialEq)]
pub struct TypeSubList {
    pub open: Token,
    pub subs: Vec<Token>,
    pub commas: Vec<Token>,
    pub close: Token,
}

impl TypeSubList {
    pub fn validate(&self) -> bool {
        self.open.kind() == TokenKind::SepOpenCurly
            && self.close.kind() == TokenKind::SepCloseCurly
            && !self.subs.is_empty()
            && self.commas.len() == self.subs.len() - 1
            && self
                .subs
                .iter()
                .all(|sub| sub.kind() == TokenKind::Identifier)
    }

    pub fn span(&self) -> Span {
        Span::combine(self.open.span(), self.close.span())
    }
}

impl fmt::Display for TypeSubList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        for (i, sub) in self.subs.iter().enumerate() {
            if i != 0 {
                f.write_str(",")?;
            }
            f.write_str(sub.identifier().unwrap_or("err"))?;
        }
        f.write_str("}")
    }
}

/// One declared argument: type plus identifier.
#[derive(Debug, Clone, PartialEq)]
pub struct ArgSpec {
    pub ty: Type,
    pub id: Token,
}

impl ArgSpec {
    pub fn validate(&self) -> bool {
        self.ty.validate() && self.id.kind() == TokenKind::Identifier
    }
}

impl fmt::Display for ArgSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.ty, self.id.identifier().unwrap_or("err"))
    }
}

/// Declared return type: arrow plus type.
#[derive(Debug, Clone, PartialEq)]
pub struct RetTypeSpec {
    pub arrow: Token,
    pub ty: Type,
}

impl RetTypeSpec {
    pub fn validate(&self) -> bool {
        self.arrow.kind() == TokenKind::SepArrow && self.ty.validate()
    }
}

/// One enum entry: name with optional explicit value (`red : 2`).
#[derive(Debug, Clone, PartialEq)]
pub struct EnumEntrySpec {
    pub id: Token,
    pub colon: Option<Token>,
    pub minus: Option<Token>,
    pub value: Option<Token>,
}

impl EnumEntrySpec {
    pub fn validate(&self) -> bool {
        if self.id.kind() != TokenKind::Identifier {
            return false;
        }
        match (&self.colon, &self.value) {
            (None, None) => self.minus.is_none(),
            (Some(colon), Some(value)) => {
                colon.kind() == TokenKind::SepColon
                    && value.kind() == TokenKind::LitInt
                    && self
                        .minus
                        .as_ref()
                        .is_none_or(|m| m.kind() == TokenKind::OpMinus)
            }
            _ => false,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    // Shared.
    Comment {
        token: Token,
    },
    Error {
        msg: String,
        tokens: Vec<Token>,
        children: Vec<Node>,
    },

    // Expressions.
    LitExpr {
        val: Token,
    },
    IdExpr {
        id: Token,
    },
    ConstDeclExpr {
        id: Token,
        eq: Token,
        value: Box<Node>,
    },
    UnaryExpr {
        op: Token,
        operand: Box<Node>,
    },
    BinaryExpr {
        lhs: Box<Node>,
        op: Token,
        rhs: Box<Node>,
    },
    ConditionalExpr {
        cond: Box<Node>,
        qmark: Token,
        if_branch: Box<Node>,
        colon: Token,
        else_branch: Box<Node>,
    },
    CallExpr {
        modifiers: Vec<Token>,
        id: Token,
        type_params: Option<TypeParamList>,
        open: Token,
        args: Vec<Node>,
        commas: Vec<Token>,
        close: Token,
    },
    IndexExpr {
        lhs: Box<Node>,
        open: Token,
        args: Vec<Node>,
        commas: Vec<Token>,
        close: Token,
    },
    FieldExpr {
        lhs: Box<Node>,
        dot: Token,
        id: Token,
    },
    ParenExpr {
        open: Token,
        expr: Box<Node>,
        close: Token,
    },
    GroupExpr {
        exprs: Vec<Node>,
        semis: Vec<Token>,
    },
    AnonFuncExpr {
        kw: Token,
        modifiers: Vec<Token>,
        open: Token,
        args: Vec<ArgSpec>,
        commas: Vec<Token>,
        close: Token,
        ret_type: Option<RetTypeSpec>,
        body: Box<Node>,
    },
    TypeTestExpr {
        lhs: Box<Node>,
        kw: Token,
        ty: Type,
        id: Token,
    },
    SwitchExprIf {
        kw: Token,
        cond: Box<Node>,
        arrow: Token,
        expr: Box<Node>,
    },
    SwitchExprElse {
        kw: Token,
        arrow: Token,
        expr: Box<Node>,
    },
    SwitchExpr {
        if_clauses: Vec<Node>,
        else_clause: Option<Box<Node>>,
    },
    IntrinsicExpr {
        kw: Token,
        open: Token,
        intrinsic: Token,
        close: Token,
        type_params: Option<TypeParamList>,
    },

    // Statements.
    ExecStmt {
        action: Token,
        open: Token,
        args: Vec<Node>,
        commas: Vec<Token>,
        close: Token,
    },
    FuncDeclStmt {
        kw: Token,
        id: Token,
        type_subs: Option<TypeSubList>,
        open: Token,
        args: Vec<ArgSpec>,
        commas: Vec<Token>,
        close: Token,
        ret_type: Option<RetTypeSpec>,
        body: Box<Node>,
    },
    StructDeclStmt {
        kw: Token,
        id: Token,
        type_subs: Option<TypeSubList>,
        eq: Option<Token>,
        fields: Vec<ArgSpec>,
        commas: Vec<Token>,
    },
    UnionDeclStmt {
        kw: Token,
        id: Token,
        type_subs: Option<TypeSubList>,
        eq: Token,
        types: Vec<Type>,
        commas: Vec<Token>,
    },
    EnumDeclStmt {
        kw: Token,
        id: Token,
        eq: Token,
        entries: Vec<EnumEntrySpec>,
        commas: Vec<Token>,
    },
    ImportStmt {
        kw: Token,
        path: Token,
    },
}

impl Node {
    pub fn is_error(&self) -> bool {
        matches!(self, Node::Error { .. })
    }

    /// Count error nodes in this subtree.
    pub fn error_count(&self) -> usize {
        let mut count = usize::from(self.is_error());
        self.for_each_child(|child| count += child.error_count());
        count
    }

    /// Visit direct children, expressions only.
    pub fn for_each_child(&self, mut visit: impl FnMut(&Node)) {
        match self {
            Node::Comment { .. }
            | Node::LitExpr { .. }
            | Node::IdExpr { .. }
            | Node::IntrinsicExpr { .. }
            | Node::StructDeclStmt { .. }
            | Node::UnionDeclStmt { .. }
            | Node::EnumDeclStmt { .. }
            | Node::ImportStmt { .. } => {}
            Node::Error { children, .. } => children.iter().for_each(&mut visit),
            Node::ConstDeclExpr { value, .. } => visit(value),
            Node::UnaryExpr { operand, .. } => visit(operand),
            Node::BinaryExpr { lhs, rhs, .. } => {
                visit(lhs);
                visit(rhs);
            }
            Node::ConditionalExpr {
                cond,
                if_branch,
                else_branch,
                ..
            } => {
                visit(cond);
                visit(if_branch);
                visit(else_branch);
            }
            Node::CallExpr { args, .. } | Node::ExecStmt { args, .. } => {
                args.iter().for_each(&mut visit)
            }
            Node::IndexExpr { lhs, args, .. } => {
                visit(lhs);
                args.iter().for_each(&mut visit);
            }
            Node::FieldExpr { lhs, .. } => visit(lhs),
            Node::ParenExpr { expr, .. } => visit(expr),
            Node::GroupExpr { exprs, .. } => exprs.iter().for_each(&mut visit),
            Node::AnonFuncExpr { body, .. } => visit(body),
            Node::TypeTestExpr { lhs, .. } => visit(lhs),
            Node::SwitchExprIf { cond, expr, .. } => {
                visit(cond);
                visit(expr);
            }
            Node::SwitchExprElse { expr, .. } => visit(expr),
            Node::SwitchExpr {
                if_clauses,
                else_clause,
            } => {
                if_clauses.iter().for_each(&mut visit);
                if let Some(else_clause) = else_clause {
                    visit(else_clause);
                }
            }
            Node::FuncDeclStmt { body, .. } => visit(body),
        }
    }

    pub fn span(&self) -> Span {
        match self {
            Node::Comment { token } => token.span(),
            Node::Error {
                tokens, children, ..
            } => {
                // No fixed token order in an error node; cover everything.
                let mut span: Option<Span> = None;
                let mut add = |s: Span| {
                    span = Some(match span {
                        Some(acc) => Span::combine(acc, s),
                        None => s,
                    });
                };
                for token in tokens {
                    add(token.span());
                }
                for child in children {
                    add(child.span());
                }
                span.unwrap_or(Span::zero())
            }
            Node::LitExpr { val } => val.span(),
            Node::IdExpr { id } => id.span(),
            Node::ConstDeclExpr { id, value, .. } => Span::combine(id.span(), value.span()),
            Node::UnaryExpr { op, operand } => Span::combine(op.span(), operand.span()),
            Node::BinaryExpr { lhs, rhs, .. } => Span::combine(lhs.span(), rhs.span()),
            Node::ConditionalExpr {
                cond, else_branch, ..
            } => Span::combine(cond.span(), else_branch.span()),
            Node::CallExpr {
                modifiers,
                id,
                close,
                ..
            } => {
                let start = modifiers.first().unwrap_or(id).span();
                Span::combine(start, close.span())
            }
            Node::IndexExpr { lhs, close, .. } => Span::combine(lhs.span(), close.span()),
            Node::FieldExpr { lhs, id, .. } => Span::combine(lhs.span(), id.span()),
            Node::ParenExpr { open, close, .. } => Span::combine(open.span(), close.span()),
            Node::GroupExpr { exprs, .. } => match (exprs.first(), exprs.last()) {
                (Some(first), Some(last)) => Span::combine(first.span(), last.span()),
                _ => Span::zero(),
            },
            Node::AnonFuncExpr { kw, body, .. } => Span::combine(kw.span(), body.span()),
            Node::TypeTestExpr { lhs, id, .. } => Span::combine(lhs.span(), id.span()),
            Node::SwitchExprIf { kw, expr, .. } => Span::combine(kw.span(), expr.span()),
            Node::SwitchExprElse { kw, expr, .. } => Span::combine(kw.span(), expr.span()),
            Node::SwitchExpr {
                if_clauses,
                else_clause,
            } => {
                let first = if_clauses.first().map(Node::span).unwrap_or(Span::zero());
                let last = else_clause
                    .as_deref()
                    .or(if_clauses.last())
                    .map(Node::span)
                    .unwrap_or(Span::zero());
                Span::combine(first, last)
            }
            Node::IntrinsicExpr {
                kw,
                close,
                type_params,
                ..
            } => {
                let end = type_params.as_ref().map(|p| p.span()).unwrap_or(close.span());
                Span::combine(kw.span(), end)
            }
            Node::ExecStmt { action, close, .. } => Span::combine(action.span(), close.span()),
            Node::FuncDeclStmt { kw, body, .. } => Span::combine(kw.span(), body.span()),
            Node::StructDeclStmt {
                kw,
                id,
                fields,
                ..
            } => {
                let end = fields
                    .last()
                    .map(|field| field.id.span())
                    .unwrap_or(id.span());
                Span::combine(kw.span(), end)
            }
            Node::UnionDeclStmt { kw, types, eq, .. } => {
                let end = types.last().map(Type::span).unwrap_or(eq.span());
                Span::combine(kw.span(), end)
            }
            Node::EnumDeclStmt { kw, entries, eq, .. } => {
                let end = entries
                    .last()
                    .map(|entry| entry.value.as_ref().unwrap_or(&entry.id).span())
                    .unwrap_or(eq.span());
                Span::combine(kw.span(), end)
            }
            Node::ImportStmt { kw, path } => Span::combine(kw.span(), path.span()),
        }
    }
}

fn id_or_err(token: &Token) -> &str {
    token.identifier().unwrap_or("err")
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Node::Comment { .. } => f.write_str("comment"),
            Node::Error { msg, .. } => f.write_str(msg),
            Node::LitExpr { val } => write!(f, "{val}"),
            Node::IdExpr { id } => write!(f, "const-{}", id_or_err(id)),
            Node::ConstDeclExpr { id, .. } => write!(f, "decl-{}", id_or_err(id)),
            Node::UnaryExpr { op, .. } => write!(f, "op-{op}"),
            Node::BinaryExpr { op, .. } => write!(f, "op-{op}"),
            Node::ConditionalExpr { .. } => f.write_str("conditional"),
            Node::CallExpr {
                modifiers,
                id,
                type_params,
                ..
            } => {
                f.write_str("call")?;
                for modifier in modifiers {
                    write!(f, "-{}", modifier.keyword().map(|k| k.as_str()).unwrap_or("err"))?;
                }
                write!(f, "-{}", id_or_err(id))?;
                if let Some(type_params) = type_params {
                    write!(f, "{type_params}")?;
                }
                Ok(())
            }
            Node::IndexExpr { .. } => f.write_str("index"),
            Node::FieldExpr { id, .. } => write!(f, "field-{}", id_or_err(id)),
            Node::ParenExpr { .. } => f.write_str("paren"),
            Node::GroupExpr { .. } => f.write_str("group"),
            Node::AnonFuncExpr {
                modifiers,
                args,
                ret_type,
                ..
            } => {
                f.write_str("anon-fun")?;
                for modifier in modifiers {
                    write!(f, "-{}", modifier.keyword().map(|k| k.as_str()).unwrap_or("err"))?;
                }
                write_arg_list(f, args)?;
                write_ret_type(f, ret_type)
            }
            Node::TypeTestExpr { kw, ty, id, .. } => {
                let kw = kw.keyword().map(|k| k.as_str()).unwrap_or("err");
                write!(f, "{kw}-{ty}-{}", id_or_err(id))
            }
            Node::SwitchExprIf { .. } => f.write_str("if"),
            Node::SwitchExprElse { .. } => f.write_str("else"),
            Node::SwitchExpr { .. } => f.write_str("switch"),
            Node::IntrinsicExpr {
                intrinsic,
                type_params,
                ..
            } => {
                write!(f, "intrinsic-{}", id_or_err(intrinsic))?;
                if let Some(type_params) = type_params {
                    write!(f, "{type_params}")?;
                }
                Ok(())
            }
            Node::ExecStmt { action, .. } => write!(f, "exec-{}", id_or_err(action)),
            Node::FuncDeclStmt {
                id,
                type_subs,
                args,
                ret_type,
                ..
            } => {
                if id.kind() == TokenKind::Identifier {
                    write!(f, "fun-{}", id_or_err(id))?;
                } else {
                    write!(f, "fun-op-{id}")?;
                }
                if let Some(type_subs) = type_subs {
                    write!(f, "{type_subs}")?;
                }
                write_arg_list(f, args)?;
                write_ret_type(f, ret_type)
            }
            Node::StructDeclStmt { id, type_subs, .. } => {
                write!(f, "struct-{}", id_or_err(id))?;
                if let Some(type_subs) = type_subs {
                    write!(f, "{type_subs}")?;
                }
                Ok(())
            }
            Node::UnionDeclStmt { id, type_subs, .. } => {
                write!(f, "union-{}", id_or_err(id))?;
                if let Some(type_subs) = type_subs {
                    write!(f, "{type_subs}")?;
                }
                Ok(())
            }
            Node::EnumDeclStmt { id, .. } => write!(f, "enum-{}", id_or_err(id)),
            Node::ImportStmt { path, .. } => write!(f, "import-{path}"),
        }
    }
}

fn write_arg_list(f: &mut fmt::Formatter<'_>, args: &[ArgSpec]) -> fmt::Result {
    f.write_str("(")?;
    for (i, arg) in args.iter().enumerate() {
        if i != 0 {
            f.write_str(",")?;
        }
        write!(f, "{arg}")?;
    }
    f.write_str(")")
}

fn write_ret_type(f: &mut fmt::Formatter<'_>, ret_type: &Option<RetTypeSpec>) -> fmt::Result {
    f.write_str("->")?;
    match ret_type {
        Some(spec) => write!(f, "{}", spec.ty),
        None => f.write_str("infer"),
    }
}
