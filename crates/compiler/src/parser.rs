//! Recursive-descent parser with operator-precedence climbing.
//!
//! Reads from a bounded look-ahead buffer over the token stream. Input
//! errors never abort the parse: every construct has an error factory that
//! packs the consumed tokens and partial children into an error node, and
//! parsing resumes at the next plausible boundary.

use crate::node::{
    ArgSpec, EnumEntrySpec, Node, RetTypeSpec, Type, TypeParamList, TypeSubList,
};
use crate::token::{Keyword, Span, Token, TokenCat, TokenKind, end_token};
use std::collections::VecDeque;

const MAX_EXPR_RECURSION_DEPTH: usize = 512;

// Precedence levels, ascending.
const GROUPING_PRECEDENCE: i32 = 1;
const ASSIGNMENT_PRECEDENCE: i32 = 2;
const CONDITIONAL_PRECEDENCE: i32 = 3;
const BANG_PRECEDENCE: i32 = 4;
const OR_PRECEDENCE: i32 = 5;
const XOR_PRECEDENCE: i32 = 6;
const AND_PRECEDENCE: i32 = 7;
const EQUALITY_PRECEDENCE: i32 = 8;
const RELATIONAL_PRECEDENCE: i32 = 9;
const SHIFT_PRECEDENCE: i32 = 10;
const ADDITIVE_PRECEDENCE: i32 = 11;
const MULTIPLICATIVE_PRECEDENCE: i32 = 12;
const DOUBLE_QMARK_PRECEDENCE: i32 = 13;
const TYPE_TEST_PRECEDENCE: i32 = 14;
const FIELD_PRECEDENCE: i32 = 15;
const CALL_PRECEDENCE: i32 = 16;
const UNARY_PRECEDENCE: i32 = 17;

/// Precedence of a token in prefix position; 0 when it is not a unary
/// operator.
fn lhs_op_precedence(token: &Token) -> i32 {
    match token.kind() {
        TokenKind::OpPlus
        | TokenKind::OpPlusPlus
        | TokenKind::OpMinus
        | TokenKind::OpMinusMinus
        | TokenKind::OpBang
        | TokenKind::OpTilde
        | TokenKind::OpQMark => UNARY_PRECEDENCE,
        _ => 0,
    }
}

/// Precedence of a token in infix position; 0 when it cannot continue an
/// expression.
fn rhs_op_precedence(token: &Token) -> i32 {
    match token.kind() {
        TokenKind::SepOpenSquare => CALL_PRECEDENCE,
        TokenKind::OpDot => FIELD_PRECEDENCE,
        TokenKind::OpQMarkQMark => DOUBLE_QMARK_PRECEDENCE,
        TokenKind::OpStar | TokenKind::OpSlash | TokenKind::OpRem => MULTIPLICATIVE_PRECEDENCE,
        TokenKind::OpPlus | TokenKind::OpMinus | TokenKind::OpColonColon | TokenKind::OpTilde => {
            ADDITIVE_PRECEDENCE
        }
        TokenKind::OpShiftL | TokenKind::OpShiftR => SHIFT_PRECEDENCE,
        TokenKind::OpLe | TokenKind::OpLeEq | TokenKind::OpGt | TokenKind::OpGtEq => {
            RELATIONAL_PRECEDENCE
        }
        TokenKind::OpEqEq | TokenKind::OpBangEq => EQUALITY_PRECEDENCE,
        TokenKind::OpAmp | TokenKind::OpAmpAmp => AND_PRECEDENCE,
        TokenKind::OpHat => XOR_PRECEDENCE,
        TokenKind::OpPipe | TokenKind::OpPipePipe => OR_PRECEDENCE,
        TokenKind::OpBang => BANG_PRECEDENCE,
        TokenKind::OpQMark => CONDITIONAL_PRECEDENCE,
        TokenKind::OpSemi => GROUPING_PRECEDENCE,
        TokenKind::Keyword => match token.keyword() {
            Some(Keyword::Is) | Some(Keyword::As) => TYPE_TEST_PRECEDENCE,
            _ => 0,
        },
        _ => 0,
    }
}

fn is_right_associative(token: &Token) -> bool {
    token.kind() == TokenKind::OpColonColon
}

fn validate_parentheses(open: &Token, close: &Token) -> bool {
    (open.kind() == TokenKind::SepOpenParen && close.kind() == TokenKind::SepCloseParen)
        || (open.kind() == TokenKind::OpParenParen && close.kind() == TokenKind::OpParenParen)
}

pub struct Parser<I: Iterator<Item = Token>> {
    input: I,
    buffer: VecDeque<Token>,
    depth: usize,
}

impl<I: Iterator<Item = Token>> Parser<I> {
    pub fn new(input: I) -> Parser<I> {
        Parser {
            input,
            buffer: VecDeque::new(),
            depth: 0,
        }
    }

    /// Produce the next top-level statement; `None` at end of stream.
    pub fn next_stmt(&mut self) -> Option<Node> {
        if self.peek(0).is_end() {
            return None;
        }

        if let Some(kw) = self.peek(0).keyword() {
            match kw {
                Keyword::Import => return Some(self.next_stmt_import()),
                Keyword::Fun | Keyword::Act => return Some(self.next_stmt_func_decl()),
                Keyword::Struct => return Some(self.next_stmt_struct_decl()),
                Keyword::Union => return Some(self.next_stmt_union_decl()),
                Keyword::Enum => return Some(self.next_stmt_enum_decl()),
                _ => {}
            }
        }

        if self.peek(0).kind() == TokenKind::LineComment {
            return Some(Node::Comment {
                token: self.consume(),
            });
        }

        Some(self.next_stmt_exec())
    }

    /// Produce the next expression; `None` at end of stream.
    pub fn next_expr(&mut self) -> Option<Node> {
        if self.peek(0).is_end() {
            return None;
        }
        Some(self.expr(0))
    }

    // Statements.

    fn next_stmt_import(&mut self) -> Node {
        let kw = self.consume();
        let path = self.consume();

        if kw.keyword() == Some(Keyword::Import) && path.kind() == TokenKind::LitString {
            return Node::ImportStmt { kw, path };
        }
        err_invalid_stmt_import(kw, path)
    }

    fn next_stmt_func_decl(&mut self) -> Node {
        let kw = self.consume();
        let id = self.consume();
        let type_subs = (self.peek(0).kind() == TokenKind::SepOpenCurly)
            .then(|| self.next_type_sub_list());
        let open = self.consume();
        let empty = open.kind() == TokenKind::OpParenParen;

        let mut args = Vec::new();
        let mut commas = Vec::new();
        if !empty {
            while self.peek(0).kind() == TokenKind::Identifier
                || self.peek(0).kind() == TokenKind::SepComma
            {
                let ty = self.next_type();
                let arg_id = self.consume();
                args.push(ArgSpec { ty, id: arg_id });
                if self.peek(0).kind() == TokenKind::SepComma {
                    commas.push(self.consume());
                }
            }
        }
        let close = if empty { open.clone() } else { self.consume() };

        let ret_type = (self.peek(0).kind() == TokenKind::SepArrow).then(|| {
            let arrow = self.consume();
            let ty = self.next_type();
            RetTypeSpec { arrow, ty }
        });
        let body = self.expr(0);

        let kw_valid = matches!(kw.keyword(), Some(Keyword::Fun) | Some(Keyword::Act));
        let id_valid = id.kind() == TokenKind::Identifier || id.cat() == TokenCat::Operator;
        let type_subs_valid = type_subs.as_ref().is_none_or(TypeSubList::validate);
        let ret_type_valid = ret_type.as_ref().is_none_or(RetTypeSpec::validate);
        let args_valid = args.iter().all(ArgSpec::validate);
        let commas_valid = commas.len() == args.len().saturating_sub(1);

        if kw_valid
            && id_valid
            && validate_parentheses(&open, &close)
            && type_subs_valid
            && ret_type_valid
            && args_valid
            && commas_valid
        {
            return Node::FuncDeclStmt {
                kw,
                id,
                type_subs,
                open,
                args,
                commas,
                close,
                ret_type,
                body: Box::new(body),
            };
        }
        err_invalid_stmt_func_decl(kw, id, type_subs, open, args, commas, close, ret_type, body)
    }

    fn next_stmt_struct_decl(&mut self) -> Node {
        let kw = self.consume();
        let id = self.consume();
        let type_subs = (self.peek(0).kind() == TokenKind::SepOpenCurly)
            .then(|| self.next_type_sub_list());
        let is_empty = self.peek(0).kind() != TokenKind::OpEq;
        let eq = (!is_empty).then(|| self.consume());

        let mut fields = Vec::new();
        let mut commas = Vec::new();
        if !is_empty {
            while self.peek(0).kind() == TokenKind::Identifier {
                let ty = self.next_type();
                let field_id = self.consume();
                fields.push(ArgSpec { ty, id: field_id });
                if self.peek(0).kind() == TokenKind::SepComma {
                    commas.push(self.consume());
                } else {
                    break;
                }
            }
        }

        let mut valid =
            kw.keyword() == Some(Keyword::Struct) && id.kind() == TokenKind::Identifier;
        valid &= type_subs.as_ref().is_none_or(TypeSubList::validate);
        if !is_empty {
            valid &= !fields.is_empty()
                && fields.iter().all(ArgSpec::validate)
                && commas.len() == fields.len().saturating_sub(1);
        }

        if valid {
            return Node::StructDeclStmt {
                kw,
                id,
                type_subs,
                eq,
                fields,
                commas,
            };
        }
        err_invalid_stmt_struct_decl(kw, id, type_subs, eq, fields, commas)
    }

    fn next_stmt_union_decl(&mut self) -> Node {
        let kw = self.consume();
        let id = self.consume();
        let type_subs = (self.peek(0).kind() == TokenKind::SepOpenCurly)
            .then(|| self.next_type_sub_list());
        let eq = self.consume();

        let mut types = Vec::new();
        let mut commas = Vec::new();
        while self.peek(0).kind() == TokenKind::Identifier {
            types.push(self.next_type());
            if self.peek(0).kind() == TokenKind::SepComma {
                commas.push(self.consume());
            } else {
                break;
            }
        }

        let type_subs_valid = type_subs.as_ref().is_none_or(TypeSubList::validate);
        if kw.keyword() == Some(Keyword::Union)
            && id.kind() == TokenKind::Identifier
            && type_subs_valid
            && eq.kind() == TokenKind::OpEq
            && types.len() >= 2
            && types.iter().all(Type::validate)
            && commas.len() == types.len() - 1
        {
            return Node::UnionDeclStmt {
                kw,
                id,
                type_subs,
                eq,
                types,
                commas,
            };
        }
        err_invalid_stmt_union_decl(kw, id, type_subs, eq, types, commas)
    }

    fn next_stmt_enum_decl(&mut self) -> Node {
        let kw = self.consume();
        let id = self.consume();
        let eq = self.consume();

        let mut entries = Vec::new();
        let mut commas = Vec::new();
        while self.peek(0).kind() == TokenKind::Identifier {
            let entry_id = self.consume();
            let mut colon = None;
            let mut minus = None;
            let mut value = None;
            if self.peek(0).kind() == TokenKind::SepColon {
                colon = Some(self.consume());
                if self.peek(0).kind() == TokenKind::OpMinus {
                    minus = Some(self.consume());
                }
                value = Some(self.consume());
            }
            entries.push(EnumEntrySpec {
                id: entry_id,
                colon,
                minus,
                value,
            });
            if self.peek(0).kind() == TokenKind::SepComma {
                commas.push(self.consume());
            } else {
                break;
            }
        }

        if kw.keyword() == Some(Keyword::Enum)
            && id.kind() == TokenKind::Identifier
            && eq.kind() == TokenKind::OpEq
            && !entries.is_empty()
            && entries.iter().all(EnumEntrySpec::validate)
            && commas.len() == entries.len() - 1
        {
            return Node::EnumDeclStmt {
                kw,
                id,
                eq,
                entries,
                commas,
            };
        }
        err_invalid_stmt_enum_decl(kw, id, eq, entries, commas)
    }

    /// A top-level side-effecting call: `id(args,…)`.
    fn next_stmt_exec(&mut self) -> Node {
        let action = self.consume();
        let open = self.consume();
        let empty = open.kind() == TokenKind::OpParenParen;

        let mut args = Vec::new();
        let mut commas = Vec::new();
        if !empty {
            while self.peek(0).kind() != TokenKind::SepCloseParen && !self.peek(0).is_end() {
                args.push(self.expr(0));
                if self.peek(0).kind() == TokenKind::SepComma {
                    commas.push(self.consume());
                }
            }
        }
        let close = if empty { open.clone() } else { self.consume() };

        if action.kind() == TokenKind::Identifier
            && validate_parentheses(&open, &close)
            && commas.len() == args.len().saturating_sub(1)
        {
            return Node::ExecStmt {
                action,
                open,
                args,
                commas,
                close,
            };
        }
        err_invalid_stmt_exec(action, open, args, commas, close)
    }

    // Expressions.

    fn expr(&mut self, min_precedence: i32) -> Node {
        if self.depth >= MAX_EXPR_RECURSION_DEPTH {
            // Consume one token so the caller always makes progress.
            return err_max_expr_recursion_depth_reached(self.consume());
        }
        self.depth += 1;
        let result = self.expr_inner(min_precedence);
        self.depth -= 1;
        result
    }

    fn expr_inner(&mut self, min_precedence: i32) -> Node {
        let mut lhs = self.expr_lhs();
        loop {
            // Precedence decides whether to keep extending this expression
            // or leave the token to an outer recursion level.
            let next = self.peek(0);
            let precedence = rhs_op_precedence(next);
            let right_associative = is_right_associative(next);
            if precedence == 0
                || precedence < min_precedence
                || (!right_associative && precedence == min_precedence)
            {
                break;
            }

            lhs = match self.peek(0).kind() {
                TokenKind::OpSemi => self.expr_group(lhs, precedence),
                TokenKind::OpQMark => self.expr_conditional(lhs),
                TokenKind::OpDot => self.expr_field(lhs),
                TokenKind::SepOpenSquare => self.expr_index(lhs),
                TokenKind::Keyword => self.expr_type_test(lhs),
                _ => {
                    let op = self.consume();
                    let rhs = self.expr(precedence);
                    Node::BinaryExpr {
                        lhs: Box::new(lhs),
                        op,
                        rhs: Box::new(rhs),
                    }
                }
            };
        }
        lhs
    }

    fn expr_lhs(&mut self) -> Node {
        if self.peek(0).cat() == TokenCat::Operator {
            let op = self.consume();
            let precedence = lhs_op_precedence(&op);
            if precedence == 0 {
                return err_invalid_unary_op(op, self.expr(0));
            }
            let operand = self.expr(precedence);
            return Node::UnaryExpr {
                op,
                operand: Box::new(operand),
            };
        }
        self.expr_primary()
    }

    fn expr_primary(&mut self) -> Node {
        match self.peek(0).cat() {
            TokenCat::Literal => Node::LitExpr {
                val: self.consume(),
            },
            TokenCat::Identifier => {
                let id = self.consume();
                if self.peek(0).kind() == TokenKind::OpEq {
                    let eq = self.consume();
                    let value = self.expr(ASSIGNMENT_PRECEDENCE);
                    return Node::ConstDeclExpr {
                        id,
                        eq,
                        value: Box::new(value),
                    };
                }
                if matches!(
                    self.peek(0).kind(),
                    TokenKind::SepOpenParen | TokenKind::OpParenParen | TokenKind::SepOpenCurly
                ) {
                    return self.expr_call(Vec::new(), id);
                }
                Node::IdExpr { id }
            }
            TokenCat::Keyword => match self.peek(0).keyword() {
                Some(Keyword::If) => self.expr_switch(),
                Some(Keyword::Lambda) => self.expr_anon_func(),
                Some(Keyword::Intrinsic) => self.expr_intrinsic(),
                Some(Keyword::Fork) | Some(Keyword::Lazy) => self.expr_modified_call(),
                _ => err_invalid_primary_expr(self.consume()),
            },
            _ => {
                if self.peek(0).kind() == TokenKind::SepOpenParen {
                    return self.expr_paren();
                }
                err_invalid_primary_expr(self.consume())
            }
        }
    }

    /// `fork`/`lazy` modifiers apply to the call expression that follows.
    fn expr_modified_call(&mut self) -> Node {
        let mut modifiers = Vec::new();
        while matches!(
            self.peek(0).keyword(),
            Some(Keyword::Fork) | Some(Keyword::Lazy)
        ) {
            modifiers.push(self.consume());
        }
        let id = self.consume();
        if id.kind() == TokenKind::Identifier
            && matches!(
                self.peek(0).kind(),
                TokenKind::SepOpenParen | TokenKind::OpParenParen | TokenKind::SepOpenCurly
            )
        {
            return self.expr_call(modifiers, id);
        }
        err_invalid_modified_call(modifiers, id)
    }

    fn expr_call(&mut self, modifiers: Vec<Token>, id: Token) -> Node {
        let type_params = (self.peek(0).kind() == TokenKind::SepOpenCurly)
            .then(|| self.next_type_param_list());
        let open = self.consume();
        let empty = open.kind() == TokenKind::OpParenParen;

        let mut args = Vec::new();
        let mut commas = Vec::new();
        if !empty {
            while self.peek(0).kind() != TokenKind::SepCloseParen && !self.peek(0).is_end() {
                args.push(self.expr(0));
                if self.peek(0).kind() == TokenKind::SepComma {
                    commas.push(self.consume());
                }
            }
        }
        let close = if empty { open.clone() } else { self.consume() };

        let type_params_valid = type_params.as_ref().is_none_or(TypeParamList::validate);
        if validate_parentheses(&open, &close)
            && type_params_valid
            && commas.len() == args.len().saturating_sub(1)
        {
            return Node::CallExpr {
                modifiers,
                id,
                type_params,
                open,
                args,
                commas,
                close,
            };
        }
        err_invalid_call_expr(modifiers, id, type_params, open, args, commas, close)
    }

    fn expr_group(&mut self, first: Node, precedence: i32) -> Node {
        let mut exprs = vec![first];
        let mut semis = Vec::new();
        while self.peek(0).kind() == TokenKind::OpSemi {
            semis.push(self.consume());
            exprs.push(self.expr(precedence));
        }
        Node::GroupExpr { exprs, semis }
    }

    fn expr_conditional(&mut self, cond: Node) -> Node {
        let qmark = self.consume();
        let if_branch = self.expr(GROUPING_PRECEDENCE);
        let colon = self.consume();
        let else_branch = self.expr(GROUPING_PRECEDENCE);

        if qmark.kind() == TokenKind::OpQMark && colon.kind() == TokenKind::SepColon {
            return Node::ConditionalExpr {
                cond: Box::new(cond),
                qmark,
                if_branch: Box::new(if_branch),
                colon,
                else_branch: Box::new(else_branch),
            };
        }
        err_invalid_conditional_expr(cond, qmark, if_branch, colon, else_branch)
    }

    fn expr_field(&mut self, lhs: Node) -> Node {
        let dot = self.consume();
        let id = self.consume();

        if dot.kind() == TokenKind::OpDot && id.kind() == TokenKind::Identifier {
            return Node::FieldExpr {
                lhs: Box::new(lhs),
                dot,
                id,
            };
        }
        err_invalid_field_expr(lhs, dot, id)
    }

    fn expr_index(&mut self, lhs: Node) -> Node {
        let open = self.consume();
        let mut args = Vec::new();
        let mut commas = Vec::new();
        while self.peek(0).kind() != TokenKind::SepCloseSquare && !self.peek(0).is_end() {
            args.push(self.expr(0));
            if self.peek(0).kind() == TokenKind::SepComma {
                commas.push(self.consume());
            }
        }
        let close = self.consume();

        if open.kind() == TokenKind::SepOpenSquare
            && close.kind() == TokenKind::SepCloseSquare
            && !args.is_empty()
            && commas.len() == args.len() - 1
        {
            return Node::IndexExpr {
                lhs: Box::new(lhs),
                open,
                args,
                commas,
                close,
            };
        }
        err_invalid_index_expr(lhs, open, args, commas, close)
    }

    fn expr_type_test(&mut self, lhs: Node) -> Node {
        let kw = self.consume();
        let ty = self.next_type();
        let id = self.consume();

        let kw_valid = matches!(kw.keyword(), Some(Keyword::Is) | Some(Keyword::As));
        let id_valid = id.kind() == TokenKind::Identifier || id.kind() == TokenKind::Discard;
        if kw_valid && ty.validate() && id_valid {
            return Node::TypeTestExpr {
                lhs: Box::new(lhs),
                kw,
                ty,
                id,
            };
        }
        err_invalid_type_test_expr(lhs, kw, ty, id)
    }

    fn expr_paren(&mut self) -> Node {
        let open = self.consume();
        let expr = self.expr(0);
        let close = self.consume();

        if open.kind() == TokenKind::SepOpenParen && close.kind() == TokenKind::SepCloseParen {
            return Node::ParenExpr {
                open,
                expr: Box::new(expr),
                close,
            };
        }
        err_invalid_paren_expr(open, expr, close)
    }

    fn expr_switch(&mut self) -> Node {
        let mut if_clauses = Vec::new();
        loop {
            if_clauses.push(self.expr_switch_if());
            if self.peek(0).keyword() != Some(Keyword::If) {
                break;
            }
        }
        let else_clause = (self.peek(0).keyword() == Some(Keyword::Else))
            .then(|| Box::new(self.expr_switch_else()));
        Node::SwitchExpr {
            if_clauses,
            else_clause,
        }
    }

    fn expr_switch_if(&mut self) -> Node {
        let kw = self.consume();
        let cond = self.expr(0);
        let arrow = self.consume();
        let expr = self.expr(0);

        if kw.keyword() == Some(Keyword::If) && arrow.kind() == TokenKind::SepArrow {
            return Node::SwitchExprIf {
                kw,
                cond: Box::new(cond),
                arrow,
                expr: Box::new(expr),
            };
        }
        err_invalid_switch_if(kw, cond, arrow, expr)
    }

    fn expr_switch_else(&mut self) -> Node {
        let kw = self.consume();
        let arrow = self.consume();
        let expr = self.expr(0);

        if kw.keyword() == Some(Keyword::Else) && arrow.kind() == TokenKind::SepArrow {
            return Node::SwitchExprElse {
                kw,
                arrow,
                expr: Box::new(expr),
            };
        }
        err_invalid_switch_else(kw, arrow, expr)
    }

    fn expr_anon_func(&mut self) -> Node {
        let kw = self.consume();
        let mut modifiers = Vec::new();
        while self.peek(0).keyword() == Some(Keyword::Impure) {
            modifiers.push(self.consume());
        }
        let open = self.consume();
        let empty = open.kind() == TokenKind::OpParenParen;

        let mut args = Vec::new();
        let mut commas = Vec::new();
        if !empty {
            while self.peek(0).kind() == TokenKind::Identifier
                || self.peek(0).kind() == TokenKind::SepComma
            {
                let ty = self.next_type();
                let arg_id = self.consume();
                args.push(ArgSpec { ty, id: arg_id });
                if self.peek(0).kind() == TokenKind::SepComma {
                    commas.push(self.consume());
                }
            }
        }
        let close = if empty { open.clone() } else { self.consume() };

        let ret_type = (self.peek(0).kind() == TokenKind::SepArrow).then(|| {
            let arrow = self.consume();
            let ty = self.next_type();
            RetTypeSpec { arrow, ty }
        });
        let body = self.expr(0);

        let ret_type_valid = ret_type.as_ref().is_none_or(RetTypeSpec::validate);
        if kw.keyword() == Some(Keyword::Lambda)
            && validate_parentheses(&open, &close)
            && args.iter().all(ArgSpec::validate)
            && commas.len() == args.len().saturating_sub(1)
            && ret_type_valid
        {
            return Node::AnonFuncExpr {
                kw,
                modifiers,
                open,
                args,
                commas,
                close,
                ret_type,
                body: Box::new(body),
            };
        }
        err_invalid_anon_func_expr(kw, modifiers, open, args, commas, close, ret_type, body)
    }

    fn expr_intrinsic(&mut self) -> Node {
        let kw = self.consume();
        let open = self.consume();
        let intrinsic = self.consume();
        let close = self.consume();
        let type_params = (self.peek(0).kind() == TokenKind::SepOpenCurly)
            .then(|| self.next_type_param_list());

        let type_params_valid = type_params.as_ref().is_none_or(TypeParamList::validate);
        if kw.keyword() == Some(Keyword::Intrinsic)
            && open.kind() == TokenKind::SepOpenCurly
            && intrinsic.kind() == TokenKind::Identifier
            && close.kind() == TokenKind::SepCloseCurly
            && type_params_valid
        {
            return Node::IntrinsicExpr {
                kw,
                open,
                intrinsic,
                close,
                type_params,
            };
        }
        err_invalid_intrinsic_expr(kw, open, intrinsic, close, type_params)
    }

    // Types.

    fn next_type(&mut self) -> Type {
        let id = self.consume();
        if self.peek(0).kind() == TokenKind::SepOpenCurly {
            let params = self.next_type_param_list();
            return Type::with_params(id, params);
        }
        Type::new(id)
    }

    fn next_type_param_list(&mut self) -> TypeParamList {
        let open = self.consume();
        let mut params = Vec::new();
        let mut commas = Vec::new();
        while self.peek(0).kind() != TokenKind::SepCloseCurly && !self.peek(0).is_end() {
            params.push(self.next_type());
            if self.peek(0).kind() == TokenKind::SepComma {
                commas.push(self.consume());
            }
        }
        let close = self.consume();
        TypeParamList {
            open,
            params,
            commas,
            close,
        }
    }

    fn next_type_sub_list(&mut self) -> TypeSubList {
        let open = self.consume();
        let mut subs = Vec::new();
        let mut commas = Vec::new();
        while self.peek(0).kind() != TokenKind::SepCloseCurly && !self.peek(0).is_end() {
            subs.push(self.consume());
            if self.peek(0).kind() == TokenKind::SepComma {
                commas.push(self.consume());
            }
        }
        let close = self.consume();
        TypeSubList {
            open,
            subs,
            commas,
            close,
        }
    }

    // Look-ahead plumbing.

    fn peek(&mut self, ahead: usize) -> &Token {
        while self.buffer.len() <= ahead {
            let token = self
                .input
                .next()
                .unwrap_or_else(|| end_token(Span::zero()));
            self.buffer.push_back(token);
        }
        &self.buffer[ahead]
    }

    fn consume(&mut self) -> Token {
        self.peek(0);
        self.buffer.pop_front().expect("peek filled the buffer")
    }
}

// Error factories. Each packs the tokens consumed for the construct plus
// any partial child nodes, so diagnostics can report the exact span.

fn error_node(msg: impl Into<String>, tokens: Vec<Token>, children: Vec<Node>) -> Node {
    Node::Error {
        msg: msg.into(),
        tokens,
        children,
    }
}

fn flatten_type(ty: &Type, tokens: &mut Vec<Token>) {
    tokens.push(ty.id.clone());
    if let Some(params) = &ty.params {
        tokens.push(params.open.clone());
        for param in &params.params {
            flatten_type(param, tokens);
        }
        tokens.extend(params.commas.iter().cloned());
        tokens.push(params.close.clone());
    }
}

fn flatten_args(args: &[ArgSpec], tokens: &mut Vec<Token>) {
    for arg in args {
        flatten_type(&arg.ty, tokens);
        tokens.push(arg.id.clone());
    }
}

fn flatten_type_subs(type_subs: &Option<TypeSubList>, tokens: &mut Vec<Token>) {
    if let Some(subs) = type_subs {
        tokens.push(subs.open.clone());
        tokens.extend(subs.subs.iter().cloned());
        tokens.extend(subs.commas.iter().cloned());
        tokens.push(subs.close.clone());
    }
}

fn flatten_ret_type(ret_type: &Option<RetTypeSpec>, tokens: &mut Vec<Token>) {
    if let Some(spec) = ret_type {
        tokens.push(spec.arrow.clone());
        flatten_type(&spec.ty, tokens);
    }
}

fn err_invalid_stmt_import(kw: Token, path: Token) -> Node {
    error_node("invalid import statement", vec![kw, path], vec![])
}

#[allow(clippy::too_many_arguments)]
fn err_invalid_stmt_func_decl(
    kw: Token,
    id: Token,
    type_subs: Option<TypeSubList>,
    open: Token,
    args: Vec<ArgSpec>,
    commas: Vec<Token>,
    close: Token,
    ret_type: Option<RetTypeSpec>,
    body: Node,
) -> Node {
    let mut tokens = vec![kw, id];
    flatten_type_subs(&type_subs, &mut tokens);
    tokens.push(open);
    flatten_args(&args, &mut tokens);
    tokens.extend(commas);
    tokens.push(close);
    flatten_ret_type(&ret_type, &mut tokens);
    error_node("invalid function declaration", tokens, vec![body])
}

fn err_invalid_stmt_struct_decl(
    kw: Token,
    id: Token,
    type_subs: Option<TypeSubList>,
    eq: Option<Token>,
    fields: Vec<ArgSpec>,
    commas: Vec<Token>,
) -> Node {
    let mut tokens = vec![kw, id];
    flatten_type_subs(&type_subs, &mut tokens);
    tokens.extend(eq);
    flatten_args(&fields, &mut tokens);
    tokens.extend(commas);
    error_node("invalid struct declaration", tokens, vec![])
}

fn err_invalid_stmt_union_decl(
    kw: Token,
    id: Token,
    type_subs: Option<TypeSubList>,
    eq: Token,
    types: Vec<Type>,
    commas: Vec<Token>,
) -> Node {
    let mut tokens = vec![kw, id];
    flatten_type_subs(&type_subs, &mut tokens);
    tokens.push(eq);
    for ty in &types {
        flatten_type(ty, &mut tokens);
    }
    tokens.extend(commas);
    error_node("invalid union declaration", tokens, vec![])
}

fn err_invalid_stmt_enum_decl(
    kw: Token,
    id: Token,
    eq: Token,
    entries: Vec<EnumEntrySpec>,
    commas: Vec<Token>,
) -> Node {
    let mut tokens = vec![kw, id, eq];
    for entry in entries {
        tokens.push(entry.id);
        tokens.extend(entry.colon);
        tokens.extend(entry.minus);
        tokens.extend(entry.value);
    }
    tokens.extend(commas);
    error_node("invalid enum declaration", tokens, vec![])
}

fn err_invalid_stmt_exec(
    action: Token,
    open: Token,
    args: Vec<Node>,
    commas: Vec<Token>,
    close: Token,
) -> Node {
    let mut tokens = vec![action, open];
    tokens.extend(commas);
    tokens.push(close);
    error_node("invalid execute statement", tokens, args)
}

fn err_invalid_unary_op(op: Token, operand: Node) -> Node {
    error_node("invalid unary operator", vec![op], vec![operand])
}

fn err_invalid_primary_expr(token: Token) -> Node {
    // Lexer errors surface here; keep their diagnostic.
    let msg = match token.error_message() {
        Some(msg) => msg.to_string(),
        None => "invalid primary expression".to_string(),
    };
    error_node(msg, vec![token], vec![])
}

fn err_invalid_modified_call(modifiers: Vec<Token>, id: Token) -> Node {
    let mut tokens = modifiers;
    tokens.push(id);
    error_node("invalid call modifiers", tokens, vec![])
}

fn err_invalid_call_expr(
    modifiers: Vec<Token>,
    id: Token,
    type_params: Option<TypeParamList>,
    open: Token,
    args: Vec<Node>,
    commas: Vec<Token>,
    close: Token,
) -> Node {
    let mut tokens = modifiers;
    tokens.push(id);
    if let Some(params) = &type_params {
        tokens.push(params.open.clone());
        for param in &params.params {
            flatten_type(param, &mut tokens);
        }
        tokens.extend(params.commas.iter().cloned());
        tokens.push(params.close.clone());
    }
    tokens.push(open);
    tokens.extend(commas);
    tokens.push(close);
    error_node("invalid call expression", tokens, args)
}

fn err_invalid_conditional_expr(
    cond: Node,
    qmark: Token,
    if_branch: Node,
    colon: Token,
    else_branch: Node,
) -> Node {
    error_node(
        "invalid conditional expression",
        vec![qmark, colon],
        vec![cond, if_branch, else_branch],
    )
}

fn err_invalid_field_expr(lhs: Node, dot: Token, id: Token) -> Node {
    error_node("invalid field expression", vec![dot, id], vec![lhs])
}

fn err_invalid_index_expr(
    lhs: Node,
    open: Token,
    args: Vec<Node>,
    commas: Vec<Token>,
    close: Token,
) -> Node {
    let mut tokens = vec![open];
    tokens.extend(commas);
    tokens.push(close);
    let mut children = vec![lhs];
    children.extend(args);
    error_node("invalid index expression", tokens, children)
}

fn err_invalid_type_test_expr(lhs: Node, kw: Token, ty: Type, id: Token) -> Node {
    let mut tokens = vec![kw];
    flatten_type(&ty, &mut tokens);
    tokens.push(id);
    error_node("invalid type test expression", tokens, vec![lhs])
}

fn err_invalid_paren_expr(open: Token, expr: Node, close: Token) -> Node {
    error_node(
        "invalid parenthesized expression",
        vec![open, close],
        vec![expr],
    )
}

fn err_invalid_switch_if(kw: Token, cond: Node, arrow: Token, expr: Node) -> Node {
    error_node("invalid switch if clause", vec![kw, arrow], vec![cond, expr])
}

fn err_invalid_switch_else(kw: Token, arrow: Token, expr: Node) -> Node {
    error_node("invalid switch else clause", vec![kw, arrow], vec![expr])
}

#[allow(clippy::too_many_arguments)]
fn err_invalid_anon_func_expr(
    kw: Token,
    modifiers: Vec<Token>,
    open: Token,
    args: Vec<ArgSpec>,
    commas: Vec<Token>,
    close: Token,
    ret_type: Option<RetTypeSpec>,
    body: Node,
) -> Node {
    let mut tokens = vec![kw];
    tokens.extend(modifiers);
    tokens.push(open);
    flatten_args(&args, &mut tokens);
    tokens.extend(commas);
    tokens.push(close);
    flatten_ret_type(&ret_type, &mut tokens);
    error_node("invalid anonymous function", tokens, vec![body])
}

fn err_invalid_intrinsic_expr(
    kw: Token,
    open: Token,
    intrinsic: Token,
    close: Token,
    type_params: Option<TypeParamList>,
) -> Node {
    let mut tokens = vec![kw, open, intrinsic, close];
    if let Some(params) = &type_params {
        tokens.push(params.open.clone());
        for param in &params.params {
            flatten_type(param, &mut tokens);
        }
        tokens.extend(params.commas.iter().cloned());
        tokens.push(params.close.clone());
    }
    error_node("invalid intrinsic expression", tokens, vec![])
}

fn err_max_expr_recursion_depth_reached(token: Token) -> Node {
    error_node(
        "maximum expression recursion depth reached",
        vec![token],
        vec![],
    )
}
