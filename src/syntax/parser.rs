//! Recursive-descent parser for the prism surface language.
//!
//! The parser builds IR directly into an unchecked arena: identifiers
//! become `Unbound` placeholders and numeric literals `UntypedNumber`
//! nodes, both resolved by the bind and typing passes. With
//! `front_end` on, the grammar accepts infix expressions and inserts the
//! implicit `merge`/`continue` terminators of structured constructs; with
//! it off, only the printer's explicit IR subset is accepted.

use crate::diagnostic::Diagnostic;
use crate::ir::arena::IrArena;
use crate::ir::build;
use crate::ir::node::{
    AddressSpace, BranchMode, EntryPointKind, FnAttributes, MergeKind, Node, Op,
};
use crate::span::{Span, Spanned};
use crate::syntax::lexeme::Lexeme;
use crate::syntax::lexer::Lexer;

#[derive(Clone, Copy, Debug)]
pub struct ParserConfig {
    /// Accept the surface grammar (infix operators, implicit terminators)
    /// rather than the explicit IR subset.
    pub front_end: bool,
}

impl Default for ParserConfig {
    fn default() -> Self {
        ParserConfig { front_end: true }
    }
}

/// Parse a whole program into `arena`, returning its root.
pub fn parse(
    config: ParserConfig,
    source: &str,
    arena: &mut IrArena,
) -> Result<Node, Vec<Diagnostic>> {
    let (tokens, lex_errors) = Lexer::new(source).tokenize();
    if !lex_errors.is_empty() {
        return Err(lex_errors);
    }
    let mut parser = Parser {
        tokens,
        pos: 0,
        arena,
        config,
    };
    parser.parse_program().map_err(|e| vec![e])
}

const MAX_PRECEDENCE: u8 = 10;

struct Parser<'a> {
    tokens: Vec<Spanned<Lexeme>>,
    pos: usize,
    arena: &'a mut IrArena,
    config: ParserConfig,
}

type PResult<T> = Result<T, Diagnostic>;

impl Parser<'_> {
    // ── Token plumbing ──

    fn peek(&self) -> &Lexeme {
        &self.tokens[self.pos].item
    }

    fn peek2(&self) -> &Lexeme {
        &self.tokens[(self.pos + 1).min(self.tokens.len() - 1)].item
    }

    fn span(&self) -> Span {
        self.tokens[self.pos].span
    }

    fn bump(&mut self) -> Lexeme {
        let tok = self.tokens[self.pos].item.clone();
        if self.pos + 1 < self.tokens.len() {
            self.pos += 1;
        }
        tok
    }

    fn accept(&mut self, token: &Lexeme) -> bool {
        if self.peek() == token {
            self.bump();
            true
        } else {
            false
        }
    }

    fn expect(&mut self, token: &Lexeme) -> PResult<()> {
        if self.accept(token) {
            Ok(())
        } else {
            Err(self.err(format!(
                "expected {}, found {}",
                token.description(),
                self.peek().description()
            )))
        }
    }

    fn accept_ident(&mut self) -> Option<String> {
        if let Lexeme::Ident(name) = self.peek() {
            let name = name.clone();
            self.bump();
            Some(name)
        } else {
            None
        }
    }

    fn expect_ident(&mut self) -> PResult<String> {
        self.accept_ident()
            .ok_or_else(|| self.err(format!("expected identifier, found {}", self.peek().description())))
    }

    fn err(&self, message: String) -> Diagnostic {
        Diagnostic::error_at(self.span(), message)
    }

    // ── Types ──

    fn accept_unqualified_type(&mut self) -> PResult<Option<Node>> {
        let ty = match self.peek() {
            Lexeme::I8Ty => {
                self.bump();
                build::int8_type(self.arena)
            }
            Lexeme::I16Ty => {
                self.bump();
                build::int16_type(self.arena)
            }
            Lexeme::I32Ty => {
                self.bump();
                build::int32_type(self.arena)
            }
            Lexeme::I64Ty => {
                self.bump();
                build::int64_type(self.arena)
            }
            Lexeme::FloatTy => {
                self.bump();
                build::float_type(self.arena)
            }
            Lexeme::BoolTy => {
                self.bump();
                build::bool_type(self.arena)
            }
            Lexeme::MaskTy => {
                self.bump();
                build::mask_type(self.arena)
            }
            Lexeme::Ptr => {
                self.bump();
                let space = self.expect_ptr_address_space()?;
                let pointee = self.expect_unqualified_type()?;
                build::ptr_type(self.arena, space, pointee)
            }
            Lexeme::LBracket if self.config.front_end => {
                self.bump();
                let elem = self.expect_unqualified_type()?;
                self.expect(&Lexeme::Semicolon)?;
                let size = self
                    .accept_value()?
                    .ok_or_else(|| self.err("expected an array size".to_string()))?;
                self.expect(&Lexeme::RBracket)?;
                build::arr_type(self.arena, elem, Some(size))
            }
            _ => return Ok(None),
        };
        Ok(Some(ty))
    }

    fn expect_unqualified_type(&mut self) -> PResult<Node> {
        self.accept_unqualified_type()?
            .ok_or_else(|| self.err(format!("expected a type, found {}", self.peek().description())))
    }

    fn expect_ptr_address_space(&mut self) -> PResult<AddressSpace> {
        let space = match self.peek() {
            Lexeme::Global => AddressSpace::GlobalPhysical,
            Lexeme::Private => AddressSpace::PrivatePhysical,
            Lexeme::Shared => AddressSpace::SharedPhysical,
            _ => {
                return Err(self.err("expected an address space qualifier".to_string()));
            }
        };
        self.bump();
        Ok(space)
    }

    fn accept_uniformity(&mut self) -> Option<bool> {
        if self.accept(&Lexeme::Uniform) {
            Some(true)
        } else if self.accept(&Lexeme::Varying) {
            Some(false)
        } else {
            None
        }
    }

    fn accept_maybe_qualified_type(&mut self) -> PResult<Option<Node>> {
        let qualifier = self.accept_uniformity();
        let unqualified = self.accept_unqualified_type()?;
        match (qualifier, unqualified) {
            (Some(uniform), Some(ty)) => Ok(Some(build::qualified(self.arena, uniform, ty))),
            (None, ty) => Ok(ty),
            (Some(_), None) => {
                Err(self.err("expected a type after the uniformity qualifier".to_string()))
            }
        }
    }

    fn accept_qualified_type(&mut self) -> PResult<Option<Node>> {
        let Some(uniform) = self.accept_uniformity() else {
            return Ok(None);
        };
        let ty = self.expect_unqualified_type()?;
        Ok(Some(build::qualified(self.arena, uniform, ty)))
    }

    /// Comma-separated maybe-qualified types, e.g. a return-type list.
    fn accept_types(&mut self) -> PResult<Vec<Node>> {
        let mut types = Vec::new();
        while let Some(ty) = self.accept_maybe_qualified_type()? {
            types.push(ty);
            self.accept(&Lexeme::Comma);
        }
        Ok(types)
    }

    /// `(qualified-type name, ...)`; with `with_defaults`, each also takes
    /// `= operand`.
    fn expect_parameters(&mut self, with_defaults: bool) -> PResult<(Vec<Node>, Vec<Node>)> {
        self.expect(&Lexeme::LParen)?;
        let mut params = Vec::new();
        let mut defaults = Vec::new();
        loop {
            if self.accept(&Lexeme::RParen) {
                break;
            }
            let ty = self
                .accept_qualified_type()?
                .ok_or_else(|| self.err("expected a qualified parameter type".to_string()))?;
            let name = self.expect_ident()?;
            params.push(build::var(self.arena, Some(ty), &name));

            if with_defaults {
                self.expect(&Lexeme::Eq)?;
                let value = self.expect_operand()?;
                defaults.push(value);
            }

            if !self.accept(&Lexeme::Comma) {
                self.expect(&Lexeme::RParen)?;
                break;
            }
        }
        Ok((params, defaults))
    }

    // ── Values & expressions ──

    fn accept_value(&mut self) -> PResult<Option<Node>> {
        if let Some(name) = self.accept_ident() {
            return Ok(Some(build::unbound(self.arena, &name)));
        }
        let value = match self.peek() {
            Lexeme::Number(text) => {
                let text = text.clone();
                self.bump();
                build::untyped_number(self.arena, &text)
            }
            Lexeme::True => {
                self.bump();
                build::true_lit(self.arena)
            }
            Lexeme::False => {
                self.bump();
                build::false_lit(self.arena)
            }
            _ => return Ok(None),
        };
        Ok(Some(value))
    }

    /// Operand position: a full expression in front-end mode, a bare value
    /// in IR mode.
    fn expect_operand(&mut self) -> PResult<Node> {
        self.accept_operand()?
            .ok_or_else(|| self.err(format!("expected a value, found {}", self.peek().description())))
    }

    fn accept_operand(&mut self) -> PResult<Option<Node>> {
        if self.config.front_end {
            self.accept_expr(MAX_PRECEDENCE)
        } else {
            self.accept_value()
        }
    }

    fn infix_operator(&self) -> Option<(Op, u8)> {
        let (op, precedence) = match self.peek() {
            Lexeme::Star => (Op::Mul, 1),
            Lexeme::Slash => (Op::Div, 1),
            Lexeme::Percent => (Op::Mod, 1),
            Lexeme::Plus => (Op::Add, 2),
            Lexeme::Minus => (Op::Sub, 2),
            Lexeme::Lt => (Op::Lt, 3),
            Lexeme::LtEq => (Op::Lte, 3),
            Lexeme::Gt => (Op::Gt, 3),
            Lexeme::GtEq => (Op::Gte, 3),
            Lexeme::EqEq => (Op::Eq, 4),
            Lexeme::BangEq => (Op::Neq, 4),
            Lexeme::Amp => (Op::And, 5),
            Lexeme::Caret => (Op::Xor, 6),
            Lexeme::Pipe => (Op::Or, 7),
            _ => return None,
        };
        Some((op, precedence))
    }

    fn accept_expr(&mut self, outer_precedence: u8) -> PResult<Option<Node>> {
        let Some(mut expr) = self.accept_primary_expr()? else {
            return Ok(None);
        };
        while let Some((op, precedence)) = self.infix_operator() {
            if precedence > outer_precedence {
                break;
            }
            self.bump();
            let rhs = self
                .accept_expr(precedence - 1)?
                .ok_or_else(|| self.err("expected a right-hand operand".to_string()))?;
            expr = build::prim_op(self.arena, op, &[expr, rhs]);
        }
        Ok(Some(expr))
    }

    fn accept_primary_expr(&mut self) -> PResult<Option<Node>> {
        match self.peek() {
            Lexeme::Minus => {
                self.bump();
                let operand = self
                    .accept_primary_expr()?
                    .ok_or_else(|| self.err("expected an operand after `-`".to_string()))?;
                // Fold negation into the literal text; the typing pass
                // parses it.
                if let crate::ir::node::NodeKind::UntypedNumber { text } =
                    *self.arena.kind(operand)
                {
                    let negated = format!("-{}", self.arena.str(text));
                    return Ok(Some(build::untyped_number(self.arena, &negated)));
                }
                return Ok(Some(build::prim_op(self.arena, Op::Neg, &[operand])));
            }
            Lexeme::LParen => {
                self.bump();
                let expr = self.expect_operand()?;
                self.expect(&Lexeme::RParen)?;
                return Ok(Some(expr));
            }
            _ => {}
        }

        let mut expr = match self.accept_primop()? {
            Some(primop) => Some(primop),
            None => self.accept_value()?,
        };

        // Postfix call: `f(a, b)`.
        while let Some(callee) = expr {
            if *self.peek() == Lexeme::LParen {
                let args = self.expect_operands()?;
                expr = Some(build::call(self.arena, callee, &args));
                continue;
            }
            expr = Some(callee);
            break;
        }
        Ok(expr)
    }

    /// `(a, b, c)`, possibly empty.
    fn expect_operands(&mut self) -> PResult<Vec<Node>> {
        self.expect(&Lexeme::LParen)?;
        let mut operands = Vec::new();
        loop {
            if self.accept(&Lexeme::RParen) {
                break;
            }
            let value = self.expect_operand()?;
            operands.push(value);
            if !self.accept(&Lexeme::Comma) {
                self.expect(&Lexeme::RParen)?;
                break;
            }
        }
        Ok(operands)
    }

    /// A primop application: `add(a, b)`, `alloca(i32)`, or the IR-mode
    /// `call (callee) (args)`.
    fn accept_primop(&mut self) -> PResult<Option<Node>> {
        match self.peek() {
            Lexeme::Alloca => {
                self.bump();
                self.expect(&Lexeme::LParen)?;
                let elem = self.expect_unqualified_type()?;
                self.expect(&Lexeme::RParen)?;
                return Ok(Some(build::prim_op(self.arena, Op::Alloca, &[elem])));
            }
            Lexeme::Call => {
                self.bump();
                self.expect(&Lexeme::LParen)?;
                let callee = self.expect_operand()?;
                self.expect(&Lexeme::RParen)?;
                let args = self.expect_operands()?;
                return Ok(Some(build::call(self.arena, callee, &args)));
            }
            Lexeme::Ident(name) => {
                let Some(op) = Op::from_name(name) else {
                    return Ok(None);
                };
                if *self.peek2() != Lexeme::LParen {
                    return Ok(None);
                }
                self.bump();
                let operands = self.expect_operands()?;
                return Ok(Some(build::prim_op(self.arena, op, &operands)));
            }
            _ => Ok(None),
        }
    }

    // ── Instructions ──

    fn accept_control_flow_instruction(&mut self) -> PResult<Option<Node>> {
        match self.peek() {
            Lexeme::If => {
                self.bump();
                let yield_types = self.accept_types()?;
                self.expect(&Lexeme::LParen)?;
                let condition = self.expect_operand()?;
                self.expect(&Lexeme::RParen)?;
                let implicit = if self.config.front_end {
                    Some(build::merge_construct(self.arena, MergeKind::Selection, &[]))
                } else {
                    None
                };
                let if_true = self.expect_block(implicit)?;
                let if_false = if self.accept(&Lexeme::Else) {
                    Some(self.expect_block(implicit)?)
                } else {
                    None
                };
                Ok(Some(build::if_instr(
                    self.arena,
                    &yield_types,
                    condition,
                    if_true,
                    if_false,
                )))
            }
            Lexeme::Loop => {
                self.bump();
                let yield_types = self.accept_types()?;
                let (params, initial_args) = self.expect_parameters(true)?;
                let implicit = if self.config.front_end {
                    Some(build::merge_construct(self.arena, MergeKind::Continue, &[]))
                } else {
                    None
                };
                let body = self.expect_block(implicit)?;
                Ok(Some(build::loop_instr(
                    self.arena,
                    &yield_types,
                    &params,
                    &initial_args,
                    body,
                )))
            }
            _ => Ok(None),
        }
    }

    fn accept_instruction(&mut self) -> PResult<Option<Node>> {
        let instruction = if self.config.front_end {
            self.accept_expr(MAX_PRECEDENCE)?
        } else {
            self.accept_primop()?
        };

        if let Some(instruction) = instruction {
            self.expect(&Lexeme::Semicolon)?;
            if !self.arena.kind(instruction).is_instruction() {
                return Err(self.err("a bare value is not an instruction".to_string()));
            }
            return Ok(Some(instruction));
        }

        let control_flow = self.accept_control_flow_instruction()?;
        if control_flow.is_some() {
            // Tolerate a trailing semicolon after the closing brace.
            self.accept(&Lexeme::Semicolon);
        }
        Ok(control_flow)
    }

    fn accept_instruction_maybe_with_let(&mut self) -> PResult<Option<Node>> {
        if self.accept(&Lexeme::Let) {
            let mut names = vec![self.expect_ident()?];
            while self.accept(&Lexeme::Comma) {
                names.push(self.expect_ident()?);
            }
            self.expect(&Lexeme::Eq)?;
            let instruction = self
                .accept_instruction()?
                .ok_or_else(|| self.err("expected an instruction after `=`".to_string()))?;
            if !self.arena.kind(instruction).is_instruction() {
                return Err(self.err("`let` binds the results of an instruction".to_string()));
            }
            let vars: Vec<Node> = names
                .iter()
                .map(|name| build::var(self.arena, None, name))
                .collect();
            return Ok(Some(build::let_with_vars(
                self.arena,
                instruction,
                &vars,
                false,
            )));
        }

        if self.accept(&Lexeme::Var) {
            let mut vars = Vec::new();
            loop {
                let ty = self.expect_unqualified_type()?;
                let ty = build::qualified(self.arena, false, ty);
                let name = self.expect_ident()?;
                vars.push(build::var(self.arena, Some(ty), &name));
                if !self.accept(&Lexeme::Comma) {
                    break;
                }
            }
            self.expect(&Lexeme::Eq)?;
            let instruction = self
                .accept_instruction()?
                .ok_or_else(|| self.err("`var` needs an initializing instruction".to_string()))?;
            if !self.arena.kind(instruction).is_instruction() {
                return Err(self.err("`var` binds the results of an instruction".to_string()));
            }
            return Ok(Some(build::let_with_vars(
                self.arena,
                instruction,
                &vars,
                true,
            )));
        }

        self.accept_instruction()
    }

    // ── Terminators & blocks ──

    fn optional_args(&mut self) -> PResult<Vec<Node>> {
        if *self.peek() == Lexeme::LParen {
            self.expect_operands()
        } else {
            Ok(Vec::new())
        }
    }

    fn accept_terminator(&mut self) -> PResult<Option<Node>> {
        let terminator = match self.peek() {
            Lexeme::Jump => {
                self.bump();
                self.expect(&Lexeme::LParen)?;
                let target = self.expect_operand()?;
                self.expect(&Lexeme::RParen)?;
                let args = self.optional_args()?;
                build::jump(self.arena, target, &args)
            }
            Lexeme::Branch => {
                self.bump();
                self.expect(&Lexeme::LParen)?;
                let condition = self.expect_operand()?;
                self.expect(&Lexeme::Comma)?;
                let true_target = self.expect_operand()?;
                self.expect(&Lexeme::Comma)?;
                let false_target = self.expect_operand()?;
                self.expect(&Lexeme::RParen)?;
                let args = self.optional_args()?;
                build::branch(
                    self.arena,
                    BranchMode::IfElse,
                    Some(condition),
                    &[true_target, false_target],
                    &args,
                )
            }
            Lexeme::TailCall => {
                self.bump();
                self.expect(&Lexeme::LParen)?;
                let target = self.expect_operand()?;
                self.expect(&Lexeme::RParen)?;
                let args = self.optional_args()?;
                build::tailcall(self.arena, target, &args)
            }
            Lexeme::Join => {
                self.bump();
                self.expect(&Lexeme::LParen)?;
                let join_at = self.expect_operand()?;
                self.expect(&Lexeme::Comma)?;
                let mask = self.expect_operand()?;
                self.expect(&Lexeme::RParen)?;
                let args = self.optional_args()?;
                build::join(self.arena, join_at, mask, &args, true)
            }
            Lexeme::Callc => {
                self.bump();
                self.expect(&Lexeme::LParen)?;
                let ret_cont = self.expect_operand()?;
                self.expect(&Lexeme::Comma)?;
                let callee = self.expect_operand()?;
                self.expect(&Lexeme::RParen)?;
                let args = self.optional_args()?;
                build::callc(self.arena, ret_cont, callee, &args, false)
            }
            Lexeme::Return => {
                self.bump();
                let args = self.optional_args()?;
                build::fn_ret(self.arena, &args)
            }
            Lexeme::Merge => {
                self.bump();
                let args = self.optional_args()?;
                build::merge_construct(self.arena, MergeKind::Selection, &args)
            }
            Lexeme::Continue => {
                self.bump();
                let args = self.optional_args()?;
                build::merge_construct(self.arena, MergeKind::Continue, &args)
            }
            Lexeme::Break => {
                self.bump();
                let args = self.optional_args()?;
                build::merge_construct(self.arena, MergeKind::Break, &args)
            }
            Lexeme::Unreachable => {
                self.bump();
                build::unreachable(self.arena)
            }
            _ => return Ok(None),
        };
        Ok(Some(terminator))
    }

    fn expect_block(&mut self, implicit_terminator: Option<Node>) -> PResult<Node> {
        self.expect(&Lexeme::LBrace)?;

        let mut instructions = Vec::new();
        while let Some(instruction) = self.accept_instruction_maybe_with_let()? {
            instructions.push(instruction);
        }

        let terminator = self.accept_terminator()?;
        if terminator.is_some() {
            self.expect(&Lexeme::Semicolon)?;
        }
        let terminator = match terminator.or(implicit_terminator) {
            Some(t) => t,
            None => {
                return Err(
                    self.err("expected a terminator: return, jump, branch ...".to_string())
                )
            }
        };

        // Named continuations: `name: (params) { ... }`.
        let mut continuations = Vec::new();
        let mut continuation_vars = Vec::new();
        while matches!(self.peek(), Lexeme::Ident(_)) && *self.peek2() == Lexeme::Colon {
            let name = self.expect_ident()?;
            self.expect(&Lexeme::Colon)?;
            let (params, _) = self.expect_parameters(false)?;
            let body = self.expect_block(None)?;

            let continuation = build::function(
                self.arena,
                FnAttributes::continuation(),
                &name,
                &params,
                &[],
            );
            build::set_function_body(self.arena, continuation, body);
            continuations.push(continuation);
            continuation_vars.push(build::var(self.arena, None, &name));
        }

        self.expect(&Lexeme::RBrace)?;

        Ok(build::parsed_block(
            self.arena,
            &instructions,
            terminator,
            &continuations,
            &continuation_vars,
        ))
    }

    // ── Declarations ──

    fn accept_const(&mut self) -> PResult<Option<Node>> {
        if !self.accept(&Lexeme::Const) {
            return Ok(None);
        }
        let ty_hint = self.accept_unqualified_type()?;
        let name = self.expect_ident()?;
        self.expect(&Lexeme::Eq)?;
        let value = self.expect_operand()?;
        self.expect(&Lexeme::Semicolon)?;

        let decl = build::constant(self.arena, &name, ty_hint);
        build::set_constant_value(self.arena, decl, value);
        Ok(Some(decl))
    }

    fn accept_fn_decl(&mut self) -> PResult<Option<Node>> {
        if !self.accept(&Lexeme::Fn) {
            return Ok(None);
        }

        let mut attrs = FnAttributes::plain();
        while let Lexeme::Attribute(name) = self.peek() {
            attrs.entry_point = match name.as_str() {
                "compute" => EntryPointKind::Compute,
                "vertex" => EntryPointKind::Vertex,
                "fragment" => EntryPointKind::Fragment,
                other => {
                    return Err(self.err(format!("unknown entry-point attribute `@{}`", other)))
                }
            };
            self.bump();
        }

        let name = self.expect_ident()?;
        let returns = self.accept_types()?;
        let (params, _) = self.expect_parameters(false)?;

        let implicit = if returns.is_empty() {
            Some(build::fn_ret(self.arena, &[]))
        } else {
            None
        };
        let body = self.expect_block(implicit)?;
        self.expect(&Lexeme::Semicolon)?;

        let function = build::function(self.arena, attrs, &name, &params, &returns);
        build::set_function_body(self.arena, function, body);
        Ok(Some(function))
    }

    fn accept_global_var_decl(&mut self) -> PResult<Option<Node>> {
        let space = match self.peek() {
            Lexeme::Private => AddressSpace::PrivateLogical,
            Lexeme::Shared => AddressSpace::SharedLogical,
            Lexeme::Subgroup => AddressSpace::SubgroupPhysical,
            Lexeme::Extern => AddressSpace::External,
            Lexeme::Input => AddressSpace::Input,
            Lexeme::Output => AddressSpace::Output,
            _ => return Ok(None),
        };
        self.bump();

        let ty = self.expect_unqualified_type()?;
        let name = self.expect_ident()?;
        let init = if self.accept(&Lexeme::Eq) {
            Some(self.expect_operand()?)
        } else {
            None
        };
        self.expect(&Lexeme::Semicolon)?;

        let decl = build::global_var(self.arena, ty, &name, space);
        if let Some(init) = init {
            build::set_global_init(self.arena, decl, init);
        }
        Ok(Some(decl))
    }

    fn parse_program(&mut self) -> PResult<Node> {
        let mut declarations = Vec::new();
        while *self.peek() != Lexeme::Eof {
            let decl = match self.accept_const()? {
                Some(decl) => Some(decl),
                None => match self.accept_fn_decl()? {
                    Some(decl) => Some(decl),
                    None => self.accept_global_var_decl()?,
                },
            };
            match decl {
                Some(decl) => declarations.push(decl),
                None => {
                    return Err(self.err(format!(
                        "expected a declaration, found {}",
                        self.peek().description()
                    )))
                }
            }
        }
        Ok(build::root(self.arena, &declarations))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::arena::ArenaConfig;
    use crate::ir::node::NodeKind;
    use crate::ir::print::print_node;

    fn parse_ok(source: &str) -> (IrArena, Node) {
        let mut arena = IrArena::new(ArenaConfig::unchecked());
        let root = parse(ParserConfig::default(), source, &mut arena)
            .unwrap_or_else(|e| panic!("parse failed: {:?}", e));
        (arena, root)
    }

    #[test]
    fn test_parse_trivial_return() {
        let (arena, root) = parse_ok("fn main i32() { return (42); };");
        let text = print_node(&arena, root);
        assert!(text.contains("fn main"), "got: {}", text);
        assert!(text.contains("return (42)"), "got: {}", text);
    }

    #[test]
    fn test_parse_infix_arithmetic() {
        let (arena, root) = parse_ok("fn f i32(varying i32 x) { let y = x + 1; return (y); };");
        let text = print_node(&arena, root);
        assert!(text.contains("add(`x`, 1)"), "got: {}", text);
    }

    #[test]
    fn test_parse_precedence() {
        let (arena, root) = parse_ok("fn f i32() { let y = add(1, 2 * 3); return (y); };");
        let text = print_node(&arena, root);
        assert!(text.contains("add(1, mul(2, 3))"), "got: {}", text);
    }

    #[test]
    fn test_parse_if_without_else() {
        let (arena, root) =
            parse_ok("fn g(varying bool c) { if (c) { let x = add(1, 0); }; return; };");
        let decls = match *arena.kind(root) {
            NodeKind::Root { declarations } => arena.nodes(declarations).to_vec(),
            _ => unreachable!(),
        };
        let body = match *arena.kind(decls[0]) {
            NodeKind::Function { block, .. } => block.unwrap(),
            _ => unreachable!(),
        };
        let instrs = match *arena.kind(body) {
            NodeKind::ParsedBlock { instructions, .. } => arena.nodes(instructions).to_vec(),
            _ => unreachable!(),
        };
        assert!(matches!(
            *arena.kind(instrs[0]),
            NodeKind::If { if_false: None, .. }
        ));
    }

    #[test]
    fn test_parse_loop_with_break() {
        let (arena, root) = parse_ok("fn h() { loop () { break; }; return; };");
        let text = print_node(&arena, root);
        assert!(text.contains("loop"), "got: {}", text);
        assert!(text.contains("break"), "got: {}", text);
    }

    #[test]
    fn test_parse_tail_call_and_continuation() {
        let source = "fn f() {\
                        tail_call (k);\
                      };\
                      fn k() { return; };";
        let (arena, root) = parse_ok(source);
        let text = print_node(&arena, root);
        assert!(text.contains("tail_call (`k`)"), "got: {}", text);
    }

    #[test]
    fn test_parse_block_continuations() {
        let source = "fn f(varying bool c) {\
                        branch (c, t, e);\
                        t: () { return; }\
                        e: () { return; }\
                      };";
        let (arena, root) = parse_ok(source);
        let text = print_node(&arena, root);
        assert!(text.contains("branch (`c`, `t`, `e`)"), "got: {}", text);
        assert!(text.contains("t: ("), "got: {}", text);
    }

    #[test]
    fn test_parse_global_and_const() {
        let (arena, root) = parse_ok(
            "const i32 LIMIT = 16;\
             private i32 counter = 0;\
             fn main() { return; };",
        );
        let text = print_node(&arena, root);
        assert!(text.contains("const LIMIT"), "got: {}", text);
        assert!(text.contains("private i32 counter = 0"), "got: {}", text);
    }

    #[test]
    fn test_parse_reports_missing_terminator() {
        let mut arena = IrArena::new(ArenaConfig::unchecked());
        let result = parse(
            ParserConfig { front_end: false },
            "fn f i32() { };",
            &mut arena,
        );
        let errors = result.unwrap_err();
        assert!(errors[0].message.contains("terminator"), "{:?}", errors);
    }

    /// Erase `_<digits>` suffix chains so two prints that differ only in
    /// fresh variable IDs compare equal.
    fn strip_var_ids(text: &str) -> String {
        let bytes = text.as_bytes();
        let mut out = String::new();
        let mut i = 0;
        while i < bytes.len() {
            if bytes[i] == b'_' {
                let mut j = i + 1;
                while j < bytes.len() && bytes[j].is_ascii_digit() {
                    j += 1;
                }
                if j > i + 1 && (j == bytes.len() || !bytes[j].is_ascii_alphabetic()) {
                    i = j;
                    continue;
                }
            }
            out.push(bytes[i] as char);
            i += 1;
        }
        out
    }

    /// Printing a parser-shaped program and reading it back reproduces it
    /// up to variable renaming.
    #[test]
    fn test_print_parse_round_trip_up_to_renaming() {
        let mut arena = IrArena::new(ArenaConfig::unchecked());
        let i32_t = build::int32_type(&mut arena);
        let q = build::qualified(&mut arena, false, i32_t);
        let x = build::var(&mut arena, Some(q), "x");
        let f = build::function(&mut arena, FnAttributes::plain(), "f", &[x], &[i32_t]);
        let x_ref = build::unbound(&mut arena, "x");
        let one = build::untyped_number(&mut arena, "1");
        let sum = build::prim_op(&mut arena, Op::Add, &[x_ref, one]);
        let y = build::var(&mut arena, None, "y");
        let bound = build::let_with_vars(&mut arena, sum, &[y], false);
        let y_ref = build::unbound(&mut arena, "y");
        let ret = build::fn_ret(&mut arena, &[y_ref]);
        let body = build::parsed_block(&mut arena, &[bound], ret, &[], &[]);
        build::set_function_body(&mut arena, f, body);
        let root = build::root(&mut arena, &[f]);

        let printed = print_node(&arena, root);

        let mut reparse_arena = IrArena::new(ArenaConfig::unchecked());
        let reparsed = parse(ParserConfig::default(), &printed, &mut reparse_arena)
            .unwrap_or_else(|e| panic!("printed program failed to reparse: {:?}\n{}", e, printed));
        let reprinted = print_node(&reparse_arena, reparsed);

        assert_eq!(
            strip_var_ids(&printed),
            strip_var_ids(&reprinted),
            "printed:\n{}\nreprinted:\n{}",
            printed,
            reprinted
        );
    }

    #[test]
    fn test_parse_negative_literal_folds() {
        let (arena, root) = parse_ok("const i32 NEG = -7;");
        let text = print_node(&arena, root);
        assert!(text.contains("-7"), "got: {}", text);
    }
}
