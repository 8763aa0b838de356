//! Pest grammar parser for bundle scripts

use pest::iterators::{Pair, Pairs};
use pest::Parser;
use pest_derive::Parser;
use serde_json::Value;

use crate::error::{HostError, Result};
use crate::parser::ast::*;

#[derive(Parser)]
#[grammar = "../grammar/bundle.pest"]
pub struct BundleParser;

/// Parse a bundle script into an AST
pub fn parse_script(input: &str) -> Result<Script> {
    let pairs = BundleParser::parse(Rule::script, input)
        .map_err(|e| HostError::ParseError(e.to_string()))?;

    let pair = pairs
        .into_iter()
        .next()
        .ok_or_else(|| HostError::ParseError("Empty script".to_string()))?;

    let statements = parse_statements(pair.into_inner())?;
    Ok(Script { statements })
}

/// Parse a standalone expression, as used by dynamic evaluation
pub fn parse_expression(input: &str) -> Result<Expr> {
    let pairs = BundleParser::parse(Rule::expression, input)
        .map_err(|e| HostError::ParseError(e.to_string()))?;

    let expr = pairs
        .into_iter()
        .next()
        .and_then(|p| p.into_inner().find(|p| p.as_rule() == Rule::expr))
        .ok_or_else(|| HostError::ParseError("Expected expression".to_string()))?;

    parse_expr(expr)
}

fn is_keyword(rule: Rule) -> bool {
    matches!(
        rule,
        Rule::kw_let
            | Rule::kw_eval
            | Rule::kw_into
            | Rule::kw_print
            | Rule::kw_render
            | Rule::kw_clear
            | Rule::kw_fail
            | Rule::kw_if
            | Rule::kw_hosted
            | Rule::kw_then
            | Rule::kw_else
            | Rule::kw_end
            | Rule::kw_register
            | Rule::kw_do
            | Rule::kw_on
            | Rule::EOI
    )
}

/// Inner pairs without keyword tokens
fn significant(pair: Pair<Rule>) -> impl Iterator<Item = Pair<Rule>> {
    pair.into_inner().filter(|p| !is_keyword(p.as_rule()))
}

fn parse_statements(pairs: Pairs<Rule>) -> Result<Vec<Statement>> {
    pairs
        .filter(|p| p.as_rule() == Rule::statement)
        .map(parse_statement)
        .collect()
}

fn parse_statement(pair: Pair<Rule>) -> Result<Statement> {
    let inner = pair
        .into_inner()
        .next()
        .ok_or_else(|| HostError::ParseError("Expected statement content".to_string()))?;

    match inner.as_rule() {
        Rule::let_stmt => parse_let(inner),
        Rule::eval_stmt => parse_eval(inner),
        Rule::print_stmt => Ok(Statement::Print(single_expr(inner)?)),
        Rule::render_stmt => Ok(Statement::Render(single_expr(inner)?)),
        Rule::clear_stmt => Ok(Statement::Clear),
        Rule::fail_stmt => {
            let message = significant(inner)
                .next()
                .ok_or_else(|| HostError::ParseError("Expected FAIL message".to_string()))?;
            Ok(Statement::Fail(parse_string(message)))
        }
        Rule::if_stmt => parse_if(inner),
        Rule::register_stmt => parse_register(inner),
        _ => Err(HostError::ParseError(format!(
            "Unexpected rule in statement: {:?}",
            inner.as_rule()
        ))),
    }
}

fn parse_let(pair: Pair<Rule>) -> Result<Statement> {
    let mut inner = significant(pair);

    let name = inner
        .next()
        .map(|p| p.as_str().to_string())
        .ok_or_else(|| HostError::ParseError("Expected variable name".to_string()))?;

    let value = inner
        .next()
        .ok_or_else(|| HostError::ParseError("Expected value".to_string()))?;

    Ok(Statement::Let {
        name,
        value: parse_expr(value)?,
    })
}

fn parse_eval(pair: Pair<Rule>) -> Result<Statement> {
    let mut inner = significant(pair);

    let source = inner
        .next()
        .map(parse_string)
        .ok_or_else(|| HostError::ParseError("Expected source string".to_string()))?;

    let target = inner
        .next()
        .map(|p| p.as_str().to_string())
        .ok_or_else(|| HostError::ParseError("Expected INTO target".to_string()))?;

    Ok(Statement::Eval { source, target })
}

fn single_expr(pair: Pair<Rule>) -> Result<Expr> {
    let expr = significant(pair)
        .next()
        .ok_or_else(|| HostError::ParseError("Expected expression".to_string()))?;
    parse_expr(expr)
}

fn parse_if(pair: Pair<Rule>) -> Result<Statement> {
    let mut then_branch = Vec::new();
    let mut else_branch = Vec::new();

    for part in significant(pair) {
        match part.as_rule() {
            Rule::then_block => then_branch = parse_statements(part.into_inner())?,
            Rule::else_block => else_branch = parse_statements(part.into_inner())?,
            _ => {}
        }
    }

    Ok(Statement::IfHosted {
        then_branch,
        else_branch,
    })
}

fn parse_register(pair: Pair<Rule>) -> Result<Statement> {
    let mut name = None;
    let mut hooks = Vec::new();

    for part in significant(pair) {
        match part.as_rule() {
            Rule::string => name = Some(parse_string(part)),
            Rule::hook_block => hooks.push(parse_hook_block(part)?),
            _ => {}
        }
    }

    let name = name.ok_or_else(|| HostError::ParseError("Expected REGISTER name".to_string()))?;
    Ok(Statement::Register(Registration { name, hooks }))
}

fn parse_hook_block(pair: Pair<Rule>) -> Result<HookBlock> {
    let mut kind = None;
    let mut body = Vec::new();

    for part in significant(pair) {
        match part.as_rule() {
            Rule::hook_kind => kind = Some(parse_hook_kind(part.as_str())?),
            Rule::statement => body.push(parse_statement(part)?),
            _ => {}
        }
    }

    let kind = kind.ok_or_else(|| HostError::ParseError("Expected hook kind".to_string()))?;
    Ok(HookBlock { kind, body })
}

fn parse_hook_kind(s: &str) -> Result<HookKind> {
    match s.to_ascii_lowercase().as_str() {
        "bootstrap" => Ok(HookKind::Bootstrap),
        "mount" => Ok(HookKind::Mount),
        "unmount" => Ok(HookKind::Unmount),
        other => Err(HostError::ParseError(format!("Unknown hook: {}", other))),
    }
}

fn parse_expr(pair: Pair<Rule>) -> Result<Expr> {
    let operands = pair
        .into_inner()
        .map(parse_operand)
        .collect::<Result<Vec<_>>>()?;
    Ok(Expr { operands })
}

fn parse_operand(pair: Pair<Rule>) -> Result<Operand> {
    match pair.as_rule() {
        Rule::string => Ok(Operand::Literal(Value::String(parse_string(pair)))),
        Rule::number => parse_number(pair.as_str()).map(Operand::Literal),
        Rule::boolean => Ok(Operand::Literal(Value::Bool(
            pair.as_str().eq_ignore_ascii_case("true"),
        ))),
        Rule::null => Ok(Operand::Literal(Value::Null)),
        Rule::ident => Ok(Operand::Ident(pair.as_str().to_string())),
        _ => Err(HostError::ParseError(format!(
            "Unexpected operand: {:?}",
            pair.as_rule()
        ))),
    }
}

fn parse_number(s: &str) -> Result<Value> {
    if let Ok(n) = s.parse::<i64>() {
        return Ok(Value::from(n));
    }
    s.parse::<f64>()
        .ok()
        .and_then(serde_json::Number::from_f64)
        .map(Value::Number)
        .ok_or_else(|| HostError::ParseError(format!("Invalid number: {}", s)))
}

fn parse_string(pair: Pair<Rule>) -> String {
    let raw = pair
        .into_inner()
        .next()
        .map(|p| p.as_str())
        .unwrap_or_default();
    unescape(raw)
}

fn unescape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('t') => out.push('\t'),
            Some(other) => out.push(other),
            None => out.push('\\'),
        }
    }
    out
}
