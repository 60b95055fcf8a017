use crate::block::{Attribute, Block, File};
use crate::expr::{BinaryOp, Expr, ForExpr, ObjectKey, TemplatePart, TraversalOp, UnaryOp};
use crate::value::Value;
use hcl_edit::Span;
use hcl_edit::expr::{BinaryOperator, Expression, FuncCall, ObjectKey as HclObjectKey, TraversalOperator, UnaryOperator};
use hcl_edit::structure::{self as hcl_structure, BlockLabel, Body};
use hcl_edit::template::{Element, Template};
use iacguard_types::{RepoPath, SourceRange};
use std::ops::Range;

#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("parse {path}: {message}")]
    Syntax { path: RepoPath, message: String },
}

/// Parse one HCL configuration (or variable definition) file.
pub fn parse_file(path: &RepoPath, source: &str) -> Result<File, ParseError> {
    let body = hcl_edit::parser::parse_body(source).map_err(|e| ParseError::Syntax {
        path: path.clone(),
        message: e.to_string(),
    })?;

    let converter = Converter {
        path,
        lines: LineIndex::new(source),
    };
    let (attributes, blocks) = converter.body(&body);

    Ok(File {
        path: path.clone(),
        attributes,
        blocks,
    })
}

struct LineIndex {
    starts: Vec<usize>,
}

impl LineIndex {
    fn new(source: &str) -> Self {
        let mut starts = vec![0];
        starts.extend(source.match_indices('\n').map(|(i, _)| i + 1));
        Self { starts }
    }

    fn byte_offset_to_line(&self, offset: usize) -> u32 {
        let line = match self.starts.binary_search(&offset) {
            Ok(i) => i + 1,
            Err(i) => i,
        };
        u32::try_from(line).unwrap_or(u32::MAX)
    }
}

struct Converter<'a> {
    path: &'a RepoPath,
    lines: LineIndex,
}

impl Converter<'_> {
    fn range(&self, span: Option<Range<usize>>) -> SourceRange {
        match span {
            Some(span) => {
                let start = self.lines.byte_offset_to_line(span.start);
                let last_byte = span.end.saturating_sub(1).max(span.start);
                SourceRange::new(self.path.clone(), start, self.lines.byte_offset_to_line(last_byte))
            }
            None => SourceRange::new(self.path.clone(), 1, 1),
        }
    }

    fn body(&self, body: &Body) -> (Vec<Attribute>, Vec<Block>) {
        let mut attributes = Vec::new();
        let mut blocks = Vec::new();
        for structure in body.iter() {
            if let Some(attr) = structure.as_attribute() {
                attributes.push(self.attribute(attr));
            } else if let Some(block) = structure.as_block() {
                blocks.push(self.block(block));
            }
        }
        (attributes, blocks)
    }

    fn attribute(&self, attr: &hcl_structure::Attribute) -> Attribute {
        Attribute {
            name: attr.key.as_str().to_string(),
            expr: self.expr(&attr.value),
            range: self.range(attr.span()),
        }
    }

    fn block(&self, block: &hcl_structure::Block) -> Block {
        let labels = block
            .labels
            .iter()
            .map(|label| match label {
                BlockLabel::Ident(ident) => ident.as_str().to_string(),
                BlockLabel::String(s) => s.value().clone(),
            })
            .collect();
        let (attributes, blocks) = self.body(&block.body);

        Block {
            kind: block.ident.as_str().to_string(),
            labels,
            attributes,
            blocks,
            range: self.range(block.span()),
        }
    }

    #[allow(unreachable_patterns)]
    fn expr(&self, expr: &Expression) -> Expr {
        match expr {
            Expression::Null(_) => Expr::Literal(Value::Null),
            Expression::Bool(b) => Expr::Literal(Value::Bool(*b.value())),
            Expression::Number(n) => Expr::Literal(
                n.value()
                    .as_f64()
                    .map(Value::Number)
                    .unwrap_or(Value::Unknown),
            ),
            Expression::String(s) => Expr::Literal(Value::String(s.value().clone())),
            Expression::Array(array) => Expr::Array(array.iter().map(|e| self.expr(e)).collect()),
            Expression::Object(object) => Expr::Object(
                object
                    .iter()
                    .map(|(key, value)| {
                        let key = match key {
                            HclObjectKey::Ident(ident) => ObjectKey::Ident(ident.as_str().to_string()),
                            HclObjectKey::Expression(e) => ObjectKey::Expr(self.expr(e)),
                        };
                        (key, self.expr(value.expr()))
                    })
                    .collect(),
            ),
            Expression::StringTemplate(template) => Expr::Template(self.template(template)),
            Expression::HeredocTemplate(heredoc) => Expr::Template(self.template(&heredoc.template)),
            Expression::Parenthesis(inner) => self.expr(inner.inner()),
            Expression::Variable(ident) => Expr::Variable(ident.as_str().to_string()),
            Expression::Conditional(cond) => Expr::Conditional {
                cond: Box::new(self.expr(&cond.cond_expr)),
                then: Box::new(self.expr(&cond.true_expr)),
                otherwise: Box::new(self.expr(&cond.false_expr)),
            },
            Expression::FuncCall(call) => self.call(call),
            Expression::Traversal(traversal) => Expr::Traversal {
                base: Box::new(self.expr(&traversal.expr)),
                ops: traversal
                    .operators
                    .iter()
                    .map(|op| self.traversal_op(op.value()))
                    .collect(),
            },
            Expression::UnaryOp(op) => Expr::Unary {
                op: match op.operator.value() {
                    UnaryOperator::Neg => UnaryOp::Neg,
                    _ => UnaryOp::Not,
                },
                expr: Box::new(self.expr(&op.expr)),
            },
            Expression::BinaryOp(op) => match binary_op(op.operator.value()) {
                Some(bin) => Expr::Binary {
                    op: bin,
                    lhs: Box::new(self.expr(&op.lhs_expr)),
                    rhs: Box::new(self.expr(&op.rhs_expr)),
                },
                None => Expr::Literal(Value::Unknown),
            },
            Expression::ForExpr(for_expr) => Expr::For(Box::new(ForExpr {
                key_var: for_expr
                    .intro
                    .key_var
                    .as_ref()
                    .map(|k| k.as_str().to_string()),
                value_var: for_expr.intro.value_var.as_str().to_string(),
                collection: self.expr(&for_expr.intro.collection_expr),
                key: for_expr.key_expr.as_ref().map(|k| self.expr(k)),
                value: self.expr(&for_expr.value_expr),
                cond: for_expr.cond.as_ref().map(|c| self.expr(&c.expr)),
                grouping: for_expr.grouping,
            })),
            _ => Expr::Literal(Value::Unknown),
        }
    }

    fn call(&self, call: &FuncCall) -> Expr {
        let mut name = String::new();
        for segment in &call.name.namespace {
            name.push_str(segment.as_str());
            name.push_str("::");
        }
        name.push_str(call.name.name.as_str());

        Expr::Call {
            name,
            args: call.args.iter().map(|a| self.expr(a)).collect(),
            expand_final: call.args.expand_final(),
        }
    }

    #[allow(unreachable_patterns)]
    fn traversal_op(&self, op: &TraversalOperator) -> TraversalOp {
        match op {
            TraversalOperator::GetAttr(ident) => TraversalOp::GetAttr(ident.as_str().to_string()),
            TraversalOperator::Index(e) => TraversalOp::Index(self.expr(e)),
            TraversalOperator::LegacyIndex(i) => {
                TraversalOp::Index(Expr::Literal(Value::Number(*i.value() as f64)))
            }
            TraversalOperator::AttrSplat(_) => TraversalOp::AttrSplat,
            TraversalOperator::FullSplat(_) => TraversalOp::FullSplat,
            _ => TraversalOp::FullSplat,
        }
    }

    #[allow(unreachable_patterns)]
    fn template(&self, template: &Template) -> Vec<TemplatePart> {
        template
            .iter()
            .map(|element| match element {
                Element::Literal(s) => TemplatePart::Literal(s.value().clone()),
                Element::Interpolation(i) => TemplatePart::Interpolation(self.expr(&i.expr)),
                _ => TemplatePart::Directive,
            })
            .collect()
    }
}

#[allow(unreachable_patterns)]
fn binary_op(op: &BinaryOperator) -> Option<BinaryOp> {
    Some(match op {
        BinaryOperator::Eq => BinaryOp::Eq,
        BinaryOperator::NotEq => BinaryOp::NotEq,
        BinaryOperator::Less => BinaryOp::Less,
        BinaryOperator::LessEq => BinaryOp::LessEq,
        BinaryOperator::Greater => BinaryOp::Greater,
        BinaryOperator::GreaterEq => BinaryOp::GreaterEq,
        BinaryOperator::Plus => BinaryOp::Add,
        BinaryOperator::Minus => BinaryOp::Sub,
        BinaryOperator::Mul => BinaryOp::Mul,
        BinaryOperator::Div => BinaryOp::Div,
        BinaryOperator::Mod => BinaryOp::Mod,
        BinaryOperator::And => BinaryOp::And,
        BinaryOperator::Or => BinaryOp::Or,
        _ => return None,
    })
}
