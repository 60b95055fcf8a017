use crate::functions;
use iacguard_hcl::{BinaryOp, Expr, ForExpr, ObjectKey, TemplatePart, TraversalOp, UnaryOp, Value};
use std::collections::BTreeMap;

/// Name bindings visible to an expression.
///
/// The module context is borrowed for the duration of a pass; iteration variables
/// (`each`, `count`, `for` bindings, dynamic block iterators) live in child frames.
pub struct Scope<'a> {
    parent: Option<&'a Scope<'a>>,
    globals: Option<&'a BTreeMap<String, Value>>,
    vars: BTreeMap<String, Value>,
}

impl<'a> Scope<'a> {
    pub fn new(globals: &'a BTreeMap<String, Value>) -> Self {
        Self {
            parent: None,
            globals: Some(globals),
            vars: BTreeMap::new(),
        }
    }

    /// Scope with no module context; only literals and functions evaluate.
    pub fn empty() -> Scope<'static> {
        Scope {
            parent: None,
            globals: None,
            vars: BTreeMap::new(),
        }
    }

    pub fn child(&self) -> Scope<'_> {
        Scope {
            parent: Some(self),
            globals: None,
            vars: BTreeMap::new(),
        }
    }

    pub fn bind(&mut self, name: impl Into<String>, value: Value) {
        self.vars.insert(name.into(), value);
    }

    pub fn lookup(&self, name: &str) -> Option<&Value> {
        if let Some(v) = self.vars.get(name) {
            return Some(v);
        }
        if let Some(v) = self.globals.and_then(|g| g.get(name)) {
            return Some(v);
        }
        self.parent.and_then(|p| p.lookup(name))
    }

    /// Evaluates `expr`. Unresolvable references, type errors and unsupported constructs
    /// yield [`Value::Unknown`] instead of failing.
    pub fn eval(&self, expr: &Expr) -> Value {
        match expr {
            Expr::Literal(v) => v.clone(),
            Expr::Template(parts) => self.eval_template(parts),
            Expr::Variable(name) => self.lookup(name).cloned().unwrap_or(Value::Unknown),
            Expr::Traversal { base, ops } => {
                let value = self.eval(base);
                self.apply_ops(value, ops)
            }
            Expr::Call {
                name,
                args,
                expand_final,
            } => self.eval_call(name, args, *expand_final),
            Expr::Conditional {
                cond,
                then,
                otherwise,
            } => match self.eval(cond).as_bool() {
                Some(true) => self.eval(then),
                Some(false) => self.eval(otherwise),
                None => Value::Unknown,
            },
            Expr::For(for_expr) => self.eval_for(for_expr),
            Expr::Array(items) => Value::List(items.iter().map(|e| self.eval(e)).collect()),
            Expr::Object(entries) => {
                let mut map = BTreeMap::new();
                for (key, value) in entries {
                    let key = match key {
                        ObjectKey::Ident(name) => name.clone(),
                        ObjectKey::Expr(e) => match self.eval(e).to_template_string() {
                            Some(k) => k,
                            None => return Value::Unknown,
                        },
                    };
                    map.insert(key, self.eval(value));
                }
                Value::Map(map)
            }
            Expr::Unary { op, expr } => {
                let value = self.eval(expr);
                match op {
                    UnaryOp::Neg => value.as_f64().map(|n| Value::Number(-n)).unwrap_or(Value::Unknown),
                    UnaryOp::Not => value.as_bool().map(|b| Value::Bool(!b)).unwrap_or(Value::Unknown),
                }
            }
            Expr::Binary { op, lhs, rhs } => binary(*op, self.eval(lhs), self.eval(rhs)),
        }
    }

    fn eval_template(&self, parts: &[TemplatePart]) -> Value {
        if let [TemplatePart::Interpolation(only)] = parts {
            return self.eval(only);
        }

        let mut out = String::new();
        for part in parts {
            match part {
                TemplatePart::Literal(s) => out.push_str(s),
                TemplatePart::Interpolation(e) => match self.eval(e).to_template_string() {
                    Some(s) => out.push_str(&s),
                    None => return Value::Unknown,
                },
                TemplatePart::Directive => return Value::Unknown,
            }
        }
        Value::String(out)
    }

    fn apply_ops(&self, mut value: Value, ops: &[TraversalOp]) -> Value {
        for (i, op) in ops.iter().enumerate() {
            value = match op {
                TraversalOp::GetAttr(name) => match &value {
                    // Legacy index syntax: `list.0`.
                    Value::List(_) => match name.parse::<f64>() {
                        Ok(n) => value.index(&Value::Number(n)),
                        Err(_) => Value::Unknown,
                    },
                    _ => value.get_attr(name),
                },
                TraversalOp::Index(key) => value.index(&self.eval(key)),
                TraversalOp::AttrSplat | TraversalOp::FullSplat => {
                    let rest = &ops[i + 1..];
                    return match value {
                        Value::Unknown => Value::Unknown,
                        Value::Null => Value::List(Vec::new()),
                        Value::List(items) => {
                            Value::List(items.into_iter().map(|v| self.apply_ops(v, rest)).collect())
                        }
                        single => Value::List(vec![self.apply_ops(single, rest)]),
                    };
                }
            };
            if value.is_unknown() {
                return Value::Unknown;
            }
        }
        value
    }

    fn eval_call(&self, name: &str, args: &[Expr], expand_final: bool) -> Value {
        match name {
            "try" => {
                return args
                    .iter()
                    .map(|a| self.eval(a))
                    .find(Value::is_wholly_known)
                    .unwrap_or(Value::Unknown);
            }
            "can" => {
                return match args {
                    [only] => Value::Bool(self.eval(only).is_wholly_known()),
                    _ => Value::Unknown,
                };
            }
            _ => {}
        }

        let mut values: Vec<Value> = args.iter().map(|a| self.eval(a)).collect();
        if expand_final {
            match values.pop() {
                Some(Value::List(rest)) => values.extend(rest),
                Some(_) => return Value::Unknown,
                None => {}
            }
        }
        functions::call(name, values)
    }

    fn eval_for(&self, for_expr: &ForExpr) -> Value {
        let pairs: Vec<(Value, Value)> = match self.eval(&for_expr.collection) {
            Value::List(items) => items
                .into_iter()
                .enumerate()
                .map(|(i, v)| (Value::Number(i as f64), v))
                .collect(),
            Value::Map(map) => map.into_iter().map(|(k, v)| (Value::String(k), v)).collect(),
            _ => return Value::Unknown,
        };

        let mut list = Vec::new();
        let mut object: BTreeMap<String, Value> = BTreeMap::new();
        for (key, value) in pairs {
            let mut scope = self.child();
            if let Some(key_var) = &for_expr.key_var {
                scope.bind(key_var.clone(), key);
            }
            scope.bind(for_expr.value_var.clone(), value);

            if let Some(cond) = &for_expr.cond {
                match scope.eval(cond).as_bool() {
                    Some(true) => {}
                    Some(false) => continue,
                    None => return Value::Unknown,
                }
            }

            let item = scope.eval(&for_expr.value);
            match &for_expr.key {
                None => list.push(item),
                Some(key_expr) => {
                    let Some(key) = scope.eval(key_expr).to_template_string() else {
                        return Value::Unknown;
                    };
                    if for_expr.grouping {
                        match object.entry(key).or_insert_with(|| Value::List(Vec::new())) {
                            Value::List(group) => group.push(item),
                            _ => return Value::Unknown,
                        }
                    } else {
                        object.insert(key, item);
                    }
                }
            }
        }

        if for_expr.key.is_some() {
            Value::Map(object)
        } else {
            Value::List(list)
        }
    }
}

fn binary(op: BinaryOp, lhs: Value, rhs: Value) -> Value {
    match op {
        BinaryOp::And => match (lhs.as_bool(), rhs.as_bool()) {
            (Some(false), _) | (_, Some(false)) => Value::Bool(false),
            (Some(true), Some(true)) => Value::Bool(true),
            _ => Value::Unknown,
        },
        BinaryOp::Or => match (lhs.as_bool(), rhs.as_bool()) {
            (Some(true), _) | (_, Some(true)) => Value::Bool(true),
            (Some(false), Some(false)) => Value::Bool(false),
            _ => Value::Unknown,
        },
        BinaryOp::Eq | BinaryOp::NotEq => {
            if !lhs.is_wholly_known() || !rhs.is_wholly_known() {
                return Value::Unknown;
            }
            let equal = values_equal(&lhs, &rhs);
            Value::Bool(if op == BinaryOp::Eq { equal } else { !equal })
        }
        _ => {
            let (Some(a), Some(b)) = (lhs.as_f64(), rhs.as_f64()) else {
                return Value::Unknown;
            };
            match op {
                BinaryOp::Less => Value::Bool(a < b),
                BinaryOp::LessEq => Value::Bool(a <= b),
                BinaryOp::Greater => Value::Bool(a > b),
                BinaryOp::GreaterEq => Value::Bool(a >= b),
                BinaryOp::Add => Value::Number(a + b),
                BinaryOp::Sub => Value::Number(a - b),
                BinaryOp::Mul => Value::Number(a * b),
                BinaryOp::Div if b != 0.0 => Value::Number(a / b),
                BinaryOp::Mod if b != 0.0 => Value::Number(a % b),
                _ => Value::Unknown,
            }
        }
    }
}

/// Equality without implicit string conversion, except between numbers.
pub(crate) fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x == y,
        (Value::List(x), Value::List(y)) => {
            x.len() == y.len() && x.iter().zip(y).all(|(a, b)| values_equal(a, b))
        }
        (Value::Map(x), Value::Map(y)) => {
            x.len() == y.len()
                && x.iter()
                    .zip(y)
                    .all(|((ka, va), (kb, vb))| ka == kb && values_equal(va, vb))
        }
        _ => a == b,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use iacguard_hcl::parse_file;
    use iacguard_types::RepoPath;

    /// Evaluates the `v` attribute of a one-line snippet against `globals`.
    fn eval_with(globals: &BTreeMap<String, Value>, source: &str) -> Value {
        let file = parse_file(&RepoPath::new("t.tf"), &format!("v = {source}\n")).expect("parse");
        let attr = file.attributes.first().expect("attribute");
        Scope::new(globals).eval(&attr.expr)
    }

    fn eval(source: &str) -> Value {
        eval_with(&BTreeMap::new(), source)
    }

    fn globals() -> BTreeMap<String, Value> {
        let mut var = BTreeMap::new();
        var.insert("env".to_string(), Value::string("prod"));
        var.insert(
            "names".to_string(),
            Value::List(vec![Value::string("a"), Value::string("b")]),
        );
        let mut buckets = BTreeMap::new();
        for name in ["logs", "data"] {
            let mut attrs = BTreeMap::new();
            attrs.insert("bucket".to_string(), Value::string(format!("{name}-bucket")));
            buckets.insert(name.to_string(), Value::Map(attrs));
        }

        let mut globals = BTreeMap::new();
        globals.insert("var".to_string(), Value::Map(var));
        globals.insert("aws_s3_bucket".to_string(), Value::Map(buckets));
        globals
    }

    #[test]
    fn templates_interpolate_known_values() {
        assert_eq!(
            eval_with(&globals(), r#""app-${var.env}-${1 + 1}""#),
            Value::string("app-prod-2")
        );
    }

    #[test]
    fn single_interpolation_keeps_the_value_type() {
        assert_eq!(
            eval_with(&globals(), r#""${var.names}""#),
            Value::List(vec![Value::string("a"), Value::string("b")])
        );
    }

    #[test]
    fn unresolved_references_are_unknown() {
        assert_eq!(eval_with(&globals(), "var.missing"), Value::Unknown);
        assert_eq!(eval_with(&globals(), r#""x-${local.nope}""#), Value::Unknown);
        assert_eq!(eval_with(&globals(), "aws_instance.web.id"), Value::Unknown);
    }

    #[test]
    fn conditionals_need_a_known_condition() {
        assert_eq!(eval_with(&globals(), r#"var.env == "prod" ? 3 : 1"#), Value::Number(3.0));
        assert_eq!(eval_with(&globals(), "var.missing ? 3 : 1"), Value::Unknown);
    }

    #[test]
    fn for_expressions_build_lists_and_objects() {
        assert_eq!(
            eval_with(&globals(), "[for n in var.names : upper(n)]"),
            Value::List(vec![Value::string("A"), Value::string("B")])
        );
        let object = eval_with(&globals(), "{for i, n in var.names : n => i}");
        assert_eq!(object.get_attr("b"), Value::Number(1.0));
        let filtered = eval_with(&globals(), r#"[for n in var.names : n if n != "a"]"#);
        assert_eq!(filtered, Value::List(vec![Value::string("b")]));
    }

    #[test]
    fn splat_projects_over_lists() {
        let mut globals = globals();
        globals.insert(
            "items".to_string(),
            Value::List(vec![
                Value::Map(BTreeMap::from([("id".to_string(), Value::string("x"))])),
                Value::Map(BTreeMap::from([("id".to_string(), Value::string("y"))])),
            ]),
        );
        assert_eq!(
            eval_with(&globals, "items[*].id"),
            Value::List(vec![Value::string("x"), Value::string("y")])
        );
    }

    #[test]
    fn arithmetic_and_comparison() {
        assert_eq!(eval("2 * 3"), Value::Number(6.0));
        assert_eq!(eval("7 % 4"), Value::Number(3.0));
        assert_eq!(eval("1 / 0"), Value::Unknown);
        assert_eq!(eval("3 >= 3"), Value::Bool(true));
        assert_eq!(eval("!true"), Value::Bool(false));
        assert_eq!(eval("-4"), Value::Number(-4.0));
    }

    #[test]
    fn logical_operators_short_on_known_sides() {
        let g = globals();
        assert_eq!(eval_with(&g, "false && var.missing"), Value::Bool(false));
        assert_eq!(eval_with(&g, "true || var.missing"), Value::Bool(true));
        assert_eq!(eval_with(&g, "true && var.missing"), Value::Unknown);
    }

    #[test]
    fn try_and_can_treat_unknown_as_failure() {
        let g = globals();
        assert_eq!(eval_with(&g, r#"try(var.missing, "fallback")"#), Value::string("fallback"));
        assert_eq!(eval_with(&g, "can(var.env)"), Value::Bool(true));
        assert_eq!(eval_with(&g, "can(var.missing)"), Value::Bool(false));
    }

    #[test]
    fn child_frames_shadow_globals() {
        let g = globals();
        let root = Scope::new(&g);
        let mut child = root.child();
        child.bind("var", Value::string("shadowed"));
        assert_eq!(child.lookup("var"), Some(&Value::string("shadowed")));
        assert!(root.lookup("var").is_some_and(|v| v.as_map().is_some()));
        assert!(child.lookup("aws_s3_bucket").is_some());
    }
}
