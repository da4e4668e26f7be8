use regex::{Captures, Regex};
use serde::{Serialize, Serializer};
use serde_json::{Map, Value, json};
use thiserror::Error;

use crate::value::{FieldMap, FieldValue, ValueKind};

/// Deepest expression nesting accepted when parsing a template.
pub const MAX_EXPR_DEPTH: usize = 64;

/// Expression AST used for derived fields and document conditions.
///
/// In a template definition a node is either a bare string / boolean literal or an
/// object tagged by `op`.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(FieldValue),
    Field {
        name: String,
    },
    Concat {
        args: Vec<Expr>,
    },
    If {
        condition: Box<Expr>,
        then: Box<Expr>,
        otherwise: Box<Expr>,
    },
    Split {
        arg: Box<Expr>,
        delimiter: String,
    },
    Index {
        arr: Box<Expr>,
        pos: usize,
    },
    Eq {
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Upper {
        arg: Box<Expr>,
    },
    Lower {
        arg: Box<Expr>,
    },
    Replace {
        string: Box<Expr>,
        pattern: Box<Expr>,
        replacement: Box<Expr>,
    },
}

/// Malformed expression found while loading a template.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ExprError {
    #[error("expression object has no `op`: {0}")]
    MissingOp(String),
    #[error("unknown operation `{0}`")]
    UnknownOp(String),
    #[error("operation `{op}` is missing `{operand}`")]
    MissingOperand { op: String, operand: &'static str },
    #[error("operation `{op}` expects `{operand}` to be {expected}")]
    InvalidOperand {
        op: String,
        operand: &'static str,
        expected: &'static str,
    },
    #[error("literal must be text, a boolean or a list of text, found {0}")]
    InvalidLiteral(String),
    #[error("not an expression: {0}")]
    NotAnExpression(String),
    #[error("expression nesting exceeds {0} levels")]
    TooDeep(usize),
}

/// Failure while evaluating a derived field or a document condition.
#[derive(Debug, Clone, Error)]
pub enum EvaluationError {
    #[error("undefined field `{0}`")]
    UndefinedField(String),
    #[error("`{op}` expects {expected}, found {found}")]
    TypeMismatch {
        op: &'static str,
        expected: ValueKind,
        found: ValueKind,
    },
    #[error("index {pos} is out of range for a list of {len} items")]
    IndexOutOfRange { pos: usize, len: usize },
    #[error("invalid pattern `{pattern}`: {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },
    #[error("derived field `{field}`: {source}")]
    Derived {
        field: String,
        #[source]
        source: Box<EvaluationError>,
    },
    #[error("conditions of document `{document}`: {source}")]
    Condition {
        document: String,
        #[source]
        source: Box<EvaluationError>,
    },
}

impl Expr {
    /// Parses an expression node from its declarative form.
    pub fn parse(value: &Value) -> Result<Self, ExprError> {
        parse_node(value, 0)
    }

    /// Evaluates the expression against the fields computed so far.
    pub fn derive(&self, fields: &FieldMap) -> Result<FieldValue, EvaluationError> {
        match self {
            Expr::Literal(value) => Ok(value.clone()),
            Expr::Field { name } => fields
                .get(name)
                .cloned()
                .ok_or_else(|| EvaluationError::UndefinedField(name.clone())),
            Expr::Concat { args } => {
                let mut out = String::new();
                for arg in args {
                    out.push_str(&arg.derive(fields)?.to_string());
                }
                Ok(FieldValue::Text(out))
            }
            Expr::If {
                condition,
                then,
                otherwise,
            } => {
                if condition.derive(fields)?.is_truthy() {
                    then.derive(fields)
                } else {
                    otherwise.derive(fields)
                }
            }
            Expr::Split { arg, delimiter } => {
                let text = expect_text("split", arg.derive(fields)?)?;
                let pieces = if delimiter.is_empty() {
                    text.chars().map(String::from).collect()
                } else {
                    text.split(delimiter.as_str()).map(str::to_string).collect()
                };
                Ok(FieldValue::List(pieces))
            }
            Expr::Index { arr, pos } => match arr.derive(fields)? {
                FieldValue::List(items) => items
                    .get(*pos)
                    .cloned()
                    .map(FieldValue::Text)
                    .ok_or(EvaluationError::IndexOutOfRange {
                        pos: *pos,
                        len: items.len(),
                    }),
                other => Err(EvaluationError::TypeMismatch {
                    op: "index",
                    expected: ValueKind::List,
                    found: other.kind(),
                }),
            },
            Expr::Eq { left, right } => Ok(FieldValue::Bool(
                left.derive(fields)? == right.derive(fields)?,
            )),
            Expr::Upper { arg } => {
                let text = expect_text("upper", arg.derive(fields)?)?;
                Ok(FieldValue::Text(text.to_uppercase()))
            }
            Expr::Lower { arg } => {
                let text = expect_text("lower", arg.derive(fields)?)?;
                Ok(FieldValue::Text(text.to_lowercase()))
            }
            Expr::Replace {
                string,
                pattern,
                replacement,
            } => {
                let text = expect_text("replace", string.derive(fields)?)?;
                let pattern = expect_text("replace", pattern.derive(fields)?)?;
                let replacement = expect_text("replace", replacement.derive(fields)?)?;
                let regex = Regex::new(&pattern)
                    .map_err(|source| EvaluationError::InvalidPattern { pattern, source })?;
                Ok(FieldValue::Text(replace_all(&regex, &text, &replacement)))
            }
        }
    }

    /// Names of every field the expression reads, in visiting order.
    pub fn field_references(&self) -> Vec<&str> {
        let mut names = Vec::new();
        self.collect_references(&mut names);
        names
    }

    fn collect_references<'a>(&'a self, names: &mut Vec<&'a str>) {
        match self {
            Expr::Literal(_) => {}
            Expr::Field { name } => names.push(name),
            Expr::Concat { args } => args.iter().for_each(|arg| arg.collect_references(names)),
            Expr::If {
                condition,
                then,
                otherwise,
            } => {
                condition.collect_references(names);
                then.collect_references(names);
                otherwise.collect_references(names);
            }
            Expr::Split { arg, .. } | Expr::Upper { arg } | Expr::Lower { arg } => {
                arg.collect_references(names)
            }
            Expr::Index { arr, .. } => arr.collect_references(names),
            Expr::Eq { left, right } => {
                left.collect_references(names);
                right.collect_references(names);
            }
            Expr::Replace {
                string,
                pattern,
                replacement,
            } => {
                string.collect_references(names);
                pattern.collect_references(names);
                replacement.collect_references(names);
            }
        }
    }

    /// Declarative form of the expression, as accepted by [`Expr::parse`].
    pub fn to_value(&self) -> Value {
        match self {
            Expr::Literal(FieldValue::Text(text)) => Value::String(text.clone()),
            Expr::Literal(FieldValue::Bool(flag)) => Value::Bool(*flag),
            Expr::Literal(value) => json!({ "op": "literal", "value": Value::from(value.clone()) }),
            Expr::Field { name } => json!({ "op": "field", "name": name }),
            Expr::Concat { args } => json!({
                "op": "concat",
                "args": args.iter().map(Expr::to_value).collect::<Vec<_>>(),
            }),
            Expr::If {
                condition,
                then,
                otherwise,
            } => json!({
                "op": "if",
                "condition": condition.to_value(),
                "then": then.to_value(),
                "else": otherwise.to_value(),
            }),
            Expr::Split { arg, delimiter } => {
                json!({ "op": "split", "arg": arg.to_value(), "delimiter": delimiter })
            }
            Expr::Index { arr, pos } => json!({ "op": "index", "arr": arr.to_value(), "pos": pos }),
            Expr::Eq { left, right } => {
                json!({ "op": "eq", "left": left.to_value(), "right": right.to_value() })
            }
            Expr::Upper { arg } => json!({ "op": "upper", "arg": arg.to_value() }),
            Expr::Lower { arg } => json!({ "op": "lower", "arg": arg.to_value() }),
            Expr::Replace {
                string,
                pattern,
                replacement,
            } => json!({
                "op": "replace",
                "string": string.to_value(),
                "pattern": pattern.to_value(),
                "replacement": replacement.to_value(),
            }),
        }
    }
}

impl Serialize for Expr {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_value().serialize(serializer)
    }
}

fn expect_text(op: &'static str, value: FieldValue) -> Result<String, EvaluationError> {
    match value {
        FieldValue::Text(text) => Ok(text),
        other => Err(EvaluationError::TypeMismatch {
            op,
            expected: ValueKind::Text,
            found: other.kind(),
        }),
    }
}

/// Replaces every match of `regex` in `text`, expanding `replacement` per match.
fn replace_all(regex: &Regex, text: &str, replacement: &str) -> String {
    let named = regex.capture_names().flatten().next().is_some();
    let mut out = String::with_capacity(text.len());
    let mut last = 0;
    for captures in regex.captures_iter(text) {
        let Some(whole) = captures.get(0) else {
            continue;
        };
        out.push_str(&text[last..whole.start()]);
        expand_replacement(&captures, text, replacement, named, &mut out);
        last = whole.end();
    }
    out.push_str(&text[last..]);
    out
}

/// Expands `$$`, `$&`, `` $` ``, `$'`, `$n`, `$nn` and `$<name>`.
///
/// A `$` sequence naming no existing group is kept literally.
fn expand_replacement(
    captures: &Captures<'_>,
    haystack: &str,
    replacement: &str,
    named: bool,
    out: &mut String,
) {
    let whole = captures.get(0).map_or(0..0, |whole| whole.range());
    let mut rest = replacement;
    while let Some(dollar) = rest.find('$') {
        out.push_str(&rest[..dollar]);
        let tail = &rest[dollar + 1..];
        let consumed = match tail.as_bytes().first() {
            Some(b'$') => {
                out.push('$');
                1
            }
            Some(b'&') => {
                out.push_str(&haystack[whole.clone()]);
                1
            }
            Some(b'`') => {
                out.push_str(&haystack[..whole.start]);
                1
            }
            Some(b'\'') => {
                out.push_str(&haystack[whole.end..]);
                1
            }
            Some(b'<') if named => match tail.find('>') {
                Some(close) => {
                    let group = captures.name(&tail[1..close]);
                    out.push_str(group.map_or("", |group| group.as_str()));
                    close + 1
                }
                None => {
                    out.push('$');
                    0
                }
            },
            Some(digit) if digit.is_ascii_digit() => {
                match group_reference(tail, captures.len()) {
                    Some((index, width)) => {
                        out.push_str(captures.get(index).map_or("", |group| group.as_str()));
                        width
                    }
                    None => {
                        out.push('$');
                        0
                    }
                }
            }
            _ => {
                out.push('$');
                0
            }
        };
        rest = &tail[consumed..];
    }
    out.push_str(rest);
}

/// Group index and digit count of a `$n` / `$nn` reference, preferring two digits.
fn group_reference(tail: &str, groups: usize) -> Option<(usize, usize)> {
    let digits: Vec<usize> = tail
        .bytes()
        .take(2)
        .take_while(u8::is_ascii_digit)
        .map(|digit| usize::from(digit - b'0'))
        .collect();
    if let [tens, ones] = digits[..] {
        let index = tens * 10 + ones;
        if (1..groups).contains(&index) {
            return Some((index, 2));
        }
    }
    match digits.first() {
        Some(&index) if (1..groups).contains(&index) => Some((index, 1)),
        _ => None,
    }
}

fn parse_node(value: &Value, depth: usize) -> Result<Expr, ExprError> {
    if depth > MAX_EXPR_DEPTH {
        return Err(ExprError::TooDeep(MAX_EXPR_DEPTH));
    }
    match value {
        Value::String(text) => Ok(Expr::Literal(FieldValue::Text(text.clone()))),
        Value::Bool(flag) => Ok(Expr::Literal(FieldValue::Bool(*flag))),
        Value::Object(node) => parse_op(node, depth),
        other => Err(ExprError::NotAnExpression(other.to_string())),
    }
}

fn parse_op(node: &Map<String, Value>, depth: usize) -> Result<Expr, ExprError> {
    let op = node
        .get("op")
        .and_then(Value::as_str)
        .ok_or_else(|| ExprError::MissingOp(Value::Object(node.clone()).to_string()))?;

    let operand = |key: &'static str| -> Result<&Value, ExprError> {
        node.get(key).ok_or_else(|| ExprError::MissingOperand {
            op: op.to_string(),
            operand: key,
        })
    };
    let child =
        |key: &'static str| -> Result<Box<Expr>, ExprError> {
            Ok(Box::new(parse_node(operand(key)?, depth + 1)?))
        };
    let invalid = |key: &'static str, expected: &'static str| ExprError::InvalidOperand {
        op: op.to_string(),
        operand: key,
        expected,
    };

    match op {
        "literal" => literal(operand("value")?).map(Expr::Literal),
        "field" => {
            let name = operand("name")?
                .as_str()
                .ok_or_else(|| invalid("name", "a field name"))?;
            Ok(Expr::Field {
                name: name.to_string(),
            })
        }
        "concat" => {
            let args = operand("args")?
                .as_array()
                .ok_or_else(|| invalid("args", "a list of expressions"))?
                .iter()
                .map(|arg| parse_node(arg, depth + 1))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Expr::Concat { args })
        }
        "if" => Ok(Expr::If {
            condition: child("condition")?,
            then: child("then")?,
            otherwise: child("else")?,
        }),
        "split" => {
            let delimiter = operand("delimiter")?
                .as_str()
                .ok_or_else(|| invalid("delimiter", "a string"))?;
            Ok(Expr::Split {
                arg: child("arg")?,
                delimiter: delimiter.to_string(),
            })
        }
        "index" => {
            let pos = operand("pos")?
                .as_u64()
                .and_then(|pos| usize::try_from(pos).ok())
                .ok_or_else(|| invalid("pos", "a non-negative integer"))?;
            Ok(Expr::Index {
                arr: child("arr")?,
                pos,
            })
        }
        "eq" => Ok(Expr::Eq {
            left: child("left")?,
            right: child("right")?,
        }),
        "upper" => Ok(Expr::Upper { arg: child("arg")? }),
        "lower" => Ok(Expr::Lower { arg: child("arg")? }),
        "replace" => Ok(Expr::Replace {
            string: child("string")?,
            pattern: child("pattern")?,
            replacement: child("replacement")?,
        }),
        other => Err(ExprError::UnknownOp(other.to_string())),
    }
}

fn literal(value: &Value) -> Result<FieldValue, ExprError> {
    match value {
        Value::Null | Value::Object(_) => Err(ExprError::InvalidLiteral(value.to_string())),
        other => FieldValue::from_raw(Some(other))
            .map_err(|_| ExprError::InvalidLiteral(other.to_string())),
    }
}
