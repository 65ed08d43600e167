//! Text templates for resource labels and metrics queries
//!
//! Actions are delimited by `<<` and `>>` so rendered PromQL, which is full
//! of braces, never collides with template syntax. An action is a pipeline
//! of commands separated by `|`; the value of each command is passed as the
//! last argument of the next one.
//!
//! - `<<.Series>>` renders a field
//! - `<<index .LabelValuesByName "pod">>` looks up a key of a map field
//! - `<<join "|" .GroupBySlice>>` joins a list
//! - `<<index .LabelValuesByName "pod" | join "|">>` combines both
//!
//! Lists render comma-separated. Maps cannot be rendered directly.

use std::collections::BTreeMap;
use thiserror::Error;

pub const LEFT_DELIM: &str = "<<";
pub const RIGHT_DELIM: &str = ">>";

#[derive(Debug, Clone, PartialEq, Error)]
pub enum TemplateError {
    #[error("unclosed action starting at offset {0}")]
    UnclosedAction(usize),

    #[error("empty action at offset {0}")]
    EmptyAction(usize),

    #[error("unterminated quoted string in {0:?}")]
    UnterminatedString(String),

    #[error("unexpected {token:?} in {action:?}")]
    UnexpectedToken { token: String, action: String },

    #[error("function {0:?} not defined")]
    UnknownFunction(String),

    #[error("can't evaluate field {0}")]
    UnknownField(String),

    #[error("wrong number of args for {func}: want {want} got {got}")]
    WrongArgCount {
        func: &'static str,
        want: usize,
        got: usize,
    },

    #[error("{func}: {reason}")]
    InvalidArgument { func: &'static str, reason: String },

    #[error("can't print map value of {0:?}")]
    Unprintable(String),
}

/// A value a template can refer to
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Str(String),
    List(Vec<String>),
    Map(BTreeMap<String, Vec<String>>),
}

impl Value {
    fn kind(&self) -> &'static str {
        match self {
            Value::Str(_) => "string",
            Value::List(_) => "list",
            Value::Map(_) => "map",
        }
    }
}

/// Data a template is executed against
pub trait TemplateData {
    /// Value of the field named `name` (without the leading dot)
    fn field(&self, name: &str) -> Option<Value>;
}

impl TemplateData for BTreeMap<String, Value> {
    fn field(&self, name: &str) -> Option<Value> {
        self.get(name).cloned()
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Field(String),
    Literal(String),
    Ident(String),
    Pipe,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Func {
    Index,
    Join,
}

impl Func {
    fn lookup(name: &str) -> Result<Self, TemplateError> {
        match name {
            "index" => Ok(Func::Index),
            "join" => Ok(Func::Join),
            other => Err(TemplateError::UnknownFunction(other.to_string())),
        }
    }

    fn call(self, args: Vec<Value>) -> Result<Value, TemplateError> {
        let name = match self {
            Func::Index => "index",
            Func::Join => "join",
        };
        let [first, second]: [Value; 2] =
            args.try_into()
                .map_err(|args: Vec<Value>| TemplateError::WrongArgCount {
                    func: name,
                    want: 2,
                    got: args.len(),
                })?;

        match (self, first, second) {
            (Func::Index, Value::Map(map), Value::Str(key)) => {
                Ok(Value::List(map.get(&key).cloned().unwrap_or_default()))
            }
            (Func::Index, Value::List(list), Value::Str(raw)) => {
                let idx: usize = raw.parse().map_err(|_| TemplateError::InvalidArgument {
                    func: name,
                    reason: format!("invalid list index {:?}", raw),
                })?;
                list.get(idx)
                    .cloned()
                    .map(Value::Str)
                    .ok_or_else(|| TemplateError::InvalidArgument {
                        func: name,
                        reason: format!("index {} out of range", idx),
                    })
            }
            (Func::Join, Value::Str(sep), Value::List(items)) => Ok(Value::Str(items.join(&sep))),
            (Func::Join, Value::Str(_), Value::Str(item)) => Ok(Value::Str(item)),
            (_, first, second) => Err(TemplateError::InvalidArgument {
                func: name,
                reason: format!("unsupported arguments ({}, {})", first.kind(), second.kind()),
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Arg {
    Field(String),
    Literal(String),
}

#[derive(Debug, Clone, PartialEq)]
enum Command {
    Operand(Arg),
    Call { func: Func, args: Vec<Arg> },
}

#[derive(Debug, Clone, PartialEq)]
enum Segment {
    Text(String),
    Action {
        source: String,
        pipeline: Vec<Command>,
    },
}

/// A parsed template
#[derive(Debug, Clone, PartialEq)]
pub struct Template {
    source: String,
    segments: Vec<Segment>,
}

impl Template {
    pub fn parse(source: &str) -> Result<Self, TemplateError> {
        let mut segments = Vec::new();
        let mut rest = source;
        let mut offset = 0;

        while let Some(open) = rest.find(LEFT_DELIM) {
            if open > 0 {
                segments.push(Segment::Text(rest[..open].to_string()));
            }

            let body = &rest[open + LEFT_DELIM.len()..];
            let close = body
                .find(RIGHT_DELIM)
                .ok_or(TemplateError::UnclosedAction(offset + open))?;
            let action = body[..close].trim();
            if action.is_empty() {
                return Err(TemplateError::EmptyAction(offset + open));
            }

            segments.push(Segment::Action {
                source: action.to_string(),
                pipeline: parse_pipeline(action)?,
            });

            let consumed = open + LEFT_DELIM.len() + close + RIGHT_DELIM.len();
            offset += consumed;
            rest = &rest[consumed..];
        }

        if !rest.is_empty() {
            segments.push(Segment::Text(rest.to_string()));
        }

        Ok(Self {
            source: source.to_string(),
            segments,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn render(&self, data: &dyn TemplateData) -> Result<String, TemplateError> {
        let mut out = String::with_capacity(self.source.len());
        for segment in &self.segments {
            match segment {
                Segment::Text(text) => out.push_str(text),
                Segment::Action { source, pipeline } => match eval(pipeline, data)? {
                    Value::Str(s) => out.push_str(&s),
                    Value::List(items) => out.push_str(&items.join(",")),
                    Value::Map(_) => return Err(TemplateError::Unprintable(source.clone())),
                },
            }
        }
        Ok(out)
    }
}

fn tokenize(action: &str) -> Result<Vec<Token>, TemplateError> {
    let mut tokens = Vec::new();
    let mut chars = action.char_indices().peekable();

    while let Some(&(start, c)) = chars.peek() {
        if c.is_whitespace() {
            chars.next();
            continue;
        }
        if c == '|' {
            chars.next();
            tokens.push(Token::Pipe);
            continue;
        }
        if c == '"' {
            chars.next();
            let mut literal = String::new();
            let mut closed = false;
            while let Some((_, c)) = chars.next() {
                match c {
                    '"' => {
                        closed = true;
                        break;
                    }
                    '\\' => match chars.next() {
                        Some((_, 'n')) => literal.push('\n'),
                        Some((_, 't')) => literal.push('\t'),
                        Some((_, escaped)) => literal.push(escaped),
                        None => break,
                    },
                    c => literal.push(c),
                }
            }
            if !closed {
                return Err(TemplateError::UnterminatedString(action.to_string()));
            }
            tokens.push(Token::Literal(literal));
            continue;
        }

        let mut end = action.len();
        while let Some(&(i, c)) = chars.peek() {
            if c.is_whitespace() || c == '|' || c == '"' {
                end = i;
                break;
            }
            chars.next();
        }

        let word = &action[start..end];
        let is_ident = |s: &str| !s.is_empty() && s.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
        let token = match word.strip_prefix('.') {
            Some(field) if is_ident(field) => Token::Field(field.to_string()),
            None if is_ident(word) => Token::Ident(word.to_string()),
            _ => {
                return Err(TemplateError::UnexpectedToken {
                    token: word.to_string(),
                    action: action.to_string(),
                })
            }
        };
        tokens.push(token);
    }

    Ok(tokens)
}

fn parse_pipeline(action: &str) -> Result<Vec<Command>, TemplateError> {
    let tokens = tokenize(action)?;
    let unexpected = |token: &Token| TemplateError::UnexpectedToken {
        token: match token {
            Token::Field(f) => format!(".{}", f),
            Token::Literal(l) => format!("{:?}", l),
            Token::Ident(i) => i.clone(),
            Token::Pipe => "|".to_string(),
        },
        action: action.to_string(),
    };
    let to_arg = |token: &Token| match token {
        Token::Field(f) => Ok(Arg::Field(f.clone())),
        Token::Literal(l) => Ok(Arg::Literal(l.clone())),
        other => Err(unexpected(other)),
    };

    let mut commands = Vec::new();
    for (i, group) in tokens.split(|t| *t == Token::Pipe).enumerate() {
        let command = match group.split_first() {
            None => return Err(unexpected(&Token::Pipe)),
            Some((Token::Ident(name), rest)) => Command::Call {
                func: Func::lookup(name)?,
                args: rest.iter().map(to_arg).collect::<Result<_, _>>()?,
            },
            Some((first, [])) if i == 0 => Command::Operand(to_arg(first)?),
            Some((first, _)) => return Err(unexpected(first)),
        };
        commands.push(command);
    }

    Ok(commands)
}

fn resolve(arg: &Arg, data: &dyn TemplateData) -> Result<Value, TemplateError> {
    match arg {
        Arg::Field(name) => data
            .field(name)
            .ok_or_else(|| TemplateError::UnknownField(format!(".{}", name))),
        Arg::Literal(s) => Ok(Value::Str(s.clone())),
    }
}

fn eval(pipeline: &[Command], data: &dyn TemplateData) -> Result<Value, TemplateError> {
    let mut piped: Option<Value> = None;
    for command in pipeline {
        let value = match command {
            Command::Operand(arg) => resolve(arg, data)?,
            Command::Call { func, args } => {
                let mut values = args
                    .iter()
                    .map(|arg| resolve(arg, data))
                    .collect::<Result<Vec<_>, _>>()?;
                if let Some(prev) = piped.take() {
                    values.push(prev);
                }
                func.call(values)?
            }
        };
        piped = Some(value);
    }
    Ok(piped.unwrap_or_else(|| Value::Str(String::new())))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn data() -> BTreeMap<String, Value> {
        BTreeMap::from([
            ("Series".to_string(), Value::Str("http_requests_total".into())),
            (
                "GroupBySlice".to_string(),
                Value::List(vec!["pod".into(), "container".into()]),
            ),
            (
                "LabelValuesByName".to_string(),
                Value::Map(BTreeMap::from([(
                    "pod".to_string(),
                    vec!["web-0".to_string(), "web-1".to_string()],
                )])),
            ),
        ])
    }

    #[test]
    fn test_render_fields_and_text() {
        let template = Template::parse("sum(rate(<<.Series>>{job=\"x\"}[5m])) by (<<.GroupBySlice>>)").unwrap();
        assert_eq!(
            template.render(&data()).unwrap(),
            "sum(rate(http_requests_total{job=\"x\"}[5m])) by (pod,container)"
        );
    }

    #[test]
    fn test_plain_text_only() {
        let template = Template::parse("up{job=\"node\"}").unwrap();
        assert_eq!(template.render(&data()).unwrap(), "up{job=\"node\"}");
    }

    #[test]
    fn test_index_and_join_pipeline() {
        let template = Template::parse("<<index .LabelValuesByName \"pod\" | join \"|\">>").unwrap();
        assert_eq!(template.render(&data()).unwrap(), "web-0|web-1");

        let template = Template::parse("<<join \";\" .GroupBySlice>>").unwrap();
        assert_eq!(template.render(&data()).unwrap(), "pod;container");
    }

    #[test]
    fn test_index_missing_key_is_empty() {
        let template = Template::parse("[<<index .LabelValuesByName \"namespace\">>]").unwrap();
        assert_eq!(template.render(&data()).unwrap(), "[]");
    }

    #[test]
    fn test_unknown_field_fails_at_render() {
        let template = Template::parse("<<.Missing>>").unwrap();
        assert_eq!(
            template.render(&data()),
            Err(TemplateError::UnknownField(".Missing".into()))
        );
    }

    #[test]
    fn test_map_is_unprintable() {
        let template = Template::parse("<<.LabelValuesByName>>").unwrap();
        assert!(matches!(
            template.render(&data()),
            Err(TemplateError::Unprintable(_))
        ));
    }

    #[test]
    fn test_parse_errors() {
        assert_eq!(
            Template::parse("abc <<.Series"),
            Err(TemplateError::UnclosedAction(4))
        );
        assert_eq!(Template::parse("<<  >>"), Err(TemplateError::EmptyAction(0)));
        assert_eq!(
            Template::parse("<<printf .Series>>"),
            Err(TemplateError::UnknownFunction("printf".into()))
        );
        assert!(matches!(
            Template::parse("<<.Series .GroupBy>>"),
            Err(TemplateError::UnexpectedToken { .. })
        ));
        assert!(matches!(
            Template::parse("<<join \"|>>"),
            Err(TemplateError::UnterminatedString(_))
        ));
    }
}
