//! Template syntax: tokenizer and parser.
//!
//! Two tag forms exist. `{{ … }}` emits text, `{% … %}` controls flow. A
//! `{% … %}` tag that sits alone on its line swallows that whole line.

use anyhow::{bail, Result};

#[derive(Debug, Clone, PartialEq)]
pub(super) enum Node {
    Text(String),
    Expr(Expr),
    If {
        branches: Vec<(Cond, Vec<Node>)>,
        otherwise: Vec<Node>,
    },
    For {
        var: String,
        key: String,
        body: Vec<Node>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub(super) enum Expr {
    Var(String),
    Get {
        key: String,
        default: String,
    },
    Format {
        key: String,
        pattern: String,
        fallback: String,
    },
    Include {
        path: String,
        bindings: Vec<(String, Arg)>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub(super) enum Arg {
    Key(String),
    Str(String),
}

#[derive(Debug, Clone, PartialEq)]
pub(super) enum Cond {
    Truthy(String),
    Set(String),
    Not(Box<Cond>),
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Text(String),
    Expr(String, usize),
    Block(String, usize),
}

/// Split template source into text and tag tokens.
fn tokenize(src: &str) -> Result<Vec<Token>> {
    let mut tokens = Vec::new();
    let mut cursor = 0;
    // Whether `cursor` sits at the beginning of a line.
    let mut at_line_start = true;

    while cursor < src.len() {
        let rest = &src[cursor..];
        let open = match (rest.find("{{"), rest.find("{%")) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };
        let Some(pos) = open else {
            tokens.push(Token::Text(rest.to_string()));
            break;
        };

        let is_block = rest[pos..].starts_with("{%");
        let close = if is_block { "%}" } else { "}}" };
        let line = src[..cursor + pos].matches('\n').count() + 1;
        let body_start = pos + 2;
        let Some(body_len) = rest[body_start..].find(close) else {
            bail!("line {}: unclosed tag, expected '{}'", line, close);
        };
        let inner = rest[body_start..body_start + body_len].trim().to_string();
        let mut after = body_start + body_len + 2;
        let mut text = &rest[..pos];
        let mut ends_line = false;

        if is_block {
            let line_begin = text.rfind('\n').map(|i| i + 1);
            let prefix_blank = text[line_begin.unwrap_or(0)..]
                .chars()
                .all(|c| c == ' ' || c == '\t');
            let starts_line = line_begin.is_some() || at_line_start;
            let tail = &rest[after..];
            let newline = tail.find('\n');
            let suffix = &tail[..newline.unwrap_or(tail.len())];
            let suffix_blank = suffix.chars().all(|c| c == ' ' || c == '\t' || c == '\r');

            if prefix_blank && starts_line && suffix_blank {
                text = &text[..line_begin.unwrap_or(0)];
                after += newline.map(|n| n + 1).unwrap_or(tail.len());
                ends_line = newline.is_some();
            }
        }

        if !text.is_empty() {
            tokens.push(Token::Text(text.to_string()));
        }
        tokens.push(if is_block {
            Token::Block(inner, line)
        } else {
            Token::Expr(inner, line)
        });

        cursor += after;
        at_line_start = ends_line;
    }

    Ok(tokens)
}

#[derive(Debug, Clone, PartialEq)]
enum Word {
    Bare(String),
    Quoted(String),
    Assign,
}

/// Split tag contents into bare words, quoted strings and `=`.
fn lex_args(s: &str, line: usize) -> Result<Vec<Word>> {
    let mut words = Vec::new();
    let mut chars = s.chars().peekable();

    while let Some(&c) = chars.peek() {
        if c.is_whitespace() {
            chars.next();
        } else if c == '=' {
            chars.next();
            words.push(Word::Assign);
        } else if c == '"' {
            chars.next();
            let mut value = String::new();
            let mut closed = false;
            while let Some(c) = chars.next() {
                match c {
                    '"' => {
                        closed = true;
                        break;
                    }
                    '\\' => match chars.next() {
                        Some('n') => value.push('\n'),
                        Some('t') => value.push('\t'),
                        Some(other) => value.push(other),
                        None => break,
                    },
                    other => value.push(other),
                }
            }
            if !closed {
                bail!("line {}: unterminated string in '{}'", line, s);
            }
            words.push(Word::Quoted(value));
        } else {
            let mut value = String::new();
            while let Some(&c) = chars.peek() {
                if c.is_whitespace() || c == '=' || c == '"' {
                    break;
                }
                value.push(c);
                chars.next();
            }
            words.push(Word::Bare(value));
        }
    }

    Ok(words)
}

fn parse_expr(inner: &str, line: usize) -> Result<Expr> {
    let words = lex_args(inner, line)?;
    use Word::*;

    let expr = match words.as_slice() {
        [Bare(key)] => Expr::Var(key.clone()),
        [Bare(f), Bare(key), Quoted(default)] if f == "get" => Expr::Get {
            key: key.clone(),
            default: default.clone(),
        },
        [Bare(f), Bare(key), Quoted(pattern)] if f == "format" => Expr::Format {
            key: key.clone(),
            pattern: pattern.clone(),
            fallback: String::new(),
        },
        [Bare(f), Bare(key), Quoted(pattern), Quoted(fallback)] if f == "format" => {
            Expr::Format {
                key: key.clone(),
                pattern: pattern.clone(),
                fallback: fallback.clone(),
            }
        }
        [Bare(f), Quoted(path), rest @ ..] if f == "include" => {
            let mut bindings = Vec::new();
            for binding in rest.chunks(3) {
                match binding {
                    [Bare(name), Assign, Quoted(value)] => {
                        bindings.push((name.clone(), Arg::Str(value.clone())))
                    }
                    [Bare(name), Assign, Bare(key)] => {
                        bindings.push((name.clone(), Arg::Key(key.clone())))
                    }
                    _ => bail!("line {}: bad include binding in '{}'", line, inner),
                }
            }
            Expr::Include {
                path: path.clone(),
                bindings,
            }
        }
        _ => bail!("line {}: can't parse expression '{}'", line, inner),
    };

    Ok(expr)
}

fn parse_cond(args: &str, line: usize) -> Result<Cond> {
    let words: Vec<&str> = args.split_whitespace().collect();
    match words.as_slice() {
        ["not", rest @ ..] if !rest.is_empty() => {
            Ok(Cond::Not(Box::new(parse_cond(&rest.join(" "), line)?)))
        }
        ["set", key] => Ok(Cond::Set(key.to_string())),
        [key] => Ok(Cond::Truthy(key.to_string())),
        _ => bail!("line {}: can't parse condition '{}'", line, args),
    }
}

struct Stop {
    keyword: String,
    args: String,
    line: usize,
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn parse_seq(&mut self, stops: &[&str]) -> Result<(Vec<Node>, Option<Stop>)> {
        let mut nodes = Vec::new();

        while self.pos < self.tokens.len() {
            let token = self.tokens[self.pos].clone();
            self.pos += 1;

            match token {
                Token::Text(text) => nodes.push(Node::Text(text)),
                Token::Expr(inner, line) => nodes.push(Node::Expr(parse_expr(&inner, line)?)),
                Token::Block(inner, line) => {
                    let (keyword, args) = match inner.split_once(char::is_whitespace) {
                        Some((k, a)) => (k.to_string(), a.trim().to_string()),
                        None => (inner.clone(), String::new()),
                    };
                    match keyword.as_str() {
                        "if" => nodes.push(self.parse_if(&args, line)?),
                        "for" => nodes.push(self.parse_for(&args, line)?),
                        k if stops.contains(&k) => {
                            return Ok((nodes, Some(Stop { keyword, args, line })));
                        }
                        _ => bail!("line {}: unexpected '{{% {} %}}'", line, inner),
                    }
                }
            }
        }

        if !stops.is_empty() {
            bail!("unexpected end of template, expected one of: {}", stops.join(", "));
        }
        Ok((nodes, None))
    }

    fn parse_if(&mut self, args: &str, line: usize) -> Result<Node> {
        let mut branches = Vec::new();
        let mut cond = parse_cond(args, line)?;

        loop {
            let (body, stop) = self.parse_seq(&["elif", "else", "end"])?;
            branches.push((cond, body));
            let Some(stop) = stop else {
                bail!("line {}: unclosed if", line);
            };

            match stop.keyword.as_str() {
                "elif" => cond = parse_cond(&stop.args, stop.line)?,
                "else" => {
                    let (otherwise, _) = self.parse_seq(&["end"])?;
                    return Ok(Node::If {
                        branches,
                        otherwise,
                    });
                }
                _ => {
                    return Ok(Node::If {
                        branches,
                        otherwise: Vec::new(),
                    })
                }
            }
        }
    }

    fn parse_for(&mut self, args: &str, line: usize) -> Result<Node> {
        let words: Vec<&str> = args.split_whitespace().collect();
        let [var, "in", key] = words.as_slice() else {
            bail!("line {}: expected 'for ITEM in KEY', got '{}'", line, args);
        };
        let (body, _) = self.parse_seq(&["end"])?;
        Ok(Node::For {
            var: var.to_string(),
            key: key.to_string(),
            body,
        })
    }
}

/// Parse template source into a node tree.
pub(super) fn parse(src: &str) -> Result<Vec<Node>> {
    let mut parser = Parser {
        tokens: tokenize(src)?,
        pos: 0,
    };
    let (nodes, _) = parser.parse_seq(&[])?;
    Ok(nodes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_text() {
        assert_eq!(parse("hello\n").unwrap(), vec![Node::Text("hello\n".into())]);
    }

    #[test]
    fn test_var_and_get() {
        let nodes = parse("A={{ arch }} B={{ get cores \"1\" }}").unwrap();
        assert_eq!(nodes[1], Node::Expr(Expr::Var("arch".into())));
        assert_eq!(
            nodes[3],
            Node::Expr(Expr::Get {
                key: "cores".into(),
                default: "1".into()
            })
        );
    }

    #[test]
    fn test_standalone_block_line_is_removed() {
        let nodes = parse("a\n{% if build %}\nb\n{% end %}\nc\n").unwrap();
        assert_eq!(
            nodes,
            vec![
                Node::Text("a\n".into()),
                Node::If {
                    branches: vec![(Cond::Truthy("build".into()), vec![Node::Text("b\n".into())])],
                    otherwise: vec![],
                },
                Node::Text("c\n".into()),
            ]
        );
    }

    #[test]
    fn test_inline_block_keeps_text() {
        let nodes = parse("x {% if a %}y{% end %} z").unwrap();
        assert_eq!(nodes.first(), Some(&Node::Text("x ".into())));
        assert_eq!(nodes.last(), Some(&Node::Text(" z".into())));
    }

    #[test]
    fn test_elif_else_not_set() {
        let nodes = parse("{% if not set a %}1{% elif b %}2{% else %}3{% end %}").unwrap();
        let Node::If {
            branches,
            otherwise,
        } = &nodes[0]
        else {
            panic!("expected if node");
        };
        assert_eq!(branches[0].0, Cond::Not(Box::new(Cond::Set("a".into()))));
        assert_eq!(branches[1].0, Cond::Truthy("b".into()));
        assert_eq!(otherwise, &vec![Node::Text("3".into())]);
    }

    #[test]
    fn test_include_bindings() {
        let nodes = parse("{{ include \"part.tmpl\" name=\"x y\" flag=build }}").unwrap();
        assert_eq!(
            nodes[0],
            Node::Expr(Expr::Include {
                path: "part.tmpl".into(),
                bindings: vec![
                    ("name".into(), Arg::Str("x y".into())),
                    ("flag".into(), Arg::Key("build".into())),
                ],
            })
        );
    }

    #[test]
    fn test_errors_name_the_line() {
        let err = parse("ok\n{{ arch\n").unwrap_err();
        assert!(err.to_string().contains("line 2"));

        let err = parse("{% if a %}never closed").unwrap_err();
        assert!(err.to_string().contains("expected"));

        let err = parse("{% for x of y %}{% end %}").unwrap_err();
        assert!(err.to_string().contains("for ITEM in KEY"));
    }
}
