//! Turns raw model output into an [`ActionDirective`].
//!
//! Parsing happens in three passes:
//!
//! 1. A delimiter scanner splits the response into thinking segments, action
//!    blocks and free narrative. Thinking is dropped, narrative is only logged.
//! 2. A tokenizer reads the first action block as a single call expression
//!    `name(arg, key=value, ...)`.
//! 3. The call is interpreted into a directive and its coordinates are
//!    checked against the nominal frame.
//!
//! Both the compact grammar (`tap(120, 340)`) and the AutoGLM grammar
//! (`do(action="Tap", element=[120, 340])`) are accepted.

use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use super::directive::ActionDirective;
use crate::config::AppRegistry;
use crate::device::KeyCode;
use crate::geometry::{NominalFrame, NormalizedPoint};

/// Thinking segment delimiters.
const THINKING_MARKERS: [(&str, &str); 2] = [("<think>", "</think>"), ("<thinking>", "</thinking>")];

/// Action block delimiters.
const ACTION_MARKERS: [(&str, &str); 2] = [("<answer>", "</answer>"), ("<action>", "</action>")];

/// Formatting markers some models wrap around the action.
const BOX_MARKERS: [&str; 2] = ["<|begin_of_box|>", "<|end_of_box|>"];

/// Wait used when the model omits the duration.
const DEFAULT_WAIT: Duration = Duration::from_secs(1);

/// Reasons a response cannot be turned into a directive.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ParseError {
    #[error("No action block in model response")]
    NoAction,
    #[error("Malformed action: {detail}")]
    Malformed { detail: String },
    #[error("Coordinate {field}={value} outside [0, {max}]")]
    OutOfRange { field: String, value: f64, max: u32 },
}

impl ParseError {
    fn malformed(detail: impl Into<String>) -> Self {
        Self::Malformed {
            detail: detail.into(),
        }
    }
}

/// A parsed response with the pieces around the directive.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedResponse {
    /// Concatenated thinking segments, if any.
    pub thinking: Option<String>,
    /// Text outside thinking segments and action blocks.
    pub narrative: String,
    /// The authoritative action block, markers removed.
    pub block: String,
    pub directive: ActionDirective,
}

/// Parser bound to a nominal frame and, optionally, an app registry.
#[derive(Clone)]
pub struct ActionParser {
    frame: NominalFrame,
    registry: Option<Arc<dyn AppRegistry>>,
}

impl Default for ActionParser {
    fn default() -> Self {
        Self::new(NominalFrame::default())
    }
}

impl ActionParser {
    pub fn new(frame: NominalFrame) -> Self {
        Self {
            frame,
            registry: None,
        }
    }

    /// Reject launch directives for apps the registry does not know.
    pub fn with_registry(mut self, registry: Arc<dyn AppRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn frame(&self) -> NominalFrame {
        self.frame
    }

    /// Parse a raw response into a directive.
    pub fn parse(&self, raw: &str) -> Result<ActionDirective, ParseError> {
        self.parse_response(raw).map(|parsed| parsed.directive)
    }

    /// Parse a raw response, keeping the thinking and narrative around it.
    pub fn parse_response(&self, raw: &str) -> Result<ParsedResponse, ParseError> {
        let segments = scan(raw);

        if !segments.narrative.trim().is_empty() {
            tracing::debug!("Model narrative: {}", segments.narrative.trim());
        }

        let block = match segments.blocks.len() {
            0 => find_bare_call(&segments.narrative).ok_or(ParseError::NoAction)?,
            1 => segments.blocks[0].clone(),
            n => {
                tracing::warn!("Model emitted {} action blocks, using the first", n);
                segments.blocks[0].clone()
            }
        };

        let block = strip_box_markers(&block);
        if block.is_empty() {
            return Err(ParseError::NoAction);
        }

        let call = CallParser::new(tokenize(&block)?).parse()?;
        let directive = self.interpret(&call)?;

        let thinking = if segments.thinking.is_empty() {
            None
        } else {
            Some(segments.thinking.join("\n"))
        };

        Ok(ParsedResponse {
            thinking,
            narrative: segments.narrative.trim().to_string(),
            block,
            directive,
        })
    }

    fn interpret(&self, call: &Call) -> Result<ActionDirective, ParseError> {
        let kind = if call.name == "do" {
            call.named("action")
                .and_then(Value::as_text)
                .ok_or_else(|| ParseError::malformed("do() without an action name"))?
                .to_string()
        } else {
            call.name.clone()
        };

        match normalize_keyword(&kind).as_str() {
            "tap" | "click" => Ok(ActionDirective::Tap {
                point: self.point(call, "element", 0)?,
                confirm: call.text(&["message"], None),
            }),
            "double_tap" => Ok(ActionDirective::DoubleTap {
                point: self.point(call, "element", 0)?,
            }),
            "long_press" => Ok(ActionDirective::LongPress {
                point: self.point(call, "element", 0)?,
                duration_ms: millis(call, 2)?,
            }),
            "swipe" | "scroll" => Ok(ActionDirective::Swipe {
                start: self.point(call, "start", 0)?,
                end: self.point(call, "end", 1)?,
                duration_ms: millis(call, 4)?,
            }),
            "type" | "type_name" | "type_text" | "input" => call
                .text(&["text", "content"], Some(0))
                .map(|content| ActionDirective::TypeText { content })
                .ok_or_else(|| missing_field(&kind, "text")),
            "key" | "key_event" | "press_key" => Ok(ActionDirective::KeyEvent {
                code: key_code(call)?,
            }),
            "back" => Ok(ActionDirective::KeyEvent { code: KeyCode::Back }),
            "home" => Ok(ActionDirective::KeyEvent { code: KeyCode::Home }),
            "enter" => Ok(ActionDirective::KeyEvent { code: KeyCode::Enter }),
            "wait" | "sleep" => Ok(ActionDirective::Wait {
                duration: wait_duration(call)?,
            }),
            "launch" | "open_app" => {
                let app = call
                    .text(&["app", "name"], Some(0))
                    .ok_or_else(|| missing_field(&kind, "app"))?;
                if let Some(registry) = &self.registry {
                    if registry.resolve(&app).is_none() {
                        return Err(ParseError::malformed(format!("unknown app `{}`", app)));
                    }
                }
                Ok(ActionDirective::Launch { app })
            }
            "take_over" | "takeover" => Ok(ActionDirective::TakeOver {
                message: call
                    .text(&["message"], Some(0))
                    .unwrap_or_else(|| "User intervention required".to_string()),
            }),
            "interact" => Ok(ActionDirective::TakeOver {
                message: call
                    .text(&["message"], Some(0))
                    .unwrap_or_else(|| "Several options match, please choose one".to_string()),
            }),
            "note" => Ok(ActionDirective::Note {
                content: call
                    .text(&["message", "content"], Some(0))
                    .unwrap_or_default(),
            }),
            "call_api" => Ok(ActionDirective::Note {
                content: call
                    .text(&["instruction", "message"], Some(0))
                    .unwrap_or_default(),
            }),
            "finish" | "done" | "complete" => Ok(ActionDirective::TaskComplete {
                result: call.text(&["message", "result"], Some(0)),
            }),
            "fail" | "abort" => call
                .text(&["reason", "message"], Some(0))
                .map(|reason| ActionDirective::TaskFailed { reason })
                .ok_or_else(|| missing_field(&kind, "reason")),
            _ => Err(ParseError::malformed(format!("unknown action `{}`", kind))),
        }
    }

    /// Read the `index`-th point from `key=[x, y]` or from the positional numbers.
    fn point(&self, call: &Call, key: &str, index: usize) -> Result<NormalizedPoint, ParseError> {
        let (x, y) = match call.named(key) {
            Some(Value::List(items)) if items.len() == 2 => (
                number(&items[0], key)?,
                number(&items[1], key)?,
            ),
            Some(other) => {
                return Err(ParseError::malformed(format!(
                    "`{}` must be a two-element list, got {}",
                    key,
                    other.describe()
                )))
            }
            None => {
                let numbers = call.positional_numbers()?;
                match (numbers.get(index * 2), numbers.get(index * 2 + 1)) {
                    (Some(&x), Some(&y)) => (x, y),
                    _ => {
                        return Err(ParseError::malformed(format!(
                            "`{}` needs coordinates for point {}",
                            call.name,
                            index + 1
                        )))
                    }
                }
            }
        };

        let suffix = if key == "element" {
            String::new()
        } else {
            (index + 1).to_string()
        };
        self.check_range(&format!("x{}", suffix), x, self.frame.width)?;
        self.check_range(&format!("y{}", suffix), y, self.frame.height)?;
        Ok(NormalizedPoint::new(x, y))
    }

    fn check_range(&self, field: &str, value: f64, max: u32) -> Result<(), ParseError> {
        if !value.is_finite() {
            return Err(ParseError::malformed(format!("{} is not a finite number", field)));
        }
        if value < 0.0 || value > max as f64 {
            return Err(ParseError::OutOfRange {
                field: field.to_string(),
                value,
                max,
            });
        }
        Ok(())
    }
}

/// Optional gesture duration in milliseconds, named or at positional number `index`.
fn millis(call: &Call, index: usize) -> Result<Option<u64>, ParseError> {
    let value = match call.named("duration") {
        Some(v) => number(v, "duration")?,
        None => match call.positional_numbers()?.get(index) {
            Some(&v) => v,
            None => return Ok(None),
        },
    };
    if !value.is_finite() || value < 0.0 {
        return Err(ParseError::malformed(format!("invalid duration {}", value)));
    }
    Ok(Some(value.round() as u64))
}

fn wait_duration(call: &Call) -> Result<Duration, ParseError> {
    let value = call.named("duration").or_else(|| call.positional.first());
    let seconds = match value {
        None => return Ok(DEFAULT_WAIT),
        Some(Value::Number(n)) => *n,
        Some(Value::Text(s)) | Some(Value::Ident(s)) => parse_seconds(s)
            .ok_or_else(|| ParseError::malformed(format!("invalid wait duration `{}`", s)))?,
        Some(other) => {
            return Err(ParseError::malformed(format!(
                "invalid wait duration {}",
                other.describe()
            )))
        }
    };
    if !seconds.is_finite() || seconds < 0.0 {
        return Err(ParseError::malformed(format!("invalid wait duration {}", seconds)));
    }
    Duration::try_from_secs_f64(seconds)
        .map_err(|_| ParseError::malformed(format!("wait duration {} is out of range", seconds)))
}

/// Parse "2", "2s", "2 seconds" or "1.5 sec" into seconds.
fn parse_seconds(text: &str) -> Option<f64> {
    let lower = text.trim().to_ascii_lowercase();
    let number = ["seconds", "second", "secs", "sec", "s"]
        .iter()
        .find_map(|unit| lower.strip_suffix(unit))
        .unwrap_or(&lower);
    number.trim().parse().ok()
}

fn key_code(call: &Call) -> Result<KeyCode, ParseError> {
    let value = call
        .named("code")
        .or_else(|| call.named("key"))
        .or_else(|| call.positional.first())
        .ok_or_else(|| missing_field(&call.name, "code"))?;
    match value {
        Value::Number(n) if *n >= 0.0 && n.fract() == 0.0 => Ok(KeyCode::from_code(*n as u32)),
        Value::Text(s) | Value::Ident(s) => match s.trim().parse::<u32>() {
            Ok(code) => Ok(KeyCode::from_code(code)),
            Err(_) => KeyCode::from_name(s)
                .ok_or_else(|| ParseError::malformed(format!("unknown key `{}`", s))),
        },
        other => Err(ParseError::malformed(format!(
            "invalid key code {}",
            other.describe()
        ))),
    }
}

fn number(value: &Value, field: &str) -> Result<f64, ParseError> {
    value.as_number().ok_or_else(|| {
        ParseError::malformed(format!(
            "`{}` expects numbers, got {}",
            field,
            value.describe()
        ))
    })
}

fn missing_field(action: &str, field: &str) -> ParseError {
    ParseError::malformed(format!("`{}` is missing required field `{}`", action, field))
}

/// Lowercase and unify separators: "Double Tap" and "double-tap" become "double_tap".
fn normalize_keyword(keyword: &str) -> String {
    keyword
        .trim()
        .chars()
        .map(|c| match c {
            ' ' | '-' => '_',
            c => c.to_ascii_lowercase(),
        })
        .collect()
}

fn strip_box_markers(block: &str) -> String {
    BOX_MARKERS
        .iter()
        .fold(block.to_string(), |text, marker| text.replace(marker, ""))
        .trim()
        .to_string()
}

// ---------------------------------------------------------------------------
// Delimiter scanner
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct Segments {
    thinking: Vec<String>,
    blocks: Vec<String>,
    narrative: String,
}

#[derive(Clone, Copy)]
enum Marker {
    Thinking(&'static str, &'static str),
    Action(&'static str, &'static str),
    /// A thinking close with no matching open: everything before it was thinking.
    OrphanClose(&'static str),
}

fn scan(raw: &str) -> Segments {
    let mut segments = Segments::default();
    let mut rest = raw;

    while let Some((pos, marker)) = next_marker(rest) {
        let before = &rest[..pos];
        match marker {
            Marker::OrphanClose(close) => {
                let mut thought = std::mem::take(&mut segments.narrative);
                thought.push_str(before);
                push_trimmed(&mut segments.thinking, &thought);
                rest = &rest[pos + close.len()..];
            }
            Marker::Thinking(open, close) => {
                segments.narrative.push_str(before);
                let body = &rest[pos + open.len()..];
                match body.find(close) {
                    Some(end) => {
                        push_trimmed(&mut segments.thinking, &body[..end]);
                        rest = &body[end + close.len()..];
                    }
                    None => {
                        tracing::debug!("Unterminated {} segment, discarding the rest", open);
                        push_trimmed(&mut segments.thinking, body);
                        rest = "";
                    }
                }
            }
            Marker::Action(open, close) => {
                segments.narrative.push_str(before);
                let body = &rest[pos + open.len()..];
                match body.find(close) {
                    Some(end) => {
                        segments.blocks.push(body[..end].trim().to_string());
                        rest = &body[end + close.len()..];
                    }
                    None => {
                        tracing::debug!("Unterminated {} block, reading to the end", open);
                        segments.blocks.push(body.trim().to_string());
                        rest = "";
                    }
                }
            }
        }
    }
    segments.narrative.push_str(rest);
    segments
}

fn push_trimmed(target: &mut Vec<String>, text: &str) {
    let text = text.trim();
    if !text.is_empty() {
        target.push(text.to_string());
    }
}

fn next_marker(text: &str) -> Option<(usize, Marker)> {
    let opens = THINKING_MARKERS
        .iter()
        .map(|&(o, c)| (o, Marker::Thinking(o, c)))
        .chain(ACTION_MARKERS.iter().map(|&(o, c)| (o, Marker::Action(o, c))))
        .chain(THINKING_MARKERS.iter().map(|&(_, c)| (c, Marker::OrphanClose(c))));

    opens
        .filter_map(|(needle, marker)| text.find(needle).map(|pos| (pos, marker)))
        .min_by_key(|(pos, _)| *pos)
}

/// Find an untagged `do(...)` or `finish(...)` call in free text.
fn find_bare_call(text: &str) -> Option<String> {
    let mut search_from = 0;
    while search_from < text.len() {
        let rest = &text[search_from..];
        let (offset, keyword) = ["do(", "finish("]
            .iter()
            .filter_map(|kw| rest.find(kw).map(|pos| (pos, *kw)))
            .min_by_key(|(pos, _)| *pos)?;
        let start = search_from + offset;
        let at_boundary = text[..start]
            .chars()
            .next_back()
            .map_or(true, |c| !c.is_alphanumeric() && c != '_');
        if at_boundary {
            return Some(text[start..call_end(text, start)].to_string());
        }
        search_from = start + keyword.len();
    }
    None
}

/// Byte index just past the parenthesis closing the call at `start`.
fn call_end(text: &str, start: usize) -> usize {
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    let mut escaped = false;
    for (i, c) in text[start..].char_indices() {
        if let Some(q) = quote {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == q {
                quote = None;
            }
            continue;
        }
        match c {
            '"' | '\'' => quote = Some(c),
            '(' => depth += 1,
            ')' => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return start + i + 1;
                }
            }
            _ => {}
        }
    }
    text.len()
}

// ---------------------------------------------------------------------------
// Tokenizer
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Str(String),
    Number(f64),
    LParen,
    RParen,
    LBracket,
    RBracket,
    Comma,
    Equals,
}

fn tokenize(input: &str) -> Result<Vec<Token>, ParseError> {
    let mut tokens = Vec::new();
    let mut chars = input.char_indices().peekable();

    while let Some(&(i, c)) = chars.peek() {
        match c {
            c if c.is_whitespace() => {
                chars.next();
            }
            '(' | ')' | '[' | ']' | ',' | '=' => {
                chars.next();
                tokens.push(match c {
                    '(' => Token::LParen,
                    ')' => Token::RParen,
                    '[' => Token::LBracket,
                    ']' => Token::RBracket,
                    ',' => Token::Comma,
                    _ => Token::Equals,
                });
            }
            '"' | '\'' => {
                chars.next();
                let mut value = String::new();
                let mut closed = false;
                while let Some((_, ch)) = chars.next() {
                    match ch {
                        '\\' => match chars.next() {
                            Some((_, 'n')) => value.push('\n'),
                            Some((_, 't')) => value.push('\t'),
                            Some((_, other)) => value.push(other),
                            None => break,
                        },
                        ch if ch == c => {
                            closed = true;
                            break;
                        }
                        ch => value.push(ch),
                    }
                }
                if !closed {
                    return Err(ParseError::malformed(format!(
                        "unterminated string starting at offset {}",
                        i
                    )));
                }
                tokens.push(Token::Str(value));
            }
            c if c.is_ascii_digit() || c == '-' || c == '+' || c == '.' => {
                let mut end = i;
                while let Some(&(j, ch)) = chars.peek() {
                    let sign_after_exp = (ch == '-' || ch == '+')
                        && matches!(input[..j].chars().next_back(), Some('e') | Some('E'));
                    if ch.is_ascii_digit()
                        || ch == '.'
                        || ch == 'e'
                        || ch == 'E'
                        || sign_after_exp
                        || j == i
                    {
                        end = j + ch.len_utf8();
                        chars.next();
                    } else {
                        break;
                    }
                }
                let literal = &input[i..end];
                let value = literal
                    .parse::<f64>()
                    .map_err(|_| ParseError::malformed(format!("invalid number `{}`", literal)))?;
                tokens.push(Token::Number(value));
            }
            c if c.is_alphabetic() || c == '_' => {
                let mut end = i;
                while let Some(&(j, ch)) = chars.peek() {
                    if ch.is_alphanumeric() || ch == '_' || ch == '.' {
                        end = j + ch.len_utf8();
                        chars.next();
                    } else {
                        break;
                    }
                }
                tokens.push(Token::Ident(input[i..end].to_string()));
            }
            other => {
                return Err(ParseError::malformed(format!(
                    "unexpected character `{}` at offset {}",
                    other, i
                )))
            }
        }
    }
    Ok(tokens)
}

// ---------------------------------------------------------------------------
// Call expression
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
enum Value {
    Number(f64),
    Text(String),
    Ident(String),
    List(Vec<Value>),
}

impl Value {
    fn as_number(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            Self::Text(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) | Self::Ident(s) => Some(s),
            _ => None,
        }
    }

    fn to_text(&self) -> Option<String> {
        match self {
            Self::Text(s) | Self::Ident(s) => Some(s.clone()),
            Self::Number(n) => Some(n.to_string()),
            Self::List(_) => None,
        }
    }

    fn describe(&self) -> String {
        match self {
            Self::Number(n) => format!("number {}", n),
            Self::Text(s) => format!("string {:?}", s),
            Self::Ident(s) => format!("identifier `{}`", s),
            Self::List(items) => format!("list of {}", items.len()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
struct Call {
    name: String,
    positional: Vec<Value>,
    named: Vec<(String, Value)>,
}

impl Call {
    fn named(&self, key: &str) -> Option<&Value> {
        self.named
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v)
    }

    /// First of `keys` present as a named argument, else positional `index`.
    fn text(&self, keys: &[&str], index: Option<usize>) -> Option<String> {
        keys.iter()
            .find_map(|key| self.named(key))
            .or_else(|| index.and_then(|i| self.positional.get(i)))
            .and_then(Value::to_text)
    }

    /// Positional arguments as a flat list of numbers; lists are expanded.
    fn positional_numbers(&self) -> Result<Vec<f64>, ParseError> {
        let mut numbers = Vec::new();
        for value in &self.positional {
            match value {
                Value::List(items) => {
                    for item in items {
                        numbers.push(number(item, &self.name)?);
                    }
                }
                other => numbers.push(number(other, &self.name)?),
            }
        }
        Ok(numbers)
    }
}

struct CallParser {
    tokens: Vec<Token>,
    pos: usize,
}

impl CallParser {
    fn new(tokens: Vec<Token>) -> Self {
        Self { tokens, pos: 0 }
    }

    fn parse(mut self) -> Result<Call, ParseError> {
        let name = match self.next() {
            Some(Token::Ident(name)) => name,
            Some(other) => {
                return Err(ParseError::malformed(format!(
                    "expected an action name, found {:?}",
                    other
                )))
            }
            None => return Err(ParseError::NoAction),
        };

        // A bare keyword such as `back` is a call without arguments.
        if self.peek().is_none() {
            return Ok(Call {
                name,
                positional: Vec::new(),
                named: Vec::new(),
            });
        }

        self.expect(&Token::LParen)?;
        let mut positional = Vec::new();
        let mut named = Vec::new();

        loop {
            if self.peek() == Some(&Token::RParen) {
                self.next();
                break;
            }
            let key = match (self.peek(), self.tokens.get(self.pos + 1)) {
                (Some(Token::Ident(key)), Some(Token::Equals)) => Some(key.clone()),
                _ => None,
            };
            if let Some(key) = key {
                self.pos += 2;
                named.push((key, self.value()?));
            } else {
                positional.push(self.value()?);
            }
            match self.next() {
                Some(Token::Comma) => continue,
                Some(Token::RParen) => break,
                Some(other) => {
                    return Err(ParseError::malformed(format!(
                        "expected `,` or `)`, found {:?}",
                        other
                    )))
                }
                None => return Err(ParseError::malformed("missing closing `)`")),
            }
        }

        if let Some(extra) = self.peek() {
            return Err(ParseError::malformed(format!(
                "unexpected {:?} after the action",
                extra
            )));
        }

        Ok(Call {
            name,
            positional,
            named,
        })
    }

    fn value(&mut self) -> Result<Value, ParseError> {
        match self.next() {
            Some(Token::Number(n)) => Ok(Value::Number(n)),
            Some(Token::Str(s)) => Ok(Value::Text(s)),
            Some(Token::Ident(s)) => Ok(Value::Ident(s)),
            Some(Token::LBracket) => {
                let mut items = Vec::new();
                if self.peek() == Some(&Token::RBracket) {
                    self.next();
                    return Ok(Value::List(items));
                }
                loop {
                    items.push(self.value()?);
                    match self.next() {
                        Some(Token::Comma) => continue,
                        Some(Token::RBracket) => return Ok(Value::List(items)),
                        _ => return Err(ParseError::malformed("unterminated list")),
                    }
                }
            }
            Some(other) => Err(ParseError::malformed(format!(
                "expected a value, found {:?}",
                other
            ))),
            None => Err(ParseError::malformed("missing value")),
        }
    }

    fn expect(&mut self, token: &Token) -> Result<(), ParseError> {
        match self.next() {
            Some(ref t) if t == token => Ok(()),
            Some(other) => Err(ParseError::malformed(format!(
                "expected {:?}, found {:?}",
                token, other
            ))),
            None => Err(ParseError::malformed(format!("expected {:?}", token))),
        }
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }
}
