#![allow(clippy::module_name_repetitions)]

//! Lexer and parser for the feedback command line.
//!
//! The lexer uses `regal` to produce a bounded token stream, while the parser
//! composes `winnow` combinators over those tokens to build structured
//! command values. Keywords are matched case-insensitively against the
//! [`catalog`](super::catalog) table.

use core::fmt;
use core::ops::Range;

use heapless::Vec as HeaplessVec;
use regal::IncrementalError;
use regal::TokenCache;
use regal_macros::RegalLexer;
use winnow::error::ErrMode;
use winnow::prelude::*;

use super::catalog::{self, CommandTag, KeySpec, KeyTag, Positional, ValueSpec};

/// Maximum number of tokens produced per line.
pub const MAX_TOKENS: usize = 48;
const MAX_CACHE_RECORDS: usize = MAX_TOKENS * 2;

/// Maximum number of channels accepted by a single `electrode` command.
pub const MAX_ELECTRODE_CHANNELS: usize = 16;

/// Lexical token kinds recognized by the grammar.
#[derive(RegalLexer, Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum TokenKind {
    /// Decimal or exponent literal.
    #[regex(r"[0-9]+\.[0-9]+(?:[eE][-+]?[0-9]+)?", priority = 2)]
    #[regex(r"[0-9]+[eE][-+]?[0-9]+", priority = 2)]
    Float,
    /// Unsuffixed integer literal.
    #[regex(r"[0-9]+")]
    Integer,
    /// Command keyword, setting name, or word argument such as `on` or `auto`.
    #[regex(r"[A-Za-z][A-Za-z0-9_-]*")]
    Ident,
    #[token("=")]
    Equals,
    #[token(",")]
    Comma,
    /// Separators between words; skipped.
    #[regex(r"[ \t]+", skip)]
    Whitespace,
    /// End-of-line token (`\r`, `\n`, or `\r\n`).
    #[token("\r\n")]
    #[token("\n")]
    #[token("\r")]
    Eol,
    /// Any character no other rule accepts.
    #[default]
    #[regex(r".", priority = 1024)]
    Error,
}

/// Lexed token; `span` indexes bytes of the input line.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Token<'a> {
    pub kind: TokenKind,
    pub lexeme: &'a str,
    pub span: Range<usize>,
}

/// Bounded token buffer.
pub type TokenBuffer<'a> = HeaplessVec<Token<'a>, MAX_TOKENS>;

/// Channel indices named by an `electrode` command.
pub type ChannelList = HeaplessVec<usize, MAX_ELECTRODE_CHANNELS>;

/// Lexer errors.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LexError {
    /// Line has more tokens than any command needs.
    TooManyTokens { processed: usize },
    /// Tokenizer gave up on the line.
    Engine,
}

impl fmt::Display for LexError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LexError::TooManyTokens { processed } => {
                write!(f, "command line too long ({processed} tokens, limit {MAX_TOKENS})")
            }
            LexError::Engine => write!(f, "tokenizer failed"),
        }
    }
}

/// Ways a token sequence fails to form a command.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum GrammarErrorKind<'a> {
    UnexpectedToken {
        expected: &'static str,
        found: Option<TokenKind>,
        span: Range<usize>,
    },
    UnexpectedEnd {
        expected: &'static str,
    },
    InvalidInteger {
        span: Range<usize>,
    },
    InvalidNumber {
        span: Range<usize>,
    },
    UnknownKey {
        span: Range<usize>,
        lexeme: &'a str,
    },
    TooManyChannels {
        span: Range<usize>,
    },
    InvalidToken {
        span: Range<usize>,
        lexeme: &'a str,
    },
}

impl fmt::Display for GrammarErrorKind<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GrammarErrorKind::UnexpectedToken {
                expected,
                found,
                span,
            } => write!(f, "expected {expected}, found {found:?} at {span:?}"),
            GrammarErrorKind::UnexpectedEnd { expected } => {
                write!(f, "unexpected end of input, expected {expected}")
            }
            GrammarErrorKind::InvalidInteger { span } => {
                write!(f, "invalid integer literal at {span:?}")
            }
            GrammarErrorKind::InvalidNumber { span } => {
                write!(f, "invalid numeric literal at {span:?}")
            }
            GrammarErrorKind::UnknownKey { span, lexeme } => {
                write!(f, "unknown setting `{lexeme}` at {span:?}")
            }
            GrammarErrorKind::TooManyChannels { span } => write!(
                f,
                "at most {MAX_ELECTRODE_CHANNELS} channels per electrode (at {span:?})"
            ),
            GrammarErrorKind::InvalidToken { span, lexeme } => {
                write!(f, "unsupported token `{lexeme}` at {span:?}")
            }
        }
    }
}

/// Grammar failure with its source location.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GrammarError<'a> {
    pub kind: GrammarErrorKind<'a>,
}

impl fmt::Display for GrammarError<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.kind.fmt(f)
    }
}

impl<'a> GrammarError<'a> {
    fn unexpected(expected: &'static str, token: Option<&Token<'a>>) -> Self {
        GrammarError {
            kind: match token {
                Some(tok) => GrammarErrorKind::UnexpectedToken {
                    expected,
                    found: Some(tok.kind),
                    span: tok.span.clone(),
                },
                None => GrammarErrorKind::UnexpectedEnd { expected },
            },
        }
    }

    fn invalid_integer(token: &Token<'a>) -> Self {
        GrammarError {
            kind: GrammarErrorKind::InvalidInteger {
                span: token.span.clone(),
            },
        }
    }

    fn invalid_number(token: &Token<'a>) -> Self {
        GrammarError {
            kind: GrammarErrorKind::InvalidNumber {
                span: token.span.clone(),
            },
        }
    }

    fn unknown_key(token: &Token<'a>) -> Self {
        GrammarError {
            kind: GrammarErrorKind::UnknownKey {
                span: token.span.clone(),
                lexeme: token.lexeme,
            },
        }
    }

    fn too_many_channels(token: &Token<'a>) -> Self {
        GrammarError {
            kind: GrammarErrorKind::TooManyChannels {
                span: token.span.clone(),
            },
        }
    }

    fn invalid_token(token: &Token<'a>) -> Self {
        GrammarError {
            kind: GrammarErrorKind::InvalidToken {
                span: token.span.clone(),
                lexeme: token.lexeme,
            },
        }
    }
}

type Input<'src, 'slice> = &'slice [Token<'src>];

/// Parser result; `Backtrack` lets the caller try another branch, `Cut`
/// commits to the current one.
type Parsed<'src, O> = Result<O, ErrMode<GrammarError<'src>>>;

/// Why a command line was rejected.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ParseError<'a> {
    Lex(LexError),
    Grammar(GrammarError<'a>),
}

impl fmt::Display for ParseError<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseError::Lex(err) => err.fmt(f),
            ParseError::Grammar(err) => err.fmt(f),
        }
    }
}

/// One parsed operator command.
#[derive(Clone, Debug, PartialEq)]
pub enum Command<'a> {
    Feedback(bool),
    Sampling(SamplingCommand),
    Retry(RetryCommand),
    Sweep(SweepCommand),
    Electrode(ElectrodeCommand),
    Voltage(f64),
    Frequency(f64),
    Run,
    Calibrate,
    Status,
    Help(HelpCommand<'a>),
}

/// Sampling fields to overwrite; `None` keeps the current value.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SamplingCommand {
    pub time_ms: Option<u32>,
    pub samples: Option<u32>,
    pub delay_ms: Option<u32>,
}

/// Threshold assignment for the Retry action.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ThresholdSetting {
    /// `threshold=auto`: fall back to the calibrated baseline.
    Baseline,
    Fixed(f64),
}

/// Selects the Retry action and overwrites the supplied fields.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct RetryCommand {
    pub threshold: Option<ThresholdSetting>,
    pub increase: Option<f64>,
    pub repeats: Option<u32>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SweepKind {
    Frequency,
    Voltage,
}

/// Selects a sweep action and overwrites the supplied fields.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SweepCommand {
    pub kind: SweepKind,
    pub start: Option<f64>,
    pub end: Option<f64>,
    pub steps: Option<u32>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ElectrodeCommand {
    pub channels: ChannelList,
    pub area: f64,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HelpCommand<'a> {
    pub topic: Option<&'a str>,
}

pub(crate) fn parse_tokens_partial<'src, 'slice>(
    tokens: &'slice [Token<'src>],
) -> Result<(Command<'src>, &'slice [Token<'src>]), GrammarError<'src>>
where
    'src: 'slice,
{
    let mut input = tokens;
    match command().parse_next(&mut input) {
        Ok(cmd) => Ok((cmd, input)),
        Err(ErrMode::Backtrack(err) | ErrMode::Cut(err)) => Err(err),
        Err(ErrMode::Incomplete(_)) => Err(GrammarError::unexpected("token", input.first())),
    }
}

/// Splits a command line into tokens, dropping whitespace.
pub fn lex(line: &str) -> Result<TokenBuffer<'_>, LexError> {
    let compiled = TokenKind::lexer();
    let mut cache: TokenCache<TokenKind, MAX_CACHE_RECORDS> = TokenCache::new();
    let partial = cache
        .rebuild(compiled, line)
        .map_err(map_incremental_error)?;
    let mut buffer = TokenBuffer::new();

    for record in cache.tokens() {
        if record.skipped {
            continue;
        }

        let span = record.start..record.end;
        let lexeme = &line[span.clone()];
        if buffer
            .push(Token {
                kind: record.token,
                lexeme,
                span,
            })
            .is_err()
        {
            return Err(LexError::TooManyTokens {
                processed: buffer.len() + 1,
            });
        }
    }

    if let Some(partial) = partial.filter(|partial| !partial.fragment.is_empty()) {
        let start = partial.start;
        let end = start + partial.fragment.len();
        if buffer
            .push(Token {
                kind: TokenKind::Error,
                lexeme: partial.fragment,
                span: start..end,
            })
            .is_err()
        {
            return Err(LexError::TooManyTokens {
                processed: buffer.len() + 1,
            });
        }
    }

    Ok(buffer)
}

fn map_incremental_error(error: IncrementalError) -> LexError {
    match error {
        IncrementalError::TokenOverflow => LexError::TooManyTokens {
            processed: MAX_TOKENS,
        },
        _ => LexError::Engine,
    }
}

/// Parse a command from the provided line.
pub fn parse(line: &str) -> Result<Command<'_>, ParseError<'_>> {
    let tokens = lex(line).map_err(ParseError::Lex)?;

    for token in tokens.iter() {
        if token.kind == TokenKind::Error {
            return Err(ParseError::Grammar(GrammarError::invalid_token(token)));
        }
    }

    let (command, mut rest) =
        parse_tokens_partial(tokens.as_slice()).map_err(ParseError::Grammar)?;

    while let Some((token, remaining)) = rest.split_first() {
        if token.kind == TokenKind::Eol {
            rest = remaining;
        } else {
            return Err(ParseError::Grammar(GrammarError::unexpected(
                "end of command",
                Some(token),
            )));
        }
    }

    Ok(command)
}

fn command<'src, 'slice>() -> impl Parser<Input<'src, 'slice>, Command<'src>, ErrMode<GrammarError<'src>>>
where
    'src: 'slice,
{
    move |input: &mut Input<'src, 'slice>| {
        let snapshot = *input;
        let command_token = expect_kind(TokenKind::Ident, "command keyword").parse_next(input)?;

        if let Some(spec) = catalog::find(command_token.lexeme) {
            let mut state = CommandState::new(spec.tag);
            parse_positional(spec.positional, input, &mut state)?;
            parse_assignments(spec.keys, input, &mut state)?;
            state.finish()
        } else {
            *input = snapshot;
            Err(ErrMode::Backtrack(GrammarError::unexpected(
                "command keyword",
                Some(&command_token),
            )))
        }
    }
}

fn parse_positional<'src, 'slice>(
    positional: Positional,
    input: &mut Input<'src, 'slice>,
    state: &mut CommandState<'src>,
) -> Parsed<'src, ()>
where
    'src: 'slice,
{
    match positional {
        Positional::None => Ok(()),
        Positional::Toggle => {
            let token = expect_kind(TokenKind::Ident, "on|off").parse_next(input)?;
            let enabled = if token.lexeme.eq_ignore_ascii_case("on") {
                true
            } else if token.lexeme.eq_ignore_ascii_case("off") {
                false
            } else {
                return Err(ErrMode::Cut(GrammarError::unexpected("on|off", Some(&token))));
            };
            state.set_toggle(enabled);
            Ok(())
        }
        Positional::SweepKind => {
            let token = expect_kind(TokenKind::Ident, "frequency|voltage").parse_next(input)?;
            let kind = if token.lexeme.eq_ignore_ascii_case("frequency") {
                SweepKind::Frequency
            } else if token.lexeme.eq_ignore_ascii_case("voltage") {
                SweepKind::Voltage
            } else {
                return Err(ErrMode::Cut(GrammarError::unexpected(
                    "frequency|voltage",
                    Some(&token),
                )));
            };
            state.set_sweep_kind(kind);
            Ok(())
        }
        Positional::Channels => parse_channels(input, state),
        Positional::Number => {
            let value = parse_number(input)?;
            state.set_setpoint(value);
            Ok(())
        }
        Positional::Topic => {
            if let Some((token, rest)) = input.split_first() {
                if token.kind == TokenKind::Ident {
                    state.set_topic(token.lexeme);
                    *input = rest;
                }
            }
            Ok(())
        }
    }
}

fn parse_channels<'src, 'slice>(
    input: &mut Input<'src, 'slice>,
    state: &mut CommandState<'src>,
) -> Parsed<'src, ()>
where
    'src: 'slice,
{
    loop {
        let token = expect_kind(TokenKind::Integer, "channel index").parse_next(input)?;
        let channel = token
            .lexeme
            .parse::<usize>()
            .map_err(|_| ErrMode::Cut(GrammarError::invalid_integer(&token)))?;
        if !state.push_channel(channel) {
            return Err(ErrMode::Cut(GrammarError::too_many_channels(&token)));
        }

        match input.split_first() {
            Some((separator, rest)) if separator.kind == TokenKind::Comma => *input = rest,
            _ => return Ok(()),
        }
    }
}

fn parse_assignments<'src, 'slice>(
    keys: &'static [KeySpec],
    input: &mut Input<'src, 'slice>,
    state: &mut CommandState<'src>,
) -> Parsed<'src, ()>
where
    'src: 'slice,
{
    while let Some((token, rest)) = input.split_first() {
        if token.kind != TokenKind::Ident {
            break;
        }

        let Some(key) = catalog::find_key(keys, token.lexeme) else {
            return Err(ErrMode::Cut(GrammarError::unknown_key(token)));
        };
        *input = rest;

        expect_kind(TokenKind::Equals, "=")
            .parse_next(input)
            .map_err(|err| err.cut())?;
        let value = parse_value(key.value, input)?;
        state.apply(key.tag, value)?;
    }

    Ok(())
}

fn parse_value<'src, 'slice>(
    spec: ValueSpec,
    input: &mut Input<'src, 'slice>,
) -> Parsed<'src, Value>
where
    'src: 'slice,
{
    match spec {
        ValueSpec::Integer => {
            let token = expect_kind(TokenKind::Integer, "integer")
                .parse_next(input)
                .map_err(|err| err.cut())?;
            let value = token
                .lexeme
                .parse::<u32>()
                .map_err(|_| ErrMode::Cut(GrammarError::invalid_integer(&token)))?;
            Ok(Value::Integer(value))
        }
        ValueSpec::Number => parse_number(input)
            .map(Value::Number)
            .map_err(|err| err.cut()),
        ValueSpec::Threshold => match input.split_first() {
            Some((token, rest))
                if token.kind == TokenKind::Ident && token.lexeme.eq_ignore_ascii_case("auto") =>
            {
                *input = rest;
                Ok(Value::Threshold(ThresholdSetting::Baseline))
            }
            _ => parse_number(input)
                .map(|value| Value::Threshold(ThresholdSetting::Fixed(value)))
                .map_err(|err| err.cut()),
        },
    }
}

fn parse_number<'src, 'slice>(
    input: &mut Input<'src, 'slice>,
) -> Parsed<'src, f64>
where
    'src: 'slice,
{
    match input.split_first() {
        Some((token, rest)) if matches!(token.kind, TokenKind::Integer | TokenKind::Float) => {
            let value = token
                .lexeme
                .parse::<f64>()
                .map_err(|_| ErrMode::Cut(GrammarError::invalid_number(token)))?;
            *input = rest;
            Ok(value)
        }
        Some((token, _)) => Err(ErrMode::Backtrack(GrammarError::unexpected(
            "number",
            Some(token),
        ))),
        None => Err(ErrMode::Backtrack(GrammarError::unexpected("number", None))),
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
enum Value {
    Integer(u32),
    Number(f64),
    Threshold(ThresholdSetting),
}

enum CommandState<'a> {
    Feedback { enabled: Option<bool> },
    Sampling(SamplingCommand),
    Retry(RetryCommand),
    Sweep {
        kind: Option<SweepKind>,
        start: Option<f64>,
        end: Option<f64>,
        steps: Option<u32>,
    },
    Electrode {
        channels: ChannelList,
        area: Option<f64>,
    },
    Setpoint {
        tag: CommandTag,
        value: Option<f64>,
    },
    Bare(CommandTag),
    Help { topic: Option<&'a str> },
}

impl<'a> CommandState<'a> {
    fn new(tag: CommandTag) -> Self {
        match tag {
            CommandTag::Feedback => CommandState::Feedback { enabled: None },
            CommandTag::Sampling => CommandState::Sampling(SamplingCommand::default()),
            CommandTag::Retry => CommandState::Retry(RetryCommand::default()),
            CommandTag::Sweep => CommandState::Sweep {
                kind: None,
                start: None,
                end: None,
                steps: None,
            },
            CommandTag::Electrode => CommandState::Electrode {
                channels: ChannelList::new(),
                area: None,
            },
            CommandTag::Voltage | CommandTag::Frequency => {
                CommandState::Setpoint { tag, value: None }
            }
            CommandTag::Run | CommandTag::Calibrate | CommandTag::Status => {
                CommandState::Bare(tag)
            }
            CommandTag::Help => CommandState::Help { topic: None },
        }
    }

    fn set_toggle(&mut self, value: bool) {
        if let CommandState::Feedback { enabled } = self {
            *enabled = Some(value);
        }
    }

    fn set_sweep_kind(&mut self, value: SweepKind) {
        if let CommandState::Sweep { kind, .. } = self {
            *kind = Some(value);
        }
    }

    fn set_setpoint(&mut self, number: f64) {
        if let CommandState::Setpoint { value, .. } = self {
            *value = Some(number);
        }
    }

    fn set_topic(&mut self, topic: &'a str) {
        if let CommandState::Help { topic: slot } = self {
            *slot = Some(topic);
        }
    }

    /// Returns `false` when the channel list is full.
    fn push_channel(&mut self, channel: usize) -> bool {
        match self {
            CommandState::Electrode { channels, .. } => channels.push(channel).is_ok(),
            _ => false,
        }
    }

    fn apply(&mut self, tag: KeyTag, value: Value) -> Parsed<'a, ()> {
        match (self, tag, value) {
            (CommandState::Sampling(sampling), KeyTag::SamplingTime, Value::Integer(ms)) => {
                sampling.time_ms = Some(ms);
            }
            (CommandState::Sampling(sampling), KeyTag::Samples, Value::Integer(count)) => {
                sampling.samples = Some(count);
            }
            (CommandState::Sampling(sampling), KeyTag::Delay, Value::Integer(ms)) => {
                sampling.delay_ms = Some(ms);
            }
            (CommandState::Retry(retry), KeyTag::Threshold, Value::Threshold(setting)) => {
                retry.threshold = Some(setting);
            }
            (CommandState::Retry(retry), KeyTag::Increase, Value::Number(volts)) => {
                retry.increase = Some(volts);
            }
            (CommandState::Retry(retry), KeyTag::Repeats, Value::Integer(count)) => {
                retry.repeats = Some(count);
            }
            (CommandState::Sweep { start, .. }, KeyTag::Start, Value::Number(number)) => {
                *start = Some(number);
            }
            (CommandState::Sweep { end, .. }, KeyTag::End, Value::Number(number)) => {
                *end = Some(number);
            }
            (CommandState::Sweep { steps, .. }, KeyTag::Steps, Value::Integer(count)) => {
                *steps = Some(count);
            }
            (CommandState::Electrode { area, .. }, KeyTag::Area, Value::Number(mm2)) => {
                *area = Some(mm2);
            }
            _ => {
                return Err(ErrMode::Cut(GrammarError::unexpected("setting", None)));
            }
        }
        Ok(())
    }

    fn finish(self) -> Parsed<'a, Command<'a>> {
        match self {
            CommandState::Feedback {
                enabled: Some(enabled),
            } => Ok(Command::Feedback(enabled)),
            CommandState::Sampling(sampling) => Ok(Command::Sampling(sampling)),
            CommandState::Retry(retry) => Ok(Command::Retry(retry)),
            CommandState::Sweep {
                kind: Some(kind),
                start,
                end,
                steps,
            } => Ok(Command::Sweep(SweepCommand {
                kind,
                start,
                end,
                steps,
            })),
            CommandState::Electrode {
                channels,
                area: Some(area),
            } => Ok(Command::Electrode(ElectrodeCommand { channels, area })),
            CommandState::Setpoint {
                tag: CommandTag::Voltage,
                value: Some(value),
            } => Ok(Command::Voltage(value)),
            CommandState::Setpoint {
                tag: CommandTag::Frequency,
                value: Some(value),
            } => Ok(Command::Frequency(value)),
            CommandState::Bare(CommandTag::Run) => Ok(Command::Run),
            CommandState::Bare(CommandTag::Calibrate) => Ok(Command::Calibrate),
            CommandState::Bare(CommandTag::Status) => Ok(Command::Status),
            CommandState::Help { topic } => Ok(Command::Help(HelpCommand { topic })),
            CommandState::Feedback { enabled: None } => Err(ErrMode::Backtrack(
                GrammarError::unexpected("on|off", None),
            )),
            CommandState::Sweep { kind: None, .. } => Err(ErrMode::Backtrack(
                GrammarError::unexpected("frequency|voltage", None),
            )),
            CommandState::Electrode { area: None, .. } => Err(ErrMode::Backtrack(
                GrammarError::unexpected("area=<mm2>", None),
            )),
            CommandState::Setpoint { .. } | CommandState::Bare(_) => Err(ErrMode::Backtrack(
                GrammarError::unexpected("command argument", None),
            )),
        }
    }
}

fn expect_kind<'src, 'slice>(
    kind: TokenKind,
    label: &'static str,
) -> impl Parser<Input<'src, 'slice>, Token<'src>, ErrMode<GrammarError<'src>>>
where
    'src: 'slice,
{
    move |input: &mut Input<'src, 'slice>| match input.split_first() {
        Some((token, rest)) if token.kind == kind => {
            *input = rest;
            Ok(token.clone())
        }
        Some((token, _)) => Err(ErrMode::Backtrack(GrammarError::unexpected(
            label,
            Some(token),
        ))),
        None => Err(ErrMode::Backtrack(GrammarError::unexpected(label, None))),
    }
}
