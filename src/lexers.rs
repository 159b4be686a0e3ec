//! The default parameter lexer set from spec.md §4.C.
//!
//! Each lexer takes a [`Cursor`] by value and returns either the parsed
//! value together with the cursor advanced past it, or a [`ParamError`]
//! (the source cursor is simply dropped on failure; see the module doc on
//! [`crate::cursor`]).

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::cursor::Cursor;
use crate::error::ParamError;

/// Function signature shared by every parameter lexer.
pub type LexerFn = Arc<dyn for<'a> Fn(Cursor<'a>) -> LexResult<'a> + Send + Sync>;

pub type LexResult<'a> = Result<(ParamValue, Cursor<'a>), ParamError>;

/// Wraps a plain lexer function pointer as a [`LexerFn`].
pub fn lexer(f: for<'a> fn(Cursor<'a>) -> LexResult<'a>) -> LexerFn {
    Arc::new(f)
}

/// The value produced by a parameter lexer. Commands pattern-match on the
/// variant they expect; a mismatch is a command-authoring bug, not a user
/// error.
#[derive(Debug, Clone, PartialEq)]
pub enum ParamValue {
    UInt(u32),
    Int(i32),
    Bool(bool),
    IBool(i32),
    Char(char),
    Channels(Vec<char>),
    Str(String),
    KeySig(BTreeMap<char, i8>),
    Acc(Accidental),
    Binop(BinOp),
    Compare(CompareOp),
    /// The tail of a variadic parameter.
    List(Vec<ParamValue>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Accidental {
    Shift(i32),
    Neutral,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Pow,
    Mod,
}

impl BinOp {
    pub fn apply(self, a: i64, b: i64) -> Option<i64> {
        match self {
            BinOp::Add => a.checked_add(b),
            BinOp::Sub => a.checked_sub(b),
            BinOp::Mul => a.checked_mul(b),
            BinOp::Div => a.checked_div(b),
            BinOp::Mod => a.checked_rem(b),
            BinOp::Pow => u32::try_from(b).ok().and_then(|e| a.checked_pow(e)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareOp {
    Lt,
    Gt,
    Le,
    Ge,
    Eq,
    Ne,
}

impl CompareOp {
    pub fn apply(self, a: i64, b: i64) -> bool {
        match self {
            CompareOp::Lt => a < b,
            CompareOp::Gt => a > b,
            CompareOp::Le => a <= b,
            CompareOp::Ge => a >= b,
            CompareOp::Eq => a == b,
            CompareOp::Ne => a != b,
        }
    }
}

fn parse_uint_token(token: &str) -> u64 {
    if let Some(hex) = token.strip_prefix("0h") {
        u64::from_str_radix(hex, 16).unwrap_or(0)
    } else if let Some(bin) = token.strip_prefix("0b") {
        u64::from_str_radix(bin, 2).unwrap_or(0)
    } else {
        token.parse().unwrap_or(0)
    }
}

fn lex_uint_raw(c: Cursor<'_>) -> Result<(u64, Cursor<'_>), ParamError> {
    if let Some((tok, next)) = c.trim("0h%x+") {
        return Ok((parse_uint_token(tok), next));
    }
    if let Some((tok, next)) = c.trim("0b[01]+") {
        return Ok((parse_uint_token(tok), next));
    }
    if let Some((tok, next)) = c.trim("%d+") {
        return Ok((parse_uint_token(tok), next));
    }
    Err(ParamError::new("expected an unsigned integer"))
}

pub fn lex_uint(c: Cursor<'_>) -> LexResult<'_> {
    let (v, next) = lex_uint_raw(c)?;
    let v = u32::try_from(v).map_err(|_| ParamError::new("integer too large"))?;
    Ok((ParamValue::UInt(v), next))
}

fn lex_uint_bounded(c: Cursor<'_>, max: u64) -> LexResult<'_> {
    let (v, next) = lex_uint_raw(c)?;
    if v > max {
        return Err(ParamError::new("integer out of range"));
    }
    Ok((ParamValue::UInt(v as u32), next))
}

pub fn lex_uint8(c: Cursor<'_>) -> LexResult<'_> {
    lex_uint_bounded(c, u8::MAX as u64)
}

pub fn lex_uint16(c: Cursor<'_>) -> LexResult<'_> {
    lex_uint_bounded(c, u16::MAX as u64)
}

fn lex_int_raw(c: Cursor<'_>) -> Result<(i64, Cursor<'_>), ParamError> {
    if let Some(next) = c.trim_literal("-") {
        let (v, next) = lex_uint_raw(next)?;
        let v = i64::try_from(v).map_err(|_| ParamError::new("integer too large"))?;
        Ok((-v, next))
    } else {
        let (v, next) = lex_uint_raw(c)?;
        let v = i64::try_from(v).map_err(|_| ParamError::new("integer too large"))?;
        Ok((v, next))
    }
}

pub fn lex_int(c: Cursor<'_>) -> LexResult<'_> {
    let (v, next) = lex_int_raw(c)?;
    let v = i32::try_from(v).map_err(|_| ParamError::new("integer too large"))?;
    Ok((ParamValue::Int(v), next))
}

fn lex_int_bounded(c: Cursor<'_>, lo: i64, hi: i64) -> LexResult<'_> {
    let (v, next) = lex_int_raw(c)?;
    if v < lo || v > hi {
        return Err(ParamError::new("integer out of range"));
    }
    Ok((ParamValue::Int(v as i32), next))
}

pub fn lex_int8(c: Cursor<'_>) -> LexResult<'_> {
    lex_int_bounded(c, i8::MIN as i64, i8::MAX as i64)
}

pub fn lex_int16(c: Cursor<'_>) -> LexResult<'_> {
    lex_int_bounded(c, i16::MIN as i64, i16::MAX as i64)
}

pub fn lex_byte(c: Cursor<'_>) -> LexResult<'_> {
    let (v, next) = lex_int_bounded(c, i8::MIN as i64, i8::MAX as i64)?;
    let ParamValue::Int(v) = v else { unreachable!() };
    Ok((ParamValue::UInt((v as i8 as u8) as u32), next))
}

pub fn lex_word(c: Cursor<'_>) -> LexResult<'_> {
    let (v, next) = lex_int_bounded(c, i16::MIN as i64, i16::MAX as i64)?;
    let ParamValue::Int(v) = v else { unreachable!() };
    Ok((ParamValue::UInt((v as i16 as u16) as u32), next))
}

pub fn lex_bool(c: Cursor<'_>) -> LexResult<'_> {
    if let Some(next) = c.trim_literal("0") {
        return Ok((ParamValue::Bool(false), next));
    }
    if let Some(next) = c.trim_literal("1") {
        return Ok((ParamValue::Bool(true), next));
    }
    Err(ParamError::new("expected 0 or 1"))
}

pub fn lex_ibool(c: Cursor<'_>) -> LexResult<'_> {
    let (v, next) = lex_bool(c)?;
    let ParamValue::Bool(b) = v else { unreachable!() };
    Ok((ParamValue::IBool(b as i32), next))
}

pub fn lex_char(c: Cursor<'_>) -> LexResult<'_> {
    let mut chars = c.remaining().chars();
    let ch = chars.next().ok_or_else(|| ParamError::new("expected a character"))?;
    let rest = chars.next();
    if let Some(n) = rest {
        if !n.is_whitespace() {
            return Err(ParamError::new("character must be followed by whitespace"));
        }
    }
    Ok((ParamValue::Char(ch), c.advance(ch.len_utf8())))
}

pub fn lex_channel(c: Cursor<'_>) -> LexResult<'_> {
    let (tok, next) = c
        .trim("%S+")
        .or_else(|| c.trim("[^ \\t\\r\\n]+"))
        .ok_or_else(|| ParamError::new("expected a channel run"))?;
    let mut seen = Vec::new();
    for ch in tok.chars() {
        if !seen.contains(&ch) {
            seen.push(ch);
        }
    }
    Ok((ParamValue::Channels(seen), next))
}

pub fn lex_qstring(c: Cursor<'_>) -> LexResult<'_> {
    let rem = c.remaining();
    let quote = match rem.chars().next() {
        Some(q @ ('"' | '\'')) => q,
        _ => return Err(ParamError::new("expected a quoted string")),
    };
    let mut out = String::new();
    let mut chars = rem.char_indices().skip(1);
    let mut consumed = quote.len_utf8();
    let mut escaping = false;
    let mut closed = false;
    for (idx, ch) in &mut chars {
        consumed = idx + ch.len_utf8();
        if escaping {
            out.push(match ch {
                'n' => '\n',
                't' => '\t',
                other => other,
            });
            escaping = false;
            continue;
        }
        if ch == '\\' {
            escaping = true;
            continue;
        }
        if ch == quote {
            closed = true;
            break;
        }
        out.push(ch);
    }
    if !closed {
        return Err(ParamError::new("unterminated quoted string"));
    }
    Ok((ParamValue::Str(out), c.advance(consumed)))
}

pub fn lex_ident(c: Cursor<'_>) -> LexResult<'_> {
    let (tok, next) = c
        .trim("[A-Za-z0-9_]+")
        .ok_or_else(|| ParamError::new("expected an identifier"))?;
    Ok((ParamValue::Str(tok.to_string()), next))
}

pub fn lex_ident2(c: Cursor<'_>) -> LexResult<'_> {
    let (tok, next) = c
        .trim("[A-Za-z_][A-Za-z0-9_]*")
        .ok_or_else(|| ParamError::new("expected an identifier"))?;
    Ok((ParamValue::Str(tok.to_string()), next))
}

pub fn lex_key_sig(c: Cursor<'_>) -> LexResult<'_> {
    let (tok, next) = c
        .trim("[+\\-=][A-Ga-g]+")
        .ok_or_else(|| ParamError::new("expected a key signature"))?;
    let mut chars = tok.chars();
    let sign = match chars.next() {
        Some('+') => 1i8,
        Some('-') => -1i8,
        Some('=') => 0i8,
        _ => unreachable!("pattern guarantees a leading sign"),
    };
    let mut map = BTreeMap::new();
    for note in chars {
        map.insert(note.to_ascii_uppercase(), sign);
    }
    Ok((ParamValue::KeySig(map), next))
}

pub fn lex_acc(c: Cursor<'_>) -> LexResult<'_> {
    let after_eq = c.trim_literal("=");
    let probe = after_eq.unwrap_or(c);
    let shifts = probe.trim("[+\\-]*");
    let (tok, next) = shifts.unwrap_or(("", probe));
    if tok.is_empty() {
        if after_eq.is_some() {
            return Ok((ParamValue::Acc(Accidental::Neutral), next));
        }
        return Err(ParamError::new("expected an accidental"));
    }
    let shift = tok.chars().fold(0i32, |acc, ch| match ch {
        '+' => acc + 1,
        '-' => acc - 1,
        _ => acc,
    });
    Ok((ParamValue::Acc(Accidental::Shift(shift)), next))
}

pub fn lex_binop(c: Cursor<'_>) -> LexResult<'_> {
    let rem = c.remaining();
    let op = match rem.chars().next() {
        Some('+') => BinOp::Add,
        Some('-') => BinOp::Sub,
        Some('*') => BinOp::Mul,
        Some('/') => BinOp::Div,
        Some('^') => BinOp::Pow,
        Some('%') => BinOp::Mod,
        _ => return Err(ParamError::new("expected a binary operator")),
    };
    Ok((ParamValue::Binop(op), c.advance(1)))
}

pub fn lex_compare(c: Cursor<'_>) -> LexResult<'_> {
    let rem = c.remaining();
    for (text, op) in [
        ("<=", CompareOp::Le),
        (">=", CompareOp::Ge),
        ("==", CompareOp::Eq),
        ("!=", CompareOp::Ne),
        ("<", CompareOp::Lt),
        (">", CompareOp::Gt),
    ] {
        if rem.starts_with(text) {
            return Ok((ParamValue::Compare(op), c.advance(text.len())));
        }
    }
    Err(ParamError::new("expected a comparison operator"))
}
