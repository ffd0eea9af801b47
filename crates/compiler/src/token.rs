//! Tokens: kind, source span and payload.
//!
//! Token equality ignores spans; the parser and the tests compare tokens
//! structurally. Spans are half-open byte ranges into the source.

use std::fmt;

/// Half-open byte range `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

impl Span {
    pub fn new(start: usize, end: usize) -> Span {
        debug_assert!(end >= start);
        Span { start, end }
    }

    pub fn zero() -> Span {
        Span { start: 0, end: 0 }
    }

    /// Smallest span covering both inputs.
    pub fn combine(a: Span, b: Span) -> Span {
        Span {
            start: a.start.min(b.start),
            end: a.end.max(b.end),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Keyword {
    Import,
    Fun,
    Act,
    SelfKw,
    Lambda,
    Impure,
    Fork,
    Lazy,
    Struct,
    Union,
    Enum,
    If,
    Else,
    Is,
    As,
    Intrinsic,
}

impl Keyword {
    pub fn from_str(text: &str) -> Option<Keyword> {
        Some(match text {
            "import" => Keyword::Import,
            "fun" => Keyword::Fun,
            "act" => Keyword::Act,
            "self" => Keyword::SelfKw,
            "lambda" => Keyword::Lambda,
            "impure" => Keyword::Impure,
            "fork" => Keyword::Fork,
            "lazy" => Keyword::Lazy,
            "struct" => Keyword::Struct,
            "union" => Keyword::Union,
            "enum" => Keyword::Enum,
            "if" => Keyword::If,
            "else" => Keyword::Else,
            "is" => Keyword::Is,
            "as" => Keyword::As,
            "intrinsic" => Keyword::Intrinsic,
            _ => return None,
        })
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Keyword::Import => "import",
            Keyword::Fun => "fun",
            Keyword::Act => "act",
            Keyword::SelfKw => "self",
            Keyword::Lambda => "lambda",
            Keyword::Impure => "impure",
            Keyword::Fork => "fork",
            Keyword::Lazy => "lazy",
            Keyword::Struct => "struct",
            Keyword::Union => "union",
            Keyword::Enum => "enum",
            Keyword::If => "if",
            Keyword::Else => "else",
            Keyword::Is => "is",
            Keyword::As => "as",
            Keyword::Intrinsic => "intrinsic",
        }
    }
}

impl fmt::Display for Keyword {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    // Operators.
    OpPlus,
    OpPlusPlus,
    OpMinus,
    OpMinusMinus,
    OpStar,
    OpSlash,
    OpRem,
    OpAmp,
    OpAmpAmp,
    OpPipe,
    OpPipePipe,
    OpHat,
    OpTilde,
    OpEq,
    OpEqEq,
    OpBang,
    OpBangEq,
    OpLe,
    OpLeEq,
    OpGt,
    OpGtEq,
    OpShiftL,
    OpShiftR,
    OpSemi,
    OpQMark,
    OpQMarkQMark,
    OpDot,
    OpColonColon,
    OpParenParen,

    // Separators.
    SepOpenParen,
    SepCloseParen,
    SepOpenCurly,
    SepCloseCurly,
    SepOpenSquare,
    SepCloseSquare,
    SepComma,
    SepColon,
    SepArrow,
    Discard,

    // Literals.
    LitInt,
    LitLong,
    LitFloat,
    LitBool,
    LitChar,
    LitString,

    Keyword,
    Identifier,
    LineComment,
    Error,
    End,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenCat {
    Operator,
    Separator,
    Literal,
    Keyword,
    Identifier,
    Comment,
    Error,
    End,
}

impl TokenKind {
    pub fn cat(self) -> TokenCat {
        use TokenKind::*;
        match self {
            OpPlus | OpPlusPlus | OpMinus | OpMinusMinus | OpStar | OpSlash | OpRem | OpAmp
            | OpAmpAmp | OpPipe | OpPipePipe | OpHat | OpTilde | OpEq | OpEqEq | OpBang
            | OpBangEq | OpLe | OpLeEq | OpGt | OpGtEq | OpShiftL | OpShiftR | OpSemi | OpQMark
            | OpQMarkQMark | OpDot | OpColonColon | OpParenParen => TokenCat::Operator,
            SepOpenParen | SepCloseParen | SepOpenCurly | SepCloseCurly | SepOpenSquare
            | SepCloseSquare | SepComma | SepColon | SepArrow | Discard => TokenCat::Separator,
            LitInt | LitLong | LitFloat | LitBool | LitChar | LitString => TokenCat::Literal,
            TokenKind::Keyword => TokenCat::Keyword,
            Identifier => TokenCat::Identifier,
            LineComment => TokenCat::Comment,
            Error => TokenCat::Error,
            End => TokenCat::End,
        }
    }

    fn name(self) -> &'static str {
        use TokenKind::*;
        match self {
            OpPlus => "plus",
            OpPlusPlus => "plusplus",
            OpMinus => "minus",
            OpMinusMinus => "minusminus",
            OpStar => "star",
            OpSlash => "slash",
            OpRem => "rem",
            OpAmp => "amp",
            OpAmpAmp => "ampamp",
            OpPipe => "pipe",
            OpPipePipe => "pipepipe",
            OpHat => "hat",
            OpTilde => "tilde",
            OpEq => "eq",
            OpEqEq => "eqeq",
            OpBang => "bang",
            OpBangEq => "bangeq",
            OpLe => "le",
            OpLeEq => "leeq",
            OpGt => "gt",
            OpGtEq => "gteq",
            OpShiftL => "shiftl",
            OpShiftR => "shiftr",
            OpSemi => "semi",
            OpQMark => "qmark",
            OpQMarkQMark => "qmarkqmark",
            OpDot => "dot",
            OpColonColon => "coloncolon",
            OpParenParen => "parenparen",
            SepOpenParen => "openparen",
            SepCloseParen => "closeparen",
            SepOpenCurly => "opencurly",
            SepCloseCurly => "closecurly",
            SepOpenSquare => "opensquare",
            SepCloseSquare => "closesquare",
            SepComma => "comma",
            SepColon => "colon",
            SepArrow => "arrow",
            Discard => "discard",
            LitInt => "int",
            LitLong => "long",
            LitFloat => "float",
            LitBool => "bool",
            LitChar => "char",
            LitString => "string",
            Keyword => "keyword",
            Identifier => "identifier",
            LineComment => "comment",
            Error => "error",
            End => "end",
        }
    }

    /// Canonical source text of punctuation kinds.
    pub fn punctuation(self) -> Option<&'static str> {
        use TokenKind::*;
        Some(match self {
            OpPlus => "+",
            OpPlusPlus => "++",
            OpMinus => "-",
            OpMinusMinus => "--",
            OpStar => "*",
            OpSlash => "/",
            OpRem => "%",
            OpAmp => "&",
            OpAmpAmp => "&&",
            OpPipe => "|",
            OpPipePipe => "||",
            OpHat => "^",
            OpTilde => "~",
            OpEq => "=",
            OpEqEq => "==",
            OpBang => "!",
            OpBangEq => "!=",
            OpLe => "<",
            OpLeEq => "<=",
            OpGt => ">",
            OpGtEq => ">=",
            OpShiftL => "<<",
            OpShiftR => ">>",
            OpSemi => ";",
            OpQMark => "?",
            OpQMarkQMark => "??",
            OpDot => ".",
            OpColonColon => "::",
            OpParenParen => "()",
            SepOpenParen => "(",
            SepCloseParen => ")",
            SepOpenCurly => "{",
            SepCloseCurly => "}",
            SepOpenSquare => "[",
            SepCloseSquare => "]",
            SepComma => ",",
            SepColon => ":",
            SepArrow => "->",
            Discard => "_",
            _ => return None,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TokenPayload {
    None,
    LitInt(i32),
    LitLong(i64),
    LitFloat(f32),
    LitBool(bool),
    LitChar(u8),
    LitString(String),
    Keyword(Keyword),
    Identifier(String),
    Comment(String),
    Error(String),
}

#[derive(Debug, Clone)]
pub struct Token {
    kind: TokenKind,
    payload: TokenPayload,
    span: Span,
}

// Equality is structural: spans are positional metadata, not identity.
impl PartialEq for Token {
    fn eq(&self, other: &Token) -> bool {
        self.kind == other.kind && self.payload == other.payload
    }
}

impl Token {
    pub fn new(kind: TokenKind, payload: TokenPayload, span: Span) -> Token {
        Token {
            kind,
            payload,
            span,
        }
    }

    pub fn kind(&self) -> TokenKind {
        self.kind
    }

    pub fn cat(&self) -> TokenCat {
        self.kind.cat()
    }

    pub fn span(&self) -> Span {
        self.span
    }

    pub fn payload(&self) -> &TokenPayload {
        &self.payload
    }

    pub fn is_end(&self) -> bool {
        self.kind == TokenKind::End
    }

    /// Keyword payload; `None` for any other kind, error tokens included.
    pub fn keyword(&self) -> Option<Keyword> {
        match self.payload {
            TokenPayload::Keyword(kw) if self.kind == TokenKind::Keyword => Some(kw),
            _ => None,
        }
    }

    /// Identifier text; `None` for any other kind, error tokens included.
    pub fn identifier(&self) -> Option<&str> {
        match &self.payload {
            TokenPayload::Identifier(id) if self.kind == TokenKind::Identifier => Some(id),
            _ => None,
        }
    }

    pub fn error_message(&self) -> Option<&str> {
        match &self.payload {
            TokenPayload::Error(msg) => Some(msg),
            _ => None,
        }
    }

    /// Canonical source text that lexes back to an equivalent token.
    pub fn to_source(&self) -> String {
        if let Some(text) = self.kind.punctuation() {
            return text.to_string();
        }
        match &self.payload {
            TokenPayload::LitInt(val) => val.to_string(),
            TokenPayload::LitLong(val) => val.to_string(),
            TokenPayload::LitFloat(val) => format!("{val}f"),
            TokenPayload::LitBool(val) => val.to_string(),
            TokenPayload::LitChar(val) => format!("'{}'", escape_byte(*val, b'\'')),
            TokenPayload::LitString(val) => {
                let mut out = String::from("\"");
                for byte in val.bytes() {
                    out.push_str(&escape_byte(byte, b'"'));
                }
                out.push('"');
                out
            }
            TokenPayload::Keyword(kw) => kw.as_str().to_string(),
            TokenPayload::Identifier(id) => id.clone(),
            TokenPayload::Comment(text) => format!("//{text}"),
            TokenPayload::Error(_) | TokenPayload::None => String::new(),
        }
    }
}

fn escape_byte(byte: u8, quote: u8) -> String {
    match byte {
        b'\\' => "\\\\".to_string(),
        b'\n' => "\\n".to_string(),
        b'\t' => "\\t".to_string(),
        b'\r' => "\\r".to_string(),
        0 => "\\0".to_string(),
        0x07 => "\\a".to_string(),
        0x08 => "\\b".to_string(),
        0x0C => "\\f".to_string(),
        0x0B => "\\v".to_string(),
        b if b == quote => format!("\\{}", quote as char),
        b => (b as char).to_string(),
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.kind.name())?;
        match &self.payload {
            TokenPayload::None => Ok(()),
            TokenPayload::LitInt(val) => write!(f, "-{val}"),
            TokenPayload::LitLong(val) => write!(f, "-{val}"),
            TokenPayload::LitFloat(val) => write!(f, "-{val}"),
            TokenPayload::LitBool(val) => write!(f, "-{val}"),
            TokenPayload::LitChar(val) => write!(f, "-{}", *val as char),
            TokenPayload::LitString(val) => write!(f, "-{val}"),
            TokenPayload::Keyword(kw) => write!(f, "-{kw}"),
            TokenPayload::Identifier(id) => write!(f, "-{id}"),
            TokenPayload::Comment(text) => write!(f, "-{text}"),
            TokenPayload::Error(msg) => write!(f, "-{msg}"),
        }
    }
}

// Factories, mirroring the construction sites the lexer needs.

pub fn end_token(span: Span) -> Token {
    Token::new(TokenKind::End, TokenPayload::None, span)
}

pub fn basic_token(kind: TokenKind, span: Span) -> Token {
    Token::new(kind, TokenPayload::None, span)
}

pub fn error_token(msg: impl Into<String>, span: Span) -> Token {
    Token::new(TokenKind::Error, TokenPayload::Error(msg.into()), span)
}

pub fn lit_int_token(val: i32, span: Span) -> Token {
    Token::new(TokenKind::LitInt, TokenPayload::LitInt(val), span)
}

pub fn lit_long_token(val: i64, span: Span) -> Token {
    Token::new(TokenKind::LitLong, TokenPayload::LitLong(val), span)
}

pub fn lit_float_token(val: f32, span: Span) -> Token {
    Token::new(TokenKind::LitFloat, TokenPayload::LitFloat(val), span)
}

pub fn lit_bool_token(val: bool, span: Span) -> Token {
    Token::new(TokenKind::LitBool, TokenPayload::LitBool(val), span)
}

pub fn lit_char_token(val: u8, span: Span) -> Token {
    Token::new(TokenKind::LitChar, TokenPayload::LitChar(val), span)
}

pub fn lit_string_token(val: impl Into<String>, span: Span) -> Token {
    Token::new(TokenKind::LitString, TokenPayload::LitString(val.into()), span)
}

pub fn keyword_token(kw: Keyword, span: Span) -> Token {
    Token::new(TokenKind::Keyword, TokenPayload::Keyword(kw), span)
}

pub fn identifier_token(id: impl Into<String>, span: Span) -> Token {
    Token::new(
        TokenKind::Identifier,
        TokenPayload::Identifier(id.into()),
        span,
    )
}

pub fn line_comment_token(text: impl Into<String>, span: Span) -> Token {
    Token::new(
        TokenKind::LineComment,
        TokenPayload::Comment(text.into()),
        span,
    )
}
