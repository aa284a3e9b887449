// src/scan/css.rs
// =============================================================================
// CSS scanning.
//
// Only `url(...)` tokens inside declaration values are candidates:
//
//   a { background: url("/img/bg.png") }          -> /img/bg.png
//   @font-face { src: url(/fonts/a.woff2) }       -> /fonts/a.woff2
//   @import url(/print.css);                      -> not a declaration
//   x { background: url(data:image/png;base64,) } -> data URIs are skipped
//
// The lexer knows strings, comments, escapes and the url() form; everything
// else is skipped byte by byte. A tiny state machine on top tracks whether
// the current token sits in a declaration value.
// =============================================================================

use futures::future::{BoxFuture, FutureExt};
use tokio::io::AsyncRead;

use super::feed::{find, trim, Feed, Step};
use super::ScanTask;
use crate::error::ScanError;

/// Where a piece of CSS came from; `style` attributes hold bare declarations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CssContext {
    /// A stylesheet or the body of a <style> element
    Block,
    /// The value of a `style` attribute
    Inline,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Url(Vec<u8>),
    AtKeyword,
    Colon,
    Semicolon,
    Open,
    Close,
}

// Declaration-level position tracking
struct Grammar {
    inline: bool,
    depth: usize,
    at_rule: bool,
    in_value: bool,
}

impl Grammar {
    fn new(context: CssContext) -> Self {
        Grammar {
            inline: context == CssContext::Inline,
            depth: 0,
            at_rule: false,
            in_value: false,
        }
    }

    // Returns the url value when `token` is a url() inside a declaration value.
    fn advance(&mut self, token: Token) -> Option<Vec<u8>> {
        match token {
            Token::Url(value) if self.in_value => return Some(value),
            Token::Url(_) => {}
            Token::AtKeyword => {
                if !self.in_value {
                    self.at_rule = true;
                }
            }
            Token::Colon => {
                if !self.at_rule && (self.inline || self.depth > 0) {
                    self.in_value = true;
                }
            }
            Token::Semicolon => self.end_statement(),
            Token::Open => {
                self.depth += 1;
                self.end_statement();
            }
            Token::Close => {
                self.depth = self.depth.saturating_sub(1);
                self.end_statement();
            }
        }
        None
    }

    fn end_statement(&mut self) {
        self.at_rule = false;
        self.in_value = false;
    }
}

impl ScanTask {
    /// Scans a stylesheet, a <style> body, or a style attribute value.
    pub(crate) fn scan_css<'a, R>(
        &'a self,
        reader: R,
        context: CssContext,
    ) -> BoxFuture<'a, Result<(), ScanError>>
    where
        R: AsyncRead + Unpin + Send + 'a,
    {
        async move {
            let mut feed = Feed::new(reader);
            let mut grammar = Grammar::new(context);
            while let Some(token) = feed.next(lex).await? {
                let Some(value) = grammar.advance(token) else {
                    continue;
                };
                if value.len() >= 5 && value[..5].eq_ignore_ascii_case(b"data:") {
                    continue;
                }
                self.reference(&String::from_utf8_lossy(&value))?;
            }
            Ok(())
        }
        .boxed()
    }
}

fn lex(buf: &[u8], eof: bool) -> Step<Token> {
    let more = || if eof { Step::Skip(buf.len()) } else { Step::More };

    match buf[0] {
        b if b.is_ascii_whitespace() => {
            let end = buf
                .iter()
                .position(|b| !b.is_ascii_whitespace())
                .unwrap_or(buf.len());
            Step::Skip(end)
        }
        b'/' if buf.len() < 2 => more(),
        b'/' if buf[1] == b'*' => match find(buf, 2, b"*/") {
            Some(end) => Step::Skip(end + 2),
            None => more(),
        },
        b'"' | b'\'' => match string_end(buf, 0) {
            Some((end, _)) => Step::Skip(end),
            None => more(),
        },
        b'\\' if buf.len() < 2 => more(),
        b'\\' => Step::Skip(2),
        b'{' => Step::Token(Token::Open, 1),
        b'}' => Step::Token(Token::Close, 1),
        b';' => Step::Token(Token::Semicolon, 1),
        b':' => Step::Token(Token::Colon, 1),
        b'@' => match ident_end(buf, 1) {
            Some(end) => Step::Token(Token::AtKeyword, end),
            None if eof => Step::Token(Token::AtKeyword, buf.len()),
            None => Step::More,
        },
        b if is_ident_start(b) => {
            let Some(end) = ident_end(buf, 0) else {
                return more();
            };
            if end < buf.len() && buf[end] == b'(' && buf[..end].eq_ignore_ascii_case(b"url") {
                return match url_body(buf, end + 1) {
                    Some((Some(value), used)) => Step::Token(Token::Url(value), used),
                    Some((None, used)) => Step::Skip(used),
                    None => more(),
                };
            }
            Step::Skip(end)
        }
        _ => Step::Skip(1),
    }
}

fn is_ident_start(b: u8) -> bool {
    b.is_ascii_alphabetic() || b == b'_' || b == b'-' || b >= 0x80
}

// End of the identifier starting at `from`; None if it runs to the end of `buf`.
fn ident_end(buf: &[u8], from: usize) -> Option<usize> {
    let mut i = from;
    while i < buf.len() {
        match buf[i] {
            b'\\' => i += 2,
            b if b.is_ascii_alphanumeric() || b == b'_' || b == b'-' || b >= 0x80 => i += 1,
            _ => return Some(i),
        }
    }
    None
}

// End of the string starting at `start` and whether it was closed by its
// quote. An unescaped newline ends a (bad) string without consuming it.
fn string_end(buf: &[u8], start: usize) -> Option<(usize, bool)> {
    let quote = buf[start];
    let mut i = start + 1;
    while i < buf.len() {
        match buf[i] {
            b'\\' => i += 2,
            b'\n' => return Some((i, false)),
            b if b == quote => return Some((i + 1, true)),
            _ => i += 1,
        }
    }
    None
}

// Parses the body of url( starting right after the parenthesis.
// Returns the value (None for a bad url) and the bytes consumed from buf[0],
// or None when the body is incomplete.
fn url_body(buf: &[u8], open: usize) -> Option<(Option<Vec<u8>>, usize)> {
    let mut i = open;
    while i < buf.len() && buf[i].is_ascii_whitespace() {
        i += 1;
    }
    let first = *buf.get(i)?;

    if first == b'"' || first == b'\'' {
        let (end, closed) = string_end(buf, i)?;
        if !closed {
            return Some((None, skip_to_paren(buf, end)?));
        }
        let value = buf[i + 1..end - 1].to_vec();
        let mut j = end;
        while j < buf.len() && buf[j].is_ascii_whitespace() {
            j += 1;
        }
        return match *buf.get(j)? {
            b')' => Some((Some(value), j + 1)),
            _ => Some((None, skip_to_paren(buf, j)?)),
        };
    }

    let close = i + buf[i..].iter().position(|&b| b == b')')?;
    let value = trim(&buf[i..close]);
    if value.iter().any(|b| b.is_ascii_whitespace() || *b == b'"' || *b == b'\'') {
        return Some((None, close + 1));
    }
    Some((Some(value.to_vec()), close + 1))
}

fn skip_to_paren(buf: &[u8], from: usize) -> Option<usize> {
    buf[from..].iter().position(|&b| b == b')').map(|p| from + p + 1)
}
