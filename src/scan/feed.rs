// src/scan/feed.rs
// =============================================================================
// Incremental input for the CSS lexer.
//
// A Feed owns an async reader and a small buffer holding only the token that
// is currently being lexed. Lexers are written as pure step functions over
// the unconsumed bytes: they either produce a token and say how many bytes
// it used, skip some bytes, or ask for more input. The Feed reads more and
// calls the step function again.
//
// This keeps the lexer free of async code and means the whole document is
// never held in memory, only the bytes of the current token.
// =============================================================================

use std::io;

use tokio::io::{AsyncRead, AsyncReadExt};

const CHUNK: usize = 8 * 1024;

/// Outcome of one lexer step over the buffered bytes.
#[derive(Debug)]
pub(crate) enum Step<T> {
    /// A token and the number of bytes it consumed
    Token(T, usize),
    /// Bytes that produce no token (whitespace, comments)
    Skip(usize),
    /// The buffered bytes end in the middle of a token
    More,
}

pub(crate) struct Feed<R> {
    reader: R,
    buf: Vec<u8>,
    pos: usize,
    eof: bool,
}

impl<R: AsyncRead + Unpin> Feed<R> {
    pub(crate) fn new(reader: R) -> Self {
        Feed {
            reader,
            buf: Vec::with_capacity(CHUNK),
            pos: 0,
            eof: false,
        }
    }

    /// Runs `step` until it yields a token. Returns None at a clean end of input.
    ///
    /// `step` receives the unconsumed bytes and whether the input has ended;
    /// once it has, `step` must not answer `More`.
    pub(crate) async fn next<T>(
        &mut self,
        mut step: impl FnMut(&[u8], bool) -> Step<T>,
    ) -> io::Result<Option<T>> {
        loop {
            let pending = &self.buf[self.pos..];
            if pending.is_empty() {
                if self.eof {
                    return Ok(None);
                }
                self.fill().await?;
                continue;
            }

            match step(pending, self.eof) {
                Step::Token(token, used) => {
                    self.pos += used;
                    return Ok(Some(token));
                }
                Step::Skip(used) => self.pos += used,
                Step::More if self.eof => {
                    // a lexer that cannot finish at end of input drops the tail
                    self.pos = self.buf.len();
                }
                Step::More => self.fill().await?,
            }
        }
    }

    async fn fill(&mut self) -> io::Result<()> {
        if self.pos > 0 {
            self.buf.drain(..self.pos);
            self.pos = 0;
        }
        self.buf.reserve(CHUNK);
        let read = self.reader.read_buf(&mut self.buf).await?;
        if read == 0 {
            self.eof = true;
        }
        Ok(())
    }
}

/// Position of `needle` in `haystack` at or after `from`.
pub(crate) fn find(haystack: &[u8], from: usize, needle: &[u8]) -> Option<usize> {
    if from >= haystack.len() {
        return None;
    }
    haystack[from..]
        .windows(needle.len())
        .position(|window| window == needle)
        .map(|at| at + from)
}

/// Strips ASCII whitespace at both ends.
pub(crate) fn trim(value: &[u8]) -> &[u8] {
    let start = value
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .unwrap_or(value.len());
    let end = value
        .iter()
        .rposition(|b| !b.is_ascii_whitespace())
        .map_or(start, |p| p + 1);
    &value[start..end]
}

#[cfg(test)]
mod tests {
    use super::*;

    // splits input on b',' and hands out one field per call
    fn field(buf: &[u8], eof: bool) -> Step<Vec<u8>> {
        match buf.iter().position(|&b| b == b',') {
            Some(0) => Step::Skip(1),
            Some(end) => Step::Token(buf[..end].to_vec(), end),
            None if eof => Step::Token(buf.to_vec(), buf.len()),
            None => Step::More,
        }
    }

    #[tokio::test]
    async fn test_tokens_across_reads() {
        // a duplex pipe with a tiny buffer forces many partial reads
        let (mut writer, reader) = tokio::io::duplex(3);
        tokio::spawn(async move {
            use tokio::io::AsyncWriteExt;
            writer.write_all(b"alpha,beta,,gamma").await.unwrap();
        });

        let mut feed = Feed::new(reader);
        let mut fields = Vec::new();
        while let Some(token) = feed.next(field).await.unwrap() {
            fields.push(String::from_utf8(token).unwrap());
        }
        assert_eq!(fields, vec!["alpha", "beta", "gamma"]);
    }

    #[test]
    fn test_find_and_trim() {
        assert_eq!(find(b"a */ b */", 0, b"*/"), Some(2));
        assert_eq!(find(b"a */ b */", 3, b"*/"), Some(7));
        assert_eq!(find(b"abc", 5, b"c"), None);
        assert_eq!(trim(b"  /res \n"), b"/res");
        assert_eq!(trim(b"   "), b"");
    }

    #[tokio::test]
    async fn test_empty_input() {
        let mut feed = Feed::new(&b""[..]);
        assert!(feed.next(field).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_more_at_eof_drops_tail() {
        let mut feed = Feed::new(&b"abc"[..]);
        let token: Option<()> = feed.next(|_, _| Step::More).await.unwrap();
        assert!(token.is_none());
    }
}
