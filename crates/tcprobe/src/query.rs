use std::borrow::Cow;
use std::io;

use regex::bytes::{Captures, Regex};
use tokio::io::{
    AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader,
};
use tracing::{debug, error};

use crate::error::{ProbeError, Result};
use crate::module::QueryStep;

/// Longest line the engine will buffer while waiting for a match
pub const MAX_LINE_LENGTH: u64 = 64 * 1024;

/// Run `steps` in order over `stream`, stopping at the first step that
/// cannot be satisfied.
pub async fn run_query_response<S>(stream: &mut S, steps: &[QueryStep]) -> Result<()>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut conn = BufReader::new(stream);
    let mut line = Vec::new();

    for (index, step) in steps.iter().enumerate() {
        debug!(
            step = index,
            expect = %step.expect,
            send = %step.send,
            "Processing query response entry"
        );

        let mut payload = if step.expect.is_empty() {
            step.send.as_bytes().to_vec()
        } else {
            let re = compile(&step.expect)?;
            // Read lines until one of them matches the configured regexp.
            loop {
                if !read_line(&mut conn, &mut line).await? {
                    return Err(ProbeError::Io(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        format!("connection closed before a line matched {:?}", step.expect),
                    )));
                }
                debug!("read {:?}", String::from_utf8_lossy(&line));
                if let Some(captures) = re.captures(&line) {
                    debug!("regexp {:?} matched {:?}", step.expect, String::from_utf8_lossy(&line));
                    break expand(&captures, &step.send);
                }
            }
        };

        if !payload.is_empty() {
            debug!("Sending {:?}", String::from_utf8_lossy(&payload));
            payload.push(b'\n');
            conn.write_all(&payload).await?;
            conn.flush().await?;
        }
    }

    Ok(())
}

fn compile(pattern: &str) -> Result<Regex> {
    Regex::new(pattern).map_err(|source| {
        error!("Could not compile {pattern:?} into regular expression: {source}");
        ProbeError::InvalidPattern { pattern: pattern.to_string(), source }
    })
}

/// Read one newline-delimited line into `line`, without its `\n` or `\r\n`.
/// Returns `false` at end of stream.
async fn read_line<R>(reader: &mut R, line: &mut Vec<u8>) -> io::Result<bool>
where
    R: AsyncBufRead + Unpin,
{
    line.clear();
    let read = (&mut *reader).take(MAX_LINE_LENGTH + 1).read_until(b'\n', line).await?;
    if read == 0 {
        return Ok(false);
    }

    if line.last() == Some(&b'\n') {
        line.pop();
        if line.last() == Some(&b'\r') {
            line.pop();
        }
    } else if line.len() as u64 > MAX_LINE_LENGTH {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("line longer than {MAX_LINE_LENGTH} bytes"),
        ));
    }
    Ok(true)
}

/// Fill `template` from the groups of a match. Groups that did not take part
/// in the match expand to nothing.
pub fn expand(captures: &Captures<'_>, template: &str) -> Vec<u8> {
    let mut dst = Vec::new();
    captures.expand(normalize_backrefs(template).as_bytes(), &mut dst);
    dst
}

/// Rewrite `\N` references into `${N}` so both styles are understood.
/// `\\` stands for a literal backslash.
fn normalize_backrefs(template: &str) -> Cow<'_, str> {
    if !template.contains('\\') {
        return Cow::Borrowed(template);
    }

    let mut out = String::with_capacity(template.len() + 4);
    let mut chars = template.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.peek().copied() {
            Some(digit) if digit.is_ascii_digit() => {
                out.push_str("${");
                out.push(digit);
                out.push('}');
                chars.next();
            }
            Some('\\') => {
                out.push('\\');
                chars.next();
            }
            _ => out.push('\\'),
        }
    }
    Cow::Owned(out)
}
