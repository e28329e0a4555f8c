//! Line-oriented local input
//!
//! Both binaries turn console lines into outbound frames: the server
//! broadcasts them, the client sends them to its peer.

use std::io::{self, BufRead};

/// Feed each non-empty line of `input`, without its line terminator, to
/// `on_line`.
///
/// Stops at end of input or when `on_line` returns `false`. Returns the
/// number of lines delivered.
pub fn run_input_loop<R, F>(mut input: R, mut on_line: F) -> io::Result<usize>
where
    R: BufRead,
    F: FnMut(&[u8]) -> bool,
{
    let mut line = Vec::new();
    let mut delivered = 0;
    loop {
        line.clear();
        if input.read_until(b'\n', &mut line)? == 0 {
            return Ok(delivered);
        }
        while matches!(line.last(), Some(b'\n' | b'\r')) {
            line.pop();
        }
        if line.is_empty() {
            continue;
        }
        delivered += 1;
        if !on_line(&line) {
            return Ok(delivered);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_lines_are_trimmed_and_empty_skipped() {
        let input = Cursor::new(b"hello\n\n\r\nworld\r\nlast".to_vec());
        let mut lines = Vec::new();
        let n = run_input_loop(input, |l| {
            lines.push(l.to_vec());
            true
        })
        .unwrap();
        assert_eq!(n, 3);
        assert_eq!(lines, vec![b"hello".to_vec(), b"world".to_vec(), b"last".to_vec()]);
    }

    #[test]
    fn test_callback_stops_loop() {
        let input = Cursor::new(b"a\nb\nc\n".to_vec());
        let mut seen = 0;
        let n = run_input_loop(input, |_| {
            seen += 1;
            seen < 2
        })
        .unwrap();
        assert_eq!(n, 2);
    }
}
