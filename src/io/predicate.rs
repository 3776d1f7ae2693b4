//! Completion predicates.
//!
//! A predicate looks at the bytes buffered so far and returns the length of
//! one complete unit, or zero when more data is needed.

/// Any amount of data is a complete unit.
pub fn any(buf: &[u8]) -> usize {
    buf.len()
}

/// A unit ends at the first newline, inclusive.
pub fn line(buf: &[u8]) -> usize {
    buf.iter().position(|&b| b == b'\n').map_or(0, |i| i + 1)
}

/// A unit is exactly `n` bytes. `exact(0)` never completes.
pub fn exact(n: usize) -> impl FnMut(&[u8]) -> usize {
    move |buf| if n > 0 && buf.len() >= n { n } else { 0 }
}

/// Hand out whatever is available until `n` bytes in total have been delivered.
pub fn up_to(n: usize) -> impl FnMut(&[u8]) -> usize {
    let mut left = n;
    move |buf| {
        let take = buf.len().min(left);
        left -= take;
        take
    }
}

/// Never complete; everything is delivered when the peer closes.
pub fn until_eof(_buf: &[u8]) -> usize {
    0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn line_includes_newline() {
        assert_eq!(line(b"GET / HTTP/1.1\r\nHost"), 16);
        assert_eq!(line(b"partial"), 0);
        assert_eq!(line(b"\n"), 1);
    }

    #[test]
    fn exact_waits_for_full_count() {
        let mut five = exact(5);
        assert_eq!(five(b"hell"), 0);
        assert_eq!(five(b"hello world"), 5);
    }

    #[test]
    fn up_to_stops_at_limit() {
        let mut eleven = up_to(11);
        assert_eq!(eleven(b"hell"), 4);
        assert_eq!(eleven(b"o wo"), 4);
        assert_eq!(eleven(b"rld and more"), 3);
        assert_eq!(eleven(b"trailing"), 0);
    }

    #[test]
    fn any_and_eof() {
        assert_eq!(any(b"abc"), 3);
        assert_eq!(until_eof(b"abc"), 0);
    }
}
