/// Identifies a `Source` handle registered with an `Epoll` instance.
///
/// Connections are registered with a `Token` equal to their slot in the
/// manager's connection table, not their public, stable `id` -- the two are
/// deliberately kept apart (see `Connection::id` docs).
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Token(pub usize);

impl From<usize> for Token {
    #[inline]
    fn from(val: usize) -> Token {
        Token(val)
    }
}

impl From<Token> for usize {
    #[inline]
    fn from(val: Token) -> usize {
        val.0
    }
}
