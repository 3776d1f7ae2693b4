use std::cell::RefCell;
use std::io;
use std::rc::Rc;

use bytes::BytesMut;
use tokio::net::TcpStream;

/// Smallest allocation made for a dynamically grown buffer.
pub const MIN_CAPACITY: usize = 128;

/// Receive buffer shared between a read operation and its owner.
///
/// Bytes a read did not hand out stay here after the read stops, so the next
/// read on the same buffer starts from them.
#[derive(Debug, Clone)]
pub struct ReadBuffer {
    bytes: Rc<RefCell<BytesMut>>,
    // None = grow geometrically, Some(n) = caller-supplied, never beyond n
    limit: Option<usize>,
}

impl ReadBuffer {
    /// A buffer that starts empty and doubles as data arrives.
    pub fn dynamic() -> Self {
        Self {
            bytes: Rc::new(RefCell::new(BytesMut::new())),
            limit: None,
        }
    }

    /// Wrap a caller-supplied buffer. It is never grown past its current capacity.
    ///
    /// A buffer with no capacity cannot take any bytes, so every read on it
    /// reports [`NetError::BufferOverflow`](crate::error::NetError::BufferOverflow)
    /// straight away. Use [`dynamic`](Self::dynamic) when no size is known up front.
    pub fn from_bytes(bytes: BytesMut) -> Self {
        let limit = bytes.capacity().max(bytes.len());
        Self {
            bytes: Rc::new(RefCell::new(bytes)),
            limit: Some(limit),
        }
    }

    /// Number of buffered, not yet consumed bytes.
    pub fn len(&self) -> usize {
        self.bytes.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every buffered byte.
    pub fn clear(&self) {
        self.bytes.borrow_mut().clear();
    }

    /// Copy of the buffered bytes.
    pub fn to_vec(&self) -> Vec<u8> {
        self.bytes.borrow().to_vec()
    }

    pub(crate) fn with_slice<R>(&self, f: impl FnOnce(&[u8]) -> R) -> R {
        f(&self.bytes.borrow())
    }

    /// Remove and return the first `n` bytes.
    pub(crate) fn split_to(&self, n: usize) -> BytesMut {
        let mut bytes = self.bytes.borrow_mut();
        let n = n.min(bytes.len());
        bytes.split_to(n)
    }

    /// Make room for the next socket read and return how many bytes it may take.
    ///
    /// Zero means the buffer already holds `max_len` bytes (or its fixed limit).
    pub(crate) fn reserve(&self, max_len: usize) -> usize {
        let mut bytes = self.bytes.borrow_mut();
        let len = bytes.len();
        let bound = self.limit.map_or(max_len, |limit| limit.min(max_len));
        if len >= bound {
            return 0;
        }

        if bytes.capacity() == len {
            let target = match self.limit {
                Some(limit) => limit,
                None => (bytes.capacity() * 2).max(MIN_CAPACITY).min(bound),
            };
            bytes.reserve(target.saturating_sub(len).max(1));
        }

        (bytes.capacity() - len).min(bound - len)
    }

    /// Read at most `want` bytes from `socket` into the spare capacity.
    pub(crate) fn fill_from(&self, socket: &TcpStream, want: usize) -> io::Result<usize> {
        let mut bytes = self.bytes.borrow_mut();
        let start = bytes.len();
        bytes.resize(start + want, 0);
        let result = socket.try_read(&mut bytes[start..]);
        let n = match &result {
            Ok(n) => *n,
            Err(_) => 0,
        };
        bytes.truncate(start + n);
        result
    }
}

impl Default for ReadBuffer {
    fn default() -> Self {
        Self::dynamic()
    }
}
