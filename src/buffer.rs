//! Grow-on-demand byte buffer with scatter/gather I/O.
//!
//! A single owned byte region with a read cursor and a write cursor,
//! `[0, read_pos)` prependable, `[read_pos, write_pos)` readable, and
//! `[write_pos, len)` writable.

use std::io::{self, IoSlice, IoSliceMut, Read, Write};

/// Scratch tail size for `read_fd`'s second iovec.
const READ_SCRATCH_LEN: usize = 65536;

/// A growable byte buffer with explicit read/write cursors.
#[derive(Debug, Default)]
pub struct Buffer {
    bytes: Vec<u8>,
    read_pos: usize,
    write_pos: usize,
}

impl Buffer {
    /// Creates an empty buffer with the given initial capacity.
    pub fn with_capacity(capacity: usize) -> Self {
        Buffer {
            bytes: vec![0u8; capacity],
            read_pos: 0,
            write_pos: 0,
        }
    }

    /// Number of bytes available to read.
    pub fn readable(&self) -> usize {
        self.write_pos - self.read_pos
    }

    /// Number of bytes that can be written without growing the buffer.
    pub fn writable(&self) -> usize {
        self.bytes.len() - self.write_pos
    }

    /// Number of bytes available at the front of the buffer (already-read
    /// space that could be reclaimed by compaction).
    pub fn prependable(&self) -> usize {
        self.read_pos
    }

    /// Borrows the readable region `[read_pos, write_pos)`.
    pub fn peek(&self) -> &[u8] {
        &self.bytes[self.read_pos..self.write_pos]
    }

    /// Advances `read_pos` by `n`. Panics if `n > readable()`.
    pub fn retrieve(&mut self, n: usize) {
        assert!(n <= self.readable(), "retrieve beyond readable region");
        self.read_pos += n;
    }

    /// Advances `read_pos` up to (but not past) the given pointer, which
    /// must lie within the current readable region.
    pub fn retrieve_until(&mut self, p: *const u8) {
        let start = self.peek().as_ptr();
        // Safety: caller guarantees `p` points within the readable region
        // returned by a prior `peek()` call on this same buffer.
        let offset = unsafe { p.offset_from(start) };
        assert!(offset >= 0, "retrieve_until pointer precedes read_pos");
        self.retrieve(offset as usize);
    }

    /// Resets both cursors to zero, discarding all buffered data.
    pub fn retrieve_all(&mut self) {
        self.read_pos = 0;
        self.write_pos = 0;
    }

    /// Takes the entire readable region out as an owned `Vec<u8>`, resetting
    /// the buffer, matching `Buffer::RetrieveAllToString`.
    pub fn retrieve_all_to_vec(&mut self) -> Vec<u8> {
        let out = self.peek().to_vec();
        self.retrieve_all();
        out
    }

    /// Guarantees `writable() >= n`, compacting in place when the combined
    /// prependable+writable space suffices, otherwise growing the backing
    /// vector.
    pub fn ensure_writable(&mut self, n: usize) {
        if self.writable() >= n {
            return;
        }

        if self.writable() + self.prependable() >= n {
            let len = self.readable();
            self.bytes.copy_within(self.read_pos..self.write_pos, 0);
            self.read_pos = 0;
            self.write_pos = len;
        } else {
            self.bytes.resize(self.write_pos + n + 1, 0);
        }

        debug_assert!(self.writable() >= n);
    }

    /// Appends `data` to the writable tail, growing as needed.
    pub fn append(&mut self, data: &[u8]) {
        self.ensure_writable(data.len());
        let start = self.write_pos;
        self.bytes[start..start + data.len()].copy_from_slice(data);
        self.write_pos += data.len();
    }

    /// Performs a scatter read from `source`: the buffer's writable tail is
    /// the first iovec, a stack-resident scratch region is the second. If
    /// the kernel fills no more than the writable tail, only `write_pos`
    /// advances; otherwise the overflow is copied into the buffer via
    /// `append`, bounding the call to one syscall even when the caller's
    /// buffer is small. Returns `0` on EOF, and propagates `WouldBlock` to
    /// the caller unchanged — it is not an error, it means "no more data
    /// right now".
    pub fn read_fd<R: Read>(&mut self, source: &mut R) -> io::Result<usize> {
        self.ensure_writable(1);
        let mut scratch = [0u8; READ_SCRATCH_LEN];

        let tail_len = self.writable();
        let n = {
            let tail = &mut self.bytes[self.write_pos..];
            let mut slices = [IoSliceMut::new(tail), IoSliceMut::new(&mut scratch)];
            source.read_vectored(&mut slices)?
        };

        if n <= tail_len {
            self.write_pos += n;
        } else {
            self.write_pos += tail_len;
            let overflow = n - tail_len;
            self.append(&scratch[..overflow]);
        }

        Ok(n)
    }

    /// Writes the readable region to `sink` in a single `write`, advancing
    /// `read_pos` by the number of bytes actually written.
    pub fn write_fd<W: Write>(&mut self, sink: &mut W) -> io::Result<usize> {
        let n = sink.write(self.peek())?;
        self.read_pos += n;
        Ok(n)
    }
}

impl Write for Buffer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.append(buf);
        Ok(buf.len())
    }

    fn write_vectored(&mut self, bufs: &[IoSlice<'_>]) -> io::Result<usize> {
        let mut total = 0;
        for b in bufs {
            self.append(b);
            total += b.len();
        }
        Ok(total)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
