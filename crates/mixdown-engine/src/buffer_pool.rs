//! Ring of master buffers holding the read, write and analysis roles

use mixdown_core::SurroundBuffer;

pub const MIN_POOL_DEPTH: usize = 3;

pub struct BufferPool {
    buffers: Vec<SurroundBuffer>,
    read: usize,
    write: usize,
    analysis: usize,
}

impl BufferPool {
    pub fn new(depth: usize, frames: usize, channels: usize) -> Self {
        let depth = depth.max(MIN_POOL_DEPTH);
        Self {
            buffers: (0..depth).map(|_| SurroundBuffer::new(frames, channels)).collect(),
            read: 0,
            write: 1,
            analysis: 2,
        }
    }

    pub fn depth(&self) -> usize {
        self.buffers.len()
    }

    /// Previous write buffer becomes the read buffer, the old read buffer is
    /// kept for analysis, and the next slot is cleared for writing.
    pub fn advance(&mut self) {
        self.analysis = self.read;
        self.read = self.write;
        self.write = (self.write + 1) % self.buffers.len();
        self.buffers[self.write].clear();
    }

    pub fn read(&self) -> &SurroundBuffer {
        &self.buffers[self.read]
    }

    pub fn analysis(&self) -> &SurroundBuffer {
        &self.buffers[self.analysis]
    }

    pub fn write_mut(&mut self) -> &mut SurroundBuffer {
        &mut self.buffers[self.write]
    }

    pub fn indices(&self) -> (usize, usize, usize) {
        (self.read, self.write, self.analysis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roles_never_overlap() {
        for depth in 3..6 {
            let mut pool = BufferPool::new(depth, 8, 2);
            for _ in 0..20 {
                pool.advance();
                let (read, write, analysis) = pool.indices();
                assert_ne!(read, write);
                assert_ne!(analysis, read);
                assert_ne!(analysis, write);
            }
        }
    }

    #[test]
    fn test_written_buffer_becomes_read() {
        let mut pool = BufferPool::new(3, 4, 2);
        pool.advance();
        pool.write_mut().as_mut_slice().fill(0.25);
        pool.advance();
        assert!(pool.read().as_slice().iter().all(|s| *s == 0.25));
        assert!(pool.write_mut().as_slice().iter().all(|s| *s == 0.0));
        pool.advance();
        assert!(pool.analysis().as_slice().iter().all(|s| *s == 0.25));
    }

    #[test]
    fn test_minimum_depth() {
        let pool = BufferPool::new(1, 4, 2);
        assert_eq!(pool.depth(), MIN_POOL_DEPTH);
        assert_eq!(pool.read().frames(), 4);
    }
}
