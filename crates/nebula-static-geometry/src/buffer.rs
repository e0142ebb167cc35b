//! System-memory hardware buffers with scoped lock guards.
//!
//! Every buffer the batcher populates is written through a [`BufferWriteLock`]
//! and read through a [`BufferReadLock`]. Guards release the buffer when they
//! drop, so early returns and `?` never leave a buffer locked. A second lock on
//! a buffer that is already locked fails with [`BufferError::AlreadyLocked`].

use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard, TryLockError, Weak};

use thiserror::Error;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors returned by buffer locking and access.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum BufferError {
    /// The buffer is already locked by another guard.
    #[error("buffer is already locked")]
    AlreadyLocked,

    /// A previous holder of the lock panicked.
    #[error("buffer lock is poisoned")]
    Poisoned,

    /// An access falls outside the buffer.
    #[error("access of {len} bytes at offset {offset} overruns a buffer of {size} bytes")]
    Overrun { offset: usize, len: usize, size: usize },
}

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// Width of the values stored in an index buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum IndexType {
    U16 = 0,
    U32 = 1,
}

impl IndexType {
    /// Size of one index in bytes.
    pub fn size(self) -> usize {
        match self {
            IndexType::U16 => 2,
            IndexType::U32 => 4,
        }
    }

    /// Stable numeric code used in geometry format signatures.
    pub fn code(self) -> u8 {
        self as u8
    }

    /// Largest vertex count a buffer indexed with this type may hold.
    pub fn max_vertex_index(self) -> usize {
        match self {
            IndexType::U16 => 0xFFFF,
            IndexType::U32 => u32::MAX as usize,
        }
    }

    /// Read the `i`-th index from a byte slice.
    pub fn read(self, bytes: &[u8], i: usize) -> Result<u32, BufferError> {
        let size = self.size();
        let raw = checked_range(bytes.len(), i * size, size).map(|r| &bytes[r])?;
        Ok(match self {
            IndexType::U16 => u32::from(bytemuck::pod_read_unaligned::<u16>(raw)),
            IndexType::U32 => bytemuck::pod_read_unaligned::<u32>(raw),
        })
    }

    /// Write `value` as the `i`-th index of a byte slice.
    ///
    /// The caller guarantees that `value` fits the index width.
    pub fn write(self, bytes: &mut [u8], i: usize, value: u32) -> Result<(), BufferError> {
        let size = self.size();
        let range = checked_range(bytes.len(), i * size, size)?;
        match self {
            IndexType::U16 => bytes[range].copy_from_slice(bytemuck::bytes_of(&(value as u16))),
            IndexType::U32 => bytes[range].copy_from_slice(bytemuck::bytes_of(&value)),
        }
        Ok(())
    }
}

/// Intended usage pattern of a buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BufferUsage {
    Static,
    Dynamic,
    StaticWriteOnly,
    DynamicWriteOnly,
}

/// How a buffer is locked for writing.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LockMode {
    /// Keep the existing contents.
    Normal,
    /// Contents are discarded and zeroed.
    Discard,
}

/// Validate that `len` bytes at `offset` fit in a buffer of `size` bytes.
pub(crate) fn checked_range(
    size: usize,
    offset: usize,
    len: usize,
) -> Result<std::ops::Range<usize>, BufferError> {
    match offset.checked_add(len) {
        Some(end) if end <= size => Ok(offset..end),
        _ => Err(BufferError::Overrun { offset, len, size }),
    }
}

// ---------------------------------------------------------------------------
// HardwareBuffer
// ---------------------------------------------------------------------------

/// A fixed-size block of buffer memory guarded by a read/write lock.
#[derive(Debug)]
pub struct HardwareBuffer {
    data: RwLock<Vec<u8>>,
    size: usize,
    usage: BufferUsage,
}

impl HardwareBuffer {
    /// Allocate a zeroed buffer of `size` bytes.
    pub fn new(size: usize, usage: BufferUsage) -> Self {
        Self {
            data: RwLock::new(vec![0; size]),
            size,
            usage,
        }
    }

    /// Size of the buffer in bytes.
    pub fn size_in_bytes(&self) -> usize {
        self.size
    }

    /// Usage the buffer was created with.
    pub fn usage(&self) -> BufferUsage {
        self.usage
    }

    /// Acquire exclusive write access until the returned guard drops.
    pub fn lock(&self, mode: LockMode) -> Result<BufferWriteLock<'_>, BufferError> {
        let mut guard = match self.data.try_write() {
            Ok(guard) => guard,
            Err(TryLockError::WouldBlock) => return Err(BufferError::AlreadyLocked),
            Err(TryLockError::Poisoned(_)) => return Err(BufferError::Poisoned),
        };
        if mode == LockMode::Discard {
            guard.fill(0);
        }
        Ok(BufferWriteLock { guard })
    }

    /// Acquire shared read access until the returned guard drops.
    pub fn lock_read(&self) -> Result<BufferReadLock<'_>, BufferError> {
        match self.data.try_read() {
            Ok(guard) => Ok(BufferReadLock { guard }),
            Err(TryLockError::WouldBlock) => Err(BufferError::AlreadyLocked),
            Err(TryLockError::Poisoned(_)) => Err(BufferError::Poisoned),
        }
    }

    /// Whether any guard currently holds this buffer.
    pub fn is_locked(&self) -> bool {
        self.data.try_write().is_err()
    }

    /// Copy `dst.len()` bytes starting at `offset` out of the buffer.
    pub fn read_data(&self, offset: usize, dst: &mut [u8]) -> Result<(), BufferError> {
        let lock = self.lock_read()?;
        let range = checked_range(self.size, offset, dst.len())?;
        dst.copy_from_slice(&lock[range]);
        Ok(())
    }

    /// Copy `src` into the buffer starting at `offset`.
    pub fn write_data(&self, offset: usize, src: &[u8]) -> Result<(), BufferError> {
        let mut lock = self.lock(LockMode::Normal)?;
        let range = checked_range(self.size, offset, src.len())?;
        lock[range].copy_from_slice(src);
        Ok(())
    }
}

/// Exclusive write view of a locked buffer.
pub struct BufferWriteLock<'a> {
    guard: RwLockWriteGuard<'a, Vec<u8>>,
}

impl Deref for BufferWriteLock<'_> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.guard
    }
}

impl DerefMut for BufferWriteLock<'_> {
    fn deref_mut(&mut self) -> &mut [u8] {
        &mut self.guard
    }
}

/// Shared read view of a locked buffer.
pub struct BufferReadLock<'a> {
    guard: RwLockReadGuard<'a, Vec<u8>>,
}

impl Deref for BufferReadLock<'_> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.guard
    }
}

// ---------------------------------------------------------------------------
// Typed buffers
// ---------------------------------------------------------------------------

/// A buffer of fixed-stride vertices.
#[derive(Debug)]
pub struct HardwareVertexBuffer {
    vertex_size: usize,
    num_vertices: usize,
    buffer: HardwareBuffer,
}

impl HardwareVertexBuffer {
    pub fn new(vertex_size: usize, num_vertices: usize, usage: BufferUsage) -> Self {
        Self {
            vertex_size,
            num_vertices,
            buffer: HardwareBuffer::new(vertex_size * num_vertices, usage),
        }
    }

    /// Stride of one vertex in bytes.
    pub fn vertex_size(&self) -> usize {
        self.vertex_size
    }

    /// Number of vertices the buffer holds.
    pub fn num_vertices(&self) -> usize {
        self.num_vertices
    }
}

impl Deref for HardwareVertexBuffer {
    type Target = HardwareBuffer;

    fn deref(&self) -> &HardwareBuffer {
        &self.buffer
    }
}

/// A buffer of 16- or 32-bit indices.
#[derive(Debug)]
pub struct HardwareIndexBuffer {
    index_type: IndexType,
    num_indexes: usize,
    buffer: HardwareBuffer,
}

impl HardwareIndexBuffer {
    pub fn new(index_type: IndexType, num_indexes: usize, usage: BufferUsage) -> Self {
        Self {
            index_type,
            num_indexes,
            buffer: HardwareBuffer::new(index_type.size() * num_indexes, usage),
        }
    }

    pub fn index_type(&self) -> IndexType {
        self.index_type
    }

    pub fn num_indexes(&self) -> usize {
        self.num_indexes
    }

    /// Read every index in `start..start + count` as `u32`.
    pub fn read_indices(&self, start: usize, count: usize) -> Result<Vec<u32>, BufferError> {
        let lock = self.lock_read()?;
        (start..start + count)
            .map(|i| self.index_type.read(&lock, i))
            .collect()
    }
}

impl Deref for HardwareIndexBuffer {
    type Target = HardwareBuffer;

    fn deref(&self) -> &HardwareBuffer {
        &self.buffer
    }
}

pub type SharedVertexBuffer = Arc<HardwareVertexBuffer>;
pub type SharedIndexBuffer = Arc<HardwareIndexBuffer>;

// ---------------------------------------------------------------------------
// Buffer manager
// ---------------------------------------------------------------------------

/// Creates the vertex and index buffers that batched geometry is copied into.
pub trait HardwareBufferManager {
    fn create_vertex_buffer(
        &self,
        vertex_size: usize,
        num_vertices: usize,
        usage: BufferUsage,
    ) -> SharedVertexBuffer;

    fn create_index_buffer(
        &self,
        index_type: IndexType,
        num_indexes: usize,
        usage: BufferUsage,
    ) -> SharedIndexBuffer;

    /// Create a vertex buffer and fill it with `data`.
    fn create_vertex_buffer_with_data(
        &self,
        vertex_size: usize,
        data: &[u8],
        usage: BufferUsage,
    ) -> Result<SharedVertexBuffer, BufferError> {
        let num_vertices = if vertex_size == 0 {
            0
        } else {
            data.len() / vertex_size
        };
        let buffer = self.create_vertex_buffer(vertex_size, num_vertices, usage);
        buffer.write_data(0, &data[..vertex_size * num_vertices])?;
        Ok(buffer)
    }

    /// Create an index buffer and fill it with `indices`.
    fn create_index_buffer_with_data(
        &self,
        index_type: IndexType,
        indices: &[u32],
        usage: BufferUsage,
    ) -> Result<SharedIndexBuffer, BufferError> {
        let buffer = self.create_index_buffer(index_type, indices.len(), usage);
        {
            let mut lock = buffer.lock(LockMode::Discard)?;
            for (i, &index) in indices.iter().enumerate() {
                index_type.write(&mut lock, i, index)?;
            }
        }
        Ok(buffer)
    }
}

/// In-process buffer manager backed by system memory.
///
/// Keeps weak handles to everything it created so callers can check how many
/// buffers are still alive after disposal.
#[derive(Default)]
pub struct SystemMemoryBufferManager {
    vertex_buffers: Mutex<Vec<Weak<HardwareVertexBuffer>>>,
    index_buffers: Mutex<Vec<Weak<HardwareIndexBuffer>>>,
    bytes_allocated: AtomicUsize,
}

impl SystemMemoryBufferManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Vertex buffers created by this manager that are still referenced.
    pub fn live_vertex_buffers(&self) -> usize {
        self.vertex_buffers
            .lock()
            .map(|list| list.iter().filter(|w| w.strong_count() > 0).count())
            .unwrap_or(0)
    }

    /// Index buffers created by this manager that are still referenced.
    pub fn live_index_buffers(&self) -> usize {
        self.index_buffers
            .lock()
            .map(|list| list.iter().filter(|w| w.strong_count() > 0).count())
            .unwrap_or(0)
    }

    /// Total bytes allocated over the manager's lifetime.
    pub fn bytes_allocated(&self) -> usize {
        self.bytes_allocated.load(Ordering::Relaxed)
    }
}

impl HardwareBufferManager for SystemMemoryBufferManager {
    fn create_vertex_buffer(
        &self,
        vertex_size: usize,
        num_vertices: usize,
        usage: BufferUsage,
    ) -> SharedVertexBuffer {
        let buffer = Arc::new(HardwareVertexBuffer::new(vertex_size, num_vertices, usage));
        self.bytes_allocated
            .fetch_add(buffer.size_in_bytes(), Ordering::Relaxed);
        if let Ok(mut list) = self.vertex_buffers.lock() {
            list.retain(|w| w.strong_count() > 0);
            list.push(Arc::downgrade(&buffer));
        }
        buffer
    }

    fn create_index_buffer(
        &self,
        index_type: IndexType,
        num_indexes: usize,
        usage: BufferUsage,
    ) -> SharedIndexBuffer {
        let buffer = Arc::new(HardwareIndexBuffer::new(index_type, num_indexes, usage));
        self.bytes_allocated
            .fetch_add(buffer.size_in_bytes(), Ordering::Relaxed);
        if let Ok(mut list) = self.index_buffers.lock() {
            list.retain(|w| w.strong_count() > 0);
            list.push(Arc::downgrade(&buffer));
        }
        buffer
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_max_vertex_index_follows_index_width() {
        assert_eq!(IndexType::U16.max_vertex_index(), 65535);
        assert_eq!(IndexType::U32.max_vertex_index(), u32::MAX as usize);
    }

    #[test]
    fn test_second_write_lock_is_rejected() {
        let buffer = HardwareBuffer::new(16, BufferUsage::Static);
        let _lock = buffer.lock(LockMode::Normal).unwrap();
        assert_eq!(
            buffer.lock(LockMode::Normal).err(),
            Some(BufferError::AlreadyLocked)
        );
        assert!(buffer.is_locked());
    }

    #[test]
    fn test_lock_released_on_drop() {
        let buffer = HardwareBuffer::new(16, BufferUsage::Static);
        {
            let mut lock = buffer.lock(LockMode::Discard).unwrap();
            lock[0] = 7;
        }
        assert!(!buffer.is_locked());
        let read = buffer.lock_read().unwrap();
        assert_eq!(read[0], 7);
    }

    #[test]
    fn test_discard_zeroes_contents() {
        let buffer = HardwareBuffer::new(4, BufferUsage::Static);
        buffer.write_data(0, &[1, 2, 3, 4]).unwrap();
        let lock = buffer.lock(LockMode::Discard).unwrap();
        assert_eq!(&lock[..], &[0, 0, 0, 0]);
    }

    #[test]
    fn test_write_past_end_is_an_overrun() {
        let buffer = HardwareBuffer::new(4, BufferUsage::Static);
        assert_eq!(
            buffer.write_data(2, &[0; 4]),
            Err(BufferError::Overrun {
                offset: 2,
                len: 4,
                size: 4
            })
        );
    }

    #[test]
    fn test_index_read_write_both_widths() {
        let mut bytes = [0u8; 8];
        IndexType::U16.write(&mut bytes, 3, 0xBEEF).unwrap();
        assert_eq!(IndexType::U16.read(&bytes, 3).unwrap(), 0xBEEF);
        IndexType::U32.write(&mut bytes, 0, 70_000).unwrap();
        assert_eq!(IndexType::U32.read(&bytes, 0).unwrap(), 70_000);
        assert!(IndexType::U32.read(&bytes, 2).is_err());
    }

    #[test]
    fn test_manager_tracks_live_buffers() {
        let manager = SystemMemoryBufferManager::new();
        let vb = manager.create_vertex_buffer(12, 10, BufferUsage::StaticWriteOnly);
        let ib = manager
            .create_index_buffer_with_data(IndexType::U16, &[0, 1, 2], BufferUsage::Static)
            .unwrap();
        assert_eq!(manager.live_vertex_buffers(), 1);
        assert_eq!(manager.live_index_buffers(), 1);
        assert_eq!(manager.bytes_allocated(), 120 + 6);
        assert_eq!(ib.read_indices(0, 3).unwrap(), vec![0, 1, 2]);

        drop(vb);
        drop(ib);
        assert_eq!(manager.live_vertex_buffers(), 0);
        assert_eq!(manager.live_index_buffers(), 0);
    }
}
