//! 每帧的 scratch 分配器
//!
//! 从一块 host 可见的大 buffer 里做线性子分配，给 encoder 的内联数据
//! （顶点/索引/参数）和 staging 上传用。chunk 创建之后不会搬家，记录下来的
//! (chunk, offset) 在整帧内有效。容量不足时按 2 的幂追加 chunk，总量超过
//! 配置的上限 → `ScratchExhausted`。帧 fence 完成之后 reset 回收。

use ash::vk;
use aster_gfx::resources::buffer::GfxBuffer;

use crate::error::ResourceError;

/// 一次 scratch 分配的结果，命令流里记录的就是它
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ScratchSlice {
    pub chunk: u32,
    pub offset: u64,
    pub size: u64,
}

enum ChunkBacking {
    Device(GfxBuffer),
    #[cfg(test)]
    Host(Box<[u8]>),
}

struct ScratchChunk {
    capacity: u64,
    ptr: *mut u8,
    backing: ChunkBacking,
}

impl ScratchChunk {
    fn new_device(size: u64, usage: vk::BufferUsageFlags, name: &str) -> Self {
        let buffer = GfxBuffer::new(size, usage, None, true, name);
        Self {
            capacity: size,
            ptr: buffer.mapped_ptr(),
            backing: ChunkBacking::Device(buffer),
        }
    }

    #[cfg(test)]
    fn new_host(size: u64) -> Self {
        let mut storage = vec![0u8; size as usize].into_boxed_slice();
        let ptr = storage.as_mut_ptr();
        Self {
            capacity: size,
            ptr,
            backing: ChunkBacking::Host(storage),
        }
    }

    fn vk_buffer(&self) -> vk::Buffer {
        match &self.backing {
            ChunkBacking::Device(buffer) => buffer.vk_buffer(),
            #[cfg(test)]
            ChunkBacking::Host(_) => panic!("host-backed scratch chunk has no vk buffer"),
        }
    }

    fn device_address(&self) -> vk::DeviceAddress {
        match &self.backing {
            ChunkBacking::Device(buffer) => buffer.device_address(),
            #[cfg(test)]
            ChunkBacking::Host(_) => panic!("host-backed scratch chunk has no device address"),
        }
    }
}

pub struct ScratchAllocator {
    name: String,
    usage: vk::BufferUsageFlags,

    chunks: Vec<ScratchChunk>,
    /// 当前写入的 chunk
    active: usize,
    /// active chunk 内的写入位置
    head: u64,

    /// 下一个新 chunk 的大小（每次翻倍）
    next_chunk_size: u64,
    max_total: u64,

    #[cfg(test)]
    host_backed: bool,
}

impl ScratchAllocator {
    pub fn new_device(
        name: impl Into<String>,
        usage: vk::BufferUsageFlags,
        initial_size: u64,
        max_total: u64,
    ) -> Self {
        let name = name.into();
        let initial_size = initial_size.next_power_of_two();
        let mut allocator = Self {
            usage,
            chunks: vec![],
            active: 0,
            head: 0,
            next_chunk_size: initial_size,
            max_total,
            #[cfg(test)]
            host_backed: false,
            name,
        };
        allocator.append_chunk(initial_size).expect("initial scratch size exceeds ceiling");
        allocator
    }

    #[cfg(test)]
    pub fn new_host(initial_size: u64, max_total: u64) -> Self {
        let initial_size = initial_size.next_power_of_two();
        let mut allocator = Self {
            name: "host-scratch".to_string(),
            usage: vk::BufferUsageFlags::empty(),
            chunks: vec![],
            active: 0,
            head: 0,
            next_chunk_size: initial_size,
            max_total,
            host_backed: true,
        };
        allocator.append_chunk(initial_size).expect("initial scratch size exceeds ceiling");
        allocator
    }

    fn total_capacity(&self) -> u64 {
        self.chunks.iter().map(|c| c.capacity).sum()
    }

    fn append_chunk(&mut self, size: u64) -> Result<(), ResourceError> {
        if self.total_capacity() + size > self.max_total {
            return Err(ResourceError::ScratchExhausted {
                name: self.name.clone(),
                requested: size,
                ceiling: self.max_total,
            });
        }

        #[cfg(test)]
        if self.host_backed {
            self.chunks.push(ScratchChunk::new_host(size));
            self.active = self.chunks.len() - 1;
            self.head = 0;
            return Ok(());
        }

        let chunk_name = format!("{}-chunk-{}", self.name, self.chunks.len());
        self.chunks.push(ScratchChunk::new_device(size, self.usage, &chunk_name));
        self.active = self.chunks.len() - 1;
        self.head = 0;
        Ok(())
    }

    /// 分配 `size` 字节，起始位置按 `align` 对齐
    pub fn alloc(&mut self, size: u64, align: u64) -> Result<(ScratchSlice, *mut u8), ResourceError> {
        debug_assert!(align.is_power_of_two());

        let aligned_head = (self.head + align - 1) & !(align - 1);
        if aligned_head + size > self.chunks[self.active].capacity {
            // 当前 chunk 放不下：翻倍增长，至少放得下本次请求
            let mut chunk_size = self.next_chunk_size.max(size.next_power_of_two());
            self.next_chunk_size = chunk_size * 2;

            // 请求本身超出上限时直接报告请求大小
            if chunk_size > self.max_total {
                chunk_size = size;
            }
            self.append_chunk(chunk_size)?;
            return self.alloc(size, align);
        }

        let slice = ScratchSlice {
            chunk: self.active as u32,
            offset: aligned_head,
            size,
        };
        self.head = aligned_head + size;
        let ptr = unsafe { self.chunks[self.active].ptr.add(slice.offset as usize) };
        Ok((slice, ptr))
    }

    /// 分配并拷贝数据
    pub fn write(&mut self, data: &[u8], align: u64) -> Result<ScratchSlice, ResourceError> {
        let (slice, ptr) = self.alloc(data.len() as u64, align)?;
        unsafe {
            std::ptr::copy_nonoverlapping(data.as_ptr(), ptr, data.len());
        }
        Ok(slice)
    }

    /// 解析命令流中记录的 chunk 序号
    #[inline]
    pub fn chunk_buffer(&self, chunk: u32) -> vk::Buffer {
        self.chunks[chunk as usize].vk_buffer()
    }

    /// chunk 起始处的 device address（加速结构构建输入用）
    #[inline]
    pub fn chunk_device_address(&self, chunk: u32) -> vk::DeviceAddress {
        self.chunks[chunk as usize].device_address()
    }

    /// 帧 fence 完成后调用；多 chunk 时合并成一块，避免下一帧再增长
    pub fn reset(&mut self) {
        if self.chunks.len() > 1 {
            let merged = self.total_capacity().next_power_of_two().min(self.max_total);
            self.chunks.clear();
            self.next_chunk_size = merged;
            self.append_chunk(merged).expect("merged scratch chunk exceeds ceiling");
            self.next_chunk_size = merged * 2;
        }
        self.active = 0;
        self.head = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allocations_do_not_overlap() {
        let mut scratch = ScratchAllocator::new_host(1024, 1 << 20);

        let mut slices = vec![];
        for size in [16u64, 100, 3, 64, 257] {
            let (slice, _) = scratch.alloc(size, 16).unwrap();
            slices.push(slice);
        }

        for (i, a) in slices.iter().enumerate() {
            assert_eq!(a.offset % 16, 0);
            for b in slices.iter().skip(i + 1) {
                if a.chunk != b.chunk {
                    continue;
                }
                let disjoint = a.offset + a.size <= b.offset || b.offset + b.size <= a.offset;
                assert!(disjoint, "overlap between {a:?} and {b:?}");
            }
        }
    }

    #[test]
    fn test_growth_appends_power_of_two_chunk() {
        let mut scratch = ScratchAllocator::new_host(256, 1 << 20);

        // 超过首个 chunk 的容量，触发增长
        let (a, _) = scratch.alloc(200, 4).unwrap();
        let (b, _) = scratch.alloc(200, 4).unwrap();
        assert_eq!(a.chunk, 0);
        assert_eq!(b.chunk, 1);
        assert_eq!(b.offset, 0);
    }

    #[test]
    fn test_oversized_request_is_exhausted() {
        let mut scratch = ScratchAllocator::new_host(1024, 4096);

        let result = scratch.alloc(4097, 4);
        assert!(matches!(result, Err(ResourceError::ScratchExhausted { .. })));
    }

    #[test]
    fn test_ceiling_limits_total_growth() {
        let mut scratch = ScratchAllocator::new_host(1024, 4096);

        // 1024 + 2048 = 3072 在上限内；再翻倍就超了
        scratch.alloc(1000, 4).unwrap();
        scratch.alloc(2000, 4).unwrap();
        let result = scratch.alloc(2000, 4);
        assert!(matches!(result, Err(ResourceError::ScratchExhausted { .. })));
    }

    #[test]
    fn test_reset_reclaims_space() {
        let mut scratch = ScratchAllocator::new_host(256, 1 << 20);
        scratch.alloc(200, 4).unwrap();
        scratch.alloc(200, 4).unwrap();

        scratch.reset();
        let (slice, _) = scratch.alloc(16, 4).unwrap();
        assert_eq!((slice.chunk, slice.offset), (0, 0));
    }

    #[test]
    fn test_write_copies_data() {
        let mut scratch = ScratchAllocator::new_host(256, 1 << 20);
        let data = [1u8, 2, 3, 4, 5];
        let slice = scratch.write(&data, 4).unwrap();
        assert_eq!(slice.size, 5);

        // host backing 里能读回写入的数据
        let chunk = &scratch.chunks[slice.chunk as usize];
        let written = unsafe { std::slice::from_raw_parts(chunk.ptr.add(slice.offset as usize), 5) };
        assert_eq!(written, &data);
    }
}
