//! 资源句柄与进程级注册表
//!
//! 句柄是 64 位不透明 ID：低 48 位是进程内唯一的序号，48..52 位是类型标签。
//! 句柄相等当且仅当指向同一个逻辑资源；句柄比资源本身长寿。
//! 名字只用于诊断，按名字 produce 是幂等的。

use std::collections::HashMap;
use std::fmt;
use std::sync::OnceLock;

use parking_lot::Mutex;

/// 资源类型标签
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
#[repr(u8)]
pub enum ResourceKind {
    Image = 0,
    Buffer = 1,
    Tlas = 2,
    Blas = 3,
}

const INDEX_BITS: u32 = 48;
const INDEX_MASK: u64 = (1 << INDEX_BITS) - 1;
const KIND_SHIFT: u32 = INDEX_BITS;

/// 不透明的资源句柄
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceHandle(u64);

impl ResourceHandle {
    fn new(kind: ResourceKind, index: u64) -> Self {
        // 48 位序号耗尽视为致命错误
        assert!(index <= INDEX_MASK, "resource handle index space exhausted");
        Self(((kind as u64) << KIND_SHIFT) | index)
    }

    #[inline]
    pub fn kind(&self) -> ResourceKind {
        match (self.0 >> KIND_SHIFT) & 0xf {
            0 => ResourceKind::Image,
            1 => ResourceKind::Buffer,
            2 => ResourceKind::Tlas,
            3 => ResourceKind::Blas,
            k => panic!("corrupt resource handle kind: {k}"),
        }
    }

    #[inline]
    pub fn index(&self) -> u64 {
        self.0 & INDEX_MASK
    }

    #[inline]
    pub fn to_raw(&self) -> u64 {
        self.0
    }

    #[inline]
    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }
}

impl fmt::Debug for ResourceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match handle_name(*self) {
            Some(name) => write!(f, "{:?}({}, `{}`)", self.kind(), self.index(), name),
            None => write!(f, "{:?}({})", self.kind(), self.index()),
        }
    }
}

#[derive(Default)]
struct HandleRegistry {
    by_name: HashMap<(ResourceKind, String), ResourceHandle>,
    names: HashMap<ResourceHandle, String>,
    next_index: u64,
    next_unnamed: u64,
}

fn registry() -> &'static Mutex<HandleRegistry> {
    static REGISTRY: OnceLock<Mutex<HandleRegistry>> = OnceLock::new();
    REGISTRY.get_or_init(|| Mutex::new(HandleRegistry::default()))
}

/// 按名字 intern 一个句柄；同名（同 kind）多次调用返回同一个句柄
pub fn produce_handle(kind: ResourceKind, name: &str) -> ResourceHandle {
    let mut registry = registry().lock();
    if let Some(&handle) = registry.by_name.get(&(kind, name.to_string())) {
        return handle;
    }

    let handle = ResourceHandle::new(kind, registry.next_index);
    registry.next_index += 1;
    registry.by_name.insert((kind, name.to_string()), handle);
    registry.names.insert(handle, name.to_string());
    handle
}

/// 匿名句柄；每次调用生成一个新的资源
pub fn produce_unnamed_handle(kind: ResourceKind) -> ResourceHandle {
    let token = {
        let mut registry = registry().lock();
        registry.next_unnamed += 1;
        format!("unnamed-{}", registry.next_unnamed)
    };
    produce_handle(kind, &token)
}

#[inline]
pub fn produce_image_handle(name: &str) -> ResourceHandle {
    produce_handle(ResourceKind::Image, name)
}

#[inline]
pub fn produce_buffer_handle(name: &str) -> ResourceHandle {
    produce_handle(ResourceKind::Buffer, name)
}

#[inline]
pub fn produce_tlas_handle(name: &str) -> ResourceHandle {
    produce_handle(ResourceKind::Tlas, name)
}

#[inline]
pub fn produce_blas_handle(name: &str) -> ResourceHandle {
    produce_handle(ResourceKind::Blas, name)
}

/// 句柄注册时的名字
pub fn handle_name(handle: ResourceHandle) -> Option<String> {
    registry().lock().names.get(&handle).cloned()
}

/// 用于错误信息：没有名字时退化为 Debug 形式
pub fn display_name(handle: ResourceHandle) -> String {
    handle_name(handle).unwrap_or_else(|| format!("{:?}({})", handle.kind(), handle.index()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_produce_is_idempotent_per_name() {
        let a = produce_image_handle("gbuffer-albedo");
        let b = produce_image_handle("gbuffer-albedo");
        assert_eq!(a, b);
    }

    #[test]
    fn test_same_name_different_kind_are_distinct() {
        let image = produce_handle(ResourceKind::Image, "shadow");
        let buffer = produce_handle(ResourceKind::Buffer, "shadow");
        assert_ne!(image, buffer);
        assert_eq!(image.kind(), ResourceKind::Image);
        assert_eq!(buffer.kind(), ResourceKind::Buffer);
    }

    #[test]
    fn test_unnamed_handles_are_unique() {
        let a = produce_unnamed_handle(ResourceKind::Buffer);
        let b = produce_unnamed_handle(ResourceKind::Buffer);
        assert_ne!(a, b);
    }

    #[test]
    fn test_kind_tag_roundtrip() {
        let tlas = produce_tlas_handle("scene-tlas");
        assert_eq!(tlas.kind(), ResourceKind::Tlas);
        assert_eq!(ResourceHandle::from_raw(tlas.to_raw()), tlas);
    }

    #[test]
    fn test_handle_name_lookup() {
        let handle = produce_image_handle("final-color");
        assert_eq!(handle_name(handle).as_deref(), Some("final-color"));
    }
}
