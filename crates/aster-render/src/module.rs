//! 一帧的渲染内容：无序的 pass 集合 + 资源声明

use std::cell::RefCell;
use std::rc::Rc;

use indexmap::IndexMap;

use crate::{
    graph::{handle::ResourceHandle, resource::ResourceInfo},
    pass::RenderPass,
};

/// app 每帧构建一个 `RenderModule` 交给 renderer
#[derive(Default)]
pub struct RenderModule {
    passes: Vec<Rc<RefCell<RenderPass>>>,
    declared: IndexMap<ResourceHandle, ResourceInfo>,
}

impl RenderModule {
    pub fn new() -> Self {
        Self::default()
    }

    /// 添加 pass，返回共享引用（模块保留到帧结束）
    pub fn add_pass(&mut self, pass: RenderPass) -> Rc<RefCell<RenderPass>> {
        let pass = pass.into_shared();
        self.passes.push(pass.clone());
        pass
    }

    /// 声明（或重新声明）资源；同一句柄重复声明取最后一次
    pub fn declare_resource(&mut self, handle: ResourceHandle, info: ResourceInfo) -> &mut Self {
        self.declared.insert(handle, info);
        self
    }

    #[inline]
    pub fn passes(&self) -> &[Rc<RefCell<RenderPass>>] {
        &self.passes
    }

    #[inline]
    pub fn declared_resources(&self) -> &IndexMap<ResourceHandle, ResourceInfo> {
        &self.declared
    }

    #[inline]
    pub fn declared_info(&self, handle: ResourceHandle) -> Option<&ResourceInfo> {
        self.declared.get(&handle)
    }
}
