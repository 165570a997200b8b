//! shader module 缓存
//!
//! 编译工作委托给外部的 `ShaderCompiler`；缓存持有字节码、反射信息和
//! `vk::ShaderModule`。源文件变化时 `poll_sources` 会就地重新编译，
//! 并递增 generation，引用它的 pipeline 在下次使用时惰性重建。

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use ash::vk;
use slotmap::SlotMap;

use crate::{error::PipelineError, gfx::Gfx, pipelines::binding::ShaderBindingInfo};

slotmap::new_key_type! {
    /// shader module 的非拥有引用，带 generation 校验
    pub struct ShaderModuleRef;
}

/// 顶点输入的 attribute 描述（来自 vertex shader 反射或显式声明）
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct VertexAttribute {
    pub location: u32,
    pub binding: u32,
    pub format: vk::Format,
    pub offset: u32,
}

/// 顶点输入的 binding 描述
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct VertexBinding {
    pub binding: u32,
    pub stride: u32,
    pub input_rate: vk::VertexInputRate,
}

/// 完整的顶点输入描述
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct VertexInputDesc {
    pub attributes: Vec<VertexAttribute>,
    pub bindings: Vec<VertexBinding>,
}

/// 外部编译器返回的编译结果
#[derive(Clone)]
pub struct CompiledShader {
    pub spirv: Vec<u32>,
    pub bindings: Vec<ShaderBindingInfo>,
    pub push_constants: Vec<vk::PushConstantRange>,
    /// 仅 vertex stage 提供
    pub vertex_input: Option<VertexInputDesc>,
}

/// shader 源码编译器（外部协作者）
///
/// 接收源文件路径、stage 和宏定义，返回字节码和反射信息。
pub trait ShaderCompiler {
    fn compile(
        &self,
        path: &Path,
        stage: vk::ShaderStageFlags,
        macros: &[(String, String)],
    ) -> Result<CompiledShader, PipelineError>;
}

/// 缓存键：(规范化路径, stage, 排序后的宏列表)
#[derive(Clone, PartialEq, Eq, Hash)]
struct ShaderKey {
    path: PathBuf,
    stage: vk::ShaderStageFlags,
    macros: Vec<(String, String)>,
}

pub struct ShaderModule {
    pub stage: vk::ShaderStageFlags,
    pub path: PathBuf,
    /// 字节码内容的哈希，pipeline key 的组成部分
    pub digest: u64,
    pub compiled: CompiledShader,
    /// 重编译之后递增
    pub generation: u64,

    macros: Vec<(String, String)>,
    source_mtime: Option<SystemTime>,
    /// 惰性创建，只有 pipeline 构建时才需要
    vk_module: Option<vk::ShaderModule>,
}

impl ShaderModule {
    /// 获取（或创建）`vk::ShaderModule`
    pub fn vk_module(&mut self) -> vk::ShaderModule {
        *self.vk_module.get_or_insert_with(|| {
            let module_ci = vk::ShaderModuleCreateInfo::default().code(&self.compiled.spirv);
            let module = unsafe { Gfx::get().device().create_shader_module(&module_ci, None).unwrap() };
            Gfx::get().device().set_object_debug_name(module, format!("ShaderModule::{}", self.path.display()));
            module
        })
    }

    fn release_vk_module(&mut self) {
        if let Some(module) = self.vk_module.take() {
            unsafe {
                Gfx::get().device().destroy_shader_module(module, None);
            }
        }
    }
}

pub struct ShaderModuleCache {
    compiler: Box<dyn ShaderCompiler>,
    modules: SlotMap<ShaderModuleRef, ShaderModule>,
    lookup: HashMap<ShaderKey, ShaderModuleRef>,

    /// 任意 module 重编译都会递增，pipeline cache 据此判断失效
    generation: u64,
    hot_reload: bool,
}

impl ShaderModuleCache {
    pub fn new(compiler: Box<dyn ShaderCompiler>, hot_reload: bool) -> Self {
        Self {
            compiler,
            modules: SlotMap::with_key(),
            lookup: HashMap::new(),
            generation: 0,
            hot_reload,
        }
    }

    /// 创建（或复用）一个 shader module
    ///
    /// 对相同的 (path, stage, macros) 幂等。
    pub fn create(
        &mut self,
        path: impl AsRef<Path>,
        stage: vk::ShaderStageFlags,
        macros: &[(String, String)],
    ) -> Result<ShaderModuleRef, PipelineError> {
        let key = ShaderKey {
            path: path.as_ref().to_path_buf(),
            stage,
            macros: canonicalize_macros(macros),
        };

        if let Some(&module_ref) = self.lookup.get(&key) {
            return Ok(module_ref);
        }

        let compiled = self.compiler.compile(&key.path, stage, &key.macros)?;
        let module = ShaderModule {
            stage,
            path: key.path.clone(),
            digest: spirv_digest(&compiled.spirv),
            source_mtime: source_mtime(&key.path),
            compiled,
            generation: self.generation,
            macros: key.macros.clone(),
            vk_module: None,
        };

        let module_ref = self.modules.insert(module);
        self.lookup.insert(key, module_ref);
        Ok(module_ref)
    }

    #[inline]
    pub fn get(&self, module_ref: ShaderModuleRef) -> Option<&ShaderModule> {
        self.modules.get(module_ref)
    }

    #[inline]
    pub fn get_mut(&mut self, module_ref: ShaderModuleRef) -> Option<&mut ShaderModule> {
        self.modules.get_mut(module_ref)
    }

    /// 当前的全局 generation
    #[inline]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// 检查源文件 mtime，重新编译发生变化的 module
    ///
    /// # Return
    /// 重新编译的 module 数量
    pub fn poll_sources(&mut self) -> usize {
        if !self.hot_reload {
            return 0;
        }

        let mut reloaded = 0;
        for (_, module) in self.modules.iter_mut() {
            let new_mtime = source_mtime(&module.path);
            if new_mtime.is_none() || new_mtime == module.source_mtime {
                continue;
            }

            match self.compiler.compile(&module.path, module.stage, &module.macros) {
                Ok(compiled) => {
                    module.release_vk_module();
                    module.digest = spirv_digest(&compiled.spirv);
                    module.compiled = compiled;
                    module.source_mtime = new_mtime;
                    reloaded += 1;
                    log::info!("shader reloaded: {}", module.path.display());
                }
                Err(e) => {
                    // 编译失败保留旧字节码，mtime 也不更新，下次继续尝试
                    log::warn!("shader reload failed for {}: {e}", module.path.display());
                }
            }
        }

        if reloaded > 0 {
            self.generation += 1;
            for (_, module) in self.modules.iter_mut() {
                module.generation = self.generation;
            }
        }
        reloaded
    }

    pub fn destroy(mut self) {
        for (_, module) in self.modules.iter_mut() {
            module.release_vk_module();
        }
    }
}

fn canonicalize_macros(macros: &[(String, String)]) -> Vec<(String, String)> {
    let mut macros = macros.to_vec();
    macros.sort();
    macros.dedup();
    macros
}

fn spirv_digest(spirv: &[u32]) -> u64 {
    const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
    const FNV_PRIME: u64 = 0x100_0000_01b3;

    let mut hash = FNV_OFFSET;
    for word in spirv {
        hash ^= *word as u64;
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

fn source_mtime(path: &Path) -> Option<SystemTime> {
    std::fs::metadata(path).and_then(|m| m.modified()).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::rc::Rc;

    struct CountingCompiler {
        count: Rc<Cell<usize>>,
    }

    impl ShaderCompiler for CountingCompiler {
        fn compile(
            &self,
            _path: &Path,
            _stage: vk::ShaderStageFlags,
            macros: &[(String, String)],
        ) -> Result<CompiledShader, PipelineError> {
            self.count.set(self.count.get() + 1);
            Ok(CompiledShader {
                // 让字节码依赖宏，方便断言 digest 的区分度
                spirv: vec![0x0723_0203, macros.len() as u32],
                bindings: vec![],
                push_constants: vec![],
                vertex_input: None,
            })
        }
    }

    fn make_cache(count: Rc<Cell<usize>>) -> ShaderModuleCache {
        ShaderModuleCache::new(Box::new(CountingCompiler { count }), false)
    }

    #[test]
    fn test_create_is_idempotent_per_key() {
        let count = Rc::new(Cell::new(0));
        let mut cache = make_cache(count.clone());

        let a = cache.create("shaders/quad.vert", vk::ShaderStageFlags::VERTEX, &[]).unwrap();
        let b = cache.create("shaders/quad.vert", vk::ShaderStageFlags::VERTEX, &[]).unwrap();
        assert_eq!(a, b);
        assert_eq!(count.get(), 1);
    }

    #[test]
    fn test_macro_order_does_not_affect_key() {
        let count = Rc::new(Cell::new(0));
        let mut cache = make_cache(count.clone());

        let m1 = [("A".to_string(), "1".to_string()), ("B".to_string(), "2".to_string())];
        let m2 = [("B".to_string(), "2".to_string()), ("A".to_string(), "1".to_string())];

        let a = cache.create("shaders/quad.frag", vk::ShaderStageFlags::FRAGMENT, &m1).unwrap();
        let b = cache.create("shaders/quad.frag", vk::ShaderStageFlags::FRAGMENT, &m2).unwrap();
        assert_eq!(a, b);
        assert_eq!(count.get(), 1);
    }

    #[test]
    fn test_different_stage_gets_own_module() {
        let count = Rc::new(Cell::new(0));
        let mut cache = make_cache(count.clone());

        let a = cache.create("shaders/common.glsl", vk::ShaderStageFlags::VERTEX, &[]).unwrap();
        let b = cache.create("shaders/common.glsl", vk::ShaderStageFlags::FRAGMENT, &[]).unwrap();
        assert_ne!(a, b);
        assert_eq!(count.get(), 2);
    }
}
