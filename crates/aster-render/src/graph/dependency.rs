//! pass 依赖图与拓扑排序
//!
//! 边的方向是 producer → consumer：P 写 Q 读，或 P、Q 先后写同一资源。
//! 排序用 Kahn 算法，就绪集合里按 (sort_key, 插入顺序) 取最小者，
//! 保证编译结果是声明的纯函数。

use std::cmp::Reverse;
use std::collections::BinaryHeap;

use petgraph::Direction;
use petgraph::graph::{DiGraph, NodeIndex};

use crate::graph::handle::ResourceHandle;

/// 边上记录引起依赖的资源，用于诊断输出
#[derive(Clone, Debug, Default)]
pub struct EdgeData {
    pub resources: Vec<ResourceHandle>,
}

pub struct DependencyGraph {
    graph: DiGraph<usize, EdgeData>,
    node_indices: Vec<NodeIndex>,
}

impl DependencyGraph {
    pub fn new(pass_count: usize) -> Self {
        let mut graph = DiGraph::with_capacity(pass_count, pass_count * 2);
        let node_indices = (0..pass_count).map(|i| graph.add_node(i)).collect();
        Self { graph, node_indices }
    }

    /// 添加 producer → consumer 边；重复边只合并资源列表
    pub fn add_edge(&mut self, producer: usize, consumer: usize, resource: ResourceHandle) {
        let producer_node = self.node_indices[producer];
        let consumer_node = self.node_indices[consumer];

        match self.graph.find_edge(producer_node, consumer_node) {
            Some(edge) => {
                let data = self.graph.edge_weight_mut(edge).unwrap();
                if !data.resources.contains(&resource) {
                    data.resources.push(resource);
                }
            }
            None => {
                self.graph.add_edge(
                    producer_node,
                    consumer_node,
                    EdgeData {
                        resources: vec![resource],
                    },
                );
            }
        }
    }

    /// 从各 pass 的读写集合构建依赖图
    ///
    /// - 写后读：writer → 所有不写该资源的 reader（与声明顺序无关）
    /// - 写后写：多个 writer 按插入顺序成链
    pub fn analyze(reads: &[Vec<ResourceHandle>], writes: &[Vec<ResourceHandle>]) -> Self {
        let pass_count = reads.len();
        debug_assert_eq!(pass_count, writes.len());

        let mut graph = Self::new(pass_count);

        // 资源 → writer 列表（插入顺序）/ reader 列表
        let mut writers: std::collections::HashMap<ResourceHandle, Vec<usize>> = std::collections::HashMap::new();
        let mut readers: std::collections::HashMap<ResourceHandle, Vec<usize>> = std::collections::HashMap::new();
        for pass_idx in 0..pass_count {
            for &handle in &writes[pass_idx] {
                writers.entry(handle).or_default().push(pass_idx);
            }
            for &handle in &reads[pass_idx] {
                readers.entry(handle).or_default().push(pass_idx);
            }
        }

        for (&handle, resource_writers) in &writers {
            for window in resource_writers.windows(2) {
                graph.add_edge(window[0], window[1], handle);
            }

            let Some(resource_readers) = readers.get(&handle) else { continue };
            for &reader in resource_readers {
                // 同时写该资源的 reader 已经在 WAW 链里了
                if resource_writers.contains(&reader) {
                    continue;
                }
                for &writer in resource_writers {
                    graph.add_edge(writer, reader, handle);
                }
            }
        }

        graph
    }

    /// 确定性拓扑排序
    ///
    /// `sort_keys[i]` 是 pass i 的排序键；就绪集合中 (sort_key, 插入顺序)
    /// 最小者先出队。
    ///
    /// # Return
    /// - `Ok(order)`: pass 索引的执行顺序
    /// - `Err(cycle)`: 参与循环的 pass 索引
    pub fn topological_sort(&self, sort_keys: &[u64]) -> Result<Vec<usize>, Vec<usize>> {
        let pass_count = self.node_indices.len();
        let mut in_degrees: Vec<usize> = self
            .node_indices
            .iter()
            .map(|&n| self.graph.neighbors_directed(n, Direction::Incoming).count())
            .collect();

        let mut ready = BinaryHeap::new();
        for (pass_idx, &degree) in in_degrees.iter().enumerate() {
            if degree == 0 {
                ready.push(Reverse((sort_keys[pass_idx], pass_idx)));
            }
        }

        let mut order = Vec::with_capacity(pass_count);
        while let Some(Reverse((_, pass_idx))) = ready.pop() {
            order.push(pass_idx);

            for neighbor in self.graph.neighbors_directed(self.node_indices[pass_idx], Direction::Outgoing) {
                let neighbor_idx = self.graph[neighbor];
                in_degrees[neighbor_idx] -= 1;
                if in_degrees[neighbor_idx] == 0 {
                    ready.push(Reverse((sort_keys[neighbor_idx], neighbor_idx)));
                }
            }
        }

        if order.len() != pass_count {
            let cycle: Vec<usize> = (0..pass_count).filter(|&i| in_degrees[i] > 0).collect();
            Err(cycle)
        } else {
            Ok(order)
        }
    }

    /// 诊断输出用的边列表 (producer, consumer, resources)
    pub fn edges(&self) -> impl Iterator<Item = (usize, usize, &EdgeData)> {
        self.graph.edge_indices().map(|e| {
            let (a, b) = self.graph.edge_endpoints(e).unwrap();
            (self.graph[a], self.graph[b], &self.graph[e])
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::handle::produce_image_handle;

    fn handles(names: &[&str]) -> Vec<ResourceHandle> {
        names.iter().map(|n| produce_image_handle(&format!("dep-test-{n}"))).collect()
    }

    #[test]
    fn test_write_then_read_orders_passes() {
        let h = handles(&["wr"]);
        // pass 0 写，pass 1 读
        let reads = vec![vec![], vec![h[0]]];
        let writes = vec![vec![h[0]], vec![]];

        let graph = DependencyGraph::analyze(&reads, &writes);
        let order = graph.topological_sort(&[0, 0]).unwrap();
        assert_eq!(order, vec![0, 1]);
    }

    #[test]
    fn test_write_after_write_orders_passes() {
        let h = handles(&["ww"]);
        let reads = vec![vec![], vec![]];
        let writes = vec![vec![h[0]], vec![h[0]]];

        let graph = DependencyGraph::analyze(&reads, &writes);
        let order = graph.topological_sort(&[0, 0]).unwrap();
        assert_eq!(order, vec![0, 1]);
    }

    #[test]
    fn test_sort_key_breaks_ties() {
        let h = handles(&["tie-a", "tie-b"]);
        // 两个独立的 writer，sort key 决定顺序
        let reads = vec![vec![], vec![], vec![h[0], h[1]]];
        let writes = vec![vec![h[0]], vec![h[1]], vec![]];

        let graph = DependencyGraph::analyze(&reads, &writes);
        let order = graph.topological_sort(&[5, 1, 0]).unwrap();
        assert_eq!(order, vec![1, 0, 2]);
    }

    #[test]
    fn test_insertion_order_breaks_equal_sort_keys() {
        let h = handles(&["ins-a", "ins-b"]);
        let reads = vec![vec![], vec![], vec![h[0], h[1]]];
        let writes = vec![vec![h[0]], vec![h[1]], vec![]];

        let graph = DependencyGraph::analyze(&reads, &writes);
        let order = graph.topological_sort(&[0, 0, 0]).unwrap();
        assert_eq!(order, vec![0, 1, 2]);
    }

    #[test]
    fn test_cycle_reports_participants() {
        let h = handles(&["cyc-r1", "cyc-r2"]);
        // P 写 r1 读 r2；Q 写 r2 读 r1
        let reads = vec![vec![h[1]], vec![h[0]]];
        let writes = vec![vec![h[0]], vec![h[1]]];

        let graph = DependencyGraph::analyze(&reads, &writes);
        let cycle = graph.topological_sort(&[0, 0]).unwrap_err();
        assert_eq!(cycle, vec![0, 1]);
    }
}
