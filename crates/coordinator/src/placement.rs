use std::collections::BTreeMap;

use tracing::debug;

use fleet_core::models::{NodeState, TaskRequirements};

/// 节点选择策略
pub trait PlacementStrategy: Send + Sync {
    /// 从注册表中为任务挑选节点，没有合适节点时返回 None
    fn select_node(
        &self,
        requirements: &TaskRequirements,
        nodes: &BTreeMap<String, NodeState>,
    ) -> Option<String>;

    fn name(&self) -> &str;
}

/// 最小负载策略
///
/// 候选节点须健康、能力覆盖任务需求、负载低于 `max_load` 且可用内存足够；
/// 负载相同时取ID最小的节点。
#[derive(Debug, Default, Clone, Copy)]
pub struct LeastLoadedStrategy;

impl LeastLoadedStrategy {
    pub fn new() -> Self {
        Self
    }
}

impl PlacementStrategy for LeastLoadedStrategy {
    fn select_node(
        &self,
        requirements: &TaskRequirements,
        nodes: &BTreeMap<String, NodeState>,
    ) -> Option<String> {
        let mut selected: Option<&NodeState> = None;
        for node in nodes.values().filter(|node| node.can_accept(requirements)) {
            match selected {
                Some(current) if node.info.load >= current.info.load => {}
                _ => selected = Some(node),
            }
        }

        match selected {
            Some(node) => {
                debug!(
                    "最小负载策略选择节点: {} (负载: {:.2})",
                    node.info.id, node.info.load
                );
                Some(node.info.id.clone())
            }
            None => {
                debug!(
                    "没有满足需求的节点 (能力: {:?}, 内存: {})",
                    requirements.capabilities, requirements.memory
                );
                None
            }
        }
    }

    fn name(&self) -> &str {
        "LeastLoaded"
    }
}
