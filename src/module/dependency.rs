//! 模块依赖关系图
//!
//! 在不激活任何模块的情况下预演加载过程，得到加载计划：
//! 哪些模块会按什么顺序加载，哪些模块会因为缺失依赖或循环依赖被阻塞。
//! 预演与依赖加载器使用相同的遍历规则（模块按 ID 升序，依赖按声明顺序，
//! 深度优先），所以在所有激活都成功时，计划顺序与实际加载顺序一致。
//!
//! # 示例
//!
//! ```rust
//! use automation_core::module::dependency::DependencyGraph;
//!
//! let mut graph = DependencyGraph::new();
//! graph.add_module("Scenes");
//! graph.add_module("Cron");
//! graph.add_dependency("Scenes", "Cron");
//!
//! let plan = graph.plan();
//! assert_eq!(plan.order, vec!["Cron".to_string(), "Scenes".to_string()]);
//! assert!(plan.blocked.is_empty());
//! ```

use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::module::metadata::ModuleDescriptor;

/// 加载计划
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LoadPlan {
    /// 会被加载的模块，依赖在前
    pub order: Vec<String>,
    /// 会被阻塞的模块及原因
    pub blocked: BTreeMap<String, String>,
}

/// 模块依赖关系图
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    /// 正向边：模块 ID -> 声明的依赖（保持声明顺序）
    edges: BTreeMap<String, Vec<String>>,
    /// 反向边：模块 ID -> 依赖它的模块
    reverse_edges: BTreeMap<String, BTreeSet<String>>,
}

#[derive(Clone, Copy, PartialEq)]
enum Visit {
    Loaded,
    Blocked,
}

impl DependencyGraph {
    /// 创建空的依赖图
    pub fn new() -> Self {
        Self::default()
    }

    /// 从模块描述符构建依赖图
    ///
    /// 标记为跳过的模块不作为节点加入，依赖它们的模块在计划中表现为缺失依赖。
    pub fn from_descriptors<'a>(descriptors: impl IntoIterator<Item = &'a ModuleDescriptor>) -> Self {
        let mut graph = Self::new();
        let active: Vec<&ModuleDescriptor> =
            descriptors.into_iter().filter(|d| !d.is_skipped()).collect();

        for descriptor in &active {
            graph.add_module(descriptor.id());
        }
        for descriptor in &active {
            for dep in descriptor.dependencies() {
                graph.add_dependency(descriptor.id(), dep);
            }
        }
        graph
    }

    /// 添加模块节点
    pub fn add_module(&mut self, module_id: &str) {
        self.edges.entry(module_id.to_string()).or_default();
    }

    /// 添加依赖边
    ///
    /// 只记录边，不会把依赖加入为节点：依赖未作为模块添加时视为缺失。
    pub fn add_dependency(&mut self, module_id: &str, dependency_id: &str) {
        let deps = self.edges.entry(module_id.to_string()).or_default();
        if !deps.iter().any(|d| d == dependency_id) {
            deps.push(dependency_id.to_string());
        }
        self.reverse_edges
            .entry(dependency_id.to_string())
            .or_default()
            .insert(module_id.to_string());
    }

    /// 模块的直接依赖
    pub fn dependencies(&self, module_id: &str) -> Vec<String> {
        self.edges.get(module_id).cloned().unwrap_or_default()
    }

    /// 直接依赖该模块的模块（升序）
    pub fn dependents(&self, module_id: &str) -> Vec<String> {
        self.reverse_edges
            .get(module_id)
            .map(|s| s.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// 是否包含模块节点
    pub fn contains_module(&self, module_id: &str) -> bool {
        self.edges.contains_key(module_id)
    }

    /// 模块节点数量
    pub fn module_count(&self) -> usize {
        self.edges.len()
    }

    /// 是否为空
    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }

    /// 预演加载，生成加载计划
    pub fn plan(&self) -> LoadPlan {
        let mut plan = LoadPlan::default();
        let mut visits: HashMap<String, Visit> = HashMap::new();
        let mut path: Vec<String> = Vec::new();

        for module_id in self.edges.keys() {
            self.visit(module_id, &mut path, &mut visits, &mut plan);
        }
        plan
    }

    fn visit(
        &self,
        module_id: &str,
        path: &mut Vec<String>,
        visits: &mut HashMap<String, Visit>,
        plan: &mut LoadPlan,
    ) -> Visit {
        if let Some(visit) = visits.get(module_id) {
            return *visit;
        }

        if path.iter().any(|p| p == module_id) {
            let mut cycle = path.clone();
            cycle.push(module_id.to_string());
            return Self::block(
                module_id,
                format!("循环依赖: {}", cycle.join(" -> ")),
                visits,
                plan,
            );
        }

        path.push(module_id.to_string());
        let mut outcome = Visit::Loaded;
        for dep in self.dependencies(module_id) {
            if !self.contains_module(&dep) {
                outcome = Self::block(module_id, format!("依赖 '{}' 未找到", dep), visits, plan);
                break;
            }
            if self.visit(&dep, path, visits, plan) == Visit::Blocked {
                outcome = Self::block(module_id, format!("依赖 '{}' 未能加载", dep), visits, plan);
                break;
            }
        }
        path.pop();

        if outcome == Visit::Loaded {
            visits.insert(module_id.to_string(), Visit::Loaded);
            plan.order.push(module_id.to_string());
        }
        outcome
    }

    /// 标记为阻塞，已阻塞的模块保留第一次的原因
    fn block(
        module_id: &str,
        reason: String,
        visits: &mut HashMap<String, Visit>,
        plan: &mut LoadPlan,
    ) -> Visit {
        visits.insert(module_id.to_string(), Visit::Blocked);
        plan.blocked.entry(module_id.to_string()).or_insert(reason);
        Visit::Blocked
    }
}
