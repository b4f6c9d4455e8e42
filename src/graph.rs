use crate::tensor::DataType;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum GraphError {
    #[error("duplicate op name: {0}")]
    DuplicateOp(String),
    #[error("op '{op}' reads undeclared variable '{var}'")]
    UndefinedVar { op: String, var: String },
    #[error("variable '{0}' is produced by more than one op")]
    MultipleProducers(String),
    #[error("graph contains a cycle through op '{0}'")]
    Cycle(String),
    #[error("failed to read graph: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse graph: {0}")]
    Parse(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VarDesc {
    pub name: String,
    pub dtype: DataType,
    #[serde(default)]
    pub shape: Vec<i64>,
}

/// One operator node. Inputs and outputs are keyed by slot name ("X", "Out", ...).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpNode {
    pub name: String,
    #[serde(rename = "type")]
    pub op_type: String,
    #[serde(default)]
    pub inputs: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    pub outputs: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    pub attrs: serde_json::Value,
}

impl OpNode {
    pub fn new(name: impl Into<String>, op_type: impl Into<String>) -> Self {
        OpNode {
            name: name.into(),
            op_type: op_type.into(),
            inputs: BTreeMap::new(),
            outputs: BTreeMap::new(),
            attrs: serde_json::Value::Null,
        }
    }

    pub fn with_input(mut self, slot: &str, var: &str) -> Self {
        self.inputs
            .entry(slot.to_string())
            .or_default()
            .push(var.to_string());
        self
    }

    pub fn with_output(mut self, slot: &str, var: &str) -> Self {
        self.outputs
            .entry(slot.to_string())
            .or_default()
            .push(var.to_string());
        self
    }

    pub fn with_attrs(mut self, attrs: serde_json::Value) -> Self {
        self.attrs = attrs;
        self
    }

    /// First variable bound to an input slot.
    pub fn input(&self, slot: &str) -> Option<&str> {
        self.inputs.get(slot)?.first().map(String::as_str)
    }

    pub fn output(&self, slot: &str) -> Option<&str> {
        self.outputs.get(slot)?.first().map(String::as_str)
    }

    pub fn input_vars(&self) -> impl Iterator<Item = &str> {
        self.inputs.values().flatten().map(String::as_str)
    }

    pub fn output_vars(&self) -> impl Iterator<Item = &str> {
        self.outputs.values().flatten().map(String::as_str)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecutionGraph {
    #[serde(default)]
    pub vars: Vec<VarDesc>,
    #[serde(default)]
    pub ops: Vec<OpNode>,
}

impl ExecutionGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_json_file(path: &Path) -> Result<Self, GraphError> {
        let raw = std::fs::read_to_string(path)?;
        let graph: ExecutionGraph = serde_json::from_str(&raw)?;
        graph.validate()?;
        Ok(graph)
    }

    pub fn add_var(&mut self, name: &str, dtype: DataType, shape: Vec<i64>) {
        self.vars.push(VarDesc {
            name: name.to_string(),
            dtype,
            shape,
        });
    }

    pub fn add_op(&mut self, op: OpNode) {
        self.ops.push(op);
    }

    pub fn op(&self, name: &str) -> Option<&OpNode> {
        self.ops.iter().find(|op| op.name == name)
    }

    pub fn contains_op(&self, name: &str) -> bool {
        self.op(name).is_some()
    }

    pub fn var(&self, name: &str) -> Option<&VarDesc> {
        self.vars.iter().find(|v| v.name == name)
    }

    /// True if `name` is declared or written by some op.
    pub fn has_var(&self, name: &str) -> bool {
        self.var(name).is_some() || !self.producers(name).is_empty()
    }

    pub fn producers(&self, var: &str) -> Vec<&OpNode> {
        self.ops
            .iter()
            .filter(|op| op.output_vars().any(|v| v == var))
            .collect()
    }

    pub fn consumers(&self, var: &str) -> Vec<&OpNode> {
        self.ops
            .iter()
            .filter(|op| op.input_vars().any(|v| v == var))
            .collect()
    }

    pub fn validate(&self) -> Result<(), GraphError> {
        let mut names = HashSet::new();
        let mut produced = HashSet::new();
        for op in &self.ops {
            if !names.insert(op.name.as_str()) {
                return Err(GraphError::DuplicateOp(op.name.clone()));
            }
            for var in op.output_vars() {
                if !produced.insert(var) {
                    return Err(GraphError::MultipleProducers(var.to_string()));
                }
            }
        }
        for op in &self.ops {
            for var in op.input_vars() {
                if self.var(var).is_none() && !produced.contains(var) {
                    return Err(GraphError::UndefinedVar {
                        op: op.name.clone(),
                        var: var.to_string(),
                    });
                }
            }
        }
        self.topological_order().map(|_| ())
    }

    /// Ops ordered so every producer precedes its consumers. Ties keep insertion order.
    pub fn topological_order(&self) -> Result<Vec<&OpNode>, GraphError> {
        let mut producer_of: HashMap<&str, usize> = HashMap::new();
        for (idx, op) in self.ops.iter().enumerate() {
            for var in op.output_vars() {
                producer_of.insert(var, idx);
            }
        }

        let mut in_degree = vec![0usize; self.ops.len()];
        let mut successors: Vec<Vec<usize>> = vec![Vec::new(); self.ops.len()];
        for (idx, op) in self.ops.iter().enumerate() {
            let deps: HashSet<usize> = op
                .input_vars()
                .filter_map(|v| producer_of.get(v).copied())
                .collect();
            for dep in deps {
                in_degree[idx] += 1;
                successors[dep].push(idx);
            }
        }

        let mut ready: VecDeque<usize> = (0..self.ops.len())
            .filter(|idx| in_degree[*idx] == 0)
            .collect();
        let mut order = Vec::with_capacity(self.ops.len());
        while let Some(idx) = ready.pop_front() {
            order.push(&self.ops[idx]);
            for next in &successors[idx] {
                in_degree[*next] -= 1;
                if in_degree[*next] == 0 {
                    ready.push_back(*next);
                }
            }
        }

        if order.len() != self.ops.len() {
            let stuck = (0..self.ops.len())
                .find(|idx| in_degree[*idx] > 0)
                .map(|idx| self.ops[idx].name.clone())
                .unwrap_or_default();
            return Err(GraphError::Cycle(stuck));
        }
        Ok(order)
    }
}
