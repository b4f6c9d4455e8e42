use crate::graph::OpNode;
use crate::operator::{Kernel, KernelKey, OpBuilder, OpError, Operator};
use crate::{rpc_result, rpc_token_call};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum RegistryError {
    #[error("op '{0}' is already registered")]
    DuplicateOp(String),
    #[error("op '{op_type}' already has a kernel for {key}")]
    DuplicateKernel { op_type: String, key: KernelKey },
    #[error("cannot register a kernel for unknown op '{0}'")]
    UnknownOp(String),
}

pub struct OpEntry {
    builder: OpBuilder,
    has_gradient: bool,
    kernels: HashMap<KernelKey, Arc<dyn Kernel>>,
}

impl OpEntry {
    pub fn has_gradient(&self) -> bool {
        self.has_gradient
    }

    pub fn kernel_keys(&self) -> Vec<KernelKey> {
        self.kernels.keys().copied().collect()
    }
}

/// Op type name to builder and per-device kernels.
#[derive(Default)]
pub struct OpRegistry {
    ops: HashMap<&'static str, OpEntry>,
}

impl OpRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding `rpc_token_call` and `rpc_result`.
    pub fn with_builtin_ops() -> Result<Self, RegistryError> {
        let mut registry = Self::new();
        rpc_token_call::register(&mut registry)?;
        rpc_result::register(&mut registry)?;
        Ok(registry)
    }

    pub fn register_op(
        &mut self,
        op_type: &'static str,
        builder: OpBuilder,
        has_gradient: bool,
    ) -> Result<(), RegistryError> {
        if self.ops.contains_key(op_type) {
            return Err(RegistryError::DuplicateOp(op_type.to_string()));
        }
        self.ops.insert(
            op_type,
            OpEntry {
                builder,
                has_gradient,
                kernels: HashMap::new(),
            },
        );
        Ok(())
    }

    pub fn register_kernel(
        &mut self,
        op_type: &str,
        key: KernelKey,
        kernel: Arc<dyn Kernel>,
    ) -> Result<(), RegistryError> {
        let entry = self
            .ops
            .get_mut(op_type)
            .ok_or_else(|| RegistryError::UnknownOp(op_type.to_string()))?;
        if entry.kernels.contains_key(&key) {
            return Err(RegistryError::DuplicateKernel {
                op_type: op_type.to_string(),
                key,
            });
        }
        entry.kernels.insert(key, kernel);
        Ok(())
    }

    pub fn entry(&self, op_type: &str) -> Option<&OpEntry> {
        self.ops.get(op_type)
    }

    pub fn contains(&self, op_type: &str) -> bool {
        self.ops.contains_key(op_type)
    }

    pub fn op_types(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.ops.keys().copied().collect();
        names.sort_unstable();
        names
    }

    /// Builds the op instance for `node`, validating its attributes.
    pub fn build_op(&self, node: &OpNode) -> Result<Box<dyn Operator>, OpError> {
        let entry = self
            .ops
            .get(node.op_type.as_str())
            .ok_or_else(|| OpError::UnknownOpType(node.op_type.clone()))?;
        (entry.builder)(node)
    }

    pub fn lookup_kernel(&self, op_type: &str, key: KernelKey) -> Result<Arc<dyn Kernel>, OpError> {
        self.ops
            .get(op_type)
            .ok_or_else(|| OpError::UnknownOpType(op_type.to_string()))?
            .kernels
            .get(&key)
            .cloned()
            .ok_or_else(|| OpError::KernelNotFound {
                op_type: op_type.to_string(),
                key,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tensor::{DataType, DeviceKind};

    #[test]
    fn test_builtin_ops() {
        let registry = OpRegistry::with_builtin_ops().unwrap();
        assert_eq!(registry.op_types(), vec!["rpc_result", "rpc_token_call"]);
        assert_eq!(registry.entry("rpc_token_call").unwrap().kernel_keys().len(), 4);
        assert_eq!(registry.entry("rpc_result").unwrap().kernel_keys().len(), 2);
    }

    #[test]
    fn test_kernel_for_unknown_op_rejected() {
        let mut registry = OpRegistry::new();
        let err = registry
            .register_kernel(
                "missing",
                KernelKey::new(DeviceKind::Cpu, DataType::Int32),
                Arc::new(crate::rpc_result::RpcResultKernel),
            )
            .unwrap_err();
        assert_eq!(err, RegistryError::UnknownOp("missing".to_string()));
    }

    #[test]
    fn test_duplicate_kernel_rejected() {
        let mut registry = OpRegistry::with_builtin_ops().unwrap();
        let key = KernelKey::new(DeviceKind::Gpu, DataType::Int32);
        let err = registry
            .register_kernel("rpc_result", key, Arc::new(crate::rpc_result::RpcResultKernel))
            .unwrap_err();
        assert!(matches!(err, RegistryError::DuplicateKernel { .. }));
    }

    #[test]
    fn test_build_unknown_op_type() {
        let registry = OpRegistry::with_builtin_ops().unwrap();
        let node = OpNode::new("n", "conv2d");
        assert!(matches!(
            registry.build_op(&node),
            Err(OpError::UnknownOpType(ref t)) if t == "conv2d"
        ));
    }
}
