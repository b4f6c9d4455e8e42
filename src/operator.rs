use crate::config::ConfigError;
use crate::graph::{GraphError, OpNode};
use crate::rpc_context::{RemoteInvocationError, RpcContext};
use crate::tensor::{DataType, DeviceKind, Place, Tensor};
use crate::vocab::VocabError;
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum OpError {
    #[error("unknown op type '{0}'")]
    UnknownOpType(String),
    #[error("op '{op}': cannot resolve kernel type: {reason}")]
    KernelType { op: String, reason: String },
    #[error("no '{op_type}' kernel registered for {key}")]
    KernelNotFound { op_type: String, key: KernelKey },
    #[error("op '{op}' has no input bound to slot '{slot}'")]
    MissingInput { op: String, slot: String },
    #[error("variable '{0}' has no value in scope")]
    MissingVar(String),
    #[error("op '{op}': invalid input: {reason}")]
    InvalidInput { op: String, reason: String },
    #[error("url index {index} out of range for url_list of length {len}")]
    UrlIndexOutOfRange { index: i64, len: usize },
    #[error("no result stored for request id {0}")]
    UnknownRequest(i32),
    #[error(transparent)]
    Graph(#[from] GraphError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Vocab(#[from] VocabError),
    #[error(transparent)]
    Remote(#[from] RemoteInvocationError),
}

/// Data type and place an op wants its kernel to run with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KernelType {
    pub data_type: DataType,
    pub place: Place,
}

impl KernelType {
    pub fn new(data_type: DataType, place: Place) -> Self {
        KernelType { data_type, place }
    }

    pub fn key(&self) -> KernelKey {
        KernelKey {
            device: self.place.device_kind(),
            data_type: self.data_type,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct KernelKey {
    pub device: DeviceKind,
    pub data_type: DataType,
}

impl KernelKey {
    pub fn new(device: DeviceKind, data_type: DataType) -> Self {
        KernelKey { device, data_type }
    }
}

impl fmt::Display for KernelKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}/{}", self.device, self.data_type)
    }
}

/// Static shape metadata visible to `infer_shape`.
pub struct InferShapeContext<'a> {
    pub node: &'a OpNode,
    pub shapes: &'a mut HashMap<String, Vec<i64>>,
}

impl InferShapeContext<'_> {
    pub fn input_shape(&self, slot: &str) -> Option<&Vec<i64>> {
        self.node.input(slot).and_then(|var| self.shapes.get(var))
    }

    pub fn set_output_shape(&mut self, slot: &str, shape: Vec<i64>) {
        if let Some(var) = self.node.output(slot) {
            self.shapes.insert(var.to_string(), shape);
        }
    }
}

/// Everything a kernel may read while running one op.
pub struct ExecutionContext<'a> {
    pub op: &'a dyn Operator,
    pub node: &'a OpNode,
    pub inputs: &'a HashMap<String, Tensor>,
    pub place: Place,
    pub rpc: &'a RpcContext,
}

impl<'a> ExecutionContext<'a> {
    pub fn input(&self, slot: &str) -> Result<&'a Tensor, OpError> {
        let var = self.node.input(slot).ok_or_else(|| OpError::MissingInput {
            op: self.node.name.clone(),
            slot: slot.to_string(),
        })?;
        self.inputs
            .get(var)
            .ok_or_else(|| OpError::MissingVar(var.to_string()))
    }

    pub fn input_data_type(&self, slot: &str) -> Result<DataType, OpError> {
        Ok(self.input(slot)?.data_type())
    }

    /// Variable name bound to an output slot.
    pub fn output_var(&self, slot: &str) -> Result<String, OpError> {
        self.node
            .output(slot)
            .map(str::to_string)
            .ok_or_else(|| OpError::InvalidInput {
                op: self.node.name.clone(),
                reason: format!("output slot '{}' is not bound", slot),
            })
    }

    /// Downcasts the running operator to its concrete type.
    pub fn op_as<T: Operator + 'static>(&self) -> Result<&'a T, OpError> {
        self.op
            .as_any()
            .downcast_ref::<T>()
            .ok_or_else(|| OpError::InvalidInput {
                op: self.node.name.clone(),
                reason: format!("kernel bound to unexpected op type '{}'", self.op.op_type()),
            })
    }
}

/// An op instance built from one graph node, with its attributes already validated.
pub trait Operator: Send + Sync {
    fn op_type(&self) -> &'static str;

    fn infer_shape(&self, ctx: &mut InferShapeContext<'_>) -> Result<(), OpError>;

    fn expected_kernel_type(&self, ctx: &ExecutionContext<'_>) -> Result<KernelType, OpError>;

    fn as_any(&self) -> &dyn Any;
}

/// Builds an op instance from a node. Attribute validation happens here, once.
pub type OpBuilder = fn(&OpNode) -> Result<Box<dyn Operator>, OpError>;

/// A device and dtype specific implementation of an op.
pub trait Kernel: Send + Sync {
    /// Returns the produced tensors keyed by output variable name.
    fn compute(&self, ctx: &ExecutionContext<'_>) -> Result<Vec<(String, Tensor)>, OpError>;
}
