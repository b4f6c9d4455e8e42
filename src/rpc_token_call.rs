//! `rpc_token_call`: sends a tensor of token ids to one of several remote
//! token services and outputs the request id the call was stored under.

use crate::config::{ConfigError, ConfigResult};
use crate::graph::OpNode;
use crate::io_struct::TokenCallRequest;
use crate::operator::{
    ExecutionContext, InferShapeContext, Kernel, KernelKey, KernelType, OpError, Operator,
};
use crate::registry::{OpRegistry, RegistryError};
use crate::rpc_context::RpcContext;
use crate::tensor::{DataType, DeviceKind, Place, Tensor, TensorData};
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::marker::PhantomData;
use std::path::Path;
use std::sync::Arc;

pub const OP_TYPE: &str = "rpc_token_call";

/// Attributes of an `rpc_token_call` node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RpcTokenCallAttrs {
    /// Candidate endpoints, indexed by the `url_id` input.
    #[serde(default)]
    pub url_list: Vec<String>,
    /// Absolute path of the vocabulary used when `use_ids` is false.
    #[serde(default)]
    pub vocab_path: String,
    /// Forward ids as-is instead of translating them to tokens.
    #[serde(default = "default_use_ids")]
    pub use_ids: bool,
}

fn default_use_ids() -> bool {
    true
}

impl Default for RpcTokenCallAttrs {
    fn default() -> Self {
        RpcTokenCallAttrs {
            url_list: Vec::new(),
            vocab_path: String::new(),
            use_ids: default_use_ids(),
        }
    }
}

impl RpcTokenCallAttrs {
    /// Reads the attribute bag of a node. A missing bag means all defaults.
    pub fn from_value(attrs: &serde_json::Value) -> ConfigResult<Self> {
        if attrs.is_null() {
            return Ok(Self::default());
        }
        serde_json::from_value(attrs.clone()).map_err(|e| ConfigError::Attributes(e.to_string()))
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if !self.use_ids && self.vocab_path.is_empty() {
            return Err(ConfigError::MissingRequired {
                field: "vocab_path".to_string(),
            });
        }
        if !self.vocab_path.is_empty() && !Path::new(&self.vocab_path).is_absolute() {
            return Err(ConfigError::InvalidValue {
                field: "vocab_path".to_string(),
                value: self.vocab_path.clone(),
                reason: "must be an absolute path".to_string(),
            });
        }
        for url in &self.url_list {
            let parsed = reqwest::Url::parse(url).map_err(|e| ConfigError::InvalidValue {
                field: "url_list".to_string(),
                value: url.clone(),
                reason: e.to_string(),
            })?;
            if !matches!(parsed.scheme(), "http" | "https") {
                return Err(ConfigError::InvalidValue {
                    field: "url_list".to_string(),
                    value: url.clone(),
                    reason: "only http and https endpoints are supported".to_string(),
                });
            }
        }
        Ok(())
    }

    pub fn select_url(&self, selector: i64) -> Result<&str, OpError> {
        select_url(&self.url_list, selector)
    }
}

/// Picks `url_list[selector]`.
pub fn select_url(url_list: &[String], selector: i64) -> Result<&str, OpError> {
    usize::try_from(selector)
        .ok()
        .and_then(|idx| url_list.get(idx))
        .map(String::as_str)
        .ok_or(OpError::UrlIndexOutOfRange {
            index: selector,
            len: url_list.len(),
        })
}

#[derive(Debug, Clone)]
pub struct RpcTokenCallOp {
    attrs: RpcTokenCallAttrs,
}

impl RpcTokenCallOp {
    pub fn new(attrs: RpcTokenCallAttrs) -> Result<Self, ConfigError> {
        attrs.validate()?;
        Ok(RpcTokenCallOp { attrs })
    }

    pub fn build(node: &OpNode) -> Result<Box<dyn Operator>, OpError> {
        let attrs = RpcTokenCallAttrs::from_value(&node.attrs)?;
        Ok(Box::new(Self::new(attrs)?))
    }

    pub fn attrs(&self) -> &RpcTokenCallAttrs {
        &self.attrs
    }

    /// Builds the request for `ids`, sends it to the selected endpoint and
    /// returns the request id. Shared by every kernel variant.
    pub fn invoke(&self, rpc: &RpcContext, ids: Vec<i64>, selector: i64) -> Result<i32, OpError> {
        let url = self.attrs.select_url(selector)?;
        let request = if self.attrs.use_ids {
            TokenCallRequest::from_ids(ids)
        } else {
            let vocab = rpc.vocabulary(Path::new(&self.attrs.vocab_path))?;
            TokenCallRequest::from_tokens(&vocab.translate(&ids)?)
        };
        let request_id = rpc.call(url, &request)?;
        log::debug!("Sent request {} to {}", request_id, url);
        Ok(request_id)
    }
}

impl Operator for RpcTokenCallOp {
    fn op_type(&self) -> &'static str {
        OP_TYPE
    }

    // The output shape depends on the remote reply, so nothing is propagated.
    fn infer_shape(&self, _ctx: &mut InferShapeContext<'_>) -> Result<(), OpError> {
        Ok(())
    }

    fn expected_kernel_type(&self, ctx: &ExecutionContext<'_>) -> Result<KernelType, OpError> {
        let dtype = ctx.input_data_type("X")?;
        if !matches!(dtype, DataType::Int32 | DataType::Int64) {
            return Err(OpError::KernelType {
                op: ctx.node.name.clone(),
                reason: format!("input X must be int32 or int64, got {}", dtype),
            });
        }
        Ok(KernelType::new(dtype, ctx.place))
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Integer element types accepted for the token id tensor.
pub trait TokenId: Copy + Send + Sync + 'static {
    const DATA_TYPE: DataType;

    fn values(data: &TensorData) -> Option<&[Self]>;

    fn widen(self) -> i64;
}

impl TokenId for i32 {
    const DATA_TYPE: DataType = DataType::Int32;

    fn values(data: &TensorData) -> Option<&[Self]> {
        match data {
            TensorData::I32(v) => Some(v.as_slice()),
            _ => None,
        }
    }

    fn widen(self) -> i64 {
        self as i64
    }
}

impl TokenId for i64 {
    const DATA_TYPE: DataType = DataType::Int64;

    fn values(data: &TensorData) -> Option<&[Self]> {
        match data {
            TensorData::I64(v) => Some(v.as_slice()),
            _ => None,
        }
    }

    fn widen(self) -> i64 {
        self
    }
}

/// Kernel for one device and element type. Every variant shares the same
/// request building and id assignment; accelerator inputs are staged to host
/// memory first.
pub struct RpcTokenCallKernel<T: TokenId> {
    device: DeviceKind,
    _marker: PhantomData<T>,
}

impl<T: TokenId> RpcTokenCallKernel<T> {
    pub fn new(device: DeviceKind) -> Self {
        RpcTokenCallKernel {
            device,
            _marker: PhantomData,
        }
    }

    pub fn key(&self) -> KernelKey {
        KernelKey::new(self.device, T::DATA_TYPE)
    }

    fn read_ids(&self, ctx: &ExecutionContext<'_>) -> Result<Vec<i64>, OpError> {
        let x = ctx.input("X")?;
        let host;
        let x = match self.device {
            DeviceKind::Cpu => x,
            DeviceKind::Gpu => {
                host = x.to_place(Place::Cpu);
                &host
            }
        };
        let values = T::values(x.data()).ok_or_else(|| OpError::InvalidInput {
            op: ctx.node.name.clone(),
            reason: format!("expected {} ids, got {}", T::DATA_TYPE, x.data_type()),
        })?;
        Ok(values.iter().map(|v| v.widen()).collect())
    }
}

fn read_selector(ctx: &ExecutionContext<'_>) -> Result<i64, OpError> {
    let selector = ctx.input("url_id")?;
    selector
        .as_i64_vec()
        .and_then(|v| v.first().copied())
        .ok_or_else(|| OpError::InvalidInput {
            op: ctx.node.name.clone(),
            reason: format!(
                "url_id must be a non-empty integer tensor, got {} with {} elements",
                selector.data_type(),
                selector.numel()
            ),
        })
}

impl<T: TokenId> Kernel for RpcTokenCallKernel<T> {
    fn compute(&self, ctx: &ExecutionContext<'_>) -> Result<Vec<(String, Tensor)>, OpError> {
        let op = ctx.op_as::<RpcTokenCallOp>()?;
        let ids = self.read_ids(ctx)?;
        let request_id = op.invoke(ctx.rpc, ids, read_selector(ctx)?)?;
        log::trace!("{} ran on {:?}", ctx.node.name, self.device);
        let out = Tensor::scalar_i32(request_id).with_place(ctx.place);
        Ok(vec![(ctx.output_var("Out")?, out)])
    }
}

/// Registers the op (without gradient) and its CPU and GPU kernels for int32 and int64.
pub fn register(registry: &mut OpRegistry) -> Result<(), RegistryError> {
    registry.register_op(OP_TYPE, RpcTokenCallOp::build, false)?;
    for device in [DeviceKind::Cpu, DeviceKind::Gpu] {
        let narrow = RpcTokenCallKernel::<i32>::new(device);
        registry.register_kernel(OP_TYPE, narrow.key(), Arc::new(narrow))?;
        let wide = RpcTokenCallKernel::<i64>::new(device);
        registry.register_kernel(OP_TYPE, wide.key(), Arc::new(wide))?;
    }
    Ok(())
}
