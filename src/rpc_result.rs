//! `rpc_result`: fetches the stored reply of a previous `rpc_token_call`.
//!
//! Input `X` holds the request id. Outputs `Out` (uint8 body bytes) and the
//! optional `Status` (int32 HTTP status). The stored reply is consumed.

use crate::graph::OpNode;
use crate::operator::{
    ExecutionContext, InferShapeContext, Kernel, KernelKey, KernelType, OpError, Operator,
};
use crate::registry::{OpRegistry, RegistryError};
use crate::tensor::{DataType, DeviceKind, Tensor};
use std::any::Any;
use std::sync::Arc;

pub const OP_TYPE: &str = "rpc_result";

#[derive(Debug, Clone, Default)]
pub struct RpcResultOp;

impl RpcResultOp {
    pub fn build(_node: &OpNode) -> Result<Box<dyn Operator>, OpError> {
        Ok(Box::new(RpcResultOp))
    }
}

impl Operator for RpcResultOp {
    fn op_type(&self) -> &'static str {
        OP_TYPE
    }

    fn infer_shape(&self, ctx: &mut InferShapeContext<'_>) -> Result<(), OpError> {
        ctx.set_output_shape("Out", vec![-1]);
        ctx.set_output_shape("Status", vec![1]);
        Ok(())
    }

    fn expected_kernel_type(&self, ctx: &ExecutionContext<'_>) -> Result<KernelType, OpError> {
        let dtype = ctx.input_data_type("X")?;
        if dtype != DataType::Int32 {
            return Err(OpError::KernelType {
                op: ctx.node.name.clone(),
                reason: format!("request id must be int32, got {}", dtype),
            });
        }
        Ok(KernelType::new(dtype, ctx.place))
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

pub struct RpcResultKernel;

impl Kernel for RpcResultKernel {
    fn compute(&self, ctx: &ExecutionContext<'_>) -> Result<Vec<(String, Tensor)>, OpError> {
        let ids = ctx.input("X")?.as_i64_vec().unwrap_or_default();
        let request_id = match ids.as_slice() {
            // Int32 is enforced by expected_kernel_type.
            [id] => *id as i32,
            _ => {
                return Err(OpError::InvalidInput {
                    op: ctx.node.name.clone(),
                    reason: format!("expected a single request id, got {} values", ids.len()),
                });
            }
        };
        let response = ctx
            .rpc
            .take_result(request_id)
            .ok_or(OpError::UnknownRequest(request_id))?;

        let mut outputs = vec![(
            ctx.output_var("Out")?,
            Tensor::from_u8(response.body.to_vec()).with_place(ctx.place),
        )];
        if let Some(var) = ctx.node.output("Status") {
            outputs.push((
                var.to_string(),
                Tensor::scalar_i32(response.status as i32).with_place(ctx.place),
            ));
        }
        Ok(outputs)
    }
}

pub fn register(registry: &mut OpRegistry) -> Result<(), RegistryError> {
    registry.register_op(OP_TYPE, RpcResultOp::build, false)?;
    for device in [DeviceKind::Cpu, DeviceKind::Gpu] {
        registry.register_kernel(
            OP_TYPE,
            KernelKey::new(device, DataType::Int32),
            Arc::new(RpcResultKernel),
        )?;
    }
    Ok(())
}
