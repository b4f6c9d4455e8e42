use crate::graph::{ExecutionGraph, OpNode};
use crate::operator::{ExecutionContext, InferShapeContext, OpError, Operator};
use crate::registry::OpRegistry;
use crate::rpc_context::RpcContext;
use crate::tensor::{Place, Tensor};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Lifecycle of one op within a single graph step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpRunState {
    Idle,
    ShapeInferred,
    KernelTypeResolved,
    Executed,
}

/// Variable values for one step.
#[derive(Debug, Default, Clone)]
pub struct Scope {
    vars: HashMap<String, Tensor>,
}

impl Scope {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, name: &str, tensor: Tensor) {
        self.vars.insert(name.to_string(), tensor);
    }

    pub fn get(&self, name: &str) -> Option<&Tensor> {
        self.vars.get(name)
    }

    pub fn remove(&mut self, name: &str) -> Option<Tensor> {
        self.vars.remove(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.vars.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }
}

pub struct PreparedOp {
    node: OpNode,
    op: Box<dyn Operator>,
    state: OpRunState,
}

impl PreparedOp {
    pub fn node(&self) -> &OpNode {
        &self.node
    }

    pub fn state(&self) -> OpRunState {
        self.state
    }
}

impl fmt::Debug for PreparedOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PreparedOp")
            .field("name", &self.node.name)
            .field("op_type", &self.op.op_type())
            .field("state", &self.state)
            .finish()
    }
}

/// A graph whose ops have been built and ordered, ready to run repeatedly.
#[derive(Debug)]
pub struct Program {
    steps: Vec<PreparedOp>,
    shapes: HashMap<String, Vec<i64>>,
}

impl Program {
    pub fn steps(&self) -> &[PreparedOp] {
        &self.steps
    }

    pub fn shapes(&self) -> &HashMap<String, Vec<i64>> {
        &self.shapes
    }
}

pub struct Executor {
    registry: Arc<OpRegistry>,
    rpc: Arc<RpcContext>,
    place: Place,
}

impl Executor {
    pub fn new(registry: Arc<OpRegistry>, rpc: Arc<RpcContext>, place: Place) -> Self {
        Executor {
            registry,
            rpc,
            place,
        }
    }

    pub fn place(&self) -> Place {
        self.place
    }

    pub fn rpc(&self) -> &RpcContext {
        &self.rpc
    }

    /// Validates the graph, orders it and builds every op. Op attributes are
    /// checked here rather than on each step.
    pub fn prepare(&self, graph: &ExecutionGraph) -> Result<Program, OpError> {
        graph.validate()?;
        let steps = graph
            .topological_order()?
            .into_iter()
            .map(|node| {
                Ok(PreparedOp {
                    node: node.clone(),
                    op: self.registry.build_op(node)?,
                    state: OpRunState::Idle,
                })
            })
            .collect::<Result<Vec<_>, OpError>>()?;
        let shapes = graph
            .vars
            .iter()
            .map(|v| (v.name.clone(), v.shape.clone()))
            .collect();
        log::debug!("Prepared program with {} ops", steps.len());
        Ok(Program { steps, shapes })
    }

    /// Runs every op of `program` once. The first failure aborts the step.
    pub fn run(&self, program: &mut Program, scope: &mut Scope) -> Result<(), OpError> {
        for step in program.steps.iter_mut() {
            step.state = OpRunState::Idle;
        }
        for step in program.steps.iter_mut() {
            if let Err(e) = self.run_op(step, &mut program.shapes, scope) {
                log::error!("Op '{}' ({}) failed: {}", step.node.name, step.node.op_type, e);
                return Err(e);
            }
        }
        Ok(())
    }

    pub fn run_graph(&self, graph: &ExecutionGraph, scope: &mut Scope) -> Result<Program, OpError> {
        let mut program = self.prepare(graph)?;
        self.run(&mut program, scope)?;
        Ok(program)
    }

    fn run_op(
        &self,
        step: &mut PreparedOp,
        shapes: &mut HashMap<String, Vec<i64>>,
        scope: &mut Scope,
    ) -> Result<(), OpError> {
        let mut shape_ctx = InferShapeContext {
            node: &step.node,
            shapes,
        };
        step.op.infer_shape(&mut shape_ctx)?;
        step.state = OpRunState::ShapeInferred;

        let ctx = ExecutionContext {
            op: step.op.as_ref(),
            node: &step.node,
            inputs: &scope.vars,
            place: self.place,
            rpc: &self.rpc,
        };
        let kernel_type = step.op.expected_kernel_type(&ctx)?;
        step.state = OpRunState::KernelTypeResolved;

        let kernel = self
            .registry
            .lookup_kernel(step.op.op_type(), kernel_type.key())?;
        let outputs = kernel.compute(&ctx)?;
        for (name, tensor) in outputs {
            scope.set(&name, tensor);
        }
        step.state = OpRunState::Executed;
        log::debug!(
            "Executed '{}' with {} kernel",
            step.node.name,
            kernel_type.key()
        );
        Ok(())
    }
}
