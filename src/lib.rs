pub mod cluster;
pub mod config;
pub mod executor;
pub mod exporter;
pub mod graph;
pub mod io_struct;
pub mod logging;
pub mod operator;
pub mod registry;
pub mod rpc_context;
pub mod rpc_result;
pub mod rpc_token_call;
pub mod server;
pub mod tensor;
pub mod vocab;

pub use cluster::{Cluster, ClusterSet, CodecError, EncodedClusters};
pub use config::{ConfigError, RpcClientConfig};
pub use executor::{Executor, OpRunState, Program, Scope};
pub use exporter::{
    ExportError, ExportSummary, export_clusters, load_runtime_graph, save_runtime_graph,
};
pub use graph::{ExecutionGraph, GraphError, OpNode};
pub use operator::{KernelKey, KernelType, OpError, Operator};
pub use registry::{OpRegistry, RegistryError};
pub use rpc_context::{RemoteInvocationError, RpcContext, RpcResponse};
pub use rpc_token_call::{RpcTokenCallAttrs, RpcTokenCallOp};
pub use tensor::{DataType, DeviceKind, Place, Tensor, TensorData};

#[cfg(feature = "python")]
mod python {
    use crate::config::RpcClientConfig;
    use crate::exporter;
    use crate::graph::ExecutionGraph;
    use crate::rpc_context::RpcContext;
    use crate::rpc_token_call::{RpcTokenCallAttrs, RpcTokenCallOp};
    use pyo3::{exceptions::PyRuntimeError, exceptions::PyValueError, prelude::*};
    use std::path::Path;

    #[pyfunction]
    fn save_runtime_graph(
        graph_json: &str,
        clusters_ops: &str,
        clusters_inputs: &str,
        cluster_outputs: &str,
        cluster_intervals: &str,
        saved_path: &str,
    ) -> PyResult<usize> {
        let graph: ExecutionGraph = serde_json::from_str(graph_json)
            .map_err(|e| PyValueError::new_err(format!("Invalid graph: {}", e)))?;
        let summary = exporter::save_runtime_graph(
            &graph,
            clusters_ops,
            clusters_inputs,
            cluster_outputs,
            cluster_intervals,
            Path::new(saved_path),
        )
        .map_err(|e| PyRuntimeError::new_err(e.to_string()))?;
        Ok(summary.clusters)
    }

    #[pyclass]
    pub struct RpcTokenCall {
        op: RpcTokenCallOp,
        rpc: RpcContext,
    }

    #[pymethods]
    impl RpcTokenCall {
        #[new]
        #[pyo3(signature = (url_list, vocab_path=String::new(), use_ids=true, timeout=30))]
        pub fn new(
            url_list: Vec<String>,
            vocab_path: String,
            use_ids: bool,
            timeout: u64,
        ) -> PyResult<Self> {
            let attrs = RpcTokenCallAttrs {
                url_list,
                vocab_path,
                use_ids,
            };
            let op = RpcTokenCallOp::new(attrs).map_err(|e| PyValueError::new_err(e.to_string()))?;
            let rpc = RpcContext::new(RpcClientConfig::default().with_timeout_secs(timeout))
                .map_err(|e| {
                    PyRuntimeError::new_err(format!("Failed to build rpc context: {}", e))
                })?;
            Ok(RpcTokenCall { op, rpc })
        }

        pub fn call(&self, py: Python<'_>, ids: Vec<i64>, url_id: i64) -> PyResult<i32> {
            py.allow_threads(|| self.op.invoke(&self.rpc, ids, url_id))
                .map_err(|e| PyRuntimeError::new_err(e.to_string()))
        }

        pub fn result(&self, request_id: i32) -> Option<Vec<u8>> {
            self.rpc.take_result(request_id).map(|r| r.body.to_vec())
        }
    }

    #[pymodule]
    fn _rust(_py: Python, m: &Bound<PyModule>) -> PyResult<()> {
        m.add_function(wrap_pyfunction!(save_runtime_graph, m)?)?;
        m.add_class::<RpcTokenCall>()?;
        Ok(())
    }
}
