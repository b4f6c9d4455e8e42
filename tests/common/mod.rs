// Shared fixtures for integration tests
#![allow(dead_code)]

use std::net::TcpListener;
use std::sync::Mutex;
use std::time::Duration;

use actix_web::{App, HttpRequest, HttpResponse, HttpServer, dev::ServerHandle, web};
use rpc_token_graph::{DataType, ExecutionGraph, OpNode};
use serde_json::{Value, json};

#[derive(Default)]
pub struct MockState {
    pub requests: Mutex<Vec<(String, Value)>>,
}

/// Token service on a random loopback port, running on its own actix system thread.
///
/// Routes:
/// - `POST /generate`, `POST /alt/generate`: record the body and echo it
/// - `POST /fail`: 503
/// - `POST /slow`: reply after 3 seconds
pub struct MockTokenService {
    pub base_url: String,
    pub state: web::Data<MockState>,
    handle: ServerHandle,
}

async fn record(req: HttpRequest, body: web::Json<Value>, state: web::Data<MockState>) -> HttpResponse {
    let path = req.path().to_string();
    let body = body.into_inner();
    state
        .requests
        .lock()
        .unwrap()
        .push((path.clone(), body.clone()));
    HttpResponse::Ok().json(json!({"accepted": true, "path": path, "echo": body}))
}

async fn fail() -> HttpResponse {
    HttpResponse::ServiceUnavailable().body("overloaded")
}

async fn slow() -> HttpResponse {
    actix_web::rt::time::sleep(Duration::from_secs(3)).await;
    HttpResponse::Ok().body("late")
}

impl MockTokenService {
    pub fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let state = web::Data::new(MockState::default());
        let app_state = state.clone();
        let (tx, rx) = std::sync::mpsc::channel();

        std::thread::spawn(move || {
            actix_web::rt::System::new().block_on(async move {
                let server = HttpServer::new(move || {
                    App::new()
                        .app_data(app_state.clone())
                        .route("/generate", web::post().to(record))
                        .route("/alt/generate", web::post().to(record))
                        .route("/fail", web::post().to(fail))
                        .route("/slow", web::post().to(slow))
                })
                .workers(1)
                .listen(listener)
                .unwrap()
                .run();
                tx.send(server.handle()).unwrap();
                let _ = server.await;
            });
        });

        let handle = rx.recv().unwrap();
        MockTokenService {
            base_url: format!("http://127.0.0.1:{}", port),
            state,
            handle,
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    pub fn requests(&self) -> Vec<(String, Value)> {
        self.state.requests.lock().unwrap().clone()
    }
}

impl Drop for MockTokenService {
    fn drop(&mut self) {
        // The stop command is sent when `stop` is called; the returned future only awaits completion.
        drop(self.handle.stop(false));
    }
}

/// Graph with one `rpc_token_call` node reading `ids` and `url_id` and writing `request_id`.
pub fn token_call_graph(attrs: Value, dtype: DataType) -> ExecutionGraph {
    let mut graph = ExecutionGraph::new();
    graph.add_var("ids", dtype, vec![-1]);
    graph.add_var("url_id", DataType::Int64, vec![1]);
    graph.add_var("request_id", DataType::Int32, vec![5, 5]);
    graph.add_op(
        OpNode::new("call_0", "rpc_token_call")
            .with_input("X", "ids")
            .with_input("url_id", "url_id")
            .with_output("Out", "request_id")
            .with_attrs(attrs),
    );
    graph
}

/// `token_call_graph` followed by an `rpc_result` node writing `body` and `status`.
pub fn call_and_fetch_graph(attrs: Value, dtype: DataType) -> ExecutionGraph {
    let mut graph = token_call_graph(attrs, dtype);
    graph.add_op(
        OpNode::new("fetch_0", "rpc_result")
            .with_input("X", "request_id")
            .with_output("Out", "body")
            .with_output("Status", "status"),
    );
    graph
}
