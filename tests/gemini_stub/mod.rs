use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use serde_json::Value;

/// How the stub answers schema-constrained structuring requests.
#[allow(dead_code)]
#[derive(Debug, Clone)]
pub enum StructureBehavior {
    /// Return this document as the generated JSON text.
    Contract(Value),
    /// Return text that is not a valid contract document.
    InvalidJson,
    /// Sleep before answering, to trip client-side timeouts.
    Stall(Duration),
    /// Fail with this HTTP status.
    Error(u16),
}

/// How the stub answers function-calling classification requests.
#[allow(dead_code)]
#[derive(Debug, Clone)]
pub enum ClassifyBehavior {
    /// Emit a `functionCall` part with these arguments.
    Call(Value),
    /// Answer with plain text and no function call.
    NoCall,
    /// Sleep before answering, to trip client-side timeouts.
    Stall(Duration),
    /// Fail with this HTTP status.
    Error(u16),
}

#[derive(Debug, Clone)]
pub struct GeminiStubConfig {
    pub structure: StructureBehavior,
    pub classify: ClassifyBehavior,
}

pub struct GeminiStub {
    pub base_url: String,
    /// Request bodies in arrival order, for asserting what the worker sent.
    pub requests: Arc<Mutex<Vec<Value>>>,
    shutdown_tx: Option<mpsc::Sender<()>>,
    handle: Option<thread::JoinHandle<()>>,
}

impl GeminiStub {
    pub fn spawn(config: GeminiStubConfig) -> Self {
        let server = tiny_http::Server::http("127.0.0.1:0").expect("start gemini stub server");
        let addr = server.server_addr();
        let base_url = format!("http://{addr}");

        let requests = Arc::new(Mutex::new(Vec::new()));
        let requests_for_thread = Arc::clone(&requests);
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();

        let handle = thread::spawn(move || {
            loop {
                if shutdown_rx.try_recv().is_ok() {
                    break;
                }

                let mut request = match server.recv_timeout(Duration::from_millis(50)) {
                    Ok(Some(req)) => req,
                    Ok(None) => continue,
                    Err(_) => break,
                };

                let path = request.url().to_string();
                if request.method() != &tiny_http::Method::Post
                    || !path.ends_with(":generateContent")
                {
                    let _ = request.respond(
                        tiny_http::Response::from_string("not found").with_status_code(404),
                    );
                    continue;
                }

                let mut body = String::new();
                if request.as_reader().read_to_string(&mut body).is_err() {
                    let _ = request.respond(
                        tiny_http::Response::from_string("invalid request body")
                            .with_status_code(400),
                    );
                    continue;
                }

                let parsed: Value = match serde_json::from_str(&body) {
                    Ok(value) => value,
                    Err(_) => {
                        let _ = request.respond(
                            tiny_http::Response::from_string("invalid json").with_status_code(400),
                        );
                        continue;
                    }
                };
                requests_for_thread.lock().unwrap().push(parsed.clone());

                // Respond on a separate thread so a stalled response does
                // not block accepting (and recording) later requests, e.g.
                // a client-side retry after a timeout.
                let config = config.clone();
                thread::spawn(move || {
                    // Function-calling requests carry `tools`; structuring
                    // requests carry a response schema instead.
                    let response = if parsed.get("tools").is_some() {
                        match &config.classify {
                            ClassifyBehavior::Call(args) => json_response(function_call_body(args)),
                            ClassifyBehavior::NoCall => json_response(text_body("no risks found")),
                            ClassifyBehavior::Stall(delay) => {
                                thread::sleep(*delay);
                                json_response(text_body("no risks found"))
                            }
                            ClassifyBehavior::Error(status) => error_response(*status),
                        }
                    } else {
                        match &config.structure {
                            StructureBehavior::Contract(doc) => {
                                json_response(text_body(&doc.to_string()))
                            }
                            StructureBehavior::InvalidJson => {
                                json_response(text_body("{\"success\": \"not-a-bool\""))
                            }
                            StructureBehavior::Stall(delay) => {
                                thread::sleep(*delay);
                                json_response(text_body("{}"))
                            }
                            StructureBehavior::Error(status) => error_response(*status),
                        }
                    };

                    let _ = request.respond(response);
                });
            }
        });

        Self {
            base_url,
            requests,
            shutdown_tx: Some(shutdown_tx),
            handle: Some(handle),
        }
    }
}

impl Drop for GeminiStub {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn text_body(text: &str) -> Value {
    serde_json::json!({
        "candidates": [
            { "content": { "parts": [ { "text": text } ] } }
        ]
    })
}

fn function_call_body(args: &Value) -> Value {
    serde_json::json!({
        "candidates": [
            {
                "content": {
                    "parts": [
                        {
                            "functionCall": {
                                "name": "record_contract_risks",
                                "args": args,
                            }
                        }
                    ]
                }
            }
        ]
    })
}

fn json_response(body: Value) -> tiny_http::Response<std::io::Cursor<Vec<u8>>> {
    let header = tiny_http::Header::from_bytes(&b"Content-Type"[..], &b"application/json"[..])
        .expect("build header");
    tiny_http::Response::from_string(body.to_string())
        .with_status_code(200)
        .with_header(header)
}

fn error_response(status: u16) -> tiny_http::Response<std::io::Cursor<Vec<u8>>> {
    tiny_http::Response::from_string(
        serde_json::json!({ "error": { "message": "stub error" } }).to_string(),
    )
    .with_status_code(status)
}
