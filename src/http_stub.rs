//! Local HTTP/1.1 server for exercising the network adapters in tests.
//!
//! Each request is answered by a caller-supplied function and counted under
//! a key, usually the JSON-RPC method or the explorer `action` parameter.

use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

#[derive(Debug, Clone)]
pub(crate) struct StubRequest {
    pub method: String,
    pub target: String,
    pub body: String,
}

impl StubRequest {
    /// JSON-RPC method and id of the request body.
    pub fn rpc_call(&self) -> (String, Value) {
        let parsed: Value = serde_json::from_str(&self.body).unwrap_or(Value::Null);
        let method = parsed["method"].as_str().unwrap_or_default().to_string();
        (method, parsed["id"].clone())
    }

    /// A form or query-string parameter.
    pub fn param(&self, name: &str) -> Option<String> {
        let query = self.target.split_once('?').map(|(_, q)| q).unwrap_or("");
        query
            .split('&')
            .chain(self.body.split('&'))
            .filter_map(|pair| pair.split_once('='))
            .find(|(key, _)| *key == name)
            .map(|(_, value)| value.to_string())
    }
}

#[derive(Debug, Clone)]
pub(crate) struct StubResponse {
    pub status: u16,
    pub body: String,
}

impl StubResponse {
    pub fn json(body: Value) -> Self {
        Self {
            status: 200,
            body: body.to_string(),
        }
    }

    pub fn status(status: u16) -> Self {
        Self {
            status,
            body: String::new(),
        }
    }

    pub fn rpc_result(request: &StubRequest, result: Value) -> Self {
        let (_, id) = request.rpc_call();
        Self::json(json!({ "jsonrpc": "2.0", "id": id, "result": result }))
    }

    pub fn rpc_error(request: &StubRequest, code: i64, message: &str) -> Self {
        let (_, id) = request.rpc_call();
        Self::json(json!({
            "jsonrpc": "2.0",
            "id": id,
            "error": { "code": code, "message": message },
        }))
    }
}

type Hits = Arc<Mutex<HashMap<String, usize>>>;

pub(crate) struct StubServer {
    pub url: String,
    hits: Hits,
}

impl StubServer {
    /// Start serving on an ephemeral port. `respond` receives the request's
    /// key, how many times that key has been seen (starting at 1) and the
    /// request itself.
    pub async fn start<K, F>(key: K, respond: F) -> Self
    where
        K: Fn(&StubRequest) -> String + Send + Sync + 'static,
        F: Fn(&str, usize, &StubRequest) -> StubResponse + Send + Sync + 'static,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());
        let hits: Hits = Arc::new(Mutex::new(HashMap::new()));
        let handlers = Arc::new((key, respond));

        let counter = hits.clone();
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let handlers = handlers.clone();
                let counter = counter.clone();
                tokio::spawn(async move {
                    let _ = serve(stream, &handlers.0, &handlers.1, &counter).await;
                });
            }
        });

        Self { url, hits }
    }

    /// Stub keyed by JSON-RPC method.
    pub async fn rpc<F>(respond: F) -> Self
    where
        F: Fn(&str, usize, &StubRequest) -> StubResponse + Send + Sync + 'static,
    {
        Self::start(|req: &StubRequest| req.rpc_call().0, respond).await
    }

    pub fn hits(&self, key: &str) -> usize {
        self.hits.lock().unwrap().get(key).copied().unwrap_or(0)
    }
}

async fn serve<K, F>(mut stream: TcpStream, key: &K, respond: &F, hits: &Hits) -> std::io::Result<()>
where
    K: Fn(&StubRequest) -> String,
    F: Fn(&str, usize, &StubRequest) -> StubResponse,
{
    let request = read_request(&mut stream).await?;
    let key = key(&request);
    let nth = {
        let mut hits = hits.lock().unwrap();
        let count = hits.entry(key.clone()).or_insert(0);
        *count += 1;
        *count
    };
    let response = respond(&key, nth, &request);

    let reason = if response.status == 200 { "OK" } else { "Error" };
    let head = format!(
        "HTTP/1.1 {} {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        response.status,
        reason,
        response.body.len()
    );
    stream.write_all(head.as_bytes()).await?;
    stream.write_all(response.body.as_bytes()).await?;
    stream.shutdown().await
}

async fn read_request(stream: &mut TcpStream) -> std::io::Result<StubRequest> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];

    let header_end = loop {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            return Err(std::io::ErrorKind::UnexpectedEof.into());
        }
        buf.extend_from_slice(&chunk[..n]);
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
    };

    let head = String::from_utf8_lossy(&buf[..header_end]).to_string();
    let mut lines = head.lines();
    let mut request_line = lines.next().unwrap_or_default().split_whitespace();
    let method = request_line.next().unwrap_or_default().to_string();
    let target = request_line.next().unwrap_or_default().to_string();
    let content_length = lines
        .filter_map(|line| line.split_once(':'))
        .find(|(name, _)| name.trim().eq_ignore_ascii_case("content-length"))
        .and_then(|(_, value)| value.trim().parse::<usize>().ok())
        .unwrap_or(0);

    while buf.len() < header_end + content_length {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
    }
    let end = buf.len().min(header_end + content_length);
    let body = String::from_utf8_lossy(&buf[header_end..end]).to_string();

    Ok(StubRequest {
        method,
        target,
        body,
    })
}
