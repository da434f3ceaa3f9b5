//! Canned-response HTTP server for unit tests
//!
//! Routes are keyed by `"METHOD /path?query"`. Unknown routes answer 404
//! with an empty body.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

type Routes = Arc<Mutex<HashMap<String, (u16, String)>>>;
type Hits = Arc<Mutex<Vec<(String, String)>>>;

pub struct CannedServer {
    addr: std::net::SocketAddr,
    routes: Routes,
    hits: Hits,
}

impl CannedServer {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let routes: Routes = Arc::new(Mutex::new(HashMap::new()));
        let hits: Hits = Arc::new(Mutex::new(Vec::new()));

        tokio::spawn({
            let routes = routes.clone();
            let hits = hits.clone();
            async move {
                while let Ok((socket, _)) = listener.accept().await {
                    tokio::spawn(serve(socket, routes.clone(), hits.clone()));
                }
            }
        });

        Self { addr, routes, hits }
    }

    /// API root served by this server
    pub fn base(&self) -> String {
        format!("http://{}/api", self.addr)
    }

    pub fn route(&self, key: &str, status: u16, body: String) {
        self.routes
            .lock()
            .unwrap()
            .insert(key.to_string(), (status, body));
    }

    /// Requests received so far, as (route key, body)
    pub fn hits(&self) -> Vec<(String, String)> {
        self.hits.lock().unwrap().clone()
    }
}

async fn serve(mut socket: TcpStream, routes: Routes, hits: Hits) {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];

    let header_end = loop {
        let n = socket.read(&mut chunk).await.unwrap_or(0);
        if n == 0 {
            return;
        }
        buf.extend_from_slice(&chunk[..n]);
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
    };

    let head = String::from_utf8_lossy(&buf[..header_end]).to_string();
    let content_length = head
        .lines()
        .filter_map(|line| line.split_once(':'))
        .find(|(name, _)| name.trim().eq_ignore_ascii_case("content-length"))
        .and_then(|(_, value)| value.trim().parse::<usize>().ok())
        .unwrap_or(0);

    while buf.len() < header_end + content_length {
        let n = socket.read(&mut chunk).await.unwrap_or(0);
        if n == 0 {
            break;
        }
        buf.extend_from_slice(&chunk[..n]);
    }

    let mut request_line = head.lines().next().unwrap_or_default().split_whitespace();
    let method = request_line.next().unwrap_or_default();
    let target = request_line.next().unwrap_or_default();
    let key = format!("{} {}", method, target);
    let body = String::from_utf8_lossy(&buf[header_end..]).to_string();
    hits.lock().unwrap().push((key.clone(), body));

    let (status, body) = routes
        .lock()
        .unwrap()
        .get(&key)
        .cloned()
        .unwrap_or((404, String::new()));

    let response = format!(
        "HTTP/1.1 {} Canned\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        status,
        body.len(),
        body
    );
    let _ = socket.write_all(response.as_bytes()).await;
    let _ = socket.shutdown().await;
}
