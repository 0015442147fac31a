use std::io::{BufRead, BufReader, Read, Write};
use std::net::TcpListener;
use std::thread::{self, JoinHandle};

use serde_json::{json, Value};

use examkb_core::config::DashScopeSettings;
use examkb_core::error::Error;
use examkb_core::traits::EmbeddingProvider;
use examkb_embed::dashscope::DashScopeProvider;

/// Minimal HTTP/1.1 endpoint: answers `requests` POSTs with `respond(n, body)`,
/// one connection each, and hands back the request bodies and auth headers.
fn serve<F>(requests: usize, respond: F) -> (String, JoinHandle<Vec<(Value, Option<String>)>>)
where
    F: Fn(usize, &Value) -> (u16, Value) + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
    let base_url = format!("http://{}/api/v1", listener.local_addr().expect("addr"));
    let handle = thread::spawn(move || {
        let mut seen = Vec::new();
        for (n, stream) in listener.incoming().take(requests).enumerate() {
            let mut stream = stream.expect("accept");
            let mut reader = BufReader::new(stream.try_clone().expect("clone"));
            let mut content_length = 0;
            let mut auth = None;
            loop {
                let mut line = String::new();
                reader.read_line(&mut line).expect("header line");
                let line = line.trim_end();
                if line.is_empty() {
                    break;
                }
                if let Some((name, value)) = line.split_once(':') {
                    match name.to_ascii_lowercase().as_str() {
                        "content-length" => content_length = value.trim().parse().expect("length"),
                        "authorization" => auth = Some(value.trim().to_string()),
                        _ => {}
                    }
                }
            }
            let mut body = vec![0u8; content_length];
            reader.read_exact(&mut body).expect("body");
            let body: Value = serde_json::from_slice(&body).expect("json body");

            let (status, reply) = respond(n, &body);
            let reply = reply.to_string();
            write!(
                stream,
                "HTTP/1.1 {status} X\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{reply}",
                reply.len()
            )
            .expect("reply");
            seen.push((body, auth));
        }
        seen
    });
    (base_url, handle)
}

fn settings(base_url: String, batch_size: usize) -> DashScopeSettings {
    DashScopeSettings { api_key: Some("sk-test".into()), base_url, dimensions: 2, batch_size, ..Default::default() }
}

/// Embedding for text `t{i}` is `[i, 1]`; entries come back in reverse order.
fn reversed_embeddings(body: &Value) -> Value {
    let texts = body["input"]["texts"].as_array().expect("texts");
    let embeddings: Vec<Value> = texts
        .iter()
        .enumerate()
        .rev()
        .map(|(i, t)| {
            let n: f32 = t.as_str().expect("text").trim_start_matches('t').parse().expect("numbered text");
            json!({"text_index": i, "embedding": [n, 1.0]})
        })
        .collect();
    json!({"output": {"embeddings": embeddings}, "usage": {"total_tokens": texts.len()}})
}

#[test]
fn embed_spans_chunks_and_realigns_each() {
    let (base_url, server) = serve(3, |_, body| (200, reversed_embeddings(body)));
    let provider = DashScopeProvider::new(&settings(base_url, 2)).expect("provider");
    let texts: Vec<String> = (0..5).map(|i| format!("t{i}")).collect();

    let vectors = provider.embed(&texts).expect("embed");
    let expected: Vec<Vec<f32>> = (0..5).map(|i| vec![i as f32, 1.0]).collect();
    assert_eq!(vectors, expected);

    let seen = server.join().expect("server");
    let sizes: Vec<usize> = seen.iter().map(|(b, _)| b["input"]["texts"].as_array().map_or(0, Vec::len)).collect();
    assert_eq!(sizes, vec![2, 2, 1]);
    assert!(seen.iter().all(|(b, auth)| auth.as_deref() == Some("Bearer sk-test") && b["parameters"]["dimension"] == 2));
    assert_eq!(seen[0].0["model"], "text-embedding-v4");
}

#[test]
fn failing_chunk_reports_its_index() {
    let (base_url, server) = serve(2, |n, body| {
        if n == 0 {
            (200, reversed_embeddings(body))
        } else {
            (400, json!({"code": "InvalidParameter", "message": "batch too large"}))
        }
    });
    let provider = DashScopeProvider::new(&settings(base_url, 2)).expect("provider");
    let texts: Vec<String> = (0..4).map(|i| format!("t{i}")).collect();

    match provider.embed(&texts) {
        Err(Error::EmbeddingProvider { provider, chunk, message }) => {
            assert_eq!(provider, "dashscope");
            assert_eq!(chunk, 1);
            assert!(message.contains("InvalidParameter"), "{message}");
        }
        other => panic!("expected provider error, got {other:?}"),
    }
    server.join().expect("server");
}
