//! End-to-end check of the HTTP retry policy (scenario S5): a fake server
//! answers the first attempt with a retriable 503, then a second attempt
//! with 204, and the client's single `flush()` call should transparently
//! retry and succeed.

use std::io::{BufRead, BufReader, Read, Write};
use std::net::TcpListener;

use questdb_ilp_client::{Sender, TimestampNanos};

fn read_request_body(stream: &std::net::TcpStream) -> Vec<u8> {
    let mut reader = BufReader::new(stream);
    let mut content_length = 0usize;
    loop {
        let mut line = String::new();
        reader.read_line(&mut line).unwrap();
        if line == "\r\n" || line.is_empty() {
            break;
        }
        let lower = line.to_ascii_lowercase();
        if let Some(rest) = lower.strip_prefix("content-length:") {
            content_length = rest.trim().parse().unwrap_or(0);
        }
    }
    let mut body = vec![0u8; content_length];
    reader.read_exact(&mut body).unwrap();
    body
}

#[test]
fn http_sender_retries_retriable_status_then_succeeds() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();

    let server = std::thread::spawn(move || {
        let mut bodies = Vec::new();

        let (stream, _) = listener.accept().unwrap();
        let body = read_request_body(&stream);
        bodies.push(body);
        let mut stream = stream;
        stream
            .write_all(b"HTTP/1.1 503 Service Unavailable\r\ncontent-length: 0\r\n\r\n")
            .unwrap();
        stream.flush().unwrap();
        drop(stream);

        let (stream, _) = listener.accept().unwrap();
        let body = read_request_body(&stream);
        bodies.push(body);
        let mut stream = stream;
        stream
            .write_all(b"HTTP/1.1 204 No Content\r\ncontent-length: 0\r\n\r\n")
            .unwrap();
        stream.flush().unwrap();

        bodies
    });

    let conf = format!(
        "http::addr=127.0.0.1:{port};auto_flush=off;retry_timeout=5000;request_timeout=2000;"
    );
    let mut sender = Sender::from_conf(&conf).unwrap();
    sender
        .buffer()
        .table("trades")
        .unwrap()
        .column_i64("qty", 1)
        .unwrap();
    sender.buffer().at(TimestampNanos::new(1)).unwrap();

    sender.flush().unwrap();

    let bodies = server.join().unwrap();
    assert_eq!(bodies.len(), 2);
    assert_eq!(bodies[0], b"trades qty=1i 1\n");
    assert_eq!(bodies[0], bodies[1], "retry should replay the same body");
}
