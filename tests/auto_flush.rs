//! Confirms that `Sender::at_now()` (not a manual `flush()`) is what drives
//! a row over the wire once the row-count threshold is reached: the
//! row-builder chain on `Sender` must check the auto-flush thresholds
//! itself, since rows built directly on the raw `Buffer` have no way back
//! to the sender that owns the transport.

use std::io::{BufRead, BufReader, Read, Write};
use std::net::TcpListener;

use questdb_ilp_client::Sender;

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
fn at_now_triggers_flush_once_row_count_threshold_is_reached() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();

    let server = std::thread::spawn(move || {
        let (stream, _) = listener.accept().unwrap();
        let body = read_request_body(&stream);
        let mut stream = stream;
        stream
            .write_all(b"HTTP/1.1 204 No Content\r\ncontent-length: 0\r\n\r\n")
            .unwrap();
        stream.flush().unwrap();
        body
    });

    let conf = format!("http::addr=127.0.0.1:{port};auto_flush_rows=1;auto_flush_bytes=0;");
    let mut sender = Sender::from_conf(&conf).unwrap();

    // No explicit flush() call below: the server only ever sees the row if
    // at_now() itself checks the row-count threshold and sends.
    sender
        .table("trades")
        .unwrap()
        .column_i64("qty", 1)
        .unwrap()
        .at_now()
        .unwrap();

    let body = server.join().unwrap();
    assert_eq!(body, b"trades qty=1i\n");
    assert_eq!(sender.buffer().len(), 0, "buffer should be cleared by the auto-flush");
}
