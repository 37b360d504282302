//! End-to-end check of the TCP ECDSA challenge-response handshake (scenario
//! S6 from the specification): a fake server sends a fixed-size challenge
//! and verifies the client's signature under the known public key.

use std::io::{BufRead, BufReader, Write};
use std::net::TcpListener;
use std::sync::mpsc;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use p256::ecdsa::signature::Verifier;
use p256::ecdsa::{Signature, VerifyingKey};
use p256::{EncodedPoint, FieldBytes};

use questdb_ilp_client::Sender;

const USERNAME: &str = "testUser1";
const TOKEN: &str = "NgdiOWDoQNUP18WOnb1xkkEG5TzPYMda5SiUOvT1K0U=";
const PUB_X: &str = "Vs4e-cOLsVCntsMrZiAGAZtrkPXO00uoRLuA3d7gEcI";
const PUB_Y: &str = "ANhR2AZSs4ar9urE5AZrJqu469X0r7gZ1BBEdcrAuL_6";

fn verifying_key() -> VerifyingKey {
    let mut x = URL_SAFE_NO_PAD.decode(PUB_X).unwrap();
    let mut y = URL_SAFE_NO_PAD.decode(PUB_Y).unwrap();
    while x.len() < 32 {
        x.insert(0, 0);
    }
    while y.len() < 32 {
        y.insert(0, 0);
    }
    let x_arr = FieldBytes::clone_from_slice(&x);
    let y_arr = FieldBytes::clone_from_slice(&y);
    let point = EncodedPoint::from_affine_coordinates(&x_arr, &y_arr, false);
    VerifyingKey::from_encoded_point(&point).unwrap()
}

#[test]
fn tcp_sender_signs_challenge_with_expected_key() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let port = listener.local_addr().unwrap().port();
    let (tx, rx) = mpsc::channel();

    let server = std::thread::spawn(move || {
        let (stream, _) = listener.accept().unwrap();
        let mut reader = BufReader::new(stream.try_clone().unwrap());
        let mut stream = stream;

        let mut username_line = Vec::new();
        reader.read_until(b'\n', &mut username_line).unwrap();
        assert_eq!(
            String::from_utf8_lossy(&username_line).trim_end(),
            USERNAME
        );

        let challenge = vec![b'x'; 64];
        stream.write_all(&challenge).unwrap();
        stream.write_all(b"\n").unwrap();
        stream.flush().unwrap();

        let mut sig_line = Vec::new();
        reader.read_until(b'\n', &mut sig_line).unwrap();
        if sig_line.last() == Some(&b'\n') {
            sig_line.pop();
        }
        let der = URL_SAFE_NO_PAD.decode(&sig_line).unwrap();
        let signature = Signature::from_der(&der).unwrap();
        let verified = verifying_key().verify(&challenge, &signature).is_ok();
        tx.send(verified).unwrap();

        // keep the connection open briefly so the client's subsequent write
        // (if any) does not race a premature close.
        let mut discard = [0u8; 256];
        use std::io::Read;
        let _ = reader.read(&mut discard);
    });

    let conf = format!(
        "tcp::addr=127.0.0.1:{port};username={USERNAME};token={TOKEN};auto_flush=off;"
    );
    let sender = Sender::from_conf(&conf);
    assert!(sender.is_ok(), "handshake should succeed: {:?}", sender.err());
    drop(sender);

    let verified = rx.recv_timeout(std::time::Duration::from_secs(5)).unwrap();
    assert!(verified, "signature did not verify under the expected public key");
    server.join().unwrap();
}
