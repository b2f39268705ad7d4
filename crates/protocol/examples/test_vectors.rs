//! Generate wire test vectors for interop testing against a MiniTel server.
//!
//! Run with: cargo run --package minitel-protocol --example test_vectors

use minitel_protocol::{encode, Command};

fn main() {
    // Test vector 1: the handshake a fresh connection opens with
    print_test_vector("hello", Command::Hello, 0, b"");

    // Test vector 2: server acknowledgement of the handshake
    print_test_vector("hello_ack", Command::HelloAck, 1, b"");

    // Test vector 3: first dump request
    print_test_vector("dump", Command::Dump, 2, b"");

    // Test vector 4: refused dump
    print_test_vector("dump_failed", Command::DumpFailed, 3, b"");

    // Test vector 5: successful dump carrying a secret
    print_test_vector("dump_ok", Command::DumpOk, 5, b"SECRET_CODE_12345");

    // Test vector 6: stop and its acknowledgement
    print_test_vector("stop", Command::Stop, 6, b"");
    print_test_vector("stop_ok", Command::StopOk, 7, b"");
}

fn print_test_vector(name: &str, command: Command, nonce: u32, payload: &[u8]) {
    let wire = encode(command.code(), nonce, payload).expect("test vector must encode");
    println!("// {} ({} nonce={})", name, command, nonce);
    println!("const {}_HEX = \"{}\";", name.to_uppercase(), hex::encode(&wire));
    println!(
        "const {}_ENVELOPE = {:?};",
        name.to_uppercase(),
        String::from_utf8_lossy(&wire[2..])
    );
    println!();
}

