#![cfg(feature = "cli")]

use std::net::UdpSocket;
use std::path::PathBuf;
use std::process::{Command, Output};
use std::thread;
use std::time::Duration;

use mvlc::command::{decode_super, SuperCommand};
use mvlc::frame::word::{to_words, words_to_bytes};
use mvlc::frame::{FrameHeader, FrameType, PayloadHeaderInfo};

fn unique_temp_dir(tag: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!(
        "mvlc-cli-{tag}-{}-{}",
        std::process::id(),
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .expect("time should be after epoch")
            .as_nanos()
    ));
    std::fs::create_dir_all(&dir).expect("temp dir should be creatable");
    dir
}

fn mvlc(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_mvlc"))
        .args(["--log-level", "error"])
        .args(args)
        .output()
        .expect("mvlc should run")
}

fn stdout_json(output: &Output) -> serde_json::Value {
    serde_json::from_slice(&output.stdout).expect("stdout should be JSON")
}

#[test]
fn decode_describes_frame_headers() {
    let output = mvlc(&["--format", "json", "decode", "0xf3000004", "fa004005"]);
    assert!(output.status.success());

    let json = stdout_json(&output);
    let described = json.as_array().expect("array of words");
    assert_eq!(described.len(), 2);
    assert!(described[0]["description"]
        .as_str()
        .unwrap()
        .starts_with("StackFrame (0xf3)"));
    assert!(described[1]["description"]
        .as_str()
        .unwrap()
        .contains("BeginRun"));
}

#[test]
fn decode_eth_needs_two_words() {
    let output = mvlc(&["decode", "--eth", "0x00000001"]);
    assert_eq!(output.status.code(), Some(64));
}

#[test]
fn encode_reports_bad_lines_with_exit_60() {
    let dir = unique_temp_dir("encode-bad");
    let file = dir.join("commands.txt");
    std::fs::write(&file, "read_local 0x6008\nfrobnicate 1\n").unwrap();

    let output = mvlc(&["encode", file.to_str().unwrap()]);
    assert_eq!(output.status.code(), Some(60));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("line 2"));

    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn encode_stack_outputs_words() {
    let dir = unique_temp_dir("encode-stack");
    let file = dir.join("stack.txt");
    std::fs::write(
        &file,
        "# module 0\nwrite_marker 0xaffe0000\nvme_read 0x6008 amod=a32 width=d16\n",
    )
    .unwrap();

    let output = mvlc(&["--format", "json", "encode", file.to_str().unwrap(), "--stack"]);
    assert!(output.status.success());
    let json = stdout_json(&output);
    assert_eq!(json["kind"], "stack");
    assert_eq!(json["commands"], 2);
    // start + marker(2) + read(2) + end
    assert_eq!(json["words"].as_array().unwrap().len(), 6);

    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn replay_counts_events_from_capture() {
    let dir = unique_temp_dir("replay");
    let config = dir.join("readout.json");
    std::fs::write(
        &config,
        r#"{"stacks":[{"name":"event0","groups":[{"name":"scaler","commands":["vme_read 0x6030 amod=a32 width=d32"]}]}]}"#,
    )
    .unwrap();

    let mut words = Vec::new();
    for i in 0..5u32 {
        words.push(FrameHeader::new(FrameType::StackFrame, 1, 1).encode());
        words.push(i);
    }
    let capture = dir.join("capture.bin");
    std::fs::write(&capture, words_to_bytes(&words)).unwrap();

    let output = mvlc(&[
        "--format",
        "json",
        "replay",
        capture.to_str().unwrap(),
        "--config",
        config.to_str().unwrap(),
    ]);
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));

    let json = stdout_json(&output);
    assert_eq!(json["connection"], "usb");
    assert_eq!(json["reader"]["bytes_read"], words.len() * 4);
    assert_eq!(json["events"]["events"][0]["hits"], 5);
    assert_eq!(json["parser"]["unused_bytes"], 0);

    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn replay_with_small_buffer_reads_whole_capture() {
    let dir = unique_temp_dir("replay-small");
    let mut words = Vec::new();
    for i in 0..3000u32 {
        words.push(FrameHeader::new(FrameType::StackFrame, 1, 2).encode());
        words.extend([i, i + 1]);
    }
    let capture = dir.join("capture.bin");
    std::fs::write(&capture, words_to_bytes(&words)).unwrap();

    let output = mvlc(&[
        "--format",
        "json",
        "replay",
        capture.to_str().unwrap(),
        "--buffer-size",
        "4096",
    ]);
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));
    let json = stdout_json(&output);
    assert_eq!(json["reader"]["bytes_read"], words.len() * 4);
    assert!(json["reader"]["buffers"].as_u64().unwrap() > 1);
    assert_eq!(json["reader"]["residue_bytes"], 0);

    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn replay_eth_buffer_must_hold_a_datagram() {
    let dir = unique_temp_dir("replay-eth-small");
    let capture = dir.join("capture.bin");
    std::fs::write(&capture, []).unwrap();

    let output = mvlc(&[
        "replay",
        capture.to_str().unwrap(),
        "--connection",
        "eth",
        "--buffer-size",
        "4096",
    ]);
    assert_eq!(output.status.code(), Some(64));

    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn replay_missing_config_is_usage_error() {
    let dir = unique_temp_dir("replay-missing");
    let capture = dir.join("capture.bin");
    std::fs::write(&capture, []).unwrap();

    let output = mvlc(&[
        "replay",
        capture.to_str().unwrap(),
        "--config",
        dir.join("missing.json").to_str().unwrap(),
    ]);
    assert_eq!(output.status.code(), Some(64));

    let _ = std::fs::remove_dir_all(&dir);
}

/// Answers one super command request with its mirror, the way the
/// controller does over Ethernet.
fn fake_controller(register_value: u32) -> (u16, thread::JoinHandle<()>) {
    let socket = UdpSocket::bind("127.0.0.1:0").expect("bind fake controller");
    let port = socket.local_addr().unwrap().port();
    let handle = thread::spawn(move || {
        socket
            .set_read_timeout(Some(Duration::from_secs(5)))
            .unwrap();
        let mut buf = [0u8; 9000];
        let (n, peer) = socket.recv_from(&mut buf).expect("request datagram");
        let commands = decode_super(&to_words(&buf[..n])).expect("valid super buffer");

        let mut mirror = Vec::new();
        for cmd in &commands {
            cmd.encode_into(&mut mirror);
            if let SuperCommand::ReadLocal { .. } = cmd {
                mirror.push(register_value);
            }
        }
        let header = FrameHeader::new(FrameType::SuperFrame, 0, mirror.len() as u16).encode();
        let info = PayloadHeaderInfo::compose(0, 0, 0, mirror.len() as u16 + 1, 0, Some(0));
        let mut datagram = vec![info.header0, info.header1, header];
        datagram.extend(mirror);
        socket
            .send_to(&words_to_bytes(&datagram), peer)
            .expect("send response");
    });
    (port, handle)
}

#[test]
fn register_read_against_fake_controller() {
    let (port, controller) = fake_controller(0x5008);
    let port = port.to_string();

    let output = mvlc(&[
        "--format",
        "json",
        "register",
        "127.0.0.1",
        "0x6008",
        "--port",
        &port,
        "--timeout",
        "1s",
    ]);
    controller.join().unwrap();
    assert!(output.status.success(), "{}", String::from_utf8_lossy(&output.stderr));

    let json = stdout_json(&output);
    assert_eq!(json["address"], "0x6008");
    assert_eq!(json["value"], "0x00005008");
    assert_eq!(json["written"], false);
}

#[test]
fn silent_controller_times_out_with_124() {
    let socket = UdpSocket::bind("127.0.0.1:0").unwrap();
    let port = socket.local_addr().unwrap().port().to_string();

    let output = mvlc(&[
        "register",
        "127.0.0.1",
        "0x6008",
        "--port",
        &port,
        "--timeout",
        "100ms",
    ]);
    assert_eq!(output.status.code(), Some(124));
    drop(socket);
}

#[test]
fn version_prints_package_version() {
    let output = mvlc(&["version"]);
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert_eq!(stdout.trim(), format!("mvlc {}", env!("CARGO_PKG_VERSION")));
}
