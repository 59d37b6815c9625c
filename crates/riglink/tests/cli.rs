#![cfg(all(unix, feature = "cli"))]

use std::io::Read;
use std::net::TcpListener;
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use riglink::frame::{FrameLayout, SlotFormat};
use riglink::record::{Recorder, RecorderConfig};

fn unique_temp_dir(tag: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!(
        "riglink-cli-{tag}-{}-{}",
        std::process::id(),
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .expect("time should be after epoch")
            .as_nanos()
    ));
    std::fs::create_dir_all(&dir).expect("temp dir should be creatable");
    dir
}

fn free_port() -> u16 {
    TcpListener::bind("127.0.0.1:0")
        .expect("ephemeral bind should succeed")
        .local_addr()
        .expect("local addr")
        .port()
}

fn riglink() -> Command {
    let mut command = Command::new(env!("CARGO_BIN_EXE_riglink"));
    command.arg("--log-level").arg("error");
    command
}

fn wait_with_deadline(child: &mut Child, timeout: Duration) -> std::process::ExitStatus {
    let start = Instant::now();
    loop {
        if let Some(status) = child.try_wait().expect("child status should be readable") {
            return status;
        }
        if start.elapsed() >= timeout {
            let _ = child.kill();
            panic!("child did not exit within {timeout:?}");
        }
        thread::sleep(Duration::from_millis(25));
    }
}

#[test]
fn version_prints_package_version() {
    let output = riglink()
        .arg("version")
        .output()
        .expect("version command should run");
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert_eq!(stdout.trim(), format!("riglink {}", env!("CARGO_PKG_VERSION")));
}

#[test]
fn dump_prints_recorded_frames_as_json() {
    let dir = unique_temp_dir("dump");
    let layout = FrameLayout::new(3, SlotFormat::I8);
    let path = {
        let recorder = Recorder::create(RecorderConfig::new(&dir).with_capacity(10), layout)
            .expect("recorder should open");
        for values in [[0.0, 0.5, -1.0], [1.0, 0.0, 0.25]] {
            let frame = layout
                .encode_to_vec(&values, None)
                .expect("frame should encode");
            recorder.append(&frame).expect("frame should buffer");
        }
        recorder.path().to_path_buf()
    };

    let output = riglink()
        .arg("dump")
        .arg(&path)
        .args(["--slots", "3", "--format", "json"])
        .output()
        .expect("dump command should run");
    assert!(output.status.success(), "{output:?}");

    let stdout = String::from_utf8_lossy(&output.stdout);
    let lines: Vec<&str> = stdout.lines().collect();
    assert_eq!(lines.len(), 2, "{stdout}");
    for line in &lines {
        let record: serde_json::Value = serde_json::from_str(line).expect("line should be JSON");
        assert_eq!(record["checksum_ok"], true);
        assert_eq!(record["values"].as_array().map(Vec::len), Some(3));
    }

    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn dump_rejects_truncated_file() {
    let dir = unique_temp_dir("truncated");
    let path = dir.join("broken.bin");
    // One full 3-slot record (8 + 3 + 1 bytes) plus two stray bytes.
    std::fs::write(&path, [0u8; 14]).expect("file should be writable");

    let output = riglink()
        .arg("dump")
        .arg(&path)
        .args(["--slots", "3", "--format", "json"])
        .output()
        .expect("dump command should run");
    assert_eq!(output.status.code(), Some(60));
    assert!(String::from_utf8_lossy(&output.stderr).contains("truncated"));

    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn dump_rejects_invalid_scale() {
    let dir = unique_temp_dir("scale");
    let path = dir.join("rec.bin");
    std::fs::write(&path, [0u8; 12]).expect("file should be writable");

    for scale in ["0", "1000"] {
        let output = riglink()
            .arg("dump")
            .arg(&path)
            .args(["--slots", "3", "--scale", scale, "--format", "json"])
            .output()
            .expect("dump command should run");
        assert_eq!(output.status.code(), Some(64), "scale {scale}: {output:?}");
        assert!(String::from_utf8_lossy(&output.stderr).contains("invalid frame settings"));
        assert!(output.stdout.is_empty());
    }

    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn serve_and_drive_exchange_vectors() {
    let addr = format!("127.0.0.1:{}", free_port());

    let mut server = riglink()
        .args(["serve", &addr])
        .args(["--inputs", "4", "--outputs", "2", "--rate", "50"])
        .args(["--print-every", "1", "--count", "3", "--format", "json"])
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("serve command should start");

    let client = riglink()
        .args(["drive", &addr])
        .args(["--inputs", "2", "--outputs", "4", "--rate", "50"])
        .args(["--retry-interval", "100ms", "--max-attempts", "50"])
        .args(["--ticks", "100", "--print-every", "0", "--no-reconnect"])
        .args(["--format", "json"])
        .output()
        .expect("drive command should run");
    assert!(client.status.success(), "{client:?}");

    let status = wait_with_deadline(&mut server, Duration::from_secs(10));
    assert!(status.success());

    let mut stdout = String::new();
    server
        .stdout
        .take()
        .expect("stdout should be piped")
        .read_to_string(&mut stdout)
        .expect("stdout should be readable");

    let events: Vec<serde_json::Value> = stdout
        .lines()
        .map(|line| serde_json::from_str(line).expect("line should be JSON"))
        .collect();
    assert_eq!(events[0]["event"], "connected");
    assert_eq!(events[0]["id"], 0);
    let vectors: Vec<_> = events.iter().filter(|e| e["event"] == "vector").collect();
    assert_eq!(vectors.len(), 3, "{stdout}");
    for vector in vectors {
        assert_eq!(vector["values"].as_array().map(Vec::len), Some(4));
    }
    assert_eq!(events.last().expect("stats line")["event"], "stats");
}

#[test]
fn drive_reports_refused_connection() {
    let addr = format!("127.0.0.1:{}", free_port());
    let output = riglink()
        .args(["drive", &addr])
        .args(["--retry-interval", "10ms", "--max-attempts", "2"])
        .output()
        .expect("drive command should run");
    assert_eq!(output.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&output.stderr).contains("connect failed"));
}
