#![allow(dead_code)]

use std::{
    fs,
    io::{Read, Write},
    net::TcpListener,
    path::{Path, PathBuf},
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread,
    time::{Duration, Instant},
};

/// Lays out a provider install below `root` and writes `chartsup.yaml` next to it.
///
/// `extra` is appended to the generated YAML. Returns the config file path.
pub fn plugin_tree(root: &Path, script: &str, extra: &str) -> PathBuf {
    for dir in ["lib/opencpn", "bin", "share/opencpn/s57data", "data"] {
        fs::create_dir_all(root.join(dir)).expect("failed to create plugin dir");
    }
    fs::write(root.join("provider.sh"), script).expect("failed to write start script");

    let config_path = root.join("chartsup.yaml");
    fs::write(
        &config_path,
        format!(
            "data_dir: \"{}\"\nconfig_dir: \"$PLUGINDIR/cfg\"\n{extra}",
            root.join("data").display()
        ),
    )
    .expect("failed to write config");
    config_path
}

/// Answers every request on `listener` with a fixed chart list until `stop` is set.
pub fn serve_chart_list(listener: TcpListener, body: &'static str, stop: Arc<AtomicBool>) {
    listener
        .set_nonblocking(true)
        .expect("failed to set listener non-blocking");
    thread::spawn(move || {
        while !stop.load(Ordering::SeqCst) {
            match listener.accept() {
                Ok((mut stream, _)) => {
                    let _ = stream.set_nonblocking(false);
                    let mut buf = [0u8; 2048];
                    let _ = stream.read(&mut buf);
                    let response = format!(
                        "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                        body.len()
                    );
                    let _ = stream.write_all(response.as_bytes());
                }
                Err(_) => thread::sleep(Duration::from_millis(20)),
            }
        }
    });
}

/// Polls `condition` until it holds or `timeout` passes.
pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        thread::sleep(Duration::from_millis(50));
    }
}
