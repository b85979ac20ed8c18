#[path = "common/mod.rs"]
mod common;

use std::{
    net::TcpListener,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread,
    time::Duration,
};

use chartsup::{
    config::load_config,
    environ,
    status::{FanOut, LogReporter, ProviderStatus, StatusFile},
    supervisor::{Supervisor, SupervisorState},
};
use common::{plugin_tree, serve_chart_list, wait_until};
use nix::{
    sys::signal::{Signal, kill},
    unistd::Pid,
};
use tempfile::tempdir;

const CHART_LIST: &str =
    r#"{"status":"OK","items":[{"name":"demo","url":"http://localhost:8082/charts/demo"}]}"#;

#[cfg(target_os = "linux")]
#[test]
fn launches_provider_and_connects() {
    let temp = tempdir().expect("failed to create tempdir");
    let root = temp.path();

    let listener = TcpListener::bind("127.0.0.1:0").expect("failed to bind listener");
    let port = listener.local_addr().expect("no local addr").port();
    let stop = Arc::new(AtomicBool::new(false));
    serve_chart_list(listener, CHART_LIST, Arc::clone(&stop));

    let config_path = plugin_tree(
        root,
        "exec sleep 30\n",
        &format!(
            "port: {port}\npoll_interval: 50ms\nsettle_delay: 100ms\nprobe_timeout: 2s\n"
        ),
    );
    let config = load_config(Some(config_path.to_str().expect("utf-8 path")))
        .expect("failed to load config");
    let resolved = config.resolve().expect("failed to resolve config");

    let reporter = FanOut::new()
        .with(LogReporter)
        .with(StatusFile::in_dir(&resolved.config_dir));
    let mut supervisor =
        Supervisor::from_config(&resolved, Box::new(reporter)).expect("failed to build supervisor");
    let shutdown = supervisor.shutdown_handle();
    let charts = supervisor.charts();
    let tag = supervisor.tag().clone();

    let runner = thread::spawn(move || {
        let result = supervisor.run();
        (supervisor, result)
    });

    assert!(
        wait_until(Duration::from_secs(10), || charts.snapshot().is_some()),
        "supervisor never received a chart list"
    );
    let listed = charts.list_charts("192.168.1.5");
    assert_eq!(listed[0]["url"], "http://192.168.1.5:8082/charts/demo");

    shutdown.store(true, Ordering::SeqCst);
    let (supervisor, result) = runner.join().expect("supervisor thread panicked");
    stop.store(true, Ordering::SeqCst);
    result.expect("supervision failed");

    assert_eq!(supervisor.state(), SupervisorState::Connected);
    let pid = supervisor.provider_pid().expect("no provider pid");
    assert_eq!(
        environ::resolve_tag(pid).as_deref(),
        Some(tag.as_str()),
        "launched provider carries the ownership tag"
    );

    let record = StatusFile::in_dir(&resolved.config_dir)
        .read()
        .expect("failed to read status file")
        .expect("no status written");
    assert_eq!(record.status, ProviderStatus::Nmea);
    assert!(record.detail.contains(&format!("provider ({pid}) successfully connected")));

    // Shutdown leaves the provider running; clean it up here.
    let _ = kill(Pid::from_raw(pid as i32), Signal::SIGKILL);
}
