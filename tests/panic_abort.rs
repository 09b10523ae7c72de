use std::env;
use std::process::Command;

use kestrel_bridge::{BridgeConfig, Diagnostic, DiagnosticsSink, DispatchTarget, MemoryLoader, ScriptRuntime};

const CHILD_ENV: &str = "KESTREL_BRIDGE_PANIC_CHILD";

struct StderrSink;

impl DiagnosticsSink for StderrSink {
    fn report(&self, diagnostic: &Diagnostic) {
        eprintln!("reported: {}", diagnostic.message);
    }
}

fn run_panicking_dispatch() {
    let loader = MemoryLoader::new().with_script("crash.rhai", "fn OnCrash() { explode() } #{}");
    let runtime = ScriptRuntime::builder(BridgeConfig::default())
        .loader(loader)
        .sink(StderrSink)
        .native("explode", 0, |_runtime, _args| panic!("native exploded"))
        .build();
    runtime.register_class("crash.rhai", "Crash").expect("crash class should compile");
    runtime.dispatch(&DispatchTarget::class(0), "OnCrash", &[]);
    eprintln!("dispatch returned after a panic");
}

#[test]
fn panicking_native_aborts_the_process() {
    if env::var_os(CHILD_ENV).is_some() {
        run_panicking_dispatch();
        return;
    }

    let exe = env::current_exe().expect("test binary path");
    let output = Command::new(exe)
        .args(["panicking_native_aborts_the_process", "--exact", "--nocapture", "--test-threads=1"])
        .env(CHILD_ENV, "1")
        .output()
        .expect("spawn child test");
    let stderr = String::from_utf8_lossy(&output.stderr);

    assert!(!output.status.success(), "child should not exit cleanly; stderr:\n{stderr}");
    assert!(
        stderr.contains("reported: fatal panic in script runtime: native exploded"),
        "panic should reach the sink before aborting; stderr:\n{stderr}"
    );
    assert!(!stderr.contains("dispatch returned after a panic"), "dispatch must not return; stderr:\n{stderr}");
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        assert_eq!(output.status.signal(), Some(6), "child should die from SIGABRT; stderr:\n{stderr}");
    }
}
