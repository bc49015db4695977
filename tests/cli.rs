//! Process-level behaviour of the `service-bootstrap` binary.

use std::net::TcpListener;
use std::process::{Command, Output};

const CONFIG_EXIT_CODE: i32 = 99;

fn free_port() -> u16 {
    TcpListener::bind("127.0.0.1:0")
        .unwrap()
        .local_addr()
        .unwrap()
        .port()
}

fn run_binary(vars: &[(&str, &str)]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_service-bootstrap"))
        .env_clear()
        .env("CONFIG_FILE", "/nonexistent/service-bootstrap/config.toml")
        .env("RUST_LOG", "info")
        .envs(vars.iter().copied())
        .output()
        .expect("binary should start")
}

#[test]
fn non_numeric_port_exits_with_config_code() {
    let output = run_binary(&[("HOST", "127.0.0.1"), ("PORT", "not-a-number")]);

    assert_eq!(output.status.code(), Some(CONFIG_EXIT_CODE));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("Configuration load failed"), "{stdout}");
    assert!(stdout.contains("PORT"), "{stdout}");
    assert!(!stdout.contains("Listener bound"), "{stdout}");
}

#[test]
fn failed_validation_never_binds_the_listener() {
    let port = free_port();
    let output = run_binary(&[
        ("HOST", "127.0.0.1"),
        ("PORT", &port.to_string()),
        ("RUN_MODE", "staging"),
    ]);

    assert_eq!(output.status.code(), Some(CONFIG_EXIT_CODE));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(!stdout.contains("Listener bound"), "{stdout}");
    // the port is still free
    TcpListener::bind(("127.0.0.1", port)).expect("port should not have been taken");
}
