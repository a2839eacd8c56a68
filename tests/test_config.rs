use std::time::Duration;

use wirelink::config::{Config, Mode};

#[test]
fn test_config_defaults() {
    let cfg = Config::default();
    assert_eq!(cfg.server.listen_addr, "127.0.0.1:8080");
    assert_eq!(cfg.server.mode, Mode::Http);
    assert!(cfg.tls.is_none());
    assert_eq!(cfg.tick(), Duration::from_millis(5));
    assert_eq!(cfg.http().default_port, 80);
    assert_eq!(cfg.http().queue_capacity, 1024);
}

#[test]
fn test_config_empty_yaml_is_default() {
    let cfg = Config::from_yaml("").unwrap();
    assert_eq!(cfg.server.listen_addr, "127.0.0.1:8080");
    assert_eq!(cfg.limits.queue_capacity, 1024);
}

#[test]
fn test_config_partial_yaml_keeps_other_defaults() {
    let cfg = Config::from_yaml(
        "server:\n  mode: websocket\n  tick_ms: 20\nlimits:\n  body_capacity: 4096\nwebsocket:\n  protocol: chat\n",
    )
    .unwrap();

    assert_eq!(cfg.server.mode, Mode::Websocket);
    assert_eq!(cfg.server.listen_addr, "127.0.0.1:8080");
    assert_eq!(cfg.tick(), Duration::from_millis(20));
    assert_eq!(cfg.message_limits().body_capacity, 4096);
    assert_eq!(cfg.message_limits().max_headers, 64);

    let ws = cfg.websocket();
    assert_eq!(ws.protocol.as_deref(), Some("chat"));
    assert_eq!(ws.limits.body_capacity, 4096);
}

#[test]
fn test_config_tls_section_switches_default_port() {
    let cfg = Config::from_yaml("tls:\n  cert_path: /etc/wirelink/cert.pem\n  key_path: /etc/wirelink/key.pem\n")
        .unwrap();
    let tls = cfg.tls.as_ref().unwrap();
    assert_eq!(tls.cert_path.to_str(), Some("/etc/wirelink/cert.pem"));
    assert_eq!(cfg.http().default_port, 443);
}

#[test]
fn test_config_zero_tick_is_clamped() {
    let cfg = Config::from_yaml("server:\n  tick_ms: 0\n").unwrap();
    assert_eq!(cfg.tick(), Duration::from_millis(1));
}

#[test]
fn test_config_rejects_unknown_mode() {
    assert!(Config::from_yaml("server:\n  mode: gopher\n").is_err());
}

#[test]
fn test_config_missing_file() {
    let err = Config::from_file(std::path::Path::new("/nonexistent/wirelink.yaml")).unwrap_err();
    assert!(err.to_string().contains("reading config"));
}

// Every test touching the process environment lives here so they do not
// race each other.
#[test]
fn test_config_load_from_environment() {
    let path = std::env::temp_dir().join(format!("wirelink-config-{}.yaml", std::process::id()));
    std::fs::write(&path, "server:\n  listen_addr: 0.0.0.0:9000\n  agent: edge/2\n").unwrap();

    unsafe {
        std::env::remove_var("LISTEN");
        std::env::remove_var("WIRELINK_CONFIG");
    }
    let cfg = Config::load().unwrap();
    assert_eq!(cfg.server.listen_addr, "127.0.0.1:8080");

    unsafe {
        std::env::set_var("WIRELINK_CONFIG", &path);
    }
    let cfg = Config::load().unwrap();
    assert_eq!(cfg.server.listen_addr, "0.0.0.0:9000");
    assert_eq!(cfg.http().agent.as_deref(), Some("edge/2"));

    unsafe {
        std::env::set_var("LISTEN", "127.0.0.1:3000");
    }
    let cfg = Config::load().unwrap();
    assert_eq!(cfg.server.listen_addr, "127.0.0.1:3000");

    unsafe {
        std::env::remove_var("LISTEN");
        std::env::remove_var("WIRELINK_CONFIG");
    }
    std::fs::remove_file(&path).unwrap();
}
