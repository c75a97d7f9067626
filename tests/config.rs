use printwatch::config::load_config;

#[test]
fn test_sample_config_loads() {
    let path = concat!(env!("CARGO_MANIFEST_DIR"), "/printwatch.toml");
    let config = tokio_test::assert_ok!(load_config(path));
    assert_eq!(config.monitor.piece_type("ZD2C72~1.GCO"), Some("RETANGULO"));
    assert_eq!(config.channels.response_timeout_ms, 10_000);
    assert_eq!(config.web.bind, "0.0.0.0:5000");
    assert_eq!(config.monitor.start_time_offset().unwrap().local_minus_utc(), 3600);
}
