pub fn init_tracing() {
    // Logging is opt-in. Stdout carries JSON events when `--json` is used,
    // so the subscriber writes to stderr, and only when RUST_LOG (or
    // NXT_LOADER_LOG) asks for it.
    let filter = std::env::var("RUST_LOG").ok();
    let enable = filter.as_deref().is_some_and(|s| !s.trim().is_empty())
        || std::env::var_os("NXT_LOADER_LOG").is_some();
    if !enable {
        return;
    }

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter.unwrap_or_else(|| "info".to_string()))
        .with_target(true)
        .with_writer(std::io::stderr)
        .try_init();
}
