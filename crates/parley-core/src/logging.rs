use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "parley_core=debug,parley_net=debug,parley_store=info,warn";

/// Install the global tracing subscriber (respects `RUST_LOG`).
///
/// Calling it again, or after the embedder installed its own subscriber, is
/// a no-op.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    if tracing_subscriber::fmt().with_env_filter(filter).try_init().is_ok() {
        tracing::info!("Parley core v{} logging initialised", env!("CARGO_PKG_VERSION"));
    }
}
