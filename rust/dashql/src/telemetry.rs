use once_cell::sync::OnceCell;
use tracing_subscriber::{fmt, EnvFilter};

static INIT: OnceCell<()> = OnceCell::new();

/// Installs the global fmt subscriber once; `RUST_LOG` overrides `default_directive`.
pub fn init_tracing_with(default_directive: &str) {
    let _ = INIT.get_or_init(|| {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(default_directive));
        let _ = fmt().with_env_filter(filter).with_target(true).try_init();
    });
}

pub fn init_tracing() {
    init_tracing_with("dashql=info");
}
