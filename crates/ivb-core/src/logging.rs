use crate::Result;

/// Initialize tracing for a binary.
///
/// Defaults to `info` for the workspace crates; `RUST_LOG` overrides it.
pub fn init(service_name: &str) -> Result<()> {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "warn,ivb=info,ivb_core=info,ivb_http=info,ivb_store=info,ivb_telegram=info,{}=info",
            service_name.replace('-', "_")
        ))
    });

    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_ansi(true)
        .try_init()
        .map_err(|e| crate::Error::Config(format!("logging already initialized: {e}")))?;

    Ok(())
}
