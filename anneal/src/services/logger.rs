use tracing_subscriber::EnvFilter;

/// Default filter when `RUST_LOG` is unset
pub fn default_directives() -> &'static str {
    if cfg!(debug_assertions) {
        // Debug build: debug logs for our crate, info for others
        "anneal_lib=debug,info"
    } else {
        "info"
    }
}

/// Install the global tracing subscriber. Called once by the binary; the
/// library itself never installs one. Logs go to stderr so command output
/// on stdout stays clean.
pub fn init() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directives()));

    // A subscriber may already be set (tests, embedding); keep it
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

pub fn fmt_ms(d: std::time::Duration) -> String {
    let ms = d.as_millis();
    if ms == 0 {
        "<1ms".into()
    } else {
        format!("{}ms", ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_fmt_ms() {
        assert_eq!(fmt_ms(Duration::from_micros(300)), "<1ms");
        assert_eq!(fmt_ms(Duration::from_millis(1250)), "1250ms");
    }

    #[test]
    fn test_default_directives_parse() {
        assert!(EnvFilter::try_new(default_directives()).is_ok());
    }

    #[test]
    fn test_init_twice_is_harmless() {
        init();
        init();
    }
}
