use std::io::Write;

/// Installs the process-wide logger. If a logger is already installed, the
/// existing one is kept and this call does nothing.
pub fn init_logging(level: log::LevelFilter) {
    let installed = env_logger::Builder::new()
        .format(|buf, record| {
            writeln!(
                buf,
                "{} - {} - {}",
                chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
                record.level(),
                record.args()
            )
        })
        .filter(None, level)
        .try_init();
    if let Err(e) = installed {
        log::debug!("Keeping the existing logger: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_init_is_harmless() {
        init_logging(log::LevelFilter::Info);
        init_logging(log::LevelFilter::Debug);
        log::info!("logger still usable");
    }
}
