pub mod retry;

use anyhow::{Context, Result};
use std::{env, path::Path};
use tracing::info;

use crate::models::common::Config;

const ENV_PREFIX: &str = "INDEXER";

/// Loads `Config` from an optional YAML file, then `INDEXER__<SECTION>__<KEY>`
/// environment variables, then the flat variables older deployments set
/// (`WEB3_WEBSOCKET_URL`, `CONTRACT_ADDRESS`, `MONGODB_URI`, `PORT`).
pub fn load_config<P: AsRef<Path>>(file_name: P) -> Result<Config> {
    let config_path = file_name.as_ref();
    info!("Config path: {}", config_path.to_string_lossy());

    let settings = config::Config::builder()
        .add_source(config::File::from(config_path).required(false))
        .add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .separator("__")
                .try_parsing(true),
        )
        .set_override_option("listener.ws_url", env::var("WEB3_WEBSOCKET_URL").ok())?
        .set_override_option("listener.contract_address", env::var("CONTRACT_ADDRESS").ok())?
        .set_override_option("storage.mongodb_uri", env::var("MONGODB_URI").ok())?
        .set_override_option("server.port", env::var("PORT").ok())?
        .build()
        .context("failed to read config")?;

    let config: Config = settings
        .try_deserialize()
        .context("failed to parse config")?;

    Ok(config)
}

pub(crate) fn strip_html(error: &str) -> String {
    // WebSocket handshakes against a misconfigured gateway come back as HTML pages
    if error.contains("<!doctype html>") || error.contains("<html>") {
        // Remove all HTML tags and return the first non-empty line of text
        error
            .lines()
            .map(|line| line.trim())
            .find(|line| {
                !line.starts_with('<')
                    && !line.ends_with('>')
                    && !line.is_empty()
                    && !line.starts_with("<!")
                    && *line != "html"
                    && *line != "body"
            })
            .unwrap_or(error)
            .to_string()
    } else {
        // Return original error if no HTML
        error.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_strip_html_extracts_text() {
        let page = "<!doctype html>\n<html>\n<body>\n502 Bad Gateway\n</body>\n</html>";
        assert_eq!(strip_html(page), "502 Bad Gateway");
        assert_eq!(strip_html("connection refused"), "connection refused");
    }

    #[test]
    fn test_load_config_from_yaml() {
        let dir = env::temp_dir().join(format!("order-event-indexer-{}", fastrand::u64(..)));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config.yml");
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(
            file,
            "listener:\n  contract_address: \"0x1111111111111111111111111111111111111111\"\n  restart_cooldown_secs: 7\nretry:\n  capacity: 50\ndecoder:\n  version: 2\n  amount_topic: 3"
        )
        .unwrap();

        let config = load_config(&path).unwrap();

        assert_eq!(
            config.listener.contract_address.as_deref(),
            Some("0x1111111111111111111111111111111111111111")
        );
        assert_eq!(config.listener.restart_cooldown_secs, 7);
        assert_eq!(config.retry.capacity, 50);
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.decoder.version, 2);
        assert_eq!(config.health.stale_after_secs, 300);
        assert_eq!(config.storage.collection, "transactions");

        std::fs::remove_dir_all(&dir).unwrap();
    }
}
