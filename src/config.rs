// Конфигурация приложения
// Логирование можно отключить только в режиме разработки

use crate::error::{CallError, Result};
use crate::peer::types::ServerConfig;
use log::info;
use once_cell::sync::Lazy;
use serde::Deserialize;
use std::path::Path;

#[cfg(debug_assertions)]
pub const LOGGING_ENABLED: bool = true; // В режиме отладки логирование включено

#[cfg(not(debug_assertions))]
pub const LOGGING_ENABLED: bool = false; // В продакшене по умолчанию только warn

// Дополнительные настройки для режима разработки
#[cfg(debug_assertions)]
pub mod dev {
    // Для полного отключения логирования в режиме разработки
    // измените эту константу на false
    pub const ENABLE_LOGGING: bool = true;
}

pub const DEFAULT_SIGNALING_URL: &str = "ws://127.0.0.1:8888";

pub static DEFAULT_ICE_SERVERS: Lazy<Vec<ServerConfig>> = Lazy::new(|| {
    vec![ServerConfig {
        id: "default-stun".into(),
        r#type: "stun".into(),
        url: "stun:stun.l.google.com:19302".into(),
        username: None,
        credential: None,
    }]
});

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Config {
    pub signaling_url: String,
    pub ice_servers: Vec<ServerConfig>,
    /// Кому звонить сразу после подключения; при `None` ждём входящий offer
    pub remote_peer: Option<String>,
    /// Не проверять TLS сертификат relay (самоподписанный `wss://`)
    pub accept_invalid_certs: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            signaling_url: DEFAULT_SIGNALING_URL.into(),
            ice_servers: DEFAULT_ICE_SERVERS.clone(),
            remote_peer: None,
            accept_invalid_certs: false,
        }
    }
}

impl Config {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        serde_json::from_str(&raw).map_err(|e| {
            CallError::InvalidConfig(format!("{}: {e}", path.as_ref().display()))
        })
    }

    /// Файл из `SSC_CONFIG` (если задан), затем переменные окружения
    pub fn load() -> Result<Self> {
        let base = match std::env::var("SSC_CONFIG") {
            Ok(path) => {
                info!("Loading config from {path}");
                Self::from_file(path)?
            }
            Err(_) => Self::default(),
        };
        let config = base.with_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    pub fn with_overrides(mut self, var: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(url) = var("SSC_SIGNALING_URL") {
            self.signaling_url = url;
        }
        if let Some(url) = var("SSC_ICE_SERVER") {
            let r#type = if url.starts_with("turn") { "turn" } else { "stun" };
            self.ice_servers = vec![ServerConfig {
                id: "env".into(),
                r#type: r#type.into(),
                url,
                username: var("SSC_ICE_USERNAME"),
                credential: var("SSC_ICE_CREDENTIAL"),
            }];
        }
        if let Some(peer) = var("SSC_REMOTE_PEER").filter(|p| !p.trim().is_empty()) {
            self.remote_peer = Some(peer);
        }
        if let Some(flag) = var("SSC_ACCEPT_INVALID_CERTS") {
            self.accept_invalid_certs = parse_flag(&flag);
        }
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.signaling_url.is_empty() {
            return Err(CallError::InvalidConfig("signaling url cannot be empty".into()));
        }
        if self.ice_servers.is_empty() {
            return Err(CallError::InvalidConfig(
                "at least one ICE server is required".into(),
            ));
        }
        for server in &self.ice_servers {
            if server.url.is_empty() {
                return Err(CallError::InvalidConfig(format!(
                    "server {} has an empty url",
                    server.id
                )));
            }
            if server.r#type == "turn" && (server.username.is_none() || server.credential.is_none())
            {
                return Err(CallError::InvalidConfig(format!(
                    "TURN server {} requires username and credential",
                    server.id
                )));
            }
        }
        Ok(())
    }
}

fn parse_flag(raw: &str) -> bool {
    matches!(
        raw.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}
