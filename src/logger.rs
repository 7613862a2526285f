use crate::peer::types::{IceCandidate, SessionDescription};
use log::{debug, LevelFilter};
use std::io::Write;

/// Уровень по умолчанию, если фильтр не задан явно
pub fn default_level() -> LevelFilter {
    // Проверяем конфигурацию логирования
    if !crate::config::LOGGING_ENABLED {
        return LevelFilter::Warn;
    }
    #[cfg(debug_assertions)]
    {
        if !crate::config::dev::ENABLE_LOGGING {
            return LevelFilter::Warn;
        }
    }
    LevelFilter::Debug
}

/// Логирование с временными метками.
///
/// `filter` в формате `env_logger` (`"info"`, `"ssc_call=debug,webrtc=warn"`).
/// Повторная инициализация молча игнорируется.
pub fn init(filter: Option<&str>) {
    let mut builder = env_logger::Builder::new();
    builder
        .filter_level(default_level())
        // webrtc очень шумный на debug
        .filter_module("webrtc", LevelFilter::Warn)
        .filter_module("webrtc_ice", LevelFilter::Warn)
        .format(|buf, record| {
            let now = chrono::Local::now();
            writeln!(
                buf,
                "RUST: [{}] {:<5} {}",
                now.format("%Y-%m-%d %H:%M:%S%.3f"),
                record.level(),
                record.args()
            )
        });
    if let Some(filter) = filter {
        builder.parse_filters(filter);
    }
    let _ = builder.try_init();
}

/// Фильтр из `SSC_LOG`; пустое значение считается незаданным
pub fn filter_from(var: impl Fn(&str) -> Option<String>) -> Option<String> {
    var("SSC_LOG")
        .map(|f| f.trim().to_owned())
        .filter(|f| !f.is_empty())
}

/// Инициализация до загрузки конфигурации, чтобы её сообщения тоже попали в лог
pub fn init_from_env() {
    init(filter_from(|key| std::env::var(key).ok()).as_deref());
}

/// Печать ICE-candidate при появлении (Trickle-ICE)
pub fn dump_candidate(label: &str, cand: &IceCandidate) {
    debug!(
        "Trickle {label}: candidate={} sdp_mid={:?} sdp_mline_index={}",
        cand.candidate, cand.sdp_mid, cand.sdp_mline_index
    );
}

/// Короткая сводка SDP: тип, размер и m-строки
pub fn dump_description(label: &str, desc: &SessionDescription) {
    let media: Vec<&str> = desc
        .sdp
        .lines()
        .filter(|l| l.starts_with("m="))
        .collect();
    debug!(
        "{label}: type={} bytes={} media={:?}",
        desc.sdp_type,
        desc.sdp.len(),
        media
    );
}
