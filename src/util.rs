use std::time::Duration;

const CONFIG_PATH: &str = "VIGIL_CONFIG";

const DEFAULT_CONFIG_PATH: &str = "./vigil.toml";

pub fn get_config_path() -> String {
    std::env::var(CONFIG_PATH).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string())
}

const LOG_LEVEL: &str = "VIGIL_LOG";

pub fn get_log_level() -> tracing::level_filters::LevelFilter {
    std::env::var(LOG_LEVEL)
        .ok()
        .and_then(|level| level.parse().ok())
        .unwrap_or(tracing::level_filters::LevelFilter::DEBUG)
}

const SMTP_HOST: &str = "SMTP_HOST";
const SMTP_PORT: &str = "SMTP_PORT";
const SMTP_USER: &str = "SMTP_USER";
const SMTP_PASSWORD: &str = "SMTP_PASSWORD";
const SMTP_FROM: &str = "SMTP_FROM";

/// `SMTP_*` variables of the process environment
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SmtpEnv {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub user: Option<String>,
    pub password: Option<String>,
    pub from: Option<String>,
}

impl SmtpEnv {
    pub fn load() -> Self {
        let var = |name: &str| std::env::var(name).ok().filter(|value| !value.is_empty());

        Self {
            host: var(SMTP_HOST),
            port: var(SMTP_PORT).and_then(|port| port.parse().ok()),
            user: var(SMTP_USER),
            password: var(SMTP_PASSWORD),
            from: var(SMTP_FROM),
        }
    }
}

/// Parse a compact duration such as `30s`, `5m`, `1h30m` or `500ms`
///
/// Supported units: `ms`, `s`, `m`, `h`, `d`. Zero durations are rejected.
pub fn parse_duration(input: &str) -> anyhow::Result<Duration> {
    let input = input.trim();
    if input.is_empty() {
        anyhow::bail!("empty duration");
    }

    let mut total = Duration::ZERO;
    let mut rest = input;

    while !rest.is_empty() {
        let digits = rest.chars().take_while(|c| c.is_ascii_digit()).count();
        if digits == 0 {
            anyhow::bail!("invalid duration '{input}': expected a number");
        }
        let (number, tail) = rest.split_at(digits);
        let value: u64 = number
            .parse()
            .map_err(|e| anyhow::anyhow!("invalid duration '{input}': {e}"))?;

        let unit_len = tail.chars().take_while(|c| c.is_ascii_alphabetic()).count();
        let (unit, tail) = tail.split_at(unit_len);
        let step = match unit {
            "ms" => Duration::from_millis(value),
            "s" => Duration::from_secs(value),
            "m" => Duration::from_secs(value.saturating_mul(60)),
            "h" => Duration::from_secs(value.saturating_mul(3600)),
            "d" => Duration::from_secs(value.saturating_mul(86_400)),
            "" => anyhow::bail!("invalid duration '{input}': missing unit"),
            other => anyhow::bail!("invalid duration '{input}': unknown unit '{other}'"),
        };

        total = total.saturating_add(step);
        rest = tail;
    }

    if total.is_zero() {
        anyhow::bail!("invalid duration '{input}': must be greater than zero");
    }

    Ok(total)
}

/// Render a duration the way interval triggers are displayed (`5m0s`, `1h30m0s`)
pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    if secs == 0 {
        return format!("{}ms", duration.as_millis());
    }

    let hours = secs / 3600;
    let minutes = (secs % 3600) / 60;
    let seconds = secs % 60;

    if hours > 0 {
        format!("{hours}h{minutes}m{seconds}s")
    } else if minutes > 0 {
        format!("{minutes}m{seconds}s")
    } else {
        format!("{seconds}s")
    }
}
