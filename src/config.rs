use std::env;

use crate::error::AppError;

#[derive(Debug, Clone)]
pub struct Config {
    pub http_port: u16,
    pub log_level: String,
    pub otp_length: u32,
    pub otp_expiry_minutes: i64,
    pub otp_max_attempts: u32,
    /// Development mode: login OTP codes are echoed back to the requester.
    pub otp_expose_codes: bool,
    pub otp_retention_minutes: i64,
    pub lock_wait_ms: u64,
    pub match_radius_km: f64,
    pub average_speed_kmh: f64,
    pub connection_buffer: usize,
    /// Credential for back-office routes; `None` disables them.
    pub admin_token: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            http_port: 3000,
            log_level: "info".to_string(),
            otp_length: 6,
            otp_expiry_minutes: 5,
            otp_max_attempts: 3,
            otp_expose_codes: false,
            otp_retention_minutes: 60,
            lock_wait_ms: 2000,
            match_radius_km: 10.0,
            average_speed_kmh: 25.0,
            connection_buffer: 256,
            admin_token: None,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, AppError> {
        let _ = dotenvy::dotenv();
        let defaults = Self::default();

        let config = Self {
            http_port: parse_or_default("HTTP_PORT", defaults.http_port)?,
            log_level: env::var("LOG_LEVEL").unwrap_or(defaults.log_level),
            otp_length: parse_or_default("OTP_LENGTH", defaults.otp_length)?,
            otp_expiry_minutes: parse_or_default("OTP_EXPIRY_MINUTES", defaults.otp_expiry_minutes)?,
            otp_max_attempts: parse_or_default("OTP_MAX_ATTEMPTS", defaults.otp_max_attempts)?,
            otp_expose_codes: parse_or_default("OTP_EXPOSE_CODES", defaults.otp_expose_codes)?,
            otp_retention_minutes: parse_or_default(
                "OTP_RETENTION_MINUTES",
                defaults.otp_retention_minutes,
            )?,
            lock_wait_ms: parse_or_default("LOCK_WAIT_MS", defaults.lock_wait_ms)?,
            match_radius_km: parse_or_default("MATCH_RADIUS_KM", defaults.match_radius_km)?,
            average_speed_kmh: parse_or_default("AVERAGE_SPEED_KMH", defaults.average_speed_kmh)?,
            connection_buffer: parse_or_default("CONNECTION_BUFFER", defaults.connection_buffer)?,
            admin_token: env::var("ADMIN_TOKEN")
                .ok()
                .map(|token| token.trim().to_string())
                .filter(|token| !token.is_empty()),
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), AppError> {
        if !(4..=9).contains(&self.otp_length) {
            return Err(AppError::Internal(format!(
                "invalid OTP_LENGTH: {} (expected 4..=9)",
                self.otp_length
            )));
        }
        if self.otp_max_attempts == 0 {
            return Err(AppError::Internal("invalid OTP_MAX_ATTEMPTS: must be > 0".to_string()));
        }
        if self.otp_expiry_minutes <= 0 {
            return Err(AppError::Internal(
                "invalid OTP_EXPIRY_MINUTES: must be > 0".to_string(),
            ));
        }
        if self.average_speed_kmh <= 0.0 {
            return Err(AppError::Internal(
                "invalid AVERAGE_SPEED_KMH: must be > 0".to_string(),
            ));
        }
        if self.connection_buffer == 0 {
            return Err(AppError::Internal(
                "invalid CONNECTION_BUFFER: must be > 0".to_string(),
            ));
        }
        Ok(())
    }
}

fn parse_or_default<T>(key: &str, default: T) -> Result<T, AppError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw
            .parse::<T>()
            .map_err(|err| AppError::Internal(format!("invalid {key}: {err}"))),
        Err(_) => Ok(default),
    }
}
