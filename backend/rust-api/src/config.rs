use serde::Deserialize;
use std::env;
use std::path::PathBuf;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub mongo_uri: String,
    pub redis_uri: String,
    pub mongo_database: String,
    pub jwt_secret: String,
    pub bind_addr: String,
    pub cors_origin: Option<String>,
    /// Seconds between contest lifecycle passes
    pub contest_schedule_interval_secs: u64,
    pub judge: JudgeConfig,
}

/// Limits and sizing of the execution sandbox
#[derive(Debug, Clone, Deserialize)]
pub struct JudgeConfig {
    pub temp_dir: PathBuf,
    pub max_concurrent_executions: usize,
    pub max_queued_executions: usize,
    pub compile_timeout_ms: u64,
    pub output_limit_bytes: usize,
    pub default_time_limit_ms: u64,
    pub default_memory_limit_mb: u64,
    pub run_time_limit_ms: u64,
    pub run_memory_limit_mb: u64,
}

impl Default for JudgeConfig {
    fn default() -> Self {
        Self {
            temp_dir: env::temp_dir().join("codejudge"),
            max_concurrent_executions: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(2),
            max_queued_executions: 64,
            compile_timeout_ms: 10_000,
            output_limit_bytes: 1024 * 1024,
            default_time_limit_ms: 2000,
            default_memory_limit_mb: 256,
            run_time_limit_ms: 5000,
            run_memory_limit_mb: 256,
        }
    }
}

impl Config {
    pub fn load() -> Result<Self, config::ConfigError> {
        // Root .env first, then fallback to local .env
        let skip_root_env = env::var("SKIP_ROOT_ENV").is_ok();
        if skip_root_env {
            dotenvy::dotenv().ok();
        } else if dotenvy::from_path("../../.env").is_err() {
            dotenvy::dotenv().ok();
        }

        let env = env::var("APP_ENV").unwrap_or_else(|_| "dev".to_string());

        // config/*.toml + ENV overrides (prefix: APP_)
        let config_builder = config::Config::builder()
            .add_source(config::File::with_name(&format!("config/{}", env)).required(false))
            .add_source(config::Environment::with_prefix("APP").separator("__"));

        let settings = config_builder.build()?;

        let mongo_uri = settings
            .get_string("database.mongo_uri")
            .or_else(|_| env::var("MONGO_URI"))
            .unwrap_or_else(|_| "mongodb://localhost:27017".to_string());

        let redis_uri = settings
            .get_string("redis.uri")
            .or_else(|_| env::var("REDIS_URI"))
            .unwrap_or_else(|_| {
                let host = env::var("REDIS_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
                let port = env::var("REDIS_PORT").unwrap_or_else(|_| "6379".to_string());
                match env::var("REDIS_PASSWORD") {
                    Ok(password) => format!("redis://:{}@{}:{}/0", password, host, port),
                    Err(_) => format!("redis://{}:{}/0", host, port),
                }
            });

        let mongo_database = settings
            .get_string("database.mongo_database")
            .or_else(|_| env::var("MONGO_DATABASE"))
            .unwrap_or_else(|_| "codejudge".to_string());

        let jwt_secret = settings
            .get_string("auth.jwt_secret")
            .or_else(|_| env::var("JWT_SECRET"))
            .or_else(|_| {
                if env == "prod" {
                    return Err(config::ConfigError::NotFound(
                        "JWT_SECRET must be set in production".to_string(),
                    ));
                }
                eprintln!("WARNING: Using default JWT_SECRET (dev mode only!)");
                Ok("dev-secret-only-for-local-testing".to_string())
            })?;

        let bind_addr = settings
            .get_string("server.bind_addr")
            .or_else(|_| env::var("BIND_ADDR"))
            .unwrap_or_else(|_| "0.0.0.0:8081".to_string());

        let cors_origin = settings
            .get_string("server.cors_origin")
            .or_else(|_| env::var("CORS_ORIGIN"))
            .ok();

        let contest_schedule_interval_secs = settings
            .get_int("contests.schedule_interval_secs")
            .ok()
            .and_then(|v| u64::try_from(v).ok())
            .or_else(|| {
                env::var("CONTEST_SCHEDULE_INTERVAL_SECS")
                    .ok()
                    .and_then(|v| v.parse().ok())
            })
            .filter(|v| *v > 0)
            .unwrap_or(60);

        let judge = Self::load_judge(&settings);

        Ok(Config {
            mongo_uri,
            redis_uri,
            mongo_database,
            jwt_secret,
            bind_addr,
            cors_origin,
            contest_schedule_interval_secs,
            judge,
        })
    }

    fn load_judge(settings: &config::Config) -> JudgeConfig {
        let defaults = JudgeConfig::default();

        let int = |key: &str, env_key: &str, fallback: u64| -> u64 {
            settings
                .get_int(key)
                .ok()
                .and_then(|v| u64::try_from(v).ok())
                .or_else(|| env::var(env_key).ok().and_then(|v| v.parse().ok()))
                .filter(|v| *v > 0)
                .unwrap_or(fallback)
        };

        let temp_dir = settings
            .get_string("judge.temp_dir")
            .or_else(|_| env::var("JUDGE_TEMP_DIR"))
            .map(PathBuf::from)
            .unwrap_or(defaults.temp_dir);

        JudgeConfig {
            temp_dir,
            max_concurrent_executions: int(
                "judge.max_concurrent_executions",
                "JUDGE_MAX_CONCURRENT",
                defaults.max_concurrent_executions as u64,
            ) as usize,
            max_queued_executions: int(
                "judge.max_queued_executions",
                "JUDGE_MAX_QUEUED",
                defaults.max_queued_executions as u64,
            ) as usize,
            compile_timeout_ms: int(
                "judge.compile_timeout_ms",
                "JUDGE_COMPILE_TIMEOUT_MS",
                defaults.compile_timeout_ms,
            ),
            output_limit_bytes: int(
                "judge.output_limit_bytes",
                "JUDGE_OUTPUT_LIMIT_BYTES",
                defaults.output_limit_bytes as u64,
            ) as usize,
            default_time_limit_ms: int(
                "judge.default_time_limit_ms",
                "JUDGE_DEFAULT_TIME_LIMIT_MS",
                defaults.default_time_limit_ms,
            ),
            default_memory_limit_mb: int(
                "judge.default_memory_limit_mb",
                "JUDGE_DEFAULT_MEMORY_LIMIT_MB",
                defaults.default_memory_limit_mb,
            ),
            run_time_limit_ms: int(
                "judge.run_time_limit_ms",
                "JUDGE_RUN_TIME_LIMIT_MS",
                defaults.run_time_limit_ms,
            ),
            run_memory_limit_mb: int(
                "judge.run_memory_limit_mb",
                "JUDGE_RUN_MEMORY_LIMIT_MB",
                defaults.run_memory_limit_mb,
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn judge_limits_come_from_env() {
        env::set_var("SKIP_ROOT_ENV", "1");
        // No config/test.toml, so only env vars apply
        env::set_var("APP_ENV", "test");
        env::set_var("JUDGE_MAX_QUEUED", "7");
        env::set_var("JUDGE_RUN_TIME_LIMIT_MS", "1500");

        let config = Config::load().unwrap();
        assert_eq!(config.judge.max_queued_executions, 7);
        assert_eq!(config.judge.run_time_limit_ms, 1500);
        assert_eq!(config.judge.compile_timeout_ms, 10_000);

        env::remove_var("JUDGE_MAX_QUEUED");
        env::remove_var("JUDGE_RUN_TIME_LIMIT_MS");
    }

    #[test]
    #[serial]
    fn contest_schedule_interval_defaults_to_a_minute() {
        env::set_var("SKIP_ROOT_ENV", "1");
        env::set_var("APP_ENV", "test");
        env::remove_var("CONTEST_SCHEDULE_INTERVAL_SECS");
        assert_eq!(Config::load().unwrap().contest_schedule_interval_secs, 60);

        env::set_var("CONTEST_SCHEDULE_INTERVAL_SECS", "5");
        assert_eq!(Config::load().unwrap().contest_schedule_interval_secs, 5);

        env::remove_var("CONTEST_SCHEDULE_INTERVAL_SECS");
    }

    #[test]
    #[serial]
    fn zero_limits_fall_back_to_defaults() {
        env::set_var("SKIP_ROOT_ENV", "1");
        env::set_var("APP_ENV", "test");
        env::set_var("JUDGE_MAX_CONCURRENT", "0");

        let config = Config::load().unwrap();
        assert!(config.judge.max_concurrent_executions >= 1);

        env::remove_var("JUDGE_MAX_CONCURRENT");
    }
}
