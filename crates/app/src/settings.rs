use config::{Config, ConfigError, Environment, File};
use fullon_core::config::AppConfig;
use std::path::{Path, PathBuf};

/// 指定配置文件路径的环境变量
pub const CONFIG_PATH_VAR: &str = "FULLON_CONFIG";

/// 覆盖单个配置项的环境变量前缀，例如 `FULLON__SERVER__PORT=9000`
const ENV_PREFIX: &str = "FULLON";

/// # Summary
/// 确定配置文件路径：命令行第一个参数优先，其次是 `FULLON_CONFIG`。
pub fn config_path(args: impl IntoIterator<Item = String>) -> Option<PathBuf> {
    args.into_iter()
        .nth(1)
        .or_else(|| std::env::var(CONFIG_PATH_VAR).ok())
        .filter(|p| !p.is_empty())
        .map(PathBuf::from)
}

/// # Summary
/// 加载分层配置。
///
/// # Logic
/// 1. 以 `AppConfig::default()` 为底。
/// 2. 叠加配置文件 (格式按扩展名推断)，给定路径时文件必须存在。
/// 3. 叠加 `FULLON__SECTION__KEY` 形式的环境变量。
///
/// # Returns
/// 合并后的配置；任何一层解析失败都返回 `ConfigError`。
pub fn load(path: Option<&Path>) -> Result<AppConfig, ConfigError> {
    let mut builder = Config::builder().add_source(Config::try_from(&AppConfig::default())?);
    if let Some(path) = path {
        builder = builder.add_source(File::from(path).required(true));
    }
    builder
        .add_source(
            Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        )
        .build()?
        .try_deserialize()
}
