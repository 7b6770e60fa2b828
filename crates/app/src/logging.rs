use fullon_core::config::LoggingConfig;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::writer::BoxMakeWriter;

/// 滚动日志文件名前缀
const LOG_FILE_PREFIX: &str = "fullon-gateway.log";

/// # Summary
/// 安装全局 tracing subscriber。
///
/// # Logic
/// 1. `RUST_LOG` 存在时以其为准，否则使用配置的级别。
/// 2. 配置了目录时写入按天滚动的日志文件 (非阻塞写)，否则写标准输出。
/// 3. 按配置选择 JSON 或文本格式。
///
/// # Returns
/// 文件输出时返回写线程守卫，调用方必须持有到进程退出，否则尾部日志会丢失。
pub fn init(config: &LoggingConfig) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));

    let (writer, guard) = match &config.directory {
        Some(directory) => {
            let appender = tracing_appender::rolling::daily(directory, LOG_FILE_PREFIX);
            let (non_blocking, guard) = tracing_appender::non_blocking(appender);
            (BoxMakeWriter::new(non_blocking), Some(guard))
        }
        None => (BoxMakeWriter::new(std::io::stdout), None),
    };

    let builder = tracing_subscriber::fmt().with_env_filter(filter).with_writer(writer);
    let installed = if config.json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    if let Err(e) = installed {
        eprintln!("tracing subscriber already installed: {}", e);
    }
    guard
}
