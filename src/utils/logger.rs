use chrono::Local; // 用于获取本地时间
use env_logger::{Builder, Env};
use log::LevelFilter;
use std::io::Write;

/// 初始化日志, RUST_LOG 环境变量优先于传入的默认级别
pub fn init(level: LevelFilter) {
    let env = Env::default().default_filter_or(level.as_str());
    Builder::from_env(env)
        .format(|buf, record| {
            writeln!(
                buf,
                "{} [{}] {} - {}",
                Local::now().format("%Y-%m-%d %H:%M:%S"),
                record.level(),
                record.target(),
                record.args()
            )
        })
        .init();
}
