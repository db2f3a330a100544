use std::io::Write;

/// 带颜色与源码位置的日志格式
///
/// - 默认级别为 Info，可以通过 `RUST_LOG` 覆盖
/// - 多次调用不会 panic，后续调用会被忽略
pub fn init_log() {
    let _ = builder(log::LevelFilter::Info).try_init();
}

/// 单元测试使用的日志初始化
///
/// 输出交给 libtest 捕获，只有失败的用例才会打印
pub fn init_test_log() {
    let _ = builder(log::LevelFilter::Debug).is_test(true).try_init();
}

fn builder(default_level: log::LevelFilter) -> env_logger::Builder {
    let mut builder = env_logger::Builder::new();
    builder
        .format(|buf, record| {
            let info_style = buf
                .default_level_style(log::Level::Info)
                .fg_color(Some(anstyle::Color::Ansi(anstyle::AnsiColor::Green)));
            let warn_style = buf
                .default_level_style(log::Level::Warn)
                .fg_color(Some(anstyle::Color::Ansi(anstyle::AnsiColor::Yellow)));
            let error_style = buf
                .default_level_style(log::Level::Error)
                .fg_color(Some(anstyle::Color::Ansi(anstyle::AnsiColor::Red)));

            let level_style = match record.level() {
                log::Level::Info => info_style,
                log::Level::Warn => warn_style,
                log::Level::Error => error_style,
                _ => buf.default_level_style(record.level()),
            };
            let grey_style = info_style.fg_color(Some(anstyle::Color::Rgb(anstyle::RgbColor(110, 110, 110))));

            let line = record.line().unwrap_or(!0);
            let file = record.file().unwrap_or("").rsplit(['\\', '/']).next().unwrap_or("");
            let time = chrono::Local::now().format("%Y/%m/%d %H:%M:%S%.3f");
            let level = record.level();
            let module = record.module_path().unwrap_or("");
            let thread = std::thread::current();
            let thread_name = thread.name().unwrap_or("<unnamed>");

            writeln!(
                buf,
                "{level_style}[{time}] {level} [{thread_name}]: {}{level_style:#}\n\t {grey_style}In {module} At {file}:{line}{grey_style:#}",
                record.args()
            )
        })
        .filter(None, default_level)
        .parse_default_env();
    builder
}
