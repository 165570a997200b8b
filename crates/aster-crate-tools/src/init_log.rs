use std::io::Write;

/// 初始化全局日志
///
/// 日志格式：`[HH:MM:SS] LEVEL [module] message`
pub fn init_log() {
    env_logger::Builder::new()
        .format(|buf, record| {
            let level_style = match record.level() {
                log::Level::Error => buf
                    .default_level_style(log::Level::Error)
                    .fg_color(Some(anstyle::Color::Ansi(anstyle::AnsiColor::Red))),
                log::Level::Warn => buf
                    .default_level_style(log::Level::Warn)
                    .fg_color(Some(anstyle::Color::Ansi(anstyle::AnsiColor::Yellow))),
                log::Level::Info => buf
                    .default_level_style(log::Level::Info)
                    .fg_color(Some(anstyle::Color::Ansi(anstyle::AnsiColor::Green))),
                level => buf.default_level_style(level),
            };
            let dim_style = level_style.fg_color(Some(anstyle::Color::Rgb(anstyle::RgbColor(128, 128, 128))));

            let time = chrono::Local::now().format("%H:%M:%S");
            let module = record.module_path().unwrap_or("");

            writeln!(
                buf,
                "{level_style}[{time}] {}{level_style:#} {dim_style}[{module}]{dim_style:#} {}",
                record.level(),
                record.args()
            )
        })
        .filter(None, log::LevelFilter::Info)
        .parse_default_env()
        .init();
}
