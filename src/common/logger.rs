use colored::*;
use tracing::Level;

/// 初始化 tracing 日志，`verbose` 时输出 DEBUG
pub fn init_tracing(verbose: bool) {
    let level = if verbose { Level::DEBUG } else { Level::INFO };
    tracing_subscriber::fmt().with_max_level(level).init();
}

/// 终端上的启动信息
pub struct PrettyLogger;

impl PrettyLogger {
    /// 显示成功消息
    pub fn success(message: impl AsRef<str>) {
        println!("{} {}", "✓".green().bold(), message.as_ref());
    }

    /// 显示信息消息
    pub fn info(message: impl AsRef<str>) {
        println!("{} {}", "ℹ".blue().bold(), message.as_ref());
    }

    /// 显示警告消息
    pub fn warning(message: impl AsRef<str>) {
        println!("{} {}", "⚠".yellow().bold(), message.as_ref());
    }

    /// 显示文件信息
    pub fn file_info(label: impl AsRef<str>, path: impl AsRef<str>) {
        println!("{} {}: {}", "📁".blue().bold(), label.as_ref().bold(), path.as_ref());
    }

    pub fn separator() {
        println!("{}", "─".repeat(50).bright_black());
    }

    /// 显示标题
    pub fn title(text: impl AsRef<str>) {
        let text = text.as_ref();
        let width = text.chars().count().min(48);
        let padding = (48 - width) / 2;
        println!(
            "{} {} {}",
            "─".repeat(padding).bright_black(),
            text.bold(),
            "─".repeat(48 - padding - width).bright_black()
        );
    }

    /// 启动横幅：监听地址、下载目录与允许的格式
    pub fn banner(address: impl AsRef<str>, download_dir: impl AsRef<str>, formats: &[String]) {
        Self::title(format!("grabweb {}", env!("CARGO_PKG_VERSION")));
        Self::success(format!("监听 http://{}", address.as_ref()));
        Self::file_info("下载目录", download_dir);
        if formats.is_empty() {
            Self::warning("没有允许的输出格式");
        } else {
            Self::info(format!("允许的格式: {}", formats.join(", ")));
        }
        Self::separator();
    }
}
