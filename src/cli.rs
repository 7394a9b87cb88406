use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

use crate::downloader::core::ToolConfig;
use crate::downloader::models::OutputFormat;
use crate::downloader::watch::WatchSettings;
use crate::parser::SubmissionRules;
use crate::parser::UrlPolicy;
use crate::parser::errors::ParseError;

/// yt-dlp 网页前端
#[derive(Parser, Debug)]
#[command(name = "grabweb")]
#[command(version)]
#[command(about = "提交链接、查看进度、下载文件的 yt-dlp 网页服务", long_about = None)]
pub struct Cli {
    /// 监听地址
    #[arg(long, env = "GRAB_HOST", default_value = "0.0.0.0")]
    pub host: String,

    /// 监听端口
    #[arg(long, env = "GRAB_PORT", default_value_t = 10000)]
    pub port: u16,

    /// 下载文件存放目录
    #[arg(long, env = "GRAB_DOWNLOAD_DIR", value_name = "DIR")]
    #[arg(default_value = "downloads")]
    #[arg(value_hint = clap::ValueHint::DirPath)]
    pub download_dir: PathBuf,

    /// yt-dlp 可执行文件
    #[arg(long, env = "YTDLP_PATH", value_name = "PATH", default_value = "yt-dlp")]
    #[arg(value_hint = clap::ValueHint::ExecutablePath)]
    pub ytdlp_path: PathBuf,

    /// 放在所有参数之前的额外参数，可重复
    #[arg(long = "ytdlp-arg", value_name = "ARG", allow_hyphen_values = true)]
    pub ytdlp_args: Vec<String>,

    /// ffmpeg 所在位置，原样传给 yt-dlp
    #[arg(long, env = "FFMPEG_PATH", value_name = "PATH")]
    pub ffmpeg_location: Option<PathBuf>,

    /// 获取元数据的超时（秒）
    #[arg(long, value_name = "SECS", default_value_t = 60)]
    pub metadata_timeout_secs: u64,

    /// 进度流轮询间隔（毫秒）
    #[arg(long, value_name = "MS", default_value_t = 1000)]
    pub poll_interval_ms: u64,

    /// 终止状态发出后清理任务前的等待（秒）
    #[arg(long, value_name = "SECS", default_value_t = 5)]
    pub cleanup_grace_secs: u64,

    /// 终止任务最长保留时间（秒）
    #[arg(long, value_name = "SECS", default_value_t = 3600)]
    pub task_ttl_secs: u64,

    /// 过期任务扫描间隔（秒）
    #[arg(long, value_name = "SECS", default_value_t = 60)]
    pub sweep_interval_secs: u64,

    /// 允许的输出格式，逗号分隔
    #[arg(long, value_name = "LIST", value_delimiter = ',')]
    #[arg(default_values_t = OutputFormat::ALL)]
    pub formats: Vec<OutputFormat>,

    /// 额外的 URL 白名单正则，可重复
    #[arg(long = "allow-url", value_name = "REGEX")]
    pub allow_url: Vec<String>,

    /// 不使用内置的 YouTube/Instagram 白名单
    #[arg(long)]
    pub no_default_sources: bool,

    /// 输出调试日志
    #[arg(short, long)]
    pub verbose: bool,
}

/// 启动后不再变化的运行配置
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub download_dir: PathBuf,
    pub tool: ToolConfig,
    pub rules: SubmissionRules,
    pub watch: WatchSettings,
    pub task_ttl: Duration,
    pub sweep_interval: Duration,
}

impl Cli {
    pub fn into_config(self) -> Result<AppConfig, ParseError> {
        let urls = if self.no_default_sources {
            UrlPolicy::new(&self.allow_url)?
        } else {
            UrlPolicy::default().with_extra(&self.allow_url)?
        };
        if urls.is_empty() {
            return Err(ParseError::UnsupportedSource(
                "URL 白名单为空，服务将拒绝所有提交".to_string(),
            ));
        }

        let mut formats = Vec::with_capacity(self.formats.len());
        for format in self.formats {
            if !formats.contains(&format) {
                formats.push(format);
            }
        }
        if formats.is_empty() {
            return Err(ParseError::UnsupportedFormat(String::new()));
        }

        Ok(AppConfig {
            host: self.host,
            port: self.port,
            download_dir: self.download_dir,
            tool: ToolConfig {
                program: self.ytdlp_path,
                leading_args: self.ytdlp_args,
                ffmpeg_location: self.ffmpeg_location,
                metadata_timeout: Duration::from_secs(self.metadata_timeout_secs),
            },
            rules: SubmissionRules::new(urls, formats),
            watch: WatchSettings {
                poll_interval: Duration::from_millis(self.poll_interval_ms.max(1)),
                cleanup_grace: Duration::from_secs(self.cleanup_grace_secs),
            },
            task_ttl: Duration::from_secs(self.task_ttl_secs),
            sweep_interval: Duration::from_secs(self.sweep_interval_secs.max(1)),
        })
    }
}
