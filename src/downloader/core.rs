use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, error, info, warn};

use super::error::{DownloadError, MESSAGE_LIMIT, truncate};
use super::models::{MediaInfo, OutputFormat};
use crate::parser::progress::{ProgressEvent, parse_progress_line};

// 视频格式选择链：优先 mp4 视频 + m4a 音频，退而求其次
const VIDEO_FORMAT_CHAIN: &str = "bestvideo[ext=mp4]+bestaudio[ext=m4a]/best[ext=mp4]/best";
// 下载器的中间产物，不能当成最终文件
const PARTIAL_SUFFIXES: &[&str] = &[".part", ".ytdl", ".temp"];
// stderr 只保留末尾若干行
const STDERR_TAIL_LINES: usize = 64;
const MAX_FILENAME_CHARS: usize = 150;

/// 下载器可执行文件及调用参数
#[derive(Debug, Clone)]
pub struct ToolConfig {
    pub program: PathBuf,
    // 放在所有参数之前，例如 `python3 -m yt_dlp` 中的 `-m yt_dlp`
    pub leading_args: Vec<String>,
    pub ffmpeg_location: Option<PathBuf>,
    pub metadata_timeout: Duration,
}

impl Default for ToolConfig {
    fn default() -> Self {
        Self {
            program: PathBuf::from("yt-dlp"),
            leading_args: Vec::new(),
            ffmpeg_location: None,
            metadata_timeout: Duration::from_secs(60),
        }
    }
}

/// 一次传输所需的全部参数
#[derive(Debug, Clone)]
pub struct FetchRequest {
    pub task_id: String,
    pub url: String,
    pub format: OutputFormat,
    pub output_dir: PathBuf,
}

impl FetchRequest {
    // 文件名以任务ID开头，扩展名交给下载器决定
    pub fn output_template(&self) -> PathBuf {
        self.output_dir.join(format!("{}.%(ext)s", self.task_id))
    }
}

/// 外部下载工具的抽象：元数据探测 + 实际传输
#[async_trait]
pub trait MediaTool: Send + Sync {
    async fn probe(&self, url: &str) -> Result<MediaInfo, DownloadError>;

    /// 运行传输，进度事件写入 `events`；返回前必须等待子进程退出
    async fn fetch(
        &self,
        request: &FetchRequest,
        events: UnboundedSender<ProgressEvent>,
    ) -> Result<(), DownloadError>;
}

pub struct YtDlp {
    config: ToolConfig,
}

impl YtDlp {
    pub fn new(config: ToolConfig) -> Self {
        Self { config }
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.config.program);
        cmd.args(&self.config.leading_args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }

    pub fn probe_args(&self, url: &str) -> Vec<String> {
        vec![
            "--dump-single-json".to_string(),
            "--no-playlist".to_string(),
            "--skip-download".to_string(),
            "--no-warnings".to_string(),
            "--".to_string(),
            url.to_string(),
        ]
    }

    pub fn fetch_args(&self, request: &FetchRequest) -> Vec<String> {
        let mut args: Vec<String> = [
            "--newline",
            "--progress",
            "--quiet",
            "--no-playlist",
            "--progress-template",
            "download:%(progress)j",
            "--progress-template",
            "postprocess:%(progress)j",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();

        args.push("-o".to_string());
        args.push(request.output_template().to_string_lossy().into_owned());

        if let Some(ffmpeg) = &self.config.ffmpeg_location {
            args.push("--ffmpeg-location".to_string());
            args.push(ffmpeg.to_string_lossy().into_owned());
        }

        if request.format.is_audio() {
            args.extend([
                "-f".to_string(),
                "bestaudio/best".to_string(),
                "-x".to_string(),
                "--audio-format".to_string(),
                request.format.as_str().to_string(),
                "--audio-quality".to_string(),
                "0".to_string(),
            ]);
        } else {
            args.extend([
                "-f".to_string(),
                VIDEO_FORMAT_CHAIN.to_string(),
                "--merge-output-format".to_string(),
                request.format.as_str().to_string(),
            ]);
        }

        // `--` 之后的内容不会被当成选项
        args.push("--".to_string());
        args.push(request.url.clone());
        args
    }
}

#[async_trait]
impl MediaTool for YtDlp {
    async fn probe(&self, url: &str) -> Result<MediaInfo, DownloadError> {
        let timeout = self.config.metadata_timeout;
        debug!("探测元数据: {}", url);

        // 启动和等待子进程的 I/O 错误都算作元数据获取失败
        let run = async {
            let child = self.command().args(self.probe_args(url)).spawn()?;
            Ok::<_, std::io::Error>(child.wait_with_output().await?)
        };

        // 超时后 future 被丢弃，kill_on_drop 负责结束子进程
        let output = match tokio::time::timeout(timeout, run).await {
            Ok(output) => {
                output.map_err(|e| DownloadError::Metadata(format!("下载器进程出错: {}", e)))?
            }
            Err(_) => {
                warn!("元数据探测超时 ({}s): {}", timeout.as_secs(), url);
                return Err(DownloadError::MetadataTimeout(timeout.as_secs()));
            }
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            warn!("元数据探测失败 ({}): {}", output.status, stderr.trim());
            return Err(DownloadError::Metadata(excerpt(
                stderr.lines().map(str::to_string),
                output.status.code(),
            )));
        }

        parse_media_info(&output.stdout)
    }

    async fn fetch(
        &self,
        request: &FetchRequest,
        events: UnboundedSender<ProgressEvent>,
    ) -> Result<(), DownloadError> {
        let args = self.fetch_args(request);
        debug!("下载器参数: {:?}", args);

        let mut child = self
            .command()
            .args(&args)
            .spawn()
            .map_err(|e| DownloadError::Spawn(e.to_string()))?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| DownloadError::Internal("stdout 未被接管".to_string()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| DownloadError::Internal("stderr 未被接管".to_string()))?;

        // stderr 单独排空，避免管道写满把子进程卡住
        let stderr_task = tokio::spawn(collect_tail(stderr, STDERR_TAIL_LINES));

        let mut reader = BufReader::new(stdout);
        let mut buf = Vec::new();
        loop {
            buf.clear();
            match reader.read_until(b'\n', &mut buf).await {
                Ok(0) => break,
                Ok(_) => {
                    let line = String::from_utf8_lossy(&buf);
                    if let Some(event) = parse_progress_line(&line) {
                        // 接收端已关闭时继续读，直到进程结束
                        let _ = events.send(event);
                    }
                }
                Err(e) => {
                    warn!("读取下载器输出失败: {}", e);
                    break;
                }
            }
        }

        let status = child.wait().await?;
        let stderr_lines = stderr_task.await.unwrap_or_default();

        if status.success() {
            info!("✅ 下载器正常退出: {}", request.task_id);
            Ok(())
        } else {
            let message = excerpt(stderr_lines.iter().cloned(), status.code());
            error!("❌ 下载器退出码 {:?}，任务 {}: {}", status.code(), request.task_id, message);
            Err(DownloadError::Transfer(message))
        }
    }
}

async fn collect_tail<R>(stream: R, keep: usize) -> VecDeque<String>
where
    R: AsyncRead + Unpin,
{
    let mut tail = VecDeque::with_capacity(keep);
    let mut reader = BufReader::new(stream);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) | Err(_) => break,
            Ok(_) => {
                let line = String::from_utf8_lossy(&buf).trim().to_string();
                if line.is_empty() {
                    continue;
                }
                if tail.len() == keep {
                    tail.pop_front();
                }
                tail.push_back(line);
            }
        }
    }
    tail
}

/// 从 stderr 中挑出有用的部分：优先 `ERROR` 行，其次最后几行
pub fn excerpt<I>(lines: I, code: Option<i32>) -> String
where
    I: IntoIterator<Item = String>,
{
    let lines: Vec<String> = lines
        .into_iter()
        .map(|l| l.trim().to_string())
        .filter(|l| !l.is_empty())
        .collect();

    let errors: Vec<&str> = lines
        .iter()
        .filter(|l| l.starts_with("ERROR"))
        .map(String::as_str)
        .collect();

    let picked = if !errors.is_empty() {
        errors.join(" ")
    } else {
        let start = lines.len().saturating_sub(3);
        lines[start..].join(" ")
    };

    if picked.is_empty() {
        match code {
            Some(code) => format!("downloader exited with code {}", code),
            None => "downloader was terminated".to_string(),
        }
    } else {
        truncate(&picked, MESSAGE_LIMIT)
    }
}

fn parse_media_info(stdout: &[u8]) -> Result<MediaInfo, DownloadError> {
    let json: Value = serde_json::from_slice(stdout)
        .map_err(|e| DownloadError::Metadata(format!("元数据不是合法JSON: {}", e)))?;

    let title = json
        .get("title")
        .and_then(Value::as_str)
        .or_else(|| json.get("id").and_then(Value::as_str))
        .filter(|t| !t.trim().is_empty())
        .ok_or_else(|| DownloadError::Metadata("元数据缺少标题".to_string()))?;
    let ext = json
        .get("ext")
        .and_then(Value::as_str)
        .filter(|e| !e.is_empty())
        .unwrap_or("mp4");

    Ok(MediaInfo {
        title: title.trim().to_string(),
        ext: ext.to_string(),
    })
}

/// 面向用户的文件名：去掉路径分隔符和控制字符，限制长度
pub fn display_filename(title: &str, ext: &str) -> String {
    let mut stem: String = title
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ");
    stem = stem.trim_matches(|c: char| c == '.' || c == ' ').to_string();
    if stem.chars().count() > MAX_FILENAME_CHARS {
        stem = stem.chars().take(MAX_FILENAME_CHARS).collect();
    }
    if stem.is_empty() {
        stem = "download".to_string();
    }
    format!("{}.{}", stem, ext.trim_start_matches('.'))
}

// 用实际产物的扩展名替换展示名里的扩展名
pub fn with_extension_of(filename: &str, actual: &Path) -> String {
    let Some(ext) = actual.extension().and_then(|e| e.to_str()) else {
        return filename.to_string();
    };
    let stem = Path::new(filename)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(filename);
    format!("{}.{}", stem, ext)
}

fn is_partial(name: &str) -> bool {
    PARTIAL_SUFFIXES.iter().any(|s| name.ends_with(s)) || name.contains(".part-Frag")
}

/// 在下载目录中查找以任务ID开头的产物文件
pub async fn locate_output(dir: &Path, task_id: &str) -> Result<PathBuf, DownloadError> {
    let mut entries = tokio::fs::read_dir(dir).await?;
    let mut candidates: Vec<(bool, PathBuf)> = Vec::new();

    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        let Some(rest) = name.strip_prefix(task_id) else {
            continue;
        };
        if !rest.starts_with('.') || is_partial(name) {
            continue;
        }
        if !entry.file_type().await?.is_file() {
            continue;
        }
        // `<id>.<ext>` 优先于 `<id>.f137.mp4` 这类中间格式
        let exact = rest[1..].find('.').is_none();
        candidates.push((exact, entry.path()));
    }

    candidates.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.cmp(&b.1)));
    candidates
        .into_iter()
        .next()
        .map(|(_, path)| path)
        .ok_or_else(|| DownloadError::FileNotFound(dir.join(task_id)))
}

/// 删除产物文件；文件已不存在时视为成功
pub async fn discard_artifact(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => debug!("已删除文件: {}", path.display()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!("删除文件失败 {}: {}", path.display(), e),
    }
}

/// 清理某个任务在下载目录里留下的所有文件（包括 .part 残留）
pub async fn purge_task_files(dir: &Path, task_id: &str) {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) => {
            warn!("无法读取下载目录 {}: {}", dir.display(), e);
            return;
        }
    };
    while let Ok(Some(entry)) = entries.next_entry().await {
        let matches = entry
            .file_name()
            .to_str()
            .is_some_and(|name| name.starts_with(task_id));
        if matches {
            discard_artifact(&entry.path()).await;
        }
    }
}
