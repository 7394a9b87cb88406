use anyhow::Context;
use clap::Parser;
use tracing::info;

use media_grabber::cli::Cli;
use media_grabber::common::logger::init_tracing;
use media_grabber::server;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 解析命令行参数
    let args = Cli::parse();
    init_tracing(args.verbose);

    let config = args.into_config().context("配置无效")?;
    info!(
        "yt-dlp: {:?}, 下载目录: {:?}",
        config.tool.program, config.download_dir
    );

    server::serve(config).await.context("服务异常退出")?;
    Ok(())
}
