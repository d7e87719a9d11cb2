use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser as ClapParser;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

use media_renamer::config::Config;
use media_renamer::executor::{LocalExecutor, execute_all};
use media_renamer::hybrid::HybridStrategy;
use media_renamer::model::{SkipReason, Suggestion};
use media_renamer::ratelimit::permits_for_rate;
use media_renamer::resolver::Resolver;
use media_renamer::scanner::{LocalListing, collect_media_files};

#[derive(ClapParser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// 要扫描的目录路径
    path: String,

    /// 是否递归扫描子目录
    #[arg(short, long)]
    recursive: bool,

    /// 预览模式（不实际重命名）
    #[arg(short = 'n', long)]
    dry_run: bool,

    /// 识别策略，默认取配置文件中的 hybrid.strategy
    #[arg(long, value_enum)]
    strategy: Option<HybridStrategy>,

    /// 配置文件路径
    #[arg(long)]
    config: Option<PathBuf>,

    /// 输出调试日志
    #[arg(short, long)]
    verbose: bool,
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "media_renamer=debug" } else { "media_renamer=info" };
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| default.into()))
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn skip_label(reason: Option<SkipReason>) -> &'static str {
    match reason {
        Some(SkipReason::AlreadyCanonical) => "已是规范名称",
        Some(SkipReason::SpecialContent) => "花絮/特辑等特殊内容",
        Some(SkipReason::EpisodeNotFound) => "未找到对应集数",
        None => "未知原因",
    }
}

fn file_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}

fn print_suggestion(index: usize, s: &Suggestion) {
    if s.skipped {
        println!("[{index}] 跳过: {} ({})\n", file_name(&s.original_path), skip_label(s.skip_reason));
        return;
    }
    println!("[{index}] {}", s.display_title());
    println!("  原文件: {}", s.original_path);
    println!("  新路径: {}", s.new_path);
    println!("  置信度: {:.2}  来源: {}\n", s.confidence, s.source);
}

fn confirm() -> Result<bool> {
    print!("继续重命名？[Y/n] ");
    io::stdout().flush()?;

    let mut input = String::new();
    io::stdin().read_line(&mut input)?;
    let answer = input.trim();
    Ok(answer.is_empty() || answer.eq_ignore_ascii_case("y"))
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_tracing(args.verbose);

    let config = Config::load(args.config.as_deref(), args.strategy).context("加载配置失败")?;
    let strategy = config.hybrid.strategy;
    if config.catalog.api_key.is_empty() && strategy != HybridStrategy::ModelOnly {
        warn!("TMDB api key is empty, catalog requests will be rejected");
    }

    let resolver = Resolver::from_config(&config).context("初始化识别引擎失败")?;

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                println!("\n收到中断信号，正在停止...");
                cancel.cancel();
            }
        });
    }

    println!("扫描目录: {}", args.path);
    let files = collect_media_files(&LocalListing, &args.path, args.recursive).await?;
    if files.is_empty() {
        println!("未找到视频文件");
        return Ok(());
    }
    println!("找到 {} 个视频文件，识别策略: {strategy}\n", files.len());

    let outcome = resolver.resolve_hybrid(&files, strategy, &cancel).await?;
    let resolution = outcome.resolution;
    debug!(used_model = outcome.used_model, "resolution finished");

    println!("重命名预览:\n");
    let mut pairs = Vec::new();
    let mut skipped = 0;
    for (i, path) in files.iter().enumerate() {
        match resolution.suggestions.get(path).and_then(|list| list.first()) {
            Some(best) => {
                print_suggestion(i + 1, best);
                if best.skipped {
                    skipped += 1;
                } else if best.new_path != best.original_path {
                    pairs.push((best.original_path.clone(), best.new_path.clone()));
                }
            }
            None => {
                if let Some(err) = resolution.failures.get(path) {
                    println!("[{}] 识别失败: {}\n  原因: {}\n", i + 1, file_name(path), err);
                }
            }
        }
    }

    if outcome.used_model {
        println!("部分结果来自生成模型，请仔细核对");
    }
    if skipped > 0 {
        println!("跳过 {skipped} 个文件");
    }
    if !resolution.failures.is_empty() {
        let retryable = resolution.failures.values().filter(|e| e.is_retryable()).count();
        println!("识别失败 {} 个文件（其中 {retryable} 个可重试）", resolution.failures.len());
    }

    if pairs.is_empty() {
        println!("没有需要重命名的文件");
        return Ok(());
    }

    if args.dry_run {
        println!("预览模式，未实际重命名");
        return Ok(());
    }
    if !confirm()? {
        println!("已取消");
        return Ok(());
    }

    let permits = permits_for_rate(config.rename.qps);
    let outcomes = execute_all(Arc::new(LocalExecutor), pairs, permits, &cancel).await;
    let mut success = 0;
    for outcome in &outcomes {
        match &outcome.result {
            Ok(()) => success += 1,
            Err(e) => println!("重命名失败: {} - {:#}", outcome.old, e),
        }
    }
    println!("\n成功重命名 {success} 个文件");

    Ok(())
}
