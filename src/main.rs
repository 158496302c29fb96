//! Automation Core 命令行入口
//!
//! 自动化控制器内核的命令行工具，提供启动、配置检查和模块查看功能。
//!
//! # 命令概览
//!
//! - `start` - 启动控制器
//! - `version` - 显示版本信息
//! - `check-config` - 验证配置文件
//! - `list-modules` - 扫描并列出模块
//! - `plan` - 显示按依赖排序的加载计划
//!
//! # 使用示例
//!
//! ```bash
//! # 启动控制器
//! automation-core start
//!
//! # 使用自定义配置文件启动
//! automation-core -c my-config.yaml start
//!
//! # 查看加载计划
//! automation-core plan
//! ```

use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::signal;
use tracing::info;

use automation_core::{
    AutomationController, CoreConfig, DependencyGraph, FileStorage, LogGuard, Logger,
    LoggerConfig, ModuleRegistry, StaticActivator,
};

/// Automation Core - 自动化控制器内核
///
/// 模块发现、依赖解析加载与实例生命周期管理。
#[derive(Parser)]
#[command(name = "automation-core")]
#[command(version, about = "可插拔自动化控制器内核", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// 配置文件路径
    #[arg(short, long, default_value = "config.yaml", global = true)]
    config: PathBuf,

    /// 日志级别 (trace, debug, info, warn, error)
    #[arg(short, long, global = true)]
    log_level: Option<String>,

    /// 开发模式（启用更详细的日志）
    #[arg(long, global = true)]
    dev: bool,

    /// 子命令
    #[command(subcommand)]
    command: Option<Commands>,
}

/// 可用的子命令
#[derive(Subcommand)]
enum Commands {
    /// 启动控制器
    ///
    /// 扫描模块、加载持久化配置并按依赖顺序启动模块实例。
    /// 按 Ctrl+C 停止控制器。
    Start,

    /// 查看版本信息
    Version,

    /// 验证配置文件
    ///
    /// 检查配置文件是否有效，并显示解析后的配置内容。
    CheckConfig {
        /// 配置文件路径（不指定则使用全局 -c 选项）
        #[arg(short, long)]
        config: Option<PathBuf>,
    },

    /// 扫描模块目录并列出模块
    ListModules,

    /// 显示加载计划（不激活任何模块）
    Plan,
}

/// 初始化日志系统
fn init_logging(config: &CoreConfig, level: Option<&str>) -> LogGuard {
    let mut logger_config = LoggerConfig::from_log_config(&config.logging);
    if let Some(level) = level {
        logger_config.level = level.to_string();
    } else if config.dev_mode {
        logger_config.level = "debug".to_string();
    }
    Logger::try_init(logger_config)
}

/// 启动控制器
///
/// 命令行宿主没有内置模块工厂，能力表为空：模块会被发现并登记，
/// 激活失败以通知形式记录。嵌入控制器的宿主应提供自己的激活器。
async fn run_start(config: CoreConfig) -> Result<(), Box<dyn std::error::Error>> {
    let storage = Arc::new(FileStorage::new(&config.storage.data_dir));
    let controller = AutomationController::new(config, Arc::new(StaticActivator::new()), storage);

    controller.init().await?;
    controller.start().await?;

    let modules = controller.modules().await;
    let loaded = modules.iter().filter(|m| m.is_loaded()).count();

    println!();
    println!("╔════════════════════════════════════════════════════════╗");
    println!("║        自动化控制器已启动 (Automation Core Started)    ║");
    println!("╠════════════════════════════════════════════════════════╣");
    println!("  版本:     {}", automation_core::VERSION);
    println!("  模块:     {} 个已发现, {} 个已加载", modules.len(), loaded);
    println!("  实例:     {} 个运行中", controller.running_instances().await.len());
    println!();
    println!("  按 Ctrl+C 停止控制器");
    println!("╚════════════════════════════════════════════════════════╝");
    println!();

    signal::ctrl_c().await?;

    println!();
    info!("收到关闭信号，正在停止...");
    controller.stop().await?;
    Ok(())
}

/// 检查配置文件
async fn check_config(path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    println!("检查配置文件: {}", path.display());
    println!();

    if !path.exists() {
        println!("⚠️  警告: 配置文件不存在，将使用默认配置");
        println!();
        print_config(&CoreConfig::default());
        return Ok(());
    }

    match CoreConfig::from_file(path).await {
        Ok(config) => {
            println!("✅ 配置文件有效！");
            println!();
            print_config(&config);
            Ok(())
        }
        Err(e) => {
            println!("❌ 配置文件无效: {}", e);
            Err(Box::new(e))
        }
    }
}

fn print_config(config: &CoreConfig) {
    let yes_no = |b: bool| if b { "是" } else { "否" };
    println!("配置内容:");
    println!("────────────────────────────────────────");
    println!("  [日志配置]");
    println!("    日志级别:       {}", config.logging.level);
    println!("    文件输出:       {}", yes_no(config.logging.file_output));
    println!("    JSON 格式:      {}", yes_no(config.logging.json_format));
    println!("    轮转策略:       {}", config.logging.rotation);
    println!();
    println!("  [模块配置]");
    println!("    模块目录:       {:?}", config.modules.module_dirs);
    println!();
    println!("  [存储配置]");
    println!("    数据目录:       {}", config.storage.data_dir.display());
    println!();
    println!("  [事件配置]");
    println!("    回调超时:       {} ms", config.events.handler_timeout_ms);
    println!("    并发分发:       {}", yes_no(config.events.concurrent_dispatch));
    println!();
    println!("  [其他]");
    println!("    开发模式:       {}", yes_no(config.dev_mode));
    println!("────────────────────────────────────────");
}

/// 扫描模块目录
async fn scan_modules(config: &CoreConfig) -> ModuleRegistry {
    let registry = ModuleRegistry::new(config.modules.module_dirs.clone());
    let report = registry.scan().await;
    for err in &report.errors {
        println!("⚠️  {}", err);
    }
    registry
}

/// 列出模块
async fn list_modules(config: &CoreConfig) {
    let registry = scan_modules(config).await;
    let modules = registry.list().await;

    println!();
    println!("已发现模块 ({})", modules.len());
    println!("═══════════════════════════════════════");
    for module in &modules {
        let mut flags = Vec::new();
        if module.is_singleton() {
            flags.push("singleton");
        }
        if module.is_skipped() {
            flags.push("skip");
        }
        println!(
            "  {:<20} 依赖: [{}] {}",
            module.id(),
            module.dependencies().join(", "),
            flags.join(" ")
        );
        println!("  {:<20} 位置: {}", "", module.location.display());
    }
    println!("═══════════════════════════════════════");

    let plan = DependencyGraph::from_descriptors(&modules).plan();
    println!("  加载顺序: {}", plan.order.join(" -> "));
    println!();
}

/// 显示加载计划
async fn show_plan(config: &CoreConfig) {
    let registry = scan_modules(config).await;
    let modules = registry.list().await;
    let plan = DependencyGraph::from_descriptors(&modules).plan();

    println!();
    println!("加载计划");
    println!("═══════════════════════════════════════");
    for (index, module_id) in plan.order.iter().enumerate() {
        println!("  {:>3}. {}", index + 1, module_id);
    }
    if !plan.blocked.is_empty() {
        println!();
        println!("  无法加载:");
        for (module_id, reason) in &plan.blocked {
            println!("    ✗ {}: {}", module_id, reason);
        }
    }
    let skipped: Vec<&str> = modules
        .iter()
        .filter(|m| m.is_skipped())
        .map(|m| m.id())
        .collect();
    if !skipped.is_empty() {
        println!();
        println!("  跳过: {}", skipped.join(", "));
    }
    println!("═══════════════════════════════════════");
    println!();
}

/// 打印版本信息
fn print_version() {
    println!();
    println!("Automation Core - 自动化控制器内核");
    println!("═══════════════════════════════════════");
    println!("  版本:             {}", automation_core::VERSION);
    println!();
    println!("构建信息:");
    println!("  目标平台:         {}", std::env::consts::ARCH);
    println!("  操作系统:         {}", std::env::consts::OS);
    println!("═══════════════════════════════════════");
    println!();
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Version) => {
            print_version();
        }

        Some(Commands::CheckConfig { config }) => {
            let config_path = config.unwrap_or(cli.config);
            check_config(&config_path).await?;
        }

        Some(Commands::ListModules) => {
            let config = load_config(&cli.config, cli.dev).await?;
            list_modules(&config).await;
        }

        Some(Commands::Plan) => {
            let config = load_config(&cli.config, cli.dev).await?;
            show_plan(&config).await;
        }

        Some(Commands::Start) | None => {
            let config = load_config(&cli.config, cli.dev).await?;
            let _guard = init_logging(&config, cli.log_level.as_deref());
            run_start(config).await?;
        }
    }

    Ok(())
}

/// 加载配置文件，不存在时使用默认配置
async fn load_config(config_path: &Path, dev_mode: bool) -> Result<CoreConfig, Box<dyn std::error::Error>> {
    let mut config = if config_path.exists() {
        CoreConfig::from_file(config_path).await?
    } else {
        CoreConfig::default()
    };
    if dev_mode {
        config.dev_mode = true;
    }
    Ok(config)
}
