//! TcpStat Watch - TCP连接表观察器
//!
//! 提供:
//! - 定时刷新连接表（保持已有连接的身份）
//! - 对新连接自动启用扩展统计
//! - 文本或 JSON 输出

mod cli;

use clap::Parser;
use cli::Cli;
use std::sync::Arc;
use std::time::Duration;
use tcpstat_core::config::WatchConfig;
use tcpstat_core::platform::{
    create_native_stack, create_process_lookup, has_admin_privileges, is_supported,
    platform_name,
};
use tcpstat_core::{
    AddressFamily, ConnectionRecord, ConnectionSummary, ConnectionTable, NativeStack, ProcessLookup,
    RefreshReport, StatsReading, TcpState,
};
use tokio::time::interval;
use tracing::{debug, error, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // 初始化日志
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let mut config = match &cli.config {
        Some(path) => WatchConfig::load_from(path)?,
        None => WatchConfig::load().unwrap_or_else(|e| {
            warn!("无法读取配置，使用默认值: {}", e);
            WatchConfig::default()
        }),
    };
    cli.merge_into(&mut config);
    config.validate()?;

    if cli.save_config {
        match &cli.config {
            Some(path) => config.save_to(path)?,
            None => config.save()?,
        }
        info!("配置已保存");
    }

    info!("TcpStat Watch 启动 ({})", platform_name());
    if !is_supported() {
        warn!("当前平台不提供TCP扩展统计接口，连接表将为空");
    }
    if !config.auto_enable.is_empty() && !has_admin_privileges() {
        warn!("未检测到管理员权限，启用扩展统计可能失败");
    }

    let stack = create_native_stack();
    let lookup = create_process_lookup();

    let mut table = ConnectionTable::capture(&stack)?;
    let initial: Vec<_> = table.records().to_vec();
    enable_configured(&config, &initial, &stack);

    if cli.once {
        let rows = table.iter().map(|record| (record, None));
        let summaries = summarize(rows, &config, &stack, lookup.as_ref());
        print_summaries(&summaries, cli.json)?;
        return Ok(());
    }

    let mut ticker = interval(Duration::from_secs(config.refresh_interval));
    info!("开始监控，间隔: {}秒", config.refresh_interval);

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = tokio::signal::ctrl_c() => {
                info!("收到退出信号");
                break;
            }
        }

        match table.refresh(&stack) {
            Ok(report) => {
                enable_configured(&config, &report.added, &stack);
                log_report(&table, &report);

                // 与表内顺序一致：保留的记录在前，新增的在后
                let rows = report
                    .updated
                    .iter()
                    .map(|delta| (&delta.record, Some(delta.stats.clone())))
                    .chain(report.added.iter().map(|record| (record, None)));
                let summaries = summarize(rows, &config, &stack, lookup.as_ref());
                print_summaries(&summaries, cli.json)?;
            }
            Err(e) => {
                error!("刷新连接表失败: {}", e);
            }
        }
    }

    Ok(())
}

/// 对连接启用配置中的统计，失败只记录日志
fn enable_configured(config: &WatchConfig, records: &[Arc<ConnectionRecord>], stack: &NativeStack) {
    if config.auto_enable.is_empty() {
        return;
    }
    for record in records {
        if record.state() != TcpState::Established {
            continue;
        }
        if let Err(e) = config.auto_enable.apply(&record.stats(stack)) {
            warn!("[{}] 启用扩展统计失败: {}", record, e);
        }
    }
}

fn log_report(table: &ConnectionTable, report: &RefreshReport) {
    let counts = table.state_counts();
    info!(
        "连接状态: 总数={}, ESTABLISHED={}, LISTEN={}, TIME_WAIT={}, CLOSE_WAIT={}, 新增={}, 移除={}",
        table.len(),
        counts.get(&TcpState::Established).unwrap_or(&0),
        counts.get(&TcpState::Listen).unwrap_or(&0),
        counts.get(&TcpState::TimeWait).unwrap_or(&0),
        counts.get(&TcpState::CloseWait).unwrap_or(&0),
        report.added.len(),
        report.removed.len(),
    );
    for record in &report.added {
        debug!("新连接: {}", record);
    }
    for record in &report.removed {
        debug!("连接消失: {}", record);
    }
}

/// 生成输出视图；没有现成读数的记录（新增或单次快照）当场读取
fn summarize<'a>(
    rows: impl Iterator<Item = (&'a Arc<ConnectionRecord>, Option<StatsReading>)>,
    config: &WatchConfig,
    stack: &NativeStack,
    lookup: &dyn ProcessLookup,
) -> Vec<ConnectionSummary> {
    rows.filter(|(record, _)| !config.established_only || record.state() == TcpState::Established)
        .map(|(record, stats)| {
            let stats = stats.unwrap_or_else(|| record.stats(stack).read_enabled());
            record.summary_with(stats, record.process(lookup))
        })
        .collect()
}

fn print_summaries(summaries: &[ConnectionSummary], json: bool) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(summaries)?);
        return Ok(());
    }

    println!(
        "{:<3} {:<12} {:<28} {:<28} {:>7}  {}",
        "IP", "STATE", "LOCAL", "REMOTE", "PID", "PROCESS"
    );
    for s in summaries {
        let proto = match s.family {
            AddressFamily::Ipv4 => "V4",
            AddressFamily::Ipv6 => "V6",
        };
        println!(
            "{:<3} {:<12} {:<28} {:<28} {:>7}  {}{}",
            proto,
            s.state.to_string(),
            s.local.to_string(),
            s.remote.to_string(),
            s.pid,
            s.process_name.as_deref().unwrap_or("-"),
            format_stats(&s.stats),
        );
    }
    println!("共 {} 条连接", summaries.len());
    Ok(())
}

fn format_stats(stats: &StatsReading) -> String {
    let mut out = String::new();
    if let Some(data) = &stats.data {
        out.push_str(&format!(
            "  in={}B/{}seg out={}B/{}seg",
            data.data_bytes_in, data.segs_in, data.data_bytes_out, data.segs_out
        ));
    }
    if let Some(bw) = &stats.bandwidth {
        if stats.inbound_bandwidth_enabled {
            out.push_str(&format!("  bw_in={}bps", bw.inbound_bandwidth));
        }
        if stats.outbound_bandwidth_enabled {
            out.push_str(&format!("  bw_out={}bps", bw.outbound_bandwidth));
        }
    }
    if let Some(rtt) = &stats.fine_rtt {
        out.push_str(&format!("  rtt={}..{}us", rtt.min_rtt, rtt.max_rtt));
    }
    out
}
