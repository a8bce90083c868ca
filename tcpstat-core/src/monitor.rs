//! 实时连接集合与快照对账
//!
//! 每次刷新重新枚举连接表，与已有集合按身份对账：
//! 已有连接保留原实例并重新读取统计，消失的移除，新出现的追加到末尾。

use crate::estats::StatsReading;
use crate::native::NativeStack;
use crate::record::ConnectionRecord;
use crate::table::enumerate;
use crate::{Result, TcpState};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tracing::debug;

pub use crate::estats::ChangedField;

/// 一条被保留连接的刷新结果
#[derive(Debug, Clone)]
pub struct RecordDelta {
    pub record: Arc<ConnectionRecord>,
    pub changed: Vec<ChangedField>,
    pub stats: StatsReading,
}

/// 一次刷新的变化
#[derive(Debug, Clone, Default)]
pub struct RefreshReport {
    pub updated: Vec<RecordDelta>,
    pub added: Vec<Arc<ConnectionRecord>>,
    pub removed: Vec<Arc<ConnectionRecord>>,
}

impl RefreshReport {
    /// 集合成员是否发生变化
    pub fn has_churn(&self) -> bool {
        !self.added.is_empty() || !self.removed.is_empty()
    }
}

/// 外部持有的实时连接集合（有序）
#[derive(Debug, Default)]
pub struct ConnectionTable {
    records: Vec<Arc<ConnectionRecord>>,
}

impl ConnectionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// 获取当前快照
    pub fn capture(stack: &NativeStack) -> Result<Self> {
        Ok(Self::from_records(enumerate(stack)?))
    }

    pub fn from_records(records: Vec<ConnectionRecord>) -> Self {
        Self {
            records: records.into_iter().map(Arc::new).collect(),
        }
    }

    pub fn records(&self) -> &[Arc<ConnectionRecord>] {
        &self.records
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<ConnectionRecord>> {
        self.records.iter()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// 原地刷新
    ///
    /// 枚举失败时直接返回错误，集合保持不变。
    pub fn refresh(&mut self, stack: &NativeStack) -> Result<RefreshReport> {
        let fresh = enumerate(stack)?;
        Ok(self.reconcile(fresh, stack))
    }

    /// 用已获取的新快照对账
    pub fn reconcile(&mut self, fresh: Vec<ConnectionRecord>, stack: &NativeStack) -> RefreshReport {
        let mut report = RefreshReport::default();
        let mut consumed = vec![false; fresh.len()];
        let mut keep = Vec::with_capacity(self.records.len());

        {
            // 相同身份的新记录按出现顺序排队，每条已有记录只消费第一条
            let mut index: HashMap<&ConnectionRecord, VecDeque<usize>> = HashMap::new();
            for (i, record) in fresh.iter().enumerate() {
                index.entry(record).or_default().push_back(i);
            }

            for live in &self.records {
                match index.get_mut(&**live).and_then(|q| q.pop_front()) {
                    Some(i) => {
                        consumed[i] = true;
                        let stats = live.stats(stack).read_enabled();
                        report.updated.push(RecordDelta {
                            record: Arc::clone(live),
                            changed: stats.changed_fields(),
                            stats,
                        });
                        keep.push(true);
                    }
                    None => keep.push(false),
                }
            }
        }

        for (record, used) in fresh.into_iter().zip(consumed) {
            if !used {
                let record = Arc::new(record);
                report.added.push(Arc::clone(&record));
                self.records.push(record);
            }
        }

        // 追加的记录在 keep 之外，全部保留
        let mut position = 0;
        let removed = &mut report.removed;
        self.records.retain(|record| {
            let retained = keep.get(position).copied().unwrap_or(true);
            position += 1;
            if !retained {
                removed.push(Arc::clone(record));
            }
            retained
        });

        debug!(
            "对账完成: 保留 {}, 新增 {}, 移除 {}",
            report.updated.len(),
            report.added.len(),
            report.removed.len()
        );
        report
    }

    /// 按状态统计连接数
    pub fn state_counts(&self) -> HashMap<TcpState, usize> {
        calculate_stats(&self.records)
    }
}

/// 连接统计工具函数
pub fn calculate_stats<R: AsRef<ConnectionRecord>>(records: &[R]) -> HashMap<TcpState, usize> {
    let mut stats = HashMap::new();
    for record in records {
        *stats.entry(record.as_ref().state()).or_insert(0) += 1;
    }
    stats
}
