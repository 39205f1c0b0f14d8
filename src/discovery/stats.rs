//! 发现过程统计

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 第三方发现统计
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveryStats {
    /// 处理过的数据包
    pub packets: u64,
    /// 实际调用分类器的次数
    pub tp_passes: u64,
    /// 因乱序跳过分类器的数据包
    pub out_of_order: u64,
    /// 创建的分类器会话
    pub handles_created: u64,
    /// 释放的分类器会话
    pub handles_released: u64,
    /// 终止次数
    pub terminations: u64,
    /// 重新检查次数
    pub reinspections: u64,
    /// RTMP/RTSP终结解析次数
    pub rtmp_resolutions: u64,
    /// 上次清零时间
    pub since: DateTime<Utc>,
}

impl Default for DiscoveryStats {
    fn default() -> Self {
        Self {
            packets: 0,
            tp_passes: 0,
            out_of_order: 0,
            handles_created: 0,
            handles_released: 0,
            terminations: 0,
            reinspections: 0,
            rtmp_resolutions: 0,
            since: Utc::now(),
        }
    }
}

impl DiscoveryStats {
    /// 创建统计
    pub fn new() -> Self {
        Self::default()
    }

    /// 清零
    pub fn reset(&mut self) {
        *self = Self::default();
    }

    /// 仍由流持有的分类器会话
    pub fn live_handles(&self) -> u64 {
        self.handles_created.saturating_sub(self.handles_released)
    }

    /// 累加另一份统计，用于汇总多个工作线程
    pub fn merge(&mut self, other: &DiscoveryStats) {
        self.packets += other.packets;
        self.tp_passes += other.tp_passes;
        self.out_of_order += other.out_of_order;
        self.handles_created += other.handles_created;
        self.handles_released += other.handles_released;
        self.terminations += other.terminations;
        self.reinspections += other.reinspections;
        self.rtmp_resolutions += other.rtmp_resolutions;
        self.since = self.since.min(other.since);
    }
}
