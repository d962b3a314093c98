//! 프로브 통계

use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// 패킷 도착 기록
#[derive(Debug, Clone, Copy)]
struct PacketArrival {
    timestamp: Instant,
    size: usize,
}

/// 포트별 통계
#[derive(Debug, Clone)]
pub struct PortStats {
    /// 포트 인덱스
    pub port: usize,

    /// 최근 패킷 도착 기록
    arrivals: VecDeque<PacketArrival>,

    /// 윈도우 크기
    window_size: usize,

    /// 총 관측 패킷 수
    pub total_packets: u64,

    /// 총 관측 바이트
    pub total_bytes: u64,

    /// 마지막 업데이트 시간
    last_update: Instant,
}

impl PortStats {
    pub fn new(port: usize, window_size: usize) -> Self {
        Self {
            port,
            arrivals: VecDeque::with_capacity(window_size),
            window_size,
            total_packets: 0,
            total_bytes: 0,
            last_update: Instant::now(),
        }
    }

    /// 패킷 도착 기록
    pub fn record_arrival(&mut self, size: usize) {
        let now = Instant::now();

        if self.arrivals.len() >= self.window_size {
            self.arrivals.pop_front();
        }

        self.arrivals.push_back(PacketArrival {
            timestamp: now,
            size,
        });

        self.total_packets += 1;
        self.total_bytes += size as u64;
        self.last_update = now;
    }

    /// 패킷 도착률 계산 (packets/sec)
    pub fn arrival_rate(&self) -> f64 {
        if self.arrivals.len() < 2 {
            return 0.0;
        }

        let first = self.arrivals.front().unwrap().timestamp;
        let last = self.arrivals.back().unwrap().timestamp;
        let duration = last.duration_since(first);

        if duration.is_zero() {
            return 0.0;
        }

        (self.arrivals.len() - 1) as f64 / duration.as_secs_f64()
    }

    /// 바이트 처리율 계산 (bytes/sec)
    pub fn throughput(&self) -> f64 {
        if self.arrivals.len() < 2 {
            return 0.0;
        }

        let first = self.arrivals.front().unwrap().timestamp;
        let last = self.arrivals.back().unwrap().timestamp;
        let duration = last.duration_since(first);

        if duration.is_zero() {
            return 0.0;
        }

        let total_size: usize = self.arrivals.iter().map(|a| a.size).sum();
        total_size as f64 / duration.as_secs_f64()
    }

    /// 통계 리셋
    pub fn reset(&mut self) {
        self.arrivals.clear();
        self.total_packets = 0;
        self.total_bytes = 0;
        self.last_update = Instant::now();
    }
}

/// 프로브 전체 통계
#[derive(Debug, Clone)]
pub struct ProbeStats {
    /// 시작 시간
    pub start_time: Instant,

    /// 총 관측 패킷 수 (aggregate 0 포함, clear에도 유지되는 수명 카운터)
    pub total_packets: u64,

    /// aggregate 0 (추적 안 함) 패킷 수
    pub untracked_packets: u64,

    /// 수명 누적 생성 플로우 수 (clear에도 유지, 종료 경고 판정용)
    pub flows_created: u64,

    /// 현재 살아 있는 플로우 수 (테이블 스냅샷)
    pub total_flows: u64,

    /// 처리한 쿼리 수
    pub total_queries: u64,

    /// 마지막 쿼리 시간
    pub last_query_time: Option<Instant>,

    /// 포트별 통계
    pub port_stats: Vec<PortStats>,
}

impl ProbeStats {
    pub fn new(port_count: usize, window_size: usize) -> Self {
        Self {
            start_time: Instant::now(),
            total_packets: 0,
            untracked_packets: 0,
            flows_created: 0,
            total_flows: 0,
            total_queries: 0,
            last_query_time: None,
            port_stats: (0..port_count)
                .map(|p| PortStats::new(p, window_size))
                .collect(),
        }
    }

    /// 경과 시간
    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// 전체 패킷 처리율 (packets/sec)
    pub fn overall_packet_rate(&self) -> f64 {
        let elapsed = self.elapsed().as_secs_f64();
        if elapsed == 0.0 {
            return 0.0;
        }
        self.total_packets as f64 / elapsed
    }

    /// 추적 패킷 비율 (aggregate != 0)
    pub fn tracked_ratio(&self) -> f64 {
        if self.total_packets == 0 {
            return 0.0;
        }
        (self.total_packets - self.untracked_packets) as f64 / self.total_packets as f64
    }

    /// 통계 요약 문자열
    pub fn summary(&self) -> String {
        format!(
            "Elapsed: {:.2}s | Packets: {} ({} untracked) | Flows: {} live / {} created | Rate: {:.0} pkt/s | Queries: {}",
            self.elapsed().as_secs_f64(),
            self.total_packets,
            self.untracked_packets,
            self.total_flows,
            self.flows_created,
            self.overall_packet_rate(),
            self.total_queries,
        )
    }
}

impl Default for ProbeStats {
    fn default() -> Self {
        Self::new(1, 100)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_port_stats_window() {
        let mut stats = PortStats::new(0, 4);
        for _ in 0..10 {
            stats.record_arrival(100);
        }

        assert_eq!(stats.total_packets, 10);
        assert_eq!(stats.total_bytes, 1000);
        assert!(stats.arrivals.len() <= 4);
    }

    #[test]
    fn test_tracked_ratio() {
        let mut stats = ProbeStats::new(2, 100);
        stats.total_packets = 10;
        stats.untracked_packets = 4;
        assert!((stats.tracked_ratio() - 0.6).abs() < 1e-9);
    }

    #[test]
    fn test_summary_contains_counts() {
        let mut stats = ProbeStats::new(2, 100);
        stats.total_packets = 3;
        stats.flows_created = 2;
        let summary = stats.summary();
        assert!(summary.contains("Packets: 3"));
        assert!(summary.contains("2 created"));
    }
}
