//! 플로우 테이블
//!
//! 2의 거듭제곱 개수의 버킷으로 해시 분할된 플로우 저장소.
//! 버킷 안은 최근 접근 순서 체인이며 조회 성공 시 맨 앞으로 이동
//! (활성 플로우 반복 접근을 O(1) 수준으로 만드는 recency 편향 선형 탐색).

use crate::flow::Flow;
use crate::packet::AggregateId;
use crate::AGGREGATE_NONE;

/// 플로우 테이블 (모든 Flow의 단독 소유자)
#[derive(Debug)]
pub struct FlowTable {
    /// 버킷 체인 (맨 앞 = 가장 최근 접근)
    buckets: Vec<Vec<Flow>>,

    /// 버킷 인덱스 마스크 (buckets.len() - 1)
    bucket_mask: usize,

    /// 플로우 생성 시 카운터 벡터를 만들 포트 수
    port_count: usize,

    /// 현재 살아 있는 플로우 수 (clear 시 0으로 리셋)
    total_flows: u64,
}

impl FlowTable {
    /// 새 테이블 생성
    ///
    /// buckets는 2의 거듭제곱이어야 함 (Config::validate가 보장)
    pub fn new(buckets: usize, port_count: usize) -> Self {
        debug_assert!(buckets.is_power_of_two());
        Self {
            buckets: (0..buckets).map(|_| Vec::new()).collect(),
            bucket_mask: buckets - 1,
            port_count,
            total_flows: 0,
        }
    }

    /// 살아 있는 플로우 수
    pub fn total_flows(&self) -> u64 {
        self.total_flows
    }

    /// 조회-또는-생성
    ///
    /// - aggregate 0은 "플로우 없음" 예약값이라 항상 None
    /// - 조회 성공 시 해당 플로우를 버킷 맨 앞으로 이동
    /// - 없으면 새로 만들어 맨 앞에 삽입 (읽기 쿼리도 같은 경로 사용,
    ///   빈 플로우는 빈 결과를 낳으므로 무해)
    pub fn find_or_create(&mut self, aggregate: AggregateId) -> Option<&mut Flow> {
        if aggregate == AGGREGATE_NONE {
            return None;
        }

        let bucket_idx = (aggregate as usize) & self.bucket_mask;
        let bucket = &mut self.buckets[bucket_idx];

        match bucket.iter().position(|f| f.aggregate() == aggregate) {
            Some(0) => {}
            Some(pos) => {
                // move-to-front
                let flow = bucket.remove(pos);
                bucket.insert(0, flow);
            }
            None => {
                bucket.insert(0, Flow::new(aggregate, self.port_count));
                self.total_flows += 1;
            }
        }

        bucket.first_mut()
    }

    /// 전체 플로우 삭제
    ///
    /// 플로우 상태만 지움. 수명 누적 패킷 카운터는 여기서 건드리지 않음.
    pub fn clear_all(&mut self) {
        for bucket in &mut self.buckets {
            bucket.clear();
        }
        self.total_flows = 0;
    }

    /// 전체 플로우 열거 (집계 쿼리용)
    pub fn for_each_flow<F: FnMut(&Flow)>(&self, mut f: F) {
        for bucket in &self.buckets {
            for flow in bucket {
                f(flow);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_aggregate_never_creates() {
        let mut table = FlowTable::new(16, 2);
        assert!(table.find_or_create(0).is_none());
        assert_eq!(table.total_flows(), 0);
    }

    #[test]
    fn test_find_or_create_is_idempotent_per_aggregate() {
        let mut table = FlowTable::new(16, 2);
        table.find_or_create(5).unwrap();
        table.find_or_create(5).unwrap();
        table.find_or_create(7).unwrap();

        assert_eq!(table.total_flows(), 2);
    }

    #[test]
    fn test_move_to_front_on_hit() {
        let mut table = FlowTable::new(16, 2);
        // 16 버킷에서 1, 17, 33은 같은 버킷에 떨어짐
        table.find_or_create(1).unwrap();
        table.find_or_create(17).unwrap();
        table.find_or_create(33).unwrap();

        // 1을 다시 조회하면 맨 앞으로
        table.find_or_create(1).unwrap();
        assert_eq!(table.buckets[1][0].aggregate(), 1);
        assert_eq!(table.buckets[1].len(), 3);
        assert_eq!(table.total_flows(), 3);
    }

    #[test]
    fn test_clear_all_idempotent() {
        let mut table = FlowTable::new(16, 2);
        table.find_or_create(3).unwrap();
        table.find_or_create(4).unwrap();

        table.clear_all();
        assert_eq!(table.total_flows(), 0);

        // 빈 상태에서 다시 불러도 실패하지 않음
        table.clear_all();
        assert_eq!(table.total_flows(), 0);

        let mut seen = 0;
        table.for_each_flow(|_| seen += 1);
        assert_eq!(seen, 0);
    }

    #[test]
    fn test_for_each_flow_visits_all() {
        let mut table = FlowTable::new(16, 2);
        for agg in 1..=10u32 {
            let flow = table.find_or_create(agg).unwrap();
            flow.record(0, 0);
        }

        let mut total = 0u64;
        table.for_each_flow(|f| total += f.total());
        assert_eq!(total, 10);
    }
}
