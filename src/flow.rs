//! 플로우: aggregate 하나에 대한 포트별 카운터
//!
//! counts[port][packetno] = 해당 포트에서 그 패킷 번호가 관측된 횟수
//! 할당되지 않은 슬롯은 암묵적으로 0

use crate::packet::{AggregateId, PacketNo, PortId};

/// 플로우 상태 (포트별 가변 길이 카운터 벡터)
#[derive(Debug)]
pub struct Flow {
    /// aggregate ID (0이 아님)
    aggregate: AggregateId,

    /// 포트별 카운터 (패킷 번호 인덱스, 필요 시 0 채움 확장)
    counts: Vec<Vec<u32>>,
}

impl Flow {
    /// 새 플로우 생성 (포트 수만큼 빈 카운터 벡터)
    pub fn new(aggregate: AggregateId, ports: usize) -> Self {
        Self {
            aggregate,
            counts: vec![Vec::new(); ports],
        }
    }

    /// aggregate ID 반환
    pub fn aggregate(&self) -> AggregateId {
        self.aggregate
    }

    /// 포트 수 반환
    pub fn port_count(&self) -> usize {
        self.counts.len()
    }

    /// 관측 기록: 카운터 벡터를 0 채움 확장 후 해당 슬롯 증가
    ///
    /// 패킷 번호 상한은 없음 (소스가 주는 만큼 자람)
    pub fn record(&mut self, packetno: PacketNo, port: PortId) {
        let column = &mut self.counts[port];
        let idx = packetno as usize;
        if column.len() <= idx {
            column.resize(idx + 1, 0);
        }
        column[idx] += 1;
    }

    /// 한 포트의 전체 관측 횟수 합
    pub fn column_total(&self, port: PortId) -> u64 {
        self.counts[port].iter().map(|&c| c as u64).sum()
    }

    /// 모든 포트 합산 관측 횟수
    pub fn total(&self) -> u64 {
        (0..self.counts.len()).map(|p| self.column_total(p)).sum()
    }

    /// received 집합: 어느 포트에서든 한 번이라도 관측된 패킷 번호
    ///
    /// 합집합 (합산 아님). 오름차순, 중복 없음.
    pub fn received(&self) -> Vec<PacketNo> {
        let max_len = self.counts.iter().map(|c| c.len()).max().unwrap_or(0);

        let mut v = Vec::new();
        for packetno in 0..max_len {
            for column in &self.counts {
                if packetno < column.len() && column[packetno] != 0 {
                    v.push(packetno as PacketNo);
                    break;
                }
            }
        }
        v
    }

    /// undelivered 집합: 출발(포트 0) 횟수가 도착 확인(포트 1) 횟수를 넘는 패킷 번호
    ///
    /// 두 벡터 겹침 구간에서는 counts[0] > counts[1],
    /// 포트 1 길이 밖에서는 counts[0] != 0 이면 미전달로 본다.
    /// 포트가 2개 미만인 구성에서 부르는 건 배선 오류 (fail fast).
    pub fn undelivered(&self) -> Vec<PacketNo> {
        assert!(self.counts.len() >= 2, "undelivered requires >= 2 ports");

        let departures = &self.counts[0];
        let arrivals = &self.counts[1];
        let overlap = departures.len().min(arrivals.len());

        let mut v = Vec::new();
        for packetno in 0..overlap {
            if departures[packetno] > arrivals[packetno] {
                v.push(packetno as PacketNo);
            }
        }
        for packetno in overlap..departures.len() {
            if departures[packetno] != 0 {
                v.push(packetno as PacketNo);
            }
        }
        v
    }
}
