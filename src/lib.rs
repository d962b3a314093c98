//! # AFP (Aggregate Flow Probe)
//!
//! 패킷 파이프라인 안에 삽입되는 투명 인라인 관측 프로브
//!
//! ## 핵심 특징
//! - **투명 통과**: 패킷을 변경/폐기하지 않고 들어온 포트로 그대로 전달
//! - **플로우별 카운팅**: aggregate ID + 패킷 번호 기준 포트별 관측 횟수 누적
//! - **수신 재구성**: 어떤 패킷 번호가 관측되었는지 (received) 복원
//! - **미전달 재구성**: 출발(포트 0) 대비 도착(포트 1) 확인이 없는 번호 (undelivered) 복원
//! - **단일 컨텍스트**: 패킷 처리와 쿼리가 같은 태스크에서 실행, 락 없는 테이블
//! - **트레이스 재생**: 기록된 패킷 트레이스를 타이밍 포함 재생 가능

pub mod config;
pub mod error;
pub mod flow;
pub mod packet;
pub mod probe;
pub mod query;
pub mod stats;
pub mod table;

pub use config::Config;
pub use error::{Error, Result};
pub use flow::Flow;
pub use packet::{AggregateId, Packet, PacketHeader, PacketNo, PortId};
pub use probe::{AggregateNotifier, ForwardReceiver, Probe};
pub use query::{QueryMessage, Request, ResponseMessage};
pub use stats::ProbeStats;
pub use table::FlowTable;

/// 프로토콜/트레이스 포맷 버전
pub const FORMAT_VERSION: u8 = 1;

/// 매직 넘버 (메시지/트레이스 식별용)
pub const MAGIC_NUMBER: u32 = 0x41465001; // "AFP" + 1

/// 플로우 테이블 버킷 수 (2의 거듭제곱)
pub const FLOW_BUCKETS: usize = 256;

/// "추적 안 함"을 뜻하는 예약 aggregate ID
pub const AGGREGATE_NONE: u32 = 0;
