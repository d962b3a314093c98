//! 프로브 본체
//!
//! - 패킷 인입 (push/pull 두 경로가 하나의 처리 지점으로 합류)
//! - 플로우 테이블 갱신 및 쿼리 실행
//! - 관측 후 들어온 포트로 무변경 전달
//!
//! 테이블과 통계는 단일 태스크가 단독 소유함. 패킷 처리와 쿼리가 같은
//! 커맨드 채널을 지나므로 쿼리는 항상 "패킷 스트림의 어떤 접두사까지
//! 완전히 처리된" 일관 상태를 본다. 테이블에는 락이 없음.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::RwLock;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::packet::{AggregateId, Packet, PacketNo, PortId};
use crate::query::{format_sequence, Request};
use crate::stats::ProbeStats;
use crate::table::FlowTable;
use crate::AGGREGATE_NONE;

/// 전달 채널 수신기 타입 (다운스트림이 받는 (포트, 패킷))
pub type ForwardReceiver = mpsc::Receiver<(PortId, Packet)>;

/// 플로우 은퇴 알림 수신 능력
///
/// NOTIFIER 설정 훅. 현재는 플로우 삭제 정책이 없어서 받아만 두고
/// 호출하지 않음. 나중에 eviction이 생겨도 배선이 깨지지 않도록 유지.
pub trait AggregateNotifier: Send + Sync {
    /// aggregate 하나가 논리적으로 은퇴했을 때 호출됨
    fn aggregate_retired(&self, aggregate: AggregateId);
}

/// 내부 커맨드
enum ProbeCmd {
    Packet(PortId, Packet),
    Request(Request, oneshot::Sender<Result<String>>),
    Stop,
}

/// 프로브 내부 상태 (단일 태스크에서만 접근)
struct ProbeCore {
    config: Config,
    table: FlowTable,
    stats: ProbeStats,
    forward_tx: mpsc::Sender<(PortId, Packet)>,
}

impl ProbeCore {
    fn new(config: Config, forward_tx: mpsc::Sender<(PortId, Packet)>) -> Self {
        Self {
            table: FlowTable::new(config.flow_buckets, config.port_count),
            stats: ProbeStats::new(config.port_count, config.stats_window_size),
            config,
            forward_tx,
        }
    }

    /// 설정 모드에 따라 패킷 번호 읽기
    ///
    /// 음수 모드는 추적 비활성: 항상 0번 슬롯에 기록 (존재 여부 카운터)
    fn packet_number(&self, packet: &Packet) -> PacketNo {
        if self.config.packetno_mode >= 0 {
            packet.header.packetno[self.config.packetno_mode as usize]
        } else {
            0
        }
    }

    /// 패킷 한 개 처리 (인입 경로가 어디든 여기로 합류)
    async fn handle_packet(&mut self, port: PortId, packet: Packet) {
        self.stats.total_packets += 1;
        if let Some(port_stat) = self.stats.port_stats.get_mut(port) {
            port_stat.record_arrival(packet.payload.len());
        }

        let aggregate = packet.header.aggregate;
        if aggregate == AGGREGATE_NONE {
            self.stats.untracked_packets += 1;
        } else {
            let packetno = self.packet_number(&packet);
            let before = self.table.total_flows();

            if let Some(flow) = self.table.find_or_create(aggregate) {
                flow.record(packetno, port);
            }

            if self.table.total_flows() > before {
                self.stats.flows_created += 1;
                debug!("새 플로우 생성: aggregate={}", aggregate);
            }
            self.stats.total_flows = self.table.total_flows();
        }

        // 들어온 포트로 그대로 전달 (폐기/복제/변경 없음)
        let _ = self.forward_tx.send((port, packet)).await;
    }

    /// 쿼리/커맨드 실행
    fn handle_request(&mut self, request: Request) -> Result<String> {
        self.stats.total_queries += 1;
        self.stats.last_query_time = Some(Instant::now());

        match request {
            Request::Clear => {
                self.table.clear_all();
                self.stats.total_flows = 0;
                info!("플로우 테이블 초기화됨");
                Ok(String::new())
            }

            Request::Count => {
                let mut count = 0u64;
                self.table.for_each_flow(|f| count += f.total());
                Ok(format!("{}\n", count))
            }

            Request::Received(aggregate) => Ok(format_sequence(&self.reconstruct(
                aggregate,
                |f| f.received(),
            ))),

            Request::Undelivered(aggregate) => Ok(format_sequence(&self.reconstruct(
                aggregate,
                |f| f.undelivered(),
            ))),
        }
    }

    /// 플로우 스코프 재구성 쿼리 공통 경로
    ///
    /// 읽기 쿼리도 생성형 조회를 그대로 씀: 처음 보는 aggregate면 빈
    /// 플로우가 만들어지고 결과는 빈 목록
    fn reconstruct<F>(&mut self, aggregate: AggregateId, f: F) -> Vec<PacketNo>
    where
        F: FnOnce(&crate::flow::Flow) -> Vec<PacketNo>,
    {
        let before = self.table.total_flows();
        let result = match self.table.find_or_create(aggregate) {
            Some(flow) => f(flow),
            None => Vec::new(),
        };
        if self.table.total_flows() > before {
            self.stats.flows_created += 1;
        }
        self.stats.total_flows = self.table.total_flows();
        result
    }

    /// 종료 처리: 경고 확인 후 테이블 해제
    fn shutdown(&mut self) {
        if self.stats.total_packets > 0 && self.stats.flows_created == 0 {
            // 업스트림이 aggregate 어노테이션을 안 달고 있을 가능성이 큼.
            // 경고만 하고 종료는 막지 않음.
            warn!(
                "aggregate 어노테이션이 달린 패킷을 보지 못함 (packets={})",
                self.stats.total_packets
            );
        }

        self.table.clear_all();
        self.stats.total_flows = 0;
        info!("AFP Probe stopped: {}", self.stats.summary());
    }
}

/// 프로브 핸들 (외부에서 제어용)
pub struct Probe {
    cmd_tx: mpsc::Sender<ProbeCmd>,
    stats: Arc<RwLock<ProbeStats>>,
    running: Arc<AtomicBool>,
    _notifier: Option<Arc<dyn AggregateNotifier>>,
}

impl Probe {
    /// 새 프로브 생성 및 시작
    pub fn start(config: Config) -> Result<(Self, ForwardReceiver)> {
        Self::start_with_notifier(config, None)
    }

    /// NOTIFIER를 받는 시작 경로 (훅은 현재 비활성)
    pub fn start_with_notifier(
        config: Config,
        notifier: Option<Arc<dyn AggregateNotifier>>,
    ) -> Result<(Self, ForwardReceiver)> {
        config.validate()?;

        let (cmd_tx, mut cmd_rx) = mpsc::channel::<ProbeCmd>(config.intake_channel);
        let (forward_tx, forward_rx) = mpsc::channel::<(PortId, Packet)>(config.forward_channel);

        let stats = Arc::new(RwLock::new(ProbeStats::new(
            config.port_count,
            config.stats_window_size,
        )));
        let running = Arc::new(AtomicBool::new(true));

        info!(
            "AFP Probe started: ports={}, packetno_mode={}, buckets={}",
            config.port_count, config.packetno_mode, config.flow_buckets
        );

        let mut core = ProbeCore::new(config, forward_tx);

        // 메인 처리 태스크 (테이블/통계의 유일한 소유자)
        let stats_main = stats.clone();
        let running_main = running.clone();

        tokio::spawn(async move {
            while let Some(cmd) = cmd_rx.recv().await {
                match cmd {
                    ProbeCmd::Packet(port, packet) => {
                        core.handle_packet(port, packet).await;
                    }
                    ProbeCmd::Request(request, reply_tx) => {
                        let _ = reply_tx.send(core.handle_request(request));
                    }
                    ProbeCmd::Stop => {
                        break;
                    }
                }

                // 외부 조회용 스냅샷 갱신
                *stats_main.write() = core.stats.clone();
            }

            core.shutdown();
            *stats_main.write() = core.stats.clone();
            running_main.store(false, Ordering::SeqCst);
        });

        let probe = Self {
            cmd_tx,
            stats,
            running,
            _notifier: notifier,
        };

        Ok((probe, forward_rx))
    }

    /// push 방식 인입 심: 업스트림이 패킷을 밀어 넣음
    pub async fn push(&self, port: PortId, packet: Packet) -> Result<()> {
        self.cmd_tx
            .send(ProbeCmd::Packet(port, packet))
            .await
            .map_err(|_| Error::ProbeStopped)
    }

    /// pull 방식 인입 심: 업스트림 채널에서 끌어와 동일 인입 지점으로 합류
    ///
    /// 카운팅 로직이 복제되지 않도록 push와 같은 커맨드로 변환만 함
    pub fn attach_source(&self, port: PortId, mut source: mpsc::Receiver<Packet>) {
        let cmd_tx = self.cmd_tx.clone();
        tokio::spawn(async move {
            while let Some(packet) = source.recv().await {
                if cmd_tx.send(ProbeCmd::Packet(port, packet)).await.is_err() {
                    break;
                }
            }
        });
    }

    /// 쿼리/커맨드 실행 (처리 태스크에서 실행되어 일관 상태를 봄)
    pub async fn query(&self, request: Request) -> Result<String> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.cmd_tx
            .send(ProbeCmd::Request(request, reply_tx))
            .await
            .map_err(|_| Error::ProbeStopped)?;
        reply_rx.await.map_err(|_| Error::ChannelError)?
    }

    /// 텍스트 경계용 쿼리 (이름 + 인자 문자열)
    pub async fn query_text(&self, name: &str, arg: &str) -> Result<String> {
        self.query(Request::parse(name, arg)?).await
    }

    /// 정지 (종료 처리 완료 후 태스크 종료)
    pub async fn stop(&self) {
        let _ = self.cmd_tx.send(ProbeCmd::Stop).await;
    }

    /// 통계 스냅샷 반환
    pub fn stats(&self) -> ProbeStats {
        self.stats.read().clone()
    }

    /// 실행 중 여부
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use tokio::time::{sleep, Duration};

    fn packet(aggregate: AggregateId, packetno: PacketNo, port: u8) -> Packet {
        Packet::new(aggregate, [packetno, 0], port, Bytes::from_static(b"pl"))
    }

    async fn settle() {
        // 커맨드 채널이 비워질 시간 (쿼리가 같은 채널을 지나므로 사실 불필요하지만
        // stop 이후 상태 확인용)
        sleep(Duration::from_millis(20)).await;
    }

    #[tokio::test]
    async fn test_count_equals_record_calls() {
        let (probe, _fwd) = Probe::start(Config::delivery_probe()).unwrap();

        for _ in 0..3 {
            probe.push(0, packet(5, 3, 0)).await.unwrap();
        }
        probe.push(1, packet(5, 3, 1)).await.unwrap();

        assert_eq!(probe.query_text("count", "").await.unwrap(), "4\n");
        assert_eq!(probe.query_text("received", "5").await.unwrap(), "3\n");
        assert_eq!(probe.query_text("undelivered", "5").await.unwrap(), "3\n");
    }

    #[tokio::test]
    async fn test_equal_counts_not_undelivered() {
        let (probe, _fwd) = Probe::start(Config::delivery_probe()).unwrap();

        probe.push(0, packet(7, 0, 0)).await.unwrap();
        probe.push(1, packet(7, 0, 1)).await.unwrap();

        assert_eq!(probe.query_text("undelivered", "7").await.unwrap(), "");
        assert_eq!(probe.query_text("received", "7").await.unwrap(), "0\n");
    }

    #[tokio::test]
    async fn test_zero_aggregate_counted_but_untracked() {
        let (probe, mut fwd) = Probe::start(Config::delivery_probe()).unwrap();

        probe.push(0, packet(0, 9, 0)).await.unwrap();

        // 전달은 됨 (투명 통과)
        let (port, forwarded) = fwd.recv().await.unwrap();
        assert_eq!(port, 0);
        assert_eq!(forwarded.header.aggregate, 0);

        assert_eq!(probe.query_text("count", "").await.unwrap(), "0\n");

        let stats = probe.stats();
        assert_eq!(stats.total_packets, 1);
        assert_eq!(stats.untracked_packets, 1);
        assert_eq!(stats.flows_created, 0);
    }

    #[tokio::test]
    async fn test_distinct_aggregates_make_distinct_flows() {
        let (probe, _fwd) = Probe::start(Config::delivery_probe()).unwrap();

        for agg in [3u32, 3, 9, 12, 9] {
            probe.push(0, packet(agg, 0, 0)).await.unwrap();
        }
        // 쿼리 응답 시점에는 앞선 패킷이 전부 처리된 상태
        let _ = probe.query_text("count", "").await.unwrap();

        let stats = probe.stats();
        assert_eq!(stats.total_flows, 3);
        assert_eq!(stats.flows_created, 3);
    }

    #[tokio::test]
    async fn test_clear_idempotent() {
        let (probe, _fwd) = Probe::start(Config::delivery_probe()).unwrap();

        probe.push(0, packet(5, 1, 0)).await.unwrap();
        assert_eq!(probe.query_text("count", "").await.unwrap(), "1\n");

        probe.query_text("clear", "").await.unwrap();
        assert_eq!(probe.query_text("count", "").await.unwrap(), "0\n");

        // 연속 clear, 빈 상태 clear 모두 성공
        probe.query_text("clear", "").await.unwrap();
        assert_eq!(probe.query_text("count", "").await.unwrap(), "0\n");

        // total_packets는 수명 카운터라 clear에 영향받지 않음
        assert_eq!(probe.stats().total_packets, 1);
    }

    #[tokio::test]
    async fn test_unseen_aggregate_yields_empty_not_error() {
        let (probe, _fwd) = Probe::start(Config::delivery_probe()).unwrap();

        assert_eq!(probe.query_text("received", "999").await.unwrap(), "");
        assert_eq!(probe.query_text("undelivered", "999").await.unwrap(), "");
    }

    #[tokio::test]
    async fn test_parse_error_does_not_touch_state() {
        let (probe, _fwd) = Probe::start(Config::delivery_probe()).unwrap();

        probe.push(0, packet(5, 0, 0)).await.unwrap();
        assert!(probe.query_text("received", "abc").await.is_err());
        assert!(probe.query_text("nonsense", "").await.is_err());

        assert_eq!(probe.query_text("count", "").await.unwrap(), "1\n");
    }

    #[tokio::test]
    async fn test_presence_only_mode_records_slot_zero() {
        let (probe, _fwd) = Probe::start(Config::presence_only()).unwrap();

        // 패킷 번호가 제각각이어도 전부 번호 0으로 기록됨
        probe.push(0, packet(4, 11, 0)).await.unwrap();
        probe.push(0, packet(4, 99, 0)).await.unwrap();
        probe.push(1, packet(4, 42, 1)).await.unwrap();

        assert_eq!(probe.query_text("received", "4").await.unwrap(), "0\n");
        assert_eq!(probe.query_text("count", "").await.unwrap(), "3\n");
    }

    #[tokio::test]
    async fn test_second_slot_mode() {
        let (probe, _fwd) = Probe::start(Config::second_slot()).unwrap();

        let pkt = Packet::new(6, [1, 8], 0, Bytes::from_static(b"x"));
        probe.push(0, pkt).await.unwrap();

        assert_eq!(probe.query_text("received", "6").await.unwrap(), "8\n");
    }

    #[tokio::test]
    async fn test_invalid_config_rejected_at_start() {
        let config = Config {
            packetno_mode: 2,
            ..Config::default()
        };
        assert!(Probe::start(config).is_err());
    }

    #[tokio::test]
    async fn test_forward_unchanged_same_port() {
        let (probe, mut fwd) = Probe::start(Config::delivery_probe()).unwrap();

        let original = Packet::new(5, [3, 0], 1, Bytes::from_static(b"payload"));
        probe.push(1, original.clone()).await.unwrap();

        let (port, forwarded) = fwd.recv().await.unwrap();
        assert_eq!(port, 1);
        assert_eq!(forwarded.payload, original.payload);
        assert_eq!(forwarded.header.crc32, original.header.crc32);
        assert!(forwarded.verify_crc());
    }

    #[tokio::test]
    async fn test_pull_source_converges_with_push() {
        let (probe, _fwd) = Probe::start(Config::delivery_probe()).unwrap();

        // pull 심: 업스트림 채널에 쌓인 패킷을 끌어옴
        let (source_tx, source_rx) = mpsc::channel(16);
        probe.attach_source(1, source_rx);

        probe.push(0, packet(5, 0, 0)).await.unwrap();
        source_tx.send(packet(5, 0, 1)).await.unwrap();
        drop(source_tx);
        settle().await;

        assert_eq!(probe.query_text("count", "").await.unwrap(), "2\n");
        assert_eq!(probe.query_text("undelivered", "5").await.unwrap(), "");
    }

    #[tokio::test]
    async fn test_replay_after_clear_is_deterministic() {
        use rand::{rngs::StdRng, Rng, SeedableRng};

        let (probe, _fwd) = Probe::start(Config::delivery_probe()).unwrap();

        let mut rng = StdRng::seed_from_u64(0xAF9);
        let stream: Vec<(AggregateId, PacketNo, PortId)> = (0..200)
            .map(|_| {
                (
                    rng.gen_range(0..8u32),
                    rng.gen_range(0..32u32),
                    rng.gen_range(0..2usize),
                )
            })
            .collect();

        let first = run_stream(&probe, &stream).await;
        probe.query_text("clear", "").await.unwrap();
        let second = run_stream(&probe, &stream).await;

        assert_eq!(first, second);
    }

    async fn run_stream(probe: &Probe, stream: &[(AggregateId, PacketNo, PortId)]) -> Vec<String> {
        for &(agg, no, port) in stream {
            probe.push(port, packet(agg, no, port as u8)).await.unwrap();
        }
        let mut outputs = vec![probe.query_text("count", "").await.unwrap()];
        for agg in 1..8u32 {
            outputs.push(probe.query_text("received", &agg.to_string()).await.unwrap());
            outputs.push(
                probe
                    .query_text("undelivered", &agg.to_string())
                    .await
                    .unwrap(),
            );
        }
        outputs
    }

    #[tokio::test]
    async fn test_stop_finishes_task() {
        let (probe, _fwd) = Probe::start(Config::delivery_probe()).unwrap();
        assert!(probe.is_running());

        probe.stop().await;
        settle().await;

        assert!(!probe.is_running());
        assert!(probe.push(0, packet(1, 0, 0)).await.is_err());
    }
}
