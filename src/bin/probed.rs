//! AFP 프로브 데몬 - Aggregate Flow Probe
//!
//! 인라인 관측 프로브를 UDP 경계로 노출하는 데몬
//! - 데이터 소켓: 어노테이션 달린 패킷 프레임 수신, 관측 후 다운스트림 전달
//! - 제어 소켓: clear / count / received / undelivered 쿼리 처리
//!
//! 사용법:
//!   cargo run --release --bin afp-probed -- [OPTIONS]
//!
//! 예시:
//!   # 기본 실행
//!   cargo run --release --bin afp-probed -- --data 0.0.0.0:9100 --control 0.0.0.0:9101
//!
//!   # 다운스트림 전달 + 패킷 번호 추적 비활성
//!   cargo run --release --bin afp-probed -- --downstream 10.0.0.2:9100 --packetno -1

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::UdpSocket;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use afp::packet::Packet;
use afp::query::{MessageType, QueryMessage, ResponseMessage};
use afp::{Config, Probe};

/// 데몬 설정
struct DaemonConfig {
    data_addr: SocketAddr,
    control_addr: SocketAddr,
    downstream_addr: Option<SocketAddr>,
    config: Config,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            data_addr: "0.0.0.0:9100".parse().unwrap(),
            control_addr: "0.0.0.0:9101".parse().unwrap(),
            downstream_addr: None,
            config: Config::default(),
        }
    }
}

fn parse_args() -> DaemonConfig {
    let args: Vec<String> = std::env::args().collect();
    let mut config = DaemonConfig::default();

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--data" | "-d" => {
                if i + 1 < args.len() {
                    config.data_addr = args[i + 1].parse().expect("유효한 주소 필요");
                    i += 1;
                }
            }
            "--control" | "-c" => {
                if i + 1 < args.len() {
                    config.control_addr = args[i + 1].parse().expect("유효한 주소 필요");
                    i += 1;
                }
            }
            "--downstream" => {
                if i + 1 < args.len() {
                    config.downstream_addr = Some(args[i + 1].parse().expect("유효한 주소 필요"));
                    i += 1;
                }
            }
            "--ports" => {
                if i + 1 < args.len() {
                    config.config.port_count = args[i + 1].parse().expect("유효한 숫자 필요");
                    i += 1;
                }
            }
            "--packetno" => {
                if i + 1 < args.len() {
                    config.config.packetno_mode = args[i + 1].parse().expect("유효한 숫자 필요");
                    i += 1;
                }
            }
            "--help" | "-h" => {
                println!(
                    r#"AFP Probed - Aggregate Flow Probe 데몬

패킷 파이프라인 인라인 관측 프로브
- 플로우별/포트별 패킷 번호 관측 횟수 누적
- received / undelivered 재구성 쿼리 제공
- 패킷은 변경 없이 다운스트림으로 전달

사용법:
  cargo run --release --bin afp-probed -- [OPTIONS]

옵션:
  -d, --data <ADDR>       데이터 소켓 주소 (기본: 0.0.0.0:9100)
  -c, --control <ADDR>    제어 소켓 주소 (기본: 0.0.0.0:9101)
  --downstream <ADDR>     전달 대상 주소 (없으면 관측만 하고 버림)
  --ports <N>             포트 수 (기본: 2)
  --packetno <MODE>       패킷 번호 모드 -1/0/1 (기본: 0)
  -h, --help              이 도움말 출력

예시:
  # 2 포트 전달 확인 프로브
  cargo run --release --bin afp-probed -- --data 0.0.0.0:9100 --control 0.0.0.0:9101

  # 존재 여부 카운터로만 사용
  cargo run --release --bin afp-probed -- --packetno -1
"#
                );
                std::process::exit(0);
            }
            _ => {}
        }
        i += 1;
    }

    config
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 로깅 설정
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let daemon_config = parse_args();

    info!("AFP Probed starting...");
    info!("Data socket: {}", daemon_config.data_addr);
    info!("Control socket: {}", daemon_config.control_addr);
    info!("Ports: {}", daemon_config.config.port_count);
    info!("Packetno mode: {}", daemon_config.config.packetno_mode);

    // 프로브 시작 (설정 검증 실패는 여기서 전체 중단)
    let port_count = daemon_config.config.port_count;
    let (probe, mut forward_rx) = Probe::start(daemon_config.config)?;
    let probe = Arc::new(probe);

    // 소켓 바인딩
    let data_socket = Arc::new(UdpSocket::bind(daemon_config.data_addr).await?);
    let control_socket = Arc::new(UdpSocket::bind(daemon_config.control_addr).await?);
    info!("Probe listening on {}", daemon_config.data_addr);

    // ─────────────────────────────────────────────────────────────────
    // 전달 태스크: 관측 끝난 패킷을 다운스트림으로
    // ─────────────────────────────────────────────────────────────────
    let downstream = daemon_config.downstream_addr;
    let forward_socket = data_socket.clone();

    tokio::spawn(async move {
        while let Some((_port, packet)) = forward_rx.recv().await {
            if let Some(addr) = downstream {
                let _ = forward_socket.send_to(&packet.to_bytes(), addr).await;
            }
        }
    });

    // ─────────────────────────────────────────────────────────────────
    // 데이터 수신 태스크: 패킷 프레임 -> 프로브 인입
    // ─────────────────────────────────────────────────────────────────
    let data_probe = probe.clone();
    let data_recv_socket = data_socket.clone();

    tokio::spawn(async move {
        let mut buf = vec![0u8; 65535];

        loop {
            match data_recv_socket.recv_from(&mut buf).await {
                Ok((len, _addr)) => {
                    let Some(packet) = Packet::from_bytes(&buf[..len]) else {
                        warn!("손상된 패킷 프레임 무시 ({} bytes)", len);
                        continue;
                    };
                    if !packet.verify_crc() {
                        warn!("CRC 불일치 패킷 무시: aggregate={}", packet.header.aggregate);
                        continue;
                    }

                    // 포트 인덱스는 패킷 어노테이션에서 읽음
                    let port = (packet.header.port as usize).min(port_count - 1);
                    if data_probe.push(port, packet).await.is_err() {
                        break;
                    }
                }
                Err(e) => {
                    warn!("데이터 수신 에러: {}", e);
                }
            }
        }
    });

    // ─────────────────────────────────────────────────────────────────
    // 제어 루프: 쿼리 처리
    // ─────────────────────────────────────────────────────────────────
    let mut buf = vec![0u8; 65535];

    loop {
        let (len, addr) = control_socket.recv_from(&mut buf).await?;

        // Close 메시지 확인 (헤더만 보고 판단)
        if let Ok(header) = bincode::deserialize::<afp::query::MessageHeader>(&buf[..len]) {
            if header.magic == afp::MAGIC_NUMBER && header.msg_type == MessageType::Close {
                info!("Close received from {}", addr);
                break;
            }
        }

        let Some(query) = QueryMessage::from_bytes(&buf[..len]) else {
            warn!("손상된 제어 메시지 무시 ({} bytes from {})", len, addr);
            continue;
        };

        let response = match probe.query_text(&query.name, &query.arg).await {
            Ok(body) => ResponseMessage::success(body),
            Err(e) => {
                warn!("쿼리 실패: {} {:?} -> {}", query.name, query.arg, e);
                ResponseMessage::failure(e.to_string())
            }
        };

        let _ = control_socket.send_to(&response.to_bytes(), addr).await;
    }

    // 종료: clear_all + 어노테이션 경고는 프로브 내부에서 처리
    probe.stop().await;
    info!("AFP Probed stopped: {}", probe.stats().summary());

    Ok(())
}
