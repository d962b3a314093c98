//! AFP 트레이스 재생 도구
//!
//! 기록된 패킷 트레이스를 프로브에 통과시키고 재구성 쿼리를 실행함
//! - 기록된 타임스탬프 간격을 그대로 재현하는 타이밍 재생 지원
//! - 재생 후 count / received / undelivered 결과 출력
//! - 합성 트레이스 생성 모드 (--generate)
//!
//! 사용법:
//!   cargo run --release --bin afp-replay -- --trace trace.afp [OPTIONS]
//!
//! 예시:
//!   # 타이밍 무시하고 최대 속도 재생
//!   cargo run --release --bin afp-replay -- --trace trace.afp --aggregate 5
//!
//!   # 기록된 간격대로 재생
//!   cargo run --release --bin afp-replay -- --trace trace.afp --timing

use std::path::PathBuf;
use std::time::Duration;

use bytes::Bytes;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use afp::packet::{Packet, TraceReader, TraceWriter};
use afp::{Config, Probe};

/// 재생 도구 설정
struct ReplayConfig {
    trace_path: Option<PathBuf>,
    generate: Option<u32>,
    timing: bool,
    aggregates: Vec<u32>,
    config: Config,
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            trace_path: None,
            generate: None,
            timing: false,
            aggregates: Vec::new(),
            config: Config::default(),
        }
    }
}

fn parse_args() -> ReplayConfig {
    let args: Vec<String> = std::env::args().collect();
    let mut config = ReplayConfig::default();

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--trace" | "-t" => {
                if i + 1 < args.len() {
                    config.trace_path = Some(PathBuf::from(&args[i + 1]));
                    i += 1;
                }
            }
            "--generate" | "-g" => {
                if i + 1 < args.len() {
                    config.generate = Some(args[i + 1].parse().expect("유효한 숫자 필요"));
                    i += 1;
                }
            }
            "--timing" => {
                config.timing = true;
            }
            "--aggregate" | "-a" => {
                if i + 1 < args.len() {
                    config
                        .aggregates
                        .push(args[i + 1].parse().expect("유효한 숫자 필요"));
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
                    r#"AFP Replay - 트레이스 재생 도구

기록된 패킷 트레이스를 인라인 프로브에 통과시키고
received / undelivered 재구성 결과를 출력함

사용법:
  cargo run --release --bin afp-replay -- --trace <PATH> [OPTIONS]

옵션:
  -t, --trace <PATH>      재생할 트레이스 파일
  -g, --generate <N>      합성 트레이스 N 패킷 생성 후 종료 (--trace 경로에 기록)
  --timing                기록된 타임스탬프 간격대로 재생 (기본: 최대 속도)
  -a, --aggregate <ID>    재생 후 조회할 aggregate (반복 지정 가능)
  --ports <N>             포트 수 (기본: 2)
  --packetno <MODE>       패킷 번호 모드 -1/0/1 (기본: 0)
  -h, --help              이 도움말 출력

예시:
  # 합성 트레이스 생성
  cargo run --release --bin afp-replay -- --trace demo.afp --generate 1000

  # 재생 + aggregate 5 조회
  cargo run --release --bin afp-replay -- --trace demo.afp --aggregate 5
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

/// 합성 트레이스 생성: aggregate 1..=4, 포트 0은 전부, 포트 1은 3의 배수만 빠뜨림
fn generate_trace(path: &PathBuf, count: u32) -> afp::Result<()> {
    let mut writer = TraceWriter::create(path)?;

    for i in 0..count {
        let aggregate = 1 + (i % 4);
        let packetno = i / 4;

        let departure = Packet::new(aggregate, [packetno, 0], 0, Bytes::from_static(b"demo"));
        writer.write_packet(&departure)?;

        if packetno % 3 != 0 {
            let arrival = Packet::new(aggregate, [packetno, 0], 1, Bytes::from_static(b"demo"));
            writer.write_packet(&arrival)?;
        }
    }

    writer.flush()?;
    info!("합성 트레이스 생성 완료: {} 프레임", writer.written());
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 로깅 설정
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let replay_config = parse_args();

    let Some(trace_path) = replay_config.trace_path.clone() else {
        eprintln!("--trace <PATH> 필요 (--help 참조)");
        std::process::exit(1);
    };

    if let Some(count) = replay_config.generate {
        info!("Generating synthetic trace: {:?} ({} packets)", trace_path, count);
        generate_trace(&trace_path, count)?;
        return Ok(());
    }

    info!("AFP Replay starting...");
    info!("Trace: {:?}", trace_path);
    info!("Timing replay: {}", replay_config.timing);

    let port_count = replay_config.config.port_count;
    let (probe, mut forward_rx) = Probe::start(replay_config.config)?;

    // 전달 채널은 버림 (재생 도구에는 다운스트림이 없음)
    tokio::spawn(async move { while forward_rx.recv().await.is_some() {} });

    // ─────────────────────────────────────────────────────────────────
    // 재생 루프
    // ─────────────────────────────────────────────────────────────────
    let mut reader = TraceReader::open(&trace_path)?;
    let start = std::time::Instant::now();
    let mut replayed = 0u64;
    let mut prev_timestamp_us: Option<u64> = None;

    while let Some(packet) = reader.read_packet()? {
        // 기록된 간격 재현 (타임스탬프가 역행하면 그냥 이어서 보냄)
        if replay_config.timing {
            if let Some(prev) = prev_timestamp_us {
                let gap_us = packet.header.timestamp_us.saturating_sub(prev);
                if gap_us > 0 {
                    tokio::time::sleep(Duration::from_micros(gap_us)).await;
                }
            }
            prev_timestamp_us = Some(packet.header.timestamp_us);
        }

        let port = (packet.header.port as usize).min(port_count - 1);
        probe.push(port, packet).await?;
        replayed += 1;

        if replayed % 10_000 == 0 {
            info!("Progress: {} packets", replayed);
        }
    }

    let elapsed = start.elapsed();
    info!(
        "Replay complete: {} packets in {:.2}s ({:.0} pkt/s)",
        replayed,
        elapsed.as_secs_f64(),
        replayed as f64 / elapsed.as_secs_f64().max(1e-9)
    );

    // ─────────────────────────────────────────────────────────────────
    // 재구성 쿼리 출력
    // ─────────────────────────────────────────────────────────────────
    let count = probe.query_text("count", "").await?;
    println!("count:\n{}", count);

    for aggregate in &replay_config.aggregates {
        let arg = aggregate.to_string();
        let received = probe.query_text("received", &arg).await?;
        let undelivered = probe.query_text("undelivered", &arg).await?;

        println!("received {}:\n{}", aggregate, received);
        println!("undelivered {}:\n{}", aggregate, undelivered);
    }

    info!("{}", probe.stats().summary());
    probe.stop().await;

    Ok(())
}
