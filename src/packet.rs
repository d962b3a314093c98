//! 어노테이션 달린 패킷과 트레이스 파일 포맷
//!
//! - Packet: aggregate ID + 패킷 번호 어노테이션 + 원본 페이로드
//! - TraceWriter / TraceReader: 기록/재생용 프레임 파일

use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::{FORMAT_VERSION, MAGIC_NUMBER};

/// Aggregate ID (32비트, 0 = 추적 안 함)
pub type AggregateId = u32;

/// 패킷 번호 (플로우 내 위치, 카운터 벡터 인덱스)
pub type PacketNo = u32;

/// 포트 인덱스
pub type PortId = usize;

/// 패킷 헤더 (프로브가 읽는 어노테이션)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PacketHeader {
    /// aggregate ID (0이면 추적하지 않고 전달만)
    pub aggregate: AggregateId,

    /// 패킷 번호 어노테이션 슬롯 2개 (PACKETNO 모드 0/1로 선택)
    pub packetno: [PacketNo; 2],

    /// 관측된 포트 인덱스 (트레이스 기록용)
    pub port: u8,

    /// 페이로드 길이
    pub payload_len: u16,

    /// CRC32 체크섬 (페이로드)
    pub crc32: u32,

    /// 타임스탬프 (마이크로초, 트레이스 재생 타이밍용)
    pub timestamp_us: u64,
}

/// 패킷 (프로브 통과 단위)
///
/// 프로브는 페이로드를 절대 변경하지 않고 그대로 전달함
#[derive(Debug, Clone)]
pub struct Packet {
    /// 패킷 헤더
    pub header: PacketHeader,

    /// 실제 데이터
    pub payload: Bytes,
}

impl Packet {
    /// 새 패킷 생성
    pub fn new(aggregate: AggregateId, packetno: [PacketNo; 2], port: u8, payload: Bytes) -> Self {
        let crc32 = crc32fast::hash(&payload);
        let timestamp_us = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_micros() as u64;

        Self {
            header: PacketHeader {
                aggregate,
                packetno,
                port,
                payload_len: payload.len() as u16,
                crc32,
                timestamp_us,
            },
            payload,
        }
    }

    /// 패킷을 바이트로 직렬화
    pub fn to_bytes(&self) -> Vec<u8> {
        let header_bytes = bincode::serialize(&self.header).unwrap_or_default();
        let header_len = header_bytes.len() as u16;

        let mut buf = Vec::with_capacity(2 + header_bytes.len() + self.payload.len());
        buf.extend_from_slice(&header_len.to_le_bytes());
        buf.extend_from_slice(&header_bytes);
        buf.extend_from_slice(&self.payload);
        buf
    }

    /// 바이트에서 패킷 역직렬화
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < 2 {
            return None;
        }

        let header_len = u16::from_le_bytes([bytes[0], bytes[1]]) as usize;
        if bytes.len() < 2 + header_len {
            return None;
        }

        let header: PacketHeader = bincode::deserialize(&bytes[2..2 + header_len]).ok()?;
        let payload = Bytes::copy_from_slice(&bytes[2 + header_len..]);

        Some(Self { header, payload })
    }

    /// CRC 검증
    pub fn verify_crc(&self) -> bool {
        crc32fast::hash(&self.payload) == self.header.crc32
    }
}

/// 트레이스 파일 헤더
#[derive(Debug, Clone, Serialize, Deserialize)]
struct TraceFileHeader {
    magic: u32,
    version: u8,
}

/// 트레이스 파일 기록기
///
/// 프레임 구조: [u32 길이][패킷 바이트] 반복
pub struct TraceWriter<W: Write> {
    out: BufWriter<W>,
    written: u64,
}

impl TraceWriter<std::fs::File> {
    /// 파일 경로로 생성
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::new(std::fs::File::create(path)?)
    }
}

impl<W: Write> TraceWriter<W> {
    /// 기록기 생성, 파일 헤더 기록
    pub fn new(out: W) -> Result<Self> {
        let mut out = BufWriter::new(out);
        let header = TraceFileHeader {
            magic: MAGIC_NUMBER,
            version: FORMAT_VERSION,
        };
        let header_bytes = bincode::serialize(&header)?;
        out.write_all(&header_bytes)?;
        Ok(Self { out, written: 0 })
    }

    /// 패킷 한 개 기록
    pub fn write_packet(&mut self, packet: &Packet) -> Result<()> {
        let bytes = packet.to_bytes();
        self.out.write_all(&(bytes.len() as u32).to_le_bytes())?;
        self.out.write_all(&bytes)?;
        self.written += 1;
        Ok(())
    }

    /// 기록된 패킷 수
    pub fn written(&self) -> u64 {
        self.written
    }

    /// 버퍼 플러시
    pub fn flush(&mut self) -> Result<()> {
        self.out.flush()?;
        Ok(())
    }
}

/// 트레이스 파일 판독기
pub struct TraceReader<R: Read> {
    input: BufReader<R>,
}

impl TraceReader<std::fs::File> {
    /// 파일 경로로 열기
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::new(std::fs::File::open(path)?)
    }
}

impl<R: Read> TraceReader<R> {
    /// 판독기 생성, 파일 헤더 검증
    pub fn new(input: R) -> Result<Self> {
        let mut input = BufReader::new(input);
        // bincode 고정 크기: u32 + u8 = 5바이트
        let mut buf = [0u8; 5];
        input.read_exact(&mut buf)?;
        let header: TraceFileHeader = bincode::deserialize(&buf)?;

        if header.magic != MAGIC_NUMBER {
            return Err(Error::InvalidMagicNumber {
                expected: MAGIC_NUMBER,
                got: header.magic,
            });
        }
        if header.version != FORMAT_VERSION {
            return Err(Error::InvalidVersion {
                expected: FORMAT_VERSION,
                got: header.version,
            });
        }

        Ok(Self { input })
    }

    /// 다음 패킷 읽기 (파일 끝이면 None)
    pub fn read_packet(&mut self) -> Result<Option<Packet>> {
        let mut len_buf = [0u8; 4];
        match self.input.read_exact(&mut len_buf) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(e.into()),
        }

        let len = u32::from_le_bytes(len_buf) as usize;
        let mut frame = vec![0u8; len];
        self.input.read_exact(&mut frame)?;

        let packet = Packet::from_bytes(&frame).ok_or(Error::MalformedFrame)?;

        if !packet.verify_crc() {
            return Err(Error::CrcMismatch {
                expected: packet.header.crc32,
                got: crc32fast::hash(&packet.payload),
            });
        }

        Ok(Some(packet))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_packet_serialization() {
        let packet = Packet::new(7, [3, 9], 0, Bytes::from(vec![1, 2, 3, 4, 5]));

        let bytes = packet.to_bytes();
        let restored = Packet::from_bytes(&bytes).unwrap();

        assert_eq!(packet.header.aggregate, restored.header.aggregate);
        assert_eq!(packet.header.packetno, restored.header.packetno);
        assert_eq!(packet.payload, restored.payload);
        assert!(restored.verify_crc());
    }

    #[test]
    fn test_trace_roundtrip() {
        let mut buf = Vec::new();
        {
            let mut writer = TraceWriter::new(&mut buf).unwrap();
            for i in 0..10u32 {
                let packet = Packet::new(5, [i, 0], (i % 2) as u8, Bytes::from(vec![i as u8]));
                writer.write_packet(&packet).unwrap();
            }
            assert_eq!(writer.written(), 10);
            writer.flush().unwrap();
        }

        let mut reader = TraceReader::new(buf.as_slice()).unwrap();
        let mut count = 0u32;
        while let Some(packet) = reader.read_packet().unwrap() {
            assert_eq!(packet.header.aggregate, 5);
            assert_eq!(packet.header.packetno[0], count);
            count += 1;
        }
        assert_eq!(count, 10);
    }

    #[test]
    fn test_trace_file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("trace.afp");

        {
            let mut writer = TraceWriter::create(&path).unwrap();
            writer
                .write_packet(&Packet::new(3, [1, 2], 1, Bytes::from_static(b"abc")))
                .unwrap();
            writer.flush().unwrap();
        }

        let mut reader = TraceReader::open(&path).unwrap();
        let packet = reader.read_packet().unwrap().unwrap();
        assert_eq!(packet.header.aggregate, 3);
        assert_eq!(packet.header.port, 1);
        assert_eq!(packet.payload, Bytes::from_static(b"abc"));
        assert!(reader.read_packet().unwrap().is_none());
    }

    #[test]
    fn test_trace_bad_magic_rejected() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&0xDEADBEEFu32.to_le_bytes());
        buf.push(FORMAT_VERSION);

        match TraceReader::new(buf.as_slice()) {
            Err(Error::InvalidMagicNumber { got, .. }) => assert_eq!(got, 0xDEADBEEF),
            other => panic!("unexpected: {:?}", other.err()),
        }
    }
}
